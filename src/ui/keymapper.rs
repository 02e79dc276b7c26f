//! Key mapping for terminal input
//!
//! Converts crossterm key events to the VT byte sequences the shell
//! expects on its input stream.

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

/// Key mapper for converting key events to bytes
pub struct KeyMapper;

impl KeyMapper {
    /// Map a crossterm KeyEvent to bytes for the session input stream.
    pub fn map(event: &KeyEvent) -> Option<Vec<u8>> {
        let mods = event.modifiers;

        match event.code {
            KeyCode::Char(ch) => Some(Self::map_char(ch, mods)),

            KeyCode::Enter => Some(vec![0x0D]),

            KeyCode::Backspace => {
                if mods.contains(KeyModifiers::ALT) {
                    Some(vec![0x1B, 0x7F])
                } else {
                    Some(vec![0x7F])
                }
            }

            KeyCode::Tab => {
                if mods.contains(KeyModifiers::SHIFT) {
                    Some(b"\x1b[Z".to_vec())
                } else {
                    Some(vec![0x09])
                }
            }

            KeyCode::Esc => Some(vec![0x1B]),

            // Arrow keys
            KeyCode::Up => Some(Self::arrow_key(b'A', mods)),
            KeyCode::Down => Some(Self::arrow_key(b'B', mods)),
            KeyCode::Right => Some(Self::arrow_key(b'C', mods)),
            KeyCode::Left => Some(Self::arrow_key(b'D', mods)),

            // Navigation keys
            KeyCode::Home => Some(Self::arrow_key(b'H', mods)),
            KeyCode::End => Some(Self::arrow_key(b'F', mods)),
            KeyCode::PageUp => Some(Self::tilde_key(5, mods)),
            KeyCode::PageDown => Some(Self::tilde_key(6, mods)),
            KeyCode::Insert => Some(Self::tilde_key(2, mods)),
            KeyCode::Delete => Some(Self::tilde_key(3, mods)),

            _ => None,
        }
    }

    /// Map a character with modifiers
    fn map_char(ch: char, mods: KeyModifiers) -> Vec<u8> {
        // Ctrl + letter = control character
        if mods.contains(KeyModifiers::CONTROL) && !mods.contains(KeyModifiers::ALT) {
            if ch.is_ascii_alphabetic() {
                return vec![(ch.to_ascii_lowercase() as u8) - b'a' + 1];
            }
            match ch {
                '@' | '`' | ' ' => return vec![0x00], // Ctrl+@ = NUL
                '[' => return vec![0x1B],             // Ctrl+[ = ESC
                '\\' => return vec![0x1C],            // Ctrl+\ = FS
                ']' => return vec![0x1D],             // Ctrl+] = GS
                '^' | '~' => return vec![0x1E],       // Ctrl+^ = RS
                '_' | '?' => return vec![0x1F],       // Ctrl+_ = US
                _ => {}
            }
        }

        // Alt + key = ESC + key
        if mods.contains(KeyModifiers::ALT) {
            let mut bytes = vec![0x1B];
            bytes.extend(ch.to_string().as_bytes());
            return bytes;
        }

        // Normal character
        ch.to_string().into_bytes()
    }

    /// xterm modifier parameter: 1 + shift(1) + alt(2) + ctrl(4)
    fn modifier_code(mods: KeyModifiers) -> u8 {
        let mut code = 1;
        if mods.contains(KeyModifiers::SHIFT) {
            code += 1;
        }
        if mods.contains(KeyModifiers::ALT) {
            code += 2;
        }
        if mods.contains(KeyModifiers::CONTROL) {
            code += 4;
        }
        code
    }

    /// CSI letter sequence, `ESC [ <key>` or `ESC [ 1 ; <mod> <key>`
    fn arrow_key(key: u8, mods: KeyModifiers) -> Vec<u8> {
        if mods.is_empty() {
            vec![0x1B, b'[', key]
        } else {
            format!("\x1b[1;{}{}", Self::modifier_code(mods), key as char).into_bytes()
        }
    }

    /// CSI tilde sequence, `ESC [ <n> ~` or `ESC [ <n> ; <mod> ~`
    fn tilde_key(number: u8, mods: KeyModifiers) -> Vec<u8> {
        if mods.is_empty() {
            format!("\x1b[{}~", number).into_bytes()
        } else {
            format!("\x1b[{};{}~", number, Self::modifier_code(mods)).into_bytes()
        }
    }
}
