//! SGR escape-sequence decoding.
//!
//! Turns a raw shell output stream into alternating plain and styled text
//! segments for hosts that render flat text instead of a cell grid. Only
//! SGR styling and the erase sequences are interpreted. Decoding never
//! fails: malformed escape data is absorbed, not surfaced as an error.

pub mod palette;

pub use palette::Rgb;

/// A run of text with one resolved style.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyledSegment {
    pub text: String,
    pub foreground: Rgb,
    pub bold: bool,
}

/// Streaming decoder: feed it chunks of shell output split at arbitrary
/// boundaries and it yields the segments completed so far. Style and
/// escape state persist across calls, so a chunk boundary may fall in the
/// middle of an escape sequence.
pub struct AnsiDecoder {
    default_foreground: Rgb,
    foreground: Option<Rgb>,
    bold: bool,
    text: String,
    escape: String,
    in_escape: bool,
}

impl AnsiDecoder {
    /// `default_foreground` is used whenever no SGR color is active.
    pub fn new(default_foreground: Rgb) -> Self {
        Self {
            default_foreground,
            foreground: None,
            bold: false,
            text: String::new(),
            escape: String::new(),
            in_escape: false,
        }
    }

    /// Decode one chunk. Trailing plain text is flushed before returning;
    /// an unterminated escape sequence is held for the next chunk.
    pub fn decode(&mut self, input: &str) -> Vec<StyledSegment> {
        let mut segments = Vec::new();

        for ch in input.chars() {
            if self.in_escape {
                self.escape.push(ch);
                // '@'..'~' are final bytes, but a leading '[' opens a CSI
                // sequence rather than closing one.
                if is_terminator(ch) && self.escape != "[" {
                    let sequence = std::mem::take(&mut self.escape);
                    self.dispatch(&sequence);
                    self.in_escape = false;
                }
                continue;
            }

            match ch {
                '\u{1b}' => {
                    self.flush(&mut segments);
                    self.escape.clear();
                    self.in_escape = true;
                }
                '\r' => self.text.push('\n'),
                _ => self.text.push(ch),
            }
        }

        self.flush(&mut segments);
        segments
    }

    fn flush(&mut self, segments: &mut Vec<StyledSegment>) {
        if self.text.is_empty() {
            return;
        }

        segments.push(StyledSegment {
            text: std::mem::take(&mut self.text),
            foreground: self.foreground.unwrap_or(self.default_foreground),
            bold: self.bold,
        });
    }

    fn dispatch(&mut self, sequence: &str) {
        if !sequence.starts_with('[') || sequence.len() < 2 {
            return;
        }

        // The final byte is ASCII, so the byte slices below stay on char
        // boundaries.
        let final_byte = sequence.as_bytes()[sequence.len() - 1];
        let parameters = &sequence[1..sequence.len() - 1];
        match final_byte {
            b'm' => self.apply_sgr(parameters),
            // Erase line / erase display: no screen model here, only the
            // not-yet-flushed text can be taken back.
            b'K' | b'J' => self.text.clear(),
            _ => {}
        }
    }

    fn apply_sgr(&mut self, parameters: &str) {
        if parameters.trim().is_empty() {
            self.reset_style();
            return;
        }

        let codes: Vec<i32> = parameters.split(';').map(parse_code).collect();
        let mut i = 0;
        while i < codes.len() {
            match codes[i] {
                0 => self.reset_style(),
                1 => self.bold = true,
                22 => self.bold = false,
                39 => self.foreground = None,
                code @ 30..=37 => self.foreground = Some(palette::BASIC[(code - 30) as usize]),
                code @ 90..=97 => self.foreground = Some(palette::BRIGHT[(code - 90) as usize]),
                38 if i + 1 < codes.len() => {
                    i += 1;
                    match codes[i] {
                        // 24-bit: 38;2;r;g;b
                        2 if i + 3 < codes.len() => {
                            self.foreground = Some(Rgb::new(
                                clamp_channel(codes[i + 1]),
                                clamp_channel(codes[i + 2]),
                                clamp_channel(codes[i + 3]),
                            ));
                            i += 3;
                        }
                        // 256-color: 38;5;n
                        5 if i + 1 < codes.len() => {
                            i += 1;
                            self.foreground = Some(palette::indexed(codes[i]));
                        }
                        // Truncated extended form: the intent is dropped.
                        _ => {}
                    }
                }
                _ => {}
            }
            i += 1;
        }
    }

    fn reset_style(&mut self) {
        self.foreground = None;
        self.bold = false;
    }
}

fn is_terminator(ch: char) -> bool {
    ('@'..='~').contains(&ch)
}

/// Empty and unparsable SGR tokens read as 0, the convention for an
/// omitted parameter.
fn parse_code(token: &str) -> i32 {
    token.trim().parse().unwrap_or(0)
}

fn clamp_channel(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    const WHITE: Rgb = Rgb::new(203, 204, 205);

    fn decoder() -> AnsiDecoder {
        AnsiDecoder::new(WHITE)
    }

    fn segment(text: &str, foreground: Rgb, bold: bool) -> StyledSegment {
        StyledSegment {
            text: text.to_string(),
            foreground,
            bold,
        }
    }

    /// Per-char expansion so segment boundaries do not matter when
    /// comparing differently chunked decodes.
    fn expand(segments: &[StyledSegment]) -> Vec<(char, Rgb, bool)> {
        segments
            .iter()
            .flat_map(|s| s.text.chars().map(move |c| (c, s.foreground, s.bold)))
            .collect()
    }

    #[test]
    fn bold_red_then_reset() {
        let mut decoder = decoder();
        let segments = decoder.decode("\u{1b}[1;31mHi\u{1b}[0m there");
        assert_eq!(
            segments,
            vec![
                segment("Hi", palette::BASIC[1], true),
                segment(" there", WHITE, false),
            ]
        );
    }

    #[test]
    fn gray_ramp_entry() {
        let mut decoder = decoder();
        let segments = decoder.decode("\u{1b}[38;5;232mX");
        assert_eq!(segments, vec![segment("X", Rgb::new(8, 8, 8), false)]);
    }

    #[test]
    fn truecolor_foreground() {
        let mut decoder = decoder();
        let segments = decoder.decode("\u{1b}[38;2;10;20;30mY");
        assert_eq!(segments, vec![segment("Y", Rgb::new(10, 20, 30), false)]);
    }

    #[test]
    fn carriage_return_becomes_line_feed() {
        let mut decoder = decoder();
        assert_eq!(decoder.decode("\r"), vec![segment("\n", WHITE, false)]);

        let mut decoder = AnsiDecoder::new(WHITE);
        assert_eq!(decoder.decode("a\rb"), vec![segment("a\nb", WHITE, false)]);
    }

    #[test]
    fn control_only_input_yields_no_segments() {
        let mut decoder = decoder();
        assert!(decoder.decode("\u{1b}[0m").is_empty());
        assert!(decoder.decode("\u{1b}[2J").is_empty());
        assert!(decoder.decode("").is_empty());
    }

    #[test]
    fn bright_palette_and_default_reset() {
        let mut decoder = decoder();
        let segments = decoder.decode("\u{1b}[92mok\u{1b}[39mplain");
        assert_eq!(
            segments,
            vec![
                segment("ok", palette::BRIGHT[2], false),
                segment("plain", WHITE, false),
            ]
        );
    }

    #[test]
    fn bold_toggles_off_with_22() {
        let mut decoder = decoder();
        let segments = decoder.decode("\u{1b}[1mA\u{1b}[22mB");
        assert_eq!(
            segments,
            vec![segment("A", WHITE, true), segment("B", WHITE, false)]
        );
    }

    #[test]
    fn style_persists_across_calls() {
        let mut decoder = decoder();
        assert_eq!(
            decoder.decode("\u{1b}[31mred"),
            vec![segment("red", palette::BASIC[1], false)]
        );
        assert_eq!(
            decoder.decode("still red"),
            vec![segment("still red", palette::BASIC[1], false)]
        );
    }

    #[test]
    fn escape_split_across_calls_is_preserved() {
        let mut decoder = decoder();
        assert!(decoder.decode("\u{1b}[1;3").is_empty());
        assert_eq!(
            decoder.decode("1mHi"),
            vec![segment("Hi", palette::BASIC[1], true)]
        );
    }

    #[test]
    fn split_chunks_match_single_call() {
        let input = "\u{1b}[1;31mHi\u{1b}[0m there \u{1b}[38;5;196mred\u{1b}[39m done\r\u{1b}[2Jx";

        let mut whole = decoder();
        let whole_segments = whole.decode(input);

        let mut split = decoder();
        let mut split_segments = Vec::new();
        for ch in input.chars() {
            split_segments.extend(split.decode(&ch.to_string()));
        }

        assert_eq!(expand(&whole_segments), expand(&split_segments));
    }

    #[test]
    fn truncated_extended_color_is_dropped() {
        let mut decoder = decoder();
        let segments = decoder.decode("\u{1b}[38;2;10;20mtext");
        assert_eq!(segments, vec![segment("text", WHITE, false)]);

        let mut decoder = AnsiDecoder::new(WHITE);
        let segments = decoder.decode("\u{1b}[38;5mtext");
        assert_eq!(segments, vec![segment("text", WHITE, false)]);
    }

    #[test]
    fn empty_tokens_read_as_reset() {
        let mut decoder = decoder();
        let segments = decoder.decode("\u{1b}[31mr\u{1b}[;1mQ");
        assert_eq!(
            segments,
            vec![
                segment("r", palette::BASIC[1], false),
                // ";1" is reset-then-bold: the color is gone, bold is on
                segment("Q", WHITE, true),
            ]
        );
    }

    #[test]
    fn non_csi_sequences_are_discarded() {
        let mut decoder = decoder();
        assert_eq!(
            decoder.decode("\u{1b}(Btext"),
            vec![segment("text", WHITE, false)]
        );
    }

    #[test]
    fn unhandled_csi_sequences_are_ignored() {
        let mut decoder = decoder();
        // cursor-hide plus an SGR code outside the styled subset
        let segments = decoder.decode("\u{1b}[?25l\u{1b}[99mvisible");
        assert_eq!(segments, vec![segment("visible", WHITE, false)]);
    }

    #[test]
    fn erase_line_does_not_disturb_flushed_text() {
        let mut decoder = decoder();
        let segments = decoder.decode("abc\u{1b}[K");
        assert_eq!(segments, vec![segment("abc", WHITE, false)]);
    }
}
