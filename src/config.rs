//! Configuration loading for wtty.
//!
//! Reads `~/.wtty/config.toml`. Every field is optional; anything missing
//! or unparsable falls back to the built-in defaults.
//!
//! ```toml
//! # Shell executable and argument string
//! executable = "pwsh.exe"
//! arguments = "-NoLogo"
//!
//! # Working directory for new sessions (defaults to the current one)
//! working_directory = 'C:\src'
//!
//! # Default foreground for decoded output, as #RRGGBB
//! foreground = "#CBCCCD"
//! ```

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::ansi::{palette, Rgb};
use crate::core::session::LaunchOptions;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Shell executable; defaults to PowerShell.
    pub executable: Option<String>,
    /// Argument string passed after the executable.
    pub arguments: Option<String>,
    /// Working directory for new sessions.
    pub working_directory: Option<PathBuf>,
    /// Default foreground color as `#RRGGBB`.
    pub foreground: Option<String>,
}

impl Config {
    /// Load configuration from file
    pub fn load() -> Self {
        if let Some(path) = Self::config_path() {
            if path.exists() {
                if let Ok(content) = fs::read_to_string(&path) {
                    match toml::from_str(&content) {
                        Ok(config) => return config,
                        Err(e) => tracing::warn!("ignoring malformed config: {e}"),
                    }
                }
            }
        }
        Self::default()
    }

    /// Save configuration to file
    #[allow(dead_code)]
    pub fn save(&self) -> Result<(), String> {
        let path =
            Self::config_path().ok_or_else(|| "could not determine config path".to_string())?;
        let content = toml::to_string_pretty(self)
            .map_err(|e| format!("failed to serialize config: {e}"))?;
        fs::write(&path, content).map_err(|e| format!("failed to write config: {e}"))
    }

    /// Config file path, creating `~/.wtty` on first use.
    fn config_path() -> Option<PathBuf> {
        let home = home_dir()?;
        let dir = home.join(".wtty");
        if !dir.exists() {
            let _ = fs::create_dir_all(&dir);
        }
        Some(dir.join("config.toml"))
    }

    /// Launch options with config values layered over the defaults.
    pub fn launch_options(&self) -> LaunchOptions {
        let mut options = LaunchOptions::default();
        if let Some(executable) = &self.executable {
            options.executable = executable.clone();
        }
        if let Some(arguments) = &self.arguments {
            options.arguments = arguments.clone();
        }
        options.working_directory = self.working_directory.clone();
        options
    }

    /// Default foreground for decoded output; the basic palette's white
    /// when unset or malformed.
    pub fn default_foreground(&self) -> Rgb {
        self.foreground
            .as_deref()
            .and_then(parse_hex_color)
            .unwrap_or(palette::BASIC[7])
    }
}

/// Parse `#RRGGBB` (leading `#` optional).
fn parse_hex_color(value: &str) -> Option<Rgb> {
    let hex = value.trim().trim_start_matches('#');
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
    let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
    let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
    Some(Rgb::new(r, g, b))
}

// Get home directory
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("USERPROFILE")
        .or_else(|| std::env::var_os("HOME"))
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_colors_parse_with_and_without_hash() {
        assert_eq!(parse_hex_color("#CBCCCD"), Some(Rgb::new(203, 204, 205)));
        assert_eq!(parse_hex_color("0a141e"), Some(Rgb::new(10, 20, 30)));
        assert_eq!(parse_hex_color(" #ffffff "), Some(Rgb::new(255, 255, 255)));
    }

    #[test]
    fn malformed_hex_colors_are_rejected() {
        assert_eq!(parse_hex_color("#fff"), None);
        assert_eq!(parse_hex_color("not-a-color"), None);
        assert_eq!(parse_hex_color("#ggghhh"), None);
        assert_eq!(parse_hex_color("#ééé"), None);
    }

    #[test]
    fn foreground_falls_back_to_palette_white() {
        let config = Config::default();
        assert_eq!(config.default_foreground(), palette::BASIC[7]);

        let bad = Config {
            foreground: Some("nope".to_string()),
            ..Config::default()
        };
        assert_eq!(bad.default_foreground(), palette::BASIC[7]);
    }

    #[test]
    fn launch_options_layer_over_defaults() {
        let config = Config {
            executable: Some("cmd.exe".to_string()),
            ..Config::default()
        };
        let options = config.launch_options();
        assert_eq!(options.executable, "cmd.exe");
        // the unset argument string keeps the PowerShell default
        assert!(options.arguments.contains("-NoLogo"));
        assert!(options.working_directory.is_none());
    }
}
