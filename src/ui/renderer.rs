//! Styled segment output.
//!
//! Prints decoder output to the hosting console with crossterm. This is
//! the flat rendering path: segments stream by in order, no cell grid and
//! no cursor model.

use std::io::{self, Stdout, Write};

use crossterm::queue;
use crossterm::style::{Attribute, Color, Print, ResetColor, SetAttribute, SetForegroundColor};

use crate::core::ansi::StyledSegment;

pub struct SegmentRenderer {
    out: Stdout,
}

impl SegmentRenderer {
    pub fn new() -> Self {
        Self { out: io::stdout() }
    }

    /// Print segments in order, restoring default styling afterwards.
    pub fn print(&mut self, segments: &[StyledSegment]) -> io::Result<()> {
        if segments.is_empty() {
            return Ok(());
        }

        for segment in segments {
            let attribute = if segment.bold {
                Attribute::Bold
            } else {
                Attribute::NormalIntensity
            };
            queue!(
                self.out,
                SetForegroundColor(Color::Rgb {
                    r: segment.foreground.r,
                    g: segment.foreground.g,
                    b: segment.foreground.b,
                }),
                SetAttribute(attribute),
                // Raw mode needs an explicit carriage return per line.
                Print(segment.text.replace('\n', "\r\n")),
            )?;
        }

        queue!(self.out, SetAttribute(Attribute::Reset), ResetColor)?;
        self.out.flush()
    }
}

impl Default for SegmentRenderer {
    fn default() -> Self {
        Self::new()
    }
}
