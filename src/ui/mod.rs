//! Console-facing input and output for the host loop.
//!
//! - **keymapper**: keyboard events -> PTY byte sequences
//! - **renderer**: styled-segment printing

pub mod keymapper;
pub mod renderer;

pub use keymapper::KeyMapper;
pub use renderer::SegmentRenderer;
