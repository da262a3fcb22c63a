//! Defines fundamental types used throughout the crate.

/// Logical playback time in milliseconds.
pub type Millis = f64;

/// Per-literal pacing used when no speed is configured, in milliseconds.
pub const DEFAULT_SPEED: Millis = 50.0;

/// Maximum number of consecutive playback steps that produce no literal
/// output before the loop guard aborts the session.
pub const MAX_SILENT_STEPS: u32 = 1000;
