//! # Typeline
//!
//! `typeline` renders a string incrementally, one lexical unit at a time,
//! onto an output surface, while interpreting an embedded directive
//! micro-language that can alter typing speed, pause execution, inject
//! variable text, or invoke caller-supplied functions:
//!
//! - build a [`engine::Typewriter`] over any [`surface::Surface`] (an
//!   append-only sink with a liveness check)
//!
//! - feed it text containing `[@type:value]` directives; the built-ins are
//!   `speed`, `delay`, `var`, `run`, `async` and `eval`, and custom names
//!   can be aliased to registered functions
//!
//! ## Directives
//!
//! The [`token`] module segments input into literal scalars, `<...>` tags,
//! `&...;` entities and `[@...]` directives; the [`directive`] module parses
//! a directive into a `(type, value)` pair. Directive markers embedded in
//! injected variable or function values are stripped before re-tokenization,
//! so data never becomes executable.
//!
//! ## Driving playback
//!
//! Playback is single-threaded and cooperative. Drive it deterministically
//! with [`engine::Typewriter::advance`] and [`engine::Typewriter::poll`], or
//! in realtime with [`engine::Typewriter::play`]. `pause`, `resume` and
//! `skip` steer a session in flight; a new `write` always cancels the
//! previous session first.
//!
//! ## Example
//!
//! ```rust
//! use typeline::prelude::*;
//!
//! # fn main() -> Result<(), typeline::Error> {
//! let mut tw = Typewriter::with_speed(StringSurface::new(), 25.0)?;
//! tw.set_variable("name", "Reza")?;
//!
//! tw.write("Hi [@var:name][@delay:300]!");
//! tw.advance(1_000.0);
//!
//! assert_eq!(tw.surface().content(), "Hi Reza!");
//! assert_eq!(tw.status(), Status::Idle);
//! # Ok(())
//! # }
//! ```
//!
//! Diagnostics during playback (malformed directive values, undefined
//! variables, failing callbacks) are non-fatal and reported through the
//! [`log`] facade; only registration and construction mistakes surface as
//! [`Error`].

pub mod context;
pub mod directive;
pub mod engine;
pub mod error;
pub mod prelude;
pub mod primitives;
pub mod scheduler;
pub mod surface;
pub mod token;

pub use error::{Error, Result};
