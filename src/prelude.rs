//! Library's interface essentials.

pub use super::context::{Alias, AliasKind, Context, FnOutput};
pub use super::engine::{Snapshot, Status, Typewriter};
pub use super::primitives::{Millis, DEFAULT_SPEED, MAX_SILENT_STEPS};
pub use super::scheduler::Completion;
pub use super::surface::{StringSurface, Surface, WriterSurface};
pub use super::token::{is_only_directives, tokenize, Token};
