use thiserror::Error;

pub type Result<T, E = crate::Error> = std::result::Result<T, E>;

/// Fatal configuration errors, raised synchronously at the offending call.
///
/// Everything that can go wrong *during* playback (malformed directive
/// values, undefined variables, failing callbacks) is deliberately not here:
/// those conditions are non-fatal, reported through the [`log`] facade, and
/// playback continues with the next token.
#[derive(Error, Debug, PartialEq)]
pub enum Error {
    #[error("registration key must not be blank")]
    BlankKey,
    #[error("alias '{0}' collides with a built-in directive name")]
    ReservedAliasName(String),
    #[error("typing speed must be a finite non-negative number of milliseconds, got {0}")]
    InvalidSpeed(f64),
}
