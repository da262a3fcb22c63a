//! Registry of caller-supplied variables, functions, and aliases.
//!
//! Pure lookup and update; the store drives no control flow of its own. All
//! registrations are overwrite-on-conflict. Two of the original registration
//! rules are absorbed by the type system here: keys are always strings, and
//! functions are always callable.

use std::rc::Rc;

use rustc_hash::FxHashMap as HashMap;
use serde_json::Value;

use crate::directive::DirectiveKind;
use crate::scheduler::Completion;
use crate::{Error, Result};

/// Errors produced by caller-supplied functions and hooks. Caught at the
/// call boundary, logged, never propagated into playback control flow.
pub type CallbackError = Box<dyn std::error::Error>;

/// What a registered function produced.
pub enum FnOutput {
    /// Nothing of interest.
    Done,
    /// A value, rendered and injected by `eval` (and by a synchronously
    /// resolved `async`), discarded by `run`.
    Value(Value),
    /// An asynchronous completion the `async` directive suspends on. The
    /// function keeps a clone of the [`Completion`] and settles it later.
    Pending(Completion),
}

/// A registered directive function.
pub type DirectiveFn = Rc<dyn Fn(Option<&str>) -> Result<FnOutput, CallbackError>>;

/// Execution kind a custom directive name resolves to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AliasKind {
    #[default]
    Run,
    Async,
    Eval,
}

impl AliasKind {
    pub(crate) fn directive_kind(self) -> DirectiveKind {
        match self {
            Self::Run => DirectiveKind::Run,
            Self::Async => DirectiveKind::Async,
            Self::Eval => DirectiveKind::Eval,
        }
    }
}

/// A rewrite rule: `[@name:X]` behaves as `[@kind:target(X)]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Alias {
    pub target: String,
    pub kind: AliasKind,
}

/// The context store: three independent key-to-value maps.
#[derive(Default)]
pub struct Context {
    variables: HashMap<String, Value>,
    functions: HashMap<String, DirectiveFn>,
    aliases: HashMap<String, Alias>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a variable for `[@var:key]`. Blank keys are rejected.
    pub fn set_variable(&mut self, key: &str, value: impl Into<Value>) -> Result<()> {
        Self::checked_key(key)?;
        self.variables.insert(key.to_string(), value.into());
        Ok(())
    }

    /// Registers a function for `run`/`async`/`eval` directives and aliases.
    pub fn set_function<F>(&mut self, key: &str, function: F) -> Result<()>
    where
        F: Fn(Option<&str>) -> Result<FnOutput, CallbackError> + 'static,
    {
        Self::checked_key(key)?;
        self.functions.insert(key.to_string(), Rc::new(function));
        Ok(())
    }

    /// Registers `name` as a custom directive rewriting to
    /// `[@kind:target(...)]`. Names colliding with a built-in directive are
    /// rejected and the store is left untouched.
    pub fn set_alias(&mut self, name: &str, target: &str, kind: AliasKind) -> Result<()> {
        Self::checked_key(name)?;
        Self::checked_key(target)?;
        if DirectiveKind::is_reserved_name(name.trim()) {
            return Err(Error::ReservedAliasName(name.trim().to_string()));
        }
        self.aliases.insert(
            name.to_string(),
            Alias {
                target: target.to_string(),
                kind,
            },
        );
        Ok(())
    }

    pub fn variable(&self, key: &str) -> Option<&Value> {
        self.variables.get(key)
    }

    pub fn function(&self, key: &str) -> Option<DirectiveFn> {
        self.functions.get(key).cloned()
    }

    pub fn alias(&self, name: &str) -> Option<&Alias> {
        self.aliases.get(name)
    }

    fn checked_key(key: &str) -> Result<()> {
        if key.trim().is_empty() {
            return Err(Error::BlankKey);
        }
        Ok(())
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("variables", &self.variables.len())
            .field("functions", &self.functions.len())
            .field("aliases", &self.aliases.len())
            .finish()
    }
}
