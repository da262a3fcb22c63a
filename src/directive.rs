//! Parses directive tokens into `(type, value)` pairs and unwraps
//! function-call shaped values.
//!
//! The grammar is deliberately tiny: `[@type:value]`, where the first `:` is
//! the delimiter and everything after it (further colons included) is the raw
//! value. Alias resolution happens in the engine, against the context store,
//! before dispatch.

use once_cell::sync::Lazy;
use regex::Regex;

/// The closed set of built-in directive types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DirectiveKind {
    /// `[@speed:ms]` — change the per-literal pacing.
    Speed,
    /// `[@delay:ms]` — suspend playback for a duration.
    Delay,
    /// `[@var:name]` — inject a registered variable's rendered value.
    Var,
    /// `[@run:f(x)]` — invoke a registered function, discarding its result.
    Run,
    /// `[@async:f(x)]` — invoke and suspend until its completion settles.
    Async,
    /// `[@eval:f(x)]` — invoke and inject the rendered return value.
    Eval,
}

impl DirectiveKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "speed" => Some(Self::Speed),
            "delay" => Some(Self::Delay),
            "var" => Some(Self::Var),
            "run" => Some(Self::Run),
            "async" => Some(Self::Async),
            "eval" => Some(Self::Eval),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Speed => "speed",
            Self::Delay => "delay",
            Self::Var => "var",
            Self::Run => "run",
            Self::Async => "async",
            Self::Eval => "eval",
        }
    }

    /// True for names that alias registration must reject.
    pub fn is_reserved_name(name: &str) -> bool {
        Self::from_name(name).is_some()
    }
}

/// A transient parsed directive: a type name (built-in or alias, not yet
/// resolved) and its raw value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Directive {
    pub name: String,
    pub value: String,
}

/// Parses the content of a `[@...]` token.
///
/// Without a `:` the whole trimmed content is the name and the value is
/// empty. Otherwise the name is the trimmed text before the first `:` and
/// the value is the trimmed remainder, later colons untouched.
pub fn parse_directive(token: &str) -> Directive {
    let content = token
        .strip_prefix("[@")
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(token);
    match content.split_once(':') {
        Some((name, value)) => Directive {
            name: name.trim().to_string(),
            value: value.trim().to_string(),
        },
        None => Directive {
            name: content.trim().to_string(),
            value: String::new(),
        },
    }
}

/// A directive value interpreted as a function invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FunctionCall {
    pub name: String,
    /// At most one parameter; no multi-argument or nested parsing.
    pub param: Option<String>,
}

static CALL_SHAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_]*)\s*\((.*)\)\s*$").expect("valid regex"));

/// Recognizes the `identifier(args)` shape.
///
/// A matching `args` has at most one surrounding pair of single or double
/// quotes stripped and becomes the single parameter. A value that does not
/// match is treated as a bare function name with no parameter. Whether the
/// name resolves to anything is the caller's concern.
pub fn unwrap_function_call(value: &str) -> FunctionCall {
    match CALL_SHAPE.captures(value) {
        Some(caps) => {
            let args = caps[2].trim();
            let param = if args.is_empty() {
                None
            } else {
                Some(strip_quotes(args).to_string())
            };
            FunctionCall {
                name: caps[1].to_string(),
                param,
            }
        }
        None => FunctionCall {
            name: value.trim().to_string(),
            param: None,
        },
    }
}

fn strip_quotes(text: &str) -> &str {
    let bytes = text.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if first == last && (first == b'\'' || first == b'"') {
            return &text[1..text.len() - 1];
        }
    }
    text
}
