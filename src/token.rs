//! Splits input text into an ordered sequence of atomic [`Token`]s.
//!
//! Classification is purely lexical, first match wins, scanned left to right
//! with no backtracking:
//!
//! 1. a directive spanning `[@` up to the next `]`,
//! 2. a markup tag spanning `<` up to the next `>`,
//! 3. an entity spanning `&` up to the next `;`,
//! 4. otherwise a single Unicode scalar value.
//!
//! Concatenating the tokens of `tokenize(s)` reproduces `s` exactly. An
//! unclosed `[@` degrades to literal single-scalar tokens and is reported as
//! a non-fatal diagnostic before tokenization.

use serde::Serialize;

/// An immutable string fragment classified by shape only.
///
/// No semantic tag is stored; [`Token::is_directive`] and friends re-check
/// the shape on demand.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Token(Box<str>);

impl Token {
    fn new(fragment: &str) -> Self {
        Self(fragment.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// A well-formed `[@...]` directive.
    pub fn is_directive(&self) -> bool {
        self.0.starts_with("[@") && self.0.ends_with(']') && self.0.len() > 2
    }

    /// An HTML-like `<...>` tag.
    pub fn is_tag(&self) -> bool {
        self.0.starts_with('<') && self.0.ends_with('>') && self.0.len() > 1
    }

    /// An HTML-like `&...;` entity.
    pub fn is_entity(&self) -> bool {
        self.0.starts_with('&') && self.0.ends_with(';') && self.0.len() > 1
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Token {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// How many characters of an unclosed directive's content appear in its
/// diagnostic before truncation.
const DIAGNOSTIC_CONTENT_LEN: usize = 30;

/// Splits `text` into tokens. Empty input yields an empty sequence.
pub fn tokenize(text: &str) -> Vec<Token> {
    if text.is_empty() {
        return Vec::new();
    }
    report_unclosed_directives(text);

    let mut tokens = Vec::new();
    let mut pos = 0;
    while pos < text.len() {
        let rest = &text[pos..];
        let fragment_len = if rest.starts_with("[@") {
            rest.find(']').map(|end| end + 1)
        } else if rest.starts_with('<') {
            rest.find('>').map(|end| end + 1)
        } else if rest.starts_with('&') {
            rest.find(';').map(|end| end + 1)
        } else {
            None
        };
        let len = match fragment_len {
            Some(len) => len,
            // Falls through for plain text and for unmatched `[@`, `<`, `&`
            // openers, which degrade to single-scalar tokens.
            None => rest.chars().next().map(char::len_utf8).unwrap_or(1),
        };
        tokens.push(Token::new(&rest[..len]));
        pos += len;
    }
    tokens
}

/// True iff `text` tokenizes to a non-empty sequence made of directives only.
pub fn is_only_directives(text: &str) -> bool {
    if text.trim().is_empty() {
        return false;
    }
    let tokens = tokenize(text);
    !tokens.is_empty() && tokens.iter().all(Token::is_directive)
}

/// Replaces every well-formed `[@...]` substring with its inner content.
///
/// Applied to variable and function values before they are re-tokenized and
/// injected into the playback buffer, so directive markers embedded in data
/// never become executable.
pub(crate) fn strip_directive_markers(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pos = 0;
    while pos < text.len() {
        let rest = &text[pos..];
        if rest.starts_with("[@") {
            if let Some(end) = rest.find(']') {
                out.push_str(&rest[2..end]);
                pos += end + 1;
                continue;
            }
        }
        let ch = rest.chars().next().expect("non-empty remainder");
        out.push(ch);
        pos += ch.len_utf8();
    }
    out
}

/// Warns once per `[@` opener that never meets a closing `]`.
fn report_unclosed_directives(text: &str) {
    let mut search = 0;
    while let Some(found) = text[search..].find("[@") {
        let start = search + found + 2;
        match text[start..].find(']') {
            Some(end) => search = start + end + 1,
            None => {
                let content: String = text[start..].chars().take(DIAGNOSTIC_CONTENT_LEN).collect();
                let ellipsis = if text[start..].chars().count() > DIAGNOSTIC_CONTENT_LEN {
                    "…"
                } else {
                    ""
                };
                log::warn!("unclosed directive '[@{content}{ellipsis}', treating it as literal text");
                search = start;
            }
        }
    }
}
