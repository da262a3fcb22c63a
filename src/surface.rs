//! The append-only sink literal text is rendered to.
//!
//! Fragments are passed through uninterpreted; the source text is trusted
//! and no escaping happens here. The liveness check lets a host signal that
//! the sink went away mid-session, which aborts playback.

use std::io::Write;

/// An append-only output sink with a liveness check.
pub trait Surface {
    /// Appends a raw text fragment.
    fn append(&mut self, text: &str);

    /// Whether the sink is still attached. Playback aborts when this turns
    /// false.
    fn is_attached(&self) -> bool {
        true
    }
}

/// In-memory surface collecting everything into a `String`.
#[derive(Debug, Default, Clone)]
pub struct StringSurface {
    content: String,
}

impl StringSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}

impl Surface for StringSurface {
    fn append(&mut self, text: &str) {
        self.content.push_str(text);
    }
}

/// Streams fragments to any [`Write`], flushing after each append so a
/// terminal shows characters as they are typed. Write failures detach the
/// surface, which the engine reports and then aborts on.
#[derive(Debug)]
pub struct WriterSurface<W: Write> {
    writer: W,
    attached: bool,
}

impl<W: Write> WriterSurface<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            attached: true,
        }
    }
}

impl<W: Write> Surface for WriterSurface<W> {
    fn append(&mut self, text: &str) {
        if !self.attached {
            return;
        }
        if self.writer.write_all(text.as_bytes()).is_err() || self.writer.flush().is_err() {
            self.attached = false;
        }
    }

    fn is_attached(&self) -> bool {
        self.attached
    }
}
