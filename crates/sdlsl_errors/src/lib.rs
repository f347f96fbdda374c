//! The shared diagnostic channel.
//!
//! Every stage of the front end (preprocessor, parser, semantic analyzer)
//! appends to the same [`ErrorList`] instead of returning `Result` and
//! unwinding: a non-fatal error does not stop the pipeline, it just gets
//! recorded. [`Handler`] additionally tracks three sticky flags (`isfail`,
//! `out_of_memory`, `isiced`) that later phases check at their boundaries.

use sdlsl_span::{Interner, SourceLoc, Symbol, LINE_AFTER, LINE_BEFORE, LINE_NONE};
use std::cell::RefCell;
use std::io::Write;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

/// `{is_error, interned message, interned filename, line}`.
#[derive(Clone, Debug)]
pub struct ErrorEntry {
    pub is_error: bool,
    pub message: String,
    pub filename: Option<Symbol>,
    /// Line number, 1-based, or one of `LINE_BEFORE`/`LINE_AFTER`/`LINE_NONE`.
    pub line: i32,
}

impl ErrorEntry {
    pub fn position_label(&self) -> &'static str {
        match self.line {
            LINE_BEFORE => "before source",
            LINE_AFTER => "after source",
            LINE_NONE => "",
            _ => "",
        }
    }
}

/// Accumulates diagnostics in source order. An append-only vector rather
/// than a linked list — ordering is the only observable property, and a
/// `Vec` gives that for free.
#[derive(Default, Debug, Clone)]
pub struct ErrorList {
    entries: Vec<ErrorEntry>,
}

impl ErrorList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: ErrorEntry) {
        self.entries.push(entry);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn has_errors(&self) -> bool {
        self.entries.iter().any(|e| e.is_error)
    }

    /// Converts the accumulated list into a contiguous array for the caller.
    pub fn flatten(self) -> Vec<ErrorEntry> {
        self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ErrorEntry> {
        self.entries.iter()
    }
}

/// Owns the error list plus the three sticky flags a compilation tracks.
pub struct Handler {
    errors: ErrorList,
    isfail: bool,
    isiced: bool,
    out_of_memory: bool,
}

impl Default for Handler {
    fn default() -> Self {
        Self::new()
    }
}

impl Handler {
    pub fn new() -> Self {
        Handler { errors: ErrorList::new(), isfail: false, isiced: false, out_of_memory: false }
    }

    pub fn is_failed(&self) -> bool {
        self.isfail
    }

    pub fn is_iced(&self) -> bool {
        self.isiced
    }

    pub fn out_of_memory(&self) -> bool {
        self.out_of_memory
    }

    /// Records an allocation failure. Sticky: once set, callers are
    /// expected to stop doing further work for this compilation.
    pub fn record_out_of_memory(&mut self) {
        if !self.out_of_memory {
            tracing::error!("allocation failed; marking compilation out-of-memory");
        }
        self.out_of_memory = true;
        self.isfail = true;
    }

    /// Reports a fatal-class diagnostic at a known location.
    pub fn fail_at(&mut self, loc: SourceLoc, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(line = loc.line, "fail: {message}");
        self.errors.push(ErrorEntry {
            is_error: true,
            message,
            filename: Some(loc.filename),
            line: loc.line,
        });
        self.isfail = true;
    }

    /// Reports a fatal-class diagnostic with no associated source location
    /// (used before the first token is lexed, or for process-level errors).
    pub fn fail(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!("fail: {message}");
        self.errors.push(ErrorEntry { is_error: true, message, filename: None, line: LINE_NONE });
        self.isfail = true;
    }

    pub fn warn_at(&mut self, loc: SourceLoc, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(line = loc.line, "warn: {message}");
        self.errors.push(ErrorEntry {
            is_error: false,
            message,
            filename: Some(loc.filename),
            line: loc.line,
        });
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!("warn: {message}");
        self.errors.push(ErrorEntry { is_error: false, message, filename: None, line: LINE_NONE });
    }

    /// Marks a branch that should be unreachable. Sets `isiced` in addition
    /// to `isfail` and prefixes the message.
    pub fn ice(&mut self, loc: SourceLoc, message: impl Into<String>) {
        let message = format!("INTERNAL COMPILER ERROR: {}", message.into());
        tracing::error!("{message}");
        self.errors.push(ErrorEntry {
            is_error: true,
            message,
            filename: Some(loc.filename),
            line: loc.line,
        });
        self.isfail = true;
        self.isiced = true;
    }

    pub fn errors(&self) -> &ErrorList {
        &self.errors
    }

    pub fn into_errors(self) -> ErrorList {
        self.errors
    }

    /// Renders the accumulated diagnostics to a color terminal stream.
    /// Library entry points never call this themselves — they only return
    /// structured diagnostics — it exists for the CLI surface.
    pub fn render(&self, interner: &Interner, stream: &mut StandardStream) -> std::io::Result<()> {
        for entry in self.errors.iter() {
            let mut spec = ColorSpec::new();
            if entry.is_error {
                spec.set_fg(Some(Color::Red)).set_bold(true);
            } else {
                spec.set_fg(Some(Color::Yellow)).set_bold(true);
            }
            stream.set_color(&spec)?;
            write!(stream, "{}: ", if entry.is_error { "error" } else { "warning" })?;
            stream.reset()?;

            if let Some(filename) = entry.filename {
                write!(stream, "{}:", interner.get(filename))?;
            }
            match entry.line {
                LINE_BEFORE => write!(stream, "before source: ")?,
                LINE_AFTER => write!(stream, "after source: ")?,
                LINE_NONE => {}
                line => write!(stream, "{line}: ")?,
            }
            writeln!(stream, "{}", entry.message)?;
        }
        Ok(())
    }
}

pub fn stderr_stream() -> StandardStream {
    StandardStream::stderr(ColorChoice::Auto)
}

/// Shared compilation state threaded by shared reference through the
/// preprocessor, parser, and semantic analyzer — the same role
/// `rustc_session::parse::ParseSess` plays for `rustc_parse`: interior
/// mutability (`RefCell`, single-threaded per compilation) so every stage
/// can hold `&Session` instead of fighting the borrow checker over a
/// single `&mut Interner`/`&mut Handler`.
#[derive(Default)]
pub struct Session {
    pub interner: RefCell<Interner>,
    pub handler: RefCell<Handler>,
}

impl Session {
    pub fn new() -> Self {
        Session { interner: RefCell::new(Interner::new()), handler: RefCell::new(Handler::new()) }
    }

    pub fn intern(&self, s: &str) -> Symbol {
        self.interner.borrow_mut().intern(s)
    }

    pub fn fail_at(&self, loc: SourceLoc, message: impl Into<String>) {
        self.handler.borrow_mut().fail_at(loc, message);
    }

    pub fn warn_at(&self, loc: SourceLoc, message: impl Into<String>) {
        self.handler.borrow_mut().warn_at(loc, message);
    }

    pub fn is_failed(&self) -> bool {
        self.handler.borrow().is_failed()
    }

    pub fn out_of_memory(&self) -> bool {
        self.handler.borrow().out_of_memory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fail_sets_sticky_flag_without_unwinding() {
        let mut interner = Interner::new();
        let f = interner.intern("a.sdlsl");
        let mut h = Handler::new();
        assert!(!h.is_failed());
        h.fail_at(SourceLoc::new(f, 3), "undefined symbol `foo`");
        assert!(h.is_failed());
        assert_eq!(h.errors().len(), 1);
        // Processing continues: a second diagnostic can still be recorded.
        h.warn_at(SourceLoc::new(f, 4), "unused variable `bar`");
        assert_eq!(h.errors().len(), 2);
        assert!(h.errors().has_errors());
    }

    #[test]
    fn ice_sets_both_flags() {
        let mut interner = Interner::new();
        let f = interner.intern("a.sdlsl");
        let mut h = Handler::new();
        h.ice(SourceLoc::new(f, 1), "reached unreachable branch");
        assert!(h.is_failed());
        assert!(h.is_iced());
        assert!(h.errors().iter().next().unwrap().message.starts_with("INTERNAL COMPILER ERROR:"));
    }

    #[test]
    fn oom_is_sticky() {
        let mut h = Handler::new();
        h.record_out_of_memory();
        assert!(h.out_of_memory());
        assert!(h.is_failed());
    }

    #[test]
    fn flatten_preserves_order() {
        let mut interner = Interner::new();
        let f = interner.intern("a.sdlsl");
        let mut h = Handler::new();
        h.fail_at(SourceLoc::new(f, 1), "first");
        h.warn_at(SourceLoc::new(f, 2), "second");
        h.fail_at(SourceLoc::new(f, 3), "third");
        let flat = h.into_errors().flatten();
        assert_eq!(flat.len(), 3);
        assert_eq!(flat[0].message, "first");
        assert_eq!(flat[2].message, "third");
    }
}
