//! C-preprocessor-style macro and conditional-compilation engine.
//!
//! Pull-based: callers ask for one [`PpToken`] at a time. Internally the
//! preprocessor keeps a stack of [`IncludeState`] frames — one per open
//! `#include`d file, plus one short-lived synthetic frame per macro
//! expansion (the expansion's rendered text is re-lexed from scratch by
//! pushing it as just another frame, which is also how token-pasting and
//! stringification fall out almost for free: render first, tokenize
//! second). A macro expansion frame never starts a line, so a stray `#` in
//! an expansion can never be mistaken for a directive — directives only
//! ever come from real source text.
//!
//! Each frame owns its source buffer as `Rc<str>` rather than holding a
//! borrowed `sdlsl_lexer::Lexer`: a `Lexer<'a>` borrowing from a buffer
//! that lives inside a `Vec<IncludeState>` can't be stored alongside that
//! `Vec` without self-referential tricks, so instead every frame just
//! remembers its byte offset and constructs a fresh `Lexer` over the
//! remaining slice each time a token is pulled.

mod const_expr;

use rustc_hash::FxHashMap;
use sdlsl_errors::Session;
use sdlsl_lexer::{Lexer, TokenKind};
use sdlsl_span::{SourceLoc, Symbol};
use std::rc::Rc;

/// One token out of the preprocessor's output stream. Owns its text: the
/// frame it was lexed from may already be popped off the include stack by
/// the time a caller holds onto this value (e.g. after macro expansion
/// pushed and fully drained a synthetic frame).
#[derive(Clone, Debug)]
pub struct PpToken {
    pub kind: TokenKind,
    pub text: String,
    pub loc: SourceLoc,
}

impl PpToken {
    fn eoi(loc: SourceLoc) -> Self {
        PpToken { kind: TokenKind::Eoi, text: String::new(), loc }
    }
}

/// Resolves an `#include` target to file contents. The driver crate
/// supplies the real filesystem-backed implementation; tests supply
/// closures over in-memory maps.
pub type IncludeOpen<'a> =
    dyn FnMut(&str, bool, &Session) -> Result<(Symbol, Rc<str>), String> + 'a;

pub struct PpOptions {
    pub allow_dotdot_includes: bool,
    pub allow_absolute_includes: bool,
    pub max_include_depth: usize,
    /// Drop comments from text output instead of passing them through.
    /// Only consulted when the caller also turns on whitespace reporting
    /// via [`Preprocessor::set_report_whitespace`]; macro expansion and
    /// directive handling never see comments either way.
    pub strip_comments: bool,
}

impl Default for PpOptions {
    fn default() -> Self {
        PpOptions {
            allow_dotdot_includes: false,
            allow_absolute_includes: false,
            max_include_depth: 200,
            strip_comments: false,
        }
    }
}

#[derive(Clone, Debug)]
struct CondFrame {
    /// Whether tokens under the currently-selected branch of this
    /// `#if`/`#elif*`/`#else` chain should be emitted.
    active: bool,
    /// Whether some branch of this chain has already been taken — once
    /// true, later `#elif`s in the same chain stay inactive even if their
    /// own condition would be true.
    branch_taken: bool,
    saw_else: bool,
}

enum MacroKind {
    Object,
    Function { params: Vec<Symbol> },
}

struct MacroDef {
    kind: MacroKind,
    /// Body tokens, unexpanded.
    body: Vec<(TokenKind, String)>,
}

struct IncludeState {
    filename: Symbol,
    buf: Rc<str>,
    pos: usize,
    line: i32,
    at_line_start: bool,
    conds: Vec<CondFrame>,
    /// Set on a synthetic frame produced by expanding this macro, so the
    /// recursion guard (walked across the whole stack) can refuse to
    /// expand the same name again while its own expansion is still being
    /// rescanned.
    expanding: Option<Symbol>,
    pushback: Option<(TokenKind, String, i32, String)>,
}

impl IncludeState {
    fn file(filename: Symbol, buf: Rc<str>) -> Self {
        IncludeState {
            filename,
            buf,
            pos: 0,
            line: 1,
            at_line_start: true,
            conds: Vec::new(),
            expanding: None,
            pushback: None,
        }
    }

    fn synthetic(filename: Symbol, text: String, expanding: Option<Symbol>, start_line: i32) -> Self {
        IncludeState {
            filename,
            buf: Rc::from(text.into_boxed_str()),
            pos: 0,
            line: start_line,
            at_line_start: false,
            conds: Vec::new(),
            expanding,
            pushback: None,
        }
    }

    fn currently_skipping(&self) -> bool {
        self.conds.last().map_or(false, |f| !f.active)
    }

    /// Pulls the next raw token, skipping trivia but not expanding macros
    /// or interpreting directives — that happens one layer up. The fourth
    /// element is the whitespace/comment text that preceded the returned
    /// token, non-empty only when `report_whitespace` is set (text-mode
    /// preprocessing); `strip_comments` governs whether that leading text
    /// keeps comments verbatim or collapses them.
    fn pull_raw(&mut self, report_whitespace: bool, strip_comments: bool) -> (TokenKind, String, i32, String) {
        if let Some(t) = self.pushback.take() {
            return t;
        }
        let mut trivia = String::new();
        loop {
            if self.pos >= self.buf.len() {
                return (TokenKind::Eoi, String::new(), self.line, trivia);
            }
            let rest = &self.buf[self.pos..];
            let mut lexer = Lexer::new(rest, self.line);
            if report_whitespace {
                lexer.set_report_whitespace(true);
            }
            let tok = lexer.next_token();
            let kind = tok.kind;
            let text = tok.text.to_string();
            let tok_line = tok.line;
            let consumed = rest.len() - lexer.bytes_left();
            self.pos += consumed;
            self.line = lexer.line();
            match kind {
                TokenKind::Whitespace => {
                    trivia.push_str(&text);
                    continue;
                }
                TokenKind::LineComment => {
                    if !strip_comments {
                        trivia.push_str(&text);
                    }
                    continue;
                }
                TokenKind::BlockComment | TokenKind::IncompleteBlockComment => {
                    trivia.push_str(if strip_comments { " " } else { &text });
                    continue;
                }
                _ => return (kind, text, tok_line, trivia),
            }
        }
    }
}

enum Part {
    Text(String),
    Param(usize, bool),
    Stringify(usize),
    Paste,
}

fn build_parts(sess: &Session, body: &[(TokenKind, String)], params: &[Symbol]) -> Vec<Part> {
    let names: Vec<String> = {
        let interner = sess.interner.borrow();
        params.iter().map(|&p| interner.get(p).to_string()).collect()
    };
    let mut parts = Vec::new();
    let mut i = 0;
    while i < body.len() {
        let (kind, text) = &body[i];
        if *kind == TokenKind::Hash && i + 1 < body.len() && body[i + 1].0 == TokenKind::Ident {
            if let Some(pidx) = names.iter().position(|n| *n == body[i + 1].1) {
                parts.push(Part::Stringify(pidx));
                i += 2;
                continue;
            }
        }
        if *kind == TokenKind::Ident {
            if let Some(pidx) = names.iter().position(|n| n == text) {
                let glued = (i > 0 && body[i - 1].0 == TokenKind::HashHash)
                    || (i + 1 < body.len() && body[i + 1].0 == TokenKind::HashHash);
                parts.push(Part::Param(pidx, !glued));
                i += 1;
                continue;
            }
        }
        if *kind == TokenKind::HashHash {
            parts.push(Part::Paste);
            i += 1;
            continue;
        }
        parts.push(Part::Text(text.clone()));
        i += 1;
    }
    parts
}

fn join_raw(tokens: &[(TokenKind, String)]) -> String {
    tokens.iter().map(|(_, t)| t.as_str()).collect::<Vec<_>>().join(" ")
}

fn stringify_arg(tokens: &[(TokenKind, String)]) -> String {
    let joined = join_raw(tokens);
    let mut out = String::with_capacity(joined.len() + 2);
    out.push('"');
    for c in joined.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

pub struct Preprocessor<'a> {
    includes: Vec<IncludeState>,
    macros: FxHashMap<Symbol, MacroDef>,
    pragmas: Vec<(SourceLoc, String)>,
    options: PpOptions,
    open: Box<IncludeOpen<'a>>,
    root_filename: Symbol,
    file_sym: Symbol,
    line_sym: Symbol,
    /// Off by default: normal compilation only ever wants the significant
    /// token stream. Text-mode preprocessing turns this on so whitespace
    /// and comments ride along with the tokens that follow them.
    report_whitespace: bool,
}

impl<'a> Preprocessor<'a> {
    pub fn new(
        sess: &Session,
        filename: Symbol,
        source: Rc<str>,
        options: PpOptions,
        open: impl FnMut(&str, bool, &Session) -> Result<(Symbol, Rc<str>), String> + 'a,
    ) -> Self {
        Preprocessor {
            includes: vec![IncludeState::file(filename, source)],
            macros: FxHashMap::default(),
            pragmas: Vec::new(),
            options,
            open: Box::new(open),
            root_filename: filename,
            file_sym: sess.intern("__FILE__"),
            line_sym: sess.intern("__LINE__"),
            report_whitespace: false,
        }
    }

    /// Turns whitespace/comment reporting on or off. Callers reconstructing
    /// preprocessed source text (rather than feeding the parser) set this
    /// before pulling any tokens.
    pub fn set_report_whitespace(&mut self, report: bool) {
        self.report_whitespace = report;
    }

    /// Predefines an object-like macro before preprocessing starts, for
    /// `-D NAME=VALUE` style command-line defines.
    pub fn predefine(&mut self, sess: &Session, name: &str, value: &str) {
        let sym = sess.intern(name);
        let mut tokens = Vec::new();
        let mut lexer = Lexer::new(value, 1);
        loop {
            let t = lexer.next_token();
            if t.kind == TokenKind::Eoi {
                break;
            }
            tokens.push((t.kind, t.text.to_string()));
        }
        self.macros.insert(sym, MacroDef { kind: MacroKind::Object, body: tokens });
    }

    pub fn take_pragmas(&mut self) -> Vec<(SourceLoc, String)> {
        std::mem::take(&mut self.pragmas)
    }

    pub fn next_token(&mut self, sess: &Session) -> PpToken {
        loop {
            if self.includes.is_empty() {
                return PpToken::eoi(SourceLoc::after(self.root_filename));
            }
            if let Some(tok) = self.pull_one_token(sess) {
                return tok;
            }
        }
    }

    fn push_synthetic(&mut self, filename: Symbol, text: String, expanding: Option<Symbol>, start_line: i32) {
        self.includes.push(IncludeState::synthetic(filename, text, expanding, start_line));
    }

    fn is_expanding(&self, sym: Symbol) -> bool {
        self.includes.iter().any(|f| f.expanding == Some(sym))
    }

    /// Does one unit of work: either produces a token, or consumes a
    /// directive/trivia/expansion and returns `None` so the caller loops.
    fn pull_one_token(&mut self, sess: &Session) -> Option<PpToken> {
        let idx = self.includes.len() - 1;
        let (kind, text, line, trivia) =
            self.includes[idx].pull_raw(self.report_whitespace, self.options.strip_comments);
        let filename = self.includes[idx].filename;
        let loc = SourceLoc::new(filename, line);

        match kind {
            TokenKind::Eoi => {
                if self.report_whitespace && !trivia.is_empty() {
                    // Trailing whitespace/comments after the last real
                    // token: flush them now, pop the frame on the next
                    // pull once `pos` re-reports Eoi with nothing pending.
                    return Some(PpToken { kind: TokenKind::Whitespace, text: trivia, loc });
                }
                let finished = self.includes.pop().unwrap();
                if !finished.conds.is_empty() {
                    sess.fail_at(loc, "unterminated #if block in file");
                }
                None
            }
            TokenKind::Newline => {
                self.includes[idx].at_line_start = true;
                if self.report_whitespace {
                    Some(PpToken { kind: TokenKind::Newline, text: format!("{trivia}{text}"), loc })
                } else {
                    None
                }
            }
            TokenKind::Hash if self.includes[idx].at_line_start => {
                self.includes[idx].at_line_start = false;
                self.handle_directive(sess, idx, loc);
                None
            }
            _ => {
                self.includes[idx].at_line_start = false;
                if self.includes[idx].currently_skipping() {
                    return None;
                }
                if kind == TokenKind::Ident && self.try_expand(sess, idx, &text, loc, &trivia) {
                    return None;
                }
                let text = if self.report_whitespace { format!("{trivia}{text}") } else { text };
                Some(PpToken { kind, text, loc })
            }
        }
    }

    fn try_expand(&mut self, sess: &Session, idx: usize, ident_text: &str, loc: SourceLoc, trivia: &str) -> bool {
        let sym = sess.intern(ident_text);
        if sym == self.file_sym {
            let name = sess.interner.borrow().get(loc.filename).to_string();
            self.push_synthetic(loc.filename, format!("{trivia}\"{name}\""), None, loc.line);
            return true;
        }
        if sym == self.line_sym {
            self.push_synthetic(loc.filename, format!("{trivia}{}", loc.line), None, loc.line);
            return true;
        }
        if self.is_expanding(sym) {
            return false;
        }
        if !self.macros.contains_key(&sym) {
            return false;
        }
        let is_function = matches!(self.macros[&sym].kind, MacroKind::Function { .. });
        if !is_function {
            let body = self.macros[&sym].body.clone();
            let rendered = self.render_macro_body(sess, &body, &[], &[]);
            self.push_synthetic(loc.filename, format!("{trivia}{rendered}"), Some(sym), loc.line);
            return true;
        }

        match self.peek_significant(idx) {
            Some((TokenKind::LParen, _, _, _)) => {
                let params = match &self.macros[&sym].kind {
                    MacroKind::Function { params } => params.clone(),
                    MacroKind::Object => unreachable!(),
                };
                let args = self.collect_args(idx);
                if args.len() != params.len() {
                    sess.warn_at(
                        loc,
                        format!(
                            "macro called with {} argument(s), expected {}",
                            args.len(),
                            params.len()
                        ),
                    );
                }
                let body = match &self.macros[&sym].kind {
                    MacroKind::Function { .. } => self.macros[&sym].body.clone(),
                    MacroKind::Object => unreachable!(),
                };
                let rendered = self.render_macro_body(sess, &body, &params, &args);
                self.push_synthetic(loc.filename, format!("{trivia}{rendered}"), Some(sym), loc.line);
                true
            }
            other => {
                if let Some(t) = other {
                    self.includes[idx].pushback = Some(t);
                }
                false
            }
        }
    }

    fn peek_significant(&mut self, idx: usize) -> Option<(TokenKind, String, i32, String)> {
        loop {
            let tok = self.includes[idx].pull_raw(self.report_whitespace, self.options.strip_comments);
            match tok.0 {
                TokenKind::Newline => continue,
                TokenKind::Eoi => return None,
                _ => return Some(tok),
            }
        }
    }

    fn collect_args(&mut self, idx: usize) -> Vec<Vec<(TokenKind, String)>> {
        // The opening '(' was already consumed by `peek_significant`.
        let mut args: Vec<Vec<(TokenKind, String)>> = vec![Vec::new()];
        let mut depth = 0i32;
        loop {
            let (kind, text, _, _) = self.includes[idx].pull_raw(self.report_whitespace, self.options.strip_comments);
            match kind {
                TokenKind::Eoi => break,
                TokenKind::Newline => continue,
                TokenKind::LParen => {
                    depth += 1;
                    args.last_mut().unwrap().push((kind, text));
                }
                TokenKind::RParen => {
                    if depth == 0 {
                        break;
                    }
                    depth -= 1;
                    args.last_mut().unwrap().push((kind, text));
                }
                TokenKind::Comma if depth == 0 => args.push(Vec::new()),
                _ => args.last_mut().unwrap().push((kind, text)),
            }
        }
        if args.len() == 1 && args[0].is_empty() {
            return Vec::new();
        }
        args
    }

    fn render_macro_body(
        &mut self,
        sess: &Session,
        body: &[(TokenKind, String)],
        params: &[Symbol],
        args: &[Vec<(TokenKind, String)>],
    ) -> String {
        let parts = build_parts(sess, body, params);
        let mut atoms: Vec<String> = Vec::new();
        let mut glue = false;
        for part in parts {
            let atom = match part {
                Part::Text(s) => s,
                Part::Paste => {
                    glue = true;
                    continue;
                }
                Part::Param(i, expand) => {
                    let raw = args.get(i).cloned().unwrap_or_default();
                    if expand {
                        self.expand_tokens_fully(sess, raw)
                    } else {
                        join_raw(&raw)
                    }
                }
                Part::Stringify(i) => {
                    let raw = args.get(i).cloned().unwrap_or_default();
                    stringify_arg(&raw)
                }
            };
            if glue {
                if let Some(last) = atoms.last_mut() {
                    last.push_str(&atom);
                } else {
                    atoms.push(atom);
                }
            } else {
                atoms.push(atom);
            }
            glue = false;
        }
        atoms.join(" ")
    }

    /// Fully macro-expands a token sequence in isolation (used for a
    /// function-like macro's arguments), returning the rendered text.
    fn expand_tokens_fully(&mut self, sess: &Session, tokens: Vec<(TokenKind, String)>) -> String {
        if tokens.is_empty() {
            return String::new();
        }
        let text = join_raw(&tokens);
        let filename = self.includes.last().map(|f| f.filename).unwrap_or(self.root_filename);
        let line = self.includes.last().map(|f| f.line).unwrap_or(1);
        self.push_synthetic(filename, text, None, line);
        let floor = self.includes.len();
        let mut out = Vec::new();
        loop {
            if self.includes.len() < floor {
                break;
            }
            if let Some(tok) = self.pull_one_token(sess) {
                out.push(tok.text);
            }
        }
        out.join(" ")
    }

    fn handle_directive(&mut self, sess: &Session, idx: usize, hash_loc: SourceLoc) {
        let (kw_kind, kw_text, _, _) = self.includes[idx].pull_raw(self.report_whitespace, self.options.strip_comments);
        if kw_kind == TokenKind::Newline {
            self.includes[idx].at_line_start = true;
            return;
        }
        if kw_kind == TokenKind::Eoi {
            return;
        }
        let skipping_here = self.includes[idx].currently_skipping();
        match kw_text.as_str() {
            "include" => {
                if skipping_here {
                    self.skip_line(idx);
                } else {
                    self.do_include(sess, idx, hash_loc);
                }
            }
            "define" => {
                if skipping_here {
                    self.skip_line(idx);
                } else {
                    self.do_define(sess, idx, hash_loc);
                }
            }
            "undef" => {
                if skipping_here {
                    self.skip_line(idx);
                } else {
                    self.do_undef(sess, idx);
                }
            }
            "ifdef" => self.do_ifdef(sess, idx, hash_loc, false),
            "ifndef" => self.do_ifdef(sess, idx, hash_loc, true),
            "if" => self.do_if(sess, idx, hash_loc),
            "elif" => self.do_elif(sess, idx, hash_loc),
            "else" => self.do_else(sess, idx, hash_loc),
            "endif" => self.do_endif(sess, idx, hash_loc),
            "line" => {
                if skipping_here {
                    self.skip_line(idx);
                } else {
                    self.do_line(idx, sess, hash_loc);
                }
            }
            "error" => {
                if skipping_here {
                    self.skip_line(idx);
                } else {
                    self.do_error(sess, idx, hash_loc);
                }
            }
            "pragma" => {
                if skipping_here {
                    self.skip_line(idx);
                } else {
                    self.do_pragma(idx, hash_loc);
                }
            }
            other => {
                if !skipping_here {
                    sess.warn_at(hash_loc, format!("unknown preprocessor directive `#{other}`"));
                }
                self.skip_line(idx);
            }
        }
    }

    fn skip_line(&mut self, idx: usize) {
        loop {
            let (kind, _, _, _) = self.includes[idx].pull_raw(self.report_whitespace, self.options.strip_comments);
            match kind {
                TokenKind::Newline => {
                    self.includes[idx].at_line_start = true;
                    break;
                }
                TokenKind::Eoi => break,
                _ => {}
            }
        }
    }

    fn collect_rest_of_line(&mut self, idx: usize) -> Vec<(TokenKind, String)> {
        let mut out = Vec::new();
        loop {
            let (kind, text, _, _) = self.includes[idx].pull_raw(self.report_whitespace, self.options.strip_comments);
            match kind {
                TokenKind::Newline => {
                    self.includes[idx].at_line_start = true;
                    break;
                }
                TokenKind::Eoi => break,
                _ => out.push((kind, text)),
            }
        }
        out
    }

    fn do_include(&mut self, sess: &Session, idx: usize, hash_loc: SourceLoc) {
        let rest = &self.includes[idx].buf[self.includes[idx].pos..];
        let line_end = rest.find('\n').unwrap_or(rest.len());
        let line_text = rest[..line_end].to_string();
        self.includes[idx].pos += line_end;

        let trimmed = line_text.trim();
        let (is_system, inner) = if let Some(after_quote) = trimmed.strip_prefix('"') {
            match after_quote.find('"') {
                Some(end) => (false, after_quote[..end].to_string()),
                None => {
                    sess.fail_at(hash_loc, "malformed #include: missing closing `\"`");
                    return;
                }
            }
        } else if let Some(after_angle) = trimmed.strip_prefix('<') {
            match after_angle.find('>') {
                Some(end) => (true, after_angle[..end].to_string()),
                None => {
                    sess.fail_at(hash_loc, "malformed #include: missing closing `>`");
                    return;
                }
            }
        } else {
            sess.fail_at(hash_loc, "malformed #include: expected \"file\" or <file>");
            return;
        };

        if inner.contains("..") && !self.options.allow_dotdot_includes {
            sess.fail_at(hash_loc, format!("#include path `{inner}` may not contain `..`"));
            return;
        }
        if inner.starts_with('/') && !self.options.allow_absolute_includes {
            sess.fail_at(hash_loc, format!("#include path `{inner}` may not be absolute"));
            return;
        }
        if self.includes.len() >= self.options.max_include_depth {
            sess.fail_at(hash_loc, "#include nested too deeply");
            return;
        }

        match (self.open)(&inner, is_system, sess) {
            Ok((name_sym, content)) => self.includes.push(IncludeState::file(name_sym, content)),
            Err(e) => sess.fail_at(hash_loc, format!("cannot open include `{inner}`: {e}")),
        }
    }

    fn do_define(&mut self, sess: &Session, idx: usize, hash_loc: SourceLoc) {
        let (kind, name_text, _, _) = self.includes[idx].pull_raw(self.report_whitespace, self.options.strip_comments);
        if kind != TokenKind::Ident {
            sess.fail_at(hash_loc, "#define requires a macro name");
            self.skip_line(idx);
            return;
        }
        let name_sym = sess.intern(&name_text);
        let immediate_paren = self.includes[idx].buf.as_bytes().get(self.includes[idx].pos) == Some(&b'(');

        let macro_kind = if immediate_paren {
            self.includes[idx].pull_raw(self.report_whitespace, self.options.strip_comments); // consume '('
            let mut params = Vec::new();
            loop {
                let (k, t, _, _) = self.includes[idx].pull_raw(self.report_whitespace, self.options.strip_comments);
                match k {
                    TokenKind::RParen => break,
                    TokenKind::Ident => {
                        params.push(sess.intern(&t));
                        let saved_pos = self.includes[idx].pos;
                        let saved_line = self.includes[idx].line;
                        let (k2, _, _, _) = self.includes[idx].pull_raw(self.report_whitespace, self.options.strip_comments);
                        if k2 == TokenKind::RParen {
                            break;
                        }
                        if k2 != TokenKind::Comma {
                            self.includes[idx].pos = saved_pos;
                            self.includes[idx].line = saved_line;
                        }
                    }
                    TokenKind::Eoi | TokenKind::Newline => {
                        sess.fail_at(hash_loc, "unterminated macro parameter list");
                        break;
                    }
                    _ => {
                        sess.fail_at(hash_loc, "malformed macro parameter list");
                        break;
                    }
                }
            }
            MacroKind::Function { params }
        } else {
            MacroKind::Object
        };

        let body = self.collect_rest_of_line(idx);

        if self.macros.contains_key(&name_sym) {
            sess.warn_at(hash_loc, format!("macro `{name_text}` redefined"));
        } else {
            self.macros.insert(name_sym, MacroDef { kind: macro_kind, body });
        }
    }

    fn do_undef(&mut self, sess: &Session, idx: usize) {
        let (kind, name_text, _, _) = self.includes[idx].pull_raw(self.report_whitespace, self.options.strip_comments);
        if kind == TokenKind::Ident {
            let sym = sess.intern(&name_text);
            self.macros.remove(&sym);
        }
        self.skip_line(idx);
    }

    fn do_ifdef(&mut self, sess: &Session, idx: usize, hash_loc: SourceLoc, negate: bool) {
        let parent_skip = self.includes[idx].currently_skipping();
        let (kind, name_text, _, _) = self.includes[idx].pull_raw(self.report_whitespace, self.options.strip_comments);
        self.skip_line(idx);
        if parent_skip {
            self.includes[idx].conds.push(CondFrame { active: false, branch_taken: true, saw_else: false });
            return;
        }
        if kind != TokenKind::Ident {
            sess.fail_at(hash_loc, "#ifdef/#ifndef requires a macro name");
            self.includes[idx].conds.push(CondFrame { active: false, branch_taken: true, saw_else: false });
            return;
        }
        let sym = sess.intern(&name_text);
        let defined = self.macros.contains_key(&sym);
        let active = defined ^ negate;
        self.includes[idx].conds.push(CondFrame { active, branch_taken: active, saw_else: false });
    }

    fn do_if(&mut self, sess: &Session, idx: usize, hash_loc: SourceLoc) {
        let parent_skip = self.includes[idx].currently_skipping();
        if parent_skip {
            self.skip_line(idx);
            self.includes[idx].conds.push(CondFrame { active: false, branch_taken: true, saw_else: false });
            return;
        }
        let value = self.eval_if_expr(sess, idx, hash_loc);
        self.includes[idx].conds.push(CondFrame { active: value, branch_taken: value, saw_else: false });
    }

    fn do_elif(&mut self, sess: &Session, idx: usize, hash_loc: SourceLoc) {
        if self.includes[idx].conds.is_empty() {
            sess.fail_at(hash_loc, "#elif without #if");
            self.skip_line(idx);
            return;
        }
        let n = self.includes[idx].conds.len();
        let parent_skip = n >= 2 && !self.includes[idx].conds[n - 2].active;
        let top = self.includes[idx].conds.last().unwrap();
        if top.saw_else {
            sess.fail_at(hash_loc, "#elif after #else");
        }
        let already_taken = top.branch_taken;
        if parent_skip || already_taken {
            self.skip_line(idx);
            self.includes[idx].conds.last_mut().unwrap().active = false;
            return;
        }
        let value = self.eval_if_expr(sess, idx, hash_loc);
        let top = self.includes[idx].conds.last_mut().unwrap();
        top.active = value;
        if value {
            top.branch_taken = true;
        }
    }

    fn do_else(&mut self, sess: &Session, idx: usize, hash_loc: SourceLoc) {
        self.skip_line(idx);
        if self.includes[idx].conds.is_empty() {
            sess.fail_at(hash_loc, "#else without #if");
            return;
        }
        let n = self.includes[idx].conds.len();
        let parent_skip = n >= 2 && !self.includes[idx].conds[n - 2].active;
        let top = self.includes[idx].conds.last_mut().unwrap();
        if top.saw_else {
            sess.fail_at(hash_loc, "#else after #else");
        }
        top.active = !parent_skip && !top.branch_taken;
        top.branch_taken = true;
        top.saw_else = true;
    }

    fn do_endif(&mut self, sess: &Session, idx: usize, hash_loc: SourceLoc) {
        self.skip_line(idx);
        if self.includes[idx].conds.pop().is_none() {
            sess.fail_at(hash_loc, "#endif without #if");
        }
    }

    fn do_line(&mut self, idx: usize, sess: &Session, hash_loc: SourceLoc) {
        let (kind, text, _, _) = self.includes[idx].pull_raw(self.report_whitespace, self.options.strip_comments);
        if kind != TokenKind::IntLiteral {
            sess.fail_at(hash_loc, "#line requires a line number");
            self.skip_line(idx);
            return;
        }
        let requested: i32 = text.parse().unwrap_or(0);
        let (kind2, fname, _, _) = self.includes[idx].pull_raw(self.report_whitespace, self.options.strip_comments);
        if kind2 == TokenKind::StringLiteral {
            let stripped = fname.trim_matches('"');
            self.includes[idx].filename = sess.intern(stripped);
            self.skip_line(idx);
        } else if kind2 == TokenKind::Newline {
            self.includes[idx].at_line_start = true;
        } else {
            self.skip_line(idx);
        }
        self.includes[idx].line = requested;
    }

    fn do_error(&mut self, sess: &Session, idx: usize, hash_loc: SourceLoc) {
        let toks = self.collect_rest_of_line(idx);
        let msg = join_raw(&toks);
        sess.fail_at(hash_loc, if msg.is_empty() { "#error".to_string() } else { format!("#error: {msg}") });
    }

    fn do_pragma(&mut self, idx: usize, hash_loc: SourceLoc) {
        let toks = self.collect_rest_of_line(idx);
        self.pragmas.push((hash_loc, join_raw(&toks)));
    }

    /// `#if`/`#elif` constant-expression evaluation: resolve `defined`
    /// against the *unexpanded* tokens (its operand is never macro
    /// expanded), macro-expand everything else, re-lex, then hand the
    /// result to the shunting-yard evaluator.
    fn eval_if_expr(&mut self, sess: &Session, idx: usize, hash_loc: SourceLoc) -> bool {
        let raw = self.collect_rest_of_line(idx);
        let resolved = self.resolve_defined(sess, raw);
        let expanded_text = self.expand_tokens_fully(sess, resolved);

        let mut tokens = Vec::new();
        let mut lexer = Lexer::new(&expanded_text, hash_loc.line);
        loop {
            let t = lexer.next_token();
            if t.kind == TokenKind::Eoi {
                break;
            }
            tokens.push((t.kind, t.text.to_string()));
        }

        let mut div_by_zero = false;
        let value = const_expr::eval(&tokens, || div_by_zero = true);
        if div_by_zero {
            sess.warn_at(hash_loc, "division or modulo by zero in `#if` expression");
        }
        match value {
            Some(n) => n != 0,
            None => {
                sess.fail_at(hash_loc, "malformed `#if`/`#elif` expression");
                false
            }
        }
    }

    fn resolve_defined(&self, sess: &Session, tokens: Vec<(TokenKind, String)>) -> Vec<(TokenKind, String)> {
        let mut out = Vec::with_capacity(tokens.len());
        let mut i = 0;
        while i < tokens.len() {
            if tokens[i].0 == TokenKind::Ident && tokens[i].1 == "defined" {
                if i + 3 < tokens.len()
                    && tokens[i + 1].0 == TokenKind::LParen
                    && tokens[i + 2].0 == TokenKind::Ident
                    && tokens[i + 3].0 == TokenKind::RParen
                {
                    let sym = sess.intern(&tokens[i + 2].1);
                    let v = if self.macros.contains_key(&sym) { "1" } else { "0" };
                    out.push((TokenKind::IntLiteral, v.to_string()));
                    i += 4;
                    continue;
                }
                if i + 1 < tokens.len() && tokens[i + 1].0 == TokenKind::Ident {
                    let sym = sess.intern(&tokens[i + 1].1);
                    let v = if self.macros.contains_key(&sym) { "1" } else { "0" };
                    out.push((TokenKind::IntLiteral, v.to_string()));
                    i += 2;
                    continue;
                }
            }
            out.push(tokens[i].clone());
            i += 1;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_includes<'a>() -> impl FnMut(&str, bool, &Session) -> Result<(Symbol, Rc<str>), String> + 'a {
        |name: &str, _sys: bool, _sess: &Session| Err(format!("no such file: {name}"))
    }

    fn run(sess: &Session, src: &str) -> Vec<PpToken> {
        let filename = sess.intern("test.sdlsl");
        let mut pp = Preprocessor::new(sess, filename, Rc::from(src), PpOptions::default(), no_includes());
        let mut out = Vec::new();
        loop {
            let tok = pp.next_token(sess);
            if tok.kind == TokenKind::Eoi {
                break;
            }
            out.push(tok);
        }
        out
    }

    #[test]
    fn object_like_macro_is_substituted() {
        let sess = Session::new();
        let toks = run(&sess, "#define FOO 1 + 2\nint x = FOO;");
        let texts: Vec<_> = toks.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["int", "x", "=", "1", "+", "2", ";"]);
    }

    #[test]
    fn stringify_and_paste_compose() {
        // `x` in `STR` is stringized directly, so it is never macro-expanded
        // first — the classic double-indirection idiom forces the argument
        // through `XSTR` (a plain, non-stringizing parameter) so it gets
        // expanded before `STR` ever sees it.
        let sess = Session::new();
        let toks = run(
            &sess,
            "#define CONCAT(a, b) a##b\n#define STR(x) #x\n#define XSTR(x) STR(x)\nXSTR(CONCAT(hello, world))",
        );
        assert_eq!(toks.len(), 1);
        assert_eq!(toks[0].kind, TokenKind::StringLiteral);
        assert_eq!(toks[0].text, "\"helloworld\"");
    }

    #[test]
    fn stringize_without_indirection_stays_unexpanded() {
        let sess = Session::new();
        let toks = run(
            &sess,
            "#define CONCAT(a, b) a##b\n#define STR(x) #x\nSTR(CONCAT(hello, world))",
        );
        assert_eq!(toks.len(), 1);
        assert_eq!(toks[0].text, "\"CONCAT ( hello , world )\"");
    }

    #[test]
    fn function_like_macro_without_call_is_left_alone() {
        let sess = Session::new();
        let toks = run(&sess, "#define F(x) x + 1\nF;");
        let texts: Vec<_> = toks.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["F", ";"]);
    }

    #[test]
    fn conditional_nesting_picks_active_branch() {
        let sess = Session::new();
        let toks = run(
            &sess,
            "#define LEVEL 2\n#if LEVEL == 1\nA\n#elif LEVEL == 2\nB\n#else\nC\n#endif\n",
        );
        let texts: Vec<_> = toks.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["B"]);
    }

    #[test]
    fn undefined_in_ifdef_branch_is_skipped_without_evaluation() {
        let sess = Session::new();
        let toks = run(&sess, "#ifdef NOT_DEFINED\n#if 1 / 0\nDEAD\n#endif\n#endif\nALIVE\n");
        let texts: Vec<_> = toks.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["ALIVE"]);
        assert!(!sess.is_failed());
    }

    #[test]
    fn division_by_zero_in_if_warns_but_does_not_fail() {
        let sess = Session::new();
        let toks = run(&sess, "#if 1 / 0\nA\n#else\nB\n#endif\n");
        let texts: Vec<_> = toks.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["B"]);
        assert!(!sess.is_failed());
    }

    #[test]
    fn redefining_with_different_body_warns_and_keeps_the_original() {
        let sess = Session::new();
        let toks = run(&sess, "#define FOO 1\n#define FOO 2\nFOO");
        assert!(!sess.is_failed());
        assert_eq!(toks[0].text, "1");
        assert!(sess.handler.borrow().errors().iter().any(|e| !e.is_error && e.message.contains("redefined")));
    }

    #[test]
    fn redefining_with_identical_body_still_warns() {
        let sess = Session::new();
        let toks = run(&sess, "#define FOO 1\n#define FOO 1\nFOO");
        assert!(!sess.is_failed());
        assert_eq!(toks[0].text, "1");
        assert!(sess.handler.borrow().errors().iter().any(|e| !e.is_error && e.message.contains("redefined")));
    }

    #[test]
    fn dotdot_include_is_rejected_by_default() {
        let sess = Session::new();
        let _ = run(&sess, "#include \"../secret.sdlsl\"\n");
        assert!(sess.is_failed());
    }

    #[test]
    fn file_and_line_builtins_expand() {
        let sess = Session::new();
        let toks = run(&sess, "__LINE__\n__FILE__");
        assert_eq!(toks[0].text, "1");
        assert_eq!(toks[1].text, "\"test.sdlsl\"");
    }

    #[test]
    fn recursive_macro_does_not_expand_forever() {
        let sess = Session::new();
        let toks = run(&sess, "#define A A B\nA");
        let texts: Vec<_> = toks.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["A", "B"]);
    }

    fn run_text(sess: &Session, src: &str, options: PpOptions) -> String {
        let filename = sess.intern("test.sdlsl");
        let mut pp = Preprocessor::new(sess, filename, Rc::from(src), options, no_includes());
        pp.set_report_whitespace(true);
        let mut out = String::new();
        loop {
            let tok = pp.next_token(sess);
            if tok.kind == TokenKind::Eoi {
                break;
            }
            out.push_str(&tok.text);
        }
        out
    }

    #[test]
    fn report_whitespace_reproduces_directive_free_input_byte_for_byte() {
        let sess = Session::new();
        let src = "int   x = 1;\n\nfloat y = 2.0;\n";
        assert_eq!(run_text(&sess, src, PpOptions::default()), src);
    }

    #[test]
    fn report_whitespace_keeps_comments_by_default() {
        let sess = Session::new();
        let src = "int x /* a comment */ = 1;\n";
        assert_eq!(run_text(&sess, src, PpOptions::default()), src);
    }

    #[test]
    fn strip_comments_collapses_a_block_comment_to_one_space() {
        let sess = Session::new();
        let options = PpOptions { strip_comments: true, ..PpOptions::default() };
        let out = run_text(&sess, "int x/* a\nmultiline comment */= 1;\n", options);
        assert_eq!(out, "int x = 1;\n");
    }

    #[test]
    fn strip_comments_drops_a_line_comment_entirely() {
        let sess = Session::new();
        let options = PpOptions { strip_comments: true, ..PpOptions::default() };
        let out = run_text(&sess, "int x = 1; // trailing remark\nint y = 2;\n", options);
        assert_eq!(out, "int x = 1; \nint y = 2;\n");
    }
}
