//! Byte-oriented, longest-match tokenizer over a single source buffer.
//!
//! Mirrors the shape of a hand-rolled `rustc_lexer`-style cursor: `bump`,
//! `first`/`second` lookahead, `eat_while`. The preprocessor owns one of
//! these per active `IncludeState` and is the only thing that knows about
//! include stacking, macro expansion, or directives — this crate only
//! turns bytes into tokens.

use std::str::Chars;

/// End-of-input sentinel returned by lookahead once the cursor runs dry.
const EOF_CHAR: char = '\0';

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TokenKind {
    Eoi,
    /// One or more bytes that don't form any valid token.
    BadChars,
    Whitespace,
    Newline,
    LineComment,
    BlockComment,
    /// `/*` with no matching `*/` before EOF.
    IncompleteBlockComment,
    /// `"` with no matching closing `"` before EOF or newline.
    IncompleteStringLiteral,
    IntLiteral,
    FloatLiteral,
    StringLiteral,
    Ident,

    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semi,
    Dot,
    Question,
    Colon,
    Lt,
    Gt,
    Eq,
    Bang,
    Amp,
    Pipe,
    Caret,
    Tilde,
    Hash,
    At,

    PlusPlus,
    MinusMinus,
    Shl,
    Shr,
    Le,
    Ge,
    EqEq,
    Ne,
    AmpAmp,
    PipePipe,
    PlusEq,
    MinusEq,
    StarEq,
    SlashEq,
    PercentEq,
    ShlEq,
    ShrEq,
    AmpEq,
    PipeEq,
    CaretEq,
    HashHash,
}

impl TokenKind {
    /// Whitespace/newline/comments carry no syntactic meaning once the
    /// preprocessor has consumed them for directive recognition.
    pub fn is_trivia(self) -> bool {
        matches!(
            self,
            TokenKind::Whitespace
                | TokenKind::Newline
                | TokenKind::LineComment
                | TokenKind::BlockComment
        )
    }
}

/// `{kind, slice, line}`. `text.len()` is the token's byte length; it is
/// always derivable from the slice, so it is not duplicated as its own
/// field.
#[derive(Clone, Copy, Debug)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
    pub line: i32,
}

impl<'a> Token<'a> {
    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

struct Cursor<'a> {
    initial_len: usize,
    chars: Chars<'a>,
}

impl<'a> Cursor<'a> {
    fn new(input: &'a str) -> Self {
        Cursor { initial_len: input.len(), chars: input.chars() }
    }

    fn first(&self) -> char {
        self.chars.clone().next().unwrap_or(EOF_CHAR)
    }

    fn second(&self) -> char {
        let mut it = self.chars.clone();
        it.next();
        it.next().unwrap_or(EOF_CHAR)
    }

    fn is_eof(&self) -> bool {
        self.chars.as_str().is_empty()
    }

    fn bump(&mut self) -> Option<char> {
        self.chars.next()
    }

    fn pos_within_token(&self) -> usize {
        self.initial_len - self.chars.as_str().len()
    }

    fn eat_while(&mut self, mut pred: impl FnMut(char) -> bool) {
        while pred(self.first()) && !self.is_eof() {
            self.bump();
        }
    }
}

/// Tokenizes one buffer. Tracks the 1-based current line and supports a
/// single token of pushback.
pub struct Lexer<'a> {
    buf: &'a str,
    pos: usize,
    line: i32,
    report_whitespace: bool,
    pushed_back: Option<Token<'a>>,
}

impl<'a> Lexer<'a> {
    pub fn new(buf: &'a str, starting_line: i32) -> Self {
        Lexer { buf, pos: 0, line: starting_line, report_whitespace: false, pushed_back: None }
    }

    pub fn set_report_whitespace(&mut self, report: bool) {
        self.report_whitespace = report;
    }

    pub fn line(&self) -> i32 {
        self.line
    }

    pub fn bytes_left(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Overrides the reported current line, used by `#line`.
    pub fn set_line(&mut self, line: i32) {
        self.line = line;
    }

    pub fn pushback(&mut self, tok: Token<'a>) {
        debug_assert!(self.pushed_back.is_none(), "at most one token of pushback is supported");
        self.pushed_back = Some(tok);
    }

    pub fn next_token(&mut self) -> Token<'a> {
        if let Some(tok) = self.pushed_back.take() {
            return tok;
        }
        loop {
            let tok = self.lex_one();
            if tok.kind.is_trivia() && !self.report_whitespace && tok.kind != TokenKind::Newline {
                continue;
            }
            if tok.kind == TokenKind::Newline && !self.report_whitespace {
                // Newlines always terminate directives; the preprocessor
                // wants to see them even when not collecting whitespace.
                return tok;
            }
            return tok;
        }
    }

    fn lex_one(&mut self) -> Token<'a> {
        if self.pos >= self.buf.len() {
            return Token { kind: TokenKind::Eoi, text: "", line: self.line };
        }
        let rest = &self.buf[self.pos..];
        let mut cursor = Cursor::new(rest);
        let first_char = match cursor.bump() {
            Some(c) => c,
            None => return Token { kind: TokenKind::Eoi, text: "", line: self.line },
        };

        let kind = match first_char {
            '\n' => {
                let tok_line = self.line;
                self.advance(1);
                self.line += 1;
                return Token { kind: TokenKind::Newline, text: "\n", line: tok_line };
            }
            c if c == ' ' || c == '\t' || c == '\r' => {
                cursor.eat_while(|c| c == ' ' || c == '\t' || c == '\r');
                TokenKind::Whitespace
            }
            '/' if cursor.first() == '/' => {
                cursor.bump();
                cursor.eat_while(|c| c != '\n');
                TokenKind::LineComment
            }
            '/' if cursor.first() == '*' => {
                cursor.bump();
                return self.lex_block_comment(rest);
            }
            '"' => return self.lex_string(rest),
            c if is_ident_start(c) => {
                cursor.eat_while(is_ident_continue);
                TokenKind::Ident
            }
            '0'..='9' => return self.lex_number(rest),
            '.' if cursor.first().is_ascii_digit() => return self.lex_number(rest),

            '+' if cursor.first() == '+' => {
                cursor.bump();
                TokenKind::PlusPlus
            }
            '+' if cursor.first() == '=' => {
                cursor.bump();
                TokenKind::PlusEq
            }
            '+' => TokenKind::Plus,

            '-' if cursor.first() == '-' => {
                cursor.bump();
                TokenKind::MinusMinus
            }
            '-' if cursor.first() == '=' => {
                cursor.bump();
                TokenKind::MinusEq
            }
            '-' => TokenKind::Minus,

            '*' if cursor.first() == '=' => {
                cursor.bump();
                TokenKind::StarEq
            }
            '*' => TokenKind::Star,

            '/' if cursor.first() == '=' => {
                cursor.bump();
                TokenKind::SlashEq
            }
            '/' => TokenKind::Slash,

            '%' if cursor.first() == '=' => {
                cursor.bump();
                TokenKind::PercentEq
            }
            '%' => TokenKind::Percent,

            '<' if cursor.first() == '<' && cursor.second() == '=' => {
                cursor.bump();
                cursor.bump();
                TokenKind::ShlEq
            }
            '<' if cursor.first() == '<' => {
                cursor.bump();
                TokenKind::Shl
            }
            '<' if cursor.first() == '=' => {
                cursor.bump();
                TokenKind::Le
            }
            '<' => TokenKind::Lt,

            '>' if cursor.first() == '>' && cursor.second() == '=' => {
                cursor.bump();
                cursor.bump();
                TokenKind::ShrEq
            }
            '>' if cursor.first() == '>' => {
                cursor.bump();
                TokenKind::Shr
            }
            '>' if cursor.first() == '=' => {
                cursor.bump();
                TokenKind::Ge
            }
            '>' => TokenKind::Gt,

            '=' if cursor.first() == '=' => {
                cursor.bump();
                TokenKind::EqEq
            }
            '=' => TokenKind::Eq,

            '!' if cursor.first() == '=' => {
                cursor.bump();
                TokenKind::Ne
            }
            '!' => TokenKind::Bang,

            '&' if cursor.first() == '&' => {
                cursor.bump();
                TokenKind::AmpAmp
            }
            '&' if cursor.first() == '=' => {
                cursor.bump();
                TokenKind::AmpEq
            }
            '&' => TokenKind::Amp,

            '|' if cursor.first() == '|' => {
                cursor.bump();
                TokenKind::PipePipe
            }
            '|' if cursor.first() == '=' => {
                cursor.bump();
                TokenKind::PipeEq
            }
            '|' => TokenKind::Pipe,

            '^' if cursor.first() == '=' => {
                cursor.bump();
                TokenKind::CaretEq
            }
            '^' => TokenKind::Caret,

            '~' => TokenKind::Tilde,
            '@' => TokenKind::At,

            '#' if cursor.first() == '#' => {
                cursor.bump();
                TokenKind::HashHash
            }
            '#' => TokenKind::Hash,

            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            ',' => TokenKind::Comma,
            ';' => TokenKind::Semi,
            '.' => TokenKind::Dot,
            '?' => TokenKind::Question,
            ':' => TokenKind::Colon,

            _ => {
                cursor.eat_while(|c| !is_ident_start(c) && !c.is_ascii_whitespace() && !is_punct(c));
                TokenKind::BadChars
            }
        };

        let len = cursor.pos_within_token();
        self.advance(len);
        Token { kind, text: &rest[..len], line: self.line }
    }

    fn lex_block_comment(&mut self, rest: &'a str) -> Token<'a> {
        let line_at_start = self.line;
        let bytes = rest.as_bytes();
        let mut i = 2; // consumed "/*"
        let mut closed = false;
        while i < bytes.len() {
            if bytes[i] == b'*' && i + 1 < bytes.len() && bytes[i + 1] == b'/' {
                i += 2;
                closed = true;
                break;
            }
            if bytes[i] == b'\n' {
                self.line += 1;
            }
            i += 1;
        }
        self.advance(i);
        let kind = if closed { TokenKind::BlockComment } else { TokenKind::IncompleteBlockComment };
        Token { kind, text: &rest[..i], line: line_at_start }
    }

    fn lex_string(&mut self, rest: &'a str) -> Token<'a> {
        let bytes = rest.as_bytes();
        let mut i = 1; // consumed opening quote
        let mut closed = false;
        while i < bytes.len() {
            match bytes[i] {
                b'"' => {
                    i += 1;
                    closed = true;
                    break;
                }
                b'\n' => break,
                b'\\' if i + 1 < bytes.len() => i += 2,
                _ => i += 1,
            }
        }
        self.advance(i);
        let kind = if closed { TokenKind::StringLiteral } else { TokenKind::IncompleteStringLiteral };
        Token { kind, text: &rest[..i], line: self.line }
    }

    fn lex_number(&mut self, rest: &'a str) -> Token<'a> {
        let bytes = rest.as_bytes();
        let mut i = 0;
        let mut is_float = false;

        if bytes[0] == b'0' && (bytes.get(1) == Some(&b'x') || bytes.get(1) == Some(&b'X')) {
            i = 2;
            while i < bytes.len() && bytes[i].is_ascii_hexdigit() {
                i += 1;
            }
            self.advance(i);
            return Token { kind: TokenKind::IntLiteral, text: &rest[..i], line: self.line };
        }

        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i < bytes.len() && bytes[i] == b'.' {
            is_float = true;
            i += 1;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
        }
        if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
            let mut j = i + 1;
            if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
                j += 1;
            }
            if j < bytes.len() && bytes[j].is_ascii_digit() {
                is_float = true;
                i = j;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
            }
        }
        if i < bytes.len() && (bytes[i] == b'f' || bytes[i] == b'F') {
            is_float = true;
            i += 1;
        }

        self.advance(i);
        let kind = if is_float { TokenKind::FloatLiteral } else { TokenKind::IntLiteral };
        Token { kind, text: &rest[..i], line: self.line }
    }

    fn advance(&mut self, n: usize) {
        self.pos += n;
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn is_punct(c: char) -> bool {
    "+-*/%(){}[],;.?:<>=!&|^~#@\"".contains(c)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new(src, 1);
        lexer.set_report_whitespace(false);
        let mut out = vec![];
        loop {
            let tok = lexer.next_token();
            if tok.kind == TokenKind::Eoi {
                break;
            }
            out.push(tok.kind);
        }
        out
    }

    #[test]
    fn identifiers_and_keywords_are_just_idents() {
        assert_eq!(kinds("function float4 main"), vec![TokenKind::Ident; 3]);
    }

    #[test]
    fn multi_char_operators_win_longest_match() {
        assert_eq!(
            kinds("a <<= b"),
            vec![TokenKind::Ident, TokenKind::ShlEq, TokenKind::Ident]
        );
        assert_eq!(kinds("a<b"), vec![TokenKind::Ident, TokenKind::Lt, TokenKind::Ident]);
    }

    #[test]
    fn integer_and_float_literals() {
        assert_eq!(kinds("1 1.0 0x1F 1e3 1.0f"), vec![
            TokenKind::IntLiteral,
            TokenKind::FloatLiteral,
            TokenKind::IntLiteral,
            TokenKind::FloatLiteral,
            TokenKind::FloatLiteral,
        ]);
    }

    #[test]
    fn unterminated_comment_and_string() {
        let mut lexer = Lexer::new("/* oops", 1);
        let tok = lexer.next_token();
        assert_eq!(tok.kind, TokenKind::IncompleteBlockComment);

        let mut lexer = Lexer::new("\"oops", 1);
        let tok = lexer.next_token();
        assert_eq!(tok.kind, TokenKind::IncompleteStringLiteral);
    }

    #[test]
    fn pushback_replays_one_token() {
        let mut lexer = Lexer::new("a b", 1);
        let a = lexer.next_token();
        let b = lexer.next_token();
        lexer.pushback(b);
        let b_again = lexer.next_token();
        assert_eq!(b_again.text, b.text);
        assert_eq!(a.text, "a");
    }

    #[test]
    fn newlines_increment_line_and_are_reported() {
        let mut lexer = Lexer::new("a\nb", 1);
        let a = lexer.next_token();
        assert_eq!(a.line, 1);
        let nl = lexer.next_token();
        assert_eq!(nl.kind, TokenKind::Newline);
        let b = lexer.next_token();
        assert_eq!(b.line, 2);
    }
}
