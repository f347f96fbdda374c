//! Recursive-descent parser, consuming the preprocessor's token stream.
//!
//! A `Parser` holds a small lookahead buffer over [`sdlsl_pp::Preprocessor`]
//! (two tokens of lookahead suffice: distinguishing `T name` from
//! `name : T` declarations needs to see past the first identifier). Grammar
//! productions are the `parse_*` methods below, mirroring the shape of a
//! hand-written `rustc_parse`-style parser rather than a generated table.
//!
//! This parser never rejects a program for type reasons — only for
//! syntax — and on a mismatched token it reports the error and still
//! consumes forward, so a single syntax mistake does not hang the parse.

use sdlsl_ast::*;
use sdlsl_errors::Session;
use sdlsl_lexer::TokenKind;
use sdlsl_pp::{Preprocessor, PpToken};
use sdlsl_span::{SourceLoc, Symbol};
use std::collections::VecDeque;

pub struct Parser<'s> {
    pp: Preprocessor<'s>,
    sess: &'s Session,
    lookahead: VecDeque<PpToken>,
}

impl<'s> Parser<'s> {
    pub fn new(pp: Preprocessor<'s>, sess: &'s Session) -> Self {
        Parser { pp, sess, lookahead: VecDeque::new() }
    }

    /// Hands back the preprocessor once parsing is done, so the driver can
    /// still pull any collected `#pragma` text out of it.
    pub fn into_preprocessor(self) -> Preprocessor<'s> {
        self.pp
    }

    pub fn parse_shader(&mut self) -> Shader {
        let _span = tracing::debug_span!("parse").entered();
        let mut shader = Shader::new();
        loop {
            if self.at(TokenKind::Eoi) {
                break;
            }
            if self.at_ident("function") {
                shader.units.push(TranslationUnit::Function(self.parse_function()));
            } else if self.at_ident("struct") {
                shader.units.push(TranslationUnit::Struct(self.parse_struct()));
            } else {
                let tok = self.bump();
                self.sess.fail_at(tok.loc, format!("expected `function` or `struct`, found `{}`", tok.text));
            }
        }
        shader
    }

    // --- lookahead plumbing -------------------------------------------------

    fn fill(&mut self, n: usize) {
        while self.lookahead.len() <= n {
            let tok = self.pp.next_token(self.sess);
            self.lookahead.push_back(tok);
        }
    }

    fn peek(&mut self) -> &PpToken {
        self.fill(0);
        &self.lookahead[0]
    }

    fn peek2(&mut self) -> &PpToken {
        self.fill(1);
        &self.lookahead[1]
    }

    fn bump(&mut self) -> PpToken {
        self.fill(0);
        self.lookahead.pop_front().unwrap()
    }

    fn at(&mut self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn at_ident(&mut self, text: &str) -> bool {
        let tok = self.peek();
        tok.kind == TokenKind::Ident && tok.text == text
    }

    fn eat(&mut self, kind: TokenKind) -> Option<PpToken> {
        if self.at(kind) {
            Some(self.bump())
        } else {
            None
        }
    }

    /// Always consumes one token, whether or not it matched — this is what
    /// guarantees every parse loop makes forward progress even on a syntax
    /// error.
    fn expect(&mut self, kind: TokenKind, what: &str) -> PpToken {
        let tok = self.bump();
        if tok.kind != kind {
            self.sess.fail_at(tok.loc, format!("expected `{what}`, found `{}`", tok.text));
        }
        tok
    }

    fn expect_ident(&mut self, what: &str) -> PpToken {
        let tok = self.bump();
        if tok.kind != TokenKind::Ident {
            self.sess.fail_at(tok.loc, format!("expected {what}, found `{}`", tok.text));
        }
        tok
    }

    fn expect_keyword(&mut self, keyword: &str) {
        let tok = self.bump();
        if tok.kind != TokenKind::Ident || tok.text != keyword {
            self.sess.fail_at(tok.loc, format!("expected `{keyword}`, found `{}`", tok.text));
        }
    }

    // --- declarations --------------------------------------------------

    /// Parses either `T name` (c-style, `c_style = true`) or `name : T`.
    fn parse_typed_name(&mut self) -> (bool, Symbol, Symbol, SourceLoc) {
        if self.peek().kind == TokenKind::Ident && self.peek2().kind == TokenKind::Colon {
            let name_tok = self.bump();
            self.bump(); // ':'
            let type_tok = self.expect_ident("a type name");
            (false, self.sess.intern(&type_tok.text), self.sess.intern(&name_tok.text), name_tok.loc)
        } else {
            let type_tok = self.expect_ident("a type name");
            let name_tok = self.expect_ident("a declaration name");
            (true, self.sess.intern(&type_tok.text), self.sess.intern(&name_tok.text), type_tok.loc)
        }
    }

    fn try_parse_attribute(&mut self) -> Option<Attribute> {
        if !self.at(TokenKind::At) {
            return None;
        }
        let at_tok = self.bump();
        let name_tok = self.expect_ident("an attribute name");
        let name = self.sess.intern(&name_tok.text);
        let arg = if self.eat(TokenKind::LParen).is_some() {
            let value = if self.at(TokenKind::IntLiteral) {
                let tok = self.bump();
                Some(parse_int_literal(&tok.text))
            } else {
                None
            };
            self.expect(TokenKind::RParen, ")");
            value
        } else {
            None
        };
        Some(Attribute { name, arg, loc: at_tok.loc })
    }

    fn parse_array_bounds(&mut self) -> Vec<Expr> {
        let mut bounds = Vec::new();
        while self.at(TokenKind::LBracket) {
            self.bump();
            bounds.push(self.parse_expr());
            self.expect(TokenKind::RBracket, "]");
        }
        bounds
    }

    fn parse_struct(&mut self) -> StructDecl {
        let kw = self.bump(); // 'struct'
        let name_tok = self.expect_ident("a struct name");
        let name = self.sess.intern(&name_tok.text);
        self.expect(TokenKind::LBrace, "{");
        let mut members = Vec::new();
        while !self.at(TokenKind::RBrace) && !self.at(TokenKind::Eoi) {
            members.push(self.parse_struct_member());
            self.expect(TokenKind::Semi, ";");
        }
        self.expect(TokenKind::RBrace, "}");
        self.expect(TokenKind::Semi, ";");
        StructDecl { name, members, datatype: None, loc: kw.loc }
    }

    fn parse_struct_member(&mut self) -> StructMember {
        let (_, type_name, name, loc) = self.parse_typed_name();
        let array_bounds = self.parse_array_bounds();
        let attribute = self.try_parse_attribute();
        StructMember { type_name, name, array_bounds, attribute, datatype: None, loc }
    }

    fn parse_param(&mut self) -> VarDecl {
        let (c_style, type_name, name, loc) = self.parse_typed_name();
        let array_bounds = self.parse_array_bounds();
        let attribute = self.try_parse_attribute();
        VarDecl { c_style, type_name, name, array_bounds, attribute, init: None, datatype: None, loc }
    }

    fn parse_function(&mut self) -> FunctionDecl {
        let kw = self.bump(); // 'function'
        let (c_style, ret_type, func_name, name_loc) = self.parse_typed_name();
        self.expect(TokenKind::LParen, "(");
        let mut params = Vec::new();
        if self.at_ident("void") && self.peek2().kind == TokenKind::RParen {
            self.bump();
        } else if !self.at(TokenKind::RParen) {
            loop {
                params.push(self.parse_param());
                if self.eat(TokenKind::Comma).is_some() {
                    continue;
                }
                break;
            }
        }
        self.expect(TokenKind::RParen, ")");
        let attribute = self.try_parse_attribute();
        let return_type = VarDecl {
            c_style,
            type_name: ret_type,
            name: func_name,
            array_bounds: Vec::new(),
            attribute,
            init: None,
            datatype: None,
            loc: name_loc,
        };
        let body = self.parse_block_stmts();
        FunctionDecl { return_type, name: func_name, params, body, fntype: FnType::Unknown, loc: kw.loc }
    }

    // --- statements ------------------------------------------------------

    fn parse_block_stmts(&mut self) -> Vec<Stmt> {
        self.expect(TokenKind::LBrace, "{");
        let mut stmts = Vec::new();
        while !self.at(TokenKind::RBrace) && !self.at(TokenKind::Eoi) {
            stmts.push(self.parse_stmt());
        }
        self.expect(TokenKind::RBrace, "}");
        stmts
    }

    fn parse_stmt(&mut self) -> Stmt {
        if self.at(TokenKind::Semi) {
            let tok = self.bump();
            return Stmt::new(StmtKind::Empty, tok.loc);
        }
        if self.at(TokenKind::LBrace) {
            let loc = self.peek().loc;
            return Stmt::new(StmtKind::Block(self.parse_block_stmts()), loc);
        }
        if self.at_ident("break") {
            let tok = self.bump();
            self.expect(TokenKind::Semi, ";");
            return Stmt::new(StmtKind::Break { target: None }, tok.loc);
        }
        if self.at_ident("continue") {
            let tok = self.bump();
            self.expect(TokenKind::Semi, ";");
            return Stmt::new(StmtKind::Continue { target: None }, tok.loc);
        }
        if self.at_ident("discard") {
            let tok = self.bump();
            self.expect(TokenKind::Semi, ";");
            return Stmt::new(StmtKind::Discard, tok.loc);
        }
        if self.at_ident("return") {
            let tok = self.bump();
            let value = if !self.at(TokenKind::Semi) { Some(self.parse_expr()) } else { None };
            self.expect(TokenKind::Semi, ";");
            return Stmt::new(StmtKind::Return { value }, tok.loc);
        }
        if self.at_ident("var") {
            return self.parse_var_decl_stmt();
        }
        if self.at_ident("if") {
            return self.parse_if_stmt();
        }
        if self.at_ident("while") {
            return self.parse_while_stmt();
        }
        if self.at_ident("do") {
            return self.parse_do_while_stmt();
        }
        if self.at_ident("for") {
            return self.parse_for_stmt();
        }
        self.parse_expr_stmt()
    }

    fn parse_var_decl_stmt(&mut self) -> Stmt {
        let kw = self.bump(); // 'var'
        let (c_style, type_name, name, _) = self.parse_typed_name();
        let array_bounds = self.parse_array_bounds();
        let attribute = self.try_parse_attribute();
        let init = if self.eat(TokenKind::Eq).is_some() { Some(self.parse_expr()) } else { None };
        self.expect(TokenKind::Semi, ";");
        let decl = VarDecl { c_style, type_name, name, array_bounds, attribute, init, datatype: None, loc: kw.loc };
        Stmt::new(StmtKind::VarDecl(decl), kw.loc)
    }

    fn parse_if_stmt(&mut self) -> Stmt {
        let kw = self.bump();
        self.expect(TokenKind::LParen, "(");
        let cond = self.parse_expr();
        self.expect(TokenKind::RParen, ")");
        let then_branch = Box::new(self.parse_stmt());
        let else_branch =
            if self.at_ident("else") {
                self.bump();
                Some(Box::new(self.parse_stmt()))
            } else {
                None
            };
        Stmt::new(StmtKind::If { cond, then_branch, else_branch }, kw.loc)
    }

    fn parse_while_stmt(&mut self) -> Stmt {
        let kw = self.bump();
        self.expect(TokenKind::LParen, "(");
        let cond = self.parse_expr();
        self.expect(TokenKind::RParen, ")");
        let body = Box::new(self.parse_stmt());
        Stmt::new(StmtKind::While { cond, body, loop_id: None }, kw.loc)
    }

    fn parse_do_while_stmt(&mut self) -> Stmt {
        let kw = self.bump();
        let body = Box::new(self.parse_stmt());
        self.expect_keyword("while");
        self.expect(TokenKind::LParen, "(");
        let cond = self.parse_expr();
        self.expect(TokenKind::RParen, ")");
        self.expect(TokenKind::Semi, ";");
        Stmt::new(StmtKind::DoWhile { body, cond, loop_id: None }, kw.loc)
    }

    fn parse_for_stmt(&mut self) -> Stmt {
        let kw = self.bump();
        self.expect(TokenKind::LParen, "(");
        let init = if self.at(TokenKind::Semi) {
            self.bump();
            None
        } else {
            Some(Box::new(self.parse_for_init_stmt()))
        };
        let cond = if !self.at(TokenKind::Semi) { Some(self.parse_expr()) } else { None };
        self.expect(TokenKind::Semi, ";");
        let step = if !self.at(TokenKind::RParen) { Some(Box::new(self.parse_for_step_stmt())) } else { None };
        self.expect(TokenKind::RParen, ")");
        let body = Box::new(self.parse_stmt());
        Stmt::new(StmtKind::For { details: ForDetails { init, cond, step }, body, loop_id: None }, kw.loc)
    }

    fn parse_for_init_stmt(&mut self) -> Stmt {
        if self.at_ident("var") {
            self.parse_var_decl_stmt()
        } else {
            self.parse_expr_stmt()
        }
    }

    fn parse_expr_stmt(&mut self) -> Stmt {
        let loc = self.peek().loc;
        let kind = self.parse_assignment_or_expr_kind();
        self.expect(TokenKind::Semi, ";");
        Stmt::new(kind, loc)
    }

    fn parse_for_step_stmt(&mut self) -> Stmt {
        let loc = self.peek().loc;
        let kind = self.parse_assignment_or_expr_kind();
        Stmt::new(kind, loc)
    }

    /// Bare expression, assignment (with `a = b = c = expr;` chaining),
    /// compound assignment, or post/pre increment-decrement — these all
    /// start the same way (an expression), so they share one production.
    fn parse_assignment_or_expr_kind(&mut self) -> StmtKind {
        if self.at(TokenKind::PlusPlus) {
            self.bump();
            let target = self.parse_expr();
            return StmtKind::IncDec { op: IncDecOp::PreInc, target };
        }
        if self.at(TokenKind::MinusMinus) {
            self.bump();
            let target = self.parse_expr();
            return StmtKind::IncDec { op: IncDecOp::PreDec, target };
        }

        let first = self.parse_expr();

        if self.at(TokenKind::Eq) {
            self.bump();
            let mut targets = vec![first];
            let mut value = self.parse_expr();
            while self.at(TokenKind::Eq) {
                self.bump();
                targets.push(value);
                value = self.parse_expr();
            }
            return StmtKind::Assign { targets, value };
        }
        if let Some(op) = compound_assign_op(self.peek().kind) {
            self.bump();
            let value = self.parse_expr();
            return StmtKind::CompoundAssign { op, target: first, value };
        }
        if self.at(TokenKind::PlusPlus) {
            self.bump();
            return StmtKind::IncDec { op: IncDecOp::PostInc, target: first };
        }
        if self.at(TokenKind::MinusMinus) {
            self.bump();
            return StmtKind::IncDec { op: IncDecOp::PostDec, target: first };
        }
        StmtKind::Call(first)
    }

    // --- expressions -----------------------------------------------------

    pub fn parse_expr(&mut self) -> Expr {
        self.parse_ternary()
    }

    fn parse_ternary(&mut self) -> Expr {
        let cond = self.parse_logical_or();
        if self.at(TokenKind::Question) {
            let loc = self.bump().loc;
            let then_expr = self.parse_expr();
            self.expect(TokenKind::Colon, ":");
            let else_expr = self.parse_ternary();
            Expr::new(
                ExprKind::Ternary { cond: Box::new(cond), then_expr: Box::new(then_expr), else_expr: Box::new(else_expr) },
                loc,
            )
        } else {
            cond
        }
    }

    fn parse_logical_or(&mut self) -> Expr {
        let mut lhs = self.parse_logical_and();
        while self.at(TokenKind::PipePipe) {
            let loc = self.bump().loc;
            let rhs = self.parse_logical_and();
            lhs = Expr::new(ExprKind::Binary { op: BinaryOp::Or, lhs: Box::new(lhs), rhs: Box::new(rhs) }, loc);
        }
        lhs
    }

    fn parse_logical_and(&mut self) -> Expr {
        let mut lhs = self.parse_bit_or();
        while self.at(TokenKind::AmpAmp) {
            let loc = self.bump().loc;
            let rhs = self.parse_bit_or();
            lhs = Expr::new(ExprKind::Binary { op: BinaryOp::And, lhs: Box::new(lhs), rhs: Box::new(rhs) }, loc);
        }
        lhs
    }

    fn parse_bit_or(&mut self) -> Expr {
        let mut lhs = self.parse_bit_xor();
        while self.at(TokenKind::Pipe) {
            let loc = self.bump().loc;
            let rhs = self.parse_bit_xor();
            lhs = Expr::new(ExprKind::Binary { op: BinaryOp::BitOr, lhs: Box::new(lhs), rhs: Box::new(rhs) }, loc);
        }
        lhs
    }

    fn parse_bit_xor(&mut self) -> Expr {
        let mut lhs = self.parse_bit_and();
        while self.at(TokenKind::Caret) {
            let loc = self.bump().loc;
            let rhs = self.parse_bit_and();
            lhs = Expr::new(ExprKind::Binary { op: BinaryOp::BitXor, lhs: Box::new(lhs), rhs: Box::new(rhs) }, loc);
        }
        lhs
    }

    fn parse_bit_and(&mut self) -> Expr {
        let mut lhs = self.parse_equality();
        while self.at(TokenKind::Amp) {
            let loc = self.bump().loc;
            let rhs = self.parse_equality();
            lhs = Expr::new(ExprKind::Binary { op: BinaryOp::BitAnd, lhs: Box::new(lhs), rhs: Box::new(rhs) }, loc);
        }
        lhs
    }

    fn parse_equality(&mut self) -> Expr {
        let mut lhs = self.parse_relational();
        loop {
            let op = match self.peek().kind {
                TokenKind::EqEq => BinaryOp::EqEq,
                TokenKind::Ne => BinaryOp::Ne,
                _ => break,
            };
            let loc = self.bump().loc;
            let rhs = self.parse_relational();
            lhs = Expr::new(ExprKind::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }, loc);
        }
        lhs
    }

    fn parse_relational(&mut self) -> Expr {
        let mut lhs = self.parse_shift();
        loop {
            let op = match self.peek().kind {
                TokenKind::Lt => BinaryOp::Lt,
                TokenKind::Gt => BinaryOp::Gt,
                TokenKind::Le => BinaryOp::Le,
                TokenKind::Ge => BinaryOp::Ge,
                _ => break,
            };
            let loc = self.bump().loc;
            let rhs = self.parse_shift();
            lhs = Expr::new(ExprKind::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }, loc);
        }
        lhs
    }

    fn parse_shift(&mut self) -> Expr {
        let mut lhs = self.parse_additive();
        loop {
            let op = match self.peek().kind {
                TokenKind::Shl => BinaryOp::Shl,
                TokenKind::Shr => BinaryOp::Shr,
                _ => break,
            };
            let loc = self.bump().loc;
            let rhs = self.parse_additive();
            lhs = Expr::new(ExprKind::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }, loc);
        }
        lhs
    }

    fn parse_additive(&mut self) -> Expr {
        let mut lhs = self.parse_multiplicative();
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            let loc = self.bump().loc;
            let rhs = self.parse_multiplicative();
            lhs = Expr::new(ExprKind::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }, loc);
        }
        lhs
    }

    fn parse_multiplicative(&mut self) -> Expr {
        let mut lhs = self.parse_unary();
        loop {
            let op = match self.peek().kind {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Mod,
                _ => break,
            };
            let loc = self.bump().loc;
            let rhs = self.parse_unary();
            lhs = Expr::new(ExprKind::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }, loc);
        }
        lhs
    }

    fn parse_unary(&mut self) -> Expr {
        let op = match self.peek().kind {
            TokenKind::Plus => Some(UnaryOp::Plus),
            TokenKind::Minus => Some(UnaryOp::Neg),
            TokenKind::Tilde => Some(UnaryOp::BitNot),
            TokenKind::Bang => Some(UnaryOp::Not),
            _ => None,
        };
        match op {
            Some(op) => {
                let loc = self.bump().loc;
                let operand = Box::new(self.parse_unary());
                Expr::new(ExprKind::Unary { op, operand }, loc)
            }
            None => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Expr {
        let mut expr = self.parse_primary();
        loop {
            if self.at(TokenKind::LBracket) {
                let loc = self.bump().loc;
                let index = self.parse_expr();
                self.expect(TokenKind::RBracket, "]");
                expr = Expr::new(ExprKind::Index { base: Box::new(expr), index: Box::new(index) }, loc);
            } else if self.at(TokenKind::Dot) {
                let loc = self.bump().loc;
                let field_tok = self.expect_ident("a field or swizzle name");
                let field = self.sess.intern(&field_tok.text);
                expr = Expr::new(ExprKind::Field { base: Box::new(expr), field, resolved: None }, loc);
            } else {
                break;
            }
        }
        expr
    }

    fn parse_primary(&mut self) -> Expr {
        let tok = self.peek().clone();
        match tok.kind {
            TokenKind::IntLiteral => {
                self.bump();
                Expr::new(ExprKind::IntLiteral(parse_int_literal(&tok.text)), tok.loc)
            }
            TokenKind::FloatLiteral => {
                self.bump();
                let trimmed = tok.text.trim_end_matches(['f', 'F']);
                Expr::new(ExprKind::FloatLiteral(trimmed.parse().unwrap_or(0.0)), tok.loc)
            }
            TokenKind::Ident if tok.text == "true" => {
                self.bump();
                Expr::new(ExprKind::BoolLiteral(true), tok.loc)
            }
            TokenKind::Ident if tok.text == "false" => {
                self.bump();
                Expr::new(ExprKind::BoolLiteral(false), tok.loc)
            }
            TokenKind::Ident => {
                self.bump();
                if self.at(TokenKind::LParen) {
                    self.bump();
                    let mut args = Vec::new();
                    if !self.at(TokenKind::RParen) {
                        loop {
                            args.push(self.parse_expr());
                            if self.eat(TokenKind::Comma).is_some() {
                                continue;
                            }
                            break;
                        }
                    }
                    self.expect(TokenKind::RParen, ")");
                    Expr::new(ExprKind::Call { callee: self.sess.intern(&tok.text), args, resolved: None }, tok.loc)
                } else {
                    Expr::new(ExprKind::Ident(self.sess.intern(&tok.text)), tok.loc)
                }
            }
            TokenKind::LParen => {
                self.bump();
                let inner = self.parse_expr();
                self.expect(TokenKind::RParen, ")");
                Expr::new(ExprKind::Paren(Box::new(inner)), tok.loc)
            }
            _ => {
                self.bump();
                self.sess.fail_at(tok.loc, format!("expected expression, found `{}`", tok.text));
                Expr::new(ExprKind::IntLiteral(0), tok.loc)
            }
        }
    }
}

fn compound_assign_op(kind: TokenKind) -> Option<CompoundAssignOp> {
    Some(match kind {
        TokenKind::PlusEq => CompoundAssignOp::Add,
        TokenKind::MinusEq => CompoundAssignOp::Sub,
        TokenKind::StarEq => CompoundAssignOp::Mul,
        TokenKind::SlashEq => CompoundAssignOp::Div,
        TokenKind::PercentEq => CompoundAssignOp::Mod,
        TokenKind::ShlEq => CompoundAssignOp::Shl,
        TokenKind::ShrEq => CompoundAssignOp::Shr,
        TokenKind::AmpEq => CompoundAssignOp::And,
        TokenKind::PipeEq => CompoundAssignOp::Or,
        TokenKind::CaretEq => CompoundAssignOp::Xor,
        _ => return None,
    })
}

fn parse_int_literal(text: &str) -> i64 {
    let text = text.trim_end_matches(['u', 'U', 'l', 'L']);
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        return i64::from_str_radix(hex, 16).unwrap_or(0);
    }
    if text.len() > 1 && text.starts_with('0') && text.bytes().all(|b| b.is_ascii_digit()) {
        return i64::from_str_radix(text, 8).unwrap_or(0);
    }
    text.parse::<i64>().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdlsl_pp::PpOptions;
    use std::rc::Rc;

    fn parse(src: &str) -> (Shader, Session) {
        let sess = Session::new();
        let filename = sess.intern("test.sdlsl");
        let pp = Preprocessor::new(
            &sess,
            filename,
            Rc::from(src),
            PpOptions::default(),
            |name: &str, _sys: bool, _sess: &Session| Err(format!("no such file: {name}")),
        );
        let mut parser = Parser::new(pp, &sess);
        let shader = parser.parse_shader();
        drop(parser);
        (shader, sess)
    }

    #[test]
    fn parses_function_with_c_style_and_colon_declarations() {
        let (shader, sess) = parse(
            "function float4 vertex_main(pos : float3) @vertex { return pos; }",
        );
        assert_eq!(shader.units.len(), 1);
        let TranslationUnit::Function(f) = &shader.units[0] else { panic!("expected function") };
        assert!(f.return_type.c_style);
        assert_eq!(f.params.len(), 1);
        assert!(!f.params[0].c_style);
        assert_eq!(f.return_type.attribute.as_ref().unwrap().name, sess.intern("vertex"));
        assert!(!sess.is_failed());
    }

    #[test]
    fn parses_struct_with_array_member() {
        let (shader, sess) = parse("struct Light { float3 color; float intensities[4]; };");
        let TranslationUnit::Struct(s) = &shader.units[0] else { panic!("expected struct") };
        assert_eq!(s.members.len(), 2);
        assert_eq!(s.members[1].array_bounds.len(), 1);
        assert!(!sess.is_failed());
    }

    #[test]
    fn assignment_chain_and_compound_assign() {
        let (shader, sess) = parse("function void f() { var int a = 0; var int b = 0; a = b = 3; a += 1; }");
        let TranslationUnit::Function(f) = &shader.units[0] else { panic!() };
        match &f.body[2].kind {
            StmtKind::Assign { targets, .. } => assert_eq!(targets.len(), 2),
            other => panic!("expected assign, got {other:?}"),
        }
        match &f.body[3].kind {
            StmtKind::CompoundAssign { op, .. } => assert_eq!(*op, CompoundAssignOp::Add),
            other => panic!("expected compound assign, got {other:?}"),
        }
        assert!(!sess.is_failed());
    }

    #[test]
    fn ternary_and_precedence() {
        let (shader, sess) = parse("function void f() { var bool c = 1 + 2 * 3 == 7 ? true : false; }");
        let TranslationUnit::Function(f) = &shader.units[0] else { panic!() };
        let StmtKind::VarDecl(decl) = &f.body[0].kind else { panic!() };
        assert!(matches!(decl.init.as_ref().unwrap().kind, ExprKind::Ternary { .. }));
        assert!(!sess.is_failed());
    }

    #[test]
    fn swizzle_field_access_parses_as_field_node() {
        let (shader, sess) = parse("function void f() { var float4 v = v2; var float3 u = v.xyz; }");
        let TranslationUnit::Function(f) = &shader.units[0] else { panic!() };
        let StmtKind::VarDecl(decl) = &f.body[1].kind else { panic!() };
        match &decl.init.as_ref().unwrap().kind {
            ExprKind::Field { field, .. } => assert_eq!(*field, sess.intern("xyz")),
            other => panic!("expected field, got {other:?}"),
        }
    }

    #[test]
    fn for_loop_with_all_clauses() {
        let (shader, sess) = parse("function void f() { for (var int i = 0; i < 10; i++) { } }");
        let TranslationUnit::Function(f) = &shader.units[0] else { panic!() };
        assert!(matches!(f.body[0].kind, StmtKind::For { .. }));
        assert!(!sess.is_failed());
    }

    #[test]
    fn break_outside_loop_still_parses() {
        // The parser never rejects for type/control-flow reasons — that is
        // the semantic analyzer's job.
        let (shader, sess) = parse("function void f() { break; }");
        let TranslationUnit::Function(f) = &shader.units[0] else { panic!() };
        assert!(matches!(f.body[0].kind, StmtKind::Break { .. }));
        assert!(!sess.is_failed());
    }

    #[test]
    fn function_call_statement_and_expression() {
        let (shader, sess) = parse("function void f() { g(1, 2); var int x = g(3); }");
        let TranslationUnit::Function(f) = &shader.units[0] else { panic!() };
        assert!(matches!(f.body[0].kind, StmtKind::Call(_)));
        assert!(!sess.is_failed());
    }
}
