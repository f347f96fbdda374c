//! `#if`/`#elif` constant-expression evaluation: shunting-yard into RPN,
//! then a small stack-machine interpreter over `i64`.
//!
//! This is a separate evaluator from the one `sdlsl_sema` uses for array
//! bounds: that one walks already-parsed `Expr` trees and rejects anything
//! but literals; this one works over a flat token stream lexed straight
//! out of the condition line, treats unresolved identifiers as `0`, and
//! never fails loudly — a malformed expression just evaluates the whole
//! `#if` to false.

use sdlsl_lexer::TokenKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Shl,
    Shr,
    Lt,
    Gt,
    Le,
    Ge,
    EqEq,
    Ne,
    BitAnd,
    BitOr,
    BitXor,
    And,
    Or,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnOp {
    Plus,
    Minus,
    Not,
    BitNot,
}

#[derive(Clone, Copy, Debug)]
enum Shunt {
    Num(i64),
    Bin(BinOp),
    Un(UnOp),
    LParen,
}

#[derive(Clone, Copy, Debug)]
enum Rpn {
    Num(i64),
    Bin(BinOp),
    Un(UnOp),
}

fn binop_precedence(op: BinOp) -> u8 {
    use BinOp::*;
    match op {
        Or => 1,
        And => 2,
        BitOr => 3,
        BitXor => 4,
        BitAnd => 5,
        EqEq | Ne => 6,
        Lt | Gt | Le | Ge => 7,
        Shl | Shr => 8,
        Add | Sub => 9,
        Mul | Div | Mod => 10,
    }
}

const UNARY_PRECEDENCE: u8 = 11;

fn punct_to_binop(kind: TokenKind) -> Option<BinOp> {
    use TokenKind::*;
    Some(match kind {
        Plus => BinOp::Add,
        Minus => BinOp::Sub,
        Star => BinOp::Mul,
        Slash => BinOp::Div,
        Percent => BinOp::Mod,
        Shl => BinOp::Shl,
        Shr => BinOp::Shr,
        Lt => BinOp::Lt,
        Gt => BinOp::Gt,
        Le => BinOp::Le,
        Ge => BinOp::Ge,
        EqEq => BinOp::EqEq,
        Ne => BinOp::Ne,
        Amp => BinOp::BitAnd,
        Pipe => BinOp::BitOr,
        Caret => BinOp::BitXor,
        AmpAmp => BinOp::And,
        PipePipe => BinOp::Or,
        _ => return None,
    })
}

fn parse_int_literal(text: &str) -> Option<i64> {
    let text = text.trim_end_matches(['u', 'U', 'l', 'L']);
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        return i64::from_str_radix(hex, 16).ok();
    }
    if text.len() > 1 && text.starts_with('0') && text.bytes().all(|b| b.is_ascii_digit()) {
        return i64::from_str_radix(text, 8).ok();
    }
    text.parse::<i64>().ok()
}

/// Converts a flat, already macro-expanded token stream into RPN, then
/// evaluates it. Returns `None` on any parse failure (unmatched
/// parens, a non-constant leftover, trailing tokens); the caller takes
/// that as "condition is false."
pub fn eval(tokens: &[(TokenKind, String)], mut on_div_by_zero: impl FnMut()) -> Option<i64> {
    let rpn = to_rpn(tokens)?;
    interpret(&rpn, &mut on_div_by_zero)
}

fn to_rpn(tokens: &[(TokenKind, String)]) -> Option<Vec<Rpn>> {
    let mut output: Vec<Rpn> = Vec::new();
    let mut ops: Vec<Shunt> = Vec::new();
    let mut expect_operand = true;

    let pop_while =
        |ops: &mut Vec<Shunt>, output: &mut Vec<Rpn>, keep_going: &dyn Fn(&Shunt) -> bool| {
            while let Some(top) = ops.last() {
                if !matches!(top, Shunt::LParen) && keep_going(top) {
                    match ops.pop().unwrap() {
                        Shunt::Bin(b) => output.push(Rpn::Bin(b)),
                        Shunt::Un(u) => output.push(Rpn::Un(u)),
                        Shunt::LParen => unreachable!(),
                        Shunt::Num(_) => unreachable!(),
                    }
                } else {
                    break;
                }
            }
        };

    for (kind, text) in tokens {
        match kind {
            TokenKind::IntLiteral => {
                let v = parse_int_literal(text)?;
                output.push(Rpn::Num(v));
                expect_operand = false;
            }
            TokenKind::Ident => {
                // Unknown identifiers (anything left after macro expansion
                // and `defined` resolution) evaluate to 0.
                output.push(Rpn::Num(0));
                expect_operand = false;
            }
            TokenKind::LParen => {
                ops.push(Shunt::LParen);
                expect_operand = true;
            }
            TokenKind::RParen => {
                pop_while(&mut ops, &mut output, &|_| true);
                if !matches!(ops.pop(), Some(Shunt::LParen)) {
                    return None;
                }
                expect_operand = false;
            }
            TokenKind::Bang if expect_operand => {
                ops.push(Shunt::Un(UnOp::Not));
            }
            TokenKind::Tilde if expect_operand => {
                ops.push(Shunt::Un(UnOp::BitNot));
            }
            TokenKind::Plus if expect_operand => {
                ops.push(Shunt::Un(UnOp::Plus));
            }
            TokenKind::Minus if expect_operand => {
                ops.push(Shunt::Un(UnOp::Minus));
            }
            _ => {
                let op = punct_to_binop(*kind)?;
                let prec = binop_precedence(op);
                pop_while(&mut ops, &mut output, &|top| match top {
                    Shunt::Bin(b) => binop_precedence(*b) >= prec,
                    Shunt::Un(_) => UNARY_PRECEDENCE >= prec,
                    _ => false,
                });
                ops.push(Shunt::Bin(op));
                expect_operand = true;
            }
        }
    }
    pop_while(&mut ops, &mut output, &|_| true);
    if ops.iter().any(|o| matches!(o, Shunt::LParen)) {
        return None;
    }
    if output.is_empty() {
        return None;
    }
    Some(output)
}

/// Each stack slot carries its value alongside whether evaluating it hit a
/// division or modulo by zero anywhere in its subtree. `&&`/`||` drop the
/// discarded operand's flag instead of merging it in — the short-circuit a
/// plain stack machine otherwise has no way to express, since by the time
/// an operator runs both of its operands are already computed.
fn interpret(rpn: &[Rpn], on_div_by_zero: &mut impl FnMut()) -> Option<i64> {
    let mut stack: Vec<(i64, bool)> = Vec::new();
    for item in rpn {
        match item {
            Rpn::Num(v) => stack.push((*v, false)),
            Rpn::Un(op) => {
                let (v, err) = stack.pop()?;
                let v = match op {
                    UnOp::Plus => v,
                    UnOp::Minus => v.wrapping_neg(),
                    UnOp::Not => i64::from(v == 0),
                    UnOp::BitNot => !v,
                };
                stack.push((v, err));
            }
            Rpn::Bin(op) => {
                let (rhs, rhs_err) = stack.pop()?;
                let (lhs, lhs_err) = stack.pop()?;
                let (v, err) = match op {
                    BinOp::Add => (lhs.wrapping_add(rhs), lhs_err || rhs_err),
                    BinOp::Sub => (lhs.wrapping_sub(rhs), lhs_err || rhs_err),
                    BinOp::Mul => (lhs.wrapping_mul(rhs), lhs_err || rhs_err),
                    BinOp::Div => {
                        if rhs == 0 {
                            (0, true)
                        } else {
                            (lhs.wrapping_div(rhs), lhs_err || rhs_err)
                        }
                    }
                    BinOp::Mod => {
                        if rhs == 0 {
                            (0, true)
                        } else {
                            (lhs.wrapping_rem(rhs), lhs_err || rhs_err)
                        }
                    }
                    BinOp::Shl => (lhs.wrapping_shl(rhs as u32), lhs_err || rhs_err),
                    BinOp::Shr => (lhs.wrapping_shr(rhs as u32), lhs_err || rhs_err),
                    BinOp::Lt => (i64::from(lhs < rhs), lhs_err || rhs_err),
                    BinOp::Gt => (i64::from(lhs > rhs), lhs_err || rhs_err),
                    BinOp::Le => (i64::from(lhs <= rhs), lhs_err || rhs_err),
                    BinOp::Ge => (i64::from(lhs >= rhs), lhs_err || rhs_err),
                    BinOp::EqEq => (i64::from(lhs == rhs), lhs_err || rhs_err),
                    BinOp::Ne => (i64::from(lhs != rhs), lhs_err || rhs_err),
                    BinOp::BitAnd => (lhs & rhs, lhs_err || rhs_err),
                    BinOp::BitOr => (lhs | rhs, lhs_err || rhs_err),
                    BinOp::BitXor => (lhs ^ rhs, lhs_err || rhs_err),
                    BinOp::And if lhs == 0 => (0, lhs_err),
                    BinOp::And => (i64::from(rhs != 0), lhs_err || rhs_err),
                    BinOp::Or if lhs != 0 => (1, lhs_err),
                    BinOp::Or => (i64::from(rhs != 0), lhs_err || rhs_err),
                };
                stack.push((v, err));
            }
        }
    }
    if stack.len() != 1 {
        return None;
    }
    let (v, err) = stack.pop()?;
    if err {
        on_div_by_zero();
    }
    Some(v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdlsl_lexer::TokenKind::*;

    fn toks(v: &[(TokenKind, &str)]) -> Vec<(TokenKind, String)> {
        v.iter().map(|(k, s)| (*k, s.to_string())).collect()
    }

    #[test]
    fn division_by_zero_reports_and_evaluates_zero() {
        let tokens = toks(&[(IntLiteral, "1"), (Slash, "/"), (IntLiteral, "0")]);
        let mut called = false;
        let v = eval(&tokens, || called = true);
        assert_eq!(v, Some(0));
        assert!(called);
    }

    #[test]
    fn unknown_identifier_is_zero() {
        let tokens = toks(&[(Ident, "UNDEFINED_THING")]);
        assert_eq!(eval(&tokens, || {}), Some(0));
    }

    #[test]
    fn unary_minus_vs_binary_minus() {
        let tokens = toks(&[(IntLiteral, "3"), (Minus, "-"), (Minus, "-"), (IntLiteral, "2")]);
        assert_eq!(eval(&tokens, || {}), Some(5));
    }

    #[test]
    fn and_short_circuits_a_zero_divisor_on_the_right() {
        // `0 && (1/0)` must not report a division by zero: the right side
        // of `&&` is never reached once the left side is false.
        let tokens = toks(&[
            (IntLiteral, "0"),
            (AmpAmp, "&&"),
            (LParen, "("),
            (IntLiteral, "1"),
            (Slash, "/"),
            (IntLiteral, "0"),
            (RParen, ")"),
        ]);
        let mut called = false;
        assert_eq!(eval(&tokens, || called = true), Some(0));
        assert!(!called);
    }

    #[test]
    fn or_short_circuits_a_zero_divisor_on_the_right() {
        let tokens = toks(&[
            (IntLiteral, "1"),
            (PipePipe, "||"),
            (LParen, "("),
            (IntLiteral, "1"),
            (Slash, "/"),
            (IntLiteral, "0"),
            (RParen, ")"),
        ]);
        let mut called = false;
        assert_eq!(eval(&tokens, || called = true), Some(1));
        assert!(!called);
    }

    #[test]
    fn and_still_divides_when_the_left_side_is_true() {
        let tokens = toks(&[
            (IntLiteral, "1"),
            (AmpAmp, "&&"),
            (LParen, "("),
            (IntLiteral, "1"),
            (Slash, "/"),
            (IntLiteral, "0"),
            (RParen, ")"),
        ]);
        let mut called = false;
        assert_eq!(eval(&tokens, || called = true), Some(0));
        assert!(called);
    }

    #[test]
    fn malformed_expression_is_none() {
        let tokens = toks(&[(LParen, "("), (IntLiteral, "1")]);
        assert_eq!(eval(&tokens, || {}), None);
    }
}
