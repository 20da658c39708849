//! `#if` expression evaluation
//!
//! Shunting-yard over the language operator table into an RPN sequence,
//! evaluated with an operand stack and the integer constant evaluators.
//! `defined(NAME)` reads the macro table without being expanded; the cat
//! operator `~` is not meaningful here and is rejected.

use crate::diagnostics::{CompileError, Diagnostic};
use crate::operators::{self, Op, OpCategory};
use crate::preprocessor::Preprocessor;
use crate::token::{Span, Token, TokenKind};

#[derive(Debug, Clone, Copy)]
enum RplToken {
    Literal(i64),
    Operator(Op),
}

/// `None` entries on the operator stack are `(` sentinels.
type OpStack = Vec<Option<Op>>;

fn is_unary(op: Op) -> bool {
    op.info().category == OpCategory::Unary
}

fn pop_higher_precedence(op_stack: &mut OpStack, rpl: &mut Vec<RplToken>, incoming: Op) {
    while let Some(Some(top)) = op_stack.last() {
        let wins = top.info().precedence > incoming.info().precedence || is_unary(*top);
        if !wins {
            break;
        }
        rpl.push(RplToken::Operator(*top));
        op_stack.pop();
    }
}

/// Evaluate a fully-expanded `#if` condition to an integer.
pub fn evaluate(tokens: &[Token], pp: &Preprocessor) -> Result<i64, CompileError> {
    let expr_span = match (tokens.first(), tokens.last()) {
        (Some(first), Some(last)) => first.span.to(&last.span),
        _ => Span::synthetic(),
    };

    let mut rpl: Vec<RplToken> = Vec::new();
    let mut op_stack: OpStack = Vec::new();

    let mut i = 0;
    while i < tokens.len() {
        let token = &tokens[i];
        match &token.kind {
            TokenKind::Int(value) => {
                rpl.push(RplToken::Literal(*value));
                i += 1;
            }
            TokenKind::Ident(name) if &**name == "defined" => {
                if tokens.get(i + 1).map(|t| &t.kind) == Some(&TokenKind::LParen)
                    && tokens.get(i + 2).and_then(|t| t.ident_text()).is_some()
                    && tokens.get(i + 3).map(|t| &t.kind) == Some(&TokenKind::RParen)
                {
                    let macro_name = tokens[i + 2].ident_text().expect("identifier");
                    rpl.push(RplToken::Literal(pp.is_defined(macro_name) as i64));
                    i += 4;
                } else {
                    return Err(Diagnostic::error(
                        token.span.clone(),
                        "expected 'defined(<MACRO>)'",
                    )
                    .into());
                }
            }
            TokenKind::Ident(_) => {
                return Err(Diagnostic::error(
                    token.span.clone(),
                    "expected 'defined(<MACRO>)'",
                )
                .into());
            }
            TokenKind::Op(op) => {
                if is_unary(*op) {
                    op_stack.push(Some(*op));
                } else {
                    pop_higher_precedence(&mut op_stack, &mut rpl, *op);
                    op_stack.push(Some(*op));
                }
                i += 1;
            }
            TokenKind::LParen => {
                op_stack.push(None);
                i += 1;
            }
            TokenKind::RParen => {
                loop {
                    match op_stack.pop() {
                        Some(Some(op)) => rpl.push(RplToken::Operator(op)),
                        Some(None) => break,
                        None => {
                            return Err(Diagnostic::error(
                                token.span.clone(),
                                "unmatched parenthesis found",
                            )
                            .into());
                        }
                    }
                }
                i += 1;
            }
            other => {
                return Err(Diagnostic::error(
                    token.span.clone(),
                    format!("unexpected token {}", other.describe()),
                )
                .into());
            }
        }
    }

    while let Some(entry) = op_stack.pop() {
        match entry {
            Some(op) => rpl.push(RplToken::Operator(op)),
            None => {
                return Err(
                    Diagnostic::error(expr_span, "unmatched parenthesis found").into()
                );
            }
        }
    }

    evaluate_rpl(&expr_span, &rpl)
}

fn evaluate_rpl(span: &Span, rpl: &[RplToken]) -> Result<i64, CompileError> {
    let invalid = || Diagnostic::error(span.clone(), "invalid #if expression");
    let mut stack: Vec<i64> = Vec::new();

    for token in rpl {
        match token {
            RplToken::Literal(value) => stack.push(*value),
            RplToken::Operator(op) => {
                if *op == Op::Cat {
                    return Err(Diagnostic::error(
                        span.clone(),
                        "cat operator cannot be used in an #if expression",
                    )
                    .into());
                }
                if is_unary(*op) {
                    let x = stack.pop().ok_or_else(invalid)?;
                    let value = operators::eval_int_unop(*op, x).ok_or_else(invalid)?;
                    stack.push(value);
                } else {
                    let y = stack.pop().ok_or_else(invalid)?;
                    let x = stack.pop().ok_or_else(invalid)?;
                    let value = operators::eval_int_binop(*op, x, y).ok_or_else(invalid)?;
                    stack.push(value);
                }
            }
        }
    }

    if stack.len() != 1 {
        return Err(invalid().into());
    }
    Ok(stack[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::{Cursor, LexMode, tokenize};
    use crate::token::SourceFile;

    fn eval_str(expr: &str) -> Result<i64, CompileError> {
        let file = SourceFile::new("cond.opl", expr);
        let mut cursor = Cursor::new(file);
        let mut pp = Preprocessor::new(Vec::new());
        let mut tokens = Vec::new();
        tokenize(&mut cursor, &mut pp, LexMode::default(), &mut tokens).unwrap();
        evaluate(&tokens, &pp)
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(eval_str("1 + 2 * 3").unwrap(), 7);
        assert_eq!(eval_str("(1 + 2) * 3").unwrap(), 9);
        assert_eq!(eval_str("10 / 2 - 1").unwrap(), 4);
    }

    #[test]
    fn test_comparisons_and_logic() {
        assert_eq!(eval_str("1 < 2").unwrap(), 1);
        assert_eq!(eval_str("2 == 2 && 3 > 1").unwrap(), 1);
        assert_eq!(eval_str("0 || 0").unwrap(), 0);
        assert_eq!(eval_str("!0").unwrap(), 1);
    }

    #[test]
    fn test_bitwise() {
        assert_eq!(eval_str("12 & 10").unwrap(), 8);
        assert_eq!(eval_str("1 << 4").unwrap(), 16);
        assert_eq!(eval_str("5 ^ 1").unwrap(), 4);
    }

    #[test]
    fn test_cat_forbidden() {
        let err = eval_str("1 ~ 2").unwrap_err();
        assert!(format!("{}", err).contains("cat operator"));
    }

    #[test]
    fn test_malformed_expressions() {
        assert!(eval_str("+").is_err());
        assert!(eval_str("1 2").is_err());
        assert!(eval_str("(1").is_err());
        assert!(eval_str("1)").is_err());
        assert!(eval_str("1 / 0").is_err());
    }

    #[test]
    fn test_unknown_identifier_rejected() {
        let err = eval_str("FOO + 1").unwrap_err();
        assert!(format!("{}", err).contains("defined"));
    }
}
