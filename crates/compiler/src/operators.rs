//! Operator table, constant evaluation, and operator-overload registry
//!
//! The table drives the lexer (longest-match), the parser (precedence
//! climbing), the `#if` evaluator (shunting-yard), and overload mangling
//! (alphabetic aliases).

use crate::ast::Function;
use crate::diagnostics::{CompileError, Diagnostic};
use crate::types::{Type, TypeTable};
use std::rc::Rc;

/// Operator codes. `Cat` doubles as bitwise-not when used as a unary
/// operator; `Inc`/`Dec` only ever appear as prefix operators and are
/// desugared by the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    In,
    Cat,
    Eq,
    Neq,
    Gt,
    Ge,
    Lt,
    Le,
    LogicAnd,
    LogicOr,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Inc,
    Dec,
    LogicNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCategory {
    Binary,
    Unary,
}

pub struct OperatorInfo {
    pub symbol: &'static str,
    /// Alphabetic alias used in overload mangled names
    pub alpha: &'static str,
    pub precedence: i32,
    /// Comparison and logic operators produce an int boolean
    pub is_bool: bool,
    /// Logic operators cast their operands to booleans
    pub is_logic: bool,
    pub category: OpCategory,
}

/// Every operator the lexer can produce.
pub const ALL_OPS: [Op; 23] = [
    Op::Add,
    Op::Sub,
    Op::Mul,
    Op::Div,
    Op::Mod,
    Op::In,
    Op::Cat,
    Op::Eq,
    Op::Neq,
    Op::Gt,
    Op::Ge,
    Op::Lt,
    Op::Le,
    Op::LogicAnd,
    Op::LogicOr,
    Op::BitAnd,
    Op::BitOr,
    Op::BitXor,
    Op::Shl,
    Op::Shr,
    Op::Inc,
    Op::Dec,
    Op::LogicNot,
];

/// The binary subset, in opcode-table order.
pub const BINARY_OPS: [Op; 20] = [
    Op::Add,
    Op::Sub,
    Op::Mul,
    Op::Div,
    Op::Mod,
    Op::In,
    Op::Cat,
    Op::Eq,
    Op::Neq,
    Op::Gt,
    Op::Ge,
    Op::Lt,
    Op::Le,
    Op::LogicAnd,
    Op::LogicOr,
    Op::BitAnd,
    Op::BitOr,
    Op::BitXor,
    Op::Shl,
    Op::Shr,
];

impl Op {
    pub fn info(self) -> &'static OperatorInfo {
        macro_rules! info {
            ($sym:literal, $alpha:literal, $prec:literal, $b:literal, $l:literal, $cat:expr) => {
                &OperatorInfo {
                    symbol: $sym,
                    alpha: $alpha,
                    precedence: $prec,
                    is_bool: $b,
                    is_logic: $l,
                    category: $cat,
                }
            };
        }
        match self {
            Op::Add => info!("+", "add", 30, false, false, OpCategory::Binary),
            Op::Sub => info!("-", "sub", 30, false, false, OpCategory::Binary),
            Op::Mul => info!("*", "mul", 40, false, false, OpCategory::Binary),
            Op::Div => info!("/", "div", 40, false, false, OpCategory::Binary),
            Op::Mod => info!("%", "mod", 40, false, false, OpCategory::Binary),
            Op::In => info!("in", "in", 22, true, false, OpCategory::Binary),
            Op::Cat => info!("~", "not", 30, false, false, OpCategory::Binary),
            Op::Eq => info!("==", "eq", 10, true, false, OpCategory::Binary),
            Op::Neq => info!("!=", "neq", 10, true, false, OpCategory::Binary),
            Op::Gt => info!(">", "gt", 20, true, false, OpCategory::Binary),
            Op::Ge => info!(">=", "ge", 20, true, false, OpCategory::Binary),
            Op::Lt => info!("<", "lt", 20, true, false, OpCategory::Binary),
            Op::Le => info!("<=", "le", 20, true, false, OpCategory::Binary),
            Op::LogicAnd => info!("&&", "andl", 3, true, true, OpCategory::Binary),
            Op::LogicOr => info!("||", "orl", 2, true, true, OpCategory::Binary),
            Op::BitAnd => info!("&", "and", 6, false, false, OpCategory::Binary),
            Op::BitOr => info!("|", "or", 4, false, false, OpCategory::Binary),
            Op::BitXor => info!("^", "xor", 5, false, false, OpCategory::Binary),
            Op::Shl => info!("<<", "shl", 25, false, false, OpCategory::Binary),
            Op::Shr => info!(">>", "shr", 25, false, false, OpCategory::Binary),
            Op::Inc => info!("++", "inc", 0, false, false, OpCategory::Unary),
            Op::Dec => info!("--", "dec", 0, false, false, OpCategory::Unary),
            Op::LogicNot => info!("!", "notl", 0, true, true, OpCategory::Unary),
        }
    }

    pub fn is_binary(self) -> bool {
        self.info().category == OpCategory::Binary
    }
}

/// Evaluate a binary operation on integer constants.
/// Returns `None` for division or modulo by zero, or a non-integer operator.
pub fn eval_int_binop(op: Op, x: i64, y: i64) -> Option<i64> {
    Some(match op {
        Op::Add => x.wrapping_add(y),
        Op::Sub => x.wrapping_sub(y),
        Op::Mul => x.wrapping_mul(y),
        Op::Div => x.checked_div(y)?,
        Op::Mod => x.checked_rem(y)?,
        Op::Eq => (x == y) as i64,
        Op::Neq => (x != y) as i64,
        Op::Gt => (x > y) as i64,
        Op::Ge => (x >= y) as i64,
        Op::Lt => (x < y) as i64,
        Op::Le => (x <= y) as i64,
        Op::LogicAnd => (x != 0 && y != 0) as i64,
        Op::LogicOr => (x != 0 || y != 0) as i64,
        Op::BitAnd => x & y,
        Op::BitOr => x | y,
        Op::BitXor => x ^ y,
        Op::Shl => x.wrapping_shl(y as u32),
        Op::Shr => x.wrapping_shr(y as u32),
        _ => return None,
    })
}

pub fn eval_int_unop(op: Op, x: i64) -> Option<i64> {
    Some(match op {
        Op::LogicNot => (x == 0) as i64,
        Op::Cat => !x, // bitwise not
        Op::Add => x,
        Op::Sub => x.wrapping_neg(),
        _ => return None,
    })
}

pub fn eval_float_binop(op: Op, x: f64, y: f64) -> Option<f64> {
    Some(match op {
        Op::Add => x + y,
        Op::Sub => x - y,
        Op::Mul => x * y,
        Op::Div => x / y,
        Op::Eq => (x == y) as i64 as f64,
        Op::Neq => (x != y) as i64 as f64,
        Op::Gt => (x > y) as i64 as f64,
        Op::Ge => (x >= y) as i64 as f64,
        Op::Lt => (x < y) as i64 as f64,
        Op::Le => (x <= y) as i64 as f64,
        _ => return None,
    })
}

pub fn eval_float_unop(op: Op, x: f64) -> Option<f64> {
    Some(match op {
        Op::Add => x,
        Op::Sub => -x,
        _ => return None,
    })
}

/// A registered operator overload: a user function named `operator<op>`
/// whose mangled symbol encodes the operand types.
#[derive(Debug, Clone)]
pub struct OpOverload {
    pub op: Op,
    pub mangled_name: Rc<str>,
    pub ret_type: Type,
    pub params: Vec<Type>,
}

/// Registry of operator overloads, keyed by `(op, arity, operand types)`.
/// Lookup returns the first exact-type match; absence falls through to the
/// built-in type rules.
#[derive(Debug, Default)]
pub struct OverloadTable {
    overloads: Vec<OpOverload>,
}

impl OverloadTable {
    pub fn new() -> Self {
        OverloadTable::default()
    }

    /// Register an overload from a function definition flagged as one.
    /// Rewrites the function's emitted symbol to the mangled name.
    ///
    /// `~` is ambiguous: with two parameters it is the binary cat operator,
    /// with one it is bitwise not.
    pub fn register(
        &mut self,
        func: &mut Function,
        types: &TypeTable,
    ) -> Result<(), CompileError> {
        let op = func
            .overloaded_op
            .ok_or_else(|| CompileError::Internal("overload without operator".into()))?;
        let params = &func.signature.params;

        let binary = if op == Op::Cat {
            params.len() == 2
        } else {
            op.info().category == OpCategory::Binary
        };
        let expected_arity = if binary { 2 } else { 1 };
        if params.len() != expected_arity {
            return Err(Diagnostic::error(
                func.name.span.clone(),
                "invalid operator overload argument count",
            )
            .into());
        }

        // operators over POD types only are not overloadable
        let all_pod = !types.is_struct(&func.signature.ret_type)
            && params.iter().all(|p| !types.is_struct(p));
        if all_pod {
            let shown: Vec<String> = params.iter().map(|p| types.display(p)).collect();
            return Err(Diagnostic::error(
                func.name.span.clone(),
                format!(
                    "can't overload operator{} with types {}, {}",
                    op.info().symbol,
                    types.display(&func.signature.ret_type),
                    shown.join(", ")
                ),
            )
            .into());
        }

        let mangled: Rc<str> = if binary {
            format!(
                "operatorb{}_{}_{}",
                op.info().alpha,
                types.display(&params[0]),
                types.display(&params[1])
            )
            .into()
        } else {
            format!("operatoru{}_{}", op.info().alpha, types.display(&params[0])).into()
        };

        self.overloads.push(OpOverload {
            op,
            mangled_name: Rc::clone(&mangled),
            ret_type: func.signature.ret_type.clone(),
            params: params.clone(),
        });
        func.mangled_name = Some(mangled);
        Ok(())
    }

    pub fn find_binop(&self, op: Op, lhs: &Type, rhs: &Type) -> Option<&OpOverload> {
        self.overloads.iter().find(|o| {
            o.op == op
                && o.params.len() == 2
                && o.params[0].matches(lhs)
                && o.params[1].matches(rhs)
        })
    }

    pub fn find_unop(&self, op: Op, operand: &Type) -> Option<&OpOverload> {
        self.overloads
            .iter()
            .find(|o| o.op == op && o.params.len() == 1 && o.params[0].matches(operand))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::{Span, Token, TokenKind};
    use crate::types::{BaseType, FunctionSignature};

    #[test]
    fn test_eval_int_binop() {
        assert_eq!(eval_int_binop(Op::Add, 2, 3), Some(5));
        assert_eq!(eval_int_binop(Op::Mul, 4, -2), Some(-8));
        assert_eq!(eval_int_binop(Op::Div, 7, 2), Some(3));
        assert_eq!(eval_int_binop(Op::Div, 7, 0), None);
        assert_eq!(eval_int_binop(Op::Shl, 1, 4), Some(16));
        assert_eq!(eval_int_binop(Op::Le, 3, 3), Some(1));
        assert_eq!(eval_int_binop(Op::LogicAnd, 2, 0), Some(0));
    }

    #[test]
    fn test_eval_int_unop() {
        assert_eq!(eval_int_unop(Op::LogicNot, 0), Some(1));
        assert_eq!(eval_int_unop(Op::LogicNot, 7), Some(0));
        assert_eq!(eval_int_unop(Op::Cat, 0), Some(-1));
        assert_eq!(eval_int_unop(Op::Sub, 5), Some(-5));
    }

    #[test]
    fn test_eval_float_binop() {
        assert_eq!(eval_float_binop(Op::Add, 1.5, 2.5), Some(4.0));
        assert_eq!(eval_float_binop(Op::Lt, 1.0, 2.0), Some(1.0));
        assert_eq!(eval_float_binop(Op::BitAnd, 1.0, 2.0), None);
    }

    #[test]
    fn test_precedence_ordering() {
        // multiplication binds tighter than addition, comparisons looser
        assert!(Op::Mul.info().precedence > Op::Add.info().precedence);
        assert!(Op::Add.info().precedence > Op::Lt.info().precedence);
        assert!(Op::Lt.info().precedence > Op::Eq.info().precedence);
        assert!(Op::Eq.info().precedence > Op::LogicAnd.info().precedence);
        assert!(Op::LogicAnd.info().precedence > Op::LogicOr.info().precedence);
    }

    fn overload_func(op: Op, params: Vec<Type>, ret: Type) -> Function {
        let span = Span::synthetic();
        Function {
            name: Token::new(TokenKind::Ident("operator".into()), span),
            signature: Rc::new(FunctionSignature {
                ret_type: ret,
                params,
            }),
            is_operator_overload: true,
            overloaded_op: Some(op),
            params: Vec::new(),
            body: Vec::new(),
            locals: Vec::new(),
            mangled_name: None,
        }
    }

    #[test]
    fn test_overload_register_and_lookup() {
        let mut types = TypeTable::new();
        let vec2 = types.forward_declare("vec2");
        types.complete_struct(&vec2, Vec::new(), 2);

        let mut table = OverloadTable::new();
        let mut func = overload_func(Op::Add, vec![vec2.clone(), vec2.clone()], vec2.clone());
        table.register(&mut func, &types).unwrap();

        let found = table.find_binop(Op::Add, &vec2, &vec2).expect("registered");
        assert_eq!(&*found.mangled_name, "operatorbadd_vec2_vec2");
        assert!(found.ret_type.matches(&vec2));
        assert_eq!(func.mangled_name.as_deref(), Some("operatorbadd_vec2_vec2"));

        // no match for other types
        let int = Type::Basic(BaseType::Int);
        assert!(table.find_binop(Op::Add, &int, &int).is_none());
    }

    #[test]
    fn test_overload_rejects_pod_only() {
        let types = TypeTable::new();
        let int = Type::Basic(BaseType::Int);
        let mut table = OverloadTable::new();
        let mut func = overload_func(Op::Add, vec![int.clone(), int.clone()], int);
        assert!(table.register(&mut func, &types).is_err());
    }

    #[test]
    fn test_unary_overload_mangling() {
        let mut types = TypeTable::new();
        let vec2 = types.forward_declare("vec2");
        types.complete_struct(&vec2, Vec::new(), 2);

        let mut table = OverloadTable::new();
        let mut func = overload_func(Op::Sub, vec![vec2.clone()], vec2.clone());
        table.register(&mut func, &types).unwrap();
        let found = table.find_unop(Op::Sub, &vec2).expect("registered");
        assert_eq!(&*found.mangled_name, "operatorusub_vec2");
    }
}
