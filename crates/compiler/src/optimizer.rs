//! AST optimization
//!
//! Purely local algebraic rewrites over the typed AST: constant folding of
//! integer and float operations, power-of-two strength reduction for `%`,
//! `/` and `*`, constant folding through casts, and flattening of
//! parenthesized chains. The pass is run a fixed number of times from the
//! pipeline driver; each iteration can expose new opportunities to the next
//! (a fold inside parentheses unlocks a cast fold, and so on).
//! Sub-expressions with side effects are never dropped: every rewrite
//! requires literal operands.

use crate::ast::*;
use crate::operators::{self, Op};
use crate::token::TokenKind;
use crate::types::{BaseType, Type};

/// One optimization pass over the whole program.
pub fn optimize_program(program: &mut Program) {
    for decl in &mut program.global_declarations {
        visit_declaration(decl);
    }
    for func in &mut program.functions {
        for stmt in &mut func.body {
            visit_statement(stmt);
        }
    }
}

fn visit_declaration(decl: &mut Declaration) {
    if let Declaration::Variable(var) = decl {
        visit_type(&mut var.ty);
        if let Some(init) = &mut var.init {
            visit_expression(&mut init.value);
        }
    }
}

fn visit_type(ty: &mut Type) {
    match ty {
        Type::Array(arr) => {
            if let Some(size) = &mut arr.initial_size {
                visit_expression(size);
            }
            visit_type(&mut arr.element);
        }
        Type::Pointer(inner) | Type::Optional(inner) => visit_type(inner),
        _ => {}
    }
}

fn visit_statement(stmt: &mut Statement) {
    match stmt {
        Statement::Return(ret) => {
            if let Some(expr) = &mut ret.expr {
                visit_expression(expr);
            }
        }
        Statement::Declaration(decl) => visit_declaration(decl),
        Statement::Compound(stmts) => {
            for stmt in stmts {
                visit_statement(stmt);
            }
        }
        Statement::Empty | Statement::LoopCtrl(_) => {}
        Statement::If(s) => {
            visit_expression(&mut s.test);
            visit_statement(&mut s.then_branch);
            if let Some(else_branch) = &mut s.else_branch {
                visit_statement(else_branch);
            }
        }
        Statement::While(s) => {
            visit_expression(&mut s.test);
            visit_statement(&mut s.body);
        }
        Statement::DoWhile(s) => {
            visit_statement(&mut s.body);
            visit_expression(&mut s.test);
        }
        Statement::For(s) => {
            visit_statement(&mut s.init);
            visit_expression(&mut s.test);
            visit_expression(&mut s.step);
            visit_statement(&mut s.body);
        }
        Statement::Foreach(s) => {
            visit_expression(&mut s.array);
            if let Some(assign) = &mut s.loop_assignment {
                visit_expression(&mut assign.value);
            }
            visit_statement(&mut s.body);
        }
        Statement::Expression(expr) => visit_expression(expr),
    }
}

fn visit_expression(expr: &mut Expression) {
    match &mut expr.kind {
        ExprKind::Primary(prim) => visit_primary(prim),
        ExprKind::Binop(binop) => {
            visit_expression(&mut binop.left);
            visit_expression(&mut binop.right);
            strength_reduce(binop);
        }
        ExprKind::Assignment(assign) => {
            visit_primary(&mut assign.target);
            visit_expression(&mut assign.value);
        }
        ExprKind::Ternary(ternary) => {
            visit_expression(&mut ternary.cond);
            visit_expression(&mut ternary.true_branch);
            visit_expression(&mut ternary.false_branch);
        }
    }

    fold_int_binop(expr);
    fold_float_binop(expr);
}

fn visit_primary(prim: &mut PrimaryExpr) {
    match &mut prim.kind {
        PrimKind::Enclosed(expr) => visit_expression(expr),
        PrimKind::Unary(unary) => visit_primary(&mut unary.operand),
        PrimKind::Cast(cast) => visit_primary(&mut cast.operand),
        PrimKind::Call(call) => {
            for arg in &mut call.args {
                visit_expression(arg);
            }
        }
        PrimKind::Subscript(sub) => {
            visit_primary(&mut sub.array);
            visit_expression(&mut sub.index);
        }
        PrimKind::Slice(slice) => {
            visit_primary(&mut slice.array);
            visit_expression(&mut slice.left);
            visit_expression(&mut slice.right);
        }
        PrimKind::RangeGen(range) => {
            visit_primary(&mut range.left);
            visit_primary(&mut range.right);
        }
        PrimKind::FieldAccess(access) => visit_primary(&mut access.base),
        PrimKind::Deref(deref) => visit_primary(&mut deref.pointer),
        PrimKind::AddrOf(addr) => visit_primary(&mut addr.operand),
        PrimKind::InlineAsm(asm) => {
            for arg in &mut asm.args {
                visit_expression(arg);
            }
        }
        PrimKind::Match(m) => {
            visit_expression(&mut m.scrutinee);
            for case in &mut m.cases {
                visit_expression(&mut case.expr);
            }
        }
        PrimKind::Sizeof(sizeof) => {
            if let Some(expr) = &mut sizeof.expr {
                visit_expression(expr);
            }
        }
        PrimKind::Random(random) => match random {
            RandomExpr::Single { operand, .. } => visit_primary(operand),
            RandomExpr::Range { left, right } => {
                visit_primary(left);
                visit_primary(right);
            }
        },
        PrimKind::ArrayLit(lit) => {
            for element in &mut lit.elements {
                visit_expression(element);
            }
        }
        PrimKind::StructInit(init) => {
            for arg in &mut init.args {
                visit_expression(arg);
            }
        }
        PrimKind::Ident(_)
        | PrimKind::New(_)
        | PrimKind::IntConst(_)
        | PrimKind::FloatConst(_)
        | PrimKind::StrLit(_)
        | PrimKind::NullLit => {}
    }

    // flatten ((expr)) chains so constants become visible to other rewrites
    while let PrimKind::Enclosed(inner) = &prim.kind {
        if let ExprKind::Primary(_) = &inner.kind {
            let PrimKind::Enclosed(inner) = std::mem::replace(&mut prim.kind, PrimKind::NullLit)
            else {
                unreachable!();
            };
            let ExprKind::Primary(p) = inner.kind else {
                unreachable!();
            };
            *prim = *p;
        } else {
            break;
        }
    }

    fold_constant_cast(prim);
    fold_int_unary(prim);
    fold_float_unary(prim);
}

fn int_const(expr: &Expression) -> Option<i64> {
    if let ExprKind::Primary(prim) = &expr.kind
        && let PrimKind::IntConst(tok) = &prim.kind
        && let TokenKind::Int(value) = tok.kind
    {
        Some(value)
    } else {
        None
    }
}

fn float_const(expr: &Expression) -> Option<f64> {
    if let ExprKind::Primary(prim) = &expr.kind
        && let PrimKind::FloatConst(tok) = &prim.kind
        && let TokenKind::Float(value) = tok.kind
    {
        Some(value)
    } else {
        None
    }
}

fn prim_int_const(prim: &PrimaryExpr) -> Option<i64> {
    if let PrimKind::IntConst(tok) = &prim.kind
        && let TokenKind::Int(value) = tok.kind
    {
        Some(value)
    } else {
        None
    }
}

fn prim_float_const(prim: &PrimaryExpr) -> Option<f64> {
    if let PrimKind::FloatConst(tok) = &prim.kind
        && let TokenKind::Float(value) = tok.kind
    {
        Some(value)
    } else {
        None
    }
}

fn is_power_of_two(value: i64) -> bool {
    value > 0 && (value & (value - 1)) == 0
}

/// `x % 2^k` -> `x & (2^k - 1)`; int `x / 2^k` -> `x >> k`; int
/// `x * 2^k` -> `x << k` with the constant canonicalized to the right.
fn strength_reduce(binop: &mut Binop) {
    let int = Type::Basic(BaseType::Int);
    match binop.operator() {
        Op::Mod => {
            if let Some(value) = int_const(&binop.right)
                && is_power_of_two(value)
            {
                binop.op.kind = TokenKind::Op(Op::BitAnd);
                set_int_const(&mut binop.right, value - 1);
            }
        }
        Op::Div => {
            if binop.left.value_type.matches(&int)
                && let Some(value) = int_const(&binop.right)
                && is_power_of_two(value)
            {
                binop.op.kind = TokenKind::Op(Op::Shr);
                set_int_const(&mut binop.right, value.trailing_zeros() as i64);
            }
        }
        Op::Mul => {
            if !binop.left.value_type.matches(&int) || !binop.right.value_type.matches(&int) {
                return;
            }
            if let Some(value) = int_const(&binop.right)
                && is_power_of_two(value)
            {
                binop.op.kind = TokenKind::Op(Op::Shl);
                set_int_const(&mut binop.right, value.trailing_zeros() as i64);
            } else if let Some(value) = int_const(&binop.left)
                && is_power_of_two(value)
            {
                binop.op.kind = TokenKind::Op(Op::Shl);
                std::mem::swap(&mut binop.left, &mut binop.right);
                set_int_const(&mut binop.right, value.trailing_zeros() as i64);
            }
        }
        _ => {}
    }
}

fn set_int_const(expr: &mut Expression, value: i64) {
    if let ExprKind::Primary(prim) = &mut expr.kind
        && let PrimKind::IntConst(tok) = &mut prim.kind
    {
        tok.kind = TokenKind::Int(value);
    }
}

fn replace_with_int(expr: &mut Expression, value: i64) {
    let span = expr.span.clone();
    let mut prim = PrimaryExpr::new(
        PrimKind::IntConst(crate::token::Token::new(TokenKind::Int(value), span.clone())),
        span,
    );
    prim.value_type = expr.value_type.clone();
    expr.kind = ExprKind::Primary(Box::new(prim));
}

fn replace_with_float(expr: &mut Expression, value: f64) {
    let span = expr.span.clone();
    let mut prim = PrimaryExpr::new(
        PrimKind::FloatConst(crate::token::Token::new(
            TokenKind::Float(value),
            span.clone(),
        )),
        span,
    );
    prim.value_type = expr.value_type.clone();
    expr.kind = ExprKind::Primary(Box::new(prim));
}

fn fold_int_binop(expr: &mut Expression) {
    let ExprKind::Binop(binop) = &expr.kind else {
        return;
    };
    let (Some(left), Some(right)) = (int_const(&binop.left), int_const(&binop.right)) else {
        return;
    };
    // division by zero stays for the runtime to report
    if let Some(value) = operators::eval_int_binop(binop.operator(), left, right) {
        replace_with_int(expr, value);
    }
}

fn fold_float_binop(expr: &mut Expression) {
    let ExprKind::Binop(binop) = &expr.kind else {
        return;
    };
    let (Some(left), Some(right)) = (float_const(&binop.left), float_const(&binop.right))
    else {
        return;
    };
    if let Some(value) = operators::eval_float_binop(binop.operator(), left, right) {
        replace_with_float(expr, value);
    }
}

/// Constant integers cast to float (and the reverse) fold away entirely.
fn fold_constant_cast(prim: &mut PrimaryExpr) {
    let PrimKind::Cast(cast) = &prim.kind else {
        return;
    };
    let real = Type::Basic(BaseType::Real);
    let int = Type::Basic(BaseType::Int);

    if cast.target_type.matches(&real)
        && let Some(value) = prim_int_const(&cast.operand)
    {
        let span = prim.span.clone();
        prim.kind = PrimKind::FloatConst(crate::token::Token::new(
            TokenKind::Float(value as f64),
            span,
        ));
    } else if cast.target_type.matches(&int)
        && let Some(value) = prim_float_const(&cast.operand)
    {
        let span = prim.span.clone();
        prim.kind = PrimKind::IntConst(crate::token::Token::new(
            TokenKind::Int(value as i64),
            span,
        ));
    }
}

fn fold_int_unary(prim: &mut PrimaryExpr) {
    let PrimKind::Unary(unary) = &prim.kind else {
        return;
    };
    let TokenKind::Op(op) = unary.op.kind else {
        return;
    };
    let Some(value) = prim_int_const(&unary.operand) else {
        return;
    };
    if let Some(folded) = operators::eval_int_unop(op, value) {
        let span = prim.span.clone();
        prim.kind = PrimKind::IntConst(crate::token::Token::new(TokenKind::Int(folded), span));
    }
}

fn fold_float_unary(prim: &mut PrimaryExpr) {
    let PrimKind::Unary(unary) = &prim.kind else {
        return;
    };
    let TokenKind::Op(op) = unary.op.kind else {
        return;
    };
    let Some(value) = prim_float_const(&unary.operand) else {
        return;
    };
    if let Some(folded) = operators::eval_float_unop(op, value) {
        let span = prim.span.clone();
        prim.kind =
            PrimKind::FloatConst(crate::token::Token::new(TokenKind::Float(folded), span));
    }
}
