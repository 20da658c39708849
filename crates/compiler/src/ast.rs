//! Abstract syntax tree for Opal
//!
//! Every expression node carries its source span and, once the semantic pass
//! has run, its resolved type. Functions own their statement list and a
//! growing local-variable table holding both user declarations and
//! compiler-synthesized temporaries (foreach counters, match scrutinees).

use crate::builtins::Builtin;
use crate::interner::Interner;
use crate::operators::Op;
use crate::token::{Span, Token};
use crate::types::{BaseType, FunctionSignature, StructField, Type};
use std::cell::RefCell;
use std::rc::Rc;

/// Placeholder type for nodes the semantic pass has not visited yet.
pub fn untyped() -> Type {
    Type::Basic(BaseType::Void)
}

/// A resolved identifier: name, type and storage slot.
#[derive(Debug, Clone)]
pub struct Ident {
    /// `None` for compiler-synthesized identifiers (foreach counters)
    pub name: Option<Token>,
    pub ty: Type,
    pub global: bool,
    /// Resolution already ran; re-analysis leaves the slot untouched
    pub processed: bool,
    pub slot: u32,
}

impl Ident {
    pub fn unresolved(name: Token) -> Self {
        Ident {
            name: Some(name),
            ty: untyped(),
            global: false,
            processed: false,
            slot: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LocalVariable {
    pub temp: bool,
    pub nest_depth: u32,
    pub name: Option<Token>,
    pub ty: Type,
}

#[derive(Debug, Clone)]
pub struct GlobalVariable {
    pub name: Token,
    pub ty: Type,
}

#[derive(Debug, Clone)]
pub struct Expression {
    pub span: Span,
    pub kind: ExprKind,
    pub value_type: Type,
    /// Whole expression is a comparison or logic operation
    pub is_bool: bool,
}

impl Expression {
    pub fn primary(prim: PrimaryExpr) -> Expression {
        Expression {
            span: prim.span.clone(),
            kind: ExprKind::Primary(Box::new(prim)),
            value_type: untyped(),
            is_bool: false,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Primary(Box<PrimaryExpr>),
    Binop(Box<Binop>),
    Assignment(Box<Assignment>),
    Ternary(Box<TernaryExpr>),
}

#[derive(Debug, Clone)]
pub struct Binop {
    /// Operator token; its kind is always `TokenKind::Op`
    pub op: Token,
    pub left: Expression,
    pub right: Expression,
}

impl Binop {
    pub fn operator(&self) -> Op {
        match self.op.kind {
            crate::token::TokenKind::Op(op) => op,
            _ => unreachable!("binop token is not an operator"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Assignment {
    pub target: PrimaryExpr,
    pub value: Expression,
    pub eq_token: Token,
    /// Statement position: the assigned lvalue is not re-pushed
    pub discard_result: bool,
}

#[derive(Debug, Clone)]
pub struct TernaryExpr {
    pub cond: Expression,
    pub true_branch: Expression,
    pub false_branch: Expression,
}

#[derive(Debug, Clone)]
pub struct PrimaryExpr {
    pub span: Span,
    pub kind: PrimKind,
    pub value_type: Type,
}

impl PrimaryExpr {
    pub fn new(kind: PrimKind, span: Span) -> Self {
        PrimaryExpr {
            span,
            kind,
            value_type: untyped(),
        }
    }

    /// Lvalues denote storage locations: identifiers, subscripts, field
    /// accesses and dereferences.
    pub fn is_lvalue(&self) -> bool {
        matches!(
            self.kind,
            PrimKind::Ident(_)
                | PrimKind::Subscript(_)
                | PrimKind::FieldAccess(_)
                | PrimKind::Deref(_)
        )
    }
}

#[derive(Debug, Clone)]
pub enum PrimKind {
    Enclosed(Box<Expression>),
    Unary(UnaryExpr),
    Cast(CastExpr),
    Ident(Ident),
    Call(FunctionCall),
    Subscript(ArraySubscript),
    Slice(ArraySlice),
    RangeGen(ArrayRange),
    FieldAccess(StructAccess),
    Deref(DerefExpr),
    AddrOf(AddrExpr),
    InlineAsm(AsmExpr),
    Match(MatchExpr),
    Sizeof(Box<SizeofExpr>),
    New(NewExpr),
    Random(RandomExpr),
    ArrayLit(ArrayLit),
    StructInit(StructInit),
    IntConst(Token),
    FloatConst(Token),
    StrLit(Token),
    NullLit,
}

#[derive(Debug, Clone)]
pub struct UnaryExpr {
    pub op: Token,
    pub operand: Box<PrimaryExpr>,
}

#[derive(Debug, Clone)]
pub struct CastExpr {
    pub type_token: Token,
    pub target_type: Type,
    pub operand: Box<PrimaryExpr>,
}

#[derive(Debug, Clone)]
pub struct FunctionCall {
    pub callee: Box<PrimaryExpr>,
    pub args: Vec<Expression>,
    pub indirect: bool,
    pub builtin: Option<Builtin>,
    pub signature: Option<Rc<FunctionSignature>>,
}

#[derive(Debug, Clone)]
pub struct ArraySubscript {
    pub bracket: Token,
    pub array: Box<PrimaryExpr>,
    pub index: Box<Expression>,
}

#[derive(Debug, Clone)]
pub struct ArraySlice {
    pub bracket: Token,
    pub array: Box<PrimaryExpr>,
    pub left: Box<Expression>,
    pub right: Box<Expression>,
}

/// `[a..b]` generates an int array holding the inclusive range.
#[derive(Debug, Clone)]
pub struct ArrayRange {
    pub left: Box<PrimaryExpr>,
    pub right: Box<PrimaryExpr>,
}

#[derive(Debug, Clone)]
pub struct StructAccess {
    pub base: Box<PrimaryExpr>,
    /// `->` or optional access rather than `.`
    pub indirect: bool,
    pub field_name: Token,
    /// Resolved by the semantic pass
    pub field: Option<StructField>,
}

#[derive(Debug, Clone)]
pub struct DerefExpr {
    pub star: Token,
    /// Deref of an optional inserts a null check instead of a load
    pub is_optional_access: bool,
    pub pointer: Box<PrimaryExpr>,
}

#[derive(Debug, Clone)]
pub struct AddrExpr {
    pub amp: Token,
    pub operand: Box<PrimaryExpr>,
    /// Set when the operand names a function; lowers to a code address
    pub addressed_function: Option<(Rc<str>, Rc<FunctionSignature>)>,
}

#[derive(Debug, Clone)]
pub struct AsmExpr {
    pub code: Rc<str>,
    pub args: Vec<Expression>,
    pub ret_type: Type,
}

#[derive(Debug, Clone)]
pub struct MatchExpr {
    pub scrutinee: Box<Expression>,
    pub cases: Vec<MatchCase>,
    /// Local slot holding the tested value during case dispatch
    pub test_slot: u32,
}

#[derive(Debug, Clone)]
pub struct MatchCase {
    pub is_wildcard: bool,
    pub patterns: Vec<MatchPattern>,
    pub expr: Expression,
    pub value_type: Type,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct MatchPattern {
    pub kind: PatternKind,
    pub value_type: Type,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum PatternKind {
    IntLit(Token),
    StrLit(Token),
    Ident(Ident),
    /// Inclusive integer range `l..r`
    Range(Token, Token),
}

#[derive(Debug, Clone)]
pub struct SizeofExpr {
    pub span: Span,
    /// `sizeof(expr)` form; `None` for `sizeof(type)`
    pub expr: Option<Expression>,
    pub ty: Type,
}

#[derive(Debug, Clone)]
pub struct NewExpr {
    pub span: Span,
    pub ty: Type,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RandMode {
    Int,
    Float,
    Array,
}

#[derive(Debug, Clone)]
pub enum RandomExpr {
    /// `%e`: random int below e, random float, or random array element
    Single {
        operand: Box<PrimaryExpr>,
        mode: RandMode,
    },
    /// `%l..r`: random int in the range
    Range {
        left: Box<PrimaryExpr>,
        right: Box<PrimaryExpr>,
    },
}

#[derive(Debug, Clone)]
pub struct ArrayLit {
    pub span: Span,
    pub elements: Vec<Expression>,
    pub ty: Type,
}

#[derive(Debug, Clone)]
pub struct StructInit {
    pub span: Span,
    pub ty: Type,
    pub args: Vec<Expression>,
}

#[derive(Debug, Clone)]
pub enum Statement {
    Return(ReturnStatement),
    Declaration(Declaration),
    Compound(Vec<Statement>),
    Empty,
    If(Box<IfStatement>),
    While(Box<WhileStatement>),
    DoWhile(Box<DoWhileStatement>),
    LoopCtrl(LoopCtrl),
    /// Expression statement; the pushed value is discarded
    Expression(Expression),
    For(Box<ForStatement>),
    Foreach(Box<ForeachStatement>),
}

#[derive(Debug, Clone)]
pub struct ReturnStatement {
    pub return_token: Token,
    pub expr: Option<Expression>,
}

#[derive(Debug, Clone)]
pub struct IfStatement {
    pub test: Expression,
    pub then_branch: Statement,
    pub else_branch: Option<Statement>,
}

#[derive(Debug, Clone)]
pub struct WhileStatement {
    pub test: Expression,
    pub body: Statement,
}

#[derive(Debug, Clone)]
pub struct DoWhileStatement {
    pub body: Statement,
    pub test: Expression,
}

#[derive(Debug, Clone)]
pub struct ForStatement {
    pub init: Statement,
    pub test: Expression,
    pub step: Expression,
    pub body: Statement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopCtrlKind {
    Break,
    Continue,
}

#[derive(Debug, Clone)]
pub struct LoopCtrl {
    pub token: Token,
    pub kind: LoopCtrlKind,
}

#[derive(Debug, Clone)]
pub struct ForeachStatement {
    /// Explicit element type, when written
    pub declared_type: Option<Type>,
    pub loop_ident: Ident,
    pub by_ref: bool,
    pub array: Expression,
    pub body: Statement,
    // desugaring products, filled by the semantic pass
    pub counter_slot: u32,
    pub loop_var_decl: Option<VariableDeclaration>,
    pub loop_assignment: Option<Assignment>,
}

#[derive(Debug, Clone)]
pub enum Declaration {
    Variable(VariableDeclaration),
    Typedef(TypedefDeclaration),
    Struct(StructDeclaration),
}

#[derive(Debug, Clone)]
pub struct VariableDeclaration {
    pub ty: Type,
    pub name: Token,
    pub slot: u32,
    pub global: bool,
    pub init: Option<Box<Assignment>>,
}

#[derive(Debug, Clone)]
pub struct TypedefDeclaration {
    pub ty: Type,
    pub name: Token,
}

#[derive(Debug, Clone)]
pub struct StructDeclaration {
    pub name: Token,
    pub ty: Type,
}

#[derive(Debug, Clone)]
pub struct Parameter {
    pub ty: Type,
    pub name: Token,
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: Token,
    pub signature: Rc<FunctionSignature>,
    pub is_operator_overload: bool,
    pub overloaded_op: Option<Op>,
    pub params: Vec<Parameter>,
    pub body: Vec<Statement>,
    pub locals: Vec<LocalVariable>,
    /// Overloads emit under their mangled symbol
    pub mangled_name: Option<Rc<str>>,
}

impl Function {
    /// The label this function's code is emitted under.
    pub fn emit_name(&self) -> Rc<str> {
        match &self.mangled_name {
            Some(mangled) => Rc::clone(mangled),
            None => self.source_name(),
        }
    }

    /// Function name as written in source. Falls back to the token's own
    /// text for synthesized name tokens.
    pub fn source_name(&self) -> Rc<str> {
        match &self.name.kind {
            crate::token::TokenKind::Ident(name) => Rc::clone(name),
            _ => self.name.span.text().into(),
        }
    }
}

#[derive(Debug, Default)]
pub struct Program {
    pub functions: Vec<Function>,
    pub global_declarations: Vec<Declaration>,
    pub globals: Vec<GlobalVariable>,
    pub strings: RefCell<Interner>,
}

impl Program {
    pub fn new() -> Self {
        Program::default()
    }

    /// Find a user function by source name. Operator overloads are not
    /// callable by name.
    pub fn find_function(&self, name: &str) -> Option<&Function> {
        self.functions
            .iter()
            .find(|f| !f.is_operator_overload && &*f.source_name() == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::TokenKind;

    fn ident_prim(name: &str) -> PrimaryExpr {
        let tok = Token::new(TokenKind::Ident(name.into()), Span::synthetic());
        PrimaryExpr::new(PrimKind::Ident(Ident::unresolved(tok)), Span::synthetic())
    }

    #[test]
    fn test_is_lvalue() {
        assert!(ident_prim("x").is_lvalue());

        let sub = PrimaryExpr::new(
            PrimKind::Subscript(ArraySubscript {
                bracket: Token::new(TokenKind::LBracket, Span::synthetic()),
                array: Box::new(ident_prim("a")),
                index: Box::new(Expression::primary(ident_prim("i"))),
            }),
            Span::synthetic(),
        );
        assert!(sub.is_lvalue());

        let call = PrimaryExpr::new(
            PrimKind::Call(FunctionCall {
                callee: Box::new(ident_prim("f")),
                args: Vec::new(),
                indirect: false,
                builtin: None,
                signature: None,
            }),
            Span::synthetic(),
        );
        assert!(!call.is_lvalue());

        let null = PrimaryExpr::new(PrimKind::NullLit, Span::synthetic());
        assert!(!null.is_lvalue());
    }

    #[test]
    fn test_find_function_skips_overloads() {
        let mut program = Program::new();
        let sig = Rc::new(FunctionSignature {
            ret_type: untyped(),
            params: Vec::new(),
        });
        program.functions.push(Function {
            name: Token::new(TokenKind::Ident("main".into()), Span::synthetic()),
            signature: Rc::clone(&sig),
            is_operator_overload: false,
            overloaded_op: None,
            params: Vec::new(),
            body: Vec::new(),
            locals: Vec::new(),
            mangled_name: None,
        });
        program.functions.push(Function {
            name: Token::new(TokenKind::Ident("operator".into()), Span::synthetic()),
            signature: sig,
            is_operator_overload: true,
            overloaded_op: Some(Op::Add),
            params: Vec::new(),
            body: Vec::new(),
            locals: Vec::new(),
            mangled_name: None,
        });

        assert!(program.find_function("main").is_some());
        assert!(program.find_function("operator").is_none());
    }
}
