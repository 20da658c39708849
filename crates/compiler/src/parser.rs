//! Recursive-descent parser
//!
//! Binary operators use precedence climbing over the operator table; the
//! ternary operator sits below the whole cascade and compound assignments
//! desugar while parsing. Two constructs are ambiguous by one symbol (a
//! top-level declaration vs. a function definition, `sizeof(type)` vs.
//! `sizeof(expr)`, and casts vs. parenthesized expressions); those parse
//! speculatively inside anchored scopes and rewind the token cursor on
//! failure. Outside an anchor, a failed `expect` is a fatal diagnostic.

use crate::ast::*;
use crate::builtins;
use crate::diagnostics::{CompileError, Diagnostic};
use crate::operators::Op;
use crate::token::{Span, Token, TokenKind};
use crate::types::{BaseType, FunctionSignature, StructField, Type, TypeTable};
use std::rc::Rc;

/// Parser-internal error: `recoverable` errors rewind to the innermost
/// anchor instead of aborting the compilation.
#[derive(Debug)]
struct ParseError {
    diag: Diagnostic,
    recoverable: bool,
}

type PResult<T> = Result<T, ParseError>;

impl From<ParseError> for CompileError {
    fn from(err: ParseError) -> Self {
        err.diag.into()
    }
}

pub struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    types: &'a mut TypeTable,
    /// Depth of active rewind anchors
    anchors: u32,
    program: Program,
}

/// Parse a token stream (terminated by an EOF token) into a program.
/// Struct and typedef declarations register into the type table as they are
/// parsed, so later types can refer to them.
pub fn parse_program(
    tokens: Vec<Token>,
    types: &mut TypeTable,
) -> Result<Program, CompileError> {
    let mut parser = Parser {
        tokens,
        pos: 0,
        types,
        anchors: 0,
        program: Program::new(),
    };
    parser.parse_top_level()?;
    Ok(parser.program)
}

impl<'a> Parser<'a> {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_at(&self, offset: usize) -> &Token {
        let idx = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[idx]
    }

    fn prev_span(&self) -> Span {
        if self.pos == 0 {
            self.peek().span.clone()
        } else {
            self.tokens[self.pos - 1].span.clone()
        }
    }

    fn at_eof(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn error(&self, span: Span, message: impl Into<String>) -> ParseError {
        ParseError {
            diag: Diagnostic::error(span, message),
            recoverable: self.anchors > 0,
        }
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(&self.peek().kind) == std::mem::discriminant(kind)
    }

    fn accept(&mut self, kind: &TokenKind) -> Option<Token> {
        if self.check(kind) {
            Some(self.advance())
        } else {
            None
        }
    }

    fn expect(&mut self, kind: &TokenKind) -> PResult<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            let got = self.peek();
            Err(self.error(
                got.span.clone(),
                format!("expected {}, got {}", kind.describe(), got.kind.describe()),
            ))
        }
    }

    fn expect_ident(&mut self) -> PResult<Token> {
        match &self.peek().kind {
            TokenKind::Ident(_) => Ok(self.advance()),
            other => {
                let msg = format!("expected identifier, got {}", other.describe());
                let span = self.peek().span.clone();
                Err(self.error(span, msg))
            }
        }
    }

    fn check_op(&self, op: Op) -> bool {
        matches!(self.peek().kind, TokenKind::Op(o) if o == op)
    }

    fn accept_op(&mut self, op: Op) -> Option<Token> {
        if self.check_op(op) {
            Some(self.advance())
        } else {
            None
        }
    }

    fn expect_op(&mut self, op: Op) -> PResult<Token> {
        if self.check_op(op) {
            Ok(self.advance())
        } else {
            let got = self.peek();
            Err(self.error(
                got.span.clone(),
                format!(
                    "expected '{}', got {}",
                    op.info().symbol,
                    got.kind.describe()
                ),
            ))
        }
    }

    /// Run a speculative parse. On a recoverable failure the cursor rewinds
    /// to where it was and `None` is returned.
    fn try_parse<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> PResult<T>,
    ) -> PResult<Option<T>> {
        let snapshot = self.pos;
        self.anchors += 1;
        let result = f(self);
        self.anchors -= 1;
        match result {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.recoverable => {
                self.pos = snapshot;
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    // ------------------------------------------------------------------
    // top level
    // ------------------------------------------------------------------

    fn parse_top_level(&mut self) -> Result<(), CompileError> {
        while !self.at_eof() {
            match &self.peek().kind {
                TokenKind::Typedef => {
                    let decl = self.parse_typedef()?;
                    self.program
                        .global_declarations
                        .push(Declaration::Typedef(decl));
                }
                TokenKind::Struct => {
                    let decl = self.parse_struct_declaration()?;
                    self.program
                        .global_declarations
                        .push(Declaration::Struct(decl));
                }
                _ => {
                    // one-symbol ambiguity: declaration vs. function
                    let header = self.try_parse(|p| p.parse_function_header())?;
                    if let Some(header) = header {
                        let func = self.parse_function_rest(header)?;
                        self.program.functions.push(func);
                    } else {
                        let var = self.parse_variable_declaration()?;
                        self.expect(&TokenKind::Semicolon)?;
                        self.program
                            .global_declarations
                            .push(Declaration::Variable(var));
                    }
                }
            }
        }
        Ok(())
    }

    /// Return type, name (or `operator` + operator token), opening paren.
    fn parse_function_header(&mut self) -> PResult<(Type, Token, Option<Op>)> {
        let ret_type = self.parse_type()?;

        let (name, op) = if self.peek().is_ident("operator") {
            let name = self.advance();
            let op_tok = self.advance();
            let op = match op_tok.kind {
                TokenKind::Op(op) => op,
                _ => {
                    return Err(self.error(
                        op_tok.span,
                        "expected an operator after 'operator'",
                    ));
                }
            };
            (name, Some(op))
        } else {
            (self.expect_ident()?, None)
        };

        self.expect(&TokenKind::LParen)?;
        Ok((ret_type, name, op))
    }

    fn parse_function_rest(
        &mut self,
        (ret_type, name, overloaded_op): (Type, Token, Option<Op>),
    ) -> Result<Function, CompileError> {
        let mut params = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                let ty = self.parse_type()?;
                let pname = self.expect_ident()?;
                params.push(Parameter { ty, name: pname });
                if self.accept(&TokenKind::Comma).is_none() {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen)?;

        self.expect(&TokenKind::LBrace)?;
        let mut body = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            if self.at_eof() {
                return Err(self
                    .error(self.peek().span.clone(), "unexpected end of file in function")
                    .into());
            }
            body.push(self.parse_statement()?);
        }
        self.expect(&TokenKind::RBrace)?;

        let signature = Rc::new(FunctionSignature {
            ret_type,
            params: params.iter().map(|p| p.ty.clone()).collect(),
        });
        Ok(Function {
            name,
            signature,
            is_operator_overload: overloaded_op.is_some(),
            overloaded_op,
            params,
            body,
            locals: Vec::new(),
            mangled_name: None,
        })
    }

    fn parse_typedef(&mut self) -> Result<TypedefDeclaration, CompileError> {
        self.expect(&TokenKind::Typedef)?;
        let ty = self.parse_type()?;
        let name = self.expect_ident()?;
        self.expect(&TokenKind::Semicolon)?;
        let alias = name.ident_text().expect("identifier");
        self.types.add_typedef(alias, ty.clone());
        Ok(TypedefDeclaration { ty, name })
    }

    fn parse_struct_declaration(&mut self) -> Result<StructDeclaration, CompileError> {
        self.expect(&TokenKind::Struct)?;
        let name = self.expect_ident()?;
        let name_text = name.ident_text().expect("identifier").to_string();
        let ty = self.types.forward_declare(&name_text);

        // bare forward declaration
        if self.accept(&TokenKind::Semicolon).is_some() {
            return Ok(StructDeclaration { name, ty });
        }

        self.expect(&TokenKind::LBrace)?;
        let mut fields = Vec::new();
        let mut offset = 0usize;
        while !self.check(&TokenKind::RBrace) {
            let field_type = self.parse_type()?;
            let field_name = self.expect_ident()?;
            self.expect(&TokenKind::Semicolon)?;

            let size = self.types.size_of(&field_type).ok_or_else(|| {
                self.error(
                    field_name.span.clone(),
                    format!(
                        "field '{}' has incomplete type",
                        field_name.span.text()
                    ),
                )
            })?;
            fields.push(StructField {
                name: Rc::clone(field_name.ident_text().expect("identifier")),
                ty: field_type,
                size,
                offset,
            });
            offset += size;
        }
        self.expect(&TokenKind::RBrace)?;
        self.expect(&TokenKind::Semicolon)?;

        self.types.complete_struct(&ty, fields, offset);
        Ok(StructDeclaration { name, ty })
    }

    fn parse_variable_declaration(&mut self) -> PResult<VariableDeclaration> {
        let ty = self.parse_type()?;
        if ty.is_basic(BaseType::Void) {
            return Err(self.error(
                self.peek().span.clone(),
                "a variable cannot have the type 'void'",
            ));
        }
        let name = self.expect_ident()?;

        let init = if let Some(eq) = self.accept(&TokenKind::Assign) {
            let value = self.parse_expression()?;
            let target = PrimaryExpr::new(
                PrimKind::Ident(Ident::unresolved(name.clone())),
                name.span.clone(),
            );
            Some(Box::new(Assignment {
                target,
                value,
                eq_token: eq,
                discard_result: true,
            }))
        } else {
            None
        };

        Ok(VariableDeclaration {
            ty,
            name,
            slot: 0,
            global: false,
            init,
        })
    }

    // ------------------------------------------------------------------
    // types
    // ------------------------------------------------------------------

    /// Base name, then postfix declarators left-to-right: `*`, `?`,
    /// `[expr?]`; a `(type, ...)` suffix turns the whole prefix into a
    /// function type's return type.
    fn parse_type(&mut self) -> PResult<Type> {
        let base_tok = self.expect_ident()?;
        let base_name = base_tok.ident_text().expect("identifier");
        let mut ty = self.types.lookup(base_name).ok_or_else(|| {
            self.error(
                base_tok.span.clone(),
                format!("invalid type '{}'", base_name),
            )
        })?;

        loop {
            if self.accept_op(Op::Mul).is_some() {
                ty = Type::pointer_to(ty);
            } else if self.accept(&TokenKind::Question).is_some() {
                ty = Type::optional_of(ty);
            } else if self.check(&TokenKind::LBracket) {
                self.advance();
                if self.accept(&TokenKind::RBracket).is_some() {
                    ty = append_array(ty, None);
                } else {
                    let size = self.parse_expression()?;
                    self.expect(&TokenKind::RBracket)?;
                    ty = append_array(ty, Some(size));
                }
            } else if self.check(&TokenKind::LParen) {
                self.advance();
                let mut params = Vec::new();
                if !self.check(&TokenKind::RParen) {
                    loop {
                        params.push(self.parse_type()?);
                        if self.accept(&TokenKind::Comma).is_none() {
                            break;
                        }
                    }
                }
                self.expect(&TokenKind::RParen)?;
                ty = Type::Function(Rc::new(FunctionSignature {
                    ret_type: ty,
                    params,
                }));
            } else {
                break;
            }
        }
        Ok(ty)
    }

    // ------------------------------------------------------------------
    // statements
    // ------------------------------------------------------------------

    fn parse_statement(&mut self) -> PResult<Statement> {
        match self.peek().kind.clone() {
            TokenKind::Semicolon => {
                self.advance();
                Ok(Statement::Empty)
            }
            TokenKind::LBrace => {
                self.advance();
                let mut statements = Vec::new();
                while !self.check(&TokenKind::RBrace) {
                    if self.at_eof() {
                        return Err(self.error(
                            self.peek().span.clone(),
                            "unexpected end of file in block",
                        ));
                    }
                    statements.push(self.parse_statement()?);
                }
                self.advance();
                Ok(Statement::Compound(statements))
            }
            TokenKind::If => self.parse_if_statement(),
            TokenKind::While => self.parse_while_statement(),
            TokenKind::Do => self.parse_do_while_statement(),
            TokenKind::For => self.parse_for_statement(),
            TokenKind::Foreach => self.parse_foreach_statement(),
            TokenKind::Return => {
                let return_token = self.advance();
                let expr = if self.check(&TokenKind::Semicolon) {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                self.expect(&TokenKind::Semicolon)?;
                Ok(Statement::Return(ReturnStatement { return_token, expr }))
            }
            TokenKind::Break => {
                let token = self.advance();
                self.expect(&TokenKind::Semicolon)?;
                Ok(Statement::LoopCtrl(LoopCtrl {
                    token,
                    kind: LoopCtrlKind::Break,
                }))
            }
            TokenKind::Continue => {
                let token = self.advance();
                self.expect(&TokenKind::Semicolon)?;
                Ok(Statement::LoopCtrl(LoopCtrl {
                    token,
                    kind: LoopCtrlKind::Continue,
                }))
            }
            TokenKind::Typedef => {
                let decl = self.parse_typedef().map_err(|e| self.lift(e))?;
                Ok(Statement::Declaration(Declaration::Typedef(decl)))
            }
            TokenKind::Struct => {
                let decl = self.parse_struct_declaration().map_err(|e| self.lift(e))?;
                Ok(Statement::Declaration(Declaration::Struct(decl)))
            }
            TokenKind::Ident(name) if self.starts_declaration(&name) => {
                let var = self.parse_variable_declaration()?;
                self.expect(&TokenKind::Semicolon)?;
                Ok(Statement::Declaration(Declaration::Variable(var)))
            }
            _ => {
                let mut expr = self.parse_expression()?;
                if let ExprKind::Assignment(assign) = &mut expr.kind {
                    assign.discard_result = true;
                }
                self.expect(&TokenKind::Semicolon)?;
                Ok(Statement::Expression(expr))
            }
        }
    }

    fn lift(&self, err: CompileError) -> ParseError {
        match err {
            CompileError::Diag(diag) => ParseError {
                diag: *diag,
                recoverable: self.anchors > 0,
            },
            other => ParseError {
                diag: Diagnostic::error(self.peek().span.clone(), format!("{}", other)),
                recoverable: false,
            },
        }
    }

    /// A statement starting with a type name is a declaration, except when
    /// the name is a struct used as an initializer expression.
    fn starts_declaration(&self, name: &str) -> bool {
        let Some(ty) = self.types.lookup(name) else {
            return false;
        };
        // `point(1, 2);` is an expression statement; `point p;` and the
        // function-type declarator `int(int) f;` are declarations
        !(ty.is_struct() && matches!(self.peek_at(1).kind, TokenKind::LParen))
    }

    fn parse_if_statement(&mut self) -> PResult<Statement> {
        self.expect(&TokenKind::If)?;
        self.expect(&TokenKind::LParen)?;
        let test = self.parse_expression()?;
        self.expect(&TokenKind::RParen)?;
        let then_branch = self.parse_statement()?;
        let else_branch = if self.accept(&TokenKind::Else).is_some() {
            Some(self.parse_statement()?)
        } else {
            None
        };
        Ok(Statement::If(Box::new(IfStatement {
            test,
            then_branch,
            else_branch,
        })))
    }

    fn parse_while_statement(&mut self) -> PResult<Statement> {
        self.expect(&TokenKind::While)?;
        self.expect(&TokenKind::LParen)?;
        let test = self.parse_expression()?;
        self.expect(&TokenKind::RParen)?;
        let body = self.parse_statement()?;
        Ok(Statement::While(Box::new(WhileStatement { test, body })))
    }

    fn parse_do_while_statement(&mut self) -> PResult<Statement> {
        self.expect(&TokenKind::Do)?;
        let body = self.parse_statement()?;
        self.expect(&TokenKind::While)?;
        self.expect(&TokenKind::LParen)?;
        let test = self.parse_expression()?;
        self.expect(&TokenKind::RParen)?;
        self.expect(&TokenKind::Semicolon)?;
        Ok(Statement::DoWhile(Box::new(DoWhileStatement { body, test })))
    }

    fn parse_for_statement(&mut self) -> PResult<Statement> {
        self.expect(&TokenKind::For)?;
        self.expect(&TokenKind::LParen)?;
        let init = self.parse_statement()?; // consumes its ';'
        let test = self.parse_expression()?;
        self.expect(&TokenKind::Semicolon)?;
        let step = self.parse_expression()?;
        self.expect(&TokenKind::RParen)?;
        let body = self.parse_statement()?;
        Ok(Statement::For(Box::new(ForStatement {
            init,
            test,
            step,
            body,
        })))
    }

    /// `foreach ([ref] [T] x in e) stmt`
    fn parse_foreach_statement(&mut self) -> PResult<Statement> {
        self.expect(&TokenKind::Foreach)?;
        self.expect(&TokenKind::LParen)?;

        let by_ref = self.peek().is_ident("ref") && !self.peek_at(1).kind.eq(&TokenKind::Op(Op::In));
        if by_ref {
            self.advance();
        }

        // optional declared element type
        let typed = self.try_parse(|p| {
            let ty = p.parse_type()?;
            let name = p.expect_ident()?;
            if !p.check_op(Op::In) {
                return Err(p.error(p.peek().span.clone(), "expected 'in'"));
            }
            Ok((ty, name))
        })?;
        let (declared_type, name) = match typed {
            Some((ty, name)) => (Some(ty), name),
            None => (None, self.expect_ident()?),
        };

        self.expect_op(Op::In)?;
        let array = self.parse_expression()?;
        self.expect(&TokenKind::RParen)?;
        let body = self.parse_statement()?;

        Ok(Statement::Foreach(Box::new(ForeachStatement {
            declared_type,
            loop_ident: Ident::unresolved(name),
            by_ref,
            array,
            body,
            counter_slot: 0,
            loop_var_decl: None,
            loop_assignment: None,
        })))
    }

    // ------------------------------------------------------------------
    // expressions
    // ------------------------------------------------------------------

    fn parse_expression(&mut self) -> PResult<Expression> {
        let lhs = self.parse_binop_cascade(0)?;

        // ternary, lowest precedence
        if self.accept(&TokenKind::Question).is_some() {
            let true_branch = self.parse_expression()?;
            self.expect(&TokenKind::Colon)?;
            let false_branch = self.parse_expression()?;
            let span = lhs.span.to(&false_branch.span);
            return Ok(Expression {
                span,
                kind: ExprKind::Ternary(Box::new(TernaryExpr {
                    cond: lhs,
                    true_branch,
                    false_branch,
                })),
                value_type: untyped(),
                is_bool: false,
            });
        }

        // assignment, including compound forms
        let compound_op = match &self.peek().kind {
            TokenKind::Assign => Some(None),
            TokenKind::AddAssign => Some(Some(Op::Add)),
            TokenKind::SubAssign => Some(Some(Op::Sub)),
            TokenKind::MulAssign => Some(Some(Op::Mul)),
            TokenKind::DivAssign => Some(Some(Op::Div)),
            TokenKind::ModAssign => Some(Some(Op::Mod)),
            TokenKind::CatAssign => Some(Some(Op::Cat)),
            _ => None,
        };
        if let Some(op) = compound_op {
            let eq_token = self.advance();
            let target = match lhs.kind {
                ExprKind::Primary(prim) => *prim,
                _ => {
                    return Err(self.error(
                        lhs.span,
                        "assigned expression is not an lvalue",
                    ));
                }
            };
            let rhs = self.parse_expression()?;
            // `lhs OP= rhs` becomes `lhs = lhs OP rhs`
            let value = match op {
                None => rhs,
                Some(op) => {
                    let op_token = Token::new(TokenKind::Op(op), eq_token.span.clone());
                    let span = target.span.to(&rhs.span);
                    Expression {
                        span: span.clone(),
                        kind: ExprKind::Binop(Box::new(Binop {
                            op: op_token,
                            left: Expression::primary(target.clone()),
                            right: rhs,
                        })),
                        value_type: untyped(),
                        is_bool: false,
                    }
                }
            };
            let span = target.span.to(&value.span);
            return Ok(Expression {
                span,
                kind: ExprKind::Assignment(Box::new(Assignment {
                    target,
                    value,
                    eq_token,
                    discard_result: false,
                })),
                value_type: untyped(),
                is_bool: false,
            });
        }

        Ok(lhs)
    }

    fn parse_binop_cascade(&mut self, min_prec: i32) -> PResult<Expression> {
        let prim = self.parse_primary()?;
        let mut lhs = Expression::primary(prim);

        loop {
            let op = match &self.peek().kind {
                TokenKind::Op(op) if op.is_binary() => *op,
                _ => break,
            };
            if op.info().precedence < min_prec {
                break;
            }
            let op_token = self.advance();
            let rhs = self.parse_binop_cascade(op.info().precedence + 1)?;
            let span = lhs.span.to(&rhs.span);
            lhs = Expression {
                span,
                kind: ExprKind::Binop(Box::new(Binop {
                    op: op_token,
                    left: lhs,
                    right: rhs,
                })),
                value_type: untyped(),
                is_bool: false,
            };
        }
        Ok(lhs)
    }

    fn parse_primary(&mut self) -> PResult<PrimaryExpr> {
        let prim = self.parse_primary_prefix()?;
        self.parse_postfix(prim)
    }

    fn parse_primary_prefix(&mut self) -> PResult<PrimaryExpr> {
        let start = self.peek().span.clone();
        match self.peek().kind.clone() {
            TokenKind::LParen => {
                // cast or parenthesized expression
                let cast = self.try_parse(|p| {
                    let type_token = p.expect(&TokenKind::LParen)?;
                    let target_type = p.parse_type()?;
                    p.expect(&TokenKind::RParen)?;
                    let operand = p.parse_primary()?;
                    Ok((type_token, target_type, operand))
                })?;
                if let Some((type_token, target_type, operand)) = cast {
                    let span = start.to(&self.prev_span());
                    return Ok(PrimaryExpr::new(
                        PrimKind::Cast(CastExpr {
                            type_token,
                            target_type,
                            operand: Box::new(operand),
                        }),
                        span,
                    ));
                }
                self.advance();
                let expr = self.parse_expression()?;
                self.expect(&TokenKind::RParen)?;
                let span = start.to(&self.prev_span());
                Ok(PrimaryExpr::new(
                    PrimKind::Enclosed(Box::new(expr)),
                    span,
                ))
            }
            TokenKind::Op(Op::Inc) | TokenKind::Op(Op::Dec) => {
                // prefix increment desugars to `lhs = lhs +- 1`
                let op_tok = self.advance();
                let delta_op = if matches!(op_tok.kind, TokenKind::Op(Op::Inc)) {
                    Op::Add
                } else {
                    Op::Sub
                };
                let operand = self.parse_primary()?;
                let one = PrimaryExpr::new(
                    PrimKind::IntConst(Token::new(TokenKind::Int(1), op_tok.span.clone())),
                    op_tok.span.clone(),
                );
                let span = start.to(&self.prev_span());
                let value = Expression {
                    span: span.clone(),
                    kind: ExprKind::Binop(Box::new(Binop {
                        op: Token::new(TokenKind::Op(delta_op), op_tok.span.clone()),
                        left: Expression::primary(operand.clone()),
                        right: Expression::primary(one),
                    })),
                    value_type: untyped(),
                    is_bool: false,
                };
                let assignment = Expression {
                    span: span.clone(),
                    kind: ExprKind::Assignment(Box::new(Assignment {
                        target: operand,
                        value,
                        eq_token: op_tok,
                        discard_result: false,
                    })),
                    value_type: untyped(),
                    is_bool: false,
                };
                Ok(PrimaryExpr::new(
                    PrimKind::Enclosed(Box::new(assignment)),
                    span,
                ))
            }
            TokenKind::Op(Op::Mul) => {
                let star = self.advance();
                let pointer = self.parse_primary()?;
                let span = start.to(&self.prev_span());
                Ok(PrimaryExpr::new(
                    PrimKind::Deref(DerefExpr {
                        star,
                        is_optional_access: false,
                        pointer: Box::new(pointer),
                    }),
                    span,
                ))
            }
            TokenKind::Op(Op::BitAnd) => {
                let amp = self.advance();
                let operand = self.parse_primary()?;
                let span = start.to(&self.prev_span());
                Ok(PrimaryExpr::new(
                    PrimKind::AddrOf(AddrExpr {
                        amp,
                        operand: Box::new(operand),
                        addressed_function: None,
                    }),
                    span,
                ))
            }
            TokenKind::Op(Op::Add)
            | TokenKind::Op(Op::Sub)
            | TokenKind::Op(Op::LogicNot)
            | TokenKind::Op(Op::Cat) => {
                let op = self.advance();
                let operand = self.parse_primary()?;
                let span = start.to(&self.prev_span());
                Ok(PrimaryExpr::new(
                    PrimKind::Unary(UnaryExpr {
                        op,
                        operand: Box::new(operand),
                    }),
                    span,
                ))
            }
            TokenKind::Question => {
                // optional-presence test `?expr`
                let op = self.advance();
                let operand = self.parse_primary()?;
                let span = start.to(&self.prev_span());
                Ok(PrimaryExpr::new(
                    PrimKind::Unary(UnaryExpr {
                        op,
                        operand: Box::new(operand),
                    }),
                    span,
                ))
            }
            TokenKind::Op(Op::Mod) => {
                // random expression: %e or %l..r
                self.advance();
                let first = self.parse_primary()?;
                if self.accept(&TokenKind::DotDot).is_some() {
                    let right = self.parse_primary()?;
                    let span = start.to(&self.prev_span());
                    Ok(PrimaryExpr::new(
                        PrimKind::Random(RandomExpr::Range {
                            left: Box::new(first),
                            right: Box::new(right),
                        }),
                        span,
                    ))
                } else {
                    let span = start.to(&self.prev_span());
                    Ok(PrimaryExpr::new(
                        PrimKind::Random(RandomExpr::Single {
                            operand: Box::new(first),
                            mode: RandMode::Int,
                        }),
                        span,
                    ))
                }
            }
            TokenKind::Null => {
                self.advance();
                Ok(PrimaryExpr::new(PrimKind::NullLit, start))
            }
            TokenKind::Asm => self.parse_asm_expr(),
            TokenKind::Sizeof => self.parse_sizeof_expr(),
            TokenKind::New => {
                self.advance();
                let ty = self.parse_type()?;
                let span = start.to(&self.prev_span());
                Ok(PrimaryExpr::new(
                    PrimKind::New(NewExpr {
                        span: span.clone(),
                        ty,
                    }),
                    span,
                ))
            }
            TokenKind::Match => self.parse_match_expr(),
            TokenKind::LBrace => {
                // array literal {e, ...}
                self.advance();
                let mut elements = Vec::new();
                if !self.check(&TokenKind::RBrace) {
                    loop {
                        elements.push(self.parse_expression()?);
                        if self.accept(&TokenKind::Comma).is_none() {
                            break;
                        }
                    }
                }
                self.expect(&TokenKind::RBrace)?;
                let span = start.to(&self.prev_span());
                Ok(PrimaryExpr::new(
                    PrimKind::ArrayLit(ArrayLit {
                        span: span.clone(),
                        elements,
                        ty: untyped(),
                    }),
                    span,
                ))
            }
            TokenKind::LBracket => {
                // range generator [a..b]
                self.advance();
                let left = self.parse_primary()?;
                self.expect(&TokenKind::DotDot)?;
                let right = self.parse_primary()?;
                self.expect(&TokenKind::RBracket)?;
                let span = start.to(&self.prev_span());
                Ok(PrimaryExpr::new(
                    PrimKind::RangeGen(ArrayRange {
                        left: Box::new(left),
                        right: Box::new(right),
                    }),
                    span,
                ))
            }
            TokenKind::Ident(name) => {
                // struct initializer when the name denotes a struct type
                let is_struct_init = self
                    .types
                    .lookup(&name)
                    .is_some_and(|ty| ty.is_struct())
                    && self.peek_at(1).kind == TokenKind::LParen;
                if is_struct_init {
                    let ty = self.types.lookup(&name).expect("struct type");
                    self.advance();
                    self.advance(); // '('
                    let mut args = Vec::new();
                    if !self.check(&TokenKind::RParen) {
                        loop {
                            args.push(self.parse_expression()?);
                            if self.accept(&TokenKind::Comma).is_none() {
                                break;
                            }
                        }
                    }
                    self.expect(&TokenKind::RParen)?;
                    let span = start.to(&self.prev_span());
                    return Ok(PrimaryExpr::new(
                        PrimKind::StructInit(StructInit {
                            span: span.clone(),
                            ty,
                            args,
                        }),
                        span,
                    ));
                }
                let tok = self.advance();
                Ok(PrimaryExpr::new(
                    PrimKind::Ident(Ident::unresolved(tok)),
                    start,
                ))
            }
            TokenKind::Int(_) => {
                let tok = self.advance();
                Ok(PrimaryExpr::new(PrimKind::IntConst(tok), start))
            }
            TokenKind::Float(_) => {
                let tok = self.advance();
                Ok(PrimaryExpr::new(PrimKind::FloatConst(tok), start))
            }
            TokenKind::Str(_) => {
                let tok = self.advance();
                Ok(PrimaryExpr::new(PrimKind::StrLit(tok), start))
            }
            other => Err(self.error(
                start,
                format!("expected expression, got {}", other.describe()),
            )),
        }
    }

    fn parse_asm_expr(&mut self) -> PResult<PrimaryExpr> {
        let start = self.peek().span.clone();
        self.expect(&TokenKind::Asm)?;
        self.expect(&TokenKind::LParen)?;
        let code_tok = self.expect(&TokenKind::Str("".into()))?;
        let code = match &code_tok.kind {
            TokenKind::Str(s) => Rc::clone(s),
            _ => unreachable!(),
        };
        let mut args = Vec::new();
        while self.accept(&TokenKind::Comma).is_some() {
            args.push(self.parse_expression()?);
        }
        let ret_type = if self.accept(&TokenKind::Colon).is_some() {
            self.parse_type()?
        } else {
            Type::Basic(BaseType::Void)
        };
        self.expect(&TokenKind::RParen)?;
        let span = start.to(&self.prev_span());
        Ok(PrimaryExpr::new(
            PrimKind::InlineAsm(AsmExpr {
                code,
                args,
                ret_type,
            }),
            span,
        ))
    }

    fn parse_sizeof_expr(&mut self) -> PResult<PrimaryExpr> {
        let start = self.peek().span.clone();
        self.expect(&TokenKind::Sizeof)?;
        self.expect(&TokenKind::LParen)?;

        // sizeof(type) wins over sizeof(expr) when both parse
        let ty = self.try_parse(|p| {
            let ty = p.parse_type()?;
            p.expect(&TokenKind::RParen)?;
            Ok(ty)
        })?;
        let sizeof = if let Some(ty) = ty {
            SizeofExpr {
                span: start.clone(),
                expr: None,
                ty,
            }
        } else {
            let expr = self.parse_expression()?;
            self.expect(&TokenKind::RParen)?;
            SizeofExpr {
                span: start.clone(),
                expr: Some(expr),
                ty: untyped(),
            }
        };
        let span = start.to(&self.prev_span());
        Ok(PrimaryExpr::new(PrimKind::Sizeof(Box::new(sizeof)), span))
    }

    /// `match (e) { pat|pat => expr, ..., _ => expr }`
    fn parse_match_expr(&mut self) -> PResult<PrimaryExpr> {
        let start = self.peek().span.clone();
        self.expect(&TokenKind::Match)?;
        self.expect(&TokenKind::LParen)?;
        let scrutinee = self.parse_expression()?;
        self.expect(&TokenKind::RParen)?;
        self.expect(&TokenKind::LBrace)?;

        let mut cases = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            let case_start = self.peek().span.clone();
            let is_wildcard = self.peek().is_ident("_");
            let mut patterns = Vec::new();
            if is_wildcard {
                self.advance();
            } else {
                loop {
                    patterns.push(self.parse_match_pattern()?);
                    if self.accept_op(Op::BitOr).is_none() {
                        break;
                    }
                }
            }
            self.expect(&TokenKind::FatArrow)?;
            let expr = self.parse_expression()?;
            let span = case_start.to(&self.prev_span());
            cases.push(MatchCase {
                is_wildcard,
                patterns,
                expr,
                value_type: untyped(),
                span,
            });
            if self.accept(&TokenKind::Comma).is_none() {
                break;
            }
        }
        self.expect(&TokenKind::RBrace)?;

        let span = start.to(&self.prev_span());
        Ok(PrimaryExpr::new(
            PrimKind::Match(MatchExpr {
                scrutinee: Box::new(scrutinee),
                cases,
                test_slot: 0,
            }),
            span,
        ))
    }

    fn parse_match_pattern(&mut self) -> PResult<MatchPattern> {
        let start = self.peek().span.clone();
        match self.peek().kind.clone() {
            TokenKind::Int(_) => {
                let left = self.advance();
                if self.accept(&TokenKind::DotDot).is_some() {
                    let right = self.expect(&TokenKind::Int(0))?;
                    let span = start.to(&self.prev_span());
                    Ok(MatchPattern {
                        kind: PatternKind::Range(left, right),
                        value_type: untyped(),
                        span,
                    })
                } else {
                    Ok(MatchPattern {
                        kind: PatternKind::IntLit(left),
                        value_type: untyped(),
                        span: start,
                    })
                }
            }
            TokenKind::Str(_) => {
                let tok = self.advance();
                Ok(MatchPattern {
                    kind: PatternKind::StrLit(tok),
                    value_type: untyped(),
                    span: start,
                })
            }
            TokenKind::Ident(_) => {
                let tok = self.advance();
                Ok(MatchPattern {
                    kind: PatternKind::Ident(Ident::unresolved(tok)),
                    value_type: untyped(),
                    span: start,
                })
            }
            other => Err(self.error(
                start,
                format!("expected match pattern, got {}", other.describe()),
            )),
        }
    }

    fn parse_postfix(&mut self, mut prim: PrimaryExpr) -> PResult<PrimaryExpr> {
        loop {
            match self.peek().kind.clone() {
                TokenKind::LBracket => {
                    let bracket = self.advance();
                    let first = self.parse_expression()?;
                    if self.accept(&TokenKind::DotDot).is_some() {
                        let right = self.parse_expression()?;
                        self.expect(&TokenKind::RBracket)?;
                        let span = prim.span.to(&self.prev_span());
                        prim = PrimaryExpr::new(
                            PrimKind::Slice(ArraySlice {
                                bracket,
                                array: Box::new(prim),
                                left: Box::new(first),
                                right: Box::new(right),
                            }),
                            span,
                        );
                    } else {
                        self.expect(&TokenKind::RBracket)?;
                        let span = prim.span.to(&self.prev_span());
                        prim = PrimaryExpr::new(
                            PrimKind::Subscript(ArraySubscript {
                                bracket,
                                array: Box::new(prim),
                                index: Box::new(first),
                            }),
                            span,
                        );
                    }
                }
                TokenKind::Dot => {
                    self.advance();
                    let field_name = self.expect_ident()?;
                    let fname = field_name.ident_text().expect("identifier");

                    // UFCS: a.f(b) is f(a, b) when f names a function or builtin
                    let is_callable = self.program.find_function(fname).is_some()
                        || builtins::find_builtin(fname).is_some();
                    if is_callable && self.check(&TokenKind::LParen) {
                        self.advance();
                        let mut args = vec![Expression::primary(prim)];
                        if !self.check(&TokenKind::RParen) {
                            loop {
                                args.push(self.parse_expression()?);
                                if self.accept(&TokenKind::Comma).is_none() {
                                    break;
                                }
                            }
                        }
                        self.expect(&TokenKind::RParen)?;
                        let span = args[0].span.to(&self.prev_span());
                        let callee = PrimaryExpr::new(
                            PrimKind::Ident(Ident::unresolved(field_name)),
                            span.clone(),
                        );
                        prim = PrimaryExpr::new(
                            PrimKind::Call(FunctionCall {
                                callee: Box::new(callee),
                                args,
                                indirect: false,
                                builtin: None,
                                signature: None,
                            }),
                            span,
                        );
                    } else {
                        let span = prim.span.to(&field_name.span);
                        prim = PrimaryExpr::new(
                            PrimKind::FieldAccess(StructAccess {
                                base: Box::new(prim),
                                indirect: false,
                                field_name,
                                field: None,
                            }),
                            span,
                        );
                    }
                }
                TokenKind::Arrow => {
                    self.advance();
                    let field_name = self.expect_ident()?;
                    let span = prim.span.to(&field_name.span);
                    prim = PrimaryExpr::new(
                        PrimKind::FieldAccess(StructAccess {
                            base: Box::new(prim),
                            indirect: true,
                            field_name,
                            field: None,
                        }),
                        span,
                    );
                }
                TokenKind::LParen => {
                    self.advance();
                    let mut args = Vec::new();
                    if !self.check(&TokenKind::RParen) {
                        loop {
                            args.push(self.parse_expression()?);
                            if self.accept(&TokenKind::Comma).is_none() {
                                break;
                            }
                        }
                    }
                    self.expect(&TokenKind::RParen)?;
                    let span = prim.span.to(&self.prev_span());
                    prim = PrimaryExpr::new(
                        PrimKind::Call(FunctionCall {
                            callee: Box::new(prim),
                            args,
                            indirect: false,
                            builtin: None,
                            signature: None,
                        }),
                        span,
                    );
                }
                _ => break,
            }
        }
        Ok(prim)
    }
}

/// Array declarators nest so the leftmost bracket is the outermost
/// dimension: `int[3][4]` is three rows of four ints.
fn append_array(ty: Type, size: Option<Expression>) -> Type {
    match ty {
        Type::Array(mut arr) => {
            arr.element = append_array(arr.element, size);
            Type::Array(arr)
        }
        other => Type::array_of(other, size),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocessor::{Preprocessor, tokenize_program};

    fn parse(source: &str) -> Program {
        let mut pp = Preprocessor::new(Vec::new());
        let tokens = tokenize_program(source, "test.opl", &mut pp).expect("lex");
        let mut types = TypeTable::new();
        parse_program(tokens, &mut types).expect("parse")
    }

    fn parse_err(source: &str) -> String {
        let mut pp = Preprocessor::new(Vec::new());
        let tokens = match tokenize_program(source, "test.opl", &mut pp) {
            Ok(tokens) => tokens,
            Err(e) => return format!("{}", e),
        };
        let mut types = TypeTable::new();
        match parse_program(tokens, &mut types) {
            Ok(_) => panic!("expected parse error"),
            Err(e) => format!("{}", e),
        }
    }

    #[test]
    fn test_function_and_globals() {
        let program = parse("int counter = 0;\nint main() { return 0; }\n");
        assert_eq!(program.functions.len(), 1);
        assert_eq!(program.global_declarations.len(), 1);
        assert_eq!(&*program.functions[0].source_name(), "main");
    }

    #[test]
    fn test_precedence_shape() {
        let program = parse("int main() { return 1 + 2 * 3; }");
        let body = &program.functions[0].body;
        let Statement::Return(ret) = &body[0] else {
            panic!("expected return");
        };
        let ExprKind::Binop(add) = &ret.expr.as_ref().unwrap().kind else {
            panic!("expected binop");
        };
        assert_eq!(add.operator(), Op::Add);
        let ExprKind::Binop(mul) = &add.right.kind else {
            panic!("expected '*' on the right");
        };
        assert_eq!(mul.operator(), Op::Mul);
    }

    #[test]
    fn test_left_associativity() {
        let program = parse("int main() { return 10 - 3 - 2; }");
        let Statement::Return(ret) = &program.functions[0].body[0] else {
            panic!();
        };
        let ExprKind::Binop(outer) = &ret.expr.as_ref().unwrap().kind else {
            panic!();
        };
        // (10 - 3) - 2
        assert_eq!(outer.operator(), Op::Sub);
        assert!(matches!(outer.left.kind, ExprKind::Binop(_)));
    }

    #[test]
    fn test_compound_assignment_desugars() {
        let program = parse("int main() { int x = 1; x += 2; return x; }");
        let Statement::Expression(expr) = &program.functions[0].body[1] else {
            panic!("expected expression statement");
        };
        let ExprKind::Assignment(assign) = &expr.kind else {
            panic!("expected assignment");
        };
        assert!(assign.discard_result);
        let ExprKind::Binop(binop) = &assign.value.kind else {
            panic!("expected desugared binop");
        };
        assert_eq!(binop.operator(), Op::Add);
    }

    #[test]
    fn test_ternary() {
        let program = parse("int main() { return 1 ? 2 : 3; }");
        let Statement::Return(ret) = &program.functions[0].body[0] else {
            panic!();
        };
        assert!(matches!(
            ret.expr.as_ref().unwrap().kind,
            ExprKind::Ternary(_)
        ));
    }

    #[test]
    fn test_struct_declaration_registers_type() {
        let program = parse("struct point { int x; int y; };\npoint make() { point p; return p; }");
        let Declaration::Struct(_) = &program.global_declarations[0] else {
            panic!("expected struct declaration");
        };
        assert_eq!(program.functions.len(), 1);
    }

    #[test]
    fn test_struct_initializer() {
        let program = parse("struct point { int x; int y; };\nint main() { point p = point(1, 2); return 0; }");
        let Statement::Declaration(Declaration::Variable(var)) = &program.functions[0].body[0]
        else {
            panic!();
        };
        let init = var.init.as_ref().unwrap();
        let ExprKind::Primary(prim) = &init.value.kind else {
            panic!();
        };
        assert!(matches!(prim.kind, PrimKind::StructInit(_)));
    }

    #[test]
    fn test_type_declarators() {
        let program = parse("int main() { int* p; int?[] q; str[3] names; return 0; }");
        let Statement::Declaration(Declaration::Variable(var)) = &program.functions[0].body[0]
        else {
            panic!();
        };
        assert!(matches!(var.ty, Type::Pointer(_)));
    }

    #[test]
    fn test_function_type_declarator() {
        let program = parse("int apply(int(int) f, int x) { return f(x); }");
        let param_ty = &program.functions[0].params[0].ty;
        assert!(matches!(param_ty, Type::Function(_)));
    }

    #[test]
    fn test_sizeof_type_vs_expr() {
        let program = parse("int main() { int x = 0; return sizeof(int) + sizeof(x + 1); }");
        let Statement::Return(ret) = &program.functions[0].body[1] else {
            panic!();
        };
        let ExprKind::Binop(add) = &ret.expr.as_ref().unwrap().kind else {
            panic!();
        };
        let ExprKind::Primary(lhs) = &add.left.kind else {
            panic!();
        };
        let PrimKind::Sizeof(left) = &lhs.kind else {
            panic!();
        };
        assert!(left.expr.is_none()); // sizeof(type)
        let ExprKind::Primary(rhs) = &add.right.kind else {
            panic!();
        };
        let PrimKind::Sizeof(right) = &rhs.kind else {
            panic!();
        };
        assert!(right.expr.is_some()); // sizeof(expr)
    }

    #[test]
    fn test_cast_vs_enclosed() {
        let program = parse("int main() { real r = 1.5; int a = (int)r; int b = (a); return b; }");
        let Statement::Declaration(Declaration::Variable(var)) = &program.functions[0].body[1]
        else {
            panic!();
        };
        let ExprKind::Primary(prim) = &var.init.as_ref().unwrap().value.kind else {
            panic!();
        };
        assert!(matches!(prim.kind, PrimKind::Cast(_)));

        let Statement::Declaration(Declaration::Variable(var)) = &program.functions[0].body[2]
        else {
            panic!();
        };
        let ExprKind::Primary(prim) = &var.init.as_ref().unwrap().value.kind else {
            panic!();
        };
        assert!(matches!(prim.kind, PrimKind::Enclosed(_)));
    }

    #[test]
    fn test_match_expression() {
        let program = parse(
            "int main() { int x = 2; return match(x) { 1|2 => 10, 3..5 => 20, _ => 0 }; }",
        );
        let Statement::Return(ret) = &program.functions[0].body[1] else {
            panic!();
        };
        let ExprKind::Primary(prim) = &ret.expr.as_ref().unwrap().kind else {
            panic!();
        };
        let PrimKind::Match(m) = &prim.kind else {
            panic!("expected match");
        };
        assert_eq!(m.cases.len(), 3);
        assert_eq!(m.cases[0].patterns.len(), 2);
        assert!(matches!(m.cases[1].patterns[0].kind, PatternKind::Range(..)));
        assert!(m.cases[2].is_wildcard);
    }

    #[test]
    fn test_foreach_forms() {
        let program = parse(
            "int f(int x) { return x; }\nvoid main() { int[3] a; foreach(x in a) f(x); foreach(ref int y in a) f(1); }",
        );
        let body = &program.functions[1].body;
        let Statement::Foreach(fe) = &body[1] else {
            panic!();
        };
        assert!(!fe.by_ref);
        assert!(fe.declared_type.is_none());
        let Statement::Foreach(fe) = &body[2] else {
            panic!();
        };
        assert!(fe.by_ref);
        assert!(fe.declared_type.is_some());
    }

    #[test]
    fn test_ufcs_rewrite() {
        let program = parse(
            "int double_it(int x) { return x * 2; }\nint main() { int v = 3; return v.double_it(); }",
        );
        let Statement::Return(ret) = &program.functions[1].body[1] else {
            panic!();
        };
        let ExprKind::Primary(prim) = &ret.expr.as_ref().unwrap().kind else {
            panic!();
        };
        let PrimKind::Call(call) = &prim.kind else {
            panic!("expected call");
        };
        assert_eq!(call.args.len(), 1); // receiver became first argument
    }

    #[test]
    fn test_field_access_not_ufcs() {
        let program =
            parse("struct point { int x; int y; };\nint main() { point p; return p.x; }");
        let Statement::Return(ret) = &program.functions[0].body[1] else {
            panic!();
        };
        let ExprKind::Primary(prim) = &ret.expr.as_ref().unwrap().kind else {
            panic!();
        };
        assert!(matches!(prim.kind, PrimKind::FieldAccess(_)));
    }

    #[test]
    fn test_asm_expr() {
        let program = parse("int main() { int v = asm(\"syscall #1\" : int); asm(\"syscall #0\", v); return v; }");
        let Statement::Declaration(Declaration::Variable(var)) = &program.functions[0].body[0]
        else {
            panic!();
        };
        let ExprKind::Primary(prim) = &var.init.as_ref().unwrap().value.kind else {
            panic!();
        };
        let PrimKind::InlineAsm(asm) = &prim.kind else {
            panic!();
        };
        assert!(asm.ret_type.is_basic(BaseType::Int));
    }

    #[test]
    fn test_random_expressions() {
        let program = parse("int main() { int a = %10; int b = %1..6; return a + b; }");
        let Statement::Declaration(Declaration::Variable(var)) = &program.functions[0].body[1]
        else {
            panic!();
        };
        let ExprKind::Primary(prim) = &var.init.as_ref().unwrap().value.kind else {
            panic!();
        };
        assert!(matches!(
            prim.kind,
            PrimKind::Random(RandomExpr::Range { .. })
        ));
    }

    #[test]
    fn test_array_literal_and_range_gen() {
        let program = parse("void main() { int[] a = {1, 2, 3}; int[] b = [1..10]; }");
        let Statement::Declaration(Declaration::Variable(var)) = &program.functions[0].body[0]
        else {
            panic!();
        };
        let ExprKind::Primary(prim) = &var.init.as_ref().unwrap().value.kind else {
            panic!();
        };
        let PrimKind::ArrayLit(lit) = &prim.kind else {
            panic!();
        };
        assert_eq!(lit.elements.len(), 3);
    }

    #[test]
    fn test_operator_overload_header() {
        let program = parse(
            "struct v2 { int x; int y; };\nv2 operator+(v2 a, v2 b) { return a; }",
        );
        let func = &program.functions[0];
        assert!(func.is_operator_overload);
        assert_eq!(func.overloaded_op, Some(Op::Add));
    }

    #[test]
    fn test_slice_and_subscript() {
        let program = parse("void main() { int[5] a; int x = a[1]; int[] b = a[1..3]; }");
        let Statement::Declaration(Declaration::Variable(var)) = &program.functions[0].body[2]
        else {
            panic!();
        };
        let ExprKind::Primary(prim) = &var.init.as_ref().unwrap().value.kind else {
            panic!();
        };
        assert!(matches!(prim.kind, PrimKind::Slice(_)));
    }

    #[test]
    fn test_parse_error_reports_expected() {
        let msg = parse_err("int main( { return 0; }");
        assert!(msg.contains("error"), "got: {}", msg);
    }

    #[test]
    fn test_unexpected_token_is_fatal() {
        let msg = parse_err("int main() { return @; }");
        assert!(msg.contains("unexpected token"), "got: {}", msg);
    }
}
