//! Semantic analysis
//!
//! A full in-place walk over the parsed AST, one pass per function:
//! allocates local and global slots, resolves identifiers honoring lexical
//! nest depth, computes value types bottom-up, inserts implicit casts,
//! enforces lvalue and loop-control rules, and desugars `foreach` into a
//! counter loop plus a synthesized element assignment. Running the pass
//! twice over an already-analyzed AST is a no-op: slots are recomputed
//! identically and processed identifiers keep their resolution.

use crate::ast::*;
use crate::builtins::{self, Builtin};
use crate::diagnostics::{CompileError, Diagnostic};
use crate::operators::{Op, OverloadTable};
use crate::token::{Span, Token, TokenKind};
use crate::types::{BaseType, FunctionSignature, Type, TypeTable};
use std::rc::Rc;

pub fn analyze(
    program: &mut Program,
    types: &mut TypeTable,
    overloads: &mut OverloadTable,
) -> Result<(), CompileError> {
    // register operator overloads before any body is looked at, so uses in
    // earlier functions resolve
    for func in &mut program.functions {
        if func.is_operator_overload && func.mangled_name.is_none() {
            overloads.register(func, types)?;
        }
    }

    let functions: Vec<(Rc<str>, Rc<FunctionSignature>)> = program
        .functions
        .iter()
        .filter(|f| !f.is_operator_overload)
        .map(|f| (f.source_name(), Rc::clone(&f.signature)))
        .collect();

    let mut analyzer = Analyzer {
        types,
        overloads,
        functions,
        globals: Vec::new(),
        locals: Vec::new(),
        ret_type: untyped(),
        in_function: false,
        nest_depth: 0,
        loop_depth: 0,
    };

    // globals first: their slots must exist before function bodies resolve
    let mut global_declarations = std::mem::take(&mut program.global_declarations);
    for decl in &mut global_declarations {
        analyzer.declaration(decl)?;
    }
    program.global_declarations = global_declarations;

    for func in &mut program.functions {
        analyzer.function(func)?;
    }

    program.globals = std::mem::take(&mut analyzer.globals);
    Ok(())
}

struct Analyzer<'a> {
    types: &'a mut TypeTable,
    overloads: &'a OverloadTable,
    functions: Vec<(Rc<str>, Rc<FunctionSignature>)>,
    globals: Vec<GlobalVariable>,
    locals: Vec<LocalVariable>,
    ret_type: Type,
    in_function: bool,
    nest_depth: u32,
    loop_depth: u32,
}

impl<'a> Analyzer<'a> {
    fn err(&self, span: &Span, message: impl Into<String>) -> CompileError {
        Diagnostic::error(span.clone(), message).into()
    }

    fn find_function(&self, name: &str) -> Option<&(Rc<str>, Rc<FunctionSignature>)> {
        self.functions.iter().find(|(n, _)| &**n == name)
    }

    fn find_local(&self, name: &str) -> Option<u32> {
        self.locals
            .iter()
            .position(|local| {
                !local.temp
                    && local.nest_depth <= self.nest_depth
                    && local
                        .name
                        .as_ref()
                        .and_then(|t| t.ident_text())
                        .is_some_and(|n| &**n == name)
            })
            .map(|idx| idx as u32)
    }

    fn find_global(&self, name: &str) -> Option<u32> {
        self.globals
            .iter()
            .position(|global| {
                global.name.ident_text().is_some_and(|n| &**n == name)
            })
            .map(|idx| idx as u32)
    }

    fn create_temporary(&mut self, ty: Type) -> u32 {
        self.locals.push(LocalVariable {
            temp: true,
            nest_depth: self.nest_depth,
            name: None,
            ty,
        });
        (self.locals.len() - 1) as u32
    }

    // ------------------------------------------------------------------
    // program structure
    // ------------------------------------------------------------------

    fn function(&mut self, func: &mut Function) -> Result<(), CompileError> {
        self.in_function = true;
        self.nest_depth = 0;
        self.loop_depth = 0;
        self.ret_type = func.signature.ret_type.clone();
        self.locals.clear();

        // parameters occupy the first local slots
        for param in &func.params {
            self.locals.push(LocalVariable {
                temp: false,
                nest_depth: 0,
                name: Some(param.name.clone()),
                ty: param.ty.clone(),
            });
        }

        let mut body = std::mem::take(&mut func.body);
        for stmt in &mut body {
            self.statement(stmt)?;
        }
        func.body = body;
        func.locals = std::mem::take(&mut self.locals);

        self.in_function = false;
        Ok(())
    }

    fn declaration(&mut self, decl: &mut Declaration) -> Result<(), CompileError> {
        match decl {
            Declaration::Variable(var) => self.variable_declaration(var),
            Declaration::Typedef(_) | Declaration::Struct(_) => Ok(()),
        }
    }

    fn variable_declaration(
        &mut self,
        decl: &mut VariableDeclaration,
    ) -> Result<(), CompileError> {
        if self.in_function {
            self.locals.push(LocalVariable {
                temp: false,
                nest_depth: self.nest_depth,
                name: Some(decl.name.clone()),
                ty: decl.ty.clone(),
            });
            decl.slot = (self.locals.len() - 1) as u32;
            decl.global = false;
        } else {
            self.globals.push(GlobalVariable {
                name: decl.name.clone(),
                ty: decl.ty.clone(),
            });
            decl.slot = (self.globals.len() - 1) as u32;
            decl.global = true;
        }

        self.check_type(&mut decl.ty)?;
        if let Some(init) = &mut decl.init {
            self.assignment(init)?;
        }
        Ok(())
    }

    /// Array declarators carry size expressions that need resolution too.
    fn check_type(&mut self, ty: &mut Type) -> Result<(), CompileError> {
        match ty {
            Type::Array(arr) => {
                if let Some(size) = &mut arr.initial_size {
                    self.expression(size)?;
                    let int = Type::Basic(BaseType::Int);
                    if !self.types.can_implicit_cast(&size.value_type, &int) {
                        return Err(self.err(
                            &size.span,
                            format!(
                                "invalid array size type: {}",
                                self.types.display(&size.value_type)
                            ),
                        ));
                    }
                }
                self.check_type(&mut arr.element)
            }
            Type::Pointer(inner) | Type::Optional(inner) => self.check_type(inner),
            _ => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // statements
    // ------------------------------------------------------------------

    fn statement(&mut self, stmt: &mut Statement) -> Result<(), CompileError> {
        match stmt {
            Statement::Return(ret) => self.return_statement(ret),
            Statement::Declaration(decl) => self.declaration(decl),
            Statement::Compound(stmts) => {
                self.nest_depth += 1;
                for stmt in stmts {
                    self.statement(stmt)?;
                }
                self.nest_depth -= 1;
                Ok(())
            }
            Statement::Empty => Ok(()),
            Statement::If(stmt) => {
                self.expression(&mut stmt.test)?;
                self.statement(&mut stmt.then_branch)?;
                if let Some(else_branch) = &mut stmt.else_branch {
                    self.statement(else_branch)?;
                }
                self.cast_to_boolean(&mut stmt.test)
            }
            Statement::While(stmt) => {
                self.loop_depth += 1;
                self.expression(&mut stmt.test)?;
                self.statement(&mut stmt.body)?;
                self.loop_depth -= 1;
                self.cast_to_boolean(&mut stmt.test)
            }
            Statement::DoWhile(stmt) => {
                self.loop_depth += 1;
                self.statement(&mut stmt.body)?;
                self.expression(&mut stmt.test)?;
                self.loop_depth -= 1;
                self.cast_to_boolean(&mut stmt.test)
            }
            Statement::For(stmt) => {
                self.loop_depth += 1;
                self.nest_depth += 1;
                self.statement(&mut stmt.init)?;
                self.expression(&mut stmt.test)?;
                self.expression(&mut stmt.step)?;
                self.statement(&mut stmt.body)?;
                self.nest_depth -= 1;
                self.loop_depth -= 1;
                self.cast_to_boolean(&mut stmt.test)
            }
            Statement::Foreach(stmt) => self.foreach_statement(stmt),
            Statement::LoopCtrl(ctrl) => {
                if self.loop_depth == 0 {
                    return Err(self.err(
                        &ctrl.token.span,
                        "loop control statement cannot be used outside of a loop",
                    ));
                }
                Ok(())
            }
            Statement::Expression(expr) => self.expression(expr),
        }
    }

    fn return_statement(&mut self, ret: &mut ReturnStatement) -> Result<(), CompileError> {
        match &mut ret.expr {
            Some(expr) => {
                self.expression(expr)?;
                let target = self.ret_type.clone();
                self.convert(expr, &target)
            }
            None => {
                if !self.ret_type.is_basic(BaseType::Void) {
                    return Err(self.err(
                        &ret.return_token.span,
                        "function return type is not void",
                    ));
                }
                Ok(())
            }
        }
    }

    /// Desugar `foreach ([ref] [T] x in e) body` into a fresh int counter,
    /// a user-visible element local, and `x := e[counter]` per iteration.
    fn foreach_statement(&mut self, stmt: &mut ForeachStatement) -> Result<(), CompileError> {
        self.loop_depth += 1;
        self.nest_depth += 1;

        self.expression(&mut stmt.array)?;
        let array_type = stmt.array.value_type.clone();
        let is_string = array_type.is_basic(BaseType::Str);
        if !matches!(array_type, Type::Array(_)) && !is_string {
            return Err(self.err(&stmt.array.span, "cannot use foreach on a non-array type"));
        }

        // element type: declared, or inferred (pointer-wrapped under ref)
        stmt.loop_ident.ty = match &stmt.declared_type {
            Some(ty) => ty.clone(),
            None => {
                let elem = match &array_type {
                    Type::Array(arr) => arr.element.clone(),
                    _ => Type::Basic(BaseType::Int), // string iteration yields char codes
                };
                if stmt.by_ref {
                    Type::pointer_to(elem)
                } else {
                    elem
                }
            }
        };

        // declare the user-visible loop variable
        let loop_var_name = stmt.loop_ident.name.clone().ok_or_else(|| {
            CompileError::Internal("foreach loop variable without a name".into())
        })?;
        let mut loop_var_decl = VariableDeclaration {
            ty: stmt.loop_ident.ty.clone(),
            name: loop_var_name,
            slot: 0,
            global: false,
            init: None,
        };
        self.variable_declaration(&mut loop_var_decl)?;
        stmt.loop_ident.slot = loop_var_decl.slot;
        stmt.loop_ident.global = false;

        // counter temporary
        stmt.counter_slot = self.create_temporary(Type::Basic(BaseType::Int));

        // synthesized `x := e[counter]`, address-of under ref
        let counter_ident = Ident {
            name: None,
            ty: Type::Basic(BaseType::Int),
            global: false,
            processed: true,
            slot: stmt.counter_slot,
        };
        let mut index_prim = PrimaryExpr::new(
            PrimKind::Ident(counter_ident),
            Span::synthetic(),
        );
        index_prim.value_type = Type::Basic(BaseType::Int);
        let mut index = Expression::primary(index_prim);
        index.value_type = Type::Basic(BaseType::Int);

        let array_span = stmt.array.span.clone();
        let enclosed_array = PrimaryExpr::new(
            PrimKind::Enclosed(Box::new(stmt.array.clone())),
            array_span.clone(),
        );
        let subscript = PrimaryExpr::new(
            PrimKind::Subscript(ArraySubscript {
                bracket: Token::new(TokenKind::LBracket, array_span.clone()),
                array: Box::new(enclosed_array),
                index: Box::new(index),
            }),
            array_span.clone(),
        );

        let value_prim = if stmt.by_ref {
            PrimaryExpr::new(
                PrimKind::AddrOf(AddrExpr {
                    amp: Token::new(TokenKind::Op(Op::BitAnd), array_span.clone()),
                    operand: Box::new(subscript),
                    addressed_function: None,
                }),
                array_span.clone(),
            )
        } else {
            subscript
        };

        let target = PrimaryExpr::new(
            PrimKind::Ident(stmt.loop_ident.clone()),
            stmt.loop_ident
                .name
                .as_ref()
                .map(|t| t.span.clone())
                .unwrap_or_else(Span::synthetic),
        );
        let mut assignment = Assignment {
            target,
            value: Expression::primary(value_prim),
            eq_token: Token::new(TokenKind::Assign, array_span),
            discard_result: true,
        };
        self.assignment(&mut assignment)?;
        stmt.loop_assignment = Some(assignment);
        stmt.loop_var_decl = Some(loop_var_decl);

        self.ident(&mut stmt.loop_ident)?;

        self.statement(&mut stmt.body)?;
        self.nest_depth -= 1;
        self.loop_depth -= 1;
        Ok(())
    }

    // ------------------------------------------------------------------
    // expressions
    // ------------------------------------------------------------------

    fn expression(&mut self, expr: &mut Expression) -> Result<(), CompileError> {
        match &mut expr.kind {
            ExprKind::Primary(prim) => self.primary(prim)?,
            ExprKind::Binop(binop) => self.binop(binop)?,
            ExprKind::Assignment(assign) => self.assignment(assign)?,
            ExprKind::Ternary(ternary) => self.ternary(ternary)?,
        }

        expr.value_type = self.expression_type(expr)?;
        expr.is_bool = match &expr.kind {
            ExprKind::Binop(binop) => binop.operator().info().is_bool,
            ExprKind::Primary(prim) => match &prim.kind {
                PrimKind::Unary(unary) => match unary.op.kind {
                    TokenKind::Op(op) => op.info().is_bool,
                    _ => false,
                },
                _ => false,
            },
            _ => false,
        };
        Ok(())
    }

    fn assignment(&mut self, assign: &mut Assignment) -> Result<(), CompileError> {
        if !assign.target.is_lvalue() {
            return Err(self.err(
                &assign.value.span,
                "assigned expression is not an lvalue",
            ));
        }
        self.primary(&mut assign.target)?;
        self.expression(&mut assign.value)?;

        let target_type = assign.target.value_type.clone();
        self.convert(&mut assign.value, &target_type)
    }

    fn ternary(&mut self, ternary: &mut TernaryExpr) -> Result<(), CompileError> {
        self.expression(&mut ternary.cond)?;
        self.expression(&mut ternary.true_branch)?;
        self.expression(&mut ternary.false_branch)?;

        self.cast_to_boolean(&mut ternary.cond)?;
        let true_type = ternary.true_branch.value_type.clone();
        self.convert(&mut ternary.false_branch, &true_type)
    }

    fn binop(&mut self, binop: &mut Binop) -> Result<(), CompileError> {
        self.expression(&mut binop.left)?;
        self.expression(&mut binop.right)?;

        let op = binop.operator();
        let lt = binop.left.value_type.clone();
        let rt = binop.right.value_type.clone();

        // an overload takes over the whole operation
        if self.overloads.find_binop(op, &lt, &rt).is_some() {
            return Ok(());
        }

        let int = Type::Basic(BaseType::Int);
        let real = Type::Basic(BaseType::Real);
        let mut left_target = lt.clone();
        let mut right_target = lt.clone();

        if op == Op::Cat && matches!(lt, Type::Array(_)) {
            // array element append
            if let Type::Array(arr) = &lt {
                right_target = arr.element.clone();
            }
        } else if op == Op::Cat && lt.is_basic(BaseType::Str) {
            // string + char code
            right_target = int;
        } else if op == Op::In {
            match &rt {
                Type::Array(arr) if arr.element.matches(&lt) => return Ok(()),
                Type::Array(_) => {
                    return Err(self.err(
                        &binop.left.span.to(&binop.right.span),
                        format!(
                            "cannot search for '{}' in '{}'",
                            self.types.display(&lt),
                            self.types.display(&rt)
                        ),
                    ));
                }
                _ => {
                    return Err(self.err(
                        &binop.right.span,
                        "'in' requires an array right-hand side",
                    ));
                }
            }
        } else if op.info().is_logic {
            left_target = int.clone();
            right_target = int;
            self.cast_to_boolean(&mut binop.left)?;
            self.cast_to_boolean(&mut binop.right)?;
        } else if lt.matches(&real) || rt.matches(&real) {
            // mixed int/real arithmetic promotes to real
            left_target = real.clone();
            right_target = real;
        } else if !self.types.can_implicit_cast(&lt, &rt) {
            return Err(self.err(
                &binop.left.span.to(&binop.right.span),
                format!(
                    "cannot do '{}' with '{}' and '{}'",
                    op.info().symbol,
                    self.types.display(&lt),
                    self.types.display(&rt)
                ),
            ));
        }

        if matches!(lt, Type::Pointer(_)) || matches!(rt, Type::Pointer(_)) {
            if op != Op::Eq && op != Op::Neq {
                return Err(self.err(
                    &binop.left.span.to(&binop.right.span),
                    "pointers can only be compared for equality",
                ));
            }
        }

        if lt.is_struct() || rt.is_struct() {
            return Err(self.err(
                &binop.left.span.to(&binop.right.span),
                format!(
                    "cannot do '{}' with '{}' and '{}'",
                    op.info().symbol,
                    self.types.display(&lt),
                    self.types.display(&rt)
                ),
            ));
        }

        // the lowering tables must carry an opcode for the final operand
        // class; anything else is an unsupported operator
        let lowers = if op == Op::Cat && matches!(lt, Type::Array(_)) {
            true
        } else if matches!(lt, Type::Pointer(_)) || matches!(rt, Type::Pointer(_)) {
            true // equality only, verified above
        } else {
            match &left_target {
                Type::Basic(
                    base @ (BaseType::Int | BaseType::Real | BaseType::Str),
                ) => crate::codegen::binop_opcode(*base, op).is_some(),
                _ => false,
            }
        };
        if !lowers {
            return Err(self.err(
                &binop.left.span.to(&binop.right.span),
                format!(
                    "unsupported operator '{}' for type '{}'",
                    op.info().symbol,
                    self.types.display(&left_target)
                ),
            ));
        }

        self.convert(&mut binop.left, &left_target)?;
        self.convert(&mut binop.right, &right_target)
    }

    fn primary(&mut self, prim: &mut PrimaryExpr) -> Result<(), CompileError> {
        let span = prim.span.clone();
        match &mut prim.kind {
            PrimKind::Enclosed(expr) => self.expression(expr)?,
            PrimKind::Unary(unary) => self.unary(unary)?,
            PrimKind::Cast(cast) => self.cast(cast)?,
            PrimKind::Ident(ident) => self.ident(ident)?,
            PrimKind::Call(call) => self.function_call(call, &span)?,
            PrimKind::Subscript(sub) => self.subscript(sub)?,
            PrimKind::Slice(slice) => self.slice(slice)?,
            PrimKind::RangeGen(range) => self.range_gen(range)?,
            PrimKind::FieldAccess(access) => self.struct_access(access)?,
            PrimKind::Deref(deref) => self.deref(deref)?,
            PrimKind::AddrOf(addr) => self.addr_of(addr)?,
            PrimKind::InlineAsm(asm) => {
                for arg in &mut asm.args {
                    self.expression(arg)?;
                }
            }
            PrimKind::Match(m) => self.match_expr(m)?,
            PrimKind::Sizeof(sizeof) => self.sizeof_expr(sizeof)?,
            PrimKind::New(new) => {
                self.check_type(&mut new.ty)?;
                let display = self.types.display(&new.ty);
                if self.types.size_of(&new.ty).is_none() {
                    return Err(self.err(
                        &new.span,
                        format!("allocation of incomplete type {}", display),
                    ));
                }
            }
            PrimKind::Random(random) => self.random(random)?,
            PrimKind::ArrayLit(lit) => self.array_lit(lit)?,
            PrimKind::StructInit(init) => self.struct_init(init)?,
            PrimKind::IntConst(_)
            | PrimKind::FloatConst(_)
            | PrimKind::StrLit(_)
            | PrimKind::NullLit => {}
        }

        prim.value_type = self.prim_expr_type(prim)?;
        Ok(())
    }

    fn ident(&mut self, ident: &mut Ident) -> Result<(), CompileError> {
        if ident.processed {
            return Ok(());
        }
        let Some(name_tok) = ident.name.clone() else {
            return Err(CompileError::Internal(
                "unresolved identifier without a name".into(),
            ));
        };
        let name = name_tok.ident_text().expect("identifier").to_string();

        if let Some(slot) = self.find_local(&name) {
            ident.ty = self.locals[slot as usize].ty.clone();
            ident.global = false;
            ident.slot = slot;
        } else if let Some(slot) = self.find_global(&name) {
            ident.ty = self.globals[slot as usize].ty.clone();
            ident.global = true;
            ident.slot = slot;
        } else {
            return Err(self.err(
                &name_tok.span,
                format!("unknown identifier '{}'", name),
            ));
        }
        Ok(())
    }

    fn unary(&mut self, unary: &mut UnaryExpr) -> Result<(), CompileError> {
        self.primary(&mut unary.operand)?;
        let operand_type = unary.operand.value_type.clone();

        if unary.op.kind == TokenKind::Question {
            if !matches!(operand_type, Type::Optional(_)) {
                return Err(self.err(
                    &unary.operand.span,
                    "optional test type must be an optional type",
                ));
            }
            return Ok(());
        }

        let op = match unary.op.kind {
            TokenKind::Op(op) => op,
            _ => {
                return Err(CompileError::Internal(
                    "unary operator token is not an operator".into(),
                ));
            }
        };
        if self.overloads.find_unop(op, &operand_type).is_some() {
            return Ok(());
        }

        if op.info().is_bool {
            // wrap the operand so the condition becomes an int boolean
            if operand_type.is_basic(BaseType::Int) {
                return Ok(());
            }
            let old = std::mem::replace(
                &mut *unary.operand,
                PrimaryExpr::new(PrimKind::NullLit, Span::synthetic()),
            );
            let span = old.span.clone();
            let vt = old.value_type.clone();
            let mut expr = Expression::primary(old);
            expr.value_type = vt;
            self.cast_to_boolean(&mut expr)?;
            let mut enclosed = PrimaryExpr::new(PrimKind::Enclosed(Box::new(expr)), span);
            enclosed.value_type = Type::Basic(BaseType::Int);
            *unary.operand = enclosed;
            return Ok(());
        }

        let int = Type::Basic(BaseType::Int);
        let real = Type::Basic(BaseType::Real);
        if !operand_type.matches(&int) && !operand_type.matches(&real) {
            return Err(self.err(
                &unary.operand.span,
                "unary expr type must be int or float",
            ));
        }
        Ok(())
    }

    fn cast(&mut self, cast: &mut CastExpr) -> Result<(), CompileError> {
        self.primary(&mut cast.operand)?;
        let from = cast.operand.value_type.clone();
        if !self.types.can_explicit_cast(&from, &cast.target_type)
            && !boolean_castable(&from, &cast.target_type)
        {
            return Err(self.err(
                &cast.type_token.span,
                format!(
                    "cannot cast '{}' to '{}'",
                    self.types.display(&from),
                    self.types.display(&cast.target_type)
                ),
            ));
        }
        Ok(())
    }

    fn function_call(
        &mut self,
        call: &mut FunctionCall,
        span: &Span,
    ) -> Result<(), CompileError> {
        call.builtin = None;

        let callee_name = match &call.callee.kind {
            PrimKind::Ident(ident) => ident
                .name
                .as_ref()
                .and_then(|t| t.ident_text())
                .map(|n| n.to_string()),
            _ => None,
        };

        if let Some(name) = &callee_name
            && let Some((_, sig)) = self.find_function(name)
        {
            call.indirect = false;
            call.signature = Some(Rc::clone(sig));
        } else if let Some(name) = &callee_name
            && let Some(builtin) = builtins::find_builtin(name)
        {
            call.indirect = false;
            call.builtin = Some(builtin);
            call.signature = Some(builtin.signature());
        } else {
            self.primary(&mut call.callee)?;
            call.indirect = true;
            match &call.callee.value_type {
                Type::Function(sig) => call.signature = Some(Rc::clone(sig)),
                _ => {
                    return Err(self.err(&call.callee.span, "expr is not a function"));
                }
            }
        }

        let signature = Rc::clone(call.signature.as_ref().expect("signature set"));
        if call.args.len() != signature.params.len() {
            let shown = self
                .types
                .display(&Type::Function(Rc::clone(&signature)));
            return Err(self.err(
                span,
                format!(
                    "invalid parameter count: expected {}, got {} (function signature is {})",
                    signature.params.len(),
                    call.args.len(),
                    shown
                ),
            ));
        }

        for arg in &mut call.args {
            self.expression(arg)?;
        }
        for (arg, param) in call.args.iter_mut().zip(&signature.params) {
            self.convert(arg, param)?;
        }

        // `find` needs the element type to match the searched array
        if call.builtin == Some(Builtin::Find) {
            let elem_ok = match &call.args[0].value_type {
                Type::Array(arr) => arr.element.matches(&call.args[1].value_type),
                _ => false,
            };
            if !elem_ok {
                return Err(self.err(
                    &call.args[1].span,
                    format!(
                        "cannot call 'find' with types <{}> and <{}>",
                        self.types.display(&call.args[0].value_type),
                        self.types.display(&call.args[1].value_type)
                    ),
                ));
            }
        }
        Ok(())
    }

    fn subscript(&mut self, sub: &mut ArraySubscript) -> Result<(), CompileError> {
        self.primary(&mut sub.array)?;
        let array_type = sub.array.value_type.clone();
        if !matches!(array_type, Type::Array(_)) && !array_type.is_basic(BaseType::Str) {
            return Err(self.err(
                &sub.array.span,
                format!(
                    "type '{}' is not an array or a string",
                    self.types.display(&array_type)
                ),
            ));
        }
        self.expression(&mut sub.index)
    }

    fn slice(&mut self, slice: &mut ArraySlice) -> Result<(), CompileError> {
        self.primary(&mut slice.array)?;
        let array_type = slice.array.value_type.clone();
        if !matches!(array_type, Type::Array(_)) && !array_type.is_basic(BaseType::Str) {
            return Err(self.err(
                &slice.array.span,
                format!("type '{}' is not an array", self.types.display(&array_type)),
            ));
        }
        self.expression(&mut slice.left)?;
        self.expression(&mut slice.right)?;

        let int = Type::Basic(BaseType::Int);
        if !slice.left.value_type.matches(&int) {
            return Err(self.err(&slice.left.span, "left slice bound isn't an int"));
        }
        if !slice.right.value_type.matches(&int) {
            return Err(self.err(&slice.right.span, "right slice bound isn't an int"));
        }
        Ok(())
    }

    fn range_gen(&mut self, range: &mut ArrayRange) -> Result<(), CompileError> {
        self.primary(&mut range.left)?;
        self.primary(&mut range.right)?;
        let int = Type::Basic(BaseType::Int);
        if !range.left.value_type.matches(&int) {
            return Err(self.err(&range.left.span, "array range bound must be int"));
        }
        if !range.right.value_type.matches(&int) {
            return Err(self.err(&range.right.span, "array range bound must be int"));
        }
        Ok(())
    }

    fn struct_access(&mut self, access: &mut StructAccess) -> Result<(), CompileError> {
        self.primary(&mut access.base)?;
        let mut base_type = access.base.value_type.clone();

        if access.indirect {
            match base_type {
                Type::Pointer(inner) | Type::Optional(inner) => base_type = *inner,
                other => {
                    return Err(self.err(
                        &access.base.span,
                        format!(
                            "type {} is not a pointer nor an optional",
                            self.types.display(&other)
                        ),
                    ));
                }
            }
        }

        let display = self.types.display(&base_type);
        let Some(structure) = self.types.get_struct(&base_type) else {
            return Err(self.err(
                &access.base.span,
                format!("type {} is not a struct", display),
            ));
        };
        if structure.incomplete {
            return Err(self.err(
                &access.base.span,
                format!("type {} is incomplete", display),
            ));
        }

        let field_name = access.field_name.ident_text().expect("identifier");
        let Some(field) = structure.field(field_name) else {
            return Err(self.err(
                &access.field_name.span,
                format!("type {} has no field named {}", display, field_name),
            ));
        };
        access.field = Some(field.clone());
        Ok(())
    }

    fn deref(&mut self, deref: &mut DerefExpr) -> Result<(), CompileError> {
        self.primary(&mut deref.pointer)?;
        let ty = deref.pointer.value_type.clone();
        deref.is_optional_access = matches!(ty, Type::Optional(_));
        if !matches!(ty, Type::Pointer(_) | Type::Optional(_)) {
            return Err(self.err(
                &deref.pointer.span,
                format!(
                    "type {} is not a pointer nor an optional",
                    self.types.display(&ty)
                ),
            ));
        }
        Ok(())
    }

    fn addr_of(&mut self, addr: &mut AddrExpr) -> Result<(), CompileError> {
        // taking the address of a function wins over variable lookup
        if let PrimKind::Ident(ident) = &addr.operand.kind
            && let Some(name) = ident.name.as_ref().and_then(|t| t.ident_text())
            && let Some((fname, sig)) = self.find_function(name)
        {
            addr.addressed_function = Some((Rc::clone(fname), Rc::clone(sig)));
            return Ok(());
        }
        addr.addressed_function = None;

        self.primary(&mut addr.operand)?;
        if !addr.operand.is_lvalue() {
            return Err(self.err(
                &addr.operand.span,
                "cannot get the address of a rvalue",
            ));
        }
        Ok(())
    }

    fn random(&mut self, random: &mut RandomExpr) -> Result<(), CompileError> {
        match random {
            RandomExpr::Single { operand, mode } => {
                self.primary(operand)?;
                let ty = operand.value_type.clone();
                *mode = if matches!(ty, Type::Array(_)) {
                    RandMode::Array
                } else if ty.is_basic(BaseType::Int) {
                    RandMode::Int
                } else if ty.is_basic(BaseType::Real) {
                    RandMode::Float
                } else {
                    return Err(self.err(
                        &operand.span,
                        format!(
                            "invalid random expression type <{}>",
                            self.types.display(&ty)
                        ),
                    ));
                };
                Ok(())
            }
            RandomExpr::Range { left, right } => {
                self.primary(left)?;
                self.primary(right)?;
                let int = Type::Basic(BaseType::Int);
                for bound in [&**left, &**right] {
                    if !bound.value_type.matches(&int) {
                        return Err(self.err(
                            &bound.span,
                            format!(
                                "expected integer type, got <{}>",
                                self.types.display(&bound.value_type)
                            ),
                        ));
                    }
                }
                Ok(())
            }
        }
    }

    fn match_pattern(&mut self, pattern: &mut MatchPattern) -> Result<(), CompileError> {
        match &mut pattern.kind {
            PatternKind::IntLit(_) => {
                pattern.value_type = Type::Basic(BaseType::Int);
            }
            PatternKind::StrLit(_) => {
                pattern.value_type = Type::Basic(BaseType::Str);
            }
            PatternKind::Ident(ident) => {
                self.ident(ident)?;
                pattern.value_type = ident.ty.clone();
            }
            PatternKind::Range(_, _) => {
                pattern.value_type = Type::Basic(BaseType::Int);
            }
        }
        Ok(())
    }

    fn match_expr(&mut self, m: &mut MatchExpr) -> Result<(), CompileError> {
        self.expression(&mut m.scrutinee)?;
        let scrutinee_type = m.scrutinee.value_type.clone();

        let mut wildcard_count = 0;
        for case in &mut m.cases {
            for pattern in &mut case.patterns {
                self.match_pattern(pattern)?;
            }
            for i in 1..case.patterns.len() {
                if !case.patterns[0]
                    .value_type
                    .matches(&case.patterns[i].value_type)
                {
                    return Err(self.err(&case.patterns[i].span, "pattern types don't match"));
                }
            }

            self.expression(&mut case.expr)?;
            case.value_type = if case.is_wildcard {
                scrutinee_type.clone()
            } else {
                case.patterns[0].value_type.clone()
            };

            if case.is_wildcard {
                wildcard_count += 1;
                if wildcard_count > 1 {
                    return Err(self.err(
                        &case.span,
                        "cannot have multiple wildcard cases in match expression",
                    ));
                }
            }

            if !case.value_type.matches(&scrutinee_type) {
                return Err(self.err(
                    &case.span,
                    "match case type incompatible with tested expression",
                ));
            }
        }

        for i in 1..m.cases.len() {
            if !m.cases[0]
                .expr
                .value_type
                .matches(&m.cases[i].expr.value_type)
            {
                return Err(self.err(
                    &m.cases[i].expr.span,
                    "match case expressions don't have the same type",
                ));
            }
        }

        // reuse the scrutinee's slot when it is already a plain local
        m.test_slot = match &m.scrutinee.kind {
            ExprKind::Primary(prim) => match &prim.kind {
                PrimKind::Ident(ident) if !ident.global => ident.slot,
                _ => self.create_temporary(scrutinee_type),
            },
            _ => self.create_temporary(scrutinee_type),
        };
        Ok(())
    }

    fn sizeof_expr(&mut self, sizeof: &mut SizeofExpr) -> Result<(), CompileError> {
        if let Some(expr) = &mut sizeof.expr {
            self.expression(expr)?;
            sizeof.ty = expr.value_type.clone();
        } else {
            self.check_type(&mut sizeof.ty)?;
        }
        if self.types.size_of(&sizeof.ty).is_none() {
            let display = self.types.display(&sizeof.ty);
            return Err(self.err(
                &sizeof.span,
                format!("sizeof of incomplete type {}", display),
            ));
        }
        Ok(())
    }

    fn array_lit(&mut self, lit: &mut ArrayLit) -> Result<(), CompileError> {
        for element in &mut lit.elements {
            self.expression(element)?;
        }

        if !lit.elements.is_empty() {
            let first_type = lit.elements[0].value_type.clone();
            for element in &lit.elements[1..] {
                if !first_type.matches(&element.value_type) {
                    return Err(self.err(
                        &element.span,
                        format!(
                            "invalid array expression type: got <{}>, expected <{}>",
                            self.types.display(&element.value_type),
                            self.types.display(&first_type)
                        ),
                    ));
                }
            }
        }

        let element_type = lit
            .elements
            .first()
            .map(|e| e.value_type.clone())
            .unwrap_or_else(untyped);
        let mut size = Expression::primary(PrimaryExpr::new(
            PrimKind::IntConst(Token::new(
                TokenKind::Int(lit.elements.len() as i64),
                Span::synthetic(),
            )),
            Span::synthetic(),
        ));
        size.value_type = Type::Basic(BaseType::Int);
        lit.ty = Type::array_of(element_type, Some(size));
        Ok(())
    }

    fn struct_init(&mut self, init: &mut StructInit) -> Result<(), CompileError> {
        let field_count = self
            .types
            .get_struct(&init.ty)
            .map(|s| s.fields.len())
            .ok_or_else(|| {
                CompileError::Internal("struct initializer over a non-struct type".into())
            })?;

        for arg in &mut init.args {
            self.expression(arg)?;
        }

        if field_count != init.args.len() {
            return Err(self.err(
                &init.span,
                format!(
                    "invalid initializer count, expected {}, got {}",
                    field_count,
                    init.args.len()
                ),
            ));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // conversions
    // ------------------------------------------------------------------

    /// Insert an implicit cast when legal and required.
    fn convert(&mut self, expr: &mut Expression, target: &Type) -> Result<(), CompileError> {
        // null flows into any optional
        if matches!(target, Type::Optional(_)) && expr.value_type.is_basic(BaseType::Null) {
            return Ok(());
        }
        if expr.value_type.matches(target) {
            return Ok(());
        }

        let mut target = target.clone();
        if let Type::Optional(inner) = &target {
            // T flows into T? unchanged
            if expr.value_type.matches(inner) {
                return Ok(());
            }
            target = (**inner).clone();
        }

        if !self.types.can_implicit_cast(&expr.value_type, &target) {
            return Err(self.err(
                &expr.span,
                format!(
                    "cannot implicitly cast '{}' to '{}'",
                    self.types.display(&expr.value_type),
                    self.types.display(&target)
                ),
            ));
        }

        wrap_in_cast(expr, target);
        Ok(())
    }

    /// Force a condition expression to an int boolean: int passes as-is;
    /// real, pointer, optional and function values get a cast; anything
    /// else is a type error.
    fn cast_to_boolean(&mut self, expr: &mut Expression) -> Result<(), CompileError> {
        let ty = expr.value_type.clone();
        if ty.is_basic(BaseType::Int) {
            return Ok(());
        }
        if matches!(ty, Type::Pointer(_) | Type::Optional(_) | Type::Function(_))
            || ty.is_basic(BaseType::Real)
        {
            wrap_in_cast(expr, Type::Basic(BaseType::Int));
            return Ok(());
        }
        Err(self.err(
            &expr.span,
            format!(
                "cannot cast '{}' to a boolean expression",
                self.types.display(&ty)
            ),
        ))
    }

    // ------------------------------------------------------------------
    // type computation
    // ------------------------------------------------------------------

    fn expression_type(&self, expr: &Expression) -> Result<Type, CompileError> {
        match &expr.kind {
            ExprKind::Primary(prim) => Ok(prim.value_type.clone()),
            ExprKind::Binop(binop) => self.binop_type(binop),
            ExprKind::Assignment(assign) => Ok(assign.value.value_type.clone()),
            ExprKind::Ternary(ternary) => Ok(ternary.true_branch.value_type.clone()),
        }
    }

    fn binop_type(&self, binop: &Binop) -> Result<Type, CompileError> {
        let op = binop.operator();
        let lt = &binop.left.value_type;
        let rt = &binop.right.value_type;

        if let Type::Array(arr) = lt
            && arr.element.matches(rt)
        {
            return Ok(lt.clone());
        }
        if lt.is_basic(BaseType::Str) && rt.is_basic(BaseType::Int) {
            return Ok(lt.clone());
        }
        if op == Op::In {
            return Ok(lt.clone());
        }
        if let Some(overload) = self.overloads.find_binop(op, lt, rt) {
            return Ok(overload.ret_type.clone());
        }
        if !lt.matches(rt) {
            return Err(CompileError::Internal(format!(
                "binop operand types diverge after conversion: {} vs {}",
                self.types.display(lt),
                self.types.display(rt)
            )));
        }
        if op.info().is_bool {
            Ok(Type::Basic(BaseType::Int))
        } else {
            Ok(lt.clone())
        }
    }

    fn prim_expr_type(&self, prim: &PrimaryExpr) -> Result<Type, CompileError> {
        match &prim.kind {
            PrimKind::Enclosed(expr) => Ok(expr.value_type.clone()),
            PrimKind::Unary(unary) => {
                let operand_type = &unary.operand.value_type;
                if unary.op.kind == TokenKind::Question {
                    return Ok(Type::Basic(BaseType::Int));
                }
                if let TokenKind::Op(op) = unary.op.kind {
                    if let Some(overload) = self.overloads.find_unop(op, operand_type) {
                        return Ok(overload.ret_type.clone());
                    }
                    if op.info().is_bool {
                        return Ok(Type::Basic(BaseType::Int));
                    }
                }
                Ok(operand_type.clone())
            }
            PrimKind::Cast(cast) => Ok(cast.target_type.clone()),
            PrimKind::Ident(ident) => Ok(ident.ty.clone()),
            PrimKind::Call(call) => Ok(call
                .signature
                .as_ref()
                .map(|sig| sig.ret_type.clone())
                .unwrap_or_else(untyped)),
            PrimKind::Subscript(sub) => match &sub.array.value_type {
                Type::Array(arr) => Ok(arr.element.clone()),
                _ => Ok(Type::Basic(BaseType::Int)), // string element
            },
            PrimKind::Slice(slice) => Ok(slice.array.value_type.clone()),
            PrimKind::RangeGen(_) => {
                Ok(Type::array_of(Type::Basic(BaseType::Int), None))
            }
            PrimKind::FieldAccess(access) => Ok(access
                .field
                .as_ref()
                .map(|f| f.ty.clone())
                .unwrap_or_else(untyped)),
            PrimKind::Deref(deref) => match &deref.pointer.value_type {
                Type::Pointer(inner) | Type::Optional(inner) => Ok((**inner).clone()),
                _ => Err(CompileError::Internal("deref of a non-pointer".into())),
            },
            PrimKind::AddrOf(addr) => match &addr.addressed_function {
                Some((_, sig)) => Ok(Type::Function(Rc::clone(sig))),
                None => Ok(Type::pointer_to(addr.operand.value_type.clone())),
            },
            PrimKind::Match(m) => Ok(m
                .cases
                .first()
                .map(|c| c.expr.value_type.clone())
                .unwrap_or_else(untyped)),
            PrimKind::InlineAsm(asm) => Ok(asm.ret_type.clone()),
            PrimKind::Sizeof(_) => Ok(Type::Basic(BaseType::Int)),
            PrimKind::New(new) => Ok(Type::pointer_to(new.ty.clone())),
            PrimKind::Random(random) => match random {
                RandomExpr::Range { .. } => Ok(Type::Basic(BaseType::Int)),
                RandomExpr::Single { operand, mode } => match mode {
                    RandMode::Int => Ok(Type::Basic(BaseType::Int)),
                    RandMode::Float => Ok(Type::Basic(BaseType::Real)),
                    RandMode::Array => match &operand.value_type {
                        Type::Array(arr) => Ok(arr.element.clone()),
                        _ => Err(CompileError::Internal(
                            "array random over a non-array".into(),
                        )),
                    },
                },
            },
            PrimKind::ArrayLit(lit) => Ok(lit.ty.clone()),
            PrimKind::StructInit(init) => Ok(init.ty.clone()),
            PrimKind::IntConst(_) => Ok(Type::Basic(BaseType::Int)),
            PrimKind::FloatConst(_) => Ok(Type::Basic(BaseType::Real)),
            PrimKind::StrLit(_) => Ok(Type::Basic(BaseType::Str)),
            PrimKind::NullLit => Ok(Type::Basic(BaseType::Null)),
        }
    }
}

/// Explicit boolean-style casts of reference types to int (`(int)ptr`)
/// lower to a null test.
fn boolean_castable(from: &Type, to: &Type) -> bool {
    to.is_basic(BaseType::Int)
        && matches!(from, Type::Pointer(_) | Type::Optional(_) | Type::Function(_))
}

fn wrap_in_cast(expr: &mut Expression, target: Type) {
    let old = std::mem::replace(
        expr,
        Expression::primary(PrimaryExpr::new(PrimKind::NullLit, Span::synthetic())),
    );
    let span = old.span.clone();
    let inner_type = old.value_type.clone();

    let mut enclosed = PrimaryExpr::new(PrimKind::Enclosed(Box::new(old)), span.clone());
    enclosed.value_type = inner_type;

    let mut cast = PrimaryExpr::new(
        PrimKind::Cast(CastExpr {
            type_token: Token::new(TokenKind::Ident("".into()), span.clone()),
            target_type: target.clone(),
            operand: Box::new(enclosed),
        }),
        span.clone(),
    );
    cast.value_type = target.clone();

    *expr = Expression {
        span,
        kind: ExprKind::Primary(Box::new(cast)),
        value_type: target,
        is_bool: false,
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_program;
    use crate::preprocessor::{Preprocessor, tokenize_program};

    fn analyze_source(source: &str) -> Result<(Program, TypeTable), CompileError> {
        let mut pp = Preprocessor::new(Vec::new());
        let tokens = tokenize_program(source, "test.opl", &mut pp)?;
        let mut types = TypeTable::new();
        let mut program = parse_program(tokens, &mut types)?;
        let mut overloads = OverloadTable::new();
        analyze(&mut program, &mut types, &mut overloads)?;
        Ok((program, types))
    }

    fn analyze_err(source: &str) -> String {
        match analyze_source(source) {
            Ok(_) => panic!("expected a semantic error"),
            Err(e) => format!("{}", e),
        }
    }

    #[test]
    fn test_local_slot_allocation() {
        let (program, _) = analyze_source(
            "int add(int a, int b) { int sum = a + b; return sum; }",
        )
        .unwrap();
        let func = &program.functions[0];
        // two parameters plus one declared local
        assert_eq!(func.locals.len(), 3);
        assert!(!func.locals[0].temp);
        let Statement::Declaration(Declaration::Variable(var)) = &func.body[0] else {
            panic!();
        };
        assert_eq!(var.slot, 2);
    }

    #[test]
    fn test_global_resolution() {
        let (program, _) =
            analyze_source("int counter = 0;\nint get() { return counter; }").unwrap();
        assert_eq!(program.globals.len(), 1);
        let Statement::Return(ret) = &program.functions[0].body[0] else {
            panic!();
        };
        let ExprKind::Primary(prim) = &ret.expr.as_ref().unwrap().kind else {
            panic!();
        };
        let PrimKind::Ident(ident) = &prim.kind else {
            panic!();
        };
        assert!(ident.global);
        assert_eq!(ident.slot, 0);
    }

    #[test]
    fn test_unknown_identifier() {
        let msg = analyze_err("int main() { return missing; }");
        assert!(msg.contains("unknown identifier 'missing'"));
    }

    #[test]
    fn test_implicit_cast_insertion() {
        let (program, _) = analyze_source("real half() { return 1; }").unwrap();
        let Statement::Return(ret) = &program.functions[0].body[0] else {
            panic!();
        };
        let ExprKind::Primary(prim) = &ret.expr.as_ref().unwrap().kind else {
            panic!("cast not inserted");
        };
        assert!(matches!(prim.kind, PrimKind::Cast(_)));
        assert!(prim.value_type.is_basic(BaseType::Real));
    }

    #[test]
    fn test_illegal_implicit_cast() {
        let msg = analyze_err("int trunc() { return 1.5; }");
        assert!(msg.contains("cannot implicitly cast"));
    }

    #[test]
    fn test_lvalue_enforcement() {
        let msg = analyze_err("void main() { 1 = 2; }");
        assert!(msg.contains("lvalue"));
    }

    #[test]
    fn test_break_outside_loop() {
        let msg = analyze_err("void main() { break; }");
        assert!(msg.contains("outside of a loop"));
    }

    #[test]
    fn test_break_inside_loop_ok() {
        analyze_source("void main() { while (1) { break; } }").unwrap();
    }

    #[test]
    fn test_void_return_check() {
        let msg = analyze_err("int main() { return; }");
        assert!(msg.contains("not void"));
    }

    #[test]
    fn test_mixed_arithmetic_promotes() {
        let (program, _) = analyze_source("real f() { return 2.5 * 2; }").unwrap();
        let Statement::Return(ret) = &program.functions[0].body[0] else {
            panic!();
        };
        assert!(ret.expr.as_ref().unwrap().value_type.is_basic(BaseType::Real));
    }

    #[test]
    fn test_condition_must_be_boolean() {
        let msg = analyze_err("void main() { if (\"text\") { } }");
        assert!(msg.contains("boolean"));
    }

    #[test]
    fn test_foreach_desugaring() {
        let (program, _) = analyze_source(
            "void use(int x) { }\nvoid main() { int[4] a; foreach(x in a) use(x); }",
        )
        .unwrap();
        let func = &program.functions[1];
        let Statement::Foreach(foreach) = &func.body[1] else {
            panic!();
        };
        // loop variable declared, counter temporary allocated
        assert!(foreach.loop_var_decl.is_some());
        assert!(foreach.loop_assignment.is_some());
        let counter = &func.locals[foreach.counter_slot as usize];
        assert!(counter.temp);
        assert!(counter.ty.is_basic(BaseType::Int));
        // element local carries the array element type
        let var = foreach.loop_var_decl.as_ref().unwrap();
        assert!(var.ty.is_basic(BaseType::Int));
    }

    #[test]
    fn test_foreach_ref_wraps_pointer() {
        let (program, _) = analyze_source(
            "void main() { int[4] a; foreach(ref x in a) { } }",
        )
        .unwrap();
        let Statement::Foreach(foreach) = &program.functions[0].body[1] else {
            panic!();
        };
        let var = foreach.loop_var_decl.as_ref().unwrap();
        assert!(matches!(var.ty, Type::Pointer(_)));
    }

    #[test]
    fn test_foreach_over_non_array() {
        let msg = analyze_err("void main() { int x = 3; foreach(v in x) { } }");
        assert!(msg.contains("non-array"));
    }

    #[test]
    fn test_match_wildcard_rules() {
        let msg = analyze_err(
            "int main() { int x = 1; return match(x) { _ => 1, _ => 2 }; }",
        );
        assert!(msg.contains("multiple wildcard"));
    }

    #[test]
    fn test_match_pattern_type_mismatch() {
        let msg = analyze_err(
            "int main() { int x = 1; return match(x) { \"a\" => 1, _ => 2 }; }",
        );
        assert!(msg.contains("incompatible"));
    }

    #[test]
    fn test_match_reuses_local_slot() {
        let (program, _) = analyze_source(
            "int main() { int x = 1; return match(x) { 1 => 10, _ => 0 }; }",
        )
        .unwrap();
        let func = &program.functions[0];
        let Statement::Return(ret) = &func.body[1] else {
            panic!();
        };
        let ExprKind::Primary(prim) = &ret.expr.as_ref().unwrap().kind else {
            panic!();
        };
        let PrimKind::Match(m) = &prim.kind else {
            panic!();
        };
        assert_eq!(m.test_slot, 0); // x's slot, no temporary
        assert_eq!(func.locals.len(), 1);
    }

    #[test]
    fn test_struct_field_resolution() {
        let (program, _) = analyze_source(
            "struct point { int x; int y; };\nint get_y(point p) { return p.y; }",
        )
        .unwrap();
        let Statement::Return(ret) = &program.functions[0].body[0] else {
            panic!();
        };
        let ExprKind::Primary(prim) = &ret.expr.as_ref().unwrap().kind else {
            panic!();
        };
        let PrimKind::FieldAccess(access) = &prim.kind else {
            panic!();
        };
        assert_eq!(access.field.as_ref().unwrap().offset, 1);
    }

    #[test]
    fn test_unknown_field() {
        let msg = analyze_err(
            "struct point { int x; };\nint f(point p) { return p.z; }",
        );
        assert!(msg.contains("no field named z"));
    }

    #[test]
    fn test_call_arity_check() {
        let msg = analyze_err("int f(int a) { return a; }\nint main() { return f(1, 2); }");
        assert!(msg.contains("invalid parameter count"));
    }

    #[test]
    fn test_indirect_call_through_function_value() {
        analyze_source(
            "int inc(int x) { return x + 1; }\nint main() { int(int) f = &inc; return f(1); }",
        )
        .unwrap();
    }

    #[test]
    fn test_addr_of_function() {
        let (program, _) = analyze_source(
            "int id(int x) { return x; }\nvoid main() { int(int) f = &id; }",
        )
        .unwrap();
        let Statement::Declaration(Declaration::Variable(var)) = &program.functions[1].body[0]
        else {
            panic!();
        };
        let ExprKind::Primary(prim) = &var.init.as_ref().unwrap().value.kind else {
            panic!();
        };
        let PrimKind::AddrOf(addr) = &prim.kind else {
            panic!();
        };
        assert!(addr.addressed_function.is_some());
    }

    #[test]
    fn test_null_into_optional() {
        analyze_source("void main() { int? x = null; }").unwrap();
    }

    #[test]
    fn test_value_into_optional() {
        analyze_source("void main() { int? x = 3; }").unwrap();
    }

    #[test]
    fn test_analysis_is_idempotent() {
        let source = "int main() { int x = 1; foreach(v in {1,2,3}) x = x + v; return match(x) { 1 => 0, _ => x }; }";
        let mut pp = Preprocessor::new(Vec::new());
        let tokens = tokenize_program(source, "test.opl", &mut pp).unwrap();
        let mut types = TypeTable::new();
        let mut program = parse_program(tokens, &mut types).unwrap();
        let mut overloads = OverloadTable::new();
        analyze(&mut program, &mut types, &mut overloads).unwrap();
        let locals_once = program.functions[0].locals.len();

        analyze(&mut program, &mut types, &mut overloads).unwrap();
        assert_eq!(program.functions[0].locals.len(), locals_once);
    }

    #[test]
    fn test_pointer_comparison_restriction() {
        let msg = analyze_err(
            "void main() { int* p = null; int* q = null; int x = p < q; }",
        );
        assert!(msg.contains("compared for equality"));
    }

    #[test]
    fn test_find_builtin_type_check() {
        let msg = analyze_err("void main() { int[3] a; find(a, \"x\"); }");
        assert!(msg.contains("find"));
    }
}
