//! Code generation
//!
//! Lowers the analyzed AST to the linked IR stream. One generator instance
//! holds the whole mutable state: the pending-label queue claimed by the
//! next emitted instruction, a pending comment, the generated-label counter,
//! the loop entry/exit stacks for `break`/`continue`, and the address-calc
//! depth counter.
//!
//! # Address-calc mode
//!
//! Lvalue-producing forms (`x[i]`, `*p`, `s.f`) either leave an address on
//! the stack (assignment targets, `&` operands) or a loaded value. The
//! consumer enters address-calc mode before lowering the lvalue; the
//! outermost lvalue node pops the mode and omits its trailing `load`.

use crate::asm::InstructionList;
use crate::ast::*;
use crate::builtins;
use crate::diagnostics::{CompileError, Diagnostic};
use crate::operators::Op;
use crate::token::{Span, TokenKind};
use crate::types::{BaseType, Type, TypeTable};

use crate::operators::OverloadTable;

const LABEL_PREFIX: &str = ".L";

/// By-type binary opcodes. `None` slots are unreachable for analyzed
/// programs.
pub(crate) fn binop_opcode(base: BaseType, op: Op) -> Option<&'static str> {
    match base {
        BaseType::Int => int_binop_opcode(op),
        BaseType::Real => float_binop_opcode(op),
        BaseType::Str => str_binop_opcode(op),
        _ => None,
    }
}

pub(crate) fn int_binop_opcode(op: Op) -> Option<&'static str> {
    Some(match op {
        Op::Add => "add",
        Op::Sub => "sub",
        Op::Mul => "mul",
        Op::Div => "idiv",
        Op::Mod => "mod",
        Op::Eq => "eq",
        Op::Neq => "neq",
        Op::Gt => "gt",
        Op::Ge => "ge",
        Op::Lt => "lt",
        Op::Le => "le",
        Op::LogicAnd => "land",
        Op::LogicOr => "lor",
        Op::BitAnd => "and",
        Op::BitOr => "or",
        Op::BitXor => "xor",
        Op::Shl => "shl",
        Op::Shr => "shr",
        _ => return None,
    })
}

pub(crate) fn float_binop_opcode(op: Op) -> Option<&'static str> {
    Some(match op {
        Op::Add => "fadd",
        Op::Sub => "fsub",
        Op::Mul => "fmul",
        Op::Div => "fdiv",
        Op::Mod => "fmod",
        Op::Eq => "feq",
        Op::Neq => "fneq",
        Op::Gt => "fgt",
        Op::Ge => "fge",
        Op::Lt => "flt",
        Op::Le => "fle",
        _ => return None,
    })
}

pub(crate) fn str_binop_opcode(op: Op) -> Option<&'static str> {
    Some(match op {
        Op::Add | Op::Cat => "strcat",
        Op::Eq => "streq",
        Op::Neq => "strneq",
        Op::Gt => "strgt",
        Op::Ge => "strge",
        Op::Lt => "strlt",
        Op::Le => "strle",
        _ => return None,
    })
}

fn cast_opcode(from: BaseType, to: BaseType) -> Option<&'static str> {
    Some(match (from, to) {
        (BaseType::Int, BaseType::Real) => "cvti2f",
        (BaseType::Int, BaseType::Str) => "cvti2s",
        (BaseType::Real, BaseType::Int) => "cvtf2i",
        (BaseType::Real, BaseType::Str) => "cvtf2s",
        _ => return None,
    })
}

/// Escape embedded quotes for the `.string` table.
fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev = '\0';
    for c in s.chars() {
        if c == '"' && prev != '\\' {
            out.push('\\');
        }
        out.push(c);
        prev = c;
    }
    out
}

pub struct CodeGen<'a> {
    program: &'a Program,
    types: &'a TypeTable,
    overloads: &'a OverloadTable,
    list: InstructionList,
    pending_labels: Vec<String>,
    pending_comment: Option<String>,
    label_counter: u32,
    loop_entry_labels: Vec<String>,
    loop_exit_labels: Vec<String>,
    addr_calc_state: u32,
}

/// Lower a fully-analyzed program to its IR stream.
pub fn generate(
    program: &Program,
    types: &TypeTable,
    overloads: &OverloadTable,
) -> Result<InstructionList, CompileError> {
    let mut cg = CodeGen {
        program,
        types,
        overloads,
        list: InstructionList::new(),
        pending_labels: Vec::new(),
        pending_comment: None,
        label_counter: 0,
        loop_entry_labels: Vec::new(),
        loop_exit_labels: Vec::new(),
        addr_calc_state: 0,
    };
    cg.gen_program()?;
    Ok(cg.list)
}

impl<'a> CodeGen<'a> {
    pub(crate) fn emit(&mut self, opcode: &str, operand: String) {
        let labels = std::mem::take(&mut self.pending_labels);
        let comment = self.pending_comment.take();
        self.list
            .push_back(labels, opcode.to_string(), operand, comment);
    }

    fn op(&mut self, opcode: &str) {
        self.emit(opcode, String::new());
    }

    /// Queue a label; the next emitted instruction claims it.
    fn emit_label_target(&mut self, label: String) {
        self.pending_labels.push(label);
    }

    fn comment(&mut self, text: String) {
        self.pending_comment = Some(text);
    }

    fn new_label(&mut self) -> String {
        let label = format!("{}{:x}", LABEL_PREFIX, self.label_counter);
        self.label_counter += 1;
        label
    }

    fn enter_addr_calc(&mut self) {
        self.addr_calc_state += 1;
    }

    fn pop_addr_calc_state(&mut self) -> bool {
        if self.addr_calc_state == 0 {
            false
        } else {
            self.addr_calc_state -= 1;
            true
        }
    }

    pub(crate) fn size_of(&self, ty: &Type, _span: &Span) -> Result<usize, CompileError> {
        self.types.size_of(ty).ok_or_else(|| {
            CompileError::Internal(format!(
                "size of incomplete type {} reached code generation",
                self.types.display(ty)
            ))
        })
    }

    // ------------------------------------------------------------------
    // program structure
    // ------------------------------------------------------------------

    fn gen_program(&mut self) -> Result<(), CompileError> {
        self.emit_label_target("_global_init".into());
        for decl in &self.program.global_declarations {
            self.gen_declaration(decl)?;
        }
        self.emit("jmp", "main".into());

        for func in &self.program.functions {
            self.gen_function(func)?;
        }

        let entries: Vec<(u32, String)> = self
            .program
            .strings
            .borrow()
            .iter()
            .map(|(id, s)| (id, escape_string(s)))
            .collect();
        for (id, text) in entries {
            self.emit(".string", format!("{}, \"{}\"", id, text));
        }
        Ok(())
    }

    fn gen_function(&mut self, func: &Function) -> Result<(), CompileError> {
        self.emit_label_target(func.emit_name().to_string());

        // fetch parameters into locals in reverse: the stack holds them
        // right-to-left, slots run left-to-right
        for i in (0..func.params.len()).rev() {
            let param = &func.params[i];
            self.comment(format!("// get '{}'", param.name.span.text()));
            self.emit("movl", format!("{}", i));
            if param.ty.is_struct() {
                let size = self.size_of(&param.ty, &param.name.span)?;
                self.emit("pushi", format!("#{}", size));
                self.op("alloc");
                self.op("dup");
                self.emit("pushl", format!("{}", i));
                self.emit("pushi", format!("#{}", size));
                self.op("copy");
                self.emit("movl", format!("{}", i));
            }
        }

        for stmt in &func.body {
            self.gen_statement(stmt)?;
        }
        self.op("ret");
        Ok(())
    }

    fn gen_declaration(&mut self, decl: &Declaration) -> Result<(), CompileError> {
        match decl {
            Declaration::Variable(var) => self.gen_variable_declaration(var),
            Declaration::Typedef(_) | Declaration::Struct(_) => Ok(()),
        }
    }

    fn gen_variable_declaration(
        &mut self,
        decl: &VariableDeclaration,
    ) -> Result<(), CompileError> {
        let mut initialized = false;
        if decl.ty.is_struct() {
            let size = self.size_of(&decl.ty, &decl.name.span)?;
            self.emit("pushi", format!("#{}", size));
            self.op("alloc");
            initialized = true;
        } else if matches!(decl.ty, Type::Array(_)) {
            self.gen_array_size(&decl.ty, &decl.name.span)?;
            self.comment(format!("// {}", self.types.display(&decl.ty)));
            self.op("alloc");
            initialized = true;
        } else if decl.init.is_none()
            && matches!(
                decl.ty,
                Type::Optional(_) | Type::Pointer(_) | Type::Function(_)
            )
        {
            self.op("pushnull");
            initialized = true;
        }

        if initialized {
            if decl.global {
                self.emit("movg", format!("{}", decl.slot));
            } else {
                self.emit("movl", format!("{}", decl.slot));
            }
        }

        if let Some(init) = &decl.init {
            self.gen_assignment(init)?;
        }
        Ok(())
    }

    /// Multidimensional allocation size: dimension expressions multiplied
    /// together, scaled by the element size. An elided dimension allocates
    /// an empty array.
    fn gen_array_size(&mut self, ty: &Type, span: &Span) -> Result<(), CompileError> {
        let Type::Array(arr) = ty else {
            return Err(CompileError::Internal(
                "array size requested for a non-array".into(),
            ));
        };

        match &arr.initial_size {
            Some(size) => self.gen_expression(size)?,
            None => self.emit("pushi", "#0".into()),
        }

        let mut element = &arr.element;
        while let Type::Array(inner) = element {
            match &inner.initial_size {
                Some(size) => self.gen_expression(size)?,
                None => self.emit("pushi", "#0".into()),
            }
            self.op("mul");
            element = &inner.element;
        }

        let elem_size = self.size_of(element, span)?;
        if elem_size > 1 {
            self.emit("pushi", format!("#{}", elem_size));
            self.op("mul");
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // statements
    // ------------------------------------------------------------------

    fn gen_statement(&mut self, stmt: &Statement) -> Result<(), CompileError> {
        match stmt {
            Statement::Return(ret) => {
                if let Some(expr) = &ret.expr {
                    self.gen_expression(expr)?;
                }
                self.op("ret");
                Ok(())
            }
            Statement::Declaration(decl) => self.gen_declaration(decl),
            Statement::Compound(stmts) => {
                for stmt in stmts {
                    self.gen_statement(stmt)?;
                }
                Ok(())
            }
            Statement::Empty => Ok(()),
            Statement::If(stmt) => self.gen_if(stmt),
            Statement::While(stmt) => self.gen_while(stmt),
            Statement::DoWhile(stmt) => self.gen_do_while(stmt),
            Statement::For(stmt) => self.gen_for(stmt),
            Statement::Foreach(stmt) => self.gen_foreach(stmt),
            Statement::LoopCtrl(ctrl) => {
                let label = match ctrl.kind {
                    LoopCtrlKind::Break => self.loop_exit_labels.last(),
                    LoopCtrlKind::Continue => self.loop_entry_labels.last(),
                };
                let label = label
                    .cloned()
                    .ok_or_else(|| {
                        CompileError::Internal("loop control outside of a loop".into())
                    })?;
                self.emit("jmp", label);
                Ok(())
            }
            Statement::Expression(expr) => {
                self.gen_expression(expr)?;
                self.discard_expression_result(expr);
                Ok(())
            }
        }
    }

    /// Expression statements drop their pushed value; assignments already
    /// discard, void expressions push nothing.
    fn discard_expression_result(&mut self, expr: &Expression) {
        if expr.value_type.is_basic(BaseType::Void) {
            return;
        }
        if matches!(expr.kind, ExprKind::Assignment(_)) {
            return;
        }
        self.op("pop");
    }

    fn gen_if(&mut self, stmt: &IfStatement) -> Result<(), CompileError> {
        let else_label = self.new_label();

        self.gen_expression(&stmt.test)?;
        self.comment("// if".into());
        self.emit("jf", else_label.clone());

        self.gen_statement(&stmt.then_branch)?;
        if let Some(else_branch) = &stmt.else_branch {
            let out_label = self.new_label();
            self.emit("jmp", out_label.clone());
            self.emit_label_target(else_label);
            self.gen_statement(else_branch)?;
            self.emit_label_target(out_label);
        } else {
            self.emit_label_target(else_label);
        }
        Ok(())
    }

    fn gen_while(&mut self, stmt: &WhileStatement) -> Result<(), CompileError> {
        let out_label = self.new_label();
        let loop_label = self.new_label();
        self.loop_entry_labels.push(loop_label.clone());
        self.loop_exit_labels.push(out_label.clone());

        self.emit_label_target(loop_label.clone());
        self.gen_expression(&stmt.test)?;
        self.emit("jf", out_label.clone());

        self.gen_statement(&stmt.body)?;
        self.emit("jmp", loop_label);

        self.emit_label_target(out_label);
        self.loop_entry_labels.pop();
        self.loop_exit_labels.pop();
        Ok(())
    }

    fn gen_do_while(&mut self, stmt: &DoWhileStatement) -> Result<(), CompileError> {
        let loop_label = self.new_label();
        let out_label = self.new_label();
        self.loop_entry_labels.push(loop_label.clone());
        self.loop_exit_labels.push(out_label.clone());

        self.emit_label_target(loop_label.clone());
        self.gen_statement(&stmt.body)?;
        self.gen_expression(&stmt.test)?;
        self.emit("jt", loop_label);

        self.emit_label_target(out_label);
        self.loop_entry_labels.pop();
        self.loop_exit_labels.pop();
        Ok(())
    }

    fn gen_for(&mut self, stmt: &ForStatement) -> Result<(), CompileError> {
        let out_label = self.new_label();
        let loop_label = self.new_label();
        self.loop_entry_labels.push(loop_label.clone());
        self.loop_exit_labels.push(out_label.clone());

        self.gen_statement(&stmt.init)?;

        self.emit_label_target(loop_label.clone());
        self.gen_expression(&stmt.test)?;
        self.emit("jf", out_label.clone());

        self.gen_statement(&stmt.body)?;
        self.gen_expression(&stmt.step)?;
        self.discard_expression_result(&stmt.step);

        self.emit("jmp", loop_label);

        self.emit_label_target(out_label);
        self.loop_entry_labels.pop();
        self.loop_exit_labels.pop();
        Ok(())
    }

    fn gen_foreach(&mut self, stmt: &ForeachStatement) -> Result<(), CompileError> {
        let out_label = self.new_label();
        let loop_label = self.new_label();
        self.loop_entry_labels.push(loop_label.clone());
        self.loop_exit_labels.push(out_label.clone());

        let decl = stmt.loop_var_decl.as_ref().ok_or_else(|| {
            CompileError::Internal("foreach reached codegen without desugaring".into())
        })?;
        let assignment = stmt.loop_assignment.as_ref().ok_or_else(|| {
            CompileError::Internal("foreach reached codegen without desugaring".into())
        })?;

        // loop variable, then the counter
        self.gen_variable_declaration(decl)?;
        self.emit("pushi", "#0".into());
        self.emit("movl", format!("{}", stmt.counter_slot));

        // counter < element count
        self.emit_label_target(loop_label.clone());
        self.emit("pushl", format!("{}", stmt.counter_slot));
        self.gen_expression(&stmt.array)?;
        if let Type::Array(arr) = &stmt.array.value_type {
            self.op("memsize");
            let elem_size = self.size_of(&arr.element, &stmt.array.span)?;
            if elem_size > 1 {
                self.emit("pushi", format!("#{}", elem_size));
                self.op("idiv");
            }
        } else {
            self.op("strlen");
        }
        self.op("lt");
        self.emit("jf", out_label.clone());

        self.gen_assignment(assignment)?;
        self.gen_statement(&stmt.body)?;

        self.emit("incl", format!("{}", stmt.counter_slot));
        self.emit("jmp", loop_label);

        self.emit_label_target(out_label);
        self.loop_entry_labels.pop();
        self.loop_exit_labels.pop();
        Ok(())
    }

    // ------------------------------------------------------------------
    // expressions
    // ------------------------------------------------------------------

    pub(crate) fn gen_expression(&mut self, expr: &Expression) -> Result<(), CompileError> {
        match &expr.kind {
            ExprKind::Primary(prim) => self.gen_primary(prim),
            ExprKind::Binop(binop) => self.gen_binop(binop),
            ExprKind::Assignment(assign) => self.gen_assignment(assign),
            ExprKind::Ternary(ternary) => {
                self.gen_expression(&ternary.cond)?;
                self.gen_expression(&ternary.true_branch)?;
                self.gen_expression(&ternary.false_branch)?;
                self.op("cmov");
                Ok(())
            }
        }
    }

    fn gen_assignment(&mut self, assign: &Assignment) -> Result<(), CompileError> {
        let target_type = assign.target.value_type.clone();

        // string element store: address arithmetic then a plain store
        if let PrimKind::Subscript(sub) = &assign.target.kind
            && sub.array.value_type.is_basic(BaseType::Str)
        {
            self.gen_primary(&sub.array)?;
            self.gen_expression(&sub.index)?;
            self.op("add");
            self.gen_expression(&assign.value)?;
            self.op("store");
            if !assign.discard_result {
                self.gen_primary(&assign.target)?;
            }
            return Ok(());
        }

        if !matches!(assign.target.kind, PrimKind::Ident(_)) {
            let saved = self.addr_calc_state;
            self.enter_addr_calc();
            self.gen_primary(&assign.target)?;
            self.addr_calc_state = saved;
        }

        if let PrimKind::Ident(ident) = &assign.target.kind {
            if let Some(name) = &ident.name {
                self.comment(format!("// {} = *sp", name.span.text()));
            }
            if target_type.is_struct() {
                // copy into the struct's storage
                if ident.global {
                    self.emit("pushg", format!("{}", ident.slot));
                } else {
                    self.emit("pushl", format!("{}", ident.slot));
                }
                let saved = self.addr_calc_state;
                self.enter_addr_calc();
                self.gen_expression(&assign.value)?;
                self.addr_calc_state = saved;

                let size = self.size_of(&target_type, &assign.target.span)?;
                self.emit("pushi", format!("#{}", size));
                self.op("copy");
            } else {
                self.gen_expression(&assign.value)?;
                if ident.global {
                    self.emit("movg", format!("{}", ident.slot));
                } else {
                    self.emit("movl", format!("{}", ident.slot));
                }
            }
        } else {
            self.gen_expression(&assign.value)?;
            if !target_type.is_struct() {
                self.op("store");
            } else {
                let size = self.size_of(&target_type, &assign.target.span)?;
                self.emit("pushi", format!("#{}", size));
                self.op("copy");
            }
        }

        if !assign.discard_result {
            self.gen_primary(&assign.target)?;
        }
        Ok(())
    }

    fn gen_binop(&mut self, binop: &Binop) -> Result<(), CompileError> {
        self.gen_expression(&binop.left)?;
        self.gen_expression(&binop.right)?;

        let op = binop.operator();
        let lt = &binop.left.value_type;
        let rt = &binop.right.value_type;

        // array element append
        if matches!(lt, Type::Array(_)) && matches!(rt, Type::Basic(_)) {
            self.op("arraycat");
            return Ok(());
        }
        // string + char code
        if lt.is_basic(BaseType::Str) && rt.is_basic(BaseType::Int) {
            self.op("stradd");
            return Ok(());
        }
        if op == Op::In {
            if lt.is_indirect() {
                let size = self.size_of(lt, &binop.left.span)?;
                self.emit("pushi", format!("#{}", size));
                self.op("findi");
            } else {
                self.op("find");
            }
            // find pushes -1 when absent; bump so absent is 0
            self.op("inc");
            return Ok(());
        }
        if let Some(overload) = self.overloads.find_binop(op, lt, rt) {
            self.emit("call", overload.mangled_name.to_string());
            return Ok(());
        }
        if matches!(lt, Type::Pointer(_)) || matches!(rt, Type::Pointer(_)) {
            let opcode = int_binop_opcode(op).ok_or_else(|| {
                CompileError::Internal(format!(
                    "no pointer opcode for operator {}",
                    op.info().symbol
                ))
            })?;
            self.op(opcode);
            return Ok(());
        }

        let base = match lt {
            Type::Basic(base) => *base,
            _ => {
                return Err(CompileError::Internal(format!(
                    "binary operator over {}",
                    self.types.display(lt)
                )));
            }
        };
        let opcode = binop_opcode(base, op).ok_or_else(|| {
            CompileError::Internal(format!(
                "no opcode for operator {} over {}",
                op.info().symbol,
                self.types.display(lt)
            ))
        })?;
        self.op(opcode);
        Ok(())
    }

    fn gen_primary(&mut self, prim: &PrimaryExpr) -> Result<(), CompileError> {
        match &prim.kind {
            PrimKind::Enclosed(expr) => self.gen_expression(expr),
            PrimKind::Unary(unary) => self.gen_unary(unary),
            PrimKind::Cast(cast) => self.gen_cast(cast),
            PrimKind::Ident(ident) => {
                self.gen_ident(ident);
                Ok(())
            }
            PrimKind::Call(call) => self.gen_call(call),
            PrimKind::Subscript(sub) => self.gen_subscript(sub),
            PrimKind::Slice(slice) => {
                self.gen_primary(&slice.array)?;
                self.gen_expression(&slice.left)?;
                self.gen_expression(&slice.right)?;
                self.op("getslice");
                Ok(())
            }
            PrimKind::RangeGen(range) => {
                self.gen_primary(&range.left)?;
                self.gen_primary(&range.right)?;
                self.op("mkrange");
                Ok(())
            }
            PrimKind::FieldAccess(access) => self.gen_struct_access(access),
            PrimKind::Deref(deref) => self.gen_deref(deref),
            PrimKind::AddrOf(addr) => self.gen_addr_of(addr),
            PrimKind::InlineAsm(asm) => {
                for arg in &asm.args {
                    self.gen_expression(arg)?;
                }
                self.emit("", asm.code.to_string());
                Ok(())
            }
            PrimKind::Match(m) => self.gen_match(m),
            PrimKind::Sizeof(sizeof) => {
                self.comment(format!("// sizeof({})", self.types.display(&sizeof.ty)));
                let size = self.size_of(&sizeof.ty, &sizeof.span)?;
                self.emit("pushi", format!("#{}", size));
                Ok(())
            }
            PrimKind::New(new) => {
                let size = self.size_of(&new.ty, &new.span)?;
                self.emit("pushi", format!("#{}", size));
                self.op("alloc");
                Ok(())
            }
            PrimKind::Random(random) => self.gen_random(random),
            PrimKind::ArrayLit(lit) => {
                self.emit("pushi", format!("#{}", lit.elements.len()));
                self.op("alloc");
                self.op("dup");
                for element in &lit.elements {
                    self.gen_expression(element)?;
                }
                self.emit("stackcpy", format!("#{}", lit.elements.len()));
                Ok(())
            }
            PrimKind::StructInit(init) => self.gen_struct_init(init),
            PrimKind::IntConst(tok) => {
                let TokenKind::Int(value) = tok.kind else {
                    return Err(CompileError::Internal("malformed int constant".into()));
                };
                self.emit("pushi", format!("#{}", value));
                Ok(())
            }
            PrimKind::FloatConst(tok) => {
                let TokenKind::Float(value) = tok.kind else {
                    return Err(CompileError::Internal("malformed float constant".into()));
                };
                self.emit("pushf", format!("#{:.6}", value));
                Ok(())
            }
            PrimKind::StrLit(tok) => {
                let TokenKind::Str(text) = &tok.kind else {
                    return Err(CompileError::Internal("malformed string literal".into()));
                };
                self.gen_string_literal(text);
                Ok(())
            }
            PrimKind::NullLit => {
                self.op("pushnull");
                Ok(())
            }
        }
    }

    fn gen_ident(&mut self, ident: &Ident) {
        if let Some(name) = &ident.name {
            self.comment(format!("// {}", name.span.text()));
        }
        if ident.global {
            self.emit("pushg", format!("{}", ident.slot));
        } else {
            self.emit("pushl", format!("{}", ident.slot));
        }
    }

    fn gen_string_literal(&mut self, text: &str) {
        // show short strings as a comment in the asm output
        if text.len() < 64 {
            self.comment(format!("// \"{}\"", text));
        }
        let id = self.program.strings.borrow_mut().intern(text);
        self.emit("pushs", format!("{}", id));
    }

    fn gen_unary(&mut self, unary: &UnaryExpr) -> Result<(), CompileError> {
        self.gen_primary(&unary.operand)?;

        let operand_type = &unary.operand.value_type;
        if unary.op.kind == TokenKind::Question {
            self.op("isnull");
            self.op("lnot");
            return Ok(());
        }
        let op = match unary.op.kind {
            TokenKind::Op(op) => op,
            _ => return Err(CompileError::Internal("unary without an operator".into())),
        };
        if let Some(overload) = self.overloads.find_unop(op, operand_type) {
            self.emit("call", overload.mangled_name.to_string());
            return Ok(());
        }

        match op {
            Op::Add => {} // nothing to do
            Op::Sub => {
                if operand_type.is_basic(BaseType::Real) {
                    self.op("fneg");
                } else {
                    self.op("neg");
                }
            }
            Op::LogicNot => self.op("lnot"),
            Op::Cat => self.op("not"),
            _ => {
                return Err(CompileError::Internal(format!(
                    "invalid unary operator {}",
                    op.info().symbol
                )));
            }
        }
        Ok(())
    }

    fn gen_cast(&mut self, cast: &CastExpr) -> Result<(), CompileError> {
        self.gen_primary(&cast.operand)?;

        let from = &cast.operand.value_type;
        let to = &cast.target_type;
        if matches!(from, Type::Pointer(_) | Type::Optional(_) | Type::Function(_)) {
            // reference-to-boolean cast: a null test
            self.op("isnull");
            self.op("lnot");
            return Ok(());
        }
        if from.matches(to) {
            return Ok(());
        }
        let (Type::Basic(from_base), Type::Basic(to_base)) = (from, to) else {
            return Err(CompileError::Internal("cast between non-basic types".into()));
        };
        let opcode = cast_opcode(*from_base, *to_base).ok_or_else(|| {
            CompileError::Internal(format!(
                "no conversion opcode from {} to {}",
                self.types.display(from),
                self.types.display(to)
            ))
        })?;
        self.op(opcode);
        Ok(())
    }

    fn gen_call(&mut self, call: &FunctionCall) -> Result<(), CompileError> {
        if let Some(builtin) = call.builtin {
            return builtins::emit(builtin, self, &call.args);
        }

        if !call.indirect {
            for arg in &call.args {
                self.gen_expression(arg)?;
            }
            let name = match &call.callee.kind {
                PrimKind::Ident(ident) => ident
                    .name
                    .as_ref()
                    .and_then(|t| t.ident_text())
                    .map(|n| n.to_string())
                    .ok_or_else(|| {
                        CompileError::Internal("direct call without a name".into())
                    })?,
                _ => {
                    return Err(CompileError::Internal(
                        "direct call through a non-identifier".into(),
                    ));
                }
            };
            self.emit("call", name);
        } else {
            // arguments first, then the callee on top
            for arg in &call.args {
                self.gen_expression(arg)?;
            }
            self.gen_primary(&call.callee)?;
            self.op("calli");
        }
        Ok(())
    }

    fn gen_subscript(&mut self, sub: &ArraySubscript) -> Result<(), CompileError> {
        let addr_mode = self.pop_addr_calc_state();

        self.gen_primary(&sub.array)?;

        if let Type::Array(arr) = &sub.array.value_type {
            self.gen_expression(&sub.index)?;
            if let Type::Array(_) = &arr.element {
                self.gen_array_size(&arr.element, &sub.bracket.span)?;
                self.comment(format!("// {}", self.types.display(&arr.element)));
                self.op("mul");
            } else {
                let elem_size = self.size_of(&arr.element, &sub.bracket.span)?;
                if elem_size > 1 {
                    self.emit("pushi", format!("#{}", elem_size));
                    self.comment(format!(
                        "// sizeof({})",
                        self.types.display(&arr.element)
                    ));
                    self.op("mul");
                }
            }
            self.op("add");
            if !addr_mode {
                self.op("load");
            }
        } else {
            // string element
            self.gen_expression(&sub.index)?;
            self.op("add");
            if !addr_mode {
                self.op("load");
            }
        }
        Ok(())
    }

    fn gen_struct_access(&mut self, access: &StructAccess) -> Result<(), CompileError> {
        let addr_mode = self.pop_addr_calc_state();
        let saved = self.addr_calc_state;
        if !access.indirect {
            self.enter_addr_calc();
        }
        self.gen_primary(&access.base)?;
        self.addr_calc_state = saved;

        if access.indirect && matches!(access.base.value_type, Type::Optional(_)) {
            self.op("chknotnul");
        }

        let field = access.field.as_ref().ok_or_else(|| {
            CompileError::Internal("unresolved field access in codegen".into())
        })?;
        let field_name = access.field_name.span.text().to_string();
        self.comment(format!("// {}", field_name));
        self.emit("pushi", format!("#{}", field.offset));
        self.op("add");

        if !addr_mode {
            self.comment(format!("// {}", field_name));
            self.op("load");
        }
        Ok(())
    }

    fn gen_deref(&mut self, deref: &DerefExpr) -> Result<(), CompileError> {
        let addr_mode = self.pop_addr_calc_state();

        self.gen_primary(&deref.pointer)?;
        if deref.is_optional_access {
            self.op("chknotnul");
        } else if !addr_mode {
            self.op("load");
        }
        Ok(())
    }

    fn gen_addr_of(&mut self, addr: &AddrExpr) -> Result<(), CompileError> {
        if let Some((name, _)) = &addr.addressed_function {
            self.emit("pushi", name.to_string());
            return Ok(());
        }

        if let PrimKind::Ident(ident) = &addr.operand.kind {
            if let Some(name) = &ident.name {
                self.comment(format!("// {}", name.span.text()));
            }
            if ident.ty.is_struct() {
                // struct variables already hold a pointer
                if ident.global {
                    self.emit("pushg", format!("{}", ident.slot));
                } else {
                    self.emit("pushl", format!("{}", ident.slot));
                }
            } else if ident.global {
                self.emit("getaddrg", format!("{}", ident.slot));
            } else {
                self.emit("getaddrl", format!("{}", ident.slot));
            }
            return Ok(());
        }

        let saved = self.addr_calc_state;
        self.enter_addr_calc();
        self.gen_primary(&addr.operand)?;
        self.addr_calc_state = saved;
        Ok(())
    }

    fn gen_random(&mut self, random: &RandomExpr) -> Result<(), CompileError> {
        match random {
            RandomExpr::Range { left, right } => {
                self.gen_primary(right)?;
                self.gen_primary(left)?;
                self.op("sub"); // range size
                self.op("randi");
                self.gen_primary(left)?;
                self.op("add");
                Ok(())
            }
            RandomExpr::Single { operand, mode } => {
                self.gen_primary(operand)?;
                match mode {
                    RandMode::Int => self.op("randi"),
                    RandMode::Float => self.op("randf"),
                    RandMode::Array => self.op("randa"),
                }
                Ok(())
            }
        }
    }

    fn gen_match(&mut self, m: &MatchExpr) -> Result<(), CompileError> {
        let out_label = self.new_label();

        self.gen_expression(&m.scrutinee)?;
        self.emit("movl", format!("{}", m.test_slot));

        for case in &m.cases {
            let next_label = self.new_label();

            if !case.is_wildcard {
                for (i, pattern) in case.patterns.iter().enumerate() {
                    self.emit("pushl", format!("{}", m.test_slot));
                    self.gen_pattern(pattern)?;
                    if i != 0 {
                        self.op("logicand");
                    }
                }
                self.emit("jf", next_label.clone());
            }

            self.gen_expression(&case.expr)?;
            self.emit("jmp", out_label.clone());

            self.emit_label_target(next_label);
        }

        self.emit_label_target(out_label);
        Ok(())
    }

    fn gen_pattern(&mut self, pattern: &MatchPattern) -> Result<(), CompileError> {
        match &pattern.kind {
            PatternKind::IntLit(tok) => {
                let TokenKind::Int(value) = tok.kind else {
                    return Err(CompileError::Internal("malformed int pattern".into()));
                };
                self.emit("pushi", format!("#{}", value));
                self.op("eq");
            }
            PatternKind::StrLit(tok) => {
                let TokenKind::Str(text) = &tok.kind else {
                    return Err(CompileError::Internal("malformed string pattern".into()));
                };
                let text = text.to_string();
                self.gen_string_literal(&text);
                self.op("streq");
            }
            PatternKind::Ident(ident) => {
                self.gen_ident(ident);
                if ident.ty.is_basic(BaseType::Str) {
                    self.op("streq");
                } else if ident.ty.is_basic(BaseType::Int) {
                    self.op("eq");
                } else {
                    return Err(Diagnostic::error(
                        pattern.span.clone(),
                        format!(
                            "invalid match ident type: {}",
                            self.types.display(&ident.ty)
                        ),
                    )
                    .into());
                }
            }
            PatternKind::Range(left, right) => {
                let (TokenKind::Int(lo), TokenKind::Int(hi)) = (&left.kind, &right.kind)
                else {
                    return Err(CompileError::Internal("malformed range pattern".into()));
                };
                self.op("dup");
                self.emit("pushi", format!("#{}", lo));
                self.op("ge");
                self.emit("pushi", format!("#{}", hi));
                self.op("le");
                self.op("logicand");
            }
        }
        Ok(())
    }

    fn gen_struct_init(&mut self, init: &StructInit) -> Result<(), CompileError> {
        let size = self.size_of(&init.ty, &init.span)?;
        self.emit("pushi", format!("#{}", size));
        self.op("alloc");

        let mut offset = 0usize;
        for arg in &init.args {
            self.op("dup");
            self.emit("pushi", format!("#{}", offset));
            self.op("add");

            self.gen_expression(arg)?;

            if !arg.value_type.is_struct() {
                self.op("store");
            } else {
                let field_size = self.size_of(&arg.value_type, &arg.span)?;
                self.emit("pushi", format!("#{}", field_size));
                self.op("copy");
            }
            offset += self.size_of(&arg.value_type, &arg.span)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_program;
    use crate::preprocessor::{Preprocessor, tokenize_program};

    fn lower(source: &str) -> String {
        let mut pp = Preprocessor::new(Vec::new());
        let tokens = tokenize_program(source, "test.opl", &mut pp).unwrap();
        let mut types = TypeTable::new();
        let mut program = parse_program(tokens, &mut types).unwrap();
        let mut overloads = OverloadTable::new();
        crate::semantic::analyze(&mut program, &mut types, &mut overloads).unwrap();
        for _ in 0..15 {
            crate::optimizer::optimize_program(&mut program);
        }
        let list = generate(&program, &types, &overloads).unwrap();
        list.emit_text(false)
    }

    #[test]
    fn test_constant_fold_to_push() {
        // S1: the folded constant reaches the stream as one push
        let asm = lower("int main() { return 1 + 2 * 3; }");
        assert!(asm.contains("pushi #7"), "asm was:\n{}", asm);
        assert!(asm.contains("main:"));
    }

    #[test]
    fn test_program_prologue() {
        let asm = lower("int g = 1;\nint main() { return g; }");
        assert!(asm.starts_with("_global_init:"), "asm was:\n{}", asm);
        assert!(asm.contains("jmp main"));
        assert!(asm.contains("movg 0"));
        assert!(asm.contains("pushg 0"));
    }

    #[test]
    fn test_while_shape() {
        let asm = lower("void main() { int i = 0; while (i < 10) i = i + 1; }");
        // target(loop); cond; jf out; body; jmp loop; target(out)
        assert!(asm.contains(".L1:\n"), "asm was:\n{}", asm);
        assert!(asm.contains("jf .L0"));
        assert!(asm.contains("jmp .L1"));
    }

    #[test]
    fn test_do_while_shape() {
        let asm = lower("void main() { int i = 0; do { i = i + 1; } while (i < 3); }");
        assert!(asm.contains("jt .L0"), "asm was:\n{}", asm);
    }

    #[test]
    fn test_mod_power_of_two_lowering() {
        // S3: x % 4 compiles to an and-mask, not mod
        let asm = lower("int f(int x) { return x % 4; }");
        assert!(asm.contains("pushi #3\nand"), "asm was:\n{}", asm);
        assert!(!asm.contains("\nmod"));
    }

    #[test]
    fn test_ternary_cmov() {
        let asm = lower("int f(int c) { return c ? 1 : 2; }");
        assert!(asm.contains("cmov"), "asm was:\n{}", asm);
    }

    #[test]
    fn test_direct_and_indirect_calls() {
        let asm = lower(
            "int id(int x) { return x; }\nint main() { int(int) f = &id; return id(1) + f(2); }",
        );
        assert!(asm.contains("call id"), "asm was:\n{}", asm);
        assert!(asm.contains("calli"));
        assert!(asm.contains("pushi id"));
    }

    #[test]
    fn test_foreach_shape() {
        // S5: counter init, memsize bound, incl, loop back
        let asm = lower(
            "int f(int x) { return x; }\nvoid main() { int[4] a; foreach(x in a) f(x); }",
        );
        assert!(asm.contains("memsize"), "asm was:\n{}", asm);
        assert!(asm.contains("lt"));
        assert!(asm.contains("incl 2"));
        assert!(asm.contains("jmp .L1"));
        assert!(asm.contains("jf .L0"));
    }

    #[test]
    fn test_string_interning() {
        let asm = lower(
            "str a() { return \"hi\"; }\nstr b() { return \"hi\"; }\nstr c() { return \"other\"; }",
        );
        assert!(asm.contains("pushs 0"), "asm was:\n{}", asm);
        assert!(asm.contains("pushs 1"));
        assert!(asm.contains(".string 0, \"hi\""));
        assert!(asm.contains(".string 1, \"other\""));
        // deduplicated: "hi" appears once in the table
        assert_eq!(asm.matches(".string").count(), 2);
    }

    #[test]
    fn test_new_expression() {
        let asm = lower(
            "struct pair { int a; int b; };\nvoid main() { pair* p = new pair; }",
        );
        assert!(asm.contains("pushi #2\nalloc"), "asm was:\n{}", asm);
    }

    #[test]
    fn test_struct_initializer_lowering() {
        let asm = lower(
            "struct pair { int a; int b; };\nvoid main() { pair p = pair(1, 2); }",
        );
        // one alloc, then dup/offset/store per field
        assert!(asm.contains("dup\npushi #0\nadd"), "asm was:\n{}", asm);
        assert!(asm.contains("dup\npushi #1\nadd"));
        assert!(asm.contains("store"));
    }

    #[test]
    fn test_array_literal_lowering() {
        let asm = lower("void main() { int[] a = {5, 6, 7}; }");
        assert!(asm.contains("pushi #3\nalloc\ndup"), "asm was:\n{}", asm);
        assert!(asm.contains("stackcpy #3"));
    }

    #[test]
    fn test_subscript_load_vs_store() {
        let asm = lower("void main() { int[4] a; a[1] = 9; int x = a[2]; }");
        // store side: no load before the store; read side ends in load
        assert!(asm.contains("store"), "asm was:\n{}", asm);
        assert!(asm.contains("load"));
    }

    #[test]
    fn test_struct_field_access() {
        let asm = lower(
            "struct pair { int a; int b; };\nint f(pair p) { return p.b; }",
        );
        assert!(asm.contains("pushi #1\nadd\nload"), "asm was:\n{}", asm);
    }

    #[test]
    fn test_match_lowering() {
        let asm = lower(
            "int f(int x) { return match(x) { 1|2 => 10, 3..4 => 20, _ => 0 }; }",
        );
        assert!(asm.contains("logicand"), "asm was:\n{}", asm);
        assert!(asm.contains("dup\npushi #3\nge"));
        // every non-wildcard case tests and falls through to the next label
        assert!(asm.matches("jf").count() >= 2);
    }

    #[test]
    fn test_inline_asm_passthrough() {
        let asm = lower("void main() { int v = 1; asm(\"syscall #0\", v); }");
        assert!(asm.contains("syscall #0"), "asm was:\n{}", asm);
    }

    #[test]
    fn test_in_operator() {
        let asm = lower("int main() { int[3] a; return 2 in a; }");
        assert!(asm.contains("find"), "asm was:\n{}", asm);
        assert!(asm.contains("inc"));
    }

    #[test]
    fn test_overload_call() {
        let asm = lower(
            "struct v2 { int x; int y; };\nv2 operator+(v2 a, v2 b) { return a; }\nv2 f(v2 a, v2 b) { return a + b; }",
        );
        assert!(
            asm.contains("call operatorbadd_v2_v2"),
            "asm was:\n{}",
            asm
        );
        assert!(asm.contains("operatorbadd_v2_v2:"));
    }

    #[test]
    fn test_optional_handling() {
        let asm = lower("int f(int? o) { if (?o) { return *o; } return 0; }");
        assert!(asm.contains("isnull\nlnot"), "asm was:\n{}", asm);
        assert!(asm.contains("chknotnul"));
    }

    #[test]
    fn test_random_lowering() {
        let asm = lower("int main() { return %1..6; }");
        // right; left; sub; randi; left; add
        assert!(asm.contains("sub\nrandi"), "asm was:\n{}", asm);
    }

    #[test]
    fn test_links_consistent_after_generation() {
        let mut pp = Preprocessor::new(Vec::new());
        let tokens = tokenize_program(
            "int main() { int x = 1; while (x < 10) x = x * 2; return x; }",
            "test.opl",
            &mut pp,
        )
        .unwrap();
        let mut types = TypeTable::new();
        let mut program = parse_program(tokens, &mut types).unwrap();
        let mut overloads = OverloadTable::new();
        crate::semantic::analyze(&mut program, &mut types, &mut overloads).unwrap();
        let list = generate(&program, &types, &overloads).unwrap();
        assert!(list.links_consistent());
    }
}
