//! Built-in functions
//!
//! Builtins have pseudo-typed signatures (`<array>`, `<pointer>`, `<any>`)
//! so one entry covers every concrete element type, and they lower straight
//! to opcodes instead of `call`s.

use crate::ast::Expression;
use crate::codegen::CodeGen;
use crate::diagnostics::CompileError;
use crate::types::{BaseType, FunctionSignature, Type};
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Size,
    Resize,
    Alloc,
    Find,
    Cos,
    Sin,
    Tan,
    Acos,
    Asin,
    Atan,
    Atan2,
    Pow,
    Ln,
    Log10,
    Exp,
    Sqrt,
    Abs,
    Fabs,
    Ceil,
    Floor,
    Rad2Deg,
    Deg2Rad,
}

pub fn find_builtin(name: &str) -> Option<Builtin> {
    Some(match name {
        "size" => Builtin::Size,
        "resize" => Builtin::Resize,
        "alloc" => Builtin::Alloc,
        "find" => Builtin::Find,
        "cos" => Builtin::Cos,
        "sin" => Builtin::Sin,
        "tan" => Builtin::Tan,
        "acos" => Builtin::Acos,
        "asin" => Builtin::Asin,
        "atan" => Builtin::Atan,
        "atan2" => Builtin::Atan2,
        "pow" => Builtin::Pow,
        "ln" => Builtin::Ln,
        "log10" => Builtin::Log10,
        "exp" => Builtin::Exp,
        "sqrt" => Builtin::Sqrt,
        "abs" => Builtin::Abs,
        "fabs" => Builtin::Fabs,
        "ceil" => Builtin::Ceil,
        "floor" => Builtin::Floor,
        "rad2deg" => Builtin::Rad2Deg,
        "deg2rad" => Builtin::Deg2Rad,
        _ => return None,
    })
}

impl Builtin {
    pub fn signature(self) -> Rc<FunctionSignature> {
        let int = || Type::Basic(BaseType::Int);
        let real = || Type::Basic(BaseType::Real);
        let array = || Type::Basic(BaseType::AnyArray);
        let (ret_type, params) = match self {
            Builtin::Size => (int(), vec![array()]),
            Builtin::Resize => (Type::Basic(BaseType::Void), vec![array(), int()]),
            Builtin::Alloc => (Type::Basic(BaseType::AnyPointer), vec![int()]),
            Builtin::Find => (int(), vec![array(), Type::Basic(BaseType::Any)]),
            Builtin::Atan2 | Builtin::Pow => (real(), vec![real(), real()]),
            Builtin::Abs => (int(), vec![int()]),
            Builtin::Cos
            | Builtin::Sin
            | Builtin::Tan
            | Builtin::Acos
            | Builtin::Asin
            | Builtin::Atan
            | Builtin::Ln
            | Builtin::Log10
            | Builtin::Exp
            | Builtin::Sqrt
            | Builtin::Fabs
            | Builtin::Ceil
            | Builtin::Floor
            | Builtin::Rad2Deg
            | Builtin::Deg2Rad => (real(), vec![real()]),
        };
        Rc::new(FunctionSignature { ret_type, params })
    }

    fn opcode(self) -> &'static str {
        match self {
            Builtin::Cos => "cos",
            Builtin::Sin => "sin",
            Builtin::Tan => "tan",
            Builtin::Acos => "acos",
            Builtin::Asin => "asin",
            Builtin::Atan => "atan",
            Builtin::Atan2 => "atan2",
            Builtin::Pow => "pow",
            Builtin::Ln => "ln",
            Builtin::Log10 => "log10",
            Builtin::Exp => "exp",
            Builtin::Sqrt => "sqrt",
            Builtin::Abs => "abs",
            Builtin::Fabs => "fabs",
            Builtin::Ceil => "ceil",
            Builtin::Floor => "floor",
            Builtin::Rad2Deg => "rad2deg",
            Builtin::Deg2Rad => "deg2rad",
            _ => unreachable!("builtin without a direct opcode"),
        }
    }
}

/// Lower a builtin call. Arguments were type-checked by the semantic pass.
pub fn emit(
    builtin: Builtin,
    cg: &mut CodeGen<'_>,
    args: &[Expression],
) -> Result<(), CompileError> {
    match builtin {
        Builtin::Size => {
            cg.gen_expression(&args[0])?;
            if matches!(args[0].value_type, Type::Array(_)) {
                cg.emit("memsize", String::new());
                let size = cg.size_of(&args[0].value_type, &args[0].span)?;
                if size > 1 {
                    cg.emit("pushi", format!("#{}", size));
                    cg.emit("idiv", String::new());
                }
            } else {
                cg.emit("strlen", String::new());
            }
        }
        Builtin::Resize => {
            cg.gen_expression(&args[0])?;
            cg.gen_expression(&args[1])?;
            if matches!(args[0].value_type, Type::Array(_)) {
                let size = cg.size_of(&args[0].value_type, &args[0].span)?;
                if size > 1 {
                    cg.emit("pushi", format!("#{}", size));
                    cg.emit("mul", String::new());
                }
                cg.emit("memresize", String::new());
            } else {
                cg.emit("strresize", String::new());
            }
        }
        Builtin::Alloc => {
            cg.gen_expression(&args[0])?;
            cg.emit("alloc", String::new());
        }
        Builtin::Find => {
            cg.gen_expression(&args[1])?; // element
            cg.gen_expression(&args[0])?; // array
            if args[1].value_type.is_indirect() {
                let size = cg.size_of(&args[1].value_type, &args[1].span)?;
                cg.emit("pushi", format!("#{}", size));
                cg.emit("findi", String::new());
            } else {
                cg.emit("find", String::new());
            }
        }
        Builtin::Atan2 | Builtin::Pow => {
            cg.gen_expression(&args[0])?;
            cg.gen_expression(&args[1])?;
            cg.emit(builtin.opcode(), String::new());
        }
        _ => {
            cg.gen_expression(&args[0])?;
            cg.emit(builtin.opcode(), String::new());
        }
    }
    Ok(())
}
