//! The Opal type system
//!
//! Types are a small tagged sum over base types, pointers, optionals, arrays
//! and function types. Struct types are referenced indirectly through a
//! stable id into the [`TypeTable`], which keeps ownership acyclic: the AST
//! and the table never point at each other directly.
//!
//! The pseudo base types (`AnyArray`, `AnyPointer`, `Null`, `Any`) exist only
//! to express polymorphic builtin signatures and the type of the `null`
//! literal; they act as wildcards in [`Type::matches`].

use crate::ast::Expression;
use std::collections::HashMap;
use std::rc::Rc;

/// Stack cell size of every POD value (int, real, str handle, pointer).
pub const POD_SIZE: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseType {
    Int,
    Real,
    Str,
    Void,
    /// matches any array type or `str`
    AnyArray,
    /// matches any pointer type
    AnyPointer,
    /// the type of the `null` literal; matches any pointer type
    Null,
    /// matches anything
    Any,
    /// a user-defined structure, by stable id
    Struct(u32),
}

#[derive(Debug, Clone)]
pub enum Type {
    Basic(BaseType),
    Pointer(Box<Type>),
    Optional(Box<Type>),
    Array(Box<ArrayType>),
    Function(Rc<FunctionSignature>),
}

#[derive(Debug, Clone)]
pub struct ArrayType {
    pub element: Type,
    /// Size expression from the declaration; `None` for `T[]`
    pub initial_size: Option<Expression>,
    pub is_empty: bool,
}

#[derive(Debug, Clone)]
pub struct FunctionSignature {
    pub ret_type: Type,
    pub params: Vec<Type>,
}

impl Type {
    pub fn basic(base: BaseType) -> Type {
        Type::Basic(base)
    }

    pub fn pointer_to(inner: Type) -> Type {
        Type::Pointer(Box::new(inner))
    }

    pub fn optional_of(inner: Type) -> Type {
        Type::Optional(Box::new(inner))
    }

    pub fn array_of(element: Type, initial_size: Option<Expression>) -> Type {
        let is_empty = initial_size.is_none();
        Type::Array(Box::new(ArrayType {
            element,
            initial_size,
            is_empty,
        }))
    }

    pub fn is_basic(&self, base: BaseType) -> bool {
        matches!(self, Type::Basic(b) if *b == base)
    }

    pub fn is_struct(&self) -> bool {
        matches!(self, Type::Basic(BaseType::Struct(_)))
    }

    pub fn struct_id(&self) -> Option<u32> {
        match self {
            Type::Basic(BaseType::Struct(id)) => Some(*id),
            _ => None,
        }
    }

    /// Indirect types are stored behind a reference on the stack, so
    /// element-wise searches compare by size rather than by cell.
    pub fn is_indirect(&self) -> bool {
        self.is_struct() || matches!(self, Type::Array(_))
    }

    /// Structural type equality with pseudo-type wildcards.
    ///
    /// `AnyArray` matches any array type or `str`; `AnyPointer` and `Null`
    /// match any pointer; `Any` matches everything. These appear on either
    /// side.
    pub fn matches(&self, other: &Type) -> bool {
        fn pseudo_match(a: &Type, b: &Type) -> bool {
            match a {
                Type::Basic(BaseType::AnyArray) => {
                    matches!(b, Type::Array(_)) || b.is_basic(BaseType::Str)
                }
                Type::Basic(BaseType::AnyPointer) | Type::Basic(BaseType::Null) => {
                    matches!(b, Type::Pointer(_))
                }
                Type::Basic(BaseType::Any) => true,
                _ => false,
            }
        }
        if pseudo_match(self, other) || pseudo_match(other, self) {
            return true;
        }

        match (self, other) {
            (Type::Basic(a), Type::Basic(b)) => a == b,
            (Type::Pointer(a), Type::Pointer(b)) => a.matches(b),
            (Type::Optional(a), Type::Optional(b)) => a.matches(b),
            (Type::Array(a), Type::Array(b)) => a.element.matches(&b.element),
            (Type::Function(a), Type::Function(b)) => {
                a.ret_type.matches(&b.ret_type)
                    && a.params.len() == b.params.len()
                    && a.params.iter().zip(&b.params).all(|(x, y)| x.matches(y))
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StructField {
    pub name: Rc<str>,
    pub ty: Type,
    pub size: usize,
    pub offset: usize,
}

#[derive(Debug, Clone)]
pub struct Structure {
    pub name: Rc<str>,
    pub fields: Vec<StructField>,
    pub byte_size: usize,
    pub incomplete: bool,
}

impl Structure {
    pub fn field(&self, name: &str) -> Option<&StructField> {
        self.fields.iter().find(|f| &*f.name == name)
    }
}

// 0 - cannot, 1 - explicit only, 2 - always
// rows: from (int, real, str, void); columns: to
const CAST_MATRIX: [[u8; 4]; 4] = [
    [2, 2, 0, 0], // int to
    [1, 2, 0, 0], // real to
    [0, 0, 2, 0], // str to
    [0, 0, 0, 0], // void to
];

fn pod_index(base: BaseType) -> Option<usize> {
    match base {
        BaseType::Int => Some(0),
        BaseType::Real => Some(1),
        BaseType::Str => Some(2),
        BaseType::Void => Some(3),
        _ => None,
    }
}

fn cast_rank(from: &Type, to: &Type) -> u8 {
    match (from, to) {
        (Type::Basic(f), Type::Basic(t)) => match (pod_index(*f), pod_index(*t)) {
            (Some(fi), Some(ti)) => CAST_MATRIX[fi][ti],
            _ => 0,
        },
        _ => 0,
    }
}

/// Registry of named types: the built-in base names, struct definitions
/// (with stable ids) and typedef aliases. Append-only for the lifetime of
/// one compilation.
#[derive(Debug, Default)]
pub struct TypeTable {
    structs: Vec<Structure>,
    struct_names: HashMap<Rc<str>, u32>,
    typedefs: Vec<(Rc<str>, Type)>,
}

impl TypeTable {
    pub fn new() -> Self {
        TypeTable::default()
    }

    /// Resolve a base type name: builtin names, struct names, then typedefs.
    pub fn lookup(&self, name: &str) -> Option<Type> {
        match name {
            "int" => return Some(Type::Basic(BaseType::Int)),
            "real" => return Some(Type::Basic(BaseType::Real)),
            "str" => return Some(Type::Basic(BaseType::Str)),
            "void" => return Some(Type::Basic(BaseType::Void)),
            _ => {}
        }
        if let Some(id) = self.struct_names.get(name) {
            return Some(Type::Basic(BaseType::Struct(*id)));
        }
        self.typedefs
            .iter()
            .find(|(alias, _)| &**alias == name)
            .map(|(_, ty)| ty.clone())
    }

    /// Install an incomplete struct entry; the id is stable across
    /// completion.
    pub fn forward_declare(&mut self, name: &str) -> Type {
        if let Some(id) = self.struct_names.get(name) {
            return Type::Basic(BaseType::Struct(*id));
        }
        let id = self.structs.len() as u32;
        let name: Rc<str> = name.into();
        self.structs.push(Structure {
            name: Rc::clone(&name),
            fields: Vec::new(),
            byte_size: 0,
            incomplete: true,
        });
        self.struct_names.insert(name, id);
        Type::Basic(BaseType::Struct(id))
    }

    /// Fill in a forward-declared struct in place.
    pub fn complete_struct(&mut self, ty: &Type, fields: Vec<StructField>, byte_size: usize) {
        let id = ty.struct_id().expect("not a struct type");
        let entry = &mut self.structs[id as usize];
        entry.fields = fields;
        entry.byte_size = byte_size;
        entry.incomplete = false;
    }

    pub fn get_struct(&self, ty: &Type) -> Option<&Structure> {
        ty.struct_id().map(|id| &self.structs[id as usize])
    }

    pub fn is_struct(&self, ty: &Type) -> bool {
        ty.is_struct()
    }

    pub fn add_typedef(&mut self, alias: &str, ty: Type) {
        self.typedefs.push((alias.into(), ty));
    }

    /// Stack size of a value of this type. Arrays report their element size
    /// (allocation multiplies the dimensions separately); incomplete structs
    /// report `None`.
    pub fn size_of(&self, ty: &Type) -> Option<usize> {
        match ty {
            Type::Array(arr) => self.size_of(&arr.element),
            Type::Basic(BaseType::Struct(id)) => {
                let s = &self.structs[*id as usize];
                if s.incomplete { None } else { Some(s.byte_size) }
            }
            _ => Some(POD_SIZE),
        }
    }

    pub fn can_implicit_cast(&self, from: &Type, to: &Type) -> bool {
        from.matches(to) || cast_rank(from, to) >= 2
    }

    pub fn can_explicit_cast(&self, from: &Type, to: &Type) -> bool {
        from.matches(to) || cast_rank(from, to) >= 1
    }

    /// Render a type in source syntax: postfix declarators after the base
    /// name, `ret(params)` for function types.
    pub fn display(&self, ty: &Type) -> String {
        let mut suffixes = Vec::new();
        let mut cur = ty;
        loop {
            match cur {
                Type::Array(arr) => {
                    suffixes.push("[]");
                    cur = &arr.element;
                }
                Type::Pointer(inner) => {
                    suffixes.push("*");
                    cur = inner;
                }
                Type::Optional(inner) => {
                    suffixes.push("?");
                    cur = inner;
                }
                _ => break,
            }
        }

        let mut out = match cur {
            Type::Function(sig) => {
                let params: Vec<String> = sig.params.iter().map(|p| self.display(p)).collect();
                format!("{}({})", self.display(&sig.ret_type), params.join(", "))
            }
            Type::Basic(base) => match base {
                BaseType::Int => "int".to_string(),
                BaseType::Real => "real".to_string(),
                BaseType::Str => "str".to_string(),
                BaseType::Void => "void".to_string(),
                BaseType::AnyArray => "<array>".to_string(),
                BaseType::AnyPointer => "<pointer>".to_string(),
                BaseType::Null => "<null>".to_string(),
                BaseType::Any => "<any>".to_string(),
                BaseType::Struct(id) => self.structs[*id as usize].name.to_string(),
            },
            _ => unreachable!(),
        };
        for suffix in suffixes.iter().rev() {
            out.push_str(suffix);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int() -> Type {
        Type::Basic(BaseType::Int)
    }
    fn real() -> Type {
        Type::Basic(BaseType::Real)
    }
    fn strty() -> Type {
        Type::Basic(BaseType::Str)
    }

    #[test]
    fn test_pseudo_wildcards() {
        let arr = Type::array_of(int(), None);
        let any_array = Type::Basic(BaseType::AnyArray);
        assert!(any_array.matches(&arr));
        assert!(arr.matches(&any_array));
        assert!(any_array.matches(&strty()));

        let ptr = Type::pointer_to(int());
        assert!(Type::Basic(BaseType::AnyPointer).matches(&ptr));
        assert!(Type::Basic(BaseType::Null).matches(&ptr));
        assert!(!Type::Basic(BaseType::Null).matches(&int()));

        assert!(Type::Basic(BaseType::Any).matches(&int()));
        assert!(Type::Basic(BaseType::Any).matches(&arr));
        assert!(Type::Basic(BaseType::Any).matches(&ptr));
    }

    #[test]
    fn test_structural_equality() {
        assert!(int().matches(&int()));
        assert!(!int().matches(&real()));
        assert!(Type::pointer_to(int()).matches(&Type::pointer_to(int())));
        assert!(!Type::pointer_to(int()).matches(&Type::pointer_to(real())));
        assert!(Type::optional_of(strty()).matches(&Type::optional_of(strty())));
        // array equality ignores the size expression
        assert!(Type::array_of(int(), None).matches(&Type::array_of(int(), None)));
    }

    #[test]
    fn test_function_type_equality() {
        let sig_a = Rc::new(FunctionSignature {
            ret_type: int(),
            params: vec![int(), real()],
        });
        let sig_b = Rc::new(FunctionSignature {
            ret_type: int(),
            params: vec![int(), real()],
        });
        let sig_c = Rc::new(FunctionSignature {
            ret_type: int(),
            params: vec![real(), int()],
        });
        assert!(Type::Function(sig_a.clone()).matches(&Type::Function(sig_b)));
        assert!(!Type::Function(sig_a).matches(&Type::Function(sig_c)));
    }

    #[test]
    fn test_cast_matrix() {
        let table = TypeTable::new();
        assert!(table.can_implicit_cast(&int(), &real()));
        assert!(table.can_implicit_cast(&int(), &int()));
        assert!(!table.can_implicit_cast(&real(), &int()));
        assert!(table.can_explicit_cast(&real(), &int()));
        assert!(!table.can_explicit_cast(&int(), &strty()));
        assert!(!table.can_explicit_cast(&strty(), &int()));
        assert!(!table.can_implicit_cast(&Type::Basic(BaseType::Void), &int()));
    }

    #[test]
    fn test_optional_cast_is_not_pod() {
        let table = TypeTable::new();
        let opt = Type::optional_of(int());
        // the plain matrix does not admit it; the semantic pass special-cases
        // optionals and null
        assert!(!table.can_implicit_cast(&int(), &opt));
    }

    #[test]
    fn test_struct_lifecycle() {
        let mut table = TypeTable::new();
        let ty = table.forward_declare("point");
        assert!(table.get_struct(&ty).unwrap().incomplete);
        assert_eq!(table.size_of(&ty), None);

        let fields = vec![
            StructField {
                name: "x".into(),
                ty: Type::Basic(BaseType::Int),
                size: 1,
                offset: 0,
            },
            StructField {
                name: "y".into(),
                ty: Type::Basic(BaseType::Int),
                size: 1,
                offset: 1,
            },
        ];
        table.complete_struct(&ty, fields, 2);
        let s = table.get_struct(&ty).unwrap();
        assert!(!s.incomplete);
        assert_eq!(s.field("y").unwrap().offset, 1);
        assert_eq!(table.size_of(&ty), Some(2));

        // the id resolves to the same struct after completion
        let again = table.lookup("point").unwrap();
        assert!(again.matches(&ty));
    }

    #[test]
    fn test_display() {
        let mut table = TypeTable::new();
        let point = table.forward_declare("point");
        assert_eq!(table.display(&int()), "int");
        assert_eq!(table.display(&Type::pointer_to(int())), "int*");
        assert_eq!(
            table.display(&Type::optional_of(Type::pointer_to(point))),
            "point*?"
        );
        assert_eq!(table.display(&Type::array_of(int(), None)), "int[]");
        let sig = Rc::new(FunctionSignature {
            ret_type: int(),
            params: vec![int(), strty()],
        });
        assert_eq!(table.display(&Type::Function(sig)), "int(int, str)");
    }

    #[test]
    fn test_sizes() {
        let table = TypeTable::new();
        assert_eq!(table.size_of(&int()), Some(1));
        assert_eq!(table.size_of(&Type::pointer_to(int())), Some(1));
        assert_eq!(table.size_of(&Type::array_of(int(), None)), Some(1));
    }
}
