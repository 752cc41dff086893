//! Syntax tree for the shader-authoring language.
//!
//! The tree is deliberately close to the surface syntax: analyses need to see every
//! construct (including the ones HLSL cannot express) so they can be reported with a
//! precise location.

use bitflags::bitflags;

use crate::span::Span;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CompilationUnit {
    pub usings: Vec<UsingDirective>,
    /// Top-level types from every namespace in the file, in source order.
    pub types: Vec<TypeDecl>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UsingDirective {
    pub alias: Option<String>,
    pub is_static: bool,
    pub target: TypeRef,
    pub span: Span,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Modifiers: u32 {
        const PUBLIC = 1 << 0;
        const PRIVATE = 1 << 1;
        const PROTECTED = 1 << 2;
        const INTERNAL = 1 << 3;
        const FILE = 1 << 4;
        const STATIC = 1 << 5;
        const READONLY = 1 << 6;
        const CONST = 1 << 7;
        const UNSAFE = 1 << 8;
        const ASYNC = 1 << 9;
        const PARTIAL = 1 << 10;
        const EXTERN = 1 << 11;
        const VOLATILE = 1 << 12;
        const NEW = 1 << 13;
        const OVERRIDE = 1 << 14;
        const VIRTUAL = 1 << 15;
        const ABSTRACT = 1 << 16;
        const SEALED = 1 << 17;
        const REF = 1 << 18;
        const FIXED = 1 << 19;
        const REQUIRED = 1 << 20;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    /// Attribute name as written, without a trailing `Attribute` suffix.
    pub name: String,
    pub args: Vec<Argument>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeDeclKind {
    Struct,
    Class,
    Interface,
    Record,
    RecordStruct,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeDecl {
    pub attributes: Vec<Attribute>,
    pub modifiers: Modifiers,
    pub kind: TypeDeclKind,
    pub name: String,
    pub type_params: Vec<String>,
    pub bases: Vec<TypeRef>,
    pub members: Vec<Member>,
    pub namespace: Option<String>,
    pub span: Span,
}

impl TypeDecl {
    pub fn fields(&self) -> impl Iterator<Item = &FieldDecl> {
        self.members.iter().filter_map(|m| match m {
            Member::Field(f) => Some(f),
            _ => None,
        })
    }

    pub fn methods(&self) -> impl Iterator<Item = &MethodDecl> {
        self.members.iter().filter_map(|m| match m {
            Member::Method(m) => Some(m),
            _ => None,
        })
    }

    pub fn nested_types(&self) -> impl Iterator<Item = &TypeDecl> {
        self.members.iter().filter_map(|m| match m {
            Member::Type(t) => Some(t),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Member {
    Field(FieldDecl),
    Method(MethodDecl),
    Property(PropertyDecl),
    Constructor(ConstructorDecl),
    Type(TypeDecl),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    pub attributes: Vec<Attribute>,
    pub modifiers: Modifiers,
    pub ty: TypeRef,
    pub declarators: Vec<VariableDeclarator>,
    pub span: Span,
}

impl FieldDecl {
    pub fn is_static(&self) -> bool {
        self.modifiers
            .intersects(Modifiers::STATIC | Modifiers::CONST)
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariableDeclarator {
    pub name: String,
    /// Size of a `fixed` buffer declarator (`fixed float values[4]`).
    pub fixed_size: Option<Expr>,
    pub init: Option<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamModifier {
    Ref,
    Out,
    In,
    This,
    Params,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub attributes: Vec<Attribute>,
    pub modifier: Option<ParamModifier>,
    pub ty: TypeRef,
    pub name: String,
    pub default: Option<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MethodBody {
    Block(Block),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodDecl {
    pub attributes: Vec<Attribute>,
    pub modifiers: Modifiers,
    pub return_type: TypeRef,
    /// `IFoo.Bar` style explicit interface implementations.
    pub explicit_interface: Option<TypeRef>,
    pub name: String,
    pub type_params: Vec<String>,
    pub params: Vec<Param>,
    pub body: Option<MethodBody>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Accessor {
    pub name: String,
    pub body: Option<MethodBody>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDecl {
    pub attributes: Vec<Attribute>,
    pub modifiers: Modifiers,
    pub ty: TypeRef,
    pub name: String,
    pub accessors: Vec<Accessor>,
    pub expression_body: Option<Expr>,
    pub init: Option<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConstructorDecl {
    pub modifiers: Modifiers,
    pub name: String,
    pub params: Vec<Param>,
    pub body: Option<MethodBody>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeRef {
    pub kind: TypeRefKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeRefKind {
    /// Simple, qualified or predefined name (`float`, `ComputeSharp.Float4`,
    /// `ReadWriteBuffer<float>`). `var` is a named type at this level.
    Named { name: String, args: Vec<TypeRef> },
    Array { element: Box<TypeRef>, rank: u32 },
    Pointer(Box<TypeRef>),
    FunctionPointer { params: Vec<TypeRef> },
    Tuple(Vec<TypeRef>),
    Ref { readonly: bool, inner: Box<TypeRef> },
    Nullable(Box<TypeRef>),
}

impl TypeRef {
    pub fn named(name: impl Into<String>, span: Span) -> Self {
        Self {
            kind: TypeRefKind::Named {
                name: name.into(),
                args: Vec::new(),
            },
            span,
        }
    }

    /// Last segment of a named type (`Float4` for `ComputeSharp.Float4`).
    pub fn simple_name(&self) -> Option<&str> {
        match &self.kind {
            TypeRefKind::Named { name, .. } => Some(name.rsplit('.').next().unwrap_or(name)),
            _ => None,
        }
    }

    pub fn generic_args(&self) -> &[TypeRef] {
        match &self.kind {
            TypeRefKind::Named { args, .. } => args,
            _ => &[],
        }
    }

    pub fn is_var(&self) -> bool {
        matches!(&self.kind, TypeRefKind::Named { name, args } if name == "var" && args.is_empty())
    }

    pub fn is_void(&self) -> bool {
        matches!(&self.kind, TypeRefKind::Named { name, args } if name == "void" && args.is_empty())
    }
}

impl std::fmt::Display for TypeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            TypeRefKind::Named { name, args } => {
                f.write_str(name)?;
                if !args.is_empty() {
                    f.write_str("<")?;
                    for (i, arg) in args.iter().enumerate() {
                        if i > 0 {
                            f.write_str(", ")?;
                        }
                        write!(f, "{arg}")?;
                    }
                    f.write_str(">")?;
                }
                Ok(())
            }
            TypeRefKind::Array { element, rank } => {
                write!(f, "{element}[")?;
                for _ in 1..*rank {
                    f.write_str(",")?;
                }
                f.write_str("]")
            }
            TypeRefKind::Pointer(inner) => write!(f, "{inner}*"),
            TypeRefKind::FunctionPointer { params } => {
                f.write_str("delegate*<")?;
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{p}")?;
                }
                f.write_str(">")
            }
            TypeRefKind::Tuple(items) => {
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str(")")
            }
            TypeRefKind::Ref { readonly, inner } => {
                if *readonly {
                    write!(f, "ref readonly {inner}")
                } else {
                    write!(f, "ref {inner}")
                }
            }
            TypeRefKind::Nullable(inner) => write!(f, "{inner}?"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocalDecl {
    pub ty: TypeRef,
    pub declarators: Vec<VariableDeclarator>,
    pub is_const: bool,
    /// `using var x = ...;`
    pub is_using: bool,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ForInit {
    Decl(LocalDecl),
    Exprs(Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SwitchLabel {
    Case { pattern: Pattern, guard: Option<Expr> },
    Default,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchSection {
    pub labels: Vec<SwitchLabel>,
    pub stmts: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatchClause {
    pub ty: Option<TypeRef>,
    pub name: Option<String>,
    pub filter: Option<Expr>,
    pub body: Block,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Block(Block),
    Local(LocalDecl),
    LocalFunction(MethodDecl),
    Expr(Expr),
    If {
        cond: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },
    While {
        cond: Expr,
        body: Box<Stmt>,
    },
    DoWhile {
        body: Box<Stmt>,
        cond: Expr,
    },
    For {
        init: Option<ForInit>,
        cond: Option<Expr>,
        step: Vec<Expr>,
        body: Box<Stmt>,
    },
    ForEach {
        ty: TypeRef,
        name: String,
        iter: Expr,
        body: Box<Stmt>,
    },
    Switch {
        scrutinee: Expr,
        sections: Vec<SwitchSection>,
    },
    Return(Option<Expr>),
    Break,
    Continue,
    Lock {
        target: Expr,
        body: Box<Stmt>,
    },
    Try {
        body: Block,
        catches: Vec<CatchClause>,
        finally: Option<Block>,
    },
    Throw(Option<Expr>),
    Using {
        decl: Option<LocalDecl>,
        expr: Option<Expr>,
        body: Box<Stmt>,
    },
    Yield(Option<Expr>),
    Checked {
        unchecked: bool,
        body: Block,
    },
    Unsafe(Block),
    Fixed {
        decl: LocalDecl,
        body: Box<Stmt>,
    },
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// Integer literal as written, with `value` decoded and `suffix` normalised to lower
    /// case (`""`, `"u"`, `"l"`, `"ul"`).
    Int { text: String, value: u64, suffix: String },
    /// Real literal digits without suffix; `suffix` is `'f'`, `'d'`, `'m'` or `None`.
    Real { digits: String, suffix: Option<char> },
    Bool(bool),
    Char(char),
    Str(String),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
    BitNot,
    PreInc,
    PreDec,
    AddressOf,
    Deref,
    IndexFromEnd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PostfixOp {
    Inc,
    Dec,
    NullForgiving,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Mul,
    Div,
    Rem,
    Add,
    Sub,
    Shl,
    Shr,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    BitAnd,
    BitXor,
    BitOr,
    And,
    Or,
    Coalesce,
}

impl BinaryOp {
    pub fn as_str(self) -> &'static str {
        match self {
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::Lt => "<",
            BinaryOp::Gt => ">",
            BinaryOp::Le => "<=",
            BinaryOp::Ge => ">=",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitXor => "^",
            BinaryOp::BitOr => "|",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::Coalesce => "??",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge | BinaryOp::Eq | BinaryOp::Ne
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssignOp {
    Assign,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Coalesce,
}

impl AssignOp {
    pub fn as_str(self) -> &'static str {
        match self {
            AssignOp::Assign => "=",
            AssignOp::Add => "+=",
            AssignOp::Sub => "-=",
            AssignOp::Mul => "*=",
            AssignOp::Div => "/=",
            AssignOp::Rem => "%=",
            AssignOp::BitAnd => "&=",
            AssignOp::BitOr => "|=",
            AssignOp::BitXor => "^=",
            AssignOp::Shl => "<<=",
            AssignOp::Shr => ">>=",
            AssignOp::Coalesce => "??=",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Argument {
    pub name: Option<String>,
    pub modifier: Option<ParamModifier>,
    pub expr: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Subpattern {
    pub name: Option<String>,
    pub pattern: Pattern,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
    Discard(Span),
    Constant(Expr),
    Relational {
        op: BinaryOp,
        value: Expr,
        span: Span,
    },
    /// `Type { A: 1 }`, `{ }`, `Type(1, 2)` and their designated forms.
    Recursive {
        ty: Option<TypeRef>,
        positional: Option<Vec<Subpattern>>,
        properties: Option<Vec<Subpattern>>,
        designation: Option<String>,
        span: Span,
    },
    Declaration {
        ty: TypeRef,
        name: String,
        span: Span,
    },
    Var {
        name: String,
        span: Span,
    },
    Not(Box<Pattern>),
    And(Box<Pattern>, Box<Pattern>),
    Or(Box<Pattern>, Box<Pattern>),
}

impl Pattern {
    pub fn span(&self) -> Span {
        match self {
            Pattern::Discard(span)
            | Pattern::Relational { span, .. }
            | Pattern::Recursive { span, .. }
            | Pattern::Declaration { span, .. }
            | Pattern::Var { span, .. } => *span,
            Pattern::Constant(expr) => expr.span,
            Pattern::Not(inner) => inner.span(),
            Pattern::And(lhs, rhs) | Pattern::Or(lhs, rhs) => lhs.span().to(rhs.span()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryClause {
    From { name: String, source: Expr },
    Let { name: String, value: Expr },
    Where(Expr),
    Join {
        name: String,
        source: Expr,
        on: Expr,
        equals: Expr,
    },
    OrderBy(Vec<Expr>),
    Select(Expr),
    GroupBy { element: Expr, key: Expr },
    Into(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Literal(Literal),
    Ident(String),
    This,
    /// A predefined type keyword used as an expression root (`float.MaxValue`).
    PredefinedType(String),
    Member {
        target: Box<Expr>,
        name: String,
        conditional: bool,
    },
    Index {
        target: Box<Expr>,
        args: Vec<Argument>,
    },
    Call {
        callee: Box<Expr>,
        type_args: Vec<TypeRef>,
        args: Vec<Argument>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Postfix {
        op: PostfixOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Assign {
        op: AssignOp,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Conditional {
        cond: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },
    Cast {
        ty: TypeRef,
        expr: Box<Expr>,
    },
    As {
        expr: Box<Expr>,
        ty: TypeRef,
    },
    Paren(Box<Expr>),
    /// `new T(args)` or target-typed `new(args)` when `ty` is `None`.
    New {
        ty: Option<TypeRef>,
        args: Vec<Argument>,
        initializer: Option<Vec<Expr>>,
    },
    NewArray {
        element: TypeRef,
        sizes: Vec<Expr>,
        initializer: Option<Vec<Expr>>,
    },
    AnonymousNew(Vec<(Option<String>, Expr)>),
    /// `{ a, b, c }` in a field or local initializer.
    ArrayInit(Vec<Expr>),
    Default(Option<TypeRef>),
    SizeOf(TypeRef),
    TypeOf(TypeRef),
    StackAlloc {
        ty: TypeRef,
        size: Option<Box<Expr>>,
        initializer: Option<Vec<Expr>>,
    },
    Checked {
        unchecked: bool,
        expr: Box<Expr>,
    },
    Await(Box<Expr>),
    Throw(Box<Expr>),
    Ref(Box<Expr>),
    Is {
        expr: Box<Expr>,
        pattern: Box<Pattern>,
    },
    Range {
        start: Option<Box<Expr>>,
        end: Option<Box<Expr>>,
    },
    Tuple(Vec<Argument>),
    Query(Vec<QueryClause>),
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }

    pub fn ident(name: impl Into<String>, span: Span) -> Self {
        Self::new(ExprKind::Ident(name.into()), span)
    }

    pub fn as_ident(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Ident(name) => Some(name),
            _ => None,
        }
    }

    /// Removes any number of enclosing parentheses.
    pub fn unparen(&self) -> &Expr {
        let mut expr = self;
        while let ExprKind::Paren(inner) = &expr.kind {
            expr = inner;
        }
        expr
    }

    /// Dotted path for simple member chains (`ComputeSharp.Hlsl.Abs`), used to resolve
    /// qualified names in call position.
    pub fn dotted_path(&self) -> Option<String> {
        match &self.kind {
            ExprKind::Ident(name) => Some(name.clone()),
            ExprKind::PredefinedType(name) => Some(name.clone()),
            ExprKind::Member {
                target,
                name,
                conditional: false,
            } => Some(format!("{}.{name}", target.dotted_path()?)),
            _ => None,
        }
    }
}
