//! Method body rewriting.
//!
//! Lowers the entry point and every helper it reaches into HLSL statement trees. Control
//! flow is carried over one statement at a time; the only structural changes are the ones
//! [`crate::execute`] applies to the entry point afterwards and the pixel-shader `return`
//! substitution done here.

use std::collections::BTreeSet;

use bitflags::bitflags;
use kiln_syntax::ast::{
    Argument, AssignOp, Block, Expr, ExprKind, ForInit, Literal, LocalDecl, MethodBody,
    MethodDecl, Modifiers, Param, ParamModifier, Pattern, PostfixOp, Stmt, StmtKind,
    SwitchLabel, TypeRef, UnaryOp,
};
use serde::Serialize;
use tracing::debug;

use crate::diagnostics::{DiagnosticId, Diagnostics};
use crate::execute::{self, OUTPUT_TEXTURE};
use crate::model::{static_value_type, FieldRole, ShaderTypeModel};
use crate::program::{Program, ShaderKind, ENTRY_POINT};
use crate::resolve::{
    known_constant, reachable_methods, resource_property, vector_constant, CallResolver,
    CallTarget, DispatchInfo, ResourceMethod, ResourceProperty,
};
use crate::scope::{matrix_element, matrix_index, vector_swizzle, Scope, TypeEnv};
use crate::types::{HlslType, ResolvedType};

bitflags! {
    /// Dispatch identifiers that need an extra semantic parameter on the entry point.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
    pub struct SpecialIds: u8 {
        /// `GroupIds.X`...: `SV_GroupThreadID`.
        const GROUP_THREAD_IDS = 1 << 0;
        /// `GroupIds.Index`: `SV_GroupIndex`.
        const GROUP_INDEX = 1 << 1;
        /// `GridIds`: `SV_GroupID`.
        const GRID_IDS = 1 << 2;
    }
}

/// A statement of the emitted HLSL, with expressions already rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HlslStmt {
    Block(Vec<HlslStmt>),
    /// A complete simple statement, including its `;`.
    Line(String),
    If {
        cond: String,
        then: Box<HlslStmt>,
        otherwise: Option<Box<HlslStmt>>,
    },
    While {
        cond: String,
        body: Box<HlslStmt>,
    },
    DoWhile {
        body: Box<HlslStmt>,
        cond: String,
    },
    For {
        init: String,
        cond: String,
        step: String,
        body: Box<HlslStmt>,
    },
    Switch {
        scrutinee: String,
        sections: Vec<SwitchCase>,
    },
    Return(Option<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchCase {
    /// `case 1:` or `default:`.
    pub labels: Vec<String>,
    pub body: Vec<HlslStmt>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewrittenMethod {
    pub name: String,
    pub return_type: String,
    /// Rendered parameters, semantics included (`uint3 ThreadIds : SV_DispatchThreadID`).
    pub params: Vec<String>,
    /// Attribute lines placed before the signature.
    pub attributes: Vec<String>,
    pub body: Vec<HlslStmt>,
}

impl RewrittenMethod {
    pub fn signature(&self) -> String {
        format!("{} {}({})", self.return_type, self.name, self.params.join(", "))
    }
}

/// A `static` global: a static field of the shader or of a type its code references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticDecl {
    pub name: String,
    pub ty: HlslType,
    pub constant: bool,
    pub init: Option<String>,
}

impl StaticDecl {
    pub fn declaration(&self) -> String {
        let suffix = self.ty.array_suffix();
        match &self.init {
            Some(init) if self.constant => {
                format!("static const {} {}{suffix} = {init};", self.ty, self.name)
            }
            Some(init) => format!("static {} {}{suffix} = {init};", self.ty, self.name),
            None => format!("static {} {}{suffix};", self.ty, self.name),
        }
    }
}

/// Output of the rewriter: every function of the translation unit plus what the emitter
/// must declare for them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewrittenMethodBody {
    /// The entry point, with dispatch parameters, guard and attributes applied.
    pub entry: RewrittenMethod,
    pub special_ids: SpecialIds,
    /// Reachable helper methods and lifted local functions.
    pub helpers: Vec<RewrittenMethod>,
    /// Static fields, dependencies first.
    pub statics: Vec<StaticDecl>,
    /// Compile-time constants derived from the dispatch metadata.
    pub constants: Vec<String>,
    /// User structs named by rewritten code.
    pub structs: BTreeSet<String>,
    /// Resource properties read through `__{field}__get_{Property}()` helpers.
    pub resource_accessors: BTreeSet<(String, ResourceProperty)>,
}

/// Words HLSL reserves that are valid identifiers in shader source.
const RESERVED: &[&str] = &[
    "asm", "asm_fragment", "bool", "buffer", "cbuffer", "centroid", "column_major", "compile",
    "compile_fragment", "discard", "double", "dword", "export", "extern", "float", "globallycoherent",
    "groupshared", "half", "inline", "inout", "int", "line", "lineadj", "linear", "matrix",
    "min10float", "min12int", "min16float", "min16int", "min16uint", "nointerpolation",
    "noperspective", "packoffset", "pass", "pixelfragment", "point", "precise", "register",
    "row_major", "sample", "sampler", "shared", "snorm", "stateblock", "stateblock_state",
    "string", "tbuffer", "technique", "texture", "triangle", "triangleadj", "uniform", "unorm",
    "unsigned", "vector", "vertexfragment", "abs", "all", "any", "ceil", "clamp", "clip", "cos",
    "cross", "ddx", "ddy", "degrees", "distance", "dot", "exp", "exp2", "floor", "fmod", "frac",
    "length", "lerp", "log", "log2", "mad", "max", "min", "mul", "normalize", "pow", "radians",
    "rcp", "reflect", "refract", "round", "rsqrt", "saturate", "sign", "sin", "sqrt", "step",
    "tan", "transpose", "trunc",
];

/// HLSL spelling of a source identifier.
pub fn identifier(name: &str) -> String {
    let shadows_type = name.starts_with(|c: char| c.is_ascii_lowercase())
        && crate::types::builtin_value_type(name).is_some();
    if shadows_type || RESERVED.contains(&name) {
        format!("__reserved__{name}")
    } else {
        name.to_string()
    }
}

/// Rewrites the entry point `entry` of the resolver's program and the helpers it reaches.
pub fn rewrite(
    resolver: &CallResolver<'_, '_>,
    entry: &MethodDecl,
    model: &ShaderTypeModel,
    diagnostics: &mut Diagnostics,
) -> RewrittenMethodBody {
    let program = resolver.program();
    let shader = program.shader.name.as_str();
    let mut rewriter = Rewriter {
        env: TypeEnv::new(resolver, shader),
        program,
        model,
        diagnostics,
        in_entry: true,
        return_type: None,
        special_ids: SpecialIds::empty(),
        uses_group_size: false,
        helpers: Vec::new(),
        structs: BTreeSet::new(),
        accessors: BTreeSet::new(),
        seen_statics: BTreeSet::new(),
        external_statics: Vec::new(),
    };

    let raw_entry = rewriter.method(entry, ENTRY_POINT.to_string());
    rewriter.in_entry = false;

    for key in reachable_methods(resolver) {
        let Some(method) = program.method(&key) else {
            continue;
        };
        rewriter.env.owner = key.owner.clone();
        let name = if key.owner == shader {
            identifier(&key.name)
        } else {
            format!("{}__{}", key.owner, key.name)
        };
        let helper = rewriter.method(method, name);
        rewriter.helpers.push(helper);
    }
    rewriter.env.owner = shader.to_string();

    let shader_statics = rewriter.shader_statics();
    let mut statics = std::mem::take(&mut rewriter.external_statics);
    statics.extend(shader_statics);

    let mut constants = Vec::new();
    if rewriter.uses_group_size {
        let [x, y, z] = model.dispatch.thread_group_size;
        constants.push(format!("static const int3 __GroupSize = int3({x}, {y}, {z});"));
        constants.push(format!(
            "static const int __GroupSize__Count = {};",
            model.dispatch.threads_per_group()
        ));
    }

    let special_ids = rewriter.special_ids;
    let entry = execute::lower_entry(raw_entry, model, special_ids);
    debug!(
        shader,
        helpers = rewriter.helpers.len(),
        statics = statics.len(),
        ?special_ids,
        "rewrote method bodies"
    );
    RewrittenMethodBody {
        entry,
        special_ids,
        helpers: rewriter.helpers,
        statics,
        constants,
        structs: rewriter.structs,
        resource_accessors: rewriter.accessors,
    }
}

struct Rewriter<'r, 'p, 'a, 'd> {
    env: TypeEnv<'r, 'p, 'a>,
    program: &'p Program<'a>,
    model: &'d ShaderTypeModel,
    diagnostics: &'d mut Diagnostics,
    /// Inside the entry point body, outside of any local function.
    in_entry: bool,
    return_type: Option<HlslType>,
    special_ids: SpecialIds,
    uses_group_size: bool,
    helpers: Vec<RewrittenMethod>,
    structs: BTreeSet<String>,
    accessors: BTreeSet<(String, ResourceProperty)>,
    /// `Owner.Field` of referenced static fields of other types.
    seen_statics: BTreeSet<(String, String)>,
    external_statics: Vec<StaticDecl>,
}

impl Rewriter<'_, '_, '_, '_> {
    fn is_shader(&self, owner: &str) -> bool {
        self.program.is_shader(owner)
    }

    fn resolve_value(&self, ty: &TypeRef) -> Option<HlslType> {
        match self.program.resolve(ty) {
            ResolvedType::Value(ty) => Some(ty),
            _ => None,
        }
    }

    /// Spells `ty`, remembering the user structs it names.
    fn spell(&mut self, ty: &HlslType) -> String {
        let mut inner = ty;
        while let HlslType::Array { element, .. } = inner {
            inner = element;
        }
        if let HlslType::Struct(name) = inner {
            self.structs.insert(name.clone());
        }
        ty.to_string()
    }

    fn spell_ref(&mut self, ty: &TypeRef) -> String {
        match self.resolve_value(ty) {
            Some(resolved) => self.spell(&resolved),
            None => ty.to_string(),
        }
    }

    fn method(&mut self, method: &MethodDecl, name: String) -> RewrittenMethod {
        self.env.scope.push();
        let params = method.params.iter().map(|p| self.param(p)).collect();
        for param in &method.params {
            let ty = self.resolve_value(&param.ty);
            self.env.scope.declare(&param.name, ty);
        }

        let return_type = self.resolve_value(&method.return_type);
        let spelled = self.spell_ref(&method.return_type);
        let previous = std::mem::replace(&mut self.return_type, return_type);
        let body = match &method.body {
            Some(MethodBody::Block(block)) => self.block(block),
            Some(MethodBody::Expr(expr)) if method.return_type.is_void() => {
                vec![HlslStmt::Line(format!("{};", self.expr(expr)))]
            }
            Some(MethodBody::Expr(expr)) => vec![self.return_stmt(Some(expr))],
            None => Vec::new(),
        };
        self.return_type = previous;
        self.env.scope.pop();

        RewrittenMethod {
            name,
            return_type: spelled,
            params,
            attributes: Vec::new(),
            body,
        }
    }

    fn param(&mut self, param: &Param) -> String {
        let modifier = match param.modifier {
            Some(ParamModifier::Ref) => "inout ",
            Some(ParamModifier::Out) => "out ",
            Some(ParamModifier::In) => "in ",
            _ => "",
        };
        let ty = self.spell_ref(&param.ty);
        let suffix = self
            .resolve_value(&param.ty)
            .map(|t| t.array_suffix())
            .unwrap_or_default();
        format!("{modifier}{ty} {}{suffix}", identifier(&param.name))
    }

    /// Rewrites a local function in place of its declaration and adds it to the helpers.
    fn lift(&mut self, function: &MethodDecl) {
        let in_entry = std::mem::replace(&mut self.in_entry, false);
        let lifted = self.method(function, identifier(&function.name));
        self.in_entry = in_entry;
        self.helpers.push(lifted);
    }

    fn block(&mut self, block: &Block) -> Vec<HlslStmt> {
        self.env.scope.push();
        for stmt in &block.stmts {
            if let StmtKind::LocalFunction(function) = &stmt.kind {
                let ty = self.resolve_value(&function.return_type);
                self.env.scope.declare_function(&function.name, ty);
            }
        }
        let mut out = Vec::with_capacity(block.stmts.len());
        for stmt in &block.stmts {
            match &stmt.kind {
                StmtKind::LocalFunction(function) => self.lift(function),
                _ => out.push(self.stmt(stmt)),
            }
        }
        self.env.scope.pop();
        out
    }

    fn stmt(&mut self, stmt: &Stmt) -> HlslStmt {
        match &stmt.kind {
            StmtKind::Block(block) => HlslStmt::Block(self.block(block)),
            StmtKind::Local(decl) => HlslStmt::Line(format!("{};", self.local_decl(decl))),
            StmtKind::LocalFunction(function) => {
                self.lift(function);
                HlslStmt::Line(";".to_string())
            }
            StmtKind::Expr(expr) => HlslStmt::Line(format!("{};", self.expr(expr))),
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => HlslStmt::If {
                cond: self.expr(cond),
                then: Box::new(self.stmt(then_branch)),
                otherwise: else_branch.as_ref().map(|s| Box::new(self.stmt(s))),
            },
            StmtKind::While { cond, body } => HlslStmt::While {
                cond: self.expr(cond),
                body: Box::new(self.stmt(body)),
            },
            StmtKind::DoWhile { body, cond } => HlslStmt::DoWhile {
                body: Box::new(self.stmt(body)),
                cond: self.expr(cond),
            },
            StmtKind::For {
                init,
                cond,
                step,
                body,
            } => {
                self.env.scope.push();
                let init = match init {
                    Some(ForInit::Decl(decl)) => self.local_decl(decl),
                    Some(ForInit::Exprs(exprs)) => self.list(exprs),
                    None => String::new(),
                };
                let cond = cond.as_ref().map(|c| self.expr(c)).unwrap_or_default();
                let step = self.list(step);
                let body = Box::new(self.stmt(body));
                self.env.scope.pop();
                HlslStmt::For {
                    init,
                    cond,
                    step,
                    body,
                }
            }
            StmtKind::Switch {
                scrutinee,
                sections,
            } => {
                let scrutinee_text = self.expr(scrutinee);
                let sections = sections
                    .iter()
                    .map(|section| {
                        let labels = section
                            .labels
                            .iter()
                            .map(|label| match label {
                                SwitchLabel::Case {
                                    pattern: Pattern::Constant(value),
                                    ..
                                } => format!("case {}:", self.expr(value)),
                                _ => "default:".to_string(),
                            })
                            .collect();
                        self.env.scope.push();
                        let body = section.stmts.iter().map(|s| self.stmt(s)).collect();
                        self.env.scope.pop();
                        SwitchCase { labels, body }
                    })
                    .collect();
                HlslStmt::Switch {
                    scrutinee: scrutinee_text,
                    sections,
                }
            }
            StmtKind::Return(value) => self.return_stmt(value.as_ref()),
            StmtKind::Checked { body, .. } | StmtKind::Unsafe(body) => {
                HlslStmt::Block(self.block(body))
            }
            StmtKind::Break => HlslStmt::Line("break;".to_string()),
            StmtKind::Continue => HlslStmt::Line("continue;".to_string()),
            // Everything else is rejected before rewriting.
            _ => HlslStmt::Line(";".to_string()),
        }
    }

    fn return_stmt(&mut self, value: Option<&Expr>) -> HlslStmt {
        if self.in_entry && self.program.kind == ShaderKind::Pixel {
            let Some(value) = value else {
                return HlslStmt::Return(None);
            };
            let hint = self.model.pixel_type.clone();
            let value = self.expr_hinted(value, hint.as_ref());
            return HlslStmt::Block(vec![
                HlslStmt::Line(format!("{OUTPUT_TEXTURE}[ThreadIds.xy] = {value};")),
                HlslStmt::Return(None),
            ]);
        }
        let hint = self.return_type.clone();
        HlslStmt::Return(value.map(|v| self.expr_hinted(v, hint.as_ref())))
    }

    /// `T a = 1, b = 2` without the trailing `;`.
    fn local_decl(&mut self, decl: &LocalDecl) -> String {
        let ty = if decl.ty.is_var() {
            let inferred = decl
                .declarators
                .first()
                .and_then(|d| d.init.as_ref())
                .and_then(|init| self.env.infer(init));
            if inferred.is_none() {
                for declarator in &decl.declarators {
                    self.diagnostics.report(
                        DiagnosticId::UninferrableLocalType,
                        Some(declarator.span),
                        &[&declarator.name],
                    );
                }
            }
            inferred
        } else {
            self.resolve_value(&decl.ty)
        };
        let spelled = match &ty {
            Some(ty) => self.spell(ty),
            None => decl.ty.to_string(),
        };

        let mut parts = Vec::with_capacity(decl.declarators.len());
        for declarator in &decl.declarators {
            let name = identifier(&declarator.name);
            let part = match &declarator.init {
                Some(init) => format!("{name} = {}", self.expr_hinted(init, ty.as_ref())),
                None => name,
            };
            self.env.scope.declare(&declarator.name, ty.clone());
            parts.push(part);
        }
        let qualifier = if decl.is_const { "const " } else { "" };
        format!("{qualifier}{spelled} {}", parts.join(", "))
    }

    fn list(&mut self, exprs: &[Expr]) -> String {
        exprs
            .iter()
            .map(|e| self.expr(e))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn args(&mut self, args: &[Argument]) -> String {
        args.iter()
            .map(|a| self.expr(&a.expr))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn expr(&mut self, expr: &Expr) -> String {
        self.expr_hinted(expr, None)
    }

    /// Rewrites `expr`; `hint` is the type the context expects, used by `default` and
    /// target-typed `new()`.
    fn expr_hinted(&mut self, expr: &Expr, hint: Option<&HlslType>) -> String {
        match &expr.kind {
            ExprKind::Literal(literal) => literal_text(literal),
            ExprKind::Ident(name) => self.ident(expr, name),
            ExprKind::This => "this".to_string(),
            ExprKind::PredefinedType(name) => name.clone(),
            ExprKind::Member { target, name, .. } => self.member(target, name),
            ExprKind::Index { target, args } => self.index(target, args),
            ExprKind::Call { callee, args, .. } => self.call(callee, args),
            ExprKind::Unary { op, operand } => {
                let operand = self.expr(operand);
                let op = match op {
                    UnaryOp::Neg => "-",
                    UnaryOp::Plus => "+",
                    UnaryOp::Not => "!",
                    UnaryOp::BitNot => "~",
                    UnaryOp::PreInc => "++",
                    UnaryOp::PreDec => "--",
                    UnaryOp::AddressOf => "&",
                    UnaryOp::Deref => "*",
                    UnaryOp::IndexFromEnd => "^",
                };
                format!("{op}{operand}")
            }
            ExprKind::Postfix { op, operand } => {
                let operand = self.expr(operand);
                match op {
                    PostfixOp::Inc => format!("{operand}++"),
                    PostfixOp::Dec => format!("{operand}--"),
                    PostfixOp::NullForgiving => operand,
                }
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let lhs = self.expr(lhs);
                let rhs = self.expr(rhs);
                format!("{lhs} {} {rhs}", op.as_str())
            }
            ExprKind::Assign { op, target, value } => {
                let hint = self.env.infer(target);
                let target = self.expr(target);
                let value = self.expr_hinted(value, hint.as_ref());
                let op = match op {
                    AssignOp::Coalesce => "=",
                    op => op.as_str(),
                };
                format!("{target} {op} {value}")
            }
            ExprKind::Conditional {
                cond,
                then_expr,
                else_expr,
            } => {
                let cond = self.expr(cond);
                let then_expr = self.expr_hinted(then_expr, hint);
                let else_expr = self.expr_hinted(else_expr, hint);
                format!("{cond} ? {then_expr} : {else_expr}")
            }
            ExprKind::Cast { ty, expr } => {
                let ty = self.spell_ref(ty);
                format!("({ty}){}", self.expr(expr))
            }
            ExprKind::As { expr, .. } | ExprKind::Checked { expr, .. } => self.expr(expr),
            ExprKind::Paren(inner) => format!("({})", self.expr_hinted(inner, hint)),
            ExprKind::New { ty, args, .. } => {
                let ty = ty
                    .as_ref()
                    .and_then(|t| self.resolve_value(t))
                    .or_else(|| hint.cloned());
                match ty {
                    Some(ty) if args.is_empty() => format!("({})0", self.spell(&ty)),
                    Some(ty) => {
                        let ty = self.spell(&ty);
                        format!("{ty}({})", self.args(args))
                    }
                    None => "0".to_string(),
                }
            }
            ExprKind::NewArray {
                initializer: Some(items),
                ..
            }
            | ExprKind::ArrayInit(items) => {
                let element = match hint {
                    Some(HlslType::Array { element, .. }) => Some(element.as_ref().clone()),
                    _ => None,
                };
                let items: Vec<_> = items
                    .iter()
                    .map(|item| self.expr_hinted(item, element.as_ref()))
                    .collect();
                format!("{{{}}}", items.join(", "))
            }
            ExprKind::Default(ty) => {
                let ty = ty
                    .as_ref()
                    .and_then(|t| self.resolve_value(t))
                    .or_else(|| hint.cloned());
                match ty {
                    Some(ty) => format!("({})0", self.spell(&ty)),
                    None => "0".to_string(),
                }
            }
            ExprKind::Is { expr, pattern } => {
                let subject = self.expr(expr);
                self.pattern(&subject, pattern)
            }
            // Rejected before rewriting.
            _ => "0".to_string(),
        }
    }

    fn ident(&mut self, expr: &Expr, name: &str) -> String {
        if self.env.scope.contains(name) {
            return identifier(name);
        }
        if let Some(info) = self.env.dispatch_info(expr) {
            return self.dispatch_value(info);
        }
        let owner = self.env.owner.clone();
        match self.program.field(&owner, name) {
            Some((_, true)) if !self.is_shader(&owner) => self.external_static(&owner, name),
            _ => identifier(name),
        }
    }

    fn pixel(&self) -> bool {
        self.program.kind == ShaderKind::Pixel
    }

    /// `__x, __y, __z`, with the third axis folded for pixel shaders.
    fn dispatch_extent(&self) -> &'static str {
        if self.pixel() {
            "__x, __y, 1"
        } else {
            "__x, __y, __z"
        }
    }

    /// A dispatch identifier used as a whole value.
    fn dispatch_value(&mut self, info: DispatchInfo) -> String {
        match info {
            DispatchInfo::ThreadIds => "(int3)ThreadIds".to_string(),
            DispatchInfo::GroupIds => {
                self.special_ids |= SpecialIds::GROUP_THREAD_IDS;
                "(int3)GroupIds".to_string()
            }
            DispatchInfo::GridIds => {
                self.special_ids |= SpecialIds::GRID_IDS;
                "(int3)GridIds".to_string()
            }
            DispatchInfo::GroupSize => {
                self.uses_group_size = true;
                "__GroupSize".to_string()
            }
            DispatchInfo::DispatchSize => format!("int3({})", self.dispatch_extent()),
        }
    }

    fn dispatch_member(&mut self, info: DispatchInfo, name: &str) -> String {
        let swizzle = |base: &str| match vector_swizzle(name, 3) {
            Some(swizzle) => format!("{base}.{swizzle}"),
            None => format!("{base}.{name}"),
        };
        match info {
            DispatchInfo::ThreadIds if name == "Normalized" => {
                format!("((float3)ThreadIds / float3({}))", self.dispatch_extent())
            }
            DispatchInfo::ThreadIds => swizzle("ThreadIds"),
            DispatchInfo::GroupIds if name == "Index" => {
                self.special_ids |= SpecialIds::GROUP_INDEX;
                "__GroupIds__get_Index".to_string()
            }
            DispatchInfo::GroupIds => {
                self.special_ids |= SpecialIds::GROUP_THREAD_IDS;
                swizzle("GroupIds")
            }
            DispatchInfo::GridIds => {
                self.special_ids |= SpecialIds::GRID_IDS;
                swizzle("GridIds")
            }
            DispatchInfo::GroupSize => {
                self.uses_group_size = true;
                if name == "Count" {
                    "__GroupSize__Count".to_string()
                } else {
                    swizzle("__GroupSize")
                }
            }
            DispatchInfo::DispatchSize if name == "Count" => {
                if self.pixel() {
                    "(__x * __y)".to_string()
                } else {
                    "(__x * __y * __z)".to_string()
                }
            }
            DispatchInfo::DispatchSize => {
                let Some(swizzle) = vector_swizzle(name, 3) else {
                    return format!("DispatchSize.{name}");
                };
                let pixel = self.pixel();
                let components: Vec<&str> = swizzle
                    .chars()
                    .map(|c| match c {
                        'x' | 'r' => "__x",
                        'y' | 'g' => "__y",
                        _ if pixel => "1",
                        _ => "__z",
                    })
                    .collect();
                match components.as_slice() {
                    [single] => (*single).to_string(),
                    many => format!("uint{}({})", many.len(), many.join(", ")),
                }
            }
        }
    }

    /// Name of a static field of another type, declaring it on first use.
    fn external_static(&mut self, owner: &str, name: &str) -> String {
        let global = format!("{owner}__{name}");
        if !self.seen_statics.insert((owner.to_string(), name.to_string())) {
            return global;
        }
        let program = self.program;
        let Some(decl) = program.type_decl(owner) else {
            return global;
        };
        let Some((field, declarator)) = decl.fields().find_map(|f| {
            f.declarators
                .iter()
                .find(|d| d.name == name)
                .map(|d| (f, d))
        }) else {
            return global;
        };
        let Some(ty) = static_value_type(program, &field.ty, declarator.init.as_ref()) else {
            return global;
        };

        // Initializers are rewritten in the declaring type, outside of any method scope.
        let owner_before = std::mem::replace(&mut self.env.owner, owner.to_string());
        let scope_before = std::mem::replace(&mut self.env.scope, Scope::new());
        let init = declarator
            .init
            .as_ref()
            .filter(|init| !is_sized_array(init))
            .map(|init| self.expr_hinted(init, Some(&ty)));
        self.env.owner = owner_before;
        self.env.scope = scope_before;

        self.spell(&ty);
        self.external_statics.push(StaticDecl {
            name: global.clone(),
            ty,
            constant: field
                .modifiers
                .intersects(Modifiers::CONST | Modifiers::READONLY),
            init,
        });
        global
    }

    fn shader_statics(&mut self) -> Vec<StaticDecl> {
        let program = self.program;
        let model = self.model;
        let mut statics = Vec::new();
        for info in &model.fields {
            let FieldRole::Static { constant } = info.role else {
                continue;
            };
            let Some(ty) = info.value().cloned() else {
                continue;
            };
            let init = program
                .shader
                .fields()
                .flat_map(|f| &f.declarators)
                .find(|d| d.name == info.name)
                .and_then(|d| d.init.as_ref())
                .filter(|init| !is_sized_array(init));
            let init = init.map(|init| self.expr_hinted(init, Some(&ty)));
            self.spell(&ty);
            statics.push(StaticDecl {
                name: identifier(&info.name),
                ty,
                constant,
                init,
            });
        }
        statics
    }

    fn member(&mut self, target: &Expr, name: &str) -> String {
        if let Some(info) = self.env.dispatch_info(target) {
            return self.dispatch_member(info, name);
        }
        if matches!(target.kind, ExprKind::This) {
            return identifier(name);
        }
        if let Some(path) = target.dotted_path() {
            let root = path.split('.').next().unwrap_or(&path);
            if !self
                .env
                .resolver
                .is_variable(&self.env.owner, root, &self.env.scope)
            {
                return self.static_member(&path, name);
            }
            if let Some(ResolvedType::Resource(resource)) = self.env.field(&path) {
                if let Some(property) = resource_property(&resource, name) {
                    let field = identifier(&path);
                    let text = format!("__{field}__get_{}()", property.name());
                    self.accessors.insert((field, property));
                    return text;
                }
            }
        }

        let target_ty = self.env.infer(target);
        let text = self.expr(target);
        let member = match &target_ty {
            Some(ty @ (HlslType::Scalar(_) | HlslType::Vector(..))) => {
                ty.width().and_then(|width| vector_swizzle(name, width))
            }
            Some(HlslType::Matrix { rows, cols, .. }) => matrix_element(name, *rows, *cols),
            _ => None,
        };
        format!("{text}.{}", member.unwrap_or_else(|| identifier(name)))
    }

    /// `Type.Member` where `Type` names a type rather than a variable.
    fn static_member(&mut self, path: &str, name: &str) -> String {
        if let Some(value) = known_constant(path, name) {
            return value.to_string();
        }
        if let Some((text, ty)) = vector_constant(path, name) {
            self.spell(&ty);
            return text;
        }
        let program = self.program;
        if let Some(entry) = program.index.find(path) {
            let owner = entry.decl.name.as_str();
            if program.field(owner, name).is_some() {
                return if self.is_shader(owner) {
                    identifier(name)
                } else {
                    self.external_static(owner, name)
                };
            }
        }
        format!("{path}.{name}")
    }

    fn index(&mut self, target: &Expr, args: &[Argument]) -> String {
        if let Some(name) = target.as_ident() {
            if let Some(ResolvedType::Resource(resource)) = self.env.field(name) {
                let field = identifier(name);
                let coords = self.args(args);
                return if resource.dims().is_some() && args.len() > 1 {
                    format!("{field}[int{}({coords})]", args.len())
                } else {
                    format!("{field}[{coords}]")
                };
            }
        }
        if let Some(HlslType::Matrix { .. }) = self.env.infer(target) {
            let indices: Option<Vec<(u8, u8)>> =
                args.iter().map(|a| matrix_index(&a.expr)).collect();
            if let Some(indices) = indices.filter(|i| !i.is_empty()) {
                let swizzle: String = indices
                    .iter()
                    .map(|(row, col)| format!("_m{row}{col}"))
                    .collect();
                return format!("{}.{swizzle}", self.expr(target));
            }
        }
        let text = self.expr(target);
        let args: Vec<_> = args.iter().map(|a| self.expr(&a.expr)).collect();
        format!("{text}[{}]", args.join("]["))
    }

    fn call(&mut self, callee: &Expr, args: &[Argument]) -> String {
        match self.env.resolve_call(callee, args) {
            CallTarget::Intrinsic(intrinsic) => format!("{}({})", intrinsic.hlsl, self.args(args)),
            CallTarget::Source(key) => {
                let method = self.program.method(&key);
                let name = if self.is_shader(&key.owner) {
                    identifier(&key.name)
                } else {
                    format!("{}__{}", key.owner, key.name)
                };
                let args = match method {
                    Some(method) => self.source_args(args, method),
                    None => self.args(args),
                };
                format!("{name}({args})")
            }
            CallTarget::LocalFunction(name) => {
                format!("{}({})", identifier(&name), self.args(args))
            }
            CallTarget::ResourceMember { field, method } => {
                let field = identifier(&field);
                let method = match method {
                    ResourceMethod::Sample => "Sample",
                    ResourceMethod::SampleLevel => "SampleLevel",
                };
                format!("{field}.{method}(__sampler__{field}, {})", self.args(args))
            }
            CallTarget::Unknown(name) | CallTarget::Ambiguous(name) => {
                format!("{name}({})", self.args(args))
            }
        }
    }

    /// Arguments of a call to a source method: named arguments are placed at their
    /// parameter position and omitted optional parameters get their default value.
    fn source_args(&mut self, args: &[Argument], method: &MethodDecl) -> String {
        let mut slots: Vec<Option<String>> = vec![None; method.params.len()];
        let mut extra = Vec::new();
        let mut positional = 0;
        for arg in args {
            let index = match &arg.name {
                Some(name) => method.params.iter().position(|p| &p.name == name),
                None => {
                    positional += 1;
                    Some(positional - 1)
                }
            };
            let hint = index
                .and_then(|i| method.params.get(i))
                .and_then(|p| self.resolve_value(&p.ty));
            let text = self.expr_hinted(&arg.expr, hint.as_ref());
            match index.and_then(|i| slots.get_mut(i)) {
                Some(slot) => *slot = Some(text),
                None => extra.push(text),
            }
        }
        for (slot, param) in slots.iter_mut().zip(&method.params) {
            if slot.is_none() {
                *slot = param.default.as_ref().map(|d| self.expr(d));
            }
        }
        slots
            .into_iter()
            .flatten()
            .chain(extra)
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn pattern(&mut self, subject: &str, pattern: &Pattern) -> String {
        match pattern {
            Pattern::Constant(value) => format!("({subject} == {})", self.expr(value)),
            Pattern::Relational { op, value, .. } => {
                format!("({subject} {} {})", op.as_str(), self.expr(value))
            }
            Pattern::Not(inner) => format!("!{}", self.pattern(subject, inner)),
            Pattern::And(lhs, rhs) => {
                let lhs = self.pattern(subject, lhs);
                let rhs = self.pattern(subject, rhs);
                format!("({lhs} && {rhs})")
            }
            Pattern::Or(lhs, rhs) => {
                let lhs = self.pattern(subject, lhs);
                let rhs = self.pattern(subject, rhs);
                format!("({lhs} || {rhs})")
            }
            Pattern::Discard(_) | Pattern::Var { .. } => "true".to_string(),
            Pattern::Recursive { .. } | Pattern::Declaration { .. } => "false".to_string(),
        }
    }
}

/// `new T[N]` without items: the declaration alone sizes the array.
fn is_sized_array(init: &Expr) -> bool {
    matches!(
        init.kind,
        ExprKind::NewArray {
            initializer: None,
            ..
        }
    )
}

fn literal_text(literal: &Literal) -> String {
    match literal {
        Literal::Int { value, suffix, .. } => {
            if suffix.contains(|c| matches!(c, 'u' | 'U')) || *value > i32::MAX as u64 {
                format!("{value}u")
            } else {
                value.to_string()
            }
        }
        Literal::Real { digits, suffix } => {
            let digits = if digits.contains(|c| matches!(c, '.' | 'e' | 'E')) {
                digits.clone()
            } else {
                format!("{digits}.0")
            };
            match suffix {
                Some('f') => format!("{digits}f"),
                _ => format!("{digits}L"),
            }
        }
        Literal::Bool(value) => value.to_string(),
        Literal::Char(c) => u32::from(*c).to_string(),
        Literal::Str(_) | Literal::Null => "0".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ShaderConfig;
    use crate::emit::method_text;
    use crate::model::build_model;
    use crate::program::TypeIndex;
    use kiln_syntax::parse;

    fn rewrite_source(source: &str, shader: &str) -> (RewrittenMethodBody, Diagnostics) {
        let unit = parse(source).unwrap();
        let index = TypeIndex::build(&unit);
        let decl = index.find(shader).unwrap().decl;
        let mut diagnostics = Diagnostics::new();
        let program = Program::new(&unit, decl, &mut diagnostics).unwrap();
        let resolver = CallResolver::new(&program);
        let model = build_model(&resolver, &ShaderConfig::default(), &mut diagnostics);
        let entry = program.entry.unwrap();
        let body = rewrite(&resolver, entry, &model, &mut diagnostics);
        (body, diagnostics)
    }

    fn helper<'b>(body: &'b RewrittenMethodBody, name: &str) -> &'b RewrittenMethod {
        body.helpers.iter().find(|h| h.name == name).unwrap()
    }

    #[test]
    fn literals() {
        let int = |value, suffix: &str| Literal::Int {
            text: String::new(),
            value,
            suffix: suffix.into(),
        };
        let real = |digits: &str, suffix| Literal::Real {
            digits: digits.into(),
            suffix,
        };
        assert_eq!(literal_text(&int(42, "")), "42");
        assert_eq!(literal_text(&int(7, "u")), "7u");
        assert_eq!(literal_text(&int(3_000_000_000, "")), "3000000000u");
        assert_eq!(literal_text(&real("1.5", Some('f'))), "1.5f");
        assert_eq!(literal_text(&real("2", Some('f'))), "2.0f");
        assert_eq!(literal_text(&real("0.25", None)), "0.25L");
        assert_eq!(literal_text(&real("1e3", Some('d'))), "1e3L");
        assert_eq!(literal_text(&Literal::Char('A')), "65");
    }

    #[test]
    fn reserved_identifiers_are_renamed() {
        assert_eq!(identifier("value"), "value");
        assert_eq!(identifier("line"), "__reserved__line");
        assert_eq!(identifier("float4"), "__reserved__float4");
        assert_eq!(identifier("Float4"), "Float4");
    }

    #[test]
    fn rewrites_expressions_in_helpers() {
        let (body, diagnostics) = rewrite_source(
            "struct S : IComputeShader {
                ReadWriteBuffer<Float4> buffer;
                Float4x4 transform;
                float Shade(Float4 color, int line) {
                    var scaled = color.XY * 2.5f;
                    float m = transform.M12 + transform[M11, M22].X;
                    Float4 zero = default;
                    Float3 up = Float3.UnitY;
                    bool small = line is 1 or 2;
                    return Hlsl.Dot(color, new Float4(scaled, 0, 1)) * MathF.PI + m;
                }
                void Execute() { buffer[ThreadIds.X] = Shade(buffer[0], 3); }
            }",
            "S",
        );
        assert!(!diagnostics.has_errors(), "{diagnostics}");
        insta::assert_snapshot!(method_text(helper(&body, "Shade")), @r###"
        float Shade(float4 color, int __reserved__line)
        {
            float2 scaled = color.xy * 2.5f;
            float m = transform._m01 + transform._m00_m11.x;
            float4 zero = (float4)0;
            float3 up = float3(0, 1, 0);
            bool small = ((__reserved__line == 1) || (__reserved__line == 2));
            return dot(color, float4(scaled, 0, 1)) * 3.14159274f + m;
        }
        "###);
    }

    #[test]
    fn static_members_of_other_types_become_globals() {
        let (body, _) = rewrite_source(
            "struct Palette {
                 public const float Gain = 2f;
                 public static readonly float[] Weights = { 0.25f, 0.5f, Gain };
                 public static float Tint(float v) => v * Weights[1];
             }
             struct S : IComputeShader {
                 ReadWriteBuffer<float> buffer;
                 void Execute() { buffer[ThreadIds.X] = Palette.Tint(Palette.Gain); }
             }",
            "S",
        );
        let statics: Vec<_> = body.statics.iter().map(StaticDecl::declaration).collect();
        assert_eq!(
            statics,
            [
                "static const float Palette__Gain = 2.0f;",
                "static const float Palette__Weights[3] = {0.25f, 0.5f, Palette__Gain};",
            ]
        );
        insta::assert_snapshot!(method_text(helper(&body, "Palette__Tint")), @r###"
        float Palette__Tint(float v)
        {
            return v * Palette__Weights[1];
        }
        "###);
    }

    #[test]
    fn local_functions_are_lifted() {
        let (body, _) = rewrite_source(
            "struct S : IComputeShader {
                 ReadWriteBuffer<float> buffer;
                 void Execute() {
                     float Twice(float v) => v * 2;
                     buffer[ThreadIds.X] = Twice(buffer[ThreadIds.X]);
                 }
             }",
            "S",
        );
        assert_eq!(helper(&body, "Twice").signature(), "float Twice(float v)");
        assert!(body.special_ids.is_empty());
    }

    #[test]
    fn resource_properties_use_accessors() {
        let (body, _) = rewrite_source(
            "struct S : IComputeShader {
                 ReadWriteTexture2D<Float4> image;
                 void Execute() {
                     if (ThreadIds.X < image.Width) { image[ThreadIds.X, ThreadIds.Y] = 1; }
                 }
             }",
            "S",
        );
        assert_eq!(
            body.resource_accessors.iter().cloned().collect::<Vec<_>>(),
            [("image".to_string(), ResourceProperty::Width)]
        );
        let text = method_text(&body.entry);
        assert!(text.contains("if (ThreadIds.x < __image__get_Width())"), "{text}");
        assert!(text.contains("image[int2(ThreadIds.x, ThreadIds.y)] = 1;"), "{text}");
    }

    #[test]
    fn uninferable_var_is_reported() {
        let (_, diagnostics) = rewrite_source(
            "struct S : IComputeShader {
                 ReadWriteBuffer<float> buffer;
                 void Execute() { var x = Mystery.Value; buffer[0] = 1; }
             }",
            "S",
        );
        assert!(diagnostics.contains(DiagnosticId::UninferrableLocalType));
    }

    #[test]
    fn group_size_constants_are_emitted_on_use() {
        let (body, _) = rewrite_source(
            "struct S : IComputeShader {
                 ReadWriteBuffer<int> buffer;
                 void Execute() { buffer[ThreadIds.X] = GroupSize.X + GroupSize.Count + DispatchSize.Count; }
             }",
            "S",
        );
        assert_eq!(
            body.constants,
            [
                "static const int3 __GroupSize = int3(8, 8, 1);",
                "static const int __GroupSize__Count = 64;",
            ]
        );
        let text = method_text(&body.entry);
        assert!(
            text.contains("buffer[ThreadIds.x] = __GroupSize.x + __GroupSize__Count + (__x * __y * __z);"),
            "{text}"
        );
    }
}
