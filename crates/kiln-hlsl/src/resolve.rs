//! Call classification and the intrinsic tables.
//!
//! Every invocation in a shader body is classified once into a [`CallTarget`]. The result
//! only depends on the receiver, the member name and the inferred argument types, so it is
//! memoized per `(owner, name, arguments)`. Same-arity overloads of a source method are told
//! apart by those argument types.

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap, VecDeque};

use kiln_syntax::ast::{Block, Expr, ExprKind, LocalDecl, MethodDecl, Stmt, StmtKind};
use kiln_syntax::visit::{walk_block, walk_expr, walk_local_decl, walk_method, walk_stmt};
use kiln_syntax::Visit;
use tracing::debug;

use crate::program::{Program, ShaderKind};
use crate::scope::{Scope, TypeEnv};
use crate::types::{builtin_value_type, HlslType, ResolvedType, ResourceType};

/// A source method declaration: declaring type, name and position among the methods of
/// that type. Calls with different argument counts can share one key through optional
/// parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodKey {
    pub owner: String,
    pub name: String,
    pub index: usize,
}

/// One argument of a call site: its name when passed by name, and its type when known.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallArg {
    pub name: Option<String>,
    pub ty: Option<HlslType>,
}

impl CallArg {
    pub fn positional(ty: Option<HlslType>) -> Self {
        Self { name: None, ty }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Intrinsic {
    pub hlsl: &'static str,
    /// D2D intrinsics that read the scene position need the matching capability.
    pub requires_scene_position: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceMethod {
    Sample,
    SampleLevel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallTarget {
    Intrinsic(Intrinsic),
    Source(MethodKey),
    LocalFunction(String),
    ResourceMember {
        field: String,
        method: ResourceMethod,
    },
    /// Neither an intrinsic nor a method with analyzable source.
    Unknown(String),
    /// Several overloads take this many arguments and the argument types do not single one
    /// out.
    Ambiguous(String),
}

/// Identifiers giving access to dispatch coordinates inside the entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchInfo {
    ThreadIds,
    GroupIds,
    GridIds,
    GroupSize,
    DispatchSize,
}

impl DispatchInfo {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "ThreadIds" => DispatchInfo::ThreadIds,
            "GroupIds" => DispatchInfo::GroupIds,
            "GridIds" => DispatchInfo::GridIds,
            "GroupSize" => DispatchInfo::GroupSize,
            "DispatchSize" => DispatchInfo::DispatchSize,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceProperty {
    Length,
    Width,
    Height,
    Depth,
}

impl ResourceProperty {
    pub fn name(self) -> &'static str {
        match self {
            ResourceProperty::Length => "Length",
            ResourceProperty::Width => "Width",
            ResourceProperty::Height => "Height",
            ResourceProperty::Depth => "Depth",
        }
    }
}

pub fn resource_property(resource: &ResourceType, name: &str) -> Option<ResourceProperty> {
    match (resource.dims(), name) {
        (None, "Length") => Some(ResourceProperty::Length),
        (Some(_), "Width") => Some(ResourceProperty::Width),
        (Some(2 | 3), "Height") => Some(ResourceProperty::Height),
        (Some(3), "Depth") => Some(ResourceProperty::Depth),
        _ => None,
    }
}

const HLSL_INTRINSICS: &[(&str, &str)] = &[
    ("Abs", "abs"),
    ("Acos", "acos"),
    ("All", "all"),
    ("AllMemoryBarrier", "AllMemoryBarrier"),
    ("AllMemoryBarrierWithGroupSync", "AllMemoryBarrierWithGroupSync"),
    ("Any", "any"),
    ("AsDouble", "asdouble"),
    ("AsFloat", "asfloat"),
    ("AsInt", "asint"),
    ("AsUInt", "asuint"),
    ("Asin", "asin"),
    ("Atan", "atan"),
    ("Atan2", "atan2"),
    ("Ceil", "ceil"),
    ("Clamp", "clamp"),
    ("Clip", "clip"),
    ("Cos", "cos"),
    ("Cosh", "cosh"),
    ("CountBits", "countbits"),
    ("Cross", "cross"),
    ("Ddx", "ddx"),
    ("Ddy", "ddy"),
    ("Degrees", "degrees"),
    ("Determinant", "determinant"),
    ("DeviceMemoryBarrier", "DeviceMemoryBarrier"),
    ("DeviceMemoryBarrierWithGroupSync", "DeviceMemoryBarrierWithGroupSync"),
    ("Distance", "distance"),
    ("Dot", "dot"),
    ("Exp", "exp"),
    ("Exp2", "exp2"),
    ("F16ToF32", "f16tof32"),
    ("F32ToF16", "f32tof16"),
    ("FaceForward", "faceforward"),
    ("FirstBitHigh", "firstbithigh"),
    ("FirstBitLow", "firstbitlow"),
    ("Floor", "floor"),
    ("Fma", "fma"),
    ("Fmod", "fmod"),
    ("Frac", "frac"),
    ("Frexp", "frexp"),
    ("Fwidth", "fwidth"),
    ("GroupMemoryBarrier", "GroupMemoryBarrier"),
    ("GroupMemoryBarrierWithGroupSync", "GroupMemoryBarrierWithGroupSync"),
    ("InterlockedAdd", "InterlockedAdd"),
    ("InterlockedAnd", "InterlockedAnd"),
    ("InterlockedCompareExchange", "InterlockedCompareExchange"),
    ("InterlockedCompareStore", "InterlockedCompareStore"),
    ("InterlockedExchange", "InterlockedExchange"),
    ("InterlockedMax", "InterlockedMax"),
    ("InterlockedMin", "InterlockedMin"),
    ("InterlockedOr", "InterlockedOr"),
    ("InterlockedXor", "InterlockedXor"),
    ("IsFinite", "isfinite"),
    ("IsInfinite", "isinf"),
    ("IsNaN", "isnan"),
    ("Ldexp", "ldexp"),
    ("Length", "length"),
    ("Lerp", "lerp"),
    ("Log", "log"),
    ("Log10", "log10"),
    ("Log2", "log2"),
    ("Mad", "mad"),
    ("Max", "max"),
    ("Min", "min"),
    ("Modf", "modf"),
    ("Mul", "mul"),
    ("Normalize", "normalize"),
    ("Pow", "pow"),
    ("Radians", "radians"),
    ("Rcp", "rcp"),
    ("Reflect", "reflect"),
    ("Refract", "refract"),
    ("ReverseBits", "reversebits"),
    ("Round", "round"),
    ("Rsqrt", "rsqrt"),
    ("Saturate", "saturate"),
    ("Sign", "sign"),
    ("Sin", "sin"),
    ("SinCos", "sincos"),
    ("Sinh", "sinh"),
    ("SmoothStep", "smoothstep"),
    ("Sqrt", "sqrt"),
    ("Step", "step"),
    ("Tan", "tan"),
    ("Tanh", "tanh"),
    ("Transpose", "transpose"),
    ("Trunc", "trunc"),
];

const MATH_INTRINSICS: &[(&str, &str)] = &[
    ("Abs", "abs"),
    ("Acos", "acos"),
    ("Asin", "asin"),
    ("Atan", "atan"),
    ("Atan2", "atan2"),
    ("Ceiling", "ceil"),
    ("Clamp", "clamp"),
    ("Cos", "cos"),
    ("Cosh", "cosh"),
    ("Exp", "exp"),
    ("Floor", "floor"),
    ("FusedMultiplyAdd", "mad"),
    ("Log", "log"),
    ("Log10", "log10"),
    ("Log2", "log2"),
    ("Max", "max"),
    ("Min", "min"),
    ("Pow", "pow"),
    ("ReciprocalEstimate", "rcp"),
    ("ReciprocalSqrtEstimate", "rsqrt"),
    ("Round", "round"),
    ("Sign", "sign"),
    ("Sin", "sin"),
    ("Sinh", "sinh"),
    ("Sqrt", "sqrt"),
    ("Tan", "tan"),
    ("Tanh", "tanh"),
    ("Truncate", "trunc"),
];

/// `(name, hlsl, requires scene position)`; the HLSL side is a macro from
/// `d2d1effecthelpers.hlsli`.
const D2D_INTRINSICS: &[(&str, &str, bool)] = &[
    ("GetInput", "D2DGetInput", false),
    ("GetInputCoordinate", "D2DGetInputCoordinate", false),
    ("SampleInput", "D2DSampleInput", false),
    ("SampleInputAtOffset", "D2DSampleInputAtOffset", false),
    ("SampleInputAtPosition", "D2DSampleInputAtPosition", true),
    ("GetScenePosition", "D2DGetScenePosition", true),
];

const KNOWN_CONSTANTS: &[(&str, &str)] = &[
    ("MathF.PI", "3.14159274f"),
    ("MathF.E", "2.71828175f"),
    ("MathF.Tau", "6.28318548f"),
    ("Math.PI", "3.1415926535897931L"),
    ("Math.E", "2.7182818284590451L"),
    ("Math.Tau", "6.2831853071795862L"),
    ("float.MaxValue", "3.402823466e+38f"),
    ("float.MinValue", "-3.402823466e+38f"),
    ("float.Epsilon", "1.401298464e-45f"),
    ("float.PositiveInfinity", "asfloat(0x7F800000)"),
    ("float.NegativeInfinity", "asfloat(0xFF800000)"),
    ("float.NaN", "asfloat(0xFFC00000)"),
    ("double.MaxValue", "1.7976931348623157e+308L"),
    ("double.MinValue", "-1.7976931348623157e+308L"),
    ("int.MaxValue", "2147483647"),
    ("int.MinValue", "(-2147483647 - 1)"),
    ("uint.MaxValue", "4294967295u"),
    ("uint.MinValue", "0u"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StaticOwner {
    Hlsl,
    Math,
    D2D,
}

/// Maps `System.MathF`, `ComputeSharp.Hlsl`, `Single`... to the names used by the tables.
fn canonical_owner(path: &str) -> &str {
    let simple = path.rsplit('.').next().unwrap_or(path);
    match simple {
        "Single" => "float",
        "Double" => "double",
        "Int32" => "int",
        "UInt32" => "uint",
        "MathF" | "Math" | "Hlsl" | "D2D" => simple,
        _ => path,
    }
}

fn static_owner(path: &str) -> Option<StaticOwner> {
    match canonical_owner(path) {
        "Hlsl" => Some(StaticOwner::Hlsl),
        "Math" | "MathF" => Some(StaticOwner::Math),
        "D2D" => Some(StaticOwner::D2D),
        _ => None,
    }
}

fn table_lookup(owner: StaticOwner, name: &str, kind: ShaderKind) -> Option<Intrinsic> {
    let plain = |table: &[(&str, &'static str)]| {
        table.iter().find(|(n, _)| *n == name).map(|&(_, hlsl)| Intrinsic {
            hlsl,
            requires_scene_position: false,
        })
    };
    match owner {
        StaticOwner::Hlsl => plain(HLSL_INTRINSICS),
        StaticOwner::Math => plain(MATH_INTRINSICS),
        StaticOwner::D2D if kind.is_d2d() => D2D_INTRINSICS
            .iter()
            .find(|(n, _, _)| *n == name)
            .map(|&(_, hlsl, scene)| Intrinsic {
                hlsl,
                requires_scene_position: scene,
            }),
        StaticOwner::D2D => None,
    }
}

/// Value of a well-known constant such as `MathF.PI` or `float.MaxValue`.
pub fn known_constant(owner: &str, member: &str) -> Option<&'static str> {
    let key = format!("{}.{member}", canonical_owner(owner));
    KNOWN_CONSTANTS
        .iter()
        .find(|(name, _)| *name == key)
        .map(|&(_, value)| value)
}

/// Static vector members (`Float4.Zero`, `Float3.UnitX`...), with the vector type.
pub fn vector_constant(owner: &str, member: &str) -> Option<(String, HlslType)> {
    let ty = builtin_value_type(owner.rsplit('.').next().unwrap_or(owner))?;
    let HlslType::Vector(_, width) = ty else {
        return None;
    };
    let text = match member {
        "Zero" => format!("({ty})0"),
        "One" => format!("({ty})1"),
        _ => {
            let axis = ["UnitX", "UnitY", "UnitZ", "UnitW"]
                .iter()
                .position(|name| *name == member)?;
            if axis >= usize::from(width) {
                return None;
            }
            let components: Vec<&str> = (0..usize::from(width))
                .map(|i| if i == axis { "1" } else { "0" })
                .collect();
            format!("{ty}({})", components.join(", "))
        }
    };
    Some((text, ty))
}

type MemoKey = (String, String, Vec<CallArg>);

/// Classifies invocations, memoizing results per receiver, name and arguments.
#[derive(Debug)]
pub struct CallResolver<'p, 'a> {
    program: &'p Program<'a>,
    memo: RefCell<HashMap<MemoKey, CallTarget>>,
}

impl<'p, 'a> CallResolver<'p, 'a> {
    pub fn new(program: &'p Program<'a>) -> Self {
        Self {
            program,
            memo: RefCell::new(HashMap::new()),
        }
    }

    pub fn program(&self) -> &'p Program<'a> {
        self.program
    }

    /// Number of distinct memoized classifications.
    pub fn memoized(&self) -> usize {
        self.memo.borrow().len()
    }

    /// Classifies the callee of a call made from a method of `owner`.
    pub fn resolve(&self, owner: &str, callee: &Expr, args: &[CallArg], scope: &Scope) -> CallTarget {
        match &callee.kind {
            ExprKind::Ident(name) => {
                if scope.function(name).is_some() {
                    return CallTarget::LocalFunction(name.clone());
                }
                self.memoized_lookup(owner, name, args, |this| this.resolve_unqualified(owner, name, args))
            }
            ExprKind::Member {
                target,
                name,
                conditional: false,
            } => {
                if matches!(target.kind, ExprKind::This) {
                    return self.memoized_lookup(owner, name, args, |this| {
                        this.source_method(owner, name, args)
                            .unwrap_or_else(|| CallTarget::Unknown(format!("this.{name}")))
                    });
                }
                let Some(path) = target.dotted_path() else {
                    return CallTarget::Unknown(name.clone());
                };
                let root = path.split('.').next().unwrap_or(&path);
                if self.is_variable(owner, root, scope) {
                    return self.resolve_on_variable(owner, &path, name, scope);
                }
                self.memoized_lookup(&path, name, args, |this| {
                    this.resolve_qualified(&path, name, args)
                })
            }
            _ => CallTarget::Unknown("<expression>".to_string()),
        }
    }

    fn memoized_lookup(
        &self,
        owner: &str,
        name: &str,
        args: &[CallArg],
        compute: impl FnOnce(&Self) -> CallTarget,
    ) -> CallTarget {
        let key = (owner.to_string(), name.to_string(), args.to_vec());
        if let Some(hit) = self.memo.borrow().get(&key) {
            return hit.clone();
        }
        let target = compute(self);
        self.memo.borrow_mut().insert(key, target.clone());
        target
    }

    fn source_method(&self, owner: &str, name: &str, args: &[CallArg]) -> Option<CallTarget> {
        let candidates = self.program.overloads(owner, name, args.len());
        let key = |index: usize| {
            CallTarget::Source(MethodKey {
                owner: owner.to_string(),
                name: name.to_string(),
                index,
            })
        };
        match candidates.as_slice() {
            [] => None,
            [(index, _)] => Some(key(*index)),
            _ => Some(
                self.select_overload(&candidates, args)
                    .map_or_else(|| CallTarget::Ambiguous(format!("{owner}.{name}")), key),
            ),
        }
    }

    /// Picks the overload whose parameters take the argument types exactly, then the one
    /// whose parameters only differ in their scalar type. Every argument type must be known.
    /// Among several matches, the only one not relying on default arguments is chosen.
    fn select_overload(&self, candidates: &[(usize, &MethodDecl)], args: &[CallArg]) -> Option<usize> {
        let exact = |param: &HlslType, arg: &HlslType| param == arg;
        let same_shape = |param: &HlslType, arg: &HlslType| {
            param.scalar().is_some_and(|scalar| arg.with_scalar(scalar) == *param)
        };
        for accepts in [&exact as &dyn Fn(&HlslType, &HlslType) -> bool, &same_shape] {
            let matching: Vec<usize> = candidates
                .iter()
                .filter(|(_, method)| self.takes(method, args, accepts))
                .map(|(index, _)| *index)
                .collect();
            match matching.as_slice() {
                [] => continue,
                [index] => return Some(*index),
                several => {
                    // Overloads that need no default arguments win.
                    let mut complete = candidates.iter().filter(|(index, method)| {
                        several.contains(index) && method.params.len() == args.len()
                    });
                    return match (complete.next(), complete.next()) {
                        (Some((index, _)), None) => Some(*index),
                        _ => None,
                    };
                }
            }
        }
        None
    }

    fn takes(
        &self,
        method: &MethodDecl,
        args: &[CallArg],
        accepts: &dyn Fn(&HlslType, &HlslType) -> bool,
    ) -> bool {
        args.iter().enumerate().all(|(position, arg)| {
            let param = match &arg.name {
                Some(name) => method.params.iter().find(|p| &p.name == name),
                None => method.params.get(position),
            };
            let param = param.map(|p| self.program.resolve(&p.ty));
            match (param, &arg.ty) {
                (Some(ResolvedType::Value(param)), Some(arg)) => accepts(&param, arg),
                _ => false,
            }
        })
    }

    fn resolve_unqualified(&self, owner: &str, name: &str, args: &[CallArg]) -> CallTarget {
        if let Some(target) = self.source_method(owner, name, args) {
            return target;
        }
        for using in &self.program.static_usings {
            if let Some(intrinsic) =
                static_owner(using).and_then(|o| table_lookup(o, name, self.program.kind))
            {
                return CallTarget::Intrinsic(intrinsic);
            }
            let simple = using.rsplit('.').next().unwrap_or(using);
            if let Some(target) = self.source_method(simple, name, args) {
                return target;
            }
        }
        CallTarget::Unknown(name.to_string())
    }

    fn resolve_qualified(&self, path: &str, name: &str, args: &[CallArg]) -> CallTarget {
        if let Some(owner) = static_owner(path) {
            return table_lookup(owner, name, self.program.kind)
                .map(CallTarget::Intrinsic)
                .unwrap_or_else(|| CallTarget::Unknown(format!("{path}.{name}")));
        }
        if let Some(entry) = self.program.index.find(path) {
            let owner = entry.decl.name.clone();
            if let Some(target) = self.source_method(&owner, name, args) {
                return target;
            }
        }
        CallTarget::Unknown(format!("{path}.{name}"))
    }

    fn resolve_on_variable(&self, owner: &str, path: &str, name: &str, scope: &Scope) -> CallTarget {
        let unknown = || CallTarget::Unknown(format!("{path}.{name}"));
        if path.contains('.') || scope.contains(path) {
            return unknown();
        }
        let Some((ty, _)) = self.program.field(owner, path) else {
            return unknown();
        };
        let ResolvedType::Resource(resource) = self.program.resolve(ty) else {
            return unknown();
        };
        let method = match name {
            "Sample" => ResourceMethod::Sample,
            "SampleLevel" => ResourceMethod::SampleLevel,
            _ => return unknown(),
        };
        if resource.is_d2d_resource_texture() {
            CallTarget::ResourceMember {
                field: path.to_string(),
                method,
            }
        } else {
            unknown()
        }
    }

    /// Whether `name` refers to a local, parameter or field rather than a type.
    pub fn is_variable(&self, owner: &str, name: &str, scope: &Scope) -> bool {
        scope.contains(name) || self.program.field(owner, name).is_some()
    }
}

/// Collects the source methods a body calls, tracking locals and their types so that
/// shadowing, local functions and overloads resolve the same way they do during rewriting.
struct CallCollector<'r, 'p, 'a> {
    env: TypeEnv<'r, 'p, 'a>,
    found: Vec<MethodKey>,
}

impl CallCollector<'_, '_, '_> {
    fn declare_locals(&mut self, decl: &LocalDecl) {
        let declared = (!decl.ty.is_var())
            .then(|| self.env.value_type(&decl.ty))
            .flatten();
        for declarator in &decl.declarators {
            let ty = declared.clone().or_else(|| {
                declarator
                    .init
                    .as_ref()
                    .and_then(|init| self.env.infer(init))
            });
            self.env.scope.declare(&declarator.name, ty);
        }
    }
}

impl Visit for CallCollector<'_, '_, '_> {
    fn visit_block(&mut self, block: &Block) {
        self.env.scope.push();
        for stmt in &block.stmts {
            if let StmtKind::LocalFunction(function) = &stmt.kind {
                let ty = self.env.value_type(&function.return_type);
                self.env.scope.declare_function(&function.name, ty);
            }
        }
        walk_block(self, block);
        self.env.scope.pop();
    }

    fn visit_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::LocalFunction(function) => self.visit_method(function),
            StmtKind::For { .. } | StmtKind::ForEach { .. } => {
                self.env.scope.push();
                if let StmtKind::ForEach { ty, name, .. } = &stmt.kind {
                    let ty = self.env.value_type(ty);
                    self.env.scope.declare(name, ty);
                }
                walk_stmt(self, stmt);
                self.env.scope.pop();
            }
            _ => walk_stmt(self, stmt),
        }
    }

    fn visit_local_decl(&mut self, decl: &LocalDecl) {
        walk_local_decl(self, decl);
        self.declare_locals(decl);
    }

    fn visit_method(&mut self, method: &MethodDecl) {
        self.env.scope.push();
        for param in &method.params {
            let ty = self.env.value_type(&param.ty);
            self.env.scope.declare(&param.name, ty);
        }
        walk_method(self, method);
        self.env.scope.pop();
    }

    fn visit_expr(&mut self, expr: &Expr) {
        if let ExprKind::Call { callee, args, .. } = &expr.kind {
            if let CallTarget::Source(key) = self.env.resolve_call(callee, args) {
                self.found.push(key);
            }
        }
        walk_expr(self, expr);
    }
}

/// Source methods transitively reachable from the entry point, in discovery order. The
/// entry point itself is not included.
pub fn reachable_methods(resolver: &CallResolver<'_, '_>) -> Vec<MethodKey> {
    let program = resolver.program();
    let Some(entry) = program.entry else {
        return Vec::new();
    };
    let shader = program.shader.name.as_str();
    let mut seen = BTreeSet::new();
    let mut order = Vec::new();
    let mut queue = VecDeque::new();
    queue.push_back((shader.to_string(), entry));

    while let Some((owner, method)) = queue.pop_front() {
        let mut collector = CallCollector {
            env: TypeEnv::new(resolver, &owner),
            found: Vec::new(),
        };
        collector.visit_method(method);
        for key in collector.found {
            let is_entry = key.owner == shader
                && program
                    .method(&key)
                    .is_some_and(|m| std::ptr::eq(m, entry));
            if is_entry || !seen.insert(key.clone()) {
                continue;
            }
            if let Some(next) = program.method(&key) {
                queue.push_back((key.owner.clone(), next));
                order.push(key);
            }
        }
    }
    debug!(shader, helpers = order.len(), "computed helper closure");
    order
}
