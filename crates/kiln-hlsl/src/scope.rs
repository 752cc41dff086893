//! Lexical scopes and best-effort expression typing.
//!
//! Inference only needs to be good enough to spell out the type of `var` locals, pick the
//! target of `default`, and recognise swizzles and matrix indexers. When a type cannot be
//! determined the result is `None` and the caller decides whether that is an error.

use std::collections::HashMap;

use kiln_syntax::ast::{Argument, BinaryOp, Expr, ExprKind, Literal, TypeRef, UnaryOp};

use crate::resolve::{
    known_constant, resource_property, vector_constant, CallArg, CallResolver, CallTarget,
    DispatchInfo, ResourceMethod,
};
use crate::types::{HlslType, ResolvedType, ScalarType};

#[derive(Debug, Clone, Default)]
struct Frame {
    locals: HashMap<String, Option<HlslType>>,
    functions: HashMap<String, Option<HlslType>>,
}

/// Stack of lexical frames holding locals, parameters and local functions.
#[derive(Debug, Clone)]
pub struct Scope {
    frames: Vec<Frame>,
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl Scope {
    pub fn new() -> Self {
        Self {
            frames: vec![Frame::default()],
        }
    }

    pub fn push(&mut self) {
        self.frames.push(Frame::default());
    }

    pub fn pop(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    pub fn declare(&mut self, name: &str, ty: Option<HlslType>) {
        if let Some(frame) = self.frames.last_mut() {
            frame.locals.insert(name.to_string(), ty);
        }
    }

    pub fn declare_function(&mut self, name: &str, return_type: Option<HlslType>) {
        if let Some(frame) = self.frames.last_mut() {
            frame.functions.insert(name.to_string(), return_type);
        }
    }

    pub fn local(&self, name: &str) -> Option<&Option<HlslType>> {
        self.frames.iter().rev().find_map(|f| f.locals.get(name))
    }

    pub fn function(&self, name: &str) -> Option<&Option<HlslType>> {
        self.frames.iter().rev().find_map(|f| f.functions.get(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.local(name).is_some()
    }
}

/// Lowercase HLSL swizzle for a vector property such as `XY` or `RGBA`.
pub fn vector_swizzle(name: &str, width: u8) -> Option<String> {
    if name.is_empty() || name.len() > 4 {
        return None;
    }
    let lower = name.to_ascii_lowercase();
    let fits = |set: &str| {
        lower
            .chars()
            .all(|c| set.find(c).is_some_and(|i| i < usize::from(width)))
    };
    (fits("xyzw") || fits("rgba")).then_some(lower)
}

/// `_mRC` element name for a 1-based `MRC` matrix property.
pub fn matrix_element(name: &str, rows: u8, cols: u8) -> Option<String> {
    let digits = name.strip_prefix('M')?;
    let mut chars = digits.chars();
    let r = chars.next()?.to_digit(10)?;
    let c = chars.next()?.to_digit(10)?;
    if chars.next().is_some() || r == 0 || c == 0 || r > u32::from(rows) || c > u32::from(cols) {
        return None;
    }
    Some(format!("_m{}{}", r - 1, c - 1))
}

/// Whether `expr` is a constant `MatrixIndex` reference (`M11` or `MatrixIndex.M11`).
pub fn matrix_index(expr: &Expr) -> Option<(u8, u8)> {
    let name = match &expr.unparen().kind {
        ExprKind::Ident(name) => name.as_str(),
        ExprKind::Member { target, name, .. }
            if target.dotted_path().as_deref().map(|p| p.rsplit('.').next() == Some("MatrixIndex"))
                == Some(true) =>
        {
            name.as_str()
        }
        _ => return None,
    };
    let element = matrix_element(name, 4, 4)?;
    let bytes = element.as_bytes();
    Some((bytes[2] - b'0', bytes[3] - b'0'))
}

fn int3() -> HlslType {
    HlslType::Vector(ScalarType::Int, 3)
}

fn combine(a: Option<HlslType>, b: Option<HlslType>) -> Option<HlslType> {
    use HlslType::*;
    match (a, b) {
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
        (Some(Scalar(s)), Some(Scalar(t))) => Some(Scalar(s.wider(t))),
        (Some(Vector(s, n)), Some(Scalar(t))) | (Some(Scalar(t)), Some(Vector(s, n))) => {
            Some(Vector(s.wider(t), n))
        }
        (Some(Vector(s, n)), Some(Vector(t, m))) => Some(Vector(s.wider(t), n.min(m))),
        (Some(m @ Matrix { .. }), Some(other)) | (Some(other), Some(m @ Matrix { .. })) => {
            let scalar = other.scalar().unwrap_or(ScalarType::Float);
            let wider = m.scalar().unwrap_or(ScalarType::Float).wider(scalar);
            Some(m.with_scalar(wider))
        }
        (Some(a), Some(_)) => Some(a),
    }
}

fn constant_type(text: &str) -> HlslType {
    if text.ends_with('f') || text.starts_with("asfloat") {
        HlslType::FLOAT
    } else if text.ends_with('L') {
        HlslType::Scalar(ScalarType::Double)
    } else if text.ends_with('u') {
        HlslType::UINT
    } else {
        HlslType::INT
    }
}

/// Typing environment of one method body.
#[derive(Debug)]
pub struct TypeEnv<'r, 'p, 'a> {
    pub resolver: &'r CallResolver<'p, 'a>,
    /// Type declaring the method being analyzed.
    pub owner: String,
    pub scope: Scope,
}

impl<'r, 'p, 'a> TypeEnv<'r, 'p, 'a> {
    pub fn new(resolver: &'r CallResolver<'p, 'a>, owner: &str) -> Self {
        Self {
            resolver,
            owner: owner.to_string(),
            scope: Scope::new(),
        }
    }

    /// Resolved type of a field of the current owner, unless shadowed by a local.
    pub fn field(&self, name: &str) -> Option<ResolvedType> {
        if self.scope.contains(name) {
            return None;
        }
        let program = self.resolver.program();
        let (ty, _) = program.field(&self.owner, name)?;
        Some(program.resolve(ty))
    }

    pub fn value_type(&self, ty: &TypeRef) -> Option<HlslType> {
        match self.resolver.program().resolve(ty) {
            ResolvedType::Value(ty) => Some(ty),
            _ => None,
        }
    }

    pub fn call_args(&self, args: &[Argument]) -> Vec<CallArg> {
        args.iter()
            .map(|arg| CallArg {
                name: arg.name.clone(),
                ty: self.infer(&arg.expr),
            })
            .collect()
    }

    /// Classifies a call made from the current method, using the inferred argument types to
    /// pick between overloads.
    pub fn resolve_call(&self, callee: &Expr, args: &[Argument]) -> CallTarget {
        self.resolver
            .resolve(&self.owner, callee, &self.call_args(args), &self.scope)
    }

    /// Dispatch-info identifier, unless shadowed by a local or field.
    pub fn dispatch_info(&self, expr: &Expr) -> Option<DispatchInfo> {
        let name = expr.as_ident()?;
        if self.scope.contains(name) || self.field(name).is_some() {
            return None;
        }
        DispatchInfo::from_name(name)
    }

    pub fn infer(&self, expr: &Expr) -> Option<HlslType> {
        match &expr.kind {
            ExprKind::Literal(literal) => literal_type(literal),
            ExprKind::Ident(name) => {
                if let Some(ty) = self.scope.local(name) {
                    return ty.clone();
                }
                match self.field(name) {
                    Some(ResolvedType::Value(ty)) => Some(ty),
                    Some(_) => None,
                    None => DispatchInfo::from_name(name).map(|_| int3()),
                }
            }
            ExprKind::Member { target, name, .. } => self.infer_member(target, name),
            ExprKind::Index { target, args } => self.infer_index(target, args),
            ExprKind::Call { callee, args, .. } => self.infer_call(callee, args),
            ExprKind::Unary { op, operand } => match op {
                UnaryOp::Not => Some(HlslType::BOOL),
                _ => self.infer(operand),
            },
            ExprKind::Postfix { operand, .. }
            | ExprKind::Paren(operand)
            | ExprKind::Checked { expr: operand, .. } => self.infer(operand),
            ExprKind::Binary { op, lhs, rhs } => {
                let lhs_ty = self.infer(lhs);
                match op {
                    BinaryOp::And | BinaryOp::Or => Some(HlslType::BOOL),
                    op if op.is_comparison() => {
                        Some(combine(lhs_ty, self.infer(rhs))?.with_scalar(ScalarType::Bool))
                    }
                    BinaryOp::Shl | BinaryOp::Shr => lhs_ty,
                    _ => combine(lhs_ty, self.infer(rhs)),
                }
            }
            ExprKind::Assign { target, .. } => self.infer(target),
            ExprKind::Conditional {
                then_expr,
                else_expr,
                ..
            } => self.infer(then_expr).or_else(|| self.infer(else_expr)),
            ExprKind::Cast { ty, .. }
            | ExprKind::New { ty: Some(ty), .. }
            | ExprKind::Default(Some(ty)) => match self.resolver.program().resolve(ty) {
                ResolvedType::Value(ty) => Some(ty),
                _ => None,
            },
            ExprKind::Is { .. } => Some(HlslType::BOOL),
            _ => None,
        }
    }

    fn infer_member(&self, target: &Expr, name: &str) -> Option<HlslType> {
        if let Some(info) = self.dispatch_info(target) {
            return match (info, name) {
                (DispatchInfo::ThreadIds, "Normalized") => {
                    Some(HlslType::Vector(ScalarType::Float, 3))
                }
                (_, "Count" | "Index") => Some(HlslType::INT),
                (_, swizzle) => vector_swizzle(swizzle, 3).map(|s| match s.len() {
                    1 => HlslType::INT,
                    n => HlslType::Vector(ScalarType::Int, n as u8),
                }),
            };
        }
        if let Some(path) = target.dotted_path() {
            let root = path.split('.').next().unwrap_or(&path);
            if !self.resolver.is_variable(&self.owner, root, &self.scope) {
                if let Some(value) = known_constant(&path, name) {
                    return Some(constant_type(value));
                }
                if let Some((_, ty)) = vector_constant(&path, name) {
                    return Some(ty);
                }
                let program = self.resolver.program();
                let owner = program.index.find(&path)?.decl.name.clone();
                return match program.resolve(program.field(&owner, name)?.0) {
                    ResolvedType::Value(ty) => Some(ty),
                    _ => None,
                };
            }
            if let Some(ResolvedType::Resource(resource)) = self.field(&path) {
                return resource_property(&resource, name).map(|_| HlslType::INT);
            }
        }
        self.member_type(&self.infer(target)?, name)
    }

    /// Type of `name` accessed on a value of type `ty`.
    pub fn member_type(&self, ty: &HlslType, name: &str) -> Option<HlslType> {
        match ty {
            HlslType::Scalar(s) | HlslType::Vector(s, _) => {
                let swizzle = vector_swizzle(name, ty.width()?)?;
                Some(match swizzle.len() {
                    1 => HlslType::Scalar(*s),
                    n => HlslType::Vector(*s, n as u8),
                })
            }
            HlslType::Matrix { scalar, rows, cols } => {
                matrix_element(name, *rows, *cols).map(|_| HlslType::Scalar(*scalar))
            }
            HlslType::Struct(struct_name) => self
                .resolver
                .program()
                .struct_fields(struct_name)?
                .into_iter()
                .find(|f| f.name == name)
                .map(|f| f.ty),
            _ => None,
        }
    }

    fn infer_index(&self, target: &Expr, args: &[Argument]) -> Option<HlslType> {
        if let Some(name) = target.as_ident() {
            if let Some(ResolvedType::Resource(resource)) = self.field(name) {
                return Some(resource.element);
            }
            if let Some(ResolvedType::Managed(_)) = self.field(name) {
                // Group shared and static arrays.
                let program = self.resolver.program();
                let (ty, _) = program.field(&self.owner, name)?;
                if let kiln_syntax::ast::TypeRefKind::Array { element, .. } = &ty.kind {
                    return match program.resolve(element) {
                        ResolvedType::Value(ty) => Some(ty),
                        _ => None,
                    };
                }
            }
        }
        match self.infer(target)? {
            HlslType::Vector(s, _) => Some(HlslType::Scalar(s)),
            HlslType::Matrix { scalar, cols, .. } => {
                if args.iter().all(|a| matrix_index(&a.expr).is_some()) && !args.is_empty() {
                    Some(match args.len() {
                        1 => HlslType::Scalar(scalar),
                        n => HlslType::Vector(scalar, n.min(4) as u8),
                    })
                } else {
                    Some(HlslType::Vector(scalar, cols))
                }
            }
            HlslType::Array { element, .. } => Some(*element),
            _ => None,
        }
    }

    fn infer_call(&self, callee: &Expr, args: &[Argument]) -> Option<HlslType> {
        let program = self.resolver.program();
        match self.resolve_call(callee, args) {
            CallTarget::Intrinsic(intrinsic) => self.infer_intrinsic(intrinsic.hlsl, args),
            CallTarget::Source(key) => {
                let method = program.method(&key)?;
                match program.resolve(&method.return_type) {
                    ResolvedType::Value(ty) => Some(ty),
                    _ => None,
                }
            }
            CallTarget::LocalFunction(name) => self.scope.function(&name)?.clone(),
            CallTarget::ResourceMember { field, method } => match method {
                ResourceMethod::Sample | ResourceMethod::SampleLevel => match self.field(&field)? {
                    ResolvedType::Resource(resource) => Some(resource.element),
                    _ => None,
                },
            },
            CallTarget::Unknown(_) | CallTarget::Ambiguous(_) => None,
        }
    }

    fn infer_intrinsic(&self, hlsl: &str, args: &[Argument]) -> Option<HlslType> {
        let arg = |i: usize| args.get(i).and_then(|a| self.infer(&a.expr));
        match hlsl {
            "dot" | "length" | "distance" | "determinant" => {
                arg(0)?.scalar().map(HlslType::Scalar)
            }
            "all" | "any" => Some(HlslType::BOOL),
            "isnan" | "isinf" | "isfinite" => Some(arg(0)?.with_scalar(ScalarType::Bool)),
            "asfloat" | "f16tof32" => Some(arg(0)?.with_scalar(ScalarType::Float)),
            "asint" => Some(arg(0)?.with_scalar(ScalarType::Int)),
            "asuint" | "countbits" | "firstbithigh" | "firstbitlow" | "reversebits"
            | "f32tof16" => Some(arg(0)?.with_scalar(ScalarType::UInt)),
            "asdouble" => Some(HlslType::Scalar(ScalarType::Double)),
            "mul" => match (arg(0)?, arg(1)?) {
                (HlslType::Matrix { scalar, rows, .. }, HlslType::Vector(..)) => {
                    Some(HlslType::Vector(scalar, rows))
                }
                (HlslType::Vector(..), HlslType::Matrix { scalar, cols, .. }) => {
                    Some(HlslType::Vector(scalar, cols))
                }
                (
                    HlslType::Matrix { scalar, rows, .. },
                    HlslType::Matrix { cols, .. },
                ) => Some(HlslType::Matrix { scalar, rows, cols }),
                (a, b) => combine(Some(a), Some(b)),
            },
            "transpose" => match arg(0)? {
                HlslType::Matrix { scalar, rows, cols } => Some(HlslType::Matrix {
                    scalar,
                    rows: cols,
                    cols: rows,
                }),
                other => Some(other),
            },
            name if name.starts_with("D2D") => Some(HlslType::Vector(ScalarType::Float, 4)),
            name if name.contains("Barrier") || name.starts_with("Interlocked") => {
                Some(HlslType::Void)
            }
            _ => args
                .iter()
                .map(|a| self.infer(&a.expr))
                .fold(None, combine),
        }
    }
}

fn literal_type(literal: &Literal) -> Option<HlslType> {
    match literal {
        Literal::Int { value, suffix, .. } => match suffix.as_str() {
            "" if *value > i32::MAX as u64 => Some(HlslType::UINT),
            "" => Some(HlslType::INT),
            "u" => Some(HlslType::UINT),
            _ => None,
        },
        Literal::Real { suffix, .. } => match suffix {
            Some('f') => Some(HlslType::FLOAT),
            None | Some('d') => Some(HlslType::Scalar(ScalarType::Double)),
            _ => None,
        },
        Literal::Bool(_) => Some(HlslType::BOOL),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Diagnostics;
    use crate::program::Program;
    use kiln_syntax::{parse, parse_expr};

    const SOURCE: &str = "
        struct Particle { public Float3 position; public float mass; }
        struct S : IComputeShader {
            ReadWriteBuffer<Particle> particles;
            Float4x4 transform;
            float scale;
            static float Twice(float x) => x * 2;
            void Execute() { }
        }
    ";

    fn infer_with(locals: &[(&str, HlslType)], exprs: &[&str]) -> Vec<Option<String>> {
        let unit = parse(SOURCE).unwrap();
        let shader = unit.types.iter().find(|t| t.name == "S").unwrap();
        let program = Program::new(&unit, shader, &mut Diagnostics::new()).unwrap();
        let resolver = CallResolver::new(&program);
        let mut env = TypeEnv::new(&resolver, "S");
        for (name, ty) in locals {
            env.scope.declare(name, Some(ty.clone()));
        }
        exprs
            .iter()
            .map(|e| env.infer(&parse_expr(e).unwrap()).map(|t| t.to_string()))
            .collect()
    }

    #[test]
    fn infers_common_expressions() {
        let float4 = HlslType::Vector(ScalarType::Float, 4);
        let inferred = infer_with(
            &[("v", float4)],
            &[
                "1",
                "1.5f",
                "1.5",
                "3000000000",
                "v.XY",
                "v.x * scale",
                "scale * 2",
                "particles[0].position",
                "transform.M12",
                "transform[M11, M22]",
                "transform[1]",
                "Hlsl.Dot(v, v)",
                "Twice(scale)",
                "ThreadIds.X",
                "ThreadIds.Normalized",
                "DispatchSize.XY",
                "MathF.PI",
                "Float3.UnitX",
                "v.X > 0 ? v : v",
                "particles.Length",
                "unknown",
            ],
        );
        let expected = [
            Some("int"),
            Some("float"),
            Some("double"),
            Some("uint"),
            Some("float2"),
            Some("float"),
            Some("float"),
            Some("float3"),
            Some("float"),
            Some("float2"),
            Some("float4"),
            Some("float"),
            Some("float"),
            Some("int"),
            Some("float3"),
            Some("int2"),
            Some("float"),
            Some("float3"),
            Some("float4"),
            Some("int"),
            None,
        ];
        let expected: Vec<_> = expected.iter().map(|e| e.map(str::to_string)).collect();
        assert_eq!(inferred, expected);
    }

    #[test]
    fn scopes_shadow_and_pop() {
        let mut scope = Scope::new();
        scope.declare("x", Some(HlslType::INT));
        scope.push();
        scope.declare("x", Some(HlslType::FLOAT));
        assert_eq!(scope.local("x"), Some(&Some(HlslType::FLOAT)));
        scope.pop();
        assert_eq!(scope.local("x"), Some(&Some(HlslType::INT)));
        scope.pop();
        assert!(scope.contains("x"));
    }

    #[test]
    fn swizzles_and_matrix_elements() {
        assert_eq!(vector_swizzle("XY", 4).as_deref(), Some("xy"));
        assert_eq!(vector_swizzle("RGBA", 4).as_deref(), Some("rgba"));
        assert_eq!(vector_swizzle("Z", 2), None);
        assert_eq!(vector_swizzle("XG", 4), None);
        assert_eq!(matrix_element("M11", 4, 4).as_deref(), Some("_m00"));
        assert_eq!(matrix_element("M34", 4, 4).as_deref(), Some("_m23"));
        assert_eq!(matrix_element("M44", 3, 3), None);
    }
}
