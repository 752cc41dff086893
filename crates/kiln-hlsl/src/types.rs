//! Mapping from source-level types to HLSL types.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use kiln_syntax::ast::{TypeRef, TypeRefKind};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ScalarType {
    Bool,
    Int,
    UInt,
    Float,
    Double,
}

impl ScalarType {
    pub fn hlsl_name(self) -> &'static str {
        match self {
            ScalarType::Bool => "bool",
            ScalarType::Int => "int",
            ScalarType::UInt => "uint",
            ScalarType::Float => "float",
            ScalarType::Double => "double",
        }
    }

    /// Size in bytes inside a constant buffer (`bool` occupies a full 32-bit slot).
    pub fn size(self) -> u32 {
        match self {
            ScalarType::Double => 8,
            _ => 4,
        }
    }

    /// Numeric promotion rank used when inferring binary expression types.
    fn rank(self) -> u8 {
        match self {
            ScalarType::Bool => 0,
            ScalarType::Int => 1,
            ScalarType::UInt => 2,
            ScalarType::Float => 3,
            ScalarType::Double => 4,
        }
    }

    pub fn wider(self, other: ScalarType) -> ScalarType {
        if other.rank() > self.rank() {
            other
        } else {
            self
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum HlslType {
    Void,
    Scalar(ScalarType),
    Vector(ScalarType, u8),
    Matrix {
        scalar: ScalarType,
        rows: u8,
        cols: u8,
    },
    /// User struct, by HLSL name.
    Struct(String),
    Array {
        element: Box<HlslType>,
        len: Option<u32>,
    },
}

impl HlslType {
    pub const FLOAT: HlslType = HlslType::Scalar(ScalarType::Float);
    pub const INT: HlslType = HlslType::Scalar(ScalarType::Int);
    pub const UINT: HlslType = HlslType::Scalar(ScalarType::UInt);
    pub const BOOL: HlslType = HlslType::Scalar(ScalarType::Bool);

    pub fn scalar(&self) -> Option<ScalarType> {
        match self {
            HlslType::Scalar(s) | HlslType::Vector(s, _) | HlslType::Matrix { scalar: s, .. } => {
                Some(*s)
            }
            _ => None,
        }
    }

    /// Number of vector components, `1` for scalars.
    pub fn width(&self) -> Option<u8> {
        match self {
            HlslType::Scalar(_) => Some(1),
            HlslType::Vector(_, n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_matrix(&self) -> bool {
        matches!(self, HlslType::Matrix { .. })
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, HlslType::Scalar(_) | HlslType::Vector(..) | HlslType::Matrix { .. })
    }

    /// Same shape with a different component type.
    pub fn with_scalar(&self, scalar: ScalarType) -> HlslType {
        match self {
            HlslType::Scalar(_) => HlslType::Scalar(scalar),
            HlslType::Vector(_, n) => HlslType::Vector(scalar, *n),
            HlslType::Matrix { rows, cols, .. } => HlslType::Matrix {
                scalar,
                rows: *rows,
                cols: *cols,
            },
            other => other.clone(),
        }
    }

    /// Declarator suffix for arrays (`[16]`), empty otherwise.
    pub fn array_suffix(&self) -> String {
        match self {
            HlslType::Array { element, len } => {
                let inner = element.array_suffix();
                match len {
                    Some(len) => format!("[{len}]{inner}"),
                    None => format!("[]{inner}"),
                }
            }
            _ => String::new(),
        }
    }
}

impl fmt::Display for HlslType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HlslType::Void => f.write_str("void"),
            HlslType::Scalar(s) => f.write_str(s.hlsl_name()),
            HlslType::Vector(s, n) => write!(f, "{}{n}", s.hlsl_name()),
            HlslType::Matrix { scalar, rows, cols } => {
                write!(f, "{}{rows}x{cols}", scalar.hlsl_name())
            }
            HlslType::Struct(name) => f.write_str(name),
            HlslType::Array { element, .. } => {
                let mut element: &HlslType = element;
                while let HlslType::Array { element: inner, .. } = element {
                    element = inner;
                }
                write!(f, "{element}")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ResourceKind {
    ReadWriteBuffer,
    ReadOnlyBuffer,
    ConstantBuffer,
    ReadWriteTexture { dims: u8, normalized: bool },
    ReadOnlyTexture { dims: u8, normalized: bool },
    D2DResourceTexture { dims: u8 },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ResourceType {
    pub kind: ResourceKind,
    pub element: HlslType,
}

impl ResourceType {
    pub fn is_buffer(&self) -> bool {
        matches!(
            self.kind,
            ResourceKind::ReadWriteBuffer | ResourceKind::ReadOnlyBuffer | ResourceKind::ConstantBuffer
        )
    }

    pub fn is_texture(&self) -> bool {
        !self.is_buffer()
    }

    pub fn is_read_write(&self) -> bool {
        matches!(
            self.kind,
            ResourceKind::ReadWriteBuffer | ResourceKind::ReadWriteTexture { .. }
        )
    }

    pub fn is_d2d_resource_texture(&self) -> bool {
        matches!(self.kind, ResourceKind::D2DResourceTexture { .. })
    }

    /// Texture dimensionality, `None` for buffers.
    pub fn dims(&self) -> Option<u8> {
        match self.kind {
            ResourceKind::ReadWriteTexture { dims, .. }
            | ResourceKind::ReadOnlyTexture { dims, .. }
            | ResourceKind::D2DResourceTexture { dims } => Some(dims),
            _ => None,
        }
    }

    /// Element types HLSL accepts for this resource.
    pub fn element_is_valid(&self) -> bool {
        match self.kind {
            ResourceKind::ReadWriteBuffer
            | ResourceKind::ReadOnlyBuffer
            | ResourceKind::ConstantBuffer => !matches!(self.element, HlslType::Void | HlslType::Array { .. }),
            ResourceKind::ReadWriteTexture { normalized: true, .. }
            | ResourceKind::ReadOnlyTexture { normalized: true, .. } => {
                matches!(
                    self.element,
                    HlslType::Scalar(ScalarType::Float) | HlslType::Vector(ScalarType::Float, _)
                )
            }
            ResourceKind::ReadWriteTexture { .. } | ResourceKind::ReadOnlyTexture { .. } => {
                matches!(
                    self.element,
                    HlslType::Scalar(ScalarType::Int | ScalarType::UInt | ScalarType::Float)
                        | HlslType::Vector(ScalarType::Int | ScalarType::UInt | ScalarType::Float, _)
                )
            }
            ResourceKind::D2DResourceTexture { .. } => matches!(
                self.element,
                HlslType::Scalar(ScalarType::Float) | HlslType::Vector(ScalarType::Float, 4)
            ),
        }
    }

    /// HLSL object type used in the resource declaration. Constant buffers are declared as
    /// `cbuffer` blocks and have no object type.
    pub fn hlsl_object_type(&self) -> Option<String> {
        let element = &self.element;
        Some(match self.kind {
            ResourceKind::ReadWriteBuffer => format!("RWStructuredBuffer<{element}>"),
            ResourceKind::ReadOnlyBuffer => format!("StructuredBuffer<{element}>"),
            ResourceKind::ConstantBuffer => return None,
            ResourceKind::ReadWriteTexture { dims, normalized: false } => {
                format!("RWTexture{dims}D<{element}>")
            }
            ResourceKind::ReadWriteTexture { dims, normalized: true } => {
                format!("RWTexture{dims}D<unorm {element}>")
            }
            ResourceKind::ReadOnlyTexture { dims, normalized: false }
            | ResourceKind::D2DResourceTexture { dims } => format!("Texture{dims}D<{element}>"),
            ResourceKind::ReadOnlyTexture { dims, normalized: true } => {
                format!("Texture{dims}D<unorm {element}>")
            }
        })
    }
}

/// Syntactic shapes HLSL cannot express, reported by the legality analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ForbiddenShape {
    Pointer,
    FunctionPointer,
    Tuple,
    Ref,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedType {
    Value(HlslType),
    Resource(ResourceType),
    /// A reference type (class, string, array, delegate...).
    Managed(String),
    /// An unmanaged type without an HLSL counterpart (`byte`, `long`, unknown names...).
    Unsupported(String),
    Forbidden(ForbiddenShape),
}

/// User-declared and aliased type names visible to the shader.
#[derive(Debug, Clone, Default)]
pub struct TypeNames {
    pub aliases: HashMap<String, TypeRef>,
    /// Value structs by simple name, with whether they map to a valid HLSL struct.
    pub structs: BTreeMap<String, bool>,
    /// Classes, interfaces and records.
    pub references: BTreeSet<String>,
}

const MANAGED_NAMES: &[&str] = &[
    "string", "String", "object", "Object", "dynamic", "Exception", "Array", "Delegate",
    "Type", "List", "Dictionary", "HashSet", "Queue", "Stack", "Func", "Action", "Task",
    "StringBuilder", "Random",
];

const MAX_ALIAS_DEPTH: u32 = 16;

pub fn resolve_type(ty: &TypeRef, names: &TypeNames) -> ResolvedType {
    resolve_with_depth(ty, names, 0)
}

fn resolve_with_depth(ty: &TypeRef, names: &TypeNames, depth: u32) -> ResolvedType {
    match &ty.kind {
        TypeRefKind::Pointer(_) => ResolvedType::Forbidden(ForbiddenShape::Pointer),
        TypeRefKind::FunctionPointer { .. } => ResolvedType::Forbidden(ForbiddenShape::FunctionPointer),
        TypeRefKind::Tuple(_) => ResolvedType::Forbidden(ForbiddenShape::Tuple),
        TypeRefKind::Ref { .. } => ResolvedType::Forbidden(ForbiddenShape::Ref),
        TypeRefKind::Array { .. } => ResolvedType::Managed(ty.to_string()),
        TypeRefKind::Nullable(_) => ResolvedType::Unsupported(ty.to_string()),
        TypeRefKind::Named { name, args } => {
            let simple = name.rsplit('.').next().unwrap_or(name);
            if args.is_empty() {
                if let Some(target) = names.aliases.get(name.as_str()) {
                    if depth >= MAX_ALIAS_DEPTH {
                        return ResolvedType::Unsupported(ty.to_string());
                    }
                    return resolve_with_depth(target, names, depth + 1);
                }
                if let Some(value) = builtin_value_type(simple) {
                    return ResolvedType::Value(value);
                }
                if let Some(&valid) = names.structs.get(simple) {
                    return if valid {
                        ResolvedType::Value(HlslType::Struct(simple.to_string()))
                    } else {
                        ResolvedType::Unsupported(ty.to_string())
                    };
                }
            } else if let Some(resource) = resource_type(simple, args, names, depth) {
                return resource;
            }
            if names.references.contains(simple) || MANAGED_NAMES.contains(&simple) {
                ResolvedType::Managed(ty.to_string())
            } else {
                ResolvedType::Unsupported(ty.to_string())
            }
        }
    }
}

fn resource_type(
    simple: &str,
    args: &[TypeRef],
    names: &TypeNames,
    depth: u32,
) -> Option<ResolvedType> {
    let (base, dims) = split_dims(simple);
    let kind = match (base, args.len()) {
        ("ReadWriteBuffer", 1) => ResourceKind::ReadWriteBuffer,
        ("ReadOnlyBuffer", 1) => ResourceKind::ReadOnlyBuffer,
        ("ConstantBuffer", 1) => ResourceKind::ConstantBuffer,
        ("ReadWriteTexture", 1) => ResourceKind::ReadWriteTexture { dims: dims?, normalized: false },
        ("ReadWriteTexture", 2) | ("IReadWriteNormalizedTexture", 1) => {
            ResourceKind::ReadWriteTexture { dims: dims?, normalized: true }
        }
        ("ReadOnlyTexture", 1) => ResourceKind::ReadOnlyTexture { dims: dims?, normalized: false },
        ("ReadOnlyTexture", 2) | ("IReadOnlyNormalizedTexture", 1) => {
            ResourceKind::ReadOnlyTexture { dims: dims?, normalized: true }
        }
        ("D2D1ResourceTexture", 1) => ResourceKind::D2DResourceTexture { dims: dims? },
        _ => return None,
    };
    let element = match resolve_with_depth(&args[0], names, depth + 1) {
        ResolvedType::Value(element) => element,
        _ => return Some(ResolvedType::Unsupported(format!("{simple}<{}>", args[0]))),
    };
    Some(ResolvedType::Resource(ResourceType { kind, element }))
}

/// Splits `ReadWriteTexture2D` into `("ReadWriteTexture", Some(2))`.
fn split_dims(name: &str) -> (&str, Option<u8>) {
    for (suffix, dims) in [("1D", 1), ("2D", 2), ("3D", 3)] {
        if let Some(base) = name.strip_suffix(suffix) {
            return (base, Some(dims));
        }
    }
    (name, None)
}

/// Scalars, vectors and matrices known by any of their spellings.
pub fn builtin_value_type(name: &str) -> Option<HlslType> {
    let scalar = match name {
        "void" => return Some(HlslType::Void),
        "bool" | "Boolean" | "Bool" => Some(ScalarType::Bool),
        "int" | "Int32" => Some(ScalarType::Int),
        "uint" | "UInt32" => Some(ScalarType::UInt),
        "float" | "Single" => Some(ScalarType::Float),
        "double" | "Double" => Some(ScalarType::Double),
        "Vector2" => return Some(HlslType::Vector(ScalarType::Float, 2)),
        "Vector3" => return Some(HlslType::Vector(ScalarType::Float, 3)),
        "Vector4" => return Some(HlslType::Vector(ScalarType::Float, 4)),
        "Matrix4x4" => {
            return Some(HlslType::Matrix {
                scalar: ScalarType::Float,
                rows: 4,
                cols: 4,
            })
        }
        "Matrix3x2" => {
            return Some(HlslType::Matrix {
                scalar: ScalarType::Float,
                rows: 3,
                cols: 2,
            })
        }
        _ => None,
    };
    if let Some(scalar) = scalar {
        return Some(HlslType::Scalar(scalar));
    }

    const PREFIXES: &[(&str, ScalarType)] = &[
        ("Bool", ScalarType::Bool),
        ("UInt", ScalarType::UInt),
        ("Int", ScalarType::Int),
        ("Float", ScalarType::Float),
        ("Double", ScalarType::Double),
        ("bool", ScalarType::Bool),
        ("uint", ScalarType::UInt),
        ("int", ScalarType::Int),
        ("float", ScalarType::Float),
        ("double", ScalarType::Double),
    ];
    PREFIXES.iter().find_map(|&(prefix, scalar)| {
        let dims = name.strip_prefix(prefix)?;
        parse_dims(dims).map(|(rows, cols)| match cols {
            None => HlslType::Vector(scalar, rows),
            Some(cols) => HlslType::Matrix { scalar, rows, cols },
        })
    })
}

fn parse_dims(text: &str) -> Option<(u8, Option<u8>)> {
    let digit = |c: char| c.to_digit(10).filter(|d| (1..=4).contains(d)).map(|d| d as u8);
    let mut chars = text.chars();
    let rows = digit(chars.next()?)?;
    match (chars.next(), chars.next(), chars.next()) {
        (None, _, _) => Some((rows, None)),
        (Some('x'), Some(cols), None) => Some((rows, Some(digit(cols)?))),
        _ => None,
    }
}

/// Whether a syntactic type is the raw `bool` keyword (not the blittable `Bool`).
pub fn is_raw_bool(ty: &TypeRef) -> bool {
    matches!(ty.simple_name(), Some("bool" | "Boolean")) && ty.generic_args().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_syntax::Span;

    fn named(name: &str, args: Vec<TypeRef>) -> TypeRef {
        TypeRef {
            kind: TypeRefKind::Named {
                name: name.to_string(),
                args,
            },
            span: Span::default(),
        }
    }

    fn resolve(name: &str) -> ResolvedType {
        resolve_type(&named(name, Vec::new()), &TypeNames::default())
    }

    #[test]
    fn recognises_every_vector_spelling() {
        let float4 = ResolvedType::Value(HlslType::Vector(ScalarType::Float, 4));
        assert_eq!(resolve("Float4"), float4);
        assert_eq!(resolve("float4"), float4);
        assert_eq!(resolve("ComputeSharp.Float4"), float4);
        assert_eq!(resolve("System.Numerics.Vector4"), float4);
        assert_eq!(
            resolve("UInt2"),
            ResolvedType::Value(HlslType::Vector(ScalarType::UInt, 2))
        );
        assert_eq!(
            resolve("Int3x3"),
            ResolvedType::Value(HlslType::Matrix {
                scalar: ScalarType::Int,
                rows: 3,
                cols: 3
            })
        );
        assert_eq!(resolve("Float5"), ResolvedType::Unsupported("Float5".into()));
        assert_eq!(resolve("Int2x"), ResolvedType::Unsupported("Int2x".into()));
    }

    #[test]
    fn classifies_resources() {
        let names = TypeNames::default();
        let buffer = named("ReadWriteBuffer", vec![named("float", Vec::new())]);
        let ResolvedType::Resource(resource) = resolve_type(&buffer, &names) else {
            panic!("expected a resource");
        };
        assert_eq!(resource.kind, ResourceKind::ReadWriteBuffer);
        assert_eq!(resource.hlsl_object_type().unwrap(), "RWStructuredBuffer<float>");

        let normalized = named(
            "ReadWriteTexture2D",
            vec![named("Float4", Vec::new()), named("Rgba32", Vec::new())],
        );
        let ResolvedType::Resource(resource) = resolve_type(&normalized, &names) else {
            panic!("expected a resource");
        };
        assert_eq!(
            resource.hlsl_object_type().unwrap(),
            "RWTexture2D<unorm float4>"
        );

        let bad = named("ReadOnlyBuffer", vec![named("string", Vec::new())]);
        assert!(matches!(resolve_type(&bad, &names), ResolvedType::Unsupported(_)));
    }

    #[test]
    fn managed_and_unsupported_names() {
        assert!(matches!(resolve("string"), ResolvedType::Managed(_)));
        assert!(matches!(resolve("object"), ResolvedType::Managed(_)));
        assert!(matches!(resolve("byte"), ResolvedType::Unsupported(_)));
        assert!(matches!(resolve("long"), ResolvedType::Unsupported(_)));
    }

    #[test]
    fn aliases_and_user_structs() {
        let mut names = TypeNames::default();
        names
            .aliases
            .insert("vec4".into(), named("ComputeSharp.Float4", Vec::new()));
        names.structs.insert("Particle".into(), true);
        names.structs.insert("Broken".into(), false);
        names.references.insert("Helper".into());

        assert_eq!(
            resolve_type(&named("vec4", Vec::new()), &names),
            ResolvedType::Value(HlslType::Vector(ScalarType::Float, 4))
        );
        assert_eq!(
            resolve_type(&named("Particle", Vec::new()), &names),
            ResolvedType::Value(HlslType::Struct("Particle".into()))
        );
        assert!(matches!(
            resolve_type(&named("Broken", Vec::new()), &names),
            ResolvedType::Unsupported(_)
        ));
        assert!(matches!(
            resolve_type(&named("Helper", Vec::new()), &names),
            ResolvedType::Managed(_)
        ));
    }

    #[test]
    fn arrays_keep_their_declarator_suffix() {
        let ty = HlslType::Array {
            element: Box::new(HlslType::Vector(ScalarType::Float, 4)),
            len: Some(64),
        };
        assert_eq!(ty.to_string(), "float4");
        assert_eq!(ty.array_suffix(), "[64]");
    }
}
