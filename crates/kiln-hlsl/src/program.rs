//! Shader type discovery and the type table of a compilation unit.

use std::collections::{BTreeMap, BTreeSet};

use kiln_syntax::ast::{CompilationUnit, MethodDecl, Modifiers, TypeDecl, TypeDeclKind, TypeRef};
use serde::Serialize;
use tracing::debug;

use crate::diagnostics::{DiagnosticId, Diagnostics};
use crate::resolve::MethodKey;
use crate::types::{is_raw_bool, resolve_type, HlslType, ResolvedType, TypeNames};

/// Name of the entry point every shader type declares.
pub const ENTRY_POINT: &str = "Execute";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ShaderKind {
    /// `IComputeShader`.
    Compute,
    /// `IComputeShader<TPixel>`: writes `TPixel` into an implicit output texture.
    Pixel,
    /// `ID2D1PixelShader`.
    D2D1Pixel,
}

impl ShaderKind {
    pub fn is_d2d(self) -> bool {
        self == ShaderKind::D2D1Pixel
    }

    pub fn is_dispatched(self) -> bool {
        matches!(self, ShaderKind::Compute | ShaderKind::Pixel)
    }
}

/// A type declared in the unit, with the chain of types enclosing it.
#[derive(Debug, Clone)]
pub struct TypeEntry<'a> {
    pub decl: &'a TypeDecl,
    pub enclosing: Vec<&'a TypeDecl>,
}

impl TypeEntry<'_> {
    pub fn is_value_type(&self) -> bool {
        matches!(
            self.decl.kind,
            TypeDeclKind::Struct | TypeDeclKind::RecordStruct
        )
    }

    /// Whether the type can be referenced from outside its declaring file and type. Nested
    /// types default to private, so they need an explicit `public` or `internal`.
    pub fn is_accessible(&self) -> bool {
        let visible = |decl: &TypeDecl, nested: bool| {
            let m = decl.modifiers;
            if m.intersects(Modifiers::FILE) {
                return false;
            }
            if m.intersects(Modifiers::PUBLIC | Modifiers::INTERNAL) {
                return true;
            }
            !nested && !m.intersects(Modifiers::PRIVATE | Modifiers::PROTECTED)
        };
        let mut nested = false;
        for decl in &self.enclosing {
            if !visible(decl, nested) {
                return false;
            }
            nested = true;
        }
        visible(self.decl, nested)
    }
}

/// Every type of a compilation unit, keyed by simple name.
#[derive(Debug, Clone, Default)]
pub struct TypeIndex<'a> {
    types: BTreeMap<String, TypeEntry<'a>>,
}

impl<'a> TypeIndex<'a> {
    pub fn build(unit: &'a CompilationUnit) -> Self {
        fn visit<'a>(
            decl: &'a TypeDecl,
            enclosing: &mut Vec<&'a TypeDecl>,
            types: &mut BTreeMap<String, TypeEntry<'a>>,
        ) {
            types.entry(decl.name.clone()).or_insert_with(|| TypeEntry {
                decl,
                enclosing: enclosing.clone(),
            });
            enclosing.push(decl);
            for nested in decl.nested_types() {
                visit(nested, enclosing, types);
            }
            enclosing.pop();
        }

        let mut types = BTreeMap::new();
        for decl in &unit.types {
            visit(decl, &mut Vec::new(), &mut types);
        }
        Self { types }
    }

    pub fn get(&self, name: &str) -> Option<&TypeEntry<'a>> {
        self.types.get(name.rsplit('.').next().unwrap_or(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &TypeEntry<'a>> {
        self.types.values()
    }

    /// Finds a type by simple name, `Outer.Inner` or `Namespace.Type`.
    pub fn find(&self, name: &str) -> Option<&TypeEntry<'a>> {
        let entry = self.get(name)?;
        let mut qualified: Vec<&str> = entry.enclosing.iter().map(|d| d.name.as_str()).collect();
        qualified.push(&entry.decl.name);
        let nested = qualified.join(".");
        let with_namespace = entry
            .enclosing
            .first()
            .copied()
            .unwrap_or(entry.decl)
            .namespace
            .as_ref()
            .map(|ns| format!("{ns}.{nested}"));
        let matches = name == entry.decl.name
            || name == nested
            || with_namespace.as_deref() == Some(name);
        matches.then_some(entry)
    }
}

/// Field of a user struct after type resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructField {
    pub name: String,
    pub ty: HlslType,
}

#[derive(Debug, Clone)]
pub struct Program<'a> {
    pub unit: &'a CompilationUnit,
    pub shader: &'a TypeDecl,
    pub kind: ShaderKind,
    /// Output pixel type of `IComputeShader<TPixel>` shaders.
    pub pixel_type: Option<HlslType>,
    pub entry: Option<&'a MethodDecl>,
    pub names: TypeNames,
    pub index: TypeIndex<'a>,
    /// Targets of `using static` directives.
    pub static_usings: Vec<String>,
}

impl<'a> Program<'a> {
    /// Builds the program view of `shader`. Returns `None` when the shader kind cannot be
    /// determined; the reason is reported into `diagnostics`.
    pub fn new(
        unit: &'a CompilationUnit,
        shader: &'a TypeDecl,
        diagnostics: &mut Diagnostics,
    ) -> Option<Self> {
        let index = TypeIndex::build(unit);
        let names = collect_names(unit, &index);

        let (kind, pixel_type) = match shader_kind(shader, &names) {
            Ok(found) => found,
            Err(id) => {
                diagnostics.report(id, Some(shader.span), &[&shader.name]);
                return None;
            }
        };

        let entry = shader
            .methods()
            .find(|m| m.name == ENTRY_POINT && m.params.is_empty() && m.body.is_some());
        if entry.is_none() {
            diagnostics.report(
                DiagnosticId::MissingExecuteMethod,
                Some(shader.span),
                &[&shader.name],
            );
        }

        let static_usings = unit
            .usings
            .iter()
            .filter(|u| u.is_static)
            .map(|u| u.target.to_string())
            .collect();

        debug!(shader = %shader.name, ?kind, types = index.types.len(), "built program");
        Some(Self {
            unit,
            shader,
            kind,
            pixel_type,
            entry,
            names,
            index,
            static_usings,
        })
    }

    pub fn resolve(&self, ty: &TypeRef) -> ResolvedType {
        resolve_type(ty, &self.names)
    }

    pub fn is_shader(&self, type_name: &str) -> bool {
        type_name == self.shader.name
    }

    pub fn type_decl(&self, name: &str) -> Option<&'a TypeDecl> {
        self.index.get(name).map(|entry| entry.decl)
    }

    /// Methods of `owner` named `name` that accept `arity` arguments, honouring optional
    /// parameters. Each comes with its position among the methods of `owner`.
    pub fn overloads(&self, owner: &str, name: &str, arity: usize) -> Vec<(usize, &'a MethodDecl)> {
        let Some(decl) = self.type_decl(owner) else {
            return Vec::new();
        };
        decl.methods()
            .enumerate()
            .filter(|(_, m)| {
                let required = m.params.iter().filter(|p| p.default.is_none()).count();
                m.name == name && (required..=m.params.len()).contains(&arity)
            })
            .collect()
    }

    pub fn method(&self, key: &MethodKey) -> Option<&'a MethodDecl> {
        self.type_decl(&key.owner)?
            .methods()
            .nth(key.index)
            .filter(|m| m.name == key.name)
    }

    /// Declared type of a field of `owner`, with whether it is static.
    pub fn field(&self, owner: &str, name: &str) -> Option<(&'a TypeRef, bool)> {
        self.type_decl(owner)?.fields().find_map(|field| {
            field
                .declarators
                .iter()
                .any(|d| d.name == name)
                .then_some((&field.ty, field.is_static()))
        })
    }

    /// Resolved instance fields of a user struct, in declaration order.
    pub fn struct_fields(&self, name: &str) -> Option<Vec<StructField>> {
        let decl = self.type_decl(name)?;
        let mut fields = Vec::new();
        for field in decl.fields().filter(|f| !f.is_static()) {
            let ResolvedType::Value(ty) = self.resolve(&field.ty) else {
                return None;
            };
            for declarator in &field.declarators {
                fields.push(StructField {
                    name: declarator.name.clone(),
                    ty: ty.clone(),
                });
            }
        }
        Some(fields)
    }
}

/// Classifies a type by the shader interface in its base list.
pub fn shader_kind(
    decl: &TypeDecl,
    names: &TypeNames,
) -> Result<(ShaderKind, Option<HlslType>), DiagnosticId> {
    let mut found = Vec::new();
    for base in &decl.bases {
        match (base.simple_name(), base.generic_args()) {
            (Some("IComputeShader"), []) => found.push((ShaderKind::Compute, None)),
            (Some("IComputeShader"), [pixel]) => {
                let pixel = match resolve_type(pixel, names) {
                    ResolvedType::Value(ty) => Some(ty),
                    _ => None,
                };
                found.push((ShaderKind::Pixel, pixel));
            }
            (Some("ID2D1PixelShader"), []) => found.push((ShaderKind::D2D1Pixel, None)),
            _ => {}
        }
    }
    match found.len() {
        0 => Err(DiagnosticId::MissingShaderInterface),
        1 => Ok(found.remove(0)),
        _ => Err(DiagnosticId::MultipleShaderInterfaces),
    }
}

fn collect_names(unit: &CompilationUnit, index: &TypeIndex<'_>) -> TypeNames {
    let mut names = TypeNames::default();
    for using in &unit.usings {
        if let Some(alias) = &using.alias {
            names.aliases.insert(alias.clone(), using.target.clone());
        }
    }
    for entry in index.iter() {
        if entry.is_value_type() {
            names.structs.insert(entry.decl.name.clone(), true);
        } else {
            names.references.insert(entry.decl.name.clone());
        }
    }

    // A struct that contains itself, directly or through other structs, has no size.
    let mut embeds: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for entry in index.iter().filter(|e| e.is_value_type()) {
        let inner = entry
            .decl
            .fields()
            .filter(|f| !f.is_static())
            .filter_map(|field| match resolve_type(&field.ty, &names) {
                ResolvedType::Value(HlslType::Struct(name)) => Some(name),
                _ => None,
            })
            .collect();
        embeds.insert(entry.decl.name.as_str(), inner);
    }
    for name in embeds.keys() {
        if contains_itself(name, &embeds) {
            names.structs.insert((*name).to_string(), false);
        }
    }

    // Invalidate structs until a fixed point: one bad field poisons every struct that
    // embeds it.
    loop {
        let mut changed = false;
        for entry in index.iter().filter(|e| e.is_value_type()) {
            if names.structs.get(&entry.decl.name) != Some(&true) {
                continue;
            }
            let valid = entry.decl.fields().filter(|f| !f.is_static()).all(|field| {
                !is_raw_bool(&field.ty)
                    && field.declarators.iter().all(|d| d.fixed_size.is_none())
                    && matches!(
                        resolve_type(&field.ty, &names),
                        ResolvedType::Value(HlslType::Scalar(_)
                            | HlslType::Vector(..)
                            | HlslType::Matrix { .. }
                            | HlslType::Struct(_))
                    )
            });
            if !valid {
                names.structs.insert(entry.decl.name.clone(), false);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    names
}

fn contains_itself(root: &str, embeds: &BTreeMap<&str, Vec<String>>) -> bool {
    let mut seen = BTreeSet::new();
    let mut stack: Vec<&str> = embeds.get(root).into_iter().flatten().map(String::as_str).collect();
    while let Some(name) = stack.pop() {
        if name == root {
            return true;
        }
        if seen.insert(name) {
            stack.extend(embeds.get(name).into_iter().flatten().map(String::as_str));
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_syntax::parse;

    fn program_of<'a>(
        unit: &'a CompilationUnit,
        name: &str,
        diagnostics: &mut Diagnostics,
    ) -> Option<Program<'a>> {
        let index = TypeIndex::build(unit);
        let shader = index.find(name)?.decl;
        Program::new(unit, shader, diagnostics)
    }

    #[test]
    fn detects_shader_kinds() {
        let unit = parse(
            "struct A : IComputeShader { void Execute() {} }
             struct B : IComputeShader<float4> { float4 Execute() { return 0; } }
             struct C : ID2D1PixelShader { float4 Execute() { return 0; } }",
        )
        .unwrap();
        let mut diagnostics = Diagnostics::new();
        let kinds: Vec<_> = ["A", "B", "C"]
            .iter()
            .map(|n| program_of(&unit, n, &mut diagnostics).unwrap().kind)
            .collect();
        assert_eq!(
            kinds,
            [ShaderKind::Compute, ShaderKind::Pixel, ShaderKind::D2D1Pixel]
        );
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn reports_interface_problems() {
        let unit = parse(
            "struct None { void Execute() {} }
             struct Both : IComputeShader, ID2D1PixelShader { void Execute() {} }
             struct NoEntry : IComputeShader { void Run() {} }",
        )
        .unwrap();
        for (name, id) in [
            ("None", DiagnosticId::MissingShaderInterface),
            ("Both", DiagnosticId::MultipleShaderInterfaces),
            ("NoEntry", DiagnosticId::MissingExecuteMethod),
        ] {
            let mut diagnostics = Diagnostics::new();
            program_of(&unit, name, &mut diagnostics);
            assert_eq!(diagnostics.ids().into_iter().collect::<Vec<_>>(), [id]);
        }
    }

    #[test]
    fn struct_validity_propagates() {
        let unit = parse(
            "struct Good { public Float4 a; public Bool flag; }
             struct RawBool { public bool flag; }
             struct Outer { public RawBool inner; }
             struct UsesGood { public Good g; }
             class Ref { }",
        )
        .unwrap();
        let index = TypeIndex::build(&unit);
        let names = collect_names(&unit, &index);
        assert_eq!(names.structs["Good"], true);
        assert_eq!(names.structs["RawBool"], false);
        assert_eq!(names.structs["Outer"], false);
        assert_eq!(names.structs["UsesGood"], true);
        assert!(names.references.contains("Ref"));
    }

    #[test]
    fn self_containing_structs_are_invalid() {
        let unit = parse(
            "struct Loop { public Loop a; public Loop b; public float c; }
             struct Ping { public Pong pong; }
             struct Pong { public Ping ping; }
             struct Holder { public Ping ping; }
             struct Fine { public Float2 uv; }",
        )
        .unwrap();
        let index = TypeIndex::build(&unit);
        let names = collect_names(&unit, &index);
        assert_eq!(names.structs["Loop"], false);
        assert_eq!(names.structs["Ping"], false);
        assert_eq!(names.structs["Pong"], false);
        assert_eq!(names.structs["Holder"], false);
        assert_eq!(names.structs["Fine"], true);
    }

    #[test]
    fn accessibility_follows_nesting() {
        let unit = parse(
            "namespace N;
             public struct Top { struct Hidden {} internal struct Shown {} }
             file struct Local {}",
        )
        .unwrap();
        let index = TypeIndex::build(&unit);
        assert!(index.get("Top").unwrap().is_accessible());
        assert!(!index.get("Hidden").unwrap().is_accessible());
        assert!(index.get("Shown").unwrap().is_accessible());
        assert!(!index.get("Local").unwrap().is_accessible());
        assert!(index.find("N.Top").is_some());
        assert!(index.find("Top.Shown").is_some());
        assert!(index.find("Other.Top").is_none());
    }
}
