//! Shader type model: field classification, constant-buffer layout, dispatch metadata and
//! the configuration checks that replace attribute validation.

use std::collections::BTreeSet;

use kiln_syntax::ast::{
    Block, Expr, ExprKind, FieldDecl, Literal, Member, Modifiers, TypeRef, TypeRefKind,
};
use kiln_syntax::visit::{walk_block, walk_expr};
use kiln_syntax::{Span, Visit};
use serde::Serialize;
use tracing::debug;

use crate::config::{
    CompileOptions, DispatchAxis, EffectMetadata, InputDescription, OutputBuffer, ShaderConfig,
    ShaderProfile,
};
use crate::diagnostics::{DiagnosticId, Diagnostics};
use crate::layout::ConstantBufferLayout;
use crate::limits::{
    MAX_COMPUTE_CAPTURED_BYTES, MAX_D2D_CONSTANT_BUFFER_BYTES, MAX_D2D_INPUT_COUNT,
    MAX_RESOURCE_TEXTURE_INDEX, MAX_THREADS_PER_GROUP, MAX_THREAD_GROUP_SIZE_XY,
    MAX_THREAD_GROUP_SIZE_Z,
};
use crate::program::{Program, ShaderKind};
use crate::resolve::{reachable_methods, CallArg, CallResolver, CallTarget};
use crate::scope::Scope;
use crate::types::{is_raw_bool, HlslType, ResolvedType, ResourceType};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum FieldType {
    Value(HlslType),
    Resource(ResourceType),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FieldRole {
    /// Captured into the constant buffer.
    PlainData,
    BufferResource,
    TextureResource,
    /// `groupshared` array with its element count.
    GroupShared { length: u32 },
    /// D2D resource texture bound at the given index.
    ResourceTextureIndex(u32),
    /// `static` field emitted as a global; `constant` for `const` and `readonly`.
    Static { constant: bool },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldInfo {
    pub name: String,
    pub ty: FieldType,
    pub role: FieldRole,
    pub span: Span,
}

impl FieldInfo {
    pub fn resource(&self) -> Option<&ResourceType> {
        match &self.ty {
            FieldType::Resource(resource) => Some(resource),
            FieldType::Value(_) => None,
        }
    }

    pub fn value(&self) -> Option<&HlslType> {
        match &self.ty {
            FieldType::Value(ty) => Some(ty),
            FieldType::Resource(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DispatchMetadata {
    pub thread_group_size: [u32; 3],
    pub axes: DispatchAxis,
}

impl DispatchMetadata {
    pub fn threads_per_group(&self) -> u32 {
        self.thread_group_size.iter().product()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InputMetadata {
    pub count: u32,
    pub simple: Vec<u32>,
    pub complex: Vec<u32>,
    pub descriptions: Vec<InputDescription>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceTextureDescription {
    pub field: String,
    pub index: u32,
    pub dims: u8,
    pub element: HlslType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShaderTypeModel {
    pub type_name: String,
    pub kind: ShaderKind,
    /// Element type of the implicit output texture of pixel-style compute shaders.
    pub pixel_type: Option<HlslType>,
    /// Every field, in declaration order.
    pub fields: Vec<FieldInfo>,
    pub layout: ConstantBufferLayout,
    pub dispatch: DispatchMetadata,
    pub inputs: InputMetadata,
    pub resource_textures: Vec<ResourceTextureDescription>,
    pub requires_scene_position: bool,
    pub output_buffer: OutputBuffer,
    pub profile: ShaderProfile,
    pub compile_options: CompileOptions,
    pub effect: EffectMetadata,
}

impl ShaderTypeModel {
    pub fn field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn plain_data(&self) -> impl Iterator<Item = &FieldInfo> {
        self.fields.iter().filter(|f| f.role == FieldRole::PlainData)
    }

    pub fn resources(&self) -> impl Iterator<Item = &FieldInfo> {
        self.fields.iter().filter(|f| f.resource().is_some())
    }

    /// Bytes of captured constant data the target allows for this kind of shader.
    pub fn constant_data_limit(&self) -> u32 {
        match self.kind {
            ShaderKind::Compute | ShaderKind::Pixel => MAX_COMPUTE_CAPTURED_BYTES,
            ShaderKind::D2D1Pixel => MAX_D2D_CONSTANT_BUFFER_BYTES,
        }
    }
}

/// Builds the model of the program's shader, reporting every violation into
/// `diagnostics`. A model is always returned; callers gate on errors.
pub fn build_model(
    resolver: &CallResolver<'_, '_>,
    config: &ShaderConfig,
    diagnostics: &mut Diagnostics,
) -> ShaderTypeModel {
    let program = resolver.program();
    let mut builder = ModelBuilder {
        program,
        config,
        type_name: &program.shader.name,
        diagnostics,
    };

    let dispatch = builder.dispatch();
    let fields = builder.fields(&dispatch);
    builder.check_properties();
    let resource_textures = builder.resource_textures(&fields);
    let inputs = builder.inputs();
    builder.check_resource_texture_indices(&resource_textures, inputs.count);
    builder.check_scene_position(resolver);
    let compile_options = builder.compile_options();
    builder.check_accessibility(&fields);
    builder.check_effect();

    let layout = ConstantBufferLayout::build(
        fields
            .iter()
            .filter(|f| f.role == FieldRole::PlainData)
            .filter_map(|f| Some((f.name.clone(), f.value()?.clone()))),
        |name| program.struct_fields(name),
    );

    let model = ShaderTypeModel {
        type_name: program.shader.name.clone(),
        kind: program.kind,
        pixel_type: program.pixel_type.clone(),
        fields,
        layout,
        dispatch,
        inputs,
        resource_textures,
        requires_scene_position: config.requires_scene_position,
        output_buffer: config.output_buffer,
        profile: config.effective_profile(program.kind),
        compile_options,
        effect: config.effect.clone(),
    };
    builder.check_model(&model);

    debug!(
        shader = %model.type_name,
        kind = ?model.kind,
        fields = model.fields.len(),
        constant_bytes = model.layout.size(),
        "built shader type model"
    );
    model
}

struct ModelBuilder<'b, 'p, 'a> {
    program: &'p Program<'a>,
    config: &'b ShaderConfig,
    type_name: &'a str,
    diagnostics: &'b mut Diagnostics,
}

impl ModelBuilder<'_, '_, '_> {
    fn report(&mut self, id: DiagnosticId, span: Span, args: &[&str]) {
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push(self.type_name);
        full.extend_from_slice(args);
        self.diagnostics.report(id, Some(span), &full);
    }

    fn shader_span(&self) -> Span {
        self.program.shader.span
    }

    fn dispatch(&mut self) -> DispatchMetadata {
        if !self.program.kind.is_dispatched() {
            return DispatchMetadata {
                thread_group_size: [1, 1, 1],
                axes: DispatchAxis::empty(),
            };
        }
        let axes = self.config.dispatch_axes;
        let Some(size) = self.config.effective_thread_group_size() else {
            self.report(DiagnosticId::InvalidDispatchAxis, self.shader_span(), &[]);
            return DispatchMetadata {
                thread_group_size: [1, 1, 1],
                axes,
            };
        };
        let [x, y, z] = size;
        let valid = size.iter().all(|&n| n >= 1)
            && x <= MAX_THREAD_GROUP_SIZE_XY
            && y <= MAX_THREAD_GROUP_SIZE_XY
            && z <= MAX_THREAD_GROUP_SIZE_Z
            && u64::from(x) * u64::from(y) * u64::from(z) <= u64::from(MAX_THREADS_PER_GROUP);
        if !valid {
            let text = format!("({x}, {y}, {z})");
            self.report(DiagnosticId::InvalidThreadGroupSize, self.shader_span(), &[&text]);
        }
        DispatchMetadata {
            thread_group_size: size,
            axes,
        }
    }

    fn fields(&mut self, dispatch: &DispatchMetadata) -> Vec<FieldInfo> {
        let program = self.program;
        let mut fields = Vec::new();
        for field in program.shader.fields() {
            for declarator in &field.declarators {
                let info = if field.attribute("GroupShared").is_some() {
                    self.group_shared(field, &declarator.name, declarator.init.as_ref(), dispatch)
                } else if field.is_static() {
                    self.static_field(field, &declarator.name, declarator.init.as_ref())
                } else if declarator.fixed_size.is_some() {
                    self.invalid_field(field, &declarator.name);
                    None
                } else {
                    self.instance_field(field, &declarator.name)
                };
                fields.extend(info);
            }
        }
        fields
    }

    fn invalid_field(&mut self, field: &FieldDecl, name: &str) {
        self.report(
            DiagnosticId::InvalidShaderFieldType,
            field.span,
            &[name, &field.ty.to_string()],
        );
    }

    fn instance_field(&mut self, field: &FieldDecl, name: &str) -> Option<FieldInfo> {
        if is_raw_bool(&field.ty) {
            self.invalid_field(field, name);
            return None;
        }
        let kind = self.program.kind;
        let (ty, role) = match self.program.resolve(&field.ty) {
            ResolvedType::Value(ty) => (FieldType::Value(ty), FieldRole::PlainData),
            ResolvedType::Resource(resource) => {
                let allowed = if kind.is_d2d() {
                    resource.is_d2d_resource_texture()
                } else {
                    !resource.is_d2d_resource_texture()
                };
                if !allowed {
                    self.invalid_field(field, name);
                    return None;
                }
                if !resource.element_is_valid() {
                    if resource.is_d2d_resource_texture() {
                        self.report(
                            DiagnosticId::InvalidResourceTextureElementType,
                            field.span,
                            &[name, &resource.element.to_string()],
                        );
                    } else {
                        self.invalid_field(field, name);
                    }
                    return None;
                }
                let role = if resource.is_d2d_resource_texture() {
                    match self.config.resource_textures.get(name).copied() {
                        Some(index) => FieldRole::ResourceTextureIndex(index),
                        None => {
                            self.report(
                                DiagnosticId::MissingResourceTextureIndex,
                                field.span,
                                &[name],
                            );
                            return None;
                        }
                    }
                } else if resource.is_buffer() {
                    FieldRole::BufferResource
                } else {
                    FieldRole::TextureResource
                };
                (FieldType::Resource(resource), role)
            }
            // Reported by the legality pass.
            ResolvedType::Forbidden(_) => return None,
            ResolvedType::Managed(_) | ResolvedType::Unsupported(_) => {
                self.invalid_field(field, name);
                return None;
            }
        };
        Some(FieldInfo {
            name: name.to_string(),
            ty,
            role,
            span: field.span,
        })
    }

    fn static_field(
        &mut self,
        field: &FieldDecl,
        name: &str,
        init: Option<&Expr>,
    ) -> Option<FieldInfo> {
        let constant = field.modifiers.intersects(Modifiers::CONST | Modifiers::READONLY);
        if matches!(self.program.resolve(&field.ty), ResolvedType::Forbidden(_)) {
            return None;
        }
        let ty = static_value_type(self.program, &field.ty, init)
            .filter(|_| !is_raw_bool(&field.ty) || field.modifiers.contains(Modifiers::CONST));
        let Some(ty) = ty else {
            self.report(
                DiagnosticId::InvalidStaticFieldType,
                field.span,
                &[name, &field.ty.to_string()],
            );
            return None;
        };
        Some(FieldInfo {
            name: name.to_string(),
            ty: FieldType::Value(ty),
            role: FieldRole::Static { constant },
            span: field.span,
        })
    }

    fn group_shared(
        &mut self,
        field: &FieldDecl,
        name: &str,
        init: Option<&Expr>,
        dispatch: &DispatchMetadata,
    ) -> Option<FieldInfo> {
        if !field.is_static() || self.program.kind.is_d2d() {
            self.report(DiagnosticId::InvalidGroupSharedDeclaration, field.span, &[name]);
            return None;
        }
        let TypeRefKind::Array { element, rank: 1 } = &field.ty.kind else {
            self.report(
                DiagnosticId::InvalidGroupSharedFieldType,
                field.span,
                &[name, &field.ty.to_string()],
            );
            return None;
        };
        let element = match self.program.resolve(element) {
            ResolvedType::Value(ty) if !is_raw_bool(element) => ty,
            _ => {
                self.report(
                    DiagnosticId::InvalidGroupSharedElementType,
                    field.span,
                    &[name, &element.to_string()],
                );
                return None;
            }
        };
        let explicit = field
            .attribute("GroupShared")
            .and_then(|attr| attr.args.first())
            .and_then(|arg| int_literal(&arg.expr));
        let length = explicit
            .or_else(|| init.and_then(array_length))
            .unwrap_or_else(|| dispatch.threads_per_group());
        Some(FieldInfo {
            name: name.to_string(),
            ty: FieldType::Value(HlslType::Array {
                element: Box::new(element),
                len: Some(length),
            }),
            role: FieldRole::GroupShared { length },
            span: field.span,
        })
    }

    fn check_properties(&mut self) {
        let program = self.program;
        for member in &program.shader.members {
            if let Member::Property(property) = member {
                self.report(
                    DiagnosticId::PropertyDeclaration,
                    property.span,
                    &[&property.name],
                );
            }
        }
    }

    fn resource_textures(&mut self, fields: &[FieldInfo]) -> Vec<ResourceTextureDescription> {
        let (program, config) = (self.program, self.config);
        for name in config.resource_textures.keys() {
            let is_texture = fields.iter().any(|f| {
                &f.name == name && matches!(f.role, FieldRole::ResourceTextureIndex(_))
            });
            let declared = program.field(self.type_name, name).is_some_and(|(ty, _)| {
                matches!(program.resolve(ty), ResolvedType::Resource(r) if r.is_d2d_resource_texture())
            });
            if !is_texture && !declared {
                let span = self.shader_span();
                self.report(DiagnosticId::ResourceTextureIndexOnInvalidField, span, &[name]);
            }
        }
        fields
            .iter()
            .filter_map(|f| {
                let FieldRole::ResourceTextureIndex(index) = f.role else {
                    return None;
                };
                let resource = f.resource()?;
                Some(ResourceTextureDescription {
                    field: f.name.clone(),
                    index,
                    dims: resource.dims()?,
                    element: resource.element.clone(),
                })
            })
            .collect()
    }

    fn check_resource_texture_indices(
        &mut self,
        textures: &[ResourceTextureDescription],
        input_count: u32,
    ) {
        let mut seen = BTreeSet::new();
        for texture in textures {
            let span = self
                .program
                .shader
                .fields()
                .find(|f| f.declarators.iter().any(|d| d.name == texture.field))
                .map_or(self.shader_span(), |f| f.span);
            let index = texture.index.to_string();
            if texture.index >= MAX_RESOURCE_TEXTURE_INDEX {
                self.report(
                    DiagnosticId::ResourceTextureIndexOutOfRange,
                    span,
                    &[&texture.field, &index],
                );
            } else if texture.index < input_count {
                self.report(
                    DiagnosticId::ResourceTextureIndexOverlapsInput,
                    span,
                    &[&texture.field, &index, &input_count.to_string()],
                );
            }
            if !seen.insert(texture.index) {
                self.report(
                    DiagnosticId::RepeatedResourceTextureIndex,
                    span,
                    &[&texture.field, &index],
                );
            }
        }
    }

    fn inputs(&mut self) -> InputMetadata {
        if !self.program.kind.is_d2d() {
            return InputMetadata::default();
        }
        let config = self.config;
        let span = self.shader_span();
        let count = match config.input_count {
            None => {
                self.report(DiagnosticId::MissingD2DInputCount, span, &[]);
                0
            }
            Some(count) if count > MAX_D2D_INPUT_COUNT => {
                self.report(DiagnosticId::InvalidD2DInputCount, span, &[&count.to_string()]);
                MAX_D2D_INPUT_COUNT
            }
            Some(count) => count,
        };

        let simple =
            self.unique_indices(&config.simple_inputs, DiagnosticId::RepeatedD2DSimpleInputIndex);
        let complex =
            self.unique_indices(&config.complex_inputs, DiagnosticId::RepeatedD2DComplexInputIndex);
        for index in simple.intersection(&complex) {
            self.report(DiagnosticId::OverlappingD2DInputIndex, span, &[&index.to_string()]);
        }
        for index in simple.union(&complex) {
            if *index >= count {
                self.report(
                    DiagnosticId::D2DInputIndexOutOfRange,
                    span,
                    &[&index.to_string(), &count.to_string()],
                );
            }
        }

        let mut described = BTreeSet::new();
        for description in &config.input_descriptions {
            let index = description.index.to_string();
            if description.index >= count {
                self.report(
                    DiagnosticId::D2DInputDescriptionIndexOutOfRange,
                    span,
                    &[&index, &count.to_string()],
                );
            }
            if !described.insert(description.index) {
                self.report(DiagnosticId::RepeatedD2DInputDescriptionIndex, span, &[&index]);
            }
        }

        InputMetadata {
            count,
            simple: simple.into_iter().collect(),
            complex: complex.into_iter().collect(),
            descriptions: config.input_descriptions.clone(),
        }
    }

    fn unique_indices(&mut self, indices: &[u32], repeated: DiagnosticId) -> BTreeSet<u32> {
        let mut seen = BTreeSet::new();
        let mut reported = BTreeSet::new();
        for &index in indices {
            if !seen.insert(index) && reported.insert(index) {
                let span = self.shader_span();
                self.report(repeated, span, &[&index.to_string()]);
            }
        }
        seen
    }

    fn check_scene_position(&mut self, resolver: &CallResolver<'_, '_>) {
        if !self.program.kind.is_d2d() || self.config.requires_scene_position {
            return;
        }
        let mut finder = ScenePositionFinder {
            resolver,
            owner: self.type_name.to_string(),
            found: None,
        };
        if let Some(entry) = self.program.entry {
            finder.visit_method(entry);
        }
        for key in reachable_methods(resolver) {
            if let Some(method) = self.program.method(&key) {
                finder.owner = key.owner.clone();
                finder.visit_method(method);
            }
        }
        if let Some(span) = finder.found {
            self.report(DiagnosticId::MissingScenePositionCapability, span, &[]);
        }
    }

    fn compile_options(&mut self) -> CompileOptions {
        let options = self.config.effective_compile_options(self.program.kind);
        let span = self.shader_span();
        if options.contains(CompileOptions::PACK_MATRIX_COLUMN_MAJOR) {
            self.report(DiagnosticId::ColumnMajorPackingOption, span, &[]);
        }
        if options.contains(CompileOptions::ENABLE_LINKING) && self.config.has_complex_inputs() {
            self.report(DiagnosticId::EnableLinkingWithComplexInputs, span, &[]);
        }
        options
    }

    fn check_accessibility(&mut self, fields: &[FieldInfo]) {
        if !self.config.generate_descriptor {
            return;
        }
        let shader_accessible = self
            .program
            .index
            .get(self.type_name)
            .is_some_and(|entry| entry.is_accessible());
        if !shader_accessible {
            let span = self.shader_span();
            self.report(DiagnosticId::InaccessibleTargetType, span, &[]);
        }

        for field in fields {
            let root = match &field.ty {
                FieldType::Value(ty) => ty,
                FieldType::Resource(resource) => &resource.element,
            };
            let mut pending = Vec::new();
            collect_structs(root, &mut pending);
            let mut visited = BTreeSet::new();
            while let Some(name) = pending.pop() {
                if !visited.insert(name.clone()) {
                    continue;
                }
                let accessible = self
                    .program
                    .index
                    .get(&name)
                    .map_or(true, |entry| entry.is_accessible());
                if !accessible {
                    self.report(
                        DiagnosticId::InaccessibleFieldType,
                        field.span,
                        &[&field.name, &name],
                    );
                    break;
                }
                for member in self.program.struct_fields(&name).unwrap_or_default() {
                    collect_structs(&member.ty, &mut pending);
                }
            }
        }
    }

    fn check_effect(&mut self) {
        let config = self.config;
        let effect = &config.effect;
        let span = self.shader_span();
        if let Some(id) = effect.id.as_deref().filter(|id| !is_guid(id)) {
            self.report(DiagnosticId::InvalidEffectId, span, &[id]);
        }
        let checks = [
            (&effect.display_name, DiagnosticId::InvalidEffectDisplayName),
            (&effect.description, DiagnosticId::InvalidEffectDescription),
            (&effect.category, DiagnosticId::InvalidEffectCategory),
            (&effect.author, DiagnosticId::InvalidEffectAuthor),
        ];
        let invalid: Vec<DiagnosticId> = checks
            .into_iter()
            .filter(|(value, _)| {
                value
                    .as_deref()
                    .is_some_and(|v| v.trim().is_empty() || v.chars().any(char::is_control))
            })
            .map(|(_, id)| id)
            .collect();
        for id in invalid {
            self.report(id, span, &[]);
        }
    }

    fn check_model(&mut self, model: &ShaderTypeModel) {
        let span = self.shader_span();
        let limit = model.constant_data_limit();
        if model.layout.size() > limit {
            self.report(
                DiagnosticId::DispatchDataSizeExceeded,
                span,
                &[&model.layout.size().to_string(), &limit.to_string()],
            );
        }
        let has_resources = model
            .fields
            .iter()
            .any(|f| matches!(f.role, FieldRole::BufferResource | FieldRole::TextureResource));
        if model.kind == ShaderKind::Compute && !has_resources {
            self.report(DiagnosticId::MissingShaderResources, span, &[]);
        }
    }
}

fn collect_structs(ty: &HlslType, out: &mut Vec<String>) {
    match ty {
        HlslType::Struct(name) => out.push(name.clone()),
        HlslType::Array { element, .. } => collect_structs(element, out),
        _ => {}
    }
}

/// HLSL type of a static field: a value type, or a one-dimensional array whose length is
/// fixed by its initializer (`new T[N]`, `new T[] { .. }` or `{ .. }`).
pub(crate) fn static_value_type(
    program: &Program<'_>,
    ty: &TypeRef,
    init: Option<&Expr>,
) -> Option<HlslType> {
    match program.resolve(ty) {
        ResolvedType::Value(ty) => Some(ty),
        ResolvedType::Managed(_) => {
            let TypeRefKind::Array { element, rank: 1 } = &ty.kind else {
                return None;
            };
            let ResolvedType::Value(element) = program.resolve(element) else {
                return None;
            };
            Some(HlslType::Array {
                element: Box::new(element),
                len: Some(array_length(init?)?),
            })
        }
        _ => None,
    }
}

/// `xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx`, optionally in braces.
fn is_guid(text: &str) -> bool {
    let text = text
        .strip_prefix('{')
        .and_then(|t| t.strip_suffix('}'))
        .unwrap_or(text);
    let groups: Vec<&str> = text.split('-').collect();
    groups.len() == 5
        && groups
            .iter()
            .zip([8, 4, 4, 4, 12])
            .all(|(group, len)| group.len() == len && group.chars().all(|c| c.is_ascii_hexdigit()))
}

fn int_literal(expr: &Expr) -> Option<u32> {
    match &expr.unparen().kind {
        ExprKind::Literal(Literal::Int { value, .. }) => u32::try_from(*value).ok(),
        _ => None,
    }
}

/// Element count of `new T[N]`, `new T[] { .. }` or `{ .. }`.
fn array_length(init: &Expr) -> Option<u32> {
    match &init.kind {
        ExprKind::NewArray {
            sizes, initializer, ..
        } => sizes
            .first()
            .and_then(int_literal)
            .or_else(|| initializer.as_ref().and_then(|items| u32::try_from(items.len()).ok())),
        ExprKind::ArrayInit(items) => u32::try_from(items.len()).ok(),
        _ => None,
    }
}

/// Finds the first call to a D2D intrinsic that reads the scene position.
struct ScenePositionFinder<'r, 'p, 'a> {
    resolver: &'r CallResolver<'p, 'a>,
    owner: String,
    found: Option<Span>,
}

impl Visit for ScenePositionFinder<'_, '_, '_> {
    fn visit_block(&mut self, block: &Block) {
        if self.found.is_none() {
            walk_block(self, block);
        }
    }

    fn visit_expr(&mut self, expr: &Expr) {
        if let ExprKind::Call { callee, args, .. } = &expr.kind {
            let args = vec![CallArg::positional(None); args.len()];
            let target = self
                .resolver
                .resolve(&self.owner, callee, &args, &Scope::new());
            if let CallTarget::Intrinsic(intrinsic) = target {
                if intrinsic.requires_scene_position && self.found.is_none() {
                    self.found = Some(expr.span);
                }
            }
        }
        walk_expr(self, expr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_syntax::parse;

    fn build(source: &str, config: &ShaderConfig) -> (ShaderTypeModel, Diagnostics) {
        let unit = parse(source).unwrap();
        let index = crate::program::TypeIndex::build(&unit);
        let shader = index.find("S").unwrap().decl;
        let mut diagnostics = Diagnostics::new();
        let program = Program::new(&unit, shader, &mut diagnostics).unwrap();
        let resolver = CallResolver::new(&program);
        let model = build_model(&resolver, config, &mut diagnostics);
        (model, diagnostics)
    }

    #[test]
    fn classifies_compute_fields() {
        let (model, diagnostics) = build(
            "struct S : IComputeShader {
                ReadWriteBuffer<float> output;
                ReadOnlyTexture2D<Float4> input;
                float scale;
                Float3 offset;
                const int Taps = 4;
                [GroupShared] static float[] cache = new float[32];
                void Execute() { }
            }",
            &ShaderConfig::default(),
        );
        assert!(diagnostics.is_empty(), "{diagnostics}");
        let roles: Vec<_> = model.fields.iter().map(|f| (f.name.as_str(), f.role)).collect();
        assert_eq!(
            roles,
            [
                ("output", FieldRole::BufferResource),
                ("input", FieldRole::TextureResource),
                ("scale", FieldRole::PlainData),
                ("offset", FieldRole::PlainData),
                ("Taps", FieldRole::Static { constant: true }),
                ("cache", FieldRole::GroupShared { length: 32 }),
            ]
        );
        assert_eq!(model.layout.size(), 16);
        assert_eq!(model.layout.field("offset").map(|f| f.offset), Some(4));
        assert_eq!(model.dispatch.thread_group_size, [8, 8, 1]);
    }

    #[test]
    fn rejects_invalid_fields() {
        let (_, diagnostics) = build(
            "struct S : IComputeShader {
                ReadWriteBuffer<float> output;
                string name;
                bool flag;
                static object cache;
                static float[] shared;
                [GroupShared] float[] notStatic;
                [GroupShared] static float single;
                [GroupShared] static string[] strings;
                float Value { get; set; }
                void Execute() { }
            }",
            &ShaderConfig::default(),
        );
        assert_eq!(
            diagnostics.ids().into_iter().collect::<Vec<_>>(),
            [
                DiagnosticId::InvalidShaderFieldType,
                DiagnosticId::InvalidStaticFieldType,
                DiagnosticId::InvalidGroupSharedFieldType,
                DiagnosticId::InvalidGroupSharedElementType,
                DiagnosticId::InvalidGroupSharedDeclaration,
                DiagnosticId::PropertyDeclaration,
            ]
        );
        assert_eq!(
            diagnostics
                .iter()
                .filter(|d| d.id == DiagnosticId::InvalidShaderFieldType)
                .count(),
            2
        );
    }

    #[test]
    fn captured_data_limit_depends_on_kind() {
        let fields: String = (0..16).map(|i| format!("Float4 f{i};")).collect();
        let source = format!(
            "struct S : IComputeShader {{ ReadWriteBuffer<float> b; {fields} void Execute() {{ }} }}"
        );
        let (model, diagnostics) = build(&source, &ShaderConfig::default());
        assert_eq!(model.layout.size(), 256);
        assert_eq!(
            diagnostics.ids().into_iter().collect::<Vec<_>>(),
            [DiagnosticId::DispatchDataSizeExceeded]
        );
    }

    #[test]
    fn thread_group_limits() {
        let config = ShaderConfig {
            thread_group_size: Some([32, 32, 2]),
            ..ShaderConfig::default()
        };
        let source = "struct S : IComputeShader { ReadWriteBuffer<float> b; void Execute() { } }";
        let (_, diagnostics) = build(source, &config);
        assert!(diagnostics.contains(DiagnosticId::InvalidThreadGroupSize));

        let config = ShaderConfig {
            dispatch_axes: DispatchAxis::empty(),
            ..ShaderConfig::default()
        };
        let (_, diagnostics) = build(source, &config);
        assert!(diagnostics.contains(DiagnosticId::InvalidDispatchAxis));
    }

    #[test]
    fn warns_about_compute_shaders_without_resources() {
        let (_, diagnostics) = build(
            "struct S : IComputeShader { float x; void Execute() { } }",
            &ShaderConfig::default(),
        );
        assert!(!diagnostics.has_errors());
        assert!(diagnostics.contains(DiagnosticId::MissingShaderResources));
    }

    #[test]
    fn effect_metadata_is_validated() {
        let config = ShaderConfig {
            input_count: Some(0),
            effect: EffectMetadata {
                id: Some("not-a-guid".into()),
                display_name: Some("Blur".into()),
                description: Some(" ".into()),
                category: Some("Filters\u{7}".into()),
                author: None,
            },
            ..ShaderConfig::default()
        };
        let (_, diagnostics) = build(
            "struct S : ID2D1PixelShader { float4 Execute() { return 0; } }",
            &config,
        );
        assert_eq!(
            diagnostics.ids().into_iter().collect::<Vec<_>>(),
            [
                DiagnosticId::InvalidEffectId,
                DiagnosticId::InvalidEffectDescription,
                DiagnosticId::InvalidEffectCategory,
            ]
        );
        assert!(is_guid("{6F9A1C3B-0000-4C8D-9E2F-A1B2C3D4E5F6}"));
    }

    #[test]
    fn inaccessible_field_types_are_reported() {
        let (_, diagnostics) = build(
            "public class Outer {
                 private struct Hidden { public float x; }
                 public struct S : IComputeShader {
                     ReadWriteBuffer<Hidden> items;
                     void Execute() { }
                 }
             }",
            &ShaderConfig::default(),
        );
        assert!(diagnostics.contains(DiagnosticId::InaccessibleFieldType));
        assert!(!diagnostics.contains(DiagnosticId::InaccessibleTargetType));
    }
}
