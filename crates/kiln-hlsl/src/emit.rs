//! HLSL serialization of a shader type model and its rewritten methods.
//!
//! Emission performs no checks of its own: everything it receives has been validated by
//! the legality pass and the model builder.

use std::collections::BTreeSet;

use tracing::debug;

use crate::binding::{
    BindingTable, SlotKind, D2D_CONSTANTS_REGISTER, DISPATCH_CONSTANTS_REGISTER,
    FIELD_CONSTANTS_REGISTER,
};
use crate::execute::OUTPUT_TEXTURE;
use crate::layout::constant_buffer_capacity;
use crate::model::{FieldRole, ShaderTypeModel};
use crate::program::{Program, StructField, ENTRY_POINT};
use crate::resolve::ResourceProperty;
use crate::rewrite::{identifier, HlslStmt, RewrittenMethod, RewrittenMethodBody};
use crate::types::{HlslType, ResourceKind, ResourceType, ScalarType};

/// Line-oriented HLSL writer.
pub(crate) struct HlslWriter {
    out: String,
    indent: usize,
}

impl HlslWriter {
    pub(crate) fn new() -> Self {
        Self {
            out: String::new(),
            indent: 0,
        }
    }

    fn indent(&mut self) {
        self.indent += 4;
    }

    fn dedent(&mut self) {
        self.indent = self.indent.saturating_sub(4);
    }

    fn line(&mut self, s: &str) {
        if !s.is_empty() {
            for _ in 0..self.indent {
                self.out.push(' ');
            }
        }
        self.out.push_str(s);
        self.out.push('\n');
    }

    fn open(&mut self) {
        self.line("{");
        self.indent();
    }

    fn close(&mut self, terminator: &str) {
        self.dedent();
        self.line(&format!("}}{terminator}"));
    }

    pub(crate) fn finish(self) -> String {
        self.out
    }
}

/// Serializes the whole translation unit.
pub fn emit(
    program: &Program<'_>,
    model: &ShaderTypeModel,
    body: &RewrittenMethodBody,
    bindings: &BindingTable,
) -> String {
    let mut w = HlslWriter::new();
    let struct_fields = |name: &str| program.struct_fields(name);

    if model.kind.is_d2d() {
        emit_d2d_preamble(&mut w, model);
    }

    for name in struct_order(program, model, body) {
        let fields = struct_fields(&name).unwrap_or_default();
        w.line(&format!("struct {name}"));
        w.open();
        for field in fields {
            w.line(&format!(
                "{} {}{};",
                field.ty,
                identifier(&field.name),
                field.ty.array_suffix()
            ));
        }
        w.close(";");
        w.line("");
    }

    if !body.constants.is_empty() || !body.statics.is_empty() {
        for constant in &body.constants {
            w.line(constant);
        }
        for decl in &body.statics {
            w.line(&decl.declaration());
        }
        w.line("");
    }

    if model.kind.is_dispatched() {
        w.line(&format!("cbuffer _ : register(b{DISPATCH_CONSTANTS_REGISTER})"));
        w.open();
        w.line("uint __x;");
        w.line("uint __y;");
        w.line("uint __z;");
        w.close("");
        w.line("");
    }

    if !model.layout.is_empty() {
        let register = if model.kind.is_d2d() {
            D2D_CONSTANTS_REGISTER
        } else {
            FIELD_CONSTANTS_REGISTER
        };
        w.line(&format!("cbuffer __fields : register(b{register})"));
        w.open();
        for field in model.layout.fields() {
            w.line(&format!(
                "{} {}{} : packoffset({});",
                field.ty,
                identifier(&field.name),
                field.ty.array_suffix(),
                field.packoffset()
            ));
        }
        w.close("");
        w.line("");
    }

    if !bindings.is_empty() {
        for binding in bindings {
            let register = binding.register;
            let Some(name) = binding.field.as_deref() else {
                let pixel = model
                    .pixel_type
                    .clone()
                    .unwrap_or(HlslType::Vector(ScalarType::Float, 4));
                w.line(&format!(
                    "RWTexture2D<unorm {pixel}> {OUTPUT_TEXTURE} : register({register});"
                ));
                continue;
            };
            let Some(resource) = model.field(name).and_then(|f| f.resource()) else {
                continue;
            };
            let name = identifier(name);
            match binding.kind {
                SlotKind::ConstantBuffer => {
                    let capacity = constant_buffer_capacity(&resource.element, struct_fields);
                    w.line(&format!("cbuffer _{name} : register({register})"));
                    w.open();
                    w.line(&format!("{} {name}[{capacity}];", resource.element));
                    w.close("");
                }
                SlotKind::ResourceTexture => {
                    let object = resource.hlsl_object_type().unwrap_or_default();
                    w.line(&format!("{object} {name} : register({register});"));
                    w.line(&format!(
                        "SamplerState __sampler__{name} : register(s{});",
                        register.index
                    ));
                }
                _ => {
                    let object = resource.hlsl_object_type().unwrap_or_default();
                    w.line(&format!("{object} {name} : register({register});"));
                }
            }
        }
        w.line("");
    }

    let group_shared: Vec<_> = model
        .fields
        .iter()
        .filter(|f| matches!(f.role, FieldRole::GroupShared { .. }))
        .filter_map(|f| Some((f.name.as_str(), f.value()?)))
        .collect();
    if !group_shared.is_empty() {
        for (name, ty) in group_shared {
            w.line(&format!(
                "groupshared {ty} {}{};",
                identifier(name),
                ty.array_suffix()
            ));
        }
        w.line("");
    }

    for (field, property) in &body.resource_accessors {
        let Some(resource) = model.field(field).and_then(|f| f.resource()) else {
            continue;
        };
        emit_accessor(&mut w, field, *property, resource, &struct_fields);
        w.line("");
    }

    if !body.helpers.is_empty() {
        for helper in &body.helpers {
            w.line(&format!("{};", helper.signature()));
        }
        w.line("");
        for helper in &body.helpers {
            write_method(&mut w, helper);
            w.line("");
        }
    }

    if model.kind.is_d2d() {
        w.line(&format!("D2D_PS_ENTRY({ENTRY_POINT})"));
        write_body(&mut w, &body.entry.body);
    } else {
        write_method(&mut w, &body.entry);
    }

    let hlsl = w.finish();
    debug!(
        shader = %model.type_name,
        bytes = hlsl.len(),
        helpers = body.helpers.len(),
        "emitted hlsl"
    );
    hlsl
}

fn emit_d2d_preamble(w: &mut HlslWriter, model: &ShaderTypeModel) {
    let inputs = &model.inputs;
    w.line(&format!("#define D2D_INPUT_COUNT {}", inputs.count));
    for index in 0..inputs.count {
        let mode = if inputs.simple.contains(&index) {
            "SIMPLE"
        } else {
            "COMPLEX"
        };
        w.line(&format!("#define D2D_INPUT{index}_{mode}"));
    }
    if model.requires_scene_position {
        w.line("#define D2D_REQUIRES_SCENE_POSITION");
    }
    w.line("");
    w.line("#include \"d2d1effecthelpers.hlsli\"");
    w.line("");
}

/// User structs the unit needs, each after the structs it contains.
fn struct_order(
    program: &Program<'_>,
    model: &ShaderTypeModel,
    body: &RewrittenMethodBody,
) -> Vec<String> {
    fn root(ty: &HlslType) -> Option<&str> {
        match ty {
            HlslType::Struct(name) => Some(name),
            HlslType::Array { element, .. } => root(element),
            _ => None,
        }
    }

    fn visit(program: &Program<'_>, name: &str, seen: &mut BTreeSet<String>, out: &mut Vec<String>) {
        if !seen.insert(name.to_string()) {
            return;
        }
        for field in program.struct_fields(name).unwrap_or_default() {
            if let Some(inner) = root(&field.ty) {
                visit(program, inner, seen, out);
            }
        }
        out.push(name.to_string());
    }

    let mut roots: BTreeSet<&str> = body.structs.iter().map(String::as_str).collect();
    for field in &model.fields {
        let ty = match (field.value(), field.resource()) {
            (Some(ty), _) => ty,
            (_, Some(resource)) => &resource.element,
            _ => continue,
        };
        roots.extend(root(ty));
    }

    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for name in roots {
        visit(program, name, &mut seen, &mut out);
    }
    out
}

fn emit_accessor<F>(
    w: &mut HlslWriter,
    field: &str,
    property: ResourceProperty,
    resource: &ResourceType,
    struct_fields: &F,
) where
    F: Fn(&str) -> Option<Vec<StructField>>,
{
    w.line(&format!("int __{field}__get_{}()", property.name()));
    w.open();
    let object = identifier(field);
    match (resource.dims(), property) {
        (None, _) if resource.kind == ResourceKind::ConstantBuffer => {
            let capacity = constant_buffer_capacity(&resource.element, struct_fields);
            w.line(&format!("return {capacity};"));
        }
        (None, _) => {
            w.line("uint width, stride;");
            w.line(&format!("{object}.GetDimensions(width, stride);"));
            w.line("return width;");
        }
        (Some(dims), property) => {
            let names = ["width", "height", "depth"];
            let used = &names[..usize::from(dims.min(3))];
            w.line(&format!("uint {};", used.join(", ")));
            w.line(&format!("{object}.GetDimensions({});", used.join(", ")));
            let result = match property {
                ResourceProperty::Height => "height",
                ResourceProperty::Depth => "depth",
                _ => "width",
            };
            w.line(&format!("return {result};"));
        }
    }
    w.close("");
}

fn write_method(w: &mut HlslWriter, method: &RewrittenMethod) {
    for attribute in &method.attributes {
        w.line(attribute);
    }
    w.line(&method.signature());
    write_body(w, &method.body);
}

fn write_body(w: &mut HlslWriter, body: &[HlslStmt]) {
    w.open();
    for stmt in body {
        write_stmt(w, stmt);
    }
    w.close("");
}

/// Body of a control-flow statement: blocks as-is, anything else braced.
fn write_child(w: &mut HlslWriter, stmt: &HlslStmt) {
    match stmt {
        HlslStmt::Block(stmts) => write_body(w, stmts),
        other => write_body(w, std::slice::from_ref(other)),
    }
}

fn write_if(
    w: &mut HlslWriter,
    prefix: &str,
    cond: &str,
    then: &HlslStmt,
    otherwise: Option<&HlslStmt>,
) {
    w.line(&format!("{prefix}if ({cond})"));
    write_child(w, then);
    match otherwise {
        Some(HlslStmt::If {
            cond,
            then,
            otherwise,
        }) => write_if(w, "else ", cond, then, otherwise.as_deref()),
        Some(other) => {
            w.line("else");
            write_child(w, other);
        }
        None => {}
    }
}

fn write_stmt(w: &mut HlslWriter, stmt: &HlslStmt) {
    match stmt {
        HlslStmt::Block(stmts) => write_body(w, stmts),
        HlslStmt::Line(line) => w.line(line),
        HlslStmt::If {
            cond,
            then,
            otherwise,
        } => write_if(w, "", cond, then, otherwise.as_deref()),
        HlslStmt::While { cond, body } => {
            w.line(&format!("while ({cond})"));
            write_child(w, body);
        }
        HlslStmt::DoWhile { body, cond } => {
            w.line("do");
            match body.as_ref() {
                HlslStmt::Block(stmts) => {
                    w.open();
                    for stmt in stmts {
                        write_stmt(w, stmt);
                    }
                    w.close(&format!(" while ({cond});"));
                }
                other => {
                    w.open();
                    write_stmt(w, other);
                    w.close(&format!(" while ({cond});"));
                }
            }
        }
        HlslStmt::For {
            init,
            cond,
            step,
            body,
        } => {
            w.line(&format!("for ({init}; {cond}; {step})"));
            write_child(w, body);
        }
        HlslStmt::Switch {
            scrutinee,
            sections,
        } => {
            w.line(&format!("switch ({scrutinee})"));
            w.open();
            for section in sections {
                for label in &section.labels {
                    w.line(label);
                }
                w.indent();
                for stmt in &section.body {
                    write_stmt(w, stmt);
                }
                w.dedent();
            }
            w.close("");
        }
        HlslStmt::Return(None) => w.line("return;"),
        HlslStmt::Return(Some(value)) => w.line(&format!("return {value};")),
    }
}

/// Text of a single method, attributes included.
#[cfg(test)]
pub(crate) fn method_text(method: &RewrittenMethod) -> String {
    let mut w = HlslWriter::new();
    write_method(&mut w, method);
    w.finish()
}
