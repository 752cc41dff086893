//! Binding table: positional resource slots and the HLSL registers behind them.
//!
//! Dispatched shaders reserve `b0` for the dispatch extent and `b1` for captured fields;
//! `ConstantBuffer<T>` fields follow from [`BINDING_BASE_CONSTANT_BUFFER`]. Read-only
//! resources take `t#` and read-write resources `u#`, each counted in declaration order.
//! D2D shaders bind their captured fields at `b0` and every resource texture at `t{index}`
//! with a sampler at `s{index}`.

use core::fmt;

use serde::Serialize;
use tracing::debug;

use crate::model::{FieldRole, ShaderTypeModel};
use crate::program::ShaderKind;
use crate::types::{ResourceKind, ResourceType};

/// `cbuffer` holding `__x`, `__y` and `__z`.
pub const DISPATCH_CONSTANTS_REGISTER: u32 = 0;
/// `cbuffer` holding the captured fields of a dispatched shader.
pub const FIELD_CONSTANTS_REGISTER: u32 = 1;
/// First register of `ConstantBuffer<T>` fields.
pub const BINDING_BASE_CONSTANT_BUFFER: u32 = 2;
/// `cbuffer` holding the captured fields of a D2D pixel shader.
pub const D2D_CONSTANTS_REGISTER: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SlotKind {
    ConstantBuffer,
    ReadOnlyBuffer,
    ReadWriteBuffer,
    ReadOnlyTexture,
    ReadWriteTexture,
    /// D2D resource texture, sampled through its own sampler.
    ResourceTexture,
}

impl SlotKind {
    fn of(resource: &ResourceType) -> Self {
        match resource.kind {
            ResourceKind::ConstantBuffer => SlotKind::ConstantBuffer,
            ResourceKind::ReadOnlyBuffer => SlotKind::ReadOnlyBuffer,
            ResourceKind::ReadWriteBuffer => SlotKind::ReadWriteBuffer,
            ResourceKind::ReadOnlyTexture { .. } => SlotKind::ReadOnlyTexture,
            ResourceKind::ReadWriteTexture { .. } => SlotKind::ReadWriteTexture,
            ResourceKind::D2DResourceTexture { .. } => SlotKind::ResourceTexture,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RegisterClass {
    ConstantBuffer,
    ShaderResource,
    UnorderedAccess,
    Sampler,
}

impl RegisterClass {
    pub fn prefix(self) -> char {
        match self {
            RegisterClass::ConstantBuffer => 'b',
            RegisterClass::ShaderResource => 't',
            RegisterClass::UnorderedAccess => 'u',
            RegisterClass::Sampler => 's',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Register {
    pub class: RegisterClass,
    pub index: u32,
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.class.prefix(), self.index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Binding {
    /// Position in the table; the interop layer binds resources in this order.
    pub slot: u32,
    pub kind: SlotKind,
    pub register: Register,
    /// Shader field bound here; `None` for the output texture of pixel shaders.
    pub field: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BindingTable {
    bindings: Vec<Binding>,
}

impl BindingTable {
    pub fn iter(&self) -> impl Iterator<Item = &Binding> {
        self.bindings.iter()
    }

    pub fn get(&self, field: &str) -> Option<&Binding> {
        self.bindings
            .iter()
            .find(|b| b.field.as_deref() == Some(field))
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl<'t> IntoIterator for &'t BindingTable {
    type Item = &'t Binding;
    type IntoIter = std::slice::Iter<'t, Binding>;

    fn into_iter(self) -> Self::IntoIter {
        self.bindings.iter()
    }
}

/// Builds the binding table of `model`. The result depends only on field order.
pub fn build_bindings(model: &ShaderTypeModel) -> BindingTable {
    let mut bindings = Vec::new();
    let mut next = |kind, register, field| {
        let slot = bindings.len() as u32;
        bindings.push(Binding {
            slot,
            kind,
            register,
            field,
        });
    };

    let mut constant_buffers = BINDING_BASE_CONSTANT_BUFFER;
    let mut shader_resources = 0;
    let mut unordered_access = 0;
    if model.kind == ShaderKind::Pixel {
        next(
            SlotKind::ReadWriteTexture,
            Register {
                class: RegisterClass::UnorderedAccess,
                index: 0,
            },
            None,
        );
        unordered_access = 1;
    }

    for field in &model.fields {
        let Some(resource) = field.resource() else {
            continue;
        };
        let kind = SlotKind::of(resource);
        let register = match (field.role, kind) {
            (FieldRole::ResourceTextureIndex(index), _) => Register {
                class: RegisterClass::ShaderResource,
                index,
            },
            (_, SlotKind::ConstantBuffer) => {
                constant_buffers += 1;
                Register {
                    class: RegisterClass::ConstantBuffer,
                    index: constant_buffers - 1,
                }
            }
            (_, SlotKind::ReadWriteBuffer | SlotKind::ReadWriteTexture) => {
                unordered_access += 1;
                Register {
                    class: RegisterClass::UnorderedAccess,
                    index: unordered_access - 1,
                }
            }
            _ => {
                shader_resources += 1;
                Register {
                    class: RegisterClass::ShaderResource,
                    index: shader_resources - 1,
                }
            }
        };
        next(kind, register, Some(field.name.clone()));
    }

    debug!(shader = %model.type_name, bindings = bindings.len(), "built binding table");
    BindingTable { bindings }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ShaderConfig;
    use crate::diagnostics::Diagnostics;
    use crate::model::build_model;
    use crate::program::{Program, TypeIndex};
    use crate::resolve::CallResolver;

    fn table(source: &str, config: &ShaderConfig) -> BindingTable {
        let unit = kiln_syntax::parse(source).unwrap();
        let decl = TypeIndex::build(&unit).find("S").unwrap().decl;
        let mut diagnostics = Diagnostics::new();
        let program = Program::new(&unit, decl, &mut diagnostics).unwrap();
        let model = build_model(&CallResolver::new(&program), config, &mut diagnostics);
        build_bindings(&model)
    }

    fn summary(table: &BindingTable) -> Vec<(u32, SlotKind, String)> {
        table
            .iter()
            .map(|b| (b.slot, b.kind, b.register.to_string()))
            .collect()
    }

    #[test]
    fn registers_are_counted_per_class() {
        let table = table(
            "struct S : IComputeShader {
                 ReadOnlyBuffer<float> a;
                 ReadWriteBuffer<float> b;
                 float scale;
                 ConstantBuffer<Float4> c;
                 ReadOnlyTexture2D<Float4> d;
                 ReadWriteTexture3D<float> e;
                 void Execute() { b[0] = a[0] + c[0].X + d[0, 0].X + scale; e[0, 0, 0] = 1; }
             }",
            &ShaderConfig::default(),
        );
        assert_eq!(
            summary(&table),
            [
                (0, SlotKind::ReadOnlyBuffer, "t0".to_string()),
                (1, SlotKind::ReadWriteBuffer, "u0".to_string()),
                (2, SlotKind::ConstantBuffer, "b2".to_string()),
                (3, SlotKind::ReadOnlyTexture, "t1".to_string()),
                (4, SlotKind::ReadWriteTexture, "u1".to_string()),
            ]
        );
        assert_eq!(table.get("d").map(|b| b.slot), Some(3));
    }

    #[test]
    fn pixel_shaders_reserve_the_output_texture() {
        let table = table(
            "struct S : IComputeShader<Float4> {
                 ReadWriteTexture2D<Float4> scratch;
                 Float4 Execute() => scratch[ThreadIds.XY];
             }",
            &ShaderConfig::default(),
        );
        assert_eq!(
            summary(&table),
            [
                (0, SlotKind::ReadWriteTexture, "u0".to_string()),
                (1, SlotKind::ReadWriteTexture, "u1".to_string()),
            ]
        );
        assert_eq!(table.iter().next().and_then(|b| b.field.clone()), None);
    }

    #[test]
    fn resource_textures_bind_at_their_index() {
        let mut config = ShaderConfig::default();
        config.input_count = Some(1);
        config.simple_inputs = vec![0];
        config.resource_textures.insert("lut".into(), 3);
        let table = table(
            "struct S : ID2D1PixelShader {
                 D2D1ResourceTexture2D<Float4> lut;
                 Float4 Execute() => lut.Sample(new Float2(0.5f, 0.5f));
             }",
            &config,
        );
        assert_eq!(
            summary(&table),
            [(0, SlotKind::ResourceTexture, "t3".to_string())]
        );
    }
}
