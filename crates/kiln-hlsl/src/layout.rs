//! Constant-buffer packing.
//!
//! Captured fields are laid out in declaration order with the HLSL constant-buffer rules:
//!
//! - scalars and vectors pack tightly but never straddle a 16-byte register; a value that
//!   would cross a boundary moves to the next register
//! - `double` components are 8-byte aligned
//! - matrices, user structs and arrays start on a register; every row/element but the last
//!   occupies a full register
//! - the member following a struct starts on the next register
//!
//! The total size is the end of the last field, without trailing padding.

use std::cell::RefCell;
use std::collections::HashMap;

use bytemuck::Pod;
use serde::Serialize;
use thiserror::Error;
use tracing::trace;

use crate::limits::{MAX_CONSTANT_BUFFER_BYTES, REGISTER_BYTES};
use crate::program::StructField;
use crate::types::HlslType;

pub(crate) const fn align_up(value: u32, align: u32) -> u32 {
    debug_assert!(align.is_power_of_two());
    value.saturating_add(align - 1) & !(align - 1)
}

/// Placement of one captured field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldLayout {
    pub name: String,
    pub ty: HlslType,
    /// Byte offset from the start of the buffer.
    pub offset: u32,
    /// Bytes covered, including the padding between matrix rows or array elements.
    pub size: u32,
}

impl FieldLayout {
    pub fn register(&self) -> u32 {
        self.offset / REGISTER_BYTES
    }

    /// `packoffset` target of the field (`c1.y`, or `c2` for register-aligned types).
    pub fn packoffset(&self) -> String {
        match self.ty {
            HlslType::Scalar(_) | HlslType::Vector(..) => {
                let component = ["x", "y", "z", "w"][((self.offset % REGISTER_BYTES) / 4) as usize];
                format!("c{}.{component}", self.register())
            }
            _ => format!("c{}", self.register()),
        }
    }

    /// Size of the value as the host provides it: matrices are tightly packed rows.
    pub fn host_size(&self) -> u32 {
        match &self.ty {
            HlslType::Matrix { scalar, rows, cols } => {
                u32::from(*rows) * u32::from(*cols) * scalar.size()
            }
            _ => self.size,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConstantBufferLayout {
    fields: Vec<FieldLayout>,
    size: u32,
}

impl ConstantBufferLayout {
    /// Packs `fields` in order. `struct_fields` resolves the members of user structs;
    /// unknown structs are treated as empty.
    pub fn build<I, F>(fields: I, struct_fields: F) -> Self
    where
        I: IntoIterator<Item = (String, HlslType)>,
        F: Fn(&str) -> Option<Vec<StructField>>,
    {
        let struct_sizes = RefCell::new(HashMap::new());
        let mut packer = Packer::new(&struct_fields, &struct_sizes);
        let fields = fields
            .into_iter()
            .map(|(name, ty)| {
                let (offset, size) = packer.place(&ty);
                trace!(field = %name, %ty, offset, size, "placed constant buffer field");
                FieldLayout {
                    name,
                    ty,
                    offset,
                    size,
                }
            })
            .collect();
        Self {
            fields,
            size: packer.end,
        }
    }

    pub fn fields(&self) -> &[FieldLayout] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldLayout> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Bytes from the start of the buffer to the end of the last field.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Size rounded up to whole registers.
    pub fn register_size(&self) -> u32 {
        align_up(self.size, REGISTER_BYTES)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Element count of the array backing a `ConstantBuffer<T>` field: as many `T` as fit in one
/// constant buffer, each starting on a register.
pub fn constant_buffer_capacity<F>(element: &HlslType, struct_fields: F) -> u32
where
    F: Fn(&str) -> Option<Vec<StructField>>,
{
    let struct_sizes = RefCell::new(HashMap::new());
    let packer = Packer::new(&struct_fields, &struct_sizes);
    let stride = align_up(packer.size_of(element).max(1), REGISTER_BYTES);
    MAX_CONSTANT_BUFFER_BYTES / stride
}

struct Packer<'f, F> {
    struct_fields: &'f F,
    /// Sizes of the user structs measured so far, shared with nested packers.
    struct_sizes: &'f RefCell<HashMap<String, u32>>,
    /// End of the last placed value.
    end: u32,
    /// Next offset available to a following value (past a struct, the next register).
    cursor: u32,
    depth: u32,
}

const MAX_STRUCT_DEPTH: u32 = 16;

impl<'f, F> Packer<'f, F>
where
    F: Fn(&str) -> Option<Vec<StructField>>,
{
    fn new(struct_fields: &'f F, struct_sizes: &'f RefCell<HashMap<String, u32>>) -> Self {
        Self {
            struct_fields,
            struct_sizes,
            end: 0,
            cursor: 0,
            depth: 0,
        }
    }

    fn place(&mut self, ty: &HlslType) -> (u32, u32) {
        let size = self.size_of(ty);
        let offset = match ty {
            HlslType::Scalar(s) | HlslType::Vector(s, _) => {
                let offset = align_up(self.cursor, s.size());
                if offset % REGISTER_BYTES + size > REGISTER_BYTES {
                    align_up(offset, REGISTER_BYTES)
                } else {
                    offset
                }
            }
            _ => align_up(self.cursor, REGISTER_BYTES),
        };
        self.end = offset.saturating_add(size);
        self.cursor = match ty {
            HlslType::Struct(_) => align_up(self.end, REGISTER_BYTES),
            _ => self.end,
        };
        (offset, size)
    }

    fn size_of(&self, ty: &HlslType) -> u32 {
        match ty {
            HlslType::Void => 0,
            HlslType::Scalar(s) => s.size(),
            HlslType::Vector(s, n) => s.size() * u32::from(*n),
            HlslType::Matrix { scalar, rows, cols } => {
                let row = scalar.size() * u32::from(*cols);
                align_up(row, REGISTER_BYTES) * (u32::from(*rows) - 1) + row
            }
            HlslType::Struct(_) if self.depth >= MAX_STRUCT_DEPTH => 0,
            HlslType::Struct(name) => {
                if let Some(&size) = self.struct_sizes.borrow().get(name) {
                    return size;
                }
                let mut inner = Packer::new(self.struct_fields, self.struct_sizes);
                inner.depth = self.depth + 1;
                for field in (self.struct_fields)(name).unwrap_or_default() {
                    inner.place(&field.ty);
                }
                self.struct_sizes.borrow_mut().insert(name.clone(), inner.end);
                inner.end
            }
            HlslType::Array { element, len } => {
                let element = self.size_of(element);
                match len {
                    Some(0) | None => 0,
                    Some(len) => align_up(element, REGISTER_BYTES)
                        .saturating_mul(len - 1)
                        .saturating_add(element),
                }
            }
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LayoutError {
    #[error("the constant buffer has no field named {0:?}")]
    UnknownField(String),
    #[error("field {field:?} expects {expected} bytes, got {actual}")]
    SizeMismatch {
        field: String,
        expected: u32,
        actual: usize,
    },
    #[error("destination holds {available} bytes, but the constant buffer needs {required}")]
    DestinationTooSmall { required: usize, available: usize },
}

/// Builds the byte image of a constant buffer from host values.
#[derive(Debug, Clone)]
pub struct ConstantBufferWriter<'l> {
    layout: &'l ConstantBufferLayout,
    bytes: Vec<u8>,
}

impl<'l> ConstantBufferWriter<'l> {
    pub fn new(layout: &'l ConstantBufferLayout) -> Self {
        Self {
            layout,
            bytes: vec![0; layout.size() as usize],
        }
    }

    /// Stores `value` into `field`. Matrices are given as tightly packed rows and are spread
    /// to the register stride.
    pub fn write<T: Pod>(&mut self, field: &str, value: &T) -> Result<&mut Self, LayoutError> {
        self.write_bytes(field, bytemuck::bytes_of(value))
    }

    pub fn write_bytes(&mut self, field: &str, bytes: &[u8]) -> Result<&mut Self, LayoutError> {
        let layout = self
            .layout
            .field(field)
            .ok_or_else(|| LayoutError::UnknownField(field.to_string()))?;
        let expected = layout.host_size();
        if bytes.len() != expected as usize {
            return Err(LayoutError::SizeMismatch {
                field: field.to_string(),
                expected,
                actual: bytes.len(),
            });
        }

        let offset = layout.offset as usize;
        match &layout.ty {
            HlslType::Matrix { scalar, cols, .. } => {
                let row = (scalar.size() * u32::from(*cols)) as usize;
                let stride = align_up(row as u32, REGISTER_BYTES) as usize;
                for (i, chunk) in bytes.chunks(row).enumerate() {
                    let start = offset + i * stride;
                    self.bytes[start..start + row].copy_from_slice(chunk);
                }
            }
            _ => self.bytes[offset..offset + bytes.len()].copy_from_slice(bytes),
        }
        Ok(self)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Copies the image into `destination`, returning the number of bytes written.
    pub fn load_into(&self, destination: &mut [u8]) -> Result<usize, LayoutError> {
        let required = self.bytes.len();
        if destination.len() < required {
            return Err(LayoutError::DestinationTooSmall {
                required,
                available: destination.len(),
            });
        }
        destination[..required].copy_from_slice(&self.bytes);
        Ok(required)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ScalarType;

    fn layout_of(fields: &[(&str, HlslType)]) -> ConstantBufferLayout {
        let point = |name: &str| {
            (name == "Point").then(|| {
                vec![
                    StructField {
                        name: "x".into(),
                        ty: HlslType::FLOAT,
                    },
                    StructField {
                        name: "y".into(),
                        ty: HlslType::FLOAT,
                    },
                ]
            })
        };
        ConstantBufferLayout::build(
            fields.iter().map(|(n, t)| (n.to_string(), t.clone())),
            point,
        )
    }

    fn offsets(layout: &ConstantBufferLayout) -> Vec<u32> {
        layout.fields().iter().map(|f| f.offset).collect()
    }

    fn float(n: u8) -> HlslType {
        HlslType::Vector(ScalarType::Float, n)
    }

    #[test]
    fn float3_after_float_shares_the_register() {
        let layout = layout_of(&[("a", HlslType::FLOAT), ("b", float(3))]);
        assert_eq!(offsets(&layout), [0, 4]);
        assert_eq!(layout.size(), 16);

        let layout = layout_of(&[("a", float(2)), ("b", float(3))]);
        assert_eq!(offsets(&layout), [0, 16]);
        assert_eq!(layout.size(), 28);
    }

    #[test]
    fn scalars_fill_the_tail_of_a_vector() {
        let layout = layout_of(&[
            ("a", float(3)),
            ("b", HlslType::FLOAT),
            ("c", float(2)),
            ("d", float(2)),
            ("e", HlslType::INT),
        ]);
        assert_eq!(offsets(&layout), [0, 12, 16, 24, 32]);
        assert_eq!(layout.size(), 36);
        assert_eq!(layout.register_size(), 48);
    }

    #[test]
    fn doubles_are_eight_byte_aligned() {
        let double = HlslType::Scalar(ScalarType::Double);
        let layout = layout_of(&[
            ("a", HlslType::FLOAT),
            ("b", double.clone()),
            ("c", HlslType::Vector(ScalarType::Double, 2)),
        ]);
        assert_eq!(offsets(&layout), [0, 8, 16]);
        assert_eq!(layout.size(), 32);
    }

    #[test]
    fn matrices_and_structs_start_on_registers() {
        let layout = layout_of(&[
            ("a", HlslType::FLOAT),
            (
                "m",
                HlslType::Matrix {
                    scalar: ScalarType::Float,
                    rows: 3,
                    cols: 2,
                },
            ),
            ("p", HlslType::Struct("Point".into())),
            ("b", HlslType::FLOAT),
        ]);
        // 3x2: two full registers plus an 8-byte last row.
        assert_eq!(offsets(&layout), [0, 16, 64, 80]);
        assert_eq!(layout.fields()[1].size, 40);
        assert_eq!(layout.fields()[2].size, 8);
        assert_eq!(layout.size(), 84);
    }

    #[test]
    fn nested_struct_sizes_are_measured_once() {
        let lookups = std::cell::Cell::new(0);
        let levels = |name: &str| {
            lookups.set(lookups.get() + 1);
            let level: u32 = name.strip_prefix('L')?.parse().ok()?;
            Some(if level == 7 {
                vec![StructField {
                    name: "v".into(),
                    ty: HlslType::FLOAT,
                }]
            } else {
                (0..6)
                    .map(|i| StructField {
                        name: format!("f{i}"),
                        ty: HlslType::Struct(format!("L{}", level + 1)),
                    })
                    .collect()
            })
        };
        let layout = ConstantBufferLayout::build(
            [("root".to_string(), HlslType::Struct("L0".into()))],
            levels,
        );
        assert_eq!(lookups.get(), 8);
        assert!(layout.size() > 0);
    }

    #[test]
    fn constant_buffer_capacity_rounds_elements_to_registers() {
        assert_eq!(constant_buffer_capacity(&float(4), |_| None), 4096);
        assert_eq!(constant_buffer_capacity(&float(1), |_| None), 4096);
        assert_eq!(constant_buffer_capacity(&float(4).with_scalar(ScalarType::Double), |_| None), 2048);
    }

    #[test]
    fn packoffsets_name_register_and_component() {
        let layout = layout_of(&[
            ("a", HlslType::FLOAT),
            ("b", float(2)),
            ("c", HlslType::INT),
            (
                "m",
                HlslType::Matrix {
                    scalar: ScalarType::Float,
                    rows: 4,
                    cols: 4,
                },
            ),
        ]);
        let packs: Vec<_> = layout.fields().iter().map(|f| f.packoffset()).collect();
        assert_eq!(packs, ["c0.x", "c0.y", "c0.w", "c1"]);
    }

    #[test]
    fn writer_spreads_matrix_rows() {
        let layout = layout_of(&[
            ("s", HlslType::FLOAT),
            (
                "m",
                HlslType::Matrix {
                    scalar: ScalarType::Float,
                    rows: 2,
                    cols: 2,
                },
            ),
        ]);
        let mut writer = ConstantBufferWriter::new(&layout);
        writer
            .write("s", &2.0f32)
            .unwrap()
            .write("m", &[1.0f32, 2.0, 3.0, 4.0])
            .unwrap();
        let floats: &[f32] = bytemuck::cast_slice(writer.as_bytes());
        assert_eq!(floats, [2.0, 0.0, 0.0, 0.0, 1.0, 2.0, 0.0, 0.0, 3.0, 4.0]);
    }

    #[test]
    fn writer_reports_mistakes() {
        let layout = layout_of(&[("v", float(4))]);
        let mut writer = ConstantBufferWriter::new(&layout);
        assert_eq!(
            writer.write("w", &1u32).unwrap_err(),
            LayoutError::UnknownField("w".into())
        );
        assert_eq!(
            writer.write("v", &1u32).unwrap_err(),
            LayoutError::SizeMismatch {
                field: "v".into(),
                expected: 16,
                actual: 4
            }
        );
        let mut small = [0u8; 8];
        assert_eq!(
            writer.load_into(&mut small).unwrap_err(),
            LayoutError::DestinationTooSmall {
                required: 16,
                available: 8
            }
        );
        let mut exact = [0xffu8; 20];
        assert_eq!(writer.load_into(&mut exact), Ok(16));
        assert_eq!(&exact[16..], &[0xff; 4]);
    }
}
