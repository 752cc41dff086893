//! Explicit shader configuration.
//!
//! Everything a shader type would otherwise declare through attributes (thread-group
//! size, D2D inputs, resource texture indices, compile options, effect metadata) is carried
//! here and validated by the model builder.

use std::collections::BTreeMap;
use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::program::ShaderKind;

bitflags! {
    /// Compile flags passed to the external HLSL compiler. Bit values match `D3DCOMPILE_*`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct CompileOptions: u32 {
        const DEBUG = 1 << 0;
        const SKIP_VALIDATION = 1 << 1;
        const SKIP_OPTIMIZATION = 1 << 2;
        const PACK_MATRIX_ROW_MAJOR = 1 << 3;
        const PACK_MATRIX_COLUMN_MAJOR = 1 << 4;
        const PARTIAL_PRECISION = 1 << 5;
        const AVOID_FLOW_CONTROL = 1 << 9;
        const PREFER_FLOW_CONTROL = 1 << 10;
        const ENABLE_STRICTNESS = 1 << 11;
        const IEEE_STRICTNESS = 1 << 13;
        const OPTIMIZATION_LEVEL0 = 1 << 14;
        const OPTIMIZATION_LEVEL2 = (1 << 14) | (1 << 15);
        const OPTIMIZATION_LEVEL3 = 1 << 15;
        const WARNINGS_ARE_ERRORS = 1 << 18;
        const RESOURCES_MAY_ALIAS = 1 << 19;
        const ALL_RESOURCES_BOUND = 1 << 21;
        const ENABLE_LINKING = 1 << 31;
    }
}

impl CompileOptions {
    /// Default options for a shader of the given kind.
    pub fn default_for(kind: ShaderKind, has_complex_inputs: bool) -> Self {
        let base = CompileOptions::OPTIMIZATION_LEVEL3 | CompileOptions::PACK_MATRIX_ROW_MAJOR;
        match kind {
            ShaderKind::Compute | ShaderKind::Pixel => base,
            ShaderKind::D2D1Pixel if has_complex_inputs => {
                base | CompileOptions::WARNINGS_ARE_ERRORS
            }
            ShaderKind::D2D1Pixel => {
                base | CompileOptions::WARNINGS_ARE_ERRORS | CompileOptions::ENABLE_LINKING
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShaderProfile {
    #[serde(rename = "cs_5_0")]
    Cs5_0,
    #[serde(rename = "cs_6_0")]
    Cs6_0,
    #[serde(rename = "ps_4_0_level_9_1")]
    Ps4_0Level9_1,
    #[serde(rename = "ps_4_0_level_9_3")]
    Ps4_0Level9_3,
    #[serde(rename = "ps_4_0")]
    Ps4_0,
    #[serde(rename = "ps_4_1")]
    Ps4_1,
    #[serde(rename = "ps_5_0")]
    Ps5_0,
}

impl ShaderProfile {
    pub fn default_for(kind: ShaderKind) -> Self {
        match kind {
            ShaderKind::Compute | ShaderKind::Pixel => ShaderProfile::Cs6_0,
            ShaderKind::D2D1Pixel => ShaderProfile::Ps5_0,
        }
    }

    /// Target string understood by the HLSL compiler (`cs_6_0`, `ps_5_0`, ...).
    pub fn target(self) -> &'static str {
        match self {
            ShaderProfile::Cs5_0 => "cs_5_0",
            ShaderProfile::Cs6_0 => "cs_6_0",
            ShaderProfile::Ps4_0Level9_1 => "ps_4_0_level_9_1",
            ShaderProfile::Ps4_0Level9_3 => "ps_4_0_level_9_3",
            ShaderProfile::Ps4_0 => "ps_4_0",
            ShaderProfile::Ps4_1 => "ps_4_1",
            ShaderProfile::Ps5_0 => "ps_5_0",
        }
    }

    pub fn is_compute(self) -> bool {
        matches!(self, ShaderProfile::Cs5_0 | ShaderProfile::Cs6_0)
    }
}

impl fmt::Display for ShaderProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.target())
    }
}

bitflags! {
    /// Axes a compute shader is expected to be dispatched along.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct DispatchAxis: u8 {
        const X = 1 << 0;
        const Y = 1 << 1;
        const Z = 1 << 2;
    }
}

impl Default for DispatchAxis {
    fn default() -> Self {
        DispatchAxis::X | DispatchAxis::Y
    }
}

impl DispatchAxis {
    /// Default thread-group size for this axis set, or `None` for the empty set.
    pub fn default_thread_group_size(self) -> Option<[u32; 3]> {
        let x = DispatchAxis::X;
        let y = DispatchAxis::Y;
        let z = DispatchAxis::Z;
        Some(match self {
            s if s == x => [64, 1, 1],
            s if s == y => [1, 64, 1],
            s if s == z => [1, 1, 64],
            s if s == x | y => [8, 8, 1],
            s if s == x | z => [8, 1, 8],
            s if s == y | z => [1, 8, 8],
            s if s == x | y | z => [4, 4, 4],
            _ => return None,
        })
    }
}

/// Buffer precision of a D2D effect output (`D2D1_BUFFER_PRECISION`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BufferPrecision {
    #[default]
    Unknown = 0,
    UInt8Normalized = 1,
    UInt8NormalizedSrgb = 2,
    UInt16Normalized = 3,
    Float16 = 4,
    Float32 = 5,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelDepth {
    #[default]
    Default,
    One,
    Four,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputBuffer {
    pub precision: BufferPrecision,
    pub channel_depth: ChannelDepth,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InputFilter {
    #[default]
    MinMagMipPoint,
    MinMagMipLinear,
    Anisotropic,
}

/// Sampling description of one D2D input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InputDescription {
    pub index: u32,
    #[serde(default)]
    pub filter: InputFilter,
    #[serde(default)]
    pub level_of_detail: Option<u32>,
}

/// Display metadata of a D2D effect.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectMetadata {
    pub id: Option<String>,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub author: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    /// Explicit thread-group size; derived from `dispatch_axes` when absent.
    pub thread_group_size: Option<[u32; 3]>,
    pub dispatch_axes: DispatchAxis,
    pub input_count: Option<u32>,
    pub simple_inputs: Vec<u32>,
    pub complex_inputs: Vec<u32>,
    pub input_descriptions: Vec<InputDescription>,
    /// Resource texture field name to texture index.
    pub resource_textures: BTreeMap<String, u32>,
    pub requires_scene_position: bool,
    pub profile: Option<ShaderProfile>,
    pub compile_options: Option<CompileOptions>,
    pub output_buffer: OutputBuffer,
    pub effect: EffectMetadata,
    pub generate_descriptor: bool,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            thread_group_size: None,
            dispatch_axes: DispatchAxis::default(),
            input_count: None,
            simple_inputs: Vec::new(),
            complex_inputs: Vec::new(),
            input_descriptions: Vec::new(),
            resource_textures: BTreeMap::new(),
            requires_scene_position: false,
            profile: None,
            compile_options: None,
            output_buffer: OutputBuffer::default(),
            effect: EffectMetadata::default(),
            generate_descriptor: true,
        }
    }
}

impl ShaderConfig {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn effective_thread_group_size(&self) -> Option<[u32; 3]> {
        self.thread_group_size
            .or_else(|| self.dispatch_axes.default_thread_group_size())
    }

    pub fn effective_profile(&self, kind: ShaderKind) -> ShaderProfile {
        self.profile.unwrap_or_else(|| ShaderProfile::default_for(kind))
    }

    pub fn has_complex_inputs(&self) -> bool {
        !self.complex_inputs.is_empty()
    }

    pub fn effective_compile_options(&self, kind: ShaderKind) -> CompileOptions {
        self.compile_options
            .unwrap_or_else(|| CompileOptions::default_for(kind, self.has_complex_inputs()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axis_defaults_cover_every_combination() {
        assert_eq!(DispatchAxis::X.default_thread_group_size(), Some([64, 1, 1]));
        assert_eq!(DispatchAxis::Z.default_thread_group_size(), Some([1, 1, 64]));
        assert_eq!(
            (DispatchAxis::Y | DispatchAxis::Z).default_thread_group_size(),
            Some([1, 8, 8])
        );
        assert_eq!(DispatchAxis::all().default_thread_group_size(), Some([4, 4, 4]));
        assert_eq!(DispatchAxis::empty().default_thread_group_size(), None);
        assert_eq!(DispatchAxis::default().default_thread_group_size(), Some([8, 8, 1]));
    }

    #[test]
    fn compile_option_bits_match_d3dcompile() {
        assert_eq!(CompileOptions::PACK_MATRIX_ROW_MAJOR.bits(), 0x8);
        assert_eq!(CompileOptions::IEEE_STRICTNESS.bits(), 0x2000);
        assert_eq!(CompileOptions::OPTIMIZATION_LEVEL2.bits(), 0xC000);
        assert_eq!(CompileOptions::WARNINGS_ARE_ERRORS.bits(), 0x40000);
        assert_eq!(CompileOptions::ENABLE_LINKING.bits(), 0x8000_0000);
    }

    #[test]
    fn d2d_defaults_enable_linking_only_without_complex_inputs() {
        let simple = CompileOptions::default_for(ShaderKind::D2D1Pixel, false);
        let complex = CompileOptions::default_for(ShaderKind::D2D1Pixel, true);
        assert!(simple.contains(CompileOptions::ENABLE_LINKING));
        assert!(!complex.contains(CompileOptions::ENABLE_LINKING));
        assert!(!CompileOptions::default_for(ShaderKind::Compute, false)
            .contains(CompileOptions::ENABLE_LINKING));
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config = ShaderConfig::from_json(
            r#"{
                "input_count": 2,
                "simple_inputs": [0, 1],
                "resource_textures": { "lut": 2 },
                "profile": "ps_4_1"
            }"#,
        )
        .unwrap();
        assert_eq!(config.input_count, Some(2));
        assert_eq!(config.resource_textures["lut"], 2);
        assert_eq!(config.profile, Some(ShaderProfile::Ps4_1));
        assert!(config.generate_descriptor);
        assert_eq!(config.effective_thread_group_size(), Some([8, 8, 1]));
        assert_eq!(
            config.effective_profile(ShaderKind::D2D1Pixel).to_string(),
            "ps_4_1"
        );
    }
}
