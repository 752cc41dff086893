use std::collections::BTreeSet;

use kiln_hlsl::config::InputDescription;
use kiln_hlsl::{transpile, DiagnosticId, ShaderConfig, ShaderSource, TranspiledShader};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

const TINT: &str = "public struct Tint : ID2D1PixelShader {
    D2D1ResourceTexture2D<Float4> lut;
    float amount;
    public Float4 Execute() => D2D.GetInput(0) * amount + lut.Sample(new Float2(0.5f, 0.5f));
}";

const INDEX_RULES: &[DiagnosticId] = &[
    DiagnosticId::InvalidD2DInputCount,
    DiagnosticId::MissingD2DInputCount,
    DiagnosticId::RepeatedD2DSimpleInputIndex,
    DiagnosticId::RepeatedD2DComplexInputIndex,
    DiagnosticId::OverlappingD2DInputIndex,
    DiagnosticId::D2DInputIndexOutOfRange,
    DiagnosticId::D2DInputDescriptionIndexOutOfRange,
    DiagnosticId::RepeatedD2DInputDescriptionIndex,
    DiagnosticId::ResourceTextureIndexOutOfRange,
    DiagnosticId::ResourceTextureIndexOverlapsInput,
    DiagnosticId::RepeatedResourceTextureIndex,
    DiagnosticId::MissingResourceTextureIndex,
    DiagnosticId::ResourceTextureIndexOnInvalidField,
];

fn config(count: Option<u32>, simple: &[u32], complex: &[u32], textures: &[(&str, u32)]) -> ShaderConfig {
    let mut config = ShaderConfig::default();
    config.input_count = count;
    config.simple_inputs = simple.to_vec();
    config.complex_inputs = complex.to_vec();
    for (name, index) in textures {
        config.resource_textures.insert(name.to_string(), *index);
    }
    config
}

/// Every index-related diagnostic, one entry per report.
fn index_diagnostics(source: &str, config: &ShaderConfig) -> Vec<DiagnosticId> {
    let diagnostics = match transpile(&ShaderSource::new(source), "Tint", config) {
        Ok(shader) => shader.diagnostics,
        Err(err) => err.diagnostics().cloned().unwrap_or_default(),
    };
    diagnostics
        .iter()
        .map(|d| d.id)
        .filter(|id| INDEX_RULES.contains(id))
        .collect()
}

fn transpile_tint(config: &ShaderConfig) -> TranspiledShader {
    transpile(&ShaderSource::new(TINT), "Tint", config).unwrap_or_else(|err| panic!("{err}"))
}

#[test]
fn valid_assignment_has_no_index_diagnostics() {
    let config = config(Some(2), &[0, 1], &[], &[("lut", 2)]);
    assert_eq!(index_diagnostics(TINT, &config), Vec::<DiagnosticId>::new());
}

#[test]
fn each_violation_is_reported_once() {
    let cases = [
        (
            config(Some(2), &[0, 0, 1], &[], &[("lut", 2)]),
            DiagnosticId::RepeatedD2DSimpleInputIndex,
        ),
        (
            config(Some(2), &[0], &[1, 1], &[("lut", 2)]),
            DiagnosticId::RepeatedD2DComplexInputIndex,
        ),
        (
            config(Some(2), &[0, 1], &[1], &[("lut", 2)]),
            DiagnosticId::OverlappingD2DInputIndex,
        ),
        (
            config(Some(2), &[0, 2], &[], &[("lut", 3)]),
            DiagnosticId::D2DInputIndexOutOfRange,
        ),
        (
            config(Some(2), &[0, 1], &[], &[("lut", 16)]),
            DiagnosticId::ResourceTextureIndexOutOfRange,
        ),
        (
            config(Some(2), &[0, 1], &[], &[("lut", 1)]),
            DiagnosticId::ResourceTextureIndexOverlapsInput,
        ),
        (
            config(Some(9), &[], &[], &[("lut", 12)]),
            DiagnosticId::InvalidD2DInputCount,
        ),
        (
            config(None, &[], &[], &[("lut", 2)]),
            DiagnosticId::MissingD2DInputCount,
        ),
        (
            config(Some(2), &[0, 1], &[], &[("lut", 2), ("amount", 3)]),
            DiagnosticId::ResourceTextureIndexOnInvalidField,
        ),
        (
            config(Some(2), &[0, 1], &[], &[]),
            DiagnosticId::MissingResourceTextureIndex,
        ),
    ];
    for (config, expected) in cases {
        assert_eq!(index_diagnostics(TINT, &config), [expected], "{config:?}");
    }
}

#[test]
fn input_descriptions_are_validated() {
    let mut out_of_range = config(Some(2), &[0, 1], &[], &[("lut", 2)]);
    out_of_range.input_descriptions = vec![InputDescription {
        index: 5,
        filter: Default::default(),
        level_of_detail: None,
    }];
    assert_eq!(
        index_diagnostics(TINT, &out_of_range),
        [DiagnosticId::D2DInputDescriptionIndexOutOfRange]
    );

    let mut repeated = config(Some(2), &[0, 1], &[], &[("lut", 2)]);
    let description = InputDescription {
        index: 1,
        filter: Default::default(),
        level_of_detail: Some(0),
    };
    repeated.input_descriptions = vec![description, description];
    assert_eq!(
        index_diagnostics(TINT, &repeated),
        [DiagnosticId::RepeatedD2DInputDescriptionIndex]
    );
}

#[test]
fn resource_textures_cannot_share_an_index() {
    let source = "public struct Tint : ID2D1PixelShader {
        D2D1ResourceTexture2D<Float4> a;
        D2D1ResourceTexture2D<Float4> b;
        public Float4 Execute() => a.Sample(new Float2(0, 0)) + b.Sample(new Float2(0, 0));
    }";
    let config = config(Some(1), &[0], &[], &[("a", 3), ("b", 3)]);
    assert_eq!(
        index_diagnostics(source, &config),
        [DiagnosticId::RepeatedResourceTextureIndex]
    );
}

#[test]
fn preamble_and_registers_follow_the_configuration() {
    let shader = transpile_tint(&config(Some(2), &[0], &[1], &[("lut", 2)]));
    let hlsl = &shader.hlsl;
    for line in [
        "#define D2D_INPUT_COUNT 2",
        "#define D2D_INPUT0_SIMPLE",
        "#define D2D_INPUT1_COMPLEX",
        "#include \"d2d1effecthelpers.hlsli\"",
        "cbuffer __fields : register(b0)",
        "float amount : packoffset(c0.x);",
        "Texture2D<float4> lut : register(t2);",
        "SamplerState __sampler__lut : register(s2);",
        "D2D_PS_ENTRY(Execute)",
    ] {
        assert!(hlsl.lines().any(|l| l.trim() == line), "missing {line:?} in\n{hlsl}");
    }
    assert!(!hlsl.contains("D2D_REQUIRES_SCENE_POSITION"));
    assert!(!hlsl.contains("numthreads"));
    assert_eq!(shader.model.resource_textures.len(), 1);
    assert_eq!(shader.model.resource_textures[0].index, 2);
}

#[test]
fn scene_position_must_be_declared() {
    let source = "public struct Tint : ID2D1PixelShader {
        public Float4 Execute() => new Float4(D2D.GetScenePosition().XY, 0, 1);
    }";
    let base = config(Some(0), &[], &[], &[]);
    let err = transpile(&ShaderSource::new(source), "Tint", &base).unwrap_err();
    assert_eq!(
        err.diagnostics().unwrap().ids(),
        BTreeSet::from([DiagnosticId::MissingScenePositionCapability])
    );

    let mut declared = base;
    declared.requires_scene_position = true;
    let shader = transpile(&ShaderSource::new(source), "Tint", &declared).unwrap();
    assert!(shader.hlsl.contains("#define D2D_REQUIRES_SCENE_POSITION"));
}

prop_compose! {
    fn valid_assignment()(count in 0u32..=8, mask in any::<u8>())
        (count in Just(count), mask in Just(mask), texture in count..16) -> ShaderConfig {
        let (simple, complex): (Vec<u32>, Vec<u32>) =
            (0..count).partition(|&i| mask & (1 << i) != 0);
        config(Some(count), &simple, &complex, &[("lut", texture)])
    }
}

proptest! {
    #[test]
    fn valid_assignments_never_report_index_rules(config in valid_assignment()) {
        prop_assert_eq!(index_diagnostics(TINT, &config), Vec::<DiagnosticId>::new());
    }
}
