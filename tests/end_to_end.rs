use std::fs;

use bytemuck::{Pod, Zeroable};
use kiln::{
    transpile, ConstantBufferWriter, DiagnosticId, RegisterClass, ShaderCache, ShaderConfig,
    ShaderSource, SlotKind,
};
use pretty_assertions::assert_eq;

#[test]
fn single_read_write_buffer() {
    let source = ShaderSource::new(
        "using ComputeSharp;

         public readonly partial struct Doubler : IComputeShader
         {
             public readonly ReadWriteBuffer<float> values;

             public void Execute()
             {
                 values[ThreadIds.X] *= 2;
             }
         }",
    );
    let shader = transpile(&source, "Doubler", &ShaderConfig::default()).unwrap();

    assert!(shader.diagnostics.is_empty(), "{}", shader.diagnostics);
    assert_eq!(shader.bindings.len(), 1);
    let binding = shader.bindings.iter().next().unwrap();
    assert_eq!(binding.slot, 0);
    assert_eq!(binding.kind, SlotKind::ReadWriteBuffer);
    assert_eq!(binding.register.class, RegisterClass::UnorderedAccess);
    assert_eq!(binding.field.as_deref(), Some("values"));
    assert_eq!(shader.model.layout.size(), 0);

    insta::assert_snapshot!(shader.hlsl, @r###"
    cbuffer _ : register(b0)
    {
        uint __x;
        uint __y;
        uint __z;
    }

    RWStructuredBuffer<float> values : register(u0);

    [numthreads(8, 8, 1)]
    void Execute(uint3 ThreadIds : SV_DispatchThreadID)
    {
        if (ThreadIds.x < __x && ThreadIds.y < __y && ThreadIds.z < __z)
        {
            values[ThreadIds.x] *= 2;
        }
    }
    "###);
}

const EFFECT: &str = "
public readonly partial struct Blend : ID2D1PixelShader
{
    private readonly D2D1ResourceTexture2D<float4> mask;
    private readonly float amount;

    public float4 Execute()
    {
        float4 a = D2D.GetInput(0);
        float4 b = D2D.GetInput(1);
        return Hlsl.Lerp(a, b, amount * mask.Sample(new Float2(0.5f, 0.5f)).X);
    }
}";

fn blend_config(texture_index: u32) -> ShaderConfig {
    ShaderConfig::from_json(&format!(
        r#"{{
            "input_count": 2,
            "simple_inputs": [0, 1],
            "resource_textures": {{ "mask": {texture_index} }}
        }}"#
    ))
    .unwrap()
}

#[test]
fn d2d_inputs_and_resource_texture() {
    let shader = transpile(&ShaderSource::new(EFFECT), "Blend", &blend_config(2)).unwrap();
    assert!(!shader.diagnostics.has_errors());
    assert_eq!(shader.model.inputs.simple, [0, 1]);
    assert_eq!(shader.bindings.get("mask").map(|b| b.register.to_string()), Some("t2".into()));

    let err = transpile(&ShaderSource::new(EFFECT), "Blend", &blend_config(1)).unwrap_err();
    let diagnostics = err.diagnostics().unwrap();
    let ids: Vec<_> = diagnostics.errors().map(|d| d.id).collect();
    assert_eq!(ids, [DiagnosticId::ResourceTextureIndexOverlapsInput]);
    insta::assert_snapshot!(diagnostics.errors().next().unwrap().message, @r###"The resource texture field "mask" in the D2D1 shader of type Blend has index 1, which overlaps with an input (the shader declares 2 inputs)"###);
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct TintConstants {
    strength: f32,
    _pad: [f32; 3],
    tint: [f32; 4],
}

#[test]
fn shader_and_configuration_from_disk() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let shader_path = dir.path().join("Tint.cs");
    let config_path = dir.path().join("Tint.json");
    fs::write(
        &shader_path,
        "public struct Tint : IComputeShader
         {
             ReadWriteTexture2D<Float4> image;
             float strength;
             Float4 tint;

             public void Execute()
             {
                 image[ThreadIds.XY] = Hlsl.Lerp(image[ThreadIds.XY], tint, strength);
             }
         }",
    )?;
    fs::write(&config_path, r#"{ "dispatch_axes": "X | Y", "thread_group_size": [16, 16, 1] }"#)?;

    let source = ShaderSource::with_path(fs::read_to_string(&shader_path)?, &shader_path);
    let config: ShaderConfig = serde_json::from_str(&fs::read_to_string(&config_path)?)?;

    let mut cache = ShaderCache::new();
    let shader = cache.get_or_transpile(&source, "Tint", &config)?;
    assert!(shader.hlsl.contains("[numthreads(16, 16, 1)]"));
    assert!(shader.hlsl.contains("float strength : packoffset(c0.x);"));
    assert!(shader.hlsl.contains("float4 tint : packoffset(c1.x);"));

    let layout = &shader.model.layout;
    assert_eq!(layout.size(), 32);
    let mut writer = ConstantBufferWriter::new(layout);
    writer
        .write("strength", &0.75f32)?
        .write("tint", &[1.0f32, 0.5, 0.25, 1.0])?;
    let expected = TintConstants {
        strength: 0.75,
        _pad: [0.0; 3],
        tint: [1.0, 0.5, 0.25, 1.0],
    };
    assert_eq!(writer.as_bytes(), bytemuck::bytes_of(&expected));
    Ok(())
}
