use kiln_hlsl::{transpile, ShaderConfig, ShaderSource, SpecialIds, TranspiledShader};

fn compute(body: &str) -> TranspiledShader {
    let source = format!(
        "public struct S : IComputeShader {{
             ReadWriteBuffer<int> buffer;
             public void Execute() {{ {body} }}
         }}"
    );
    transpile(&ShaderSource::new(source), "S", &ShaderConfig::default())
        .unwrap_or_else(|err| panic!("{err}"))
}

fn entry_signature(hlsl: &str) -> &str {
    hlsl.lines()
        .find(|l| l.starts_with("void Execute("))
        .unwrap_or_else(|| panic!("no entry point in\n{hlsl}"))
}

#[test]
fn group_thread_ids_inject_their_parameter() {
    let shader = compute("buffer[ThreadIds.X] = GroupIds.X;");
    assert_eq!(shader.special_ids, SpecialIds::GROUP_THREAD_IDS);
    assert_eq!(
        entry_signature(&shader.hlsl),
        "void Execute(uint3 ThreadIds : SV_DispatchThreadID, uint3 GroupIds : SV_GroupThreadID)"
    );
}

#[test]
fn unused_ids_are_never_injected() {
    let shader = compute("buffer[ThreadIds.X] = ThreadIds.Y;");
    assert!(shader.special_ids.is_empty());
    assert_eq!(
        entry_signature(&shader.hlsl),
        "void Execute(uint3 ThreadIds : SV_DispatchThreadID)"
    );
    assert!(!shader.hlsl.contains("SV_GroupThreadID"));
    assert!(!shader.hlsl.contains("SV_GroupIndex"));
    assert!(!shader.hlsl.contains("SV_GroupID"));
}

#[test]
fn group_index_and_grid_ids_are_independent() {
    let shader = compute("buffer[GroupIds.Index] = GridIds.X;");
    assert_eq!(
        shader.special_ids,
        SpecialIds::GROUP_INDEX | SpecialIds::GRID_IDS
    );
    let signature = entry_signature(&shader.hlsl);
    assert!(signature.contains("uint __GroupIds__get_Index : SV_GroupIndex"));
    assert!(signature.contains("uint3 GridIds : SV_GroupID"));
    assert!(!signature.contains("SV_GroupThreadID"));
}

#[test]
fn compute_guard_covers_three_axes() {
    let shader = compute("buffer[ThreadIds.X] = DispatchSize.Z;");
    let hlsl = &shader.hlsl;
    assert!(hlsl.contains("[numthreads(8, 8, 1)]"), "{hlsl}");
    assert!(
        hlsl.contains("if (ThreadIds.x < __x && ThreadIds.y < __y && ThreadIds.z < __z)"),
        "{hlsl}"
    );
    assert!(hlsl.contains("buffer[ThreadIds.x] = __z;"), "{hlsl}");
}

#[test]
fn thread_group_size_comes_from_the_configuration() {
    let mut config = ShaderConfig::default();
    config.thread_group_size = Some([64, 1, 1]);
    let shader = transpile(
        &ShaderSource::new(
            "public struct S : IComputeShader {
                 ReadWriteBuffer<int> buffer;
                 public void Execute() { buffer[ThreadIds.X] = 1; }
             }",
        ),
        "S",
        &config,
    )
    .unwrap();
    assert!(shader.hlsl.contains("[numthreads(64, 1, 1)]"));
    assert_eq!(shader.model.dispatch.thread_group_size, [64, 1, 1]);
}

#[test]
fn pixel_returns_write_the_output_texture() {
    let source = "public struct Checker : IComputeShader<Float4> {
        public Float4 Execute() {
            int depth = DispatchSize.Z;
            if ((ThreadIds.X + ThreadIds.Y) % 2 == 0) {
                return new Float4(1, 1, 1, 1);
            } else {
                return new Float4(0, 0, 0, depth);
            }
        }
    }";
    let shader = transpile(&ShaderSource::new(source), "Checker", &ShaderConfig::default())
        .unwrap_or_else(|err| panic!("{err}"));
    let hlsl = &shader.hlsl;

    assert!(
        hlsl.contains("RWTexture2D<unorm float4> __outputTexture : register(u0);"),
        "{hlsl}"
    );
    assert_eq!(hlsl.matches("__outputTexture[ThreadIds.xy] = ").count(), 2, "{hlsl}");
    assert_eq!(hlsl.matches("return;").count(), 2, "{hlsl}");
    assert!(
        !hlsl.lines().any(|l| l.trim_start().starts_with("return float4")),
        "{hlsl}"
    );
    assert!(hlsl.contains("if (ThreadIds.x < __x && ThreadIds.y < __y)"), "{hlsl}");
    assert!(!hlsl.contains("ThreadIds.z < __z"), "{hlsl}");
    assert!(hlsl.contains("int depth = 1;"), "{hlsl}");
    assert_eq!(entry_signature(hlsl), "void Execute(uint3 ThreadIds : SV_DispatchThreadID)");
}
