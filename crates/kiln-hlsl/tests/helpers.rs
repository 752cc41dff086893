use kiln_hlsl::{transpile, DiagnosticId, ShaderConfig, ShaderSource, TranspiledShader};

fn compute(members: &str, body: &str) -> TranspiledShader {
    let source = format!(
        "public struct S : IComputeShader {{
             ReadWriteBuffer<float> values;
             {members}
             public void Execute() {{ {body} }}
         }}"
    );
    transpile(&ShaderSource::new(source), "S", &ShaderConfig::default())
        .unwrap_or_else(|err| panic!("{err}"))
}

fn occurrences(hlsl: &str, needle: &str) -> usize {
    hlsl.matches(needle).count()
}

#[test]
fn optional_parameters_share_one_helper() {
    let shader = compute(
        "static float Scale(float v, float k = 2) => v * k;",
        "values[ThreadIds.X] = Scale(1) + Scale(1, 3);",
    );
    let hlsl = &shader.hlsl;
    // Prototype and definition.
    assert_eq!(occurrences(hlsl, "float Scale(float v, float k)"), 2, "{hlsl}");
    assert!(hlsl.contains("Scale(1, 2) + Scale(1, 3)"), "{hlsl}");
}

#[test]
fn same_arity_overloads_are_all_emitted() {
    let shader = compute(
        "static float Lum(Float3 c) => c.X;
         static float Lum(Float4 c) => c.W;",
        "Float3 rgb = 1;
         values[ThreadIds.X] = Lum(rgb) + Lum(new Float4(1, 2, 3, 4));",
    );
    let hlsl = &shader.hlsl;
    assert_eq!(occurrences(hlsl, "float Lum(float3 c)"), 2, "{hlsl}");
    assert_eq!(occurrences(hlsl, "float Lum(float4 c)"), 2, "{hlsl}");
    assert!(hlsl.contains("return c.x;"), "{hlsl}");
    assert!(hlsl.contains("return c.w;"), "{hlsl}");
}

#[test]
fn unused_overloads_are_left_out() {
    let shader = compute(
        "static float Lum(Float3 c) => c.X;
         static float Lum(Float4 c) => c.W;",
        "values[ThreadIds.X] = Lum(new Float4(1, 2, 3, 4));",
    );
    assert!(!shader.hlsl.contains("float Lum(float3 c)"), "{}", shader.hlsl);
    assert!(shader.hlsl.contains("float Lum(float4 c)"), "{}", shader.hlsl);
}

#[test]
fn overloads_without_argument_types_are_rejected() {
    let source = ShaderSource::new(
        "public struct S : IComputeShader {
             ReadWriteBuffer<float> values;
             static float Lum(Float3 c) => c.X;
             static float Lum(Float4 c) => c.W;
             public void Execute() { var v = Unknown(); values[ThreadIds.X] = Lum(v); }
         }",
    );
    let err = transpile(&source, "S", &ShaderConfig::default()).unwrap_err();
    let ids = err.diagnostics().unwrap().ids();
    assert!(ids.contains(&DiagnosticId::AmbiguousMethodCall), "{err}");
}

#[test]
fn self_containing_struct_fields_are_rejected() {
    let source = ShaderSource::new(
        "public struct Node {
             public Node a; public Node b; public Node c; public Node d; public Node e;
             public float value;
         }
         public struct S : IComputeShader {
             ReadWriteBuffer<float> values;
             Node root;
             public void Execute() { values[ThreadIds.X] = 1; }
         }",
    );
    let err = transpile(&source, "S", &ShaderConfig::default()).unwrap_err();
    let ids = err.diagnostics().unwrap().ids();
    assert!(ids.contains(&DiagnosticId::InvalidShaderFieldType), "{err}");
}
