use std::collections::BTreeSet;

use kiln_hlsl::{transpile, DiagnosticId, ShaderConfig, ShaderSource};
use pretty_assertions::assert_eq;

/// Diagnostic ids of a compute shader whose entry point runs `body`, with `members` added
/// to the shader type.
fn ids_with(members: &str, body: &str) -> BTreeSet<DiagnosticId> {
    let source = format!(
        "public struct S : IComputeShader {{
             ReadWriteBuffer<float> buffer;
             {members}
             public void Execute() {{ {body} }}
         }}"
    );
    match transpile(&ShaderSource::new(source), "S", &ShaderConfig::default()) {
        Ok(shader) => shader.diagnostics.ids(),
        Err(err) => err
            .diagnostics()
            .unwrap_or_else(|| panic!("unexpected failure: {err}"))
            .ids(),
    }
}

fn ids(body: &str) -> BTreeSet<DiagnosticId> {
    ids_with("", body)
}

#[test]
fn baseline_shader_is_clean() {
    assert_eq!(ids("buffer[ThreadIds.X] *= 2;"), BTreeSet::new());
}

#[test]
fn each_statement_rule_reports_only_itself() {
    let cases = [
        ("lock (buffer) { }", DiagnosticId::LockStatement),
        ("try { buffer[0] = 1; } finally { }", DiagnosticId::TryCatch),
        ("unsafe { buffer[0] = 1; }", DiagnosticId::UnsafeStatement),
        ("checked { buffer[0] = 1; }", DiagnosticId::CheckedStatement),
        ("foreach (float x in buffer) { }", DiagnosticId::ForEachStatement),
        ("using (buffer) { }", DiagnosticId::UsingStatement),
        ("yield break;", DiagnosticId::Yield),
    ];
    for (body, expected) in cases {
        assert_eq!(ids(body), BTreeSet::from([expected]), "{body}");
    }
}

#[test]
fn each_expression_rule_reports_only_itself() {
    let cases = [
        ("int i = checked(1 + 2);", DiagnosticId::CheckedExpression),
        ("int s = sizeof(float);", DiagnosticId::SizeOf),
        ("var t = (1, 2);", DiagnosticId::TupleType),
        ("buffer[^1] = 0;", DiagnosticId::RangeExpression),
        ("var s = stackalloc float[4];", DiagnosticId::StackAlloc),
        ("var o = new { A = 1 };", DiagnosticId::AnonymousObject),
        ("bool b = buffer[0] is > 0;", DiagnosticId::RelationalPattern),
        ("bool b = \"a\" == \"b\";", DiagnosticId::StringLiteral),
        ("var q = from x in buffer select x;", DiagnosticId::QueryExpression),
        ("int x = 0; int* p = &x;", DiagnosticId::PointerType),
    ];
    for (body, expected) in cases {
        assert_eq!(ids(body), BTreeSet::from([expected]), "{body}");
    }
}

#[test]
fn ref_locals_and_managed_locals_report_only_themselves() {
    assert_eq!(
        ids("float x = 0; ref float r = ref x;"),
        BTreeSet::from([DiagnosticId::RefType])
    );
    assert_eq!(
        ids("object o = default;"),
        BTreeSet::from([DiagnosticId::InvalidLocalType])
    );
}

#[test]
fn other_disallowed_constructs_are_reported() {
    let cases = [
        ("fixed (float* p = &buffer[0]) { }", DiagnosticId::FixedStatement),
        ("delegate*<float, float> f = default;", DiagnosticId::FunctionPointerType),
        ("bool b = buffer[0] is { };", DiagnosticId::RecursivePattern),
        ("float v = await buffer;", DiagnosticId::AwaitExpression),
        ("throw new Exception();", DiagnosticId::Throw),
        ("var o = new object();", DiagnosticId::InvalidObjectCreation),
        ("buffer[0] = Console.Read();", DiagnosticId::InvalidMethodCall),
    ];
    for (body, expected) in cases {
        let ids = ids(body);
        assert!(ids.contains(&expected), "{body}: {ids:?}");
    }
}

#[test]
fn large_unsuffixed_literals_need_a_wider_type() {
    assert_eq!(
        ids("buffer[0] = 5000000000;"),
        BTreeSet::from([DiagnosticId::InvalidDiscoveredType])
    );
    assert_eq!(ids("buffer[0] = 4294967295;"), BTreeSet::new());
}

#[test]
fn method_modifiers_are_checked() {
    assert_eq!(
        ids_with("async void Later() { }", "buffer[0] = 1;"),
        BTreeSet::from([DiagnosticId::AsyncModifier])
    );
    assert_eq!(
        ids_with("unsafe void Raw() { }", "buffer[0] = 1;"),
        BTreeSet::from([DiagnosticId::UnsafeModifier])
    );
}

#[test]
fn violations_are_batched() {
    let ids = ids("lock (buffer) { } yield break; int s = sizeof(float);");
    assert_eq!(
        ids,
        BTreeSet::from([
            DiagnosticId::LockStatement,
            DiagnosticId::SizeOf,
            DiagnosticId::Yield,
        ])
    );
}

#[test]
fn dispatch_info_is_entry_only() {
    let cases = [
        ("int Helper() => ThreadIds.X;", DiagnosticId::InvalidThreadIdsUsage),
        ("int Helper() => GroupIds.X;", DiagnosticId::InvalidGroupIdsUsage),
        ("int Helper() => GridIds.X;", DiagnosticId::InvalidGridIdsUsage),
        ("int Helper() => GroupSize.X;", DiagnosticId::InvalidGroupSizeUsage),
        ("int Helper() => DispatchSize.X;", DiagnosticId::InvalidDispatchSizeUsage),
    ];
    for (members, expected) in cases {
        assert_eq!(
            ids_with(members, "buffer[0] = Helper();"),
            BTreeSet::from([expected]),
            "{members}"
        );
    }
}

#[test]
fn property_declarations_are_rejected() {
    assert_eq!(
        ids_with("float Scale { get; set; }", "buffer[0] = 1;"),
        BTreeSet::from([DiagnosticId::PropertyDeclaration])
    );
}

#[test]
fn messages_name_the_offender() {
    let source = ShaderSource::new(
        "public struct Blur : IComputeShader {
             ReadWriteBuffer<float> buffer;
             public void Execute() { buffer[0] = Helper(); }
             float Helper() => ThreadIds.X;
         }",
    );
    let err = transpile(&source, "Blur", &ShaderConfig::default()).unwrap_err();
    let diagnostics = err.diagnostics().unwrap();
    let diagnostic = diagnostics.errors().next().unwrap();
    assert_eq!(diagnostic.id.code(), "KLN0110");
    assert!(diagnostic.message.contains("Blur.Helper"), "{diagnostic}");
    assert_eq!(diagnostic.span.map(|s| s.line), Some(4));
}
