use kiln_syntax::ast::*;
use kiln_syntax::{parse, parse_expr, parse_stmt, MAX_NESTING_DEPTH};
use pretty_assertions::assert_eq;

const SHADER: &str = r#"
using ComputeSharp;

namespace Samples;

[ThreadGroupSize(8, 8, 1)]
[GeneratedComputeShaderDescriptor]
public readonly partial struct MultiplyByTwo : IComputeShader
{
    public readonly ReadWriteBuffer<float> buffer;
    private readonly float scale, bias;

    public void Execute()
    {
        int i = ThreadIds.X;
        buffer[i] = buffer[i] * scale + bias;
    }
}
"#;

fn expr_kind(source: &str) -> ExprKind {
    parse_expr(source).unwrap().kind
}

#[test]
fn parses_shader_declaration() {
    let unit = parse(SHADER).unwrap();
    assert_eq!(unit.usings.len(), 1);
    assert_eq!(unit.types.len(), 1);

    let shader = &unit.types[0];
    assert_eq!(shader.name, "MultiplyByTwo");
    assert_eq!(shader.kind, TypeDeclKind::Struct);
    assert_eq!(shader.namespace.as_deref(), Some("Samples"));
    assert!(shader
        .modifiers
        .contains(Modifiers::PUBLIC | Modifiers::READONLY | Modifiers::PARTIAL));
    assert_eq!(shader.bases[0].simple_name(), Some("IComputeShader"));

    let attributes: Vec<_> = shader.attributes.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(attributes, ["ThreadGroupSize", "GeneratedComputeShaderDescriptor"]);
    assert_eq!(shader.attributes[0].args.len(), 3);

    let fields: Vec<_> = shader
        .fields()
        .flat_map(|f| f.declarators.iter().map(|d| d.name.as_str()))
        .collect();
    assert_eq!(fields, ["buffer", "scale", "bias"]);
    assert_eq!(shader.fields().next().unwrap().ty.to_string(), "ReadWriteBuffer<float>");

    let execute = shader.methods().next().unwrap();
    assert_eq!(execute.name, "Execute");
    assert!(execute.return_type.is_void());
    let Some(MethodBody::Block(body)) = &execute.body else {
        panic!("expected a block body");
    };
    assert_eq!(body.stmts.len(), 2);
    assert!(matches!(body.stmts[0].kind, StmtKind::Local(_)));
}

#[test]
fn explicit_interface_implementation() {
    let unit = parse("struct S : IComputeShader { void IComputeShader.Execute() { } }").unwrap();
    let method = unit.types[0].methods().next().unwrap();
    assert_eq!(method.name, "Execute");
    assert_eq!(
        method.explicit_interface.as_ref().and_then(|t| t.simple_name()),
        Some("IComputeShader")
    );
}

#[test]
fn nested_generic_arguments_close() {
    let unit = parse("struct S { ReadOnlyBuffer<Wrapper<float>> items; }").unwrap();
    let field = unit.types[0].fields().next().unwrap();
    assert_eq!(field.ty.to_string(), "ReadOnlyBuffer<Wrapper<float>>");
}

#[test]
fn binary_precedence() {
    let ExprKind::Binary { op, rhs, .. } = expr_kind("a + b * c") else {
        panic!("expected a binary expression");
    };
    assert_eq!(op, BinaryOp::Add);
    assert!(matches!(rhs.kind, ExprKind::Binary { op: BinaryOp::Mul, .. }));

    let ExprKind::Binary { op, .. } = expr_kind("a >> 2") else {
        panic!("expected a shift");
    };
    assert_eq!(op, BinaryOp::Shr);

    let ExprKind::Binary { op, .. } = expr_kind("a > b") else {
        panic!("expected a comparison");
    };
    assert_eq!(op, BinaryOp::Gt);
}

#[test]
fn compound_shift_assignment() {
    let ExprKind::Assign { op, .. } = expr_kind("x >>= 1") else {
        panic!("expected an assignment");
    };
    assert_eq!(op, AssignOp::Shr);
}

#[test]
fn casts_and_parenthesized_expressions() {
    assert!(matches!(expr_kind("(float)x"), ExprKind::Cast { .. }));
    assert!(matches!(expr_kind("(int)-x"), ExprKind::Cast { .. }));
    assert!(matches!(expr_kind("(Float4)0"), ExprKind::Cast { .. }));
    assert!(matches!(
        expr_kind("(x) + y"),
        ExprKind::Binary { op: BinaryOp::Add, .. }
    ));
    assert!(matches!(expr_kind("(a, b)"), ExprKind::Tuple(_)));
}

#[test]
fn generic_method_call_vs_comparison() {
    let ExprKind::Call { type_args, args, .. } = expr_kind("Hlsl.Convert<float>(x)") else {
        panic!("expected a call");
    };
    assert_eq!(type_args.len(), 1);
    assert_eq!(args.len(), 1);

    assert!(matches!(
        expr_kind("a < b"),
        ExprKind::Binary { op: BinaryOp::Lt, .. }
    ));
}

#[test]
fn literal_suffixes() {
    let ExprKind::Literal(Literal::Real { digits, suffix }) = expr_kind("1.5f") else {
        panic!("expected a real literal");
    };
    assert_eq!(digits, "1.5");
    assert_eq!(suffix, Some('f'));

    let ExprKind::Literal(Literal::Int { value, suffix, .. }) = expr_kind("0xFFu") else {
        panic!("expected an integer literal");
    };
    assert_eq!(value, 255);
    assert_eq!(suffix, "u");
}

#[test]
fn object_creation_forms() {
    assert!(matches!(
        expr_kind("new Float4(1, 2, 3, 4)"),
        ExprKind::New { ty: Some(_), .. }
    ));
    assert!(matches!(expr_kind("new()"), ExprKind::New { ty: None, .. }));
    let ExprKind::NewArray { sizes, .. } = expr_kind("new float[16]") else {
        panic!("expected an array creation");
    };
    assert_eq!(sizes.len(), 1);
    assert!(matches!(
        expr_kind("default(Float2)"),
        ExprKind::Default(Some(_))
    ));
}

#[test]
fn patterns() {
    let ExprKind::Is { pattern, .. } = expr_kind("x is > 1 and < 5") else {
        panic!("expected an is-pattern");
    };
    assert!(matches!(*pattern, Pattern::And(..)));

    let ExprKind::Is { pattern, .. } = expr_kind("x is not null") else {
        panic!("expected an is-pattern");
    };
    assert!(matches!(*pattern, Pattern::Not(_)));

    let ExprKind::Is { pattern, .. } = expr_kind("x is float f") else {
        panic!("expected an is-pattern");
    };
    assert!(matches!(*pattern, Pattern::Declaration { .. }));

    let ExprKind::Is { pattern, .. } = expr_kind("x is 3") else {
        panic!("expected an is-pattern");
    };
    assert!(matches!(*pattern, Pattern::Constant(_)));

    let ExprKind::Is { pattern, .. } = expr_kind("x is (> 1)") else {
        panic!("expected an is-pattern");
    };
    assert!(matches!(*pattern, Pattern::Relational { .. }));

    let ExprKind::Is { pattern, .. } = expr_kind("x is (1, 2)") else {
        panic!("expected an is-pattern");
    };
    let Pattern::Recursive { positional: Some(items), .. } = *pattern else {
        panic!("expected a positional pattern");
    };
    assert_eq!(items.len(), 2);
}

#[test]
fn switch_sections_with_guards() {
    let stmt = parse_stmt(
        "switch (x) { case 0: y = 1; break; case > 4 when y > 0: case 3: break; default: break; }",
    )
    .unwrap();
    let StmtKind::Switch { sections, .. } = stmt.kind else {
        panic!("expected a switch");
    };
    assert_eq!(sections.len(), 3);
    assert_eq!(sections[0].stmts.len(), 2);
    assert_eq!(sections[1].labels.len(), 2);
    assert!(matches!(
        sections[1].labels[0],
        SwitchLabel::Case { guard: Some(_), .. }
    ));
    assert!(matches!(sections[2].labels[0], SwitchLabel::Default));
}

#[test]
fn local_functions_and_declarations() {
    let stmt = parse_stmt("{ float Square(float v) => v * v; var y = Square(2); y++; }").unwrap();
    let StmtKind::Block(block) = stmt.kind else {
        panic!("expected a block");
    };
    assert!(matches!(block.stmts[0].kind, StmtKind::LocalFunction(_)));
    assert!(matches!(block.stmts[1].kind, StmtKind::Local(_)));
    assert!(matches!(block.stmts[2].kind, StmtKind::Expr(_)));
}

#[test]
fn for_loop_with_declaration() {
    let stmt = parse_stmt("for (int i = 0, j = 1; i < 4; i++, j--) { }").unwrap();
    let StmtKind::For { init, step, .. } = stmt.kind else {
        panic!("expected a for loop");
    };
    let Some(ForInit::Decl(decl)) = init else {
        panic!("expected a declaration initializer");
    };
    assert_eq!(decl.declarators.len(), 2);
    assert_eq!(step.len(), 2);
}

#[test]
fn unsupported_constructs_still_parse() {
    parse_stmt("try { x = 1; } catch (Exception e) { } finally { }").unwrap();
    parse_stmt("lock (gate) { }").unwrap();
    parse_stmt("fixed (float* p = values) { }").unwrap();
    parse_stmt("unsafe { int* p = &x; }").unwrap();
    assert!(matches!(expr_kind("typeof(float)"), ExprKind::TypeOf(_)));
    assert!(matches!(expr_kind("(1, 2)"), ExprKind::Tuple(_)));
    assert!(matches!(
        expr_kind("from v in values where v > 0 select v"),
        ExprKind::Query(_)
    ));
}

#[test]
fn lambdas_are_rejected() {
    let err = parse_expr("x => x").unwrap_err();
    insta::assert_snapshot!(err.to_string(), @"syntax error at 1:1: lambda expressions are not supported");
}

#[test]
fn unterminated_type_reports_location() {
    let err = parse("struct S {\n  int x;\n").unwrap_err();
    assert_eq!(err.span.line, 3);
}

#[test]
fn nesting_depth_is_bounded() {
    let depth = MAX_NESTING_DEPTH as usize + 10;
    let source = format!("{}{}", "{".repeat(depth), "}".repeat(depth));
    let result = std::thread::Builder::new()
        .stack_size(64 * 1024 * 1024)
        .spawn(move || parse_stmt(&source).map(|_| ()))
        .unwrap()
        .join()
        .unwrap();
    let err = result.unwrap_err();
    assert!(err.message.contains("nesting depth"), "{err}");
}
