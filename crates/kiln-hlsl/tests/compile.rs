use std::cell::RefCell;

use kiln_hlsl::{
    compile, transpile, CompileOptions, CompiledShader, CompilerFailure, DiagnosticId,
    HlslCompiler, ShaderConfig, ShaderProfile, ShaderSource, TranspiledShader,
};

/// Records every request and answers with a fixed result.
struct FakeCompiler {
    result: Result<Vec<u8>, CompilerFailure>,
    calls: RefCell<Vec<(String, ShaderProfile, CompileOptions)>>,
}

impl FakeCompiler {
    fn new(result: Result<Vec<u8>, CompilerFailure>) -> Self {
        Self {
            result,
            calls: RefCell::new(Vec::new()),
        }
    }
}

impl HlslCompiler for FakeCompiler {
    fn compile(
        &self,
        hlsl: &str,
        entry_point: &str,
        profile: ShaderProfile,
        options: CompileOptions,
    ) -> Result<Vec<u8>, CompilerFailure> {
        assert!(hlsl.contains(entry_point));
        self.calls
            .borrow_mut()
            .push((entry_point.to_string(), profile, options));
        self.result.clone()
    }
}

fn shader() -> TranspiledShader {
    transpile(
        &ShaderSource::new(
            "public struct Invert : IComputeShader {
                 ReadWriteTexture2D<Float4> image;
                 public void Execute() { image[ThreadIds.XY] = 1 - image[ThreadIds.XY]; }
             }",
        ),
        "Invert",
        &ShaderConfig::default(),
    )
    .unwrap_or_else(|err| panic!("{err}"))
}

#[test]
fn successful_compiles_own_their_bytecode() {
    let compiler = FakeCompiler::new(Ok(vec![0x44, 0x58, 0x42, 0x43]));
    let compiled = compile(&shader(), &compiler).unwrap();
    assert!(!compiled.bytecode.is_precompiled());
    assert_eq!(compiled.bytecode.as_bytes(), b"DXBC");

    let calls = compiler.calls.borrow();
    assert_eq!(calls.len(), 1);
    let (entry, profile, options) = &calls[0];
    assert_eq!(entry, "Execute");
    assert_eq!(*profile, ShaderProfile::Cs6_0);
    assert!(options.contains(CompileOptions::PACK_MATRIX_ROW_MAJOR));
}

#[test]
fn win32_failures_carry_the_result_code() {
    let compiler = FakeCompiler::new(Err(CompilerFailure::Win32 {
        hresult: 0x8007_0057,
        message: "The parameter is incorrect.".into(),
    }));
    let diagnostic = compile(&shader(), &compiler).unwrap_err();
    assert_eq!(diagnostic.id, DiagnosticId::CompilerWin32Failure);
    assert!(diagnostic.is_error());
    assert!(diagnostic.message.contains("Invert"), "{diagnostic}");
    assert!(diagnostic.message.contains("0x80070057"), "{diagnostic}");
    assert!(diagnostic.message.contains("The parameter is incorrect."), "{diagnostic}");
}

#[test]
fn compiler_rejections_carry_the_compiler_output() {
    let output = "shader.hlsl(12,5): error X3004: undeclared identifier 'foo'";
    let compiler = FakeCompiler::new(Err(CompilerFailure::Compiler {
        message: output.into(),
    }));
    let diagnostic = compile(&shader(), &compiler).unwrap_err();
    assert_eq!(diagnostic.id, DiagnosticId::CompilerError);
    assert!(diagnostic.message.ends_with(output), "{diagnostic}");
    assert_eq!(compiler.calls.borrow().len(), 1);
}

#[test]
fn precompiled_bytecode_is_borrowed() {
    static BLOB: [u8; 8] = *b"DXBCblob";
    let compiled = CompiledShader::precompiled(shader(), &BLOB);
    assert!(compiled.bytecode.is_precompiled());
    assert!(std::ptr::eq(compiled.bytecode.as_bytes(), &BLOB[..]));
}
