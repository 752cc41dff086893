//! Pipeline entry point: source text to HLSL, binding table and model.

use std::path::{Path, PathBuf};

use kiln_syntax::ParseError;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::binding::{build_bindings, BindingTable};
use crate::compiler::{CompilerFailure, HlslCompiler, ShaderBytecode};
use crate::config::ShaderConfig;
use crate::diagnostics::{Diagnostic, DiagnosticId, Diagnostics};
use crate::emit::emit;
use crate::legality;
use crate::model::{build_model, ShaderTypeModel};
use crate::program::{Program, TypeIndex, ENTRY_POINT};
use crate::resolve::CallResolver;
use crate::rewrite::{rewrite, SpecialIds};

/// Shader source text and, when read from disk, where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderSource {
    pub text: String,
    pub path: Option<PathBuf>,
}

impl ShaderSource {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            path: None,
        }
    }

    pub fn with_path(text: impl Into<String>, path: impl AsRef<Path>) -> Self {
        Self {
            text: text.into(),
            path: Some(path.as_ref().to_path_buf()),
        }
    }

    fn display_path(&self) -> String {
        self.path
            .as_deref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<memory>".to_string())
    }
}

#[derive(Debug, Error)]
pub enum TranspileError {
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("no shader type named {0:?} in the source")]
    ShaderTypeNotFound(String),
    #[error("{0}")]
    Diagnostics(Diagnostics),
    #[error("invalid shader configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl TranspileError {
    /// Diagnostics carried by the error, if analysis got far enough to produce any.
    pub fn diagnostics(&self) -> Option<&Diagnostics> {
        match self {
            TranspileError::Diagnostics(diagnostics) => Some(diagnostics),
            _ => None,
        }
    }
}

/// Output of a successful transpilation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranspiledShader {
    pub type_name: String,
    pub hlsl: String,
    pub model: ShaderTypeModel,
    pub bindings: BindingTable,
    pub special_ids: SpecialIds,
    /// Warnings; a successful run has no errors.
    pub diagnostics: Diagnostics,
    pub entry_point: &'static str,
}

/// Transpiles the shader type `type_name` declared in `source`.
///
/// Legality and model diagnostics are collected together; the run stops after analysis
/// when any of them is an error.
pub fn transpile(
    source: &ShaderSource,
    type_name: &str,
    config: &ShaderConfig,
) -> Result<TranspiledShader, TranspileError> {
    let unit = kiln_syntax::parse(&source.text)?;
    let decl = TypeIndex::build(&unit)
        .find(type_name)
        .map(|entry| entry.decl)
        .ok_or_else(|| TranspileError::ShaderTypeNotFound(type_name.to_string()))?;
    debug!(path = %source.display_path(), shader = type_name, "parsed shader source");

    let mut diagnostics = Diagnostics::new();
    let Some(program) = Program::new(&unit, decl, &mut diagnostics) else {
        return Err(TranspileError::Diagnostics(diagnostics));
    };
    let resolver = CallResolver::new(&program);

    diagnostics.extend(legality::analyze(&resolver));
    let model = build_model(&resolver, config, &mut diagnostics);
    diagnostics.sort();
    debug!(
        shader = type_name,
        errors = diagnostics.errors().count(),
        warnings = diagnostics.warnings().count(),
        "analyzed shader"
    );
    if diagnostics.has_errors() {
        return Err(TranspileError::Diagnostics(diagnostics));
    }
    let Some(entry) = program.entry else {
        return Err(TranspileError::Diagnostics(diagnostics));
    };

    let body = rewrite(&resolver, entry, &model, &mut diagnostics);
    if diagnostics.has_errors() {
        diagnostics.sort();
        return Err(TranspileError::Diagnostics(diagnostics));
    }
    let bindings = build_bindings(&model);
    let hlsl = emit(&program, &model, &body, &bindings);
    debug!(
        shader = type_name,
        resolved_calls = resolver.memoized(),
        "transpiled shader"
    );

    Ok(TranspiledShader {
        type_name: program.shader.name.clone(),
        hlsl,
        model,
        bindings,
        special_ids: body.special_ids,
        diagnostics,
        entry_point: ENTRY_POINT,
    })
}

/// A transpiled shader together with its bytecode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledShader {
    pub shader: TranspiledShader,
    pub bytecode: ShaderBytecode,
}

impl CompiledShader {
    /// Pairs `shader` with bytecode embedded at build time.
    pub fn precompiled(shader: TranspiledShader, bytecode: &'static [u8]) -> Self {
        Self {
            shader,
            bytecode: ShaderBytecode::Precompiled(bytecode),
        }
    }
}

/// Compiles `shader` with `compiler`, using the profile and options of its model.
pub fn compile(
    shader: &TranspiledShader,
    compiler: &dyn HlslCompiler,
) -> Result<CompiledShader, Diagnostic> {
    let model = &shader.model;
    match compiler.compile(
        &shader.hlsl,
        shader.entry_point,
        model.profile,
        model.compile_options,
    ) {
        Ok(bytes) => {
            debug!(
                shader = %shader.type_name,
                profile = %model.profile,
                bytes = bytes.len(),
                "compiled shader"
            );
            Ok(CompiledShader {
                shader: shader.clone(),
                bytecode: ShaderBytecode::Compiled(bytes),
            })
        }
        Err(CompilerFailure::Win32 { hresult, message }) => {
            warn!(shader = %shader.type_name, hresult, %message, "compiler could not run");
            let hresult = format!("{hresult:08X}");
            Err(Diagnostic::new(
                DiagnosticId::CompilerWin32Failure,
                None,
                &[&shader.type_name, &hresult, &message],
            ))
        }
        Err(CompilerFailure::Compiler { message }) => {
            warn!(shader = %shader.type_name, %message, "compiler rejected shader");
            Err(Diagnostic::new(
                DiagnosticId::CompilerError,
                None,
                &[&shader.type_name, &message],
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_type_is_an_error() {
        let source = ShaderSource::new("struct A : IComputeShader { void Execute() {} }");
        let err = transpile(&source, "B", &ShaderConfig::default()).unwrap_err();
        assert!(matches!(err, TranspileError::ShaderTypeNotFound(name) if name == "B"));
    }

    #[test]
    fn syntax_errors_stop_the_pipeline() {
        let source = ShaderSource::new("struct A : IComputeShader { void Execute( }");
        let err = transpile(&source, "A", &ShaderConfig::default()).unwrap_err();
        assert!(matches!(err, TranspileError::Parse(_)));
        assert!(err.diagnostics().is_none());
    }

    #[test]
    fn paths_are_displayed() {
        assert_eq!(ShaderSource::new("").display_path(), "<memory>");
        let source = ShaderSource::with_path("", "shaders/blur.cs");
        assert_eq!(source.display_path(), "shaders/blur.cs");
    }
}
