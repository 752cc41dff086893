//! Seam to the external HLSL compiler.

use std::borrow::Cow;

use thiserror::Error;

use crate::config::{CompileOptions, ShaderProfile};

/// Failure reported by an [`HlslCompiler`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CompilerFailure {
    /// The compiler could not run at all.
    #[error("compiler failed with HRESULT 0x{hresult:08X}: {message}")]
    Win32 { hresult: u32, message: String },
    /// The compiler rejected the source; `message` is its own output.
    #[error("{message}")]
    Compiler { message: String },
}

/// Compiles HLSL text into bytecode for `profile`.
pub trait HlslCompiler {
    fn compile(
        &self,
        hlsl: &str,
        entry_point: &str,
        profile: ShaderProfile,
        options: CompileOptions,
    ) -> Result<Vec<u8>, CompilerFailure>;
}

impl<C: HlslCompiler + ?Sized> HlslCompiler for &C {
    fn compile(
        &self,
        hlsl: &str,
        entry_point: &str,
        profile: ShaderProfile,
        options: CompileOptions,
    ) -> Result<Vec<u8>, CompilerFailure> {
        (**self).compile(hlsl, entry_point, profile, options)
    }
}

/// Shader bytecode: borrowed when embedded at build time, owned when compiled at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShaderBytecode {
    Precompiled(&'static [u8]),
    Compiled(Vec<u8>),
}

impl ShaderBytecode {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            ShaderBytecode::Precompiled(bytes) => bytes,
            ShaderBytecode::Compiled(bytes) => bytes,
        }
    }

    pub fn is_precompiled(&self) -> bool {
        matches!(self, ShaderBytecode::Precompiled(_))
    }

    pub fn into_bytes(self) -> Cow<'static, [u8]> {
        match self {
            ShaderBytecode::Precompiled(bytes) => Cow::Borrowed(bytes),
            ShaderBytecode::Compiled(bytes) => Cow::Owned(bytes),
        }
    }
}

impl AsRef<[u8]> for ShaderBytecode {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_render_their_cause() {
        let win32 = CompilerFailure::Win32 {
            hresult: 0x8007_000E,
            message: "out of memory".into(),
        };
        assert_eq!(
            win32.to_string(),
            "compiler failed with HRESULT 0x8007000E: out of memory"
        );
        let compiler = CompilerFailure::Compiler {
            message: "error X3004: undeclared identifier 'y'".into(),
        };
        assert_eq!(compiler.to_string(), "error X3004: undeclared identifier 'y'");
    }

    #[test]
    fn bytecode_borrows_embedded_blobs() {
        static BLOB: [u8; 4] = *b"DXBC";
        let embedded = ShaderBytecode::Precompiled(&BLOB);
        assert!(embedded.is_precompiled());
        assert!(matches!(embedded.into_bytes(), Cow::Borrowed(b"DXBC")));
        let compiled = ShaderBytecode::Compiled(vec![1, 2]);
        assert_eq!(compiled.as_bytes(), [1, 2]);
    }
}
