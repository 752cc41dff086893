//! Shader transpiler: turns shader types written in the C#-family authoring language into
//! HLSL source plus the metadata the dispatch layer needs to run them.
//!
//! The pipeline has five stages:
//!
//! - [`legality`] rejects constructs that have no GPU equivalent
//! - [`model`] classifies fields, packs the constant buffer and validates the
//!   [`ShaderConfig`]
//! - [`rewrite`] lowers the entry point and every reachable helper into HLSL statements
//! - [`emit`] prints the complete HLSL translation unit
//! - [`binding`] assigns registers and positional slots to resource fields
//!
//! [`transpile`] runs all of them; [`compile`] hands the result to an [`HlslCompiler`].
//! Analysis diagnostics are batched; compilation fails on the first error.

#![forbid(unsafe_code)]

pub mod binding;
pub mod cache;
pub mod compiler;
pub mod config;
pub mod diagnostics;
pub mod emit;
pub mod execute;
pub mod layout;
pub mod legality;
pub mod limits;
pub mod model;
pub mod program;
pub mod resolve;
pub mod rewrite;
pub mod scope;
pub mod translate;
pub mod types;

pub use crate::binding::{build_bindings, Binding, BindingTable, Register, RegisterClass, SlotKind};
pub use crate::cache::{CacheKey, CacheSource, ShaderCache, SharedShaderCache};
pub use crate::compiler::{CompilerFailure, HlslCompiler, ShaderBytecode};
pub use crate::config::{
    BufferPrecision, ChannelDepth, CompileOptions, DispatchAxis, ShaderConfig, ShaderProfile,
};
pub use crate::diagnostics::{Diagnostic, DiagnosticId, Diagnostics, Severity};
pub use crate::layout::{ConstantBufferLayout, ConstantBufferWriter, LayoutError};
pub use crate::model::{FieldRole, ShaderTypeModel};
pub use crate::program::ShaderKind;
pub use crate::rewrite::SpecialIds;
pub use crate::translate::{
    compile, transpile, CompiledShader, ShaderSource, TranspileError, TranspiledShader,
};
