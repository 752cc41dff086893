//! Compiles shader types written in a C#-family authoring language to HLSL.
//!
//! This crate re-exports the transpiler ([`kiln_hlsl`]) and its front end ([`syntax`]).

#![forbid(unsafe_code)]

pub use kiln_hlsl::*;
pub use kiln_syntax as syntax;
