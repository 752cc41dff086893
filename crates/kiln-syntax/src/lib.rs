//! Front end for shader source files: lexer, parser and syntax tree.
//!
//! The accepted language is the C#-family subset shader authors write, widened so that
//! unsupported constructs still parse and can be reported by later passes instead of
//! failing as syntax errors. Inputs are treated as untrusted: source size and nesting
//! depth are bounded and nothing panics on malformed text.

#![forbid(unsafe_code)]

pub mod ast;
mod error;
mod lexer;
mod parser;
mod span;
pub mod token;
pub mod visit;

pub use crate::error::ParseError;
pub use crate::lexer::{tokenize, MAX_SOURCE_BYTES};
pub use crate::parser::{parse, parse_expr, parse_stmt, MAX_NESTING_DEPTH};
pub use crate::span::Span;
pub use crate::visit::Visit;
