//! From model file to compiled executable.
//!
//! A [`SourceGenerator`] turns a model into Rust source, a
//! [`CompilerInvoker`] writes it into the project tree and compiles it
//! through a [`NativeCompiler`], and the [`ArtifactPipeline`] puts the
//! artifact cache in front of both.

mod compiler;
mod error;
mod generator;
mod layout;
mod pipeline;
mod rustc_cmd;
mod source;

pub use compiler::{
    COMPILE_SUCCESS, CompiledArtifact, CompilerInvoker, Diagnostic, NativeCompiler, RustcCompiler,
    RustcSettings,
};
pub use error::BuildFailure;
pub use generator::{CommandGenerator, GeneratedSource, GenerationFailure, SourceGenerator};
pub use layout::ProjectLayout;
pub use pipeline::{ArtifactPipeline, Provenance};
pub use source::{MalformedSource, SourceUnit};
