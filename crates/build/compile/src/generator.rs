//! Source generator contract.
//!
//! Translating a model into source is someone else's job; this crate only
//! consumes the generated text and the names it declares.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use thiserror::Error;

use crate::source::{MalformedSource, SourceUnit};

/// Output of a [`SourceGenerator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedSource {
    /// The generated program.
    pub text: String,
    /// Public type name, when the generator reports it.
    pub class_name: Option<String>,
    /// Package name, when the generator reports it.
    pub package_name: Option<String>,
}

impl GeneratedSource {
    /// Source whose names are recovered from the text itself.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            class_name: None,
            package_name: None,
        }
    }

    /// Source with the names the generator says it declared.
    pub fn with_names(
        text: impl Into<String>,
        package_name: impl Into<String>,
        class_name: impl Into<String>,
    ) -> Self {
        Self {
            text: text.into(),
            class_name: Some(class_name.into()),
            package_name: Some(package_name.into()),
        }
    }

    /// Package and type declared by the text, checked against any names
    /// the generator reported.
    pub fn unit(&self) -> Result<SourceUnit, MalformedSource> {
        match (&self.package_name, &self.class_name) {
            (Some(package), Some(class)) => SourceUnit::expect(&self.text, package, class),
            _ => SourceUnit::parse(&self.text),
        }
    }
}

/// The model could not be translated into source.
#[derive(Debug, Clone, Error)]
#[error("source generation failed for {}: {message}", model.display())]
pub struct GenerationFailure {
    /// The model file.
    pub model: PathBuf,
    /// What went wrong, as reported by the generator.
    pub message: String,
}

/// Translates a model file into source.
pub trait SourceGenerator: Send + Sync {
    /// Generate source for `model`.
    fn generate(&self, model: &Path) -> Result<GeneratedSource, GenerationFailure>;
}

/// [`SourceGenerator`] that runs an external command.
///
/// The command is invoked as `<program> <args...> <model>` and must print
/// the generated source on stdout. A non-zero exit is a generation failure
/// carrying its stderr.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    program: String,
    args: Vec<String>,
}

impl CommandGenerator {
    /// Create a generator running `program` with leading `args`.
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl SourceGenerator for CommandGenerator {
    fn generate(&self, model: &Path) -> Result<GeneratedSource, GenerationFailure> {
        let fail = |message: String| GenerationFailure {
            model: model.to_path_buf(),
            message,
        };

        tracing::debug!(program = %self.program, model = %model.display(), "generating source");
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(model)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| fail(format!("failed to run {}: {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = stderr.trim();
            return Err(fail(if stderr.is_empty() {
                format!("{} exited with {}", self.program, output.status)
            } else {
                stderr.to_string()
            }));
        }

        let text = String::from_utf8(output.stdout)
            .map_err(|_| fail("generator output is not valid UTF-8".into()))?;
        if text.trim().is_empty() {
            return Err(fail("generator produced no source".into()));
        }
        Ok(GeneratedSource::new(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reported_names_must_match_text() {
        let text = "pub mod demo {\n    pub struct Model_1;\n}\n";
        assert!(GeneratedSource::new(text).unit().is_ok());
        assert!(GeneratedSource::with_names(text, "demo", "Model_1").unit().is_ok());
        assert!(matches!(
            GeneratedSource::with_names(text, "other", "Model_1").unit(),
            Err(MalformedSource::Mismatch { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn command_generator_reads_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("model.xml");
        std::fs::write(&model, "pub mod demo {\n    pub struct Model_1;\n}\n").unwrap();

        let generator = CommandGenerator::new("cat", vec![]);
        let source = generator.generate(&model).unwrap();
        assert_eq!(source.unit().unwrap().class_name, "Model_1");
    }

    #[cfg(unix)]
    #[test]
    fn command_generator_failure_carries_stderr() {
        let generator = CommandGenerator::new("sh", vec!["-c".into(), "echo bad model >&2; exit 3".into()]);
        let err = generator.generate(Path::new("m.xml")).unwrap_err();
        assert_eq!(err.message, "bad model");
        assert_eq!(err.model, PathBuf::from("m.xml"));
    }

    #[test]
    fn missing_program_is_a_generation_failure() {
        let generator = CommandGenerator::new("simforge-no-such-generator", vec![]);
        let err = generator.generate(Path::new("m.xml")).unwrap_err();
        assert!(err.message.contains("failed to run"));
    }
}
