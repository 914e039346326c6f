//! Native compilation of generated source.
//!
//! [`CompilerInvoker`] owns the write-source / compile / check-output
//! sequence. The actual compiler sits behind [`NativeCompiler`], whose
//! contract is a single call returning diagnostic text: exactly
//! [`COMPILE_SUCCESS`] on success, anything else is the failure report.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::BuildFailure;
use crate::layout::ProjectLayout;
use crate::rustc_cmd::{RustcCommandBuilder, crate_name_for, extern_name_for};
use crate::source::SourceUnit;

/// Diagnostic returned by a [`NativeCompiler`] when compilation succeeded.
pub const COMPILE_SUCCESS: &str = "compilation succeeded";

/// A native compiler backend.
pub trait NativeCompiler: Send + Sync {
    /// Compile `source_path` into the executable `output_path`.
    ///
    /// Returns [`COMPILE_SUCCESS`] on success and the compiler's diagnostic
    /// text otherwise. Failing to launch the compiler is also reported as
    /// diagnostic text.
    fn compile(
        &self,
        package: &str,
        class_name: &str,
        source_path: &Path,
        output_path: &Path,
        classpath: &[PathBuf],
    ) -> String;

    /// Bytes identifying this compiler's version and configuration.
    ///
    /// Feeds the cache's environment hash, so a toolchain upgrade
    /// invalidates every cached artifact.
    fn identity(&self) -> Vec<u8>;
}

/// Settings for [`RustcCompiler`].
#[derive(Debug, Clone)]
pub struct RustcSettings {
    /// Compiler binary.
    pub binary: String,
    /// Rust edition passed as `--edition`.
    pub edition: String,
    /// `-Copt-level`.
    pub opt_level: u32,
    /// Extra arguments appended before the source file.
    pub extra_args: Vec<String>,
}

impl Default for RustcSettings {
    fn default() -> Self {
        Self {
            binary: "rustc".into(),
            edition: "2021".into(),
            opt_level: 1,
            extra_args: Vec::new(),
        }
    }
}

/// [`NativeCompiler`] that invokes `rustc` directly.
#[derive(Debug, Clone, Default)]
pub struct RustcCompiler {
    settings: RustcSettings,
}

impl RustcCompiler {
    /// Create a backend with the given settings.
    pub fn new(settings: RustcSettings) -> Self {
        Self { settings }
    }

    /// Returns `true` if the configured compiler binary can be executed.
    pub fn is_available(&self) -> bool {
        Command::new(&self.settings.binary)
            .arg("-V")
            .output()
            .is_ok_and(|out| out.status.success())
    }
}

impl NativeCompiler for RustcCompiler {
    fn compile(
        &self,
        package: &str,
        class_name: &str,
        source_path: &Path,
        output_path: &Path,
        classpath: &[PathBuf],
    ) -> String {
        let s = &self.settings;
        let mut cmd = RustcCommandBuilder::new(&s.binary);
        cmd.crate_name(&crate_name_for(package, class_name))
            .edition(&s.edition)
            .crate_type("bin")
            .opt_level(s.opt_level)
            .output(output_path);

        for entry in classpath {
            if entry.is_dir() {
                cmd.search_path(entry);
            } else if entry.extension().is_some_and(|ext| ext == "rlib") {
                if let Some(name) = extern_name_for(entry) {
                    cmd.add_extern(&name, entry);
                }
                if let Some(parent) = entry.parent() {
                    cmd.search_path(parent);
                }
            } else {
                tracing::debug!(entry = %entry.display(), "classpath entry skipped");
            }
        }
        for arg in &s.extra_args {
            cmd.arg(arg);
        }
        cmd.source(source_path);

        let output = match cmd.run() {
            Ok(output) => output,
            Err(e) => return format!("failed to run {}: {e}", s.binary),
        };
        if output.status.success() {
            return COMPILE_SUCCESS.to_string();
        }

        let mut text = String::from_utf8_lossy(&output.stderr).into_owned();
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            text.push_str(&stdout);
        }
        if text.trim().is_empty() {
            text = format!("{} exited with {}", s.binary, output.status);
        }
        text
    }

    fn identity(&self) -> Vec<u8> {
        let mut identity = Command::new(&self.settings.binary)
            .arg("-vV")
            .output()
            .map(|out| out.stdout)
            .unwrap_or_default();
        identity.extend_from_slice(self.settings.edition.as_bytes());
        identity.extend_from_slice(&self.settings.opt_level.to_le_bytes());
        for arg in &self.settings.extra_args {
            identity.extend_from_slice(arg.as_bytes());
        }
        identity
    }
}

/// Compiler output for a failed compile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    text: String,
}

impl Diagnostic {
    /// Wrap raw diagnostic text.
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Full diagnostic text, as the compiler printed it.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// The first error line, without the `error[Exxxx]:` prefix.
    ///
    /// Falls back to the first non-empty line when no error line exists.
    pub fn headline(&self) -> &str {
        for line in self.text.lines() {
            let line = line.trim();
            if line.starts_with("error[E") {
                if let Some(idx) = line.find("]: ") {
                    return &line[idx + 3..];
                }
            }
            if let Some(msg) = line.strip_prefix("error: ") {
                if !msg.starts_with("aborting due to") {
                    return msg;
                }
            }
        }
        self.text
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("compiler produced no output")
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.headline())
    }
}

/// An executable produced by [`CompilerInvoker::compile`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledArtifact {
    /// Package declared by the source.
    pub package_name: String,
    /// Public type declared by the source.
    pub class_name: String,
    /// Where the source was written.
    pub source_file: PathBuf,
    /// The compiled executable.
    pub artifact_path: PathBuf,
}

/// Writes generated source into the project tree and compiles it.
pub struct CompilerInvoker {
    layout: ProjectLayout,
    backend: Box<dyn NativeCompiler>,
    classpath: Vec<PathBuf>,
}

impl CompilerInvoker {
    /// Create an invoker compiling into `layout` against `classpath`.
    pub fn new(
        layout: ProjectLayout,
        backend: Box<dyn NativeCompiler>,
        classpath: Vec<PathBuf>,
    ) -> Self {
        Self {
            layout,
            backend,
            classpath,
        }
    }

    /// The project layout sources and artifacts are placed in.
    pub fn layout(&self) -> &ProjectLayout {
        &self.layout
    }

    /// Classpath passed to the compiler.
    pub fn classpath(&self) -> &[PathBuf] {
        &self.classpath
    }

    /// Identity of the backend, see [`NativeCompiler::identity`].
    pub fn compiler_identity(&self) -> Vec<u8> {
        self.backend.identity()
    }

    /// Compile `source_text`, which must declare `package_name::class_name`.
    ///
    /// Returns [`BuildFailure::MalformedSource`] if the declarations are
    /// missing or differ, [`BuildFailure::Compile`] if the compiler rejects
    /// the source. Neither touches the cache; the caller decides whether to
    /// store or record a miss.
    pub fn compile(
        &self,
        source_text: &str,
        class_name: &str,
        package_name: &str,
    ) -> Result<CompiledArtifact, BuildFailure> {
        let unit = SourceUnit::expect(source_text, package_name, class_name)?;

        let source_file = self.layout.source_file(&unit.package, &unit.class_name);
        let artifact_path = self.layout.artifact_file(&unit.package, &unit.class_name);
        write_source(&source_file, source_text)?;
        prepare_output(&artifact_path)?;

        tracing::info!(class = %unit.qualified_name(), "compiling");
        let diagnostic = self.backend.compile(
            &unit.package,
            &unit.class_name,
            &source_file,
            &artifact_path,
            &self.classpath,
        );

        if diagnostic != COMPILE_SUCCESS {
            let diagnostic = Diagnostic::new(diagnostic);
            tracing::error!(class = %unit.qualified_name(), error = %diagnostic, "compile failed");
            return Err(BuildFailure::Compile(diagnostic));
        }
        if !artifact_path.is_file() {
            return Err(BuildFailure::Compile(Diagnostic::new(format!(
                "compiler reported success but {} was not produced",
                artifact_path.display()
            ))));
        }

        Ok(CompiledArtifact {
            package_name: unit.package,
            class_name: unit.class_name,
            source_file,
            artifact_path,
        })
    }
}

fn write_source(path: &Path, text: &str) -> Result<(), BuildFailure> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| BuildFailure::io(parent, e))?;
    }
    fs::write(path, text).map_err(|e| BuildFailure::io(path, e))
}

/// Create the output directory and remove any previous executable, so a
/// failed compile cannot leave an old artifact looking fresh.
fn prepare_output(path: &Path) -> Result<(), BuildFailure> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| BuildFailure::io(parent, e))?;
    }
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(BuildFailure::io(path, e)),
    }
}
