//! Typed builder for rustc command invocations.

use std::ffi::OsStr;
use std::io;
use std::path::Path;
use std::process::{Command, Output, Stdio};

/// A typed builder for constructing rustc invocations.
pub struct RustcCommandBuilder {
    cmd: Command,
}

impl RustcCommandBuilder {
    /// Create a new builder using the given binary (e.g. "rustc").
    pub fn new(binary: &str) -> Self {
        let mut cmd = Command::new(binary);
        cmd.stdin(Stdio::null());
        Self { cmd }
    }

    /// Set the crate name (`--crate-name <name>`).
    pub fn crate_name(&mut self, name: &str) -> &mut Self {
        self.cmd.arg("--crate-name").arg(name);
        self
    }

    /// Set the Rust edition (`--edition=<ed>`).
    pub fn edition(&mut self, ed: &str) -> &mut Self {
        self.cmd.arg(format!("--edition={ed}"));
        self
    }

    /// Set the crate type (`--crate-type=<ty>`).
    pub fn crate_type(&mut self, ty: &str) -> &mut Self {
        self.cmd.arg(format!("--crate-type={ty}"));
        self
    }

    /// Set the optimization level (`-Copt-level=<level>`).
    pub fn opt_level(&mut self, level: u32) -> &mut Self {
        self.cmd.arg(format!("-Copt-level={level}"));
        self
    }

    /// Set the output file (`-o <file>`).
    pub fn output(&mut self, file: &Path) -> &mut Self {
        self.cmd.arg("-o").arg(file);
        self
    }

    /// Add an extern dependency with a path (`--extern <name>=<path>`).
    pub fn add_extern(&mut self, name: &str, path: &Path) -> &mut Self {
        self.cmd
            .arg("--extern")
            .arg(format!("{name}={}", path.display()));
        self
    }

    /// Add a library search path (`-L <dir>`).
    pub fn search_path(&mut self, dir: &Path) -> &mut Self {
        self.cmd.arg("-L").arg(dir);
        self
    }

    /// Set the source file to compile.
    pub fn source(&mut self, file: &Path) -> &mut Self {
        self.cmd.arg(file);
        self
    }

    /// Escape hatch for any arbitrary argument.
    pub fn arg(&mut self, arg: impl AsRef<OsStr>) -> &mut Self {
        self.cmd.arg(arg);
        self
    }

    /// Execute the command and return the output.
    pub fn run(&mut self) -> io::Result<Output> {
        tracing::trace!(command = ?self.cmd, "invoking rustc");
        self.cmd.output()
    }
}

/// Turn `package` and `class_name` into a valid crate name.
///
/// Lowercases and replaces anything outside `[a-z0-9_]` with `_`, e.g.
/// `demo` + `Model-1` becomes `demo_model_1`.
pub fn crate_name_for(package: &str, class_name: &str) -> String {
    let raw = format!("{package}_{class_name}");
    let mut name: String = raw
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' }
        })
        .collect();
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    name
}

/// Extern name of an rlib on the classpath: `libfoo-1a2b3c.rlib` -> `foo`.
pub fn extern_name_for(rlib: &Path) -> Option<String> {
    let stem = rlib.file_stem()?.to_str()?;
    let stem = stem.strip_prefix("lib").unwrap_or(stem);
    let name = stem.split('-').next()?;
    (!name.is_empty()).then(|| name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_names_are_sanitized() {
        assert_eq!(crate_name_for("demo", "Model_1"), "demo_model_1");
        assert_eq!(crate_name_for("demo", "Model-1"), "demo_model_1");
        assert_eq!(crate_name_for("9x", "A"), "_9x_a");
    }

    #[test]
    fn extern_names_strip_prefix_and_hash() {
        assert_eq!(
            extern_name_for(Path::new("/lib/libsimkit-0123abcd.rlib")).as_deref(),
            Some("simkit")
        );
        assert_eq!(
            extern_name_for(Path::new("queues.rlib")).as_deref(),
            Some("queues")
        );
    }
}
