//! Project configuration from `simforge.toml`.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use simforge_compile::{CommandGenerator, ProjectLayout, RustcSettings};
use simforge_run::{CLASSPATH_ENV, RunSettings};

/// Name of the project configuration file.
pub const CONFIG_FILE: &str = "simforge.toml";

/// Top-level `simforge.toml`.
#[derive(Debug, Default, Deserialize)]
pub struct SimforgeConfig {
    #[serde(default)]
    pub project: ProjectSection,
    #[serde(default)]
    pub paths: PathsSection,
    #[serde(default)]
    pub classpath: ClasspathSection,
    #[serde(default)]
    pub compiler: CompilerSection,
    pub generator: Option<GeneratorSection>,
    #[serde(default)]
    pub run: RunSection,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProjectSection {
    pub name: Option<String>,
}

/// Directories, relative to the project root.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PathsSection {
    pub source: PathBuf,
    pub classes: PathBuf,
    pub reports: PathBuf,
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            source: PathBuf::from("src"),
            classes: PathBuf::from("build/classes"),
            reports: PathBuf::from("reports"),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ClasspathSection {
    #[serde(default)]
    pub extra: Vec<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CompilerSection {
    pub binary: String,
    pub edition: String,
    #[serde(rename = "opt-level")]
    pub opt_level: u32,
    #[serde(rename = "extra-args")]
    pub extra_args: Vec<String>,
}

impl Default for CompilerSection {
    fn default() -> Self {
        let rustc = RustcSettings::default();
        Self {
            binary: rustc.binary,
            edition: rustc.edition,
            opt_level: rustc.opt_level,
            extra_args: rustc.extra_args,
        }
    }
}

/// External model-to-source translator.
#[derive(Debug, Deserialize)]
pub struct GeneratorSection {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Defaults for `simforge run`.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RunSection {
    pub replications: u32,
    #[serde(rename = "stop-time")]
    pub stop_time: Option<f64>,
    pub verbose: bool,
}

impl Default for RunSection {
    fn default() -> Self {
        let run = RunSettings::default();
        Self {
            replications: run.replications,
            stop_time: run.stop_time,
            verbose: run.verbose,
        }
    }
}

/// A loaded configuration with every path made absolute.
#[derive(Debug)]
pub struct ResolvedConfig {
    pub root: PathBuf,
    pub config: SimforgeConfig,
    pub layout: ProjectLayout,
    /// Compile-time classpath, also the Root layer's search path.
    pub classpath: Vec<PathBuf>,
    /// Working directory for runs; relative report paths land here.
    pub reports_dir: PathBuf,
}

impl ResolvedConfig {
    /// Scratch space for per-run artifact snapshots.
    pub fn runs_dir(&self) -> PathBuf {
        self.build_dir().join("runs")
    }

    /// Everything `simforge clean` removes.
    pub fn build_dir(&self) -> PathBuf {
        self.root.join("build")
    }

    pub fn rustc_settings(&self) -> RustcSettings {
        let c = &self.config.compiler;
        RustcSettings {
            binary: c.binary.clone(),
            edition: c.edition.clone(),
            opt_level: c.opt_level,
            extra_args: c.extra_args.clone(),
        }
    }

    pub fn generator(&self) -> Option<CommandGenerator> {
        self.config
            .generator
            .as_ref()
            .map(|g| CommandGenerator::new(&g.command, g.args.clone()))
    }

    pub fn run_settings(&self) -> RunSettings {
        let r = &self.config.run;
        RunSettings {
            verbose: r.verbose,
            stop_time: r.stop_time,
            replications: r.replications,
        }
    }
}

/// Find the project root by walking up from the current directory.
pub fn find_project_root() -> Result<PathBuf> {
    let cwd = std::env::current_dir().context("failed to get current directory")?;
    find_project_root_from(&cwd)
}

/// Find the nearest ancestor of `start` containing [`CONFIG_FILE`].
pub fn find_project_root_from(start: &Path) -> Result<PathBuf> {
    let mut dir = start.to_path_buf();
    loop {
        if dir.join(CONFIG_FILE).exists() {
            return Ok(dir);
        }
        if !dir.pop() {
            bail!("could not find {CONFIG_FILE} in any parent directory");
        }
    }
}

/// Parse the contents of a `simforge.toml`.
pub fn parse_config(contents: &str) -> Result<SimforgeConfig> {
    let config: SimforgeConfig =
        toml::from_str(contents).with_context(|| format!("failed to parse {CONFIG_FILE}"))?;
    if config.run.replications == 0 {
        bail!("[run] replications must be at least 1");
    }
    Ok(config)
}

/// Load and resolve the configuration of the project at `root`.
pub fn load_config(root: &Path) -> Result<ResolvedConfig> {
    let path = root.join(CONFIG_FILE);
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let config = parse_config(&contents)?;
    Ok(resolve(root, config, std::env::var_os(CLASSPATH_ENV)))
}

fn resolve(root: &Path, config: SimforgeConfig, env_classpath: Option<OsString>) -> ResolvedConfig {
    let layout = ProjectLayout {
        root: root.to_path_buf(),
        source_dir: root.join(&config.paths.source),
        classes_dir: root.join(&config.paths.classes),
        cache_index: root.join("build").join("artifact-cache.json"),
    };
    let reports_dir = root.join(&config.paths.reports);

    let mut classpath: Vec<PathBuf> = config.classpath.extra.iter().map(|p| root.join(p)).collect();
    if let Some(value) = env_classpath {
        for entry in std::env::split_paths(&value) {
            if !entry.as_os_str().is_empty() && !classpath.contains(&entry) {
                classpath.push(entry);
            }
        }
    }

    ResolvedConfig {
        root: root.to_path_buf(),
        config,
        layout,
        classpath,
        reports_dir,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = parse_config("").unwrap();
        assert!(config.generator.is_none());
        assert_eq!(config.paths.classes, PathBuf::from("build/classes"));
        assert_eq!(config.compiler.binary, "rustc");
        assert_eq!(config.run.replications, 1);
        assert_eq!(config.run.stop_time, None);
    }

    #[test]
    fn full_file() {
        let config = parse_config(
            r#"
            [project]
            name = "queues"

            [paths]
            source = "gen"
            reports = "out"

            [classpath]
            extra = ["lib", "/opt/simlib"]

            [compiler]
            edition = "2024"
            opt-level = 3
            extra-args = ["-Cdebuginfo=0"]

            [generator]
            command = "modelgen"
            args = ["--emit", "rust"]

            [run]
            replications = 10
            stop-time = 480.0
            "#,
        )
        .unwrap();

        assert_eq!(config.project.name.as_deref(), Some("queues"));
        assert_eq!(config.paths.source, PathBuf::from("gen"));
        assert_eq!(config.paths.classes, PathBuf::from("build/classes"));
        assert_eq!(config.compiler.opt_level, 3);
        assert_eq!(config.compiler.binary, "rustc");
        assert_eq!(config.compiler.extra_args, ["-Cdebuginfo=0"]);
        let generator = config.generator.as_ref().unwrap();
        assert_eq!(generator.command, "modelgen");
        assert_eq!(config.run.replications, 10);
        assert_eq!(config.run.stop_time, Some(480.0));
    }

    #[test]
    fn zero_replications_rejected() {
        assert!(parse_config("[run]\nreplications = 0\n").is_err());
    }

    #[test]
    fn bad_toml_names_the_file() {
        let err = parse_config("[run\n").unwrap_err();
        assert!(err.to_string().contains(CONFIG_FILE));
    }

    #[test]
    fn classpath_resolves_against_root_then_appends_env() {
        let root = Path::new("/proj");
        let config = parse_config("[classpath]\nextra = [\"lib\", \"/opt/simlib\"]\n").unwrap();
        let env = std::env::join_paths(["/opt/simlib", "/usr/share/sim"]).unwrap();
        let resolved = resolve(root, config, Some(env));

        assert_eq!(
            resolved.classpath,
            [
                PathBuf::from("/proj/lib"),
                PathBuf::from("/opt/simlib"),
                PathBuf::from("/usr/share/sim"),
            ]
        );
        assert_eq!(resolved.layout.classes_dir, PathBuf::from("/proj/build/classes"));
        assert_eq!(resolved.reports_dir, PathBuf::from("/proj/reports"));
        assert_eq!(resolved.runs_dir(), PathBuf::from("/proj/build/runs"));
    }

    #[test]
    fn settings_follow_sections() {
        let config =
            parse_config("[compiler]\nbinary = \"rustc-nightly\"\n[run]\nverbose = true\n").unwrap();
        let resolved = resolve(Path::new("/p"), config, None);
        assert_eq!(resolved.rustc_settings().binary, "rustc-nightly");
        assert!(resolved.run_settings().verbose);
        assert!(resolved.generator().is_none());
    }

    #[test]
    fn root_found_from_nested_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "").unwrap();
        let nested = dir.path().join("models").join("queues");
        std::fs::create_dir_all(&nested).unwrap();

        assert_eq!(find_project_root_from(&nested).unwrap(), dir.path());
    }
}
