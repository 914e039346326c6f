//! Wiring a configured project to the build pipeline and run controller.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, bail};
use simforge_compile::{
    ArtifactPipeline, CompilerInvoker, GeneratedSource, GenerationFailure, RustcCompiler,
    SourceGenerator,
};
use simforge_loader::ContextArena;
use simforge_run::{
    OutputSink, ProcessLoader, PropertyObserver, RunController, RunSettings,
};

use crate::config::{self, CONFIG_FILE, ResolvedConfig};
use crate::verbose::vprintln;

/// A project opened from `simforge.toml`.
pub struct Project {
    pub config: ResolvedConfig,
    pub pipeline: ArtifactPipeline,
}

impl Project {
    /// Open the project enclosing the current directory.
    pub fn open() -> Result<Self> {
        let root = config::find_project_root()?;
        let config = config::load_config(&root)?;
        Self::from_config(config)
    }

    pub fn from_config(config: ResolvedConfig) -> Result<Self> {
        let generator: Box<dyn SourceGenerator> = match config.generator() {
            Some(generator) => Box::new(generator),
            None => Box::new(Unconfigured),
        };
        // Generated code links against the Root classpath and the Stage's
        // own classes.
        let mut classpath = config.classpath.clone();
        classpath.push(config.layout.classes_dir.clone());
        let compiler = RustcCompiler::new(config.rustc_settings());
        let invoker = CompilerInvoker::new(config.layout.clone(), Box::new(compiler), classpath);
        let pipeline = ArtifactPipeline::open(invoker, generator).with_context(|| {
            format!(
                "failed to open artifact cache {}",
                config.layout.cache_index.display()
            )
        })?;
        Ok(Self { config, pipeline })
    }

    /// Absolute path of an existing model file.
    pub fn model_path(&self, model: &Path) -> Result<PathBuf> {
        if !model.is_file() {
            bail!("model file not found: {}", model.display());
        }
        std::path::absolute(model)
            .with_context(|| format!("failed to resolve {}", model.display()))
    }

    /// A controller whose Root layer sees the configured classpath and whose
    /// Stage layer sees the classes directory.
    pub fn controller(&self, settings: RunSettings) -> Result<RunController> {
        let reports = &self.config.reports_dir;
        std::fs::create_dir_all(reports)
            .with_context(|| format!("failed to create {}", reports.display()))?;

        let arena = ContextArena::new(
            self.root_paths(),
            &self.config.layout.classes_dir,
            self.config.runs_dir(),
        );
        let loader = ProcessLoader::new().with_working_dir(reports);
        let mut controller = RunController::new(Arc::new(Mutex::new(arena)), Arc::new(loader))
            .with_settings(settings)
            .with_output_sink(OutputSink::stdout());
        controller.add_observer(Arc::new(PrintChanges));
        Ok(controller)
    }

    /// The tool's own directory followed by the external classpath.
    fn root_paths(&self) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Some(dir) = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
        {
            paths.push(dir);
        }
        paths.extend(self.config.classpath.iter().cloned());
        paths
    }
}

/// Generator used when `simforge.toml` has no `[generator]` section.
struct Unconfigured;

impl SourceGenerator for Unconfigured {
    fn generate(&self, model: &Path) -> Result<GeneratedSource, GenerationFailure> {
        Err(GenerationFailure {
            model: model.to_path_buf(),
            message: format!("no [generator] command configured in {CONFIG_FILE}"),
        })
    }
}

/// Echoes property changes in verbose mode.
struct PrintChanges;

impl PropertyObserver for PrintChanges {
    fn property_changed(&self, name: &str, old: &str, new: &str) {
        vprintln!("  {name}: {old} -> {new}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project(toml: &str) -> (tempfile::TempDir, Project) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), toml).unwrap();
        let config = config::load_config(dir.path()).unwrap();
        let project = Project::from_config(config).unwrap();
        (dir, project)
    }

    #[test]
    fn missing_generator_fails_generation() {
        let (dir, project) = project("");
        let model = dir.path().join("m.xml");
        std::fs::write(&model, "<model/>").unwrap();

        let err = project.pipeline.ensure(&model, false).unwrap_err();
        assert!(err.to_string().contains("[generator]"), "{err}");
        assert!(!project.pipeline.cache().is_miss(&model));
    }

    #[test]
    fn model_path_requires_an_existing_file() {
        let (dir, project) = project("");
        assert!(project.model_path(&dir.path().join("absent.xml")).is_err());

        let model = dir.path().join("m.xml");
        std::fs::write(&model, "").unwrap();
        assert!(project.model_path(&model).unwrap().is_absolute());
    }

    #[test]
    fn controller_creates_reports_dir() {
        let (dir, project) = project("[paths]\nreports = \"out/reports\"\n");
        let controller = project.controller(RunSettings::default()).unwrap();
        assert!(dir.path().join("out/reports").is_dir());
        assert!(!controller.is_active());
    }
}
