//! simforge: compile, cache and run simulation models.
//!
//! A model file is turned into Rust source by an external generator,
//! compiled with `rustc` into an executable artifact, cached by content
//! fingerprint, and run in a fresh loading context per run.
//!
//! Pipeline: locate simforge.toml → ensure artifact (cache or compile) →
//!           prepare Run context → run on a worker thread → report.

mod cli;
mod config;
mod project;
mod verbose;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;
use simforge_cache::ArtifactDescriptor;
use simforge_compile::{BuildFailure, Provenance};
use simforge_run::{RunError, StartOutcome};
use walkdir::WalkDir;

use project::Project;
use verbose::{Timer, dprintln, vprintln};

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    verbose::init(cli.quiet, cli.verbose);
    verbose::init_tracing();

    match cli.command {
        cli::Command::Compile(ref args) => cmd_compile(args, cli.force),
        cli::Command::Run(ref args) => cmd_run(args, cli.force),
        cli::Command::Cache(ref cmd) => cmd_cache(cmd),
        cli::Command::Clean => cmd_clean(),
    }
}

// ===========================================================================
// Build
// ===========================================================================

/// Return the artifact for `model`, compiling it when the cache cannot.
///
/// Compiler output is printed in full before the error is returned.
fn ensure_artifact(project: &Project, model: &Path, force: bool) -> Result<ArtifactDescriptor> {
    let _t = Timer::start("ensure artifact");
    match project.pipeline.ensure(model, force) {
        Ok((descriptor, Provenance::Cached)) => {
            dprintln!("     Fresh {}", model.display());
            vprintln!("  fingerprint {}", descriptor.fingerprint);
            Ok(descriptor)
        }
        Ok((descriptor, Provenance::Compiled)) => {
            dprintln!(
                "  Compiled {} -> {}",
                model.display(),
                descriptor.artifact_path.display()
            );
            Ok(descriptor)
        }
        Err(BuildFailure::Compile(diagnostic)) => {
            eprintln!("{}", diagnostic.text().trim_end());
            bail!("{} failed to compile: {}", model.display(), diagnostic.headline());
        }
        Err(err @ BuildFailure::KnownMiss(_)) => {
            Err(anyhow::Error::new(err).context("use --force to retry the compile"))
        }
        Err(err) => Err(err.into()),
    }
}

fn cmd_compile(args: &cli::ModelArgs, force: bool) -> Result<()> {
    let project = Project::open()?;
    let model = project.model_path(&args.model)?;
    let descriptor = ensure_artifact(&project, &model, force)?;
    println!("{}", descriptor.artifact_path.display());
    Ok(())
}

// ===========================================================================
// Run
// ===========================================================================

fn cmd_run(args: &cli::RunArgs, force: bool) -> Result<()> {
    let project = Project::open()?;
    let model = project.model_path(&args.model)?;

    let mut settings = project.config.run_settings();
    if let Some(replications) = args.replications {
        if replications == 0 {
            bail!("--replications must be at least 1");
        }
        settings.replications = replications;
    }
    if args.stop_time.is_some() {
        settings.stop_time = args.stop_time;
    }
    settings.verbose |= args.model_verbose;

    let mut controller = project.controller(settings)?;
    let descriptor = ensure_artifact(&project, &model, force)?;

    match controller.prepare(&descriptor) {
        Ok(()) => {}
        Err(RunError::Resolution(err)) => {
            // The cached artifact vanished; forget it and rebuild once.
            tracing::warn!(%err, "cached artifact unavailable, recompiling");
            project.pipeline.invalidate(&model)?;
            let descriptor = ensure_artifact(&project, &model, false)?;
            controller.prepare(&descriptor)?;
        }
        Err(err) => return Err(err.into()),
    }

    dprintln!("   Running {}", model.display());
    let report = match controller.start()? {
        StartOutcome::Started(handle) => handle.wait().context("run ended without a report")?,
        StartOutcome::Rejected => bail!("a run is already in progress"),
    };

    for (name, value) in &report.final_properties {
        vprintln!("  {name} = {value}");
    }
    if let Err(fault) = &report.outcome {
        bail!("run {} failed after {:.1?}: {fault}", report.run_id, report.elapsed);
    }
    println!("Finished run {} in {:.1?}", report.run_id, report.elapsed);
    if let Some(path) = &report.report_path {
        println!("Report: {}", path.display());
    }
    Ok(())
}

// ===========================================================================
// Cache maintenance
// ===========================================================================

fn cmd_cache(cmd: &cli::CacheCommand) -> Result<()> {
    let project = Project::open()?;
    match cmd {
        cli::CacheCommand::List => cache_list(&project),
        cli::CacheCommand::Invalidate(args) => {
            let model = std::path::absolute(&args.model)
                .with_context(|| format!("failed to resolve {}", args.model.display()))?;
            if project.pipeline.invalidate(&model)? {
                println!("Invalidated {}", model.display());
            } else {
                println!("{} is not cached.", model.display());
            }
            Ok(())
        }
        cli::CacheCommand::Clear => {
            let removed = project.pipeline.cache().clear()?;
            println!("Removed {removed} cached artifact(s).");
            Ok(())
        }
        cli::CacheCommand::Gc => cache_gc(&project),
    }
}

fn cache_list(project: &Project) -> Result<()> {
    let cache = project.pipeline.cache();
    let mut empty = true;
    for entry in cache.entries() {
        empty = false;
        let state = if cache.is_stale(&entry.source_path) {
            "stale"
        } else {
            "fresh"
        };
        println!(
            "{state:>6}  {} -> {} [{}]",
            entry.source_path.display(),
            entry.artifact_path.display(),
            entry.package_name
        );
        vprintln!("        fingerprint {}", entry.fingerprint);
    }
    for miss in cache.misses() {
        empty = false;
        println!("  miss  {}", miss.source_path.display());
        vprintln!("        fingerprint {}", miss.fingerprint);
    }
    if empty {
        println!("Cache is empty.");
    }
    Ok(())
}

/// Delete executables under the classes directory that no entry owns.
fn cache_gc(project: &Project) -> Result<()> {
    let classes = &project.config.layout.classes_dir;
    if !classes.exists() {
        println!("Nothing to collect.");
        return Ok(());
    }

    let mut files: Vec<PathBuf> = Vec::new();
    for entry in WalkDir::new(classes) {
        let entry = entry.with_context(|| format!("failed to walk {}", classes.display()))?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }

    let orphans = project.pipeline.unreferenced(files);
    for path in &orphans {
        std::fs::remove_file(path)
            .with_context(|| format!("failed to remove {}", path.display()))?;
        vprintln!("  removed {}", path.display());
    }
    println!("Removed {} unreferenced artifact(s).", orphans.len());
    Ok(())
}

/// Remove the build directory, and a classes directory configured outside it.
fn cmd_clean() -> Result<()> {
    let root = config::find_project_root()?;
    let resolved = config::load_config(&root)?;
    let build_dir = resolved.build_dir();
    let classes_dir = &resolved.layout.classes_dir;

    let mut removed = false;
    for dir in [&build_dir, classes_dir] {
        if dir.exists() {
            std::fs::remove_dir_all(dir)
                .with_context(|| format!("failed to remove {}", dir.display()))?;
            println!("Removed {}", dir.display());
            removed = true;
        }
    }
    if !removed {
        println!("Nothing to clean.");
    }
    Ok(())
}
