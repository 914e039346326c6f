//! Compile, cache and run a real model with rustc.
//!
//! Each test returns early when no rustc is available.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use simforge_compile::{
    ArtifactPipeline, BuildFailure, CompilerInvoker, GeneratedSource, GenerationFailure,
    ProjectLayout, Provenance, RustcCompiler, SourceGenerator,
};
use simforge_loader::ContextArena;
use simforge_run::{
    OutputSink, ProcessLoader, PropertyObserver, RunController, RunReport, RunSettings,
    StartOutcome,
};

const MODEL_1: &str = include_str!("fixtures/model_1.rs");
const WAIT: Duration = Duration::from_secs(60);

struct Fixed(&'static str);

impl SourceGenerator for Fixed {
    fn generate(&self, model: &Path) -> Result<GeneratedSource, GenerationFailure> {
        if !model.is_file() {
            return Err(GenerationFailure {
                model: model.to_path_buf(),
                message: "model file missing".into(),
            });
        }
        Ok(GeneratedSource::with_names(self.0, "demo", "Model_1"))
    }
}

fn rustc_available() -> bool {
    let available = RustcCompiler::default().is_available();
    if !available {
        eprintln!("rustc not found, skipping");
    }
    available
}

struct Project {
    dir: tempfile::TempDir,
    model: PathBuf,
    layout: ProjectLayout,
    pipeline: ArtifactPipeline,
}

fn project(source: &'static str) -> Project {
    let dir = tempfile::tempdir().unwrap();
    let model = dir.path().join("model.xml");
    fs::write(&model, "<model name=\"Model_1\" package=\"demo\"/>").unwrap();
    let layout = ProjectLayout::new(dir.path());
    let invoker = CompilerInvoker::new(layout.clone(), Box::new(RustcCompiler::default()), vec![]);
    let pipeline = ArtifactPipeline::open(invoker, Box::new(Fixed(source))).unwrap();
    Project {
        dir,
        model,
        layout,
        pipeline,
    }
}

#[derive(Default)]
struct Replications(Mutex<Vec<String>>);

impl PropertyObserver for Replications {
    fn property_changed(&self, name: &str, _old: &str, new: &str) {
        if name == "replicationNumber" {
            self.0.lock().unwrap().push(new.to_string());
        }
    }
}

fn controller(p: &Project, settings: RunSettings) -> RunController {
    let arena = ContextArena::new(vec![], &p.layout.classes_dir, p.dir.path().join("scratch"));
    let loader = ProcessLoader::new().with_working_dir(p.dir.path());
    RunController::new(Arc::new(Mutex::new(arena)), Arc::new(loader))
        .with_settings(settings)
        .with_output_sink(OutputSink::null())
}

fn run_once(controller: &mut RunController) -> RunReport {
    match controller.start().unwrap() {
        StartOutcome::Started(handle) => handle.wait_timeout(WAIT).expect("run did not finish"),
        StartOutcome::Rejected => panic!("start was rejected"),
    }
}

#[test]
fn compile_cache_and_run_end_to_end() {
    if !rustc_available() {
        return;
    }
    let p = project(MODEL_1);

    let (descriptor, how) = p.pipeline.ensure(&p.model, false).unwrap();
    assert_eq!(how, Provenance::Compiled);
    assert_eq!(descriptor.package_name, "demo");
    assert!(descriptor.artifact_path.starts_with(&p.layout.classes_dir));
    assert!(p.layout.source_file("demo", "Model_1").is_file());

    let (cached, how) = p.pipeline.ensure(&p.model, false).unwrap();
    assert_eq!(how, Provenance::Cached);
    assert_eq!(cached, descriptor);

    let mut controller = controller(
        &p,
        RunSettings {
            replications: 2,
            stop_time: Some(5.0),
            verbose: true,
        },
    );
    let observer = Arc::new(Replications::default());
    controller.add_observer(observer.clone());
    controller.prepare(&descriptor).unwrap();
    let report = run_once(&mut controller);

    assert!(report.is_success(), "run failed: {:?}", report.outcome);
    assert_eq!(*observer.0.lock().unwrap(), vec!["1".to_string(), "2".to_string()]);
    assert_eq!(report.final_properties["replicationNumber"], "2");
    let report_path = report.report_path.expect("model writes a report");
    assert!(report_path.starts_with(p.dir.path()));
    let text = fs::read_to_string(report_path).unwrap();
    assert!(text.contains("runs=1"));
    assert!(text.contains("clock=10"));
}

#[test]
fn consecutive_runs_do_not_share_static_state() {
    if !rustc_available() {
        return;
    }
    let p = project(MODEL_1);
    let (descriptor, _) = p.pipeline.ensure(&p.model, false).unwrap();

    let mut controller = controller(&p, RunSettings::default());
    controller.prepare(&descriptor).unwrap();
    let first = run_once(&mut controller);
    let second = run_once(&mut controller);

    for report in [&first, &second] {
        assert!(report.is_success(), "run failed: {:?}", report.outcome);
        assert_eq!(report.final_properties["runCounter"], "1");
    }
}

#[test]
fn invalid_source_is_a_compile_failure_and_a_miss() {
    if !rustc_available() {
        return;
    }
    let p = project(
        "pub mod demo {\n    pub struct Model_1 {\n        count u32,\n    }\n}\nfn main() {}\n",
    );

    let err = p.pipeline.ensure(&p.model, false).unwrap_err();
    let BuildFailure::Compile(diagnostic) = err else {
        panic!("expected a compile failure, got {err:?}");
    };
    assert!(diagnostic.text().contains("error"));
    assert!(!diagnostic.headline().is_empty());
    assert!(p.pipeline.cache().is_miss(&p.model));

    assert!(matches!(
        p.pipeline.ensure(&p.model, false),
        Err(BuildFailure::KnownMiss(_))
    ));
}

#[test]
fn wiped_classes_directory_is_a_resolution_failure() {
    if !rustc_available() {
        return;
    }
    let p = project(MODEL_1);
    let (descriptor, _) = p.pipeline.ensure(&p.model, false).unwrap();
    fs::remove_dir_all(&p.layout.classes_dir).unwrap();

    let mut controller = controller(&p, RunSettings::default());
    assert!(matches!(
        controller.prepare(&descriptor),
        Err(simforge_run::RunError::Resolution(_))
    ));

    assert!(p.pipeline.invalidate(&p.model).unwrap());
    let (_, how) = p.pipeline.ensure(&p.model, false).unwrap();
    assert_eq!(how, Provenance::Compiled);
}
