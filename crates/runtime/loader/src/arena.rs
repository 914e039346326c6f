//! Arena of loading contexts with explicit parent links.
//!
//! Three layers:
//!
//! - **Root** lives as long as the arena. It holds the runtime library
//!   paths and externally configured classpath entries.
//! - **Stage** is created lazily on top of Root and adds the compiled
//!   artifact directory. [`ContextArena::reset_stage`] retires it so the
//!   next run starts from a fresh one.
//! - **Run** is created per execution on top of Stage. It loads exactly
//!   one artifact into a private snapshot directory and is disposed once
//!   the execution has been torn down. Run contexts are never reused.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::error::ResolutionError;

/// Handle to a context in a [`ContextArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContextId(u64);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

/// Which layer of the hierarchy a context belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    /// Process-wide runtime and external libraries.
    Root,
    /// Compiled artifacts of the current working session.
    Stage,
    /// One execution.
    Run,
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Root => "root",
            Self::Stage => "stage",
            Self::Run => "run",
        })
    }
}

/// An artifact loaded into a Run context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedArtifact {
    /// The Run context holding it.
    pub context: ContextId,
    /// Name it was resolved by, e.g. `demo/Model_1`.
    pub name: PathBuf,
    /// Where it was found in the Stage layer.
    pub origin: PathBuf,
    /// The private copy this run executes.
    pub executable: PathBuf,
}

#[derive(Debug)]
struct ContextNode {
    parent: Option<ContextId>,
    layer: Layer,
    paths: Vec<PathBuf>,
    loaded: Option<LoadedArtifact>,
    snapshot_dir: Option<TempDir>,
}

/// Owner of every loading context of a session.
///
/// Shared between the controller and its monitor threads behind a mutex;
/// all operations are short and never block on I/O beyond the snapshot
/// copy.
#[derive(Debug)]
pub struct ContextArena {
    nodes: BTreeMap<ContextId, ContextNode>,
    next_id: u64,
    root: ContextId,
    stage: Option<ContextId>,
    current: ContextId,
    classes_dir: PathBuf,
    scratch_dir: PathBuf,
}

impl ContextArena {
    /// Create an arena whose Root holds `root_paths`.
    ///
    /// `classes_dir` is what the Stage layer adds; run snapshots are placed
    /// under `scratch_dir`.
    pub fn new(
        root_paths: Vec<PathBuf>,
        classes_dir: impl Into<PathBuf>,
        scratch_dir: impl Into<PathBuf>,
    ) -> Self {
        let mut arena = Self {
            nodes: BTreeMap::new(),
            next_id: 0,
            root: ContextId(0),
            stage: None,
            current: ContextId(0),
            classes_dir: classes_dir.into(),
            scratch_dir: scratch_dir.into(),
        };
        arena.root = arena.insert(None, Layer::Root, root_paths);
        arena.current = arena.root;
        arena
    }

    /// The Root context.
    pub fn root(&self) -> ContextId {
        self.root
    }

    /// The directory the Stage layer resolves artifacts from.
    pub fn classes_dir(&self) -> &Path {
        &self.classes_dir
    }

    /// Add a library path to Root, e.g. after a preference change.
    ///
    /// Visible to every context created afterwards and to live ones.
    pub fn add_path(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        let root = self.root;
        if let Some(node) = self.nodes.get_mut(&root) {
            if !node.paths.contains(&path) {
                tracing::debug!(path = %path.display(), "root classpath entry added");
                node.paths.push(path);
            }
        }
    }

    /// The current Stage context, creating it on first use.
    pub fn stage(&mut self) -> ContextId {
        if let Some(stage) = self.stage {
            return stage;
        }
        let stage = self.insert(Some(self.root), Layer::Stage, vec![self.classes_dir.clone()]);
        tracing::debug!(context = %stage, "stage context created");
        self.stage = Some(stage);
        stage
    }

    /// Retire the current Stage context; the next [`Self::stage`] call
    /// builds a fresh one. Run contexts still alive keep their old parent
    /// until they are disposed.
    pub fn reset_stage(&mut self) {
        let Some(stage) = self.stage.take() else {
            return;
        };
        if self.current == stage {
            self.current = self.root;
        }
        tracing::debug!(context = %stage, "stage context retired");
        self.collect(stage);
    }

    /// Create a fresh Run context on top of the current Stage.
    pub fn create_run(&mut self) -> ContextId {
        let stage = self.stage();
        let id = self.insert(Some(stage), Layer::Run, Vec::new());
        tracing::debug!(context = %id, parent = %stage, "run context created");
        id
    }

    /// Load the artifact `name` into Run context `run`.
    ///
    /// The artifact is resolved in the Stage layer only (no fallback to
    /// Root) and copied into a snapshot directory private to `run`. A Run
    /// context loads at most one artifact.
    pub fn load(&mut self, run: ContextId, name: &Path) -> Result<LoadedArtifact, ResolutionError> {
        let node = self.live_node(run)?;
        if node.layer != Layer::Run {
            return Err(ResolutionError::NotRunContext {
                id: run,
                layer: node.layer,
            });
        }
        if let Some(loaded) = &node.loaded {
            return Err(ResolutionError::AlreadyLoaded {
                id: run,
                name: loaded.name.clone(),
            });
        }
        let stage = node.parent.ok_or(ResolutionError::UnknownContext(run))?;
        let not_found = || ResolutionError::NotFound {
            name: name.to_path_buf(),
            layer: Layer::Stage,
        };
        if name.is_absolute() {
            return Err(not_found());
        }

        let origin = self
            .live_node(stage)?
            .paths
            .iter()
            .map(|dir| dir.join(name))
            .find(|candidate| candidate.is_file())
            .ok_or_else(not_found)?;

        let (snapshot_dir, executable) = snapshot(&origin, &self.scratch_dir, run)?;

        let loaded = LoadedArtifact {
            context: run,
            name: name.to_path_buf(),
            origin,
            executable,
        };
        if let Some(node) = self.nodes.get_mut(&run) {
            node.paths.push(snapshot_dir.path().to_path_buf());
            node.snapshot_dir = Some(snapshot_dir);
            node.loaded = Some(loaded.clone());
        }
        tracing::debug!(context = %run, artifact = %loaded.name.display(), "artifact loaded");
        Ok(loaded)
    }

    /// Find `name` walking from `ctx` towards Root, checking each context's
    /// own paths before deferring to its parent.
    pub fn resolve(&self, ctx: ContextId, name: &Path) -> Result<PathBuf, ResolutionError> {
        self.live_node(ctx)?;
        for dir in self.search_path(ctx) {
            let candidate = dir.join(name);
            if candidate.exists() {
                return Ok(candidate);
            }
        }
        Err(ResolutionError::NotFound {
            name: name.to_path_buf(),
            layer: self.layer(ctx).unwrap_or(Layer::Root),
        })
    }

    /// Every path visible from `ctx`, own paths first, Root last.
    pub fn search_path(&self, ctx: ContextId) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        let mut cursor = Some(ctx);
        while let Some(id) = cursor {
            let Some(node) = self.nodes.get(&id) else {
                break;
            };
            paths.extend(node.paths.iter().cloned());
            cursor = node.parent;
        }
        paths
    }

    /// Dispose Run context `ctx`, deleting its snapshot.
    ///
    /// A disposed context is gone: any later use, including a second
    /// dispose, reports it as unknown. Root and Stage contexts are not
    /// disposed this way; see [`Self::reset_stage`].
    pub fn dispose(&mut self, ctx: ContextId) -> Result<(), ResolutionError> {
        let node = self.live_node(ctx)?;
        if node.layer != Layer::Run {
            return Err(ResolutionError::NotRunContext {
                id: ctx,
                layer: node.layer,
            });
        }
        let Some(ContextNode {
            parent,
            snapshot_dir,
            ..
        }) = self.nodes.remove(&ctx)
        else {
            return Err(ResolutionError::UnknownContext(ctx));
        };
        if let Some(dir) = snapshot_dir {
            let path = dir.path().to_path_buf();
            match dir.close() {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(context = %ctx, dir = %path.display(), error = %e, "failed to remove run snapshot");
                }
            }
        }
        if self.current == ctx {
            self.current = self.stage.unwrap_or(self.root);
        }
        tracing::debug!(context = %ctx, "run context disposed");

        if let Some(parent) = parent {
            self.collect(parent);
        }
        Ok(())
    }

    /// Make `ctx` the current context of the controlling thread.
    pub fn enter(&mut self, ctx: ContextId) -> Result<(), ResolutionError> {
        self.live_node(ctx)?;
        self.current = ctx;
        Ok(())
    }

    /// Restore the current context to Stage and return it.
    pub fn restore_stage(&mut self) -> ContextId {
        let stage = self.stage();
        self.current = stage;
        stage
    }

    /// The current context of the controlling thread.
    pub fn current(&self) -> ContextId {
        self.current
    }

    /// Layer of `ctx`, if it exists.
    pub fn layer(&self, ctx: ContextId) -> Option<Layer> {
        self.nodes.get(&ctx).map(|n| n.layer)
    }

    /// The artifact loaded into `ctx`, if any.
    pub fn loaded(&self, ctx: ContextId) -> Option<&LoadedArtifact> {
        self.nodes.get(&ctx).and_then(|n| n.loaded.as_ref())
    }

    /// Number of Run contexts not yet disposed.
    pub fn live_runs(&self) -> usize {
        self.nodes.values().filter(|n| n.layer == Layer::Run).count()
    }

    fn insert(&mut self, parent: Option<ContextId>, layer: Layer, paths: Vec<PathBuf>) -> ContextId {
        let id = ContextId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(
            id,
            ContextNode {
                parent,
                layer,
                paths,
                loaded: None,
                snapshot_dir: None,
            },
        );
        id
    }

    fn live_node(&self, ctx: ContextId) -> Result<&ContextNode, ResolutionError> {
        self.nodes
            .get(&ctx)
            .ok_or(ResolutionError::UnknownContext(ctx))
    }

    /// Drop a retired Stage context once no Run context refers to it.
    fn collect(&mut self, stage: ContextId) {
        if self.stage == Some(stage) {
            return;
        }
        let referenced = self.nodes.values().any(|n| n.parent == Some(stage));
        if !referenced {
            self.nodes.remove(&stage);
        }
    }
}

/// Copy `origin` into a fresh directory under `scratch`, returning the
/// directory and the copy.
///
/// The directory name is unique per call, so arenas in different processes
/// can share one scratch directory. It is removed when the returned
/// [`TempDir`] is closed or dropped.
fn snapshot(
    origin: &Path,
    scratch: &Path,
    run: ContextId,
) -> Result<(TempDir, PathBuf), ResolutionError> {
    let wrap = |path: &Path, source| ResolutionError::Snapshot {
        path: path.to_path_buf(),
        source,
    };
    fs::create_dir_all(scratch).map_err(|e| wrap(scratch, e))?;
    let dir = tempfile::Builder::new()
        .prefix(&format!("run-{}-", run.0))
        .tempdir_in(scratch)
        .map_err(|e| wrap(scratch, e))?;
    let file_name = origin.file_name().unwrap_or(origin.as_os_str());
    let executable = dir.path().join(file_name);
    fs::copy(origin, &executable).map_err(|e| wrap(&executable, e))?;
    Ok((dir, executable))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        dir: tempfile::TempDir,
        classes: PathBuf,
        lib: PathBuf,
        arena: ContextArena,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let classes = dir.path().join("classes");
        let lib = dir.path().join("lib");
        fs::create_dir_all(classes.join("demo")).unwrap();
        fs::create_dir_all(&lib).unwrap();
        fs::write(classes.join("demo/Model_1"), b"model").unwrap();
        fs::write(lib.join("libsupport.rlib"), b"lib").unwrap();
        let arena = ContextArena::new(vec![lib.clone()], &classes, dir.path().join("scratch"));
        Fixture {
            dir,
            classes,
            lib,
            arena,
        }
    }

    #[test]
    fn run_contexts_are_layered_on_stage_and_root() {
        let mut f = fixture();
        let run = f.arena.create_run();
        let stage = f.arena.stage();
        assert_eq!(f.arena.layer(run), Some(Layer::Run));
        assert_eq!(f.arena.search_path(run), vec![f.classes.clone(), f.lib.clone()]);
        assert_eq!(f.arena.search_path(stage), vec![f.classes.clone(), f.lib.clone()]);
        assert_eq!(f.arena.search_path(f.arena.root()), vec![f.lib.clone()]);
    }

    #[test]
    fn each_run_gets_a_private_snapshot() {
        let mut f = fixture();
        let a = f.arena.create_run();
        let b = f.arena.create_run();
        assert_ne!(a, b);

        let la = f.arena.load(a, Path::new("demo/Model_1")).unwrap();
        let lb = f.arena.load(b, Path::new("demo/Model_1")).unwrap();
        assert_eq!(la.origin, lb.origin);
        assert_ne!(la.executable, lb.executable);
        assert_eq!(fs::read(&la.executable).unwrap(), b"model");
        assert_eq!(f.arena.search_path(a)[0], la.executable.parent().unwrap());
    }

    #[test]
    fn run_context_loads_once_and_is_not_reusable() {
        let mut f = fixture();
        let run = f.arena.create_run();
        f.arena.load(run, Path::new("demo/Model_1")).unwrap();
        assert!(matches!(
            f.arena.load(run, Path::new("demo/Model_1")),
            Err(ResolutionError::AlreadyLoaded { .. })
        ));

        f.arena.dispose(run).unwrap();
        assert!(matches!(
            f.arena.load(run, Path::new("demo/Model_1")),
            Err(ResolutionError::UnknownContext(_))
        ));
        assert!(f.arena.create_run() != run);
    }

    #[test]
    fn missing_artifact_does_not_fall_back_to_root() {
        let mut f = fixture();
        let run = f.arena.create_run();
        let err = f.arena.load(run, Path::new("libsupport.rlib")).unwrap_err();
        assert!(matches!(
            err,
            ResolutionError::NotFound {
                layer: Layer::Stage,
                ..
            }
        ));

        fs::remove_dir_all(&f.classes).unwrap();
        let err = f.arena.load(run, Path::new("demo/Model_1")).unwrap_err();
        assert!(matches!(err, ResolutionError::NotFound { .. }));
    }

    #[test]
    fn resolve_walks_child_first() {
        let mut f = fixture();
        fs::write(f.lib.join("shadowed"), b"root").unwrap();
        fs::write(f.classes.join("shadowed"), b"stage").unwrap();
        let run = f.arena.create_run();

        assert_eq!(f.arena.resolve(run, Path::new("shadowed")).unwrap(), f.classes.join("shadowed"));
        assert_eq!(
            f.arena.resolve(run, Path::new("libsupport.rlib")).unwrap(),
            f.lib.join("libsupport.rlib")
        );
        assert!(f.arena.resolve(f.arena.root(), Path::new("shadowed")).is_ok());
        assert!(f.arena.resolve(run, Path::new("nothing")).is_err());
    }

    #[test]
    fn dispose_removes_snapshot_and_restores_current() {
        let mut f = fixture();
        let run = f.arena.create_run();
        let loaded = f.arena.load(run, Path::new("demo/Model_1")).unwrap();
        f.arena.enter(run).unwrap();
        assert_eq!(f.arena.live_runs(), 1);

        f.arena.dispose(run).unwrap();
        assert!(!loaded.executable.exists());
        assert_eq!(f.arena.live_runs(), 0);
        assert_eq!(f.arena.layer(f.arena.current()), Some(Layer::Stage));
        assert!(f.arena.dispose(run).is_err());
        assert!(matches!(
            f.arena.dispose(f.arena.root()),
            Err(ResolutionError::NotRunContext { .. })
        ));
    }

    #[test]
    fn arenas_sharing_scratch_keep_separate_snapshots() {
        let mut f = fixture();
        let scratch = f.dir.path().join("scratch");
        let mut other = ContextArena::new(vec![f.lib.clone()], &f.classes, &scratch);

        let a = f.arena.create_run();
        let b = other.create_run();
        assert_eq!(a, b);
        let la = f.arena.load(a, Path::new("demo/Model_1")).unwrap();
        let lb = other.load(b, Path::new("demo/Model_1")).unwrap();
        assert_ne!(la.executable, lb.executable);
        assert!(la.executable.starts_with(&scratch) && lb.executable.starts_with(&scratch));

        f.arena.dispose(a).unwrap();
        assert!(!la.executable.exists());
        assert_eq!(fs::read(&lb.executable).unwrap(), b"model");

        drop(other);
        assert!(!lb.executable.exists());
    }

    #[test]
    fn reset_stage_builds_a_fresh_stage() {
        let mut f = fixture();
        let old_stage = f.arena.stage();
        let run = f.arena.create_run();

        f.arena.reset_stage();
        let new_stage = f.arena.stage();
        assert_ne!(old_stage, new_stage);
        // The old stage survives while a run still hangs off it.
        assert_eq!(f.arena.layer(old_stage), Some(Layer::Stage));
        assert_eq!(f.arena.search_path(run)[0], f.classes);

        f.arena.dispose(run).unwrap();
        assert_eq!(f.arena.layer(old_stage), None);
    }

    #[test]
    fn added_root_paths_are_visible_to_live_runs() {
        let mut f = fixture();
        let run = f.arena.create_run();
        f.arena.add_path("/opt/simlibs");
        f.arena.add_path("/opt/simlibs");
        let paths = f.arena.search_path(run);
        assert_eq!(paths.last().unwrap(), Path::new("/opt/simlibs"));
        assert_eq!(paths.len(), 3);
    }
}
