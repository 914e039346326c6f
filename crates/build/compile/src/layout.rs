//! Where generated sources, compiled artifacts and the cache index live.

use std::env::consts::EXE_SUFFIX;
use std::path::{Path, PathBuf};

/// Directory layout of a simulation project.
///
/// Sources land at `<source_dir>/<package>/<Class>.rs`, executables at
/// `<classes_dir>/<package>/<Class>`.
#[derive(Debug, Clone)]
pub struct ProjectLayout {
    /// Project root.
    pub root: PathBuf,
    /// Generated source directory.
    pub source_dir: PathBuf,
    /// Compiled artifact directory. Also the Stage layer's search root.
    pub classes_dir: PathBuf,
    /// Cache index file.
    pub cache_index: PathBuf,
}

impl ProjectLayout {
    /// Default layout under `root`: `src/`, `build/classes/`,
    /// `build/artifact-cache.json`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            source_dir: root.join("src"),
            classes_dir: root.join("build").join("classes"),
            cache_index: root.join("build").join("artifact-cache.json"),
            root,
        }
    }

    /// Path the generated source for `package::class_name` is written to.
    pub fn source_file(&self, package: &str, class_name: &str) -> PathBuf {
        self.source_dir
            .join(package)
            .join(format!("{class_name}.rs"))
    }

    /// Path the executable for `package::class_name` is compiled to.
    pub fn artifact_file(&self, package: &str, class_name: &str) -> PathBuf {
        self.classes_dir
            .join(package)
            .join(format!("{class_name}{EXE_SUFFIX}"))
    }

    /// Name of `artifact` relative to the classes directory, e.g.
    /// `demo/Model_1`. `None` if it lives elsewhere.
    pub fn artifact_name(&self, artifact: &Path) -> Option<PathBuf> {
        artifact
            .strip_prefix(&self.classes_dir)
            .ok()
            .map(Path::to_path_buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_paths_from_names() {
        let layout = ProjectLayout::new("/proj");
        assert_eq!(
            layout.source_file("demo", "Model_1"),
            PathBuf::from("/proj/src/demo/Model_1.rs")
        );
        let artifact = layout.artifact_file("demo", "Model_1");
        assert!(artifact.starts_with("/proj/build/classes/demo"));
        assert_eq!(
            layout.artifact_name(&artifact),
            Some(PathBuf::from(format!("demo/Model_1{EXE_SUFFIX}")))
        );
        assert_eq!(layout.artifact_name(Path::new("/elsewhere/x")), None);
    }
}
