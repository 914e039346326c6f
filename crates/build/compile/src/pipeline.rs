//! Compile-through-cache: model file in, ready artifact out.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use simforge_cache::{ArtifactCache, ArtifactDescriptor, environment_hash};

use crate::compiler::CompilerInvoker;
use crate::error::BuildFailure;
use crate::generator::SourceGenerator;

/// Where a ready artifact came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    /// Served from the cache.
    Cached,
    /// Generated and compiled for this request.
    Compiled,
}

/// Produces runnable artifacts for model files, compiling only when the
/// cache has nothing valid.
///
/// Requests are blocking. Callers that must stay responsive run them on a
/// background thread.
pub struct ArtifactPipeline {
    cache: Mutex<ArtifactCache>,
    generator: Box<dyn SourceGenerator>,
    invoker: CompilerInvoker,
}

impl ArtifactPipeline {
    /// Open the project's cache and assemble the pipeline.
    ///
    /// The cache environment is derived from the compiler identity and the
    /// invoker's classpath, so changing either discards stale artifacts.
    pub fn open(
        invoker: CompilerInvoker,
        generator: Box<dyn SourceGenerator>,
    ) -> Result<Self, BuildFailure> {
        let environment = environment_hash(&invoker.compiler_identity(), invoker.classpath());
        let cache = ArtifactCache::open(&invoker.layout().cache_index, &environment)?;
        Ok(Self::with_cache(cache, invoker, generator))
    }

    /// Assemble the pipeline around an already opened cache.
    pub fn with_cache(
        cache: ArtifactCache,
        invoker: CompilerInvoker,
        generator: Box<dyn SourceGenerator>,
    ) -> Self {
        Self {
            cache: Mutex::new(cache),
            generator,
            invoker,
        }
    }

    /// The invoker artifacts are compiled with.
    pub fn invoker(&self) -> &CompilerInvoker {
        &self.invoker
    }

    /// Exclusive access to the cache, for inspection and maintenance.
    pub fn cache(&self) -> MutexGuard<'_, ArtifactCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return a runnable artifact for `model`.
    ///
    /// A valid cache entry is returned as is. A model recorded as a miss
    /// whose content is unchanged fails with [`BuildFailure::KnownMiss`]
    /// without invoking the compiler. Otherwise the model is generated and
    /// compiled; success is stored, a compiler rejection is recorded as a
    /// miss. `force` skips both the lookup and the miss short-circuit.
    pub fn ensure(
        &self,
        model: &Path,
        force: bool,
    ) -> Result<(ArtifactDescriptor, Provenance), BuildFailure> {
        if !force {
            let mut cache = self.cache();
            if let Some(descriptor) = cache.lookup(model) {
                return Ok((descriptor, Provenance::Cached));
            }
            if cache.is_miss(model) {
                tracing::debug!(model = %model.display(), "known miss, skipping compile");
                return Err(BuildFailure::KnownMiss(model.to_path_buf()));
            }
        }

        let generated = self.generator.generate(model)?;
        let unit = generated.unit()?;
        self.check_owner(model, &unit.package, &unit.class_name)?;

        let compiled = match self
            .invoker
            .compile(&generated.text, &unit.class_name, &unit.package)
        {
            Ok(compiled) => compiled,
            Err(err @ BuildFailure::Compile(_)) => {
                self.cache().record_miss(model)?;
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        let descriptor =
            self.cache()
                .store(model, &compiled.artifact_path, &compiled.package_name)?;
        tracing::info!(
            model = %model.display(),
            artifact = %descriptor.artifact_path.display(),
            "artifact ready"
        );
        Ok((descriptor, Provenance::Compiled))
    }

    /// Fail if a different model's entry already holds the artifact path
    /// of `package::class_name`; compiling would overwrite its executable.
    fn check_owner(&self, model: &Path, package: &str, class_name: &str) -> Result<(), BuildFailure> {
        let target = self.invoker.layout().artifact_file(package, class_name);
        let target = std::path::absolute(&target).unwrap_or(target);
        let model = std::path::absolute(model).unwrap_or_else(|_| model.to_path_buf());
        let cache = self.cache();
        let Some(owner) = cache
            .entries()
            .find(|e| e.artifact_path == target && e.source_path != model)
        else {
            return Ok(());
        };
        tracing::warn!(
            model = %model.display(),
            owner = %owner.source_path.display(),
            "generated class already owned by another model"
        );
        Err(BuildFailure::ClassConflict {
            model,
            class: format!("{package}::{class_name}"),
            owner: owner.source_path.clone(),
        })
    }

    /// Drop whatever the cache knows about `model`. Used when a cached
    /// artifact could not be resolved at run time.
    pub fn invalidate(&self, model: &Path) -> Result<bool, BuildFailure> {
        Ok(self.cache().invalidate(model)?)
    }

    /// Executables under the classes directory that no cache entry
    /// references.
    pub fn unreferenced(&self, candidates: impl IntoIterator<Item = PathBuf>) -> Vec<PathBuf> {
        let cache = self.cache();
        candidates
            .into_iter()
            .filter(|path| {
                let abs = std::path::absolute(path).unwrap_or_else(|_| path.clone());
                !cache.entries().any(|e| e.artifact_path == abs)
            })
            .collect()
    }
}
