//! File transform steps.
//!
//! A [`TransformStep`] reads every file matched by its globs, threads the
//! resulting [`FileSet`] through an ordered list of [`Operation`]s and writes
//! whatever comes out into its destination directory.
//!
//! The actual content work (Sass, prefixing, minification, transpiling,
//! image recompression) happens in external libraries and tools wrapped by
//! the operations in the submodules; the step only guarantees ordering,
//! all-or-nothing writes and fresh glob resolution on every run.

mod bundle;
mod images;
mod scripts;
mod sprite;
mod styles;
mod tool;

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::Instrument;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::asset::FileSet;
use crate::error::{StepError, TransformError};

pub use bundle::{Concat, Rename, WriteSourceMaps};
pub use images::{MinifySvg, OptimizeImages};
pub use scripts::Transpile;
pub use sprite::SvgStore;
pub use styles::{Autoprefix, CompileSass, GroupMedia, MinifyCss};

/// A pure transformation over a whole file set.
///
/// Implementations may rename, merge, drop or rewrite files, but must keep
/// the relative order of the files they pass through.
pub trait Operation: Send + Sync {
    fn name(&self) -> &'static str;

    fn apply(&self, assets: FileSet) -> Result<FileSet, TransformError>;
}

/// Outcome of one step run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Report {
    /// Files matched by the globs.
    pub inputs: usize,
    /// Files left after the last operation.
    pub outputs: usize,
    /// Outputs whose content differed from what was on disk.
    pub written: usize,
}

pub struct TransformStep {
    name: String,
    root: Utf8PathBuf,
    sources: Vec<String>,
    operations: Vec<Arc<dyn Operation>>,
    dest: Utf8PathBuf,
}

impl TransformStep {
    /// Creates a step with no sources and no operations. Globs are relative
    /// to `root`, outputs are written below `dest`.
    pub fn new(
        name: impl Into<String>,
        root: impl Into<Utf8PathBuf>,
        dest: impl Into<Utf8PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            sources: Vec::new(),
            operations: Vec::new(),
            dest: dest.into(),
        }
    }

    pub fn source(mut self, glob: impl Into<String>) -> Self {
        self.sources.push(glob.into());
        self
    }

    pub fn sources(mut self, globs: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.sources.extend(globs.into_iter().map(Into::into));
        self
    }

    /// Appends an operation to the end of the pipeline.
    pub fn pipe(mut self, operation: impl Operation + 'static) -> Self {
        self.operations.push(Arc::new(operation));
        self
    }

    /// Appends an operation only when one is given.
    pub fn pipe_opt(self, operation: Option<impl Operation + 'static>) -> Self {
        match operation {
            Some(operation) => self.pipe(operation),
            None => self,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs the step on the calling thread.
    ///
    /// Nothing is written unless every operation succeeds, so a failing run
    /// leaves the previous output in place.
    pub fn execute(&self) -> Result<Report, StepError> {
        let mut assets = crate::io::read_sources(&self.root, &self.sources)?;
        let inputs = assets.len();
        tracing::debug!(step = %self.name, inputs, "resolved sources");

        for operation in &self.operations {
            assets = operation.apply(assets)?;
            tracing::debug!(
                step = %self.name,
                operation = operation.name(),
                files = assets.len(),
                "applied"
            );
        }

        let written = crate::io::write_assets(&self.dest, &assets)?;

        Ok(Report {
            inputs,
            outputs: assets.len(),
            written,
        })
    }

    /// Runs the step on the blocking pool.
    pub async fn run(self: Arc<Self>) -> Result<Report, StepError> {
        let span = tracing::info_span!("step", name = %self.name);
        span.pb_set_style(&crate::logging::task_style());
        span.pb_set_message(&format!("Running {}", self.name));

        let s = Instant::now();
        let inner = span.clone();
        let name = self.name.clone();

        let report = tokio::task::spawn_blocking(move || {
            let _enter = inner.enter();
            self.execute()
        })
        .instrument(span)
        .await??;

        tracing::info!(
            "finished {} [{} -> {} files, {} written] {}",
            name,
            report.inputs,
            report.outputs,
            report.written,
            crate::io::as_overhead(s)
        );

        Ok(report)
    }
}

impl Debug for TransformStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformStep")
            .field("name", &self.name)
            .field("sources", &self.sources)
            .field(
                "operations",
                &self.operations.iter().map(|o| o.name()).collect::<Vec<_>>(),
            )
            .field("dest", &self.dest)
            .finish()
    }
}
