//! Asset compilers.
//!
//! There is exactly one compiler per asset kind. Each is built for a single
//! [`BuildMode`] and receives the fixed, ordered list of stages belonging to
//! that mode's [`Pipeline`]; nothing inside a compiler branches on the mode.

mod markup;
mod resolve;
mod script;
mod sourcemap;
mod style;

use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

use camino::{Utf8Path, Utf8PathBuf};

use crate::core::{Artifact, BuildMode};
use crate::error::CompileError;

pub use markup::MarkupCompiler;
pub use script::{CacheStats, ScriptCompiler};
pub use style::StyleCompiler;

/// Turns one asset's sources into one [`Artifact`].
///
/// Compiling twice with unchanged inputs must produce byte-identical output.
pub trait AssetCompiler: Send {
    fn kind(&self) -> AssetKind;

    /// Name of the produced file inside the output directory.
    fn output_name(&self) -> &str;

    fn compile(&mut self) -> Result<Artifact, CompileError>;

    /// Drops whatever the compiler remembers about `changed`. Only the given
    /// entries are forgotten, never the whole cache.
    fn invalidate(&mut self, _changed: &[Utf8PathBuf]) {}

    /// Files the last compile read beyond what the source globs describe.
    fn tracked(&self) -> Option<TrackedFiles> {
        None
    }
}

/// A shared, updatable set of input files.
///
/// The compiler writes it after every compile and the watcher reads it to
/// route changes that no glob matches.
#[derive(Debug, Clone, Default)]
pub struct TrackedFiles(Arc<RwLock<BTreeSet<Utf8PathBuf>>>);

impl TrackedFiles {
    pub fn contains(&self, path: &Utf8Path) -> bool {
        self.0.read().unwrap().contains(path)
    }

    pub fn snapshot(&self) -> Vec<Utf8PathBuf> {
        self.0.read().unwrap().iter().cloned().collect()
    }

    pub fn replace(&self, files: impl IntoIterator<Item = Utf8PathBuf>) {
        *self.0.write().unwrap() = files.into_iter().collect();
    }

    pub fn extend(&self, files: impl IntoIterator<Item = Utf8PathBuf>) {
        self.0.write().unwrap().extend(files);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetKind {
    Script,
    Style,
    Markup,
}

impl AssetKind {
    pub fn name(self) -> &'static str {
        match self {
            AssetKind::Script => "script",
            AssetKind::Style => "style",
            AssetKind::Markup => "markup",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptStage {
    /// Walk the module graph from the entry, transpiling each module as it
    /// is reached.
    Resolve,
    /// Lower module syntax and link the bundle registry.
    Transpile,
    Minify,
    SourceMap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StyleStage {
    /// Preprocess each stylesheet with grass.
    Compile,
    /// Add vendor prefixes for the configured browser targets.
    Prefix,
    /// Join every stylesheet into one bundle.
    Concat,
    Minify,
    SourceMap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkupStage {
    Render,
    /// Inject the live reload client, when a reload port is known.
    LiveReload,
}

/// The fixed step lists for one build mode.
#[derive(Debug)]
pub struct Pipeline {
    pub mode: BuildMode,
    pub script: &'static [ScriptStage],
    pub style: &'static [StyleStage],
    pub markup: &'static [MarkupStage],
    /// Whether the script compiler keeps its incremental module cache.
    pub cache: bool,
}

pub const DEVELOPMENT_PIPELINE: Pipeline = Pipeline {
    mode: BuildMode::Development,
    script: &[
        ScriptStage::Resolve,
        ScriptStage::Transpile,
        ScriptStage::SourceMap,
    ],
    style: &[
        StyleStage::Compile,
        StyleStage::Prefix,
        StyleStage::Concat,
        StyleStage::SourceMap,
    ],
    markup: &[MarkupStage::Render, MarkupStage::LiveReload],
    cache: true,
};

pub const PRODUCTION_PIPELINE: Pipeline = Pipeline {
    mode: BuildMode::Production,
    script: &[
        ScriptStage::Resolve,
        ScriptStage::Transpile,
        ScriptStage::Minify,
    ],
    style: &[
        StyleStage::Compile,
        StyleStage::Prefix,
        StyleStage::Concat,
        StyleStage::Minify,
    ],
    markup: &[MarkupStage::Render],
    cache: false,
};

impl Pipeline {
    pub fn for_mode(mode: BuildMode) -> &'static Pipeline {
        match mode {
            BuildMode::Development => &DEVELOPMENT_PIPELINE,
            BuildMode::Production => &PRODUCTION_PIPELINE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_never_maps() {
        let pipeline = Pipeline::for_mode(BuildMode::Production);
        assert!(!pipeline.script.contains(&ScriptStage::SourceMap));
        assert!(!pipeline.style.contains(&StyleStage::SourceMap));
        assert!(!pipeline.markup.contains(&MarkupStage::LiveReload));
        assert!(!pipeline.cache);
    }

    #[test]
    fn test_tracked_files_are_shared() {
        let tracked = TrackedFiles::default();
        let reader = tracked.clone();

        tracked.replace([Utf8PathBuf::from("/p/a.js"), Utf8PathBuf::from("/p/b.mjs")]);
        assert!(reader.contains(Utf8Path::new("/p/b.mjs")));

        tracked.extend([Utf8PathBuf::from("/lib/c.js")]);
        tracked.replace([Utf8PathBuf::from("/p/a.js")]);
        assert_eq!(reader.snapshot(), vec![Utf8PathBuf::from("/p/a.js")]);
    }

    #[test]
    fn test_development_never_minifies() {
        let pipeline = Pipeline::for_mode(BuildMode::Development);
        assert!(!pipeline.script.contains(&ScriptStage::Minify));
        assert!(!pipeline.style.contains(&StyleStage::Minify));
        assert!(pipeline.cache);
    }
}
