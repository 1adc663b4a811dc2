//! The `build` and `dev` compositions.
//!
//! A [`Session`] owns one compiler per asset kind, built for the configured
//! mode, and a task graph where `clean` precedes the three compile tasks.
//! The same compiler instances serve the initial build and every later
//! rebuild, which is what lets the script cache carry over between them.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use camino::Utf8Path;

use crate::compiler::{
    AssetCompiler, AssetKind, MarkupCompiler, Pipeline, ScriptCompiler, StyleCompiler,
    TrackedFiles,
};
use crate::config::{Config, SourceSet};
use crate::engine::{Diagnostics, Task, TaskGraph};
use crate::error::{TaskError, TsumugiError};
use crate::output::{OutputWriter, clean};
use crate::server::Reload;
use crate::utils::as_overhead;
use crate::watch::WatchBinding;

pub const CLEAN: &str = "clean";

const KINDS: [AssetKind; 3] = [AssetKind::Script, AssetKind::Style, AssetKind::Markup];

type SharedCompiler = Arc<Mutex<dyn AssetCompiler>>;

pub struct Session {
    config: Arc<Config>,
    compilers: Vec<SharedCompiler>,
    graph: TaskGraph,
}

impl Session {
    /// Builds the compilers for `config.mode`. `reload` is the port of a
    /// running reload hub, if any; only then is the client injected into
    /// the page.
    pub fn new(config: Arc<Config>, reload: Option<u16>) -> Result<Self, TaskError> {
        let pipeline = Pipeline::for_mode(config.mode);

        let compilers: Vec<SharedCompiler> = vec![
            Arc::new(Mutex::new(ScriptCompiler::new(&config, pipeline))),
            Arc::new(Mutex::new(StyleCompiler::new(&config, pipeline))),
            Arc::new(Mutex::new(MarkupCompiler::new(&config, pipeline, reload))),
        ];

        let mut graph = TaskGraph::new();

        let dir = config.output_dir.clone();
        graph.add(Task::new(CLEAN, move |_| Ok(clean(&dir)?)), &[])?;

        for compiler in &compilers {
            graph.add(compile_task(compiler.clone(), &config), &[CLEAN])?;
        }

        Ok(Self {
            config,
            compilers,
            graph,
        })
    }

    /// Cleans the output directory and compiles every asset once.
    pub fn build(&self) -> Result<Diagnostics, TaskError> {
        let s = Instant::now();
        let names = KINDS.map(AssetKind::name);
        let diagnostics = self.graph.run(&names)?;

        tracing::info!(
            "built {} assets into {} {}",
            self.compilers.len(),
            self.config.output_dir,
            as_overhead(s)
        );

        Ok(diagnostics)
    }

    /// One binding per asset kind: recompile and write, then signal reload.
    /// A compiler that reads files beyond its globs also hands those over.
    pub fn bindings(&self, reload: Arc<dyn Reload>) -> Vec<WatchBinding> {
        KINDS
            .iter()
            .filter_map(|kind| {
                let task = self.graph.task(kind.name())?.clone();
                let reload = reload.clone();

                let mut binding = WatchBinding::new(kind.name(), self.sources(*kind).clone())
                    .step(task)
                    .step(Task::new("reload", move |_| {
                        reload.reload();
                        Ok(())
                    }));

                if let Some(files) = self.tracked(*kind) {
                    binding = binding.track(files);
                }

                Some(binding)
            })
            .collect()
    }

    fn tracked(&self, kind: AssetKind) -> Option<TrackedFiles> {
        self.compilers.iter().find_map(|compiler| {
            let compiler = compiler.lock().unwrap();
            (compiler.kind() == kind).then(|| compiler.tracked()).flatten()
        })
    }

    /// Files whose change affects the given asset.
    fn sources(&self, kind: AssetKind) -> &SourceSet {
        match kind {
            AssetKind::Script => &self.config.scripts,
            AssetKind::Style => &self.config.styles,
            AssetKind::Markup => &self.config.markup,
        }
    }
}

fn compile_task(compiler: SharedCompiler, config: &Config) -> Task {
    let name = compiler.lock().unwrap().kind().name();
    let dir = config.output_dir.clone();
    let writer = OutputWriter::new(&config.source_map_dir);

    Task::new(name, move |changed| {
        let mut compiler = compiler.lock().unwrap();
        compiler.invalidate(changed);

        let artifact = compiler.compile()?;
        writer.write(&dir, Utf8Path::new(compiler.output_name()), &artifact)?;

        Ok(())
    })
}

/// Runs the one-shot build.
pub fn build(config: Arc<Config>) -> Result<Diagnostics, TsumugiError> {
    tracing::info!("building in {} mode", config.mode);
    let session = Session::new(config, None)?;
    Ok(session.build()?)
}

/// Runs the initial build, then serves the output and rebuilds on change
/// until the process is stopped.
#[cfg(feature = "live")]
pub fn dev(config: Arc<Config>) -> Result<(), TsumugiError> {
    use crate::error::WatchError;
    use crate::server::{ReloadHub, reserve_port};
    use crate::watch::{WatchOrchestrator, watch};

    tracing::info!("starting dev session in {} mode", config.mode);

    let listener = reserve_port(&config.host, config.reload_port).map_err(WatchError::from)?;
    let hub = Arc::new(ReloadHub::start(listener).map_err(WatchError::from)?);

    let session = Session::new(config.clone(), Some(hub.port()))?;

    // A broken initial build is reported, the session still starts so the
    // next edit can fix it.
    if let Err(e) = session.build() {
        tracing::error!("initial build failed: {e}");
    }

    // The server thread logs its own failure; the watch loop goes on without it.
    #[cfg(feature = "server")]
    crate::server::serve(config.output_dir.clone(), config.host.clone(), config.port);

    let orchestrator = WatchOrchestrator::start(session.bindings(hub), config.debounce);
    watch(&orchestrator)?;

    Ok(())
}
