//! Rebuilding on change.
//!
//! Every asset kind is bound to the files that may affect it through a
//! [`WatchBinding`]. Each binding owns a small state machine and a worker
//! thread:
//!
//! ```text
//! Idle --change--> Pending --window elapsed--> Running --done--> Idle
//!                  Pending --change--> Pending (window restarts)
//!                                      Running --change--> Queued
//!                                      Queued  --done--> Running
//! ```
//!
//! A binding never runs two rebuilds at once, and any number of changes that
//! arrive during a rebuild collapse into exactly one follow-up rebuild.

#[cfg(feature = "live")]
mod paths;
#[cfg(feature = "live")]
mod router;

use std::collections::BTreeSet;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};

use crate::compiler::TrackedFiles;
use crate::config::SourceSet;
use crate::engine::Task;
use crate::utils::as_overhead;

#[cfg(feature = "live")]
pub use router::watch;

/// Observable state of one binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingState {
    Idle,
    /// A change was seen, the debounce window has not yet elapsed.
    Pending,
    Running,
    /// A change was seen while running.
    Queued,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Pending { deadline: Instant },
    Running,
    Queued,
}

impl Phase {
    fn on_change(self, now: Instant, window: Duration) -> Phase {
        match self {
            Phase::Idle | Phase::Pending { .. } => Phase::Pending {
                deadline: now + window,
            },
            Phase::Running | Phase::Queued => Phase::Queued,
        }
    }

    fn on_deadline(self, now: Instant) -> Phase {
        match self {
            Phase::Pending { deadline } if deadline <= now => Phase::Running,
            other => other,
        }
    }

    fn on_complete(self) -> Phase {
        match self {
            Phase::Queued => Phase::Running,
            _ => Phase::Idle,
        }
    }

    fn state(self) -> BindingState {
        match self {
            Phase::Idle => BindingState::Idle,
            Phase::Pending { .. } => BindingState::Pending,
            Phase::Running => BindingState::Running,
            Phase::Queued => BindingState::Queued,
        }
    }
}

/// Ties the files of one asset kind to the tasks that rebuild it.
pub struct WatchBinding {
    name: String,
    sources: SourceSet,
    tracked: Option<TrackedFiles>,
    steps: Vec<Task>,
}

impl WatchBinding {
    pub fn new(name: impl Into<String>, sources: SourceSet) -> Self {
        Self {
            name: name.into(),
            sources,
            tracked: None,
            steps: vec![],
        }
    }

    /// Also listens to `files`, which the rebuild keeps up to date with
    /// inputs the globs do not cover.
    pub fn track(mut self, files: TrackedFiles) -> Self {
        self.tracked = Some(files);
        self
    }

    /// Appends a step. Steps run in order and the sequence stops at the
    /// first failure, so a reload step placed last only ever fires after a
    /// successful rebuild.
    pub fn step(mut self, task: Task) -> Self {
        self.steps.push(task);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sources(&self) -> &SourceSet {
        &self.sources
    }

    pub fn watches(&self, path: &Utf8Path) -> bool {
        self.sources.matches(path) || self.tracked.as_ref().is_some_and(|t| t.contains(path))
    }

    fn rebuild(&self, changed: &[Utf8PathBuf]) {
        let s = Instant::now();
        tracing::info!(binding = %self.name, changed = changed.len(), "rebuilding");

        for step in &self.steps {
            if let Err(err) = step.run(changed) {
                if err.is_compile() {
                    tracing::warn!("{err}");
                    tracing::warn!("keeping the previous {} output", self.name);
                } else {
                    tracing::error!("{err}");
                    tracing::error!("{} halted until the next change", self.name);
                }
                return;
            }
        }

        tracing::info!("rebuilt {} {}", self.name, as_overhead(s));
    }
}

struct Slot {
    phase: Phase,
    /// Union of every path changed since the last rebuild started.
    changed: BTreeSet<Utf8PathBuf>,
    rebuilds: usize,
    shutdown: bool,
}

struct Shared {
    slot: Mutex<Slot>,
    signal: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap()
    }
}

/// Drives every binding of a watch session.
///
/// Dropping the orchestrator stops all bindings together; a rebuild already
/// running is allowed to finish first.
pub struct WatchOrchestrator {
    bindings: Vec<(Arc<WatchBinding>, Arc<Shared>)>,
    workers: Vec<JoinHandle<()>>,
    window: Duration,
}

impl WatchOrchestrator {
    /// Starts one worker per binding, every binding `Idle`.
    pub fn start(bindings: Vec<WatchBinding>, window: Duration) -> Self {
        let mut started = Vec::with_capacity(bindings.len());
        let mut workers = Vec::with_capacity(bindings.len());

        for binding in bindings {
            let binding = Arc::new(binding);
            let shared = Arc::new(Shared {
                slot: Mutex::new(Slot {
                    phase: Phase::Idle,
                    changed: BTreeSet::new(),
                    rebuilds: 0,
                    shutdown: false,
                }),
                signal: Condvar::new(),
            });

            workers.push(std::thread::spawn({
                let binding = binding.clone();
                let shared = shared.clone();
                move || work(&binding, &shared)
            }));

            started.push((binding, shared));
        }

        Self {
            bindings: started,
            workers,
            window,
        }
    }

    /// Routes a changed path to every binding whose sources match it or
    /// that tracks it. Returns whether any binding was interested.
    pub fn dispatch(&self, path: &Utf8Path) -> bool {
        let now = Instant::now();
        let mut matched = false;

        for (binding, shared) in &self.bindings {
            if !binding.watches(path) {
                continue;
            }

            matched = true;
            let mut slot = shared.lock();
            slot.changed.insert(path.to_path_buf());
            slot.phase = slot.phase.on_change(now, self.window);
            tracing::debug!(binding = %binding.name, "change in {path}");
            shared.signal.notify_one();
        }

        matched
    }

    pub fn state(&self, name: &str) -> Option<BindingState> {
        self.shared(name).map(|shared| shared.lock().phase.state())
    }

    /// Number of rebuilds the binding has started so far.
    pub fn rebuilds(&self, name: &str) -> Option<usize> {
        self.shared(name).map(|shared| shared.lock().rebuilds)
    }

    /// Every glob any binding listens to.
    pub fn globs(&self) -> impl Iterator<Item = &str> {
        self.bindings
            .iter()
            .flat_map(|(binding, _)| binding.sources.globs())
            .map(String::as_str)
    }

    /// Every tracked file of every binding, as of now.
    pub fn tracked(&self) -> BTreeSet<Utf8PathBuf> {
        self.bindings
            .iter()
            .filter_map(|(binding, _)| binding.tracked.as_ref())
            .flat_map(TrackedFiles::snapshot)
            .collect()
    }

    fn shared(&self, name: &str) -> Option<&Shared> {
        self.bindings
            .iter()
            .find(|(binding, _)| binding.name == name)
            .map(|(_, shared)| shared.as_ref())
    }
}

impl Drop for WatchOrchestrator {
    fn drop(&mut self) {
        for (_, shared) in &self.bindings {
            shared.lock().shutdown = true;
            shared.signal.notify_all();
        }

        for worker in self.workers.drain(..) {
            worker.join().ok();
        }
    }
}

fn work(binding: &WatchBinding, shared: &Shared) {
    let mut slot = shared.lock();

    loop {
        if slot.shutdown {
            break;
        }

        match slot.phase {
            Phase::Idle | Phase::Queued => {
                slot = shared.signal.wait(slot).unwrap();
            }
            Phase::Pending { deadline } => {
                let now = Instant::now();
                slot.phase = slot.phase.on_deadline(now);

                if slot.phase != Phase::Running {
                    slot = shared
                        .signal
                        .wait_timeout(slot, deadline.saturating_duration_since(now))
                        .unwrap()
                        .0;
                }
            }
            Phase::Running => {
                let changed: Vec<_> = std::mem::take(&mut slot.changed).into_iter().collect();
                slot.rebuilds += 1;
                drop(slot);

                binding.rebuild(&changed);

                slot = shared.lock();
                slot.phase = slot.phase.on_complete();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::error::{CompileError, IoError, TaskCause};

    const WINDOW: Duration = Duration::from_millis(50);

    fn wait_until(mut check: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if check() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    fn counting(name: &'static str, count: &Arc<AtomicUsize>, delay: Duration) -> Task {
        let count = count.clone();
        Task::new(name, move |_| {
            std::thread::sleep(delay);
            count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn js() -> SourceSet {
        SourceSet::new("/project", ["src/js/**/*.js"]).unwrap()
    }

    fn scss() -> SourceSet {
        SourceSet::new("/project", ["src/scss/**/*.scss"]).unwrap()
    }

    #[test]
    fn test_phase_transitions() {
        let now = Instant::now();
        let later = now + WINDOW;

        let pending = Phase::Idle.on_change(now, WINDOW);
        assert_eq!(pending, Phase::Pending { deadline: later });
        assert_eq!(pending.on_deadline(now), pending);
        assert_eq!(pending.on_deadline(later), Phase::Running);

        assert_eq!(Phase::Running.on_change(now, WINDOW), Phase::Queued);
        assert_eq!(Phase::Queued.on_change(now, WINDOW), Phase::Queued);
        assert_eq!(Phase::Queued.on_complete(), Phase::Running);
        assert_eq!(Phase::Running.on_complete(), Phase::Idle);
    }

    #[test]
    fn test_burst_collapses_into_one_rebuild() {
        let count = Arc::new(AtomicUsize::new(0));
        let binding =
            WatchBinding::new("script", js()).step(counting("script", &count, Duration::ZERO));
        let orchestrator = WatchOrchestrator::start(vec![binding], WINDOW);

        for _ in 0..5 {
            assert!(orchestrator.dispatch(Utf8Path::new("/project/src/js/a.js")));
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(orchestrator.state("script"), Some(BindingState::Pending));

        assert!(wait_until(|| count.load(Ordering::SeqCst) == 1));
        assert!(wait_until(|| orchestrator.state("script") == Some(BindingState::Idle)));
        std::thread::sleep(WINDOW * 2);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(orchestrator.rebuilds("script"), Some(1));
    }

    #[test]
    fn test_changes_while_running_queue_one_rebuild() {
        let count = Arc::new(AtomicUsize::new(0));
        let binding = WatchBinding::new("script", js())
            .step(counting("script", &count, Duration::from_millis(200)));
        let orchestrator = WatchOrchestrator::start(vec![binding], WINDOW);
        let path = Utf8Path::new("/project/src/js/a.js");

        orchestrator.dispatch(path);
        assert!(wait_until(|| orchestrator.state("script") == Some(BindingState::Running)));

        for _ in 0..4 {
            orchestrator.dispatch(path);
        }
        assert_eq!(orchestrator.state("script"), Some(BindingState::Queued));

        assert!(wait_until(|| count.load(Ordering::SeqCst) == 2));
        assert!(wait_until(|| orchestrator.state("script") == Some(BindingState::Idle)));
        assert_eq!(orchestrator.rebuilds("script"), Some(2));
    }

    #[test]
    fn test_changes_reach_matching_bindings_only() {
        let scripts = Arc::new(AtomicUsize::new(0));
        let styles = Arc::new(AtomicUsize::new(0));
        let orchestrator = WatchOrchestrator::start(
            vec![
                WatchBinding::new("script", js())
                    .step(counting("script", &scripts, Duration::ZERO)),
                WatchBinding::new("style", scss())
                    .step(counting("style", &styles, Duration::ZERO)),
            ],
            WINDOW,
        );

        assert!(orchestrator.dispatch(Utf8Path::new("/project/src/js/lib/a.js")));
        assert!(!orchestrator.dispatch(Utf8Path::new("/project/README.md")));

        assert!(wait_until(|| scripts.load(Ordering::SeqCst) == 1));
        assert_eq!(orchestrator.state("style"), Some(BindingState::Idle));
        assert_eq!(styles.load(Ordering::SeqCst), 0);
        assert_eq!(orchestrator.state("nope"), None);
    }

    #[test]
    fn test_failed_step_skips_the_rest_and_rearms() {
        let reloads = Arc::new(AtomicUsize::new(0));
        let attempts = Arc::new(AtomicUsize::new(0));
        let tried = attempts.clone();

        let binding = WatchBinding::new("style", scss())
            .step(Task::new("style", move |_| {
                tried.fetch_add(1, Ordering::SeqCst);
                Err(TaskCause::from(CompileError::syntax("main.scss", "expected '}'")))
            }))
            .step(counting("reload", &reloads, Duration::ZERO));
        let orchestrator = WatchOrchestrator::start(vec![binding], WINDOW);
        let path = Utf8Path::new("/project/src/scss/main.scss");

        orchestrator.dispatch(path);
        assert!(wait_until(|| attempts.load(Ordering::SeqCst) == 1));
        assert!(wait_until(|| orchestrator.state("style") == Some(BindingState::Idle)));

        orchestrator.dispatch(path);
        assert!(wait_until(|| attempts.load(Ordering::SeqCst) == 2));
        assert_eq!(reloads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_io_failure_halts_only_its_binding() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let scripts = Arc::new(AtomicUsize::new(0));
        let tried = attempts.clone();

        let orchestrator = WatchOrchestrator::start(
            vec![
                WatchBinding::new("style", scss()).step(Task::new("style", move |_| {
                    if tried.fetch_add(1, Ordering::SeqCst) == 0 {
                        let denied = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
                        return Err(TaskCause::from(IoError::new("/project/build/app.css", denied)));
                    }
                    Ok(())
                })),
                WatchBinding::new("script", js())
                    .step(counting("script", &scripts, Duration::ZERO)),
            ],
            WINDOW,
        );
        let style = Utf8Path::new("/project/src/scss/main.scss");

        orchestrator.dispatch(style);
        assert!(wait_until(|| attempts.load(Ordering::SeqCst) == 1));
        assert!(wait_until(|| orchestrator.state("style") == Some(BindingState::Idle)));

        // The other binding keeps working.
        orchestrator.dispatch(Utf8Path::new("/project/src/js/a.js"));
        assert!(wait_until(|| scripts.load(Ordering::SeqCst) == 1));
        assert_eq!(orchestrator.rebuilds("style"), Some(1));

        orchestrator.dispatch(style);
        assert!(wait_until(|| attempts.load(Ordering::SeqCst) == 2));
        assert!(wait_until(|| orchestrator.state("style") == Some(BindingState::Idle)));
        assert_eq!(orchestrator.rebuilds("style"), Some(2));
    }

    #[test]
    fn test_tracked_files_route_to_their_binding() {
        let count = Arc::new(AtomicUsize::new(0));
        let tracked = TrackedFiles::default();
        let binding = WatchBinding::new("script", js())
            .track(tracked.clone())
            .step(counting("script", &count, Duration::ZERO));
        let orchestrator = WatchOrchestrator::start(vec![binding], WINDOW);

        let shared = Utf8Path::new("/project/src/shared.js");
        let module = Utf8Path::new("/project/node_modules/kit/index.mjs");
        assert!(!orchestrator.dispatch(shared));

        tracked.replace([shared.to_path_buf(), module.to_path_buf()]);
        assert_eq!(orchestrator.tracked().len(), 2);
        assert!(orchestrator.dispatch(module));
        assert!(wait_until(|| count.load(Ordering::SeqCst) == 1));

        tracked.replace([]);
        assert!(!orchestrator.dispatch(module));
    }

    #[test]
    fn test_steps_receive_the_union_of_changes() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = seen.clone();

        let binding = WatchBinding::new("script", js()).step(Task::new("script", move |changed| {
            record.lock().unwrap().push(changed.to_vec());
            Ok(())
        }));
        let orchestrator = WatchOrchestrator::start(vec![binding], WINDOW);

        orchestrator.dispatch(Utf8Path::new("/project/src/js/b.js"));
        orchestrator.dispatch(Utf8Path::new("/project/src/js/a.js"));
        orchestrator.dispatch(Utf8Path::new("/project/src/js/b.js"));

        assert!(wait_until(|| seen.lock().unwrap().len() == 1));
        assert_eq!(
            seen.lock().unwrap()[0],
            vec![
                Utf8PathBuf::from("/project/src/js/a.js"),
                Utf8PathBuf::from("/project/src/js/b.js"),
            ]
        );
    }

    #[test]
    fn test_drop_stops_workers() {
        let count = Arc::new(AtomicUsize::new(0));
        let binding =
            WatchBinding::new("script", js()).step(counting("script", &count, Duration::ZERO));
        let orchestrator = WatchOrchestrator::start(vec![binding], Duration::from_secs(60));

        orchestrator.dispatch(Utf8Path::new("/project/src/js/a.js"));
        drop(orchestrator);

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
