//! The static task graph.
//!
//! Tasks are named units of work with declared predecessors. The graph is a
//! plain `petgraph` DAG where an edge `a -> b` means `b` may only start once
//! `a` has finished successfully. Since predecessors must be declared before
//! their dependents, the graph cannot contain cycles.

mod runner;

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use camino::Utf8PathBuf;
use petgraph::Graph;
use petgraph::graph::NodeIndex;
use petgraph::visit::{Dfs, Reversed};

use crate::error::{TaskCause, TaskError};

pub use runner::{Diagnostics, TaskExecution};

type TaskFn = Arc<dyn Fn(&[Utf8PathBuf]) -> Result<(), TaskCause> + Send + Sync>;

/// A named, side-effecting unit of work.
///
/// The closure receives the paths whose change triggered the run; during a
/// full build this slice is empty.
#[derive(Clone)]
pub struct Task {
    name: Cow<'static, str>,
    func: TaskFn,
}

impl Task {
    pub fn new<F>(name: impl Into<Cow<'static, str>>, func: F) -> Self
    where
        F: Fn(&[Utf8PathBuf]) -> Result<(), TaskCause> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs the task, converting a panic into a [`TaskCause::Panicked`].
    pub fn run(&self, changed: &[Utf8PathBuf]) -> Result<(), TaskError> {
        let result = match catch_unwind(AssertUnwindSafe(|| (self.func)(changed))) {
            Ok(result) => result,
            Err(panic) => {
                let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic.downcast_ref::<String>() {
                    s.clone()
                } else {
                    String::from("unknown payload")
                };

                Err(TaskCause::Panicked(msg))
            }
        };

        result.map_err(|cause| TaskError::new(self.name.as_ref(), cause))
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Task({})", self.name)
    }
}

/// Declares tasks and their ordering, and runs named subsets of them.
#[derive(Default)]
pub struct TaskGraph {
    graph: Graph<Task, ()>,
    names: HashMap<String, NodeIndex>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `task`, which may only start after every task in `after`.
    pub fn add(&mut self, task: Task, after: &[&str]) -> Result<(), TaskError> {
        if self.names.contains_key(task.name()) {
            return Err(TaskError::new(task.name(), TaskCause::Duplicate));
        }

        let predecessors = after
            .iter()
            .map(|name| {
                self.names
                    .get(*name)
                    .copied()
                    .ok_or_else(|| TaskError::new(*name, TaskCause::UnknownTask))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let name = task.name().to_string();
        let index = self.graph.add_node(task);

        for predecessor in predecessors {
            self.graph.add_edge(predecessor, index, ());
        }

        self.names.insert(name, index);

        Ok(())
    }

    pub fn task(&self, name: &str) -> Option<&Task> {
        self.names.get(name).map(|&index| &self.graph[index])
    }

    /// Runs the named tasks together with everything they transitively
    /// depend on. Unordered tasks run concurrently.
    ///
    /// When a task fails its dependents are skipped, the remaining
    /// independent tasks still finish, and the failure of the earliest
    /// declared task is returned.
    pub fn run(&self, names: &[&str]) -> Result<Diagnostics, TaskError> {
        let mut selected = HashSet::new();

        for name in names {
            let start = *self
                .names
                .get(*name)
                .ok_or_else(|| TaskError::new(*name, TaskCause::UnknownTask))?;

            let reversed = Reversed(&self.graph);
            let mut dfs = Dfs::new(reversed, start);
            while let Some(index) = dfs.next(reversed) {
                selected.insert(index);
            }
        }

        runner::run_tasks_parallel(&self.graph, &selected, &[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Barrier, Mutex};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::error::CompileError;

    fn recording(log: &Arc<Mutex<Vec<String>>>, name: &'static str) -> Task {
        let log = log.clone();
        Task::new(name, move |_| {
            log.lock().unwrap().push(name.to_string());
            Ok(())
        })
    }

    fn failing(name: &'static str, delay: Duration) -> Task {
        Task::new(name, move |_| {
            std::thread::sleep(delay);
            Err(CompileError::syntax(format!("{name}.src"), "boom").into())
        })
    }

    #[test]
    fn test_predecessor_runs_first() {
        let log = Arc::new(Mutex::new(vec![]));
        let mut graph = TaskGraph::new();
        graph.add(recording(&log, "clean"), &[]).unwrap();
        graph.add(recording(&log, "script"), &["clean"]).unwrap();
        graph.add(recording(&log, "style"), &["clean"]).unwrap();
        graph.add(recording(&log, "markup"), &["clean"]).unwrap();

        let diagnostics = graph.run(&["script", "style", "markup"]).unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 4);
        assert_eq!(log[0], "clean");
        assert_eq!(diagnostics.executions.len(), 4);
        assert!(diagnostics.skipped.is_empty());
    }

    #[test]
    fn test_independent_tasks_run_concurrently() {
        // Every compile task waits for the other two, which only returns if
        // all three are in flight at once.
        let barrier = Arc::new(Barrier::new(3));
        let meeting = |name: &'static str| {
            let barrier = barrier.clone();
            Task::new(name, move |_| {
                barrier.wait();
                Ok(())
            })
        };

        let mut graph = TaskGraph::new();
        graph.add(Task::new("clean", |_| Ok(())), &[]).unwrap();
        graph.add(meeting("script"), &["clean"]).unwrap();
        graph.add(meeting("style"), &["clean"]).unwrap();
        graph.add(meeting("markup"), &["clean"]).unwrap();

        // One worker waits on results, three run the tasks.
        let pool = rayon::ThreadPoolBuilder::new().num_threads(4).build().unwrap();
        let diagnostics = pool.install(|| graph.run(&["script", "style", "markup"])).unwrap();

        assert_eq!(diagnostics.executions.len(), 4);
    }

    #[test]
    fn test_runs_transitive_predecessors_only() {
        let log = Arc::new(Mutex::new(vec![]));
        let mut graph = TaskGraph::new();
        graph.add(recording(&log, "clean"), &[]).unwrap();
        graph.add(recording(&log, "script"), &["clean"]).unwrap();
        graph.add(recording(&log, "style"), &["clean"]).unwrap();

        graph.run(&["script"]).unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["clean", "script"]);
    }

    #[test]
    fn test_failed_predecessor_skips_dependents() {
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = |name: &'static str| {
            let ran = ran.clone();
            Task::new(name, move |_| {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        };

        let mut graph = TaskGraph::new();
        graph.add(failing("clean", Duration::ZERO), &[]).unwrap();
        graph.add(counter("script"), &["clean"]).unwrap();
        graph.add(counter("style"), &["clean"]).unwrap();

        let err = graph.run(&["script", "style"]).unwrap_err();

        assert_eq!(err.task, "clean");
        assert!(err.is_compile());
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_first_failure_by_declaration_order() {
        let mut graph = TaskGraph::new();
        graph.add(Task::new("clean", |_| Ok(())), &[]).unwrap();
        // `style` is declared first but fails last.
        graph
            .add(failing("style", Duration::from_millis(100)), &["clean"])
            .unwrap();
        graph
            .add(failing("markup", Duration::ZERO), &["clean"])
            .unwrap();

        let err = graph.run(&["style", "markup"]).unwrap_err();

        assert_eq!(err.task, "style");
    }

    #[test]
    fn test_independent_task_finishes_despite_failure() {
        let ran = Arc::new(AtomicUsize::new(0));
        let counted = ran.clone();

        let mut graph = TaskGraph::new();
        graph.add(Task::new("clean", |_| Ok(())), &[]).unwrap();
        graph.add(failing("script", Duration::ZERO), &["clean"]).unwrap();
        graph
            .add(
                Task::new("style", move |_| {
                    std::thread::sleep(Duration::from_millis(50));
                    counted.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
                &["clean"],
            )
            .unwrap();

        assert!(graph.run(&["script", "style"]).is_err());
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unknown_and_duplicate_tasks() {
        let mut graph = TaskGraph::new();
        graph.add(Task::new("clean", |_| Ok(())), &[]).unwrap();

        let err = graph.add(Task::new("clean", |_| Ok(())), &[]).unwrap_err();
        assert!(matches!(err.cause, TaskCause::Duplicate));

        let err = graph.add(Task::new("script", |_| Ok(())), &["nope"]).unwrap_err();
        assert!(matches!(err.cause, TaskCause::UnknownTask));

        let err = graph.run(&["nope"]).unwrap_err();
        assert_eq!(err.task, "nope");
    }

    #[test]
    fn test_panic_is_reported() {
        let mut graph = TaskGraph::new();
        graph
            .add(Task::new("clean", |_| panic!("disk on fire")), &[])
            .unwrap();

        let err = graph.run(&["clean"]).unwrap_err();

        match err.cause {
            TaskCause::Panicked(msg) => assert_eq!(msg, "disk on fire"),
            other => panic!("unexpected cause {other:?}"),
        }
    }
}
