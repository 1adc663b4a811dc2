use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::mpsc::channel;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use petgraph::Direction;
use petgraph::Graph;
use petgraph::graph::NodeIndex;
use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use super::Task;
use crate::error::TaskError;

#[derive(Debug, Clone)]
pub struct TaskExecution {
    pub start: Instant,
    pub duration: Duration,
}

/// Timing of a single graph run.
#[derive(Debug, Default)]
pub struct Diagnostics {
    /// Every task that actually ran, failed or not.
    pub executions: BTreeMap<String, TaskExecution>,
    /// Tasks that never started because a predecessor failed.
    pub skipped: Vec<String>,
}

impl Diagnostics {
    pub fn total(&self) -> Duration {
        let start = self.executions.values().map(|e| e.start).min();
        let end = self.executions.values().map(|e| e.start + e.duration).max();

        match (start, end) {
            (Some(start), Some(end)) => end.duration_since(start),
            _ => Duration::ZERO,
        }
    }
}

/// Executes the selected part of the graph on the rayon thread pool.
///
/// 1. Tasks with no selected predecessors are spawned immediately.
/// 2. The calling thread waits for results on a channel.
/// 3. A finished task decrements the pending predecessor count of each of
///    its dependents, and any dependent reaching zero is spawned, unless one
///    of its predecessors failed or was skipped, in which case it is skipped
///    and the same bookkeeping propagates through it.
/// 4. The loop ends once every selected task has either run or been skipped.
pub(crate) fn run_tasks_parallel(
    graph: &Graph<Task, ()>,
    nodes_to_run: &HashSet<NodeIndex>,
    changed: &[Utf8PathBuf],
) -> Result<Diagnostics, TaskError> {
    let mut dependents: HashMap<NodeIndex, Vec<NodeIndex>> = HashMap::new();
    for edge in graph.raw_edges() {
        dependents
            .entry(edge.source())
            .or_default()
            .push(edge.target());
    }

    // A dependency only counts if it's also in the set of nodes to run.
    let mut dependency_counts: HashMap<NodeIndex, usize> = nodes_to_run
        .iter()
        .map(|&i| {
            (
                i,
                graph
                    .neighbors_directed(i, Direction::Incoming)
                    .filter(|dep| nodes_to_run.contains(dep))
                    .count(),
            )
        })
        .collect();

    let total_tasks = nodes_to_run.len();
    let mut diagnostics = Diagnostics::default();

    if total_tasks == 0 {
        return Ok(diagnostics);
    }

    let root_span = tracing::span!(Level::INFO, "running_tasks");
    root_span.pb_set_length(total_tasks as u64);
    if let Ok(style) = crate::utils::get_style_graph() {
        root_span.pb_set_style(&style);
    }
    root_span.pb_set_message("Running tasks...");
    let _enter = root_span.enter();

    let pb_style = crate::utils::get_style_task().ok();

    let mut completed = 0;
    let mut blocked: HashSet<NodeIndex> = HashSet::new();
    let mut failures: BTreeMap<NodeIndex, TaskError> = BTreeMap::new();

    rayon::scope(|s| {
        let (result_sender, result_receiver) =
            channel::<(NodeIndex, Result<(), TaskError>, Instant, Duration)>();

        let spawn_task = |index: NodeIndex| {
            let task = graph[index].clone();
            let sender = result_sender.clone();
            let pb_style = pb_style.clone();

            s.spawn(move |_| {
                let span = tracing::span!(Level::INFO, "task", name = task.name());
                if let Some(style) = &pb_style {
                    span.pb_set_style(style);
                }
                span.pb_set_message(&format!("Running {}", task.name()));
                let _enter = span.enter();

                let start = Instant::now();
                let result = task.run(changed);

                // The receiver outlives every spawned task.
                sender.send((index, result, start, start.elapsed())).ok();
            });
        };

        for &index in nodes_to_run {
            if dependency_counts.get(&index).copied().unwrap_or(0) == 0 {
                spawn_task(index);
            }
        }

        while completed < total_tasks {
            let Ok((index, result, start, duration)) = result_receiver.recv() else {
                break;
            };

            let name = graph[index].name().to_string();
            diagnostics
                .executions
                .insert(name, TaskExecution { start, duration });
            root_span.pb_inc(1);

            let mut queue = VecDeque::new();
            match result {
                Ok(()) => queue.push_back((index, true)),
                Err(err) => {
                    failures.insert(index, err);
                    queue.push_back((index, false));
                }
            }

            while let Some((done, ok)) = queue.pop_front() {
                completed += 1;

                if !ok {
                    blocked.insert(done);
                }

                let Some(next) = dependents.get(&done) else {
                    continue;
                };

                for &index in next {
                    let Some(count) = dependency_counts.get_mut(&index) else {
                        continue;
                    };

                    *count -= 1;
                    if *count > 0 {
                        continue;
                    }

                    let poisoned = graph
                        .neighbors_directed(index, Direction::Incoming)
                        .any(|dep| blocked.contains(&dep));

                    if poisoned {
                        tracing::debug!("skipping {}", graph[index].name());
                        diagnostics.skipped.push(graph[index].name().to_string());
                        queue.push_back((index, false));
                    } else {
                        spawn_task(index);
                    }
                }
            }
        }
    });

    match failures.into_values().next() {
        Some(err) => Err(err),
        None => Ok(diagnostics),
    }
}
