//! Stage assignment: partition a preliminary task graph into
//! platform-homogeneous execution stages and assemble the final stage DAG.
//!
//! Responsibilities:
//! - discover initial stages by growing platform-homogeneous regions out
//!   from the sink tasks;
//! - propagate required-stage sets downstream from outbound tasks;
//! - split stages whose tasks disagree on required-set size until the
//!   partition reaches a fixpoint;
//! - assemble the immutable [`ExecutionPlan`] with start/terminal tasks and
//!   successor edges.
//!
//! A run is atomic with respect to callers: no partial results are
//! observable, and concurrent `run` calls on one assigner are serialized.
//! All run state is local to one run.

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::Mutex;

use tracing::{debug, error, info};

use cfl_common::metrics::global_metrics;
use cfl_common::{CflError, PlatformId, Result, StageId, TaskId};

use crate::execution_plan::{ExecutionPlan, ExecutionStage, PlatformExecution};
use crate::task_graph::TaskGraph;

/// Stage assignment knobs.
#[derive(Debug, Clone)]
pub struct StageAssignerConfig {
    /// Upper bound on mark/sweep rounds; `0` derives the bound from the
    /// task count. The bound exists to fail fast on malformed (cyclic)
    /// input instead of looping forever.
    pub max_refinement_rounds: usize,
}

impl Default for StageAssignerConfig {
    fn default() -> Self {
        Self {
            max_refinement_rounds: 0,
        }
    }
}

/// Compiles one preliminary task graph into an [`ExecutionPlan`].
///
/// Contracts:
/// - construction warns once per unwired slot and fails unless the graph is
///   structurally closed for traversal;
/// - `run` is deterministic and side-effect free apart from diagnostics;
/// - concurrent `run` calls are serialized, never rejected.
#[derive(Debug)]
pub struct StageAssigner<'a> {
    graph: &'a TaskGraph,
    config: StageAssignerConfig,
    run_gate: Mutex<()>,
}

impl<'a> StageAssigner<'a> {
    pub fn new(graph: &'a TaskGraph) -> Result<Self> {
        Self::with_config(graph, StageAssignerConfig::default())
    }

    pub fn with_config(graph: &'a TaskGraph, config: StageAssignerConfig) -> Result<Self> {
        graph.log_unwired_slots();
        if !graph.is_complete() {
            return Err(CflError::IncompleteGraph(
                "graph is not structurally closed from its sinks".to_string(),
            ));
        }
        Ok(Self {
            graph,
            config,
            run_gate: Mutex::new(()),
        })
    }

    /// Compile the graph into an execution plan.
    pub fn run(&self) -> Result<ExecutionPlan> {
        let _gate = self.run_gate.lock().unwrap_or_else(|e| e.into_inner());
        let mut state = RunState::new(self.graph, &self.config);
        let result = state.compile();
        match &result {
            Ok(plan) => {
                global_metrics().record_compilation("ok", state.rounds as u64);
                info!(
                    stages = plan.stage_count(),
                    entry_stages = plan.entry_stages().len(),
                    rounds = state.rounds,
                    operator = "StageAssignment",
                    "task graph compiled"
                );
            }
            Err(e) => {
                global_metrics().record_compilation("error", state.rounds as u64);
                error!(
                    error = %e,
                    operator = "StageAssignment",
                    "stage assignment failed"
                );
            }
        }
        result
    }
}

/// Compile `graph` into an execution plan with default knobs.
pub fn assign_stages(graph: &TaskGraph) -> Result<ExecutionPlan> {
    StageAssigner::new(graph)?.run()
}

/// Mutable grouping of same-platform tasks, subject to splitting until the
/// partition stabilizes.
struct InterimStage {
    platform_execution: usize,
    platform: PlatformId,
    sequence: usize,
    tasks: BTreeSet<TaskId>,
    /// Tasks producing at least one execution-breaker output.
    outbound: BTreeSet<TaskId>,
    /// Dirty bit: set when a member task's required-stage set grew.
    marked: bool,
}

struct PlatformExecutionState {
    platform: PlatformId,
    next_sequence: usize,
}

struct RunState<'a> {
    graph: &'a TaskGraph,
    max_rounds: usize,
    seeds: VecDeque<TaskId>,
    /// Task index -> owning interim stage index.
    assigned: Vec<Option<usize>>,
    /// Task index -> interim stage indexes the task transitively depends on,
    /// including its own. Grows monotonically; never shrinks.
    required: Vec<HashSet<usize>>,
    stages: Vec<InterimStage>,
    /// Stages changed in the previous round (all of them after discovery,
    /// freshly split ones afterwards).
    changed: Vec<usize>,
    executions: Vec<PlatformExecutionState>,
    /// Platform index -> platform execution index, filled lazily.
    execution_by_platform: Vec<Option<usize>>,
    rounds: usize,
}

impl<'a> RunState<'a> {
    fn new(graph: &'a TaskGraph, config: &StageAssignerConfig) -> Self {
        Self {
            graph,
            max_rounds: config.max_refinement_rounds,
            seeds: VecDeque::new(),
            assigned: vec![None; graph.task_count()],
            required: vec![HashSet::new(); graph.task_count()],
            stages: Vec::new(),
            changed: Vec::new(),
            executions: Vec::new(),
            execution_by_platform: vec![None; graph.platform_count()],
            rounds: 0,
        }
    }

    fn compile(&mut self) -> Result<ExecutionPlan> {
        self.discover_initial_stages()?;
        self.refine_stages()?;
        for idx in 0..self.stages.len() {
            info!(
                stage = %self.stage_label(idx),
                tasks = self.stages[idx].tasks.len(),
                operator = "StageAssignment",
                "final interim stage"
            );
        }
        self.assemble_plan()
    }

    fn stage_label(&self, idx: usize) -> String {
        let stage = &self.stages[idx];
        let platform = self
            .graph
            .platform_name(stage.platform)
            .unwrap_or("unknown");
        format!("{}:{}", platform, stage.sequence)
    }

    fn execution_for(&mut self, platform: PlatformId) -> usize {
        if let Some(existing) = self.execution_by_platform[platform.0] {
            return existing;
        }
        let idx = self.executions.len();
        self.executions.push(PlatformExecutionState {
            platform,
            next_sequence: 0,
        });
        self.execution_by_platform[platform.0] = Some(idx);
        idx
    }

    fn new_stage(&mut self, execution: usize) -> usize {
        let sequence = self.executions[execution].next_sequence;
        self.executions[execution].next_sequence += 1;
        let idx = self.stages.len();
        self.stages.push(InterimStage {
            platform_execution: execution,
            platform: self.executions[execution].platform,
            sequence,
            tasks: BTreeSet::new(),
            outbound: BTreeSet::new(),
            marked: false,
        });
        idx
    }

    fn stage_of(&self, task: TaskId) -> Result<usize> {
        self.assigned
            .get(task.0)
            .copied()
            .flatten()
            .ok_or_else(|| CflError::InvalidGraph(format!("task {task} is not assigned to a stage")))
    }

    /// Grow platform-homogeneous stages from the sink tasks until every
    /// reachable task is assigned.
    fn discover_initial_stages(&mut self) -> Result<()> {
        self.seeds.extend(self.graph.sinks().iter().copied());
        while let Some(seed) = self.seeds.pop_front() {
            if self.assigned[seed.0].is_some() {
                continue;
            }
            let platform = self.graph.task(seed)?.platform;
            let execution = self.execution_for(platform);
            let stage = self.new_stage(execution);
            global_metrics().inc_stages_discovered(
                self.graph.platform_name(platform).unwrap_or("unknown"),
            );
            self.grow_stage(seed, stage)?;
        }
        self.changed = (0..self.stages.len()).collect();
        Ok(())
    }

    /// Absorb `seed` and every platform-matching neighbor, both upstream and
    /// downstream, into `stage`. Mismatching neighbors are re-queued as
    /// seeds for stages of their own.
    fn grow_stage(&mut self, seed: TaskId, stage: usize) -> Result<()> {
        let graph = self.graph;
        let mut pending = vec![seed];
        while let Some(task) = pending.pop() {
            if self.assigned[task.0].is_some() {
                continue;
            }
            self.assign(task, stage)?;
            let node = graph.task(task)?;
            for channel_id in node.outputs.iter().flatten() {
                let channel = graph.channel(*channel_id)?;
                if channel.execution_breaker {
                    self.stages[stage].outbound.insert(task);
                }
                for &(consumer, _) in &channel.consumers {
                    if !graph.contains_task(consumer) {
                        return Err(CflError::InvalidGraph(format!(
                            "channel {channel_id} references unknown consumer {consumer}"
                        )));
                    }
                    self.absorb_or_reseed(consumer, stage, &mut pending)?;
                }
            }
            for channel_id in node.inputs.iter().flatten() {
                let channel = graph.channel(*channel_id)?;
                if !graph.contains_task(channel.producer) {
                    return Err(CflError::UnknownProducer(*channel_id));
                }
                self.absorb_or_reseed(channel.producer, stage, &mut pending)?;
            }
        }
        Ok(())
    }

    fn absorb_or_reseed(
        &mut self,
        task: TaskId,
        stage: usize,
        pending: &mut Vec<TaskId>,
    ) -> Result<()> {
        if self.assigned[task.0].is_some() {
            return Ok(());
        }
        if self.graph.task(task)?.platform == self.stages[stage].platform {
            pending.push(task);
        } else {
            self.seeds.push_back(task);
        }
        Ok(())
    }

    fn assign(&mut self, task: TaskId, stage_idx: usize) -> Result<()> {
        let node = self.graph.task(task)?;
        let stage = &mut self.stages[stage_idx];
        if node.platform != stage.platform {
            return Err(CflError::PlatformMismatch {
                task,
                task_platform: node.platform,
                stage_platform: stage.platform,
            });
        }
        if let Some(existing) = self.assigned[task.0] {
            return Err(CflError::DoubleAssignment {
                task,
                assigned: StageId(existing),
                attempted: StageId(stage_idx),
            });
        }
        stage.tasks.insert(task);
        self.assigned[task.0] = Some(stage_idx);
        let mut initial = HashSet::with_capacity(4);
        initial.insert(stage_idx);
        self.required[task.0] = initial;
        debug!(
            task_id = %task,
            stage = %self.stage_label(stage_idx),
            "assigned task to interim stage"
        );
        Ok(())
    }

    /// Alternate the mark and sweep phases until a round produces no new
    /// stage, bounded against malformed input.
    fn refine_stages(&mut self) -> Result<()> {
        let bound = if self.max_rounds == 0 {
            self.graph.task_count() + 1
        } else {
            self.max_rounds
        };
        while !self.changed.is_empty() {
            self.rounds += 1;
            if self.rounds > bound {
                return Err(CflError::FixpointOverrun(bound));
            }
            // Mark: push dependency information downstream from every
            // outbound task of a changed stage.
            let changed = std::mem::take(&mut self.changed);
            for stage_idx in changed {
                let outbound: Vec<TaskId> =
                    self.stages[stage_idx].outbound.iter().copied().collect();
                for task in outbound {
                    self.propagate_required_from(task)?;
                }
            }
            // Sweep: split marked stages. Stages created by a split are not
            // re-examined until the next round.
            let stage_count = self.stages.len();
            for stage_idx in 0..stage_count {
                self.partition_stage(stage_idx)?;
            }
        }
        Ok(())
    }

    /// Walk downstream from `root`, unioning accumulated required-stage sets
    /// into every visited task. A task whose set grew is re-queued so the
    /// enlarged set keeps flowing; a no-growth union ends that path.
    fn propagate_required_from(&mut self, root: TaskId) -> Result<()> {
        let graph = self.graph;
        let mut queue = VecDeque::new();
        queue.push_back(root);
        while let Some(task) = queue.pop_front() {
            let own_stage = self.stage_of(task)?;
            let grew_own = self.required[task.0].insert(own_stage);
            if grew_own {
                self.stages[own_stage].marked = true;
                debug!(
                    task_id = %task,
                    required = self.required[task.0].len(),
                    "required-stage set grew"
                );
            }
            let contribution = self.required[task.0].clone();
            let node = graph.task(task)?;
            for channel_id in node.outputs.iter().flatten() {
                let channel = graph.channel(*channel_id)?;
                for &(consumer, _) in &channel.consumers {
                    let consumer_stage = self.stage_of(consumer)?;
                    let set = &mut self.required[consumer.0];
                    let before = set.len();
                    set.extend(contribution.iter().copied());
                    set.insert(consumer_stage);
                    let grew = set.len() > before;
                    if grew {
                        self.stages[consumer_stage].marked = true;
                        debug!(
                            task_id = %consumer,
                            required = self.required[consumer.0].len(),
                            "required-stage set grew"
                        );
                        queue.push_back(consumer);
                    }
                }
            }
        }
        Ok(())
    }

    /// Split every task whose required-stage set is larger than the stage
    /// minimum into a fresh sibling stage. Tasks at the minimum become
    /// runnable under the same precondition and stay together.
    fn partition_stage(&mut self, stage_idx: usize) -> Result<bool> {
        if !self.stages[stage_idx].marked {
            return Ok(false);
        }
        self.stages[stage_idx].marked = false;

        let members: Vec<TaskId> = self.stages[stage_idx].tasks.iter().copied().collect();
        let mut min_required = usize::MAX;
        for task in &members {
            min_required = min_required.min(self.required[task.0].len());
        }
        let separable: Vec<TaskId> = members
            .into_iter()
            .filter(|task| self.required[task.0].len() > min_required)
            .collect();
        if separable.is_empty() {
            debug!(
                stage = %self.stage_label(stage_idx),
                "no separable tasks in marked stage"
            );
            return Ok(false);
        }

        let execution = self.stages[stage_idx].platform_execution;
        let new_idx = self.new_stage(execution);
        debug!(
            stage = %self.stage_label(stage_idx),
            split = %self.stage_label(new_idx),
            tasks = separable.len(),
            "separating tasks with deeper dependency chains"
        );
        for task in separable {
            self.stages[stage_idx].tasks.remove(&task);
            let was_outbound = self.stages[stage_idx].outbound.remove(&task);
            let new_stage = &mut self.stages[new_idx];
            new_stage.tasks.insert(task);
            if was_outbound {
                new_stage.outbound.insert(task);
            }
            self.assigned[task.0] = Some(new_idx);
        }
        global_metrics().inc_stage_splits(
            self.graph
                .platform_name(self.stages[new_idx].platform)
                .unwrap_or("unknown"),
        );
        self.changed.push(new_idx);
        Ok(true)
    }

    /// Convert the stable interim partition into the immutable stage DAG,
    /// walking upstream from the sinks so only schedulable stages are
    /// assembled.
    fn assemble_plan(&self) -> Result<ExecutionPlan> {
        let graph = self.graph;
        let mut final_ids: Vec<Option<usize>> = vec![None; self.stages.len()];
        let mut final_stages: Vec<ExecutionStage> = Vec::new();
        let mut executions: Vec<PlatformExecution> = self
            .executions
            .iter()
            .map(|e| PlatformExecution {
                platform: e.platform,
                stages: Vec::new(),
            })
            .collect();

        let mut visited = vec![false; graph.task_count()];
        let mut pending: Vec<TaskId> = graph.sinks().to_vec();
        while let Some(task) = pending.pop() {
            if visited[task.0] {
                continue;
            }
            visited[task.0] = true;
            let interim = self.stage_of(task)?;
            let downstream =
                self.ensure_final_stage(interim, &mut final_ids, &mut final_stages, &mut executions)?;
            for channel_id in graph.task(task)?.inputs.iter().flatten() {
                let channel = graph.channel(*channel_id)?;
                if !graph.contains_task(channel.producer) {
                    return Err(CflError::UnknownProducer(*channel_id));
                }
                let upstream_interim = self.stage_of(channel.producer)?;
                let upstream = self.ensure_final_stage(
                    upstream_interim,
                    &mut final_ids,
                    &mut final_stages,
                    &mut executions,
                )?;
                if upstream != downstream {
                    let successor = StageId(downstream);
                    if !final_stages[upstream].successors.contains(&successor) {
                        final_stages[upstream].successors.push(successor);
                        final_stages[downstream].predecessor_count += 1;
                    }
                }
                pending.push(channel.producer);
            }
        }
        Ok(ExecutionPlan::new(final_stages, executions))
    }

    /// Memoized interim-to-final stage conversion.
    fn ensure_final_stage(
        &self,
        interim: usize,
        final_ids: &mut Vec<Option<usize>>,
        final_stages: &mut Vec<ExecutionStage>,
        executions: &mut [PlatformExecution],
    ) -> Result<usize> {
        if let Some(existing) = final_ids[interim] {
            return Ok(existing);
        }
        let stage = &self.stages[interim];
        let (start_tasks, terminal_tasks) = self.classify_stage_tasks(interim)?;
        let idx = final_stages.len();
        final_stages.push(ExecutionStage {
            id: StageId(idx),
            platform: stage.platform,
            platform_execution: stage.platform_execution,
            sequence: stage.sequence,
            tasks: stage.tasks.clone(),
            start_tasks,
            terminal_tasks,
            successors: Vec::new(),
            predecessor_count: 0,
        });
        executions[stage.platform_execution].stages.push(StageId(idx));
        final_ids[interim] = Some(idx);
        Ok(idx)
    }

    /// A member task is a start task when no input-channel producer shares
    /// its stage, and a terminal task when no output-channel consumer does.
    fn classify_stage_tasks(&self, interim: usize) -> Result<(BTreeSet<TaskId>, BTreeSet<TaskId>)> {
        let graph = self.graph;
        let mut start_tasks = BTreeSet::new();
        let mut terminal_tasks = BTreeSet::new();
        for &task in &self.stages[interim].tasks {
            let node = graph.task(task)?;

            let mut is_start = true;
            for channel_id in node.inputs.iter().flatten() {
                let producer = graph.channel(*channel_id)?.producer;
                if graph.contains_task(producer) && self.assigned[producer.0] == Some(interim) {
                    is_start = false;
                    break;
                }
            }

            let mut is_terminal = true;
            'outputs: for channel_id in node.outputs.iter().flatten() {
                for &(consumer, _) in &graph.channel(*channel_id)?.consumers {
                    if graph.contains_task(consumer) && self.assigned[consumer.0] == Some(interim) {
                        is_terminal = false;
                        break 'outputs;
                    }
                }
            }

            if is_start {
                start_tasks.insert(task);
            }
            if is_terminal {
                terminal_tasks.insert(task);
            }
        }
        Ok((start_tasks, terminal_tasks))
    }
}

#[cfg(test)]
mod tests {
    use super::{assign_stages, StageAssigner, StageAssignerConfig};
    use crate::execution_plan::{ExecutionPlan, ExecutionStage};
    use crate::task_graph::TaskGraph;
    use cfl_common::{CflError, TaskId};

    fn stage_containing(plan: &ExecutionPlan, task: TaskId) -> &ExecutionStage {
        plan.stages()
            .iter()
            .find(|s| s.tasks.contains(&task))
            .unwrap_or_else(|| panic!("no stage contains task {task}"))
    }

    #[test]
    fn single_platform_chain_collapses_to_one_stage() {
        let mut g = TaskGraph::new();
        let p = g.add_platform("sparklet");
        let src = g.add_task("Source", p, 0, 1).unwrap();
        let map = g.add_task("Map", p, 1, 1).unwrap();
        let sink = g.add_task("Sink", p, 1, 0).unwrap();
        g.connect(src, 0, map, 0).unwrap();
        g.connect(map, 0, sink, 0).unwrap();
        g.add_sink(sink).unwrap();

        let plan = assign_stages(&g).unwrap();
        assert_eq!(plan.stage_count(), 1);
        let stage = &plan.stages()[0];
        assert_eq!(stage.tasks.len(), 3);
        assert_eq!(stage.start_tasks.iter().copied().collect::<Vec<_>>(), [src]);
        assert_eq!(
            stage.terminal_tasks.iter().copied().collect::<Vec<_>>(),
            [sink]
        );
        assert_eq!(plan.entry_stages(), &[stage.id]);
        assert!(stage.successors.is_empty());
    }

    #[test]
    fn cross_platform_edge_cuts_two_stages() {
        let mut g = TaskGraph::new();
        let upstream = g.add_platform("javaflow");
        let downstream = g.add_platform("sparklet");
        let producer = g.add_task("Source", upstream, 0, 1).unwrap();
        let consumer = g.add_task("Sink", downstream, 1, 0).unwrap();
        let channel = g.connect(producer, 0, consumer, 0).unwrap();
        g.set_execution_breaker(channel).unwrap();
        g.add_sink(consumer).unwrap();

        let plan = assign_stages(&g).unwrap();
        assert_eq!(plan.stage_count(), 2);
        let producer_stage = stage_containing(&plan, producer);
        let consumer_stage = stage_containing(&plan, consumer);
        assert_ne!(producer_stage.id, consumer_stage.id);
        assert_eq!(producer_stage.platform, upstream);
        assert_eq!(consumer_stage.platform, downstream);
        assert_eq!(producer_stage.successors, [consumer_stage.id]);
        assert_eq!(plan.entry_stages(), &[producer_stage.id]);
    }

    #[test]
    fn same_platform_diamond_stays_one_stage() {
        let mut g = TaskGraph::new();
        let p = g.add_platform("sparklet");
        let source = g.add_task("Source", p, 0, 2).unwrap();
        let long_a = g.add_task("Map", p, 1, 1).unwrap();
        let long_b = g.add_task("Filter", p, 1, 1).unwrap();
        let short = g.add_task("Map", p, 1, 1).unwrap();
        let sink = g.add_task("Join", p, 2, 0).unwrap();
        g.connect(source, 0, long_a, 0).unwrap();
        g.connect(long_a, 0, long_b, 0).unwrap();
        g.connect(long_b, 0, sink, 0).unwrap();
        g.connect(source, 1, short, 0).unwrap();
        g.connect(short, 0, sink, 1).unwrap();
        g.add_sink(sink).unwrap();

        let plan = assign_stages(&g).unwrap();
        assert_eq!(plan.stage_count(), 1);
        assert_eq!(plan.stages()[0].tasks.len(), 5);
    }

    #[test]
    fn breaker_branch_splits_convergence_stage() {
        let mut g = TaskGraph::new();
        let home = g.add_platform("javaflow");
        let remote = g.add_platform("sparklet");
        let source = g.add_task("Source", home, 0, 2).unwrap();
        let offloaded = g.add_task("Reduce", remote, 1, 1).unwrap();
        let local = g.add_task("Map", home, 1, 1).unwrap();
        let sink = g.add_task("Join", home, 2, 0).unwrap();
        let to_remote = g.connect(source, 0, offloaded, 0).unwrap();
        let from_remote = g.connect(offloaded, 0, sink, 0).unwrap();
        g.connect(source, 1, local, 0).unwrap();
        g.connect(local, 0, sink, 1).unwrap();
        g.set_execution_breaker(to_remote).unwrap();
        g.set_execution_breaker(from_remote).unwrap();
        g.add_sink(sink).unwrap();

        let plan = assign_stages(&g).unwrap();
        assert_eq!(plan.stage_count(), 3);

        // The sink requires the remote stage via the offloaded branch, so it
        // is separated from the short-path tasks that feed it.
        let sink_stage = stage_containing(&plan, sink);
        assert_eq!(sink_stage.tasks.len(), 1);
        let short_path_stage = stage_containing(&plan, source);
        assert!(short_path_stage.tasks.contains(&local));
        let remote_stage = stage_containing(&plan, offloaded);
        assert_eq!(remote_stage.platform, remote);

        assert_eq!(plan.entry_stages(), &[short_path_stage.id]);
        assert!(short_path_stage.successors.contains(&remote_stage.id));
        assert!(short_path_stage.successors.contains(&sink_stage.id));
        assert_eq!(remote_stage.successors, [sink_stage.id]);

        // Both home-platform stages share one platform execution.
        assert_eq!(
            short_path_stage.platform_execution,
            sink_stage.platform_execution
        );
        assert_ne!(short_path_stage.sequence, sink_stage.sequence);
    }

    #[test]
    fn breaker_between_same_platform_tasks_does_not_split() {
        let mut g = TaskGraph::new();
        let p = g.add_platform("sparklet");
        let producer = g.add_task("Materialize", p, 0, 1).unwrap();
        let consumer = g.add_task("Sink", p, 1, 0).unwrap();
        let channel = g.connect(producer, 0, consumer, 0).unwrap();
        g.set_execution_breaker(channel).unwrap();
        g.add_sink(consumer).unwrap();

        let plan = assign_stages(&g).unwrap();
        assert_eq!(plan.stage_count(), 1);
        assert_eq!(plan.stages()[0].tasks.len(), 2);
    }

    #[test]
    fn incomplete_graph_is_rejected() {
        let mut g = TaskGraph::new();
        let p = g.add_platform("sparklet");
        let _src = g.add_task("Source", p, 0, 1).unwrap();
        let sink = g.add_task("Sink", p, 1, 0).unwrap();
        g.add_sink(sink).unwrap();
        // Sink input is never wired.
        let err = StageAssigner::new(&g).unwrap_err();
        assert!(matches!(err, CflError::IncompleteGraph(_)));
    }

    #[test]
    fn graph_without_sinks_is_rejected() {
        let mut g = TaskGraph::new();
        let p = g.add_platform("sparklet");
        let src = g.add_task("Source", p, 0, 1).unwrap();
        let sink = g.add_task("Sink", p, 1, 0).unwrap();
        g.connect(src, 0, sink, 0).unwrap();
        let err = StageAssigner::new(&g).unwrap_err();
        assert!(matches!(err, CflError::IncompleteGraph(_)));
    }

    #[test]
    fn dangling_producer_fails_fast() {
        let mut g = TaskGraph::new();
        let p = g.add_platform("sparklet");
        let source = g.add_task("Source", p, 0, 2).unwrap();
        let sink = g.add_task("Sink", p, 1, 0).unwrap();
        let side = g.add_task("Audit", p, 2, 0).unwrap();
        let feeder = g.add_task("Source", p, 0, 1).unwrap();
        g.connect(source, 0, sink, 0).unwrap();
        g.connect(source, 1, side, 0).unwrap();
        g.connect(feeder, 0, side, 1).unwrap();
        g.add_sink(sink).unwrap();

        // Corrupt the feeder channel's producer reference. The sink cone is
        // still closed, so the run starts and must fail during expansion.
        let mut value = serde_json::to_value(&g).unwrap();
        value["channels"][2]["producer"] = serde_json::json!(999);
        let g: TaskGraph = serde_json::from_value(value).unwrap();

        let err = assign_stages(&g).unwrap_err();
        assert!(matches!(err, CflError::UnknownProducer(_)));
    }

    #[test]
    fn round_bound_rejects_unstable_refinement() {
        let mut g = TaskGraph::new();
        let home = g.add_platform("javaflow");
        let remote = g.add_platform("sparklet");
        let source = g.add_task("Source", home, 0, 2).unwrap();
        let offloaded = g.add_task("Reduce", remote, 1, 1).unwrap();
        let local = g.add_task("Map", home, 1, 1).unwrap();
        let sink = g.add_task("Join", home, 2, 0).unwrap();
        let to_remote = g.connect(source, 0, offloaded, 0).unwrap();
        let from_remote = g.connect(offloaded, 0, sink, 0).unwrap();
        g.connect(source, 1, local, 0).unwrap();
        g.connect(local, 0, sink, 1).unwrap();
        g.set_execution_breaker(to_remote).unwrap();
        g.set_execution_breaker(from_remote).unwrap();
        g.add_sink(sink).unwrap();

        // This graph needs two rounds to stabilize.
        let assigner = StageAssigner::with_config(
            &g,
            StageAssignerConfig {
                max_refinement_rounds: 1,
            },
        )
        .unwrap();
        let err = assigner.run().unwrap_err();
        assert!(matches!(err, CflError::FixpointOverrun(1)));
    }
}
