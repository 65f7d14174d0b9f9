use serde::{Deserialize, Serialize};
use tracing::warn;

use cfl_common::{CflError, ChannelId, PlatformId, Result, TaskId};

/// A platform registered on a task graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformSpec {
    /// Display name (for example `sparklet`, `javaflow`).
    pub name: String,
}

/// One unit of platform-bound computation.
///
/// Slots are ordered and fixed-arity; a slot holds no channel until the graph
/// is wired. Tasks reference channels by id and do not own them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskNode {
    /// Operator display name (diagnostics only).
    pub operator: String,
    /// Executing platform.
    pub platform: PlatformId,
    /// Input slots; `None` until wired.
    pub inputs: Vec<Option<ChannelId>>,
    /// Output slots; `None` until wired.
    pub outputs: Vec<Option<ChannelId>>,
}

/// Directed data hand-off from one producer slot to one or more consumers.
///
/// Fan-out is allowed; fan-in is not (a channel has exactly one producer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelEdge {
    /// Producing task.
    pub producer: TaskId,
    /// Producer output slot.
    pub producer_slot: usize,
    /// Consuming `(task, input_slot)` pairs.
    pub consumers: Vec<(TaskId, usize)>,
    /// Optional cardinality estimate (diagnostics/cost only; the partitioning
    /// logic never reads it).
    pub cardinality: Option<u64>,
    /// Whether this hand-off cannot be pipelined within one stage. Supplied
    /// by the channel-materialization layer; the sole boundary signal beyond
    /// platform mismatch.
    pub execution_breaker: bool,
}

/// Preliminary execution plan: platform-annotated tasks wired by channels,
/// plus the designated sink (plan-exit) tasks.
///
/// Tasks and channels live in index-addressed arenas; ids issued by the
/// mutation API index those arenas directly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskGraph {
    platforms: Vec<PlatformSpec>,
    tasks: Vec<TaskNode>,
    channels: Vec<ChannelEdge>,
    sinks: Vec<TaskId>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a platform and return its id.
    pub fn add_platform(&mut self, name: impl Into<String>) -> PlatformId {
        let id = PlatformId(self.platforms.len());
        self.platforms.push(PlatformSpec { name: name.into() });
        id
    }

    /// Add a task with fixed input/output slot arity.
    pub fn add_task(
        &mut self,
        operator: impl Into<String>,
        platform: PlatformId,
        num_inputs: usize,
        num_outputs: usize,
    ) -> Result<TaskId> {
        if platform.0 >= self.platforms.len() {
            return Err(CflError::InvalidGraph(format!(
                "unknown platform {platform}"
            )));
        }
        let id = TaskId(self.tasks.len());
        self.tasks.push(TaskNode {
            operator: operator.into(),
            platform,
            inputs: vec![None; num_inputs],
            outputs: vec![None; num_outputs],
        });
        Ok(id)
    }

    /// Wire `producer`'s output slot to `consumer`'s input slot.
    ///
    /// If the producer slot already carries a channel, the consumer is added
    /// to that channel (fan-out); otherwise a new channel is created. The
    /// consumer input slot must be unwired.
    pub fn connect(
        &mut self,
        producer: TaskId,
        output_slot: usize,
        consumer: TaskId,
        input_slot: usize,
    ) -> Result<ChannelId> {
        self.check_task(producer)?;
        self.check_task(consumer)?;
        if output_slot >= self.tasks[producer.0].outputs.len() {
            return Err(CflError::InvalidGraph(format!(
                "task {producer} has no output slot {output_slot}"
            )));
        }
        if input_slot >= self.tasks[consumer.0].inputs.len() {
            return Err(CflError::InvalidGraph(format!(
                "task {consumer} has no input slot {input_slot}"
            )));
        }
        if self.tasks[consumer.0].inputs[input_slot].is_some() {
            return Err(CflError::InvalidGraph(format!(
                "input slot {input_slot} of task {consumer} is already wired"
            )));
        }

        let channel = match self.tasks[producer.0].outputs[output_slot] {
            Some(existing) => {
                self.channels[existing.0].consumers.push((consumer, input_slot));
                existing
            }
            None => {
                let id = ChannelId(self.channels.len());
                self.channels.push(ChannelEdge {
                    producer,
                    producer_slot: output_slot,
                    consumers: vec![(consumer, input_slot)],
                    cardinality: None,
                    execution_breaker: false,
                });
                self.tasks[producer.0].outputs[output_slot] = Some(id);
                id
            }
        };
        self.tasks[consumer.0].inputs[input_slot] = Some(channel);
        Ok(channel)
    }

    /// Flag a channel as forcing a stage boundary at that hand-off.
    pub fn set_execution_breaker(&mut self, channel: ChannelId) -> Result<()> {
        self.check_channel(channel)?;
        self.channels[channel.0].execution_breaker = true;
        Ok(())
    }

    /// Attach a cardinality estimate to a channel.
    pub fn set_cardinality(&mut self, channel: ChannelId, rows: u64) -> Result<()> {
        self.check_channel(channel)?;
        self.channels[channel.0].cardinality = Some(rows);
        Ok(())
    }

    /// Designate a task as a plan exit point.
    pub fn add_sink(&mut self, task: TaskId) -> Result<()> {
        self.check_task(task)?;
        if !self.sinks.contains(&task) {
            self.sinks.push(task);
        }
        Ok(())
    }

    fn check_task(&self, id: TaskId) -> Result<()> {
        if id.0 >= self.tasks.len() {
            return Err(CflError::InvalidGraph(format!("unknown task {id}")));
        }
        Ok(())
    }

    fn check_channel(&self, id: ChannelId) -> Result<()> {
        if id.0 >= self.channels.len() {
            return Err(CflError::InvalidGraph(format!("unknown channel {id}")));
        }
        Ok(())
    }

    pub fn task(&self, id: TaskId) -> Result<&TaskNode> {
        self.tasks
            .get(id.0)
            .ok_or_else(|| CflError::InvalidGraph(format!("unknown task {id}")))
    }

    pub fn channel(&self, id: ChannelId) -> Result<&ChannelEdge> {
        self.channels
            .get(id.0)
            .ok_or_else(|| CflError::InvalidGraph(format!("unknown channel {id}")))
    }

    pub fn contains_task(&self, id: TaskId) -> bool {
        id.0 < self.tasks.len()
    }

    pub fn platform_name(&self, id: PlatformId) -> Option<&str> {
        self.platforms.get(id.0).map(|p| p.name.as_str())
    }

    pub fn platform_count(&self) -> usize {
        self.platforms.len()
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Iterate all tasks with their ids.
    pub fn tasks(&self) -> impl Iterator<Item = (TaskId, &TaskNode)> {
        self.tasks.iter().enumerate().map(|(i, t)| (TaskId(i), t))
    }

    /// Iterate all channels with their ids.
    pub fn channels(&self) -> impl Iterator<Item = (ChannelId, &ChannelEdge)> {
        self.channels
            .iter()
            .enumerate()
            .map(|(i, c)| (ChannelId(i), c))
    }

    /// Designated plan exit points.
    pub fn sinks(&self) -> &[TaskId] {
        &self.sinks
    }

    /// Emit one warning per unwired slot.
    ///
    /// An unwired slot is tolerated only when [`TaskGraph::is_complete`]
    /// independently confirms the graph is usable for traversal.
    pub fn log_unwired_slots(&self) {
        for (idx, task) in self.tasks.iter().enumerate() {
            for (slot, channel) in task.inputs.iter().enumerate() {
                if channel.is_none() {
                    warn!(
                        task_id = idx,
                        slot,
                        operator = %task.operator,
                        "task has no input channel wired"
                    );
                }
            }
            for (slot, channel) in task.outputs.iter().enumerate() {
                if channel.is_none() {
                    warn!(
                        task_id = idx,
                        slot,
                        operator = %task.operator,
                        "task has no output channel wired"
                    );
                }
            }
        }
    }

    /// Whether the graph is structurally closed for traversal: at least one
    /// sink, and every task reachable upstream from the sinks has all input
    /// slots wired to channels with valid producers.
    ///
    /// Output slots are not checked here; a dangling diagnostic output does
    /// not prevent traversal, only triggers a wiring warning.
    pub fn is_complete(&self) -> bool {
        if self.sinks.is_empty() {
            return false;
        }
        let mut visited = vec![false; self.tasks.len()];
        let mut pending: Vec<TaskId> = Vec::new();
        for &sink in &self.sinks {
            if !self.contains_task(sink) {
                return false;
            }
            pending.push(sink);
        }
        while let Some(task) = pending.pop() {
            if visited[task.0] {
                continue;
            }
            visited[task.0] = true;
            for slot in &self.tasks[task.0].inputs {
                let Some(channel) = slot else {
                    return false;
                };
                let Some(edge) = self.channels.get(channel.0) else {
                    return false;
                };
                if !self.contains_task(edge.producer) {
                    return false;
                }
                pending.push(edge.producer);
            }
        }
        true
    }
}
