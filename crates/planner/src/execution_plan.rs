use std::collections::{BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};

use cfl_common::{PlatformId, StageId, TaskId};

/// Logical grouping of all stages that execute under one platform runtime
/// instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformExecution {
    /// Platform shared by every member stage.
    pub platform: PlatformId,
    /// Member stages, in sequence order.
    pub stages: Vec<StageId>,
}

/// Immutable, schedulable unit of same-platform tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionStage {
    /// Stage id within the plan.
    pub id: StageId,
    /// Executing platform.
    pub platform: PlatformId,
    /// Owning entry in [`ExecutionPlan::platform_executions`].
    pub platform_execution: usize,
    /// Sequence number within the platform execution.
    pub sequence: usize,
    /// Member tasks.
    pub tasks: BTreeSet<TaskId>,
    /// Tasks with no same-stage producer.
    pub start_tasks: BTreeSet<TaskId>,
    /// Tasks with no same-stage consumer. A task may be both a start and a
    /// terminal task, or neither.
    pub terminal_tasks: BTreeSet<TaskId>,
    /// Downstream stages fed by this stage.
    pub successors: Vec<StageId>,
    /// Number of distinct upstream stages feeding this stage.
    pub predecessor_count: usize,
}

/// The compiled stage DAG.
///
/// Entry stages have no predecessor; every other stage is reachable from an
/// entry stage via successor edges. The plan is immutable once assembled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    stages: Vec<ExecutionStage>,
    entry_stages: Vec<StageId>,
    platform_executions: Vec<PlatformExecution>,
}

impl ExecutionPlan {
    pub(crate) fn new(
        stages: Vec<ExecutionStage>,
        mut platform_executions: Vec<PlatformExecution>,
    ) -> Self {
        for execution in &mut platform_executions {
            execution
                .stages
                .sort_by_key(|id| stages[id.0].sequence);
        }
        let entry_stages = stages
            .iter()
            .filter(|s| s.predecessor_count == 0)
            .map(|s| s.id)
            .collect();
        Self {
            stages,
            entry_stages,
            platform_executions,
        }
    }

    /// Stages with no predecessor; the scheduler starts here.
    pub fn entry_stages(&self) -> &[StageId] {
        &self.entry_stages
    }

    pub fn stage(&self, id: StageId) -> Option<&ExecutionStage> {
        self.stages.get(id.0)
    }

    /// All stages, indexed by [`StageId`].
    pub fn stages(&self) -> &[ExecutionStage] {
        &self.stages
    }

    pub fn platform_executions(&self) -> &[PlatformExecution] {
        &self.platform_executions
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Total number of tasks across all stages.
    pub fn task_count(&self) -> usize {
        self.stages.iter().map(|s| s.tasks.len()).sum()
    }

    /// Stages in a valid execution order (every stage after all of its
    /// predecessors). The length equals [`ExecutionPlan::stage_count`]
    /// because the successor relation is acyclic by construction.
    pub fn topological_order(&self) -> Vec<StageId> {
        let mut indegree: Vec<usize> =
            self.stages.iter().map(|s| s.predecessor_count).collect();
        let mut ready: VecDeque<StageId> = self.entry_stages.iter().copied().collect();
        let mut order = Vec::with_capacity(self.stages.len());
        while let Some(id) = ready.pop_front() {
            order.push(id);
            for &succ in &self.stages[id.0].successors {
                indegree[succ.0] -= 1;
                if indegree[succ.0] == 0 {
                    ready.push_back(succ);
                }
            }
        }
        order
    }
}
