use thiserror::Error;

use crate::ids::{ChannelId, PlatformId, StageId, TaskId};

/// Canonical CrossFlow error taxonomy used across crates.
///
/// Every variant is a fatal precondition or programmer error: the stage
/// compiler is deterministic and pure, so retrying a failed run with the same
/// input is pointless. The fix is to repair the input graph upstream.
///
/// Classification guidance:
/// - [`CflError::InvalidGraph`]: construction-time contract violations on the
///   task graph (bad slot index, already-wired input slot, unknown id)
/// - [`CflError::IncompleteGraph`]: the graph is not structurally closed for
///   traversal when a run begins
/// - [`CflError::DoubleAssignment`] / [`CflError::PlatformMismatch`] /
///   [`CflError::UnknownProducer`]: traversal invariant violations that signal
///   a logic bug or a corrupted graph, never silently corrected
/// - [`CflError::FixpointOverrun`]: the refinement loop exceeded its round
///   bound, which only happens for malformed (cyclic) input
#[derive(Debug, Error)]
pub enum CflError {
    /// Invalid or inconsistent task graph construction.
    #[error("invalid task graph: {0}")]
    InvalidGraph(String),

    /// The task graph is not structurally closed for traversal.
    #[error("incomplete task graph: {0}")]
    IncompleteGraph(String),

    /// A task was assigned to a second stage.
    #[error("task {task} reassigned from stage {assigned} to stage {attempted}")]
    DoubleAssignment {
        /// The doubly assigned task.
        task: TaskId,
        /// Stage the task already belongs to.
        assigned: StageId,
        /// Stage the task was about to be placed into.
        attempted: StageId,
    },

    /// A task was placed directly into a stage bound to a different platform,
    /// bypassing the seed-requeue path.
    #[error("platform mismatch: task {task} on platform {task_platform} cannot join a stage on platform {stage_platform}")]
    PlatformMismatch {
        /// The misplaced task.
        task: TaskId,
        /// Platform the task is bound to.
        task_platform: PlatformId,
        /// Platform the target stage is bound to.
        stage_platform: PlatformId,
    },

    /// A channel is missing its producer during upstream expansion.
    #[error("channel {0} has no producer")]
    UnknownProducer(ChannelId),

    /// The mark/sweep refinement loop did not stabilize within its round
    /// bound.
    #[error("stage refinement did not stabilize within {0} rounds; input graph may be cyclic")]
    FixpointOverrun(usize),
}

/// Standard CrossFlow result alias.
pub type Result<T> = std::result::Result<T, CflError>;
