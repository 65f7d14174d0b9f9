use cfl_common::ChannelId;

use crate::execution_plan::ExecutionPlan;
use crate::task_graph::TaskGraph;

/// Render a task graph as human-readable multiline text.
pub fn explain_task_graph(graph: &TaskGraph) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "TaskGraph tasks={} channels={} sinks={:?}\n",
        graph.task_count(),
        graph.channel_count(),
        graph.sinks().iter().map(|t| t.0).collect::<Vec<_>>()
    ));
    for (id, task) in graph.tasks() {
        let platform = graph.platform_name(task.platform).unwrap_or("unknown");
        out.push_str(&format!(
            "  t{id} {} platform={platform} inputs={} outputs={}\n",
            task.operator,
            fmt_slots(&task.inputs),
            fmt_slots(&task.outputs),
        ));
    }
    for (id, channel) in graph.channels() {
        let consumers = channel
            .consumers
            .iter()
            .map(|(task, slot)| format!("t{task}@{slot}"))
            .collect::<Vec<_>>()
            .join(", ");
        out.push_str(&format!(
            "  c{id} t{}@{} -> [{consumers}]",
            channel.producer, channel.producer_slot
        ));
        if channel.execution_breaker {
            out.push_str(" breaker");
        }
        if let Some(rows) = channel.cardinality {
            out.push_str(&format!(" cardinality=~{rows}"));
        }
        out.push('\n');
    }
    out
}

/// Render an execution plan as human-readable multiline text.
///
/// The graph provides platform and operator names; it must be the graph the
/// plan was compiled from.
pub fn explain_execution_plan(plan: &ExecutionPlan, graph: &TaskGraph) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "ExecutionPlan stages={} entry={:?}\n",
        plan.stage_count(),
        plan.entry_stages().iter().map(|s| s.0).collect::<Vec<_>>()
    ));
    for stage in plan.stages() {
        let platform = graph.platform_name(stage.platform).unwrap_or("unknown");
        let successors = stage
            .successors
            .iter()
            .map(|s| s.0.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        out.push_str(&format!(
            "  stage {} [{platform}:{}] successors=[{successors}]\n",
            stage.id, stage.sequence
        ));
        for &task in &stage.tasks {
            let operator = graph
                .task(task)
                .map(|t| t.operator.clone())
                .unwrap_or_else(|_| "?".to_string());
            let mut markers = Vec::new();
            if stage.start_tasks.contains(&task) {
                markers.push("start");
            }
            if stage.terminal_tasks.contains(&task) {
                markers.push("terminal");
            }
            out.push_str(&format!("    t{task} {operator}"));
            if !markers.is_empty() {
                out.push_str(&format!(" ({})", markers.join("|")));
            }
            out.push('\n');
        }
    }
    out
}

fn fmt_slots(slots: &[Option<ChannelId>]) -> String {
    let rendered = slots
        .iter()
        .map(|slot| match slot {
            Some(channel) => format!("c{channel}"),
            None => "_".to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!("[{rendered}]")
}

#[cfg(test)]
mod tests {
    use super::{explain_execution_plan, explain_task_graph};
    use crate::stage_assignment::assign_stages;
    use crate::task_graph::TaskGraph;

    #[test]
    fn renders_graph_and_plan() {
        let mut g = TaskGraph::new();
        let home = g.add_platform("javaflow");
        let remote = g.add_platform("sparklet");
        let src = g.add_task("Source", home, 0, 1).unwrap();
        let sink = g.add_task("Sink", remote, 1, 0).unwrap();
        let channel = g.connect(src, 0, sink, 0).unwrap();
        g.set_execution_breaker(channel).unwrap();
        g.set_cardinality(channel, 1000).unwrap();
        g.add_sink(sink).unwrap();

        let graph_text = explain_task_graph(&g);
        assert!(graph_text.contains("t0 Source platform=javaflow"));
        assert!(graph_text.contains("c0 t0@0 -> [t1@0] breaker cardinality=~1000"));

        let plan = assign_stages(&g).unwrap();
        let plan_text = explain_execution_plan(&plan, &g);
        assert!(plan_text.contains("ExecutionPlan stages=2"));
        assert!(plan_text.contains("[javaflow:0]"));
        assert!(plan_text.contains("t1 Sink (start|terminal)"));
    }
}
