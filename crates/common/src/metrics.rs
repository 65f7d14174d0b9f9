use std::sync::{Arc, OnceLock};

use prometheus::{
    CounterVec, Encoder, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};

/// Registry of stage-compiler metric families.
///
/// Cheap to clone; all clones share one underlying registry.
#[derive(Clone, Debug)]
pub struct MetricsRegistry {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    registry: Registry,
    plans_compiled: CounterVec,
    stages_discovered: CounterVec,
    stage_splits: CounterVec,
    refinement_rounds: Histogram,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::new()),
        }
    }

    /// Record one finished compilation run and the mark/sweep rounds it took.
    pub fn record_compilation(&self, outcome: &str, rounds: u64) {
        self.inner
            .plans_compiled
            .with_label_values(&[outcome])
            .inc();
        self.inner.refinement_rounds.observe(rounds as f64);
    }

    pub fn inc_stages_discovered(&self, platform: &str) {
        self.inner
            .stages_discovered
            .with_label_values(&[platform])
            .inc();
    }

    pub fn inc_stage_splits(&self, platform: &str) {
        self.inner
            .stage_splits
            .with_label_values(&[platform])
            .inc();
    }

    pub fn render_prometheus(&self) -> String {
        let metric_families = self.inner.registry.gather();
        let mut out = Vec::new();
        let enc = TextEncoder::new();
        if enc.encode(&metric_families, &mut out).is_err() {
            return String::new();
        }
        String::from_utf8_lossy(&out).to_string()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsInner {
    fn new() -> Self {
        let registry = Registry::new();

        let plans_compiled = counter_vec(
            &registry,
            "cfl_planner_plans_compiled_total",
            "Compilation runs by outcome",
            &["outcome"],
        );
        let stages_discovered = counter_vec(
            &registry,
            "cfl_planner_stages_discovered_total",
            "Interim stages created during seed discovery",
            &["platform"],
        );
        let stage_splits = counter_vec(
            &registry,
            "cfl_planner_stage_splits_total",
            "Interim stages split off during refinement",
            &["platform"],
        );
        let refinement_rounds = histogram(
            &registry,
            "cfl_planner_refinement_rounds",
            "Mark/sweep rounds until fixpoint",
        );

        Self {
            registry,
            plans_compiled,
            stages_discovered,
            stage_splits,
            refinement_rounds,
        }
    }
}

fn counter_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> CounterVec {
    let c = CounterVec::new(Opts::new(name, help), labels).expect("counter vec");
    registry
        .register(Box::new(c.clone()))
        .expect("register counter");
    c
}

fn histogram(registry: &Registry, name: &str, help: &str) -> Histogram {
    let h = Histogram::with_opts(HistogramOpts::new(name, help)).expect("histogram");
    registry
        .register(Box::new(h.clone()))
        .expect("register histogram");
    h
}

static GLOBAL_METRICS: OnceLock<MetricsRegistry> = OnceLock::new();

pub fn global_metrics() -> &'static MetricsRegistry {
    GLOBAL_METRICS.get_or_init(MetricsRegistry::new)
}

#[cfg(test)]
mod tests {
    use super::MetricsRegistry;

    #[test]
    fn renders_prometheus_text() {
        let m = MetricsRegistry::new();
        m.record_compilation("ok", 2);
        let text = m.render_prometheus();
        assert!(text.contains("cfl_planner_plans_compiled_total"));
        assert!(text.contains("outcome=\"ok\""));
    }

    #[test]
    fn renders_all_metric_families() {
        let m = MetricsRegistry::new();
        m.record_compilation("ok", 1);
        m.inc_stages_discovered("sparklet");
        m.inc_stage_splits("sparklet");
        let text = m.render_prometheus();

        assert!(text.contains("cfl_planner_plans_compiled_total"));
        assert!(text.contains("cfl_planner_stages_discovered_total"));
        assert!(text.contains("cfl_planner_stage_splits_total"));
        assert!(text.contains("cfl_planner_refinement_rounds"));
        assert!(text.contains("sparklet"));
    }
}
