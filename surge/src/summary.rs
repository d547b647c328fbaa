use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;

use surge_metrics::{HistogramSummary, Metric, MetricSeriesSummary, MetricValue};

#[derive(Debug, Default)]
struct StepTotals {
    latency: Option<HistogramSummary>,
    failed_no_response: u64,
    failed_bad_response: u64,
}

#[derive(Debug, Default)]
struct ScenarioTotals {
    iterations: Option<HistogramSummary>,
    iterations_failed: u64,
    steps: BTreeMap<String, StepTotals>,
}

/// Renders the end-of-run report from the registry's series.
pub(crate) fn render(series: &[MetricSeriesSummary], run_elapsed: Duration) -> String {
    let scenarios = collect(series);

    let mut out = String::new();
    if scenarios.is_empty() {
        out.push_str("summary: no iterations recorded\n");
        return out;
    }

    writeln!(&mut out, "summary (elapsed {})", format_duration(run_elapsed)).ok();
    for (name, s) in &scenarios {
        let ok = s.iterations.as_ref().map_or(0, |h| h.count);
        writeln!(&mut out, "scenario: {name}").ok();
        writeln!(
            &mut out,
            "  iterations: {} (failed {})",
            ok + s.iterations_failed,
            s.iterations_failed
        )
        .ok();
        if let Some(h) = &s.iterations {
            writeln!(&mut out, "  iteration latency = {}", format_latency(h)).ok();
        }

        for (step, t) in &s.steps {
            let ok = t.latency.as_ref().map_or(0, |h| h.count);
            writeln!(
                &mut out,
                "  step {step}: ok {ok} failed {} (no response {})",
                t.failed_no_response + t.failed_bad_response,
                t.failed_no_response
            )
            .ok();
            if let Some(h) = &t.latency {
                writeln!(&mut out, "    latency = {}", format_latency(h)).ok();
            }
        }
        out.push('\n');
    }
    out
}

fn collect(series: &[MetricSeriesSummary]) -> BTreeMap<String, ScenarioTotals> {
    let step_success = Metric::StepSuccess.to_string();
    let step_failed = Metric::StepFailed.to_string();
    let iteration_success = Metric::IterationSuccess.to_string();
    let iteration_failed = Metric::IterationFailed.to_string();

    let mut out: BTreeMap<String, ScenarioTotals> = BTreeMap::new();
    for s in series {
        let Some(scenario) = s.tag("scenario_name") else {
            continue;
        };
        let step = s.tag("step_name");

        match (&s.values, step) {
            (MetricValue::Histogram(h), None) if s.name == iteration_success => {
                out.entry(scenario.to_string()).or_default().iterations = Some(h.clone());
            }
            (MetricValue::Counter(n), None) if s.name == iteration_failed => {
                out.entry(scenario.to_string()).or_default().iterations_failed += n;
            }
            (MetricValue::Histogram(h), Some(step)) if s.name == step_success => {
                step_entry(&mut out, scenario, step).latency = Some(h.clone());
            }
            (MetricValue::Counter(n), Some(step)) if s.name == step_failed => {
                let t = step_entry(&mut out, scenario, step);
                if s.tag("no_response") == Some("true") {
                    t.failed_no_response += n;
                } else {
                    t.failed_bad_response += n;
                }
            }
            _ => {}
        }
    }
    out
}

fn step_entry<'a>(
    out: &'a mut BTreeMap<String, ScenarioTotals>,
    scenario: &str,
    step: &str,
) -> &'a mut StepTotals {
    out.entry(scenario.to_string())
        .or_default()
        .steps
        .entry(step.to_string())
        .or_default()
}

fn format_latency(h: &HistogramSummary) -> String {
    format!(
        "p50={} p90={} p99={} mean={} max={} (n={})",
        format_micros(h.p50),
        format_micros(h.p90),
        format_micros(h.p99),
        format_micros(h.mean),
        format_micros(h.max),
        h.count
    )
}

fn format_micros(us: Option<f64>) -> String {
    match us {
        Some(us) if us.is_finite() && us >= 0.0 => format_duration(Duration::from_secs_f64(us / 1e6)),
        _ => "-".to_string(),
    }
}

// Single rounded component in one of: us, ms, s.
fn format_duration(d: Duration) -> String {
    let ns = d.as_nanos();
    let round_div = |unit: u128| (ns + unit / 2) / unit;
    if ns >= 1_000_000_000 {
        format!("{}s", round_div(1_000_000_000))
    } else if ns >= 1_000_000 {
        format!("{}ms", round_div(1_000_000))
    } else {
        format!("{}us", round_div(1_000))
    }
}
