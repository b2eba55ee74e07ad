use std::fmt::Write as _;

use anyhow::Result;
use clap::ValueEnum;
use serde::Serialize;

use agentsim_event_graph::EventStatus;

use crate::scenario::ScenarioOutcome;

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
    Yaml,
}

/// Serializes `value` for the structured formats; `None` for text.
pub fn render_structured<T: Serialize>(value: &T, format: OutputFormat) -> Result<Option<String>> {
    Ok(match format {
        OutputFormat::Text => None,
        OutputFormat::Json => Some(serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => Some(serde_yaml::to_string(value)?),
    })
}

pub fn render_outcome(outcome: &ScenarioOutcome, format: OutputFormat) -> Result<String> {
    if let Some(rendered) = render_structured(outcome, format)? {
        return Ok(rendered);
    }
    let report = &outcome.report;
    let mut out = String::new();
    writeln!(out, "Scenario: {}", outcome.scenario)?;
    writeln!(
        out,
        "Run:      {} ({:?}, {:?} clock, {} ms)",
        report.run_id, report.status, report.clock, report.elapsed_ms
    )?;
    writeln!(out, "Events:")?;
    for record in &report.events {
        let at = record
            .finished_ms
            .map(|ms| format!("{:.3}s", outcome.world_time(ms)))
            .unwrap_or_else(|| "-".to_string());
        write!(
            out,
            "  {:<9} {:<13} {:<50} {:<9} {}",
            record.id,
            format!("{:?}", record.kind),
            record.target,
            format!("{:?}", record.status),
            at
        )?;
        if let Some(err) = record.error() {
            write!(out, "  {err}")?;
        }
        writeln!(out)?;
    }
    if !report.oracle.is_empty() {
        writeln!(
            out,
            "Oracle:   {}/{} satisfied by the agent",
            report.oracle_satisfied(),
            report.oracle.len()
        )?;
    }
    let validation = &outcome.validation;
    let verdict = if validation.verdict { "PASS" } else { "FAIL" };
    write!(out, "Verdict:  {verdict}")?;
    if let Some(score) = validation.score {
        write!(out, " (score {score:.2})")?;
    }
    if let Some(feedback) = &validation.feedback {
        write!(out, " - {feedback}")?;
    }
    if let Some(error) = &validation.error {
        write!(out, " [error: {error}]")?;
    }
    writeln!(out)?;
    let pending = report.count(EventStatus::Pending) + report.count(EventStatus::Ready);
    if pending > 0 {
        writeln!(out, "Warning:  {pending} events never reached a terminal state")?;
    }
    if let Some(trace) = &outcome.trace {
        writeln!(out, "Trace:    {}", trace.display())?;
    }
    Ok(out)
}
