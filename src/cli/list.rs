use anyhow::Result;
use serde::Serialize;

use super::output::{render_structured, OutputFormat};
use crate::scenarios::builtin_registry;

#[derive(Debug, Serialize)]
struct ScenarioEntry<'a> {
    id: &'a str,
    start_time: f64,
    duration_s: Option<f64>,
    prompt: Option<&'a str>,
}

pub async fn cmd_list(output: OutputFormat) -> Result<()> {
    let registry = builtin_registry()?;
    let entries: Vec<ScenarioEntry<'_>> = registry
        .iter()
        .map(|scenario| ScenarioEntry {
            id: scenario.id(),
            start_time: scenario.start_time(),
            duration_s: scenario.duration().map(|budget| budget.as_secs_f64()),
            prompt: scenario.user_prompt(),
        })
        .collect();

    if let Some(rendered) = render_structured(&entries, output)? {
        println!("{rendered}");
        return Ok(());
    }
    println!("Registered scenarios:");
    for entry in &entries {
        let budget = entry
            .duration_s
            .map(|secs| format!("{secs}s"))
            .unwrap_or_else(|| "unbounded".to_string());
        println!("  {:<42} {budget}", entry.id);
        if let Some(prompt) = entry.prompt {
            println!("      {prompt}");
        }
    }
    Ok(())
}
