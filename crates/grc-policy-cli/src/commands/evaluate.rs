use anyhow::{Context, Result, bail};
use colored::Colorize;
use grc_policy::{EngineConfig, EvaluationOutcome, PolicyContext, PolicyEngine, ResourceWrapper};
use serde_json::{Value, json};
use tokio::io::AsyncReadExt;

use crate::cli::{EvaluateArgs, OutputFormat};
use crate::output::{print_error, print_success, print_value, print_warning, table};

pub async fn run(config: &EngineConfig, args: &EvaluateArgs, format: OutputFormat) -> Result<()> {
    let content = match &args.file {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => {
            let mut buf = String::new();
            tokio::io::stdin().read_to_string(&mut buf).await?;
            buf
        }
    };
    let resource: Value = serde_json::from_str(&content).context("Resource must be a JSON document")?;

    let engine = PolicyEngine::from_config(config);
    // Surface load errors here instead of silently failing open.
    engine.get_policy().await.context("Failed to load policy")?;

    let mut builder = PolicyContext::builder()
        .resource_type(&args.resource_type)
        .action(&args.action)
        .environment(&args.environment);
    builder = if args.wrapper {
        let wrapper: ResourceWrapper =
            serde_json::from_value(resource).context("Resource is not a valid envelope")?;
        builder.resource(wrapper)
    } else {
        builder.resource(resource)
    };
    if let Some(principal) = &args.principal {
        builder = builder.principal(principal, args.roles.iter().cloned());
    }
    if let Some(tenant) = &args.tenant {
        builder = builder.tenant(tenant);
    }
    if let Some(correlation_id) = &args.correlation_id {
        builder = builder.correlation_id(correlation_id);
    }
    let mut context = builder.build()?;

    let outcome = engine.evaluate(&mut context).await;

    if matches!(format, OutputFormat::Table) {
        print_outcome(&outcome, &context);
    } else {
        print_value(
            &json!({
                "correlationId": context.correlation_id,
                "outcome": outcome,
                "resource": context.resource_value(),
            }),
            format,
        )?;
    }

    if args.fail_on_deny && outcome.is_denied() {
        bail!(outcome.final_decision.to_violation(&context.correlation_id));
    }
    Ok(())
}

fn print_outcome(outcome: &EvaluationOutcome, context: &PolicyContext) {
    let rows = outcome.evaluations.iter().map(|evaluation| {
        let failed: Vec<&str> = evaluation
            .failed_conditions()
            .map(|c| c.message.as_str())
            .collect();
        [
            evaluation.priority.map_or_else(|| "-".to_string(), |p| p.to_string()),
            evaluation.rule_id.clone(),
            if evaluation.matched { "yes".to_string() } else { "no".to_string() },
            failed.join("; "),
        ]
    });
    println!("{}", table(["Priority", "Rule", "Matched", "Failed conditions"], rows));

    for failure in &outcome.mutations.failures {
        print_warning(&format!("mutation failed: {failure}"));
    }

    let decision = &outcome.final_decision;
    let rule = decision.matched_rule_id.as_deref().unwrap_or("(default)");
    let message = decision.message.as_deref().unwrap_or("");
    if let Some(error) = &outcome.engine_error {
        print_warning(&format!("engine error, request allowed: {error}"));
    }
    if outcome.is_denied() {
        print_error(&format!("{} by {rule}: {message}", "DENY".red().bold()));
        if let Some(hint) = &decision.remediation_hint {
            println!("  {}: {hint}", "Hint".cyan());
        }
    } else {
        print_success(&format!(
            "{} by {rule} ({} mutation(s) applied)",
            decision.effect.as_str().to_uppercase().green().bold(),
            outcome.mutations.applied
        ));
    }
    println!("  {}: {}", "Correlation".cyan(), context.correlation_id);
}
