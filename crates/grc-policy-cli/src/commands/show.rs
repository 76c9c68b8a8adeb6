use anyhow::{Context, Result};
use colored::Colorize;
use grc_policy::{EngineConfig, PolicyStore, Rule, RuleMatcher};

use crate::cli::{OutputFormat, ShowArgs};
use crate::output::{print_value, table};

pub async fn run(config: &EngineConfig, args: &ShowArgs, format: OutputFormat) -> Result<()> {
    let store = PolicyStore::from_config(&config.store);
    let document = store.get_policy().await.context("Failed to load policy")?;

    let rules: Vec<&Rule> = match (&args.resource_type, &args.environment) {
        (Some(resource_type), Some(environment)) => {
            RuleMatcher::new().applicable_rules(&document, resource_type, environment)
        }
        _ => document.rules().iter().collect(),
    };

    if !matches!(format, OutputFormat::Table) {
        return match &args.resource_type {
            Some(_) => print_value(&rules, format),
            None => print_value(&*document, format),
        };
    }

    println!("{}: {}", "Policy".cyan(), document.metadata.name);
    println!("{}: {}", "Version".cyan(), document.metadata.version);
    if let Some(created_at) = document.metadata.created_at {
        println!("{}: {}", "Created".cyan(), created_at);
    }
    println!("{}: {:?}", "Default effect".cyan(), document.default_effect());
    if !document.exceptions().is_empty() {
        println!("{}: {}", "Exceptions".cyan(), document.exceptions().len());
    }

    if rules.is_empty() {
        println!("No rules found.");
        return Ok(());
    }

    let rows = rules.iter().map(|rule| {
        [
            rule.priority.map_or_else(|| "-".to_string(), |p| p.to_string()),
            rule.id.clone(),
            rule.effect.map_or_else(|| "-".to_string(), |e| e.to_string()),
            rule.selector.resource.resource_type.clone(),
            rule.selector.environment.clone(),
            rule.when.len().to_string(),
            rule.mutations.len().to_string(),
            if rule.enabled { "yes".to_string() } else { "no".to_string() },
        ]
    });
    println!(
        "{}",
        table(
            ["Priority", "Id", "Effect", "Type", "Environment", "Conditions", "Mutations", "Enabled"],
            rows
        )
    );
    println!("Total: {}", rules.len());
    Ok(())
}
