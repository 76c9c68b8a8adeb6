use anyhow::{Context, Result, bail};
use colored::Colorize;
use grc_policy::{EngineConfig, FilePolicySource, PolicyDocument, PolicySource, validate_document};

use crate::cli::OutputFormat;
use crate::output::{print_error, print_success, print_value, print_warning};

pub async fn run(config: &EngineConfig, format: OutputFormat) -> Result<()> {
    let document = load_document(config).await?;
    let report = validate_document(&document);
    let path = config.store.path.display();

    if matches!(format, OutputFormat::Table) {
        println!(
            "{}: {} {}",
            "Policy".cyan(),
            document.metadata.name,
            document.metadata.version
        );
        println!("{}: {}", "Rules".cyan(), document.rules().len());
        for error in &report.errors {
            print_error(error);
        }
        for warning in &report.warnings {
            print_warning(warning);
        }
    } else {
        print_value(&report, format)?;
    }

    if !report.is_valid() {
        bail!("{} has {} validation error(s)", path, report.errors.len());
    }
    if matches!(format, OutputFormat::Table) {
        print_success(&format!(
            "{path} is valid ({} warning(s))",
            report.warnings.len()
        ));
    }
    Ok(())
}

/// Reads and parses the configured policy document without validating it.
pub async fn load_document(config: &EngineConfig) -> Result<PolicyDocument> {
    let source = FilePolicySource::new(&config.store.path);
    let raw = source
        .load()
        .await?
        .with_context(|| format!("Policy file not found: {}", source.name()))?;
    PolicyDocument::parse(&raw.content, raw.format)
        .with_context(|| format!("Failed to parse {}", source.name()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[tokio::test]
    async fn test_load_document_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.json");
        fs::write(&path, r#"{"metadata": {"name": "json-policy"}, "spec": {"rules": []}}"#).unwrap();

        let mut config = EngineConfig::default();
        config.store.path = path;
        let document = load_document(&config).await.unwrap();
        assert_eq!(document.metadata.name, "json-policy");
    }

    #[tokio::test]
    async fn test_invalid_document_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.yml");
        fs::write(&path, "spec:\n  rules:\n    - id: r1\n").unwrap();

        let mut config = EngineConfig::default();
        config.store.path = path;
        let err = run(&config, OutputFormat::Json).await.unwrap_err();
        assert!(err.to_string().contains("validation error"));
    }

    #[tokio::test]
    async fn test_missing_document_fails() {
        let mut config = EngineConfig::default();
        config.store.path = "/nonexistent/policy.yml".into();
        assert!(load_document(&config).await.is_err());
    }
}
