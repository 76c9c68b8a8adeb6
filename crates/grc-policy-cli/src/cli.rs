use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "grc-policy")]
#[command(about = "Validate, test and watch GRC policy documents")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Engine configuration file
    #[arg(short, long, global = true, env = "GRC_POLICY_CONFIG", default_value = "grc-policy.toml")]
    pub config: PathBuf,

    /// Policy document (overrides config and GRC_POLICY_PATH)
    #[arg(short, long, global = true)]
    pub policy: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true)]
    pub format: Option<OutputFormat>,

    /// Log level (overrides config and GRC_POLICY_LOG_LEVEL)
    #[arg(long, global = true)]
    pub log_level: Option<String>,
}

#[derive(Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Yaml,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check a policy document for errors and warnings
    Validate,
    /// Evaluate a resource against the policy
    Evaluate(EvaluateArgs),
    /// Show the rules of a policy document
    Show(ShowArgs),
    /// Watch the policy document and report reloads
    Watch,
}

#[derive(clap::Args)]
pub struct EvaluateArgs {
    /// Resource type (e.g. Evidence)
    #[arg(short = 't', long = "type")]
    pub resource_type: String,

    /// Action being performed
    #[arg(short, long, default_value = "create")]
    pub action: String,

    /// Deployment environment
    #[arg(short, long = "env", default_value = "prod")]
    pub environment: String,

    /// Path to the JSON resource (reads from stdin if omitted)
    #[arg(long)]
    pub file: Option<PathBuf>,

    /// Treat the input as a resource envelope (id, title, type, metadata, resource)
    #[arg(long)]
    pub wrapper: bool,

    /// Principal performing the action
    #[arg(long)]
    pub principal: Option<String>,

    /// Principal role (repeatable)
    #[arg(long = "role")]
    pub roles: Vec<String>,

    /// Tenant id
    #[arg(long)]
    pub tenant: Option<String>,

    /// Correlation id (generated if omitted)
    #[arg(long)]
    pub correlation_id: Option<String>,

    /// Exit with an error when the request is denied
    #[arg(long)]
    pub fail_on_deny: bool,
}

#[derive(clap::Args)]
pub struct ShowArgs {
    /// Only rules applicable to this resource type
    #[arg(short = 't', long = "type", requires = "environment")]
    pub resource_type: Option<String>,

    /// Only rules applicable to this environment
    #[arg(short, long = "env", requires = "resource_type")]
    pub environment: Option<String>,
}
