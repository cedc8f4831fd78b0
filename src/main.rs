//! # stackctl
//!
//! Command-line front end for the stack reconciler.
//!
//! ## Usage
//!
//! ```bash
//! # Create or update billing-production
//! stackctl --app billing --env production apply \
//!     --template cloudformation/billing.yml --config-dir config \
//!     --param ImageTag=42
//!
//! # Read an output from the staging stack (billing-non-production)
//! stackctl --app billing --env staging outputs LoadBalancerDns
//!
//! # Delete a stack (asks for confirmation)
//! stackctl --app billing --env staging destroy
//! ```

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use stack_reconciler::config::{ConfigDocument, FileLoader, ReconcilerSettings};
use stack_reconciler::console::ConsoleJockey;
use stack_reconciler::observability::{self, logging};
use stack_reconciler::params::Parameter;
use stack_reconciler::provider::CloudFormationControlPlane;
use stack_reconciler::secrets::KmsDecryptor;
use stack_reconciler::stack::{StackConfig, StackName, StackReconciler};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Reconcile CloudFormation stacks
#[derive(Parser)]
#[command(name = "stackctl")]
#[command(
    about = "Idempotent apply/destroy for CloudFormation stacks",
    long_about = None,
    version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("BUILD_GIT_HASH"), ", built ", env!("BUILD_DATETIME"), ")")
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Application name; the stack is `<app>-production` or `<app>-non-production`
    #[arg(short, long, global = true, env = "APP_NAME")]
    app: Option<String>,

    /// Environment name
    #[arg(short, long, global = true, env = "ENV_NAME", default_value = "development")]
    env: String,

    /// Use this stack name instead of deriving one from --app and --env
    #[arg(long, global = true)]
    stack_name: Option<String>,

    /// Write Prometheus metrics in text format to this file on exit
    #[arg(long, global = true)]
    metrics_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the stack if absent or broken, otherwise update it
    Apply {
        /// CloudFormation template
        #[arg(long, value_name = "FILE")]
        template: PathBuf,

        /// Directory holding common.yml, <env>.yml and secrets documents
        #[arg(long, value_name = "DIR")]
        config_dir: Option<PathBuf>,

        /// Stack parameter, overrides template and file parameters (ignored without a parameter template)
        #[arg(long = "param", value_name = "KEY=VALUE", value_parser = parse_parameter)]
        params: Vec<Parameter>,

        /// Configuration override, merged over the loaded configuration
        #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_override)]
        overrides: Vec<(String, serde_yaml::Value)>,

        /// Parameter template (defaults to <app>.params.yml next to the template)
        #[arg(long, value_name = "FILE")]
        params_template: Option<PathBuf>,

        /// Legacy CloudFormation JSON parameter file
        #[arg(long, value_name = "FILE")]
        params_file: Option<PathBuf>,
    },
    /// Delete the stack after confirmation
    Destroy,
    /// Print a stack output
    Outputs {
        #[arg(value_name = "KEY")]
        key: String,
    },
    /// Print the details of a logical resource
    Resource {
        #[arg(value_name = "LOGICAL_ID")]
        logical_id: String,
    },
    /// Print the merged environment configuration as YAML
    Config {
        #[arg(long, value_name = "DIR")]
        config_dir: PathBuf,

        /// Configuration override, merged over the loaded configuration
        #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_override)]
        overrides: Vec<(String, serde_yaml::Value)>,
    },
    /// Exit successfully if the stack exists
    Exists,
}

fn split_key_value(raw: &str) -> Result<(&str, &str), String> {
    raw.split_once('=')
        .filter(|(key, _)| !key.is_empty())
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))
}

fn parse_parameter(raw: &str) -> Result<Parameter, String> {
    let (key, value) = split_key_value(raw)?;
    Ok(Parameter::new(key, value))
}

/// Values are read as YAML scalars so `--set replicas=3` stays a number
fn parse_override(raw: &str) -> Result<(String, serde_yaml::Value), String> {
    let (key, value) = split_key_value(raw)?;
    let value = serde_yaml::from_str(value)
        .unwrap_or_else(|_| serde_yaml::Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

async fn build_reconciler(cli: &Cli, settings: &ReconcilerSettings) -> Result<StackReconciler> {
    let app = match (&cli.app, &cli.stack_name) {
        (Some(app), _) => app.clone(),
        (None, Some(stack_name)) => stack_name.clone(),
        (None, None) => return Err(anyhow!("Either --app or --stack-name is required")),
    };

    let region = (!settings.region.is_empty()).then_some(settings.region.as_str());
    let control_plane = CloudFormationControlPlane::new(region).await;
    let decryptor = KmsDecryptor::new(region).await;

    let mut reconciler = StackReconciler::new(
        app,
        cli.env.clone(),
        Arc::new(control_plane),
        Arc::new(FileLoader),
        Arc::new(decryptor),
        Arc::new(ConsoleJockey),
    )
    .with_settings(settings.clone());

    if let Some(stack_name) = &cli.stack_name {
        reconciler = reconciler.with_stack_name(StackName::new(stack_name.clone()));
    }
    Ok(reconciler)
}

async fn run(cli: &Cli, settings: &ReconcilerSettings) -> Result<()> {
    let reconciler = build_reconciler(cli, settings).await?;
    info!("Reconciling stack {}", reconciler.stack_name());

    match &cli.command {
        Commands::Apply {
            template,
            config_dir,
            params,
            overrides,
            params_template,
            params_file,
        } => {
            let stack_config = StackConfig {
                template_path: Some(template.clone()),
                config_path: config_dir.clone(),
                injected_config: overrides.iter().cloned().collect::<ConfigDocument>(),
                env_name: Some(cli.env.clone()),
                parameters: params.clone(),
                params_template_path: params_template.clone(),
                file_params_path: params_file.clone(),
            };
            let outcome = reconciler.apply(&stack_config).await?;
            info!("Apply finished: {}", outcome.as_str());
        }
        Commands::Destroy => {
            let outcome = reconciler.destroy().await?;
            info!("Destroy finished: {}", outcome.as_str());
        }
        Commands::Outputs { key } => {
            let value = reconciler.outputs(key).await?.ok_or_else(|| {
                anyhow!("Stack {} has no output named {key}", reconciler.stack_name())
            })?;
            println!("{value}");
        }
        Commands::Resource { logical_id } => {
            let fields = reconciler.logical_resource(logical_id).await?;
            print!("{}", serde_yaml::to_string(&fields)?);
        }
        Commands::Config {
            config_dir,
            overrides,
        } => {
            let stack_config = StackConfig {
                config_path: Some(config_dir.clone()),
                injected_config: overrides.iter().cloned().collect::<ConfigDocument>(),
                env_name: Some(cli.env.clone()),
                ..StackConfig::default()
            };
            let config = reconciler.config(&stack_config)?;
            print!("{}", serde_yaml::to_string(&config)?);
        }
        Commands::Exists => {
            if !reconciler.exists().await? {
                return Err(anyhow!("Stack {} does not exist", reconciler.stack_name()));
            }
            println!("{}", reconciler.stack_name());
        }
    }

    Ok(())
}

fn write_metrics(path: &Path) -> Result<()> {
    let rendered = observability::render_metrics()?;
    std::fs::write(path, rendered)
        .with_context(|| format!("Failed to write metrics to {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let settings = ReconcilerSettings::from_env();
    logging::init_logging(
        &settings.log_level,
        logging::LogFormat::parse(&settings.log_format),
    )?;

    let cli = Cli::parse();
    observability::register_metrics()?;

    let result = run(&cli, &settings).await;

    if let Some(path) = &cli.metrics_file {
        write_metrics(path)?;
    }

    result
}
