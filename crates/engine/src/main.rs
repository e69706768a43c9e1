use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use tk_domain::config::{LogFormat, ObservabilityConfig};
use tk_engine::cli::demo::OperatorMode;
use tk_engine::cli::{Cli, Command, ConfigCommand};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Default to the demo when no subcommand is given.
    let command = cli.command.unwrap_or(Command::Demo {
        deny: false,
        ignore_approvals: false,
        state_dir: None,
    });

    match command {
        Command::Demo {
            deny,
            ignore_approvals,
            state_dir,
        } => {
            let (config, _config_path) = tk_engine::cli::load_config()?;
            init_tracing(&config.observability);
            let operator = if deny {
                OperatorMode::Deny
            } else if ignore_approvals {
                OperatorMode::Ignore
            } else {
                OperatorMode::Approve
            };
            tk_engine::cli::demo::run(config, operator, state_dir.as_deref()).await
        }
        Command::Config(ConfigCommand::Validate) => {
            init_cli_tracing();
            let (config, config_path) = tk_engine::cli::load_config()?;
            let valid = tk_engine::cli::config::validate(&config, &config_path);
            if !valid {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Config(ConfigCommand::Show) => {
            init_cli_tracing();
            let (config, _config_path) = tk_engine::cli::load_config()?;
            tk_engine::cli::config::show(&config)
        }
        Command::Version => {
            println!("turnkeep {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Initialize tracing for engine runs.
///
/// `RUST_LOG` wins over the configured default filter.  Both formats write
/// to stderr so stdout carries only command output.
fn init_tracing(obs: &ObservabilityConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&obs.default_filter));

    match obs.log_format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .init();
        }
        LogFormat::Compact => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .compact()
                        .with_writer(std::io::stderr),
                )
                .init();
        }
    }
}

/// Initialize compact stderr-only tracing for CLI one-shot commands.
///
/// Defaults to `warn` level so diagnostic output does not pollute stdout.
fn init_cli_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();
}
