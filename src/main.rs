use anyhow::Context;
use jnana::cli::init::{self, InitConfig, InitResult};
use jnana::cli::output::Output;
use jnana::cli::run::{self, RunArgs};
use jnana::cli::{Cli, Commands};
use jnana::utils::logging::init_tracing;
use jnana::JnanaConfigManager;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse_args();
    let output = if cli.no_color {
        Output::no_color()
    } else {
        Output::new()
    };

    match execute(cli, &output).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output.error(&format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}

async fn execute(cli: Cli, output: &Output) -> anyhow::Result<()> {
    if let Commands::Init { path, force } = cli.command {
        return match init::run(InitConfig { path, force }, output) {
            InitResult::Success | InitResult::AlreadyExists => Ok(()),
            InitResult::Error(e) => Err(anyhow::anyhow!(e)),
        };
    }

    let settings = JnanaConfigManager::new(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    let config = settings.config();
    let level = if cli.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    init_tracing(level, config.logging.json);
    tracing::debug!(config = %cli.config.display(), "Configuration loaded");

    match cli.command {
        Commands::Init { .. } => Ok(()),
        Commands::Run {
            goal,
            hypotheses,
            iterations,
            matches,
            output: save_to,
        } => {
            if settings.path().exists() {
                if let Err(e) = settings.start_watching() {
                    tracing::warn!(error = %e, "Config hot reload unavailable");
                }
            }
            let result = run::run(
                settings.clone(),
                RunArgs {
                    goal,
                    hypotheses,
                    iterations,
                    matches,
                    output: save_to,
                },
                output,
            )
            .await;
            settings.stop_watching();
            result.map(|_| ())
        }
        Commands::Inspect { file, k } => run::inspect(&file, k, output),
        Commands::Config => {
            config.validate()?;
            output.header("Effective configuration");
            output.kv("file", &cli.config.display().to_string());
            output.kv("max_workers", &config.scheduler.max_workers.to_string());
            output.kv("elo_k_factor", &config.tournament.elo_k_factor.to_string());
            output.kv(
                "auto_save",
                &format!(
                    "{} every {}s",
                    config.session.auto_save_enabled, config.session.auto_save_interval_seconds
                ),
            );
            output.kv("sessions_dir", &config.session.sessions_dir.display().to_string());
            output.newline();
            println!("{}", config.to_toml_string()?);
            output.success("Configuration is valid");
            Ok(())
        }
    }
}
