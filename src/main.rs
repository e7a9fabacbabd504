use std::sync::Arc;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use deskagents::cli::{Cli, Commands};
use deskagents::config::{AppConfig, LoggingConfig};
use deskagents::exchange::build_exchange_gateway;
use deskagents::execution::ExecutionStateMachine;
use deskagents::llm::OpenAiCompatibleClient;
use deskagents::observer::LoggingObserver;
use deskagents::pipeline::PipelineOrchestrator;
use deskagents::retry::RetryPolicy;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load_from(&cli.config).context("failed to load configuration")?;
    if let Some(symbol) = command_symbol(&cli.command) {
        config.trading.symbol = symbol.to_string();
    }

    let _log_guard = init_logging(&config.logging);
    config.validate()?;

    if let Err(e) = dispatch(cli.command, config).await {
        error!("{}", e);
        return Err(e);
    }
    Ok(())
}

async fn dispatch(command: Commands, config: AppConfig) -> anyhow::Result<()> {
    let gateway = build_exchange_gateway(&config)?;
    let symbol = config.trading.symbol.clone();

    match command {
        Commands::Run { date, execute, .. } => {
            let trade_date = match date {
                Some(d) => NaiveDate::parse_from_str(&d, "%Y-%m-%d")
                    .with_context(|| format!("invalid --date '{}'", d))?,
                None => Utc::now().date_naive(),
            };

            let llm = Arc::new(OpenAiCompatibleClient::new(config.llm.clone())?);
            let mut orchestrator = PipelineOrchestrator::from_config(&config, llm, gateway)?
                .with_observer(Arc::new(LoggingObserver));
            if execute {
                orchestrator.set_auto_execute(true);
            }

            if let Some(executor) = orchestrator.executor() {
                if execute || config.execution.auto_execute {
                    let report = executor.setup_account(&symbol, config.trading.leverage).await;
                    if report.is_degraded() {
                        warn!("Account setup incomplete, continuing in degraded mode");
                    }
                }
            }

            let outcome = orchestrator.run(trade_date).await?;

            println!("{}", outcome.decision_text());
            println!();
            println!("Decision: {} (confidence {:.2})", outcome.verdict, outcome.structured.confidence);
            for result in &outcome.execution {
                println!("{}", result);
            }
            if let Some(path) = &outcome.audit_path {
                info!(path = %path.display(), "Run recorded");
            }
        }
        Commands::Position { .. } => {
            let executor = engine(&config, gateway);
            println!("{}", executor.position_summary(&symbol).await);
        }
        Commands::Setup { .. } => {
            let executor = engine(&config, gateway);
            let report = executor.setup_account(&symbol, config.trading.leverage).await;
            if report.skipped {
                println!("Test mode: account setup skipped");
            } else {
                println!("hedge mode: {}", if report.hedge_mode { "ok" } else { "FAILED" });
                println!("leverage {}x: {}", config.trading.leverage, if report.leverage { "ok" } else { "FAILED" });
                match &report.balance {
                    Some(b) => println!("balance: {} {} (available {})", b.total, b.asset, b.available),
                    None => println!("balance: unavailable"),
                }
            }
        }
        Commands::CloseAll { .. } => {
            let executor = engine(&config, gateway);
            for result in executor.close_all(&symbol, "manual close-all").await {
                println!("{}", result);
            }
        }
    }
    Ok(())
}

fn engine(
    config: &AppConfig,
    gateway: Arc<dyn deskagents::exchange::ExchangeGateway>,
) -> ExecutionStateMachine {
    ExecutionStateMachine::new(
        gateway,
        (&config.execution).into(),
        RetryPolicy::from(&config.retry),
    )
}

fn command_symbol(command: &Commands) -> Option<&str> {
    match command {
        Commands::Run { symbol, .. }
        | Commands::Position { symbol }
        | Commands::Setup { symbol }
        | Commands::CloseAll { symbol } => symbol.as_deref(),
    }
}

fn init_logging(cfg: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},deskagents=debug", cfg.level)));

    let console = if cfg.json {
        fmt::layer().json().with_target(true).boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed()
    };

    let (file, guard) = match &cfg.dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "deskagents.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().json().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .init();

    guard
}
