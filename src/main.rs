use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use news_digest::agent::ConsolePrompter;
use news_digest::channels::{EmailConfig, EmailNotifier, SlackConfig, SlackNotifier};
use news_digest::config::PipelineConfig;
use news_digest::llm::{LlmConfig, create_provider};
use news_digest::pipeline::{
    Classifier, Collaborators, LlmClassifier, LlmSummarizer, NotificationSink,
    PipelineOrchestrator, RunReport, Summarizer, standard_middleware,
};
use news_digest::safety::RedactionFilter;
use news_digest::sources::{PerplexityConfig, PerplexityFetcher};
use news_digest::workspace::Workspace;

/// Fetch, filter, summarize and deliver today's news digest.
#[derive(Parser, Debug)]
#[command(name = "news-digest", version)]
struct Cli {
    /// Topics and filtering settings.
    #[arg(long, default_value = "config/topics.json")]
    topics: PathBuf,

    /// Sources and search settings.
    #[arg(long, default_value = "config/sources.json")]
    sources: PathBuf,

    /// Skip the email digest.
    #[arg(long)]
    no_email: bool,

    /// Also post the digest to Slack.
    #[arg(long)]
    slack: bool,

    /// Send a test email to check the SMTP settings, then exit.
    #[arg(long)]
    test_email: bool,

    /// Approve every guarded operation without prompting.
    #[arg(long)]
    yes: bool,

    /// Where raw dumps and summaries are written.
    #[arg(long, env = "NEWS_DIGEST_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// Where the rolling log file lives.
    #[arg(long, env = "NEWS_DIGEST_LOG_DIR", default_value = "logs")]
    log_dir: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Install rustls crypto provider before any TLS usage. An already
    // installed provider is fine.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let cli = Cli::parse();
    let _log_guard = init_tracing(&cli.log_dir);

    if cli.test_email {
        return send_test_email().await;
    }

    let orchestrator = match build(&cli) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            let message = format!("{e:#}");
            tracing::error!(error = %message, "Startup failed");
            eprintln!("Error: {message}");
            return ExitCode::FAILURE;
        }
    };

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling run");
            ctrl_c.cancel();
        }
    });

    let report = orchestrator.run_with_cancel(&cancel).await;
    print_report(&report)
}

async fn send_test_email() -> ExitCode {
    let result = match EmailConfig::from_env() {
        Ok(config) => EmailNotifier::new(config)
            .send_test()
            .await
            .map_err(anyhow::Error::from),
        Err(e) => Err(e.into()),
    };
    match result {
        Ok(()) => {
            eprintln!("Test email sent.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            let message = format!("{e:#}");
            tracing::error!(error = %message, "Test email failed");
            eprintln!("Error: {message}");
            ExitCode::FAILURE
        }
    }
}

/// Stderr layer plus a daily-rotated, non-ANSI file layer.
fn init_tracing(log_dir: &Path) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let mut guard = None;
    let file_layer = match std::fs::create_dir_all(log_dir) {
        Ok(()) => {
            let appender = tracing_appender::rolling::daily(log_dir, "news_digest.log");
            let (writer, g) = tracing_appender::non_blocking(appender);
            guard = Some(g);
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_filter(env_filter.clone()),
            )
        }
        Err(err) => {
            eprintln!("Warning: failed to create log directory: {err}");
            None
        }
    };

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(env_filter);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .init();
    guard
}

fn build(cli: &Cli) -> anyhow::Result<PipelineOrchestrator> {
    let mut config = PipelineConfig::from_files(&cli.topics, &cli.sources)
        .context("loading configuration files")?;
    config.apply_env()?;
    if cli.yes {
        config.bypass_approval = true;
    }
    config.validate()?;

    tracing::info!(
        topics = ?config.topics,
        sources = config.enabled_sources().count(),
        min_score = config.min_relevance_score,
        "Configuration loaded"
    );

    let redaction = RedactionFilter::new();
    let llm = create_provider(&LlmConfig::from_env(), redaction)?;

    let classifier: Option<Arc<dyn Classifier>> = config
        .use_model_filtering
        .then(|| Arc::new(LlmClassifier::new(llm.clone())) as Arc<dyn Classifier>);
    let summarizer: Arc<dyn Summarizer> = Arc::new(LlmSummarizer::new(llm));

    let fetcher = Arc::new(PerplexityFetcher::new(PerplexityConfig::from_env()?)?);

    let mut notifiers: Vec<Arc<dyn NotificationSink>> = Vec::new();
    if !cli.no_email {
        notifiers.push(Arc::new(EmailNotifier::new(EmailConfig::from_env()?)));
    }
    if cli.slack {
        notifiers.push(Arc::new(SlackNotifier::new(SlackConfig::from_env()?)?));
    }

    let middleware = standard_middleware(
        &config,
        summarizer.clone(),
        Arc::new(ConsolePrompter::new()),
        redaction,
    );

    let collaborators = Collaborators {
        fetcher,
        classifier,
        summarizer,
        persistence: Arc::new(Workspace::new(cli.data_dir.clone())),
        notifiers,
    };
    Ok(PipelineOrchestrator::new(config, collaborators, middleware)?)
}

fn print_report(report: &RunReport) -> ExitCode {
    match serde_json::to_string_pretty(report) {
        Ok(json) => println!("{json}"),
        Err(e) => tracing::error!(error = %e, "Failed to serialize run report"),
    }
    if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
