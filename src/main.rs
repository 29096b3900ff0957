//! # carelink
//!
//! Doctor–patient messaging server binary: wires storage, the completion
//! provider, the suggestion pipeline and the connection hub together and
//! serves until ctrl-c.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::Level;

use carelink_assist::{PipelineConfig, PipelineStores, SuggestionPipeline};
use carelink_core::notify::Notifier;
use carelink_llm::{OpenAiCompatConfig, OpenAiCompatProvider, ReliableConfig, ReliableProvider};
use carelink_server::{AppState, ChatService, ChatStores, Hub, NotificationService, PumpConfig};
use carelink_settings::{load_settings, CarelinkSettings};
use carelink_store::{Database, MessageRepo, PatientRepo, ReadingRepo, RecordRepo, SuggestionRepo};
use carelink_telemetry::{init_telemetry, TelemetryConfig};

/// carelink messaging server.
#[derive(Parser, Debug)]
#[command(name = "carelink", about = "Doctor–patient messaging server")]
struct Cli {
    /// JSON settings file layered over the defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Port to bind (overrides settings and CARELINK_PORT).
    #[arg(long)]
    port: Option<u16>,
}

fn resolve_settings(cli: &Cli) -> Result<CarelinkSettings> {
    let mut settings = load_settings(cli.config.as_deref()).context("failed to load settings")?;
    apply_cli(&mut settings, cli);
    settings.validate().context("invalid settings")?;
    Ok(settings)
}

fn apply_cli(settings: &mut CarelinkSettings, cli: &Cli) {
    if let Some(port) = cli.port {
        settings.server.port = port;
    }
}

fn telemetry_config(settings: &CarelinkSettings) -> TelemetryConfig {
    TelemetryConfig {
        log_level: settings.logging.level.parse().unwrap_or(Level::INFO),
        module_levels: vec![("hyper".into(), Level::WARN), ("rusqlite".into(), Level::WARN)],
        format: settings.logging.format,
    }
}

fn build_provider(settings: &CarelinkSettings) -> Result<ReliableProvider<OpenAiCompatProvider>> {
    let assistant = &settings.assistant;
    let api_key = assistant
        .api_key()
        .cloned()
        .with_context(|| format!("{} is not set", assistant.provider.key_env()))?;
    let provider = OpenAiCompatProvider::new(OpenAiCompatConfig {
        name: assistant.provider.as_str().to_string(),
        base_url: assistant.resolved_base_url().to_string(),
        model: assistant.resolved_model().to_string(),
        api_key,
        temperature: assistant.temperature,
        max_tokens: assistant.max_tokens,
        top_p: assistant.top_p,
    })
    .context("failed to build provider client")?;

    Ok(ReliableProvider::new(
        provider,
        ReliableConfig {
            max_retries: assistant.max_retries,
            ..ReliableConfig::default()
        },
    ))
}

fn open_database(path: &Path) -> Result<Database> {
    Database::open(path).with_context(|| format!("failed to open database at {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = resolve_settings(&cli)?;
    let _telemetry = init_telemetry(telemetry_config(&settings)).context("failed to init logging")?;

    let db = open_database(Path::new(&settings.server.database_path))?;
    let messages = Arc::new(MessageRepo::new(db.clone()));
    let patients = Arc::new(PatientRepo::new(db.clone()));
    let readings = Arc::new(ReadingRepo::new(db.clone()));

    let hub = Arc::new(Hub::new());
    let notifier: Arc<dyn Notifier> = Arc::new(NotificationService::new(Arc::clone(&hub)));

    let assistant = &settings.assistant;
    let provider = build_provider(&settings)?;
    tracing::info!(
        provider = assistant.provider.as_str(),
        model = assistant.resolved_model(),
        "completion provider ready"
    );

    let pipeline = Arc::new(SuggestionPipeline::new(
        Arc::new(provider),
        PipelineStores {
            messages: messages.clone(),
            suggestions: Arc::new(SuggestionRepo::new(db.clone())),
            patients: patients.clone(),
            records: Arc::new(RecordRepo::new(db)),
            readings: readings.clone(),
        },
        Arc::clone(&notifier),
        PipelineConfig {
            timeout: assistant.timeout(),
            extraction_timeout: assistant.extraction_timeout(),
            history_window: assistant.history_window,
            record_limit: assistant.record_limit,
            extract_readings: assistant.extract_readings,
        },
    ));

    let chat = ChatService::new(
        ChatStores {
            messages,
            patients,
            readings,
        },
        notifier,
    )
    .with_pipeline(pipeline);

    let state = AppState::new(hub, Arc::new(chat), PumpConfig::from_settings(&settings.server));
    let cancel = CancellationToken::new();
    let handle = carelink_server::start(&settings.server, state, cancel.clone())
        .await
        .context("failed to bind server")?;
    tracing::info!(port = handle.port, "carelink ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    tracing::info!("shutting down");
    cancel.cancel();
    handle.wait().await;
    tracing::info!("shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use carelink_telemetry::LogFormat;

    #[test]
    fn cli_defaults() {
        let cli = Cli::parse_from(["carelink"]);
        assert!(cli.config.is_none());
        assert!(cli.port.is_none());
    }

    #[test]
    fn cli_config_and_port() {
        let cli = Cli::parse_from(["carelink", "--config", "/etc/carelink.json", "--port", "9100"]);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/carelink.json")));
        assert_eq!(cli.port, Some(9100));
    }

    #[test]
    fn port_flag_overrides_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("carelink.json");
        std::fs::write(
            &path,
            r#"{"server": {"port": 9000}, "assistant": {"provider": "deepseek"}}"#,
        )
        .unwrap();

        let cli = Cli::parse_from([
            "carelink",
            "--config",
            path.to_str().unwrap(),
            "--port",
            "9100",
        ]);
        let mut settings = load_settings(cli.config.as_deref()).unwrap();
        apply_cli(&mut settings, &cli);
        assert_eq!(settings.server.port, 9100);
    }

    #[test]
    fn telemetry_falls_back_to_info() {
        let mut settings = CarelinkSettings::default();
        settings.logging.level = "loud".into();
        settings.logging.format = LogFormat::Pretty;
        let config = telemetry_config(&settings);
        assert_eq!(config.log_level, Level::INFO);
        assert_eq!(config.format, LogFormat::Pretty);
    }

    #[test]
    fn provider_requires_key() {
        let settings = CarelinkSettings::default();
        assert!(build_provider(&settings).is_err());
    }
}
