//! CLI entrypoint for conclave
//!
//! Wires the store, the provider gateway and the meeting runtime together,
//! runs one meeting and renders its event stream to the terminal.

mod render;

use anyhow::{Context, Result, bail};
use clap::Parser;
use conclave_application::runtime::MeetingRuntime;
use conclave_infrastructure::{
    AnthropicProvider, FileConfig, GeminiProvider, JsonlEventLog, MockProvider, OpenAiProvider,
    ProviderAdapter, RoutingGateway, load_file_config,
};
use conclave_infrastructure::InMemoryStore;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "conclave",
    version,
    about = "Convene LLM agents around a topic, vote, and produce an approved result document"
)]
struct Cli {
    /// Topic to convene the meeting around (overrides the config file)
    #[arg(short, long)]
    topic: Option<String>,

    /// Meeting config file (defaults to ~/.config/conclave/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the rendered report to this file instead of stdout
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// Append every meeting event to this JSONL file
    #[arg(long)]
    event_log: Option<PathBuf>,

    /// Mirror logs into this file (disables ANSI colors in the log)
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Forward lines typed on stdin as user messages; mid-vote this
    /// interrupts the session
    #[arg(long)]
    stdin_interrupts: bool,

    /// Suppress the live event stream
    #[arg(short, long)]
    quiet: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // keep the appender guard alive for the whole run
    let _log_guard = match &cli.log_file {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("creating log file {}", path.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .init();
            None
        }
    };

    // === Configuration ===
    let config_path = cli.config.clone().or_else(default_config_path);
    let file_config = load_file_config(config_path.as_deref())
        .map_err(|e| anyhow::anyhow!("loading configuration: {}", e))?;

    let topic = match cli.topic.clone().or_else(|| file_config.topic.clone()) {
        Some(topic) => topic,
        None => bail!("a topic is required: pass --topic or set one in the config file"),
    };

    // === Dependency injection ===
    let store = InMemoryStore::new();
    let gateway = Arc::new(RoutingGateway::new(build_adapters(&file_config)));
    let runtime = MeetingRuntime::new(store, gateway);

    let meeting = runtime
        .create_meeting(&topic, file_config.meeting_config())
        .await
        .context("creating the meeting")?;
    let meeting_id = meeting.id.clone();
    info!(meeting_id = %meeting_id, "meeting created");

    let event_log = cli
        .event_log
        .as_ref()
        .and_then(|path| JsonlEventLog::create(path))
        .map(Arc::new);

    // subscribe before starting so the stream misses nothing
    let events = runtime.subscribe(&meeting_id);
    let mut renderer = tokio::spawn(render::stream_events(
        events,
        cli.quiet,
        event_log,
    ));

    runtime.start_meeting(&meeting_id).await.context("starting the meeting")?;

    let stdin_task = cli.stdin_interrupts.then(|| {
        tokio::spawn(forward_stdin(Arc::clone(&runtime), meeting_id.clone()))
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\nreceived interrupt, aborting the meeting");
            let _ = runtime
                .abort_meeting(&meeting_id, "aborted from the terminal")
                .await;
            let _ = (&mut renderer).await;
        }
        _ = &mut renderer => {}
    }
    runtime
        .wait_for_meeting(&meeting_id)
        .await
        .context("waiting for the meeting to finish")?;
    if let Some(task) = stdin_task {
        task.abort();
    }

    // === Result output ===
    let finished = runtime.get_meeting(&meeting_id).await?;
    let Some(result) = finished.result else {
        bail!("meeting finished without a result payload");
    };

    let output = finished.config.output;
    let mut rendered = String::new();
    if output.wants_markdown()
        && let Some(report) = &result.report_markdown
    {
        rendered.push_str(report);
    }
    if output.wants_json() {
        if !rendered.is_empty() {
            rendered.push_str("\n\n");
        }
        rendered.push_str(&serde_json::to_string_pretty(&result.summary)?);
    }

    match &cli.out {
        Some(path) => {
            std::fs::write(path, rendered)
                .with_context(|| format!("writing report to {}", path.display()))?;
            println!("report written to {}", path.display());
        }
        None => println!("{}", rendered),
    }

    render::print_outcome(result.accepted, &result.reason);
    Ok(())
}

fn default_config_path() -> Option<PathBuf> {
    let path = dirs::config_dir()?.join("conclave").join("config.toml");
    path.exists().then_some(path)
}

/// Register every provider the config carries credentials for; the mock is
/// always available as the fallback target.
fn build_adapters(config: &FileConfig) -> Vec<Arc<dyn ProviderAdapter>> {
    let mut adapters: Vec<Arc<dyn ProviderAdapter>> = vec![Arc::new(MockProvider::new())];

    if let Some(creds) = &config.providers.openai
        && let Some(key) = creds.resolve_key()
    {
        adapters.push(Arc::new(match &creds.base_url {
            Some(url) => OpenAiProvider::with_base_url(key, url),
            None => OpenAiProvider::new(key),
        }));
    }
    if let Some(creds) = &config.providers.anthropic
        && let Some(key) = creds.resolve_key()
    {
        adapters.push(Arc::new(match &creds.base_url {
            Some(url) => AnthropicProvider::with_base_url(key, url),
            None => AnthropicProvider::new(key),
        }));
    }
    if let Some(creds) = &config.providers.gemini
        && let Some(key) = creds.resolve_key()
    {
        adapters.push(Arc::new(match &creds.base_url {
            Some(url) => GeminiProvider::with_base_url(key, url),
            None => GeminiProvider::new(key),
        }));
    }

    adapters
}

/// Forward stdin lines as user messages until the meeting stops accepting
/// them.
async fn forward_stdin(runtime: Arc<MeetingRuntime>, meeting_id: String) {
    use tokio::io::{AsyncBufReadExt, BufReader};

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Err(err) = runtime.post_user_message(&meeting_id, trimmed).await {
            tracing::debug!(error = %err, "stopping stdin forwarding");
            break;
        }
    }
}
