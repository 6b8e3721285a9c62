#![forbid(unsafe_code)]

//! `spellhost` binary.
//!
//! `serve` supervises the native hotkey agent and runs spells on hotkeys;
//! the remaining subcommands are one-shot helpers around the same managers.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use spellhost::agent::bus::EventReceiver;
use spellhost::agent::{AgentEvent, AgentEventKind, AgentSupervisor, SupervisorConfig};
use spellhost::clipboard::ClipboardHistory;
use spellhost::config::GlobalConfig;
use spellhost::hotkey::{load_binding_sets, HotkeyAgent, HotkeyRegistry};
use spellhost::provider::ProviderManager;
use spellhost::runtime::RuntimeManager;
use spellhost::spell::{list_spells, SpellRunner};
use spellhost::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "spellhost", about = "Hotkey agent supervisor and spell host", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start the agent and dispatch hotkeys until interrupted.
    Serve,
    /// Run one spell and print its result as JSON.
    Cast {
        /// Spell directory containing `plugin.json`.
        spell_dir: PathBuf,
        /// Input text.
        input: String,
    },
    /// List installed spells.
    ListSpells,
    /// Show resolved language runtimes.
    Runtimes,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let mut config = GlobalConfig::load_from_path(&args.config)?;
    config.load_credentials().await?;
    info!(config = %args.config.display(), "configuration loaded");

    let runtimes = Arc::new(
        RuntimeManager::new(config.managed_runtime_dir.clone())
            .with_user_paths(config.runtimes.clone()),
    );
    let providers = Arc::new(build_provider_manager(&config));
    let runner = Arc::new(
        SpellRunner::new(Arc::clone(&runtimes), providers)
            .with_timeout(Duration::from_secs(config.timeouts.spell_seconds)),
    );

    match args.command {
        Commands::Serve => serve(&config, runner).await,
        Commands::Cast { spell_dir, input } => {
            let result = runner.execute_spell(&spell_dir, &input).await;
            print_json(&result)
        }
        Commands::ListSpells => {
            for spell in list_spells(&config.spells_dir).await? {
                println!(
                    "{}\t{}\t{}",
                    spell.manifest.id,
                    spell.manifest.runtime,
                    spell.directory.display()
                );
            }
            Ok(())
        }
        Commands::Runtimes => print_json(&runtimes.list_available_runtimes().await),
    }
}

fn build_provider_manager(config: &GlobalConfig) -> ProviderManager {
    let providers = ProviderManager::new();
    for provider in &config.providers {
        providers.register_provider(provider.clone());
    }
    for (name, key) in &config.api_keys {
        providers.set_api_key(name, key.clone());
    }
    if let Some(preferred) = &config.preferred_provider {
        providers.set_provider_preference(spellhost::provider::DEFAULT_PREFERENCE_SCOPE, preferred);
    }
    providers
}

async fn serve(config: &GlobalConfig, runner: Arc<SpellRunner>) -> Result<()> {
    let supervisor = Arc::new(AgentSupervisor::new(SupervisorConfig::from(&config.timeouts)));
    let hotkey_events = supervisor.subscribe(AgentEventKind::Hotkey);
    let clipboard_events = supervisor.subscribe(AgentEventKind::Clipboard);
    let error_events = supervisor.subscribe(AgentEventKind::Error);

    let history = Arc::new(Mutex::new(ClipboardHistory::new()));
    let registry = start_services(config, &runner, &supervisor, &history).await?;

    let ct = CancellationToken::new();
    let dispatch_handle = {
        let registry = Arc::clone(&registry);
        let ct = ct.clone();
        tokio::spawn(async move { registry.run(hotkey_events, ct).await })
    };
    let clipboard_handle = tokio::spawn(track_clipboard(
        clipboard_events,
        Arc::clone(&history),
        ct.clone(),
    ));
    let error_handle = tokio::spawn(log_agent_errors(error_events, ct.clone()));

    info!("spellhost ready");
    shutdown_signal().await;
    info!("shutdown signal received");

    ct.cancel();
    supervisor.stop().await;
    let _ = tokio::join!(dispatch_handle, clipboard_handle, error_handle);
    info!("spellhost shut down");
    Ok(())
}

/// Start the agent and install the hotkey bindings.
///
/// Once the agent has been spawned, any later failure stops it again before
/// the error is returned.
async fn start_services(
    config: &GlobalConfig,
    runner: &Arc<SpellRunner>,
    supervisor: &Arc<AgentSupervisor>,
    history: &Arc<Mutex<ClipboardHistory>>,
) -> Result<Arc<HotkeyRegistry>> {
    if let Err(err) = supervisor.start(&config.agent_path).await {
        error!(%err, "agent failed to start");
        supervisor.stop().await;
        return Err(err);
    }
    if let Err(err) = supervisor.set_clipboard_monitoring(true).await {
        warn!(%err, "failed to enable clipboard monitoring");
    }

    match install_hotkeys(config, runner, supervisor, history).await {
        Ok(registry) => Ok(registry),
        Err(err) => {
            error!(%err, "hotkey setup failed, stopping agent");
            supervisor.stop().await;
            Err(err)
        }
    }
}

async fn install_hotkeys(
    config: &GlobalConfig,
    runner: &Arc<SpellRunner>,
    supervisor: &Arc<AgentSupervisor>,
    history: &Arc<Mutex<ClipboardHistory>>,
) -> Result<Arc<HotkeyRegistry>> {
    let agent: Arc<dyn HotkeyAgent> = Arc::clone(supervisor) as Arc<dyn HotkeyAgent>;
    let registry = Arc::new(HotkeyRegistry::new(agent));
    register_actions(&registry, runner, supervisor, history, &config.spells_dir).await?;

    let bindings = match &config.hotkeys_dir {
        Some(dir) => load_binding_sets(dir, &config.hotkey_sets).await?,
        None => Vec::new(),
    };
    registry.register_bindings(bindings).await?;
    Ok(registry)
}

/// Register `spell:<id>` for every installed spell plus the clipboard
/// history actions.
async fn register_actions(
    registry: &HotkeyRegistry,
    runner: &Arc<SpellRunner>,
    supervisor: &Arc<AgentSupervisor>,
    history: &Arc<Mutex<ClipboardHistory>>,
    spells_dir: &Path,
) -> Result<()> {
    for spell in list_spells(spells_dir).await? {
        let runner = Arc::clone(runner);
        let supervisor = Arc::clone(supervisor);
        let history = Arc::clone(history);
        let directory = Arc::new(spell.directory);
        registry.register_action(format!("spell:{}", spell.manifest.id), move |binding| {
            let runner = Arc::clone(&runner);
            let supervisor = Arc::clone(&supervisor);
            let history = Arc::clone(&history);
            let directory = Arc::clone(&directory);
            async move {
                let input = history.lock().await.current().to_owned();
                let result = runner.execute_spell(&directory, &input).await;
                match result.output {
                    Some(output) if result.error.is_none() => {
                        supervisor.set_clipboard(&output).await
                    }
                    _ => Err(AppError::Spell(format!(
                        "{} failed: {}",
                        binding.action_id,
                        result
                            .error
                            .map_or_else(|| "no output".to_owned(), |e| e.message)
                    ))),
                }
            }
        });
    }

    for (action_id, direction) in [("clipboard:prev", 1), ("clipboard:next", -1)] {
        let supervisor = Arc::clone(supervisor);
        let history = Arc::clone(history);
        registry.register_action(action_id, move |_binding| {
            let supervisor = Arc::clone(&supervisor);
            let history = Arc::clone(&history);
            async move {
                let selected = history.lock().await.cycle(direction).map(str::to_owned);
                match selected {
                    Some(text) => supervisor.set_clipboard(&text).await,
                    None => Ok(()),
                }
            }
        });
    }
    Ok(())
}

async fn track_clipboard(
    mut events: EventReceiver,
    history: Arc<Mutex<ClipboardHistory>>,
    ct: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = ct.cancelled() => break,
            event = events.recv() => match event {
                Some(AgentEvent::Clipboard { text, timestamp }) => {
                    history.lock().await.add(&text, timestamp);
                }
                Some(_) => {}
                None => break,
            },
        }
    }
}

async fn log_agent_errors(mut events: EventReceiver, ct: CancellationToken) {
    loop {
        tokio::select! {
            biased;
            () = ct.cancelled() => break,
            event = events.recv() => match event {
                Some(AgentEvent::Error { message, code }) => {
                    warn!(%message, code = code.as_deref(), "agent error");
                }
                Some(_) => {}
                None => break,
            },
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|err| AppError::Io(format!("failed to encode output: {err}")))?;
    println!("{text}");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
