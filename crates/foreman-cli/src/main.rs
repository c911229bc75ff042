use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use foreman_channels::api::ApiChannel;
use foreman_channels::manager::ChannelManager;
use foreman_channels::web::WebChannel;
use foreman_config::{find_config_path, load_config};
use foreman_core::agent::memory::TurnRole;
use foreman_core::bus::{MessageBus, OutboundMessage};
use foreman_core::session::{Session, SessionManager};
use foreman_core::{Oracle, OraclePool, RigOracle, Router, RouterFactory, RouterReply};
#[allow(deprecated)]
use rig::client::completion::CompletionModelHandle;
use rig::client::{CompletionClient, Nothing};
use rig::providers::{anthropic, groq, ollama, openai, openrouter};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

/// Render markdown text to the terminal using termimad.
fn render_markdown(text: &str) {
    let skin = termimad::MadSkin::default();
    skin.print_text(text);
}

#[derive(Parser)]
#[command(name = "foreman", about = "Manager/specialist routing assistant", version)]
struct Cli {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run interactive CLI chat with the manager
    Chat {
        /// Single message mode (non-interactive)
        #[arg(short, long)]
        message: Option<String>,

        /// Session ID for conversation tracking
        #[arg(short, long, default_value = "cli:interactive")]
        session: String,
    },
    /// Start the gateway with all enabled chat shells
    Serve,
    /// Initialize configuration
    Onboard {
        /// Skip interactive prompts and write defaults
        #[arg(long)]
        non_interactive: bool,
    },
    /// Show configuration summary
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let base_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = format!("{base_filter},foreman_core::agent=debug");
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(find_config_path);

    match cli.command {
        Commands::Onboard { non_interactive } => {
            return run_onboard(cli.config, non_interactive);
        }
        Commands::Status => {
            return run_status(&config_path);
        }
        _ => {}
    }

    let config = load_config(&config_path)?;
    let oracles = create_oracle_pool(&config)?;
    let factory = RouterFactory::new(oracles, &config);

    match cli.command {
        Commands::Chat { message, session } => {
            if let Some(msg) = message {
                run_single_message(&factory, &session, &msg).await?;
            } else {
                run_interactive(&factory, &session).await?;
            }
        }
        Commands::Serve => {
            run_gateway(&config, factory).await?;
        }
        _ => unreachable!(),
    }

    Ok(())
}

/// Resolve an API key from config, falling back to an environment variable.
fn resolve_api_key(
    provider_cfg: &Option<foreman_config::ProviderConfig>,
    env_var: &str,
) -> Option<String> {
    provider_cfg
        .as_ref()
        .and_then(|c| c.api_key.clone())
        .filter(|k| !k.is_empty())
        .or_else(|| std::env::var(env_var).ok().filter(|k| !k.is_empty()))
}

/// Create a reasoning oracle for a specific provider + model combination.
///
/// Errors clearly if the provider is unknown or has no API key.
#[allow(deprecated)]
fn create_oracle_for(
    provider: &str,
    model_name: &str,
    config: &foreman_config::Config,
) -> Result<Arc<dyn Oracle>> {
    if provider.is_empty() {
        anyhow::bail!(
            "No provider configured.\n\
             Valid providers: openai, anthropic, ollama, openrouter, groq"
        );
    }

    if model_name.is_empty() {
        anyhow::bail!("No model configured for provider '{provider}'.");
    }

    let handle: CompletionModelHandle<'static> = match provider {
        "openai" => {
            let key =
                resolve_api_key(&config.providers.openai, "OPENAI_API_KEY").ok_or_else(|| {
                    anyhow::anyhow!(
                        "OpenAI provider selected but no API key found. \
                         Set providers.openai.apiKey in config.json or OPENAI_API_KEY env var."
                    )
                })?;
            let mut builder = openai::CompletionsClient::builder().api_key(&key);
            if let Some(ref base) = config
                .providers
                .openai
                .as_ref()
                .and_then(|c| c.api_base.clone())
                .filter(|b| !b.is_empty())
            {
                builder = builder.base_url(base);
                tracing::info!("Using OpenAI provider with custom base: {base}");
            }
            let client: openai::CompletionsClient = builder
                .build()
                .map_err(|e| anyhow::anyhow!("Failed to create OpenAI client: {e}"))?;
            CompletionModelHandle::new(Arc::new(client.completion_model(model_name)))
        }

        "anthropic" => {
            let key = resolve_api_key(&config.providers.anthropic, "ANTHROPIC_API_KEY")
                .ok_or_else(|| {
                    anyhow::anyhow!(
                        "Anthropic provider selected but no API key found. \
                         Set providers.anthropic.apiKey in config.json or ANTHROPIC_API_KEY env var."
                    )
                })?;
            let client: anthropic::Client = anthropic::Client::builder()
                .api_key(&key)
                .build()
                .map_err(|e| anyhow::anyhow!("Failed to create Anthropic client: {e}"))?;
            let model = client.completion_model(model_name).with_prompt_caching();
            CompletionModelHandle::new(Arc::new(model))
        }

        "ollama" => {
            let mut builder = ollama::Client::builder().api_key(Nothing);
            if let Some(ref base) = config
                .providers
                .ollama
                .as_ref()
                .and_then(|c| c.api_base.clone())
                .filter(|b| !b.is_empty())
            {
                builder = builder.base_url(base);
            }
            let client: ollama::Client = builder
                .build()
                .map_err(|e| anyhow::anyhow!("Failed to create Ollama client: {e}"))?;
            CompletionModelHandle::new(Arc::new(client.completion_model(model_name)))
        }

        "openrouter" => {
            let key = resolve_api_key(&config.providers.openrouter, "OPENROUTER_API_KEY")
                .ok_or_else(|| {
                    anyhow::anyhow!(
                        "OpenRouter provider selected but no API key found. \
                         Set providers.openrouter.apiKey in config.json or OPENROUTER_API_KEY env var."
                    )
                })?;
            let client: openrouter::Client = openrouter::Client::new(&key)
                .map_err(|e| anyhow::anyhow!("Failed to create OpenRouter client: {e}"))?;
            CompletionModelHandle::new(Arc::new(client.completion_model(model_name)))
        }

        "groq" => {
            let key = resolve_api_key(&config.providers.groq, "GROQ_API_KEY").ok_or_else(|| {
                anyhow::anyhow!(
                    "Groq provider selected but no API key found. \
                     Set providers.groq.apiKey in config.json or GROQ_API_KEY env var."
                )
            })?;
            let client: groq::Client = groq::Client::new(&key)
                .map_err(|e| anyhow::anyhow!("Failed to create Groq client: {e}"))?;
            CompletionModelHandle::new(Arc::new(client.completion_model(model_name)))
        }

        other => {
            anyhow::bail!(
                "Unknown provider '{other}'. \
                 Valid providers: openai, anthropic, ollama, openrouter, groq"
            );
        }
    };

    tracing::info!("Using {provider} provider with model '{model_name}'");
    Ok(Arc::new(RigOracle::new(handle, model_name)))
}

/// Build the oracle pool from config. The "manager" tier is required; the
/// "worker" tier falls back to it when absent.
fn create_oracle_pool(config: &foreman_config::Config) -> Result<OraclePool> {
    if config.agents.models.is_empty() {
        anyhow::bail!(
            "No models configured. Set agents.models in config.json with at least a \"manager\" entry.\n\
             Example:\n  \
             \"models\": {{ \"manager\": {{ \"provider\": \"openai\", \"model\": \"gpt-4o-mini\" }} }}"
        );
    }
    if !config.agents.models.contains_key(OraclePool::MANAGER_TIER) {
        anyhow::bail!("config.agents.models must contain at least a \"manager\" entry.");
    }

    let mut oracles: HashMap<String, Arc<dyn Oracle>> = HashMap::new();
    for (tier, model_ref) in &config.agents.models {
        let oracle = create_oracle_for(&model_ref.provider, &model_ref.model, config)
            .map_err(|e| anyhow::anyhow!("Failed to create model for tier '{tier}': {e}"))?;
        tracing::info!(
            "Oracle tier '{tier}': {} / {}",
            model_ref.provider,
            model_ref.model
        );
        oracles.insert(tier.clone(), oracle);
    }

    Ok(OraclePool::new(oracles))
}

fn sessions_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".foreman")
        .join("sessions")
}

/// Map stored user/assistant turns back into memory seeds.
/// Specialist trace entries stay display-only.
fn seed_turns(session: &Session) -> Vec<(TurnRole, String)> {
    session
        .messages
        .iter()
        .filter_map(|m| match m.role.as_str() {
            "user" => Some((TurnRole::User, m.content.clone())),
            "assistant" => Some((TurnRole::Assistant, m.content.clone())),
            _ => None,
        })
        .collect()
}

/// Build a router for a session, re-injecting its persisted history.
fn build_router(factory: &RouterFactory, sessions: &mut SessionManager, key: &str) -> Router {
    let mut router = factory.build();
    let session = sessions.get_or_create(key);
    let turns = seed_turns(session);
    if !turns.is_empty() {
        tracing::info!("Re-injecting {} stored turn(s) for '{key}'", turns.len());
        router.seed_history(&turns);
    }
    router
}

/// Persist one completed turn (input, delegation trace, output).
fn persist_turn(sessions: &mut SessionManager, key: &str, input: &str, reply: &RouterReply) {
    let session = sessions.get_or_create(key);
    session.add_message("user", input);
    for step in &reply.intermediate_steps {
        session.add_message(step.role.as_str(), &step.response);
    }
    session.add_message("assistant", &reply.output);
    if let Err(e) = sessions.save(key) {
        tracing::warn!("Failed to persist session '{key}': {e}");
    }
}

fn print_reply(reply: &RouterReply) {
    for step in &reply.intermediate_steps {
        println!("[{}] {}", step.role.as_str(), step.response);
    }
    if !reply.intermediate_steps.is_empty() {
        println!();
    }
    render_markdown(&reply.output);
}

async fn run_single_message(factory: &RouterFactory, session_key: &str, message: &str) -> Result<()> {
    let mut sessions = SessionManager::new(sessions_dir());
    let mut router = build_router(factory, &mut sessions, session_key);

    let reply = router.handle(message).await;
    print_reply(&reply);
    persist_turn(&mut sessions, session_key, message, &reply);
    Ok(())
}

async fn run_interactive(factory: &RouterFactory, session_key: &str) -> Result<()> {
    let mut sessions = SessionManager::new(sessions_dir());
    let mut router = build_router(factory, &mut sessions, session_key);

    let history_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".foreman")
        .join("history");
    std::fs::create_dir_all(&history_dir)?;
    let history_path = history_dir.join("cli_history");

    let mut rl = DefaultEditor::new()?;
    let _ = rl.load_history(&history_path);

    println!("foreman interactive mode (type /help for commands, Ctrl-D to quit)");
    println!();

    loop {
        let readline = rl.readline("you> ");
        match readline {
            Ok(line) => {
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }

                let _ = rl.add_history_entry(input);

                if matches!(input, "exit" | "quit" | "/exit" | "/quit" | ":q") {
                    break;
                }

                match input {
                    "/help" => {
                        println!("Commands:");
                        println!("  /new   - Start a new conversation");
                        println!("  /help  - Show this help");
                        println!("  /quit  - Exit");
                        println!();
                        continue;
                    }
                    "/new" => {
                        let session = sessions.get_or_create(session_key);
                        session.clear();
                        if let Err(e) = sessions.save(session_key) {
                            tracing::warn!("Failed to save cleared session: {e}");
                        }
                        router = factory.build();
                        println!("New conversation started.");
                        println!();
                        continue;
                    }
                    _ => {}
                }

                let reply = router.handle(input).await;
                println!();
                print_reply(&reply);
                println!();
                persist_turn(&mut sessions, session_key, input, &reply);
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                eprintln!("Error: {err}");
                break;
            }
        }
    }

    let _ = rl.save_history(&history_path);
    Ok(())
}

/// Run the full gateway: chat shells + the routing loop behind the bus.
async fn run_gateway(config: &foreman_config::Config, factory: RouterFactory) -> Result<()> {
    tracing::info!("Starting gateway...");

    let mut bus = MessageBus::new(128);
    let mut sessions = SessionManager::new(sessions_dir());

    // One router per session key: specialists keep their private memories
    // for the process lifetime, while conversation state stays per-message.
    let mut routers: HashMap<String, Router> = HashMap::new();

    let outbound_rx = bus.outbound_tx.subscribe();
    let mut channel_manager = ChannelManager::new(outbound_rx);

    if config.channels.web.enabled {
        match WebChannel::new(
            config.channels.web.clone(),
            config.gateway.clone(),
            sessions_dir(),
        ) {
            Ok(web) => {
                channel_manager.register(Arc::new(web)).await;
                tracing::info!(
                    "Web channel registered on {}:{}",
                    config.gateway.host,
                    config.gateway.port
                );
            }
            Err(e) => {
                tracing::error!("Failed to create Web channel: {e}");
            }
        }
    }

    if config.channels.api.enabled {
        match ApiChannel::new(
            config.channels.api.clone(),
            config.gateway.clone(),
            sessions_dir(),
        ) {
            Ok(api) => {
                channel_manager.register(Arc::new(api)).await;
                tracing::info!(
                    "Api channel registered on {}:{}",
                    config.gateway.host,
                    config.channels.api.port
                );
            }
            Err(e) => {
                tracing::error!("Failed to create Api channel: {e}");
            }
        }
    }

    let enabled = channel_manager.enabled_channels().await;
    if enabled.is_empty() {
        tracing::warn!("No channels enabled. Configure channels in config.json.");
    } else {
        tracing::info!("Starting channels: {}", enabled.join(", "));
    }
    channel_manager.start_all(bus.inbound_tx.clone()).await?;

    tracing::info!("Gateway running. Press Ctrl-C to stop.");

    loop {
        let msg = tokio::select! {
            msg = bus.inbound_rx.recv() => match msg {
                Some(m) => m,
                None => {
                    tracing::info!("Inbound channel closed");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down...");
                break;
            }
        };

        let session_key = msg.session_key();
        let content = msg.content.trim();

        // Slash commands handled at the gateway, not by the manager.
        if content == "/new" {
            routers.remove(&session_key);
            let session = sessions.get_or_create(&session_key);
            session.clear();
            if let Err(e) = sessions.save(&session_key) {
                tracing::warn!("Failed to save cleared session '{session_key}': {e}");
            }
            publish(
                &bus.outbound_tx,
                &msg.channel,
                &msg.chat_id,
                "New conversation started.".to_string(),
                Vec::new(),
            );
            continue;
        }
        if content == "/help" || content == "/start" {
            publish(
                &bus.outbound_tx,
                &msg.channel,
                &msg.chat_id,
                "Hi! I'm Foreman, a manager agent backed by a data scientist and a \
                 business analyst.\n\nSend me a question and I'll route it.\n\n\
                 Commands:\n/new - Start a new conversation\n/help - Show this help"
                    .to_string(),
                Vec::new(),
            );
            continue;
        }

        let router = routers
            .entry(session_key.clone())
            .or_insert_with(|| build_router(&factory, &mut sessions, &session_key));

        let reply = tokio::select! {
            reply = router.handle(&msg.content) => reply,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down...");
                break;
            }
        };

        persist_turn(&mut sessions, &session_key, &msg.content, &reply);
        publish(
            &bus.outbound_tx,
            &msg.channel,
            &msg.chat_id,
            reply.output,
            reply.intermediate_steps,
        );
    }

    channel_manager.stop_all().await?;
    tracing::info!("Gateway stopped");

    Ok(())
}

fn publish(
    outbound_tx: &tokio::sync::broadcast::Sender<OutboundMessage>,
    channel: &str,
    chat_id: &str,
    content: String,
    steps: Vec<foreman_core::TraceStep>,
) {
    if let Err(e) = outbound_tx.send(OutboundMessage {
        channel: channel.to_string(),
        chat_id: chat_id.to_string(),
        content,
        steps,
        metadata: HashMap::new(),
    }) {
        tracing::warn!("Failed to publish outbound response to bus: {e}");
    }
}

fn prompt_with_default(prompt: &str, default: &str) -> Result<String> {
    use std::io::{self, Write};
    print!("{prompt} [{default}]: ");
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let trimmed = input.trim();
    if trimmed.is_empty() {
        Ok(default.to_string())
    } else {
        Ok(trimmed.to_string())
    }
}

fn prompt_yes_no(prompt: &str, default_yes: bool) -> Result<bool> {
    use std::io::{self, Write};
    let default = if default_yes { "Y/n" } else { "y/N" };
    print!("{prompt} ({default}): ");
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let answer = input.trim();
    if answer.is_empty() {
        return Ok(default_yes);
    }
    let lower = answer.to_lowercase();
    Ok(matches!(lower.as_str(), "y" | "yes"))
}

/// Initialize configuration.
fn run_onboard(config_arg: Option<PathBuf>, non_interactive: bool) -> Result<()> {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    let foreman_dir = home.join(".foreman");
    std::fs::create_dir_all(&foreman_dir)?;

    let config_path = config_arg.unwrap_or_else(|| foreman_dir.join("config.json"));
    if config_path.exists() {
        println!("Config already exists: {}", config_path.display());
        println!("To reset, delete it and run `foreman onboard` again.");
        return Ok(());
    }

    let mut cfg = foreman_config::Config::default();
    let mut manager_ref = foreman_config::ModelRef {
        provider: "openai".into(),
        model: "gpt-4o-mini".into(),
    };

    if !non_interactive {
        println!("Interactive setup");
        manager_ref.provider = prompt_with_default("Manager provider", &manager_ref.provider)?;
        manager_ref.model = prompt_with_default("Manager model", &manager_ref.model)?;

        let enable_web = prompt_yes_no("Enable Web chat shell?", true)?;
        cfg.channels.web.enabled = enable_web;
        if enable_web {
            cfg.channels.web.password =
                prompt_with_default("Web chat password (empty for open access)", "")?;
        }

        cfg.channels.api.enabled = prompt_yes_no("Enable HTTP/JSON shell?", false)?;
    } else {
        cfg.channels.web.enabled = true;
    }

    cfg.agents
        .models
        .insert("manager".to_string(), manager_ref.clone());
    cfg.agents.models.insert("worker".to_string(), manager_ref);

    foreman_config::save_config(&config_path, &cfg)?;
    println!("Created config: {}", config_path.display());

    std::fs::create_dir_all(sessions_dir())?;

    println!();
    println!("Setup complete! Next steps:");
    println!(
        "  1. Edit {} to configure providers and API keys",
        config_path.display()
    );
    println!("  2. Run `foreman chat` to talk to the manager");
    println!("  3. Run `foreman serve` to start the web shells");
    println!();

    Ok(())
}

/// Show configuration summary.
fn run_status(config_path: &Path) -> Result<()> {
    println!("foreman status");
    println!();

    if config_path.exists() {
        println!("  Config:   {} (found)", config_path.display());
    } else {
        println!(
            "  Config:   {} (not found — run `foreman onboard`)",
            config_path.display()
        );
        return Ok(());
    }

    let config = load_config(config_path)?;

    println!("  Models:");
    if config.agents.models.is_empty() {
        println!("    (none configured)");
    }
    for (tier, model_ref) in &config.agents.models {
        println!("    {tier}: {} / {}", model_ref.provider, model_ref.model);
    }
    println!();

    let d = &config.agents.defaults;
    println!("  Routing:");
    println!("    Decision step cap:  {}", d.max_decision_steps);
    println!("    Loop ceiling:       {}", d.max_route_iterations);
    println!("    Memory budget:      {} tokens", d.memory_token_budget);
    println!();

    let search_key = if config.tools.search.api_key.is_empty() {
        std::env::var("TAVILY_API_KEY").unwrap_or_default()
    } else {
        config.tools.search.api_key.clone()
    };
    println!("  Tools:");
    println!(
        "    Search: {}",
        if search_key.is_empty() {
            "not configured"
        } else {
            "configured"
        }
    );
    println!();

    println!("  Channels:");
    println!(
        "    Web: {} ({}:{})",
        if config.channels.web.enabled {
            "enabled"
        } else {
            "disabled"
        },
        config.gateway.host,
        config.gateway.port
    );
    println!(
        "    Api: {} ({}:{})",
        if config.channels.api.enabled {
            "enabled"
        } else {
            "disabled"
        },
        config.gateway.host,
        config.channels.api.port
    );

    Ok(())
}
