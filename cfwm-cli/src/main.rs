//! CLI entry point for cfwm

use anyhow::Result;
use cfwm_agent::{BotLoop, ConversationEngine, EngineSettings};
use cfwm_channels::ChannelManager;
use cfwm_core::bus::{InboundMessage, MessageBus};
use cfwm_core::config::validate::validate_config;
use cfwm_core::config::{Config, ConfigLoader};
use cfwm_core::logging::init_logging;
use cfwm_core::session::{InMemorySessionStore, SessionStore};
use clap::{Parser, Subcommand};
use console::style;
use dialoguer::{Confirm, Input, Select};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

const TELEGRAM: &str = "telegram";

#[derive(Parser)]
#[command(name = "cfwm")]
#[command(about = "Cloudflare Worker Manager Telegram bot")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration directory
    #[arg(short, long, global = true)]
    config_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the configuration interactively
    Onboard,
    /// Run the bot until Ctrl+C
    Gateway,
    /// Show configuration status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    let config_loader = match cli.config_dir {
        Some(dir) => ConfigLoader::with_dir(dir),
        None => ConfigLoader::new(),
    };

    match cli.command {
        Commands::Onboard => {
            init_console_logging();
            run_onboard(&config_loader)?;
        }
        Commands::Gateway => run_gateway(&config_loader).await?,
        Commands::Status => {
            init_console_logging();
            run_status(&config_loader)?;
        }
    }

    Ok(())
}

/// Plain stderr logging for the short-lived commands
fn init_console_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
}

fn run_onboard(loader: &ConfigLoader) -> Result<()> {
    println!("{}", style("Welcome to Cloudflare Worker Manager!").bold().cyan());
    println!("Let's set up your configuration.\n");

    let config_path = loader.config_path();
    if config_path.exists() {
        let overwrite = Confirm::new()
            .with_prompt("Configuration already exists. Overwrite?")
            .default(false)
            .interact()?;
        if !overwrite {
            println!("Onboard cancelled.");
            return Ok(());
        }
    }

    let token: String = Input::new()
        .with_prompt("Enter your Telegram bot token (from @BotFather)")
        .interact_text()?;

    let admin_id: String = Input::new()
        .with_prompt("Enter the admin's Telegram chat ID")
        .validate_with(|input: &String| -> std::result::Result<(), &str> {
            input
                .trim()
                .parse::<i64>()
                .map(|_| ())
                .map_err(|_| "Chat IDs are numeric")
        })
        .interact_text()?;

    let modes = ["Long polling", "Webhook"];
    let mode = Select::new()
        .with_prompt("How should Telegram deliver updates?")
        .items(&modes)
        .default(0)
        .interact()?;

    let mut config = Config::default();
    config.channels.telegram.token = token.trim().to_string();
    config.bot.admin_id = admin_id.trim().to_string();

    if mode == 1 {
        let url: String = Input::new()
            .with_prompt("Public HTTPS URL for the webhook")
            .interact_text()?;
        let port: u16 = Input::new()
            .with_prompt("Local port to listen on")
            .default(config.channels.telegram.webhook.port)
            .interact_text()?;

        config.channels.telegram.webhook.enabled = true;
        config.channels.telegram.webhook.url = url.trim().to_string();
        config.channels.telegram.webhook.port = port;
    }

    if let Err(e) = validate_config(&config) {
        println!("{} {}", style("Warning:").yellow().bold(), e);
    }

    loader.save(&config)?;

    println!(
        "\n{}",
        style("Configuration saved successfully!").green().bold()
    );
    println!("Config location: {}", config_path.display());
    println!("\nYou can now run:");
    println!("  {} - Start the bot", style("cfwm gateway").cyan());
    println!("  {} - Check the configuration", style("cfwm status").cyan());

    Ok(())
}

/// Run the bot: Telegram updates in, engine replies out
async fn run_gateway(loader: &ConfigLoader) -> Result<()> {
    let config = loader.load()?;
    let _log_guard = init_logging(&config.logging);

    println!("{}", style("Starting Cloudflare Worker Manager...").bold().cyan());

    if config.bot.admin_id.is_empty() {
        warn!("bot.admin_id is not set; registration requests will not reach anyone");
    }

    let bus = MessageBus::new();

    let store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
    let engine = ConversationEngine::new(store, EngineSettings::from_config(TELEGRAM, &config.bot));
    let bot = BotLoop::new(bus.clone(), engine);

    let mut channel_manager = ChannelManager::new(config.clone());

    // Bridge channel inbound queue -> message bus inbound queue
    let (inbound_tx, mut inbound_rx) = mpsc::channel::<InboundMessage>(1024);
    channel_manager.set_inbound_sender(inbound_tx);
    let bus_for_inbound_bridge = bus.clone();
    let inbound_bridge_handle = tokio::spawn(async move {
        while let Some(msg) = inbound_rx.recv().await {
            if let Err(e) = bus_for_inbound_bridge.publish_inbound(msg) {
                error!("Failed to publish inbound message to bus: {}", e);
            }
        }
    });

    channel_manager.initialize().await?;

    let channel_manager = Arc::new(channel_manager);
    let manager = channel_manager.clone();
    bus.subscribe_outbound(TELEGRAM, move |msg| {
        let manager = manager.clone();
        async move {
            if let Err(e) = manager.send(TELEGRAM, msg).await {
                error!("Failed to send outbound message to {}: {}", TELEGRAM, e);
            }
        }
    })
    .await;

    let bus_for_outbound_dispatch = bus.clone();
    let outbound_dispatch_handle = tokio::spawn(async move {
        bus_for_outbound_dispatch.dispatch_outbound_loop().await;
    });

    let bot_handle = tokio::spawn(async move {
        if let Err(e) = bot.run().await {
            error!("Bot loop error: {}", e);
        }
    });

    channel_manager.start_all().await?;
    if !channel_manager.is_channel_running(TELEGRAM).await {
        warn!("Telegram channel is not running; no updates will be received");
    }

    info!("Gateway started");
    println!(
        "\n{}",
        style("Gateway is running. Press Ctrl+C to stop.").green()
    );

    tokio::signal::ctrl_c().await?;
    println!("\n{}", style("Shutting down...").yellow());

    bus.stop().await;
    if let Err(e) = channel_manager.stop_all().await {
        error!("Failed to stop channels: {}", e);
    }

    for handle in [inbound_bridge_handle, outbound_dispatch_handle, bot_handle] {
        handle.abort();
        let _ = handle.await;
    }

    println!("{}", style("Gateway stopped.").green());
    Ok(())
}

fn run_status(loader: &ConfigLoader) -> Result<()> {
    let config = loader.load_unvalidated()?;

    println!("{}", style("Cloudflare Worker Manager Status").bold().cyan());
    println!("Version: {}\n", env!("CARGO_PKG_VERSION"));

    println!("{}", style("Configuration:").bold());
    println!("  Config file: {}", loader.config_path().display());
    println!("  Log directory: {}", config.logging.dir);
    println!();

    println!("{}", style("Bot:").bold());
    let admin = if config.bot.admin_id.is_empty() {
        style("not configured".to_string()).red()
    } else {
        style(config.bot.admin_id.clone()).green()
    };
    println!("  Admin: {}", admin);
    println!(
        "  Admin-only approval: {}",
        if config.bot.enforce_admin_approval { "on" } else { "off" }
    );
    println!();

    let telegram = &config.channels.telegram;
    println!("{}", style("Telegram:").bold());
    let enabled = if telegram.enabled {
        style("enabled").green()
    } else {
        style("disabled").dim()
    };
    println!("  Channel: {}", enabled);
    let token = if telegram.token.is_empty() {
        style("not configured").red()
    } else {
        style("configured").green()
    };
    println!("  Token: {}", token);
    if telegram.webhook.enabled {
        println!(
            "  Delivery: webhook {} (listening on {}:{})",
            telegram.webhook.url, telegram.webhook.listen_addr, telegram.webhook.port
        );
    } else {
        println!("  Delivery: long polling");
    }
    if telegram.allow_from.is_empty() {
        println!("  Allowed senders: everyone");
    } else {
        println!("  Allowed senders: {}", telegram.allow_from.join(", "));
    }
    println!();

    match validate_config(&config) {
        Ok(()) => println!("{}", style("Configuration is valid.").green()),
        Err(e) => println!("{} {}", style("Configuration problems:").red().bold(), e),
    }

    Ok(())
}
