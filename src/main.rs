use clap::{Parser, Subcommand};
use std::fs::File;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use swapbot::application::errors::BotError;
use swapbot::application::extensions::discovery;
use swapbot::application::services::CommandService;
use swapbot::application::session::{Session, SessionSettings};
use swapbot::domain::traits::Bot;
use swapbot::infrastructure::adapters::console::{ConsoleAdapter, CONSOLE_ID};
use swapbot::infrastructure::adapters::telegram::TelegramAdapter;
use swapbot::infrastructure::config::{Config, LoggingConfig};
use swapbot::infrastructure::extensions::DylibHost;

#[derive(Parser)]
#[command(name = "swapbot")]
#[command(about = "A chat bot with hot-swappable extensions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Bot token (overrides config and BOT_TOKEN)
    #[arg(short, long)]
    token: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the bot
    Run,
    /// Start a local console session, the console user is an administrator
    Console,
    /// List the extensions that would be loaded
    ListExtensions,
    /// Show version
    Version,
    /// Generate default config
    InitConfig,
}

fn main() {
    let cli = Cli::parse();

    let (mut config, load_error) = match Config::load_or_default(&cli.config) {
        Ok(config) => (config, None),
        Err(e) => (Config::load_env(), Some(e)),
    };
    if let Some(token) = cli.token {
        config.adapters.telegram.token = Some(token);
    }

    init_logging(&config.logging);
    if let Some(e) = load_error {
        tracing::warn!("Failed to load config: {}, using defaults", e);
    }

    match cli.command {
        Commands::Run => {
            let token = match config.token() {
                Ok(token) => token,
                Err(e) => {
                    tracing::error!("Cannot start: {}. Set BOT_TOKEN or pass --token", e);
                    std::process::exit(1);
                }
            };
            let bot = TelegramAdapter::new(token, &config.bot.prefix);
            block_on_session(Arc::new(bot), &config);
        }
        Commands::Console => {
            if !config.is_admin(CONSOLE_ID) {
                config.admins.users.push(CONSOLE_ID.to_string());
            }
            let bot = ConsoleAdapter::new(&config.bot.prefix);
            block_on_session(Arc::new(bot), &config);
        }
        Commands::ListExtensions => {
            list_extensions(&config);
        }
        Commands::Version => {
            println!("swapbot v{}", env!("CARGO_PKG_VERSION"));
        }
        Commands::InitConfig => {
            if let Err(e) = init_config(Path::new(&cli.config)) {
                tracing::error!("{}", e);
                std::process::exit(1);
            }
        }
    }
}

/// Console output plus an optional plain-text log file
fn init_logging(logging: &LoggingConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let file_layer = logging.file.as_ref().and_then(|path| {
        match File::options().create(true).append(true).open(path) {
            Ok(file) => Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false)
                    .with_target(false),
            ),
            Err(e) => {
                eprintln!("Cannot open log file {}: {}", path.display(), e);
                None
            }
        }
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(file_layer)
        .init();
}

fn extension_suffix(config: &Config) -> String {
    config
        .extensions
        .suffix
        .clone()
        .unwrap_or_else(|| discovery::default_suffix().to_string())
}

fn block_on_session(bot: Arc<dyn Bot>, config: &Config) {
    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = rt.block_on(run_session(bot, config)) {
        tracing::error!("Bot stopped with an error: {}", e);
        std::process::exit(1);
    }
}

async fn run_session(bot: Arc<dyn Bot>, config: &Config) -> Result<(), BotError> {
    tracing::info!("Starting {}", config.bot.name);
    let suffix = extension_suffix(config);

    let commands = CommandService::new(&config.bot.prefix);
    let mut host = DylibHost::new(commands.registry()).with_suffix(&suffix);
    if let Some(dir) = &config.extensions.shadow_directory {
        host = host.with_shadow_dir(dir);
    }

    let settings = SessionSettings {
        admins: config.admins.users.clone(),
        extensions_dir: config.extensions.directory.clone(),
        suffix,
        operation_timeout: config.extensions.operation_timeout(),
    };

    let session = Session::new(bot, Arc::new(host), commands, settings);
    session.run().await
}

fn list_extensions(config: &Config) {
    let base = discovery::working_dir();
    let found = discovery::discover(&config.extensions.directory, &extension_suffix(config));

    if found.is_empty() {
        println!("No extensions found in {}", config.extensions.directory.display());
        return;
    }
    for path in found {
        println!("{}", discovery::path_to_identifier(&path, &base));
    }
}

fn init_config(path: &Path) -> Result<(), String> {
    if path.exists() {
        return Err(format!("{} already exists, not overwriting", path.display()));
    }

    let yaml = Config::default().to_yaml().map_err(|e| e.to_string())?;
    std::fs::write(path, yaml).map_err(|e| format!("Failed to write {}: {}", path.display(), e))?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}
