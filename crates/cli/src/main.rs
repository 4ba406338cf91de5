use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use switchyard::llm::{ChatMessage, EventKind, Provider, StreamEvent, ToolDefinition};

#[derive(Parser)]
#[command(name = "switchyard")]
#[command(about = "Switchyard CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config file.
    Init {
        /// Config file path (default: SWITCHYARD_CONFIG_PATH or ~/.switchyard/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Run the HTTP gateway in front of the configured provider.
    Serve {
        /// Config file path (default: SWITCHYARD_CONFIG_PATH or ~/.switchyard/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// HTTP port (default from config or 15151)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Chat with the configured provider directly (interactive, streamed).
    Chat {
        /// Config file path (default: SWITCHYARD_CONFIG_PATH or ~/.switchyard/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// JSON file with an array of tool definitions ({name, description, parameters}).
        #[arg(long, value_name = "FILE")]
        tools: Option<PathBuf>,
    },

    /// List the models the configured provider offers.
    Models {
        /// Config file path (default: SWITCHYARD_CONFIG_PATH or ~/.switchyard/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Report whether native tool calling will be used for the configured model.
    Probe {
        /// Config file path (default: SWITCHYARD_CONFIG_PATH or ~/.switchyard/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("switchyard {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Serve { config, port }) => {
            if let Err(e) = run_serve(config, port).await {
                log::error!("gateway failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Chat { config, tools }) => {
            if let Err(e) = run_chat(config, tools).await {
                log::error!("chat failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Models { config }) => {
            if let Err(e) = run_models(config).await {
                log::error!("listing models failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Probe { config }) => {
            if let Err(e) = run_probe(config).await {
                log::error!("probe failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(switchyard::config::default_config_path);
    let dir = switchyard::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_serve(config_path: Option<PathBuf>, port: Option<u16>) -> anyhow::Result<()> {
    let (mut config, path) = switchyard::config::load_config(config_path)?;
    if let Some(p) = port {
        config.gateway.port = p;
    }
    log::info!("starting gateway on {}:{}", config.gateway.bind, config.gateway.port);
    switchyard::gateway::run_gateway(config, path).await
}

fn load_provider(config_path: Option<PathBuf>) -> anyhow::Result<Provider> {
    let (config, path) = switchyard::config::load_config(config_path)?;
    Provider::from_config(&config)
        .with_context(|| format!("configuring provider from {}", path.display()))
}

fn load_tools(path: Option<PathBuf>) -> anyhow::Result<Vec<ToolDefinition>> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };
    let s = std::fs::read_to_string(&path)
        .with_context(|| format!("reading tools from {}", path.display()))?;
    serde_json::from_str(&s).with_context(|| format!("parsing tools from {}", path.display()))
}

async fn run_models(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let provider = load_provider(config_path)?;
    for model in provider.list_models().await? {
        println!("{}", model);
    }
    Ok(())
}

async fn run_probe(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let provider = load_provider(config_path)?;
    let support = provider.supports_native_tools().await;
    println!(
        "{} / {}: native tool calling {}",
        provider.kind(),
        provider.model(),
        serde_json::to_value(support)?.as_str().unwrap_or("unknown")
    );
    Ok(())
}

/// Prints streamed text to stdout and status lines to stderr.
fn print_event(event: StreamEvent) {
    match event.kind {
        EventKind::TextChunk => {
            print!("{}", event.content);
            let _ = io::stdout().flush();
        }
        EventKind::Status => eprintln!("[{}]", event.content),
        EventKind::ToolCallAssembling
        | EventKind::ToolCallInvocation
        | EventKind::RemoveStatus => {}
    }
}

async fn run_chat(config_path: Option<PathBuf>, tools: Option<PathBuf>) -> anyhow::Result<()> {
    let provider = load_provider(config_path)?;
    let tools = load_tools(tools)?;
    let mut history: Vec<ChatMessage> = Vec::new();
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("/exit") || input.eq_ignore_ascii_case("/quit") {
            break;
        }

        history.push(ChatMessage::user(input));
        print!("< ");
        match provider.stream(&history, &tools, &print_event).await {
            Ok(result) => {
                println!();
                if let Some(call) = &result.function_call {
                    println!(
                        "[tool call] {}({})",
                        call.name,
                        serde_json::Value::Object(call.arguments.clone())
                    );
                }
                if let Some(text) = result.text_response.filter(|t| !t.is_empty()) {
                    history.push(ChatMessage::assistant(text));
                }
            }
            Err(e) => {
                println!();
                eprintln!("chat error: {}", e);
                history.pop();
            }
        }
    }

    Ok(())
}
