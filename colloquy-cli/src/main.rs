//! Colloquy CLI - chatbot, translator and chain server

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colloquy_core::chain::{ModelStage, Stage, TranslationChain, TranslationInput};
use colloquy_core::config::ColloquyConfig;
use colloquy_core::conversation::{ConversationOrchestrator, ExtraParams, SessionStore};
use colloquy_core::llm::{LLMProviderFactory, Message};
use colloquy_core::server::{ChainInput, ConversationInput, RemoteChain};
use futures::{Stream, StreamExt};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncBufReadExt;

#[derive(Parser)]
#[command(name = "colloquy")]
#[command(about = "Session-aware chat, translation and chain serving", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file merged over colloquy.toml
    #[arg(short, long, global = true, env = "COLLOQUY_CONFIG")]
    config: Option<PathBuf>,

    /// Model name overriding the configured one
    #[arg(short, long, global = true)]
    model: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with memory, one session per id
    Chat(ChatArgs),
    /// Translate text into another language
    Translate {
        /// Target language
        #[arg(short, long)]
        language: String,
        /// Text to translate
        text: String,
        /// Print fragments as they arrive
        #[arg(long)]
        stream: bool,
    },
    /// Serve the chains over HTTP
    Serve {
        /// Host to bind (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Port to bind (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Call a running chain server
    Remote {
        /// Chain URL
        #[arg(long, default_value = "http://localhost:8000/chain/")]
        url: String,
        /// Target or answer language
        #[arg(short, long)]
        language: String,
        /// Session id; when set the text is sent as a chat message
        #[arg(short, long)]
        session: Option<String>,
        /// Text to send
        text: String,
        /// Print fragments as they arrive
        #[arg(long)]
        stream: bool,
    },
    /// Version information
    Version,
}

#[derive(Args)]
struct ChatArgs {
    /// Session id
    #[arg(short, long, default_value = "default")]
    session: String,
    /// Answer language (defaults to chat.default_language)
    #[arg(short, long)]
    language: Option<String>,
    /// Send one message and exit instead of reading stdin
    #[arg(long)]
    message: Option<String>,
    /// Print fragments as they arrive
    #[arg(long)]
    stream: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Version => {
            println!("colloquy {}", env!("CARGO_PKG_VERSION"));
            println!("colloquy-core {}", colloquy_core::VERSION);
        }
        Commands::Chat(args) => {
            let config = load_config(cli.config, cli.model)?;
            chat(&config, args).await?;
        }
        Commands::Translate {
            language,
            text,
            stream,
        } => {
            let config = load_config(cli.config, cli.model)?;
            let provider = LLMProviderFactory::create(&config.llm)?;
            let chain = TranslationChain::new(ModelStage::from_config(provider, &config.llm));
            let input = TranslationInput::new(language, text);

            if stream {
                print_stream(chain.stream(input)).await?;
            } else {
                println!("{}", chain.invoke(input).await?);
            }
        }
        Commands::Serve { host, port } => {
            let mut config = load_config(cli.config, cli.model)?;
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }

            colloquy_core::server::run_server(&config, async {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("Shutting down");
            })
            .await?;
        }
        Commands::Remote {
            url,
            language,
            session,
            text,
            stream,
        } => {
            let remote = RemoteChain::new(url)?;
            let input = match &session {
                Some(_) => ChainInput::Chat(ConversationInput {
                    messages: vec![Message::user(text)],
                    language: Some(language),
                }),
                None => ChainInput::Translate(TranslationInput::new(language, text)),
            };

            if stream {
                print_stream(remote.stream(input, session.as_deref()).await?).await?;
            } else {
                println!("{}", remote.invoke(input, session.as_deref()).await?);
            }
        }
    }

    Ok(())
}

fn load_config(path: Option<PathBuf>, model: Option<String>) -> Result<ColloquyConfig> {
    let mut config =
        ColloquyConfig::load_with(path.as_ref()).context("Failed to load configuration")?;
    if let Some(model) = model {
        config.llm.model = model;
    }
    tracing::debug!(
        provider = ?config.llm.provider,
        project = %config.tracing.project,
        trace_export = config.tracing.export_enabled(),
        "Configuration loaded"
    );
    Ok(config)
}

async fn chat(config: &ColloquyConfig, args: ChatArgs) -> Result<()> {
    let provider = LLMProviderFactory::create(&config.llm)?;
    let chat =
        ConversationOrchestrator::from_config(config, Arc::new(SessionStore::new()), provider)?;

    let language = args
        .language
        .unwrap_or_else(|| config.chat.default_language.clone());
    let params = ExtraParams::from([("language".to_string(), language)]);

    if let Some(message) = args.message {
        return exchange(&chat, &args.session, message, &params, args.stream).await;
    }

    eprintln!(
        "Session '{}'. Type /history to show it, /exit to quit.",
        args.session
    );
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        eprint!("> ");
        std::io::stderr().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        match line {
            "" => continue,
            "/exit" | "/quit" => break,
            "/history" => {
                for message in chat.store().read(&args.session) {
                    println!(
                        "[{}] {}: {}",
                        message.sequence_index(),
                        message.role().as_str(),
                        message.content()
                    );
                }
            }
            _ => {
                // A failed exchange leaves the session as it was; keep going
                if let Err(e) =
                    exchange(&chat, &args.session, line.to_string(), &params, args.stream).await
                {
                    eprintln!("error: {e:#}");
                }
            }
        }
    }

    Ok(())
}

async fn exchange(
    chat: &ConversationOrchestrator,
    session: &str,
    message: String,
    params: &ExtraParams,
    stream: bool,
) -> Result<()> {
    if stream {
        print_stream(chat.stream(session, message, params)).await
    } else {
        let reply = chat.invoke(session, message, params).await?;
        println!("{}", reply.content());
        Ok(())
    }
}

async fn print_stream<S>(mut fragments: S) -> Result<()>
where
    S: Stream<Item = colloquy_core::error::Result<String>> + Unpin,
{
    let mut stdout = std::io::stdout();
    while let Some(fragment) = fragments.next().await {
        write!(stdout, "{}", fragment?)?;
        stdout.flush()?;
    }
    writeln!(stdout)?;
    Ok(())
}
