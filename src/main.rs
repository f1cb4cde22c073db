//! quarto-chat: a terminal data science chatbot that answers with Quarto documents.

use anyhow::Context;
use chrono::Local;
use clap::Parser;
use futures::stream::StreamExt;
use quarto_chat::config::AppConfig;
use quarto_chat::llm::tools::{LlmTool, ShowAnswerTool};
use quarto_chat::llm::{ChatSession, LlmBroker, ProviderKind};
use quarto_chat::prompt;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "quarto-chat")]
#[command(version)]
#[command(about = "Data science chat that writes every answer to a Quarto document")]
struct Cli {
    /// Model provider: anthropic or openai
    #[arg(long)]
    provider: Option<ProviderKind>,

    /// Model name (defaults to the provider's default model)
    #[arg(long)]
    model: Option<String>,

    /// Directory the .qmd documents are written to
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Wait for the full reply instead of streaming it
    #[arg(long)]
    no_stream: bool,

    /// Give up after this many filename collisions per document
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    max_write_attempts: Option<u32>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn apply(self, config: &mut AppConfig) {
        if let Some(provider) = self.provider {
            config.provider = provider;
        }
        if let Some(model) = self.model {
            config.model = Some(model);
        }
        if let Some(dir) = self.output_dir {
            config.output_dir = dir;
        }
        if let Some(max) = self.max_write_attempts {
            config.max_write_attempts = Some(max);
        }
    }
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let stream = !cli.no_stream;
    let mut config = AppConfig::from_env().context("Failed to read configuration")?;
    cli.apply(&mut config);

    let gateway = config
        .provider
        .build_gateway(&config)
        .with_context(|| format!("Failed to set up the {} provider", config.provider))?;
    let stream = stream && gateway.supports_streaming();

    let model = config.model().to_string();
    info!("Using provider {}, model {}", config.provider, model);
    info!("Output directory: {}", config.output_dir.display());

    let author = prompt::author_name(config.provider, &model);
    let tools: Vec<Box<dyn LlmTool>> = vec![Box::new(ShowAnswerTool::new(config.writer()))];
    let mut session = ChatSession::builder(LlmBroker::new(model, gateway))
        .system_prompt(prompt::system_prompt(&author, Local::now().naive_local()))
        .tools(tools)
        .build();

    println!("Quarto Data Science Chat ({})", config.provider);
    println!("{}\n", prompt::greeting(&author, &config.output_dir));

    run(&mut session, stream).await?;

    println!("Goodbye!");
    Ok(())
}

async fn run(session: &mut ChatSession, stream: bool) -> anyhow::Result<()> {
    let stdin = io::stdin();
    let mut input = stdin.lock();

    loop {
        print!("You: ");
        io::stdout().flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            println!();
            return Ok(());
        }
        let query = line.trim();
        if query.is_empty() {
            return Ok(());
        }

        print!("Assistant: ");
        io::stdout().flush()?;

        if stream {
            let mut chunks = session.send_stream(query);
            while let Some(chunk) = chunks.next().await {
                match chunk {
                    Ok(text) => {
                        print!("{}", text);
                        io::stdout().flush()?;
                    }
                    Err(e) => println!("\nError: {}", e),
                }
            }
            println!("\n");
        } else {
            match session.send(query).await {
                Ok(reply) => println!("{}\n", reply),
                Err(e) => println!("Error: {}\n", e),
            }
        }
    }
}
