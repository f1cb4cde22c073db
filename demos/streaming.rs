//! Stream one answer straight from the broker while show_answer writes the document.
//!
//! Run with: cargo run --example streaming -- "What is a violin plot?"

use chrono::Local;
use futures::stream::StreamExt;
use quarto_chat::config::AppConfig;
use quarto_chat::llm::gateway::CompletionConfig;
use quarto_chat::llm::models::LlmMessage;
use quarto_chat::llm::tools::{LlmTool, ShowAnswerTool};
use quarto_chat::llm::LlmBroker;
use quarto_chat::prompt;
use std::io::Write;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let question = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "How do I fit a logistic regression with scikit-learn?".to_string());

    let config = AppConfig::from_env()?;
    let gateway = config.provider.build_gateway(&config)?;
    let broker = LlmBroker::new(config.model(), gateway);
    let author = prompt::author_name(config.provider, config.model());

    let tools: Vec<Box<dyn LlmTool>> = vec![Box::new(ShowAnswerTool::new(config.writer()))];
    let messages = vec![
        LlmMessage::system(prompt::system_prompt(&author, Local::now().naive_local())),
        LlmMessage::user(question),
    ];
    let completion = CompletionConfig::default();

    let mut stream = broker.generate_stream(&messages, Some(&tools), &completion);
    while let Some(result) = stream.next().await {
        match result {
            Ok(chunk) => {
                print!("{}", chunk);
                std::io::stdout().flush()?;
            }
            Err(e) => eprintln!("\nError: {}", e),
        }
    }

    println!("\n\nDone!");
    Ok(())
}
