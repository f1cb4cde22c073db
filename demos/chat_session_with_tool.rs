//! Ask a fixed set of questions through a ChatSession and list the documents written.
//!
//! Uses the provider, model and output directory from the environment (or `.env`).
//!
//! Run with: cargo run --example chat_session_with_tool

use chrono::Local;
use quarto_chat::config::AppConfig;
use quarto_chat::llm::tools::{LlmTool, ShowAnswerTool};
use quarto_chat::llm::{ChatSession, LlmBroker};
use quarto_chat::prompt;

const QUESTIONS: [&str; 2] = [
    "How do I compute a rolling mean over a pandas time series?",
    "Show the same thing in R with dplyr.",
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = AppConfig::from_env()?;
    let gateway = config.provider.build_gateway(&config)?;
    let author = prompt::author_name(config.provider, config.model());

    let tools: Vec<Box<dyn LlmTool>> = vec![Box::new(ShowAnswerTool::new(config.writer()))];
    let mut session = ChatSession::builder(LlmBroker::new(config.model(), gateway))
        .system_prompt(prompt::system_prompt(&author, Local::now().naive_local()))
        .tools(tools)
        .build();

    for question in QUESTIONS {
        println!("You: {}", question);
        match session.send(question).await {
            Ok(reply) => println!("Assistant: {}\n", reply),
            Err(e) => eprintln!("Error: {}\n", e),
        }
        println!("(Total tokens: {})\n", session.total_tokens());
    }

    println!("Documents in {}:", config.output_dir.display());
    for entry in std::fs::read_dir(&config.output_dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "qmd") {
            println!("  {}", path.display());
        }
    }

    Ok(())
}
