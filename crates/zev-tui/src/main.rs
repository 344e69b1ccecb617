use std::fs::{self, OpenOptions};
use std::io::Write;
use std::sync::Mutex;

use anyhow::Result;
use clap::{Parser, Subcommand};
use futures_util::{pin_mut, StreamExt};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use zev_core::groq::types::WireMessage;
use zev_core::{
    batch, models, run_sequential_pipeline, superagent_workflow, Config, GroqClient, GroqError,
};

mod app;
mod generation;
mod handler;
mod tui;
mod ui;

use app::App;

const LOG_ENV: &str = "ZEV_LOG";

#[derive(Parser)]
#[command(name = "zev")]
#[command(version, about = "Chat with Groq-hosted models from the terminal")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a single question and print the answer
    Ask {
        /// Your prompt
        prompt: String,
        /// Model to use (defaults to the configured model)
        #[arg(short, long)]
        model: Option<String>,
        /// Wait for the whole answer instead of streaming it
        #[arg(long)]
        no_stream: bool,
    },
    /// Run the researcher, writer and editor workflow on a task
    Superagent {
        /// Task description
        task: String,
    },
    /// List available models
    Models,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        None => {
            init_file_logging()?;
            run_tui(config).await
        }
        Some(command) => {
            init_stderr_logging();
            let client = GroqClient::from_config(&config);
            match command {
                Commands::Ask {
                    prompt,
                    model,
                    no_stream,
                } => {
                    let model = model.unwrap_or_else(|| config.default_model.clone());
                    ask(&client, &config, &model, &prompt, !no_stream).await
                }
                Commands::Superagent { task } => superagent(&client, &config, &task).await,
                Commands::Models => list_models(&client).await,
            }
        }
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// The terminal belongs to the UI, so logs go to a file.
fn init_file_logging() -> Result<()> {
    let path = Config::log_path()?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(&path)?;

    tracing_subscriber::registry()
        .with(env_filter())
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false),
        )
        .init();
    Ok(())
}

fn init_stderr_logging() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run_tui(config: Config) -> Result<()> {
    let mut app = App::from_config(config)?;

    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let mut events = tui::EventHandler::new();
    let sender = events.sender();
    info!("starting TUI with model {}", app.selected_model);

    while !app.should_quit {
        terminal.draw(|frame| ui::render(&mut app, frame))?;

        if let Some(event) = events.next().await {
            handler::handle_event(&mut app, event, &sender);
        }
    }

    app.shutdown();
    tui::restore()?;
    Ok(())
}

async fn ask(client: &GroqClient, config: &Config, model: &str, prompt: &str, stream: bool) -> Result<()> {
    let mut messages = Vec::new();
    if let Some(system) = config.system_prompt.as_deref().filter(|s| !s.trim().is_empty()) {
        messages.push(WireMessage::system(system));
    }
    messages.push(WireMessage::user(prompt));
    let request = client.request(model, messages, stream);

    if !stream {
        let completion = client.complete(&request).await?;
        if let Some(reasoning) = completion.reasoning {
            eprintln!("{}\n", reasoning);
        }
        println!("{}", completion.content);
        return Ok(());
    }

    let fragments = client.stream(&request).await?;
    let batches = batch(fragments, config.flush.to_policy());
    pin_mut!(batches);

    let mut stdout = std::io::stdout();
    while let Some(next) = batches.next().await {
        let flushed = next?;
        if let Some(reasoning) = flushed.reasoning {
            eprint!("{}", reasoning);
        }
        if let Some(content) = flushed.content {
            stdout.write_all(content.as_bytes())?;
            stdout.flush()?;
        }
    }
    println!();
    Ok(())
}

async fn superagent(client: &GroqClient, config: &Config, task: &str) -> Result<()> {
    let steps = superagent_workflow(&config.superagent);
    let result = run_sequential_pipeline(client, &steps, task, |output| {
        println!("## {} ({}/{})\n{}\n", output.name, output.index + 1, steps.len(), output.output);
    })
    .await;

    if let Err(e) = result {
        error!("superagent failed: {}", e);
        return Err(e.into());
    }
    Ok(())
}

async fn list_models(client: &GroqClient) -> Result<()> {
    match client.list_models().await {
        Ok(ids) => {
            for id in ids {
                let marker = if models::supports_reasoning(&id) { " (reasoning)" } else { "" };
                println!("{}{}", id, marker);
            }
        }
        Err(GroqError::MissingApiKey) => {
            info!("no API key configured, showing built-in models");
            for model in models::all() {
                println!("{}  {}", model.id, model.display_name);
            }
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}
