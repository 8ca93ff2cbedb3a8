//! A terminal front end for simulated customer service calls.

#[macro_use]
extern crate tracing;

use std::path::PathBuf;
use std::pin::pin;
use std::time::Duration;

use anyhow::{Context as _, bail};
use callsim::{
    Archive, Config, SimulationRequest, SimulatorBuilder, SimulatorError,
};
use callsim_core::storage::Page;
use callsim_core::{ConversationMessage, ConversationProperties, SpeakerRole};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use tokio::select;
use tokio::sync::mpsc;

const BAR_CHAR: &str = "▎";

#[derive(Parser)]
#[command(name = "callsim")]
#[command(about = "Simulate customer service calls between two AI personas", long_about = None)]
struct Cli {
    /// Configuration file, `callsim.toml` in the working directory by
    /// default.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Overrides `storage.data_dir`.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Simulate one call and store it
    Simulate {
        #[arg(long)]
        intent: String,
        #[arg(long)]
        sentiment: String,
        #[arg(long)]
        subject: String,
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..=20))]
        max_turns: Option<u32>,
        #[arg(long)]
        conversation_id: Option<String>,
    },
    /// Ask a single agent for one reply
    Ask { agent_id: String, input: String },
    /// List the configured agents
    Agents,
    /// List stored conversations, newest first
    List {
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Print a stored conversation
    Show {
        id: String,
        /// Print the stored JSON document
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    }
    .with_env();
    if let Some(data_dir) = cli.data_dir {
        config.storage.data_dir = data_dir;
    }
    debug!("using {config:?}");

    match cli.command {
        Command::Simulate {
            intent,
            sentiment,
            subject,
            max_turns,
            conversation_id,
        } => {
            let request = SimulationRequest {
                properties: ConversationProperties::new(intent, sentiment, subject),
                max_turns,
                conversation_id,
            };
            simulate(&config, request).await
        }
        Command::Ask { agent_id, input } => ask(&config, &agent_id, &input).await,
        Command::Agents => agents(&config),
        Command::List { offset, limit } => {
            list(&config, Page { offset, limit }).await
        }
        Command::Show { id, json } => show(&config, &id, json).await,
    }
}

fn spinner(message: &'static str) -> ProgressBar {
    let style = ProgressStyle::with_template("{spinner} {wide_msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");
    let progress_bar = ProgressBar::new_spinner();
    progress_bar.set_style(style);
    progress_bar.set_message(message);
    progress_bar.enable_steady_tick(Duration::from_millis(100));
    progress_bar
}

fn print_message(msg: &ConversationMessage) {
    match msg.speaker_role {
        SpeakerRole::Representative => println!(
            "{}{} {}",
            BAR_CHAR.bright_cyan(),
            "Representative:".bright_cyan().bold(),
            msg.content.bright_white()
        ),
        SpeakerRole::Customer => println!(
            "{}{} {}",
            BAR_CHAR.bright_yellow(),
            "Customer:".bright_yellow().bold(),
            msg.content.bright_white()
        ),
    }
}

async fn simulate(config: &Config, request: SimulationRequest) -> anyhow::Result<()> {
    let (message_tx, mut message_rx) = mpsc::unbounded_channel();
    let simulator = SimulatorBuilder::from_config(config)?
        .on_message(move |msg| {
            message_tx.send(msg.clone()).ok();
        })
        .build()?;

    let progress_bar = spinner("📞 Calling...");
    let mut run = pin!(simulator.simulate(request));
    let outcome = loop {
        select! {
            biased;
            Some(msg) = message_rx.recv() => {
                progress_bar.suspend(|| print_message(&msg));
            }
            outcome = &mut run => break outcome,
        }
    };
    progress_bar.finish_and_clear();
    while let Ok(msg) = message_rx.try_recv() {
        print_message(&msg);
    }

    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(SimulatorError::Simulation(err)) => {
            if let Some(partial) = &err.partial {
                eprintln!(
                    "{}",
                    format!("call aborted after {} messages", partial.history.len())
                        .bright_red()
                );
            }
            return Err(err.into());
        }
        Err(err) => return Err(err.into()),
    };

    let result = &outcome.result;
    println!();
    println!(
        "{} {:?} after {} turns",
        "Status:".bold(),
        result.status,
        result.turn_count
    );
    if let Some(termination) = &result.termination {
        println!("{} {termination:?}", "Reason:".bold());
    }
    println!(
        "{} {} tokens in {} ms",
        "Usage:".bold(),
        result.total_tokens_used,
        result.total_time_taken_ms
    );
    match &outcome.storage {
        Ok(()) => println!("{} {}", "Stored:".bold(), outcome.id),
        Err(err) => eprintln!(
            "{}",
            format!("conversation {} was not stored: {err}", outcome.id).bright_red()
        ),
    }
    Ok(())
}

async fn ask(config: &Config, agent_id: &str, input: &str) -> anyhow::Result<()> {
    let simulator = SimulatorBuilder::from_config(config)?.build()?;

    let progress_bar = spinner("🤔 Thinking...");
    let outcome = simulator.ask(agent_id, input).await;
    progress_bar.finish_and_clear();
    let outcome = outcome?;

    println!("{}{}", BAR_CHAR.bright_cyan(), outcome.run.output.bright_white());
    if let Some(tokens) = outcome.run.tokens_used {
        println!("{} {tokens} tokens", "Usage:".bold());
    }
    if let Err(err) = &outcome.storage {
        eprintln!("{}", format!("run was not stored: {err}").bright_red());
    }
    Ok(())
}

fn agents(config: &Config) -> anyhow::Result<()> {
    let registry = config.registry()?;
    for agent in registry.agents() {
        println!(
            "{} {} ({})",
            agent.agent_id.bold(),
            agent.display_name,
            agent.model.as_deref().unwrap_or("default model")
        );
        println!("  runs stored in `{}`", agent.storage_container);
        for sample in &agent.sample_inputs {
            println!("  e.g. {}", sample.dimmed());
        }
    }
    Ok(())
}

async fn list(config: &Config, page: Page) -> anyhow::Result<()> {
    if page.limit == 0 {
        bail!("--limit must be at least 1");
    }
    let docs = Archive::from_config(config)
        .list(page)
        .await
        .context("failed to list conversations")?;
    if docs.is_empty() {
        println!("{}", "No conversations.".dimmed());
    }
    for doc in docs {
        println!(
            "{}  {}  {:?}  {} turns  {}",
            doc.id.bold(),
            doc.start_time.format("%Y-%m-%d %H:%M:%S"),
            doc.status,
            doc.turn_count,
            doc.properties.conversation_subject
        );
    }
    Ok(())
}

async fn show(config: &Config, id: &str, json: bool) -> anyhow::Result<()> {
    let doc = Archive::from_config(config)
        .show(id)
        .await
        .with_context(|| format!("failed to load conversation {id}"))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    let properties = &doc.properties;
    println!(
        "{} {} / {} / {}",
        "Scenario:".bold(),
        properties.customer_intent,
        properties.customer_sentiment,
        properties.conversation_subject
    );
    println!();
    for msg in &doc.history {
        print_message(msg);
    }
    println!();
    println!(
        "{} {:?} after {} turns, {} tokens",
        "Status:".bold(),
        doc.status,
        doc.turn_count,
        doc.total_tokens_used
    );
    Ok(())
}
