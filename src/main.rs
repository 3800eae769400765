use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use futures::future::join_all;
use log::{LevelFilter, info, warn};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

use triagr::llm::{LlmClient, ParsedResult};
use triagr::Config;

mod cli;

use cli::Cli;
use cli::commands::Commands;

fn setup_logging(verbose: bool) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("triagr")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("triagr.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    // Without RUST_LOG the logger passes everything and the level is
    // governed by log::set_max_level, which the config file can change later.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("trace"))
        .target(env_logger::Target::Pipe(target))
        .init();
    if !rust_log_set() {
        log::set_max_level(if verbose { LevelFilter::Debug } else { LevelFilter::Info });
    }

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

fn rust_log_set() -> bool {
    std::env::var_os("RUST_LOG").is_some()
}

/// Apply the config file's `log_level` unless `--verbose` or `RUST_LOG` decided already.
fn apply_log_level(cli: &Cli, config: &Config) {
    if cli.is_verbose() || rust_log_set() {
        return;
    }
    match config.log_filter() {
        Some(level) => log::set_max_level(level),
        None => {
            if let Some(raw) = &config.log_level {
                warn!("Ignoring log_level {:?}: not a valid level", raw);
            }
        }
    }
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    if let Commands::Config = &cli.command {
        return handle_config_command(config);
    }

    let client = LlmClient::new(config.llm.clone()).context("Failed to create LLM client")?;
    if !client.is_ready() {
        let missing = config.llm.missing_fields().join(", ");
        println!("{} missing {}, responses are placeholders", "LLM not configured:".yellow(), missing);
    }
    let default_tokens = config.llm.default_max_tokens;
    info!("Using model {} at {}", client.model(), config.llm.base_url);

    match &cli.command {
        Commands::Text { prompt, max_tokens } => {
            handle_text_command(&client, prompt, max_tokens.unwrap_or(default_tokens)).await
        }
        Commands::Json { prompt, max_tokens } => {
            handle_json_command(&client, prompt, max_tokens.unwrap_or(default_tokens)).await
        }
        Commands::Batch { file, json, max_tokens } => {
            handle_batch_command(&client, file, *json, max_tokens.unwrap_or(default_tokens)).await
        }
        Commands::Config => Ok(()),
    }
}

async fn handle_text_command(client: &LlmClient, prompt: &str, max_tokens: u32) -> Result<()> {
    info!("Generating text, max_tokens={}", max_tokens);
    let text = client.generate_text(prompt, max_tokens).await;
    if text.is_empty() {
        println!("{}", "No response (see log for details)".red());
    } else {
        println!("{}", text);
    }
    Ok(())
}

async fn handle_json_command(client: &LlmClient, prompt: &str, max_tokens: u32) -> Result<()> {
    info!("Generating structured output, max_tokens={}", max_tokens);
    let value = client.generate_structured(prompt, max_tokens).await;
    match render_structured(&value) {
        Ok(rendered) => {
            println!("{}", rendered);
            Ok(())
        }
        Err(message) => {
            println!("{}", message);
            value.map(|_| ()).context("Structured generation failed")
        }
    }
}

async fn handle_batch_command(client: &LlmClient, file: &Path, json: bool, max_tokens: u32) -> Result<()> {
    let content = fs::read_to_string(file).with_context(|| format!("Failed to read prompts from {}", file.display()))?;
    let prompts: Vec<&str> = content.lines().map(str::trim).filter(|line| !line.is_empty()).collect();
    info!("Running batch of {} prompts from {}", prompts.len(), file.display());

    let results = join_all(prompts.iter().map(|prompt| async move {
        if json {
            render_structured(&client.generate_structured(prompt, max_tokens).await)
        } else {
            let text = client.generate_text(prompt, max_tokens).await;
            if text.is_empty() {
                Err(format!("{}", "No response".red()))
            } else {
                Ok(text)
            }
        }
    }))
    .await;

    let mut failures = 0;
    for (index, (prompt, result)) in prompts.iter().zip(results).enumerate() {
        println!("{} {}", format!("[{}]", index + 1).cyan().bold(), prompt.dimmed());
        match result {
            Ok(output) => println!("{}", output),
            Err(message) => {
                failures += 1;
                println!("{}", message);
            }
        }
    }

    let usage = client.total_usage();
    let snapshot = client.snapshot();
    println!(
        "{} {} prompts, {} failed, {} tokens, delay now {:.2}s",
        "Done:".green(),
        prompts.len(),
        failures,
        usage.total(),
        snapshot.current_delay.as_secs_f64()
    );
    Ok(())
}

fn handle_config_command(config: &Config) -> Result<()> {
    let mut shown = config.clone();
    if !shown.llm.api_key.is_empty() {
        shown.llm.api_key = "***".to_string();
    }
    let yaml = serde_yaml::to_string(&shown).context("Failed to serialize configuration")?;
    println!("{}", yaml);

    let missing = config.llm.missing_fields();
    if missing.is_empty() {
        println!("{}", "LLM client configured".green());
    } else {
        println!("{} {}", "Missing:".yellow(), missing.join(", "));
    }
    Ok(())
}

/// Pretty JSON for a success, a colored error summary otherwise.
fn render_structured(result: &ParsedResult<serde_json::Map<String, Value>>) -> std::result::Result<String, String> {
    match result {
        Ok(map) => serde_json::to_string_pretty(map).map_err(|e| format!("{} {}", "Error:".red(), e)),
        Err(e) => {
            let mut message = format!("{} {}", format!("{}:", e.kind()).red(), e);
            if let Some(raw) = e.raw_text() {
                message.push_str(&format!("\n{}", raw.dimmed()));
            }
            Err(message)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Setup logging before config so load warnings are kept
    setup_logging(cli.is_verbose()).context("Failed to setup logging")?;

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    apply_log_level(&cli, &config);

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}
