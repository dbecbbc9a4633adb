//! spool - run a tool-calling session from the command line

mod config;
mod prompt;
mod tools;

use anyhow::Context;
use clap::Parser;
use spool_agent::{ProtocolPreference, Session, SessionConfig, select_protocol};
use spool_ai::providers::openai::OpenAiBackend;
use spool_ai::{ContentBlock, Message, ModelInfo};
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

/// spool - streaming tool-call sessions against OpenAI-compatible models
#[derive(Parser, Debug)]
#[command(name = "spool")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Task to run (read from stdin when omitted)
    #[arg(short = 'c', long)]
    command: Option<String>,

    /// Model to use (default: gpt-4.1)
    #[arg(short, long)]
    model: Option<String>,

    /// Base URL of an OpenAI-compatible server
    #[arg(long)]
    base_url: Option<String>,

    /// Tool protocol (auto, native, tagged)
    #[arg(long)]
    protocol: Option<ProtocolPreference>,

    /// Treat the model as lacking structured tool calls
    #[arg(long)]
    no_native_tools: bool,

    /// Retries of one turn before the session fails
    #[arg(long)]
    max_retries: Option<u32>,

    /// Request timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Working directory
    #[arg(short, long)]
    working_dir: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("spool=debug,spool_agent=debug,spool_ai=debug")
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .init();
    }

    if args.init_config {
        match config::Config::init() {
            Ok(path) => {
                println!("Config file at: {}", path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    if let Some(ref dir) = args.working_dir {
        std::env::set_current_dir(dir).with_context(|| format!("cannot enter {}", dir))?;
    }

    let config = config::Config::load();
    let task = match args.command.clone() {
        Some(task) => task,
        None => {
            let mut task = String::new();
            std::io::stdin().read_to_string(&mut task)?;
            task
        }
    };
    if task.trim().is_empty() {
        anyhow::bail!("no task given; pass one with -c or on stdin");
    }

    // CLI flags take precedence over the config file
    let model_id = args.model.clone().unwrap_or_else(|| config.model().to_string());
    let base_url = args
        .base_url
        .clone()
        .unwrap_or_else(|| config.base_url().to_string());
    let native = !args.no_native_tools && config.native_tool_calls.unwrap_or(true);
    let model = ModelInfo::new(model_id, base_url).with_native_tool_calls(native);

    let api_key = config
        .get_api_key()
        .context("no API key: set OPENAI_API_KEY or api_key in the config file")?;
    let backend = Arc::new(OpenAiBackend::new(api_key, model.clone()));

    let mut session_config = apply_args(config.session_config(), &args);
    let cwd = std::env::current_dir()?;
    let registry = tools::builtin_registry(&cwd, &session_config.completion_tool);

    let custom_prompt = match &config.system_prompt_file {
        Some(path) => {
            let path = tools::resolve_path(&cwd, path);
            Some(
                std::fs::read_to_string(&path)
                    .with_context(|| format!("cannot read system prompt {}", path.display()))?,
            )
        }
        None => None,
    };
    let protocol = select_protocol(session_config.tool_protocol, &model);
    session_config.system_prompt = prompt::build_system_prompt(
        &registry,
        protocol,
        &session_config.completion_tool,
        custom_prompt.as_deref(),
    );

    tracing::debug!(model = %model.id, protocol = protocol.as_str(), "starting session");
    run_task(session_config, backend, registry, &task).await
}

fn apply_args(mut session_config: SessionConfig, args: &Args) -> SessionConfig {
    if let Some(protocol) = args.protocol {
        session_config.tool_protocol = protocol;
    }
    if let Some(retries) = args.max_retries {
        session_config.max_retry_attempts = retries;
    }
    if let Some(secs) = args.timeout {
        session_config.api_request_timeout = Duration::from_secs(secs);
    }
    session_config
}

async fn run_task(
    session_config: SessionConfig,
    backend: Arc<OpenAiBackend>,
    registry: spool_agent::ToolRegistry,
    task: &str,
) -> anyhow::Result<()> {
    println!("spool> {}", task.trim());
    println!();

    let mut session = Session::new(session_config, backend, Arc::new(registry));

    let _messages = session.observers().on_message_added(print_message);
    let _status = session.observers().on_status_changed(|status| {
        tracing::debug!(status = %status, "session status changed");
    });
    let _completed = session.observers().on_task_completed(|done| {
        println!(
            "\n[Tokens: {} in, {} out | Cost: ${:.4}]",
            done.usage.input, done.usage.output, done.usage.cost
        );
    });
    let _aborted = session.observers().on_task_aborted(|aborted| {
        eprintln!("\n[Aborted: {}]", aborted.reason);
    });

    let handle = session.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.abort_with("interrupted");
        }
    });

    match session.start(task).await {
        Ok(true) => Ok(()),
        Ok(false) => std::process::exit(130),
        Err(e) => {
            eprintln!("Error: {}", e);
            for (i, attempt) in e.collected_errors().iter().enumerate() {
                eprintln!("  attempt {}: {}", i + 1, attempt);
            }
            std::process::exit(1);
        }
    }
}

fn print_message(message: &Message) {
    for block in message.content() {
        match block {
            ContentBlock::Text { text } => {
                if matches!(message, Message::Assistant { .. }) {
                    println!("{}", text);
                }
            }
            ContentBlock::ToolUse(call) => {
                println!("[Running {}...]", call.name);
            }
            ContentBlock::ToolResult {
                tool_name,
                content,
                is_error,
                ..
            } => {
                if *is_error {
                    println!("[{} failed: {}]", tool_name, truncate_chars(content, 200));
                } else {
                    println!("[{}: {}]", tool_name, truncate_chars(content, 200));
                }
            }
        }
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    let single_line = text.replace('\n', " ");
    if single_line.chars().count() <= max {
        return single_line;
    }
    let mut out: String = single_line.chars().take(max).collect();
    out.push_str("...");
    out
}
