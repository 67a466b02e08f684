use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use mirgpt_agents::{build_default_assistant, AssistantConfig, PolicyAssistant};
use mirgpt_core::persona::{ASSISTANT_NAME, KNOWLEDGE_MISSING_WARNING};
use mirgpt_llm::ChatBackend;
use mirgpt_observability::{init_tracing, AppMetrics};
use mirgpt_storage::TranscriptRepository;
use serde::Serialize;
use tracing::error;

#[derive(Debug, Parser)]
#[command(name = "mirgpt")]
#[command(about = "Ask questions about the academic policy manual")]
struct Cli {
    /// Policy manual (PDF or plain text).
    #[arg(long, env = "MIRGPT_MANUAL_PATH")]
    manual: Option<PathBuf>,

    #[arg(long, env = "MIRGPT_MAX_CHUNK_CHARS")]
    max_chars: Option<usize>,

    #[arg(long, env = "MIRGPT_TOP_K")]
    top_k: Option<usize>,

    #[arg(long, env = "MIRGPT_MODEL")]
    model: Option<String>,

    /// Wait for the whole answer instead of streaming it.
    #[arg(long)]
    no_stream: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive chat. `/clear` starts over, `exit` or `quit` leaves.
    Chat {
        /// Resume a stored session.
        #[arg(long)]
        session: Option<String>,
    },
    /// Answer a single question and exit.
    Ask {
        question: String,
        #[arg(long)]
        json: bool,
    },
    Kb {
        #[command(subcommand)]
        command: KbCommand,
    },
}

#[derive(Debug, Subcommand)]
enum KbCommand {
    Search {
        query: String,
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
    /// Print the chunked manual.
    Chunks {
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[derive(Debug, Serialize)]
struct ChunkView<'a> {
    index: usize,
    chars: usize,
    text: &'a str,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("mirgpt_cli");
    let cli = Cli::parse();

    let mut config = AssistantConfig::from_env()?;
    if let Some(manual) = cli.manual {
        config.manual_path = manual;
    }
    if let Some(max_chars) = cli.max_chars {
        config.max_chunk_chars = max_chars;
    }
    if let Some(top_k) = cli.top_k {
        config.top_k = top_k;
    }
    if let Some(model) = cli.model {
        config.model = model;
    }
    if cli.no_stream {
        config.stream = false;
    }

    let assistant = build_default_assistant(config, AppMetrics::shared()).await?;
    if !assistant.knowledge_available() {
        eprintln!("warning: {KNOWLEDGE_MISSING_WARNING}");
    }

    match cli.command {
        Command::Chat { session } => run_chat(&assistant, session, io::stdin().lock()).await?,
        Command::Ask { question, json } => {
            let mut session = assistant.start_session().await?;
            if json {
                let outcome = assistant.handle_turn(&mut session, &question, |_| {}).await?;
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                answer(&assistant, &mut session, &question).await?;
            }
        }
        Command::Kb { command } => match command {
            KbCommand::Search { query, limit } => {
                let hits = assistant.kb_search(&query, limit);
                println!("{}", serde_json::to_string_pretty(&hits)?);
            }
            KbCommand::Chunks { limit } => {
                let corpus = assistant.corpus();
                let chunks = corpus
                    .chunks()
                    .iter()
                    .enumerate()
                    .take(limit.unwrap_or(usize::MAX))
                    .map(|(index, text)| ChunkView {
                        index,
                        chars: text.chars().count(),
                        text,
                    })
                    .collect::<Vec<_>>();
                println!("{}", serde_json::to_string_pretty(&chunks)?);
            }
        },
    }

    Ok(())
}

async fn run_chat<S, B, R>(
    assistant: &PolicyAssistant<S, B>,
    session_id: Option<String>,
    mut input: R,
) -> Result<()>
where
    S: TranscriptRepository,
    B: ChatBackend,
    R: BufRead,
{
    let mut session = assistant.load_or_start(session_id.as_deref()).await?;

    println!("{ASSISTANT_NAME} chat mode. type '/clear' to start over, 'exit' to quit.");
    for message in session.messages() {
        println!("[{}] {}", message.role, message.content);
    }
    println!();

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            break;
        }

        let message = line.trim();
        if message.eq_ignore_ascii_case("exit") || message.eq_ignore_ascii_case("quit") {
            break;
        }
        if message.is_empty() {
            continue;
        }
        if message == "/clear" {
            match assistant.clear_session(&mut session).await {
                Ok(()) => println!("\n{}\n", session.messages()[0].content),
                Err(err) => report_failure("clear", &err),
            }
            continue;
        }

        println!();
        if let Err(err) = answer(assistant, &mut session, message).await {
            report_failure("turn", &err);
        }
        println!();
    }

    Ok(())
}

fn report_failure(action: &str, err: &anyhow::Error) {
    error!(error = %err, action, "chat step failed");
    eprintln!("error: {err:#}");
}

/// Streams the answer to stdout as it arrives.
async fn answer<S, B>(
    assistant: &PolicyAssistant<S, B>,
    session: &mut mirgpt_core::ConversationSession,
    question: &str,
) -> Result<()>
where
    S: TranscriptRepository,
    B: ChatBackend,
{
    let mut printed = 0_usize;
    let outcome = assistant
        .handle_turn(session, question, |so_far| {
            let mut stdout = io::stdout();
            let _ = stdout.write_all(so_far[printed..].as_bytes());
            let _ = stdout.flush();
            printed = so_far.len();
        })
        .await?;

    if outcome.degraded {
        if printed > 0 {
            println!();
        }
        println!("{}", outcome.answer);
    } else {
        println!();
    }
    Ok(())
}
