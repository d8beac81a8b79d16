//! `stockwise chat`: Interactive or single-message chat mode.

use anyhow::{bail, Context};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use stockwise_agent::{build_runner, AgentRunner, TraceRecorder, TurnConfig, TurnResult, TurnStatus};
use stockwise_checkpoint::FileStateStore;
use stockwise_config::{AppConfig, CheckpointBackend};
use stockwise_core::checkpoint::{InMemoryStateStore, StateStore};
use stockwise_tools::{default_registry, InMemoryDocumentStore};
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tracing::info;

pub struct ChatArgs {
    pub message: Option<String>,
    pub thread: String,
    pub docs: Option<PathBuf>,
    pub max_steps: Option<usize>,
    pub traces: bool,
}

pub async fn run(args: ChatArgs) -> anyhow::Result<()> {
    let config = AppConfig::load().context("failed to load config")?;

    if !config.has_api_key() && matches!(config.model.kind(), "openai" | "gemini") {
        eprintln!();
        eprintln!("  ERROR: No API key configured for the {} backend!", config.model.kind());
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    STOCKWISE_API_KEY = '...'   (any backend)");
        eprintln!("    OPENAI_API_KEY    = 'sk-...'");
        eprintln!("    GOOGLE_API_KEY    = '...'   (Gemini)");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        bail!("no API key found, see above for setup instructions");
    }

    let documents = match &args.docs {
        Some(dir) => InMemoryDocumentStore::load_dir(dir)
            .await
            .with_context(|| format!("failed to load documents from {}", dir.display()))?,
        None => InMemoryDocumentStore::new(),
    };
    let document_count = documents.len().await;
    let tools = Arc::new(default_registry(Arc::new(documents)));

    let runner = build_runner(&config, tools).context("failed to build the agent")?;
    let store: Box<dyn StateStore> = match config.checkpoint.backend {
        CheckpointBackend::Memory => Box::new(InMemoryStateStore::new()),
        CheckpointBackend::File => Box::new(FileStateStore::new(config.checkpoint.resolved_directory())),
    };

    info!(
        thread_id = %args.thread,
        documents = document_count,
        checkpoints = store.name(),
        "Chat session ready"
    );

    let recorder = Arc::new(TraceRecorder::new());
    let mut turn = TurnConfig::from_config(&config.agent, args.thread.clone());
    if let Some(max_steps) = args.max_steps {
        turn = turn.with_max_steps(max_steps);
    }
    if args.traces {
        turn = turn.with_observer(recorder.clone());
    }

    let session = Session {
        runner,
        store,
        turn,
        recorder: args.traces.then_some(recorder),
    };

    if let Some(message) = args.message {
        eprint!("  Thinking...");
        let result = session.ask(&message).await;
        eprint!("\r              \r");
        println!("{}", result.final_text);
        session.report(&result);
        if result.status == TurnStatus::Failed {
            bail!("turn failed");
        }
        return Ok(());
    }

    println!();
    println!("  ╔══════════════════════════════════════════════╗");
    println!("  ║       Stockwise Agent — Interactive Mode      ║");
    println!("  ╚══════════════════════════════════════════════╝");
    println!();
    println!("  Model:     {} ({})", config.model.model(), config.model.kind());
    println!("  Tools:     {}", session.runner.tools().names().join(", "));
    println!("  Policies:  {}", session.runner.middleware().names().join(", "));
    println!("  Documents: {document_count}");
    println!("  Thread:    {}", args.thread);
    println!();
    println!("  Type your message and press Enter.");
    println!("  Type '/reset' to forget this thread, 'exit' or Ctrl+C to quit.");
    println!();

    let mut lines = BufReader::new(io::stdin()).lines();
    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "exit" | "quit" | "/exit" | "/quit" | ":q") {
            break;
        }
        if line == "/reset" {
            let removed = session.store.delete(&session.turn.thread_id).await?;
            println!("  {}", if removed { "Thread forgotten." } else { "Nothing to forget." });
            continue;
        }

        eprint!("  ...");
        let result = session.ask(line).await;
        eprint!("\r     \r");
        println!();
        for text_line in result.final_text.lines() {
            println!("  Assistant > {text_line}");
        }
        println!();
        session.report(&result);
    }

    println!();
    println!("  Goodbye!");
    println!();
    Ok(())
}

struct Session {
    runner: AgentRunner,
    store: Box<dyn StateStore>,
    turn: TurnConfig,
    recorder: Option<Arc<TraceRecorder>>,
}

impl Session {
    async fn ask(&self, message: &str) -> TurnResult {
        self.runner.run_thread(self.store.as_ref(), message, &self.turn).await
    }

    /// Status notes and traces go to stderr so stdout carries only answers.
    fn report(&self, result: &TurnResult) {
        match result.status {
            TurnStatus::Completed => {}
            TurnStatus::LimitReached => eprintln!("  [stopped after {} cycles]", result.cycles),
            TurnStatus::Failed => {
                if let Some(e) = &result.error {
                    eprintln!("  [Error] {e}");
                }
            }
        }

        let Some(recorder) = &self.recorder else { return };
        for trace in recorder.drain() {
            eprintln!(
                "  [{:?}] {} {:?} {}ms",
                trace.kind,
                trace.name,
                trace.status,
                trace.duration_ms.unwrap_or_default()
            );
        }
    }
}
