//! Mortgage agent run engine CLI
//!
//! Lists agent definitions, executes a run while streaming its turns, and
//! inspects persisted runs.

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::manual_let_else)]
#![allow(clippy::unused_async)]
#![allow(clippy::missing_fields_in_debug)]

use mimalloc::MiMalloc;

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Parser;
use dotenvy::dotenv;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::info;

use mortgage_agents::AppState;
use mortgage_agents::config::{AppConfig, Cli, Command, PersistenceProvider, load_llm_settings};
use mortgage_agents::engine::domain::{EventEnvelope, InputValues, RunEvent, RunStatus};
use mortgage_agents::engine::persistence::AgentCatalog;
use mortgage_agents::engine::sink::{BroadcastEventSink, EventSink, TracingEventSink};
use mortgage_agents::llm::{ChatCompletionsBackend, InferenceBackend, ScriptedBackend};
use mortgage_agents::{open_store, telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env (if present)
    let _ = dotenv();

    telemetry::init();

    let cli = Cli::parse();
    let config = AppConfig::from_cli(&cli).context("loading configuration")?;

    match &cli.command {
        Command::Agents => list_agents(&config).await,
        Command::Run {
            agent,
            offline,
            quiet,
            ..
        } => run_agent(config, agent, cli.command.input_values(), *offline, *quiet).await,
        Command::Show { agent, run_id } => show_run(&config, agent, run_id.as_deref()).await,
    }
}

async fn list_agents(config: &AppConfig) -> anyhow::Result<()> {
    let catalog = AgentCatalog::new();
    catalog
        .load_from_dir(&config.agents.dir)
        .await
        .with_context(|| format!("loading agents from {}", config.agents.dir.display()))?;

    for agent in catalog.list() {
        println!(
            "{:<28} turns={:<3} inputs=[{}]  {}",
            agent.id,
            agent.turn_budget,
            agent.required_inputs.join(", "),
            agent.name.as_deref().unwrap_or_default()
        );
    }
    Ok(())
}

async fn run_agent(
    config: AppConfig,
    agent_id: &str,
    inputs: InputValues,
    offline: bool,
    quiet: bool,
) -> anyhow::Result<()> {
    let backend: Arc<dyn InferenceBackend> = if offline {
        Arc::new(
            ScriptedBackend::new()
                .with_goal_replies(["no"])
                .with_goal_default("yes"),
        )
    } else {
        let settings = load_llm_settings().map_err(anyhow::Error::msg)?;
        info!(
            name: "llm.config.loaded",
            base_url = %settings.base_url,
            model = %settings.model,
            "LLM configuration loaded"
        );
        Arc::new(ChatCompletionsBackend::new(settings))
    };

    let broadcast = BroadcastEventSink::default();
    let events = broadcast.subscribe();
    let sink: Arc<dyn EventSink> = if quiet {
        Arc::new(TracingEventSink)
    } else {
        Arc::new(broadcast)
    };

    let shutdown = CancellationToken::new();
    let grace = config.shutdown_grace();
    let state = AppState::build(config, backend, sink, shutdown).await?;
    let manager = Arc::clone(&state.run_manager);

    let run_id = manager.submit(agent_id, inputs)?;
    println!("run {run_id} submitted for agent {agent_id}");

    let printed = CancellationToken::new();
    let printer = (!quiet).then(|| {
        let run_id = run_id.clone();
        tokio::spawn(follow_events(events, printed.clone(), move |envelope| {
            print_event(&envelope, &run_id);
        }))
    });

    let ctrl_c = {
        let manager = Arc::clone(&manager);
        let run_id = run_id.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("cancellation requested, finishing current turn...");
                manager.request_cancel(&run_id);
            }
        })
    };

    let run = manager.wait(&run_id, agent_id).await?;
    ctrl_c.abort();
    printed.cancel();
    if let Some(printer) = printer {
        if let Err(e) = printer.await {
            tracing::warn!(error = %e, "Event printer failed");
        }
    }
    manager.shutdown(grace).await;

    let Some(run) = run else {
        bail!("run {run_id} was never recorded");
    };
    println!(
        "run {} {}: {} after {} turn(s)",
        run.run_id,
        run.status,
        run.result.as_deref().or(run.error.as_deref()).unwrap_or("-"),
        run.turn_count
    );
    if run.status == RunStatus::Failed {
        bail!("run failed: {}", run.error.unwrap_or_default());
    }
    Ok(())
}

/// Hand every event to `on_event` until `done` fires, then hand over
/// whatever is still buffered so the final turn and status are not lost.
async fn follow_events(
    mut events: broadcast::Receiver<EventEnvelope>,
    done: CancellationToken,
    mut on_event: impl FnMut(EventEnvelope),
) {
    loop {
        tokio::select! {
            biased;
            received = events.recv() => match received {
                Ok(envelope) => on_event(envelope),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    eprintln!("(skipped {skipped} events)");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            },
            () = done.cancelled() => break,
        }
    }

    loop {
        match events.try_recv() {
            Ok(envelope) => on_event(envelope),
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                eprintln!("(skipped {skipped} events)");
            }
            Err(_) => break,
        }
    }
}

fn print_event(envelope: &EventEnvelope, run_id: &str) {
    if envelope.run_id != run_id {
        return;
    }
    match &envelope.event {
        RunEvent::Turn(turn) => {
            println!("\n[turn {} | {}]\n{}", turn.turn_number, turn.role, turn.content);
        }
        RunEvent::Status { status, .. } => println!("-- status: {status}"),
        RunEvent::Log(_) => {}
    }
}

async fn show_run(config: &AppConfig, agent_id: &str, run_id: Option<&str>) -> anyhow::Result<()> {
    if config.persistence.provider != PersistenceProvider::File {
        bail!("show needs the file store; pass --data-dir or set persistence.provider = file");
    }
    let store = open_store(config);

    let Some(run_id) = run_id else {
        for run in store.list(agent_id).await? {
            println!(
                "{}  {:<9}  turns={:<3}  started={}",
                run.run_id,
                run.status.to_string(),
                run.turn_count,
                run.started_at.to_rfc3339()
            );
        }
        return Ok(());
    };

    let run = store
        .get(run_id, agent_id)
        .await?
        .with_context(|| format!("run {run_id} not found for agent {agent_id}"))?;
    println!("{}", serde_json::to_string_pretty(&run)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(run_id: &str, status: RunStatus) -> EventEnvelope {
        EventEnvelope::new(
            run_id,
            "income-verification",
            RunEvent::Status {
                status,
                outcome: None,
            },
        )
    }

    #[tokio::test]
    async fn test_follow_events_drains_buffer_after_done() {
        let (tx, rx) = broadcast::channel(16);
        tx.send(status("r1", RunStatus::Running)).unwrap();
        tx.send(status("r1", RunStatus::Completed)).unwrap();

        // The run has already finished when the follower is told to stop.
        let done = CancellationToken::new();
        done.cancel();

        let mut seen = Vec::new();
        follow_events(rx, done, |envelope| seen.push(envelope)).await;

        let statuses: Vec<_> = seen
            .iter()
            .filter_map(|e| match e.event {
                RunEvent::Status { status, .. } => Some(status),
                _ => None,
            })
            .collect();
        assert_eq!(statuses, vec![RunStatus::Running, RunStatus::Completed]);
        drop(tx);
    }
}
