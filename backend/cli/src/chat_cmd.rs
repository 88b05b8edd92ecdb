//! CLI Chat Command
//!
//! Interactive conversation on stdin/stdout. Replies stream in as they are
//! generated; sensor readings from the optional feed are echoed dimmed and
//! answered without their prompt appearing in the transcript.

use std::collections::HashSet;
use std::io::Write;
use std::ops::ControlFlow;
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::{debug, info};

use edgechat_agent::SessionOrchestrator;
use edgechat_channels::{EventIngestor, FeedMessage, MqttFeed};
use edgechat_core::{Author, ChatError, GenerationOutcome, SessionEvent};

use crate::config::Settings;
use crate::models_cmd;
use crate::terminal_output::{
    note_error, note_info, note_success, note_warn, stream_write, styled, DIM, MAGENTA,
};

/// One line of REPL input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Send(String),
    Clear,
    Status,
    Models,
    Model(String),
    Help,
    Quit,
    Empty,
    Unknown(String),
}

pub fn parse_command(line: &str) -> ReplCommand {
    let line = line.trim();
    if line.is_empty() {
        return ReplCommand::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return ReplCommand::Send(line.to_string());
    };
    let (name, arg) = match command.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (command, ""),
    };
    match (name, arg) {
        ("clear", _) => ReplCommand::Clear,
        ("status", _) => ReplCommand::Status,
        ("models", _) => ReplCommand::Models,
        ("model", "") => ReplCommand::Unknown("/model needs a model id".to_string()),
        ("model", id) => ReplCommand::Model(id.to_string()),
        ("help", _) => ReplCommand::Help,
        ("quit" | "exit", _) => ReplCommand::Quit,
        _ => ReplCommand::Unknown(format!("unknown command /{name}")),
    }
}

const HELP: &str = "/clear  /status  /models  /model <id>  /quit";

pub async fn run(settings: Settings) -> Result<()> {
    let spec = settings.model(&settings.model_id)?;
    let orchestrator =
        SessionOrchestrator::new(settings.engine_for(&spec), &spec, settings.session.clone());
    info!(conversation_id = %orchestrator.conversation_id(), model = %spec.id, "Chat started");

    let renderer = tokio::spawn(render_events(orchestrator.subscribe()));

    let ingestor = settings.feed.as_ref().map(|feed| {
        let ingestor = EventIngestor::spawn(orchestrator.clone(), feed.ingest.clone());
        ingestor.attach(Arc::new(MqttFeed::new(feed.transport.clone())));
        tokio::spawn(render_feed(ingestor.subscribe()));
        note_info(&format!(
            "Listening for sensor readings on {} ({})",
            feed.transport.address, feed.ingest.topic_filter
        ));
        ingestor
    });

    note_info(&format!("{} ready. {HELP}", spec.display_name));

    // Replies stream through the renderer, so input stays live during a
    // generation and /clear can interrupt it.
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = parse_command(&line);
        if dispatch(command, &orchestrator, &settings, ingestor.is_some())
            .await
            .is_break()
        {
            break;
        }
    }

    if let Some(ingestor) = ingestor {
        ingestor.shutdown();
    }
    orchestrator.cancel().await;
    renderer.abort();
    debug!("Chat finished");
    Ok(())
}

/// Act on one REPL command. Never waits for a reply to finish.
async fn dispatch(
    command: ReplCommand,
    orchestrator: &SessionOrchestrator,
    settings: &Settings,
    feed: bool,
) -> ControlFlow<()> {
    match command {
        ReplCommand::Empty => {}
        ReplCommand::Quit => return ControlFlow::Break(()),
        ReplCommand::Help => note_info(HELP),
        ReplCommand::Unknown(message) => note_warn(&message),
        ReplCommand::Clear => {
            orchestrator.clear().await;
            note_success("Conversation cleared");
        }
        ReplCommand::Status => print_status(orchestrator, feed).await,
        ReplCommand::Models => models_cmd::run(&settings.catalog, &orchestrator.model_id().await),
        ReplCommand::Model(id) => match settings.model(&id) {
            Ok(spec) => {
                orchestrator
                    .switch_model(settings.engine_for(&spec), &spec)
                    .await;
                note_success(&format!("Switched to {}", spec.display_name));
            }
            Err(e) => note_error(&e.to_string()),
        },
        ReplCommand::Send(text) => match orchestrator.send_message(text).await {
            Ok(ticket) => debug!(session_id = %ticket.session_id, "Message sent"),
            Err(ChatError::Busy) => {
                note_warn("Still answering; wait for the reply or /clear to stop it")
            }
            Err(e) => note_error(&e.to_string()),
        },
    }
    ControlFlow::Continue(())
}

async fn print_status(orchestrator: &SessionOrchestrator, feed: bool) {
    let snapshot = orchestrator.snapshot().await;
    note_info(&format!(
        "model={} state={} tokens_remaining={} messages={} feed={}",
        orchestrator.model_id().await,
        orchestrator.state(),
        orchestrator.tokens_remaining(),
        snapshot.len(),
        if feed { "on" } else { "off" },
    ));
}

/// Stream visible model output to stdout.
async fn render_events(mut events: broadcast::Receiver<SessionEvent>) {
    let mut visible_replies = HashSet::new();
    let mut stdout = std::io::stdout();
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "Renderer lagged behind session events");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        match event {
            SessionEvent::MessageAppended { id, author: Author::Model, visible: true } => {
                let _ = stream_write(&mut stdout, &styled(MAGENTA, "model> "));
                visible_replies.insert(id);
            }
            SessionEvent::MessageUpdated { id, delta } if visible_replies.contains(&id) => {
                let _ = stream_write(&mut stdout, &delta);
            }
            SessionEvent::MessageCompleted { id } => {
                if visible_replies.remove(&id) {
                    let _ = writeln!(stdout);
                }
            }
            SessionEvent::GenerationFinished {
                outcome: GenerationOutcome::Cancelled,
                ..
            } => {
                let _ = writeln!(stdout, "{}", styled(DIM, "[cancelled]"));
            }
            SessionEvent::BudgetRecomputed { remaining } => {
                let _ = writeln!(stdout, "{}", styled(DIM, &format!("[{remaining} tokens left]")));
            }
            SessionEvent::Cleared => visible_replies.clear(),
            _ => {}
        }
    }
}

async fn render_feed(mut messages: broadcast::Receiver<FeedMessage>) {
    loop {
        match messages.recv().await {
            Ok(message) => println!(
                "{}",
                styled(
                    DIM,
                    &format!("[{}] {}", message.topic, message.payload_text())
                )
            ),
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
