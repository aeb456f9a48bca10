//! Server-Sent Events stream and sandbox directory watcher.

use std::collections::BTreeSet;
use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use notify::{Event as NotifyEvent, EventKind, PollWatcher, RecursiveMode, Watcher};
use sandbox::core::names::is_log_file;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::state::{AppState, ChangeEvent};

#[derive(Serialize)]
struct SsePayload {
    #[serde(rename = "type")]
    event_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    file: Option<String>,
}

impl From<&ChangeEvent> for SsePayload {
    fn from(event: &ChangeEvent) -> Self {
        let (event_type, file) = match event {
            ChangeEvent::LogAdded { file } => ("log_added", Some(file.clone())),
            ChangeEvent::ProjectsChanged => ("projects_changed", None),
            ChangeEvent::PendingChanged => ("pending_changed", None),
            ChangeEvent::ConfigChanged => ("config_changed", None),
        };
        SsePayload { event_type, file }
    }
}

/// SSE endpoint handler.
pub async fn events_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.event_tx.subscribe();

    let stream = async_stream::stream! {
        yield Ok(Event::default().event("connected").data("{}"));

        loop {
            match rx.recv().await {
                Ok(change_event) => {
                    let payload = SsePayload::from(&change_event);
                    if let Ok(json) = serde_json::to_string(&payload) {
                        yield Ok(Event::default().event("change").data(json));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "SSE client lagged, some events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

/// Start the directory watcher in a background task.
pub fn start_file_watcher(state: AppState) {
    tokio::spawn(async move {
        if let Err(e) = run_file_watcher(state).await {
            warn!(error = %e, "file watcher failed");
        }
    });
}

async fn run_file_watcher(state: AppState) -> anyhow::Result<()> {
    let (tx, mut rx) = mpsc::channel::<NotifyEvent>(100);

    let mut watcher = PollWatcher::new(
        move |res: Result<NotifyEvent, notify::Error>| {
            if let Ok(event) = res {
                let _ = tx.try_send(event);
            }
        },
        notify::Config::default().with_poll_interval(Duration::from_millis(250)),
    )?;

    for dir in [state.logs_dir(), state.files_dir(), state.pending_dir()] {
        if dir.exists() {
            watcher.watch(&dir, RecursiveMode::NonRecursive)?;
            info!(path = %dir.display(), "watching directory");
        }
    }
    let config_path = state.config_path();
    if config_path.exists() {
        watcher.watch(&config_path, RecursiveMode::NonRecursive)?;
    }

    let mut pending_events: Vec<NotifyEvent> = Vec::new();
    let mut flush_tick = tokio::time::interval(Duration::from_millis(200));
    flush_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            Some(event) = rx.recv() => {
                pending_events.push(event);
            }
            _ = flush_tick.tick() => {
                if pending_events.is_empty() {
                    continue;
                }
                process_events(&state, &pending_events);
                pending_events.clear();
            }
        }
    }
}

/// Collapse a batch of filesystem events into change notifications.
fn process_events(state: &AppState, events: &[NotifyEvent]) {
    let logs_dir = state.logs_dir();
    let files_dir = state.files_dir();
    let pending_dir = state.pending_dir();
    let config_path = state.config_path();

    let mut new_logs = BTreeSet::new();
    let mut projects_changed = false;
    let mut pending_changed = false;
    let mut config_changed = false;

    for event in events {
        let created = matches!(event.kind, EventKind::Create(_));
        if !matches!(
            event.kind,
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
        ) {
            continue;
        }
        for path in &event.paths {
            let Some(parent) = path.parent() else {
                continue;
            };
            if path == &config_path {
                config_changed = true;
            } else if parent == logs_dir {
                if created
                    && let Some(name) = path.file_name().and_then(|n| n.to_str())
                    && is_log_file(name)
                {
                    new_logs.insert(name.to_string());
                }
            } else if parent == files_dir {
                projects_changed = true;
            } else if parent == pending_dir {
                pending_changed = true;
            }
        }
    }

    if config_changed {
        debug!("broadcasting config change");
        let _ = state.event_tx.send(ChangeEvent::ConfigChanged);
    }
    if projects_changed {
        debug!("broadcasting projects change");
        let _ = state.event_tx.send(ChangeEvent::ProjectsChanged);
    }
    if pending_changed {
        debug!("broadcasting pending change");
        let _ = state.event_tx.send(ChangeEvent::PendingChanged);
    }
    for file in new_logs {
        debug!(file = %file, "broadcasting new log");
        let _ = state.event_tx.send(ChangeEvent::LogAdded { file });
    }
}
