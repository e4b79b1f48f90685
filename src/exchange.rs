//! Send-message lifecycle: optimistic user append, backend call, reply append.
//!
//! One request may be in flight at a time. The phase is tracked as an
//! explicit state machine: `Idle -> Sending -> {Succeeded, Failed} -> Idle`.

use crate::api::ChatBackend;
use crate::models::{Agent, Message};
use crate::threads::ThreadStore;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    Idle,
    Sending,
    Succeeded,
    Failed,
}

impl ExchangeState {
    fn can_transition_to(self, next: ExchangeState) -> bool {
        use ExchangeState::*;
        matches!(
            (self, next),
            (Idle, Sending) | (Sending, Succeeded) | (Sending, Failed) | (Succeeded, Idle) | (Failed, Idle)
        )
    }
}

impl fmt::Display for ExchangeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExchangeState::Idle => "idle",
            ExchangeState::Sending => "sending",
            ExchangeState::Succeeded => "succeeded",
            ExchangeState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum SendError {
    /// The backend failed; the user message stays in the thread.
    #[error("Failed to get AI response: {0}")]
    Backend(#[source] anyhow::Error),
}

/// Orchestrates one message exchange against the injected backend.
pub struct ChatController {
    threads: Arc<Mutex<ThreadStore>>,
    backend: Arc<dyn ChatBackend>,
    state: std::sync::Mutex<ExchangeState>,
}

impl ChatController {
    pub fn new(threads: Arc<Mutex<ThreadStore>>, backend: Arc<dyn ChatBackend>) -> Self {
        Self {
            threads,
            backend,
            state: std::sync::Mutex::new(ExchangeState::Idle),
        }
    }

    pub fn state(&self) -> ExchangeState {
        *self.lock_state()
    }

    /// True while a request is in flight; hosts disable their input on it.
    pub fn is_loading(&self) -> bool {
        self.state() == ExchangeState::Sending
    }

    /// Sends `content` and records the reply in the active thread.
    ///
    /// Returns `Ok(None)` without doing anything when the content is blank or
    /// another request is still in flight.
    pub async fn send_message(
        &self,
        content: &str,
        agent: Agent,
        url: Option<&str>,
    ) -> Result<Option<String>, SendError> {
        let content = content.trim();
        if content.is_empty() {
            log::debug!("Ignoring empty submission");
            return Ok(None);
        }
        let Some(mut flight) = self.try_begin() else {
            log::debug!("Ignoring submission while a request is in flight");
            return Ok(None);
        };

        let url = url.map(str::to_string);
        let thread_id = {
            let mut threads = self.threads.lock().await;
            let thread_id = threads.ensure_active_thread().await;
            threads
                .add_message(&thread_id, Message::user(content, agent, url.clone()))
                .await;
            thread_id
        };

        log::info!("Sending message to {} agent for thread {}", agent, thread_id);
        match self.backend.send(content, agent, url.as_deref()).await {
            Ok(reply) => {
                self.threads
                    .lock()
                    .await
                    .add_message(&thread_id, Message::ai(reply.clone(), agent, url))
                    .await;
                flight.finish(ExchangeState::Succeeded);
                Ok(Some(reply))
            }
            Err(e) => {
                log::error!("Backend failed for thread {}: {:?}", thread_id, e);
                flight.finish(ExchangeState::Failed);
                Err(SendError::Backend(e))
            }
        }
    }

    // Idle -> Sending, atomically; None if something is already in flight
    fn try_begin(&self) -> Option<InFlight<'_>> {
        let mut state = self.lock_state();
        if *state != ExchangeState::Idle {
            return None;
        }
        *state = ExchangeState::Sending;
        Some(InFlight {
            state: &self.state,
            done: false,
        })
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ExchangeState> {
        lock_state(&self.state)
    }
}

fn lock_state(state: &std::sync::Mutex<ExchangeState>) -> std::sync::MutexGuard<'_, ExchangeState> {
    // A poisoned lock still holds a valid state
    state
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn transition(state: &std::sync::Mutex<ExchangeState>, next: ExchangeState) {
    let mut state = lock_state(state);
    if !state.can_transition_to(next) {
        log::warn!("Unexpected exchange transition: {} -> {}", *state, next);
    }
    log::debug!("Exchange {} -> {}", *state, next);
    *state = next;
}

/// The `Sending` phase of one exchange. Dropping it before [`InFlight::finish`]
/// (a timed-out or cancelled send) returns the controller to `Idle`.
struct InFlight<'a> {
    state: &'a std::sync::Mutex<ExchangeState>,
    done: bool,
}

impl InFlight<'_> {
    fn finish(&mut self, outcome: ExchangeState) {
        transition(self.state, outcome);
        transition(self.state, ExchangeState::Idle);
        self.done = true;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.done {
            log::warn!("Exchange abandoned while sending, returning to idle");
            *lock_state(self.state) = ExchangeState::Idle;
        }
    }
}
