//! Debounced reply trigger and the transient turn state.
//!
//! A user send arms a timer; more input before it fires cancels it, and a
//! new send re-arms it. Only the most recent arm can start a model turn.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use flume::Sender;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::contact::ContactId;
use crate::events::ChatEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    #[default]
    Idle,
    Waiting,
    Thinking,
    Typing,
}

impl TurnState {
    /// Header line for the chat screen.
    pub fn header_status<'a>(self, contact_name: &'a str) -> &'a str {
        match self {
            TurnState::Thinking => "对方正在思考...",
            TurnState::Typing => "对方正在输入...",
            TurnState::Waiting => "对方正在偷看你发的消息...",
            TurnState::Idle => contact_name,
        }
    }

    pub fn is_busy(self) -> bool {
        matches!(self, TurnState::Thinking | TurnState::Typing)
    }
}

/// Delivered when an armed delay elapses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerFired {
    pub conversation_id: ContactId,
    pub generation: u64,
}

/// Identifies one arm; superseded by the next `arm`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerHandle {
    generation: u64,
}

impl TriggerHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

struct PendingTrigger {
    generation: u64,
    task: JoinHandle<()>,
    // fired while a turn was running; redelivered when it ends
    deferred: bool,
}

struct SchedulerInner {
    state: TurnState,
    generation: u64,
    pending: Option<PendingTrigger>,
}

/// Cheap to clone; all clones drive the same conversation's turn.
#[derive(Clone)]
pub struct TurnScheduler {
    conversation_id: ContactId,
    delay: Duration,
    fired_tx: Sender<TriggerFired>,
    events: Option<Sender<ChatEvent>>,
    inner: Arc<Mutex<SchedulerInner>>,
}

impl TurnScheduler {
    pub fn new(conversation_id: ContactId, delay: Duration, fired_tx: Sender<TriggerFired>) -> Self {
        Self {
            conversation_id,
            delay,
            fired_tx,
            events: None,
            inner: Arc::new(Mutex::new(SchedulerInner {
                state: TurnState::Idle,
                generation: 0,
                pending: None,
            })),
        }
    }

    pub fn with_events(mut self, events: Sender<ChatEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn conversation_id(&self) -> &ContactId {
        &self.conversation_id
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerInner> {
        // state is plain data; a panic elsewhere cannot leave it half-written
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> TurnState {
        self.lock().state
    }

    pub fn has_pending(&self) -> bool {
        self.lock().pending.is_some()
    }

    /// A user message was committed: (re)start the reply delay. Must be
    /// called from within a tokio runtime.
    pub fn arm(&self) -> TriggerHandle {
        let mut inner = self.lock();
        if let Some(previous) = inner.pending.take() {
            previous.task.abort();
        }

        inner.generation += 1;
        let generation = inner.generation;
        let delay = self.delay;
        let fired_tx = self.fired_tx.clone();
        let conversation_id = self.conversation_id.clone();

        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = fired_tx.send(TriggerFired {
                conversation_id,
                generation,
            });
        });
        inner.pending = Some(PendingTrigger {
            generation,
            task,
            deferred: false,
        });

        tracing::debug!(
            "Armed reply trigger #{} for {} ({:?})",
            generation,
            self.conversation_id,
            delay
        );

        if !inner.state.is_busy() {
            self.transition(&mut inner, TurnState::Waiting);
        }
        TriggerHandle { generation }
    }

    /// The user is typing again. Non-blank input cancels a pending trigger.
    /// Returns true if a trigger was cancelled.
    pub fn note_input(&self, text: &str) -> bool {
        if text.trim().is_empty() {
            return false;
        }
        self.cancel()
    }

    /// Drop the pending trigger, if any; a waiting turn goes back to idle.
    pub fn cancel(&self) -> bool {
        let mut inner = self.lock();
        let Some(pending) = inner.pending.take() else {
            return false;
        };
        pending.task.abort();
        tracing::debug!(
            "Cancelled reply trigger #{} for {}",
            pending.generation,
            self.conversation_id
        );
        if inner.state == TurnState::Waiting {
            self.transition(&mut inner, TurnState::Idle);
        }
        true
    }

    /// Claim a fired trigger. Stale or foreign triggers are rejected, so a
    /// cancelled arm can never start a turn. A trigger that fires during a
    /// turn is held and fired again once that turn finishes.
    pub fn accept(&self, fired: &TriggerFired) -> bool {
        if fired.conversation_id != self.conversation_id {
            return false;
        }
        let mut inner = self.lock();
        let busy = inner.state.is_busy();
        let Some(pending) = inner
            .pending
            .as_mut()
            .filter(|pending| pending.generation == fired.generation)
        else {
            tracing::debug!("Ignoring stale reply trigger #{}", fired.generation);
            return false;
        };
        if busy {
            tracing::debug!("Holding reply trigger #{} until the turn ends", fired.generation);
            pending.deferred = true;
            return false;
        }
        inner.pending = None;
        self.transition(&mut inner, TurnState::Thinking);
        true
    }

    /// Start a turn without waiting, e.g. from a one-shot runner.
    pub fn begin_now(&self) {
        let mut inner = self.lock();
        if let Some(pending) = inner.pending.take() {
            pending.task.abort();
        }
        self.transition(&mut inner, TurnState::Thinking);
    }

    pub fn mark_typing(&self) {
        let mut inner = self.lock();
        if inner.state == TurnState::Thinking {
            self.transition(&mut inner, TurnState::Typing);
        }
    }

    /// The turn is over, successfully or not. With a trigger still pending
    /// the conversation goes back to waiting instead of idle.
    pub fn finish_turn(&self) {
        let mut inner = self.lock();
        let next = match &inner.pending {
            None => TurnState::Idle,
            Some(pending) => {
                if pending.deferred {
                    let _ = self.fired_tx.send(TriggerFired {
                        conversation_id: self.conversation_id.clone(),
                        generation: pending.generation,
                    });
                }
                TurnState::Waiting
            }
        };
        self.transition(&mut inner, next);
    }

    fn transition(&self, inner: &mut SchedulerInner, next: TurnState) {
        if inner.state == next {
            return;
        }
        tracing::debug!("{}: {:?} -> {:?}", self.conversation_id, inner.state, next);
        inner.state = next;
        if let Some(events) = &self.events {
            let _ = events.send(ChatEvent::TurnStateChanged {
                conversation_id: self.conversation_id.clone(),
                state: next,
            });
        }
    }
}
