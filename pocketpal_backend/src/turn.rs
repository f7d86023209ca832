//! One model turn: compose, stream, assemble, persist.
//!
//! Every completion failure ends up as a chat bubble rather than an error
//! returned to the caller.

use std::sync::Arc;

use chrono::Utc;
use flume::Sender;
use futures_util::StreamExt;

use crate::assembler::ReplyAssembler;
use crate::config::CompletionSettings;
use crate::contact::ContactProfile;
use crate::events::ChatEvent;
use crate::llm_client::{CompletionBackend, CompletionError};
use crate::message::Message;
use crate::prompt::{compose, PromptContext};
use crate::scheduler::TurnScheduler;
use crate::session::Conversation;
use crate::store::StoreError;

#[derive(Debug)]
pub struct TurnOutcome {
    /// Messages appended by this turn: reply segments, or one error bubble.
    pub committed: Vec<Message>,
    pub error: Option<CompletionError>,
    pub persist_error: Option<StoreError>,
}

impl TurnOutcome {
    pub fn persisted(&self) -> bool {
        self.persist_error.is_none()
    }
}

pub struct TurnRunner {
    backend: Arc<dyn CompletionBackend>,
    settings: CompletionSettings,
    segment_spacing_ms: i64,
    events: Option<Sender<ChatEvent>>,
}

impl TurnRunner {
    pub fn new(backend: Arc<dyn CompletionBackend>, settings: CompletionSettings, segment_spacing_ms: i64) -> Self {
        Self {
            backend,
            settings,
            segment_spacing_ms,
            events: None,
        }
    }

    pub fn with_events(mut self, events: Sender<ChatEvent>) -> Self {
        self.events = Some(events);
        self
    }

    fn emit(&self, event: ChatEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    /// Run a turn for a conversation whose trigger has fired. The scheduler
    /// always ends idle.
    pub async fn run(
        &self,
        conversation: &Conversation,
        scheduler: &TurnScheduler,
        profile: Option<&ContactProfile>,
        context: &PromptContext,
    ) -> TurnOutcome {
        if !scheduler.state().is_busy() {
            scheduler.begin_now();
        }

        let request = compose(profile, &conversation.messages(), context).into_request_messages();
        let mut assembler = ReplyAssembler::new(conversation.next_id(Utc::now()), self.segment_spacing_ms);

        let streamed = self
            .stream_into(conversation, scheduler, &mut assembler, request)
            .await;

        let (committed, error) = match streamed {
            Ok(()) => {
                let finalized = conversation.update(|log, ids| assembler.finish(log, ids, Utc::now()));
                if finalized.is_empty() {
                    tracing::debug!("{}: reply was empty, nothing to keep", conversation.id());
                }
                (finalized, None)
            }
            Err(error) => {
                tracing::warn!("{}: completion failed: {}", conversation.id(), error);
                let bubble = conversation.update(|log, ids| assembler.fail(log, &error, ids, Utc::now()));
                (vec![bubble], Some(error))
            }
        };

        let mut persist_error = None;
        if !committed.is_empty() {
            self.emit(ChatEvent::MessagesCommitted {
                conversation_id: conversation.id().clone(),
                messages: committed.clone(),
            });
            if let Err(e) = conversation.persist() {
                self.emit(ChatEvent::PersistenceFailed {
                    conversation_id: conversation.id().clone(),
                    error: e.to_string(),
                });
                persist_error = Some(e);
            }
        }

        scheduler.finish_turn();
        TurnOutcome {
            committed,
            error,
            persist_error,
        }
    }

    async fn stream_into(
        &self,
        conversation: &Conversation,
        scheduler: &TurnScheduler,
        assembler: &mut ReplyAssembler,
        request: Vec<crate::llm_client::ChatMessage>,
    ) -> Result<(), CompletionError> {
        let mut deltas = self.backend.stream_chat(&self.settings, request).await?;

        while let Some(delta) = deltas.next().await {
            let delta = delta?;
            if delta.is_empty() {
                continue;
            }
            scheduler.mark_typing();
            conversation.update(|log, _| assembler.push_delta(log, &delta, Utc::now()));
            self.emit(ChatEvent::DraftUpdated {
                conversation_id: conversation.id().clone(),
                content: assembler.content().to_string(),
            });
        }
        Ok(())
    }
}
