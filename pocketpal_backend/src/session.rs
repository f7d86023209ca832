use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use crate::contact::ContactId;
use crate::message::{Message, MessageIdClock};
use crate::store::{ConversationStore, StoreError};

struct ConversationInner {
    messages: Vec<Message>,
    ids: MessageIdClock,
}

/// Live, in-memory view of one conversation's log. Clones share state, so
/// the input side, the streaming turn and the renderer all see one log.
#[derive(Clone)]
pub struct Conversation {
    id: ContactId,
    store: ConversationStore,
    inner: Arc<Mutex<ConversationInner>>,
}

impl Conversation {
    pub fn open(store: ConversationStore, id: ContactId) -> Result<Self, StoreError> {
        let messages = store.load_log(&id)?;
        let ids = MessageIdClock::after(&messages);
        Ok(Self {
            id,
            store,
            inner: Arc::new(Mutex::new(ConversationInner { messages, ids })),
        })
    }

    fn lock(&self) -> MutexGuard<'_, ConversationInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn id(&self) -> &ContactId {
        &self.id
    }

    pub fn messages(&self) -> Vec<Message> {
        self.lock().messages.clone()
    }

    pub fn draft(&self) -> Option<Message> {
        self.lock().messages.iter().find(|m| m.is_draft()).cloned()
    }

    pub fn next_id(&self, now: DateTime<Utc>) -> String {
        self.lock().ids.next_id(now)
    }

    /// Mutate the log under the lock. Callers persist separately.
    pub fn update<R>(&self, f: impl FnOnce(&mut Vec<Message>, &mut MessageIdClock) -> R) -> R {
        let mut inner = self.lock();
        let ConversationInner { messages, ids } = &mut *inner;
        f(messages, ids)
    }

    /// Append a typed message from the user and persist the log.
    /// Blank text is ignored. On a storage failure the message stays in
    /// memory and the error is returned.
    pub fn commit_user_text(&self, text: &str, now: DateTime<Utc>) -> Result<Option<Message>, StoreError> {
        if text.trim().is_empty() {
            return Ok(None);
        }
        let message = self.update(|log, ids| {
            let message = Message::text(ids.next_id(now), crate::message::Role::User, text, now);
            log.push(message.clone());
            message
        });
        self.persist()?;
        Ok(Some(message))
    }

    /// Append a transcribed voice message from the user and persist the log.
    pub fn commit_user_audio(
        &self,
        transcript: &str,
        duration_secs: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<Message>, StoreError> {
        if transcript.trim().is_empty() {
            return Ok(None);
        }
        let message = self.update(|log, ids| {
            let message = Message::audio(ids.next_id(now), transcript, duration_secs, now);
            log.push(message.clone());
            message
        });
        self.persist()?;
        Ok(Some(message))
    }

    /// Rewrite the stored log from the in-memory one.
    pub fn persist(&self) -> Result<(), StoreError> {
        let snapshot = self.messages();
        self.store.save_log(&self.id, &snapshot)
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        self.update(|log, _| log.clear());
        self.store.clear_log(&self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageKind, Role};
    use crate::store::MemoryKvStore;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000).unwrap()
    }

    #[test]
    fn user_messages_append_in_order_and_persist() {
        let store = ConversationStore::in_memory();
        let conversation = Conversation::open(store.clone(), ContactId::from("1")).unwrap();

        assert!(conversation.commit_user_text("  ", now()).unwrap().is_none());
        let first = conversation.commit_user_text("hi", now()).unwrap().unwrap();
        let second = conversation
            .commit_user_audio("语音内容", 3, now())
            .unwrap()
            .unwrap();

        assert!(first.id.parse::<i64>().unwrap() < second.id.parse::<i64>().unwrap());
        assert_eq!(second.kind, MessageKind::Audio);

        let stored = store.load_log(&ContactId::from("1")).unwrap();
        assert_eq!(stored, conversation.messages());
        assert_eq!(stored[0].role, Role::User);

        let reopened = Conversation::open(store, ContactId::from("1")).unwrap();
        let third = reopened.commit_user_text("again", now()).unwrap().unwrap();
        assert!(third.id.parse::<i64>().unwrap() > second.id.parse::<i64>().unwrap());
    }

    #[test]
    fn storage_failure_keeps_message_in_memory() {
        let backend = Arc::new(MemoryKvStore::new());
        let store = ConversationStore::new(backend.clone());
        let conversation = Conversation::open(store, ContactId::from("1")).unwrap();

        backend.set_fail_writes(true);
        let err = conversation.commit_user_text("hi", now()).unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
        assert_eq!(conversation.messages().len(), 1);
    }

    #[test]
    fn clear_empties_memory_and_store() {
        let store = ConversationStore::in_memory();
        let conversation = Conversation::open(store.clone(), ContactId::from("2")).unwrap();
        conversation.commit_user_text("hi", now()).unwrap();
        conversation.clear().unwrap();
        assert!(conversation.messages().is_empty());
        assert!(store.load_log(&ContactId::from("2")).unwrap().is_empty());
    }
}
