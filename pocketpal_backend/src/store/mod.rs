//! Durable contacts and per-conversation message logs.
//!
//! Records are JSON blobs under string keys, mirroring the client-local
//! layout: `contacts` holds the profile collection, `chat_<id>` the ordered
//! message log and `chat_bg_<id>` an optional background image. A log is
//! always rewritten as a whole.

pub mod memory;
pub mod sqlite;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::contact::{default_contacts, Avatar, ContactId, ContactProfile};
use crate::message::Message;

pub use memory::MemoryKvStore;
pub use sqlite::SqliteKvStore;

pub const CONTACTS_KEY: &str = "contacts";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage backend failed: {0}")]
    Backend(String),
    #[error("failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Minimal key/value contract the conversation store is built on.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

fn log_key(id: &ContactId) -> String {
    format!("chat_{}", id)
}

fn background_key(id: &ContactId) -> String {
    format!("chat_bg_{}", id)
}

/// Chat list row: contact plus a preview of the latest message.
#[derive(Debug, Clone)]
pub struct ContactSummary {
    pub contact: ContactProfile,
    pub preview: Option<String>,
}

#[derive(Clone)]
pub struct ConversationStore {
    backend: Arc<dyn KvStore>,
}

impl ConversationStore {
    pub fn new(backend: Arc<dyn KvStore>) -> Self {
        Self { backend }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryKvStore::new()))
    }

    /// Load the contact collection, seeding the defaults on first use.
    pub fn load_contacts(&self) -> Result<Vec<ContactProfile>, StoreError> {
        let Some(raw) = self.backend.get(CONTACTS_KEY)? else {
            let seeded = default_contacts();
            self.save_contacts(&seeded)?;
            return Ok(seeded);
        };

        let mut seen = HashSet::new();
        let contacts = parse_records::<ContactProfile>(CONTACTS_KEY, &raw)
            .into_iter()
            .filter(|c| {
                let fresh = seen.insert(c.id.clone());
                if !fresh {
                    tracing::warn!("Dropping duplicate contact record for id {}", c.id);
                }
                fresh
            })
            .collect();
        Ok(contacts)
    }

    pub fn save_contacts(&self, contacts: &[ContactProfile]) -> Result<(), StoreError> {
        self.write_json(CONTACTS_KEY, contacts)
    }

    pub fn find_contact(&self, id: &ContactId) -> Result<Option<ContactProfile>, StoreError> {
        Ok(self.load_contacts()?.into_iter().find(|c| &c.id == id))
    }

    /// Add a fresh contact after the pinned ones and before everything else.
    pub fn add_contact(&self, now: DateTime<Utc>) -> Result<ContactProfile, StoreError> {
        let millis = now.timestamp_millis();
        let mut contact = ContactProfile::new(ContactId::from(millis), format!("新朋友 {}", millis % 100));
        contact.avatar = Avatar::Glyph("🤖".to_string());
        contact.remark = Some(String::new());
        contact.intro = Some("你好，我是新来的AI助手".to_string());
        contact.ai_name = Some("智能助手".to_string());
        contact.my_nickname = Some("老板".to_string());

        let contacts = self.load_contacts()?;
        let (pinned, unpinned): (Vec<_>, Vec<_>) = contacts.into_iter().partition(|c| c.is_pinned);
        let mut updated = pinned;
        updated.push(contact.clone());
        updated.extend(unpinned);
        self.save_contacts(&updated)?;
        Ok(contact)
    }

    /// Replace the stored profile with the same id. Returns false if unknown.
    pub fn update_contact(&self, profile: &ContactProfile) -> Result<bool, StoreError> {
        let mut contacts = self.load_contacts()?;
        let Some(slot) = contacts.iter_mut().find(|c| c.id == profile.id) else {
            return Ok(false);
        };
        *slot = profile.clone();
        self.save_contacts(&contacts)?;
        Ok(true)
    }

    /// Flip the pin state; returns the new state, or `None` for an unknown id.
    pub fn toggle_pin(&self, id: &ContactId) -> Result<Option<bool>, StoreError> {
        let mut contacts = self.load_contacts()?;
        let Some(contact) = contacts.iter_mut().find(|c| &c.id == id) else {
            return Ok(None);
        };
        contact.is_pinned = !contact.is_pinned;
        let pinned = contact.is_pinned;
        self.save_contacts(&sort_pinned_first(contacts))?;
        Ok(Some(pinned))
    }

    /// Remove a contact together with its log and background.
    pub fn delete_contact(&self, id: &ContactId) -> Result<bool, StoreError> {
        let contacts = self.load_contacts()?;
        let before = contacts.len();
        let remaining: Vec<_> = contacts.into_iter().filter(|c| &c.id != id).collect();
        if remaining.len() == before {
            return Ok(false);
        }
        self.save_contacts(&remaining)?;
        self.backend.remove(&log_key(id))?;
        self.backend.remove(&background_key(id))?;
        Ok(true)
    }

    pub fn contact_summaries(&self) -> Result<Vec<ContactSummary>, StoreError> {
        let contacts = sort_pinned_first(self.load_contacts()?);
        contacts
            .into_iter()
            .map(|contact| {
                let latest = self.load_log(&contact.id)?.pop().map(|m| m.content);
                let preview = latest.or_else(|| contact.backstory().map(str::to_string));
                Ok(ContactSummary { contact, preview })
            })
            .collect()
    }

    pub fn load_log(&self, id: &ContactId) -> Result<Vec<Message>, StoreError> {
        let key = log_key(id);
        match self.backend.get(&key)? {
            Some(raw) => Ok(parse_records(&key, &raw)),
            None => Ok(Vec::new()),
        }
    }

    /// Persist the full log. Streaming drafts are never written.
    pub fn save_log(&self, id: &ContactId, messages: &[Message]) -> Result<(), StoreError> {
        let finalized: Vec<&Message> = messages.iter().filter(|m| !m.is_draft()).collect();
        self.write_json(&log_key(id), &finalized)
    }

    pub fn clear_log(&self, id: &ContactId) -> Result<(), StoreError> {
        self.backend.remove(&log_key(id))
    }

    pub fn search_log(&self, id: &ContactId, query: &str) -> Result<Vec<Message>, StoreError> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .load_log(id)?
            .into_iter()
            .filter(|m| m.content.contains(query))
            .collect())
    }

    pub fn background(&self, id: &ContactId) -> Result<Option<String>, StoreError> {
        self.backend.get(&background_key(id))
    }

    pub fn set_background(&self, id: &ContactId, data_url: &str) -> Result<(), StoreError> {
        self.backend.set(&background_key(id), data_url)
    }

    pub fn clear_background(&self, id: &ContactId) -> Result<(), StoreError> {
        self.backend.remove(&background_key(id))
    }

    fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let raw = serde_json::to_string(value)?;
        self.backend.set(key, &raw).map_err(|e| {
            tracing::error!("Failed to persist {}: {}", key, e);
            e
        })
    }
}

/// Stable sort: pinned contacts first, otherwise original order.
pub fn sort_pinned_first(mut contacts: Vec<ContactProfile>) -> Vec<ContactProfile> {
    contacts.sort_by_key(|c| !c.is_pinned);
    contacts
}

/// Parse a JSON array record, dropping entries that do not match the
/// expected shape instead of failing the whole record.
fn parse_records<T: DeserializeOwned>(key: &str, raw: &str) -> Vec<T> {
    let items = match serde_json::from_str::<Vec<serde_json::Value>>(raw) {
        Ok(items) => items,
        Err(e) => {
            tracing::warn!("Ignoring unreadable record {}: {}", key, e);
            return Vec::new();
        }
    };

    items
        .into_iter()
        .enumerate()
        .filter_map(|(index, item)| match serde_json::from_value::<T>(item) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                tracing::warn!("Dropping malformed entry {} of {}: {}", index, key, e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;
    use chrono::TimeZone;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    fn store_with(raw_contacts: &str) -> (Arc<MemoryKvStore>, ConversationStore) {
        let backend = Arc::new(MemoryKvStore::new());
        backend.set(CONTACTS_KEY, raw_contacts).unwrap();
        (backend.clone(), ConversationStore::new(backend))
    }

    #[test]
    fn first_load_seeds_default_contacts() {
        let backend = Arc::new(MemoryKvStore::new());
        let store = ConversationStore::new(backend.clone());
        let contacts = store.load_contacts().unwrap();
        assert_eq!(contacts.len(), 3);
        assert_eq!(contacts[0].id.as_str(), "1");
        assert!(backend.get(CONTACTS_KEY).unwrap().is_some());
    }

    #[test]
    fn lookup_by_numeric_or_string_id_finds_same_record() {
        let (_, store) = store_with(r#"[{"id":3,"name":"小红"},{"id":"4","name":"小刚"}]"#);
        let by_number = store.find_contact(&ContactId::from(3u64)).unwrap().unwrap();
        let by_string = store.find_contact(&ContactId::from("3")).unwrap().unwrap();
        assert_eq!(by_number, by_string);
        assert_eq!(by_number.name, "小红");
    }

    #[test]
    fn malformed_records_are_dropped_not_trusted() {
        let (_, store) = store_with(
            r#"[{"id":"1","name":"ok"},{"name":"missing id"},42,{"id":"1","name":"dupe"}]"#,
        );
        let contacts = store.load_contacts().unwrap();
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].name, "ok");

        let (backend, store) = store_with("[]");
        backend.set("chat_1", "{not json").unwrap();
        assert!(store.load_log(&ContactId::from("1")).unwrap().is_empty());
    }

    #[test]
    fn log_is_saved_whole_without_drafts() {
        let store = ConversationStore::in_memory();
        let id = ContactId::from("1");
        let mut draft = Message::text("3".to_string(), Role::Assistant, "typing…", at(3));
        draft.draft = true;
        let log = vec![
            Message::text("1".to_string(), Role::User, "hi", at(1)),
            Message::text("2".to_string(), Role::Assistant, "hey", at(2)),
            draft,
        ];
        store.save_log(&id, &log).unwrap();

        let loaded = store.load_log(&id).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].content, "hi");
        assert_eq!(loaded[1].content, "hey");

        assert_eq!(store.search_log(&id, "he").unwrap().len(), 1);
        assert!(store.search_log(&id, "  ").unwrap().is_empty());

        store.clear_log(&id).unwrap();
        assert!(store.load_log(&id).unwrap().is_empty());
    }

    #[test]
    fn update_replaces_the_profile_in_place() {
        let (_, store) = store_with(r#"[{"id":"1","name":"a"},{"id":2,"name":"b"}]"#);
        let mut profile = store.find_contact(&ContactId::from("2")).unwrap().unwrap();
        profile.name = "小刚".to_string();
        profile.weather_sync = true;
        assert!(store.update_contact(&profile).unwrap());

        let contacts = store.load_contacts().unwrap();
        assert_eq!(contacts.len(), 2);
        assert_eq!(contacts[1].name, "小刚");
        assert!(contacts[1].weather_sync);

        let stranger = ContactProfile::new("9", "路人");
        assert!(!store.update_contact(&stranger).unwrap());
        assert_eq!(store.load_contacts().unwrap().len(), 2);
    }

    #[test]
    fn pinning_and_new_contacts_keep_pinned_first() {
        let (_, store) = store_with(r#"[{"id":"1","name":"a"},{"id":"2","name":"b"}]"#);
        assert_eq!(store.toggle_pin(&ContactId::from("2")).unwrap(), Some(true));
        assert_eq!(store.toggle_pin(&ContactId::from("9")).unwrap(), None);

        let added = store.add_contact(at(1_700_000_000_123)).unwrap();
        let ids: Vec<String> = store
            .load_contacts()
            .unwrap()
            .iter()
            .map(|c| c.id.to_string())
            .collect();
        assert_eq!(ids, vec!["2".to_string(), added.id.to_string(), "1".to_string()]);
        assert_eq!(added.nickname(), "老板");
    }

    #[test]
    fn summaries_preview_latest_message_or_intro() {
        let (_, store) = store_with(
            r#"[{"id":"1","name":"a","intro":"intro a"},{"id":"2","name":"b","intro":"intro b","isPinned":true}]"#,
        );
        store
            .save_log(
                &ContactId::from("1"),
                &[Message::text("1".to_string(), Role::Assistant, "最后一句", at(1))],
            )
            .unwrap();

        let summaries = store.contact_summaries().unwrap();
        assert_eq!(summaries[0].contact.id.as_str(), "2");
        assert_eq!(summaries[0].preview.as_deref(), Some("intro b"));
        assert_eq!(summaries[1].preview.as_deref(), Some("最后一句"));
    }

    #[test]
    fn deleting_contact_removes_log_and_background() {
        let (backend, store) = store_with(r#"[{"id":"1","name":"a"}]"#);
        let id = ContactId::from("1");
        store
            .save_log(&id, &[Message::text("1".to_string(), Role::User, "hi", at(1))])
            .unwrap();
        store.set_background(&id, "data:image/png;base64,AAAA").unwrap();

        assert!(store.delete_contact(&id).unwrap());
        assert!(backend.get("chat_1").unwrap().is_none());
        assert!(store.background(&id).unwrap().is_none());
        assert!(!store.delete_contact(&id).unwrap());
    }

    #[test]
    fn failed_write_surfaces_persistence_error() {
        let (backend, store) = store_with("[]");
        backend.set_fail_writes(true);
        let err = store
            .save_log(&ContactId::from("1"), &[Message::text("1".to_string(), Role::User, "hi", at(1))])
            .unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
    }
}
