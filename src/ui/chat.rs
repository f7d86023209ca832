use chrono::Local;

use pocketpal_backend::contact::ContactProfile;
use pocketpal_backend::message::{Message, MessageKind, Role};
use pocketpal_backend::scheduler::TurnState;
use pocketpal_backend::store::ContactSummary;

const PREVIEW_CHARS: usize = 24;

/// Title bar: the contact's name, or what they are up to.
pub fn render_header(state: TurnState, contact: &ContactProfile) -> String {
    format!("── {} ──", state.header_status(contact.display_name()))
}

fn speaker(role: Role, contact: &ContactProfile) -> String {
    match role {
        Role::User => contact.nickname().to_string(),
        Role::Assistant => format!("{} {}", contact.avatar.label(), contact.display_name()),
        Role::System => "·".to_string(),
    }
}

pub fn render_message(message: &Message, contact: &ContactProfile) -> String {
    let time = message.timestamp.with_timezone(&Local).format("%H:%M");
    let body = match message.kind {
        MessageKind::Audio => format!("🎤 {}\" {}", message.duration.unwrap_or(1), message.content),
        MessageKind::Text => message.content.clone(),
    };
    let indent = if message.role == Role::User { "        " } else { "" };
    format!("{}[{}] {}: {}", indent, time, speaker(message.role, contact), body)
}

pub fn render_contact_row(summary: &ContactSummary) -> String {
    let contact = &summary.contact;
    let preview: String = summary
        .preview
        .as_deref()
        .unwrap_or_default()
        .chars()
        .take(PREVIEW_CHARS)
        .collect();
    format!(
        "{}[{}] {} {}  {}",
        if contact.is_pinned { "📌" } else { "  " },
        contact.id,
        contact.avatar.label(),
        contact.display_name(),
        preview
    )
}

/// Prefix printed before the first streamed delta of a reply.
pub fn draft_prefix(contact: &ContactProfile) -> String {
    format!("{}: ✎ ", speaker(Role::Assistant, contact))
}

/// Tracks how much of the streaming draft is already on screen, so only
/// the new tail is printed for each update.
#[derive(Debug, Default)]
pub struct DraftEcho {
    printed: usize,
    active: bool,
}

impl DraftEcho {
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// The part of `content` not yet printed. A draft that no longer extends
    /// what was shown is echoed whole.
    pub fn advance<'a>(&mut self, content: &'a str) -> &'a str {
        self.active = true;
        let tail = content.get(self.printed..).unwrap_or(content);
        self.printed = content.len();
        tail
    }

    pub fn reset(&mut self) -> bool {
        let was_active = self.active;
        *self = Self::default();
        was_active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pocketpal_backend::contact::{Avatar, ContactProfile};

    fn xiaohong() -> ContactProfile {
        let mut contact = ContactProfile::new("3", "小红");
        contact.avatar = Avatar::Glyph("🐰".to_string());
        contact.my_nickname = Some("阿杰".to_string());
        contact
    }

    #[test]
    fn header_follows_turn_state() {
        let contact = xiaohong();
        assert_eq!(render_header(TurnState::Idle, &contact), "── 小红 ──");
        assert_eq!(
            render_header(TurnState::Typing, &contact),
            "── 对方正在输入... ──"
        );
    }

    #[test]
    fn bubbles_name_the_speaker() {
        let contact = xiaohong();
        let reply = Message::text("1".to_string(), Role::Assistant, "晚上好", Utc::now());
        assert!(render_message(&reply, &contact).ends_with("🐰 小红: 晚上好"));

        let voice = Message::audio("2".to_string(), "在路上了", 4, Utc::now());
        let line = render_message(&voice, &contact);
        assert!(line.starts_with("        ["));
        assert!(line.ends_with("阿杰: 🎤 4\" 在路上了"));
    }

    #[test]
    fn contact_rows_truncate_previews() {
        let mut contact = xiaohong();
        contact.is_pinned = true;
        let summary = ContactSummary {
            contact,
            preview: Some("一".repeat(40)),
        };
        let row = render_contact_row(&summary);
        assert!(row.starts_with("📌[3] 🐰 小红  "));
        assert!(row.ends_with(&"一".repeat(PREVIEW_CHARS)));
        assert!(!row.contains(&"一".repeat(PREVIEW_CHARS + 1)));
    }

    #[test]
    fn draft_echo_prints_only_new_text() {
        let mut echo = DraftEcho::default();
        assert!(!echo.is_active());
        assert_eq!(echo.advance("你"), "你");
        assert_eq!(echo.advance("你好"), "好");
        assert_eq!(echo.advance("你好||再见"), "||再见");
        assert!(echo.reset());
        assert!(!echo.reset());
        assert_eq!(echo.advance("新"), "新");
    }
}
