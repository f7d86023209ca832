use std::fmt;

use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const DEFAULT_TIMEZONE: &str = "Asia/Shanghai";
pub const DEFAULT_NICKNAME: &str = "我";
pub const DEFAULT_AVATAR: &str = "🐱";

/// Conversation identifier. Older records stored numeric ids, so both JSON
/// strings and numbers are accepted and compared by their string form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContactId(String);

impl ContactId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContactId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ContactId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<u64> for ContactId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl From<i64> for ContactId {
    fn from(value: i64) -> Self {
        Self(value.to_string())
    }
}

impl Serialize for ContactId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ContactId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Text(String),
            Int(i64),
            Float(f64),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Text(text) => ContactId::new(text),
            RawId::Int(n) => ContactId::from(n),
            RawId::Float(f) if f.fract() == 0.0 => ContactId(format!("{}", f as i64)),
            RawId::Float(f) => ContactId(f.to_string()),
        })
    }
}

/// Avatar reference as stored on a contact: an emoji/glyph, an embedded
/// data URL image, or a remote image URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Avatar {
    Glyph(String),
    Image { mime: String, data_url: String },
    Remote(String),
}

impl Avatar {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.starts_with("http://") || raw.starts_with("https://") {
            return Avatar::Remote(raw.to_string());
        }
        if let Some((mime, _)) = split_data_url(raw) {
            return Avatar::Image {
                mime: mime.to_string(),
                data_url: raw.to_string(),
            };
        }
        if raw.is_empty() {
            Avatar::Glyph(DEFAULT_AVATAR.to_string())
        } else {
            Avatar::Glyph(raw.to_string())
        }
    }

    /// Decoded bytes of an embedded image, `None` for glyphs, remote URLs or
    /// payloads that are not valid base64.
    pub fn image_bytes(&self) -> Option<Vec<u8>> {
        match self {
            Avatar::Image { data_url, .. } => {
                let (_, payload) = split_data_url(data_url)?;
                base64::engine::general_purpose::STANDARD.decode(payload).ok()
            }
            _ => None,
        }
    }

    /// Short text form used by the terminal renderer.
    pub fn label(&self) -> &str {
        match self {
            Avatar::Glyph(glyph) => glyph,
            Avatar::Image { .. } => "🖼",
            Avatar::Remote(_) => "🌐",
        }
    }
}

impl Default for Avatar {
    fn default() -> Self {
        Avatar::Glyph(DEFAULT_AVATAR.to_string())
    }
}

impl Serialize for Avatar {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Avatar::Glyph(text) | Avatar::Remote(text) => serializer.serialize_str(text),
            Avatar::Image { data_url, .. } => serializer.serialize_str(data_url),
        }
    }
}

impl<'de> Deserialize<'de> for Avatar {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(Avatar::parse(raw.as_deref().unwrap_or_default()))
    }
}

/// `data:<mime>;base64,<payload>` -> (mime, payload)
pub fn split_data_url(raw: &str) -> Option<(&str, &str)> {
    let rest = raw.strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    let mime = header.strip_suffix(";base64")?;
    Some((mime, payload))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactProfile {
    pub id: ContactId,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remark: Option<String>,
    #[serde(default)]
    pub avatar: Avatar,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub my_avatar: Option<Avatar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub my_nickname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intro: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_persona: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default)]
    pub weather_sync: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default)]
    pub aside_mode: bool,
    #[serde(default)]
    pub desc_mode: bool,
    #[serde(default)]
    pub time_sense: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default)]
    pub is_pinned: bool,
}

fn filled(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl ContactProfile {
    pub fn new(id: impl Into<ContactId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            remark: None,
            avatar: Avatar::default(),
            my_avatar: None,
            ai_name: None,
            my_nickname: None,
            intro: None,
            ai_persona: None,
            group: None,
            weather_sync: false,
            location: None,
            aside_mode: false,
            desc_mode: false,
            time_sense: false,
            timezone: None,
            is_pinned: false,
        }
    }

    /// Name shown in the header and chat list: remark overrides name.
    pub fn display_name(&self) -> &str {
        filled(&self.remark).unwrap_or(&self.name)
    }

    /// Name the model role-plays as. The settings screen writes the persona
    /// name into `name`, so `aiName` only matters for contacts without one.
    pub fn persona_name(&self) -> &str {
        if !self.name.trim().is_empty() {
            return &self.name;
        }
        filled(&self.ai_name).unwrap_or(&self.name)
    }

    pub fn nickname(&self) -> &str {
        filled(&self.my_nickname).unwrap_or(DEFAULT_NICKNAME)
    }

    pub fn persona(&self) -> Option<&str> {
        filled(&self.ai_persona)
    }

    pub fn backstory(&self) -> Option<&str> {
        filled(&self.intro)
    }

    pub fn location(&self) -> Option<&str> {
        filled(&self.location)
    }

    pub fn timezone(&self) -> &str {
        filled(&self.timezone).unwrap_or(DEFAULT_TIMEZONE)
    }
}

/// Contacts seeded on first launch.
pub fn default_contacts() -> Vec<ContactProfile> {
    [
        ("1", "哼呀鬼", "🐱", "在办公室，刚结束一个案情..."),
        ("2", "小明", "🐶", "吃饭了吗？"),
        ("3", "小红", "🐰", "晚上看个电影"),
    ]
    .into_iter()
    .map(|(id, name, avatar, intro)| {
        let mut contact = ContactProfile::new(id, name);
        contact.avatar = Avatar::Glyph(avatar.to_string());
        contact.remark = Some(name.to_string());
        contact.intro = Some(intro.to_string());
        contact
    })
    .collect()
}
