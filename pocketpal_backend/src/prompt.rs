use chrono::{DateTime, Datelike, Local, TimeZone, Timelike, Utc, Weekday};
use chrono_tz::Tz;

use crate::contact::{ContactProfile, DEFAULT_NICKNAME};
use crate::llm_client::ChatMessage;
use crate::message::{Message, Role};

pub const PLACEHOLDER_PERSONA_NAME: &str = "AI助手";
pub const SEGMENT_DELIMITER: &str = "||";

/// Facts about the outside world that a contact may be aware of.
#[derive(Debug, Clone)]
pub struct PromptContext {
    pub now: DateTime<Utc>,
    /// Weather summary fetched earlier for the contact's location.
    pub weather: Option<String>,
}

impl PromptContext {
    pub fn new(now: DateTime<Utc>, weather: Option<String>) -> Self {
        Self { now, weather }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComposedPrompt {
    pub system: String,
    pub history: Vec<ChatMessage>,
}

impl ComposedPrompt {
    /// System instruction first, then the conversation.
    pub fn into_request_messages(self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.history.len() + 1);
        messages.push(ChatMessage::new(Role::System, self.system));
        messages.extend(self.history);
        messages
    }
}

pub fn compose(
    profile: Option<&ContactProfile>,
    log: &[Message],
    context: &PromptContext,
) -> ComposedPrompt {
    ComposedPrompt {
        system: build_system_prompt(profile, context),
        history: project_history(log),
    }
}

pub fn build_system_prompt(profile: Option<&ContactProfile>, context: &PromptContext) -> String {
    let persona_name = profile.map_or(PLACEHOLDER_PERSONA_NAME, |p| p.persona_name());
    let nickname = profile.map_or(DEFAULT_NICKNAME, |p| p.nickname());

    let mut prompt = String::new();
    prompt.push_str(&format!("你现在进行角色扮演。你的名字是：{}。\n", persona_name));
    prompt.push_str(&format!("你的对话对象是：{}。\n", nickname));

    if let Some(profile) = profile {
        if let Some(persona) = profile.persona() {
            prompt.push_str(&format!("【你的详细人设】：\n{}\n", persona));
        } else if let Some(backstory) = profile.backstory() {
            prompt.push_str(&format!("【人设背景】：{}\n", backstory));
        }

        let environment = environment_lines(profile, context);
        if !environment.is_empty() {
            prompt.push_str("\n【环境感知】：\n");
            for line in environment {
                prompt.push_str(&format!("- {}\n", line));
            }
        }
    }

    let aside = profile.is_some_and(|p| p.aside_mode);
    let descriptive = profile.is_some_and(|p| p.desc_mode);

    let mut instructions = vec![format!(
        "随机决定回复条数，如需分段用 {} 隔开。",
        SEGMENT_DELIMITER
    )];
    if aside {
        instructions.push("[旁白模式]：用（括号）描写心理/动作。".to_string());
    }
    if descriptive {
        instructions.push("[描写模式]：侧重动作描写。".to_string());
    } else {
        instructions.push("保持口语化。".to_string());
    }

    prompt.push_str("\n【回复指令】：\n");
    for (index, line) in instructions.iter().enumerate() {
        prompt.push_str(&format!("{}. {}\n", index + 1, line));
    }

    prompt
}

fn environment_lines(profile: &ContactProfile, context: &PromptContext) -> Vec<String> {
    let mut lines = Vec::new();
    if profile.time_sense {
        lines.push(format!(
            "当前时间：{}",
            format_local_time(context.now, profile.timezone())
        ));
    }
    if profile.weather_sync {
        let weather = context.weather.as_deref().map(str::trim).filter(|w| !w.is_empty());
        if let Some(weather) = weather {
            lines.push(format!(
                "{} 天气：{}",
                profile.location().unwrap_or("当前位置"),
                weather
            ));
        }
    }
    lines
}

/// Full date, weekday and 24h time, e.g. `2024年3月5日星期二 14:05`.
/// Unknown zone names fall back to the machine's local time.
pub fn format_local_time(now: DateTime<Utc>, timezone: &str) -> String {
    match timezone.parse::<Tz>() {
        Ok(tz) => format_zh(&now.with_timezone(&tz)),
        Err(_) => {
            tracing::debug!("Unknown timezone {:?}, using local time", timezone);
            format_zh(&now.with_timezone(&Local))
        }
    }
}

fn format_zh<T: TimeZone>(time: &DateTime<T>) -> String {
    format!(
        "{}年{}月{}日{} {:02}:{:02}",
        time.year(),
        time.month(),
        time.day(),
        weekday_zh(time.weekday()),
        time.hour(),
        time.minute()
    )
}

fn weekday_zh(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "星期一",
        Weekday::Tue => "星期二",
        Weekday::Wed => "星期三",
        Weekday::Thu => "星期四",
        Weekday::Fri => "星期五",
        Weekday::Sat => "星期六",
        Weekday::Sun => "星期日",
    }
}

/// Every finalized message as a role/content pair. Voice messages carry
/// their transcript as content already.
pub fn project_history(log: &[Message]) -> Vec<ChatMessage> {
    log.iter()
        .filter(|m| !m.is_draft())
        .map(|m| ChatMessage::new(m.role, m.content.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_now() -> DateTime<Utc> {
        // 2024-03-05 06:05 UTC = 14:05 in Shanghai, a Tuesday
        Utc.with_ymd_and_hms(2024, 3, 5, 6, 5, 0).unwrap()
    }

    fn mo() -> ContactProfile {
        let mut profile = ContactProfile::new("7", "Mo");
        profile.ai_name = Some("Mo".to_string());
        profile.my_nickname = Some("Boss".to_string());
        profile
    }

    #[test]
    fn identity_only_prompt_has_no_environment() {
        let log = vec![Message::text("1".to_string(), Role::User, "hi", sample_now())];
        let composed = compose(Some(&mo()), &log, &PromptContext::new(sample_now(), None));

        assert!(composed.system.contains("你的名字是：Mo"));
        assert!(composed.system.contains("你的对话对象是：Boss"));
        assert!(!composed.system.contains("【环境感知】"));
        assert!(!composed.system.contains("当前时间"));
        assert!(!composed.system.contains("天气"));
        assert!(composed.system.contains("||"));
        assert_eq!(composed.history, vec![ChatMessage::new(Role::User, "hi")]);

        let request = composed.into_request_messages();
        assert_eq!(request[0].role, Role::System);
        assert_eq!(request.len(), 2);
    }

    #[test]
    fn persona_wins_over_backstory() {
        let mut profile = mo();
        profile.intro = Some("刚下班".to_string());
        let context = PromptContext::new(sample_now(), None);
        let prompt = build_system_prompt(Some(&profile), &context);
        assert!(prompt.contains("【人设背景】：刚下班"));

        profile.ai_persona = Some("毒舌但心软的侦探".to_string());
        let prompt = build_system_prompt(Some(&profile), &context);
        assert!(prompt.contains("【你的详细人设】：\n毒舌但心软的侦探"));
        assert!(!prompt.contains("人设背景"));
    }

    #[test]
    fn environment_block_follows_flags() {
        let mut profile = mo();
        profile.time_sense = true;
        profile.weather_sync = true;
        profile.location = Some("Hangzhou".to_string());

        let with_weather = PromptContext::new(sample_now(), Some(" hangzhou: ☀️ +18°C \n".to_string()));
        let prompt = build_system_prompt(Some(&profile), &with_weather);
        assert!(prompt.contains("【环境感知】"));
        assert!(prompt.contains("- 当前时间：2024年3月5日星期二 14:05"));
        assert!(prompt.contains("- Hangzhou 天气：hangzhou: ☀️ +18°C\n"));

        // weather sync on but nothing fetched yet
        let prompt = build_system_prompt(Some(&profile), &PromptContext::new(sample_now(), None));
        assert!(!prompt.contains("天气"));

        profile.time_sense = false;
        profile.weather_sync = false;
        let prompt = build_system_prompt(Some(&profile), &with_weather);
        assert!(!prompt.contains("【环境感知】"));
    }

    #[test]
    fn modal_instructions_are_exclusive() {
        let mut profile = mo();
        let context = PromptContext::new(sample_now(), None);

        let casual = build_system_prompt(Some(&profile), &context);
        assert!(casual.contains("2. 保持口语化。"));
        assert!(!casual.contains("描写模式"));

        profile.aside_mode = true;
        profile.desc_mode = true;
        let narrated = build_system_prompt(Some(&profile), &context);
        assert!(narrated.contains("2. [旁白模式]"));
        assert!(narrated.contains("3. [描写模式]"));
        assert!(!narrated.contains("保持口语化"));
    }

    #[test]
    fn missing_profile_uses_placeholders() {
        let prompt = build_system_prompt(None, &PromptContext::new(sample_now(), None));
        assert!(prompt.contains("你的名字是：AI助手"));
        assert!(prompt.contains("你的对话对象是：我"));
    }

    #[test]
    fn drafts_are_not_sent_and_audio_sends_transcript() {
        let mut draft = Message::text("3".to_string(), Role::Assistant, "半句", sample_now());
        draft.draft = true;
        let log = vec![
            Message::audio("1".to_string(), "语音转写内容", 4, sample_now()),
            Message::text("2".to_string(), Role::Assistant, "收到", sample_now()),
            draft,
        ];
        let history = project_history(&log);
        assert_eq!(
            history,
            vec![
                ChatMessage::new(Role::User, "语音转写内容"),
                ChatMessage::new(Role::Assistant, "收到"),
            ]
        );
    }

    #[test]
    fn unknown_timezone_falls_back() {
        let rendered = format_local_time(sample_now(), "Mars/Olympus");
        assert!(rendered.contains("年"));
        assert_eq!(format_local_time(sample_now(), "Europe/London"), "2024年3月5日星期二 06:05");
    }
}
