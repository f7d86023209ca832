use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use base64::Engine;
use chrono::Utc;
use flume::Receiver;
use tokio::io::{AsyncBufReadExt, BufReader};

use pocketpal_backend::contact::ContactId;
use pocketpal_backend::events::ChatEvent;
use pocketpal_backend::runtime::{ChatRuntime, ChatSession};
use pocketpal_backend::scheduler::TriggerFired;

use super::chat::{draft_prefix, render_contact_row, render_header, render_message, DraftEcho};

const HELP: &str = "\
/contacts            list contacts
/open <id>           switch conversation
/new                 add a contact
/delete <id>         delete a contact and its history
/pin                 pin or unpin this contact
/rename <name>       rename this contact
/search <text>       search this conversation
/clear               clear this conversation
/voice <file> [sec]  send a recording as a voice message
/bg [image|clear]    show, set or clear the chat background
/models              list models offered by the endpoint
/quit                exit
Anything else is sent as a message.";

const REPLY_IN_PROGRESS: &str = "对方还在回复，请稍候";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Quit,
    Contacts,
    Open(ContactId),
    New,
    Delete(ContactId),
    Pin,
    Rename(String),
    Search(String),
    Clear,
    Voice { path: PathBuf, seconds: Option<u64> },
    Background(Option<String>),
    Models,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Empty,
    Send(String),
    Command(Command),
}

/// Lines starting with `/` are commands; everything else is chat text.
pub fn parse_input(line: &str) -> Result<Input, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Input::Empty);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Input::Send(line.to_string()));
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };
    let required = |what: &str| {
        if arg.is_empty() {
            Err(format!("/{} needs {}", name, what))
        } else {
            Ok(arg.to_string())
        }
    };

    let command = match name {
        "help" | "h" => Command::Help,
        "quit" | "q" | "exit" => Command::Quit,
        "contacts" | "ls" => Command::Contacts,
        "open" => Command::Open(ContactId::from(required("a contact id")?)),
        "new" => Command::New,
        "delete" => Command::Delete(ContactId::from(required("a contact id")?)),
        "pin" => Command::Pin,
        "rename" => Command::Rename(required("a name")?),
        "search" => Command::Search(required("some text")?),
        "clear" => Command::Clear,
        "voice" => {
            let arg = required("a file")?;
            let mut parts = arg.split_whitespace();
            let path = PathBuf::from(parts.next().unwrap_or_default());
            let seconds = match parts.next() {
                Some(raw) => Some(
                    raw.parse::<u64>()
                        .map_err(|_| format!("not a number of seconds: {}", raw))?,
                ),
                None => None,
            };
            Command::Voice { path, seconds }
        }
        "bg" => Command::Background((!arg.is_empty()).then(|| arg.to_string())),
        "models" => Command::Models,
        other => return Err(format!("unknown command /{} (try /help)", other)),
    };
    Ok(Input::Command(command))
}

/// `data:` URL for an image file, typed by extension.
pub fn image_data_url(path: &Path, bytes: &[u8]) -> String {
    let mime = match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "image/png",
    };
    format!(
        "data:{};base64,{}",
        mime,
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

#[derive(Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub struct ChatApp {
    runtime: ChatRuntime,
    session: ChatSession,
    events: Receiver<ChatEvent>,
    fired: Receiver<TriggerFired>,
    draft: DraftEcho,
}

impl ChatApp {
    pub fn new(
        runtime: ChatRuntime,
        events: Receiver<ChatEvent>,
        fired: Receiver<TriggerFired>,
        contact: &ContactId,
    ) -> Result<Self> {
        let session = runtime.open_chat(contact)?;
        Ok(Self {
            runtime,
            session,
            events,
            fired,
            draft: DraftEcho::default(),
        })
    }

    pub fn session(&self) -> &ChatSession {
        &self.session
    }

    pub async fn run(mut self) -> Result<()> {
        let (line_tx, line_rx) = flume::unbounded();
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line_tx.send(line).is_err() {
                    break;
                }
            }
        });

        self.print_conversation();

        loop {
            tokio::select! {
                line = line_rx.recv_async() => {
                    let Ok(line) = line else { break };
                    if self.handle_line(&line).await == Flow::Quit {
                        break;
                    }
                }
                Ok(fired) = self.fired.recv_async() => {
                    if self.session.scheduler.accept(&fired) {
                        self.runtime.spawn_turn(&self.session);
                    }
                }
                Ok(event) = self.events.recv_async() => self.render_event(event),
            }
        }

        self.session.scheduler.cancel();
        tracing::info!("Chat closed");
        Ok(())
    }

    pub async fn handle_line(&mut self, line: &str) -> Flow {
        let input = match parse_input(line) {
            Ok(input) => input,
            Err(message) => {
                println!("{}", message);
                return Flow::Continue;
            }
        };
        match input {
            Input::Empty => Flow::Continue,
            Input::Send(_) | Input::Command(Command::Voice { .. }) if self.reply_in_progress() => {
                println!("{}", REPLY_IN_PROGRESS);
                Flow::Continue
            }
            Input::Send(text) => {
                self.send_text(&text);
                Flow::Continue
            }
            Input::Command(Command::Quit) => Flow::Quit,
            Input::Command(command) => {
                if let Err(e) = self.run_command(command).await {
                    println!("❌ {:#}", e);
                }
                Flow::Continue
            }
        }
    }

    /// Sending is refused while the contact is thinking or typing.
    fn reply_in_progress(&self) -> bool {
        self.session.scheduler.state().is_busy()
    }

    fn send_text(&mut self, text: &str) {
        match self.session.conversation.commit_user_text(text, Utc::now()) {
            Ok(Some(_)) => {}
            Ok(None) => return,
            Err(e) => println!("⚠ 消息未保存: {}", e),
        }
        self.session.scheduler.arm();
    }

    async fn run_command(&mut self, command: Command) -> Result<()> {
        let id = self.session.conversation.id().clone();
        match command {
            Command::Help => println!("{}", HELP),
            Command::Quit => {}
            Command::Contacts => {
                for summary in self.runtime.store.contact_summaries()? {
                    println!("{}", render_contact_row(&summary));
                }
            }
            Command::Open(target) => {
                let session = self.runtime.open_chat(&target)?;
                self.session.scheduler.cancel();
                self.draft.reset();
                self.session = session;
                self.print_conversation();
            }
            Command::New => {
                let contact = self.runtime.store.add_contact(Utc::now())?;
                println!("added [{}] {}", contact.id, contact.display_name());
            }
            Command::Delete(target) => {
                anyhow::ensure!(target != id, "cannot delete the open conversation");
                if self.runtime.store.delete_contact(&target)? {
                    println!("deleted {}", target);
                } else {
                    println!("no contact {}", target);
                }
            }
            Command::Pin => match self.runtime.store.toggle_pin(&id)? {
                Some(true) => println!("📌 pinned"),
                Some(false) => println!("unpinned"),
                None => println!("contact no longer exists"),
            },
            Command::Rename(name) => {
                let mut profile = self.session.profile.clone();
                profile.name = name.clone();
                profile.ai_name = Some(name);
                anyhow::ensure!(
                    self.runtime.store.update_contact(&profile)?,
                    "contact no longer exists"
                );
                self.session.profile = profile;
                println!("{}", render_header(self.session.scheduler.state(), &self.session.profile));
            }
            Command::Search(query) => {
                let hits = self.runtime.store.search_log(&id, &query)?;
                println!("{} result(s) for \"{}\"", hits.len(), query);
                for message in &hits {
                    println!("{}", render_message(message, &self.session.profile));
                }
            }
            Command::Clear => {
                self.session.scheduler.cancel();
                self.session.conversation.clear()?;
                println!("conversation cleared");
            }
            Command::Voice { path, seconds } => {
                let audio = tokio::fs::read(&path)
                    .await
                    .with_context(|| format!("cannot read {}", path.display()))?;
                let elapsed = Duration::from_secs(seconds.unwrap_or(1));
                let Some(transcript) = self.runtime.transcriber().transcribe(audio, elapsed).await? else {
                    println!("nothing recognised");
                    return Ok(());
                };
                let committed = self
                    .session
                    .conversation
                    .commit_user_audio(&transcript.text, transcript.duration_secs, Utc::now());
                if let Ok(Some(message)) = &committed {
                    println!("{}", render_message(message, &self.session.profile));
                }
                if let Err(e) = committed {
                    println!("⚠ 消息未保存: {}", e);
                }
                self.session.scheduler.arm();
            }
            Command::Background(None) => match self.runtime.store.background(&id)? {
                Some(data_url) => println!("background set ({} bytes)", data_url.len()),
                None => println!("no background"),
            },
            Command::Background(Some(arg)) if arg == "clear" => {
                self.runtime.store.clear_background(&id)?;
                println!("background cleared");
            }
            Command::Background(Some(file)) => {
                let path = PathBuf::from(file);
                let bytes = tokio::fs::read(&path)
                    .await
                    .with_context(|| format!("cannot read {}", path.display()))?;
                self.runtime.store.set_background(&id, &image_data_url(&path, &bytes))?;
                println!("background set");
            }
            Command::Models => {
                for model in self.runtime.discover_models().await? {
                    println!("{}", model);
                }
            }
        }
        Ok(())
    }

    fn print_conversation(&self) {
        println!("{}", render_header(self.session.scheduler.state(), &self.session.profile));
        for message in self.session.conversation.messages() {
            println!("{}", render_message(&message, &self.session.profile));
        }
    }

    fn render_event(&mut self, event: ChatEvent) {
        let current = self.session.conversation.id().clone();
        match event {
            ChatEvent::TurnStateChanged { conversation_id, state } if conversation_id == current => {
                if self.draft.is_active() {
                    return;
                }
                println!("{}", render_header(state, &self.session.profile));
            }
            ChatEvent::DraftUpdated {
                conversation_id,
                content,
            } if conversation_id == current => {
                if !self.draft.is_active() {
                    print!("{}", draft_prefix(&self.session.profile));
                }
                print!("{}", self.draft.advance(&content));
                let _ = std::io::stdout().flush();
            }
            ChatEvent::MessagesCommitted {
                conversation_id,
                messages,
            } if conversation_id == current => {
                if self.draft.reset() {
                    println!();
                }
                for message in &messages {
                    println!("{}", render_message(message, &self.session.profile));
                }
            }
            ChatEvent::PersistenceFailed { conversation_id, error } => {
                tracing::error!("Failed to save conversation {}: {}", conversation_id, error);
                println!("⚠ 聊天记录保存失败: {}", error);
            }
            _ => {}
        }
    }
}
