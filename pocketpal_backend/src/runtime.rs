use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use flume::Sender;
use tokio::task::JoinHandle;

use crate::config::AppConfig;
use crate::contact::{ContactId, ContactProfile};
use crate::events::ChatEvent;
use crate::http_client::build_http_client;
use crate::llm_client::{CompletionBackend, LlmClient};
use crate::models::{discover_models, ModelDiscoveryError};
use crate::prompt::PromptContext;
use crate::scheduler::{TriggerFired, TurnScheduler};
use crate::session::Conversation;
use crate::store::{ConversationStore, SqliteKvStore};
use crate::transcribe::TranscriptionClient;
use crate::turn::{TurnOutcome, TurnRunner};
use crate::weather::WeatherClient;

/// Everything needed to chat with one contact.
#[derive(Clone)]
pub struct ChatSession {
    pub profile: ContactProfile,
    pub conversation: Conversation,
    pub scheduler: TurnScheduler,
}

pub struct ChatRuntime {
    pub config: AppConfig,
    pub store: ConversationStore,
    pub http: reqwest::Client,
    runner: Arc<TurnRunner>,
    weather: Arc<WeatherClient>,
    transcriber: TranscriptionClient,
    event_tx: Sender<ChatEvent>,
    fired_tx: Sender<TriggerFired>,
}

pub struct ChatRuntimeBuilder {
    config: AppConfig,
    event_tx: Sender<ChatEvent>,
    fired_tx: Sender<TriggerFired>,
    store: Option<ConversationStore>,
    backend: Option<Arc<dyn CompletionBackend>>,
}

impl ChatRuntimeBuilder {
    pub fn new(config: AppConfig, event_tx: Sender<ChatEvent>, fired_tx: Sender<TriggerFired>) -> Self {
        Self {
            config,
            event_tx,
            fired_tx,
            store: None,
            backend: None,
        }
    }

    pub fn with_store(mut self, store: ConversationStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_backend(mut self, backend: Arc<dyn CompletionBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn build(self) -> Result<ChatRuntime> {
        let config = self.config;
        let http = build_http_client(Some(config.connect_timeout()))?;

        let store = match self.store {
            Some(store) => store,
            None => {
                let kv = SqliteKvStore::open(&config.database_path)
                    .with_context(|| format!("failed to open database at {}", config.database_path))?;
                ConversationStore::new(Arc::new(kv))
            }
        };

        let backend = match self.backend {
            Some(backend) => backend,
            None => Arc::new(LlmClient::new(http.clone())) as Arc<dyn CompletionBackend>,
        };
        let settings = config.completion_settings();
        if settings.api_key.is_none() {
            tracing::warn!("LLM_API_KEY is unset; replies will fail until a key is configured");
        }
        let runner = TurnRunner::new(backend, settings, config.segment_spacing_ms)
            .with_events(self.event_tx.clone());

        tracing::info!(
            "Chat runtime ready (model: {}, reply delay: {}ms)",
            config.llm_model,
            config.reply_delay_ms
        );

        Ok(ChatRuntime {
            weather: Arc::new(WeatherClient::new(http.clone(), config.weather_api_url.clone())),
            transcriber: TranscriptionClient::new(http.clone(), config.transcribe_api_url.clone()),
            runner: Arc::new(runner),
            config,
            store,
            http,
            event_tx: self.event_tx,
            fired_tx: self.fired_tx,
        })
    }
}

impl ChatRuntime {
    pub fn bootstrap(
        config: AppConfig,
        event_tx: Sender<ChatEvent>,
        fired_tx: Sender<TriggerFired>,
    ) -> Result<Self> {
        ChatRuntimeBuilder::new(config, event_tx, fired_tx).build()
    }

    pub fn transcriber(&self) -> &TranscriptionClient {
        &self.transcriber
    }

    /// Load a contact and its log and give it a fresh scheduler.
    pub fn open_chat(&self, id: &ContactId) -> Result<ChatSession> {
        let profile = self
            .store
            .find_contact(id)?
            .with_context(|| format!("unknown contact {}", id))?;
        let conversation = Conversation::open(self.store.clone(), id.clone())?;
        let scheduler = TurnScheduler::new(id.clone(), self.config.reply_delay(), self.fired_tx.clone())
            .with_events(self.event_tx.clone());
        Ok(ChatSession {
            profile,
            conversation,
            scheduler,
        })
    }

    pub async fn prompt_context(&self, profile: &ContactProfile) -> PromptContext {
        let weather = self.weather.summary_for(profile).await;
        PromptContext::new(Utc::now(), weather)
    }

    /// Run a turn in the background so input keeps flowing while it streams.
    pub fn spawn_turn(&self, session: &ChatSession) -> JoinHandle<TurnOutcome> {
        let runner = self.runner.clone();
        let weather = self.weather.clone();
        let session = session.clone();
        tokio::spawn(async move {
            let weather = weather.summary_for(&session.profile).await;
            let context = PromptContext::new(Utc::now(), weather);
            runner
                .run(&session.conversation, &session.scheduler, Some(&session.profile), &context)
                .await
        })
    }

    pub async fn run_turn(&self, session: &ChatSession) -> TurnOutcome {
        let context = self.prompt_context(&session.profile).await;
        self.runner
            .run(&session.conversation, &session.scheduler, Some(&session.profile), &context)
            .await
    }

    pub async fn discover_models(&self) -> Result<Vec<String>, ModelDiscoveryError> {
        let base = self.config.llm_api_url.as_deref().unwrap_or_default();
        discover_models(&self.http, base, self.config.llm_api_key.as_deref()).await
    }
}
