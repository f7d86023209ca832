mod ui;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

pub use pocketpal_backend::config;
pub use pocketpal_backend::contact;
pub use pocketpal_backend::runtime;

use config::AppConfig;
use contact::ContactId;
use runtime::ChatRuntime;
use ui::app::ChatApp;

const DEFAULT_CONTACT: &str = "1";

fn main() -> Result<()> {
    // logs on stderr, chat on stdout
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,pocketpal=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("PocketPal starting...");

    let config = AppConfig::load();
    let contact = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONTACT.to_string());

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start runtime")?;

    rt.block_on(async move {
        let (event_tx, event_rx) = flume::unbounded();
        let (fired_tx, fired_rx) = flume::unbounded();
        let runtime = ChatRuntime::bootstrap(config, event_tx, fired_tx)
            .context("failed to bootstrap chat runtime")?;

        println!("PocketPal · /help for commands");
        ChatApp::new(runtime, event_rx, fired_rx, &ContactId::from(contact))?
            .run()
            .await
    })
}
