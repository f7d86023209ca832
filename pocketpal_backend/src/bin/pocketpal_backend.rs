use anyhow::{bail, Context, Result};
use chrono::Utc;
use flume::unbounded;
use pocketpal_backend::config::AppConfig;
use pocketpal_backend::contact::ContactId;
use pocketpal_backend::runtime::ChatRuntime;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: pocketpal_backend <init-config | contacts | models | send <contact-id> <message...>>";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,pocketpal_backend=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = AppConfig::load();

    if args.first().map(String::as_str) == Some("init-config") {
        let path = config.save()?;
        println!("wrote {}", path.display());
        return Ok(());
    }

    let rt = tokio::runtime::Runtime::new().context("failed to start runtime")?;
    rt.block_on(run(config, args))
}

async fn run(config: AppConfig, args: Vec<String>) -> Result<()> {
    let (event_tx, _event_rx) = unbounded();
    let (fired_tx, _fired_rx) = unbounded();
    let runtime = ChatRuntime::bootstrap(config, event_tx, fired_tx)
        .context("failed to bootstrap chat runtime")?;

    match args.first().map(String::as_str) {
        Some("contacts") => {
            for summary in runtime.store.contact_summaries()? {
                let contact = &summary.contact;
                println!(
                    "{}\t{}{} {}\t{}",
                    contact.id,
                    if contact.is_pinned { "📌 " } else { "" },
                    contact.avatar.label(),
                    contact.display_name(),
                    summary.preview.unwrap_or_default()
                );
            }
        }
        Some("models") => {
            for model in runtime.discover_models().await? {
                println!("{}", model);
            }
        }
        Some("send") => {
            let (Some(id), text) = (args.get(1), args.get(2..).map(|rest| rest.join(" "))) else {
                bail!(USAGE);
            };
            let text = text.unwrap_or_default();
            if text.trim().is_empty() {
                bail!(USAGE);
            }

            let session = runtime.open_chat(&ContactId::from(id.as_str()))?;
            session.conversation.commit_user_text(&text, Utc::now())?;

            // one-shot: no debounce window, reply right away
            session.scheduler.begin_now();
            let outcome = runtime.run_turn(&session).await;
            for message in &outcome.committed {
                println!("{}: {}", session.profile.display_name(), message.content);
            }
            if let Some(e) = outcome.persist_error {
                bail!("reply shown but not saved: {}", e);
            }
            if let Some(e) = outcome.error {
                bail!("completion failed: {}", e);
            }
        }
        _ => bail!(USAGE),
    }
    Ok(())
}
