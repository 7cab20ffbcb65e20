//! One-shot operator commands

use anyhow::{Context, Result, bail};
use log::info;
use tempmail::changes::{added_messages, events_from_history};
use tempmail::{
    Cursor, FileAddressPool, FileWatermarkStore, GmailAuth, GmailClient, GmailCredentials,
    ServiceConfig, WatermarkStore,
};

fn gmail_client(config: &ServiceConfig) -> Result<GmailClient> {
    let credentials = GmailCredentials::load().context("Gmail OAuth credentials not configured")?;
    let auth = GmailAuth::new(credentials, config.token_path()?);
    Ok(GmailClient::new(auth, config.request_timeout())
        .with_label_filter(config.label_filter.clone())
        .with_max_attempts(config.fetch_retries))
}

/// Interactive OAuth flow; stores tokens for the server to refresh
pub fn authorize(config: &ServiceConfig) -> Result<()> {
    let client = gmail_client(config)?;
    client.authorize()?;
    println!("Authorization complete. Tokens saved to {}", config.token_path()?.display());
    Ok(())
}

/// Register the Pub/Sub watch and seed the watermark with its history ID
pub fn watch(config: &ServiceConfig, topic: Option<String>, labels: Vec<String>) -> Result<()> {
    let Some(topic) = topic.or_else(|| config.watch_topic.clone()) else {
        bail!("No Pub/Sub topic given; pass --topic or set watch_topic in relay.json");
    };
    let labels = if labels.is_empty() {
        config.label_filter.iter().cloned().collect()
    } else {
        labels
    };

    let client = gmail_client(config)?;
    let registration = client.watch(&topic, labels)?;

    let store = FileWatermarkStore::new(config.state_path()?);
    store
        .save(&registration.history_id)
        .context("Failed to seed watermark")?;

    info!("Watch registered on {}", topic);
    println!("Initial history ID: {}", registration.history_id);
    println!("Watermark saved to {}", store.path().display());
    if let Some(expires_at) = registration.expires_at {
        println!("Watch expires at {} (re-run before then)", expires_at);
    }
    Ok(())
}

pub fn stop_watch(config: &ServiceConfig) -> Result<()> {
    let client = gmail_client(config)?;
    if client.stop_watch()? {
        println!("Push notifications stopped");
    } else {
        println!("No active watch to stop");
    }
    Ok(())
}

/// Print "message added" events after a cursor without touching any state
pub fn history(config: &ServiceConfig, cursor: &str) -> Result<()> {
    let client = gmail_client(config)?;
    let cursor = Cursor::new(cursor);
    let response = client.list_history_all(&cursor)?;

    let records = response.history.unwrap_or_default();
    let events = added_messages(events_from_history(&records));
    if events.is_empty() {
        println!("No new messages after {}", cursor);
    } else {
        println!("{} new message(s) after {}:", events.len(), cursor);
        for event in &events {
            println!("  {}", event.message_id);
        }
    }
    if let Some(latest) = response.history_id {
        println!("Latest history ID: {}", latest);
    }
    Ok(())
}

pub fn seed_pool(config: &ServiceConfig, prefix: &str, domain: &str, count: usize) -> Result<()> {
    let pool = FileAddressPool::new(config.pool_path()?);
    let added = pool.seed(prefix, domain, count)?;
    for address in &added {
        println!("{}", address);
    }
    println!("Added {} addresses to {}", added.len(), pool.path().display());
    Ok(())
}
