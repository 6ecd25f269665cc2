//! Persisted session commands.

use chrono::{DateTime, Local, Utc};

use pairlink_core::Config;
use pairlink_session::{FileSessionStore, SessionStore, StoreError};

use crate::SessionAction;

/// Format a datetime for display.
fn format_time(dt: &DateTime<Utc>) -> String {
    let local: DateTime<Local> = dt.with_timezone(&Local);
    local.format("%Y-%m-%d %H:%M").to_string()
}

/// Describe the persisted record without revealing its content.
fn describe(store: &FileSessionStore) -> anyhow::Result<String> {
    let path = store.path().display();
    let summary = match store.inspect() {
        Ok(Some(record)) => {
            let size = match record.credential() {
                Ok(credential) => format!("{} bytes", credential.len()),
                Err(e) => format!("undecodable ({})", e),
            };
            format!(
                "Session persisted at {}\n  Saved:      {}\n  Credential: {}",
                path,
                format_time(&record.saved_at),
                size
            )
        }
        Ok(None) => format!("No session persisted at {}\nThe account will need to be paired.", path),
        Err(StoreError::Corrupt { reason, .. }) => format!(
            "✗ Session record at {} is unreadable: {}\n  It will be ignored on startup. Run 'pairlink session clear' to remove it.",
            path, reason
        ),
        Err(e) => return Err(e.into()),
    };
    Ok(summary)
}

pub async fn handle(action: SessionAction, config: &Config) -> anyhow::Result<()> {
    let store = FileSessionStore::new(&config.session.path);

    match action {
        SessionAction::Show => {
            println!("{}", describe(&store)?);
        }
        SessionAction::Clear => {
            store.delete().await?;
            println!("Session cleared: {}", store.path().display());
        }
    }
    Ok(())
}
