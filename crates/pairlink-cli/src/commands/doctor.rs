//! Diagnostic command to check installation.

use std::path::{Path, PathBuf};

use pairlink_core::config::IssueSeverity;
use pairlink_core::Config;
use pairlink_session::{FileSessionStore, StoreError};

pub async fn run() -> anyhow::Result<()> {
    println!("Running diagnostics...\n");

    // Configuration
    let config = match Config::load() {
        Ok(config) => {
            println!("Configuration:");
            println!("  ✓ Loaded");
            config
        }
        Err(e) => {
            println!("Configuration:");
            println!("  ✗ Failed to load: {}", e);
            println!("    Falling back to defaults for the remaining checks");
            Config::default()
        }
    };

    let validation = config.validate();
    for issue in &validation.issues {
        let marker = match issue.severity {
            IssueSeverity::Error => "✗",
            IssueSeverity::Warning => "!",
        };
        println!("  {} {}: {}", marker, issue.field, issue.message);
    }

    // Session record
    let store = FileSessionStore::new(&config.session.path);
    println!("\nSession record: {}", store.path().display());
    match store.inspect() {
        Ok(Some(_)) => println!("  ✓ Present"),
        Ok(None) => println!("  ✗ Absent (the account will need to be paired)"),
        Err(StoreError::Corrupt { reason, .. }) => {
            println!("  ✗ Unreadable: {}", reason);
            println!("    Run 'pairlink session clear'");
        }
        Err(e) => println!("  ✗ Cannot read: {}", e),
    }

    // Pairing image
    println!("\nPairing image:");
    match config.pairing.write_image.then_some(&config.pairing.image_path) {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            if dir.is_dir() {
                println!("  ✓ {} (directory exists)", path.display());
            } else {
                println!("  ✗ {} (directory will be created)", path.display());
            }
        }
        None => println!("  - disabled"),
    }

    // Messaging capability
    println!("\nMessaging capability: {}", config.messaging.capability);
    if config.messaging.capability == "bridge" {
        let command = &config.messaging.bridge.command;
        match find_executable(command) {
            Some(path) => println!("  ✓ {} found at {}", command, path.display()),
            None => println!("  ✗ {} not found on PATH", command),
        }
        if let Some(dir) = &config.messaging.bridge.working_dir {
            if !dir.is_dir() {
                println!("  ✗ Working directory {} does not exist", dir.display());
            }
        }
    }

    println!("\nDiagnostics complete.");
    Ok(())
}

/// Locate `command` the way a shell would.
fn find_executable(command: &str) -> Option<PathBuf> {
    let candidate = Path::new(command);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }

    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(command))
        .find(|path| path.is_file())
}
