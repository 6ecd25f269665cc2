//! Configuration commands.

use pairlink_core::Config;

use crate::ConfigAction;

pub fn handle(action: ConfigAction, config: &Config) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            println!("{}", config.to_toml()?);
        }
        ConfigAction::Path => {
            let user = Config::config_dir().join("config.toml");
            let project = std::path::Path::new(Config::PROJECT_FILE);
            for (label, path) in [("User", user.as_path()), ("Project", project)] {
                let marker = if path.exists() { "✓" } else { "✗" };
                println!("{:<8} {} {}", label, marker, path.display());
            }
            println!("Environment: PAIRLINK_* (nested keys separated by '__'), PORT, IP");
        }
    }
    Ok(())
}
