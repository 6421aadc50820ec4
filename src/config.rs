//! Configuration loading and management

use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::hotkey::HotkeyDefinition;

/// Environment variable holding the hotkey accelerator string
const HOTKEY_ENV: &str = "VOICEKEY_HOTKEY";

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// The hotkey to capture
    pub hotkey: HotkeyDefinition,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        let home = std::env::var("HOME")?;
        let data_dir = PathBuf::from(&home)
            .join(".local")
            .join("share")
            .join("voicekey");

        let socket_path = data_dir.join("daemon.sock");

        let hotkey = match std::env::var(HOTKEY_ENV) {
            Ok(accelerator) => HotkeyDefinition::from_accelerator(&accelerator)
                .with_context(|| format!("invalid {} value {:?}", HOTKEY_ENV, accelerator))?,
            Err(_) => HotkeyDefinition::SpecialKey,
        };

        Ok(Self {
            socket_path,
            data_dir,
            hotkey,
        })
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotkey::Modifier;

    #[test]
    fn test_config_load() {
        // One sequential test: env mutation would race across tests
        std::env::remove_var(HOTKEY_ENV);
        let config = Config::load().unwrap();
        assert!(config.socket_path.to_string_lossy().contains("voicekey"));
        assert_eq!(config.hotkey, HotkeyDefinition::SpecialKey);

        std::env::set_var(HOTKEY_ENV, "control");
        let config = Config::load().unwrap();
        assert_eq!(
            config.hotkey,
            HotkeyDefinition::ModifierOnly(Modifier::Control)
        );

        std::env::set_var(HOTKEY_ENV, "bogus+nope");
        assert!(Config::load().is_err());

        std::env::remove_var(HOTKEY_ENV);
    }
}
