use anyhow::Context;
use config::{Config, Environment, File};
use duet_protocol::CollectionLayout;
use duet_webrtc::config::IceConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const CONFIG_FILE_NAME: &str = "duet.toml";
pub const ENV_PREFIX: &str = "duet";

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct CallConfig {
    pub ice: IceConfig,
    pub collections: CollectionLayout,
    pub channels: ChannelsConfig,
}

impl CallConfig {
    /// Layers the built-in defaults, `<config_dir>/duet.toml`, `duet.toml` in the working
    /// directory and `DUET_*` environment variables (nested keys separated by `__`).
    pub fn parse(config_dir: &Path) -> anyhow::Result<Self> {
        let local_config = config_dir.join(CONFIG_FILE_NAME);
        let local_config = local_config
            .to_str()
            .context("Failed to get local config path")?;

        let config: Self = Config::builder()
            .add_source(Config::try_from(&CallConfig::default())?)
            .add_source(File::with_name(local_config).required(false))
            .add_source(File::with_name(CONFIG_FILE_NAME).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build config")?
            .try_deserialize()
            .context("Failed to deserialize config")?;

        config
            .channels
            .validate()
            .context("Invalid channels config")?;
        Ok(config)
    }
}

/// Queue capacities of a call state machine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelsConfig {
    pub commands: usize,
    pub events: usize,
    pub call_events: usize,
}

impl ChannelsConfig {
    /// Every queue needs room for at least one item.
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, capacity) in [
            ("commands", self.commands),
            ("events", self.events),
            ("call_events", self.call_events),
        ] {
            anyhow::ensure!(capacity > 0, "channels.{name} must be greater than zero");
        }
        Ok(())
    }
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            commands: 16,
            events: 256,
            call_events: 32,
        }
    }
}
