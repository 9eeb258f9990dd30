use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    #[serde(default = "Config::default_database_path")]
    pub database_path: PathBuf,
    #[serde(default = "Config::default_commands_path")]
    pub commands_path: PathBuf,
    pub twitch_cfg: TwitchConfig,
    #[serde(default)]
    pub puns: PunsConfig,
    #[serde(default)]
    pub mood: MoodConfig,
    #[serde(default)]
    pub songs: SongsConfig,
    #[serde(default)]
    pub checkin: CheckinConfig,

    #[serde(skip)]
    path: PathBuf,
}

impl Config {
    pub fn build(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        let file_contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let mut config: Config = toml::from_str(&file_contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.path = path.to_path_buf();

        Ok(config)
    }

    pub fn update_file(&self) -> Result<()> {
        let serialized = toml::to_string(self).context("failed to serialize config")?;
        std::fs::write(&self.path, serialized.as_bytes())
            .with_context(|| format!("failed to write config file {}", self.path.display()))?;

        Ok(())
    }

    fn default_database_path() -> PathBuf {
        PathBuf::from("juliebot.db")
    }

    fn default_commands_path() -> PathBuf {
        PathBuf::from("commands.yaml")
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct TwitchConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub listener: String,
    pub bot_scope: String,
    pub irc_host: String,
    pub irc_port: u16,
    pub account: String,
    pub channel: String,
    /// Twitch user id of the bot account, filled in after authorizing.
    #[serde(default)]
    pub bot_id: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct PunsConfig {
    pub min_rating: i64,
    pub max_rating: i64,
    pub vote_window_secs: u64,
    pub api_url: String,
    pub api_retries: u32,
}

impl Default for PunsConfig {
    fn default() -> Self {
        Self {
            min_rating: 1,
            max_rating: 5,
            vote_window_secs: 30,
            api_url: "https://punapi.rest/api/pun".to_string(),
            api_retries: 3,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct MoodConfig {
    pub min_rating: i64,
    pub max_rating: i64,
    pub default_duration_mins: u64,
}

impl Default for MoodConfig {
    fn default() -> Self {
        Self {
            min_rating: 1,
            max_rating: 5,
            default_duration_mins: 5,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct SongsConfig {
    pub list_url: String,
    pub helper_frequency_mins: u64,
    pub vlc_url: String,
    pub vlc_password: String,
}

impl Default for SongsConfig {
    fn default() -> Self {
        Self {
            list_url: String::new(),
            helper_frequency_mins: 15,
            vlc_url: "http://localhost:8080".to_string(),
            vlc_password: "vlc".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct CheckinConfig {
    pub enabled: bool,
}

impl Default for CheckinConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}
