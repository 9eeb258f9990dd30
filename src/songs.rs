use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use reqwest::Client;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::SongsConfig;
use crate::message::User;
use crate::signal::ChatSender;

const QUICKSTART: &str = "song request quickstart: !songlist for a link to a full menu of songs <3";
const VLC_ERROR: &str = "oops! some sort of weird error happened and i'm not sure what to do with it. sorry!";
const NOT_PLAYING: &str = "hmm, it doesn't look like we're currently playing a song...";

#[derive(Clone, Debug, PartialEq)]
pub struct NowPlaying {
    pub title: String,
    pub album: String,
    pub artist: String,
}

/// Talks to VLC's web interface.
pub struct VlcClient {
    client: Client,
    base_url: String,
    password: String,
}

impl VlcClient {
    pub fn new(base_url: &str, password: &str) -> Self {
        VlcClient {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            password: password.to_string(),
        }
    }

    pub async fn status(&self) -> Result<Value> {
        let response = self
            .client
            .get(format!("{}/requests/status.json", self.base_url))
            .basic_auth("", Some(&self.password))
            .send()
            .await?;

        match response.status().as_u16() {
            200 => Ok(response.json().await?),
            other => bail!("VLC status returned {other}"),
        }
    }

    pub async fn next(&self) -> Result<()> {
        let response = self
            .client
            .get(format!("{}/requests/status.xml", self.base_url))
            .query(&[("command", "pl_next")])
            .basic_auth("", Some(&self.password))
            .send()
            .await?;

        match response.status().as_u16() {
            200 => Ok(()),
            other => bail!("VLC pl_next returned {other}"),
        }
    }
}

/// What's playing, or `None` when VLC isn't playing anything.
pub fn now_playing(status: &Value) -> Option<NowPlaying> {
    if status["state"].as_str() != Some("playing") {
        return None;
    }

    let meta = &status["information"]["category"]["meta"];
    let field = |name: &str| meta[name].as_str().unwrap_or("unknown").to_string();
    Some(NowPlaying {
        title: field("title"),
        album: field("album"),
        artist: field("artist"),
    })
}

/// Posts the quickstart message on a timer, unless the bot was the last one talking.
pub struct SongbotHelper {
    frequency: Duration,
    next_due: Instant,
    last_message_was_me: bool,
}

impl SongbotHelper {
    pub fn new(frequency: Duration, now: Instant) -> Self {
        SongbotHelper {
            frequency,
            next_due: now + frequency,
            last_message_was_me: false,
        }
    }

    pub fn chat_seen(&mut self) {
        self.last_message_was_me = false;
    }

    pub fn bot_spoke(&mut self) {
        self.last_message_was_me = true;
    }

    /// Returns the message to send when the helper is due.
    pub fn tick(&mut self, now: Instant) -> Option<&'static str> {
        if self.frequency.is_zero() || now < self.next_due {
            return None;
        }
        self.next_due = now + self.frequency;

        if self.last_message_was_me {
            info!("skipping automated songbot helper; last message was sent by me");
            return None;
        }
        Some(QUICKSTART)
    }
}

pub struct Songs {
    cfg: SongsConfig,
    chat: ChatSender,
    vlc: VlcClient,
    helper: SongbotHelper,
}

impl Songs {
    pub fn new(cfg: SongsConfig, chat: ChatSender, now: Instant) -> Self {
        let vlc = VlcClient::new(&cfg.vlc_url, &cfg.vlc_password);
        let helper = SongbotHelper::new(Duration::from_secs(cfg.helper_frequency_mins * 60), now);
        Songs {
            cfg,
            chat,
            vlc,
            helper,
        }
    }

    pub fn helper_mut(&mut self) -> &mut SongbotHelper {
        &mut self.helper
    }

    pub fn tick(&mut self, now: Instant) {
        if let Some(message) = self.helper.tick(now) {
            self.chat.say(message);
        }
    }

    /// `!songlist`
    pub fn songlist(&self, user: &User) {
        if self.cfg.list_url.is_empty() {
            warn!("songs.list_url is not configured");
            return;
        }
        self.chat.say(format!(
            "hey @{}, here's the song list link! {}",
            user.username, self.cfg.list_url
        ));
    }

    /// `!whatsong`
    pub async fn whatsong(&self, user: &User) {
        let reply = match self.vlc.status().await {
            Ok(status) => match now_playing(&status) {
                Some(song) => format!("{} - {} ({})", song.title, song.album, song.artist),
                None => NOT_PLAYING.to_string(),
            },
            Err(e) => {
                warn!(error = %e, "couldn't read VLC status");
                VLC_ERROR.to_string()
            }
        };
        self.chat.say(format!("@{} {reply}", user.username));
    }

    /// `!nextsong`
    pub async fn nextsong(&self, user: &User) {
        let reply = match self.skip().await {
            Ok(true) => "okiedokie, skipping to next song on the breaktime playlist!",
            Ok(false) => NOT_PLAYING,
            Err(e) => {
                warn!(error = %e, "couldn't skip song in VLC");
                VLC_ERROR
            }
        };
        self.chat.say(format!("@{} {reply}", user.username));
    }

    async fn skip(&self) -> Result<bool> {
        let status = self.vlc.status().await?;
        if now_playing(&status).is_none() {
            return Ok(false);
        }
        self.vlc.next().await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::drain;
    use serde_json::json;

    #[test]
    fn reads_song_metadata() {
        let status = json!({
            "state": "playing",
            "information": {"category": {"meta": {
                "title": "Clair de Lune",
                "album": "Suite bergamasque",
                "artist": "Debussy"
            }}}
        });

        assert_eq!(
            now_playing(&status),
            Some(NowPlaying {
                title: "Clair de Lune".to_string(),
                album: "Suite bergamasque".to_string(),
                artist: "Debussy".to_string(),
            })
        );
    }

    #[test]
    fn stopped_player_has_no_song() {
        assert_eq!(now_playing(&json!({"state": "stopped"})), None);
        assert_eq!(now_playing(&json!({})), None);
    }

    #[test]
    fn missing_tags_are_unknown() {
        let status = json!({"state": "playing", "information": {"category": {"meta": {"title": "x"}}}});
        let song = now_playing(&status).unwrap();
        assert_eq!(song.artist, "unknown");
    }

    #[test]
    fn helper_skips_when_bot_spoke_last() {
        let start = Instant::now();
        let mut helper = SongbotHelper::new(Duration::from_secs(60), start);

        assert_eq!(helper.tick(start + Duration::from_secs(30)), None);
        assert_eq!(helper.tick(start + Duration::from_secs(60)), Some(QUICKSTART));

        helper.bot_spoke();
        assert_eq!(helper.tick(start + Duration::from_secs(120)), None);

        helper.chat_seen();
        assert_eq!(helper.tick(start + Duration::from_secs(150)), None);
        assert_eq!(helper.tick(start + Duration::from_secs(180)), Some(QUICKSTART));
    }

    #[test]
    fn zero_frequency_disables_helper() {
        let start = Instant::now();
        let mut helper = SongbotHelper::new(Duration::ZERO, start);
        assert_eq!(helper.tick(start + Duration::from_secs(3600)), None);
    }

    #[test]
    fn songlist_needs_a_url() {
        let (chat, mut rx) = ChatSender::channel();
        let user = User::new("v".to_string(), String::new(), vec![]);

        Songs::new(SongsConfig::default(), chat.clone(), Instant::now()).songlist(&user);
        assert!(drain(&mut rx).is_empty());

        let cfg = SongsConfig {
            list_url: "https://t.ly/songs".to_string(),
            ..SongsConfig::default()
        };
        Songs::new(cfg, chat, Instant::now()).songlist(&user);
        assert_eq!(
            drain(&mut rx),
            vec!["hey @v, here's the song list link! https://t.ly/songs"]
        );
    }
}
