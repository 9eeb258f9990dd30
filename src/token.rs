use std::time::{Duration, SystemTime};

use anyhow::{bail, Result};
use reqwest::header::AUTHORIZATION;
use reqwest::Client;
use serde::Deserialize;
use tracing::{info, warn};

use crate::config::TwitchConfig;
use crate::db::Database;
use crate::error::BotError;

pub const TOKEN_ENDPOINT: &str = "https://id.twitch.tv/oauth2/token";
const VALIDATION_ENDPOINT: &str = "https://id.twitch.tv/oauth2/validate";
const REVALIDATE_EVERY: Duration = Duration::from_secs(3600);

#[derive(Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Deserialize, Debug)]
pub struct ValidatedToken {
    pub user_id: String,
    pub login: String,
    #[serde(default)]
    pub expires_in: u64,
}

/// OAuth token for one Twitch account, backed by the `tokens` table.
pub struct Token {
    pub access_token: String,
    refresh_token: String,
    user_id: String,
    client_id: String,
    client_secret: String,
    db: Database,
    client: Client,
    last_validated: SystemTime,
}

impl Token {
    pub async fn from_db(db: Database, user_id: &str, cfg: &TwitchConfig) -> Result<Token> {
        let Some(stored) = db.get_token(user_id)? else {
            bail!(BotError::MissingToken(user_id.to_string()));
        };

        let mut token = Token {
            access_token: stored.token,
            refresh_token: stored.refresh,
            user_id: stored.user_id,
            client_id: cfg.client_id.clone(),
            client_secret: cfg.client_secret.clone(),
            db,
            client: Client::new(),
            last_validated: SystemTime::now(),
        };

        token.validate().await?;
        Ok(token)
    }

    pub async fn refresh(&mut self) -> Result<()> {
        let params = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", self.refresh_token.as_str()),
        ];
        let response = self.client.post(TOKEN_ENDPOINT).form(&params).send().await?;

        let status = response.status().as_u16();
        if status != 200 {
            let reason = response.text().await.unwrap_or_default();
            bail!(BotError::RefreshRejected { status, reason });
        }

        let pair: TokenPair = response.json().await?;
        self.db
            .upsert_token(&self.user_id, &pair.access_token, &pair.refresh_token)?;
        self.access_token = pair.access_token;
        self.refresh_token = pair.refresh_token;

        info!(user_id = %self.user_id, "token refreshed");
        Ok(())
    }

    /// Errors when the request fails, Twitch answers with something other
    /// than 200/401, or the refresh after a 401 fails.
    pub async fn validate(&mut self) -> Result<()> {
        self.last_validated = SystemTime::now();
        match validate_access_token(&self.client, &self.access_token).await? {
            Some(validated) => {
                info!(login = %validated.login, expires_in = validated.expires_in, "token valid");
                Ok(())
            }
            None => self.refresh().await,
        }
    }

    pub async fn validate_if_stale(&mut self) {
        let stale = self
            .last_validated
            .elapsed()
            .map(|elapsed| elapsed >= REVALIDATE_EVERY)
            .unwrap_or(true);

        if stale {
            if let Err(e) = self.validate().await {
                warn!(error = %e, "hourly token validation failed");
            }
        }
    }
}

/// `Ok(None)` means Twitch rejected the token (401).
pub async fn validate_access_token(
    client: &Client,
    access_token: &str,
) -> Result<Option<ValidatedToken>> {
    let response = client
        .get(VALIDATION_ENDPOINT)
        .header(AUTHORIZATION, format!("OAuth {access_token}"))
        .send()
        .await?;

    match response.status().as_u16() {
        200 => Ok(Some(response.json().await?)),
        401 => Ok(None),
        other => bail!("Status code was {other} when validating, expected 200 or 401."),
    }
}
