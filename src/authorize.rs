use anyhow::{bail, Context, Result};
use reqwest::Client;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};
use urlencoding::encode;

use crate::config::TwitchConfig;
use crate::db::Database;
use crate::helpers;
use crate::token::{self, TokenPair, ValidatedToken, TOKEN_ENDPOINT};

const TWITCH_AUTH_URL: &str = "https://id.twitch.tv/oauth2/authorize";

/// Authorization-code flow: browser → local redirect listener → token exchange.
pub struct TwitchAuthProcess {
    cfg: TwitchConfig,
    db: Database,
    http_client: Client,
    state: String,
}

impl TwitchAuthProcess {
    pub fn create(cfg: &TwitchConfig, db: Database) -> TwitchAuthProcess {
        TwitchAuthProcess {
            cfg: cfg.clone(),
            db,
            http_client: Client::new(),
            state: String::new(),
        }
    }

    /// Runs the whole flow and returns the authorized account.
    pub async fn authorize_account(&mut self, scope: &str) -> Result<ValidatedToken> {
        self.state = helpers::get_rand_string(50);
        let url = self.construct_auth_url(scope);

        match open::that(&url) {
            Ok(_) => info!("Opened authorization page in browser"),
            Err(_) => warn!("Couldn't open authorization page. Go to {url} and authorize"),
        }
        self.start_server().await
    }

    fn construct_auth_url(&self, scope: &str) -> String {
        format!(
            "{TWITCH_AUTH_URL}?client_id={client_id}&redirect_uri={redirect_uri}&response_type=code&scope={scope}&force_verify=true&state={state}",
            client_id = encode(&self.cfg.client_id),
            redirect_uri = encode(&self.cfg.redirect_uri),
            scope = encode(scope),
            state = self.state,
        )
    }

    async fn start_server(&mut self) -> Result<ValidatedToken> {
        let listener = TcpListener::bind(&self.cfg.listener)
            .await
            .with_context(|| format!("failed to listen on {}", self.cfg.listener))?;
        info!(listener = %self.cfg.listener, "waiting for the OAuth redirect");

        loop {
            let (stream, _) = listener.accept().await?;
            match self.handle_redirect(stream).await {
                Ok(account) => return Ok(account),
                Err(e) => warn!(error = %e, "ignoring request"),
            }
        }
    }

    async fn handle_redirect(&mut self, mut stream: TcpStream) -> Result<ValidatedToken> {
        let mut buffer = [0; 4096];
        let read = stream.read(&mut buffer).await?;
        let request = String::from_utf8_lossy(&buffer[..read]);

        let Some(target) = request_target(&request) else {
            bail!("unclear HTTP request");
        };
        let parameters = helpers::extract_parameters(target);

        if let Some(e) = parameters.get("error") {
            respond(&mut stream, "authorization was denied, you can close this tab").await;
            bail!("authorization denied: {e}");
        }
        let Some(auth_code) = parameters.get("code") else {
            respond(&mut stream, "nothing to see here").await;
            bail!("request without a code");
        };
        let Some(received_state) = parameters.get("state") else {
            bail!("state wasn't returned")
        };
        if *received_state != self.state {
            bail!("returned state is wrong")
        };

        let pair = self.get_tokens_with_code(auth_code).await?;
        let Some(account) = token::validate_access_token(&self.http_client, &pair.access_token).await? else {
            bail!("freshly issued token was rejected");
        };
        self.db
            .upsert_token(&account.user_id, &pair.access_token, &pair.refresh_token)?;

        respond(
            &mut stream,
            &format!("authorized {}! you can close this tab", account.login),
        )
        .await;
        info!(login = %account.login, user_id = %account.user_id, "account authorized");
        Ok(account)
    }

    async fn get_tokens_with_code(&self, code: &str) -> Result<TokenPair> {
        let params = [
            ("client_id", self.cfg.client_id.as_str()),
            ("client_secret", self.cfg.client_secret.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", self.cfg.redirect_uri.as_str()),
        ];
        let response = self
            .http_client
            .post(TOKEN_ENDPOINT)
            .form(&params)
            .send()
            .await?;

        let status = response.status().as_u16();
        if status != 200 {
            bail!("token exchange failed ({status}): {}", response.text().await?);
        }

        Ok(response.json().await?)
    }
}

/// The path of the first line of an HTTP request, e.g. `/?code=..`.
fn request_target(request: &str) -> Option<&str> {
    let mut parts = request.lines().next()?.split(' ');
    let _method = parts.next()?;
    parts.next()
}

async fn respond(stream: &mut TcpStream, body: &str) {
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        warn!(error = %e, "couldn't answer the browser");
    }
}
