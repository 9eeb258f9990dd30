mod authorize;
mod bot;
mod checkin;
mod cli;
mod command;
mod config;
mod db;
mod error;
mod helpers;
mod message;
mod mood;
mod puns;
mod signal;
mod songs;
mod stream;
mod token;
mod window;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use bot::Bot;
use cli::Args;
use config::Config;
use db::Database;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(args.log_filter())),
        )
        .init();

    let mut config = Config::build(&args.config)?;

    if args.authorize {
        let db = Database::open(&config.database_path)?;
        let mut auth_process = authorize::TwitchAuthProcess::create(&config.twitch_cfg, db);
        let account = auth_process
            .authorize_account(&config.twitch_cfg.bot_scope)
            .await?;

        config.twitch_cfg.bot_id = account.user_id;
        config.update_file()?;
        info!(login = %account.login, "bot account authorized, start again without --authorize");
        return Ok(());
    }

    info!("Starting bot...");
    let mut bot = Bot::initialize(config).await?;
    bot.run().await
}
