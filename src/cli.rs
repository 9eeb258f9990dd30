use std::path::PathBuf;

use clap::Parser;

/// Twitch chat bot: song list, pun voting, mood checks and viewer check-ins.
#[derive(Parser, Debug)]
#[command(name = "juliebot", version, about)]
pub struct Args {
    /// Path to the settings file
    #[arg(short, long, env = "JULIEBOT_CONFIG", default_value = "settings.toml")]
    pub config: PathBuf,

    /// Run the OAuth flow for the bot account, store the token and exit
    #[arg(long)]
    pub authorize: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Args {
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "juliebot=info",
            1 => "juliebot=debug",
            _ => "juliebot=trace",
        }
    }
}
