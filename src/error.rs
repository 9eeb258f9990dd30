use thiserror::Error;

/// Errors the bot needs to tell apart from generic failures.
#[derive(Debug, Error)]
pub enum BotError {
    /// No token stored for the given Twitch user id.
    #[error("no token stored for user {0}. Run with --authorize first.")]
    MissingToken(String),

    /// Twitch refused to refresh the token.
    #[error("token refresh rejected with status {status}: {reason}")]
    RefreshRejected { status: u16, reason: String },

    /// The IRC server closed the connection or asked us to reconnect.
    #[error("IRC connection closed")]
    ConnectionClosed,

    /// A permission group in commands.yaml that doesn't exist.
    #[error("unknown permission group '{0}'")]
    UnknownGroup(String),
}
