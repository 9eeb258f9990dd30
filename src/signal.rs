use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::warn;

/// Messages features send back to the main loop.
#[derive(Debug, PartialEq)]
pub enum BotSignal {
    Chat(String),
}

/// Cloneable handle features use to queue chat messages.
#[derive(Clone)]
pub struct ChatSender {
    tx: UnboundedSender<BotSignal>,
}

impl ChatSender {
    pub fn channel() -> (Self, UnboundedReceiver<BotSignal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ChatSender { tx }, rx)
    }

    pub fn say(&self, message: impl Into<String>) {
        if self.tx.send(BotSignal::Chat(message.into())).is_err() {
            warn!("chat receiver dropped, message discarded");
        }
    }
}

#[cfg(test)]
pub(crate) fn drain(rx: &mut UnboundedReceiver<BotSignal>) -> Vec<String> {
    let mut messages = Vec::new();
    while let Ok(BotSignal::Chat(message)) = rx.try_recv() {
        messages.push(message);
    }
    messages
}
