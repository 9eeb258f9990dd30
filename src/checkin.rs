use std::collections::HashSet;

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::db::Database;
use crate::message::User;
use crate::signal::ChatSender;

/// Viewer check-ins for today's broadcast.
pub struct CheckIns {
    db: Database,
    chat: ChatSender,
    broadcast_id: Option<i64>,
    checked_in: HashSet<String>,
}

impl CheckIns {
    /// Check-ins stay disabled when they're turned off or the broadcast
    /// couldn't be registered.
    pub fn new(db: Database, chat: ChatSender, enabled: bool, today: NaiveDate) -> Self {
        let broadcast_id = if enabled {
            match db.start_broadcast(today) {
                Ok(id) => {
                    info!(broadcast_id = id, date = %today, "check-ins open");
                    Some(id)
                }
                Err(e) => {
                    warn!(error = %e, "couldn't register broadcast, check-ins disabled");
                    None
                }
            }
        } else {
            None
        };

        CheckIns {
            db,
            chat,
            broadcast_id,
            checked_in: HashSet::new(),
        }
    }

    /// `!checkin`
    pub fn checkin(&mut self, user: &User) {
        let Some(broadcast_id) = self.broadcast_id else {
            return;
        };

        let participant = user.participant_id().to_string();
        info!(user = %user.username, id = %participant, "checkin");
        if !self.checked_in.insert(participant.clone()) {
            info!(user = %user.username, "user already checked in this session");
            return;
        }

        let streak = match self.db.record_checkin(&participant, &user.username, broadcast_id) {
            Ok(streak) => streak,
            Err(e) => {
                warn!(user = %user.username, error = %e, "failed to record check-in");
                self.checked_in.remove(&participant);
                return;
            }
        };
        let total = match self.db.total_checkins(&participant) {
            Ok(total) => total,
            Err(e) => {
                warn!(user = %user.username, error = %e, "failed to count check-ins");
                streak
            }
        };

        self.chat.say(format!(
            "@{} checked in! <3 current watch streak: {streak} (total check-ins: {total})",
            user.username
        ));
    }
}
