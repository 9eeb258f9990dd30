use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, warn};

use crate::config::MoodConfig;
use crate::db::Database;
use crate::message::User;
use crate::signal::ChatSender;
use crate::window::{
    AggregateResult, NotificationSink, OpenOutcome, PersistenceSink, RatingRange, TimedWindow,
};

const MAX_CHECK_MINUTES: u64 = 24 * 60;

pub struct MoodNotifier {
    chat: ChatSender,
    range: RatingRange,
}

impl NotificationSink<String> for MoodNotifier {
    fn already_open(&self, _session: &String, remaining: Duration) {
        self.chat.say(format!(
            "there is a mood check currently active ({} min left) - please let me know how you're feeling by using !mood <{} - {}> to record your mood <3",
            remaining.as_secs().div_ceil(60),
            self.range.min,
            self.range.max
        ));
    }

    fn closed(&self, result: &AggregateResult<String>) {
        if result.submission_count == 0 {
            self.chat.say("mood check closed! nobody shared their mood this time :(");
            return;
        }
        self.chat.say(format!(
            "mood check closed! chat's average mood was {:.1} across {} check-ins <3",
            result.mean, result.submission_count
        ));
    }
}

pub struct MoodHistory {
    db: Database,
}

impl PersistenceSink<String> for MoodHistory {
    fn persist(&self, result: &AggregateResult<String>) -> Result<()> {
        self.db
            .record_mood_check(&result.subject, result.mean, result.submission_count)
    }
}

pub struct Mood {
    window: TimedWindow<String, MoodNotifier, MoodHistory>,
    db: Database,
    chat: ChatSender,
    cfg: MoodConfig,
}

impl Mood {
    pub fn new(cfg: MoodConfig, db: Database, chat: ChatSender) -> Self {
        let range = RatingRange::new(cfg.min_rating, cfg.max_rating);
        let window = TimedWindow::new(
            "mood",
            range,
            MoodNotifier {
                chat: chat.clone(),
                range,
            },
            MoodHistory { db: db.clone() },
        );

        Mood {
            window,
            db,
            chat,
            cfg,
        }
    }

    /// `!moodcheck [minutes]`
    pub fn start_check(&self, user: &User, minutes: Option<i64>, now: Instant) {
        if !user.is_elevated() {
            return;
        }

        let minutes = minutes
            .and_then(|m| u64::try_from(m).ok())
            .filter(|m| (1..=MAX_CHECK_MINUTES).contains(m))
            .unwrap_or(self.cfg.default_duration_mins);
        let session = format!("mood-{}", Utc::now().format("%Y%m%dT%H%M%S"));

        let outcome = self
            .window
            .open(session, Duration::from_secs(minutes.saturating_mul(60)), now);
        if outcome != OpenOutcome::Opened {
            return;
        }

        let range = self.window.range();
        let mut announcement = format!(
            "how are you all feeling today? let me know! use !mood <{} - {}> to record your mood and i will keep track of it for you!",
            range.min, range.max
        );
        match self.db.last_answered_mood_check() {
            Ok(Some(last)) => {
                debug!(session = %last.session_id, mean = last.mean, "previous mood check");
                announcement.push_str(&format!(" (last time chat was at {:.1})", last.mean));
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "couldn't load previous mood check"),
        }
        self.chat.say(announcement);
    }

    /// `!mood <n>`
    pub fn record(&self, user: &User, mood: Option<i64>) {
        if let Some(mood) = mood {
            self.window.submit(user.participant_id(), mood);
        }
    }

    pub fn check_expiry(&self, now: Instant) -> Option<AggregateResult<String>> {
        self.window.check_expiry(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Group;
    use crate::signal::{drain, BotSignal};
    use tokio::sync::mpsc::UnboundedReceiver;

    fn setup() -> (Mood, Database, UnboundedReceiver<BotSignal>) {
        let db = Database::in_memory().unwrap();
        let (chat, rx) = ChatSender::channel();
        let mood = Mood::new(MoodConfig::default(), db.clone(), chat);
        (mood, db, rx)
    }

    fn streamer() -> User {
        User::new("julie".to_string(), "1".to_string(), vec![Group::STREAMER])
    }

    fn viewer(id: &str) -> User {
        User::new(format!("viewer{id}"), id.to_string(), vec![])
    }

    #[test]
    fn viewers_cannot_start_a_check() {
        let (mood, _db, mut rx) = setup();

        mood.start_check(&viewer("2"), None, Instant::now());

        assert!(drain(&mut rx).is_empty());
        mood.record(&viewer("2"), Some(3));
        assert!(mood.check_expiry(Instant::now() + Duration::from_secs(3600)).is_none());
    }

    #[test]
    fn check_uses_requested_minutes_and_stores_history() {
        let (mood, db, mut rx) = setup();
        let start = Instant::now();

        mood.start_check(&streamer(), Some(2), start);
        mood.record(&viewer("2"), Some(4));
        mood.record(&viewer("3"), Some(9));
        mood.record(&viewer("2"), Some(1));

        assert!(mood.check_expiry(start + Duration::from_secs(90)).is_none());
        let result = mood.check_expiry(start + Duration::from_secs(121)).unwrap();
        assert_eq!(result.mean, 4.5);
        assert_eq!(result.submission_count, 2);

        let messages = drain(&mut rx);
        assert!(messages[0].starts_with("how are you all feeling today?"));
        assert_eq!(
            messages[1],
            "mood check closed! chat's average mood was 4.5 across 2 check-ins <3"
        );

        let history = db.recent_mood_checks(5).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].mean, 4.5);
        assert_eq!(history[0].votes, 2);
    }

    #[test]
    fn invalid_minutes_fall_back_to_default() {
        let (mood, _db, _rx) = setup();
        let start = Instant::now();

        mood.start_check(&streamer(), Some(-3), start);
        assert!(mood.check_expiry(start + Duration::from_secs(5 * 60)).is_none());
        assert!(mood.check_expiry(start + Duration::from_secs(5 * 60 + 1)).is_some());
    }

    #[test]
    fn oversized_minutes_fall_back_to_default() {
        let (mood, _db, mut rx) = setup();
        let start = Instant::now();

        mood.start_check(&streamer(), Some(999_999_999_999_999_999), start);
        assert!(drain(&mut rx)[0].starts_with("how are you all feeling today?"));
        assert!(mood.check_expiry(start + Duration::from_secs(5 * 60)).is_none());
        assert!(mood.check_expiry(start + Duration::from_secs(5 * 60 + 1)).is_some());
    }

    #[test]
    fn a_full_day_is_accepted() {
        let (mood, _db, _rx) = setup();
        let start = Instant::now();

        mood.start_check(&streamer(), Some(24 * 60), start);
        assert!(mood.check_expiry(start + Duration::from_secs(23 * 3600)).is_none());
        assert!(mood.check_expiry(start + Duration::from_secs(24 * 3600 + 1)).is_some());
    }

    #[test]
    fn second_check_reminds_instead() {
        let (mood, _db, mut rx) = setup();
        let start = Instant::now();

        mood.start_check(&streamer(), Some(5), start);
        drain(&mut rx);
        mood.start_check(&streamer(), Some(1), start + Duration::from_secs(60));

        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 1);
        assert!(messages[0].starts_with("there is a mood check currently active (4 min left)"));
    }

    #[test]
    fn mood_while_closed_is_ignored() {
        let (mood, db, mut rx) = setup();

        mood.record(&viewer("2"), Some(3));

        assert!(drain(&mut rx).is_empty());
        assert!(db.recent_mood_checks(5).unwrap().is_empty());
    }

    #[test]
    fn announcement_mentions_previous_check() {
        let (mood, db, mut rx) = setup();
        db.record_mood_check("mood-earlier", 3.3, 4).unwrap();

        mood.start_check(&streamer(), None, Instant::now());

        let messages = drain(&mut rx);
        assert!(messages[0].ends_with("(last time chat was at 3.3)"));
    }

    #[test]
    fn announcement_skips_checks_nobody_answered() {
        let (mood, db, mut rx) = setup();
        db.record_mood_check("mood-earlier", 4.2, 3).unwrap();
        db.record_mood_check("mood-later", 0.0, 0).unwrap();

        mood.start_check(&streamer(), None, Instant::now());

        let messages = drain(&mut rx);
        assert!(messages[0].ends_with("(last time chat was at 4.2)"));
    }
}
