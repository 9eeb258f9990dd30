use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use reqwest::header::USER_AGENT;
use reqwest::Client;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::PunsConfig;
use crate::db::Database;
use crate::message::User;
use crate::signal::ChatSender;
use crate::window::{
    AggregateResult, NotificationSink, OpenOutcome, PersistenceSink, RatingRange, TimedWindow,
};

const PUN_USER_AGENT: &str = "juliebot (twitch chat bot)";

#[derive(Clone, Debug, PartialEq)]
pub struct Pun {
    pub pun_id: i64,
    pub text: String,
    pub last_rating: f64,
}

pub struct PunNotifier {
    chat: ChatSender,
    range: RatingRange,
}

impl NotificationSink<i64> for PunNotifier {
    fn already_open(&self, _pun_id: &i64, remaining: Duration) {
        self.chat.say(format!(
            "pun voting is still open for another {} seconds! rate it with !ratepun <{}-{}>",
            remaining.as_secs(),
            self.range.min,
            self.range.max
        ));
    }

    fn closed(&self, result: &AggregateResult<i64>) {
        if result.submission_count > 0 {
            self.chat.say(format!(
                "closing pun voting! -- this pun will be rated {:.1}",
                result.mean
            ));
        } else {
            self.chat.say(format!(
                "nobody liked that one... :( -- this pun will be rated {:.1}",
                result.mean
            ));
        }
    }
}

pub struct PunRatings {
    db: Database,
}

impl PersistenceSink<i64> for PunRatings {
    fn persist(&self, result: &AggregateResult<i64>) -> Result<()> {
        self.db.update_pun_rating(result.subject, result.mean)
    }
}

pub struct Puns {
    window: TimedWindow<i64, PunNotifier, PunRatings>,
    db: Database,
    chat: ChatSender,
    client: Client,
    cfg: PunsConfig,
}

impl Puns {
    pub fn new(cfg: PunsConfig, db: Database, chat: ChatSender) -> Self {
        let range = RatingRange::new(cfg.min_rating, cfg.max_rating);
        let window = TimedWindow::new(
            "puns",
            range,
            PunNotifier {
                chat: chat.clone(),
                range,
            },
            PunRatings { db: db.clone() },
        );

        Puns {
            window,
            db,
            chat,
            client: Client::new(),
            cfg,
        }
    }

    fn vote_window(&self) -> Duration {
        Duration::from_secs(self.cfg.vote_window_secs)
    }

    /// `!pun`: tell a fresh pun and open voting on it.
    pub async fn start_round(&self, requested_by: &User) {
        if self.window.remind(Instant::now()) {
            return;
        }

        match self.fetch_pun().await {
            Ok(Some((pun, is_new))) => self.open_round(&pun, is_new, Instant::now()),
            Ok(None) => self.api_down(requested_by),
            Err(e) => {
                warn!(error = %e, "pun api request failed");
                self.api_down(requested_by);
            }
        }
    }

    fn api_down(&self, requested_by: &User) {
        self.chat.say(format!(
            "sorry @{}! the pun api does not seem to be working right now... BibleThump",
            requested_by.username
        ));
    }

    pub fn open_round(&self, pun: &Pun, is_new: bool, now: Instant) {
        if let OpenOutcome::AlreadyOpen { .. } = self.window.open(pun.pun_id, self.vote_window(), now) {
            return;
        }

        let range = self.window.range();
        self.chat.say(pun.text.clone());
        self.chat.say(format!(
            "please rate my pun using !ratepun <{min}-{max}>, {min} (terrible) to {max} (amazing)! voting will be open for the next {} seconds... <3",
            self.cfg.vote_window_secs,
            min = range.min,
            max = range.max,
        ));

        if !is_new {
            self.chat.say(format!(
                "the last time this pun got picked, it was rated {:.1}",
                pun.last_rating
            ));
        }
    }

    /// `!ratepun <n>`
    pub fn rate(&self, user: &User, rating: Option<i64>) {
        if let Some(rating) = rating {
            self.window.submit(user.participant_id(), rating);
        }
    }

    /// `!banpun`: bans whichever pun is being voted on right now.
    pub fn ban_current(&self, user: &User) {
        if !user.is_elevated() {
            return;
        }
        let Some(pun_id) = self.window.current_subject() else {
            return;
        };

        match self.db.ban_pun(pun_id) {
            Ok(()) => {
                info!(pun_id, by = %user.username, "pun banned");
                self.chat.say("got it, that pun won't be showing up again");
            }
            Err(e) => warn!(pun_id, error = %e, "failed to ban pun"),
        }
    }

    pub fn check_expiry(&self, now: Instant) -> Option<AggregateResult<i64>> {
        self.window.check_expiry(now)
    }

    /// Asks the pun api for a pun that isn't banned, retrying a few times.
    async fn fetch_pun(&self) -> Result<Option<(Pun, bool)>> {
        for attempt in 1..=self.cfg.api_retries {
            let response = self
                .client
                .get(&self.cfg.api_url)
                .header(USER_AGENT, PUN_USER_AGENT)
                .send()
                .await?;

            if response.status().as_u16() != 200 {
                warn!(status = response.status().as_u16(), "pun api returned an error");
                return Ok(None);
            }

            let body: Value = response.json().await?;
            let Some((pun_id, text)) = parse_pun(&body) else {
                bail!("pun api response is missing 'id' or 'pun': {body}");
            };

            let (record, is_new) = self.db.get_or_insert_pun(pun_id)?;
            if record.banned {
                info!(pun_id, attempt, "pun api returned a banned pun, retrying");
                continue;
            }

            let pun = Pun {
                pun_id: record.pun_id,
                text,
                last_rating: record.rating,
            };
            return Ok(Some((pun, is_new)));
        }

        Ok(None)
    }
}

fn parse_pun(body: &Value) -> Option<(i64, String)> {
    let id = match &body["id"] {
        Value::Number(n) => n.as_i64()?,
        Value::String(s) => s.parse().ok()?,
        _ => return None,
    };
    let text = body["pun"].as_str()?.to_string();
    Some((id, text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Group;
    use crate::signal::{drain, BotSignal};
    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn setup() -> (Puns, Database, UnboundedReceiver<BotSignal>) {
        let db = Database::in_memory().unwrap();
        let (chat, rx) = ChatSender::channel();
        let puns = Puns::new(PunsConfig::default(), db.clone(), chat);
        (puns, db, rx)
    }

    fn viewer(name: &str, id: &str) -> User {
        User::new(name.to_string(), id.to_string(), vec![])
    }

    fn pun(pun_id: i64) -> Pun {
        Pun {
            pun_id,
            text: "I used to be a banker, but I lost interest.".to_string(),
            last_rating: 0.0,
        }
    }

    #[test]
    fn votes_are_averaged_and_stored() {
        let (puns, db, mut rx) = setup();
        let start = Instant::now();
        db.get_or_insert_pun(11).unwrap();

        puns.open_round(&pun(11), true, start);
        puns.rate(&viewer("a", "1"), Some(5));
        puns.rate(&viewer("b", "2"), Some(-4));
        puns.rate(&viewer("a", "1"), Some(1));
        puns.rate(&viewer("c", "3"), None);

        let result = puns.check_expiry(start + Duration::from_secs(31)).unwrap();
        assert_eq!(result.mean, 3.0);
        assert_eq!(result.submission_count, 2);

        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2], "closing pun voting! -- this pun will be rated 3.0");

        let (record, _) = db.get_or_insert_pun(11).unwrap();
        assert_eq!(record.rating, 3.0);
    }

    #[test]
    fn known_pun_mentions_last_rating() {
        let (puns, _db, mut rx) = setup();
        let mut known = pun(4);
        known.last_rating = 2.5;

        puns.open_round(&known, false, Instant::now());

        let messages = drain(&mut rx);
        assert_eq!(
            messages.last().unwrap(),
            "the last time this pun got picked, it was rated 2.5"
        );
    }

    #[test]
    fn second_round_while_open_is_not_announced() {
        let (puns, _db, mut rx) = setup();
        let start = Instant::now();

        puns.open_round(&pun(1), true, start);
        drain(&mut rx);

        puns.open_round(&pun(2), true, start + Duration::from_secs(10));
        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 1);
        assert!(messages[0].starts_with("pun voting is still open for another 20 seconds"));
    }

    #[test]
    fn empty_vote_uses_nobody_message() {
        let (puns, db, mut rx) = setup();
        let start = Instant::now();
        db.get_or_insert_pun(8).unwrap();

        puns.open_round(&pun(8), true, start);
        drain(&mut rx);
        puns.check_expiry(start + Duration::from_secs(31));

        assert_eq!(
            drain(&mut rx),
            vec!["nobody liked that one... :( -- this pun will be rated 0.0"]
        );
    }

    #[test]
    fn ban_targets_the_open_pun_only() {
        let (puns, db, _rx) = setup();
        let moderator = User::new("mod".to_string(), "5".to_string(), vec![Group::MODERATOR]);
        db.get_or_insert_pun(21).unwrap();

        // nothing open: no-op
        puns.ban_current(&moderator);

        puns.open_round(&pun(21), true, Instant::now());
        puns.ban_current(&viewer("v", "6"));
        assert!(!db.get_or_insert_pun(21).unwrap().0.banned);

        puns.ban_current(&moderator);
        assert!(db.get_or_insert_pun(21).unwrap().0.banned);
    }

    #[test]
    fn parses_numeric_and_string_ids() {
        assert_eq!(
            parse_pun(&json!({"id": 12, "pun": "a"})),
            Some((12, "a".to_string()))
        );
        assert_eq!(
            parse_pun(&json!({"id": "13", "pun": "b"})),
            Some((13, "b".to_string()))
        );
        assert_eq!(parse_pun(&json!({"pun": "c"})), None);
    }
}
