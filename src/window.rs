use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

/// Inclusive range every submitted value gets clamped into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RatingRange {
    pub min: i64,
    pub max: i64,
}

impl RatingRange {
    /// Falls back to 1-5 when the bounds are unusable.
    pub fn new(min: i64, max: i64) -> Self {
        if min >= max {
            warn!(min, max, "rating range is empty or inverted, using 1-5");
            return RatingRange { min: 1, max: 5 };
        }
        RatingRange { min, max }
    }

    pub fn clamp(&self, value: i64) -> i64 {
        value.clamp(self.min, self.max)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AggregateResult<S> {
    pub subject: S,
    pub mean: f64,
    pub submission_count: usize,
}

/// Receives status updates for a window. Implementations format and send chat text.
pub trait NotificationSink<S> {
    fn already_open(&self, subject: &S, remaining: Duration);
    fn closed(&self, result: &AggregateResult<S>);
}

/// Stores the final result of a window.
pub trait PersistenceSink<S> {
    fn persist(&self, result: &AggregateResult<S>) -> anyhow::Result<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenOutcome {
    Opened,
    AlreadyOpen { remaining: Duration },
}

#[derive(Default)]
struct Submissions {
    values: HashMap<String, i64>,
}

impl Submissions {
    /// First submission per participant wins.
    fn insert_first(&mut self, participant: &str, value: i64) -> bool {
        if self.values.contains_key(participant) {
            return false;
        }
        self.values.insert(participant.to_string(), value);
        true
    }

    fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        let total: i64 = self.values.values().sum();
        total as f64 / self.values.len() as f64
    }

    fn len(&self) -> usize {
        self.values.len()
    }

    fn clear(&mut self) {
        self.values.clear();
    }
}

enum WindowState<S> {
    Closed,
    Open {
        subject: S,
        opened_at: Instant,
        duration: Duration,
    },
}

struct WindowInner<S> {
    state: WindowState<S>,
    submissions: Submissions,
}

impl<S: Clone> WindowInner<S> {
    fn current_subject(&self) -> Option<S> {
        match &self.state {
            WindowState::Open { subject, .. } => Some(subject.clone()),
            WindowState::Closed => None,
        }
    }

    fn remaining(&self, now: Instant) -> Option<Duration> {
        match &self.state {
            WindowState::Open {
                opened_at,
                duration,
                ..
            } => Some(duration.saturating_sub(now.saturating_duration_since(*opened_at))),
            WindowState::Closed => None,
        }
    }
}

/// A bounded-duration vote: one value per participant, averaged when the
/// window expires. Expiry is driven by an external ticker calling
/// [`TimedWindow::check_expiry`].
///
/// The lock only covers the in-memory transition; sinks are always invoked
/// after it has been released.
pub struct TimedWindow<S, N, P> {
    name: &'static str,
    range: RatingRange,
    inner: Mutex<WindowInner<S>>,
    notifier: N,
    persistence: P,
}

impl<S, N, P> TimedWindow<S, N, P>
where
    S: Clone + std::fmt::Debug,
    N: NotificationSink<S>,
    P: PersistenceSink<S>,
{
    pub fn new(name: &'static str, range: RatingRange, notifier: N, persistence: P) -> Self {
        TimedWindow {
            name,
            range,
            inner: Mutex::new(WindowInner {
                state: WindowState::Closed,
                submissions: Submissions::default(),
            }),
            notifier,
            persistence,
        }
    }

    fn lock(&self) -> MutexGuard<'_, WindowInner<S>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn range(&self) -> RatingRange {
        self.range
    }

    pub fn open(&self, subject: S, duration: Duration, now: Instant) -> OpenOutcome {
        let mut inner = self.lock();

        if let Some(current) = inner.current_subject() {
            let remaining = inner.remaining(now).unwrap_or_default();
            drop(inner);

            info!(window = self.name, subject = ?current, ?remaining, "window already open, ignoring open request");
            self.notifier.already_open(&current, remaining);
            return OpenOutcome::AlreadyOpen { remaining };
        }

        info!(window = self.name, subject = ?subject, ?duration, "opening window");
        inner.submissions.clear();
        inner.state = WindowState::Open {
            subject,
            opened_at: now,
            duration,
        };
        OpenOutcome::Opened
    }

    /// Sends the "already open" notice again. Returns false when closed.
    pub fn remind(&self, now: Instant) -> bool {
        let inner = self.lock();
        let Some(subject) = inner.current_subject() else {
            return false;
        };
        let remaining = inner.remaining(now).unwrap_or_default();
        drop(inner);

        self.notifier.already_open(&subject, remaining);
        true
    }

    /// Returns true when the value was counted.
    pub fn submit(&self, participant: &str, raw_value: i64) -> bool {
        let mut inner = self.lock();
        if matches!(inner.state, WindowState::Closed) {
            return false;
        }

        let value = self.range.clamp(raw_value);
        let accepted = inner.submissions.insert_first(participant, value);
        if accepted {
            debug!(window = self.name, participant, raw_value, value, "submission recorded");
        } else {
            debug!(window = self.name, participant, "duplicate submission dropped");
        }
        accepted
    }

    /// Closes the window once `now - opened_at` exceeds its duration. The
    /// result is returned only from the call that performed the close.
    pub fn check_expiry(&self, now: Instant) -> Option<AggregateResult<S>> {
        let mut inner = self.lock();

        let expired = match &inner.state {
            WindowState::Open {
                opened_at,
                duration,
                ..
            } => now.saturating_duration_since(*opened_at) > *duration,
            WindowState::Closed => false,
        };
        if !expired {
            return None;
        }

        let WindowState::Open { subject, .. } =
            std::mem::replace(&mut inner.state, WindowState::Closed)
        else {
            return None;
        };
        let result = AggregateResult {
            subject,
            mean: inner.submissions.mean(),
            submission_count: inner.submissions.len(),
        };
        inner.submissions.clear();
        drop(inner);

        info!(
            window = self.name,
            subject = ?result.subject,
            mean = result.mean,
            votes = result.submission_count,
            "window closed"
        );
        self.notifier.closed(&result);
        if let Err(e) = self.persistence.persist(&result) {
            warn!(window = self.name, subject = ?result.subject, error = %e, "failed to persist window result");
        }

        Some(result)
    }

    pub fn current_subject(&self) -> Option<S> {
        self.lock().current_subject()
    }
}

#[cfg(test)]
impl<S, N, P> TimedWindow<S, N, P>
where
    S: Clone + std::fmt::Debug,
    N: NotificationSink<S>,
    P: PersistenceSink<S>,
{
    fn is_open(&self) -> bool {
        matches!(self.lock().state, WindowState::Open { .. })
    }

    fn remaining(&self, now: Instant) -> Option<Duration> {
        self.lock().remaining(now)
    }

    fn submission_count(&self) -> usize {
        self.lock().submissions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use std::sync::{Arc, OnceLock};

    #[derive(Debug, Clone, PartialEq)]
    enum Notice {
        AlreadyOpen(u32, Duration),
        Closed(AggregateResult<u32>),
    }

    #[derive(Clone, Default)]
    struct RecordingNotifier {
        notices: Arc<Mutex<Vec<Notice>>>,
    }

    impl NotificationSink<u32> for RecordingNotifier {
        fn already_open(&self, subject: &u32, remaining: Duration) {
            self.notices
                .lock()
                .unwrap()
                .push(Notice::AlreadyOpen(*subject, remaining));
        }

        fn closed(&self, result: &AggregateResult<u32>) {
            self.notices
                .lock()
                .unwrap()
                .push(Notice::Closed(result.clone()));
        }
    }

    #[derive(Clone, Default)]
    struct RecordingStore {
        saved: Arc<Mutex<Vec<(u32, f64)>>>,
        fail: bool,
    }

    impl PersistenceSink<u32> for RecordingStore {
        fn persist(&self, result: &AggregateResult<u32>) -> anyhow::Result<()> {
            self.saved
                .lock()
                .unwrap()
                .push((result.subject, result.mean));
            if self.fail {
                bail!("storage unavailable");
            }
            Ok(())
        }
    }

    fn window(
        min: i64,
        max: i64,
    ) -> (
        TimedWindow<u32, RecordingNotifier, RecordingStore>,
        RecordingNotifier,
        RecordingStore,
    ) {
        let notifier = RecordingNotifier::default();
        let store = RecordingStore::default();
        let window = TimedWindow::new(
            "test",
            RatingRange::new(min, max),
            notifier.clone(),
            store.clone(),
        );
        (window, notifier, store)
    }

    #[test]
    fn duplicate_and_out_of_range_votes_are_handled() {
        let (window, notifier, store) = window(1, 10);
        let start = Instant::now();

        assert_eq!(window.open(42, Duration::from_secs(30), start), OpenOutcome::Opened);
        assert!(window.submit("p1", 7));
        assert!(window.submit("p2", 15));
        assert!(!window.submit("p1", 2));

        assert!(window.check_expiry(start + Duration::from_secs(20)).is_none());
        let result = window.check_expiry(start + Duration::from_secs(31)).unwrap();

        assert_eq!(result.subject, 42);
        assert_eq!(result.mean, 8.5);
        assert_eq!(result.submission_count, 2);
        assert_eq!(*store.saved.lock().unwrap(), vec![(42, 8.5)]);
        assert_eq!(notifier.notices.lock().unwrap().len(), 1);
        assert!(!window.is_open());
    }

    #[test]
    fn empty_window_closes_with_zero_mean() {
        let (window, notifier, store) = window(1, 5);
        let start = Instant::now();

        window.open(7, Duration::from_secs(10), start);
        let result = window.check_expiry(start + Duration::from_secs(11)).unwrap();

        assert_eq!(result.mean, 0.0);
        assert_eq!(result.submission_count, 0);
        assert_eq!(
            *notifier.notices.lock().unwrap(),
            vec![Notice::Closed(AggregateResult {
                subject: 7,
                mean: 0.0,
                submission_count: 0
            })]
        );
        assert_eq!(store.saved.lock().unwrap().len(), 1);
    }

    #[test]
    fn reopening_while_open_keeps_the_current_window() {
        let (window, notifier, _store) = window(1, 5);
        let start = Instant::now();

        window.open(1, Duration::from_secs(30), start);
        window.submit("p1", 4);

        let outcome = window.open(2, Duration::from_secs(60), start + Duration::from_secs(10));
        assert_eq!(
            outcome,
            OpenOutcome::AlreadyOpen {
                remaining: Duration::from_secs(20)
            }
        );
        assert_eq!(window.current_subject(), Some(1));
        assert_eq!(window.submission_count(), 1);
        assert_eq!(
            window.remaining(start + Duration::from_secs(10)),
            Some(Duration::from_secs(20))
        );
        assert_eq!(
            *notifier.notices.lock().unwrap(),
            vec![Notice::AlreadyOpen(1, Duration::from_secs(20))]
        );

        // still expires on the original schedule
        let result = window.check_expiry(start + Duration::from_secs(31)).unwrap();
        assert_eq!(result.subject, 1);
        assert_eq!(result.mean, 4.0);
    }

    #[test]
    fn submit_while_closed_is_ignored() {
        let (window, notifier, store) = window(1, 5);

        assert!(!window.submit("p1", 5));
        assert!(!window.is_open());
        assert!(window.check_expiry(Instant::now()).is_none());
        assert!(notifier.notices.lock().unwrap().is_empty());
        assert!(store.saved.lock().unwrap().is_empty());
    }

    #[test]
    fn close_side_effects_fire_once() {
        let (window, notifier, store) = window(1, 5);
        let start = Instant::now();

        window.open(3, Duration::from_secs(5), start);
        window.submit("p1", 3);

        let mut closes = 0;
        for secs in 6..12 {
            if window.check_expiry(start + Duration::from_secs(secs)).is_some() {
                closes += 1;
            }
        }

        assert_eq!(closes, 1);
        assert_eq!(notifier.notices.lock().unwrap().len(), 1);
        assert_eq!(store.saved.lock().unwrap().len(), 1);
    }

    type SharedWindow = Arc<TimedWindow<u32, CallbackSink, CallbackSink>>;

    /// Sinks that call back into the window they belong to.
    #[derive(Clone, Default)]
    struct CallbackSink {
        window: Arc<OnceLock<SharedWindow>>,
        seen: Arc<Mutex<Vec<(&'static str, Option<u32>)>>>,
    }

    impl CallbackSink {
        fn record(&self, event: &'static str) {
            if let Some(window) = self.window.get() {
                self.seen
                    .lock()
                    .unwrap()
                    .push((event, window.current_subject()));
            }
        }
    }

    impl NotificationSink<u32> for CallbackSink {
        fn already_open(&self, _subject: &u32, _remaining: Duration) {
            self.record("already_open");
        }

        fn closed(&self, result: &AggregateResult<u32>) {
            self.record("closed");
            if let Some(window) = self.window.get() {
                window.open(result.subject + 1, Duration::from_secs(10), Instant::now());
            }
        }
    }

    impl PersistenceSink<u32> for CallbackSink {
        fn persist(&self, _result: &AggregateResult<u32>) -> anyhow::Result<()> {
            self.record("persist");
            Ok(())
        }
    }

    #[test]
    fn sinks_run_without_the_lock_held() {
        let sink = CallbackSink::default();
        let window: SharedWindow = Arc::new(TimedWindow::new(
            "test",
            RatingRange::new(1, 5),
            sink.clone(),
            sink.clone(),
        ));
        assert!(sink.window.set(window.clone()).is_ok());
        let start = Instant::now();

        window.open(1, Duration::from_secs(5), start);
        window.open(9, Duration::from_secs(5), start);
        assert!(window.remind(start));

        let result = window.check_expiry(start + Duration::from_secs(6)).unwrap();
        assert_eq!(result.subject, 1);
        assert_eq!(window.current_subject(), Some(2));

        assert_eq!(
            *sink.seen.lock().unwrap(),
            vec![
                ("already_open", Some(1)),
                ("already_open", Some(1)),
                ("closed", None),
                ("persist", Some(2)),
            ]
        );
    }

    #[test]
    fn window_stays_open_at_exact_deadline() {
        let (window, _notifier, _store) = window(1, 5);
        let start = Instant::now();

        window.open(3, Duration::from_secs(5), start);
        assert!(window.check_expiry(start + Duration::from_secs(5)).is_none());
        assert!(window.is_open());
    }

    #[test]
    fn persistence_failure_still_closes_the_window() {
        let notifier = RecordingNotifier::default();
        let store = RecordingStore {
            fail: true,
            ..Default::default()
        };
        let window = TimedWindow::new("test", RatingRange::new(1, 5), notifier.clone(), store.clone());
        let start = Instant::now();

        window.open(9, Duration::from_secs(1), start);
        window.submit("p1", 2);
        assert!(window.check_expiry(start + Duration::from_secs(2)).is_some());

        assert!(!window.is_open());
        assert_eq!(store.saved.lock().unwrap().len(), 1);
        assert!(window.check_expiry(start + Duration::from_secs(3)).is_none());
        assert_eq!(store.saved.lock().unwrap().len(), 1);
    }

    #[test]
    fn new_window_starts_with_empty_submissions() {
        let (window, _notifier, _store) = window(1, 5);
        let start = Instant::now();

        window.open(1, Duration::from_secs(1), start);
        window.submit("p1", 5);
        window.check_expiry(start + Duration::from_secs(2));

        window.open(2, Duration::from_secs(1), start + Duration::from_secs(3));
        assert_eq!(window.submission_count(), 0);
        assert!(window.submit("p1", 1));
    }

    #[test]
    fn remind_only_notifies_while_open() {
        let (window, notifier, _store) = window(1, 5);
        let start = Instant::now();

        assert!(!window.remind(start));
        window.open(5, Duration::from_secs(30), start);
        assert!(window.remind(start + Duration::from_secs(40)));
        assert_eq!(
            *notifier.notices.lock().unwrap(),
            vec![Notice::AlreadyOpen(5, Duration::ZERO)]
        );
    }

    #[test]
    fn clamps_into_range() {
        let range = RatingRange::new(1, 5);
        assert_eq!(range.clamp(-3), 1);
        assert_eq!(range.clamp(3), 3);
        assert_eq!(range.clamp(99), 5);
    }

    #[test]
    fn inverted_range_falls_back() {
        assert_eq!(RatingRange::new(5, 5), RatingRange { min: 1, max: 5 });
        assert_eq!(RatingRange::new(10, 2), RatingRange { min: 1, max: 5 });
    }
}
