use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::domain::review::{DashboardEntry, ReviewState};
use crate::usecase::fetch::{AccountError, PullRequestSource};

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefreshError {
    #[error("refresh cancelled")]
    Cancelled,

    #[error("refresh worker failed: {message}")]
    Worker { message: String },
}

enum RefreshEvent {
    Entry(DashboardEntry),
    AccountFailed(AccountError),
    Finished {
        outcome: Result<usize, RefreshError>,
        // Released on the UI thread once the whole cycle has been applied.
        permit: OwnedSemaphorePermit,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pumped {
    Inserted,
    Notice(RefreshNotice),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshNotice {
    AccountFailed(AccountError),
    Finished(Result<usize, RefreshError>),
}

/// Fires every `interval`, measured from the previous firing.
#[derive(Debug)]
pub struct RefreshTimer {
    interval: Duration,
    next_due: Instant,
}

impl RefreshTimer {
    pub fn new(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            next_due: due_after(now, interval),
        }
    }

    pub fn poll(&mut self, now: Instant) -> bool {
        if now < self.next_due {
            return false;
        }
        self.next_due = due_after(now, self.interval);
        true
    }
}

// Intervals `Instant` cannot represent are clamped to about 136 years.
fn due_after(now: Instant, interval: Duration) -> Instant {
    now.checked_add(interval)
        .or_else(|| now.checked_add(Duration::from_secs(u64::from(u32::MAX))))
        .unwrap_or(now)
}

pub struct RefreshEngine {
    runtime: Handle,
    source: Arc<dyn PullRequestSource>,
    in_flight: Arc<Semaphore>,
    events_tx: UnboundedSender<RefreshEvent>,
    events_rx: UnboundedReceiver<RefreshEvent>,
    shutdown: CancellationToken,
    timer: RefreshTimer,
    entries: Vec<DashboardEntry>,
    selected: usize,
}

impl RefreshEngine {
    pub fn new(runtime: Handle, source: Arc<dyn PullRequestSource>, interval: Duration) -> Self {
        let (events_tx, events_rx) = unbounded_channel();
        Self {
            runtime,
            source,
            in_flight: Arc::new(Semaphore::new(1)),
            events_tx,
            events_rx,
            shutdown: CancellationToken::new(),
            timer: RefreshTimer::new(interval, Instant::now()),
            entries: Vec::new(),
            selected: 0,
        }
    }

    /// Returns `false` when a cycle is already running and the trigger is dropped.
    pub fn refresh(&mut self, filter: ReviewState) -> bool {
        let Ok(permit) = Arc::clone(&self.in_flight).try_acquire_owned() else {
            debug!(event = "dash.refresh.trigger_dropped", filter = %filter);
            return false;
        };

        self.entries.clear();
        self.selected = 0;
        info!(event = "dash.refresh.started", filter = %filter);

        let worker = self.runtime.spawn(populate(
            Arc::clone(&self.source),
            filter,
            self.events_tx.clone(),
            self.shutdown.child_token(),
        ));
        let events = self.events_tx.clone();
        self.runtime.spawn(async move {
            let outcome = match worker.await {
                Ok(outcome) => outcome,
                Err(join) => Err(RefreshError::Worker {
                    message: join.to_string(),
                }),
            };
            let _ = events.send(RefreshEvent::Finished { outcome, permit });
        });
        true
    }

    pub fn tick(&mut self, now: Instant, filter: ReviewState) -> bool {
        self.timer.poll(now) && self.refresh(filter)
    }

    /// One event per call, so the caller can repaint after every insert.
    pub fn pump(&mut self) -> Option<Pumped> {
        let event = self.events_rx.try_recv().ok()?;
        Some(match event {
            RefreshEvent::Entry(entry) => {
                self.insert(entry);
                Pumped::Inserted
            }
            RefreshEvent::AccountFailed(err) => Pumped::Notice(RefreshNotice::AccountFailed(err)),
            RefreshEvent::Finished { outcome, permit } => {
                match &outcome {
                    Ok(count) => info!(event = "dash.refresh.completed", entries = count),
                    Err(err) => error!(event = "dash.refresh.failed", error = %err),
                }
                drop(permit);
                Pumped::Notice(RefreshNotice::Finished(outcome))
            }
        })
    }

    fn insert(&mut self, entry: DashboardEntry) {
        self.entries.push(entry);
        self.entries.sort_by(DashboardEntry::display_order);
        self.selected = 0;
    }

    pub fn is_refreshing(&self) -> bool {
        self.in_flight.available_permits() == 0
    }

    pub fn entries(&self) -> &[DashboardEntry] {
        &self.entries
    }

    pub fn selected(&self) -> Option<&DashboardEntry> {
        self.entries.get(self.selected)
    }

    pub fn selected_index(&self) -> usize {
        self.selected
    }

    pub fn select_next(&mut self) {
        if !self.entries.is_empty() {
            self.selected = (self.selected + 1).min(self.entries.len() - 1);
        }
    }

    pub fn select_previous(&mut self) {
        if self.selected > 0 {
            self.selected -= 1;
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

async fn populate(
    source: Arc<dyn PullRequestSource>,
    filter: ReviewState,
    events: UnboundedSender<RefreshEvent>,
    cancel: CancellationToken,
) -> Result<usize, RefreshError> {
    let mut stream = source.fetch(filter);
    let mut produced = 0;
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return Err(RefreshError::Cancelled),
            next = stream.next() => next,
        };
        let event = match next {
            None => return Ok(produced),
            Some(Ok(entry)) => {
                produced += 1;
                RefreshEvent::Entry(entry)
            }
            Some(Err(err)) => RefreshEvent::AccountFailed(err),
        };
        if events.send(event).is_err() {
            return Err(RefreshError::Cancelled);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use futures::stream::{self, BoxStream};
    use tokio::runtime::Runtime;
    use tokio::sync::Notify;

    use super::*;
    use crate::domain::review::fixtures::{entry, review};
    use crate::repo::BackendError;
    use crate::usecase::fetch::FetchItem;

    /// Source that yields a scripted list, optionally waiting for a gate first.
    struct ScriptedSource {
        items: Vec<FetchItem>,
        gate: Option<Arc<Notify>>,
        calls: AtomicUsize,
        filters: Mutex<Vec<ReviewState>>,
        panic: bool,
    }

    impl ScriptedSource {
        fn new(items: Vec<FetchItem>) -> Self {
            Self {
                items,
                gate: None,
                calls: AtomicUsize::new(0),
                filters: Mutex::new(Vec::new()),
                panic: false,
            }
        }
    }

    impl PullRequestSource for ScriptedSource {
        fn fetch(&self, requested: ReviewState) -> BoxStream<'_, FetchItem> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.filters.lock().unwrap().push(requested);
            let gate = self.gate.clone();
            let items = self.items.clone();
            let panic = self.panic;
            stream::once(async move {
                if let Some(gate) = gate {
                    gate.notified().await;
                }
                if panic {
                    panic!("scripted failure");
                }
                stream::iter(items)
            })
            .flatten()
            .boxed()
        }
    }

    fn dated(id: u64, day: u8) -> FetchItem {
        let mut r = review(id, &format!("pr {id}"));
        r.created_at = Some(
            time::Date::from_calendar_date(2024, time::Month::March, day)
                .unwrap()
                .midnight()
                .assume_utc(),
        );
        Ok(entry(0, r))
    }

    fn engine(rt: &Runtime, source: Arc<ScriptedSource>) -> RefreshEngine {
        RefreshEngine::new(rt.handle().clone(), source, DEFAULT_REFRESH_INTERVAL)
    }

    /// Pump like the UI loop does until the cycle reports back.
    fn pump_until_finished(engine: &mut RefreshEngine) -> Vec<RefreshNotice> {
        let mut seen = Vec::new();
        for _ in 0..500 {
            while let Some(pumped) = engine.pump() {
                let Pumped::Notice(notice) = pumped else {
                    continue;
                };
                let done = matches!(notice, RefreshNotice::Finished(_));
                seen.push(notice);
                if done {
                    return seen;
                }
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("refresh did not finish");
    }

    fn ids(engine: &RefreshEngine) -> Vec<u64> {
        engine.entries().iter().map(|e| e.review.id).collect()
    }

    #[test]
    fn entries_are_kept_sorted() {
        let rt = Runtime::new().unwrap();
        let source = Arc::new(ScriptedSource::new(vec![
            dated(1, 20),
            dated(2, 5),
            dated(3, 12),
        ]));
        let mut engine = engine(&rt, source);

        assert!(engine.refresh(ReviewState::Actionable));
        let notices = pump_until_finished(&mut engine);

        assert_eq!(notices, [RefreshNotice::Finished(Ok(3))]);
        assert_eq!(ids(&engine), [2, 3, 1]);
        assert_eq!(engine.selected_index(), 0);
        assert!(!engine.is_refreshing());
    }

    #[test]
    fn every_insert_resorts_and_resets_cursor() {
        let rt = Runtime::new().unwrap();
        let source = Arc::new(ScriptedSource::new(vec![
            dated(1, 20),
            dated(2, 5),
            dated(3, 12),
            dated(4, 1),
        ]));
        let mut engine = engine(&rt, source);
        engine.refresh(ReviewState::Actionable);

        let mut inserted = 0;
        let mut moved = 0;
        for _ in 0..500 {
            match engine.pump() {
                Some(Pumped::Inserted) => {
                    inserted += 1;
                    assert_eq!(engine.entries().len(), inserted);
                    assert!(
                        engine
                            .entries()
                            .windows(2)
                            .all(|w| w[0].display_order(&w[1]).is_lt())
                    );
                    assert_eq!(engine.selected_index(), 0);

                    engine.select_next();
                    if engine.selected_index() > 0 {
                        moved += 1;
                    }
                }
                Some(Pumped::Notice(RefreshNotice::Finished(outcome))) => {
                    assert_eq!(outcome, Ok(4));
                    break;
                }
                Some(Pumped::Notice(other)) => panic!("unexpected notice {other:?}"),
                None => thread::sleep(Duration::from_millis(10)),
            }
        }

        assert_eq!(inserted, 4);
        // Inserts 3 and 4 landed while the cursor sat on row 1.
        assert_eq!(moved, 3);
        assert_eq!(ids(&engine), [4, 2, 3, 1]);
    }

    #[test]
    fn second_trigger_is_dropped_while_in_flight() {
        let rt = Runtime::new().unwrap();
        let gate = Arc::new(Notify::new());
        let source = Arc::new(ScriptedSource {
            gate: Some(Arc::clone(&gate)),
            ..ScriptedSource::new(vec![dated(1, 1)])
        });
        let mut engine = engine(&rt, Arc::clone(&source));

        assert!(engine.refresh(ReviewState::Actionable));
        assert!(engine.is_refreshing());
        assert!(!engine.refresh(ReviewState::Waiting));
        assert!(!engine.refresh(ReviewState::Actionable));

        gate.notify_one();
        let notices = pump_until_finished(&mut engine);

        assert_eq!(notices, [RefreshNotice::Finished(Ok(1))]);
        assert_eq!(ids(&engine), [1]);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            *source.filters.lock().unwrap(),
            [ReviewState::Actionable]
        );

        assert!(engine.refresh(ReviewState::Waiting));
        gate.notify_one();
        pump_until_finished(&mut engine);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn refresh_clears_previous_entries() {
        let rt = Runtime::new().unwrap();
        let gate = Arc::new(Notify::new());
        let source = Arc::new(ScriptedSource {
            gate: Some(Arc::clone(&gate)),
            ..ScriptedSource::new(vec![dated(1, 1)])
        });
        let mut engine = engine(&rt, source);

        engine.refresh(ReviewState::Actionable);
        gate.notify_one();
        pump_until_finished(&mut engine);
        assert_eq!(engine.entries().len(), 1);

        engine.refresh(ReviewState::Actionable);
        assert!(engine.entries().is_empty());
        gate.notify_one();
        pump_until_finished(&mut engine);
        assert_eq!(engine.entries().len(), 1);
    }

    #[test]
    fn account_failures_are_reported_and_cycle_continues() {
        let rt = Runtime::new().unwrap();
        let failure = AccountError {
            account: "broken".to_string(),
            source: BackendError::Connection {
                message: "refused".to_string(),
            },
        };
        let source = Arc::new(ScriptedSource::new(vec![
            Err(failure.clone()),
            dated(4, 2),
        ]));
        let mut engine = engine(&rt, source);

        engine.refresh(ReviewState::Actionable);
        let notices = pump_until_finished(&mut engine);

        assert_eq!(
            notices,
            [
                RefreshNotice::AccountFailed(failure),
                RefreshNotice::Finished(Ok(1)),
            ]
        );
        assert_eq!(ids(&engine), [4]);
    }

    #[test]
    fn worker_panic_ends_the_cycle_and_allows_retry() {
        let rt = Runtime::new().unwrap();
        let source = Arc::new(ScriptedSource {
            panic: true,
            ..ScriptedSource::new(Vec::new())
        });
        let mut engine = engine(&rt, source);

        engine.refresh(ReviewState::Actionable);
        let notices = pump_until_finished(&mut engine);

        assert!(matches!(
            notices.as_slice(),
            [RefreshNotice::Finished(Err(RefreshError::Worker { .. }))]
        ));
        assert!(!engine.is_refreshing());
        assert!(engine.refresh(ReviewState::Actionable));
    }

    #[test]
    fn shutdown_cancels_in_flight_cycle() {
        let rt = Runtime::new().unwrap();
        let source = Arc::new(ScriptedSource {
            gate: Some(Arc::new(Notify::new())),
            ..ScriptedSource::new(vec![dated(1, 1)])
        });
        let mut engine = engine(&rt, source);

        engine.refresh(ReviewState::Actionable);
        engine.shutdown();
        let notices = pump_until_finished(&mut engine);

        assert_eq!(notices, [RefreshNotice::Finished(Err(RefreshError::Cancelled))]);
        assert!(engine.entries().is_empty());
    }

    #[test]
    fn selection_is_clamped() {
        let rt = Runtime::new().unwrap();
        let source = Arc::new(ScriptedSource::new(vec![dated(1, 1), dated(2, 2)]));
        let mut engine = engine(&rt, source);
        engine.refresh(ReviewState::Actionable);
        pump_until_finished(&mut engine);

        engine.select_previous();
        assert_eq!(engine.selected_index(), 0);
        engine.select_next();
        engine.select_next();
        assert_eq!(engine.selected_index(), 1);
        assert_eq!(engine.selected().map(|e| e.review.id), Some(2));
    }

    #[test]
    fn huge_interval_does_not_overflow() {
        let start = Instant::now();
        let mut timer = RefreshTimer::new(Duration::MAX, start);

        assert!(!timer.poll(start + Duration::from_secs(365 * 24 * 3600)));
    }

    #[test]
    fn timer_fires_once_per_interval() {
        let start = Instant::now();
        let mut timer = RefreshTimer::new(Duration::from_secs(60), start);

        assert!(!timer.poll(start + Duration::from_secs(59)));
        assert!(timer.poll(start + Duration::from_secs(60)));
        assert!(!timer.poll(start + Duration::from_secs(61)));
        assert!(timer.poll(start + Duration::from_secs(121)));
    }
}
