//! The polling loop.
//!
//! Each tick:
//! 1. Reload the owner's search parameters from the store
//! 2. If paused, skip straight to sleeping
//! 3. Otherwise search, then email narrative outcomes and persist structured ones
//! 4. Sleep for the configured interval
//!
//! [`PollingLoop::tick`] does steps 1 to 3 and reports the sleep it wants;
//! [`PollingLoop::run`] repeats ticks and sleeps until cancelled or until a
//! tick fails under the fatal failure policy.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::agent::{JobSearch, SearchOutcome};
use crate::backoff::BackoffConfig;
use crate::config::ConfigError;
use crate::jobs::JobSink;
use crate::marketplace::SearchError;
use crate::notify::Notifier;
use crate::search_params::{load_search_params, IntervalUnit, SearchParams};
use crate::store::{SharedStore, StoreError};

/// Lower bound on the sleep between ticks, so a zero interval cannot spin
/// against the store.
pub const MIN_SLEEP: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum LoopError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Search(#[from] SearchError),
}

/// What the loop does when a tick fails.
#[derive(Debug, Clone, PartialEq)]
pub enum FailurePolicy {
    /// Stop the loop on the first failed tick.
    Fatal,
    /// Log the failure and try again after a growing delay.
    /// Configuration errors remain fatal.
    Backoff(BackoffConfig),
}

/// State carried from one tick to the next.
#[derive(Debug, Clone)]
pub struct LoopState {
    /// Fixed for the lifetime of the loop
    pub owner: String,
    /// Parameters loaded by the most recent tick
    pub params: SearchParams,
    /// Ticks started
    pub ticks: u64,
    /// Failed ticks since the last successful one
    pub consecutive_failures: u32,
}

impl LoopState {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            params: SearchParams::default(),
            ticks: 0,
            consecutive_failures: 0,
        }
    }
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub paused: bool,
    pub searched: bool,
    /// Sleep requested before the next tick
    pub sleep: Duration,
    pub outcomes: usize,
    /// Emails delivered
    pub notified: usize,
    /// Job ids written
    pub persisted: Vec<String>,
    /// Jobs without an id
    pub skipped: usize,
    /// Job ids whose write failed
    pub failed: Vec<String>,
}

pub struct PollingLoop {
    store: SharedStore,
    search: Arc<dyn JobSearch>,
    notifier: Arc<dyn Notifier>,
    interval_unit: IntervalUnit,
    policy: FailurePolicy,
    state: LoopState,
}

impl PollingLoop {
    pub fn new(
        owner: impl Into<String>,
        store: SharedStore,
        search: Arc<dyn JobSearch>,
        notifier: Arc<dyn Notifier>,
        interval_unit: IntervalUnit,
        policy: FailurePolicy,
    ) -> Self {
        Self {
            store,
            search,
            notifier,
            interval_unit,
            policy,
            state: LoopState::new(owner),
        }
    }

    pub fn state(&self) -> &LoopState {
        &self.state
    }

    /// Run one tick without sleeping.
    pub async fn tick(&mut self) -> Result<TickReport, LoopError> {
        self.state.ticks += 1;
        let params = load_search_params(self.store.as_ref(), &self.state.owner).await?;
        self.state.params = params.clone();

        let mut report = TickReport {
            sleep: params.sleep_duration(self.interval_unit),
            ..Default::default()
        };

        if params.paused {
            tracing::debug!("Agent paused, skipping search");
            report.paused = true;
            return Ok(report);
        }

        if params.term.is_empty() {
            tracing::warn!("No search term configured for {}, skipping search", self.state.owner);
            return Ok(report);
        }

        tracing::debug!(tick = self.state.ticks, "Searching for {:?}", params.term);
        report.searched = true;
        let outcomes = self.search.search(&params.term).await?;
        report.outcomes = outcomes.len();

        let sink = JobSink::new(self.store.as_ref());
        for outcome in outcomes {
            match outcome {
                SearchOutcome::Narrative { text } => {
                    tracing::info!("{}", text);
                    if self.deliver(params.email.as_deref(), &text).await {
                        report.notified += 1;
                    }
                }
                SearchOutcome::Structured { projects } => {
                    tracing::info!("Persisting {} projects", projects.len());
                    let summary = sink.persist(&projects, &self.state.owner).await;
                    report.persisted.extend(summary.persisted);
                    report.skipped += summary.skipped;
                    report.failed.extend(summary.failed);
                }
            }
        }

        Ok(report)
    }

    /// Best-effort notification. Returns whether a message was delivered.
    async fn deliver(&self, recipient: Option<&str>, message: &str) -> bool {
        let Some(recipient) = recipient else {
            tracing::debug!("No email configured, notification suppressed");
            return false;
        };
        match self.notifier.notify(recipient, message).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Failed to notify {}: {}", recipient, e);
                false
            }
        }
    }

    /// Tick and sleep until `cancel` fires or a tick fails fatally.
    ///
    /// Every sleep is at least [`MIN_SLEEP`], so an interval of zero or a
    /// missing interval waits one second between ticks.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<(), LoopError> {
        tracing::info!("Starting autonomous mode for {}", self.state.owner);

        loop {
            let delay = match self.tick().await {
                Ok(report) => {
                    self.state.consecutive_failures = 0;
                    tracing::debug!(?report, "Tick {} complete", self.state.ticks);
                    report.sleep
                }
                Err(e) => self.on_failure(e)?,
            };

            let delay = delay.max(MIN_SLEEP);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!("Polling loop cancelled after {} ticks", self.state.ticks);
                    return Ok(());
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Apply the failure policy: the delay before the next tick, or the error.
    fn on_failure(&mut self, error: LoopError) -> Result<Duration, LoopError> {
        let backoff = match &self.policy {
            FailurePolicy::Backoff(backoff) if !matches!(error, LoopError::Config(_)) => {
                backoff.clone()
            }
            _ => {
                tracing::error!("Error: {}", error);
                return Err(error);
            }
        };

        self.state.consecutive_failures = self.state.consecutive_failures.saturating_add(1);
        let delay = backoff
            .cooldown_for(self.state.consecutive_failures)
            .max(self.state.params.sleep_duration(self.interval_unit));
        tracing::error!(
            "Tick {} failed ({} in a row): {}, retrying in {:?}",
            self.state.ticks,
            self.state.consecutive_failures,
            error,
            delay
        );
        Ok(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobRecord;
    use crate::notify::NotifyError;
    use crate::store::{
        Document, DocumentStore, InMemoryStore, JOBS_COLLECTION, PROFILE_COLLECTION,
        SEARCH_COLLECTION,
    };
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, recipient: &str, message: &str) -> Result<(), NotifyError> {
            if self.fail {
                return Err(NotifyError::Status {
                    status: 500,
                    body: "mail down".to_string(),
                });
            }
            self.sent
                .lock()
                .unwrap()
                .push((recipient.to_string(), message.to_string()));
            Ok(())
        }
    }

    type Script = Box<dyn Fn(usize) -> Result<Vec<SearchOutcome>, SearchError> + Send + Sync>;

    /// Answers each call with `script(call_index)` and can cancel a token
    /// once a number of calls have been made.
    struct ScriptedSearch {
        calls: AtomicUsize,
        terms: Mutex<Vec<String>>,
        script: Script,
        cancel_after: Option<(usize, CancellationToken)>,
    }

    impl ScriptedSearch {
        fn new(script: Script) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                terms: Mutex::new(Vec::new()),
                script,
                cancel_after: None,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl JobSearch for ScriptedSearch {
        async fn search(&self, term: &str) -> Result<Vec<SearchOutcome>, SearchError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.terms.lock().unwrap().push(term.to_string());
            if let Some((limit, token)) = &self.cancel_after {
                if call + 1 >= *limit {
                    token.cancel();
                }
            }
            (self.script)(call)
        }
    }

    fn doc(value: Value) -> Document {
        value.as_object().cloned().expect("object")
    }

    fn projects(ids: &[&str]) -> SearchOutcome {
        SearchOutcome::Structured {
            projects: ids
                .iter()
                .map(|id| JobRecord::from_value(json!({"id": id, "title": format!("Job {}", id)})))
                .collect(),
        }
    }

    fn narrative(text: &str) -> SearchOutcome {
        SearchOutcome::Narrative {
            text: text.to_string(),
        }
    }

    async fn seeded_store(search: Value) -> InMemoryStore {
        let store = InMemoryStore::new();
        store
            .set(PROFILE_COLLECTION, "u1", doc(json!({"email": "a@b.com"})))
            .await
            .expect("profile");
        store
            .set(SEARCH_COLLECTION, "u1", doc(search))
            .await
            .expect("search");
        store
    }

    fn polling_loop(
        store: &InMemoryStore,
        search: Arc<ScriptedSearch>,
        notifier: Arc<RecordingNotifier>,
        policy: FailurePolicy,
    ) -> PollingLoop {
        PollingLoop::new(
            "u1",
            Arc::new(store.clone()),
            search,
            notifier,
            IntervalUnit::Seconds,
            policy,
        )
    }

    #[tokio::test]
    async fn structured_outcome_persists_jobs_without_email() {
        let store =
            seeded_store(json!({"terms": "logo design", "interval": 60, "paused": false})).await;
        let search = Arc::new(ScriptedSearch::new(Box::new(|_| Ok(vec![projects(&["p1", "p2"])]))));
        let notifier = Arc::new(RecordingNotifier::default());
        let mut poller = polling_loop(&store, search.clone(), notifier.clone(), FailurePolicy::Fatal);

        let report = poller.tick().await.expect("tick");

        assert_eq!(report.persisted, vec!["p1".to_string(), "p2".to_string()]);
        assert_eq!(report.sleep, Duration::from_secs(60));
        assert_eq!(search.terms.lock().unwrap().as_slice(), ["logo design".to_string()]);
        assert!(notifier.sent.lock().unwrap().is_empty());
        for id in ["p1", "p2"] {
            let job = store.get(JOBS_COLLECTION, id).await.expect("get").expect("job");
            assert_eq!(job.get("owner"), Some(&json!("u1")));
        }
    }

    #[tokio::test]
    async fn narrative_outcome_sends_one_email_and_persists_nothing() {
        let store =
            seeded_store(json!({"terms": "logo design", "interval": 60, "paused": false})).await;
        let search = Arc::new(ScriptedSearch::new(Box::new(|_| Ok(vec![narrative("No matches found")]))));
        let notifier = Arc::new(RecordingNotifier::default());
        let mut poller = polling_loop(&store, search, notifier.clone(), FailurePolicy::Fatal);

        let report = poller.tick().await.expect("tick");

        assert_eq!(report.notified, 1);
        assert_eq!(
            notifier.sent.lock().unwrap().as_slice(),
            [("a@b.com".to_string(), "No matches found".to_string())]
        );
        assert!(store.ids(JOBS_COLLECTION).await.is_empty());
    }

    #[tokio::test]
    async fn paused_tick_skips_search_but_still_sleeps() {
        let store = seeded_store(json!({"terms": "logo", "interval": 45, "paused": true})).await;
        let search = Arc::new(ScriptedSearch::new(Box::new(|_| Ok(vec![projects(&["p1"])]))));
        let mut poller = polling_loop(
            &store,
            search.clone(),
            Arc::new(RecordingNotifier::default()),
            FailurePolicy::Fatal,
        );

        let report = poller.tick().await.expect("tick");

        assert!(report.paused);
        assert!(!report.searched);
        assert_eq!(report.sleep, Duration::from_secs(45));
        assert_eq!(search.calls(), 0);
    }

    #[tokio::test]
    async fn pausing_between_ticks_takes_effect_immediately() {
        let store = seeded_store(json!({"terms": "logo", "interval": 1, "paused": false})).await;
        let search = Arc::new(ScriptedSearch::new(Box::new(|_| Ok(vec![]))));
        let mut poller = polling_loop(
            &store,
            search.clone(),
            Arc::new(RecordingNotifier::default()),
            FailurePolicy::Fatal,
        );

        poller.tick().await.expect("first tick");
        assert_eq!(search.calls(), 1);

        store
            .set(SEARCH_COLLECTION, "u1", doc(json!({"terms": "logo", "interval": 1, "paused": true})))
            .await
            .expect("pause");
        let report = poller.tick().await.expect("second tick");

        assert!(report.paused);
        assert_eq!(search.calls(), 1);
        assert!(poller.state().params.paused);
    }

    #[tokio::test]
    async fn repeated_ticks_do_not_duplicate_jobs() {
        let store = seeded_store(json!({"terms": "logo", "interval": 1, "paused": false})).await;
        let search = Arc::new(ScriptedSearch::new(Box::new(|_| Ok(vec![projects(&["p1", "p2"])]))));
        let mut poller = polling_loop(
            &store,
            search,
            Arc::new(RecordingNotifier::default()),
            FailurePolicy::Fatal,
        );

        poller.tick().await.expect("first tick");
        let first = store.ids(JOBS_COLLECTION).await;
        poller.tick().await.expect("second tick");

        assert_eq!(store.ids(JOBS_COLLECTION).await, first);
        assert_eq!(first, vec!["p1".to_string(), "p2".to_string()]);
    }

    #[tokio::test]
    async fn id_less_projects_are_skipped() {
        let store = seeded_store(json!({"terms": "logo", "interval": 1})).await;
        let search = Arc::new(ScriptedSearch::new(Box::new(|_| {
            Ok(vec![SearchOutcome::Structured {
                projects: vec![
                    JobRecord::from_value(json!({"title": "anonymous"})),
                    JobRecord::from_value(json!({"id": "p9"})),
                ],
            }])
        })));
        let mut poller = polling_loop(
            &store,
            search,
            Arc::new(RecordingNotifier::default()),
            FailurePolicy::Fatal,
        );

        let report = poller.tick().await.expect("tick");
        assert_eq!(report.skipped, 1);
        assert_eq!(store.ids(JOBS_COLLECTION).await, vec!["p9".to_string()]);
    }

    #[tokio::test]
    async fn notification_failure_does_not_fail_the_tick() {
        let store = seeded_store(json!({"terms": "logo", "interval": 1})).await;
        let search = Arc::new(ScriptedSearch::new(Box::new(|_| {
            Ok(vec![narrative("Found jobs"), projects(&["p1"])])
        })));
        let notifier = Arc::new(RecordingNotifier {
            fail: true,
            ..Default::default()
        });
        let mut poller = polling_loop(&store, search, notifier, FailurePolicy::Fatal);

        let report = poller.tick().await.expect("tick");
        assert_eq!(report.notified, 0);
        assert_eq!(report.persisted, vec!["p1".to_string()]);
    }

    #[tokio::test]
    async fn missing_email_suppresses_notification() {
        let store = InMemoryStore::new();
        store
            .set(SEARCH_COLLECTION, "u1", doc(json!({"terms": "logo"})))
            .await
            .expect("search");
        let search = Arc::new(ScriptedSearch::new(Box::new(|_| Ok(vec![narrative("hello")]))));
        let notifier = Arc::new(RecordingNotifier::default());
        let mut poller = polling_loop(&store, search, notifier.clone(), FailurePolicy::Fatal);

        let report = poller.tick().await.expect("tick");
        assert_eq!(report.notified, 0);
        assert_eq!(report.sleep, Duration::ZERO);
        assert!(notifier.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_term_skips_search() {
        let store = seeded_store(json!({"interval": 2})).await;
        let search = Arc::new(ScriptedSearch::new(Box::new(|_| Ok(vec![]))));
        let mut poller = polling_loop(
            &store,
            search.clone(),
            Arc::new(RecordingNotifier::default()),
            FailurePolicy::Fatal,
        );

        let report = poller.tick().await.expect("tick");
        assert!(!report.searched);
        assert_eq!(search.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_policy_stops_on_search_error() {
        let store = seeded_store(json!({"terms": "logo", "interval": 1})).await;
        let search = Arc::new(ScriptedSearch::new(Box::new(|_| {
            Err(SearchError::Status {
                status: 503,
                body: "down".to_string(),
            })
        })));
        let mut poller = polling_loop(
            &store,
            search.clone(),
            Arc::new(RecordingNotifier::default()),
            FailurePolicy::Fatal,
        );

        let err = poller.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, LoopError::Search(SearchError::Status { status: 503, .. })));
        assert_eq!(search.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_policy_keeps_polling_after_search_error() {
        let store = seeded_store(json!({"terms": "logo", "interval": 1})).await;
        let cancel = CancellationToken::new();
        let mut search = ScriptedSearch::new(Box::new(|call| {
            if call == 0 {
                Err(SearchError::Malformed("garbage".to_string()))
            } else {
                Ok(vec![projects(&["p1"])])
            }
        }));
        search.cancel_after = Some((2, cancel.clone()));
        let search = Arc::new(search);
        let mut poller = polling_loop(
            &store,
            search.clone(),
            Arc::new(RecordingNotifier::default()),
            FailurePolicy::Backoff(BackoffConfig::default()),
        );

        let started = tokio::time::Instant::now();
        poller.run(cancel).await.expect("cancelled cleanly");

        assert_eq!(search.calls(), 2);
        assert_eq!(store.ids(JOBS_COLLECTION).await, vec!["p1".to_string()]);
        assert_eq!(poller.state().consecutive_failures, 0);
        // One backoff sleep of base_delay sits between the two ticks.
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn paused_loop_sleeps_interval_between_reloads() {
        let store = seeded_store(json!({"terms": "logo", "interval": 30, "paused": true})).await;
        let search = Arc::new(ScriptedSearch::new(Box::new(|_| Ok(vec![]))));
        let cancel = CancellationToken::new();
        let mut poller = polling_loop(
            &store,
            search.clone(),
            Arc::new(RecordingNotifier::default()),
            FailurePolicy::Fatal,
        );

        let canceller = cancel.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(95)).await;
            canceller.cancel();
        });

        poller.run(cancel).await.expect("cancelled cleanly");
        handle.await.expect("canceller");

        // Ticks at t=0, 30, 60 and 90; cancelled while sleeping towards 120.
        assert_eq!(poller.state().ticks, 4);
        assert_eq!(search.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_sleeps_the_minimum_between_ticks() {
        let store = seeded_store(json!({"terms": "logo", "paused": true})).await;
        let cancel = CancellationToken::new();
        let mut poller = polling_loop(
            &store,
            Arc::new(ScriptedSearch::new(Box::new(|_| Ok(vec![])))),
            Arc::new(RecordingNotifier::default()),
            FailurePolicy::Fatal,
        );

        let canceller = cancel.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2500)).await;
            canceller.cancel();
        });

        poller.run(cancel).await.expect("cancelled cleanly");
        handle.await.expect("canceller");

        // Ticks at t=0, 1 and 2 with no interval stored.
        assert_eq!(poller.state().ticks, 3);
    }

    #[tokio::test]
    async fn config_error_is_fatal_even_with_backoff() {
        let store = InMemoryStore::new();
        let mut poller = PollingLoop::new(
            "",
            Arc::new(store),
            Arc::new(ScriptedSearch::new(Box::new(|_| Ok(vec![])))),
            Arc::new(RecordingNotifier::default()),
            IntervalUnit::Seconds,
            FailurePolicy::Backoff(BackoffConfig::default()),
        );

        let err = poller.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, LoopError::Config(_)));
    }
}
