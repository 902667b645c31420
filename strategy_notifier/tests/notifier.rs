use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::stream::{self, StreamExt};
use strategy_notifier::utils::now_ms;
use strategy_notifier::{
    FileStorage, Footer, GenerationRecord, JobStatus, LiveEvent, LiveStream, Notification,
    Notifier, NotifierConfig, NotifierError, NotifierHandle, ProgressSource, ProgressUpdate,
    Result, SharedStore, StrategyApi, TabStore, Tone, STORAGE_KEY,
};

/// Scripted stand-in for the strategy service. Each call pops the next
/// scripted answer, falling back to a quiet default once the script runs out.
#[derive(Default)]
struct FakeApi {
    live: Mutex<VecDeque<Result<LiveStream>>>,
    jobs: Mutex<VecDeque<Result<JobStatus>>>,
    strategies: Mutex<VecDeque<Result<String>>>,
    live_calls: AtomicUsize,
    job_calls: AtomicUsize,
    strategy_calls: AtomicUsize,
}

impl FakeApi {
    fn live_channel(&self) -> mpsc::UnboundedSender<Result<LiveEvent>> {
        let (tx, rx) = mpsc::unbounded();
        self.live.lock().unwrap().push_back(Ok(rx.boxed()));
        tx
    }

    fn refuse_live(&self) {
        self.live
            .lock()
            .unwrap()
            .push_back(Err(NotifierError::EventStream {
                message: "connection refused".to_string(),
            }));
    }

    fn push_job(&self, status: JobStatus) {
        self.jobs.lock().unwrap().push_back(Ok(status));
    }

    fn push_job_failure(&self) {
        self.jobs.lock().unwrap().push_back(Err(NotifierError::Status {
            status: 503,
            url: "http://test/check_strategy_status/acme".to_string(),
        }));
    }

    fn push_strategy(&self, status: &str) {
        self.strategies
            .lock()
            .unwrap()
            .push_back(Ok(status.to_string()));
    }

    fn job_calls(&self) -> usize {
        self.job_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StrategyApi for FakeApi {
    async fn progress_stream(&self, _company_id: &str) -> Result<LiveStream> {
        self.live_calls.fetch_add(1, Ordering::SeqCst);
        self.live
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(stream::pending().boxed()))
    }

    async fn job_status(&self, _company_id: &str) -> Result<JobStatus> {
        self.job_calls.fetch_add(1, Ordering::SeqCst);
        self.jobs
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(JobStatus::Running { progress: None }))
    }

    async fn strategy_status(&self, _strategy_id: &str) -> Result<String> {
        self.strategy_calls.fetch_add(1, Ordering::SeqCst);
        self.strategies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("pending".to_string()))
    }
}

fn test_config() -> NotifierConfig {
    NotifierConfig {
        reconcile_interval: Duration::from_secs(3600),
        ..NotifierConfig::default()
    }
}

fn spawn(store: &SharedStore, api: &Arc<FakeApi>) -> NotifierHandle {
    Notifier::new(test_config(), store.attach(), api.clone(), |_: &Notification| {}).start()
}

fn read(tab: &TabStore) -> Option<GenerationRecord> {
    tab.get_item(STORAGE_KEY)
        .unwrap()
        .map(|raw| GenerationRecord::from_json(&raw).unwrap())
}

fn write(tab: &TabStore, record: &GenerationRecord) {
    tab.set_item(STORAGE_KEY, &record.to_json().unwrap()).unwrap();
}

/// Lets every spawned task run until the runtime is idle.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

async fn wait(secs: f64) {
    tokio::time::sleep(Duration::from_secs_f64(secs)).await;
}

#[tokio::test(start_paused = true)]
async fn start_generation_persists_record_and_opens_one_source() {
    let api = Arc::new(FakeApi::default());
    let _live = api.live_channel();
    let store = SharedStore::memory();
    let probe = store.attach();
    let handle = spawn(&store, &api);

    let before = now_ms();
    handle.start_generation("acme").unwrap();
    let state = handle.inspect().await.unwrap();

    assert!(state.notification.visible);
    assert_eq!(state.notification.tone, Tone::Progress);
    assert_eq!(state.progress_source, Some(ProgressSource::Live));
    assert_eq!(state.status_check, None);
    match read(&probe) {
        Some(GenerationRecord::Generating {
            company_id,
            progress,
            start_time,
            ..
        }) => {
            assert_eq!(company_id, "acme");
            assert_eq!(progress, 0);
            assert!(start_time >= before);
        }
        other => panic!("unexpected record {:?}", other),
    }

    settle().await;
    assert_eq!(api.live_calls.load(Ordering::SeqCst), 1);
    assert_eq!(api.job_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn live_progress_is_rendered_and_persisted() {
    let api = Arc::new(FakeApi::default());
    let live = api.live_channel();
    let store = SharedStore::memory();
    let probe = store.attach();
    let handle = spawn(&store, &api);

    handle.start_generation("acme").unwrap();
    settle().await;
    live.unbounded_send(Ok(LiveEvent::Progress(ProgressUpdate::new(45, "Researching competitors"))))
        .unwrap();
    settle().await;

    let state = handle.inspect().await.unwrap();
    assert_eq!(state.notification.progress, 45);
    assert_eq!(
        state.notification.step_text.as_deref(),
        Some("Researching competitors")
    );

    // Regressions are shown as received.
    live.unbounded_send(Ok(LiveEvent::Progress(ProgressUpdate::new(30, "Re-ranking"))))
        .unwrap();
    settle().await;
    match read(&probe) {
        Some(GenerationRecord::Generating {
            progress,
            current_step,
            ..
        }) => {
            assert_eq!(progress, 30);
            assert_eq!(current_step.as_deref(), Some("Re-ranking"));
        }
        other => panic!("unexpected record {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn complete_event_switches_to_persistent_notification() {
    let api = Arc::new(FakeApi::default());
    let live = api.live_channel();
    let store = SharedStore::memory();
    let probe = store.attach();
    let rendered = Arc::new(Mutex::new(Vec::new()));
    let sink = rendered.clone();
    let handle = Notifier::new(
        test_config(),
        store.attach(),
        api.clone(),
        move |n: &Notification| sink.lock().unwrap().push(n.clone()),
    )
    .start();

    handle.start_generation("acme").unwrap();
    settle().await;
    live.unbounded_send(Ok(LiveEvent::Complete {
        strategy_id: "abc".to_string(),
    }))
    .unwrap();
    settle().await;

    let state = handle.inspect().await.unwrap();
    assert_eq!(state.progress_source, None);
    assert_eq!(state.status_check.as_deref(), Some("abc"));
    assert!(state.notification.visible);
    assert_eq!(state.notification.tone, Tone::Persistent);
    assert_eq!(state.notification.progress, 100);
    assert_eq!(
        state.notification.footer,
        Footer::ViewStrategy {
            strategy_id: "abc".to_string()
        }
    );
    assert!(matches!(
        read(&probe),
        Some(GenerationRecord::Completed { ref strategy_id, .. }) if strategy_id == "abc"
    ));
    assert_eq!(
        rendered.lock().unwrap().last().map(|n| n.tone),
        Some(Tone::Persistent)
    );

    let url = handle.view_strategy().await.unwrap().unwrap();
    assert_eq!(url.as_str(), "http://127.0.0.1:5000/strategy/abc");

    assert_eq!(api.strategy_calls.load(Ordering::SeqCst), 0);
    wait(10.5).await;
    assert_eq!(api.strategy_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn live_failure_falls_back_to_polling() {
    let api = Arc::new(FakeApi::default());
    api.refuse_live();
    api.push_job(JobStatus::Running {
        progress: Some(ProgressUpdate::new(20, "Drafting channels")),
    });
    api.push_job(JobStatus::Completed {
        strategy_id: "s-7".to_string(),
    });
    let store = SharedStore::memory();
    let probe = store.attach();
    let handle = spawn(&store, &api);

    handle.start_generation("acme").unwrap();
    settle().await;
    let state = handle.inspect().await.unwrap();
    assert_eq!(state.progress_source, Some(ProgressSource::Polling));
    assert_eq!(state.failures, 1);

    wait(3.1).await;
    let state = handle.inspect().await.unwrap();
    assert_eq!(state.notification.progress, 20);
    assert_eq!(state.failures, 0);

    wait(3.0).await;
    let state = handle.inspect().await.unwrap();
    assert_eq!(state.progress_source, None);
    assert_eq!(state.status_check.as_deref(), Some("s-7"));
    assert!(matches!(read(&probe), Some(GenerationRecord::Completed { .. })));
}

#[tokio::test(start_paused = true)]
async fn three_poll_failures_end_in_error_without_a_fourth_request() {
    let api = Arc::new(FakeApi::default());
    api.refuse_live();
    api.push_job(JobStatus::Running {
        progress: Some(ProgressUpdate::new(10, "Collecting data")),
    });
    api.push_job_failure();
    api.push_job_failure();
    api.push_job_failure();
    let store = SharedStore::memory();
    let probe = store.attach();
    let handle = spawn(&store, &api);

    handle.start_generation("acme").unwrap();
    wait(12.1).await;

    let state = handle.inspect().await.unwrap();
    assert_eq!(state.progress_source, None);
    assert_eq!(state.failures, 3);
    assert!(matches!(
        read(&probe),
        Some(GenerationRecord::Error { ref error, .. }) if error == "Server connection lost"
    ));
    assert!(!state.notification.visible, "error view waits for the hide");

    wait(0.5).await;
    let state = handle.inspect().await.unwrap();
    assert!(state.notification.visible);
    assert_eq!(state.notification.tone, Tone::Error);
    assert_eq!(state.notification.status_text, "Server connection lost");
    assert_eq!(state.notification.footer, Footer::Dismiss);
    assert_eq!(state.notification.step_text, None);

    wait(30.0).await;
    assert_eq!(api.job_calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn server_reported_failures_surface_immediately() {
    let api = Arc::new(FakeApi::default());
    api.refuse_live();
    api.push_job(JobStatus::Failed {
        error: Some("Quota exceeded".to_string()),
    });
    let store = SharedStore::memory();
    let probe = store.attach();
    let handle = spawn(&store, &api);

    handle.start_generation("acme").unwrap();
    wait(3.5).await;
    let state = handle.inspect().await.unwrap();
    assert!(state.notification.is_showing_error("Quota exceeded"));
    assert!(matches!(read(&probe), Some(GenerationRecord::Error { ref error, .. }) if error == "Quota exceeded"));

    let api = Arc::new(FakeApi::default());
    api.refuse_live();
    api.push_job(JobStatus::Unknown);
    let store = SharedStore::memory();
    let handle = spawn(&store, &api);
    handle.start_generation("acme").unwrap();
    wait(3.5).await;
    let state = handle.inspect().await.unwrap();
    assert!(state.notification.is_showing_error("Generation session lost"));
}

#[tokio::test(start_paused = true)]
async fn dismiss_clears_record_and_hides() {
    let api = Arc::new(FakeApi::default());
    api.refuse_live();
    api.push_job(JobStatus::Failed { error: None });
    let store = SharedStore::memory();
    let probe = store.attach();
    let handle = spawn(&store, &api);

    handle.start_generation("acme").unwrap();
    wait(3.5).await;
    assert!(handle
        .inspect()
        .await
        .unwrap()
        .notification
        .is_showing_error("Generation failed"));

    handle.dismiss().unwrap();
    let state = handle.inspect().await.unwrap();
    assert!(!state.notification.visible);
    assert_eq!(read(&probe), None);
}

#[tokio::test(start_paused = true)]
async fn stale_generating_record_is_discarded() {
    let api = Arc::new(FakeApi::default());
    let store = SharedStore::memory();
    let probe = store.attach();
    write(
        &probe,
        &GenerationRecord::generating("acme", now_ms() - 6 * 60 * 1000),
    );

    let handle = spawn(&store, &api);
    let state = handle.inspect().await.unwrap();
    assert!(!state.notification.visible);
    assert_eq!(state.progress_source, None);
    assert_eq!(read(&probe), None);
    assert_eq!(api.job_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn completed_record_is_cleared_once_approved() {
    let api = Arc::new(FakeApi::default());
    api.push_strategy("approved");
    let store = SharedStore::memory();
    let probe = store.attach();
    write(&probe, &GenerationRecord::completed("X", now_ms()));

    let handle = spawn(&store, &api);
    let state = handle.inspect().await.unwrap();
    assert!(!state.notification.visible);
    assert_eq!(state.status_check, None);
    assert_eq!(read(&probe), None);
}

#[tokio::test(start_paused = true)]
async fn pending_strategy_keeps_notification_and_rechecks() {
    let api = Arc::new(FakeApi::default());
    api.push_strategy("pending");
    api.push_strategy("pending");
    api.push_strategy("denied - archived");
    let store = SharedStore::memory();
    let probe = store.attach();
    write(&probe, &GenerationRecord::completed("X", now_ms()));

    let handle = spawn(&store, &api);
    let state = handle.inspect().await.unwrap();
    assert!(state.notification.visible);
    assert_eq!(state.notification.tone, Tone::Persistent);
    assert_eq!(state.status_check.as_deref(), Some("X"));

    // A second reconcile keeps the one running check.
    handle.reconcile().await.unwrap();
    wait(10.5).await;
    assert_eq!(api.strategy_calls.load(Ordering::SeqCst), 3);
    let state = handle.inspect().await.unwrap();
    assert!(!state.notification.visible);
    assert_eq!(state.status_check, None);
    assert_eq!(read(&probe), None);
}

#[tokio::test(start_paused = true)]
async fn verification_failures_exhaust_the_budget() {
    let api = Arc::new(FakeApi::default());
    api.push_job_failure();
    api.push_job_failure();
    api.push_job_failure();
    let store = SharedStore::memory();
    let probe = store.attach();
    write(&probe, &GenerationRecord::generating("acme", now_ms()));

    let handle = spawn(&store, &api);
    let state = handle.inspect().await.unwrap();
    assert!(state.notification.visible);
    assert_eq!(state.progress_source, Some(ProgressSource::Live));

    handle.reconcile().await.unwrap();
    handle.reconcile().await.unwrap();
    let state = handle.inspect().await.unwrap();
    assert_eq!(state.progress_source, None);
    assert!(matches!(
        read(&probe),
        Some(GenerationRecord::Error { ref error, .. })
            if error == "Generation interrupted. Please try again."
    ));
}

#[tokio::test(start_paused = true)]
async fn verification_reporting_completion_runs_completion_handling() {
    let api = Arc::new(FakeApi::default());
    api.push_job(JobStatus::Completed {
        strategy_id: "s-3".to_string(),
    });
    let store = SharedStore::memory();
    let probe = store.attach();
    write(&probe, &GenerationRecord::generating("acme", now_ms()));

    let handle = spawn(&store, &api);
    let state = handle.inspect().await.unwrap();
    assert_eq!(state.notification.tone, Tone::Persistent);
    assert_eq!(state.status_check.as_deref(), Some("s-3"));
    assert!(matches!(read(&probe), Some(GenerationRecord::Completed { .. })));
}

#[tokio::test(start_paused = true)]
async fn unknown_job_on_load_stops_quietly() {
    let api = Arc::new(FakeApi::default());
    api.push_job(JobStatus::Unknown);
    let store = SharedStore::memory();
    let probe = store.attach();
    write(&probe, &GenerationRecord::generating("acme", now_ms()));

    let handle = spawn(&store, &api);
    wait(1.0).await;
    let state = handle.inspect().await.unwrap();
    assert_eq!(state.progress_source, None);
    assert_eq!(state.failures, 0);
    assert_ne!(state.notification.tone, Tone::Error);
    assert!(!state.notification.visible);
    assert!(matches!(read(&probe), Some(GenerationRecord::Generating { .. })));
    assert_eq!(api.live_calls.load(Ordering::SeqCst), 0);
    assert_eq!(api.job_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn stored_error_is_shown_on_load() {
    let api = Arc::new(FakeApi::default());
    let store = SharedStore::memory();
    let probe = store.attach();
    write(&probe, &GenerationRecord::failed("Quota exceeded", now_ms()));

    let handle = spawn(&store, &api);
    let state = handle.inspect().await.unwrap();
    assert!(!state.notification.visible);

    wait(0.5).await;
    let state = handle.inspect().await.unwrap();
    assert!(state.notification.is_showing_error("Quota exceeded"));
    assert_eq!(state.notification.footer, Footer::Dismiss);
    assert_eq!(state.notification.step_text, None);
    assert_eq!(state.progress_source, None);
    assert_eq!(api.job_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn error_written_by_another_tab_stops_this_one() {
    let api = Arc::new(FakeApi::default());
    let _live = api.live_channel();
    let store = SharedStore::memory();
    let other_tab = store.attach();
    let handle = spawn(&store, &api);

    handle.start_generation("acme").unwrap();
    settle().await;
    write(&other_tab, &GenerationRecord::failed("Server connection lost", now_ms()));
    settle().await;

    let state = handle.inspect().await.unwrap();
    assert_eq!(state.progress_source, None);
    assert!(!state.notification.visible);

    wait(0.5).await;
    let state = handle.inspect().await.unwrap();
    assert!(state.notification.is_showing_error("Server connection lost"));
    assert!(matches!(
        read(&other_tab),
        Some(GenerationRecord::Error { ref error, .. }) if error == "Server connection lost"
    ));
}

#[tokio::test(start_paused = true)]
async fn live_failure_with_spent_budget_is_fatal() {
    let api = Arc::new(FakeApi::default());
    let live = api.live_channel();
    api.push_job_failure();
    api.push_job_failure();
    let store = SharedStore::memory();
    let probe = store.attach();
    write(&probe, &GenerationRecord::generating("acme", now_ms()));

    let handle = spawn(&store, &api);
    handle.reconcile().await.unwrap();
    let state = handle.inspect().await.unwrap();
    assert_eq!(state.failures, 2);
    assert_eq!(state.progress_source, Some(ProgressSource::Live));

    drop(live);
    settle().await;
    let state = handle.inspect().await.unwrap();
    assert_eq!(state.failures, 3);
    assert_eq!(state.progress_source, None);
    assert!(matches!(
        read(&probe),
        Some(GenerationRecord::Error { ref error, .. })
            if error == "Connection lost. Please refresh and try again."
    ));

    wait(0.5).await;
    let state = handle.inspect().await.unwrap();
    assert!(state
        .notification
        .is_showing_error("Connection lost. Please refresh and try again."));

    wait(30.0).await;
    assert_eq!(api.job_calls(), 2);
    assert_eq!(api.live_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn removal_in_another_tab_hides_and_tears_down() {
    let api = Arc::new(FakeApi::default());
    let _live = api.live_channel();
    let store = SharedStore::memory();
    let other_tab = store.attach();
    let handle = spawn(&store, &api);

    handle.start_generation("acme").unwrap();
    settle().await;
    other_tab.remove_item(STORAGE_KEY).unwrap();
    settle().await;

    let state = handle.inspect().await.unwrap();
    assert!(!state.notification.visible);
    assert_eq!(state.progress_source, None);
    assert_eq!(state.status_check, None);
}

#[tokio::test(start_paused = true)]
async fn other_tabs_follow_the_generation() {
    let api_a = Arc::new(FakeApi::default());
    let live_a = api_a.live_channel();
    let api_b = Arc::new(FakeApi::default());
    let _live_b = api_b.live_channel();
    let store = SharedStore::memory();
    let tab_a = spawn(&store, &api_a);
    let tab_b = spawn(&store, &api_b);
    settle().await;

    tab_a.start_generation("acme").unwrap();
    settle().await;
    live_a
        .unbounded_send(Ok(LiveEvent::Progress(ProgressUpdate::new(60, "Writing"))))
        .unwrap();
    settle().await;

    let state = tab_b.inspect().await.unwrap();
    assert!(state.notification.visible);
    assert_eq!(state.progress_source, Some(ProgressSource::Live));
    assert_eq!(state.notification.progress, 60);
    assert_eq!(state.notification.step_text.as_deref(), Some("Writing"));
    assert_eq!(api_b.live_calls.load(Ordering::SeqCst), 1);

    live_a
        .unbounded_send(Ok(LiveEvent::Complete {
            strategy_id: "abc".to_string(),
        }))
        .unwrap();
    settle().await;

    let state = tab_b.inspect().await.unwrap();
    assert_eq!(state.notification.tone, Tone::Persistent);
    assert_eq!(state.progress_source, None);
    assert_eq!(state.status_check.as_deref(), Some("abc"));
    let url = tab_b.view_strategy().await.unwrap().unwrap();
    assert!(url.as_str().ends_with("/strategy/abc"));
}

#[tokio::test(start_paused = true)]
async fn close_keeps_running_jobs_but_drops_finished_ones() {
    let api = Arc::new(FakeApi::default());
    let live = api.live_channel();
    let store = SharedStore::memory();
    let probe = store.attach();
    let handle = spawn(&store, &api);

    handle.start_generation("acme").unwrap();
    handle.close().unwrap();
    let state = handle.inspect().await.unwrap();
    assert!(!state.notification.visible);
    assert!(matches!(read(&probe), Some(GenerationRecord::Generating { .. })));
    assert_eq!(state.progress_source, Some(ProgressSource::Live));

    settle().await;
    live.unbounded_send(Ok(LiveEvent::Complete {
        strategy_id: "abc".to_string(),
    }))
    .unwrap();
    settle().await;
    handle.close().unwrap();
    let state = handle.inspect().await.unwrap();
    assert!(!state.notification.visible);
    assert_eq!(state.status_check, None);
    assert_eq!(read(&probe), None);
}

#[tokio::test(start_paused = true)]
async fn generation_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");

    let api = Arc::new(FakeApi::default());
    let live = api.live_channel();
    let store = SharedStore::new(FileStorage::new(&path));
    let handle = spawn(&store, &api);
    handle.start_generation("acme").unwrap();
    settle().await;
    live.unbounded_send(Ok(LiveEvent::Progress(ProgressUpdate::new(35, "Mapping audience"))))
        .unwrap();
    settle().await;
    handle.stop().await.unwrap();
    assert!(matches!(handle.inspect().await, Err(NotifierError::Closed)));

    let api = Arc::new(FakeApi::default());
    let store = SharedStore::new(FileStorage::new(&path));
    let handle = spawn(&store, &api);
    let state = handle.inspect().await.unwrap();
    assert!(state.notification.visible);
    assert_eq!(state.notification.progress, 35);
    assert_eq!(
        state.notification.step_text.as_deref(),
        Some("Mapping audience")
    );
    assert_eq!(state.progress_source, Some(ProgressSource::Live));
    assert_eq!(api.job_calls(), 1);
}
