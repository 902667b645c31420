use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use url::Url;

use crate::api::{JobStatus, LiveEvent, ProgressUpdate, StrategyApi};
use crate::budget::RetryBudget;
use crate::config::NotifierConfig;
use crate::error::{NotifierError, Result};
use crate::store::TabStore;
use crate::utils;
use crate::view::{Notification, Renderer};
use crate::{is_terminal_status, GenerationRecord};

/// Where progress for the active job comes from. The live channel is primary;
/// polling takes over after a non-fatal live failure and never hands back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressSource {
    Live,
    Polling,
}

#[derive(Debug, Clone)]
pub struct NotifierState {
    pub notification: Notification,
    pub progress_source: Option<ProgressSource>,
    /// Strategy whose review status is being re-checked, if any.
    pub status_check: Option<String>,
    pub failures: u32,
}

enum Command {
    StartGeneration(String),
    Reconcile(oneshot::Sender<()>),
    Dismiss,
    Close,
    ViewStrategy(oneshot::Sender<Option<Url>>),
    Inspect(oneshot::Sender<NotifierState>),
    Stop(oneshot::Sender<()>),
}

enum Event {
    Sweep,
    Live { token: u64, event: LiveEvent },
    LiveFailed { token: u64, reason: String },
    Poll { token: u64, result: Result<JobStatus> },
    StatusCheck { token: u64, result: Result<String> },
    ShowError { token: u64, message: String },
}

/// Spawned work owned by the notifier; aborted on drop.
struct Task {
    token: u64,
    handle: JoinHandle<()>,
}

impl Drop for Task {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

struct JobTask {
    company_id: String,
    task: Task,
}

struct StatusTask {
    strategy_id: String,
    task: Task,
}

fn owns(slot: &Option<JobTask>, token: u64) -> bool {
    slot.as_ref().is_some_and(|job| job.task.token == token)
}

enum Verification {
    Continue,
    Completed(String),
    Lost,
    Exhausted,
}

/// Tracks one strategy generation for a single tab.
///
/// All state is owned by one task. Commands from [`NotifierHandle`], timer
/// ticks, network results and changes made by other tabs are handled one at
/// a time, so no handler ever observes another half-way through.
pub struct Notifier {
    config: NotifierConfig,
    store: TabStore,
    api: Arc<dyn StrategyApi>,
    renderer: Box<dyn Renderer>,
    notification: Notification,
    rendered: Option<Notification>,
    budget: RetryBudget,
    live: Option<JobTask>,
    poll: Option<JobTask>,
    status_check: Option<StatusTask>,
    pending_error: Option<Task>,
    current_strategy_id: Option<String>,
    next_token: u64,
    events: mpsc::UnboundedSender<Event>,
    inbox: Option<mpsc::UnboundedReceiver<Event>>,
}

impl Notifier {
    pub fn new(
        config: NotifierConfig,
        store: TabStore,
        api: Arc<dyn StrategyApi>,
        renderer: impl Renderer,
    ) -> Self {
        let (events, inbox) = mpsc::unbounded_channel();
        Self {
            budget: RetryBudget::new(config.max_failures),
            config,
            store,
            api,
            renderer: Box::new(renderer),
            notification: Notification::default(),
            rendered: None,
            live: None,
            poll: None,
            status_check: None,
            pending_error: None,
            current_strategy_id: None,
            next_token: 0,
            events,
            inbox: Some(inbox),
        }
    }

    /// Resumes whatever phase the store holds and keeps tracking it until
    /// [`NotifierHandle::stop`] is called or every handle is dropped.
    pub fn start(self) -> NotifierHandle {
        let (commands, rx) = mpsc::unbounded_channel();
        tokio::spawn(self.run(rx));
        NotifierHandle { commands }
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let Some(mut inbox) = self.inbox.take() else {
            return;
        };
        let mut changes = self.store.subscribe();
        info!(tab = %self.store.id(), "generation notifier started");

        self.reconcile().await;
        let period = self.config.reconcile_interval;
        let _sweep = self.spawn_ticker(period, |_| async { Event::Sweep });

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => {
                        if !self.handle_command(command).await {
                            break;
                        }
                    }
                    None => break,
                },
                Some(event) = inbox.recv() => self.handle_event(event).await,
                Some(change) = changes.recv() => {
                    if change.key == self.config.storage_key {
                        self.on_storage_change(change.new_value);
                    }
                }
            }
        }

        self.teardown();
        info!(tab = %self.store.id(), "generation notifier stopped");
    }

    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::StartGeneration(company_id) => self.start_generation(company_id),
            Command::Reconcile(ack) => {
                self.reconcile().await;
                let _ = ack.send(());
            }
            Command::Dismiss => self.dismiss(),
            Command::Close => self.close(),
            Command::ViewStrategy(reply) => {
                let _ = reply.send(self.strategy_url());
            }
            Command::Inspect(reply) => {
                let _ = reply.send(self.state());
            }
            Command::Stop(ack) => {
                self.teardown();
                let _ = ack.send(());
                return false;
            }
        }
        true
    }

    async fn handle_event(&mut self, event: Event) {
        match event {
            Event::Sweep => {
                debug!("periodic reconcile");
                self.reconcile().await;
            }
            Event::Live { token, event } => {
                if !owns(&self.live, token) {
                    return;
                }
                match event {
                    LiveEvent::Progress(update) => {
                        self.budget.record_success();
                        self.apply_progress(&update);
                    }
                    LiveEvent::Complete { strategy_id } => self.on_complete(strategy_id),
                }
            }
            Event::LiveFailed { token, reason } => {
                if !owns(&self.live, token) {
                    return;
                }
                let Some(JobTask { company_id, .. }) = self.live.take() else {
                    return;
                };
                let failures = self.budget.record_failure();
                warn!(%reason, failures, "live progress connection failed");
                if self.budget.exhausted() {
                    self.on_error("Connection lost. Please refresh and try again.");
                } else {
                    self.start_polling(company_id);
                }
            }
            Event::Poll { token, result } => {
                if owns(&self.poll, token) {
                    self.on_poll_result(result);
                }
            }
            Event::StatusCheck { token, result } => {
                if !self
                    .status_check
                    .as_ref()
                    .is_some_and(|check| check.task.token == token)
                {
                    return;
                }
                match result {
                    Ok(status) if is_terminal_status(&status) => {
                        info!(%status, "strategy reached a terminal status");
                        self.status_check = None;
                        self.remove_record();
                        self.hide();
                    }
                    Ok(status) => debug!(%status, "strategy still awaiting action"),
                    Err(e) => warn!(error = %e, "strategy status check failed"),
                }
            }
            Event::ShowError { token, message } => {
                if !self.pending_error.as_ref().is_some_and(|t| t.token == token) {
                    return;
                }
                self.pending_error = None;
                self.notification.show_error(&message);
                self.render();
            }
        }
    }

    fn start_generation(&mut self, company_id: String) {
        info!(%company_id, "starting strategy generation");
        self.teardown();
        self.write_record(&GenerationRecord::generating(&company_id, utils::now_ms()));
        self.budget.record_success();
        self.current_strategy_id = None;

        self.notification.restore_generating(0, None);
        self.apply_progress(&ProgressUpdate::new(0, "Starting strategy generation..."));
        self.notification.show_generating();
        self.render();
        self.connect_live(company_id);
    }

    /// Brings this tab in line with the persisted record.
    async fn reconcile(&mut self) {
        let Some(record) = self.read_record() else {
            return;
        };

        if record.is_stale(utils::now_ms(), self.config.stale_after_ms()) {
            info!("clearing stale generation record");
            self.teardown();
            self.remove_record();
            self.hide();
            return;
        }

        match record {
            GenerationRecord::Completed { strategy_id, .. } => {
                self.current_strategy_id = Some(strategy_id.clone());
                let api = Arc::clone(&self.api);
                match api.strategy_status(&strategy_id).await {
                    Ok(status) if is_terminal_status(&status) => {
                        info!(%strategy_id, %status, "strategy already processed");
                        self.teardown();
                        self.remove_record();
                        self.hide();
                        return;
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "strategy status check failed"),
                }
                self.notification.show_ready(&strategy_id);
                self.render();
                if self.status_check.is_none() {
                    self.start_status_checking(strategy_id);
                }
            }
            GenerationRecord::Generating {
                company_id,
                progress,
                current_step,
                ..
            } => {
                self.notification
                    .restore_generating(progress, current_step.as_deref());
                self.render();

                match self.verify_generation(&company_id).await {
                    Verification::Continue => {
                        self.pending_error = None;
                        self.notification.show_generating();
                        self.render();
                        if self.progress_source().is_none() {
                            self.connect_live(company_id);
                        }
                    }
                    Verification::Completed(strategy_id) => self.on_complete(strategy_id),
                    Verification::Lost => debug!(%company_id, "server no longer knows this job"),
                    Verification::Exhausted => {
                        self.on_error("Generation interrupted. Please try again.")
                    }
                }
            }
            GenerationRecord::Error { error, .. } => {
                if self.notification.is_showing_error(&error) || self.pending_error.is_some() {
                    return;
                }
                self.teardown();
                self.present_error(&error);
            }
        }
    }

    /// Lightweight check that the server is still working on the job.
    async fn verify_generation(&mut self, company_id: &str) -> Verification {
        let api = Arc::clone(&self.api);
        match api.job_status(company_id).await {
            Ok(JobStatus::Completed { strategy_id }) => Verification::Completed(strategy_id),
            Ok(JobStatus::Unknown) => Verification::Lost,
            Ok(_) => {
                self.budget.record_success();
                Verification::Continue
            }
            Err(e) => {
                let failures = self.budget.record_failure();
                warn!(error = %e, failures, "generation verification failed");
                if self.budget.exhausted() {
                    Verification::Exhausted
                } else {
                    Verification::Continue
                }
            }
        }
    }

    fn on_poll_result(&mut self, result: Result<JobStatus>) {
        match result {
            Ok(JobStatus::Completed { strategy_id }) => self.on_complete(strategy_id),
            Ok(JobStatus::Failed { error }) => {
                self.on_error(error.as_deref().unwrap_or("Generation failed"))
            }
            Ok(JobStatus::Unknown) => self.on_error("Generation session lost"),
            Ok(JobStatus::Running {
                progress: Some(update),
            }) => {
                self.budget.record_success();
                self.apply_progress(&update);
            }
            Ok(JobStatus::Running { progress: None }) => debug!("job still running"),
            Err(e) => {
                let failures = self.budget.record_failure();
                warn!(error = %e, failures, "status poll failed");
                if self.budget.exhausted() {
                    self.on_error("Server connection lost");
                }
            }
        }
    }

    fn apply_progress(&mut self, update: &ProgressUpdate) {
        self.notification
            .set_progress(update.percent(), update.current_step.as_deref());
        self.render();

        if let Some(GenerationRecord::Generating {
            company_id,
            start_time,
            progress,
            current_step,
        }) = self.read_record()
        {
            self.write_record(&GenerationRecord::Generating {
                company_id,
                start_time,
                progress: update.percent().unwrap_or(progress),
                current_step: update.current_step.clone().or(current_step),
            });
        }
    }

    fn on_complete(&mut self, strategy_id: String) {
        info!(%strategy_id, "strategy generation completed");
        self.teardown();
        self.write_record(&GenerationRecord::completed(&strategy_id, utils::now_ms()));
        self.notification.show_ready(&strategy_id);
        self.render();
        self.start_status_checking(strategy_id.clone());
        self.current_strategy_id = Some(strategy_id);
    }

    fn on_error(&mut self, message: &str) {
        warn!(message, "strategy generation failed");
        self.teardown();
        self.write_record(&GenerationRecord::failed(message, utils::now_ms()));
        self.present_error(message);
    }

    /// Hides the current view and shows the error once the hide has settled.
    fn present_error(&mut self, message: &str) {
        self.hide();
        let token = self.next_token();
        let delay = self.config.error_render_delay;
        let events = self.events.clone();
        let message = message.to_string();
        let handle = tokio::spawn(async move {
            time::sleep(delay).await;
            let _ = events.send(Event::ShowError { token, message });
        });
        self.pending_error = Some(Task { token, handle });
    }

    fn dismiss(&mut self) {
        info!("dismissing generation notification");
        self.teardown();
        self.remove_record();
        self.hide();
    }

    /// The header close button. The record only goes away once nothing is left to track.
    fn close(&mut self) {
        self.hide();
        if matches!(
            self.read_record(),
            Some(GenerationRecord::Completed { .. } | GenerationRecord::Error { .. })
        ) {
            self.teardown();
            self.remove_record();
        }
    }

    fn on_storage_change(&mut self, new_value: Option<String>) {
        let Some(raw) = new_value else {
            debug!("generation record removed by another tab");
            self.teardown();
            self.hide();
            return;
        };
        let record = match GenerationRecord::from_json(&raw) {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "ignoring unreadable generation record from another tab");
                return;
            }
        };

        match record {
            GenerationRecord::Generating {
                company_id,
                progress,
                current_step,
                ..
            } => {
                self.pending_error = None;
                self.status_check = None;
                self.notification
                    .restore_generating(progress, current_step.as_deref());
                self.notification.show_generating();
                self.render();
                if self.progress_source().is_none() {
                    self.connect_live(company_id);
                }
            }
            GenerationRecord::Completed { strategy_id, .. } => {
                self.pending_error = None;
                self.live = None;
                self.poll = None;
                self.notification.show_ready(&strategy_id);
                self.render();
                self.start_status_checking(strategy_id.clone());
                self.current_strategy_id = Some(strategy_id);
            }
            GenerationRecord::Error { error, .. } => {
                self.teardown();
                if !self.notification.is_showing_error(&error) {
                    self.present_error(&error);
                }
            }
        }
    }

    fn connect_live(&mut self, company_id: String) {
        self.live = None;
        let token = self.next_token();
        let api = Arc::clone(&self.api);
        let events = self.events.clone();
        let job = company_id.clone();
        let handle = tokio::spawn(async move {
            let reason = match api.progress_stream(&job).await {
                Ok(mut stream) => loop {
                    match stream.next().await {
                        Some(Ok(event)) => {
                            if events.send(Event::Live { token, event }).is_err() {
                                return;
                            }
                        }
                        Some(Err(e)) => break e.to_string(),
                        None => break "stream closed by server".to_string(),
                    }
                },
                Err(e) => e.to_string(),
            };
            let _ = events.send(Event::LiveFailed { token, reason });
        });
        info!(%company_id, "live progress connection opened");
        self.live = Some(JobTask {
            company_id,
            task: Task { token, handle },
        });
    }

    fn start_polling(&mut self, company_id: String) {
        info!(%company_id, "falling back to status polling");
        let api = Arc::clone(&self.api);
        let job = company_id.clone();
        let period = self.config.poll_interval;
        let task = self.spawn_ticker(period, move |token| {
            let api = Arc::clone(&api);
            let job = job.clone();
            async move {
                Event::Poll {
                    token,
                    result: api.job_status(&job).await,
                }
            }
        });
        self.poll = Some(JobTask { company_id, task });
    }

    fn start_status_checking(&mut self, strategy_id: String) {
        let api = Arc::clone(&self.api);
        let id = strategy_id.clone();
        let period = self.config.status_check_interval;
        let task = self.spawn_ticker(period, move |token| {
            let api = Arc::clone(&api);
            let id = id.clone();
            async move {
                Event::StatusCheck {
                    token,
                    result: api.strategy_status(&id).await,
                }
            }
        });
        self.status_check = Some(StatusTask { strategy_id, task });
    }

    /// Runs `on_tick` once per period, first after one full period.
    fn spawn_ticker<F, Fut>(&mut self, period: Duration, mut on_tick: F) -> Task
    where
        F: FnMut(u64) -> Fut + Send + 'static,
        Fut: Future<Output = Event> + Send + 'static,
    {
        let token = self.next_token();
        let events = self.events.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if events.send(on_tick(token).await).is_err() {
                    break;
                }
            }
        });
        Task { token, handle }
    }

    fn teardown(&mut self) {
        if self.live.take().is_some() {
            debug!("closed live progress connection");
        }
        self.poll = None;
        self.status_check = None;
        self.pending_error = None;
    }

    fn hide(&mut self) {
        self.pending_error = None;
        self.notification.hide();
        self.render();
    }

    fn render(&mut self) {
        if self.rendered.as_ref() == Some(&self.notification) {
            return;
        }
        self.renderer.render(&self.notification);
        self.rendered = Some(self.notification.clone());
    }

    fn progress_source(&self) -> Option<ProgressSource> {
        if self.live.is_some() {
            Some(ProgressSource::Live)
        } else if self.poll.is_some() {
            Some(ProgressSource::Polling)
        } else {
            None
        }
    }

    fn state(&self) -> NotifierState {
        NotifierState {
            notification: self.notification.clone(),
            progress_source: self.progress_source(),
            status_check: self
                .status_check
                .as_ref()
                .map(|check| check.strategy_id.clone()),
            failures: self.budget.failures(),
        }
    }

    fn strategy_url(&self) -> Option<Url> {
        let strategy_id = self.current_strategy_id.as_deref()?;
        let base = match Url::parse(&self.config.base_url) {
            Ok(base) => base,
            Err(e) => {
                warn!(error = %e, "invalid base url");
                return None;
            }
        };
        utils::endpoint(&base, &["strategy", strategy_id]).ok()
    }

    fn next_token(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }

    fn read_record(&self) -> Option<GenerationRecord> {
        let raw = match self.store.get_item(&self.config.storage_key) {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(error = %e, "could not read generation record");
                return None;
            }
        };
        match GenerationRecord::from_json(&raw) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(error = %e, "ignoring unreadable generation record");
                None
            }
        }
    }

    fn write_record(&self, record: &GenerationRecord) {
        let result = record
            .to_json()
            .and_then(|raw| self.store.set_item(&self.config.storage_key, &raw));
        if let Err(e) = result {
            warn!(error = %e, status = record.status(), "could not persist generation record");
        }
    }

    fn remove_record(&self) {
        if let Err(e) = self.store.remove_item(&self.config.storage_key) {
            warn!(error = %e, "could not remove generation record");
        }
    }
}

/// Cloneable control surface of a running [`Notifier`].
#[derive(Clone)]
pub struct NotifierHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl NotifierHandle {
    pub fn start_generation(&self, company_id: impl Into<String>) -> Result<()> {
        self.send(Command::StartGeneration(company_id.into()))
    }

    /// Clears the record and hides the notification, whatever state it was in.
    pub fn dismiss(&self) -> Result<()> {
        self.send(Command::Dismiss)
    }

    pub fn close(&self) -> Result<()> {
        self.send(Command::Close)
    }

    pub async fn reconcile(&self) -> Result<()> {
        self.request(Command::Reconcile).await
    }

    /// Navigation target for the "View Strategy" action.
    pub async fn view_strategy(&self) -> Result<Option<Url>> {
        self.request(Command::ViewStrategy).await
    }

    pub async fn inspect(&self) -> Result<NotifierState> {
        self.request(Command::Inspect).await
    }

    /// Tears down connections and timers and ends the notifier task.
    pub async fn stop(&self) -> Result<()> {
        self.request(Command::Stop).await
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| NotifierError::Closed)
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.send(command(tx))?;
        rx.await.map_err(|_| NotifierError::Closed)
    }
}
