//! Start-then-poll driver for long-running server jobs.

#![allow(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::api::DataApi;
use crate::error::Result;
use crate::model::{DataStatus, JobProgress, JobStart, UpdateKind, UpdateRequest};

/// A server job that can be started and then observed.
#[async_trait]
pub trait JobSource: Send + Sync + 'static {
    async fn start(&self) -> Result<JobStart>;

    async fn status(&self) -> Result<JobProgress>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTiming {
    pub interval: Duration,
    /// How long the terminal progress stays on screen before hiding.
    pub grace: Duration,
}

impl Default for PollTiming {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1000),
            grace: Duration::from_millis(2000),
        }
    }
}

/// Progress panel view-model.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProgressPanel {
    pub visible: bool,
    pub running: bool,
    pub percent: f64,
    pub current: u64,
    pub total: u64,
    pub message: String,
}

impl ProgressPanel {
    fn from_progress(progress: &JobProgress) -> Self {
        Self {
            visible: true,
            running: progress.is_running,
            percent: progress.percent(),
            current: progress.current,
            total: progress.total,
            message: progress.message.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    Progress(JobProgress),
    /// The job reported it is no longer running.
    Finished(JobProgress),
    /// The panel was hidden after the grace period.
    Hidden,
    /// Summary data depending on the job should be reloaded.
    RefreshSummary,
}

#[derive(Default)]
struct Timers {
    epoch: u64,
    /// Set once the current epoch saw the job end.
    finished: bool,
    ticker: Option<JoinHandle<()>>,
    hide: Option<JoinHandle<()>>,
}

impl Timers {
    /// Invalidates every scheduled callback and returns the new epoch.
    fn reset(&mut self) -> u64 {
        if let Some(handle) = self.ticker.take() {
            handle.abort();
        }
        if let Some(handle) = self.hide.take() {
            handle.abort();
        }
        self.epoch += 1;
        self.finished = false;
        self.epoch
    }
}

struct PollerInner<S> {
    source: Arc<S>,
    timing: PollTiming,
    panel: watch::Sender<ProgressPanel>,
    events: mpsc::UnboundedSender<JobEvent>,
    timers: Mutex<Timers>,
}

/// Drives one job source. At most one poll timer is alive per poller.
pub struct JobPoller<S: JobSource> {
    inner: Arc<PollerInner<S>>,
}

impl<S: JobSource> JobPoller<S> {
    pub fn new(source: Arc<S>, timing: PollTiming) -> (Self, mpsc::UnboundedReceiver<JobEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let (panel, _) = watch::channel(ProgressPanel::default());
        let inner = Arc::new(PollerInner {
            source,
            timing,
            panel,
            events,
            timers: Mutex::new(Timers::default()),
        });
        (Self { inner }, receiver)
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ProgressPanel> {
        self.inner.panel.subscribe()
    }

    #[must_use]
    pub fn panel(&self) -> ProgressPanel {
        self.inner.panel.borrow().clone()
    }

    #[must_use]
    pub fn source(&self) -> &Arc<S> {
        &self.inner.source
    }

    #[must_use]
    pub fn is_polling(&self) -> bool {
        self.inner.timers.lock().ticker.is_some()
    }

    /// Starts the job and begins polling it.
    ///
    /// A failed start leaves timers and panel untouched. When the job was
    /// already running, one status check runs right away.
    pub async fn start(&self) -> Result<JobStart> {
        let started = self.inner.source.start().await?;
        info!(already_running = started.already_running, "job started");
        let message = started
            .message
            .clone()
            .unwrap_or_else(|| "Starting...".to_string());
        self.inner.panel.send_modify(|panel| {
            panel.visible = true;
            panel.running = true;
            panel.message = message;
        });
        let epoch = PollerInner::arm(&self.inner);
        if started.already_running {
            PollerInner::tick(&self.inner, epoch).await;
        }
        Ok(started)
    }

    /// Picks up a job that is already running, without starting one.
    ///
    /// Returns whether polling began.
    pub async fn resume(&self) -> Result<bool> {
        let progress = self.inner.source.status().await?;
        if !progress.is_running {
            return Ok(false);
        }
        debug!(current = progress.current, total = progress.total, "resuming running job");
        self.inner.panel.send_replace(ProgressPanel::from_progress(&progress));
        PollerInner::arm(&self.inner);
        Ok(true)
    }

    /// Stops polling and drops any pending hide, leaving the panel as is.
    pub fn cancel(&self) {
        self.inner.timers.lock().reset();
    }
}

impl<S: JobSource> Drop for JobPoller<S> {
    fn drop(&mut self) {
        self.inner.timers.lock().reset();
    }
}

impl<S: JobSource> PollerInner<S> {
    /// Replaces any live timer with a fresh ticker whose first tick is one
    /// interval away.
    fn arm(this: &Arc<Self>) -> u64 {
        let mut timers = this.timers.lock();
        let epoch = timers.reset();
        let inner = Arc::clone(this);
        let period = this.timing.interval;
        timers.ticker = Some(tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !Self::tick(&inner, epoch).await {
                    break;
                }
            }
        }));
        debug!(epoch, "poll timer armed");
        epoch
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.timers.lock().epoch == epoch
    }

    /// One status check. Returns whether polling should continue.
    async fn tick(this: &Arc<Self>, epoch: u64) -> bool {
        let progress = match this.source.status().await {
            Ok(progress) => progress,
            Err(err) => {
                warn!(error = %err, "job status check failed, retrying on next tick");
                return true;
            }
        };
        {
            let timers = this.timers.lock();
            if timers.epoch != epoch || timers.finished {
                debug!(epoch, "dropping status of a superseded or finished poll");
                return false;
            }
            this.panel.send_replace(ProgressPanel::from_progress(&progress));
        }
        if progress.is_running {
            let _ = this.events.send(JobEvent::Progress(progress));
            true
        } else {
            Self::finish(this, epoch, progress);
            false
        }
    }

    fn finish(this: &Arc<Self>, epoch: u64, progress: JobProgress) {
        let mut timers = this.timers.lock();
        if timers.epoch != epoch || timers.finished {
            return;
        }
        timers.finished = true;
        if let Some(handle) = timers.ticker.take() {
            handle.abort();
        }
        info!(message = %progress.message, "job finished");
        let _ = this.events.send(JobEvent::Finished(progress));
        let inner = Arc::clone(this);
        let grace = this.timing.grace;
        timers.hide = Some(tokio::spawn(async move {
            time::sleep(grace).await;
            if !inner.is_current(epoch) {
                return;
            }
            inner.panel.send_modify(|panel| panel.visible = false);
            inner.timers.lock().hide = None;
            let _ = inner.events.send(JobEvent::Hidden);
            let _ = inner.events.send(JobEvent::RefreshSummary);
        }));
    }
}

/// The dashboard's data refresh job.
pub struct DataUpdateJob {
    api: Arc<dyn DataApi>,
    request: Mutex<UpdateRequest>,
}

impl DataUpdateJob {
    pub fn new(api: Arc<dyn DataApi>) -> Self {
        Self {
            api,
            request: Mutex::new(UpdateRequest {
                update_type: UpdateKind::Incremental,
                overwrite_mode: false,
            }),
        }
    }

    /// Sets what the next [`JobSource::start`] asks for.
    pub fn configure(&self, update_type: UpdateKind, overwrite_mode: bool) {
        // overwriting only applies to full refetches
        let overwrite_mode = overwrite_mode && matches!(update_type, UpdateKind::Full);
        *self.request.lock() = UpdateRequest {
            update_type,
            overwrite_mode,
        };
    }

    #[must_use]
    pub fn request(&self) -> UpdateRequest {
        *self.request.lock()
    }

    /// Summary reloaded after a job finishes.
    pub async fn summary(&self) -> Result<DataStatus> {
        self.api.data_status().await
    }
}

#[async_trait]
impl JobSource for DataUpdateJob {
    async fn start(&self) -> Result<JobStart> {
        let request = self.request();
        self.api.start_update(request).await
    }

    async fn status(&self) -> Result<JobProgress> {
        self.api.update_progress().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;
    use std::collections::VecDeque;

    struct ScriptedJob {
        origin: Instant,
        start: Mutex<Result<JobStart>>,
        statuses: Mutex<VecDeque<Result<JobProgress>>>,
        /// Per-call latency of status answers, in call order.
        delays: Mutex<VecDeque<Duration>>,
        status_calls: Mutex<Vec<Duration>>,
        start_calls: Mutex<usize>,
    }

    impl ScriptedJob {
        fn new(start: Result<JobStart>, statuses: Vec<Result<JobProgress>>) -> Arc<Self> {
            Arc::new(Self {
                origin: Instant::now(),
                start: Mutex::new(start),
                statuses: Mutex::new(statuses.into()),
                delays: Mutex::new(VecDeque::new()),
                status_calls: Mutex::new(Vec::new()),
                start_calls: Mutex::new(0),
            })
        }

        fn status_times_ms(&self) -> Vec<u128> {
            self.status_calls.lock().iter().map(Duration::as_millis).collect()
        }
    }

    #[async_trait]
    impl JobSource for ScriptedJob {
        async fn start(&self) -> Result<JobStart> {
            *self.start_calls.lock() += 1;
            self.start.lock().clone()
        }

        async fn status(&self) -> Result<JobProgress> {
            self.status_calls.lock().push(self.origin.elapsed());
            let answer = self
                .statuses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(running(1, 10)));
            let delay = self.delays.lock().pop_front();
            if let Some(delay) = delay {
                time::sleep(delay).await;
            }
            answer
        }
    }

    fn running(current: u64, total: u64) -> JobProgress {
        JobProgress {
            current,
            total,
            message: format!("{current}/{total}"),
            is_running: true,
        }
    }

    fn done(message: &str) -> JobProgress {
        JobProgress {
            current: 10,
            total: 10,
            message: message.to_string(),
            is_running: false,
        }
    }

    fn fresh_start() -> Result<JobStart> {
        Ok(JobStart {
            already_running: false,
            message: Some("数据更新任务已启动".into()),
        })
    }

    async fn at_ms(origin: Instant, ms: u64) {
        time::sleep_until(origin + Duration::from_millis(ms)).await;
    }

    fn drain(events: &mut mpsc::UnboundedReceiver<JobEvent>) -> Vec<JobEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn first_tick_waits_one_interval() {
        let job = ScriptedJob::new(fresh_start(), vec![Ok(running(2, 10))]);
        let (poller, _events) = JobPoller::new(Arc::clone(&job), PollTiming::default());
        poller.start().await.expect("start");
        assert!(poller.is_polling());
        assert!(poller.panel().visible);
        assert_eq!(poller.panel().message, "数据更新任务已启动");

        at_ms(job.origin, 990).await;
        assert!(job.status_times_ms().is_empty());
        at_ms(job.origin, 2010).await;
        assert_eq!(job.status_times_ms(), vec![1000, 2000]);
        assert!((poller.panel().percent - 10.0).abs() < f64::EPSILON);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn already_running_checks_status_immediately() {
        let job = ScriptedJob::new(
            Ok(JobStart {
                already_running: true,
                message: None,
            }),
            vec![Ok(running(4, 8))],
        );
        let (poller, mut events) = JobPoller::new(Arc::clone(&job), PollTiming::default());
        poller.start().await.expect("start");
        assert_eq!(job.status_times_ms(), vec![0]);
        assert!((poller.panel().percent - 50.0).abs() < f64::EPSILON);
        assert_eq!(drain(&mut events), vec![JobEvent::Progress(running(4, 8))]);

        at_ms(job.origin, 1010).await;
        assert_eq!(job.status_times_ms(), vec![0, 1000]);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn late_status_after_finish_is_dropped() {
        let job = ScriptedJob::new(
            Ok(JobStart {
                already_running: true,
                message: None,
            }),
            vec![
                Ok(JobProgress {
                    message: "old".into(),
                    ..running(5, 10)
                }),
                Ok(done("done")),
            ],
        );
        *job.delays.lock() = VecDeque::from([Duration::from_millis(2500)]);
        let (poller, mut events) = JobPoller::new(Arc::clone(&job), PollTiming::default());

        // the inline check answers at 2500 ms, after the 1000 ms tick finished the job
        poller.start().await.expect("start");
        assert_eq!(job.status_times_ms(), vec![0, 1000]);
        let panel = poller.panel();
        assert!(!panel.running);
        assert_eq!(panel.message, "done");

        at_ms(job.origin, 3010).await;
        assert_eq!(
            drain(&mut events),
            vec![
                JobEvent::Finished(done("done")),
                JobEvent::Hidden,
                JobEvent::RefreshSummary,
            ]
        );
        let panel = poller.panel();
        assert!(!panel.visible);
        assert!(!panel.running);
        assert_eq!(panel.message, "done");
        assert!(!poller.is_polling());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn second_start_replaces_the_live_timer() {
        let job = ScriptedJob::new(fresh_start(), Vec::new());
        let (poller, _events) = JobPoller::new(Arc::clone(&job), PollTiming::default());
        poller.start().await.expect("first start");
        at_ms(job.origin, 400).await;
        poller.start().await.expect("second start");
        assert_eq!(*job.start_calls.lock(), 2);

        at_ms(job.origin, 3010).await;
        // only the second timer (armed at 400 ms) ever ticks
        assert_eq!(job.status_times_ms(), vec![1400, 2400]);
        assert!(poller.is_polling());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn finished_job_stays_visible_for_grace_then_refreshes() {
        let job = ScriptedJob::new(
            fresh_start(),
            vec![Ok(running(5, 10)), Ok(done("更新完成"))],
        );
        let (poller, mut events) = JobPoller::new(Arc::clone(&job), PollTiming::default());
        poller.start().await.expect("start");

        at_ms(job.origin, 2010).await;
        assert!(!poller.is_polling());
        let panel = poller.panel();
        assert!(panel.visible);
        assert!(!panel.running);
        assert_eq!(panel.message, "更新完成");
        assert_eq!(
            drain(&mut events),
            vec![
                JobEvent::Progress(running(5, 10)),
                JobEvent::Finished(done("更新完成")),
            ]
        );

        at_ms(job.origin, 3990).await;
        assert!(poller.panel().visible);
        assert!(drain(&mut events).is_empty());

        at_ms(job.origin, 4010).await;
        assert!(!poller.panel().visible);
        assert_eq!(
            drain(&mut events),
            vec![JobEvent::Hidden, JobEvent::RefreshSummary]
        );
        assert_eq!(job.status_times_ms(), vec![1000, 2000]);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn tick_failure_keeps_polling() {
        let job = ScriptedJob::new(
            fresh_start(),
            vec![
                Err(ClientError::transport("connection reset")),
                Ok(done("ok")),
            ],
        );
        let (poller, _events) = JobPoller::new(Arc::clone(&job), PollTiming::default());
        poller.start().await.expect("start");
        at_ms(job.origin, 1010).await;
        assert!(poller.is_polling());
        at_ms(job.origin, 2010).await;
        assert!(!poller.is_polling());
        assert_eq!(job.status_times_ms(), vec![1000, 2000]);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn failed_start_arms_nothing() {
        let job = ScriptedJob::new(
            Err(ClientError::Rejected {
                code: None,
                message: "更新任务已在运行".into(),
            }),
            Vec::new(),
        );
        let (poller, _events) = JobPoller::new(Arc::clone(&job), PollTiming::default());
        let err = poller.start().await.expect_err("start fails");
        assert_eq!(err.to_string(), "更新任务已在运行");
        assert!(!poller.is_polling());
        assert_eq!(poller.panel(), ProgressPanel::default());
        at_ms(job.origin, 5000).await;
        assert!(job.status_times_ms().is_empty());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn restart_during_grace_keeps_panel_visible() {
        let job = ScriptedJob::new(fresh_start(), vec![Ok(done("done"))]);
        let (poller, mut events) = JobPoller::new(Arc::clone(&job), PollTiming::default());
        poller.start().await.expect("start");
        at_ms(job.origin, 1500).await;
        assert!(!poller.is_polling());

        poller.start().await.expect("restart");
        at_ms(job.origin, 3500).await;
        assert!(poller.panel().visible);
        assert!(!drain(&mut events).contains(&JobEvent::Hidden));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn resume_polls_only_a_running_job() {
        let idle = ScriptedJob::new(fresh_start(), vec![Ok(done("idle"))]);
        let (poller, _events) = JobPoller::new(Arc::clone(&idle), PollTiming::default());
        assert!(!poller.resume().await.expect("resume"));
        assert!(!poller.is_polling());
        assert!(!poller.panel().visible);

        let busy = ScriptedJob::new(fresh_start(), vec![Ok(running(3, 4))]);
        let (poller, _events) = JobPoller::new(Arc::clone(&busy), PollTiming::default());
        assert!(poller.resume().await.expect("resume"));
        assert!(poller.is_polling());
        assert!(poller.panel().visible);
        assert_eq!(*busy.start_calls.lock(), 0);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn cancel_stops_ticks() {
        let job = ScriptedJob::new(fresh_start(), Vec::new());
        let (poller, _events) = JobPoller::new(Arc::clone(&job), PollTiming::default());
        poller.start().await.expect("start");
        at_ms(job.origin, 1010).await;
        poller.cancel();
        assert!(!poller.is_polling());
        at_ms(job.origin, 4000).await;
        assert_eq!(job.status_times_ms(), vec![1000]);
    }

    #[test]
    fn overwrite_only_applies_to_full_updates() {
        struct NoData;

        #[async_trait]
        impl DataApi for NoData {
            async fn start_update(&self, _request: UpdateRequest) -> Result<JobStart> {
                Ok(JobStart::default())
            }

            async fn update_progress(&self) -> Result<JobProgress> {
                Ok(JobProgress::default())
            }

            async fn data_status(&self) -> Result<DataStatus> {
                Ok(DataStatus::default())
            }
        }

        let job = DataUpdateJob::new(Arc::new(NoData));
        job.configure(UpdateKind::Incremental, true);
        assert!(!job.request().overwrite_mode);
        job.configure(UpdateKind::Full, true);
        assert!(job.request().overwrite_mode);
    }
}
