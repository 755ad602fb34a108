//! Load driver.
//!
//! Keeps a pool of simulated users sized by the active [`LoadSchedule`]
//! phase. Each user is its own task running one request at a time:
//!
//! ```text
//! Spawned -> Running (generate -> call -> record -> wait -> repeat) -> Stopped
//! ```
//!
//! Stopping is graceful. A user selected for removal leaves the live count
//! immediately but finishes (and records) any in-flight request before it
//! exits. At the end of the run every user is signalled and the driver waits
//! at most one request timeout plus a second. Requests still running after
//! that are halted and recorded as timeouts.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::client::NiceClient;
use crate::config::LoadConfig;
use crate::error::{Error, Operation};
use crate::metrics::{self, OutcomeSink, RequestOutcome, Stats};
use crate::payload;
use crate::schedule::{RampPlanner, RampStep};

/// Extra time granted to in-flight requests at shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// One simulated user.
struct SimulatedUser<S> {
    id: usize,
    client: NiceClient,
    sink: Arc<S>,
    min_wait_ms: u64,
    max_wait_ms: u64,
    stop: watch::Receiver<bool>,
    /// Shared by all users; set once the shutdown deadline passes.
    halt: watch::Receiver<bool>,
    rng: StdRng,
}

impl<S: OutcomeSink> SimulatedUser<S> {
    async fn run(mut self) {
        debug!(user = self.id, "User started");

        loop {
            if *self.stop.borrow() {
                break;
            }

            let request = payload::request_payload(&mut self.rng);
            let started = Instant::now();
            let result = tokio::select! {
                result = self.client.send_request(&request) => result,
                _ = halted(&mut self.halt) => Err(Error::Timeout {
                    op: Operation::Read,
                    timeout: started.elapsed(),
                }),
            };
            if let Err(ref e) = result {
                debug!(user = self.id, kind = ?e.kind(), error = %e, "Request failed");
            }
            self.sink.record(RequestOutcome::from_result(result));

            let wait = Duration::from_millis(self.rng.gen_range(self.min_wait_ms..=self.max_wait_ms));
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                // a stop signal or a dropped sender both end the loop
                _ = self.stop.changed() => break,
            }
        }

        debug!(user = self.id, "User stopped");
    }
}

async fn halted(halt: &mut watch::Receiver<bool>) {
    // a dropped sender means the driver is gone, which halts as well
    let _ = halt.wait_for(|halted| *halted).await;
}

/// Handle the driver keeps for a running user.
struct UserHandle {
    id: usize,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// What happened during a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverReport {
    /// Users ever started.
    pub spawned: usize,
    pub peak_users: usize,
    /// Schedule phases the run reached.
    pub phases_entered: usize,
    /// Live users when scheduling halted.
    pub users_at_end: usize,
    /// Users whose in-flight request was halted at the shutdown deadline.
    pub aborted: usize,
    /// Halted by the shutdown signal rather than schedule exhaustion.
    pub interrupted: bool,
}

pub struct LoadDriver<S> {
    config: LoadConfig,
    client: NiceClient,
    sink: Arc<S>,
    users: Vec<UserHandle>,
    retiring: Vec<JoinHandle<()>>,
    planner: RampPlanner,
    halt: watch::Sender<bool>,
    drain_timeout: Duration,
    next_id: usize,
    report: DriverReport,
}

impl<S: OutcomeSink> LoadDriver<S> {
    pub fn new(config: LoadConfig, sink: Arc<S>) -> Self {
        let client = NiceClient::new(config.host.clone(), config.port, config.timeout);
        let (halt, _) = watch::channel(false);
        let drain_timeout = config.timeout + SHUTDOWN_GRACE;
        Self {
            config,
            client,
            sink,
            users: Vec::new(),
            retiring: Vec::new(),
            planner: RampPlanner::new(),
            halt,
            drain_timeout,
            next_id: 0,
            report: DriverReport::default(),
        }
    }

    /// How long stopped users may keep running at the end of a run before
    /// their requests are halted. Defaults to the request timeout plus one
    /// second.
    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    pub fn active_users(&self) -> usize {
        self.users.len()
    }

    /// Follow the schedule until it is exhausted or `shutdown` resolves.
    pub async fn run<F>(mut self, shutdown: F) -> DriverReport
    where
        F: Future<Output = ()>,
    {
        let start = Instant::now();
        let mut last_tick = start;
        let mut current_phase = None;

        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = &mut shutdown => {
                    info!("Shutdown requested, stopping users");
                    self.report.interrupted = true;
                    break;
                }
            }

            let now = Instant::now();
            let elapsed = now.duration_since(start);
            let dt = now.duration_since(last_tick);
            last_tick = now;

            let Some(phase) = self.config.schedule.tick(elapsed).copied() else {
                info!(elapsed_secs = elapsed.as_secs(), "Load schedule complete");
                break;
            };

            if current_phase != Some(phase.until) {
                info!(
                    target_users = phase.users,
                    spawn_rate = phase.spawn_rate,
                    until_secs = phase.until.as_secs(),
                    "Entering load phase"
                );
                current_phase = Some(phase.until);
                self.report.phases_entered += 1;
            }

            self.reap();
            match self
                .planner
                .step(self.users.len(), phase.users, phase.spawn_rate, dt)
            {
                RampStep::Hold => {}
                RampStep::Spawn(n) => (0..n).for_each(|_| self.spawn_user()),
                RampStep::Stop(n) => (0..n).for_each(|_| self.stop_user()),
            }
            self.report.peak_users = self.report.peak_users.max(self.users.len());
        }

        self.report.users_at_end = self.users.len();
        self.shutdown().await;
        self.report
    }

    fn spawn_user(&mut self) {
        let id = self.next_id;
        self.next_id += 1;

        let (stop_tx, stop_rx) = watch::channel(false);
        let user = SimulatedUser {
            id,
            client: self.client.clone(),
            sink: Arc::clone(&self.sink),
            min_wait_ms: self.config.min_wait.as_millis() as u64,
            max_wait_ms: self.config.max_wait.as_millis() as u64,
            stop: stop_rx,
            halt: self.halt.subscribe(),
            rng: StdRng::from_entropy(),
        };

        let task = tokio::spawn(user.run());
        self.users.push(UserHandle {
            id,
            stop: stop_tx,
            task,
        });
        self.report.spawned += 1;
    }

    /// Signal the newest user; its in-flight request is left to finish.
    fn stop_user(&mut self) {
        if let Some(user) = self.users.pop() {
            debug!(user = user.id, "Stopping user");
            let _ = user.stop.send(true);
            self.retiring.push(user.task);
        }
    }

    /// Drop bookkeeping for tasks that have already exited.
    fn reap(&mut self) {
        self.users.retain(|user| {
            let alive = !user.task.is_finished();
            if !alive {
                warn!(user = user.id, "User exited unexpectedly");
            }
            alive
        });
        self.retiring.retain(|task| !task.is_finished());
    }

    async fn shutdown(&mut self) {
        while !self.users.is_empty() {
            self.stop_user();
        }

        let deadline = tokio::time::Instant::now() + self.drain_timeout;
        let mut stragglers = Vec::new();
        for mut task in self.retiring.drain(..) {
            if tokio::time::timeout_at(deadline, &mut task).await.is_err() {
                stragglers.push(task);
            }
        }
        if stragglers.is_empty() {
            return;
        }

        // halted users record their request as a timeout and exit
        self.report.aborted = stragglers.len();
        warn!(users = stragglers.len(), "Halting requests still in flight");
        self.halt.send_replace(true);

        let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE;
        for mut task in stragglers {
            if tokio::time::timeout_at(deadline, &mut task).await.is_err() {
                warn!("User did not exit after halt");
                task.abort();
            }
        }
    }
}

/// Run a full load test against the configured target, reporting to a
/// [`Stats`] sink. Ctrl-C ends the run early.
pub async fn run(config: LoadConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!("============================================================");
    info!("NiceProxy TCP Load Test Started");
    info!(host = %config.host, port = config.port, "Target");
    info!(
        phases = config.schedule.phases().len(),
        peak_users = config.schedule.peak_users(),
        duration_secs = config.schedule.total_duration().as_secs(),
        timeout_ms = config.timeout.as_millis() as u64,
        "Load schedule"
    );
    info!("============================================================");

    let stats = Stats::new()?;
    let reporter = tokio::spawn(metrics::report_task(
        Arc::clone(&stats),
        config.report_interval,
    ));

    let driver = LoadDriver::new(config, Arc::clone(&stats));
    let report = driver.run(ctrl_c()).await;
    reporter.abort();

    info!(
        spawned = report.spawned,
        peak_users = report.peak_users,
        phases = report.phases_entered,
        halted = report.aborted,
        interrupted = report.interrupted,
        "Users"
    );
    stats.log_summary();

    info!("============================================================");
    info!("NiceProxy TCP Load Test Completed");
    info!("============================================================");
    Ok(())
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Unable to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
