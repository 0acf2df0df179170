//! Observes a running job on a fixed cadence without ever blocking.
//!
//! The [`PulsePoller`] is the only reader of a job's progress channel and the
//! only writer of [`JobState`]. Each call to [`PulsePoller::tick`] performs a
//! single non-blocking read, so the caller's thread stays responsive no
//! matter how much output the job produces; a backlog is drained one message
//! per tick.
//!
//! Ticks can be driven by hand (which is how the tests feed synthetic ticks)
//! or by [`PulsePoller::run`] with the ticker from [`PulsePoller::ticker`].
use crate::error::{Error, Result};
use crate::supervisor::{JobHandle, ProgressMessage};
use crossbeam_channel::{Receiver, TryRecvError};
use std::time::{Duration, Instant};
use thiserror::Error as ThisError;
use tracing::{debug, info, warn};

/// Interval between two ticks.
pub const DEFAULT_PULSE_PERIOD: Duration = Duration::from_millis(500);
/// Time without any progress message after which a job is declared stalled.
pub const DEFAULT_INACTIVITY_BUDGET: Duration = Duration::from_secs(60);

/// Lifecycle of the observed job.
///
/// `Completed` and `TimedOut` are terminal: the job has been released and a
/// new one may be started straight away.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Running,
    Completed { success: bool },
    TimedOut,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed { .. } | JobState::TimedOut)
    }
}

/// What a single tick observed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PulseEvent {
    /// No job is running.
    Idle,
    /// The job is running but had nothing new to say.
    Waiting { inactive_ticks: u32 },
    /// A line of output from the job.
    Log(String),
    /// The job exited.
    Completed { success: bool, code: i32 },
    /// The job stalled for the whole inactivity budget and was abandoned.
    TimedOut,
    /// Something unexpected happened while observing the job; it was abandoned.
    Fault(String),
}

/// Timing and stall policy for a [`PulsePoller`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollerConfig {
    /// Interval between ticks. A zero period is replaced by
    /// [`DEFAULT_PULSE_PERIOD`].
    pub period: Duration,
    /// Maximum time without a progress message before the job times out.
    pub inactivity_budget: Duration,
    /// Send `SIGTERM` to a stalled job before abandoning it.
    pub terminate_on_stall: bool,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            period: DEFAULT_PULSE_PERIOD,
            inactivity_budget: DEFAULT_INACTIVITY_BUDGET,
            terminate_on_stall: true,
        }
    }
}

/// Failures contained at the tick boundary.
#[derive(Debug, ThisError)]
enum PulseFault {
    #[error("progress channel closed before the erase utility reported its exit")]
    Disconnected,
}

struct ActiveJob {
    handle: JobHandle,
    progress: Receiver<ProgressMessage>,
}

/// Drives [`JobState`] from a job's progress channel.
pub struct PulsePoller {
    config: PollerConfig,
    state: JobState,
    job: Option<ActiveJob>,
    inactive_ticks: u32,
}

impl Default for PulsePoller {
    fn default() -> Self {
        Self::new(PollerConfig::default())
    }
}

impl PulsePoller {
    pub fn new(mut config: PollerConfig) -> Self {
        // Zero would never accumulate towards the budget.
        if config.period.is_zero() {
            warn!(default = ?DEFAULT_PULSE_PERIOD, "zero poll period, using the default");
            config.period = DEFAULT_PULSE_PERIOD;
        }
        Self {
            config,
            state: JobState::Idle,
            job: None,
            inactive_ticks: 0,
        }
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == JobState::Running
    }

    /// Ticks elapsed since the last message from the current job.
    pub fn inactive_ticks(&self) -> u32 {
        self.inactive_ticks
    }

    /// The job currently being observed, if any.
    pub fn job(&self) -> Option<&JobHandle> {
        self.job.as_ref().map(|job| &job.handle)
    }

    /// Begins observing a freshly launched job.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyRunning`] if a job is already being observed;
    /// the new handle is dropped and the running job is left untouched.
    pub fn start(&mut self, handle: JobHandle, progress: Receiver<ProgressMessage>) -> Result<()> {
        if self.is_running() {
            return Err(Error::AlreadyRunning);
        }
        debug!(pid = handle.pid(), target = %handle.target().display(), "observing erase job");
        self.job = Some(ActiveJob { handle, progress });
        self.inactive_ticks = 0;
        self.state = JobState::Running;
        Ok(())
    }

    /// A ticker firing at the configured period.
    pub fn ticker(&self) -> Receiver<Instant> {
        crossbeam_channel::tick(self.config.period)
    }

    /// Runs one pulse. Never fails: problems are reported as
    /// [`PulseEvent::Fault`] and leave the poller idle.
    pub fn tick(&mut self) -> PulseEvent {
        if !self.is_running() {
            return PulseEvent::Idle;
        }

        match self.step() {
            Ok(event) => event,
            Err(fault) => {
                warn!(%fault, "abandoning erase job");
                self.release();
                self.state = JobState::Idle;
                PulseEvent::Fault(fault.to_string())
            }
        }
    }

    /// Ticks on every `ticker` fire until the job leaves `Running`, passing
    /// each event to `on_event`, and returns the final state.
    pub fn run<F>(&mut self, ticker: &Receiver<Instant>, mut on_event: F) -> JobState
    where
        F: FnMut(&PulseEvent),
    {
        while self.is_running() {
            if ticker.recv().is_err() {
                break;
            }
            let event = self.tick();
            on_event(&event);
        }
        self.state
    }

    fn step(&mut self) -> std::result::Result<PulseEvent, PulseFault> {
        let Some(job) = self.job.as_ref() else {
            return Err(PulseFault::Disconnected);
        };

        match job.progress.try_recv() {
            Ok(ProgressMessage::LogLine(line)) => {
                self.inactive_ticks = 0;
                Ok(PulseEvent::Log(line))
            }
            Ok(ProgressMessage::Terminated(code)) => {
                self.inactive_ticks = 0;
                let success = code == 0;
                info!(code, success, "erase job finished");
                self.release();
                self.state = JobState::Completed { success };
                Ok(PulseEvent::Completed { success, code })
            }
            Err(TryRecvError::Empty) => {
                self.inactive_ticks = self.inactive_ticks.saturating_add(1);
                if self.config.period.saturating_mul(self.inactive_ticks) >= self.config.inactivity_budget {
                    self.stall();
                    Ok(PulseEvent::TimedOut)
                } else {
                    Ok(PulseEvent::Waiting {
                        inactive_ticks: self.inactive_ticks,
                    })
                }
            }
            Err(TryRecvError::Disconnected) => Err(PulseFault::Disconnected),
        }
    }

    fn stall(&mut self) {
        warn!(
            budget_secs = self.config.inactivity_budget.as_secs_f64(),
            "no progress from the erase utility, giving up"
        );
        if let Some(job) = self.job.as_ref().filter(|_| self.config.terminate_on_stall) {
            match job.handle.terminate() {
                Ok(true) => {}
                Ok(false) => debug!("erase utility had already exited"),
                Err(e) => warn!(error = %e, "failed to terminate the stalled erase utility"),
            }
        }
        self.release();
        self.state = JobState::TimedOut;
    }

    /// Drops the job handle and channel, freeing the supervisor.
    fn release(&mut self) {
        self.job = None;
        self.inactive_ticks = 0;
    }
}
