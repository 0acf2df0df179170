//! Launches the erase utility and turns its lifecycle into a message stream.
//!
//! A job runs as an independent OS process. A dedicated background thread
//! reads the process's diagnostic stream line by line and forwards each line
//! into a bounded channel as [`ProgressMessage::LogLine`]. When the stream
//! closes the thread reaps the process and appends exactly one
//! [`ProgressMessage::Terminated`] carrying the exit code. Nothing else ever
//! enters the channel: every failure that can happen before the process is
//! running is returned synchronously from [`JobSupervisor::launch`].
use crate::command::{DEFAULT_ERASE_UTILITY, EraseCommand, EraseRequest};
use crate::error::{Error, Result};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::process::{Child, ChildStderr, ExitStatus};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Maximum number of progress messages that may queue up in the channel.
///
/// The poller drains one message per tick. When the queue is full the job
/// thread blocks, which in turn stalls the utility on its stderr pipe until
/// the poller catches up.
pub const PROGRESS_CHANNEL_CAPACITY: usize = 4_096;

/// A single observation of a running job, in the order it happened.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProgressMessage {
    /// One line written by the utility to its diagnostic stream.
    LogLine(String),
    /// The utility exited. Always the last message of a job.
    ///
    /// A process killed by a signal reports `128 + signal`.
    Terminated(i32),
}

/// How often the job thread checks for exit once the diagnostic stream closed.
const REAP_INTERVAL: Duration = Duration::from_millis(20);

/// The erase utility's process, shared by the job thread and the [`JobHandle`].
///
/// The child is only ever reaped with the lock held and `code` is set in the
/// same critical section, so a signal sent under the lock never reaches a
/// recycled pid.
#[derive(Debug, Default)]
struct ProcessSlot {
    child: Option<Child>,
    code: Option<i32>,
}

type SharedProcess = Arc<Mutex<ProcessSlot>>;

/// Clears the supervisor's running flag when dropped.
#[derive(Debug)]
struct RunningFlag(Arc<AtomicBool>);

impl Drop for RunningFlag {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Runs at most one erase job at a time.
#[derive(Debug)]
pub struct JobSupervisor {
    program: String,
    active: Arc<AtomicBool>,
}

impl Default for JobSupervisor {
    fn default() -> Self {
        Self::new(DEFAULT_ERASE_UTILITY)
    }
}

impl JobSupervisor {
    /// Creates a supervisor that runs `program`, looked up on `PATH` unless
    /// it contains a path separator.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Whether a launched job has not yet been released.
    pub fn is_running(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Starts erasing `request.path` and returns immediately.
    ///
    /// The returned [`JobHandle`] must be kept alive for as long as the job
    /// is observed; dropping it releases the supervisor for the next launch.
    /// The receiver yields the job's [`ProgressMessage`]s.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyRunning`] if another job has not been released yet.
    /// - [`Error::Validation`] if the request is malformed.
    /// - [`Error::Spawn`] if the utility cannot be found or started.
    ///
    /// None of these leave a job running.
    pub fn launch(&self, request: &EraseRequest) -> Result<(JobHandle, Receiver<ProgressMessage>)> {
        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::AlreadyRunning);
        }
        // Any early return below drops this and clears the flag again.
        let running = RunningFlag(self.active.clone());

        let command = EraseCommand::build(&self.program, request)?;
        let resolved = which::which(&self.program).map_err(|e| Error::Spawn {
            program: self.program.clone(),
            source: io::Error::new(io::ErrorKind::NotFound, e.to_string()),
        })?;
        let command = command.with_program(resolved);

        let mut child = command.to_command().spawn().map_err(|source| Error::Spawn {
            program: self.program.clone(),
            source,
        })?;
        let pid = child.id();

        let Some(stderr) = child.stderr.take() else {
            reap(&mut child);
            return Err(Error::Spawn {
                program: self.program.clone(),
                source: io::Error::other("diagnostic stream was not captured"),
            });
        };

        let (progress_tx, progress_rx) =
            crossbeam_channel::bounded::<ProgressMessage>(PROGRESS_CHANNEL_CAPACITY);
        let process: SharedProcess = Arc::new(Mutex::new(ProcessSlot {
            child: Some(child),
            code: None,
        }));
        let process_clone = process.clone();

        let spawned = thread::Builder::new()
            .name("shredr-job".into())
            .spawn(move || forward(pid, process_clone, stderr, progress_tx));
        if let Err(source) = spawned {
            if let Some(mut child) = process.lock().child.take() {
                reap(&mut child);
            }
            return Err(Error::Spawn {
                program: self.program.clone(),
                source,
            });
        }

        info!(pid, command = %command, "erase job started");

        Ok((
            JobHandle {
                pid,
                command,
                process,
                _running: running,
            },
            progress_rx,
        ))
    }
}

/// Kills and reaps a child that will never be observed.
fn reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Body of the job thread: stream stderr, then reap and report the exit code.
fn forward(
    pid: u32,
    process: SharedProcess,
    stderr: ChildStderr,
    progress: Sender<ProgressMessage>,
) {
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    let mut observed = true;

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                if !observed {
                    continue;
                }
                let line = String::from_utf8_lossy(trim_line_ending(&buf)).into_owned();
                if progress.send(ProgressMessage::LogLine(line)).is_err() {
                    // Keep draining so the utility never blocks on a full pipe.
                    debug!("progress receiver dropped, discarding further output");
                    observed = false;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!(error = %e, "failed to read the diagnostic stream");
                break;
            }
        }
    }

    let code = wait_for_exit(&process);
    info!(pid, code, "erase job exited");

    let _ = progress.send(ProgressMessage::Terminated(code));
}

/// Polls until the process has been reaped, by this thread or by
/// [`JobHandle::terminate`], and returns its exit code.
///
/// The lock is never held across a blocking wait, so `terminate` stays
/// responsive while the utility is still shutting down.
fn wait_for_exit(process: &Mutex<ProcessSlot>) -> i32 {
    loop {
        {
            let mut slot = process.lock();
            if let Some(code) = slot.code {
                return code;
            }
            let Some(child) = slot.child.as_mut() else {
                return -1;
            };
            match child.try_wait() {
                Ok(Some(status)) => {
                    let code = exit_code(status);
                    slot.code = Some(code);
                    return code;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "failed to wait for the erase utility");
                    slot.code = Some(-1);
                    return -1;
                }
            }
        }
        thread::sleep(REAP_INTERVAL);
    }
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

/// Ownership of a launched job.
///
/// Holding the handle keeps the supervisor busy; dropping it releases the
/// supervisor without touching the process itself. Use
/// [`JobHandle::terminate`] to ask the process to stop.
#[derive(Debug)]
pub struct JobHandle {
    pid: u32,
    command: EraseCommand,
    process: SharedProcess,
    _running: RunningFlag,
}

impl JobHandle {
    /// OS process id of the erase utility.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// The command line the job was started with.
    pub fn command(&self) -> &EraseCommand {
        &self.command
    }

    /// The file or device being erased.
    pub fn target(&self) -> &Path {
        self.command.target()
    }

    /// Whether the process has exited and been reaped.
    pub fn has_exited(&self) -> bool {
        self.process.lock().code.is_some()
    }

    /// Sends `SIGTERM` to the process.
    ///
    /// Returns `Ok(false)` if the process had already exited, in which case
    /// no signal is sent. The process cannot be reaped while the signal is
    /// being sent, so its pid is still ours.
    pub fn terminate(&self) -> io::Result<bool> {
        let mut slot = self.process.lock();
        if slot.code.is_some() {
            return Ok(false);
        }
        let Some(child) = slot.child.as_mut() else {
            return Ok(false);
        };
        if let Some(status) = child.try_wait()? {
            slot.code = Some(exit_code(status));
            return Ok(false);
        }
        signal_terminate(self.pid)
    }
}

#[cfg(unix)]
fn signal_terminate(pid: u32) -> io::Result<bool> {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let pid = i32::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    match kill(Pid::from_raw(pid), Signal::SIGTERM) {
        Ok(()) => {
            info!(pid, "sent SIGTERM to the erase utility");
            Ok(true)
        }
        Err(Errno::ESRCH) => Ok(false),
        Err(errno) => Err(errno.into()),
    }
}

#[cfg(not(unix))]
fn signal_terminate(_pid: u32) -> io::Result<bool> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "terminating the erase utility is only supported on unix",
    ))
}

#[cfg(test)]
impl JobHandle {
    /// A handle with no process behind it, for driving the poller by hand.
    pub(crate) fn detached(active: Arc<AtomicBool>) -> Self {
        active.store(true, Ordering::SeqCst);
        Self {
            pid: 0,
            command: EraseCommand {
                program: DEFAULT_ERASE_UTILITY.into(),
                args: vec!["/dev/fake0".into()],
            },
            process: Arc::new(Mutex::new(ProcessSlot {
                child: None,
                code: Some(0),
            })),
            _running: RunningFlag(active),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_endings_are_stripped() {
        assert_eq!(trim_line_ending(b"pass 1/3\n"), b"pass 1/3");
        assert_eq!(trim_line_ending(b"pass 1/3\r\n"), b"pass 1/3");
        assert_eq!(trim_line_ending(b"no newline"), b"no newline");
        assert_eq!(trim_line_ending(b"\n"), b"");
    }

    #[test]
    fn running_flag_clears_on_drop() {
        let flag = Arc::new(AtomicBool::new(true));
        drop(RunningFlag(flag.clone()));
        assert!(!flag.load(Ordering::SeqCst));
    }

    #[cfg(unix)]
    #[test]
    fn reaped_process_is_never_signalled() {
        let child = std::process::Command::new("sh")
            .args(["-c", "exit 3"])
            .spawn()
            .unwrap();
        let pid = child.id();
        let process: SharedProcess = Arc::new(Mutex::new(ProcessSlot {
            child: Some(child),
            code: None,
        }));

        assert_eq!(wait_for_exit(&process), 3);

        let handle = JobHandle {
            pid,
            command: EraseCommand {
                program: "sh".into(),
                args: vec!["/dev/fake0".into()],
            },
            process,
            _running: RunningFlag(Arc::new(AtomicBool::new(true))),
        };
        assert!(handle.has_exited());
        assert!(!handle.terminate().unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn terminate_reaps_an_already_exited_child_instead_of_signalling() {
        let child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        // Let it become a zombie without reaping it.
        while std::fs::read_to_string(format!("/proc/{pid}/stat"))
            .map(|stat| !stat.contains(") Z "))
            .unwrap_or(false)
        {
            std::thread::sleep(Duration::from_millis(5));
        }

        let handle = JobHandle {
            pid,
            command: EraseCommand {
                program: "true".into(),
                args: vec!["/dev/fake0".into()],
            },
            process: Arc::new(Mutex::new(ProcessSlot {
                child: Some(child),
                code: None,
            })),
            _running: RunningFlag(Arc::new(AtomicBool::new(true))),
        };
        assert!(!handle.terminate().unwrap());
        assert!(handle.has_exited());
    }

    #[test]
    fn missing_target_never_marks_the_supervisor_busy() {
        let supervisor = JobSupervisor::new("true");
        let result = supervisor.launch(&EraseRequest::new("/dev/shredr-no-such-device"));

        assert!(matches!(result, Err(Error::Validation { .. })));
        assert!(!supervisor.is_running());
    }

    #[test]
    fn unknown_utility_is_a_spawn_error() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let supervisor = JobSupervisor::new("shredr-utility-that-does-not-exist");
        let result = supervisor.launch(&EraseRequest::new(file.path()));

        match result {
            Err(Error::Spawn { program, source }) => {
                assert_eq!(program, "shredr-utility-that-does-not-exist");
                assert_eq!(source.kind(), io::ErrorKind::NotFound);
            }
            other => panic!("expected a spawn error, got {other:?}"),
        }
        assert!(!supervisor.is_running());
    }
}
