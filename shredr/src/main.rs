use anyhow::{Result, anyhow};
use clap::{Args, Parser, Subcommand};
use console::style;
use dialoguer::{Confirm, Input, Select, theme::ColorfulTheme};
use indicatif::{ProgressBar, ProgressStyle};
use shredr_core::catalog::{DEFAULT_PROTECTED_PATH, DeviceCatalog};
use shredr_core::command::{DEFAULT_ERASE_UTILITY, EraseRequest, MAX_ITERATIONS, MIN_ITERATIONS};
use shredr_core::device::{Device, format_size};
use shredr_core::platform::SysBlockService;
use shredr_core::poller::{
    DEFAULT_INACTIVITY_BUDGET, DEFAULT_PULSE_PERIOD, JobState, PollerConfig, PulseEvent, PulsePoller,
};
use shredr_core::supervisor::JobSupervisor;
use std::io::{IsTerminal, stdout};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::Level;

#[cfg(unix)]
use libc::ECHOCTL;
#[cfg(unix)]
use std::os::unix::io::AsRawFd;
#[cfg(unix)]
use termios::{TCSANOW, Termios, tcsetattr};

#[derive(Parser)]
#[command(name = "shredr")]
#[command(about = "A safe, interactive front-end for shred", version)]
struct Cli {
    /// Increase log output (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Never offer devices mounted under this path
    #[arg(long, global = true, default_value = DEFAULT_PROTECTED_PATH)]
    protected: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Securely erase a device or file interactively
    Erase(EraseArgs),
    /// List devices that may be erased
    List,
}

#[derive(Args)]
struct EraseArgs {
    /// File or device to erase; pick from the device list when omitted
    target: Option<PathBuf>,

    /// Number of overwrite passes, clamped to 1-9
    #[arg(short = 'n', long, default_value_t = 3)]
    iterations: u8,

    /// Finish with a pass of zeros to hide the shredding
    #[arg(short, long)]
    zero: bool,

    /// Do not round the size up to the next full block
    #[arg(short = 'x', long)]
    exact: bool,

    /// Do not stream progress from shred (disables stall detection)
    #[arg(short, long)]
    quiet: bool,

    /// Erase utility to run
    #[arg(long, default_value = DEFAULT_ERASE_UTILITY)]
    utility: String,

    /// Milliseconds between progress checks
    #[arg(long, default_value_t = DEFAULT_PULSE_PERIOD.as_millis() as u64,
          value_parser = clap::value_parser!(u64).range(1..))]
    period_ms: u64,

    /// Seconds without progress before the job is declared stalled
    #[arg(long, default_value_t = DEFAULT_INACTIVITY_BUDGET.as_secs(),
          value_parser = clap::value_parser!(u64).range(1..))]
    stall_secs: u64,

    /// Leave a stalled shred running instead of terminating it
    #[arg(long)]
    no_terminate: bool,
}

impl EraseArgs {
    fn request(&self, target: PathBuf) -> EraseRequest {
        EraseRequest {
            path: target,
            iterations: self.iterations,
            exact_mode: self.exact,
            zero_fill: self.zero,
            verbose: !self.quiet,
        }
    }

    fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            period: Duration::from_millis(self.period_ms),
            // Without progress lines every long pass would look like a stall.
            inactivity_budget: if self.quiet {
                Duration::MAX
            } else {
                Duration::from_secs(self.stall_secs)
            },
            terminate_on_stall: !self.no_terminate,
        }
    }

    /// Whether every progress line is kept rather than only the latest.
    fn keep_lines(&self) -> bool {
        !self.quiet && !stdout().is_terminal()
    }
}

/// A helper struct that, on Unix, disables `ECHOCTL` for the terminal.
///
/// With `ECHOCTL` cleared, Ctrl+C is not echoed as `^C` over the spinner.
/// The original terminal state is restored when this struct is dropped.
struct TermRestorer {
    #[cfg(unix)]
    original_termios: Option<Termios>,
}

impl TermRestorer {
    fn new() -> Self {
        #[cfg(unix)]
        {
            let fd = stdout().as_raw_fd();
            let original_termios = stdout()
                .is_terminal()
                .then(|| Termios::from_fd(fd).ok())
                .flatten()
                .filter(|original| {
                    let mut quiet = *original;
                    quiet.c_lflag &= !ECHOCTL;
                    tcsetattr(fd, TCSANOW, &quiet).is_ok()
                });
            Self { original_termios }
        }
        #[cfg(not(unix))]
        {
            Self {}
        }
    }
}

impl Drop for TermRestorer {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Some(ref original_termios) = self.original_termios {
            tcsetattr(stdout().as_raw_fd(), TCSANOW, original_termios).ok();
        }
    }
}

/// Menu row for a device; ones with mounted filesystems are called out.
fn erase_candidate(device: &Device) -> String {
    if device.mount_paths.is_empty() {
        device.to_string()
    } else {
        format!("{device}  <- IN USE")
    }
}

/// Lets the user pick the device to erase. Esc or `q` cancels.
fn select_erase_target(devices: &[Device]) -> Result<Option<PathBuf>> {
    if devices.is_empty() {
        return Err(anyhow!("No erasable devices found."));
    }

    let items: Vec<String> = devices.iter().map(erase_candidate).collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select the device to ERASE (Esc to cancel)")
        .items(&items)
        .interact_opt()?;

    Ok(selection.map(|index| devices[index].file.clone()))
}

/// Whether `typed` names the target, either by full path or by file name.
fn names_target(typed: &str, target: &Path) -> bool {
    let typed = typed.trim();
    !typed.is_empty()
        && (Path::new(typed) == target
            || target.file_name().is_some_and(|name| name == typed))
}

/// Asks twice before anything is destroyed: a yes/no that defaults to no,
/// then the target's name typed back.
fn confirm_erase(target: &Path) -> Result<bool> {
    let theme = ColorfulTheme::default();
    let proceed = Confirm::with_theme(&theme)
        .with_prompt(format!("Destroy all data on {}?", target.display()))
        .default(false)
        .interact()?;
    if !proceed {
        return Ok(false);
    }

    let name = target
        .file_name()
        .map_or_else(|| target.display().to_string(), |n| n.to_string_lossy().into_owned());
    let typed: String = Input::with_theme(&theme)
        .with_prompt(format!("Type '{name}' to confirm"))
        .allow_empty(true)
        .interact_text()?;

    Ok(names_target(&typed, target))
}

fn refresh_devices(protected: &str) -> Result<Vec<Device>> {
    let catalog = DeviceCatalog::new(SysBlockService::new()).with_protected_path(protected);
    Ok(catalog.refresh()?)
}

/// Warnings only by default so the spinner stays readable.
fn log_level(verbosity: u8) -> Level {
    match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    }
}

fn init_logging(verbosity: u8) {
    tracing_subscriber::fmt()
        .with_max_level(log_level(verbosity))
        .with_writer(std::io::stderr)
        .init();
}

fn list(protected: &str) -> Result<()> {
    let devices = refresh_devices(protected)?;
    if devices.is_empty() {
        println!("No erasable devices found.");
        return Ok(());
    }

    println!("Found {} erasable devices:", devices.len());
    println!(
        "\n  {:<15} {:<30} {:>10}  {}",
        "DEVICE", "MODEL", "SIZE", "MOUNTED AT"
    );
    println!("  {:-<15} {:-<30} {:->10}  {:-<20}", "", "", "", "");
    for device in devices {
        let location = if device.mount_paths.is_empty() {
            "(Not mounted)".to_string()
        } else {
            device.mount_paths.join(", ")
        };
        println!(
            "  {:<15} {:<30} {:>10}  {}",
            device.file.display(),
            device.label(),
            format_size(device.size_bytes),
            location
        );
    }
    Ok(())
}

fn erase(args: EraseArgs, protected: &str, running: Arc<AtomicBool>) -> Result<()> {
    let target = match &args.target {
        Some(path) => path.clone(),
        None => {
            let devices = refresh_devices(protected)?;
            match select_erase_target(&devices)? {
                Some(file) => file,
                None => {
                    println!("Erase operation cancelled.");
                    return Ok(());
                }
            }
        }
    };
    let request = args.request(target);

    println!(
        "{} This will irreversibly destroy all data on '{}'.",
        style("WARNING:").red().bold(),
        request.path.display(),
    );
    println!(
        "  Passes: {}",
        style(request.iterations.clamp(MIN_ITERATIONS, MAX_ITERATIONS)).cyan()
    );
    println!("  Zero:   {}", style(if request.zero_fill { "yes" } else { "no" }).cyan());
    println!();

    if !confirm_erase(&request.path)? {
        println!("Erase operation cancelled.");
        return Ok(());
    }

    println!();

    let supervisor = JobSupervisor::new(&args.utility);
    let (handle, progress) = supervisor.launch(&request)?;

    let mut poller = PulsePoller::new(args.poller_config());
    poller.start(handle, progress)?;

    let pb = ProgressBar::new_spinner();
    pb.set_prefix("Erasing");
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{prefix:12} [{elapsed_precise}] {spinner:.red} {wide_msg}")?,
    );
    pb.set_message(format!("{}", request.path.display()));
    pb.enable_steady_tick(Duration::from_millis(100));

    let mut exit_code = None;
    let mut fault = None;
    let mut interrupted = false;
    let ticker = poller.ticker();
    let state = poller.run(&ticker, |event| {
        if !interrupted && !running.load(Ordering::SeqCst) {
            // The utility shares our process group and got the SIGINT too.
            interrupted = true;
            pb.println(format!("{}", style("Interrupted, waiting for shred to exit...").yellow()));
        }
        match event {
            PulseEvent::Log(line) => {
                if args.keep_lines() {
                    pb.println(line);
                }
                pb.set_message(line.clone());
            }
            PulseEvent::Completed { code, .. } => exit_code = Some(*code),
            PulseEvent::Fault(message) => fault = Some(message.clone()),
            PulseEvent::Idle | PulseEvent::Waiting { .. } | PulseEvent::TimedOut => {}
        }
    });

    match state {
        JobState::Completed { success: true } => {
            pb.finish_with_message("Erase complete.");
            println!(
                "\n✨ Successfully erased {}.",
                style(request.path.display()).cyan()
            );
            Ok(())
        }
        JobState::Completed { success: false } => {
            pb.finish_with_message("❌ Erase failed.");
            Err(anyhow!(
                "{} exited with code {}",
                args.utility,
                exit_code.unwrap_or(-1)
            ))
        }
        JobState::TimedOut => {
            pb.finish_with_message("❌ Erase stalled.");
            let fate = if args.no_terminate {
                "it was left running"
            } else {
                "it was asked to terminate"
            };
            Err(anyhow!(
                "no progress from {} for {} seconds; {fate}",
                args.utility,
                args.stall_secs
            ))
        }
        JobState::Idle | JobState::Running => {
            pb.finish_with_message("❌ Lost track of the erase job.");
            Err(anyhow!(
                fault.unwrap_or_else(|| "erase job ended unexpectedly".to_string())
            ))
        }
    }
}

fn main() -> Result<()> {
    // This guard will be dropped when main() exits, restoring the terminal.
    let _term_restorer = TermRestorer::new();

    // Ctrl+C must not kill us before shred's exit has been observed.
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Erase(args) => erase(args, &cli.protected, running),
        Commands::List => list(&cli.protected),
    }
}
