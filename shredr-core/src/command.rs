//! Turns an [`EraseRequest`] into the command line for the erase utility.
use crate::error::{Error, Result};
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// The erase utility invoked when no other program is configured.
pub const DEFAULT_ERASE_UTILITY: &str = "shred";

/// Lowest number of overwrite passes the utility is asked to perform.
pub const MIN_ITERATIONS: u8 = 1;
/// Highest number of overwrite passes the utility is asked to perform.
pub const MAX_ITERATIONS: u8 = 9;

/// A request to securely erase a file or block device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EraseRequest {
    /// The file or device to overwrite.
    pub path: PathBuf,
    /// Number of overwrite passes. Clamped to `1..=9` when the command is built.
    pub iterations: u8,
    /// Do not round the size up to the next full block.
    pub exact_mode: bool,
    /// Add a final pass of zeros to hide the shredding.
    pub zero_fill: bool,
    /// Ask the utility to report progress on its diagnostic stream.
    pub verbose: bool,
}

impl EraseRequest {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }
}

impl Default for EraseRequest {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            iterations: 3,
            exact_mode: false,
            zero_fill: false,
            verbose: true,
        }
    }
}

/// A fully-resolved erase command, ready to be spawned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EraseCommand {
    pub(crate) program: PathBuf,
    pub(crate) args: Vec<OsString>,
}

impl EraseCommand {
    /// Builds the argument list for `program` from `request`.
    ///
    /// The force flag and iteration count are always present; zero-fill,
    /// exact and verbose flags follow when requested, and the target path is
    /// always last.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the target path is empty or does not
    /// exist.
    pub fn build(program: impl Into<PathBuf>, request: &EraseRequest) -> Result<Self> {
        validate_target(&request.path)?;

        let iterations = request.iterations.clamp(MIN_ITERATIONS, MAX_ITERATIONS);
        let mut args: Vec<OsString> = vec![
            "--force".into(),
            format!("--iterations={iterations}").into(),
        ];
        if request.zero_fill {
            args.push("--zero".into());
        }
        if request.exact_mode {
            args.push("--exact".into());
        }
        if request.verbose {
            args.push("--verbose".into());
        }
        args.push(request.path.clone().into_os_string());

        Ok(Self {
            program: program.into(),
            args,
        })
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    /// The target path, which is always the final argument.
    pub fn target(&self) -> &Path {
        self.args
            .last()
            .map(|arg| Path::new(arg.as_os_str()))
            .unwrap_or_else(|| Path::new(""))
    }

    /// Returns a copy of this command that runs `program` instead.
    pub(crate) fn with_program(&self, program: PathBuf) -> Self {
        Self {
            program,
            args: self.args.clone(),
        }
    }

    /// A [`Command`] that discards stdin/stdout and pipes the diagnostic stream.
    pub fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        command
    }
}

impl fmt::Display for EraseCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", quote(arg))?;
        }
        Ok(())
    }
}

fn quote(arg: &OsStr) -> String {
    let text = arg.to_string_lossy();
    if text.is_empty() || text.contains(char::is_whitespace) {
        format!("'{text}'")
    } else {
        text.into_owned()
    }
}

fn validate_target(path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(Error::Validation {
            path: path.to_path_buf(),
            reason: "no target path given",
        });
    }
    // `exists` follows symlinks, so a dangling link is rejected too.
    if !path.exists() {
        return Err(Error::Validation {
            path: path.to_path_buf(),
            reason: "no such file or device",
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn request_for(file: &NamedTempFile) -> EraseRequest {
        EraseRequest {
            path: file.path().to_path_buf(),
            iterations: 1,
            exact_mode: false,
            zero_fill: false,
            verbose: false,
        }
    }

    fn iterations_arg(command: &EraseCommand) -> String {
        command.args()[1].to_string_lossy().into_owned()
    }

    #[test]
    fn minimal_request_has_force_iterations_and_target() {
        let file = NamedTempFile::new().unwrap();
        let command = EraseCommand::build("shred", &request_for(&file)).unwrap();

        let expected: Vec<OsString> = vec![
            "--force".into(),
            "--iterations=1".into(),
            file.path().as_os_str().to_owned(),
        ];
        assert_eq!(command.args(), expected.as_slice());
        assert_eq!(command.program(), Path::new("shred"));
        assert_eq!(command.target(), file.path());
    }

    #[test]
    fn optional_flags_precede_the_target() {
        let file = NamedTempFile::new().unwrap();
        let request = EraseRequest {
            zero_fill: true,
            exact_mode: true,
            verbose: true,
            ..request_for(&file)
        };
        let command = EraseCommand::build("shred", &request).unwrap();

        let args: Vec<String> = command
            .args()
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(&args[..5], ["--force", "--iterations=1", "--zero", "--exact", "--verbose"]);
        assert_eq!(Path::new(&args[5]), file.path());
    }

    #[test]
    fn iterations_are_clamped_into_range() {
        let file = NamedTempFile::new().unwrap();
        for requested in 0..=u8::MAX {
            let request = EraseRequest {
                iterations: requested,
                ..request_for(&file)
            };
            let command = EraseCommand::build("shred", &request).unwrap();
            let n: u8 = iterations_arg(&command)
                .trim_start_matches("--iterations=")
                .parse()
                .unwrap();
            assert!((MIN_ITERATIONS..=MAX_ITERATIONS).contains(&n), "{requested} -> {n}");
        }

        let low = EraseRequest { iterations: 0, ..request_for(&file) };
        let high = EraseRequest { iterations: 42, ..request_for(&file) };
        assert_eq!(iterations_arg(&EraseCommand::build("shred", &low).unwrap()), "--iterations=1");
        assert_eq!(iterations_arg(&EraseCommand::build("shred", &high).unwrap()), "--iterations=9");
    }

    #[test]
    fn missing_target_is_a_validation_error() {
        let request = EraseRequest::new("/dev/shredr-test-does-not-exist");
        match EraseCommand::build("shred", &request) {
            Err(Error::Validation { path, .. }) => {
                assert_eq!(path, Path::new("/dev/shredr-test-does-not-exist"));
            }
            other => panic!("expected a validation error, got {other:?}"),
        }
    }

    #[test]
    fn empty_target_is_a_validation_error() {
        let request = EraseRequest::new("");
        assert!(matches!(
            EraseCommand::build("shred", &request),
            Err(Error::Validation { .. })
        ));
    }

    #[test]
    fn display_quotes_paths_with_spaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("my file.bin");
        std::fs::write(&path, b"secret").unwrap();

        let command = EraseCommand::build("shred", &EraseRequest {
            iterations: 2,
            verbose: false,
            ..EraseRequest::new(&path)
        })
        .unwrap();
        assert_eq!(
            command.to_string(),
            format!("shred --force --iterations=2 '{}'", path.display())
        );
    }
}
