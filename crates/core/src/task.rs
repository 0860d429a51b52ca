//! The external computation a job runs.
//!
//! [`ExternalTask`] is the seam between the job pipeline and the actual
//! registration / point-transform tools. Implementations run synchronously on
//! a blocking thread and are handed a [`CancellationToken`] they may watch;
//! nothing forces them to. [`CommandTask`] drives the tools as child processes
//! and kills the child once the token is cancelled.

use std::ffi::OsString;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

/// How much of the child's stderr is kept for error reports (64 KiB).
const MAX_STDERR_BYTES: usize = 64 * 1024;

/// How often a running child is checked for exit or cancellation.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Inputs of an image registration. Every path comes from the staging area.
#[derive(Debug, Clone, Serialize)]
pub struct RegistrationSettings {
    pub fixed_image: PathBuf,
    pub moving_image: PathBuf,
    pub initial_transform: Option<PathBuf>,
    /// Parameter files, applied in order.
    pub transforms: Vec<PathBuf>,
    pub output_dir: PathBuf,
    pub threads: Option<u32>,
}

/// Inputs of a point-set transformation.
#[derive(Debug, Clone, Serialize)]
pub struct TransformSettings {
    pub points: PathBuf,
    pub transform: PathBuf,
    pub output_dir: PathBuf,
    pub threads: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskSettings {
    Registration(RegistrationSettings),
    Transform(TransformSettings),
}

impl TaskSettings {
    pub fn output_dir(&self) -> &Path {
        match self {
            Self::Registration(s) => &s.output_dir,
            Self::Transform(s) => &s.output_dir,
        }
    }

    /// Restrict the computation to a single thread.
    pub fn single_thread(mut self) -> Self {
        match &mut self {
            Self::Registration(s) => s.threads = Some(1),
            Self::Transform(s) => s.threads = Some(1),
        }
        self
    }

    /// Command-line arguments understood by the elastix / transformix tools.
    pub fn to_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();
        let mut push = |flag: &str, value: &Path| {
            args.push(flag.into());
            args.push(value.as_os_str().to_owned());
        };

        let (output_dir, threads) = match self {
            Self::Registration(s) => {
                push("-f", &s.fixed_image);
                push("-m", &s.moving_image);
                if let Some(initial) = &s.initial_transform {
                    push("-t0", initial);
                }
                for transform in &s.transforms {
                    push("-p", transform);
                }
                (&s.output_dir, s.threads)
            }
            Self::Transform(s) => {
                push("-def", &s.points);
                push("-tp", &s.transform);
                (&s.output_dir, s.threads)
            }
        };

        args.push("-out".into());
        args.push(output_dir.as_os_str().to_owned());
        if let Some(threads) = threads {
            args.push("-threads".into());
            args.push(threads.to_string().into());
        }
        args
    }
}

// ---------------------------------------------------------------------------
// Task contract
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Failed to start external task: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("I/O error while running external task: {0}")]
    Io(#[source] std::io::Error),

    #[error("External task exited with code {code}: {stderr}")]
    Exit { code: i32, stderr: String },

    #[error("External task was killed by a signal")]
    Killed,

    #[error("External task was cancelled")]
    Cancelled,

    #[error("{0}")]
    Failed(String),
}

/// A long-running computation over staged files.
///
/// `run` blocks until the computation is done. Implementations should poll
/// `cancel` where they can and return [`TaskError::Cancelled`] once it fires.
pub trait ExternalTask: Send + Sync + 'static {
    fn run(&self, settings: &TaskSettings, cancel: &CancellationToken) -> Result<(), TaskError>;
}

impl<F> ExternalTask for F
where
    F: Fn(&TaskSettings, &CancellationToken) -> Result<(), TaskError> + Send + Sync + 'static,
{
    fn run(&self, settings: &TaskSettings, cancel: &CancellationToken) -> Result<(), TaskError> {
        self(settings, cancel)
    }
}

// ---------------------------------------------------------------------------
// Child process implementation
// ---------------------------------------------------------------------------

/// Runs an external binary with the settings rendered as arguments.
#[derive(Debug, Clone)]
pub struct CommandTask {
    program: PathBuf,
    /// Arguments placed before the rendered settings (wrappers, containers).
    base_args: Vec<OsString>,
    poll_interval: Duration,
}

impl CommandTask {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            base_args: Vec::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_base_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.base_args = args.into_iter().map(Into::into).collect();
        self
    }

    fn wait_or_kill(
        &self,
        child: &mut std::process::Child,
        cancel: &CancellationToken,
    ) -> Result<ExitStatus, TaskError> {
        loop {
            if cancel.is_cancelled() {
                // Already exited is fine; wait() reaps it either way.
                let _ = child.kill();
                let _ = child.wait();
                return Err(TaskError::Cancelled);
            }
            if let Some(status) = child.try_wait().map_err(TaskError::Io)? {
                return Ok(status);
            }
            std::thread::sleep(self.poll_interval);
        }
    }
}

impl ExternalTask for CommandTask {
    fn run(&self, settings: &TaskSettings, cancel: &CancellationToken) -> Result<(), TaskError> {
        let mut child = Command::new(&self.program)
            .args(&self.base_args)
            .args(settings.to_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(TaskError::Spawn)?;

        tracing::debug!(program = %self.program.display(), pid = child.id(), "External task started");

        let stderr = child.stderr.take();
        let stderr_reader = std::thread::spawn(move || read_tail(stderr));

        let status = self.wait_or_kill(&mut child, cancel)?;
        let stderr = stderr_reader.join().unwrap_or_default();

        if status.success() {
            return Ok(());
        }
        match status.code() {
            Some(code) => Err(TaskError::Exit { code, stderr }),
            None => Err(TaskError::Killed),
        }
    }
}

/// Drain a stream to EOF, keeping only its last [`MAX_STDERR_BYTES`].
fn read_tail<R: Read>(stream: Option<R>) -> String {
    let Some(mut stream) = stream else {
        return String::new();
    };
    let mut tail = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        match stream.read(&mut chunk) {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                tail.extend_from_slice(&chunk[..n]);
                if tail.len() > MAX_STDERR_BYTES {
                    tail.drain(..tail.len() - MAX_STDERR_BYTES);
                }
            }
        }
    }
    String::from_utf8_lossy(&tail).trim().to_string()
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use assert_matches::assert_matches;

    use super::*;

    fn registration_settings(transforms: usize) -> TaskSettings {
        TaskSettings::Registration(RegistrationSettings {
            fixed_image: "/j/fixed.tif".into(),
            moving_image: "/j/moving.tif".into(),
            initial_transform: None,
            transforms: (0..transforms)
                .map(|i| PathBuf::from(format!("/j/transform_{i}.txt")))
                .collect(),
            output_dir: "/j/output".into(),
            threads: None,
        })
    }

    fn as_strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn registration_args_keep_transform_order() {
        let args = as_strings(registration_settings(2).single_thread().to_args());
        assert_eq!(
            args,
            [
                "-f", "/j/fixed.tif", "-m", "/j/moving.tif", "-p", "/j/transform_0.txt", "-p",
                "/j/transform_1.txt", "-out", "/j/output", "-threads", "1",
            ]
        );
    }

    #[test]
    fn transform_args_include_points_and_parameters() {
        let settings = TaskSettings::Transform(TransformSettings {
            points: "/j/pts.txt".into(),
            transform: "/j/transforms.txt".into(),
            output_dir: "/j/output".into(),
            threads: None,
        });
        let args = as_strings(settings.to_args());
        assert_eq!(
            args,
            ["-def", "/j/pts.txt", "-tp", "/j/transforms.txt", "-out", "/j/output"]
        );
    }

    #[test]
    fn closures_are_tasks() {
        let task = |_: &TaskSettings, _: &CancellationToken| -> Result<(), TaskError> {
            Err(TaskError::Failed("boom".into()))
        };
        let result = task.run(&registration_settings(0), &CancellationToken::new());
        assert_matches!(result, Err(TaskError::Failed(msg)) if msg == "boom");
    }

    #[cfg(unix)]
    #[test]
    fn command_success() {
        let task = CommandTask::new("sh").with_base_args(["-c", "exit 0", "elastix"]);
        task.run(&registration_settings(1), &CancellationToken::new())
            .expect("exit 0");
    }

    #[cfg(unix)]
    #[test]
    fn command_nonzero_exit_reports_stderr() {
        let task =
            CommandTask::new("sh").with_base_args(["-c", "echo bad params >&2; exit 3", "elastix"]);
        let result = task.run(&registration_settings(1), &CancellationToken::new());
        assert_matches!(
            result,
            Err(TaskError::Exit { code: 3, stderr }) if stderr == "bad params"
        );
    }

    #[test]
    fn missing_program_fails_to_spawn() {
        let task = CommandTask::new("/nonexistent/elastix");
        let result = task.run(&registration_settings(0), &CancellationToken::new());
        assert_matches!(result, Err(TaskError::Spawn(_)));
    }

    #[cfg(unix)]
    #[test]
    fn cancellation_kills_the_child() {
        let task = CommandTask::new("sh").with_base_args(["-c", "sleep 5", "elastix"]);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            trigger.cancel();
        });

        let started = Instant::now();
        let result = task.run(&registration_settings(0), &cancel);
        assert_matches!(result, Err(TaskError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
