//! Daemon CLI invocation
//!
//! The daemon's model downloads and unloads go through its `lms` tool rather
//! than the HTTP API. The runner sits behind a trait so tests can assert
//! which invocations happened without spawning anything.

use std::fmt;
use std::io;

use async_trait::async_trait;
use tokio::process::Command;

/// Name of the daemon's command-line tool.
pub const LMS_BIN: &str = "lms";

/// Outcome of one CLI invocation that ran to completion.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Whether the process exited with status zero.
    pub success: bool,
    /// Exit code, absent when the process was killed by a signal.
    pub code: Option<i32>,
    /// Captured stdout followed by captured stderr.
    pub combined: String,
}

/// Spawns daemon CLI processes.
#[async_trait]
pub trait CommandRunner: fmt::Debug + Send + Sync {
    /// Runs `lms` with the given arguments and captures its output.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error when the process cannot be spawned.
    async fn run(&self, args: &[&str]) -> io::Result<CommandOutput>;
}

/// Runner that spawns real `lms` processes.
///
/// The child inherits the caller's environment. `kill_on_drop` ties its
/// lifetime to the dispatch timeout: when the bounding future is dropped,
/// the child is killed rather than left running.
#[derive(Debug, Default)]
pub struct SystemCommandRunner;

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, args: &[&str]) -> io::Result<CommandOutput> {
        let output = Command::new(LMS_BIN)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            combined,
        })
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    //! Recording test double for the CLI seam.

    #![allow(clippy::missing_panics_doc)]

    use std::io;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::{CommandOutput, CommandRunner};

    /// Scripted outcome for one expected invocation.
    #[derive(Debug)]
    pub enum ScriptedRun {
        /// The process ran and produced this outcome.
        Completed(CommandOutput),
        /// The process could not be spawned.
        SpawnError(io::ErrorKind),
    }

    impl ScriptedRun {
        /// A run that exited zero with the given combined output.
        #[must_use]
        pub fn ok(combined: impl Into<String>) -> Self {
            Self::Completed(CommandOutput {
                success: true,
                code: Some(0),
                combined: combined.into(),
            })
        }

        /// A run that exited non-zero with the given combined output.
        #[must_use]
        pub fn fail(code: i32, combined: impl Into<String>) -> Self {
            Self::Completed(CommandOutput {
                success: false,
                code: Some(code),
                combined: combined.into(),
            })
        }
    }

    /// Runner double that records every invocation and plays back scripted
    /// outcomes in order. Invocations past the script succeed with empty
    /// output, so tests only script what they assert.
    #[derive(Debug, Default)]
    pub struct RecordingRunner {
        script: Mutex<Vec<ScriptedRun>>,
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl RecordingRunner {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Queues the outcome for the next unscripted invocation.
        pub fn push(&self, run: ScriptedRun) {
            self.script.lock().unwrap().push(run);
        }

        /// Arguments of every invocation so far.
        #[must_use]
        pub fn calls(&self) -> Vec<Vec<String>> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CommandRunner for RecordingRunner {
        async fn run(&self, args: &[&str]) -> io::Result<CommandOutput> {
            self.calls
                .lock()
                .unwrap()
                .push(args.iter().map(ToString::to_string).collect());

            let next = {
                let mut script = self.script.lock().unwrap();
                if script.is_empty() {
                    None
                } else {
                    Some(script.remove(0))
                }
            };

            match next {
                Some(ScriptedRun::Completed(output)) => Ok(output),
                Some(ScriptedRun::SpawnError(kind)) => Err(io::Error::from(kind)),
                None => Ok(CommandOutput {
                    success: true,
                    code: Some(0),
                    combined: String::new(),
                }),
            }
        }
    }
}
