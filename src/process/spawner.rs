use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::handle::{ManagedChild, OutputBuffer, OutputStream, SharedOutput, TokioChild, DEFAULT_OUTPUT_LIMIT};

/// A freshly started child plus the buffer its output drains into.
pub struct SpawnedChild {
    pub child: Box<dyn ManagedChild>,
    pub output: SharedOutput,
}

/// Starts the OS process for a model script.
pub trait Spawner: Send {
    fn spawn(&self, model: &str, script: &Path, working_dir: &Path) -> io::Result<SpawnedChild>;
}

/// Runs `<interpreter> <script>` with the script's directory as working directory.
/// stdout and stderr are piped and drained in the background, so it must be
/// called from inside a tokio runtime.
#[derive(Debug, Clone)]
pub struct ScriptSpawner {
    interpreter: PathBuf,
    output_limit: usize,
}

impl ScriptSpawner {
    pub fn new(interpreter: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
            output_limit: DEFAULT_OUTPUT_LIMIT,
        }
    }

    pub fn with_output_limit(mut self, limit: usize) -> Self {
        self.output_limit = limit;
        self
    }

    pub fn interpreter(&self) -> &Path {
        &self.interpreter
    }

    fn build_command(&self, script: &Path, working_dir: &Path) -> Command {
        let mut cmd = Command::new(&self.interpreter);
        cmd.arg(script)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }
}

impl Spawner for ScriptSpawner {
    fn spawn(&self, model: &str, script: &Path, working_dir: &Path) -> io::Result<SpawnedChild> {
        // tokio::process panics without a reactor
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "no tokio runtime available to drive the child process",
            ));
        }

        let mut cmd = self.build_command(script, working_dir);
        debug!("Spawning {} with command: {:?}", model, cmd);

        let mut child = cmd.spawn()?;
        let output = OutputBuffer::shared(self.output_limit);

        if let Some(stdout) = child.stdout.take() {
            drain_into(stdout, OutputStream::Stdout, output.clone(), model.to_string());
        }
        if let Some(stderr) = child.stderr.take() {
            drain_into(stderr, OutputStream::Stderr, output.clone(), model.to_string());
        }

        let child = TokioChild::new(child)?;
        Ok(SpawnedChild {
            child: Box::new(child),
            output,
        })
    }
}

const READ_CHUNK: usize = 8 * 1024;

// Consecutive read errors tolerated before a stream is given up on
const MAX_READ_FAILURES: u32 = 3;

/// Copy a child's stream into its buffer until EOF.
/// CRITICAL: the read end must stay open for the life of the child. Dropping it
/// early makes the child's next write fail with EPIPE/SIGPIPE and kills it.
fn drain_into<R>(mut stream: R, kind: OutputStream, output: SharedOutput, model: String)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = vec![0u8; READ_CHUNK];
        let mut failures = 0;
        loop {
            match stream.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => {
                    failures = 0;
                    output.lock().feed(kind, &chunk[..n]);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    failures += 1;
                    warn!("Error reading {} {:?} ({}/{}): {}", model, kind, failures, MAX_READ_FAILURES, e);
                    if failures >= MAX_READ_FAILURES {
                        break;
                    }
                }
            }
        }
        output.lock().finish(kind);
        info!("{} {:?} closed", model, kind);
    });
}
