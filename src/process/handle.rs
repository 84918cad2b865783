use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::process::Child;

/// Default cap for one process's captured output
pub const DEFAULT_OUTPUT_LIMIT: usize = 256 * 1024;

/// Which stream a captured line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Bounded line buffer filled by the stream readers.
///
/// Raw bytes come in through `feed`; `\n` and `\r` both end a line so
/// carriage-return progress bars show up as they are drawn. Invalid UTF-8 is
/// replaced, never rejected. Once `limit` bytes of complete lines are held the
/// oldest are dropped first, and an unterminated line is cut at `limit`.
#[derive(Debug)]
pub struct OutputBuffer {
    lines: VecDeque<(OutputStream, String)>,
    bytes: usize,
    limit: usize,
    dropped: usize,
    // unterminated tail per stream, indexed by `slot`
    pending: [Vec<u8>; 2],
    after_cr: [bool; 2],
}

pub type SharedOutput = Arc<Mutex<OutputBuffer>>;

fn slot(stream: OutputStream) -> usize {
    match stream {
        OutputStream::Stdout => 0,
        OutputStream::Stderr => 1,
    }
}

impl OutputBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            bytes: 0,
            limit,
            dropped: 0,
            pending: [Vec::new(), Vec::new()],
            after_cr: [false, false],
        }
    }

    pub fn shared(limit: usize) -> SharedOutput {
        Arc::new(Mutex::new(Self::new(limit)))
    }

    pub fn push(&mut self, stream: OutputStream, line: impl Into<String>) {
        let line = line.into();
        self.bytes += line.len();
        self.lines.push_back((stream, line));

        while self.bytes > self.limit {
            match self.lines.pop_front() {
                Some((_, old)) => {
                    self.bytes -= old.len();
                    self.dropped += 1;
                }
                None => break,
            }
        }
    }

    /// Append a raw chunk read from `stream`.
    pub fn feed(&mut self, stream: OutputStream, chunk: &[u8]) {
        let idx = slot(stream);
        for &byte in chunk {
            match byte {
                b'\n' => {
                    // second half of a \r\n pair
                    if std::mem::take(&mut self.after_cr[idx]) {
                        continue;
                    }
                    self.flush_pending(stream);
                }
                b'\r' => {
                    if !self.pending[idx].is_empty() {
                        self.flush_pending(stream);
                    }
                    self.after_cr[idx] = true;
                }
                _ => {
                    self.after_cr[idx] = false;
                    if self.pending[idx].len() >= self.limit {
                        self.flush_pending(stream);
                    }
                    self.pending[idx].push(byte);
                }
            }
        }
    }

    /// The stream hit EOF; keep whatever was left without a terminator.
    pub fn finish(&mut self, stream: OutputStream) {
        if !self.pending[slot(stream)].is_empty() {
            self.flush_pending(stream);
        }
    }

    fn flush_pending(&mut self, stream: OutputStream) {
        let raw = std::mem::take(&mut self.pending[slot(stream)]);
        let line = String::from_utf8_lossy(&raw).into_owned();
        self.push(stream, line);
    }

    /// Number of lines evicted to stay under the limit since the last `clear`
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty() && self.pending.iter().all(Vec::is_empty)
    }

    /// Render the buffer; stderr lines carry a `[stderr]` prefix.
    /// Unterminated tails come last.
    pub fn snapshot(&self) -> String {
        let mut out = String::with_capacity(self.bytes + self.lines.len() * 10);
        let tails = [OutputStream::Stdout, OutputStream::Stderr]
            .into_iter()
            .filter(|stream| !self.pending[slot(*stream)].is_empty())
            .map(|stream| (stream, String::from_utf8_lossy(&self.pending[slot(stream)]).into_owned()));

        for (stream, line) in self.lines.iter().cloned().chain(tails) {
            if stream == OutputStream::Stderr {
                out.push_str("[stderr] ");
            }
            out.push_str(&line);
            out.push('\n');
        }
        out
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.bytes = 0;
        self.dropped = 0;
        self.pending = [Vec::new(), Vec::new()];
        self.after_cr = [false, false];
    }
}

/// OS process as the registry sees it: an id, a liveness poll and a way to ask it to stop.
pub trait ManagedChild: Send {
    fn pid(&self) -> u32;

    /// Poll the OS. Never blocks and is safe to call repeatedly.
    fn has_exited(&mut self) -> io::Result<bool>;

    /// Ask the process to terminate. Returns once the request is sent; does not wait.
    fn terminate(&mut self) -> io::Result<()>;
}

/// `ManagedChild` over a tokio child process.
pub struct TokioChild {
    child: Child,
    pid: u32,
}

impl TokioChild {
    pub fn new(child: Child) -> io::Result<Self> {
        let pid = child
            .id()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "child exited before PID was read"))?;
        Ok(Self { child, pid })
    }
}

impl ManagedChild for TokioChild {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn has_exited(&mut self) -> io::Result<bool> {
        Ok(self.child.try_wait()?.is_some())
    }

    #[cfg(unix)]
    fn terminate(&mut self) -> io::Result<()> {
        // SIGTERM only; tokio's start_kill would send SIGKILL
        let rc = unsafe { libc::kill(self.pid as libc::pid_t, libc::SIGTERM) };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    #[cfg(not(unix))]
    fn terminate(&mut self) -> io::Result<()> {
        self.child.start_kill()
    }
}

/// Serializable view of a tracked process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub model: String,
    pub pid: u32,
    pub script: PathBuf,
    pub started_at: DateTime<Utc>,
    /// Liveness when this view was taken
    pub running: bool,
}

/// One launched model: the owning name, the OS process and its captured output.
pub struct ProcessHandle {
    info: ProcessInfo,
    child: Box<dyn ManagedChild>,
    output: SharedOutput,
}

impl ProcessHandle {
    pub fn new(model: impl Into<String>, script: PathBuf, child: Box<dyn ManagedChild>, output: SharedOutput) -> Self {
        let info = ProcessInfo {
            model: model.into(),
            pid: child.pid(),
            script,
            started_at: Utc::now(),
            running: true,
        };
        Self { info, child, output }
    }

    pub fn model(&self) -> &str {
        &self.info.model
    }

    pub fn pid(&self) -> u32 {
        self.info.pid
    }

    /// Details recorded at launch; `running` is not refreshed here
    pub fn info(&self) -> &ProcessInfo {
        &self.info
    }

    /// Details with `running` polled from the OS now
    pub fn snapshot(&mut self) -> ProcessInfo {
        let running = self.is_alive();
        ProcessInfo {
            running,
            ..self.info.clone()
        }
    }

    /// Queries the OS every call; nothing is cached.
    /// A failed poll counts as exited.
    pub fn is_alive(&mut self) -> bool {
        match self.child.has_exited() {
            Ok(exited) => !exited,
            Err(e) => {
                tracing::warn!("Error checking status of {} (PID: {}): {}", self.info.model, self.info.pid, e);
                false
            }
        }
    }

    pub fn terminate(&mut self) -> io::Result<()> {
        self.child.terminate()
    }

    pub fn output(&self) -> String {
        self.output.lock().snapshot()
    }

    pub fn clear_output(&self) {
        self.output.lock().clear();
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle").field("info", &self.info).finish_non_exhaustive()
    }
}
