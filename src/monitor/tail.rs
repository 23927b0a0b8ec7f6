//! Tail sources: incremental readers of a growing status stream.
//!
//! Both variants hand raw, non-line-aligned byte chunks to the session and
//! never look at the content.
//!
//! - [`LocalFileTail`] re-reads a local file from a remembered byte offset and
//!   starts over from the beginning when the file shrinks (truncation or
//!   rotation).
//! - [`RemoteTail`] follows the output of a long-lived process, typically
//!   `adb shell` running a wait-then-`tail -F` script. Reader threads move
//!   stdout and stderr into one crossbeam channel; `poll()` only drains that
//!   channel and never blocks.

use crate::error::TailError;
use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Bytes read by one poll
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TailChunk {
    pub data: Vec<u8>,
    /// The source restarted from the beginning of its stream
    pub rewound: bool,
}

impl TailChunk {
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A pollable byte stream feeding the line reassembler.
pub trait TailSource: Send {
    /// Return whatever arrived since the last poll; empty when nothing did.
    fn poll(&mut self) -> Result<TailChunk, TailError>;

    /// Short description for logs and status lines
    fn describe(&self) -> String;

    /// Release the underlying resource
    fn stop(&mut self) {}
}

/// Tail of a local file by byte offset.
#[derive(Debug)]
pub struct LocalFileTail {
    path: PathBuf,
    offset: u64,
}

impl LocalFileTail {
    /// Tail `path` from its beginning, so blocks already in the file are read first.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        LocalFileTail {
            path: path.into(),
            offset: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }
}

impl TailSource for LocalFileTail {
    fn poll(&mut self) -> Result<TailChunk, TailError> {
        // The stress tool creates its status file after start-up
        let len = match fs::metadata(&self.path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(TailChunk::default()),
            Err(e) => return Err(TailError::Io(e)),
        };

        let mut rewound = false;
        if len < self.offset {
            log::info!(
                "[Tail] {} shrank ({} < {}), re-reading from start",
                self.path.display(),
                len,
                self.offset
            );
            self.offset = 0;
            rewound = true;
        }
        if len == self.offset {
            return Ok(TailChunk {
                data: Vec::new(),
                rewound,
            });
        }

        let mut file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(TailChunk::default()),
            Err(e) => return Err(TailError::Io(e)),
        };
        file.seek(SeekFrom::Start(self.offset))?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        self.offset += data.len() as u64;

        Ok(TailChunk { data, rewound })
    }

    fn describe(&self) -> String {
        format!("file {} pos={}", self.path.display(), self.offset)
    }
}

/// Build the remote shell script that waits for `path` to exist, then follows
/// it from its current end. Nothing left over from an earlier run is replayed.
/// The shell execs into `tail`, so killing the spawned process ends the follow.
pub fn wait_and_tail_script(path: &str, wait: Duration) -> String {
    let path = shell_quote(path);
    format!(
        "while [ ! -e {path} ]; do sleep {wait}; done; exec tail -n 0 -F {path} 2>/dev/null",
        path = path,
        wait = wait.as_secs_f64()
    )
}

/// Single-quote `s` for a POSIX shell. Nothing inside is expanded.
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

enum StreamMessage {
    Chunk(Vec<u8>),
    Closed,
    Failed(String),
}

/// Tail of a spawned process's merged stdout/stderr.
pub struct RemoteTail {
    label: String,
    child: Child,
    rx: Receiver<StreamMessage>,
    open_streams: usize,
    failure: Option<String>,
    lost: bool,
    readers: Vec<JoinHandle<()>>,
}

impl RemoteTail {
    /// Spawn `command` with piped output and start the reader threads.
    pub fn spawn(mut command: Command) -> Result<Self, TailError> {
        let label = format!("{:?}", command);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|e| TailError::Spawn {
            cmd: label.clone(),
            reason: e.to_string(),
        })?;

        let (tx, rx) = unbounded::<StreamMessage>();
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(stderr, tx));
        }

        log::info!("[Tail] Spawned remote tail: {}", label);
        Ok(RemoteTail {
            label,
            child,
            rx,
            open_streams: readers.len(),
            failure: None,
            lost: false,
            readers,
        })
    }

    /// Follow `remote_path` on a device through `adb shell`.
    pub fn adb(
        adb_path: &str,
        serial: Option<&str>,
        remote_path: &str,
        wait: Duration,
    ) -> Result<Self, TailError> {
        let mut command = Command::new(adb_path);
        if let Some(serial) = serial {
            command.arg("-s").arg(serial);
        }
        // adb shell hands a single string to the device shell
        command.arg("shell").arg(wait_and_tail_script(remote_path, wait));
        Self::spawn(command)
    }

    fn exit_description(&mut self) -> String {
        match self.child.try_wait() {
            Ok(Some(status)) => status.to_string(),
            Ok(None) => "output closed".to_string(),
            Err(e) => e.to_string(),
        }
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut reader: R, tx: Sender<StreamMessage>) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut buf = [0u8; 4096];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => {
                    let _ = tx.send(StreamMessage::Closed);
                    break;
                }
                Ok(n) => {
                    if tx.send(StreamMessage::Chunk(buf[..n].to_vec())).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    let _ = tx.send(StreamMessage::Failed(e.to_string()));
                    break;
                }
            }
        }
    })
}

impl TailSource for RemoteTail {
    fn poll(&mut self) -> Result<TailChunk, TailError> {
        let mut data = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(StreamMessage::Chunk(chunk)) => data.extend_from_slice(&chunk),
                Ok(StreamMessage::Closed) => {
                    self.open_streams = self.open_streams.saturating_sub(1);
                }
                Ok(StreamMessage::Failed(reason)) => {
                    self.open_streams = self.open_streams.saturating_sub(1);
                    self.failure = Some(reason);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    // Every reader is gone but not all of them reported end of stream
                    if self.open_streams > 0 {
                        self.lost = true;
                    }
                    self.open_streams = 0;
                    break;
                }
            }
        }

        // Hand over what arrived before reporting the end of the stream
        if !data.is_empty() {
            return Ok(TailChunk {
                data,
                rewound: false,
            });
        }
        if let Some(reason) = self.failure.take() {
            return Err(TailError::Io(io::Error::new(io::ErrorKind::Other, reason)));
        }
        if std::mem::take(&mut self.lost) {
            return Err(TailError::Disconnected);
        }
        if self.open_streams == 0 {
            return Err(TailError::ProcessExited(self.exit_description()));
        }
        Ok(TailChunk::default())
    }

    fn describe(&self) -> String {
        format!("process {}", self.label)
    }

    fn stop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
        }
        let _ = self.child.wait();
        // Readers exit on their own once every holder of the pipes is gone;
        // a grandchild may keep them open, so do not join here.
        self.readers.clear();
        log::info!("[Tail] Stopped remote tail: {}", self.label);
    }
}

impl Drop for RemoteTail {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}
