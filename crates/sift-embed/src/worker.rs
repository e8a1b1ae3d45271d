use std::io::{BufRead, BufReader, Write};
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::EmbedError;

/// Frame sent from the coordinator to a worker process.
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum WorkerRequest {
    Init { worker_id: u32 },
    EmbedBatch { texts: Vec<String>, batch_id: u64 },
    Shutdown,
}

/// Frame received from a worker process.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum WorkerResponse {
    InitComplete,
    EmbedComplete {
        batch_id: u64,
        #[serde(default)]
        embeddings: Option<Vec<Vec<f32>>>,
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        duration_ms: u64,
    },
}

/// A single isolated OS process hosting one embedding-model instance.
///
/// Communication is newline-delimited JSON over the child's stdin/stdout.
/// Every call into [`WorkerProcess::embed_batch`] holds the worker's mutex
/// for the duration of the exchange: the model is invoked strictly
/// sequentially even when the coordinator dispatches from multiple threads.
pub struct WorkerProcess {
    id: u32,
    inner: Mutex<WorkerIo>,
}

struct WorkerIo {
    child: Child,
    stdin: std::process::ChildStdin,
    stdout: BufReader<std::process::ChildStdout>,
    next_batch_id: u64,
}

impl WorkerProcess {
    /// Spawn `command` as the worker's backing process and perform the
    /// init handshake. The model itself is loaded lazily by the worker
    /// binary on first `embed_batch`, not here.
    pub fn spawn(id: u32, command: &str, args: &[String]) -> Result<Self, EmbedError> {
        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;

        let stdin = child.stdin.take().ok_or_else(|| {
            EmbedError::Worker(format!("worker {id}: failed to capture stdin"))
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            EmbedError::Worker(format!("worker {id}: failed to capture stdout"))
        })?;

        let worker = Self {
            id,
            inner: Mutex::new(WorkerIo {
                child,
                stdin,
                stdout: BufReader::new(stdout),
                next_batch_id: 0,
            }),
        };
        worker.init()?;
        Ok(worker)
    }

    fn init(&self) -> Result<(), EmbedError> {
        let mut guard = self.inner.lock().unwrap();
        Self::send(&mut guard.stdin, &WorkerRequest::Init { worker_id: self.id })?;
        match Self::recv(&mut guard.stdout)? {
            WorkerResponse::InitComplete => Ok(()),
            other => Err(EmbedError::Worker(format!(
                "worker {}: expected init_complete, got {other:?}",
                self.id
            ))),
        }
    }

    /// Embed one batch, blocking until the worker replies. Order of
    /// `texts` is preserved in the returned vector.
    pub fn embed_batch(&self, texts: &[String]) -> Result<(Vec<Vec<f32>>, u64), EmbedError> {
        let mut guard = self.inner.lock().unwrap();
        let batch_id = guard.next_batch_id;
        guard.next_batch_id += 1;

        Self::send(
            &mut guard.stdin,
            &WorkerRequest::EmbedBatch {
                texts: texts.to_vec(),
                batch_id,
            },
        )?;

        match Self::recv(&mut guard.stdout)? {
            WorkerResponse::EmbedComplete {
                batch_id: reply_id,
                embeddings,
                error,
                duration_ms,
            } => {
                if reply_id != batch_id {
                    return Err(EmbedError::Worker(format!(
                        "worker {}: batch id mismatch (sent {batch_id}, got {reply_id})",
                        self.id
                    )));
                }
                if let Some(reason) = error {
                    return Err(EmbedError::Worker(format!(
                        "worker {}: {reason}",
                        self.id
                    )));
                }
                let embeddings = embeddings.ok_or_else(|| {
                    EmbedError::Worker(format!(
                        "worker {}: embed_complete carried neither embeddings nor error",
                        self.id
                    ))
                })?;
                Ok((embeddings, duration_ms))
            }
            other => Err(EmbedError::Worker(format!(
                "worker {}: expected embed_complete, got {other:?}",
                self.id
            ))),
        }
    }

    /// Whether the child process is still running (crash detection).
    pub fn is_alive(&self) -> bool {
        let mut guard = self.inner.lock().unwrap();
        matches!(guard.child.try_wait(), Ok(None))
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    fn send(stdin: &mut std::process::ChildStdin, req: &WorkerRequest) -> Result<(), EmbedError> {
        let mut line = serde_json::to_string(req)?;
        line.push('\n');
        stdin.write_all(line.as_bytes())?;
        stdin.flush()?;
        Ok(())
    }

    fn recv(stdout: &mut BufReader<std::process::ChildStdout>) -> Result<WorkerResponse, EmbedError> {
        let mut line = String::new();
        let n = stdout.read_line(&mut line)?;
        if n == 0 {
            return Err(EmbedError::Worker("worker closed stdout".to_string()));
        }
        Ok(serde_json::from_str(line.trim_end())?)
    }
}

impl Drop for WorkerProcess {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.inner.lock() {
            let _ = Self::send(&mut guard.stdin, &WorkerRequest::Shutdown);
            let _ = guard.child.kill();
            let _ = guard.child.wait();
        }
    }
}
