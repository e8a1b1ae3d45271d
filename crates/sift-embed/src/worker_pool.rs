use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::error::EmbedError;
use crate::provider::{
    EmbedOptions, EmbedPerformance, EmbedResult, EmbeddingProvider, ProviderHealth,
    ProviderMetadata, ProviderMetrics,
};
use crate::worker::WorkerProcess;

/// How to launch a worker's backing process.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: String,
    pub args: Vec<String>,
}

/// In-process embedding provider backed by a fixed pool of OS-process
/// workers, each hosting exactly one model instance behind a mutex.
///
/// Order preservation: `embed_batch` splits the input into
/// `max_batch_size`-sized groups, dispatches each group to a worker on its
/// own thread, and reassembles results by group index — regardless of
/// which worker finishes first.
pub struct WorkerPoolProvider {
    metadata: ProviderMetadata,
    command: WorkerCommand,
    workers: Mutex<Vec<Arc<WorkerProcess>>>,
    requests_total: AtomicU64,
    requests_failed: AtomicU64,
    texts_embedded: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl WorkerPoolProvider {
    pub fn new(metadata: ProviderMetadata, command: WorkerCommand, pool_size: usize) -> Result<Self, EmbedError> {
        let mut workers = Vec::with_capacity(pool_size);
        for id in 0..pool_size as u32 {
            workers.push(Arc::new(WorkerProcess::spawn(
                id,
                &command.program,
                &command.args,
            )?));
        }
        Ok(Self {
            metadata,
            command,
            workers: Mutex::new(workers),
            requests_total: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
            texts_embedded: AtomicU64::new(0),
            last_error: Mutex::new(None),
        })
    }

    /// Current number of live workers (used by the resource guard to decide
    /// whether scaling is possible).
    pub fn worker_count(&self) -> usize {
        self.workers.lock().unwrap().len()
    }

    /// Replace any worker whose process has exited with a freshly spawned
    /// one. Called by the orchestrator after observing a crash.
    pub fn reap_and_respawn(&self) -> Result<usize, EmbedError> {
        let mut workers = self.workers.lock().unwrap();
        let mut replaced = 0;
        for slot in workers.iter_mut() {
            if !slot.is_alive() {
                let id = slot.id();
                *slot = Arc::new(WorkerProcess::spawn(
                    id,
                    &self.command.program,
                    &self.command.args,
                )?);
                replaced += 1;
            }
        }
        Ok(replaced)
    }

    /// Add one worker to the pool. The orchestrator's resource guard calls
    /// this when memory/CPU headroom allows scaling up.
    pub fn spawn_worker(&self) -> Result<(), EmbedError> {
        let mut workers = self.workers.lock().unwrap();
        let id = workers.len() as u32;
        workers.push(Arc::new(WorkerProcess::spawn(
            id,
            &self.command.program,
            &self.command.args,
        )?));
        Ok(())
    }

    /// Remove the last worker from the pool (process exits on drop). The
    /// resource guard calls this to reclaim memory under pressure.
    pub fn shrink_worker(&self) -> bool {
        self.workers.lock().unwrap().pop().is_some()
    }

    fn worker_for(&self, group_index: usize) -> Option<Arc<WorkerProcess>> {
        let workers = self.workers.lock().unwrap();
        if workers.is_empty() {
            return None;
        }
        Some(Arc::clone(&workers[group_index % workers.len()]))
    }
}

impl EmbeddingProvider for WorkerPoolProvider {
    fn metadata(&self) -> &ProviderMetadata {
        &self.metadata
    }

    fn embed_batch(&self, texts: &[String], _options: &EmbedOptions) -> Result<EmbedResult, EmbedError> {
        let start = Instant::now();
        self.requests_total.fetch_add(1, Ordering::Relaxed);

        if texts.is_empty() {
            return Ok(EmbedResult {
                embeddings: Vec::new(),
                metadata: self.metadata.clone(),
                performance: EmbedPerformance {
                    duration: start.elapsed(),
                    batch_size: 0,
                },
            });
        }

        let groups: Vec<&[String]> = texts.chunks(self.metadata.max_batch_size.max(1)).collect();
        let mut slots: Vec<Option<Vec<Vec<f32>>>> = vec![None; groups.len()];

        let result: Result<(), EmbedError> = std::thread::scope(|scope| {
            let handles: Vec<_> = groups
                .iter()
                .enumerate()
                .map(|(i, group)| {
                    let worker = self.worker_for(i);
                    scope.spawn(move || -> Result<(usize, Vec<Vec<f32>>), EmbedError> {
                        let worker = worker.ok_or_else(|| {
                            EmbedError::Internal("worker pool is empty".to_string())
                        })?;
                        let (embeddings, _duration_ms) = worker.embed_batch(group)?;
                        Ok((i, embeddings))
                    })
                })
                .collect();

            for handle in handles {
                match handle.join() {
                    Ok(Ok((i, embeddings))) => slots[i] = Some(embeddings),
                    Ok(Err(e)) => return Err(e),
                    Err(_) => return Err(EmbedError::Internal("worker thread panicked".to_string())),
                }
            }
            Ok(())
        });

        if let Err(e) = result {
            self.requests_failed.fetch_add(1, Ordering::Relaxed);
            *self.last_error.lock().unwrap() = Some(e.to_string());
            return Err(e);
        }

        let embeddings: Vec<Vec<f32>> = slots
            .into_iter()
            .flatten()
            .flatten()
            .collect();

        self.texts_embedded
            .fetch_add(embeddings.len() as u64, Ordering::Relaxed);

        Ok(EmbedResult {
            embeddings,
            metadata: self.metadata.clone(),
            performance: EmbedPerformance {
                duration: start.elapsed(),
                batch_size: texts.len(),
            },
        })
    }

    fn health(&self) -> ProviderHealth {
        let ready = self.workers.lock().unwrap().iter().any(|w| w.is_alive());
        ProviderHealth {
            ready,
            last_error: self.last_error.lock().unwrap().clone(),
        }
    }

    fn metrics(&self) -> ProviderMetrics {
        ProviderMetrics {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            texts_embedded: self.texts_embedded.load(Ordering::Relaxed),
            mean_latency: std::time::Duration::default(),
        }
    }
}
