//! Telemetry drain: background consumer feeding the persistence sink

use crate::error::{ProbeError, Result};
use crate::handler::Persistence;
use crate::queue::{PendingQueue, TelemetryBlock};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

type CompletionHook = Box<dyn FnOnce() + Send + 'static>;

/// Drain thread plus the queue it consumes
///
/// [`shutdown`](Self::shutdown) pushes the sentinel and waits for the thread
/// to finish; calling it again is a no-op. Dropping an unfinished pipeline
/// shuts it down, so a failed or panicking session still drains.
pub struct TelemetryPipeline<P> {
    queue: Arc<PendingQueue>,
    drain: Option<JoinHandle<P>>,
    persistence: Option<P>,
}

impl<P: Persistence> TelemetryPipeline<P> {
    /// Start the drain thread
    ///
    /// `on_complete` runs on the drain thread right after the sentinel.
    pub fn start<F>(persistence: P, on_complete: F) -> Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let queue = Arc::new(PendingQueue::new());
        let drain = {
            let queue = Arc::clone(&queue);
            let on_complete: CompletionHook = Box::new(on_complete);
            thread::Builder::new()
                .name("venom-probe-drain".to_string())
                .spawn(move || drain_loop(&queue, persistence, on_complete))
                .map_err(|source| ProbeError::ThreadSpawn {
                    name: "drain",
                    source,
                })?
        };

        Ok(Self {
            queue,
            drain: Some(drain),
            persistence: None,
        })
    }

    pub fn queue(&self) -> &PendingQueue {
        &self.queue
    }

    /// Whether the drain has been shut down
    pub fn is_finished(&self) -> bool {
        self.drain.is_none()
    }

    /// End the stream and wait until every queued block is persisted
    pub fn shutdown(&mut self) -> Result<()> {
        let Some(drain) = self.drain.take() else {
            return Ok(());
        };
        self.queue.push(TelemetryBlock::sentinel());
        match drain.join() {
            Ok(persistence) => {
                self.persistence = Some(persistence);
                Ok(())
            }
            Err(_) => Err(ProbeError::Handler("telemetry drain panicked".to_string())),
        }
    }

    /// The sink, handed back once the drain has finished
    pub fn take_persistence(&mut self) -> Option<P> {
        self.persistence.take()
    }
}

impl<P> Drop for TelemetryPipeline<P> {
    fn drop(&mut self) {
        if let Some(drain) = self.drain.take() {
            self.queue.push(TelemetryBlock::sentinel());
            let _ = drain.join();
        }
    }
}

fn drain_loop<P: Persistence>(
    queue: &PendingQueue,
    mut persistence: P,
    on_complete: CompletionHook,
) -> P {
    let mut blocks = 0u64;
    let mut bytes = 0u64;
    loop {
        let block = queue.pop();
        if block.is_sentinel() {
            persistence.finish();
            on_complete();
            tracing::info!(blocks, bytes, "telemetry drain finished");
            return persistence;
        }
        persistence.save_block(block.as_bytes());
        blocks += 1;
        bytes += block.len() as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::MemoryPersistence;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_blocks_persisted_in_order_then_complete_once() {
        let completions = Arc::new(AtomicUsize::new(0));
        let mut pipeline = TelemetryPipeline::start(MemoryPersistence::default(), {
            let completions = Arc::clone(&completions);
            move || {
                completions.fetch_add(1, Ordering::SeqCst);
            }
        })
        .unwrap();

        for i in 1..=5u8 {
            pipeline.queue().push(TelemetryBlock::new(vec![i; 8]));
        }
        assert_eq!(completions.load(Ordering::SeqCst), 0);

        pipeline.shutdown().unwrap();
        assert_eq!(completions.load(Ordering::SeqCst), 1);

        let sink = pipeline.take_persistence().unwrap();
        assert!(sink.finished);
        let firsts: Vec<u8> = sink.blocks.iter().map(|b| b[0]).collect();
        assert_eq!(firsts, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let completions = Arc::new(AtomicUsize::new(0));
        let mut pipeline = TelemetryPipeline::start(MemoryPersistence::default(), {
            let completions = Arc::clone(&completions);
            move || {
                completions.fetch_add(1, Ordering::SeqCst);
            }
        })
        .unwrap();

        pipeline.shutdown().unwrap();
        pipeline.shutdown().unwrap();
        assert!(pipeline.is_finished());
        assert_eq!(completions.load(Ordering::SeqCst), 1);
        // Nothing left behind for a second consumer
        assert!(pipeline.queue().is_empty());
    }

    #[test]
    fn test_drop_finishes_drain() {
        let completions = Arc::new(AtomicUsize::new(0));
        {
            let pipeline = TelemetryPipeline::start(MemoryPersistence::default(), {
                let completions = Arc::clone(&completions);
                move || {
                    completions.fetch_add(1, Ordering::SeqCst);
                }
            })
            .unwrap();
            pipeline.queue().push(TelemetryBlock::new(vec![1]));
        }
        assert_eq!(completions.load(Ordering::SeqCst), 1);
    }
}
