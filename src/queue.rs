//! Pending telemetry queue (MPSC, in-process)
//!
//! Producers are the dispatch loop and the final flush; the single consumer
//! is the telemetry drain. The consumer sleeps on a condition variable
//! instead of spinning.
//!
//! # Design
//! - FIFO: pop order is push order
//! - Unbounded: no backpressure towards the target
//! - A zero-length block is the end-of-stream sentinel

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

/// One block read from the telemetry channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryBlock(Vec<u8>);

impl TelemetryBlock {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// The end-of-stream marker
    pub fn sentinel() -> Self {
        Self(Vec::new())
    }

    #[inline]
    pub fn is_sentinel(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

/// Thread-safe FIFO of telemetry blocks
#[derive(Default)]
pub struct PendingQueue {
    blocks: Mutex<VecDeque<TelemetryBlock>>,
    ready: Condvar,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a block and wake the consumer
    pub fn push(&self, block: TelemetryBlock) {
        let mut blocks = self.blocks.lock();
        blocks.push_back(block);
        self.ready.notify_one();
    }

    /// Pop a block, sleeping until one is available
    pub fn pop(&self) -> TelemetryBlock {
        let mut blocks = self.blocks.lock();
        loop {
            if let Some(block) = blocks.pop_front() {
                return block;
            }
            self.ready.wait(&mut blocks);
        }
    }

    pub fn len(&self) -> usize {
        self.blocks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_fifo_order() {
        let queue = PendingQueue::new();
        queue.push(TelemetryBlock::new(vec![1]));
        queue.push(TelemetryBlock::new(vec![2]));
        queue.push(TelemetryBlock::sentinel());

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop().as_bytes(), &[1]);
        assert_eq!(queue.pop().as_bytes(), &[2]);
        assert!(queue.pop().is_sentinel());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_pop_blocks_until_push() {
        let queue = Arc::new(PendingQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop())
        };

        thread::sleep(Duration::from_millis(20));
        queue.push(TelemetryBlock::new(b"late".to_vec()));
        assert_eq!(consumer.join().unwrap().into_bytes(), b"late");
    }

    #[test]
    fn test_concurrent_producers_keep_per_producer_order() {
        let queue = Arc::new(PendingQueue::new());
        let producers: Vec<_> = (0..4u8)
            .map(|p| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..100u8 {
                        queue.push(TelemetryBlock::new(vec![p, i]));
                    }
                })
            })
            .collect();
        for p in producers {
            p.join().unwrap();
        }

        assert_eq!(queue.len(), 400);
        let mut last = [None::<u8>; 4];
        while !queue.is_empty() {
            let block = queue.pop();
            let (p, i) = (block.as_bytes()[0] as usize, block.as_bytes()[1]);
            if let Some(prev) = last[p] {
                assert!(i > prev);
            }
            last[p] = Some(i);
        }
        assert!(last.iter().all(|l| *l == Some(99)));
    }
}
