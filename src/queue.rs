//! Hand-off queue between extraction and indexing workers.
//!
//! A multi-producer, multi-consumer channel of [`Message`]s. Producers push
//! batches of records; once every producer has joined, the orchestrator pushes
//! one [`Message::End`] per consumer so each consumer observes exactly one
//! terminal signal.
//!
//! Order is FIFO per producer only. Consumers must not assume any global
//! arrival order across producers.

use async_channel::{Receiver, Sender, TryRecvError};
use tracing::warn;

use crate::models::Record;

/// One item travelling through the queue.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Data(Vec<Record>),
    End,
}

/// What was still sitting in the queue after every consumer exited.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Leftovers {
    pub end_signals: usize,
    pub data_messages: usize,
    pub records: usize,
}

impl Leftovers {
    pub fn is_empty(&self) -> bool {
        self.end_signals == 0 && self.data_messages == 0
    }
}

/// Cloneable handle onto a shared queue. Every clone pushes to and pops from
/// the same underlying channel.
#[derive(Debug, Clone)]
pub struct HandoffQueue {
    tx: Sender<Message>,
    rx: Receiver<Message>,
}

impl HandoffQueue {
    /// Queue holding at most `capacity` messages; `0` means unbounded.
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = if capacity == 0 {
            async_channel::unbounded()
        } else {
            async_channel::bounded(capacity)
        };
        Self { tx, rx }
    }

    pub fn unbounded() -> Self {
        Self::new(0)
    }

    /// Append a batch. Empty batches are dropped so every `Data` message
    /// carries at least one record. Waits only when a bounded queue is full.
    pub async fn push(&self, records: Vec<Record>) {
        if records.is_empty() {
            return;
        }
        // Both handles live in `self`, so the channel cannot be closed here.
        let _ = self.tx.send(Message::Data(records)).await;
    }

    /// Push one terminal signal.
    pub async fn end_signal(&self) {
        let _ = self.tx.send(Message::End).await;
    }

    /// Push `consumers` terminal signals, one per consumer worker.
    pub async fn end_signals(&self, consumers: usize) {
        for _ in 0..consumers {
            self.end_signal().await;
        }
    }

    /// Wait for the next message.
    pub async fn pop(&self) -> Message {
        match self.rx.recv().await {
            Ok(message) => message,
            Err(_) => {
                warn!("hand-off queue closed without an end signal");
                Message::End
            }
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Remove everything still queued and report it. Called once all
    /// consumers have joined; a non-empty result means a consumer exited
    /// before reading its end signal or records were never indexed.
    pub fn drain_leftovers(&self) -> Leftovers {
        let mut leftovers = Leftovers::default();
        loop {
            match self.rx.try_recv() {
                Ok(Message::End) => leftovers.end_signals += 1,
                Ok(Message::Data(records)) => {
                    leftovers.data_messages += 1;
                    leftovers.records += records.len();
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        leftovers
    }
}
