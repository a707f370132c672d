//! `ThreadBridge`: run a blocking iterator off the async scheduler.
//!
//! A worker on tokio's blocking pool drains the producer into a bounded
//! channel. When the channel is full the worker blocks, which is fine off
//! the scheduler; when it is empty the consumer suspends. A producer error
//! or panic becomes one terminal error item, and an end marker is always
//! sent last, exactly once.
//!
//! Cancellation is cooperative. [`ThreadBridge::cancel`] raises a flag the
//! worker checks between items; a producer blocked inside its own I/O only
//! notices once that call returns.

use crate::{Error, Result};
use futures_core::Stream;
use std::{
    any::Any,
    backtrace::{Backtrace, BacktraceStatus},
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU8, Ordering},
    },
};
use tokio::sync::mpsc;

/// Default queue capacity between the worker and the consumer
pub const DEFAULT_CAPACITY: usize = 100;

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const DRAINING: u8 = 2;
const ERRORING: u8 = 3;
const CLOSED: u8 = 4;

/// Lifecycle of a bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    /// No producer started yet
    Idle,
    /// The worker is producing
    Running,
    /// The producer finished; the consumer drains what is queued
    Draining,
    /// The producer failed; its error is queued
    Erroring,
    /// The consumer saw the end marker
    Closed,
}

enum Message<T> {
    Item(T),
    Error { message: String, trace: String },
    End,
}

struct Shared {
    state: AtomicU8,
    stop: AtomicBool,
}

/// Raises the stop flag when the consumer goes away.
struct StopOnDrop(Arc<Shared>);

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        self.0.stop.store(true, Ordering::Release);
    }
}

/// A single-use bridge from a blocking producer to an async stream.
pub struct ThreadBridge {
    capacity: usize,
    shared: Arc<Shared>,
}

impl Default for ThreadBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadBridge {
    /// A bridge with the default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// A bridge with the given queue capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            shared: Arc::new(Shared {
                state: AtomicU8::new(IDLE),
                stop: AtomicBool::new(false),
            }),
        }
    }

    /// The current lifecycle state
    pub fn state(&self) -> BridgeState {
        match self.shared.state.load(Ordering::Acquire) {
            IDLE => BridgeState::Idle,
            RUNNING => BridgeState::Running,
            DRAINING => BridgeState::Draining,
            ERRORING => BridgeState::Erroring,
            _ => BridgeState::Closed,
        }
    }

    /// Ask the worker to stop before its next item
    pub fn cancel(&self) {
        self.shared.stop.store(true, Ordering::Release);
    }

    /// Start the producer on a worker and return the consumer side.
    ///
    /// Must be called inside a tokio runtime. Fails with
    /// [`Error::BridgeStarted`] if this bridge already ran a producer.
    pub fn run<T, E, I, F>(
        &self,
        producer: F,
    ) -> Result<impl Stream<Item = Result<T>> + Send + 'static + use<T, E, I, F>>
    where
        T: Send + 'static,
        E: Into<anyhow::Error>,
        I: IntoIterator<Item = std::result::Result<T, E>>,
        F: FnOnce() -> I + Send + 'static,
    {
        self.shared
            .state
            .compare_exchange(IDLE, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::BridgeStarted)?;
        Ok(spawn(self.capacity, self.shared.clone(), producer))
    }
}

fn spawn<T, E, I, F>(
    capacity: usize,
    shared: Arc<Shared>,
    producer: F,
) -> impl Stream<Item = Result<T>> + Send + 'static
where
    T: Send + 'static,
    E: Into<anyhow::Error>,
    I: IntoIterator<Item = std::result::Result<T, E>>,
    F: FnOnce() -> I + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel(capacity);
    let worker = shared.clone();
    tokio::task::spawn_blocking(move || work(producer, &tx, &worker));

    async_stream::stream! {
        let _stop = StopOnDrop(shared.clone());
        while let Some(message) = rx.recv().await {
            match message {
                Message::Item(item) => yield Ok(item),
                Message::Error { message, trace } => {
                    tracing::error!("bridged producer failed: {message}\n{trace}");
                    yield Err(Error::Backend { message, trace: Some(trace) });
                }
                Message::End => break,
            }
        }
        shared.state.store(CLOSED, Ordering::Release);
    }
}

/// Run a blocking producer on a fresh bridge
pub fn blocking_stream<T, E, I, F>(producer: F) -> impl Stream<Item = Result<T>> + Send + 'static
where
    T: Send + 'static,
    E: Into<anyhow::Error>,
    I: IntoIterator<Item = std::result::Result<T, E>>,
    F: FnOnce() -> I + Send + 'static,
{
    let shared = Arc::new(Shared {
        state: AtomicU8::new(RUNNING),
        stop: AtomicBool::new(false),
    });
    spawn(DEFAULT_CAPACITY, shared, producer)
}

fn work<T, E, I, F>(producer: F, tx: &mpsc::Sender<Message<T>>, shared: &Shared)
where
    E: Into<anyhow::Error>,
    I: IntoIterator<Item = std::result::Result<T, E>>,
    F: FnOnce() -> I,
{
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| -> Option<(String, String)> {
        let mut items = producer().into_iter();
        while !shared.stop.load(Ordering::Acquire) {
            match items.next()? {
                Ok(item) => {
                    if tx.blocking_send(Message::Item(item)).is_err() {
                        return None;
                    }
                }
                Err(e) => {
                    let e = e.into();
                    let trace = match e.backtrace().status() {
                        BacktraceStatus::Captured => e.backtrace().to_string(),
                        _ => Backtrace::force_capture().to_string(),
                    };
                    return Some((format!("{e:#}"), trace));
                }
            }
        }
        None
    }));

    let failure = match outcome {
        Ok(failure) => failure,
        Err(payload) => Some((
            panic_message(payload.as_ref()),
            Backtrace::force_capture().to_string(),
        )),
    };

    match failure {
        Some((message, trace)) => {
            shared.state.store(ERRORING, Ordering::Release);
            let _ = tx.blocking_send(Message::Error { message, trace });
        }
        None => shared.state.store(DRAINING, Ordering::Release),
    }
    let _ = tx.blocking_send(Message::End);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("producer panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("producer panicked: {s}")
    } else {
        "producer panicked".to_owned()
    }
}
