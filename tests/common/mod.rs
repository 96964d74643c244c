//! Test doubles for the broker and the ingestion endpoint

#![allow(dead_code)]

use async_trait::async_trait;
use kafka_iothub_bridge::consumer::{InboundMessage, MessageSource, OutboundEvent, ShutdownSignal, ShutdownTrigger};
use kafka_iothub_bridge::iothub::EventSink;
use kafka_iothub_bridge::{BridgeError, BridgeResult};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// One scripted poll result
pub enum Step {
    Message(InboundMessage),
    Error(BridgeError),
}

/// Observations shared between a [`ScriptedSource`] and the test
#[derive(Default)]
pub struct SourceTracker {
    pub polls: AtomicUsize,
    pub released: AtomicBool,
    pub timeouts: Mutex<Vec<Duration>>,
}

impl SourceTracker {
    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

/// Replays a fixed script of poll results
///
/// Once the script is exhausted it either sets the shutdown signal and
/// returns nothing, or idles for the full timeout like a quiet broker.
pub struct ScriptedSource {
    steps: VecDeque<Step>,
    tracker: Arc<SourceTracker>,
    stop_when_done: Option<Arc<ShutdownSignal>>,
}

impl ScriptedSource {
    pub fn new(steps: Vec<Step>) -> (Self, Arc<SourceTracker>) {
        let tracker = Arc::new(SourceTracker::default());
        let source = Self {
            steps: steps.into(),
            tracker: tracker.clone(),
            stop_when_done: None,
        };
        (source, tracker)
    }

    pub fn stop_when_done(mut self, signal: Arc<ShutdownSignal>) -> Self {
        self.stop_when_done = Some(signal);
        self
    }
}

#[async_trait]
impl MessageSource for ScriptedSource {
    async fn poll(&mut self, timeout: Duration) -> BridgeResult<Option<InboundMessage>> {
        self.tracker.polls.fetch_add(1, Ordering::SeqCst);
        self.tracker.timeouts.lock().push(timeout);

        match self.steps.pop_front() {
            Some(Step::Message(message)) => Ok(Some(message)),
            Some(Step::Error(e)) => Err(e),
            None => {
                match &self.stop_when_done {
                    Some(signal) => {
                        signal.trigger(ShutdownTrigger::Manual);
                    }
                    None => tokio::time::sleep(timeout).await,
                }
                Ok(None)
            }
        }
    }
}

impl Drop for ScriptedSource {
    fn drop(&mut self) {
        self.tracker.released.store(true, Ordering::SeqCst);
    }
}

/// Accepts every event and keeps it
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<OutboundEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<OutboundEvent> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn send_event(&self, event: OutboundEvent) -> BridgeResult<()> {
        self.events.lock().push(event);
        Ok(())
    }
}

/// Fails the first `failures` sends, then accepts
pub struct FlakySink {
    failures: usize,
    attempts: AtomicUsize,
    inner: RecordingSink,
}

impl FlakySink {
    pub fn new(failures: usize) -> Self {
        Self {
            failures,
            attempts: AtomicUsize::new(0),
            inner: RecordingSink::default(),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<OutboundEvent> {
        self.inner.events()
    }
}

#[async_trait]
impl EventSink for FlakySink {
    async fn send_event(&self, event: OutboundEvent) -> BridgeResult<()> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            return Err(BridgeError::SendError(format!("attempt {} rejected", attempt)));
        }
        self.inner.send_event(event).await
    }
}

pub fn message(topic: &str, partition: i32, offset: i64, payload: &str) -> Step {
    Step::Message(InboundMessage::new(
        topic,
        partition,
        offset,
        payload.as_bytes().to_vec(),
    ))
}
