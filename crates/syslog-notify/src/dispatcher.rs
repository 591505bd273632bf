// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded record queue and the single-flight delivery loop draining it.
//!
//! ```text
//!   producers ──► DispatcherHandle::push ──► filter ──► queue (bounded)
//!                                                         │
//!                                             Dispatcher::run (one task)
//!                                                         │
//!                                          transform ──► encode ──► Sink
//! ```
//!
//! Producers wait when the queue is full. The queue closes for writes once
//! every [`DispatcherHandle`] has been dropped; the loop then delivers what
//! is still buffered and returns.

use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, trace};

use crate::errors::{CreationError, PushError, QueueClosed};
use crate::filter::AdmissionFilter;
use crate::message::MessageRecord;
use crate::payload::transform;
use crate::sink::Sink;

/// Outcome of offering a record to a dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Queued,
    /// The admission filter refused the record. It was not queued.
    Rejected,
}

/// Counters returned when a dispatcher stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub delivered: u64,
    pub failed: u64,
    /// Records whose payload could not be encoded.
    pub skipped: u64,
}

/// Lifecycle of a dispatcher loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    /// Accepting and delivering records.
    Running,
    /// The queue is closed for writes; buffered records are still delivered.
    Draining,
    /// Closed and empty. The loop has returned.
    Stopped,
}

/// Producer side of a dispatcher queue. Cheap to clone.
#[derive(Clone)]
pub struct DispatcherHandle {
    tx: mpsc::Sender<MessageRecord>,
    filter: Arc<dyn AdmissionFilter>,
    state: watch::Receiver<DispatcherState>,
}

impl DispatcherHandle {
    /// Filters and queues a record, waiting for room when the queue is full.
    pub async fn push(&self, record: MessageRecord) -> Result<Admission, QueueClosed> {
        if !self.filter.admit(&record) {
            trace!("Record with tag '{}' rejected by filter", record.tag());
            return Ok(Admission::Rejected);
        }
        self.tx
            .send(record)
            .await
            .map_err(|mpsc::error::SendError(record)| QueueClosed(record))?;
        Ok(Admission::Queued)
    }

    /// Filters and queues a record without waiting.
    pub fn try_push(&self, record: MessageRecord) -> Result<Admission, PushError> {
        if !self.filter.admit(&record) {
            trace!("Record with tag '{}' rejected by filter", record.tag());
            return Ok(Admission::Rejected);
        }
        self.tx.try_send(record).map_err(|e| match e {
            mpsc::error::TrySendError::Full(record) => PushError::Full(record),
            mpsc::error::TrySendError::Closed(record) => PushError::Closed(record),
        })?;
        Ok(Admission::Queued)
    }

    /// Gives up this producer. The queue is closed for writes once every
    /// handle is closed or dropped.
    pub fn close(self) {
        drop(self);
    }

    /// `true` once the dispatcher has stopped and no longer accepts records.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Number of records that can be queued right now without waiting.
    pub fn available(&self) -> usize {
        self.tx.capacity()
    }

    pub fn max_capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Current state of the dispatcher loop.
    pub fn state(&self) -> DispatcherState {
        *self.state.borrow()
    }
}

/// Owner of a record queue and of the loop delivering its records.
pub struct Dispatcher<S> {
    rx: mpsc::Receiver<MessageRecord>,
    sink: S,
    state: watch::Sender<DispatcherState>,
    summary: DispatchSummary,
}

impl<S: Sink> Dispatcher<S> {
    /// Creates a dispatcher holding at most `capacity` records, and the handle
    /// producers use to feed it. Spawn [`Dispatcher::run`] to start delivering.
    pub fn new(
        sink: S,
        filter: Arc<dyn AdmissionFilter>,
        capacity: usize,
    ) -> Result<(Self, DispatcherHandle), CreationError> {
        if capacity == 0 {
            return Err(CreationError::ZeroCapacity);
        }
        let (tx, rx) = mpsc::channel(capacity);
        let (state, state_rx) = watch::channel(DispatcherState::Running);

        let dispatcher = Self {
            rx,
            sink,
            state,
            summary: DispatchSummary::default(),
        };
        let handle = DispatcherHandle {
            tx,
            filter,
            state: state_rx,
        };

        Ok((dispatcher, handle))
    }

    pub fn state(&self) -> DispatcherState {
        *self.state.borrow()
    }

    /// Follows state changes after the dispatcher has been moved into its
    /// task, including once every handle is gone.
    pub fn watch_state(&self) -> watch::Receiver<DispatcherState> {
        self.state.subscribe()
    }

    /// Delivers records in queue order, one at a time, until the queue is
    /// closed and empty.
    pub async fn run(mut self) -> DispatchSummary {
        debug!("Dispatcher started");

        while let Some(record) = self.rx.recv().await {
            if self.state() == DispatcherState::Running && self.rx.is_closed() {
                self.state.send_replace(DispatcherState::Draining);
                debug!(
                    "Queue closed for writes, draining {} buffered records",
                    self.rx.len() + 1
                );
            }
            self.dispatch(record).await;
        }
        self.state.send_replace(DispatcherState::Stopped);

        info!(
            "Dispatcher stopped: {} delivered, {} failed, {} skipped",
            self.summary.delivered, self.summary.failed, self.summary.skipped
        );
        self.summary
    }

    async fn dispatch(&mut self, record: MessageRecord) {
        let notification = transform(&record);
        let body = match notification.to_json() {
            Ok(body) => body,
            Err(e) => {
                error!(
                    "Failed to encode notification for tag '{}'. Data dropped: {}",
                    record.tag(),
                    e
                );
                self.summary.skipped += 1;
                return;
            }
        };

        match self.sink.deliver(body).await {
            Ok(()) => {
                debug!("Delivered notification for tag '{}'", record.tag());
                self.summary.delivered += 1;
            }
            Err(e) => {
                error!(
                    "Failed to deliver notification for tag '{}': {}",
                    record.tag(),
                    e
                );
                self.summary.failed += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::AcceptAll;
    use crate::sink::testing::RecordingSink;
    use std::time::Duration;
    use tokio::time::{sleep, timeout};
    use tracing_test::traced_test;

    fn record(tag: &str, content: &str) -> MessageRecord {
        MessageRecord::new(tag, "h1", content, chrono::Utc::now().fixed_offset())
    }

    fn dispatcher(
        sink: RecordingSink,
        capacity: usize,
    ) -> (Dispatcher<RecordingSink>, DispatcherHandle) {
        Dispatcher::new(sink, Arc::new(AcceptAll), capacity)
            .expect("dispatcher creation failed")
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        let result = Dispatcher::new(RecordingSink::default(), Arc::new(AcceptAll), 0);
        assert!(matches!(result, Err(CreationError::ZeroCapacity)));
    }

    #[test]
    fn test_new_dispatcher_is_running() {
        let (dispatcher, handle) = dispatcher(RecordingSink::default(), 3);
        assert_eq!(dispatcher.state(), DispatcherState::Running);
        assert_eq!(handle.state(), DispatcherState::Running);
        assert_eq!(handle.max_capacity(), 3);
        assert_eq!(handle.available(), 3);
        assert!(!handle.is_closed());
    }

    #[tokio::test]
    async fn test_records_are_delivered_in_admission_order() {
        let sink = RecordingSink::default();
        let (dispatcher, handle) = dispatcher(sink.clone(), 5);
        let task = tokio::spawn(dispatcher.run());

        for i in 0..20 {
            let admission = handle
                .push(record("app", &format!("message {i}")))
                .await
                .expect("queue closed");
            assert_eq!(admission, Admission::Queued);
        }
        handle.close();

        let summary = task.await.expect("dispatcher task failed");
        assert_eq!(summary.delivered, 20);
        assert_eq!(summary.failed, 0);

        let expected: Vec<String> = (0..20).map(|i| format!("[app] message {i}")).collect();
        assert_eq!(sink.fallbacks(), expected);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_buffered_records_are_drained_after_close() {
        let sink = RecordingSink::default();
        let (dispatcher, handle) = dispatcher(sink.clone(), 5);

        for content in ["one", "two", "three"] {
            handle.try_push(record("app", content)).expect("queue full");
        }
        let state = dispatcher.watch_state();
        handle.close();

        let summary = dispatcher.run().await;

        assert_eq!(*state.borrow(), DispatcherState::Stopped);
        assert_eq!(summary.delivered, 3);
        assert_eq!(
            sink.fallbacks(),
            ["[app] one", "[app] two", "[app] three"]
        );
        assert!(logs_contain("draining 3 buffered records"));
        assert!(logs_contain("Dispatcher stopped: 3 delivered"));
    }

    #[tokio::test]
    async fn test_state_moves_through_draining_to_stopped() {
        let sink = RecordingSink::with_delay(Duration::from_millis(100));
        let (dispatcher, handle) = dispatcher(sink.clone(), 5);
        let observer = handle.clone();

        for content in ["one", "two", "three"] {
            handle.try_push(record("app", content)).expect("queue full");
        }
        let mut state = dispatcher.watch_state();
        let task = tokio::spawn(dispatcher.run());
        assert_eq!(observer.state(), DispatcherState::Running);

        handle.close();
        drop(observer);
        timeout(
            Duration::from_secs(5),
            state.wait_for(|s| *s == DispatcherState::Draining),
        )
        .await
        .expect("dispatcher never drained")
        .unwrap();

        let summary = task.await.unwrap();
        assert_eq!(summary.delivered, 3);
        assert_eq!(*state.borrow(), DispatcherState::Stopped);
    }

    #[tokio::test]
    async fn test_closed_empty_queue_stops_immediately() {
        let (dispatcher, handle) = dispatcher(RecordingSink::default(), 5);
        drop(handle);

        let summary = timeout(Duration::from_secs(1), dispatcher.run())
            .await
            .expect("dispatcher did not stop");
        assert_eq!(summary, DispatchSummary::default());
    }

    #[tokio::test]
    async fn test_full_queue_applies_backpressure() {
        let sink = RecordingSink::default();
        let (dispatcher, handle) = dispatcher(sink.clone(), 5);
        assert_eq!(handle.max_capacity(), 5);

        for i in 1..=5 {
            handle
                .try_push(record("app", &i.to_string()))
                .expect("queue should have room");
        }
        assert_eq!(handle.available(), 0);
        assert!(matches!(
            handle.try_push(record("app", "overflow")),
            Err(PushError::Full(_))
        ));

        let producer_handle = handle.clone();
        let producer = tokio::spawn(async move {
            for i in 6..=7 {
                producer_handle
                    .push(record("app", &i.to_string()))
                    .await
                    .expect("queue closed");
            }
        });

        sleep(Duration::from_millis(50)).await;
        assert!(!producer.is_finished(), "producer should wait for room");

        let task = tokio::spawn(dispatcher.run());
        timeout(Duration::from_secs(1), producer)
            .await
            .expect("producer still blocked")
            .expect("producer task failed");
        handle.close();

        let summary = task.await.expect("dispatcher task failed");
        assert_eq!(summary.delivered, 7);
        let expected: Vec<String> = (1..=7).map(|i| format!("[app] {i}")).collect();
        assert_eq!(sink.fallbacks(), expected);
    }

    #[tokio::test]
    async fn test_rejected_records_never_reach_the_sink() {
        let sink = RecordingSink::default();
        let filter = |record: &MessageRecord| record.tag() != "debug";
        let (dispatcher, handle) =
            Dispatcher::new(sink.clone(), Arc::new(filter), 5).expect("creation failed");
        let task = tokio::spawn(dispatcher.run());

        let inputs = [
            ("app", "a"),
            ("debug", "b"),
            ("db", "c"),
            ("debug", "d"),
            ("app", "e"),
        ];
        let mut admissions = Vec::new();
        for (tag, content) in inputs {
            admissions.push(handle.push(record(tag, content)).await.expect("queue closed"));
        }
        handle.close();
        let summary = task.await.expect("dispatcher task failed");

        assert_eq!(
            admissions,
            [
                Admission::Queued,
                Admission::Rejected,
                Admission::Queued,
                Admission::Rejected,
                Admission::Queued,
            ]
        );
        assert_eq!(summary.delivered, 3);
        assert_eq!(sink.fallbacks(), ["[app] a", "[db] c", "[app] e"]);
    }

    #[tokio::test]
    async fn test_rejected_records_do_not_use_capacity() {
        let filter = |record: &MessageRecord| record.tag() != "debug";
        let (_dispatcher, handle) =
            Dispatcher::new(RecordingSink::default(), Arc::new(filter), 1)
                .expect("creation failed");

        assert_eq!(
            handle.try_push(record("debug", "x")).expect("push failed"),
            Admission::Rejected
        );
        assert_eq!(handle.available(), 1);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_delivery_failure_does_not_stop_the_loop() {
        let sink = RecordingSink::default();
        let (dispatcher, handle) = dispatcher(sink.clone(), 5);

        handle.try_push(record("app", "first")).expect("queue full");
        handle.try_push(record("app", "fail")).expect("queue full");
        handle.try_push(record("app", "third")).expect("queue full");
        handle.close();

        let summary = dispatcher.run().await;

        assert_eq!(summary.delivered, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(sink.fallbacks(), ["[app] first", "[app] fail", "[app] third"]);
        assert!(logs_contain("Failed to deliver notification for tag 'app'"));
    }

    #[tokio::test]
    async fn test_single_delivery_in_flight() {
        let sink = RecordingSink::with_delay(Duration::from_millis(5));
        let (dispatcher, handle) = dispatcher(sink.clone(), 5);
        let task = tokio::spawn(dispatcher.run());

        for i in 0..10 {
            handle
                .push(record("app", &i.to_string()))
                .await
                .expect("queue closed");
        }
        handle.close();
        task.await.expect("dispatcher task failed");

        assert_eq!(sink.bodies().len(), 10);
        assert_eq!(sink.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn test_push_after_stop_returns_record() {
        let (dispatcher, handle) = dispatcher(RecordingSink::default(), 5);
        drop(dispatcher);

        assert!(handle.is_closed());
        let QueueClosed(returned) = handle
            .push(record("app", "late"))
            .await
            .expect_err("queue should be closed");
        assert_eq!(returned.content(), "late");
        assert!(matches!(
            handle.try_push(record("app", "late")),
            Err(PushError::Closed(_))
        ));
    }
}
