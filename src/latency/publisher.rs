use crate::error::AppError;
use crate::latency::producer::FrameProducer;
use crate::latency::schema::validate_frame;
use crate::latency::scheduler::{FiredTimer, Scheduler, TimerId, TimerKind, TokioScheduler};
use crate::latency::sse::encode_event;
use crate::latency::types::{StreamConfig, StreamEnvelope};
use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_util::sync::CancellationToken;

use super::{HEARTBEAT_EVENT, LATENCY_FRAME_EVENT, READY_EVENT};

const EMPTY_PAYLOAD: &str = "{}";
const BROADCAST_LOG_SAMPLES: usize = 3;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Connecting,
    Streaming,
    Closed,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum CloseReason {
    ClientDisconnected,
    Cancelled,
    EnqueueFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkClosed;

/// Single-writer outgoing byte channel for one connection.
pub trait EventSink {
    fn send(&mut self, chunk: Bytes) -> Result<(), SinkClosed>;
}

#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: UnboundedSender<Bytes>,
}

impl ChannelSink {
    pub fn new(sender: UnboundedSender<Bytes>) -> Self {
        Self { sender }
    }

    /// Resolves once the receiving half (the HTTP response body) is gone.
    pub async fn closed(&self) {
        self.sender.closed().await
    }
}

impl EventSink for ChannelSink {
    fn send(&mut self, chunk: Bytes) -> Result<(), SinkClosed> {
        self.sender.send(chunk).map_err(|_| SinkClosed)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub frames_sent: u64,
    pub heartbeats_sent: u64,
    pub frames_skipped: u64,
}

pub struct StreamSession<S> {
    state: SessionState,
    producer: Arc<dyn FrameProducer>,
    sink: S,
    config: StreamConfig,
    poll_timer: Option<TimerId>,
    heartbeat_timer: Option<TimerId>,
    close_reason: Option<CloseReason>,
    stats: SessionStats,
}

impl<S: EventSink> StreamSession<S> {
    pub fn new(producer: Arc<dyn FrameProducer>, sink: S, config: StreamConfig) -> Self {
        Self {
            state: SessionState::Connecting,
            producer,
            sink,
            config,
            poll_timer: None,
            heartbeat_timer: None,
            close_reason: None,
            stats: SessionStats::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// `ready`, then the first frame, then arm the poll and heartbeat timers.
    pub fn open(&mut self, scheduler: &mut impl Scheduler) {
        if self.state != SessionState::Connecting {
            return;
        }

        self.emit(encode_event(READY_EVENT, EMPTY_PAYLOAD), scheduler);
        if self.is_closed() {
            return;
        }
        self.state = SessionState::Streaming;

        self.publish_frame(scheduler);
        if self.is_closed() {
            return;
        }

        self.poll_timer = Some(scheduler.schedule_repeating(
            Duration::from_millis(self.config.poll_interval_ms),
            TimerKind::Poll,
        ));
        self.heartbeat_timer = Some(scheduler.schedule_repeating(
            Duration::from_millis(self.config.heartbeat_interval_ms),
            TimerKind::Heartbeat,
        ));
    }

    pub fn on_timer(&mut self, fired: FiredTimer, scheduler: &mut impl Scheduler) {
        if self.state != SessionState::Streaming {
            return;
        }

        match fired.kind {
            TimerKind::Poll if self.poll_timer == Some(fired.id) => {
                self.publish_frame(scheduler);
            }
            TimerKind::Heartbeat if self.heartbeat_timer == Some(fired.id) => {
                self.emit(encode_event(HEARTBEAT_EVENT, EMPTY_PAYLOAD), scheduler);
                if !self.is_closed() {
                    self.stats.heartbeats_sent = self.stats.heartbeats_sent.saturating_add(1);
                }
            }
            _ => {}
        }
    }

    /// Idempotent. Returns `true` only for the call that actually closed the
    /// session.
    pub fn shutdown(&mut self, reason: CloseReason, scheduler: &mut impl Scheduler) -> bool {
        if self.state == SessionState::Closed {
            return false;
        }

        self.state = SessionState::Closed;
        self.close_reason = Some(reason);
        if let Some(id) = self.poll_timer.take() {
            scheduler.cancel(id);
        }
        if let Some(id) = self.heartbeat_timer.take() {
            scheduler.cancel(id);
        }

        tracing::info!(
            service = "latency-stream",
            reason = ?reason,
            frames_sent = self.stats.frames_sent,
            heartbeats_sent = self.stats.heartbeats_sent,
            "stream-closed"
        );
        true
    }

    fn publish_frame(&mut self, scheduler: &mut impl Scheduler) {
        let chunk = match self.build_frame_event() {
            Ok(chunk) => chunk,
            Err(error) => {
                self.stats.frames_skipped = self.stats.frames_skipped.saturating_add(1);
                tracing::error!(service = "latency-stream", %error, "frame build failed; skipping tick");
                return;
            }
        };

        self.emit(chunk, scheduler);
        if !self.is_closed() {
            self.stats.frames_sent = self.stats.frames_sent.saturating_add(1);
        }
    }

    fn build_frame_event(&self) -> Result<Bytes, AppError> {
        let frame = self.producer.generate_frame()?;
        validate_frame(&frame)?;

        for sample in frame.samples.iter().take(BROADCAST_LOG_SAMPLES) {
            tracing::debug!(
                service = "latency-stream",
                exchange = %sample.exchange,
                provider = %sample.provider,
                latency_ms = sample.latency_ms,
                region = %sample.region,
                "latency-frame-broadcast"
            );
        }

        let payload = simd_json::serde::to_string(&StreamEnvelope { frame: &frame })?;
        Ok(encode_event(LATENCY_FRAME_EVENT, &payload))
    }

    fn emit(&mut self, chunk: Bytes, scheduler: &mut impl Scheduler) {
        if self.is_closed() {
            return;
        }

        if self.sink.send(chunk).is_err() {
            tracing::warn!(service = "latency-stream", "stream-enqueue-failed");
            self.shutdown(CloseReason::EnqueueFailed, scheduler);
        }
    }
}

/// Runs one connection's session until the client goes away, the server
/// cancels it, or a write fails.
pub async fn drive_stream_session(
    mut session: StreamSession<ChannelSink>,
    cancel_token: CancellationToken,
) -> Option<CloseReason> {
    let (fired_tx, mut fired_rx) = mpsc::unbounded_channel();
    let mut scheduler = TokioScheduler::new(fired_tx, cancel_token.child_token());
    let disconnect_watch = session.sink().clone();

    session.open(&mut scheduler);

    while !session.is_closed() {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                tracing::warn!(service = "latency-stream", "stream-cancelled");
                session.shutdown(CloseReason::Cancelled, &mut scheduler);
            }
            _ = disconnect_watch.closed() => {
                session.shutdown(CloseReason::ClientDisconnected, &mut scheduler);
            }
            fired = fired_rx.recv() => match fired {
                Some(fired) => {
                    scheduler.acknowledge(fired);
                    session.on_timer(fired, &mut scheduler);
                }
                None => {
                    session.shutdown(CloseReason::Cancelled, &mut scheduler);
                }
            },
        }
    }

    scheduler.cancel_all();
    session.close_reason()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::latency::producer::SyntheticLatencyProducer;
    use crate::latency::scheduler::manual::ManualScheduler;
    use crate::latency::schema::parse_envelope_payload;
    use crate::latency::sse::SseDecoder;
    use crate::latency::types::LatencyFrame;

    #[derive(Debug, Default)]
    struct RecordingSink {
        chunks: Vec<Bytes>,
        reject_after: Option<usize>,
    }

    impl EventSink for RecordingSink {
        fn send(&mut self, chunk: Bytes) -> Result<(), SinkClosed> {
            if let Some(limit) = self.reject_after {
                if self.chunks.len() >= limit {
                    return Err(SinkClosed);
                }
            }
            self.chunks.push(chunk);
            Ok(())
        }
    }

    struct FailingProducer;

    impl FrameProducer for FailingProducer {
        fn generate_frame(&self) -> Result<LatencyFrame, AppError> {
            Err(AppError::validation("frame must contain at least one sample"))
        }
    }

    fn session_with(sink: RecordingSink) -> StreamSession<RecordingSink> {
        StreamSession::new(
            Arc::new(SyntheticLatencyProducer::default()),
            sink,
            StreamConfig::default(),
        )
    }

    fn decoded_events(sink: &RecordingSink) -> Vec<crate::latency::sse::SseEvent> {
        let mut decoder = SseDecoder::default();
        for chunk in &sink.chunks {
            decoder.push(chunk).expect("sink chunk should buffer");
        }
        std::iter::from_fn(|| decoder.next_event())
            .map(|event| event.expect("sink chunk should decode"))
            .collect()
    }

    #[test]
    fn open_emits_ready_then_first_frame_and_arms_timers() {
        let mut scheduler = ManualScheduler::default();
        let mut session = session_with(RecordingSink::default());

        session.open(&mut scheduler);

        assert_eq!(session.state(), SessionState::Streaming);
        let events = decoded_events(session.sink());
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event, READY_EVENT);
        assert_eq!(events[0].data, "{}");
        assert_eq!(events[1].event, LATENCY_FRAME_EVENT);

        let mut payload = events[1].data.clone().into_bytes();
        let frame = parse_envelope_payload(&mut payload).expect("emitted frame should validate");
        assert_eq!(frame.samples.len(), 5);

        let poll = scheduler.armed_of(TimerKind::Poll);
        let heartbeat = scheduler.armed_of(TimerKind::Heartbeat);
        assert_eq!(poll.len(), 1);
        assert_eq!(heartbeat.len(), 1);
        assert_eq!(poll[0].1.every, Duration::from_millis(5_000));
        assert_eq!(heartbeat[0].1.every, Duration::from_millis(15_000));
        assert!(poll[0].1.repeating && heartbeat[0].1.repeating);
    }

    #[test]
    fn ticks_emit_frames_and_heartbeats_in_wire_format() {
        let mut scheduler = ManualScheduler::default();
        let mut session = session_with(RecordingSink::default());
        session.open(&mut scheduler);

        session.on_timer(scheduler.only(TimerKind::Poll), &mut scheduler);
        session.on_timer(scheduler.only(TimerKind::Heartbeat), &mut scheduler);

        let chunks = &session.sink().chunks;
        assert_eq!(chunks.len(), 4);
        assert!(chunks[2].starts_with(b"event: latency-frame\ndata: {\"frame\":"));
        assert!(chunks[2].ends_with(b"\n\n"));
        assert_eq!(&chunks[3][..], b"event: heartbeat\ndata: {}\n\n");
        assert_eq!(
            session.stats(),
            SessionStats {
                frames_sent: 2,
                heartbeats_sent: 1,
                frames_skipped: 0,
            }
        );
    }

    #[test]
    fn enqueue_failure_closes_session_and_cancels_timers() {
        let mut scheduler = ManualScheduler::default();
        let mut session = session_with(RecordingSink {
            chunks: Vec::new(),
            reject_after: Some(2),
        });
        session.open(&mut scheduler);
        let poll = scheduler.only(TimerKind::Poll);

        session.on_timer(poll, &mut scheduler);

        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.close_reason(), Some(CloseReason::EnqueueFailed));
        assert!(scheduler.armed.is_empty());
        assert_eq!(scheduler.cancelled.len(), 2);

        session.on_timer(poll, &mut scheduler);
        assert_eq!(session.sink().chunks.len(), 2);
        assert_eq!(session.stats().frames_sent, 1);
    }

    #[test]
    fn enqueue_failure_on_ready_never_reaches_streaming() {
        let mut scheduler = ManualScheduler::default();
        let mut session = session_with(RecordingSink {
            chunks: Vec::new(),
            reject_after: Some(0),
        });

        session.open(&mut scheduler);

        assert_eq!(session.state(), SessionState::Closed);
        assert!(scheduler.armed.is_empty());
        assert!(session.sink().chunks.is_empty());
    }

    #[test]
    fn shutdown_is_idempotent() {
        let mut scheduler = ManualScheduler::default();
        let mut session = session_with(RecordingSink::default());
        session.open(&mut scheduler);

        assert!(session.shutdown(CloseReason::ClientDisconnected, &mut scheduler));
        assert!(!session.shutdown(CloseReason::ClientDisconnected, &mut scheduler));
        assert!(!session.shutdown(CloseReason::Cancelled, &mut scheduler));

        assert_eq!(session.close_reason(), Some(CloseReason::ClientDisconnected));
        assert_eq!(scheduler.cancelled.len(), 2);
    }

    #[test]
    fn stale_timer_fires_are_ignored() {
        let mut scheduler = ManualScheduler::default();
        let mut session = session_with(RecordingSink::default());
        session.open(&mut scheduler);
        let foreign = FiredTimer {
            id: scheduler.only(TimerKind::Heartbeat).id,
            kind: TimerKind::Poll,
        };

        session.on_timer(foreign, &mut scheduler);
        assert_eq!(session.sink().chunks.len(), 2);
    }

    #[test]
    fn producer_failure_skips_tick_without_closing() {
        let mut scheduler = ManualScheduler::default();
        let mut session = StreamSession::new(
            Arc::new(FailingProducer),
            RecordingSink::default(),
            StreamConfig::default(),
        );

        session.open(&mut scheduler);
        session.on_timer(scheduler.only(TimerKind::Poll), &mut scheduler);

        assert_eq!(session.state(), SessionState::Streaming);
        assert_eq!(session.stats().frames_skipped, 2);
        assert_eq!(decoded_events(session.sink()).len(), 1);
    }

    #[tokio::test]
    async fn driver_stops_when_response_body_is_dropped() {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let session = StreamSession::new(
            Arc::new(SyntheticLatencyProducer::default()),
            ChannelSink::new(sender),
            StreamConfig::default(),
        );
        let handle = tokio::spawn(drive_stream_session(session, CancellationToken::new()));

        let ready = receiver.recv().await.expect("ready event should arrive");
        assert_eq!(&ready[..], b"event: ready\ndata: {}\n\n");
        drop(receiver);

        let reason = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("driver should stop after disconnect")
            .expect("driver task should not panic");
        assert_eq!(reason, Some(CloseReason::ClientDisconnected));
    }

    #[tokio::test]
    async fn driver_stops_on_server_cancellation() {
        let (sender, _receiver) = mpsc::unbounded_channel();
        let session = StreamSession::new(
            Arc::new(SyntheticLatencyProducer::default()),
            ChannelSink::new(sender),
            StreamConfig::default(),
        );
        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(drive_stream_session(session, cancel_token.clone()));

        cancel_token.cancel();
        let reason = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("driver should stop after cancellation")
            .expect("driver task should not panic");
        assert_eq!(reason, Some(CloseReason::Cancelled));
    }
}
