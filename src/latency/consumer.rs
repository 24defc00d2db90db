use crate::error::AppError;
use crate::latency::schema::parse_envelope_payload;
use crate::latency::scheduler::{FiredTimer, Scheduler, TimerId, TimerKind, TokioScheduler};
use crate::latency::sse::{SseDecoder, SseEvent};
use crate::latency::types::ConsumerConfig;
use crate::state::DashboardContext;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{HEARTBEAT_EVENT, LATENCY_FRAME_EVENT, READY_EVENT};

pub const DISCONNECTED_MESSAGE: &str = "Latency stream disconnected. Attempting to reconnect…";

/// A decoded event, or one the decoder could not turn into text. Malformed
/// events are payload errors; the connection stays open.
#[derive(Debug)]
pub enum StreamItem {
    Event(SseEvent),
    Malformed(AppError),
}

pub type EventStream = BoxStream<'static, Result<StreamItem, AppError>>;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConsumerPhase {
    Idle,
    Connecting,
    Streaming,
    Error,
    Unmounted,
}

/// What the driver must do to the transport after an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerAction {
    OpenConnection,
    CloseConnection,
    None,
}

/// Client subscription lifecycle. Holds at most one pending reconnect timer.
#[derive(Debug)]
pub struct StreamConsumer {
    phase: ConsumerPhase,
    reconnect_delay: Duration,
    reconnect_timer: Option<TimerId>,
    frames_received: u64,
}

impl StreamConsumer {
    pub fn new(reconnect_delay: Duration) -> Self {
        Self {
            phase: ConsumerPhase::Idle,
            reconnect_delay,
            reconnect_timer: None,
            frames_received: 0,
        }
    }

    pub fn phase(&self) -> ConsumerPhase {
        self.phase
    }

    pub fn pending_reconnect(&self) -> Option<TimerId> {
        self.reconnect_timer
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received
    }

    pub fn mount(&mut self, context: &DashboardContext) -> ConsumerAction {
        if self.phase != ConsumerPhase::Idle {
            return ConsumerAction::None;
        }

        self.phase = ConsumerPhase::Connecting;
        context.feed.write().mark_connecting();
        ConsumerAction::OpenConnection
    }

    pub fn on_event(&mut self, event: &SseEvent, context: &DashboardContext) -> ConsumerAction {
        if !matches!(self.phase, ConsumerPhase::Connecting | ConsumerPhase::Streaming) {
            return ConsumerAction::None;
        }

        match event.event.as_str() {
            READY_EVENT => {
                self.phase = ConsumerPhase::Streaming;
                context.feed.write().mark_streaming();
            }
            LATENCY_FRAME_EVENT => self.ingest_payload(&event.data, context),
            HEARTBEAT_EVENT => tracing::trace!(service = "latency-consumer", "heartbeat"),
            other => tracing::debug!(service = "latency-consumer", event = other, "ignoring unknown event"),
        }

        ConsumerAction::None
    }

    pub fn on_malformed_event(
        &mut self,
        error: &AppError,
        context: &DashboardContext,
    ) -> ConsumerAction {
        if matches!(self.phase, ConsumerPhase::Connecting | ConsumerPhase::Streaming) {
            reject_payload(error, context);
        }
        ConsumerAction::None
    }

    /// Reports the outage, drops the connection and arms a single reconnect
    /// attempt, replacing any attempt already pending.
    pub fn on_transport_error(
        &mut self,
        error: &AppError,
        context: &DashboardContext,
        scheduler: &mut impl Scheduler,
    ) -> ConsumerAction {
        if matches!(self.phase, ConsumerPhase::Idle | ConsumerPhase::Unmounted) {
            return ConsumerAction::None;
        }

        tracing::warn!(service = "latency-consumer", %error, "latency stream transport error");
        context.feed.write().report_error(DISCONNECTED_MESSAGE);

        if let Some(previous) = self.reconnect_timer.take() {
            scheduler.cancel(previous);
        }
        self.reconnect_timer =
            Some(scheduler.schedule_once(self.reconnect_delay, TimerKind::Reconnect));
        self.phase = ConsumerPhase::Error;

        ConsumerAction::CloseConnection
    }

    pub fn on_timer(
        &mut self,
        fired: FiredTimer,
        context: &DashboardContext,
    ) -> ConsumerAction {
        if fired.kind != TimerKind::Reconnect || self.reconnect_timer != Some(fired.id) {
            return ConsumerAction::None;
        }

        self.reconnect_timer = None;
        self.phase = ConsumerPhase::Connecting;
        context.feed.write().mark_connecting();
        tracing::info!(service = "latency-consumer", "reconnecting to latency stream");
        ConsumerAction::OpenConnection
    }

    pub fn unmount(&mut self, scheduler: &mut impl Scheduler) -> ConsumerAction {
        if self.phase == ConsumerPhase::Unmounted {
            return ConsumerAction::None;
        }

        if let Some(pending) = self.reconnect_timer.take() {
            scheduler.cancel(pending);
        }
        self.phase = ConsumerPhase::Unmounted;
        ConsumerAction::CloseConnection
    }

    fn ingest_payload(&mut self, data: &str, context: &DashboardContext) {
        let mut payload = data.as_bytes().to_vec();
        match parse_envelope_payload(&mut payload) {
            Ok(frame) => {
                self.phase = ConsumerPhase::Streaming;
                self.frames_received = self.frames_received.saturating_add(1);
                context.feed.write().ingest_frame(&frame);
                context.history.write().ingest_frame(&frame);
                tracing::info!(
                    service = "latency-consumer",
                    frame_id = %frame.frame_id,
                    samples = frame.samples.len(),
                    avg_ms = frame.aggregated.avg,
                    p95_ms = frame.aggregated.p95,
                    "latency-frame-ingested"
                );
            }
            Err(error) => reject_payload(&error, context),
        }
    }
}

fn reject_payload(error: &AppError, context: &DashboardContext) {
    tracing::warn!(service = "latency-consumer", %error, "rejected latency frame payload");
    context.feed.write().report_error(error.to_string());
}

enum ReadState {
    Connect { client: Client, url: String },
    Read {
        body: BoxStream<'static, Result<Bytes, reqwest::Error>>,
        decoder: SseDecoder,
    },
    Finished,
}

/// Opens the stream lazily on first poll and yields decoded events. Any
/// transport failure, including a clean end of body, is yielded once as an
/// error and then the stream ends.
pub fn open_event_stream(client: Client, url: String) -> EventStream {
    futures_util::stream::unfold(ReadState::Connect { client, url }, |state| async move {
        let mut state = state;
        loop {
            state = match state {
                ReadState::Connect { client, url } => match connect(&client, &url).await {
                    Ok(body) => ReadState::Read {
                        body,
                        decoder: SseDecoder::default(),
                    },
                    Err(error) => return Some((Err(error), ReadState::Finished)),
                },
                ReadState::Read { mut body, mut decoder } => {
                    if let Some(decoded) = decoder.next_event() {
                        let item = match decoded {
                            Ok(event) => StreamItem::Event(event),
                            Err(error) => StreamItem::Malformed(error),
                        };
                        return Some((Ok(item), ReadState::Read { body, decoder }));
                    }

                    match body.next().await {
                        Some(Ok(chunk)) => match decoder.push(&chunk) {
                            Ok(()) => ReadState::Read { body, decoder },
                            Err(error) => return Some((Err(error), ReadState::Finished)),
                        },
                        Some(Err(error)) => return Some((Err(error.into()), ReadState::Finished)),
                        None => return Some((Err(AppError::StreamClosed), ReadState::Finished)),
                    }
                }
                ReadState::Finished => return None,
            };
        }
    })
    .boxed()
}

async fn connect(
    client: &Client,
    url: &str,
) -> Result<BoxStream<'static, Result<Bytes, reqwest::Error>>, AppError> {
    let response = client
        .get(url)
        .header(ACCEPT, "text/event-stream")
        .header(CACHE_CONTROL, "no-store")
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(AppError::UnexpectedStatus(status.as_u16()));
    }

    Ok(response.bytes_stream().boxed())
}

async fn next_event(connection: &mut Option<EventStream>) -> Option<Result<StreamItem, AppError>> {
    match connection {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

fn apply_action(
    action: ConsumerAction,
    connection: &mut Option<EventStream>,
    client: &Client,
    url: &str,
) {
    match action {
        ConsumerAction::OpenConnection => {
            *connection = Some(open_event_stream(client.clone(), url.to_string()));
        }
        ConsumerAction::CloseConnection => {
            connection.take();
        }
        ConsumerAction::None => {}
    }
}

/// Keeps one subscription alive until `cancel_token` fires, feeding every
/// accepted frame into `context`.
pub async fn run_stream_consumer(
    config: ConsumerConfig,
    context: DashboardContext,
    cancel_token: CancellationToken,
) -> Result<(), AppError> {
    let client = Client::builder().build()?;
    let (fired_tx, mut fired_rx) = mpsc::unbounded_channel();
    let mut scheduler = TokioScheduler::new(fired_tx, cancel_token.child_token());
    let mut consumer = StreamConsumer::new(Duration::from_millis(config.reconnect_delay_ms));
    let mut connection: Option<EventStream> = None;

    tracing::info!(service = "latency-consumer", url = %config.url, "subscribing to latency stream");
    let action = consumer.mount(&context);
    apply_action(action, &mut connection, &client, &config.url);

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                let action = consumer.unmount(&mut scheduler);
                apply_action(action, &mut connection, &client, &config.url);
                break;
            }
            fired = fired_rx.recv() => {
                let Some(fired) = fired else { break };
                scheduler.acknowledge(fired);
                let action = consumer.on_timer(fired, &context);
                apply_action(action, &mut connection, &client, &config.url);
            }
            item = next_event(&mut connection) => {
                let action = match item {
                    Some(Ok(StreamItem::Event(event))) => consumer.on_event(&event, &context),
                    Some(Ok(StreamItem::Malformed(error))) => consumer.on_malformed_event(&error, &context),
                    Some(Err(error)) => consumer.on_transport_error(&error, &context, &mut scheduler),
                    None => consumer.on_transport_error(&AppError::StreamClosed, &context, &mut scheduler),
                };
                apply_action(action, &mut connection, &client, &config.url);
            }
        }
    }

    scheduler.cancel_all();
    tracing::info!(
        service = "latency-consumer",
        frames = consumer.frames_received(),
        "latency stream consumer stopped"
    );
    Ok(())
}
