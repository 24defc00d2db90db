use crate::latency::feed::LiveFeedStore;
use crate::latency::history::HistoryAccumulator;
use crate::latency::producer::FrameProducer;
use crate::latency::types::StreamConfig;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

pub struct AppState {
    pub started_at: Instant,
    pub stream_config: StreamConfig,
    pub producer: Arc<dyn FrameProducer>,
    pub shutdown: CancellationToken,
    open_streams: Arc<AtomicUsize>,
}

impl AppState {
    pub fn new(
        stream_config: StreamConfig,
        producer: Arc<dyn FrameProducer>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            started_at: Instant::now(),
            stream_config,
            producer,
            shutdown,
            open_streams: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn open_streams(&self) -> usize {
        self.open_streams.load(Ordering::Relaxed)
    }

    /// Counts one live connection until the returned guard is dropped.
    pub fn track_stream(&self) -> OpenStreamGuard {
        self.open_streams.fetch_add(1, Ordering::Relaxed);
        OpenStreamGuard {
            open_streams: Arc::clone(&self.open_streams),
        }
    }
}

pub struct OpenStreamGuard {
    open_streams: Arc<AtomicUsize>,
}

impl Drop for OpenStreamGuard {
    fn drop(&mut self) {
        self.open_streams.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Client-side stores shared between the stream consumer and whatever reads
/// the dashboard (CLI summary, report export). One context per consumer.
#[derive(Debug, Clone, Default)]
pub struct DashboardContext {
    pub feed: Arc<RwLock<LiveFeedStore>>,
    pub history: Arc<RwLock<HistoryAccumulator>>,
}
