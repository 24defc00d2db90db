use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    Poll,
    Heartbeat,
    Reconnect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FiredTimer {
    pub id: TimerId,
    pub kind: TimerKind,
}

/// Something that can arm and disarm timed callbacks. Fires come back to the
/// owning state machine as [`FiredTimer`] values rather than closures.
pub trait Scheduler {
    fn schedule_repeating(&mut self, period: Duration, kind: TimerKind) -> TimerId;
    fn schedule_once(&mut self, delay: Duration, kind: TimerKind) -> TimerId;
    fn cancel(&mut self, id: TimerId);
    /// Releases bookkeeping for a delivered fire. One-shot timers are done
    /// once they fire; repeating timers stay armed.
    fn acknowledge(&mut self, fired: FiredTimer);
}

struct TimerHandle {
    token: CancellationToken,
    repeating: bool,
}

pub struct TokioScheduler {
    fired_tx: UnboundedSender<FiredTimer>,
    root_token: CancellationToken,
    timers: HashMap<TimerId, TimerHandle>,
    next_id: u64,
}

impl TokioScheduler {
    pub fn new(fired_tx: UnboundedSender<FiredTimer>, root_token: CancellationToken) -> Self {
        Self {
            fired_tx,
            root_token,
            timers: HashMap::new(),
            next_id: 0,
        }
    }

    pub fn active_timers(&self) -> usize {
        self.timers.len()
    }

    pub fn cancel_all(&mut self) {
        for (_, handle) in self.timers.drain() {
            handle.token.cancel();
        }
    }

    fn allocate(&mut self, repeating: bool) -> (TimerId, CancellationToken) {
        self.next_id = self.next_id.saturating_add(1);
        let id = TimerId(self.next_id);
        let token = self.root_token.child_token();
        self.timers.insert(
            id,
            TimerHandle {
                token: token.clone(),
                repeating,
            },
        );
        (id, token)
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_repeating(&mut self, period: Duration, kind: TimerKind) -> TimerId {
        let (id, token) = self.allocate(true);
        let fired_tx = self.fired_tx.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if fired_tx.send(FiredTimer { id, kind }).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        id
    }

    fn schedule_once(&mut self, delay: Duration, kind: TimerKind) -> TimerId {
        let (id, token) = self.allocate(false);
        let fired_tx = self.fired_tx.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = fired_tx.send(FiredTimer { id, kind });
                }
            }
        });

        id
    }

    fn cancel(&mut self, id: TimerId) {
        if let Some(handle) = self.timers.remove(&id) {
            handle.token.cancel();
        }
    }

    fn acknowledge(&mut self, fired: FiredTimer) {
        if self
            .timers
            .get(&fired.id)
            .is_some_and(|handle| !handle.repeating)
        {
            self.timers.remove(&fired.id);
        }
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
