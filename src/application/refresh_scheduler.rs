// Refresh scheduler - keeps history in step with the active selection and a periodic timer
use crate::domain::history::Selection;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Emitted by the armed timer once per period
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshTick {
    generation: u64,
}

enum SchedulerState {
    Idle,
    Scheduled {
        generation: u64,
        cancel: CancellationToken,
        task: JoinHandle<()>,
    },
}

/// Idle/Scheduled state machine owning at most one repeating refresh timer.
///
/// Every change of selection or auto-refresh flag disarms the current timer
/// before deciding whether to arm a new one. Ticks carry the generation of
/// the timer that produced them, so ticks already queued by a disarmed timer
/// are rejected by [`RefreshScheduler::accepts`].
pub struct RefreshScheduler {
    period: Duration,
    ticks: mpsc::UnboundedSender<RefreshTick>,
    state: SchedulerState,
    selection: Option<Selection>,
    auto_refresh: bool,
    next_generation: u64,
}

impl RefreshScheduler {
    pub fn new(period: Duration, ticks: mpsc::UnboundedSender<RefreshTick>) -> Self {
        Self {
            period,
            ticks,
            state: SchedulerState::Idle,
            selection: None,
            auto_refresh: false,
            next_generation: 0,
        }
    }

    pub fn is_scheduled(&self) -> bool {
        matches!(self.state, SchedulerState::Scheduled { .. })
    }

    /// Apply new inputs. Returns true when a fetch should be issued right away:
    /// the selection changed, or auto-refresh was just switched on.
    pub fn update(&mut self, selection: Option<&Selection>, auto_refresh: bool) -> bool {
        let selection_changed = self.selection.as_ref() != selection;
        let enabled_now = auto_refresh && !self.auto_refresh;
        if !selection_changed && auto_refresh == self.auto_refresh {
            return false;
        }

        self.disarm();
        self.selection = selection.cloned();
        self.auto_refresh = auto_refresh;

        let complete = self.selection.as_ref().is_some_and(Selection::is_complete);
        if auto_refresh && complete {
            self.arm();
        }

        complete && (selection_changed || enabled_now)
    }

    /// Whether `tick` came from the currently armed timer.
    pub fn accepts(&self, tick: RefreshTick) -> bool {
        match &self.state {
            SchedulerState::Scheduled { generation, .. } => *generation == tick.generation,
            SchedulerState::Idle => false,
        }
    }

    pub fn teardown(&mut self) {
        self.disarm();
        self.selection = None;
        self.auto_refresh = false;
    }

    fn arm(&mut self) {
        self.next_generation += 1;
        let generation = self.next_generation;
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let ticks = self.ticks.clone();
        let period = self.period;

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        if ticks.send(RefreshTick { generation }).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        tracing::debug!("Refresh timer armed (generation {}, every {:?})", generation, period);
        self.state = SchedulerState::Scheduled {
            generation,
            cancel,
            task,
        };
    }

    fn disarm(&mut self) {
        if let SchedulerState::Scheduled {
            generation,
            cancel,
            task,
        } = std::mem::replace(&mut self.state, SchedulerState::Idle)
        {
            cancel.cancel();
            task.abort();
            tracing::debug!("Refresh timer disarmed (generation {})", generation);
        }
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.disarm();
    }
}
