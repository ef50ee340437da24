//! Connection log buffer and its periodically refreshed display.
//!
//! The backend streams log lines while the cluster starts and runs. Every
//! line is kept in the full buffer; what the panel shows is a projection of
//! that buffer, recomputed once per refresh interval by a [`RefreshTicker`].

use std::time::Duration;

use log::debug;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// How the full buffer is projected onto the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayPolicy {
    /// Above this many lines the display is truncated.
    pub limit: usize,
    /// How many lines below `limit` the truncated display keeps.
    pub truncate_offset: usize,
}

impl Default for DisplayPolicy {
    fn default() -> Self {
        Self {
            limit: 5000,
            truncate_offset: 1000,
        }
    }
}

impl DisplayPolicy {
    /// Number of buffer lines kept once truncation kicks in.
    pub fn tail_len(&self) -> usize {
        self.limit.saturating_sub(self.truncate_offset)
    }

    /// Marker line shown in place of the dropped head.
    pub fn marker(&self) -> String {
        format!(".. showing only last {} lines ..", self.tail_len())
    }

    /// Project the full buffer onto the display.
    ///
    /// At most `tail_len() + 1` entries when truncated.
    pub fn project(&self, full: &[String]) -> Vec<String> {
        if full.len() <= self.limit {
            return full.to_vec();
        }
        let tail = self.tail_len();
        let mut display = Vec::with_capacity(tail + 1);
        display.push(self.marker());
        display.extend_from_slice(&full[full.len() - tail..]);
        display
    }
}

/// Full log buffer plus the last displayed projection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogView {
    policy: DisplayPolicy,
    full: Vec<String>,
    displayed: Vec<String>,
}

impl LogView {
    pub fn new(policy: DisplayPolicy) -> Self {
        Self {
            policy,
            full: Vec::new(),
            displayed: Vec::new(),
        }
    }

    /// A view that starts with `lines` already displayed.
    pub fn seeded(policy: DisplayPolicy, lines: impl IntoIterator<Item = String>) -> Self {
        let mut view = Self::new(policy);
        view.append(lines);
        view
    }

    /// Append lines to the full buffer.
    ///
    /// The first batch into an empty buffer is displayed immediately; later
    /// batches show up on the next [`refresh`](Self::refresh).
    pub fn append(&mut self, lines: impl IntoIterator<Item = String>) {
        let was_empty = self.full.is_empty();
        self.full.extend(lines);
        if was_empty && !self.full.is_empty() {
            self.displayed = self.policy.project(&self.full);
        }
    }

    /// Recompute the display. Returns whether it changed.
    pub fn refresh(&mut self) -> bool {
        let next = self.policy.project(&self.full);
        if next == self.displayed {
            return false;
        }
        self.displayed = next;
        true
    }

    pub fn displayed(&self) -> &[String] {
        &self.displayed
    }

    pub fn full(&self) -> &[String] {
        &self.full
    }

    pub fn policy(&self) -> DisplayPolicy {
        self.policy
    }
}

/// Periodic display refresh owned by a phase.
///
/// The task is aborted when the ticker is dropped, so leaving the phase
/// stops it. Ticks already queued by the task carry its id; consumers
/// compare it to the live ticker's id and ignore mismatches.
#[derive(Debug)]
pub struct RefreshTicker {
    id: u64,
    task: JoinHandle<()>,
}

impl RefreshTicker {
    /// Spawn a ticker calling `tick` every `period`, starting one period
    /// from now. The task stops when `tick` returns false.
    ///
    /// Must be called within a tokio runtime.
    pub fn spawn<F>(id: u64, period: Duration, tick: F) -> Self
    where
        F: Fn() -> bool + Send + 'static,
    {
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if !tick() {
                    debug!("[logs] Ticker {} receiver gone, stopping", id);
                    break;
                }
            }
        });
        Self { id, task }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for RefreshTicker {
    fn drop(&mut self) {
        self.task.abort();
    }
}
