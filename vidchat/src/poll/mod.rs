//! Adaptive polling.
//!
//! [`PollScheduler`] is a pure state machine: it decides *whether* a tick
//! may start and *how long* to wait before the next one, but performs no
//! I/O and owns no timer. The [`driver`] module runs it on a tokio task.
//!
//! ```text
//!            start()                   stop() / 3 hard failures
//!   Idle ─────────────▶ Active(ms) ─────────────────────────────▶ Stopped
//!                        │    ▲                                     │
//!                        └────┘ tick                  start()       │
//!                                     Active(initial) ◀─────────────┘
//! ```
//!
//! Each tick is handed out as a [`TickTicket`] stamped with the scheduler's
//! epoch. `start()` and `stop()` advance the epoch, so a result delivered
//! for a ticket issued before them is reported as [`Transition::Stale`] and
//! changes nothing.

pub mod driver;

use std::time::Duration;

use vidchat_proto::message::Timestamp;

/// Default cadence right after start or activity.
pub const DEFAULT_INITIAL_INTERVAL: Duration = Duration::from_millis(1000);

/// Default upper bound for the back-off.
pub const DEFAULT_MAX_INTERVAL: Duration = Duration::from_millis(10_000);

/// Tunables for [`PollScheduler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
    /// Interval after `start()` and after any tick that found new messages.
    pub initial_interval: Duration,
    /// Back-off ceiling.
    pub max_interval: Duration,
    /// Consecutive empty ticks after which each further empty tick doubles
    /// the interval.
    pub backoff_threshold: u32,
    /// Consecutive hard failures that stop polling.
    pub max_hard_failures: u32,
    /// Deadline for a single fetch; expiry counts as a benign failure.
    pub fetch_timeout: Duration,
    /// Stop cleanly once a bot reply is observed instead of slowing down.
    pub stop_on_bot_reply: bool,
    /// Send the watermark to the server as a `since` hint.
    pub server_since_filter: bool,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_interval: DEFAULT_INITIAL_INTERVAL,
            max_interval: DEFAULT_MAX_INTERVAL,
            backoff_threshold: 2,
            max_hard_failures: 3,
            fetch_timeout: Duration::from_secs(5),
            stop_on_bot_reply: false,
            server_since_filter: false,
        }
    }
}

/// Coarse scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollPhase {
    /// Never started.
    Idle,
    /// Ticking at [`PollState::interval`].
    Active,
    /// Stopped; see [`PollStatus::stop_reason`].
    Stopped,
}

/// Why polling stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Conversation switch, teardown or an explicit request.
    Requested,
    /// A bot reply arrived and `stop_on_bot_reply` is set.
    BotReplied,
    /// Too many consecutive hard failures.
    ConnectionLost {
        /// Failures counted when giving up.
        failures: u32,
    },
}

/// Cadence and watermark, reset on every start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollState {
    /// Current wait between ticks.
    pub interval: Duration,
    /// Ticks in a row that produced nothing new.
    pub consecutive_empty: u32,
    /// Newest server timestamp observed. Advisory only.
    pub last_seen: Option<Timestamp>,
}

impl PollState {
    const fn initial(interval: Duration) -> Self {
        Self {
            interval,
            consecutive_empty: 0,
            last_seen: None,
        }
    }
}

/// Snapshot for connection-status displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollStatus {
    /// Current phase.
    pub phase: PollPhase,
    /// Current interval.
    pub interval: Duration,
    /// Consecutive empty ticks.
    pub consecutive_empty: u32,
    /// Consecutive hard failures.
    pub hard_failures: u32,
    /// Set while [`PollPhase::Stopped`].
    pub stop_reason: Option<StopReason>,
}

/// Permission to run one tick, valid until the next `start()`/`stop()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickTicket {
    epoch: u64,
}

/// Outcome of one fetch cycle, as reported to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickResult {
    /// The fetch succeeded.
    Fetched {
        /// Messages that were not in the store before.
        new_messages: usize,
        /// Whether any of them came from the bot.
        bot_replied: bool,
        /// Newest server timestamp in the response.
        newest: Option<Timestamp>,
    },
    /// Timeout or not-found; ignored for accounting.
    BenignFailure,
    /// Any other failure.
    HardFailure,
}

/// What the scheduler did with a tick result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Still active; wait [`PollScheduler::next_delay`] and tick again.
    Continue,
    /// The tick stopped polling.
    Stopped(StopReason),
    /// The ticket predates a start or stop; the result was ignored.
    Stale,
}

/// Adaptive-interval poll state machine.
#[derive(Debug)]
pub struct PollScheduler {
    config: PollConfig,
    phase: PollPhase,
    state: PollState,
    hard_failures: u32,
    in_flight: bool,
    epoch: u64,
    stop_reason: Option<StopReason>,
}

impl PollScheduler {
    /// Creates an idle scheduler.
    #[must_use]
    pub const fn new(config: PollConfig) -> Self {
        let state = PollState::initial(config.initial_interval);
        Self {
            config,
            phase: PollPhase::Idle,
            state,
            hard_failures: 0,
            in_flight: false,
            epoch: 0,
            stop_reason: None,
        }
    }

    /// Enters `Active` at the initial interval with all counters and the
    /// watermark cleared. Outstanding tickets become stale.
    pub fn start(&mut self) {
        self.state = PollState::initial(self.config.initial_interval);
        self.activate();
        tracing::debug!(
            interval_ms = duration_ms(self.state.interval),
            "polling started"
        );
    }

    /// Returns to the initial interval after user activity.
    ///
    /// Returns `true` if polling was already active, in which case the
    /// in-flight tick (if any) stays valid. Otherwise the scheduler is
    /// restarted as by [`start`](Self::start), keeping the watermark, and
    /// `false` is returned.
    pub fn reset_activity(&mut self) -> bool {
        self.state.interval = self.config.initial_interval;
        self.state.consecutive_empty = 0;
        self.hard_failures = 0;
        if self.phase == PollPhase::Active {
            return true;
        }
        self.activate();
        false
    }

    /// Enters `Stopped`. Outstanding tickets become stale.
    pub fn stop(&mut self, reason: StopReason) {
        if self.phase != PollPhase::Stopped {
            tracing::debug!(?reason, "polling stopped");
        }
        self.phase = PollPhase::Stopped;
        self.stop_reason = Some(reason);
        self.in_flight = false;
        self.epoch += 1;
    }

    fn activate(&mut self) {
        self.phase = PollPhase::Active;
        self.stop_reason = None;
        self.hard_failures = 0;
        self.in_flight = false;
        self.epoch += 1;
    }

    /// Claims the next tick, unless polling is inactive or another tick
    /// is still in flight.
    pub fn begin_tick(&mut self) -> Option<TickTicket> {
        if self.phase != PollPhase::Active || self.in_flight {
            return None;
        }
        self.in_flight = true;
        Some(TickTicket { epoch: self.epoch })
    }

    /// Applies a tick result and releases the in-flight slot.
    pub fn complete_tick(&mut self, ticket: TickTicket, result: TickResult) -> Transition {
        if ticket.epoch != self.epoch || self.phase != PollPhase::Active {
            return Transition::Stale;
        }
        self.in_flight = false;

        match result {
            TickResult::Fetched {
                new_messages,
                bot_replied,
                newest,
            } => {
                self.hard_failures = 0;
                if let Some(newest) = newest
                    && self.state.last_seen.is_none_or(|seen| newest > seen)
                {
                    self.state.last_seen = Some(newest);
                }
                if new_messages > 0 {
                    self.state.consecutive_empty = 0;
                    self.state.interval = self.config.initial_interval;
                    if bot_replied && self.config.stop_on_bot_reply {
                        self.stop(StopReason::BotReplied);
                        return Transition::Stopped(StopReason::BotReplied);
                    }
                } else {
                    self.state.consecutive_empty = self.state.consecutive_empty.saturating_add(1);
                    if self.state.consecutive_empty >= self.config.backoff_threshold {
                        self.state.interval = self
                            .state
                            .interval
                            .saturating_mul(2)
                            .min(self.config.max_interval);
                    }
                }
                Transition::Continue
            }
            TickResult::BenignFailure => Transition::Continue,
            TickResult::HardFailure => {
                self.hard_failures += 1;
                if self.hard_failures >= self.config.max_hard_failures {
                    let reason = StopReason::ConnectionLost {
                        failures: self.hard_failures,
                    };
                    self.stop(reason);
                    return Transition::Stopped(reason);
                }
                Transition::Continue
            }
        }
    }

    /// Wait before the next tick, or `None` when not active.
    #[must_use]
    pub fn next_delay(&self) -> Option<Duration> {
        (self.phase == PollPhase::Active).then_some(self.state.interval)
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> PollPhase {
        self.phase
    }

    /// Cadence and watermark.
    #[must_use]
    pub const fn state(&self) -> &PollState {
        &self.state
    }

    /// The scheduler's tunables.
    #[must_use]
    pub const fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Whether a tick is currently claimed.
    #[must_use]
    pub const fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Snapshot for status displays.
    #[must_use]
    pub const fn status(&self) -> PollStatus {
        PollStatus {
            phase: self.phase,
            interval: self.state.interval,
            consecutive_empty: self.state.consecutive_empty,
            hard_failures: self.hard_failures,
            stop_reason: self.stop_reason,
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
