// Turn timer: countdown for the active team and the expiry policy
// (a pending request is auto-accepted, otherwise the turn is forfeited).

use std::time::Duration;

use tracing::info;

use super::engine::AuctionEngine;
use super::error::AuctionError;
use super::state::AuctionState;

/// How long a team has to make (and have arbitrated) a pick.
pub const TURN_DURATION: Duration = Duration::from_secs(30);

/// How often the app loop evaluates the timer.
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// What a timer evaluation decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerAction {
    /// No active turn: not in progress, no turn order, or no start time.
    Idle,
    Running { remaining_secs: u64 },
    /// Time ran out with a request pending; it was accepted.
    AutoAccept,
    /// Time ran out with no request; the turn passed to the next team.
    Forfeit,
}

/// Whole seconds left in the active turn, or `None` when no turn is active.
///
/// A turn start in the future (clock skew between observers) counts as zero
/// elapsed time.
pub fn remaining_secs(auction: &AuctionState, now_millis: i64, turn_duration: Duration) -> Option<u64> {
    auction.current_team()?;
    let started = auction.turn_start_time?;
    let elapsed_secs = (now_millis - started).max(0) as u64 / 1000;
    Some(turn_duration.as_secs().saturating_sub(elapsed_secs))
}

/// Decide what the timer should do at `now_millis`, without acting on it.
pub fn evaluate(auction: &AuctionState, now_millis: i64, turn_duration: Duration) -> TimerAction {
    match remaining_secs(auction, now_millis, turn_duration) {
        None => TimerAction::Idle,
        Some(0) if auction.pending_request.is_some() => TimerAction::AutoAccept,
        Some(0) => TimerAction::Forfeit,
        Some(remaining_secs) => TimerAction::Running { remaining_secs },
    }
}

/// Drives the expiry policy against an engine.
#[derive(Debug, Clone, Copy)]
pub struct TurnTimer {
    turn_duration: Duration,
}

impl TurnTimer {
    pub fn new(turn_duration: Duration) -> Self {
        TurnTimer { turn_duration }
    }

    pub fn turn_duration(&self) -> Duration {
        self.turn_duration
    }

    /// One timer tick: pick up any newer persisted state, then evaluate and
    /// apply the expiry policy.
    ///
    /// Syncing first means that when several observers run timers, whichever
    /// acts first moves the turn start forward and the others see a fresh
    /// countdown instead of expiring the same turn again.
    pub fn tick(&self, engine: &mut AuctionEngine) -> Result<TimerAction, AuctionError> {
        engine.sync()?;
        let action = evaluate(engine.auction(), engine.now_millis(), self.turn_duration);

        match action {
            TimerAction::AutoAccept => {
                info!("Turn timer expired with a pending request, accepting it");
                engine.accept_request()?;
            }
            TimerAction::Forfeit => {
                info!(
                    "Turn timer expired, {} forfeits the turn",
                    engine.auction().current_team().unwrap_or("nobody")
                );
                engine.advance_turn()?;
            }
            TimerAction::Idle | TimerAction::Running { .. } => {}
        }
        Ok(action)
    }
}

impl Default for TurnTimer {
    fn default() -> Self {
        TurnTimer::new(TURN_DURATION)
    }
}
