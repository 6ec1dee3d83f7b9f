// App orchestrator: owns the auction engine and serializes every event that
// can touch it (operator commands, change signals from peers, timer ticks)
// through one select loop.

use std::fs::File;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::auction::engine::{AuctionEngine, CandidateEdit};
use crate::auction::results;
use crate::auction::state::{Candidate, Team};
use crate::auction::timer::{TimerAction, TurnTimer};
use crate::config::Config;
use crate::protocol::{AuctionSnapshot, UiUpdate, UserCommand};

/// Runtime knobs for the app loop.
#[derive(Debug, Clone)]
pub struct AppSettings {
    pub turn_duration: Duration,
    pub tick_interval: Duration,
    pub export_path: PathBuf,
}

impl AppSettings {
    pub fn from_config(config: &Config) -> Self {
        AppSettings {
            turn_duration: config.auction.turn_duration(),
            tick_interval: config.auction.tick_interval(),
            export_path: PathBuf::from(&config.export.path),
        }
    }
}

/// Loop-local bookkeeping so each peer's selection is announced once.
struct Announcer {
    last_announced_at: Option<i64>,
}

impl Announcer {
    fn new(engine: &AuctionEngine) -> Self {
        Announcer {
            last_announced_at: engine.auction().last_selection.as_ref().map(|s| s.at),
        }
    }

    async fn publish(
        &mut self,
        engine: &AuctionEngine,
        settings: &AppSettings,
        ui_tx: &mpsc::Sender<UiUpdate>,
    ) {
        if let Some(last) = &engine.auction().last_selection {
            if self.last_announced_at != Some(last.at) {
                self.last_announced_at = Some(last.at);
                let _ = ui_tx.send(UiUpdate::SelectionMade(last.selection.clone())).await;
            }
        }
        let snapshot =
            AuctionSnapshot::capture(engine.state(), engine.now_millis(), settings.turn_duration);
        let _ = ui_tx.send(UiUpdate::Snapshot(Box::new(snapshot))).await;
    }
}

// ---------------------------------------------------------------------------
// Main event loop
// ---------------------------------------------------------------------------

/// Run the main application event loop.
///
/// Listens on three sources using `tokio::select!`:
/// 1. User commands from the console
/// 2. State-change signals (own saves, in-process peers, the store watcher)
/// 3. The turn timer interval
///
/// Pushes UI updates through `ui_tx`. Returns on `Quit` or when the command
/// channel closes.
pub async fn run(
    mut cmd_rx: mpsc::Receiver<UserCommand>,
    ui_tx: mpsc::Sender<UiUpdate>,
    mut engine: AuctionEngine,
    settings: AppSettings,
) -> anyhow::Result<()> {
    info!("Application event loop started");

    let timer = TurnTimer::new(settings.turn_duration);
    let mut changes = engine.subscribe();
    let mut changes_open = true;
    let mut announcer = Announcer::new(&engine);

    let mut tick_interval = tokio::time::interval(settings.tick_interval);
    tick_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick completes immediately; consume it so the first
    // real check happens after one full interval.
    tick_interval.tick().await;

    announcer.publish(&engine, &settings, &ui_tx).await;

    loop {
        tokio::select! {
            // --- User commands ---
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(UserCommand::Quit) => {
                        info!("Quit command received, shutting down");
                        break;
                    }
                    Some(cmd) => {
                        handle_user_command(&mut engine, cmd, &settings, &ui_tx).await;
                        announcer.publish(&engine, &settings, &ui_tx).await;
                    }
                    None => {
                        info!("Command channel closed, shutting down");
                        break;
                    }
                }
            }

            // --- Change signals (only poll while the channel is open) ---
            changed = changes.recv(), if changes_open => {
                match changed {
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {
                        match engine.sync() {
                            Ok(true) => announcer.publish(&engine, &settings, &ui_tx).await,
                            Ok(false) => {}
                            Err(e) => {
                                warn!("Failed to reload state after change signal: {}", e);
                                let _ = ui_tx.send(UiUpdate::Error(e.to_string())).await;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Change notifier closed");
                        changes_open = false;
                    }
                }
            }

            // --- Turn timer ---
            _ = tick_interval.tick() => {
                let before = engine.state().version();
                match timer.tick(&mut engine) {
                    Ok(action) => {
                        if engine.state().version() != before {
                            announcer.publish(&engine, &settings, &ui_tx).await;
                        } else if let TimerAction::Running { remaining_secs } = action {
                            if let Some(team) = engine.auction().current_team() {
                                let _ = ui_tx
                                    .send(UiUpdate::Countdown {
                                        team: team.to_string(),
                                        remaining_secs,
                                    })
                                    .await;
                            }
                        }
                    }
                    Err(e) => {
                        warn!("Turn timer tick failed: {}", e);
                        let _ = ui_tx.send(UiUpdate::Error(e.to_string())).await;
                    }
                }
            }
        }
    }

    info!("Application event loop exiting");
    Ok(())
}

/// Apply one operator command. Failures are reported to the UI; the loop
/// keeps running.
async fn handle_user_command(
    engine: &mut AuctionEngine,
    cmd: UserCommand,
    settings: &AppSettings,
    ui_tx: &mpsc::Sender<UiUpdate>,
) {
    // Act on the freshest persisted state.
    if let Err(e) = engine.sync() {
        warn!("Failed to sync before command: {}", e);
    }

    debug!("Handling command: {:?}", cmd);
    match execute(engine, cmd, settings) {
        Ok(Some(update)) => {
            let _ = ui_tx.send(update).await;
        }
        Ok(None) => {}
        Err(e) => {
            info!("Command failed: {:#}", e);
            let _ = ui_tx.send(UiUpdate::Error(format!("{e:#}"))).await;
        }
    }
}

fn execute(
    engine: &mut AuctionEngine,
    cmd: UserCommand,
    settings: &AppSettings,
) -> anyhow::Result<Option<UiUpdate>> {
    match cmd {
        UserCommand::Start => engine.start()?,
        UserCommand::SetTurnOrder(order) => engine.set_turn_order(&order)?,
        UserCommand::Request {
            team,
            admission_number,
        } => {
            engine.request_candidate(&team, &admission_number)?;
        }
        UserCommand::Accept => {
            if engine.accept_request()?.is_none() {
                return Ok(Some(UiUpdate::Error("no request was accepted".into())));
            }
        }
        UserCommand::Reject => {
            if !engine.reject_request()? {
                return Ok(Some(UiUpdate::Error("there is no pending request".into())));
            }
        }
        UserCommand::Skip => {
            engine.advance_turn()?;
        }
        UserCommand::Stop => engine.stop()?,
        UserCommand::Reset => engine.reset_system()?,
        UserCommand::AddTeam {
            name,
            leader,
            assistant,
        } => engine.add_team(Team::new(&name, &leader, assistant.as_deref()))?,
        UserCommand::AddCandidate {
            name,
            class_label,
            admission_number,
        } => engine.add_candidate(Candidate::new(&name, class_label, &admission_number))?,
        UserCommand::EditCandidate {
            admission_number,
            new_admission_number,
        } => engine.edit_candidate(
            &admission_number,
            CandidateEdit {
                admission_number: Some(new_admission_number),
                image: None,
            },
        )?,
        UserCommand::DeleteCandidate { admission_number } => {
            engine.delete_candidate(&admission_number)?
        }
        UserCommand::DeleteTeam { name } => engine.delete_team(&name)?,
        UserCommand::Import { path } => {
            let file = File::open(&path)
                .with_context(|| format!("failed to open {}", path.display()))?;
            let report = engine.import_candidates(file)?;
            return Ok(Some(UiUpdate::ImportFinished(report)));
        }
        UserCommand::Export { path } => {
            if !results::has_results(engine.state()) {
                return Ok(Some(UiUpdate::Error("no results to export".into())));
            }
            let path = path.unwrap_or_else(|| settings.export_path.clone());
            let rows = results::write_csv(engine.state(), &path)?;
            info!("Exported {} result rows to {}", rows, path.display());
            return Ok(Some(UiUpdate::Exported { path, rows }));
        }
        // Show just needs the snapshot the caller sends after every command.
        UserCommand::Show => {}
        // Handled by the select loop.
        UserCommand::Quit => {}
    }
    Ok(None)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
