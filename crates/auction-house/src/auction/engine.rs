// The auction engine: lifecycle, turn rotation, request arbitration and class
// progression over an owned AppState, with an injected store, notifier and
// clock.
//
// Every mutating operation is a transaction: it runs against the in-memory
// state, is rolled back on any error (including a failed save), and on
// success is persisted exactly once with a version bump followed by a change
// signal.

use std::collections::HashSet;
use std::io::Read;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::clock::{generate_run_id, Clock};
use super::error::AuctionError;
use super::results::{project_results, ResultRow};
use super::roster_import::{parse_candidates, ImportReport};
use super::state::{
    AppState, AuctionState, AuctionStatus, Candidate, ClassLabel, LastSelection, PendingRequest,
    Selection, Team,
};
use crate::notifier::{ChangeNotifier, StateChanged};
use crate::store::{StateStore, StorageError};

/// What a turn advance did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnAdvance {
    /// The next team in the turn order is up.
    NextTeam { team: String },
    /// The current class is exhausted; a new turn order is needed for this one.
    NextClass { class_label: ClassLabel },
    /// No unassigned candidates remain in any higher class.
    Completed,
    /// Candidates remain but no turn order has been set, so nothing moved.
    AwaitingTurnOrder,
}

/// Changes to an existing candidate's metadata. `None` leaves a field alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateEdit {
    pub admission_number: Option<String>,
    /// `Some(None)` removes the image.
    pub image: Option<Option<String>>,
}

pub struct AuctionEngine {
    state: AppState,
    store: Arc<dyn StateStore>,
    notifier: Arc<dyn ChangeNotifier>,
    clock: Arc<dyn Clock>,
    /// Highest version this engine has applied or written.
    last_applied_version: u64,
}

impl AuctionEngine {
    /// Build an engine on top of whatever `store` currently holds, or a fresh
    /// empty state if nothing was saved yet.
    pub fn open(
        store: Arc<dyn StateStore>,
        notifier: Arc<dyn ChangeNotifier>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AuctionError> {
        let state = store.load()?.unwrap_or_default();
        let last_applied_version = state.version();
        info!(
            "Auction engine opened at v{} ({} candidates, {} teams, status {})",
            last_applied_version,
            state.candidates.len(),
            state.teams.len(),
            state.auction.status
        );
        Ok(AuctionEngine {
            state,
            store,
            notifier,
            clock,
            last_applied_version,
        })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn auction(&self) -> &AuctionState {
        &self.state.auction
    }

    pub fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    pub fn last_applied_version(&self) -> u64 {
        self.last_applied_version
    }

    /// Listen for saves made through this engine's notifier, by any peer.
    pub fn subscribe(&self) -> broadcast::Receiver<StateChanged> {
        self.notifier.subscribe()
    }

    /// Flat results report: selections first, then unassigned candidates.
    pub fn results(&self) -> Vec<ResultRow> {
        project_results(&self.state)
    }

    // ------------------------------------------------------------------
    // Sync
    // ------------------------------------------------------------------

    /// Reload from the store, applying the persisted state only if it is
    /// newer than anything this engine has seen. Returns whether local state
    /// changed.
    pub fn sync(&mut self) -> Result<bool, AuctionError> {
        match self.store.load()? {
            Some(fetched) => Ok(self.apply_if_newer(fetched)),
            None => Ok(false),
        }
    }

    /// Compare-and-apply: replace local state with `fetched` only when its
    /// version is strictly greater than the last-applied version.
    pub fn apply_if_newer(&mut self, fetched: AppState) -> bool {
        let incoming = fetched.version();
        if incoming <= self.last_applied_version {
            debug!(
                "Skipped state load: v{} is not newer than v{}",
                incoming, self.last_applied_version
            );
            return false;
        }
        debug!("Applying state v{} (was v{})", incoming, self.last_applied_version);
        self.state = fetched;
        self.last_applied_version = incoming;
        true
    }

    /// Run `op` against the state and persist the result. On any error the
    /// previous state is restored.
    fn transact<T>(
        &mut self,
        name: &str,
        op: impl FnOnce(&mut AppState, i64) -> Result<T, AuctionError>,
    ) -> Result<T, AuctionError> {
        let previous = self.state.clone();
        let now = self.clock.now_millis();

        let out = match op(&mut self.state, now) {
            Ok(out) => out,
            Err(e) => {
                self.state = previous;
                debug!("{} refused: {}", name, e);
                return Err(e);
            }
        };

        if let Err(e) = self.commit() {
            self.state = previous;
            warn!("{} could not be saved, change discarded: {}", name, e);
            return Err(e.into());
        }
        Ok(out)
    }

    /// Propose the next version, save, then signal peers. The store raises
    /// the proposal past any version a peer wrote in the meantime.
    fn commit(&mut self) -> Result<(), StorageError> {
        self.state.auction.state_version = self.state.version().max(self.last_applied_version) + 1;
        let version = self.store.save(&mut self.state)?;
        self.last_applied_version = version;
        self.notifier.signal(version);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Start (or restart) the auction: clear every assignment and roster and
    /// open the lowest class. A turn order must be set before requests are
    /// accepted.
    pub fn start(&mut self) -> Result<(), AuctionError> {
        self.transact("start", |state, now| {
            if state.candidates.is_empty() {
                return Err(AuctionError::validation("add at least one candidate"));
            }
            if state.teams.len() < 2 {
                return Err(AuctionError::validation("add at least two teams"));
            }
            if state.candidates.len() < state.teams.len() {
                return Err(AuctionError::validation(format!(
                    "not enough candidates for the number of teams ({} candidates, {} teams)",
                    state.candidates.len(),
                    state.teams.len()
                )));
            }

            for candidate in &mut state.candidates {
                candidate.assigned = false;
            }
            for team in &mut state.teams {
                team.roster.clear();
            }

            state.auction = AuctionState {
                status: AuctionStatus::InProgress,
                current_class: state.lowest_class().unwrap_or_default(),
                current_team_index: 0,
                turn_order: Vec::new(),
                selections: Vec::new(),
                pending_request: None,
                last_selection: None,
                turn_start_time: Some(now),
                state_version: state.auction.state_version,
                run_id: Some(generate_run_id(now)),
            };
            Ok(())
        })?;

        info!(
            "Auction started in class {} with {} teams and {} candidates",
            self.state.auction.current_class,
            self.state.teams.len(),
            self.state.candidates.len()
        );
        Ok(())
    }

    /// Set the order in which teams take turns for the current class. The
    /// order must name every team exactly once.
    pub fn set_turn_order<S: AsRef<str>>(&mut self, order: &[S]) -> Result<(), AuctionError> {
        let order: Vec<String> = order.iter().map(|s| s.as_ref().trim().to_string()).collect();

        self.transact("set_turn_order", |state, now| {
            if state.auction.status != AuctionStatus::InProgress {
                return Err(AuctionError::NotInProgress);
            }
            if state.auction.pending_request.is_some() {
                return Err(AuctionError::conflict(
                    "resolve the pending request before changing the turn order",
                ));
            }
            validate_turn_order(&order, &state.team_names())?;

            state.auction.turn_order = order;
            state.auction.current_team_index = 0;
            state.auction.turn_start_time = Some(now);
            Ok(())
        })?;

        info!(
            "Turn order for class {}: {}",
            self.state.auction.current_class,
            self.state.auction.turn_order.join(", ")
        );
        Ok(())
    }

    /// File `team`'s pick of the candidate with `admission_number`, pending
    /// admin arbitration.
    pub fn request_candidate(
        &mut self,
        team: &str,
        admission_number: &str,
    ) -> Result<PendingRequest, AuctionError> {
        let request = self.transact("request_candidate", |state, _now| {
            let auction = &state.auction;
            if auction.status != AuctionStatus::InProgress {
                return Err(AuctionError::NotInProgress);
            }
            let current = auction.current_team();
            if current != Some(team) {
                return Err(AuctionError::Turn {
                    team: team.to_string(),
                    current: current.map(str::to_string),
                });
            }
            if auction.pending_request.is_some() {
                return Err(AuctionError::conflict("there is already a pending request"));
            }

            let class_label = auction.current_class;
            let candidate = state
                .candidates
                .iter()
                .find(|c| c.admission_number == admission_number && c.is_available_in(class_label))
                .ok_or_else(|| AuctionError::NotAvailable(admission_number.to_string()))?;

            let request = PendingRequest {
                team: team.to_string(),
                candidate: candidate.name.clone(),
                admission_number: candidate.admission_number.clone(),
                class_label,
            };
            state.auction.pending_request = Some(request.clone());
            Ok(request)
        })?;

        info!(
            "{} requested {} ({}) in class {}",
            request.team, request.candidate, request.admission_number, request.class_label
        );
        Ok(request)
    }

    /// Confirm the pending request: assign the candidate, record the
    /// selection and advance the turn, all in one save.
    ///
    /// Returns `Ok(None)` without touching anything when there is no pending
    /// request. If the requested candidate is no longer available (deleted or
    /// re-keyed by another observer) the request is dropped and `Ok(None)` is
    /// returned.
    pub fn accept_request(&mut self) -> Result<Option<Selection>, AuctionError> {
        if self.state.auction.pending_request.is_none() {
            return Ok(None);
        }

        let outcome = self.transact("accept_request", |state, now| {
            let Some(req) = state.auction.pending_request.take() else {
                return Ok(None);
            };

            let candidate_idx = state
                .candidates
                .iter()
                .position(|c| c.admission_number == req.admission_number && !c.assigned);
            let team_idx = state.teams.iter().position(|t| t.name == req.team);
            let (Some(candidate_idx), Some(team_idx)) = (candidate_idx, team_idx) else {
                warn!(
                    "Dropping request for {} by {}: candidate or team no longer available",
                    req.admission_number, req.team
                );
                return Ok(None);
            };

            let candidate = &mut state.candidates[candidate_idx];
            candidate.assigned = true;
            let acquired = candidate.clone();
            state.teams[team_idx].roster.insert(0, acquired);

            let selection = Selection {
                candidate: req.candidate,
                admission_number: req.admission_number,
                class_label: req.class_label,
                team: req.team,
            };
            state.auction.selections.push(selection.clone());
            state.auction.last_selection = Some(LastSelection {
                selection: selection.clone(),
                at: now,
            });

            let advance = advance_turn_in(state, now);
            Ok(Some((selection, advance)))
        })?;

        match outcome {
            Some((selection, advance)) => {
                info!(
                    "{} ({}) assigned to {}",
                    selection.candidate, selection.class_label, selection.team
                );
                log_advance(&advance);
                Ok(Some(selection))
            }
            None => Ok(None),
        }
    }

    /// Drop the pending request. The same team keeps its turn and may
    /// request again. Returns whether there was anything to reject.
    pub fn reject_request(&mut self) -> Result<bool, AuctionError> {
        if self.state.auction.pending_request.is_none() {
            return Ok(false);
        }
        let rejected = self.transact("reject_request", |state, _now| {
            Ok(state.auction.pending_request.take())
        })?;
        if let Some(req) = rejected {
            info!("Request by {} for {} rejected", req.team, req.candidate);
        }
        Ok(true)
    }

    /// Move on without a pick: next team, next class, or completion.
    ///
    /// Refused while a request is pending; a timed-out pending request is
    /// accepted instead (see `TurnTimer`).
    pub fn advance_turn(&mut self) -> Result<TurnAdvance, AuctionError> {
        let auction = &self.state.auction;
        if auction.status != AuctionStatus::InProgress {
            return Err(AuctionError::NotInProgress);
        }
        if auction.pending_request.is_some() {
            return Err(AuctionError::conflict(
                "a request is pending; accept or reject it first",
            ));
        }
        if auction.turn_order.is_empty() && self.state.remaining_in_class(auction.current_class) > 0
        {
            debug!("advance_turn ignored: awaiting turn order");
            return Ok(TurnAdvance::AwaitingTurnOrder);
        }

        let advance = self.transact("advance_turn", |state, now| Ok(advance_turn_in(state, now)))?;
        log_advance(&advance);
        Ok(advance)
    }

    /// Halt the auction. Selections and assignments made so far are kept.
    pub fn stop(&mut self) -> Result<(), AuctionError> {
        self.transact("stop", |state, _now| {
            state.auction.status = AuctionStatus::NotStarted;
            state.auction.clear_turn();
            Ok(())
        })?;
        info!("Auction stopped");
        Ok(())
    }

    /// Discard every candidate, team and auction record. The version keeps
    /// counting up so observers pick the empty state up like any other save.
    pub fn reset_system(&mut self) -> Result<(), AuctionError> {
        self.transact("reset_system", |state, _now| {
            let version = state.version();
            *state = AppState::default();
            state.auction.state_version = version;
            Ok(())
        })?;
        info!("System reset to an empty state at v{}", self.state.version());
        Ok(())
    }

    // ------------------------------------------------------------------
    // Candidates and teams
    // ------------------------------------------------------------------

    pub fn add_candidate(&mut self, candidate: Candidate) -> Result<(), AuctionError> {
        let name = candidate.name.clone();
        self.transact("add_candidate", |state, _now| {
            ensure_editable(&state.auction, "add candidates")?;
            let name = candidate.name.trim();
            let admission_number = candidate.admission_number.trim();
            if name.is_empty() || admission_number.is_empty() {
                return Err(AuctionError::validation(
                    "name, class and admission number are required",
                ));
            }
            if state.candidate(admission_number).is_some() {
                return Err(AuctionError::validation(format!(
                    "admission number {admission_number} is already used"
                )));
            }
            state.candidates.push(Candidate {
                name: name.to_string(),
                admission_number: admission_number.to_string(),
                assigned: false,
                ..candidate
            });
            Ok(())
        })?;
        info!("Added candidate {}", name);
        Ok(())
    }

    /// Update a candidate's admission number and/or image. Allowed at any
    /// time; an assigned candidate's roster entry is updated as well.
    pub fn edit_candidate(
        &mut self,
        admission_number: &str,
        edit: CandidateEdit,
    ) -> Result<(), AuctionError> {
        self.transact("edit_candidate", |state, _now| {
            let idx = state
                .candidates
                .iter()
                .position(|c| c.admission_number == admission_number)
                .ok_or_else(|| {
                    AuctionError::validation(format!("no candidate with admission number {admission_number}"))
                })?;

            let new_key = match &edit.admission_number {
                Some(key) => {
                    let key = key.trim();
                    if key.is_empty() {
                        return Err(AuctionError::validation("admission number is required"));
                    }
                    if key != admission_number && state.candidate(key).is_some() {
                        return Err(AuctionError::validation(format!(
                            "admission number {key} is already used by another candidate"
                        )));
                    }
                    key.to_string()
                }
                None => admission_number.to_string(),
            };

            let candidate = &mut state.candidates[idx];
            candidate.admission_number = new_key;
            if let Some(image) = edit.image {
                candidate.image = image;
            }
            let updated = candidate.clone();

            if updated.assigned {
                for team in &mut state.teams {
                    for member in team
                        .roster
                        .iter_mut()
                        .filter(|m| m.admission_number == admission_number)
                    {
                        *member = updated.clone();
                    }
                }
            }
            Ok(())
        })?;
        info!("Edited candidate {}", admission_number);
        Ok(())
    }

    pub fn delete_candidate(&mut self, admission_number: &str) -> Result<(), AuctionError> {
        self.transact("delete_candidate", |state, _now| {
            ensure_editable(&state.auction, "delete candidates")?;
            let idx = state
                .candidates
                .iter()
                .position(|c| c.admission_number == admission_number)
                .ok_or_else(|| {
                    AuctionError::validation(format!("no candidate with admission number {admission_number}"))
                })?;
            if state.candidates[idx].assigned {
                return Err(AuctionError::conflict(format!(
                    "candidate {admission_number} is assigned to a team"
                )));
            }
            state.candidates.remove(idx);
            Ok(())
        })?;
        info!("Deleted candidate {}", admission_number);
        Ok(())
    }

    pub fn add_team(&mut self, team: Team) -> Result<(), AuctionError> {
        let name = team.name.trim().to_string();
        self.transact("add_team", |state, _now| {
            ensure_editable(&state.auction, "add teams")?;
            let leader = team.leader.trim();
            if name.is_empty() || leader.is_empty() {
                return Err(AuctionError::validation("team name and leader are required"));
            }
            if state.team(&name).is_some() {
                return Err(AuctionError::validation(format!("team {name} already exists")));
            }
            let assistant = team
                .assistant
                .as_deref()
                .map(str::trim)
                .filter(|a| !a.is_empty());
            state.teams.push(Team::new(&name, leader, assistant));
            Ok(())
        })?;
        info!("Added team {}", name);
        Ok(())
    }

    pub fn delete_team(&mut self, name: &str) -> Result<(), AuctionError> {
        self.transact("delete_team", |state, _now| {
            ensure_editable(&state.auction, "delete teams")?;
            let idx = state
                .teams
                .iter()
                .position(|t| t.name == name)
                .ok_or_else(|| AuctionError::validation(format!("no team named {name}")))?;
            if !state.teams[idx].roster.is_empty() {
                return Err(AuctionError::conflict(format!(
                    "team {name} has acquired candidates"
                )));
            }
            state.teams.remove(idx);
            Ok(())
        })?;
        info!("Deleted team {}", name);
        Ok(())
    }

    /// Import candidates from headerless CSV rows. Valid rows are saved in a
    /// single commit; invalid ones are reported and skipped.
    pub fn import_candidates<R: Read>(&mut self, rdr: R) -> Result<ImportReport, AuctionError> {
        ensure_editable(&self.state.auction, "import candidates")?;
        let report = parse_candidates(rdr, &self.state.candidates);

        if !report.added.is_empty() {
            let added = report.added.clone();
            self.transact("import_candidates", |state, _now| {
                state.candidates.extend(added);
                Ok(())
            })?;
        }
        info!(
            "Processed {} rows: {} candidates added, {} errors",
            report.rows_processed,
            report.added.len(),
            report.errors.len()
        );
        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Check that `order` names every team in `teams` exactly once.
fn validate_turn_order(order: &[String], teams: &[&str]) -> Result<(), AuctionError> {
    let known: HashSet<&str> = teams.iter().copied().collect();
    let mut seen: HashSet<&str> = HashSet::new();

    for name in order {
        if !known.contains(name.as_str()) {
            return Err(AuctionError::validation(format!("unknown team {name:?} in turn order")));
        }
        if !seen.insert(name.as_str()) {
            return Err(AuctionError::validation(format!("team {name:?} appears twice in turn order")));
        }
    }

    let missing: Vec<&str> = teams.iter().copied().filter(|t| !seen.contains(t)).collect();
    if !missing.is_empty() {
        return Err(AuctionError::validation(format!(
            "turn order is missing: {}",
            missing.join(", ")
        )));
    }
    Ok(())
}

fn ensure_editable(auction: &AuctionState, action: &str) -> Result<(), AuctionError> {
    if auction.status == AuctionStatus::InProgress {
        return Err(AuctionError::conflict(format!(
            "cannot {action} while the auction is in progress"
        )));
    }
    Ok(())
}

/// Advance within the current class, or move to the next class that still
/// has unassigned candidates, or complete the auction.
fn advance_turn_in(state: &mut AppState, now: i64) -> TurnAdvance {
    let current = state.auction.current_class;

    if state.remaining_in_class(current) == 0 {
        let next = state.next_class_with_candidates(current);
        let auction = &mut state.auction;
        auction.clear_turn();
        return match next {
            Some(class_label) => {
                auction.current_class = class_label;
                TurnAdvance::NextClass { class_label }
            }
            None => {
                auction.status = AuctionStatus::Completed;
                TurnAdvance::Completed
            }
        };
    }

    let auction = &mut state.auction;
    if auction.turn_order.is_empty() {
        return TurnAdvance::AwaitingTurnOrder;
    }
    auction.current_team_index = (auction.current_team_index + 1) % auction.turn_order.len();
    auction.turn_start_time = Some(now);
    TurnAdvance::NextTeam {
        team: auction.turn_order[auction.current_team_index].clone(),
    }
}

fn log_advance(advance: &TurnAdvance) {
    match advance {
        TurnAdvance::NextTeam { team } => info!("Next turn: {}", team),
        TurnAdvance::NextClass { class_label } => {
            info!("Moved to class {}, awaiting a new turn order", class_label)
        }
        TurnAdvance::Completed => info!("Auction completed: no more candidates"),
        TurnAdvance::AwaitingTurnOrder => debug!("Turn not advanced: awaiting turn order"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
