// Messages between the console front end and the app loop.

use std::path::PathBuf;
use std::time::Duration;

use crate::auction::roster_import::ImportReport;
use crate::auction::state::{
    AppState, AuctionStatus, ClassLabel, LastSelection, PendingRequest, Selection,
};
use crate::auction::timer::remaining_secs;

/// An operator intent, parsed from one console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserCommand {
    Start,
    SetTurnOrder(Vec<String>),
    Request {
        team: String,
        admission_number: String,
    },
    Accept,
    Reject,
    /// Pass the turn without a pick.
    Skip,
    Stop,
    Reset,
    AddTeam {
        name: String,
        leader: String,
        assistant: Option<String>,
    },
    AddCandidate {
        name: String,
        class_label: ClassLabel,
        admission_number: String,
    },
    EditCandidate {
        admission_number: String,
        new_admission_number: String,
    },
    DeleteCandidate {
        admission_number: String,
    },
    DeleteTeam {
        name: String,
    },
    Import {
        path: PathBuf,
    },
    /// Export results; `None` uses the configured path.
    Export {
        path: Option<PathBuf>,
    },
    Show,
    Quit,
}

/// Something the front end should show.
#[derive(Debug, Clone, PartialEq)]
pub enum UiUpdate {
    /// Full view of the current state. Sent after every change.
    Snapshot(Box<AuctionSnapshot>),
    /// Timer tick for the active turn.
    Countdown { team: String, remaining_secs: u64 },
    /// A selection was finalized (locally or by a peer).
    SelectionMade(Selection),
    ImportFinished(ImportReport),
    Exported { path: PathBuf, rows: usize },
    Error(String),
}

/// A team as shown to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeamView {
    pub name: String,
    pub leader: String,
    pub assistant: Option<String>,
    /// Candidate names, most recently acquired first.
    pub roster: Vec<String>,
}

/// Read-only projection of the state for rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct AuctionSnapshot {
    pub version: u64,
    pub status: AuctionStatus,
    pub current_class: ClassLabel,
    pub turn_order: Vec<String>,
    pub current_team: Option<String>,
    pub pending_request: Option<PendingRequest>,
    pub remaining_secs: Option<u64>,
    pub teams: Vec<TeamView>,
    /// (name, admission number) of unassigned candidates in the current class.
    pub available: Vec<(String, String)>,
    pub unassigned_total: usize,
    pub selections: usize,
    pub last_selection: Option<LastSelection>,
}

impl AuctionSnapshot {
    pub fn capture(state: &AppState, now_millis: i64, turn_duration: Duration) -> Self {
        let auction = &state.auction;
        let in_progress = auction.status == AuctionStatus::InProgress;
        AuctionSnapshot {
            version: state.version(),
            status: auction.status,
            current_class: auction.current_class,
            turn_order: auction.turn_order.clone(),
            current_team: auction.current_team().map(str::to_string),
            pending_request: auction.pending_request.clone(),
            remaining_secs: remaining_secs(auction, now_millis, turn_duration),
            teams: state
                .teams
                .iter()
                .map(|t| TeamView {
                    name: t.name.clone(),
                    leader: t.leader.clone(),
                    assistant: t.assistant.clone(),
                    roster: t.roster.iter().map(|c| c.name.clone()).collect(),
                })
                .collect(),
            available: if in_progress {
                state
                    .candidates
                    .iter()
                    .filter(|c| c.is_available_in(auction.current_class))
                    .map(|c| (c.name.clone(), c.admission_number.clone()))
                    .collect()
            } else {
                Vec::new()
            },
            unassigned_total: state.unassigned().count(),
            selections: auction.selections.len(),
            last_selection: auction.last_selection.clone(),
        }
    }
}
