// Auction data model: candidates, teams, the auction state machine record,
// and the versioned application state that gets persisted and synced.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Class labels
// ---------------------------------------------------------------------------

/// Lowest class label a candidate may carry.
pub const CLASS_MIN: u8 = 1;
/// Highest class label a candidate may carry.
pub const CLASS_MAX: u8 = 9;

/// A validated class label ("1".."9").
///
/// Serialized as its string form so persisted state stays readable and
/// compatible with string-keyed exports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClassLabel(u8);

impl ClassLabel {
    /// The lowest label in the domain.
    pub const FIRST: ClassLabel = ClassLabel(CLASS_MIN);

    /// Build a label from its numeric value, rejecting anything outside 1..=9.
    pub fn new(value: u8) -> Option<Self> {
        (CLASS_MIN..=CLASS_MAX).contains(&value).then_some(ClassLabel(value))
    }

    /// Parse a label from user input. Surrounding whitespace is ignored.
    pub fn parse(s: &str) -> Option<Self> {
        s.trim().parse::<u8>().ok().and_then(Self::new)
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl fmt::Display for ClassLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for ClassLabel {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ClassLabel::parse(&value)
            .ok_or_else(|| format!("invalid class label {value:?} (must be {CLASS_MIN}-{CLASS_MAX})"))
    }
}

impl From<ClassLabel> for String {
    fn from(label: ClassLabel) -> Self {
        label.to_string()
    }
}

impl Default for ClassLabel {
    fn default() -> Self {
        ClassLabel::FIRST
    }
}

// ---------------------------------------------------------------------------
// Candidates and teams
// ---------------------------------------------------------------------------

/// A person who can be allocated to a team.
///
/// `admission_number` is the identity key: it is unique across all
/// candidates and is what requests, selections and deletes refer to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub name: String,
    pub class_label: ClassLabel,
    pub admission_number: String,
    #[serde(default)]
    pub assigned: bool,
    /// Opaque image reference (data URL or path). Never inspected by the core.
    #[serde(default)]
    pub image: Option<String>,
}

impl Candidate {
    pub fn new(name: &str, class_label: ClassLabel, admission_number: &str) -> Self {
        Candidate {
            name: name.to_string(),
            class_label,
            admission_number: admission_number.to_string(),
            assigned: false,
            image: None,
        }
    }

    /// Whether this candidate can still be requested in the given class.
    pub fn is_available_in(&self, class_label: ClassLabel) -> bool {
        !self.assigned && self.class_label == class_label
    }
}

/// A team taking part in the auction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    /// Unique team name.
    pub name: String,
    pub leader: String,
    #[serde(default)]
    pub assistant: Option<String>,
    /// Acquired candidates, most recently acquired first.
    #[serde(default)]
    pub roster: Vec<Candidate>,
}

impl Team {
    pub fn new(name: &str, leader: &str, assistant: Option<&str>) -> Self {
        Team {
            name: name.to_string(),
            leader: leader.to_string(),
            assistant: assistant.map(str::to_string),
            roster: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Auction records
// ---------------------------------------------------------------------------

/// A team's proposed pick, awaiting arbitration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRequest {
    pub team: String,
    pub candidate: String,
    pub admission_number: String,
    pub class_label: ClassLabel,
}

/// A finalized, immutable assignment of a candidate to a team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub candidate: String,
    pub admission_number: String,
    pub class_label: ClassLabel,
    pub team: String,
}

/// The most recent selection, kept around for transient notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastSelection {
    #[serde(flatten)]
    pub selection: Selection,
    /// Epoch milliseconds at which the selection was finalized.
    pub at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuctionStatus {
    #[default]
    NotStarted,
    InProgress,
    Completed,
}

impl fmt::Display for AuctionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuctionStatus::NotStarted => "not started",
            AuctionStatus::InProgress => "in progress",
            AuctionStatus::Completed => "completed",
        };
        f.write_str(s)
    }
}

/// Where the auction is within its lifecycle and per-class sub-cycle.
///
/// Derived from [`AuctionState`]; never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuctionPhase<'a> {
    NotStarted,
    /// In progress, but the admin has not supplied a turn order for the
    /// current class yet. Requests are refused until they do.
    AwaitingTurnOrder,
    AwaitingRequest { team: &'a str },
    PendingRequest(&'a PendingRequest),
    Completed,
}

/// The auction state machine record.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuctionState {
    pub status: AuctionStatus,
    pub current_class: ClassLabel,
    pub current_team_index: usize,
    /// Team names in turn order; empty until set for the current class.
    pub turn_order: Vec<String>,
    pub selections: Vec<Selection>,
    pub pending_request: Option<PendingRequest>,
    pub last_selection: Option<LastSelection>,
    /// Epoch milliseconds at which the current team's turn began.
    pub turn_start_time: Option<i64>,
    /// Incremented on every persisted mutation. Never decreases.
    pub state_version: u64,
    /// Identifier of the current auction run, assigned on start. Scopes the
    /// selection audit log.
    pub run_id: Option<String>,
}

impl AuctionState {
    /// Name of the team whose turn it is, if a turn is active.
    pub fn current_team(&self) -> Option<&str> {
        if self.status != AuctionStatus::InProgress {
            return None;
        }
        self.turn_order
            .get(self.current_team_index)
            .map(String::as_str)
    }

    pub fn phase(&self) -> AuctionPhase<'_> {
        match self.status {
            AuctionStatus::NotStarted => AuctionPhase::NotStarted,
            AuctionStatus::Completed => AuctionPhase::Completed,
            AuctionStatus::InProgress => {
                if let Some(req) = &self.pending_request {
                    AuctionPhase::PendingRequest(req)
                } else {
                    match self.current_team() {
                        Some(team) => AuctionPhase::AwaitingRequest { team },
                        None => AuctionPhase::AwaitingTurnOrder,
                    }
                }
            }
        }
    }

    /// Clear every per-turn field (turn order, index, pending request and
    /// turn start time).
    pub(crate) fn clear_turn(&mut self) {
        self.turn_order.clear();
        self.current_team_index = 0;
        self.pending_request = None;
        self.turn_start_time = None;
    }
}

/// The complete shared application state.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppState {
    pub candidates: Vec<Candidate>,
    pub teams: Vec<Team>,
    pub auction: AuctionState,
}

impl AppState {
    pub fn version(&self) -> u64 {
        self.auction.state_version
    }

    pub fn candidate(&self, admission_number: &str) -> Option<&Candidate> {
        self.candidates
            .iter()
            .find(|c| c.admission_number == admission_number)
    }

    pub fn team(&self, name: &str) -> Option<&Team> {
        self.teams.iter().find(|t| t.name == name)
    }

    pub fn team_names(&self) -> Vec<&str> {
        self.teams.iter().map(|t| t.name.as_str()).collect()
    }

    /// Unassigned candidates, in insertion order.
    pub fn unassigned(&self) -> impl Iterator<Item = &Candidate> {
        self.candidates.iter().filter(|c| !c.assigned)
    }

    /// Number of unassigned candidates left in `class_label`.
    pub fn remaining_in_class(&self, class_label: ClassLabel) -> usize {
        self.candidates
            .iter()
            .filter(|c| c.is_available_in(class_label))
            .count()
    }

    /// The lowest class label strictly above `after` that still has an
    /// unassigned candidate.
    pub fn next_class_with_candidates(&self, after: ClassLabel) -> Option<ClassLabel> {
        self.unassigned()
            .map(|c| c.class_label)
            .filter(|label| *label > after)
            .min()
    }

    /// The lowest class label present among all candidates.
    pub fn lowest_class(&self) -> Option<ClassLabel> {
        self.candidates.iter().map(|c| c.class_label).min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(v: u8) -> ClassLabel {
        ClassLabel::new(v).unwrap()
    }

    #[test]
    fn class_label_rejects_out_of_range() {
        assert!(ClassLabel::new(0).is_none());
        assert!(ClassLabel::new(10).is_none());
        assert_eq!(ClassLabel::parse(" 3 "), Some(label(3)));
        assert!(ClassLabel::parse("x").is_none());
        assert!(ClassLabel::parse("-1").is_none());
    }

    #[test]
    fn class_label_serializes_as_string() {
        let json = serde_json::to_string(&label(4)).unwrap();
        assert_eq!(json, "\"4\"");
        let parsed: ClassLabel = serde_json::from_str("\"7\"").unwrap();
        assert_eq!(parsed, label(7));
        assert!(serde_json::from_str::<ClassLabel>("\"12\"").is_err());
    }

    #[test]
    fn phase_follows_turn_fields() {
        let mut auction = AuctionState::default();
        assert_eq!(auction.phase(), AuctionPhase::NotStarted);

        auction.status = AuctionStatus::InProgress;
        assert_eq!(auction.phase(), AuctionPhase::AwaitingTurnOrder);

        auction.turn_order = vec!["A".into(), "B".into()];
        auction.current_team_index = 1;
        assert_eq!(auction.phase(), AuctionPhase::AwaitingRequest { team: "B" });

        let req = PendingRequest {
            team: "B".into(),
            candidate: "Ada".into(),
            admission_number: "100".into(),
            class_label: label(1),
        };
        auction.pending_request = Some(req.clone());
        assert_eq!(auction.phase(), AuctionPhase::PendingRequest(&req));

        auction.status = AuctionStatus::Completed;
        assert_eq!(auction.phase(), AuctionPhase::Completed);
        assert!(auction.current_team().is_none());
    }

    #[test]
    fn next_class_skips_exhausted_classes() {
        let mut state = AppState::default();
        state.candidates = vec![
            Candidate::new("A", label(1), "1"),
            Candidate::new("B", label(3), "2"),
            Candidate::new("C", label(5), "3"),
        ];
        state.candidates[1].assigned = true;

        assert_eq!(state.next_class_with_candidates(label(1)), Some(label(5)));
        assert_eq!(state.next_class_with_candidates(label(5)), None);
        assert_eq!(state.lowest_class(), Some(label(1)));
        assert_eq!(state.remaining_in_class(label(3)), 0);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        // Older snapshots may not carry run_id or last_selection.
        let json = r#"{"candidates":[],"teams":[],"auction":{"status":"in_progress","state_version":4}}"#;
        let state: AppState = serde_json::from_str(json).unwrap();
        assert_eq!(state.auction.status, AuctionStatus::InProgress);
        assert_eq!(state.version(), 4);
        assert!(state.auction.run_id.is_none());
        assert_eq!(state.auction.current_class, ClassLabel::FIRST);
    }
}
