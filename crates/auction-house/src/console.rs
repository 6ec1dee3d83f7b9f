// Line-oriented console front end.
//
// Parses operator lines into UserCommand messages for the app loop and
// renders UiUpdate messages back as plain text.

use std::fmt::Write as _;
use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;

use crate::auction::state::{AuctionStatus, ClassLabel};
use crate::protocol::{AuctionSnapshot, UiUpdate, UserCommand};

pub const HELP: &str = "\
commands:
  start                                   start (or restart) the auction
  order <team>,<team>,...                 set the turn order for the current class
  request <team> <admission>              file a pick for the team whose turn it is
  accept | reject                         arbitrate the pending request
  skip                                    pass the current turn
  stop | reset                            halt the auction | wipe everything
  add-team <name> <leader> [assistant]
  add-candidate <name> <class> <admission>
  edit-candidate <admission> <new-admission>
  delete-candidate <admission>
  delete-team <name>
  import <csv path>                       rows: Name,Admission Number,Class[,Image]
  export [path]
  show | help | quit
Quote arguments containing spaces, shell style: add-team \"Red Owls\" Olive";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown command `{0}` (type `help`)")]
    Unknown(String),

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("unbalanced quotes or trailing backslash")]
    BadQuoting,

    #[error("invalid class `{0}` (must be 1-9)")]
    InvalidClass(String),
}

/// Outcome of parsing one console line.
#[derive(Debug, PartialEq, Eq)]
pub enum ConsoleInput {
    Command(UserCommand),
    Help,
    Blank,
}

pub fn parse_command(line: &str) -> Result<ConsoleInput, CommandError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(ConsoleInput::Blank);
    }

    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };
    let verb = verb.to_ascii_lowercase();

    // Turn order is comma separated so team names may contain spaces.
    if verb == "order" {
        let order: Vec<String> = rest
            .split(',')
            .map(|t| t.trim().trim_matches('"').to_string())
            .filter(|t| !t.is_empty())
            .collect();
        if order.is_empty() {
            return Err(CommandError::Usage("order <team>,<team>,..."));
        }
        return Ok(ConsoleInput::Command(UserCommand::SetTurnOrder(order)));
    }

    let args = shlex::split(rest).ok_or(CommandError::BadQuoting)?;
    let arg = |i: usize| args.get(i).cloned();

    let cmd = match (verb.as_str(), args.len()) {
        ("help" | "?", _) => return Ok(ConsoleInput::Help),
        ("start", 0) => UserCommand::Start,
        ("accept", 0) => UserCommand::Accept,
        ("reject", 0) => UserCommand::Reject,
        ("skip", 0) => UserCommand::Skip,
        ("stop", 0) => UserCommand::Stop,
        ("reset", 0) => UserCommand::Reset,
        ("show", 0) => UserCommand::Show,
        ("quit" | "exit", 0) => UserCommand::Quit,
        ("request", 2) => UserCommand::Request {
            team: args[0].clone(),
            admission_number: args[1].clone(),
        },
        ("request", _) => return Err(CommandError::Usage("request <team> <admission>")),
        ("add-team", 2 | 3) => UserCommand::AddTeam {
            name: args[0].clone(),
            leader: args[1].clone(),
            assistant: arg(2),
        },
        ("add-team", _) => return Err(CommandError::Usage("add-team <name> <leader> [assistant]")),
        ("add-candidate", 3) => {
            let class_label = ClassLabel::parse(&args[1])
                .ok_or_else(|| CommandError::InvalidClass(args[1].clone()))?;
            UserCommand::AddCandidate {
                name: args[0].clone(),
                class_label,
                admission_number: args[2].clone(),
            }
        }
        ("add-candidate", _) => {
            return Err(CommandError::Usage("add-candidate <name> <class> <admission>"))
        }
        ("edit-candidate", 2) => UserCommand::EditCandidate {
            admission_number: args[0].clone(),
            new_admission_number: args[1].clone(),
        },
        ("edit-candidate", _) => {
            return Err(CommandError::Usage("edit-candidate <admission> <new-admission>"))
        }
        ("delete-candidate", 1) => UserCommand::DeleteCandidate {
            admission_number: args[0].clone(),
        },
        ("delete-candidate", _) => return Err(CommandError::Usage("delete-candidate <admission>")),
        ("delete-team", 1) => UserCommand::DeleteTeam {
            name: args[0].clone(),
        },
        ("delete-team", _) => return Err(CommandError::Usage("delete-team <name>")),
        ("import", 1) => UserCommand::Import {
            path: PathBuf::from(&args[0]),
        },
        ("import", _) => return Err(CommandError::Usage("import <csv path>")),
        ("export", 0 | 1) => UserCommand::Export {
            path: arg(0).map(PathBuf::from),
        },
        ("export", _) => return Err(CommandError::Usage("export [path]")),
        ("start" | "accept" | "reject" | "skip" | "stop" | "reset" | "show" | "quit" | "exit", _) => {
            return Err(CommandError::Usage("this command takes no arguments"))
        }
        (other, _) => return Err(CommandError::Unknown(other.to_string())),
    };
    Ok(ConsoleInput::Command(cmd))
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

pub fn render_snapshot(s: &AuctionSnapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "== Auction {} (v{}) ==", s.status, s.version);

    if s.status == AuctionStatus::InProgress {
        let _ = writeln!(out, "Class {}", s.current_class);
        if s.turn_order.is_empty() {
            let _ = writeln!(out, "Waiting for turn order (order <team>,<team>,...)");
        } else {
            let _ = write!(out, "Turn order: {}", s.turn_order.join(" -> "));
            if let Some(team) = &s.current_team {
                let _ = write!(out, " | up: {team}");
            }
            if let Some(secs) = s.remaining_secs {
                let _ = write!(out, " ({secs}s left)");
            }
            out.push('\n');
        }
        if let Some(req) = &s.pending_request {
            let _ = writeln!(
                out,
                "Pending: {} requested {} [{}], accept or reject",
                req.team, req.candidate, req.admission_number
            );
        }
        if !s.available.is_empty() {
            let names: Vec<String> = s
                .available
                .iter()
                .map(|(name, adm)| format!("{name} [{adm}]"))
                .collect();
            let _ = writeln!(out, "Available: {}", names.join(", "));
        }
    }

    for team in &s.teams {
        let _ = write!(out, "  {} (leader {}", team.name, team.leader);
        if let Some(assistant) = &team.assistant {
            let _ = write!(out, ", assistant {assistant}");
        }
        let roster = if team.roster.is_empty() {
            "-".to_string()
        } else {
            team.roster.join(", ")
        };
        let _ = writeln!(out, "): {roster}");
    }
    let _ = write!(
        out,
        "{} selections, {} unassigned",
        s.selections, s.unassigned_total
    );
    out
}

/// Text for an update, or `None` if it should not be printed.
pub fn render_update(update: &UiUpdate) -> Option<String> {
    match update {
        UiUpdate::Snapshot(snapshot) => Some(render_snapshot(snapshot)),
        // Announce every ten seconds, then each of the last five.
        UiUpdate::Countdown {
            team,
            remaining_secs,
        } => (*remaining_secs % 10 == 0 || *remaining_secs <= 5)
            .then(|| format!("{team}: {remaining_secs}s left")),
        UiUpdate::SelectionMade(sel) => Some(format!(
            "*** {} (class {}) goes to {} ***",
            sel.candidate, sel.class_label, sel.team
        )),
        UiUpdate::ImportFinished(report) => {
            let mut out = format!(
                "Imported {} of {} rows",
                report.added.len(),
                report.rows_processed
            );
            for err in &report.errors {
                let _ = write!(out, "\n  row {}: {}", err.row, err.message);
            }
            Some(out)
        }
        UiUpdate::Exported { path, rows } => {
            Some(format!("Exported {rows} rows to {}", path.display()))
        }
        UiUpdate::Error(message) => Some(format!("error: {message}")),
    }
}

// ---------------------------------------------------------------------------
// Console loop
// ---------------------------------------------------------------------------

/// Read commands from `input` and print updates to `out` until the app loop
/// closes `ui_rx`. End of input is treated as `quit`.
pub async fn run<R, W>(
    input: R,
    mut out: W,
    mut ui_rx: mpsc::Receiver<UiUpdate>,
    cmd_tx: mpsc::Sender<UserCommand>,
) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut lines = input.lines();
    let mut input_open = true;

    loop {
        tokio::select! {
            line = lines.next_line(), if input_open => {
                let line = line.context("failed to read console input")?;
                let cmd = match line {
                    Some(line) => match parse_command(&line) {
                        Ok(ConsoleInput::Command(cmd)) => cmd,
                        Ok(ConsoleInput::Help) => {
                            writeln!(out, "{HELP}")?;
                            continue;
                        }
                        Ok(ConsoleInput::Blank) => continue,
                        Err(e) => {
                            writeln!(out, "{e}")?;
                            continue;
                        }
                    },
                    None => {
                        input_open = false;
                        UserCommand::Quit
                    }
                };
                if cmd == UserCommand::Quit {
                    input_open = false;
                }
                if cmd_tx.send(cmd).await.is_err() {
                    break;
                }
            }

            update = ui_rx.recv() => {
                match update {
                    Some(update) => {
                        if let Some(text) = render_update(&update) {
                            writeln!(out, "{text}")?;
                            out.flush()?;
                        }
                    }
                    None => break,
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auction::roster_import::{ImportReport, RowError};
    use crate::auction::state::Selection;

    fn cmd(line: &str) -> UserCommand {
        match parse_command(line).unwrap() {
            ConsoleInput::Command(cmd) => cmd,
            other => panic!("expected a command for {line:?}, got {other:?}"),
        }
    }

    // ------------------------------------------------------------------
    // Parsing
    // ------------------------------------------------------------------

    #[test]
    fn parses_bare_commands() {
        assert_eq!(cmd("start"), UserCommand::Start);
        assert_eq!(cmd("  ACCEPT "), UserCommand::Accept);
        assert_eq!(cmd("skip"), UserCommand::Skip);
        assert_eq!(cmd("exit"), UserCommand::Quit);
        assert_eq!(parse_command("").unwrap(), ConsoleInput::Blank);
        assert_eq!(parse_command("# note").unwrap(), ConsoleInput::Blank);
        assert_eq!(parse_command("help").unwrap(), ConsoleInput::Help);
    }

    #[test]
    fn parses_turn_order_with_spaces() {
        assert_eq!(
            cmd("order Red Owls, Foxes ,Bears"),
            UserCommand::SetTurnOrder(vec!["Red Owls".into(), "Foxes".into(), "Bears".into()])
        );
        assert_eq!(
            parse_command("order"),
            Err(CommandError::Usage("order <team>,<team>,..."))
        );
    }

    #[test]
    fn parses_quoted_arguments() {
        assert_eq!(
            cmd(r#"add-team "Red Owls" Olive"#),
            UserCommand::AddTeam {
                name: "Red Owls".into(),
                leader: "Olive".into(),
                assistant: None,
            }
        );
        assert_eq!(
            cmd(r#"add-candidate "Hopper, Grace" 3 2001"#),
            UserCommand::AddCandidate {
                name: "Hopper, Grace".into(),
                class_label: ClassLabel::new(3).unwrap(),
                admission_number: "2001".into(),
            }
        );
        assert_eq!(
            cmd(r#"request "Red Owls" 2001"#),
            UserCommand::Request {
                team: "Red Owls".into(),
                admission_number: "2001".into(),
            }
        );
        assert_eq!(
            cmd(r#"add-team 'Red Owls' O\'Neil"#),
            UserCommand::AddTeam {
                name: "Red Owls".into(),
                leader: "O'Neil".into(),
                assistant: None,
            }
        );
        assert_eq!(
            parse_command(r#"add-team "Red Owls Olive"#),
            Err(CommandError::BadQuoting)
        );
        assert_eq!(
            parse_command(r#"delete-team Owls\"#),
            Err(CommandError::BadQuoting)
        );
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!(
            parse_command("add-candidate Ada 12 1"),
            Err(CommandError::InvalidClass("12".into()))
        );
        assert!(matches!(parse_command("request A"), Err(CommandError::Usage(_))));
        assert!(matches!(parse_command("start now"), Err(CommandError::Usage(_))));
        assert_eq!(
            parse_command("bid 5"),
            Err(CommandError::Unknown("bid".into()))
        );
    }

    #[test]
    fn export_path_is_optional() {
        assert_eq!(cmd("export"), UserCommand::Export { path: None });
        assert_eq!(
            cmd("export out.csv"),
            UserCommand::Export {
                path: Some(PathBuf::from("out.csv"))
            }
        );
        assert_eq!(
            cmd("import roster.csv"),
            UserCommand::Import {
                path: PathBuf::from("roster.csv")
            }
        );
    }

    // ------------------------------------------------------------------
    // Rendering
    // ------------------------------------------------------------------

    #[test]
    fn countdown_is_throttled() {
        let at = |secs| UiUpdate::Countdown {
            team: "A".into(),
            remaining_secs: secs,
        };
        assert_eq!(render_update(&at(30)).as_deref(), Some("A: 30s left"));
        assert!(render_update(&at(17)).is_none());
        assert!(render_update(&at(3)).is_some());
    }

    #[test]
    fn import_report_lists_row_errors() {
        let report = ImportReport {
            rows_processed: 2,
            added: vec![],
            errors: vec![RowError {
                row: 2,
                message: "invalid class".into(),
            }],
        };
        let text = render_update(&UiUpdate::ImportFinished(report)).unwrap();
        assert_eq!(text, "Imported 0 of 2 rows\n  row 2: invalid class");
    }

    #[test]
    fn selection_banner() {
        let sel = Selection {
            candidate: "Ada".into(),
            admission_number: "1".into(),
            class_label: ClassLabel::FIRST,
            team: "Owls".into(),
        };
        let text = render_update(&UiUpdate::SelectionMade(sel)).unwrap();
        assert!(text.contains("Ada (class 1) goes to Owls"));
    }

    // ------------------------------------------------------------------
    // Loop
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn forwards_commands_and_quits_on_eof() {
        let (cmd_tx, mut cmd_rx) = mpsc::channel(16);
        let (ui_tx, ui_rx) = mpsc::channel(16);
        let input: &[u8] = b"start\nbogus\n\norder A,B\n";
        let mut out = Vec::new();

        let console = tokio::spawn(async move {
            run(input, &mut out, ui_rx, cmd_tx).await.unwrap();
            out
        });

        assert_eq!(cmd_rx.recv().await, Some(UserCommand::Start));
        assert_eq!(
            cmd_rx.recv().await,
            Some(UserCommand::SetTurnOrder(vec!["A".into(), "B".into()]))
        );
        assert_eq!(cmd_rx.recv().await, Some(UserCommand::Quit));

        ui_tx.send(UiUpdate::Error("boom".into())).await.unwrap();
        drop(ui_tx);

        let out = String::from_utf8(console.await.unwrap()).unwrap();
        assert!(out.contains("unknown command `bogus`"));
        assert!(out.contains("error: boom"));
    }
}
