// Candidate import from headerless CSV rows:
//
//   Name, Admission Number, Class[, Image]
//
// Every row is validated on its own; bad rows are reported with their
// 1-based row number and skipped, good rows become unassigned candidates.

use std::collections::HashSet;
use std::io::Read;

use tracing::warn;

use super::state::{Candidate, ClassLabel, CLASS_MAX, CLASS_MIN};

/// A rejected input row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowError {
    /// 1-based row number within the input.
    pub row: usize,
    pub message: String,
}

/// Outcome of an import.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub rows_processed: usize,
    pub added: Vec<Candidate>,
    pub errors: Vec<RowError>,
}

impl ImportReport {
    fn reject(&mut self, row: usize, message: String) {
        warn!("import row {} rejected: {}", row, message);
        self.errors.push(RowError { row, message });
    }
}

/// Parse candidate rows from `rdr`, validating against `existing` candidates
/// for admission-number uniqueness. Blank lines are ignored.
pub fn parse_candidates<R: Read>(rdr: R, existing: &[Candidate]) -> ImportReport {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(rdr);

    let mut seen: HashSet<String> = existing
        .iter()
        .map(|c| c.admission_number.clone())
        .collect();
    let mut report = ImportReport::default();

    for (idx, result) in reader.records().enumerate() {
        let row = idx + 1;
        report.rows_processed += 1;

        let record = match result {
            Ok(r) => r,
            Err(e) => {
                report.reject(row, format!("unreadable row: {e}"));
                continue;
            }
        };

        if record.len() < 3 {
            report.reject(
                row,
                format!("insufficient columns (expected at least 3, got {})", record.len()),
            );
            continue;
        }

        let name = &record[0];
        let admission_number = &record[1];
        let class_str = &record[2];
        if name.is_empty() || admission_number.is_empty() || class_str.is_empty() {
            report.reject(
                row,
                "missing required fields (Name, Admission Number, Class)".to_string(),
            );
            continue;
        }

        let Some(class_label) = ClassLabel::parse(class_str) else {
            report.reject(
                row,
                format!("invalid class {class_str:?} (must be {CLASS_MIN}-{CLASS_MAX})"),
            );
            continue;
        };

        if !seen.insert(admission_number.to_string()) {
            report.reject(
                row,
                format!("duplicate admission number {admission_number:?} for {name:?}"),
            );
            continue;
        }

        let mut candidate = Candidate::new(name, class_label, admission_number);
        candidate.image = record
            .get(3)
            .filter(|link| !link.is_empty())
            .map(str::to_string);
        report.added.push(candidate);
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_rows_with_optional_image() {
        let input = "Ada Lovelace, 1001, 1\nAlan Turing,1002,2,https://img/alan.png\n";
        let report = parse_candidates(input.as_bytes(), &[]);

        assert_eq!(report.rows_processed, 2);
        assert!(report.errors.is_empty());
        assert_eq!(report.added.len(), 2);
        assert_eq!(report.added[0].name, "Ada Lovelace");
        assert_eq!(report.added[0].class_label, ClassLabel::new(1).unwrap());
        assert!(report.added[0].image.is_none());
        assert_eq!(report.added[1].image.as_deref(), Some("https://img/alan.png"));
        assert!(report.added.iter().all(|c| !c.assigned));
    }

    #[test]
    fn reports_bad_rows_and_keeps_good_ones() {
        let input = "\
Ada,1001,1
Short,1002
,1003,2
Bad Class,1004,10
Dup,1001,3
Grace,1005,4
";
        let report = parse_candidates(input.as_bytes(), &[]);

        assert_eq!(report.rows_processed, 6);
        let names: Vec<&str> = report.added.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Ada", "Grace"]);

        let rows: Vec<usize> = report.errors.iter().map(|e| e.row).collect();
        assert_eq!(rows, vec![2, 3, 4, 5]);
        assert!(report.errors[0].message.contains("insufficient columns"));
        assert!(report.errors[1].message.contains("missing required fields"));
        assert!(report.errors[2].message.contains("invalid class"));
        assert!(report.errors[3].message.contains("duplicate admission number"));
    }

    #[test]
    fn rejects_admission_numbers_already_present() {
        let existing = vec![Candidate::new("Ada", ClassLabel::FIRST, "1001")];
        let report = parse_candidates("Someone Else,1001,2\n".as_bytes(), &existing);
        assert!(report.added.is_empty());
        assert_eq!(report.errors.len(), 1);
    }

    #[test]
    fn quoted_names_may_contain_commas() {
        let report = parse_candidates("\"Hopper, Grace\",2001,3\n".as_bytes(), &[]);
        assert_eq!(report.added[0].name, "Hopper, Grace");
    }
}
