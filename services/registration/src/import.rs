//! Shift import from CSV.
//!
//! The header row is matched case-insensitively. `name` and `headcount` are
//! required columns; `points`, `description`, `day` and `starttime` are
//! optional. Rows that fail validation are reported and skipped, the rest are
//! inserted as one batch that either fully commits or leaves nothing behind.

use chrono::{NaiveDate, NaiveTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::model::ShiftDay;
use crate::store::{NewShift, Store, StoreError};

/// Points credited for a shift when the column is absent or empty.
pub const DEFAULT_POINTS: i32 = 1;

const REQUIRED_COLUMNS: [&str; 2] = ["name", "headcount"];

/// Whole-file import failures. Row-level problems end up in
/// [`ImportReport::errors`] instead.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("unreadable CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("missing required column '{0}'")]
    MissingColumn(&'static str),

    #[error("failed to persist imported shifts: {0}")]
    Persistence(#[source] StoreError),
}

/// A rejected data row. `row` counts data rows from 1, excluding the header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowError {
    pub row: usize,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportOutcome {
    /// Every data row was imported.
    Complete,
    /// Some rows were rejected; the valid ones were imported.
    Partial,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub imported: usize,
    pub failed: usize,
    pub errors: Vec<RowError>,
    pub outcome: ImportOutcome,
}

/// Result of validating a file, before anything is stored.
#[derive(Debug, Default)]
pub struct ParsedShifts {
    pub shifts: Vec<NewShift>,
    pub errors: Vec<RowError>,
}

struct Columns {
    name: usize,
    headcount: usize,
    points: Option<usize>,
    description: Option<usize>,
    day: Option<usize>,
    starttime: Option<usize>,
}

impl Columns {
    fn from_headers(headers: &csv::StringRecord) -> Result<Self, ImportError> {
        let find = |column: &str| {
            headers
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(column))
        };
        let require = |column: &'static str| find(column).ok_or(ImportError::MissingColumn(column));

        Ok(Self {
            name: require(REQUIRED_COLUMNS[0])?,
            headcount: require(REQUIRED_COLUMNS[1])?,
            points: find("points"),
            description: find("description"),
            day: find("day"),
            starttime: find("starttime"),
        })
    }
}

fn field(record: &csv::StringRecord, index: Option<usize>) -> Option<&str> {
    index
        .and_then(|i| record.get(i))
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn parse_row(
    record: &csv::StringRecord,
    columns: &Columns,
    today: NaiveDate,
) -> Result<NewShift, String> {
    let name = field(record, Some(columns.name)).ok_or("missing name")?;

    let head_count = field(record, Some(columns.headcount)).ok_or("missing headcount")?;
    let head_count: i32 = head_count
        .parse()
        .ok()
        .filter(|n| *n > 0)
        .ok_or_else(|| format!("headcount '{head_count}' is not a positive integer"))?;

    let points = match field(record, columns.points) {
        Some(points) => points
            .parse()
            .map_err(|_| format!("points '{points}' is not an integer"))?,
        None => DEFAULT_POINTS,
    };

    let day = field(record, columns.day)
        .map(|day| {
            ShiftDay::parse(day).ok_or_else(|| {
                let allowed: Vec<&str> = ShiftDay::ALL.iter().map(ShiftDay::as_str).collect();
                format!("day '{day}' is not one of {}", allowed.join(", "))
            })
        })
        .transpose()?;

    let start_time = field(record, columns.starttime)
        .map(|time| {
            NaiveTime::parse_from_str(time, "%H:%M")
                .map(|t| today.and_time(t).and_utc())
                .map_err(|_| format!("starttime '{time}' is not HH:MM"))
        })
        .transpose()?;

    Ok(NewShift {
        name: name.to_string(),
        head_count,
        points,
        description: field(record, columns.description).map(str::to_string),
        day,
        start_time,
    })
}

/// Validates a CSV file without touching storage.
///
/// Start times are placed on `today`.
pub fn parse_shifts(input: &[u8], today: NaiveDate) -> Result<ParsedShifts, ImportError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(input);

    let columns = Columns::from_headers(reader.headers()?)?;

    let mut parsed = ParsedShifts::default();
    for (index, record) in reader.records().enumerate() {
        let row = index + 1;
        let result = record
            .map_err(|e| e.to_string())
            .and_then(|record| parse_row(&record, &columns, today));
        match result {
            Ok(shift) => parsed.shifts.push(shift),
            Err(message) => parsed.errors.push(RowError { row, message }),
        }
    }
    Ok(parsed)
}

/// Parses `input` and stores the valid rows in a single batch.
pub async fn import_shifts(store: &dyn Store, input: &[u8]) -> Result<ImportReport, ImportError> {
    let parsed = parse_shifts(input, Utc::now().date_naive())?;
    for error in &parsed.errors {
        warn!(row = error.row, message = %error.message, "skipping shift import row");
    }

    let inserted = store
        .insert_shifts(parsed.shifts)
        .await
        .map_err(ImportError::Persistence)?;

    let report = ImportReport {
        imported: inserted.len(),
        failed: parsed.errors.len(),
        outcome: if parsed.errors.is_empty() {
            ImportOutcome::Complete
        } else {
            ImportOutcome::Partial
        },
        errors: parsed.errors,
    };
    info!(
        imported = report.imported,
        failed = report.failed,
        "shift import finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::{TimeZone, Timelike};
    use rstest::rstest;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 20).unwrap()
    }

    #[test]
    fn test_parse_full_row() {
        let csv = "Name,HeadCount,Points,Description,Day,StartTime\n\
                   Bar,4,2,Tresen,Samstag,18:30\n";
        let parsed = parse_shifts(csv.as_bytes(), today()).unwrap();

        assert!(parsed.errors.is_empty());
        assert_eq!(
            parsed.shifts,
            vec![NewShift {
                name: "Bar".to_string(),
                head_count: 4,
                points: 2,
                description: Some("Tresen".to_string()),
                day: Some(ShiftDay::Samstag),
                start_time: Some(Utc.with_ymd_and_hms(2025, 6, 20, 18, 30, 0).unwrap()),
            }]
        );
    }

    #[test]
    fn test_optional_columns_default() {
        let csv = "name,headcount\nEinlass,2\n";
        let parsed = parse_shifts(csv.as_bytes(), today()).unwrap();

        let shift = &parsed.shifts[0];
        assert_eq!(shift.points, DEFAULT_POINTS);
        assert_eq!(shift.day, None);
        assert_eq!(shift.start_time, None);
        assert_eq!(shift.description, None);
    }

    #[rstest]
    #[case("name,points\nBar,1\n", "headcount")]
    #[case("headcount,day\n3,Freitag\n", "name")]
    fn test_missing_required_column_rejects_file(
        #[case] csv: &str,
        #[case] column: &'static str,
    ) {
        let err = parse_shifts(csv.as_bytes(), today()).unwrap_err();
        assert!(matches!(err, ImportError::MissingColumn(c) if c == column));
    }

    #[rstest]
    #[case("Bar,,1,,,", "missing headcount")]
    #[case(",3,1,,,", "missing name")]
    #[case("Bar,zero,1,,,", "not a positive integer")]
    #[case("Bar,0,1,,,", "not a positive integer")]
    #[case("Bar,3,x,,,", "points 'x'")]
    #[case("Bar,3,1,,Dienstag,", "day 'Dienstag'")]
    #[case("Bar,3,1,,,25:00", "starttime '25:00'")]
    fn test_invalid_row_is_reported(#[case] row: &str, #[case] message: &str) {
        let csv = format!("name,headcount,points,description,day,starttime\nOk,1,1,,,\n{row}\n");
        let parsed = parse_shifts(csv.as_bytes(), today()).unwrap();

        assert_eq!(parsed.shifts.len(), 1);
        assert_eq!(parsed.errors.len(), 1);
        assert_eq!(parsed.errors[0].row, 2);
        assert!(
            parsed.errors[0].message.contains(message),
            "{}",
            parsed.errors[0].message
        );
    }

    #[test]
    fn test_short_rows_are_tolerated() {
        let csv = "name,headcount,day\nBar,3\n";
        let parsed = parse_shifts(csv.as_bytes(), today()).unwrap();
        assert_eq!(parsed.shifts.len(), 1);
        assert_eq!(parsed.shifts[0].day, None);
    }

    #[tokio::test]
    async fn test_import_with_one_bad_row_is_partial() {
        let store = MemoryStore::new();
        let csv = "name,headcount\nBar,3\nEinlass,\n";

        let report = import_shifts(&store, csv.as_bytes()).await.unwrap();
        assert_eq!(report.imported, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.outcome, ImportOutcome::Partial);
        assert_eq!(report.errors[0].row, 2);

        let stored = store.list_shifts().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].shift.name, "Bar");
    }

    #[tokio::test]
    async fn test_clean_import_is_complete() {
        let store = MemoryStore::new();
        let csv = "name,headcount,starttime\nBar,3,20:15\nEinlass,2,\n";

        let report = import_shifts(&store, csv.as_bytes()).await.unwrap();
        assert_eq!(report.imported, 2);
        assert_eq!(report.outcome, ImportOutcome::Complete);

        let stored = store.list_shifts().await.unwrap();
        let bar = stored.iter().find(|s| s.shift.name == "Bar").unwrap();
        let start = bar.shift.start_time.unwrap();
        assert_eq!((start.hour(), start.minute()), (20, 15));
        assert_eq!(start.date_naive(), Utc::now().date_naive());
    }

    #[tokio::test]
    async fn test_storage_failure_rolls_back_whole_batch() {
        let store = MemoryStore::new();
        store.fail_batch_insert_at(1).await;
        let csv = "name,headcount\nBar,3\nEinlass,2\nAbbau,6\n";

        let err = import_shifts(&store, csv.as_bytes()).await.unwrap_err();
        assert!(matches!(err, ImportError::Persistence(_)));
        assert!(store.list_shifts().await.unwrap().is_empty());
    }
}
