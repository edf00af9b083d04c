use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::calc::{self, RawMarks};

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub id: String,
    pub full_name: String,
    pub saint_name: String,
    pub student_code: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Present,
    Absent,
}

impl Presence {
    pub fn parse(raw: &str) -> Option<Presence> {
        match raw {
            "present" => Some(Presence::Present),
            "absent" => Some(Presence::Absent),
            _ => None,
        }
    }
}

/// Splits a Vietnamese full name for the two fixed name columns: the last
/// whitespace-delimited token is the given name, everything before it the
/// family/middle name.
pub fn split_full_name(full_name: &str) -> (String, String) {
    let mut tokens: Vec<&str> = full_name.split_whitespace().collect();
    let Some(given) = tokens.pop() else {
        return (String::new(), String::new());
    };
    (tokens.join(" "), given.to_string())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRow {
    pub student_id: String,
    pub saint_name: String,
    pub family_name: String,
    pub given_name: String,
    pub cells: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceMatrix {
    pub dates: Vec<String>,
    pub rows: Vec<AttendanceRow>,
}

/// One row per roster entry in roster order, one cell per requested date.
/// `✓` marks a recorded presence, `x` a recorded absence, blank means no
/// record for that student on that date.
pub fn attendance_matrix(
    roster: &[RosterEntry],
    dates: &[String],
    presence: &HashMap<(String, String), Presence>,
) -> AttendanceMatrix {
    let rows = roster
        .iter()
        .map(|s| {
            let (family_name, given_name) = split_full_name(&s.full_name);
            let cells = dates
                .iter()
                .map(
                    |date| match presence.get(&(s.id.clone(), date.clone())) {
                        Some(Presence::Present) => "✓".to_string(),
                        Some(Presence::Absent) => "x".to_string(),
                        None => String::new(),
                    },
                )
                .collect();
            AttendanceRow {
                student_id: s.id.clone(),
                saint_name: s.saint_name.clone(),
                family_name,
                given_name,
                cells,
            }
        })
        .collect();

    AttendanceMatrix {
        dates: dates.to_vec(),
        rows,
    }
}

/// Column selection flags for the score sheet. Field names mirror the portal's
/// export form; all-unset means "show everything".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreColumns {
    #[serde(rename = "diLeT5")]
    pub di_le_t5: bool,
    #[serde(rename = "hocGL")]
    pub hoc_gl: bool,
    #[serde(rename = "diemTB")]
    pub diem_tb: bool,
    #[serde(rename = "score45HK1")]
    pub score_45_hk1: bool,
    #[serde(rename = "scoreExamHK1")]
    pub score_exam_hk1: bool,
    #[serde(rename = "score45HK2")]
    pub score_45_hk2: bool,
    #[serde(rename = "scoreExamHK2")]
    pub score_exam_hk2: bool,
    #[serde(rename = "diemTong")]
    pub diem_tong: bool,
}

impl ScoreColumns {
    pub fn all() -> ScoreColumns {
        ScoreColumns {
            di_le_t5: true,
            hoc_gl: true,
            diem_tb: true,
            score_45_hk1: true,
            score_exam_hk1: true,
            score_45_hk2: true,
            score_exam_hk2: true,
            diem_tong: true,
        }
    }

    fn any(self) -> bool {
        self != ScoreColumns::default()
    }

    /// Default-show-all: an entirely unset selection behaves as all-set.
    pub fn normalized(self) -> ScoreColumns {
        if self.any() {
            self
        } else {
            ScoreColumns::all()
        }
    }

    /// A half-year subtotal column is shown when either of its raw inputs is.
    fn subtotal_hk1(self) -> bool {
        self.score_45_hk1 || self.score_exam_hk1
    }

    fn subtotal_hk2(self) -> bool {
        self.score_45_hk2 || self.score_exam_hk2
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreColumnId {
    DiLeT5,
    HocGl,
    Score45Hk1,
    ScoreExamHk1,
    SubtotalHk1,
    Score45Hk2,
    ScoreExamHk2,
    SubtotalHk2,
    DiemTb,
    DiemTong,
}

impl ScoreColumnId {
    pub fn as_str(self) -> &'static str {
        match self {
            ScoreColumnId::DiLeT5 => "diLeT5",
            ScoreColumnId::HocGl => "hocGL",
            ScoreColumnId::Score45Hk1 => "score45HK1",
            ScoreColumnId::ScoreExamHk1 => "scoreExamHK1",
            ScoreColumnId::SubtotalHk1 => "subtotalHK1",
            ScoreColumnId::Score45Hk2 => "score45HK2",
            ScoreColumnId::ScoreExamHk2 => "scoreExamHK2",
            ScoreColumnId::SubtotalHk2 => "subtotalHK2",
            ScoreColumnId::DiemTb => "diemTB",
            ScoreColumnId::DiemTong => "diemTong",
        }
    }
}

fn selected_columns(flags: ScoreColumns) -> Vec<ScoreColumnId> {
    let flags = flags.normalized();
    let mut cols = Vec::new();
    if flags.di_le_t5 {
        cols.push(ScoreColumnId::DiLeT5);
    }
    if flags.hoc_gl {
        cols.push(ScoreColumnId::HocGl);
    }
    if flags.score_45_hk1 {
        cols.push(ScoreColumnId::Score45Hk1);
    }
    if flags.score_exam_hk1 {
        cols.push(ScoreColumnId::ScoreExamHk1);
    }
    if flags.subtotal_hk1() {
        cols.push(ScoreColumnId::SubtotalHk1);
    }
    if flags.score_45_hk2 {
        cols.push(ScoreColumnId::Score45Hk2);
    }
    if flags.score_exam_hk2 {
        cols.push(ScoreColumnId::ScoreExamHk2);
    }
    if flags.subtotal_hk2() {
        cols.push(ScoreColumnId::SubtotalHk2);
    }
    if flags.diem_tb {
        cols.push(ScoreColumnId::DiemTb);
    }
    if flags.diem_tong {
        cols.push(ScoreColumnId::DiemTong);
    }
    cols
}

#[derive(Debug, Clone)]
pub struct ScoreSheetEntry {
    pub roster: RosterEntry,
    pub marks: RawMarks,
    pub average_year: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreSheetRow {
    pub student_id: String,
    pub student_code: String,
    pub saint_name: String,
    pub family_name: String,
    pub given_name: String,
    pub cells: Vec<String>,
    pub classification: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreSheet {
    pub columns: Vec<String>,
    pub rows: Vec<ScoreSheetRow>,
}

fn fmt_cell(value: Option<f64>) -> String {
    let Some(v) = value else {
        return "-".to_string();
    };
    let rounded = (v * 10.0).round() / 10.0;
    if rounded.fract() == 0.0 {
        format!("{}", rounded as i64)
    } else {
        format!("{:.1}", rounded)
    }
}

fn fmt_count(value: Option<i64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

/// Score sheet over a roster: roster order preserved, column set fully
/// determined by the selection flags, classification always present (from the
/// persisted yearly average, `-` when it has never been computed).
pub fn score_sheet(
    entries: &[ScoreSheetEntry],
    flags: ScoreColumns,
    total_weeks: i64,
) -> ScoreSheet {
    let columns = selected_columns(flags);

    let rows = entries
        .iter()
        .map(|e| {
            let (family_name, given_name) = split_full_name(&e.roster.full_name);
            let metrics = calc::evaluate(&e.marks, total_weeks);
            let cells = columns
                .iter()
                .map(|col| match col {
                    ScoreColumnId::DiLeT5 => fmt_count(e.marks.attendance_thu5),
                    ScoreColumnId::HocGl => fmt_count(e.marks.attendance_cn),
                    ScoreColumnId::Score45Hk1 => fmt_cell(e.marks.score_45_hk1),
                    ScoreColumnId::ScoreExamHk1 => fmt_cell(e.marks.score_exam_hk1),
                    ScoreColumnId::SubtotalHk1 => fmt_cell(Some(calc::half_year_subtotal(
                        e.marks.score_45_hk1,
                        e.marks.score_exam_hk1,
                    ))),
                    ScoreColumnId::Score45Hk2 => fmt_cell(e.marks.score_45_hk2),
                    ScoreColumnId::ScoreExamHk2 => fmt_cell(e.marks.score_exam_hk2),
                    ScoreColumnId::SubtotalHk2 => fmt_cell(Some(calc::half_year_subtotal(
                        e.marks.score_45_hk2,
                        e.marks.score_exam_hk2,
                    ))),
                    ScoreColumnId::DiemTb => fmt_cell(Some(metrics.avg_catechism)),
                    ScoreColumnId::DiemTong => fmt_cell(Some(metrics.total_avg)),
                })
                .collect();
            ScoreSheetRow {
                student_id: e.roster.id.clone(),
                student_code: e.roster.student_code.clone(),
                saint_name: e.roster.saint_name.clone(),
                family_name,
                given_name,
                cells,
                classification: calc::classification_label(e.average_year).to_string(),
            }
        })
        .collect();

    ScoreSheet {
        columns: columns.iter().map(|c| c.as_str().to_string()).collect(),
        rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roster_entry(id: &str, full_name: &str) -> RosterEntry {
        RosterEntry {
            id: id.to_string(),
            full_name: full_name.to_string(),
            saint_name: "Phêrô".to_string(),
            student_code: format!("TN-{}", id),
        }
    }

    #[test]
    fn name_split_takes_last_token_as_given_name() {
        assert_eq!(
            split_full_name("Nguyễn Văn An"),
            ("Nguyễn Văn".to_string(), "An".to_string())
        );
        assert_eq!(split_full_name("An"), (String::new(), "An".to_string()));
        assert_eq!(split_full_name("  "), (String::new(), String::new()));
    }

    #[test]
    fn attendance_cells_map_tri_state() {
        let roster = vec![roster_entry("s1", "Trần Thị Bé"), roster_entry("s2", "Lê Văn Cường")];
        let dates = vec!["2025-09-07".to_string(), "2025-09-14".to_string()];
        let mut presence = HashMap::new();
        presence.insert(
            ("s1".to_string(), "2025-09-07".to_string()),
            Presence::Present,
        );
        presence.insert(
            ("s2".to_string(), "2025-09-14".to_string()),
            Presence::Absent,
        );

        let matrix = attendance_matrix(&roster, &dates, &presence);
        assert_eq!(matrix.rows.len(), 2);
        assert_eq!(matrix.dates.len(), 2);
        assert_eq!(matrix.rows[0].cells, vec!["✓".to_string(), String::new()]);
        assert_eq!(matrix.rows[1].cells, vec![String::new(), "x".to_string()]);
        assert_eq!(matrix.rows[0].family_name, "Trần Thị");
        assert_eq!(matrix.rows[0].given_name, "Bé");
    }

    #[test]
    fn attendance_rows_follow_roster_order() {
        let roster = vec![
            roster_entry("z", "Z Cuối"),
            roster_entry("a", "A Đầu"),
        ];
        let matrix = attendance_matrix(&roster, &[], &HashMap::new());
        let ids: Vec<&str> = matrix.rows.iter().map(|r| r.student_id.as_str()).collect();
        assert_eq!(ids, vec!["z", "a"]);
    }

    #[test]
    fn unset_selection_shows_all_columns() {
        let from_empty = selected_columns(ScoreColumns::default());
        let from_all = selected_columns(ScoreColumns::all());
        assert_eq!(from_empty, from_all);
        assert_eq!(from_empty.len(), 10);
    }

    #[test]
    fn subtotal_follows_either_raw_flag() {
        let only_exam_hk1 = ScoreColumns {
            score_exam_hk1: true,
            ..ScoreColumns::default()
        };
        let cols = selected_columns(only_exam_hk1);
        assert!(cols.contains(&ScoreColumnId::SubtotalHk1));
        assert!(!cols.contains(&ScoreColumnId::SubtotalHk2));
        assert!(!cols.contains(&ScoreColumnId::Score45Hk1));

        let only_45_hk2 = ScoreColumns {
            score_45_hk2: true,
            ..ScoreColumns::default()
        };
        let cols = selected_columns(only_45_hk2);
        assert!(cols.contains(&ScoreColumnId::SubtotalHk2));
        assert!(!cols.contains(&ScoreColumnId::SubtotalHk1));
    }

    #[test]
    fn empty_roster_yields_header_only_sheet() {
        let sheet = score_sheet(&[], ScoreColumns::default(), 40);
        assert!(sheet.rows.is_empty());
        assert_eq!(sheet.columns.len(), 10);
    }

    #[test]
    fn missing_scores_render_dash_and_classification_is_always_present() {
        let entries = vec![ScoreSheetEntry {
            roster: roster_entry("s1", "Nguyễn Văn An"),
            marks: RawMarks::default(),
            average_year: None,
        }];
        let flags = ScoreColumns {
            score_45_hk1: true,
            ..ScoreColumns::default()
        };
        let sheet = score_sheet(&entries, flags, 40);
        assert_eq!(sheet.columns, vec!["score45HK1", "subtotalHK1"]);
        assert_eq!(sheet.rows[0].cells[0], "-");
        assert_eq!(sheet.rows[0].classification, "-");
    }

    #[test]
    fn worked_example_row_renders_expected_cells() {
        let entries = vec![ScoreSheetEntry {
            roster: roster_entry("s1", "Nguyễn Văn An"),
            marks: RawMarks {
                score_45_hk1: Some(8.0),
                score_exam_hk1: Some(9.0),
                score_45_hk2: Some(7.0),
                score_exam_hk2: Some(8.0),
                attendance_thu5: Some(20),
                attendance_cn: Some(25),
            },
            average_year: Some(7.2),
        }];
        let sheet = score_sheet(&entries, ScoreColumns::default(), 40);
        let row = &sheet.rows[0];
        let cell = |id: &str| {
            let idx = sheet.columns.iter().position(|c| c == id).expect("column");
            row.cells[idx].clone()
        };
        assert_eq!(cell("diLeT5"), "20");
        assert_eq!(cell("hocGL"), "25");
        assert_eq!(cell("subtotalHK1"), "8.7");
        assert_eq!(cell("diemTB"), "8.2");
        assert_eq!(cell("diemTong"), "7.2");
        assert_eq!(row.classification, "Khá");
    }
}
