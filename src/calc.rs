use serde::{Deserialize, Serialize};

/// Raw per-student fields as stored. Every field is nullable: score and
/// attendance entry are separate flows and a student may have any subset
/// filled in at any point of the year.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMarks {
    pub score_45_hk1: Option<f64>,
    pub score_exam_hk1: Option<f64>,
    pub score_45_hk2: Option<f64>,
    pub score_exam_hk2: Option<f64>,
    pub attendance_thu5: Option<i64>,
    pub attendance_cn: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedMetrics {
    pub avg_catechism: f64,
    pub avg_attendance: f64,
    pub total_avg: f64,
}

/// Classification bands in ascending order. `Ord` follows the band ordering
/// so monotonicity in the governing average can be asserted directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Band {
    Yeu,
    TrungBinh,
    Kha,
    Gioi,
}

impl Band {
    pub fn label(self) -> &'static str {
        match self {
            Band::Gioi => "Giỏi",
            Band::Kha => "Khá",
            Band::TrungBinh => "TB",
            Band::Yeu => "Yếu",
        }
    }
}

/// Evaluated top-down, first match wins. A null governing value carries no
/// band at all; that is distinct from a computed 0, which is Yếu.
pub fn classify(value: Option<f64>) -> Option<Band> {
    let v = value?;
    if v >= 8.0 {
        Some(Band::Gioi)
    } else if v >= 6.5 {
        Some(Band::Kha)
    } else if v >= 5.0 {
        Some(Band::TrungBinh)
    } else {
        Some(Band::Yeu)
    }
}

pub fn classification_label(value: Option<f64>) -> &'static str {
    classify(value).map(Band::label).unwrap_or("-")
}

/// Pure, total mapping from raw fields plus the school year's week count to
/// the derived metrics. Nulls coerce to 0 before weighting; a non-positive
/// `total_weeks` defines the attendance average as 0 instead of dividing.
///
/// Fixed weights: 45-minute tests count once and exams twice toward the
/// catechism average; Thursday mass attendance weighs 0.4 against 0.6 for
/// Sunday class, normalized onto a 0-10 scale where attending every week of
/// both kinds scores 10.
pub fn evaluate(marks: &RawMarks, total_weeks: i64) -> DerivedMetrics {
    let s45_hk1 = marks.score_45_hk1.unwrap_or(0.0);
    let exam_hk1 = marks.score_exam_hk1.unwrap_or(0.0);
    let s45_hk2 = marks.score_45_hk2.unwrap_or(0.0);
    let exam_hk2 = marks.score_exam_hk2.unwrap_or(0.0);
    let thu5 = marks.attendance_thu5.unwrap_or(0) as f64;
    let cn = marks.attendance_cn.unwrap_or(0) as f64;

    let avg_catechism = (s45_hk1 + s45_hk2 + 2.0 * exam_hk1 + 2.0 * exam_hk2) / 6.0;
    let avg_attendance = if total_weeks > 0 {
        (thu5 * 0.4 + cn * 0.6) * (10.0 / total_weeks as f64)
    } else {
        0.0
    };
    let total_avg = avg_catechism * 0.6 + avg_attendance * 0.4;

    DerivedMetrics {
        avg_catechism,
        avg_attendance,
        total_avg,
    }
}

/// Half-year subtotal: one 45-minute test plus a double-weighted exam.
pub fn half_year_subtotal(score_45: Option<f64>, score_exam: Option<f64>) -> f64 {
    (score_45.unwrap_or(0.0) + 2.0 * score_exam.unwrap_or(0.0)) / 3.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeekCell {
    pub week: u32,
    pub attended: bool,
}

/// Expands a bare attended-count into per-week display cells: cell i is
/// attended iff `i <= attended`. The counter model does not record which
/// calendar weeks were actually attended, so this is a prefix approximation
/// kept for parity with the portal's progress strip, not a per-week record.
pub fn attendance_week_cells(attended: i64, total_weeks: i64) -> Vec<WeekCell> {
    let weeks = total_weeks.max(0) as u32;
    let attended = attended.max(0);
    (1..=weeks)
        .map(|week| WeekCell {
            week,
            attended: i64::from(week) <= attended,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worked_example_lands_in_kha() {
        let marks = RawMarks {
            score_45_hk1: Some(8.0),
            score_exam_hk1: Some(9.0),
            score_45_hk2: Some(7.0),
            score_exam_hk2: Some(8.0),
            attendance_thu5: Some(20),
            attendance_cn: Some(25),
        };
        let m = evaluate(&marks, 40);
        assert!((m.avg_catechism - (8.0 + 7.0 + 18.0 + 16.0) / 6.0).abs() < 1e-9);
        assert!((m.avg_attendance - 5.75).abs() < 1e-9);
        assert!((m.total_avg - 7.2).abs() < 1e-9);
        assert_eq!(classify(Some(m.total_avg)), Some(Band::Kha));
    }

    #[test]
    fn all_null_inputs_evaluate_to_zero_yeu() {
        let m = evaluate(&RawMarks::default(), 0);
        assert_eq!(m.avg_catechism, 0.0);
        assert_eq!(m.avg_attendance, 0.0);
        assert_eq!(m.total_avg, 0.0);
        assert_eq!(classification_label(Some(m.total_avg)), "Yếu");
    }

    #[test]
    fn outputs_are_finite_and_non_negative_for_sparse_inputs() {
        let cases = [
            RawMarks::default(),
            RawMarks {
                score_exam_hk2: Some(10.0),
                ..RawMarks::default()
            },
            RawMarks {
                attendance_cn: Some(40),
                ..RawMarks::default()
            },
        ];
        for marks in cases {
            for weeks in [-5, 0, 1, 40] {
                let m = evaluate(&marks, weeks);
                assert!(m.avg_catechism.is_finite() && m.avg_catechism >= 0.0);
                assert!(m.avg_attendance.is_finite() && m.avg_attendance >= 0.0);
                assert!(m.total_avg.is_finite() && m.total_avg >= 0.0);
            }
        }
    }

    #[test]
    fn attendance_is_zero_exactly_when_weeks_non_positive() {
        let marks = RawMarks {
            attendance_thu5: Some(12),
            attendance_cn: Some(30),
            ..RawMarks::default()
        };
        assert_eq!(evaluate(&marks, 0).avg_attendance, 0.0);
        assert_eq!(evaluate(&marks, -3).avg_attendance, 0.0);
        assert!(evaluate(&marks, 40).avg_attendance > 0.0);
    }

    #[test]
    fn full_attendance_normalizes_to_ten() {
        let marks = RawMarks {
            attendance_thu5: Some(40),
            attendance_cn: Some(40),
            ..RawMarks::default()
        };
        assert!((evaluate(&marks, 40).avg_attendance - 10.0).abs() < 1e-9);
    }

    #[test]
    fn band_thresholds_first_match_wins() {
        assert_eq!(classification_label(None), "-");
        assert_eq!(classification_label(Some(8.0)), "Giỏi");
        assert_eq!(classification_label(Some(7.99)), "Khá");
        assert_eq!(classification_label(Some(6.5)), "Khá");
        assert_eq!(classification_label(Some(6.49)), "TB");
        assert_eq!(classification_label(Some(5.0)), "TB");
        assert_eq!(classification_label(Some(4.99)), "Yếu");
        assert_eq!(classification_label(Some(0.0)), "Yếu");
    }

    #[test]
    fn band_is_monotonic_in_the_average() {
        let mut prev = Band::Yeu;
        let mut x = 0.0;
        while x <= 10.0 {
            let band = classify(Some(x)).expect("band");
            assert!(band >= prev, "band regressed at {}", x);
            prev = band;
            x += 0.01;
        }
    }

    #[test]
    fn week_cells_are_a_monotonic_prefix() {
        let cells = attendance_week_cells(3, 5);
        assert_eq!(cells.len(), 5);
        let attended: Vec<bool> = cells.iter().map(|c| c.attended).collect();
        assert_eq!(attended, vec![true, true, true, false, false]);
        assert_eq!(cells[0].week, 1);
        assert_eq!(cells[4].week, 5);
    }

    #[test]
    fn week_cells_guard_degenerate_counts() {
        assert!(attendance_week_cells(4, 0).is_empty());
        assert!(attendance_week_cells(4, -1).is_empty());
        let over = attendance_week_cells(99, 4);
        assert!(over.iter().all(|c| c.attended));
        let none = attendance_week_cells(-2, 4);
        assert!(none.iter().all(|c| !c.attended));
    }
}
