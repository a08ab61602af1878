use chrono::NaiveDate;

use crate::metrics::{
    self, attendance_rate, average_grade, grade_stddev, mean, recent_values, round2,
    OLDER_WINDOW_DAYS, RECENT_WINDOW_DAYS,
};
use crate::models::{AttendanceRecord, GradeRecord};

/// Everything the scorer needs about one student, fetched up front.
/// `exists` distinguishes an unknown id from a known student with no data;
/// the two produce different defaults.
#[derive(Debug, Clone, Default)]
pub struct StudentHistory {
    pub exists: bool,
    pub grades: Vec<GradeRecord>,
    pub attendance: Vec<AttendanceRecord>,
}

/// Neutral prediction for a student with no grade history.
pub const DEFAULT_PREDICTED_GPA: f64 = 3.5;
/// Neutral probability for an unknown student id.
pub const UNKNOWN_SUCCESS_PROBABILITY: f64 = 0.5;

const HEAVY_LOAD_GRADES: usize = 15;
const ELEVATED_LOAD_GRADES: usize = 10;
const DECLINE_BAND: f64 = 0.5;
const STABILITY_MIN_GRADES: usize = 5;
/// Success probability never exceeds this when attendance data is zero or
/// missing while grades exist.
const ATTENDANCE_PENALTY_CAP: f64 = 0.4;

/// Sum of independently triggered factors, capped at 1.0.
///
/// Factors: grading load over the last 30 days, low 30-day attendance, and a
/// recent-vs-older grade drop of more than 0.5. Unknown students score 0.0.
pub fn burnout_risk(history: &StudentHistory, as_of: NaiveDate) -> f64 {
    if !history.exists {
        return 0.0;
    }

    let mut risk: f64 = 0.0;

    let recent = recent_values(&history.grades, as_of, RECENT_WINDOW_DAYS);
    if recent.len() > HEAVY_LOAD_GRADES {
        risk += 0.3;
    } else if recent.len() > ELEVATED_LOAD_GRADES {
        risk += 0.2;
    }

    let (rate, total, _) = attendance_rate(&history.attendance, as_of, RECENT_WINDOW_DAYS);
    if total > 0 {
        let fraction = rate / 100.0;
        if fraction < 0.7 {
            risk += 0.25;
        } else if fraction < 0.8 {
            risk += 0.15;
        }
    }

    let older = metrics::older_values(&history.grades, as_of);
    if !recent.is_empty() && !older.is_empty() && mean(&recent) < mean(&older) - DECLINE_BAND {
        risk += 0.25;
    }

    round2(risk.min(1.0))
}

/// Weighted sum of grade level (≤0.40), 60-day attendance (≤0.30), and grade
/// stability (≤0.10), capped at 1.0.
///
/// Zero measured attendance, or missing attendance data for a student who
/// does have grades, caps the result at 0.4 regardless of grades. Unknown
/// students get the neutral 0.5.
pub fn success_probability(history: &StudentHistory, as_of: NaiveDate) -> f64 {
    if !history.exists {
        return UNKNOWN_SUCCESS_PROBABILITY;
    }

    let mut score = 0.0;
    let has_grades = !history.grades.is_empty();

    if has_grades {
        let avg = average_grade(&history.grades);
        score += if avg >= 4.5 {
            0.4
        } else if avg >= 4.0 {
            0.3
        } else if avg >= 3.5 {
            0.2
        } else {
            0.1
        };
    }

    let (rate, total, _) = attendance_rate(&history.attendance, as_of, OLDER_WINDOW_DAYS);
    let mut attendance_penalty = false;
    if total > 0 {
        let fraction = rate / 100.0;
        score += fraction * 0.3;
        if fraction == 0.0 {
            attendance_penalty = true;
        }
    } else if has_grades {
        // Grades with no attendance records at all is itself a red flag;
        // a student with neither is just new and goes unpenalized.
        attendance_penalty = true;
    }

    let window = recent_values(&history.grades, as_of, OLDER_WINDOW_DAYS);
    if window.len() > STABILITY_MIN_GRADES {
        let stddev = grade_stddev(&history.grades, as_of, OLDER_WINDOW_DAYS);
        score += (1.0 - stddev).max(0.0) * 0.1;
    }

    let mut probability = score.min(1.0);
    if attendance_penalty {
        probability = probability.min(ATTENDANCE_PENALTY_CAP);
    }
    round2(probability)
}

/// All-time average nudged by the last 30 days: +0.2 (capped at 5.0) when
/// recent grades beat the average, -0.1 (floored at 2.0) otherwise. With no
/// recent grades the base passes through unadjusted. No grades at all, or an
/// unknown id, yields the fixed 3.5 placeholder.
pub fn predict_gpa(history: &StudentHistory, as_of: NaiveDate) -> f64 {
    if history.grades.is_empty() {
        return DEFAULT_PREDICTED_GPA;
    }

    let base = average_grade(&history.grades);
    let recent = recent_values(&history.grades, as_of, RECENT_WINDOW_DAYS);
    let predicted = if recent.is_empty() {
        base
    } else if mean(&recent) > base {
        (base + 0.2).min(5.0)
    } else {
        (base - 0.1).max(2.0)
    };
    round2(predicted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};
    use uuid::Uuid;

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 4, 15).unwrap()
    }

    fn grade(days_ago: i64, value: f64) -> GradeRecord {
        GradeRecord {
            student_id: Uuid::new_v4(),
            course_id: Uuid::new_v4(),
            value,
            grade_type: None,
            graded_on: as_of() - Duration::days(days_ago),
        }
    }

    fn attendance(days_ago: i64, present: bool) -> AttendanceRecord {
        AttendanceRecord {
            student_id: Uuid::new_v4(),
            course_id: None,
            date: as_of() - Duration::days(days_ago),
            present,
        }
    }

    fn known(grades: Vec<GradeRecord>, attendance: Vec<AttendanceRecord>) -> StudentHistory {
        StudentHistory {
            exists: true,
            grades,
            attendance,
        }
    }

    #[test]
    fn unknown_student_defaults_are_asymmetric() {
        let missing = StudentHistory::default();
        assert_eq!(burnout_risk(&missing, as_of()), 0.0);
        assert_eq!(success_probability(&missing, as_of()), 0.5);
        assert_eq!(predict_gpa(&missing, as_of()), 3.5);
    }

    #[test]
    fn burnout_heavy_load_and_low_attendance() {
        // 20 recent grades (+0.30) and 65% attendance (+0.25).
        let grades: Vec<GradeRecord> = (0..20).map(|i| grade(i % 25, 4.0)).collect();
        let mut records: Vec<AttendanceRecord> = (0..13).map(|i| attendance(i, true)).collect();
        records.extend((0..7).map(|i| attendance(i + 13, false)));
        let history = known(grades, records);
        assert_eq!(burnout_risk(&history, as_of()), 0.55);
    }

    #[test]
    fn burnout_elevated_load_tier() {
        let grades: Vec<GradeRecord> = (0..12).map(|i| grade(i, 4.0)).collect();
        let history = known(grades, vec![]);
        assert_eq!(burnout_risk(&history, as_of()), 0.2);
    }

    #[test]
    fn burnout_declining_performance_factor() {
        let mut grades: Vec<GradeRecord> = (0..3).map(|i| grade(i, 3.0)).collect();
        grades.extend((0..3).map(|i| grade(40 + i, 4.0)));
        let history = known(grades, vec![]);
        assert_eq!(burnout_risk(&history, as_of()), 0.25);
    }

    #[test]
    fn burnout_monotone_in_recent_grade_count() {
        let few = known((0..8).map(|i| grade(i, 4.0)).collect(), vec![]);
        let some = known((0..12).map(|i| grade(i, 4.0)).collect(), vec![]);
        let many = known((0..18).map(|i| grade(i, 4.0)).collect(), vec![]);
        let a = burnout_risk(&few, as_of());
        let b = burnout_risk(&some, as_of());
        let c = burnout_risk(&many, as_of());
        assert!(a <= b && b <= c);
    }

    #[test]
    fn burnout_is_capped_at_one() {
        let mut grades: Vec<GradeRecord> = (0..20).map(|i| grade(i % 29, 2.0)).collect();
        grades.extend((0..5).map(|i| grade(40 + i, 5.0)));
        let history = known(grades, (0..10).map(|i| attendance(i, false)).collect());
        let risk = burnout_risk(&history, as_of());
        assert!(risk <= 1.0);
        // 0.30 load + 0.25 attendance + 0.25 decline.
        assert_eq!(risk, 0.8);
    }

    #[test]
    fn success_probability_top_band() {
        // avg 4.8 (+0.4), full attendance (+0.3), 6 steady grades (+0.1).
        let grades: Vec<GradeRecord> = (0..6).map(|i| grade(i, 4.8)).collect();
        let records: Vec<AttendanceRecord> = (0..10).map(|i| attendance(i, true)).collect();
        let history = known(grades, records);
        assert_eq!(success_probability(&history, as_of()), 0.8);
    }

    #[test]
    fn success_probability_zero_attendance_capped() {
        let grades: Vec<GradeRecord> = (0..4).map(|i| grade(i, 5.0)).collect();
        let records: Vec<AttendanceRecord> = (0..6).map(|i| attendance(i, false)).collect();
        let history = known(grades, records);
        assert!(success_probability(&history, as_of()) <= 0.4);
    }

    #[test]
    fn success_probability_missing_attendance_with_grades_capped() {
        let grades: Vec<GradeRecord> = (0..4).map(|i| grade(i, 5.0)).collect();
        let history = known(grades, vec![]);
        assert_eq!(success_probability(&history, as_of()), 0.4);
    }

    #[test]
    fn success_probability_new_student_unpenalized() {
        let history = known(vec![], vec![]);
        assert_eq!(success_probability(&history, as_of()), 0.0);
    }

    #[test]
    fn success_probability_stability_needs_more_than_five_grades() {
        // Exactly five 60-day grades: no stability term.
        let grades: Vec<GradeRecord> = (0..5).map(|i| grade(i, 4.0)).collect();
        let records: Vec<AttendanceRecord> = (0..10).map(|i| attendance(i, true)).collect();
        let history = known(grades, records);
        assert_eq!(success_probability(&history, as_of()), 0.6);
    }

    #[test]
    fn predict_gpa_no_grades_is_placeholder() {
        let history = known(vec![], vec![]);
        assert_eq!(predict_gpa(&history, as_of()), 3.5);
    }

    #[test]
    fn predict_gpa_recent_above_base_is_optimistic() {
        let mut grades = vec![grade(40, 3.0), grade(45, 3.0)];
        grades.push(grade(2, 5.0));
        let history = known(grades, vec![]);
        // base 11/3 ≈ 3.67, recent 5.0 > base → base + 0.2.
        assert_eq!(predict_gpa(&history, as_of()), 3.87);
    }

    #[test]
    fn predict_gpa_recent_at_or_below_base_is_pessimistic() {
        let grades = vec![grade(2, 4.0), grade(3, 4.0), grade(40, 4.0)];
        let history = known(grades, vec![]);
        assert_eq!(predict_gpa(&history, as_of()), 3.9);
    }

    #[test]
    fn predict_gpa_no_recent_grades_passes_base_through() {
        let grades = vec![grade(40, 4.2), grade(50, 4.4)];
        let history = known(grades, vec![]);
        assert_eq!(predict_gpa(&history, as_of()), 4.3);
    }

    #[test]
    fn predict_gpa_stays_within_scale_on_adjustment() {
        let grades: Vec<GradeRecord> = vec![grade(2, 5.0), grade(40, 4.9)];
        let history = known(grades, vec![]);
        assert!(predict_gpa(&history, as_of()) <= 5.0);
    }
}
