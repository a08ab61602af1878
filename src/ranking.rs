use std::cmp::Ordering;

use uuid::Uuid;

use crate::metrics::{round1, round2};
use crate::models::{EntityKind, ProblemEntity};

const GRADE_THRESHOLD: f64 = 3.5;
const ATTENDANCE_THRESHOLD: f64 = 70.0;
/// Grade used as a sort key for entities with no grades, pushing them last.
const NO_DATA_GRADE_KEY: f64 = 5.0;

/// Raw numbers for one ranking candidate before classification.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub kind: EntityKind,
    pub id: Option<Uuid>,
    pub label: String,
    pub average_grade: f64,
    pub attendance_rate: f64,
    pub population: usize,
}

/// Apply the uniform problem rule. An average of 0 means "no grades" and
/// never trips the grade branch; the attendance branch can still fire.
///
/// Thresholds and the problem score work on the raw candidate values;
/// rounding is display-only and happens on the returned entity.
pub fn classify(candidate: &Candidate) -> ProblemEntity {
    let has_grades = candidate.average_grade > 0.0;
    let low_grade = has_grades && candidate.average_grade < GRADE_THRESHOLD;
    let low_attendance = candidate.attendance_rate < ATTENDANCE_THRESHOLD;

    let mut problem_score = 0.0;
    if has_grades {
        problem_score += (GRADE_THRESHOLD - candidate.average_grade).max(0.0) * 10.0;
    }
    problem_score += (ATTENDANCE_THRESHOLD - candidate.attendance_rate).max(0.0);

    ProblemEntity {
        kind: candidate.kind,
        id: candidate.id,
        label: candidate.label.clone(),
        average_grade: round2(candidate.average_grade),
        attendance_rate: round1(candidate.attendance_rate),
        population: candidate.population,
        problem_score,
        is_problem: low_grade || low_attendance,
    }
}

fn grade_key(entity: &ProblemEntity) -> f64 {
    if entity.average_grade > 0.0 {
        entity.average_grade
    } else {
        NO_DATA_GRADE_KEY
    }
}

fn cmp_f64(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}

/// Priority ranking used by the teacher/group advisory flow: problem
/// entities first, then by descending problem score, then by lower real
/// grade (no-data entities sort as grade 5), then by lower attendance.
pub fn rank_priority(candidates: &[Candidate], top_n: usize) -> Vec<ProblemEntity> {
    let mut entities: Vec<ProblemEntity> = candidates.iter().map(classify).collect();
    entities.sort_by(|a, b| {
        a.is_problem
            .cmp(&b.is_problem)
            .reverse()
            .then_with(|| cmp_f64(b.problem_score, a.problem_score))
            .then_with(|| cmp_f64(grade_key(a), grade_key(b)))
            .then_with(|| cmp_f64(100.0 - a.attendance_rate, 100.0 - b.attendance_rate))
    });
    entities.truncate(top_n);
    entities
}

/// Plain ranking used by the admin problem listing: lower real grade first
/// (no-data entities last), ties broken by lower attendance. Only problem
/// entities are listed.
pub fn rank_plain(candidates: &[Candidate], top_n: usize) -> Vec<ProblemEntity> {
    let mut entities: Vec<ProblemEntity> = candidates
        .iter()
        .map(classify)
        .filter(|e| e.is_problem)
        .collect();
    entities.sort_by(|a, b| {
        cmp_f64(grade_key(a), grade_key(b))
            .then_with(|| cmp_f64(100.0 - a.attendance_rate, 100.0 - b.attendance_rate))
    });
    entities.truncate(top_n);
    entities
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(label: &str, average_grade: f64, attendance_rate: f64) -> Candidate {
        Candidate {
            kind: EntityKind::Group,
            id: None,
            label: label.to_string(),
            average_grade,
            attendance_rate,
            population: 10,
        }
    }

    #[test]
    fn low_grade_flags_problem() {
        let entity = classify(&candidate("g1", 3.2, 90.0));
        assert!(entity.is_problem);
        assert!((entity.problem_score - 3.0).abs() < 1e-9);
    }

    #[test]
    fn zero_grades_never_trip_the_grade_branch() {
        let entity = classify(&candidate("g1", 0.0, 95.0));
        assert!(!entity.is_problem);
        assert_eq!(entity.problem_score, 0.0);
    }

    #[test]
    fn zero_grades_still_flag_on_attendance() {
        let entity = classify(&candidate("g1", 0.0, 50.0));
        assert!(entity.is_problem);
        assert!((entity.problem_score - 20.0).abs() < 1e-9);
    }

    #[test]
    fn classification_works_on_unrounded_values() {
        // 3.4995 displays as 3.50 but still sits below the grade threshold;
        // the score keeps the raw distance.
        let entity = classify(&candidate("g1", 3.4995, 90.0));
        assert!(entity.is_problem);
        assert!((entity.problem_score - 0.005).abs() < 1e-9);
        assert!((entity.average_grade - 3.5).abs() < 1e-9);
    }

    #[test]
    fn problem_score_adds_both_terms() {
        // (3.5 - 3.0) * 10 + (70 - 60) = 15.
        let entity = classify(&candidate("g1", 3.0, 60.0));
        assert!((entity.problem_score - 15.0).abs() < 1e-9);
    }

    #[test]
    fn healthy_entity_can_still_carry_grade_term() {
        // Grade term is max(0, ...) so a 4.5 average contributes nothing.
        let entity = classify(&candidate("g1", 4.5, 90.0));
        assert!(!entity.is_problem);
        assert_eq!(entity.problem_score, 0.0);
    }

    #[test]
    fn priority_ranking_puts_problems_first() {
        let candidates = vec![
            candidate("healthy", 4.5, 90.0),
            candidate("failing", 2.8, 85.0),
        ];
        let ranked = rank_priority(&candidates, 10);
        assert_eq!(ranked[0].label, "failing");
        assert_eq!(ranked[1].label, "healthy");
    }

    #[test]
    fn priority_ranking_orders_by_score_then_grade_then_attendance() {
        let candidates = vec![
            candidate("a", 3.0, 60.0), // score 15
            candidate("b", 3.4, 50.0), // score 21
            candidate("c", 3.0, 50.0), // score 25
        ];
        let ranked = rank_priority(&candidates, 10);
        let labels: Vec<&str> = ranked.iter().map(|e| e.label.as_str()).collect();
        assert_eq!(labels, vec!["c", "b", "a"]);
    }

    #[test]
    fn lower_attendance_breaks_grade_ties_in_both_schemes() {
        let candidates = vec![candidate("a", 3.0, 60.0), candidate("b", 3.0, 50.0)];
        let priority = rank_priority(&candidates, 10);
        assert_eq!(priority[0].label, "b");
        let plain = rank_plain(&candidates, 10);
        assert_eq!(plain[0].label, "b");
    }

    #[test]
    fn no_data_entities_sort_last_in_plain_ranking() {
        let candidates = vec![
            candidate("no-data", 0.0, 40.0),
            candidate("failing", 2.5, 40.0),
        ];
        let ranked = rank_plain(&candidates, 10);
        assert_eq!(ranked[0].label, "failing");
        assert_eq!(ranked[1].label, "no-data");
    }

    #[test]
    fn plain_ranking_drops_healthy_entities() {
        let candidates = vec![candidate("ok", 4.2, 85.0), candidate("bad", 3.0, 85.0)];
        let ranked = rank_plain(&candidates, 10);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].label, "bad");
    }

    #[test]
    fn truncation_happens_after_sorting() {
        let candidates = vec![
            candidate("mild", 3.4, 85.0),
            candidate("worst", 2.2, 30.0),
            candidate("bad", 2.8, 60.0),
        ];
        let ranked = rank_priority(&candidates, 1);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].label, "worst");
    }
}
