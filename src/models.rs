use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use uuid::Uuid;

/// A single graded item for a student in a course. Values live on the
/// 2..=5 scale; `grade_type` is free-form (exam, test, coursework, homework)
/// and may be absent.
#[derive(Debug, Clone)]
pub struct GradeRecord {
    pub student_id: Uuid,
    pub course_id: Uuid,
    pub value: f64,
    pub grade_type: Option<String>,
    pub graded_on: NaiveDate,
}

/// One attendance observation. `course_id` is absent for whole-day records.
#[derive(Debug, Clone)]
pub struct AttendanceRecord {
    pub student_id: Uuid,
    pub course_id: Option<Uuid>,
    pub date: NaiveDate,
    pub present: bool,
}

#[derive(Debug, Clone)]
pub struct StudentRow {
    pub id: Uuid,
    pub full_name: String,
    pub email: String,
    pub group_name: Option<String>,
    pub year: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct TeacherRow {
    pub id: Uuid,
    pub full_name: String,
    pub department: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CourseRow {
    pub id: Uuid,
    pub name: String,
    pub code: Option<String>,
}

/// Rollup over one scope (student, group, or teacher). Recomputed on demand,
/// never persisted. A zero `average_grade` means "no grades", not a failing
/// grade; callers must check `grade_count` before treating it as real.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScopeAggregate {
    pub average_grade: f64,
    pub grade_count: usize,
    pub recent_average: f64,
    pub older_average: f64,
    pub attendance_rate: f64,
    pub attendance_total: usize,
    pub attendance_present: usize,
    pub grade_stddev: f64,
}

/// The one persisted derived entity; at most one row per student.
#[derive(Debug, Clone, Serialize)]
pub struct StudentPrediction {
    pub student_id: Uuid,
    pub burnout_risk: f64,
    pub success_probability: f64,
    pub predicted_gpa: f64,
    pub calculated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Student,
    Group,
    Teacher,
}

/// Ranking candidate. Transient; built per request from aggregates.
#[derive(Debug, Clone, Serialize)]
pub struct ProblemEntity {
    pub kind: EntityKind,
    pub id: Option<Uuid>,
    pub label: String,
    pub average_grade: f64,
    pub attendance_rate: f64,
    pub population: usize,
    pub problem_score: f64,
    pub is_problem: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Improving,
    Stable,
    Declining,
}

impl Trend {
    pub fn label(self) -> &'static str {
        match self {
            Trend::Improving => "improving",
            Trend::Stable => "stable",
            Trend::Declining => "declining",
        }
    }
}

/// Per-grade-type rollup inside one course.
#[derive(Debug, Clone, Serialize)]
pub struct GradeTypeStat {
    pub grade_type: String,
    pub average: f64,
    pub count: usize,
}

pub const NO_GROUP: &str = "no group";
pub const NO_DEPARTMENT: &str = "no department";
pub const OTHER_GRADE_TYPE: &str = "other";
