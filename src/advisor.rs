use std::collections::HashMap;
use std::fmt::Write;

use anyhow::bail;
use chrono::NaiveDate;
use uuid::Uuid;

use crate::metrics::{self, round1, round2, OLDER_WINDOW_DAYS, RECENT_WINDOW_DAYS};
use crate::models::{
    AttendanceRecord, CourseRow, EntityKind, GradeRecord, GradeTypeStat, ProblemEntity,
    StudentRow, TeacherRow, Trend, NO_DEPARTMENT, NO_GROUP,
};
use crate::ranking::{self, Candidate};

/// Which advisory backend renders the prepared context. The external mode is
/// a placeholder for an LLM integration owned by the API layer; this crate
/// only ships the template renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvisorMode {
    Template,
    External,
}

#[derive(Debug, Clone)]
pub struct CourseStat {
    pub course: String,
    pub average: f64,
    pub count: usize,
}

#[derive(Debug, Clone)]
pub struct StudentContext {
    pub name: String,
    pub group: String,
    pub year: Option<i32>,
    pub gpa: f64,
    pub attendance_rate: f64,
    pub total_grades: usize,
    pub recent_grades_count: usize,
    pub trend: Trend,
    pub courses: Vec<CourseStat>,
}

#[derive(Debug, Clone)]
pub struct StudentCourseContext {
    pub name: String,
    pub course_name: String,
    pub course_code: String,
    pub gpa: f64,
    pub attendance_rate: f64,
    pub total_grades: usize,
    pub trend: Trend,
    pub grade_types: Vec<GradeTypeStat>,
    pub recent_grades: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct TeacherCourseStat {
    pub course: String,
    pub average_grade: f64,
    pub attendance_rate: f64,
    pub total_students: usize,
}

#[derive(Debug, Clone)]
pub struct TeacherContext {
    pub name: String,
    pub department: String,
    pub courses: Vec<TeacherCourseStat>,
    /// Group rollups ranked with the priority strategy, problems first.
    pub groups: Vec<ProblemEntity>,
}

#[derive(Debug, Clone)]
pub struct AdminContext {
    pub total_students: usize,
    pub total_teachers: usize,
    pub total_courses: usize,
    pub overall_average_grade: f64,
    pub overall_attendance_rate: f64,
    pub problem_students: Vec<ProblemEntity>,
    pub problem_groups: Vec<ProblemEntity>,
    pub problem_teachers: Vec<ProblemEntity>,
    pub problem_students_count: usize,
    pub problem_groups_count: usize,
    pub problem_teachers_count: usize,
}

pub const ADMIN_TOP_STUDENTS: usize = 20;
pub const ADMIN_TOP_GROUPS: usize = 15;
pub const ADMIN_TOP_TEACHERS: usize = 10;

pub fn student_context(
    student: &StudentRow,
    grades: &[GradeRecord],
    attendance: &[AttendanceRecord],
    course_names: &HashMap<Uuid, String>,
    as_of: NaiveDate,
) -> StudentContext {
    let (rate, _, _) = metrics::attendance_rate(attendance, as_of, RECENT_WINDOW_DAYS);
    let recent = metrics::recent_values(grades, as_of, RECENT_WINDOW_DAYS);

    let mut per_course: HashMap<Uuid, (usize, f64)> = HashMap::new();
    for grade in grades {
        let entry = per_course.entry(grade.course_id).or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 += grade.value;
    }
    let mut courses: Vec<CourseStat> = per_course
        .into_iter()
        .map(|(course_id, (count, sum))| CourseStat {
            course: course_names
                .get(&course_id)
                .cloned()
                .unwrap_or_else(|| course_id.to_string()),
            average: sum / count as f64,
            count,
        })
        .collect();
    courses.sort_by(|a, b| a.course.cmp(&b.course));

    StudentContext {
        name: student.full_name.clone(),
        group: student.group_name.clone().unwrap_or_else(|| NO_GROUP.to_string()),
        year: student.year,
        gpa: round2(metrics::average_grade(grades)),
        attendance_rate: round1(rate),
        total_grades: grades.len(),
        recent_grades_count: recent.len(),
        trend: metrics::grade_trend(grades, as_of),
        courses,
    }
}

pub fn student_course_context(
    student: &StudentRow,
    course: &CourseRow,
    grades: &[GradeRecord],
    attendance: &[AttendanceRecord],
    as_of: NaiveDate,
) -> StudentCourseContext {
    // Newest first; intra-day order is unspecified upstream so the date is
    // the only key that matters here.
    let mut ordered: Vec<&GradeRecord> = grades.iter().collect();
    ordered.sort_by(|a, b| b.graded_on.cmp(&a.graded_on));
    let ordered_values: Vec<f64> = ordered.iter().map(|g| g.value).collect();

    let (rate, _, _) = metrics::attendance_rate(attendance, as_of, OLDER_WINDOW_DAYS);

    StudentCourseContext {
        name: student.full_name.clone(),
        course_name: course.name.clone(),
        course_code: course.code.clone().unwrap_or_default(),
        gpa: round2(metrics::average_grade(grades)),
        attendance_rate: round1(rate),
        total_grades: grades.len(),
        trend: metrics::positional_trend(&ordered_values),
        grade_types: metrics::grade_type_breakdown(grades),
        recent_grades: ordered_values.into_iter().take(5).collect(),
    }
}

/// Per-group accumulator for the teacher scope. Sums are kept raw and only
/// divided at the end so the rollup matches per-record math, not an average
/// of averages.
#[derive(Debug, Default)]
pub struct GroupRollup {
    pub students: usize,
    pub grade_count: usize,
    pub grade_sum: f64,
    pub attendance_total: usize,
    pub attendance_present: usize,
}

impl GroupRollup {
    pub fn average_grade(&self) -> f64 {
        if self.grade_count > 0 {
            self.grade_sum / self.grade_count as f64
        } else {
            0.0
        }
    }

    pub fn attendance_rate(&self) -> f64 {
        if self.attendance_total > 0 {
            self.attendance_present as f64 / self.attendance_total as f64 * 100.0
        } else {
            0.0
        }
    }
}

pub fn teacher_context(
    teacher: &TeacherRow,
    courses: &[CourseRow],
    course_grades: &HashMap<Uuid, Vec<GradeRecord>>,
    course_attendance: &HashMap<Uuid, Vec<AttendanceRecord>>,
    student_groups: &HashMap<Uuid, Option<String>>,
    as_of: NaiveDate,
) -> TeacherContext {
    let empty_grades: Vec<GradeRecord> = Vec::new();
    let empty_attendance: Vec<AttendanceRecord> = Vec::new();

    let mut course_stats = Vec::new();
    let mut rollups: HashMap<String, GroupRollup> = HashMap::new();

    for course in courses {
        let grades = course_grades.get(&course.id).unwrap_or(&empty_grades);
        let attendance = course_attendance.get(&course.id).unwrap_or(&empty_attendance);
        let (rate, _, _) = metrics::attendance_rate(attendance, as_of, RECENT_WINDOW_DAYS);

        let students: std::collections::HashSet<Uuid> =
            grades.iter().map(|g| g.student_id).collect();
        course_stats.push(TeacherCourseStat {
            course: course.name.clone(),
            average_grade: round2(metrics::average_grade(grades)),
            attendance_rate: round1(rate),
            total_students: students.len(),
        });

        for student_id in &students {
            let group = student_groups
                .get(student_id)
                .cloned()
                .flatten()
                .unwrap_or_else(|| NO_GROUP.to_string());
            let rollup = rollups.entry(group).or_default();
            rollup.students += 1;
            for grade in grades.iter().filter(|g| g.student_id == *student_id) {
                rollup.grade_count += 1;
                rollup.grade_sum += grade.value;
            }
            let (_, total, present) = metrics::attendance_rate(
                &attendance
                    .iter()
                    .filter(|a| a.student_id == *student_id)
                    .cloned()
                    .collect::<Vec<_>>(),
                as_of,
                RECENT_WINDOW_DAYS,
            );
            rollup.attendance_total += total;
            rollup.attendance_present += present;
        }
    }

    let candidates: Vec<Candidate> = rollups
        .into_iter()
        .map(|(group, rollup)| Candidate {
            kind: EntityKind::Group,
            id: None,
            label: group,
            average_grade: rollup.average_grade(),
            attendance_rate: rollup.attendance_rate(),
            population: rollup.students,
        })
        .collect();
    let top = candidates.len();
    let groups = ranking::rank_priority(&candidates, top);

    TeacherContext {
        name: teacher.full_name.clone(),
        department: teacher
            .department
            .clone()
            .unwrap_or_else(|| NO_DEPARTMENT.to_string()),
        courses: course_stats,
        groups,
    }
}

/// Ranking candidates for every student holding at least one grade, over
/// all-time averages and 30-day attendance. Students with no grades have
/// nothing to rank on.
pub fn student_candidates(
    students: &[StudentRow],
    grades: &[GradeRecord],
    attendance: &[AttendanceRecord],
    as_of: NaiveDate,
) -> Vec<Candidate> {
    let mut grades_by_student: HashMap<Uuid, Vec<f64>> = HashMap::new();
    for grade in grades {
        grades_by_student.entry(grade.student_id).or_default().push(grade.value);
    }
    let mut attendance_by_student: HashMap<Uuid, Vec<AttendanceRecord>> = HashMap::new();
    for record in attendance {
        attendance_by_student
            .entry(record.student_id)
            .or_default()
            .push(record.clone());
    }

    let empty = Vec::new();
    let mut candidates = Vec::new();
    for student in students {
        let Some(values) = grades_by_student.get(&student.id) else {
            continue;
        };
        let own_attendance = attendance_by_student.get(&student.id).unwrap_or(&empty);
        let (rate, _, _) = metrics::attendance_rate(own_attendance, as_of, RECENT_WINDOW_DAYS);
        let group = student.group_name.clone().unwrap_or_else(|| NO_GROUP.to_string());
        candidates.push(Candidate {
            kind: EntityKind::Student,
            id: Some(student.id),
            label: format!("{} ({})", student.full_name, group),
            average_grade: metrics::mean(values),
            attendance_rate: rate,
            population: 1,
        });
    }
    candidates
}

/// Group candidates over every student, including those without grades:
/// a group of ungraded students still ranks on attendance.
pub fn group_candidates(
    students: &[StudentRow],
    grades: &[GradeRecord],
    attendance: &[AttendanceRecord],
    as_of: NaiveDate,
) -> Vec<Candidate> {
    let mut group_of: HashMap<Uuid, String> = HashMap::new();
    let mut rollups: HashMap<String, GroupRollup> = HashMap::new();
    for student in students {
        let group = student.group_name.clone().unwrap_or_else(|| NO_GROUP.to_string());
        group_of.insert(student.id, group.clone());
        rollups.entry(group).or_default().students += 1;
    }
    for grade in grades {
        if let Some(rollup) = group_of.get(&grade.student_id).and_then(|g| rollups.get_mut(g)) {
            rollup.grade_count += 1;
            rollup.grade_sum += grade.value;
        }
    }
    let cutoff = metrics::cutoff_date(as_of, RECENT_WINDOW_DAYS);
    for record in attendance {
        if record.date < cutoff {
            continue;
        }
        if let Some(rollup) = group_of.get(&record.student_id).and_then(|g| rollups.get_mut(g)) {
            rollup.attendance_total += 1;
            if record.present {
                rollup.attendance_present += 1;
            }
        }
    }

    rollups
        .into_iter()
        .map(|(group, rollup)| Candidate {
            kind: EntityKind::Group,
            id: None,
            label: group,
            average_grade: rollup.average_grade(),
            attendance_rate: rollup.attendance_rate(),
            population: rollup.students,
        })
        .collect()
}

/// Teacher candidates over the union of each teacher's courses' grades and
/// course-scoped 30-day attendance. Teachers with no courses are skipped.
pub fn teacher_candidates(
    teachers: &[TeacherRow],
    course_teachers: &[(Uuid, Uuid)],
    grades: &[GradeRecord],
    attendance: &[AttendanceRecord],
    as_of: NaiveDate,
) -> Vec<Candidate> {
    let mut courses_by_teacher: HashMap<Uuid, std::collections::HashSet<Uuid>> = HashMap::new();
    for (course_id, teacher_id) in course_teachers {
        courses_by_teacher.entry(*teacher_id).or_default().insert(*course_id);
    }

    let mut candidates = Vec::new();
    for teacher in teachers {
        let Some(taught) = courses_by_teacher.get(&teacher.id) else {
            continue;
        };
        if taught.is_empty() {
            continue;
        }
        let values: Vec<f64> = grades
            .iter()
            .filter(|g| taught.contains(&g.course_id))
            .map(|g| g.value)
            .collect();
        let taught_attendance: Vec<AttendanceRecord> = attendance
            .iter()
            .filter(|a| a.course_id.map(|id| taught.contains(&id)).unwrap_or(false))
            .cloned()
            .collect();
        let (rate, _, _) = metrics::attendance_rate(&taught_attendance, as_of, RECENT_WINDOW_DAYS);
        let department = teacher
            .department
            .clone()
            .unwrap_or_else(|| NO_DEPARTMENT.to_string());
        candidates.push(Candidate {
            kind: EntityKind::Teacher,
            id: Some(teacher.id),
            label: format!("{} ({})", teacher.full_name, department),
            average_grade: metrics::mean(&values),
            attendance_rate: rate,
            population: taught.len(),
        });
    }
    candidates
}

/// Build the admin overview from whole-system record sets. All three problem
/// lists use the plain ranking; counts reflect the full problem sets before
/// truncation.
#[allow(clippy::too_many_arguments)]
pub fn admin_context(
    students: &[StudentRow],
    teachers: &[TeacherRow],
    courses: &[CourseRow],
    course_teachers: &[(Uuid, Uuid)],
    grades: &[GradeRecord],
    attendance: &[AttendanceRecord],
    as_of: NaiveDate,
) -> AdminContext {
    let students_c = student_candidates(students, grades, attendance, as_of);
    let groups_c = group_candidates(students, grades, attendance, as_of);
    let teachers_c = teacher_candidates(teachers, course_teachers, grades, attendance, as_of);

    let problem_count = |candidates: &[Candidate]| {
        candidates.iter().filter(|c| ranking::classify(c).is_problem).count()
    };

    let (overall_rate, _, _) = metrics::attendance_rate(attendance, as_of, RECENT_WINDOW_DAYS);
    AdminContext {
        total_students: students.len(),
        total_teachers: teachers.len(),
        total_courses: courses.len(),
        overall_average_grade: round2(metrics::average_grade(grades)),
        overall_attendance_rate: round1(overall_rate),
        problem_students_count: problem_count(&students_c),
        problem_groups_count: problem_count(&groups_c),
        problem_teachers_count: problem_count(&teachers_c),
        problem_students: ranking::rank_plain(&students_c, ADMIN_TOP_STUDENTS),
        problem_groups: ranking::rank_plain(&groups_c, ADMIN_TOP_GROUPS),
        problem_teachers: ranking::rank_plain(&teachers_c, ADMIN_TOP_TEACHERS),
    }
}

pub fn render_student_advice(mode: AdvisorMode, context: &StudentContext) -> anyhow::Result<String> {
    require_template(mode)?;
    let mut output = String::new();

    match context.year {
        Some(year) => {
            let _ = writeln!(
                output,
                "Advisory for {} (group {}, year {year})",
                context.name, context.group
            );
        }
        None => {
            let _ = writeln!(output, "Advisory for {} (group {})", context.name, context.group);
        }
    }
    if context.total_grades > 0 {
        let _ = writeln!(
            output,
            "Grades on record: {} ({} in the last 30 days), attendance {:.1}%",
            context.total_grades, context.recent_grades_count, context.attendance_rate
        );
    }
    let _ = writeln!(output);

    if context.gpa >= 4.5 {
        let _ = writeln!(
            output,
            "Excellent overall performance: your average of {:.2} shows a strong command of the material.",
            context.gpa
        );
    } else if context.gpa >= 3.5 {
        let _ = writeln!(
            output,
            "Good standing with an average of {:.2}. There is room to push further.",
            context.gpa
        );
    } else if context.total_grades > 0 {
        let _ = writeln!(
            output,
            "Your average of {:.2} is below target and needs focused work.",
            context.gpa
        );
    } else {
        let _ = writeln!(output, "No grades recorded yet; check back once coursework begins.");
    }

    let weak: Vec<&CourseStat> = context.courses.iter().filter(|c| c.average < 3.5).collect();
    if !weak.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "Courses that need attention:");
        for course in weak.iter().take(3) {
            let _ = writeln!(
                output,
                "- **{}** (average {:.2}): review the material, keep up with assignments, and ask the instructor for a consultation.",
                course.course, course.average
            );
        }
    }

    let strong: Vec<&CourseStat> = context.courses.iter().filter(|c| c.average >= 4.0).collect();
    if !strong.is_empty() {
        let names: Vec<&str> = strong.iter().take(3).map(|c| c.course.as_str()).collect();
        let _ = writeln!(output);
        let _ = writeln!(
            output,
            "Strengths: solid results in {}. Keep that level up.",
            names.join(", ")
        );
    }

    if context.attendance_rate < 70.0 {
        let _ = writeln!(output);
        let _ = writeln!(
            output,
            "Attendance is at {:.1}%, below the expected level. Regular attendance matters for keeping up.",
            context.attendance_rate
        );
    }

    if context.trend == Trend::Declining {
        let _ = writeln!(output);
        let _ = writeln!(
            output,
            "Recent grades are trending down; review what changed and adjust your study plan."
        );
    } else if context.trend == Trend::Improving {
        let _ = writeln!(output);
        let _ = writeln!(output, "Recent grades are trending up, keep going.");
    }

    Ok(output)
}

pub fn render_student_course_advice(
    mode: AdvisorMode,
    context: &StudentCourseContext,
) -> anyhow::Result<String> {
    require_template(mode)?;
    let mut output = String::new();

    if context.course_code.is_empty() {
        let _ = writeln!(output, "Course advisory for {}: {}", context.name, context.course_name);
    } else {
        let _ = writeln!(
            output,
            "Course advisory for {}: {} ({})",
            context.name, context.course_name, context.course_code
        );
    }
    if !context.recent_grades.is_empty() {
        let shown: Vec<String> = context.recent_grades.iter().map(|v| format!("{v:.0}")).collect();
        let _ = writeln!(output, "Latest grades: {}", shown.join(", "));
    }
    let _ = writeln!(output);

    if context.gpa >= 4.5 {
        let _ = writeln!(
            output,
            "Excellent work in **{}**: average {:.2}.",
            context.course_name, context.gpa
        );
    } else if context.gpa >= 3.5 {
        let _ = writeln!(
            output,
            "Good progress in **{}** with an average of {:.2}.",
            context.course_name, context.gpa
        );
    } else if context.total_grades > 0 {
        let _ = writeln!(
            output,
            "Low results in **{}** (average {:.2}); the course needs serious attention.",
            context.course_name, context.gpa
        );
    } else {
        let _ = writeln!(output, "No grades recorded in **{}** yet.", context.course_name);
    }

    let weak: Vec<&GradeTypeStat> =
        context.grade_types.iter().filter(|s| s.average < 3.5).collect();
    if !weak.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "Assignment types that need attention:");
        for stat in weak.iter().take(3) {
            let _ = writeln!(
                output,
                "- **{}** (average {:.2}): put more preparation time into these and ask for help early.",
                stat.grade_type, stat.average
            );
        }
    }

    if context.attendance_rate < 70.0 {
        let _ = writeln!(output);
        let _ = writeln!(
            output,
            "Course attendance is {:.1}%, below the norm; missed sessions make the material harder to recover.",
            context.attendance_rate
        );
    }

    match context.trend {
        Trend::Declining => {
            let _ = writeln!(output);
            let _ = writeln!(output, "Results in this course have been slipping lately; step up preparation.");
        }
        Trend::Improving => {
            let _ = writeln!(output);
            let _ = writeln!(output, "Strong momentum: recent results are improving.");
        }
        Trend::Stable => {}
    }

    Ok(output)
}

pub fn render_teacher_advice(mode: AdvisorMode, context: &TeacherContext) -> anyhow::Result<String> {
    require_template(mode)?;
    if context.courses.is_empty() {
        return Ok(
            "No courses with data yet. Recommendations will appear once students are graded."
                .to_string(),
        );
    }

    let mut output = String::new();

    let _ = writeln!(output, "Advisory for {} ({})", context.name, context.department);
    let _ = writeln!(output);
    let _ = writeln!(output, "Courses:");
    for course in &context.courses {
        let _ = writeln!(
            output,
            "- {}: average {:.2}, attendance {:.1}%, {} students",
            course.course, course.average_grade, course.attendance_rate, course.total_students
        );
    }
    let _ = writeln!(output);

    let total_students: usize = context.courses.iter().map(|c| c.total_students).sum();
    let (overall_avg, overall_att) = if total_students > 0 {
        let avg = context
            .courses
            .iter()
            .map(|c| c.average_grade * c.total_students as f64)
            .sum::<f64>()
            / total_students as f64;
        let att = context
            .courses
            .iter()
            .map(|c| c.attendance_rate * c.total_students as f64)
            .sum::<f64>()
            / total_students as f64;
        (avg, att)
    } else {
        (0.0, 0.0)
    };

    if overall_avg >= 4.0 && overall_att >= 80.0 {
        let _ = writeln!(
            output,
            "Strong teaching outcomes overall: average grade {:.2} with {:.1}% attendance.",
            overall_avg, overall_att
        );
    } else if overall_avg >= 3.5 {
        let _ = writeln!(
            output,
            "Solid outcomes with an average grade of {:.2}; there is room to improve.",
            overall_avg
        );
    } else {
        let _ = writeln!(
            output,
            "Teaching outcomes need attention: the average grade of {:.2} is below target.",
            overall_avg
        );
    }

    let problems: Vec<&ProblemEntity> = context.groups.iter().filter(|g| g.is_problem).collect();
    if !problems.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "**Groups needing attention:**");
        for group in problems.iter().take(5) {
            let mut issues = Vec::new();
            let mut actions = Vec::new();
            if group.average_grade > 0.0 && group.average_grade < 3.5 {
                issues.push(format!("low average grade ({:.2})", group.average_grade));
                actions.push("schedule extra consultations");
                actions.push("revisit the hardest topics in class");
            }
            if group.attendance_rate < 70.0 {
                issues.push(format!("low attendance ({:.1}%)", group.attendance_rate));
                actions.push("contact the group representative");
                actions.push("try more interactive sessions");
            }
            let _ = writeln!(
                output,
                "- **Group {}** ({} students): {}. Suggested: {}.",
                group.label,
                group.population,
                issues.join(", "),
                actions[..actions.len().min(3)].join(", ")
            );
        }
    }

    let good: Vec<&ProblemEntity> = context
        .groups
        .iter()
        .filter(|g| g.average_grade >= 4.0 && g.attendance_rate >= 80.0)
        .collect();
    if !good.is_empty() {
        let names: Vec<String> = good.iter().take(3).map(|g| format!("**{}**", g.label)).collect();
        let _ = writeln!(output);
        let _ = writeln!(
            output,
            "**Strengths:** excellent results in groups {}. Carry that approach over to the others.",
            names.join(", ")
        );
    }

    if problems.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(
            output,
            "Keep using the current methods; engagement is holding up across all groups."
        );
    }

    Ok(output)
}

pub fn render_admin_advice(mode: AdvisorMode, context: &AdminContext) -> anyhow::Result<String> {
    require_template(mode)?;
    let mut output = String::new();

    let _ = writeln!(output, "**System problem-area overview:**");
    let _ = writeln!(output);
    let _ = writeln!(output, "- Students: {}", context.total_students);
    let _ = writeln!(output, "- Teachers: {}", context.total_teachers);
    let _ = writeln!(output, "- Courses: {}", context.total_courses);
    let _ = writeln!(output, "- Overall average grade: {:.2}", context.overall_average_grade);
    let _ = writeln!(
        output,
        "- Overall attendance (30 days): {:.1}%",
        context.overall_attendance_rate
    );
    let _ = writeln!(output, "- Problem students: {}", context.problem_students_count);
    let _ = writeln!(output, "- Problem groups: {}", context.problem_groups_count);
    let _ = writeln!(output, "- Problem teachers: {}", context.problem_teachers_count);

    if !context.problem_students.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "**Top problem students:**");
        for student in context.problem_students.iter().take(5) {
            let _ = writeln!(output, "- {}: {}", student.label, describe_problems(student));
        }
    }

    if !context.problem_groups.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "**Top problem groups:**");
        for group in context.problem_groups.iter().take(5) {
            let _ = writeln!(
                output,
                "- Group {} ({} students): {}",
                group.label,
                group.population,
                describe_problems(group)
            );
        }
    }

    if !context.problem_teachers.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "**Top problem teachers:**");
        for teacher in context.problem_teachers.iter().take(5) {
            let _ = writeln!(output, "- {}: {}", teacher.label, describe_problems(teacher));
        }
    }

    Ok(output)
}

fn describe_problems(entity: &ProblemEntity) -> String {
    let mut problems = Vec::new();
    if entity.average_grade > 0.0 && entity.average_grade < 3.5 {
        problems.push(format!("low average grade ({:.2})", entity.average_grade));
    }
    if entity.attendance_rate < 70.0 {
        problems.push(format!("low attendance ({:.1}%)", entity.attendance_rate));
    }
    if problems.is_empty() {
        "no data".to_string()
    } else {
        problems.join(", ")
    }
}

fn require_template(mode: AdvisorMode) -> anyhow::Result<()> {
    if mode == AdvisorMode::External {
        bail!("external advisory backend is not configured; use the template renderer");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 4, 15).unwrap()
    }

    fn student() -> StudentRow {
        StudentRow {
            id: Uuid::new_v4(),
            full_name: "Dana Kim".to_string(),
            email: "dana@example.edu".to_string(),
            group_name: None,
            year: Some(2),
        }
    }

    fn grade(student_id: Uuid, course_id: Uuid, days_ago: i64, value: f64) -> GradeRecord {
        GradeRecord {
            student_id,
            course_id,
            value,
            grade_type: None,
            graded_on: as_of() - Duration::days(days_ago),
        }
    }

    #[test]
    fn student_context_uses_no_group_fallback() {
        let row = student();
        let context = student_context(&row, &[], &[], &HashMap::new(), as_of());
        assert_eq!(context.group, "no group");
        assert_eq!(context.gpa, 0.0);
        assert_eq!(context.trend, Trend::Stable);
    }

    #[test]
    fn student_context_rolls_up_per_course() {
        let row = student();
        let course_id = Uuid::new_v4();
        let grades = vec![
            grade(row.id, course_id, 1, 4.0),
            grade(row.id, course_id, 2, 5.0),
        ];
        let mut names = HashMap::new();
        names.insert(course_id, "Algebra".to_string());
        let context = student_context(&row, &grades, &[], &names, as_of());
        assert_eq!(context.courses.len(), 1);
        assert_eq!(context.courses[0].course, "Algebra");
        assert_eq!(context.courses[0].count, 2);
        assert!((context.courses[0].average - 4.5).abs() < 1e-9);
        assert_eq!(context.recent_grades_count, 2);
    }

    #[test]
    fn external_mode_is_rejected() {
        let row = student();
        let context = student_context(&row, &[], &[], &HashMap::new(), as_of());
        assert!(render_student_advice(AdvisorMode::External, &context).is_err());
    }

    #[test]
    fn student_advice_mentions_weak_courses() {
        let row = student();
        let course_id = Uuid::new_v4();
        let grades = vec![grade(row.id, course_id, 1, 2.5), grade(row.id, course_id, 2, 3.0)];
        let mut names = HashMap::new();
        names.insert(course_id, "Physics".to_string());
        let context = student_context(&row, &grades, &[], &names, as_of());
        let advice = render_student_advice(AdvisorMode::Template, &context).unwrap();
        assert!(advice.contains("Physics"));
        assert!(advice.contains("needs focused work") || advice.contains("need attention"));
    }

    #[test]
    fn teacher_context_ranks_problem_groups_first() {
        let teacher = TeacherRow {
            id: Uuid::new_v4(),
            full_name: "Prof. Reyes".to_string(),
            department: None,
        };
        let course = CourseRow {
            id: Uuid::new_v4(),
            name: "Calculus".to_string(),
            code: None,
        };
        let good = Uuid::new_v4();
        let struggling = Uuid::new_v4();
        let grades = vec![
            grade(good, course.id, 1, 4.8),
            grade(good, course.id, 2, 4.6),
            grade(struggling, course.id, 1, 2.4),
            grade(struggling, course.id, 2, 2.6),
        ];
        let mut course_grades = HashMap::new();
        course_grades.insert(course.id, grades);
        let mut groups = HashMap::new();
        groups.insert(good, Some("A-1".to_string()));
        groups.insert(struggling, Some("B-2".to_string()));

        let context = teacher_context(
            &teacher,
            std::slice::from_ref(&course),
            &course_grades,
            &HashMap::new(),
            &groups,
            as_of(),
        );
        assert_eq!(context.department, "no department");
        assert_eq!(context.groups.len(), 2);
        assert_eq!(context.groups[0].label, "B-2");
        assert!(context.groups[0].is_problem);
    }

    #[test]
    fn admin_context_ranks_and_counts_problems() {
        let course = CourseRow {
            id: Uuid::new_v4(),
            name: "Statistics".to_string(),
            code: None,
        };
        let teacher = TeacherRow {
            id: Uuid::new_v4(),
            full_name: "Prof. Ibe".to_string(),
            department: Some("Mathematics".to_string()),
        };
        let mut strong = student();
        strong.group_name = Some("A-1".to_string());
        let mut weak = student();
        weak.full_name = "Lee Park".to_string();
        weak.email = "lee@example.edu".to_string();
        weak.group_name = Some("B-2".to_string());

        let grades = vec![
            grade(strong.id, course.id, 1, 4.8),
            grade(strong.id, course.id, 2, 4.6),
            grade(weak.id, course.id, 1, 2.4),
            grade(weak.id, course.id, 2, 2.8),
        ];
        let attendance: Vec<AttendanceRecord> = (0..4)
            .map(|i| AttendanceRecord {
                student_id: if i < 2 { strong.id } else { weak.id },
                course_id: Some(course.id),
                date: as_of() - Duration::days(i),
                present: i < 2,
            })
            .collect();

        let context = admin_context(
            &[strong.clone(), weak.clone()],
            std::slice::from_ref(&teacher),
            std::slice::from_ref(&course),
            &[(course.id, teacher.id)],
            &grades,
            &attendance,
            as_of(),
        );

        assert_eq!(context.total_students, 2);
        assert_eq!(context.problem_students_count, 1);
        assert_eq!(context.problem_students.len(), 1);
        assert!(context.problem_students[0].label.starts_with("Lee Park"));
        // Weak student's group fails both thresholds; the teacher's overall
        // average stays above 3.5 but course attendance is 50%.
        assert_eq!(context.problem_groups_count, 1);
        assert_eq!(context.problem_groups[0].label, "B-2");
        assert_eq!(context.problem_teachers_count, 1);
        assert!((context.overall_average_grade - 3.65).abs() < 1e-9);
        assert!((context.overall_attendance_rate - 50.0).abs() < 1e-9);
    }

    #[test]
    fn course_context_buckets_and_orders_recent_grades() {
        let row = student();
        let course = CourseRow {
            id: Uuid::new_v4(),
            name: "History".to_string(),
            code: Some("HIS-101".to_string()),
        };
        let mut grades = vec![
            grade(row.id, course.id, 10, 3.0),
            grade(row.id, course.id, 1, 5.0),
            grade(row.id, course.id, 5, 4.0),
        ];
        grades[0].grade_type = Some("exam".to_string());
        let context = student_course_context(&row, &course, &grades, &[], as_of());
        assert_eq!(context.recent_grades, vec![5.0, 4.0, 3.0]);
        assert_eq!(context.course_code, "HIS-101");
        assert!(context.grade_types.iter().any(|s| s.grade_type == "other" && s.count == 2));
        assert!(context.grade_types.iter().any(|s| s.grade_type == "exam" && s.count == 1));
    }
}
