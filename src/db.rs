use std::collections::HashMap;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{
    AttendanceRecord, CourseRow, GradeRecord, StudentPrediction, StudentRow, TeacherRow,
};
use crate::risk::{self, StudentHistory};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn student_from_row(row: &sqlx::postgres::PgRow) -> StudentRow {
    StudentRow {
        id: row.get("id"),
        full_name: row.get("full_name"),
        email: row.get("email"),
        group_name: row.get("group_name"),
        year: row.get("year"),
    }
}

pub async fn fetch_student(pool: &PgPool, id: Uuid) -> anyhow::Result<Option<StudentRow>> {
    let row = sqlx::query(
        "SELECT id, full_name, email, group_name, year FROM edu_monitor.students WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(student_from_row))
}

pub async fn fetch_student_by_email(
    pool: &PgPool,
    email: &str,
) -> anyhow::Result<Option<StudentRow>> {
    let row = sqlx::query(
        "SELECT id, full_name, email, group_name, year FROM edu_monitor.students WHERE email = $1",
    )
    .bind(email)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(student_from_row))
}

pub async fn fetch_students(pool: &PgPool) -> anyhow::Result<Vec<StudentRow>> {
    let rows = sqlx::query(
        "SELECT id, full_name, email, group_name, year FROM edu_monitor.students ORDER BY full_name",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(student_from_row).collect())
}

pub async fn fetch_teacher(pool: &PgPool, id: Uuid) -> anyhow::Result<Option<TeacherRow>> {
    let row = sqlx::query("SELECT id, full_name, department FROM edu_monitor.teachers WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| TeacherRow {
        id: r.get("id"),
        full_name: r.get("full_name"),
        department: r.get("department"),
    }))
}

pub async fn fetch_teachers(pool: &PgPool) -> anyhow::Result<Vec<TeacherRow>> {
    let rows =
        sqlx::query("SELECT id, full_name, department FROM edu_monitor.teachers ORDER BY full_name")
            .fetch_all(pool)
            .await?;
    Ok(rows
        .into_iter()
        .map(|r| TeacherRow {
            id: r.get("id"),
            full_name: r.get("full_name"),
            department: r.get("department"),
        })
        .collect())
}

pub async fn fetch_course_by_name(pool: &PgPool, name: &str) -> anyhow::Result<Option<CourseRow>> {
    let row = sqlx::query("SELECT id, name, code FROM edu_monitor.courses WHERE name = $1")
        .bind(name)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| CourseRow {
        id: r.get("id"),
        name: r.get("name"),
        code: r.get("code"),
    }))
}

pub async fn fetch_course_names(pool: &PgPool) -> anyhow::Result<HashMap<Uuid, String>> {
    let rows = sqlx::query("SELECT id, name FROM edu_monitor.courses")
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(|r| (r.get("id"), r.get("name"))).collect())
}

pub async fn fetch_all_courses(pool: &PgPool) -> anyhow::Result<Vec<CourseRow>> {
    let rows = sqlx::query("SELECT id, name, code FROM edu_monitor.courses ORDER BY name")
        .fetch_all(pool)
        .await?;
    Ok(rows
        .into_iter()
        .map(|r| CourseRow {
            id: r.get("id"),
            name: r.get("name"),
            code: r.get("code"),
        })
        .collect())
}

pub async fn courses_for_teacher(pool: &PgPool, teacher_id: Uuid) -> anyhow::Result<Vec<CourseRow>> {
    let rows = sqlx::query(
        "SELECT c.id, c.name, c.code FROM edu_monitor.courses c \
         JOIN edu_monitor.course_teachers ct ON ct.course_id = c.id \
         WHERE ct.teacher_id = $1 ORDER BY c.name",
    )
    .bind(teacher_id)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|r| CourseRow {
            id: r.get("id"),
            name: r.get("name"),
            code: r.get("code"),
        })
        .collect())
}

/// (course_id, teacher_id) assignment pairs.
pub async fn fetch_course_teachers(pool: &PgPool) -> anyhow::Result<Vec<(Uuid, Uuid)>> {
    let rows = sqlx::query("SELECT course_id, teacher_id FROM edu_monitor.course_teachers")
        .fetch_all(pool)
        .await?;
    Ok(rows
        .into_iter()
        .map(|r| (r.get("course_id"), r.get("teacher_id")))
        .collect())
}

fn grade_from_row(row: &sqlx::postgres::PgRow) -> GradeRecord {
    GradeRecord {
        student_id: row.get("student_id"),
        course_id: row.get("course_id"),
        value: row.get("value"),
        grade_type: row.get("grade_type"),
        graded_on: row.get("graded_on"),
    }
}

fn attendance_from_row(row: &sqlx::postgres::PgRow) -> AttendanceRecord {
    AttendanceRecord {
        student_id: row.get("student_id"),
        course_id: row.get("course_id"),
        date: row.get("date"),
        present: row.get("present"),
    }
}

pub async fn grades_for(pool: &PgPool, student_ids: &[Uuid]) -> anyhow::Result<Vec<GradeRecord>> {
    let rows = sqlx::query(
        "SELECT student_id, course_id, value, grade_type, graded_on \
         FROM edu_monitor.grades WHERE student_id = ANY($1)",
    )
    .bind(student_ids)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(grade_from_row).collect())
}

pub async fn grades_for_courses(
    pool: &PgPool,
    course_ids: &[Uuid],
) -> anyhow::Result<Vec<GradeRecord>> {
    let rows = sqlx::query(
        "SELECT student_id, course_id, value, grade_type, graded_on \
         FROM edu_monitor.grades WHERE course_id = ANY($1)",
    )
    .bind(course_ids)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(grade_from_row).collect())
}

pub async fn grades_for_student_course(
    pool: &PgPool,
    student_id: Uuid,
    course_id: Uuid,
) -> anyhow::Result<Vec<GradeRecord>> {
    let rows = sqlx::query(
        "SELECT student_id, course_id, value, grade_type, graded_on \
         FROM edu_monitor.grades WHERE student_id = $1 AND course_id = $2",
    )
    .bind(student_id)
    .bind(course_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(grade_from_row).collect())
}

pub async fn fetch_all_grades(pool: &PgPool) -> anyhow::Result<Vec<GradeRecord>> {
    let rows = sqlx::query(
        "SELECT student_id, course_id, value, grade_type, graded_on FROM edu_monitor.grades",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(grade_from_row).collect())
}

pub async fn attendance_for(
    pool: &PgPool,
    student_ids: &[Uuid],
) -> anyhow::Result<Vec<AttendanceRecord>> {
    let rows = sqlx::query(
        "SELECT student_id, course_id, date, present \
         FROM edu_monitor.attendance WHERE student_id = ANY($1)",
    )
    .bind(student_ids)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(attendance_from_row).collect())
}

pub async fn attendance_for_courses(
    pool: &PgPool,
    course_ids: &[Uuid],
) -> anyhow::Result<Vec<AttendanceRecord>> {
    let rows = sqlx::query(
        "SELECT student_id, course_id, date, present \
         FROM edu_monitor.attendance WHERE course_id = ANY($1)",
    )
    .bind(course_ids)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(attendance_from_row).collect())
}

pub async fn attendance_for_student_course(
    pool: &PgPool,
    student_id: Uuid,
    course_id: Uuid,
) -> anyhow::Result<Vec<AttendanceRecord>> {
    let rows = sqlx::query(
        "SELECT student_id, course_id, date, present \
         FROM edu_monitor.attendance WHERE student_id = $1 AND course_id = $2",
    )
    .bind(student_id)
    .bind(course_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(attendance_from_row).collect())
}

pub async fn fetch_all_attendance(pool: &PgPool) -> anyhow::Result<Vec<AttendanceRecord>> {
    let rows =
        sqlx::query("SELECT student_id, course_id, date, present FROM edu_monitor.attendance")
            .fetch_all(pool)
            .await?;
    Ok(rows.iter().map(attendance_from_row).collect())
}

/// Group labels for a set of students, keyed by id.
pub async fn student_groups(
    pool: &PgPool,
    student_ids: &[Uuid],
) -> anyhow::Result<HashMap<Uuid, Option<String>>> {
    let rows = sqlx::query("SELECT id, group_name FROM edu_monitor.students WHERE id = ANY($1)")
        .bind(student_ids)
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(|r| (r.get("id"), r.get("group_name"))).collect())
}

/// Fetch everything the scorer needs in one pass. An unknown id yields a
/// history with `exists = false` and empty record sets.
pub async fn load_student_history(pool: &PgPool, student_id: Uuid) -> anyhow::Result<StudentHistory> {
    let student = fetch_student(pool, student_id).await?;
    if student.is_none() {
        return Ok(StudentHistory::default());
    }
    let ids = [student_id];
    Ok(StudentHistory {
        exists: true,
        grades: grades_for(pool, &ids).await?,
        attendance: attendance_for(pool, &ids).await?,
    })
}

/// Recompute and persist the three prediction scalars for one student.
/// Full replace: prior rows go away and exactly one new row lands, inside a
/// transaction so readers never observe zero or duplicate rows.
pub async fn refresh_predictions(
    pool: &PgPool,
    student_id: Uuid,
    as_of: NaiveDate,
) -> anyhow::Result<StudentPrediction> {
    let history = load_student_history(pool, student_id).await?;
    let prediction = StudentPrediction {
        student_id,
        burnout_risk: risk::burnout_risk(&history, as_of),
        success_probability: risk::success_probability(&history, as_of),
        predicted_gpa: risk::predict_gpa(&history, as_of),
        calculated_at: Utc::now(),
    };

    let mut tx = pool.begin().await.context("failed to open transaction")?;
    sqlx::query("DELETE FROM edu_monitor.student_predictions WHERE student_id = $1")
        .bind(student_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query(
        "INSERT INTO edu_monitor.student_predictions \
         (student_id, burnout_risk, success_probability, predicted_gpa, calculated_at) \
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(prediction.student_id)
    .bind(prediction.burnout_risk)
    .bind(prediction.success_probability)
    .bind(prediction.predicted_gpa)
    .bind(prediction.calculated_at)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    Ok(prediction)
}

async fn upsert_student(
    pool: &PgPool,
    full_name: &str,
    email: &str,
    group_name: Option<&str>,
    year: Option<i32>,
) -> anyhow::Result<Uuid> {
    let id: Uuid = sqlx::query(
        "INSERT INTO edu_monitor.students (id, full_name, email, group_name, year) \
         VALUES ($1, $2, $3, $4, $5) \
         ON CONFLICT (email) DO UPDATE \
         SET full_name = EXCLUDED.full_name, group_name = EXCLUDED.group_name, \
             year = EXCLUDED.year \
         RETURNING id",
    )
    .bind(Uuid::new_v4())
    .bind(full_name)
    .bind(email)
    .bind(group_name)
    .bind(year)
    .fetch_one(pool)
    .await?
    .get("id");
    Ok(id)
}

async fn upsert_course(pool: &PgPool, name: &str, code: Option<&str>) -> anyhow::Result<Uuid> {
    let id: Uuid = sqlx::query(
        "INSERT INTO edu_monitor.courses (id, name, code) VALUES ($1, $2, $3) \
         ON CONFLICT (name) DO UPDATE SET code = COALESCE(EXCLUDED.code, edu_monitor.courses.code) \
         RETURNING id",
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(code)
    .fetch_one(pool)
    .await?
    .get("id");
    Ok(id)
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let students = vec![
        ("Avery Lee", "avery.lee@edu-monitor.example", Some("CS-21"), Some(2)),
        ("Jules Moreno", "jules.moreno@edu-monitor.example", Some("CS-21"), Some(2)),
        ("Kiara Patel", "kiara.patel@edu-monitor.example", Some("MA-19"), Some(3)),
    ];
    let mut student_ids = Vec::new();
    for (name, email, group, year) in students {
        student_ids.push(upsert_student(pool, name, email, group, year).await?);
    }

    let teacher_id: Uuid = sqlx::query(
        "INSERT INTO edu_monitor.teachers (id, full_name, department) VALUES ($1, $2, $3) \
         ON CONFLICT (id) DO UPDATE \
         SET full_name = EXCLUDED.full_name, department = EXCLUDED.department \
         RETURNING id",
    )
    .bind(Uuid::parse_str("7f3a2c44-6f09-4a7e-9a43-5f2d9b1c8e01")?)
    .bind("Prof. N. Okafor")
    .bind("Mathematics")
    .fetch_one(pool)
    .await?
    .get("id");

    let course_id = upsert_course(pool, "Linear Algebra", Some("MA-201")).await?;
    sqlx::query(
        "INSERT INTO edu_monitor.course_teachers (course_id, teacher_id) VALUES ($1, $2) \
         ON CONFLICT DO NOTHING",
    )
    .bind(course_id)
    .bind(teacher_id)
    .execute(pool)
    .await?;

    let today = Utc::now().date_naive();
    let seed_grades = vec![
        ("seed-g-001", student_ids[0], 4.5, Some("exam"), 3i64),
        ("seed-g-002", student_ids[0], 5.0, Some("homework"), 10),
        ("seed-g-003", student_ids[1], 3.0, Some("test"), 5),
        ("seed-g-004", student_ids[1], 2.5, None, 40),
        ("seed-g-005", student_ids[2], 4.0, Some("coursework"), 7),
    ];
    for (key, student_id, value, grade_type, days_ago) in seed_grades {
        sqlx::query(
            "INSERT INTO edu_monitor.grades \
             (id, student_id, course_id, value, grade_type, graded_on, source_key) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (source_key) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(student_id)
        .bind(course_id)
        .bind(value)
        .bind(grade_type)
        .bind(today - chrono::Duration::days(days_ago))
        .bind(key)
        .execute(pool)
        .await?;
    }

    for (i, student_id) in student_ids.iter().enumerate() {
        for day in 0..10i64 {
            let present = !(i == 1 && day % 2 == 0);
            sqlx::query(
                "INSERT INTO edu_monitor.attendance \
                 (id, student_id, course_id, date, present, source_key) \
                 VALUES ($1, $2, $3, $4, $5, $6) \
                 ON CONFLICT (source_key) DO NOTHING",
            )
            .bind(Uuid::new_v4())
            .bind(student_id)
            .bind(course_id)
            .bind(today - chrono::Duration::days(day))
            .bind(present)
            .bind(format!("seed-a-{i}-{day}"))
            .execute(pool)
            .await?;
        }
    }

    Ok(())
}

pub async fn import_grades_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        full_name: String,
        email: String,
        group_name: Option<String>,
        course: String,
        course_code: Option<String>,
        value: f64,
        grade_type: Option<String>,
        graded_on: NaiveDate,
        source_key: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut inserted = 0usize;

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        let student_id =
            upsert_student(pool, &row.full_name, &row.email, row.group_name.as_deref(), None)
                .await?;
        let course_id = upsert_course(pool, &row.course, row.course_code.as_deref()).await?;
        let source_key = row
            .source_key
            .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));

        let result = sqlx::query(
            "INSERT INTO edu_monitor.grades \
             (id, student_id, course_id, value, grade_type, graded_on, source_key) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (source_key) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(student_id)
        .bind(course_id)
        .bind(row.value)
        .bind(&row.grade_type)
        .bind(row.graded_on)
        .bind(source_key)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            inserted += 1;
        }
    }

    Ok(inserted)
}

pub async fn import_attendance_csv(
    pool: &PgPool,
    csv_path: &std::path::Path,
) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        full_name: String,
        email: String,
        group_name: Option<String>,
        course: Option<String>,
        date: NaiveDate,
        present: bool,
        source_key: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut inserted = 0usize;

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        let student_id =
            upsert_student(pool, &row.full_name, &row.email, row.group_name.as_deref(), None)
                .await?;
        let course_id = match row.course.as_deref() {
            Some(name) => Some(upsert_course(pool, name, None).await?),
            None => None,
        };
        let source_key = row
            .source_key
            .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));

        let result = sqlx::query(
            "INSERT INTO edu_monitor.attendance \
             (id, student_id, course_id, date, present, source_key) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (source_key) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(student_id)
        .bind(course_id)
        .bind(row.date)
        .bind(row.present)
        .bind(source_key)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            inserted += 1;
        }
    }

    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[sqlx::test(migrations = "./migrations")]
    async fn refresh_twice_leaves_one_prediction_row(pool: PgPool) -> anyhow::Result<()> {
        let student_id = upsert_student(
            &pool,
            "Rio Sato",
            "rio.sato@edu-monitor.example",
            Some("CS-21"),
            Some(2),
        )
        .await?;
        let as_of = Utc::now().date_naive();

        refresh_predictions(&pool, student_id, as_of).await?;
        let second = refresh_predictions(&pool, student_id, as_of).await?;

        let n: i64 = sqlx::query(
            "SELECT count(*) AS n FROM edu_monitor.student_predictions WHERE student_id = $1",
        )
        .bind(student_id)
        .fetch_one(&pool)
        .await?
        .get("n");
        assert_eq!(n, 1);

        // Known student, no records yet: placeholder GPA, zero burnout.
        assert_eq!(second.predicted_gpa, 3.5);
        assert_eq!(second.burnout_risk, 0.0);
        Ok(())
    }
}
