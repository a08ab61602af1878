use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{ArgGroup, Parser, Subcommand, ValueEnum};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

mod advisor;
mod db;
mod metrics;
mod models;
mod ranking;
mod risk;

use advisor::AdvisorMode;
use models::{EntityKind, StudentRow};

#[derive(Parser)]
#[command(name = "edu-monitor-analytics")]
#[command(about = "Derived-metrics and risk-scoring engine for the education monitoring backend", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProblemKind {
    Students,
    Groups,
    Teachers,
}

#[derive(Clone, Copy, ValueEnum)]
enum AdvisorBackend {
    Template,
    External,
}

impl From<AdvisorBackend> for AdvisorMode {
    fn from(backend: AdvisorBackend) -> Self {
        match backend {
            AdvisorBackend::Template => AdvisorMode::Template,
            AdvisorBackend::External => AdvisorMode::External,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import grade or attendance rows from a CSV file
    #[command(group(
        ArgGroup::new("source")
            .args(["grades", "attendance"])
            .required(true)
            .multiple(false)
    ))]
    Import {
        #[arg(long)]
        grades: Option<PathBuf>,
        #[arg(long)]
        attendance: Option<PathBuf>,
    },
    /// Compute the three risk scalars for one student without persisting
    #[command(group(
        ArgGroup::new("who")
            .args(["id", "email"])
            .required(true)
            .multiple(false)
    ))]
    Predict {
        #[arg(long)]
        id: Option<Uuid>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Recompute and persist a student's prediction row (full replace)
    #[command(group(
        ArgGroup::new("who")
            .args(["id", "email"])
            .required(true)
            .multiple(false)
    ))]
    Refresh {
        #[arg(long)]
        id: Option<Uuid>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Print the full metric rollup for one student
    #[command(group(
        ArgGroup::new("who")
            .args(["id", "email"])
            .required(true)
            .multiple(false)
    ))]
    Stats {
        #[arg(long)]
        id: Option<Uuid>,
        #[arg(long)]
        email: Option<String>,
        /// Attendance window in days
        #[arg(long, default_value_t = 30)]
        window: i64,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Rank problem students, groups, or teachers
    Problems {
        #[arg(long, value_enum)]
        kind: ProblemKind,
        #[arg(long, default_value_t = 20)]
        top: usize,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Render an advisory report for a student
    #[command(group(
        ArgGroup::new("who")
            .args(["id", "email"])
            .required(true)
            .multiple(false)
    ))]
    AdviseStudent {
        #[arg(long)]
        id: Option<Uuid>,
        #[arg(long)]
        email: Option<String>,
        /// Limit the advisory to a single course by name
        #[arg(long)]
        course: Option<String>,
        /// Advisory backend; only the template backend is wired in
        #[arg(long, value_enum, default_value_t = AdvisorBackend::Template)]
        advisor: AdvisorBackend,
    },
    /// Render an advisory report for a teacher, with per-group rankings
    AdviseTeacher {
        #[arg(long)]
        id: Uuid,
        #[arg(long, value_enum, default_value_t = AdvisorBackend::Template)]
        advisor: AdvisorBackend,
    },
    /// Render the admin-level problem-area report
    AdviseAdmin {
        #[arg(long, value_enum, default_value_t = AdvisorBackend::Template)]
        advisor: AdvisorBackend,
    },
    /// Print whole-system rollup stats
    Overview {
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    let as_of = Utc::now().date_naive();

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { grades, attendance } => {
            if let Some(path) = grades {
                let inserted = db::import_grades_csv(&pool, &path).await?;
                println!("Inserted {inserted} grades from {}.", path.display());
            } else if let Some(path) = attendance {
                let inserted = db::import_attendance_csv(&pool, &path).await?;
                println!("Inserted {inserted} attendance records from {}.", path.display());
            }
        }
        Commands::Predict { id, email, json } => {
            let student_id = resolve_student_id(&pool, id, email.as_deref()).await?;
            let history = db::load_student_history(&pool, student_id).await?;
            let burnout = risk::burnout_risk(&history, as_of);
            let success = risk::success_probability(&history, as_of);
            let gpa = risk::predict_gpa(&history, as_of);
            if json {
                println!(
                    "{}",
                    serde_json::json!({
                        "student_id": student_id,
                        "burnout_risk": burnout,
                        "success_probability": success,
                        "predicted_gpa": gpa,
                    })
                );
            } else {
                println!("Burnout risk: {burnout:.2}");
                println!("Success probability: {success:.2}");
                println!("Predicted GPA: {gpa:.2}");
            }
        }
        Commands::Refresh { id, email, json } => {
            let student_id = resolve_student_id(&pool, id, email.as_deref()).await?;
            let prediction = db::refresh_predictions(&pool, student_id, as_of).await?;
            if json {
                println!("{}", serde_json::to_string(&prediction)?);
            } else {
                println!(
                    "Stored prediction for {student_id}: burnout {:.2}, success {:.2}, GPA {:.2}",
                    prediction.burnout_risk,
                    prediction.success_probability,
                    prediction.predicted_gpa
                );
            }
        }
        Commands::Stats { id, email, window, json } => {
            let student = resolve_student(&pool, id, email.as_deref()).await?;
            let ids = [student.id];
            let grades = db::grades_for(&pool, &ids).await?;
            let attendance = db::attendance_for(&pool, &ids).await?;
            let aggregate = metrics::aggregate(&grades, &attendance, as_of, window);
            let trend = metrics::grade_trend(&grades, as_of);
            if json {
                let mut value = serde_json::to_value(&aggregate)?;
                if let Some(map) = value.as_object_mut() {
                    map.insert("trend".to_string(), serde_json::to_value(trend)?);
                }
                println!("{value}");
            } else {
                let group = student.group_name.as_deref().unwrap_or(models::NO_GROUP);
                println!("{} <{}>, {}", student.full_name, student.email, group);
                println!("Average grade: {:.2} ({} grades)", aggregate.average_grade, aggregate.grade_count);
                println!(
                    "Attendance ({window} days): {:.1}% ({}/{})",
                    aggregate.attendance_rate,
                    aggregate.attendance_present,
                    aggregate.attendance_total
                );
                println!(
                    "Recent vs older average: {:.2} / {:.2} (trend {})",
                    aggregate.recent_average,
                    aggregate.older_average,
                    trend.label()
                );
                println!("Grade stddev (60 days): {:.2}", aggregate.grade_stddev);
            }
        }
        Commands::Problems { kind, top, json } => {
            let students = db::fetch_students(&pool).await?;
            let grades = db::fetch_all_grades(&pool).await?;
            let attendance = db::fetch_all_attendance(&pool).await?;

            let candidates = match kind {
                ProblemKind::Students => {
                    advisor::student_candidates(&students, &grades, &attendance, as_of)
                }
                ProblemKind::Groups => {
                    advisor::group_candidates(&students, &grades, &attendance, as_of)
                }
                ProblemKind::Teachers => {
                    let teachers = db::fetch_teachers(&pool).await?;
                    let course_teachers = db::fetch_course_teachers(&pool).await?;
                    advisor::teacher_candidates(
                        &teachers,
                        &course_teachers,
                        &grades,
                        &attendance,
                        as_of,
                    )
                }
            };
            let ranked = ranking::rank_plain(&candidates, top);

            if json {
                println!("{}", serde_json::to_string(&ranked)?);
            } else if ranked.is_empty() {
                println!("No problem entities found.");
            } else {
                for entity in &ranked {
                    let population = match entity.kind {
                        EntityKind::Student => String::new(),
                        EntityKind::Group => format!(", {} students", entity.population),
                        EntityKind::Teacher => format!(", {} courses", entity.population),
                    };
                    println!(
                        "- {} (avg {:.2}, attendance {:.1}%{})",
                        entity.label, entity.average_grade, entity.attendance_rate, population
                    );
                }
            }
        }
        Commands::AdviseStudent { id, email, course, advisor } => {
            let mode = AdvisorMode::from(advisor);
            let student = resolve_student(&pool, id, email.as_deref()).await?;
            let advice = match course {
                Some(course_name) => {
                    let course = db::fetch_course_by_name(&pool, &course_name)
                        .await?
                        .with_context(|| format!("no course named {course_name}"))?;
                    let grades =
                        db::grades_for_student_course(&pool, student.id, course.id).await?;
                    let attendance =
                        db::attendance_for_student_course(&pool, student.id, course.id).await?;
                    let context = advisor::student_course_context(
                        &student,
                        &course,
                        &grades,
                        &attendance,
                        as_of,
                    );
                    advisor::render_student_course_advice(mode, &context)?
                }
                None => {
                    let ids = [student.id];
                    let grades = db::grades_for(&pool, &ids).await?;
                    let attendance = db::attendance_for(&pool, &ids).await?;
                    let course_names = db::fetch_course_names(&pool).await?;
                    let context = advisor::student_context(
                        &student,
                        &grades,
                        &attendance,
                        &course_names,
                        as_of,
                    );
                    advisor::render_student_advice(mode, &context)?
                }
            };
            println!("{advice}");
        }
        Commands::AdviseTeacher { id, advisor } => {
            let teacher = db::fetch_teacher(&pool, id)
                .await?
                .with_context(|| format!("no teacher with id {id}"))?;
            let courses = db::courses_for_teacher(&pool, id).await?;
            let course_ids: Vec<Uuid> = courses.iter().map(|c| c.id).collect();
            let grades = db::grades_for_courses(&pool, &course_ids).await?;
            let attendance = db::attendance_for_courses(&pool, &course_ids).await?;

            let mut course_grades: HashMap<Uuid, Vec<models::GradeRecord>> = HashMap::new();
            for grade in grades {
                course_grades.entry(grade.course_id).or_default().push(grade);
            }
            let mut course_attendance: HashMap<Uuid, Vec<models::AttendanceRecord>> =
                HashMap::new();
            for record in attendance {
                if let Some(course_id) = record.course_id {
                    course_attendance.entry(course_id).or_default().push(record);
                }
            }
            let student_ids: Vec<Uuid> = course_grades
                .values()
                .flatten()
                .map(|g| g.student_id)
                .collect();
            let student_groups = db::student_groups(&pool, &student_ids).await?;

            let context = advisor::teacher_context(
                &teacher,
                &courses,
                &course_grades,
                &course_attendance,
                &student_groups,
                as_of,
            );
            println!(
                "{}",
                advisor::render_teacher_advice(AdvisorMode::from(advisor), &context)?
            );
        }
        Commands::AdviseAdmin { advisor } => {
            let context = build_admin_context(&pool, as_of).await?;
            println!(
                "{}",
                advisor::render_admin_advice(AdvisorMode::from(advisor), &context)?
            );
        }
        Commands::Overview { json } => {
            let context = build_admin_context(&pool, as_of).await?;
            if json {
                println!(
                    "{}",
                    serde_json::json!({
                        "total_students": context.total_students,
                        "total_teachers": context.total_teachers,
                        "total_courses": context.total_courses,
                        "overall_average_grade": context.overall_average_grade,
                        "overall_attendance_rate": context.overall_attendance_rate,
                        "problem_students": context.problem_students_count,
                        "problem_groups": context.problem_groups_count,
                        "problem_teachers": context.problem_teachers_count,
                    })
                );
            } else {
                println!("Students: {}", context.total_students);
                println!("Teachers: {}", context.total_teachers);
                println!("Courses: {}", context.total_courses);
                println!("Overall average grade: {:.2}", context.overall_average_grade);
                println!(
                    "Overall attendance (30 days): {:.1}%",
                    context.overall_attendance_rate
                );
                println!(
                    "Problem students/groups/teachers: {}/{}/{}",
                    context.problem_students_count,
                    context.problem_groups_count,
                    context.problem_teachers_count
                );
            }
        }
    }

    Ok(())
}

async fn build_admin_context(
    pool: &PgPool,
    as_of: chrono::NaiveDate,
) -> anyhow::Result<advisor::AdminContext> {
    let students = db::fetch_students(pool).await?;
    let teachers = db::fetch_teachers(pool).await?;
    let courses = db::fetch_all_courses(pool).await?;
    let course_teachers = db::fetch_course_teachers(pool).await?;
    let grades = db::fetch_all_grades(pool).await?;
    let attendance = db::fetch_all_attendance(pool).await?;
    Ok(advisor::admin_context(
        &students,
        &teachers,
        &courses,
        &course_teachers,
        &grades,
        &attendance,
        as_of,
    ))
}

async fn resolve_student(
    pool: &PgPool,
    id: Option<Uuid>,
    email: Option<&str>,
) -> anyhow::Result<StudentRow> {
    let student = match (id, email) {
        (Some(id), _) => db::fetch_student(pool, id).await?,
        (None, Some(email)) => db::fetch_student_by_email(pool, email).await?,
        (None, None) => bail!("either --id or --email is required"),
    };
    student.context("student not found")
}

/// Unlike `resolve_student`, an unknown --id passes through untouched: the
/// scorer owns the unknown-student defaults, so lookups must not fail here.
async fn resolve_student_id(
    pool: &PgPool,
    id: Option<Uuid>,
    email: Option<&str>,
) -> anyhow::Result<Uuid> {
    match (id, email) {
        (Some(id), _) => Ok(id),
        (None, Some(email)) => Ok(db::fetch_student_by_email(pool, email)
            .await?
            .with_context(|| format!("no student with email {email}"))?
            .id),
        (None, None) => bail!("either --id or --email is required"),
    }
}
