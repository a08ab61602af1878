use chrono::{Duration, NaiveDate};

use crate::models::{
    AttendanceRecord, GradeRecord, GradeTypeStat, ScopeAggregate, Trend, OTHER_GRADE_TYPE,
};

/// Recent window used for trend detection and most attendance rollups.
pub const RECENT_WINDOW_DAYS: i64 = 30;
/// Outer edge of the "older" comparison window (days 31..=60).
pub const OLDER_WINDOW_DAYS: i64 = 60;
/// Sensitivity band so noise is not reported as a trend.
const TREND_BAND: f64 = 0.3;
/// Minimum recent grades before a trend is computed at all.
const TREND_MIN_RECENT: usize = 5;

pub fn cutoff_date(as_of: NaiveDate, window_days: i64) -> NaiveDate {
    as_of - Duration::days(window_days.max(1))
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Arithmetic mean of all grade values in scope. Empty scope reports 0.0,
/// which callers treat as "no data" rather than a failing grade.
pub fn average_grade(grades: &[GradeRecord]) -> f64 {
    let values: Vec<f64> = grades.iter().map(|g| g.value).collect();
    mean(&values)
}

/// Attendance over `date >= as_of - window_days` as a percentage.
/// Returns (rate, total, present); rate is 0.0 when no records fall in the
/// window.
pub fn attendance_rate(
    attendance: &[AttendanceRecord],
    as_of: NaiveDate,
    window_days: i64,
) -> (f64, usize, usize) {
    let cutoff = cutoff_date(as_of, window_days);
    let mut total = 0usize;
    let mut present = 0usize;
    for record in attendance {
        if record.date < cutoff {
            continue;
        }
        total += 1;
        if record.present {
            present += 1;
        }
    }
    let rate = if total > 0 {
        present as f64 / total as f64 * 100.0
    } else {
        0.0
    };
    (rate, total, present)
}

/// Grade values dated within the last `window_days` of `as_of`, inclusive.
pub fn recent_values(grades: &[GradeRecord], as_of: NaiveDate, window_days: i64) -> Vec<f64> {
    let cutoff = cutoff_date(as_of, window_days);
    grades
        .iter()
        .filter(|g| g.graded_on >= cutoff)
        .map(|g| g.value)
        .collect()
}

/// Grade values in the 31..=60 day band before `as_of`.
pub fn older_values(grades: &[GradeRecord], as_of: NaiveDate) -> Vec<f64> {
    let recent_cutoff = cutoff_date(as_of, RECENT_WINDOW_DAYS);
    let older_cutoff = cutoff_date(as_of, OLDER_WINDOW_DAYS);
    grades
        .iter()
        .filter(|g| g.graded_on < recent_cutoff && g.graded_on >= older_cutoff)
        .map(|g| g.value)
        .collect()
}

/// Compare the last-30-day mean against the 31..=60 day mean. Fewer than
/// five recent grades, or no older grades, yields Stable.
pub fn grade_trend(grades: &[GradeRecord], as_of: NaiveDate) -> Trend {
    let recent = recent_values(grades, as_of, RECENT_WINDOW_DAYS);
    if recent.len() < TREND_MIN_RECENT {
        return Trend::Stable;
    }
    let older = older_values(grades, as_of);
    if older.is_empty() {
        return Trend::Stable;
    }
    banded_trend(mean(&recent), mean(&older))
}

/// Positional trend for a single course: grades ordered newest-first, the
/// first up-to-5 values against the next up-to-5. Needs at least three
/// grades and a non-empty older slice.
pub fn positional_trend(ordered_values: &[f64]) -> Trend {
    if ordered_values.len() < 3 {
        return Trend::Stable;
    }
    let split = ordered_values.len().min(5);
    let recent = &ordered_values[..split];
    let older = &ordered_values[split..ordered_values.len().min(10)];
    if older.is_empty() {
        return Trend::Stable;
    }
    banded_trend(mean(recent), mean(older))
}

fn banded_trend(recent_avg: f64, older_avg: f64) -> Trend {
    if recent_avg > older_avg + TREND_BAND {
        Trend::Improving
    } else if recent_avg < older_avg - TREND_BAND {
        Trend::Declining
    } else {
        Trend::Stable
    }
}

/// Population standard deviation of grades in the last `window_days`.
pub fn grade_stddev(grades: &[GradeRecord], as_of: NaiveDate, window_days: i64) -> f64 {
    let values = recent_values(grades, as_of, window_days);
    if values.is_empty() {
        return 0.0;
    }
    let avg = mean(&values);
    let variance = values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Partition grades by type, nulls landing in the "other" bucket. Buckets
/// come back sorted by count descending, then name, so output is stable.
pub fn grade_type_breakdown(grades: &[GradeRecord]) -> Vec<GradeTypeStat> {
    let mut map: std::collections::HashMap<String, (usize, f64)> = std::collections::HashMap::new();
    for grade in grades {
        let key = grade
            .grade_type
            .clone()
            .unwrap_or_else(|| OTHER_GRADE_TYPE.to_string());
        let entry = map.entry(key).or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 += grade.value;
    }
    let mut stats: Vec<GradeTypeStat> = map
        .into_iter()
        .map(|(grade_type, (count, sum))| GradeTypeStat {
            grade_type,
            average: sum / count as f64,
            count,
        })
        .collect();
    stats.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.grade_type.cmp(&b.grade_type)));
    stats
}

/// Full rollup for one scope: all-time average, windowed attendance, the two
/// trend windows, and the 60-day stddev. Works identically for a single
/// student's records or the union of a group's/teacher's records.
pub fn aggregate(
    grades: &[GradeRecord],
    attendance: &[AttendanceRecord],
    as_of: NaiveDate,
    attendance_window_days: i64,
) -> ScopeAggregate {
    let recent = recent_values(grades, as_of, RECENT_WINDOW_DAYS);
    let older = older_values(grades, as_of);
    let (rate, total, present) = attendance_rate(attendance, as_of, attendance_window_days);
    ScopeAggregate {
        average_grade: average_grade(grades),
        grade_count: grades.len(),
        recent_average: mean(&recent),
        older_average: mean(&older),
        attendance_rate: rate,
        attendance_total: total,
        attendance_present: present,
        grade_stddev: grade_stddev(grades, as_of, OLDER_WINDOW_DAYS),
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
