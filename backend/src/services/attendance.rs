//! Attendance ledger: one outcome per student per calendar day.
//!
//! A `present` or `makeup` row draws one session from the owning enrollment;
//! editing the row away from those statuses, or deleting it, gives it back.
//! The row write and the counter move share one transaction.

use chrono::{NaiveDateTime, NaiveTime};
use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::{
    calendar::{CalendarDay, Clock, SessionMoment},
    db::{is_unique_violation, Db},
    errors::{AppError, AppResult},
    models::{Attendance, AttendanceStatus},
    services::{classes, enrollments},
};

const ATTENDANCE_COLUMNS: &str =
    "id, student_id, enrollment_id, class_id, session_date, status, notes, marked_by, marked_at";

#[derive(Debug, Clone)]
pub struct NewAttendance {
    pub student_id:    String,
    pub enrollment_id: String,
    pub class_id:      Option<String>,
    pub session_date:  String,
    pub status:        AttendanceStatus,
    pub marked_by:     String,
    pub notes:         Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AttendanceChanges {
    pub status:       Option<AttendanceStatus>,
    pub class_id:     Option<String>,
    pub session_date: Option<String>,
    pub notes:        Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AttendanceFilter {
    pub student_id:    Option<String>,
    pub enrollment_id: Option<String>,
    pub class_id:      Option<String>,
}

fn duplicate_day(day: CalendarDay) -> AppError {
    AppError::Conflict(format!("Attendance already recorded for this student on {day}"))
}

/// Resolve a caller-supplied session date to a local wall-clock moment. A bare
/// date takes the class's start time on that weekday, or midnight.
pub(crate) async fn resolve_session(
    conn: &mut SqliteConnection,
    clock: &Clock,
    raw: &str,
    class_id: Option<&str>,
) -> AppResult<NaiveDateTime> {
    let moment = SessionMoment::parse(raw, clock.offset())
        .ok_or_else(|| AppError::BadRequest("sessionDate must be yyyy-mm-dd or an ISO timestamp".into()))?;
    if moment.time.is_some() {
        return Ok(moment.resolve(NaiveTime::MIN));
    }
    let start = match class_id {
        Some(class_id) => classes::start_time_on(conn, class_id, moment.day.day_of_week()).await?,
        None => None,
    };
    Ok(moment.resolve(start.unwrap_or(NaiveTime::MIN)))
}

pub(crate) async fn exists_on(conn: &mut SqliteConnection, student_id: &str, day: CalendarDay) -> AppResult<bool> {
    let found: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM attendance WHERE student_id = ? AND session_day = ?)",
    )
    .bind(student_id)
    .bind(day)
    .fetch_one(conn)
    .await?;
    Ok(found)
}

/// An excused outcome written on the student's behalf by another operation.
pub(crate) struct Excusal<'a> {
    pub student_id:    &'a str,
    pub enrollment_id: &'a str,
    pub class_id:      Option<&'a str>,
    pub session_date:  NaiveDateTime,
    pub notes:         &'a str,
    pub marked_by:     &'a str,
}

/// Insert an excused row unless the day already has an outcome. Returns
/// whether a row was written.
pub(crate) async fn insert_excused_if_absent(
    conn: &mut SqliteConnection,
    excusal: &Excusal<'_>,
    marked_at: NaiveDateTime,
) -> AppResult<bool> {
    let written = sqlx::query(
        "INSERT INTO attendance
            (id, student_id, enrollment_id, class_id, session_date, session_day, status, notes, marked_by, marked_at)
         VALUES (?, ?, ?, ?, ?, ?, 'excused', ?, ?, ?)
         ON CONFLICT (student_id, session_day) DO NOTHING",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(excusal.student_id).bind(excusal.enrollment_id).bind(excusal.class_id)
    .bind(excusal.session_date).bind(CalendarDay::from(excusal.session_date))
    .bind(excusal.notes).bind(excusal.marked_by).bind(marked_at)
    .execute(conn)
    .await?
    .rows_affected();
    Ok(written > 0)
}

async fn fetch(conn: &mut SqliteConnection, id: &str) -> AppResult<Option<Attendance>> {
    let row = sqlx::query_as::<_, Attendance>(&format!(
        "SELECT {ATTENDANCE_COLUMNS} FROM attendance WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(conn)
    .await?;
    Ok(row)
}

pub async fn list(pool: &Db, filter: &AttendanceFilter) -> AppResult<Vec<Attendance>> {
    let rows = sqlx::query_as::<_, Attendance>(&format!(
        "SELECT {ATTENDANCE_COLUMNS} FROM attendance
         WHERE (?1 IS NULL OR student_id = ?1)
           AND (?2 IS NULL OR enrollment_id = ?2)
           AND (?3 IS NULL OR class_id = ?3)
         ORDER BY session_date DESC"
    ))
    .bind(&filter.student_id)
    .bind(&filter.enrollment_id)
    .bind(&filter.class_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn record(pool: &Db, clock: &Clock, new: NewAttendance) -> AppResult<Attendance> {
    let mut tx = pool.begin().await?;

    let enrollment = enrollments::fetch(&mut tx, &new.enrollment_id)
        .await?
        .ok_or(AppError::NotFound)?;
    if enrollment.student_id != new.student_id {
        return Err(AppError::BadRequest("Enrollment does not belong to this student".into()));
    }

    let session_date = resolve_session(&mut tx, clock, &new.session_date, new.class_id.as_deref()).await?;
    let day = CalendarDay::from(session_date);

    let id = Uuid::new_v4().to_string();
    let result = sqlx::query(
        "INSERT INTO attendance
            (id, student_id, enrollment_id, class_id, session_date, session_day, status, notes, marked_by, marked_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id).bind(&new.student_id).bind(&new.enrollment_id).bind(&new.class_id)
    .bind(session_date).bind(day).bind(new.status).bind(&new.notes)
    .bind(&new.marked_by).bind(clock.now())
    .execute(&mut *tx)
    .await;

    match result {
        Ok(_) => {}
        Err(e) if is_unique_violation(&e) => return Err(duplicate_day(day)),
        Err(e) => return Err(e.into()),
    }

    if new.status.consumes_session() {
        enrollments::consume_session(&mut tx, &new.enrollment_id).await?;
    }

    let row = fetch(&mut tx, &id).await?.ok_or(AppError::NotFound)?;
    tx.commit().await?;

    tracing::info!(
        attendance_id = %id,
        student_id = %new.student_id,
        day = %day,
        status = ?new.status,
        "Attendance recorded"
    );
    Ok(row)
}

pub async fn update(pool: &Db, clock: &Clock, id: &str, changes: AttendanceChanges) -> AppResult<Attendance> {
    let mut tx = pool.begin().await?;
    let current = fetch(&mut tx, id).await?.ok_or(AppError::NotFound)?;

    let status = changes.status.unwrap_or(current.status);
    let class_id = changes.class_id.or(current.class_id.clone());
    let notes = changes.notes.or(current.notes.clone());
    let session_date = match &changes.session_date {
        Some(raw) => resolve_session(&mut tx, clock, raw, class_id.as_deref()).await?,
        None => current.session_date,
    };
    let day = CalendarDay::from(session_date);

    let result = sqlx::query(
        "UPDATE attendance
         SET status = ?, class_id = ?, notes = ?, session_date = ?, session_day = ?
         WHERE id = ?",
    )
    .bind(status).bind(&class_id).bind(&notes).bind(session_date).bind(day)
    .bind(id)
    .execute(&mut *tx)
    .await;

    match result {
        Ok(_) => {}
        Err(e) if is_unique_violation(&e) => return Err(duplicate_day(day)),
        Err(e) => return Err(e.into()),
    }

    match (current.status.consumes_session(), status.consumes_session()) {
        (false, true) => enrollments::consume_session(&mut tx, &current.enrollment_id).await?,
        (true, false) => enrollments::refund_session(&mut tx, &current.enrollment_id).await?,
        _ => {}
    }

    let row = fetch(&mut tx, id).await?.ok_or(AppError::NotFound)?;
    tx.commit().await?;

    tracing::info!(attendance_id = %id, from = ?current.status, to = ?status, "Attendance updated");
    Ok(row)
}

pub async fn delete(pool: &Db, id: &str) -> AppResult<()> {
    let mut tx = pool.begin().await?;
    let current = fetch(&mut tx, id).await?.ok_or(AppError::NotFound)?;

    sqlx::query("DELETE FROM attendance WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    if current.status.consumes_session() {
        enrollments::refund_session(&mut tx, &current.enrollment_id).await?;
    }

    tx.commit().await?;
    tracing::info!(attendance_id = %id, refunded = current.status.consumes_session(), "Attendance deleted");
    Ok(())
}
