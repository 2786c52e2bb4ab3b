//! Planned absences. Requests are approved on creation and leave an excused
//! attendance row behind for the day.

use chrono::{Duration, NaiveDateTime};
use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::{
    calendar::{CalendarDay, Clock},
    db::{is_unique_violation, Db},
    errors::{AppError, AppResult},
    models::AbsenceRequest,
    services::{attendance, enrollments},
};

const ABSENCE_COLUMNS: &str =
    "id, student_id, enrollment_id, class_id, session_date, reason, status, requested_at";

#[derive(Debug, Clone)]
pub struct NewAbsence {
    pub student_id:        String,
    pub enrollment_id:     String,
    pub class_id:          Option<String>,
    pub session_date:      String,
    pub reason:            String,
    pub marked_by_teacher: bool,
}

pub(crate) async fn exists_on(conn: &mut SqliteConnection, student_id: &str, day: CalendarDay) -> AppResult<bool> {
    let found: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM absence_requests WHERE student_id = ? AND session_day = ?)",
    )
    .bind(student_id)
    .bind(day)
    .fetch_one(conn)
    .await?;
    Ok(found)
}

/// Insert an approved absence unless one already covers the day. Returns
/// whether a row was written.
pub(crate) async fn insert_approved_if_absent(
    conn: &mut SqliteConnection,
    student_id: &str,
    enrollment_id: &str,
    class_id: Option<&str>,
    session_date: NaiveDateTime,
    reason: &str,
    requested_at: NaiveDateTime,
) -> AppResult<bool> {
    let written = sqlx::query(
        "INSERT INTO absence_requests
            (id, student_id, enrollment_id, class_id, session_date, session_day, reason, status, requested_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, 'approved', ?)
         ON CONFLICT (student_id, session_day) DO NOTHING",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(student_id).bind(enrollment_id).bind(class_id)
    .bind(session_date).bind(CalendarDay::from(session_date))
    .bind(reason).bind(requested_at)
    .execute(conn)
    .await?
    .rows_affected();
    Ok(written > 0)
}

pub async fn list(pool: &Db, student_id: Option<&str>) -> AppResult<Vec<AbsenceRequest>> {
    let rows = sqlx::query_as::<_, AbsenceRequest>(&format!(
        "SELECT {ABSENCE_COLUMNS} FROM absence_requests
         WHERE (?1 IS NULL OR student_id = ?1)
         ORDER BY session_date DESC"
    ))
    .bind(student_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn create(pool: &Db, clock: &Clock, lead_hours: i64, new: NewAbsence) -> AppResult<AbsenceRequest> {
    let mut tx = pool.begin().await?;

    let enrollment = enrollments::fetch(&mut tx, &new.enrollment_id)
        .await?
        .ok_or(AppError::NotFound)?;
    if enrollment.student_id != new.student_id {
        return Err(AppError::BadRequest("Enrollment does not belong to this student".into()));
    }

    let session_date =
        attendance::resolve_session(&mut tx, clock, &new.session_date, new.class_id.as_deref()).await?;
    let now = clock.now();

    if !new.marked_by_teacher && session_date < now + Duration::hours(lead_hours) {
        return Err(AppError::BadRequest(format!(
            "Absences must be requested at least {lead_hours} hours before the session"
        )));
    }

    let day = CalendarDay::from(session_date);
    let id = Uuid::new_v4().to_string();
    let result = sqlx::query(
        "INSERT INTO absence_requests
            (id, student_id, enrollment_id, class_id, session_date, session_day, reason, status, requested_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, 'approved', ?)",
    )
    .bind(&id).bind(&new.student_id).bind(&new.enrollment_id).bind(&new.class_id)
    .bind(session_date).bind(day).bind(&new.reason).bind(now)
    .execute(&mut *tx)
    .await;

    match result {
        Ok(_) => {}
        Err(e) if is_unique_violation(&e) => {
            return Err(AppError::Conflict(format!("An absence is already recorded for {day}")));
        }
        Err(e) => return Err(e.into()),
    }

    let companion = attendance::insert_excused_if_absent(
        &mut tx,
        &attendance::Excusal {
            student_id:    &new.student_id,
            enrollment_id: &new.enrollment_id,
            class_id:      new.class_id.as_deref(),
            session_date,
            notes:         &new.reason,
            marked_by:     &new.student_id,
        },
        now,
    )
    .await?;

    let row = sqlx::query_as::<_, AbsenceRequest>(&format!(
        "SELECT {ABSENCE_COLUMNS} FROM absence_requests WHERE id = ?"
    ))
    .bind(&id)
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;

    tracing::info!(
        absence_id = %id,
        student_id = %new.student_id,
        day = %day,
        marked_by_teacher = new.marked_by_teacher,
        companion_attendance = companion,
        "Absence approved"
    );
    Ok(row)
}
