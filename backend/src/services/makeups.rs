//! Makeup sessions: a one-time seat in another class that stands in for a
//! missed or cancelled one. A makeup never changes the target class roster.

use std::collections::HashSet;

use chrono::{Duration, NaiveDateTime};
use serde::Serialize;
use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::{
    calendar::{next_occurrence, parse_clock_time, CalendarDay, Clock},
    db::Db,
    errors::{AppError, AppResult},
    models::{ClassRow, MakeupRequest, RequestStatus},
    services::{attendance, classes, enrollments},
};

const MAKEUP_COLUMNS: &str =
    "id, student_id, enrollment_id, original_class_id, original_session_date,
     new_class_id, new_session_date, reason, status, requested_at";

#[derive(Debug, Clone)]
pub struct NewMakeup {
    pub student_id:            String,
    pub enrollment_id:         String,
    pub original_class_id:     Option<String>,
    pub original_session_date: String,
    pub new_class_id:          Option<String>,
    pub new_session_date:      String,
    pub reason:                String,
}

#[derive(Debug, Clone, Default)]
pub struct MakeupFilter {
    pub student_id: Option<String>,
    pub status:     Option<RequestStatus>,
}

/// A class a student could attend as a makeup, with its next usable session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableSlot {
    #[serde(flatten)]
    pub class:          ClassRow,
    pub next_session:   NaiveDateTime,
    pub enrolled_count: i64,
}

async fn fetch(conn: &mut SqliteConnection, id: &str) -> AppResult<Option<MakeupRequest>> {
    let row = sqlx::query_as::<_, MakeupRequest>(&format!(
        "SELECT {MAKEUP_COLUMNS} FROM makeup_requests WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(conn)
    .await?;
    Ok(row)
}

pub async fn get(pool: &Db, id: &str) -> AppResult<MakeupRequest> {
    let mut conn = pool.acquire().await?;
    fetch(&mut conn, id).await?.ok_or(AppError::NotFound)
}

pub async fn list(pool: &Db, filter: &MakeupFilter) -> AppResult<Vec<MakeupRequest>> {
    let rows = sqlx::query_as::<_, MakeupRequest>(&format!(
        "SELECT {MAKEUP_COLUMNS} FROM makeup_requests
         WHERE (?1 IS NULL OR student_id = ?1)
           AND (?2 IS NULL OR status = ?2)
         ORDER BY new_session_date"
    ))
    .bind(&filter.student_id)
    .bind(filter.status)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Check the replacement session: far enough out and, when a class is named,
/// an existing class with a free seat.
async fn check_target(
    conn: &mut SqliteConnection,
    clock: &Clock,
    lead_hours: i64,
    new_class_id: Option<&str>,
    raw_date: &str,
) -> AppResult<NaiveDateTime> {
    if let Some(class_id) = new_class_id {
        let class = classes::fetch_row(&mut *conn, class_id).await?.ok_or(AppError::NotFound)?;
        if !class.is_active {
            return Err(AppError::Conflict("Target class is not active".into()));
        }
        if classes::enrolled_count(&mut *conn, class_id).await? >= class.max_students {
            return Err(AppError::Conflict("Target class is full".into()));
        }
    }

    let new_session_date = attendance::resolve_session(conn, clock, raw_date, new_class_id).await?;
    if new_session_date < clock.now() + Duration::hours(lead_hours) {
        return Err(AppError::BadRequest(format!(
            "Makeup sessions must be booked at least {lead_hours} hours in advance"
        )));
    }
    Ok(new_session_date)
}

pub async fn create(pool: &Db, clock: &Clock, lead_hours: i64, new: NewMakeup) -> AppResult<MakeupRequest> {
    let mut tx = pool.begin().await?;

    let enrollment = enrollments::fetch(&mut tx, &new.enrollment_id)
        .await?
        .ok_or(AppError::NotFound)?;
    if enrollment.student_id != new.student_id {
        return Err(AppError::BadRequest("Enrollment does not belong to this student".into()));
    }

    let original_session_date = attendance::resolve_session(
        &mut tx,
        clock,
        &new.original_session_date,
        new.original_class_id.as_deref(),
    )
    .await?;
    let new_session_date =
        check_target(&mut tx, clock, lead_hours, new.new_class_id.as_deref(), &new.new_session_date).await?;

    let id = Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO makeup_requests
            (id, student_id, enrollment_id, original_class_id, original_session_date,
             new_class_id, new_session_date, new_session_day, reason, status, requested_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 'approved', ?)",
    )
    .bind(&id).bind(&new.student_id).bind(&new.enrollment_id)
    .bind(&new.original_class_id).bind(original_session_date)
    .bind(&new.new_class_id).bind(new_session_date).bind(CalendarDay::from(new_session_date))
    .bind(&new.reason).bind(clock.now())
    .execute(&mut *tx)
    .await?;

    let row = fetch(&mut tx, &id).await?.ok_or(AppError::NotFound)?;
    tx.commit().await?;

    tracing::info!(
        makeup_id = %id,
        student_id = %new.student_id,
        new_class_id = ?new.new_class_id,
        new_session_date = %new_session_date,
        "Makeup approved"
    );
    Ok(row)
}

/// Turn a pending cancellation placeholder into a booked makeup.
pub async fn schedule_pending(
    pool: &Db,
    clock: &Clock,
    lead_hours: i64,
    id: &str,
    new_class_id: Option<&str>,
    new_session_date: &str,
) -> AppResult<MakeupRequest> {
    let mut tx = pool.begin().await?;
    let current = fetch(&mut tx, id).await?.ok_or(AppError::NotFound)?;
    if current.status != RequestStatus::Pending {
        return Err(AppError::Conflict("Makeup request is already scheduled".into()));
    }

    let when = check_target(&mut tx, clock, lead_hours, new_class_id, new_session_date).await?;

    sqlx::query(
        "UPDATE makeup_requests
         SET new_class_id = ?, new_session_date = ?, new_session_day = ?, status = 'approved'
         WHERE id = ?",
    )
    .bind(new_class_id)
    .bind(when)
    .bind(CalendarDay::from(when))
    .bind(id)
    .execute(&mut *tx)
    .await?;

    let row = fetch(&mut tx, id).await?.ok_or(AppError::NotFound)?;
    tx.commit().await?;

    tracing::info!(makeup_id = %id, new_class_id = ?new_class_id, new_session_date = %when, "Makeup scheduled");
    Ok(row)
}

/// Active classes of the enrollment's course with a free seat whose next
/// session is at least `lead_hours` away, soonest first. A class whose next
/// session falls inside the notice window is left out, as are classes the
/// student already attends.
pub async fn available_slots(
    pool: &Db,
    clock: &Clock,
    lead_hours: i64,
    enrollment_id: &str,
) -> AppResult<Vec<AvailableSlot>> {
    let mut conn = pool.acquire().await?;
    let enrollment = enrollments::fetch(&mut conn, enrollment_id)
        .await?
        .ok_or(AppError::NotFound)?;

    let candidates = sqlx::query_as::<_, ClassRow>(
        "SELECT c.id, c.name, c.grade, c.course_id, c.teacher_id, c.max_students, c.is_active
         FROM classes c
         WHERE c.course_id = ?
           AND c.is_active = 1
           AND NOT EXISTS (
               SELECT 1 FROM class_students cs WHERE cs.class_id = c.id AND cs.student_id = ?
           )",
    )
    .bind(&enrollment.course_id)
    .bind(&enrollment.student_id)
    .fetch_all(&mut *conn)
    .await?;

    let now = clock.now();
    let earliest_allowed = now + Duration::hours(lead_hours);
    let mut slots = Vec::new();

    for class in candidates {
        let enrolled_count = classes::enrolled_count(&mut conn, &class.id).await?;
        if enrolled_count >= class.max_students {
            continue;
        }

        let cancelled: HashSet<CalendarDay> =
            classes::cancelled_dates(&mut conn, &class.id).await?.into_iter().collect();
        let next_session = classes::sessions(&mut conn, &class.id)
            .await?
            .iter()
            .filter_map(|s| {
                let dow = u8::try_from(s.day_of_week).ok()?;
                let start = parse_clock_time(&s.start_time)?;
                next_occurrence(now, dow, start, &cancelled)
            })
            .min();

        match next_session {
            Some(next_session) if next_session >= earliest_allowed => {
                slots.push(AvailableSlot { class, next_session, enrolled_count });
            }
            _ => {}
        }
    }

    slots.sort_by_key(|s| s.next_session);
    Ok(slots)
}

/// Target of a cancellation placeholder: the same slot one week later.
pub fn placeholder_target(original: NaiveDateTime) -> NaiveDateTime {
    original + Duration::days(7)
}
