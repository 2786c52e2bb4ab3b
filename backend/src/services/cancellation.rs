//! Whole-class cancellation of one date, fanned out to every enrolled student.
//!
//! For each student with an open enrollment the cascade excuses the day,
//! records an approved absence and, when that absence is new, leaves a
//! `pending` makeup placeholder one week out. Approved makeups that were
//! booked into the cancelled slot are deleted, which refunds them.
//!
//! The whole fan-out commits as one transaction.

use chrono::NaiveTime;
use serde::Serialize;
use uuid::Uuid;

use crate::{
    calendar::{CalendarDay, Clock, SessionMoment},
    db::{is_unique_violation, Db},
    errors::{AppError, AppResult},
    services::{absences, attendance, classes, makeups},
};

pub const CANCELLATION_REASON: &str = "class cancelled by teacher";

/// Recorded as `marked_by` when no caller identity is available.
pub const SYSTEM_ACTOR: &str = "system";

fn fallback_start() -> NaiveTime {
    NaiveTime::from_hms_opt(8, 0, 0).unwrap_or(NaiveTime::MIN)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancellationOutcome {
    pub class_id:           String,
    pub date:               CalendarDay,
    pub affected_students:  usize,
    pub attendance_created: usize,
    pub absences_created:   usize,
    pub makeups_created:    usize,
    pub makeups_refunded:   u64,
}

#[derive(sqlx::FromRow)]
struct AffectedStudent {
    student_id:    String,
    enrollment_id: String,
}

pub async fn cancel(
    pool: &Db,
    clock: &Clock,
    class_id: &str,
    raw_date: &str,
    actor: Option<&str>,
) -> AppResult<CancellationOutcome> {
    let day = SessionMoment::parse(raw_date, clock.offset())
        .map(|m| m.day)
        .ok_or_else(|| AppError::BadRequest("date must be yyyy-mm-dd".into()))?;
    let marked_by = actor.unwrap_or(SYSTEM_ACTOR);
    let now = clock.now();

    let mut tx = pool.begin().await?;

    classes::fetch_row(&mut tx, class_id).await?.ok_or(AppError::NotFound)?;

    let appended = sqlx::query(
        "INSERT INTO class_cancellations (class_id, cancelled_on, cancelled_by, cancelled_at)
         VALUES (?, ?, ?, ?)",
    )
    .bind(class_id)
    .bind(day)
    .bind(marked_by)
    .bind(now)
    .execute(&mut *tx)
    .await;

    match appended {
        Ok(_) => {}
        Err(e) if is_unique_violation(&e) => {
            return Err(AppError::Conflict(format!("Class is already cancelled on {day}")));
        }
        Err(e) => return Err(e.into()),
    }

    let start = classes::start_time_on(&mut tx, class_id, day.day_of_week())
        .await?
        .unwrap_or_else(fallback_start);
    let session_date = day.at(start);

    let students = sqlx::query_as::<_, AffectedStudent>(
        "SELECT cs.student_id, e.id AS enrollment_id
         FROM class_students cs
         JOIN enrollments e ON e.student_id = cs.student_id AND e.status IN ('pending', 'active')
         WHERE cs.class_id = ?
         ORDER BY cs.student_id",
    )
    .bind(class_id)
    .fetch_all(&mut *tx)
    .await?;

    let mut outcome = CancellationOutcome {
        class_id:           class_id.to_string(),
        date:               day,
        affected_students:  students.len(),
        attendance_created: 0,
        absences_created:   0,
        makeups_created:    0,
        makeups_refunded:   0,
    };

    for student in &students {
        let had_absence = absences::exists_on(&mut tx, &student.student_id, day).await?;

        if !had_absence {
            let excused = attendance::insert_excused_if_absent(
                &mut tx,
                &attendance::Excusal {
                    student_id:    &student.student_id,
                    enrollment_id: &student.enrollment_id,
                    class_id:      Some(class_id),
                    session_date,
                    notes:         CANCELLATION_REASON,
                    marked_by,
                },
                now,
            )
            .await?;
            if excused {
                outcome.attendance_created += 1;
            }
        }

        if absences::insert_approved_if_absent(
            &mut tx,
            &student.student_id,
            &student.enrollment_id,
            Some(class_id),
            session_date,
            CANCELLATION_REASON,
            now,
        )
        .await?
        {
            outcome.absences_created += 1;
        }

        // Only an absence caused by this cancellation earns a makeup credit.
        if !had_absence {
            let target = makeups::placeholder_target(session_date);
            sqlx::query(
                "INSERT INTO makeup_requests
                    (id, student_id, enrollment_id, original_class_id, original_session_date,
                     new_class_id, new_session_date, new_session_day, reason, status, requested_at)
                 VALUES (?, ?, ?, ?, ?, NULL, ?, ?, ?, 'pending', ?)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&student.student_id)
            .bind(&student.enrollment_id)
            .bind(class_id)
            .bind(session_date)
            .bind(target)
            .bind(CalendarDay::from(target))
            .bind(CANCELLATION_REASON)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            outcome.makeups_created += 1;
        }
    }

    outcome.makeups_refunded = sqlx::query(
        "DELETE FROM makeup_requests
         WHERE new_class_id = ? AND new_session_day = ? AND status = 'approved'",
    )
    .bind(class_id)
    .bind(day)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    tx.commit().await?;

    tracing::info!(
        class_id,
        date = %day,
        students = outcome.affected_students,
        attendance = outcome.attendance_created,
        absences = outcome.absences_created,
        makeups = outcome.makeups_created,
        refunded = outcome.makeups_refunded,
        "Class session cancelled"
    );
    Ok(outcome)
}
