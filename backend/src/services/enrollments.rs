//! Enrollment ledger: derives each enrollment's end date and session budget,
//! and keeps `total == completed + remaining` across recomputes.
//!
//! Uniqueness of the open (pending/active) enrollment per student is enforced
//! by a partial unique index, so concurrent creates cannot both succeed.

use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::{
    calendar::CalendarDay,
    db::{is_unique_violation, Db},
    errors::{AppError, AppResult},
    models::{Enrollment, EnrollmentStatus, PaymentMode, ScheduleEntry},
};

/// Session budget of a default-mode enrollment, whatever its frequency.
pub const DEFAULT_TOTAL_SESSIONS: i64 = 12;

/// Longest plan or bonus extension accepted, in weeks.
pub const MAX_PLAN_WEEKS: i64 = 520;

pub(crate) const ENROLLMENT_COLUMNS: &str =
    "id, student_id, course_id, frequency, start_date, end_date, status, payment_mode,
     custom_weeks, cycle, total_sessions, completed_sessions, remaining_sessions,
     deferral_weeks, deferred_until, schedule_json AS schedule";

const OPEN_CONFLICT: &str = "Student already has an active or pending enrollment";

// ── Budget arithmetic ────────────────────────────────────────

/// Length of the enrollment period in weeks.
pub fn plan_weeks(frequency: i64, payment_mode: PaymentMode, custom_weeks: Option<i64>) -> i64 {
    match payment_mode {
        PaymentMode::Custom => custom_weeks.unwrap_or(0),
        PaymentMode::Default if frequency == 1 => 18,
        PaymentMode::Default => 9,
    }
}

pub fn end_date(
    start: CalendarDay,
    frequency: i64,
    payment_mode: PaymentMode,
    custom_weeks: Option<i64>,
) -> AppResult<CalendarDay> {
    start
        .add_weeks(plan_weeks(frequency, payment_mode, custom_weeks))
        .ok_or_else(AppError::date_out_of_range)
}

pub fn total_sessions(frequency: i64, payment_mode: PaymentMode, custom_weeks: Option<i64>) -> i64 {
    match payment_mode {
        PaymentMode::Custom => custom_weeks.unwrap_or(0) * frequency,
        PaymentMode::Default => DEFAULT_TOTAL_SESSIONS,
    }
}

fn check_plan(frequency: i64, payment_mode: PaymentMode, custom_weeks: Option<i64>) -> AppResult<()> {
    if !(1..=2).contains(&frequency) {
        return Err(AppError::BadRequest("frequency must be 1 or 2".into()));
    }
    if payment_mode == PaymentMode::Custom && custom_weeks.map_or(true, |w| w < 1) {
        return Err(AppError::BadRequest("customWeeks is required for custom payment mode".into()));
    }
    if custom_weeks.is_some_and(|w| w > MAX_PLAN_WEEKS) {
        return Err(AppError::BadRequest(format!("customWeeks must be at most {MAX_PLAN_WEEKS}")));
    }
    Ok(())
}

// ── Inputs ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct NewEnrollment {
    pub student_id:   String,
    pub course_id:    String,
    pub frequency:    i64,
    pub start_date:   CalendarDay,
    pub schedule:     Vec<ScheduleEntry>,
    pub payment_mode: PaymentMode,
    pub custom_weeks: Option<i64>,
    pub cycle:        Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct EnrollmentChanges {
    pub frequency:    Option<i64>,
    pub start_date:   Option<CalendarDay>,
    pub payment_mode: Option<PaymentMode>,
    pub custom_weeks: Option<i64>,
    pub schedule:     Option<Vec<ScheduleEntry>>,
    pub status:       Option<EnrollmentStatus>,
    pub cycle:        Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct EnrollmentFilter {
    pub student_id: Option<String>,
    pub course_id:  Option<String>,
    pub status:     Option<EnrollmentStatus>,
}

// ── Reads ────────────────────────────────────────────────────

pub async fn fetch(conn: &mut SqliteConnection, id: &str) -> AppResult<Option<Enrollment>> {
    let row = sqlx::query_as::<_, Enrollment>(&format!(
        "SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(conn)
    .await?;
    Ok(row)
}

pub async fn get(pool: &Db, id: &str) -> AppResult<Enrollment> {
    let mut conn = pool.acquire().await?;
    fetch(&mut conn, id).await?.ok_or(AppError::NotFound)
}

/// The student's pending or active enrollment, if any.
pub async fn open_for_student(conn: &mut SqliteConnection, student_id: &str) -> AppResult<Option<Enrollment>> {
    let row = sqlx::query_as::<_, Enrollment>(&format!(
        "SELECT {ENROLLMENT_COLUMNS} FROM enrollments
         WHERE student_id = ? AND status IN ('pending', 'active')
         LIMIT 1"
    ))
    .bind(student_id)
    .fetch_optional(conn)
    .await?;
    Ok(row)
}

pub async fn list(pool: &Db, filter: &EnrollmentFilter) -> AppResult<Vec<Enrollment>> {
    let rows = sqlx::query_as::<_, Enrollment>(&format!(
        "SELECT {ENROLLMENT_COLUMNS} FROM enrollments
         WHERE (?1 IS NULL OR student_id = ?1)
           AND (?2 IS NULL OR course_id = ?2)
           AND (?3 IS NULL OR status = ?3)
         ORDER BY start_date DESC, created_at DESC"
    ))
    .bind(&filter.student_id)
    .bind(&filter.course_id)
    .bind(filter.status)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

// ── Writes ───────────────────────────────────────────────────

pub(crate) async fn write_schedule(
    conn: &mut SqliteConnection,
    id: &str,
    schedule: &[ScheduleEntry],
) -> AppResult<()> {
    let json = serde_json::to_string(schedule)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Schedule serialization failed: {e}")))?;
    sqlx::query("UPDATE enrollments SET schedule_json = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?")
        .bind(json)
        .bind(id)
        .execute(conn)
        .await?;
    Ok(())
}

async fn insert(conn: &mut SqliteConnection, new: &NewEnrollment) -> AppResult<String> {
    check_plan(new.frequency, new.payment_mode, new.custom_weeks)?;
    for entry in &new.schedule {
        if !(1..=7).contains(&entry.day_of_week) {
            return Err(AppError::BadRequest("schedule dayOfWeek must be 1-7".into()));
        }
    }

    let end = end_date(new.start_date, new.frequency, new.payment_mode, new.custom_weeks)?;
    let total = total_sessions(new.frequency, new.payment_mode, new.custom_weeks);
    let schedule_json = serde_json::to_string(&new.schedule)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Schedule serialization failed: {e}")))?;

    let id = Uuid::new_v4().to_string();
    let result = sqlx::query(
        "INSERT INTO enrollments
            (id, student_id, course_id, frequency, start_date, end_date, status, payment_mode,
             custom_weeks, cycle, total_sessions, completed_sessions, remaining_sessions, schedule_json)
         VALUES (?, ?, ?, ?, ?, ?, 'pending', ?, ?, ?, ?, 0, ?, ?)",
    )
    .bind(&id).bind(&new.student_id).bind(&new.course_id).bind(new.frequency)
    .bind(new.start_date).bind(end).bind(new.payment_mode)
    .bind(new.custom_weeks).bind(new.cycle.unwrap_or(1))
    .bind(total).bind(total).bind(schedule_json)
    .execute(conn)
    .await;

    match result {
        Ok(_) => Ok(id),
        Err(e) if is_unique_violation(&e) => Err(AppError::Conflict(OPEN_CONFLICT.into())),
        Err(e) => Err(e.into()),
    }
}

pub async fn create(pool: &Db, new: NewEnrollment) -> AppResult<Enrollment> {
    let mut conn = pool.acquire().await?;
    let id = insert(&mut conn, &new).await?;
    let created = fetch(&mut conn, &id).await?.ok_or(AppError::NotFound)?;

    tracing::info!(
        enrollment_id = %created.id,
        student_id = %created.student_id,
        total_sessions = created.total_sessions,
        end_date = %created.end_date,
        "Enrollment created"
    );
    Ok(created)
}

/// Partial update. Plan changes recompute `end_date` from the start date and,
/// when the budget changes, `remaining = max(0, total - completed)`.
/// `completed_sessions` is never written here.
pub async fn update(pool: &Db, id: &str, changes: EnrollmentChanges) -> AppResult<Enrollment> {
    let mut tx = pool.begin().await?;
    let current = fetch(&mut tx, id).await?.ok_or(AppError::NotFound)?;

    let frequency = changes.frequency.unwrap_or(current.frequency);
    let start_date = changes.start_date.unwrap_or(current.start_date);
    let payment_mode = changes.payment_mode.unwrap_or(current.payment_mode);
    let custom_weeks = changes.custom_weeks.or(current.custom_weeks);

    let plan_changed = frequency != current.frequency
        || start_date != current.start_date
        || payment_mode != current.payment_mode
        || custom_weeks != current.custom_weeks;
    let budget_changed = frequency != current.frequency
        || payment_mode != current.payment_mode
        || custom_weeks != current.custom_weeks;

    let mut end = current.end_date;
    let mut total = current.total_sessions;
    let mut remaining = current.remaining_sessions;

    if plan_changed {
        check_plan(frequency, payment_mode, custom_weeks)?;
        end = end_date(start_date, frequency, payment_mode, custom_weeks)?;
    }
    if budget_changed {
        total = total_sessions(frequency, payment_mode, custom_weeks);
        remaining = (total - current.completed_sessions).max(0);
        if remaining < current.remaining_sessions {
            tracing::warn!(
                enrollment_id = %id,
                before = current.remaining_sessions,
                after = remaining,
                "Budget recompute reduced remaining sessions"
            );
        }
    }

    let status = changes.status.unwrap_or(current.status);
    let cycle = changes.cycle.unwrap_or(current.cycle);

    let result = sqlx::query(
        "UPDATE enrollments
         SET frequency = ?, start_date = ?, end_date = ?, payment_mode = ?, custom_weeks = ?,
             total_sessions = ?, remaining_sessions = ?, status = ?, cycle = ?,
             updated_at = CURRENT_TIMESTAMP
         WHERE id = ?",
    )
    .bind(frequency).bind(start_date).bind(end).bind(payment_mode).bind(custom_weeks)
    .bind(total).bind(remaining).bind(status).bind(cycle)
    .bind(id)
    .execute(&mut *tx)
    .await;

    match result {
        Ok(_) => {}
        Err(e) if is_unique_violation(&e) => return Err(AppError::Conflict(OPEN_CONFLICT.into())),
        Err(e) => return Err(e.into()),
    }

    if let Some(schedule) = &changes.schedule {
        write_schedule(&mut tx, id, schedule).await?;
    }

    let updated = fetch(&mut tx, id).await?.ok_or(AppError::NotFound)?;
    tx.commit().await?;

    tracing::info!(enrollment_id = %id, plan_changed, budget_changed, "Enrollment updated");
    Ok(updated)
}

/// Close `id` as completed and open its successor, starting the day after
/// the source ends. Both writes land together or not at all.
pub async fn renew(pool: &Db, id: &str) -> AppResult<Enrollment> {
    let mut tx = pool.begin().await?;
    let source = fetch(&mut tx, id).await?.ok_or(AppError::NotFound)?;

    if source.status == EnrollmentStatus::Cancelled {
        return Err(AppError::Conflict("A cancelled enrollment cannot be renewed".into()));
    }

    sqlx::query("UPDATE enrollments SET status = 'completed', updated_at = CURRENT_TIMESTAMP WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    let successor = NewEnrollment {
        student_id:   source.student_id.clone(),
        course_id:    source.course_id.clone(),
        frequency:    source.frequency,
        start_date:   source.end_date.add_days(1).ok_or_else(AppError::date_out_of_range)?,
        schedule:     source.schedule.clone(),
        payment_mode: source.payment_mode,
        custom_weeks: source.custom_weeks,
        cycle:        Some(source.cycle),
    };
    let new_id = insert(&mut tx, &successor).await?;
    let renewed = fetch(&mut tx, &new_id).await?.ok_or(AppError::NotFound)?;
    tx.commit().await?;

    tracing::info!(
        source_id = %id,
        successor_id = %renewed.id,
        start_date = %renewed.start_date,
        "Enrollment renewed"
    );
    Ok(renewed)
}

/// Grant extra sessions and/or extra calendar time. Weeks only move the end
/// date; they never add sessions.
pub async fn add_bonus(
    pool: &Db,
    id: &str,
    bonus_sessions: Option<i64>,
    bonus_weeks: Option<i64>,
) -> AppResult<Enrollment> {
    let sessions_ok = bonus_sessions.is_some_and(|n| n >= 0);
    let weeks_ok = bonus_weeks.is_some_and(|n| n >= 0);
    if !(sessions_ok || weeks_ok)
        || bonus_sessions.is_some_and(|n| n < 0)
        || bonus_weeks.is_some_and(|n| n < 0)
    {
        return Err(AppError::BadRequest(
            "bonusSessions or bonusWeeks must be a non-negative number".into(),
        ));
    }
    if bonus_weeks.is_some_and(|n| n > MAX_PLAN_WEEKS) {
        return Err(AppError::BadRequest(format!("bonusWeeks must be at most {MAX_PLAN_WEEKS}")));
    }

    let mut tx = pool.begin().await?;
    let current = fetch(&mut tx, id).await?.ok_or(AppError::NotFound)?;

    let end = current
        .end_date
        .add_weeks(bonus_weeks.unwrap_or(0))
        .ok_or_else(AppError::date_out_of_range)?;
    sqlx::query(
        "UPDATE enrollments
         SET remaining_sessions = remaining_sessions + ?, end_date = ?, updated_at = CURRENT_TIMESTAMP
         WHERE id = ?",
    )
    .bind(bonus_sessions.unwrap_or(0))
    .bind(end)
    .bind(id)
    .execute(&mut *tx)
    .await?;

    let updated = fetch(&mut tx, id).await?.ok_or(AppError::NotFound)?;
    tx.commit().await?;

    tracing::info!(
        enrollment_id = %id,
        bonus_sessions = bonus_sessions.unwrap_or(0),
        bonus_weeks = bonus_weeks.unwrap_or(0),
        "Bonus granted"
    );
    Ok(updated)
}

/// Draw one session from the budget.
pub(crate) async fn consume_session(conn: &mut SqliteConnection, id: &str) -> AppResult<()> {
    sqlx::query(
        "UPDATE enrollments
         SET completed_sessions = completed_sessions + 1,
             remaining_sessions = remaining_sessions - 1,
             updated_at = CURRENT_TIMESTAMP
         WHERE id = ?",
    )
    .bind(id)
    .execute(conn)
    .await?;
    Ok(())
}

/// Give back a session drawn by [`consume_session`].
pub(crate) async fn refund_session(conn: &mut SqliteConnection, id: &str) -> AppResult<()> {
    sqlx::query(
        "UPDATE enrollments
         SET completed_sessions = completed_sessions - 1,
             remaining_sessions = remaining_sessions + 1,
             updated_at = CURRENT_TIMESTAMP
         WHERE id = ? AND completed_sessions > 0",
    )
    .bind(id)
    .execute(conn)
    .await?;
    Ok(())
}
