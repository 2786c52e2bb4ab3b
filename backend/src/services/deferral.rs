//! One-shot enrollment deferral.
//!
//! Deferring pauses an enrollment for 1-4 weeks: the end date moves out by the
//! same amount and every scheduled weekday inside the pause window gets an
//! approved absence. An enrollment can be deferred once in its lifetime.

use std::time::Duration;

use chrono::NaiveTime;
use serde::Serialize;

use crate::{
    calendar::{CalendarDay, Clock},
    db::{is_unique_violation, Db},
    errors::{AppError, AppResult},
    models::{Enrollment, EnrollmentStatus},
    services::{absences, classes, enrollments},
    state::AppState,
};

pub const MAX_DEFERRAL_WEEKS: i64 = 4;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeferralOutcome {
    #[serde(flatten)]
    pub enrollment:       Enrollment,
    pub absences_created: usize,
}

/// Concrete days covered by a pause of `weeks` weeks starting `today`, one
/// per (week, weekday) pair. Week `w` spans `today + 7w .. today + 7w + 6`.
pub fn paused_days(today: CalendarDay, weeks: i64, day_of_week: u8) -> Vec<CalendarDay> {
    (0..weeks)
        .filter_map(|w| today.add_weeks(w)?.next_on_or_after(day_of_week))
        .collect()
}

pub async fn defer(pool: &Db, clock: &Clock, id: &str, weeks: i64) -> AppResult<DeferralOutcome> {
    if !(1..=MAX_DEFERRAL_WEEKS).contains(&weeks) {
        return Err(AppError::BadRequest(format!(
            "deferralWeeks must be between 1 and {MAX_DEFERRAL_WEEKS}"
        )));
    }

    let mut tx = pool.begin().await?;
    let current = enrollments::fetch(&mut tx, id).await?.ok_or(AppError::NotFound)?;

    if current.deferral_weeks != 0 {
        return Err(AppError::Conflict("Enrollment has already been deferred".into()));
    }
    if !current.status.is_open() {
        return Err(AppError::Conflict(format!(
            "Only pending or active enrollments can be deferred (status: {:?})",
            current.status
        )));
    }

    let today = clock.today();
    let now = clock.now();
    let end = current.end_date.add_weeks(weeks).ok_or_else(AppError::date_out_of_range)?;
    let deferred_until = today.add_weeks(weeks).ok_or_else(AppError::date_out_of_range)?;

    sqlx::query(
        "UPDATE enrollments
         SET status = ?, resume_status = ?, deferral_weeks = ?, end_date = ?, deferred_until = ?,
             updated_at = CURRENT_TIMESTAMP
         WHERE id = ?",
    )
    .bind(EnrollmentStatus::Deferred)
    .bind(current.status)
    .bind(weeks)
    .bind(end)
    .bind(deferred_until)
    .bind(id)
    .execute(&mut *tx)
    .await?;

    // First schedule entry per weekday decides which class's start time is used.
    let mut weekdays: Vec<(u8, Option<String>)> = Vec::new();
    for entry in &current.schedule {
        if !weekdays.iter().any(|(d, _)| *d == entry.day_of_week) {
            weekdays.push((entry.day_of_week, entry.class_id.clone()));
        }
    }

    let reason = format!("deferred {weeks} weeks");
    let mut absences_created = 0;

    for (day_of_week, class_id) in &weekdays {
        let start = match class_id {
            Some(class_id) => classes::start_time_on(&mut tx, class_id, *day_of_week).await?,
            None => None,
        }
        .unwrap_or(NaiveTime::MIN);

        for day in paused_days(today, weeks, *day_of_week) {
            let written = absences::insert_approved_if_absent(
                &mut tx,
                &current.student_id,
                &current.id,
                class_id.as_deref(),
                day.at(start),
                &reason,
                now,
            )
            .await?;
            if written {
                absences_created += 1;
            }
        }
    }

    let enrollment = enrollments::fetch(&mut tx, id).await?.ok_or(AppError::NotFound)?;
    tx.commit().await?;

    tracing::info!(
        enrollment_id = %id,
        weeks,
        end_date = %enrollment.end_date,
        deferred_until = %deferred_until,
        absences_created,
        "Enrollment deferred"
    );
    Ok(DeferralOutcome { enrollment, absences_created })
}

// ── Background sweep ─────────────────────────────────────────

pub fn spawn_deferral_sweep(state: AppState) {
    if !state.config.deferral_sweep_enabled {
        tracing::info!("Deferral sweep job disabled");
        return;
    }

    let minutes = state.config.deferral_sweep_interval_minutes.max(1);
    tracing::info!(minutes, "Deferral sweep job started");

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(minutes.saturating_mul(60)));

        loop {
            ticker.tick().await;
            match resume_elapsed_deferrals(&state.pool, state.clock.today()).await {
                Ok(0) => {}
                Ok(resumed) => tracing::info!(resumed, "Deferred enrollments resumed"),
                Err(err) => tracing::error!(error = %err, "Deferral sweep failed"),
            }
        }
    });
}

/// Return deferred enrollments whose pause ended on or before `today` to the
/// status they had when deferred. A student who opened another enrollment
/// meanwhile keeps theirs deferred; the clash is logged.
pub async fn resume_elapsed_deferrals(pool: &Db, today: CalendarDay) -> anyhow::Result<u64> {
    #[derive(sqlx::FromRow)]
    struct ElapsedRow {
        id:         String,
        student_id: String,
    }

    let rows = sqlx::query_as::<_, ElapsedRow>(
        "SELECT id, student_id FROM enrollments
         WHERE status = 'deferred' AND deferred_until IS NOT NULL AND deferred_until <= ?",
    )
    .bind(today)
    .fetch_all(pool)
    .await?;

    let mut resumed = 0;
    for row in rows {
        let result = sqlx::query(
            "UPDATE enrollments
             SET status = COALESCE(resume_status, 'active'), resume_status = NULL,
                 deferred_until = NULL, updated_at = CURRENT_TIMESTAMP
             WHERE id = ? AND status = 'deferred'",
        )
        .bind(&row.id)
        .execute(pool)
        .await;

        match result {
            Ok(done) => resumed += done.rows_affected(),
            Err(e) if is_unique_violation(&e) => {
                tracing::warn!(
                    enrollment_id = %row.id,
                    student_id = %row.student_id,
                    "Deferral ended but student already has an open enrollment"
                );
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(resumed)
}
