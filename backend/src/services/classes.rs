//! Class catalog: recurring weekly offerings and their rosters.

use chrono::NaiveTime;
use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::{
    calendar::{parse_clock_time, ranges_overlap, CalendarDay},
    db::Db,
    errors::{AppError, AppResult},
    models::{ClassDetail, ClassRow, ClassSession, EnrollmentStatus, ScheduleEntry},
    services::enrollments,
};

const CLASS_COLUMNS: &str =
    "id, name, grade, course_id, teacher_id, max_students, is_active";

#[derive(Debug, Clone)]
pub struct NewSession {
    pub day_of_week: u8,
    pub start_time:  String,
    pub end_time:    String,
}

#[derive(Debug, Clone)]
pub struct NewClass {
    pub name:         String,
    pub grade:        String,
    pub course_id:    String,
    pub teacher_id:   Option<String>,
    pub max_students: i64,
    pub sessions:     Vec<NewSession>,
}

/// A weekly time window, used by the overlap check.
#[derive(Debug, Clone, PartialEq)]
pub struct WeeklySlot {
    pub class_id:    String,
    pub day_of_week: u8,
    pub start:       NaiveTime,
    pub end:         NaiveTime,
}

impl WeeklySlot {
    fn from_session(s: &ClassSession) -> Option<Self> {
        Some(Self {
            class_id:    s.class_id.clone(),
            day_of_week: u8::try_from(s.day_of_week).ok()?,
            start:       parse_clock_time(&s.start_time)?,
            end:         parse_clock_time(&s.end_time)?,
        })
    }
}

/// First slot in `existing` that overlaps any slot of `incoming` on the same weekday.
pub fn find_overlap<'a>(existing: &'a [WeeklySlot], incoming: &[WeeklySlot]) -> Option<&'a WeeklySlot> {
    existing.iter().find(|held| {
        incoming.iter().any(|new| {
            held.day_of_week == new.day_of_week
                && ranges_overlap(held.start, held.end, new.start, new.end)
        })
    })
}

// ── Reads ────────────────────────────────────────────────────

pub async fn fetch_row(conn: &mut SqliteConnection, id: &str) -> AppResult<Option<ClassRow>> {
    let row = sqlx::query_as::<_, ClassRow>(&format!(
        "SELECT {CLASS_COLUMNS} FROM classes WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(conn)
    .await?;
    Ok(row)
}

pub async fn sessions(conn: &mut SqliteConnection, class_id: &str) -> AppResult<Vec<ClassSession>> {
    let rows = sqlx::query_as::<_, ClassSession>(
        "SELECT id, class_id, day_of_week, start_time, end_time
         FROM class_sessions WHERE class_id = ? ORDER BY sort_order, day_of_week, start_time",
    )
    .bind(class_id)
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

pub async fn cancelled_dates(conn: &mut SqliteConnection, class_id: &str) -> AppResult<Vec<CalendarDay>> {
    let rows: Vec<CalendarDay> = sqlx::query_scalar(
        "SELECT cancelled_on FROM class_cancellations WHERE class_id = ? ORDER BY cancelled_on",
    )
    .bind(class_id)
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

pub async fn enrolled_count(conn: &mut SqliteConnection, class_id: &str) -> AppResult<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM class_students WHERE class_id = ?")
        .bind(class_id)
        .fetch_one(conn)
        .await?;
    Ok(count)
}

/// Start time of the class on `day_of_week`, falling back to its first
/// configured session. `None` when the class is unknown or has no sessions.
pub async fn start_time_on(
    conn: &mut SqliteConnection,
    class_id: &str,
    day_of_week: u8,
) -> AppResult<Option<NaiveTime>> {
    let all = sessions(conn, class_id).await?;
    let chosen = all
        .iter()
        .find(|s| s.day_of_week == i64::from(day_of_week))
        .or_else(|| all.first());
    Ok(chosen.and_then(|s| parse_clock_time(&s.start_time)))
}

async fn detail(conn: &mut SqliteConnection, class: ClassRow) -> AppResult<ClassDetail> {
    let sessions = sessions(&mut *conn, &class.id).await?;
    let student_ids: Vec<String> = sqlx::query_scalar(
        "SELECT student_id FROM class_students WHERE class_id = ? ORDER BY student_id",
    )
    .bind(&class.id)
    .fetch_all(&mut *conn)
    .await?;
    let cancelled_dates = cancelled_dates(&mut *conn, &class.id).await?;
    Ok(ClassDetail { class, sessions, student_ids, cancelled_dates })
}

pub async fn get(pool: &Db, id: &str) -> AppResult<ClassDetail> {
    let mut conn = pool.acquire().await?;
    let class = fetch_row(&mut conn, id).await?.ok_or(AppError::NotFound)?;
    detail(&mut conn, class).await
}

pub async fn list(pool: &Db, course_id: Option<&str>) -> AppResult<Vec<ClassDetail>> {
    let mut conn = pool.acquire().await?;
    let rows = sqlx::query_as::<_, ClassRow>(&format!(
        "SELECT {CLASS_COLUMNS} FROM classes
         WHERE (?1 IS NULL OR course_id = ?1)
         ORDER BY grade, name"
    ))
    .bind(course_id)
    .fetch_all(&mut *conn)
    .await?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(detail(&mut conn, row).await?);
    }
    Ok(out)
}

// ── Writes ───────────────────────────────────────────────────

pub async fn create(pool: &Db, new: NewClass) -> AppResult<ClassDetail> {
    if new.max_students <= 0 {
        return Err(AppError::BadRequest("maxStudents must be positive".into()));
    }
    for s in &new.sessions {
        if !(1..=7).contains(&s.day_of_week) {
            return Err(AppError::BadRequest("dayOfWeek must be 1-7".into()));
        }
        let (Some(start), Some(end)) = (parse_clock_time(&s.start_time), parse_clock_time(&s.end_time)) else {
            return Err(AppError::BadRequest("Session times must be HH:MM".into()));
        };
        if end <= start {
            return Err(AppError::BadRequest("Session endTime must be after startTime".into()));
        }
    }

    let id = Uuid::new_v4().to_string();
    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO classes (id, name, grade, course_id, teacher_id, max_students, is_active)
         VALUES (?, ?, ?, ?, ?, ?, 1)",
    )
    .bind(&id).bind(&new.name).bind(&new.grade).bind(&new.course_id)
    .bind(&new.teacher_id).bind(new.max_students)
    .execute(&mut *tx).await?;

    for (i, s) in new.sessions.iter().enumerate() {
        sqlx::query(
            "INSERT INTO class_sessions (id, class_id, day_of_week, start_time, end_time, sort_order)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string()).bind(&id)
        .bind(i64::from(s.day_of_week)).bind(s.start_time.trim()).bind(s.end_time.trim())
        .bind(i as i64)
        .execute(&mut *tx).await?;
    }

    let class = fetch_row(&mut tx, &id).await?.ok_or(AppError::NotFound)?;
    let out = detail(&mut tx, class).await?;
    tx.commit().await?;

    tracing::info!(class_id = %id, name = %new.name, sessions = new.sessions.len(), "Class created");
    Ok(out)
}

/// Put a student on the roster. Activates their pending enrollment and adds
/// this class's weekly sessions to its schedule.
pub async fn add_student(pool: &Db, class_id: &str, student_id: &str) -> AppResult<ClassDetail> {
    let mut tx = pool.begin().await?;

    let class = fetch_row(&mut tx, class_id).await?.ok_or(AppError::NotFound)?;
    if !class.is_active {
        return Err(AppError::Conflict("Class is not active".into()));
    }
    if enrolled_count(&mut tx, class_id).await? >= class.max_students {
        return Err(AppError::Conflict("Class is full".into()));
    }

    let incoming_sessions = sessions(&mut tx, class_id).await?;
    let incoming: Vec<WeeklySlot> = incoming_sessions.iter().filter_map(WeeklySlot::from_session).collect();

    let held_sessions = sqlx::query_as::<_, ClassSession>(
        "SELECT s.id, s.class_id, s.day_of_week, s.start_time, s.end_time
         FROM class_sessions s
         JOIN class_students cs ON cs.class_id = s.class_id
         WHERE cs.student_id = ? AND s.class_id <> ?",
    )
    .bind(student_id)
    .bind(class_id)
    .fetch_all(&mut *tx)
    .await?;
    let held: Vec<WeeklySlot> = held_sessions.iter().filter_map(WeeklySlot::from_session).collect();

    if let Some(clash) = find_overlap(&held, &incoming) {
        return Err(AppError::Conflict(format!(
            "Schedule overlaps with class {} on day {}",
            clash.class_id, clash.day_of_week
        )));
    }

    let inserted = sqlx::query(
        "INSERT INTO class_students (class_id, student_id) VALUES (?, ?)
         ON CONFLICT (class_id, student_id) DO NOTHING",
    )
    .bind(class_id)
    .bind(student_id)
    .execute(&mut *tx)
    .await?
    .rows_affected();
    if inserted == 0 {
        return Err(AppError::Conflict("Student is already in this class".into()));
    }

    if let Some(enrollment) = enrollments::open_for_student(&mut tx, student_id).await? {
        let mut schedule = enrollment.schedule.clone();
        for s in &incoming_sessions {
            let entry = ScheduleEntry {
                day_of_week: u8::try_from(s.day_of_week).unwrap_or_default(),
                time_slot:   format!("{}-{}", s.start_time, s.end_time),
                class_id:    Some(class_id.to_string()),
            };
            if !schedule.contains(&entry) {
                schedule.push(entry);
            }
        }
        enrollments::write_schedule(&mut tx, &enrollment.id, &schedule).await?;

        if enrollment.status == EnrollmentStatus::Pending {
            sqlx::query("UPDATE enrollments SET status = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?")
                .bind(EnrollmentStatus::Active)
                .bind(&enrollment.id)
                .execute(&mut *tx)
                .await?;
            tracing::info!(enrollment_id = %enrollment.id, student_id, "Enrollment activated");
        }
    }

    let out = detail(&mut tx, class).await?;
    tx.commit().await?;

    tracing::info!(class_id, student_id, "Student added to class");
    Ok(out)
}

/// Take a student off the roster and drop this class from their open schedule.
pub async fn remove_student(pool: &Db, class_id: &str, student_id: &str) -> AppResult<()> {
    let mut tx = pool.begin().await?;

    let removed = sqlx::query("DELETE FROM class_students WHERE class_id = ? AND student_id = ?")
        .bind(class_id)
        .bind(student_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    if removed == 0 {
        return Err(AppError::NotFound);
    }

    if let Some(enrollment) = enrollments::open_for_student(&mut tx, student_id).await? {
        let schedule: Vec<ScheduleEntry> = enrollment
            .schedule
            .into_iter()
            .filter(|e| e.class_id.as_deref() != Some(class_id))
            .collect();
        enrollments::write_schedule(&mut tx, &enrollment.id, &schedule).await?;
    }

    tx.commit().await?;
    tracing::info!(class_id, student_id, "Student removed from class");
    Ok(())
}
