use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::calendar::CalendarDay;

// ── Users ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    Teacher,
    Student,
}

impl UserRole {
    /// Admins and teachers run the ledgers; students only act for themselves.
    pub fn is_staff(self) -> bool {
        matches!(self, UserRole::Admin | UserRole::Teacher)
    }
}

// ── Enrollments ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EnrollmentStatus {
    Pending,
    Active,
    Completed,
    Cancelled,
    Deferred,
}

impl EnrollmentStatus {
    /// Statuses covered by the one-open-enrollment-per-student index.
    pub fn is_open(self) -> bool {
        matches!(self, EnrollmentStatus::Pending | EnrollmentStatus::Active)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentMode {
    #[default]
    Default,
    Custom,
}

/// One weekly slot an enrollment attends. `time_slot` is `"HH:MM-HH:MM"`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEntry {
    pub day_of_week: u8,
    pub time_slot:   String,
    pub class_id:    Option<String>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Enrollment {
    pub id:                 String,
    pub student_id:         String,
    pub course_id:          String,
    pub frequency:          i64,
    pub start_date:         CalendarDay,
    pub end_date:           CalendarDay,
    pub status:             EnrollmentStatus,
    pub payment_mode:       PaymentMode,
    pub custom_weeks:       Option<i64>,
    pub cycle:              i64,
    pub total_sessions:     i64,
    pub completed_sessions: i64,
    pub remaining_sessions: i64,
    pub deferral_weeks:     i64,
    pub deferred_until:     Option<CalendarDay>,
    #[sqlx(json)]
    pub schedule:           Vec<ScheduleEntry>,
}

// ── Classes ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ClassRow {
    pub id:           String,
    pub name:         String,
    pub grade:        String,
    pub course_id:    String,
    pub teacher_id:   Option<String>,
    pub max_students: i64,
    pub is_active:    bool,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ClassSession {
    pub id:          String,
    pub class_id:    String,
    pub day_of_week: i64, // 1=Mon … 7=Sun
    pub start_time:  String, // "HH:MM"
    pub end_time:    String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassDetail {
    #[serde(flatten)]
    pub class:           ClassRow,
    pub sessions:        Vec<ClassSession>,
    pub student_ids:     Vec<String>,
    pub cancelled_dates: Vec<CalendarDay>,
}

// ── Attendance ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Excused,
    Makeup,
    Absent,
}

impl AttendanceStatus {
    /// Whether a row with this status draws one session from the budget.
    pub fn consumes_session(self) -> bool {
        matches!(self, AttendanceStatus::Present | AttendanceStatus::Makeup)
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Attendance {
    pub id:            String,
    pub student_id:    String,
    pub enrollment_id: String,
    pub class_id:      Option<String>,
    pub session_date:  NaiveDateTime,
    pub status:        AttendanceStatus,
    pub notes:         Option<String>,
    pub marked_by:     String,
    pub marked_at:     NaiveDateTime,
}

// ── Absence / makeup requests ────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Approved,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AbsenceRequest {
    pub id:            String,
    pub student_id:    String,
    pub enrollment_id: String,
    pub class_id:      Option<String>,
    pub session_date:  NaiveDateTime,
    pub reason:        String,
    pub status:        RequestStatus,
    pub requested_at:  NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MakeupRequest {
    pub id:                    String,
    pub student_id:            String,
    pub enrollment_id:         String,
    pub original_class_id:     Option<String>,
    pub original_session_date: NaiveDateTime,
    pub new_class_id:          Option<String>,
    pub new_session_date:      NaiveDateTime,
    pub reason:                String,
    pub status:                RequestStatus,
    pub requested_at:          NaiveDateTime,
}
