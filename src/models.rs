use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StudentRow {
    pub id: i64,
    pub student_id: String,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub face_key: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LectureRow {
    pub id: i64,
    pub lecture_code: String,
    pub lecture_title: String,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AttendanceRow {
    pub id: i64,
    pub student_id: String,
    pub lecture_id: i64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SessionRow {
    pub ssid: String,
    pub student_id: String,
    pub expires_at: DateTime<Utc>,
}

/// One dashboard line: attendance joined to the student it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AttendanceEntry {
    pub timestamp: DateTime<Utc>,
    pub student_id: String,
    pub name: String,
}
