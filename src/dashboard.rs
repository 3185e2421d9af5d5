use axum::extract::Path;
use axum::Extension;
use serde::Serialize;
use sqlx::SqlitePool;

use crate::err::Error;
use crate::models::{AttendanceEntry, LectureRow};
use crate::{proceeds, Payload};

/// All lectures, most recent first.
pub async fn lectures(pool: &SqlitePool) -> Result<Vec<LectureRow>, Error> {
    let rows = sqlx::query_as::<_, LectureRow>(
        "SELECT * FROM lectures ORDER BY date DESC, id DESC",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Attendance for one lecture in check-in order, joined to the student
/// record for display.
pub async fn attendance_for(
    pool: &SqlitePool,
    lecture_id: i64,
) -> Result<Vec<AttendanceEntry>, Error> {
    let lecture = sqlx::query_as::<_, LectureRow>("SELECT * FROM lectures WHERE id = ? LIMIT 1")
        .bind(lecture_id)
        .fetch_optional(pool)
        .await?;
    if lecture.is_none() {
        return Err(Error::NotFound {
            message: format!("no lecture with id {}", lecture_id),
        });
    }

    let rows = sqlx::query_as::<_, AttendanceEntry>(
        "SELECT a.timestamp, s.student_id, s.name
         FROM attendances a
         JOIN students s ON s.student_id = a.student_id
         WHERE a.lecture_id = ?
         ORDER BY a.timestamp ASC",
    )
    .bind(lecture_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

#[derive(Debug, Clone, Serialize)]
pub struct LectureList {
    pub lectures: Vec<LectureRow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttendanceList {
    pub entries: Vec<AttendanceEntry>,
}

pub async fn list_lectures(Extension(pool): Extension<SqlitePool>) -> Payload<LectureList> {
    let lectures = lectures(&pool).await?;
    proceeds(LectureList { lectures })
}

pub async fn list_attendance(
    Path(lecture_id): Path<i64>,
    Extension(pool): Extension<SqlitePool>,
) -> Payload<AttendanceList> {
    let entries = attendance_for(&pool, lecture_id).await?;
    proceeds(AttendanceList { entries })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::ledger::check_in;
    use chrono::{Duration, TimeZone, Utc};

    async fn seed_student(pool: &SqlitePool, id: &str, name: &str) {
        sqlx::query(
            "INSERT INTO students (student_id, name, email, password_hash, face_key, created_at)
             VALUES (?, ?, ?, 'x', ?, ?)",
        )
        .bind(id)
        .bind(name)
        .bind(format!("{}@x.com", id))
        .bind(id)
        .bind(Utc::now())
        .execute(pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn attendance_is_ordered_by_timestamp() {
        let pool = test_pool().await;
        for (id, name) in [("S1", "Ann"), ("S2", "Ben"), ("S3", "Cay")] {
            seed_student(&pool, id, name).await;
        }

        let t1 = Utc.with_ymd_and_hms(2025, 9, 5, 9, 0, 0).unwrap();
        let t2 = t1 + Duration::minutes(5);
        let t3 = t1 + Duration::minutes(10);
        // Insert out of order; the query must sort by time.
        check_in(&pool, "S2", "CS101", "Intro", t2).await.unwrap();
        check_in(&pool, "S3", "CS101", "Intro", t3).await.unwrap();
        check_in(&pool, "S1", "CS101", "Intro", t1).await.unwrap();

        let lecture = &lectures(&pool).await.unwrap()[0];
        let entries = attendance_for(&pool, lecture.id).await.unwrap();
        let ids: Vec<_> = entries.iter().map(|e| e.student_id.as_str()).collect();
        assert_eq!(ids, ["S1", "S2", "S3"]);
        assert!(entries[0].timestamp < entries[1].timestamp);
        assert!(entries[1].timestamp < entries[2].timestamp);
        assert_eq!(entries[0].name, "Ann");
    }

    #[tokio::test]
    async fn lectures_are_listed_most_recent_first() {
        let pool = test_pool().await;
        seed_student(&pool, "S1", "Ann").await;

        let monday = Utc.with_ymd_and_hms(2025, 9, 1, 9, 0, 0).unwrap();
        let friday = Utc.with_ymd_and_hms(2025, 9, 5, 9, 0, 0).unwrap();
        check_in(&pool, "S1", "CS101-mon", "Intro", monday).await.unwrap();
        check_in(&pool, "S1", "CS101-fri", "Intro", friday).await.unwrap();

        let listed = lectures(&pool).await.unwrap();
        let codes: Vec<_> = listed.iter().map(|l| l.lecture_code.as_str()).collect();
        assert_eq!(codes, ["CS101-fri", "CS101-mon"]);
    }

    #[tokio::test]
    async fn unknown_lecture_is_not_found() {
        let pool = test_pool().await;
        assert!(matches!(
            attendance_for(&pool, 41).await,
            Err(Error::NotFound { .. })
        ));
    }
}
