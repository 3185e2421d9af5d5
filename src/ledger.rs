use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::auth::require_session;
use crate::err::Error;
use crate::io::ImageStore;
use crate::models::{LectureRow, StudentRow};
use crate::verify::FaceVerifier;
use crate::{breaks, proceeds, Payload};

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "status")]
pub enum CheckIn {
    Recorded { timestamp: DateTime<Utc> },
    AlreadyCheckedIn,
}

/// Record attendance for an already-verified student.
///
/// The lecture is found-or-created through an upsert on its code, then the
/// attendance row is inserted conditionally on the (student, lecture) unique
/// constraint. Both steps are single atomic statements, so concurrent
/// check-ins can neither duplicate a lecture nor a row; a lost conflict reads
/// back as [`CheckIn::AlreadyCheckedIn`]. Nothing is cached between calls.
///
/// Face verification deliberately sits outside this function: callers gate on
/// the verifier first, which keeps the one-row-per-pair invariant independent
/// of verification policy.
pub async fn check_in(
    pool: &SqlitePool,
    student_id: &str,
    lecture_code: &str,
    lecture_title: &str,
    now: DateTime<Utc>,
) -> Result<CheckIn, Error> {
    if lecture_code.trim().is_empty() {
        return Err(Error::LectureCodeMissing {
            message: "Lecture code required".to_string(),
        });
    }

    sqlx::query(
        "INSERT INTO lectures (lecture_code, lecture_title, date) VALUES (?, ?, ?)
         ON CONFLICT(lecture_code) DO NOTHING",
    )
    .bind(lecture_code)
    .bind(lecture_title)
    .bind(now.date_naive())
    .execute(pool)
    .await?;

    let lecture =
        sqlx::query_as::<_, LectureRow>("SELECT * FROM lectures WHERE lecture_code = ? LIMIT 1")
            .bind(lecture_code)
            .fetch_one(pool)
            .await?;

    let res = sqlx::query(
        "INSERT INTO attendances (student_id, lecture_id, timestamp) VALUES (?, ?, ?)
         ON CONFLICT(student_id, lecture_id) DO NOTHING",
    )
    .bind(student_id)
    .bind(lecture.id)
    .bind(now)
    .execute(pool)
    .await?;

    if res.rows_affected() == 0 {
        Ok(CheckIn::AlreadyCheckedIn)
    } else {
        Ok(CheckIn::Recorded { timestamp: now })
    }
}

/// The full check-in gate: resolve the registered face, persist the probe,
/// verify, and only then touch the ledger. A mismatch (or a verifier fault,
/// which fails closed to a mismatch) leaves no Lecture or Attendance rows.
pub async fn verified_check_in(
    pool: &SqlitePool,
    store: &ImageStore,
    verifier: &FaceVerifier,
    student: &StudentRow,
    lecture_code: &str,
    lecture_title: &str,
    probe_image: &[u8],
) -> Result<CheckIn, Error> {
    if lecture_code.trim().is_empty() {
        return Err(Error::LectureCodeMissing {
            message: "Lecture code required".to_string(),
        });
    }

    // A registered student whose image is gone is a data inconsistency and a
    // hard error for this operation.
    let reference = store.resolve(&student.face_key)?;
    let probe = store
        .put(&format!("{}_probe", student.student_id), probe_image)
        .await?;

    let verdict = verifier.verify(reference, probe).await?;
    if !verdict.matched {
        return Err(Error::FaceMismatch {
            distance: verdict.distance,
        });
    }

    check_in(pool, &student.student_id, lecture_code, lecture_title, Utc::now()).await
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckInRequest {
    pub session_id: String,
    pub lecture_code: String,
    #[serde(default)]
    pub lecture_title: String,
    /// Base64-encoded probe capture.
    pub face_image: String,
}

pub async fn submit_check_in(
    Json(body): Json<CheckInRequest>,
    Extension(pool): Extension<SqlitePool>,
    Extension(store): Extension<ImageStore>,
    Extension(verifier): Extension<Arc<FaceVerifier>>,
) -> Payload<CheckIn> {
    let student = match require_session(&pool, &body.session_id).await {
        Ok(student) => student,
        Err(err) => return breaks(err),
    };
    let probe_image = base64::decode(&body.face_image).map_err(Error::from)?;

    match verified_check_in(
        &pool,
        &store,
        &verifier,
        &student,
        &body.lecture_code,
        &body.lecture_title,
        &probe_image,
    )
    .await
    {
        Ok(result) => {
            log::info!(
                "check-in for {} at {}: {:?}",
                student.student_id,
                body.lecture_code,
                result
            );
            proceeds(result)
        }
        Err(err) => breaks(err),
    }
}
