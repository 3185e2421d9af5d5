use axum::{Extension, Json};
use chrono::{DateTime, Duration, Utc};
use pbkdf2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use pbkdf2::Pbkdf2;
use rand::{thread_rng, Rng};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;

use crate::err::{is_unique_violation, Error};
use crate::io::ImageStore;
use crate::models::{SessionRow, StudentRow};
use crate::{breaks, proceeds, Payload};

const SESSION_TTL_HOURS: i64 = 12;

#[derive(Debug, Clone, Deserialize)]
pub struct NewStudent {
    pub student_id: String,
    pub name: String,
    pub email: String,
    pub password: String,
}

/// Register a student: one atomic row insert guarded by the UNIQUE
/// constraints on student_id and email, then the face image write. The image
/// is only written after the insert succeeds, so a rejected duplicate leaves
/// the image store untouched; if the image write itself fails the fresh row
/// is removed again.
pub async fn create_student(
    pool: &SqlitePool,
    store: &ImageStore,
    new: NewStudent,
    face_image: &[u8],
) -> Result<StudentRow, Error> {
    validate_student_id(&new.student_id)?;
    if new.email.is_empty() {
        return Err(Error::InvalidPayload {
            message: "`email` must not be empty".to_string(),
        });
    }
    if new.password.is_empty() {
        return Err(Error::InvalidPayload {
            message: "`password` must not be empty".to_string(),
        });
    }
    if face_image.is_empty() {
        return Err(Error::InvalidPayload {
            message: "a face capture is required".to_string(),
        });
    }

    let password_hash = Pbkdf2
        .hash_password(new.password.as_bytes(), &SaltString::generate(&mut OsRng))?
        .to_string();

    let res = sqlx::query(
        "INSERT INTO students (student_id, name, email, password_hash, face_key, created_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&new.student_id)
    .bind(&new.name)
    .bind(&new.email)
    .bind(&password_hash)
    .bind(&new.student_id)
    .bind(Utc::now())
    .execute(pool)
    .await;

    if let Err(err) = res {
        if is_unique_violation(&err) {
            return Err(Error::Duplicate {
                message: "Student ID or email already exists".to_string(),
            });
        }
        return Err(err.into());
    }

    if let Err(err) = store.put(&new.student_id, face_image).await {
        sqlx::query("DELETE FROM students WHERE student_id = ?")
            .bind(&new.student_id)
            .execute(pool)
            .await?;
        return Err(err);
    }

    let student =
        sqlx::query_as::<_, StudentRow>("SELECT * FROM students WHERE student_id = ? LIMIT 1")
            .bind(&new.student_id)
            .fetch_one(pool)
            .await?;
    Ok(student)
}

/// Check email/password against the stored hash. Unknown email and wrong
/// password are indistinguishable to the caller.
pub async fn authenticate(
    pool: &SqlitePool,
    email: &str,
    password: &str,
) -> Result<StudentRow, Error> {
    let student =
        sqlx::query_as::<_, StudentRow>("SELECT * FROM students WHERE email = ? LIMIT 1")
            .bind(email)
            .fetch_optional(pool)
            .await?;
    let student = match student {
        Some(student) => student,
        None => return Err(invalid_credentials()),
    };

    let hash = PasswordHash::new(&student.password_hash)?;
    if Pbkdf2
        .verify_password(password.as_bytes(), &hash)
        .is_err()
    {
        return Err(invalid_credentials());
    }
    Ok(student)
}

fn invalid_credentials() -> Error {
    Error::InvalidCredentials {
        message: "Invalid credentials".to_string(),
    }
}

/// Grant a session for an authenticated student, reusing a live one if it
/// exists.
pub async fn open_session(pool: &SqlitePool, student: &StudentRow) -> Result<SessionRow, Error> {
    let existing =
        sqlx::query_as::<_, SessionRow>("SELECT * FROM sessions WHERE student_id = ? LIMIT 1")
            .bind(&student.student_id)
            .fetch_optional(pool)
            .await?;
    if let Some(existing) = existing {
        if Utc::now() < existing.expires_at {
            return Ok(existing);
        }
        sqlx::query("DELETE FROM sessions WHERE ssid = ?")
            .bind(&existing.ssid)
            .execute(pool)
            .await?;
    }

    let seed: [u8; 32] = thread_rng().gen();
    let mut hasher: Sha256 = Digest::new();
    hasher.update(seed);
    let ssid = hex::encode(hasher.finalize());
    let expires_at = Utc::now() + Duration::hours(SESSION_TTL_HOURS);

    sqlx::query("INSERT INTO sessions (ssid, student_id, expires_at) VALUES (?, ?, ?)")
        .bind(&ssid)
        .bind(&student.student_id)
        .bind(expires_at)
        .execute(pool)
        .await?;

    Ok(SessionRow {
        ssid,
        student_id: student.student_id.clone(),
        expires_at,
    })
}

/// Resolve a session token to its student. Expired sessions are reaped on
/// touch and rejected.
pub async fn require_session(pool: &SqlitePool, ssid: &str) -> Result<StudentRow, Error> {
    if ssid.is_empty() {
        return Err(invalid_session());
    }
    let session = sqlx::query_as::<_, SessionRow>("SELECT * FROM sessions WHERE ssid = ? LIMIT 1")
        .bind(ssid)
        .fetch_optional(pool)
        .await?;
    let session = match session {
        Some(session) => session,
        None => return Err(invalid_session()),
    };
    if Utc::now() > session.expires_at {
        sqlx::query("DELETE FROM sessions WHERE ssid = ?")
            .bind(ssid)
            .execute(pool)
            .await?;
        return Err(invalid_session());
    }

    let student =
        sqlx::query_as::<_, StudentRow>("SELECT * FROM students WHERE student_id = ? LIMIT 1")
            .bind(&session.student_id)
            .fetch_optional(pool)
            .await?;
    student.ok_or_else(invalid_session)
}

fn invalid_session() -> Error {
    Error::InvalidSession {
        message: "Please login first".to_string(),
    }
}

pub async fn drop_session(pool: &SqlitePool, ssid: &str) -> Result<bool, Error> {
    let affected = sqlx::query("DELETE FROM sessions WHERE ssid = ?")
        .bind(ssid)
        .execute(pool)
        .await?;
    Ok(affected.rows_affected() >= 1)
}

fn validate_student_id(student_id: &str) -> Result<(), Error> {
    let well_formed = !student_id.is_empty()
        && student_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !well_formed {
        return Err(Error::InvalidPayload {
            message: "`student_id` must be non-empty and use only letters, digits, `-` or `_`"
                .to_string(),
        });
    }
    Ok(())
}

// --- HTTP surface ---

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterStudent {
    #[serde(flatten)]
    pub student: NewStudent,
    /// Base64-encoded face capture.
    pub face_image: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisteredStudent {
    pub student_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginStudent {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionGranted {
    pub session_id: String,
    pub student_id: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DropSession {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionDropped {
    pub dropped: bool,
}

pub async fn register_student(
    Json(body): Json<RegisterStudent>,
    Extension(pool): Extension<SqlitePool>,
    Extension(store): Extension<ImageStore>,
) -> Payload<RegisteredStudent> {
    let face_image = base64::decode(&body.face_image).map_err(Error::from)?;
    match create_student(&pool, &store, body.student, &face_image).await {
        Ok(student) => {
            log::info!("registered student {}", student.student_id);
            proceeds(RegisteredStudent {
                student_id: student.student_id,
            })
        }
        Err(err) => breaks(err),
    }
}

pub async fn login_student(
    Json(login): Json<LoginStudent>,
    Extension(pool): Extension<SqlitePool>,
) -> Payload<SessionGranted> {
    if login.password.is_empty() {
        return breaks(Error::InvalidPayload {
            message: "`password` parameter was empty".to_string(),
        });
    }
    let student = match authenticate(&pool, &login.email, &login.password).await {
        Ok(student) => student,
        Err(err) => return breaks(err),
    };
    let session = open_session(&pool, &student).await?;
    proceeds(SessionGranted {
        session_id: session.ssid,
        student_id: session.student_id,
        expires_at: session.expires_at,
    })
}

pub async fn logout_student(
    Json(body): Json<DropSession>,
    Extension(pool): Extension<SqlitePool>,
) -> Payload<SessionDropped> {
    let dropped = drop_session(&pool, &body.session_id).await?;
    proceeds(SessionDropped { dropped })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::io::tests::scratch_store;

    fn alice() -> NewStudent {
        NewStudent {
            student_id: "S100".to_string(),
            name: "Alice".to_string(),
            email: "alice@x.com".to_string(),
            password: "pw123".to_string(),
        }
    }

    #[tokio::test]
    async fn register_then_login() {
        let pool = test_pool().await;
        let store = scratch_store("auth-login").await;
        create_student(&pool, &store, alice(), b"face-a").await.unwrap();

        let student = authenticate(&pool, "alice@x.com", "pw123").await.unwrap();
        assert_eq!(student.student_id, "S100");
        assert_eq!(student.face_key, "S100");

        assert!(matches!(
            authenticate(&pool, "alice@x.com", "wrong").await,
            Err(Error::InvalidCredentials { .. })
        ));
        assert!(matches!(
            authenticate(&pool, "nobody@x.com", "pw123").await,
            Err(Error::InvalidCredentials { .. })
        ));
    }

    #[tokio::test]
    async fn duplicate_registration_leaves_store_unchanged() {
        let pool = test_pool().await;
        let store = scratch_store("auth-dup").await;
        create_student(&pool, &store, alice(), b"face-a").await.unwrap();

        // Same email, fresh id: rejected, and no image lands for the new id.
        let mut dup = alice();
        dup.student_id = "S200".to_string();
        assert!(matches!(
            create_student(&pool, &store, dup, b"face-b").await,
            Err(Error::Duplicate { .. })
        ));

        // Same id, fresh email.
        let mut dup = alice();
        dup.email = "alice2@x.com".to_string();
        assert!(matches!(
            create_student(&pool, &store, dup, b"face-b").await,
            Err(Error::Duplicate { .. })
        ));

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM students")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(rows, 1);
        assert!(matches!(
            store.get("S200").await,
            Err(Error::NotFound { .. })
        ));
        // The first registration's image is intact.
        assert_eq!(store.get("S100").await.unwrap(), b"face-a");
    }

    #[tokio::test]
    async fn rejects_malformed_input() {
        let pool = test_pool().await;
        let store = scratch_store("auth-bad").await;

        let mut bad = alice();
        bad.student_id = "../etc".to_string();
        assert!(matches!(
            create_student(&pool, &store, bad, b"face").await,
            Err(Error::InvalidPayload { .. })
        ));

        let mut bad = alice();
        bad.password = String::new();
        assert!(matches!(
            create_student(&pool, &store, bad, b"face").await,
            Err(Error::InvalidPayload { .. })
        ));

        assert!(matches!(
            create_student(&pool, &store, alice(), b"").await,
            Err(Error::InvalidPayload { .. })
        ));
    }

    #[tokio::test]
    async fn session_roundtrip_and_expiry() {
        let pool = test_pool().await;
        let store = scratch_store("auth-session").await;
        let student = create_student(&pool, &store, alice(), b"face-a").await.unwrap();

        let session = open_session(&pool, &student).await.unwrap();
        let bound = require_session(&pool, &session.ssid).await.unwrap();
        assert_eq!(bound.student_id, "S100");

        // A second login reuses the live session.
        let again = open_session(&pool, &student).await.unwrap();
        assert_eq!(again.ssid, session.ssid);

        // Force-expire it: rejected and reaped.
        sqlx::query("UPDATE sessions SET expires_at = ? WHERE ssid = ?")
            .bind(Utc::now() - Duration::hours(1))
            .bind(&session.ssid)
            .execute(&pool)
            .await
            .unwrap();
        assert!(matches!(
            require_session(&pool, &session.ssid).await,
            Err(Error::InvalidSession { .. })
        ));
        let left: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(left, 0);

        assert!(matches!(
            require_session(&pool, "").await,
            Err(Error::InvalidSession { .. })
        ));
        assert!(!drop_session(&pool, "missing").await.unwrap());
    }
}
