//! Credential storage.
//!
//! The orchestrator talks to a [`CredentialRepo`] trait object so tests and
//! local development can run against the in-memory implementation while
//! production uses Postgres.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{Instrument, info_span};
use uuid::Uuid;

/// A stored account credential. The password hash never leaves this module
/// except through [`CredentialRepo`] consumers that need to verify it.
#[derive(Debug, Clone)]
pub struct Credential {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub display_name: String,
    pub is_active: bool,
    pub is_verified: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub failed_login_attempts: i32,
    pub locked_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewCredential {
    pub email: String,
    pub password_hash: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepoError {
    #[error("email already registered")]
    Duplicate,
    #[error("credential store unavailable: {0}")]
    Unavailable(String),
}

impl RepoError {
    /// Transient errors are worth retrying; duplicates are not.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

#[async_trait]
pub trait CredentialRepo: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<Credential>, RepoError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Credential>, RepoError>;

    async fn insert(&self, new: NewCredential) -> Result<Credential, RepoError>;

    async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<(), RepoError>;

    async fn touch_last_login(&self, id: Uuid) -> Result<(), RepoError>;
}

/// Returns `true` when `err` is a database unique-violation (SQLSTATE `23505`).
fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("23505"),
        _ => false,
    }
}

fn map_db_error(err: &sqlx::Error) -> RepoError {
    if is_unique_violation(err) {
        RepoError::Duplicate
    } else {
        RepoError::Unavailable(err.to_string())
    }
}

fn credential_from_row(row: &sqlx::postgres::PgRow) -> Credential {
    Credential {
        id: row.get("id"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        display_name: row.get("display_name"),
        is_active: row.get("is_active"),
        is_verified: row.get("is_verified"),
        last_login_at: row.get("last_login_at"),
        failed_login_attempts: row.get("failed_login_attempts"),
        locked_until: row.get("locked_until"),
        created_at: row.get("created_at"),
    }
}

#[derive(Clone)]
pub struct PgCredentialRepo {
    pool: PgPool,
}

impl PgCredentialRepo {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialRepo for PgCredentialRepo {
    async fn find_by_email(&self, email: &str) -> Result<Option<Credential>, RepoError> {
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.sql.table = "credentials"
        );
        sqlx::query(
            r"
            SELECT id, email, password_hash, display_name, is_active, is_verified,
                   last_login_at, failed_login_attempts, locked_until, created_at
            FROM credentials WHERE email = $1
            ",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .instrument(span)
        .await
        .map(|row| row.as_ref().map(credential_from_row))
        .map_err(|err| map_db_error(&err))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Credential>, RepoError> {
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.sql.table = "credentials"
        );
        sqlx::query(
            r"
            SELECT id, email, password_hash, display_name, is_active, is_verified,
                   last_login_at, failed_login_attempts, locked_until, created_at
            FROM credentials WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .instrument(span)
        .await
        .map(|row| row.as_ref().map(credential_from_row))
        .map_err(|err| map_db_error(&err))
    }

    async fn insert(&self, new: NewCredential) -> Result<Credential, RepoError> {
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.sql.table = "credentials"
        );
        sqlx::query(
            r"
            INSERT INTO credentials (id, email, password_hash, display_name)
            VALUES ($1, $2, $3, $4)
            RETURNING id, email, password_hash, display_name, is_active, is_verified,
                      last_login_at, failed_login_attempts, locked_until, created_at
            ",
        )
        .bind(Uuid::new_v4())
        .bind(&new.email)
        .bind(&new.password_hash)
        .bind(&new.display_name)
        .fetch_one(&self.pool)
        .instrument(span)
        .await
        .map(|row| credential_from_row(&row))
        .map_err(|err| map_db_error(&err))
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<(), RepoError> {
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.sql.table = "credentials"
        );
        sqlx::query("UPDATE credentials SET password_hash = $2 WHERE id = $1")
            .bind(id)
            .bind(password_hash)
            .execute(&self.pool)
            .instrument(span)
            .await
            .map_err(|err| map_db_error(&err))?;
        Ok(())
    }

    async fn touch_last_login(&self, id: Uuid) -> Result<(), RepoError> {
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.sql.table = "credentials"
        );
        sqlx::query("UPDATE credentials SET last_login_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .map_err(|err| map_db_error(&err))?;
        Ok(())
    }
}

/// In-memory credential store for tests and local development.
#[derive(Default)]
pub struct MemoryCredentialRepo {
    rows: Arc<Mutex<HashMap<Uuid, Credential>>>,
}

impl MemoryCredentialRepo {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip the active flag on an existing credential.
    pub async fn set_active(&self, id: Uuid, active: bool) {
        if let Some(row) = self.rows.lock().await.get_mut(&id) {
            row.is_active = active;
        }
    }
}

#[async_trait]
impl CredentialRepo for MemoryCredentialRepo {
    async fn find_by_email(&self, email: &str) -> Result<Option<Credential>, RepoError> {
        let rows = self.rows.lock().await;
        Ok(rows.values().find(|row| row.email == email).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Credential>, RepoError> {
        Ok(self.rows.lock().await.get(&id).cloned())
    }

    async fn insert(&self, new: NewCredential) -> Result<Credential, RepoError> {
        let mut rows = self.rows.lock().await;
        if rows.values().any(|row| row.email == new.email) {
            return Err(RepoError::Duplicate);
        }
        let credential = Credential {
            id: Uuid::new_v4(),
            email: new.email,
            password_hash: new.password_hash,
            display_name: new.display_name,
            is_active: true,
            is_verified: false,
            last_login_at: None,
            failed_login_attempts: 0,
            locked_until: None,
            created_at: Utc::now(),
        };
        rows.insert(credential.id, credential.clone());
        Ok(credential)
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<(), RepoError> {
        let mut rows = self.rows.lock().await;
        match rows.get_mut(&id) {
            Some(row) => {
                row.password_hash = password_hash.to_string();
                Ok(())
            }
            None => Err(RepoError::Unavailable("credential vanished".to_string())),
        }
    }

    async fn touch_last_login(&self, id: Uuid) -> Result<(), RepoError> {
        let mut rows = self.rows.lock().await;
        if let Some(row) = rows.get_mut(&id) {
            row.last_login_at = Some(Utc::now());
        }
        Ok(())
    }
}
