// Administrator provisioning
//
// Creates the first application account in `admin_users`. Re-running after a crash is safe:
// an existing account with the same username is reported as `AlreadyExists` and left untouched.

use super::connection::{connect, describe_error};
use crate::collaborators::{AdminAccount, AdminProvisioner, DatabaseSettings, ProvisionOutcome};
use crate::error::CollaboratorError;
use async_trait::async_trait;
use log::info;
use sqlx::Connection;

pub const ADMIN_ROLE: &str = "super_admin";

/// The application verifies logins against `admin_users.password`.
const INSERT_ADMIN: &str = "INSERT INTO admin_users \
     (id, username, password, role, name, email, is_active, created_at, updated_at) \
     VALUES (?, ?, ?, ?, ?, ?, 1, NOW(), NOW())";

/// bcrypt hash in the `$2y$` flavour the application's PHP verifier expects.
pub fn hash_password(password: &str, cost: u32) -> Result<String, CollaboratorError> {
    bcrypt::hash_with_result(password, cost)
        .map(|parts| parts.format_for_version(bcrypt::Version::TwoY))
        .map_err(|e| {
            CollaboratorError::new(
                "The administrator password could not be hashed.",
                format!("bcrypt: {}", e),
            )
        })
}

pub struct MySqlAdminProvisioner {
    cost: u32,
}

impl MySqlAdminProvisioner {
    pub fn new() -> Self {
        Self {
            cost: bcrypt::DEFAULT_COST,
        }
    }
}

impl Default for MySqlAdminProvisioner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AdminProvisioner for MySqlAdminProvisioner {
    async fn provision(
        &self,
        db: &DatabaseSettings,
        admin: &AdminAccount,
    ) -> Result<ProvisionOutcome, CollaboratorError> {
        let mut conn = connect(db, true).await?;

        let existing: Option<(String,)> =
            sqlx::query_as("SELECT CAST(id AS CHAR) FROM admin_users WHERE username = ? LIMIT 1")
                .bind(&admin.username)
                .fetch_optional(&mut conn)
                .await
                .map_err(|e| describe_error(db, &e))?;
        if existing.is_some() {
            let _ = conn.close().await;
            return Ok(ProvisionOutcome::AlreadyExists);
        }

        // bcrypt blocks for a noticeable time at the default cost.
        let password = admin.password.clone();
        let cost = self.cost;
        let hash = tokio::task::spawn_blocking(move || hash_password(&password, cost))
            .await
            .map_err(|e| {
                CollaboratorError::new(
                    "The administrator password could not be hashed.",
                    format!("hash worker failed: {}", e),
                )
            })??;

        let id = uuid::Uuid::new_v4().to_string();
        sqlx::query(INSERT_ADMIN)
            .bind(&id)
            .bind(&admin.username)
            .bind(&hash)
            .bind(ADMIN_ROLE)
            .bind(&admin.display_name)
            .bind(admin.email.as_deref())
            .execute(&mut conn)
            .await
            .map_err(|e| {
                let mut err = describe_error(db, &e);
                err.message = format!("The administrator account could not be created: {}", err.message);
                err
            })?;
        let _ = conn.close().await;

        info!(
            "[PHASE: database] [STEP: admin] Administrator inserted (id={}, username={}, role={})",
            id, admin.username, ADMIN_ROLE
        );
        Ok(ProvisionOutcome::Created)
    }
}
