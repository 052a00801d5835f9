// MySQL connection handling and schema installation
//
// Connections are short-lived: one per collaborator call, closed afterwards. Establishing a
// connection is retried for transient network failures only; authentication errors surface at once.

use crate::collaborators::{DatabaseGateway, DatabaseSettings};
use crate::error::CollaboratorError;
use crate::utils::validation::quote_mysql_identifier;
use async_trait::async_trait;
use log::{info, warn};
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlQueryResult};
use sqlx::{ConnectOptions, Connection, Executor};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);
const SCHEMA_FILE: &str = "database/schema.sql";
const SEED_FILE: &str = "database/seed.sql";

fn connect_options(db: &DatabaseSettings, with_database: bool) -> MySqlConnectOptions {
    let opts = MySqlConnectOptions::new()
        .host(&db.host)
        .port(db.port)
        .username(&db.user)
        .password(&db.password)
        .charset("utf8mb4");
    if with_database {
        opts.database(&db.name)
    } else {
        opts
    }
}

/// Translate a driver error into an operator-facing message. Never includes the password.
pub(crate) fn describe_error(db: &DatabaseSettings, e: &sqlx::Error) -> CollaboratorError {
    let internal = format!("{} (host={}, port={}, user={})", e, db.host, db.port, db.user);
    let message = match e {
        sqlx::Error::Database(dbe) => match dbe.code().as_deref() {
            Some("1045") => "Access denied. Check the database user and password.".to_string(),
            Some("1044") => format!(
                "User '{}' is not allowed to use database '{}'.",
                db.user, db.name
            ),
            Some("1049") => format!("Database '{}' does not exist.", db.name),
            _ => format!("The database reported an error: {}", dbe.message()),
        },
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut => format!(
            "Unable to connect to {}:{}. Verify the host, port and network access.",
            db.host, db.port
        ),
        sqlx::Error::Tls(_) => "TLS negotiation with the database server failed.".to_string(),
        _ => "Unable to connect. Verify host, credentials, and network access.".to_string(),
    };
    CollaboratorError::new(message, internal)
}

fn is_transient(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut)
}

/// Open one connection, optionally selecting the configured database.
pub(crate) async fn connect(
    db: &DatabaseSettings,
    with_database: bool,
) -> Result<MySqlConnection, CollaboratorError> {
    let started = Instant::now();
    let opts = connect_options(db, with_database);
    let strategy = ExponentialBackoff::from_millis(250)
        .factor(2)
        .max_delay(Duration::from_secs(2))
        .take(2)
        .map(jitter);

    let attempt = || async {
        match timeout(CONNECT_TIMEOUT, opts.connect()).await {
            Ok(result) => result,
            Err(_) => Err(sqlx::Error::PoolTimedOut),
        }
    };

    let result = RetryIf::start(strategy, attempt, |e: &sqlx::Error| {
        let transient = is_transient(e);
        if transient {
            warn!(
                "[PHASE: database] [STEP: connect] Transient connection failure; retrying (host={}, port={}, error={})",
                db.host, db.port, e
            );
        }
        transient
    })
    .await;

    match result {
        Ok(conn) => {
            info!(
                "[PHASE: database] [STEP: connect] Connected (host={}, port={}, user={}, database={}, duration_ms={})",
                db.host,
                db.port,
                db.user,
                if with_database { db.name.as_str() } else { "-" },
                started.elapsed().as_millis()
            );
            Ok(conn)
        }
        Err(e) => Err(describe_error(db, &e)),
    }
}

/// Run a multi-statement script over the text protocol on one concrete connection.
async fn run_script(conn: &mut MySqlConnection, sql: &str) -> Result<MySqlQueryResult, sqlx::Error> {
    conn.execute(sqlx::raw_sql(sql)).await
}

/// Production gateway: creates the database and imports the bundled SQL files.
pub struct MySqlGateway {
    install_root: PathBuf,
}

impl MySqlGateway {
    pub fn new(install_root: PathBuf) -> Self {
        Self { install_root }
    }

    async fn read_sql(&self, relative: &str) -> Result<Option<String>, CollaboratorError> {
        let path = self.install_root.join(relative);
        match tokio::fs::read_to_string(&path).await {
            Ok(sql) => Ok(Some(sql)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CollaboratorError::new(
                format!("{} could not be read.", relative),
                format!("read {:?}: {}", path, e),
            )),
        }
    }

    async fn import(
        conn: &mut MySqlConnection,
        db: &DatabaseSettings,
        label: &str,
        sql: &str,
    ) -> Result<(), CollaboratorError> {
        let started = Instant::now();
        run_script(conn, sql).await.map_err(|e| {
            let mut err = describe_error(db, &e);
            err.message = format!("Importing {} failed: {}", label, err.message);
            err
        })?;
        info!(
            "[PHASE: database] [STEP: import] Imported {} (bytes={}, duration_ms={})",
            label,
            sql.len(),
            started.elapsed().as_millis()
        );
        Ok(())
    }
}

#[async_trait]
impl DatabaseGateway for MySqlGateway {
    async fn test_connection(&self, db: &DatabaseSettings) -> Result<(), CollaboratorError> {
        let mut conn = connect(db, false).await?;
        conn.ping().await.map_err(|e| describe_error(db, &e))?;
        let _ = conn.close().await;
        Ok(())
    }

    async fn apply(&self, db: &DatabaseSettings) -> Result<(), CollaboratorError> {
        let schema = self.read_sql(SCHEMA_FILE).await?.ok_or_else(|| {
            CollaboratorError::new(
                format!("The bundle does not contain {}.", SCHEMA_FILE),
                format!("missing {:?}", self.install_root.join(SCHEMA_FILE)),
            )
        })?;

        let mut server = connect(db, false).await?;
        let create = format!(
            "CREATE DATABASE IF NOT EXISTS {} CHARACTER SET utf8mb4 COLLATE utf8mb4_general_ci",
            quote_mysql_identifier(&db.name)
        );
        run_script(&mut server, &create)
            .await
            .map_err(|e| describe_error(db, &e))?;
        let _ = server.close().await;

        let mut conn = connect(db, true).await?;
        Self::import(&mut conn, db, SCHEMA_FILE, &schema).await?;

        if db.import_seed {
            match self.read_sql(SEED_FILE).await? {
                Some(seed) => Self::import(&mut conn, db, SEED_FILE, &seed).await?,
                None => warn!(
                    "[PHASE: database] [STEP: import] Seed data requested but {} is missing; skipped",
                    SEED_FILE
                ),
            }
        }
        let _ = conn.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> DatabaseSettings {
        DatabaseSettings {
            host: "db.internal".to_string(),
            port: 3306,
            name: "app".to_string(),
            user: "root".to_string(),
            password: "PASSWORD_SHOULD_NOT_LEAK".to_string(),
            import_seed: false,
        }
    }

    #[test]
    fn io_errors_become_connectivity_messages_without_password() {
        let e = sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        ));
        let err = describe_error(&settings(), &e);
        assert!(err.message.contains("db.internal:3306"), "{}", err.message);
        assert!(!err.message.contains("PASSWORD_SHOULD_NOT_LEAK"));
        assert!(!err.internal_details.contains("PASSWORD_SHOULD_NOT_LEAK"));
        assert!(is_transient(&e));
    }

    #[test]
    fn script_runner_future_is_send() {
        fn assert_send<T: Send>(_: &T) {}
        fn check(conn: &mut MySqlConnection) {
            let script = run_script(conn, "CREATE TABLE t (id INT); INSERT INTO t VALUES (1);");
            assert_send(&script);
        }
        let _ = check;
    }

    #[tokio::test]
    async fn apply_without_schema_file_fails_before_connecting() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = MySqlGateway::new(dir.path().to_path_buf());
        let err = gateway.apply(&settings()).await.unwrap_err();
        assert!(err.message.contains("database/schema.sql"), "{}", err.message);
    }

    #[tokio::test]
    async fn unreachable_server_reports_connectivity() {
        // Port 1 on localhost is closed on any sane test host.
        let mut db = settings();
        db.host = "127.0.0.1".to_string();
        db.port = 1;
        let err = MySqlGateway::new(PathBuf::from("."))
            .test_connection(&db)
            .await
            .unwrap_err();
        assert!(err.message.contains("127.0.0.1:1"), "{}", err.message);
    }
}
