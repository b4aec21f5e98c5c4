//! Mock authentication service for integration testing
//!
//! This binary serves the HTTP surface the harness drives, backed by a
//! SQLite file with the same token tables the real service keeps, so the
//! harness can be tested without the real backend.
//!
//! Environment:
//! - `BACKEND_URL`: `host:port` to listen on
//! - `MOCK_SERVICE_DB`: store path (default `db.sqlite`)
//! - `MOCK_SERVICE_FAULTS`: comma list of injected faults
//!   (`wrong_account_id`, `drop_verification_token`, `resend_accepts`)

use std::sync::Arc;

use auth_e2e::common::config::ServiceEndpoint;
use auth_e2e::{Error, Result};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use uuid::Uuid;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    email TEXT NOT NULL UNIQUE,
    password TEXT NOT NULL,
    first_name TEXT NOT NULL,
    last_name TEXT NOT NULL,
    gender TEXT NOT NULL,
    points INTEGER NOT NULL DEFAULT 0,
    verified INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS sessions (
    jwt TEXT PRIMARY KEY,
    user_id INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS verifications (
    user_id INTEGER NOT NULL,
    verification_token TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS password_resets (
    user_id INTEGER NOT NULL,
    reset_token TEXT NOT NULL,
    new_password TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS email_updates (
    user_id INTEGER NOT NULL,
    change_token TEXT NOT NULL,
    new_email TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS delete_requests (
    user_id INTEGER NOT NULL,
    delete_token TEXT NOT NULL
);
";

/// Misbehaviours the harness must catch
#[derive(Debug, Default, Clone, Copy)]
struct Faults {
    /// Report an account id one higher than the stored one
    wrong_account_id: bool,
    /// Register without writing the verification row
    drop_verification_token: bool,
    /// Accept a resend while a verification is still pending
    resend_accepts: bool,
}

impl Faults {
    fn parse(value: &str) -> Self {
        let mut faults = Self::default();
        for name in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            match name {
                "wrong_account_id" => faults.wrong_account_id = true,
                "drop_verification_token" => faults.drop_verification_token = true,
                "resend_accepts" => faults.resend_accepts = true,
                other => tracing::warn!(fault = other, "Ignoring unknown fault"),
            }
        }
        faults
    }
}

struct MockService {
    db: Mutex<Connection>,
    faults: Faults,
}

type AppState = Arc<MockService>;

/// Handler failure, rendered as `{"error": ...}`
enum Rejection {
    BadRequest(&'static str),
    NotFound(&'static str),
    Store(rusqlite::Error),
}

impl From<rusqlite::Error> for Rejection {
    fn from(e: rusqlite::Error) -> Self {
        Rejection::Store(e)
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Rejection::BadRequest(message) => (StatusCode::BAD_REQUEST, message.to_string()),
            Rejection::NotFound(message) => (StatusCode::NOT_FOUND, message.to_string()),
            Rejection::Store(e) => {
                tracing::error!("Store error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

type Reply = std::result::Result<Response, Rejection>;

fn ok_empty() -> Reply {
    Ok((StatusCode::OK, Json(json!({}))).into_response())
}

/// Pages behind emailed links are HTML; failures keep a 400 status
fn page(result: std::result::Result<&'static str, &'static str>) -> Response {
    match result {
        Ok(message) => Html(format!("<h1>{}</h1>", message)).into_response(),
        Err(message) => (StatusCode::BAD_REQUEST, Html(format!("<h1>{}</h1>", message)))
            .into_response(),
    }
}

fn new_token() -> String {
    Uuid::new_v4().simple().to_string()
}

#[derive(Deserialize)]
struct Registration {
    email: String,
    plaintext_password: String,
    first_name: String,
    last_name: String,
    gender: String,
}

#[derive(Deserialize)]
struct Credentials {
    email: String,
    plaintext_password: String,
}

#[derive(Deserialize)]
struct Session {
    jwt: String,
}

#[derive(Deserialize)]
struct ByEmail {
    email: String,
}

#[derive(Deserialize)]
struct ById {
    account_id: i64,
}

#[derive(Deserialize)]
struct ByName {
    first_name: String,
    last_name: String,
}

#[derive(Deserialize)]
struct Modification {
    jwt: String,
    new_value: String,
    account_id: i64,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("mock_service=info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    if let Err(e) = run().await {
        eprintln!("mock-service: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let address = std::env::var("BACKEND_URL")
        .map_err(|_| Error::Config("BACKEND_URL is not set".to_string()))?;
    let endpoint = ServiceEndpoint::parse(&address)?;
    let db_path = std::env::var("MOCK_SERVICE_DB").unwrap_or_else(|_| "db.sqlite".to_string());
    let faults = Faults::parse(&std::env::var("MOCK_SERVICE_FAULTS").unwrap_or_default());

    let conn = Connection::open(&db_path)?;
    conn.execute_batch(SCHEMA)?;

    let state = Arc::new(MockService {
        db: Mutex::new(conn),
        faults,
    });

    let listener = tokio::net::TcpListener::bind((endpoint.host.as_str(), endpoint.port)).await?;
    tracing::info!(%endpoint, store = %db_path, ?faults, "Mock service listening");
    axum::serve(listener, router(state)).await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        // Account lifecycle
        .route("/auth/register", post(register))
        .route("/auth/resend_verification/:account_id", post(resend_verification))
        .route("/auth/verify/:token", get(verify))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/retrieve_user", post(retrieve_user))
        .route("/auth/password_reset", post(password_reset))
        .route("/auth/password_reset/verify/:token", get(password_reset_verify))
        .route("/auth/delete_user", post(delete_user))
        .route("/auth/delete_user/verify/:token", get(delete_user_verify))
        // Public lookups
        .route("/user/retrieve/email", post(retrieve_by_email))
        .route("/user/retrieve/id", post(retrieve_by_id))
        .route("/user/retrieve/name", post(retrieve_by_name))
        .route("/user/retrieve/count", get(retrieve_count))
        // Updates
        .route("/user/modify/email/verify/:token", get(modify_email_verify))
        .route("/user/modify/:field", post(modify))
        .with_state(state)
}

// ============================================================================
// Store helpers
// ============================================================================

fn session_user(db: &Connection, jwt: &str) -> rusqlite::Result<Option<i64>> {
    db.query_row(
        "SELECT user_id FROM sessions WHERE jwt = ?1",
        [jwt],
        |row| row.get(0),
    )
    .optional()
}

fn public_profile(db: &Connection, clause: &str, args: &[&dyn rusqlite::ToSql]) -> Reply {
    let sql = format!(
        "SELECT id, email, first_name, last_name, gender, points FROM users WHERE {} LIMIT 1",
        clause
    );
    let profile = db
        .query_row(&sql, args, |row| {
            Ok(json!({
                "account_id": row.get::<_, i64>(0)?,
                "email": row.get::<_, String>(1)?,
                "first_name": row.get::<_, String>(2)?,
                "last_name": row.get::<_, String>(3)?,
                "gender": row.get::<_, String>(4)?,
                "points": row.get::<_, i64>(5)?,
            }))
        })
        .optional()?;

    match profile {
        Some(profile) => Ok(Json(profile).into_response()),
        None => Err(Rejection::BadRequest("no such user")),
    }
}

fn user_by_email(db: &Connection, email: &str) -> rusqlite::Result<Option<i64>> {
    db.query_row("SELECT id FROM users WHERE email = ?1", [email], |row| {
        row.get(0)
    })
    .optional()
}

// ============================================================================
// Account lifecycle
// ============================================================================

async fn register(State(svc): State<AppState>, Json(req): Json<Registration>) -> Reply {
    if req.gender != "m" && req.gender != "f" {
        return Err(Rejection::BadRequest("invalid gender"));
    }

    let db = svc.db.lock().await;
    if user_by_email(&db, &req.email)?.is_some() {
        return Err(Rejection::BadRequest("email already registered"));
    }

    db.execute(
        "INSERT INTO users (email, password, first_name, last_name, gender) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![req.email, req.plaintext_password, req.first_name, req.last_name, req.gender],
    )?;
    let account_id = db.last_insert_rowid();

    if !svc.faults.drop_verification_token {
        db.execute(
            "INSERT INTO verifications (user_id, verification_token) VALUES (?1, ?2)",
            params![account_id, new_token()],
        )?;
    }

    tracing::info!(account_id, "Registered account");
    let reported = if svc.faults.wrong_account_id {
        account_id + 1
    } else {
        account_id
    };
    Ok((StatusCode::CREATED, Json(json!({ "account_id": reported }))).into_response())
}

async fn resend_verification(State(svc): State<AppState>, Path(account_id): Path<i64>) -> Reply {
    let db = svc.db.lock().await;

    let verified: Option<bool> = db
        .query_row("SELECT verified FROM users WHERE id = ?1", [account_id], |row| {
            row.get(0)
        })
        .optional()?;
    match verified {
        None => return Err(Rejection::BadRequest("no such user")),
        Some(true) => return Err(Rejection::BadRequest("already verified")),
        Some(false) => {}
    }

    let pending: i64 = db.query_row(
        "SELECT COUNT(*) FROM verifications WHERE user_id = ?1",
        [account_id],
        |row| row.get(0),
    )?;
    if pending > 0 && !svc.faults.resend_accepts {
        return Err(Rejection::BadRequest("verification already pending"));
    }

    db.execute("DELETE FROM verifications WHERE user_id = ?1", [account_id])?;
    db.execute(
        "INSERT INTO verifications (user_id, verification_token) VALUES (?1, ?2)",
        params![account_id, new_token()],
    )?;
    ok_empty()
}

async fn verify(State(svc): State<AppState>, Path(token): Path<String>) -> Reply {
    let db = svc.db.lock().await;

    let user: Option<i64> = db
        .query_row(
            "SELECT user_id FROM verifications WHERE verification_token = ?1",
            [&token],
            |row| row.get(0),
        )
        .optional()?;
    let Some(user_id) = user else {
        return Ok(page(Err("Verification failed: unknown token")));
    };

    db.execute("UPDATE users SET verified = 1 WHERE id = ?1", [user_id])?;
    db.execute("DELETE FROM verifications WHERE user_id = ?1", [user_id])?;
    Ok(page(Ok("Verification successful")))
}

async fn login(State(svc): State<AppState>, Json(req): Json<Credentials>) -> Reply {
    let db = svc.db.lock().await;

    let user: Option<(i64, bool)> = db
        .query_row(
            "SELECT id, verified FROM users WHERE email = ?1 AND password = ?2",
            params![req.email, req.plaintext_password],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    match user {
        None => Err(Rejection::BadRequest("invalid credentials")),
        Some((_, false)) => Err(Rejection::BadRequest("account not verified")),
        Some((user_id, true)) => {
            let jwt = format!("{}.{}", new_token(), new_token());
            db.execute(
                "INSERT INTO sessions (jwt, user_id) VALUES (?1, ?2)",
                params![jwt, user_id],
            )?;
            Ok(Json(json!({ "jwt": jwt })).into_response())
        }
    }
}

async fn logout(State(svc): State<AppState>, Json(req): Json<Session>) -> Reply {
    let db = svc.db.lock().await;
    if db.execute("DELETE FROM sessions WHERE jwt = ?1", [&req.jwt])? == 0 {
        return Err(Rejection::BadRequest("invalid session"));
    }
    ok_empty()
}

async fn retrieve_user(State(svc): State<AppState>, Json(req): Json<Session>) -> Reply {
    let db = svc.db.lock().await;
    let user_id = session_user(&db, &req.jwt)?.ok_or(Rejection::BadRequest("invalid session"))?;

    let profile = db.query_row(
        "SELECT id, email, first_name, last_name, gender FROM users WHERE id = ?1",
        [user_id],
        |row| {
            Ok(json!({
                "account_id": row.get::<_, i64>(0)?,
                "email": row.get::<_, String>(1)?,
                "first_name": row.get::<_, String>(2)?,
                "last_name": row.get::<_, String>(3)?,
                "gender": row.get::<_, String>(4)?,
            }))
        },
    )?;
    Ok(Json(profile).into_response())
}

async fn password_reset(State(svc): State<AppState>, Json(req): Json<Credentials>) -> Reply {
    let db = svc.db.lock().await;
    let user_id = user_by_email(&db, &req.email)?.ok_or(Rejection::BadRequest("no such user"))?;

    db.execute("DELETE FROM password_resets WHERE user_id = ?1", [user_id])?;
    db.execute(
        "INSERT INTO password_resets (user_id, reset_token, new_password) VALUES (?1, ?2, ?3)",
        params![user_id, new_token(), req.plaintext_password],
    )?;
    ok_empty()
}

async fn password_reset_verify(State(svc): State<AppState>, Path(token): Path<String>) -> Reply {
    let db = svc.db.lock().await;

    let pending: Option<(i64, String)> = db
        .query_row(
            "SELECT user_id, new_password FROM password_resets WHERE reset_token = ?1",
            [&token],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    let Some((user_id, new_password)) = pending else {
        return Ok(page(Err("Password reset failed: unknown token")));
    };

    db.execute(
        "UPDATE users SET password = ?1 WHERE id = ?2",
        params![new_password, user_id],
    )?;
    db.execute("DELETE FROM password_resets WHERE user_id = ?1", [user_id])?;
    db.execute("DELETE FROM sessions WHERE user_id = ?1", [user_id])?;
    Ok(page(Ok("Password reset successful")))
}

async fn delete_user(State(svc): State<AppState>, Json(req): Json<ByEmail>) -> Reply {
    let db = svc.db.lock().await;
    let user_id = user_by_email(&db, &req.email)?.ok_or(Rejection::BadRequest("no such user"))?;

    db.execute("DELETE FROM delete_requests WHERE user_id = ?1", [user_id])?;
    db.execute(
        "INSERT INTO delete_requests (user_id, delete_token) VALUES (?1, ?2)",
        params![user_id, new_token()],
    )?;
    ok_empty()
}

async fn delete_user_verify(State(svc): State<AppState>, Path(token): Path<String>) -> Reply {
    let db = svc.db.lock().await;

    let user: Option<i64> = db
        .query_row(
            "SELECT user_id FROM delete_requests WHERE delete_token = ?1",
            [&token],
            |row| row.get(0),
        )
        .optional()?;
    let Some(user_id) = user else {
        return Ok(page(Err("Account deletion failed: unknown token")));
    };

    for sql in [
        "DELETE FROM sessions WHERE user_id = ?1",
        "DELETE FROM verifications WHERE user_id = ?1",
        "DELETE FROM password_resets WHERE user_id = ?1",
        "DELETE FROM email_updates WHERE user_id = ?1",
        "DELETE FROM delete_requests WHERE user_id = ?1",
        "DELETE FROM users WHERE id = ?1",
    ] {
        db.execute(sql, [user_id])?;
    }
    Ok(page(Ok("Account deletion successful")))
}

// ============================================================================
// Public lookups
// ============================================================================

async fn retrieve_by_email(State(svc): State<AppState>, Json(req): Json<ByEmail>) -> Reply {
    let db = svc.db.lock().await;
    public_profile(&db, "email = ?1", &[&req.email])
}

async fn retrieve_by_id(State(svc): State<AppState>, Json(req): Json<ById>) -> Reply {
    let db = svc.db.lock().await;
    public_profile(&db, "id = ?1", &[&req.account_id])
}

async fn retrieve_by_name(State(svc): State<AppState>, Json(req): Json<ByName>) -> Reply {
    let db = svc.db.lock().await;
    public_profile(
        &db,
        "first_name = ?1 AND last_name = ?2",
        &[&req.first_name, &req.last_name],
    )
}

async fn retrieve_count(State(svc): State<AppState>) -> Reply {
    let db = svc.db.lock().await;
    let count: i64 = db.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
    Ok(Json(Value::from(count)).into_response())
}

// ============================================================================
// Updates
// ============================================================================

async fn modify(
    State(svc): State<AppState>,
    Path(field): Path<String>,
    Json(req): Json<Modification>,
) -> Reply {
    if field == "gender" && req.new_value != "m" && req.new_value != "f" {
        return Err(Rejection::BadRequest("invalid new value"));
    }

    let db = svc.db.lock().await;
    match session_user(&db, &req.jwt)? {
        Some(user_id) if user_id == req.account_id => {}
        _ => return Err(Rejection::BadRequest("not authorized")),
    }

    match field.as_str() {
        "first_name" | "last_name" | "gender" => {
            let sql = format!("UPDATE users SET {} = ?1 WHERE id = ?2", field);
            db.execute(&sql, params![req.new_value, req.account_id])?;
        }
        "password" => {
            db.execute(
                "UPDATE users SET password = ?1 WHERE id = ?2",
                params![req.new_value, req.account_id],
            )?;
            db.execute("DELETE FROM sessions WHERE user_id = ?1", [req.account_id])?;
        }
        "email" => {
            if user_by_email(&db, &req.new_value)?.is_some() {
                return Err(Rejection::BadRequest("email already registered"));
            }
            db.execute("DELETE FROM email_updates WHERE user_id = ?1", [req.account_id])?;
            db.execute(
                "INSERT INTO email_updates (user_id, change_token, new_email) VALUES (?1, ?2, ?3)",
                params![req.account_id, new_token(), req.new_value],
            )?;
        }
        _ => return Err(Rejection::NotFound("no such field")),
    }

    tracing::info!(account_id = req.account_id, %field, "Modified account");
    ok_empty()
}

async fn modify_email_verify(State(svc): State<AppState>, Path(token): Path<String>) -> Reply {
    let db = svc.db.lock().await;

    let pending: Option<(i64, String)> = db
        .query_row(
            "SELECT user_id, new_email FROM email_updates WHERE change_token = ?1",
            [&token],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    let Some((user_id, new_email)) = pending else {
        return Ok(page(Err("Email reset failed: unknown token")));
    };

    db.execute(
        "UPDATE users SET email = ?1 WHERE id = ?2",
        params![new_email, user_id],
    )?;
    db.execute("DELETE FROM email_updates WHERE user_id = ?1", [user_id])?;
    Ok(page(Ok("Email reset successful")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_parsing() {
        let faults = Faults::parse("wrong_account_id, resend_accepts,,bogus");
        assert!(faults.wrong_account_id);
        assert!(faults.resend_accepts);
        assert!(!faults.drop_verification_token);

        let none = Faults::parse("");
        assert!(!none.wrong_account_id && !none.drop_verification_token && !none.resend_accepts);
    }

    #[test]
    fn test_schema_has_token_tables() {
        let db = Connection::open_in_memory().unwrap();
        db.execute_batch(SCHEMA).unwrap();
        for table in ["verifications", "password_resets", "email_updates", "delete_requests"] {
            let count: i64 = db
                .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
                .unwrap();
            assert_eq!(count, 0);
        }
    }

    #[test]
    fn test_public_profile_includes_points() {
        let db = Connection::open_in_memory().unwrap();
        db.execute_batch(SCHEMA).unwrap();
        db.execute(
            "INSERT INTO users (email, password, first_name, last_name, gender) VALUES ('a@b.io', 'p', 'A', 'B', 'm')",
            [],
        )
        .unwrap();

        assert!(public_profile(&db, "email = ?1", &[&"a@b.io"]).is_ok());
        assert!(matches!(
            public_profile(&db, "email = ?1", &[&"x@y.io"]),
            Err(Rejection::BadRequest(_))
        ));
    }
}
