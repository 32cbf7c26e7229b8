use std::{env, fs, path::Path};

use sqlx::SqlitePool;

use crate::auth::hash_password;
use crate::models::{NewUser, Role};
use crate::storage::{Storage, StoreError};

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

pub fn ensure_sqlite_dir(db_url: &str) -> std::io::Result<()> {
    let path = if let Some(path) = db_url.strip_prefix("sqlite://") {
        Some(path)
    } else if let Some(path) = db_url.strip_prefix("sqlite:") {
        Some(path)
    } else {
        None
    };

    let Some(path) = path else {
        return Ok(());
    };

    let path = path.split('?').next().unwrap_or(path);
    if path == ":memory:" || path.is_empty() {
        return Ok(());
    }

    let path = path.strip_prefix("file:").unwrap_or(path);
    let db_path = Path::new(path);
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Creates the initial admin account when no admin exists yet, from
/// `ADMIN_USER` / `ADMIN_PASSWORD` / `ADMIN_EMAIL`.
pub async fn seed_admin(store: &dyn Storage) -> Result<(), StoreError> {
    if !store.list_users_by_role(Role::Admin).await?.is_empty() {
        return Ok(());
    }

    let username = env::var("ADMIN_USER").unwrap_or_else(|_| "admin".to_string());
    let password = env::var("ADMIN_PASSWORD").unwrap_or_else(|_| "admin".to_string());
    let email = env::var("ADMIN_EMAIL").unwrap_or_else(|_| "admin@localhost".to_string());

    if password == "admin" {
        log::warn!(
            "ADMIN_PASSWORD not set. Using default password 'admin'. Set ADMIN_PASSWORD in production."
        );
    }

    let password_hash =
        hash_password(&password).map_err(|err| StoreError::Database(err.to_string()))?;

    store
        .create_user(NewUser {
            username,
            email,
            phone: None,
            role: Role::Admin,
            password_hash,
            metadata: None,
        })
        .await?;
    Ok(())
}
