//! Database module for SQLite persistence using SeaORM

pub mod entities;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sea_orm::{
    ConnectionTrait, DatabaseConnection, DbErr, RuntimeErr, SqlxSqliteConnector, Statement,
};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Initialize database connection and create tables
pub async fn init_database(db_path: &Path) -> Result<DatabaseConnection, DbErr> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).ok();
    }

    tracing::info!("Connecting to database: {}", db_path.display());

    // Foreign keys are a per-connection pragma in SQLite, so set them on
    // every pooled connection or the ON DELETE actions never run
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .connect_with(options)
        .await
        .map_err(|e| DbErr::Conn(RuntimeErr::SqlxError(e)))?;
    let db = SqlxSqliteConnector::from_sqlx_sqlite_pool(pool);

    create_tables(&db).await?;

    Ok(db)
}

/// Seconds since the Unix epoch, used for created/updated columns
pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

async fn exec(db: &DatabaseConnection, sql: &str) -> Result<(), DbErr> {
    db.execute(Statement::from_string(db.get_database_backend(), sql.to_string()))
        .await?;
    Ok(())
}

/// Create all tables if they don't exist
async fn create_tables(db: &DatabaseConnection) -> Result<(), DbErr> {
    // Designs: one row per model type key. The UNIQUE constraint on key is
    // what makes concurrent first resolution safe.
    exec(
        db,
        r#"
        CREATE TABLE IF NOT EXISTS designs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            key TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL,
            description TEXT,
            material_category TEXT NOT NULL,
            preview_image_path TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .await?;

    // Catalogue entries (non-owning reference to the design)
    exec(
        db,
        r#"
        CREATE TABLE IF NOT EXISTS model_types (
            key TEXT PRIMARY KEY,
            display_title TEXT NOT NULL,
            material_category TEXT NOT NULL,
            design_id INTEGER,
            FOREIGN KEY (design_id) REFERENCES designs(id) ON DELETE SET NULL
        )
        "#,
    )
    .await?;

    // Asset files owned by a design
    exec(
        db,
        r#"
        CREATE TABLE IF NOT EXISTS asset_files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            design_id INTEGER NOT NULL,
            relative_path TEXT NOT NULL,
            kind TEXT NOT NULL,
            is_primary INTEGER NOT NULL DEFAULT 0,
            sort_order INTEGER NOT NULL DEFAULT 0,
            original_file_name TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            size INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (design_id) REFERENCES designs(id) ON DELETE CASCADE
        )
        "#,
    )
    .await?;

    exec(
        db,
        r#"CREATE INDEX IF NOT EXISTS idx_asset_files_design ON asset_files(design_id, kind, sort_order)"#,
    )
    .await?;

    tracing::info!("Database tables initialized");
    Ok(())
}
