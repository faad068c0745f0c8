pub mod models;
pub mod repositories;

use rusqlite::Connection;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database query error: {0}")]
    Query(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Single-connection store for buckets, variants, pending rows, and join
/// keys. One assignment run per source at a time is an operational
/// invariant; nothing here guards against concurrent mutation.
pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self, DatabaseError> {
        let conn = Connection::open(db_path)?;
        let db = Self { conn };
        db.initialize_schema()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.initialize_schema()?;
        Ok(db)
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    fn initialize_schema(&self) -> Result<(), DatabaseError> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS files (
                sha256 TEXT PRIMARY KEY,
                path TEXT NOT NULL,
                original_filename TEXT NOT NULL,
                original_relpath TEXT NOT NULL,
                width INTEGER NOT NULL DEFAULT 0,
                height INTEGER NOT NULL DEFAULT 0,
                size INTEGER NOT NULL DEFAULT 0,
                source TEXT NOT NULL
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS buckets (
                bucket_id TEXT PRIMARY KEY,
                bucket_prefix TEXT NOT NULL,
                source TEXT NOT NULL,
                preferred_variant TEXT
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS bucket_files (
                bucket_id TEXT NOT NULL,
                file_sha256 TEXT NOT NULL,
                role TEXT NOT NULL,
                is_primary INTEGER NOT NULL DEFAULT 0,
                notes TEXT NOT NULL DEFAULT '[]',
                UNIQUE(bucket_id, role, file_sha256)
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS pending_variants (
                file_sha256 TEXT PRIMARY KEY,
                source TEXT NOT NULL,
                role TEXT NOT NULL,
                join_key TEXT NOT NULL,
                fastfoto_token TEXT,
                img_token TEXT,
                notes TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS bucket_join_keys (
                bucket_id TEXT NOT NULL,
                source TEXT NOT NULL,
                key_type TEXT NOT NULL,
                key_value TEXT NOT NULL,
                UNIQUE(source, key_type, key_value)
            )",
            [],
        )?;

        // Indexes for the read-side lookups
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_files_source ON files(source)",
            [],
        )?;
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_buckets_prefix ON buckets(bucket_prefix)",
            [],
        )?;
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_bucket_files_bucket ON bucket_files(bucket_id)",
            [],
        )?;
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_bucket_files_sha ON bucket_files(file_sha256)",
            [],
        )?;
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_pending_source ON pending_variants(source)",
            [],
        )?;
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_join_keys_bucket ON bucket_join_keys(bucket_id)",
            [],
        )?;

        Ok(())
    }
}
