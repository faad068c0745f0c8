use crate::database::models::File;
use crate::database::DatabaseError;
use rusqlite::{params, Connection, Row};

/// Read/write access to the `files` table. Rows are produced by the
/// external scanner; this engine only ever reads them back.
pub struct FileRepository<'a> {
    conn: &'a Connection,
}

impl<'a> FileRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<File> {
        Ok(File {
            sha256: row.get(0)?,
            path: row.get(1)?,
            original_filename: row.get(2)?,
            original_relpath: row.get(3)?,
            width: row.get(4)?,
            height: row.get(5)?,
            size: row.get(6)?,
            source: row.get(7)?,
        })
    }

    pub fn upsert(&self, file: &File) -> Result<(), DatabaseError> {
        self.conn.execute(
            "INSERT INTO files (sha256, path, original_filename, original_relpath,
                                width, height, size, source)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(sha256) DO UPDATE SET
                path = excluded.path,
                original_filename = excluded.original_filename,
                original_relpath = excluded.original_relpath,
                width = excluded.width,
                height = excluded.height,
                size = excluded.size,
                source = excluded.source",
            params![
                file.sha256,
                file.path,
                file.original_filename,
                file.original_relpath,
                file.width,
                file.height,
                file.size,
                file.source,
            ],
        )?;
        Ok(())
    }

    pub fn find_by_sha256(&self, sha256: &str) -> Result<Option<File>, DatabaseError> {
        let mut stmt = self.conn.prepare(
            "SELECT sha256, path, original_filename, original_relpath,
                    width, height, size, source
             FROM files WHERE sha256 = ?1",
        )?;
        let mut rows = stmt.query_map(params![sha256], Self::from_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// All files for a source, ordered by original_relpath for
    /// deterministic candidate ordering.
    pub fn all_for_source(&self, source: &str) -> Result<Vec<File>, DatabaseError> {
        let mut stmt = self.conn.prepare(
            "SELECT sha256, path, original_filename, original_relpath,
                    width, height, size, source
             FROM files WHERE source = ?1
             ORDER BY original_relpath",
        )?;
        let rows = stmt.query_map(params![source], Self::from_row)?;
        let mut files = Vec::new();
        for row in rows {
            files.push(row?);
        }
        Ok(files)
    }
}
