use crate::database::models::{notes_from_json, notes_to_json, PendingVariant};
use crate::database::DatabaseError;
use rusqlite::{params, Connection, Row};

/// Access to the `pending_variants` queue. One row per file; attaching or
/// overriding a variant deletes its row.
pub struct PendingVariantRepository<'a> {
    conn: &'a Connection,
}

impl<'a> PendingVariantRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    #[allow(clippy::type_complexity)]
    fn from_row(
        row: &Row<'_>,
    ) -> rusqlite::Result<(String, String, String, String, Option<String>, Option<String>, String, String)>
    {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
            row.get(6)?,
            row.get(7)?,
        ))
    }

    #[allow(clippy::type_complexity)]
    fn collect(
        rows: impl Iterator<
            Item = rusqlite::Result<(
                String,
                String,
                String,
                String,
                Option<String>,
                Option<String>,
                String,
                String,
            )>,
        >,
    ) -> Result<Vec<PendingVariant>, DatabaseError> {
        let mut variants = Vec::new();
        for row in rows {
            let (file_sha256, source, role_raw, join_key, fastfoto_token, img_token, notes_raw, created_at) =
                row?;
            let Some(role) = crate::database::models::VariantRole::parse(&role_raw) else {
                log::warn!("pending row with unknown role {:?} skipped", role_raw);
                continue;
            };
            variants.push(PendingVariant {
                file_sha256,
                source,
                role,
                join_key,
                fastfoto_token,
                img_token,
                notes: notes_from_json(&notes_raw),
                created_at,
            });
        }
        Ok(variants)
    }

    pub fn upsert(&self, variant: &PendingVariant) -> Result<(), DatabaseError> {
        self.conn.execute(
            "INSERT INTO pending_variants
                (file_sha256, source, role, join_key, fastfoto_token, img_token, notes, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(file_sha256) DO UPDATE SET
                source = excluded.source,
                role = excluded.role,
                join_key = excluded.join_key,
                fastfoto_token = excluded.fastfoto_token,
                img_token = excluded.img_token,
                notes = excluded.notes",
            params![
                variant.file_sha256,
                variant.source,
                variant.role.as_str(),
                variant.join_key,
                variant.fastfoto_token,
                variant.img_token,
                notes_to_json(&variant.notes),
                variant.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn delete(&self, file_sha256: &str) -> Result<bool, DatabaseError> {
        let deleted = self.conn.execute(
            "DELETE FROM pending_variants WHERE file_sha256 = ?1",
            params![file_sha256],
        )?;
        Ok(deleted > 0)
    }

    pub fn find_by_sha256(&self, file_sha256: &str) -> Result<Option<PendingVariant>, DatabaseError> {
        let mut stmt = self.conn.prepare(
            "SELECT file_sha256, source, role, join_key, fastfoto_token, img_token, notes, created_at
             FROM pending_variants WHERE file_sha256 = ?1",
        )?;
        let rows = stmt.query_map(params![file_sha256], Self::from_row)?;
        let mut variants = Self::collect(rows)?;
        Ok(variants.pop())
    }

    pub fn all(&self) -> Result<Vec<PendingVariant>, DatabaseError> {
        let mut stmt = self.conn.prepare(
            "SELECT file_sha256, source, role, join_key, fastfoto_token, img_token, notes, created_at
             FROM pending_variants ORDER BY source, file_sha256",
        )?;
        let rows = stmt.query_map([], Self::from_row)?;
        Self::collect(rows)
    }

    pub fn all_for_source(&self, source: &str) -> Result<Vec<PendingVariant>, DatabaseError> {
        let mut stmt = self.conn.prepare(
            "SELECT file_sha256, source, role, join_key, fastfoto_token, img_token, notes, created_at
             FROM pending_variants WHERE source = ?1 ORDER BY file_sha256",
        )?;
        let rows = stmt.query_map(params![source], Self::from_row)?;
        Self::collect(rows)
    }

    /// Same-source rows a live group can claim: matching fastfoto token,
    /// matching join key, or an img token carried by one of the group's
    /// front candidates.
    pub fn find_attachable(
        &self,
        source: &str,
        fastfoto_token: Option<&str>,
        join_key: &str,
        img_tokens: &[String],
    ) -> Result<Vec<PendingVariant>, DatabaseError> {
        let rows = self.all_for_source(source)?;
        Ok(rows
            .into_iter()
            .filter(|row| {
                if let (Some(token), Some(row_token)) = (fastfoto_token, row.fastfoto_token.as_deref())
                {
                    if token == row_token {
                        return true;
                    }
                }
                if row.join_key == join_key {
                    return true;
                }
                if let Some(img) = row.img_token.as_deref() {
                    if img_tokens.iter().any(|t| t == img) {
                        return true;
                    }
                }
                false
            })
            .collect())
    }
}
