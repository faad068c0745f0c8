use crate::database::models::{
    notes_from_json, notes_to_json, Bucket, BucketFile, BucketJoinKey, File, JoinKeyType,
    VariantRole,
};
use crate::database::DatabaseError;
use rusqlite::{params, Connection, OptionalExtension, Row};

/// Access to `buckets`, `bucket_files`, and the derived `bucket_join_keys`
/// index. All writes are upserts; join keys are overwritten on conflict
/// (newest write wins) and never deleted.
pub struct BucketRepository<'a> {
    conn: &'a Connection,
}

impl<'a> BucketRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn bucket_from_row(row: &Row<'_>) -> rusqlite::Result<Bucket> {
        Ok(Bucket {
            bucket_id: row.get(0)?,
            bucket_prefix: row.get(1)?,
            source: row.get(2)?,
            preferred_variant: row.get(3)?,
        })
    }

    /// Upsert the bucket row. `preferred_variant` is an operator choice
    /// and survives re-materialization untouched.
    pub fn upsert_bucket(
        &self,
        bucket_id: &str,
        bucket_prefix: &str,
        source: &str,
    ) -> Result<(), DatabaseError> {
        self.conn.execute(
            "INSERT INTO buckets (bucket_id, bucket_prefix, source)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(bucket_id) DO UPDATE SET
                bucket_prefix = excluded.bucket_prefix,
                source = excluded.source",
            params![bucket_id, bucket_prefix, source],
        )?;
        Ok(())
    }

    pub fn set_preferred_variant(
        &self,
        bucket_id: &str,
        preferred_variant: Option<&str>,
    ) -> Result<(), DatabaseError> {
        self.conn.execute(
            "UPDATE buckets SET preferred_variant = ?2 WHERE bucket_id = ?1",
            params![bucket_id, preferred_variant],
        )?;
        Ok(())
    }

    pub fn find_by_id(&self, bucket_id: &str) -> Result<Option<Bucket>, DatabaseError> {
        let bucket = self
            .conn
            .query_row(
                "SELECT bucket_id, bucket_prefix, source, preferred_variant
                 FROM buckets WHERE bucket_id = ?1",
                params![bucket_id],
                Self::bucket_from_row,
            )
            .optional()?;
        Ok(bucket)
    }

    pub fn find_by_prefix(&self, bucket_prefix: &str) -> Result<Vec<Bucket>, DatabaseError> {
        let mut stmt = self.conn.prepare(
            "SELECT bucket_id, bucket_prefix, source, preferred_variant
             FROM buckets WHERE bucket_prefix = ?1 ORDER BY bucket_id",
        )?;
        let rows = stmt.query_map(params![bucket_prefix], Self::bucket_from_row)?;
        let mut buckets = Vec::new();
        for row in rows {
            buckets.push(row?);
        }
        Ok(buckets)
    }

    pub fn all_for_source(&self, source: &str) -> Result<Vec<Bucket>, DatabaseError> {
        let mut stmt = self.conn.prepare(
            "SELECT bucket_id, bucket_prefix, source, preferred_variant
             FROM buckets WHERE source = ?1 ORDER BY bucket_id",
        )?;
        let rows = stmt.query_map(params![source], Self::bucket_from_row)?;
        let mut buckets = Vec::new();
        for row in rows {
            buckets.push(row?);
        }
        Ok(buckets)
    }

    /// `(bucket_prefix, bucket_id)` pairs across all sources, for
    /// prefix-token reconciliation.
    pub fn all_prefixes(&self) -> Result<Vec<(String, String)>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare("SELECT bucket_prefix, bucket_id FROM buckets ORDER BY bucket_id")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut pairs = Vec::new();
        for row in rows {
            pairs.push(row?);
        }
        Ok(pairs)
    }

    /// Replace the full variant list of one bucket. Stale variants from a
    /// previous run disappear; callers wrap this in the materialization
    /// transaction.
    pub fn replace_bucket_files(
        &self,
        bucket_id: &str,
        files: &[BucketFile],
    ) -> Result<(), DatabaseError> {
        self.conn.execute(
            "DELETE FROM bucket_files WHERE bucket_id = ?1",
            params![bucket_id],
        )?;
        for file in files {
            self.conn.execute(
                "INSERT INTO bucket_files (bucket_id, file_sha256, role, is_primary, notes)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(bucket_id, role, file_sha256) DO UPDATE SET
                    is_primary = excluded.is_primary,
                    notes = excluded.notes",
                params![
                    bucket_id,
                    file.file_sha256,
                    file.role.as_str(),
                    file.is_primary as i64,
                    notes_to_json(&file.notes),
                ],
            )?;
        }
        Ok(())
    }

    /// Insert a single variant row, ignoring it when already present.
    /// Returns whether a new row was written.
    pub fn insert_bucket_file_ignore(&self, file: &BucketFile) -> Result<bool, DatabaseError> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO bucket_files (bucket_id, file_sha256, role, is_primary, notes)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                file.bucket_id,
                file.file_sha256,
                file.role.as_str(),
                file.is_primary as i64,
                notes_to_json(&file.notes),
            ],
        )?;
        Ok(inserted > 0)
    }

    pub fn files_for_bucket(&self, bucket_id: &str) -> Result<Vec<BucketFile>, DatabaseError> {
        let mut stmt = self.conn.prepare(
            "SELECT bucket_id, file_sha256, role, is_primary, notes
             FROM bucket_files WHERE bucket_id = ?1 ORDER BY role, file_sha256",
        )?;
        let rows = stmt.query_map(params![bucket_id], |row| {
            let role_raw: String = row.get(2)?;
            let notes_raw: String = row.get(4)?;
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                role_raw,
                row.get::<_, i64>(3)?,
                notes_raw,
            ))
        })?;

        let mut files = Vec::new();
        for row in rows {
            let (bucket_id, file_sha256, role_raw, is_primary, notes_raw) = row?;
            let Some(role) = VariantRole::parse(&role_raw) else {
                log::warn!("bucket_files row with unknown role {:?} skipped", role_raw);
                continue;
            };
            files.push(BucketFile {
                bucket_id,
                file_sha256,
                role,
                is_primary: is_primary != 0,
                notes: notes_from_json(&notes_raw),
            });
        }
        Ok(files)
    }

    /// Whether any bucket already references this file. Attached files are
    /// never re-enqueued as pending.
    pub fn variant_exists(&self, file_sha256: &str) -> Result<bool, DatabaseError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM bucket_files WHERE file_sha256 = ?1",
            params![file_sha256],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn upsert_join_key(&self, key: &BucketJoinKey) -> Result<(), DatabaseError> {
        self.conn.execute(
            "INSERT INTO bucket_join_keys (bucket_id, source, key_type, key_value)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(source, key_type, key_value) DO UPDATE SET
                bucket_id = excluded.bucket_id",
            params![
                key.bucket_id,
                key.source,
                key.key_type.as_str(),
                key.key_value,
            ],
        )?;
        Ok(())
    }

    /// Buckets a key value maps to, across all sources (uniqueness is
    /// per-source, so cross-source collisions surface as ambiguity).
    pub fn buckets_for_key(
        &self,
        key_type: JoinKeyType,
        key_value: &str,
    ) -> Result<Vec<(String, String)>, DatabaseError> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT bucket_id, source FROM bucket_join_keys
             WHERE key_type = ?1 AND key_value = ?2 ORDER BY bucket_id",
        )?;
        let rows = stmt.query_map(params![key_type.as_str(), key_value], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?;
        let mut buckets = Vec::new();
        for row in rows {
            buckets.push(row?);
        }
        Ok(buckets)
    }

    pub fn key_exists(
        &self,
        source: &str,
        key_type: JoinKeyType,
        key_value: &str,
    ) -> Result<bool, DatabaseError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM bucket_join_keys
             WHERE source = ?1 AND key_type = ?2 AND key_value = ?3",
            params![source, key_type.as_str(), key_value],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Every bucket's primary (canonical) file row, joined back to `files`
    /// for filename/path access. Used by the stem-fallback and phash
    /// reconciliation passes.
    pub fn canonical_fronts(&self) -> Result<Vec<(String, File)>, DatabaseError> {
        let mut stmt = self.conn.prepare(
            "SELECT bf.bucket_id, f.sha256, f.path, f.original_filename, f.original_relpath,
                    f.width, f.height, f.size, f.source
             FROM bucket_files bf
             JOIN files f ON f.sha256 = bf.file_sha256
             WHERE bf.is_primary = 1
             ORDER BY bf.bucket_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                File {
                    sha256: row.get(1)?,
                    path: row.get(2)?,
                    original_filename: row.get(3)?,
                    original_relpath: row.get(4)?,
                    width: row.get(5)?,
                    height: row.get(6)?,
                    size: row.get(7)?,
                    source: row.get(8)?,
                },
            ))
        })?;
        let mut fronts = Vec::new();
        for row in rows {
            fronts.push(row?);
        }
        Ok(fronts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::repositories::FileRepository;
    use crate::database::Database;

    fn bucket_file(bucket_id: &str, sha: &str, role: VariantRole, primary: bool) -> BucketFile {
        BucketFile {
            bucket_id: bucket_id.to_string(),
            file_sha256: sha.to_string(),
            role,
            is_primary: primary,
            notes: vec![],
        }
    }

    #[test]
    fn test_upsert_preserves_preferred_variant() {
        let db = Database::open_in_memory().unwrap();
        let repo = BucketRepository::new(db.connection());

        repo.upsert_bucket("aabbccddeeff0011", "aabbccddeeff", "family")
            .unwrap();
        repo.set_preferred_variant("aabbccddeeff0011", Some("sha_of_proxy"))
            .unwrap();

        // Re-materialization upserts the same bucket.
        repo.upsert_bucket("aabbccddeeff0011", "aabbccddeeff", "family")
            .unwrap();

        let bucket = repo.find_by_id("aabbccddeeff0011").unwrap().unwrap();
        assert_eq!(bucket.preferred_variant.as_deref(), Some("sha_of_proxy"));
    }

    #[test]
    fn test_replace_bucket_files_drops_stale_variants() {
        let db = Database::open_in_memory().unwrap();
        let repo = BucketRepository::new(db.connection());
        repo.upsert_bucket("b1", "b1", "family").unwrap();

        repo.replace_bucket_files(
            "b1",
            &[
                bucket_file("b1", "front", VariantRole::RawFront, true),
                bucket_file("b1", "stale", VariantRole::AiFrontV1, false),
            ],
        )
        .unwrap();

        repo.replace_bucket_files(
            "b1",
            &[
                bucket_file("b1", "front", VariantRole::RawFront, true),
                bucket_file("b1", "back", VariantRole::RawBack, false),
            ],
        )
        .unwrap();

        let files = repo.files_for_bucket("b1").unwrap();
        let shas: Vec<&str> = files.iter().map(|f| f.file_sha256.as_str()).collect();
        assert_eq!(shas, vec!["back", "front"]);
        assert!(repo.variant_exists("front").unwrap());
        assert!(!repo.variant_exists("stale").unwrap());
    }

    #[test]
    fn test_join_key_upsert_newest_write_wins() {
        let db = Database::open_in_memory().unwrap();
        let repo = BucketRepository::new(db.connection());

        let mut key = BucketJoinKey {
            bucket_id: "b1".to_string(),
            source: "family".to_string(),
            key_type: JoinKeyType::Fastfoto,
            key_value: "001234".to_string(),
        };
        repo.upsert_join_key(&key).unwrap();

        key.bucket_id = "b2".to_string();
        repo.upsert_join_key(&key).unwrap();

        let buckets = repo.buckets_for_key(JoinKeyType::Fastfoto, "001234").unwrap();
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].0, "b2");
        assert!(repo
            .key_exists("family", JoinKeyType::Fastfoto, "001234")
            .unwrap());
        assert!(!repo
            .key_exists("negatives", JoinKeyType::Fastfoto, "001234")
            .unwrap());
    }

    #[test]
    fn test_cross_source_key_collision_is_visible() {
        let db = Database::open_in_memory().unwrap();
        let repo = BucketRepository::new(db.connection());

        for (bucket, source) in [("b1", "family"), ("b2", "negatives")] {
            repo.upsert_join_key(&BucketJoinKey {
                bucket_id: bucket.to_string(),
                source: source.to_string(),
                key_type: JoinKeyType::ImgToken,
                key_value: "img20230101_1234".to_string(),
            })
            .unwrap();
        }

        let buckets = repo
            .buckets_for_key(JoinKeyType::ImgToken, "img20230101_1234")
            .unwrap();
        assert_eq!(buckets.len(), 2);
    }

    #[test]
    fn test_canonical_fronts_joins_files() {
        let db = Database::open_in_memory().unwrap();
        let files = FileRepository::new(db.connection());
        let repo = BucketRepository::new(db.connection());

        files
            .upsert(&File {
                sha256: "front".to_string(),
                path: "/archive/a.tif".to_string(),
                original_filename: "a.tif".to_string(),
                original_relpath: "batch/a.tif".to_string(),
                width: 100,
                height: 100,
                size: 1,
                source: "family".to_string(),
            })
            .unwrap();
        repo.upsert_bucket("b1", "b1", "family").unwrap();
        repo.replace_bucket_files("b1", &[bucket_file("b1", "front", VariantRole::RawFront, true)])
            .unwrap();

        let fronts = repo.canonical_fronts().unwrap();
        assert_eq!(fronts.len(), 1);
        assert_eq!(fronts[0].0, "b1");
        assert_eq!(fronts[0].1.original_filename, "a.tif");
    }
}
