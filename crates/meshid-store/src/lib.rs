//! meshid-store — SQLite-backed [`FaceStore`].
//!
//! People, their photographs (encoded image bytes) and the landmark embedding
//! computed for each photo. Embeddings are stored as little-endian `f32` blobs.
//! The same database keeps persisted settings and a log of recognitions.

use chrono::{Duration, SecondsFormat, Utc};
use image::DynamicImage;
use meshid_core::{FaceStore, Identity, PhotoRecord, StoreError};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::Path;
use thiserror::Error;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS people (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    last_name   TEXT NOT NULL DEFAULT '',
    first_name  TEXT NOT NULL DEFAULT '',
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS person_photos (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    person_id          INTEGER NOT NULL REFERENCES people(id) ON DELETE CASCADE,
    image_data         BLOB NOT NULL,
    image_format       TEXT,
    original_filename  TEXT,
    face_embedding     BLOB,
    created_at         TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS recognition_sessions (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    person_id      INTEGER NOT NULL REFERENCES people(id) ON DELETE CASCADE,
    confidence     REAL NOT NULL,
    recognized_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS settings (
    key         TEXT PRIMARY KEY,
    value       TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_person_photos_person ON person_photos(person_id);
CREATE INDEX IF NOT EXISTS idx_sessions_person_time ON recognition_sessions(person_id, recognized_at);
"#;

#[derive(Error, Debug)]
pub enum Error {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: i64 },
    #[error("corrupt embedding blob: {0} bytes is not a whole number of f32 values")]
    CorruptEmbedding(usize),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Settings key for the persisted acceptance threshold.
pub const SETTING_THRESHOLD: &str = "recognition_threshold";
/// Settings key for the persisted detector minimum confidence.
pub const SETTING_DETECTOR_CONFIDENCE: &str = "min_detection_confidence";

impl From<Error> for StoreError {
    fn from(err: Error) -> Self {
        match err {
            Error::NotFound { kind, id } => StoreError::NotFound { kind, id },
            Error::Io(e) => StoreError::Io(e),
            Error::Image(e) => StoreError::Image(e),
            Error::CorruptEmbedding(len) => {
                StoreError::Corrupt(format!("embedding blob of {len} bytes"))
            }
            Error::Sqlite(e) => StoreError::Backend(Box::new(e)),
        }
    }
}

/// Row counts for status output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub people: u64,
    pub photos: u64,
    pub photos_with_embeddings: u64,
    pub people_with_embeddings: u64,
}

/// Aggregate over logged recognitions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognitionStats {
    pub count: u64,
    /// Mean confidence; 0.0 when nothing was recorded.
    pub avg_confidence: f64,
    pub last_seen: Option<String>,
}

/// SQLite face database.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open or create the database at `path`, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        tracing::info!(path = %path.display(), "opened face database");
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", 1)?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn })
    }

    pub fn add_person(&self, family_name: &str, given_name: &str) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO people (last_name, first_name, created_at) VALUES (?1, ?2, ?3)",
            params![family_name.trim(), given_name.trim(), now()],
        )?;
        let id = self.conn.last_insert_rowid();
        tracing::info!(person_id = id, family_name, given_name, "added person");
        Ok(id)
    }

    pub fn get_person(&self, person_id: i64) -> Result<Option<Identity>> {
        let person = self
            .conn
            .query_row(
                "SELECT id, last_name, first_name FROM people WHERE id = ?1",
                params![person_id],
                decode_identity,
            )
            .optional()?;
        Ok(person)
    }

    /// Delete a person and, by cascade, all of their photos.
    pub fn delete_person(&self, person_id: i64) -> Result<bool> {
        let n = self
            .conn
            .execute("DELETE FROM people WHERE id = ?1", params![person_id])?;
        if n > 0 {
            tracing::info!(person_id, "deleted person");
        }
        Ok(n > 0)
    }

    /// Store encoded image bytes for a person. `image_data` must decode with the
    /// `image` crate; its format is recorded.
    pub fn add_photo(
        &self,
        person_id: i64,
        image_data: &[u8],
        original_filename: Option<&str>,
        embedding: Option<&[f32]>,
    ) -> Result<i64> {
        if self.get_person(person_id)?.is_none() {
            return Err(Error::NotFound {
                kind: "person",
                id: person_id,
            });
        }
        let format = image::guess_format(image_data)?;
        self.conn.execute(
            "INSERT INTO person_photos
                (person_id, image_data, image_format, original_filename, face_embedding, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                person_id,
                image_data,
                format!("{format:?}").to_uppercase(),
                original_filename,
                embedding.map(encode_embedding),
                now(),
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        tracing::info!(person_id, photo_id = id, "added photo");
        Ok(id)
    }

    pub fn add_photo_from_file(&self, person_id: i64, path: impl AsRef<Path>) -> Result<i64> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        let filename = path.file_name().and_then(|n| n.to_str());
        self.add_photo(person_id, &data, filename, None)
    }

    pub fn delete_photo(&self, photo_id: i64) -> Result<bool> {
        let n = self
            .conn
            .execute("DELETE FROM person_photos WHERE id = ?1", params![photo_id])?;
        if n > 0 {
            tracing::info!(photo_id, "deleted photo");
        }
        Ok(n > 0)
    }

    pub fn photo_embedding(&self, photo_id: i64) -> Result<Option<Vec<f32>>> {
        let blob: Option<Option<Vec<u8>>> = self
            .conn
            .query_row(
                "SELECT face_embedding FROM person_photos WHERE id = ?1",
                params![photo_id],
                |row| row.get(0),
            )
            .optional()?;
        match blob {
            None => Err(Error::NotFound {
                kind: "photo",
                id: photo_id,
            }),
            Some(None) => Ok(None),
            Some(Some(bytes)) => decode_embedding(&bytes).map(Some),
        }
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let count = |sql: &str| -> Result<u64> {
            let n: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
            Ok(n.max(0) as u64)
        };
        Ok(StoreStats {
            people: count("SELECT COUNT(*) FROM people")?,
            photos: count("SELECT COUNT(*) FROM person_photos")?,
            photos_with_embeddings: count(
                "SELECT COUNT(*) FROM person_photos WHERE face_embedding IS NOT NULL",
            )?,
            people_with_embeddings: count(
                "SELECT COUNT(DISTINCT person_id) FROM person_photos WHERE face_embedding IS NOT NULL",
            )?,
        })
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM settings WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now()],
        )?;
        tracing::debug!(key, value, "setting saved");
        Ok(())
    }

    /// Log that `person_id` was recognized with `confidence`.
    pub fn add_recognition_session(&self, person_id: i64, confidence: f32) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO recognition_sessions (person_id, confidence, recognized_at) VALUES (?1, ?2, ?3)",
            params![person_id, f64::from(confidence), now()],
        )?;
        let id = self.conn.last_insert_rowid();
        tracing::debug!(person_id, confidence, session_id = id, "recorded recognition");
        Ok(id)
    }

    /// Recognitions within the last `days` days, for one person or everyone.
    pub fn recognition_stats(&self, person_id: Option<i64>, days: u32) -> Result<RecognitionStats> {
        let since = timestamp(Utc::now() - Duration::days(i64::from(days)));
        let (count, avg_confidence, last_seen) = self.conn.query_row(
            "SELECT COUNT(*), COALESCE(AVG(confidence), 0.0), MAX(recognized_at)
             FROM recognition_sessions
             WHERE recognized_at >= ?1 AND (?2 IS NULL OR person_id = ?2)",
            params![since, person_id],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            },
        )?;
        Ok(RecognitionStats {
            count: count.max(0) as u64,
            avg_confidence,
            last_seen,
        })
    }

    fn people(&self) -> Result<Vec<Identity>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, last_name, first_name FROM people ORDER BY id")?;
        let rows = stmt.query_map([], decode_identity)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn photos_of(&self, person_id: i64) -> Result<Vec<PhotoRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, person_id, face_embedding FROM person_photos WHERE person_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![person_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, Option<Vec<u8>>>(2)?,
            ))
        })?;

        let mut photos = Vec::new();
        for row in rows {
            let (id, identity_id, blob) = row?;
            let embedding = blob.map(|b| decode_embedding(&b)).transpose()?;
            photos.push(PhotoRecord {
                id,
                identity_id,
                embedding,
            });
        }
        Ok(photos)
    }

    fn photo_image(&self, photo_id: i64) -> Result<DynamicImage> {
        let data: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT image_data FROM person_photos WHERE id = ?1",
                params![photo_id],
                |row| row.get(0),
            )
            .optional()?;
        let data = data.ok_or(Error::NotFound {
            kind: "photo",
            id: photo_id,
        })?;
        Ok(image::load_from_memory(&data)?)
    }

    fn update_embedding(&self, photo_id: i64, embedding: &[f32]) -> Result<bool> {
        let n = self.conn.execute(
            "UPDATE person_photos SET face_embedding = ?1 WHERE id = ?2",
            params![encode_embedding(embedding), photo_id],
        )?;
        if n > 0 {
            tracing::debug!(photo_id, "updated photo embedding");
        }
        Ok(n > 0)
    }
}

impl FaceStore for SqliteStore {
    fn list_identities(&self) -> std::result::Result<Vec<Identity>, StoreError> {
        Ok(self.people()?)
    }

    fn list_photos(&self, identity_id: i64) -> std::result::Result<Vec<PhotoRecord>, StoreError> {
        Ok(self.photos_of(identity_id)?)
    }

    fn fetch_image(&self, photo_id: i64) -> std::result::Result<DynamicImage, StoreError> {
        Ok(self.photo_image(photo_id)?)
    }

    fn save_embedding(&mut self, photo_id: i64, embedding: &[f32]) -> std::result::Result<bool, StoreError> {
        Ok(self.update_embedding(photo_id, embedding)?)
    }
}

fn decode_identity(row: &rusqlite::Row<'_>) -> rusqlite::Result<Identity> {
    Ok(Identity {
        id: row.get(0)?,
        family_name: row.get(1)?,
        given_name: row.get(2)?,
    })
}

/// Fixed-width UTC timestamps so stored values order correctly as text.
fn timestamp(at: chrono::DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn now() -> String {
    timestamp(Utc::now())
}

fn encode_embedding(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(std::mem::size_of_val(vector));
    for &value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn decode_embedding(blob: &[u8]) -> Result<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return Err(Error::CorruptEmbedding(blob.len()));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshid_core::EMBEDDING_DIM;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(image::RgbImage::from_pixel(width, height, image::Rgb([10, 20, 30])));
        let mut out = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
            .unwrap();
        out
    }

    fn sample_embedding() -> Vec<f32> {
        (0..EMBEDDING_DIM).map(|i| (i as f32 * 0.01).cos()).collect()
    }

    #[test]
    fn test_embedding_blob_roundtrip() {
        let v = vec![1.5f32, -0.25, 0.0, f32::MAX];
        assert_eq!(decode_embedding(&encode_embedding(&v)).unwrap(), v);
    }

    #[test]
    fn test_decode_rejects_partial_value() {
        assert!(matches!(decode_embedding(&[0, 0, 0]), Err(Error::CorruptEmbedding(3))));
    }

    #[test]
    fn test_people_and_photos() {
        let store = SqliteStore::open_in_memory().unwrap();
        let anna = store.add_person(" Ivanova ", "Anna").unwrap();
        let bob = store.add_person("Stone", "").unwrap();

        let p1 = store.add_photo(anna, &png_bytes(8, 8), Some("a.png"), None).unwrap();
        let p2 = store
            .add_photo(anna, &png_bytes(8, 8), None, Some(&sample_embedding()))
            .unwrap();

        let people = store.list_identities().unwrap();
        assert_eq!(people.len(), 2);
        assert_eq!(people[0].family_name, "Ivanova");
        assert_eq!(people[0].display_name(), "Ivanova Anna");
        assert_eq!(people[1].id, bob);

        let photos = store.list_photos(anna).unwrap();
        assert_eq!(photos.len(), 2);
        assert_eq!(photos[0].id, p1);
        assert!(photos[0].embedding.is_none());
        assert_eq!(photos[1].id, p2);
        assert_eq!(photos[1].embedding.as_deref(), Some(sample_embedding().as_slice()));
        assert!(store.list_photos(bob).unwrap().is_empty());
    }

    #[test]
    fn test_add_photo_unknown_person() {
        let store = SqliteStore::open_in_memory().unwrap();
        let err = store.add_photo(42, &png_bytes(4, 4), None, None).unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: "person", id: 42 }));
    }

    #[test]
    fn test_add_photo_rejects_non_image() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = store.add_person("A", "B").unwrap();
        assert!(matches!(
            store.add_photo(id, b"plain text", None, None),
            Err(Error::Image(_))
        ));
    }

    #[test]
    fn test_save_and_fetch() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let id = store.add_person("A", "B").unwrap();
        let photo = store.add_photo(id, &png_bytes(12, 6), None, None).unwrap();

        let image = store.fetch_image(photo).unwrap();
        assert_eq!((image.width(), image.height()), (12, 6));

        assert!(store.save_embedding(photo, &sample_embedding()).unwrap());
        assert_eq!(store.photo_embedding(photo).unwrap(), Some(sample_embedding()));
        assert!(!store.save_embedding(photo + 100, &sample_embedding()).unwrap());
    }

    #[test]
    fn test_fetch_missing_photo() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(matches!(
            store.fetch_image(9),
            Err(StoreError::NotFound { kind: "photo", id: 9 })
        ));
        assert!(matches!(store.photo_embedding(9), Err(Error::NotFound { .. })));
    }

    #[test]
    fn test_delete_person_cascades() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = store.add_person("A", "B").unwrap();
        let photo = store.add_photo(id, &png_bytes(4, 4), None, None).unwrap();

        assert!(store.delete_person(id).unwrap());
        assert!(store.get_person(id).unwrap().is_none());
        assert!(matches!(store.photo_embedding(photo), Err(Error::NotFound { .. })));
        assert!(!store.delete_photo(photo).unwrap());
    }

    #[test]
    fn test_stats() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let a = store.add_person("A", "").unwrap();
        let b = store.add_person("B", "").unwrap();
        let pa = store.add_photo(a, &png_bytes(4, 4), None, None).unwrap();
        store.add_photo(a, &png_bytes(4, 4), None, None).unwrap();
        store.add_photo(b, &png_bytes(4, 4), None, None).unwrap();
        store.save_embedding(pa, &sample_embedding()).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(
            stats,
            StoreStats {
                people: 2,
                photos: 3,
                photos_with_embeddings: 1,
                people_with_embeddings: 1,
            }
        );
    }

    #[test]
    fn test_settings_roundtrip() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.get_setting(SETTING_THRESHOLD).unwrap(), None);

        store.set_setting(SETTING_THRESHOLD, "0.7").unwrap();
        store.set_setting(SETTING_THRESHOLD, "0.75").unwrap();
        store.set_setting(SETTING_DETECTOR_CONFIDENCE, "0.4").unwrap();

        assert_eq!(store.get_setting(SETTING_THRESHOLD).unwrap().as_deref(), Some("0.75"));
        assert_eq!(store.get_setting(SETTING_DETECTOR_CONFIDENCE).unwrap().as_deref(), Some("0.4"));
    }

    #[test]
    fn test_recognition_sessions() {
        let store = SqliteStore::open_in_memory().unwrap();
        let a = store.add_person("A", "").unwrap();
        let b = store.add_person("B", "").unwrap();

        let empty = store.recognition_stats(None, 30).unwrap();
        assert_eq!(empty.count, 0);
        assert_eq!(empty.avg_confidence, 0.0);
        assert!(empty.last_seen.is_none());

        store.add_recognition_session(a, 0.75).unwrap();
        store.add_recognition_session(a, 0.25).unwrap();
        store.add_recognition_session(b, 0.5).unwrap();

        let all = store.recognition_stats(None, 30).unwrap();
        assert_eq!(all.count, 3);
        assert!((all.avg_confidence - 0.5).abs() < 1e-6);
        assert!(all.last_seen.is_some());

        let only_a = store.recognition_stats(Some(a), 30).unwrap();
        assert_eq!(only_a.count, 2);
        assert!((only_a.avg_confidence - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_recognition_stats_window() {
        let store = SqliteStore::open_in_memory().unwrap();
        let a = store.add_person("A", "").unwrap();
        store
            .conn
            .execute(
                "INSERT INTO recognition_sessions (person_id, confidence, recognized_at) VALUES (?1, 0.9, ?2)",
                params![a, timestamp(Utc::now() - Duration::days(40))],
            )
            .unwrap();
        store.add_recognition_session(a, 0.6).unwrap();

        assert_eq!(store.recognition_stats(Some(a), 30).unwrap().count, 1);
        assert_eq!(store.recognition_stats(Some(a), 60).unwrap().count, 2);
    }

    #[test]
    fn test_recognition_session_requires_person() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(matches!(store.add_recognition_session(77, 0.9), Err(Error::Sqlite(_))));

        let a = store.add_person("A", "").unwrap();
        store.add_recognition_session(a, 0.9).unwrap();
        store.delete_person(a).unwrap();
        assert_eq!(store.recognition_stats(None, 30).unwrap().count, 0);
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = std::env::temp_dir().join(format!("meshid-store-test-{}", std::process::id()));
        let path = dir.join("nested").join("faces.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.add_person("A", "B").unwrap();
        }
        let reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(reopened.list_identities().unwrap().len(), 1);
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
