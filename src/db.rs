use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

/// One animal as read from the listing, bounded and ready to persist.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedRecord {
    pub name: String,
    pub breed: String,
    pub age: String,
    pub gender: String,
    pub shelter_name: String,
    pub external_id: String,
    pub deadline_date: NaiveDate,
    pub days_until_deadline: i64,
    pub shelter_priority_rank: u32,
    pub photo_source_url: Option<String>,
    pub detail_url: String,
    pub description: String,
    pub source_tag: String,
    pub category: String,
    pub goal_amount: f64,
    pub rescue_only: bool,
    pub intake_date: Option<NaiveDate>,
    pub list_date: Option<NaiveDate>,
}

/// A stored animal row. Dates and timestamps stay as stored text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersistedRecord {
    pub id: i64,
    pub source: String,
    pub external_id: String,
    pub name: String,
    pub breed: String,
    pub age: String,
    pub gender: String,
    pub shelter: String,
    pub shelter_rank: u32,
    pub deadline: String,
    pub photo_url: String,
    pub detail_url: String,
    pub description: String,
    pub category: String,
    pub goal_amount: f64,
    pub rescue_only: bool,
    pub intake_date: Option<String>,
    pub list_date: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Updated,
}

/// The two writes the reconciler needs. Both are idempotent.
pub trait RecordStore: Send + Sync {
    /// Insert on first sight of `(source_tag, external_id)`, otherwise
    /// overwrite every mutable column. `created_at` is only ever written here
    /// on insert.
    fn upsert_by_source_and_external_id(
        &self,
        record: &NormalizedRecord,
        photo_url: &str,
        seen_at: DateTime<Utc>,
    ) -> Result<Upsert>;

    /// Delete every row for `source_tag` whose external id is not in `keep_ids`.
    fn delete_by_source_except_ids(&self, source_tag: &str, keep_ids: &[String]) -> Result<usize>;
}

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create database directory {:?}", dir))?;
    }
    let conn = Connection::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS animals (
            id            INTEGER PRIMARY KEY,
            source        TEXT NOT NULL,
            external_id   TEXT NOT NULL,
            name          TEXT NOT NULL,
            breed         TEXT NOT NULL,
            age           TEXT NOT NULL,
            gender        TEXT NOT NULL,
            shelter       TEXT NOT NULL,
            shelter_rank  INTEGER NOT NULL DEFAULT 99,
            deadline      TEXT NOT NULL,
            photo_url     TEXT NOT NULL,
            detail_url    TEXT NOT NULL,
            description   TEXT NOT NULL,
            category      TEXT NOT NULL,
            goal_amount   REAL NOT NULL,
            rescue_only   BOOLEAN NOT NULL DEFAULT 0,
            intake_date   TEXT,
            list_date     TEXT,
            created_at    TEXT NOT NULL,
            updated_at    TEXT NOT NULL,
            UNIQUE(source, external_id)
        );
        CREATE INDEX IF NOT EXISTS idx_animals_order ON animals(shelter_rank, deadline);
        ",
    )?;
    Ok(())
}

fn timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn day(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

// ── SQLite store ──

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        Self::from_connection(connect(path)?)
    }

    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database connection lock poisoned"))
    }

    #[cfg(test)]
    pub fn get(&self, source: &str, external_id: &str) -> Result<Option<PersistedRecord>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!("{} WHERE source = ?1 AND external_id = ?2", SELECT_RECORD),
                rusqlite::params![source, external_id],
                read_record,
            )
            .optional()?;
        Ok(row)
    }

    /// Rows ordered the way they are displayed: rank, then nearest deadline.
    pub fn fetch_records(&self, source: Option<&str>, limit: usize) -> Result<Vec<PersistedRecord>> {
        let conn = self.lock()?;
        let sql = format!(
            "{}{} ORDER BY shelter_rank, deadline, external_id LIMIT {}",
            SELECT_RECORD,
            if source.is_some() { " WHERE source = ?1" } else { "" },
            limit
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = match source {
            Some(s) => stmt.query_map([s], read_record)?.collect::<Result<Vec<_>, _>>()?,
            None => stmt.query_map([], read_record)?.collect::<Result<Vec<_>, _>>()?,
        };
        Ok(rows)
    }

    #[cfg(test)]
    pub fn count(&self, source: &str) -> Result<usize> {
        let conn = self.lock()?;
        let n = conn.query_row(
            "SELECT COUNT(*) FROM animals WHERE source = ?1",
            [source],
            |r| r.get(0),
        )?;
        Ok(n)
    }

    pub fn get_stats(&self, fallback_photo: &str) -> Result<Vec<SourceStats>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT source,
                    COUNT(*),
                    SUM(CASE WHEN photo_url = ?1 THEN 1 ELSE 0 END),
                    SUM(CASE WHEN rescue_only THEN 1 ELSE 0 END),
                    MIN(deadline),
                    MAX(updated_at)
             FROM animals
             GROUP BY source
             ORDER BY source",
        )?;
        let rows = stmt
            .query_map([fallback_photo], |row| {
                Ok(SourceStats {
                    source: row.get(0)?,
                    total: row.get(1)?,
                    fallback_photos: row.get(2)?,
                    rescue_only: row.get(3)?,
                    next_deadline: row.get(4)?,
                    last_updated: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

impl RecordStore for SqliteStore {
    fn upsert_by_source_and_external_id(
        &self,
        r: &NormalizedRecord,
        photo_url: &str,
        seen_at: DateTime<Utc>,
    ) -> Result<Upsert> {
        let conn = self.lock()?;
        let now = timestamp(seen_at);
        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM animals WHERE source = ?1 AND external_id = ?2",
                rusqlite::params![r.source_tag, r.external_id],
                |row| row.get(0),
            )
            .optional()?;

        match existing {
            None => {
                conn.execute(
                    "INSERT INTO animals
                     (source, external_id, name, breed, age, gender, shelter, shelter_rank,
                      deadline, photo_url, detail_url, description, category, goal_amount,
                      rescue_only, intake_date, list_date, created_at, updated_at)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?18)",
                    rusqlite::params![
                        r.source_tag, r.external_id, r.name, r.breed, r.age, r.gender,
                        r.shelter_name, r.shelter_priority_rank, day(r.deadline_date), photo_url,
                        r.detail_url, r.description, r.category, r.goal_amount, r.rescue_only,
                        r.intake_date.map(day), r.list_date.map(day), now,
                    ],
                )?;
                Ok(Upsert::Inserted)
            }
            Some(id) => {
                conn.execute(
                    "UPDATE animals SET
                        name = ?2, breed = ?3, age = ?4, gender = ?5, shelter = ?6,
                        shelter_rank = ?7, deadline = ?8, photo_url = ?9, detail_url = ?10,
                        description = ?11, category = ?12, goal_amount = ?13,
                        rescue_only = ?14, intake_date = ?15, list_date = ?16, updated_at = ?17
                     WHERE id = ?1",
                    rusqlite::params![
                        id, r.name, r.breed, r.age, r.gender, r.shelter_name,
                        r.shelter_priority_rank, day(r.deadline_date), photo_url, r.detail_url,
                        r.description, r.category, r.goal_amount, r.rescue_only,
                        r.intake_date.map(day), r.list_date.map(day), now,
                    ],
                )?;
                Ok(Upsert::Updated)
            }
        }
    }

    fn delete_by_source_except_ids(&self, source_tag: &str, keep_ids: &[String]) -> Result<usize> {
        let conn = self.lock()?;
        if keep_ids.is_empty() {
            let n = conn.execute("DELETE FROM animals WHERE source = ?1", [source_tag])?;
            return Ok(n);
        }

        let placeholders = (2..keep_ids.len() + 2)
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(",");
        let sql = format!(
            "DELETE FROM animals WHERE source = ?1 AND external_id NOT IN ({})",
            placeholders
        );
        let params = std::iter::once(source_tag).chain(keep_ids.iter().map(String::as_str));
        let n = conn.execute(&sql, rusqlite::params_from_iter(params))?;
        Ok(n)
    }
}

const SELECT_RECORD: &str = "SELECT id, source, external_id, name, breed, age, gender, shelter,
        shelter_rank, deadline, photo_url, detail_url, description, category, goal_amount,
        rescue_only, intake_date, list_date, created_at, updated_at
     FROM animals";

fn read_record(row: &rusqlite::Row) -> rusqlite::Result<PersistedRecord> {
    Ok(PersistedRecord {
        id: row.get(0)?,
        source: row.get(1)?,
        external_id: row.get(2)?,
        name: row.get(3)?,
        breed: row.get(4)?,
        age: row.get(5)?,
        gender: row.get(6)?,
        shelter: row.get(7)?,
        shelter_rank: row.get(8)?,
        deadline: row.get(9)?,
        photo_url: row.get(10)?,
        detail_url: row.get(11)?,
        description: row.get(12)?,
        category: row.get(13)?,
        goal_amount: row.get(14)?,
        rescue_only: row.get(15)?,
        intake_date: row.get(16)?,
        list_date: row.get(17)?,
        created_at: row.get(18)?,
        updated_at: row.get(19)?,
    })
}

// ── Stats ──

pub struct SourceStats {
    pub source: String,
    pub total: usize,
    pub fallback_photos: usize,
    pub rescue_only: usize,
    pub next_deadline: Option<String>,
    pub last_updated: Option<String>,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;

    pub(crate) fn record(id: &str, shelter: &str, rank: u32) -> NormalizedRecord {
        NormalizedRecord {
            name: "BUDDY".into(),
            breed: "Lab".into(),
            age: "2 years".into(),
            gender: "Male".into(),
            shelter_name: shelter.into(),
            external_id: id.into(),
            deadline_date: NaiveDate::from_ymd_opt(2026, 10, 20).unwrap(),
            days_until_deadline: 2,
            shelter_priority_rank: rank,
            photo_source_url: None,
            detail_url: format!("https://petharbor.com/pet.asp?uaid={}", &id[1..]),
            description: "BUDDY is on the euthanasia list.".into(),
            source_tag: "petharbor".into(),
            category: "general".into(),
            goal_amount: 500.0,
            rescue_only: false,
            intake_date: None,
            list_date: None,
        }
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, hour, 0, 0).unwrap()
    }

    #[test]
    fn insert_then_update_keeps_created_at() {
        let store = SqliteStore::in_memory().unwrap();
        let mut r = record("A1234567", "SOUTH LA", 1);

        let first = store.upsert_by_source_and_external_id(&r, "/dog-images/A1234567.jpg", at(1)).unwrap();
        assert_eq!(first, Upsert::Inserted);
        let created = store.get("petharbor", "A1234567").unwrap().unwrap().created_at;

        r.deadline_date = NaiveDate::from_ymd_opt(2026, 10, 25).unwrap();
        let second = store.upsert_by_source_and_external_id(&r, "/dog-images/A1234567.jpg", at(2)).unwrap();
        assert_eq!(second, Upsert::Updated);

        let row = store.get("petharbor", "A1234567").unwrap().unwrap();
        assert_eq!(row.created_at, created);
        assert_ne!(row.updated_at, created);
        assert_eq!(row.deadline, "2026-10-25");
        assert_eq!(store.count("petharbor").unwrap(), 1);
    }

    #[test]
    fn same_id_in_other_source_is_separate() {
        let store = SqliteStore::in_memory().unwrap();
        let a = record("A1234567", "SOUTH LA", 1);
        let mut b = a.clone();
        b.source_tag = "other".into();

        store.upsert_by_source_and_external_id(&a, "x", at(1)).unwrap();
        assert_eq!(
            store.upsert_by_source_and_external_id(&b, "x", at(1)).unwrap(),
            Upsert::Inserted
        );
    }

    #[test]
    fn delete_keeps_listed_ids_and_other_sources() {
        let store = SqliteStore::in_memory().unwrap();
        for id in ["A1111111", "A2222222", "A3333333"] {
            store.upsert_by_source_and_external_id(&record(id, "HARBOR", 6), "x", at(1)).unwrap();
        }
        let mut foreign = record("A1111111", "HARBOR", 6);
        foreign.source_tag = "other".into();
        store.upsert_by_source_and_external_id(&foreign, "x", at(1)).unwrap();

        let deleted = store
            .delete_by_source_except_ids("petharbor", &["A2222222".to_string()])
            .unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.count("petharbor").unwrap(), 1);
        assert_eq!(store.count("other").unwrap(), 1);

        // Idempotent.
        assert_eq!(
            store.delete_by_source_except_ids("petharbor", &["A2222222".to_string()]).unwrap(),
            0
        );
    }

    #[test]
    fn delete_with_empty_keep_set_clears_source() {
        let store = SqliteStore::in_memory().unwrap();
        store.upsert_by_source_and_external_id(&record("A1111111", "HARBOR", 6), "x", at(1)).unwrap();
        assert_eq!(store.delete_by_source_except_ids("petharbor", &[]).unwrap(), 1);
    }

    #[test]
    fn records_come_back_in_display_order() {
        let store = SqliteStore::in_memory().unwrap();
        store.upsert_by_source_and_external_id(&record("A2222222", "HARBOR", 6), "x", at(1)).unwrap();
        store.upsert_by_source_and_external_id(&record("A1111111", "SOUTH LA", 1), "x", at(1)).unwrap();

        let rows = store.fetch_records(Some("petharbor"), 10).unwrap();
        let ids: Vec<&str> = rows.iter().map(|r| r.external_id.as_str()).collect();
        assert_eq!(ids, ["A1111111", "A2222222"]);
    }

    #[test]
    fn stats_count_fallback_photos() {
        let store = SqliteStore::in_memory().unwrap();
        store.upsert_by_source_and_external_id(&record("A1111111", "HARBOR", 6), "fallback", at(1)).unwrap();
        store.upsert_by_source_and_external_id(&record("A2222222", "HARBOR", 6), "/dog-images/A2222222.jpg", at(1)).unwrap();

        let stats = store.get_stats("fallback").unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].total, 2);
        assert_eq!(stats[0].fallback_photos, 1);
        assert_eq!(stats[0].next_deadline.as_deref(), Some("2026-10-20"));
    }
}
