//! Authoritative feed metadata in a DuckDB `feeds` table.

use super::AccessControl;
use crate::error::{Error, Result};
use crate::models::{FeedField, FeedId, FeedRecord, NewFeed, UserId};
use async_trait::async_trait;
use duckdb::{params, types::Type, Connection, OptionalExt, Row, ToSql};
use std::sync::Arc;
use tokio::sync::Mutex;

const FEED_COLUMNS: &str =
    "id, userid, name, tag, \"public\", size, engine, unit, process_list, \"time\", \"value\"";

fn get_u32(row: &Row<'_>, idx: usize) -> duckdb::Result<u32> {
    let value: i64 = row.get(idx)?;
    u32::try_from(value).map_err(|e| duckdb::Error::FromSqlConversionFailure(idx, Type::BigInt, Box::new(e)))
}

fn record_from_row(row: &Row<'_>) -> duckdb::Result<FeedRecord> {
    let size: i64 = row.get(5)?;
    Ok(FeedRecord {
        id: get_u32(row, 0)?,
        userid: get_u32(row, 1)?,
        name: row.get(2)?,
        tag: row.get(3)?,
        public: row.get(4)?,
        size: size.max(0) as u64,
        engine: get_u32(row, 6)?,
        unit: row.get(7)?,
        process_list: row.get(8)?,
        time: row.get(9)?,
        value: row.get(10)?,
    })
}

fn query_records(conn: &Connection, sql: &str, args: &[&dyn ToSql]) -> Result<Vec<FeedRecord>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(args, record_from_row)?;
    let mut records = Vec::new();
    for row in rows {
        records.push(row?);
    }
    Ok(records)
}

fn update_field(conn: &Connection, id: FeedId, field: &FeedField) -> duckdb::Result<usize> {
    let id = i64::from(id);
    match field {
        FeedField::Name(name) => conn.execute("UPDATE feeds SET name = ? WHERE id = ?", params![name, id]),
        FeedField::Tag(tag) => conn.execute("UPDATE feeds SET tag = ? WHERE id = ?", params![tag, id]),
        FeedField::Unit(unit) => conn.execute("UPDATE feeds SET unit = ? WHERE id = ?", params![unit, id]),
        FeedField::Public(public) => {
            conn.execute("UPDATE feeds SET \"public\" = ? WHERE id = ?", params![public, id])
        }
        FeedField::Size(size) => {
            let size = i64::try_from(*size).unwrap_or(i64::MAX);
            conn.execute("UPDATE feeds SET size = ? WHERE id = ?", params![size, id])
        }
        FeedField::ProcessList(list) => {
            conn.execute("UPDATE feeds SET process_list = ? WHERE id = ?", params![list, id])
        }
        FeedField::LastValue { time, value } => conn.execute(
            "UPDATE feeds SET \"time\" = ?, \"value\" = ? WHERE id = ?",
            params![time, value, id],
        ),
    }
}

/// The relational store every other metadata representation mirrors.
#[derive(Clone)]
pub struct MetadataStore {
    conn: Arc<Mutex<Connection>>,
}

impl MetadataStore {
    /// Opens (and initializes) the store. `":memory:"` selects an in-memory
    /// database.
    pub fn new(connection: &str) -> Result<Self> {
        let conn = if connection == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(connection)?
        };
        conn.execute_batch(
            "CREATE SEQUENCE IF NOT EXISTS feeds_id_seq START 1;
            CREATE TABLE IF NOT EXISTS feeds (
                id BIGINT PRIMARY KEY DEFAULT nextval('feeds_id_seq'),
                userid BIGINT NOT NULL,
                name VARCHAR NOT NULL,
                tag VARCHAR NOT NULL,
                \"public\" BOOLEAN NOT NULL DEFAULT false,
                size BIGINT NOT NULL DEFAULT 0,
                engine BIGINT NOT NULL,
                unit VARCHAR NOT NULL DEFAULT '',
                process_list VARCHAR NOT NULL DEFAULT '',
                \"time\" BIGINT,
                \"value\" DOUBLE
            );
            CREATE INDEX IF NOT EXISTS idx_feeds_userid ON feeds(userid);",
        )
        .map_err(|e| Error::Backend(format!("Failed to create feeds table: {}", e)))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn new_in_memory() -> Result<Self> {
        Self::new(":memory:")
    }

    /// Inserts a feed and returns its new id.
    pub async fn insert(&self, feed: &NewFeed) -> Result<FeedId> {
        let conn = self.conn.lock().await;
        let id: i64 = conn.query_row(
            "INSERT INTO feeds (userid, name, tag, engine, unit) VALUES (?, ?, ?, ?, ?) RETURNING id",
            params![
                i64::from(feed.userid),
                feed.name,
                feed.tag,
                i64::from(feed.engine.id()),
                feed.unit
            ],
            |row| row.get(0),
        )?;
        FeedId::try_from(id).map_err(|_| Error::Backend(format!("Feed id {} out of range", id)))
    }

    pub async fn delete(&self, id: FeedId) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM feeds WHERE id = ?", params![i64::from(id)])?;
        Ok(())
    }

    pub async fn load(&self, id: FeedId) -> Result<Option<FeedRecord>> {
        let conn = self.conn.lock().await;
        let record = conn
            .query_row(
                &format!("SELECT {} FROM feeds WHERE id = ?", FEED_COLUMNS),
                params![i64::from(id)],
                record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// All feeds of an owner, ascending by id.
    pub async fn load_user(&self, userid: UserId) -> Result<Vec<FeedRecord>> {
        let conn = self.conn.lock().await;
        query_records(
            &conn,
            &format!("SELECT {} FROM feeds WHERE userid = ? ORDER BY id", FEED_COLUMNS),
            params![i64::from(userid)],
        )
    }

    pub async fn user_feed_ids(&self, userid: UserId) -> Result<Vec<FeedId>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT id FROM feeds WHERE userid = ? ORDER BY id")?;
        let rows = stmt.query_map(params![i64::from(userid)], |row| get_u32(row, 0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    /// Byte-exact lookup of an owner's `(tag, name)` pair.
    pub async fn find_by_tag_name(&self, userid: UserId, tag: &str, name: &str) -> Result<Option<FeedId>> {
        let conn = self.conn.lock().await;
        let id = conn
            .query_row(
                "SELECT id FROM feeds WHERE userid = ? AND tag = ? AND name = ? ORDER BY id LIMIT 1",
                params![i64::from(userid), tag, name],
                |row| get_u32(row, 0),
            )
            .optional()?;
        Ok(id)
    }

    pub async fn find_by_name(&self, userid: UserId, name: &str) -> Result<Option<FeedId>> {
        let conn = self.conn.lock().await;
        let id = conn
            .query_row(
                "SELECT id FROM feeds WHERE userid = ? AND name = ? ORDER BY id LIMIT 1",
                params![i64::from(userid), name],
                |row| get_u32(row, 0),
            )
            .optional()?;
        Ok(id)
    }

    /// Applies field updates in one transaction. Returns false when the feed
    /// does not exist.
    pub async fn update_fields(&self, id: FeedId, fields: &[FeedField]) -> Result<bool> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let mut touched = 0;
        for field in fields {
            touched += update_field(&tx, id, field)?;
        }
        tx.commit()?;
        Ok(touched > 0 || fields.is_empty())
    }

    pub async fn set_timevalue(&self, id: FeedId, time: i64, value: Option<f64>) -> Result<()> {
        self.update_fields(id, &[FeedField::LastValue { time, value }]).await?;
        Ok(())
    }

    async fn owner_and_visibility(&self, id: FeedId) -> Result<Option<(UserId, bool)>> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT userid, \"public\" FROM feeds WHERE id = ?",
                params![i64::from(id)],
                |row| Ok((get_u32(row, 0)?, row.get::<_, bool>(1)?)),
            )
            .optional()?;
        Ok(row)
    }
}

#[async_trait]
impl AccessControl for MetadataStore {
    async fn owns(&self, userid: UserId, feed: FeedId) -> Result<bool> {
        Ok(matches!(self.owner_and_visibility(feed).await?, Some((owner, _)) if owner == userid))
    }

    async fn may_read(&self, userid: Option<UserId>, feed: FeedId) -> Result<bool> {
        Ok(match self.owner_and_visibility(feed).await? {
            Some((owner, public)) => public || userid == Some(owner),
            None => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EngineKind;

    fn new_feed(userid: UserId, tag: &str, name: &str) -> NewFeed {
        NewFeed {
            userid,
            tag: tag.to_string(),
            name: name.to_string(),
            engine: EngineKind::FixedInterval,
            unit: "W".to_string(),
        }
    }

    #[tokio::test]
    async fn test_insert_and_load() {
        let store = MetadataStore::new_in_memory().unwrap();
        let first = store.insert(&new_feed(1, "house", "power")).await.unwrap();
        let second = store.insert(&new_feed(1, "house", "energy")).await.unwrap();
        assert!(second > first);

        let record = store.load(first).await.unwrap().unwrap();
        assert_eq!(record.name, "power");
        assert_eq!(record.engine, 5);
        assert_eq!(record.time, None);
        assert!(!record.public);

        assert_eq!(store.user_feed_ids(1).await.unwrap(), vec![first, second]);
        assert!(store.load(999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_tag_name_lookup_is_byte_exact() {
        let store = MetadataStore::new_in_memory().unwrap();
        let id = store.insert(&new_feed(1, "House", "Power")).await.unwrap();
        assert_eq!(store.find_by_tag_name(1, "House", "Power").await.unwrap(), Some(id));
        assert_eq!(store.find_by_tag_name(1, "house", "Power").await.unwrap(), None);
        assert_eq!(store.find_by_tag_name(2, "House", "Power").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_field_updates_and_access() {
        let store = MetadataStore::new_in_memory().unwrap();
        let id = store.insert(&new_feed(3, "t", "n")).await.unwrap();

        assert!(store.owns(3, id).await.unwrap());
        assert!(!store.owns(4, id).await.unwrap());
        assert!(!store.may_read(Some(4), id).await.unwrap());
        assert!(!store.may_read(None, id).await.unwrap());

        store
            .update_fields(id, &[FeedField::Public(true), FeedField::Size(640)])
            .await
            .unwrap();
        store.set_timevalue(id, 1_700_000_000, Some(21.5)).await.unwrap();

        assert!(store.may_read(Some(4), id).await.unwrap());
        let record = store.load(id).await.unwrap().unwrap();
        assert_eq!(record.size, 640);
        assert_eq!(record.time, Some(1_700_000_000));
        assert_eq!(record.value, Some(21.5));

        assert!(!store.update_fields(999, &[FeedField::Size(1)]).await.unwrap());
        store.delete(id).await.unwrap();
        assert!(store.load(id).await.unwrap().is_none());
    }
}
