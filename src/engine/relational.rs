//! Relational engine backed by DuckDB.
//!
//! Serves both relational kinds: `relational_table` on the configured
//! database file and `memory_table` on an in-memory connection. Each feed is a
//! table `feed_<id>("time" BIGINT PRIMARY KEY, data DOUBLE)`.

use super::{sampling, DmyRow, EngineMeta, EngineOptions, EngineQuery, FeedEngine};
use crate::error::Result;
use crate::models::{EngineKind, FeedId, LastValue, PaddingMode, Point};
use async_trait::async_trait;
use duckdb::{params, Connection, OptionalExt, ToSql};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Approximate stored bytes per row, used for feed size accounting.
const ROW_BYTES: u64 = 16;

fn table(feed: FeedId) -> String {
    format!("feed_{}", feed)
}

fn query_points(conn: &Connection, sql: &str, args: &[&dyn ToSql]) -> Result<Vec<Point>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(args, |row| Ok(Point::new(row.get(0)?, row.get(1)?)))?;
    let mut points = Vec::new();
    for row in rows {
        points.push(row?);
    }
    Ok(points)
}

#[derive(Clone)]
pub struct RelationalEngine {
    conn: Arc<Mutex<Connection>>,
    kind: EngineKind,
}

impl RelationalEngine {
    pub fn new(connection: &str, kind: EngineKind) -> Result<Self> {
        let conn = if connection == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(connection)?
        };
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            kind,
        })
    }

    pub fn new_in_memory(kind: EngineKind) -> Result<Self> {
        Self::new(":memory:", kind)
    }

    async fn read_range(&self, feed: FeedId, lo: i64, hi: i64) -> Result<Vec<Point>> {
        let conn = self.conn.lock().await;
        query_points(
            &conn,
            &format!(
                "SELECT \"time\", data FROM {} WHERE \"time\" >= ? AND \"time\" < ? ORDER BY \"time\"",
                table(feed)
            ),
            params![lo, hi],
        )
    }
}

#[async_trait]
impl FeedEngine for RelationalEngine {
    fn name(&self) -> &'static str {
        self.kind.name()
    }

    async fn create(&self, feed: FeedId, options: &EngineOptions) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (\"time\" BIGINT PRIMARY KEY, data DOUBLE);",
            table(feed)
        ))?;
        if options.empty {
            conn.execute(&format!("DELETE FROM {}", table(feed)), params![])?;
        }
        Ok(())
    }

    async fn delete(&self, feed: FeedId) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute_batch(&format!("DROP TABLE IF EXISTS {};", table(feed)))?;
        Ok(())
    }

    async fn trim(&self, feed: FeedId, start: i64) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(&format!("DELETE FROM {} WHERE \"time\" < ?", table(feed)), params![start])?;
        Ok(())
    }

    async fn clear(&self, feed: FeedId) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(&format!("DELETE FROM {}", table(feed)), params![])?;
        Ok(())
    }

    async fn post(&self, feed: FeedId, time: i64, value: f64, _padding: Option<PaddingMode>) -> Result<f64> {
        let conn = self.conn.lock().await;
        conn.execute(
            &format!("INSERT OR REPLACE INTO {} VALUES (?, ?)", table(feed)),
            params![time, value],
        )?;
        Ok(value)
    }

    async fn post_multiple(&self, feed: FeedId, points: &[(i64, f64)], _padding: Option<PaddingMode>) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(&format!("INSERT OR REPLACE INTO {} VALUES (?, ?)", table(feed)))?;
            for &(time, value) in points {
                stmt.execute(params![time, value])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    async fn get_value(&self, feed: FeedId, time: i64) -> Result<Option<f64>> {
        let conn = self.conn.lock().await;
        let value = conn
            .query_row(
                &format!(
                    "SELECT data FROM {} WHERE \"time\" <= ? ORDER BY \"time\" DESC LIMIT 1",
                    table(feed)
                ),
                params![time],
                |row| row.get::<_, Option<f64>>(0),
            )
            .optional()?;
        Ok(value.flatten())
    }

    async fn get_data_combined(&self, feed: FeedId, query: &EngineQuery) -> Result<Vec<Point>> {
        let (lo, hi) = sampling::window(query)?;
        let rows = self.read_range(feed, lo, hi).await?;
        sampling::sample_points(&rows, query)
    }

    async fn get_data_dmy_time_of_day(&self, feed: FeedId, query: &EngineQuery, split: &[f64]) -> Result<Vec<DmyRow>> {
        let (lo, hi) = sampling::window(query)?;
        let rows = self.read_range(feed, lo, hi).await?;
        sampling::time_of_day_rows(query, split, |time| sampling::value_at_or_before(&rows, time))
    }

    async fn get_meta(&self, feed: FeedId) -> Result<EngineMeta> {
        let conn = self.conn.lock().await;
        let (start, end, count) = conn.query_row(
            &format!("SELECT min(\"time\"), max(\"time\"), count(*) FROM {}", table(feed)),
            params![],
            |row| {
                Ok((
                    row.get::<_, Option<i64>>(0)?,
                    row.get::<_, Option<i64>>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            },
        )?;
        Ok(EngineMeta {
            start_time: start,
            end_time: end,
            interval: None,
            npoints: Some(count.max(0) as u64),
        })
    }

    async fn get_feed_size(&self, feed: FeedId) -> Result<u64> {
        let npoints = self.get_meta(feed).await?.npoints.unwrap_or(0);
        Ok(npoints * ROW_BYTES)
    }

    async fn lastvalue(&self, feed: FeedId) -> Result<Option<LastValue>> {
        let conn = self.conn.lock().await;
        let last = conn
            .query_row(
                &format!("SELECT \"time\", data FROM {} ORDER BY \"time\" DESC LIMIT 1", table(feed)),
                params![],
                |row| Ok(LastValue::new(row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(last)
    }

    async fn export(&self, feed: FeedId, start: i64) -> Result<Vec<Point>> {
        let conn = self.conn.lock().await;
        query_points(
            &conn,
            &format!("SELECT \"time\", data FROM {} WHERE \"time\" >= ? ORDER BY \"time\"", table(feed)),
            params![start],
        )
    }

    async fn delete_data_point(&self, feed: FeedId, time: i64) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(&format!("DELETE FROM {} WHERE \"time\" = ?", table(feed)), params![time])?;
        Ok(())
    }

    async fn delete_data_range(&self, feed: FeedId, start: i64, end: i64) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            &format!("DELETE FROM {} WHERE \"time\" >= ? AND \"time\" <= ?", table(feed)),
            params![start, end],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::{CalendarInterval, Interval};

    async fn engine_with_feed() -> RelationalEngine {
        let engine = RelationalEngine::new_in_memory(EngineKind::MemoryTable).unwrap();
        engine.create(4, &EngineOptions::default()).await.unwrap();
        engine
    }

    #[tokio::test]
    async fn test_upsert_and_meta() {
        let engine = engine_with_feed().await;
        engine.post(4, 100, 1.0, None).await.unwrap();
        engine.post(4, 100, 2.0, None).await.unwrap();
        engine
            .post_multiple(4, &[(300, 3.0), (200, 2.5)], None)
            .await
            .unwrap();

        let meta = engine.get_meta(4).await.unwrap();
        assert_eq!(meta.start_time, Some(100));
        assert_eq!(meta.end_time, Some(300));
        assert_eq!(meta.npoints, Some(3));
        assert_eq!(engine.get_feed_size(4).await.unwrap(), 48);
        assert_eq!(engine.get_value(4, 150).await.unwrap(), Some(2.0));
        assert_eq!(engine.lastvalue(4).await.unwrap(), Some(LastValue::new(300, Some(3.0))));
        assert_eq!(engine.name(), "memory_table");
    }

    #[tokio::test]
    async fn test_delete_points_and_ranges() {
        let engine = engine_with_feed().await;
        engine
            .post_multiple(4, &[(10, 1.0), (20, 2.0), (30, 3.0), (40, 4.0)], None)
            .await
            .unwrap();

        engine.delete_data_point(4, 20).await.unwrap();
        engine.delete_data_range(4, 30, 40).await.unwrap();
        assert_eq!(engine.export(4, 0).await.unwrap(), vec![Point::sample(10, 1.0)]);

        engine.clear(4).await.unwrap();
        assert_eq!(engine.lastvalue(4).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_time_of_day_rows() {
        let engine = engine_with_feed().await;
        // two days, samples at 06:00 and 18:00
        engine
            .post_multiple(
                4,
                &[(21_600, 1.0), (64_800, 2.0), (108_000, 3.0), (151_200, 4.0)],
                None,
            )
            .await
            .unwrap();

        let query = EngineQuery::new(0, 100_000, Interval::Calendar(CalendarInterval::Daily));
        let rows = engine.get_data_dmy_time_of_day(4, &query, &[6.0, 18.0]).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], DmyRow { time: 0, values: vec![Some(1.0), Some(2.0)] });
        assert_eq!(rows[1], DmyRow { time: 86_400, values: vec![Some(3.0), Some(4.0)] });
    }
}
