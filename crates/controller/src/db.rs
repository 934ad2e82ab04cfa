use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Row, Sqlite};
use std::str::FromStr;

use sprinkler_engine::{CompletedRun, ProgramRecord, RunOrigin};

#[derive(Clone)]
pub struct Db {
    pool: Pool<Sqlite>,
}

/// Pack per-station durations into a little-endian u16 blob.
pub fn encode_durations(durations: &[u16]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(durations.len() * 2);
    for d in durations {
        blob.extend_from_slice(&d.to_le_bytes());
    }
    blob
}

pub fn decode_durations(blob: &[u8]) -> Vec<u16> {
    blob.chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect()
}

impl Db {
    /// db_url examples:
    /// - "sqlite:/var/lib/sprinkler/sprinkler.db?mode=rwc"
    /// - "sqlite::memory:" (tests)
    pub async fn connect(db_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(db_url)
            .with_context(|| format!("invalid sqlite connection string: {db_url}"))?
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to connect to sqlite db: {db_url}"))?;

        Ok(Self { pool })
    }

    /// Runs SQLx migrations from ./migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("failed to run migrations")?;
        Ok(())
    }

    // ----------------------------
    // Programs
    // ----------------------------

    /// Replace the whole program table with the current store contents.
    /// The store is small and positional, so a full rewrite inside one
    /// transaction is simpler than diffing slots.
    pub async fn save_programs(&self, records: &[ProgramRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await.context("begin save_programs")?;
        sqlx::query("DELETE FROM programs")
            .execute(&mut *tx)
            .await
            .context("clear programs failed")?;
        for (slot, r) in records.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO programs (
                  slot, flags, days0, days1,
                  start0, start1, start2, start3,
                  date_start, date_end, durations, name
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(slot as i64)
            .bind(r.flags as i64)
            .bind(r.days[0] as i64)
            .bind(r.days[1] as i64)
            .bind(r.start_times[0] as i64)
            .bind(r.start_times[1] as i64)
            .bind(r.start_times[2] as i64)
            .bind(r.start_times[3] as i64)
            .bind(r.date_range.0 as i64)
            .bind(r.date_range.1 as i64)
            .bind(encode_durations(&r.durations))
            .bind(&r.name)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("insert program slot {slot} failed"))?;
        }
        tx.commit().await.context("commit save_programs")?;
        Ok(())
    }

    pub async fn load_programs(&self) -> Result<Vec<ProgramRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT flags, days0, days1,
                   start0, start1, start2, start3,
                   date_start, date_end, durations, name
            FROM programs
            ORDER BY slot
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("load_programs failed")?;

        Ok(rows
            .into_iter()
            .map(|r| ProgramRecord {
                flags: r.get::<i64, _>("flags") as u8,
                days: [
                    r.get::<i64, _>("days0") as u8,
                    r.get::<i64, _>("days1") as u8,
                ],
                start_times: [
                    r.get::<i64, _>("start0") as i16,
                    r.get::<i64, _>("start1") as i16,
                    r.get::<i64, _>("start2") as i16,
                    r.get::<i64, _>("start3") as i16,
                ],
                date_range: (
                    r.get::<i64, _>("date_start") as u16,
                    r.get::<i64, _>("date_end") as u16,
                ),
                durations: decode_durations(&r.get::<Vec<u8>, _>("durations")),
                name: r.get("name"),
            })
            .collect())
    }

    // ----------------------------
    // Run history
    // ----------------------------

    pub async fn insert_run_event(&self, run: &CompletedRun) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO run_events (ts_start, duration_sec, station, origin)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(run.start)
        .bind(run.duration)
        .bind(run.station as i64)
        .bind(run.origin.to_sentinel() as i64)
        .execute(&self.pool)
        .await
        .context("insert_run_event failed")?;
        Ok(())
    }

    pub async fn recent_run_events(&self, limit: i64) -> Result<Vec<CompletedRun>> {
        let rows = sqlx::query(
            r#"
            SELECT ts_start, duration_sec, station, origin
            FROM run_events
            ORDER BY ts_start DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("recent_run_events failed")?;

        Ok(rows
            .into_iter()
            .filter_map(|r| {
                let origin = RunOrigin::from_sentinel(r.get::<i64, _>("origin") as u8)?;
                Some(CompletedRun {
                    station: r.get::<i64, _>("station") as u8,
                    origin,
                    start: r.get("ts_start"),
                    duration: r.get("duration_sec"),
                })
            })
            .collect())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
