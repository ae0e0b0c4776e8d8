//! SQLite storage layer for Fireshield.
//!
//! One `samples` table holds raw VOC readings; every statistic the insights
//! engine needs is computed SQL-side over a time window. All window queries
//! tolerate an empty table: aggregates come back as `NULL` and surface as
//! `None`, never as an error.

use chrono::{DateTime, TimeZone, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::model::SamplePoint;

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

/// Averages row backing the simple overview.
#[derive(Debug, Clone, Default)]
pub struct WindowAverages {
    pub avg_tvoc_ppb: Option<f64>,
    pub avg_formaldehyde_ppm: Option<f64>,
    pub avg_benzene_ppm: Option<f64>,
}

/// Full statistics row backing the rich metrics.
#[derive(Debug, Clone, Default)]
pub struct WindowStats {
    pub samples_count: i64,
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
    pub avg_tvoc_ppb: Option<f64>,
    pub min_tvoc_ppb: Option<f64>,
    pub max_tvoc_ppb: Option<f64>,
    pub stddev_tvoc_ppb: Option<f64>,
    pub avg_formaldehyde_ppm: Option<f64>,
    pub avg_benzene_ppm: Option<f64>,
    pub count_elevated: i64,
    pub count_critical: i64,
}

impl Storage {
    /// Create a new storage instance and initialize the schema.
    ///
    /// # Arguments
    ///
    /// * `database_url` - SQLite connection string (e.g., "sqlite:fireshield.db" or "sqlite::memory:")
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        let storage = Self { pool };
        storage.initialize_schema().await?;

        Ok(storage)
    }

    /// Create the database schema if it doesn't exist.
    async fn initialize_schema(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS samples (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                device_id TEXT NOT NULL,
                ts INTEGER NOT NULL,
                tvoc_ppb REAL,
                voc_index REAL,
                eco2_ppm REAL,
                hum_rel REAL,
                temp_c REAL,
                formaldehyde_ppm REAL,
                benzene_ppm REAL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Index for efficient time-range queries
        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_samples_ts
            ON samples(ts)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert a single reading for a device.
    pub async fn insert_sample(&self, device_id: &str, point: &SamplePoint) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO samples
                (device_id, ts, tvoc_ppb, voc_index, eco2_ppm, hum_rel, temp_c,
                 formaldehyde_ppm, benzene_ppm, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(device_id)
        .bind(point.ts.timestamp())
        .bind(point.tvoc_ppb)
        .bind(point.voc_index)
        .bind(point.eco2_ppm)
        .bind(point.hum_rel)
        .bind(point.temp_c)
        .bind(point.formaldehyde_ppm)
        .bind(point.benzene_ppm)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Per-pollutant averages over the last N hours.
    ///
    /// An empty window yields a row of `None`s.
    pub async fn averages_last_hours(
        &self,
        hours: i64,
        now: DateTime<Utc>,
    ) -> anyhow::Result<WindowAverages> {
        let start_ts = now.timestamp() - hours * 3600;

        let row = sqlx::query(
            r#"
            SELECT
                AVG(tvoc_ppb)         AS avg_tvoc,
                AVG(formaldehyde_ppm) AS avg_ch2o,
                AVG(benzene_ppm)      AS avg_benzene
            FROM samples
            WHERE ts >= ? AND ts <= ?
            "#,
        )
        .bind(start_ts)
        .bind(now.timestamp())
        .fetch_one(&self.pool)
        .await?;

        Ok(WindowAverages {
            avg_tvoc_ppb: row.get("avg_tvoc"),
            avg_formaldehyde_ppm: row.get("avg_ch2o"),
            avg_benzene_ppm: row.get("avg_benzene"),
        })
    }

    /// Full window statistics: count, time span, TVOC min/max/avg/stddev,
    /// co-pollutant averages, and threshold exceedance counts.
    ///
    /// SQLite has no STDDEV aggregate, so the query returns `AVG(x*x)` and
    /// the population standard deviation is derived from it here.
    pub async fn detailed_stats(
        &self,
        hours: i64,
        elevated_threshold_ppb: f64,
        critical_threshold_ppb: f64,
        now: DateTime<Utc>,
    ) -> anyhow::Result<WindowStats> {
        let start_ts = now.timestamp() - hours * 3600;

        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*)                  AS samples_count,
                MIN(ts)                   AS window_start,
                MAX(ts)                   AS window_end,
                AVG(tvoc_ppb)             AS avg_tvoc,
                MIN(tvoc_ppb)             AS min_tvoc,
                MAX(tvoc_ppb)             AS max_tvoc,
                AVG(tvoc_ppb * tvoc_ppb)  AS avg_tvoc_sq,
                AVG(formaldehyde_ppm)     AS avg_ch2o,
                AVG(benzene_ppm)          AS avg_benzene,
                COALESCE(SUM(CASE WHEN tvoc_ppb >= ? THEN 1 ELSE 0 END), 0) AS count_elevated,
                COALESCE(SUM(CASE WHEN tvoc_ppb >= ? THEN 1 ELSE 0 END), 0) AS count_critical
            FROM samples
            WHERE ts >= ? AND ts <= ?
            "#,
        )
        .bind(elevated_threshold_ppb)
        .bind(critical_threshold_ppb)
        .bind(start_ts)
        .bind(now.timestamp())
        .fetch_one(&self.pool)
        .await?;

        let avg_tvoc: Option<f64> = row.get("avg_tvoc");
        let avg_tvoc_sq: Option<f64> = row.get("avg_tvoc_sq");
        let stddev = match (avg_tvoc, avg_tvoc_sq) {
            (Some(mean), Some(mean_sq)) => Some((mean_sq - mean * mean).max(0.0).sqrt()),
            _ => None,
        };

        let window_start: Option<i64> = row.get("window_start");
        let window_end: Option<i64> = row.get("window_end");

        Ok(WindowStats {
            samples_count: row.get("samples_count"),
            window_start: window_start.and_then(|ts| Utc.timestamp_opt(ts, 0).single()),
            window_end: window_end.and_then(|ts| Utc.timestamp_opt(ts, 0).single()),
            avg_tvoc_ppb: avg_tvoc,
            min_tvoc_ppb: row.get("min_tvoc"),
            max_tvoc_ppb: row.get("max_tvoc"),
            stddev_tvoc_ppb: stddev,
            avg_formaldehyde_ppm: row.get("avg_ch2o"),
            avg_benzene_ppm: row.get("avg_benzene"),
            count_elevated: row.get("count_elevated"),
            count_critical: row.get("count_critical"),
        })
    }

    /// Average TVOC for the first and second half of the window, used for
    /// the slope derivation. Either half may be `None` when it has no rows.
    pub async fn tvoc_halves(
        &self,
        hours: i64,
        now: DateTime<Utc>,
    ) -> anyhow::Result<(Option<f64>, Option<f64>)> {
        let now_ts = now.timestamp();
        let start_ts = now_ts - hours * 3600;
        let mid_ts = now_ts - hours * 3600 / 2;

        let row = sqlx::query(
            r#"
            SELECT
                AVG(CASE WHEN ts <  ? THEN tvoc_ppb END) AS first_half,
                AVG(CASE WHEN ts >= ? THEN tvoc_ppb END) AS second_half
            FROM samples
            WHERE ts >= ? AND ts <= ?
            "#,
        )
        .bind(mid_ts)
        .bind(mid_ts)
        .bind(start_ts)
        .bind(now_ts)
        .fetch_one(&self.pool)
        .await?;

        Ok((row.get("first_half"), row.get("second_half")))
    }

    /// Bucketed average TVOC series over the last N hours, oldest first.
    ///
    /// # Arguments
    ///
    /// * `bucket_seconds` - Width of each bucket in seconds
    /// * `hours` - Lookback window
    /// * `now` - Reference timestamp
    pub async fn tvoc_series(
        &self,
        bucket_seconds: i64,
        hours: i64,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Vec<(DateTime<Utc>, Option<f64>)>> {
        let now_ts = now.timestamp();
        let start_ts = now_ts - hours * 3600;

        let rows = sqlx::query(
            r#"
            SELECT (ts / ?) * ? AS bucket_ts, AVG(tvoc_ppb) AS avg_tvoc
            FROM samples
            WHERE ts >= ? AND ts <= ?
            GROUP BY bucket_ts
            ORDER BY bucket_ts
            "#,
        )
        .bind(bucket_seconds)
        .bind(bucket_seconds)
        .bind(start_ts)
        .bind(now_ts)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .filter_map(|r| {
                let ts: i64 = r.get("bucket_ts");
                Utc.timestamp_opt(ts, 0)
                    .single()
                    .map(|dt| (dt, r.get("avg_tvoc")))
            })
            .collect())
    }
}
