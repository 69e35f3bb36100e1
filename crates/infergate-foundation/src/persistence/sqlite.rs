//! SQLite backend.
//!
//! Timestamps are stored as fixed-width RFC 3339 text (microseconds, `Z`
//! suffix) so range predicates compare lexicographically. Percentiles are
//! computed in process from the scanned window since SQLite has no
//! `PERCENTILE_CONT`.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use infergate_kernel::alert::{Alert, AlertStatus, AlertStore};
use infergate_kernel::telemetry::{
    ErrorRecord, GroupKey, HealthCheckRecord, PredictionRecord, RecordFilter, TelemetryStore,
    ThroughputRecord,
};
use infergate_kernel::{TelemetryError, TelemetryResult};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Pool bounds for [`SqliteStore::connect_with_options`].
#[derive(Debug, Clone, Copy)]
pub struct PoolSettings {
    pub min_connections: u32,
    pub max_connections: u32,
    /// How long an operation waits for a free handle before failing.
    pub command_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            min_connections: 2,
            max_connections: 10,
            command_timeout: Duration::from_secs(60),
        }
    }
}

pub struct SqliteStore {
    pool: SqlitePool,
}

fn map_err(e: sqlx::Error) -> TelemetryError {
    match e {
        sqlx::Error::PoolTimedOut => TelemetryError::Timeout("no pooled connection available".into()),
        sqlx::Error::PoolClosed | sqlx::Error::Io(_) => TelemetryError::Connection(e.to_string()),
        sqlx::Error::RowNotFound => TelemetryError::NotFound(e.to_string()),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            TelemetryError::Serialization(e.to_string())
        }
        other => TelemetryError::Query(other.to_string()),
    }
}

fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> TelemetryResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| TelemetryError::Serialization(format!("bad timestamp '{raw}': {e}")))
}

fn parse_opt_ts(raw: Option<String>) -> TelemetryResult<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_ts).transpose()
}

fn parse_uuid(raw: &str) -> TelemetryResult<Uuid> {
    Uuid::parse_str(raw).map_err(|e| TelemetryError::Serialization(e.to_string()))
}

fn parse_enum<T: std::str::FromStr<Err = String>>(raw: &str) -> TelemetryResult<T> {
    raw.parse().map_err(TelemetryError::Serialization)
}

fn get<'r, T>(row: &'r SqliteRow, column: &str) -> TelemetryResult<T>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(column)
        .map_err(|e| TelemetryError::Serialization(e.to_string()))
}

/// `LIMIT -1` is unbounded in SQLite.
fn sql_limit(filter: &RecordFilter) -> i64 {
    filter.limit.map_or(-1, |l| l as i64)
}

const WINDOW_PREDICATE: &str = "(?1 IS NULL OR model_name = ?1) \
     AND (?2 IS NULL OR provider = ?2) \
     AND (?3 IS NULL OR {ts} > ?3) \
     AND (?4 IS NULL OR {ts} <= ?4)";

fn window_predicate(ts_column: &str) -> String {
    WINDOW_PREDICATE.replace("{ts}", ts_column)
}

impl SqliteStore {
    pub async fn connect(database_url: &str) -> TelemetryResult<Self> {
        Self::connect_with_options(database_url, PoolSettings::default()).await
    }

    pub async fn connect_with_options(
        database_url: &str,
        settings: PoolSettings,
    ) -> TelemetryResult<Self> {
        let pool = SqlitePoolOptions::new()
            .min_connections(settings.min_connections)
            .max_connections(settings.max_connections)
            .acquire_timeout(settings.command_timeout)
            .connect(database_url)
            .await
            .map_err(|e| TelemetryError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Private in-memory database. Each SQLite connection to `:memory:` is a
    /// distinct database, so the pool is pinned to one connection.
    pub async fn in_memory() -> TelemetryResult<Self> {
        Self::connect_with_options(
            "sqlite::memory:",
            PoolSettings {
                min_connections: 1,
                max_connections: 1,
                ..PoolSettings::default()
            },
        )
        .await
    }

    pub async fn shared(database_url: &str) -> TelemetryResult<Arc<Self>> {
        Ok(Arc::new(Self::connect(database_url).await?))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> TelemetryResult<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS model_predictions (
                id TEXT PRIMARY KEY,
                model_name TEXT NOT NULL,
                model_version TEXT,
                provider TEXT NOT NULL,
                endpoint TEXT NOT NULL,
                request_id TEXT,
                prediction TEXT NOT NULL,
                confidence REAL,
                severity TEXT,
                latency_ms REAL NOT NULL,
                fallback_used INTEGER NOT NULL DEFAULT 0,
                input_length INTEGER,
                batch_size INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_predictions_model_time ON model_predictions (model_name, provider, created_at)",
            r#"
            CREATE TABLE IF NOT EXISTS model_errors (
                id TEXT PRIMARY KEY,
                model_name TEXT NOT NULL,
                provider TEXT NOT NULL,
                error_type TEXT NOT NULL,
                error_message TEXT,
                endpoint TEXT,
                request_id TEXT,
                input_length INTEGER,
                stack_trace TEXT,
                created_at TEXT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_errors_model_time ON model_errors (model_name, provider, created_at)",
            r#"
            CREATE TABLE IF NOT EXISTS model_health_checks (
                id TEXT PRIMARY KEY,
                model_name TEXT NOT NULL,
                provider TEXT NOT NULL,
                status TEXT NOT NULL,
                latency_ms REAL,
                memory_mb REAL,
                details TEXT,
                checked_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS throughput_metrics (
                id TEXT PRIMARY KEY,
                model_name TEXT NOT NULL,
                provider TEXT NOT NULL,
                requests_per_second REAL,
                requests_per_minute INTEGER,
                concurrent_requests INTEGER,
                window_seconds INTEGER NOT NULL DEFAULT 60,
                recorded_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS alerts (
                id TEXT PRIMARY KEY,
                alert_type TEXT NOT NULL,
                severity TEXT NOT NULL,
                model_name TEXT,
                provider TEXT,
                message TEXT NOT NULL,
                threshold_value REAL,
                actual_value REAL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                resolved_at TEXT,
                acknowledged_by TEXT,
                acknowledged_at TEXT
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_alerts_status ON alerts (status, model_name, alert_type)",
        ];

        for sql in statements {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(map_err)?;
        }
        Ok(())
    }

    fn parse_prediction_row(row: &SqliteRow) -> TelemetryResult<PredictionRecord> {
        let severity: Option<String> = get(row, "severity")?;
        let input_length: Option<i64> = get(row, "input_length")?;
        let batch_size: i64 = get(row, "batch_size")?;
        Ok(PredictionRecord {
            id: parse_uuid(&get::<String>(row, "id")?)?,
            model_name: get(row, "model_name")?,
            model_version: get(row, "model_version")?,
            provider: get(row, "provider")?,
            endpoint: get(row, "endpoint")?,
            request_id: get(row, "request_id")?,
            prediction: get(row, "prediction")?,
            confidence: get(row, "confidence")?,
            severity: severity.as_deref().map(parse_enum).transpose()?,
            latency_ms: get(row, "latency_ms")?,
            fallback_used: get::<i64>(row, "fallback_used")? != 0,
            input_length: input_length.map(|v| v.max(0) as u64),
            batch_size: batch_size.max(0) as u32,
            created_at: parse_ts(&get::<String>(row, "created_at")?)?,
        })
    }

    fn parse_error_row(row: &SqliteRow) -> TelemetryResult<ErrorRecord> {
        let input_length: Option<i64> = get(row, "input_length")?;
        Ok(ErrorRecord {
            id: parse_uuid(&get::<String>(row, "id")?)?,
            model_name: get(row, "model_name")?,
            provider: get(row, "provider")?,
            error_type: get(row, "error_type")?,
            message: get(row, "error_message")?,
            endpoint: get(row, "endpoint")?,
            request_id: get(row, "request_id")?,
            input_length: input_length.map(|v| v.max(0) as u64),
            stack_trace: get(row, "stack_trace")?,
            created_at: parse_ts(&get::<String>(row, "created_at")?)?,
        })
    }

    fn parse_health_row(row: &SqliteRow) -> TelemetryResult<HealthCheckRecord> {
        let details: Option<String> = get(row, "details")?;
        Ok(HealthCheckRecord {
            id: parse_uuid(&get::<String>(row, "id")?)?,
            model_name: get(row, "model_name")?,
            provider: get(row, "provider")?,
            status: get(row, "status")?,
            latency_ms: get(row, "latency_ms")?,
            memory_mb: get(row, "memory_mb")?,
            details: details.as_deref().map(serde_json::from_str).transpose()?,
            checked_at: parse_ts(&get::<String>(row, "checked_at")?)?,
        })
    }

    fn parse_throughput_row(row: &SqliteRow) -> TelemetryResult<ThroughputRecord> {
        let per_minute: Option<i64> = get(row, "requests_per_minute")?;
        let concurrent: Option<i64> = get(row, "concurrent_requests")?;
        let window: i64 = get(row, "window_seconds")?;
        Ok(ThroughputRecord {
            id: parse_uuid(&get::<String>(row, "id")?)?,
            model_name: get(row, "model_name")?,
            provider: get(row, "provider")?,
            requests_per_second: get(row, "requests_per_second")?,
            requests_per_minute: per_minute.map(|v| v.max(0) as u64),
            concurrent_requests: concurrent.map(|v| v.max(0) as u64),
            window_seconds: window.max(0) as u32,
            recorded_at: parse_ts(&get::<String>(row, "recorded_at")?)?,
        })
    }

    fn parse_alert_row(row: &SqliteRow) -> TelemetryResult<Alert> {
        Ok(Alert {
            id: parse_uuid(&get::<String>(row, "id")?)?,
            alert_type: get(row, "alert_type")?,
            severity: parse_enum(&get::<String>(row, "severity")?)?,
            model_name: get(row, "model_name")?,
            provider: get(row, "provider")?,
            message: get(row, "message")?,
            threshold_value: get(row, "threshold_value")?,
            actual_value: get(row, "actual_value")?,
            status: parse_enum(&get::<String>(row, "status")?)?,
            created_at: parse_ts(&get::<String>(row, "created_at")?)?,
            resolved_at: parse_opt_ts(get(row, "resolved_at")?)?,
            acknowledged_by: get(row, "acknowledged_by")?,
            acknowledged_at: parse_opt_ts(get(row, "acknowledged_at")?)?,
        })
    }

    async fn fetch_window(
        &self,
        sql: &str,
        filter: &RecordFilter,
    ) -> TelemetryResult<Vec<SqliteRow>> {
        sqlx::query(sql)
            .bind(filter.model_name.clone())
            .bind(filter.provider.clone())
            .bind(filter.since.map(ts))
            .bind(filter.until.map(ts))
            .bind(sql_limit(filter))
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)
    }

    async fn count_window(&self, table: &str, filter: &RecordFilter) -> TelemetryResult<u64> {
        let sql = format!(
            "SELECT COUNT(*) AS n FROM {table} WHERE {}",
            window_predicate("created_at")
        );
        let row = sqlx::query(&sql)
            .bind(filter.model_name.clone())
            .bind(filter.provider.clone())
            .bind(filter.since.map(ts))
            .bind(filter.until.map(ts))
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)?;
        Ok(get::<i64>(&row, "n")?.max(0) as u64)
    }
}

#[async_trait]
impl TelemetryStore for SqliteStore {
    async fn append_prediction(&self, r: &PredictionRecord) -> TelemetryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO model_predictions (
                id, model_name, model_version, provider, endpoint, request_id,
                prediction, confidence, severity, latency_ms, fallback_used,
                input_length, batch_size, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(r.id.to_string())
        .bind(&r.model_name)
        .bind(&r.model_version)
        .bind(&r.provider)
        .bind(&r.endpoint)
        .bind(&r.request_id)
        .bind(&r.prediction)
        .bind(r.confidence)
        .bind(r.severity.map(|s| s.as_str()))
        .bind(r.latency_ms)
        .bind(i64::from(r.fallback_used))
        .bind(r.input_length.map(|v| v as i64))
        .bind(i64::from(r.batch_size))
        .bind(ts(r.created_at))
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn append_error(&self, r: &ErrorRecord) -> TelemetryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO model_errors (
                id, model_name, provider, error_type, error_message, endpoint,
                request_id, input_length, stack_trace, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(r.id.to_string())
        .bind(&r.model_name)
        .bind(&r.provider)
        .bind(&r.error_type)
        .bind(&r.message)
        .bind(&r.endpoint)
        .bind(&r.request_id)
        .bind(r.input_length.map(|v| v as i64))
        .bind(&r.stack_trace)
        .bind(ts(r.created_at))
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn append_health_check(&self, r: &HealthCheckRecord) -> TelemetryResult<()> {
        let details = r.details.as_ref().map(serde_json::to_string).transpose()?;
        sqlx::query(
            r#"
            INSERT INTO model_health_checks (
                id, model_name, provider, status, latency_ms, memory_mb, details, checked_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(r.id.to_string())
        .bind(&r.model_name)
        .bind(&r.provider)
        .bind(&r.status)
        .bind(r.latency_ms)
        .bind(r.memory_mb)
        .bind(details)
        .bind(ts(r.checked_at))
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn append_throughput(&self, r: &ThroughputRecord) -> TelemetryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO throughput_metrics (
                id, model_name, provider, requests_per_second, requests_per_minute,
                concurrent_requests, window_seconds, recorded_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(r.id.to_string())
        .bind(&r.model_name)
        .bind(&r.provider)
        .bind(r.requests_per_second)
        .bind(r.requests_per_minute.map(|v| v as i64))
        .bind(r.concurrent_requests.map(|v| v as i64))
        .bind(i64::from(r.window_seconds))
        .bind(ts(r.recorded_at))
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn scan_predictions(
        &self,
        filter: &RecordFilter,
    ) -> TelemetryResult<Vec<PredictionRecord>> {
        let sql = format!(
            "SELECT * FROM model_predictions WHERE {} ORDER BY created_at ASC LIMIT ?5",
            window_predicate("created_at")
        );
        self.fetch_window(&sql, filter)
            .await?
            .iter()
            .map(Self::parse_prediction_row)
            .collect()
    }

    async fn scan_errors(&self, filter: &RecordFilter) -> TelemetryResult<Vec<ErrorRecord>> {
        let sql = format!(
            "SELECT * FROM model_errors WHERE {} ORDER BY created_at DESC LIMIT ?5",
            window_predicate("created_at")
        );
        self.fetch_window(&sql, filter)
            .await?
            .iter()
            .map(Self::parse_error_row)
            .collect()
    }

    async fn scan_health_checks(
        &self,
        filter: &RecordFilter,
    ) -> TelemetryResult<Vec<HealthCheckRecord>> {
        let sql = format!(
            "SELECT * FROM model_health_checks WHERE {} ORDER BY checked_at DESC LIMIT ?5",
            window_predicate("checked_at")
        );
        self.fetch_window(&sql, filter)
            .await?
            .iter()
            .map(Self::parse_health_row)
            .collect()
    }

    async fn scan_throughput(
        &self,
        filter: &RecordFilter,
    ) -> TelemetryResult<Vec<ThroughputRecord>> {
        let sql = format!(
            "SELECT * FROM throughput_metrics WHERE {} ORDER BY recorded_at DESC LIMIT ?5",
            window_predicate("recorded_at")
        );
        self.fetch_window(&sql, filter)
            .await?
            .iter()
            .map(Self::parse_throughput_row)
            .collect()
    }

    async fn count_predictions(&self, filter: &RecordFilter) -> TelemetryResult<u64> {
        self.count_window("model_predictions", filter).await
    }

    async fn count_errors(&self, filter: &RecordFilter) -> TelemetryResult<u64> {
        self.count_window("model_errors", filter).await
    }

    async fn error_counts_by_group(
        &self,
        filter: &RecordFilter,
    ) -> TelemetryResult<BTreeMap<GroupKey, u64>> {
        let sql = format!(
            "SELECT model_name, provider, COUNT(*) AS n FROM model_errors WHERE {} \
             GROUP BY model_name, provider",
            window_predicate("created_at")
        );
        let rows = sqlx::query(&sql)
            .bind(filter.model_name.clone())
            .bind(filter.provider.clone())
            .bind(filter.since.map(ts))
            .bind(filter.until.map(ts))
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)?;
        rows.iter()
            .map(|row| {
                Ok((
                    GroupKey::new(
                        get::<String>(row, "model_name")?,
                        get::<String>(row, "provider")?,
                    ),
                    get::<i64>(row, "n")?.max(0) as u64,
                ))
            })
            .collect()
    }

    async fn cleanup_before(&self, cutoff: DateTime<Utc>) -> TelemetryResult<u64> {
        let cutoff = ts(cutoff);
        let mut removed = 0;
        for (table, column) in [
            ("model_predictions", "created_at"),
            ("model_errors", "created_at"),
            ("model_health_checks", "checked_at"),
            ("throughput_metrics", "recorded_at"),
        ] {
            let result = sqlx::query(&format!("DELETE FROM {table} WHERE {column} < ?"))
                .bind(&cutoff)
                .execute(&self.pool)
                .await
                .map_err(map_err)?;
            removed += result.rows_affected();
        }
        Ok(removed)
    }

    async fn health_check(&self) -> TelemetryResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(map_err)?;
        Ok(())
    }
}

#[async_trait]
impl AlertStore for SqliteStore {
    async fn insert_alert(&self, a: &Alert) -> TelemetryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO alerts (
                id, alert_type, severity, model_name, provider, message,
                threshold_value, actual_value, status, created_at,
                resolved_at, acknowledged_by, acknowledged_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(a.id.to_string())
        .bind(&a.alert_type)
        .bind(a.severity.as_str())
        .bind(&a.model_name)
        .bind(&a.provider)
        .bind(&a.message)
        .bind(a.threshold_value)
        .bind(a.actual_value)
        .bind(a.status.as_str())
        .bind(ts(a.created_at))
        .bind(a.resolved_at.map(ts))
        .bind(&a.acknowledged_by)
        .bind(a.acknowledged_at.map(ts))
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn get_alert(&self, id: Uuid) -> TelemetryResult<Option<Alert>> {
        let row = sqlx::query("SELECT * FROM alerts WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?;
        row.as_ref().map(Self::parse_alert_row).transpose()
    }

    async fn update_alert(&self, a: &Alert) -> TelemetryResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE alerts SET
                severity = ?, message = ?, threshold_value = ?, actual_value = ?,
                status = ?, resolved_at = ?, acknowledged_by = ?, acknowledged_at = ?
            WHERE id = ?
            "#,
        )
        .bind(a.severity.as_str())
        .bind(&a.message)
        .bind(a.threshold_value)
        .bind(a.actual_value)
        .bind(a.status.as_str())
        .bind(a.resolved_at.map(ts))
        .bind(&a.acknowledged_by)
        .bind(a.acknowledged_at.map(ts))
        .bind(a.id.to_string())
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_active_alert(
        &self,
        model_name: Option<&str>,
        alert_type: &str,
    ) -> TelemetryResult<Option<Alert>> {
        let row = sqlx::query(
            "SELECT * FROM alerts WHERE status = 'active' AND alert_type = ?1 \
             AND model_name IS ?2 LIMIT 1",
        )
        .bind(alert_type)
        .bind(model_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_err)?;
        row.as_ref().map(Self::parse_alert_row).transpose()
    }

    async fn list_alerts(&self, status: AlertStatus) -> TelemetryResult<Vec<Alert>> {
        sqlx::query("SELECT * FROM alerts WHERE status = ?")
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)?
            .iter()
            .map(Self::parse_alert_row)
            .collect()
    }

    async fn count_active_alerts(&self) -> TelemetryResult<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM alerts WHERE status = 'active'")
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)?;
        Ok(get::<i64>(&row, "n")?.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use infergate_kernel::Severity;
    use infergate_kernel::alert::{AlertSeverity, ERROR_RATE_HIGH};

    #[tokio::test]
    async fn prediction_rows_survive_storage() {
        let store = SqliteStore::in_memory().await.unwrap();
        let rec = PredictionRecord::new("m", "p", "/predict", "NORMAL", 42.5)
            .with_request_id(Some("req-1".into()))
            .with_fallback(true)
            .with_input_length(12);
        let mut rec = rec;
        rec.severity = Some(Severity::High);
        rec.confidence = Some(0.75);
        store.append_prediction(&rec).await.unwrap();

        let rows = store
            .scan_predictions(&RecordFilter::new().model("m"))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].severity, Some(Severity::High));
        assert!(rows[0].fallback_used);
        assert_eq!(rows[0].input_length, Some(12));
        assert_eq!(rows[0].request_id.as_deref(), Some("req-1"));
    }

    #[tokio::test]
    async fn window_counts_and_cleanup() {
        let store = SqliteStore::in_memory().await.unwrap();
        let now = Utc::now();
        for age in [0, 2, 48] {
            store
                .append_error(
                    &ErrorRecord::new("m", "p", "InferenceError").at(now - Duration::hours(age)),
                )
                .await
                .unwrap();
        }
        let day = RecordFilter::new().since(now - Duration::hours(24));
        assert_eq!(store.count_errors(&day).await.unwrap(), 2);
        let groups = store.error_counts_by_group(&day).await.unwrap();
        assert_eq!(groups[&GroupKey::new("m", "p")], 2);
        assert_eq!(
            store
                .scan_errors(&RecordFilter::new().limit(1))
                .await
                .unwrap()
                .len(),
            1
        );

        let removed = store.cleanup_before(now - Duration::hours(24)).await.unwrap();
        assert_eq!(removed, 1);
    }

    #[tokio::test]
    async fn alert_update_and_active_lookup() {
        let store = SqliteStore::in_memory().await.unwrap();
        let mut alert = Alert::new(ERROR_RATE_HIGH, AlertSeverity::Critical, "rate 40%")
            .for_model("m", "p")
            .with_values(10.0, 40.0);
        store.insert_alert(&alert).await.unwrap();
        assert!(
            store
                .find_active_alert(Some("m"), ERROR_RATE_HIGH)
                .await
                .unwrap()
                .is_some()
        );
        alert.resolve(Utc::now());
        assert!(store.update_alert(&alert).await.unwrap());
        let stored = store.get_alert(alert.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AlertStatus::Resolved);
        assert!(stored.resolved_at.is_some());
        assert_eq!(store.count_active_alerts().await.unwrap(), 0);
    }
}
