//! Data models for Fireshield.
//!
//! Everything in here is a request-scoped value object: metrics summaries,
//! advice shapes, and the report envelopes returned to callers. Field names
//! on the wire follow the historical JSON contract consumed by the mobile
//! clients (`avg_tvoc_ppb`, `deconReminder`, `riskScore`, ...), so several
//! structs carry serde renames.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// TVOC concentration (ppb) at or above which a window is considered elevated.
pub const TVOC_ELEVATED_PPB: f64 = 500.0;

/// TVOC concentration (ppb) at or above which a window is considered critical.
pub const TVOC_CRITICAL_PPB: f64 = 900.0;

/// Window length used when the caller omits or mangles the `hours` parameter.
pub const DEFAULT_WINDOW_HOURS: i64 = 24;

/// Three-level risk tier derived solely from the window's average TVOC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    /// Average TVOC below the elevated threshold, or no data at all.
    Safe,

    /// Average TVOC in `[500, 900)` ppb.
    Elevated,

    /// Average TVOC at or above 900 ppb.
    Critical,
}

impl Severity {
    /// Classify a window from its average TVOC concentration.
    ///
    /// Total function: an absent average (empty window, NULL aggregate)
    /// classifies as `Safe`. Classification always uses the unrounded value;
    /// rounding is applied separately for presentation.
    pub fn from_avg_tvoc(avg_tvoc_ppb: Option<f64>) -> Self {
        match avg_tvoc_ppb {
            Some(avg) if avg >= TVOC_CRITICAL_PPB => Severity::Critical,
            Some(avg) if avg >= TVOC_ELEVATED_PPB => Severity::Elevated,
            _ => Severity::Safe,
        }
    }

    /// True for the tiers that warrant a decontamination reminder.
    pub fn needs_decon(self) -> bool {
        matches!(self, Severity::Elevated | Severity::Critical)
    }

    /// Wire-format name, as it appears in JSON and prompt text.
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Safe => "SAFE",
            Severity::Elevated => "ELEVATED",
            Severity::Critical => "CRITICAL",
        }
    }
}

/// Where the advice in a report came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportSource {
    /// The generative text service produced the advice.
    Model,

    /// The deterministic canned advice was substituted.
    Fallback,
}

/// Compact advice shape returned by `GET /insights`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleAdvice {
    /// Two sentences at most.
    pub summary: String,

    /// One to three short, practical action bullets, in order.
    pub actions: Vec<String>,

    /// Present only when severity is ELEVATED or CRITICAL.
    #[serde(rename = "deconReminder")]
    pub decon_reminder: Option<String>,
}

/// Structured awareness report returned by `GET /insights/report`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RichReport {
    /// Two to three sentence overview.
    pub summary: String,

    /// Overall risk on a 0-100 scale.
    #[serde(rename = "riskScore")]
    pub risk_score: i64,

    /// One to five observations drawn from the window statistics.
    #[serde(rename = "keyFindings")]
    pub key_findings: Vec<String>,

    /// One to five recommended actions.
    pub recommendations: Vec<String>,

    /// One to six decontamination steps.
    #[serde(rename = "deconChecklist")]
    pub decon_checklist: Vec<String>,

    /// Optional paragraph suggesting a policy change.
    #[serde(rename = "policySuggestion")]
    pub policy_suggestion: Option<String>,
}

/// Simple per-window overview: averages plus the derived severity.
///
/// Used both as the `/metrics` response body and as the `metrics` map inside
/// the simple insights report.
#[derive(Debug, Clone, Serialize)]
pub struct WindowOverview {
    #[serde(rename = "windowHours")]
    pub window_hours: i64,

    pub avg_tvoc_ppb: Option<f64>,
    pub avg_formaldehyde_ppm: Option<f64>,
    pub avg_benzene_ppm: Option<f64>,

    pub severity: Severity,
}

/// Full statistics for one sample window, feeding the rich report prompt.
#[derive(Debug, Clone, Serialize)]
pub struct WindowMetrics {
    #[serde(rename = "windowHours")]
    pub window_hours: i64,

    #[serde(rename = "samplesCount")]
    pub samples_count: i64,

    /// Defaults to `now - window_hours` when the window has no samples.
    #[serde(rename = "windowStart")]
    pub window_start: DateTime<Utc>,

    /// Defaults to `now` when the window has no samples.
    #[serde(rename = "windowEnd")]
    pub window_end: DateTime<Utc>,

    pub avg_tvoc_ppb: Option<f64>,
    pub min_tvoc_ppb: Option<f64>,
    pub max_tvoc_ppb: Option<f64>,
    pub stddev_tvoc_ppb: Option<f64>,
    pub avg_formaldehyde_ppm: Option<f64>,
    pub avg_benzene_ppm: Option<f64>,

    pub severity: Severity,

    /// Crude trend: `(second half avg - first half avg) / (hours / 2)`.
    /// Absent when the window holds fewer than two samples.
    pub tvoc_slope_ppb_per_hr: Option<f64>,

    /// Fraction of samples at or above the elevated threshold, in `[0, 1]`.
    pub fraction_time_elevated: f64,

    /// Fraction of samples at or above the critical threshold, in `[0, 1]`.
    pub fraction_time_critical: f64,

    pub elevated_threshold_ppb: f64,
    pub critical_threshold_ppb: f64,
}

/// Response envelope for `GET /insights`.
#[derive(Debug, Clone, Serialize)]
pub struct InsightsResponse {
    #[serde(rename = "windowHours")]
    pub window_hours: i64,

    /// The model the advice came from, or the primary model name when the
    /// fallback was used (kept for audit).
    pub model: String,

    /// Metrics as a generic map so clients tolerate added fields.
    pub metrics: serde_json::Value,

    pub advice: SimpleAdvice,

    pub source: ReportSource,
}

/// Response envelope for `GET /insights/report`.
#[derive(Debug, Clone, Serialize)]
pub struct ReportResponse {
    #[serde(rename = "windowHours")]
    pub window_hours: i64,

    /// Metrics as a generic map so clients tolerate added fields.
    pub metrics: serde_json::Value,

    #[serde(rename = "aiReport")]
    pub ai_report: RichReport,

    pub model: String,

    pub source: ReportSource,
}

/// One VOC reading from a device.
#[derive(Debug, Clone, Deserialize)]
pub struct SamplePoint {
    /// Client-side measurement timestamp (UTC).
    pub ts: DateTime<Utc>,

    pub tvoc_ppb: Option<f64>,
    pub voc_index: Option<f64>,
    pub eco2_ppm: Option<f64>,
    pub hum_rel: Option<f64>,

    /// Accepts both `temp_c` and `tempC` on the wire.
    #[serde(alias = "tempC")]
    pub temp_c: Option<f64>,

    pub formaldehyde_ppm: Option<f64>,
    pub benzene_ppm: Option<f64>,
}

/// Request body for `POST /ingest`: a batch of readings from one device.
#[derive(Debug, Clone, Deserialize)]
pub struct SampleBatchRequest {
    #[serde(rename = "deviceId")]
    pub device_id: String,

    pub samples: Vec<SamplePoint>,
}

/// Largest batch accepted in one ingest request.
pub const MAX_INGEST_BATCH: usize = 1000;

/// Response for `POST /ingest`: how many readings were stored vs dropped.
#[derive(Debug, Clone, Serialize)]
pub struct IngestResponse {
    pub accepted: usize,
    pub rejected: usize,
}

/// One bucketed point of the TVOC time series.
#[derive(Debug, Clone, Serialize)]
pub struct TimePoint {
    pub ts: DateTime<Utc>,
    pub tvoc_ppb: Option<f64>,
}

/// Query parameters for the insights and metrics endpoints.
///
/// `hours` is kept as a raw string: a malformed value (non-numeric,
/// non-positive) means "use the default window", never a 400.
#[derive(Debug, Default, Deserialize)]
pub struct HoursQuery {
    pub hours: Option<String>,
}

impl HoursQuery {
    /// Resolve the requested window, coercing anything unusable to 24 h.
    pub fn window_hours(&self) -> i64 {
        coerce_hours(self.hours.as_deref())
    }
}

/// Query parameters for `GET /series`.
#[derive(Debug, Default, Deserialize)]
pub struct SeriesQuery {
    pub hours: Option<String>,
    pub bucket: Option<String>,
}

impl SeriesQuery {
    pub fn window_hours(&self) -> i64 {
        coerce_hours(self.hours.as_deref())
    }

    /// Bucket size for the series; anything unrecognized collapses to `hour`.
    pub fn bucket(&self) -> SeriesBucket {
        match self.bucket.as_deref() {
            Some("minute") => SeriesBucket::Minute,
            Some("day") => SeriesBucket::Day,
            _ => SeriesBucket::Hour,
        }
    }
}

/// Granularity of the TVOC series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesBucket {
    Minute,
    Hour,
    Day,
}

impl SeriesBucket {
    /// Bucket width in seconds, for SQL-side grouping.
    pub fn seconds(self) -> i64 {
        match self {
            SeriesBucket::Minute => 60,
            SeriesBucket::Hour => 3600,
            SeriesBucket::Day => 86400,
        }
    }
}

fn coerce_hours(raw: Option<&str>) -> i64 {
    raw.and_then(|s| s.trim().parse::<i64>().ok())
        .filter(|h| *h > 0)
        .unwrap_or(DEFAULT_WINDOW_HOURS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_safe_below_threshold() {
        assert_eq!(Severity::from_avg_tvoc(Some(0.0)), Severity::Safe);
        assert_eq!(Severity::from_avg_tvoc(Some(120.0)), Severity::Safe);
        assert_eq!(Severity::from_avg_tvoc(Some(499.999)), Severity::Safe);
    }

    #[test]
    fn test_severity_elevated_band() {
        assert_eq!(Severity::from_avg_tvoc(Some(500.0)), Severity::Elevated);
        assert_eq!(Severity::from_avg_tvoc(Some(700.0)), Severity::Elevated);
        assert_eq!(Severity::from_avg_tvoc(Some(899.999)), Severity::Elevated);
    }

    #[test]
    fn test_severity_critical_at_threshold() {
        assert_eq!(Severity::from_avg_tvoc(Some(900.0)), Severity::Critical);
        assert_eq!(Severity::from_avg_tvoc(Some(5000.0)), Severity::Critical);
    }

    #[test]
    fn test_severity_missing_average_is_safe() {
        assert_eq!(Severity::from_avg_tvoc(None), Severity::Safe);
    }

    #[test]
    fn test_severity_serializes_uppercase() {
        assert_eq!(
            serde_json::to_string(&Severity::Elevated).unwrap(),
            "\"ELEVATED\""
        );
    }

    #[test]
    fn test_hours_query_coercion() {
        let q = |h: Option<&str>| HoursQuery {
            hours: h.map(String::from),
        };

        assert_eq!(q(None).window_hours(), 24);
        assert_eq!(q(Some("168")).window_hours(), 168);
        assert_eq!(q(Some("0")).window_hours(), 24);
        assert_eq!(q(Some("-6")).window_hours(), 24);
        assert_eq!(q(Some("soon")).window_hours(), 24);
    }

    #[test]
    fn test_series_bucket_coercion() {
        let q = |b: Option<&str>| SeriesQuery {
            hours: None,
            bucket: b.map(String::from),
        };

        assert_eq!(q(Some("minute")).bucket(), SeriesBucket::Minute);
        assert_eq!(q(Some("day")).bucket(), SeriesBucket::Day);
        assert_eq!(q(Some("fortnight")).bucket(), SeriesBucket::Hour);
        assert_eq!(q(None).bucket(), SeriesBucket::Hour);
    }

    #[test]
    fn test_sample_point_temp_alias() {
        let p: SamplePoint =
            serde_json::from_str(r#"{"ts":"2025-10-19T12:00:00Z","tempC":21.5}"#).unwrap();
        assert_eq!(p.temp_c, Some(21.5));
    }
}
