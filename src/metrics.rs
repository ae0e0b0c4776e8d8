//! Window aggregation: turning raw sample windows into metrics summaries.
//!
//! Two entry points: [`overview_for_hours`] backs `/metrics` and the simple
//! insights read, [`detailed_metrics`] backs the rich report. Both tolerate
//! an empty window and never fail on missing data; absent aggregates become
//! `None` (overview) or zero-filled TVOC stats (rich metrics).

use chrono::{DateTime, Duration, Utc};

use crate::model::{
    DEFAULT_WINDOW_HOURS, Severity, TVOC_CRITICAL_PPB, TVOC_ELEVATED_PPB, WindowMetrics,
    WindowOverview,
};
use crate::storage::Storage;

/// Round to 3 decimal places. Presentation only; classification happens on
/// unrounded values before this is applied.
pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Drop NULL-ish numeric garbage: NaN and infinities behave like absent data.
fn clean(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

fn coerce_window(window_hours: i64) -> i64 {
    if window_hours <= 0 {
        DEFAULT_WINDOW_HOURS
    } else {
        window_hours
    }
}

/// Simple overview for a caller-specified window.
pub async fn overview_for_hours(
    storage: &Storage,
    window_hours: i64,
    now: DateTime<Utc>,
) -> anyhow::Result<WindowOverview> {
    let window_hours = coerce_window(window_hours);

    let avgs = storage.averages_last_hours(window_hours, now).await?;

    let avg_tvoc = clean(avgs.avg_tvoc_ppb);
    let severity = Severity::from_avg_tvoc(avg_tvoc);

    Ok(WindowOverview {
        window_hours,
        avg_tvoc_ppb: avg_tvoc.map(round3),
        avg_formaldehyde_ppm: clean(avgs.avg_formaldehyde_ppm).map(round3),
        avg_benzene_ppm: clean(avgs.avg_benzene_ppm).map(round3),
        severity,
    })
}

/// Rich metrics for the awareness report.
///
/// The slope is only derived when the window holds at least two samples and
/// both half-window averages exist; one reading cannot define a trend.
pub async fn detailed_metrics(
    storage: &Storage,
    window_hours: i64,
    now: DateTime<Utc>,
) -> anyhow::Result<WindowMetrics> {
    let window_hours = coerce_window(window_hours);

    let stats = storage
        .detailed_stats(window_hours, TVOC_ELEVATED_PPB, TVOC_CRITICAL_PPB, now)
        .await?;

    let samples_count = stats.samples_count.max(0);

    let slope = if samples_count > 1 {
        let (first, second) = storage.tvoc_halves(window_hours, now).await?;
        match (clean(first), clean(second)) {
            (Some(first), Some(second)) => {
                Some(round3((second - first) / (window_hours as f64 / 2.0)))
            }
            _ => None,
        }
    } else {
        None
    };

    let avg_tvoc = clean(stats.avg_tvoc_ppb);
    let severity = Severity::from_avg_tvoc(avg_tvoc);

    let (fraction_elevated, fraction_critical) = if samples_count > 0 {
        (
            stats.count_elevated as f64 / samples_count as f64,
            stats.count_critical as f64 / samples_count as f64,
        )
    } else {
        (0.0, 0.0)
    };

    // An empty window still reports a concrete span and concrete TVOC stats
    // so the rich report always has numbers to talk about.
    let window_start = stats
        .window_start
        .unwrap_or_else(|| now - Duration::hours(window_hours));
    let window_end = stats.window_end.unwrap_or(now);

    let zero_fill = |v: Option<f64>| {
        if samples_count == 0 {
            Some(v.unwrap_or(0.0))
        } else {
            v
        }
    };

    Ok(WindowMetrics {
        window_hours,
        samples_count,
        window_start,
        window_end,
        avg_tvoc_ppb: zero_fill(avg_tvoc.map(round3)),
        min_tvoc_ppb: zero_fill(clean(stats.min_tvoc_ppb).map(round3)),
        max_tvoc_ppb: zero_fill(clean(stats.max_tvoc_ppb).map(round3)),
        stddev_tvoc_ppb: zero_fill(clean(stats.stddev_tvoc_ppb).map(round3)),
        avg_formaldehyde_ppm: clean(stats.avg_formaldehyde_ppm).map(round3),
        avg_benzene_ppm: clean(stats.avg_benzene_ppm).map(round3),
        severity,
        tvoc_slope_ppb_per_hr: slope,
        fraction_time_elevated: round3(fraction_elevated),
        fraction_time_critical: round3(fraction_critical),
        elevated_threshold_ppb: TVOC_ELEVATED_PPB,
        critical_threshold_ppb: TVOC_CRITICAL_PPB,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SamplePoint;

    async fn setup_test_storage() -> Storage {
        Storage::new("sqlite::memory:").await.unwrap()
    }

    fn reading(ts: DateTime<Utc>, tvoc: f64) -> SamplePoint {
        SamplePoint {
            ts,
            tvoc_ppb: Some(tvoc),
            voc_index: None,
            eco2_ppm: None,
            hum_rel: None,
            temp_c: None,
            formaldehyde_ppm: Some(0.03),
            benzene_ppm: None,
        }
    }

    #[test]
    fn test_round3() {
        assert_eq!(round3(574.7561), 574.756);
        assert_eq!(round3(0.0005), 0.001);
        assert_eq!(round3(-1.23449), -1.234);
    }

    #[tokio::test]
    async fn test_overview_empty_window() {
        let storage = setup_test_storage().await;

        let overview = overview_for_hours(&storage, 24, Utc::now()).await.unwrap();

        assert_eq!(overview.window_hours, 24);
        assert!(overview.avg_tvoc_ppb.is_none());
        assert_eq!(overview.severity, Severity::Safe);
    }

    #[tokio::test]
    async fn test_overview_nonpositive_window_coerced() {
        let storage = setup_test_storage().await;

        let overview = overview_for_hours(&storage, -3, Utc::now()).await.unwrap();

        assert_eq!(overview.window_hours, 24);
    }

    #[tokio::test]
    async fn test_overview_classifies_from_average() {
        let storage = setup_test_storage().await;
        let now = Utc::now();

        for offset in 1..=4 {
            storage
                .insert_sample("dev-1", &reading(now - Duration::minutes(offset), 600.0))
                .await
                .unwrap();
        }

        let overview = overview_for_hours(&storage, 24, now).await.unwrap();

        assert_eq!(overview.avg_tvoc_ppb, Some(600.0));
        assert_eq!(overview.severity, Severity::Elevated);
    }

    #[tokio::test]
    async fn test_detailed_metrics_empty_window() {
        let storage = setup_test_storage().await;
        let now = Utc::now();

        let metrics = detailed_metrics(&storage, 24, now).await.unwrap();

        assert_eq!(metrics.samples_count, 0);
        assert_eq!(metrics.fraction_time_elevated, 0.0);
        assert_eq!(metrics.fraction_time_critical, 0.0);
        // Zero-filled TVOC stats, defaulted window span
        assert_eq!(metrics.avg_tvoc_ppb, Some(0.0));
        assert_eq!(metrics.stddev_tvoc_ppb, Some(0.0));
        assert_eq!(metrics.window_end, now);
        assert_eq!(metrics.window_start, now - Duration::hours(24));
        assert!(metrics.tvoc_slope_ppb_per_hr.is_none());
        assert_eq!(metrics.severity, Severity::Safe);
    }

    #[tokio::test]
    async fn test_detailed_metrics_fractions() {
        let storage = setup_test_storage().await;
        let now = Utc::now();

        for (offset, tvoc) in [(1, 400.0), (2, 600.0), (3, 700.0), (4, 950.0)] {
            storage
                .insert_sample("dev-1", &reading(now - Duration::minutes(offset), tvoc))
                .await
                .unwrap();
        }

        let metrics = detailed_metrics(&storage, 24, now).await.unwrap();

        assert_eq!(metrics.samples_count, 4);
        assert_eq!(metrics.fraction_time_elevated, 0.75);
        assert_eq!(metrics.fraction_time_critical, 0.25);
        assert_eq!(metrics.severity, Severity::Elevated);
    }

    #[tokio::test]
    async fn test_slope_absent_for_single_sample() {
        let storage = setup_test_storage().await;
        let now = Utc::now();

        storage
            .insert_sample("dev-1", &reading(now - Duration::hours(1), 400.0))
            .await
            .unwrap();

        let metrics = detailed_metrics(&storage, 24, now).await.unwrap();

        assert_eq!(metrics.samples_count, 1);
        assert!(metrics.tvoc_slope_ppb_per_hr.is_none());
    }

    #[tokio::test]
    async fn test_slope_rising_trend() {
        let storage = setup_test_storage().await;
        let now = Utc::now();

        // 4h window, first half at 100, second half at 300: slope = 200 / 2 = 100
        storage
            .insert_sample("dev-1", &reading(now - Duration::hours(3), 100.0))
            .await
            .unwrap();
        storage
            .insert_sample("dev-1", &reading(now - Duration::hours(1), 300.0))
            .await
            .unwrap();

        let metrics = detailed_metrics(&storage, 4, now).await.unwrap();

        assert_eq!(metrics.tvoc_slope_ppb_per_hr, Some(100.0));
    }

    #[tokio::test]
    async fn test_slope_absent_when_half_is_empty() {
        let storage = setup_test_storage().await;
        let now = Utc::now();

        // Both samples land in the second half of the 4h window.
        storage
            .insert_sample("dev-1", &reading(now - Duration::hours(1), 300.0))
            .await
            .unwrap();
        storage
            .insert_sample("dev-1", &reading(now - Duration::minutes(30), 320.0))
            .await
            .unwrap();

        let metrics = detailed_metrics(&storage, 4, now).await.unwrap();

        assert_eq!(metrics.samples_count, 2);
        assert!(metrics.tvoc_slope_ppb_per_hr.is_none());
    }
}
