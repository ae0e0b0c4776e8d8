//! Prompt templates for the generative text service.
//!
//! Three pure builders, no I/O. The compact prompt is the first attempt for
//! simple advice; the ultra-compact one is the retry used after a truncated
//! or malformed response, with hard character caps to shrink the output; the
//! rich prompt requests the full awareness report shape.

use crate::model::{WindowMetrics, WindowOverview};

fn num(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{v}"),
        None => "null".to_string(),
    }
}

/// Short, clear, minimal tokens.
pub fn compact_prompt(overview: &WindowOverview, window_hours: i64) -> String {
    format!(
        "Strict JSON only. Keys: summary, actions, deconReminder.\n\
         No markdown, no extra text.\n\
         \n\
         Inputs (last {window_hours} h):\n\
         avg_tvoc_ppb={tvoc}\n\
         avg_formaldehyde_ppm={ch2o}\n\
         avg_benzene_ppm={benzene}\n\
         severity={severity}\n\
         \n\
         Rules:\n\
         - summary: 2 short sentences max.\n\
         - actions: 3 bullets, short and practical.\n\
         - deconReminder: include only if severity is ELEVATED or CRITICAL.\n",
        tvoc = num(overview.avg_tvoc_ppb),
        ch2o = num(overview.avg_formaldehyde_ppm),
        benzene = num(overview.avg_benzene_ppm),
        severity = overview.severity.as_str(),
    )
}

/// Ultra-compact and minified, for retries after truncation.
pub fn ultra_compact_prompt(overview: &WindowOverview) -> String {
    format!(
        "Output one line of MINIFIED JSON only: \
         {{\"summary\":\"...\",\"actions\":[\"...\",\"...\",\"...\"],\"deconReminder\":\"...\"}}\n\
         Constraints: summary<=160 chars; each action<=80 chars; deconReminder<=120 chars; \
         omit deconReminder unless severity is ELEVATED or CRITICAL.\n\
         Inputs: tvoc={tvoc}, ch2o={ch2o}, benzene={benzene}, severity={severity}.\n",
        tvoc = num(overview.avg_tvoc_ppb),
        ch2o = num(overview.avg_formaldehyde_ppm),
        benzene = num(overview.avg_benzene_ppm),
        severity = overview.severity.as_str(),
    )
}

/// Full awareness report request, fed the complete window statistics.
pub fn rich_report_prompt(metrics: &WindowMetrics) -> String {
    format!(
        "Strict JSON only, no markdown. Keys: summary, riskScore, keyFindings, \
         recommendations, deconChecklist, policySuggestion.\n\
         \n\
         Inputs (last {hours} h, {count} samples, {start} to {end}):\n\
         avg_tvoc_ppb={avg}\n\
         min_tvoc_ppb={min}\n\
         max_tvoc_ppb={max}\n\
         stddev_tvoc_ppb={stddev}\n\
         avg_formaldehyde_ppm={ch2o}\n\
         avg_benzene_ppm={benzene}\n\
         severity={severity}\n\
         tvoc_slope_ppb_per_hr={slope}\n\
         fraction_time_elevated={frac_elev}\n\
         fraction_time_critical={frac_crit}\n\
         elevated_threshold_ppb={elev}\n\
         critical_threshold_ppb={crit}\n\
         \n\
         Rules:\n\
         - summary: 2-3 sentences for a station officer.\n\
         - riskScore: integer 0-100 reflecting average, peaks, and time above threshold.\n\
         - keyFindings: 3-5 short bullets grounded in the numbers above.\n\
         - recommendations: 3-5 short, practical bullets.\n\
         - deconChecklist: 3-6 concrete gear decontamination steps.\n\
         - policySuggestion: include only if severity is ELEVATED or CRITICAL, \
         or fraction_time_critical > 0.10; otherwise omit the key.\n",
        hours = metrics.window_hours,
        count = metrics.samples_count,
        start = metrics.window_start.to_rfc3339(),
        end = metrics.window_end.to_rfc3339(),
        avg = num(metrics.avg_tvoc_ppb),
        min = num(metrics.min_tvoc_ppb),
        max = num(metrics.max_tvoc_ppb),
        stddev = num(metrics.stddev_tvoc_ppb),
        ch2o = num(metrics.avg_formaldehyde_ppm),
        benzene = num(metrics.avg_benzene_ppm),
        severity = metrics.severity.as_str(),
        slope = num(metrics.tvoc_slope_ppb_per_hr),
        frac_elev = metrics.fraction_time_elevated,
        frac_crit = metrics.fraction_time_critical,
        elev = metrics.elevated_threshold_ppb,
        crit = metrics.critical_threshold_ppb,
    )
}
