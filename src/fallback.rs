//! Deterministic canned advice, used whenever the generative service is
//! unconfigured, unreachable, or unusable.
//!
//! Pure functions of the severity tier. The canned text is the product's
//! reviewed safety copy; it must stay deliverable with zero external
//! dependencies reachable.

use crate::model::{RichReport, Severity, SimpleAdvice};
use crate::parser::default_decon_checklist;

/// Canned simple advice for a severity tier.
pub fn fallback_advice(severity: Severity) -> SimpleAdvice {
    match severity {
        Severity::Critical => SimpleAdvice {
            summary: "Average VOC levels are in a critical range. Limit time in affected \
                      areas, escalate ventilation, and prioritize thorough gear \
                      decontamination."
                .to_string(),
            actions: vec![
                "Mask up when re-entering contaminated zones.".to_string(),
                "Run high-flow ventilation and air scrubbers if available.".to_string(),
                "Initiate full gear laundering and bay decon today.".to_string(),
            ],
            decon_reminder: Some(
                "Reminder: Decon early and often to reduce VOC carryback into quarters."
                    .to_string(),
            ),
        },
        Severity::Elevated => SimpleAdvice {
            summary: "Average VOC levels are elevated. Increase ventilation, isolate \
                      contaminated gear, and complete decon steps promptly."
                .to_string(),
            actions: vec![
                "Keep gear bagged outside living spaces.".to_string(),
                "Vent apparatus bay and turnout storage areas.".to_string(),
                "Schedule gear cleaning before next shift.".to_string(),
            ],
            decon_reminder: Some("Reminder: Perform gross decon and clean gear ASAP.".to_string()),
        },
        Severity::Safe => SimpleAdvice {
            summary: "Average VOC levels appear within a safe range. Maintain routine \
                      ventilation and post-call hygiene to minimize residual exposure."
                .to_string(),
            actions: vec![
                "Store PPE away from dorms and kitchens.".to_string(),
                "Air out apparatus bay after each call.".to_string(),
                "Follow handwashing and shower-within-the-hour.".to_string(),
            ],
            decon_reminder: None,
        },
    }
}

/// Canned rich report for a severity tier.
pub fn fallback_report(severity: Severity) -> RichReport {
    let advice = fallback_advice(severity);

    let (risk_score, key_findings, policy_suggestion) = match severity {
        Severity::Critical => (
            90,
            vec![
                "Average TVOC is at or above the critical threshold.".to_string(),
                "Sustained exposure at these levels warrants immediate mitigation.".to_string(),
                "Live model commentary was unavailable for this window.".to_string(),
            ],
            Some(
                "Restrict access to affected areas and review ventilation protocols \
                 until averages return below the elevated threshold."
                    .to_string(),
            ),
        ),
        Severity::Elevated => (
            65,
            vec![
                "Average TVOC is above the elevated threshold.".to_string(),
                "Readings in this band indicate meaningful off-gassing or contamination.".to_string(),
                "Live model commentary was unavailable for this window.".to_string(),
            ],
            Some(
                "Schedule additional gear cleaning and track elevated exposure events \
                 weekly until averages normalize."
                    .to_string(),
            ),
        ),
        Severity::Safe => (
            10,
            vec![
                "Average TVOC is below the elevated threshold.".to_string(),
                "No sustained exceedance detected in this window.".to_string(),
                "Live model commentary was unavailable for this window.".to_string(),
            ],
            None,
        ),
    };

    RichReport {
        summary: advice.summary,
        risk_score,
        key_findings,
        recommendations: advice.actions,
        decon_checklist: default_decon_checklist(),
        policy_suggestion,
    }
}
