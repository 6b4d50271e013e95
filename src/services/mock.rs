//! Deterministic stand-in for the insight service.
//!
//! Used in mock mode and whenever the real service cannot be reached, so a
//! request always ends with a structurally valid [`AnalysisResult`].

use crate::analyzers::types::{Anomaly, Severity};
use crate::services::insight_api::AnalysisResult;

/// Most anomalies echoed back by the mock.
pub const MOCK_ANOMALY_LIMIT: usize = 10;

pub fn mock_analysis(anomalies: &[Anomaly], location_count: usize) -> AnalysisResult {
    let high = anomalies
        .iter()
        .filter(|a| a.severity == Severity::High)
        .count();

    let insights = match anomalies
        .iter()
        .max_by(|a, b| a.deviation_pct.abs().total_cmp(&b.deviation_pct.abs()))
    {
        Some(peak) => {
            let mut text = format!(
                "Analysis detected {} traffic anomalies across {} locations. ",
                anomalies.len(),
                location_count
            );
            if high > 0 {
                text.push_str(&format!(
                    "{high} high-severity incidents require immediate attention. "
                ));
            }
            let when: String = peak.timestamp.chars().take(16).collect();
            text.push_str(&format!(
                "Most significant anomaly: {} at {} with {:.1}% deviation from baseline.",
                peak.location_id,
                when,
                (peak.deviation_pct * 100.0).abs()
            ));
            text
        }
        None => "No significant traffic anomalies detected. Traffic patterns are within normal \
                 operating ranges across all monitored locations."
            .to_string(),
    };

    let mut recommendations = Vec::new();
    if anomalies.len() > 3 {
        recommendations.push(
            "Consider deploying additional traffic monitoring resources during peak anomaly hours"
                .to_string(),
        );
        recommendations.push("Review signal timing optimization for affected corridors".to_string());
    }
    if high > 0 {
        recommendations.push(
            "Implement incident response protocols for high-severity congestion events".to_string(),
        );
        recommendations
            .push("Evaluate alternative route suggestions for navigation systems".to_string());
    }
    if recommendations.is_empty() {
        recommendations.push("Maintain current traffic management strategies".to_string());
        recommendations.push("Continue monitoring for emerging patterns".to_string());
    }

    AnalysisResult {
        anomalies: anomalies.iter().take(MOCK_ANOMALY_LIMIT).cloned().collect(),
        insights,
        recommendations,
    }
}
