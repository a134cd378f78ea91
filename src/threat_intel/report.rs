//! Analysis reports returned by the threat-intel API

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Per-verdict engine counts from `last_analysis_stats`
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisStats {
    /// Engines flagging the object as malicious
    pub malicious: u32,
    /// Engines flagging the object as suspicious
    pub suspicious: u32,
    /// Engines with no detection
    pub undetected: u32,
    /// Engines declaring the object harmless
    pub harmless: u32,
    /// Engines that timed out
    pub timeout: u32,
}

impl AnalysisStats {
    /// Total number of engines that reported
    pub fn total(&self) -> u32 {
        self.malicious + self.suspicious + self.undetected + self.harmless + self.timeout
    }
}

/// One engine's entry in `last_analysis_results`
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineResult {
    /// Verdict category ("malicious", "suspicious", "harmless", ...)
    pub category: Option<String>,
    /// Engine name
    pub engine_name: Option<String>,
    /// Detection name, if any
    pub result: Option<String>,
    /// Detection method
    pub method: Option<String>,
}

/// Community vote totals
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoteTotals {
    /// Harmless votes
    pub harmless: u32,
    /// Malicious votes
    pub malicious: u32,
}

/// Attributes of a URL, file or domain object
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectAttributes {
    /// Engine counts
    pub last_analysis_stats: AnalysisStats,
    /// Community reputation score
    pub reputation: i64,
    /// Unix timestamp of the last analysis (absent until analyzed)
    pub last_analysis_date: Option<i64>,
    /// Per-engine results
    pub last_analysis_results: HashMap<String, EngineResult>,
    /// Categories assigned by classification services
    pub categories: HashMap<String, String>,
    /// Community votes
    pub total_votes: VoteTotals,
    /// Raw WHOIS record (domains)
    pub whois: Option<String>,
    /// Known subdomains (domains)
    pub subdomains: Vec<String>,
}

/// Verdict rule shared by URL and file scans
///
/// Any malicious or suspicious engine hit, or a negative reputation, marks
/// the object malicious.
pub fn is_malicious(stats: &AnalysisStats, reputation: i64) -> bool {
    stats.malicious > 0 || stats.suspicious > 0 || reputation < 0
}

/// A completed analysis
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    /// Object identifier
    pub id: String,
    /// Parsed attributes
    pub attributes: ObjectAttributes,
}

impl AnalysisReport {
    /// Whether the verdict is malicious
    pub fn is_malicious(&self) -> bool {
        is_malicious(
            &self.attributes.last_analysis_stats,
            self.attributes.reputation,
        )
    }

    /// Structured threat details for audit entries
    pub fn threat_summary(&self) -> ThreatSummary {
        let stats = &self.attributes.last_analysis_stats;

        let mut detections: Vec<EngineHit> = self
            .attributes
            .last_analysis_results
            .iter()
            .filter(|(_, r)| {
                matches!(
                    r.category.as_deref(),
                    Some("malicious") | Some("suspicious")
                )
            })
            .map(|(engine, r)| EngineHit {
                engine: r.engine_name.clone().unwrap_or_else(|| engine.clone()),
                category: r.category.clone().unwrap_or_default(),
                result: r.result.clone(),
            })
            .collect();
        detections.sort_by(|a, b| a.engine.cmp(&b.engine));

        let threat_names: BTreeSet<String> = detections
            .iter()
            .filter_map(|hit| hit.result.clone())
            .collect();

        ThreatSummary {
            malicious: stats.malicious,
            suspicious: stats.suspicious,
            undetected: stats.undetected,
            harmless: stats.harmless,
            total_engines: stats.total(),
            reputation: self.attributes.reputation,
            threat_names: threat_names.into_iter().collect(),
            detections,
        }
    }

    /// Compact verdict persisted on the scanned record
    pub fn to_verdict_json(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "malicious": self.is_malicious(),
            "stats": self.attributes.last_analysis_stats,
            "reputation": self.attributes.reputation,
            "last_analysis_date": self.attributes.last_analysis_date,
            "categories": self.attributes.categories,
            "total_votes": self.attributes.total_votes,
        })
    }
}

/// Result of polling for a report
#[derive(Clone, Debug, PartialEq)]
pub enum ScanReport {
    /// Analysis is not available yet
    Pending,
    /// Analysis finished
    Ready(AnalysisReport),
}

/// An engine that flagged the object
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineHit {
    /// Engine name
    pub engine: String,
    /// "malicious" or "suspicious"
    pub category: String,
    /// Detection name
    pub result: Option<String>,
}

/// Threat information extracted from a malicious verdict
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreatSummary {
    /// Malicious engine count
    pub malicious: u32,
    /// Suspicious engine count
    pub suspicious: u32,
    /// Undetected engine count
    pub undetected: u32,
    /// Harmless engine count
    pub harmless: u32,
    /// Engines that reported
    pub total_engines: u32,
    /// Community reputation
    pub reputation: i64,
    /// Distinct detection names, sorted
    pub threat_names: Vec<String>,
    /// Engines that flagged the object, sorted by engine
    pub detections: Vec<EngineHit>,
}

/// Domain report
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DomainInfo {
    /// Domain name
    pub domain: String,
    /// Parsed attributes
    pub attributes: ObjectAttributes,
}

/// Aggregated community votes on a domain
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainVotes {
    /// Harmless votes
    pub harmless: u32,
    /// Malicious votes
    pub malicious: u32,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn stats(malicious: u32, suspicious: u32) -> AnalysisStats {
        AnalysisStats {
            malicious,
            suspicious,
            ..Default::default()
        }
    }

    #[test]
    fn malicious_rule_table() {
        assert!(is_malicious(&stats(1, 0), 0));
        assert!(is_malicious(&stats(0, 1), 0));
        assert!(is_malicious(&stats(0, 0), -5));
        assert!(!is_malicious(&stats(0, 0), 0));
        assert!(!is_malicious(&stats(0, 0), 12));
    }

    #[test]
    fn attributes_tolerate_missing_fields() {
        let attrs: ObjectAttributes = serde_json::from_value(serde_json::json!({
            "last_analysis_stats": {"malicious": 2},
            "unknown_field": true
        }))
        .unwrap();
        assert_eq!(attrs.last_analysis_stats.malicious, 2);
        assert_eq!(attrs.last_analysis_stats.harmless, 0);
        assert_eq!(attrs.reputation, 0);
        assert!(attrs.last_analysis_date.is_none());
    }

    #[test]
    fn threat_summary_collects_hits() {
        let attrs: ObjectAttributes = serde_json::from_value(serde_json::json!({
            "last_analysis_stats": {"malicious": 2, "suspicious": 1, "undetected": 5, "harmless": 0},
            "reputation": -3,
            "last_analysis_date": 1_700_000_000,
            "last_analysis_results": {
                "Alpha": {"category": "malicious", "engine_name": "Alpha", "result": "Trojan.Gen"},
                "Beta": {"category": "malicious", "engine_name": "Beta", "result": "Trojan.Gen"},
                "Gamma": {"category": "suspicious", "engine_name": "Gamma", "result": "Heur.Suspect"},
                "Delta": {"category": "undetected", "engine_name": "Delta", "result": null}
            }
        }))
        .unwrap();
        let report = AnalysisReport {
            id: "abc".into(),
            attributes: attrs,
        };

        assert!(report.is_malicious());
        let summary = report.threat_summary();
        assert_eq!(summary.total_engines, 8);
        assert_eq!(summary.threat_names, vec!["Heur.Suspect", "Trojan.Gen"]);
        let engines: Vec<_> = summary.detections.iter().map(|d| d.engine.as_str()).collect();
        assert_eq!(engines, vec!["Alpha", "Beta", "Gamma"]);
    }

    #[test]
    fn verdict_json_carries_flag_and_stats() {
        let report = AnalysisReport {
            id: "u1".into(),
            attributes: ObjectAttributes {
                last_analysis_stats: stats(0, 0),
                last_analysis_date: Some(1),
                ..Default::default()
            },
        };
        let verdict = report.to_verdict_json();
        assert_eq!(verdict["malicious"], false);
        assert_eq!(verdict["stats"]["malicious"], 0);
        assert_eq!(verdict["id"], "u1");
    }
}
