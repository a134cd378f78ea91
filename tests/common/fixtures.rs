//! Threat-intel response bodies and torrent payloads

use serde_json::{Value, json};

/// Minimal bencoded torrent metainfo
pub const TORRENT_BYTES: &[u8] =
    b"d8:announce35:http://tracker.example/announce4:infod6:lengthi1024e4:name10:ubuntu.isoee";

/// Unix timestamp used as `last_analysis_date` in finished reports
pub const ANALYSIS_DATE: i64 = 1_700_000_000;

/// Response to a URL or file submission
pub fn analysis_submitted(id: &str) -> Value {
    json!({
        "data": {
            "type": "analysis",
            "id": id
        }
    })
}

/// Finished URL or file report
pub fn finished_report(id: &str, malicious: bool) -> Value {
    let (stats, results) = if malicious {
        (
            json!({"malicious": 3, "suspicious": 1, "undetected": 60, "harmless": 0, "timeout": 0}),
            json!({
                "EngineA": {"category": "malicious", "engine_name": "EngineA", "result": "Trojan.Generic", "method": "blacklist"},
                "EngineB": {"category": "suspicious", "engine_name": "EngineB", "result": "Riskware.Agent", "method": "blacklist"},
                "EngineC": {"category": "undetected", "engine_name": "EngineC", "result": null, "method": "blacklist"}
            }),
        )
    } else {
        (
            json!({"malicious": 0, "suspicious": 0, "undetected": 60, "harmless": 10, "timeout": 0}),
            json!({
                "EngineC": {"category": "harmless", "engine_name": "EngineC", "result": "clean", "method": "blacklist"}
            }),
        )
    };

    json!({
        "data": {
            "type": "object",
            "id": id,
            "attributes": {
                "last_analysis_date": ANALYSIS_DATE,
                "last_analysis_stats": stats,
                "last_analysis_results": results,
                "reputation": 0,
                "categories": {},
                "total_votes": {"harmless": 0, "malicious": 0}
            }
        }
    })
}

/// Report of an object whose first analysis has not finished
pub fn queued_report(id: &str) -> Value {
    json!({
        "data": {
            "type": "object",
            "id": id,
            "attributes": {
                "last_analysis_stats": {}
            }
        }
    })
}

/// Domain report
pub fn domain_report(domain: &str) -> Value {
    json!({
        "data": {
            "type": "domain",
            "id": domain,
            "attributes": {
                "reputation": 12,
                "last_analysis_stats": {"harmless": 70},
                "categories": {"Forcepoint ThreatSeeker": "file download servers"}
            }
        }
    })
}

/// Domain votes
pub fn domain_votes() -> Value {
    json!({
        "data": [
            {"type": "vote", "id": "v1", "attributes": {"verdict": "harmless", "value": 1}},
            {"type": "vote", "id": "v2", "attributes": {"verdict": "harmless", "value": 1}}
        ]
    })
}

/// API error body
pub fn api_error(code: &str, message: &str) -> Value {
    json!({
        "error": {
            "code": code,
            "message": message
        }
    })
}
