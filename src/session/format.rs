//! Session document shapes
//!
//! The native document is written by [`encode`]. Two older shapes are
//! recognized on load by the fields their hypotheses carry:
//!
//! | Shape         | First hypothesis has                           |
//! |---------------|------------------------------------------------|
//! | `wisteria`    | `title`, `description`, `hallmarks`            |
//! | `protognosis` | `hypothesis_id`, `content`, `tournament_record`|
//!
//! Any other shape is rejected with [`AppError::Format`].

use crate::types::{
    new_id, AppError, Artifact, Params, Result, SessionMode, SessionState, TournamentState,
    DEFAULT_ELO_RATING,
};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Version tag of documents written by this crate.
pub const FORMAT_VERSION: &str = "jnana-1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionFormat {
    Native,
    Wisteria,
    Protognosis,
}

impl fmt::Display for SessionFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionFormat::Native => "native",
            SessionFormat::Wisteria => "wisteria",
            SessionFormat::Protognosis => "protognosis",
        })
    }
}

/// The native on-disk document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDocument {
    pub format_version: String,
    pub saved_at: DateTime<Utc>,
    pub session_state: SessionState,
    pub hypotheses: Vec<Artifact>,
    #[serde(default)]
    pub tournament: TournamentState,
}

/// A document decoded into store-ready values.
#[derive(Debug, Clone)]
pub struct DecodedSession {
    pub format: SessionFormat,
    pub session_state: SessionState,
    pub artifacts: Vec<Artifact>,
    pub tournament: TournamentState,
}

/// Classifies a parsed document by its structure.
pub fn detect(doc: &Value) -> Result<SessionFormat> {
    let Some(obj) = doc.as_object() else {
        return Err(AppError::Format("Session document is not a JSON object".into()));
    };

    if let Some(version) = obj.get("format_version").and_then(Value::as_str) {
        if version.starts_with("jnana") {
            return Ok(SessionFormat::Native);
        }
    }

    let first = obj
        .get("hypotheses")
        .and_then(Value::as_array)
        .ok_or_else(|| AppError::Format("Invalid session file format".into()))?
        .first()
        .and_then(Value::as_object)
        .ok_or_else(|| AppError::Format("Unknown session format: no hypotheses to inspect".into()))?;

    let has = |keys: &[&str]| keys.iter().all(|k| first.contains_key(*k));
    if has(&["title", "description", "hallmarks"]) {
        Ok(SessionFormat::Wisteria)
    } else if has(&["hypothesis_id", "content", "tournament_record"]) {
        Ok(SessionFormat::Protognosis)
    } else {
        Err(AppError::Format("Unknown session format".into()))
    }
}

/// Detects the shape of `doc` and decodes it.
pub fn decode(doc: Value) -> Result<DecodedSession> {
    match detect(&doc)? {
        SessionFormat::Native => {
            let document: SessionDocument = serde_json::from_value(doc)
                .map_err(|e| AppError::Format(format!("Malformed native session: {}", e)))?;
            Ok(DecodedSession {
                format: SessionFormat::Native,
                session_state: document.session_state,
                artifacts: document.hypotheses,
                tournament: document.tournament,
            })
        }
        format => decode_legacy(format, &doc),
    }
}

/// Serializes a native document.
pub fn encode(
    state: &SessionState,
    artifacts: &[Artifact],
    tournament: &TournamentState,
) -> Result<Vec<u8>> {
    let document = SessionDocument {
        format_version: FORMAT_VERSION.to_string(),
        saved_at: Utc::now(),
        session_state: state.clone(),
        hypotheses: artifacts.to_vec(),
        tournament: tournament.clone(),
    };
    Ok(serde_json::to_vec_pretty(&document)?)
}

fn decode_legacy(format: SessionFormat, doc: &Value) -> Result<DecodedSession> {
    let entries = doc
        .get("hypotheses")
        .and_then(Value::as_array)
        .ok_or_else(|| AppError::Format("Invalid session file format".into()))?;

    let artifacts = entries
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            let obj = entry.as_object().ok_or_else(|| {
                AppError::Format(format!("Hypothesis #{} is not an object", i))
            })?;
            Ok(match format {
                SessionFormat::Wisteria => from_wisteria(obj),
                _ => from_protognosis(obj),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let goal = doc
        .pointer("/metadata/research_goal")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let mut session_state = SessionState::new(goal, SessionMode::Interactive);
    session_state.stats.hypotheses_generated = artifacts.len() as u64;
    session_state
        .metadata
        .insert("source_format".into(), Value::String(format.to_string()));

    Ok(DecodedSession {
        format,
        session_state,
        artifacts,
        tournament: TournamentState::default(),
    })
}

fn str_field<'a>(obj: &'a Params, key: &str) -> &'a str {
    obj.get(key).and_then(Value::as_str).unwrap_or_default()
}

fn legacy_id(obj: &Params) -> String {
    Some(str_field(obj, "hypothesis_id"))
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .unwrap_or_else(new_id)
}

/// Accepts RFC 3339, naive ISO-8601 and unix-seconds timestamps.
fn timestamp(value: Option<&Value>) -> DateTime<Utc> {
    match value {
        Some(Value::Number(n)) => n
            .as_f64()
            .and_then(|secs| {
                let whole = secs.trunc() as i64;
                let nanos = ((secs - secs.trunc()) * 1e9) as u32;
                Utc.timestamp_opt(whole, nanos).single()
            })
            .unwrap_or_else(Utc::now),
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .or_else(|_| {
                NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").map(|n| n.and_utc())
            })
            .unwrap_or_else(|_| Utc::now()),
        _ => Utc::now(),
    }
}

fn from_wisteria(obj: &Params) -> Artifact {
    let title = str_field(obj, "title");
    let mut content = str_field(obj, "description").to_string();
    let validation = str_field(obj, "experimental_validation");
    if !validation.is_empty() {
        content.push_str("\n\nExperimental validation: ");
        content.push_str(validation);
    }

    let mut artifact = Artifact::new(content, title, "wisteria");
    artifact.id = legacy_id(obj);
    artifact.created_at = timestamp(obj.get("generation_timestamp"));
    if let Some(Value::Object(meta)) = obj.get("metadata") {
        artifact.metadata = meta.clone();
    }
    for key in ["title", "hallmarks", "references", "version", "type"] {
        if let Some(value) = obj.get(key) {
            artifact.metadata.insert(key.to_string(), value.clone());
        }
    }
    artifact
        .metadata
        .insert("source_format".into(), Value::String("wisteria".into()));
    artifact
}

fn from_protognosis(obj: &Params) -> Artifact {
    let metadata = match obj.get("metadata") {
        Some(Value::Object(meta)) => meta.clone(),
        _ => Params::new(),
    };
    let content = str_field(obj, "content");
    let summary = Some(str_field(&metadata, "title"))
        .filter(|t| !t.is_empty())
        .or_else(|| content.lines().next())
        .unwrap_or_default()
        .to_string();
    let agent_id = Some(str_field(&metadata, "agent_id"))
        .filter(|a| !a.is_empty())
        .unwrap_or("protognosis");

    let mut artifact = Artifact::new(content, summary, agent_id);
    artifact.id = legacy_id(obj);
    artifact.created_at = timestamp(obj.get("created_at"));
    artifact.metadata = metadata;
    artifact.parent_id = obj
        .get("parent_id")
        .and_then(Value::as_str)
        .map(str::to_string);

    if let Some(record) = obj.get("tournament_record").and_then(Value::as_object) {
        artifact.elo_rating = record
            .get("elo_rating")
            .and_then(Value::as_f64)
            .unwrap_or(DEFAULT_ELO_RATING);
        for key in ["wins", "losses"] {
            if let Some(value) = record.get(key) {
                artifact.metadata.insert(key.to_string(), value.clone());
            }
        }
    }
    artifact
        .metadata
        .insert("source_format".into(), Value::String("protognosis".into()));
    artifact
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn wisteria_doc() -> Value {
        json!({
            "metadata": {"research_goal": "Why do cells age?"},
            "hypotheses": [{
                "hypothesis_id": "w-1",
                "title": "Telomere attrition",
                "description": "Telomere shortening limits division.",
                "experimental_validation": "Measure telomere length.",
                "hallmarks": {"testability": "high"},
                "generation_timestamp": "2024-03-01T10:00:00.123456"
            }]
        })
    }

    fn protognosis_doc() -> Value {
        json!({
            "hypotheses": [{
                "hypothesis_id": "p-1",
                "content": "Mitochondrial decline drives aging.\nMore detail.",
                "created_at": 1_700_000_000.5,
                "metadata": {"agent_id": "generation-2"},
                "tournament_record": {"elo_rating": 1264.0, "wins": 3, "losses": 1}
            }]
        })
    }

    #[rstest]
    #[case(json!({"format_version": "jnana-1.0"}), Some(SessionFormat::Native))]
    #[case(wisteria_doc(), Some(SessionFormat::Wisteria))]
    #[case(protognosis_doc(), Some(SessionFormat::Protognosis))]
    #[case(json!({"hypotheses": []}), None)]
    #[case(json!({"hypotheses": [{"text": "x"}]}), None)]
    #[case(json!({"something": "else"}), None)]
    #[case(json!([1, 2, 3]), None)]
    fn test_detect(#[case] doc: Value, #[case] expected: Option<SessionFormat>) {
        match expected {
            Some(format) => assert_eq!(detect(&doc).unwrap(), format),
            None => assert!(matches!(detect(&doc), Err(AppError::Format(_)))),
        }
    }

    #[test]
    fn test_decode_wisteria() {
        let decoded = decode(wisteria_doc()).unwrap();
        assert_eq!(decoded.format, SessionFormat::Wisteria);
        assert_eq!(decoded.session_state.research_goal, "Why do cells age?");

        let artifact = &decoded.artifacts[0];
        assert_eq!(artifact.id, "w-1");
        assert_eq!(artifact.summary, "Telomere attrition");
        assert!(artifact.content.contains("Measure telomere length."));
        assert_eq!(artifact.elo_rating, DEFAULT_ELO_RATING);
        assert_eq!(artifact.metadata["hallmarks"]["testability"], "high");
        assert_eq!(artifact.created_at.timestamp(), 1_709_287_200);
    }

    #[test]
    fn test_decode_protognosis() {
        let decoded = decode(protognosis_doc()).unwrap();
        let artifact = &decoded.artifacts[0];

        assert_eq!(artifact.id, "p-1");
        assert_eq!(artifact.agent_id, "generation-2");
        assert_eq!(artifact.summary, "Mitochondrial decline drives aging.");
        assert_eq!(artifact.elo_rating, 1264.0);
        assert_eq!(artifact.metadata["wins"], 3);
        assert_eq!(artifact.created_at.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_native_encode_decode() {
        let state = SessionState::new("goal", SessionMode::Batch);
        let artifacts = vec![Artifact::new("content", "summary", "generation-0")];
        let bytes = encode(&state, &artifacts, &TournamentState::default()).unwrap();

        let doc: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(doc["format_version"], FORMAT_VERSION);
        let decoded = decode(doc).unwrap();
        assert_eq!(decoded.format, SessionFormat::Native);
        assert_eq!(decoded.session_state, state);
        assert_eq!(decoded.artifacts, artifacts);
    }

    #[test]
    fn test_malformed_native_is_format_error() {
        let doc = json!({"format_version": "jnana-1.0", "hypotheses": "nope"});
        assert!(matches!(decode(doc), Err(AppError::Format(_))));
    }
}
