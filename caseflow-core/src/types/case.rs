//! Case bundles handed to the case writer and the identifiers it returns.
//!
//! A bundle is one classified case plus the documents, entities and
//! indicators derived from it. Children reference each other either by an
//! explicit stored id or by a bundle-local alias (`doc-a`, `wallet-1`, ...)
//! that the writer resolves while persisting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{IngestError, Result};

/// Canonical representation of a case row.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CasePayload {
    /// Externally assigned natural key. Mandatory.
    pub case_id: String,
    pub dataset: String,
    pub source_type: String,
    pub classification: String,
    pub confidence: f64,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub raw_text_sha256: Option<String>,
    #[serde(default)]
    pub detected_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reported_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl CasePayload {
    pub const DEFAULT_STATUS: &'static str = "open";

    /// Hash recorded in `raw_text_sha256`; a caller-supplied digest wins.
    pub fn raw_text_hash(&self) -> Result<String> {
        if let Some(hash) = non_blank(self.raw_text_sha256.as_deref()) {
            return Ok(hash.to_string());
        }
        match non_blank(self.text.as_deref()) {
            Some(text) => Ok(sha256_hex(text)),
            None => Err(IngestError::validation(format!(
                "case {} must include non-empty text or raw_text_sha256",
                self.case_id
            ))),
        }
    }

    pub fn status(&self) -> &str {
        non_blank(self.status.as_deref()).unwrap_or(Self::DEFAULT_STATUS)
    }
}

/// Source document (or chunk) persisted alongside the case.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SourceDocumentPayload {
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub document_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub text_sha256: Option<String>,
    #[serde(default)]
    pub excerpt: Option<String>,
    #[serde(default)]
    pub chunk_index: i32,
    #[serde(default = "default_chunk_count")]
    pub chunk_count: i32,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub captured_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

fn default_chunk_count() -> i32 {
    1
}

impl SourceDocumentPayload {
    pub fn text_hash(&self) -> Option<String> {
        non_blank(self.text_sha256.as_deref())
            .map(str::to_string)
            .or_else(|| non_blank(self.text.as_deref()).map(sha256_hex))
    }

    /// Key that identifies this document within its case across re-ingests.
    ///
    /// An explicit `document_id` is authoritative; otherwise the chunk
    /// position plus content hash identifies the document.
    pub fn natural_key(&self) -> Result<String> {
        if let Some(id) = non_blank(self.document_id.as_deref()) {
            return Ok(id.to_string());
        }
        match self.text_hash() {
            Some(hash) => Ok(format!("{}:{hash}", self.chunk_index)),
            None => Err(IngestError::validation(format!(
                "document {} needs a document_id, text, or text_sha256",
                self.alias.as_deref().unwrap_or("<unaliased>")
            ))),
        }
    }
}

/// Reference pointing from an entity to a supporting document.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EntityMentionPayload {
    #[serde(default)]
    pub document_id: Option<String>,
    #[serde(default)]
    pub document_alias: Option<String>,
    #[serde(default)]
    pub span_start: Option<i32>,
    #[serde(default)]
    pub span_end: Option<i32>,
    #[serde(default)]
    pub sentence: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

/// Entity extracted from the case text.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EntityPayload {
    pub entity_type: String,
    pub canonical_value: String,
    pub confidence: f64,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub raw_value: Option<String>,
    #[serde(default)]
    pub first_seen_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_seen_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub mentions: Vec<EntityMentionPayload>,
}

impl EntityPayload {
    pub fn normalized_value(&self) -> String {
        normalize_key(&self.canonical_value)
    }
}

/// Document/entity evidence for an indicator.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IndicatorSourcePayload {
    #[serde(default)]
    pub document_id: Option<String>,
    #[serde(default)]
    pub document_alias: Option<String>,
    #[serde(default)]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub entity_alias: Option<String>,
    #[serde(default)]
    pub evidence_score: Option<f64>,
    #[serde(default)]
    pub explanation: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

/// Structured indicator (account number, wallet, phone, ...) tied to a case.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IndicatorPayload {
    pub category: String,
    #[serde(rename = "type")]
    pub indicator_type: String,
    pub number: String,
    #[serde(default)]
    pub dataset: Option<String>,
    #[serde(default)]
    pub item: Option<String>,
    #[serde(default)]
    pub indicator_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub first_seen_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_seen_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub sources: Vec<IndicatorSourcePayload>,
}

impl IndicatorPayload {
    pub const DEFAULT_STATUS: &'static str = "active";

    pub fn normalized_number(&self) -> String {
        normalize_key(&self.number)
    }

    pub fn status(&self) -> &str {
        non_blank(self.status.as_deref()).unwrap_or(Self::DEFAULT_STATUS)
    }
}

/// Complete payload passed into the case writer.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CaseBundle {
    pub case: CasePayload,
    #[serde(default)]
    pub documents: Vec<SourceDocumentPayload>,
    #[serde(default)]
    pub entities: Vec<EntityPayload>,
    #[serde(default)]
    pub indicators: Vec<IndicatorPayload>,
}

impl CaseBundle {
    pub fn case_id(&self) -> &str {
        &self.case.case_id
    }

    /// Structural checks that need no database access.
    ///
    /// Alias resolution happens later, inside the write transaction, because
    /// references may also point at ids stored by earlier writes.
    pub fn validate(&self) -> Result<()> {
        let case = &self.case;
        require("case_id", &case.case_id)?;
        require("dataset", &case.dataset)?;
        require("source_type", &case.source_type)?;
        require("classification", &case.classification)?;
        check_confidence("case confidence", case.confidence)?;
        case.raw_text_hash()?;

        for document in &self.documents {
            document.natural_key()?;
            if let Some(score) = document.score
                && !score.is_finite()
            {
                return Err(IngestError::validation(
                    "document score must be finite",
                ));
            }
        }

        for entity in &self.entities {
            require("entity_type", &entity.entity_type)?;
            require("canonical_value", &entity.canonical_value)?;
            check_confidence("entity confidence", entity.confidence)?;
        }

        for indicator in &self.indicators {
            require("indicator category", &indicator.category)?;
            require("indicator type", &indicator.indicator_type)?;
            require("indicator number", &indicator.number)?;
            check_confidence("indicator confidence", indicator.confidence)?;
            for source in &indicator.sources {
                if let Some(score) = source.evidence_score {
                    check_confidence("evidence score", score)?;
                }
            }
        }

        Ok(())
    }
}

/// Identifiers produced by one successful case write.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriterResult {
    pub case_id: String,
    #[serde(default)]
    pub document_ids: Vec<String>,
    #[serde(default)]
    pub entity_ids: Vec<String>,
    #[serde(default)]
    pub indicator_ids: Vec<String>,
}

impl WriterResult {
    pub fn new(case_id: impl Into<String>) -> Self {
        Self {
            case_id: case_id.into(),
            ..Self::default()
        }
    }
}

pub(crate) fn sha256_hex(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

pub(crate) fn normalize_key(value: &str) -> String {
    value.trim().to_lowercase()
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(IngestError::validation(format!("{field} is required")))
    } else {
        Ok(())
    }
}

fn check_confidence(field: &str, value: f64) -> Result<()> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(IngestError::validation(format!(
            "{field} must be within 0..=1, got {value}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle() -> CaseBundle {
        CaseBundle {
            case: CasePayload {
                case_id: "case-123".into(),
                dataset: "account_list".into(),
                source_type: "ocr".into(),
                classification: "crypto_investment".into(),
                confidence: 0.91,
                text: Some("Send USDT to 0xabc".into()),
                ..CasePayload::default()
            },
            ..CaseBundle::default()
        }
    }

    #[test]
    fn missing_case_id_is_rejected() {
        let mut bundle = bundle();
        bundle.case.case_id = "   ".into();
        let err = bundle.validate().expect_err("blank case id");
        assert!(matches!(err, IngestError::Validation(_)));
    }

    #[test]
    fn case_needs_text_or_digest() {
        let mut bundle = bundle();
        bundle.case.text = None;
        assert!(bundle.validate().is_err());

        bundle.case.raw_text_sha256 = Some("abc123".into());
        bundle.validate().expect("digest alone is enough");
        assert_eq!(bundle.case.raw_text_hash().unwrap(), "abc123");
    }

    #[test]
    fn raw_text_hash_is_sha256_of_text() {
        let hash = bundle().case.raw_text_hash().unwrap();
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, sha256_hex("Send USDT to 0xabc"));
    }

    #[test]
    fn confidence_outside_unit_range_is_rejected() {
        let mut bundle = bundle();
        bundle.case.confidence = 1.5;
        assert!(bundle.validate().is_err());
        bundle.case.confidence = f64::NAN;
        assert!(bundle.validate().is_err());
    }

    #[test]
    fn document_natural_key_prefers_explicit_id() {
        let explicit = SourceDocumentPayload {
            document_id: Some("doc-static".into()),
            text: Some("body".into()),
            ..SourceDocumentPayload::default()
        };
        assert_eq!(explicit.natural_key().unwrap(), "doc-static");

        let derived = SourceDocumentPayload {
            text: Some("body".into()),
            chunk_index: 2,
            ..SourceDocumentPayload::default()
        };
        assert_eq!(
            derived.natural_key().unwrap(),
            format!("2:{}", sha256_hex("body"))
        );

        let empty = SourceDocumentPayload::default();
        assert!(empty.natural_key().is_err());
    }

    #[test]
    fn entity_and_indicator_keys_are_normalized() {
        let entity = EntityPayload {
            entity_type: "wallet_address".into(),
            canonical_value: "  0xABC ".into(),
            ..EntityPayload::default()
        };
        assert_eq!(entity.normalized_value(), "0xabc");

        let indicator = IndicatorPayload {
            number: " ACCT-99 ".into(),
            ..IndicatorPayload::default()
        };
        assert_eq!(indicator.normalized_number(), "acct-99");
        assert_eq!(indicator.status(), "active");
    }

    #[test]
    fn bundle_deserializes_with_defaults() {
        let bundle: CaseBundle = serde_json::from_value(serde_json::json!({
            "case": {
                "case_id": "case-9",
                "dataset": "demo",
                "source_type": "chat",
                "classification": "romance_scam",
                "confidence": 0.4,
                "text": "hello"
            },
            "indicators": [
                {"category": "bank", "type": "iban", "number": "DE00"}
            ]
        }))
        .expect("deserialize bundle");

        assert!(bundle.documents.is_empty());
        assert_eq!(bundle.indicators[0].indicator_type, "iban");
        assert_eq!(bundle.case.status(), "open");
        bundle.validate().expect("valid bundle");
    }
}
