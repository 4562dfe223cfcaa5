//! Shared fixtures for the Postgres integration tests.
#![allow(dead_code)]

use caseflow_core::types::{
    CaseBundle, CasePayload, EntityMentionPayload, EntityPayload,
    IndicatorPayload, IndicatorSourcePayload, SourceDocumentPayload,
};
use serde_json::json;
use sqlx::PgPool;

/// Case with two aliased documents, two entities and one indicator that
/// references both through aliases.
pub fn sample_bundle(case_id: &str) -> CaseBundle {
    CaseBundle {
        case: CasePayload {
            case_id: case_id.to_string(),
            dataset: "account_list".into(),
            source_type: "ocr".into(),
            classification: "crypto_investment".into(),
            confidence: 0.87,
            text: Some("Send 500 USDT to wallet 0xABC via WhatsApp".into()),
            metadata: Some(json!({"ingest": "smoke"})),
            ..CasePayload::default()
        },
        documents: vec![
            SourceDocumentPayload {
                alias: Some("doc-a".into()),
                title: Some("Screenshot 1".into()),
                text: Some("Send 500 USDT".into()),
                chunk_index: 0,
                chunk_count: 2,
                ..SourceDocumentPayload::default()
            },
            SourceDocumentPayload {
                alias: Some("doc-b".into()),
                title: Some("Screenshot 2".into()),
                text: Some("to wallet 0xABC via WhatsApp".into()),
                chunk_index: 1,
                chunk_count: 2,
                ..SourceDocumentPayload::default()
            },
        ],
        entities: vec![
            EntityPayload {
                alias: Some("wallet".into()),
                entity_type: "wallet_address".into(),
                canonical_value: "0xABC".into(),
                confidence: 0.95,
                mentions: vec![
                    EntityMentionPayload {
                        document_alias: Some("doc-b".into()),
                        span_start: Some(10),
                        span_end: Some(15),
                        ..EntityMentionPayload::default()
                    },
                    EntityMentionPayload {
                        document_alias: Some("doc-a".into()),
                        ..EntityMentionPayload::default()
                    },
                ],
                ..EntityPayload::default()
            },
            EntityPayload {
                alias: Some("channel".into()),
                entity_type: "channel".into(),
                canonical_value: "WhatsApp".into(),
                confidence: 0.6,
                mentions: vec![EntityMentionPayload {
                    document_alias: Some("doc-b".into()),
                    sentence: Some("via WhatsApp".into()),
                    ..EntityMentionPayload::default()
                }],
                ..EntityPayload::default()
            },
        ],
        indicators: vec![IndicatorPayload {
            category: "crypto".into(),
            indicator_type: "wallet".into(),
            number: "0xABC".into(),
            confidence: 0.9,
            sources: vec![IndicatorSourcePayload {
                document_alias: Some("doc-b".into()),
                entity_alias: Some("wallet".into()),
                evidence_score: Some(0.8),
                ..IndicatorSourcePayload::default()
            }],
            ..IndicatorPayload::default()
        }],
    }
}

pub async fn count_rows(pool: &PgPool, table: &str) -> i64 {
    sqlx::query_scalar::<_, i64>(&format!(
        "SELECT COUNT(*)::bigint FROM {table}"
    ))
    .fetch_one(pool)
    .await
    .expect("count rows")
}

/// Snapshot of every domain table's row count, in a fixed order.
pub async fn domain_row_counts(pool: &PgPool) -> Vec<(&'static str, i64)> {
    let mut counts = Vec::new();
    for table in [
        "cases",
        "source_documents",
        "entities",
        "entity_mentions",
        "indicators",
        "indicator_sources",
    ] {
        counts.push((table, count_rows(pool, table).await));
    }
    counts
}
