use async_trait::async_trait;
use sqlx::{PgConnection, PgPool, Row};
use std::collections::{HashMap, hash_map::Entry};
use tracing::{debug, info, warn};

use crate::{
    database::ports::case_writer::CaseWriter,
    error::{IngestError, Result, storage},
    types::{
        CaseBundle, CasePayload, EntityMentionPayload, EntityPayload,
        IndicatorPayload, IndicatorSourcePayload, RunId,
        SourceDocumentPayload, WriterResult, ids::generated_row_id,
    },
};

type AliasMap = HashMap<String, String>;

/// Stored id and next unspanned-mention placeholder per entity natural key.
type SeenEntities<'a> = HashMap<(&'a str, String), (String, i32)>;

#[derive(Clone, Debug)]
pub struct PostgresCaseWriter {
    pool: PgPool,
}

impl PostgresCaseWriter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl CaseWriter for PostgresCaseWriter {
    async fn write_case(
        &self,
        bundle: &CaseBundle,
        ingestion_run_id: Option<RunId>,
    ) -> Result<WriterResult> {
        bundle.validate()?;
        let case_id = bundle.case_id();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(storage("begin case write"))?;

        // Dropping `tx` on any early return rolls the whole bundle back.
        let written = write_bundle(&mut *tx, bundle, ingestion_run_id).await;
        let result = match written {
            Ok(result) => result,
            Err(err) => {
                warn!(case_id, error = %err, "case write rolled back");
                return Err(err);
            }
        };

        tx.commit().await.map_err(storage("commit case write"))?;

        info!(
            case_id,
            documents = result.document_ids.len(),
            entities = result.entity_ids.len(),
            indicators = result.indicator_ids.len(),
            "case persisted"
        );
        Ok(result)
    }
}

async fn write_bundle(
    conn: &mut PgConnection,
    bundle: &CaseBundle,
    ingestion_run_id: Option<RunId>,
) -> Result<WriterResult> {
    let case = &bundle.case;
    upsert_case(conn, case, ingestion_run_id).await?;

    let mut result = WriterResult::new(case.case_id.clone());

    let mut document_aliases = AliasMap::new();
    for document in &bundle.documents {
        let document_id =
            upsert_document(conn, &case.case_id, document).await?;
        if let Some(alias) = document.alias.as_deref() {
            document_aliases.insert(alias.to_string(), document_id.clone());
        }
        push_unique(&mut result.document_ids, document_id);
    }

    // A repeated natural key keeps the first entry's row values; later
    // entries only add mentions or sources to it.
    let mut entity_aliases = AliasMap::new();
    let mut seen_entities = SeenEntities::new();
    for entity in &bundle.entities {
        let key = (entity.entity_type.as_str(), entity.normalized_value());
        let (entity_id, next_span) = match seen_entities.entry(key) {
            Entry::Occupied(seen) => seen.into_mut(),
            Entry::Vacant(slot) => {
                let entity_id =
                    upsert_entity(conn, &case.case_id, entity).await?;
                clear_mentions(conn, &entity_id).await?;
                slot.insert((entity_id, -1))
            }
        };
        insert_mentions(
            conn,
            entity_id,
            &entity.mentions,
            next_span,
            &document_aliases,
        )
        .await?;
        if let Some(alias) = entity.alias.as_deref() {
            entity_aliases.insert(alias.to_string(), entity_id.clone());
        }
        push_unique(&mut result.entity_ids, entity_id.clone());
    }

    let mut seen_indicators: HashMap<(&str, String), String> = HashMap::new();
    for indicator in &bundle.indicators {
        let key = (indicator.category.as_str(), indicator.normalized_number());
        let indicator_id = match seen_indicators.entry(key) {
            Entry::Occupied(seen) => seen.into_mut(),
            Entry::Vacant(slot) => {
                let indicator_id =
                    upsert_indicator(conn, case, indicator).await?;
                clear_sources(conn, &indicator_id).await?;
                slot.insert(indicator_id)
            }
        };
        insert_sources(
            conn,
            indicator_id,
            &indicator.sources,
            &document_aliases,
            &entity_aliases,
        )
        .await?;
        push_unique(&mut result.indicator_ids, indicator_id.clone());
    }

    Ok(result)
}

async fn upsert_case(
    conn: &mut PgConnection,
    case: &CasePayload,
    ingestion_run_id: Option<RunId>,
) -> Result<()> {
    let raw_text_sha256 = case.raw_text_hash()?;

    sqlx::query(
        r#"
        INSERT INTO cases (
            case_id, ingestion_run_id, dataset, source_type, classification,
            confidence, detected_at, reported_at, raw_text_sha256, status,
            metadata, is_deleted, deleted_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        ON CONFLICT (case_id) DO UPDATE SET
            ingestion_run_id = COALESCE(
                EXCLUDED.ingestion_run_id, cases.ingestion_run_id
            ),
            dataset = EXCLUDED.dataset,
            source_type = EXCLUDED.source_type,
            classification = EXCLUDED.classification,
            confidence = EXCLUDED.confidence,
            detected_at = EXCLUDED.detected_at,
            reported_at = EXCLUDED.reported_at,
            raw_text_sha256 = EXCLUDED.raw_text_sha256,
            status = EXCLUDED.status,
            metadata = EXCLUDED.metadata,
            is_deleted = EXCLUDED.is_deleted,
            deleted_at = EXCLUDED.deleted_at,
            updated_at = NOW()
        "#,
    )
    .bind(&case.case_id)
    .bind(ingestion_run_id.map(|id| id.0))
    .bind(&case.dataset)
    .bind(&case.source_type)
    .bind(&case.classification)
    .bind(case.confidence)
    .bind(case.detected_at)
    .bind(case.reported_at)
    .bind(&raw_text_sha256)
    .bind(case.status())
    .bind(&case.metadata)
    .bind(case.is_deleted)
    .bind(case.deleted_at)
    .execute(&mut *conn)
    .await
    .map_err(storage("upsert case"))?;

    debug!(case_id = %case.case_id, "case row upserted");
    Ok(())
}

async fn upsert_document(
    conn: &mut PgConnection,
    case_id: &str,
    document: &SourceDocumentPayload,
) -> Result<String> {
    let natural_key = document.natural_key()?;
    let proposed_id = document
        .document_id
        .clone()
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(generated_row_id);

    let row = sqlx::query(
        r#"
        INSERT INTO source_documents (
            document_id, case_id, natural_key, title, source_url, mime_type,
            text, text_sha256, excerpt, chunk_index, chunk_count, score,
            captured_at, metadata
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        ON CONFLICT (case_id, natural_key) DO UPDATE SET
            title = EXCLUDED.title,
            source_url = EXCLUDED.source_url,
            mime_type = EXCLUDED.mime_type,
            text = EXCLUDED.text,
            text_sha256 = EXCLUDED.text_sha256,
            excerpt = EXCLUDED.excerpt,
            chunk_index = EXCLUDED.chunk_index,
            chunk_count = EXCLUDED.chunk_count,
            score = EXCLUDED.score,
            captured_at = EXCLUDED.captured_at,
            metadata = EXCLUDED.metadata,
            updated_at = NOW()
        RETURNING document_id
        "#,
    )
    .bind(&proposed_id)
    .bind(case_id)
    .bind(&natural_key)
    .bind(&document.title)
    .bind(&document.source_url)
    .bind(&document.mime_type)
    .bind(&document.text)
    .bind(document.text_hash())
    .bind(&document.excerpt)
    .bind(document.chunk_index)
    .bind(document.chunk_count)
    .bind(document.score)
    .bind(document.captured_at)
    .bind(&document.metadata)
    .fetch_one(&mut *conn)
    .await
    .map_err(storage("upsert source document"))?;

    row.try_get("document_id")
        .map_err(storage("decode source document id"))
}

async fn upsert_entity(
    conn: &mut PgConnection,
    case_id: &str,
    entity: &EntityPayload,
) -> Result<String> {
    let proposed_id = entity
        .entity_id
        .clone()
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(generated_row_id);

    let row = sqlx::query(
        r#"
        INSERT INTO entities (
            entity_id, case_id, entity_type, canonical_value,
            normalized_value, raw_value, confidence, first_seen_at,
            last_seen_at, metadata
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        ON CONFLICT (case_id, entity_type, normalized_value) DO UPDATE SET
            canonical_value = EXCLUDED.canonical_value,
            raw_value = EXCLUDED.raw_value,
            confidence = EXCLUDED.confidence,
            first_seen_at = LEAST(
                entities.first_seen_at, EXCLUDED.first_seen_at
            ),
            last_seen_at = GREATEST(
                entities.last_seen_at, EXCLUDED.last_seen_at
            ),
            metadata = EXCLUDED.metadata,
            updated_at = NOW()
        RETURNING entity_id
        "#,
    )
    .bind(&proposed_id)
    .bind(case_id)
    .bind(&entity.entity_type)
    .bind(&entity.canonical_value)
    .bind(entity.normalized_value())
    .bind(&entity.raw_value)
    .bind(entity.confidence)
    .bind(entity.first_seen_at)
    .bind(entity.last_seen_at)
    .bind(&entity.metadata)
    .fetch_one(&mut *conn)
    .await
    .map_err(storage("upsert entity"))?;

    row.try_get("entity_id").map_err(storage("decode entity id"))
}

async fn clear_mentions(
    conn: &mut PgConnection,
    entity_id: &str,
) -> Result<()> {
    sqlx::query("DELETE FROM entity_mentions WHERE entity_id = $1")
        .bind(entity_id)
        .execute(&mut *conn)
        .await
        .map_err(storage("clear entity mentions"))?;
    Ok(())
}

/// Unspanned mentions take distinct negative placeholders from
/// `fallback_span` so they do not collide on the primary key.
async fn insert_mentions(
    conn: &mut PgConnection,
    entity_id: &str,
    mentions: &[EntityMentionPayload],
    fallback_span: &mut i32,
    document_aliases: &AliasMap,
) -> Result<()> {
    for mention in mentions {
        let document_id = resolve_document(
            mention.document_id.as_deref(),
            mention.document_alias.as_deref(),
            document_aliases,
        )?;
        let span_start = match mention.span_start {
            Some(start) => start,
            None => {
                let placeholder = *fallback_span;
                *fallback_span -= 1;
                placeholder
            }
        };

        sqlx::query(
            r#"
            INSERT INTO entity_mentions (
                entity_id, document_id, span_start, span_end, sentence,
                metadata
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (entity_id, document_id, span_start) DO NOTHING
            "#,
        )
        .bind(entity_id)
        .bind(document_id)
        .bind(span_start)
        .bind(mention.span_end)
        .bind(&mention.sentence)
        .bind(&mention.metadata)
        .execute(&mut *conn)
        .await
        .map_err(storage("insert entity mention"))?;
    }
    Ok(())
}

async fn upsert_indicator(
    conn: &mut PgConnection,
    case: &CasePayload,
    indicator: &IndicatorPayload,
) -> Result<String> {
    let proposed_id = indicator
        .indicator_id
        .clone()
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(generated_row_id);
    let dataset = indicator
        .dataset
        .as_deref()
        .filter(|d| !d.trim().is_empty())
        .unwrap_or(&case.dataset);

    let row = sqlx::query(
        r#"
        INSERT INTO indicators (
            indicator_id, case_id, category, item, indicator_type, number,
            normalized_number, status, confidence, first_seen_at,
            last_seen_at, dataset, metadata
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        ON CONFLICT (case_id, category, normalized_number) DO UPDATE SET
            item = EXCLUDED.item,
            indicator_type = EXCLUDED.indicator_type,
            number = EXCLUDED.number,
            status = EXCLUDED.status,
            confidence = EXCLUDED.confidence,
            first_seen_at = LEAST(
                indicators.first_seen_at, EXCLUDED.first_seen_at
            ),
            last_seen_at = GREATEST(
                indicators.last_seen_at, EXCLUDED.last_seen_at
            ),
            dataset = EXCLUDED.dataset,
            metadata = EXCLUDED.metadata,
            updated_at = NOW()
        RETURNING indicator_id
        "#,
    )
    .bind(&proposed_id)
    .bind(&case.case_id)
    .bind(&indicator.category)
    .bind(&indicator.item)
    .bind(&indicator.indicator_type)
    .bind(&indicator.number)
    .bind(indicator.normalized_number())
    .bind(indicator.status())
    .bind(indicator.confidence)
    .bind(indicator.first_seen_at)
    .bind(indicator.last_seen_at)
    .bind(dataset)
    .bind(&indicator.metadata)
    .fetch_one(&mut *conn)
    .await
    .map_err(storage("upsert indicator"))?;

    row.try_get("indicator_id")
        .map_err(storage("decode indicator id"))
}

async fn clear_sources(
    conn: &mut PgConnection,
    indicator_id: &str,
) -> Result<()> {
    sqlx::query("DELETE FROM indicator_sources WHERE indicator_id = $1")
        .bind(indicator_id)
        .execute(&mut *conn)
        .await
        .map_err(storage("clear indicator sources"))?;
    Ok(())
}

async fn insert_sources(
    conn: &mut PgConnection,
    indicator_id: &str,
    sources: &[IndicatorSourcePayload],
    document_aliases: &AliasMap,
    entity_aliases: &AliasMap,
) -> Result<()> {
    for source in sources {
        let document_id = resolve_document(
            source.document_id.as_deref(),
            source.document_alias.as_deref(),
            document_aliases,
        )?;
        let entity_id = resolve_entity(
            source.entity_id.as_deref(),
            source.entity_alias.as_deref(),
            entity_aliases,
        )?;

        sqlx::query(
            r#"
            INSERT INTO indicator_sources (
                indicator_id, document_id, entity_id, evidence_score,
                explanation, metadata
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (indicator_id, document_id) DO NOTHING
            "#,
        )
        .bind(indicator_id)
        .bind(document_id)
        .bind(entity_id)
        .bind(source.evidence_score)
        .bind(&source.explanation)
        .bind(&source.metadata)
        .execute(&mut *conn)
        .await
        .map_err(storage("insert indicator source"))?;
    }
    Ok(())
}

/// An explicit id wins over an alias.
fn resolve_document<'a>(
    document_id: Option<&'a str>,
    document_alias: Option<&str>,
    aliases: &'a AliasMap,
) -> Result<&'a str> {
    if let Some(id) = document_id.filter(|id| !id.trim().is_empty()) {
        return Ok(id);
    }
    match document_alias {
        Some(alias) => aliases.get(alias).map(String::as_str).ok_or_else(|| {
            IngestError::validation(format!(
                "unknown document alias '{alias}'"
            ))
        }),
        None => Err(IngestError::validation(
            "reference is missing document_id and document_alias",
        )),
    }
}

fn resolve_entity<'a>(
    entity_id: Option<&'a str>,
    entity_alias: Option<&str>,
    aliases: &'a AliasMap,
) -> Result<Option<&'a str>> {
    if let Some(id) = entity_id.filter(|id| !id.trim().is_empty()) {
        return Ok(Some(id));
    }
    match entity_alias {
        Some(alias) => aliases
            .get(alias)
            .map(|id| Some(id.as_str()))
            .ok_or_else(|| {
                IngestError::validation(format!(
                    "unknown entity alias '{alias}'"
                ))
            }),
        None => Ok(None),
    }
}

fn push_unique(ids: &mut Vec<String>, id: String) {
    if !ids.contains(&id) {
        ids.push(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aliases() -> AliasMap {
        HashMap::from([("doc-a".to_string(), "stored-1".to_string())])
    }

    #[test]
    fn explicit_document_id_beats_alias() {
        let map = aliases();
        let resolved =
            resolve_document(Some("explicit"), Some("doc-a"), &map).unwrap();
        assert_eq!(resolved, "explicit");
        assert_eq!(
            resolve_document(None, Some("doc-a"), &map).unwrap(),
            "stored-1"
        );
    }

    #[test]
    fn unresolved_references_are_validation_errors() {
        let map = aliases();
        assert!(matches!(
            resolve_document(None, Some("doc-z"), &map),
            Err(IngestError::Validation(_))
        ));
        assert!(matches!(
            resolve_document(None, None, &map),
            Err(IngestError::Validation(_))
        ));
        assert!(matches!(
            resolve_entity(None, Some("wallet-9"), &map),
            Err(IngestError::Validation(_))
        ));
        assert_eq!(resolve_entity(None, None, &map).unwrap(), None);
    }

    #[test]
    fn push_unique_keeps_first_position() {
        let mut ids = Vec::new();
        for id in ["b", "a", "b", "c", "a"] {
            push_unique(&mut ids, id.to_string());
        }
        assert_eq!(ids, vec!["b", "a", "c"]);
    }
}
