use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::db::SqlDb;
use crate::error::{Error, Result};
use crate::model::{
    Enrichment, EnrichmentAssociation, EnrichmentKind, EnrichmentSubkind, EntityType,
};

#[derive(Clone)]
pub struct EnrichmentStore {
    db: SqlDb,
}

impl EnrichmentStore {
    pub fn new(db: SqlDb) -> Self {
        Self { db }
    }

    /// Persist an enrichment together with its associations in one
    /// transaction. Every enrichment carries at least one association; an
    /// orphan enrichment would be unreachable from any entity.
    pub async fn save(
        &self,
        enrichment: &Enrichment,
        associations: &[(EntityType, String)],
    ) -> Result<()> {
        if associations.is_empty() {
            return Err(Error::validation(
                "enrichment must be associated with at least one entity",
            ));
        }

        let mut tx = self.db.begin().await?;

        sqlx::query(
            "INSERT INTO enrichments (id, kind, subkind, content, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&enrichment.id)
        .bind(enrichment.kind.as_str())
        .bind(enrichment.subkind.as_str())
        .bind(&enrichment.content)
        .bind(enrichment.created_at)
        .bind(enrichment.updated_at)
        .execute(&mut *tx)
        .await?;

        for (entity_type, entity_id) in associations {
            sqlx::query(
                "INSERT INTO enrichment_associations (enrichment_id, entity_type, entity_id) \
                 VALUES (?, ?, ?) \
                 ON CONFLICT (enrichment_id, entity_type, entity_id) DO NOTHING",
            )
            .bind(&enrichment.id)
            .bind(entity_type.as_str())
            .bind(entity_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<Enrichment>> {
        let row = sqlx::query("SELECT * FROM enrichments WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.as_ref())
            .await?;
        Ok(row.map(read_enrichment))
    }

    /// All enrichments attached to one entity, optionally narrowed to a
    /// subkind.
    pub async fn for_entity(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        subkind: Option<EnrichmentSubkind>,
    ) -> Result<Vec<Enrichment>> {
        let rows = match subkind {
            Some(subkind) => {
                sqlx::query(
                    "SELECT e.* FROM enrichments e \
                     JOIN enrichment_associations ea ON ea.enrichment_id = e.id \
                     WHERE ea.entity_type = ? AND ea.entity_id = ? AND e.subkind = ? \
                     ORDER BY e.created_at",
                )
                .bind(entity_type.as_str())
                .bind(entity_id)
                .bind(subkind.as_str())
                .fetch_all(self.db.as_ref())
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT e.* FROM enrichments e \
                     JOIN enrichment_associations ea ON ea.enrichment_id = e.id \
                     WHERE ea.entity_type = ? AND ea.entity_id = ? \
                     ORDER BY e.created_at",
                )
                .bind(entity_type.as_str())
                .bind(entity_id)
                .fetch_all(self.db.as_ref())
                .await?
            }
        };

        Ok(rows.into_iter().map(read_enrichment).collect())
    }

    pub async fn associations_for(&self, enrichment_id: &str) -> Result<Vec<EnrichmentAssociation>> {
        let rows = sqlx::query(
            "SELECT enrichment_id, entity_type, entity_id FROM enrichment_associations \
             WHERE enrichment_id = ?",
        )
        .bind(enrichment_id)
        .fetch_all(self.db.as_ref())
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let entity_type = match row.get::<String, _>("entity_type").as_str() {
                    "snippet" => EntityType::Snippet,
                    "commit" => EntityType::Commit,
                    "file" => EntityType::File,
                    "repository" => EntityType::Repository,
                    _ => return None,
                };
                Some(EnrichmentAssociation {
                    enrichment_id: row.get("enrichment_id"),
                    entity_type,
                    entity_id: row.get("entity_id"),
                })
            })
            .collect())
    }

    /// Delete every enrichment associated with any of the given entities.
    /// Associations cascade with the enrichment rows.
    pub async fn delete_for_entities(
        &self,
        entity_type: EntityType,
        entity_ids: &[String],
    ) -> Result<u64> {
        let mut deleted = 0;
        for entity_id in entity_ids {
            let result = sqlx::query(
                "DELETE FROM enrichments WHERE id IN ( \
                     SELECT enrichment_id FROM enrichment_associations \
                     WHERE entity_type = ? AND entity_id = ?)",
            )
            .bind(entity_type.as_str())
            .bind(entity_id)
            .execute(self.db.as_ref())
            .await?;
            deleted += result.rows_affected();
        }
        Ok(deleted)
    }

    pub async fn list(&self, subkind: Option<EnrichmentSubkind>) -> Result<Vec<Enrichment>> {
        let rows = match subkind {
            Some(subkind) => {
                sqlx::query("SELECT * FROM enrichments WHERE subkind = ? ORDER BY created_at")
                    .bind(subkind.as_str())
                    .fetch_all(self.db.as_ref())
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM enrichments ORDER BY created_at")
                    .fetch_all(self.db.as_ref())
                    .await?
            }
        };
        Ok(rows.into_iter().map(read_enrichment).collect())
    }
}

pub(crate) fn read_enrichment(row: SqliteRow) -> Enrichment {
    let kind = EnrichmentKind::parse(&row.get::<String, _>("kind"))
        .expect("unknown enrichment kind in database");
    let subkind = EnrichmentSubkind::parse(&row.get::<String, _>("subkind"))
        .expect("unknown enrichment subkind in database");

    Enrichment {
        id: row.get("id"),
        kind,
        subkind,
        content: row.get("content"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::model::Enrichment;

    #[tokio::test]
    async fn save_requires_an_association() {
        let store = EnrichmentStore::new(db::init_in_memory().await.unwrap());
        let enrichment = Enrichment::new(EnrichmentSubkind::SnippetSummary, "adds two numbers");

        assert!(store.save(&enrichment, &[]).await.is_err());
    }

    #[tokio::test]
    async fn delete_cascades_associations() {
        let store = EnrichmentStore::new(db::init_in_memory().await.unwrap());
        let enrichment = Enrichment::new(EnrichmentSubkind::CommitDescription, "touched the parser");
        store
            .save(
                &enrichment,
                &[(EntityType::Commit, "abc123".to_string())],
            )
            .await
            .unwrap();

        let deleted = store
            .delete_for_entities(EntityType::Commit, &["abc123".to_string()])
            .await
            .unwrap();
        assert_eq!(deleted, 1);

        assert!(store.get(&enrichment.id).await.unwrap().is_none());
        assert!(store
            .associations_for(&enrichment.id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn for_entity_narrows_by_subkind() {
        let store = EnrichmentStore::new(db::init_in_memory().await.unwrap());
        let summary = Enrichment::new(EnrichmentSubkind::SnippetSummary, "a summary");
        let docs = Enrichment::new(EnrichmentSubkind::ApiDocs, "api docs");
        let target = [(EntityType::Snippet, "sha1".to_string())];

        store.save(&summary, &target).await.unwrap();
        store.save(&docs, &target).await.unwrap();

        let only_summaries = store
            .for_entity(
                EntityType::Snippet,
                "sha1",
                Some(EnrichmentSubkind::SnippetSummary),
            )
            .await
            .unwrap();
        assert_eq!(only_summaries.len(), 1);
        assert_eq!(only_summaries[0].id, summary.id);

        let all = store
            .for_entity(EntityType::Snippet, "sha1", None)
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
    }
}
