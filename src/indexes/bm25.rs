use std::collections::HashSet;
use std::path::Path;

use anyhow::Context;
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, Query as TantivyQuery, TermQuery};
use tantivy::schema::{Field, IndexRecordOption, Schema, STORED, STRING, TEXT};
use tantivy::{doc, Index, IndexReader, Term};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::error::Result;
use crate::indexes::SearchHit;

/// A document headed for the keyword index. The id is opaque to the store:
/// a snippet sha or an `enrichment:<id>` reference.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub text: String,
}

/// BM25 keyword store on tantivy. The schema is two fields: the opaque
/// doc id (raw, stored) and the tokenized content.
pub struct Bm25Index {
    index: Index,
    reader: RwLock<IndexReader>,
    doc_id: Field,
    content: Field,
    write_mutex: Mutex<()>,
}

impl Bm25Index {
    pub fn open_or_create(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)
            .with_context(|| format!("failed to create index dir {}", path.display()))?;

        let schema = Self::schema();
        let index = Index::open_or_create(
            tantivy::directory::MmapDirectory::open(path).map_err(anyhow::Error::from)?,
            schema,
        )?;
        Self::wrap(index)
    }

    /// RAM-backed index for tests and throwaway clients.
    pub fn in_memory() -> Result<Self> {
        Self::wrap(Index::create_in_ram(Self::schema()))
    }

    fn schema() -> Schema {
        let mut builder = Schema::builder();
        builder.add_text_field("doc_id", STRING | STORED);
        builder.add_text_field("content", TEXT);
        builder.build()
    }

    fn wrap(index: Index) -> Result<Self> {
        let schema = index.schema();
        let doc_id = schema.get_field("doc_id").expect("doc_id field exists");
        let content = schema.get_field("content").expect("content field exists");
        let reader = index.reader()?;

        Ok(Self {
            index,
            reader: RwLock::new(reader),
            doc_id,
            content,
            write_mutex: Mutex::new(()),
        })
    }

    /// Index documents whose id is not already present. Empty texts are
    /// filtered out. Returns how many documents were actually added.
    pub async fn index(&self, documents: &[Document]) -> Result<usize> {
        let _write = self.write_mutex.lock().await;

        let searcher = self.reader.read().await.searcher();
        let mut fresh = vec![];
        for document in documents {
            if document.text.trim().is_empty() {
                continue;
            }
            let term = Term::from_field_text(self.doc_id, &document.id);
            if searcher.doc_freq(&term)? == 0 {
                fresh.push(document);
            }
        }

        if fresh.is_empty() {
            return Ok(0);
        }

        let mut writer = self.index.writer_with_num_threads(1, 50_000_000)?;
        for document in &fresh {
            writer.add_document(doc!(
                self.doc_id => document.id.clone(),
                self.content => document.text.clone(),
            ))?;
        }
        writer.commit()?;

        *self.reader.write().await = self.index.reader()?;
        debug!(added = fresh.len(), "bm25 documents indexed");
        Ok(fresh.len())
    }

    pub async fn contains(&self, doc_id: &str) -> Result<bool> {
        let searcher = self.reader.read().await.searcher();
        let term = Term::from_field_text(self.doc_id, doc_id);
        Ok(searcher.doc_freq(&term)? > 0)
    }

    /// Keyword search. The query is tokenized to lowercase terms and
    /// compiled into a boolean union, so no input ever reaches a query
    /// grammar. `restrict` narrows the candidate set to the given ids.
    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        restrict: Option<&HashSet<String>>,
    ) -> Result<Vec<SearchHit>> {
        let terms = tokenize(query);
        if terms.is_empty() || limit == 0 {
            return Ok(vec![]);
        }

        let content_queries: Vec<Box<dyn TantivyQuery>> = terms
            .iter()
            .map(|term| {
                Box::new(TermQuery::new(
                    Term::from_field_text(self.content, term),
                    IndexRecordOption::WithFreqsAndPositions,
                )) as Box<dyn TantivyQuery>
            })
            .collect();
        let mut query: Box<dyn TantivyQuery> = Box::new(BooleanQuery::union(content_queries));

        if let Some(ids) = restrict.filter(|ids| !ids.is_empty()) {
            let id_queries: Vec<Box<dyn TantivyQuery>> = ids
                .iter()
                .map(|id| {
                    Box::new(TermQuery::new(
                        Term::from_field_text(self.doc_id, id),
                        IndexRecordOption::Basic,
                    )) as Box<dyn TantivyQuery>
                })
                .collect();
            query = Box::new(BooleanQuery::intersection(vec![
                query,
                Box::new(BooleanQuery::union(id_queries)),
            ]));
        }

        let searcher = self.reader.read().await.searcher();
        let top = searcher.search(&query, &TopDocs::with_limit(limit))?;

        let mut hits = Vec::with_capacity(top.len());
        for (score, address) in top {
            let stored = searcher.doc(address)?;
            let Some(doc_id) = stored.get_first(self.doc_id).and_then(|v| v.as_text()) else {
                continue;
            };
            hits.push(SearchHit {
                doc_id: doc_id.to_owned(),
                score,
            });
        }
        Ok(hits)
    }
}

fn tokenize(query: &str) -> Vec<String> {
    query
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn documents() -> Vec<Document> {
        vec![
            Document {
                id: "sha-add".into(),
                text: "func Add(a, b int) int { return a + b } // add two numbers".into(),
            },
            Document {
                id: "sha-sub".into(),
                text: "func Subtract(a, b int) int { return a - b }".into(),
            },
            Document {
                id: "sha-empty".into(),
                text: "   ".into(),
            },
        ]
    }

    #[tokio::test]
    async fn indexes_once_and_skips_known_ids() {
        let index = Bm25Index::in_memory().unwrap();

        let added = index.index(&documents()).await.unwrap();
        assert_eq!(added, 2); // the empty document is filtered

        let added_again = index.index(&documents()).await.unwrap();
        assert_eq!(added_again, 0);
        assert!(index.contains("sha-add").await.unwrap());
        assert!(!index.contains("sha-empty").await.unwrap());
    }

    #[tokio::test]
    async fn search_finds_matching_terms() {
        let index = Bm25Index::in_memory().unwrap();
        index.index(&documents()).await.unwrap();

        let hits = index.search("add numbers", 10, None).await.unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].doc_id, "sha-add");
        assert!(hits[0].score > 0.0);
    }

    #[tokio::test]
    async fn restriction_limits_the_candidate_set() {
        let index = Bm25Index::in_memory().unwrap();
        index.index(&documents()).await.unwrap();

        let only_sub: HashSet<String> = ["sha-sub".to_string()].into();
        let hits = index.search("int return", 10, Some(&only_sub)).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc_id, "sha-sub");
    }

    #[tokio::test]
    async fn hostile_query_strings_are_safe() {
        let index = Bm25Index::in_memory().unwrap();
        index.index(&documents()).await.unwrap();

        for query in ["AND OR NOT", "\"unclosed", "a:(b", "*", "((("] {
            // must not error, regardless of what it returns
            index.search(query, 10, None).await.unwrap();
        }
    }
}
