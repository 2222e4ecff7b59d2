//! End-to-end pipeline scenarios: ingest a local git repository through the
//! full operation chain with stub providers, then search and tear down.

use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use async_trait::async_trait;
use quarry::client::{Client, ClientOptions, SearchOptions};
use quarry::llm::{EmbeddingProvider, ProviderError, TextProvider};
use quarry::model::EntityType;
use quarry::pipeline::Operation;
use quarry::queue::Payload;
use quarry::tracker::TrackerState;
use tempfile::TempDir;

struct StubText;

#[async_trait]
impl TextProvider for StubText {
    async fn generate_text(&self, prompt: &str) -> Result<String, ProviderError> {
        let head: String = prompt.chars().take(48).collect();
        Ok(format!("stub summary: {head}"))
    }
}

struct StubEmbeddings {
    dimensions: usize,
}

#[async_trait]
impl EmbeddingProvider for StubEmbeddings {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        // deterministic bag-of-bytes vectors, good enough for ranking tests
        Ok(texts
            .iter()
            .map(|text| {
                let mut vector = vec![0.01_f32; self.dimensions];
                for (i, byte) in text.bytes().enumerate() {
                    vector[i % self.dimensions] += byte as f32 / 255.0;
                }
                vector
            })
            .collect())
    }
}

fn git(dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("git runs");
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

/// A small polyglot repository: go + python sources, a README with a
/// fenced example, and an examples directory.
fn seed_repository(dir: &Path) {
    git(dir, &["init"]);
    git(dir, &["symbolic-ref", "HEAD", "refs/heads/main"]);
    git(dir, &["config", "user.email", "test@example.com"]);
    git(dir, &["config", "user.name", "Test"]);

    std::fs::create_dir_all(dir.join("src")).unwrap();
    std::fs::write(
        dir.join("src/main.go"),
        "package main\n\n// Add adds two numbers together\nfunc Add(a, b int) int {\n\treturn a + b\n}\n\nfunc Subtract(a, b int) int {\n\treturn a - b\n}\n",
    )
    .unwrap();
    std::fs::write(
        dir.join("src/calculator.py"),
        "class Calculator:\n    \"\"\"A tiny calculator used in tests.\"\"\"\n\n    def multiply(self, a, b):\n        return a * b\n\n    def divide(self, a, b):\n        return a / b\n",
    )
    .unwrap();
    std::fs::write(
        dir.join("README.md"),
        "# calc\n\nA toy calculator.\n\n```go\nresult := Add(1, 2)\n```\n",
    )
    .unwrap();
    std::fs::create_dir_all(dir.join("examples")).unwrap();
    std::fs::write(
        dir.join("examples/demo.go"),
        "package main\n\nfunc main() {\n\tprintln(Add(2, 3))\n}\n",
    )
    .unwrap();

    git(dir, &["add", "."]);
    git(dir, &["commit", "-m", "initial commit"]);
}

async fn client_with_providers(data_dir: &Path) -> Client {
    Client::new(
        ClientOptions::default()
            .in_memory()
            .data_dir(data_dir)
            .text_provider(Arc::new(StubText))
            .embedding_provider(Arc::new(StubEmbeddings { dimensions: 16 })),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn full_chain_ingests_and_searches() {
    let source = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    seed_repository(source.path());

    let client = client_with_providers(data.path()).await;

    let repo = client
        .repositories()
        .clone(source.path().to_str().unwrap())
        .await
        .unwrap();
    client.wait_until_idle().await.unwrap();

    // one repository, at least one commit
    assert_eq!(client.repositories().list().await.unwrap().len(), 1);
    let commits = client
        .application()
        .commits
        .for_repository(repo.id)
        .await
        .unwrap();
    assert_eq!(commits.len(), 1);
    let commit_sha = commits[0].sha.clone();

    // extracted snippets contain the Add function
    let snippets = client
        .application()
        .snippets
        .for_commit(&commit_sha)
        .await
        .unwrap();
    assert!(!snippets.is_empty());
    assert!(snippets
        .iter()
        .any(|s| s.snippet.content.contains("func Add")));

    // keyword search finds it
    let results = client
        .search("add numbers", SearchOptions::default())
        .await
        .unwrap();
    assert!(!results.snippets.is_empty());
    assert!(results
        .snippets
        .iter()
        .any(|s| s.snippet.content.contains("Add")));

    // every operation of the chain reached a terminal, non-failed state
    let statuses = client
        .application()
        .statuses
        .for_trackable(&repo.id.to_string())
        .await
        .unwrap();
    let chain = [
        Operation::Clone,
        Operation::Sync,
        Operation::ScanCommit,
        Operation::ExtractSnippetsForCommit,
        Operation::ExtractExamplesForCommit,
        Operation::CreateBm25IndexForCommit,
        Operation::CreateCodeEmbeddingsForCommit,
        Operation::CreateExampleCodeEmbeddingsForCommit,
        Operation::CreateSummaryEnrichmentForCommit,
        Operation::CreateExampleSummaryForCommit,
        Operation::CreateSummaryEmbeddingsForCommit,
        Operation::CreateExampleSummaryEmbeddingsForCommit,
        Operation::CreateArchitectureEnrichmentForCommit,
        Operation::CreatePublicApiDocsForCommit,
        Operation::CreateCommitDescriptionForCommit,
        Operation::CreateDatabaseSchemaForCommit,
        Operation::CreateCookbookForCommit,
    ];
    for operation in chain {
        let matching: Vec<_> = statuses
            .iter()
            .filter(|s| s.operation == operation.as_str())
            .collect();
        assert_eq!(matching.len(), 1, "expected one status for {operation}");
        assert!(
            matches!(
                matching[0].state,
                TrackerState::Completed | TrackerState::Skipped
            ),
            "{operation} ended as {:?}",
            matching[0].state
        );
    }

    // snippet summaries exist and example enrichments landed on the commit
    let enrichments = client.enrichments().for_commit(&commit_sha).await.unwrap();
    assert!(!enrichments.is_empty());

    client.close().await.unwrap();
}

#[tokio::test]
async fn ingesting_twice_reuses_the_repository() {
    let source = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    seed_repository(source.path());

    let client = client_with_providers(data.path()).await;
    let url = source.path().to_str().unwrap().to_owned();

    let first = client.repositories().clone(&url).await.unwrap();
    client.wait_until_idle().await.unwrap();
    let snippet_count = client.application().snippets.count().await.unwrap();

    let second = client.repositories().clone(&url).await.unwrap();
    assert_eq!(first.id, second.id);
    // no new task was dispatched for the already-tracked remote
    assert!(client.tasks().list().await.unwrap().is_empty());

    client.wait_until_idle().await.unwrap();
    assert_eq!(client.repositories().list().await.unwrap().len(), 1);
    assert_eq!(
        client.application().snippets.count().await.unwrap(),
        snippet_count
    );

    client.close().await.unwrap();
}

#[tokio::test]
async fn rerunning_scan_reports_skipped() {
    let source = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    seed_repository(source.path());

    let client = client_with_providers(data.path()).await;
    let repo = client
        .repositories()
        .clone(source.path().to_str().unwrap())
        .await
        .unwrap();
    client.wait_until_idle().await.unwrap();

    let app = client.application();
    let commits = app.commits.for_repository(repo.id).await.unwrap();
    let commit_sha = commits[0].sha.clone();

    app.queue
        .enqueue(
            &[Operation::ScanCommit],
            5,
            &Payload::for_commit(repo.id, &commit_sha),
        )
        .await
        .unwrap();
    client.wait_until_idle().await.unwrap();

    assert_eq!(app.commits.for_repository(repo.id).await.unwrap().len(), 1);

    let statuses = app.statuses.for_trackable(&repo.id.to_string()).await.unwrap();
    let scans: Vec<_> = statuses
        .iter()
        .filter(|s| s.operation == Operation::ScanCommit.as_str())
        .collect();
    assert!(scans
        .iter()
        .any(|s| s.state == TrackerState::Skipped));

    client.close().await.unwrap();
}

#[tokio::test]
async fn delete_drains_and_removes_everything() {
    let source = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    seed_repository(source.path());

    let client = client_with_providers(data.path()).await;
    let repo = client
        .repositories()
        .clone(source.path().to_str().unwrap())
        .await
        .unwrap();
    client.wait_until_idle().await.unwrap();

    let working_copy = client
        .repositories()
        .get(repo.id)
        .await
        .unwrap()
        .working_copy_path
        .unwrap();
    assert!(working_copy.exists());

    client.repositories().delete(repo.id).await.unwrap();
    client.wait_until_idle().await.unwrap();

    assert!(client.repositories().list().await.unwrap().is_empty());
    assert!(!working_copy.exists());
    assert!(client.tasks().list().await.unwrap().is_empty());

    client.close().await.unwrap();
}

#[tokio::test]
async fn search_works_without_an_embedding_provider() {
    let source = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    seed_repository(source.path());

    // sqlite only: no text, no embeddings
    let client = Client::new(ClientOptions::default().in_memory().data_dir(data.path()))
        .await
        .unwrap();

    client
        .repositories()
        .clone(source.path().to_str().unwrap())
        .await
        .unwrap();
    client.wait_until_idle().await.unwrap();

    let results = client
        .search("add numbers", SearchOptions::default())
        .await
        .unwrap();
    assert!(!results.snippets.is_empty());

    client.close().await.unwrap();
}

#[tokio::test]
async fn summary_embeddings_rerun_is_skipped() {
    let source = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    seed_repository(source.path());

    let client = client_with_providers(data.path()).await;
    let repo = client
        .repositories()
        .clone(source.path().to_str().unwrap())
        .await
        .unwrap();
    client.wait_until_idle().await.unwrap();

    let app = client.application();
    let commit_sha = app.commits.for_repository(repo.id).await.unwrap()[0]
        .sha
        .clone();

    app.queue
        .enqueue(
            &[Operation::CreateSummaryEmbeddingsForCommit],
            5,
            &Payload::for_commit(repo.id, &commit_sha),
        )
        .await
        .unwrap();
    client.wait_until_idle().await.unwrap();

    let statuses = app.statuses.for_trackable(&repo.id.to_string()).await.unwrap();
    let reruns: Vec<_> = statuses
        .iter()
        .filter(|s| s.operation == Operation::CreateSummaryEmbeddingsForCommit.as_str())
        .collect();
    assert_eq!(reruns.len(), 2);
    assert!(reruns.iter().any(|s| {
        s.state == TrackerState::Skipped
            && s.message.as_deref()
                == Some("all summary enrichments already have embeddings")
    }));

    client.close().await.unwrap();
}

#[tokio::test]
async fn rescan_clears_enrichments_but_keeps_snippets() {
    let source = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    seed_repository(source.path());

    let client = client_with_providers(data.path()).await;
    let repo = client
        .repositories()
        .clone(source.path().to_str().unwrap())
        .await
        .unwrap();
    client.wait_until_idle().await.unwrap();

    let app = client.application();
    let commit_sha = app.commits.for_repository(repo.id).await.unwrap()[0]
        .sha
        .clone();

    let before = app
        .enrichments
        .for_entity(EntityType::Commit, &commit_sha, None)
        .await
        .unwrap();
    assert!(!before.is_empty());
    let snippet_count_before = app.snippets.count().await.unwrap();

    app.queue
        .enqueue(
            &[Operation::RescanCommit],
            0,
            &Payload::for_commit(repo.id, &commit_sha),
        )
        .await
        .unwrap();

    // wait for the rescan itself, then check invariants while the re-run
    // of the chain may still be going
    client.wait_until_idle().await.unwrap();

    // commit row and snippets survived, associations intact
    assert!(app
        .commits
        .exists(repo.id, &commit_sha)
        .await
        .unwrap());
    assert_eq!(app.snippets.count().await.unwrap(), snippet_count_before);
    assert!(!app
        .snippets
        .shas_for_commit(&commit_sha)
        .await
        .unwrap()
        .is_empty());

    client.close().await.unwrap();
}
