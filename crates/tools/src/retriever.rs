//! Retriever tool: document lookup with the matched documents carried as
//! an artifact.
//!
//! The store behind it is a [`DocumentStore`]. A vector database would
//! implement the same trait; [`InMemoryDocumentStore`] scores by keyword
//! overlap and is what the CLI loads from a directory of notes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use stockwise_core::error::ToolError;
use stockwise_core::tool::{Tool, ToolOutput};
use tokio::sync::RwLock;
use tracing::debug;

/// A retrievable chunk of text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Document {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Something that can find documents relevant to a query.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Up to `k` documents, most relevant first.
    async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<Document>, ToolError>;
}

/// Keyword-overlap document store.
#[derive(Default)]
pub struct InMemoryDocumentStore {
    documents: RwLock<Vec<Document>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_documents(documents: Vec<Document>) -> Self {
        Self {
            documents: RwLock::new(documents),
        }
    }

    pub async fn add(&self, document: Document) {
        self.documents.write().await.push(document);
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    /// Load every `.md` and `.txt` file in `dir` as one document, with the
    /// file name as id and `source` metadata.
    pub async fn load_dir(dir: &Path) -> Result<Self, ToolError> {
        let io_err = |e: std::io::Error| ToolError::ExecutionFailed {
            tool_name: "retriever".into(),
            reason: format!("failed to read {}: {e}", dir.display()),
        };

        let mut entries = tokio::fs::read_dir(dir).await.map_err(io_err)?;
        let mut documents = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            let path = entry.path();
            let is_text = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("md") || e.eq_ignore_ascii_case("txt"));
            if !is_text {
                continue;
            }
            let content = tokio::fs::read_to_string(&path).await.map_err(io_err)?;
            let name = entry.file_name().to_string_lossy().into_owned();
            documents.push(Document::new(name.clone(), content).with_metadata("source", name));
        }
        documents.sort_by(|a, b| a.id.cmp(&b.id));

        debug!(dir = %dir.display(), count = documents.len(), "Loaded documents");
        Ok(Self::from_documents(documents))
    }
}

fn score(content: &str, terms: &[String]) -> usize {
    let content = content.to_lowercase();
    terms.iter().filter(|t| content.contains(t.as_str())).count()
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<Document>, ToolError> {
        let terms: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();
        let documents = self.documents.read().await;

        let mut scored: Vec<(usize, usize)> = documents
            .iter()
            .enumerate()
            .map(|(i, d)| (score(&d.content, &terms), i))
            .filter(|(s, _)| *s > 0)
            .collect();
        // highest score first, ties in insertion order
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(_, i)| documents[i].clone())
            .collect())
    }
}

/// Retrieves the `k` most relevant documents for the model's query.
pub struct RetrieverTool {
    store: Arc<dyn DocumentStore>,
    k: usize,
}

impl RetrieverTool {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store, k: 2 }
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }
}

/// `출처(Source): {metadata}\n내용(Content): {content}` blocks separated by a
/// blank line.
pub fn serialize_documents(documents: &[Document]) -> String {
    documents
        .iter()
        .map(|d| {
            format!(
                "출처(Source): {}\n내용(Content): {}",
                serde_json::Value::Object(d.metadata.clone()),
                d.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[async_trait]
impl Tool for RetrieverTool {
    fn name(&self) -> &str {
        "get_retrieve_context"
    }

    fn description(&self) -> &str {
        "질문(query)에 답하기 위해 관련 정보를 검색합니다. 입력은 검색어입니다."
    }

    async fn invoke(&self, input: &str) -> Result<ToolOutput, ToolError> {
        let query = input.trim();
        if query.is_empty() {
            return Err(ToolError::InvalidInput("query must not be empty".into()));
        }

        let documents = self.store.similarity_search(query, self.k).await?;
        let artifact = serde_json::to_value(&documents).map_err(|e| ToolError::ExecutionFailed {
            tool_name: self.name().into(),
            reason: e.to_string(),
        })?;

        if documents.is_empty() {
            return Ok(ToolOutput::with_artifact("관련 문서를 찾지 못했습니다.", artifact));
        }
        Ok(ToolOutput::with_artifact(serialize_documents(&documents), artifact))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Arc<InMemoryDocumentStore> {
        Arc::new(InMemoryDocumentStore::from_documents(vec![
            Document::new("per", "PER은 주가를 주당순이익으로 나눈 값이다.").with_metadata("source", "per.md"),
            Document::new("pbr", "PBR은 주가를 주당순자산으로 나눈 값이다.").with_metadata("source", "pbr.md"),
            Document::new("div", "배당 수익률은 주당 배당금을 주가로 나눈 값이다.").with_metadata("source", "div.md"),
        ]))
    }

    #[tokio::test]
    async fn best_matches_first() {
        let docs = store().similarity_search("PER 주당순이익", 2).await.unwrap();
        assert_eq!(docs[0].id, "per");
        assert!(docs.len() <= 2);
    }

    #[tokio::test]
    async fn ties_keep_insertion_order_and_k_is_respected() {
        let docs = store().similarity_search("주가", 5).await.unwrap();
        let ids: Vec<_> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["per", "pbr", "div"]);

        let docs = store().similarity_search("주가", 1).await.unwrap();
        assert_eq!(docs.len(), 1);
    }

    #[tokio::test]
    async fn tool_returns_text_and_artifact() {
        let tool = RetrieverTool::new(store());
        let output = tool.invoke("배당 수익률").await.unwrap();

        assert!(output.text.starts_with("출처(Source): {\"source\":\"div.md\"}"));
        assert!(output.text.contains("내용(Content): 배당 수익률은"));
        let artifact = output.artifact.unwrap();
        assert_eq!(artifact[0]["id"], "div");
    }

    #[tokio::test]
    async fn no_match_and_empty_query() {
        let tool = RetrieverTool::new(store());
        let output = tool.invoke("반도체").await.unwrap();
        assert_eq!(output.text, "관련 문서를 찾지 못했습니다.");
        assert_eq!(output.artifact, Some(serde_json::json!([])));

        assert!(matches!(tool.invoke("  ").await, Err(ToolError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn load_dir_reads_text_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.md"), "ROE 자기자본이익률").unwrap();
        std::fs::write(dir.path().join("a.txt"), "EPS 주당순이익").unwrap();
        std::fs::write(dir.path().join("skip.bin"), "ROE").unwrap();

        let store = InMemoryDocumentStore::load_dir(dir.path()).await.unwrap();
        assert_eq!(store.len().await, 2);

        let docs = store.similarity_search("roe", 5).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "b.md");
        assert_eq!(docs[0].metadata["source"], "b.md");
    }
}
