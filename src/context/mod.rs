//! Stateless RAG context assembly.
//!
//! Content enters as typed chunks with keywords and optional embeddings;
//! retrieval unions several candidate legs (semantic, keyword, recency,
//! relationship expansion), then a selection strategy packs the best
//! chunks and synthesized summaries into a hard token budget. Selection is
//! deterministic for a fixed candidate set: ties always break on chunk id.

pub mod strategies;

pub use strategies::{SelectedContext, SelectionStats, SelectionStrategy};

use crate::{FleetError, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, HashSet},
    str::FromStr,
    sync::Arc,
};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    CodeFunction,
    CodeClass,
    CodeFile,
    Documentation,
    Conversation,
    TaskDescription,
    ErrorLog,
    CommitMessage,
    Summary,
    MetaSummary,
}

impl ChunkType {
    /// Importance weight used by the hybrid strategy
    pub fn importance(&self) -> f64 {
        match self {
            ChunkType::CodeFunction => 1.0,
            ChunkType::CodeClass => 0.9,
            ChunkType::TaskDescription => 0.8,
            ChunkType::ErrorLog => 0.8,
            ChunkType::Documentation => 0.7,
            ChunkType::Conversation => 0.6,
            ChunkType::Summary => 0.5,
            ChunkType::CodeFile => 0.4,
            ChunkType::CommitMessage => 0.3,
            ChunkType::MetaSummary => 0.2,
        }
    }
}

impl FromStr for ChunkType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "code_function" => Ok(ChunkType::CodeFunction),
            "code_class" => Ok(ChunkType::CodeClass),
            "code_file" => Ok(ChunkType::CodeFile),
            "documentation" => Ok(ChunkType::Documentation),
            "conversation" => Ok(ChunkType::Conversation),
            "task_description" => Ok(ChunkType::TaskDescription),
            "error_log" => Ok(ChunkType::ErrorLog),
            "commit_message" => Ok(ChunkType::CommitMessage),
            "summary" => Ok(ChunkType::Summary),
            "meta_summary" => Ok(ChunkType::MetaSummary),
            _ => Err(format!("Unknown chunk type: {s}")),
        }
    }
}

/// Rough token estimate: four characters per token
pub fn estimate_tokens(text: &str) -> usize {
    text.len() / 4
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentChunk {
    pub id: String,
    pub project_id: String,
    pub agent_id: String,
    pub chunk_type: ChunkType,
    pub content: String,
    pub summary: String,
    pub keywords: Vec<String>,
    pub embedding: Option<Vec<f32>>,
    pub timestamp: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u32,
    /// relation kind -> related chunk ids within the same project
    pub relationships: HashMap<String, HashSet<String>>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ContentChunk {
    /// Budget cost of including this chunk: the larger of its content and
    /// summary token counts.
    pub fn token_cost(&self) -> usize {
        estimate_tokens(&self.content).max(estimate_tokens(&self.summary))
    }
}

/// Synthesized stand-in for a group of chunks that did not fit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSummary {
    pub id: String,
    pub level: u8,
    pub content: String,
    pub chunk_ids: Vec<String>,
    pub token_count: usize,
    pub relevance: f64,
    pub created_at: DateTime<Utc>,
}

/// External embedding backend; absent in degraded mode
#[async_trait::async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Filters narrowing the candidate pool before selection
#[derive(Debug, Clone, Default)]
pub struct ContextFilter {
    pub chunk_types: Option<HashSet<ChunkType>>,
    pub since: Option<DateTime<Utc>>,
}

/// Final assembled context for one query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssembledContext {
    pub text: String,
    pub total_tokens: usize,
    pub chunks: Vec<ContentChunk>,
    pub summaries: Vec<ContextSummary>,
    pub stats: SelectionStats,
}

/// Per-project inventory counts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextInventory {
    pub total_chunks: usize,
    pub total_tokens: usize,
    pub by_type: HashMap<String, usize>,
}

#[derive(Default)]
struct AssemblerState {
    chunks: HashMap<String, ContentChunk>,
}

pub struct ContextAssembler {
    state: Arc<RwLock<AssemblerState>>,
    embeddings: Option<Arc<dyn EmbeddingProvider>>,
    max_chunk_tokens: usize,
    /// Chunks held in memory; least-recently-accessed beyond this are
    /// evicted (a durable store is an external collaborator)
    cache_size: usize,
    keyword_pattern: Regex,
}

impl ContextAssembler {
    pub fn new(
        max_chunk_tokens: usize,
        cache_size: usize,
        embeddings: Option<Arc<dyn EmbeddingProvider>>,
    ) -> Self {
        Self {
            state: Arc::new(RwLock::new(AssemblerState::default())),
            embeddings,
            max_chunk_tokens,
            cache_size: cache_size.max(1),
            keyword_pattern: Regex::new(r"[A-Za-z_][A-Za-z0-9_]{3,}").expect("static pattern"),
        }
    }

    /// Ingest content, splitting it into bounded chunks by content type.
    /// Returns the ids of the stored chunks.
    pub async fn add_content(
        &self,
        project_id: &str,
        agent_id: &str,
        content: &str,
        chunk_type: ChunkType,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<Vec<String>> {
        if content.trim().is_empty() {
            return Err(FleetError::InvalidArgument("content cannot be empty".to_string()));
        }

        let pieces = self.split_content(content, chunk_type);
        let mut ids = Vec::new();
        let now = Utc::now();

        for piece in pieces {
            // Embedding failures degrade to keyword-only retrieval
            let embedding = match &self.embeddings {
                Some(provider) => match provider.embed(&piece).await {
                    Ok(embedding) => Some(embedding),
                    Err(e) => {
                        tracing::warn!("embedding backend unavailable, storing without: {e}");
                        None
                    }
                },
                None => None,
            };

            let summary = Self::first_line_summary(&piece);
            let chunk = ContentChunk {
                id: format!("chunk_{}", &Uuid::new_v4().simple().to_string()[..12]),
                project_id: project_id.to_string(),
                agent_id: agent_id.to_string(),
                chunk_type,
                keywords: self.extract_keywords(&piece),
                content: piece,
                summary,
                embedding,
                timestamp: now,
                last_accessed: now,
                access_count: 0,
                relationships: HashMap::new(),
                metadata: metadata.clone(),
            };
            ids.push(chunk.id.clone());

            let mut state = self.state.write().await;
            state.chunks.insert(chunk.id.clone(), chunk);
        }

        // Sibling chunks from one ingestion are related to each other
        if ids.len() > 1 {
            let mut state = self.state.write().await;
            for id in &ids {
                let others: HashSet<String> =
                    ids.iter().filter(|o| *o != id).cloned().collect();
                if let Some(chunk) = state.chunks.get_mut(id) {
                    chunk
                        .relationships
                        .entry("related".to_string())
                        .or_default()
                        .extend(others);
                }
            }
        }

        self.evict_over_cache().await;
        Ok(ids)
    }

    /// Drop least-recently-accessed chunks once the in-memory cache
    /// exceeds its configured size
    async fn evict_over_cache(&self) {
        let mut state = self.state.write().await;
        if state.chunks.len() <= self.cache_size {
            return;
        }
        let mut ranked: Vec<(DateTime<Utc>, String)> = state
            .chunks
            .values()
            .map(|c| (c.last_accessed, c.id.clone()))
            .collect();
        ranked.sort();
        let excess = state.chunks.len() - self.cache_size;
        for (_, id) in ranked.into_iter().take(excess) {
            state.chunks.remove(&id);
        }
    }

    pub async fn get_chunk(&self, chunk_id: &str) -> Result<ContentChunk> {
        let state = self.state.read().await;
        state
            .chunks
            .get(chunk_id)
            .cloned()
            .ok_or_else(|| FleetError::NotFound(format!("chunk {chunk_id}")))
    }

    /// Link two chunks of the same project under a relation kind
    pub async fn link_chunks(&self, kind: &str, from_id: &str, to_id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let to_project = state
            .chunks
            .get(to_id)
            .map(|c| c.project_id.clone())
            .ok_or_else(|| FleetError::NotFound(format!("chunk {to_id}")))?;
        let from = state
            .chunks
            .get_mut(from_id)
            .ok_or_else(|| FleetError::NotFound(format!("chunk {from_id}")))?;
        if from.project_id != to_project {
            return Err(FleetError::InvalidArgument(
                "chunks belong to different projects".to_string(),
            ));
        }
        from.relationships
            .entry(kind.to_string())
            .or_default()
            .insert(to_id.to_string());
        Ok(())
    }

    /// Assemble a budget-bounded context for a query. The summed token
    /// cost of the returned chunks and summaries never exceeds
    /// `budget_tokens`.
    pub async fn assemble(
        &self,
        project_id: &str,
        agent_id: &str,
        query: &str,
        budget_tokens: usize,
        strategy: SelectionStrategy,
        filter: &ContextFilter,
    ) -> Result<AssembledContext> {
        let query_embedding = match &self.embeddings {
            Some(provider) => provider.embed(query).await.ok(),
            None => None,
        };

        let candidates = self
            .collect_candidates(project_id, agent_id, query, query_embedding.as_deref(), filter)
            .await;

        let selected = strategies::select(
            query,
            query_embedding.as_deref(),
            candidates,
            budget_tokens,
            strategy,
        );

        // Selection feeds back into recency-based retrieval
        {
            let mut state = self.state.write().await;
            let now = Utc::now();
            for chunk in &selected.chunks {
                if let Some(stored) = state.chunks.get_mut(&chunk.id) {
                    stored.access_count += 1;
                    stored.last_accessed = now;
                }
            }
        }

        Ok(Self::render(query, selected))
    }

    /// Union of retrieval legs, deduplicated by id and filtered
    async fn collect_candidates(
        &self,
        project_id: &str,
        agent_id: &str,
        query: &str,
        query_embedding: Option<&[f32]>,
        filter: &ContextFilter,
    ) -> Vec<ContentChunk> {
        let state = self.state.read().await;
        let project_chunks: Vec<&ContentChunk> = state
            .chunks
            .values()
            .filter(|c| c.project_id == project_id)
            .collect();

        let mut picked: Vec<ContentChunk> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        fn take(chunk: &ContentChunk, picked: &mut Vec<ContentChunk>, seen: &mut HashSet<String>) {
            if seen.insert(chunk.id.clone()) {
                picked.push(chunk.clone());
            }
        }

        // Leg 1: semantic neighbors, when embeddings are available
        if let Some(query_embedding) = query_embedding {
            let mut scored: Vec<(f64, &ContentChunk)> = project_chunks
                .iter()
                .filter_map(|c| {
                    c.embedding
                        .as_ref()
                        .map(|e| (strategies::cosine_similarity(query_embedding, e), *c))
                })
                .collect();
            scored.sort_by(|a, b| {
                b.0.partial_cmp(&a.0)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.1.id.cmp(&b.1.id))
            });
            for (_, chunk) in scored
                .into_iter()
                .take(crate::constants::SEMANTIC_CANDIDATE_LIMIT)
            {
                take(chunk, &mut picked, &mut seen);
            }
        }

        // Leg 2: keyword match over content, summary, and keyword list
        let query_terms: Vec<String> = self
            .extract_keywords(query)
            .into_iter()
            .map(|k| stem(&k))
            .collect();
        if !query_terms.is_empty() {
            let mut scored: Vec<(usize, &ContentChunk)> = project_chunks
                .iter()
                .filter_map(|c| {
                    let haystack =
                        format!("{} {} {}", c.content, c.summary, c.keywords.join(" "))
                            .to_lowercase();
                    let hits = query_terms
                        .iter()
                        .filter(|term| haystack.contains(term.as_str()))
                        .count();
                    (hits > 0).then_some((hits, *c))
                })
                .collect();
            scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.id.cmp(&b.1.id)));
            for (_, chunk) in scored
                .into_iter()
                .take(crate::constants::KEYWORD_CANDIDATE_LIMIT)
            {
                take(chunk, &mut picked, &mut seen);
            }
        }

        // Leg 3: recent activity for this (project, agent)
        let mut recent: Vec<&ContentChunk> = project_chunks
            .iter()
            .filter(|c| c.agent_id == agent_id)
            .copied()
            .collect();
        recent.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)));
        for chunk in recent
            .into_iter()
            .take(crate::constants::RECENT_CANDIDATE_LIMIT)
        {
            take(chunk, &mut picked, &mut seen);
        }

        // Leg 4: one-hop relationship expansion from the strongest hits
        let related_ids: HashSet<String> = picked
            .iter()
            .take(20)
            .flat_map(|c| c.relationships.values().flatten().cloned())
            .collect();
        let mut related: Vec<&ContentChunk> = related_ids
            .iter()
            .filter_map(|id| state.chunks.get(id))
            .filter(|c| c.project_id == project_id)
            .collect();
        related.sort_by(|a, b| {
            b.access_count
                .cmp(&a.access_count)
                .then_with(|| a.id.cmp(&b.id))
        });
        for chunk in related
            .into_iter()
            .take(crate::constants::RELATED_CANDIDATE_LIMIT)
        {
            take(chunk, &mut picked, &mut seen);
        }

        picked.retain(|chunk| {
            filter
                .chunk_types
                .as_ref()
                .map(|types| types.contains(&chunk.chunk_type))
                .unwrap_or(true)
                && filter.since.map(|since| chunk.timestamp >= since).unwrap_or(true)
        });
        picked
    }

    fn render(query: &str, selected: SelectedContext) -> AssembledContext {
        let mut text = format!(
            "Query: {query}\n\nContext (strategy: {}):\n\n",
            selected.stats.strategy
        );

        if !selected.summaries.is_empty() {
            text.push_str("=== SUMMARIES ===\n");
            for summary in &selected.summaries {
                text.push_str(&format!("[summary L{}] {}\n", summary.level, summary.content));
            }
            text.push('\n');
        }

        if !selected.chunks.is_empty() {
            text.push_str("=== DETAIL ===\n");
            let mut by_type: Vec<(&ChunkType, Vec<&ContentChunk>)> = {
                let mut groups: HashMap<&ChunkType, Vec<&ContentChunk>> = HashMap::new();
                for chunk in &selected.chunks {
                    groups.entry(&chunk.chunk_type).or_default().push(chunk);
                }
                groups.into_iter().collect()
            };
            by_type.sort_by_key(|(chunk_type, _)| **chunk_type);

            for (chunk_type, chunks) in by_type {
                text.push_str(&format!("\n--- {chunk_type:?} ---\n"));
                for chunk in chunks {
                    text.push_str(&format!("[{}] {}\n\n", chunk.id, chunk.content));
                }
            }
        }

        let total_tokens = selected
            .chunks
            .iter()
            .map(|c| c.token_cost())
            .sum::<usize>()
            + selected.summaries.iter().map(|s| s.token_count).sum::<usize>();

        AssembledContext {
            text,
            total_tokens,
            chunks: selected.chunks,
            summaries: selected.summaries,
            stats: selected.stats,
        }
    }

    /// Per-project inventory used by the monitoring surface
    pub async fn inventory(&self, project_id: &str) -> ContextInventory {
        let state = self.state.read().await;
        let mut by_type: HashMap<String, usize> = HashMap::new();
        let mut total_tokens = 0;
        let mut total_chunks = 0;

        for chunk in state.chunks.values().filter(|c| c.project_id == project_id) {
            *by_type
                .entry(format!("{:?}", chunk.chunk_type))
                .or_default() += 1;
            total_tokens += chunk.token_cost();
            total_chunks += 1;
        }

        ContextInventory {
            total_chunks,
            total_tokens,
            by_type,
        }
    }

    // --- chunking ---------------------------------------------------------

    fn split_content(&self, content: &str, chunk_type: ChunkType) -> Vec<String> {
        let raw = match chunk_type {
            ChunkType::CodeFile | ChunkType::CodeFunction | ChunkType::CodeClass => {
                Self::split_code(content)
            }
            ChunkType::Documentation => Self::split_sections(content, "#"),
            ChunkType::Conversation => Self::split_paragraphs(content),
            _ => Self::split_paragraphs(content),
        };

        // Pack small pieces together, then enforce the hard cap
        let mut packed: Vec<String> = Vec::new();
        for piece in raw {
            match packed.last_mut() {
                Some(last)
                    if estimate_tokens(last) + estimate_tokens(&piece)
                        <= crate::constants::OPTIMAL_CHUNK_TOKENS =>
                {
                    last.push_str("\n\n");
                    last.push_str(&piece);
                }
                _ => packed.push(piece),
            }
        }

        packed
            .into_iter()
            .flat_map(|piece| self.enforce_cap(piece))
            .filter(|piece| !piece.trim().is_empty())
            .collect()
    }

    fn enforce_cap(&self, piece: String) -> Vec<String> {
        let cap_chars = self.max_chunk_tokens * 4;
        if piece.len() <= cap_chars {
            return vec![piece];
        }
        piece
            .as_bytes()
            .chunks(cap_chars)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
            .collect()
    }

    /// Split source text at function and type definition boundaries
    fn split_code(content: &str) -> Vec<String> {
        let starters = [
            "fn ", "pub fn ", "async fn ", "pub async fn ", "struct ", "pub struct ", "impl ",
            "class ", "def ", "function ", "const ", "enum ", "pub enum ", "trait ", "pub trait ",
        ];
        let mut pieces = Vec::new();
        let mut current = String::new();

        for line in content.lines() {
            let trimmed = line.trim_start();
            let is_boundary = starters.iter().any(|s| trimmed.starts_with(s));
            if is_boundary && !current.trim().is_empty() {
                pieces.push(std::mem::take(&mut current));
            }
            current.push_str(line);
            current.push('\n');
        }
        if !current.trim().is_empty() {
            pieces.push(current);
        }
        pieces
    }

    fn split_sections(content: &str, header_prefix: &str) -> Vec<String> {
        let mut pieces = Vec::new();
        let mut current = String::new();
        for line in content.lines() {
            if line.starts_with(header_prefix) && !current.trim().is_empty() {
                pieces.push(std::mem::take(&mut current));
            }
            current.push_str(line);
            current.push('\n');
        }
        if !current.trim().is_empty() {
            pieces.push(current);
        }
        pieces
    }

    fn split_paragraphs(content: &str) -> Vec<String> {
        content
            .split("\n\n")
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect()
    }

    fn first_line_summary(content: &str) -> String {
        let line = content.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
        let mut summary: String = line.chars().take(120).collect();
        if line.chars().count() > 120 {
            summary.push_str("...");
        }
        summary
    }

    /// Top keywords by frequency, stopwords removed, at most ten
    fn extract_keywords(&self, text: &str) -> Vec<String> {
        const STOPWORDS: &[&str] = &[
            "this", "that", "with", "from", "have", "will", "would", "should", "their", "there",
            "which", "when", "what", "were", "been", "into", "then", "them", "they", "some",
            "self", "true", "false",
        ];

        let mut counts: HashMap<String, usize> = HashMap::new();
        for hit in self.keyword_pattern.find_iter(text) {
            let word = hit.as_str().to_lowercase();
            if STOPWORDS.contains(&word.as_str()) {
                continue;
            }
            *counts.entry(word).or_default() += 1;
        }

        let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.into_iter().take(10).map(|(word, _)| word).collect()
    }
}

/// Light stemmer for keyword matching: strips common English suffixes
pub fn stem(word: &str) -> String {
    let word = word.to_lowercase();
    for suffix in ["ing", "ies", "ed", "es", "s"] {
        if let Some(stripped) = word.strip_suffix(suffix) {
            if stripped.len() >= 3 {
                return stripped.to_string();
            }
        }
    }
    word
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assembler() -> ContextAssembler {
        ContextAssembler::new(crate::constants::MAX_CHUNK_TOKENS, 1000, None)
    }

    #[tokio::test]
    async fn add_content_chunks_and_extracts_keywords() {
        let assembler = assembler();
        let ids = assembler
            .add_content(
                "p1",
                "dev1",
                "The authentication service validates tokens.\n\nThe authorization layer checks roles against the authentication service.",
                ChunkType::Documentation,
                HashMap::new(),
            )
            .await
            .unwrap();
        assert!(!ids.is_empty());

        let chunk = assembler.get_chunk(&ids[0]).await.unwrap();
        assert!(chunk.keywords.contains(&"authentication".to_string()));
        assert!(!chunk.summary.is_empty());
    }

    #[tokio::test]
    async fn empty_content_is_rejected() {
        let assembler = assembler();
        let result = assembler
            .add_content("p1", "dev1", "   ", ChunkType::Documentation, HashMap::new())
            .await;
        assert!(matches!(result, Err(FleetError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn chunks_never_exceed_the_token_cap() {
        let assembler = ContextAssembler::new(100, 1000, None);
        let big = "word ".repeat(2000);
        let ids = assembler
            .add_content("p1", "dev1", &big, ChunkType::Documentation, HashMap::new())
            .await
            .unwrap();
        assert!(ids.len() > 1);
        for id in ids {
            let chunk = assembler.get_chunk(&id).await.unwrap();
            assert!(estimate_tokens(&chunk.content) <= 100);
        }
    }

    #[tokio::test]
    async fn code_splits_on_function_boundaries() {
        let assembler = ContextAssembler::new(2000, 1000, None);
        // Force no re-packing by making each function sizeable
        let body = "    let x = 1;\n".repeat(300);
        let code = format!("fn alpha() {{\n{body}}}\n\nfn beta() {{\n{body}}}\n");
        let ids = assembler
            .add_content("p1", "dev1", &code, ChunkType::CodeFile, HashMap::new())
            .await
            .unwrap();
        assert!(ids.len() >= 2);
    }

    #[tokio::test]
    async fn sibling_chunks_are_related() {
        let assembler = ContextAssembler::new(50, 1000, None);
        let ids = assembler
            .add_content(
                "p1",
                "dev1",
                &"paragraph one about locks. ".repeat(20),
                ChunkType::Documentation,
                HashMap::new(),
            )
            .await
            .unwrap();
        assert!(ids.len() > 1);
        let chunk = assembler.get_chunk(&ids[0]).await.unwrap();
        let related = chunk.relationships.get("related").unwrap();
        assert!(related.contains(&ids[1]));
    }

    #[tokio::test]
    async fn link_chunks_enforces_same_project() {
        let assembler = assembler();
        let a = assembler
            .add_content("p1", "dev1", "first chunk", ChunkType::Documentation, HashMap::new())
            .await
            .unwrap();
        let b = assembler
            .add_content("p2", "dev1", "second chunk", ChunkType::Documentation, HashMap::new())
            .await
            .unwrap();

        let result = assembler.link_chunks("related", &a[0], &b[0]).await;
        assert!(matches!(result, Err(FleetError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn assemble_respects_budget_and_is_deterministic() {
        let assembler = assembler();
        for i in 0..50 {
            assembler
                .add_content(
                    "p1",
                    "dev1",
                    &format!("lock manager details number {i}: {}", "filler text ".repeat(40)),
                    ChunkType::Documentation,
                    HashMap::new(),
                )
                .await
                .unwrap();
        }

        let first = assembler
            .assemble(
                "p1",
                "dev1",
                "lock manager",
                500,
                SelectionStrategy::Hybrid,
                &ContextFilter::default(),
            )
            .await
            .unwrap();
        assert!(first.total_tokens <= 500);
        assert!(!first.chunks.is_empty());

        let second = assembler
            .assemble(
                "p1",
                "dev1",
                "lock manager",
                500,
                SelectionStrategy::Hybrid,
                &ContextFilter::default(),
            )
            .await
            .unwrap();
        let first_ids: Vec<&str> = first.chunks.iter().map(|c| c.id.as_str()).collect();
        let second_ids: Vec<&str> = second.chunks.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(first_ids, second_ids);
    }

    #[tokio::test]
    async fn assemble_updates_access_counts() {
        let assembler = assembler();
        let ids = assembler
            .add_content(
                "p1",
                "dev1",
                "scheduler details worth retrieving",
                ChunkType::Documentation,
                HashMap::new(),
            )
            .await
            .unwrap();

        assembler
            .assemble(
                "p1",
                "dev1",
                "scheduler",
                1000,
                SelectionStrategy::TemporalPriority,
                &ContextFilter::default(),
            )
            .await
            .unwrap();

        let chunk = assembler.get_chunk(&ids[0]).await.unwrap();
        assert_eq!(chunk.access_count, 1);
    }

    #[tokio::test]
    async fn filter_restricts_chunk_types() {
        let assembler = assembler();
        assembler
            .add_content("p1", "dev1", "error trace one", ChunkType::ErrorLog, HashMap::new())
            .await
            .unwrap();
        assembler
            .add_content("p1", "dev1", "error handling docs", ChunkType::Documentation, HashMap::new())
            .await
            .unwrap();

        let context = assembler
            .assemble(
                "p1",
                "dev1",
                "error",
                1000,
                SelectionStrategy::TemporalPriority,
                &ContextFilter {
                    chunk_types: Some(HashSet::from([ChunkType::ErrorLog])),
                    since: None,
                },
            )
            .await
            .unwrap();
        assert!(context
            .chunks
            .iter()
            .all(|c| c.chunk_type == ChunkType::ErrorLog));
    }

    #[tokio::test]
    async fn cache_evicts_least_recently_accessed() {
        let assembler = ContextAssembler::new(2000, 3, None);
        let mut all_ids = Vec::new();
        for i in 0..5 {
            let ids = assembler
                .add_content(
                    "p1",
                    "dev1",
                    &format!("standalone note {i}"),
                    ChunkType::Documentation,
                    HashMap::new(),
                )
                .await
                .unwrap();
            all_ids.extend(ids);
            // Distinct last_accessed ordering
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let inventory = assembler.inventory("p1").await;
        assert_eq!(inventory.total_chunks, 3);
        // The earliest chunks were evicted
        assert!(assembler.get_chunk(&all_ids[0]).await.is_err());
        assert!(assembler.get_chunk(&all_ids[4]).await.is_ok());
    }

    #[tokio::test]
    async fn inventory_counts_by_type() {
        let assembler = assembler();
        assembler
            .add_content("p1", "dev1", "doc text", ChunkType::Documentation, HashMap::new())
            .await
            .unwrap();
        assembler
            .add_content("p1", "dev1", "an error", ChunkType::ErrorLog, HashMap::new())
            .await
            .unwrap();
        assembler
            .add_content("p2", "dev1", "other project", ChunkType::Documentation, HashMap::new())
            .await
            .unwrap();

        let inventory = assembler.inventory("p1").await;
        assert_eq!(inventory.total_chunks, 2);
        assert_eq!(inventory.by_type.get("Documentation"), Some(&1));
    }

    #[test]
    fn stemming_strips_suffixes() {
        assert_eq!(stem("locking"), "lock");
        assert_eq!(stem("locks"), "lock");
        assert_eq!(stem("managed"), "manag");
        assert_eq!(stem("bus"), "bus");
    }
}
