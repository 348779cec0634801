//! Selection strategies for budget-bounded context packing.
//!
//! Each strategy takes the same inputs (query, candidates, budget) and
//! returns a selection whose summed token cost never exceeds the budget.
//! For a fixed candidate set every strategy is deterministic; ordering
//! ties always resolve on lexicographic chunk id.

use super::{estimate_tokens, ChunkType, ContentChunk, ContextSummary};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    Hierarchical,
    SemanticClustering,
    TemporalPriority,
    #[default]
    Hybrid,
}

impl FromStr for SelectionStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "hierarchical" => Ok(SelectionStrategy::Hierarchical),
            "semantic_clustering" => Ok(SelectionStrategy::SemanticClustering),
            "temporal_priority" => Ok(SelectionStrategy::TemporalPriority),
            "hybrid" => Ok(SelectionStrategy::Hybrid),
            _ => Err(format!("Unknown selection strategy: {s}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SelectionStats {
    pub strategy: String,
    pub candidates: usize,
    pub selected_chunks: usize,
    pub selected_summaries: usize,
    pub budget_tokens: usize,
    pub used_tokens: usize,
    /// Set when a strategy ran without its preferred inputs
    pub degraded: bool,
}

#[derive(Debug, Clone)]
pub struct SelectedContext {
    pub chunks: Vec<ContentChunk>,
    pub summaries: Vec<ContextSummary>,
    pub stats: SelectionStats,
}

/// Run the chosen strategy. Total dispatch: every strategy handles every
/// candidate set, degrading rather than failing.
pub fn select(
    query: &str,
    query_embedding: Option<&[f32]>,
    mut candidates: Vec<ContentChunk>,
    budget_tokens: usize,
    strategy: SelectionStrategy,
) -> SelectedContext {
    let candidate_count = candidates.len();
    let relevance = score_relevance(query, query_embedding, &candidates);

    // Canonical order up front so every downstream tie is id-stable
    candidates.sort_by(|a, b| a.id.cmp(&b.id));

    let (chunks, summaries, degraded) = match strategy {
        SelectionStrategy::Hierarchical => {
            let (c, s) = hierarchical(&candidates, &relevance, budget_tokens);
            (c, s, false)
        }
        SelectionStrategy::SemanticClustering => {
            semantic_clustering(query_embedding, &candidates, &relevance, budget_tokens)
        }
        SelectionStrategy::TemporalPriority => {
            (temporal_priority(&candidates, &relevance, budget_tokens), Vec::new(), false)
        }
        SelectionStrategy::Hybrid => {
            let (c, s) = hybrid(&candidates, &relevance, budget_tokens);
            (c, s, false)
        }
    };

    let used_tokens = chunks.iter().map(|c| c.token_cost()).sum::<usize>()
        + summaries.iter().map(|s| s.token_count).sum::<usize>();
    debug_assert!(used_tokens <= budget_tokens);

    SelectedContext {
        stats: SelectionStats {
            strategy: format!("{strategy:?}").to_lowercase(),
            candidates: candidate_count,
            selected_chunks: chunks.len(),
            selected_summaries: summaries.len(),
            budget_tokens,
            used_tokens,
            degraded,
        },
        chunks,
        summaries,
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += (*x as f64) * (*y as f64);
        norm_a += (*x as f64) * (*x as f64);
        norm_b += (*y as f64) * (*y as f64);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Query relevance per chunk: semantic similarity when embeddings exist,
/// blended with keyword and metadata matches
fn score_relevance(
    query: &str,
    query_embedding: Option<&[f32]>,
    chunks: &[ContentChunk],
) -> HashMap<String, f64> {
    let query_terms: Vec<String> = query
        .to_lowercase()
        .split_whitespace()
        .map(|term| super::stem(term))
        .filter(|term| !term.is_empty())
        .collect();

    let mut scores = HashMap::new();
    for chunk in chunks {
        let semantic = match (query_embedding, chunk.embedding.as_deref()) {
            (Some(query_embedding), Some(embedding)) => {
                cosine_similarity(query_embedding, embedding).max(0.0)
            }
            _ => 0.0,
        };

        let keyword = if query_terms.is_empty() {
            0.0
        } else {
            let haystack = format!("{} {}", chunk.content, chunk.summary).to_lowercase();
            let hits = query_terms
                .iter()
                .filter(|term| haystack.contains(term.as_str()))
                .count();
            hits as f64 / query_terms.len() as f64
        };

        let metadata = if query_terms.is_empty() {
            0.0
        } else {
            let metadata_text = chunk
                .metadata
                .values()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(" ")
                .to_lowercase();
            let hits = query_terms
                .iter()
                .filter(|term| metadata_text.contains(term.as_str()))
                .count();
            hits as f64 / query_terms.len() as f64
        };

        scores.insert(
            chunk.id.clone(),
            semantic * 0.6 + keyword * 0.3 + metadata * 0.1,
        );
    }
    scores
}

fn relevance_of(relevance: &HashMap<String, f64>, chunk: &ContentChunk) -> f64 {
    *relevance.get(&chunk.id).unwrap_or(&0.0)
}

fn half_life_decay(days: f64, half_life_days: f64) -> f64 {
    (0.5f64).powf(days.max(0.0) / half_life_days)
}

fn age_days(chunk: &ContentChunk) -> f64 {
    (Utc::now() - chunk.timestamp).num_seconds().max(0) as f64 / 86_400.0
}

fn access_age_days(chunk: &ContentChunk) -> f64 {
    (Utc::now() - chunk.last_accessed).num_seconds().max(0) as f64 / 86_400.0
}

/// Deterministic summary id derived from the covered chunk ids
fn summary_id(prefix: &str, chunk_ids: &[String]) -> String {
    let mut digest = Uuid::new_v5(&Uuid::NAMESPACE_OID, chunk_ids.join(",").as_bytes())
        .simple()
        .to_string();
    digest.truncate(8);
    format!("{prefix}_{digest}")
}

fn make_summary(prefix: &str, label: &str, chunks: &[&ContentChunk], relevance: f64) -> ContextSummary {
    let content = format!("Summary of {} {label} items", chunks.len());
    let chunk_ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();
    ContextSummary {
        id: summary_id(prefix, &chunk_ids),
        level: 1,
        token_count: estimate_tokens(&content).max(1),
        content,
        chunk_ids,
        relevance,
        created_at: Utc::now(),
    }
}

/// Cluster by (type, project), synthesize level-1 summaries, then run a
/// greedy knapsack over chunks (value = relevance x 100) and summaries
/// (value = relevance x 80) ordered by value density.
fn hierarchical(
    candidates: &[ContentChunk],
    relevance: &HashMap<String, f64>,
    budget_tokens: usize,
) -> (Vec<ContentChunk>, Vec<ContextSummary>) {
    // BTreeMap keeps cluster iteration order stable
    let mut clusters: BTreeMap<String, Vec<&ContentChunk>> = BTreeMap::new();
    for chunk in candidates {
        clusters
            .entry(format!("{:?}_{}", chunk.chunk_type, chunk.project_id))
            .or_default()
            .push(chunk);
    }

    let mut summaries = Vec::new();
    for (label, members) in &clusters {
        if members.len() >= 3 {
            let avg = members
                .iter()
                .map(|c| relevance_of(relevance, c))
                .sum::<f64>()
                / members.len() as f64;
            summaries.push(make_summary("summary", label, members, avg));
        }
    }

    enum Item<'a> {
        Chunk(&'a ContentChunk),
        Summary(ContextSummary),
    }

    let mut items: Vec<(f64, usize, String, Item)> = Vec::new();
    for chunk in candidates {
        let value = relevance_of(relevance, chunk) * 100.0;
        let weight = chunk.token_cost().max(1);
        items.push((value / weight as f64, weight, chunk.id.clone(), Item::Chunk(chunk)));
    }
    for summary in summaries {
        let value = summary.relevance * 80.0;
        let weight = summary.token_count.max(1);
        items.push((
            value / weight as f64,
            weight,
            summary.id.clone(),
            Item::Summary(summary),
        ));
    }

    items.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.2.cmp(&b.2))
    });

    let mut selected_chunks = Vec::new();
    let mut selected_summaries = Vec::new();
    let mut used = 0usize;
    for (_, weight, _, item) in items {
        if used + weight > budget_tokens {
            continue;
        }
        used += weight;
        match item {
            Item::Chunk(chunk) => selected_chunks.push(chunk.clone()),
            Item::Summary(summary) => selected_summaries.push(summary),
        }
    }

    (selected_chunks, selected_summaries)
}

/// k-means over embeddings; clusters ranked by cosine distance of their
/// centroid to the query; best chunks per cluster until the budget runs
/// out, with a summary standing in for each cluster's remainder. Falls
/// back to temporal priority when embeddings are missing.
fn semantic_clustering(
    query_embedding: Option<&[f32]>,
    candidates: &[ContentChunk],
    relevance: &HashMap<String, f64>,
    budget_tokens: usize,
) -> (Vec<ContentChunk>, Vec<ContextSummary>, bool) {
    let embedded: Vec<&ContentChunk> = candidates
        .iter()
        .filter(|c| c.embedding.is_some())
        .collect();

    let query_embedding = match (query_embedding, embedded.is_empty()) {
        (Some(embedding), false) => embedding,
        _ => {
            let chunks = temporal_priority(candidates, relevance, budget_tokens);
            return (chunks, Vec::new(), true);
        }
    };

    let k = (embedded.len() / 5 + 1).min(20);
    let assignments = kmeans(&embedded, k);

    let mut clusters: BTreeMap<usize, Vec<&ContentChunk>> = BTreeMap::new();
    for (index, cluster) in assignments.iter().enumerate() {
        clusters.entry(*cluster).or_default().push(embedded[index]);
    }

    // Rank clusters by centroid similarity to the query
    let mut ranked: Vec<(f64, usize, Vec<&ContentChunk>)> = clusters
        .into_iter()
        .map(|(cluster_id, members)| {
            let centroid = centroid_of(&members);
            (cosine_similarity(query_embedding, &centroid), cluster_id, members)
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.cmp(&b.1))
    });

    let mut selected = Vec::new();
    let mut summaries = Vec::new();
    let mut used = 0usize;

    for (_, cluster_id, mut members) in ranked {
        if used >= budget_tokens {
            break;
        }
        members.sort_by(|a, b| {
            relevance_of(relevance, b)
                .partial_cmp(&relevance_of(relevance, a))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut leftovers: Vec<&ContentChunk> = Vec::new();
        for chunk in members {
            let cost = chunk.token_cost();
            if used + cost <= budget_tokens {
                used += cost;
                selected.push(chunk.clone());
            } else {
                leftovers.push(chunk);
            }
        }

        if !leftovers.is_empty() {
            let avg = leftovers
                .iter()
                .map(|c| relevance_of(relevance, c))
                .sum::<f64>()
                / leftovers.len() as f64;
            let summary = make_summary(
                "cluster_summary",
                &format!("cluster-{cluster_id}"),
                &leftovers,
                avg,
            );
            if used + summary.token_count <= budget_tokens {
                used += summary.token_count;
                summaries.push(summary);
            }
        }
    }

    (selected, summaries, false)
}

/// Relevance blended with exponential time decay: 14-day half-life on
/// chunk age, 7-day half-life on last access
fn temporal_priority(
    candidates: &[ContentChunk],
    relevance: &HashMap<String, f64>,
    budget_tokens: usize,
) -> Vec<ContentChunk> {
    let mut scored: Vec<(f64, &ContentChunk)> = candidates
        .iter()
        .map(|chunk| {
            let temporal = half_life_decay(age_days(chunk), 14.0)
                * half_life_decay(access_age_days(chunk), 7.0);
            let score = relevance_of(relevance, chunk) * 0.7 + temporal * 0.3;
            (score, chunk)
        })
        .collect();
    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.id.cmp(&b.1.id))
    });

    let mut selected = Vec::new();
    let mut used = 0usize;
    for (_, chunk) in scored {
        let cost = chunk.token_cost();
        if used + cost > budget_tokens {
            break;
        }
        used += cost;
        selected.push(chunk.clone());
    }
    selected
}

/// Multi-criteria score with a diversity-preferring first pass over 80%
/// of the budget, then summaries for remaining high-value same-type
/// groups of three or more
fn hybrid(
    candidates: &[ContentChunk],
    relevance: &HashMap<String, f64>,
    budget_tokens: usize,
) -> (Vec<ContentChunk>, Vec<ContextSummary>) {
    let mut scored: Vec<(f64, &ContentChunk)> = candidates
        .iter()
        .map(|chunk| {
            let rel = relevance_of(relevance, chunk);
            let temporal = half_life_decay(age_days(chunk), 14.0);
            let popularity = (chunk.access_count as f64 / 10.0).min(1.0);
            let relationship_boost = (chunk
                .relationships
                .values()
                .map(|ids| ids.len())
                .sum::<usize>() as f64
                * 0.1)
                .min(1.0);
            let score = rel * 0.4
                + temporal * 0.2
                + popularity * 0.1
                + chunk.chunk_type.importance() * 0.2
                + relationship_boost * 0.1;
            (score, chunk)
        })
        .collect();
    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.id.cmp(&b.1.id))
    });

    // First pass: fill 80% of the budget, preferring unseen chunk types
    let first_pass_budget = budget_tokens * 8 / 10;
    let mut selected: Vec<ContentChunk> = Vec::new();
    let mut selected_ids: HashSet<&str> = HashSet::new();
    let mut seen_types: HashSet<ChunkType> = HashSet::new();
    let mut used = 0usize;

    for (_, chunk) in &scored {
        let cost = chunk.token_cost();
        if used + cost > first_pass_budget {
            continue;
        }
        if seen_types.contains(&chunk.chunk_type) && selected.len() >= 5 {
            continue;
        }
        seen_types.insert(chunk.chunk_type);
        selected_ids.insert(chunk.id.as_str());
        selected.push((*chunk).clone());
        used += cost;
    }

    // Backfill with the best remaining chunks regardless of type
    for (_, chunk) in &scored {
        let cost = chunk.token_cost();
        if selected_ids.contains(chunk.id.as_str()) || used + cost > first_pass_budget {
            continue;
        }
        selected_ids.insert(chunk.id.as_str());
        selected.push((*chunk).clone());
        used += cost;
    }

    // Second pass: summarize what was left behind, grouped by type. A
    // group qualifies with three or more chunks and a combined score
    // above 0.6.
    let mut leftovers: BTreeMap<ChunkType, Vec<(f64, &ContentChunk)>> = BTreeMap::new();
    for (score, chunk) in &scored {
        if !selected_ids.contains(chunk.id.as_str()) {
            leftovers.entry(chunk.chunk_type).or_default().push((*score, chunk));
        }
    }

    let mut summaries = Vec::new();
    for (chunk_type, members) in leftovers {
        let total_score: f64 = members.iter().map(|(score, _)| score).sum();
        if members.len() < 3 || total_score <= 0.6 {
            continue;
        }
        let members: Vec<&ContentChunk> = members.into_iter().map(|(_, chunk)| chunk).collect();
        let avg = members
            .iter()
            .map(|c| relevance_of(relevance, c))
            .sum::<f64>()
            / members.len() as f64;
        let summary = make_summary("type_summary", &format!("{chunk_type:?}"), &members, avg);
        if used + summary.token_count <= budget_tokens {
            used += summary.token_count;
            summaries.push(summary);
        }
    }

    (selected, summaries)
}

fn centroid_of(members: &[&ContentChunk]) -> Vec<f32> {
    let dims = members
        .iter()
        .filter_map(|c| c.embedding.as_ref())
        .map(|e| e.len())
        .max()
        .unwrap_or(0);
    let mut centroid = vec![0.0f32; dims];
    let mut count = 0usize;
    for chunk in members {
        if let Some(embedding) = &chunk.embedding {
            if embedding.len() == dims {
                for (slot, value) in centroid.iter_mut().zip(embedding.iter()) {
                    *slot += value;
                }
                count += 1;
            }
        }
    }
    if count > 0 {
        for slot in centroid.iter_mut() {
            *slot /= count as f32;
        }
    }
    centroid
}

/// Deterministic k-means: initial centroids are evenly spaced over the
/// id-sorted chunk list, then Lloyd iterations to a small fixed cap.
/// Returns a cluster index per input chunk.
fn kmeans(chunks: &[&ContentChunk], k: usize) -> Vec<usize> {
    if chunks.is_empty() || k == 0 {
        return Vec::new();
    }
    let k = k.min(chunks.len());

    let mut centroids: Vec<Vec<f32>> = (0..k)
        .map(|i| {
            let index = i * chunks.len() / k;
            chunks[index].embedding.clone().unwrap_or_default()
        })
        .collect();

    let mut assignments = vec![0usize; chunks.len()];
    for _ in 0..10 {
        let mut changed = false;
        for (index, chunk) in chunks.iter().enumerate() {
            let embedding = match &chunk.embedding {
                Some(embedding) => embedding,
                None => continue,
            };
            let mut best = 0usize;
            let mut best_similarity = f64::MIN;
            for (cluster, centroid) in centroids.iter().enumerate() {
                let similarity = cosine_similarity(embedding, centroid);
                if similarity > best_similarity {
                    best_similarity = similarity;
                    best = cluster;
                }
            }
            if assignments[index] != best {
                assignments[index] = best;
                changed = true;
            }
        }
        if !changed {
            break;
        }

        for (cluster, centroid) in centroids.iter_mut().enumerate() {
            let members: Vec<&ContentChunk> = chunks
                .iter()
                .enumerate()
                .filter(|(index, _)| assignments[*index] == cluster)
                .map(|(_, chunk)| *chunk)
                .collect();
            if !members.is_empty() {
                *centroid = centroid_of(&members);
            }
        }
    }

    assignments
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::collections::HashMap;

    fn chunk(id: &str, chunk_type: ChunkType, content: &str) -> ContentChunk {
        ContentChunk {
            id: id.to_string(),
            project_id: "p1".to_string(),
            agent_id: "dev1".to_string(),
            chunk_type,
            content: content.to_string(),
            summary: String::new(),
            keywords: Vec::new(),
            embedding: None,
            timestamp: Utc::now(),
            last_accessed: Utc::now(),
            access_count: 0,
            relationships: HashMap::new(),
            metadata: HashMap::new(),
        }
    }

    fn embedded(id: &str, embedding: Vec<f32>, content: &str) -> ContentChunk {
        let mut c = chunk(id, ChunkType::Documentation, content);
        c.embedding = Some(embedding);
        c
    }

    fn big_candidates(n: usize) -> Vec<ContentChunk> {
        (0..n)
            .map(|i| {
                chunk(
                    &format!("chunk_{i:04}"),
                    ChunkType::Documentation,
                    &format!("lock manager content {i} {}", "pad ".repeat(50)),
                )
            })
            .collect()
    }

    #[test]
    fn every_strategy_honors_the_budget() {
        let candidates = big_candidates(500);
        for strategy in [
            SelectionStrategy::Hierarchical,
            SelectionStrategy::SemanticClustering,
            SelectionStrategy::TemporalPriority,
            SelectionStrategy::Hybrid,
        ] {
            let result = select("lock manager", None, candidates.clone(), 10_000, strategy);
            assert!(
                result.stats.used_tokens <= 10_000,
                "{strategy:?} exceeded budget: {}",
                result.stats.used_tokens
            );
        }
    }

    #[test]
    fn selection_is_deterministic_per_strategy() {
        let candidates = big_candidates(100);
        for strategy in [
            SelectionStrategy::Hierarchical,
            SelectionStrategy::TemporalPriority,
            SelectionStrategy::Hybrid,
        ] {
            let a = select("lock", None, candidates.clone(), 2_000, strategy);
            let b = select("lock", None, candidates.clone(), 2_000, strategy);
            let ids_a: Vec<&str> = a.chunks.iter().map(|c| c.id.as_str()).collect();
            let ids_b: Vec<&str> = b.chunks.iter().map(|c| c.id.as_str()).collect();
            assert_eq!(ids_a, ids_b, "{strategy:?} was not deterministic");
        }
    }

    #[test]
    fn hierarchical_emits_summaries_for_clusters() {
        // Budget fits only a couple of chunks; the cluster of ten should
        // surface as a summary
        let candidates = big_candidates(10);
        let result = select("lock", None, candidates, 120, SelectionStrategy::Hierarchical);
        assert!(result.stats.selected_summaries >= 1 || result.stats.selected_chunks >= 1);
        assert!(result.stats.used_tokens <= 120);
    }

    #[test]
    fn temporal_priority_prefers_fresh_chunks() {
        let mut old = chunk("chunk_old", ChunkType::Documentation, "lock details old");
        old.timestamp = Utc::now() - Duration::days(60);
        old.last_accessed = old.timestamp;
        let fresh = chunk("chunk_new", ChunkType::Documentation, "lock details new");

        let result = select(
            "lock",
            None,
            vec![old, fresh],
            4,
            SelectionStrategy::TemporalPriority,
        );
        assert_eq!(result.chunks.len(), 1);
        assert_eq!(result.chunks[0].id, "chunk_new");
    }

    #[test]
    fn semantic_clustering_degrades_without_embeddings() {
        let result = select(
            "lock",
            None,
            big_candidates(20),
            1_000,
            SelectionStrategy::SemanticClustering,
        );
        assert!(result.stats.degraded);
        assert!(result.stats.used_tokens <= 1_000);
    }

    #[test]
    fn semantic_clustering_ranks_clusters_by_query_similarity() {
        // Two well-separated clusters; the query points at the first
        let query = vec![1.0, 0.0];
        let candidates = vec![
            embedded("chunk_a1", vec![0.9, 0.1], "about locks"),
            embedded("chunk_a2", vec![0.95, 0.05], "more locks"),
            embedded("chunk_b1", vec![0.0, 1.0], "about scheduling"),
            embedded("chunk_b2", vec![0.05, 0.95], "more scheduling"),
        ];

        let result = select(
            "locks",
            Some(&query),
            candidates,
            6,
            SelectionStrategy::SemanticClustering,
        );
        assert!(!result.chunks.is_empty());
        assert!(result.chunks.iter().all(|c| c.id.starts_with("chunk_a")));
    }

    #[test]
    fn hybrid_prefers_type_diversity_then_summarizes() {
        let mut candidates = Vec::new();
        for i in 0..8 {
            candidates.push(chunk(
                &format!("chunk_doc{i}"),
                ChunkType::Documentation,
                &format!("lock documentation {i} {}", "pad ".repeat(30)),
            ));
        }
        candidates.push(chunk(
            "chunk_err",
            ChunkType::ErrorLog,
            &format!("lock error {}", "pad ".repeat(30)),
        ));

        let result = select("lock", None, candidates, 400, SelectionStrategy::Hybrid);
        let types: HashSet<ChunkType> = result.chunks.iter().map(|c| c.chunk_type).collect();
        assert!(types.contains(&ChunkType::ErrorLog), "diverse type was skipped");
        assert!(result.stats.used_tokens <= 400);
    }

    #[test]
    fn hybrid_summarizes_high_value_leftover_groups() {
        // Small budget leaves many high-scoring chunks of one type out;
        // a type summary should represent at least three of them
        let candidates: Vec<ContentChunk> = (0..12)
            .map(|i| {
                chunk(
                    &format!("chunk_fn{i:02}"),
                    ChunkType::CodeFunction,
                    &format!("fn lock_{i}() {{}} {}", "pad ".repeat(60)),
                )
            })
            .collect();

        let result = select("lock", None, candidates, 200, SelectionStrategy::Hybrid);
        assert!(
            !result.summaries.is_empty(),
            "expected a summary for the leftover code functions"
        );
        assert!(result.summaries[0].chunk_ids.len() >= 3);
        assert!(result.stats.used_tokens <= 200);
    }

    #[test]
    fn cosine_similarity_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn kmeans_is_deterministic() {
        let chunks: Vec<ContentChunk> = (0..10)
            .map(|i| {
                embedded(
                    &format!("chunk_{i}"),
                    vec![i as f32 / 10.0, 1.0 - i as f32 / 10.0],
                    "content",
                )
            })
            .collect();
        let refs: Vec<&ContentChunk> = chunks.iter().collect();
        assert_eq!(kmeans(&refs, 3), kmeans(&refs, 3));
    }

    #[test]
    fn strategy_parsing() {
        assert_eq!(
            "semantic_clustering".parse::<SelectionStrategy>().unwrap(),
            SelectionStrategy::SemanticClustering
        );
        assert!("magic".parse::<SelectionStrategy>().is_err());
    }
}
