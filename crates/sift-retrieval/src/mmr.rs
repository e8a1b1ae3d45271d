//! Budget-bounded diversity-aware selection (Maximal Marginal Relevance)
//! with a guaranteed critical-set floor.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use sift_core::ChunkId;

/// How pairwise similarity between two candidates is computed.
#[derive(Debug, Clone, Copy)]
pub enum SimilarityMetric {
    /// Cosine similarity over `MmrCandidate::embedding`.
    Cosine,
    /// Jaccard similarity over `MmrCandidate::tokens`.
    Jaccard,
    /// Weighted average of cosine and Jaccard, `weight` is cosine's share.
    Hybrid { weight: f64 },
}

/// One item competing for a slot in the selected context package.
#[derive(Debug, Clone)]
pub struct MmrCandidate {
    pub chunk_id: ChunkId,
    /// Relevance score: cosine similarity × hop decay × recency weight,
    /// already combined by the caller before reaching the selector.
    pub relevance: f64,
    /// Estimated token cost of including this candidate's content.
    pub token_cost: usize,
    /// L2-normalized embedding, required for `SimilarityMetric::Cosine`/`Hybrid`.
    pub embedding: Option<Vec<f32>>,
    /// Token multiset, required for `SimilarityMetric::Jaccard`/`Hybrid`.
    pub tokens: Option<HashSet<String>>,
    /// Whether this candidate's file_path or symbol name was explicitly
    /// referenced in the query (the extracted critical set).
    pub is_critical: bool,
}

/// Tunable parameters for one selection run.
#[derive(Debug, Clone)]
pub struct MmrConfig {
    /// Relevance-vs-diversity tradeoff in `[0, 1]`; 1.0 ignores diversity.
    pub lambda: f64,
    /// Total token budget `B`.
    pub token_budget: usize,
    /// Minimum fraction of the critical set that must be included when
    /// the budget allows it (default 0.95).
    pub critical_coverage_min: f64,
    /// Fraction of `token_budget` reserved as headroom; an item is only
    /// admitted if `token_cost <= remaining - cushion * token_budget`.
    pub cushion: f64,
    pub similarity_metric: SimilarityMetric,
}

impl Default for MmrConfig {
    fn default() -> Self {
        Self {
            lambda: 0.6,
            token_budget: 8000,
            critical_coverage_min: 0.95,
            cushion: 0.20,
            similarity_metric: SimilarityMetric::Cosine,
        }
    }
}

/// Metrics reported alongside a selection, per the component contract.
#[derive(Debug, Clone)]
pub struct MmrMetrics {
    pub critical_coverage: f64,
    /// `1 - mean pairwise similarity` of the final selection.
    pub diversity_score: f64,
    pub budget_utilization: f64,
    pub selection_time: Duration,
}

#[derive(Debug, Clone)]
pub struct MmrSelection {
    /// Chunk ids in selection order (critical-inclusion order, then MMR order).
    pub selected: Vec<ChunkId>,
    pub metrics: MmrMetrics,
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    dot as f64
}

fn jaccard_similarity(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

fn similarity(metric: SimilarityMetric, a: &MmrCandidate, b: &MmrCandidate) -> f64 {
    match metric {
        SimilarityMetric::Cosine => match (&a.embedding, &b.embedding) {
            (Some(ea), Some(eb)) => cosine_similarity(ea, eb),
            _ => 0.0,
        },
        SimilarityMetric::Jaccard => match (&a.tokens, &b.tokens) {
            (Some(ta), Some(tb)) => jaccard_similarity(ta, tb),
            _ => 0.0,
        },
        SimilarityMetric::Hybrid { weight } => {
            let cos = match (&a.embedding, &b.embedding) {
                (Some(ea), Some(eb)) => cosine_similarity(ea, eb),
                _ => 0.0,
            };
            let jac = match (&a.tokens, &b.tokens) {
                (Some(ta), Some(tb)) => jaccard_similarity(ta, tb),
                _ => 0.0,
            };
            weight * cos + (1.0 - weight) * jac
        }
    }
}

/// Select a diversity-aware, budget-bounded subset of `candidates`.
///
/// Candidates are consumed by reference; the caller retains ownership of
/// chunk content. Ties in relevance are broken by lower `chunk_id` for
/// determinism across runs with identical input.
pub fn select(candidates: &[MmrCandidate], config: &MmrConfig) -> MmrSelection {
    let start = Instant::now();

    let total_cost: usize = candidates.iter().map(|c| c.token_cost).sum();
    let effective_budget = (config.token_budget as f64 * (1.0 - config.cushion)) as usize;

    if candidates.is_empty() {
        return MmrSelection {
            selected: Vec::new(),
            metrics: MmrMetrics {
                critical_coverage: 1.0,
                diversity_score: 1.0,
                budget_utilization: 0.0,
                selection_time: Duration::ZERO,
            },
        };
    }

    // Fallback: everything fits comfortably inside budget, skip the MMR loop.
    if total_cost <= effective_budget {
        let mut ordered: Vec<&MmrCandidate> = candidates.iter().collect();
        ordered.sort_by(|a, b| {
            b.relevance
                .partial_cmp(&a.relevance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        let selected: Vec<ChunkId> = ordered.iter().map(|c| c.chunk_id).collect();
        return MmrSelection {
            selected,
            metrics: MmrMetrics {
                // Everything fits, so every critical item is included by construction.
                critical_coverage: 1.0,
                diversity_score: diversity_of(&ordered, config.similarity_metric),
                budget_utilization: total_cost as f64 / config.token_budget.max(1) as f64,
                selection_time: Duration::ZERO,
            },
        };
    }

    let mut remaining = config.token_budget as f64;
    let cushion_reserve = config.cushion * config.token_budget as f64;

    let mut selected_idx: Vec<usize> = Vec::new();
    let mut selected_ids: HashSet<usize> = HashSet::new();

    // Phase 1: critical inclusion, descending relevance, greedy.
    let mut critical_order: Vec<usize> = candidates
        .iter()
        .enumerate()
        .filter(|(_, c)| c.is_critical)
        .map(|(i, _)| i)
        .collect();
    critical_order.sort_by(|&a, &b| {
        candidates[b]
            .relevance
            .partial_cmp(&candidates[a].relevance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| candidates[a].chunk_id.cmp(&candidates[b].chunk_id))
    });

    let critical_total = critical_order.len();
    let critical_target = (config.critical_coverage_min * critical_total as f64).ceil() as usize;

    for &idx in &critical_order {
        if selected_idx.len() >= critical_target {
            break;
        }
        let cost = candidates[idx].token_cost as f64;
        if cost <= remaining - cushion_reserve {
            remaining -= cost;
            selected_idx.push(idx);
            selected_ids.insert(idx);
            if selected_ids.len() >= critical_target {
                break;
            }
        }
    }
    // Phase 2: MMR loop over everything not yet selected.
    loop {
        let mut best: Option<(usize, f64)> = None;
        for (i, cand) in candidates.iter().enumerate() {
            if selected_ids.contains(&i) {
                continue;
            }
            let cost = cand.token_cost as f64;
            if cost > remaining - cushion_reserve {
                continue;
            }
            let max_sim = selected_idx
                .iter()
                .map(|&j| similarity(config.similarity_metric, cand, &candidates[j]))
                .fold(0.0_f64, f64::max);
            let score = config.lambda * cand.relevance - (1.0 - config.lambda) * max_sim;

            let better = match best {
                None => true,
                Some((best_i, best_score)) => {
                    if score != best_score {
                        score > best_score
                    } else if cand.relevance != candidates[best_i].relevance {
                        cand.relevance > candidates[best_i].relevance
                    } else {
                        cand.chunk_id < candidates[best_i].chunk_id
                    }
                }
            };
            if better {
                best = Some((i, score));
            }
        }

        match best {
            Some((idx, _)) => {
                remaining -= candidates[idx].token_cost as f64;
                selected_idx.push(idx);
                selected_ids.insert(idx);
            }
            None => break,
        }
    }

    let selected_refs: Vec<&MmrCandidate> = selected_idx.iter().map(|&i| &candidates[i]).collect();
    let selected: Vec<ChunkId> = selected_refs.iter().map(|c| c.chunk_id).collect();

    let critical_selected = selected_idx
        .iter()
        .filter(|&&i| candidates[i].is_critical)
        .count();
    let critical_coverage = if critical_total == 0 {
        1.0
    } else {
        critical_selected as f64 / critical_total as f64
    };

    let consumed: usize = selected_idx.iter().map(|&i| candidates[i].token_cost).sum();

    MmrSelection {
        selected,
        metrics: MmrMetrics {
            critical_coverage,
            diversity_score: diversity_of(&selected_refs, config.similarity_metric),
            budget_utilization: consumed as f64 / config.token_budget.max(1) as f64,
            selection_time: start.elapsed(),
        },
    }
}

fn diversity_of(selection: &[&MmrCandidate], metric: SimilarityMetric) -> f64 {
    if selection.len() < 2 {
        return 1.0;
    }
    let mut total = 0.0;
    let mut pairs = 0usize;
    for i in 0..selection.len() {
        for j in (i + 1)..selection.len() {
            total += similarity(metric, selection[i], selection[j]);
            pairs += 1;
        }
    }
    if pairs == 0 {
        1.0
    } else {
        1.0 - (total / pairs as f64)
    }
}
