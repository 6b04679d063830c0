use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::candidate::DocumentGroup;
use crate::grouping::ExtractionMethod;
use crate::metrics::Metrics;

/// Usable word count: words discounted by the share that look misread.
pub fn quality_score(metrics: &Metrics) -> f64 {
    metrics.word_count as f64 * (1.0 - metrics.ocr_error_rate)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub document_key: String,
    pub quality_scores: BTreeMap<ExtractionMethod, f64>,
    pub winning_method: ExtractionMethod,
    pub winning_candidate_name: String,
}

/// Picks the highest-scoring method. Equal scores go to the method with the
/// higher priority, so the result does not depend on iteration order.
pub fn elect_winner<I>(scores: I) -> Option<ExtractionMethod>
where
    I: IntoIterator<Item = (ExtractionMethod, f64)>,
{
    let mut best: Option<(ExtractionMethod, f64)> = None;
    for (method, score) in scores {
        let replaces = match best {
            None => true,
            Some((best_method, best_score)) => match score.total_cmp(&best_score) {
                Ordering::Greater => true,
                Ordering::Equal => method < best_method,
                Ordering::Less => false,
            },
        };
        if replaces {
            best = Some((method, score));
        }
    }
    best.map(|(method, _)| method)
}

pub fn arbitrate(group: &DocumentGroup) -> Option<Decision> {
    let quality_scores = group
        .candidates()
        .iter()
        .map(|(method, candidate)| (*method, quality_score(candidate.metrics())))
        .collect::<BTreeMap<ExtractionMethod, f64>>();

    let winning_method = elect_winner(quality_scores.iter().map(|(method, score)| (*method, *score)))?;
    let winning_candidate_name = group.candidates().get(&winning_method)?.file_name().to_string();

    Some(Decision {
        document_key: group.document_key().to_string(),
        quality_scores,
        winning_method,
        winning_candidate_name,
    })
}

/// Everything persisted and reported for one arbitrated group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupEvaluation {
    pub decision: Decision,
    pub metrics: BTreeMap<ExtractionMethod, Metrics>,
    pub source_hash: String,
    pub unavailable: Vec<ExtractionMethod>,
}

impl GroupEvaluation {
    pub fn from_group(
        group: &DocumentGroup,
        source_hash: String,
        unavailable: Vec<ExtractionMethod>,
    ) -> Option<Self> {
        let decision = arbitrate(group)?;
        let metrics = group
            .candidates()
            .iter()
            .map(|(method, candidate)| (*method, candidate.metrics().clone()))
            .collect();

        Some(Self {
            decision,
            metrics,
            source_hash,
            unavailable,
        })
    }

    pub fn document_key(&self) -> &str {
        &self.decision.document_key
    }
}
