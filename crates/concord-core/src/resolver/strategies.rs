//! Per-tier resolution math.
//!
//! Each function takes a round already validated and sorted by judge id, and
//! returns the resolved score together with the `Resolution` describing how
//! it was reached.

use std::collections::BTreeMap;

use crate::evidence::EvidenceQuality;
use crate::types::{BiasDirection, DiscountedJudge, JudgeScore, JudgeWeight, Resolution};

/// Arithmetic mean.
fn mean(scores: &[JudgeScore]) -> f64 {
    scores.iter().map(|s| s.score).sum::<f64>() / scores.len() as f64
}

/// Scale raw weights so they sum to 1.
fn normalize(raw: &[f64]) -> Vec<f64> {
    let total: f64 = raw.iter().sum();
    if total > 0.0 {
        raw.iter().map(|w| w / total).collect()
    } else {
        vec![1.0 / raw.len() as f64; raw.len()]
    }
}

fn weighted_mean(scores: &[JudgeScore], weights: &[f64]) -> f64 {
    scores
        .iter()
        .zip(weights)
        .map(|(s, w)| s.score * w)
        .sum()
}

/// Minor tier: simple mean.
pub(crate) fn minor(scores: &[JudgeScore]) -> (f64, Resolution) {
    (mean(scores), Resolution::Mean)
}

/// Moderate tier: mean weighted by evidence quality.
///
/// When every quality is equal the weighted mean is the simple mean; it is
/// computed as such so the two agree exactly.
pub(crate) fn moderate(
    scores: &[JudgeScore],
    qualities: &[EvidenceQuality],
    all_equal: bool,
) -> (f64, Resolution) {
    let raw: Vec<f64> = qualities.iter().map(|q| q.weight).collect();
    let normalized = normalize(&raw);

    let resolved = if all_equal {
        mean(scores)
    } else {
        weighted_mean(scores, &normalized)
    };

    let weights = scores
        .iter()
        .zip(qualities)
        .zip(&normalized)
        .map(|((s, q), w)| JudgeWeight {
            judge_id: s.judge_id.clone(),
            evidence_quality: q.weight,
            reliability: 1.0,
            weight: *w,
        })
        .collect();

    (resolved, Resolution::EvidenceWeighted { weights })
}

/// Critical tier: evidence weighting with biased judges further discounted
/// by their round-relative reliability weight.
pub(crate) fn bias_adjusted(
    scores: &[JudgeScore],
    qualities: &[EvidenceQuality],
    biased: &[(String, BiasDirection)],
    reliability: &BTreeMap<&str, f64>,
) -> (f64, Resolution) {
    let multipliers: Vec<f64> = scores
        .iter()
        .map(|s| {
            if biased.iter().any(|(id, _)| *id == s.judge_id) {
                reliability.get(s.judge_id.as_str()).copied().unwrap_or(1.0)
            } else {
                1.0
            }
        })
        .collect();

    let raw: Vec<f64> = qualities
        .iter()
        .zip(&multipliers)
        .map(|(q, m)| q.weight * m)
        .collect();
    let normalized = normalize(&raw);
    let resolved = weighted_mean(scores, &normalized);

    let weights = scores
        .iter()
        .zip(qualities)
        .zip(multipliers.iter().zip(&normalized))
        .map(|((s, q), (m, w))| JudgeWeight {
            judge_id: s.judge_id.clone(),
            evidence_quality: q.weight,
            reliability: *m,
            weight: *w,
        })
        .collect();

    let discounted = biased
        .iter()
        .map(|(judge_id, direction)| {
            let reliability_weight = reliability.get(judge_id.as_str()).copied().unwrap_or(1.0);
            DiscountedJudge {
                judge_id: judge_id.clone(),
                direction: *direction,
                reliability_weight,
                reason: format!(
                    "systematically scores {} consensus; weight scaled by reliability {:.3}",
                    direction, reliability_weight
                ),
            }
        })
        .collect();

    (
        resolved,
        Resolution::BiasAdjusted {
            weights,
            discounted,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::EvidenceAssessor;

    fn scores(values: &[(&str, f64)]) -> Vec<JudgeScore> {
        values
            .iter()
            .map(|(j, v)| JudgeScore::new(*j, "plan-1", "clarity", *v, ""))
            .collect()
    }

    fn quality(weight: f64) -> EvidenceQuality {
        EvidenceQuality {
            weight,
            ..EvidenceAssessor::default().assess("")
        }
    }

    #[test]
    fn test_moderate_weights_toward_better_evidence() {
        let round = scores(&[("a", 5.0), ("b", 7.5)]);
        let (resolved, resolution) =
            moderate(&round, &[quality(0.9), quality(0.1)], false);

        assert!((resolved - 5.25).abs() < 1e-12);
        match resolution {
            Resolution::EvidenceWeighted { weights } => {
                let total: f64 = weights.iter().map(|w| w.weight).sum();
                assert!((total - 1.0).abs() < 1e-12);
                assert!((weights[0].weight - 0.9).abs() < 1e-12);
            }
            other => panic!("unexpected resolution {:?}", other),
        }
    }

    #[test]
    fn test_moderate_equal_quality_is_mean() {
        let round = scores(&[("a", 5.0), ("b", 7.5)]);
        let (resolved, _) = moderate(&round, &[quality(0.3), quality(0.3)], true);
        assert_eq!(resolved, mean(&round));
    }

    #[test]
    fn test_bias_adjusted_discounts_flagged_judge() {
        let round = scores(&[("a", 3.0), ("b", 9.0)]);
        let biased = vec![("b".to_string(), BiasDirection::Above)];
        let mut reliability = BTreeMap::new();
        reliability.insert("a", 1.0);
        reliability.insert("b", 0.25);

        let (resolved, resolution) =
            bias_adjusted(&round, &[quality(0.5), quality(0.5)], &biased, &reliability);

        // b's weight is a quarter of a's: (3*1 + 9*0.25) / 1.25 = 4.2
        assert!((resolved - 4.2).abs() < 1e-12);
        match resolution {
            Resolution::BiasAdjusted { discounted, weights } => {
                assert_eq!(discounted.len(), 1);
                assert_eq!(discounted[0].judge_id, "b");
                assert_eq!(weights[1].reliability, 0.25);
            }
            other => panic!("unexpected resolution {:?}", other),
        }
    }
}
