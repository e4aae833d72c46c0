// Copyright (C) 2023 QuerentAI LLC.
// This file is part of Querent.

// The Licensed Work is licensed under the Business Source License 1.1 (BSL 1.1).
// You may use this file in compliance with the BSL 1.1, subject to the following restrictions:
// 1. You may not use the Licensed Work for AI-related services, database services,
//    or any service or product offering that provides database, big data, or analytics
//    services to third parties unless explicitly authorized by QuerentAI LLC.
// 2. For more details, see the LICENSE file or visit https://mariadb.com/bsl11/.

// For inquiries about alternative licensing arrangements, please contact contact@querent.xyz.

// The Licensed Work is provided "AS IS", WITHOUT WARRANTY OF ANY KIND, express or implied,
// including but not limited to the warranties of merchantability, fitness for a particular purpose,
// and non-infringement. See the Business Source License for more details.

// This software includes code developed by QuerentAI LLC (https://querent.ai).

use std::collections::HashMap;

use crate::{check_lengths, Metric, MetricResult, MetricsResult};

/// Character n-gram F-score (chrF) over a corpus.
#[derive(Debug, Clone)]
pub struct Chrf {
	pub char_order: usize,
	pub word_order: usize,
	pub beta: f64,
}

impl Default for Chrf {
	fn default() -> Self {
		Self { char_order: 6, word_order: 0, beta: 2.0 }
	}
}

/// Hypothesis, reference and matched n-gram totals for one order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NgramStatistics {
	pub hypothesis: usize,
	pub reference: usize,
	pub matched: usize,
}

fn char_ngrams(chars: &[char], order: usize) -> HashMap<&[char], usize> {
	let mut counts = HashMap::new();
	for window in chars.windows(order) {
		*counts.entry(window).or_insert(0) += 1;
	}
	counts
}

impl Chrf {
	pub const NAME: &'static str = "chrf";

	/// Per-order statistics summed over the corpus. Whitespace is ignored.
	pub fn statistics(
		&self,
		predictions: &[String],
		references: &[String],
	) -> Vec<NgramStatistics> {
		let mut statistics = vec![NgramStatistics::default(); self.char_order];
		for (prediction, reference) in predictions.iter().zip(references) {
			let hypothesis: Vec<char> = prediction.chars().filter(|c| !c.is_whitespace()).collect();
			let reference: Vec<char> = reference.chars().filter(|c| !c.is_whitespace()).collect();
			for (index, stats) in statistics.iter_mut().enumerate() {
				let hyp_ngrams = char_ngrams(&hypothesis, index + 1);
				let ref_ngrams = char_ngrams(&reference, index + 1);
				stats.hypothesis += hyp_ngrams.values().sum::<usize>();
				stats.reference += ref_ngrams.values().sum::<usize>();
				stats.matched += hyp_ngrams
					.iter()
					.map(|(ngram, count)| (*count).min(ref_ngrams.get(ngram).copied().unwrap_or(0)))
					.sum::<usize>();
			}
		}
		statistics
	}

	/// F-beta of precision and recall averaged over the orders both sides have n-grams for.
	pub fn f_score(&self, statistics: &[NgramStatistics]) -> f64 {
		let factor = self.beta * self.beta;
		let mut precision = 0.0;
		let mut recall = 0.0;
		let mut effective_order = 0usize;
		for stats in statistics {
			if stats.hypothesis > 0 && stats.reference > 0 {
				precision += stats.matched as f64 / stats.hypothesis as f64;
				recall += stats.matched as f64 / stats.reference as f64;
				effective_order += 1;
			}
		}
		if effective_order == 0 {
			return 0.0;
		}
		precision /= effective_order as f64;
		recall /= effective_order as f64;
		if precision + recall == 0.0 {
			return 0.0;
		}
		100.0 * (1.0 + factor) * precision * recall / (factor * precision + recall)
	}
}

impl Metric for Chrf {
	fn name(&self) -> &'static str {
		Self::NAME
	}

	fn compute(
		&self,
		predictions: &[String],
		references: &[String],
	) -> MetricsResult<MetricResult> {
		check_lengths(predictions, references)?;
		let score = self.f_score(&self.statistics(predictions, references));
		Ok(MetricResult::new("score")
			.with("score", score)
			.with("char_order", self.char_order)
			.with("word_order", self.word_order)
			.with("beta", self.beta))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn chrf(prediction: &str, reference: &str) -> f64 {
		Chrf::default()
			.compute(&[prediction.to_string()], &[reference.to_string()])
			.unwrap()
			.primary_score()
			.unwrap()
	}

	#[test]
	fn test_identical_and_disjoint() {
		assert!((chrf("select id from posts", "select id from posts") - 100.0).abs() < 1e-9);
		assert_eq!(chrf("abc", "xyz"), 0.0);
		assert_eq!(chrf("", ""), 0.0);
	}

	#[test]
	fn test_whitespace_is_ignored() {
		assert!((chrf("a b c", "abc") - 100.0).abs() < 1e-9);
	}

	#[test]
	fn test_partial_match_reference_value() {
		assert!((chrf("ab", "abc") - 63.6364).abs() < 1e-3);
	}

	#[test]
	fn test_corpus_statistics_are_summed() {
		let metric = Chrf::default();
		let statistics = metric.statistics(
			&["ab".to_string(), "c".to_string()],
			&["ab".to_string(), "cd".to_string()],
		);
		assert_eq!(statistics[0], NgramStatistics { hypothesis: 3, reference: 4, matched: 3 });
		assert_eq!(statistics[1], NgramStatistics { hypothesis: 1, reference: 2, matched: 1 });
		assert_eq!(statistics[2], NgramStatistics::default());
	}

	#[test]
	fn test_result_keys() {
		let result = Chrf::default().compute(&["a".to_string()], &["a".to_string()]).unwrap();
		assert_eq!(
			result.keys().collect::<Vec<_>>(),
			vec!["score", "char_order", "word_order", "beta"]
		);
	}
}
