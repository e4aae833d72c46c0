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

use serde_json::json;
use std::collections::HashMap;

use crate::{check_lengths, tokenize_13a, Metric, MetricResult, MetricsResult};

const MAX_NGRAM_ORDER: usize = 4;

/// Stand-in for `log(0)` so a zero precision drives the score to zero.
fn safe_log(value: f64) -> f64 {
	if value == 0.0 {
		-9_999_999_999.0
	} else {
		value.ln()
	}
}

fn ngram_counts(tokens: &[&str], order: usize) -> HashMap<Vec<String>, usize> {
	let mut counts = HashMap::new();
	for window in tokens.windows(order) {
		let ngram = window.iter().map(|token| token.to_string()).collect();
		*counts.entry(ngram).or_insert(0) += 1;
	}
	counts
}

/// Sufficient statistics of corpus BLEU.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BleuStatistics {
	pub counts: [usize; MAX_NGRAM_ORDER],
	pub totals: [usize; MAX_NGRAM_ORDER],
	pub sys_len: usize,
	pub ref_len: usize,
}

impl BleuStatistics {
	fn add_segment(&mut self, hypothesis: &str, reference: &str) {
		let hypothesis = tokenize_13a(hypothesis.trim_end());
		let reference = tokenize_13a(reference.trim_end());
		let hyp_tokens: Vec<&str> = hypothesis.split_whitespace().collect();
		let ref_tokens: Vec<&str> = reference.split_whitespace().collect();
		self.sys_len += hyp_tokens.len();
		self.ref_len += ref_tokens.len();
		for order in 1..=MAX_NGRAM_ORDER {
			let hyp_ngrams = ngram_counts(&hyp_tokens, order);
			let ref_ngrams = ngram_counts(&ref_tokens, order);
			for (ngram, count) in &hyp_ngrams {
				let matched = ref_ngrams.get(ngram).copied().unwrap_or(0);
				self.counts[order - 1] += (*count).min(matched);
			}
			self.totals[order - 1] += hyp_tokens.len().saturating_sub(order - 1);
		}
	}

	/// `exp`-smoothed precisions in percent. Orders past the first empty one stay zero.
	pub fn precisions(&self) -> [f64; MAX_NGRAM_ORDER] {
		let mut precisions = [0.0; MAX_NGRAM_ORDER];
		let mut smooth = 1.0;
		for order in 0..MAX_NGRAM_ORDER {
			if self.totals[order] == 0 {
				break;
			}
			precisions[order] = if self.counts[order] == 0 {
				smooth *= 2.0;
				100.0 / (smooth * self.totals[order] as f64)
			} else {
				100.0 * self.counts[order] as f64 / self.totals[order] as f64
			};
		}
		precisions
	}

	pub fn brevity_penalty(&self) -> f64 {
		if self.sys_len >= self.ref_len {
			1.0
		} else if self.sys_len == 0 {
			0.0
		} else {
			(1.0 - self.ref_len as f64 / self.sys_len as f64).exp()
		}
	}

	pub fn score(&self) -> f64 {
		let log_sum: f64 = self.precisions().iter().map(|&precision| safe_log(precision)).sum();
		self.brevity_penalty() * (log_sum / MAX_NGRAM_ORDER as f64).exp()
	}
}

/// Corpus BLEU with 13a tokenization and exponential smoothing.
#[derive(Debug, Clone, Default)]
pub struct SacreBleu;

impl SacreBleu {
	pub const NAME: &'static str = "sacrebleu";

	pub fn statistics(predictions: &[String], references: &[String]) -> BleuStatistics {
		let mut statistics = BleuStatistics::default();
		for (prediction, reference) in predictions.iter().zip(references) {
			statistics.add_segment(prediction, reference);
		}
		statistics
	}
}

impl Metric for SacreBleu {
	fn name(&self) -> &'static str {
		Self::NAME
	}

	fn compute(
		&self,
		predictions: &[String],
		references: &[String],
	) -> MetricsResult<MetricResult> {
		check_lengths(predictions, references)?;
		let statistics = Self::statistics(predictions, references);
		Ok(MetricResult::new("score")
			.with("score", statistics.score())
			.with("counts", json!(statistics.counts))
			.with("totals", json!(statistics.totals))
			.with("precisions", json!(statistics.precisions()))
			.with("bp", statistics.brevity_penalty())
			.with("sys_len", statistics.sys_len)
			.with("ref_len", statistics.ref_len))
	}
}
