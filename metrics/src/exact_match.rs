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

use crate::{check_lengths, Metric, MetricResult, MetricsResult};

/// Fraction of predictions identical to their reference.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactMatch;

impl ExactMatch {
	pub const NAME: &'static str = "exact_match";
}

impl Metric for ExactMatch {
	fn name(&self) -> &'static str {
		Self::NAME
	}

	fn compute(
		&self,
		predictions: &[String],
		references: &[String],
	) -> MetricsResult<MetricResult> {
		check_lengths(predictions, references)?;
		let matches = predictions
			.iter()
			.zip(references)
			.filter(|(prediction, reference)| prediction == reference)
			.count();
		// An empty corpus scores zero.
		let score =
			if predictions.is_empty() { 0.0 } else { matches as f64 / predictions.len() as f64 };
		Ok(MetricResult::new(Self::NAME).with(Self::NAME, score))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn strings(values: &[&str]) -> Vec<String> {
		values.iter().map(|value| value.to_string()).collect()
	}

	#[test]
	fn test_exact_match_fraction() {
		let result = ExactMatch
			.compute(&strings(&["4", "6", "7", "x"]), &strings(&["4", "6", "8", "X"]))
			.unwrap();
		assert_eq!(result.primary_score(), Some(0.5));
		assert_eq!(result.keys().collect::<Vec<_>>(), vec!["exact_match"]);
	}

	#[test]
	fn test_exact_match_empty_and_mismatched() {
		assert_eq!(ExactMatch.compute(&[], &[]).unwrap().primary_score(), Some(0.0));
		assert!(ExactMatch.compute(&strings(&["a"]), &strings(&["a", "b"])).is_err());
	}
}
