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

use serde::{ser::SerializeMap, Serialize, Serializer};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::{Chrf, ExactMatch, MetricsError, MetricsErrorKind, MetricsResult, SacreBleu};

/// Names accepted by [`load_metric`].
pub const METRIC_NAMES: &[&str] = &[SacreBleu::NAME, Chrf::NAME, ExactMatch::NAME];

/// Ordered key/value scores returned by a metric, serialized as a JSON object.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricResult {
	primary_key: &'static str,
	values: Vec<(String, Value)>,
}

impl MetricResult {
	pub fn new(primary_key: &'static str) -> Self {
		Self { primary_key, values: Vec::new() }
	}

	/// Appends `key`, replacing an earlier value with the same key.
	pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
		let key = key.into();
		let value = value.into();
		match self.values.iter_mut().find(|(existing, _)| *existing == key) {
			Some(entry) => entry.1 = value,
			None => self.values.push((key, value)),
		}
		self
	}

	pub fn get(&self, key: &str) -> Option<&Value> {
		self.values.iter().find(|(existing, _)| existing == key).map(|(_, value)| value)
	}

	pub fn primary_key(&self) -> &'static str {
		self.primary_key
	}

	/// The value used to rank checkpoints.
	pub fn primary_score(&self) -> Option<f64> {
		self.get(self.primary_key).and_then(Value::as_f64)
	}

	pub fn keys(&self) -> impl Iterator<Item = &str> {
		self.values.iter().map(|(key, _)| key.as_str())
	}

	pub fn to_json(&self) -> Value {
		Value::Object(self.values.iter().cloned().collect())
	}
}

impl Serialize for MetricResult {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		let mut map = serializer.serialize_map(Some(self.values.len()))?;
		for (key, value) in &self.values {
			map.serialize_entry(key, value)?;
		}
		map.end()
	}
}

/// A corpus-level score over paired predictions and references.
pub trait Metric: Send + Sync {
	fn name(&self) -> &'static str;

	fn compute(&self, predictions: &[String], references: &[String]) -> MetricsResult<MetricResult>;
}

/// Looks a metric up by name.
pub fn load_metric(name: &str) -> MetricsResult<Box<dyn Metric>> {
	debug!(metric = name, "loading metric");
	match name {
		SacreBleu::NAME => Ok(Box::new(SacreBleu::default())),
		Chrf::NAME => Ok(Box::new(Chrf::default())),
		ExactMatch::NAME => Ok(Box::new(ExactMatch)),
		other => Err(MetricsError::new(
			MetricsErrorKind::Configuration,
			Arc::new(anyhow::anyhow!(
				"unknown metric `{}`, expected one of {:?}",
				other,
				METRIC_NAMES
			)),
		)),
	}
}

/// Fails unless every prediction has exactly one reference.
pub fn check_lengths(predictions: &[String], references: &[String]) -> MetricsResult<()> {
	if predictions.len() != references.len() {
		return Err(MetricsError::new(
			MetricsErrorKind::LengthMismatch,
			Arc::new(anyhow::anyhow!(
				"got {} predictions but {} references",
				predictions.len(),
				references.len()
			)),
		));
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_load_metric_by_name() {
		for name in METRIC_NAMES {
			assert_eq!(load_metric(name).unwrap().name(), *name);
		}
		let err = load_metric("rouge").err().unwrap();
		assert_eq!(err.kind(), MetricsErrorKind::Configuration);
	}

	#[test]
	fn test_metric_result_keeps_insertion_order() {
		let result =
			MetricResult::new("score").with("score", 1.5).with("beta", 2).with("score", 3.0);
		assert_eq!(result.keys().collect::<Vec<_>>(), vec!["score", "beta"]);
		assert_eq!(result.primary_score(), Some(3.0));
		assert_eq!(serde_json::to_string(&result).unwrap(), r#"{"score":3.0,"beta":2}"#);
	}

	#[test]
	fn test_check_lengths() {
		let one = vec!["a".to_string()];
		assert!(check_lengths(&one, &one).is_ok());
		let err = check_lengths(&one, &[]).unwrap_err();
		assert_eq!(err.kind(), MetricsErrorKind::LengthMismatch);
	}
}
