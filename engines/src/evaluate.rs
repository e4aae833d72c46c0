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

use common::EvalSettings;
use datasets::{prepare_soq_dataset_from_file, SoqTokenizer, DEFAULT_SPLIT};
use llms::{GenerationSettings, Seq2SeqGenerator, T5Options, T5LLM};
use metrics::{load_metric, Metric, MetricResult};
use std::sync::Arc;
use tracing::info;

use crate::{
	decode_predictions, generate_predictions, Engine, EngineError, EngineErrorKind, EngineResult,
};

/// Scores a fine-tuned model against a soq-formatted evaluation file.
#[derive(Debug, Clone)]
pub struct EvaluationEngine {
	settings: EvalSettings,
}

impl EvaluationEngine {
	pub fn new(settings: EvalSettings) -> Self {
		Self { settings }
	}

	pub fn settings(&self) -> &EvalSettings {
		&self.settings
	}

	/// Rejects bad sizes, paths and metric names before anything is loaded.
	pub fn validate(&self) -> EngineResult<Box<dyn Metric>> {
		let settings = &self.settings;
		if settings.batch_size == 0 {
			return Err(EngineError::configuration("batch size must be greater than zero"));
		}
		if settings.max_length == 0 {
			return Err(EngineError::configuration("max length must be greater than zero"));
		}
		if !settings.model_dir.is_dir() {
			return Err(EngineError::configuration(format!(
				"model directory {} does not exist",
				settings.model_dir.display()
			)));
		}
		if !settings.evaluation_dataset.is_file() {
			return Err(EngineError::configuration(format!(
				"evaluation dataset {} does not exist",
				settings.evaluation_dataset.display()
			)));
		}
		Ok(load_metric(&settings.metric)?)
	}

	/// Tokenizes the evaluation file, generates one prediction per row and scores the decoded
	/// predictions against the cleaned reference outputs.
	pub fn evaluate(
		&self,
		model: &dyn Seq2SeqGenerator,
		tokenizer: &SoqTokenizer,
		metric: &dyn Metric,
	) -> EngineResult<MetricResult> {
		let settings = &self.settings;
		let mut splits = prepare_soq_dataset_from_file(
			settings.evaluation_dataset.as_path(),
			tokenizer,
			&settings.generation_prefix,
			settings.max_length,
		)?;
		let dataset = splits.remove(DEFAULT_SPLIT).ok_or_else(|| {
			EngineError::new(
				EngineErrorKind::Dataset,
				Arc::new(anyhow::anyhow!("evaluation split `{}` is missing", DEFAULT_SPLIT)),
			)
		})?;
		info!(examples = dataset.len(), batch_size = settings.batch_size, "evaluating");

		let generation = GenerationSettings::with_max_length(settings.max_length);
		let buffer = generate_predictions(model, &dataset, settings.batch_size, &generation)?;
		let predictions = decode_predictions(&buffer, tokenizer)?;
		let result = metric.compute(&predictions, &dataset.outputs())?;
		info!(metric = metric.name(), score = ?result.primary_score(), "evaluation finished");
		Ok(result)
	}
}

impl Engine for EvaluationEngine {
	type Output = MetricResult;

	fn run(&self) -> EngineResult<MetricResult> {
		let metric = self.validate()?;
		let tokenizer = SoqTokenizer::from_pretrained(&self.settings.tokenizer, None)?;
		let options = T5Options::new(self.settings.model_dir.to_string_lossy());
		let model = T5LLM::load(&options)?;
		self.evaluate(&model, &tokenizer, metric.as_ref())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use datasets::test_utils::{write_fixture_tokenizer, write_tsv, FIXTURE_VOCAB};
	use llms::{default_device, T5Config};
	use std::path::Path;

	fn settings(root: &Path, model_dir: &Path, metric: &str) -> EvalSettings {
		let tokenizer = write_fixture_tokenizer(root);
		let rows = [("2+2=? ", " 4"), ("3+3=? ", " 6"), ("hello", "")];
		let dataset = write_tsv(root, "eval.tsv", &rows);
		EvalSettings {
			tokenizer: tokenizer.to_string_lossy().into_owned(),
			evaluation_dataset: dataset,
			model_dir: model_dir.to_path_buf(),
			generation_prefix: "soq: ".to_string(),
			max_length: 8,
			metric: metric.to_string(),
			batch_size: 1,
		}
	}

	#[test]
	fn test_missing_model_dir_is_a_configuration_error() {
		let root = tempfile::tempdir().unwrap();
		let missing = root.path().join("missing");
		let engine = EvaluationEngine::new(settings(root.path(), &missing, "sacrebleu"));
		let err = engine.run().unwrap_err();
		assert_eq!(err.kind(), EngineErrorKind::Configuration);
	}

	#[test]
	fn test_unknown_metric_is_a_configuration_error() {
		let root = tempfile::tempdir().unwrap();
		let engine = EvaluationEngine::new(settings(root.path(), root.path(), "rouge"));
		let err = engine.run().unwrap_err();
		assert_eq!(err.kind(), EngineErrorKind::Configuration);
	}

	#[test]
	fn test_evaluates_a_saved_model() {
		let root = tempfile::tempdir().unwrap();
		let model_dir = root.path().join("model");
		T5LLM::from_config(&T5Config::tiny(FIXTURE_VOCAB.len()), default_device())
			.unwrap()
			.save(&model_dir)
			.unwrap();

		let engine = EvaluationEngine::new(settings(root.path(), &model_dir, "sacrebleu"));
		let result = engine.run().unwrap();
		let score = result.primary_score().unwrap();
		assert!((0.0..=100.0).contains(&score));
		assert!(result.get("sys_len").and_then(|len| len.as_u64()).is_some());
		assert_eq!(result.get("ref_len").and_then(|len| len.as_u64()), Some(2));
	}
}
