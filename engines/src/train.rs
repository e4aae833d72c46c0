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

use common::{batched_range_iter, TrainSettings};
use datasets::{
	prepare_training_splits, Seq2SeqCollator, SoqTokenizer, TokenizedDataset, TokenizedExample,
};
use llms::{GenerationSettings, Seq2SeqGenerator, T5Options, T5LLM};
use metrics::{load_metric, Metric, MetricResult};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::Serialize;
use std::{fs, path::PathBuf, sync::Arc};
use tracing::{debug, info};

use crate::{
	decode_predictions, generate_predictions, progress_bar, CheckpointManager, Engine, EngineError,
	EngineErrorKind, EngineResult, TrainerState, TrainingOptimizer,
};

/// Losses, scores and checkpoint of one finished epoch.
#[derive(Debug, Clone, Serialize)]
pub struct EpochSummary {
	pub epoch: usize,
	pub global_step: usize,
	pub train_loss: f64,
	pub eval_loss: f64,
	pub metrics: MetricResult,
	pub checkpoint: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
	pub epochs: Vec<EpochSummary>,
	pub best_checkpoint: Option<PathBuf>,
	pub best_metric: Option<f64>,
}

impl TrainingReport {
	/// Metrics of the epoch whose checkpoint was kept as the final model.
	pub fn best_metrics(&self) -> Option<&MetricResult> {
		let best = self.best_checkpoint.as_ref()?;
		self.epochs.iter().find(|epoch| &epoch.checkpoint == best).map(|epoch| &epoch.metrics)
	}
}

/// Fine-tunes a pretrained T5 checkpoint on a train split and scores it on a test split after
/// every epoch.
#[derive(Debug, Clone)]
pub struct TrainingEngine {
	settings: TrainSettings,
}

impl TrainingEngine {
	pub fn new(settings: TrainSettings) -> Self {
		Self { settings }
	}

	pub fn settings(&self) -> &TrainSettings {
		&self.settings
	}

	/// Rejects bad sizes, paths and metric names before anything is loaded.
	pub fn validate(&self) -> EngineResult<Box<dyn Metric>> {
		let settings = &self.settings;
		if settings.train_batch_size == 0 {
			return Err(EngineError::configuration("train batch size must be greater than zero"));
		}
		if settings.max_length == 0 {
			return Err(EngineError::configuration("max length must be greater than zero"));
		}
		if settings.hyperparameters.num_train_epochs == 0 {
			return Err(EngineError::configuration("number of epochs must be greater than zero"));
		}
		let splits = [("train", &settings.train_dataset), ("test", &settings.test_dataset)];
		for (split, path) in splits {
			if !path.is_file() {
				return Err(EngineError::configuration(format!(
					"{split} dataset {} does not exist",
					path.display()
				)));
			}
		}
		Ok(load_metric(&settings.metric)?)
	}

	/// Runs the optimisation loop and returns one summary per epoch.
	pub fn train(
		&self,
		model: &T5LLM,
		tokenizer: &SoqTokenizer,
		train: &TokenizedDataset,
		test: &TokenizedDataset,
		metric: &dyn Metric,
	) -> EngineResult<TrainingReport> {
		let settings = &self.settings;
		let hyperparameters = &settings.hyperparameters;
		if train.is_empty() {
			return Err(EngineError::configuration("the training split has no examples"));
		}
		let steps_per_epoch = train.len().div_ceil(settings.train_batch_size);
		let total_steps = steps_per_epoch * hyperparameters.num_train_epochs;
		let mut optimizer =
			TrainingOptimizer::new(model.named_trainable_vars()?, hyperparameters, total_steps)?;
		let collator =
			Seq2SeqCollator::new(tokenizer.pad_token_id(), model.config().decoder_start_token_id());
		let generation = GenerationSettings::new(
			hyperparameters.generation_max_new_tokens.unwrap_or(settings.max_length),
			settings.max_length,
		);

		fs::create_dir_all(&settings.output_dir)?;
		let mut checkpoints =
			CheckpointManager::new(&settings.output_dir, hyperparameters.save_total_limit);
		let mut rng = StdRng::seed_from_u64(hyperparameters.seed);
		let mut order: Vec<usize> = (0..train.len()).collect();
		let mut global_step = 0usize;
		let mut epochs = Vec::with_capacity(hyperparameters.num_train_epochs);

		info!(
			examples = train.len(),
			epochs = hyperparameters.num_train_epochs,
			batch_size = settings.train_batch_size,
			learning_rate = hyperparameters.learning_rate,
			total_steps,
			"starting training"
		);
		for epoch in 1..=hyperparameters.num_train_epochs {
			order.shuffle(&mut rng);
			let batches = batched_range_iter(0, order.len(), settings.train_batch_size);
			let progress = progress_bar(batches.len() as u64, "Training");
			let mut loss_sum = 0.0;
			let mut steps = 0usize;
			for (start, end) in batches {
				let examples: Vec<&TokenizedExample> =
					order[start..end].iter().filter_map(|&index| train.get(index)).collect();
				let batch = collator.collate(&examples, model.device())?;
				let output = model.forward(
					&batch.input_ids,
					&batch.attention_mask,
					&batch.decoder_input_ids,
					Some((&batch.labels, &batch.label_mask)),
					true,
				)?;
				let loss = output.loss.ok_or_else(missing_loss)?;
				let grad_norm = optimizer.backward_step(&loss)?;
				let loss = loss.to_scalar::<f32>()? as f64;
				debug!(global_step, loss, grad_norm, "optimizer step");
				loss_sum += loss;
				steps += 1;
				global_step += 1;
				progress.set_message(format!("epoch {epoch} loss {loss:.4}"));
				progress.inc(1);
			}
			progress.finish_and_clear();
			let train_loss = loss_sum / steps.max(1) as f64;

			let eval_loss = self.eval_loss(model, &collator, test)?;
			let result = self.score(model, tokenizer, test, metric, &generation)?;
			let score = result.primary_score().unwrap_or(f64::NEG_INFINITY);
			info!(
				epoch,
				global_step,
				train_loss,
				eval_loss,
				metric = metric.name(),
				score,
				"finished epoch"
			);

			let state = TrainerState {
				epoch,
				global_step,
				train_loss,
				eval_loss,
				metrics: result.to_json(),
				best_metric: None,
				best_model_checkpoint: None,
			};
			let checkpoint = checkpoints.save(model, tokenizer, state, score)?;
			epochs.push(EpochSummary {
				epoch,
				global_step,
				train_loss,
				eval_loss,
				metrics: result,
				checkpoint,
			});
		}

		let best_checkpoint = checkpoints.finalize()?;
		let best_metric = checkpoints.best().map(|(_, score)| score);
		Ok(TrainingReport { epochs, best_checkpoint, best_metric })
	}

	/// Mean loss over the test split, weighted by batch size.
	fn eval_loss(
		&self,
		model: &T5LLM,
		collator: &Seq2SeqCollator,
		test: &TokenizedDataset,
	) -> EngineResult<f64> {
		let mut total = 0.0;
		for (start, end) in batched_range_iter(0, test.len(), self.settings.train_batch_size) {
			let examples: Vec<&TokenizedExample> = test.examples()[start..end].iter().collect();
			let batch = collator.collate(&examples, model.device())?;
			let output = model.forward(
				&batch.input_ids,
				&batch.attention_mask,
				&batch.decoder_input_ids,
				Some((&batch.labels, &batch.label_mask)),
				false,
			)?;
			let loss = output.loss.ok_or_else(missing_loss)?;
			total += loss.to_scalar::<f32>()? as f64 * (end - start) as f64;
		}
		Ok(if test.is_empty() { 0.0 } else { total / test.len() as f64 })
	}

	/// Generates on the test split and scores the decoded predictions against the decoded labels.
	fn score(
		&self,
		model: &dyn Seq2SeqGenerator,
		tokenizer: &SoqTokenizer,
		test: &TokenizedDataset,
		metric: &dyn Metric,
		generation: &GenerationSettings,
	) -> EngineResult<MetricResult> {
		let buffer =
			generate_predictions(model, test, self.settings.train_batch_size, generation)?;
		let predictions = decode_predictions(&buffer, tokenizer)?;
		let references = test
			.examples()
			.iter()
			.map(|example| match &example.labels {
				Some(labels) => Ok(tokenizer.decode_labels(labels)?),
				None => Ok(example.output.clone()),
			})
			.collect::<EngineResult<Vec<String>>>()?;
		Ok(metric.compute(&predictions, &references)?)
	}
}

fn missing_loss() -> EngineError {
	EngineError::new(
		EngineErrorKind::ModelError,
		Arc::new(anyhow::anyhow!("forward pass returned no loss for a labelled batch")),
	)
}

impl Engine for TrainingEngine {
	type Output = TrainingReport;

	fn run(&self) -> EngineResult<TrainingReport> {
		let metric = self.validate()?;
		let settings = &self.settings;
		let pool = rayon::ThreadPoolBuilder::new()
			.num_threads(settings.hyperparameters.dataloader_num_workers)
			.thread_name(|index| format!("soq-data-{index}"))
			.build()
			.map_err(|e| EngineError::new(EngineErrorKind::Io, Arc::new(e.into())))?;
		let tokenizer = SoqTokenizer::from_pretrained(&settings.tokenizer, None)?;
		let (train, test) = pool.install(|| {
			prepare_training_splits(
				&settings.train_dataset,
				&settings.test_dataset,
				&tokenizer,
				settings.dataset_type,
				&settings.generation_prefix,
				settings.max_length,
			)
		})?;
		let options = T5Options::new(&settings.base_model).with_revision(settings.revision.clone());
		let model = T5LLM::load_trainable(&options)?;
		self.train(&model, &tokenizer, &train, &test, metric.as_ref())
	}
}
