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

use serde::{Deserialize, Serialize};
use std::{fmt, path::PathBuf, str::FromStr};
use thiserror::Error;

pub const DEFAULT_GENERATION_PREFIX: &str = "soq: ";
pub const DEFAULT_MAX_LENGTH: usize = 2048;
pub const DEFAULT_METRIC: &str = "sacrebleu";
pub const DEFAULT_TRAIN_BATCH_SIZE: usize = 8;
pub const DEFAULT_EVAL_BATCH_SIZE: usize = 64;

/// How raw rows are turned into model text before tokenization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetType {
	/// Prefix only.
	Local,
	/// Escaped line breaks are normalized, then the prefix is applied.
	Soq,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown dataset type `{0}`, expected `local` or `soq`")]
pub struct UnknownDatasetType(pub String);

impl FromStr for DatasetType {
	type Err = UnknownDatasetType;

	fn from_str(tag: &str) -> Result<Self, Self::Err> {
		match tag {
			"local" => Ok(DatasetType::Local),
			"soq" => Ok(DatasetType::Soq),
			other => Err(UnknownDatasetType(other.to_string())),
		}
	}
}

impl fmt::Display for DatasetType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			DatasetType::Local => f.write_str("local"),
			DatasetType::Soq => f.write_str("soq"),
		}
	}
}

/// Optimizer and trainer knobs that are not exposed as individual CLI flags.
///
/// Every field has a default so a YAML override file only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrainingHyperparameters {
	#[serde(default = "TrainingHyperparameters::default_learning_rate")]
	pub learning_rate: f64,
	#[serde(default = "TrainingHyperparameters::default_weight_decay")]
	pub weight_decay: f64,
	#[serde(default = "TrainingHyperparameters::default_adam_beta1")]
	pub adam_beta1: f64,
	#[serde(default = "TrainingHyperparameters::default_adam_beta2")]
	pub adam_beta2: f64,
	#[serde(default = "TrainingHyperparameters::default_adam_epsilon")]
	pub adam_epsilon: f64,
	/// Global L2 norm gradients are clipped to before every step. Zero disables clipping.
	#[serde(default = "TrainingHyperparameters::default_max_grad_norm")]
	pub max_grad_norm: f64,
	/// Optimizer steps of linear warmup before the linear decay to zero.
	#[serde(default)]
	pub warmup_steps: usize,
	#[serde(default = "TrainingHyperparameters::default_num_train_epochs")]
	pub num_train_epochs: usize,
	/// Number of most recent checkpoints kept on disk. The best checkpoint is never removed.
	#[serde(default = "TrainingHyperparameters::default_save_total_limit")]
	pub save_total_limit: usize,
	#[serde(default = "TrainingHyperparameters::default_seed")]
	pub seed: u64,
	/// Size of the worker pool used for tokenization.
	#[serde(default = "TrainingHyperparameters::default_dataloader_num_workers")]
	pub dataloader_num_workers: usize,
	/// Caps per-epoch evaluation generation. Falls back to the max length when unset.
	#[serde(default)]
	pub generation_max_new_tokens: Option<usize>,
}

impl TrainingHyperparameters {
	fn default_learning_rate() -> f64 {
		4e-5
	}

	fn default_weight_decay() -> f64 {
		0.01
	}

	fn default_adam_beta1() -> f64 {
		0.9
	}

	fn default_adam_beta2() -> f64 {
		0.999
	}

	fn default_adam_epsilon() -> f64 {
		1e-8
	}

	fn default_max_grad_norm() -> f64 {
		1.0
	}

	fn default_num_train_epochs() -> usize {
		10
	}

	fn default_save_total_limit() -> usize {
		3
	}

	fn default_seed() -> u64 {
		42
	}

	fn default_dataloader_num_workers() -> usize {
		8
	}
}

impl Default for TrainingHyperparameters {
	fn default() -> Self {
		Self {
			learning_rate: Self::default_learning_rate(),
			weight_decay: Self::default_weight_decay(),
			adam_beta1: Self::default_adam_beta1(),
			adam_beta2: Self::default_adam_beta2(),
			adam_epsilon: Self::default_adam_epsilon(),
			max_grad_norm: Self::default_max_grad_norm(),
			warmup_steps: 0,
			num_train_epochs: Self::default_num_train_epochs(),
			save_total_limit: Self::default_save_total_limit(),
			seed: Self::default_seed(),
			dataloader_num_workers: Self::default_dataloader_num_workers(),
			generation_max_new_tokens: None,
		}
	}
}

/// Immutable settings for a fine-tuning run, parsed once from the command line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainSettings {
	pub tokenizer: String,
	pub dataset_type: DatasetType,
	pub train_dataset: PathBuf,
	pub test_dataset: PathBuf,
	pub base_model: String,
	pub revision: Option<String>,
	pub output_dir: PathBuf,
	pub metric: String,
	pub train_batch_size: usize,
	pub max_length: usize,
	pub generation_prefix: String,
	pub hyperparameters: TrainingHyperparameters,
}

/// Immutable settings for an evaluation run, parsed once from the command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalSettings {
	pub tokenizer: String,
	pub evaluation_dataset: PathBuf,
	pub model_dir: PathBuf,
	pub generation_prefix: String,
	pub max_length: usize,
	pub metric: String,
	pub batch_size: usize,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_dataset_type_from_str() {
		assert_eq!("local".parse::<DatasetType>(), Ok(DatasetType::Local));
		assert_eq!("soq".parse::<DatasetType>(), Ok(DatasetType::Soq));
		assert_eq!(
			"csv".parse::<DatasetType>(),
			Err(UnknownDatasetType("csv".to_string()))
		);
	}

	#[test]
	fn test_hyperparameters_partial_yaml() {
		let yaml = "learning_rate: 0.0003\nnum_train_epochs: 2\n";
		let parsed: TrainingHyperparameters = serde_yaml::from_str(yaml).unwrap();
		assert_eq!(parsed.learning_rate, 3e-4);
		assert_eq!(parsed.num_train_epochs, 2);
		assert_eq!(parsed.save_total_limit, 3);
		assert_eq!(parsed.seed, 42);
		assert_eq!(parsed.max_grad_norm, 1.0);
		assert_eq!(parsed.warmup_steps, 0);
		assert_eq!(parsed.generation_max_new_tokens, None);
	}

	#[test]
	fn test_hyperparameters_reject_unknown_keys() {
		let yaml = "learning_rat: 0.1\n";
		assert!(serde_yaml::from_str::<TrainingHyperparameters>(yaml).is_err());
	}
}
