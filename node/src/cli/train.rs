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

use clap::{value_parser, Arg, ArgMatches, Command};
use common::{
	DatasetType, TrainSettings, TrainingHyperparameters, DEFAULT_GENERATION_PREFIX,
	DEFAULT_MAX_LENGTH, DEFAULT_METRIC, DEFAULT_TRAIN_BATCH_SIZE,
};
use engines::{Engine, TrainingEngine};
use std::path::PathBuf;
use tracing::debug;

use crate::cli::load_hyperparameters;

pub fn build_train_command() -> Command {
	Command::new("train")
		.about("Fine-tunes a T5 model on a soq dataset.")
		.long_about(
			"Fine-tunes a pretrained T5 checkpoint, scores it on the test split after every \
			 epoch and copies the best checkpoint into the model directory.",
		)
		.arg(
			Arg::new("use-tokenizer")
				.long("use-tokenizer")
				.help("Tokenizer directory, tokenizer.json file or hub repository id")
				.required(true),
		)
		.arg(
			Arg::new("dataset-type")
				.long("dataset-type")
				.help("How rows are turned into model text")
				.value_parser(["local", "soq"])
				.required(true),
		)
		.arg(
			Arg::new("use-train-dataset")
				.long("use-train-dataset")
				.help("Training TSV file")
				.value_parser(value_parser!(PathBuf))
				.required(true),
		)
		.arg(
			Arg::new("use-test-dataset")
				.long("use-test-dataset")
				.help("Test TSV file scored after every epoch")
				.value_parser(value_parser!(PathBuf))
				.required(true),
		)
		.arg(
			Arg::new("use-model")
				.long("use-model")
				.help("Base model directory or hub repository id")
				.required(true),
		)
		.arg(
			Arg::new("model-dir")
				.long("model-dir")
				.help("Output directory for checkpoints and the final model")
				.value_parser(value_parser!(PathBuf))
				.required(true),
		)
		.arg(
			Arg::new("metric")
				.long("metric")
				.help("Metric used to select the best checkpoint")
				.default_value(DEFAULT_METRIC),
		)
		.arg(
			Arg::new("train-batch-size")
				.long("train-batch-size")
				.value_parser(value_parser!(usize))
				.default_value(DEFAULT_TRAIN_BATCH_SIZE.to_string()),
		)
		.arg(
			Arg::new("max-length")
				.long("max-length")
				.help("Token length of encoder inputs and decoder targets")
				.value_parser(value_parser!(usize))
				.default_value(DEFAULT_MAX_LENGTH.to_string()),
		)
		.arg(
			Arg::new("use-generation-prefix")
				.long("use-generation-prefix")
				.help("Text prepended to every input")
				.default_value(DEFAULT_GENERATION_PREFIX),
		)
		.arg(
			Arg::new("config")
				.long("config")
				.help("YAML file overriding training hyperparameters")
				.value_parser(value_parser!(PathBuf)),
		)
		.arg(
			Arg::new("revision")
				.long("revision")
				.help("Hub revision of the base model"),
		)
}

#[derive(Debug, PartialEq)]
pub struct TrainArgs {
	pub settings: TrainSettings,
}

impl TrainArgs {
	pub fn parse_cli_args(mut matches: ArgMatches) -> anyhow::Result<Self> {
		let dataset_type: DatasetType = required::<String>(&mut matches, "dataset-type")?.parse()?;
		let hyperparameters = match matches.remove_one::<PathBuf>("config") {
			Some(path) => load_hyperparameters(&path)?,
			None => TrainingHyperparameters::default(),
		};
		let settings = TrainSettings {
			tokenizer: required(&mut matches, "use-tokenizer")?,
			dataset_type,
			train_dataset: required(&mut matches, "use-train-dataset")?,
			test_dataset: required(&mut matches, "use-test-dataset")?,
			base_model: required(&mut matches, "use-model")?,
			revision: matches.remove_one::<String>("revision"),
			output_dir: required(&mut matches, "model-dir")?,
			metric: required(&mut matches, "metric")?,
			train_batch_size: required(&mut matches, "train-batch-size")?,
			max_length: required(&mut matches, "max-length")?,
			generation_prefix: required(&mut matches, "use-generation-prefix")?,
			hyperparameters,
		};
		Ok(TrainArgs { settings })
	}

	pub fn execute(self) -> anyhow::Result<()> {
		debug!(args = ?self, "run-soq-train");
		let report = TrainingEngine::new(self.settings).run()?;
		let metrics = report
			.best_metrics()
			.ok_or_else(|| anyhow::anyhow!("training finished without a best checkpoint"))?;
		println!("{}", serde_json::to_string_pretty(metrics)?);
		Ok(())
	}
}

/// Removes a value clap guarantees through `required` or `default_value`.
pub(crate) fn required<T>(matches: &mut ArgMatches, id: &str) -> anyhow::Result<T>
where
	T: Clone + Send + Sync + 'static,
{
	matches
		.remove_one::<T>(id)
		.ok_or_else(|| anyhow::anyhow!("missing value for `--{id}`"))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::cli::{build_cli, CliCommand};

	const REQUIRED: &[&str] = &[
		"soq",
		"train",
		"--use-tokenizer",
		"t5-small",
		"--dataset-type",
		"soq",
		"--use-train-dataset",
		"train.tsv",
		"--use-test-dataset",
		"test.tsv",
		"--use-model",
		"t5-small",
		"--model-dir",
		"out",
	];

	fn parse(extra: &[&str]) -> anyhow::Result<TrainSettings> {
		let args: Vec<&str> = REQUIRED.iter().chain(extra).copied().collect();
		let matches = build_cli().try_get_matches_from(args)?;
		match CliCommand::parse_cli_args(matches)? {
			CliCommand::Train(train) => Ok(train.settings),
			other => anyhow::bail!("unexpected command {other:?}"),
		}
	}

	#[test]
	fn test_train_defaults() {
		let settings = parse(&[]).unwrap();
		assert_eq!(settings.dataset_type, DatasetType::Soq);
		assert_eq!(settings.train_dataset, PathBuf::from("train.tsv"));
		assert_eq!(settings.output_dir, PathBuf::from("out"));
		assert_eq!(settings.metric, "sacrebleu");
		assert_eq!(settings.train_batch_size, 8);
		assert_eq!(settings.max_length, 2048);
		assert_eq!(settings.generation_prefix, "soq: ");
		assert_eq!(settings.revision, None);
		assert_eq!(settings.hyperparameters, TrainingHyperparameters::default());
	}

	#[test]
	fn test_train_overrides_and_yaml_config() {
		let dir = tempfile::tempdir().unwrap();
		let config = dir.path().join("hp.yaml");
		std::fs::write(&config, "learning_rate: 0.001\nnum_train_epochs: 1\n").unwrap();
		let config = config.to_string_lossy().into_owned();
		let settings = parse(&[
			"--metric",
			"chrf",
			"--train-batch-size",
			"4",
			"--max-length",
			"128",
			"--use-generation-prefix",
			"sql: ",
			"--revision",
			"main",
			"--config",
			&config,
		])
		.unwrap();
		assert_eq!(settings.metric, "chrf");
		assert_eq!(settings.train_batch_size, 4);
		assert_eq!(settings.max_length, 128);
		assert_eq!(settings.generation_prefix, "sql: ");
		assert_eq!(settings.revision.as_deref(), Some("main"));
		assert_eq!(settings.hyperparameters.learning_rate, 0.001);
		assert_eq!(settings.hyperparameters.num_train_epochs, 1);
		assert_eq!(settings.hyperparameters.seed, 42);
	}

	#[test]
	fn test_train_rejects_bad_values() {
		assert!(parse(&["--dataset-type", "csv"]).is_err());
		assert!(parse(&["--max-length", "many"]).is_err());
		let matches = build_cli().try_get_matches_from(["soq", "train", "--use-model", "t5-small"]);
		assert!(matches.is_err());
	}
}
