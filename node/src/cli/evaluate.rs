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
	EvalSettings, DEFAULT_EVAL_BATCH_SIZE, DEFAULT_GENERATION_PREFIX, DEFAULT_MAX_LENGTH,
	DEFAULT_METRIC,
};
use engines::{Engine, EvaluationEngine};
use std::path::PathBuf;
use tracing::debug;

use crate::cli::required;

pub fn build_evaluate_command() -> Command {
	Command::new("evaluate")
		.about("Scores a fine-tuned model on an evaluation dataset.")
		.arg(
			Arg::new("use-tokenizer")
				.long("use-tokenizer")
				.help("Tokenizer directory, tokenizer.json file or hub repository id")
				.required(true),
		)
		.arg(
			Arg::new("evaluation-dataset")
				.long("evaluation-dataset")
				.help("Soq-formatted TSV file")
				.value_parser(value_parser!(PathBuf))
				.required(true),
		)
		.arg(
			Arg::new("model")
				.long("model")
				.help("Directory holding config.json and the model weights")
				.value_parser(value_parser!(PathBuf))
				.required(true),
		)
		.arg(
			Arg::new("use-generation-prefix")
				.long("use-generation-prefix")
				.default_value(DEFAULT_GENERATION_PREFIX),
		)
		.arg(
			Arg::new("max-length")
				.long("max-length")
				.value_parser(value_parser!(usize))
				.default_value(DEFAULT_MAX_LENGTH.to_string()),
		)
		.arg(Arg::new("metric").long("metric").default_value(DEFAULT_METRIC))
		.arg(
			Arg::new("batch-size")
				.long("batch-size")
				.value_parser(value_parser!(usize))
				.default_value(DEFAULT_EVAL_BATCH_SIZE.to_string()),
		)
}

#[derive(Debug, PartialEq)]
pub struct EvaluateArgs {
	pub settings: EvalSettings,
}

impl EvaluateArgs {
	pub fn parse_cli_args(mut matches: ArgMatches) -> anyhow::Result<Self> {
		let settings = EvalSettings {
			tokenizer: required(&mut matches, "use-tokenizer")?,
			evaluation_dataset: required(&mut matches, "evaluation-dataset")?,
			model_dir: required(&mut matches, "model")?,
			generation_prefix: required(&mut matches, "use-generation-prefix")?,
			max_length: required(&mut matches, "max-length")?,
			metric: required(&mut matches, "metric")?,
			batch_size: required(&mut matches, "batch-size")?,
		};
		Ok(EvaluateArgs { settings })
	}

	pub fn execute(self) -> anyhow::Result<()> {
		debug!(args = ?self, "run-soq-evaluate");
		let result = EvaluationEngine::new(self.settings).run()?;
		println!("{}", serde_json::to_string_pretty(&result)?);
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::cli::{build_cli, CliCommand};

	fn parse(args: &[&str]) -> anyhow::Result<EvalSettings> {
		let matches = build_cli().try_get_matches_from(args)?;
		match CliCommand::parse_cli_args(matches)? {
			CliCommand::Evaluate(evaluate) => Ok(evaluate.settings),
			other => anyhow::bail!("unexpected command {other:?}"),
		}
	}

	#[test]
	fn test_evaluate_defaults() {
		let settings = parse(&[
			"soq",
			"evaluate",
			"--use-tokenizer",
			"t5-small",
			"--evaluation-dataset",
			"eval.tsv",
			"--model",
			"out",
		])
		.unwrap();
		assert_eq!(
			settings,
			EvalSettings {
				tokenizer: "t5-small".to_string(),
				evaluation_dataset: PathBuf::from("eval.tsv"),
				model_dir: PathBuf::from("out"),
				generation_prefix: "soq: ".to_string(),
				max_length: 2048,
				metric: "sacrebleu".to_string(),
				batch_size: 64,
			}
		);
	}

	#[test]
	fn test_evaluate_missing_model_dir_fails_before_loading() {
		let dir = tempfile::tempdir().unwrap();
		let missing = dir.path().join("missing");
		let missing = missing.to_string_lossy();
		let settings = parse(&[
			"soq",
			"evaluate",
			"--use-tokenizer",
			"does-not-exist",
			"--evaluation-dataset",
			"eval.tsv",
			"--model",
			&missing,
			"--batch-size",
			"2",
		])
		.unwrap();
		assert_eq!(settings.batch_size, 2);
		let err = EvaluateArgs { settings }.execute().unwrap_err();
		assert!(format!("{err:#}").contains("model directory"));
	}
}
