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

use clap::{Arg, ArgAction, ArgMatches, Command};
use tracing::Level;

use crate::cli::{build_evaluate_command, build_train_command, EvaluateArgs, TrainArgs};

pub fn build_cli() -> Command {
	Command::new("soq")
		.arg(
			Arg::new("no-color")
				.long("no-color")
				.help(
					"Disable ANSI terminal codes (colors, etc...) being injected into the logging \
					 output",
				)
				.env("NO_COLOR")
				.value_parser(clap::builder::FalseyValueParser::new())
				.global(true)
				.action(ArgAction::SetTrue),
		)
		.subcommand(build_train_command().display_order(1))
		.subcommand(build_evaluate_command().display_order(2))
		.subcommand_required(true)
		.arg_required_else_help(true)
		.disable_help_subcommand(true)
}

#[derive(Debug, PartialEq)]
pub enum CliCommand {
	Train(TrainArgs),
	Evaluate(EvaluateArgs),
}

impl CliCommand {
	/// Both subcommands report progress at `info`.
	pub fn default_log_level(&self) -> Level {
		Level::INFO
	}

	pub fn parse_cli_args(mut matches: ArgMatches) -> anyhow::Result<Self> {
		let (subcommand, submatches) = matches
			.remove_subcommand()
			.ok_or_else(|| anyhow::anyhow!("missing subcommand, expected `train` or `evaluate`"))?;
		match subcommand.as_str() {
			"train" => TrainArgs::parse_cli_args(submatches).map(CliCommand::Train),
			"evaluate" => EvaluateArgs::parse_cli_args(submatches).map(CliCommand::Evaluate),
			other => anyhow::bail!("unknown subcommand `{other}`"),
		}
	}

	pub fn execute(self) -> anyhow::Result<()> {
		match self {
			CliCommand::Train(subcommand) => subcommand.execute(),
			CliCommand::Evaluate(subcommand) => subcommand.execute(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_cli_requires_a_subcommand() {
		assert!(build_cli().try_get_matches_from(["soq"]).is_err());
		assert!(build_cli().try_get_matches_from(["soq", "serve"]).is_err());
	}

	#[test]
	fn test_no_color_flag_is_global() {
		let matches = build_cli()
			.try_get_matches_from([
				"soq",
				"evaluate",
				"--no-color",
				"--use-tokenizer",
				"t5-small",
				"--evaluation-dataset",
				"eval.tsv",
				"--model",
				"out",
			])
			.unwrap();
		assert!(matches.get_flag("no-color"));
		let command = CliCommand::parse_cli_args(matches).unwrap();
		assert!(matches!(command, CliCommand::Evaluate(_)));
		assert_eq!(command.default_log_level(), Level::INFO);
	}
}
