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

use colored::Colorize;
use common::RED_COLOR;
use node::cli::{build_cli, setup_logging_and_tracing, CliCommand};

fn main() {
	let app = build_cli().about(about_text()).version(env!("CARGO_PKG_VERSION"));
	let matches = app.get_matches();
	let no_color = matches.get_flag("no-color");
	if no_color {
		colored::control::set_override(false);
	}
	let command = match CliCommand::parse_cli_args(matches) {
		Ok(command) => command,
		Err(err) => {
			eprintln!("Failed to parse command arguments: {err:?}");
			std::process::exit(1);
		},
	};
	setup_logging_and_tracing(command.default_log_level(), !no_color);

	let return_code: i32 = if let Err(err) = command.execute() {
		eprintln!("{} Command failed: {:?}\n", "✘".color(RED_COLOR), err);
		1
	} else {
		0
	};
	std::process::exit(return_code)
}

fn about_text() -> String {
	String::from(
		"soq: fine-tune and evaluate T5 models that generate structured output queries.\n\n",
	)
}
