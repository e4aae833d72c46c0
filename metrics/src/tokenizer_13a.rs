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

use once_cell::sync::Lazy;
use regex::Regex;

/// Substitutions of the mteval-v13a tokenizer, applied in order.
static MTEVAL_13A_RULES: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
	vec![
		// Symbols and most ASCII punctuation except `'`, `,`, `-` and `.`.
		(Regex::new(r"([\x7B-\x7E\x5B-\x60\x20-\x26\x28-\x2B\x3A-\x40\x2F])").unwrap(), " ${1} "),
		// Period and comma unless preceded by a digit.
		(Regex::new(r"([^0-9])([\.,])").unwrap(), "${1} ${2} "),
		// Period and comma unless followed by a digit.
		(Regex::new(r"([\.,])([^0-9])").unwrap(), " ${1} ${2}"),
		// Dash preceded by a digit.
		(Regex::new(r"([0-9])(-)").unwrap(), "${1} ${2} "),
	]
});

/// Tokenizes one line the way `mteval-v13a.pl` does before BLEU scoring.
pub fn tokenize_13a(line: &str) -> String {
	let mut line = line.replace("<skipped>", "").replace("-\n", "").replace('\n', " ");
	if line.contains('&') {
		line = line
			.replace("&quot;", "\"")
			.replace("&amp;", "&")
			.replace("&lt;", "<")
			.replace("&gt;", ">");
	}
	let mut line = format!(" {line} ");
	for (pattern, replacement) in MTEVAL_13A_RULES.iter() {
		line = pattern.replace_all(&line, *replacement).into_owned();
	}
	line.split_whitespace().collect::<Vec<_>>().join(" ")
}
