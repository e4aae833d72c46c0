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

//! Fixtures shared by the dataset, engine and CLI tests.

use serde_json::json;
use std::io::Write;

use crate::SoqTokenizer;

/// Vocabulary of the fixture tokenizer, in id order.
pub const FIXTURE_VOCAB: &[&str] = &[
	"<pad>", "</s>", "<unk>", "soq:", "2+2=?", "3+3=?", "4", "6", "SELECT", "*", "FROM", "t",
	"hello", "world",
];

fn special_token(id: usize, content: &str) -> serde_json::Value {
	json!({
		"id": id,
		"content": content,
		"single_word": false,
		"lstrip": false,
		"rstrip": false,
		"normalized": false,
		"special": true,
	})
}

/// `tokenizer.json` contents for a whitespace-split word-level tokenizer that appends `</s>`
/// like the T5 tokenizers do.
pub fn fixture_tokenizer_json() -> String {
	let vocab: serde_json::Map<String, serde_json::Value> = FIXTURE_VOCAB
		.iter()
		.enumerate()
		.map(|(id, token)| (token.to_string(), json!(id)))
		.collect();
	json!({
		"version": "1.0",
		"truncation": null,
		"padding": null,
		"added_tokens": [
			special_token(0, "<pad>"),
			special_token(1, "</s>"),
			special_token(2, "<unk>"),
		],
		"normalizer": null,
		"pre_tokenizer": { "type": "WhitespaceSplit" },
		"post_processor": {
			"type": "TemplateProcessing",
			"single": [
				{ "Sequence": { "id": "A", "type_id": 0 } },
				{ "SpecialToken": { "id": "</s>", "type_id": 0 } }
			],
			"pair": [
				{ "Sequence": { "id": "A", "type_id": 0 } },
				{ "SpecialToken": { "id": "</s>", "type_id": 0 } },
				{ "Sequence": { "id": "B", "type_id": 0 } },
				{ "SpecialToken": { "id": "</s>", "type_id": 0 } }
			],
			"special_tokens": {
				"</s>": { "id": "</s>", "ids": [1], "tokens": ["</s>"] }
			}
		},
		"decoder": null,
		"model": { "type": "WordLevel", "vocab": vocab, "unk_token": "<unk>" }
	})
	.to_string()
}

/// Writes the fixture tokenizer into `dir/tokenizer.json`.
pub fn write_fixture_tokenizer(dir: &std::path::Path) -> std::path::PathBuf {
	let path = dir.join("tokenizer.json");
	let mut file = std::fs::File::create(&path).expect("create tokenizer.json");
	file.write_all(fixture_tokenizer_json().as_bytes()).expect("write tokenizer.json");
	path
}

pub fn fixture_tokenizer() -> SoqTokenizer {
	let dir = tempfile::tempdir().expect("tempdir");
	let path = write_fixture_tokenizer(dir.path());
	SoqTokenizer::from_file(&path).expect("fixture tokenizer")
}

/// Writes a TSV file with an `input\toutput` header followed by `rows`.
pub fn write_tsv(dir: &std::path::Path, name: &str, rows: &[(&str, &str)]) -> std::path::PathBuf {
	let path = dir.join(name);
	let mut contents = String::from("input\toutput\n");
	for (input, output) in rows {
		contents.push_str(&format!("{input}\t{output}\n"));
	}
	std::fs::write(&path, contents).expect("write tsv");
	path
}
