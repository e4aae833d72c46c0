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
use std::path::Path;
use tracing::{debug, info};

use crate::{DatasetError, DatasetResult};

pub const INPUT_COLUMN: &str = "input";
pub const OUTPUT_COLUMN: &str = "output";

/// Cell values the upstream tabular loaders read as missing.
const MISSING_VALUE_SENTINELS: &[&str] = &[
	"", "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
	"<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

/// One `input`/`output` row of a dataset file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Example {
	pub input: String,
	pub output: String,
}

impl Example {
	pub fn new(input: impl Into<String>, output: impl Into<String>) -> Self {
		Self { input: input.into(), output: output.into() }
	}
}

pub fn is_missing_value(field: &str) -> bool {
	MISSING_VALUE_SENTINELS.contains(&field)
}

/// Reads a tab-separated file with an `input` and an `output` column.
///
/// The header must have exactly those two columns, in any order. Rows that fail to parse, have
/// the wrong number of fields, or miss either value are dropped.
pub fn load_examples(path: &Path) -> DatasetResult<Vec<Example>> {
	if !path.is_file() {
		return Err(DatasetError::configuration(format!(
			"failed to load dataset <{}>: no such file exists",
			path.display()
		)));
	}
	let mut reader = csv::ReaderBuilder::new()
		.delimiter(b'\t')
		.has_headers(true)
		.flexible(true)
		.from_path(path)?;

	let headers = reader.headers()?.clone();
	if headers.len() != 2 {
		return Err(DatasetError::configuration(format!(
			"failed to load dataset <{}>: wrong number of columns: expected 2 got {}",
			path.display(),
			headers.len()
		)));
	}
	let input_index = headers.iter().position(|name| name == INPUT_COLUMN);
	let output_index = headers.iter().position(|name| name == OUTPUT_COLUMN);
	let (input_index, output_index) = match (input_index, output_index) {
		(Some(input_index), Some(output_index)) => (input_index, output_index),
		_ =>
			return Err(DatasetError::configuration(format!(
				"failed to load dataset <{}>: wrong column names: expected '{}' and '{}', got {:?}",
				path.display(),
				INPUT_COLUMN,
				OUTPUT_COLUMN,
				headers.iter().collect::<Vec<_>>()
			))),
	};

	let mut examples = Vec::new();
	let mut dropped = 0usize;
	for (row, record) in reader.records().enumerate() {
		let record = match record {
			Ok(record) => record,
			Err(err) => {
				debug!(path = %path.display(), row, error = %err, "skipping malformed row");
				dropped += 1;
				continue;
			},
		};
		if record.len() != 2 {
			debug!(path = %path.display(), row, fields = record.len(), "skipping malformed row");
			dropped += 1;
			continue;
		}
		let (input, output) = (&record[input_index], &record[output_index]);
		if is_missing_value(input) || is_missing_value(output) {
			dropped += 1;
			continue;
		}
		examples.push(Example::new(input, output));
	}
	info!(path = %path.display(), rows = examples.len(), dropped, "loaded dataset file");
	Ok(examples)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::DatasetErrorKind;
	use std::io::Write;
	use tempfile::NamedTempFile;

	fn write_tsv(contents: &str) -> NamedTempFile {
		let mut file = NamedTempFile::new().unwrap();
		file.write_all(contents.as_bytes()).unwrap();
		file.flush().unwrap();
		file
	}

	#[test]
	fn test_load_examples_drops_rows_with_missing_output() {
		let mut contents = String::from("input\toutput\n");
		for index in 0..10 {
			if index == 3 || index == 7 {
				contents.push_str(&format!("question {index}\t\n"));
			} else {
				contents.push_str(&format!("question {index}\tanswer {index}\n"));
			}
		}
		let file = write_tsv(&contents);
		let examples = load_examples(file.path()).unwrap();
		assert_eq!(examples.len(), 8);
		assert!(examples.iter().all(|example| !example.output.is_empty()));
	}

	#[test]
	fn test_load_examples_skips_malformed_rows() {
		let file = write_tsv("input\toutput\na\tb\nonly-one-field\nx\ty\tz\nc\td\n");
		let examples = load_examples(file.path()).unwrap();
		assert_eq!(examples, vec![Example::new("a", "b"), Example::new("c", "d")]);
	}

	#[test]
	fn test_load_examples_treats_null_sentinels_as_missing() {
		let file = write_tsv("input\toutput\nselect 1\tNULL\nselect 2\t2\n");
		let examples = load_examples(file.path()).unwrap();
		assert_eq!(examples, vec![Example::new("select 2", "2")]);
	}

	#[test]
	fn test_load_examples_accepts_swapped_columns() {
		let file = write_tsv("output\tinput\n4\t2+2=?\n");
		let examples = load_examples(file.path()).unwrap();
		assert_eq!(examples, vec![Example::new("2+2=?", "4")]);
	}

	#[test]
	fn test_load_examples_rejects_wrong_column_count() {
		let file = write_tsv("input\toutput\textra\na\tb\tc\n");
		let err = load_examples(file.path()).unwrap_err();
		assert_eq!(err.kind(), DatasetErrorKind::Configuration);
	}

	#[test]
	fn test_load_examples_rejects_wrong_column_names() {
		let file = write_tsv("question\tanswer\na\tb\n");
		let err = load_examples(file.path()).unwrap_err();
		assert_eq!(err.kind(), DatasetErrorKind::Configuration);
	}

	#[test]
	fn test_load_examples_rejects_missing_file() {
		let dir = tempfile::tempdir().unwrap();
		let err = load_examples(&dir.path().join("missing.tsv")).unwrap_err();
		assert_eq!(err.kind(), DatasetErrorKind::Configuration);
	}
}
