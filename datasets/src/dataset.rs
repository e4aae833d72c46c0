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

use candle_core::{Device, Tensor};
use common::DatasetType;
use std::{
	collections::BTreeMap,
	path::{Path, PathBuf},
};
use tracing::info;

use crate::{
	load_examples, model_input_text, model_target_text, DatasetError, DatasetResult, Example,
	SoqTokenizer,
};

/// Split name used when a single file is loaded.
pub const DEFAULT_SPLIT: &str = "train";

/// One example after cleaning, prefixing and tokenization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizedExample {
	pub input_ids: Vec<u32>,
	pub attention_mask: Vec<u32>,
	/// Target ids padded with `LABEL_PAD_ID`; only present for training splits.
	pub labels: Option<Vec<i64>>,
	/// Cleaned reference text, kept for scoring.
	pub output: String,
}

/// Ordered, immutable collection of tokenized examples sharing one sequence width.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenizedDataset {
	examples: Vec<TokenizedExample>,
	max_length: usize,
}

pub type DatasetDict = BTreeMap<String, TokenizedDataset>;

impl TokenizedDataset {
	pub fn new(examples: Vec<TokenizedExample>, max_length: usize) -> Self {
		Self { examples, max_length }
	}

	pub fn len(&self) -> usize {
		self.examples.len()
	}

	pub fn is_empty(&self) -> bool {
		self.examples.is_empty()
	}

	/// Width of every input-id row.
	pub fn max_length(&self) -> usize {
		self.max_length
	}

	pub fn examples(&self) -> &[TokenizedExample] {
		&self.examples
	}

	pub fn get(&self, index: usize) -> Option<&TokenizedExample> {
		self.examples.get(index)
	}

	pub fn outputs(&self) -> Vec<String> {
		self.examples.iter().map(|example| example.output.clone()).collect()
	}

	/// `input_ids` and `attention_mask` rows `[start, end)` as `(rows, max_length)` u32 tensors.
	pub fn batch_inputs(
		&self,
		start: usize,
		end: usize,
		device: &Device,
	) -> DatasetResult<(Tensor, Tensor)> {
		let rows = self.examples.get(start..end).ok_or_else(|| {
			DatasetError::configuration(format!(
				"batch [{start}, {end}) is out of bounds for {} examples",
				self.examples.len()
			))
		})?;
		let width = self.max_length;
		let input_ids: Vec<u32> =
			rows.iter().flat_map(|example| example.input_ids.iter().copied()).collect();
		let attention_mask: Vec<u32> =
			rows.iter().flat_map(|example| example.attention_mask.iter().copied()).collect();
		let input_ids = Tensor::from_vec(input_ids, (rows.len(), width), device)?;
		let attention_mask = Tensor::from_vec(attention_mask, (rows.len(), width), device)?;
		Ok((input_ids, attention_mask))
	}
}

/// A single dataset file or a mapping of split names to files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataFiles {
	Single(PathBuf),
	Splits(BTreeMap<String, PathBuf>),
}

impl DataFiles {
	pub fn splits(&self) -> Vec<(String, PathBuf)> {
		match self {
			DataFiles::Single(path) => vec![(DEFAULT_SPLIT.to_string(), path.clone())],
			DataFiles::Splits(splits) =>
				splits.iter().map(|(name, path)| (name.clone(), path.clone())).collect(),
		}
	}
}

impl From<PathBuf> for DataFiles {
	fn from(path: PathBuf) -> Self {
		DataFiles::Single(path)
	}
}

impl From<&Path> for DataFiles {
	fn from(path: &Path) -> Self {
		DataFiles::Single(path.to_path_buf())
	}
}

impl From<BTreeMap<String, PathBuf>> for DataFiles {
	fn from(splits: BTreeMap<String, PathBuf>) -> Self {
		DataFiles::Splits(splits)
	}
}

/// Cleans, prefixes and tokenizes `examples`.
///
/// Inputs are padded to `max_length`. When `with_labels` is set the outputs are tokenized as
/// decoder targets with the same length policy.
pub fn tokenize_examples(
	examples: &[Example],
	tokenizer: &SoqTokenizer,
	dataset_type: DatasetType,
	generation_prefix: &str,
	max_length: usize,
	with_labels: bool,
) -> DatasetResult<TokenizedDataset> {
	if max_length == 0 {
		return Err(DatasetError::configuration("max length must be greater than zero"));
	}
	let inputs: Vec<String> = examples
		.iter()
		.map(|example| model_input_text(dataset_type, generation_prefix, &example.input))
		.collect();
	let outputs: Vec<String> =
		examples.iter().map(|example| model_target_text(dataset_type, &example.output)).collect();

	let encoded = tokenizer.encode_inputs(inputs, max_length)?;
	let labels: Vec<Option<Vec<i64>>> = if with_labels {
		tokenizer.encode_labels(outputs.clone(), max_length)?.into_iter().map(Some).collect()
	} else {
		vec![None; outputs.len()]
	};

	let tokenized = encoded
		.input_ids
		.into_iter()
		.zip(encoded.attention_mask)
		.zip(outputs)
		.zip(labels)
		.map(|(((input_ids, attention_mask), output), labels)| TokenizedExample {
			input_ids,
			attention_mask,
			labels,
			output,
		})
		.collect();
	Ok(TokenizedDataset::new(tokenized, max_length))
}

/// Loads soq-formatted TSV files and tokenizes their inputs for generation.
///
/// Every split keeps its cleaned `output` text for reference-based scoring.
pub fn prepare_soq_dataset_from_file(
	files: impl Into<DataFiles>,
	tokenizer: &SoqTokenizer,
	generation_prefix: &str,
	max_length: usize,
) -> DatasetResult<DatasetDict> {
	let mut dict = DatasetDict::new();
	for (split, path) in files.into().splits() {
		let examples = load_examples(&path)?;
		let dataset = tokenize_examples(
			&examples,
			tokenizer,
			DatasetType::Soq,
			generation_prefix,
			max_length,
			false,
		)
		.map_err(|err| err.add_context(format!("while tokenizing split `{split}`")))?;
		info!(split = %split, examples = dataset.len(), "prepared dataset split");
		dict.insert(split, dataset);
	}
	Ok(dict)
}

/// Loads and tokenizes the train and test files of a fine-tuning run, labels included.
pub fn prepare_training_splits(
	train_path: &Path,
	test_path: &Path,
	tokenizer: &SoqTokenizer,
	dataset_type: DatasetType,
	generation_prefix: &str,
	max_length: usize,
) -> DatasetResult<(TokenizedDataset, TokenizedDataset)> {
	// Both files are validated before either is tokenized.
	let train_examples = load_examples(train_path)?;
	let test_examples = load_examples(test_path)?;
	let train = tokenize_examples(
		&train_examples,
		tokenizer,
		dataset_type,
		generation_prefix,
		max_length,
		true,
	)?;
	let test = tokenize_examples(
		&test_examples,
		tokenizer,
		dataset_type,
		generation_prefix,
		max_length,
		true,
	)?;
	info!(train = train.len(), test = test.len(), %dataset_type, "tokenized training splits");
	Ok((train, test))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{test_utils::*, DatasetErrorKind};

	#[test]
	fn test_prepared_inputs_start_with_prefix_tokens() {
		let dir = tempfile::tempdir().unwrap();
		let path = write_tsv(dir.path(), "eval.tsv", &[("2+2=? ", " 4"), ("3+3=? ", " 6")]);
		let tokenizer = fixture_tokenizer();
		let dict = prepare_soq_dataset_from_file(path, &tokenizer, "soq: ", 8).unwrap();
		let dataset = &dict[DEFAULT_SPLIT];
		assert_eq!(dataset.len(), 2);
		let prefix = tokenizer.token_to_id("soq:").unwrap();
		for example in dataset.examples() {
			assert_eq!(example.input_ids[0], prefix);
			assert_eq!(example.input_ids.len(), 8);
			assert!(example.labels.is_none());
		}
		assert_eq!(dataset.outputs(), vec![" 4".to_string(), " 6".to_string()]);
	}

	#[test]
	fn test_prepare_drops_rows_missing_output() {
		let dir = tempfile::tempdir().unwrap();
		let mut rows: Vec<(String, String)> =
			(0..10).map(|i| (format!("hello {i}"), format!("world {i}"))).collect();
		rows[2].1.clear();
		rows[9].1.clear();
		let borrowed: Vec<(&str, &str)> =
			rows.iter().map(|(input, output)| (input.as_str(), output.as_str())).collect();
		let path = write_tsv(dir.path(), "eval.tsv", &borrowed);
		let tokenizer = fixture_tokenizer();
		let dict = prepare_soq_dataset_from_file(path, &tokenizer, "soq: ", 4).unwrap();
		assert_eq!(dict[DEFAULT_SPLIT].len(), 8);
	}

	#[test]
	fn test_prepare_named_splits() {
		let dir = tempfile::tempdir().unwrap();
		let train = write_tsv(dir.path(), "train.tsv", &[("hello", "world")]);
		let test = write_tsv(dir.path(), "test.tsv", &[("hello", "world"), ("world", "hello")]);
		let splits: BTreeMap<String, PathBuf> =
			[("train".to_string(), train), ("test".to_string(), test)].into_iter().collect();
		let tokenizer = fixture_tokenizer();
		let dict = prepare_soq_dataset_from_file(splits, &tokenizer, "", 4).unwrap();
		assert_eq!(dict["train"].len(), 1);
		assert_eq!(dict["test"].len(), 2);
	}

	#[test]
	fn test_prepare_training_splits_assigns_labels() {
		let dir = tempfile::tempdir().unwrap();
		let train = write_tsv(dir.path(), "train.tsv", &[("2+2=?", "4")]);
		let test = write_tsv(dir.path(), "test.tsv", &[("3+3=?", "6")]);
		let tokenizer = fixture_tokenizer();
		let (train, test) =
			prepare_training_splits(&train, &test, &tokenizer, DatasetType::Local, "soq: ", 5)
				.unwrap();
		let four = tokenizer.token_to_id("4").unwrap() as i64;
		let eos = tokenizer.eos_token_id().unwrap() as i64;
		assert_eq!(train.examples()[0].labels, Some(vec![four, eos, -100, -100, -100]));
		assert_eq!(test.len(), 1);
	}

	#[test]
	fn test_prepare_training_splits_rejects_missing_test_file() {
		let dir = tempfile::tempdir().unwrap();
		let train = write_tsv(dir.path(), "train.tsv", &[("2+2=?", "4")]);
		let tokenizer = fixture_tokenizer();
		let err = prepare_training_splits(
			&train,
			&dir.path().join("missing.tsv"),
			&tokenizer,
			DatasetType::Soq,
			"soq: ",
			5,
		)
		.unwrap_err();
		assert_eq!(err.kind(), DatasetErrorKind::Configuration);
	}

	#[test]
	fn test_batch_inputs_shapes() {
		let dir = tempfile::tempdir().unwrap();
		let path = write_tsv(
			dir.path(),
			"eval.tsv",
			&[("hello", "world"), ("world", "hello"), ("hello world", "t")],
		);
		let tokenizer = fixture_tokenizer();
		let dict = prepare_soq_dataset_from_file(path, &tokenizer, "soq: ", 6).unwrap();
		let dataset = &dict[DEFAULT_SPLIT];
		let (input_ids, attention_mask) = dataset.batch_inputs(1, 3, &Device::Cpu).unwrap();
		assert_eq!(input_ids.dims(), &[2, 6]);
		assert_eq!(attention_mask.dims(), &[2, 6]);
		assert!(dataset.batch_inputs(2, 4, &Device::Cpu).is_err());
	}
}
