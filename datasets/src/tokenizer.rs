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

use std::{path::Path, sync::Arc};
use tokenizers::{Encoding, Tokenizer};

use crate::{DatasetError, DatasetErrorKind, DatasetResult};

/// Label value excluded from the loss.
pub const LABEL_PAD_ID: i64 = -100;

const PAD_TOKEN: &str = "<pad>";
const EOS_TOKEN: &str = "</s>";

/// Right-padded encoder inputs of a fixed width.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TokenizedBatch {
	pub input_ids: Vec<Vec<u32>>,
	pub attention_mask: Vec<Vec<u32>>,
}

/// Fixed-length encoding and decoding on top of a Hugging Face `tokenizer.json`.
#[derive(Clone)]
pub struct SoqTokenizer {
	tokenizer: Tokenizer,
	pad_token_id: u32,
	eos_token_id: Option<u32>,
}

impl SoqTokenizer {
	pub fn new(mut tokenizer: Tokenizer) -> Self {
		let pad_token_id = tokenizer
			.get_padding()
			.map(|padding| padding.pad_id)
			.or_else(|| tokenizer.token_to_id(PAD_TOKEN))
			.unwrap_or(0);
		let eos_token_id = tokenizer.token_to_id(EOS_TOKEN);
		// Padding is applied here at a fixed width, not by the tokenizer.
		tokenizer.with_padding(None);
		Self { tokenizer, pad_token_id, eos_token_id }
	}

	pub fn from_file(path: &Path) -> DatasetResult<Self> {
		let tokenizer = Tokenizer::from_file(path).map_err(|e| {
			DatasetError::new(
				DatasetErrorKind::Tokenizer,
				Arc::new(anyhow::anyhow!("could not read {}: {}", path.display(), e)),
			)
		})?;
		Ok(Self::new(tokenizer))
	}

	/// Loads `tokenizer.json` from a local directory, a file path, or a hub repository id.
	pub fn from_pretrained(identifier: &str, revision: Option<&str>) -> DatasetResult<Self> {
		let path = common::resolve_model_file(identifier, revision, "tokenizer.json")
			.map_err(|e| DatasetError::new(DatasetErrorKind::Tokenizer, Arc::new(e)))?;
		Self::from_file(&path)
	}

	pub fn pad_token_id(&self) -> u32 {
		self.pad_token_id
	}

	pub fn eos_token_id(&self) -> Option<u32> {
		self.eos_token_id
	}

	pub fn token_to_id(&self, token: &str) -> Option<u32> {
		self.tokenizer.token_to_id(token)
	}

	fn encode_all(&self, texts: Vec<String>) -> DatasetResult<Vec<Encoding>> {
		self.tokenizer.encode_batch(texts, true).map_err(|e| {
			DatasetError::new(
				DatasetErrorKind::Tokenizer,
				Arc::new(anyhow::anyhow!("token encoding failed: {}", e)),
			)
		})
	}

	/// Encodes encoder inputs, truncated and right-padded to exactly `max_length` tokens.
	pub fn encode_inputs(
		&self,
		texts: Vec<String>,
		max_length: usize,
	) -> DatasetResult<TokenizedBatch> {
		let encodings = self.encode_all(texts)?;
		let mut batch = TokenizedBatch {
			input_ids: Vec::with_capacity(encodings.len()),
			attention_mask: Vec::with_capacity(encodings.len()),
		};
		for encoding in &encodings {
			let mut ids = truncated_ids(encoding, max_length);
			let mut mask = vec![1u32; ids.len()];
			ids.resize(max_length, self.pad_token_id);
			mask.resize(max_length, 0);
			batch.input_ids.push(ids);
			batch.attention_mask.push(mask);
		}
		Ok(batch)
	}

	/// Encodes decoder targets, truncated and padded with [`LABEL_PAD_ID`] to `max_length`.
	pub fn encode_labels(
		&self,
		texts: Vec<String>,
		max_length: usize,
	) -> DatasetResult<Vec<Vec<i64>>> {
		let encodings = self.encode_all(texts)?;
		Ok(encodings
			.iter()
			.map(|encoding| {
				let mut labels: Vec<i64> =
					truncated_ids(encoding, max_length).into_iter().map(i64::from).collect();
				labels.resize(max_length, LABEL_PAD_ID);
				labels
			})
			.collect())
	}

	/// Decodes one sequence, dropping special tokens.
	pub fn decode(&self, ids: &[u32]) -> DatasetResult<String> {
		self.tokenizer.decode(ids, true).map_err(|e| {
			DatasetError::new(
				DatasetErrorKind::Tokenizer,
				Arc::new(anyhow::anyhow!("token decoding failed: {}", e)),
			)
		})
	}

	/// Decodes a label sequence, reading [`LABEL_PAD_ID`] as padding.
	pub fn decode_labels(&self, labels: &[i64]) -> DatasetResult<String> {
		let ids: Vec<u32> = labels
			.iter()
			.map(|&label| if label == LABEL_PAD_ID { self.pad_token_id } else { label as u32 })
			.collect();
		self.decode(&ids)
	}

	pub fn save(&self, path: &Path) -> DatasetResult<()> {
		self.tokenizer.save(path, false).map_err(|e| {
			DatasetError::new(
				DatasetErrorKind::Tokenizer,
				Arc::new(anyhow::anyhow!("could not write {}: {}", path.display(), e)),
			)
		})
	}
}

/// Truncates to `max_length`, keeping a trailing special token (`</s>`) in the last slot.
fn truncated_ids(encoding: &Encoding, max_length: usize) -> Vec<u32> {
	let ids = encoding.get_ids();
	if ids.len() <= max_length {
		return ids.to_vec();
	}
	let ends_with_special = encoding.get_special_tokens_mask().last() == Some(&1);
	if ends_with_special && max_length > 0 {
		let mut truncated = ids[..max_length - 1].to_vec();
		truncated.push(ids[ids.len() - 1]);
		truncated
	} else {
		ids[..max_length].to_vec()
	}
}
