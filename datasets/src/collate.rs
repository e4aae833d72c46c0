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

use crate::{DatasetError, DatasetResult, TokenizedExample, LABEL_PAD_ID};

/// Tensors for one training step with the targets fed to the decoder.
#[derive(Debug, Clone)]
pub struct Seq2SeqBatch {
	/// `(batch, src_len)` u32.
	pub input_ids: Tensor,
	/// `(batch, src_len)` u32.
	pub attention_mask: Tensor,
	/// Labels shifted right behind the decoder start token, `(batch, tgt_len)` u32.
	pub decoder_input_ids: Tensor,
	/// Targets with ignored positions replaced by the pad id, `(batch, tgt_len)` u32.
	pub labels: Tensor,
	/// 1.0 where the target contributes to the loss, `(batch, tgt_len)` f32.
	pub label_mask: Tensor,
}

/// Stacks tokenized examples into padded seq2seq batches.
///
/// Both sides are trimmed to the longest real sequence of the batch.
#[derive(Debug, Clone, Copy)]
pub struct Seq2SeqCollator {
	pad_token_id: u32,
	decoder_start_token_id: u32,
}

impl Seq2SeqCollator {
	pub fn new(pad_token_id: u32, decoder_start_token_id: u32) -> Self {
		Self { pad_token_id, decoder_start_token_id }
	}

	pub fn collate(
		&self,
		examples: &[&TokenizedExample],
		device: &Device,
	) -> DatasetResult<Seq2SeqBatch> {
		if examples.is_empty() {
			return Err(DatasetError::configuration("cannot collate an empty batch"));
		}
		let mut targets = Vec::with_capacity(examples.len());
		for example in examples {
			let labels = example.labels.as_ref().ok_or_else(|| {
				DatasetError::configuration("training example has no labels")
			})?;
			targets.push(labels);
		}

		let src_len = examples
			.iter()
			.map(|example| content_length(&example.attention_mask, |&mask| mask != 0))
			.max()
			.unwrap_or(0)
			.max(1);
		let tgt_len = targets
			.iter()
			.map(|labels| content_length(labels, |&label| label != LABEL_PAD_ID))
			.max()
			.unwrap_or(0)
			.max(1);

		let batch_size = examples.len();
		let mut input_ids = Vec::with_capacity(batch_size * src_len);
		let mut attention_mask = Vec::with_capacity(batch_size * src_len);
		for example in examples {
			input_ids.extend(padded(&example.input_ids, src_len, self.pad_token_id));
			attention_mask.extend(padded(&example.attention_mask, src_len, 0));
		}

		let mut decoder_input_ids = Vec::with_capacity(batch_size * tgt_len);
		let mut labels = Vec::with_capacity(batch_size * tgt_len);
		let mut label_mask = Vec::with_capacity(batch_size * tgt_len);
		for target in targets {
			let row: Vec<Option<u32>> = (0..tgt_len)
				.map(|position| match target.get(position) {
					Some(&label) if label != LABEL_PAD_ID => Some(label as u32),
					_ => None,
				})
				.collect();
			decoder_input_ids.push(self.decoder_start_token_id);
			decoder_input_ids.extend(
				row[..tgt_len - 1].iter().map(|label| label.unwrap_or(self.pad_token_id)),
			);
			labels.extend(row.iter().map(|label| label.unwrap_or(self.pad_token_id)));
			label_mask.extend(row.iter().map(|label| if label.is_some() { 1f32 } else { 0f32 }));
		}

		Ok(Seq2SeqBatch {
			input_ids: Tensor::from_vec(input_ids, (batch_size, src_len), device)?,
			attention_mask: Tensor::from_vec(attention_mask, (batch_size, src_len), device)?,
			decoder_input_ids: Tensor::from_vec(decoder_input_ids, (batch_size, tgt_len), device)?,
			labels: Tensor::from_vec(labels, (batch_size, tgt_len), device)?,
			label_mask: Tensor::from_vec(label_mask, (batch_size, tgt_len), device)?,
		})
	}
}

/// Index one past the last element accepted by `is_content`.
fn content_length<T>(values: &[T], is_content: impl Fn(&T) -> bool) -> usize {
	values.iter().rposition(is_content).map(|index| index + 1).unwrap_or(0)
}

fn padded(values: &[u32], width: usize, pad: u32) -> impl Iterator<Item = u32> + '_ {
	(0..width).map(move |index| values.get(index).copied().unwrap_or(pad))
}
