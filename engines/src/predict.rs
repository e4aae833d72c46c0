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

use candle_core::Device;
use common::batched_range_iter;
use datasets::{SoqTokenizer, TokenizedDataset};
use llms::{GenerationSettings, Seq2SeqGenerator};
use tracing::debug;

use crate::{progress_bar, EngineError, EngineResult};

/// Dense `rows x cols` grid of generated token ids, zero where nothing was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredictionBuffer {
	rows: usize,
	cols: usize,
	data: Vec<u32>,
}

impl PredictionBuffer {
	pub fn new(rows: usize, cols: usize) -> Self {
		Self { rows, cols, data: vec![0; rows * cols] }
	}

	pub fn rows(&self) -> usize {
		self.rows
	}

	pub fn cols(&self) -> usize {
		self.cols
	}

	/// Writes `tokens` left-aligned into `row`. Cells past `tokens.len()` are left untouched.
	pub fn write_row(&mut self, row: usize, tokens: &[u32]) -> EngineResult<()> {
		if row >= self.rows {
			return Err(EngineError::configuration(format!(
				"row {row} is out of range for a buffer of {} rows",
				self.rows
			)));
		}
		if tokens.len() > self.cols {
			return Err(EngineError::configuration(format!(
				"generated {} tokens but the buffer holds {}",
				tokens.len(),
				self.cols
			)));
		}
		let offset = row * self.cols;
		self.data[offset..offset + tokens.len()].copy_from_slice(tokens);
		Ok(())
	}

	pub fn row(&self, row: usize) -> Option<&[u32]> {
		if row >= self.rows {
			return None;
		}
		let offset = row * self.cols;
		Some(&self.data[offset..offset + self.cols])
	}

	pub fn iter_rows(&self) -> impl Iterator<Item = &[u32]> {
		// `chunks` panics on zero, an empty-width buffer still has `rows` empty rows.
		(0..self.rows).map(move |row| &self.data[row * self.cols..(row + 1) * self.cols])
	}

	pub fn into_rows(self) -> Vec<Vec<u32>> {
		self.iter_rows().map(<[u32]>::to_vec).collect()
	}
}

/// Greedily generates one sequence per example, batch by batch in index order.
///
/// `settings.max_length` is capped to the dataset width so every row fits the buffer.
pub fn generate_predictions(
	model: &dyn Seq2SeqGenerator,
	dataset: &TokenizedDataset,
	batch_size: usize,
	settings: &GenerationSettings,
) -> EngineResult<PredictionBuffer> {
	if batch_size == 0 {
		return Err(EngineError::configuration("batch size must be greater than zero"));
	}
	let width = dataset.max_length();
	let settings = GenerationSettings::new(settings.max_new_tokens, settings.max_length.min(width));
	let device: &Device = model.device();
	let mut buffer = PredictionBuffer::new(dataset.len(), width);

	let batches = batched_range_iter(0, dataset.len(), batch_size);
	let progress = progress_bar(batches.len() as u64, "Generating");
	for (start, end) in batches {
		let (input_ids, attention_mask) = dataset.batch_inputs(start, end, device)?;
		let sequences = model.generate(&input_ids, &attention_mask, &settings)?;
		if sequences.len() != end - start {
			return Err(EngineError::configuration(format!(
				"model returned {} sequences for a batch of {}",
				sequences.len(),
				end - start
			)));
		}
		for (offset, sequence) in sequences.iter().enumerate() {
			buffer.write_row(start + offset, sequence)?;
		}
		debug!(start, end, "generated batch");
		progress.inc(1);
	}
	progress.finish_and_clear();
	Ok(buffer)
}

/// Decodes every buffer row, skipping special tokens.
pub fn decode_predictions(
	buffer: &PredictionBuffer,
	tokenizer: &SoqTokenizer,
) -> EngineResult<Vec<String>> {
	buffer.iter_rows().map(|row| Ok(tokenizer.decode(row)?)).collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use candle_core::Tensor;
	use datasets::{test_utils::fixture_tokenizer, TokenizedExample};
	use llms::LLMResult;

	/// Echoes the first `len` input ids of every row after a zero start token.
	struct EchoGenerator {
		device: Device,
		len: usize,
	}

	impl Seq2SeqGenerator for EchoGenerator {
		fn device(&self) -> &Device {
			&self.device
		}

		fn generate(
			&self,
			input_ids: &Tensor,
			_attention_mask: &Tensor,
			_settings: &GenerationSettings,
		) -> LLMResult<Vec<Vec<u32>>> {
			let rows = input_ids.to_vec2::<u32>()?;
			Ok(rows
				.into_iter()
				.map(|row| std::iter::once(0).chain(row.into_iter().take(self.len)).collect())
				.collect())
		}
	}

	fn dataset(rows: usize, width: usize) -> TokenizedDataset {
		let examples = (0..rows)
			.map(|row| TokenizedExample {
				input_ids: (0..width).map(|col| (row * 10 + col + 1) as u32).collect(),
				attention_mask: vec![1; width],
				labels: None,
				output: format!("row {row}"),
			})
			.collect();
		TokenizedDataset::new(examples, width)
	}

	#[test]
	fn test_buffer_rows_keep_trailing_zeros() {
		let model = EchoGenerator { device: Device::Cpu, len: 2 };
		let buffer =
			generate_predictions(&model, &dataset(5, 6), 2, &GenerationSettings::with_max_length(6))
				.unwrap();
		assert_eq!(buffer.rows(), 5);
		assert_eq!(buffer.cols(), 6);
		assert_eq!(buffer.row(0), Some(&[0, 1, 2, 0, 0, 0][..]));
		assert_eq!(buffer.row(4), Some(&[0, 41, 42, 0, 0, 0][..]));
		assert_eq!(buffer.row(5), None);
	}

	#[test]
	fn test_too_wide_generation_is_an_error() {
		let model = EchoGenerator { device: Device::Cpu, len: 4 };
		let settings = GenerationSettings::with_max_length(4);
		let result = generate_predictions(&model, &dataset(2, 4), 1, &settings);
		assert!(result.is_err());
	}

	#[test]
	fn test_zero_batch_size_is_rejected() {
		let model = EchoGenerator { device: Device::Cpu, len: 1 };
		let settings = GenerationSettings::with_max_length(4);
		let err = generate_predictions(&model, &dataset(1, 4), 0, &settings).unwrap_err();
		assert_eq!(err.kind(), crate::EngineErrorKind::Configuration);
	}

	#[test]
	fn test_decode_predictions_skips_padding() {
		let tokenizer = fixture_tokenizer();
		let mut buffer = PredictionBuffer::new(2, 4);
		buffer.write_row(0, &[0, 12, 13, 1]).unwrap();
		buffer.write_row(1, &[0, 6]).unwrap();
		let decoded = decode_predictions(&buffer, &tokenizer).unwrap();
		assert_eq!(decoded, vec!["hello world".to_string(), "4".to_string()]);
	}

	#[test]
	fn test_empty_dataset_yields_empty_buffer() {
		let model = EchoGenerator { device: Device::Cpu, len: 1 };
		let buffer =
			generate_predictions(&model, &dataset(0, 4), 3, &GenerationSettings::with_max_length(4))
				.unwrap();
		assert_eq!(buffer.into_rows(), Vec::<Vec<u32>>::new());
	}
}
