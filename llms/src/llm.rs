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
use serde::{Deserialize, Serialize};
use std::{fmt, io, sync::Arc};
use thiserror::Error;

use crate::GenerationSettings;

/// LLM error kind.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum LLMErrorKind {
	/// Io error.
	Io,
	/// Not found error.
	NotFound,
	/// PyTorch error.
	PyTorch,
	/// Safetensors error.
	SafeTensors,
	/// Model error.
	ModelError,
	/// Invalid model directory or config.
	Configuration,
}

/// A generic error type for LLM operations, encapsulating an error kind and its source.
#[derive(Debug, Clone, Error)]
#[error("llm error(kind={kind:?}, source={source})")]
#[allow(missing_docs)]
pub struct LLMError {
	/// The kind of error.
	pub kind: LLMErrorKind,
	/// The source of the error.
	#[source]
	pub source: Arc<anyhow::Error>,
}

/// A type alias for results returned by LLM operations.
pub type LLMResult<T> = Result<T, LLMError>;

impl LLMError {
	/// Creates a new `LLMError` with the specified kind and source.
	pub fn new(kind: LLMErrorKind, source: Arc<anyhow::Error>) -> Self {
		LLMError { kind, source }
	}

	/// Adds some context to the existing error.
	pub fn add_context<C>(self, ctx: C) -> Self
	where
		C: fmt::Display + Send + Sync + 'static,
	{
		LLMError {
			kind: self.kind,
			source: Arc::new(anyhow::anyhow!("{ctx}").context(self.source)),
		}
	}

	/// Returns the kind of this error.
	pub fn kind(&self) -> LLMErrorKind {
		self.kind.clone()
	}
}

impl From<io::Error> for LLMError {
	fn from(err: io::Error) -> LLMError {
		match err.kind() {
			io::ErrorKind::NotFound => LLMError::new(LLMErrorKind::NotFound, Arc::new(err.into())),
			_ => LLMError::new(LLMErrorKind::Io, Arc::new(err.into())),
		}
	}
}

impl From<serde_json::Error> for LLMError {
	fn from(err: serde_json::Error) -> LLMError {
		LLMError::new(LLMErrorKind::Configuration, Arc::new(err.into()))
	}
}

impl From<candle_core::Error> for LLMError {
	fn from(err: candle_core::Error) -> LLMError {
		LLMError::new(LLMErrorKind::ModelError, Arc::new(err.into()))
	}
}

/// A sequence-to-sequence model that can decode greedily from encoder inputs.
pub trait Seq2SeqGenerator {
	/// Device the model's weights live on; inputs are moved there before generation.
	fn device(&self) -> &Device;

	/// Generates one token sequence per row of `input_ids`.
	///
	/// Each sequence starts with the decoder start token. Rows that finished early are padded
	/// with the pad token up to the length of the longest row.
	fn generate(
		&self,
		input_ids: &Tensor,
		attention_mask: &Tensor,
		settings: &GenerationSettings,
	) -> LLMResult<Vec<Vec<u32>>>;
}
