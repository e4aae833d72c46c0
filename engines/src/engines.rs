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

use candle_core::Error as CandleCoreError;
use datasets::{DatasetError, DatasetErrorKind};
use llms::{LLMError, LLMErrorKind};
use metrics::{MetricsError, MetricsErrorKind};
use serde::{Deserialize, Serialize};
use std::{fmt, io, sync::Arc};
use thiserror::Error;

/// Engine error kind.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum EngineErrorKind {
	/// Bad paths, names or sizes, reported before any heavy work.
	Configuration,
	/// Io error.
	Io,
	/// Not found error.
	NotFound,
	/// Dataset loading or tokenization error.
	Dataset,
	/// Model error.
	ModelError,
	/// Metric computation error.
	Metric,
}

/// Generic EngineError.
#[derive(Debug, Clone, Error)]
#[error("engine error(kind={kind:?}, source={source})")]
#[allow(missing_docs)]
pub struct EngineError {
	pub kind: EngineErrorKind,
	#[source]
	pub source: Arc<anyhow::Error>,
}

/// Generic Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
	pub fn new(kind: EngineErrorKind, source: Arc<anyhow::Error>) -> Self {
		EngineError { kind, source }
	}

	pub fn configuration(message: impl fmt::Display) -> Self {
		EngineError::new(EngineErrorKind::Configuration, Arc::new(anyhow::anyhow!("{}", message)))
	}

	/// Add some context to the wrapper error.
	pub fn add_context<C>(self, ctx: C) -> Self
	where
		C: fmt::Display + Send + Sync + 'static,
	{
		EngineError {
			kind: self.kind,
			source: Arc::new(anyhow::anyhow!("{ctx}").context(self.source)),
		}
	}

	/// Returns the corresponding `EngineErrorKind` for this error.
	pub fn kind(&self) -> EngineErrorKind {
		self.kind
	}
}

impl From<io::Error> for EngineError {
	fn from(err: io::Error) -> EngineError {
		match err.kind() {
			io::ErrorKind::NotFound =>
				EngineError::new(EngineErrorKind::NotFound, Arc::new(err.into())),
			_ => EngineError::new(EngineErrorKind::Io, Arc::new(err.into())),
		}
	}
}

impl From<serde_json::Error> for EngineError {
	fn from(err: serde_json::Error) -> EngineError {
		EngineError::new(EngineErrorKind::Io, Arc::new(err.into()))
	}
}

impl From<LLMError> for EngineError {
	fn from(err: LLMError) -> EngineError {
		let kind = match err.kind() {
			LLMErrorKind::Configuration => EngineErrorKind::Configuration,
			LLMErrorKind::NotFound => EngineErrorKind::NotFound,
			_ => EngineErrorKind::ModelError,
		};
		EngineError::new(kind, Arc::new(err.into()))
	}
}

impl From<DatasetError> for EngineError {
	fn from(err: DatasetError) -> EngineError {
		let kind = match err.kind() {
			DatasetErrorKind::Configuration => EngineErrorKind::Configuration,
			DatasetErrorKind::NotFound => EngineErrorKind::NotFound,
			DatasetErrorKind::Tensor => EngineErrorKind::ModelError,
			_ => EngineErrorKind::Dataset,
		};
		EngineError::new(kind, Arc::new(err.into()))
	}
}

impl From<MetricsError> for EngineError {
	fn from(err: MetricsError) -> EngineError {
		let kind = match err.kind() {
			MetricsErrorKind::Configuration => EngineErrorKind::Configuration,
			MetricsErrorKind::LengthMismatch => EngineErrorKind::Metric,
		};
		EngineError::new(kind, Arc::new(err.into()))
	}
}

impl From<CandleCoreError> for EngineError {
	fn from(err: CandleCoreError) -> EngineError {
		EngineError::new(EngineErrorKind::ModelError, Arc::new(err.into()))
	}
}

/// A unit of work driven by the CLI.
pub trait Engine {
	type Output;

	fn run(&self) -> EngineResult<Self::Output>;
}
