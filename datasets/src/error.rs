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
use std::{fmt, io, sync::Arc};
use thiserror::Error;

/// Dataset error kind.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum DatasetErrorKind {
	/// Missing file, wrong header, unknown dataset type.
	Configuration,
	/// Not found error.
	NotFound,
	/// Io error.
	Io,
	/// Csv error.
	Csv,
	/// Tokenizer error.
	Tokenizer,
	/// Tensor construction error.
	Tensor,
}

/// Generic DatasetError.
#[derive(Debug, Clone, Error)]
#[error("dataset error(kind={kind:?}, source={source})")]
#[allow(missing_docs)]
pub struct DatasetError {
	pub kind: DatasetErrorKind,
	#[source]
	pub source: Arc<anyhow::Error>,
}

/// Generic Result type for dataset operations.
pub type DatasetResult<T> = Result<T, DatasetError>;

impl DatasetError {
	pub fn new(kind: DatasetErrorKind, source: Arc<anyhow::Error>) -> Self {
		DatasetError { kind, source }
	}

	/// Shorthand for configuration errors built from a message.
	pub fn configuration(message: impl fmt::Display) -> Self {
		DatasetError::new(
			DatasetErrorKind::Configuration,
			Arc::new(anyhow::anyhow!("{}", message)),
		)
	}

	/// Add some context to the wrapper error.
	pub fn add_context<C>(self, ctx: C) -> Self
	where
		C: fmt::Display + Send + Sync + 'static,
	{
		DatasetError {
			kind: self.kind,
			source: Arc::new(anyhow::anyhow!("{ctx}").context(self.source)),
		}
	}

	/// Returns the corresponding `DatasetErrorKind` for this error.
	pub fn kind(&self) -> DatasetErrorKind {
		self.kind
	}
}

impl From<io::Error> for DatasetError {
	fn from(err: io::Error) -> DatasetError {
		match err.kind() {
			io::ErrorKind::NotFound =>
				DatasetError::new(DatasetErrorKind::NotFound, Arc::new(err.into())),
			_ => DatasetError::new(DatasetErrorKind::Io, Arc::new(err.into())),
		}
	}
}

impl From<csv::Error> for DatasetError {
	fn from(err: csv::Error) -> DatasetError {
		DatasetError::new(DatasetErrorKind::Csv, Arc::new(err.into()))
	}
}

impl From<candle_core::Error> for DatasetError {
	fn from(err: candle_core::Error) -> DatasetError {
		DatasetError::new(DatasetErrorKind::Tensor, Arc::new(err.into()))
	}
}
