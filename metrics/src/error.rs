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
use std::{fmt, sync::Arc};
use thiserror::Error;

/// Metric error kind.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum MetricsErrorKind {
	/// Unknown metric name.
	Configuration,
	/// Predictions and references do not pair up.
	LengthMismatch,
}

/// Generic MetricsError.
#[derive(Debug, Clone, Error)]
#[error("metrics error(kind={kind:?}, source={source})")]
#[allow(missing_docs)]
pub struct MetricsError {
	pub kind: MetricsErrorKind,
	#[source]
	pub source: Arc<anyhow::Error>,
}

/// Generic Result type for metric computations.
pub type MetricsResult<T> = Result<T, MetricsError>;

impl MetricsError {
	pub fn new(kind: MetricsErrorKind, source: Arc<anyhow::Error>) -> Self {
		MetricsError { kind, source }
	}

	/// Add some context to the wrapper error.
	pub fn add_context<C>(self, ctx: C) -> Self
	where
		C: fmt::Display + Send + Sync + 'static,
	{
		MetricsError {
			kind: self.kind,
			source: Arc::new(anyhow::anyhow!("{ctx}").context(self.source)),
		}
	}

	pub fn kind(&self) -> MetricsErrorKind {
		self.kind
	}
}
