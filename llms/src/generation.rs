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

/// Length limits for greedy decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationSettings {
	/// Maximum number of tokens produced after the decoder start token.
	pub max_new_tokens: usize,
	/// Upper bound on the full sequence length, decoder start token included.
	pub max_length: usize,
}

impl GenerationSettings {
	pub fn new(max_new_tokens: usize, max_length: usize) -> Self {
		Self { max_new_tokens, max_length }
	}

	/// Both limits set to `max_length`.
	pub fn with_max_length(max_length: usize) -> Self {
		Self::new(max_length, max_length)
	}

	/// Number of decoding steps after the start token.
	pub fn max_steps(&self) -> usize {
		self.max_new_tokens.min(self.max_length.saturating_sub(1))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_max_steps_respects_both_limits() {
		assert_eq!(GenerationSettings::new(10, 2048).max_steps(), 10);
		assert_eq!(GenerationSettings::new(2048, 2048).max_steps(), 2047);
		assert_eq!(GenerationSettings::with_max_length(1).max_steps(), 0);
		assert_eq!(GenerationSettings::with_max_length(0).max_steps(), 0);
	}
}
