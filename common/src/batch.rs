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

use std::iter::FusedIterator;

/// Lazily yields contiguous `(batch_start, batch_end)` windows covering `[start, end)`.
///
/// Every window is `batch_size` wide except possibly the last one. The iterator is a pure
/// function of its inputs, so cloning it restarts the sequence from the clone point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRangeIter {
	next_start: usize,
	end: usize,
	batch_size: usize,
}

/// Builds a [`BatchRangeIter`] over `[start, end)`.
///
/// # Panics
///
/// Panics if `batch_size` is zero.
pub fn batched_range_iter(start: usize, end: usize, batch_size: usize) -> BatchRangeIter {
	assert!(batch_size > 0, "batch size must be greater than zero");
	BatchRangeIter { next_start: start, end, batch_size }
}

impl BatchRangeIter {
	fn remaining(&self) -> usize {
		if self.next_start >= self.end {
			0
		} else {
			(self.end - self.next_start).div_ceil(self.batch_size)
		}
	}
}

impl Iterator for BatchRangeIter {
	type Item = (usize, usize);

	fn next(&mut self) -> Option<Self::Item> {
		if self.next_start >= self.end {
			return None;
		}
		let batch_start = self.next_start;
		let batch_end = batch_start.saturating_add(self.batch_size).min(self.end);
		self.next_start = batch_end;
		Some((batch_start, batch_end))
	}

	fn size_hint(&self) -> (usize, Option<usize>) {
		let remaining = self.remaining();
		(remaining, Some(remaining))
	}
}

impl ExactSizeIterator for BatchRangeIter {}

impl FusedIterator for BatchRangeIter {}
