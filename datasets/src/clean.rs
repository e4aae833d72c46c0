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

use common::DatasetType;

/// XML-escaped `\r\n` as it appears in exported soq text.
pub const ESCAPED_CRLF: &str = "&#xD;&#xA;";

/// Replaces every escaped `\r\n` marker with a plain newline.
pub fn soq_clean_text(text: &str) -> String {
	text.replace(ESCAPED_CRLF, "\n")
}

/// Builds the encoder text for one raw input.
pub fn model_input_text(dataset_type: DatasetType, generation_prefix: &str, input: &str) -> String {
	match dataset_type {
		DatasetType::Local => format!("{generation_prefix}{input}"),
		DatasetType::Soq => format!("{generation_prefix}{}", soq_clean_text(input)),
	}
}

/// Builds the reference text for one raw output.
pub fn model_target_text(dataset_type: DatasetType, output: &str) -> String {
	match dataset_type {
		DatasetType::Local => output.to_string(),
		DatasetType::Soq => soq_clean_text(output),
	}
}
