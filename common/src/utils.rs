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

use colored::Color;
use std::path::PathBuf;

pub const RED_COLOR: Color = Color::TrueColor { r: 230, g: 0, b: 34 };

/// Directory used to cache hub downloads (tokenizers, configs, weights).
pub fn get_soq_data_path() -> PathBuf {
	let data_path = dirs::data_dir().unwrap_or_else(std::env::temp_dir);
	data_path.join("soq_data")
}
