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

pub mod cli_main;
pub use cli_main::*;
pub mod logger;
pub use logger::*;
pub mod train;
pub use train::*;
pub mod evaluate;
pub use evaluate::*;

use anyhow::Context;
use common::TrainingHyperparameters;
use std::path::Path;
use tracing::info;

/// Loads training hyperparameters from a YAML file. Missing keys keep their defaults.
pub fn load_hyperparameters(path: &Path) -> anyhow::Result<TrainingHyperparameters> {
	let content = std::fs::read(path)
		.with_context(|| format!("failed to read hyperparameter file at `{}`", path.display()))?;
	let hyperparameters: TrainingHyperparameters = serde_yaml::from_slice(&content)
		.with_context(|| format!("failed to parse hyperparameter YAML at `{}`", path.display()))?;
	info!(config = %path.display(), ?hyperparameters, "loaded hyperparameters");
	Ok(hyperparameters)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_load_hyperparameters_overrides_defaults() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("train.yaml");
		std::fs::write(&path, "num_train_epochs: 3\nsave_total_limit: 0\nseed: 7\n").unwrap();
		let hyperparameters = load_hyperparameters(&path).unwrap();
		assert_eq!(hyperparameters.num_train_epochs, 3);
		assert_eq!(hyperparameters.save_total_limit, 0);
		assert_eq!(hyperparameters.seed, 7);
		assert_eq!(hyperparameters.learning_rate, TrainingHyperparameters::default().learning_rate);
	}

	#[test]
	fn test_load_hyperparameters_errors() {
		let dir = tempfile::tempdir().unwrap();
		assert!(load_hyperparameters(&dir.path().join("missing.yaml")).is_err());
		let path = dir.path().join("bad.yaml");
		std::fs::write(&path, "epochs: 3\n").unwrap();
		let err = load_hyperparameters(&path).unwrap_err();
		assert!(format!("{err:#}").contains("failed to parse hyperparameter YAML"));
	}
}
