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

use datasets::SoqTokenizer;
use llms::{T5LLM, CONFIG_FILE, SAFETENSORS_FILE};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
	fs,
	path::{Path, PathBuf},
};
use tracing::{debug, info};

use crate::EngineResult;

pub const TRAINER_STATE_FILE: &str = "trainer_state.json";
pub const TOKENIZER_FILE: &str = "tokenizer.json";
pub const CHECKPOINT_PREFIX: &str = "checkpoint-";

/// Files copied to the output root once training finishes.
const MODEL_FILES: &[&str] = &[SAFETENSORS_FILE, CONFIG_FILE, TOKENIZER_FILE, TRAINER_STATE_FILE];

/// Progress recorded next to every checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerState {
	pub epoch: usize,
	pub global_step: usize,
	pub train_loss: f64,
	pub eval_loss: f64,
	pub metrics: Value,
	pub best_metric: Option<f64>,
	pub best_model_checkpoint: Option<PathBuf>,
}

/// Writes per-epoch checkpoints, keeps the newest `save_total_limit` of them and tracks the
/// best one. A limit of zero keeps everything. The best checkpoint survives rotation, so one
/// more directory than the limit may remain on disk.
#[derive(Debug)]
pub struct CheckpointManager {
	output_dir: PathBuf,
	save_total_limit: usize,
	checkpoints: Vec<PathBuf>,
	best: Option<(PathBuf, f64)>,
}

impl CheckpointManager {
	pub fn new(output_dir: impl Into<PathBuf>, save_total_limit: usize) -> Self {
		Self {
			output_dir: output_dir.into(),
			save_total_limit,
			checkpoints: Vec::new(),
			best: None,
		}
	}

	pub fn output_dir(&self) -> &Path {
		&self.output_dir
	}

	/// Checkpoints still on disk, oldest first.
	pub fn checkpoints(&self) -> &[PathBuf] {
		&self.checkpoints
	}

	pub fn best(&self) -> Option<(&Path, f64)> {
		self.best.as_ref().map(|(path, score)| (path.as_path(), *score))
	}

	pub fn checkpoint_dir(&self, global_step: usize) -> PathBuf {
		self.output_dir.join(format!("{CHECKPOINT_PREFIX}{global_step}"))
	}

	/// Saves model, tokenizer and state under `checkpoint-<global_step>`, then rotates.
	pub fn save(
		&mut self,
		model: &T5LLM,
		tokenizer: &SoqTokenizer,
		mut state: TrainerState,
		score: f64,
	) -> EngineResult<PathBuf> {
		let dir = self.checkpoint_dir(state.global_step);
		model.save(&dir)?;
		tokenizer.save(&dir.join(TOKENIZER_FILE))?;
		self.register(dir.clone(), score)?;
		if let Some((best_dir, best_score)) = self.best() {
			state.best_metric = Some(best_score);
			state.best_model_checkpoint = Some(best_dir.to_path_buf());
		}
		fs::write(dir.join(TRAINER_STATE_FILE), serde_json::to_string_pretty(&state)?)?;
		info!(checkpoint = %dir.display(), score, "saved checkpoint");
		Ok(dir)
	}

	/// Records a written checkpoint. A later checkpoint only becomes the best on a strictly
	/// higher score.
	pub fn register(&mut self, dir: PathBuf, score: f64) -> EngineResult<()> {
		let improves = match &self.best {
			Some((_, best)) => score > *best,
			None => !score.is_nan(),
		};
		if improves {
			self.best = Some((dir.clone(), score));
		}
		self.checkpoints.push(dir);
		self.rotate()
	}

	fn rotate(&mut self) -> EngineResult<()> {
		if self.save_total_limit == 0 {
			return Ok(());
		}
		let best = self.best.as_ref().map(|(path, _)| path.clone());
		while self.checkpoints.len() > self.save_total_limit {
			// The newest checkpoint and the best one are never removed.
			let newest = self.checkpoints.len() - 1;
			let Some(position) =
				self.checkpoints[..newest].iter().position(|dir| Some(dir) != best.as_ref())
			else {
				break;
			};
			let stale = self.checkpoints.remove(position);
			if stale.exists() {
				fs::remove_dir_all(&stale)?;
			}
			debug!(checkpoint = %stale.display(), "deleted older checkpoint");
		}
		Ok(())
	}

	/// Copies the best checkpoint's files into the output root.
	pub fn finalize(&self) -> EngineResult<Option<PathBuf>> {
		let Some((best_dir, _)) = &self.best else {
			return Ok(None);
		};
		fs::create_dir_all(&self.output_dir)?;
		for file in MODEL_FILES {
			let source = best_dir.join(file);
			if source.is_file() {
				fs::copy(&source, self.output_dir.join(file))?;
			}
		}
		info!(best = %best_dir.display(), output = %self.output_dir.display(), "copied best model");
		Ok(Some(best_dir.clone()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn fake_checkpoint(manager: &mut CheckpointManager, step: usize, score: f64) -> PathBuf {
		let dir = manager.checkpoint_dir(step);
		fs::create_dir_all(&dir).unwrap();
		fs::write(dir.join(CONFIG_FILE), format!("{{\"step\": {step}}}")).unwrap();
		manager.register(dir.clone(), score).unwrap();
		dir
	}

	#[test]
	fn test_rotation_keeps_recent_and_best() {
		let root = tempfile::tempdir().unwrap();
		let mut manager = CheckpointManager::new(root.path(), 3);
		let first = fake_checkpoint(&mut manager, 10, 50.0);
		let second = fake_checkpoint(&mut manager, 20, 10.0);
		let third = fake_checkpoint(&mut manager, 30, 20.0);
		let fourth = fake_checkpoint(&mut manager, 40, 30.0);
		let fifth = fake_checkpoint(&mut manager, 50, 40.0);

		assert!(first.exists());
		assert!(!second.exists());
		assert!(!third.exists());
		assert!(fourth.exists() && fifth.exists());
		assert_eq!(manager.checkpoints(), &[first.clone(), fourth, fifth]);
		assert_eq!(manager.best(), Some((first.as_path(), 50.0)));
	}

	#[test]
	fn test_ties_keep_the_earlier_best() {
		let root = tempfile::tempdir().unwrap();
		let mut manager = CheckpointManager::new(root.path(), 0);
		let first = fake_checkpoint(&mut manager, 1, 5.0);
		fake_checkpoint(&mut manager, 2, 5.0);
		assert_eq!(manager.best().map(|(path, _)| path.to_path_buf()), Some(first));
		assert_eq!(manager.checkpoints().len(), 2);
	}

	#[test]
	fn test_limit_of_one_keeps_latest_and_best() {
		let root = tempfile::tempdir().unwrap();
		let mut manager = CheckpointManager::new(root.path(), 1);
		let first = fake_checkpoint(&mut manager, 1, 7.0);
		let second = fake_checkpoint(&mut manager, 2, 1.0);
		let third = fake_checkpoint(&mut manager, 3, 2.0);
		assert!(!second.exists());
		assert_eq!(manager.checkpoints(), &[first, third]);
	}

	#[test]
	fn test_finalize_copies_best_files_to_root() {
		let root = tempfile::tempdir().unwrap();
		let mut manager = CheckpointManager::new(root.path(), 2);
		fake_checkpoint(&mut manager, 1, 1.0);
		let best = fake_checkpoint(&mut manager, 2, 9.0);
		fake_checkpoint(&mut manager, 3, 3.0);
		assert_eq!(manager.finalize().unwrap(), Some(best));
		let copied = fs::read_to_string(root.path().join(CONFIG_FILE)).unwrap();
		assert_eq!(copied, "{\"step\": 2}");
	}

	#[test]
	fn test_finalize_without_checkpoints() {
		let root = tempfile::tempdir().unwrap();
		let manager = CheckpointManager::new(root.path().join("out"), 3);
		assert_eq!(manager.finalize().unwrap(), None);
	}
}
