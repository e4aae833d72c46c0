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

use crate::{
	default_device,
	transformers::{
		modelling_outputs::Seq2SeqLMOutput,
		t5::t5_model_functions::{T5Config, T5ForConditionalGeneration, DTYPE},
	},
	GenerationSettings, LLMError, LLMErrorKind, LLMResult, Seq2SeqGenerator,
};
use candle_core::{Device, Tensor, Var};
use candle_nn::{VarBuilder, VarMap};
use std::{
	path::{Path, PathBuf},
	sync::Arc,
};
use tracing::info;

pub const CONFIG_FILE: &str = "config.json";
pub const SAFETENSORS_FILE: &str = "model.safetensors";
pub const PYTORCH_FILE: &str = "pytorch_model.bin";

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum WeightSource {
	Safetensors,
	Pytorch,
}

/// Where to load a T5 checkpoint from: a local directory or a hub repository id.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct T5Options {
	pub model: String,
	pub revision: Option<String>,
}

impl T5Options {
	pub fn new(model: impl Into<String>) -> Self {
		Self { model: model.into(), revision: None }
	}

	pub fn with_revision(mut self, revision: Option<String>) -> Self {
		self.revision = revision;
		self
	}
}

/// Resolved `config.json` and weight file of a checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct T5ModelFiles {
	pub config: PathBuf,
	pub weights: PathBuf,
	pub weight_source: WeightSource,
}

impl T5ModelFiles {
	pub fn resolve(options: &T5Options) -> LLMResult<Self> {
		let local_dir = Path::new(&options.model);
		if local_dir.is_dir() {
			return Self::from_local_dir(local_dir);
		}
		let revision = options.revision.as_deref();
		let config = common::resolve_model_file(&options.model, revision, CONFIG_FILE)
			.map_err(|e| LLMError::new(LLMErrorKind::Io, Arc::new(e)))?;
		let (weights, weight_source) =
			common::resolve_model_file(&options.model, revision, SAFETENSORS_FILE)
				.map(|weights| (weights, WeightSource::Safetensors))
				.or_else(|_| {
					common::resolve_model_file(&options.model, revision, PYTORCH_FILE)
						.map(|weights| (weights, WeightSource::Pytorch))
				})
				.map_err(|e| {
					LLMError::new(
						LLMErrorKind::Io,
						Arc::new(anyhow::anyhow!("could not fetch model weights: {}", e)),
					)
				})?;
		Ok(Self { config, weights, weight_source })
	}

	pub fn from_local_dir(local_dir: &Path) -> LLMResult<Self> {
		let config = local_dir.join(CONFIG_FILE);
		if !config.is_file() {
			return Err(LLMError::new(
				LLMErrorKind::Configuration,
				Arc::new(anyhow::anyhow!(
					"no {} in model directory {}",
					CONFIG_FILE,
					local_dir.display()
				)),
			));
		}
		let safetensors_path = local_dir.join(SAFETENSORS_FILE);
		let pytorch_path = local_dir.join(PYTORCH_FILE);
		let (weights, weight_source) = if safetensors_path.is_file() {
			(safetensors_path, WeightSource::Safetensors)
		} else if pytorch_path.is_file() {
			(pytorch_path, WeightSource::Pytorch)
		} else {
			return Err(LLMError::new(
				LLMErrorKind::Configuration,
				Arc::new(anyhow::anyhow!(
					"could not find model weights in local directory {}",
					local_dir.display()
				)),
			));
		};
		Ok(Self { config, weights, weight_source })
	}

	pub fn read_config(&self) -> LLMResult<T5Config> {
		let config = std::fs::read_to_string(&self.config).map_err(|inner| {
			LLMError::new(
				LLMErrorKind::Io,
				Arc::new(anyhow::anyhow!("could not read {}: {}", self.config.display(), inner)),
			)
		})?;
		let config: T5Config = serde_json::from_str(&config).map_err(|inner| {
			LLMError::new(
				LLMErrorKind::Configuration,
				Arc::new(anyhow::anyhow!("could not parse {}: {}", self.config.display(), inner)),
			)
		})?;
		config.feed_forward().map_err(|e| {
			LLMError::new(LLMErrorKind::Configuration, Arc::new(e.into()))
		})?;
		Ok(config)
	}
}

fn model_error(context: &str, error: candle_core::Error) -> LLMError {
	LLMError::new(LLMErrorKind::ModelError, Arc::new(anyhow::anyhow!("{}: {}", context, error)))
}

/// A T5 encoder-decoder ready for generation, optionally backed by trainable variables.
pub struct T5LLM {
	model: T5ForConditionalGeneration,
	/// Present when the weights live in trainable variables.
	varmap: Option<VarMap>,
	device: Device,
}

impl T5LLM {
	/// Loads frozen weights for inference.
	pub fn load(options: &T5Options) -> LLMResult<Self> {
		let device = default_device();
		let files = T5ModelFiles::resolve(options)?;
		let config = files.read_config()?;
		let vb = match files.weight_source {
			WeightSource::Pytorch => VarBuilder::from_pth(&files.weights, DTYPE, &device)
				.map_err(|e| {
					LLMError::new(
						LLMErrorKind::PyTorch,
						Arc::new(anyhow::anyhow!("could not load PyTorch weights: {}", e)),
					)
				})?,
			WeightSource::Safetensors => unsafe {
				VarBuilder::from_mmaped_safetensors(&[files.weights.clone()], DTYPE, &device)
					.map_err(|e| {
						LLMError::new(
							LLMErrorKind::SafeTensors,
							Arc::new(anyhow::anyhow!("could not load SafeTensors weights: {}", e)),
						)
					})?
			},
		};
		let model = T5ForConditionalGeneration::load(vb, &config)
			.map_err(|e| model_error("could not load model", e))?;
		info!(
			model = %options.model,
			weights = %files.weights.display(),
			?device,
			"loaded t5 model"
		);
		Ok(Self { model, varmap: None, device })
	}

	/// Loads weights into trainable variables. Only safetensors checkpoints can be fine-tuned.
	pub fn load_trainable(options: &T5Options) -> LLMResult<Self> {
		let device = default_device();
		let files = T5ModelFiles::resolve(options)?;
		if files.weight_source != WeightSource::Safetensors {
			return Err(LLMError::new(
				LLMErrorKind::Configuration,
				Arc::new(anyhow::anyhow!(
					"fine-tuning needs {} weights, found {}",
					SAFETENSORS_FILE,
					files.weights.display()
				)),
			));
		}
		let config = files.read_config()?;
		let mut this = Self::from_config(&config, device)?;
		if let Some(varmap) = this.varmap.as_mut() {
			varmap.load(&files.weights).map_err(|e| {
				LLMError::new(
					LLMErrorKind::SafeTensors,
					Arc::new(anyhow::anyhow!("could not load SafeTensors weights: {}", e)),
				)
			})?;
		}
		info!(model = %options.model, device = ?this.device, "loaded trainable t5 model");
		Ok(this)
	}

	/// Builds a randomly initialised trainable model.
	pub fn from_config(config: &T5Config, device: Device) -> LLMResult<Self> {
		let varmap = VarMap::new();
		let vb = VarBuilder::from_varmap(&varmap, DTYPE, &device);
		let model = T5ForConditionalGeneration::load(vb, config)
			.map_err(|e| model_error("could not build model", e))?;
		Ok(Self { model, varmap: Some(varmap), device })
	}

	pub fn config(&self) -> &T5Config {
		self.model.config()
	}

	pub fn model(&self) -> &T5ForConditionalGeneration {
		&self.model
	}

	/// Trainable variables with their checkpoint names, sorted by name. Empty for frozen models.
	pub fn named_trainable_vars(&self) -> LLMResult<Vec<(String, Var)>> {
		let Some(varmap) = &self.varmap else {
			return Ok(Vec::new());
		};
		let data = varmap.data().lock().map_err(|_| {
			LLMError::new(
				LLMErrorKind::ModelError,
				Arc::new(anyhow::anyhow!("trainable variables are poisoned")),
			)
		})?;
		let mut vars: Vec<(String, Var)> =
			data.iter().map(|(name, var)| (name.clone(), var.clone())).collect();
		vars.sort_by(|a, b| a.0.cmp(&b.0));
		Ok(vars)
	}

	pub fn forward(
		&self,
		input_ids: &Tensor,
		attention_mask: &Tensor,
		decoder_input_ids: &Tensor,
		labels: Option<(&Tensor, &Tensor)>,
		train: bool,
	) -> LLMResult<Seq2SeqLMOutput> {
		self.model
			.forward(input_ids, attention_mask, decoder_input_ids, labels, train)
			.map_err(|e| model_error("forward pass failed", e))
	}

	/// Writes `model.safetensors` and `config.json` into `dir`.
	pub fn save(&self, dir: &Path) -> LLMResult<()> {
		let Some(varmap) = &self.varmap else {
			return Err(LLMError::new(
				LLMErrorKind::Configuration,
				Arc::new(anyhow::anyhow!("only trainable models can be saved")),
			));
		};
		std::fs::create_dir_all(dir)?;
		varmap.save(dir.join(SAFETENSORS_FILE)).map_err(|e| {
			LLMError::new(
				LLMErrorKind::SafeTensors,
				Arc::new(anyhow::anyhow!("could not write weights to {}: {}", dir.display(), e)),
			)
		})?;
		let config = serde_json::to_string_pretty(self.config())?;
		std::fs::write(dir.join(CONFIG_FILE), config)?;
		Ok(())
	}
}

impl Seq2SeqGenerator for T5LLM {
	fn device(&self) -> &Device {
		&self.device
	}

	fn generate(
		&self,
		input_ids: &Tensor,
		attention_mask: &Tensor,
		settings: &GenerationSettings,
	) -> LLMResult<Vec<Vec<u32>>> {
		self.model
			.generate_greedy(input_ids, attention_mask, settings)
			.map_err(|e| model_error("generation failed", e))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_save_then_load_from_local_dir() {
		let dir = tempfile::tempdir().unwrap();
		let config = T5Config::tiny(20);
		let trained = T5LLM::from_config(&config, Device::Cpu).unwrap();
		trained.save(dir.path()).unwrap();

		let options = T5Options::new(dir.path().to_string_lossy());
		let files = T5ModelFiles::resolve(&options).unwrap();
		assert_eq!(files.weight_source, WeightSource::Safetensors);
		assert_eq!(files.read_config().unwrap(), config);

		let frozen = T5LLM::load(&options).unwrap();
		assert!(frozen.named_trainable_vars().unwrap().is_empty());
		let reloaded = T5LLM::load_trainable(&options).unwrap();
		let names = |model: &T5LLM| -> Vec<String> {
			model.named_trainable_vars().unwrap().into_iter().map(|(name, _)| name).collect()
		};
		assert_eq!(names(&reloaded), names(&trained));
		assert!(names(&reloaded).contains(&"encoder.final_layer_norm.weight".to_string()));

		let settings = GenerationSettings::new(3, 16);
		let generate = |model: &T5LLM| {
			let input_ids = Tensor::new(&[[5u32, 6, 1]], model.device()).unwrap();
			let attention_mask = Tensor::new(&[[1u32, 1, 1]], model.device()).unwrap();
			model.generate(&input_ids, &attention_mask, &settings).unwrap()
		};
		assert_eq!(generate(&reloaded), generate(&trained));
	}

	#[test]
	fn test_local_dir_without_weights_is_rejected() {
		let dir = tempfile::tempdir().unwrap();
		std::fs::write(
			dir.path().join(CONFIG_FILE),
			serde_json::to_string(&T5Config::tiny(20)).unwrap(),
		)
		.unwrap();
		let err = T5ModelFiles::from_local_dir(dir.path()).unwrap_err();
		assert_eq!(err.kind(), LLMErrorKind::Configuration);
	}

	#[test]
	fn test_frozen_model_cannot_be_saved() {
		let dir = tempfile::tempdir().unwrap();
		let trained = T5LLM::from_config(&T5Config::tiny(20), Device::Cpu).unwrap();
		trained.save(dir.path()).unwrap();
		let frozen = T5LLM::load(&T5Options::new(dir.path().to_string_lossy())).unwrap();
		assert!(frozen.save(&dir.path().join("copy")).is_err());
	}
}
