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

use candle_core::{backprop::GradStore, Tensor, Var};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use common::TrainingHyperparameters;
use tracing::debug;

use crate::{EngineError, EngineResult};

const CLIP_EPSILON: f64 = 1e-6;

/// Learning rate for optimizer step `step` (0-based): linear warmup, then linear decay to zero
/// at `total_steps`.
pub fn linear_schedule(base_lr: f64, step: usize, warmup_steps: usize, total_steps: usize) -> f64 {
	if step < warmup_steps {
		return base_lr * step as f64 / warmup_steps.max(1) as f64;
	}
	let remaining = total_steps.saturating_sub(step) as f64;
	let decay_steps = total_steps.saturating_sub(warmup_steps).max(1) as f64;
	base_lr * (remaining / decay_steps).max(0.0)
}

/// Scales every gradient in `grads` so their global L2 norm is at most `max_norm`.
///
/// Returns the norm before clipping. A non-positive `max_norm` only measures.
pub fn clip_grad_norm(
	grads: &mut GradStore,
	vars: &[Var],
	max_norm: f64,
) -> candle_core::Result<f64> {
	let mut squared = 0f64;
	for var in vars {
		if let Some(grad) = grads.get(var.as_tensor()) {
			squared += grad.sqr()?.sum_all()?.to_scalar::<f32>()? as f64;
		}
	}
	let norm = squared.sqrt();
	if max_norm > 0.0 && norm > max_norm {
		let coefficient = max_norm / (norm + CLIP_EPSILON);
		for var in vars {
			let scaled = match grads.get(var.as_tensor()) {
				Some(grad) => (grad * coefficient)?,
				None => continue,
			};
			grads.insert(var.as_tensor(), scaled);
		}
	}
	Ok(norm)
}

/// Layer-norm scales are optimized without weight decay.
pub fn is_decay_exempt(name: &str) -> bool {
	name.ends_with("layer_norm.weight")
}

/// AdamW over two parameter groups with a linear learning-rate schedule and global gradient
/// clipping.
pub struct TrainingOptimizer {
	decay: AdamW,
	no_decay: AdamW,
	vars: Vec<Var>,
	base_lr: f64,
	warmup_steps: usize,
	total_steps: usize,
	max_grad_norm: f64,
	step: usize,
}

impl TrainingOptimizer {
	pub fn new(
		named_vars: Vec<(String, Var)>,
		hyperparameters: &TrainingHyperparameters,
		total_steps: usize,
	) -> EngineResult<Self> {
		if named_vars.is_empty() {
			return Err(EngineError::configuration("the model has no trainable variables"));
		}
		let vars: Vec<Var> = named_vars.iter().map(|(_, var)| var.clone()).collect();
		let (exempt, decayed): (Vec<_>, Vec<_>) =
			named_vars.into_iter().partition(|(name, _)| is_decay_exempt(name));
		debug!(decayed = decayed.len(), exempt = exempt.len(), "built parameter groups");
		let params = ParamsAdamW {
			lr: linear_schedule(
				hyperparameters.learning_rate,
				0,
				hyperparameters.warmup_steps,
				total_steps,
			),
			beta1: hyperparameters.adam_beta1,
			beta2: hyperparameters.adam_beta2,
			eps: hyperparameters.adam_epsilon,
			weight_decay: hyperparameters.weight_decay,
		};
		let decay = AdamW::new(decayed.into_iter().map(|(_, var)| var).collect(), params.clone())?;
		let no_decay = AdamW::new(
			exempt.into_iter().map(|(_, var)| var).collect(),
			ParamsAdamW { weight_decay: 0.0, ..params },
		)?;
		Ok(Self {
			decay,
			no_decay,
			vars,
			base_lr: hyperparameters.learning_rate,
			warmup_steps: hyperparameters.warmup_steps,
			total_steps,
			max_grad_norm: hyperparameters.max_grad_norm,
			step: 0,
		})
	}

	/// Rate the next step will use.
	pub fn learning_rate(&self) -> f64 {
		linear_schedule(self.base_lr, self.step, self.warmup_steps, self.total_steps)
	}

	pub fn steps(&self) -> usize {
		self.step
	}

	/// Backpropagates `loss`, clips, and updates both groups. Returns the pre-clip norm.
	pub fn backward_step(&mut self, loss: &Tensor) -> EngineResult<f64> {
		let mut grads = loss.backward()?;
		let norm = clip_grad_norm(&mut grads, &self.vars, self.max_grad_norm)?;
		let lr = self.learning_rate();
		self.decay.set_learning_rate(lr);
		self.no_decay.set_learning_rate(lr);
		self.decay.step(&grads)?;
		self.no_decay.step(&grads)?;
		self.step += 1;
		Ok(norm)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use candle_core::{DType, Device};

	fn hyperparameters() -> TrainingHyperparameters {
		TrainingHyperparameters { learning_rate: 0.1, ..TrainingHyperparameters::default() }
	}

	#[test]
	fn test_linear_schedule_decays_to_zero() {
		assert_eq!(linear_schedule(4e-5, 0, 0, 10), 4e-5);
		assert!((linear_schedule(4e-5, 5, 0, 10) - 2e-5).abs() < 1e-12);
		assert!((linear_schedule(4e-5, 9, 0, 10) - 4e-6).abs() < 1e-12);
		assert_eq!(linear_schedule(4e-5, 10, 0, 10), 0.0);
		assert_eq!(linear_schedule(4e-5, 12, 0, 10), 0.0);
	}

	#[test]
	fn test_linear_schedule_warmup() {
		assert_eq!(linear_schedule(1.0, 0, 4, 12), 0.0);
		assert_eq!(linear_schedule(1.0, 2, 4, 12), 0.5);
		assert_eq!(linear_schedule(1.0, 4, 4, 12), 1.0);
		assert_eq!(linear_schedule(1.0, 8, 4, 12), 0.5);
	}

	#[test]
	fn test_clip_grad_norm_scales_to_max() {
		let var = Var::zeros(4, DType::F32, &Device::Cpu).unwrap();
		let loss = (var.as_tensor() * 10.0).unwrap().sum_all().unwrap();
		let mut grads = loss.backward().unwrap();
		let vars = vec![var.clone()];
		let norm = clip_grad_norm(&mut grads, &vars, 1.0).unwrap();
		assert!((norm - 20.0).abs() < 1e-4);
		let clipped = grads.get(var.as_tensor()).unwrap().to_vec1::<f32>().unwrap();
		for value in &clipped {
			assert!((value - 0.5).abs() < 1e-4);
		}
		let mut grads = loss.backward().unwrap();
		assert!((clip_grad_norm(&mut grads, &vars, 0.0).unwrap() - 20.0).abs() < 1e-4);
		let unclipped = grads.get(var.as_tensor()).unwrap().to_vec1::<f32>().unwrap();
		assert_eq!(unclipped, vec![10.0; 4]);
	}

	#[test]
	fn test_small_gradients_are_not_scaled() {
		let var = Var::zeros(4, DType::F32, &Device::Cpu).unwrap();
		let loss = (var.as_tensor() * 0.1).unwrap().sum_all().unwrap();
		let mut grads = loss.backward().unwrap();
		clip_grad_norm(&mut grads, &[var.clone()], 1.0).unwrap();
		let values = grads.get(var.as_tensor()).unwrap().to_vec1::<f32>().unwrap();
		for value in values {
			assert!((value - 0.1).abs() < 1e-6);
		}
	}

	#[test]
	fn test_layer_norm_weights_are_exempt_from_decay() {
		assert!(is_decay_exempt("encoder.block.0.layer.0.layer_norm.weight"));
		assert!(is_decay_exempt("decoder.final_layer_norm.weight"));
		assert!(!is_decay_exempt("shared.weight"));
		assert!(!is_decay_exempt("encoder.block.0.layer.1.DenseReluDense.wi.weight"));
	}

	#[test]
	fn test_exempt_weights_skip_decay() {
		let decayed = Var::ones(2, DType::F32, &Device::Cpu).unwrap();
		let exempt = Var::ones(2, DType::F32, &Device::Cpu).unwrap();
		let hyperparameters = TrainingHyperparameters {
			weight_decay: 0.5,
			max_grad_norm: 0.0,
			..hyperparameters()
		};
		let mut optimizer = TrainingOptimizer::new(
			vec![
				("lm_head.weight".to_string(), decayed.clone()),
				("decoder.final_layer_norm.weight".to_string(), exempt.clone()),
			],
			&hyperparameters,
			4,
		)
		.unwrap();
		// A zero-gradient loss leaves only the decoupled decay.
		let loss = ((decayed.as_tensor() + exempt.as_tensor()).unwrap() * 0.0)
			.unwrap()
			.sum_all()
			.unwrap();
		optimizer.backward_step(&loss).unwrap();
		let decayed = decayed.as_tensor().to_vec1::<f32>().unwrap();
		let exempt = exempt.as_tensor().to_vec1::<f32>().unwrap();
		assert!((decayed[0] - 0.95).abs() < 1e-5);
		assert_eq!(exempt, vec![1.0, 1.0]);
	}

	#[test]
	fn test_learning_rate_follows_schedule_per_step() {
		let var = Var::ones(2, DType::F32, &Device::Cpu).unwrap();
		let named = vec![("shared.weight".to_string(), var.clone())];
		let mut optimizer = TrainingOptimizer::new(named, &hyperparameters(), 4).unwrap();
		let mut rates = Vec::new();
		for _ in 0..4 {
			rates.push(optimizer.learning_rate());
			let loss = var.as_tensor().sum_all().unwrap();
			optimizer.backward_step(&loss).unwrap();
		}
		assert_eq!(optimizer.steps(), 4);
		let expected = [0.1, 0.075, 0.05, 0.025];
		for (rate, expected) in rates.iter().zip(expected) {
			assert!((rate - expected).abs() < 1e-12);
		}
		assert_eq!(optimizer.learning_rate(), 0.0);
	}

	#[test]
	fn test_no_trainable_vars_is_rejected() {
		let err = TrainingOptimizer::new(Vec::new(), &hyperparameters(), 1).err().unwrap();
		assert_eq!(err.kind(), crate::EngineErrorKind::Configuration);
	}
}
