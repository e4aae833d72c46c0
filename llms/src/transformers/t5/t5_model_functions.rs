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

use candle_core::{DType, Device, Result, Tensor, D};
use candle_nn::{embedding, Dropout, Embedding, Init, Module, VarBuilder};
use candle_transformers::models::with_tracing::{linear_no_bias, Linear};
use serde::{Deserialize, Serialize};

use crate::{transformers::modelling_outputs::Seq2SeqLMOutput, GenerationSettings};

pub const DTYPE: DType = DType::F32;

/// Additive bias for masked attention positions.
pub const MASK_VALUE: f32 = -1e9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedForwardActivation {
	Relu,
	/// Exact (erf) gelu.
	Gelu,
	/// Tanh-approximated gelu.
	GeluNew,
	Silu,
}

impl FeedForwardActivation {
	fn parse(name: &str) -> Result<Self> {
		match name {
			"relu" => Ok(Self::Relu),
			"gelu" => Ok(Self::Gelu),
			"gelu_new" | "gelu_pytorch_tanh" => Ok(Self::GeluNew),
			"silu" | "swish" => Ok(Self::Silu),
			other => candle_core::bail!("unsupported feed forward activation `{other}`"),
		}
	}

	fn forward(&self, xs: &Tensor) -> Result<Tensor> {
		match self {
			Self::Relu => xs.relu(),
			Self::Gelu => xs.gelu_erf(),
			Self::GeluNew => xs.gelu(),
			Self::Silu => candle_nn::ops::silu(xs),
		}
	}
}

/// Parsed form of `feed_forward_proj`, e.g. `relu` or `gated-gelu`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedForwardProj {
	pub activation: FeedForwardActivation,
	pub gated: bool,
}

impl FeedForwardProj {
	pub fn parse(proj: &str) -> Result<Self> {
		// Legacy name of the T5 v1.1 feed forward.
		if proj == "gated-gelu" {
			return Ok(Self { activation: FeedForwardActivation::GeluNew, gated: true });
		}
		match proj.split_once('-') {
			Some(("gated", activation)) =>
				Ok(Self { activation: FeedForwardActivation::parse(activation)?, gated: true }),
			Some(_) => candle_core::bail!(
				"`{proj}` is not a valid feed_forward_proj, expected `gated-<act>` or `<act>`"
			),
			None => Ok(Self { activation: FeedForwardActivation::parse(proj)?, gated: false }),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct T5Config {
	pub vocab_size: usize,
	pub d_model: usize,
	pub d_kv: usize,
	pub d_ff: usize,
	pub num_layers: usize,
	#[serde(default)]
	pub num_decoder_layers: Option<usize>,
	pub num_heads: usize,
	#[serde(default = "T5Config::default_relative_attention_num_buckets")]
	pub relative_attention_num_buckets: usize,
	#[serde(default = "T5Config::default_relative_attention_max_distance")]
	pub relative_attention_max_distance: usize,
	#[serde(default = "T5Config::default_dropout_rate")]
	pub dropout_rate: f64,
	#[serde(default = "T5Config::default_layer_norm_epsilon")]
	pub layer_norm_epsilon: f64,
	#[serde(default = "T5Config::default_feed_forward_proj")]
	pub feed_forward_proj: String,
	#[serde(default = "T5Config::default_tie_word_embeddings")]
	pub tie_word_embeddings: bool,
	#[serde(default)]
	pub pad_token_id: usize,
	#[serde(default = "T5Config::default_eos_token_id")]
	pub eos_token_id: usize,
	#[serde(default)]
	pub decoder_start_token_id: Option<usize>,
	#[serde(default = "T5Config::default_model_type")]
	pub model_type: String,
}

impl T5Config {
	fn default_relative_attention_num_buckets() -> usize {
		32
	}

	fn default_relative_attention_max_distance() -> usize {
		128
	}

	fn default_dropout_rate() -> f64 {
		0.1
	}

	fn default_layer_norm_epsilon() -> f64 {
		1e-6
	}

	fn default_feed_forward_proj() -> String {
		"relu".to_string()
	}

	fn default_tie_word_embeddings() -> bool {
		true
	}

	fn default_eos_token_id() -> usize {
		1
	}

	fn default_model_type() -> String {
		"t5".to_string()
	}

	pub fn decoder_layers(&self) -> usize {
		self.num_decoder_layers.unwrap_or(self.num_layers)
	}

	/// T5 starts decoding from the pad token unless told otherwise.
	pub fn decoder_start_token_id(&self) -> u32 {
		self.decoder_start_token_id.unwrap_or(self.pad_token_id) as u32
	}

	pub fn feed_forward(&self) -> Result<FeedForwardProj> {
		FeedForwardProj::parse(&self.feed_forward_proj)
	}

	/// A two-layer model small enough for CPU tests.
	#[cfg(any(test, feature = "testsuite"))]
	pub fn tiny(vocab_size: usize) -> Self {
		Self {
			vocab_size,
			d_model: 16,
			d_kv: 4,
			d_ff: 32,
			num_layers: 2,
			num_decoder_layers: Some(2),
			num_heads: 4,
			relative_attention_num_buckets: 8,
			relative_attention_max_distance: 16,
			dropout_rate: 0.0,
			layer_norm_epsilon: 1e-6,
			feed_forward_proj: "relu".to_string(),
			tie_word_embeddings: true,
			pad_token_id: 0,
			eos_token_id: 1,
			decoder_start_token_id: None,
			model_type: Self::default_model_type(),
		}
	}
}

/// Maps a relative position (`key - query`) to one of `num_buckets` buckets.
///
/// Half of the buckets hold exact offsets, the rest grow logarithmically up to `max_distance`.
/// Bidirectional bucketing spends separate halves on positive and negative offsets; causal
/// bucketing only distinguishes keys at or before the query.
pub fn relative_position_bucket(
	relative_position: i64,
	bidirectional: bool,
	num_buckets: usize,
	max_distance: usize,
) -> u32 {
	let mut num_buckets = num_buckets as i64;
	let mut bucket = 0i64;
	let distance = if bidirectional {
		num_buckets /= 2;
		if relative_position > 0 {
			bucket += num_buckets;
		}
		relative_position.abs()
	} else {
		-relative_position.min(0)
	};
	let max_exact = num_buckets / 2;
	if distance < max_exact {
		bucket += distance;
	} else {
		let scaled = (distance as f32 / max_exact as f32).ln() /
			(max_distance as f32 / max_exact as f32).ln() *
			(num_buckets - max_exact) as f32;
		bucket += (max_exact + scaled as i64).min(num_buckets - 1);
	}
	bucket as u32
}

/// `(batch, 1, 1, src_len)` additive bias hiding padded encoder positions.
pub fn encoder_attention_bias(attention_mask: &Tensor) -> Result<Tensor> {
	let (batch, src_len) = attention_mask.dims2()?;
	attention_mask
		.to_dtype(DTYPE)?
		.affine(-(MASK_VALUE as f64), MASK_VALUE as f64)?
		.reshape((batch, 1, 1, src_len))
}

/// `(1, 1, len, len)` additive bias hiding future decoder positions.
pub fn causal_attention_bias(len: usize, device: &Device) -> Result<Tensor> {
	let bias: Vec<f32> = (0..len)
		.flat_map(|i| (0..len).map(move |j| if j > i { MASK_VALUE } else { 0.0 }))
		.collect();
	Tensor::from_vec(bias, (1, 1, len, len), device)
}

/// Mean negative log likelihood of `labels` over the positions where `label_mask` is 1.
///
/// Returns zero when no position counts.
pub fn masked_cross_entropy(
	logits: &Tensor,
	labels: &Tensor,
	label_mask: &Tensor,
) -> Result<Tensor> {
	let count = label_mask.sum_all()?.to_scalar::<f32>()?;
	if count == 0.0 {
		return Tensor::zeros((), DTYPE, logits.device());
	}
	let log_probs = candle_nn::ops::log_softmax(logits, D::Minus1)?;
	let picked = log_probs.gather(&labels.unsqueeze(D::Minus1)?.contiguous()?, D::Minus1)?;
	let picked = picked.squeeze(D::Minus1)?;
	let total = (picked * label_mask)?.sum_all()?;
	total.neg()? / count as f64
}

/// Root mean square layer norm without mean subtraction or bias.
struct T5LayerNorm {
	weight: Tensor,
	variance_epsilon: f64,
	span: tracing::Span,
}

impl T5LayerNorm {
	fn load(size: usize, eps: f64, vb: VarBuilder) -> Result<Self> {
		let weight = vb.get_with_hints(size, "weight", Init::Const(1.0))?;
		let span = tracing::span!(tracing::Level::TRACE, "layer-norm");
		Ok(Self { weight, variance_epsilon: eps, span })
	}
}

impl Module for T5LayerNorm {
	fn forward(&self, xs: &Tensor) -> Result<Tensor> {
		let _enter = self.span.enter();
		let dtype = xs.dtype();
		let xs_f32 = xs.to_dtype(DType::F32)?;
		let variance = xs_f32.sqr()?.mean_keepdim(D::Minus1)?;
		let xs = xs_f32.broadcast_div(&(variance + self.variance_epsilon)?.sqrt()?)?;
		xs.to_dtype(dtype)?.broadcast_mul(&self.weight)
	}
}

struct T5DenseFeedForward {
	wi_0: Linear,
	wi_1: Option<Linear>,
	wo: Linear,
	activation: FeedForwardActivation,
	dropout: Dropout,
	span: tracing::Span,
}

impl T5DenseFeedForward {
	fn load(vb: VarBuilder, config: &T5Config) -> Result<Self> {
		let proj = config.feed_forward()?;
		let (wi_0, wi_1) = if proj.gated {
			(
				linear_no_bias(config.d_model, config.d_ff, vb.pp("wi_0"))?,
				Some(linear_no_bias(config.d_model, config.d_ff, vb.pp("wi_1"))?),
			)
		} else {
			(linear_no_bias(config.d_model, config.d_ff, vb.pp("wi"))?, None)
		};
		let wo = linear_no_bias(config.d_ff, config.d_model, vb.pp("wo"))?;
		Ok(Self {
			wi_0,
			wi_1,
			wo,
			activation: proj.activation,
			dropout: Dropout::new(config.dropout_rate as f32),
			span: tracing::span!(tracing::Level::TRACE, "dense-ff"),
		})
	}

	fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
		let _enter = self.span.enter();
		let mut hidden = self.activation.forward(&self.wi_0.forward(xs)?)?;
		if let Some(wi_1) = &self.wi_1 {
			hidden = (hidden * wi_1.forward(xs)?)?;
		}
		let hidden = self.dropout.forward(&hidden, train)?;
		self.wo.forward(&hidden)
	}
}

struct T5LayerFF {
	dense: T5DenseFeedForward,
	layer_norm: T5LayerNorm,
	dropout: Dropout,
}

impl T5LayerFF {
	fn load(vb: VarBuilder, config: &T5Config) -> Result<Self> {
		Ok(Self {
			dense: T5DenseFeedForward::load(vb.pp("DenseReluDense"), config)?,
			layer_norm: T5LayerNorm::load(
				config.d_model,
				config.layer_norm_epsilon,
				vb.pp("layer_norm"),
			)?,
			dropout: Dropout::new(config.dropout_rate as f32),
		})
	}

	fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
		let hidden = self.dense.forward_t(&self.layer_norm.forward(xs)?, train)?;
		xs + self.dropout.forward(&hidden, train)?
	}
}

struct T5Attention {
	q: Linear,
	k: Linear,
	v: Linear,
	o: Linear,
	num_heads: usize,
	d_kv: usize,
	relative_attention_bias: Option<Embedding>,
	num_buckets: usize,
	max_distance: usize,
	bidirectional: bool,
	dropout: Dropout,
	span: tracing::Span,
	span_softmax: tracing::Span,
}

impl T5Attention {
	fn load(
		has_relative_attention_bias: bool,
		bidirectional: bool,
		vb: VarBuilder,
		config: &T5Config,
	) -> Result<Self> {
		let inner_dim = config.num_heads * config.d_kv;
		let relative_attention_bias = if has_relative_attention_bias {
			Some(embedding(
				config.relative_attention_num_buckets,
				config.num_heads,
				vb.pp("relative_attention_bias"),
			)?)
		} else {
			None
		};
		Ok(Self {
			q: linear_no_bias(config.d_model, inner_dim, vb.pp("q"))?,
			k: linear_no_bias(config.d_model, inner_dim, vb.pp("k"))?,
			v: linear_no_bias(config.d_model, inner_dim, vb.pp("v"))?,
			o: linear_no_bias(inner_dim, config.d_model, vb.pp("o"))?,
			num_heads: config.num_heads,
			d_kv: config.d_kv,
			relative_attention_bias,
			num_buckets: config.relative_attention_num_buckets,
			max_distance: config.relative_attention_max_distance,
			bidirectional,
			dropout: Dropout::new(config.dropout_rate as f32),
			span: tracing::span!(tracing::Level::TRACE, "attention"),
			span_softmax: tracing::span!(tracing::Level::TRACE, "softmax"),
		})
	}

	/// `(1, num_heads, q_len, k_len)` learned relative position bias.
	fn compute_bias(&self, q_len: usize, k_len: usize, device: &Device) -> Result<Tensor> {
		let Some(relative_attention_bias) = &self.relative_attention_bias else {
			candle_core::bail!("attention layer has no relative attention bias")
		};
		let buckets: Vec<u32> = (0..q_len)
			.flat_map(|query| {
				(0..k_len).map(move |key| {
					relative_position_bucket(
						key as i64 - query as i64,
						self.bidirectional,
						self.num_buckets,
						self.max_distance,
					)
				})
			})
			.collect();
		let buckets = Tensor::from_vec(buckets, (q_len, k_len), device)?;
		relative_attention_bias.forward(&buckets)?.permute((2, 0, 1))?.unsqueeze(0)
	}

	fn split_heads(&self, xs: &Tensor) -> Result<Tensor> {
		let (batch, len, _) = xs.dims3()?;
		xs.reshape((batch, len, self.num_heads, self.d_kv))?.transpose(1, 2)?.contiguous()
	}

	/// Attends from `xs` to `key_value_states` (or to `xs` itself), adding `bias` to the scores.
	fn forward_t(
		&self,
		xs: &Tensor,
		key_value_states: Option<&Tensor>,
		bias: &Tensor,
		train: bool,
	) -> Result<Tensor> {
		let _enter = self.span.enter();
		let (batch, q_len, _) = xs.dims3()?;
		let key_value_states = key_value_states.unwrap_or(xs);
		let query = self.split_heads(&self.q.forward(xs)?)?;
		let key = self.split_heads(&self.k.forward(key_value_states)?)?;
		let value = self.split_heads(&self.v.forward(key_value_states)?)?;
		// T5 folds the 1/sqrt(d_kv) scaling into its initialization.
		let scores = query.matmul(&key.t()?)?.broadcast_add(bias)?;
		let weights = {
			let _enter_sm = self.span_softmax.enter();
			candle_nn::ops::softmax(&scores, D::Minus1)?
		};
		let weights = self.dropout.forward(&weights, train)?;
		let context = weights.matmul(&value)?.transpose(1, 2)?.contiguous()?;
		let context = context.reshape((batch, q_len, self.num_heads * self.d_kv))?;
		self.o.forward(&context)
	}
}

struct T5LayerSelfAttention {
	attention: T5Attention,
	layer_norm: T5LayerNorm,
	dropout: Dropout,
}

impl T5LayerSelfAttention {
	fn load(
		has_relative_attention_bias: bool,
		is_decoder: bool,
		vb: VarBuilder,
		config: &T5Config,
	) -> Result<Self> {
		Ok(Self {
			attention: T5Attention::load(
				has_relative_attention_bias,
				!is_decoder,
				vb.pp("SelfAttention"),
				config,
			)?,
			layer_norm: T5LayerNorm::load(
				config.d_model,
				config.layer_norm_epsilon,
				vb.pp("layer_norm"),
			)?,
			dropout: Dropout::new(config.dropout_rate as f32),
		})
	}

	fn forward_t(&self, xs: &Tensor, bias: &Tensor, train: bool) -> Result<Tensor> {
		let normed = self.layer_norm.forward(xs)?;
		let hidden = self.attention.forward_t(&normed, None, bias, train)?;
		xs + self.dropout.forward(&hidden, train)?
	}
}

struct T5LayerCrossAttention {
	attention: T5Attention,
	layer_norm: T5LayerNorm,
	dropout: Dropout,
}

impl T5LayerCrossAttention {
	fn load(vb: VarBuilder, config: &T5Config) -> Result<Self> {
		Ok(Self {
			attention: T5Attention::load(false, true, vb.pp("EncDecAttention"), config)?,
			layer_norm: T5LayerNorm::load(
				config.d_model,
				config.layer_norm_epsilon,
				vb.pp("layer_norm"),
			)?,
			dropout: Dropout::new(config.dropout_rate as f32),
		})
	}

	fn forward_t(
		&self,
		xs: &Tensor,
		encoder_hidden_states: &Tensor,
		bias: &Tensor,
		train: bool,
	) -> Result<Tensor> {
		let normed = self.layer_norm.forward(xs)?;
		let hidden =
			self.attention.forward_t(&normed, Some(encoder_hidden_states), bias, train)?;
		xs + self.dropout.forward(&hidden, train)?
	}
}

struct T5Block {
	self_attention: T5LayerSelfAttention,
	cross_attention: Option<T5LayerCrossAttention>,
	ff: T5LayerFF,
}

impl T5Block {
	fn load(
		has_relative_attention_bias: bool,
		is_decoder: bool,
		vb: VarBuilder,
		config: &T5Config,
	) -> Result<Self> {
		let vb = vb.pp("layer");
		let self_attention = T5LayerSelfAttention::load(
			has_relative_attention_bias,
			is_decoder,
			vb.pp("0"),
			config,
		)?;
		let (cross_attention, ff_index) = if is_decoder {
			(Some(T5LayerCrossAttention::load(vb.pp("1"), config)?), "2")
		} else {
			(None, "1")
		};
		let ff = T5LayerFF::load(vb.pp(ff_index), config)?;
		Ok(Self { self_attention, cross_attention, ff })
	}

	fn forward_t(
		&self,
		xs: &Tensor,
		self_bias: &Tensor,
		encoder: Option<(&Tensor, &Tensor)>,
		train: bool,
	) -> Result<Tensor> {
		let mut xs = self.self_attention.forward_t(xs, self_bias, train)?;
		if let (Some(cross_attention), Some((encoder_hidden_states, cross_bias))) =
			(&self.cross_attention, encoder)
		{
			xs = cross_attention.forward_t(&xs, encoder_hidden_states, cross_bias, train)?;
		}
		self.ff.forward_t(&xs, train)
	}
}

struct T5Stack {
	embed_tokens: Embedding,
	blocks: Vec<T5Block>,
	final_layer_norm: T5LayerNorm,
	dropout: Dropout,
	span: tracing::Span,
}

impl T5Stack {
	fn load(
		is_decoder: bool,
		shared: &Embedding,
		vb: VarBuilder,
		config: &T5Config,
	) -> Result<Self> {
		let num_layers = if is_decoder { config.decoder_layers() } else { config.num_layers };
		let blocks = (0..num_layers)
			.map(|index| {
				T5Block::load(index == 0, is_decoder, vb.pp("block").pp(index.to_string()), config)
			})
			.collect::<Result<Vec<_>>>()?;
		Ok(Self {
			embed_tokens: shared.clone(),
			blocks,
			final_layer_norm: T5LayerNorm::load(
				config.d_model,
				config.layer_norm_epsilon,
				vb.pp("final_layer_norm"),
			)?,
			dropout: Dropout::new(config.dropout_rate as f32),
			span: if is_decoder {
				tracing::span!(tracing::Level::TRACE, "decoder")
			} else {
				tracing::span!(tracing::Level::TRACE, "encoder")
			},
		})
	}

	/// Runs the stack; `attention_bias` is the padding or causal mask of the self-attention.
	fn forward_t(
		&self,
		input_ids: &Tensor,
		attention_bias: &Tensor,
		encoder: Option<(&Tensor, &Tensor)>,
		train: bool,
	) -> Result<Tensor> {
		let _enter = self.span.enter();
		let Some(first_block) = self.blocks.first() else {
			candle_core::bail!("t5 stack has no blocks")
		};
		let (_, len) = input_ids.dims2()?;
		// The first block owns the relative position bias, every block reuses it.
		let self_bias = first_block
			.self_attention
			.attention
			.compute_bias(len, len, input_ids.device())?
			.broadcast_add(attention_bias)?;
		let mut hidden = self.dropout.forward(&self.embed_tokens.forward(input_ids)?, train)?;
		for block in &self.blocks {
			hidden = block.forward_t(&hidden, &self_bias, encoder, train)?;
		}
		let hidden = self.final_layer_norm.forward(&hidden)?;
		self.dropout.forward(&hidden, train)
	}
}

pub struct T5ForConditionalGeneration {
	encoder: T5Stack,
	decoder: T5Stack,
	lm_head: candle_nn::Linear,
	config: T5Config,
	device: Device,
	span: tracing::Span,
}

impl T5ForConditionalGeneration {
	pub fn load(vb: VarBuilder, config: &T5Config) -> Result<Self> {
		let shared = embedding(config.vocab_size, config.d_model, vb.pp("shared"))?;
		let encoder = T5Stack::load(false, &shared, vb.pp("encoder"), config)?;
		let decoder = T5Stack::load(true, &shared, vb.pp("decoder"), config)?;
		let lm_head = if config.tie_word_embeddings {
			candle_nn::Linear::new(shared.embeddings().clone(), None)
		} else {
			candle_nn::linear_no_bias(config.d_model, config.vocab_size, vb.pp("lm_head"))?
		};
		Ok(Self {
			encoder,
			decoder,
			lm_head,
			config: config.clone(),
			device: vb.device().clone(),
			span: tracing::span!(tracing::Level::TRACE, "t5"),
		})
	}

	pub fn config(&self) -> &T5Config {
		&self.config
	}

	pub fn device(&self) -> &Device {
		&self.device
	}

	/// `(batch, src_len, d_model)` encoder output.
	pub fn encode(
		&self,
		input_ids: &Tensor,
		attention_mask: &Tensor,
		train: bool,
	) -> Result<Tensor> {
		let bias = encoder_attention_bias(attention_mask)?;
		self.encoder.forward_t(input_ids, &bias, None, train)
	}

	/// `(batch, tgt_len, vocab_size)` logits for every decoder position.
	pub fn decode(
		&self,
		decoder_input_ids: &Tensor,
		encoder_hidden_states: &Tensor,
		attention_mask: &Tensor,
		train: bool,
	) -> Result<Tensor> {
		let (_, tgt_len) = decoder_input_ids.dims2()?;
		let causal = causal_attention_bias(tgt_len, decoder_input_ids.device())?;
		let cross_bias = encoder_attention_bias(attention_mask)?;
		let mut hidden = self.decoder.forward_t(
			decoder_input_ids,
			&causal,
			Some((encoder_hidden_states, &cross_bias)),
			train,
		)?;
		if self.config.tie_word_embeddings {
			hidden = (hidden * (self.config.d_model as f64).powf(-0.5))?;
		}
		self.lm_head.forward(&hidden)
	}

	/// Teacher-forced pass. `labels` is `(labels, label_mask)` and adds the masked loss.
	pub fn forward(
		&self,
		input_ids: &Tensor,
		attention_mask: &Tensor,
		decoder_input_ids: &Tensor,
		labels: Option<(&Tensor, &Tensor)>,
		train: bool,
	) -> Result<Seq2SeqLMOutput> {
		let _enter = self.span.enter();
		let encoder_last_hidden_state = self.encode(input_ids, attention_mask, train)?;
		let logits =
			self.decode(decoder_input_ids, &encoder_last_hidden_state, attention_mask, train)?;
		let loss = match labels {
			Some((labels, label_mask)) => Some(masked_cross_entropy(&logits, labels, label_mask)?),
			None => None,
		};
		Ok(Seq2SeqLMOutput { loss, logits, encoder_last_hidden_state })
	}

	/// Greedy decoding without a key/value cache.
	///
	/// Every row starts with the decoder start token. Rows that emitted `</s>` are padded until
	/// all rows finish or the step budget runs out.
	pub fn generate_greedy(
		&self,
		input_ids: &Tensor,
		attention_mask: &Tensor,
		settings: &GenerationSettings,
	) -> Result<Vec<Vec<u32>>> {
		let _enter = self.span.enter();
		let (batch, _) = input_ids.dims2()?;
		let start = self.config.decoder_start_token_id();
		let eos = self.config.eos_token_id as u32;
		let pad = self.config.pad_token_id as u32;
		if batch == 0 {
			return Ok(Vec::new());
		}
		let encoder_hidden_states = self.encode(input_ids, attention_mask, false)?;
		greedy_decode(batch, start, eos, pad, settings.max_steps(), |sequences| {
			let len = sequences.first().map_or(0, Vec::len);
			let flat: Vec<u32> = sequences.iter().flatten().copied().collect();
			let decoder_input_ids = Tensor::from_vec(flat, (batch, len), input_ids.device())?;
			let logits =
				self.decode(&decoder_input_ids, &encoder_hidden_states, attention_mask, false)?;
			logits.narrow(1, len - 1, 1)?.squeeze(1)?.argmax(D::Minus1)?.to_vec1::<u32>()
		})
	}
}

/// Runs the greedy loop over `batch` rows, asking `next_tokens` for one token per row per step.
///
/// Rows that emitted `eos` receive `pad` from then on. The loop stops once every row finished
/// or after `max_steps` steps, so every sequence has the same length.
pub fn greedy_decode<F>(
	batch: usize,
	start: u32,
	eos: u32,
	pad: u32,
	max_steps: usize,
	mut next_tokens: F,
) -> Result<Vec<Vec<u32>>>
where
	F: FnMut(&[Vec<u32>]) -> Result<Vec<u32>>,
{
	let mut sequences = vec![vec![start]; batch];
	if batch == 0 {
		return Ok(sequences);
	}
	let mut finished = vec![false; batch];
	for _ in 0..max_steps {
		let next = next_tokens(&sequences)?;
		if next.len() != batch {
			candle_core::bail!("expected {batch} next tokens, got {}", next.len());
		}
		for ((sequence, done), next) in sequences.iter_mut().zip(finished.iter_mut()).zip(next) {
			let token = if *done { pad } else { next };
			sequence.push(token);
			if token == eos {
				*done = true;
			}
		}
		if finished.iter().all(|done| *done) {
			break;
		}
	}
	Ok(sequences)
}

#[cfg(test)]
mod tests {
	use super::*;
	use candle_nn::VarMap;

	fn tiny_model(config: &T5Config) -> (VarMap, T5ForConditionalGeneration) {
		let varmap = VarMap::new();
		let vb = VarBuilder::from_varmap(&varmap, DTYPE, &Device::Cpu);
		let model = T5ForConditionalGeneration::load(vb, config).unwrap();
		(varmap, model)
	}

	#[test]
	fn test_relative_position_bucket_bidirectional() {
		let bucket = |position| relative_position_bucket(position, true, 32, 128);
		assert_eq!(bucket(0), 0);
		assert_eq!(bucket(-1), 1);
		assert_eq!(bucket(1), 17);
		assert_eq!(bucket(-20), 10);
		assert_eq!(bucket(20), 26);
		assert_eq!(bucket(-200), 15);
		assert_eq!(bucket(200), 31);
	}

	#[test]
	fn test_relative_position_bucket_causal() {
		let bucket = |position| relative_position_bucket(position, false, 32, 128);
		assert_eq!(bucket(-1), 1);
		assert_eq!(bucket(5), 0);
		assert_eq!(bucket(-3), 3);
		assert_eq!(bucket(-20), 17);
	}

	#[test]
	fn test_feed_forward_proj_parsing() {
		assert_eq!(
			FeedForwardProj::parse("gated-gelu").unwrap(),
			FeedForwardProj { activation: FeedForwardActivation::GeluNew, gated: true }
		);
		assert_eq!(
			FeedForwardProj::parse("relu").unwrap(),
			FeedForwardProj { activation: FeedForwardActivation::Relu, gated: false }
		);
		assert_eq!(
			FeedForwardProj::parse("gated-silu").unwrap(),
			FeedForwardProj { activation: FeedForwardActivation::Silu, gated: true }
		);
		assert!(FeedForwardProj::parse("dense-relu").is_err());
		assert!(FeedForwardProj::parse("tanh").is_err());
	}

	#[test]
	fn test_config_defaults_from_json() {
		let config: T5Config = serde_json::from_str(
			r#"{"vocab_size": 32128, "d_model": 512, "d_kv": 64, "d_ff": 2048,
				"num_layers": 6, "num_heads": 8}"#,
		)
		.unwrap();
		assert_eq!(config.relative_attention_num_buckets, 32);
		assert_eq!(config.relative_attention_max_distance, 128);
		assert_eq!(config.decoder_layers(), 6);
		assert_eq!(config.decoder_start_token_id(), 0);
		assert_eq!(config.eos_token_id, 1);
		assert!(config.tie_word_embeddings);
	}

	#[test]
	fn test_attention_biases() {
		let causal = causal_attention_bias(3, &Device::Cpu).unwrap();
		let causal = causal.squeeze(0).unwrap().squeeze(0).unwrap().to_vec2::<f32>().unwrap();
		assert_eq!(causal[0], vec![0.0, MASK_VALUE, MASK_VALUE]);
		assert_eq!(causal[2], vec![0.0, 0.0, 0.0]);

		let mask = Tensor::new(&[[1u32, 1, 0]], &Device::Cpu).unwrap();
		let bias = encoder_attention_bias(&mask).unwrap();
		assert_eq!(bias.dims(), &[1, 1, 1, 3]);
		let values = bias.flatten_all().unwrap().to_vec1::<f32>().unwrap();
		assert_eq!(values, vec![0.0, 0.0, MASK_VALUE]);
	}

	#[test]
	fn test_masked_cross_entropy_ignores_masked_positions() {
		let logits = Tensor::new(&[[[2f32, 0.0, 0.0], [0.0, 0.0, 5.0]]], &Device::Cpu).unwrap();
		let mask = Tensor::new(&[[1f32, 0.0]], &Device::Cpu).unwrap();
		let labels_a = Tensor::new(&[[0u32, 2]], &Device::Cpu).unwrap();
		let labels_b = Tensor::new(&[[0u32, 1]], &Device::Cpu).unwrap();
		let loss = |labels: &Tensor, mask: &Tensor| {
			masked_cross_entropy(&logits, labels, mask).unwrap().to_scalar::<f32>().unwrap()
		};
		let loss_a = loss(&labels_a, &mask);
		let loss_b = loss(&labels_b, &mask);
		let expected = -(2f32.exp() / (2f32.exp() + 2.0)).ln();
		assert!((loss_a - expected).abs() < 1e-5);
		assert_eq!(loss_a, loss_b);

		let none = Tensor::new(&[[0f32, 0.0]], &Device::Cpu).unwrap();
		let zero = loss(&labels_a, &none);
		assert_eq!(zero, 0.0);
	}

	#[test]
	fn test_relative_bias_only_in_first_block() {
		let config = T5Config::tiny(20);
		let (varmap, _model) = tiny_model(&config);
		let names = varmap.data().lock().unwrap();
		let bias = |stack: &str, block: usize| {
			format!("{stack}.block.{block}.layer.0.SelfAttention.relative_attention_bias.weight")
		};
		assert!(names.contains_key(&bias("encoder", 0)));
		assert!(names.contains_key(&bias("decoder", 0)));
		assert!(!names.contains_key(&bias("encoder", 1)));
		assert!(names.contains_key("decoder.block.1.layer.1.EncDecAttention.q.weight"));
		assert!(names.contains_key("decoder.block.1.layer.2.DenseReluDense.wi.weight"));
		assert!(!names.contains_key("lm_head.weight"));
	}

	#[test]
	fn test_gated_untied_weight_names() {
		let mut config = T5Config::tiny(20);
		config.feed_forward_proj = "gated-gelu".to_string();
		config.tie_word_embeddings = false;
		let (varmap, _model) = tiny_model(&config);
		let names = varmap.data().lock().unwrap();
		assert!(names.contains_key("encoder.block.0.layer.1.DenseReluDense.wi_0.weight"));
		assert!(names.contains_key("encoder.block.0.layer.1.DenseReluDense.wi_1.weight"));
		assert!(names.contains_key("lm_head.weight"));
	}

	#[test]
	fn test_forward_shapes_and_loss() {
		let config = T5Config::tiny(20);
		let (_varmap, model) = tiny_model(&config);
		let device = Device::Cpu;
		let input_ids = Tensor::new(&[[5u32, 6, 1, 0], [7, 8, 9, 1]], &device).unwrap();
		let attention_mask = Tensor::new(&[[1u32, 1, 1, 0], [1, 1, 1, 1]], &device).unwrap();
		let decoder_input_ids = Tensor::new(&[[0u32, 3, 4], [0, 10, 1]], &device).unwrap();
		let labels = Tensor::new(&[[3u32, 4, 1], [10, 1, 0]], &device).unwrap();
		let label_mask = Tensor::new(&[[1f32, 1.0, 1.0], [1.0, 1.0, 0.0]], &device).unwrap();

		let labels = Some((&labels, &label_mask));
		let output =
			model.forward(&input_ids, &attention_mask, &decoder_input_ids, labels, false).unwrap();
		assert_eq!(output.logits.dims(), &[2, 3, 20]);
		assert_eq!(output.encoder_last_hidden_state.dims(), &[2, 4, 16]);
		let loss = output.loss.unwrap().to_scalar::<f32>().unwrap();
		assert!(loss.is_finite() && loss > 0.0);
	}

	#[test]
	fn test_generate_greedy_respects_limits() {
		let config = T5Config::tiny(20);
		let (_varmap, model) = tiny_model(&config);
		let device = Device::Cpu;
		let input_ids = Tensor::new(&[[5u32, 6, 1], [7, 1, 0]], &device).unwrap();
		let attention_mask = Tensor::new(&[[1u32, 1, 1], [1, 1, 0]], &device).unwrap();

		let settings = GenerationSettings::new(4, 32);
		let sequences = model.generate_greedy(&input_ids, &attention_mask, &settings).unwrap();
		assert_eq!(sequences.len(), 2);
		assert_eq!(sequences[0].len(), sequences[1].len());
		for sequence in &sequences {
			assert!(sequence.len() <= 5);
			assert_eq!(sequence[0], config.decoder_start_token_id());
			if let Some(eos) = sequence.iter().position(|&token| token == 1) {
				assert!(sequence[eos + 1..].iter().all(|&token| token == 0));
			}
		}

		let settings = GenerationSettings::new(10, 3);
		let capped = model.generate_greedy(&input_ids, &attention_mask, &settings).unwrap();
		assert!(capped.iter().all(|sequence| sequence.len() <= 3));
	}

	#[test]
	fn test_greedy_decode_stops_when_every_row_emits_eos() {
		let mut calls = 0;
		let sequences = greedy_decode(3, 0, 1, 0, 8, |sequences| {
			calls += 1;
			Ok(vec![1; sequences.len()])
		})
		.unwrap();
		assert_eq!(calls, 1);
		assert_eq!(sequences, vec![vec![0, 1]; 3]);
	}

	#[test]
	fn test_greedy_decode_pads_rows_that_finished_first() {
		let steps = [vec![1, 5], vec![9, 6], vec![9, 1], vec![9, 9]];
		let mut step = 0;
		let sequences = greedy_decode(2, 0, 1, 0, 8, |_| {
			step += 1;
			Ok(steps[step - 1].clone())
		})
		.unwrap();
		assert_eq!(step, 3);
		assert_eq!(sequences, vec![vec![0, 1, 0, 0], vec![0, 5, 6, 1]]);
	}

	#[test]
	fn test_greedy_decode_respects_step_budget() {
		let sequences = greedy_decode(1, 0, 1, 0, 2, |_| Ok(vec![7])).unwrap();
		assert_eq!(sequences, vec![vec![0, 7, 7]]);
		assert!(greedy_decode(2, 0, 1, 0, 2, |_| Ok(vec![7])).is_err());
	}
}
