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

use hf_hub::{
	api::sync::{ApiBuilder, ApiRepo},
	Repo, RepoType,
};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::get_soq_data_path;

/// Handle on a Hugging Face model repository, cached under [`get_soq_data_path`].
pub fn hub_model_repo(model: &str, revision: Option<&str>) -> anyhow::Result<ApiRepo> {
	let repo = match revision {
		Some(revision) =>
			Repo::with_revision(model.to_string(), RepoType::Model, revision.to_string()),
		None => Repo::model(model.to_string()),
	};
	let api = ApiBuilder::new()
		.with_cache_dir(get_soq_data_path())
		.build()
		.map_err(|e| anyhow::anyhow!("could not initialize Hugging Face API: {}", e))?;
	Ok(api.repo(repo))
}

/// Resolves `filename` for `identifier`.
///
/// `identifier` may be a local directory containing the file, a path to the file itself, or a
/// hub repository id.
pub fn resolve_model_file(
	identifier: &str,
	revision: Option<&str>,
	filename: &str,
) -> anyhow::Result<PathBuf> {
	let local = Path::new(identifier);
	if local.is_dir() {
		let candidate = local.join(filename);
		if candidate.is_file() {
			return Ok(candidate);
		}
		anyhow::bail!("could not find {} in local directory {}", filename, local.display());
	}
	if local.is_file() {
		return Ok(local.to_path_buf());
	}
	info!(repo = identifier, file = filename, "fetching from Hugging Face hub");
	hub_model_repo(identifier, revision)?
		.get(filename)
		.map_err(|e| anyhow::anyhow!("could not fetch {} from {}: {}", filename, identifier, e))
}
