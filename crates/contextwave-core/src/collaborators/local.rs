//! Local Embedder
//!
//! A fastembed-backed [`Embedder`] implementation for callers without their
//! own embedding stack. 384-dimensional (all-MiniLM-L6-v2), fully local.
//!
//! The model loads once per process behind a `OnceLock`; the deadline covers
//! inference only, not the initial model download.

use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use tokio_util::sync::CancellationToken;

use super::{CollaboratorError, CollaboratorResult, Embedder};

/// Maximum text length handed to the model (truncated if longer)
pub const MAX_TEXT_LENGTH: usize = 2048;

static MODEL: OnceLock<Result<Mutex<TextEmbedding>, String>> = OnceLock::new();

fn cache_dir() -> std::path::PathBuf {
    if let Ok(path) = std::env::var("CONTEXTWAVE_FASTEMBED_CACHE") {
        return std::path::PathBuf::from(path);
    }
    if let Some(proj_dirs) = directories::ProjectDirs::from("io", "contextwave", "core") {
        return proj_dirs.cache_dir().join("fastembed");
    }
    std::path::PathBuf::from(".fastembed_cache")
}

fn model() -> CollaboratorResult<std::sync::MutexGuard<'static, TextEmbedding>> {
    let result = MODEL.get_or_init(|| {
        let cache = cache_dir();
        if let Err(e) = std::fs::create_dir_all(&cache) {
            tracing::warn!("Failed to create fastembed cache dir {:?}: {}", cache, e);
        }
        let options = InitOptions::new(EmbeddingModel::AllMiniLML6V2)
            .with_show_download_progress(false)
            .with_cache_dir(cache);
        TextEmbedding::try_new(options)
            .map(Mutex::new)
            .map_err(|e| format!("Failed to initialize all-MiniLM-L6-v2: {}", e))
    });

    match result {
        Ok(model) => model
            .lock()
            .map_err(|_| CollaboratorError::Failure("Embedding model lock poisoned".to_string())),
        Err(e) => Err(CollaboratorError::Failure(e.clone())),
    }
}

/// Local 384-dimensional embedder
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalEmbedder;

impl Embedder for LocalEmbedder {
    fn embed(
        &self,
        text: &str,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> CollaboratorResult<Vec<f32>> {
        if cancel.is_cancelled() {
            return Err(CollaboratorError::Cancelled);
        }
        let truncated: String = text.chars().take(MAX_TEXT_LENGTH).collect();

        let started = Instant::now();
        let mut guard = model()?;
        let mut vectors = guard
            .embed(vec![truncated], None)
            .map_err(|e| CollaboratorError::Failure(format!("Embedding failed: {}", e)))?;
        if started.elapsed() > deadline {
            return Err(CollaboratorError::Timeout(deadline));
        }
        vectors
            .pop()
            .ok_or_else(|| CollaboratorError::Failure("Empty embedding batch".to_string()))
    }

    fn dimensions(&self) -> usize {
        384
    }
}
