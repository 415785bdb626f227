use crate::error::{MemoryError, MemoryResult};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Embedding dimension for lite embedder
pub const LITE_DIM: usize = 384;

/// Default socket path for the embedding server
pub const SOCKET_PATH: &str = "/tmp/memvault-embedder.sock";

const RESPONSE_LIMIT: u64 = 16 * 1024 * 1024;
const READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Turns text into fixed-size vectors
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> MemoryResult<Vec<f32>>;

    fn embed_batch(&self, texts: &[&str]) -> MemoryResult<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

/// Builds the embedding model on first semantic search
pub type EmbedderLoader = Box<dyn Fn() -> MemoryResult<Box<dyn Embedder>> + Send + Sync>;

// =============================================================================
// LiteEmbedder - N-gram hashing
// =============================================================================

/// Lightweight embedder using character n-gram hashing
pub struct LiteEmbedder {
    dim: usize,
}

impl Default for LiteEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl LiteEmbedder {
    pub fn new() -> Self {
        Self { dim: LITE_DIM }
    }

    pub fn with_dim(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    fn bucket(&self, token: &str) -> usize {
        (md5_hash(token) % self.dim as u128) as usize
    }
}

impl Embedder for LiteEmbedder {
    fn embed(&self, text: &str) -> MemoryResult<Vec<f32>> {
        let text = text.to_lowercase();
        let text = text.trim();
        let mut vector = vec![0.0f32; self.dim];

        // Character trigrams
        let chars: Vec<char> = text.chars().collect();
        for window in chars.windows(3) {
            let trigram: String = window.iter().collect();
            vector[self.bucket(&trigram)] += 1.0;
        }

        // Words count double
        for word in text.split_whitespace() {
            vector[self.bucket(word)] += 2.0;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }

        Ok(vector)
    }
}

fn md5_hash(text: &str) -> u128 {
    let mut hasher = Md5::new();
    hasher.update(text.as_bytes());
    u128::from_be_bytes(hasher.finalize().into())
}

// =============================================================================
// ServerEmbedder - Unix socket client for an external embedding server
// =============================================================================

#[derive(Serialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
enum Request<'a> {
    Ping,
    Embed { text: &'a str },
    EmbedBatch { texts: &'a [&'a str] },
}

#[derive(Deserialize)]
struct Response {
    ok: bool,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    embedding: Option<Vec<f32>>,
    #[serde(default)]
    embeddings: Option<Vec<Vec<f32>>>,
    #[serde(default)]
    error: Option<String>,
}

impl Response {
    fn into_result(self) -> MemoryResult<Self> {
        if self.ok {
            Ok(self)
        } else {
            Err(MemoryError::Embedding(
                self.error.unwrap_or_else(|| "Unknown error".to_string()),
            ))
        }
    }
}

/// Embedder backed by a model server listening on a Unix socket
pub struct ServerEmbedder {
    socket: PathBuf,
    model: String,
}

impl ServerEmbedder {
    /// Connect to the server and check it serves `model`
    pub fn connect(socket: impl Into<PathBuf>, model: &str) -> MemoryResult<Self> {
        let socket = socket.into();
        if !socket.exists() {
            return Err(MemoryError::ModelUnavailable(format!(
                "embedding server socket {} not found",
                socket.display()
            )));
        }

        let served = Self::ping(&socket)
            .map_err(|e| MemoryError::ModelUnavailable(e.to_string()))?;
        if served != model {
            return Err(MemoryError::ModelUnavailable(format!(
                "server runs {}, wanted {}",
                served, model
            )));
        }

        Ok(Self {
            socket,
            model: model.to_string(),
        })
    }

    /// Ask the server which model it runs
    pub fn ping(socket: &Path) -> MemoryResult<String> {
        let response = send_request(socket, &Request::Ping)?.into_result()?;
        Ok(response.model.unwrap_or_default())
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl Embedder for ServerEmbedder {
    fn embed(&self, text: &str) -> MemoryResult<Vec<f32>> {
        send_request(&self.socket, &Request::Embed { text })?
            .into_result()?
            .embedding
            .ok_or_else(|| MemoryError::Embedding("No embedding in response".to_string()))
    }

    fn embed_batch(&self, texts: &[&str]) -> MemoryResult<Vec<Vec<f32>>> {
        let embeddings = send_request(&self.socket, &Request::EmbedBatch { texts })?
            .into_result()?
            .embeddings
            .ok_or_else(|| MemoryError::Embedding("No embeddings in response".to_string()))?;

        if embeddings.len() != texts.len() {
            return Err(MemoryError::Embedding(format!(
                "asked for {} embeddings, got {}",
                texts.len(),
                embeddings.len()
            )));
        }
        Ok(embeddings)
    }
}

/// One JSON request per connection; the server replies and closes
fn send_request(socket: &Path, request: &Request<'_>) -> MemoryResult<Response> {
    let mut stream = UnixStream::connect(socket)?;
    stream.set_read_timeout(Some(READ_TIMEOUT))?;

    let json = serde_json::to_vec(request)?;
    stream.write_all(&json)?;
    stream.shutdown(std::net::Shutdown::Write)?;

    let mut buffer = Vec::new();
    stream.take(RESPONSE_LIMIT).read_to_end(&mut buffer)?;

    Ok(serde_json::from_slice(&buffer)?)
}

// =============================================================================
// Cosine similarity
// =============================================================================

/// Compute cosine similarity between two vectors
pub fn cosine_similarity(vec_a: &[f32], vec_b: &[f32]) -> f64 {
    if vec_a.len() != vec_b.len() {
        return 0.0;
    }

    let dot: f32 = vec_a.iter().zip(vec_b.iter()).map(|(a, b)| a * b).sum();
    let norm_a: f32 = vec_a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = vec_b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        (dot / (norm_a * norm_b)) as f64
    }
}

// =============================================================================
// Model factory
// =============================================================================

/// Load the embedder for a resolved (model_name, model_type)
pub fn load_embedder(model_name: &str, model_type: &str) -> MemoryResult<Box<dyn Embedder>> {
    if model_type == "lite" || model_name == "lite" {
        return Ok(Box::new(LiteEmbedder::new()));
    }

    let socket = std::env::var("MEMVAULT_EMBEDDER_SOCKET")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(SOCKET_PATH));
    Ok(Box::new(ServerEmbedder::connect(socket, model_name)?))
}

/// Loader for the model named in the config
pub fn loader_for(model_name: String, model_type: String) -> EmbedderLoader {
    Box::new(move || load_embedder(&model_name, &model_type))
}
