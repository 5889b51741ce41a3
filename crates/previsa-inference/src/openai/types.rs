//! Request and response bodies of `POST /embeddings`.

use serde::{Deserialize, Serialize};

use previsa_core::{Error, Result, Vector};

/// Catalog and practice texts always ask for plain float arrays.
#[derive(Debug, Serialize)]
pub struct EmbeddingRequest<'a> {
    pub model: &'a str,
    pub input: &'a [String],
    pub encoding_format: &'static str,
}

impl<'a> EmbeddingRequest<'a> {
    pub fn floats(model: &'a str, input: &'a [String]) -> Self {
        Self {
            model,
            input,
            encoding_format: "float",
        }
    }
}

/// Only `data` is read; `model` and `usage` vary between servers.
#[derive(Debug, Deserialize)]
pub struct EmbeddingResponse {
    pub data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
pub struct EmbeddingData {
    pub embedding: Vec<f32>,
    pub index: usize,
}

impl EmbeddingResponse {
    /// Vectors in input order, checked against the request size and the
    /// configured dimension.
    pub fn into_vectors(self, expected: usize, dimension: usize) -> Result<Vec<Vector>> {
        if self.data.len() != expected {
            return Err(Error::Embedding(format!(
                "Provider returned {} vectors for {} inputs",
                self.data.len(),
                expected
            )));
        }

        let mut data = self.data;
        data.sort_by_key(|d| d.index);

        if let Some(bad) = data.iter().find(|d| d.embedding.len() != dimension) {
            return Err(Error::Embedding(format!(
                "Expected {}-dimensional vectors, got {}",
                dimension,
                bad.embedding.len()
            )));
        }
        Ok(data.into_iter().map(|d| Vector::from(d.embedding)).collect())
    }
}

/// `{"error": {...}}` body sent with non-2xx responses.
#[derive(Debug, Deserialize)]
pub struct ProviderErrorBody {
    pub error: ProviderErrorDetail,
}

#[derive(Debug, Deserialize)]
pub struct ProviderErrorDetail {
    pub message: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub code: Option<String>,
}

impl ProviderErrorBody {
    /// Stand-in when the body is missing or not JSON.
    pub fn from_status(status: u16) -> Self {
        Self {
            error: ProviderErrorDetail {
                message: format!("HTTP {}", status),
                kind: String::new(),
                code: None,
            },
        }
    }
}
