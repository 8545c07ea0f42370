//! Contextual recommendation service client, local simulation and the
//! shared time-bounded response cache.
//!
//! When an endpoint is configured, contextual recommendations come from
//! the external service (retried with backoff); otherwise a local
//! simulation produces an equivalent structure from fixed heuristics.
//! Responses are cached by a digest of diagnosis + context so repeated
//! sessions for the same child do not re-query the service.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::audio::CommunicationLevel;
use crate::diagnosis::DiagnosisCategory;

use super::context::{CommunicativeContext, EmotionalContext, EmotionalPattern};

/// How long a cached recommendation response stays valid.
pub const CACHE_TTL: Duration = Duration::from_secs(600);

/// Default timeout for a recommendation request.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Retry attempts for transient service failures.
const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Invalid recommendation endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Recommendation request failed: {0}")]
    RequestError(String),

    #[error("Recommendation service returned status {0}")]
    ServiceStatus(u16),

    #[error("Failed to parse recommendation response: {0}")]
    ParseError(String),
}

/// Request payload sent to the recommendation service.
#[derive(Debug, Serialize)]
struct RecommendationRequest<'a> {
    diagnostico: &'a str,
    contexto: &'a str,
    emociones: &'a EmotionalContext,
    comunicacion: &'a CommunicativeContext,
}

#[derive(Debug, Deserialize)]
struct RecommendationResponse {
    recomendaciones: Vec<String>,
}

/// External recommendation capability.
pub trait RecommendationService: Send {
    fn get_recommendations(
        &self,
        diagnosis: &str,
        user_context: &str,
        emotional: &EmotionalContext,
        communicative: &CommunicativeContext,
    ) -> Result<Vec<String>, ServiceError>;
}

pub struct HttpRecommendationClient {
    client: reqwest::blocking::Client,
    endpoint: String,
    token: Option<String>,
    max_retries: u32,
}

impl HttpRecommendationClient {
    pub fn new(endpoint: &str, token: Option<&str>) -> Result<Self, ServiceError> {
        let cleaned = endpoint.trim_end_matches('/');
        let parsed = reqwest::Url::parse(cleaned)
            .map_err(|e| ServiceError::InvalidEndpoint(format!("{}: {}", cleaned, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ServiceError::InvalidEndpoint(format!(
                "endpoint must use http or https, got {}",
                parsed.scheme()
            )));
        }

        let client = reqwest::blocking::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| ServiceError::RequestError(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: cleaned.to_string(),
            token: token.map(|t| t.to_string()),
            max_retries: DEFAULT_MAX_RETRIES,
        })
    }
}

impl RecommendationService for HttpRecommendationClient {
    fn get_recommendations(
        &self,
        diagnosis: &str,
        user_context: &str,
        emotional: &EmotionalContext,
        communicative: &CommunicativeContext,
    ) -> Result<Vec<String>, ServiceError> {
        let url = format!("{}/recomendaciones", self.endpoint);
        let payload = RecommendationRequest {
            diagnostico: diagnosis,
            contexto: user_context,
            emociones: emotional,
            comunicacion: communicative,
        };

        let mut last_error = ServiceError::RequestError("no attempts made".to_string());

        for attempt in 0..self.max_retries {
            if attempt > 0 {
                let backoff = crate::audio::stt::calculate_backoff(attempt - 1);
                warn!(
                    "Recommendation request attempt {} failed, retrying in {:?}",
                    attempt, backoff
                );
                std::thread::sleep(backoff);
            }

            let mut request = self.client.post(&url).json(&payload);
            if let Some(ref token) = self.token {
                request = request.bearer_auth(token);
            }

            match request.send() {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response
                            .json::<RecommendationResponse>()
                            .map(|r| r.recomendaciones)
                            .map_err(|e| ServiceError::ParseError(e.to_string()));
                    } else if status.is_server_error()
                        || status == reqwest::StatusCode::TOO_MANY_REQUESTS
                    {
                        last_error = ServiceError::ServiceStatus(status.as_u16());
                        continue;
                    } else {
                        return Err(ServiceError::ServiceStatus(status.as_u16()));
                    }
                }
                Err(e) => {
                    if e.is_connect() || e.is_timeout() {
                        last_error = ServiceError::RequestError(e.to_string());
                        continue;
                    }
                    return Err(ServiceError::RequestError(e.to_string()));
                }
            }
        }

        Err(last_error)
    }
}

/// Local simulation used when no endpoint is configured: an equivalent
/// structure from fixed heuristics over the same inputs.
pub fn simulate_recommendations(
    diagnosis: &str,
    emotional: &EmotionalContext,
    communicative: &CommunicativeContext,
) -> Vec<String> {
    let category = DiagnosisCategory::match_text(diagnosis);
    let mut out = Vec::new();

    out.push(format!(
        "Plan de apoyo orientativo para perfil '{}' generado localmente.",
        category.as_str()
    ));

    if emotional.pattern == EmotionalPattern::PredominioNegativo {
        out.push(
            "Programar sesiones más cortas con cierres positivos mientras persista el patrón emocional negativo."
                .to_string(),
        );
    }
    if communicative.level <= CommunicationLevel::PreVerbal {
        out.push(
            "Incluir objetivos de comunicación funcional en el plan individual.".to_string(),
        );
    }

    out
}

struct CacheEntry {
    value: Vec<String>,
    inserted_at: Instant,
}

/// Time-bounded cache for recommendation responses, keyed by a digest of
/// diagnosis + context. The single lock is held only for map access;
/// entries are small and sessions coarse-grained, so sessions on
/// unrelated keys never wait on each other's service calls.
pub struct RecommendationCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl RecommendationCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn key(
        diagnosis: &str,
        emotional: &EmotionalContext,
        communicative: &CommunicativeContext,
    ) -> String {
        let mut hasher = Sha256::new();
        hasher.update(diagnosis.as_bytes());
        hasher.update(serde_json::to_vec(emotional).unwrap_or_default());
        hasher.update(serde_json::to_vec(communicative).unwrap_or_default());
        format!("{:x}", hasher.finalize())
    }

    /// Fetch a live entry; expired entries are evicted, never returned.
    pub fn get(&self, key: &str) -> Option<Vec<String>> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(key) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, key: String, value: Vec<String>) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    #[cfg(test)]
    fn put_aged(&self, key: String, value: Vec<String>, age: Duration) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: Instant::now() - age,
            },
        );
    }
}

/// Contextual recommender: cache in front of the configured service or
/// the local simulation. The cache instance is injected so multiple
/// sessions share it.
pub struct ContextualRecommender {
    service: Option<Box<dyn RecommendationService>>,
    cache: std::sync::Arc<RecommendationCache>,
}

impl ContextualRecommender {
    pub fn new(
        service: Option<Box<dyn RecommendationService>>,
        cache: std::sync::Arc<RecommendationCache>,
    ) -> Self {
        if service.is_none() {
            info!("No recommendation endpoint configured, using local simulation");
        }
        Self { service, cache }
    }

    pub fn fetch(
        &self,
        diagnosis: &str,
        user_context: &str,
        emotional: &EmotionalContext,
        communicative: &CommunicativeContext,
    ) -> Result<Vec<String>, ServiceError> {
        let key = RecommendationCache::key(diagnosis, emotional, communicative);
        if let Some(cached) = self.cache.get(&key) {
            debug!("Recommendation cache hit");
            return Ok(cached);
        }

        let result = match &self.service {
            Some(service) => {
                service.get_recommendations(diagnosis, user_context, emotional, communicative)?
            }
            None => simulate_recommendations(diagnosis, emotional, communicative),
        };

        self.cache.put(key, result.clone());
        Ok(result)
    }
}
