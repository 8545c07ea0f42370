//! Speech-to-text capability.
//!
//! The transcription backend is an external network service; this is the
//! only network-bound stage of a session, so transient failures are
//! retried with exponential backoff before being converted into a stage
//! error by the orchestrator.

use reqwest::header::{HeaderValue, CONTENT_TYPE};
use serde::Deserialize;
use std::io::Cursor;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Default timeout for a single transcription request.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of retry attempts for transient failures
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Initial backoff delay for retries
const INITIAL_BACKOFF_MS: u64 = 500;

/// Maximum backoff delay
const MAX_BACKOFF_MS: u64 = 5000;

#[derive(Debug, Error)]
pub enum SttError {
    #[error("Invalid STT endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Failed to encode audio: {0}")]
    EncodeError(String),

    #[error("STT request failed: {0}")]
    RequestError(String),

    #[error("STT service returned error status {0}: {1}")]
    ServiceError(u16, String),

    #[error("Failed to parse STT response: {0}")]
    ParseError(String),
}

/// Speech-to-text capability: transcript text from mono f32 samples.
pub trait SpeechToText: Send {
    fn transcribe(
        &self,
        samples: &[f32],
        sample_rate: u32,
        language: &str,
    ) -> Result<String, SttError>;
}

#[derive(Debug, Deserialize)]
struct TranscriptResponse {
    transcript: String,
}

/// HTTP JSON transcription client with retry.
pub struct HttpSttClient {
    client: reqwest::blocking::Client,
    endpoint: String,
    max_retries: u32,
}

/// Check if a reqwest error is retryable (transient network issues)
fn is_retryable_error(err: &reqwest::Error) -> bool {
    if err.is_connect() || err.is_timeout() {
        return true;
    }
    if let Some(status) = err.status() {
        return status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS;
    }
    false
}

/// Check if an HTTP status code is retryable
fn is_retryable_status(status: reqwest::StatusCode) -> bool {
    status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS
}

/// Calculate backoff delay with exponential increase and jitter
pub(crate) fn calculate_backoff(attempt: u32) -> Duration {
    let base_delay = INITIAL_BACKOFF_MS * 2u64.pow(attempt);
    let capped_delay = base_delay.min(MAX_BACKOFF_MS);
    let jitter = (std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_millis() as u64)
        % 100;
    Duration::from_millis(capped_delay + jitter)
}

impl HttpSttClient {
    pub fn new(endpoint: &str) -> Result<Self, SttError> {
        let cleaned = endpoint.trim_end_matches('/');
        let parsed = reqwest::Url::parse(cleaned)
            .map_err(|e| SttError::InvalidEndpoint(format!("{}: {}", cleaned, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(SttError::InvalidEndpoint(format!(
                "endpoint must use http or https, got {}",
                parsed.scheme()
            )));
        }

        let client = reqwest::blocking::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| SttError::RequestError(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: cleaned.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
        })
    }

    /// Encode samples as an in-memory 16-bit WAV for the request body.
    fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>, SttError> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec)
                .map_err(|e| SttError::EncodeError(e.to_string()))?;
            for sample in samples {
                let v = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                writer
                    .write_sample(v)
                    .map_err(|e| SttError::EncodeError(e.to_string()))?;
            }
            writer
                .finalize()
                .map_err(|e| SttError::EncodeError(e.to_string()))?;
        }
        Ok(cursor.into_inner())
    }
}

impl SpeechToText for HttpSttClient {
    fn transcribe(
        &self,
        samples: &[f32],
        sample_rate: u32,
        language: &str,
    ) -> Result<String, SttError> {
        let body = Self::encode_wav(samples, sample_rate)?;
        let url = format!("{}/transcribe?language={}", self.endpoint, language);
        debug!("STT request: {} bytes of audio to {}", body.len(), url);

        let mut last_error = SttError::RequestError("no attempts made".to_string());

        for attempt in 0..self.max_retries {
            if attempt > 0 {
                let backoff = calculate_backoff(attempt - 1);
                warn!(
                    "STT attempt {} failed, retrying in {:?}",
                    attempt, backoff
                );
                std::thread::sleep(backoff);
            }

            match self
                .client
                .post(&url)
                .header(CONTENT_TYPE, HeaderValue::from_static("audio/wav"))
                .body(body.clone())
                .send()
            {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response
                            .json::<TranscriptResponse>()
                            .map(|r| r.transcript)
                            .map_err(|e| SttError::ParseError(e.to_string()));
                    } else if is_retryable_status(status) {
                        last_error = SttError::ServiceError(
                            status.as_u16(),
                            response.text().unwrap_or_default(),
                        );
                        continue;
                    } else {
                        return Err(SttError::ServiceError(
                            status.as_u16(),
                            response.text().unwrap_or_default(),
                        ));
                    }
                }
                Err(e) => {
                    if is_retryable_error(&e) {
                        last_error = SttError::RequestError(e.to_string());
                        continue;
                    } else {
                        return Err(SttError::RequestError(e.to_string()));
                    }
                }
            }
        }

        error!(
            "STT failed after {} attempts: {}",
            self.max_retries, last_error
        );
        Err(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_bad_endpoint() {
        assert!(HttpSttClient::new("not a url").is_err());
        assert!(HttpSttClient::new("ftp://example.com").is_err());
    }

    #[test]
    fn test_new_accepts_http_and_trims_slash() {
        let client = HttpSttClient::new("http://localhost:9000/").unwrap();
        assert_eq!(client.endpoint, "http://localhost:9000");
    }

    #[test]
    fn test_backoff_is_bounded() {
        for attempt in 0..10 {
            let delay = calculate_backoff(attempt);
            assert!(delay <= Duration::from_millis(MAX_BACKOFF_MS + 100));
        }
    }

    #[test]
    fn test_backoff_grows_until_cap() {
        // Strip jitter by comparing lower bounds.
        assert!(calculate_backoff(1) >= Duration::from_millis(1000));
        assert!(calculate_backoff(2) >= Duration::from_millis(2000));
        assert!(calculate_backoff(6) >= Duration::from_millis(MAX_BACKOFF_MS));
    }

    #[test]
    fn test_encode_wav_produces_riff_header() {
        let samples = vec![0.0f32; 1600];
        let bytes = HttpSttClient::encode_wav(&samples, 16000).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
    }

    #[test]
    fn test_parse_transcript_response() {
        let json = r#"{"transcript": "hola mundo"}"#;
        let parsed: TranscriptResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.transcript, "hola mundo");
    }
}
