//! # Configuration Management
//!
//! Loads application configuration from multiple sources:
//! - Default values (built into the code)
//! - TOML configuration file (config.toml)
//! - Environment variables (with APP_ prefix)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST` / `PORT` (deployment platform conventions)
//! 2. Environment variables: `APP_<SECTION>__<FIELD>`, e.g. `APP_VAD__PAUSE_THRESHOLD_MS=250`
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! API credentials are not part of `AppConfig`; they come from the
//! environment only, see [`ServiceCredentials`].

use crate::audio::SampleEncoding;
use crate::error::{AppError, AppResult};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub audio: AudioConfig,
    pub vad: VadConfig,
    pub session: SessionConfig,
    pub assistant: AssistantConfig,
    pub services: ServicesConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Format of the microphone stream the client sends.
///
/// ## Fields:
/// - `sample_rate`: samples per second of the inbound stream (browser worklet runs at 16kHz)
/// - `window_samples`: size of one VAD evaluation window (512 samples = 32ms at 16kHz)
/// - `encoding`: raw sample encoding of binary / base64 payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub window_samples: usize,
    pub encoding: SampleEncoding,
}

/// Endpointing and the default energy detector.
///
/// ## Fields:
/// - `pause_threshold_ms`: silence after a speech `end` before the utterance is finalized.
///   Shorter answers faster but risks cutting users off mid-thought.
/// - `energy_threshold`: RMS level above which a window counts as voiced
/// - `min_silence_ms`: unvoiced run that makes the detector report `end`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadConfig {
    pub pause_threshold_ms: u64,
    pub energy_threshold: f32,
    pub min_silence_ms: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub max_concurrent_sessions: usize,
    /// When set, clients must connect with `?token=<access_token>`.
    pub access_token: Option<String>,
    pub heartbeat_interval_secs: u64,
    pub client_timeout_secs: u64,
    /// Bound of the sentence channel between producer and consumer.
    pub segment_channel_capacity: usize,
    /// Longest wait for the next item from an upstream service before the
    /// call is treated as failed.
    pub upstream_idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfig {
    /// Seeds every new conversation as a `system` turn.
    pub system_prompt: Option<String>,
    /// Spoken when the language model fails.
    pub fallback_reply: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicesConfig {
    pub transcription_url: String,
    pub transcription_model: String,
    pub transcription_language: String,
    pub chat_url: String,
    pub chat_model: String,
    pub tts_url: String,
    pub tts_voice_id: String,
    pub tts_model_id: String,
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Directory for the daily conversation CSV files. Disabled when unset.
    pub conversation_log_dir: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            audio: AudioConfig {
                sample_rate: 16000,
                window_samples: 512,
                encoding: SampleEncoding::F32Le,
            },
            vad: VadConfig {
                pause_threshold_ms: 800,
                energy_threshold: 0.015,
                min_silence_ms: 100,
            },
            session: SessionConfig {
                max_concurrent_sessions: 10,
                access_token: None,
                heartbeat_interval_secs: 15,
                client_timeout_secs: 60,
                segment_channel_capacity: 64,
                upstream_idle_timeout_secs: 20,
            },
            assistant: AssistantConfig {
                system_prompt: None,
                fallback_reply: "I'm sorry, I seem to be having trouble connecting right now."
                    .to_string(),
            },
            services: ServicesConfig {
                transcription_url: "https://api.sarvam.ai/speech-to-text".to_string(),
                transcription_model: "saarika:v2".to_string(),
                transcription_language: "en-IN".to_string(),
                chat_url: "https://api.mistral.ai/v1/chat/completions".to_string(),
                chat_model: "mistral-small-latest".to_string(),
                tts_url: "https://api.elevenlabs.io/v1/text-to-speech".to_string(),
                tts_voice_id: "JBFqnCBsd6RMkjVDRZzb".to_string(),
                tts_model_id: "eleven_multilingual_v2".to_string(),
                connect_timeout_secs: 10,
            },
            logging: LoggingConfig {
                conversation_log_dir: None,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, `config.toml` and the environment.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            // Double underscore separates nesting so field names may keep their underscores.
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.audio.sample_rate == 0 {
            return Err(anyhow::anyhow!("Audio sample rate must be greater than 0"));
        }

        if self.audio.window_samples == 0 {
            return Err(anyhow::anyhow!("VAD window size must be greater than 0"));
        }

        if self.vad.pause_threshold_ms == 0 {
            return Err(anyhow::anyhow!("Pause threshold must be greater than 0"));
        }

        if self.session.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }

        if self.session.heartbeat_interval_secs == 0 {
            return Err(anyhow::anyhow!("Heartbeat interval must be greater than 0"));
        }

        if self.session.client_timeout_secs <= self.session.heartbeat_interval_secs {
            return Err(anyhow::anyhow!(
                "Client timeout ({}s) must be longer than the heartbeat interval ({}s)",
                self.session.client_timeout_secs,
                self.session.heartbeat_interval_secs
            ));
        }

        if self.session.upstream_idle_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Upstream idle timeout must be greater than 0"));
        }

        if self.session.segment_channel_capacity == 0 {
            return Err(anyhow::anyhow!("Segment channel capacity must be greater than 0"));
        }

        if self.assistant.fallback_reply.trim().is_empty() {
            return Err(anyhow::anyhow!("Fallback reply cannot be empty"));
        }

        Ok(())
    }

    pub fn pause_threshold(&self) -> Duration {
        Duration::from_millis(self.vad.pause_threshold_ms)
    }

    pub fn upstream_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.session.upstream_idle_timeout_secs)
    }
}

/// API keys for the three upstream services. All three are required at startup.
#[derive(Clone)]
pub struct ServiceCredentials {
    pub transcription_key: String,
    pub chat_key: String,
    pub tts_key: String,
}

impl ServiceCredentials {
    pub const TRANSCRIPTION_VAR: &'static str = "SARVAM_API_KEY";
    pub const CHAT_VAR: &'static str = "MISTRAL_API_KEY";
    pub const TTS_VAR: &'static str = "ELEVENLABS_API_KEY";

    pub fn from_env() -> AppResult<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> AppResult<Self> {
        let require = |name: &str| -> AppResult<String> {
            match lookup(name) {
                Some(value) if !value.trim().is_empty() => Ok(value),
                _ => Err(AppError::ConfigError(format!(
                    "{} is not set in the environment",
                    name
                ))),
            }
        };

        Ok(Self {
            transcription_key: require(Self::TRANSCRIPTION_VAR)?,
            chat_key: require(Self::CHAT_VAR)?,
            tts_key: require(Self::TTS_VAR)?,
        })
    }
}

// Keys must never reach the logs.
impl std::fmt::Debug for ServiceCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceCredentials").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.audio.window_samples, 512);
        assert_eq!(config.pause_threshold(), Duration::from_millis(800));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.vad.pause_threshold_ms = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.assistant.fallback_reply = "   ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_heartbeat_validation() {
        let mut config = AppConfig::default();
        config.session.heartbeat_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.session.client_timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.session.heartbeat_interval_secs = 30;
        config.session.client_timeout_secs = 30;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.session.upstream_idle_timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.session.heartbeat_interval_secs = 5;
        config.session.client_timeout_secs = 6;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults_survive_config_roundtrip() {
        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default()).unwrap())
            .build()
            .unwrap();
        let config: AppConfig = settings.try_deserialize().unwrap();
        assert_eq!(config.audio.encoding, SampleEncoding::F32Le);
        assert!(config.session.access_token.is_none());
    }

    #[test]
    fn test_missing_credential_is_config_error() {
        let vars: HashMap<&str, &str> = [
            (ServiceCredentials::TRANSCRIPTION_VAR, "stt"),
            (ServiceCredentials::CHAT_VAR, "llm"),
        ]
        .into_iter()
        .collect();

        let result = ServiceCredentials::from_lookup(|name| vars.get(name).map(|v| v.to_string()));
        match result {
            Err(AppError::ConfigError(msg)) => assert!(msg.contains(ServiceCredentials::TTS_VAR)),
            other => panic!("expected config error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_credentials_debug_hides_keys() {
        let creds = ServiceCredentials::from_lookup(|_| Some("secret-value".to_string())).unwrap();
        assert!(!format!("{:?}", creds).contains("secret-value"));
    }
}
