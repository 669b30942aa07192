use serde::{Deserialize, Serialize};

use crate::audio::AudioFormat;

/// Number of synthesis parameter slots carried by every talk request
pub const MAX_PARAMS: usize = 12;

/// Host label reported when the status probe could not reach the server
pub const SERVER_NOT_FOUND: &str = "Server Not Found";

// Talk parameters as understood by the server
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TalkParams {
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub mute: bool,
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub force_mono: bool,
    #[serde(default, deserialize_with = "deserialize_integer")]
    pub cast: i32,
    #[serde(
        default = "default_param_values",
        deserialize_with = "deserialize_param_values"
    )]
    pub params: [f32; MAX_PARAMS],
}

fn default_param_values() -> [f32; MAX_PARAMS] {
    [1.0; MAX_PARAMS]
}

// The server encodes every scalar as a JSON number
#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Bool(bool),
    Number(f64),
}

fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Scalar::deserialize(deserializer)? {
        Scalar::Bool(b) => b,
        Scalar::Number(n) => n as i64 != 0,
    })
}

fn deserialize_integer<'de, D>(deserializer: D) -> Result<i32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Scalar::deserialize(deserializer)? {
        Scalar::Bool(b) => i32::from(b),
        Scalar::Number(n) => n as i32,
    })
}

// Servers may report fewer (or more) slots than MAX_PARAMS
fn deserialize_param_values<'de, D>(deserializer: D) -> Result<[f32; MAX_PARAMS], D::Error>
where
    D: serde::Deserializer<'de>,
{
    let values = Vec::<f32>::deserialize(deserializer)?;
    let mut params = default_param_values();
    for (slot, value) in params.iter_mut().zip(values) {
        *slot = value;
    }
    Ok(params)
}

impl Default for TalkParams {
    fn default() -> Self {
        Self {
            mute: true,
            force_mono: true,
            cast: 0,
            params: default_param_values(),
        }
    }
}

/// One synthesis request: voice, parameter values and the text to speak.
/// The request is treated as immutable once it has been handed to a session.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TalkRequest {
    pub params: TalkParams,
    pub text: String,
}

impl TalkRequest {
    pub fn new(cast: i32, text: impl Into<String>) -> Self {
        Self {
            params: TalkParams {
                cast,
                ..Default::default()
            },
            text: text.into(),
        }
    }

    pub fn with_params(mut self, values: &[f32]) -> Self {
        for (slot, value) in self.params.params.iter_mut().zip(values) {
            *slot = *value;
        }
        self
    }

    /// Query string pairs for the `/talk` endpoint
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let params = self
            .params
            .params
            .iter()
            .map(|v| format!("{:.3}", v))
            .collect::<Vec<_>>()
            .join(",");

        vec![
            ("text", self.text.clone()),
            ("cast", self.params.cast.to_string()),
            ("mute", u8::from(self.params.mute).to_string()),
            ("force_mono", u8::from(self.params.force_mono).to_string()),
            ("params", params),
        ]
    }
}

/// Cast entry of the `/params` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CastInfo {
    pub id: i32,
    pub name: String,
    #[serde(default)]
    pub param_names: Vec<String>,
}

/// Body of the `/params` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerStatus {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub params: TalkParams,
    #[serde(default, rename = "avators")]
    pub casts: Vec<CastInfo>,
}

impl ServerStatus {
    pub fn not_found() -> Self {
        Self {
            host: SERVER_NOT_FOUND.to_string(),
            params: TalkParams::default(),
            casts: Vec::new(),
        }
    }

    pub fn is_reachable(&self) -> bool {
        self.host != SERVER_NOT_FOUND
    }
}

/// One frame of the `/talk` response stream.
/// An empty `data` payload marks the end of the talk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioChunk {
    pub format: AudioFormat,
    pub frequency: i32,
    pub channels: i32,
    pub data: Vec<u8>,
}

impl AudioChunk {
    pub fn is_terminator(&self) -> bool {
        self.data.is_empty()
    }

    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(frame: &[u8]) -> anyhow::Result<Self> {
        Ok(bincode::deserialize(frame)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_params() {
        let params = TalkParams::default();
        assert!(params.mute);
        assert!(params.force_mono);
        assert_eq!(params.params, [1.0; MAX_PARAMS]);
    }

    #[test]
    fn test_query_pairs() {
        let request = TalkRequest::new(2, "こんにちは").with_params(&[0.5, 1.25]);
        let pairs = request.query_pairs();

        assert_eq!(pairs[0], ("text", "こんにちは".to_string()));
        assert_eq!(pairs[1], ("cast", "2".to_string()));
        assert_eq!(pairs[2], ("mute", "1".to_string()));
        assert!(pairs[4].1.starts_with("0.500,1.250,1.000,"));
        assert_eq!(pairs[4].1.split(',').count(), MAX_PARAMS);
    }

    #[test]
    fn test_status_json() {
        let json = r#"{
            "host": "VOICEROID2",
            "params": {"mute": 1, "force_mono": true, "cast": 1.0},
            "avators": [
                {"id": 0, "name": "Alice", "param_names": ["volume", "speed"]},
                {"id": 1, "name": "Bob"}
            ]
        }"#;
        let status: ServerStatus = serde_json::from_str(json).unwrap();

        assert_eq!(status.host, "VOICEROID2");
        assert!(status.params.mute);
        assert!(status.params.force_mono);
        assert_eq!(status.params.cast, 1);
        assert_eq!(status.params.params, [1.0; MAX_PARAMS]);
        assert_eq!(status.casts.len(), 2);
        assert_eq!(status.casts[0].param_names.len(), 2);
        assert!(status.casts[1].param_names.is_empty());
        assert!(status.is_reachable());
        assert!(!ServerStatus::not_found().is_reachable());
    }

    #[test]
    fn test_short_param_array() {
        let params: TalkParams = serde_json::from_str(r#"{"params": [0.25, 0.5]}"#).unwrap();
        assert_eq!(params.params[0], 0.25);
        assert_eq!(params.params[1], 0.5);
        assert_eq!(params.params[2], 1.0);
    }

    #[test]
    fn test_terminator_chunk() {
        let chunk = AudioChunk {
            format: AudioFormat::S16,
            frequency: 48000,
            channels: 1,
            data: Vec::new(),
        };
        let decoded = AudioChunk::decode(&chunk.encode().unwrap()).unwrap();
        assert!(decoded.is_terminator());
        assert_eq!(decoded.frequency, 48000);
    }
}
