//! Sampling parameters and the generation request/response model.

use serde::{Deserialize, Serialize};

/// Optional sampling knobs for one generation request.
///
/// Unset fields are omitted from the wire object; the manager fills
/// them from [`SamplingDefaults`] before transmission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Top-k sampling cutoff.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    /// Top-p (nucleus) sampling cutoff.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// Maximum tokens to generate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Repetition penalty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repeat_penalty: Option<f32>,
}

impl SamplingParams {
    /// Fill unset fields from the configured defaults.
    #[must_use]
    pub fn or_defaults(&self, defaults: &SamplingDefaults) -> Self {
        Self {
            temperature: self.temperature.or(Some(defaults.temperature)),
            top_k: self.top_k.or(Some(defaults.top_k)),
            top_p: self.top_p.or(Some(defaults.top_p)),
            max_tokens: self.max_tokens.or(Some(defaults.max_tokens)),
            repeat_penalty: self.repeat_penalty.or(Some(defaults.repeat_penalty)),
        }
    }
}

/// Concrete sampling defaults supplied by configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingDefaults {
    /// Default sampling temperature.
    pub temperature: f32,
    /// Default top-k cutoff.
    pub top_k: u32,
    /// Default top-p cutoff.
    pub top_p: f32,
    /// Default generation length limit.
    pub max_tokens: u32,
    /// Default repetition penalty.
    pub repeat_penalty: f32,
}

impl Default for SamplingDefaults {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_k: 40,
            top_p: 0.9,
            max_tokens: 512,
            repeat_penalty: 1.1,
        }
    }
}

/// One generation request, immutable once constructed.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationRequest {
    /// Prompt text submitted to the engine.
    pub prompt: String,
    /// Sampling parameters; unset fields are omitted on the wire.
    pub params: SamplingParams,
}

impl GenerationRequest {
    /// Create a request from a prompt and its parameters.
    pub fn new(prompt: impl Into<String>, params: SamplingParams) -> Self {
        Self {
            prompt: prompt.into(),
            params,
        }
    }
}

/// Engine reply on the framed-socket transport.
///
/// Unknown fields are ignored so the engine may attach extra metadata.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerationResponse {
    /// Generated text.
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_params_are_omitted_on_the_wire() {
        let request = GenerationRequest::new("2+2?", SamplingParams::default());
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(json, r#"{"prompt":"2+2?","params":{}}"#);
    }

    #[test]
    fn or_defaults_fills_only_unset_fields() {
        let params = SamplingParams {
            temperature: Some(0.2),
            ..SamplingParams::default()
        };
        let filled = params.or_defaults(&SamplingDefaults::default());
        assert_eq!(filled.temperature, Some(0.2));
        assert_eq!(filled.top_k, Some(40));
        assert_eq!(filled.max_tokens, Some(512));
    }

    #[test]
    fn response_ignores_extra_fields() {
        let response: GenerationResponse =
            serde_json::from_str(r#"{"text":"4","tokens":3,"finish_reason":"stop"}"#).unwrap();
        assert_eq!(response.text, "4");
    }
}
