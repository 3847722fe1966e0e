//! HTTP navigator adapter
//!
//! Speaks a JSON decide protocol against a navigator service endpoint.
//! Model selection is per tier; the API key is read from the environment
//! variable named in config at construction time, never later.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::config::NavigatorSettings;

use super::client::{DecideRequest, Navigator, NavigatorError, Tier};
use super::decision::ActionDecision;

/// HTTP-backed navigator
pub struct HttpNavigator {
    model: String,
    vision_model: String,
    api_key: String,
    base_url: String,
    http: Client,
    timeout: Duration,
}

impl HttpNavigator {
    /// Create a client from configuration
    ///
    /// Reads the API key from the environment variable named in settings.
    pub fn from_settings(settings: &NavigatorSettings) -> Result<Self, NavigatorError> {
        let api_key = std::env::var(&settings.api_key_env).map_err(|_| {
            NavigatorError::Malformed(format!("Environment variable {} not set", settings.api_key_env))
        })?;

        let timeout = Duration::from_millis(settings.timeout_ms);
        let http = Client::builder().timeout(timeout).build().map_err(NavigatorError::Network)?;

        Ok(Self {
            model: settings.model.clone(),
            vision_model: settings.vision_model.clone(),
            api_key,
            base_url: settings.base_url.clone(),
            http,
            timeout,
        })
    }

    /// Model identifier used for a tier
    pub fn model_for(&self, tier: Tier) -> &str {
        match tier {
            Tier::Structured => &self.model,
            Tier::Visual => &self.vision_model,
        }
    }

    fn build_request_body(&self, request: &DecideRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model_for(request.tier),
            "intent": request.intent,
            "tier": request.tier,
            "escalation_reason": request.escalation,
            "observation": {
                "url": request.observation.current_url,
                "tree": request.observation.capture.encoded,
                "interactive_index": request.observation.capture.interactive_index,
                "truncated": request.observation.capture.truncated,
                "history": request.observation.history,
                "previous_actions": request.observation.previous_actions,
            },
        });

        if let Some(image) = &request.observation.viewport_image {
            body["observation"]["viewport_image"] = serde_json::json!({
                "base64": image.base64,
                "mime": image.mime,
                "width": image.width,
                "height": image.height,
            });
        }
        if let Some(correction) = &request.correction {
            body["correction"] = serde_json::json!(correction);
        }
        if let Some(error) = &request.observation.error_context {
            body["observation"]["error_context"] = serde_json::json!(error);
        }

        body
    }

    fn parse_response(&self, response: DecideResponse) -> Result<ActionDecision, NavigatorError> {
        let decision = response.decision;
        decision
            .validate()
            .map_err(|detail| NavigatorError::Malformed(detail.message))?;
        Ok(decision)
    }
}

#[derive(Debug, Deserialize)]
struct DecideResponse {
    decision: ActionDecision,
}

#[async_trait]
impl Navigator for HttpNavigator {
    async fn decide(&self, request: DecideRequest) -> Result<ActionDecision, NavigatorError> {
        let url = format!("{}/v1/decide", self.base_url);
        let body = self.build_request_body(&request);

        let response = self
            .http
            .post(url)
            .header("x-api-key", self.api_key.clone())
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    NavigatorError::Timeout(self.timeout)
                } else {
                    NavigatorError::Network(e)
                }
            })?;

        let status = response.status().as_u16();
        if status == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(NavigatorError::RateLimited {
                retry_after: Duration::from_secs(retry_after),
            });
        }
        if status >= 400 {
            let message = response.text().await.unwrap_or_else(|_| "<no body>".to_string());
            return Err(NavigatorError::Api { status, message });
        }

        let parsed: DecideResponse = response
            .json()
            .await
            .map_err(|e| NavigatorError::Malformed(e.to_string()))?;
        self.parse_response(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::navigator::ActionKind;
    use crate::session::{Observation, StubPage};

    fn settings() -> NavigatorSettings {
        NavigatorSettings {
            model: "structured-a".to_string(),
            vision_model: "visual-b".to_string(),
            base_url: "https://navigator.test".to_string(),
            api_key_env: "GHOSTRUN_TEST_NAV_KEY".to_string(),
            timeout_ms: 5_000,
        }
    }

    fn client() -> HttpNavigator {
        unsafe { std::env::set_var("GHOSTRUN_TEST_NAV_KEY", "secret") };
        HttpNavigator::from_settings(&settings()).unwrap()
    }

    fn request(tier: Tier) -> DecideRequest {
        let capture = StubPage::simple("https://a.test/", 2).capture;
        DecideRequest::new("buy the thing", Observation::structured(capture), tier)
    }

    #[test]
    fn test_missing_api_key_env() {
        let mut settings = settings();
        settings.api_key_env = "GHOSTRUN_TEST_NAV_KEY_DEFINITELY_UNSET".to_string();
        assert!(matches!(
            HttpNavigator::from_settings(&settings),
            Err(NavigatorError::Malformed(_))
        ));
    }

    #[test]
    fn test_model_selection_per_tier() {
        let client = client();
        assert_eq!(client.model_for(Tier::Structured), "structured-a");
        assert_eq!(client.model_for(Tier::Visual), "visual-b");
    }

    #[test]
    fn test_request_body_shape() {
        let client = client();
        let body = client.build_request_body(&request(Tier::Structured));

        assert_eq!(body["model"], "structured-a");
        assert_eq!(body["tier"], "structured");
        assert_eq!(body["observation"]["url"], "https://a.test/");
        assert!(body["observation"].get("viewport_image").is_none());
        assert!(body.get("correction").is_none());
    }

    #[test]
    fn test_request_body_includes_image_and_correction() {
        let client = client();
        let page = StubPage::simple("https://a.test/", 2);
        let observation = Observation::structured(page.capture).with_image(page.image);
        let request = DecideRequest::new("intent", observation, Tier::Visual).with_correction("bad json");

        let body = client.build_request_body(&request);
        assert_eq!(body["model"], "visual-b");
        assert_eq!(body["observation"]["viewport_image"]["mime"], "image/jpeg");
        assert_eq!(body["correction"], "bad json");
    }

    #[test]
    fn test_parse_response_validates_decision() {
        let client = client();
        let response = DecideResponse {
            decision: ActionDecision {
                kind: ActionKind::Click,
                target: None,
                text: None,
                key: None,
                confidence: 0.9,
                reasoning: "click something".to_string(),
            },
        };
        // CLICK without a target is malformed output, not a silent pass
        assert!(matches!(
            client.parse_response(response),
            Err(NavigatorError::Malformed(_))
        ));
    }
}
