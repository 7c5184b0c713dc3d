use std::sync::Mutex;

use service_module::collaborators::{
    ContentGenerator, GenerateParams, GeneratedContent, OutboundSender,
};
use service_module::email::OutgoingEmail;
use service_module::routing::RouteConfig;
use service_module::UpstreamError;

pub fn test_route_config() -> RouteConfig {
    RouteConfig::new("service.test", vec!["assistant".to_string()], "reply")
}

/// Generator fake: records every request and fails when the profile carries
/// the configured marker.
#[derive(Debug, Default)]
pub struct FakeGenerator {
    pub fail_marker: Option<String>,
    pub calls: Mutex<Vec<GenerateParams>>,
}

impl FakeGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(marker: &str) -> Self {
        Self {
            fail_marker: Some(marker.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl ContentGenerator for FakeGenerator {
    fn generate(&self, params: &GenerateParams) -> Result<GeneratedContent, UpstreamError> {
        self.calls.lock().unwrap().push(params.clone());
        if let Some(marker) = self.fail_marker.as_deref() {
            if params.profile.contains(marker) {
                return Err(UpstreamError("generation exploded".to_string()));
            }
        }
        Ok(GeneratedContent {
            content: format!("generated content ({} chars of profile)", params.profile.len()),
            model: "fake-model".to_string(),
            token_count: 42,
        })
    }
}

/// Sender fake: records every outgoing email and fails for the configured
/// recipient.
#[derive(Debug, Default)]
pub struct FakeSender {
    pub fail_to: Option<String>,
    pub sent: Mutex<Vec<OutgoingEmail>>,
}

impl FakeSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_for(to: &str) -> Self {
        Self {
            fail_to: Some(to.to_string()),
            sent: Mutex::new(Vec::new()),
        }
    }
}

impl OutboundSender for FakeSender {
    fn send(&self, email: &OutgoingEmail) -> Result<(), UpstreamError> {
        if self.fail_to.as_deref() == Some(email.to.as_str()) {
            return Err(UpstreamError("send rejected".to_string()));
        }
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}
