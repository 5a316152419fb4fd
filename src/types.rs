use serde::{Deserialize, Serialize};

/// Bookkeeping state set by the producer. The worker passes it through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CaptureState {
    #[default]
    NewRequest,
    Pending,
    DoneSuccess,
    DoneFailure,
}

/// One unit of work as it sits on the request queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureRequest {
    #[serde(rename = "SeedURL")]
    pub seed_url: String,
    #[serde(rename = "SeedShadowID")]
    pub seed_shadow_id: String,
    #[serde(rename = "Status", default)]
    pub state: CaptureState,
}

impl CaptureRequest {
    pub fn new(seed_url: &str, seed_shadow_id: &str) -> Self {
        CaptureRequest {
            seed_url: seed_url.into(),
            seed_shadow_id: seed_shadow_id.into(),
            state: CaptureState::Pending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureMetadata {
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
    #[serde(rename = "CapturedURL")]
    pub captured_url: String,
}

/// Outcome reported for a single request. An empty `error_messages` means
/// every stage succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureResult {
    #[serde(rename = "SeedShadowID")]
    pub seed_shadow_id: String,
    #[serde(rename = "Done")]
    pub done: bool,
    #[serde(rename = "ErrorMessages")]
    pub error_messages: Vec<String>,
    #[serde(rename = "CaptureMetadata")]
    pub capture_metadata: Option<CaptureMetadata>,
}

impl CaptureResult {
    pub fn new(seed_shadow_id: &str) -> Self {
        CaptureResult {
            seed_shadow_id: seed_shadow_id.into(),
            done: false,
            error_messages: vec![],
            capture_metadata: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.done && self.error_messages.is_empty()
    }
}
