use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Capture engine options keyed by the engine's own (camelCase) option names.
/// Keys are not validated; whatever is present is handed to the engine.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CaptureSettings(Map<String, Value>);

impl CaptureSettings {
    pub fn new() -> Self {
        CaptureSettings(Map::new())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: &str, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for CaptureSettings {
    fn from(m: Map<String, Value>) -> Self {
        CaptureSettings(m)
    }
}

lazy_static! {
    pub static ref DEFAULT_CAPTURE_SETTINGS: CaptureSettings = {
        let defaults = json!({
            "logLevel": "silent",
            "headless": true,
            "captureTimeout": 60000,
            "loadTimeout": 20000,
            "networkIdleTimeout": 20000,
            "behaviorsTimeout": 20000,
            "captureVideoAsAttachment": true,
            "captureVideoAsAttachmentTimeout": 30000,
            "captureWindowX": 1600,
            "captureWindowY": 900,
            "maxCaptureSize": 209715200,
            "autoScroll": true,
            "autoPlayMedia": true,
            "grabSecondaryResources": true,
            "runSiteSpecificBehaviors": true,
            "screenshot": true,
            "pdfSnapshot": false,
            "domSnapshot": false,
            "captureCertificatesAsAttachment": true,
            "provenanceSummary": true,
            "attachmentsBypassLimits": true,
            "userAgentSuffix": "",
        });
        match defaults {
            Value::Object(m) => CaptureSettings(m),
            _ => CaptureSettings::new(),
        }
    };
}

/// Shallow-merges `overrides` onto a copy of `defaults`; override values win
/// key by key.
pub fn resolve_settings(
    defaults: &CaptureSettings,
    overrides: Option<&CaptureSettings>,
) -> CaptureSettings {
    let mut settings = defaults.clone();
    if let Some(o) = overrides {
        for (k, v) in o.iter() {
            settings.0.insert(k.clone(), v.clone());
        }
    }
    settings
}
