use crate::classifier::ExecutionContext;
use crate::record::DEFAULT_DAYS;
use serde::Deserialize;
use std::time::Duration;

pub const INAT_API_URL: &str = "https://api.inaturalist.org/v1";
pub const DEFAULT_MODEL: &str = "google/vit-base-patch16-224";
pub const INFERENCE_URL: &str = "https://router.huggingface.co/hf-inference/models";
pub const MODEL_HUB_URL: &str = "https://huggingface.co/api/models";
pub const USER_AGENT: &str = concat!("species-explorer/", env!("CARGO_PKG_VERSION"));

/// Runtime settings shared by the remote clients and the classifier.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExplorerConfig {
    pub api_url: String,
    pub timeout_secs: u64,
    pub user_agent: String,
    pub taxon_page_size: u32,
    pub observation_page_size: u32,
    pub locale: String,
    pub default_days: u32,
    pub model_id: String,
    pub inference_url: String,
    pub model_hub_url: String,
    pub inference_token: Option<String>,
    pub model_input_edge: u32,
    pub context: ExecutionContext,
}

impl ExplorerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            api_url: INAT_API_URL.to_string(),
            timeout_secs: 10,
            user_agent: USER_AGENT.to_string(),
            taxon_page_size: 10,
            observation_page_size: 200,
            locale: "en".to_string(),
            default_days: DEFAULT_DAYS,
            model_id: DEFAULT_MODEL.to_string(),
            inference_url: INFERENCE_URL.to_string(),
            model_hub_url: MODEL_HUB_URL.to_string(),
            inference_token: None,
            model_input_edge: 224,
            context: ExecutionContext::Interactive,
        }
    }
}
