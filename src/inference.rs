use crate::classifier::{ClassificationPipeline, ImageInput, ModelLoader, RawPrediction};
use crate::config::ExplorerConfig;
use crate::error::{ExplorerError, Result};
use async_trait::async_trait;
use log::{debug, info};
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use std::sync::Arc;

const IMAGE_CLASSIFICATION: &str = "image-classification";

#[derive(Debug, Deserialize)]
struct ModelCard {
    #[serde(default)]
    pipeline_tag: Option<String>,
}

pub struct HttpModelLoader {
    client: Client,
    hub_url: String,
    inference_url: String,
    token: Option<String>,
}

impl HttpModelLoader {
    pub fn from_config(config: &ExplorerConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.as_str())
            .build()?;

        Ok(Self {
            client,
            hub_url: config.model_hub_url.trim_end_matches('/').to_string(),
            inference_url: config.inference_url.trim_end_matches('/').to_string(),
            token: config.inference_token.clone(),
        })
    }
}

fn check_model_card(model_id: &str, card: &ModelCard) -> Result<()> {
    match card.pipeline_tag.as_deref() {
        Some(IMAGE_CLASSIFICATION) => Ok(()),
        other => Err(ExplorerError::ModelLoadFailed(format!(
            "{} is not an image classification model (pipeline: {})",
            model_id,
            other.unwrap_or("unknown")
        ))),
    }
}

#[async_trait]
impl ModelLoader for HttpModelLoader {
    async fn load(&self, model_id: &str) -> Result<Arc<dyn ClassificationPipeline>> {
        let card_url = format!("{}/{}", self.hub_url, model_id);
        debug!("Fetching model card {}", card_url);

        let response = self
            .client
            .get(&card_url)
            .send()
            .await
            .map_err(|e| ExplorerError::ModelLoadFailed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ExplorerError::ModelLoadFailed(format!(
                "model card for {} returned HTTP {}",
                model_id,
                response.status()
            )));
        }
        let card: ModelCard = response
            .json()
            .await
            .map_err(|e| ExplorerError::ModelLoadFailed(e.to_string()))?;
        check_model_card(model_id, &card)?;

        info!("Using hosted inference for {}", model_id);
        Ok(Arc::new(HttpPipeline {
            client: self.client.clone(),
            url: format!("{}/{}", self.inference_url, model_id),
            token: self.token.clone(),
        }))
    }
}

pub struct HttpPipeline {
    client: Client,
    url: String,
    token: Option<String>,
}

#[async_trait]
impl ClassificationPipeline for HttpPipeline {
    async fn run(&self, input: &ImageInput) -> Result<Vec<RawPrediction>> {
        let mut request = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "image/png")
            .body(input.to_png()?);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ExplorerError::HttpStatus {
                status: status.as_u16(),
                endpoint: self.url.clone(),
            });
        }

        let body: serde_json::Value = response.json().await?;
        serde_json::from_value(body)
            .map_err(|e| ExplorerError::parse(format!("unexpected inference response: {}", e)))
    }
}
