use crate::config::ExplorerConfig;
use crate::error::{ExplorerError, Result};
use crate::record::{ObservationRecord, QueryWindow, RawObservation, RawPage, RawTaxon, Taxon};
use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use log::{debug, info};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Free-text lookup against the taxonomy index.
#[async_trait]
pub trait TaxonSearch: Send + Sync {
    /// Ranked by provider relevance. Blank input returns an empty list without a request.
    async fn search_taxa(&self, text: &str) -> Result<Vec<Taxon>>;
}

/// Recent observations of one taxon.
#[async_trait]
pub trait ObservationQuery: Send + Sync {
    async fn fetch_observations(&self, taxon_id: u64, days_ago: u32)
    -> Result<Vec<ObservationRecord>>;
}

/// Client for the iNaturalist v1 REST API.
pub struct InatClient {
    client: Client,
    pub(crate) base_url: String,
    pub(crate) taxon_page_size: u32,
    pub(crate) observation_page_size: u32,
    pub(crate) locale: String,
}

impl InatClient {
    pub fn from_config(config: &ExplorerConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.as_str())
            .build()?;

        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            taxon_page_size: config.taxon_page_size,
            observation_page_size: config.observation_page_size,
            locale: config.locale.clone(),
        })
    }

    /// Looks up a single taxon by id. `None` when the provider has no such taxon.
    pub async fn fetch_taxon(&self, taxon_id: u64) -> Result<Option<Taxon>> {
        let query = [("locale", self.locale.clone())];
        let body = self.get_json(&format!("taxa/{}", taxon_id), &query).await?;
        Ok(parse_taxa_page(body, 1)?.into_iter().next())
    }

    async fn get_json(&self, endpoint: &str, query: &[(&str, String)]) -> Result<Value> {
        let url = format!("{}/{}", self.base_url, endpoint);
        debug!("GET {} {:?}", url, query);

        let response = self.client.get(&url).query(query).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ExplorerError::HttpStatus {
                status: status.as_u16(),
                endpoint: endpoint.to_string(),
            });
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl TaxonSearch for InatClient {
    async fn search_taxa(&self, text: &str) -> Result<Vec<Taxon>> {
        let text = text.trim();
        if text.is_empty() {
            debug!("Skipping taxon search for blank query");
            return Ok(Vec::new());
        }

        let body = self
            .get_json("taxa", &taxa_query(text, self.taxon_page_size, &self.locale))
            .await?;
        let taxa = parse_taxa_page(body, self.taxon_page_size as usize)?;
        info!("Taxon search for {:?} returned {} candidates", text, taxa.len());
        Ok(taxa)
    }
}

#[async_trait]
impl ObservationQuery for InatClient {
    async fn fetch_observations(
        &self,
        taxon_id: u64,
        days_ago: u32,
    ) -> Result<Vec<ObservationRecord>> {
        if taxon_id == 0 {
            return Err(ExplorerError::InvalidQuery(
                "taxon id must be positive".to_string(),
            ));
        }

        let today = Local::now().date_naive();
        let query = observation_query(taxon_id, days_ago, today, self.observation_page_size)?;
        let body = self.get_json("observations", &query).await?;
        let records = parse_observation_page(body)?;

        let unmappable = records.iter().filter(|r| !r.is_mappable()).count();
        info!(
            "Fetched {} observations of taxon {} over {} days ({} unmappable)",
            records.len(),
            taxon_id,
            days_ago,
            unmappable
        );
        Ok(records)
    }
}

pub fn taxa_query(text: &str, per_page: u32, locale: &str) -> Vec<(&'static str, String)> {
    vec![
        ("q", text.to_string()),
        ("per_page", per_page.to_string()),
        ("locale", locale.to_string()),
    ]
}

/// Query for up to `per_page` verified, photographed observations between
/// `today - days_ago` and `today`, newest first.
pub fn observation_query(
    taxon_id: u64,
    days_ago: u32,
    today: NaiveDate,
    per_page: u32,
) -> Result<Vec<(&'static str, String)>> {
    let window = QueryWindow {
        taxon_id: Some(taxon_id),
        days_ago,
    };
    let (start, end) = window.date_range(today)?;

    Ok(vec![
        ("taxon_id", taxon_id.to_string()),
        ("d1", start.format("%Y-%m-%d").to_string()),
        ("d2", end.format("%Y-%m-%d").to_string()),
        ("per_page", per_page.to_string()),
        ("order_by", "observed_on".to_string()),
        ("order", "desc".to_string()),
        ("verifiable", "true".to_string()),
        ("photos", "true".to_string()),
    ])
}

fn parse_page<T: DeserializeOwned>(body: Value, what: &str) -> Result<RawPage<T>> {
    let page: RawPage<T> = serde_json::from_value(body)
        .map_err(|e| ExplorerError::parse(format!("unexpected {} response: {}", what, e)))?;
    debug!(
        "{} page {:?}/{:?} per page, {:?} total",
        what, page.page, page.per_page, page.total_results
    );
    Ok(page)
}

pub fn parse_taxa_page(body: Value, limit: usize) -> Result<Vec<Taxon>> {
    let page: RawPage<RawTaxon> = parse_page(body, "taxa")?;
    Ok(page.results.into_iter().take(limit).map(Taxon::from).collect())
}

pub fn parse_observation_page(body: Value) -> Result<Vec<ObservationRecord>> {
    let page: RawPage<RawObservation> = parse_page(body, "observations")?;
    page.results
        .into_iter()
        .map(ObservationRecord::try_from)
        .collect()
}
