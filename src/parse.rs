use crate::classifier::ExecutionContext;
use crate::config::ExplorerConfig;
use crate::record::DAY_PRESETS;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "species-explorer")]
#[command(about = "Explore recent iNaturalist sightings of a species")]
#[command(version = "1.0")]
pub(crate) struct Args {
    /// JSON file with explorer settings; flags below override it
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Base URL of the iNaturalist API
    #[arg(long, global = true, env = "SPECIES_EXPLORER_API_URL")]
    pub api_url: Option<String>,

    /// HTTP timeout in seconds
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// Image classification model identifier
    #[arg(long, global = true, env = "SPECIES_EXPLORER_MODEL")]
    pub model: Option<String>,

    /// Base URL of the hosted inference endpoint
    #[arg(long, global = true, env = "SPECIES_EXPLORER_INFERENCE_URL")]
    pub inference_url: Option<String>,

    /// Access token for the inference endpoint
    #[arg(long, global = true, env = "HF_TOKEN", hide_env_values = true)]
    pub hf_token: Option<String>,

    /// Execution context the classifier runs in
    #[arg(long, global = true, value_enum)]
    pub context: Option<ExecutionContext>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Search the taxonomy for a species
    Search {
        /// Free-text species name
        text: String,
    },
    /// Show recent observations of a taxon
    Observe {
        /// Taxon identifier
        #[arg(short, long)]
        taxon_id: u64,

        /// Sightings in the past N days
        #[arg(short, long, value_parser = parse_days)]
        days: Option<u32>,

        /// Write the observations to a CSV file
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Write the mappable observations to a GeoJSON file
        #[arg(long)]
        geojson: Option<PathBuf>,
    },
    /// Identify the subject of a photo
    Classify {
        /// Image file to classify
        image: PathBuf,

        /// Look up sightings of the top prediction
        #[arg(short, long)]
        select: bool,

        /// Sightings in the past N days
        #[arg(short, long, value_parser = parse_days)]
        days: Option<u32>,
    },
    /// Interactive session
    Explore {
        /// Initial day window
        #[arg(short, long, value_parser = parse_days)]
        days: Option<u32>,
    },
}

pub(crate) fn parse_days(value: &str) -> Result<u32, String> {
    let days: u32 = value
        .parse()
        .map_err(|_| format!("{value} is not a number of days"))?;
    if DAY_PRESETS.contains(&days) {
        Ok(days)
    } else {
        Err(format!("days must be one of {:?}", DAY_PRESETS))
    }
}

impl Args {
    /// Layers the command-line overrides on top of `base`.
    pub fn apply_to(&self, mut base: ExplorerConfig) -> ExplorerConfig {
        if let Some(url) = &self.api_url {
            base.api_url = url.clone();
        }
        if let Some(timeout) = self.timeout {
            base.timeout_secs = timeout;
        }
        if let Some(model) = &self.model {
            base.model_id = model.clone();
        }
        if let Some(url) = &self.inference_url {
            base.inference_url = url.clone();
        }
        if let Some(token) = &self.hf_token {
            base.inference_token = Some(token.clone());
        }
        if let Some(context) = self.context {
            base.context = context;
        }
        base
    }
}
