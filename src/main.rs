mod classifier;
mod client;
mod config;
mod error;
mod export;
mod geo;
mod inference;
mod orchestrator;
mod parse;
mod record;
mod repl;
mod stats;
mod util;

use crate::classifier::ImageClassifier;
use crate::client::InatClient;
use crate::config::ExplorerConfig;
use crate::error::Operation;
use crate::inference::HttpModelLoader;
use crate::orchestrator::SelectionOrchestrator;
use crate::parse::{Args, Command};
use crate::record::Taxon;
use crate::util::{print_hms, print_state, spinner, taxon_line};
use clap::Parser;
use log::{info, warn};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

fn load_config(args: &Args) -> Result<ExplorerConfig, Box<dyn std::error::Error>> {
    let base = match &args.config {
        Some(path) => {
            info!("Loading settings from {}", path.display());
            serde_json::from_str(&std::fs::read_to_string(path)?)?
        }
        None => ExplorerConfig::default(),
    };
    Ok(args.apply_to(base))
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(format!("species_explorer={level}")),
    )
    .init();
}

fn build_classifier(config: &ExplorerConfig) -> error::Result<ImageClassifier> {
    let loader = HttpModelLoader::from_config(config)?;
    Ok(
        ImageClassifier::new(Arc::new(loader), &config.model_id, config.context)
            .with_input_edge(config.model_input_edge),
    )
}

fn build_orchestrator(client: Arc<InatClient>, days: u32) -> SelectionOrchestrator {
    SelectionOrchestrator::new(client.clone(), client, days)
}

async fn observe(
    orchestrator: &SelectionOrchestrator,
    client: &InatClient,
    taxon_id: u64,
    csv: Option<&Path>,
    geojson: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    // The observation endpoint needs only the id; the name is resolved for display.
    let taxon = match client.fetch_taxon(taxon_id).await {
        Ok(Some(taxon)) => taxon,
        Ok(None) => Taxon::new(taxon_id, &format!("taxon {taxon_id}")),
        Err(e) => {
            warn!("Could not resolve taxon {}: {}", taxon_id, e);
            Taxon::new(taxon_id, &format!("taxon {taxon_id}"))
        }
    };

    let progress = spinner("Fetching observations");
    orchestrator.select_taxon(taxon).await;
    progress.finish_and_clear();

    let state = orchestrator.snapshot();
    print_state(&state);

    if state.error.is_none() {
        if let Some(path) = csv {
            export::save_to_csv(&state.observations, path)?;
        }
        if let Some(path) = geojson {
            export::save_geojson(&state.observations, path)?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::try_parse()?;
    init_logging(args.verbose);

    let config = load_config(&args)?;
    let client = Arc::new(InatClient::from_config(&config)?);
    let start = Instant::now();

    match &args.command {
        Command::Search { text } => {
            use crate::client::TaxonSearch;

            let progress = spinner("Searching taxa");
            let taxa = client.search_taxa(text).await;
            progress.finish_and_clear();
            let taxa = taxa.map_err(|e| e.user_message(Operation::SearchTaxa))?;
            if taxa.is_empty() {
                println!("No species found matching \"{}\"", text);
            }
            for (i, taxon) in taxa.iter().enumerate() {
                println!("{} [id {}]", taxon_line(i + 1, taxon), taxon.id);
            }
        }
        Command::Observe {
            taxon_id,
            days,
            csv,
            geojson,
        } => {
            let days = days.unwrap_or(config.default_days);
            let orchestrator = build_orchestrator(client.clone(), days);
            observe(
                &orchestrator,
                &client,
                *taxon_id,
                csv.as_deref(),
                geojson.as_deref(),
            )
            .await?;
        }
        Command::Classify {
            image,
            select,
            days,
        } => {
            let classifier = build_classifier(&config)?;
            let bytes = tokio::fs::read(image).await?;

            let progress = spinner("Classifying image");
            let candidates = classifier.classify(&bytes).await;
            progress.finish_and_clear();
            let candidates = candidates.map_err(|e| e.user_message(Operation::Classify))?;

            for (i, candidate) in candidates.iter().enumerate() {
                println!(
                    "{:>2}. {} ({:.1}%)",
                    i + 1,
                    candidate.display_name,
                    candidate.confidence * 100.0
                );
            }

            if *select {
                if let Some(top) = candidates.first() {
                    let days = days.unwrap_or(config.default_days);
                    let orchestrator = build_orchestrator(client.clone(), days);
                    let progress = spinner("Fetching observations");
                    orchestrator
                        .select_from_classification(&top.display_name)
                        .await;
                    progress.finish_and_clear();
                    print_state(&orchestrator.snapshot());
                }
            }
        }
        Command::Explore { days } => {
            let days = days.unwrap_or(config.default_days);
            let orchestrator = build_orchestrator(client.clone(), days);
            let classifier = build_classifier(&config)?;
            repl::run(&orchestrator, &classifier).await?;
        }
    }

    print_hms(&start);
    Ok(())
}
