use crate::geo::MapFocus;
use crate::orchestrator::SelectionState;
use crate::record::Taxon;
use crate::stats::ObservationStats;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::{Duration, Instant};

pub fn print_hms(start: &Instant) {
    let secs = start.elapsed().as_secs();
    println!(
        "Elapsed: {:02}:{:02}:{:02}",
        secs / 3600,
        (secs % 3600) / 60,
        secs % 60
    );
}

/// Spinner shown while a remote call is in flight.
pub fn spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

pub fn taxon_line(rank: usize, taxon: &Taxon) -> String {
    let rank_suffix = taxon
        .rank
        .as_deref()
        .map(|r| format!(" ({r})"))
        .unwrap_or_default();
    format!(
        "{:>2}. {} - {}{}",
        rank,
        taxon.display_name(),
        taxon.scientific_name,
        rank_suffix
    )
}

pub fn print_state(state: &SelectionState) {
    if let Some(error) = &state.error {
        println!("Error: {}", error);
    }

    let Some(taxon) = &state.selected_taxon else {
        return;
    };

    match ObservationStats::compute(&state.observations, state.window.days_ago) {
        Some(stats) => {
            println!("\nObservation statistics for {}:", taxon.display_name());
            println!("Total sightings: {}", stats.total);
            println!("Mappable sightings: {}", stats.mappable);
            println!(
                "Days with observations: {} / {}",
                stats.days_with_observations, stats.window_days
            );
            println!(
                "Most active day: {} ({})",
                stats.most_active_day.format("%Y-%m-%d"),
                stats.most_active_count
            );
        }
        None => {
            if let Some(notice) = state.empty_result_notice() {
                println!("{}", notice);
                println!("Try increasing the time range or searching for a different species.");
            }
        }
    }

    match MapFocus::for_observations(&state.observations) {
        MapFocus::Fit(bounds) => {
            let center = bounds.center();
            println!(
                "Map bounds: S {:.4} W {:.4} N {:.4} E {:.4}, centered on ({:.4}, {:.4})",
                bounds.south, bounds.west, bounds.north, bounds.east, center.latitude, center.longitude
            );
        }
        MapFocus::World { center, zoom } => println!(
            "Map view: world ({:.1}, {:.1}) zoom {}",
            center.latitude, center.longitude, zoom
        ),
    }
}
