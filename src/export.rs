use crate::error::Result;
use crate::geo::map_markers;
use crate::record::ObservationRecord;
use csv::Writer;
use log::info;
use serde::Serialize;
use serde_json::{Value, json};
use std::fs::File;
use std::io::Write;
use std::path::Path;

#[derive(Debug, Serialize)]
struct ObservationRow<'a> {
    id: u64,
    species_guess: &'a str,
    observed_on: String,
    latitude: Option<f64>,
    longitude: Option<f64>,
    observer: &'a str,
    quality_grade: Option<&'a str>,
    photo_url: Option<String>,
    uri: &'a str,
}

impl<'a> From<&'a ObservationRecord> for ObservationRow<'a> {
    fn from(record: &'a ObservationRecord) -> Self {
        Self {
            id: record.id,
            species_guess: &record.species_guess,
            observed_on: record.observed_on.format("%Y-%m-%d").to_string(),
            latitude: record.location.map(|p| p.latitude),
            longitude: record.location.map(|p| p.longitude),
            observer: &record.observer_name,
            quality_grade: record.quality_grade.as_deref(),
            photo_url: record.photo_url(),
            uri: &record.source_uri,
        }
    }
}

/// Writes one row per record; unmappable records keep empty coordinates.
pub fn write_csv<W: Write>(records: &[ObservationRecord], writer: W) -> Result<()> {
    let mut writer = Writer::from_writer(writer);
    for record in records {
        writer.serialize(ObservationRow::from(record))?;
    }
    writer.flush()?;
    Ok(())
}

pub fn save_to_csv(records: &[ObservationRecord], path: &Path) -> Result<()> {
    write_csv(records, File::create(path)?)?;
    info!("Saved {} observations to {}", records.len(), path.display());
    Ok(())
}

/// `FeatureCollection` of the mappable records, `[lng, lat]` point order.
pub fn to_geojson(records: &[ObservationRecord]) -> Value {
    let features: Vec<Value> = map_markers(records)
        .into_iter()
        .map(|marker| {
            json!({
                "type": "Feature",
                "id": marker.id,
                "geometry": {
                    "type": "Point",
                    "coordinates": [marker.position.longitude, marker.position.latitude]
                },
                "properties": {
                    "species_guess": marker.species_guess,
                    "observed_on": marker.observed_on.format("%Y-%m-%d").to_string(),
                    "observer": marker.observer_name,
                    "photo_url": marker.photo_url,
                    "uri": marker.source_uri
                }
            })
        })
        .collect();

    json!({ "type": "FeatureCollection", "features": features })
}

pub fn save_geojson(records: &[ObservationRecord], path: &Path) -> Result<()> {
    let collection = to_geojson(records);
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, &collection).map_err(std::io::Error::from)?;
    info!("Saved map features to {}", path.display());
    Ok(())
}
