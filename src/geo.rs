use crate::record::ObservationRecord;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub latitude: f64,
    pub longitude: f64,
}

impl LatLng {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Finite, latitude within [-90, 90], longitude within [-180, 180].
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Location-bearing fields of a raw provider observation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawLocation {
    #[serde(default)]
    pub geojson: Option<Value>,
    #[serde(default)]
    pub latitude: Option<Value>,
    #[serde(default)]
    pub longitude: Option<Value>,
    #[serde(default)]
    pub location: Option<Value>,
}

/// Picks the GeoJSON point (`[lng, lat]`), then the latitude/longitude scalars,
/// then the composed `location`, and validates only the chosen one.
/// Never fails: malformed or out-of-range input yields `None`.
pub fn normalize_location(raw: &RawLocation) -> Option<LatLng> {
    let candidate = geojson_point(raw.geojson.as_ref())
        .or_else(|| scalar_point(raw.latitude.as_ref(), raw.longitude.as_ref()))
        .or_else(|| composed_point(raw.location.as_ref()))?;

    candidate.is_valid().then_some(candidate)
}

fn geojson_point(geojson: Option<&Value>) -> Option<LatLng> {
    let coordinates = geojson?.get("coordinates")?.as_array()?;
    if coordinates.len() < 2 {
        return None;
    }
    let longitude = coordinates[0].as_f64()?;
    let latitude = coordinates[1].as_f64()?;
    Some(LatLng::new(latitude, longitude))
}

fn scalar_point(latitude: Option<&Value>, longitude: Option<&Value>) -> Option<LatLng> {
    Some(LatLng::new(latitude?.as_f64()?, longitude?.as_f64()?))
}

fn composed_point(location: Option<&Value>) -> Option<LatLng> {
    match location? {
        Value::Array(pair) if pair.len() == 2 => {
            Some(LatLng::new(pair[0].as_f64()?, pair[1].as_f64()?))
        }
        Value::String(text) => {
            let (lat, lng) = text.split_once(',')?;
            Some(LatLng::new(
                lat.trim().parse().ok()?,
                lng.trim().parse().ok()?,
            ))
        }
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapBounds {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

impl MapBounds {
    /// Smallest box containing every point; `None` for an empty set.
    pub fn from_points<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = LatLng>,
    {
        points.into_iter().fold(None, |bounds, point| {
            Some(match bounds {
                None => MapBounds {
                    south: point.latitude,
                    west: point.longitude,
                    north: point.latitude,
                    east: point.longitude,
                },
                Some(b) => MapBounds {
                    south: b.south.min(point.latitude),
                    west: b.west.min(point.longitude),
                    north: b.north.max(point.latitude),
                    east: b.east.max(point.longitude),
                },
            })
        })
    }

    pub fn center(&self) -> LatLng {
        LatLng::new(
            (self.south + self.north) / 2.0,
            (self.west + self.east) / 2.0,
        )
    }
}

/// What the map should frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MapFocus {
    World { center: LatLng, zoom: u8 },
    Fit(MapBounds),
}

impl MapFocus {
    pub fn world() -> Self {
        MapFocus::World {
            center: LatLng::new(20.0, 0.0),
            zoom: 2,
        }
    }

    pub fn for_observations(records: &[ObservationRecord]) -> Self {
        MapBounds::from_points(records.iter().filter_map(|r| r.location))
            .map_or_else(Self::world, MapFocus::Fit)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MapMarker {
    pub id: u64,
    pub position: LatLng,
    pub species_guess: String,
    pub observed_on: NaiveDate,
    pub observer_name: String,
    pub photo_url: Option<String>,
    pub source_uri: String,
}

/// Markers for the mappable records, in result order.
pub fn map_markers(records: &[ObservationRecord]) -> Vec<MapMarker> {
    records
        .iter()
        .filter_map(|record| {
            let position = record.location.filter(LatLng::is_valid)?;
            Some(MapMarker {
                id: record.id,
                position,
                species_guess: record.species_guess.clone(),
                observed_on: record.observed_on,
                observer_name: record.observer_name.clone(),
                photo_url: record.photo_url(),
                source_uri: record.source_uri.clone(),
            })
        })
        .collect()
}
