use crate::error::{ExplorerError, Result};
use crate::geo::{LatLng, RawLocation, normalize_location};
use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

/// Day windows offered by the window selector.
pub const DAY_PRESETS: [u32; 5] = [7, 14, 30, 60, 90];
pub const DEFAULT_DAYS: u32 = 30;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Taxon {
    pub id: u64,
    pub scientific_name: String,
    pub common_name: Option<String>,
    pub rank: Option<String>,
    pub iconic_taxon: Option<String>,
}

impl Taxon {
    pub fn new(id: u64, scientific_name: &str) -> Self {
        Self {
            id,
            scientific_name: scientific_name.to_string(),
            common_name: None,
            rank: None,
            iconic_taxon: None,
        }
    }

    #[cfg(test)]
    pub fn with_common_name(mut self, common_name: &str) -> Self {
        self.common_name = Some(common_name.to_string());
        self
    }

    /// Common name when the provider has one, scientific name otherwise.
    pub fn display_name(&self) -> &str {
        match self.common_name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => &self.scientific_name,
        }
    }
}

/// Size token embedded in provider photo URLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhotoSize {
    Square,
    Thumb,
    Small,
    Medium,
    Large,
    Original,
}

impl PhotoSize {
    const ALL: [PhotoSize; 6] = [
        PhotoSize::Square,
        PhotoSize::Thumb,
        PhotoSize::Small,
        PhotoSize::Medium,
        PhotoSize::Large,
        PhotoSize::Original,
    ];

    pub fn token(self) -> &'static str {
        match self {
            PhotoSize::Square => "square",
            PhotoSize::Thumb => "thumb",
            PhotoSize::Small => "small",
            PhotoSize::Medium => "medium",
            PhotoSize::Large => "large",
            PhotoSize::Original => "original",
        }
    }

    /// Finds the size token in the file name part of a photo URL.
    pub fn from_url(url: &str) -> Option<Self> {
        let file_name = url.rsplit('/').next()?;
        let stem = file_name.split('.').next()?;
        Self::ALL.into_iter().find(|size| size.token() == stem)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoRef {
    pub url: String,
    pub size: Option<PhotoSize>,
}

impl PhotoRef {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            size: PhotoSize::from_url(url),
        }
    }

    /// URL of the same photo in another size. Unrecognized URLs are returned as-is.
    pub fn display_url(&self, size: PhotoSize) -> String {
        match self.size {
            Some(current) => {
                let from = format!("/{}.", current.token());
                let to = format!("/{}.", size.token());
                match self.url.rfind(&from) {
                    Some(pos) => {
                        let mut url = self.url.clone();
                        url.replace_range(pos..pos + from.len(), &to);
                        url
                    }
                    None => self.url.clone(),
                }
            }
            None => self.url.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationRecord {
    pub id: u64,
    pub species_guess: String,
    pub observed_on: NaiveDate,
    /// Canonical position; `None` when the record is unmappable.
    pub location: Option<LatLng>,
    pub photos: Vec<PhotoRef>,
    pub source_uri: String,
    pub observer_name: String,
    pub quality_grade: Option<String>,
}

impl ObservationRecord {
    pub fn is_mappable(&self) -> bool {
        self.location.is_some()
    }

    /// Medium-size URL of the first photo.
    pub fn photo_url(&self) -> Option<String> {
        self.photos
            .first()
            .map(|photo| photo.display_url(PhotoSize::Medium))
    }
}

/// Day window of an observation query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryWindow {
    pub taxon_id: Option<u64>,
    pub days_ago: u32,
}

impl QueryWindow {
    pub fn new(days_ago: u32) -> Self {
        Self {
            taxon_id: None,
            days_ago,
        }
    }

    /// Inclusive `(start, end)` calendar dates ending on `today`.
    pub fn date_range(&self, today: NaiveDate) -> Result<(NaiveDate, NaiveDate)> {
        if self.days_ago == 0 {
            return Err(ExplorerError::InvalidQuery(
                "day window must be positive".to_string(),
            ));
        }
        let start = today
            .checked_sub_days(Days::new(u64::from(self.days_ago)))
            .ok_or_else(|| {
                ExplorerError::InvalidQuery(format!("{} days is out of range", self.days_ago))
            })?;
        Ok((start, today))
    }
}

impl Default for QueryWindow {
    fn default() -> Self {
        Self::new(DEFAULT_DAYS)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationCandidate {
    pub raw_label: String,
    pub display_name: String,
    pub confidence: f32,
}

/// Provider result envelope shared by the taxa and observation endpoints.
#[derive(Debug, Deserialize)]
pub struct RawPage<T> {
    #[serde(default)]
    pub total_results: Option<u64>,
    #[serde(default)]
    pub page: Option<u64>,
    #[serde(default)]
    pub per_page: Option<u64>,
    pub results: Vec<T>,
}

#[derive(Debug, Deserialize)]
pub struct RawTaxon {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub preferred_common_name: Option<String>,
    #[serde(default)]
    pub rank: Option<String>,
    #[serde(default)]
    pub iconic_taxon_name: Option<String>,
}

impl From<RawTaxon> for Taxon {
    fn from(raw: RawTaxon) -> Self {
        Self {
            id: raw.id,
            scientific_name: raw.name,
            common_name: raw.preferred_common_name,
            rank: raw.rank,
            iconic_taxon: raw.iconic_taxon_name,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RawPhoto {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct RawUser {
    #[serde(default)]
    pub login: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawObservation {
    pub id: u64,
    #[serde(default)]
    pub species_guess: Option<String>,
    #[serde(default)]
    pub observed_on: Option<String>,
    #[serde(default)]
    pub photos: Vec<RawPhoto>,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub user: Option<RawUser>,
    #[serde(default)]
    pub quality_grade: Option<String>,
    #[serde(flatten)]
    pub location: RawLocation,
}

/// Accepts `YYYY-MM-DD`, optionally followed by a `T...` time part.
pub fn parse_observed_on(value: &str) -> Option<NaiveDate> {
    let date = value.trim().split('T').next()?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

impl TryFrom<RawObservation> for ObservationRecord {
    type Error = ExplorerError;

    fn try_from(raw: RawObservation) -> Result<Self> {
        let observed_on = raw
            .observed_on
            .as_deref()
            .and_then(parse_observed_on)
            .ok_or_else(|| {
                ExplorerError::parse(format!(
                    "observation {} has a missing or malformed observed_on",
                    raw.id
                ))
            })?;

        let observer_name = raw
            .user
            .map(|user| match user.name {
                Some(name) if !name.trim().is_empty() => name,
                _ => user.login.unwrap_or_default(),
            })
            .unwrap_or_default();

        Ok(Self {
            id: raw.id,
            species_guess: raw.species_guess.unwrap_or_default(),
            observed_on,
            location: normalize_location(&raw.location),
            photos: raw.photos.iter().map(|photo| PhotoRef::new(&photo.url)).collect(),
            source_uri: raw.uri.unwrap_or_default(),
            observer_name,
            quality_grade: raw.quality_grade,
        })
    }
}
