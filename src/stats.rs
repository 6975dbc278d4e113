use crate::record::ObservationRecord;
use chrono::NaiveDate;
use std::collections::HashMap;

/// Summary figures for the statistics panel.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationStats {
    pub total: usize,
    pub mappable: usize,
    pub days_with_observations: usize,
    pub window_days: u32,
    pub most_active_day: NaiveDate,
    pub most_active_count: usize,
}

impl ObservationStats {
    /// `None` for an empty result set. Unmappable records still count.
    pub fn compute(records: &[ObservationRecord], window_days: u32) -> Option<Self> {
        // Per-day counts in first-seen order so ties go to the earliest entry.
        let mut index: HashMap<NaiveDate, usize> = HashMap::new();
        let mut per_day: Vec<(NaiveDate, usize)> = Vec::new();
        for record in records {
            match index.get(&record.observed_on) {
                Some(&slot) => per_day[slot].1 += 1,
                None => {
                    index.insert(record.observed_on, per_day.len());
                    per_day.push((record.observed_on, 1));
                }
            }
        }

        let mut busiest: Option<(NaiveDate, usize)> = None;
        for &(day, count) in &per_day {
            if busiest.is_none_or(|(_, best)| count > best) {
                busiest = Some((day, count));
            }
        }
        let (most_active_day, most_active_count) = busiest?;

        Some(Self {
            total: records.len(),
            mappable: records.iter().filter(|r| r.is_mappable()).count(),
            days_with_observations: per_day.len(),
            window_days,
            most_active_day,
            most_active_count,
        })
    }
}
