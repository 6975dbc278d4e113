use crate::client::{ObservationQuery, TaxonSearch};
use crate::error::{ExplorerError, Operation, Result};
use crate::record::{ObservationRecord, QueryWindow, Taxon};
use log::{debug, error, info};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SelectionState {
    pub selected_taxon: Option<Taxon>,
    pub window: QueryWindow,
    pub observations: Vec<ObservationRecord>,
    pub loading: bool,
    pub error: Option<String>,
    pub search_text: String,
}

impl SelectionState {
    /// Shown once a fetch for a selected taxon finished with nothing to show.
    pub fn empty_result_notice(&self) -> Option<String> {
        let taxon = self.selected_taxon.as_ref()?;
        if self.loading || !self.observations.is_empty() {
            return None;
        }
        Some(format!(
            "No observations found for {} in the past {} days.",
            taxon.display_name(),
            self.window.days_ago
        ))
    }
}

struct Inner {
    state: SelectionState,
    latest_token: u64,
}

/// Results are applied only while their request token is still the latest
/// one issued, so a slow earlier fetch never overwrites a newer selection.
pub struct SelectionOrchestrator {
    taxa: Arc<dyn TaxonSearch>,
    observations: Arc<dyn ObservationQuery>,
    inner: Mutex<Inner>,
}

/// Clears `loading` when the operation that set it ends, however it ends.
struct LoadingGuard<'a> {
    orchestrator: &'a SelectionOrchestrator,
    token: u64,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        let mut inner = self.orchestrator.lock();
        if inner.latest_token == self.token {
            inner.state.loading = false;
        }
    }
}

impl SelectionOrchestrator {
    pub fn new(
        taxa: Arc<dyn TaxonSearch>,
        observations: Arc<dyn ObservationQuery>,
        days_ago: u32,
    ) -> Self {
        Self {
            taxa,
            observations,
            inner: Mutex::new(Inner {
                state: SelectionState {
                    window: QueryWindow::new(days_ago),
                    ..SelectionState::default()
                },
                latest_token: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> SelectionState {
        self.lock().state.clone()
    }

    /// Issues a new token, marks the state as loading and applies `enter`.
    fn begin<T>(&self, enter: impl FnOnce(&mut SelectionState) -> T) -> (LoadingGuard<'_>, T) {
        let mut inner = self.lock();
        inner.latest_token += 1;
        let token = inner.latest_token;
        inner.state.loading = true;
        let value = enter(&mut inner.state);
        (
            LoadingGuard {
                orchestrator: self,
                token,
            },
            value,
        )
    }

    /// Applies `f` if `token` is still current. Returns whether it was applied.
    fn apply<T>(&self, token: u64, f: impl FnOnce(&mut SelectionState) -> T) -> Option<T> {
        let mut inner = self.lock();
        if inner.latest_token != token {
            debug!(
                "Discarding stale result of request {} (latest is {})",
                token, inner.latest_token
            );
            return None;
        }
        Some(f(&mut inner.state))
    }

    async fn load_observations(&self, token: u64, taxon_id: u64, days_ago: u32) {
        let result = self
            .observations
            .fetch_observations(taxon_id, days_ago)
            .await;

        self.apply(token, |state| match result {
            Ok(records) => state.observations = records,
            Err(e) => {
                error!("Error fetching observations: {}", e);
                state.error = Some(e.user_message(Operation::FetchObservations));
                state.observations.clear();
            }
        });
    }

    /// Selects `taxon` and fetches its observations for the current window.
    pub async fn select_taxon(&self, taxon: Taxon) {
        info!("Selecting taxon {} ({})", taxon.id, taxon.display_name());
        let taxon_id = taxon.id;
        let (guard, days_ago) = self.begin(|state| {
            state.window.taxon_id = Some(taxon_id);
            state.selected_taxon = Some(taxon);
            state.error = None;
            state.window.days_ago
        });
        self.load_observations(guard.token, taxon_id, days_ago).await;
    }

    /// Updates the window and refetches when a taxon is selected.
    pub async fn change_window(&self, days_ago: u32) {
        let selected = {
            let mut inner = self.lock();
            inner.state.window.days_ago = days_ago;
            inner.state.selected_taxon.as_ref().map(|taxon| taxon.id)
        };

        let Some(taxon_id) = selected else {
            debug!("Window set to {} days with no taxon selected", days_ago);
            return;
        };

        let (guard, ()) = self.begin(|state| {
            state.error = None;
        });
        self.load_observations(guard.token, taxon_id, days_ago).await;
    }

    /// Resolves a classifier label to the provider's first matching taxon and
    /// selects it.
    pub async fn select_from_classification(&self, common_name: &str) {
        let (guard, ()) = self.begin(|state| {
            state.search_text = common_name.to_string();
            state.error = None;
        });
        let token = guard.token;

        let candidates = match self.taxa.search_taxa(common_name).await {
            Ok(candidates) => candidates,
            Err(e) => {
                error!("Error searching for species {:?}: {}", common_name, e);
                self.apply(token, |state| {
                    state.error = Some(e.user_message(Operation::SearchTaxa));
                    state.observations.clear();
                });
                return;
            }
        };

        let Some(taxon) = candidates.into_iter().next() else {
            let no_match = ExplorerError::NoMatch {
                name: common_name.to_string(),
            };
            info!("{}", no_match);
            self.apply(token, |state| {
                state.error = Some(no_match.user_message(Operation::SearchTaxa));
                state.selected_taxon = None;
                state.window.taxon_id = None;
                state.observations.clear();
            });
            return;
        };

        info!("Classifier label {:?} resolved to taxon {}", common_name, taxon.id);
        let taxon_id = taxon.id;
        let Some(days_ago) = self.apply(token, |state| {
            state.window.taxon_id = Some(taxon_id);
            state.selected_taxon = Some(taxon);
            state.window.days_ago
        }) else {
            return;
        };
        self.load_observations(token, taxon_id, days_ago).await;
    }

    /// Ranked candidates for the search box. Does not change the selection.
    pub async fn search(&self, text: &str) -> Result<Vec<Taxon>> {
        self.lock().state.search_text = text.to_string();
        self.taxa.search_taxa(text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::LatLng;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::collections::{HashMap, HashSet};
    use tokio::sync::Notify;

    fn record(id: u64) -> ObservationRecord {
        ObservationRecord {
            id,
            species_guess: "Great Blue Heron".to_string(),
            observed_on: NaiveDate::from_ymd_opt(2024, 4, 2).unwrap(),
            location: Some(LatLng::new(45.0, -93.0)),
            photos: Vec::new(),
            source_uri: format!("https://www.inaturalist.org/observations/{id}"),
            observer_name: "birder".to_string(),
            quality_grade: Some("research".to_string()),
        }
    }

    #[derive(Default)]
    struct FakeTaxa {
        results: Vec<Taxon>,
        fail: bool,
        queries: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TaxonSearch for FakeTaxa {
        async fn search_taxa(&self, text: &str) -> Result<Vec<Taxon>> {
            self.queries.lock().unwrap().push(text.to_string());
            if self.fail {
                return Err(ExplorerError::HttpStatus {
                    status: 500,
                    endpoint: "taxa".to_string(),
                });
            }
            Ok(self.results.clone())
        }
    }

    #[derive(Default)]
    struct FakeObservations {
        by_taxon: HashMap<u64, Vec<ObservationRecord>>,
        failing: HashSet<u64>,
        gates: HashMap<u64, Arc<Notify>>,
        calls: Mutex<Vec<(u64, u32)>>,
    }

    impl FakeObservations {
        fn calls(&self) -> Vec<(u64, u32)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ObservationQuery for FakeObservations {
        async fn fetch_observations(
            &self,
            taxon_id: u64,
            days_ago: u32,
        ) -> Result<Vec<ObservationRecord>> {
            self.calls.lock().unwrap().push((taxon_id, days_ago));
            if let Some(gate) = self.gates.get(&taxon_id) {
                gate.notified().await;
            }
            if self.failing.contains(&taxon_id) {
                return Err(ExplorerError::HttpStatus {
                    status: 502,
                    endpoint: "observations".to_string(),
                });
            }
            Ok(self.by_taxon.get(&taxon_id).cloned().unwrap_or_default())
        }
    }

    fn orchestrator(
        taxa: FakeTaxa,
        observations: FakeObservations,
    ) -> (SelectionOrchestrator, Arc<FakeTaxa>, Arc<FakeObservations>) {
        let taxa = Arc::new(taxa);
        let observations = Arc::new(observations);
        let orchestrator = SelectionOrchestrator::new(taxa.clone(), observations.clone(), 30);
        (orchestrator, taxa, observations)
    }

    #[tokio::test]
    async fn test_select_taxon_loads_observations() {
        let mut fake = FakeObservations::default();
        fake.by_taxon.insert(5, vec![record(1), record(2)]);
        let (orchestrator, _, observations) = orchestrator(FakeTaxa::default(), fake);

        orchestrator.select_taxon(Taxon::new(5, "Ardea herodias")).await;

        let state = orchestrator.snapshot();
        assert_eq!(state.selected_taxon.map(|t| t.id), Some(5));
        assert_eq!(state.observations.len(), 2);
        assert!(!state.loading);
        assert_eq!(state.error, None);
        assert_eq!(observations.calls(), vec![(5, 30)]);
    }

    #[tokio::test]
    async fn test_select_taxon_failure_keeps_selection() {
        let mut fake = FakeObservations::default();
        fake.failing.insert(5);
        let (orchestrator, _, _) = orchestrator(FakeTaxa::default(), fake);

        orchestrator.select_taxon(Taxon::new(5, "Ardea herodias")).await;

        let state = orchestrator.snapshot();
        assert!(!state.loading);
        assert_eq!(
            state.error.as_deref(),
            Some("Failed to fetch observations. Please try again.")
        );
        assert!(state.observations.is_empty());
        assert_eq!(state.selected_taxon.map(|t| t.id), Some(5));
    }

    #[tokio::test]
    async fn test_change_window_without_taxon_does_not_fetch() {
        let (orchestrator, _, observations) =
            orchestrator(FakeTaxa::default(), FakeObservations::default());

        orchestrator.change_window(60).await;

        let state = orchestrator.snapshot();
        assert_eq!(state.window.days_ago, 60);
        assert!(state.observations.is_empty());
        assert!(!state.loading);
        assert!(observations.calls().is_empty());
    }

    #[tokio::test]
    async fn test_change_window_refetches_selected_taxon() {
        let mut fake = FakeObservations::default();
        fake.by_taxon.insert(5, vec![record(1)]);
        let (orchestrator, _, observations) = orchestrator(FakeTaxa::default(), fake);

        orchestrator.select_taxon(Taxon::new(5, "Ardea herodias")).await;
        orchestrator.change_window(90).await;

        assert_eq!(observations.calls(), vec![(5, 30), (5, 90)]);
        let state = orchestrator.snapshot();
        assert_eq!(state.window.days_ago, 90);
        assert_eq!(state.observations.len(), 1);
    }

    #[tokio::test]
    async fn test_classification_without_match() {
        let mut fake = FakeObservations::default();
        fake.by_taxon.insert(5, vec![record(1)]);
        let (orchestrator, taxa, _) = orchestrator(FakeTaxa::default(), fake);
        orchestrator.select_taxon(Taxon::new(5, "Ardea herodias")).await;

        orchestrator.select_from_classification("Space Heater").await;

        let state = orchestrator.snapshot();
        assert_eq!(
            state.error.as_deref(),
            Some("No species found matching \"Space Heater\"")
        );
        assert_eq!(state.selected_taxon, None);
        assert!(state.observations.is_empty());
        assert_eq!(state.search_text, "Space Heater");
        assert!(!state.loading);
        assert_eq!(*taxa.queries.lock().unwrap(), vec!["Space Heater".to_string()]);
    }

    #[tokio::test]
    async fn test_classification_selects_first_candidate() {
        let taxa = FakeTaxa {
            results: vec![
                Taxon::new(4956, "Ardea herodias").with_common_name("Great Blue Heron"),
                Taxon::new(3, "Aves"),
            ],
            ..FakeTaxa::default()
        };
        let mut fake = FakeObservations::default();
        fake.by_taxon.insert(4956, vec![record(7), record(8), record(9)]);
        let (orchestrator, _, observations) = orchestrator(taxa, fake);

        orchestrator.change_window(14).await;
        orchestrator.select_from_classification("Great Blue Heron").await;

        let state = orchestrator.snapshot();
        assert_eq!(state.selected_taxon.map(|t| t.id), Some(4956));
        assert_eq!(state.observations.len(), 3);
        assert_eq!(state.error, None);
        assert_eq!(observations.calls(), vec![(4956, 14)]);
    }

    #[tokio::test]
    async fn test_classification_match_with_failing_fetch() {
        let candidate = Taxon::new(4956, "Ardea herodias").with_common_name("Great Blue Heron");
        let taxa = FakeTaxa {
            results: vec![candidate.clone()],
            ..FakeTaxa::default()
        };
        let mut fake = FakeObservations::default();
        fake.failing.insert(4956);
        let (orchestrator, _, observations) = orchestrator(taxa, fake);

        orchestrator.select_from_classification("Great Blue Heron").await;

        let state = orchestrator.snapshot();
        assert_eq!(
            state.error.as_deref(),
            Some("Failed to fetch observations. Please try again.")
        );
        assert!(state.observations.is_empty());
        assert_eq!(state.selected_taxon, Some(candidate));
        assert_eq!(state.window.taxon_id, Some(4956));
        assert!(!state.loading);
        assert_eq!(observations.calls(), vec![(4956, 30)]);
    }

    #[tokio::test]
    async fn test_classification_search_failure() {
        let taxa = FakeTaxa {
            fail: true,
            ..FakeTaxa::default()
        };
        let (orchestrator, _, observations) = orchestrator(taxa, FakeObservations::default());

        orchestrator.select_from_classification("Mallard").await;

        let state = orchestrator.snapshot();
        assert_eq!(
            state.error.as_deref(),
            Some("Failed to search for this species. Please try again.")
        );
        assert!(!state.loading);
        assert!(observations.calls().is_empty());
    }

    #[tokio::test]
    async fn test_stale_result_is_discarded() {
        let gate = Arc::new(Notify::new());
        let mut fake = FakeObservations::default();
        fake.by_taxon.insert(1, vec![record(10)]);
        fake.by_taxon.insert(2, vec![record(20), record(21)]);
        fake.gates.insert(1, gate.clone());
        let (orchestrator, _, _) = orchestrator(FakeTaxa::default(), fake);

        let slow = orchestrator.select_taxon(Taxon::new(1, "Anas platyrhynchos"));
        let fast = async {
            assert!(orchestrator.snapshot().loading);
            orchestrator.select_taxon(Taxon::new(2, "Ardea herodias")).await;
            gate.notify_one();
        };
        tokio::join!(slow, fast);

        let state = orchestrator.snapshot();
        assert_eq!(state.selected_taxon.map(|t| t.id), Some(2));
        assert_eq!(
            state.observations.iter().map(|r| r.id).collect::<Vec<_>>(),
            vec![20, 21]
        );
        assert!(!state.loading);
    }

    #[test]
    fn test_empty_result_notice() {
        let mut state = SelectionState {
            window: QueryWindow::new(7),
            ..SelectionState::default()
        };
        assert_eq!(state.empty_result_notice(), None);

        state.selected_taxon = Some(Taxon::new(1, "Anas platyrhynchos").with_common_name("Mallard"));
        assert_eq!(
            state.empty_result_notice().as_deref(),
            Some("No observations found for Mallard in the past 7 days.")
        );

        state.observations.push(record(1));
        assert_eq!(state.empty_result_notice(), None);
    }
}
