use crate::error::AppError;
use crate::latency::feed::Marker;
use crate::latency::types::{CloudProvider, Exchange};
use std::collections::BTreeSet;

pub const DEFAULT_LATENCY_RANGE: (f64, f64) = (0.0, 200.0);

/// Dashboard-side selection applied to the live markers.
///
/// Empty `selected_*` sets mean "no restriction"; `visible_providers` starts
/// with every provider and acts as a legend toggle on top of that.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerFilter {
    visible_providers: BTreeSet<CloudProvider>,
    selected_exchanges: BTreeSet<Exchange>,
    selected_providers: BTreeSet<CloudProvider>,
    latency_range: (f64, f64),
    search_query: String,
}

impl Default for MarkerFilter {
    fn default() -> Self {
        Self {
            visible_providers: CloudProvider::ALL.into_iter().collect(),
            selected_exchanges: BTreeSet::new(),
            selected_providers: BTreeSet::new(),
            latency_range: DEFAULT_LATENCY_RANGE,
            search_query: String::new(),
        }
    }
}

impl MarkerFilter {
    pub fn latency_range(&self) -> (f64, f64) {
        self.latency_range
    }

    pub fn search_query(&self) -> &str {
        &self.search_query
    }

    pub fn is_provider_visible(&self, provider: CloudProvider) -> bool {
        self.visible_providers.contains(&provider)
    }

    pub fn toggle_exchange(&mut self, exchange: Exchange) {
        if !self.selected_exchanges.remove(&exchange) {
            self.selected_exchanges.insert(exchange);
        }
    }

    pub fn toggle_provider(&mut self, provider: CloudProvider) {
        if !self.selected_providers.remove(&provider) {
            self.selected_providers.insert(provider);
        }
    }

    pub fn set_provider_visible(&mut self, provider: CloudProvider, visible: bool) {
        if visible {
            self.visible_providers.insert(provider);
        } else {
            self.visible_providers.remove(&provider);
        }
    }

    pub fn set_latency_range(&mut self, min: f64, max: f64) -> Result<(), AppError> {
        if !min.is_finite() || !max.is_finite() || min < 0.0 || min > max {
            return Err(AppError::InvalidArgument(format!(
                "latency range [{min}, {max}] must be finite, non-negative and ordered"
            )));
        }
        self.latency_range = (min, max);
        Ok(())
    }

    pub fn set_search_query(&mut self, query: impl Into<String>) {
        self.search_query = query.into();
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn matches(&self, marker: &Marker) -> bool {
        let (min, max) = self.latency_range;

        self.visible_providers.contains(&marker.provider)
            && (self.selected_exchanges.is_empty()
                || self.selected_exchanges.contains(&marker.exchange))
            && (self.selected_providers.is_empty()
                || self.selected_providers.contains(&marker.provider))
            && (min..=max).contains(&marker.latency_ms)
    }

    pub fn apply<'a>(&self, markers: &'a [Marker]) -> Vec<&'a Marker> {
        markers.iter().filter(|marker| self.matches(marker)).collect()
    }

    /// Distinct exchanges on screen, sorted by name and narrowed by the search
    /// query. An exchange also stays listed when any region matches.
    pub fn searchable_exchanges(&self, markers: &[Marker]) -> Vec<Exchange> {
        let mut exchanges: Vec<Exchange> = markers
            .iter()
            .map(|marker| marker.exchange)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        exchanges.sort_by_key(|exchange| exchange.as_str());

        let Some(query) = self.normalized_query() else {
            return exchanges;
        };
        let region_hit = markers
            .iter()
            .any(|marker| marker.region.to_lowercase().contains(&query));

        exchanges
            .into_iter()
            .filter(|exchange| region_hit || exchange.as_str().to_lowercase().contains(&query))
            .collect()
    }

    pub fn searchable_regions(&self, markers: &[Marker]) -> Vec<String> {
        let regions = markers
            .iter()
            .map(|marker| marker.region.as_str())
            .collect::<BTreeSet<_>>();

        let query = self.normalized_query();
        regions
            .into_iter()
            .filter(|region| {
                query
                    .as_deref()
                    .map_or(true, |query| region.to_lowercase().contains(query))
            })
            .map(str::to_string)
            .collect()
    }

    fn normalized_query(&self) -> Option<String> {
        let query = self.search_query.trim();
        (!query.is_empty()).then(|| query.to_lowercase())
    }
}
