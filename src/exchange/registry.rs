use std::collections::HashMap;
use std::sync::Arc;

use crate::error::AggregationError;

use super::VenueAdapter;

/// Venue adapters keyed by venue id
#[derive(Clone, Default)]
pub struct VenueRegistry {
    adapters: HashMap<String, Arc<dyn VenueAdapter>>,
}

impl VenueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own id, replacing any previous one
    pub fn register(&mut self, adapter: Arc<dyn VenueAdapter>) {
        self.adapters.insert(adapter.id().to_string(), adapter);
    }

    pub fn with(mut self, adapter: Arc<dyn VenueAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn VenueAdapter>> {
        self.adapters.get(id).cloned()
    }

    /// Resolve the active venue ids for one tick, in the given order.
    ///
    /// Fails if the set is empty or any id is unknown.
    pub fn resolve(&self, ids: &[String]) -> Result<Vec<Arc<dyn VenueAdapter>>, AggregationError> {
        if ids.is_empty() {
            return Err(AggregationError::NoVenues);
        }

        ids.iter()
            .map(|id| {
                self.get(id)
                    .ok_or_else(|| AggregationError::UnknownVenue(id.clone()))
            })
            .collect()
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.adapters.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::PaperVenue;
    use rust_decimal_macros::dec;

    #[test]
    fn test_resolve_preserves_order() {
        let registry = VenueRegistry::new()
            .with(Arc::new(PaperVenue::new("b", dec!(1))))
            .with(Arc::new(PaperVenue::new("a", dec!(1))));

        let resolved = registry
            .resolve(&["b".to_string(), "a".to_string()])
            .unwrap();
        let ids: Vec<&str> = resolved.iter().map(|v| v.id()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(registry.ids(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_resolve_unknown_and_empty() {
        let registry = VenueRegistry::new().with(Arc::new(PaperVenue::new("a", dec!(1))));

        assert!(matches!(
            registry.resolve(&["x".to_string()]),
            Err(AggregationError::UnknownVenue(id)) if id == "x"
        ));
        assert!(matches!(registry.resolve(&[]), Err(AggregationError::NoVenues)));
    }
}
