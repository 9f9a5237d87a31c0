//! Built-in filter denying events without a metric payload.

use async_trait::async_trait;

use crate::error::FilterError;
use crate::event::Event;
use crate::resource::ResourceReference;

use super::{is_core_event_filter, FilterAdapter};

/// Denies events carrying no metrics, so metric-oriented handlers only
/// ever see events with measurements attached.
#[derive(Debug, Default)]
pub struct HasMetricsAdapter;

#[async_trait]
impl FilterAdapter for HasMetricsAdapter {
    fn name(&self) -> &str {
        "HasMetricsAdapter"
    }

    fn can_filter(&self, reference: &ResourceReference) -> bool {
        is_core_event_filter(reference) && reference.name == "has_metrics"
    }

    async fn filter(
        &self,
        _reference: &ResourceReference,
        event: &Event,
    ) -> Result<bool, FilterError> {
        Ok(!event.has_metrics())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Metrics;

    #[test]
    fn can_filter_claims_only_the_has_metrics_reference() {
        let adapter = HasMetricsAdapter;
        assert!(adapter.can_filter(&ResourceReference::event_filter("has_metrics")));
        assert!(!adapter.can_filter(&ResourceReference::event_filter("is_incident")));
    }

    #[tokio::test]
    async fn event_without_metrics_is_denied() {
        let event = Event::fixture("server-01", "check_cpu");
        let deny = HasMetricsAdapter
            .filter(&ResourceReference::event_filter("has_metrics"), &event)
            .await
            .unwrap();
        assert!(deny);
    }

    #[tokio::test]
    async fn event_with_metrics_passes() {
        let mut event = Event::fixture("server-01", "check_cpu");
        event.metrics = Some(Metrics::default());

        let deny = HasMetricsAdapter
            .filter(&ResourceReference::event_filter("has_metrics"), &event)
            .await
            .unwrap();
        assert!(!deny);
    }
}
