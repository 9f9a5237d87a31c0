//! Built-in filter denying OK/resolved events.

use async_trait::async_trait;

use crate::error::FilterError;
use crate::event::Event;
use crate::resource::ResourceReference;

use super::{is_core_event_filter, FilterAdapter};

/// Denies events whose check status indicates OK. Events without a
/// check are not incidents and are denied as well.
#[derive(Debug, Default)]
pub struct IsIncidentAdapter;

#[async_trait]
impl FilterAdapter for IsIncidentAdapter {
    fn name(&self) -> &str {
        "IsIncidentAdapter"
    }

    fn can_filter(&self, reference: &ResourceReference) -> bool {
        is_core_event_filter(reference) && reference.name == "is_incident"
    }

    async fn filter(
        &self,
        _reference: &ResourceReference,
        event: &Event,
    ) -> Result<bool, FilterError> {
        Ok(!event.is_incident())
    }
}
