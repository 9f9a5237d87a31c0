//! Built-in filter denying silenced events.
//!
//! The name reads from the event's perspective: only *not silenced*
//! events pass. The adapter consults the precomputed silence-entry
//! names attached to the event by the ingestion path.

use async_trait::async_trait;

use crate::error::FilterError;
use crate::event::Event;
use crate::resource::ResourceReference;
use crate::silence;

use super::{is_core_event_filter, FilterAdapter};

/// Denies events that are currently silenced.
#[derive(Debug, Default)]
pub struct NotSilencedAdapter;

#[async_trait]
impl FilterAdapter for NotSilencedAdapter {
    fn name(&self) -> &str {
        "NotSilencedAdapter"
    }

    fn can_filter(&self, reference: &ResourceReference) -> bool {
        is_core_event_filter(reference) && reference.name == "not_silenced"
    }

    async fn filter(
        &self,
        _reference: &ResourceReference,
        event: &Event,
    ) -> Result<bool, FilterError> {
        Ok(silence::is_silenced(event))
    }
}
