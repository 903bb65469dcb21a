//! Media enrichment collaborator seam.
//!
//! Thumbnail scraping, original-image download and page archival live
//! outside the engine; they plug in through [`Enricher`]. The engine runs
//! every enricher against every fetched event and isolates failures: a
//! failed enrichment is logged and skipped, never aborting the batch.

use crate::error::Result;
use chronolog_core::Event;

/// An external collaborator that decorates events with media references.
pub trait Enricher: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Decorate the event in place. In dry mode nothing durable may be
    /// written, but the full logic still runs.
    fn enrich(&self, event: &mut Event, dry: bool) -> Result<()>;
}
