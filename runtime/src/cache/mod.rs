//! Cache between the registry and the rendering pipeline.
//!
//! - `TemplateCache`: two-tier expiring cache with size-bounded eviction
//! - `Clock`: injectable time source driving expiry

mod clock;
mod template_cache;

pub use clock::{Clock, ManualClock, SystemClock};
pub use template_cache::{CachePolicy, Retention, TemplateCache};
