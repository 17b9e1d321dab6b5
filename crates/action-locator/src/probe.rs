//! Driver port

use async_trait::async_trait;

use crate::errors::LocatorError;
use crate::types::{ElementRef, Locator, ProbeCtx};

/// Checks a single locator against the live UI.
///
/// Implementations should return promptly once `ctx.cancel` fires; the
/// resolver also drops the probe future when it loses the race.
#[async_trait]
pub trait ProbePort: Send + Sync {
    async fn probe(&self, locator: &Locator, ctx: ProbeCtx) -> Result<ElementRef, LocatorError>;
}
