//! Governance traits.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{ConfirmationRequest, ConfirmationResponse};

/// Asks a human (or policy) whether a risky tool call may proceed.
///
/// Implementations should resolve to a denial once their own timeout passes.
#[async_trait]
pub trait ConfirmationHandler: Send + Sync {
    async fn confirm(&self, request: &ConfirmationRequest) -> Result<ConfirmationResponse>;
}
