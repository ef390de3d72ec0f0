//! Flow message handlers.
//!
//! Handlers never surface domain failures as errors: every branch ends in a
//! persisted state change, a published event, or both. An `Err` means the
//! metadata store could not be reached.

pub mod availability;
pub mod common;
pub mod copy;
pub mod delete;
pub mod store;

pub use availability::*;
pub use copy::*;
pub use delete::*;
pub use store::*;

use crate::error::EngineResult;
use crate::state::AppState;
use strata_core::{FlowEnvelope, FlowMessage, TenantContext};

/// Route a message to its handler under the envelope's tenant.
pub async fn dispatch(state: &AppState, envelope: FlowEnvelope) -> EngineResult<()> {
    let ctx = TenantContext::new(envelope.tenant);
    tracing::debug!(tenant = %ctx.tenant(), message = envelope.message.name(), "dispatching");

    match envelope.message {
        FlowMessage::AddFileReference(msg) => handle_add(state, &ctx, msg).await,
        FlowMessage::StoreFiles(msg) => handle_store(state, &ctx, msg).await,
        FlowMessage::DeleteFileReference(msg) => handle_delete(state, &ctx, msg).await,
        FlowMessage::RequestAvailability(msg) => handle_availability(state, &ctx, msg).await,
        FlowMessage::CopyFiles(msg) => handle_copy(state, &ctx, msg).await,
        FlowMessage::RetryRequests(msg) => handle_retry(state, &ctx, msg).await.map(|_| ()),
    }
}
