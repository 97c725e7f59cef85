//! Model calls accounted against the run's budget ledger.

use thiserror::Error;
use tracing::debug;

use super::backend::{InvokeRequest, ModelBackend, estimate_usage};
use crate::budget::{BudgetLedger, ReservationMode};
use crate::error::InvocationError;

/// Why a metered call produced no text.
#[derive(Error, Debug)]
pub enum MeteredError {
    #[error("Token budget exceeded: {needed} tokens needed, {spent} of {ceiling} already used")]
    BudgetExceeded {
        needed: usize,
        spent: usize,
        ceiling: usize,
    },

    #[error(transparent)]
    Invocation(#[from] InvocationError),
}

impl MeteredError {
    /// Retrying only helps for transient transport failures.
    pub fn is_retryable(&self) -> bool {
        match self {
            MeteredError::BudgetExceeded { .. } => false,
            MeteredError::Invocation(e) => e.is_retryable(),
        }
    }
}

/// Tokens reserved before sending `request`: prompt plus completion cap.
pub fn reservation_for(request: &InvokeRequest) -> usize {
    request.prompt_tokens() + request.max_output_tokens as usize
}

/// Reserve, invoke, then true-up.
///
/// A failed call refunds its whole reservation. A successful call refunds
/// the difference between the reservation and the estimated actual usage.
pub async fn call_metered(
    backend: &dyn ModelBackend,
    ledger: &BudgetLedger,
    request: &InvokeRequest,
    mode: ReservationMode,
) -> Result<String, MeteredError> {
    let reserved = reservation_for(request);
    if !ledger.reserve(reserved, mode) {
        return Err(MeteredError::BudgetExceeded {
            needed: reserved,
            spent: ledger.spent(),
            ceiling: ledger.ceiling(),
        });
    }

    match backend.invoke(request).await {
        Ok(text) => {
            let actual = estimate_usage(request, &text).total();
            ledger.settle(reserved, actual);
            debug!(
                "{} call used ~{actual} tokens (reserved {reserved})",
                request.model
            );
            Ok(text)
        }
        Err(e) => {
            ledger.refund(reserved);
            Err(e.into())
        }
    }
}
