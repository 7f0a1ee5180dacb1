//! Per-request record of provider attempts, for failover diagnostics.

use crate::errors::{ProviderError, ProviderErrorCode};
use crate::models::ProviderId;

/// Record of a single provider attempt during a fetch.
#[derive(Clone, Debug)]
pub struct ProviderAttempt {
    pub provider_id: ProviderId,
    pub error: Option<ProviderError>,
    pub success: bool,
}

/// Every attempt made while serving one request, in order.
#[derive(Clone, Debug, Default)]
pub struct FetchDiagnostics {
    pub attempts: Vec<ProviderAttempt>,
}

impl FetchDiagnostics {
    pub fn new() -> Self {
        Self {
            attempts: Vec::new(),
        }
    }

    pub fn record_error(&mut self, provider_id: ProviderId, error: ProviderError) {
        self.attempts.push(ProviderAttempt {
            provider_id,
            error: Some(error),
            success: false,
        });
    }

    pub fn record_success(&mut self, provider_id: ProviderId) {
        self.attempts.push(ProviderAttempt {
            provider_id,
            error: None,
            success: true,
        });
    }

    /// Summary for logging/debugging.
    pub fn summary(&self) -> String {
        self.attempts
            .iter()
            .map(|a| match (&a.error, a.success) {
                (_, true) => format!("{}: SUCCESS", a.provider_id),
                (Some(err), false) => format!("{}: {} ({})", a.provider_id, err.code, err.message),
                (None, false) => format!("{}: UNKNOWN", a.provider_id),
            })
            .collect::<Vec<_>>()
            .join(" -> ")
    }

    pub fn has_success(&self) -> bool {
        self.attempts.iter().any(|a| a.success)
    }

    /// Errors in attempt order.
    pub fn errors(&self) -> Vec<(&ProviderId, &ProviderError)> {
        self.attempts
            .iter()
            .filter_map(|a| a.error.as_ref().map(|e| (&a.provider_id, e)))
            .collect()
    }

    /// Whether any attempt failed with `code`.
    pub fn saw(&self, code: ProviderErrorCode) -> bool {
        self.errors().iter().any(|(_, e)| e.code == code)
    }
}
