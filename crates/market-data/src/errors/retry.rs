/// Classification for retry policy.
///
/// Tells a caller holding a [`ProviderError`](super::ProviderError) what it can
/// reasonably do next.
///
/// # Behavior Summary
///
/// | Class | Retry the same request? | Typical HTTP surface |
/// |-------|-------------------------|----------------------|
/// | `Never` | No | 4xx / 502 |
/// | `WithBackoff` | Yes, after `retry_after` | 429 |
/// | `Transient` | Yes, soon | 503 |
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetryClass {
    /// Never retry - bad symbol, bad timeframe, bad credentials or bad data.
    /// The request is fundamentally invalid and retrying won't help.
    Never,

    /// Retry only after waiting.
    ///
    /// Used when an upstream rate limit or quota was hit. The error's
    /// `retry_after` carries the wait when the upstream supplied one.
    WithBackoff,

    /// The failure is likely to clear on its own (network blip, open
    /// circuit, upstream outage).
    Transient,
}
