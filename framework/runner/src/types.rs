/// Recommended error type for your scenario `main` function and any shared behaviour code that you
/// write for hooks. This type is compatible with the [crate::definition::HookResult] type so you can
/// use `?` to propagate errors.
pub type SwarmResult<T> = anyhow::Result<T>;

/// Milliseconds since the Unix epoch. Metric periods and phase events are keyed by this clock so
/// that values from independent workers line up.
pub(crate) fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
