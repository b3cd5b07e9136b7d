use std::time::Instant;

/// Wraps `f` so that calling it logs how long it took.
///
/// ```
/// let total = ctrl_tune::timing::timed("sum", || (1..=10).sum::<u32>())();
/// assert_eq!(total, 55);
/// ```
pub fn timed<R>(name: &'static str, f: impl FnOnce() -> R) -> impl FnOnce() -> R {
    move || {
        let start = Instant::now();
        let result = f();
        tracing::info!(
            "Function '{}' took {:.4} seconds to complete.",
            name,
            start.elapsed().as_secs_f64()
        );
        result
    }
}
