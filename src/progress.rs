/// Receives progress notifications from the matching rounds. All methods default to doing
/// nothing, so an observer only implements what it displays.
///
/// Observers are shared with the worker threads of a round and must be [`Sync`].
pub trait ProgressObserver: Sync {
    /// A stage with `total` units of work begins.
    fn start(&self, _stage: &str, _total: u64) {}

    /// One unit of work of the current stage finished.
    fn increment(&self) {}

    /// Describe what the current stage works on, for example the epoch being matched.
    fn set_detail(&self, _detail: &[(&str, String)]) {}

    /// The stage finished.
    fn done(&self, _stage: &str) {}
}

/// Observer that discards all notifications.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {}
