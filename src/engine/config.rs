use std::time::Duration;

/// what a worker does with a piece whose sha1 does not match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum IntegrityPolicy {
    /// report the failure to the collector, which aborts the whole download.
    #[default]
    Abort,
    /// put the piece back on the queue so any peer can try it again.
    Requeue,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// bound on establishing the tcp connection, later reads and writes are unbounded.
    pub connect_timeout: Duration,
    pub integrity_policy: IntegrityPolicy,
    /// pause after handing back a piece the peer does not have.
    pub requeue_backoff: Duration,
}

impl EngineConfig {
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
    pub const DEFAULT_REQUEUE_BACKOFF: Duration = Duration::from_millis(10);
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Self::DEFAULT_CONNECT_TIMEOUT,
            integrity_policy: IntegrityPolicy::default(),
            requeue_backoff: Self::DEFAULT_REQUEUE_BACKOFF,
        }
    }
}
