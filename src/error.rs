/// Failures reported by [`TombSet`](crate::TombSet) and
/// [`SlotQueue`](crate::SlotQueue).
///
/// None of these are fatal: each one means "precondition not met" and is
/// returned to the immediate caller, nothing is retried internally.
///
/// [`TombSet`](crate::TombSet) 与 [`SlotQueue`](crate::SlotQueue) 返回的错误。
/// 均为可恢复错误，表示前置条件不满足，不会在内部自动重试。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum Error {
    /// `put` of a payload that is already live in the set.
    #[error("entry already exists")]
    AlreadyExists,

    /// `delete` of a payload that is not live in the set.
    #[error("entry not found")]
    NotFound,

    /// The queue has been shut down, or a slot was requested while a scan
    /// is in progress.
    #[error("slot queue unavailable")]
    Unavailable,

    /// A manual collection was requested while another one is in flight.
    #[error("garbage collection already running")]
    AlreadyRunning,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
