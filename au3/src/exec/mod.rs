//! The threaded call-frame execution engine

mod frame;
mod thread;

pub use frame::{BlockKind, BlockMarker, CallFrame};
pub use thread::ExecutionThread;
pub(crate) use thread::ThreadState;

/// Ensure sufficient stack space is available before executing `f`.
///
/// Nested script calls recurse natively, so deep call chains grow the
/// stack instead of overflowing it.
pub fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    /// Remaining stack space that triggers growth.
    const RED_ZONE: usize = 128 * 1024;

    /// Stack space added per growth step.
    const STACK_PER_RECURSION: usize = 2 * 1024 * 1024;

    stacker::maybe_grow(RED_ZONE, STACK_PER_RECURSION, f)
}
