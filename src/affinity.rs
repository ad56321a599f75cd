//! Owner-thread tracking for device-resident resources.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::ExtractError;

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT: ThreadToken = ThreadToken::fresh();
}

/// Opaque identity of a thread, as seen by [`Affinity`].
///
/// Every thread gets its own token the first time it asks for one. Tokens are never reused.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadToken(u64);

impl ThreadToken {
    /// Returns the token of the calling thread.
    pub fn current() -> Self {
        CURRENT.with(|token| *token)
    }

    /// Issues a token that no thread holds yet.
    pub(crate) fn fresh() -> Self {
        Self(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Debug for ThreadToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ThreadToken({})", self.0)
    }
}

/// Records the thread that is allowed to touch device-resident buffers.
///
/// Captured once when the extractor is initialized. Every privileged accessor compares the calling
/// thread's token against the recorded owner before doing anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Affinity {
    owner: ThreadToken,
}

impl Affinity {
    /// Records the current thread as the owner.
    pub fn capture() -> Self {
        Self::with_owner(ThreadToken::current())
    }

    pub fn with_owner(owner: ThreadToken) -> Self {
        Self { owner }
    }

    #[inline]
    pub fn owner(&self) -> ThreadToken {
        self.owner
    }

    /// Checks that `caller` is the owning thread.
    pub fn check(&self, caller: ThreadToken) -> Result<(), ExtractError> {
        if caller == self.owner {
            Ok(())
        } else {
            log::error!(
                "device buffers owned by {:?} accessed from {:?}",
                self.owner,
                caller
            );
            Err(ExtractError::CrossThreadAccess {
                owner: self.owner,
                caller,
            })
        }
    }

    /// Checks that the current thread is the owning thread.
    pub fn check_current(&self) -> Result<(), ExtractError> {
        self.check(ThreadToken::current())
    }
}
