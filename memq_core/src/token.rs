use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

// Zero is never handed out so an all-zero token can't alias a real request.
static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Opaque handle correlating an asynchronous push/pop with its result.
///
/// Tokens are unique across every queue in the process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QToken(u64);

impl QToken {
    pub(crate) fn mint() -> Self {
        QToken(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed))
    }

    pub fn from_raw(raw: u64) -> Self {
        QToken(raw)
    }

    pub fn as_raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for QToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "qt#{}", self.0)
    }
}
