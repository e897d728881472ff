//! Call context: cancellation token plus optional deadline.
//!
//! Every externally-initiated operation accepts a [`CallContext`].
//! Cancellation is cooperative: components `tokio::select!` over the token
//! at their suspension points. Deadlines compose tightest-first — nesting a
//! looser timeout inside a tighter one never loosens the tighter one.

use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellation + deadline pair threaded through the runtime.
///
/// Cloning is cheap; clones share the same cancellation token. Use
/// [`CallContext::child`] to derive a context that is cancelled when the
/// parent is, but can also be cancelled independently.
#[derive(Debug, Clone)]
pub struct CallContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl CallContext {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    /// A context wrapping an existing cancellation token.
    pub fn with_cancel(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: None,
        }
    }

    /// Tighten the deadline to at most `timeout` from now. Keeps the
    /// existing deadline if it is already sooner.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) => Some(existing.min(candidate)),
            None => Some(candidate),
        };
        Self { deadline, ..self }
    }

    /// Derive a child context: cancelled when this one is, independently
    /// cancellable, same deadline.
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            deadline: self.deadline,
        }
    }

    /// The cancellation token.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Request cancellation of this context (and all children).
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when cancellation is requested.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// The absolute deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time remaining until the deadline. `None` means unbounded;
    /// `Some(ZERO)` means already expired.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Whether the deadline has already passed.
    pub fn is_expired(&self) -> bool {
        matches!(self.remaining(), Some(d) if d.is_zero())
    }

    /// The tighter of the deadline-derived budget and `cap`, for handing
    /// a bounded slice of time to a nested call.
    pub fn budget(&self, cap: Duration) -> Duration {
        match self.remaining() {
            Some(rem) => rem.min(cap),
            None => cap,
        }
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::background()
    }
}
