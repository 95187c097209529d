//! # Cooperative Cancellation
//!
//! A [`CancelSource`] owns a cancellation flag; [`CancelToken`]s observe it. Tokens can be
//! chained: a child token is cancelled when its own source *or* any ancestor source fires.
//! Nothing is ever interrupted forcibly. Work checks the token at its own safe points,
//! either by polling [`CancelToken::is_cancelled`] or by racing a wait against
//! [`CancelToken::cancelled`].

use futures::future::{select_all, BoxFuture, FutureExt};
use std::time::Duration;
use tokio::sync::watch;

/// Returned when a cancellable wait is cut short.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// The owning side of a cancellation flag.
#[derive(Debug)]
pub struct CancelSource {
    flag: watch::Sender<bool>,
    token: CancelToken,
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelSource {
    /// A root source with no ancestors.
    pub fn new() -> Self {
        Self::child_of(&CancelToken::never())
    }

    /// A source whose token also observes every flag `parent` observes.
    pub fn child_of(parent: &CancelToken) -> Self {
        let (flag, receiver) = watch::channel(false);
        let mut flags = parent.flags.clone();
        flags.push(receiver);
        Self {
            flag,
            token: CancelToken { flags },
        }
    }

    pub fn token(&self) -> CancelToken {
        self.token.clone()
    }

    /// Raise the flag. Idempotent.
    pub fn cancel(&self) {
        self.flag.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Observer of one or more cancellation flags.
#[derive(Debug, Clone)]
pub struct CancelToken {
    flags: Vec<watch::Receiver<bool>>,
}

impl CancelToken {
    /// A token that is never cancelled.
    pub fn never() -> Self {
        Self { flags: Vec::new() }
    }

    pub fn is_cancelled(&self) -> bool {
        self.flags.iter().any(|flag| *flag.borrow())
    }

    /// Completes once any observed flag is raised. Pends forever for [`CancelToken::never`].
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        if self.flags.is_empty() {
            return std::future::pending().await;
        }
        let waits: Vec<BoxFuture<'static, ()>> = self
            .flags
            .iter()
            .cloned()
            .map(|mut flag| {
                async move {
                    // A dropped source can no longer cancel anything.
                    let closed = flag.wait_for(|raised| *raised).await.is_err();
                    if closed {
                        std::future::pending::<()>().await;
                    }
                }
                .boxed()
            })
            .collect();
        select_all(waits).await;
    }

    /// Sleep for `duration` unless cancelled first.
    pub async fn sleep(&self, duration: Duration) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            return Err(Cancelled);
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.cancelled() => Err(Cancelled),
        }
    }

    /// Fail fast if already cancelled.
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn child_observes_parent() {
        let root = CancelSource::new();
        let child = CancelSource::child_of(&root.token());
        let token = child.token();
        assert!(!token.is_cancelled());

        root.cancel();
        assert!(token.is_cancelled());
        tokio::time::timeout(Duration::from_millis(100), token.cancelled())
            .await
            .expect("child token should observe parent cancellation");
    }

    #[tokio::test]
    async fn parent_does_not_observe_child() {
        let root = CancelSource::new();
        let child = CancelSource::child_of(&root.token());
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!root.is_cancelled());
    }

    #[tokio::test]
    async fn sleep_is_cut_short() {
        let source = CancelSource::new();
        let token = source.token();
        let sleeper = tokio::spawn(async move { token.sleep(Duration::from_secs(30)).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        source.cancel();
        let result = tokio::time::timeout(Duration::from_secs(1), sleeper)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, Err(Cancelled));
    }

    #[tokio::test]
    async fn dropped_source_never_cancels() {
        let source = CancelSource::new();
        let token = source.token();
        drop(source);
        assert!(!token.is_cancelled());
        assert_eq!(token.sleep(Duration::from_millis(5)).await, Ok(()));
    }
}
