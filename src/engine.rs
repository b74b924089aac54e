// ============================================================================
// Reconciler - shared engine context
// ============================================================================
//
// `Reconciler` is a cheap clonable handle. Lifecycle tasks, auto-reveal and
// the sweeps live in their own modules as further `impl Reconciler` blocks;
// this file owns construction, supervised spawning and the small helpers
// every path shares (unlock-with-logging, notify).
//
// ============================================================================

use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{error, warn, Instrument, Span};

use crate::config::ReconcilerConfig;
use crate::error::FundLockError;
use crate::models::{NotificationKind, Wager, WagerAction, WagerNotification};
use crate::ports::{FundLockService, LedgerService, Notifier, PendingSecretStore, TxRelay};
use crate::processing_lock::ProcessingLocks;
use crate::recheck::{RecheckQueue, RetryBackoff};
use crate::rpc::ChainQuery;

/// Everything the engine talks to
#[derive(Clone)]
pub struct Collaborators {
    pub chain: Arc<dyn ChainQuery>,
    pub relay: Arc<dyn TxRelay>,
    pub ledger: Arc<dyn LedgerService>,
    pub funds: Arc<dyn FundLockService>,
    pub notifier: Arc<dyn Notifier>,
    pub secrets: Arc<dyn PendingSecretStore>,
}

pub(crate) struct Inner {
    pub(crate) chain: Arc<dyn ChainQuery>,
    pub(crate) relay: Arc<dyn TxRelay>,
    pub(crate) ledger: Arc<dyn LedgerService>,
    pub(crate) funds: Arc<dyn FundLockService>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) secrets: Arc<dyn PendingSecretStore>,
    pub(crate) locks: ProcessingLocks,
    pub(crate) rechecks: RecheckQueue,
    /// Expired wagers whose sweep cancel failed, by wager id
    pub(crate) expiry_backoff: RetryBackoff,
    pub(crate) config: ReconcilerConfig,
}

#[derive(Clone)]
pub struct Reconciler {
    pub(crate) inner: Arc<Inner>,
}

impl Reconciler {
    pub fn new(collaborators: Collaborators, config: ReconcilerConfig) -> Self {
        let Collaborators { chain, relay, ledger, funds, notifier, secrets } = collaborators;
        Self {
            inner: Arc::new(Inner {
                chain,
                relay,
                ledger,
                funds,
                notifier,
                secrets,
                locks: ProcessingLocks::new(),
                rechecks: RecheckQueue::new(),
                expiry_backoff: RetryBackoff::new(),
                config,
            }),
        }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.inner.config
    }

    pub fn locks(&self) -> &ProcessingLocks {
        &self.inner.locks
    }

    pub fn rechecks(&self) -> &RecheckQueue {
        &self.inner.rechecks
    }

    /// Runs `fut` detached inside `span`. The returned handle belongs to the
    /// supervisor, which logs a panic or cancellation instead of propagating it.
    pub fn spawn_supervised<F>(&self, task: &'static str, span: Span, fut: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let worker = tokio::spawn(fut.instrument(span.clone()));
        tokio::spawn(
            async move {
                if let Err(join_err) = worker.await {
                    if join_err.is_panic() {
                        error!(task, "💥 background task panicked");
                    } else {
                        warn!(task, "background task cancelled");
                    }
                }
            }
            .instrument(span),
        )
    }

    // ========================================================================
    // SHARED HELPERS
    // ========================================================================

    pub(crate) async fn notify(&self, notification: WagerNotification) {
        self.inner.notifier.notify(notification).await;
    }

    pub(crate) async fn notify_kind(
        &self,
        kind: NotificationKind,
        action: WagerAction,
        wager: &Wager,
        reason: Option<&str>,
    ) {
        let mut n = WagerNotification::new(kind, action, wager);
        if let Some(reason) = reason {
            n = n.with_reason(reason);
        }
        self.notify(n).await;
    }

    /// Unlock errors are logged, never fatal. Returns whether the unlock went through.
    pub(crate) async fn release_stake(&self, user_id: &str, amount: u128, wager: &Wager) -> bool {
        match self.inner.funds.unlock(user_id, amount).await {
            Ok(()) => true,
            Err(FundLockError::NothingLocked { .. }) => {
                warn!(wager = %wager.label(), user_id, amount = %amount, "unlock on an already-unlocked balance");
                false
            }
            Err(e) => {
                error!(wager = %wager.label(), user_id, amount = %amount, error = %e, "unlock failed");
                false
            }
        }
    }

    pub(crate) async fn end_inflight_create(&self, maker_id: &str) {
        if let Err(e) = self.inner.funds.end_inflight_create(maker_id).await {
            warn!(maker_id, error = %e, "failed to decrement in-flight create counter");
        }
    }
}
