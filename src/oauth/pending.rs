//! Resolve-once slot correlating one authorization request with its callback

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use super::tokens::TokenSet;
use crate::{Error, Result};

/// How a pending exchange was settled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// Tokens were delivered to the waiter
    Succeeded,
    /// The exchange failed with this message
    Failed(String),
}

struct Slot {
    tx: Option<oneshot::Sender<Result<TokenSet>>>,
    settled: Option<Settlement>,
}

/// Constructor for the resolver/waiter pair
pub struct PendingExchange;

impl PendingExchange {
    /// Create a fresh, unsettled exchange
    pub fn create() -> (ExchangeResolver, ExchangeWaiter) {
        let (tx, rx) = oneshot::channel();
        let slot = Arc::new(Mutex::new(Slot {
            tx: Some(tx),
            settled: None,
        }));
        let waiter = ExchangeWaiter {
            rx,
            slot: Arc::downgrade(&slot),
        };
        (ExchangeResolver { slot }, waiter)
    }
}

/// Settling side, shared with the callback route
#[derive(Clone)]
pub struct ExchangeResolver {
    slot: Arc<Mutex<Slot>>,
}

impl ExchangeResolver {
    /// Deliver tokens; returns `false` if the exchange was already settled
    pub fn resolve(&self, tokens: TokenSet) -> bool {
        settle(&self.slot, Settlement::Succeeded, Ok(tokens))
    }

    /// Deliver a failure; returns `false` if the exchange was already settled
    pub fn reject(&self, error: Error) -> bool {
        settle(&self.slot, Settlement::Failed(error.to_string()), Err(error))
    }

    /// Outcome, once settled
    pub fn settlement(&self) -> Option<Settlement> {
        self.slot.lock().settled.clone()
    }

    /// Whether `resolve` or `reject` has already won
    pub fn is_settled(&self) -> bool {
        self.slot.lock().settled.is_some()
    }
}

fn settle(slot: &Mutex<Slot>, settlement: Settlement, value: Result<TokenSet>) -> bool {
    let mut slot = slot.lock();
    if slot.settled.is_some() {
        debug!("Ignoring settlement of an already settled exchange");
        return false;
    }
    slot.settled = Some(settlement);
    if let Some(tx) = slot.tx.take() {
        // Receiver may be gone if the flow was torn down
        let _ = tx.send(value);
    }
    true
}

/// Waiting side, owned by the flow
pub struct ExchangeWaiter {
    rx: oneshot::Receiver<Result<TokenSet>>,
    slot: Weak<Mutex<Slot>>,
}

impl ExchangeWaiter {
    /// Wait up to `window` for the exchange to settle
    ///
    /// On timeout the slot is rejected with `TimedOut` so later callbacks are
    /// ignored. If every resolver is dropped unsettled the result is `Cancelled`.
    pub async fn await_result(mut self, window: Duration) -> Result<TokenSet> {
        match tokio::time::timeout(window, &mut self.rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::Cancelled),
            Err(_) => {
                let won = match self.slot.upgrade() {
                    Some(slot) => settle(
                        &slot,
                        Settlement::Failed(Error::TimedOut(window).to_string()),
                        Err(Error::TimedOut(window)),
                    ),
                    None => true,
                };
                if won {
                    return Err(Error::TimedOut(window));
                }
                // Settled concurrently with the deadline; the value is in flight
                match self.rx.await {
                    Ok(result) => result,
                    Err(_) => Err(Error::Cancelled),
                }
            }
        }
    }
}

/// Rejects the exchange with `Cancelled` when dropped
pub struct RejectOnDrop(ExchangeResolver);

impl RejectOnDrop {
    /// Guard `resolver`
    pub fn new(resolver: ExchangeResolver) -> Self {
        Self(resolver)
    }
}

impl Drop for RejectOnDrop {
    fn drop(&mut self) {
        if self.0.reject(Error::Cancelled) {
            debug!("Pending exchange cancelled");
        }
    }
}
