//! Single-flight credential renewal
//!
//! Any number of callers may discover an expired credential at the same
//! moment. The first one starts a renewal; everyone else joins the same
//! pending outcome, so exactly one renewal call reaches the server.

use crate::credential::{Credential, CredentialStore};

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Performs the actual renewal call
#[async_trait]
pub trait Renewer: Send + Sync {
    /// Exchange `current` for a fresh credential, `None` on any failure
    async fn renew(&self, current: &Credential) -> Option<Credential>;
}

type PendingRenewal = Shared<BoxFuture<'static, Option<Credential>>>;

/// Holds the renewal ticket: zero or one pending renewal.
pub struct RenewalCoordinator {
    store: Arc<dyn CredentialStore>,
    renewer: Arc<dyn Renewer>,
    ticket: Arc<Mutex<Option<PendingRenewal>>>,
}

/// Clears the ticket when the renewal task ends, however it ends.
struct TicketGuard(Arc<Mutex<Option<PendingRenewal>>>);

impl Drop for TicketGuard {
    fn drop(&mut self) {
        self.0.lock().take();
    }
}

impl RenewalCoordinator {
    pub fn new(store: Arc<dyn CredentialStore>, renewer: Arc<dyn Renewer>) -> Self {
        Self {
            store,
            renewer,
            ticket: Arc::new(Mutex::new(None)),
        }
    }

    /// Renew the stored credential, joining a renewal already in flight.
    ///
    /// On success the new credential has been written to the store by the
    /// time it is returned. A renewal that cannot be written counts as failed.
    pub async fn refresh(&self) -> Option<Credential> {
        let pending = {
            let mut ticket = self.ticket.lock();
            match ticket.as_ref() {
                Some(pending) => {
                    debug!("Joining renewal already in flight");
                    pending.clone()
                }
                None => {
                    let pending = self.start();
                    *ticket = Some(pending.clone());
                    pending
                }
            }
        };

        pending.await
    }

    /// Whether a renewal is currently in flight
    pub fn in_flight(&self) -> bool {
        self.ticket.lock().is_some()
    }

    // Called with the ticket lock held; the spawned task's guard cannot clear
    // the slot before the caller has filled it.
    fn start(&self) -> PendingRenewal {
        let store = self.store.clone();
        let renewer = self.renewer.clone();
        let guard = TicketGuard(self.ticket.clone());

        let task = tokio::spawn(async move {
            let _guard = guard;
            let current = store.get()?;

            info!("Renewing access credential");
            let Some(renewed) = renewer.renew(&current).await else {
                warn!("Credential renewal failed");
                return None;
            };

            commit(store.as_ref(), &current, renewed)
        });

        async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(error = %e, "Renewal task aborted");
                    None
                }
            }
        }
        .boxed()
        .shared()
    }
}

/// Write the renewed credential unless the store moved on while the renewal
/// was in flight (purged by an auth failure, or replaced by a new login).
fn commit(
    store: &dyn CredentialStore,
    current: &Credential,
    renewed: Credential,
) -> Option<Credential> {
    match store.replace_if_current(current, renewed.clone()) {
        Ok(true) => {
            info!("Access credential renewed");
            Some(renewed)
        }
        Ok(false) => {
            warn!("Credential store changed during renewal, discarding renewed credential");
            store.get().filter(|c| !c.is_expired())
        }
        Err(e) => {
            warn!(error = %e, "Failed to persist renewed credential");
            None
        }
    }
}
