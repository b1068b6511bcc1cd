//! Single-use anti-forgery tokens for the OAuth `state` parameter.
//!
//! Every authorization attempt gets a fresh nonce which the provider hands
//! back on the redirect. A nonce is accepted once: redeeming it removes it
//! from the ledger, so replaying the same redirect fails.
//!
//! Outstanding nonces are persisted as `{"nonces": [...]}` under
//! [`NONCES_KEY`]. Abandoned authorization attempts would otherwise grow
//! that list forever, so at most [`Ledger::MAX_OUTSTANDING`] nonces are
//! kept and the oldest is evicted first.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    error::{Error, Result},
    store::{self, Store, NONCES_KEY},
};

#[derive(Debug, Default, Serialize, Deserialize)]
struct Nonces {
    nonces: Vec<String>,
}

/// Issues and redeems nonces, backed by the credential store.
pub struct Ledger {
    store: Arc<dyn Store>,

    // Serializes read-modify-write sequences on the store.
    lock: Mutex<()>,
}

impl Ledger {
    /// Maximum number of nonces waiting to be redeemed.
    pub const MAX_OUTSTANDING: usize = 32;

    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
        }
    }

    /// Generates a new nonce and persists it.
    ///
    /// Nonces are random v4 UUIDs drawn from the operating system's secure
    /// random number generator.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written.
    pub async fn issue(&self) -> Result<String> {
        let _guard = self.lock.lock().await;
        let mut ledger = self.load().await?;

        let nonce = loop {
            let candidate = Uuid::new_v4().simple().to_string();
            if !ledger.nonces.contains(&candidate) {
                break candidate;
            }
        };
        ledger.nonces.push(nonce.clone());

        if ledger.nonces.len() > Self::MAX_OUTSTANDING {
            let evicted = ledger.nonces.len() - Self::MAX_OUTSTANDING;
            ledger.nonces.drain(..evicted);
            debug!("evicted {evicted} abandoned nonce(s)");
        }

        store::save(self.store.as_ref(), NONCES_KEY, &ledger).await?;
        trace!("issued nonce; {} outstanding", ledger.nonces.len());

        Ok(nonce)
    }

    /// Redeems `nonce`, removing it from the ledger.
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied` if `nonce` was never issued or has
    /// already been redeemed; the ledger is left untouched in that case.
    /// Returns an error if the store cannot be read or written.
    pub async fn redeem(&self, nonce: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut ledger = self.load().await?;

        let Some(position) = ledger.nonces.iter().position(|known| known == nonce) else {
            return Err(Error::permission_denied("invalid or replayed state"));
        };
        ledger.nonces.remove(position);

        store::save(self.store.as_ref(), NONCES_KEY, &ledger).await
    }

    /// Number of nonces waiting to be redeemed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn outstanding(&self) -> Result<usize> {
        Ok(self.load().await?.nonces.len())
    }

    async fn load(&self) -> Result<Nonces> {
        store::load(self.store.as_ref(), NONCES_KEY)
            .await
            .map(Option::unwrap_or_default)
    }
}
