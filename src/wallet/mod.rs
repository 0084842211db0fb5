//! Wallet Store
//!
//! Owns the session context (current user plus cached snapshot) and talks to
//! a `WalletBackend`. Balance pushes arrive through a `BalanceFeed`.

pub mod local;
pub mod model;
pub mod push;
pub mod remote;

pub use local::LocalWallet;
pub use model::{
    generate_transaction_id, Direction, NewTransaction, Transaction, TransactionStatus, User,
    WalletSnapshot,
};
pub use push::PushFeed;
pub use remote::RemoteWallet;

use crate::auth::PassphrasePolicy;
use crate::config::Config;
use crate::error::{PayError, PayResult};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Storage and ledger operations a wallet backend provides
#[async_trait]
pub trait WalletBackend: Send + Sync {
    async fn get_user(&self, name: &str) -> PayResult<User>;

    async fn validate_passphrase(&self, name: &str, passphrase: &str) -> PayResult<bool>;

    /// Newest first
    async fn list_transactions(
        &self,
        user_id: &str,
        limit: usize,
        offset: usize,
    ) -> PayResult<Vec<Transaction>>;

    /// Record a transaction and move the balance. Rejects overdrafts.
    async fn append_transaction(&self, tx: NewTransaction) -> PayResult<Transaction>;

    async fn set_balance(&self, name: &str, balance: Decimal) -> PayResult<User>;

    fn name(&self) -> &str;
}

pub type BalanceCallback = Arc<dyn Fn(Decimal) + Send + Sync>;

/// Source of pushed balance updates
pub trait BalanceFeed: Send + Sync {
    fn subscribe(&self, user_id: &str, on_balance: BalanceCallback) -> FeedSubscription;
}

/// Live feed subscription; dropping it ends the background task
#[derive(Debug, Default)]
pub struct FeedSubscription {
    handle: Option<JoinHandle<()>>,
}

impl FeedSubscription {
    pub fn new(handle: JoinHandle<()>) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    /// Subscription with no task behind it
    pub fn inert() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Money movement requested by the payment flow
#[derive(Debug, Clone, PartialEq)]
pub struct Transfer {
    pub direction: Direction,
    pub amount: Decimal,
    pub payee_name: Option<String>,
    pub payee_vpa: Option<String>,
    pub note: Option<String>,
}

/// Current user, their cached snapshot and their push subscription
#[derive(Debug)]
pub struct SessionContext {
    pub user: User,
    pub snapshot: WalletSnapshot,
    subscription: FeedSubscription,
}

pub struct WalletStore {
    backend: Arc<dyn WalletBackend>,
    feed: Option<(Arc<dyn BalanceFeed>, BalanceCallback)>,
    page_size: usize,
    context: Mutex<Option<SessionContext>>,
}

impl WalletStore {
    pub fn new(backend: Arc<dyn WalletBackend>, page_size: usize) -> Self {
        Self {
            backend,
            feed: None,
            page_size: page_size.max(1),
            context: Mutex::new(None),
        }
    }

    /// Subscribe every session to `feed`, delivering updates to `on_balance`
    pub fn with_feed(mut self, feed: Arc<dyn BalanceFeed>, on_balance: BalanceCallback) -> Self {
        self.feed = Some((feed, on_balance));
        self
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Load `name` and replace the session context
    ///
    /// The previous user's subscription is dropped before the new one starts,
    /// so a session never holds more than one feed task.
    pub async fn switch_user(&self, name: &str) -> PayResult<User> {
        let user = self.backend.get_user(name).await?;
        let transactions = self
            .backend
            .list_transactions(&user.id, self.page_size, 0)
            .await?;

        {
            let mut ctx = self.context.lock()?;
            if let Some(mut old) = ctx.take() {
                old.subscription.cancel();
            }
        }

        let subscription = match &self.feed {
            Some((feed, on_balance)) => feed.subscribe(&user.id, on_balance.clone()),
            None => FeedSubscription::inert(),
        };

        info!("👤 Session user: {} ({})", user.name, user.id);
        let mut ctx = self.context.lock()?;
        *ctx = Some(SessionContext {
            snapshot: WalletSnapshot {
                balance: user.balance,
                transactions,
            },
            user: user.clone(),
            subscription,
        });
        Ok(user)
    }

    /// Re-read user and history from the backend
    ///
    /// On failure the cached snapshot is left untouched.
    pub async fn refresh(&self) -> PayResult<WalletSnapshot> {
        let user = self.current_user()?;
        let (fresh, transactions) = futures::try_join!(
            self.backend.get_user(&user.name),
            self.backend.list_transactions(&user.id, self.page_size, 0)
        )?;

        let mut ctx = self.context.lock()?;
        let ctx = ctx.as_mut().ok_or(PayError::NoSession)?;
        ctx.user = fresh.clone();
        ctx.snapshot = WalletSnapshot {
            balance: fresh.balance,
            transactions,
        };
        debug!("Wallet refreshed: balance {}", ctx.snapshot.balance);
        Ok(ctx.snapshot.clone())
    }

    pub fn cached(&self) -> Option<WalletSnapshot> {
        self.context
            .lock()
            .ok()
            .and_then(|ctx| ctx.as_ref().map(|c| c.snapshot.clone()))
    }

    pub fn current_user(&self) -> PayResult<User> {
        let ctx = self.context.lock()?;
        ctx.as_ref()
            .map(|c| c.user.clone())
            .ok_or(PayError::NoSession)
    }

    pub fn has_live_feed(&self) -> bool {
        self.context
            .lock()
            .ok()
            .and_then(|ctx| ctx.as_ref().map(|c| c.subscription.is_active()))
            .unwrap_or(false)
    }

    /// Check a spoken passphrase for the current user
    ///
    /// When the backend exposes the secret the policy decides locally;
    /// otherwise the backend's own (exact) validation is used.
    pub async fn check_passphrase(
        &self,
        spoken: &str,
        policy: &dyn PassphrasePolicy,
    ) -> PayResult<bool> {
        let user = self.current_user()?;
        match user.passphrase.as_deref() {
            Some(secret) => Ok(policy.matches(spoken, secret)),
            None => self.backend.validate_passphrase(&user.name, spoken).await,
        }
    }

    /// Append a transaction for the current user
    ///
    /// Nothing is cached unless the backend accepted the write.
    pub async fn append(&self, transfer: Transfer) -> PayResult<Transaction> {
        if transfer.amount <= Decimal::ZERO {
            return Err(PayError::InvalidAmount(transfer.amount.to_string()));
        }
        let user = self.current_user()?;
        let request = NewTransaction {
            id: generate_transaction_id(),
            user_id: user.id.clone(),
            direction: transfer.direction,
            amount: transfer.amount,
            payee_name: transfer.payee_name,
            payee_vpa: transfer.payee_vpa,
            note: transfer.note,
        };

        let recorded = self.backend.append_transaction(request).await?;
        info!(
            "💸 Recorded {} {} ({})",
            recorded.direction.as_str(),
            recorded.amount,
            recorded.id
        );

        let mut ctx = self.context.lock()?;
        if let Some(ctx) = ctx.as_mut() {
            if ctx.user.id == user.id {
                ctx.snapshot.apply(recorded.clone());
                ctx.user.balance = ctx.snapshot.balance;
            }
        }
        Ok(recorded)
    }

    /// Overwrite the current user's balance
    pub async fn set_balance(&self, balance: Decimal) -> PayResult<Decimal> {
        if balance < Decimal::ZERO {
            return Err(PayError::InvalidAmount(balance.to_string()));
        }
        let user = self.current_user()?;
        let updated = self.backend.set_balance(&user.name, balance).await?;
        self.apply_balance_update(updated.balance);
        Ok(updated.balance)
    }

    /// Fold a pushed balance into the cache
    pub fn apply_balance_update(&self, balance: Decimal) {
        match self.context.lock() {
            Ok(mut ctx) => {
                if let Some(ctx) = ctx.as_mut() {
                    ctx.snapshot.balance = balance;
                    ctx.user.balance = balance;
                }
            }
            Err(e) => warn!("Balance update dropped: {}", e),
        }
    }

    /// End the session, releasing its feed subscription
    pub fn clear(&self) {
        if let Ok(mut ctx) = self.context.lock() {
            ctx.take();
        }
    }
}

/// Build the backend named in config along with its balance feed
pub fn wallet_from_config(
    config: &Config,
) -> PayResult<(Arc<dyn WalletBackend>, Arc<dyn BalanceFeed>)> {
    if config.uses_local_backend() {
        let wallet = Arc::new(LocalWallet::open(std::path::Path::new(
            &config.local_db_path,
        ))?);
        wallet.seed_demo()?;
        Ok((wallet.clone(), wallet))
    } else {
        Ok((
            Arc::new(RemoteWallet::new(&config.api_base_url)),
            Arc::new(PushFeed::from_config(config)),
        ))
    }
}
