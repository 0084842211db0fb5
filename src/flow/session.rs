//! Session wiring
//!
//! Builds the wallet, recognition chain and controller for one user session
//! and runs the controller over a single event queue. Recognition callbacks,
//! pushed balances and user actions only enqueue.

use super::{FlowController, FlowEvent, FlowOutput, UserAction};
use crate::audio;
use crate::config::Config;
use crate::error::PayResult;
use crate::recognition::{self, RecognitionSink, RecognitionSource, TypedInput};
use crate::wallet::{wallet_from_config, BalanceFeed, WalletBackend, WalletStore};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Everything a session is assembled from
pub struct SessionParts {
    pub backend: Arc<dyn WalletBackend>,
    pub feed: Option<Arc<dyn BalanceFeed>>,
    pub source: Box<dyn RecognitionSource>,
    pub typed: Option<TypedInput>,
}

/// A controller plus the queue that feeds it
pub struct Session {
    controller: FlowController,
    events: UnboundedReceiver<FlowEvent>,
    user: String,
}

/// Cloneable handle for feeding a running session
#[derive(Clone)]
pub struct SessionHandle {
    events: UnboundedSender<FlowEvent>,
    typed: Option<TypedInput>,
    wallet: Arc<WalletStore>,
}

impl SessionHandle {
    /// Submit text as if spoken; false when the typed source is not listening
    pub fn say(&self, text: &str) -> bool {
        self.typed
            .as_ref()
            .map(|input| input.submit(text))
            .unwrap_or(false)
    }

    pub fn scan(&self, payload: &str) -> bool {
        self.send(FlowEvent::Scan(payload.to_string()))
    }

    pub fn act(&self, action: UserAction) -> bool {
        self.send(FlowEvent::Action(action))
    }

    pub fn send(&self, event: FlowEvent) -> bool {
        self.events.send(event).is_ok()
    }

    pub fn shutdown(&self) {
        let _ = self.events.send(FlowEvent::Shutdown);
    }

    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }

    /// Read-only view of the session wallet
    pub fn wallet(&self) -> &WalletStore {
        &self.wallet
    }
}

impl Session {
    /// Probe recognition, open the configured wallet and wire everything up
    pub async fn build(
        config: &Config,
    ) -> PayResult<(Self, SessionHandle, UnboundedReceiver<FlowOutput>)> {
        let (backend, feed) = wallet_from_config(config)?;
        let (chain, typed) = recognition::select(config, audio::default_tap()).await;
        info!(
            "🚀 Session: wallet '{}', recognition '{}'",
            backend.name(),
            chain.active_name()
        );

        Ok(Self::assemble(
            config,
            SessionParts {
                backend,
                feed: Some(feed),
                source: Box::new(chain),
                typed: Some(typed),
            },
        ))
    }

    pub fn assemble(
        config: &Config,
        parts: SessionParts,
    ) -> (Self, SessionHandle, UnboundedReceiver<FlowOutput>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outputs_tx, outputs_rx) = mpsc::unbounded_channel();

        let mut store = WalletStore::new(parts.backend, config.page_size);
        if let Some(feed) = parts.feed {
            let pushes = events_tx.clone();
            store = store.with_feed(
                feed,
                Arc::new(move |balance| {
                    let _ = pushes.send(FlowEvent::BalanceChanged(balance));
                }),
            );
        }

        let wallet = Arc::new(store);
        let controller = FlowController::new(
            parts.source,
            RecognitionSink::new(events_tx.clone()),
            wallet.clone(),
            outputs_tx,
        )
        .configure(config);

        let session = Self {
            controller,
            events: events_rx,
            user: config.default_user.clone(),
        };
        let handle = SessionHandle {
            events: events_tx,
            typed: parts.typed,
            wallet,
        };
        (session, handle, outputs_rx)
    }

    pub fn controller(&self) -> &FlowController {
        &self.controller
    }

    /// Run until `Shutdown`
    pub async fn run(mut self) {
        self.controller.start(&self.user).await;
        while let Some(event) = self.events.recv().await {
            if !self.controller.handle(event).await {
                break;
            }
        }
        debug!("Session loop finished");
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::FlowState;
    use crate::recognition::TypedSource;
    use crate::wallet::{BalanceFeed, LocalWallet};

    fn typed_session() -> (Session, SessionHandle, UnboundedReceiver<FlowOutput>) {
        let wallet = Arc::new(LocalWallet::in_memory().unwrap());
        wallet.seed_demo().unwrap();
        let feed: Arc<dyn BalanceFeed> = wallet.clone();
        let (source, input) = TypedSource::new();
        let mut config = Config::default();
        config.audit_log = false;
        Session::assemble(
            &config,
            SessionParts {
                backend: wallet.clone(),
                feed: Some(feed),
                source: Box::new(source),
                typed: Some(input),
            },
        )
    }

    #[tokio::test]
    async fn test_session_runs_until_shutdown() {
        let (session, handle, mut outputs) = typed_session();
        let task = session.spawn();

        // Typed source arms once the session user is loaded
        for _ in 0..50 {
            if handle.say("scan qr") {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        let mut reached_scan = false;
        while let Some(output) = outputs.recv().await {
            if output
                == (FlowOutput::StateChanged {
                    from: FlowState::Idle,
                    to: FlowState::ScanningCode,
                })
            {
                reached_scan = true;
                break;
            }
        }
        assert!(reached_scan);
        assert_eq!(handle.wallet().current_user().unwrap().name, "Harsh");

        handle.shutdown();
        task.await.unwrap();
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn test_say_without_typed_input() {
        let (_session, handle, _outputs) = typed_session();
        // Session not started, so the typed source is idle
        assert!(!handle.say("hello"));
        assert!(handle.act(UserAction::Listen));
    }
}
