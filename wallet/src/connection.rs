//! Wallet connection state machine
//!
//! ```text
//! NotConnected --connect()--> Connecting --account--> Connected
//!      ^                          |                       |
//!      +------- error ------------+                       |
//!      +------------------- disconnect() -----------------+
//! ```

use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tidepool_core::{Account, LedgerProvider, TidepoolError, TidepoolResult};
use tidepool_state::{Observable, Readable};
use tracing::{debug, info, warn};

#[cfg(feature = "dev-tools")]
use tidepool_core::DevControl;

use crate::session::Session;

/// Connection status without payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    NotConnected,
    Connecting,
    Connected,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::NotConnected => "NOT_CONNECTED",
            Status::Connecting => "CONNECTING",
            Status::Connected => "CONNECTED",
        };
        f.write_str(name)
    }
}

/// Observable state of the wallet connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Idle; carries the error of the last failed attempt, if any
    NotConnected { error: Option<TidepoolError> },
    Connecting,
    Connected { account: Account },
}

impl ConnectionState {
    pub fn status(&self) -> Status {
        match self {
            ConnectionState::NotConnected { .. } => Status::NotConnected,
            ConnectionState::Connecting => Status::Connecting,
            ConnectionState::Connected { .. } => Status::Connected,
        }
    }

    pub fn account(&self) -> Option<&Account> {
        match self {
            ConnectionState::Connected { account } => Some(account),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&TidepoolError> {
        match self {
            ConnectionState::NotConnected { error } => error.as_ref(),
            _ => None,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected { .. })
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        ConnectionState::NotConnected { error: None }
    }
}

/// Owns the connection to a wallet provider
pub struct ConnectionManager {
    provider: Arc<dyn LedgerProvider>,
    state: Observable<ConnectionState>,
    session: RwLock<Option<Session>>,
    epoch: AtomicU64,
    #[cfg(feature = "dev-tools")]
    dev_control: Option<Arc<dyn DevControl>>,
}

impl ConnectionManager {
    pub fn new(provider: Arc<dyn LedgerProvider>) -> Self {
        Self {
            provider,
            state: Observable::new(ConnectionState::default()),
            session: RwLock::new(None),
            epoch: AtomicU64::new(0),
            #[cfg(feature = "dev-tools")]
            dev_control: None,
        }
    }

    /// Attach the development ledger controls
    #[cfg(feature = "dev-tools")]
    pub fn with_dev_control(mut self, control: Arc<dyn DevControl>) -> Self {
        self.dev_control = Some(control);
        self
    }

    #[cfg(feature = "dev-tools")]
    pub fn dev_control(&self) -> Option<Arc<dyn DevControl>> {
        self.dev_control.clone()
    }

    /// Read-only view of the connection state
    pub fn state(&self) -> Readable<ConnectionState> {
        self.state.reader()
    }

    pub fn current(&self) -> ConnectionState {
        self.state.get()
    }

    /// Connect to the provider's first account
    ///
    /// Fails immediately, without touching the state, when an attempt is
    /// already in flight or a connection is established.
    pub async fn connect(&self) -> TidepoolResult<Account> {
        let mut rejected = None;
        self.state.update(|state| match state {
            ConnectionState::NotConnected { .. } => Some(ConnectionState::Connecting),
            ConnectionState::Connecting => {
                rejected = Some(TidepoolError::AlreadyConnecting);
                None
            }
            ConnectionState::Connected { .. } => {
                rejected = Some(TidepoolError::AlreadyConnected);
                None
            }
        });
        if let Some(err) = rejected {
            warn!("Connect rejected: {}", err);
            return Err(err);
        }

        info!("Connecting to wallet provider...");

        match self.handshake().await {
            Ok(account) => {
                let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
                *self.session.write() =
                    Some(Session::new(account.clone(), self.provider.clone(), epoch));
                self.state.set(ConnectionState::Connected {
                    account: account.clone(),
                });
                info!("Connected as {} (balance {})", account.address, account.balance);
                Ok(account)
            }
            Err(err) => {
                warn!("Connection failed: {}", err);
                self.state.set(ConnectionState::NotConnected {
                    error: Some(err.clone()),
                });
                Err(err)
            }
        }
    }

    async fn handshake(&self) -> TidepoolResult<Account> {
        let accounts = self.provider.accounts().await?;
        let address = accounts.first().copied().ok_or(TidepoolError::NoAccounts)?;
        let balance = self.provider.balance(&address).await?;
        Ok(Account { address, balance })
    }

    /// Revoke the local session and ask the provider to end its own
    pub async fn disconnect(&self) -> TidepoolResult<()> {
        let Some(session) = self.session.write().take() else {
            debug!("Disconnect without an active session");
            return Ok(());
        };

        self.state.set(ConnectionState::NotConnected { error: None });
        info!("Disconnected {}", session.address());

        self.provider.disconnect().await.map_err(|e| {
            warn!("Provider failed to end session: {}", e);
            TidepoolError::Provider(e)
        })
    }

    /// The active session, if connected
    pub fn session(&self) -> TidepoolResult<Session> {
        self.session.read().clone().ok_or(TidepoolError::NotConnected)
    }

    /// Whether `session` is still the active one
    pub fn is_current(&self, session: &Session) -> bool {
        self.session
            .read()
            .as_ref()
            .map(|active| active.epoch() == session.epoch())
            .unwrap_or(false)
    }

    /// Re-read the connected account's balance and republish it
    pub async fn refresh_account(&self) -> TidepoolResult<Account> {
        let session = self.session()?;
        let balance = self.provider.balance(&session.address()).await?;
        let account = Account {
            address: session.address(),
            balance,
        };

        // Swap and publish under the state lock; a disconnect in between wins.
        let published = self.state.update(|state| {
            if !state.is_connected() {
                return None;
            }
            let mut active = self.session.write();
            match active.as_mut() {
                Some(current) if current.epoch() == session.epoch() => {
                    *current = current.with_account(account.clone());
                    Some(ConnectionState::Connected {
                        account: account.clone(),
                    })
                }
                _ => None,
            }
        });
        if !published {
            return Err(TidepoolError::NotConnected);
        }

        debug!("Account {} balance refreshed: {}", account.address, account.balance);
        Ok(account)
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state.get())
            .finish()
    }
}
