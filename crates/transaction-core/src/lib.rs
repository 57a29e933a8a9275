//! # siplet-transaction-core
//!
//! RFC 3261 transactions for the siplet stack, run inside per-Call-ID call
//! sessions.
//!
//! ## Layout
//!
//! - [`transaction`]: the four transaction state machines and the
//!   branch-based [`TransactionKey`].
//! - [`session`]: [`CallSessionManager`], which serializes all work for one
//!   Call-ID, and the [`SessionContext`] handed to every job and timer.
//! - [`timer`]: the per-session [`TimerQueue`].
//! - [`manager`]: the [`TransactionManager`] entry point and the upward
//!   [`SipHandler`] and [`ClientTransactionListener`] interfaces.
//! - [`dialog`]: RFC 3261 §12 dialog state and in-dialog request building.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use siplet_transaction_core::prelude::*;
//!
//! # async fn example() -> std::result::Result<(), Box<dyn std::error::Error>> {
//! let (connector, events) = siplet_sip_transport::bind_udp("127.0.0.1:5060".parse()?).await?;
//! let handler = Arc::new(RejectingHandler::default());
//! let manager = TransactionManager::new(TransactionConfig::default(), handler);
//! manager.start();
//! manager.spawn(events);
//! # drop(connector);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dialog;
pub mod error;
pub mod manager;
pub mod session;
pub mod timer;
pub mod transaction;
pub mod utils;

pub use config::{SessionConfig, TimerSettings, TransactionConfig};
pub use dialog::{Dialog, DialogId, DialogState};
pub use error::{Error, Result};
pub use manager::{
    ClientTransactionListener, RejectingHandler, SipHandler, StatsSnapshot, TransactionManager,
};
pub use session::{
    ApplicationSession, CallSession, CallSessionManager, SessionContext, SessionScope,
};
pub use timer::{TimerHandle, TimerQueue};
pub use transaction::{
    ClientTransaction, ServerTransaction, TimerName, Transaction, TransactionKey, TransactionKind,
    TransactionState,
};

/// Re-export of common types for easier use
pub mod prelude {
    pub use crate::{
        ApplicationSession, ClientTransactionListener, Dialog, DialogId, Error, RejectingHandler,
        Result, SessionContext, SipHandler, TimerHandle, TransactionConfig, TransactionKey,
        TransactionManager, TransactionState,
    };
}
