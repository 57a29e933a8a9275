//! Transaction counters

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;

use crate::transaction::TransactionKind;

/// Live counters shared by every call session
#[derive(Debug, Default)]
pub struct TransactionStats {
    client_current: AtomicUsize,
    client_total: AtomicU64,
    server_current: AtomicUsize,
    server_total: AtomicU64,
    stray_responses: AtomicU64,
}

/// Point-in-time copy of [`TransactionStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub client_transactions: usize,
    pub client_transactions_total: u64,
    pub server_transactions: usize,
    pub server_transactions_total: u64,
    pub stray_responses: u64,
}

impl TransactionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn started(&self, kind: TransactionKind) {
        if kind.is_server() {
            self.server_current.fetch_add(1, Ordering::Relaxed);
            self.server_total.fetch_add(1, Ordering::Relaxed);
        } else {
            self.client_current.fetch_add(1, Ordering::Relaxed);
            self.client_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn terminated(&self, kind: TransactionKind) {
        let current = if kind.is_server() {
            &self.server_current
        } else {
            &self.client_current
        };
        // Never wraps below zero, even if a panicking callback lost a transaction
        let _ = current.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub(crate) fn stray_response(&self) {
        self.stray_responses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            client_transactions: self.client_current.load(Ordering::Relaxed),
            client_transactions_total: self.client_total.load(Ordering::Relaxed),
            server_transactions: self.server_current.load(Ordering::Relaxed),
            server_transactions_total: self.server_total.load(Ordering::Relaxed),
            stray_responses: self.stray_responses.load(Ordering::Relaxed),
        }
    }
}
