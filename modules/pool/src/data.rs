//! Pool snapshot types

use serde::{Deserialize, Serialize};
use tidepool_core::{Address, Amount, Receiver};

/// Snapshot of the connected account's funding pool
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolData {
    /// Funds left to disburse
    pub balance: Amount,
    /// Disbursed to all receivers with each block
    pub amount_per_block: Amount,
    /// Receivers in ledger order
    pub receiver_addresses: Vec<Address>,
    /// Funds received from other pools, ready to collect
    pub collectable_funds: Amount,
}

impl PoolData {
    /// Compose a snapshot from the four pool reads
    pub fn compose(
        balance: Amount,
        collectable_funds: Amount,
        amount_per_block: Amount,
        receivers: Vec<Receiver>,
    ) -> Self {
        let mut receiver_addresses: Vec<Address> = Vec::with_capacity(receivers.len());
        for receiver in receivers {
            if !receiver_addresses.contains(&receiver.address) {
                receiver_addresses.push(receiver.address);
            }
        }

        Self {
            balance,
            amount_per_block,
            receiver_addresses,
            collectable_funds,
        }
    }

    pub fn has_receiver(&self, address: &Address) -> bool {
        self.receiver_addresses.contains(address)
    }

    /// The user-editable part of the snapshot
    pub fn settings(&self) -> PoolSettings {
        PoolSettings {
            amount_per_block: self.amount_per_block,
            receiver_addresses: self.receiver_addresses.clone(),
        }
    }
}

/// Desired pool configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSettings {
    pub amount_per_block: Amount,
    pub receiver_addresses: Vec<Address>,
}

impl PoolSettings {
    pub fn new(amount_per_block: Amount, receiver_addresses: Vec<Address>) -> Self {
        Self {
            amount_per_block,
            receiver_addresses,
        }
    }

    /// Same settings with `addresses` dropped from the receivers
    pub fn without_receivers(mut self, addresses: &[Address]) -> Self {
        self.receiver_addresses.retain(|a| !addresses.contains(a));
        self
    }

    /// Receivers to add and to remove to get from `current` to `self`,
    /// both in order of appearance
    pub fn receiver_changes(&self, current: &PoolData) -> (Vec<Address>, Vec<Address>) {
        let mut added = Vec::new();
        for address in &self.receiver_addresses {
            if !current.has_receiver(address) && !added.contains(address) {
                added.push(*address);
            }
        }
        let removed = current
            .receiver_addresses
            .iter()
            .filter(|address| !self.receiver_addresses.contains(address))
            .copied()
            .collect();
        (added, removed)
    }
}
