//! Pool settings form

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use tidepool_core::{Address, Amount, TidepoolError, TidepoolResult};
use tidepool_state::{Constraints, Numericality, ValidationState, ValidationStore};

/// Comma-separated list of address-like tokens
pub static MEMBERS_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[-\w\s]+(?:,[-\w\s]*)*$").expect("members pattern is valid")
});

pub const AMOUNT_REQUIRED: &str = "The amount is required";
pub const MEMBERS_FORMAT: &str = "Should be a comma-separated list of addresses";

/// Validation stores of the pool settings inputs
pub struct PoolForm {
    amount: ValidationStore,
    members: ValidationStore,
}

impl PoolForm {
    pub fn new() -> Self {
        let amount = Constraints::new()
            .presence(AMOUNT_REQUIRED)
            .numericality(Numericality::strict().greater_than(0.0));
        let members = Constraints::new().format(MEMBERS_PATTERN.clone(), MEMBERS_FORMAT);

        Self {
            amount: ValidationStore::new("amount", amount),
            members: ValidationStore::new("members", members),
        }
    }

    pub fn amount(&self) -> &ValidationStore {
        &self.amount
    }

    pub fn members(&self) -> &ValidationStore {
        &self.members
    }

    /// Validate as the user types
    pub fn input_amount(&self, input: &str) -> ValidationState {
        self.amount.validate(input)
    }

    pub fn input_members(&self, input: &str) -> ValidationState {
        self.members.validate(input)
    }

    /// Validate and parse the amount field
    pub fn submit_amount(&self, input: &str) -> TidepoolResult<Amount> {
        self.amount.submit(input)?;
        input
            .trim()
            .parse::<Amount>()
            .map_err(|e| TidepoolError::InvalidAmount(format!("{}: {}", input.trim(), e)))
    }

    /// Validate and parse the members field, dropping empty entries and
    /// repeated addresses
    pub fn submit_members(&self, input: &str) -> TidepoolResult<Vec<Address>> {
        self.members.submit(input)?;

        let mut addresses = Vec::new();
        for token in input.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let address = Address::from_hex(token)
                .map_err(|e| TidepoolError::InvalidAddress(format!("{}: {}", token, e)))?;
            if !addresses.contains(&address) {
                addresses.push(address);
            }
        }
        Ok(addresses)
    }

    /// Clear both fields
    pub fn reset(&self) {
        self.amount.reset();
        self.members.reset();
    }

    pub fn is_valid(&self) -> bool {
        self.amount.get().is_valid() && !matches!(self.members.get(), ValidationState::Invalid(_))
    }
}

impl Default for PoolForm {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PoolForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolForm")
            .field("amount", &self.amount.get())
            .field("members", &self.members.get())
            .finish()
    }
}
