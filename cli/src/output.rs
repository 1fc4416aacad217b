//! Terminal rendering of store states

use colored::Colorize;
use tidepool_core::TidepoolError;
use tidepool_pool::PoolData;
use tidepool_state::{RemoteData, ValidationState};
use tidepool_wallet::ConnectionState;

/// One line per pool store transition
pub fn render_pool_state(state: &RemoteData<PoolData, TidepoolError>) -> String {
    match state {
        RemoteData::NotAsked => format!("{} pool not loaded", "·".dimmed()),
        RemoteData::Loading => format!("{} loading pool...", "…".yellow()),
        RemoteData::Success(data) => format!(
            "{} pool balance {}, {} per block, {} receiver(s), {} collectable",
            "✔".green(),
            data.balance.to_string().bold(),
            data.amount_per_block,
            data.receiver_addresses.len(),
            data.collectable_funds
        ),
        RemoteData::Error(e) => format!("{} {}", "✘".red(), e.to_string().red()),
    }
}

/// Full pool snapshot
pub fn render_pool(data: &PoolData) -> String {
    let mut lines = vec![
        format!("Balance:          {}", data.balance),
        format!("Amount per block: {}", data.amount_per_block),
        format!("Collectable:      {}", data.collectable_funds),
        format!("Receivers:        {}", data.receiver_addresses.len()),
    ];
    lines.extend(
        data.receiver_addresses
            .iter()
            .map(|address| format!("  - {}", address)),
    );
    lines.join("\n")
}

pub fn render_connection(state: &ConnectionState) -> String {
    let status = state.status().to_string();
    match state {
        ConnectionState::NotConnected { error: Some(e) } => {
            format!("{} ({})", status.red(), e)
        }
        ConnectionState::NotConnected { error: None } => status.dimmed().to_string(),
        ConnectionState::Connecting => status.yellow().to_string(),
        ConnectionState::Connected { account } => format!(
            "{} as {} (balance {})",
            status.green(),
            account.address,
            account.balance
        ),
    }
}

/// Validation messages of a field, or `None` when it passes
pub fn render_validation(field: &str, state: &ValidationState) -> Option<String> {
    match state {
        ValidationState::Invalid(messages) => Some(format!(
            "{} {}: {}",
            "✘".red(),
            field.bold(),
            messages.join(", ")
        )),
        _ => None,
    }
}
