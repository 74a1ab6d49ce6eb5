//! Constructors for every alert raised by the autopilot and the migrator.
//!
//! Each constructor returns a fully formed [`Alert`] whose identity comes
//! from [`AlertIds`], so raising the same condition twice replaces the
//! previous alert instead of adding a second one.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::time::Duration;

use keel_types::{ContractId, Severity, SlabKey};
use serde_json::Value;

use crate::alert::{Alert, AlertIds};

const HINT_LOW_BALANCE: &str = "Ideally, a wallet holds at least one allowance worth of funds to make sure it can renew all its contracts.";
const HINT_SURCHARGE_SUCCEEDED: &str = "This migration succeeded thanks to the migration surcharge multiplier in the gouging settings that allowed overpaying hosts on some critical sector downloads";
const HINT_SURCHARGE_FAILED: &str = "If migrations of low-health slabs fail, it might be necessary to increase the migration surcharge multiplier in the gouging settings to ensure it has every chance of succeeding.";
const HINT_MIGRATION_FAILED: &str = "Migration failures can be temporary, but if they persist it can eventually lead to data loss and should therefore be taken very seriously.";

/// Object names per bucket that reference a slab.
pub type ObjectIds = BTreeMap<String, Vec<String>>;

/// Wallet figures used to judge how urgent a low balance is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LowBalance {
    /// Wallet address.
    pub address: String,
    /// Current confirmed balance, in the smallest currency unit.
    pub balance: u128,
    /// Configured allowance, in the smallest currency unit.
    pub allowance: u128,
    /// Current block height.
    pub block_height: u64,
    /// Number of blocks before contract expiry during which renewals happen.
    pub renew_window: u64,
    /// Height at which the current contract period ends.
    pub end_height: u64,
}

/// Severity of a low balance alert: critical within half a renew window of
/// the period end, warning within a full renew window, info otherwise.
pub fn low_balance_severity(block_height: u64, renew_window: u64, end_height: u64) -> Severity {
    if block_height.saturating_add(renew_window / 2) >= end_height {
        Severity::Critical
    } else if block_height.saturating_add(renew_window) >= end_height {
        Severity::Warning
    } else {
        Severity::Info
    }
}

/// Severity of a failed slab migration given the slab's health.
pub fn migration_failed_severity(health: f64) -> Severity {
    if health < 0.25 {
        Severity::Critical
    } else if health < 0.5 {
        Severity::Warning
    } else {
        Severity::Error
    }
}

/// Human readable remaining-time estimate, rounded to whole minutes.
///
/// Returns `None` when the estimate rounds to zero minutes.
pub fn format_estimate(estimate: Duration) -> Option<String> {
    let minutes = (estimate.as_secs() + 30) / 60;
    match minutes {
        0 => None,
        m if m < 60 => Some(format!("~{m}m remaining")),
        m => Some(format!("~{}h{}m remaining", m / 60, m % 60)),
    }
}

/// Recomputing cached slab health failed.
pub fn health_refresh_failed(ids: &AlertIds, err: &dyn Display) -> Alert {
    Alert::new(ids.health_refresh, Severity::Critical, "Health refresh failed")
        .with_data("error", err.to_string())
}

/// The wallet holds less than one allowance worth of funds.
pub fn low_balance(ids: &AlertIds, wallet: &LowBalance) -> Alert {
    let severity = low_balance_severity(wallet.block_height, wallet.renew_window, wallet.end_height);
    Alert::new(ids.low_balance, severity, "Wallet is low on funds")
        .with_data("address", wallet.address.clone())
        .with_data("balance", wallet.balance.to_string())
        .with_data("allowance", wallet.allowance.to_string())
        .with_data(
            "hint",
            format!(
                "The current wallet balance of {} is less than the configured allowance of {}. {HINT_LOW_BALANCE}",
                wallet.balance, wallet.allowance
            ),
        )
}

/// Migrations are in progress. The estimate is left out when it rounds to
/// zero minutes.
pub fn ongoing_migrations(ids: &AlertIds, remaining: usize, estimate: Duration) -> Alert {
    let alert = Alert::new(
        ids.migration,
        Severity::Info,
        format!("Migrating {remaining} slabs"),
    );
    match format_estimate(estimate) {
        Some(text) => alert.with_data("estimate", text),
        None => alert,
    }
}

/// A slab was only migrated because hosts were overpaid.
pub fn critical_migration_succeeded(ids: &AlertIds, key: &SlabKey) -> Alert {
    Alert::new(
        ids.for_slab(key),
        Severity::Info,
        "Critical migration succeeded",
    )
    .with_data("slabKey", key.to_string())
    .with_data("hint", HINT_SURCHARGE_SUCCEEDED)
}

/// A slab migration failed even though hosts were overpaid.
pub fn critical_migration_failed(
    ids: &AlertIds,
    key: &SlabKey,
    health: f64,
    object_ids: Option<&ObjectIds>,
    err: &dyn Display,
) -> Alert {
    failure_payload(
        Alert::new(ids.for_slab(key), Severity::Critical, "Critical migration failed"),
        key,
        health,
        object_ids,
        err,
    )
    .with_data("hint", HINT_SURCHARGE_FAILED)
}

/// A slab migration failed.
pub fn migration_failed(
    ids: &AlertIds,
    key: &SlabKey,
    health: f64,
    object_ids: Option<&ObjectIds>,
    err: &dyn Display,
) -> Alert {
    failure_payload(
        Alert::new(
            ids.for_slab(key),
            migration_failed_severity(health),
            "Slab migration failed",
        ),
        key,
        health,
        object_ids,
        err,
    )
    .with_data("hint", HINT_MIGRATION_FAILED)
}

/// Pruning a contract failed.
pub fn contract_pruning_failed(
    ids: &AlertIds,
    host_key: &str,
    host_version: &str,
    host_release: &str,
    fcid: &ContractId,
    err: &dyn Display,
) -> Alert {
    Alert::new(ids.for_contract(fcid), Severity::Warning, "Contract pruning failed")
        .with_data("contractID", fcid.to_string())
        .with_data("error", err.to_string())
        .with_data("hostKey", host_key)
        .with_data("hostVersion", host_version)
        .with_data("hostRelease", host_release)
}

fn failure_payload(
    alert: Alert,
    key: &SlabKey,
    health: f64,
    object_ids: Option<&ObjectIds>,
    err: &dyn Display,
) -> Alert {
    let alert = alert
        .with_data("error", err.to_string())
        .with_data("health", health)
        .with_data("slabKey", key.to_string());
    match object_ids {
        Some(ids) => {
            let value = ids
                .iter()
                .map(|(bucket, names)| (bucket.clone(), Value::from(names.clone())))
                .collect::<serde_json::Map<_, _>>();
            alert.with_data("objectIDs", value)
        }
        None => alert,
    }
}
