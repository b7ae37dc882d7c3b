//! Shared helpers for vault integration tests.

#![allow(dead_code)]

use tracing_subscriber::EnvFilter;
use tresor_crypto::{Normalization, SessionKeys};
use tresor_vault::{FieldVault, VaultConfig};

pub const USER: &str = "user-42";
pub const PASSWORD: &str = "Secr3t!Pass";
pub const IBAN: &str = "FR7630001007941234567890185";

/// Routes vault logs to the test harness. Set `RUST_LOG=tresor_vault=debug`
/// to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn memory_vault() -> FieldVault {
    init_tracing();
    FieldVault::open_in_memory(&VaultConfig::for_testing()).unwrap()
}

/// Registered user with `accounts` records, each holding a searchable IBAN,
/// a balance and a note.
pub fn seed_accounts(vault: &FieldVault, password: &str, accounts: usize) -> SessionKeys {
    vault.register(USER, password).unwrap();
    let keys = vault.unlock(USER, password).unwrap();
    for i in 0..accounts {
        let record = account_id(i);
        vault
            .put_field(&keys, USER, &record, "iban", &iban(i), Some(Normalization::Exact))
            .unwrap();
        vault
            .put_field(&keys, USER, &record, "balance", &format!("{}.50", 1000 + i), None)
            .unwrap();
        vault
            .put_field(&keys, USER, &record, "note", "joint account", None)
            .unwrap();
    }
    keys
}

pub fn account_id(i: usize) -> String {
    format!("account-{i:03}")
}

pub fn iban(i: usize) -> String {
    format!("FR76300010079412345678{i:05}")
}
