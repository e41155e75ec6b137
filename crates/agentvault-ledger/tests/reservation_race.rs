//! Concurrency tests for the ledger's conditional-write discipline.

use std::sync::Arc;
use std::thread;

use rust_decimal::Decimal;

use agentvault_ledger::Ledger;
use agentvault_types::transaction::dummy_transaction;
use agentvault_types::{TxStatus, WalletId};

/// Many threads race to move the same PENDING row to EXECUTING; exactly one
/// conditional transition may win.
#[test]
fn conditional_transition_has_one_winner() {
    let ledger = Arc::new(Ledger::new());
    let wallet_id = WalletId::new();
    let tx_id = ledger
        .insert(dummy_transaction(wallet_id, Decimal::from(100)))
        .unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let ledger = Arc::clone(&ledger);
            thread::spawn(move || {
                ledger
                    .transition(tx_id, &[TxStatus::Pending], TxStatus::Executing)
                    .is_ok()
            })
        })
        .collect();

    let wins = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|&won| won)
        .count();
    assert_eq!(wins, 1);
    assert_eq!(ledger.get(tx_id).unwrap().status, TxStatus::Executing);
}

/// Check-then-reserve sections from many threads never overcount: each
/// thread reads the running total and reserves on its own row inside one
/// guard, so the final total equals the sum of all reservations.
#[test]
fn reservations_are_atomic_under_contention() {
    let ledger = Arc::new(Ledger::new());
    let wallet_id = WalletId::new();

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let ledger = Arc::clone(&ledger);
            thread::spawn(move || {
                let amount = Decimal::from(i + 1);
                let tx = dummy_transaction(wallet_id, amount);
                let mut txn = ledger.begin();
                let before = txn.reserved_total(wallet_id);
                let tx_id = txn.insert(tx).unwrap();
                txn.reserve(tx_id, amount).unwrap();
                // Inside the guard the total must have grown by exactly
                // this reservation.
                assert_eq!(txn.reserved_total(wallet_id), before + amount);
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    let expected: Decimal = (1..=16).map(Decimal::from).sum();
    assert_eq!(ledger.reserved_total(wallet_id), expected);
}
