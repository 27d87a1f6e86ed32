//! Referral commission ledger and attribution engine.
//!
//! Order finalized -> attribution -> commission -> ledger write -> tier progress.
//! Order reversed  -> reversal engine.
//! Fraud evaluation runs after each ledger write and as a sweep.

pub mod attribution;
pub mod audit;
pub mod commission;
pub mod config;
pub mod engine;
pub mod error;
pub mod fraud;
pub mod ledger;
pub mod notification;
pub mod notifier;
pub mod order;
pub mod payout;
pub mod policy;
pub mod reconcile;
pub mod referrer;
pub mod retry;
pub mod reversal;
pub mod rng;
pub mod store;
pub mod types;
pub mod workload;
