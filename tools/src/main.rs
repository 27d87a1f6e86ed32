//! ledger-runner: headless driver for the referral commission ledger.
//!
//! Usage:
//!   ledger-runner --seed 12345 --orders 400 --db ledger.db
//!   ledger-runner --db ledger.db --ipc-mode < signals.jsonl

use anyhow::Result;
use chrono::{DateTime, Utc};
use referral_ledger_core::{
    config::PolicyConfig,
    engine::{FinalizeOutcome, LedgerEngine},
    ledger::ReversalReason,
    notification::LogSink,
    order::FinalizedOrder,
    policy::PolicyStore,
    referrer::{ContactIdentity, Referrer},
    reversal::ReversalOutcome,
    store::LedgerStore,
    workload::{self, Workload, WorkloadConfig},
};
use serde_json::{json, Value};
use std::env;
use std::io::{self, BufRead, Write};
use std::sync::Arc;

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcCommand {
    GetState,
    Enroll {
        #[serde(flatten)]
        contact: ContactIdentity,
        #[serde(default)]
        at: Option<DateTime<Utc>>,
    },
    Approve {
        referrer_id: String,
    },
    OrderFinalized {
        order: FinalizedOrder,
    },
    OrderReversed {
        order_id: String,
        reason: ReversalReason,
        #[serde(default)]
        at: Option<DateTime<Utc>>,
    },
    RecordPayouts {
        #[serde(default)]
        at: Option<DateTime<Utc>>,
    },
    FraudSweep {
        #[serde(default)]
        at: Option<DateTime<Utc>>,
    },
    Quit,
}

#[derive(serde::Serialize)]
struct LedgerState {
    referrers: Vec<Referrer>,
    orders: i64,
    ledger_events: i64,
    parked_reversals: i64,
    unreconciled: Vec<String>,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let seed = parse_arg(&args, "--seed", 42u64);
    let orders = parse_arg(&args, "--orders", 400usize);
    let referrers = parse_arg(&args, "--referrers", 8usize);
    let ipc_mode = args.iter().any(|a| a == "--ipc-mode");
    let db = args
        .windows(2)
        .find(|w| w[0] == "--db")
        .map(|w| w[1].as_str())
        .unwrap_or(":memory:");
    let data_dir = args
        .windows(2)
        .find(|w| w[0] == "--data-dir")
        .map(|w| w[1].as_str())
        .unwrap_or("./data");

    if !ipc_mode {
        println!("ledger-runner");
        println!("  seed:      {seed}");
        println!("  orders:    {orders}");
        println!("  referrers: {referrers}");
        println!("  db:        {db}");
        println!("  data_dir:  {data_dir}");
        println!();
    }

    let store = LedgerStore::open(db)?;
    store.migrate()?;

    let config = PolicyConfig::load(data_dir)?;
    let policy = Arc::new(PolicyStore::empty());
    let snapshot = policy.publish_recorded(config, &store, Utc::now())?;
    log::info!("Running with policy version {}", snapshot.version);

    let engine = LedgerEngine::new(store, policy, Arc::new(LogSink));

    if ipc_mode {
        run_ipc_loop(&engine)?;
    } else {
        let workload = Workload::generate(
            &WorkloadConfig {
                orders,
                referrers,
                ..WorkloadConfig::default()
            },
            seed,
        );
        let summary = workload::drive(&engine, &workload)?;
        let end = workload
            .signals
            .last()
            .map(|s| s.at())
            .unwrap_or_else(Utc::now);
        let flagged = engine
            .fraud_sweep(end)?
            .iter()
            .filter(|a| a.is_suspect)
            .count();
        print_summary(&engine, &summary, flagged)?;
    }

    Ok(())
}

fn run_ipc_loop(engine: &LedgerEngine) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut handle = stdin.lock();
    let mut buffer = String::new();

    loop {
        buffer.clear();
        let bytes_read = handle.read_line(&mut buffer)?;
        if bytes_read == 0 {
            break; // EOF
        }
        if buffer.trim().is_empty() {
            continue;
        }

        let cmd: IpcCommand = match serde_json::from_str(&buffer) {
            Ok(c) => c,
            Err(e) => {
                writeln!(stdout, "{}", json!({ "error": e.to_string() }))?;
                stdout.flush()?;
                continue;
            }
        };
        if matches!(cmd, IpcCommand::Quit) {
            break;
        }

        // Engine errors are answered on the wire; only I/O ends the loop.
        let reply = match handle_command(engine, cmd) {
            Ok(v) => json!({ "ok": v }),
            Err(e) => json!({ "error": e.to_string() }),
        };
        writeln!(stdout, "{reply}")?;
        stdout.flush()?;
    }
    Ok(())
}

fn handle_command(engine: &LedgerEngine, cmd: IpcCommand) -> Result<Value> {
    let value = match cmd {
        IpcCommand::GetState => serde_json::to_value(build_state(engine)?)?,
        IpcCommand::Enroll { contact, at } => {
            serde_json::to_value(engine.enroll(&contact, at.unwrap_or_else(Utc::now))?)?
        }
        IpcCommand::Approve { referrer_id } => serde_json::to_value(engine.approve(&referrer_id)?)?,
        IpcCommand::OrderFinalized { order } => finalize_reply(&engine.on_order_finalized(&order)?),
        IpcCommand::OrderReversed {
            order_id,
            reason,
            at,
        } => reversal_reply(&engine.on_order_reversed(
            &order_id,
            reason,
            at.unwrap_or_else(Utc::now),
        )?),
        IpcCommand::RecordPayouts { at } => {
            serde_json::to_value(engine.record_payouts(at.unwrap_or_else(Utc::now))?)?
        }
        IpcCommand::FraudSweep { at } => {
            serde_json::to_value(engine.fraud_sweep(at.unwrap_or_else(Utc::now))?)?
        }
        IpcCommand::Quit => Value::Null,
    };
    Ok(value)
}

fn finalize_reply(outcome: &FinalizeOutcome) -> Value {
    match outcome {
        FinalizeOutcome::Commissioned { event, progress } => json!({
            "outcome": "commissioned",
            "event": event,
            "progress": progress,
        }),
        FinalizeOutcome::AlreadyProcessed { outcome, event } => json!({
            "outcome": "already_processed",
            "first_outcome": outcome,
            "event": event,
        }),
        FinalizeOutcome::OutsideValidityWindow { referrer_id } => json!({
            "outcome": "outside_validity_window",
            "referrer_id": referrer_id,
        }),
        FinalizeOutcome::NoCommission {
            referrer_id,
            reason,
        } => json!({
            "outcome": "no_commission",
            "referrer_id": referrer_id,
            "reason": reason,
        }),
        FinalizeOutcome::NoReferral => json!({ "outcome": "no_referral" }),
    }
}

fn reversal_reply(outcome: &ReversalOutcome) -> Value {
    match outcome {
        ReversalOutcome::Reversed(r) => json!({
            "outcome": "reversed",
            "original": r.original,
            "reversal": r.reversal,
            "excess": r.excess,
        }),
        ReversalOutcome::AlreadyReversed(original) => json!({
            "outcome": "already_reversed",
            "original": original,
        }),
        ReversalOutcome::NoOp => json!({ "outcome": "no_op" }),
        ReversalOutcome::Deferred => json!({ "outcome": "deferred" }),
    }
}

fn build_state(engine: &LedgerEngine) -> Result<LedgerState> {
    let unreconciled = engine
        .reconcile_all()?
        .into_iter()
        .filter(|r| !r.is_clean())
        .map(|r| r.referrer_id)
        .collect();
    Ok(LedgerState {
        referrers: engine.store.all_referrers()?,
        orders: engine.store.order_count()?,
        ledger_events: engine.store.ledger_event_count()?,
        parked_reversals: engine.store.parked_reversal_count()?,
        unreconciled,
    })
}

fn print_summary(
    engine: &LedgerEngine,
    summary: &workload::WorkloadSummary,
    flagged: usize,
) -> Result<()> {
    println!("=== RUN SUMMARY ===");
    println!("  referrers:        {}", summary.referrers);
    println!("  order signals:    {}", summary.orders_seen);
    println!("  commissioned:     {}", summary.commissioned);
    println!("  redeliveries:     {}", summary.already_processed);
    println!("  no referral:      {}", summary.no_referral);
    println!("  no commission:    {}", summary.no_commission + summary.outside_window);
    println!("  invalid codes:    {}", summary.invalid_codes);
    println!("  self referrals:   {}", summary.self_referrals);
    println!("  reversed:         {}", summary.reversed);
    println!("  deferred:         {}", summary.deferred);
    println!("  payouts:          {} ({} paid)", summary.payouts, summary.paid_out);
    println!("  fraud suspects:   {flagged}");
    println!("  ledger events:    {}", engine.store.ledger_event_count()?);
    println!("  parked reversals: {}", engine.store.parked_reversal_count()?);

    println!();
    println!("=== RECONCILIATION ===");
    let reports = engine.reconcile_all()?;
    for r in &reports {
        println!(
            "  {} | unpaid {:>10} | paid {:>10} | clawback {:>8} | ledger {:>10} | {}",
            r.referrer_id,
            r.balances.unpaid,
            r.balances.paid,
            r.balances.clawback_due,
            r.ledger_total,
            if r.is_clean() { "ok" } else { "MISMATCH" }
        );
    }
    let dirty = reports.iter().filter(|r| !r.is_clean()).count();
    if dirty > 0 {
        anyhow::bail!("{dirty} referrer(s) failed reconciliation");
    }
    Ok(())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
