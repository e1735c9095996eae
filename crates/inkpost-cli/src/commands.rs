use std::path::Path;

use anyhow::{anyhow, bail, Context};
use chrono::Duration;
use colored::Colorize;
use inkpost_billing::BillingConfig;
use inkpost_ledger::{
    AuditFilter, InMemoryLedger, JournalSnapshot, JournalValidator, LedgerReader,
    ProjectionBuilder, Reconciler, ReplayEngine, ValidationReport,
};
use serde_json::json;

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let format = cli.format;
    let verbose = cli.verbose;
    match cli.command {
        Command::Verify(args) => cmd_verify(args, format, verbose),
        Command::Replay(args) => cmd_replay(args, format),
        Command::Reconcile(args) => cmd_reconcile(args, format, verbose),
        Command::Audit(args) => cmd_audit(args, format),
        Command::Config(args) => cmd_config(args, format),
    }
}

fn load(path: &Path) -> anyhow::Result<(JournalSnapshot, InMemoryLedger)> {
    let snapshot = JournalSnapshot::read_from(path)
        .with_context(|| format!("reading journal {}", path.display()))?;
    tracing::debug!(
        entries = snapshot.entries.len(),
        exported_at = %snapshot.exported_at,
        "journal snapshot loaded"
    );
    let ledger = InMemoryLedger::from_snapshot(snapshot.clone())?;
    Ok((snapshot, ledger))
}

fn cmd_verify(args: VerifyArgs, format: OutputFormat, verbose: bool) -> anyhow::Result<()> {
    let (_, ledger) = load(&args.journal)?;
    let reports = JournalValidator::validate_all(&ledger)?;
    let mut replay_mismatches = Vec::new();
    for report in &reports {
        if !ReplayEngine::verify_against_balance(&ledger, report.account)? {
            replay_mismatches.push(report.account);
        }
    }
    let failed = reports.iter().filter(|r| !r.is_valid()).count();

    match format {
        OutputFormat::Json => {
            let accounts: Vec<_> = reports.iter().map(report_json).collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "accounts": accounts,
                    "invalid": failed,
                    "replay_mismatches": replay_mismatches
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>(),
                }))?
            );
        }
        OutputFormat::Text => {
            for report in &reports {
                let mark = if report.is_valid() {
                    "✓".green().bold()
                } else {
                    "✗".red().bold()
                };
                println!(
                    "{} {}  {} entries",
                    mark,
                    report.account.to_string().cyan(),
                    report.entry_count
                );
                if verbose || !report.is_valid() {
                    for violation in &report.violations {
                        println!(
                            "    {} #{} {:?}: {}",
                            "!".red(),
                            violation.seq,
                            violation.kind,
                            violation.description
                        );
                    }
                }
            }
            for account in &replay_mismatches {
                println!(
                    "  {} replay of {} disagrees with the stored balance",
                    "!".red(),
                    account.to_string().cyan()
                );
            }
            if failed == 0 && replay_mismatches.is_empty() {
                println!(
                    "{} Journal verified: {} accounts, integrity {}",
                    "✓".green().bold(),
                    reports.len().to_string().bold(),
                    "intact".green()
                );
            }
        }
    }

    if failed > 0 || !replay_mismatches.is_empty() {
        bail!(
            "journal verification failed: {failed} invalid accounts, {} replay mismatches",
            replay_mismatches.len()
        );
    }
    Ok(())
}

fn report_json(report: &ValidationReport) -> serde_json::Value {
    json!({
        "account": report.account.to_string(),
        "entries": report.entry_count,
        "valid": report.is_valid(),
        "hash_chain_valid": report.hash_chain_valid,
        "sequence_monotonic": report.sequence_monotonic,
        "arithmetic_valid": report.arithmetic_valid,
        "balances_linked": report.balances_linked,
        "matches_balance": report.matches_balance,
        "violations": report.violations.iter().map(|v| json!({
            "seq": v.seq,
            "kind": format!("{:?}", v.kind),
            "description": v.description,
        })).collect::<Vec<_>>(),
    })
}

fn cmd_replay(args: ReplayArgs, format: OutputFormat) -> anyhow::Result<()> {
    let (_, ledger) = load(&args.journal)?;
    let accounts = match args.account {
        Some(account) => vec![account],
        None => ledger.accounts()?,
    };

    let mut results = Vec::with_capacity(accounts.len());
    for account in accounts {
        let result = match args.until_seq {
            Some(seq) => ReplayEngine::replay_until(&ledger, account, seq)?,
            None => ReplayEngine::replay_account(&ledger, account)?,
        };
        results.push(result);
    }

    match format {
        OutputFormat::Json => {
            let rows: Vec<_> = results
                .iter()
                .map(|r| {
                    json!({
                        "account": r.account.to_string(),
                        "credits_remaining": r.credits_remaining,
                        "credits_total": r.credits_total,
                        "applied_entries": r.applied_entries,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        OutputFormat::Text => {
            for r in &results {
                println!(
                    "{}  remaining {}  total {}  ({} entries)",
                    r.account.to_string().cyan(),
                    r.credits_remaining.to_string().bold(),
                    r.credits_total,
                    r.applied_entries
                );
            }
            println!("{} Replay complete.", "✓".green().bold());
        }
    }
    Ok(())
}

fn cmd_reconcile(args: ReconcileArgs, format: OutputFormat, verbose: bool) -> anyhow::Result<()> {
    let (snapshot, ledger) = load(&args.journal)?;
    let cutoff = Duration::try_minutes(args.grace_minutes)
        .and_then(|grace| snapshot.exported_at.checked_sub_signed(grace))
        .ok_or_else(|| anyhow!("grace period of {} minutes is out of range", args.grace_minutes))?;
    let report = Reconciler::reconcile(&ledger, cutoff)?;

    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "cutoff": cutoff.to_rfc3339(),
                    "debits_checked": report.debits_checked,
                    "delivered": report.delivered,
                    "refunded": report.refunded,
                    "in_flight": report.in_flight,
                    "outstanding": report.outstanding.iter().map(|d| json!({
                        "account": d.account.to_string(),
                        "entry": d.entry.to_string(),
                        "correlation": d.correlation.to_string(),
                        "amount": d.amount,
                        "debited_at": d.debited_at.to_rfc3339(),
                    })).collect::<Vec<_>>(),
                    "orphan_refunds": report.orphan_refunds.iter().map(|r| json!({
                        "account": r.account.to_string(),
                        "entry": r.entry.to_string(),
                        "correlation": r.correlation.as_ref().map(ToString::to_string),
                        "amount": r.amount,
                    })).collect::<Vec<_>>(),
                }))?
            );
        }
        OutputFormat::Text => {
            println!(
                "Debits checked: {}  delivered {}  refunded {}  in flight {}",
                report.debits_checked.to_string().bold(),
                report.delivered.to_string().green(),
                report.refunded.to_string().yellow(),
                report.in_flight
            );
            for debit in &report.outstanding {
                println!(
                    "  {} {} {} credits at {} ({})",
                    "outstanding:".red(),
                    debit.account.to_string().cyan(),
                    debit.amount,
                    debit.debited_at.to_rfc3339(),
                    debit.correlation
                );
            }
            for refund in &report.orphan_refunds {
                let correlation = refund
                    .correlation
                    .as_ref()
                    .map_or_else(|| "uncorrelated".to_string(), ToString::to_string);
                println!(
                    "  {} {} {} credits ({})",
                    "orphan refund:".red(),
                    refund.account.to_string().cyan(),
                    refund.amount,
                    correlation
                );
            }
            if verbose {
                println!("  cutoff: {}", cutoff.to_rfc3339().dimmed());
            }
            if report.is_clean() {
                println!("{} Every debit is settled.", "✓".green().bold());
            }
        }
    }

    if !report.is_clean() {
        bail!(
            "{} outstanding debits, {} orphan refunds",
            report.outstanding.len(),
            report.orphan_refunds.len()
        );
    }
    Ok(())
}

fn cmd_audit(args: AuditArgs, format: OutputFormat) -> anyhow::Result<()> {
    let (_, ledger) = load(&args.journal)?;
    let filter = AuditFilter {
        account: args.account,
        correlation: args.correlation,
        since: args.since,
        until: args.until,
    };
    let rows = ProjectionBuilder::audit_trail(&ledger, &filter)?;

    match format {
        OutputFormat::Json => {
            let rows: Vec<_> = rows
                .iter()
                .map(|row| {
                    json!({
                        "entry": row.entry.to_string(),
                        "account": row.account.to_string(),
                        "seq": row.seq,
                        "created_at": row.created_at.to_rfc3339(),
                        "kind": row.kind.to_string(),
                        "reason": row.reason.to_string(),
                        "amount": row.amount,
                        "balance_after": row.balance_after,
                        "correlation": row.correlation.as_ref().map(ToString::to_string),
                        "annotations": row.annotations,
                        "hash": row.hash,
                        "summary": row.summary,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        OutputFormat::Text => {
            if rows.is_empty() {
                println!("Audit trail: no entries.");
            }
            for row in &rows {
                let amount = if row.amount < 0 {
                    row.amount.to_string().red()
                } else {
                    format!("+{}", row.amount).green()
                };
                println!(
                    "{} {} #{:<4} {} {:>6} -> {:<6} {}",
                    row.created_at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
                    row.account.to_string().cyan(),
                    row.seq,
                    row.hash.yellow(),
                    amount,
                    row.balance_after,
                    row.summary
                );
            }
        }
    }
    Ok(())
}

fn cmd_config(args: ConfigArgs, format: OutputFormat) -> anyhow::Result<()> {
    let config = match &args.path {
        Some(path) => BillingConfig::load(path)?,
        None => BillingConfig::default(),
    };
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&config)?),
        OutputFormat::Text => print!("{}", config.to_toml_string()?),
    }
    Ok(())
}
