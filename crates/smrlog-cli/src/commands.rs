use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use anyhow::{bail, Context};
use colored::Colorize;
use rand::Rng;
use serde::Serialize;
use serde_json::{json, Value};
use smrlog_log::{InMemoryLog, SharedLog};
use smrlog_object::collections::{self, Counter, SmrMap};
use smrlog_object::{ObjectConfig, ObjectHandle, ObjectRuntime};
use smrlog_tx::{connect, TransactionManager};
use smrlog_types::{LogPayload, ReadBound, StreamId};
use tracing::debug;

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Command::Counter(args) => cmd_counter(args, config, cli.format),
        Command::Transfer(args) => cmd_transfer(args, config, cli.format),
        Command::Trace(args) => cmd_trace(args, config),
        Command::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<ObjectConfig> {
    let Some(path) = path else {
        return Ok(ObjectConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    Ok(ObjectConfig::from_toml(&text)?)
}

fn emit<R: Serialize>(format: OutputFormat, report: &R, text: impl FnOnce(&R)) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
        OutputFormat::Text => text(report),
    }
    Ok(())
}

#[derive(Serialize)]
struct CounterReport {
    expected: i64,
    value: i64,
    log_records: usize,
    reads: u64,
    stale_reads: u64,
}

fn cmd_counter(args: CounterArgs, config: ObjectConfig, format: OutputFormat) -> anyhow::Result<()> {
    let log = Arc::new(InMemoryLog::new());
    let (runtime, _) = connect(log.clone(), config);
    let table = Arc::new(collections::counter()?);
    let stream = StreamId::named("counter");
    let open = || runtime.open(stream, Arc::clone(&table));

    let done = Arc::new(AtomicBool::new(false));
    let readers: Vec<_> = (0..args.readers)
        .map(|_| -> anyhow::Result<_> {
            let handle: ObjectHandle<Counter> = open()?;
            let done = Arc::clone(&done);
            Ok(thread::spawn(move || -> anyhow::Result<(u64, u64)> {
                let (mut reads, mut stale, mut last) = (0u64, 0u64, 0i64);
                while !done.load(Ordering::Acquire) {
                    let value: i64 = handle.invoke_as(None, "get", vec![])?;
                    if value < last {
                        stale += 1;
                    }
                    last = value;
                    reads += 1;
                }
                Ok((reads, stale))
            }))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let writers: Vec<_> = (0..args.writers)
        .map(|_| -> anyhow::Result<_> {
            let handle: ObjectHandle<Counter> = open()?;
            let increments = args.increments;
            Ok(thread::spawn(move || -> anyhow::Result<()> {
                let mut last = 0;
                for _ in 0..increments {
                    let value: i64 = handle.invoke_as(None, "increment", vec![])?;
                    if value <= last {
                        bail!("increment returned {value} after {last}");
                    }
                    last = value;
                }
                Ok(())
            }))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    for w in writers {
        w.join().map_err(|_| anyhow::anyhow!("writer panicked"))??;
    }
    done.store(true, Ordering::Release);
    let (mut reads, mut stale_reads) = (0, 0);
    for r in readers {
        let (n, s) = r.join().map_err(|_| anyhow::anyhow!("reader panicked"))??;
        reads += n;
        stale_reads += s;
    }

    let fresh = open()?;
    let report = CounterReport {
        expected: (args.writers * args.increments) as i64,
        value: fresh.invoke_as(None, "get", vec![])?,
        log_records: log.len(),
        reads,
        stale_reads,
    };
    emit(format, &report, |r| {
        let mark = if r.value == r.expected && r.stale_reads == 0 {
            "✓".green().bold()
        } else {
            "✗".red().bold()
        };
        println!("{mark} counter = {} (expected {})", r.value.to_string().bold(), r.expected);
        println!("  Log records: {}", r.log_records);
        println!("  Reads: {} ({} stale)", r.reads, r.stale_reads);
    })?;
    if report.value != report.expected || report.stale_reads != 0 {
        bail!("counter diverged");
    }
    Ok(())
}

#[derive(Serialize)]
struct TransferReport {
    committed: usize,
    aborted: usize,
    declined: usize,
    balances: BTreeMap<String, i64>,
    total: i64,
    expected_total: i64,
}

fn account(i: usize) -> String {
    format!("acct-{i:02}")
}

fn balance(accounts: &ObjectHandle<SmrMap>, tx: Option<&smrlog_object::Transaction>, who: &str) -> anyhow::Result<i64> {
    let value: Option<i64> = accounts.invoke_as(tx, "get", vec![json!(who)])?;
    Ok(value.unwrap_or(0))
}

/// Move a random amount between two random accounts, retrying on conflict.
/// Returns `(committed, aborted_attempts)`; a transfer the source cannot
/// cover commits read-only and counts as not committed.
fn random_transfer(
    accounts: &ObjectHandle<SmrMap>,
    tm: &TransactionManager,
    n: usize,
) -> anyhow::Result<(bool, usize)> {
    let mut rng = rand::thread_rng();
    let from = account(rng.gen_range(0..n));
    let to = loop {
        let candidate = account(rng.gen_range(0..n));
        if candidate != from {
            break candidate;
        }
    };
    let amount: i64 = rng.gen_range(1..=20);

    let mut aborted = 0;
    loop {
        let tx = tm.begin();
        let a = balance(accounts, Some(&tx), &from)?;
        if a < amount {
            tm.commit(&tx)?;
            return Ok((false, aborted));
        }
        let b = balance(accounts, Some(&tx), &to)?;
        accounts.invoke(Some(&tx), "insert", vec![json!(from), json!(a - amount)])?;
        accounts.invoke(Some(&tx), "insert", vec![json!(to), json!(b + amount)])?;
        match tm.commit(&tx) {
            Ok(outcome) => {
                debug!(%from, %to, amount, ?outcome, "transfer committed");
                return Ok((true, aborted));
            }
            Err(e) if e.is_conflict() => aborted += 1,
            Err(e) => return Err(e.into()),
        }
    }
}

fn cmd_transfer(args: TransferArgs, config: ObjectConfig, format: OutputFormat) -> anyhow::Result<()> {
    if args.accounts < 2 {
        bail!("need at least two accounts");
    }
    let log: Arc<dyn SharedLog> = Arc::new(InMemoryLog::new());
    let (runtime, tm) = connect(log, config);
    let table = Arc::new(collections::map()?);
    let stream = StreamId::named("accounts");
    let open = |rt: &ObjectRuntime| rt.open(stream, Arc::clone(&table));

    let seed = open(&runtime)?;
    for i in 0..args.accounts {
        seed.invoke(None, "insert", vec![json!(account(i)), json!(args.balance)])?;
    }

    let workers: Vec<_> = (0..args.threads)
        .map(|_| -> anyhow::Result<_> {
            let accounts = open(&runtime)?;
            let tm = tm.clone();
            let (n, transfers) = (args.accounts, args.transfers);
            Ok(thread::spawn(move || -> anyhow::Result<(usize, usize, usize)> {
                let (mut committed, mut aborted, mut declined) = (0, 0, 0);
                for _ in 0..transfers {
                    let (ok, retries) = random_transfer(&accounts, &tm, n)?;
                    aborted += retries;
                    if ok {
                        committed += 1;
                    } else {
                        declined += 1;
                    }
                }
                Ok((committed, aborted, declined))
            }))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let (mut committed, mut aborted, mut declined) = (0, 0, 0);
    for w in workers {
        let (c, a, d) = w.join().map_err(|_| anyhow::anyhow!("worker panicked"))??;
        committed += c;
        aborted += a;
        declined += d;
    }

    let fresh = open(&runtime)?;
    let mut balances = BTreeMap::new();
    for i in 0..args.accounts {
        let name = account(i);
        balances.insert(name.clone(), balance(&fresh, None, &name)?);
    }
    let report = TransferReport {
        committed,
        aborted,
        declined,
        total: balances.values().sum(),
        expected_total: args.balance * args.accounts as i64,
        balances,
    };
    emit(format, &report, |r| {
        let mark = if r.total == r.expected_total {
            "✓".green().bold()
        } else {
            "✗".red().bold()
        };
        println!(
            "{mark} {} committed, {} aborted attempts, {} declined",
            r.committed.to_string().bold(),
            r.aborted.to_string().yellow(),
            r.declined
        );
        for (name, amount) in &r.balances {
            println!("  {}: {}", name.cyan(), amount);
        }
        println!("  Total: {} (expected {})", r.total, r.expected_total);
    })?;
    if report.total != report.expected_total {
        bail!("balances do not add up");
    }
    Ok(())
}

fn cmd_trace(args: TraceArgs, config: ObjectConfig) -> anyhow::Result<()> {
    let log = Arc::new(InMemoryLog::new());
    let runtime = ObjectRuntime::new(log.clone(), Arc::new(smrlog_object::CommitAll), config);
    let stream = StreamId::named("trace");
    let map = runtime.open(stream, Arc::new(collections::map()?))?;

    for put in &args.puts {
        let Some((key, value)) = put.split_once('=') else {
            bail!("expected key=value, got '{put}'");
        };
        let value: Value = serde_json::from_str(value).unwrap_or_else(|_| json!(value));
        let previous = map.invoke(None, "put", vec![json!(key), value])?;
        println!("{} put {key} (previous: {previous})", "✓".green());
    }

    println!("\nStream {}", stream.short_id().yellow());
    for record in log.read_stream(&stream, None, ReadBound::Tail)? {
        let line = match &record.payload {
            LogPayload::Update(entry) => format!(
                "{} {} {}",
                entry.operation.bold(),
                Value::Array(entry.arguments.clone()),
                format!("[{:?}]", entry.serializer).dimmed()
            ),
            LogPayload::Transaction(batch) => format!("batch {}", batch.transaction.short_id()),
            LogPayload::Hole => "hole".dimmed().to_string(),
        };
        println!("  {:>6}  {line}", record.position.to_string().dimmed());
    }

    let stats = map.stats();
    println!(
        "\nVersion {}: {} applied, {} failed, {} skipped",
        map.version()
            .map(|v| v.to_string())
            .unwrap_or_else(|| "-".into()),
        stats.applied,
        stats.failed,
        stats.skipped
    );
    Ok(())
}
