use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context};
use clap::Parser;
use memq_core::{Outcome, QToken, QueueTable, Qd, ScatterGatherArray, Segment};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Drives one memory queue with a concurrent producer and consumer
#[derive(Parser)]
struct Opts {
    /// Values pushed by the producer and popped by the consumer
    #[arg(short, long, default_value = "1000")]
    count: usize,
    /// Segments per scatter-gather value
    #[arg(long, default_value = "1")]
    segments: usize,
    /// Bytes per segment; the first eight carry the sequence number
    #[arg(long, default_value = "64")]
    segment_len: usize,
    /// Print the report as JSON
    #[arg(long)]
    json: bool,
    /// Log filter directive, overrides RUST_LOG
    #[arg(long)]
    log: Option<String>,
}

#[derive(Serialize)]
struct Report {
    qd: Qd,
    count: usize,
    bytes_per_value: usize,
    popped_in_order: bool,
    elapsed_us: u128,
}

fn init_tracing(directive: Option<&str>) {
    let filter = match directive {
        Some(directive) => EnvFilter::new(directive),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("memq=info")),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(filter)
        .init();
}

fn make_value(seq: u64, segments: usize, segment_len: usize) -> ScatterGatherArray {
    let segments = (0..segments)
        .map(|_| {
            let mut buf = vec![0u8; segment_len.max(8)];
            buf[..8].copy_from_slice(&seq.to_le_bytes());
            Segment::from(buf)
        })
        .collect();
    ScatterGatherArray::new(segments)
}

fn sequence_of(sga: &ScatterGatherArray) -> anyhow::Result<u64> {
    let head = sga
        .segments
        .first()
        .and_then(|segment| segment.buf.get(..8))
        .context("popped value carries no sequence number")?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(head);
    Ok(u64::from_le_bytes(raw))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    init_tracing(opts.log.as_deref());

    if opts.segments == 0 {
        bail!("--segments must be at least 1");
    }

    let table = Arc::new(QueueTable::new());
    let qd = table.memory_queue()?;
    info!(qd, count = opts.count, "queue ready");

    let started = Instant::now();

    let producer = {
        let table = table.clone();
        let (count, segments, segment_len) = (opts.count, opts.segments, opts.segment_len);
        tokio::spawn(async move {
            let mut tokens: Vec<QToken> = Vec::with_capacity(count);
            for seq in 0..count as u64 {
                tokens.push(table.push(qd, make_value(seq, segments, segment_len))?);
            }
            for qt in tokens {
                table.wait(qd, qt).await?.into_result()?;
            }
            anyhow::Ok(())
        })
    };

    let consumer = {
        let table = table.clone();
        let count = opts.count;
        tokio::spawn(async move {
            let tokens: Vec<QToken> = (0..count)
                .map(|_| table.pop(qd))
                .collect::<Result<_, _>>()?;
            let mut sequence = Vec::with_capacity(count);
            for qt in tokens {
                match table.wait(qd, qt).await?.outcome {
                    Outcome::Popped(sga) => sequence.push(sequence_of(&sga)?),
                    other => bail!("pop {} finished with {:?}", qt, other),
                }
            }
            anyhow::Ok(sequence)
        })
    };

    producer.await??;
    let sequence = consumer.await??;
    let elapsed_us = started.elapsed().as_micros();

    let mut seen: HashMap<u64, usize> = HashMap::new();
    for seq in &sequence {
        *seen.entry(*seq).or_default() += 1;
    }
    if seen.len() != opts.count || seen.values().any(|n| *n != 1) {
        bail!("popped values do not match pushed values");
    }

    let report = Report {
        qd,
        count: opts.count,
        bytes_per_value: opts.segments * opts.segment_len.max(8),
        popped_in_order: sequence.windows(2).all(|w| w[0] < w[1]),
        elapsed_us,
    };
    table.close(qd)?;

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "queue {}: moved {} values of {} bytes in {} us (in order: {})",
            report.qd, report.count, report.bytes_per_value, report.elapsed_us, report.popped_in_order
        );
    }

    Ok(())
}
