//! # OTLP Export Client Demo
//!
//! Drives the export client against a simulated collector that is flaky,
//! throttles now and then, and sometimes rejects part of a batch.
//!
//! ## What it shows
//!
//! - Retries with jittered exponential backoff on `UNAVAILABLE`
//! - Server throttling via `RESOURCE_EXHAUSTED` with a retry delay
//! - Partial-success accounting surfaced as an error
//! - Many concurrent uploaders sharing one client
//! - A bounded `stop` once the uploaders are done
//!
//! ## Running
//!
//! ```bash
//! # Quick mode (4 uploaders, 10 batches each)
//! cargo run -p otlp_client --features demo --bin demo -- --quick
//!
//! # Full mode (8 uploaders, 40 batches each)
//! cargo run -p otlp_client --features demo --bin demo
//!
//! # See every retry
//! RUST_LOG=otlp_client=debug cargo run -p otlp_client --features demo --bin demo -- --verbose
//! ```

use anyhow::Context;
use otlp_client::{
    AttributeValue, Client, ClientConfig, EncodedBatch, ExportResponse, JsonEncoder, RetryConfig,
    Scope, SendOutcome, SpanKind, SpanRecord, SpanStatus, StatusCode, TraceExporter, Transport,
    TransportError, UploadMetrics, DURATION_BUCKETS_MS,
};
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// A collector stand-in with configurable failure modes.
struct SimulatedCollector {
    failure_rate: f64,
    throttle_rate: f64,
    partial_rate: f64,
    latency: Duration,
    round_trips: AtomicU64,
    accepted: AtomicU64,
}

impl SimulatedCollector {
    fn new(quick: bool) -> Self {
        Self {
            failure_rate: 0.2,
            throttle_rate: 0.05,
            partial_rate: 0.1,
            latency: if quick { Duration::from_millis(2) } else { Duration::from_millis(5) },
            round_trips: AtomicU64::new(0),
            accepted: AtomicU64::new(0),
        }
    }
}

impl Transport for SimulatedCollector {
    async fn send(&self, _scope: &Scope, batch: &EncodedBatch) -> SendOutcome {
        self.round_trips.fetch_add(1, Ordering::Relaxed);
        tokio::time::sleep(self.latency).await;

        let roll: f64 = rand::thread_rng().gen();
        if roll < self.failure_rate {
            return SendOutcome::err(TransportError::new(
                StatusCode::Unavailable,
                "collector unavailable",
            ));
        }
        if roll < self.failure_rate + self.throttle_rate {
            return SendOutcome::err(
                TransportError::new(StatusCode::ResourceExhausted, "slow down")
                    .with_retry_delay(Duration::from_millis(20)),
            );
        }
        if roll < self.failure_rate + self.throttle_rate + self.partial_rate {
            let rejected = batch.record_count.min(2);
            self.accepted
                .fetch_add(batch.record_count - rejected, Ordering::Relaxed);
            return SendOutcome::ok(ExportResponse::partial(
                i64::try_from(rejected).unwrap_or(i64::MAX),
                "span attributes exceed limits",
            ));
        }

        self.accepted.fetch_add(batch.record_count, Ordering::Relaxed);
        SendOutcome::ok(ExportResponse::default())
    }

    fn name(&self) -> &str {
        "simulated-collector"
    }
}

fn make_spans(uploader: usize, batch: usize, count: usize) -> Vec<SpanRecord> {
    let mut rng = rand::thread_rng();
    let trace_id = ((uploader as u128) << 64) | batch as u128;
    (0..count)
        .map(|i| {
            let mut span = SpanRecord::new(
                trace_id,
                (i + 1) as u64,
                format!("GET /api/items/{}", rng.gen_range(1..1000)),
                if i == 0 { SpanKind::Server } else { SpanKind::Client },
            )
            .with_parent(if i == 0 { 0 } else { 1 })
            .with_attribute("service.name", AttributeValue::String("demo".into()))
            .with_attribute("uploader", AttributeValue::Int(uploader as i64));
            span.finish(if rng.gen_bool(0.1) { SpanStatus::Error } else { SpanStatus::Ok });
            span
        })
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let verbose = args.contains(&"--verbose".to_string());
    let quick = args.contains(&"--quick".to_string());
    let (uploaders, batches_per_uploader) = if quick { (4, 10) } else { (8, 40) };

    println!("Demo Configuration:");
    println!("   Mode: {}", if quick { "quick" } else { "full" });
    println!("   Uploaders: {uploaders}");
    println!("   Batches per uploader: {batches_per_uploader}");
    println!();

    let retry = RetryConfig::default()
        .with_initial_interval(Duration::from_millis(10))
        .with_max_interval(Duration::from_millis(100))
        .with_max_elapsed_time(Duration::from_secs(2));
    let config = ClientConfig::from_env()
        .with_timeout(Duration::from_secs(3))
        .with_retry(retry);

    let collector = Arc::new(SimulatedCollector::new(quick));
    let metrics = Arc::new(UploadMetrics::new());
    let client = Arc::new(
        Client::builder(config)
            .with_transport(collector.clone())
            .with_observer(metrics.clone())
            .build()
            .context("building export client")?,
    );
    let exporter = Arc::new(TraceExporter::with_encoder(
        Arc::clone(&client),
        Arc::new(JsonEncoder::new().with_service_name("demo")),
    ));

    exporter
        .start(&Scope::with_timeout(Duration::from_secs(1)))
        .await
        .context("starting exporter")?;
    info!(endpoint = %client.config().endpoint, "exporter started");

    let started = Instant::now();
    let mut handles = Vec::with_capacity(uploaders);
    for uploader in 0..uploaders {
        let exporter = Arc::clone(&exporter);
        handles.push(tokio::spawn(async move {
            let mut failed = 0u32;
            for batch in 0..batches_per_uploader {
                let spans = make_spans(uploader, batch, 1 + batch % 8);
                if let Err(err) = exporter.export(&Scope::new(), &spans).await {
                    failed += 1;
                    if verbose {
                        warn!(uploader, batch, error = %err, "export failed");
                    }
                }
            }
            failed
        }));
    }

    let mut failed_batches = 0u32;
    for handle in handles {
        failed_batches += handle.await.context("uploader task panicked")?;
    }
    let elapsed = started.elapsed();

    let in_flight = client.in_flight();
    match exporter
        .shutdown(&Scope::with_timeout(Duration::from_millis(500)))
        .await
    {
        Ok(()) => info!(in_flight, "exporter stopped"),
        Err(err) => warn!(error = %err, "exporter stopped with error"),
    }

    println!();
    println!("Results ({elapsed:.2?})");
    println!("   Uploads:             {:>8}", metrics.uploads());
    println!("   Failed uploads:      {:>8}", metrics.upload_errors());
    println!("   Partial successes:   {:>8}", metrics.partial_successes());
    println!("   Failed batches seen: {:>8}", failed_batches);
    println!("   Records submitted:   {:>8}", metrics.records_submitted());
    println!("   Records succeeded:   {:>8}", metrics.records_succeeded());
    println!("   Records failed:      {:>8}", metrics.records_failed());
    println!(
        "   Collector accepted:  {:>8}",
        collector.accepted.load(Ordering::Relaxed)
    );
    println!(
        "   Round-trips:         {:>8}",
        collector.round_trips.load(Ordering::Relaxed)
    );
    println!();
    println!("Upload latency histogram:");
    let histogram = metrics.duration_histogram();
    for (i, count) in histogram.iter().enumerate() {
        let label = DURATION_BUCKETS_MS
            .get(i)
            .map_or_else(|| "   > 10s".to_string(), |ms| format!("<= {ms:>5}ms"));
        println!("   {label}  {count}");
    }

    Ok(())
}
