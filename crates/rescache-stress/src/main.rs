use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use futures::future::BoxFuture;
use humantime::parse_duration;
use serde::Deserialize;
use tokio::sync::Semaphore;

use rescache::{
    CacheConfig, CacheEntry, CacheError, CancellationToken, ResourceCache, ResourceRequest,
};

#[derive(Debug, Deserialize)]
struct WorkloadsConfig {
    workloads: Vec<Workload>,
}

/// One cache population to hammer.
#[derive(Debug, Deserialize)]
struct Workload {
    name: String,
    /// Number of independent caches the readers spread over.
    caches: usize,
    /// Number of concurrent readers.
    concurrency: usize,
    /// Simulated fetch latency.
    #[serde(with = "humantime_serde")]
    fetch_delay: Duration,
    /// Invalidate one of the caches this often.
    #[serde(default, with = "humantime_serde::option")]
    invalidate_interval: Option<Duration>,
    /// Fraction of fetches that fail, between 0.0 and 1.0.
    #[serde(default)]
    failure_rate: f64,
}

/// A fetch that sleeps for a configured delay and fails a configured fraction
/// of the time.
#[derive(Clone)]
struct SimulatedRequest {
    delay: Duration,
    failure_rate: f64,
    fetches: Arc<AtomicUsize>,
}

impl ResourceRequest for SimulatedRequest {
    type Resource = Arc<String>;

    fn fetch(&self, cancel: CancellationToken) -> BoxFuture<'_, CacheEntry<Arc<String>>> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        let delay = self.delay;
        let failure_rate = self.failure_rate;
        Box::pin(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(CacheError::Fetch("cancelled".into())),
            }
            if rand::random::<f64>() < failure_rate {
                return Err(CacheError::Fetch("simulated failure".into()));
            }
            Ok(Arc::new("simulated payload".to_string()))
        })
    }
}

#[derive(Default)]
struct Tally {
    ok: AtomicUsize,
    invalidated: AtomicUsize,
    failed: AtomicUsize,
}

/// Command line interface parser.
#[derive(Parser)]
struct Cli {
    /// Path to the workload definition file.
    #[arg(long, short, value_name = "FILE")]
    workloads: PathBuf,

    /// Duration of the stress test.
    #[arg(long, short, value_parser = parse_duration, default_value = "10s")]
    duration: Duration,

    /// Report cache metrics to this statsd address.
    #[arg(long, value_name = "HOST:PORT")]
    statsd: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // parse configs
    let workloads_file =
        std::fs::File::open(cli.workloads).context("failed to open workloads file")?;
    let workloads: WorkloadsConfig =
        serde_yaml::from_reader(workloads_file).context("failed to parse workloads YAML")?;
    for workload in &workloads.workloads {
        if workload.caches == 0 {
            anyhow::bail!("workload `{}` must define at least one cache", workload.name);
        }
    }

    tracing_subscriber::fmt::init();

    if let Some(statsd) = cli.statsd {
        rescache::metrics::configure_statsd("rescache.stress", statsd.as_str(), BTreeMap::new());
    }

    // initialize workloads: one set of caches per workload
    let workloads: Vec<_> = workloads
        .workloads
        .into_iter()
        .map(|workload| {
            let fetches = Arc::new(AtomicUsize::new(0));
            let request = SimulatedRequest {
                delay: workload.fetch_delay,
                failure_rate: workload.failure_rate,
                fetches: Arc::clone(&fetches),
            };
            let caches: Vec<_> = (0..workload.caches)
                .map(|i| {
                    let config = CacheConfig::named(format!("{}-{i}", workload.name));
                    ResourceCache::new(request.clone(), config)
                })
                .collect();
            (workload, caches, fetches)
        })
        .collect();

    // warmup: read each cache once to make sure the measured window starts hot
    {
        let start = Instant::now();

        let futures = workloads.iter().flat_map(|(_, caches, _)| {
            caches.iter().map(|cache| {
                let cache = cache.clone();
                tokio::spawn(async move {
                    cache.get().await.ok();
                })
            })
        });

        let _results = futures::future::join_all(futures).await;

        println!("Warmup: {:?}", start.elapsed());
    };
    println!();

    // run the workloads concurrently
    let mut tasks = Vec::with_capacity(workloads.len());
    for (workload, caches, fetches) in workloads.into_iter() {
        let start = Instant::now();
        let duration = cli.duration;
        let deadline = tokio::time::Instant::from_std(start + duration);

        let task = tokio::spawn(async move {
            let tally = Arc::new(Tally::default());
            let semaphore = Arc::new(Semaphore::new(workload.concurrency));

            let invalidator = workload.invalidate_interval.map(|interval| {
                let caches = caches.clone();
                tokio::spawn(async move {
                    let mut round = 0usize;
                    loop {
                        tokio::select! {
                            _ = tokio::time::sleep(interval) => {}
                            _ = tokio::time::sleep_until(deadline) => break,
                        }
                        caches[round % caches.len()].invalidate();
                        round += 1;
                    }
                })
            });

            // See <https://docs.rs/tokio/latest/tokio/time/struct.Sleep.html#examples>
            let sleep = tokio::time::sleep_until(deadline);
            tokio::pin!(sleep);

            loop {
                tokio::select! {
                    permit = semaphore.clone().acquire_owned() => {
                        let cache = caches[rand::random_range(0..caches.len())].clone();
                        let tally = Arc::clone(&tally);

                        tokio::spawn(async move {
                            match cache.get().await {
                                Ok(_) => tally.ok.fetch_add(1, Ordering::Relaxed),
                                Err(CacheError::Invalidated) => {
                                    tally.invalidated.fetch_add(1, Ordering::Relaxed)
                                }
                                Err(_) => tally.failed.fetch_add(1, Ordering::Relaxed),
                            };

                            drop(permit);
                        });
                    }
                    _ = &mut sleep => {
                        break;
                    }
                }
            }

            // by acquiring *all* the permits, we essentially wait for all outstanding reads to finish
            let _permits = semaphore.acquire_many(workload.concurrency as u32).await;
            if let Some(invalidator) = invalidator {
                invalidator.await.ok();
            }

            (workload, tally, fetches)
        });
        tasks.push(task);
    }

    let finished = futures::future::join_all(tasks).await;

    for task in finished.into_iter() {
        let (workload, tally, fetches) = task.unwrap();

        let ok = tally.ok.load(Ordering::Relaxed);
        let invalidated = tally.invalidated.load(Ordering::Relaxed);
        let failed = tally.failed.load(Ordering::Relaxed);
        let ops = ok + invalidated + failed;
        let ops_ps = ops as f32 / cli.duration.as_secs() as f32;
        println!(
            "Workload '{}' (concurrency: {}): {ops} reads, {ops_ps} reads/s",
            workload.name, workload.concurrency
        );
        println!(
            "  ok: {ok}, invalidated: {invalidated}, failed: {failed}, fetches: {}",
            fetches.load(Ordering::Relaxed)
        );
    }

    Ok(())
}
