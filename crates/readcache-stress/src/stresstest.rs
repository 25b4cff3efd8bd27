use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use readcache::{Cache, CacheStats, metric};
use sketches_ddsketch::DDSketch;

use crate::config::StressConfig;
use crate::workloads::{Workload, WorkloadsConfig};

struct WorkloadResult {
    concurrency: usize,
    keys: usize,
    durations: DDSketch,
    errors: usize,
    stats: CacheStats,
}

pub fn perform_stresstest(
    config: &StressConfig,
    workloads: WorkloadsConfig,
    duration: Duration,
) -> Result<()> {
    // initialize workloads, each with its own cache
    let workloads = workloads
        .workloads
        .into_iter()
        .enumerate()
        .map(|(i, workload)| {
            let cache_config = readcache::Config {
                name: format!("{}-{i}", config.cache.name),
                ..config.cache.clone()
            };
            let cache = Cache::with_fetcher(cache_config, workload.upstream())
                .with_context(|| format!("failed to create cache for workload {i}"))?;
            Ok((workload, cache))
        })
        .collect::<Result<Vec<_>>>()?;

    // warmup: run each workload once to make sure caches are warm
    {
        let start = Instant::now();

        let errors = warm_up(&workloads);

        println!("Warmup: {:?} ({errors} errors)", start.elapsed());
    };
    println!();

    // run the workloads concurrently
    let deadline = Instant::now() + duration;
    let results = thread::scope(|s| {
        let tasks: Vec<_> = workloads
            .iter()
            .map(|(workload, cache)| s.spawn(move || run_workload(workload, cache, deadline)))
            .collect();

        tasks
            .into_iter()
            .map(|task| {
                task.join()
                    .map_err(|_| anyhow!("stresstest worker panicked"))
                    .and_then(|result| result)
            })
            .collect::<Result<Vec<_>>>()
    })?;

    for (i, result) in results.into_iter().enumerate() {
        let WorkloadResult {
            concurrency,
            keys,
            durations,
            errors,
            stats,
        } = result;

        let ops = durations.count();
        let ops_ps = ops as f32 / duration.as_secs_f32();
        println!(
            "Workload {i} (concurrency: {concurrency}, keys: {keys}): {ops} operations, {ops_ps:.2} ops/s, {errors} errors"
        );

        if let Some(sum) = durations.sum().filter(|_| ops > 0) {
            let avg = Duration::from_secs_f64(sum / ops as f64);
            let p50 = quantile(&durations, 0.5)?;
            let p90 = quantile(&durations, 0.9)?;
            let p99 = quantile(&durations, 0.99)?;
            println!("  avg: {avg:.2?}; p50: {p50:.2?}; p90: {p90:.2?}; p99: {p99:.2?}");
        }

        println!(
            "  fetches: {}; hits: {}; coalesced: {}; fetch errors: {}; purged: {}; entries: {}",
            stats.fetches, stats.hits, stats.coalesced, stats.fetch_errors, stats.purged, stats.entries
        );
    }

    Ok(())
}

/// Runs one `get` per workload concurrently, returning how many of them failed.
fn warm_up(workloads: &[(Workload, Cache<String>)]) -> usize {
    thread::scope(|s| {
        let tasks: Vec<_> = workloads
            .iter()
            .map(|(workload, cache)| {
                s.spawn(move || {
                    let key = workload.random_key();
                    match cache.get(&key) {
                        Ok(_) => false,
                        Err(err) => {
                            tracing::debug!(key = %key, error = %err, "warmup get failed");
                            true
                        }
                    }
                })
            })
            .collect();

        tasks
            .into_iter()
            .map(|task| task.join())
            .filter(|result| !matches!(result, Ok(false)))
            .count()
    })
}

/// Hammers `cache` from `workload.concurrency` threads until `deadline`.
fn run_workload(
    workload: &Workload,
    cache: &Cache<String>,
    deadline: Instant,
) -> Result<WorkloadResult> {
    let workers = thread::scope(|s| {
        let workers: Vec<_> = (0..workload.concurrency)
            .map(|_| {
                s.spawn(|| {
                    let mut durations = DDSketch::default();
                    let mut errors = 0usize;
                    while Instant::now() < deadline {
                        let key = workload.random_key();
                        let task_start = Instant::now();
                        if let Err(err) = cache.get(&key) {
                            tracing::debug!(key = %key, error = %err, "get failed");
                            errors += 1;
                        }
                        durations.add(task_start.elapsed().as_secs_f64());
                    }
                    (durations, errors)
                })
            })
            .collect();

        workers
            .into_iter()
            .map(|worker| worker.join().map_err(|_| anyhow!("cache worker panicked")))
            .collect::<Result<Vec<_>>>()
    })?;

    let mut durations = DDSketch::default();
    let mut errors = 0;
    for (worker_durations, worker_errors) in workers {
        durations
            .merge(&worker_durations)
            .map_err(|err| anyhow!("failed to merge latency sketches: {err:?}"))?;
        errors += worker_errors;
    }

    let stats = cache.stats();
    metric!(gauge("caches.entries") = stats.entries as u64, "cache" => cache.name());

    Ok(WorkloadResult {
        concurrency: workload.concurrency,
        keys: workload.keys,
        durations,
        errors,
        stats,
    })
}

fn quantile(durations: &DDSketch, q: f64) -> Result<Duration> {
    let value = durations
        .quantile(q)
        .map_err(|err| anyhow!("invalid quantile {q}: {err:?}"))?
        .unwrap_or_default();
    Ok(Duration::from_secs_f64(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workload(error_rate: f64) -> (Workload, Cache<String>) {
        let workload = Workload {
            concurrency: 1,
            keys: 4,
            ttl: Duration::from_secs(60),
            fetch_latency: Duration::ZERO,
            error_rate,
        };
        let cache = Cache::with_fetcher(readcache::Config::default(), workload.upstream()).unwrap();
        (workload, cache)
    }

    #[test]
    fn test_warm_up_counts_errors() {
        let workloads = vec![workload(1.0), workload(0.0), workload(1.0)];
        assert_eq!(warm_up(&workloads), 2);

        let (_, reliable) = &workloads[1];
        assert_eq!(reliable.len(), 1);
        assert_eq!(workloads[0].1.stats().fetch_errors, 1);
    }
}
