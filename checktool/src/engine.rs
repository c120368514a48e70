//! Evaluation of assertion specs against a backend.
//!
//! Specs are dispatched to a bounded pool of worker threads. A single
//! collector owns the result slots, so results come back in input order no
//! matter which worker finishes first. Two deadlines apply:
//!
//! - per assertion: an assertion still running after `assertion_timeout` is
//!   recorded as [`ErrorKind::Timeout`] and its late answer is discarded;
//! - per run: once `run_timeout` elapses, every assertion without a result is
//!   recorded as [`ErrorKind::Timeout`] and workers stop picking up new specs.
//!
//! Workers are detached: a probe stuck past its deadline cannot hold the run.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::judge::{self, Verdict};
use crate::core::spec::AssertionSpec;
use crate::core::types::{CheckResult, ErrorKind};
use crate::io::backend::{BackendError, HostBackend};

/// Upper bound for the automatic worker count.
pub const MAX_AUTO_WORKERS: usize = 8;

const FALLBACK_HORIZON: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Engine limits.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Worker threads; `0` picks one per available processor (capped at 8).
    pub workers: usize,
    pub assertion_timeout: Duration,
    pub run_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            assertion_timeout: Duration::from_secs(10),
            run_timeout: Duration::from_secs(600),
        }
    }
}

impl EngineConfig {
    /// Worker count actually used for `spec_count` specs.
    pub fn effective_workers(&self, spec_count: usize) -> usize {
        let requested = if self.workers == 0 {
            thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
                .min(MAX_AUTO_WORKERS)
        } else {
            self.workers
        };
        requested.clamp(1, spec_count.max(1))
    }
}

/// Evaluate one spec with the matching probe.
///
/// Backend failures become failed results; nothing here returns an error.
pub fn evaluate(spec: &AssertionSpec, backend: &dyn HostBackend) -> CheckResult {
    let verdict: Result<Verdict, BackendError> = match spec {
        AssertionSpec::PackageInstalled { name } => backend
            .package_info(name)
            .map(|info| judge::package_installed(name, &info)),
        AssertionSpec::UserExists { name } => backend
            .user_info(name)
            .map(|info| judge::user_exists(name, &info)),
        AssertionSpec::UserInGroup { user, group } => backend
            .user_info(user)
            .map(|info| judge::user_in_group(user, group, &info)),
        AssertionSpec::FileExists { path } => backend
            .stat_file(path)
            .map(|stat| judge::file_exists(path, &stat)),
        AssertionSpec::FileMode {
            path,
            expected_mode,
        } => backend
            .stat_file(path)
            .map(|stat| judge::file_mode(path, *expected_mode, &stat)),
        AssertionSpec::FileContains { path, substring } => backend
            .read_file(path)
            .map(|contents| judge::file_contains(path, substring, contents.as_deref())),
        AssertionSpec::CommandOutputContains { cmd, substring } => backend
            .run_command(cmd)
            .map(|output| judge::command_output_contains(substring, &output)),
    };

    match verdict {
        Ok(Verdict {
            passed: true,
            detail,
        }) => CheckResult::pass(spec.clone(), detail),
        Ok(Verdict {
            passed: false,
            detail,
        }) => CheckResult::fail(spec.clone(), ErrorKind::AssertionFailed, detail),
        Err(err) => {
            warn!(kind = %spec.kind(), target = %spec.target(), err = %err, "probe failed");
            CheckResult::fail(spec.clone(), err.kind(), err.to_string())
        }
    }
}

enum Event {
    Started { index: usize, at: Instant },
    Finished { index: usize, result: CheckResult },
}

/// Evaluate `specs` on a worker pool and return one result per spec, in input order.
///
/// Errors only when no worker thread could be started.
#[instrument(skip_all, fields(specs = specs.len()))]
pub fn run_checks(
    specs: &[AssertionSpec],
    backend: Arc<dyn HostBackend>,
    config: &EngineConfig,
) -> Result<Vec<CheckResult>> {
    if specs.is_empty() {
        return Ok(Vec::new());
    }
    let started = Instant::now();
    let run_deadline = deadline_after(started, config.run_timeout);
    let workers = config.effective_workers(specs.len());
    info!(workers, "evaluating assertions");

    let shared_specs: Arc<Vec<AssertionSpec>> = Arc::new(specs.to_vec());
    let next = Arc::new(AtomicUsize::new(0));
    let stop = Arc::new(AtomicBool::new(false));
    let (tx, rx) = mpsc::channel::<Event>();

    for worker in 0..workers {
        let specs = Arc::clone(&shared_specs);
        let next = Arc::clone(&next);
        let stop = Arc::clone(&stop);
        let backend = Arc::clone(&backend);
        let tx = tx.clone();
        thread::Builder::new()
            .name(format!("checktool-worker-{worker}"))
            .spawn(move || worker_loop(&specs, &next, &stop, backend.as_ref(), &tx))
            .with_context(|| format!("spawn worker {worker}"))?;
    }
    drop(tx);

    let mut slots: Vec<Option<CheckResult>> = vec![None; specs.len()];
    let mut in_flight: HashMap<usize, Instant> = HashMap::new();
    let mut remaining = specs.len();

    while remaining > 0 {
        let now = Instant::now();
        let next_deadline = in_flight
            .values()
            .map(|at| deadline_after(*at, config.assertion_timeout))
            .min()
            .map_or(run_deadline, |deadline| deadline.min(run_deadline));

        match rx.recv_timeout(next_deadline.saturating_duration_since(now)) {
            Ok(Event::Started { index, at }) => {
                in_flight.insert(index, at);
            }
            Ok(Event::Finished { index, result }) => {
                in_flight.remove(&index);
                if slots[index].is_none() {
                    debug!(index, passed = result.passed, "assertion finished");
                    slots[index] = Some(result);
                    remaining -= 1;
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                let now = Instant::now();
                if now >= run_deadline {
                    warn!(
                        remaining,
                        run_timeout_ms = config.run_timeout.as_millis() as u64,
                        "run timed out"
                    );
                    break;
                }
                let expired: Vec<usize> = in_flight
                    .iter()
                    .filter(|(_, at)| now >= deadline_after(**at, config.assertion_timeout))
                    .map(|(index, _)| *index)
                    .collect();
                for index in expired {
                    in_flight.remove(&index);
                    if slots[index].is_none() {
                        warn!(
                            index,
                            timeout_ms = config.assertion_timeout.as_millis() as u64,
                            "assertion timed out"
                        );
                        slots[index] = Some(CheckResult::fail(
                            specs[index].clone(),
                            ErrorKind::Timeout,
                            format!(
                                "assertion timed out after {:?}",
                                config.assertion_timeout
                            ),
                        ));
                        remaining -= 1;
                    }
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                warn!(remaining, "workers exited before reporting every result");
                break;
            }
        }
    }
    stop.store(true, Ordering::SeqCst);

    let run_timed_out = Instant::now() >= run_deadline;
    let results = slots
        .into_iter()
        .zip(specs)
        .map(|(slot, spec)| {
            slot.unwrap_or_else(|| {
                if run_timed_out {
                    CheckResult::fail(
                        spec.clone(),
                        ErrorKind::Timeout,
                        format!("run timed out after {:?}", config.run_timeout),
                    )
                } else {
                    CheckResult::fail(
                        spec.clone(),
                        ErrorKind::BackendUnavailable,
                        "evaluation aborted before producing a result",
                    )
                }
            })
        })
        .collect();
    debug!(elapsed_ms = started.elapsed().as_millis() as u64, "evaluation finished");
    Ok(results)
}

/// `at + timeout`, or a year out when that is not representable.
fn deadline_after(at: Instant, timeout: Duration) -> Instant {
    at.checked_add(timeout)
        .or_else(|| at.checked_add(FALLBACK_HORIZON))
        .unwrap_or(at)
}

fn worker_loop(
    specs: &[AssertionSpec],
    next: &AtomicUsize,
    stop: &AtomicBool,
    backend: &dyn HostBackend,
    tx: &mpsc::Sender<Event>,
) {
    loop {
        if stop.load(Ordering::SeqCst) {
            return;
        }
        let index = next.fetch_add(1, Ordering::SeqCst);
        let Some(spec) = specs.get(index) else {
            return;
        };
        if tx
            .send(Event::Started {
                index,
                at: Instant::now(),
            })
            .is_err()
        {
            return;
        }
        let result = evaluate(spec, backend);
        if tx.send(Event::Finished { index, result }).is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::shell::{ShellBackend, ShellOptions};
    use crate::io::target::Target;
    use crate::test_support::{
        FakeBackend, command_contains, file_contains, file_exists, file_mode, package,
        user_exists, user_in_group,
    };

    fn config(workers: usize) -> EngineConfig {
        EngineConfig {
            workers,
            assertion_timeout: Duration::from_secs(5),
            run_timeout: Duration::from_secs(30),
        }
    }

    #[test]
    fn evaluate_dispatches_each_kind() {
        let backend = FakeBackend::new()
            .with_package("git")
            .with_user("gpadmin", &["gpadmin", "wheel"])
            .with_file("/tmp/init_system.sh", 0o755)
            .with_file_contents("/etc/locale.conf", 0o644, "LANG=en_US.UTF-8\n")
            .with_command("locale -a | grep en_US.utf8", 0, "en_US.utf8\n");

        assert!(evaluate(&package("git"), &backend).passed);
        assert!(evaluate(&user_exists("gpadmin"), &backend).passed);
        assert!(evaluate(&file_exists("/etc/locale.conf"), &backend).passed);
        assert!(
            evaluate(
                &file_contains("/etc/locale.conf", "LANG=en_US.UTF-8"),
                &backend
            )
            .passed
        );
        assert!(evaluate(&user_in_group("gpadmin", "wheel"), &backend).passed);
        assert!(evaluate(&file_mode("/tmp/init_system.sh", 0o755), &backend).passed);
        assert!(
            evaluate(
                &command_contains("locale -a | grep en_US.utf8", "en_US.utf8"),
                &backend
            )
            .passed
        );

        let failed = evaluate(&package("bat"), &backend);
        assert!(!failed.passed);
        assert_eq!(failed.error, Some(ErrorKind::AssertionFailed));

        let no_user = evaluate(&user_exists("postgres"), &backend);
        assert!(!no_user.passed);
        let limits = file_exists("/etc/security/limits.d/90-cbdb-limits");
        assert!(!evaluate(&limits, &backend).passed);

        let wrong_locale = evaluate(
            &file_contains("/etc/locale.conf", "LANG=C.UTF-8"),
            &backend,
        );
        assert!(!wrong_locale.passed);
        assert_eq!(wrong_locale.error, Some(ErrorKind::AssertionFailed));
        assert!(wrong_locale.detail.contains("does not contain"));
    }

    #[test]
    fn backend_failure_is_recorded_not_raised() {
        let backend = FakeBackend::new().unavailable_package("git");
        let result = evaluate(&package("git"), &backend);
        assert!(!result.passed);
        assert_eq!(result.error, Some(ErrorKind::BackendUnavailable));
        assert!(result.detail.contains("connection reset"));
    }

    #[test]
    fn results_keep_input_order_under_concurrency() {
        let names: Vec<String> = (0..12).map(|i| format!("pkg-{i:02}")).collect();
        let mut backend = FakeBackend::new();
        for (i, name) in names.iter().enumerate() {
            backend = backend.with_package(name);
            // Early specs answer last.
            let delay = Duration::from_millis(((12 - i) * 5) as u64);
            backend = backend.with_delay(&format!("package:{name}"), delay);
        }
        let specs: Vec<AssertionSpec> = names.iter().map(|n| package(n)).collect();

        let results = run_checks(&specs, Arc::new(backend), &config(4)).expect("run");
        let order: Vec<String> = results.iter().map(|r| r.spec.target()).collect();
        assert_eq!(order, names);
        assert!(results.iter().all(|r| r.passed));
    }

    #[test]
    fn slow_assertion_times_out_without_blocking_others() {
        let backend = FakeBackend::new()
            .with_package("git")
            .with_package("slow")
            .with_delay("package:slow", Duration::from_secs(3));
        let specs = vec![package("slow"), package("git")];
        let config = EngineConfig {
            workers: 2,
            assertion_timeout: Duration::from_millis(200),
            run_timeout: Duration::from_secs(30),
        };

        let started = Instant::now();
        let results = run_checks(&specs, Arc::new(backend), &config).expect("run");
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(results[0].error, Some(ErrorKind::Timeout));
        assert!(results[1].passed);
    }

    #[test]
    fn run_timeout_marks_unfinished_assertions() {
        let backend = FakeBackend::new()
            .with_package("a")
            .with_package("b")
            .with_package("c")
            .with_delay("package:a", Duration::from_secs(3))
            .with_delay("package:b", Duration::from_secs(3));
        let specs = vec![package("a"), package("b"), package("c")];
        let config = EngineConfig {
            workers: 1,
            assertion_timeout: Duration::from_secs(10),
            run_timeout: Duration::from_millis(200),
        };

        let results = run_checks(&specs, Arc::new(backend), &config).expect("run");
        assert_eq!(results.len(), 3);
        assert!(
            results
                .iter()
                .all(|r| r.error == Some(ErrorKind::Timeout))
        );
        assert!(results[2].detail.contains("run timed out"));
    }

    #[test]
    fn timed_out_pipeline_frees_its_worker() {
        let backend = ShellBackend::new(
            Target::Local,
            ShellOptions {
                timeout: Duration::from_secs(1),
                ..ShellOptions::default()
            },
        )
        .expect("backend");
        let specs = vec![
            command_contains("sleep 6 | cat", "x"),
            command_contains("echo hi", "hi"),
        ];
        let config = EngineConfig {
            workers: 1,
            assertion_timeout: Duration::from_secs(1),
            run_timeout: Duration::from_secs(4),
        };

        let started = Instant::now();
        let results = run_checks(&specs, Arc::new(backend), &config).expect("run");
        assert!(started.elapsed() < Duration::from_secs(4));
        assert_eq!(results[0].error, Some(ErrorKind::Timeout));
        assert!(results[1].passed, "{}", results[1].detail);
    }

    #[test]
    fn huge_timeouts_do_not_overflow_deadlines() {
        let backend = FakeBackend::new().with_package("git");
        let config = EngineConfig {
            workers: 1,
            assertion_timeout: Duration::MAX,
            run_timeout: Duration::from_secs(u64::MAX),
        };

        let results = run_checks(&[package("git")], Arc::new(backend), &config).expect("run");
        assert!(results[0].passed);
    }

    #[test]
    fn effective_workers_is_bounded() {
        assert_eq!(config(4).effective_workers(2), 2);
        assert_eq!(config(3).effective_workers(50), 3);
        let auto = config(0).effective_workers(50);
        assert!((1..=MAX_AUTO_WORKERS).contains(&auto));
        assert_eq!(config(0).effective_workers(0), 1);
    }

    #[test]
    fn empty_specs_yield_no_results() {
        let results = run_checks(&[], Arc::new(FakeBackend::new()), &config(2)).expect("run");
        assert!(results.is_empty());
    }
}
