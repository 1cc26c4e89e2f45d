//! Enclave executor - simulated execution of a program
//!
//! Executing a program walks its keys in order. For each key the enclave
//! sleeps for an exponentially distributed time, derives the key's new value
//! from a stable hash, folds it into the running result and reports the
//! update. The result depends only on the key sequence, never on timing.

use crate::program::{Key, Program};
use rand::Rng;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Default sleep scale per key (10ms)
pub const BASE_SLEEP_MS: u64 = 10;

/// Derived values fall in [-VALUE_SPAN, VALUE_SPAN)
const VALUE_SPAN: i64 = 65536;

/// Executor configuration
#[derive(Clone, Debug)]
pub struct ExecutorConfig {
    /// Sleep scale: a key sleeps `base_sleep * Exp(mean = 1 / work_factor)`
    pub base_sleep: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            base_sleep: Duration::from_millis(BASE_SLEEP_MS),
        }
    }
}

/// Stable value written for `key`
pub fn derive_value(key: &str) -> i64 {
    let hash = blake3::hash(key.as_bytes());
    let bytes = hash.as_bytes();
    let word = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    (word as i64).rem_euclid(2 * VALUE_SPAN) - VALUE_SPAN
}

/// Fold one value into the running result (truncating division)
pub fn fold(result: i64, value: i64) -> i64 {
    result / 2 + value
}

/// Result a program will produce, computed without sleeping
pub fn expected_result(program: &Program) -> i64 {
    program
        .keys()
        .iter()
        .fold(0, |acc, key| fold(acc, derive_value(key)))
}

/// Time spent on one key
pub fn sample_sleep<R: Rng + ?Sized>(
    config: &ExecutorConfig,
    work_factor: f64,
    rng: &mut R,
) -> Duration {
    // Inverse-transform sample of Exp(rate = work_factor)
    let uniform: f64 = rng.gen();
    let draw = -(1.0 - uniform).ln() / work_factor;
    config.base_sleep.mul_f64(draw)
}

/// Run a program on the current thread.
///
/// `on_update` is called once per key, after that key's sleep, with the key
/// and its derived value.
pub fn execute<F>(program: &Program, config: &ExecutorConfig, mut on_update: F) -> i64
where
    F: FnMut(&Key, i64),
{
    let mut rng = rand::thread_rng();
    let mut result = 0;

    for key in program.keys() {
        thread::sleep(sample_sleep(config, program.work_factor(), &mut rng));
        let value = derive_value(key);
        result = fold(result, value);
        on_update(key, value);
    }

    result
}

/// Run a program on its own thread, then hand the result to `on_complete`
pub fn spawn<U, C>(
    name: String,
    program: Arc<Program>,
    config: ExecutorConfig,
    on_update: U,
    on_complete: C,
) -> std::io::Result<JoinHandle<()>>
where
    U: FnMut(&Key, i64) + Send + 'static,
    C: FnOnce(i64) + Send + 'static,
{
    thread::Builder::new().name(name).spawn(move || {
        tracing::trace!("Enclave started: {}", program);
        let result = execute(&program, &config, on_update);
        tracing::trace!("Enclave finished: {} => {}", program, result);
        on_complete(result);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    fn fast() -> ExecutorConfig {
        ExecutorConfig {
            base_sleep: Duration::from_micros(100),
        }
    }

    #[test]
    fn test_derive_value_is_stable_and_bounded() {
        assert_eq!(derive_value("x"), derive_value("x"));
        for key in ["x", "y", "z", "apple", "rhubarb", ""] {
            let value = derive_value(key);
            assert!((-VALUE_SPAN..VALUE_SPAN).contains(&value), "{key}: {value}");
        }
    }

    #[test]
    fn test_fold_truncates_toward_zero() {
        assert_eq!(fold(0, 5), 5);
        assert_eq!(fold(7, 1), 4);
        assert_eq!(fold(-7, 0), -3);
    }

    #[test]
    fn test_execute_reports_every_key_in_order() {
        let program = Program::new(["x", "y", "x", "z"], 0.3, 1.0).unwrap();
        let mut seen = Vec::new();

        let result = execute(&program, &fast(), |key, value| {
            assert_eq!(value, derive_value(key));
            seen.push(key.clone());
        });

        assert_eq!(seen, vec!["x", "y", "x", "z"]);
        assert_eq!(result, expected_result(&program));
    }

    #[test]
    fn test_same_program_same_result() {
        let program = Program::new(["x", "y", "z"], 0.3, 1.0).unwrap();
        let first = execute(&program, &fast(), |_, _| {});
        let second = execute(&program, &fast(), |_, _| {});
        assert_eq!(first, second);
    }

    #[test]
    fn test_sample_sleep_scales_with_work_factor() {
        let config = ExecutorConfig {
            base_sleep: Duration::from_millis(10),
        };
        let mut rng = rand::thread_rng();
        let mean = |work_factor: f64, rng: &mut rand::rngs::ThreadRng| {
            let total: Duration = (0..2000).map(|_| sample_sleep(&config, work_factor, rng)).sum();
            total.as_secs_f64() / 2000.0
        };

        let slow = mean(1.0, &mut rng);
        let quick = mean(10.0, &mut rng);
        assert!(quick < slow, "work factor 10 ({quick}) should sleep less than 1 ({slow})");
    }

    #[test]
    fn test_spawn_runs_off_thread() {
        let program = Arc::new(Program::new(["a", "b"], 0.3, 5.0).unwrap());
        let expected = expected_result(&program);
        let (updates_tx, updates_rx) = unbounded();
        let (done_tx, done_rx) = unbounded();

        let handle = spawn(
            "enclave-test".to_string(),
            program,
            fast(),
            move |key, _| updates_tx.send(key.clone()).unwrap(),
            move |result| done_tx.send(result).unwrap(),
        )
        .unwrap();
        handle.join().unwrap();

        assert_eq!(done_rx.recv().unwrap(), expected);
        assert_eq!(updates_rx.try_iter().collect::<Vec<_>>(), vec!["a", "b"]);
    }
}
