//! Simulated work: programs and the user tasks that carry them

use crate::error::{ProgramError, ProtocolError};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Key touched by a program
pub type Key = String;

/// Task identifier, unique per coordinator
pub type TaskId = u64;

/// Immutable description of one unit of simulated work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    /// Keys in execution order, repeats allowed
    keys: Vec<Key>,
    /// Higher values produce longer generated key sequences
    length_factor: f64,
    /// Higher values mean shorter expected time per key
    work_factor: f64,
}

impl Program {
    /// Create a program over an explicit key sequence
    pub fn new(
        keys: impl IntoIterator<Item = impl Into<Key>>,
        length_factor: f64,
        work_factor: f64,
    ) -> Result<Self, ProgramError> {
        let keys: Vec<Key> = keys.into_iter().map(Into::into).collect();
        if keys.is_empty() {
            return Err(ProgramError::NoKeys);
        }
        Self::check_factors(length_factor, work_factor)?;

        Ok(Self {
            keys,
            length_factor,
            work_factor,
        })
    }

    /// Draw a random program from `keyspace`.
    ///
    /// The program has `1 + Geometric(1 - length_factor)` keys (at least two),
    /// each picked uniformly from the keyspace.
    pub fn generate<R: Rng + ?Sized>(
        keyspace: &[Key],
        length_factor: f64,
        work_factor: f64,
        rng: &mut R,
    ) -> Result<Self, ProgramError> {
        if keyspace.is_empty() {
            return Err(ProgramError::NoKeys);
        }
        Self::check_factors(length_factor, work_factor)?;

        // Geometric support starts at 1: count trials up to the first success
        let mut trials = 1;
        while rng.gen::<f64>() < length_factor {
            trials += 1;
        }

        let keys = (0..1 + trials)
            .map(|_| keyspace[rng.gen_range(0..keyspace.len())].clone())
            .collect();

        Ok(Self {
            keys,
            length_factor,
            work_factor,
        })
    }

    fn check_factors(length_factor: f64, work_factor: f64) -> Result<(), ProgramError> {
        if !(0.0..1.0).contains(&length_factor) {
            return Err(ProgramError::InvalidLengthFactor(length_factor));
        }
        if !(work_factor > 0.0 && work_factor.is_finite()) {
            return Err(ProgramError::InvalidWorkFactor(work_factor));
        }
        Ok(())
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    pub fn length_factor(&self) -> f64 {
        self.length_factor
    }

    pub fn work_factor(&self) -> f64 {
        self.work_factor
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Program: {:?}>", self.keys)
    }
}

/// A submitted program awaiting its result
#[derive(Debug, Clone)]
pub struct UserTask {
    id: TaskId,
    program: Arc<Program>,
    result: Option<i64>,
}

impl UserTask {
    pub fn new(id: TaskId, program: impl Into<Arc<Program>>) -> Self {
        Self {
            id,
            program: program.into(),
            result: None,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn program(&self) -> &Arc<Program> {
        &self.program
    }

    /// The result, once the task has completed
    pub fn result(&self) -> Option<i64> {
        self.result
    }

    pub fn is_complete(&self) -> bool {
        self.result.is_some()
    }

    /// Record the result. A task completes exactly once.
    pub(crate) fn finish(&mut self, result: i64) -> Result<(), ProtocolError> {
        if self.result.is_some() {
            return Err(ProtocolError::DuplicateResult(self.id));
        }
        self.result = Some(result);
        Ok(())
    }
}

impl fmt::Display for UserTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.result {
            Some(result) => write!(f, "<UserTask ▣ #{}: {}>", self.id, result),
            None => write!(f, "<UserTask □ #{}: {}>", self.id, self.program),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_new_validates_parameters() {
        assert!(Program::new(["x", "y"], 0.3, 1.0).is_ok());
        assert_eq!(
            Program::new(Vec::<Key>::new(), 0.3, 1.0),
            Err(ProgramError::NoKeys)
        );
        assert_eq!(
            Program::new(["x"], 1.0, 1.0),
            Err(ProgramError::InvalidLengthFactor(1.0))
        );
        assert_eq!(
            Program::new(["x"], 0.3, 0.0),
            Err(ProgramError::InvalidWorkFactor(0.0))
        );
    }

    #[test]
    fn test_generate_draws_from_keyspace() {
        let keyspace: Vec<Key> = ["apple", "pear", "kiwi"].iter().map(|s| s.to_string()).collect();
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..50 {
            let program = Program::generate(&keyspace, 0.6, 10.0, &mut rng).unwrap();
            assert!(program.keys().len() >= 2);
            assert!(program.keys().iter().all(|k| keyspace.contains(k)));
        }
    }

    #[test]
    fn test_generate_zero_length_factor_gives_two_keys() {
        let keyspace = vec!["only".to_string()];
        let mut rng = StdRng::seed_from_u64(1);
        let program = Program::generate(&keyspace, 0.0, 1.0, &mut rng).unwrap();
        assert_eq!(program.keys(), &["only".to_string(), "only".to_string()]);
    }

    #[test]
    fn test_task_completes_once() {
        let program = Program::new(["x", "y", "z"], 0.3, 1.0).unwrap();
        let mut task = UserTask::new(3, program);
        assert!(!task.is_complete());
        assert_eq!(task.to_string(), "<UserTask □ #3: <Program: [\"x\", \"y\", \"z\"]>>");

        task.finish(42).unwrap();
        assert_eq!(task.result(), Some(42));
        assert_eq!(task.to_string(), "<UserTask ▣ #3: 42>");
        assert_eq!(task.finish(43), Err(ProtocolError::DuplicateResult(3)));
        assert_eq!(task.result(), Some(42));
    }
}
