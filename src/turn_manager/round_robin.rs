use super::{validate_roster, TurnManager, TurnStrategy};
use crate::error::SimulationError;

/// Cycles through the roster in order, wrapping forever.
#[derive(Debug, Default)]
pub struct RoundRobin {
    names: Vec<String>,
    cursor: usize,
    initialized: bool,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TurnManager for RoundRobin {
    fn initialize(&mut self, names: &[String]) -> Result<(), SimulationError> {
        if self.initialized {
            return Err(SimulationError::TurnManagerAlreadyInitialized);
        }
        validate_roster(names)?;
        self.names = names.to_vec();
        self.cursor = 0;
        self.initialized = true;
        Ok(())
    }

    fn next_speaker(&mut self) -> Result<String, SimulationError> {
        if !self.initialized {
            return Err(SimulationError::TurnManagerUninitialized);
        }
        let name = self.names[self.cursor].clone();
        self.cursor = (self.cursor + 1) % self.names.len();
        Ok(name)
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn strategy(&self) -> TurnStrategy {
        TurnStrategy::RoundRobin
    }
}
