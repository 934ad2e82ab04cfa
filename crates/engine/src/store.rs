//! Ordered, bounded collection of programs.
//!
//! Indices are positional and shift on delete/reorder; callers that hold
//! an index across mutations must re-resolve it.

use tracing::debug;

use crate::error::EngineError;
use crate::program::ProgramDefinition;
use crate::MAX_PROGRAMS;

#[derive(Debug, Default, Clone)]
pub struct ProgramStore {
    programs: Vec<ProgramDefinition>,
}

impl ProgramStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ProgramDefinition> {
        self.programs.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &ProgramDefinition)> {
        self.programs.iter().enumerate()
    }

    /// Append a program.  Fails once the fixed capacity is reached.
    pub fn add(&mut self, program: ProgramDefinition) -> Result<usize, EngineError> {
        if self.programs.len() >= MAX_PROGRAMS {
            return Err(EngineError::ProgramStoreFull);
        }
        debug!(name = %program.name, index = self.programs.len(), "program added");
        self.programs.push(program);
        Ok(self.programs.len() - 1)
    }

    /// Replace the program at `index`.
    pub fn modify(
        &mut self,
        index: usize,
        program: ProgramDefinition,
    ) -> Result<(), EngineError> {
        let slot = self
            .programs
            .get_mut(index)
            .ok_or(EngineError::ProgramOutOfBounds(index))?;
        *slot = program;
        Ok(())
    }

    /// Remove the program at `index`; later programs shift down one slot.
    pub fn delete(&mut self, index: usize) -> Result<ProgramDefinition, EngineError> {
        if index >= self.programs.len() {
            return Err(EngineError::ProgramOutOfBounds(index));
        }
        let removed = self.programs.remove(index);
        debug!(name = %removed.name, index, "program deleted");
        Ok(removed)
    }

    /// Swap the program at `index` with its predecessor.  Index 0 is a
    /// no-op, not an error.
    pub fn move_up(&mut self, index: usize) -> Result<(), EngineError> {
        if index >= self.programs.len() {
            return Err(EngineError::ProgramOutOfBounds(index));
        }
        if index > 0 {
            self.programs.swap(index, index - 1);
        }
        Ok(())
    }

    pub fn set_enabled(&mut self, index: usize, enabled: bool) -> Result<(), EngineError> {
        let slot = self
            .programs
            .get_mut(index)
            .ok_or(EngineError::ProgramOutOfBounds(index))?;
        slot.enabled = enabled;
        Ok(())
    }

    pub fn erase_all(&mut self) {
        self.programs.clear();
    }
}

// ===========================================================================
// Tests
// ===========================================================================
