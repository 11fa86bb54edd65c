//! Named registry of ragged variables owned by a simulation.
//!
//! Variables of different element types live side by side as
//! `Box<dyn Variable>`; typed access downcasts back to
//! [`RaggedVariable<T>`]. Registration order is preserved and is the order
//! in which [`VariableRegistry::commit_all`] commits.

use cohort_core::update::CommitReport;
use cohort_core::variable::{RaggedVariable, Variable};

use crate::SimError;

struct Entry {
    name: String,
    element_type: &'static str,
    variable: Box<dyn Variable>,
}

/// Variables owned by a simulation, keyed by name.
#[derive(Default)]
pub struct VariableRegistry {
    entries: Vec<Entry>,
}

impl VariableRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Register `variable` under `name`.
    ///
    /// # Errors
    ///
    /// [`SimError::DuplicateVariable`] if `name` is already registered.
    pub fn register<T: Clone + 'static>(
        &mut self,
        name: &str,
        variable: RaggedVariable<T>,
    ) -> Result<(), SimError> {
        if self.position(name).is_some() {
            return Err(SimError::DuplicateVariable(name.to_owned()));
        }
        tracing::debug!(
            variable = name,
            element_type = std::any::type_name::<T>(),
            size = variable.size(),
            "registered ragged variable"
        );
        self.entries.push(Entry {
            name: name.to_owned(),
            element_type: std::any::type_name::<T>(),
            variable: Box::new(variable),
        });
        Ok(())
    }

    /// Typed read access to a variable.
    ///
    /// # Errors
    ///
    /// [`SimError::UnknownVariable`] or [`SimError::TypeMismatch`].
    pub fn get<T: Clone + 'static>(&self, name: &str) -> Result<&RaggedVariable<T>, SimError> {
        let entry = self.entry(name)?;
        entry
            .variable
            .as_any()
            .downcast_ref::<RaggedVariable<T>>()
            .ok_or_else(|| type_mismatch::<T>(entry))
    }

    /// Typed mutable access to a variable.
    ///
    /// # Errors
    ///
    /// [`SimError::UnknownVariable`] or [`SimError::TypeMismatch`].
    pub fn get_mut<T: Clone + 'static>(
        &mut self,
        name: &str,
    ) -> Result<&mut RaggedVariable<T>, SimError> {
        let index = self
            .position(name)
            .ok_or_else(|| SimError::UnknownVariable(name.to_owned()))?;
        let entry = &mut self.entries[index];
        let found = entry.element_type;
        entry
            .variable
            .as_any_mut()
            .downcast_mut::<RaggedVariable<T>>()
            .ok_or_else(|| SimError::TypeMismatch {
                name: name.to_owned(),
                expected: std::any::type_name::<T>(),
                found,
            })
    }

    /// Commit every variable in registration order.
    ///
    /// Returns `(name, report)` for every variable, including those with
    /// nothing queued.
    pub fn commit_all(&mut self) -> Vec<(String, CommitReport)> {
        self.entries
            .iter_mut()
            .map(|entry| {
                entry.variable.update();
                (entry.name.clone(), entry.variable.last_commit_report())
            })
            .collect()
    }

    /// Drop every queued update on every variable.
    pub fn discard_all(&mut self) {
        for entry in &mut self.entries {
            entry.variable.discard_pending();
        }
    }

    /// Total queued updates across all variables.
    pub fn pending_total(&self) -> usize {
        self.entries.iter().map(|e| e.variable.pending_len()).sum()
    }

    /// Registered names, in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    /// Number of registered variables.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no variables are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // -- internal helpers ---------------------------------------------------

    fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.name == name)
    }

    fn entry(&self, name: &str) -> Result<&Entry, SimError> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| SimError::UnknownVariable(name.to_owned()))
    }
}

fn type_mismatch<T>(entry: &Entry) -> SimError {
    SimError::TypeMismatch {
        name: entry.name.clone(),
        expected: std::any::type_name::<T>(),
        found: entry.element_type,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> VariableRegistry {
        let mut reg = VariableRegistry::new();
        reg.register("contacts", RaggedVariable::new(vec![vec![1i32], vec![]]))
            .unwrap();
        reg.register("doses", RaggedVariable::new(vec![vec![0.5f64]; 2]))
            .unwrap();
        reg
    }

    #[test]
    fn register_and_get_typed() {
        let reg = registry();
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.names(), vec!["contacts", "doses"]);
        let contacts = reg.get::<i32>("contacts").unwrap();
        assert_eq!(contacts.get_length(), vec![1, 0]);
    }

    #[test]
    fn duplicate_name_rejected() {
        let mut reg = registry();
        let err = reg
            .register("doses", RaggedVariable::new(vec![vec![1.0f64]]))
            .unwrap_err();
        assert!(matches!(err, SimError::DuplicateVariable(ref n) if n == "doses"));
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn unknown_and_mistyped_access() {
        let mut reg = registry();
        assert!(matches!(
            reg.get::<i32>("missing").unwrap_err(),
            SimError::UnknownVariable(_)
        ));
        let err = reg.get_mut::<i32>("doses").unwrap_err();
        match err {
            SimError::TypeMismatch { name, expected, found } => {
                assert_eq!(name, "doses");
                assert_eq!(expected, "i32");
                assert_eq!(found, "f64");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn commit_all_applies_every_queue() {
        let mut reg = registry();
        reg.get_mut::<i32>("contacts")
            .unwrap()
            .queue_update(vec![vec![7, 8]], vec![1])
            .unwrap();
        reg.get_mut::<f64>("doses")
            .unwrap()
            .queue_fill(vec![1.0])
            .unwrap();
        assert_eq!(reg.pending_total(), 2);

        let reports = reg.commit_all();

        assert_eq!(reg.pending_total(), 0);
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].0, "contacts");
        assert_eq!(reports[0].1.entities_written, 1);
        assert_eq!(reports[1].1.entities_written, 2);
        assert_eq!(
            reg.get::<i32>("contacts").unwrap().get_values(),
            vec![vec![1], vec![7, 8]]
        );
    }

    #[test]
    fn discard_all_drops_pending() {
        let mut reg = registry();
        reg.get_mut::<f64>("doses")
            .unwrap()
            .queue_fill(vec![9.0])
            .unwrap();
        reg.discard_all();
        reg.commit_all();
        assert_eq!(
            reg.get::<f64>("doses").unwrap().get_values(),
            vec![vec![0.5]; 2]
        );
    }
}
