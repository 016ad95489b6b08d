//! Ordered collection of the configured streams.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use crate::descriptor::StreamDescriptor;
use crate::error::{Result, SyncError};

/// Holds the active descriptor set.
///
/// The set is only ever replaced as a whole; callers treat a successful
/// [`load`](Self::load) as "tear everything down, activate the new set".
#[derive(Debug, Default)]
pub struct StreamRegistry {
    descriptors: Vec<Arc<StreamDescriptor>>,
    generation: u64,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the active set atomically.
    ///
    /// The whole batch is validated first; on error the previous set is kept.
    pub fn load(&mut self, descriptors: Vec<StreamDescriptor>) -> Result<()> {
        Self::validate(&descriptors)?;

        self.descriptors = descriptors.into_iter().map(Arc::new).collect();
        self.generation += 1;
        debug!(
            generation = self.generation,
            count = self.descriptors.len(),
            "Stream registry replaced"
        );
        Ok(())
    }

    pub fn clear(&mut self) {
        self.descriptors.clear();
        self.generation += 1;
    }

    fn validate(descriptors: &[StreamDescriptor]) -> Result<()> {
        let mut seen = HashSet::with_capacity(descriptors.len());
        for descriptor in descriptors {
            if descriptor.id().trim().is_empty() {
                return Err(SyncError::invalid_descriptor("stream id must not be empty"));
            }
            if descriptor.url().trim().is_empty() {
                return Err(SyncError::invalid_descriptor(format!(
                    "stream `{}` has an empty url",
                    descriptor.id()
                )));
            }
            if !seen.insert(descriptor.id()) {
                return Err(SyncError::invalid_descriptor(format!(
                    "duplicate stream id `{}`",
                    descriptor.id()
                )));
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Incremented on every replacement.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<StreamDescriptor>> {
        self.descriptors.iter()
    }

    pub fn get(&self, id: &str) -> Option<&Arc<StreamDescriptor>> {
        self.descriptors.iter().find(|d| d.id() == id)
    }

    /// Election order for the master role: registry order.
    pub fn master_eligible(&self) -> &[Arc<StreamDescriptor>] {
        &self.descriptors
    }
}
