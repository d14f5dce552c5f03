//! Ordered registry of file processors.

use parking_lot::RwLock;
use std::sync::Arc;

use crate::contract::FileProcessor;

/// Processors in registration order.
///
/// Registration order is invocation order. Readers get a snapshot, so a
/// registration racing with a dispatch is either fully seen by it or not at
/// all.
#[derive(Default)]
pub struct ProcessorRegistry {
    processors: RwLock<Vec<Arc<dyn FileProcessor>>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `processor`. The same processor may be registered twice; it then
    /// runs twice.
    pub fn register(&self, processor: Arc<dyn FileProcessor>) {
        let mut processors = self.processors.write();
        tracing::info!(
            processor = processor.name(),
            position = processors.len(),
            "Registered file processor"
        );
        processors.push(processor);
    }

    /// Copy of the current list.
    pub fn list(&self) -> Vec<Arc<dyn FileProcessor>> {
        self.processors.read().clone()
    }

    pub fn len(&self) -> usize {
        self.processors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.read().is_empty()
    }
}

impl std::fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self
            .processors
            .read()
            .iter()
            .map(|p| p.name().to_owned())
            .collect();
        f.debug_struct("ProcessorRegistry")
            .field("processors", &names)
            .finish()
    }
}
