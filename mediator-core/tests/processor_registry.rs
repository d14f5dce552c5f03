mod common;

use common::{call_log, RecordingProcessor};
use mediator_core::ProcessorRegistry;
use std::sync::Arc;

fn names(registry: &ProcessorRegistry) -> Vec<String> {
    registry
        .list()
        .iter()
        .map(|p| p.name().to_owned())
        .collect()
}

#[test]
fn list_follows_registration_order() {
    let log = call_log();
    let registry = ProcessorRegistry::new();
    assert!(registry.is_empty());

    registry.register(RecordingProcessor::new("zeta", &log).into_arc());
    registry.register(RecordingProcessor::new("alpha", &log).into_arc());
    registry.register(RecordingProcessor::new("mid", &log).into_arc());

    assert_eq!(names(&registry), vec!["zeta", "alpha", "mid"]);
    assert_eq!(registry.len(), 3);
}

#[test]
fn snapshot_is_not_affected_by_later_registrations() {
    let log = call_log();
    let registry = ProcessorRegistry::new();
    registry.register(RecordingProcessor::new("first", &log).into_arc());

    let snapshot = registry.list();
    registry.register(RecordingProcessor::new("second", &log).into_arc());

    assert_eq!(snapshot.len(), 1);
    assert_eq!(registry.len(), 2);
}

#[test]
fn same_processor_registered_twice_appears_twice() {
    let log = call_log();
    let registry = ProcessorRegistry::new();
    let processor = RecordingProcessor::new("dup", &log).into_arc();
    registry.register(processor.clone());
    registry.register(processor.clone());

    let listed = registry.list();
    assert_eq!(listed.len(), 2);
    assert!(Arc::ptr_eq(&listed[0], &listed[1]));
}

#[test]
fn registration_from_another_thread_is_visible() {
    let log = call_log();
    let registry = Arc::new(ProcessorRegistry::new());
    let handle = {
        let registry = registry.clone();
        let log = log.clone();
        std::thread::spawn(move || {
            registry.register(RecordingProcessor::new("threaded", &log).into_arc());
        })
    };
    handle.join().unwrap();
    assert_eq!(names(&registry), vec!["threaded"]);
}
