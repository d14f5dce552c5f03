#![allow(dead_code)]

use async_trait::async_trait;
use mediator_core::contract::{
    FileProcessor, MockObjectStore, ProcessingContext, ProcessorError, StoreError,
};
use std::fmt::Write as _;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::field::{Field, Visit};
use tracing::Level;
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::prelude::*;
use tracing_subscriber::Registry;

/// Shared, ordered log written by test processors and mocks.
pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(log: &CallLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

#[derive(Clone, Copy)]
pub enum Behaviour {
    Succeed,
    Fail,
    Panic,
}

/// Processor that appends `<name>:<file>:<mime>` to a log when invoked.
pub struct RecordingProcessor {
    name: String,
    only_mime: Option<String>,
    behaviour: Behaviour,
    log: CallLog,
}

impl RecordingProcessor {
    pub fn new(name: &str, log: &CallLog) -> Self {
        Self {
            name: name.to_owned(),
            only_mime: None,
            behaviour: Behaviour::Succeed,
            log: log.clone(),
        }
    }

    pub fn matching(mut self, mime_type: &str) -> Self {
        self.only_mime = Some(mime_type.to_owned());
        self
    }

    pub fn behaving(mut self, behaviour: Behaviour) -> Self {
        self.behaviour = behaviour;
        self
    }

    pub fn into_arc(self) -> Arc<dyn FileProcessor> {
        Arc::new(self)
    }
}

#[async_trait]
impl FileProcessor for RecordingProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    fn can_process(&self, _file_name: &str, mime_type: &str) -> bool {
        self.only_mime.as_deref().map_or(true, |m| m == mime_type)
    }

    async fn process(&self, ctx: &ProcessingContext) -> Result<(), ProcessorError> {
        self.log
            .lock()
            .unwrap()
            .push(format!("{}:{}:{}", self.name, ctx.file, ctx.mime_type));
        match self.behaviour {
            Behaviour::Succeed => Ok(()),
            Behaviour::Fail => Err(ProcessorError::Rejected {
                file: ctx.file.clone(),
                reason: "refused in test".into(),
            }),
            Behaviour::Panic => panic!("processor {} blew up", self.name),
        }
    }
}

/// Expects exactly one fetch of `bucket`/`key`, writing `content` to the
/// staging path, and exactly one removal of that path.
pub fn expect_staging(
    store: &mut MockObjectStore,
    bucket: &str,
    key: &str,
    content: &'static [u8],
) {
    let (bucket, key) = (bucket.to_owned(), key.to_owned());
    store
        .expect_fetch_object_to_path()
        .withf(move |b, k, _| *b == bucket && *k == key)
        .times(1)
        .returning(move |_, _, path| {
            std::fs::write(path, content)?;
            Ok(())
        });
    store
        .expect_remove_local_path()
        .times(1)
        .returning(|path| remove_file(path));
}

pub fn remove_file(path: &Path) -> Result<(), StoreError> {
    std::fs::remove_file(path)?;
    Ok(())
}

pub fn dir_is_empty(dir: &Path) -> bool {
    match std::fs::read_dir(dir) {
        Ok(mut entries) => entries.next().is_none(),
        Err(_) => true,
    }
}

/// Events captured by [`capture_logs`], as `(level, "field=value ...")`.
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<(Level, String)>>>);

impl CapturedLogs {
    pub fn at(&self, level: Level) -> Vec<String> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, line)| line.clone())
            .collect()
    }
}

struct LogCollector {
    logs: CapturedLogs,
}

struct FieldWriter<'a>(&'a mut String);

impl Visit for FieldWriter<'_> {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let _ = write!(self.0, "{}={:?} ", field.name(), value);
    }
}

impl<S: tracing::Subscriber> Layer<S> for LogCollector {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut line = String::new();
        event.record(&mut FieldWriter(&mut line));
        self.logs
            .0
            .lock()
            .unwrap()
            .push((*event.metadata().level(), line));
    }
}

/// Records every event on the current thread until the guard is dropped.
pub fn capture_logs() -> (CapturedLogs, tracing::subscriber::DefaultGuard) {
    let logs = CapturedLogs::default();
    let subscriber = Registry::default().with(LogCollector { logs: logs.clone() });
    (logs, tracing::subscriber::set_default(subscriber))
}
