use assert_cmd::Command;
use predicates::prelude::*;
use std::fs::write;
use std::path::Path;
use tempfile::{tempdir, NamedTempFile, TempDir};

/// Writes a config pointing the store and staging dir into `dir`.
fn create_config(dir: &Path, buckets: &[&str]) -> NamedTempFile {
    let config = NamedTempFile::new().expect("Creating temp config file failed");
    let yaml = format!(
        "mediator:\n  id: mediator-test\nstorage:\n  root: {root}\n  poll_interval_ms: 20\nlistener:\n  buckets: [{buckets}]\n  staging_dir: {staging}\n",
        root = dir.join("data").display(),
        staging = dir.join("staging").display(),
        buckets = buckets.join(", "),
    );
    write(config.path(), yaml).expect("Writing temp config failed");
    config
}

fn mediator_cmd() -> Command {
    let mut cmd = Command::cargo_bin("mediator").expect("Binary exists");
    cmd.env_remove("MEDIATOR_STORAGE_ROOT")
        .env_remove("MEDIATOR_REGISTRY_API_KEY");
    cmd
}

#[test]
fn help_lists_every_command() {
    mediator_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("listen")
                .and(predicate::str::contains("upload"))
                .and(predicate::str::contains("download"))
                .and(predicate::str::contains("buckets")),
        );
}

#[test]
fn upload_then_download_and_list_through_the_binary() {
    let work: TempDir = tempdir().unwrap();
    let config = create_config(work.path(), &[]);
    let source = work.path().join("report.json");
    write(&source, b"{\"rows\":2}").unwrap();

    mediator_cmd()
        .args(["upload", "--bucket", "incoming", "--meta", "owner=team-a"])
        .arg("--config")
        .arg(config.path())
        .arg("--file")
        .arg(&source)
        .assert()
        .success()
        .stdout(predicate::str::contains("uploaded incoming/report.json (application/json, 10 bytes)"));

    let target = work.path().join("out/report.json");
    mediator_cmd()
        .args(["download", "--bucket", "incoming", "--key", "report.json"])
        .arg("--config")
        .arg(config.path())
        .arg("--output")
        .arg(&target)
        .assert()
        .success();
    assert_eq!(std::fs::read(&target).unwrap(), b"{\"rows\":2}");

    mediator_cmd()
        .arg("buckets")
        .arg("--config")
        .arg(config.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("incoming\t1"));
}

#[test]
fn invalid_bucket_name_fails_the_upload() {
    let work = tempdir().unwrap();
    let config = create_config(work.path(), &[]);
    let source = work.path().join("a.txt");
    write(&source, b"a").unwrap();

    mediator_cmd()
        .args(["upload", "--bucket", "Not_Valid"])
        .arg("--config")
        .arg(config.path())
        .arg("--file")
        .arg(&source)
        .assert()
        .failure()
        .stderr(predicate::str::contains("try \"not-valid\""));
}

#[test]
fn missing_config_file_fails() {
    mediator_cmd()
        .args(["buckets", "--config", "/definitely/not/here.yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read config file"));
}

#[tokio::test]
async fn listen_until_processes_and_shuts_down_cleanly() {
    use mediator::cli::listen_until;
    use mediator::load_config::load_config;
    use mediator::Mediator;
    use mediator_core::transfer::UploadRequest;
    use std::time::Duration;

    let work = tempdir().unwrap();
    let config = create_config(work.path(), &["incoming"]);
    let mediator = Mediator::from_config(load_config(config.path()).unwrap());
    mediator.store.make_bucket("incoming").await.unwrap();
    let mut notifications = mediator.bus.subscribe_notifications();

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let shutdown = async {
        let _ = stop_rx.await;
    };

    let driver = async {
        // Objects present before the subscription are not reported.
        while !mediator.listener.is_listening("incoming") {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        mediator
            .client
            .upload(UploadRequest::new("incoming", "hello.txt", &b"hi"[..]))
            .await
            .unwrap();
        let event = tokio::time::timeout(Duration::from_secs(5), notifications.recv())
            .await
            .expect("notification within timeout")
            .expect("bus open");
        let _ = stop_tx.send(());
        event
    };

    let (listened, event) = tokio::join!(listen_until(&mediator, &[], shutdown), driver);
    listened.unwrap();
    assert_eq!(event.file, "hello.txt");
    assert!(mediator.listener.listening_buckets().is_empty());
}

#[tokio::test]
async fn listen_without_buckets_is_an_error() {
    let work = tempdir().unwrap();
    let config = create_config(work.path(), &[]);
    let mediator =
        mediator::Mediator::from_config(mediator::load_config::load_config(config.path()).unwrap());
    let err = mediator::cli::listen_until(&mediator, &[], async {})
        .await
        .unwrap_err();
    assert!(err.to_string().contains("No buckets"));
}

use std::sync::{Arc, Mutex};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{layer::Context, Layer, Registry};

/// Custom Layer to collect emitted event messages.
struct EventCollector {
    events: Arc<Mutex<Vec<String>>>,
}

impl<S> Layer<S> for EventCollector
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        use std::fmt::Write as FmtWrite;
        let mut msg = String::new();
        let _ = write!(&mut msg, "{:?}", event);
        self.events.lock().unwrap().push(msg);
    }
}

#[tokio::test]
async fn emits_trace_initialised_event() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let collector = EventCollector {
        events: events.clone(),
    };
    let subscriber = Registry::default().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    use mediator::cli::{run, Cli, Commands, LogFormat};

    // A missing config still emits the marker before failing.
    let cli = Cli {
        log_format: LogFormat::Text,
        command: Commands::Buckets {
            config: std::path::PathBuf::from("dummy.yaml"),
        },
    };

    let _ = run(cli).await;

    let event_msgs = events.lock().unwrap();
    assert!(
        event_msgs.iter().any(|msg| msg.contains("trace_initialised")),
        "Expected a 'trace_initialised' trace event, got: {:?}",
        event_msgs
    );
}
