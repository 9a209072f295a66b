//! End-to-end lifecycle tests for PostgresSandbox.
//!
//! Every test drives the full build → run → readiness → callback → teardown
//! sequence against `RecordingEngine`, with a real temp root on disk so
//! workspace cleanup can be observed. Time is paused, so the one-second
//! readiness interval costs nothing.

use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;

use container_engine::fakes::{EngineCall, RecordingEngine};
use ephemeral_pg::fakes::FixedShell;
use ephemeral_pg::{
    ContainerId, PipelineEnv, PostgresSandbox, RunConfiguration, RunIdentity, SandboxError,
};
use futures::FutureExt;

const SEED: u64 = 0x5eed;

fn env(tmp: &Path) -> PipelineEnv {
    PipelineEnv::new("42", "Orders-Service", tmp)
}

fn sandbox_with(
    config: RunConfiguration,
    engine: &Arc<RecordingEngine>,
    shell: &Arc<FixedShell>,
    tmp: &Path,
) -> PostgresSandbox {
    PostgresSandbox::new(config, env(tmp), engine.clone(), shell.clone())
}

fn sandbox(config: RunConfiguration, engine: &Arc<RecordingEngine>, tmp: &Path) -> PostgresSandbox {
    sandbox_with(config, engine, &Arc::new(FixedShell::new("1000\n")), tmp)
}

fn config(name: &str) -> RunConfiguration {
    RunConfiguration::new(name).with_seed(SEED)
}

/// Temp dir the first invocation with `SEED` will use.
fn expected_workspace(tmp: &Path, port: Option<&str>) -> std::path::PathBuf {
    RunIdentity::derive(SEED, &env(tmp), port).unwrap().temp_dir
}

fn run_args_of(call: &EngineCall) -> &[String] {
    match call {
        EngineCall::Run { run_args, .. } => run_args,
        other => panic!("expected Run, got {:?}", other),
    }
}

fn container_of(call: &EngineCall) -> &ContainerId {
    match call {
        EngineCall::Run { container, .. } | EngineCall::Stop { container } => container,
        other => panic!("expected Run or Stop, got {:?}", other),
    }
}

#[derive(Debug)]
enum AppError {
    Sandbox(SandboxError),
    Assertion(String),
}

impl From<SandboxError> for AppError {
    fn from(err: SandboxError) -> Self {
        AppError::Sandbox(err)
    }
}

// ---------------------------------------------------------------------------
// with_db: success path
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn with_db_happy_path_ready_on_third_attempt() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = Arc::new(RecordingEngine::new().ready_on_attempt(3));
    let sandbox = sandbox(config("appdb"), &engine, tmp.path());
    let workspace = expected_workspace(tmp.path(), None);

    let seen = {
        let workspace = workspace.clone();
        sandbox
            .with_db(|port, id| async move {
                assert!(workspace.join("Dockerfile").exists());
                assert!(workspace.join("data").is_dir());
                Ok::<_, anyhow::Error>((port, id))
            })
            .await
            .unwrap()
    };

    let (port, id) = seen;
    assert_eq!(port.len(), 5);
    assert!(port.starts_with('1'));

    assert_eq!(engine.builds().len(), 1);
    assert_eq!(engine.execs().len(), 3);

    // Database container plus one readiness probe, both stopped.
    let runs = engine.runs();
    assert_eq!(runs.len(), 2);
    assert_eq!(container_of(&runs[0]), &id);
    assert_eq!(engine.stops().len(), 2);
    assert!(engine.was_stopped(&id));
    assert!(engine.running().is_empty());

    assert!(!workspace.exists());
}

#[tokio::test(start_paused = true)]
async fn with_db_returns_callback_value() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = Arc::new(RecordingEngine::new());
    let sandbox = sandbox(config("appdb"), &engine, tmp.path());

    let value = sandbox
        .with_db(|_port, _id| async { Ok::<_, SandboxError>(41 + 1) })
        .await
        .unwrap();

    assert_eq!(value, 42);
}

#[tokio::test(start_paused = true)]
async fn build_receives_rendered_dockerfile_and_unique_tag() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = Arc::new(RecordingEngine::new());
    let config = config("ledger")
        .with_engine_version("16")
        .with_database_user("ci");
    let sandbox = sandbox(config, &engine, tmp.path());
    let identity = RunIdentity::derive(SEED, &env(tmp.path()), None).unwrap();

    sandbox
        .with_db(|_, _| async { Ok::<_, SandboxError>(()) })
        .await
        .unwrap();

    match &engine.builds()[0] {
        EngineCall::Build {
            tag,
            context_dir,
            dockerfile,
        } => {
            assert_eq!(tag, &identity.image_tag);
            assert!(tag.starts_with("orders-service:42-"));
            assert_eq!(context_dir, &identity.temp_dir);
            let dockerfile = dockerfile.as_deref().unwrap();
            assert!(dockerfile.starts_with("FROM postgres:16\n"));
            assert!(dockerfile.contains("RUN useradd --uid 1000 --user-group ci\n"));
            assert!(dockerfile.contains("ENV POSTGRES_USER=ci\n"));
            assert!(dockerfile.contains("ENV POSTGRES_DB=ledger\n"));
            assert!(dockerfile.contains("USER ci\n"));
        }
        other => panic!("expected Build, got {:?}", other),
    }

    // The per-run image tag is removed during teardown.
    assert_eq!(
        engine.removed_images(),
        vec![EngineCall::RemoveImage {
            image: ephemeral_pg::ImageHandle::new(identity.image_tag),
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn keep_image_skips_image_removal() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = Arc::new(RecordingEngine::new());
    let sandbox = sandbox(config("appdb").keep_image(), &engine, tmp.path());

    sandbox
        .with_db(|_, _| async { Ok::<_, SandboxError>(()) })
        .await
        .unwrap();

    assert!(engine.removed_images().is_empty());
}

#[tokio::test(start_paused = true)]
async fn database_container_maps_port_and_data_dir() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = Arc::new(RecordingEngine::new());
    let sandbox = sandbox(config("appdb"), &engine, tmp.path());
    let identity = RunIdentity::derive(SEED, &env(tmp.path()), None).unwrap();

    let port = sandbox
        .with_db(|port, _| async move { Ok::<_, SandboxError>(port) })
        .await
        .unwrap();

    let runs = engine.runs();
    let args = run_args_of(&runs[0]);
    assert_eq!(
        args,
        &[
            "-p".to_string(),
            format!("{port}:5432"),
            "-v".to_string(),
            format!(
                "{}:/var/lib/postgresql/data",
                identity.temp_dir.join("data").display()
            ),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn explicit_port_passes_through() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = Arc::new(RecordingEngine::new());
    let sandbox = sandbox(config("appdb").with_port("6543"), &engine, tmp.path());

    let port = sandbox
        .with_db(|port, _| async move { Ok::<_, SandboxError>(port) })
        .await
        .unwrap();

    assert_eq!(port, "6543");
    let runs = engine.runs();
    assert!(run_args_of(&runs[0]).contains(&"6543:5432".to_string()));
}

#[tokio::test(start_paused = true)]
async fn uid_looked_up_on_host_when_not_configured() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = Arc::new(RecordingEngine::new());
    let shell = Arc::new(FixedShell::new("  2001 \n"));
    let sandbox = sandbox_with(config("appdb"), &engine, &shell, tmp.path());

    sandbox
        .with_db(|_, _| async { Ok::<_, SandboxError>(()) })
        .await
        .unwrap();

    assert_eq!(shell.commands(), vec!["id -u".to_string()]);
    match &engine.builds()[0] {
        EngineCall::Build { dockerfile, .. } => {
            assert!(dockerfile.as_deref().unwrap().contains("--uid 2001 "));
        }
        other => panic!("expected Build, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn configured_uid_skips_host_lookup() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = Arc::new(RecordingEngine::new());
    let shell = Arc::new(FixedShell::failing("should not be called"));
    let sandbox = sandbox_with(config("appdb").with_uid("1500"), &engine, &shell, tmp.path());

    sandbox
        .with_db(|_, _| async { Ok::<_, SandboxError>(()) })
        .await
        .unwrap();

    assert!(shell.commands().is_empty());
}

#[tokio::test(start_paused = true)]
async fn repeated_invocations_use_distinct_identities() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = Arc::new(RecordingEngine::new());
    let sandbox = sandbox(config("appdb"), &engine, tmp.path());

    let (a, b) = tokio::join!(
        sandbox.with_db(|port, _| async move { Ok::<_, SandboxError>(port) }),
        sandbox.with_db(|port, _| async move { Ok::<_, SandboxError>(port) }),
    );
    a.unwrap();
    b.unwrap();

    let tags: Vec<String> = engine
        .builds()
        .into_iter()
        .map(|call| match call {
            EngineCall::Build { tag, .. } => tag,
            other => panic!("expected Build, got {:?}", other),
        })
        .collect();
    assert_eq!(tags.len(), 2);
    assert_ne!(tags[0], tags[1]);
    assert!(engine.running().is_empty());
}

// ---------------------------------------------------------------------------
// with_db: failure paths
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn empty_database_name_fails_before_side_effects() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = Arc::new(RecordingEngine::new());
    let sandbox = sandbox(config(""), &engine, tmp.path());

    let err = sandbox
        .with_db(|_, _| async { Ok::<_, SandboxError>(()) })
        .await
        .unwrap_err();

    assert!(matches!(err, SandboxError::Precondition(_)));
    assert!(engine.calls().is_empty());
    assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
}

#[tokio::test(start_paused = true)]
async fn build_id_outside_tmp_root_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("ws");
    let engine = Arc::new(RecordingEngine::new());

    for build_id in ["../escape", "/abs/path", "..", "nested/7"] {
        let env = PipelineEnv::new(build_id, "Orders-Service", &root);
        let sandbox = PostgresSandbox::new(
            config("appdb"),
            env,
            engine.clone(),
            Arc::new(FixedShell::new("1000\n")),
        );

        let err = sandbox
            .with_db(|_, _| async { Ok::<_, SandboxError>(()) })
            .await
            .unwrap_err();

        assert!(
            matches!(err, SandboxError::Precondition(_)),
            "{build_id:?} gave {err:?}"
        );
    }
    assert!(engine.calls().is_empty());
    assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancelled_call_tears_down_in_order() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = Arc::new(RecordingEngine::new());
    let sandbox = sandbox(config("appdb"), &engine, tmp.path());
    let workspace = expected_workspace(tmp.path(), None);

    let outcome = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        sandbox.with_db(|_, _| async {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            Ok::<_, SandboxError>(())
        }),
    )
    .await;
    assert!(outcome.is_err());

    // Nothing is released out of order at the moment of cancellation.
    let db = container_of(&engine.runs()[0]).clone();
    assert!(workspace.exists());
    assert_eq!(engine.running(), vec![db.clone()]);

    for _ in 0..10 {
        tokio::task::yield_now().await;
    }

    assert!(engine.running().is_empty());
    assert!(!workspace.exists());

    let calls = engine.calls();
    let db_stop = calls
        .iter()
        .position(|c| matches!(c, EngineCall::Stop { container } if container == &db))
        .unwrap();
    let image_removal = calls
        .iter()
        .position(|c| matches!(c, EngineCall::RemoveImage { .. }))
        .unwrap();
    assert!(db_stop < image_removal);
    assert_eq!(engine.removed_images().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancelled_call_keeps_image_when_configured() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = Arc::new(RecordingEngine::new());
    let sandbox = sandbox(config("appdb").keep_image(), &engine, tmp.path());
    let workspace = expected_workspace(tmp.path(), None);

    let outcome = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        sandbox.with_db(|_, _| async {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            Ok::<_, SandboxError>(())
        }),
    )
    .await;
    assert!(outcome.is_err());

    for _ in 0..10 {
        tokio::task::yield_now().await;
    }

    assert!(engine.running().is_empty());
    assert!(engine.removed_images().is_empty());
    assert!(!workspace.exists());
}

#[tokio::test(start_paused = true)]
async fn callback_error_propagates_unchanged_after_teardown() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = Arc::new(RecordingEngine::new());
    let sandbox = sandbox(config("appdb"), &engine, tmp.path());
    let workspace = expected_workspace(tmp.path(), None);

    let err = sandbox
        .with_db(|_, _| async { Err::<(), _>(AppError::Assertion("row count mismatch".into())) })
        .await
        .unwrap_err();

    match err {
        AppError::Assertion(msg) => assert_eq!(msg, "row count mismatch"),
        other => panic!("expected Assertion, got {:?}", other),
    }
    let db = container_of(&engine.runs()[0]).clone();
    assert!(engine.was_stopped(&db));
    assert!(engine.running().is_empty());
    assert!(!workspace.exists());
}

#[tokio::test(start_paused = true)]
async fn callback_panic_still_tears_down() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = Arc::new(RecordingEngine::new());
    let sandbox = sandbox(config("appdb"), &engine, tmp.path());
    let workspace = expected_workspace(tmp.path(), None);

    let explode = true;
    let result = AssertUnwindSafe(sandbox.with_db(|_, _| async move {
        if explode {
            panic!("migration exploded");
        }
        Ok::<_, SandboxError>(())
    }))
    .catch_unwind()
    .await;

    assert!(result.is_err());
    assert!(engine.running().is_empty());
    assert_eq!(engine.stops().len(), 2);
    assert!(!workspace.exists());
}

#[tokio::test(start_paused = true)]
async fn readiness_timeout_is_distinct_and_stops_database() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = Arc::new(RecordingEngine::new().never_ready());
    let sandbox = sandbox(config("appdb"), &engine, tmp.path());
    let workspace = expected_workspace(tmp.path(), None);

    let called = std::sync::atomic::AtomicBool::new(false);
    let err = sandbox
        .with_db(|_, _| async {
            called.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok::<_, SandboxError>(())
        })
        .await
        .unwrap_err();

    assert!(!called.load(std::sync::atomic::Ordering::SeqCst));

    assert!(err.is_readiness_timeout());
    match err {
        SandboxError::ReadinessTimeout { attempts, .. } => assert_eq!(attempts, 30),
        other => panic!("expected ReadinessTimeout, got {:?}", other),
    }
    assert_eq!(engine.execs().len(), 30);
    let db = container_of(&engine.runs()[0]).clone();
    assert!(engine.was_stopped(&db));
    assert!(engine.running().is_empty());
    assert!(!workspace.exists());
}

#[tokio::test(start_paused = true)]
async fn build_failure_cleans_workspace_without_running() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = Arc::new(RecordingEngine::new().failing_build("unknown instruction"));
    let sandbox = sandbox(config("appdb"), &engine, tmp.path());
    let workspace = expected_workspace(tmp.path(), None);

    let err = sandbox
        .with_db(|_, _| async { Ok::<_, SandboxError>(()) })
        .await
        .unwrap_err();

    assert!(matches!(err, SandboxError::Build { .. }));
    assert!(engine.runs().is_empty());
    assert!(engine.stops().is_empty());
    assert!(!workspace.exists());
}

#[tokio::test(start_paused = true)]
async fn run_failure_cleans_workspace() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = Arc::new(RecordingEngine::new().failing_run("port is already allocated"));
    let sandbox = sandbox(config("appdb"), &engine, tmp.path());
    let workspace = expected_workspace(tmp.path(), None);

    let err = sandbox
        .with_db(|_, _| async { Ok::<_, SandboxError>(()) })
        .await
        .unwrap_err();

    match err {
        SandboxError::Run { source, .. } => {
            assert!(source.to_string().contains("port is already allocated"))
        }
        other => panic!("expected Run, got {:?}", other),
    }
    assert!(engine.execs().is_empty());
    assert!(!workspace.exists());
}

#[tokio::test(start_paused = true)]
async fn uid_lookup_failure_is_reported() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = Arc::new(RecordingEngine::new());
    let shell = Arc::new(FixedShell::failing("id: not found"));
    let sandbox = sandbox_with(config("appdb"), &engine, &shell, tmp.path());
    let workspace = expected_workspace(tmp.path(), None);

    let err = sandbox
        .with_db(|_, _| async { Ok::<_, SandboxError>(()) })
        .await
        .unwrap_err();

    assert!(matches!(err, SandboxError::Shell { .. }));
    assert!(engine.calls().is_empty());
    assert!(!workspace.exists());
}

#[tokio::test(start_paused = true)]
async fn stop_failure_does_not_mask_result() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = Arc::new(RecordingEngine::new().failing_stop("daemon hiccup"));
    let sandbox = sandbox(config("appdb"), &engine, tmp.path());
    let workspace = expected_workspace(tmp.path(), None);

    let value = sandbox
        .with_db(|_, _| async { Ok::<_, SandboxError>("done") })
        .await
        .unwrap();

    assert_eq!(value, "done");
    assert!(!workspace.exists());
}

// ---------------------------------------------------------------------------
// with_linked_container
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn linked_container_runs_with_link_and_extra_args() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = Arc::new(RecordingEngine::new());
    let sandbox = sandbox(config("appdb"), &engine, tmp.path());

    let extra = vec!["-e".to_string(), "DATABASE_URL=postgres://postgres:5432/appdb".to_string()];
    let value = sandbox
        .with_linked_container("acme/api-tests:1.4", &extra, || async {
            Ok::<_, SandboxError>(7)
        })
        .await
        .unwrap();

    assert_eq!(value, 7);

    let runs = engine.runs();
    assert_eq!(runs.len(), 3);
    let db = container_of(&runs[0]).clone();
    match &runs[2] {
        EngineCall::Run {
            image, run_args, ..
        } => {
            assert_eq!(image.as_str(), "acme/api-tests:1.4");
            assert_eq!(
                run_args,
                &vec![
                    "--link".to_string(),
                    format!("{db}:postgres"),
                    "-e".to_string(),
                    "DATABASE_URL=postgres://postgres:5432/appdb".to_string(),
                ]
            );
        }
        other => panic!("expected Run, got {:?}", other),
    }

    // Linked container stopped before the database.
    let linked = container_of(&runs[2]).clone();
    let stop_order: Vec<ContainerId> = engine.stops().iter().map(|c| container_of(c).clone()).collect();
    let linked_pos = stop_order.iter().position(|c| c == &linked).unwrap();
    let db_pos = stop_order.iter().position(|c| c == &db).unwrap();
    assert!(linked_pos < db_pos);
    assert!(engine.running().is_empty());
}

#[tokio::test(start_paused = true)]
async fn linked_container_callback_error_stops_everything() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = Arc::new(RecordingEngine::new());
    let sandbox = sandbox(config("appdb"), &engine, tmp.path());
    let workspace = expected_workspace(tmp.path(), None);

    let err = sandbox
        .with_linked_container("acme/api-tests:1.4", &[], || async {
            Err::<(), _>(AppError::Assertion("suite failed".into()))
        })
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Assertion(_)));
    assert_eq!(engine.stops().len(), 3);
    assert!(engine.running().is_empty());
    assert!(!workspace.exists());
}

#[tokio::test(start_paused = true)]
async fn linked_container_requires_image() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = Arc::new(RecordingEngine::new());
    let sandbox = sandbox(config("appdb"), &engine, tmp.path());

    let err = sandbox
        .with_linked_container("", &[], || async { Ok::<_, SandboxError>(()) })
        .await
        .unwrap_err();

    assert!(matches!(err, SandboxError::Precondition(_)));
    assert!(engine.builds().is_empty());
    assert!(engine.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn linked_container_provision_failure_surfaces_in_caller_error() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = Arc::new(RecordingEngine::new().failing_build("no space left on device"));
    let sandbox = sandbox(config("appdb"), &engine, tmp.path());

    let err = sandbox
        .with_linked_container("acme/api-tests:1.4", &[], || async { Ok::<_, AppError>(()) })
        .await
        .unwrap_err();

    match err {
        AppError::Sandbox(SandboxError::Build { tag, .. }) => {
            assert!(tag.starts_with("orders-service:42-"))
        }
        other => panic!("expected Sandbox(Build), got {:?}", other),
    }
    assert!(engine.runs().is_empty());
}
