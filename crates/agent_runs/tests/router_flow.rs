#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use agent_runs::{
    Backend, BinaryResolver, NewSession, PermissionMode, ResumeToken, RunError, RunStatus,
    RunnerConfig, SessionRouter, SessionUpdate,
};
use run_events::{MessageOutcome, MessageRole, NormalizedEvent};
use tempfile::TempDir;
use tokio::sync::mpsc;

struct Fixed(PathBuf);

impl BinaryResolver for Fixed {
    fn resolve(&self, _backend: Backend) -> Result<PathBuf, RunError> {
        Ok(self.0.clone())
    }
}

struct NotInstalled;

impl BinaryResolver for NotInstalled {
    fn resolve(&self, backend: Backend) -> Result<PathBuf, RunError> {
        Err(RunError::Resolution {
            backend,
            searched: "nowhere".to_string(),
        })
    }
}

/// Writes a fake CLI that records its argv to `args.txt` and then runs `body`.
fn fake_cli(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("fake-cli");
    let args = dir.join("args.txt");
    let script = format!(
        "#!/bin/sh\n{{ printf '%s\\n' \"$@\"; echo ---; }} >> '{}'\n{body}\n",
        args.display()
    );
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn recorded_invocations(dir: &Path) -> Vec<Vec<String>> {
    let text = std::fs::read_to_string(dir.join("args.txt")).unwrap();
    text.split("---\n")
        .filter(|chunk| !chunk.is_empty())
        .map(|chunk| chunk.lines().map(str::to_owned).collect())
        .collect()
}

fn config(data_dir: &Path) -> RunnerConfig {
    RunnerConfig {
        data_dir: data_dir.to_path_buf(),
        poll_interval_ms: 5,
        exit_grace_ms: 20,
        checkpoint_interval_ms: 10,
        ..RunnerConfig::default()
    }
}

struct Harness {
    _tmp: TempDir,
    bin_dir: PathBuf,
    data_dir: PathBuf,
    work_dir: PathBuf,
}

impl Harness {
    fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let bin_dir = tmp.path().join("bin");
        let data_dir = tmp.path().join("data");
        let work_dir = tmp.path().join("work");
        for dir in [&bin_dir, &data_dir, &work_dir] {
            std::fs::create_dir_all(dir).unwrap();
        }
        Self {
            _tmp: tmp,
            bin_dir,
            data_dir,
            work_dir,
        }
    }

    fn router(
        &self,
        binary: &Path,
    ) -> (SessionRouter, mpsc::UnboundedReceiver<SessionUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let router = SessionRouter::with_resolver(
            config(&self.data_dir),
            Arc::new(tx),
            Box::new(Fixed(binary.to_path_buf())),
        )
        .unwrap();
        (router, rx)
    }

    fn session(&self, router: &SessionRouter, backend: Backend) -> String {
        router
            .create_session(NewSession {
                backend,
                working_dir: self.work_dir.clone(),
                model: None,
                permission_mode: PermissionMode::Build,
            })
            .unwrap()
            .id
    }
}

fn app_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

async fn wait_until(mut done: impl FnMut() -> bool) {
    for _ in 0..500 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

fn drain(rx: &mut mpsc::UnboundedReceiver<SessionUpdate>) -> Vec<SessionUpdate> {
    let mut out = Vec::new();
    while let Ok(update) = rx.try_recv() {
        out.push(update);
    }
    out
}

const DONE_RUN: &str = r#"cat <<'EOF'
{"type":"thread.started","thread_id":"T1"}
{"type":"turn.started"}
{"type":"item.completed","item":{"id":"item_0","type":"agent_message","text":"done"}}
{"type":"turn.completed","usage":{"input_tokens":12,"cached_input_tokens":0,"output_tokens":3}}
EOF"#;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn completed_codex_run_stores_its_thread_and_resumes_it() {
    let h = Harness::new();
    let binary = fake_cli(&h.bin_dir, DONE_RUN);
    let (router, mut rx) = h.router(&binary);
    let session_id = h.session(&router, Backend::Codex);

    let run = router.send_message(&session_id, "first", None).unwrap();
    let record = router.wait_for_run(&run.run_id).await.unwrap();
    assert_eq!(record.status, RunStatus::Completed);
    assert_eq!(record.resume_token.as_deref(), Some("T1"));
    assert_eq!(record.usage.unwrap().input_tokens, 12);

    let updates = drain(&mut rx);
    assert!(updates.iter().all(|u| u.session_id == session_id && u.run_id == run.run_id));
    let events: Vec<NormalizedEvent> = updates.into_iter().map(|u| u.event).collect();
    assert_eq!(events.len(), 2);
    assert_eq!(
        events[0],
        NormalizedEvent::TextChunk {
            text: "done".to_string()
        }
    );
    assert!(matches!(events[1], NormalizedEvent::TurnUsage(_)));

    let session = router.session(&session_id).unwrap();
    assert_eq!(
        session.resume_token,
        Some(ResumeToken::CodexThread("T1".to_string()))
    );
    assert_eq!(session.message_count, 2);

    let history = router.load_history(&session_id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, MessageRole::User);
    assert_eq!(history[0].content, "first");
    assert_eq!(history[1].content, "done");

    let second = router.send_message(&session_id, "second", None).unwrap();
    router.wait_for_run(&second.run_id).await.unwrap();

    let invocations = recorded_invocations(&h.bin_dir);
    assert_eq!(invocations.len(), 2);
    assert!(!invocations[0].contains(&"resume".to_string()));
    assert!(invocations[0].contains(&"--full-auto".to_string()));
    let tail = &invocations[1][invocations[1].len() - 3..];
    assert_eq!(tail, ["resume", "T1", "second"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn killed_turn_is_a_failure_and_keeps_the_old_resume_token() {
    let h = Harness::new();
    let binary = fake_cli(
        &h.bin_dir,
        r#"cat <<'EOF'
{"type":"turn.started"}
{"type":"item.started","item":{"id":"item_0","type":"command_execution","command":"cargo test","aggregated_output":"","status":"in_progress"}}
{"type":"turn.failed","error":"killed"}
EOF"#,
    );
    let (router, mut rx) = h.router(&binary);
    let session_id = h.session(&router, Backend::Codex);

    let run = router.send_message(&session_id, "test it", None).unwrap();
    let record = router.wait_for_run(&run.run_id).await.unwrap();

    assert_eq!(record.status, RunStatus::Failed);
    assert_eq!(record.error.as_deref(), Some("killed"));
    assert_eq!(router.session(&session_id).unwrap().resume_token, None);

    let events: Vec<NormalizedEvent> = drain(&mut rx).into_iter().map(|u| u.event).collect();
    assert_eq!(events.len(), 2);
    assert!(matches!(events[0], NormalizedEvent::ToolStarted { ref name, .. } if name == "Bash"));
    assert!(matches!(events[1], NormalizedEvent::TurnFailed(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn backend_is_fixed_and_one_run_at_a_time() {
    let h = Harness::new();
    let binary = fake_cli(
        &h.bin_dir,
        "echo '{\"type\":\"thread.started\",\"thread_id\":\"T9\"}'\nexec sleep 30",
    );
    let (router, _rx) = h.router(&binary);
    let session_id = h.session(&router, Backend::Codex);

    let run = router.send_message(&session_id, "long job", None).unwrap();

    assert!(matches!(
        router.send_message(&session_id, "again", Some(Backend::Claude)),
        Err(RunError::BackendMismatch {
            expected: Backend::Codex,
            requested: Backend::Claude,
            ..
        })
    ));
    assert!(matches!(
        router.send_message(&session_id, "again", Some(Backend::Codex)),
        Err(RunError::SessionBusy { ref run_id, .. }) if *run_id == run.run_id
    ));

    router.kill_run(&run.run_id).unwrap();
    let record = router.wait_for_run(&run.run_id).await.unwrap();
    assert_eq!(record.status, RunStatus::Cancelled);
    assert!(router.live_runs(Some(&session_id)).is_empty());

    let history = router.load_history(&session_id).await.unwrap();
    assert_eq!(history[1].outcome, MessageOutcome::Cancelled);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn killing_a_detached_run_keeps_its_captured_token() {
    let h = Harness::new();
    let binary = fake_cli(
        &h.bin_dir,
        "echo '{\"type\":\"thread.started\",\"thread_id\":\"T7\"}'\nexec sleep 30",
    );
    let (router, _rx) = h.router(&binary);
    let session_id = h.session(&router, Backend::Codex);

    let run = router.send_message(&session_id, "long job", None).unwrap();
    wait_until(|| {
        std::fs::read_to_string(&run.log_path)
            .unwrap()
            .contains(r#""thread_id":"T7""#)
    })
    .await;
    router.detach(&run.run_id).await.unwrap();

    router.kill_run(&run.run_id).unwrap();

    let record = router.run_record(&run.run_id).unwrap();
    assert_eq!(record.status, RunStatus::Cancelled);
    assert_eq!(record.resume_token.as_deref(), Some("T7"));
    let session = router.session(&session_id).unwrap();
    assert_eq!(
        session.resume_token,
        Some(ResumeToken::CodexThread("T7".to_string()))
    );
    assert_eq!(session.message_count, 2);

    let history = router.load_history(&session_id).await.unwrap();
    assert_eq!(history[1].outcome, MessageOutcome::Cancelled);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn detached_run_is_picked_up_by_a_new_router() {
    let h = Harness::new();
    let binary = fake_cli(
        &h.bin_dir,
        r#"echo '{"type":"thread.started","thread_id":"T5"}'
sleep 1
cat <<'EOF'
{"type":"item.completed","item":{"id":"item_0","type":"agent_message","text":"later"}}
{"type":"turn.completed","usage":{"input_tokens":1,"cached_input_tokens":0,"output_tokens":1}}
EOF"#,
    );

    let (first, mut first_rx) = h.router(&binary);
    let session_id = h.session(&first, Backend::Codex);
    let run = first.send_message(&session_id, "slow", None).unwrap();
    first.detach(&run.run_id).await.unwrap();
    assert_eq!(
        first.run_record(&run.run_id).unwrap().status,
        RunStatus::Running
    );
    let mut events: Vec<NormalizedEvent> =
        drain(&mut first_rx).into_iter().map(|u| u.event).collect();
    drop(first);

    let (second, mut second_rx) = h.router(&binary);
    assert_eq!(second.reattach_live_runs(), vec![run.run_id.clone()]);
    let record = second.wait_for_run(&run.run_id).await.unwrap();
    events.extend(drain(&mut second_rx).into_iter().map(|u| u.event));

    assert_eq!(record.status, RunStatus::Completed);
    assert_eq!(events.len(), 2);
    assert_eq!(
        events[0],
        NormalizedEvent::TextChunk {
            text: "later".to_string()
        }
    );
    assert_eq!(
        second.session(&session_id).unwrap().resume_token,
        Some(ResumeToken::CodexThread("T5".to_string()))
    );
    assert_eq!(recorded_invocations(&h.bin_dir).len(), 1);
}

#[test]
fn restarted_app_continues_after_the_last_delivered_event() {
    let h = Harness::new();
    let binary = fake_cli(
        &h.bin_dir,
        r#"cat <<'EOF'
{"type":"thread.started","thread_id":"T4"}
{"type":"item.completed","item":{"id":"item_0","type":"agent_message","text":"early"}}
EOF
sleep 1
cat <<'EOF'
{"type":"turn.completed","usage":{"input_tokens":2,"cached_input_tokens":0,"output_tokens":1}}
EOF"#,
    );

    // The first app goes away without detaching, as if it crashed.
    let first_app = app_runtime();
    let run = first_app.block_on(async {
        let (router, mut rx) = h.router(&binary);
        let session_id = h.session(&router, Backend::Codex);
        let run = router.send_message(&session_id, "slow", None).unwrap();

        let update = rx.recv().await.unwrap();
        assert_eq!(
            update.event,
            NormalizedEvent::TextChunk {
                text: "early".to_string()
            }
        );
        let delivered = std::fs::metadata(&run.log_path).unwrap().len();
        wait_until(|| router.run_record(&run.run_id).unwrap().tail_offset == delivered).await;
        run
    });
    drop(first_app);

    let second_app = app_runtime();
    second_app.block_on(async {
        let (router, mut rx) = h.router(&binary);
        assert_eq!(router.reattach_live_runs(), vec![run.run_id.clone()]);
        let record = router.wait_for_run(&run.run_id).await.unwrap();

        let events: Vec<NormalizedEvent> = drain(&mut rx).into_iter().map(|u| u.event).collect();
        assert_eq!(events.len(), 1, "{events:?}");
        assert!(matches!(events[0], NormalizedEvent::TurnUsage(_)));
        assert_eq!(record.status, RunStatus::Completed);
        assert_eq!(
            router.session(&run.session_id).unwrap().resume_token,
            Some(ResumeToken::CodexThread("T4".to_string()))
        );
    });
}

#[tokio::test]
async fn missing_binary_fails_before_anything_is_recorded() {
    let h = Harness::new();
    let (tx, _rx) = mpsc::unbounded_channel();
    let router =
        SessionRouter::with_resolver(config(&h.data_dir), Arc::new(tx), Box::new(NotInstalled))
            .unwrap();
    let session_id = h.session(&router, Backend::Claude);

    assert!(matches!(
        router.send_message(&session_id, "hello", None),
        Err(RunError::Resolution {
            backend: Backend::Claude,
            ..
        })
    ));
    assert!(router.session(&session_id).unwrap().runs.is_empty());
}

#[tokio::test]
async fn unwritable_log_directory_is_a_launch_failure() {
    let h = Harness::new();
    let binary = fake_cli(&h.bin_dir, DONE_RUN);
    std::fs::write(h.data_dir.join("runs"), "not a directory").unwrap();
    let (router, _rx) = h.router(&binary);
    let session_id = h.session(&router, Backend::Codex);

    assert!(matches!(
        router.send_message(&session_id, "hello", None),
        Err(RunError::LogUnwritable { .. })
    ));
    assert!(!h.bin_dir.join("args.txt").exists());
}
