use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agent_runs::{
    replay_log, tail_run, Backend, ProcessProbe, ReplayMode, RunStatus, RunSummary, SessionUpdate,
    SessionUpdateSink, TailEnd, TailOptions, TailTarget,
};
use run_events::{AgentKind, MessageBlock, MessageOutcome, NormalizedEvent};
use tokio::sync::watch;

const MAX_LINE: usize = 1 << 20;

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

#[derive(Default)]
struct Collect(Mutex<Vec<SessionUpdate>>);

impl Collect {
    fn events(&self) -> Vec<NormalizedEvent> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .map(|update| update.event.clone())
            .collect()
    }
}

impl SessionUpdateSink for Collect {
    fn deliver(&self, update: SessionUpdate) {
        self.0.lock().unwrap().push(update);
    }
}

struct FakeProcess(Arc<AtomicBool>);

impl ProcessProbe for FakeProcess {
    fn is_alive(&mut self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

fn options() -> TailOptions {
    TailOptions {
        poll_interval: Duration::from_millis(2),
        exit_grace: Duration::from_millis(30),
        max_line_bytes: MAX_LINE,
        start_offset: 0,
    }
}

/// Copies `source` into `dest` in small uneven chunks while a tailer follows `dest`.
async fn tail_growing_copy(source: &Path, dest: &Path, kind: AgentKind) -> (RunSummary, Vec<NormalizedEvent>) {
    let bytes = std::fs::read(source).unwrap();
    std::fs::File::create(dest).unwrap();

    let alive = Arc::new(AtomicBool::new(true));
    let sink = Arc::new(Collect::default());
    let (_stop_tx, stop_rx) = watch::channel(false);

    let tail = {
        let alive = Arc::clone(&alive);
        let sink = Arc::clone(&sink);
        let target = TailTarget {
            session_id: "s".to_string(),
            run_id: "r".to_string(),
            log_path: dest.to_path_buf(),
            kind,
        };
        tokio::spawn(async move {
            let checkpoint = AtomicU64::new(0);
            let mut probe = FakeProcess(alive);
            tail_run(&target, &mut probe, &*sink, options(), &checkpoint, stop_rx).await
        })
    };

    let mut file = std::fs::OpenOptions::new().append(true).open(dest).unwrap();
    for (i, chunk) in bytes.chunks(53).enumerate() {
        file.write_all(chunk).unwrap();
        file.flush().unwrap();
        if i % 3 == 0 {
            tokio::time::sleep(Duration::from_millis(3)).await;
        }
    }
    alive.store(false, Ordering::SeqCst);

    let end = tail.await.unwrap().unwrap();
    let TailEnd::Finished(summary) = end else {
        panic!("tail detached unexpectedly");
    };
    (summary, sink.events())
}

#[tokio::test]
async fn live_tail_and_replay_agree_for_codex() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("run.jsonl");
    let (live, events) = tail_growing_copy(&fixture("codex_tools.jsonl"), &dest, AgentKind::Codex).await;

    let replayed = replay_log(&dest, None, MAX_LINE, ReplayMode::Complete).unwrap();
    assert_eq!(replayed.summary.message, live.message);
    assert_eq!(replayed.summary.status, RunStatus::Completed);
    assert_eq!(live.resume_token.as_deref(), Some("0199a213-81c0-7800-8aa1-bbab2a035a53"));
    assert_eq!(live.log_offset, std::fs::metadata(&dest).unwrap().len());

    assert!(events
        .iter()
        .all(|event| !matches!(event, NormalizedEvent::ResumeCaptured { .. })));
    assert!(events.last().unwrap().is_terminal());
    assert_eq!(
        events
            .iter()
            .filter(|event| matches!(event, NormalizedEvent::ToolStarted { .. }))
            .count(),
        3
    );

    assert_eq!(replayed.messages.len(), 2);
    assert_eq!(replayed.messages[0].content, "Make main.rs parse args");
    let header = replayed.header.unwrap();
    assert_eq!(header.backend, Backend::Codex);
}

#[tokio::test]
async fn live_tail_and_replay_agree_for_claude() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("run.jsonl");
    let (live, _) =
        tail_growing_copy(&fixture("claude_tools.jsonl"), &dest, AgentKind::ClaudeCode).await;

    let replayed = replay_log(&dest, None, MAX_LINE, ReplayMode::Complete).unwrap();
    assert_eq!(replayed.summary.message, live.message);
    assert_eq!(replayed.summary.usage.unwrap().cost_usd, Some(0.0123));
    assert_eq!(
        live.message.blocks.first(),
        Some(&MessageBlock::Thinking {
            text: "The user wants the file list.".to_string()
        })
    );
}

#[test]
fn replay_is_idempotent() {
    let path = fixture("codex_tools.jsonl");
    let first = replay_log(&path, None, MAX_LINE, ReplayMode::Complete).unwrap();
    let second = replay_log(&path, None, MAX_LINE, ReplayMode::Complete).unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn truncated_log_is_interrupted_on_both_paths() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("run.jsonl");
    let (live, events) =
        tail_growing_copy(&fixture("codex_truncated.jsonl"), &dest, AgentKind::Codex).await;
    let replayed = replay_log(&dest, None, MAX_LINE, ReplayMode::Complete).unwrap();

    assert_eq!(live.status, RunStatus::Interrupted);
    assert_eq!(replayed.summary.status, RunStatus::Interrupted);
    assert_eq!(replayed.summary.message, live.message);
    assert!(matches!(
        live.message.outcome,
        MessageOutcome::Interrupted { .. }
    ));
    assert!(matches!(events.last(), Some(NormalizedEvent::TurnFailed(_))));
    assert_eq!(live.resume_token.as_deref(), Some("T3"));
}

#[tokio::test]
async fn malformed_line_is_skipped_on_both_paths() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("run.jsonl");
    let (live, events) =
        tail_growing_copy(&fixture("codex_malformed.jsonl"), &dest, AgentKind::Codex).await;
    let replayed = replay_log(&dest, None, MAX_LINE, ReplayMode::Complete).unwrap();

    let texts: Vec<&str> = events
        .iter()
        .filter_map(|event| match event {
            NormalizedEvent::TextChunk { text } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(texts, ["hi", "hi again"]);
    assert_eq!(live.status, RunStatus::Completed);
    assert_eq!(replayed.summary.message.content, "hi\n\nhi again");
    assert_eq!(replayed.summary.message, live.message);
}

#[tokio::test]
async fn restarted_tail_continues_without_repeats() {
    let path = fixture("codex_tools.jsonl");
    let bytes = std::fs::read(&path).unwrap();
    let sink = Collect::default();
    let target = TailTarget {
        session_id: "s".to_string(),
        run_id: "r".to_string(),
        log_path: path.clone(),
        kind: AgentKind::Codex,
    };

    // Whole run in one pass, as the reference.
    let (_tx, rx) = watch::channel(false);
    let mut dead = FakeProcess(Arc::new(AtomicBool::new(false)));
    let checkpoint = AtomicU64::new(0);
    let TailEnd::Finished(reference) = tail_run(&target, &mut dead, &sink, options(), &checkpoint, rx)
        .await
        .unwrap()
    else {
        panic!("expected a finished tail");
    };
    let all_events = sink.events();

    // Every cut point: replaying the prefix silently and tailing the rest yields the rest.
    for cut in [0usize, 1, 97, bytes.len() / 2, bytes.len() - 1] {
        let delivered_before = {
            let mut stream = run_events::RunStream::new(AgentKind::Codex, Default::default());
            stream
                .feed(&bytes[..cut])
                .into_iter()
                .filter(|event| !matches!(event, NormalizedEvent::ResumeCaptured { .. }))
                .count()
        };

        let resumed = Collect::default();
        let (_tx, rx) = watch::channel(false);
        let checkpoint = AtomicU64::new(0);
        let TailEnd::Finished(summary) = tail_run(
            &target,
            &mut dead,
            &resumed,
            options().starting_at(cut as u64),
            &checkpoint,
            rx,
        )
        .await
        .unwrap() else {
            panic!("expected a finished tail");
        };

        assert_eq!(resumed.events(), &all_events[delivered_before..], "cut at {cut}");
        assert_eq!(summary.message, reference.message, "cut at {cut}");
        assert_eq!(checkpoint.load(Ordering::SeqCst), bytes.len() as u64);
    }
}
