use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use run_events::{AgentKind, IngestConfig, NormalizedEvent, RunStream};
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::sync::watch;
use tokio::time::{sleep, Instant};
use tracing::{debug, trace};

use crate::config::RunnerConfig;
use crate::sink::{SessionUpdate, SessionUpdateSink};
use crate::spawn::ProcessProbe;
use crate::summary::RunSummary;
use crate::RunError;

const READ_CHUNK_BYTES: usize = 64 * 1024;

/// Identifies the run being tailed and where its log lives.
#[derive(Debug, Clone)]
pub struct TailTarget {
    pub session_id: String,
    pub run_id: String,
    pub log_path: PathBuf,
    pub kind: AgentKind,
}

#[derive(Debug, Clone, Copy)]
pub struct TailOptions {
    pub poll_interval: Duration,
    /// How long to keep draining after the process is first seen dead.
    pub exit_grace: Duration,
    pub max_line_bytes: usize,
    /// Bytes already delivered by an earlier tailer of the same run.
    pub start_offset: u64,
}

impl TailOptions {
    pub fn from_config(config: &RunnerConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            exit_grace: config.exit_grace(),
            max_line_bytes: config.max_line_bytes,
            start_offset: 0,
        }
    }

    pub fn starting_at(mut self, offset: u64) -> Self {
        self.start_offset = offset;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TailEnd {
    /// A terminal event was seen or the process exited.
    Finished(RunSummary),
    /// The tail was stopped while the process may still be running.
    Detached { offset: u64 },
}

/// Follows a growing run log until the run ends or `stop` is raised.
///
/// Events are delivered to `sink` in log order. Bytes before `options.start_offset` are folded
/// into the run's state without being delivered again, so a restarted tailer continues exactly
/// where the previous one stopped. `checkpoint` always holds the offset of delivered bytes.
pub async fn tail_run<P, S>(
    target: &TailTarget,
    probe: &mut P,
    sink: &S,
    options: TailOptions,
    checkpoint: &AtomicU64,
    stop: watch::Receiver<bool>,
) -> Result<TailEnd, RunError>
where
    P: ProcessProbe + ?Sized,
    S: SessionUpdateSink + ?Sized,
{
    let path = &target.log_path;
    let mut file = File::open(path).await.map_err(RunError::io(path))?;
    let mut stream = RunStream::new(
        target.kind,
        IngestConfig::with_max_line_bytes(options.max_line_bytes),
    );
    let mut buf = vec![0u8; READ_CHUNK_BYTES];
    let mut offset = 0u64;

    while offset < options.start_offset {
        let want = (options.start_offset - offset).min(buf.len() as u64) as usize;
        let n = file
            .read(&mut buf[..want])
            .await
            .map_err(RunError::io(path))?;
        if n == 0 {
            break;
        }
        stream.feed(&buf[..n]);
        offset += n as u64;
    }
    checkpoint.store(offset, Ordering::Release);
    if offset > 0 {
        debug!(run_id = %target.run_id, offset, "resumed tail from checkpoint");
    }

    let mut stop = Some(stop);
    let mut dead_since: Option<Instant> = None;

    loop {
        if stream.is_closed() {
            break;
        }
        if stop.as_ref().is_some_and(|rx| *rx.borrow()) {
            debug!(run_id = %target.run_id, offset, "tail detached");
            return Ok(TailEnd::Detached { offset });
        }

        let n = file.read(&mut buf).await.map_err(RunError::io(path))?;
        if n > 0 {
            let events = stream.feed(&buf[..n]);
            offset += n as u64;
            deliver(target, sink, events);
            checkpoint.store(offset, Ordering::Release);
            dead_since = None;
            continue;
        }

        if probe.is_alive() {
            dead_since = None;
        } else {
            let since = *dead_since.get_or_insert_with(Instant::now);
            if since.elapsed() >= options.exit_grace {
                trace!(run_id = %target.run_id, "process gone and log drained");
                break;
            }
        }

        if wait_or_stop(&mut stop, options.poll_interval).await {
            debug!(run_id = %target.run_id, offset, "tail detached");
            return Ok(TailEnd::Detached { offset });
        }
    }

    let events = stream.finish();
    deliver(target, sink, events);
    checkpoint.store(offset, Ordering::Release);

    let summary = RunSummary::from_stream(stream, offset);
    debug!(
        run_id = %target.run_id,
        status = ?summary.status,
        offset,
        "tail finished"
    );
    Ok(TailEnd::Finished(summary))
}

fn deliver<S>(target: &TailTarget, sink: &S, events: Vec<NormalizedEvent>)
where
    S: SessionUpdateSink + ?Sized,
{
    for event in events {
        if matches!(event, NormalizedEvent::ResumeCaptured { .. }) {
            continue;
        }
        sink.deliver(SessionUpdate {
            session_id: target.session_id.clone(),
            run_id: target.run_id.clone(),
            event,
        });
    }
}

/// Sleeps one poll interval. Returns `true` when a stop was requested meanwhile.
async fn wait_or_stop(stop: &mut Option<watch::Receiver<bool>>, poll: Duration) -> bool {
    let Some(rx) = stop.as_mut() else {
        sleep(poll).await;
        return false;
    };
    tokio::select! {
        _ = sleep(poll) => false,
        changed = rx.changed() => match changed {
            Ok(()) => *rx.borrow(),
            Err(_) => {
                // Nobody can stop us any more.
                *stop = None;
                false
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::summary::RunStatus;
    use std::io::Write;
    use std::sync::atomic::AtomicBool;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Collect(Mutex<Vec<SessionUpdate>>);

    impl SessionUpdateSink for Collect {
        fn deliver(&self, update: SessionUpdate) {
            self.0.lock().unwrap().push(update);
        }
    }

    struct Flag(Arc<AtomicBool>);

    impl ProcessProbe for Flag {
        fn is_alive(&mut self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn options() -> TailOptions {
        TailOptions {
            poll_interval: Duration::from_millis(5),
            exit_grace: Duration::from_millis(20),
            max_line_bytes: 1024,
            start_offset: 0,
        }
    }

    fn target(path: PathBuf) -> TailTarget {
        TailTarget {
            session_id: "s".to_string(),
            run_id: "r".to_string(),
            log_path: path,
            kind: AgentKind::Codex,
        }
    }

    #[tokio::test]
    async fn process_exit_without_terminal_event_is_interrupted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.jsonl");
        std::fs::write(
            &path,
            "{\"type\":\"item.started\",\"item\":{\"id\":\"c\",\"type\":\"command_execution\",\"command\":\"ls\"}}\n",
        )
        .unwrap();

        let sink = Collect::default();
        let mut probe = Flag(Arc::new(AtomicBool::new(false)));
        let checkpoint = AtomicU64::new(0);
        let (_tx, rx) = watch::channel(false);

        let end = tail_run(&target(path), &mut probe, &sink, options(), &checkpoint, rx)
            .await
            .unwrap();

        let TailEnd::Finished(summary) = end else {
            panic!("expected a finished tail");
        };
        assert_eq!(summary.status, RunStatus::Interrupted);
        let events = sink.0.into_inner().unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0].event, NormalizedEvent::ToolStarted { .. }));
        assert!(matches!(events[1].event, NormalizedEvent::TurnFailed(_)));
    }

    #[tokio::test]
    async fn stop_detaches_and_reports_the_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.jsonl");
        let mut file = std::fs::File::create(&path).unwrap();
        let line = "{\"type\":\"thread.started\",\"thread_id\":\"T1\"}\n";
        file.write_all(line.as_bytes()).unwrap();

        let sink = Arc::new(Collect::default());
        let checkpoint = Arc::new(AtomicU64::new(0));
        let (tx, rx) = watch::channel(false);

        let task = {
            let sink = Arc::clone(&sink);
            let checkpoint = Arc::clone(&checkpoint);
            let target = target(path.clone());
            tokio::spawn(async move {
                let mut probe = Flag(Arc::new(AtomicBool::new(true)));
                tail_run(&target, &mut probe, &*sink, options(), &checkpoint, rx).await
            })
        };

        while checkpoint.load(Ordering::Acquire) < line.len() as u64 {
            sleep(Duration::from_millis(2)).await;
        }
        tx.send(true).unwrap();

        let end = task.await.unwrap().unwrap();
        assert_eq!(
            end,
            TailEnd::Detached {
                offset: line.len() as u64
            }
        );
        assert!(sink.0.lock().unwrap().is_empty());
    }
}
