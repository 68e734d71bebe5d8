use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use run_events::{ChatMessage, MessageOutcome};
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::args::{build_args, RunRequest};
use crate::backend::{Backend, PermissionMode, ResumeToken};
use crate::binary::{BinaryResolver, DefaultBinaryResolver};
use crate::config::RunnerConfig;
use crate::replay::{replay_log, replay_log_async, ReplayMode};
use crate::run_log::{create_run_log, run_log_path, RunLogHeader};
use crate::session::{RunRecord, Session, SessionStore};
use crate::sink::SessionUpdateSink;
use crate::spawn::{pid_alive, spawn_detached, DetachedProcess};
use crate::summary::{RunStatus, RunSummary};
use crate::tail::{tail_run, TailEnd, TailOptions, TailTarget};
use crate::RunError;

/// Parameters for a new session.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub backend: Backend,
    pub working_dir: PathBuf,
    pub model: Option<String>,
    pub permission_mode: PermissionMode,
}

/// Returned by [`SessionRouter::send_message`] once the backend process is running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunHandle {
    pub session_id: String,
    pub run_id: String,
    pub pid: u32,
    pub log_path: PathBuf,
}

struct LiveRun {
    session_id: String,
    stop: watch::Sender<bool>,
    cancelled: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

struct RouterInner {
    config: RunnerConfig,
    resolver: Box<dyn BinaryResolver>,
    sink: Arc<dyn SessionUpdateSink>,
    store: Mutex<SessionStore>,
    live: Mutex<HashMap<String, LiveRun>>,
}

impl RouterInner {
    fn store(&self) -> MutexGuard<'_, SessionStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn live(&self) -> MutexGuard<'_, HashMap<String, LiveRun>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Binds sessions to backends and drives their runs.
///
/// Each run gets its own tail task; the backend process itself is detached and outlives the
/// router. Cheap to clone.
#[derive(Clone)]
pub struct SessionRouter {
    inner: Arc<RouterInner>,
}

impl SessionRouter {
    /// Opens the session store under `config.data_dir`.
    pub fn open(config: RunnerConfig, sink: Arc<dyn SessionUpdateSink>) -> Result<Self, RunError> {
        let resolver = DefaultBinaryResolver::new(config.binaries.clone());
        Self::with_resolver(config, sink, Box::new(resolver))
    }

    pub fn with_resolver(
        config: RunnerConfig,
        sink: Arc<dyn SessionUpdateSink>,
        resolver: Box<dyn BinaryResolver>,
    ) -> Result<Self, RunError> {
        let store = SessionStore::open(config.sessions_path())?;
        Ok(Self {
            inner: Arc::new(RouterInner {
                config,
                resolver,
                sink,
                store: Mutex::new(store),
                live: Mutex::new(HashMap::new()),
            }),
        })
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.inner.config
    }

    pub fn create_session(&self, params: NewSession) -> Result<Session, RunError> {
        let session = Session {
            id: Uuid::new_v4().to_string(),
            backend: params.backend,
            resume_token: None,
            working_dir: params.working_dir,
            model: params.model,
            permission_mode: params.permission_mode,
            message_count: 0,
            created_at: OffsetDateTime::now_utc(),
            runs: Vec::new(),
        };

        let mut store = self.inner.store();
        store.insert(session.clone());
        store.save()?;
        info!(session_id = %session.id, backend = %session.backend, "session created");
        Ok(session)
    }

    pub fn session(&self, session_id: &str) -> Option<Session> {
        self.inner.store().get(session_id).cloned()
    }

    pub fn sessions(&self) -> Vec<Session> {
        self.inner.store().sessions().cloned().collect()
    }

    /// Starts a run for `prompt` and begins tailing it.
    ///
    /// `backend`, when given, must match the session's backend. Must be called from within a
    /// Tokio runtime; the tail runs as a spawned task.
    pub fn send_message(
        &self,
        session_id: &str,
        prompt: &str,
        backend: Option<Backend>,
    ) -> Result<RunHandle, RunError> {
        let inner = &self.inner;
        let mut store = inner.store();
        let session = store
            .get(session_id)
            .ok_or_else(|| RunError::UnknownSession(session_id.to_string()))?;

        if let Some(requested) = backend {
            if requested != session.backend {
                return Err(RunError::BackendMismatch {
                    session_id: session_id.to_string(),
                    expected: session.backend,
                    requested,
                });
            }
        }
        {
            let live = inner.live();
            if let Some(run) = session
                .running()
                .find(|run| live.contains_key(&run.run_id) || pid_alive(run.pid))
            {
                return Err(RunError::SessionBusy {
                    session_id: session_id.to_string(),
                    run_id: run.run_id.clone(),
                });
            }
        }

        let request = RunRequest {
            backend: session.backend,
            permission_mode: session.permission_mode,
            model: session.model.clone(),
            working_dir: session.working_dir.clone(),
            resume: session.resume_token.clone(),
            prompt: prompt.to_string(),
        };
        let args = build_args(&request, &inner.config)?;
        let binary = inner.resolver.resolve(request.backend)?;

        let run_id = Uuid::new_v4().to_string();
        let log_path = run_log_path(&inner.config.runs_dir(), session_id, &run_id);
        let header = RunLogHeader::new(
            session_id,
            &run_id,
            request.backend,
            request.permission_mode,
            request.model.clone(),
            &request.working_dir,
            prompt,
        );
        let log = create_run_log(&log_path, &header)?;
        let process = spawn_detached(&binary, &args, &request.working_dir, log)?;
        let pid = process.pid();
        info!(
            session_id,
            run_id = %run_id,
            pid,
            backend = %request.backend,
            resumed = request.resume.is_some(),
            "run started"
        );

        let session = store
            .get_mut(session_id)
            .ok_or_else(|| RunError::UnknownSession(session_id.to_string()))?;
        session.message_count += 1;
        session.runs.push(RunRecord {
            run_id: run_id.clone(),
            pid,
            started_at: header.started_at,
            log_path: log_path.clone(),
            status: RunStatus::Running,
            resume_token: None,
            usage: None,
            error: None,
            tail_offset: 0,
        });
        let target = TailTarget {
            session_id: session_id.to_string(),
            run_id: run_id.clone(),
            log_path: log_path.clone(),
            kind: request.backend.agent_kind(),
        };
        if let Err(err) = store.save() {
            error!(run_id = %run_id, error = %err, "failed to record run; it keeps running detached");
        }
        drop(store);

        self.start_tail(target, process, 0);
        Ok(RunHandle {
            session_id: session_id.to_string(),
            run_id,
            pid,
            log_path,
        })
    }

    fn start_tail(&self, target: TailTarget, mut process: DetachedProcess, start_offset: u64) {
        let (stop_tx, stop_rx) = watch::channel(false);
        let checkpoint = Arc::new(AtomicU64::new(start_offset));
        let cancelled = Arc::new(AtomicBool::new(false));
        let options = TailOptions::from_config(&self.inner.config).starting_at(start_offset);

        let run_id = target.run_id.clone();
        let session_id = target.session_id.clone();

        // Held until the entry is inserted so a fast finish cannot remove it first.
        let mut live = self.inner.live();
        let router = self.clone();
        let task_cancelled = Arc::clone(&cancelled);
        let task = tokio::spawn(async move {
            let saver = tokio::spawn(router.clone().save_checkpoints(
                target.run_id.clone(),
                Arc::clone(&checkpoint),
                start_offset,
            ));
            let sink = Arc::clone(&router.inner.sink);
            let end = tail_run(
                &target,
                &mut process,
                &*sink,
                options,
                &checkpoint,
                stop_rx,
            )
            .await;
            saver.abort();
            let _ = saver.await;
            router.finish_tail(&target, end, task_cancelled.load(Ordering::Acquire));
        });
        live.insert(
            run_id,
            LiveRun {
                session_id,
                stop: stop_tx,
                cancelled,
                task: Some(task),
            },
        );
    }

    /// Writes the tail's delivered offset whenever it moves, so a crashed host resumes from
    /// there instead of the start of the log.
    async fn save_checkpoints(self, run_id: String, checkpoint: Arc<AtomicU64>, mut saved: u64) {
        let mut ticker = tokio::time::interval(self.inner.config.checkpoint_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let offset = checkpoint.load(Ordering::Acquire);
            if offset == saved {
                continue;
            }
            match self.record_checkpoint(&run_id, offset) {
                Ok(()) => saved = offset,
                Err(err) => {
                    warn!(run_id = %run_id, offset, error = %err, "failed to save tail checkpoint")
                }
            }
        }
    }

    fn record_checkpoint(&self, run_id: &str, offset: u64) -> Result<(), RunError> {
        let mut store = self.inner.store();
        let Some(run) = store
            .session_of_run_mut(run_id)
            .and_then(|session| session.run_mut(run_id))
        else {
            return Ok(());
        };
        if run.status.is_final() || run.tail_offset == offset {
            return Ok(());
        }
        run.tail_offset = offset;
        trace!(run_id, offset, "tail checkpoint");
        store.save()
    }

    fn finish_tail(&self, target: &TailTarget, end: Result<TailEnd, RunError>, cancelled: bool) {
        let mut store = self.inner.store();
        let Some(session) = store.get_mut(&target.session_id) else {
            warn!(session_id = %target.session_id, "session vanished while tailing");
            self.inner.live().remove(&target.run_id);
            return;
        };

        match end {
            Ok(TailEnd::Finished(summary)) => {
                match finalize_run(session, &target.run_id, &summary, cancelled) {
                    Some(status) => info!(run_id = %target.run_id, ?status, "run finished"),
                    None => warn!(run_id = %target.run_id, "run record vanished while tailing"),
                }
            }
            Ok(TailEnd::Detached { offset }) => {
                if let Some(record) = session.run_mut(&target.run_id) {
                    record.tail_offset = offset;
                }
                debug!(run_id = %target.run_id, offset, "tail stopped; run left running");
            }
            Err(err) => {
                error!(run_id = %target.run_id, error = %err, "tail failed; run left for re-attach");
            }
        }

        if let Err(err) = store.save() {
            error!(run_id = %target.run_id, error = %err, "failed to persist run result");
        }
        drop(store);
        self.inner.live().remove(&target.run_id);
    }

    /// Waits for a run's tail to end and returns its record.
    pub async fn wait_for_run(&self, run_id: &str) -> Result<RunRecord, RunError> {
        let task = self
            .inner
            .live()
            .get_mut(run_id)
            .and_then(|run| run.task.take());
        if let Some(task) = task {
            task.await.map_err(|err| RunError::Join(err.to_string()))?;
        }
        self.run_record(run_id)
    }

    pub fn run_record(&self, run_id: &str) -> Result<RunRecord, RunError> {
        self.inner
            .store()
            .session_of_run(run_id)
            .and_then(|session| session.run(run_id))
            .cloned()
            .ok_or_else(|| RunError::UnknownRun(run_id.to_string()))
    }

    /// User turns and assistant messages of every recorded run, oldest first.
    ///
    /// Runs still in progress are replayed as snapshots.
    pub async fn load_history(&self, session_id: &str) -> Result<Vec<ChatMessage>, RunError> {
        let (backend, runs) = {
            let store = self.inner.store();
            let session = store
                .get(session_id)
                .ok_or_else(|| RunError::UnknownSession(session_id.to_string()))?;
            (session.backend, session.runs.clone())
        };

        let mut messages = Vec::new();
        for run in runs {
            if !run.log_path.exists() {
                warn!(run_id = %run.run_id, path = %run.log_path.display(), "run log missing");
                continue;
            }
            let mode = if run.status == RunStatus::Running {
                ReplayMode::Snapshot
            } else {
                ReplayMode::Complete
            };
            let history = replay_log_async(
                run.log_path.clone(),
                Some(backend),
                self.inner.config.max_line_bytes,
                mode,
            )
            .await?;
            let mut history_messages = history.messages;
            if run.status == RunStatus::Cancelled {
                if let Some(reply) = history_messages.last_mut() {
                    if matches!(
                        reply.outcome,
                        MessageOutcome::InProgress | MessageOutcome::Interrupted { .. }
                    ) {
                        reply.outcome = MessageOutcome::Cancelled;
                    }
                }
            }
            messages.extend(history_messages);
        }
        Ok(messages)
    }

    /// Resumes tailing every recorded run that is still marked running, without re-spawning.
    ///
    /// Runs whose process already exited are drained and finalized. Returns the run ids now
    /// being tailed.
    pub fn reattach_live_runs(&self) -> Vec<String> {
        let pending: Vec<(TailTarget, u32, u64)> = {
            let store = self.inner.store();
            let live = self.inner.live();
            store
                .sessions()
                .flat_map(|session| {
                    session
                        .running()
                        .filter(|run| !live.contains_key(&run.run_id))
                        .map(|run| {
                            (
                                TailTarget {
                                    session_id: session.id.clone(),
                                    run_id: run.run_id.clone(),
                                    log_path: run.log_path.clone(),
                                    kind: session.backend.agent_kind(),
                                },
                                run.pid,
                                run.tail_offset,
                            )
                        })
                })
                .collect()
        };

        let mut attached = Vec::with_capacity(pending.len());
        for (target, pid, offset) in pending {
            info!(
                run_id = %target.run_id,
                pid,
                offset,
                alive = pid_alive(pid),
                "re-attaching run"
            );
            attached.push(target.run_id.clone());
            self.start_tail(target, DetachedProcess::attach(pid), offset);
        }
        attached
    }

    /// Stops tailing `run_id` and leaves its process running. Returns the saved offset.
    pub async fn detach(&self, run_id: &str) -> Result<u64, RunError> {
        let task = {
            let mut live = self.inner.live();
            let run = live
                .get_mut(run_id)
                .ok_or_else(|| RunError::UnknownRun(run_id.to_string()))?;
            let _ = run.stop.send(true);
            run.task.take()
        };
        if let Some(task) = task {
            task.await.map_err(|err| RunError::Join(err.to_string()))?;
        }
        Ok(self.run_record(run_id)?.tail_offset)
    }

    /// Detaches every live tail, e.g. before shutting down.
    pub async fn detach_all(&self) {
        let run_ids: Vec<String> = self.inner.live().keys().cloned().collect();
        for run_id in run_ids {
            if let Err(err) = self.detach(&run_id).await {
                warn!(run_id = %run_id, error = %err, "detach failed");
            }
        }
    }

    /// Terminates the run's process. The run is finalized as cancelled.
    pub fn kill_run(&self, run_id: &str) -> Result<(), RunError> {
        let record = self.run_record(run_id)?;
        if record.status.is_final() {
            return Ok(());
        }

        let tailed = {
            let live = self.inner.live();
            match live.get(run_id) {
                Some(run) => {
                    run.cancelled.store(true, Ordering::Release);
                    true
                }
                None => false,
            }
        };
        DetachedProcess::attach(record.pid).terminate()?;
        info!(run_id, pid = record.pid, "run killed");

        if !tailed {
            self.finalize_untailed(&record)?;
        }
        Ok(())
    }

    /// Folds the log of a killed run nobody is tailing, so its token and usage are kept.
    fn finalize_untailed(&self, record: &RunRecord) -> Result<(), RunError> {
        let replayed = match replay_log(
            &record.log_path,
            None,
            self.inner.config.max_line_bytes,
            ReplayMode::Complete,
        ) {
            Ok(history) => Some(history.summary),
            Err(err) => {
                warn!(run_id = %record.run_id, error = %err, "could not replay killed run");
                None
            }
        };

        let mut store = self.inner.store();
        let Some(session) = store.session_of_run_mut(&record.run_id) else {
            return Ok(());
        };
        if session
            .run(&record.run_id)
            .map_or(true, |run| run.status.is_final())
        {
            return Ok(());
        }
        match replayed {
            Some(summary) => {
                finalize_run(session, &record.run_id, &summary, true);
            }
            None => {
                let Some(run) = session.run_mut(&record.run_id) else {
                    return Ok(());
                };
                run.status = RunStatus::Cancelled;
                session.message_count += 1;
            }
        }
        store.save()
    }

    /// Run ids currently being tailed, optionally only those of one session.
    pub fn live_runs(&self, session_id: Option<&str>) -> Vec<String> {
        self.inner
            .live()
            .iter()
            .filter(|(_, run)| session_id.map_or(true, |id| run.session_id == id))
            .map(|(run_id, _)| run_id.clone())
            .collect()
    }
}

/// Applies a finished run's summary to its record and session. Returns the final status, or
/// `None` when the run is not part of `session`.
fn finalize_run(
    session: &mut Session,
    run_id: &str,
    summary: &RunSummary,
    cancelled: bool,
) -> Option<RunStatus> {
    let backend = session.backend;
    let record = session.run_mut(run_id)?;
    apply_summary(record, summary, cancelled);
    let status = record.status;

    session.message_count += 1;
    if let Some(token) = &summary.resume_token {
        session.resume_token = Some(ResumeToken::for_backend(backend, token.as_str()));
    }
    Some(status)
}

fn apply_summary(record: &mut RunRecord, summary: &RunSummary, cancelled: bool) {
    // A kill that lands after the backend's own terminal event does not rewrite it.
    record.status = match summary.status {
        RunStatus::Interrupted | RunStatus::Running if cancelled => RunStatus::Cancelled,
        status => status,
    };
    record.resume_token = summary.resume_token.clone();
    record.usage = summary.usage;
    record.error = summary.error.clone();
    record.tail_offset = summary.log_offset;
}
