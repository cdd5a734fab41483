use std::sync::Arc;
use std::time::Duration;

use monitor_logging::{monitor_debug, monitor_info, monitor_warn};
use run_monitor_core::{
    update, Effect, Msg, ReconcilerState, RunId, RunViewModel, SessionId, TerminalRefresh,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::settings::EngineSettings;
use crate::snapshot::SnapshotClient;
use crate::stream::{EventSource, StreamItem};
use crate::types::{ReconcilerError, StreamError};

enum Command {
    StartRun {
        run_id: RunId,
        reply: oneshot::Sender<SessionId>,
    },
    Stop,
    Shutdown,
}

/// Handle to the reconciler task. The task owns the state; everything here
/// talks to it through its mailbox or reads the published view model.
pub struct RunReconciler {
    commands: mpsc::UnboundedSender<Command>,
    view: watch::Receiver<RunViewModel>,
    task: JoinHandle<()>,
}

impl RunReconciler {
    /// Spawns the reconciler onto the current tokio runtime.
    pub fn spawn(
        snapshots: Arc<dyn SnapshotClient>,
        events: Arc<dyn EventSource>,
        settings: &EngineSettings,
    ) -> Self {
        let state = ReconcilerState::with_config(settings.reconciler_config());
        let (view_tx, view_rx) = watch::channel(state.view());
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();

        let actor = Actor {
            state,
            snapshots,
            events,
            corroboration_timeout: settings.corroboration_timeout,
            inbox: inbox_tx,
            view_tx,
            stream: None,
            shutdown: CancellationToken::new(),
        };
        let task = tokio::spawn(actor.run(cmd_rx, inbox_rx));

        Self {
            commands: cmd_tx,
            view: view_rx,
            task,
        }
    }

    /// Starts following `run_id`, abandoning any run followed so far.
    /// Returns the session that tags everything belonging to this run.
    pub async fn start_run(&self, run_id: impl Into<RunId>) -> Result<SessionId, ReconcilerError> {
        let (reply, session) = oneshot::channel();
        self.commands
            .send(Command::StartRun {
                run_id: run_id.into(),
                reply,
            })
            .map_err(|_| ReconcilerError::Closed)?;
        session.await.map_err(|_| ReconcilerError::Closed)
    }

    /// Stops following the current run. The last views stay visible.
    pub fn stop(&self) -> Result<(), ReconcilerError> {
        self.commands
            .send(Command::Stop)
            .map_err(|_| ReconcilerError::Closed)
    }

    pub fn view(&self) -> RunViewModel {
        self.view.borrow().clone()
    }

    /// Receives a new view model every time the state changes.
    pub fn subscribe(&self) -> watch::Receiver<RunViewModel> {
        self.view.clone()
    }

    /// Waits until `session` has settled or been superseded by a newer one.
    pub async fn wait_settled(&self, session: SessionId) -> Result<RunViewModel, ReconcilerError> {
        let mut view = self.view.clone();
        let settled = view
            .wait_for(|view| view.session != session || view.settled)
            .await
            .map_err(|_| ReconcilerError::Closed)?;
        Ok(settled.clone())
    }

    /// Closes any open stream and waits for the task to exit. In-flight
    /// snapshot fetches are abandoned.
    pub async fn shutdown(self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Err(err) = self.task.await {
            monitor_warn!("run reconciler task ended abnormally: {}", err);
        }
    }
}

struct ActiveStream {
    session: SessionId,
    cancel: CancellationToken,
}

struct Actor {
    state: ReconcilerState,
    snapshots: Arc<dyn SnapshotClient>,
    events: Arc<dyn EventSource>,
    corroboration_timeout: Duration,
    inbox: mpsc::UnboundedSender<Msg>,
    view_tx: watch::Sender<RunViewModel>,
    stream: Option<ActiveStream>,
    shutdown: CancellationToken,
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut inbox: mpsc::UnboundedReceiver<Msg>,
    ) {
        loop {
            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(Command::StartRun { run_id, reply }) => {
                        self.dispatch(Msg::StartRun { run_id });
                        let _ = reply.send(self.state.session());
                    }
                    Some(Command::Stop) => self.dispatch(Msg::Stop),
                    Some(Command::Shutdown) | None => break,
                },
                Some(msg) = inbox.recv() => self.dispatch(msg),
            }
        }
        monitor_info!("run reconciler shutting down");
        self.shutdown.cancel();
    }

    fn dispatch(&mut self, msg: Msg) {
        let state = std::mem::take(&mut self.state);
        let (state, effects) = update(state, msg);
        self.state = state;
        for effect in effects {
            self.execute(effect);
        }
        if self.state.consume_dirty() {
            self.view_tx.send_replace(self.state.view());
        }
    }

    fn execute(&mut self, effect: Effect) {
        monitor_debug!("executing {:?}", effect);
        match effect {
            Effect::OpenStream { session, run_id } => self.open_stream(session, run_id),
            Effect::CloseStream { session } => self.close_stream(session),
            Effect::RefreshLatestRows {
                session,
                generation,
            } => {
                let snapshots = self.snapshots.clone();
                let inbox = self.inbox.clone();
                tokio::spawn(async move {
                    let result = snapshots
                        .latest_properties()
                        .await
                        .map_err(|err| err.to_string());
                    let _ = inbox.send(Msg::RowsRefreshed {
                        session,
                        generation,
                        result,
                    });
                });
            }
            Effect::CorroborateRunStatus { session, run_id } => {
                let snapshots = self.snapshots.clone();
                let inbox = self.inbox.clone();
                let limit = self.corroboration_timeout;
                tokio::spawn(async move {
                    let result = match tokio::time::timeout(limit, snapshots.run_detail(&run_id))
                        .await
                    {
                        Ok(Ok(detail)) => Ok(detail),
                        Ok(Err(err)) => Err(err.to_string()),
                        Err(_) => Err(format!("timed out after {}ms", limit.as_millis())),
                    };
                    let _ = inbox.send(Msg::CorroborationResolved { session, result });
                });
            }
            Effect::TerminalRefresh {
                session,
                run_id,
                generation,
            } => {
                let snapshots = self.snapshots.clone();
                let inbox = self.inbox.clone();
                tokio::spawn(async move {
                    let (run_detail, bot_summary, notifications, latest_rows) = tokio::join!(
                        snapshots.run_detail(&run_id),
                        snapshots.bot_summary(),
                        snapshots.notifications(),
                        snapshots.latest_properties(),
                    );
                    let refresh = TerminalRefresh {
                        run_detail: run_detail.map_err(|err| err.to_string()),
                        bot_summary: bot_summary.map_err(|err| err.to_string()),
                        notifications: notifications.map_err(|err| err.to_string()),
                        latest_rows: latest_rows.map_err(|err| err.to_string()),
                    };
                    let _ = inbox.send(Msg::TerminalRefreshResolved {
                        session,
                        generation,
                        refresh,
                    });
                });
            }
        }
    }

    fn open_stream(&mut self, session: SessionId, run_id: RunId) {
        if let Some(previous) = self.stream.take() {
            previous.cancel.cancel();
        }
        let cancel = self.shutdown.child_token();
        self.stream = Some(ActiveStream {
            session,
            cancel: cancel.clone(),
        });

        let events = self.events.clone();
        let inbox = self.inbox.clone();
        tokio::spawn(async move {
            let opened = tokio::select! {
                _ = cancel.cancelled() => return,
                opened = events.open(&run_id) => opened,
            };
            let mut stream = match opened {
                Ok(stream) => stream,
                Err(err) => {
                    let _ = inbox.send(Msg::StreamFailed {
                        session,
                        reason: err.to_string(),
                    });
                    return;
                }
            };
            if inbox.send(Msg::StreamOpened { session }).is_err() {
                return;
            }

            loop {
                let item = tokio::select! {
                    _ = cancel.cancelled() => break,
                    item = stream.next() => item,
                };
                let msg = match item {
                    Some(StreamItem::Event(event)) => Msg::EventReceived { session, event },
                    Some(StreamItem::Invalid {
                        kind,
                        timestamp,
                        reason,
                    }) => Msg::EventRejected {
                        session,
                        kind,
                        timestamp,
                        reason,
                    },
                    Some(StreamItem::ConnectionError(err)) => {
                        let _ = inbox.send(Msg::StreamFailed {
                            session,
                            reason: err.to_string(),
                        });
                        break;
                    }
                    None => {
                        // Ignored by the reducer when the run already ended.
                        let _ = inbox.send(Msg::StreamFailed {
                            session,
                            reason: StreamError::Ended.to_string(),
                        });
                        break;
                    }
                };
                if inbox.send(msg).is_err() {
                    break;
                }
            }
            stream.close();
        });
    }

    fn close_stream(&mut self, session: SessionId) {
        let current = self
            .stream
            .as_ref()
            .is_some_and(|active| active.session == session);
        if !current {
            return;
        }
        if let Some(active) = self.stream.take() {
            active.cancel.cancel();
        }
    }
}
