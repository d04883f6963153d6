//! Running a pipeline on its own task

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::reconnect::{Event, RtspPipeline};
use super::ConnectionState;
use crate::message::Message;
use crate::stats::SupervisorStats;

enum Command {
    Play,
    Write(Message),
    State(oneshot::Sender<ConnectionState>),
    Stats(oneshot::Sender<SupervisorStats>),
    End(oneshot::Sender<()>),
}

enum Step {
    Command(Option<Command>),
    Event(Event),
}

/// Handle to a pipeline running on a background task
///
/// Dropping the handle ends the pipeline.
///
/// # Example
///
/// ```no_run
/// use rtsp_transport::component::{Component, Passthrough};
/// use rtsp_transport::supervisor::{PipelineConfig, RtspPipeline};
///
/// # async fn example() -> rtsp_transport::error::Result<()> {
/// let config = PipelineConfig::new("rtsp://192.168.0.90/axis-media/media.amp");
/// let rtsp = RtspPipeline::new(config, |_uri: &str| {
///     Box::new(Passthrough::new("session")) as Box<dyn Component>
/// })?;
///
/// let handle = rtsp.spawn();
/// handle.play().await;
/// // ...
/// handle.end().await;
/// # Ok(())
/// # }
/// ```
pub struct PipelineHandle {
    commands: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

impl PipelineHandle {
    pub(super) fn spawn(mut pipeline: RtspPipeline) -> Self {
        let (commands, mut commands_rx) = mpsc::channel(64);

        let task = tokio::spawn(async move {
            loop {
                let step = tokio::select! {
                    command = commands_rx.recv() => Step::Command(command),
                    event = pipeline.next_event() => Step::Event(event),
                };

                match step {
                    Step::Event(event) => pipeline.handle(event).await,
                    Step::Command(Some(Command::Play)) => pipeline.play(),
                    Step::Command(Some(Command::Write(msg))) => pipeline.write(msg),
                    Step::Command(Some(Command::State(reply))) => {
                        let _ = reply.send(pipeline.state());
                    }
                    Step::Command(Some(Command::Stats(reply))) => {
                        let _ = reply.send(pipeline.stats().clone());
                    }
                    Step::Command(Some(Command::End(reply))) => {
                        pipeline.end().await;
                        let _ = reply.send(());
                        break;
                    }
                    Step::Command(None) => {
                        tracing::debug!("Pipeline handle dropped, ending pipeline");
                        pipeline.end().await;
                        break;
                    }
                }
            }
        });

        Self { commands, task }
    }

    /// Start the session; returns false if the pipeline task is gone
    pub async fn play(&self) -> bool {
        self.commands.send(Command::Play).await.is_ok()
    }

    /// Write a message into the egress flow
    pub async fn write(&self, msg: Message) -> bool {
        self.commands.send(Command::Write(msg)).await.is_ok()
    }

    pub async fn state(&self) -> Option<ConnectionState> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(Command::State(tx)).await.ok()?;
        rx.await.ok()
    }

    pub async fn stats(&self) -> Option<SupervisorStats> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(Command::Stats(tx)).await.ok()?;
        rx.await.ok()
    }

    /// Whether the pipeline task has exited
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// End the pipeline and wait for its task to exit
    pub async fn end(self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::End(tx)).await.is_ok() {
            let _ = rx.await;
        }
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Pipeline task failed");
        }
    }
}
