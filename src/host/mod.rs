//! The processing host: an isolated task that owns the DSP graph and the
//! captured stream, driven entirely by commands from the coordinator.
//!
//! One `tokio::select!` loop serializes commands against stream frames,
//! so the graph is never mutated mid-block and a chain rebuild is atomic
//! from the caller's perspective: no frame is processed through a
//! half-connected graph.

pub mod graph;
pub mod stages;

use tokio::sync::mpsc;

use crate::capture::Frame;
use crate::error::CaptureError;
use crate::protocol::{HostCommand, HostEvent};

pub use graph::ProcessingGraph;

/// Destination for processed audio. The real speaker device lives behind
/// the platform boundary; tests observe output through a channel sink.
pub trait OutputSink: Send + Sync {
    fn write(&mut self, block: &[f32]);
}

/// Discards processed audio. Used when no playback device is wired up.
pub struct NullSink;

impl OutputSink for NullSink {
    fn write(&mut self, _block: &[f32]) {}
}

enum Step {
    Command(Option<HostCommand>),
    Frame(Option<Frame>),
}

pub struct ProcessingHost {
    commands: mpsc::Receiver<HostCommand>,
    events: mpsc::Sender<HostEvent>,
    sink: Box<dyn OutputSink>,
    graph: Option<ProcessingGraph>,
}

impl ProcessingHost {
    /// Spawn the host task, returning its command channel.
    pub fn spawn(
        events: mpsc::Sender<HostEvent>,
        sink: Box<dyn OutputSink>,
    ) -> mpsc::Sender<HostCommand> {
        let (tx, rx) = mpsc::channel(32);
        let host = ProcessingHost {
            commands: rx,
            events,
            sink,
            graph: None,
        };
        tokio::spawn(host.run());
        tx
    }

    async fn run(mut self) {
        loop {
            let step = {
                let commands = &mut self.commands;
                let graph = &mut self.graph;
                tokio::select! {
                    cmd = commands.recv() => Step::Command(cmd),
                    frame = Self::next_frame(graph) => Step::Frame(frame),
                }
            };
            match step {
                Step::Command(None) => {
                    // Coordinator dropped the channel; clean up silently.
                    self.teardown(false).await;
                    return;
                }
                Step::Command(Some(cmd)) => self.handle_command(cmd).await,
                Step::Frame(Some(mut block)) => {
                    if let Some(graph) = &mut self.graph {
                        graph.process_block(&mut block);
                        self.sink.write(&block);
                    }
                }
                Step::Frame(None) => {
                    // The stream ended underneath us (tab navigation).
                    // Keep the graph; the coordinator decides what's next.
                    if let Some(graph) = &mut self.graph {
                        graph.source_ended = true;
                        tracing::debug!("capture stream ended, processing idle");
                    }
                }
            }
        }
    }

    /// Resolves to the next stream frame, or pends forever when there is
    /// no live source to poll.
    async fn next_frame(graph: &mut Option<ProcessingGraph>) -> Option<Frame> {
        match graph {
            Some(g) if !g.source_ended => g.stream.frames.recv().await,
            _ => std::future::pending().await,
        }
    }

    async fn handle_command(&mut self, cmd: HostCommand) {
        match cmd {
            HostCommand::Initialize { stream, respond_to } => {
                let result = self.initialize(stream).await;
                let _ = respond_to.send(result);
            }
            HostCommand::Teardown { notify, respond_to } => {
                self.teardown(notify).await;
                let _ = respond_to.send(());
            }
            HostCommand::ApplySettings(update) => {
                match &mut self.graph {
                    Some(graph) => graph.apply_settings(&update),
                    None => tracing::debug!("settings update ignored, no graph"),
                }
            }
            HostCommand::ApplyEffects(update) => {
                match &mut self.graph {
                    Some(graph) => {
                        if graph.apply_effects(&update) {
                            tracing::info!(
                                topology = graph.topology_version(),
                                "effect chain rebuilt"
                            );
                        }
                    }
                    None => tracing::debug!("effects update ignored, no graph"),
                }
            }
            HostCommand::AnalyserSnapshot { respond_to } => {
                let result = match &mut self.graph {
                    Some(graph) => graph.analyser_snapshot(),
                    None => Err(CaptureError::AnalyserUnavailable(
                        "no audio graph".into(),
                    )),
                };
                let _ = respond_to.send(result);
            }
        }
    }

    /// Build a fresh graph for a newly delivered stream. Any previous
    /// graph is torn down first without a stopped notification; that is
    /// internal cleanup, not a user-visible stop. Overlapping initializes
    /// cannot happen: the command loop finishes one before reading the
    /// next.
    async fn initialize(&mut self, stream: crate::capture::StreamHandle) -> Result<(), CaptureError> {
        self.teardown(false).await;

        let tab_id = stream.tab_id;
        match ProcessingGraph::build(stream) {
            Ok(graph) => {
                tracing::info!(tab_id, stream_id = %graph.stream.stream_id, "audio graph built");
                self.graph = Some(graph);
                self.emit(HostEvent::Started { tab_id }).await;
                Ok(())
            }
            Err(e) => {
                // Construction consumes the stream; nothing is left to
                // leak, but make the failure visible both ways.
                self.emit(HostEvent::Error {
                    message: e.to_string(),
                })
                .await;
                Err(e)
            }
        }
    }

    /// Tear down the graph and release the stream. Best-effort: cleanup
    /// problems are logged here and never propagated.
    async fn teardown(&mut self, notify: bool) {
        let tab_id = match self.graph.take() {
            Some(mut graph) => {
                graph.release();
                tracing::info!(tab_id = graph.stream.tab_id, "audio processing stopped");
                Some(graph.stream.tab_id)
            }
            None => None,
        };
        if notify {
            self.emit(HostEvent::Stopped { tab_id }).await;
        }
    }

    async fn emit(&self, event: HostEvent) {
        if self.events.send(event).await.is_err() {
            tracing::debug!("host event dropped, coordinator gone");
        }
    }
}
