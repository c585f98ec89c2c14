//! Message-passing boundary around one redundant audio transform
//!
//! A [`RedWorker`] owns a [`RedundantAudioTransform`] on a single task. Frames
//! arrive on two [`FramePipe`]s (outgoing and incoming audio), configuration
//! arrives as [`ControlMessage`]s, and loss reports leave through the
//! transform's stats sink. Nothing is shared, so nothing is locked.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RedConfig;
use crate::stats::StatsSink;
use crate::transform::{EncodedFrame, RedundantAudioTransform};

/// Which transform the worker applies to frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransformMode {
    #[default]
    Red,
    /// Forward frames untouched in both directions
    Passthrough,
}

/// Configuration posted to a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    RedPayloadType(u8),
    OpusPayloadType(u8),
    UpdateNumRedundantEncodings(usize),
    Enable,
    Disable,
    SetupTransforms { mode: TransformMode },
}

/// Readable side delivers frames to transform; writable side takes the results.
#[derive(Debug)]
pub struct FramePipe {
    pub readable: mpsc::Receiver<EncodedFrame>,
    pub writable: mpsc::Sender<EncodedFrame>,
}

/// Far ends of a [`FramePipe`]: where the caller feeds frames and where the
/// transformed frames come out.
#[derive(Debug)]
pub struct FramePipeEnds {
    pub input: mpsc::Sender<EncodedFrame>,
    pub output: mpsc::Receiver<EncodedFrame>,
}

/// Create a pipe with bounded buffering in each direction.
pub fn frame_pipe(capacity: usize) -> (FramePipe, FramePipeEnds) {
    let (input, readable) = mpsc::channel(capacity);
    let (writable, output) = mpsc::channel(capacity);
    (FramePipe { readable, writable }, FramePipeEnds { input, output })
}

/// Frame and message counts at worker shutdown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    pub frames_sent: u64,
    pub frames_received: u64,
    pub control_messages: u64,
}

pub struct RedWorker {
    transform: RedundantAudioTransform,
    mode: TransformMode,
    send_pipe: Option<FramePipe>,
    receive_pipe: Option<FramePipe>,
    control: Option<mpsc::Receiver<ControlMessage>>,
    summary: WorkerSummary,
}

impl RedWorker {
    pub fn new(
        config: &RedConfig,
        sink: Box<dyn StatsSink + Send>,
        send_pipe: FramePipe,
        receive_pipe: FramePipe,
        control: mpsc::Receiver<ControlMessage>,
    ) -> Self {
        Self {
            transform: RedundantAudioTransform::new(config, sink),
            mode: TransformMode::default(),
            send_pipe: Some(send_pipe),
            receive_pipe: Some(receive_pipe),
            control: Some(control),
            summary: WorkerSummary::default(),
        }
    }

    /// Run a worker on its own task.
    pub fn spawn(
        config: &RedConfig,
        sink: Box<dyn StatsSink + Send>,
        send_pipe: FramePipe,
        receive_pipe: FramePipe,
        control: mpsc::Receiver<ControlMessage>,
        cancel_token: CancellationToken,
    ) -> JoinHandle<WorkerSummary> {
        let worker = Self::new(config, sink, send_pipe, receive_pipe, control);
        tokio::spawn(worker.run(cancel_token))
    }

    /// Process frames and control messages until cancelled or every input closes.
    pub async fn run(mut self, cancel_token: CancellationToken) -> WorkerSummary {
        info!("Redundant audio worker started");

        while self.send_pipe.is_some() || self.receive_pipe.is_some() || self.control.is_some() {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    debug!("Redundant audio worker cancelled");
                    break;
                }
                message = next_message(&mut self.control) => match message {
                    Some(message) => self.handle_control(message),
                    None => {
                        debug!("Control channel closed");
                        self.control = None;
                    }
                },
                frame = next_frame(&mut self.send_pipe) => match frame {
                    Some(frame) => {
                        let frame = match self.mode {
                            TransformMode::Red => self.transform.sender_transform(frame),
                            TransformMode::Passthrough => frame,
                        };
                        self.summary.frames_sent += 1;
                        if !forward(&self.send_pipe, frame).await {
                            self.send_pipe = None;
                        }
                    }
                    None => {
                        debug!("Send pipe closed");
                        self.send_pipe = None;
                    }
                },
                frame = next_frame(&mut self.receive_pipe) => match frame {
                    Some(frame) => {
                        let frame = match self.mode {
                            TransformMode::Red => self.transform.receiver_transform(frame),
                            TransformMode::Passthrough => frame,
                        };
                        self.summary.frames_received += 1;
                        if !forward(&self.receive_pipe, frame).await {
                            self.receive_pipe = None;
                        }
                    }
                    None => {
                        debug!("Receive pipe closed");
                        self.receive_pipe = None;
                    }
                },
            }
        }

        info!(
            "Redundant audio worker done: {} sent, {} received, {} control messages",
            self.summary.frames_sent, self.summary.frames_received, self.summary.control_messages
        );
        self.summary
    }

    fn handle_control(&mut self, message: ControlMessage) {
        self.summary.control_messages += 1;
        if let ControlMessage::SetupTransforms { mode } = message {
            info!("Transform mode set to {:?}", mode);
            self.mode = mode;
            return;
        }
        self.transform.apply(&message);
    }
}

async fn next_message(
    control: &mut Option<mpsc::Receiver<ControlMessage>>,
) -> Option<ControlMessage> {
    match control {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_frame(pipe: &mut Option<FramePipe>) -> Option<EncodedFrame> {
    match pipe {
        Some(pipe) => pipe.readable.recv().await,
        None => std::future::pending().await,
    }
}

/// Returns false once the downstream side is gone.
async fn forward(pipe: &Option<FramePipe>, frame: EncodedFrame) -> bool {
    let Some(pipe) = pipe else {
        return false;
    };
    if pipe.writable.send(frame).await.is_err() {
        warn!("Frame consumer dropped, closing pipe");
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::{LossReport, NoopStatsSink};
    use crate::transform::FrameMetadata;
    use bytes::Bytes;

    fn frame(timestamp: u32, payload_type: u8, payload: &'static [u8]) -> EncodedFrame {
        EncodedFrame::new(
            timestamp,
            Bytes::from_static(payload),
            FrameMetadata {
                payload_type,
                sequence_number: Some((timestamp / 960) as u16),
                synchronization_source: Some(1),
            },
        )
    }

    fn config() -> RedConfig {
        RedConfig {
            red_payload_type: 63,
            opus_payload_type: 111,
            num_redundant_encodings: 2,
            ..RedConfig::default()
        }
    }

    #[tokio::test]
    async fn test_worker_stops_when_inputs_close() {
        let (send_pipe, send_ends) = frame_pipe(4);
        let (receive_pipe, receive_ends) = frame_pipe(4);
        let (control_tx, control_rx) = mpsc::channel(4);
        let handle = RedWorker::spawn(
            &config(),
            Box::new(NoopStatsSink),
            send_pipe,
            receive_pipe,
            control_rx,
            CancellationToken::new(),
        );

        drop(send_ends);
        drop(receive_ends);
        drop(control_tx);

        let summary = handle.await.unwrap();
        assert_eq!(summary, WorkerSummary::default());
    }

    #[tokio::test]
    async fn test_worker_stops_on_cancel() {
        let (send_pipe, _send_ends) = frame_pipe(4);
        let (receive_pipe, _receive_ends) = frame_pipe(4);
        let (_control_tx, control_rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let handle = RedWorker::spawn(
            &config(),
            Box::new(NoopStatsSink),
            send_pipe,
            receive_pipe,
            control_rx,
            cancel.clone(),
        );
        cancel.cancel();
        assert!(handle.await.is_ok());
    }

    #[tokio::test]
    async fn test_passthrough_mode() {
        let (send_pipe, mut send_ends) = frame_pipe(4);
        let (receive_pipe, receive_ends) = frame_pipe(4);
        let (control_tx, control_rx) = mpsc::channel(4);
        let handle = RedWorker::spawn(
            &config(),
            Box::new(NoopStatsSink),
            send_pipe,
            receive_pipe,
            control_rx,
            CancellationToken::new(),
        );

        control_tx
            .send(ControlMessage::SetupTransforms { mode: TransformMode::Passthrough })
            .await
            .unwrap();
        // Let the control message land before the frames
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        // In RED mode the second frame would pick up the first as redundancy.
        for timestamp in [0, 1920] {
            let input = frame(timestamp, 63, &[111, 9 << 3, 0x80, 0x01]);
            send_ends.input.send(input.clone()).await.unwrap();
            assert_eq!(send_ends.output.recv().await.unwrap(), input);
        }

        drop(send_ends);
        drop(receive_ends);
        drop(control_tx);
        let summary = handle.await.unwrap();
        assert_eq!(summary.frames_sent, 2);
        assert_eq!(summary.control_messages, 1);
    }

    #[tokio::test]
    async fn test_red_mode_adds_redundancy() {
        let (send_pipe, mut send_ends) = frame_pipe(4);
        let (receive_pipe, _receive_ends) = frame_pipe(4);
        let (_control_tx, control_rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let handle = RedWorker::spawn(
            &config(),
            Box::new(NoopStatsSink),
            send_pipe,
            receive_pipe,
            control_rx,
            cancel.clone(),
        );

        send_ends.input.send(frame(0, 63, &[111, 9 << 3, 0x80, 0x01])).await.unwrap();
        send_ends.output.recv().await.unwrap();
        send_ends.input.send(frame(1920, 63, &[111, 9 << 3, 0x80, 0x02])).await.unwrap();
        let output = send_ends.output.recv().await.unwrap();
        // One 4-byte header plus the 3-byte redundant block
        assert_eq!(output.payload.len(), 4 + 7);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_receive_reports_through_channel() {
        let (send_pipe, _send_ends) = frame_pipe(4);
        let (receive_pipe, mut receive_ends) = frame_pipe(4);
        let (_control_tx, control_rx) = mpsc::channel(4);
        let (stats_tx, mut stats_rx) = mpsc::unbounded_channel::<LossReport>();
        let cancel = CancellationToken::new();
        let handle = RedWorker::spawn(
            &config(),
            Box::new(stats_tx),
            send_pipe,
            receive_pipe,
            control_rx,
            cancel.clone(),
        );

        let input = frame(0, 63, &[111, 9 << 3, 0x80, 0x01]);
        receive_ends.input.send(input.clone()).await.unwrap();
        assert_eq!(receive_ends.output.recv().await.unwrap(), input);

        let report = stats_rx.recv().await.unwrap();
        assert_eq!(report.ssrc, Some(1));
        assert_eq!(report.statistics.total_audio_packets_expected, 1);

        cancel.cancel();
        handle.await.unwrap();
    }
}
