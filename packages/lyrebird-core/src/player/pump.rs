//! Frame pump: drains compressed frames from one Encoder onto the
//! voice transport, honouring pause/stop/skip/seek without pacing itself —
//! pacing is the transport's job, consuming one frame per 20 ms.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

use crate::encoder::Encoder;

use super::scheduler::SchedulerCommand;
use super::{PlayerInner, PlayerPhase};

/// Sleep once, on first entry to `Playing` for this player, to let the voice
/// handshake settle before frames start flowing.
const INITIAL_SETTLE: Duration = Duration::from_millis(500);

/// How often pause re-checks for a command while stalled.
const PAUSE_POLL: Duration = Duration::from_millis(100);

/// Why control returned to the scheduler.
#[derive(Debug, Clone, Copy)]
pub(crate) enum PumpOutcome {
    /// The Encoder's frame channel closed: normal end of stream.
    Eos,
    Skip,
    Stop,
    Seek(Duration),
}

/// Runs until EOS or a command demands the pump's attention. Owns
/// `commands` for the duration of the call; the scheduler only reads from
/// it again once this returns.
pub(crate) async fn run(
    inner: Arc<PlayerInner>,
    encoder: Arc<Encoder>,
    commands: &mut mpsc::UnboundedReceiver<SchedulerCommand>,
    frame_duration: Duration,
) -> PumpOutcome {
    if !inner.voice_settled.swap(true, Ordering::SeqCst) {
        tokio::time::sleep(INITIAL_SETTLE).await;
    }
    let _ = inner.voice.set_speaking(true).await;
    *inner.phase.write() = PlayerPhase::Playing;

    let mut frame_count: u64 = 0;

    let outcome = loop {
        if inner.paused.load(Ordering::SeqCst) {
            match next_command_while_paused(commands).await {
                Some(SchedulerCommand::Resume) => {
                    inner.paused.store(false, Ordering::SeqCst);
                    *inner.phase.write() = PlayerPhase::Playing;
                }
                Some(SchedulerCommand::Pause) => {} // already paused
                Some(SchedulerCommand::Skip) => break PumpOutcome::Skip,
                Some(SchedulerCommand::Stop) | None => break PumpOutcome::Stop,
                Some(SchedulerCommand::Seek(position)) => break PumpOutcome::Seek(position),
            }
            continue;
        }

        tokio::select! {
            biased;
            cmd = commands.recv() => {
                match cmd {
                    Some(SchedulerCommand::Pause) => {
                        inner.paused.store(true, Ordering::SeqCst);
                        *inner.phase.write() = PlayerPhase::Paused;
                    }
                    Some(SchedulerCommand::Resume) => {} // already playing
                    Some(SchedulerCommand::Skip) => break PumpOutcome::Skip,
                    Some(SchedulerCommand::Stop) | None => break PumpOutcome::Stop,
                    Some(SchedulerCommand::Seek(position)) => break PumpOutcome::Seek(position),
                }
            }
            frame = encoder.next_frame() => {
                let Some(frame) = frame else {
                    break PumpOutcome::Eos;
                };
                if inner.voice.send_frame(frame).await.is_err() {
                    break PumpOutcome::Stop;
                }
                frame_count += 1;
                *inner.position.write() += frame_duration;
                if frame_count % 1000 == 0 {
                    debug!(
                        target: "lyrebird_core::player::pump",
                        guild_id = %inner.guild_id,
                        frame_count,
                        "frame pump heartbeat"
                    );
                }
            }
        }
    };

    let _ = inner.voice.set_speaking(false).await;
    outcome
}

/// While paused the pump has nothing productive to do but wait for a
/// command; a fixed poll interval bounds how long a `recv` can block so the
/// loop can re-observe `paused` if it were ever flipped by something other
/// than a `Resume` command (defensive; today only commands flip it).
async fn next_command_while_paused(
    commands: &mut mpsc::UnboundedReceiver<SchedulerCommand>,
) -> Option<SchedulerCommand> {
    tokio::select! {
        cmd = commands.recv() => cmd,
        () = tokio::time::sleep(PAUSE_POLL) => Some(SchedulerCommand::Pause),
    }
}
