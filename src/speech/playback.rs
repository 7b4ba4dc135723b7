//! Gapless playback scheduling for synthesized replies.
//!
//! Each call to [`PlaybackCoordinator::enqueue_and_play`] synthesizes one
//! reply, decodes it, and schedules it at `max(now, next_free_slot)` on the
//! output clock, so replies that arrive while another is playing queue up
//! behind it instead of overlapping. When a buffer ends, `isSpeaking` is
//! cleared on its message; once no buffer is pending the slot clock resets.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::SpeechError;
use super::output::AudioOutput;
use super::pcm::{AudioBuffer, decode_pcm16_base64};
use super::tts::SpeechSynthesizer;
use crate::conversation::{ConversationId, ConversationStore, MessageId, MessagePatch};

#[derive(Debug)]
struct Scheduled {
    conversation_id: ConversationId,
    message_id: MessageId,
    stop: CancellationToken,
}

#[derive(Debug, Default)]
struct Schedule {
    next_free_slot: Duration,
    playing: HashMap<u64, Scheduled>,
    next_handle: u64,
    /// Bumped by `stop`; syntheses started under an older epoch are dropped.
    epoch: u64,
}

/// Queues synthesized speech against a shared output clock.
pub struct PlaybackCoordinator {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    output: Arc<dyn AudioOutput>,
    store: Arc<ConversationStore>,
    sample_rate: u32,
    synthesis: Semaphore,
    schedule: Mutex<Schedule>,
}

impl std::fmt::Debug for PlaybackCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let schedule = self.lock();
        f.debug_struct("PlaybackCoordinator")
            .field("sample_rate", &self.sample_rate)
            .field("playing", &schedule.playing.len())
            .field("next_free_slot", &schedule.next_free_slot)
            .finish()
    }
}

impl PlaybackCoordinator {
    /// Create a coordinator.
    ///
    /// `sample_rate` is the rate of the PCM the synthesizer returns.
    pub fn new(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        output: Arc<dyn AudioOutput>,
        store: Arc<ConversationStore>,
        sample_rate: u32,
    ) -> Self {
        Self {
            synthesizer,
            output,
            store,
            sample_rate,
            synthesis: Semaphore::new(1),
            schedule: Mutex::new(Schedule::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Schedule> {
        self.schedule
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Synthesize `text`, queue it and wait until it has played.
    ///
    /// `isSpeaking` on the message is cleared when playback ends, when it is
    /// stopped, and when synthesis fails.
    ///
    /// # Errors
    ///
    /// Returns the synthesis or decode failure. Nothing is scheduled then.
    pub async fn enqueue_and_play(
        &self,
        text: &str,
        voice: &str,
        conversation_id: &str,
        message_id: &str,
    ) -> Result<(), SpeechError> {
        let epoch = self.lock().epoch;

        let buffer = match self.synthesize(text, voice).await {
            Ok(buffer) => buffer,
            Err(e) => {
                self.clear_speaking(conversation_id, message_id);
                return Err(e);
            }
        };

        if buffer.is_empty() {
            debug!(message_id, "synthesized audio was empty");
            self.clear_speaking(conversation_id, message_id);
            return Ok(());
        }

        let scheduled = {
            let mut schedule = self.lock();
            if schedule.epoch != epoch {
                None
            } else {
                let start_at = self.output.now().max(schedule.next_free_slot);
                schedule.next_free_slot = start_at + buffer.duration();
                let handle = schedule.next_handle;
                schedule.next_handle += 1;
                let stop = CancellationToken::new();
                schedule.playing.insert(
                    handle,
                    Scheduled {
                        conversation_id: conversation_id.to_owned(),
                        message_id: message_id.to_owned(),
                        stop: stop.clone(),
                    },
                );
                Some((handle, start_at, stop))
            }
        };

        let Some((handle, start_at, stop)) = scheduled else {
            debug!(message_id, "playback stopped while synthesizing");
            self.clear_speaking(conversation_id, message_id);
            return Ok(());
        };

        debug!(
            message_id,
            start_ms = start_at.as_millis() as u64,
            duration_ms = buffer.duration().as_millis() as u64,
            "scheduled speech"
        );
        self.output.play_at(buffer, start_at, stop).await;

        {
            let mut schedule = self.lock();
            schedule.playing.remove(&handle);
            if schedule.playing.is_empty() {
                schedule.next_free_slot = Duration::ZERO;
            }
        }
        self.clear_speaking(conversation_id, message_id);
        Ok(())
    }

    /// Stop everything that is playing or queued and reset the clock.
    ///
    /// Clears `isSpeaking` on every affected message.
    pub fn stop(&self) {
        let stopped: Vec<Scheduled> = {
            let mut schedule = self.lock();
            schedule.epoch += 1;
            schedule.next_free_slot = Duration::ZERO;
            schedule.playing.drain().map(|(_, s)| s).collect()
        };
        if stopped.is_empty() {
            return;
        }
        info!(buffers = stopped.len(), "stopping speech playback");
        for scheduled in stopped {
            scheduled.stop.cancel();
            self.clear_speaking(&scheduled.conversation_id, &scheduled.message_id);
        }
    }

    /// Whether any buffer is playing or queued.
    pub fn is_playing(&self) -> bool {
        !self.lock().playing.is_empty()
    }

    /// Clock position at which the next buffer would start, if one is queued.
    pub fn next_free_slot(&self) -> Duration {
        self.lock().next_free_slot
    }

    async fn synthesize(&self, text: &str, voice: &str) -> Result<AudioBuffer, SpeechError> {
        let _permit = self
            .synthesis
            .acquire()
            .await
            .map_err(|e| SpeechError::Audio(format!("synthesis queue closed: {e}")))?;
        let encoded = self.synthesizer.synthesize(text, voice).await?;
        decode_pcm16_base64(&encoded, self.sample_rate)
    }

    fn clear_speaking(&self, conversation_id: &str, message_id: &str) {
        let speaking = self
            .store
            .message(conversation_id, message_id)
            .is_some_and(|m| m.is_speaking == Some(true));
        if speaking
            && !self.store.update_message(
                conversation_id,
                message_id,
                MessagePatch::default().speaking(false),
            )
        {
            warn!(message_id, "could not clear speaking flag");
        }
    }
}
