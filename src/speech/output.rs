//! Playback sinks.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::SpeechError;
use super::pcm::AudioBuffer;

/// A sink that plays buffers at positions on its own clock.
#[async_trait]
pub trait AudioOutput: Send + Sync {
    /// Current position of the output clock.
    fn now(&self) -> Duration;

    /// Play `buffer` starting at clock position `start_at`.
    ///
    /// Resolves when the buffer finishes or `stop` fires, whichever is first.
    async fn play_at(&self, buffer: AudioBuffer, start_at: Duration, stop: CancellationToken);
}

/// Paces buffers in real time without a device.
///
/// Runs on the tokio clock, so a paused test runtime drives it
/// deterministically.
#[derive(Debug)]
pub struct TimedOutput {
    origin: Instant,
}

impl TimedOutput {
    /// Start a new output clock at zero.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for TimedOutput {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioOutput for TimedOutput {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    async fn play_at(&self, buffer: AudioBuffer, start_at: Duration, stop: CancellationToken) {
        let end = self.origin + start_at + buffer.duration();
        tokio::select! {
            () = stop.cancelled() => {
                tracing::debug!("playback stopped");
            }
            () = tokio::time::sleep_until(end) => {}
        }
    }
}

/// Writes each buffer to a numbered 16-bit WAV file, then paces it like
/// [`TimedOutput`].
#[derive(Debug)]
pub struct WavRecorder {
    dir: PathBuf,
    clock: TimedOutput,
    written: AtomicU64,
}

impl WavRecorder {
    /// Record into `dir`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`SpeechError::Audio`] if the directory cannot be created.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, SpeechError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| SpeechError::Audio(format!("cannot create {}: {e}", dir.display())))?;
        Ok(Self {
            dir,
            clock: TimedOutput::new(),
            written: AtomicU64::new(0),
        })
    }

    /// Number of files written so far.
    pub fn written(&self) -> u64 {
        self.written.load(Ordering::SeqCst)
    }
}

/// Write `buffer` as mono 16-bit PCM.
pub fn write_wav(path: &std::path::Path, buffer: &AudioBuffer) -> Result<(), SpeechError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: buffer.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .map_err(|e| SpeechError::Audio(format!("cannot create {}: {e}", path.display())))?;
    for sample in &buffer.samples {
        let value = (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16;
        writer
            .write_sample(value)
            .map_err(|e| SpeechError::Audio(format!("WAV write failed: {e}")))?;
    }
    writer
        .finalize()
        .map_err(|e| SpeechError::Audio(format!("WAV finalize failed: {e}")))
}

#[async_trait]
impl AudioOutput for WavRecorder {
    fn now(&self) -> Duration {
        self.clock.now()
    }

    async fn play_at(&self, buffer: AudioBuffer, start_at: Duration, stop: CancellationToken) {
        let index = self.written.fetch_add(1, Ordering::SeqCst) + 1;
        let path = self.dir.join(format!("reply-{index:04}.wav"));
        let to_write = buffer.clone();
        let target = path.clone();
        match tokio::task::spawn_blocking(move || write_wav(&target, &to_write)).await {
            Ok(Ok(())) => tracing::info!(path = %path.display(), "speech recorded"),
            Ok(Err(e)) => tracing::warn!(error = %e, "failed to record speech"),
            Err(e) => tracing::warn!(error = %e, "speech recording task failed"),
        }
        self.clock.play_at(buffer, start_at, stop).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(ms: usize) -> AudioBuffer {
        AudioBuffer {
            samples: vec![0.0; ms],
            sample_rate: 1_000,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn play_lasts_for_buffer_duration() {
        let output = TimedOutput::new();
        output
            .play_at(buffer(250), Duration::ZERO, CancellationToken::new())
            .await;
        assert_eq!(output.now(), Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn play_waits_for_start_slot() {
        let output = TimedOutput::new();
        output
            .play_at(buffer(100), Duration::from_millis(400), CancellationToken::new())
            .await;
        assert_eq!(output.now(), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_ends_playback_early() {
        let output = TimedOutput::new();
        let stop = CancellationToken::new();
        stop.cancel();
        output.play_at(buffer(10_000), Duration::ZERO, stop).await;
        assert_eq!(output.now(), Duration::ZERO);
    }

    #[test]
    fn wav_file_round_trips_sample_count() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| unreachable!("tempdir: {e}"));
        let path = dir.path().join("out.wav");
        let result = write_wav(&path, &buffer(480));
        assert!(result.is_ok());
        let reader = hound::WavReader::open(&path).map(|r| (r.spec().sample_rate, r.len()));
        assert_eq!(reader.ok(), Some((1_000, 480)));
    }

    #[tokio::test]
    async fn recorder_writes_numbered_files() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| unreachable!("tempdir: {e}"));
        let recorder = WavRecorder::new(dir.path().join("speech"));
        let recorder = recorder.unwrap_or_else(|e| unreachable!("recorder: {e}"));
        recorder
            .play_at(buffer(5), Duration::ZERO, CancellationToken::new())
            .await;
        assert_eq!(recorder.written(), 1);
        assert!(dir.path().join("speech").join("reply-0001.wav").exists());
    }
}
