//! Symphonia-backed decode backend.
//!
//! Uses Symphonia to:
//! - probe the input container/codec and latch the first audio track's layout
//! - decode packets into interleaved `f32` samples on demand
//! - seek accurately (trimming decoded frames up to the requested timestamp)
//! - discover duration and title/artist/album tags

use std::fs::File;
use std::io;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use symphonia::core::audio::{SampleBuffer, SignalSpec};
use symphonia::core::codecs::{CODEC_TYPE_NULL, CodecParameters, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo, Track};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{MetadataOptions, MetadataRevision, StandardTagKey};
use symphonia::core::probe::{Hint, ProbeResult};
use symphonia::core::units::{Time, TimeBase};

use crate::backend::{
    DecodeBackend, DecodeStream, Discoverer, Discovery, SeekOutcome, SinkCaps, StreamFormat, Tags,
    uri_to_path,
};
use crate::error::BackendError;

/// Decode backend for local files, built on Symphonia's default codec/format registry.
#[derive(Clone, Copy, Debug, Default)]
pub struct SymphoniaBackend;

impl DecodeBackend for SymphoniaBackend {
    type Discoverer = SymphoniaDiscoverer;
    type Stream = SymphoniaStream;

    fn discoverer(&self, timeout: Duration) -> Result<Self::Discoverer, BackendError> {
        Ok(SymphoniaDiscoverer {
            timeout,
            worker: None,
        })
    }

    fn open_stream(&self, path: &Path, caps: &SinkCaps) -> Result<Self::Stream, BackendError> {
        SymphoniaStream::open(path, caps)
    }
}

/// Runs each discovery on a worker thread so a stuck probe is bounded by `timeout`.
///
/// A worker that overruns the timeout is cancelled and reaped before the next discovery
/// starts, or when the discoverer is dropped.
pub struct SymphoniaDiscoverer {
    timeout: Duration,
    worker: Option<DiscoverWorker>,
}

struct DiscoverWorker {
    handle: JoinHandle<()>,
    cancel: Arc<AtomicBool>,
    result: Receiver<Result<Discovery, BackendError>>,
}

impl SymphoniaDiscoverer {
    /// Cancel and join an overrunning worker, waiting at most `wait` for it to notice.
    ///
    /// Returns `false` if the worker is stuck in a blocking call and had to be detached.
    fn reap(&mut self, wait: Duration) -> bool {
        let Some(worker) = self.worker.take() else {
            return true;
        };
        worker.cancel.store(true, Ordering::SeqCst);
        match worker.result.recv_timeout(wait) {
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    wait_ms = wait.as_millis() as u64,
                    "discovery worker still blocked, detaching"
                );
                false
            }
            _ => {
                let _ = worker.handle.join();
                true
            }
        }
    }
}

impl Discoverer for SymphoniaDiscoverer {
    fn discover(&mut self, uri: &str) -> Result<Discovery, BackendError> {
        self.reap(self.timeout);

        let path = uri_to_path(uri);
        let cancel = Arc::new(AtomicBool::new(false));
        let worker_cancel = cancel.clone();
        let (tx, rx) = crossbeam_channel::bounded(1);
        let handle = thread::Builder::new()
            .name("audio-discover".to_string())
            .spawn(move || {
                let _ = tx.send(discover_path(&path, &worker_cancel));
            })?;

        match rx.recv_timeout(self.timeout) {
            Ok(result) => {
                let _ = handle.join();
                result
            }
            Err(RecvTimeoutError::Timeout) => {
                cancel.store(true, Ordering::SeqCst);
                self.worker = Some(DiscoverWorker {
                    handle,
                    cancel,
                    result: rx,
                });
                Err(BackendError::Timeout(self.timeout))
            }
            Err(RecvTimeoutError::Disconnected) => {
                let _ = handle.join();
                Err(BackendError::Discovery(
                    "discovery worker exited without a result".to_string(),
                ))
            }
        }
    }
}

impl Drop for SymphoniaDiscoverer {
    fn drop(&mut self) {
        self.reap(self.timeout);
    }
}

fn cancelled() -> BackendError {
    BackendError::Discovery("discovery cancelled".to_string())
}

/// Probe `path`, read tags, and determine the audio track duration.
///
/// Stops early with an error once `cancel` is set.
fn discover_path(path: &Path, cancel: &AtomicBool) -> Result<Discovery, BackendError> {
    let mut probed = probe_file(path)?;
    if cancel.load(Ordering::Relaxed) {
        return Err(cancelled());
    }

    let mut tags = Tags::default();
    if let Some(rev) = probed.format.metadata().current() {
        collect_tags(rev, &mut tags);
    }
    if let Some(meta) = probed.metadata.get() {
        if let Some(rev) = meta.current() {
            collect_tags(rev, &mut tags);
        }
    }

    let track = select_audio_track(probed.format.tracks())
        .ok_or_else(|| BackendError::NoAudioStream(path.display().to_string()))?;
    let track_id = track.id;
    let params = track.codec_params.clone();

    let duration = match duration_secs_from_codec_params(&params) {
        Some(secs) => secs,
        None => measure_duration(probed.format.as_mut(), track_id, &params, cancel)
            .ok_or_else(cancelled)?,
    };

    Ok(Discovery { duration, tags })
}

/// Open and probe a file, mapping probe failures to backend errors.
fn probe_file(path: &Path) -> Result<ProbeResult, BackendError> {
    let file = File::open(path)?;

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|err| match err {
            SymphoniaError::IoError(e) if e.kind() != io::ErrorKind::UnexpectedEof => {
                BackendError::Io(e)
            }
            other => BackendError::Unrecognized(format!("{}: {other}", path.display())),
        })
}

/// First track that carries decodable audio with a known layout.
fn select_audio_track(tracks: &[Track]) -> Option<&Track> {
    tracks.iter().find(|t| {
        t.codec_params.codec != CODEC_TYPE_NULL
            && t.codec_params.sample_rate.is_some()
            && t.codec_params.channels.is_some()
    })
}

fn collect_tags(rev: &MetadataRevision, tags: &mut Tags) {
    for tag in rev.tags() {
        let slot = match tag.std_key {
            Some(StandardTagKey::TrackTitle) => &mut tags.title,
            Some(StandardTagKey::Artist) => &mut tags.artist,
            Some(StandardTagKey::Album) => &mut tags.album,
            _ => continue,
        };
        if slot.is_none() {
            let value = tag.value.to_string();
            let value = value.trim_end_matches('\0').trim();
            if !value.is_empty() {
                *slot = Some(value.to_string());
            }
        }
    }
}

/// Duration in seconds from codec metadata.
///
/// Returns `None` if the container does not provide total frames or sample rate.
fn duration_secs_from_codec_params(codec_params: &CodecParameters) -> Option<f64> {
    let frames = codec_params.n_frames?;
    let rate = codec_params.sample_rate?;
    if rate == 0 {
        return None;
    }
    Some(frames as f64 / rate as f64)
}

/// Sum packet durations for `track_id`. Returns `0.0` if nothing could be read and `None`
/// if `cancel` was set during the scan.
fn measure_duration(
    format: &mut dyn FormatReader,
    track_id: u32,
    params: &CodecParameters,
    cancel: &AtomicBool,
) -> Option<f64> {
    let mut total: u64 = 0;
    while let Ok(packet) = format.next_packet() {
        if cancel.load(Ordering::Relaxed) {
            return None;
        }
        if packet.track_id() == track_id {
            total = total.saturating_add(packet.dur());
        }
    }
    Some(ts_to_secs(total, params.time_base, params.sample_rate))
}

fn ts_to_secs(ts: u64, time_base: Option<TimeBase>, sample_rate: Option<u32>) -> f64 {
    match (time_base, sample_rate) {
        (Some(tb), _) => {
            let t = tb.calc_time(ts);
            t.seconds as f64 + t.frac
        }
        (None, Some(rate)) if rate > 0 => ts as f64 / rate as f64,
        _ => 0.0,
    }
}

/// Best-effort codec label used for logging.
fn codec_name_from_params(params: &CodecParameters) -> Option<&'static str> {
    use symphonia::core::codecs::*;
    let name = match params.codec {
        CODEC_TYPE_FLAC => "FLAC",
        CODEC_TYPE_MP3 => "MP3",
        CODEC_TYPE_AAC => "AAC",
        CODEC_TYPE_ALAC => "ALAC",
        CODEC_TYPE_VORBIS => "VORBIS",
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE => "PCM_S16",
        CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE => "PCM_S24",
        CODEC_TYPE_PCM_S32LE | CODEC_TYPE_PCM_S32BE => "PCM_S32",
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => "PCM_F32",
        _ => return None,
    };
    Some(name)
}

/// Whether an interleaved scratch of `buf_samples` samples laid out as `buf_spec` can take a
/// decoded buffer of `frames` frames laid out as `spec`.
fn scratch_fits(
    buf_samples: usize,
    buf_spec: Option<SignalSpec>,
    frames: usize,
    spec: SignalSpec,
) -> bool {
    buf_spec == Some(spec) && buf_samples >= frames * spec.channels.count()
}

/// An opened file decoding into interleaved `f32`.
pub struct SymphoniaStream {
    path: PathBuf,
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    time_base: Option<TimeBase>,
    spec: StreamFormat,
    scratch: Option<SampleBuffer<f32>>,
    scratch_spec: Option<SignalSpec>,
    /// Decoded block held back for the next pull (preroll).
    pending: Option<Range<usize>>,
    /// Accurate-seek target; frames before it are dropped.
    skip_until: Option<u64>,
    position_ts: u64,
    eos: bool,
    stopped: bool,
}

impl SymphoniaStream {
    fn open(path: &Path, caps: &SinkCaps) -> Result<Self, BackendError> {
        let probed = probe_file(path)?;
        let format = probed.format;

        let track = select_audio_track(format.tracks())
            .ok_or_else(|| BackendError::NoAudioStream(path.display().to_string()))?;
        let track_id = track.id;
        let params = track.codec_params.clone();

        let (Some(rate), Some(layout)) = (params.sample_rate, params.channels) else {
            return Err(BackendError::NoAudioStream(path.display().to_string()));
        };
        let channels = u16::try_from(layout.count()).unwrap_or(u16::MAX);
        if !caps.accepts(channels, rate) {
            return Err(BackendError::NoAudioStream(format!(
                "{}: {channels} channels @ {rate} Hz outside sink caps",
                path.display()
            )));
        }

        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| BackendError::Decoder(e.to_string()))?;

        tracing::debug!(
            path = %path.display(),
            codec = codec_name_from_params(&params).unwrap_or("unknown"),
            channels,
            rate_hz = rate,
            "audio stream linked"
        );

        let mut stream = Self {
            path: path.to_path_buf(),
            format,
            decoder,
            track_id,
            time_base: params.time_base,
            spec: StreamFormat {
                channels,
                sample_rate: rate,
            },
            scratch: None,
            scratch_spec: None,
            pending: None,
            skip_until: None,
            position_ts: 0,
            eos: false,
            stopped: false,
        };
        stream.pending = stream.decode_next();
        Ok(stream)
    }

    /// Decode the next packet of our track into `scratch` and return the valid sample range.
    fn decode_next(&mut self) -> Option<Range<usize>> {
        if self.eos || self.stopped {
            return None;
        }

        loop {
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    self.eos = true;
                    return None;
                }
                Err(e) => {
                    tracing::warn!(path = %self.path.display(), error = %e, "demux error, treating as end of stream");
                    self.eos = true;
                    return None;
                }
            };
            if packet.track_id() != self.track_id {
                continue;
            }

            let ts = packet.ts();
            let end_ts = ts.saturating_add(packet.dur());
            if let Some(target) = self.skip_until {
                if end_ts <= target {
                    // Keep decoder state warm without emitting samples.
                    let _ = self.decoder.decode(&packet);
                    continue;
                }
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(msg)) => {
                    tracing::debug!(error = msg, "skipping undecodable packet");
                    continue;
                }
                Err(SymphoniaError::IoError(_)) => continue,
                Err(e) => {
                    tracing::warn!(path = %self.path.display(), error = %e, "decoder error, treating as end of stream");
                    self.eos = true;
                    return None;
                }
            };

            let frames = decoded.frames();
            if frames == 0 {
                continue;
            }
            let signal_spec = *decoded.spec();
            let channels = signal_spec.channels.count();

            let fits = self.scratch.as_ref().is_some_and(|buf| {
                scratch_fits(buf.capacity(), self.scratch_spec, decoded.capacity(), signal_spec)
            });
            if !fits {
                self.scratch = Some(SampleBuffer::new(decoded.capacity() as u64, signal_spec));
                self.scratch_spec = Some(signal_spec);
            }
            let scratch = self.scratch.as_mut()?;
            scratch.copy_interleaved_ref(decoded);

            let skip_frames = match self.skip_until.take() {
                Some(target) => (target.saturating_sub(ts) as usize).min(frames),
                None => 0,
            };
            self.position_ts = ts + skip_frames as u64;

            let len = scratch.samples().len();
            return Some((skip_frames * channels).min(len)..len);
        }
    }

    fn ts_secs(&self, ts: u64) -> f64 {
        ts_to_secs(ts, self.time_base, Some(self.spec.sample_rate))
    }
}

impl DecodeStream for SymphoniaStream {
    fn format(&self) -> StreamFormat {
        self.spec
    }

    fn pull(&mut self) -> Option<&[f32]> {
        let range = match self.pending.take() {
            Some(range) => range,
            None => self.decode_next()?,
        };
        self.scratch.as_ref().map(|buf| &buf.samples()[range])
    }

    fn seek(&mut self, seconds: f64, wait: Duration) -> SeekOutcome {
        if self.stopped {
            return SeekOutcome::Failed("stream is stopped".to_string());
        }
        let started = Instant::now();
        let seconds = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };
        let time = Time::new(seconds.trunc() as u64, seconds.fract());

        let seeked = match self.format.seek(
            SeekMode::Accurate,
            SeekTo::Time {
                time,
                track_id: Some(self.track_id),
            },
        ) {
            Ok(s) => s,
            Err(e) => return SeekOutcome::Failed(e.to_string()),
        };

        // Flush.
        self.decoder.reset();
        self.pending = None;
        self.eos = false;
        self.skip_until = Some(seeked.required_ts);
        self.position_ts = seeked.required_ts;

        self.pending = self.decode_next();

        if started.elapsed() > wait {
            SeekOutcome::Pending
        } else {
            SeekOutcome::Completed
        }
    }

    fn query_position(&self) -> Option<f64> {
        if self.stopped {
            return None;
        }
        Some(self.ts_secs(self.position_ts))
    }

    fn is_eos(&self) -> bool {
        self.eos
    }

    fn stop(&mut self) {
        self.stopped = true;
        self.pending = None;
        self.scratch = None;
        self.scratch_spec = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use symphonia::core::audio::Channels;
    use symphonia::core::codecs::*;

    #[test]
    fn duration_secs_from_codec_params_handles_zero_rate() {
        let mut params = CodecParameters::new();
        params.sample_rate = Some(0);
        params.n_frames = Some(100);
        assert!(duration_secs_from_codec_params(&params).is_none());
    }

    #[test]
    fn duration_secs_from_codec_params_computes() {
        let mut params = CodecParameters::new();
        params.sample_rate = Some(48_000);
        params.n_frames = Some(96_000);
        let secs = duration_secs_from_codec_params(&params).unwrap();
        assert!((secs - 2.0).abs() < 1e-9);
    }

    #[test]
    fn duration_secs_requires_frame_count() {
        let mut params = CodecParameters::new();
        params.sample_rate = Some(44_100);
        assert!(duration_secs_from_codec_params(&params).is_none());
    }

    #[test]
    fn ts_to_secs_prefers_time_base() {
        let tb = TimeBase::new(1, 1000);
        assert!((ts_to_secs(1500, Some(tb), Some(44_100)) - 1.5).abs() < 1e-9);
        assert!((ts_to_secs(22_050, None, Some(44_100)) - 0.5).abs() < 1e-9);
        assert_eq!(ts_to_secs(10, None, None), 0.0);
    }

    #[test]
    fn codec_name_from_params_maps_known_codecs() {
        let mut params = CodecParameters::new();
        params.codec = CODEC_TYPE_FLAC;
        assert_eq!(codec_name_from_params(&params), Some("FLAC"));
        params.codec = CODEC_TYPE_PCM_S16LE;
        assert_eq!(codec_name_from_params(&params), Some("PCM_S16"));
    }

    #[test]
    fn codec_name_from_params_unknown_returns_none() {
        let params = CodecParameters::new();
        assert!(codec_name_from_params(&params).is_none());
    }

    #[test]
    fn select_audio_track_skips_null_codec() {
        let null_track = Track::new(0, CodecParameters::new());
        let mut params = CodecParameters::new();
        params
            .for_codec(CODEC_TYPE_PCM_S16LE)
            .with_sample_rate(44_100)
            .with_channels(Channels::FRONT_LEFT | Channels::FRONT_RIGHT);
        let audio_track = Track::new(1, params);
        let tracks = vec![null_track, audio_track];
        assert_eq!(select_audio_track(&tracks).map(|t| t.id), Some(1));
    }

    fn write_wav(dir: &Path, frames: u32) -> PathBuf {
        let path = dir.join("tone.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 44_100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for n in 0..frames {
            let s = ((n % 100) as i16 - 50) * 100;
            writer.write_sample(s).unwrap();
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
        path
    }

    #[test]
    fn scratch_fits_counts_samples_not_frames() {
        let stereo = SignalSpec::new(44_100, Channels::FRONT_LEFT | Channels::FRONT_RIGHT);
        let mono = SignalSpec::new(44_100, Channels::FRONT_LEFT);
        assert!(scratch_fits(2048, Some(stereo), 1024, stereo));
        assert!(!scratch_fits(1024, Some(stereo), 1024, stereo));
        assert!(!scratch_fits(4096, Some(mono), 1024, stereo));
        assert!(!scratch_fits(4096, None, 1024, stereo));
    }

    #[test]
    fn measure_duration_sums_packets_of_real_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_wav(dir.path(), 44_100);
        let mut probed = probe_file(&path).unwrap();
        let track = select_audio_track(probed.format.tracks()).unwrap();
        let (id, params) = (track.id, track.codec_params.clone());

        let cancel = AtomicBool::new(false);
        let secs = measure_duration(probed.format.as_mut(), id, &params, &cancel).unwrap();
        assert!((secs - 1.0).abs() < 0.01, "measured {secs}");
    }

    #[test]
    fn measure_duration_stops_when_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_wav(dir.path(), 44_100);
        let mut probed = probe_file(&path).unwrap();
        let track = select_audio_track(probed.format.tracks()).unwrap();
        let (id, params) = (track.id, track.codec_params.clone());

        let cancel = AtomicBool::new(true);
        assert!(measure_duration(probed.format.as_mut(), id, &params, &cancel).is_none());
    }

    #[test]
    fn discover_path_honours_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_wav(dir.path(), 4_410);
        let err = discover_path(&path, &AtomicBool::new(true)).err().unwrap();
        assert!(matches!(err, BackendError::Discovery(msg) if msg.contains("cancelled")));

        let found = discover_path(&path, &AtomicBool::new(false)).unwrap();
        assert!((found.duration - 0.1).abs() < 0.01);
    }

    #[test]
    fn discoverer_joins_worker_after_success() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_wav(dir.path(), 4_410);
        let mut discoverer = SymphoniaBackend.discoverer(Duration::from_secs(5)).unwrap();
        let found = discoverer.discover(path.to_str().unwrap()).unwrap();
        assert!(found.duration > 0.0);
        assert!(discoverer.worker.is_none());
    }

    #[cfg(unix)]
    #[test]
    fn timed_out_worker_is_cancelled_and_reaped() {
        let dir = tempfile::tempdir().unwrap();
        let fifo = dir.path().join("stall.wav");
        let status = std::process::Command::new("mkfifo").arg(&fifo).status().unwrap();
        assert!(status.success());

        let mut discoverer = SymphoniaBackend.discoverer(Duration::from_millis(100)).unwrap();
        let err = discoverer.discover(fifo.to_str().unwrap()).err().unwrap();
        assert!(matches!(err, BackendError::Timeout(_)));
        let cancel = discoverer.worker.as_ref().unwrap().cancel.clone();
        assert!(cancel.load(Ordering::SeqCst));

        // Unblock the worker's open(); it then sees an empty stream and exits.
        let writer_path = fifo.clone();
        let writer = thread::spawn(move || {
            let _ = std::fs::OpenOptions::new().write(true).open(&writer_path);
        });
        assert!(discoverer.reap(Duration::from_secs(5)));
        assert!(discoverer.worker.is_none());
        writer.join().unwrap();
    }

    #[test]
    fn open_missing_file_is_io_error() {
        let caps = crate::EngineConfig::default().sink_caps();
        let err = SymphoniaStream::open(Path::new("/nonexistent/audio-engine.wav"), &caps)
            .err()
            .unwrap();
        assert!(matches!(err, BackendError::Io(_)));
    }
}
