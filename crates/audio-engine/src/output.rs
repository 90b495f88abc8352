//! Audio output device with a dedicated transport-command executor.
//!
//! `play()`/`pause()`/`close()` never touch the device on the calling thread. They store the
//! latest [`Command`] and signal the executor thread, which is the only thread allowed to
//! resume, suspend, or close the device stream. A caller holding its own higher-level lock can
//! therefore never deadlock against the device lock taken by the real-time callback.
//!
//! ## Threads
//! - caller: opens the device, registers the sample source, submits commands
//! - executor (`audio-command`): builds the stream, then executes commands until `Close`
//! - OS real-time thread: invokes the registered sample source through [`SourceSlot::fill`]

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::command::{Command, CommandReceiver, CommandSender, command_channel};
use crate::config::EngineConfig;
use crate::device::CpalBackend;
use crate::error::{EngineError, Result};

/// Callback that fills one output period with interleaved `f32` samples.
///
/// Runs on the OS real-time thread: it must not block, allocate, or panic.
pub type SampleSourceFn = Box<dyn FnMut(&mut [f32]) + Send>;

/// Requested output layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutputRequest {
    pub channels: u16,
    pub sample_rate: u32,
    /// Requested period size in frames.
    pub period_frames: u32,
}

impl OutputRequest {
    pub fn new(channels: u16, sample_rate: u32, config: &EngineConfig) -> Self {
        Self {
            channels,
            sample_rate,
            period_frames: config.period_frames,
        }
    }
}

/// Layout actually negotiated with the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutputFormat {
    pub channels: u16,
    pub sample_rate: u32,
    /// `None` when the device picks its own period size.
    pub period_frames: Option<u32>,
    /// Native device sample format; sources always produce `f32`.
    pub sample_format: cpal::SampleFormat,
}

/// Transport state as last applied by the executor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum DeviceState {
    Paused = 0,
    Playing = 1,
    Closed = 2,
}

impl DeviceState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => DeviceState::Playing,
            2 => DeviceState::Closed,
            _ => DeviceState::Paused,
        }
    }
}

/// Registered sample source, shared between the caller and the real-time callback.
#[derive(Clone, Default)]
pub struct SourceSlot {
    inner: Arc<Mutex<Option<SampleSourceFn>>>,
}

impl SourceSlot {
    /// Install (or replace) the source. Called from the caller thread.
    pub fn set(&self, source: SampleSourceFn) {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        *guard = Some(source);
    }

    pub fn clear(&self) {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        *guard = None;
    }

    /// Fill `out` from the registered source.
    ///
    /// Never blocks: if no source is registered or the slot is being replaced, `out` is silenced.
    pub fn fill(&self, out: &mut [f32]) {
        match self.inner.try_lock() {
            Ok(mut guard) => match guard.as_mut() {
                Some(source) => source(out),
                None => out.fill(0.0),
            },
            Err(_) => out.fill(0.0),
        }
    }
}

/// Opens devices. Runs on the caller thread.
pub trait OutputBackend {
    type Prepared: PreparedOutput;

    /// Select a device and negotiate a format close to `request`.
    fn prepare(&self, request: &OutputRequest) -> Result<Self::Prepared>;
}

/// A negotiated, not-yet-started device. Moved onto the executor thread.
pub trait PreparedOutput: Send + 'static {
    type Stream: OutputStream;

    fn format(&self) -> OutputFormat;

    /// Build the device stream in the suspended state, pulling samples from `source`.
    fn start(self, source: SourceSlot) -> Result<Self::Stream>;
}

/// A running device stream. Only ever touched by the executor thread.
pub trait OutputStream {
    fn resume(&mut self) -> anyhow::Result<()>;
    fn suspend(&mut self) -> anyhow::Result<()>;
    /// Stop and release the device.
    fn close(self);
}

/// Handle to an open output device.
pub struct OutputDevice {
    commands: CommandSender,
    source: SourceSlot,
    format: OutputFormat,
    state: Arc<AtomicU8>,
    executor: Option<JoinHandle<()>>,
}

impl OutputDevice {
    /// Open the default output device of the initialized runtime.
    pub fn open(channels: u16, sample_rate: u32) -> Result<Self> {
        let config = EngineConfig::default();
        let backend = CpalBackend::from_runtime(None)?;
        Self::open_with(&backend, OutputRequest::new(channels, sample_rate, &config))
    }

    /// Negotiate with `backend`, then start the executor thread which builds the stream.
    ///
    /// Negotiation failures return before any thread is spawned. Stream build failures are
    /// reported after the executor thread has exited.
    pub fn open_with<B: OutputBackend>(backend: &B, request: OutputRequest) -> Result<Self> {
        let prepared = backend.prepare(&request)?;
        let format = prepared.format();

        let (commands, receiver) = command_channel();
        let source = SourceSlot::default();
        let state = Arc::new(AtomicU8::new(DeviceState::Paused as u8));
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<()>>(1);

        let source_for_thread = source.clone();
        let state_for_thread = state.clone();
        let executor = thread::Builder::new()
            .name("audio-command".to_string())
            .spawn(move || {
                let stream = match prepared.start(source_for_thread) {
                    Ok(stream) => stream,
                    Err(e) => {
                        state_for_thread.store(DeviceState::Closed as u8, Ordering::SeqCst);
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                run_executor(&receiver, stream, &state_for_thread);
            })
            .map_err(|e| EngineError::DeviceOpen(format!("spawn command executor: {e}")))?;

        let started = ready_rx.recv().unwrap_or_else(|_| {
            Err(EngineError::DeviceOpen(
                "command executor exited during open".to_string(),
            ))
        });
        if let Err(e) = started {
            let _ = executor.join();
            return Err(e);
        }

        tracing::info!(
            requested_channels = request.channels,
            requested_rate_hz = request.sample_rate,
            channels = format.channels,
            rate_hz = format.sample_rate,
            period_frames = ?format.period_frames,
            sample_format = ?format.sample_format,
            "output device opened"
        );

        Ok(Self {
            commands,
            source,
            format,
            state,
            executor: Some(executor),
        })
    }

    /// Negotiated output format.
    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Register the function the real-time thread calls to fill each period.
    pub fn set_sample_source<F>(&self, source: F)
    where
        F: FnMut(&mut [f32]) + Send + 'static,
    {
        self.source.set(Box::new(source));
    }

    pub fn play(&self) {
        self.commands.submit(Command::Play);
    }

    pub fn pause(&self) {
        self.commands.submit(Command::Pause);
    }

    /// Request device shutdown. Returns immediately; see [`OutputDevice::join`].
    pub fn close(&self) {
        self.commands.submit(Command::Close);
    }

    pub fn state(&self) -> DeviceState {
        DeviceState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Block until the executor thread has terminated. Only returns after a `close()`.
    pub fn join(mut self) {
        if let Some(handle) = self.executor.take() {
            if handle.join().is_err() {
                tracing::warn!("command executor panicked");
            }
        }
    }
}

impl Drop for OutputDevice {
    fn drop(&mut self) {
        if self.state() != DeviceState::Closed && self.commands.latest() != Command::Close {
            self.commands.submit(Command::Close);
        }
    }
}

/// Executor loop: apply the latest command on every wake-up until `Close`.
///
/// A receiver whose senders are all gone is treated as `Close`.
pub(crate) fn run_executor<S: OutputStream>(receiver: &CommandReceiver, mut stream: S, state: &AtomicU8) {
    loop {
        let command = receiver.wait().unwrap_or(Command::Close);
        tracing::debug!(?command, "executing transport command");
        match command {
            Command::Play => match stream.resume() {
                Ok(()) => state.store(DeviceState::Playing as u8, Ordering::SeqCst),
                Err(e) => tracing::warn!("device resume failed: {e:#}"),
            },
            Command::Pause => match stream.suspend() {
                Ok(()) => state.store(DeviceState::Paused as u8, Ordering::SeqCst),
                Err(e) => tracing::warn!("device suspend failed: {e:#}"),
            },
            Command::Close => {
                stream.close();
                state.store(DeviceState::Closed as u8, Ordering::SeqCst);
                break;
            }
            Command::None => {}
        }
    }
}
