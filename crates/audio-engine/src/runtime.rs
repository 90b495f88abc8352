//! Process-wide audio subsystem lifecycle.
//!
//! The surrounding application calls [`initialize`] once before opening output devices and
//! [`shutdown`] before exit. [`reinitialize`] switches the audio host (driver), e.g. between
//! test runs.

use std::sync::{Mutex, MutexGuard};

use crate::config::RuntimeConfig;
use crate::error::{EngineError, Result};

static HOST: Mutex<Option<cpal::HostId>> = Mutex::new(None);

fn lock() -> MutexGuard<'static, Option<cpal::HostId>> {
    HOST.lock().unwrap_or_else(|e| e.into_inner())
}

/// Bring the audio subsystem up with the default host. No-op if already up.
pub fn initialize() -> Result<()> {
    initialize_with(&RuntimeConfig::default())
}

/// Bring the audio subsystem up with `config`. No-op if already up (the existing host is kept).
pub fn initialize_with(config: &RuntimeConfig) -> Result<()> {
    let mut guard = lock();
    if guard.is_some() {
        return Ok(());
    }
    let id = resolve_host(config)?;
    // Build the codec/format registries here rather than on the first decode.
    let _ = symphonia::default::get_probe();
    let _ = symphonia::default::get_codecs();
    *guard = Some(id);
    tracing::info!(host = id.name(), "audio subsystem initialized");
    Ok(())
}

/// Shut the subsystem down (if up) and bring it back with `config`.
pub fn reinitialize(config: &RuntimeConfig) -> Result<()> {
    let mut guard = lock();
    if let Some(prev) = guard.take() {
        tracing::info!(host = prev.name(), "audio subsystem shut down for reinitialize");
    }
    let id = resolve_host(config)?;
    *guard = Some(id);
    tracing::info!(host = id.name(), "audio subsystem reinitialized");
    Ok(())
}

/// Shut the subsystem down. Safe to call when it is not up.
pub fn shutdown() {
    if let Some(id) = lock().take() {
        tracing::info!(host = id.name(), "audio subsystem shut down");
    }
}

pub fn is_initialized() -> bool {
    lock().is_some()
}

/// The active host id, if initialized.
pub fn host_id() -> Option<cpal::HostId> {
    *lock()
}

/// A handle to the active host.
pub fn host() -> Result<cpal::Host> {
    let id = host_id().ok_or(EngineError::NotInitialized)?;
    cpal::host_from_id(id).map_err(|e| EngineError::DeviceOpen(format!("{}: {e}", id.name())))
}

fn resolve_host(config: &RuntimeConfig) -> Result<cpal::HostId> {
    match config.host.as_deref() {
        None => Ok(cpal::default_host().id()),
        Some(name) => cpal::available_hosts()
            .into_iter()
            .find(|id| id.name().eq_ignore_ascii_case(name.trim()))
            .ok_or_else(|| EngineError::DeviceOpen(format!("audio host not available: {name}"))),
    }
}
