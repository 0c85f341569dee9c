// Dummy backend - discards audio at the pace of a real device
//
// Installed whenever no real backend is available so that the ticker
// always has a valid output to write to.

use std::thread;
use std::time::{Duration, Instant};

use super::{Backend, BackendId, BackendResult, BackendState, DeviceInfo, require_state};
use crate::audio::spec::StreamSpec;

/// Amount of audio the simulated device buffers ahead of real time
const DEVICE_BUFFER: Duration = Duration::from_millis(100);

#[derive(Debug)]
pub struct DummyBackend {
    state: BackendState,
    spec: StreamSpec,
    started_at: Option<Instant>,
    /// Audio accepted since start
    written: Duration,
}

impl DummyBackend {
    pub fn new() -> Self {
        Self {
            state: BackendState::Config,
            spec: StreamSpec::default(),
            started_at: None,
            written: Duration::ZERO,
        }
    }

    /// Audio written but not yet "played"
    fn ahead(&self) -> Duration {
        match self.started_at {
            Some(start) => self.written.saturating_sub(start.elapsed()),
            None => Duration::ZERO,
        }
    }
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for DummyBackend {
    fn id(&self) -> BackendId {
        BackendId::Dummy
    }

    fn devices(&mut self) -> BackendResult<Vec<DeviceInfo>> {
        Ok(vec![DeviceInfo {
            id: "dummy".to_string(),
            name: "Dummy output".to_string(),
            is_default: true,
        }])
    }

    fn configure(&mut self, spec: StreamSpec) -> BackendResult<()> {
        require_state(self.id(), self.state, BackendState::Config, "configure")?;
        self.spec = spec;
        Ok(())
    }

    fn open(&mut self) -> BackendResult<StreamSpec> {
        require_state(self.id(), self.state, BackendState::Config, "open")?;
        self.state = BackendState::Open;
        Ok(self.spec)
    }

    fn close(&mut self) -> BackendResult<()> {
        require_state(self.id(), self.state, BackendState::Open, "close")?;
        self.state = BackendState::Config;
        Ok(())
    }

    fn start(&mut self) -> BackendResult<()> {
        require_state(self.id(), self.state, BackendState::Open, "start")?;
        self.started_at = Some(Instant::now());
        self.written = Duration::ZERO;
        self.state = BackendState::Running;
        Ok(())
    }

    fn stop(&mut self) -> BackendResult<()> {
        require_state(self.id(), self.state, BackendState::Running, "stop")?;
        self.drain()?;
        self.started_at = None;
        self.state = BackendState::Open;
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> BackendResult<()> {
        require_state(self.id(), self.state, BackendState::Running, "write")?;
        self.written += self.spec.bytes_to_duration(data.len());

        let ahead = self.ahead();
        if ahead > DEVICE_BUFFER {
            thread::sleep(ahead - DEVICE_BUFFER);
        }
        Ok(())
    }

    fn flush(&mut self) -> BackendResult<()> {
        if let Some(start) = self.started_at {
            self.written = start.elapsed();
        }
        Ok(())
    }

    fn drain(&mut self) -> BackendResult<()> {
        let ahead = self.ahead();
        if !ahead.is_zero() {
            thread::sleep(ahead);
        }
        Ok(())
    }

    fn latency(&self) -> Duration {
        self.ahead()
    }

    fn state(&self) -> BackendState {
        self.state
    }
}
