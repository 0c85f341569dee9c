// Cpal backend - push-style output on top of cpal's pull-style callback
//
// `write` decodes the PCM bytes into f32 samples and pushes them into a
// lock-free ring buffer; the cpal callback pops them and converts to the
// device sample format (F32, I16 or U16).
//
// cpal streams are not Send, so the stream lives on its own small thread
// which is driven through a command channel. This keeps the backend
// itself movable between the control and the audio thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, SizedSample, Stream, StreamConfig, SupportedStreamConfig};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use super::{
    Backend, BackendError, BackendErrorKind, BackendId, BackendResult, BackendState, DeviceInfo,
    require_state,
};
use crate::audio::spec::StreamSpec;

/// Capacity of the sample FIFO
const FIFO_DURATION: Duration = Duration::from_millis(250);

/// Upper bound for `drain`
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Longest `write` waits for the callback to free any space
const WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Reply timeout of the stream thread
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamCommand {
    Play,
    Pause,
    Close,
}

/// State shared with the cpal callbacks
struct CallbackState {
    flush: AtomicBool,
    failed: AtomicBool,
}

struct StreamHandle {
    commands: mpsc::Sender<StreamCommand>,
    replies: mpsc::Receiver<Result<(), String>>,
    thread: JoinHandle<()>,
    producer: HeapProd<f32>,
}

pub struct CpalBackend {
    state: BackendState,
    device_name: Option<String>,
    requested: StreamSpec,
    spec: StreamSpec,
    stream: Option<StreamHandle>,
    callback: Arc<CallbackState>,
    /// Decoded samples of the current write
    scratch: Vec<f32>,
}

impl CpalBackend {
    /// Backend on the default output device
    pub fn new() -> Self {
        Self {
            state: BackendState::Config,
            device_name: None,
            requested: StreamSpec::default(),
            spec: StreamSpec::default(),
            stream: None,
            callback: Arc::new(CallbackState {
                flush: AtomicBool::new(false),
                failed: AtomicBool::new(false),
            }),
            scratch: Vec::new(),
        }
    }

    /// Backend on the output device called `name`
    pub fn with_device(name: impl Into<String>) -> Self {
        let mut backend = Self::new();
        backend.device_name = Some(name.into());
        backend
    }

    /// Selects the output device (Config state only)
    pub fn set_device(&mut self, name: Option<String>) -> BackendResult<()> {
        require_state(self.id(), self.state, BackendState::Config, "set_device")?;
        self.device_name = name;
        Ok(())
    }

    fn error(&self, message: impl Into<String>) -> BackendError {
        BackendError::device(self.id(), self.state, message)
    }

    fn send(&mut self, command: StreamCommand) -> BackendResult<()> {
        let Some(stream) = self.stream.as_ref() else {
            return Err(self.error("no stream"));
        };
        if stream.commands.send(command).is_err() {
            return Err(self.error("stream thread is gone"));
        }
        match stream.replies.recv_timeout(REPLY_TIMEOUT) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(message)) => Err(self.error(message)),
            Err(_) => Err(self.error(format!("no reply to {:?}", command))),
        }
    }

    fn check_callback(&self) -> BackendResult<()> {
        if self.callback.failed.load(Ordering::Acquire) {
            Err(self.error("stream reported an error"))
        } else {
            Ok(())
        }
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for CpalBackend {
    fn id(&self) -> BackendId {
        BackendId::Cpal
    }

    fn devices(&mut self) -> BackendResult<Vec<DeviceInfo>> {
        let host = cpal::default_host();
        let default_name = host
            .default_output_device()
            .and_then(|d| d.name().ok())
            .unwrap_or_default();

        let devices = host
            .output_devices()
            .map_err(|e| self.error(format!("cannot enumerate devices: {}", e)))?;

        Ok(devices
            .enumerate()
            .filter_map(|(index, device)| {
                let name = device.name().ok()?;
                Some(DeviceInfo {
                    id: format!("audio_out_{}", index),
                    is_default: name == default_name,
                    name,
                })
            })
            .collect())
    }

    fn configure(&mut self, spec: StreamSpec) -> BackendResult<()> {
        require_state(self.id(), self.state, BackendState::Config, "configure")?;
        self.requested = spec;
        Ok(())
    }

    fn open(&mut self) -> BackendResult<StreamSpec> {
        require_state(self.id(), self.state, BackendState::Config, "open")?;

        self.callback.flush.store(false, Ordering::Release);
        self.callback.failed.store(false, Ordering::Release);

        let (setup_tx, setup_rx) = mpsc::channel();
        let (command_tx, command_rx) = mpsc::channel();
        let (reply_tx, reply_rx) = mpsc::channel();

        let device_name = self.device_name.clone();
        let requested = self.requested;
        let callback = Arc::clone(&self.callback);

        let thread = thread::Builder::new()
            .name("gmetronome-cpal".to_string())
            .spawn(move || {
                stream_thread(
                    device_name,
                    requested,
                    callback,
                    setup_tx,
                    command_rx,
                    reply_tx,
                )
            })
            .map_err(|e| self.error(format!("cannot spawn stream thread: {}", e)))?;

        let (spec, producer) = match setup_rx.recv_timeout(REPLY_TIMEOUT) {
            Ok(Ok(setup)) => setup,
            Ok(Err(message)) => {
                let _ = thread.join();
                return Err(BackendError::new(
                    self.id(),
                    self.state,
                    BackendErrorKind::Unsupported,
                    message,
                ));
            }
            Err(_) => return Err(self.error("stream thread did not answer")),
        };

        log::info!("Opened cpal output ({})", spec);
        self.spec = spec;
        self.stream = Some(StreamHandle {
            commands: command_tx,
            replies: reply_rx,
            thread,
            producer,
        });
        self.state = BackendState::Open;
        Ok(spec)
    }

    fn close(&mut self) -> BackendResult<()> {
        require_state(self.id(), self.state, BackendState::Open, "close")?;
        let result = self.send(StreamCommand::Close);
        if let Some(stream) = self.stream.take() {
            let _ = stream.thread.join();
        }
        self.state = BackendState::Config;
        result
    }

    fn start(&mut self) -> BackendResult<()> {
        require_state(self.id(), self.state, BackendState::Open, "start")?;
        self.send(StreamCommand::Play)?;
        self.state = BackendState::Running;
        Ok(())
    }

    fn stop(&mut self) -> BackendResult<()> {
        require_state(self.id(), self.state, BackendState::Running, "stop")?;
        let drained = self.drain();
        let paused = self.send(StreamCommand::Pause);
        self.state = BackendState::Open;
        drained.and(paused)
    }

    fn write(&mut self, data: &[u8]) -> BackendResult<()> {
        require_state(self.id(), self.state, BackendState::Running, "write")?;
        self.check_callback()?;

        let format = self.spec.format;
        self.scratch.clear();
        self.scratch.extend(
            data.chunks_exact(format.sample_size())
                .map(|bytes| format.decode(bytes)),
        );

        let Some(stream) = self.stream.as_mut() else {
            return Err(BackendError::device(BackendId::Cpal, self.state, "no stream"));
        };

        push_all(&mut stream.producer, &self.scratch, &self.callback.failed, WRITE_TIMEOUT)
            .map_err(|message| BackendError::device(BackendId::Cpal, self.state, message))
    }

    fn flush(&mut self) -> BackendResult<()> {
        self.callback.flush.store(true, Ordering::Release);
        Ok(())
    }

    fn drain(&mut self) -> BackendResult<()> {
        if self.state != BackendState::Running {
            return Ok(());
        }
        let deadline = Instant::now() + DRAIN_TIMEOUT;
        while let Some(stream) = self.stream.as_ref()
            && !stream.producer.is_empty()
        {
            if Instant::now() >= deadline {
                return Err(self.error("drain timed out"));
            }
            self.check_callback()?;
            thread::sleep(Duration::from_millis(2));
        }
        Ok(())
    }

    fn latency(&self) -> Duration {
        match self.stream.as_ref() {
            Some(stream) => {
                let frames = stream.producer.occupied_len() / self.spec.channels.max(1) as usize;
                self.spec.frames_to_duration(frames)
            }
            None => Duration::ZERO,
        }
    }

    fn state(&self) -> BackendState {
        self.state
    }
}

impl Drop for CpalBackend {
    fn drop(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.commands.send(StreamCommand::Close);
            let _ = stream.thread.join();
        }
    }
}

/// Pushes all of `samples`, blocking until the callback made room
///
/// Fails once the callback reports an error or has not freed any space
/// for `timeout`.
fn push_all(
    producer: &mut HeapProd<f32>,
    mut samples: &[f32],
    failed: &AtomicBool,
    timeout: Duration,
) -> Result<(), &'static str> {
    let mut deadline = Instant::now() + timeout;
    while !samples.is_empty() {
        let pushed = producer.push_slice(samples);
        samples = &samples[pushed..];
        if samples.is_empty() {
            break;
        }
        if failed.load(Ordering::Acquire) {
            return Err("stream reported an error");
        }
        if pushed > 0 {
            deadline = Instant::now() + timeout;
        } else if Instant::now() >= deadline {
            return Err("write timed out");
        }
        thread::sleep(Duration::from_millis(1));
    }
    Ok(())
}

type Setup = Result<(StreamSpec, HeapProd<f32>), String>;

/// Owns the cpal stream until closed
fn stream_thread(
    device_name: Option<String>,
    requested: StreamSpec,
    callback: Arc<CallbackState>,
    setup: mpsc::Sender<Setup>,
    commands: mpsc::Receiver<StreamCommand>,
    replies: mpsc::Sender<Result<(), String>>,
) {
    let stream = match build(device_name.as_deref(), requested, callback) {
        Ok((stream, spec, producer)) => {
            if setup.send(Ok((spec, producer))).is_err() {
                return;
            }
            stream
        }
        Err(message) => {
            let _ = setup.send(Err(message));
            return;
        }
    };

    while let Ok(command) = commands.recv() {
        let result = match command {
            StreamCommand::Play => stream.play().map_err(|e| e.to_string()),
            StreamCommand::Pause => stream.pause().map_err(|e| e.to_string()),
            StreamCommand::Close => {
                drop(stream);
                let _ = replies.send(Ok(()));
                return;
            }
        };
        if replies.send(result).is_err() {
            return;
        }
    }
}

fn find_device(name: Option<&str>) -> Result<Device, String> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_output_device()
            .ok_or_else(|| "no default output device".to_string()),
        Some(name) => host
            .output_devices()
            .map_err(|e| e.to_string())?
            .find(|device| device.name().is_ok_and(|n| n == name))
            .ok_or_else(|| format!("output device '{}' not found", name)),
    }
}

/// The device config closest to the requested rate, at the default
/// channel count and sample format
fn select_config(device: &Device, requested: StreamSpec) -> Result<SupportedStreamConfig, String> {
    let default = device
        .default_output_config()
        .map_err(|e| format!("no output config: {}", e))?;

    let rate = cpal::SampleRate(requested.rate);
    let matching = device.supported_output_configs().ok().and_then(|mut configs| {
        configs.find(|c| {
            c.channels() == default.channels()
                && c.sample_format() == default.sample_format()
                && c.min_sample_rate() <= rate
                && rate <= c.max_sample_rate()
        })
    });

    Ok(match matching {
        Some(range) => range.with_sample_rate(rate),
        None => default,
    })
}

fn build(
    device_name: Option<&str>,
    requested: StreamSpec,
    callback: Arc<CallbackState>,
) -> Result<(Stream, StreamSpec, HeapProd<f32>), String> {
    let device = find_device(device_name)?;
    let supported = select_config(&device, requested)?;
    let sample_format = supported.sample_format();
    let config: StreamConfig = supported.into();

    let spec = StreamSpec::new(requested.format, config.sample_rate.0, config.channels);
    let capacity = spec.duration_to_frames(FIFO_DURATION) * spec.channels as usize;
    let (producer, consumer) = HeapRb::<f32>::new(capacity.max(1)).split();

    let stream = match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, consumer, callback),
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, consumer, callback),
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, consumer, callback),
        other => Err(format!(
            "unsupported sample format {:?} (supported: F32, I16, U16)",
            other
        )),
    }?;

    Ok((stream, spec, producer))
}

fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    mut consumer: HeapCons<f32>,
    callback: Arc<CallbackState>,
) -> Result<Stream, String>
where
    T: SizedSample + FromSample<f32> + Send + 'static,
{
    let error_state = Arc::clone(&callback);
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                // no allocations, no locks
                if callback.flush.swap(false, Ordering::AcqRel) {
                    let pending = consumer.occupied_len();
                    consumer.skip(pending);
                }
                for out in data.iter_mut() {
                    let sample = consumer.try_pop().unwrap_or(0.0);
                    *out = T::from_sample(sample);
                }
            },
            move |err| {
                log::error!("cpal stream error: {}", err);
                error_state.failed.store(true, Ordering::Release);
            },
            None,
        )
        .map_err(|e| format!("cannot build output stream: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_all_gives_up_on_a_stalled_reader() {
        let (mut producer, _consumer) = HeapRb::<f32>::new(4).split();
        let failed = AtomicBool::new(false);

        let begin = Instant::now();
        let result = push_all(&mut producer, &[0.0; 6], &failed, Duration::from_millis(20));
        assert_eq!(result, Err("write timed out"));
        assert!(begin.elapsed() >= Duration::from_millis(20));
        assert!(producer.is_full());

        failed.store(true, Ordering::Release);
        let result = push_all(&mut producer, &[0.0], &failed, Duration::from_secs(5));
        assert_eq!(result, Err("stream reported an error"));
    }

    #[test]
    fn test_push_all_waits_for_the_reader() {
        let (mut producer, mut consumer) = HeapRb::<f32>::new(4).split();
        let failed = AtomicBool::new(false);

        let reader = thread::spawn(move || {
            let mut popped = 0;
            while popped < 10 {
                popped += consumer.pop_iter().count();
                thread::sleep(Duration::from_millis(1));
            }
            popped
        });
        push_all(&mut producer, &[0.5; 10], &failed, Duration::from_secs(1)).unwrap();
        assert_eq!(reader.join().unwrap(), 10);
    }

    #[test]
    fn test_operations_require_state() {
        let mut backend = CpalBackend::new();
        assert_eq!(backend.state(), BackendState::Config);
        assert!(backend.start().is_err());
        assert!(backend.stop().is_err());
        assert!(backend.close().is_err());

        let err = backend.write(&[0; 4]).unwrap_err();
        assert_eq!(err.backend, BackendId::Cpal);
        assert_eq!(err.kind, BackendErrorKind::InvalidState);
    }

    #[test]
    fn test_configure_and_select_device_in_config_state() {
        let mut backend = CpalBackend::with_device("nowhere");
        backend.configure(StreamSpec::default()).unwrap();
        backend.set_device(None).unwrap();
        assert_eq!(backend.latency(), Duration::ZERO);
        assert!(backend.drain().is_ok());
    }
}
