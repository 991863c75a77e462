//! Command dispatcher
//!
//! A single worker thread owns the transport and executes queued commands
//! one at a time, in the order they were queued. Each executed command gets
//! exactly one completion call; commands still queued when the worker stops
//! are dropped without one.
//!
//! Lifecycle: `Idle -> Running -> Stopping -> Stopped`. A stopped dispatcher
//! cannot be restarted; reconnecting builds a new one with a fresh queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::codec::{self, Decoded, DeviceReading, SpectrumPoint, SpectrumProgress};
use super::commands::{absorbance_data_frame, ABS_DATA_LEN, SPECTRUM_SAMPLE_LEN};
use super::{
    Command, LinkObserver, LinkState, ProtocolError, Response, Transport, ABS_DATA_TIMEOUT_MS,
    DEFAULT_POLL_INTERVAL_MS, DEFAULT_TIMEOUT_MS,
};

/// Completion handler, called once with the command's outcome
pub type Completion = Box<dyn FnOnce(Result<Response, ProtocolError>) + Send>;

/// Progress handler for spectrum acquisition
pub type ProgressHandler = Box<dyn FnMut(SpectrumProgress) + Send>;

/// A command waiting in the queue together with its handlers
pub struct QueuedCommand {
    /// Command to execute
    pub command: Command,
    /// Bound on the first response read
    pub timeout: Duration,
    completion: Completion,
    progress: Option<ProgressHandler>,
}

impl QueuedCommand {
    /// Queue `command`, reading its first answer within `timeout`
    pub fn new(
        command: Command,
        timeout: Duration,
        completion: impl FnOnce(Result<Response, ProtocolError>) + Send + 'static,
    ) -> Self {
        Self {
            command,
            timeout,
            completion: Box::new(completion),
            progress: None,
        }
    }

    /// Attach a progress handler (only spectrum acquisition reports progress)
    pub fn with_progress(
        mut self,
        progress: impl FnMut(SpectrumProgress) + Send + 'static,
    ) -> Self {
        self.progress = Some(Box::new(progress));
        self
    }
}

impl std::fmt::Debug for QueuedCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedCommand")
            .field("command", &self.command)
            .field("timeout", &self.timeout)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// Worker timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// How long an idle worker waits on the queue before re-checking its stop flag
    pub poll_interval: Duration,
    /// Bound on the second-stage absorbance data read
    pub absorbance_data_timeout: Duration,
    /// Bound on each spectrum sample read
    pub sample_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            absorbance_data_timeout: Duration::from_millis(ABS_DATA_TIMEOUT_MS),
            sample_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }
}

/// Dispatcher lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    /// Built, worker not spawned
    Idle,
    /// Worker serving the queue
    Running,
    /// Stop requested, worker finishing
    Stopping,
    /// Worker exited
    Stopped,
}

/// Why a command stopped short of a result
enum Interrupt {
    /// Stop requested mid-command; no completion is delivered
    Abandoned,
    Failed(ProtocolError),
}

impl From<ProtocolError> for Interrupt {
    fn from(e: ProtocolError) -> Self {
        Interrupt::Failed(e)
    }
}

/// What the worker loop does after a command
enum Flow {
    Continue,
    Stop,
    /// Transport lost: disconnect, close it, then report to the in-flight command
    Fatal(Completion, ProtocolError),
}

/// State moved into the worker thread
struct Worker {
    transport: Box<dyn Transport>,
    queue: Receiver<QueuedCommand>,
    link: LinkState,
    config: DispatcherConfig,
    observer: Option<Arc<dyn LinkObserver>>,
    stop: Arc<AtomicBool>,
    state: Arc<Mutex<DispatcherState>>,
    /// Wavelength acknowledged by the device, stamped on absorbance readings
    selected_wavelength: Option<u16>,
}

/// Single-consumer command executor
pub struct Dispatcher {
    queue: Sender<QueuedCommand>,
    stop: Arc<AtomicBool>,
    state: Arc<Mutex<DispatcherState>>,
    pending: Option<Worker>,
    handle: Option<JoinHandle<()>>,
    thread_id: Option<ThreadId>,
}

fn set_state(state: &Mutex<DispatcherState>, next: DispatcherState) {
    *state.lock().unwrap_or_else(PoisonError::into_inner) = next;
}

impl Dispatcher {
    /// Create an idle dispatcher that will own `transport`
    pub fn new(
        transport: Box<dyn Transport>,
        link: LinkState,
        config: DispatcherConfig,
        observer: Option<Arc<dyn LinkObserver>>,
    ) -> Self {
        let (tx, rx) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let state = Arc::new(Mutex::new(DispatcherState::Idle));

        let worker = Worker {
            transport,
            queue: rx,
            link,
            config,
            observer,
            stop: Arc::clone(&stop),
            state: Arc::clone(&state),
            selected_wavelength: None,
        };

        Self {
            queue: tx,
            stop,
            state,
            pending: Some(worker),
            handle: None,
            thread_id: None,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> DispatcherState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn the worker thread
    pub fn start(&mut self) -> Result<(), ProtocolError> {
        let worker = self.pending.take().ok_or(ProtocolError::WorkerUnavailable)?;
        set_state(&self.state, DispatcherState::Running);

        let handle = thread::Builder::new()
            .name("spectro-command".to_string())
            .spawn(move || worker.run())
            .map_err(|e| {
                set_state(&self.state, DispatcherState::Stopped);
                ProtocolError::IoError(e)
            })?;

        self.thread_id = Some(handle.thread().id());
        self.handle = Some(handle);
        Ok(())
    }

    /// Append a command to the queue
    pub fn enqueue(&self, job: QueuedCommand) -> Result<(), ProtocolError> {
        match self.state() {
            DispatcherState::Idle | DispatcherState::Running => {}
            _ => return Err(ProtocolError::NotConnected),
        }
        debug!("dispatcher: queued {}", job.command.name());
        self.queue
            .send(job)
            .map_err(|_| ProtocolError::NotConnected)
    }

    /// Whether the caller is running on the worker thread
    pub fn is_worker_thread(&self) -> bool {
        self.thread_id == Some(thread::current().id())
    }

    /// Ask the worker to stop without waiting for it
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        *state = match *state {
            DispatcherState::Running | DispatcherState::Stopping => DispatcherState::Stopping,
            _ => DispatcherState::Stopped,
        };
    }

    /// Stop the worker and wait for it to exit.
    ///
    /// The command in flight, if any, is abandoned. Called from the worker
    /// itself (inside a completion), this only requests the stop.
    pub fn stop(&mut self) {
        self.request_stop();
        if self.is_worker_thread() {
            debug!("dispatcher: stop requested from worker thread, not joining");
            return;
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("dispatcher: command worker panicked");
            }
        }
        // Never started: release the transport now
        self.pending = None;
        set_state(&self.state, DispatcherState::Stopped);
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Worker {
    fn run(mut self) {
        info!("dispatcher: command worker started");
        let mut fatal = None;

        while !self.stop.load(Ordering::SeqCst) {
            let job = match self.queue.recv_timeout(self.config.poll_interval) {
                Ok(job) => job,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };
            match self.execute(job) {
                Flow::Continue => {}
                Flow::Stop => break,
                Flow::Fatal(completion, e) => {
                    fatal = Some((completion, e));
                    break;
                }
            }
        }

        let Worker {
            transport,
            queue,
            link,
            state,
            ..
        } = self;

        // Refuse new commands before the slow part of the teardown
        if let Some((_, e)) = &fatal {
            error!("dispatcher: transport lost, disconnecting: {}", e);
            link.set_disconnected();
            set_state(&state, DispatcherState::Stopping);
        }
        let dropped = queue.try_iter().count();
        drop(queue);
        if dropped > 0 {
            debug!("dispatcher: dropping {} queued commands", dropped);
        }

        drop(transport);
        set_state(&state, DispatcherState::Stopped);

        if let Some((completion, e)) = fatal {
            completion(Err(e));
        }
        info!("dispatcher: command worker stopped");
    }

    fn execute(&mut self, job: QueuedCommand) -> Flow {
        let QueuedCommand {
            command,
            timeout,
            completion,
            mut progress,
        } = job;

        if !self.link.is_connected() {
            debug!("dispatcher: not connected, dropping {}", command.name());
            return Flow::Continue;
        }

        debug!("dispatcher: executing {}", command.name());
        match self.run_command(&command, timeout, progress.as_mut()) {
            Ok(response) => {
                debug!("dispatcher: {} -> {:?}", command.name(), response);
                completion(Ok(response));
                Flow::Continue
            }
            Err(Interrupt::Abandoned) => {
                debug!("dispatcher: {} abandoned on stop", command.name());
                Flow::Stop
            }
            Err(Interrupt::Failed(e)) if e.is_fatal() => Flow::Fatal(completion, e),
            Err(Interrupt::Failed(e)) => {
                warn!("dispatcher: {} failed: {}", command.name(), e);
                completion(Err(e));
                Flow::Continue
            }
        }
    }

    fn run_command(
        &mut self,
        command: &Command,
        timeout: Duration,
        mut progress: Option<&mut ProgressHandler>,
    ) -> Result<Response, Interrupt> {
        self.transport.discard_input()?;
        self.send(&command.encode())?;
        let bytes = self.receive(command.expected_response_len(), timeout)?;

        match codec::decode(command, &bytes)? {
            Decoded::Complete(response) => {
                if let Command::SetWavelength { wavelength_nm, .. } = command {
                    if response == Response::WavelengthSet(true) {
                        self.selected_wavelength = Some(*wavelength_nm);
                    }
                }
                Ok(response)
            }
            Decoded::FetchAbsorbance => {
                self.send(&absorbance_data_frame())?;
                let data = self.receive(ABS_DATA_LEN, self.config.absorbance_data_timeout)?;
                let reading = DeviceReading {
                    wavelength_nm: self.selected_wavelength,
                    value: codec::decode_absorbance_data(&data)?,
                };
                Ok(match command {
                    Command::GetZero => Response::Zero(reading),
                    _ => Response::Absorbance(reading),
                })
            }
            Decoded::FetchSpectrum(header) => {
                let count = usize::from(header.count);
                debug!(
                    "dispatcher: spectrum of {} samples from {} nm",
                    count, header.start_nm
                );
                let mut points = Vec::with_capacity(count);
                for index in 0..count {
                    let data = self.receive(SPECTRUM_SAMPLE_LEN, self.config.sample_timeout)?;
                    let point = SpectrumPoint {
                        wavelength_nm: header.start_nm.saturating_add(index as u16),
                        absorbance: codec::decode_spectrum_sample(&data)?,
                    };
                    if let Some(report) = progress.as_deref_mut() {
                        report(SpectrumProgress {
                            percent: codec::progress_percent(index, count),
                            wavelength_nm: point.wavelength_nm,
                            absorbance: point.absorbance,
                        });
                    }
                    points.push(point);
                }
                Ok(Response::Spectrum(points))
            }
        }
    }

    fn send(&mut self, frame: &[u8]) -> Result<(), Interrupt> {
        let written = self.transport.write(frame)?;
        if let Some(observer) = &self.observer {
            observer.outgoing(written);
        }
        Ok(())
    }

    /// Read up to `n` bytes within `timeout`.
    ///
    /// The read runs in poll-interval slices; a stop requested meanwhile
    /// abandons the command at the next slice.
    fn receive(&mut self, n: usize, timeout: Duration) -> Result<Vec<u8>, Interrupt> {
        let deadline = Instant::now() + timeout;
        let mut bytes = Vec::with_capacity(n);
        loop {
            let slice = deadline
                .saturating_duration_since(Instant::now())
                .min(self.config.poll_interval);
            let chunk = self.transport.read(n - bytes.len(), slice)?;
            if !chunk.is_empty() {
                if let Some(observer) = &self.observer {
                    observer.incoming(chunk.len());
                }
                bytes.extend_from_slice(&chunk);
            }
            if self.stop.load(Ordering::SeqCst) {
                return Err(Interrupt::Abandoned);
            }
            if bytes.len() >= n || Instant::now() >= deadline {
                return Ok(bytes);
            }
        }
    }
}
