use crate::error::{Result, VoxlinkError};
use crate::lock::lock_or_recover;
use std::sync::{Arc, Mutex};

/// Callback receiving each native block of mono float samples.
pub type BlockCallback = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// Trait for microphone-like devices.
///
/// This trait allows swapping implementations (real device, WAV replay, mock).
pub trait InputDevice: Send {
    /// Human-readable device name for diagnostics.
    fn name(&self) -> String;

    /// Sample rate at which blocks will be delivered.
    fn native_rate(&self) -> Result<u32>;

    /// Acquires the device and starts invoking `on_block` for every block it
    /// captures, on a thread of the device's choosing.
    ///
    /// # Errors
    /// `VoxlinkError::DeviceUnavailable` when access is denied or no device exists.
    fn open(&mut self, on_block: BlockCallback) -> Result<Box<dyn InputStream>>;
}

/// A running input stream. Closing it releases the device.
pub trait InputStream: Send {
    /// Stops delivery. No block callback runs after this returns.
    fn close(self: Box<Self>) -> Result<()>;
}

type SharedCallback = Arc<Mutex<Option<BlockCallback>>>;

/// Mock input device for testing
///
/// Blocks are pushed by hand through a [`MockFeeder`], standing in for the
/// device callback thread.
pub struct MockInputDevice {
    native_rate: u32,
    should_fail_open: bool,
    error_message: String,
    callback: SharedCallback,
    open_count: Arc<Mutex<usize>>,
}

impl MockInputDevice {
    /// Create a new mock device delivering at 48kHz
    pub fn new() -> Self {
        Self {
            native_rate: 48_000,
            should_fail_open: false,
            error_message: "permission denied".to_string(),
            callback: Arc::new(Mutex::new(None)),
            open_count: Arc::new(Mutex::new(0)),
        }
    }

    /// Configure the native sample rate
    pub fn with_native_rate(mut self, rate: u32) -> Self {
        self.native_rate = rate;
        self
    }

    /// Configure the mock to fail on open
    pub fn with_open_failure(mut self) -> Self {
        self.should_fail_open = true;
        self
    }

    /// Configure the error message for failures
    pub fn with_error_message(mut self, message: &str) -> Self {
        self.error_message = message.to_string();
        self
    }

    /// Handle used to deliver blocks as the device thread would.
    pub fn feeder(&self) -> MockFeeder {
        MockFeeder {
            callback: Arc::clone(&self.callback),
            open_count: Arc::clone(&self.open_count),
        }
    }
}

impl Default for MockInputDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl InputDevice for MockInputDevice {
    fn name(&self) -> String {
        "mock".to_string()
    }

    fn native_rate(&self) -> Result<u32> {
        Ok(self.native_rate)
    }

    fn open(&mut self, on_block: BlockCallback) -> Result<Box<dyn InputStream>> {
        if self.should_fail_open {
            return Err(VoxlinkError::DeviceUnavailable {
                device: self.name(),
                message: self.error_message.clone(),
            });
        }
        *lock_or_recover(&self.callback, "mock open") = Some(on_block);
        *lock_or_recover(&self.open_count, "mock open") += 1;
        Ok(Box::new(MockInputStream {
            callback: Arc::clone(&self.callback),
        }))
    }
}

struct MockInputStream {
    callback: SharedCallback,
}

impl InputStream for MockInputStream {
    fn close(self: Box<Self>) -> Result<()> {
        lock_or_recover(&self.callback, "mock close").take();
        Ok(())
    }
}

/// Drives a [`MockInputDevice`] from test code.
#[derive(Clone)]
pub struct MockFeeder {
    callback: SharedCallback,
    open_count: Arc<Mutex<usize>>,
}

impl MockFeeder {
    /// Delivers one block. Returns false when no stream is open.
    pub fn deliver(&self, samples: &[f32]) -> bool {
        let mut guard = lock_or_recover(&self.callback, "mock deliver");
        match guard.as_mut() {
            Some(callback) => {
                callback(samples);
                true
            }
            None => false,
        }
    }

    pub fn is_open(&self) -> bool {
        lock_or_recover(&self.callback, "mock is_open").is_some()
    }

    /// Number of times the device has been opened.
    pub fn open_count(&self) -> usize {
        *lock_or_recover(&self.open_count, "mock open_count")
    }
}
