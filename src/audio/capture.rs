//! Real audio devices using CPAL (Cross-Platform Audio Library).

use crate::audio::device::{BlockCallback, InputDevice, InputStream};
use crate::error::{Result, VoxlinkError};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::{Arc, Mutex};

/// Run a closure with stderr temporarily redirected to /dev/null.
///
/// This suppresses noisy ALSA/JACK/PipeWire messages that CPAL triggers
/// when probing audio backends. The messages are harmless but confusing to users.
///
/// # Safety
/// Uses `libc::dup`/`libc::dup2` to save and restore file descriptor 2 (stderr).
/// Safe as long as no other thread is concurrently manipulating fd 2.
pub(crate) fn with_suppressed_stderr<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    unsafe {
        let saved_fd = libc::dup(2);
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
        if saved_fd >= 0 && devnull >= 0 {
            libc::dup2(devnull, 2);
            libc::close(devnull);
        }

        let result = f();

        if saved_fd >= 0 {
            libc::dup2(saved_fd, 2);
            libc::close(saved_fd);
        }

        result
    }
}

/// Suppress noisy JACK/ALSA error messages that occur during audio backend probing.
///
/// # Safety
/// This modifies environment variables which is safe when called before spawning threads.
pub fn suppress_audio_warnings() {
    // SAFETY: Called at startup before any threads are spawned
    unsafe {
        std::env::set_var("JACK_NO_START_SERVER", "1");
        std::env::set_var("JACK_NO_AUDIO_RESERVATION", "1");
        std::env::set_var("PIPEWIRE_DEBUG", "0");
        std::env::set_var("ALSA_DEBUG", "0");
        std::env::set_var("PW_LOG", "0");
    }
}

/// Preferred device names for PipeWire/PulseAudio desktops.
const PREFERRED_DEVICES: &[&str] = &["pipewire", "pulse", "PulseAudio"];

/// Input device name patterns that are never useful for a voice session.
const FILTERED_INPUT_PATTERNS: &[&str] = &[
    "surround",
    "front:",
    "rear:",
    "center:",
    "side:",
    "Digital Output",
    "HDMI",
    "S/PDIF",
];

/// Output patterns are narrower; HDMI speakers are legitimate playback targets.
const FILTERED_OUTPUT_PATTERNS: &[&str] = &["surround", "rear:", "center:", "side:"];

/// Which side of the host a device lookup concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

impl Direction {
    fn filtered_patterns(self) -> &'static [&'static str] {
        match self {
            Direction::Input => FILTERED_INPUT_PATTERNS,
            Direction::Output => FILTERED_OUTPUT_PATTERNS,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Direction::Input => "input",
            Direction::Output => "output",
        }
    }
}

fn should_filter_device(name: &str, direction: Direction) -> bool {
    let lower = name.to_lowercase();
    direction
        .filtered_patterns()
        .iter()
        .any(|pattern| lower.contains(&pattern.to_lowercase()))
}

fn is_preferred_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    PREFERRED_DEVICES
        .iter()
        .any(|pref| lower.contains(&pref.to_lowercase()))
}

fn enumerate(host: &cpal::Host, direction: Direction) -> Result<Vec<cpal::Device>> {
    let devices = match direction {
        Direction::Input => host.input_devices().map(|d| d.collect::<Vec<_>>()),
        Direction::Output => host.output_devices().map(|d| d.collect::<Vec<_>>()),
    };
    devices.map_err(|e| VoxlinkError::DeviceUnavailable {
        device: direction.label().to_string(),
        message: format!("Failed to enumerate {} devices: {}", direction.label(), e),
    })
}

/// List usable devices, with preferred devices marked "\[recommended\]".
///
/// # Errors
/// Returns `VoxlinkError::DeviceUnavailable` if device enumeration fails.
pub fn list_devices(direction: Direction) -> Result<Vec<String>> {
    let devices = with_suppressed_stderr(|| {
        let host = cpal::default_host();
        enumerate(&host, direction)
    })?;

    let mut device_names = Vec::new();
    for device in devices {
        if let Ok(name) = device.name() {
            if should_filter_device(&name, direction) {
                continue;
            }
            if is_preferred_device(&name) {
                device_names.push(format!("{} [recommended]", name));
            } else {
                device_names.push(name);
            }
        }
    }

    Ok(device_names)
}

/// Resolve a device by exact name, or the best default when `name` is None.
///
/// The default prefers PipeWire, then PulseAudio, then the host default, so
/// the desktop's own device selection is respected.
pub(crate) fn find_device(name: Option<&str>, direction: Direction) -> Result<cpal::Device> {
    with_suppressed_stderr(|| {
        let host = cpal::default_host();

        if let Some(wanted) = name {
            return enumerate(&host, direction)?
                .into_iter()
                .find(|dev| dev.name().map(|n| n == wanted).unwrap_or(false))
                .ok_or_else(|| VoxlinkError::DeviceUnavailable {
                    device: wanted.to_string(),
                    message: format!("no {} device with this name", direction.label()),
                });
        }

        if let Ok(devices) = enumerate(&host, direction) {
            for device in devices {
                if let Ok(dev_name) = device.name()
                    && is_preferred_device(&dev_name)
                {
                    return Ok(device);
                }
            }
        }

        let fallback = match direction {
            Direction::Input => host.default_input_device(),
            Direction::Output => host.default_output_device(),
        };
        fallback.ok_or_else(|| VoxlinkError::DeviceUnavailable {
            device: "default".to_string(),
            message: format!("no {} device available", direction.label()),
        })
    })
}

/// Wrapper for cpal::Stream to make it Send.
///
/// SAFETY: the stream is only touched from whichever thread owns the wrapper,
/// and only to pause and drop it.
pub(crate) struct SendableStream(pub(crate) cpal::Stream);

unsafe impl Send for SendableStream {}

/// Microphone capture through CPAL at the device's native format.
///
/// Blocks are mixed down to mono float and handed to the engine callback
/// unchanged; resampling to the wire rate happens in the capture engine.
pub struct CpalInputDevice {
    device: cpal::Device,
    name: String,
}

impl CpalInputDevice {
    /// Open a device by name, or the preferred default when `device_name` is None.
    ///
    /// # Errors
    /// `VoxlinkError::DeviceUnavailable` when no matching device exists.
    pub fn new(device_name: Option<&str>) -> Result<Self> {
        let device = find_device(device_name, Direction::Input)?;
        let name = device
            .name()
            .unwrap_or_else(|_| device_name.unwrap_or("default").to_string());
        Ok(Self { device, name })
    }

    fn default_config(&self) -> Result<cpal::SupportedStreamConfig> {
        self.device
            .default_input_config()
            .map_err(|e| VoxlinkError::DeviceUnavailable {
                device: self.name.clone(),
                message: format!("Failed to query default input config: {}", e),
            })
    }

    fn build_stream(&self, on_block: BlockCallback) -> Result<cpal::Stream> {
        use cpal::SampleFormat;

        let default_config = self.default_config()?;
        let channels = default_config.channels() as usize;
        let stream_config: cpal::StreamConfig = default_config.clone().into();

        tracing::info!(
            device = %self.name,
            channels,
            rate = default_config.sample_rate(),
            format = ?default_config.sample_format(),
            "opening input stream"
        );

        let err_callback = |err| {
            tracing::error!("Audio input stream error: {}", err);
        };
        let unavailable = |e: cpal::BuildStreamError| VoxlinkError::DeviceUnavailable {
            device: self.name.clone(),
            message: format!("Failed to build input stream: {}", e),
        };

        // The callback is shared by whichever format branch is taken.
        let on_block = Arc::new(Mutex::new(on_block));

        match default_config.sample_format() {
            SampleFormat::F32 => {
                let on_block = Arc::clone(&on_block);
                self.device
                    .build_input_stream(
                        &stream_config,
                        move |data: &[f32], _: &cpal::InputCallbackInfo| {
                            let mono = mix_to_mono(data, channels);
                            if let Ok(mut callback) = on_block.lock() {
                                callback(&mono);
                            }
                        },
                        err_callback,
                        None,
                    )
                    .map_err(unavailable)
            }
            SampleFormat::I16 => {
                let on_block = Arc::clone(&on_block);
                self.device
                    .build_input_stream(
                        &stream_config,
                        move |data: &[i16], _: &cpal::InputCallbackInfo| {
                            let floats: Vec<f32> =
                                data.iter().map(|&s| s as f32 / 32768.0).collect();
                            let mono = mix_to_mono(&floats, channels);
                            if let Ok(mut callback) = on_block.lock() {
                                callback(&mono);
                            }
                        },
                        err_callback,
                        None,
                    )
                    .map_err(unavailable)
            }
            fmt => Err(VoxlinkError::DeviceUnavailable {
                device: self.name.clone(),
                message: format!(
                    "Unsupported native sample format: {:?}. \
                     Try specifying a device with --input-device.",
                    fmt
                ),
            }),
        }
    }
}

/// Average interleaved frames down to one channel.
pub(crate) fn mix_to_mono(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

impl InputDevice for CpalInputDevice {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn native_rate(&self) -> Result<u32> {
        Ok(self.default_config()?.sample_rate())
    }

    fn open(&mut self, on_block: BlockCallback) -> Result<Box<dyn InputStream>> {
        let stream = self.build_stream(on_block)?;
        stream.play().map_err(|e| VoxlinkError::DeviceUnavailable {
            device: self.name.clone(),
            message: format!("Failed to start audio stream: {}", e),
        })?;
        Ok(Box::new(CpalInputStream {
            stream: SendableStream(stream),
        }))
    }
}

struct CpalInputStream {
    stream: SendableStream,
}

impl InputStream for CpalInputStream {
    fn close(self: Box<Self>) -> Result<()> {
        let result = self.stream.0.pause().map_err(|e| VoxlinkError::AudioCapture {
            message: format!("Failed to stop audio stream: {}", e),
        });
        // Dropping the stream releases the device even if pause failed.
        drop(self.stream);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_filter_input_device() {
        assert!(should_filter_device("surround51", Direction::Input));
        assert!(should_filter_device("front:CARD=PCH", Direction::Input));
        assert!(should_filter_device("HDMI Output", Direction::Input));
        assert!(should_filter_device("Digital Output S/PDIF", Direction::Input));
        assert!(!should_filter_device("pipewire", Direction::Input));
        assert!(!should_filter_device("Built-in Audio", Direction::Input));
    }

    #[test]
    fn test_output_keeps_hdmi() {
        assert!(!should_filter_device("HDMI Output", Direction::Output));
        assert!(should_filter_device("surround51", Direction::Output));
    }

    #[test]
    fn test_is_preferred_device() {
        assert!(is_preferred_device("pipewire"));
        assert!(is_preferred_device("PipeWire"));
        assert!(is_preferred_device("pulse"));
        assert!(is_preferred_device("PulseAudio"));
        assert!(!is_preferred_device("hw:0,0"));
        assert!(!is_preferred_device("default"));
    }

    #[test]
    fn test_mix_to_mono() {
        assert_eq!(mix_to_mono(&[0.5, -0.5], 1), vec![0.5, -0.5]);
        assert_eq!(mix_to_mono(&[0.5, 0.0, 1.0, -1.0], 2), vec![0.25, 0.0]);
        // A trailing partial frame is dropped.
        assert_eq!(mix_to_mono(&[1.0, 1.0, 1.0], 2), vec![1.0]);
    }

    #[test]
    fn test_create_with_invalid_device_name() {
        let source = CpalInputDevice::new(Some("NonExistentDevice12345"));
        match source {
            Err(VoxlinkError::DeviceUnavailable { device, .. }) => {
                assert!(device == "NonExistentDevice12345" || device == "input");
            }
            Err(other) => panic!("Expected DeviceUnavailable error, got {other}"),
            Ok(_) => panic!("Expected DeviceUnavailable error"),
        }
    }

    #[test]
    #[ignore] // Requires audio hardware
    fn test_list_devices_filters_and_marks_recommended() {
        let devices = list_devices(Direction::Input).expect("Failed to list devices");
        for device in &devices {
            assert!(!device.to_lowercase().contains("surround"));
            assert!(!device.to_lowercase().contains("hdmi"));
        }
    }

    #[test]
    #[ignore] // Requires audio hardware
    fn test_open_and_close_default_device() {
        let mut device = CpalInputDevice::new(None).expect("Failed to open input device");
        assert!(device.native_rate().unwrap() > 0);
        let stream = device.open(Box::new(|_: &[f32]| {})).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(100));
        assert!(stream.close().is_ok());
    }
}
