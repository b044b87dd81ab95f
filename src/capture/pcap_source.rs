//! Live capture source backed by libpcap.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use pcap::{Active, Capture, Device};

use crate::capture::{CaptureSource, Frame};
use crate::error::AppError;

/// Live packet capture on a named (or auto-selected) interface.
///
/// Opened in promiscuous mode with a short read timeout so the capture loop
/// can observe a shutdown request without blocking indefinitely on an idle
/// link. Open failures (bad device name, missing permissions) are
/// startup-fatal per §6 Exit Codes; the caller is expected to map them to
/// `AppError::Startup`.
pub struct PcapSource {
    capture: Capture<Active>,
    shutdown: Arc<AtomicBool>,
}

impl PcapSource {
    /// Open the named interface, or the first non-loopback device with an
    /// address when `interface` is `None`. `shutdown` is checked on every
    /// read-timeout tick so `next_frame` returns `None` promptly once the
    /// caller asks the capture loop to stop, instead of blocking forever on
    /// an idle link.
    pub fn open(interface: Option<&str>, shutdown: Arc<AtomicBool>) -> Result<Self, AppError> {
        let device = match interface {
            Some(name) => Device::list()
                .map_err(|e| AppError::Startup(format!("failed to list capture devices: {e}")))?
                .into_iter()
                .find(|d| d.name == name)
                .ok_or_else(|| AppError::Startup(format!("capture interface not found: {name}")))?,
            None => Device::list()
                .map_err(|e| AppError::Startup(format!("failed to list capture devices: {e}")))?
                .into_iter()
                .find(|d| !d.flags.is_loopback() && !d.addresses.is_empty())
                .ok_or_else(|| {
                    AppError::Startup("no non-loopback capture device available".into())
                })?,
        };

        let capture = Capture::from_device(device)
            .map_err(|e| AppError::Startup(format!("failed to open capture device: {e}")))?
            .promisc(true)
            .snaplen(65535)
            .timeout(250)
            .open()
            .map_err(|e| AppError::Startup(format!("failed to start capture: {e}")))?;

        Ok(Self { capture, shutdown })
    }
}

impl CaptureSource for PcapSource {
    /// A transient read error (malformed packet, buffer overrun, spurious
    /// OS error) is a recoverable ingest error: logged, then the read loop
    /// continues. `NoMorePackets` (the device is gone or a capture file has
    /// hit EOF) or a shutdown request observed on a `TimeoutExpired` tick
    /// ends the stream.
    fn next_frame(&mut self) -> Option<Frame> {
        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                return None;
            }
            match self.capture.next_packet() {
                Ok(packet) => {
                    return Some(Frame {
                        captured_at: SystemTime::now(),
                        data: packet.data.to_vec(),
                    })
                }
                Err(pcap::Error::TimeoutExpired) => continue,
                Err(pcap::Error::NoMorePackets) => return None,
                Err(e) => {
                    tracing::warn!("capture read error, continuing: {e}");
                    continue;
                }
            }
        }
    }
}
