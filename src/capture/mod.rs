//! Packet capture sources.
//!
//! The capture path is deliberately thin: a `CaptureSource` yields an
//! infinite stream of raw link-layer frames with a captured timestamp and
//! on-wire length. Decoding (C1) and everything downstream never touches
//! the capture device directly, so a test can swap in `VecSource` and drive
//! the whole pipeline without a live NIC or elevated privileges.

pub mod decode;
pub mod pcap_source;

use std::time::SystemTime;

use crate::error::AppError;
use crate::model::InterfaceInfo;

pub use pcap_source::PcapSource;

/// One captured link-layer frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub captured_at: SystemTime,
    pub data: Vec<u8>,
}

/// External capture contract (§6 "Capture source"). A frame's raw bytes are
/// handed to the decoder (C1) unmodified; the source itself never parses,
/// blocks on anything but its own I/O, or touches a store lock.
pub trait CaptureSource: Send {
    /// Block until the next frame is available, or return `None` at end of stream.
    fn next_frame(&mut self) -> Option<Frame>;
}

/// Name of the first non-loopback device with an address, used as the
/// `--interface` default when the flag is omitted.
pub fn default_interface() -> Option<String> {
    let devices = pcap::Device::list().ok()?;
    devices
        .into_iter()
        .find(|d| !d.flags.is_loopback() && !d.addresses.is_empty())
        .map(|d| d.name)
}

/// `GET /api/interfaces`: every device libpcap can see, with its addresses
/// and whether it looks like a usable capture target (non-loopback, has at
/// least one address) — the same test `default_interface` auto-selects on.
pub fn list_interfaces() -> Result<Vec<InterfaceInfo>, AppError> {
    let devices = pcap::Device::list()
        .map_err(|e| AppError::Capture(format!("failed to list capture devices: {e}")))?;
    Ok(devices
        .into_iter()
        .map(|d| {
            let active = !d.flags.is_loopback() && !d.addresses.is_empty();
            InterfaceInfo {
                name: d.name,
                description: d.desc.unwrap_or_default(),
                addresses: d.addresses.iter().map(|a| a.addr.to_string()).collect(),
                active,
            }
        })
        .collect())
}

/// In-memory capture source used by tests: yields a caller-supplied sequence
/// of frames, then ends the stream.
pub struct VecSource {
    frames: std::vec::IntoIter<Frame>,
}

impl VecSource {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self {
            frames: frames.into_iter(),
        }
    }

    /// Build a source from raw byte slices, stamping each frame with `SystemTime::now()`.
    pub fn from_raw(frames: Vec<Vec<u8>>) -> Self {
        let frames = frames
            .into_iter()
            .map(|data| Frame {
                captured_at: SystemTime::now(),
                data,
            })
            .collect();
        Self::new(frames)
    }
}

impl CaptureSource for VecSource {
    fn next_frame(&mut self) -> Option<Frame> {
        self.frames.next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_source_yields_frames_in_order_then_ends() {
        let mut src = VecSource::from_raw(vec![vec![1, 2, 3], vec![4, 5]]);
        assert_eq!(src.next_frame().unwrap().data, vec![1, 2, 3]);
        assert_eq!(src.next_frame().unwrap().data, vec![4, 5]);
        assert!(src.next_frame().is_none());
    }

    #[test]
    fn test_vec_source_empty() {
        let mut src = VecSource::from_raw(vec![]);
        assert!(src.next_frame().is_none());
    }
}
