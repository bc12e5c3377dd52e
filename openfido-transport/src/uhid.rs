//! Linux UHID backing for the HID link
//!
//! Creates a virtual FIDO HID device through `/dev/uhid` so browsers and
//! `libfido2` tools can talk to the authenticator without hardware.
//!
//! Needs the `uhid` kernel module and write access to `/dev/uhid`.
//!
//! ```no_run
//! use openfido_transport::{HidTransport, UhidDevice};
//!
//! let device = UhidDevice::create("openfido virtual authenticator")?;
//! let transport = HidTransport::new(device);
//! # Ok::<(), openfido_transport::Error>(())
//! ```

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::fd::AsFd;
use std::time::{Duration, Instant};

use nix::poll::{PollFd, PollFlags, PollTimeout, poll};

use crate::ctaphid::PACKET_SIZE;
use crate::error::{Error, Result};
use crate::hid::HidLink;

// linux/uhid.h event types
const UHID_DESTROY: u32 = 1;
const UHID_OPEN: u32 = 2;
const UHID_START: u32 = 4;
const UHID_OUTPUT: u32 = 6;
const UHID_CREATE2: u32 = 11;
const UHID_INPUT2: u32 = 12;

const UHID_DATA_MAX: usize = 4096;
/// Size of `struct uhid_event`: the type word plus the largest request
const UHID_EVENT_SIZE: usize = 4 + 128 + 64 + 64 + 2 + 2 + 4 * 4 + UHID_DATA_MAX;

const BUS_USB: u16 = 0x03;
const VENDOR_ID: u32 = 0x15D9;
const PRODUCT_ID: u32 = 0x0A37;
const DEVICE_VERSION: u32 = 0x0102;

const START_TIMEOUT: Duration = Duration::from_secs(5);

/// FIDO usage page, 64-byte input and output reports
const REPORT_DESCRIPTOR: &[u8] = &[
    0x06, 0xD0, 0xF1, // usage page (FIDO alliance)
    0x09, 0x01, // usage (CTAPHID)
    0xA1, 0x01, // collection (application)
    0x09, 0x20, //   usage (input report data)
    0x15, 0x00, //   logical minimum (0)
    0x26, 0xFF, 0x00, //   logical maximum (255)
    0x75, 0x08, //   report size (8)
    0x95, 0x40, //   report count (64)
    0x81, 0x02, //   input (data, var, abs)
    0x09, 0x21, //   usage (output report data)
    0x15, 0x00, //   logical minimum (0)
    0x26, 0xFF, 0x00, //   logical maximum (255)
    0x75, 0x08, //   report size (8)
    0x95, 0x40, //   report count (64)
    0x91, 0x02, //   output (data, var, abs)
    0xC0, // end collection
];

fn io_error(context: &str, err: impl std::fmt::Display) -> Error {
    Error::IoError(format!("{context}: {err}"))
}

fn put_str(buf: &mut [u8], value: &str) {
    // the kernel expects NUL terminated strings
    let len = value.len().min(buf.len() - 1);
    buf[..len].copy_from_slice(&value.as_bytes()[..len]);
}

fn create2_event(name: &str) -> Vec<u8> {
    let mut event = vec![0u8; UHID_EVENT_SIZE];
    event[0..4].copy_from_slice(&UHID_CREATE2.to_ne_bytes());
    put_str(&mut event[4..132], name);
    put_str(&mut event[132..196], "openfido");
    put_str(&mut event[196..260], "openfido-0");

    event[260..262].copy_from_slice(&(REPORT_DESCRIPTOR.len() as u16).to_ne_bytes());
    event[262..264].copy_from_slice(&BUS_USB.to_ne_bytes());
    event[264..268].copy_from_slice(&VENDOR_ID.to_ne_bytes());
    event[268..272].copy_from_slice(&PRODUCT_ID.to_ne_bytes());
    event[272..276].copy_from_slice(&DEVICE_VERSION.to_ne_bytes());
    // country stays zero
    event[280..280 + REPORT_DESCRIPTOR.len()].copy_from_slice(REPORT_DESCRIPTOR);
    event
}

fn input2_event(report: &[u8; PACKET_SIZE]) -> Vec<u8> {
    let mut event = Vec::with_capacity(4 + 2 + UHID_DATA_MAX);
    event.extend_from_slice(&UHID_INPUT2.to_ne_bytes());
    event.extend_from_slice(&(PACKET_SIZE as u16).to_ne_bytes());
    event.extend_from_slice(report);
    event.resize(4 + 2 + UHID_DATA_MAX, 0);
    event
}

/// Pull the report out of a `UHID_OUTPUT` event
///
/// The kernel prefixes the report id byte when the host wrote 65 bytes.
fn parse_output(event: &[u8]) -> Option<[u8; PACKET_SIZE]> {
    let data = event.get(4..4 + UHID_DATA_MAX)?;
    let size = event.get(4 + UHID_DATA_MAX..4 + UHID_DATA_MAX + 2)?;
    let size = usize::from(u16::from_ne_bytes([size[0], size[1]]));

    let body = match size {
        n if n == PACKET_SIZE + 1 && data[0] == 0 => &data[1..=PACKET_SIZE],
        n if n <= PACKET_SIZE => &data[..n],
        _ => return None,
    };
    let mut report = [0u8; PACKET_SIZE];
    report[..body.len()].copy_from_slice(body);
    Some(report)
}

/// A virtual HID device owned by this process
pub struct UhidDevice {
    file: File,
    started: bool,
}

impl UhidDevice {
    /// Create the device and wait for the kernel to start it
    pub fn create(name: &str) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open("/dev/uhid")
            .map_err(|e| io_error("open /dev/uhid", e))?;

        let mut device = Self {
            file,
            started: false,
        };
        device
            .file
            .write_all(&create2_event(name))
            .map_err(|e| io_error("UHID_CREATE2", e))?;

        let deadline = Instant::now() + START_TIMEOUT;
        while !device.started {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::Timeout);
            }
            // events before START carry nothing we need
            let _ = device.next_event(remaining)?;
        }
        log::info!("UHID device {name:?} started");
        Ok(device)
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Wait for one event; lifecycle events are handled here
    fn next_event(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        let millis = u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX);
        let ready = {
            let mut fds = [PollFd::new(self.file.as_fd(), PollFlags::POLLIN)];
            poll(&mut fds, PollTimeout::from(millis)).map_err(|e| io_error("poll", e))?
        };
        if ready == 0 {
            return Ok(None);
        }

        let mut event = vec![0u8; UHID_EVENT_SIZE];
        let n = self
            .file
            .read(&mut event)
            .map_err(|e| io_error("read UHID event", e))?;
        if n < 4 {
            return Ok(None);
        }
        event.truncate(n);

        match u32::from_ne_bytes([event[0], event[1], event[2], event[3]]) {
            UHID_START | UHID_OPEN => {
                self.started = true;
                Ok(None)
            }
            UHID_OUTPUT => Ok(Some(event)),
            other => {
                log::debug!("ignoring UHID event {other}");
                Ok(None)
            }
        }
    }
}

impl HidLink for UhidDevice {
    fn read_report(&mut self, timeout: Duration) -> Result<Option<[u8; PACKET_SIZE]>> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if let Some(event) = self.next_event(remaining)? {
                match parse_output(&event) {
                    Some(report) => return Ok(Some(report)),
                    None => log::warn!("dropping malformed UHID output report"),
                }
            }
            if remaining.is_zero() || Instant::now() >= deadline {
                return Ok(None);
            }
        }
    }

    fn write_report(&mut self, report: &[u8; PACKET_SIZE]) -> Result<()> {
        if !self.started {
            return Err(Error::Other("UHID device not started".into()));
        }
        self.file
            .write_all(&input2_event(report))
            .map_err(|e| io_error("UHID_INPUT2", e))
    }
}

impl Drop for UhidDevice {
    fn drop(&mut self) {
        let _ = self.file.write_all(&UHID_DESTROY.to_ne_bytes());
    }
}
