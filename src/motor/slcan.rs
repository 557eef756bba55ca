// Serial-line CAN adapter (SLCAN / LAWICEL ASCII protocol)
//
// Frame format: 't' + 3 hex id + 1 hex length + 2 hex per data byte + '\r'
// e.g. "t20080000000000000000\r" is an 8-byte frame on id 0x200.
// The adapter acknowledges commands with '\r' (or 'z\r' after a transmit)
// and rejects them with BEL (0x07).

use serialport::{self, SerialPort};
use std::io::{Read, Write};
use std::time::Duration;
use tracing::{debug, info};

use super::frame::{CanFrame, LinkError, MAX_DATA_LEN, Result};

/// Default serial configuration for the adapter
pub const DEFAULT_BAUDRATE: u32 = 921_600;
pub const DEFAULT_TIMEOUT_MS: u64 = 10;

/// Adapter commands
const CMD_CLOSE: &[u8] = b"C\r";
const CMD_BITRATE_1M: &[u8] = b"S8\r";
const CMD_OPEN: &[u8] = b"O\r";

const CR: u8 = b'\r';
const BEL: u8 = 0x07;

/// Longest line the adapter can produce: 't' + id + len + 16 hex digits + timestamp
const MAX_LINE: usize = 1 + 3 + 1 + 2 * MAX_DATA_LEN + 4 + 1;

/// Encode a frame as an SLCAN transmit command
pub fn encode_frame(frame: &CanFrame) -> String {
    let payload = frame.payload();
    let mut line = String::with_capacity(6 + 2 * payload.len());
    line.push('t');
    line.push_str(&format!("{:03X}{:X}", frame.id & 0x7FF, payload.len()));
    for b in payload {
        line.push_str(&format!("{:02X}", b));
    }
    line.push('\r');
    line
}

fn hex_value(line: &[u8], range: std::ops::Range<usize>) -> Option<u16> {
    let digits = std::str::from_utf8(line.get(range)?).ok()?;
    u16::from_str_radix(digits, 16).ok()
}

fn malformed(line: &[u8], reason: &str) -> LinkError {
    LinkError::Malformed {
        line: String::from_utf8_lossy(line).into_owned(),
        reason: reason.to_string(),
    }
}

/// Parse one line (without its terminator) received from the adapter
///
/// Returns `Ok(None)` for acknowledgements and frame types the chassis does not use.
pub fn parse_line(line: &[u8]) -> Result<Option<CanFrame>> {
    match line.first() {
        None | Some(b'z') | Some(b'Z') => Ok(None),
        Some(&BEL) => Err(LinkError::AdapterNack),
        // Extended and remote frames are not part of the chassis bus
        Some(b'T') | Some(b'r') | Some(b'R') => Ok(None),
        Some(b't') => {
            let id = hex_value(line, 1..4).ok_or_else(|| malformed(line, "bad id"))?;
            let len =
                hex_value(line, 4..5).ok_or_else(|| malformed(line, "bad length"))? as usize;
            if len > MAX_DATA_LEN {
                return Err(malformed(line, "length above 8"));
            }
            let mut data = [0u8; MAX_DATA_LEN];
            for (i, byte) in data.iter_mut().take(len).enumerate() {
                let at = 5 + 2 * i;
                *byte = hex_value(line, at..at + 2)
                    .ok_or_else(|| malformed(line, "bad data"))? as u8;
            }
            // Anything after the data is an optional adapter timestamp
            CanFrame::new(id, &data[..len]).map(Some)
        }
        Some(_) => Err(malformed(line, "unknown command")),
    }
}

/// SLCAN adapter on a serial port
pub struct SlcanBus {
    port: Box<dyn SerialPort>,
}

impl SlcanBus {
    /// Open the adapter and bring the CAN channel up at 1 Mbit/s
    pub fn open(port_name: &str) -> Result<Self> {
        Self::open_with_baudrate(port_name, DEFAULT_BAUDRATE)
    }

    /// Open with custom serial baudrate
    pub fn open_with_baudrate(port_name: &str, baudrate: u32) -> Result<Self> {
        info!("Opening SLCAN adapter on {} @ {} baud", port_name, baudrate);
        let port = serialport::new(port_name, baudrate)
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .open()?;

        let mut bus = Self { port };
        // Close first in case a previous session left the channel open
        bus.port.write_all(CMD_CLOSE)?;
        bus.port.write_all(CMD_BITRATE_1M)?;
        bus.port.write_all(CMD_OPEN)?;
        bus.port.flush()?;
        Ok(bus)
    }

    /// Split into independent transmit and receive halves
    pub fn split(self) -> Result<(SlcanTx, SlcanRx)> {
        let rx_port = self.port.try_clone()?;
        Ok((
            SlcanTx { port: self.port },
            SlcanRx {
                port: rx_port,
                pending: Vec::with_capacity(4 * MAX_LINE),
            },
        ))
    }
}

/// Transmit half, used by the control loop
///
/// Frames are handed to the kernel's tty buffer and never drained here:
/// waiting for the UART would eat most of a 1 ms control period.
pub struct SlcanTx<W = Box<dyn SerialPort>> {
    port: W,
}

impl<W: Write> SlcanTx<W> {
    pub fn send(&mut self, frame: &CanFrame) -> Result<()> {
        self.port.write_all(encode_frame(frame).as_bytes())?;
        Ok(())
    }
}

/// Receive half, used by the feedback thread
pub struct SlcanRx {
    port: Box<dyn SerialPort>,
    pending: Vec<u8>,
}

impl SlcanRx {
    /// Next data frame, or `Ok(None)` if the read timed out without one
    pub fn recv(&mut self) -> Result<Option<CanFrame>> {
        loop {
            if let Some(end) = self.pending.iter().position(|&b| b == CR || b == BEL) {
                // BEL has no terminator of its own: keep it as the line content
                let take = if self.pending[end] == BEL { end + 1 } else { end };
                let line: Vec<u8> = self.pending.drain(..take).collect();
                if self.pending.first() == Some(&CR) {
                    self.pending.remove(0);
                }
                match parse_line(&line)? {
                    Some(frame) => return Ok(Some(frame)),
                    None => continue,
                }
            }

            if self.pending.len() > MAX_LINE {
                // Lost sync: drop the garbage and resynchronize on the next terminator
                debug!("Discarding {} unterminated bytes", self.pending.len());
                self.pending.clear();
            }

            let mut chunk = [0u8; 64];
            match self.port.read(&mut chunk) {
                Ok(0) => return Ok(None),
                Ok(n) => self.pending.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => return Ok(None),
                Err(e) => return Err(LinkError::Io(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_frame() {
        let frame = CanFrame::new(0x200, &[0x03, 0xE8, 0xFC, 0x18, 0, 0, 0, 0x7F]).unwrap();
        assert_eq!(encode_frame(&frame), "t200803E8FC180000007F\r");
    }

    #[test]
    fn test_encode_short_frame() {
        let frame = CanFrame::new(0x301, &[0xAB]).unwrap();
        assert_eq!(encode_frame(&frame), "t3011AB\r");
    }

    #[test]
    fn test_parse_data_frame() {
        let frame = parse_line(b"t2018102003E8FFFF2900").unwrap().unwrap();
        assert_eq!(frame.id, 0x201);
        assert_eq!(frame.payload(), &[0x10, 0x20, 0x03, 0xE8, 0xFF, 0xFF, 0x29, 0x00]);
    }

    #[test]
    fn test_parse_with_timestamp() {
        let frame = parse_line(b"t30120102ABCD").unwrap().unwrap();
        assert_eq!(frame.id, 0x301);
        assert_eq!(frame.payload(), &[0x01, 0x02]);
    }

    #[test]
    fn test_parse_acks_and_ignored() {
        assert_eq!(parse_line(b"").unwrap(), None);
        assert_eq!(parse_line(b"z").unwrap(), None);
        assert_eq!(parse_line(b"T0000020180").unwrap(), None);
        assert!(matches!(parse_line(&[BEL]), Err(LinkError::AdapterNack)));
    }

    /// Writer that records what reaches it and how often it was drained
    #[derive(Default)]
    struct RecordingPort {
        written: Vec<u8>,
        flushes: usize,
    }

    impl Write for RecordingPort {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            self.flushes += 1;
            Ok(())
        }
    }

    #[test]
    fn test_send_does_not_drain_port() {
        let mut tx = SlcanTx {
            port: RecordingPort::default(),
        };
        tx.send(&CanFrame::new(0x200, &[0; 8]).unwrap()).unwrap();
        tx.send(&CanFrame::new(0x300, &[0, 40]).unwrap()).unwrap();

        assert_eq!(tx.port.written, b"t20080000000000000000\rt30020028\r");
        assert_eq!(tx.port.flushes, 0);
    }

    #[test]
    fn test_parse_malformed() {
        assert!(matches!(parse_line(b"t2G18"), Err(LinkError::Malformed { .. })));
        assert!(matches!(parse_line(b"t2019"), Err(LinkError::Malformed { .. })));
        assert!(matches!(parse_line(b"t201401"), Err(LinkError::Malformed { .. })));
        assert!(matches!(parse_line(b"x"), Err(LinkError::Malformed { .. })));
    }
}
