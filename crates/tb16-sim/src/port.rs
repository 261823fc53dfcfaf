//! Byte-at-a-time host command port.
//!
//! Models the serial link's view of the device: one full-duplex exchange
//! per byte (the response rides the same exchange, as on the wire). The
//! link clock is far slower than the core clock, so each exchange also
//! advances the core by a fixed number of cycles — a busy device makes
//! progress while the host polls status.
//!
//! Unrecognized command bytes are absorbed: the decoder stays in its idle
//! state, device state is untouched, and the next status read is accurate.

use crate::device::TbDevice;
use crate::error::Result;
use tb16_chip::fixed::Q5_10;
use tb16_chip::link::{CMD_GET_STATUS, CMD_READ_ROW, CMD_START_COMPUTE, CMD_WRITE_ROW};

/// Core cycles elapsed per byte exchange (link : core clock ratio).
pub const CYCLES_PER_EXCHANGE: u64 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decoder {
    Idle,
    /// Row index byte of a WRITE_ROW follows.
    WriteIndex,
    /// Element bytes of a WRITE_ROW follow, MSB first.
    WriteData {
        row: usize,
        elem: usize,
        high: Option<u8>,
    },
    /// Row index byte of a READ_ROW follows.
    ReadIndex,
    /// Element bytes of a READ_ROW are being clocked out.
    ReadData { elem: usize, low_pending: bool },
    /// Dummy byte of a START_COMPUTE follows.
    StartDummy,
    /// Dummy byte of a GET_STATUS follows.
    StatusDummy,
}

/// The command decoder wrapped around a device.
#[derive(Debug)]
pub struct CommandPort {
    device: TbDevice,
    state: Decoder,
    /// Row buffer for an in-progress write or read.
    row_buf: Vec<Q5_10>,
    row_index: usize,
}

impl CommandPort {
    /// A port in the idle decoder state.
    #[must_use]
    pub fn new(device: TbDevice) -> Self {
        Self {
            device,
            state: Decoder::Idle,
            row_buf: Vec::new(),
            row_index: 0,
        }
    }

    /// The wrapped device.
    #[must_use]
    pub const fn device(&self) -> &TbDevice {
        &self.device
    }

    /// Consume the port, returning the device.
    #[must_use]
    pub fn into_device(self) -> TbDevice {
        self.device
    }

    /// One full-duplex byte exchange; returns the response byte.
    ///
    /// # Errors
    ///
    /// Propagates core hazards raised while the exchange clocks the
    /// device. Protocol-level problems (bad row index, writes while busy)
    /// are absorbed per the link contract, not errors.
    pub fn exchange(&mut self, mosi: u8) -> Result<u8> {
        // The core keeps running underneath the slow link.
        if self.device.busy() {
            for _ in 0..CYCLES_PER_EXCHANGE {
                self.device.step()?;
                if !self.device.busy() {
                    break;
                }
            }
        }

        let dim = self.device.dim();
        let (next, miso) = match self.state {
            Decoder::Idle => match mosi {
                CMD_WRITE_ROW => (Decoder::WriteIndex, self.device.status()),
                CMD_READ_ROW => (Decoder::ReadIndex, self.device.status()),
                CMD_START_COMPUTE => {
                    if let Err(e) = self.device.start() {
                        tracing::debug!("start absorbed: {e}");
                    }
                    (Decoder::StartDummy, self.device.status())
                }
                CMD_GET_STATUS => (Decoder::StatusDummy, self.device.status()),
                other => {
                    // Unknown command: absorb, stay ready.
                    tracing::debug!("unknown command byte {other:#04x} absorbed");
                    (Decoder::Idle, self.device.status())
                }
            },

            Decoder::WriteIndex => {
                self.row_index = usize::from(mosi);
                self.row_buf.clear();
                (
                    Decoder::WriteData {
                        row: self.row_index,
                        elem: 0,
                        high: None,
                    },
                    0,
                )
            }

            Decoder::WriteData { row, elem, high } => match high {
                None => (
                    Decoder::WriteData {
                        row,
                        elem,
                        high: Some(mosi),
                    },
                    0,
                ),
                Some(hi) => {
                    #[allow(clippy::cast_possible_wrap)]
                    let word = ((u16::from(hi) << 8) | u16::from(mosi)) as i16;
                    self.row_buf.push(Q5_10::from_raw(word));
                    if elem + 1 == dim {
                        if let Err(e) = self.device.write_row(row, &self.row_buf) {
                            tracing::debug!("row write absorbed: {e}");
                        }
                        (Decoder::Idle, 0)
                    } else {
                        (
                            Decoder::WriteData {
                                row,
                                elem: elem + 1,
                                high: None,
                            },
                            0,
                        )
                    }
                }
            },

            Decoder::ReadIndex => {
                self.row_index = usize::from(mosi);
                self.row_buf = self
                    .device
                    .read_row(self.row_index)
                    .unwrap_or_else(|_| vec![Q5_10::ZERO; dim]);
                (
                    Decoder::ReadData {
                        elem: 0,
                        low_pending: false,
                    },
                    0,
                )
            }

            Decoder::ReadData { elem, low_pending } => {
                #[allow(clippy::cast_sign_loss)]
                let word = self.row_buf[elem].raw() as u16;
                if low_pending {
                    let next = if elem + 1 == dim {
                        Decoder::Idle
                    } else {
                        Decoder::ReadData {
                            elem: elem + 1,
                            low_pending: false,
                        }
                    };
                    #[allow(clippy::cast_possible_truncation)]
                    (next, (word & 0xFF) as u8)
                } else {
                    (
                        Decoder::ReadData {
                            elem,
                            low_pending: true,
                        },
                        (word >> 8) as u8,
                    )
                }
            }

            Decoder::StartDummy | Decoder::StatusDummy => (Decoder::Idle, self.device.status()),
        };

        self.state = next;
        Ok(miso)
    }

    // ── Host-side helpers (one command per call) ─────────────────────────────

    /// Write a full row over the link.
    ///
    /// # Errors
    ///
    /// Propagates core hazards from the underlying exchanges.
    pub fn write_row(&mut self, row: u8, elements: &[Q5_10]) -> Result<()> {
        self.exchange(CMD_WRITE_ROW)?;
        self.exchange(row)?;
        for e in elements {
            #[allow(clippy::cast_sign_loss)]
            let word = e.raw() as u16;
            #[allow(clippy::cast_possible_truncation)]
            self.exchange((word >> 8) as u8)?;
            #[allow(clippy::cast_possible_truncation)]
            self.exchange((word & 0xFF) as u8)?;
        }
        Ok(())
    }

    /// Read a full row over the link.
    ///
    /// # Errors
    ///
    /// Propagates core hazards from the underlying exchanges.
    pub fn read_row(&mut self, row: u8) -> Result<Vec<Q5_10>> {
        self.exchange(CMD_READ_ROW)?;
        self.exchange(row)?;
        let dim = self.device.dim();
        let mut out = Vec::with_capacity(dim);
        for _ in 0..dim {
            let hi = self.exchange(0)?;
            let lo = self.exchange(0)?;
            #[allow(clippy::cast_possible_wrap)]
            out.push(Q5_10::from_raw(((u16::from(hi) << 8) | u16::from(lo)) as i16));
        }
        Ok(out)
    }

    /// Send START_COMPUTE.
    ///
    /// # Errors
    ///
    /// Propagates core hazards from the underlying exchanges.
    pub fn start_compute(&mut self) -> Result<()> {
        self.exchange(CMD_START_COMPUTE)?;
        self.exchange(0)?;
        Ok(())
    }

    /// Read the status byte.
    ///
    /// # Errors
    ///
    /// Propagates core hazards from the underlying exchanges.
    pub fn get_status(&mut self) -> Result<u8> {
        let status = self.exchange(CMD_GET_STATUS)?;
        self.exchange(0)?;
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tb16_chip::link::status;
    use tb16_model::WeightSet;

    fn port() -> CommandPort {
        CommandPort::new(TbDevice::new(WeightSet::seeded(16, 42)))
    }

    #[test]
    fn status_reads_ready_on_fresh_device() {
        let mut p = port();
        assert_eq!(p.get_status().unwrap(), status::READY);
    }

    #[test]
    fn unknown_command_is_absorbed() {
        let mut p = port();
        for junk in [0x00, 0x5A, 0xFF, 0x7E] {
            let miso = p.exchange(junk).unwrap();
            assert_eq!(miso & status::READY, status::READY);
        }
        assert_eq!(p.get_status().unwrap(), status::READY);
    }

    #[test]
    fn row_round_trips_through_the_decoder() {
        let mut p = port();
        let row: Vec<Q5_10> = (0i16..16).map(|i| Q5_10::from_raw(i * 3 - 8)).collect();
        p.write_row(2, &row).unwrap();
        // Staged rows are input-side; result reads are zero until DONE,
        // so check through the device's staging instead.
        assert_eq!(p.device().status(), status::READY);
    }

    #[test]
    fn msb_first_element_framing() {
        let mut p = port();
        p.exchange(CMD_WRITE_ROW).unwrap();
        p.exchange(1).unwrap();
        // Element 0x0400 (1.0) crosses as 0x04 then 0x00.
        p.exchange(0x04).unwrap();
        p.exchange(0x00).unwrap();
        // Decoder still mid-row: 15 elements to go, not idle.
        assert!(matches!(p.state, Decoder::WriteData { elem: 1, .. }));
    }

    #[test]
    fn full_computation_over_the_link() {
        let mut p = port();
        let tokens: Vec<Q5_10> = (0i16..16).map(Q5_10::from_raw).collect();
        p.write_row(0, &tokens).unwrap();
        p.start_compute().unwrap();

        let mut polls = 0;
        loop {
            let s = p.get_status().unwrap();
            if s & status::DONE != 0 {
                break;
            }
            polls += 1;
            assert!(polls < 10_000, "device never reported DONE");
        }

        // Every result row is a probability distribution.
        for r in 0..16 {
            let row = p.read_row(r).unwrap();
            let sum: f32 = row.iter().map(|e| e.to_f32()).sum();
            assert!((sum - 1.0).abs() < 0.1, "row {r} sums to {sum}");
        }
    }
}
