//! Single-channel DMA UART log sink.
//!
//! The original claims one DMA channel, fires a transfer into a `malloc`'d
//! scratch buffer, and frees that buffer later from a repeating timer
//! callback once the channel reports idle. Hubris tasks don't have a heap
//! and don't want a timer just to reclaim a buffer, so this keeps the same
//! single-channel, drop-on-busy contract but owns the scratch buffer inline
//! and reclaims it by polling the channel's busy bit from [`LogSink::poll`],
//! which callers are expected to invoke once per loop iteration (the same
//! cadence [`crate::lockout::Lockout::poll_as_victim`] already requires).
use rp2040_pac as device;

use crate::Trace;

/// Matches the original's `len + 2` (`\r\n`) framing budget with headroom.
const BUF_LEN: usize = 128;

/// RP2040 DMA `DREQ_UART0_TX`, paces the channel to the UART's TX FIFO.
const DREQ_UART0_TX: u8 = 20;

pub struct LogSink {
    channel: u8,
    buf: [u8; BUF_LEN],
    busy: bool,
}

impl LogSink {
    /// # Safety
    /// Caller must ensure the UART peripheral is already initialized
    /// (baud/format/pin mux) and that no other code drives DMA `channel`.
    pub unsafe fn new(channel: u8) -> Self {
        Self { channel, buf: [0; BUF_LEN], busy: false }
    }

    /// Reclaim the channel once its transfer has completed. Call once per
    /// loop iteration; a no-op while a transfer is still in flight.
    pub fn poll(&mut self) {
        if self.busy && !self.channel_busy() {
            self.busy = false;
        }
    }

    fn channel_busy(&self) -> bool {
        let dma = unsafe { &*device::DMA::ptr() };
        dma.ch[self.channel as usize]
            .ch_ctrl_trig
            .read()
            .busy()
            .bit_is_set()
    }

    /// Send `msg` appended with `\r\n`. Drops the message (returns `false`)
    /// if the previous transfer is still in flight or `msg` overflows the
    /// owned buffer, matching the original's "drop rather than block"
    /// policy.
    pub fn send(&mut self, msg: &str) -> bool {
        if self.busy {
            ringbuf::ringbuf_entry!(crate::TRACE, Trace::LogDropped);
            return false;
        }
        let bytes = msg.as_bytes();
        if bytes.len() + 2 > BUF_LEN {
            ringbuf::ringbuf_entry!(crate::TRACE, Trace::LogDropped);
            return false;
        }

        self.buf[..bytes.len()].copy_from_slice(bytes);
        self.buf[bytes.len()] = b'\r';
        self.buf[bytes.len() + 1] = b'\n';
        let len = bytes.len() + 2;

        let dma = unsafe { &*device::DMA::ptr() };
        let uart = unsafe { &*device::UART0::ptr() };
        let ch = &dma.ch[self.channel as usize];

        ch.ch_read_addr.write(|w| unsafe { w.bits(self.buf.as_ptr() as u32) });
        ch.ch_write_addr
            .write(|w| unsafe { w.bits(uart.uartdr.as_ptr() as u32) });
        ch.ch_trans_count.write(|w| unsafe { w.bits(len as u32) });
        ch.ch_ctrl_trig.write(|w| unsafe {
            w.data_size()
                .bits(0) // byte transfers
                .incr_read()
                .set_bit()
                .incr_write()
                .clear_bit()
                .treq_sel()
                .bits(DREQ_UART0_TX)
                .en()
                .set_bit()
        });

        self.busy = true;
        true
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }
}

#[cfg(test)]
mod tests {
    // LogSink touches real DMA/UART registers and can't be exercised on the
    // host; `drv/rp2040-platform`'s register-level modules are covered by
    // integration testing on hardware rather than unit tests here. The
    // owned-buffer framing logic (`\r\n` append, overflow check) mirrors
    // the tested `dvfs-persist` byte-layout conventions.
}
