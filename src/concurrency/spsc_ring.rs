//! Single-producer / single-consumer byte ring (§4.1).
//!
//! Capacity is `buf_byte_n` bytes; the write pointer never advances to equal
//! the read pointer, so empty is `r == w` and the usable capacity is
//! `buf_byte_n - 1`. The producer never blocks: a full buffer is reported as
//! [`Error::BufferTooSmall`]. The consumer's `copy_out` atomically drains all
//! available bytes up to the caller's supplied size, returning zero when
//! empty. There is no blocking API on either side.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};

struct Inner {
    buf: UnsafeCell<Vec<u8>>,
    cap: usize,
    read: AtomicUsize,
    write: AtomicUsize,
}

// SAFETY: `buf` is only ever written by the single producer and only ever
// read by the single consumer, and the read/write atomics establish
// happens-before edges around every region of `buf` either side touches.
unsafe impl Sync for Inner {}

/// Splits a new ring of `buf_byte_n` bytes into its producer and consumer
/// halves. Usable capacity is `buf_byte_n - 1`.
pub fn spsc_ring(buf_byte_n: usize) -> (Producer, Consumer) {
    assert!(buf_byte_n >= 2, "ring must hold at least one usable byte");
    let inner = Arc::new(Inner {
        buf: UnsafeCell::new(vec![0u8; buf_byte_n]),
        cap: buf_byte_n,
        read: AtomicUsize::new(0),
        write: AtomicUsize::new(0),
    });
    (
        Producer { inner: inner.clone() },
        Consumer { inner },
    )
}

pub struct Producer {
    inner: Arc<Inner>,
}

pub struct Consumer {
    inner: Arc<Inner>,
}

impl Producer {
    /// Usable free space, in bytes, as of this call.
    pub fn avail_write(&self) -> usize {
        let r = self.inner.read.load(Ordering::Acquire);
        let w = self.inner.write.load(Ordering::Relaxed);
        self.inner.cap - 1 - distance(r, w, self.inner.cap)
    }

    /// Copies `data` into the ring. Fails with [`Error::BufferTooSmall`]
    /// without partially writing if there isn't room for all of it; the
    /// producer never blocks.
    pub fn copy_in(&self, data: &[u8]) -> Result<()> {
        let cap = self.inner.cap;
        let r = self.inner.read.load(Ordering::Acquire);
        let w = self.inner.write.load(Ordering::Relaxed);
        let free = cap - 1 - distance(r, w, cap);
        if data.len() > free {
            return Err(Error::BufferTooSmall { needed: data.len(), have: free });
        }
        // SAFETY: only the producer writes, and only into the region past
        // `w` that the consumer (bounded by `r`) cannot be reading.
        let buf = unsafe { &mut *self.inner.buf.get() };
        let mut idx = w;
        for &b in data {
            buf[idx] = b;
            idx = (idx + 1) % cap;
        }
        self.inner.write.store(idx, Ordering::Release);
        Ok(())
    }
}

impl Consumer {
    /// Bytes currently available to read.
    pub fn avail_read(&self) -> usize {
        let w = self.inner.write.load(Ordering::Acquire);
        let r = self.inner.read.load(Ordering::Relaxed);
        distance(r, w, self.inner.cap)
    }

    /// Drains up to `out.len()` bytes into `out`, returning the number of
    /// bytes actually copied (zero when empty). Never blocks.
    pub fn copy_out(&self, out: &mut [u8]) -> usize {
        let cap = self.inner.cap;
        let w = self.inner.write.load(Ordering::Acquire);
        let r = self.inner.read.load(Ordering::Relaxed);
        let avail = distance(r, w, cap);
        let n = avail.min(out.len());
        // SAFETY: only the consumer reads, and only the region already
        // published by the producer via `write`'s Release store.
        let buf = unsafe { &*self.inner.buf.get() };
        let mut idx = r;
        for slot in out.iter_mut().take(n) {
            *slot = buf[idx];
            idx = (idx + 1) % cap;
        }
        self.inner.read.store(idx, Ordering::Release);
        n
    }
}

fn distance(r: usize, w: usize, cap: usize) -> usize {
    if w >= r {
        w - r
    } else {
        cap - r + w
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_ring_reads_zero() {
        let (_p, c) = spsc_ring(16);
        let mut out = [0u8; 4];
        assert_eq!(c.copy_out(&mut out), 0);
    }

    #[test]
    fn usable_capacity_is_n_minus_one() {
        let (p, _c) = spsc_ring(8);
        assert_eq!(p.avail_write(), 7);
        p.copy_in(&[1; 7]).unwrap();
        assert_eq!(p.avail_write(), 0);
        assert!(p.copy_in(&[1]).is_err());
    }

    #[test]
    fn roundtrip_preserves_bytes_and_order() {
        let (p, c) = spsc_ring(1024);
        let handle = std::thread::spawn(move || {
            let mut received = Vec::new();
            let mut buf = [0u8; 64];
            while received.len() < 10_000 {
                let n = c.copy_out(&mut buf);
                received.extend_from_slice(&buf[..n]);
            }
            received
        });
        let mut sent = Vec::new();
        let mut i: u8 = 0;
        while sent.len() < 10_000 {
            let chunk: Vec<u8> = (0..17).map(|_| {
                i = i.wrapping_add(1);
                i
            }).collect();
            while p.copy_in(&chunk).is_err() {
                std::thread::yield_now();
            }
            sent.extend_from_slice(&chunk);
        }
        let received = handle.join().unwrap();
        assert_eq!(&received[..10_000], &sent[..10_000]);
    }

    /// Frame format adopted from the original ring's self-test harness:
    /// `[0x01, n, csum, payload[0..n]]`.
    #[test]
    fn framed_checksum_roundtrip() {
        let (p, c) = spsc_ring(1024);
        const N: u8 = 14;
        let mut frame = vec![0x01u8, N, 0];
        let payload: Vec<u8> = (0..N).collect();
        let csum = payload.iter().fold(0u8, |a, &b| a.wrapping_add(b));
        frame[2] = csum;
        frame.extend_from_slice(&payload);
        p.copy_in(&frame).unwrap();

        let mut out = vec![0u8; frame.len()];
        let n = c.copy_out(&mut out);
        assert_eq!(n, frame.len());
        assert_eq!(out[0], 0x01);
        assert_eq!(out[1], N);
        let body = &out[3..3 + N as usize];
        let check = body.iter().fold(0u8, |a, &b| a.wrapping_add(b));
        assert_eq!(check, out[2]);
    }
}
