//! The byte channel an endpoint drives.
//!
//! The endpoint owns exactly one full-duplex channel and never assumes
//! anything about what carries it: TCP, Unix sockets, serial lines and
//! in-process pipes all fit behind [`Channel`]. Blocking is allowed
//! here and only here; the state machine itself never blocks.

use std::io::{Read, Write};
use std::sync::mpsc::{channel as mpsc_channel, Receiver, Sender};

/// A full-duplex byte channel.
///
/// Both methods may transfer fewer bytes than offered. `recv` returning
/// `Ok(0)` means the peer is gone; the drive loop treats that as a
/// clean shutdown only when the state machine sits at a packet
/// boundary.
pub trait Channel: Send {
    /// Send up to `data.len()` bytes, returning how many were accepted.
    fn send(&mut self, data: &[u8]) -> std::io::Result<usize>;

    /// Receive up to `data.len()` bytes, returning how many arrived.
    fn recv(&mut self, data: &mut [u8]) -> std::io::Result<usize>;
}

/// Adapter making any blocking byte stream (TCP, Unix socket, serial)
/// usable as a [`Channel`].
pub struct StreamChannel<T> {
    stream: T,
}

impl<T: Read + Write + Send> StreamChannel<T> {
    pub fn new(stream: T) -> Self {
        StreamChannel { stream }
    }
}

impl<T: Read + Write + Send> Channel for StreamChannel<T> {
    fn send(&mut self, data: &[u8]) -> std::io::Result<usize> {
        let n = self.stream.write(data)?;
        self.stream.flush()?;
        Ok(n)
    }

    fn recv(&mut self, data: &mut [u8]) -> std::io::Result<usize> {
        self.stream.read(data)
    }
}

/// One end of an in-process duplex pipe; see [`pipe`].
pub struct PipeChannel {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    /// Bytes received but not yet handed to the caller.
    pending: Vec<u8>,
    pos: usize,
}

/// A connected pair of in-process channels.
///
/// Dropping one end makes the other's `recv` report EOF (`Ok(0)`) once
/// buffered bytes run out, and its `send` report zero acceptance.
pub fn pipe() -> (PipeChannel, PipeChannel) {
    let (tx_a, rx_b) = mpsc_channel();
    let (tx_b, rx_a) = mpsc_channel();
    (
        PipeChannel {
            tx: tx_a,
            rx: rx_a,
            pending: Vec::new(),
            pos: 0,
        },
        PipeChannel {
            tx: tx_b,
            rx: rx_b,
            pending: Vec::new(),
            pos: 0,
        },
    )
}

impl PipeChannel {
    fn drain_pending(&mut self, data: &mut [u8]) -> usize {
        let n = data.len().min(self.pending.len() - self.pos);
        data[..n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
        self.pos += n;
        if self.pos == self.pending.len() {
            self.pending.clear();
            self.pos = 0;
        }
        n
    }
}

impl Channel for PipeChannel {
    fn send(&mut self, data: &[u8]) -> std::io::Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        match self.tx.send(data.to_vec()) {
            Ok(()) => Ok(data.len()),
            // Receiver gone; report zero acceptance like a closed socket.
            Err(_) => Ok(0),
        }
    }

    fn recv(&mut self, data: &mut [u8]) -> std::io::Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        if self.pending.len() > self.pos {
            return Ok(self.drain_pending(data));
        }
        match self.rx.recv() {
            Ok(chunk) => {
                self.pending = chunk;
                self.pos = 0;
                Ok(self.drain_pending(data))
            }
            // Sender dropped: EOF.
            Err(_) => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipe_roundtrip_across_threads() {
        let (mut a, mut b) = pipe();

        let writer = std::thread::spawn(move || {
            assert_eq!(a.send(b"hel").unwrap(), 3);
            assert_eq!(a.send(b"lo").unwrap(), 2);
            a
        });

        let mut buf = [0u8; 5];
        let mut got = 0;
        while got < 5 {
            let n = b.recv(&mut buf[got..]).unwrap();
            assert!(n > 0);
            got += n;
        }
        assert_eq!(&buf, b"hello");
        writer.join().unwrap();
    }

    #[test]
    fn recv_reports_eof_after_peer_drop() {
        let (a, mut b) = pipe();
        drop(a);
        let mut buf = [0u8; 4];
        assert_eq!(b.recv(&mut buf).unwrap(), 0);
    }

    #[test]
    fn send_reports_zero_after_peer_drop() {
        let (mut a, b) = pipe();
        drop(b);
        assert_eq!(a.send(b"data").unwrap(), 0);
    }

    #[test]
    fn recv_drains_buffered_bytes_before_eof() {
        let (mut a, mut b) = pipe();
        a.send(b"tail").unwrap();
        drop(a);

        let mut buf = [0u8; 2];
        assert_eq!(b.recv(&mut buf).unwrap(), 2);
        assert_eq!(&buf, b"ta");
        assert_eq!(b.recv(&mut buf).unwrap(), 2);
        assert_eq!(&buf, b"il");
        assert_eq!(b.recv(&mut buf).unwrap(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn stream_channel_over_unix_socket() {
        use std::os::unix::net::{UnixListener, UnixStream};

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chan.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let server = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut chan = StreamChannel::new(stream);
            let mut buf = [0u8; 4];
            let n = chan.recv(&mut buf).unwrap();
            chan.send(&buf[..n]).unwrap();
        });

        let mut chan = StreamChannel::new(UnixStream::connect(&path).unwrap());
        chan.send(b"ping").unwrap();
        let mut buf = [0u8; 4];
        let mut got = 0;
        while got < 4 {
            let n = chan.recv(&mut buf[got..]).unwrap();
            assert!(n > 0);
            got += n;
        }
        assert_eq!(&buf, b"ping");
        server.join().unwrap();
    }
}
