//! UDP frame transport.
//!
//! One connected socket per device endpoint, fronted by fixed recv/send
//! buffer pools. The receive side parks on a mio poll between datagrams so
//! the scavenger thread sleeps instead of spinning; [`UdpTransport::wake`]
//! uses a mio waker to break that park at shutdown.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mio::{Events, Interest, Poll, Token, Waker};

use crate::net::{Endpoint, UdpSocket};
use crate::time::{Deadline, Timeout};
use crate::trace::warn;

use super::frame::{FrameSink, RecvFrame, SendFrame};
use super::pool::BufferPool;
use super::FrameTransport;

const SOCKET_TOKEN: Token = Token(0);
const WAKE_TOKEN: Token = Token(1);

/// Longest single park on the poll; the deadline loop re-arms as needed.
const PARK_SLICE: Duration = Duration::from_millis(250);

/// Default pool geometry: enough datagram-sized frames to ride out one
/// scheduler quantum at full rate.
pub const DEFAULT_NUM_FRAMES: usize = 32;
/// Default frame size: max UDP payload over 1500-byte Ethernet.
pub const DEFAULT_FRAME_SIZE: usize = 1472;

/// Pool geometry for a UDP transport.
#[derive(Debug, Clone, Copy)]
pub struct UdpTransportConfig {
    pub num_recv_frames: usize,
    pub recv_frame_size: usize,
    pub num_send_frames: usize,
    pub send_frame_size: usize,
    /// Kernel socket buffer sizes; sized for sustained streaming.
    pub so_rcvbuf: usize,
    pub so_sndbuf: usize,
}

impl Default for UdpTransportConfig {
    fn default() -> Self {
        Self {
            num_recv_frames: DEFAULT_NUM_FRAMES,
            recv_frame_size: DEFAULT_FRAME_SIZE,
            num_send_frames: DEFAULT_NUM_FRAMES,
            send_frame_size: DEFAULT_FRAME_SIZE,
            so_rcvbuf: 8 * 1024 * 1024,
            so_sndbuf: 1024 * 1024,
        }
    }
}

/// Send half shared with outstanding [`SendFrame`]s.
struct UdpSink {
    socket: Arc<UdpSocket>,
    send_pool: Arc<BufferPool>,
}

impl FrameSink for UdpSink {
    fn commit(&self, bytes: &[u8]) -> io::Result<()> {
        // UDP sends rarely block; bound the retry instead of polling for
        // writability.
        let deadline = Deadline::new(Timeout::Duration(Duration::from_millis(100)));
        loop {
            match self.socket.try_send(bytes)? {
                Some(_) => return Ok(()),
                None if deadline.expired() => {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "send buffer full",
                    ));
                }
                None => std::hint::spin_loop(),
            }
        }
    }

    fn recycle(&self, buf: Box<[u8]>) {
        self.send_pool.release(buf);
    }
}

/// Mutable poll state; the scavenger is the sole recv-side caller, so this
/// lock is uncontended.
struct RecvPoll {
    poll: Poll,
    events: Events,
}

/// A zero-copy frame channel over one connected UDP socket.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    recv_pool: Arc<BufferPool>,
    sink: Arc<UdpSink>,
    recv_poll: Mutex<RecvPoll>,
    waker: Waker,
    woken: AtomicBool,
    send_frame_size: usize,
}

impl UdpTransport {
    /// Connects to `peer` with default pool geometry.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be created or registered.
    pub fn connect(peer: Endpoint) -> io::Result<Self> {
        Self::with_config(peer, UdpTransportConfig::default())
    }

    /// Connects to `peer` with explicit pool geometry.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be created or registered.
    pub fn with_config(peer: Endpoint, config: UdpTransportConfig) -> io::Result<Self> {
        let mut socket = UdpSocket::connected(peer)?;
        socket.set_recv_buffer_size(config.so_rcvbuf)?;
        socket.set_send_buffer_size(config.so_sndbuf)?;

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut socket, SOCKET_TOKEN, Interest::READABLE)?;
        let waker = Waker::new(poll.registry(), WAKE_TOKEN)?;

        let socket = Arc::new(socket);
        let send_pool = BufferPool::new(config.num_send_frames, config.send_frame_size);
        Ok(Self {
            socket: Arc::clone(&socket),
            recv_pool: BufferPool::new(config.num_recv_frames, config.recv_frame_size),
            sink: Arc::new(UdpSink {
                socket,
                send_pool,
            }),
            recv_poll: Mutex::new(RecvPoll {
                poll,
                events: Events::with_capacity(4),
            }),
            waker,
            woken: AtomicBool::new(false),
            send_frame_size: config.send_frame_size,
        })
    }

    /// Local endpoint of the connected socket.
    ///
    /// # Errors
    ///
    /// Returns an error if the local address cannot be retrieved.
    pub fn local_addr(&self) -> io::Result<Endpoint> {
        self.socket.local_addr()
    }
}

impl FrameTransport for UdpTransport {
    fn acquire_recv_frame(&self, timeout: Timeout) -> Option<RecvFrame> {
        let deadline = Deadline::new(timeout);
        let mut buf = self.recv_pool.acquire(timeout)?;

        let mut state = self.recv_poll.lock().expect("poll state poisoned");
        loop {
            if self.woken.swap(false, Ordering::AcqRel) {
                self.recv_pool.release(buf);
                return None;
            }
            match self.socket.try_recv(&mut buf) {
                Ok(Some(len)) => {
                    return Some(RecvFrame::new(buf, len, Arc::clone(&self.recv_pool)));
                }
                Ok(None) => {}
                Err(_e) => {
                    warn!(error = %_e, "recv failed, dropping frame slot");
                    self.recv_pool.release(buf);
                    return None;
                }
            }
            let Some(remaining) = deadline.remaining() else {
                self.recv_pool.release(buf);
                return None;
            };
            let RecvPoll { poll, events } = &mut *state;
            if let Err(_e) = poll.poll(events, Some(remaining.min(PARK_SLICE))) {
                warn!(error = %_e, "poll failed");
                self.recv_pool.release(buf);
                return None;
            }
        }
    }

    fn acquire_send_frame(&self, timeout: Timeout) -> Option<SendFrame> {
        let buf = self.sink.send_pool.acquire(timeout)?;
        Some(SendFrame::new(
            buf,
            Arc::clone(&self.sink) as Arc<dyn FrameSink>,
        ))
    }

    fn num_recv_frames(&self) -> usize {
        self.recv_pool.num_frames()
    }

    fn recv_frame_size(&self) -> usize {
        self.recv_pool.frame_size()
    }

    fn send_frame_size(&self) -> usize {
        self.send_frame_size
    }

    fn wake(&self) {
        self.woken.store(true, Ordering::Release);
        // A failed wake only delays shutdown by one park slice.
        let _ = self.waker.wake();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_roundtrip() {
        let peer = UdpSocket::bind(Endpoint::localhost(0)).unwrap();
        let transport = UdpTransport::connect(peer.local_addr().unwrap()).unwrap();

        // Send a frame out through the pool path.
        let mut frame = transport
            .acquire_send_frame(Timeout::from_secs_f64(1.0))
            .unwrap();
        frame.as_mut_slice()[..8].copy_from_slice(b"datagram");
        frame.commit(8).unwrap();

        // Echo it back at the transport's local port.
        let mut buf = [0u8; 64];
        let mut echoed = false;
        for _ in 0..200 {
            if let Ok(Some((n, from))) = peer.try_recv_from(&mut buf) {
                assert_eq!(from, transport.local_addr().unwrap());
                peer.send_to(&buf[..n], from).unwrap();
                echoed = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(echoed, "probe datagram never arrived");

        let frame = transport
            .acquire_recv_frame(Timeout::from_secs_f64(2.0))
            .expect("echo should arrive");
        assert_eq!(&frame[..], b"datagram");

        // Dropping the frame refills the pool completely.
        drop(frame);
        assert_eq!(transport.recv_pool.available(), DEFAULT_NUM_FRAMES);
    }

    #[test]
    fn recv_times_out_without_traffic() {
        let peer = UdpSocket::bind(Endpoint::localhost(0)).unwrap();
        let transport = UdpTransport::connect(peer.local_addr().unwrap()).unwrap();
        let start = std::time::Instant::now();
        assert!(
            transport
                .acquire_recv_frame(Timeout::Duration(Duration::from_millis(30)))
                .is_none()
        );
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn wake_unblocks_recv() {
        let peer = UdpSocket::bind(Endpoint::localhost(0)).unwrap();
        let transport = Arc::new(UdpTransport::connect(peer.local_addr().unwrap()).unwrap());

        let waker = Arc::clone(&transport);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            waker.wake();
        });

        let start = std::time::Instant::now();
        let got = transport.acquire_recv_frame(Timeout::Duration(Duration::from_secs(10)));
        handle.join().unwrap();
        assert!(got.is_none());
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
