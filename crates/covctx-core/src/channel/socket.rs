//! Socket transport
//!
//! The publisher binds a TCP listener on an unused loopback port and accepts
//! any number of subscribers. Every label change is written as one frame to
//! each connected subscriber while the subscriber set is locked, so frames
//! reach each subscriber in publish order. A subscriber that connects late
//! only sees messages published after it connected.

use super::codec::{FrameDecoder, Message};
use super::{ChannelIdentity, ContextChannel};
use crate::config::ContextConfig;
use crate::error::ChannelError;
use crate::label::ContextLabel;
use crate::port::{localhost, PortAllocator};
use parking_lot::Mutex;
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// State shared with the acceptor thread
#[derive(Debug)]
struct Shared {
    subscribers: Mutex<Vec<TcpStream>>,
    closing: AtomicBool,
    write_timeout: Duration,
}

/// Publisher side of the socket transport
#[derive(Debug)]
pub struct SocketChannel {
    address: SocketAddr,
    shared: Arc<Shared>,
    acceptor: Option<JoinHandle<()>>,
    linger: Duration,
}

impl SocketChannel {
    /// Bind the channel on an unused loopback port
    ///
    /// Ports come from the process-wide [`PortAllocator`]. A port taken by
    /// someone else between selection and bind is retried with a fresh port,
    /// up to `config.max_bind_attempts` times.
    ///
    /// # Errors
    /// - `ChannelError::PortExhausted` if every attempt collided
    /// - `ChannelError::Io` for any other bind or spawn failure
    pub fn bind(config: &ContextConfig) -> Result<Self, ChannelError> {
        let listener = bind_unused(PortAllocator::global(), config.max_bind_attempts)?;
        let address = listener
            .local_addr()
            .map_err(|e| ChannelError::io("listener address", e))?;

        let shared = Arc::new(Shared {
            subscribers: Mutex::new(Vec::new()),
            closing: AtomicBool::new(false),
            write_timeout: config.write_timeout(),
        });

        let acceptor_shared = Arc::clone(&shared);
        let acceptor = std::thread::Builder::new()
            .name("covctx-acceptor".to_string())
            .spawn(move || accept_loop(&listener, &acceptor_shared))
            .map_err(|e| ChannelError::io("spawn acceptor", e))?;

        tracing::debug!("Socket channel bound on {}", address);

        Ok(Self {
            address,
            shared,
            acceptor: Some(acceptor),
            linger: config.linger(),
        })
    }

    /// Bound address
    #[inline]
    #[must_use]
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Number of connected subscribers
    #[must_use]
    pub fn connected(&self) -> usize {
        self.shared.subscribers.lock().len()
    }

    /// Write one message to every subscriber, dropping the ones that fail
    ///
    /// A message that cannot be framed is not written to anyone.
    fn broadcast(&self, message: &Message) -> Result<(), ChannelError> {
        let frame = message.encode()?;
        let mut subscribers = self.shared.subscribers.lock();
        subscribers.retain_mut(|stream| match stream.write_all(&frame) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    "Dropping subscriber {:?}: {}",
                    stream.peer_addr().ok(),
                    e
                );
                false
            }
        });
        Ok(())
    }

    /// Stop accepting and join the acceptor thread
    fn stop_acceptor(&mut self) {
        self.shared.closing.store(true, Ordering::SeqCst);
        if let Some(handle) = self.acceptor.take() {
            // Wake the blocking accept so it sees the closing flag
            let _ = TcpStream::connect_timeout(&self.address, Duration::from_millis(500));
            if handle.join().is_err() {
                tracing::warn!("Acceptor thread for {} panicked", self.address);
            }
        }
    }
}

impl ContextChannel for SocketChannel {
    fn identity(&self) -> ChannelIdentity {
        ChannelIdentity::Socket(self.address)
    }

    fn publish(&mut self, label: &ContextLabel) -> Result<(), ChannelError> {
        self.broadcast(&Message::for_label(label))
    }

    fn close(&mut self) -> Result<(), ChannelError> {
        if self.acceptor.is_none() {
            return Ok(());
        }

        self.stop_acceptor();
        if let Err(e) = self.broadcast(&Message::Stop) {
            tracing::warn!("Stop not sent on {}: {}", self.address, e);
        }

        let subscribers = std::mem::take(&mut *self.shared.subscribers.lock());
        let deadline = Instant::now() + self.linger;
        for stream in subscribers {
            linger_close(stream, deadline);
        }

        tracing::debug!("Socket channel on {} closed", self.address);
        Ok(())
    }

    fn subscriber_count(&self) -> Option<usize> {
        Some(self.connected())
    }
}

impl Drop for SocketChannel {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Bind a loopback listener on a freshly selected port
fn bind_unused(allocator: &PortAllocator, max_attempts: u32) -> Result<TcpListener, ChannelError> {
    let attempts = max_attempts.max(1);
    for attempt in 1..=attempts {
        let port = allocator.unused_localhost_port()?;
        match TcpListener::bind(localhost(port)) {
            Ok(listener) => return Ok(listener),
            Err(e) if e.kind() == ErrorKind::AddrInUse => {
                tracing::debug!(
                    "Port {} taken before bind (attempt {}/{})",
                    port,
                    attempt,
                    attempts
                );
            }
            Err(e) => return Err(ChannelError::io("bind", e)),
        }
    }
    Err(ChannelError::PortExhausted { attempts })
}

fn accept_loop(listener: &TcpListener, shared: &Shared) {
    for incoming in listener.incoming() {
        if shared.closing.load(Ordering::SeqCst) {
            break;
        }
        match incoming {
            Ok(stream) => {
                let _ = stream.set_nodelay(true);
                if let Err(e) = stream.set_write_timeout(Some(shared.write_timeout)) {
                    tracing::warn!("Rejecting subscriber: {}", e);
                    continue;
                }
                tracing::debug!("Subscriber connected from {:?}", stream.peer_addr().ok());
                shared.subscribers.lock().push(stream);
            }
            Err(e) => {
                tracing::debug!("Accept failed: {}", e);
            }
        }
    }
}

/// Half-close `stream` and wait until the peer hangs up or `deadline` passes
///
/// The subscriber closes its end once it has taken the stop sentinel, which
/// shows up here as end-of-stream.
fn linger_close(mut stream: TcpStream, deadline: Instant) {
    let _ = stream.shutdown(Shutdown::Write);
    let mut scratch = [0u8; 256];
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() || stream.set_read_timeout(Some(remaining)).is_err() {
            break;
        }
        match stream.read(&mut scratch) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
    }
    let _ = stream.shutdown(Shutdown::Both);
}

/// Subscriber side of the socket transport
///
/// A blocking connection to a publisher that yields messages in publish order.
#[derive(Debug)]
pub struct SocketSubscriber {
    stream: TcpStream,
    decoder: FrameDecoder,
}

impl SocketSubscriber {
    /// Connect to the publisher at `address`
    ///
    /// # Errors
    /// - `ChannelError::Io` if the connection cannot be made
    pub fn connect(address: SocketAddr) -> Result<Self, ChannelError> {
        let stream = TcpStream::connect(address).map_err(|e| ChannelError::io("connect", e))?;
        let _ = stream.set_nodelay(true);
        Ok(Self {
            stream,
            decoder: FrameDecoder::new(),
        })
    }

    /// Bound how long a single `recv` blocks; `None` blocks indefinitely
    ///
    /// # Errors
    /// - `ChannelError::Io` if the timeout cannot be applied
    pub fn set_timeout(&self, timeout: Option<Duration>) -> Result<(), ChannelError> {
        self.stream
            .set_read_timeout(timeout)
            .map_err(|e| ChannelError::io("set read timeout", e))
    }

    /// Receive the next message
    ///
    /// Returns `Ok(None)` when the read timeout elapsed without a complete
    /// frame; buffered partial frames are kept for the next call.
    ///
    /// # Errors
    /// - `ChannelError::Closed` if the publisher hung up
    /// - `ChannelError::MalformedFrame` on undecodable data
    /// - `ChannelError::Io` on other socket failures
    pub fn recv(&mut self) -> Result<Option<Message>, ChannelError> {
        let mut chunk = [0u8; 4096];
        loop {
            if let Some(message) = self.decoder.next_message()? {
                return Ok(Some(message));
            }
            match self.stream.read(&mut chunk) {
                Ok(0) => return Err(ChannelError::Closed),
                Ok(n) => self.decoder.extend(&chunk[..n]),
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Ok(None);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(ChannelError::io("receive", e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use covctx_test_utils::wait_until;

    fn test_config() -> ContextConfig {
        ContextConfig::new()
            .with_export_env(false)
            .with_linger(Duration::from_millis(500))
    }

    fn label(text: &str) -> ContextLabel {
        ContextLabel::new(text).unwrap()
    }

    fn recv_blocking(subscriber: &mut SocketSubscriber) -> Message {
        subscriber.set_timeout(Some(Duration::from_secs(5))).unwrap();
        subscriber.recv().unwrap().expect("message before timeout")
    }

    #[test]
    fn fan_out_in_publish_order() {
        let mut channel = SocketChannel::bind(&test_config()).unwrap();
        let mut first = SocketSubscriber::connect(channel.address()).unwrap();
        let mut second = SocketSubscriber::connect(channel.address()).unwrap();
        assert!(wait_until(Duration::from_secs(5), || channel.connected() == 2));

        channel.publish(&label("test_x|setup")).unwrap();
        channel.publish(&ContextLabel::none()).unwrap();

        for subscriber in [&mut first, &mut second] {
            assert_eq!(recv_blocking(subscriber), Message::Set(label("test_x|setup")));
            assert_eq!(recv_blocking(subscriber), Message::Clear);
        }

        channel.close().unwrap();
    }

    #[test]
    fn late_subscriber_sees_only_future_messages() {
        let mut channel = SocketChannel::bind(&test_config()).unwrap();
        channel.publish(&label("collection")).unwrap();

        let mut late = SocketSubscriber::connect(channel.address()).unwrap();
        assert!(wait_until(Duration::from_secs(5), || channel.connected() == 1));
        channel.publish(&label("test_y|call")).unwrap();

        assert_eq!(recv_blocking(&mut late), Message::Set(label("test_y|call")));
        channel.close().unwrap();
    }

    #[test]
    fn close_sends_stop_then_hangs_up() {
        let mut channel = SocketChannel::bind(&test_config()).unwrap();
        let mut subscriber = SocketSubscriber::connect(channel.address()).unwrap();
        assert!(wait_until(Duration::from_secs(5), || channel.connected() == 1));

        channel.close().unwrap();

        assert_eq!(recv_blocking(&mut subscriber), Message::Stop);
        assert!(matches!(subscriber.recv(), Err(ChannelError::Closed)));
        channel.close().unwrap();
    }

    #[test]
    fn dead_subscriber_is_dropped() {
        let mut channel = SocketChannel::bind(&test_config()).unwrap();
        let subscriber = SocketSubscriber::connect(channel.address()).unwrap();
        assert!(wait_until(Duration::from_secs(5), || channel.connected() == 1));
        drop(subscriber);

        // The first write after the peer vanished may still succeed locally;
        // the reset surfaces on a following one.
        assert!(wait_until(Duration::from_secs(5), || {
            channel.publish(&label("test_z|call")).unwrap();
            channel.connected() == 0
        }));
        channel.close().unwrap();
    }

    #[test]
    fn oversized_label_is_refused_without_writing() {
        let mut channel = SocketChannel::bind(&test_config()).unwrap();
        let mut subscriber = SocketSubscriber::connect(channel.address()).unwrap();
        assert!(wait_until(Duration::from_secs(5), || channel.connected() == 1));

        let node = "n".repeat(crate::channel::codec::MAX_FRAME_LEN);
        let oversized = ContextLabel::phase(&node, crate::label::TestPhase::Call);
        assert!(matches!(
            channel.publish(&oversized),
            Err(ChannelError::MalformedFrame(_))
        ));
        assert_eq!(channel.connected(), 1);

        channel.publish(&label("test_x|call")).unwrap();
        assert_eq!(recv_blocking(&mut subscriber), Message::Set(label("test_x|call")));
        channel.close().unwrap();
    }

    #[test]
    fn recv_times_out_without_data() {
        let mut channel = SocketChannel::bind(&test_config()).unwrap();
        let mut subscriber = SocketSubscriber::connect(channel.address()).unwrap();
        subscriber.set_timeout(Some(Duration::from_millis(50))).unwrap();
        assert!(subscriber.recv().unwrap().is_none());
        channel.close().unwrap();
    }

    #[test]
    fn zero_attempt_budget_still_binds_once() {
        let allocator = PortAllocator::new(Duration::from_secs(60));
        let listener = bind_unused(&allocator, 0).unwrap();
        assert!(listener.local_addr().unwrap().ip().is_loopback());
    }
}
