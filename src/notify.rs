//! Notification transports.
//!
//! Ring hanya menentukan *kapan* peer harus di-signal; bagaimana signal
//! dikirim diserahkan ke [`Notifier`] milik tiap endpoint. Notifier producer
//! meng-kick consumer, notifier consumer meng-call producer.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mio::{Events, Poll, Token, Waker};

/// Wakes the peer endpoint. Must not block.
pub trait Notifier {
    fn notify(&self);
}

impl<N: Notifier + ?Sized> Notifier for &N {
    fn notify(&self) {
        (**self).notify()
    }
}

impl<N: Notifier + ?Sized> Notifier for Arc<N> {
    fn notify(&self) {
        (**self).notify()
    }
}

impl<N: Notifier + ?Sized> Notifier for Box<N> {
    fn notify(&self) {
        (**self).notify()
    }
}

/// Drops every signal. For peers that busy-poll.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self) {}
}

/// Counts signals. Clones share the counter.
#[derive(Debug, Clone, Default)]
pub struct CountingNotifier {
    count: Arc<AtomicU64>,
}

impl CountingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl Notifier for CountingNotifier {
    fn notify(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }
}

const WAKE_TOKEN: Token = Token(0);

/// Signalling half of a mio doorbell (an eventfd on Linux).
#[derive(Debug, Clone)]
pub struct MioNotifier {
    waker: Arc<Waker>,
}

impl Notifier for MioNotifier {
    fn notify(&self) {
        // A lost wake only costs the peer a spurious poll timeout; the ring
        // itself stays consistent.
        if let Err(e) = self.waker.wake() {
            tracing::warn!("doorbell wake failed: {}", e);
        }
    }
}

/// Waiting half of a mio doorbell.
#[derive(Debug)]
pub struct MioWaiter {
    poll: Poll,
    events: Events,
}

impl MioWaiter {
    /// Block until signalled or until `timeout` elapses.
    ///
    /// Returns `true` if a signal arrived. Pending signals coalesce into one.
    pub fn wait(&mut self, timeout: Option<Duration>) -> io::Result<bool> {
        loop {
            match self.poll.poll(&mut self.events, timeout) {
                Ok(()) => return Ok(self.events.iter().any(|e| e.token() == WAKE_TOKEN)),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

/// A connected doorbell: give the notifier to one endpoint and wait on the
/// waiter from the other endpoint's thread.
pub fn mio_pair() -> io::Result<(MioNotifier, MioWaiter)> {
    let poll = Poll::new()?;
    let waker = Waker::new(poll.registry(), WAKE_TOKEN)?;
    Ok((
        MioNotifier {
            waker: Arc::new(waker),
        },
        MioWaiter {
            poll,
            events: Events::with_capacity(8),
        },
    ))
}
