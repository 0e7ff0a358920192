use super::connection::{Connection, ConnectionState, Disposition};
use super::error::{OpenError, PipeError};
use super::guest::GuestPipe;
use super::service::PipeService;
use super::wake::WakeFlags;
use crate::net;
use crate::reactor::{Event, Interest, Poller};
use crate::utils::{Key, Slab};

use std::collections::HashMap;
use std::io;
use std::os::fd::AsRawFd;
use std::rc::Weak;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

/// Opaque handle to an open pipe connection.
///
/// Ids are generational: once a connection is freed its id never refers
/// to another connection, even if the slot is reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub(crate) Key);

/// The pipe transport engine.
///
/// `PipeEngine` owns every live connection, the readiness poller and the
/// service registry. It is single-threaded: guest operations and
/// readiness dispatch all run on the thread that calls
/// [`turn`](Self::turn), so no two callbacks for one connection ever
/// overlap.
///
/// Guest-issued [`close`](Self::close) removes the connection from the
/// table immediately. Readiness events already collected for it in the
/// current round then resolve to a stale id and are dropped.
pub struct PipeEngine {
    poller: Poller,
    events: Vec<Event>,
    connections: Slab<Connection>,
    services: HashMap<String, Box<dyn PipeService>>,
}

impl PipeEngine {
    pub(crate) fn new(
        event_capacity: usize,
        services: Vec<Box<dyn PipeService>>,
    ) -> io::Result<Self> {
        let poller = Poller::new(event_capacity)?;

        let services = services
            .into_iter()
            .map(|service| (service.name().to_owned(), service))
            .collect();

        Ok(Self {
            poller,
            events: Vec::with_capacity(event_capacity),
            connections: Slab::with_capacity(event_capacity),
            services,
        })
    }

    /// Opens a pipe on the service named `service`.
    ///
    /// `args` is the service-specific argument string (a port for `tcp`, a
    /// path for `unix`, ignored by `opengles`). On success the connection
    /// is `Connecting`; the outcome is reported through readiness
    /// dispatch, never synchronously. A socket the poller refuses to watch
    /// fails the open.
    pub fn open(
        &mut self,
        service: &str,
        guest: Weak<dyn GuestPipe>,
        args: &str,
    ) -> Result<ConnectionId, OpenError> {
        let service = self
            .services
            .get(service)
            .ok_or_else(|| OpenError::UnknownService(service.to_owned()))?;

        let target = service.resolve(args)?;
        debug!(service = service.name(), %target, "opening pipe");

        let socket = net::connect(&target)?;

        if let Err(err) = service.prepare(&socket, &target) {
            warn!(service = service.name(), %target, error = %err, "failed to tune pipe socket");
        }

        let mut connection = Connection::new(guest);
        connection.begin_connect(socket);

        let key = self.connections.insert(connection);

        if let Err(err) = self.install_interest(key) {
            warn!(token = key.to_token(), error = %err, "failed to watch pipe socket");
            self.free(key);
            return Err(OpenError::Connect(err));
        }

        Ok(ConnectionId(key))
    }

    /// Closes a pipe from the guest side.
    ///
    /// The readiness registration is removed before the socket is
    /// released, and the connection is freed before this returns.
    pub fn close(&mut self, id: ConnectionId) {
        let Some(mut connection) = self.connections.remove(id.0) else {
            warn!(?id, "close on unknown pipe");
            return;
        };

        debug!(?id, state = %connection.state(), "pipe closed by guest");

        connection.close_from_guest();
        self.release(connection);
    }

    /// Sends the concatenation of `regions` to the host endpoint.
    ///
    /// Would-block re-arms write interest and returns
    /// [`PipeError::Again`]. A fatal error closes the connection from the
    /// socket side before [`PipeError::Io`] is returned.
    pub fn send(&mut self, id: ConnectionId, regions: &[&[u8]]) -> Result<usize, PipeError> {
        let connection = self
            .connections
            .get_mut(id.0)
            .ok_or(PipeError::Inval)?;

        let result = connection.send(regions);
        trace!(?id, ?result, "send");

        self.settle(id, result, WakeFlags::WRITE)
    }

    /// Receives from the host endpoint into `regions`.
    ///
    /// Same error handling as [`send`](Self::send), re-arming read
    /// interest on would-block.
    pub fn receive(
        &mut self,
        id: ConnectionId,
        regions: &mut [&mut [u8]],
    ) -> Result<usize, PipeError> {
        let connection = self
            .connections
            .get_mut(id.0)
            .ok_or(PipeError::Inval)?;

        let result = connection.receive(regions);
        trace!(?id, ?result, "receive");

        self.settle(id, result, WakeFlags::READ)
    }

    fn settle(
        &mut self,
        id: ConnectionId,
        result: Result<usize, PipeError>,
        direction: WakeFlags,
    ) -> Result<usize, PipeError> {
        match result {
            Err(PipeError::Again) => {
                if let Some(connection) = self.connections.get_mut(id.0) {
                    connection.wake_on(direction);
                }
                self.sync_interest(id.0);
            }

            Err(PipeError::Io) => self.socket_closed(id.0),

            _ => {}
        }

        result
    }

    /// Readiness observed since the guest last re-armed.
    ///
    /// Does not clear anything; unknown ids report no readiness.
    pub fn poll(&self, id: ConnectionId) -> WakeFlags {
        self.connections
            .get(id.0)
            .map(|connection| connection.poll())
            .unwrap_or_default()
    }

    /// Asks to be woken when any of `flags` becomes ready.
    pub fn wake_on(&mut self, id: ConnectionId, flags: WakeFlags) {
        let Some(connection) = self.connections.get_mut(id.0) else {
            warn!(?id, ?flags, "wake_on for unknown pipe");
            return;
        };

        trace!(?id, ?flags, "wake_on");
        connection.wake_on(flags);
        self.sync_interest(id.0);
    }

    /// Invalidates the guest reference of a connection.
    ///
    /// The guest layer calls this before destroying a pipe object it will
    /// not close explicitly. A connection already failed from the socket
    /// side has nobody left to acknowledge it and is freed.
    pub fn detach_guest(&mut self, id: ConnectionId) {
        let Some(connection) = self.connections.get_mut(id.0) else {
            return;
        };

        connection.detach_guest();

        if connection.state() == ConnectionState::ClosingFromSocket {
            self.free(id.0);
        } else {
            self.sync_interest(id.0);
        }
    }

    /// Current state of a connection, or `None` once it is freed.
    pub fn state(&self, id: ConnectionId) -> Option<ConnectionState> {
        self.connections.get(id.0).map(|connection| connection.state())
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Returns `true` when no connection is alive.
    pub fn is_empty(&self) -> bool {
        self.connections.len() == 0
    }

    /// Runs one readiness round.
    ///
    /// Waits up to `timeout` (forever with `None`) for readiness, then
    /// dispatches every collected event. Returns the number of events.
    pub fn turn(&mut self, timeout: Option<Duration>) -> io::Result<usize> {
        let mut events = std::mem::take(&mut self.events);

        if let Err(err) = self.poller.poll(&mut events, timeout) {
            self.events = events;
            return Err(err);
        }

        let count = events.len();
        for event in events.drain(..) {
            self.dispatch(event);
        }

        self.events = events;
        Ok(count)
    }

    /// Runs readiness rounds until `done` returns `true` or `timeout`
    /// elapses. Returns whether the condition was met.
    pub fn run_until<F>(&mut self, timeout: Duration, mut done: F) -> io::Result<bool>
    where
        F: FnMut(&Self) -> bool,
    {
        let deadline = Instant::now() + timeout;

        loop {
            if done(self) {
                return Ok(true);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }

            self.turn(Some((deadline - now).min(Duration::from_millis(10))))?;
        }
    }

    /// Routes one readiness event to its connection.
    pub(crate) fn dispatch(&mut self, event: Event) {
        let key = Key::from_token(event.token);

        let Some(connection) = self.connections.get_mut(key) else {
            trace!(token = event.token, "dropping event for freed pipe");
            return;
        };

        trace!(?event, state = %connection.state(), "dispatch");

        match connection.state() {
            ConnectionState::Connecting => {
                if !event.writable && !event.error {
                    return;
                }

                let result = connection.connect_result();
                match &result {
                    Ok(()) => debug!(token = event.token, "pipe connected"),
                    Err(err) => debug!(token = event.token, error = %err, "pipe connect failed"),
                }

                if connection.complete_connect(result) == Disposition::Free {
                    self.free(key);
                    return;
                }
            }

            ConnectionState::Connected => {
                if event.error {
                    self.socket_closed(key);
                    return;
                }

                if event.readable {
                    connection.on_readable();
                }
                if event.writable {
                    connection.on_writable();
                }
            }

            _ => {}
        }

        self.sync_interest(key);
    }

    /// Handles the socket failing underneath an active connection.
    fn socket_closed(&mut self, key: Key) {
        let Some(connection) = self.connections.get_mut(key) else {
            return;
        };

        debug!(
            token = key.to_token(),
            state = %connection.state(),
            guest = connection.has_guest(),
            "pipe closed by socket"
        );

        match connection.close_from_socket() {
            Disposition::Free => self.free(key),
            Disposition::Keep => {
                if let Err(err) = self.install_interest(key) {
                    warn!(token = key.to_token(), error = %err, "failed to unwatch pipe socket");
                }
            }
        }
    }

    fn free(&mut self, key: Key) {
        if let Some(connection) = self.connections.remove(key) {
            self.release(connection);
        }
    }

    /// Removes the poller registration, then drops the connection and
    /// with it the socket.
    fn release(&mut self, mut connection: Connection) {
        if connection.installed().is_some() {
            if let Some(socket) = connection.socket() {
                if let Err(err) = self.poller.deregister(socket.as_raw_fd()) {
                    warn!(error = %err, "failed to deregister pipe socket");
                }
            }
            connection.set_installed(None);
        }
    }

    /// Installs the interest implied by the connection's state and wake
    /// mask. A connection whose interest cannot be installed would never
    /// hear from its socket again, so it is closed from the socket side.
    fn sync_interest(&mut self, key: Key) {
        if let Err(err) = self.install_interest(key) {
            warn!(token = key.to_token(), error = %err, "failed to update pipe interest");
            self.socket_closed(key);
        }
    }

    /// Touches the poller only when the derived interest changed.
    fn install_interest(&mut self, key: Key) -> io::Result<()> {
        let Some(connection) = self.connections.get_mut(key) else {
            return Ok(());
        };

        let Some(fd) = connection.socket().map(|socket| socket.as_raw_fd()) else {
            return Ok(());
        };

        let desired: Interest = connection.interest();

        match connection.installed() {
            None if desired.is_empty() => return Ok(()),
            None => self.poller.register(fd, key.to_token(), desired)?,
            Some(_) if desired.is_empty() => self.poller.deregister(fd)?,
            Some(current) if current == desired => return Ok(()),
            Some(_) => self.poller.reregister(fd, key.to_token(), desired)?,
        }

        connection.set_installed((!desired.is_empty()).then_some(desired));
        Ok(())
    }

    /// Interest currently registered for a connection.
    #[cfg(test)]
    pub(crate) fn installed(&self, id: ConnectionId) -> Option<Interest> {
        self.connections
            .get(id.0)
            .and_then(|connection| connection.installed())
    }
}

impl Drop for PipeEngine {
    fn drop(&mut self) {
        for key in self.connections.keys() {
            self.free(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipe::EngineBuilder;

    use std::cell::{Cell, RefCell};
    use std::io::{Read, Write};
    use std::net::{Shutdown, TcpListener};
    use std::rc::Rc;

    #[derive(Default)]
    struct Recorder {
        wakes: RefCell<Vec<WakeFlags>>,
        closed: Cell<usize>,
    }

    impl GuestPipe for Recorder {
        fn wake(&self, flags: WakeFlags) {
            self.wakes.borrow_mut().push(flags);
        }

        fn signal_closed(&self) {
            self.closed.set(self.closed.get() + 1);
        }
    }

    const WAIT: Duration = Duration::from_secs(5);

    fn engine() -> PipeEngine {
        EngineBuilder::new().build().expect("failed to build engine")
    }

    fn connected_pair() -> (PipeEngine, Rc<Recorder>, ConnectionId, std::net::TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("failed to bind listener");
        let port = listener.local_addr().unwrap().port();

        let mut engine = engine();
        let guest = Rc::new(Recorder::default());

        let id = engine
            .open("tcp", Rc::downgrade(&guest) as Weak<dyn GuestPipe>, &port.to_string())
            .expect("failed to open pipe");

        let (peer, _) = listener.accept().expect("failed to accept");

        let connected = engine
            .run_until(WAIT, |e| e.state(id) == Some(ConnectionState::Connected))
            .unwrap();
        assert!(connected);

        (engine, guest, id, peer)
    }

    #[test]
    fn test_pending_connect_installs_single_write_interest() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut engine = engine();
        let guest = Rc::new(Recorder::default());
        let id = engine
            .open("tcp", Rc::downgrade(&guest) as Weak<dyn GuestPipe>, &port.to_string())
            .unwrap();

        assert_eq!(engine.state(id), Some(ConnectionState::Connecting));
        assert_eq!(
            engine.installed(id),
            Some(Interest {
                read: false,
                write: true
            })
        );
    }

    #[test]
    fn test_connected_without_wants_installs_nothing() {
        let (engine, guest, id, _peer) = connected_pair();

        assert_eq!(engine.installed(id), None);
        assert!(guest.wakes.borrow().is_empty());
        assert_eq!(guest.closed.get(), 0);
    }

    #[test]
    fn test_close_during_connect_drops_queued_event() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut engine = engine();
        let guest = Rc::new(Recorder::default());
        let id = engine
            .open("tcp", Rc::downgrade(&guest) as Weak<dyn GuestPipe>, &port.to_string())
            .unwrap();

        engine.close(id);
        assert_eq!(engine.state(id), None);

        let mut event = Event::new(id.0.to_token());
        event.writable = true;
        engine.dispatch(event);

        assert!(engine.is_empty());
        assert!(guest.wakes.borrow().is_empty());
        assert_eq!(guest.closed.get(), 0);
    }

    #[test]
    fn test_close_with_queued_read_event_is_noop() {
        let (mut engine, guest, id, mut peer) = connected_pair();

        engine.wake_on(id, WakeFlags::READ);
        peer.write_all(b"ping").unwrap();

        engine.close(id);

        let mut event = Event::new(id.0.to_token());
        event.readable = true;
        engine.dispatch(event);

        assert!(guest.wakes.borrow().is_empty());
        assert_eq!(engine.state(id), None);
    }

    #[test]
    fn test_stale_id_does_not_reach_new_connection() {
        let (mut engine, _guest, id, _peer) = connected_pair();
        engine.close(id);

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let guest = Rc::new(Recorder::default());
        let fresh = engine
            .open("tcp", Rc::downgrade(&guest) as Weak<dyn GuestPipe>, &port.to_string())
            .unwrap();

        assert_ne!(fresh, id);
        assert_eq!(engine.send(id, &[b"x"]), Err(PipeError::Inval));
        assert!(engine.state(fresh).is_some());
    }

    #[test]
    fn test_read_wake_delivered_once() {
        let (mut engine, guest, id, mut peer) = connected_pair();

        engine.wake_on(id, WakeFlags::READ);
        peer.write_all(b"data").unwrap();

        let woke = engine
            .run_until(WAIT, |_| !guest.wakes.borrow().is_empty())
            .unwrap();
        assert!(woke);
        assert_eq!(*guest.wakes.borrow(), vec![WakeFlags::READ]);
        assert_eq!(engine.installed(id), None);

        engine.turn(Some(Duration::from_millis(20))).unwrap();
        assert_eq!(guest.wakes.borrow().len(), 1);
        assert_eq!(engine.poll(id), WakeFlags::READ);

        engine.wake_on(id, WakeFlags::READ);
        assert!(engine.poll(id).is_empty());

        let mut buffer = [0u8; 16];
        let n = engine.receive(id, &mut [&mut buffer]).unwrap();
        assert_eq!(&buffer[..n], b"data");
    }

    #[test]
    fn test_send_reaches_peer() {
        let (mut engine, _guest, id, mut peer) = connected_pair();

        let sent = engine.send(id, &[b"hello ", b"host"]).unwrap();
        assert_eq!(sent, 10);

        let mut buffer = [0u8; 10];
        peer.read_exact(&mut buffer).unwrap();
        assert_eq!(&buffer, b"hello host");
    }

    #[test]
    fn test_receive_would_block_rearms_read() {
        let (mut engine, _guest, id, _peer) = connected_pair();

        let mut buffer = [0u8; 8];
        assert_eq!(
            engine.receive(id, &mut [&mut buffer]),
            Err(PipeError::Again)
        );
        assert_eq!(
            engine.installed(id),
            Some(Interest {
                read: true,
                write: false
            })
        );
    }

    #[test]
    fn test_peer_close_turns_into_socket_close() {
        let (mut engine, guest, id, peer) = connected_pair();
        drop(peer);

        engine.wake_on(id, WakeFlags::READ);
        let woke = engine
            .run_until(WAIT, |_| !guest.wakes.borrow().is_empty())
            .unwrap();
        assert!(woke);

        let mut buffer = [0u8; 8];
        assert_eq!(engine.receive(id, &mut [&mut buffer]), Err(PipeError::Io));

        assert_eq!(guest.closed.get(), 1);
        assert_eq!(engine.state(id), Some(ConnectionState::ClosingFromSocket));
        assert_eq!(engine.receive(id, &mut [&mut buffer]), Err(PipeError::Inval));

        engine.close(id);
        assert!(engine.is_empty());
    }

    #[test]
    fn test_unknown_service_is_rejected() {
        let mut engine = engine();
        let guest = Rc::new(Recorder::default());

        let err = engine
            .open("qemud", Rc::downgrade(&guest) as Weak<dyn GuestPipe>, "")
            .unwrap_err();
        assert!(matches!(err, OpenError::UnknownService(_)));
    }

    #[test]
    fn test_detach_after_socket_close_frees() {
        let (mut engine, guest, id, peer) = connected_pair();
        drop(peer);

        engine.wake_on(id, WakeFlags::READ);
        assert!(engine.run_until(WAIT, |e| e.poll(id).contains(WakeFlags::READ)).unwrap());

        let mut buffer = [0u8; 8];
        assert_eq!(engine.receive(id, &mut [&mut buffer]), Err(PipeError::Io));
        assert_eq!(guest.closed.get(), 1);

        engine.detach_guest(id);
        assert_eq!(engine.state(id), None);
    }

    #[test]
    fn test_write_wait_stays_quiet_after_peer_half_close() {
        let (mut engine, guest, id, peer) = connected_pair();

        let chunk = vec![0u8; 64 * 1024];
        let mut full = false;

        for _ in 0..4096 {
            match engine.send(id, &[&chunk]) {
                Ok(_) => continue,
                Err(PipeError::Again) => {
                    full = true;
                    break;
                }
                Err(err) => panic!("send failed: {err}"),
            }
        }
        assert!(full, "send buffer never filled");

        peer.shutdown(Shutdown::Write).unwrap();
        engine.wake_on(id, WakeFlags::WRITE);

        let deadline = Instant::now() + Duration::from_millis(200);
        let mut events = 0;
        while Instant::now() < deadline {
            events += engine.turn(Some(Duration::from_millis(50))).unwrap();
        }

        assert!(events <= 4, "waiting for write readiness spun: {events} events");
        assert!(guest.wakes.borrow().is_empty());
        assert_eq!(
            engine.installed(id),
            Some(Interest {
                read: false,
                write: true
            })
        );
    }

    #[test]
    fn test_socket_error_while_connected_signals_close() {
        let (mut engine, guest, id, _peer) = connected_pair();

        engine.wake_on(id, WakeFlags::READ);
        assert!(engine.installed(id).is_some());

        let mut event = Event::new(id.0.to_token());
        event.error = true;
        engine.dispatch(event);

        assert_eq!(guest.closed.get(), 1);
        assert!(guest.wakes.borrow().is_empty());
        assert_eq!(engine.state(id), Some(ConnectionState::ClosingFromSocket));
        assert_eq!(engine.installed(id), None);
        assert_eq!(engine.send(id, &[b"late"]), Err(PipeError::Inval));

        engine.close(id);
        assert!(engine.is_empty());
    }

    #[test]
    fn test_socket_error_after_detach_frees() {
        let (mut engine, guest, id, _peer) = connected_pair();

        engine.wake_on(id, WakeFlags::READ);
        engine.detach_guest(id);
        assert_eq!(engine.state(id), Some(ConnectionState::Connected));

        let mut event = Event::new(id.0.to_token());
        event.error = true;
        engine.dispatch(event);

        assert_eq!(engine.state(id), None);
        assert!(engine.is_empty());
        assert_eq!(guest.closed.get(), 0);
    }

    #[cfg(any(target_os = "linux", target_os = "android"))]
    #[test]
    fn test_failed_interest_install_closes_from_socket() {
        let (mut engine, guest, id, _peer) = connected_pair();
        assert_eq!(engine.installed(id), None);

        let fd = engine
            .connections
            .get(id.0)
            .and_then(|connection| connection.socket())
            .map(|socket| socket.as_raw_fd())
            .unwrap();

        // Occupying the descriptor makes the engine's own EPOLL_CTL_ADD fail.
        engine
            .poller
            .register(
                fd,
                u64::MAX,
                Interest {
                    read: true,
                    write: false,
                },
            )
            .unwrap();

        engine.wake_on(id, WakeFlags::READ);

        assert_eq!(guest.closed.get(), 1);
        assert!(guest.wakes.borrow().is_empty());
        assert_eq!(engine.state(id), Some(ConnectionState::ClosingFromSocket));
        assert_eq!(engine.installed(id), None);

        let mut buffer = [0u8; 4];
        assert_eq!(engine.receive(id, &mut [&mut buffer]), Err(PipeError::Inval));

        engine.close(id);
        assert!(engine.is_empty());
    }
}
