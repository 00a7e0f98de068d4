//! Socket handling for the four drone channels.
//!
//! AT commands and navdata travel over UDP (ports 5556 and 5554), the video
//! stream and the acknowledged control channel over TCP (ports 5555 and
//! 5559). All sends are fire-and-forget: the protocol has no retransmission,
//! so a failed send is logged and the caller's own cadence (watchdog beat,
//! user input) repairs the gap.

use std::io::Write;
use std::net::{SocketAddr, TcpStream, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, warn};

use crate::navdata::Navdata;
use crate::DroneConfig;

/// Four-byte trigger starting both the navdata and the video stream.
const STREAM_START: [u8; 4] = [0x01, 0x00, 0x00, 0x00];

/// Largest navdata datagram the firmware emits.
const NAVDATA_BUFFER_SIZE: usize = 1024;

/// Poll interval at which the reception thread rechecks its stop flag.
const RECEIVE_POLL: Duration = Duration::from_millis(100);

/// Owns the sockets towards one drone and the navdata reception thread.
pub struct Connection {
    at_socket: UdpSocket,
    nav_socket: Arc<UdpSocket>,
    video_stream: Mutex<Option<TcpStream>>,
    _control_stream: Mutex<Option<TcpStream>>,
    last_reception: Arc<Mutex<Instant>>,
    running: Arc<AtomicBool>,
    receiver: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Binds the UDP channels and connects the two TCP channels.
    ///
    /// A refused TCP connection is logged and leaves that channel down, the
    /// way the firmware behaves when video is not yet enabled; UDP bind
    /// failures are real errors and abort construction.
    pub fn new(config: &DroneConfig) -> std::io::Result<Connection> {
        let at_socket = UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], 0)))?;
        at_socket.connect(SocketAddr::from((config.ip, config.at_port)))?;

        let nav_socket = UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], 0)))?;
        nav_socket.connect(SocketAddr::from((config.ip, config.navdata_port)))?;
        nav_socket.set_read_timeout(Some(RECEIVE_POLL))?;

        let video_stream = connect_tcp("video", SocketAddr::from((config.ip, config.video_port)));
        let control_stream =
            connect_tcp("control", SocketAddr::from((config.ip, config.control_port)));

        Ok(Connection {
            at_socket,
            nav_socket: Arc::new(nav_socket),
            video_stream: Mutex::new(video_stream),
            _control_stream: Mutex::new(control_stream),
            last_reception: Arc::new(Mutex::new(Instant::now())),
            running: Arc::new(AtomicBool::new(false)),
            receiver: Mutex::new(None),
        })
    }

    /// Sends one AT line. Best effort: a failure is logged and swallowed.
    pub fn send_at(&self, line: &str) {
        if let Err(e) = self.at_socket.send(line.as_bytes()) {
            error!("AT command send failed: {}", e);
        }
    }

    /// Asks the drone to start streaming navdata.
    pub fn send_navdata_start(&self) {
        if let Err(e) = self.nav_socket.send(&STREAM_START) {
            error!("navdata start trigger failed: {}", e);
        }
    }

    /// Wakes up the video stream on the TCP channel.
    pub fn send_video_start(&self) {
        let mut guard = self.video_stream.lock().unwrap();
        match guard.as_mut() {
            Some(stream) => {
                if let Err(e) = stream.write_all(&STREAM_START) {
                    error!("video start trigger failed: {}", e);
                }
            }
            None => warn!("video start trigger skipped, channel is down"),
        }
    }

    /// Arms the navdata reception thread. Exactly one receive is in flight
    /// at any time and decoder calls are serialised on this thread.
    pub fn start_navdata_loop(&self, navdata: Arc<Navdata>) {
        let mut receiver = self.receiver.lock().unwrap();
        if receiver.is_some() {
            return;
        }

        self.running.store(true, Ordering::SeqCst);
        *self.last_reception.lock().unwrap() = Instant::now();

        let socket = self.nav_socket.clone();
        let running = self.running.clone();
        let last_reception = self.last_reception.clone();

        *receiver = Some(thread::spawn(move || {
            let mut buf = [0u8; NAVDATA_BUFFER_SIZE];
            while running.load(Ordering::SeqCst) {
                match socket.recv(&mut buf) {
                    Ok(received) => {
                        let now = Instant::now();
                        let delta = {
                            let mut last = last_reception.lock().unwrap();
                            let delta = now.duration_since(*last);
                            *last = now;
                            delta
                        };
                        navdata.update(&buf[..received], delta);
                    }
                    Err(e) => {
                        // The poll timeout lands here too; only real socket
                        // errors are worth a log line.
                        if e.kind() != std::io::ErrorKind::WouldBlock
                            && e.kind() != std::io::ErrorKind::TimedOut
                        {
                            debug!("navdata receive error: {}", e);
                        }
                    }
                }
            }
        }));
    }

    /// Time elapsed since the last navdata packet arrived. UI layers poll
    /// this to show loss of signal; the sockets themselves never time out.
    pub fn last_navdata_reception(&self) -> Duration {
        self.last_reception.lock().unwrap().elapsed()
    }

    /// Stops and joins the reception thread. Idempotent.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.receiver.lock().unwrap().take() {
            if let Err(e) = handle.join() {
                error!("navdata receiver panicked: {:?}", e);
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.stop();
    }
}

fn connect_tcp(name: &str, addr: SocketAddr) -> Option<TcpStream> {
    match TcpStream::connect(addr) {
        Ok(stream) => Some(stream),
        Err(e) => {
            error!("{} channel connect to {} failed: {}", name, addr, e);
            None
        }
    }
}
