//! Video stream supervision.
//!
//! The drone serves H.264 on TCP 5555 once it has seen the 4-byte start
//! trigger. The concrete codec is not part of this crate: anything that can
//! open the stream URL, decode packets and convert frames to RGB plugs in
//! through [`StreamDecoder`]. What lives here is the part that is easy to
//! get wrong: the decode cadence, telling an isolated bad packet apart from
//! a dead connection, and the bounded reconnection schedule.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info};
use thiserror::Error;

/// Pause between decode iterations.
const DECODE_INTERVAL: Duration = Duration::from_millis(16);

/// Pause after tearing down a decoder, so the codec can quiesce before the
/// next open.
const RELEASE_QUIESCE: Duration = Duration::from_millis(80);

/// Reconnection schedule: base delay 30 ms, multiplied by five at every
/// fifth attempt, 16 attempts in total (12 120 ms cumulative), then the
/// supervisor gives up silently.
fn backoff_delays() -> Vec<Duration> {
    let mut delay = 30u64;
    (1u32..=16)
        .map(|i| {
            if i % 5 == 0 {
                delay *= 5;
            }
            Duration::from_millis(delay)
        })
        .collect()
}

/// Why opening the stream failed.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum VideoInitError {
    #[error("could not open the video stream")]
    OpenStream,
    #[error("no decoder found for the stream codec")]
    DecoderMissing,
    #[error("opening the codec failed")]
    OpenCodec,
    #[error("video initialisation failed")]
    Other,
}

/// Why one decode iteration failed. Both kinds feed the stall latch.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("could not read a packet from the stream")]
    Read,
    #[error("could not decode the packet")]
    Decode,
}

/// Dimensions reported by a freshly opened stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
}

/// One connection's worth of decoding state.
///
/// `open` probes the stream and reports its dimensions, `decode` reads one
/// packet and, when it completed a frame, converts it into `rgb`
/// (`width * height * 3` bytes, row-major RGB24). Implementations are
/// created per connection attempt and dropped on release, so they do not
/// need to be reusable after `close`.
pub trait StreamDecoder: Send {
    fn open(&mut self, url: &str) -> Result<StreamInfo, VideoInitError>;
    fn decode(&mut self, rgb: &mut [u8]) -> Result<bool, DecodeError>;
    fn close(&mut self);
}

/// Builds a fresh decoder for each connection attempt.
pub type DecoderFactory = Box<dyn Fn() -> Box<dyn StreamDecoder> + Send + Sync>;

struct Stream {
    decoder: Option<Box<dyn StreamDecoder>>,
    rgb: Vec<u8>,
    width: i32,
    height: i32,
}

impl Default for Stream {
    fn default() -> Stream {
        Stream {
            decoder: None,
            rgb: Vec::new(),
            width: -1,
            height: -1,
        }
    }
}

struct VideoInner {
    url: String,
    factory: DecoderFactory,
    /// Invoked once, before the very first open, to wake the stream up.
    start_trigger: Box<dyn Fn() + Send + Sync>,
    stream: Mutex<Stream>,
    is_active: AtomicBool,
    possibly_disconnected: AtomicBool,
    first_connection: AtomicBool,
    terminate: AtomicBool,
    decode_thread: Mutex<Option<JoinHandle<()>>>,
    launcher_thread: Mutex<Option<JoinHandle<()>>>,
    reconnect_thread: Mutex<Option<JoinHandle<()>>>,
}

/// Supervisor of the video reception path.
pub struct Video {
    inner: Arc<VideoInner>,
}

impl Video {
    pub fn new(
        url: String,
        factory: DecoderFactory,
        start_trigger: Box<dyn Fn() + Send + Sync>,
    ) -> Video {
        Video {
            inner: Arc::new(VideoInner {
                url,
                factory,
                start_trigger,
                stream: Mutex::new(Stream::default()),
                is_active: AtomicBool::new(false),
                possibly_disconnected: AtomicBool::new(false),
                first_connection: AtomicBool::new(true),
                terminate: AtomicBool::new(false),
                decode_thread: Mutex::new(None),
                launcher_thread: Mutex::new(None),
                reconnect_thread: Mutex::new(None),
            }),
        }
    }

    /// Stops any running reception and starts a fresh connection cycle. The
    /// first open happens on the calling thread; failed opens are retried
    /// on the reconnection schedule.
    pub fn restart(&self) {
        self.inner.stop();
        self.inner.possibly_disconnected.store(true, Ordering::SeqCst);
        self.inner.try_to_connect();
    }

    /// Stops reception and releases the decoder. Idempotent.
    pub fn stop(&self) {
        self.inner.stop();
    }

    /// True while the decode loop is running.
    pub fn is_active(&self) -> bool {
        self.inner.is_active.load(Ordering::SeqCst)
    }

    /// A copy of the most recent RGB frame buffer, or `None` before the
    /// stream has been opened.
    pub fn frame(&self) -> Option<Vec<u8>> {
        let s = self.inner.stream.lock().unwrap();
        if s.decoder.is_none() || s.rgb.is_empty() {
            return None;
        }
        Some(s.rgb.clone())
    }

    /// Stream width in pixels, `-1` before the stream has been opened.
    pub fn width(&self) -> i32 {
        self.inner.stream.lock().unwrap().width
    }

    /// Stream height in pixels, `-1` before the stream has been opened.
    pub fn height(&self) -> i32 {
        self.inner.stream.lock().unwrap().height
    }

    /// Permanently shuts the supervisor down and joins its threads.
    pub(crate) fn shutdown(&self) {
        self.inner.terminate.store(true, Ordering::SeqCst);
        self.inner.stop();
    }
}

impl Drop for Video {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl VideoInner {
    /// Opens the stream and starts the decode loop.
    fn init(self: &Arc<Self>) -> Result<(), VideoInitError> {
        self.is_active.store(false, Ordering::SeqCst);
        join_slot(&self.decode_thread);

        if self.first_connection.swap(false, Ordering::SeqCst) {
            (self.start_trigger)();
        }

        let mut decoder = (self.factory)();
        let info = decoder.open(&self.url).map_err(|e| {
            debug!("video stream open failed: {}", e);
            e
        })?;

        {
            let mut s = self.stream.lock().unwrap();
            s.rgb = vec![0u8; info.width as usize * info.height as usize * 3];
            s.width = info.width as i32;
            s.height = info.height as i32;
            s.decoder = Some(decoder);
        }

        info!("video stream up ({}x{})", info.width, info.height);
        self.possibly_disconnected.store(false, Ordering::SeqCst);
        self.is_active.store(true, Ordering::SeqCst);

        let inner = self.clone();
        *self.decode_thread.lock().unwrap() = Some(thread::spawn(move || inner.decode_loop()));
        Ok(())
    }

    fn decode_loop(self: Arc<Self>) {
        while self.is_active.load(Ordering::SeqCst) && !self.terminate.load(Ordering::SeqCst) {
            thread::sleep(DECODE_INTERVAL);
            self.decode_once();
        }

        // Leaving because the stall latch fired (not a plain stop): release
        // the decoder and hand over to the reconnection path.
        if !self.terminate.load(Ordering::SeqCst)
            && self.possibly_disconnected.load(Ordering::SeqCst)
        {
            self.release();
            self.begin_reconnect();
        }
    }

    /// One decode iteration with the two-state stall latch: the first
    /// failure marks the connection as suspect, a second consecutive one
    /// stops the loop, any success clears the suspicion.
    fn decode_once(&self) {
        let mut s = self.stream.lock().unwrap();
        let Stream {
            ref mut decoder,
            ref mut rgb,
            ..
        } = *s;
        let decoder = match decoder.as_mut() {
            Some(d) => d,
            None => return,
        };

        match decoder.decode(rgb) {
            Ok(_frame_completed) => {
                self.possibly_disconnected.store(false, Ordering::SeqCst);
            }
            Err(e) => {
                debug!("video decode iteration failed: {}", e);
                if self.possibly_disconnected.swap(true, Ordering::SeqCst) {
                    self.is_active.store(false, Ordering::SeqCst);
                }
            }
        }
    }

    /// Frees the decoder and forgets the stream dimensions.
    fn release(&self) {
        let mut s = self.stream.lock().unwrap();
        if let Some(mut decoder) = s.decoder.take() {
            decoder.close();
            s.rgb = Vec::new();
            s.width = -1;
            s.height = -1;
            thread::sleep(RELEASE_QUIESCE);
        }
    }

    /// Spawns the short-lived launcher that cleans up the stalled
    /// connection and enters the reconnection schedule.
    fn begin_reconnect(self: &Arc<Self>) {
        join_slot(&self.launcher_thread);
        let inner = self.clone();
        *self.launcher_thread.lock().unwrap() = Some(thread::spawn(move || {
            join_slot(&inner.decode_thread);
            inner.try_to_connect();
        }));
    }

    /// One immediate connection attempt; on failure the backoff thread
    /// keeps trying on the fixed schedule until something succeeds, the
    /// schedule runs out, or the supervisor is stopped.
    fn try_to_connect(self: &Arc<Self>) {
        join_slot(&self.reconnect_thread);
        self.release();
        if self.terminate.load(Ordering::SeqCst) {
            return;
        }
        if self.init().is_ok() {
            return;
        }

        let inner = self.clone();
        *self.reconnect_thread.lock().unwrap() = Some(thread::spawn(move || {
            for delay in backoff_delays() {
                if inner.terminate.load(Ordering::SeqCst)
                    || inner.is_active.load(Ordering::SeqCst)
                    || !inner.possibly_disconnected.load(Ordering::SeqCst)
                {
                    return;
                }
                thread::sleep(delay);
                if inner.terminate.load(Ordering::SeqCst) {
                    return;
                }
                if inner.init().is_ok() {
                    return;
                }
            }
            error!("video reconnection abandoned after {} attempts", backoff_delays().len());
        }));
    }

    fn stop(self: &Arc<Self>) {
        self.possibly_disconnected.store(false, Ordering::SeqCst);
        self.is_active.store(false, Ordering::SeqCst);
        join_slot(&self.launcher_thread);
        join_slot(&self.reconnect_thread);
        self.is_active.store(false, Ordering::SeqCst);
        join_slot(&self.decode_thread);
        self.release();
    }
}

fn join_slot(slot: &Mutex<Option<JoinHandle<()>>>) {
    let handle = slot.lock().unwrap().take();
    if let Some(handle) = handle {
        if let Err(e) = handle.join() {
            error!("video worker thread panicked: {:?}", e);
        }
    }
}
