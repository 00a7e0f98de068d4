//! Textual `AT*` command encoder.
//!
//! Every line sent to the drone looks like `AT*<VERB>=<seq>,<args>\r`. The
//! sequence number is shared by all verbs and must grow by one per line or
//! the firmware ignores the command, so the counter lives in one atomic per
//! drone. Floats on the wire are not printed as decimals: the firmware
//! expects the decimal value of the IEEE-754 bit pattern reinterpreted as a
//! signed 32-bit integer.

use std::fmt::Display;
use std::sync::atomic::{AtomicU32, Ordering};

/// Base control word for `AT*REF`; take-off/land/emergency bits are OR-ed in.
const REF_BASE: u32 = 1 << 28 | 1 << 24 | 1 << 22 | 1 << 20 | 1 << 18;
const REF_TAKE_OFF: u32 = 1 << 9;
const REF_EMERGENCY: u32 = 1 << 8;

/// `PCMD` flag enabling progressive commands (leaves hovering mode).
pub const PCMD_PROGRESSIVE: i32 = 1 << 0;

/// Serializes an `f32` the way the firmware wants it on the wire.
pub fn float_bits(f: f32) -> i32 {
    f.to_bits() as i32
}

/// Camera feeding the video stream on port 5555.
#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(u8)]
pub enum Camera {
    Front = 0,
    Bottom = 1,
}

/// Video codecs supported by the AR.Drone 2.0 firmware.
///
/// The MP4 codecs are less stable than plain H.264; prefer `H264x360p` or
/// `H264x720p`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(u8)]
pub enum VideoCodec {
    H264x360p = 0x81,
    Mp4x360pH264x720p = 0x82,
    H264x720p = 0x83,
    Mp4x360pH264x360p = 0x88,
}

/// Flight animations implemented in the drone firmware, ids 0..=19.
#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(u8)]
pub enum FlightAnimation {
    PhiM30Deg = 0,
    Phi30Deg = 1,
    ThetaM30Deg = 2,
    Theta30Deg = 3,
    Theta20DegYaw200Deg = 4,
    Theta20DegYawM200Deg = 5,
    Turnaround = 6,
    TurnaroundGodown = 7,
    YawShake = 8,
    YawDance = 9,
    PhiDance = 10,
    ThetaDance = 11,
    VzDance = 12,
    Wave = 13,
    PhiThetaMixed = 14,
    DoublePhiThetaMixed = 15,
    FlipAhead = 16,
    FlipBehind = 17,
    FlipLeft = 18,
    FlipRight = 19,
}

impl FlightAnimation {
    /// Firmware-defined duration of the animation in milliseconds.
    pub fn duration_ms(self) -> u32 {
        const DURATIONS: [u32; 20] = [
            1000, 1000, 1000, 1000, 1000, 1000, 5000, 5000, 2000, 5000, 5000, 5000, 5000, 5000,
            5000, 5000, 200, 200, 200, 200,
        ];
        DURATIONS[self as usize]
    }
}

/// LED animations implemented in the drone firmware, ids 0..=20.
#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(u8)]
pub enum LedAnimation {
    BlinkGreenRed = 0,
    BlinkGreen = 1,
    BlinkRed = 2,
    BlinkOrange = 3,
    SnakeGreenRed = 4,
    Fire = 5,
    Standard = 6,
    Red = 7,
    Green = 8,
    RedSnake = 9,
    Blank = 10,
    RightMissile = 11,
    LeftMissile = 12,
    DoubleMissile = 13,
    FrontLeftGreenOthersRed = 14,
    FrontRightGreenOthersRed = 15,
    RearRightGreenOthersRed = 16,
    RearLeftGreenOthersRed = 17,
    LeftGreenRightRed = 18,
    LeftRedRightGreen = 19,
    BlinkStandard = 20,
}

/// Stateful `AT*` line composer.
///
/// Owns the monotonic sequence counter and the `(session, user, application)`
/// identity triple quoted into `CONFIG_IDS` preambles. The composer only
/// builds strings; the caller decides when they hit the wire.
#[derive(Debug)]
pub struct AtCommands {
    seq: AtomicU32,
    session_id: String,
    user_id: String,
    app_id: String,
}

impl AtCommands {
    pub fn new(session_id: &str, user_id: &str, app_id: &str) -> AtCommands {
        AtCommands {
            seq: AtomicU32::new(1),
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            app_id: app_id.to_string(),
        }
    }

    fn next_seq(&self) -> u32 {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }

    fn reference(&self, ctrl: u32) -> String {
        format!("AT*REF={},{}\r", self.next_seq(), ctrl as i32)
    }

    pub fn take_off(&self) -> String {
        self.reference(REF_BASE | REF_TAKE_OFF)
    }

    pub fn land(&self) -> String {
        self.reference(REF_BASE)
    }

    pub fn emergency(&self) -> String {
        self.reference(REF_BASE | REF_EMERGENCY)
    }

    pub fn flat_trim(&self) -> String {
        format!("AT*FTRIM={}\r", self.next_seq())
    }

    /// Movement command. The four floats go out as raw bit patterns.
    pub fn pcmd(&self, flags: i32, phi: f32, theta: f32, gaz: f32, yaw: f32) -> String {
        format!(
            "AT*PCMD={},{},{},{},{},{}\r",
            self.next_seq(),
            flags,
            float_bits(phi),
            float_bits(theta),
            float_bits(gaz),
            float_bits(yaw)
        )
    }

    pub fn hover(&self) -> String {
        self.pcmd(0, 0.0, 0.0, 0.0, 0.0)
    }

    /// A configuration write: the `CONFIG_IDS` preamble the firmware demands
    /// before every `CONFIG`, then the entry itself. Send both, in order.
    pub fn config(&self, name: &str, value: impl Display) -> [String; 2] {
        let ids = format!(
            "AT*CONFIG_IDS={},\"{}\",\"{}\",\"{}\"\r",
            self.next_seq(),
            self.session_id,
            self.user_id,
            self.app_id
        );
        let entry = format!("AT*CONFIG={},\"{}\",\"{}\"\r", self.next_seq(), name, value);
        [ids, entry]
    }

    /// Watchdog reset, sent every 150 ms while connected.
    pub fn comwdg(&self) -> String {
        format!("AT*COMWDG={}\r", self.next_seq())
    }

    /// Magnetometer calibration (device id 0).
    pub fn calib(&self) -> String {
        format!("AT*CALIB={},0\r", self.next_seq())
    }

    /// Acknowledges the navdata options mode during telemetry bootstrap.
    pub fn ctrl_ack(&self) -> String {
        format!("AT*CTRL={},5\r", self.next_seq())
    }

    pub fn led_animation(&self, anim: LedAnimation, freq: f32, duration_s: u32) -> [String; 2] {
        let value = format!("{},{},{}", anim as u8, float_bits(freq), duration_s);
        self.config("leds:leds_anim", value)
    }

    pub fn flight_animation(&self, anim: FlightAnimation) -> [String; 2] {
        let value = format!("{},{}", anim as u8, anim.duration_ms());
        self.config("control:flight_anim", value)
    }
}
