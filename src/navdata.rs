//! Navdata (telemetry) decoder.
//!
//! The drone streams binary packets on UDP 5554: a fixed header (magic,
//! state word, sequence number, vision flags) followed by tagged options.
//! Each option carries its own size, so unknown tags are skipped without
//! understanding them. Handlers are registered per tag; the stock decoder
//! understands the `DEMO` option and feeds the dead-reckoning estimator
//! from it.
//!
//! Scalar fields are published through atomics and can be read without
//! locking; vector fields share one mutex so a reader always sees a
//! self-consistent snapshot.

use std::collections::HashMap;
use std::f32::consts::PI;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use byteorder::{LittleEndian, ReadBytesExt};
use log::{debug, trace, warn};

use crate::math::{Quaternion, Vec3};

/// First four bytes of every navdata packet.
pub const NAVDATA_MAGIC: u32 = 0x5566_7788;

/// Option tags of the navdata stream. Only `DEMO` is handled out of the
/// box; the others are listed so callers can register their own handlers.
pub mod option_tag {
    pub const DEMO: u16 = 0;
    pub const TIME: u16 = 1;
    pub const RAW_MEASURES: u16 = 2;
    pub const PHYS_MEASURES: u16 = 3;
    pub const GYROS_OFFSETS: u16 = 4;
    pub const EULER_ANGLES: u16 = 5;
    pub const REFERENCES: u16 = 6;
    pub const TRIMS: u16 = 7;
    pub const RC_REFERENCES: u16 = 8;
    pub const PWM: u16 = 9;
    pub const ALTITUDE: u16 = 10;
    pub const VISION_RAW: u16 = 11;
    pub const VISION_OF: u16 = 12;
    pub const VISION: u16 = 13;
    pub const VISION_PERF: u16 = 14;
    pub const TRACKERS_SEND: u16 = 15;
    pub const VISION_DETECT: u16 = 16;
    pub const WATCHDOG: u16 = 17;
    pub const ADC_DATA_FRAME: u16 = 18;
    pub const VIDEO_STREAM: u16 = 19;
    pub const GAME: u16 = 20;
    pub const PRESSURE_RAW: u16 = 21;
    pub const MAGNETO: u16 = 22;
    pub const WIND: u16 = 23;
    pub const KALMAN_PRESSURE: u16 = 24;
    pub const HDVIDEO_STREAM: u16 = 25;
    pub const WIFI: u16 = 26;
    pub const ZIMMU_3000: u16 = 27;
    /// Checksum option closing every packet. Not verified here.
    pub const CKS: u16 = 0xFFFF;
}

bitflags::bitflags! {
    /// The 32-bit aircraft state word of the navdata header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StateFlags: u32 {
        /// Landed (0) or flying (1).
        const FLYING              = 1 << 0;
        /// Video enabled.
        const VIDEO               = 1 << 1;
        /// Vision enabled.
        const VISION              = 1 << 2;
        /// Euler angles control (0) or angular speed control (1).
        const CONTROL_ALGORITHM   = 1 << 3;
        /// Altitude control active (0) or inactive (1).
        const ALTITUDE_CONTROL    = 1 << 4;
        /// User feedback: start button pressed.
        const USER_FEEDBACK_START = 1 << 5;
        /// At least one command has been acknowledged.
        const COMMAND_ACK         = 1 << 6;
        /// Camera ready.
        const CAMERA_READY        = 1 << 7;
        /// Travelling mode enabled.
        const TRAVELLING          = 1 << 8;
        /// USB key ready.
        const USB_READY           = 1 << 9;
        /// Only the demo option is being sent (1) or every option (0).
        const NAVDATA_DEMO        = 1 << 10;
        /// Navdata options are being sent.
        const NAVDATA_BOOTSTRAP   = 1 << 11;
        /// Motors reported a problem.
        const MOTORS_FAULT        = 1 << 12;
        /// Communication lost (0 means lost).
        const COM_OK              = 1 << 13;
        /// Software fault detected.
        const SOFTWARE_FAULT      = 1 << 14;
        /// Battery voltage too low.
        const LOW_BATTERY         = 1 << 15;
        /// User-requested emergency landing in progress.
        const USER_EMERGENCY_LANDING = 1 << 16;
        /// Timer elapsed.
        const TIMER_ELAPSED       = 1 << 17;
        /// Magnetometer needs calibration.
        const MAGNETO_NEEDS_CALIB = 1 << 18;
        /// Euler angles out of range (emergency).
        const ANGLES_OUT_OF_RANGE = 1 << 19;
        /// Too much wind to fly.
        const WIND                = 1 << 20;
        /// Ultrasonic sensor fault.
        const ULTRASOUND_FAULT    = 1 << 21;
        /// Cutout system detected.
        const CUTOUT_DETECTED     = 1 << 22;
        /// PIC version number is correct.
        const PIC_VERSION_OK      = 1 << 23;
        /// AT codec thread running.
        const AT_CODEC_THREAD_ON  = 1 << 24;
        /// Navdata thread running.
        const NAVDATA_THREAD_ON   = 1 << 25;
        /// Video thread running.
        const VIDEO_THREAD_ON     = 1 << 26;
        /// Acquisition thread running.
        const ACQUISITION_THREAD_ON = 1 << 27;
        /// Control watchdog: control loop delayed beyond 5 ms.
        const CTRL_WATCHDOG       = 1 << 28;
        /// ADC watchdog: ADC link delayed beyond 5 ms.
        const ADC_WATCHDOG        = 1 << 29;
        /// Communication watchdog fired.
        const COM_WATCHDOG        = 1 << 30;
        /// Emergency mode.
        const EMERGENCY           = 1 << 31;
    }
}

/// Callback invoked with the decoder and the raw option bytes (starting at
/// the tag/size header) each time its tag shows up in a packet.
pub type OptionHandler = Box<dyn FnMut(&Navdata, &[u8]) + Send>;

/// Yaw jump, in degrees between successive packets, that releases the
/// take-off origin latch.
const YAW_RESET_THRESHOLD_DEG: f32 = 3.0;

#[derive(Debug, Default, Clone)]
struct VectorState {
    rotation: Vec3,
    starting_rotation: Vec3,
    local_velocity: Vec3,
    world_velocity: Vec3,
    world_position: Vec3,
    delta_time: f32,
}

/// Published flight telemetry, updated from raw navdata packets.
pub struct Navdata {
    handlers: Mutex<HashMap<u16, OptionHandler>>,
    state: AtomicU32,
    sequence: AtomicU32,
    vision: AtomicU32,
    battery: AtomicI32,
    altitude_bits: AtomicU32,
    compute_world_data: AtomicBool,
    needs_rotation_reset: AtomicBool,
    vectors: Mutex<VectorState>,
}

impl Default for Navdata {
    fn default() -> Navdata {
        Navdata::new()
    }
}

impl Navdata {
    pub fn new() -> Navdata {
        let nav = Navdata {
            handlers: Mutex::new(HashMap::new()),
            state: AtomicU32::new(0),
            sequence: AtomicU32::new(0),
            vision: AtomicU32::new(0),
            battery: AtomicI32::new(-1),
            altitude_bits: AtomicU32::new(0f32.to_bits()),
            compute_world_data: AtomicBool::new(false),
            needs_rotation_reset: AtomicBool::new(false),
            vectors: Mutex::new(VectorState::default()),
        };
        nav.register_handler(option_tag::DEMO, Box::new(|nav, opt| nav.handle_demo(opt)));
        nav
    }

    /// Registers (or replaces) the handler for an option tag.
    ///
    /// This is how applications read options the stock decoder ignores:
    /// register a closure that parses the raw bytes and stores what it needs
    /// behind its own synchronisation. Handlers for one packet run
    /// back-to-back on the reception thread.
    pub fn register_handler(&self, tag: u16, handler: OptionHandler) {
        self.handlers.lock().unwrap().insert(tag, handler);
    }

    /// Decodes one raw packet. `delta` is the time elapsed since the
    /// previous packet arrived.
    pub fn update(&self, buf: &[u8], delta: Duration) {
        if buf.len() < 16 {
            trace!("navdata packet too short ({} bytes), dropped", buf.len());
            return;
        }

        let mut cur = Cursor::new(buf);
        let magic = cur.read_u32::<LittleEndian>().unwrap_or(0);
        if magic != NAVDATA_MAGIC {
            debug!("navdata magic mismatch ({:#010x}), packet dropped", magic);
            return;
        }

        self.vectors.lock().unwrap().delta_time = delta.as_secs_f32();

        self.state
            .store(cur.read_u32::<LittleEndian>().unwrap_or(0), Ordering::SeqCst);
        self.sequence
            .store(cur.read_u32::<LittleEndian>().unwrap_or(0), Ordering::SeqCst);
        self.vision
            .store(cur.read_u32::<LittleEndian>().unwrap_or(0), Ordering::SeqCst);

        // Options follow until the end of the datagram; the size field is
        // authoritative and includes the tag/size header itself.
        let mut handlers = self.handlers.lock().unwrap();
        let mut index = 16usize;
        while index + 4 <= buf.len() {
            let tag = u16::from_le_bytes([buf[index], buf[index + 1]]);
            let size = u16::from_le_bytes([buf[index + 2], buf[index + 3]]) as usize;
            if size < 4 {
                warn!("navdata option {:#06x} with bogus size {}, rest of packet dropped", tag, size);
                break;
            }
            let end = (index + size).min(buf.len());
            if let Some(handler) = handlers.get_mut(&tag) {
                handler(self, &buf[index..end]);
            }
            index += size;
        }
    }

    /// `DEMO` option: battery, attitude, altitude and local velocity, plus
    /// the world estimate when enabled.
    ///
    /// Wire layout after the tag/size header: control state (skipped),
    /// battery percentage, pitch/roll/yaw in thousandths of a degree,
    /// altitude in millimetres, then forward/right/up velocity in mm/s.
    fn handle_demo(&self, opt: &[u8]) {
        if opt.len() < 40 {
            warn!("demo option truncated ({} bytes), skipped", opt.len());
            return;
        }

        let mut cur = Cursor::new(&opt[4..]);
        let _control_state = cur.read_i32::<LittleEndian>().unwrap_or(0);
        let battery = cur.read_i32::<LittleEndian>().unwrap_or(-1);
        let pitch = cur.read_f32::<LittleEndian>().unwrap_or(0.0);
        let roll = cur.read_f32::<LittleEndian>().unwrap_or(0.0);
        let yaw = cur.read_f32::<LittleEndian>().unwrap_or(0.0);
        let altitude_mm = cur.read_i32::<LittleEndian>().unwrap_or(0);
        let vel_front = cur.read_f32::<LittleEndian>().unwrap_or(0.0);
        let vel_right = cur.read_f32::<LittleEndian>().unwrap_or(0.0);
        let vel_up = cur.read_f32::<LittleEndian>().unwrap_or(0.0);

        self.battery.store(battery, Ordering::SeqCst);

        let previous_altitude = self.altitude();
        let altitude = altitude_mm as f32 / 1000.0;
        self.altitude_bits.store(altitude.to_bits(), Ordering::SeqCst);

        let mut v = self.vectors.lock().unwrap();
        let old_rotation = v.rotation;

        // The wire order is (pitch, roll, yaw) = our (y, z, x); yaw is
        // negated so positive x-rotation matches the published frame.
        v.rotation = Vec3::new(-yaw, pitch, roll) / 1000.0;

        if self.needs_rotation_reset.load(Ordering::SeqCst)
            && (v.rotation.x - old_rotation.x).abs() > YAW_RESET_THRESHOLD_DEG
        {
            v.starting_rotation.x = v.rotation.x;
            self.needs_rotation_reset.store(false, Ordering::SeqCst);
        }

        v.local_velocity = Vec3::new(vel_right, vel_up, vel_front) / 1000.0;
        if v.local_velocity.y == 0.0 && v.delta_time > 0.0 {
            // Some firmware versions always report zero vertical speed;
            // derive it from the altitude delta instead.
            v.local_velocity.y = (altitude - previous_altitude) / v.delta_time;
        }

        if self.compute_world_data.load(Ordering::SeqCst) {
            let mut rot = v.rotation;
            rot.x -= v.starting_rotation.x;
            rot *= PI / 180.0;
            let q = Quaternion::from_euler(rot.z, rot.x, rot.y);
            // The quaternion matrix rotates world into body coordinates;
            // dead reckoning needs the inverse, i.e. the transpose.
            v.world_velocity = q.matrix().transpose() * v.local_velocity;
            let step = v.world_velocity * v.delta_time;
            v.world_position += step;
        }
    }

    /// Raw 32-bit aircraft state word.
    pub fn state(&self) -> u32 {
        self.state.load(Ordering::SeqCst)
    }

    /// State word as typed flags (unknown bits dropped).
    pub fn state_flags(&self) -> StateFlags {
        StateFlags::from_bits_truncate(self.state())
    }

    pub fn is_flying(&self) -> bool {
        self.state_flags().contains(StateFlags::FLYING)
    }

    /// Sequence number of the last packet the aircraft sent. Monitored but
    /// never used to reject packets: the protocol has no ordering guarantee
    /// and the newest data wins.
    pub fn sequence_number(&self) -> u32 {
        self.sequence.load(Ordering::SeqCst)
    }

    pub fn vision_flags(&self) -> u32 {
        self.vision.load(Ordering::SeqCst)
    }

    /// Battery charge in percent, `-1` until the first packet arrives.
    pub fn battery_percentage(&self) -> i32 {
        self.battery.load(Ordering::SeqCst)
    }

    /// Altitude above the ground in metres.
    pub fn altitude(&self) -> f32 {
        f32::from_bits(self.altitude_bits.load(Ordering::SeqCst))
    }

    /// Euler angles in degrees, yaw relative to the captured origin.
    pub fn rotation(&self) -> Vec3 {
        let v = self.vectors.lock().unwrap();
        let mut rot = v.rotation;
        rot.x -= v.starting_rotation.x;
        rot
    }

    /// Euler angles in radians.
    pub fn rotation_rad(&self) -> Vec3 {
        self.rotation() * (PI / 180.0)
    }

    /// Velocity in m/s in the drone's own frame.
    pub fn local_velocity(&self) -> Vec3 {
        self.vectors.lock().unwrap().local_velocity
    }

    /// Velocity in m/s in the world frame. Only meaningful while world-data
    /// computation is enabled.
    pub fn velocity(&self) -> Vec3 {
        self.vectors.lock().unwrap().world_velocity
    }

    /// Dead-reckoned position in metres relative to the take-off point.
    /// Only meaningful while world-data computation is enabled.
    pub fn position(&self) -> Vec3 {
        self.vectors.lock().unwrap().world_position
    }

    /// Seconds between the last two packets.
    pub fn delta_time(&self) -> f32 {
        self.vectors.lock().unwrap().delta_time
    }

    pub fn is_computing_world_data(&self) -> bool {
        self.compute_world_data.load(Ordering::SeqCst)
    }

    /// Enables or disables the world estimator. Ignored while flying: the
    /// estimate would start from an unknown origin.
    pub fn set_compute_world_data(&self, activate: bool) {
        if self.is_flying() {
            return;
        }
        self.compute_world_data.store(activate, Ordering::SeqCst);
    }

    /// Re-origins the world estimate: position back to zero, current yaw
    /// becomes the new reference once the take-off yaw jump is observed.
    /// Ignored while flying or while the estimator is disabled.
    pub fn reset_world_data(&self) {
        if self.is_flying() || !self.is_computing_world_data() {
            return;
        }

        let mut v = self.vectors.lock().unwrap();
        self.needs_rotation_reset.store(true, Ordering::SeqCst);
        v.world_position = Vec3::ZERO;
        let yaw = v.rotation.x;
        v.starting_rotation.x = yaw;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use byteorder::{LittleEndian, WriteBytesExt};
    use std::sync::atomic::AtomicU64;
    use std::sync::Arc;

    struct DemoFields {
        battery: i32,
        pitch: f32,
        roll: f32,
        yaw: f32,
        altitude_mm: i32,
        vel_front: f32,
        vel_right: f32,
        vel_up: f32,
    }

    impl Default for DemoFields {
        fn default() -> DemoFields {
            DemoFields {
                battery: 75,
                pitch: 0.0,
                roll: 0.0,
                yaw: 0.0,
                altitude_mm: 0,
                vel_front: 0.0,
                vel_right: 0.0,
                vel_up: 0.0,
            }
        }
    }

    fn demo_option(f: &DemoFields) -> Vec<u8> {
        let mut opt = Vec::new();
        opt.write_u16::<LittleEndian>(option_tag::DEMO).unwrap();
        opt.write_u16::<LittleEndian>(44).unwrap();
        opt.write_i32::<LittleEndian>(0).unwrap(); // control state
        opt.write_i32::<LittleEndian>(f.battery).unwrap();
        opt.write_f32::<LittleEndian>(f.pitch).unwrap();
        opt.write_f32::<LittleEndian>(f.roll).unwrap();
        opt.write_f32::<LittleEndian>(f.yaw).unwrap();
        opt.write_i32::<LittleEndian>(f.altitude_mm).unwrap();
        opt.write_f32::<LittleEndian>(f.vel_front).unwrap();
        opt.write_f32::<LittleEndian>(f.vel_right).unwrap();
        opt.write_f32::<LittleEndian>(f.vel_up).unwrap();
        opt.write_i32::<LittleEndian>(0).unwrap(); // padding counted by size
        opt
    }

    fn cks_option() -> Vec<u8> {
        let mut opt = Vec::new();
        opt.write_u16::<LittleEndian>(option_tag::CKS).unwrap();
        opt.write_u16::<LittleEndian>(8).unwrap();
        opt.write_u32::<LittleEndian>(0).unwrap();
        opt
    }

    fn packet(state: u32, seq: u32, options: &[Vec<u8>]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.write_u32::<LittleEndian>(NAVDATA_MAGIC).unwrap();
        buf.write_u32::<LittleEndian>(state).unwrap();
        buf.write_u32::<LittleEndian>(seq).unwrap();
        buf.write_u32::<LittleEndian>(0).unwrap();
        for opt in options {
            buf.extend_from_slice(opt);
        }
        buf
    }

    fn second() -> Duration {
        Duration::from_secs(1)
    }

    #[test]
    fn demo_option_publishes_scaled_fields() {
        let nav = Navdata::new();
        let fields = DemoFields {
            battery: 75,
            pitch: 1000.0,
            altitude_mm: 2500,
            ..DemoFields::default()
        };
        nav.update(
            &packet(0, 42, &[demo_option(&fields), cks_option()]),
            second(),
        );

        assert_eq!(nav.battery_percentage(), 75);
        assert_eq!(nav.sequence_number(), 42);
        assert_relative_eq!(nav.altitude(), 2.5);
        assert_eq!(nav.rotation(), Vec3::new(0.0, 1.0, 0.0));
    }

    #[test]
    fn yaw_is_negated_and_velocity_scaled() {
        let nav = Navdata::new();
        let fields = DemoFields {
            yaw: 2000.0,
            vel_front: 500.0,
            vel_right: -250.0,
            vel_up: 1000.0,
            ..DemoFields::default()
        };
        nav.update(&packet(0, 1, &[demo_option(&fields)]), second());

        assert_eq!(nav.rotation(), Vec3::new(-2.0, 0.0, 0.0));
        let vel = nav.local_velocity();
        assert_relative_eq!(vel.x, -0.25);
        assert_relative_eq!(vel.y, 1.0);
        assert_relative_eq!(vel.z, 0.5);
    }

    #[test]
    fn unknown_option_is_skipped() {
        let nav = Navdata::new();
        let mut unknown = Vec::new();
        unknown.write_u16::<LittleEndian>(0x4242).unwrap();
        unknown.write_u16::<LittleEndian>(8).unwrap();
        unknown.write_u32::<LittleEndian>(0xdead_beef).unwrap();

        let fields = DemoFields {
            battery: 75,
            pitch: 1000.0,
            altitude_mm: 2500,
            ..DemoFields::default()
        };
        nav.update(
            &packet(0, 7, &[demo_option(&fields), unknown, cks_option()]),
            second(),
        );

        assert_eq!(nav.battery_percentage(), 75);
        assert_relative_eq!(nav.altitude(), 2.5);
        assert_eq!(nav.rotation(), Vec3::new(0.0, 1.0, 0.0));
    }

    #[test]
    fn magic_mismatch_drops_whole_packet() {
        let nav = Navdata::new();
        let mut buf = packet(0xffff_ffff, 9, &[demo_option(&DemoFields::default())]);
        buf[0] = 0x00;
        nav.update(&buf, second());

        assert_eq!(nav.battery_percentage(), -1);
        assert_eq!(nav.sequence_number(), 0);
    }

    #[test]
    fn bogus_option_size_stops_the_walk() {
        let nav = Navdata::new();
        let mut bad = Vec::new();
        bad.write_u16::<LittleEndian>(0x0101).unwrap();
        bad.write_u16::<LittleEndian>(0).unwrap();
        let fields = DemoFields {
            battery: 50,
            ..DemoFields::default()
        };
        nav.update(&packet(0, 1, &[bad, demo_option(&fields)]), second());

        // Header fields still land, the options after the bad one do not.
        assert_eq!(nav.sequence_number(), 1);
        assert_eq!(nav.battery_percentage(), -1);
    }

    #[test]
    fn missing_terminator_is_not_fatal() {
        let nav = Navdata::new();
        let fields = DemoFields {
            battery: 33,
            ..DemoFields::default()
        };
        nav.update(&packet(0, 3, &[demo_option(&fields)]), second());
        assert_eq!(nav.battery_percentage(), 33);
    }

    #[test]
    fn zero_vertical_velocity_is_derived_from_altitude() {
        let nav = Navdata::new();
        nav.update(
            &packet(0, 1, &[demo_option(&DemoFields::default())]),
            second(),
        );
        let climb = DemoFields {
            altitude_mm: 1500,
            ..DemoFields::default()
        };
        nav.update(
            &packet(0, 2, &[demo_option(&climb)]),
            Duration::from_millis(500),
        );

        assert_relative_eq!(nav.local_velocity().y, 3.0);
    }

    #[test]
    fn world_data_disabled_keeps_position_frozen() {
        let nav = Navdata::new();
        let fields = DemoFields {
            vel_right: 1000.0,
            vel_up: 1.0,
            ..DemoFields::default()
        };
        for seq in 0..5 {
            nav.update(&packet(0, seq, &[demo_option(&fields)]), second());
        }
        assert_eq!(nav.position(), Vec3::ZERO);
        assert_eq!(nav.velocity(), Vec3::ZERO);
    }

    #[test]
    fn world_position_integrates_local_velocity() {
        let nav = Navdata::new();
        nav.set_compute_world_data(true);
        let fields = DemoFields {
            vel_right: 1000.0,
            vel_up: 1.0, // avoid the firmware workaround path
            ..DemoFields::default()
        };
        let n = 4;
        for seq in 0..n {
            nav.update(&packet(0, seq, &[demo_option(&fields)]), second());
        }
        assert_relative_eq!(nav.position().x, n as f32, epsilon = 1e-4);
    }

    #[test]
    fn world_velocity_follows_yaw_rotation() {
        let nav = Navdata::new();
        nav.set_compute_world_data(true);
        // Heading 90 degrees off the origin, flying "right" locally.
        let fields = DemoFields {
            yaw: -90_000.0,
            vel_right: 1000.0,
            vel_up: 1.0,
            ..DemoFields::default()
        };
        nav.update(&packet(0, 1, &[demo_option(&fields)]), second());
        let world = nav.velocity();
        assert_relative_eq!(world.x, 0.0, epsilon = 1e-4);
        assert_relative_eq!(world.z.abs(), 1.0, epsilon = 1e-4);
    }

    #[test]
    fn compute_world_data_is_locked_while_flying() {
        let nav = Navdata::new();
        nav.update(&packet(StateFlags::FLYING.bits(), 1, &[]), second());
        nav.set_compute_world_data(true);
        assert!(!nav.is_computing_world_data());

        nav.update(&packet(0, 2, &[]), second());
        nav.set_compute_world_data(true);
        assert!(nav.is_computing_world_data());
    }

    #[test]
    fn reset_captures_yaw_origin_after_takeoff_jump() {
        let nav = Navdata::new();
        nav.set_compute_world_data(true);
        nav.update(
            &packet(0, 1, &[demo_option(&DemoFields::default())]),
            second(),
        );
        nav.reset_world_data();

        // Small wobble: latch stays armed, origin unchanged.
        let wobble = DemoFields {
            yaw: -1000.0,
            ..DemoFields::default()
        };
        nav.update(&packet(0, 2, &[demo_option(&wobble)]), second());
        assert_relative_eq!(nav.rotation().x, 1.0);

        // Take-off kick beyond three degrees: current yaw becomes origin.
        let kick = DemoFields {
            yaw: -6000.0,
            ..DemoFields::default()
        };
        nav.update(&packet(0, 3, &[demo_option(&kick)]), second());
        assert_relative_eq!(nav.rotation().x, 0.0);

        // Latch released: later motion is measured from the new origin.
        let turn = DemoFields {
            yaw: -8000.0,
            ..DemoFields::default()
        };
        nav.update(&packet(0, 4, &[demo_option(&turn)]), second());
        assert_relative_eq!(nav.rotation().x, 2.0);
    }

    #[test]
    fn state_flags_decode() {
        let nav = Navdata::new();
        let word = StateFlags::FLYING | StateFlags::LOW_BATTERY | StateFlags::COM_WATCHDOG;
        nav.update(&packet(word.bits(), 1, &[]), second());
        assert!(nav.is_flying());
        assert!(nav.state_flags().contains(StateFlags::LOW_BATTERY));
        assert!(!nav.state_flags().contains(StateFlags::EMERGENCY));
        assert_eq!(nav.state(), word.bits());
    }

    #[test]
    fn custom_handler_receives_raw_measures() {
        // The raw-measures option: three u16 accelerometers, three i16
        // gyrometers, two padding i16, then the raw battery voltage.
        let nav = Navdata::new();
        let voltage = Arc::new(AtomicU64::new(0));
        let seen = voltage.clone();
        nav.register_handler(
            option_tag::RAW_MEASURES,
            Box::new(move |_, opt| {
                let mut cur = Cursor::new(&opt[8..]);
                let mut acc = [0u16; 3];
                for a in acc.iter_mut() {
                    *a = cur.read_u16::<LittleEndian>().unwrap();
                }
                let mut gyro = [0i16; 3];
                for g in gyro.iter_mut() {
                    *g = cur.read_i16::<LittleEndian>().unwrap();
                }
                cur.read_i16::<LittleEndian>().unwrap();
                cur.read_i16::<LittleEndian>().unwrap();
                let v = cur.read_u32::<LittleEndian>().unwrap();
                assert_eq!(acc, [10, 20, 30]);
                assert_eq!(gyro, [-1, -2, -3]);
                seen.store(u64::from(v), Ordering::SeqCst);
            }),
        );

        let mut opt = Vec::new();
        opt.write_u16::<LittleEndian>(option_tag::RAW_MEASURES).unwrap();
        opt.write_u16::<LittleEndian>(32).unwrap();
        opt.write_i32::<LittleEndian>(0).unwrap();
        for a in &[10u16, 20, 30] {
            opt.write_u16::<LittleEndian>(*a).unwrap();
        }
        for g in &[-1i16, -2, -3] {
            opt.write_i16::<LittleEndian>(*g).unwrap();
        }
        opt.write_i16::<LittleEndian>(0).unwrap();
        opt.write_i16::<LittleEndian>(0).unwrap();
        opt.write_u32::<LittleEndian>(11_100).unwrap();
        opt.write_u32::<LittleEndian>(0).unwrap();

        nav.update(&packet(0, 1, &[opt, cks_option()]), second());
        assert_eq!(voltage.load(Ordering::SeqCst), 11_100);
    }
}
