//! # AR.Drone 2.0 client
//!
//! Client library for the Parrot AR.Drone 2.0 quadcopter, speaking the
//! drone's native network protocol over its WiFi access point (the drone
//! appears as `192.168.1.1`). Four channels are used:
//!
//! * **AT commands** (UDP 5556) — textual, fire-and-forget lines such as
//!   `AT*REF=7,290718208\r` carrying a shared monotonic sequence number.
//!   Take-off, movement and configuration all go through here.
//! * **Navdata** (UDP 5554) — binary telemetry streamed by the drone after
//!   a 4-byte trigger: state word, battery, attitude, altitude, velocity
//!   and more, framed as tagged options. See [`Navdata`].
//! * **Video** (TCP 5555) — H.264 video, supervised by [`Video`] with
//!   automatic reconnection. The actual codec is pluggable through the
//!   [`StreamDecoder`] trait.
//! * **Control** (TCP 5559) — acknowledged configuration transfers; the
//!   connection is established because the firmware expects it.
//!
//! The drone cuts the motors when it stops hearing from its pilot, so
//! [`Drone`] runs a watchdog thread that beats `AT*COMWDG` every 150 ms for
//! as long as the handle lives.
//!
//! ## Example
//!
//! ```no_run
//! use ardrone::{Drone, DroneConfig, Vec3};
//! # fn decoder_factory() -> ardrone::DecoderFactory { unimplemented!() }
//! # fn main() -> Result<(), ardrone::Error> {
//! let drone = Drone::new("session", "user", "app", DroneConfig::default(), decoder_factory())?;
//!
//! drone.trim(); // flat trim while still on the ground
//! drone.take_off();
//! // tilt a quarter forward, no yaw
//! drone.steer(Vec3::FORWARD * 0.25);
//! drone.enter_hovering_mode();
//! drone.land();
//!
//! println!("battery {}%", drone.nav().battery_percentage());
//! # Ok(())
//! # }
//! ```
//!
//! All 3-D values use the drone body frame: `x` right, `y` up, `z` forward.
//! The estimator behind [`Navdata::position`] dead-reckons a world-frame
//! position from the streamed velocities once
//! [`Drone::set_compute_world_data`] is enabled before take-off.

use std::fmt::Display;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::error;
use thiserror::Error;

mod command;
mod connection;
pub mod math;
mod navdata;
mod video;

pub use command::{
    float_bits, AtCommands, Camera, FlightAnimation, LedAnimation, VideoCodec, PCMD_PROGRESSIVE,
};
pub use connection::Connection;
pub use math::{Mat4, Quaternion, Vec3};
pub use navdata::{option_tag, Navdata, OptionHandler, StateFlags, NAVDATA_MAGIC};
pub use video::{
    DecodeError, DecoderFactory, StreamDecoder, StreamInfo, Video, VideoInitError,
};

/// Pause after a configuration write; the firmware silently drops configs
/// that arrive back to back.
const CONFIG_DELAY: Duration = Duration::from_millis(100);

/// Beat of the `AT*COMWDG` keep-alive.
const WATCHDOG_INTERVAL: Duration = Duration::from_millis(150);

/// Failures that abort constructing a [`Drone`].
#[derive(Debug, Error)]
pub enum Error {
    #[error("drone connection setup failed: {0}")]
    Connection(#[from] std::io::Error),
}

/// Address and ports of the aircraft.
#[derive(Debug, Clone)]
pub struct DroneConfig {
    pub ip: IpAddr,
    pub at_port: u16,
    pub navdata_port: u16,
    pub video_port: u16,
    pub control_port: u16,
}

impl Default for DroneConfig {
    fn default() -> DroneConfig {
        DroneConfig {
            ip: IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)),
            at_port: 5556,
            navdata_port: 5554,
            video_port: 5555,
            control_port: 5559,
        }
    }
}

/// Main handle on one aircraft.
///
/// Owns the sockets, the telemetry decoder, the video supervisor and the
/// watchdog thread; dropping the handle stops the watchdog, the telemetry
/// reception and the video pipeline, in that order.
pub struct Drone {
    at: Arc<AtCommands>,
    connection: Arc<Connection>,
    navdata: Arc<Navdata>,
    video: Video,
    connected: Arc<AtomicBool>,
    watchdog: Option<JoinHandle<()>>,

    altitude_max: f32,
    vertical_speed: f32,
    rotation_speed: f32,
    max_euler_angle: f32,
    without_shell: bool,
    outdoor: bool,
}

impl Drone {
    /// Connects to the aircraft and pushes the initial configuration: the
    /// identity triple, conservative flight limits, the default video setup
    /// (front camera, H.264 360p) and the telemetry bootstrap. Expect the
    /// call to take about a second; each configuration write is followed by
    /// the mandatory 100 ms pause.
    ///
    /// `decoder_factory` supplies the video codec implementation; see
    /// [`StreamDecoder`].
    pub fn new(
        session_id: &str,
        user_id: &str,
        app_id: &str,
        config: DroneConfig,
        decoder_factory: DecoderFactory,
    ) -> Result<Drone, Error> {
        let at = Arc::new(AtCommands::new(session_id, user_id, app_id));
        let connection = Arc::new(Connection::new(&config)?);
        let navdata = Arc::new(Navdata::new());

        let trigger = connection.clone();
        let video = Video::new(
            format!("tcp://{}:{}", config.ip, config.video_port),
            decoder_factory,
            Box::new(move || trigger.send_video_start()),
        );

        let mut drone = Drone {
            at,
            connection,
            navdata,
            video,
            connected: Arc::new(AtomicBool::new(true)),
            watchdog: None,
            altitude_max: 2.0,
            vertical_speed: 0.7,
            rotation_speed: 3.0,
            max_euler_angle: 0.26,
            without_shell: false,
            outdoor: false,
        };

        drone.send_config("custom:session_id", session_id);
        drone.send_config("custom:profile_id", user_id);
        drone.send_config("custom:application_id", app_id);

        drone.set_altitude_max(2.0);
        drone.set_vertical_speed(0.7);
        drone.set_rotation_speed(3.0);
        drone.set_max_euler_angle(0.26);
        drone.set_is_without_shell(false);
        drone.set_is_outdoor(false);

        drone.set_default_config();
        drone.init_navdata();

        Ok(drone)
    }

    fn push_config(&self, lines: [String; 2]) {
        self.connection.send_at(&lines[0]);
        self.connection.send_at(&lines[1]);
        thread::sleep(CONFIG_DELAY);
    }

    fn send_config(&self, name: &str, value: impl Display) {
        self.push_config(self.at.config(name, value));
    }

    fn init_navdata(&mut self) {
        self.connection.send_navdata_start();
        // Full navdata, not the demo-only subset.
        self.send_config("general:navdata_demo", "FALSE");
        self.connection.send_at(&self.at.ctrl_ack());
        self.connection.start_navdata_loop(self.navdata.clone());

        let at = self.at.clone();
        let connection = self.connection.clone();
        let connected = self.connected.clone();
        self.watchdog = Some(thread::spawn(move || {
            while connected.load(Ordering::SeqCst) {
                connection.send_at(&at.comwdg());
                thread::sleep(WATCHDOG_INTERVAL);
            }
        }));
    }
}

impl Drone {
    /// Spins the motors up. Re-origins the world estimate first when it is
    /// enabled.
    pub fn take_off(&self) {
        if self.navdata.is_computing_world_data() {
            self.navdata.reset_world_data();
        }
        self.connection.send_at(&self.at.take_off());
    }

    pub fn land(&self) {
        self.connection.send_at(&self.at.land());
    }

    /// Cuts the motors immediately. The drone falls.
    pub fn emergency(&self) {
        self.connection.send_at(&self.at.emergency());
    }

    /// Continuous movement with the given tilt/lift factors and no yaw.
    pub fn steer(&self, m: Vec3) {
        self.steer_yaw(m, 0.0);
    }

    /// Continuous movement. Each factor must lie in `[-1, 1]`: `m.x` tilts
    /// right, `m.z` tilts forward, `m.y` climbs, `yaw_rate` spins
    /// clockwise. Any factor out of range drops the whole command — no
    /// motion rather than wrong motion.
    pub fn steer_yaw(&self, m: Vec3, yaw_rate: f32) {
        let ok = |f: f32| (-1.0..=1.0).contains(&f);
        if !ok(m.x) || !ok(m.y) || !ok(m.z) || !ok(yaw_rate) {
            return;
        }

        // Body frame to wire frame: phi tilts left/right, theta front/back
        // (sign flipped), gaz is vertical speed.
        self.connection
            .send_at(&self.at.pcmd(PCMD_PROGRESSIVE, m.x, -m.z, m.y, yaw_rate));
    }

    /// Stops all movement and lets the drone stabilise on its sensors.
    pub fn enter_hovering_mode(&self) {
        self.connection.send_at(&self.at.hover());
    }

    /// Runs a LED animation at `freq` Hz for `duration_s` seconds.
    pub fn anim_leds(&self, anim: LedAnimation, freq: f32, duration_s: u32) {
        self.push_config(self.at.led_animation(anim, freq, duration_s));
    }

    /// Runs a pre-programmed flight figure. The firmware imposes the
    /// duration; flips need the 2.0 hull and a bright, roomy environment.
    pub fn anim(&self, anim: FlightAnimation) {
        self.push_config(self.at.flight_animation(anim));
    }

    /// Calibrates the magnetometer. Only meaningful airborne; ignored on
    /// the ground.
    pub fn calibrate(&self) {
        if self.is_flying() {
            self.connection.send_at(&self.at.calib());
        }
    }

    /// Flat trim: tells the drone it is lying level. Only meaningful on the
    /// ground; ignored while flying.
    pub fn trim(&self) {
        if !self.is_flying() {
            self.connection.send_at(&self.at.flat_trim());
        }
    }
}

impl Drone {
    /// Front camera, H.264 360p.
    pub fn set_default_config(&self) {
        self.set_camera(Camera::Front);
        self.set_video_codec(VideoCodec::H264x360p);
    }

    /// Selects the camera feeding the video stream.
    pub fn set_camera(&self, channel: Camera) {
        self.send_config("video:video_channel", channel as u8);
    }

    /// Switches the video codec. The stream is stopped around the
    /// configuration change and restarted afterwards.
    pub fn set_video_codec(&self, codec: VideoCodec) {
        self.video.stop();
        self.send_config("video:video_codec", codec as u8);
        self.video.restart();
    }

    /// Toggles recording to a USB key, then restores the default video
    /// configuration.
    pub fn set_video_record(&self, activate: bool) {
        self.video.stop();
        self.send_config("video:video_on_usb", if activate { "TRUE" } else { "FALSE" });
        self.set_default_config();
    }

    /// Altitude ceiling in metres.
    pub fn set_altitude_max(&mut self, altitude_max: f32) {
        self.altitude_max = altitude_max;
        self.send_config("control:altitude_max", (altitude_max * 1000.0) as i32);
    }

    /// Maximum vertical speed, metres per second (0.2 to 2.0).
    pub fn set_vertical_speed(&mut self, vertical_speed: f32) {
        self.vertical_speed = vertical_speed;
        self.send_config("control:control_vz_max", vertical_speed * 1000.0);
    }

    /// Maximum yaw rate, radians per second (0.7 to 6.11).
    pub fn set_rotation_speed(&mut self, rotation_speed: f32) {
        self.rotation_speed = rotation_speed;
        self.send_config("control:control_yaw", rotation_speed);
    }

    /// Maximum bending angle in radians (0 to 0.52); effectively the speed
    /// of the drone.
    pub fn set_max_euler_angle(&mut self, angle: f32) {
        self.max_euler_angle = angle;
        self.send_config("control:euler_angle_max", angle);
    }

    /// Whether the drone flies without the indoor hull.
    pub fn set_is_without_shell(&mut self, without_shell: bool) {
        self.without_shell = without_shell;
        self.send_config(
            "control:flight_without_shell",
            if without_shell { "TRUE" } else { "FALSE" },
        );
    }

    /// Outdoor mode enables the wind estimator.
    pub fn set_is_outdoor(&mut self, outdoor: bool) {
        self.outdoor = outdoor;
        self.send_config("control:outdoor", if outdoor { "TRUE" } else { "FALSE" });
    }

    pub fn altitude_max(&self) -> f32 {
        self.altitude_max
    }

    pub fn vertical_speed(&self) -> f32 {
        self.vertical_speed
    }

    pub fn rotation_speed(&self) -> f32 {
        self.rotation_speed
    }

    pub fn max_euler_angle(&self) -> f32 {
        self.max_euler_angle
    }

    pub fn is_without_shell(&self) -> bool {
        self.without_shell
    }

    pub fn is_outdoor(&self) -> bool {
        self.outdoor
    }

    /// Enables or disables the world-frame estimator. Only honoured while
    /// landed.
    pub fn set_compute_world_data(&self, activate: bool) {
        self.navdata.set_compute_world_data(activate);
    }

    pub fn is_flying(&self) -> bool {
        self.navdata.is_flying()
    }

    /// True when every bit of `mask` is set in the aircraft state word.
    pub fn state(&self, mask: StateFlags) -> bool {
        self.navdata.state_flags().contains(mask)
    }

    /// Time since the last telemetry packet; poll this to detect loss of
    /// signal.
    pub fn last_navdata_reception(&self) -> Duration {
        self.connection.last_navdata_reception()
    }

    /// Published telemetry.
    pub fn nav(&self) -> &Navdata {
        &self.navdata
    }

    /// Video supervisor, for frames and dimensions.
    pub fn video(&self) -> &Video {
        &self.video
    }
}

impl Drop for Drone {
    fn drop(&mut self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(watchdog) = self.watchdog.take() {
            if watchdog.join().is_err() {
                error!("watchdog thread panicked");
            }
        }
        self.connection.stop();
        self.video.shutdown();
    }
}
