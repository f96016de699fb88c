// THEORY:
// The tracker's only consumer is a motion controller. The pipeline calls
// `track_object(x, y, area)` once for every frame, found or not, from whichever
// tracking worker handled it. Implementations must therefore be `Sync` and must
// treat `(0, 0, 0)` as an ordinary "lost" report.
//
// `AimingController` is the decision layer that sits between tracks and a robot.
// It ignores blobs too small to trust, converts pixel offsets into pan/tilt
// angles, and when the object is lost while driving it straightens the robot up.
// The actual transport to the hardware is a `MotionDriver`, kept abstract here.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::core_modules::frame_buffer::Track;

/// Receives one track per processed frame.
pub trait MotionController: Send + Sync {
    fn track_object(&self, x: i32, y: i32, area: f64);
}

impl<M: MotionController + ?Sized> MotionController for Arc<M> {
    fn track_object(&self, x: i32, y: i32, area: f64) {
        (**self).track_object(x, y, area)
    }
}

/// Logs every track. Lost frames go to trace.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrackLogger;

impl MotionController for TrackLogger {
    fn track_object(&self, x: i32, y: i32, area: f64) {
        if area > 0.0 {
            debug!(x, y, area, "object tracked");
        } else {
            trace!("object lost");
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TrackSummary {
    pub found: u64,
    pub lost: u64,
    pub last_found: Option<Track>,
}

/// Counts found and lost reports and remembers the latest hit.
#[derive(Debug, Default)]
pub struct TrackHistory {
    summary: Mutex<TrackSummary>,
}

impl TrackHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn summary(&self) -> TrackSummary {
        *self.summary.lock()
    }

    pub fn reports(&self) -> u64 {
        let summary = self.summary.lock();
        summary.found + summary.lost
    }
}

impl MotionController for TrackHistory {
    fn track_object(&self, x: i32, y: i32, area: f64) {
        let mut summary = self.summary.lock();
        if area > 0.0 {
            summary.found += 1;
            summary.last_found = Some(Track::new(x, y, area));
        } else {
            summary.lost += 1;
        }
    }
}

/// Fans every report out to several controllers.
#[derive(Default)]
pub struct MotionFanout {
    controllers: Vec<Arc<dyn MotionController>>,
}

impl MotionFanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, controller: Arc<dyn MotionController>) -> Self {
        self.controllers.push(controller);
        self
    }
}

impl MotionController for MotionFanout {
    fn track_object(&self, x: i32, y: i32, area: f64) {
        for controller in &self.controllers {
            controller.track_object(x, y, area);
        }
    }
}

/// Blobs at or below this many pixels are not worth steering towards.
pub const MIN_TRACK_AREA: f64 = 50.0;

/// Camera calibration: roughly 20 degrees across 115 pixels.
pub const DEGREES_PER_PIXEL: f64 = 20.0 / 115.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MotionCommand {
    /// Point the head at an angle relative to straight ahead. Tilt is up-positive.
    Look { pan: f64, tilt: f64 },
    /// Drive at `speed`, turning by `direction` (0 is straight on).
    Drive { speed: i32, direction: i32 },
}

/// Transport to the robot hardware.
pub trait MotionDriver: Send {
    fn send(&mut self, command: MotionCommand);
}

impl<F> MotionDriver for F
where
    F: FnMut(MotionCommand) + Send,
{
    fn send(&mut self, command: MotionCommand) {
        self(command)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct DriveState {
    tracking: bool,
    speed: i32,
    direction: i32,
}

/// Turns tracks into head and drive commands.
pub struct AimingController<D: MotionDriver> {
    inner: Mutex<(D, DriveState)>,
}

impl<D: MotionDriver> AimingController<D> {
    /// Starts with tracking enabled and the robot stationary.
    pub fn new(driver: D) -> Self {
        Self {
            inner: Mutex::new((
                driver,
                DriveState {
                    tracking: true,
                    ..DriveState::default()
                },
            )),
        }
    }

    pub fn is_tracking(&self) -> bool {
        self.inner.lock().1.tracking
    }

    pub fn set_tracking(&self, tracking: bool) {
        self.inner.lock().1.tracking = tracking;
    }

    /// Flips tracking on/off and returns the new state.
    pub fn toggle_tracking(&self) -> bool {
        let mut inner = self.inner.lock();
        inner.1.tracking = !inner.1.tracking;
        inner.1.tracking
    }

    /// Sends a drive command and remembers it for lost-object recovery.
    pub fn drive(&self, speed: i32, direction: i32) {
        let mut inner = self.inner.lock();
        inner.1.speed = speed;
        inner.1.direction = direction;
        inner.0.send(MotionCommand::Drive { speed, direction });
    }

    pub fn stop(&self) {
        self.drive(0, 0);
    }
}

impl<D: MotionDriver> MotionController for AimingController<D> {
    fn track_object(&self, x: i32, y: i32, area: f64) {
        let mut inner = self.inner.lock();
        let (driver, state) = &mut *inner;
        if !state.tracking {
            return;
        }

        if area > MIN_TRACK_AREA {
            driver.send(MotionCommand::Look {
                pan: x as f64 * DEGREES_PER_PIXEL,
                tilt: y as f64 * DEGREES_PER_PIXEL,
            });
        } else if state.direction != 0 && state.speed != 0 {
            state.direction = 0;
            driver.send(MotionCommand::Drive {
                speed: state.speed,
                direction: 0,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn recording_aim() -> (AimingController<impl MotionDriver>, mpsc::Receiver<MotionCommand>) {
        let (tx, rx) = mpsc::channel();
        let driver = move |command: MotionCommand| {
            let _ = tx.send(command);
        };
        (AimingController::new(driver), rx)
    }

    #[test]
    fn history_counts_found_and_lost() {
        let history = TrackHistory::new();
        history.track_object(3, -4, 120.0);
        history.track_object(0, 0, 0.0);
        history.track_object(1, 1, 80.0);

        let summary = history.summary();
        assert_eq!(summary.found, 2);
        assert_eq!(summary.lost, 1);
        assert_eq!(summary.last_found, Some(Track::new(1, 1, 80.0)));
        assert_eq!(history.reports(), 3);
    }

    #[test]
    fn fanout_reaches_every_controller() {
        let a = Arc::new(TrackHistory::new());
        let b = Arc::new(TrackHistory::new());
        let fanout = MotionFanout::new()
            .with(a.clone())
            .with(b.clone())
            .with(Arc::new(TrackLogger));
        fanout.track_object(5, 5, 10.0);
        assert_eq!(a.reports(), 1);
        assert_eq!(b.reports(), 1);
    }

    #[test]
    fn large_blobs_turn_into_look_commands() {
        let (aim, commands) = recording_aim();
        aim.track_object(115, -230, 400.0);
        match commands.try_recv().unwrap() {
            MotionCommand::Look { pan, tilt } => {
                assert!((pan - 20.0).abs() < 1e-9);
                assert!((tilt + 40.0).abs() < 1e-9);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn small_blobs_are_ignored_while_stationary() {
        let (aim, commands) = recording_aim();
        aim.track_object(10, 10, MIN_TRACK_AREA);
        aim.track_object(0, 0, 0.0);
        assert!(commands.try_recv().is_err());
    }

    #[test]
    fn losing_the_object_while_turning_drives_straight() {
        let (aim, commands) = recording_aim();
        aim.drive(120, 30);
        assert_eq!(
            commands.try_recv().unwrap(),
            MotionCommand::Drive { speed: 120, direction: 30 }
        );

        aim.track_object(0, 0, 0.0);
        assert_eq!(
            commands.try_recv().unwrap(),
            MotionCommand::Drive { speed: 120, direction: 0 }
        );
        // Already straight: nothing more to send.
        aim.track_object(0, 0, 0.0);
        assert!(commands.try_recv().is_err());
    }

    #[test]
    fn tracking_toggle_silences_commands() {
        let (aim, commands) = recording_aim();
        assert!(aim.is_tracking());
        assert!(!aim.toggle_tracking());
        aim.track_object(50, 50, 1000.0);
        assert!(commands.try_recv().is_err());

        aim.set_tracking(true);
        aim.track_object(50, 50, 1000.0);
        assert!(commands.try_recv().is_ok());
    }
}
