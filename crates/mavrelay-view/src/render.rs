//! Per-frame pose recomputation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::camera::{CameraHandle, CameraState};
use crate::nav::{NavHandle, NavigationState};

/// ~60 Hz
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// The map/3D engine the pose is handed to.
pub trait RenderTarget: Send + 'static {
    /// False until the map and overlay exist.
    fn is_ready(&self) -> bool;
    /// Must not block; it runs once per frame.
    fn render(&mut self, pose: &FramePose);
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CameraPose {
    pub center: LatLng,
    /// deg
    pub heading: f64,
    /// deg
    pub tilt: f64,
    pub zoom: f64,
}

/// Everything one frame needs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FramePose {
    /// Overlay anchor, on the ground under the vehicle.
    pub anchor: LatLng,
    /// Marker height above the anchor, m.
    pub marker_offset: f64,
    /// Marker yaw, rad.
    pub marker_yaw: f64,
    /// Marker scale for the current zoom.
    pub marker_scale: f64,
    pub camera: CameraPose,
}

/// The camera follows the vehicle: it is centered on the anchor.
pub fn compose_pose(nav: &NavigationState, cam: &CameraState) -> FramePose {
    let anchor = LatLng { lat: nav.lat, lng: nav.lng };
    FramePose {
        anchor,
        marker_offset: nav.altitude,
        marker_yaw: nav.heading,
        marker_scale: cam.scale,
        camera: CameraPose { center: anchor, heading: cam.heading, tilt: cam.tilt, zoom: cam.zoom },
    }
}

struct Slot<T> {
    target: T,
    cancelled: bool,
}

/// A running frame task. Dropping it stops the loop.
pub struct RenderLoop<T: RenderTarget> {
    slot: Arc<Mutex<Slot<T>>>,
    frames: Arc<AtomicU64>,
    task: Option<JoinHandle<()>>,
}

impl<T: RenderTarget> RenderLoop<T> {
    pub fn start(nav: NavHandle, camera: CameraHandle, target: T, frame_interval: Duration) -> Self {
        let slot = Arc::new(Mutex::new(Slot { target, cancelled: false }));
        let frames = Arc::new(AtomicU64::new(0));
        let task = tokio::spawn(run_frames(
            nav,
            camera,
            slot.clone(),
            frames.clone(),
            frame_interval.max(Duration::from_millis(1)),
        ));
        Self { slot, frames, task: Some(task) }
    }

    /// Frames rendered so far.
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Access to the target between frames.
    pub fn with_target<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut lock(&self.slot).target)
    }

    /// No `render` call starts after this returns.
    pub fn stop(&mut self) {
        lock(&self.slot).cancelled = true;
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("render loop stopped after {} frames", self.frames());
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }
}

impl<T: RenderTarget> Drop for RenderLoop<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_frames<T: RenderTarget>(
    nav: NavHandle,
    camera: CameraHandle,
    slot: Arc<Mutex<Slot<T>>>,
    frames: Arc<AtomicU64>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let mut guard = lock(&slot);
        if guard.cancelled {
            return;
        }
        if !nav.renderable() || !guard.target.is_ready() {
            continue;
        }
        let pose = compose_pose(&nav.snapshot(), &camera.snapshot());
        guard.target.render(&pose);
        frames.fetch_add(1, Ordering::Relaxed);
    }
}

fn lock<T>(slot: &Mutex<Slot<T>>) -> MutexGuard<'_, Slot<T>> {
    slot.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{InputEvent, Key};
    use std::sync::atomic::AtomicBool;

    #[derive(Default)]
    struct Recorder {
        ready: Arc<AtomicBool>,
        poses: Vec<FramePose>,
    }

    impl RenderTarget for Recorder {
        fn is_ready(&self) -> bool {
            self.ready.load(Ordering::Relaxed)
        }
        fn render(&mut self, pose: &FramePose) {
            self.poses.push(*pose);
        }
    }

    const FRAME: Duration = Duration::from_millis(2);

    async fn wait_frames<T: RenderTarget>(r: &RenderLoop<T>, n: u64) {
        for _ in 0..500 {
            if r.frames() >= n {
                return;
            }
            tokio::time::sleep(FRAME).await;
        }
        panic!("only {} frames rendered", r.frames());
    }

    fn fed_nav() -> NavHandle {
        let nav = NavHandle::new();
        nav.apply_text(r#"{"type":"SIMSTATE","payload":{"lat":-353635360,"lng":1491649330}}"#);
        nav.apply_text(r#"{"type":"GLOBAL_POSITION_INT","payload":{"relativeAlt":50000,"hdg":18000}}"#);
        nav
    }

    #[test]
    fn pose_follows_vehicle() {
        let nav = NavigationState { lat: 1.0, lng: 2.0, altitude: 30.0, heading: 0.5 };
        let cam = CameraState::default();
        let pose = compose_pose(&nav, &cam);
        assert_eq!(pose.anchor, LatLng { lat: 1.0, lng: 2.0 });
        assert_eq!(pose.camera.center, pose.anchor);
        assert_eq!(pose.marker_offset, 30.0);
        assert_eq!(pose.marker_yaw, 0.5);
        assert_eq!(pose.camera.tilt, 45.0);
        assert_eq!(pose.camera.zoom, 17.0);
    }

    #[tokio::test]
    async fn nothing_renders_without_data_or_target() {
        let ready = Arc::new(AtomicBool::new(true));
        let target = Recorder { ready: ready.clone(), ..Default::default() };
        let nav = NavHandle::new();
        let mut r = RenderLoop::start(nav.clone(), CameraHandle::new(), target, FRAME);

        tokio::time::sleep(FRAME * 10).await;
        assert_eq!(r.frames(), 0);

        ready.store(false, Ordering::Relaxed);
        nav.apply_text(r#"{"type":"SIMSTATE","payload":{"lat":1,"lng":2}}"#);
        tokio::time::sleep(FRAME * 10).await;
        assert_eq!(r.frames(), 0);

        ready.store(true, Ordering::Relaxed);
        wait_frames(&r, 1).await;
        r.stop();
    }

    #[tokio::test]
    async fn frames_carry_latest_nav_and_camera() {
        let ready = Arc::new(AtomicBool::new(true));
        let camera = CameraHandle::new();
        let mut r = RenderLoop::start(fed_nav(), camera.clone(), Recorder { ready, ..Default::default() }, FRAME);
        wait_frames(&r, 1).await;

        camera.handle(InputEvent::KeyDown(Key::Shift));
        camera.handle(InputEvent::PointerMove { x: 0.0, y: 100.0 });
        let seen = r.frames();
        wait_frames(&r, seen + 2).await;
        r.stop();

        let last = r.with_target(|t| *t.poses.last().unwrap());
        assert!((last.anchor.lat + 35.363536).abs() < 1e-9);
        assert_eq!(last.marker_offset, 50.0);
        assert!((last.marker_yaw - std::f64::consts::PI).abs() < 1e-12);
        assert_eq!(last.camera.tilt, 35.0);
    }

    #[tokio::test]
    async fn no_render_after_stop() {
        let ready = Arc::new(AtomicBool::new(true));
        let mut r = RenderLoop::start(fed_nav(), CameraHandle::new(), Recorder { ready, ..Default::default() }, FRAME);
        wait_frames(&r, 3).await;
        r.stop();
        assert!(!r.is_running());

        let after_stop = r.with_target(|t| t.poses.len());
        tokio::time::sleep(FRAME * 20).await;
        assert_eq!(r.with_target(|t| t.poses.len()), after_stop);
    }

    #[tokio::test]
    async fn stale_link_stops_frames() {
        let ready = Arc::new(AtomicBool::new(true));
        let nav = fed_nav();
        let r = RenderLoop::start(nav.clone(), CameraHandle::new(), Recorder { ready, ..Default::default() }, FRAME);
        wait_frames(&r, 1).await;

        nav.set_stale(true);
        // a frame may be mid-flight when the flag flips
        tokio::time::sleep(FRAME * 3).await;
        let frozen = r.frames();
        tokio::time::sleep(FRAME * 20).await;
        assert_eq!(r.frames(), frozen);
    }
}
