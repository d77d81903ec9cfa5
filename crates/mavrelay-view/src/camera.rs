//! Orbit/zoom camera driven by local input.
//!
//! Holding the modifier key latches the pointer position and the current
//! heading/tilt. While latched, horizontal pointer travel turns the camera
//! and vertical travel tilts it, both relative to the latch point; the wheel
//! zooms. Releasing the modifier freezes whatever the camera shows.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;

/// Ground resolution per integer zoom level (0..=20), used to keep the
/// vehicle marker's perceived size roughly constant across zoom.
pub const ZOOM_SCALE: [f64; 21] = [
    1183315101.0,
    591657550.5,
    295828775.3,
    147914387.6,
    73957193.82,
    36978596.91,
    18489298.45,
    9244649.227,
    4622324.614,
    2311162.307,
    1155581.153,
    577790.5767,
    288895.2884,
    144447.6442,
    72223.82209,
    36111.91104,
    18055.95552,
    9027.977761,
    4513.98888,
    2256.99444,
    1128.49722,
];

pub const SCALE_FACTOR: f64 = 1e-4;

pub const ZOOM_MIN: f64 = 5.0;
pub const ZOOM_MAX: f64 = 20.0;
pub const TILT_MAX: f64 = 90.0;
const INITIAL_TILT: f64 = 45.0;
const INITIAL_ZOOM: f64 = 17.0;
// pointer px per degree
const DRAG_DIVISOR: f64 = 10.0;
// zoom levels per wheel notch
const WHEEL_STEPS_PER_LEVEL: f64 = 5.0;

pub const MODIFIER: Key = Key::Shift;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Shift,
    Control,
    Alt,
    Char(char),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputEvent {
    KeyDown(Key),
    KeyUp(Key),
    /// Screen coordinates, px.
    PointerMove { x: f64, y: f64 },
    /// Positive is wheel down (zoom out).
    Wheel { delta_y: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CameraState {
    /// deg, [0, 360)
    pub heading: f64,
    /// deg, [0, 90]
    pub tilt: f64,
    /// [5, 20]
    pub zoom: f64,
    pub scale: f64,
}

impl Default for CameraState {
    fn default() -> Self {
        Self { heading: 0.0, tilt: INITIAL_TILT, zoom: INITIAL_ZOOM, scale: scale_for_zoom(INITIAL_ZOOM) }
    }
}

/// Piecewise-linear lookup between the two integer levels bracketing `zoom`.
pub fn scale_for_zoom(zoom: f64) -> f64 {
    let z = zoom.clamp(0.0, (ZOOM_SCALE.len() - 1) as f64);
    let lower = z.floor();
    let (lo, hi) = (lower as usize, z.ceil() as usize);
    if lo == hi {
        return ZOOM_SCALE[lo] * SCALE_FACTOR;
    }
    ((ZOOM_SCALE[hi] - ZOOM_SCALE[lo]) * (z - lower) + ZOOM_SCALE[lo]) * SCALE_FACTOR
}

#[derive(Debug, Clone, Copy)]
struct Latch {
    x: f64,
    y: f64,
    heading: f64,
    tilt: f64,
}

#[derive(Debug, Default)]
pub struct CameraController {
    state: CameraState,
    pointer: (f64, f64),
    latch: Option<Latch>,
}

impl CameraController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether the camera state changed.
    pub fn handle(&mut self, event: InputEvent) -> bool {
        match event {
            InputEvent::KeyDown(k) if k == MODIFIER => {
                // auto-repeat keeps the original latch
                if self.latch.is_none() {
                    self.latch = Some(Latch {
                        x: self.pointer.0,
                        y: self.pointer.1,
                        heading: self.state.heading,
                        tilt: self.state.tilt,
                    });
                }
                false
            }
            InputEvent::KeyUp(k) if k == MODIFIER => {
                self.latch = None;
                false
            }
            InputEvent::KeyDown(_) | InputEvent::KeyUp(_) => false,
            InputEvent::PointerMove { x, y } => {
                if !x.is_finite() || !y.is_finite() {
                    return false;
                }
                self.pointer = (x, y);
                let Some(latch) = self.latch else { return false };
                let dx = (x - latch.x) / DRAG_DIVISOR;
                let dy = (latch.y - y) / DRAG_DIVISOR;
                self.state.tilt = (latch.tilt + dy).clamp(0.0, TILT_MAX);
                self.state.heading = wrap_degrees(latch.heading + dx);
                true
            }
            InputEvent::Wheel { delta_y } => {
                if self.latch.is_none() || delta_y == 0.0 || delta_y.is_nan() {
                    return false;
                }
                let zoom = self.state.zoom - delta_y.signum() / WHEEL_STEPS_PER_LEVEL;
                // stay on the 1/5 grid so repeated steps land exactly on integer levels
                let zoom = (zoom * WHEEL_STEPS_PER_LEVEL).round() / WHEEL_STEPS_PER_LEVEL;
                self.set_zoom(zoom);
                true
            }
        }
    }

    pub fn set_zoom(&mut self, zoom: f64) {
        self.state.zoom = zoom.clamp(ZOOM_MIN, ZOOM_MAX);
        self.state.scale = scale_for_zoom(self.state.zoom);
    }

    pub fn is_latched(&self) -> bool {
        self.latch.is_some()
    }

    pub fn snapshot(&self) -> CameraState {
        self.state
    }
}

fn wrap_degrees(deg: f64) -> f64 {
    let h = deg.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if h >= 360.0 {
        0.0
    } else {
        h
    }
}

/// Shared handle to the camera controller.
#[derive(Clone, Default)]
pub struct CameraHandle {
    inner: Arc<Mutex<CameraController>>,
}

impl CameraHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self, event: InputEvent) -> bool {
        self.lock().handle(event)
    }

    pub fn snapshot(&self) -> CameraState {
        self.lock().snapshot()
    }

    fn lock(&self) -> MutexGuard<'_, CameraController> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn latched_at(x: f64, y: f64) -> CameraController {
        let mut cam = CameraController::new();
        cam.handle(InputEvent::PointerMove { x, y });
        cam.handle(InputEvent::KeyDown(Key::Shift));
        cam
    }

    #[test]
    fn initial_state() {
        let s = CameraController::new().snapshot();
        assert_eq!((s.heading, s.tilt, s.zoom), (0.0, 45.0, 17.0));
        assert_eq!(s.scale, ZOOM_SCALE[17] * SCALE_FACTOR);
    }

    #[test]
    fn integer_zoom_uses_table_entry() {
        assert_eq!(scale_for_zoom(15.0), ZOOM_SCALE[15] * SCALE_FACTOR);

        let mut cam = CameraController::new();
        cam.set_zoom(15.0);
        assert_eq!(cam.snapshot().scale, ZOOM_SCALE[15] * SCALE_FACTOR);
    }

    #[test]
    fn wheel_steps_reach_integer_levels_exactly() {
        let mut cam = latched_at(0.0, 0.0);
        for _ in 0..10 {
            cam.handle(InputEvent::Wheel { delta_y: 120.0 });
        }
        let s = cam.snapshot();
        assert_eq!(s.zoom, 15.0);
        assert_eq!(s.scale, ZOOM_SCALE[15] * SCALE_FACTOR);
    }

    #[test]
    fn fractional_zoom_interpolates() {
        let mid = scale_for_zoom(15.5);
        let expected = (ZOOM_SCALE[15] + ZOOM_SCALE[16]) / 2.0 * SCALE_FACTOR;
        assert!((mid - expected).abs() < 1e-9);
    }

    #[test]
    fn drag_turns_and_tilts_relative_to_latch() {
        let mut cam = latched_at(100.0, 100.0);
        cam.handle(InputEvent::PointerMove { x: 150.0, y: 80.0 });
        let s = cam.snapshot();
        assert_eq!(s.heading, 5.0);
        assert_eq!(s.tilt, 47.0);

        // relative to the latch, not the previous move
        cam.handle(InputEvent::PointerMove { x: 50.0, y: 100.0 });
        let s = cam.snapshot();
        assert_eq!(s.heading, 355.0);
        assert_eq!(s.tilt, 45.0);
    }

    #[test]
    fn input_without_modifier_is_ignored() {
        let mut cam = CameraController::new();
        assert!(!cam.handle(InputEvent::PointerMove { x: 500.0, y: 500.0 }));
        assert!(!cam.handle(InputEvent::Wheel { delta_y: -1.0 }));
        assert!(!cam.handle(InputEvent::KeyDown(Key::Char('a'))));
        assert_eq!(cam.snapshot(), CameraState::default());
    }

    #[test]
    fn release_freezes_state() {
        let mut cam = latched_at(0.0, 0.0);
        cam.handle(InputEvent::PointerMove { x: 100.0, y: 0.0 });
        cam.handle(InputEvent::KeyUp(Key::Shift));
        let frozen = cam.snapshot();
        cam.handle(InputEvent::PointerMove { x: 900.0, y: -300.0 });
        cam.handle(InputEvent::Wheel { delta_y: 3.0 });
        assert_eq!(cam.snapshot(), frozen);
        assert!(!cam.is_latched());
    }

    #[test]
    fn zero_wheel_delta_does_nothing() {
        let mut cam = latched_at(0.0, 0.0);
        assert!(!cam.handle(InputEvent::Wheel { delta_y: 0.0 }));
        assert_eq!(cam.snapshot().zoom, 17.0);
    }

    #[test]
    fn non_finite_pointer_is_ignored() {
        let mut cam = latched_at(100.0, 100.0);
        cam.handle(InputEvent::PointerMove { x: 150.0, y: 80.0 });
        let before = cam.snapshot();
        for (x, y) in [(f64::NAN, 0.0), (0.0, f64::NAN), (f64::INFINITY, 0.0), (0.0, f64::NEG_INFINITY)] {
            assert!(!cam.handle(InputEvent::PointerMove { x, y }));
        }
        assert_eq!(cam.snapshot(), before);

        // a bad move before latching must not poison the latch point
        let mut cam = CameraController::new();
        cam.handle(InputEvent::PointerMove { x: 10.0, y: 10.0 });
        cam.handle(InputEvent::PointerMove { x: f64::NAN, y: f64::NAN });
        cam.handle(InputEvent::KeyDown(Key::Shift));
        assert!(cam.handle(InputEvent::PointerMove { x: 60.0, y: 10.0 }));
        let s = cam.snapshot();
        assert_eq!((s.heading, s.tilt), (5.0, 45.0));
    }

    #[test]
    fn random_input_stays_in_bounds() {
        let mut rng = StdRng::seed_from_u64(0x9E37_79B9_7F4A_7C15);
        let mut cam = CameraController::new();
        for _ in 0..50_000 {
            let ev = match rng.gen_range(0..5) {
                0 => InputEvent::KeyDown(Key::Shift),
                1 => InputEvent::KeyUp(Key::Shift),
                2 | 3 => InputEvent::PointerMove {
                    x: rng.gen_range(-1e5..1e5),
                    y: rng.gen_range(-1e5..1e5),
                },
                _ => InputEvent::Wheel { delta_y: rng.gen_range(-500.0..500.0) },
            };
            cam.handle(ev);
            let s = cam.snapshot();
            assert!((0.0..360.0).contains(&s.heading), "heading {}", s.heading);
            assert!((0.0..=TILT_MAX).contains(&s.tilt), "tilt {}", s.tilt);
            assert!((ZOOM_MIN..=ZOOM_MAX).contains(&s.zoom), "zoom {}", s.zoom);
            assert_eq!(s.scale, scale_for_zoom(s.zoom));
        }
    }
}
