use std::sync::{Arc, Mutex, MutexGuard};

use mavrelay_proto::{codec, Envelope, MessageType};
use serde::Serialize;
use tracing::{debug, info};

// SIMSTATE lat/lng are degE7
const DEG_E7: f64 = 1e7;
// GLOBAL_POSITION_INT relativeAlt is mm
const MM_PER_M: f64 = 1e3;
// GLOBAL_POSITION_INT hdg is cdeg
const CDEG_PER_PI: f64 = 18_000.0;

/// Latest known vehicle position, in map units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct NavigationState {
    /// deg
    pub lat: f64,
    /// deg
    pub lng: f64,
    /// m above home
    pub altitude: f64,
    /// rad
    pub heading: f64,
}

/// Single-record cache overwritten by every accepted envelope. There is no
/// history: a reader always sees the most recent values.
#[derive(Debug, Default)]
pub struct NavCache {
    state: NavigationState,
    has_data: bool,
    stale: bool,
    applied: u64,
    ignored: u64,
}

impl NavCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether the envelope changed the state.
    pub fn apply_envelope(&mut self, env: &Envelope) -> bool {
        let p = &env.payload;
        match env.kind {
            MessageType::SimState => {
                let (Some(lat), Some(lng)) = (p.number("lat"), p.number("lng")) else {
                    return self.ignore(env, "missing lat/lng");
                };
                self.state.lat = lat / DEG_E7;
                self.state.lng = lng / DEG_E7;
                if !self.has_data {
                    self.has_data = true;
                    info!("first position: {:.7},{:.7}", self.state.lat, self.state.lng);
                }
            }
            MessageType::GlobalPositionInt => {
                let (Some(rel_alt), Some(hdg)) = (p.number("relativeAlt"), p.number("hdg")) else {
                    return self.ignore(env, "missing relativeAlt/hdg");
                };
                self.state.altitude = rel_alt / MM_PER_M;
                self.state.heading = hdg * std::f64::consts::PI / CDEG_PER_PI;
            }
            _ => return self.ignore(env, "not a navigation message"),
        }
        self.applied += 1;
        true
    }

    /// Parses one relay frame and applies it. Unparseable frames are dropped.
    pub fn apply_text(&mut self, text: &str) -> bool {
        match codec::parse(text) {
            Ok(env) => self.apply_envelope(&env),
            Err(e) => {
                debug!("nav: dropping frame: {}", e);
                self.ignored += 1;
                false
            }
        }
    }

    fn ignore(&mut self, env: &Envelope, why: &str) -> bool {
        debug!("nav: ignoring {}: {}", env.kind, why);
        self.ignored += 1;
        false
    }

    pub fn snapshot(&self) -> NavigationState {
        self.state
    }

    /// True from the first applied position on. Never resets.
    pub fn has_data(&self) -> bool {
        self.has_data
    }

    /// Set while the relay link is known to be closed; the state is then
    /// the last thing received, not live.
    pub fn set_stale(&mut self, stale: bool) {
        self.stale = stale;
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Whether the state is fit to draw: real data, and a live link.
    pub fn renderable(&self) -> bool {
        self.has_data && !self.stale
    }

    pub fn counts(&self) -> (u64, u64) {
        (self.applied, self.ignored)
    }
}

/// Shared handle to the navigation cache.
#[derive(Clone, Default)]
pub struct NavHandle {
    inner: Arc<Mutex<NavCache>>,
}

impl NavHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply_envelope(&self, env: &Envelope) -> bool {
        self.lock().apply_envelope(env)
    }

    pub fn apply_text(&self, text: &str) -> bool {
        self.lock().apply_text(text)
    }

    pub fn snapshot(&self) -> NavigationState {
        self.lock().snapshot()
    }

    pub fn has_data(&self) -> bool {
        self.lock().has_data()
    }

    pub fn set_stale(&self, stale: bool) {
        self.lock().set_stale(stale)
    }

    pub fn renderable(&self) -> bool {
        self.lock().renderable()
    }

    /// (applied, ignored) envelope counts.
    pub fn counts(&self) -> (u64, u64) {
        self.lock().counts()
    }

    fn lock(&self) -> MutexGuard<'_, NavCache> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
