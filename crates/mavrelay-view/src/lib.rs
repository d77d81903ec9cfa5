//! Viewer side of the relay: follows the live telemetry stream and keeps a
//! camera-synchronized pose up to date for a render target.

pub mod camera;
pub mod link;
pub mod nav;
pub mod render;
pub mod settings;

pub use camera::{CameraController, CameraHandle, CameraState, InputEvent, Key};
pub use link::{LinkError, LinkState, RelayLink};
pub use nav::{NavCache, NavHandle, NavigationState};
pub use render::{compose_pose, FramePose, RenderLoop, RenderTarget};
pub use settings::{
    deobfuscate_key, validate_port_input, ConfigClient, HttpConfigClient, PortEditor, PortInputError,
    SettingsError, SettingsState,
};
