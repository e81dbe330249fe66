//! Platform capabilities consumed by a streaming session.
//!
//! Brightness, wake lock, permissions, orientation and connectivity are
//! provided by the host application through narrow traits. Unavailable or
//! denied capabilities degrade gracefully; none of them is fatal.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::network::{ConnectivityEvent, ConnectivityProbe};
use crate::notifications::Notifier;

/// Screen brightness applied while live, near minimum to save battery.
pub const DEFAULT_LIVE_BRIGHTNESS: f32 = 0.02;

/// Runtime permissions a stream needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    Camera,
    RecordAudio,
}

pub const STREAM_PERMISSIONS: [Permission; 2] = [Permission::Camera, Permission::RecordAudio];

/// Window brightness override.
pub trait ScreenBrightness: Send + Sync {
    /// Current override, `None` when the system brightness applies.
    fn current_override(&self) -> Option<f32>;
    fn set_override(&self, value: Option<f32>);
}

pub trait WakeLock: Send + Sync {
    /// Returns false when the lock could not be taken.
    fn acquire(&self) -> bool;
    fn release(&self);
}

pub trait PermissionGate: Send + Sync {
    fn is_granted(&self, permission: Permission) -> bool;
    /// Sends the user to the system settings page for this app.
    fn open_app_settings(&self);
}

pub trait OrientationLock: Send + Sync {
    fn lock_landscape(&self);
    fn unlock(&self);
}

/// Everything a session consumes from the host platform.
#[derive(Clone)]
pub struct PlatformServices {
    pub brightness: Arc<dyn ScreenBrightness>,
    pub wake_lock: Arc<dyn WakeLock>,
    pub permissions: Arc<dyn PermissionGate>,
    pub orientation: Arc<dyn OrientationLock>,
    pub connectivity: Arc<dyn ConnectivityProbe>,
    /// Platform-side sender; sessions subscribe and drop the receiver to unregister.
    pub connectivity_events: broadcast::Sender<ConnectivityEvent>,
    pub notifier: Arc<dyn Notifier>,
}

impl PlatformServices {
    pub fn has_stream_permissions(&self) -> bool {
        STREAM_PERMISSIONS
            .iter()
            .all(|permission| self.permissions.is_granted(*permission))
    }

    pub fn subscribe_connectivity(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.connectivity_events.subscribe()
    }
}

/// Brightness, wake-lock and orientation held by one session.
///
/// Release runs on every exit path: explicitly through [`release_all`] and
/// again on drop, and both are idempotent.
///
/// [`release_all`]: SessionResources::release_all
pub struct SessionResources {
    brightness: Arc<dyn ScreenBrightness>,
    wake_lock: Arc<dyn WakeLock>,
    orientation: Arc<dyn OrientationLock>,
    live_brightness: f32,
    /// Override in place before the session dimmed the screen.
    saved_brightness: Option<Option<f32>>,
    wake_lock_held: bool,
    orientation_locked: bool,
}

impl SessionResources {
    /// Locks landscape orientation for the lifetime of the session.
    pub fn acquire(services: &PlatformServices, live_brightness: f32) -> Self {
        services.orientation.lock_landscape();
        debug!("[Resources] Landscape orientation locked");

        Self {
            brightness: services.brightness.clone(),
            wake_lock: services.wake_lock.clone(),
            orientation: services.orientation.clone(),
            live_brightness,
            saved_brightness: None,
            wake_lock_held: false,
            orientation_locked: true,
        }
    }

    /// Dims the screen and keeps the device awake while live.
    pub fn enter_live(&mut self) {
        if self.saved_brightness.is_none() {
            self.saved_brightness = Some(self.brightness.current_override());
        }
        self.brightness.set_override(Some(self.live_brightness));

        if !self.wake_lock_held {
            self.wake_lock_held = self.wake_lock.acquire();
            if !self.wake_lock_held {
                debug!("[Resources] Wake lock unavailable, relying on keep-screen-on");
            }
        }
        info!("[Resources] Live: brightness {:.2}, wake lock {}", self.live_brightness, self.wake_lock_held);
    }

    /// Restores brightness and releases the wake lock.
    pub fn exit_live(&mut self) {
        if let Some(previous) = self.saved_brightness.take() {
            self.brightness.set_override(previous);
            debug!("[Resources] Brightness restored to {:?}", previous);
        }
        if self.wake_lock_held {
            self.wake_lock.release();
            self.wake_lock_held = false;
            debug!("[Resources] Wake lock released");
        }
    }

    /// Releases everything the session holds.
    pub fn release_all(&mut self) {
        self.exit_live();
        if self.orientation_locked {
            self.orientation.unlock();
            self.orientation_locked = false;
            debug!("[Resources] Orientation unlocked");
        }
    }

    pub fn is_dimmed(&self) -> bool {
        self.saved_brightness.is_some()
    }

    pub fn wake_lock_held(&self) -> bool {
        self.wake_lock_held
    }
}

impl Drop for SessionResources {
    fn drop(&mut self) {
        self.release_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakePlatform;

    #[test]
    fn live_dims_and_restores_previous_override() {
        let platform = FakePlatform::new();
        platform.set_brightness(Some(0.7));
        let mut resources = SessionResources::acquire(&platform.services(), DEFAULT_LIVE_BRIGHTNESS);

        resources.enter_live();
        assert_eq!(platform.brightness(), Some(DEFAULT_LIVE_BRIGHTNESS));
        assert!(platform.wake_lock_held());

        resources.exit_live();
        assert_eq!(platform.brightness(), Some(0.7));
        assert!(!platform.wake_lock_held());
    }

    #[test]
    fn repeated_enter_keeps_original_brightness() {
        let platform = FakePlatform::new();
        let mut resources = SessionResources::acquire(&platform.services(), 0.05);

        resources.enter_live();
        resources.enter_live();
        resources.exit_live();
        assert_eq!(platform.brightness(), None);
        assert_eq!(platform.wake_lock_acquisitions(), 1);
    }

    #[test]
    fn drop_releases_everything() {
        let platform = FakePlatform::new();
        {
            let mut resources = SessionResources::acquire(&platform.services(), 0.02);
            assert!(platform.orientation_locked());
            resources.enter_live();
        }
        assert!(!platform.orientation_locked());
        assert!(!platform.wake_lock_held());
        assert_eq!(platform.brightness(), None);
    }

    #[test]
    fn missing_wake_lock_is_not_fatal() {
        let platform = FakePlatform::new();
        platform.deny_wake_lock();
        let mut resources = SessionResources::acquire(&platform.services(), 0.02);

        resources.enter_live();
        assert!(!resources.wake_lock_held());
        assert!(resources.is_dimmed());
        resources.release_all();
        assert!(!resources.is_dimmed());
    }

    #[test]
    fn permissions_require_camera_and_microphone() {
        let platform = FakePlatform::new();
        assert!(platform.services().has_stream_permissions());
        platform.deny_permission(Permission::RecordAudio);
        assert!(!platform.services().has_stream_permissions());
    }
}
