//! In-memory platform and encoder fakes shared by unit tests.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use image::RgbaImage;
use tokio::sync::broadcast;

use crate::model::{AudioProfile, StreamVideoProfile};
use crate::network::{ConnectivityEvent, ConnectivityProbe, NetworkCapabilities, TransportKind};
use crate::notifications::{Notice, Notifier};
use crate::overlay::OverlayPosition;
use crate::platform::{
    OrientationLock, Permission, PermissionGate, PlatformServices, ScreenBrightness, WakeLock,
};
use crate::streaming::StreamEncoder;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
struct PlatformState {
    brightness: Option<f32>,
    wake_lock_held: bool,
    wake_lock_denied: bool,
    wake_lock_acquisitions: usize,
    orientation_locked: bool,
    denied: HashSet<Permission>,
    settings_opened: usize,
    capabilities: Option<NetworkCapabilities>,
    notices: Vec<Notice>,
}

#[derive(Debug, Default)]
struct FakeDevice {
    state: Mutex<PlatformState>,
}

impl ScreenBrightness for FakeDevice {
    fn current_override(&self) -> Option<f32> {
        lock(&self.state).brightness
    }

    fn set_override(&self, value: Option<f32>) {
        lock(&self.state).brightness = value;
    }
}

impl WakeLock for FakeDevice {
    fn acquire(&self) -> bool {
        let mut state = lock(&self.state);
        if state.wake_lock_denied {
            return false;
        }
        state.wake_lock_held = true;
        state.wake_lock_acquisitions += 1;
        true
    }

    fn release(&self) {
        lock(&self.state).wake_lock_held = false;
    }
}

impl PermissionGate for FakeDevice {
    fn is_granted(&self, permission: Permission) -> bool {
        !lock(&self.state).denied.contains(&permission)
    }

    fn open_app_settings(&self) {
        lock(&self.state).settings_opened += 1;
    }
}

impl OrientationLock for FakeDevice {
    fn lock_landscape(&self) {
        lock(&self.state).orientation_locked = true;
    }

    fn unlock(&self) {
        lock(&self.state).orientation_locked = false;
    }
}

impl ConnectivityProbe for FakeDevice {
    fn active_capabilities(&self) -> Option<NetworkCapabilities> {
        lock(&self.state).capabilities.clone()
    }
}

impl Notifier for FakeDevice {
    fn notify(&self, notice: Notice) {
        lock(&self.state).notices.push(notice);
    }
}

/// Fake host platform. Starts on Wi-Fi with every permission granted.
pub struct FakePlatform {
    device: Arc<FakeDevice>,
    events: broadcast::Sender<ConnectivityEvent>,
}

impl FakePlatform {
    pub fn new() -> Self {
        let device = Arc::new(FakeDevice::default());
        lock(&device.state).capabilities = Some(NetworkCapabilities::with_transport(TransportKind::Wifi));
        let (events, _) = broadcast::channel(16);
        Self { device, events }
    }

    pub fn services(&self) -> PlatformServices {
        PlatformServices {
            brightness: self.device.clone(),
            wake_lock: self.device.clone(),
            permissions: self.device.clone(),
            orientation: self.device.clone(),
            connectivity: self.device.clone(),
            connectivity_events: self.events.clone(),
            notifier: self.device.clone(),
        }
    }

    pub fn set_brightness(&self, value: Option<f32>) {
        lock(&self.device.state).brightness = value;
    }

    pub fn brightness(&self) -> Option<f32> {
        lock(&self.device.state).brightness
    }

    pub fn wake_lock_held(&self) -> bool {
        lock(&self.device.state).wake_lock_held
    }

    pub fn wake_lock_acquisitions(&self) -> usize {
        lock(&self.device.state).wake_lock_acquisitions
    }

    pub fn deny_wake_lock(&self) {
        lock(&self.device.state).wake_lock_denied = true;
    }

    pub fn orientation_locked(&self) -> bool {
        lock(&self.device.state).orientation_locked
    }

    pub fn deny_permission(&self, permission: Permission) {
        lock(&self.device.state).denied.insert(permission);
    }

    pub fn settings_opened(&self) -> usize {
        lock(&self.device.state).settings_opened
    }

    /// Changes what the connectivity probe reports, without emitting an event.
    pub fn set_network(&self, capabilities: Option<NetworkCapabilities>) {
        lock(&self.device.state).capabilities = capabilities;
    }

    /// Changes the active network and broadcasts the change.
    pub fn switch_network(&self, capabilities: Option<NetworkCapabilities>) {
        self.set_network(capabilities.clone());
        let event = match capabilities {
            Some(caps) => ConnectivityEvent::CapabilitiesChanged(caps),
            None => ConnectivityEvent::Lost,
        };
        let _ = self.events.send(event);
    }

    pub fn connectivity_subscribers(&self) -> usize {
        self.events.receiver_count()
    }

    pub fn notices(&self) -> Vec<Notice> {
        lock(&self.device.state).notices.clone()
    }

    pub fn notice_messages(&self) -> Vec<String> {
        self.notices().into_iter().map(|notice| notice.message).collect()
    }
}

/// One call observed by [`FakeEncoder`].
#[derive(Debug, Clone, PartialEq)]
pub enum EncoderCall {
    StartPreview,
    StopPreview,
    PrepareVideo(StreamVideoProfile),
    PrepareAudio(AudioProfile),
    ResetConfiguration,
    StartStream(String),
    StopStream,
    SetBitrate(u32),
    AttachOverlay { frame: (u32, u32), position: OverlayPosition },
    UpdateOverlay,
    DetachOverlay,
}

#[derive(Debug, Default)]
pub struct EncoderState {
    pub calls: Vec<EncoderCall>,
    pub surface: Option<(u32, u32)>,
    pub reject_video: bool,
    /// Video configurations refused even when `reject_video` is off.
    pub rejected_profiles: Vec<StreamVideoProfile>,
    pub reject_audio: bool,
    pub fail_preview: bool,
    pub on_preview: bool,
    pub streaming: bool,
    pub overlay: Option<Arc<RgbaImage>>,
}

/// Recording encoder. The probe returned by [`FakeEncoder::new`] shares state
/// with the boxed encoder after it moves into a controller.
pub struct FakeEncoder {
    state: Arc<Mutex<EncoderState>>,
}

#[derive(Clone)]
pub struct EncoderProbe {
    state: Arc<Mutex<EncoderState>>,
}

impl FakeEncoder {
    /// Encoder with a laid-out 1280x720 surface.
    pub fn new() -> (Box<dyn StreamEncoder>, EncoderProbe) {
        let state = Arc::new(Mutex::new(EncoderState {
            surface: Some((1280, 720)),
            ..EncoderState::default()
        }));
        (
            Box::new(FakeEncoder { state: state.clone() }),
            EncoderProbe { state },
        )
    }
}

impl EncoderProbe {
    pub fn state(&self) -> MutexGuard<'_, EncoderState> {
        lock(&self.state)
    }

    pub fn calls(&self) -> Vec<EncoderCall> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn count(&self, predicate: impl Fn(&EncoderCall) -> bool) -> usize {
        self.state().calls.iter().filter(|call| predicate(call)).count()
    }

    pub fn is_streaming(&self) -> bool {
        self.state().streaming
    }

    pub fn is_on_preview(&self) -> bool {
        self.state().on_preview
    }

    pub fn overlay(&self) -> Option<Arc<RgbaImage>> {
        self.state().overlay.clone()
    }
}

impl StreamEncoder for FakeEncoder {
    fn surface_size(&self) -> Option<(u32, u32)> {
        lock(&self.state).surface
    }

    fn start_preview(&mut self) -> anyhow::Result<()> {
        let mut state = lock(&self.state);
        state.calls.push(EncoderCall::StartPreview);
        if state.fail_preview {
            anyhow::bail!("camera busy");
        }
        state.on_preview = true;
        Ok(())
    }

    fn stop_preview(&mut self) {
        let mut state = lock(&self.state);
        state.calls.push(EncoderCall::StopPreview);
        state.on_preview = false;
    }

    fn is_on_preview(&self) -> bool {
        lock(&self.state).on_preview
    }

    fn prepare_video(&mut self, profile: &StreamVideoProfile) -> bool {
        let mut state = lock(&self.state);
        state.calls.push(EncoderCall::PrepareVideo(*profile));
        !state.reject_video && !state.rejected_profiles.contains(profile)
    }

    fn prepare_audio(&mut self, audio: &AudioProfile) -> bool {
        let mut state = lock(&self.state);
        state.calls.push(EncoderCall::PrepareAudio(*audio));
        !state.reject_audio
    }

    fn reset_configuration(&mut self) {
        lock(&self.state).calls.push(EncoderCall::ResetConfiguration);
    }

    fn start_stream(&mut self, url: &str) {
        let mut state = lock(&self.state);
        state.calls.push(EncoderCall::StartStream(url.to_string()));
        state.streaming = true;
    }

    fn stop_stream(&mut self) {
        let mut state = lock(&self.state);
        state.calls.push(EncoderCall::StopStream);
        state.streaming = false;
    }

    fn is_streaming(&self) -> bool {
        lock(&self.state).streaming
    }

    fn set_video_bitrate_on_fly(&mut self, bitrate_bps: u32) {
        lock(&self.state).calls.push(EncoderCall::SetBitrate(bitrate_bps));
    }

    fn attach_overlay(&mut self, image: Arc<RgbaImage>, frame: (u32, u32), position: OverlayPosition) {
        let mut state = lock(&self.state);
        state.calls.push(EncoderCall::AttachOverlay { frame, position });
        state.overlay = Some(image);
    }

    fn update_overlay(&mut self, image: Arc<RgbaImage>) {
        let mut state = lock(&self.state);
        state.calls.push(EncoderCall::UpdateOverlay);
        state.overlay = Some(image);
    }

    fn detach_overlay(&mut self) {
        let mut state = lock(&self.state);
        state.calls.push(EncoderCall::DetachOverlay);
        state.overlay = None;
    }
}
