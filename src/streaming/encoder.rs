/*!
 * Camera/Encoder Seam
 *
 * The platform's camera + encoder + RTMP muxer, seen from the controller.
 * Calls are synchronous and fast; the controller never issues two of them
 * concurrently.
 */

use std::sync::Arc;

use image::RgbaImage;

use crate::model::{AudioProfile, StreamVideoProfile};
use crate::overlay::OverlayPosition;

/// Camera, encoder and muxer handle owned by the controller.
pub trait StreamEncoder: Send {
    /// Rendering surface size, `None` until the surface is laid out.
    fn surface_size(&self) -> Option<(u32, u32)>;

    fn start_preview(&mut self) -> anyhow::Result<()>;

    fn stop_preview(&mut self);

    fn is_on_preview(&self) -> bool;

    /// Configures the video encoder. Returns false when the profile is rejected.
    fn prepare_video(&mut self, profile: &StreamVideoProfile) -> bool;

    /// Configures the audio encoder. Returns false when the profile is rejected.
    fn prepare_audio(&mut self, audio: &AudioProfile) -> bool;

    /// Drops any partially applied encoder configuration.
    fn reset_configuration(&mut self);

    fn start_stream(&mut self, url: &str);

    fn stop_stream(&mut self);

    fn is_streaming(&self) -> bool;

    /// Changes the video bitrate without interrupting the stream.
    fn set_video_bitrate_on_fly(&mut self, bitrate_bps: u32);

    /// Installs the compositing filter with an initial image, scaled for `frame`.
    fn attach_overlay(&mut self, image: Arc<RgbaImage>, frame: (u32, u32), position: OverlayPosition);

    /// Swaps the filter's image in place, leaving the media pipeline running.
    fn update_overlay(&mut self, image: Arc<RgbaImage>);

    fn detach_overlay(&mut self);
}
