/*!
 * Scoreboard Overlay
 *
 * Renders the scoreboard bitmap composited into the outgoing video and keeps
 * redraws to score changes only.
 */

pub mod glyphs;
pub mod renderer;

pub use renderer::{OverlayLayout, Palette, ScoreOverlayRenderer};

use std::sync::Arc;

use image::RgbaImage;
use tracing::debug;

use crate::model::ScoreState;

/// Where the compositing filter anchors the overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayPosition {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

/// Hash of the four score integers a bitmap was rendered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScoreKey([u8; 32]);

impl ScoreKey {
    pub fn of(score: &ScoreState) -> Self {
        let mut hasher = blake3::Hasher::new();
        for value in score.as_array() {
            hasher.update(&value.to_le_bytes());
        }
        Self(*hasher.finalize().as_bytes())
    }
}

/// A rendered scoreboard and the key it was rendered for.
#[derive(Debug, Clone)]
pub struct OverlayBitmap {
    pub image: Arc<RgbaImage>,
    pub frame: (u32, u32),
    pub key: ScoreKey,
}

/// Holds the last rendered bitmap and decides when a redraw is needed.
///
/// A redraw happens when the score key differs from the last render. Frame
/// size changes alone do not trigger one; callers that switch resolution use
/// [`OverlayCache::render_now`].
#[derive(Debug, Default)]
pub struct OverlayCache {
    current: Option<OverlayBitmap>,
    renders: u64,
    skips: u64,
}

impl OverlayCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Renders only if `score` differs from the last rendered score.
    ///
    /// Returns the new image when one was produced; the previous bitmap is
    /// released once the caller drops its reference.
    pub fn update(
        &mut self,
        renderer: &mut ScoreOverlayRenderer,
        frame: (u32, u32),
        score: &ScoreState,
    ) -> Option<Arc<RgbaImage>> {
        let key = ScoreKey::of(score);
        if self.current.as_ref().is_some_and(|bitmap| bitmap.key == key) {
            self.skips += 1;
            debug!("[Overlay] Score unchanged, skipping redraw");
            return None;
        }
        Some(self.render_now(renderer, frame, score))
    }

    /// Renders unconditionally and replaces the cached bitmap.
    pub fn render_now(
        &mut self,
        renderer: &mut ScoreOverlayRenderer,
        frame: (u32, u32),
        score: &ScoreState,
    ) -> Arc<RgbaImage> {
        let image = Arc::new(renderer.render(frame.0, frame.1, score));
        self.current = Some(OverlayBitmap {
            image: image.clone(),
            frame,
            key: ScoreKey::of(score),
        });
        self.renders += 1;
        image
    }

    pub fn current(&self) -> Option<&OverlayBitmap> {
        self.current.as_ref()
    }

    /// Drops the cached bitmap so the next update always renders.
    pub fn invalidate(&mut self) {
        self.current = None;
    }

    pub fn renders(&self) -> u64 {
        self.renders
    }

    pub fn skips(&self) -> u64 {
        self.skips
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redraws_only_when_score_changes() {
        let mut renderer = ScoreOverlayRenderer::new("A", "B");
        let mut cache = OverlayCache::new();
        let frame = (1280, 720);

        let sequence = [
            ScoreState::new(0, 0, 0, 0),
            ScoreState::new(0, 0, 0, 0),
            ScoreState::new(1, 0, 0, 0),
            ScoreState::new(1, 0, 0, 0),
            ScoreState::new(1, 0, 0, 1),
            ScoreState::new(0, 0, 0, 1),
        ];
        let mut previous: Option<ScoreState> = None;
        for score in sequence {
            let redrawn = cache.update(&mut renderer, frame, &score).is_some();
            assert_eq!(redrawn, previous != Some(score), "score {:?}", score);
            previous = Some(score);
        }
        assert_eq!(cache.renders(), 4);
        assert_eq!(cache.skips(), 2);
    }

    #[test]
    fn identical_score_returns_no_new_instance() {
        let mut renderer = ScoreOverlayRenderer::new("A", "B");
        let mut cache = OverlayCache::new();
        let score = ScoreState::new(10, 8, 2, 0);

        let first = cache.update(&mut renderer, (854, 480), &score).unwrap();
        assert!(cache.update(&mut renderer, (854, 480), &score).is_none());
        assert!(Arc::ptr_eq(&first, &cache.current().unwrap().image));
    }

    #[test]
    fn replaced_bitmap_is_released() {
        let mut renderer = ScoreOverlayRenderer::new("A", "B");
        let mut cache = OverlayCache::new();

        let first = cache.update(&mut renderer, (1280, 720), &ScoreState::new(1, 0, 0, 0)).unwrap();
        let weak = Arc::downgrade(&first);
        drop(first);
        assert!(weak.upgrade().is_some());

        cache.update(&mut renderer, (1280, 720), &ScoreState::new(2, 0, 0, 0));
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn invalidate_forces_redraw() {
        let mut renderer = ScoreOverlayRenderer::new("A", "B");
        let mut cache = OverlayCache::new();
        let score = ScoreState::new(1, 1, 0, 0);

        cache.update(&mut renderer, (1280, 720), &score);
        cache.invalidate();
        assert!(cache.update(&mut renderer, (854, 480), &score).is_some());
        assert_eq!(cache.current().unwrap().frame, (854, 480));
    }

    #[test]
    fn score_key_distinguishes_positions() {
        assert_ne!(
            ScoreKey::of(&ScoreState::new(1, 0, 0, 0)),
            ScoreKey::of(&ScoreState::new(0, 1, 0, 0))
        );
        assert_eq!(
            ScoreKey::of(&ScoreState::new(3, 4, 1, 0)),
            ScoreKey::of(&ScoreState::new(3, 4, 1, 0))
        );
    }
}
