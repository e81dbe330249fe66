/*!
 * Score Overlay Renderer
 *
 * Draws the scoreboard bitmap: a 5x2 cell grid (team name spanning three
 * columns, completed sets, current points) sized proportionally to the video
 * frame against a 1280x720 reference.
 */

use image::{Rgba, RgbaImage};
use tracing::debug;

use super::glyphs::{self, GLYPH_HEIGHT, GLYPH_WIDTH};
use crate::model::{ScoreState, Side};

/// Frame size the reference metrics below are expressed in.
pub const REFERENCE_FRAME: (u32, u32) = (1280, 720);

const REF_CELL_WIDTH: f32 = 70.0;
const REF_CELL_HEIGHT: f32 = 44.0;
const REF_PADDING: f32 = 4.0;

const GRID_COLUMNS: u32 = 5;
const GRID_ROWS: u32 = 2;
const NAME_SPAN: u32 = 3;
const SETS_COLUMN: u32 = 3;
const POINTS_COLUMN: u32 = 4;

/// Smallest glyph scale a team name may shrink to.
pub const MIN_NAME_SCALE: u32 = 1;

/// Overlay colors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    pub background: Rgba<u8>,
    pub name_text: Rgba<u8>,
    pub sets_background: Rgba<u8>,
    pub sets_text: Rgba<u8>,
    pub leader_background: Rgba<u8>,
    pub leader_text: Rgba<u8>,
    pub points_background: Rgba<u8>,
    pub points_text: Rgba<u8>,
    pub divider: Rgba<u8>,
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            background: Rgba([18, 18, 18, 220]),
            name_text: Rgba([255, 255, 255, 255]),
            sets_background: Rgba([58, 58, 58, 235]),
            sets_text: Rgba([255, 255, 255, 255]),
            leader_background: Rgba([255, 191, 0, 255]),
            leader_text: Rgba([18, 18, 18, 255]),
            points_background: Rgba([0, 191, 255, 255]),
            points_text: Rgba([255, 255, 255, 255]),
            divider: Rgba([90, 90, 90, 255]),
        }
    }
}

/// Pixel metrics for one frame size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlayLayout {
    pub cell_width: u32,
    pub cell_height: u32,
    pub padding: u32,
    /// Largest glyph scale that fits a cell's height.
    pub max_glyph_scale: u32,
}

impl OverlayLayout {
    /// Scales the reference metrics to a `width`x`height` frame.
    pub fn for_frame(width: u32, height: u32) -> Self {
        let scale = (width as f32 / REFERENCE_FRAME.0 as f32)
            .min(height as f32 / REFERENCE_FRAME.1 as f32);

        let cell_width = ((REF_CELL_WIDTH * scale).round() as u32).max(GLYPH_WIDTH + 2);
        let cell_height = ((REF_CELL_HEIGHT * scale).round() as u32).max(GLYPH_HEIGHT + 2);
        let padding = ((REF_PADDING * scale).round() as u32).max(1);
        let max_glyph_scale = (cell_height.saturating_sub(2 * padding) / GLYPH_HEIGHT).max(1);

        Self {
            cell_width,
            cell_height,
            padding,
            max_glyph_scale,
        }
    }

    pub fn bitmap_size(&self) -> (u32, u32) {
        (self.cell_width * GRID_COLUMNS, self.cell_height * GRID_ROWS)
    }

    /// Width available for a team name inside its three-column span.
    pub fn name_span_width(&self) -> u32 {
        (self.cell_width * NAME_SPAN).saturating_sub(2 * self.padding)
    }

    /// Shrinks from the maximum scale until `text` fits the name span, never
    /// going below [`MIN_NAME_SCALE`].
    pub fn fit_name_scale(&self, text: &str) -> u32 {
        let available = self.name_span_width();
        let mut scale = self.max_glyph_scale;
        while scale > MIN_NAME_SCALE && glyphs::text_width(text, scale) > available {
            scale -= 1;
        }
        scale
    }

    /// Largest scale at which `text` fits inside a single cell.
    fn fit_cell_scale(&self, text: &str) -> u32 {
        let available = self.cell_width.saturating_sub(2 * self.padding);
        let mut scale = self.max_glyph_scale;
        while scale > 1 && glyphs::text_width(text, scale) > available {
            scale -= 1;
        }
        scale
    }
}

#[derive(Debug, Clone)]
struct CachedLayout {
    frame: (u32, u32),
    layout: OverlayLayout,
    name_scales: [u32; 2],
}

/// Scoreboard bitmap renderer for one match.
///
/// Layout metrics are cached per frame size and only rebuilt when the
/// requested dimensions change; score changes never touch the cache.
#[derive(Debug, Clone)]
pub struct ScoreOverlayRenderer {
    team_a: String,
    team_b: String,
    palette: Palette,
    cached: Option<CachedLayout>,
    layout_builds: u64,
}

impl ScoreOverlayRenderer {
    pub fn new(team_a: impl Into<String>, team_b: impl Into<String>) -> Self {
        Self::with_palette(team_a, team_b, Palette::default())
    }

    pub fn with_palette(team_a: impl Into<String>, team_b: impl Into<String>, palette: Palette) -> Self {
        Self {
            team_a: team_a.into().to_uppercase(),
            team_b: team_b.into().to_uppercase(),
            palette,
            cached: None,
            layout_builds: 0,
        }
    }

    /// Number of times layout metrics were (re)computed.
    pub fn layout_builds(&self) -> u64 {
        self.layout_builds
    }

    /// Layout for the most recent frame size, if any render happened yet.
    pub fn current_layout(&self) -> Option<OverlayLayout> {
        self.cached.as_ref().map(|c| c.layout)
    }

    /// Glyph scales chosen for the two team names at the current frame size.
    pub fn name_scales(&self) -> Option<[u32; 2]> {
        self.cached.as_ref().map(|c| c.name_scales)
    }

    fn layout_for(&mut self, width: u32, height: u32) -> CachedLayout {
        let frame = if width == 0 || height == 0 {
            REFERENCE_FRAME
        } else {
            (width, height)
        };

        if let Some(cached) = &self.cached {
            if cached.frame == frame {
                return cached.clone();
            }
        }

        let layout = OverlayLayout::for_frame(frame.0, frame.1);
        let name_scales = [
            layout.fit_name_scale(&self.team_a),
            layout.fit_name_scale(&self.team_b),
        ];
        debug!(
            "[Overlay] Layout for {}x{}: cell {}x{}, name scales {:?}",
            frame.0, frame.1, layout.cell_width, layout.cell_height, name_scales
        );

        let cached = CachedLayout {
            frame,
            layout,
            name_scales,
        };
        self.cached = Some(cached.clone());
        self.layout_builds += 1;
        cached
    }

    /// Renders the scoreboard for a `width`x`height` video frame.
    pub fn render(&mut self, width: u32, height: u32, score: &ScoreState) -> RgbaImage {
        let CachedLayout {
            layout, name_scales, ..
        } = self.layout_for(width, height);
        let (bitmap_w, bitmap_h) = layout.bitmap_size();
        let palette = self.palette;
        let mut image = RgbaImage::from_pixel(bitmap_w, bitmap_h, palette.background);

        let leader = score.set_leader();
        let rows = [
            (Side::TeamA, self.team_a.as_str(), name_scales[0], score.team_a_sets_won, score.team_a_points),
            (Side::TeamB, self.team_b.as_str(), name_scales[1], score.team_b_sets_won, score.team_b_points),
        ];

        for (row, (side, name, name_scale, sets, points)) in rows.iter().enumerate() {
            let top = row as u32 * layout.cell_height;
            let cell = |column: u32| Rect {
                x: column * layout.cell_width,
                y: top,
                width: layout.cell_width,
                height: layout.cell_height,
            };

            let name_cell = Rect {
                x: 0,
                y: top,
                width: layout.cell_width * NAME_SPAN,
                height: layout.cell_height,
            };
            draw_text_left(&mut image, name, name_cell, layout.padding, *name_scale, palette.name_text);

            let (sets_bg, sets_fg) = if leader == Some(*side) {
                (palette.leader_background, palette.leader_text)
            } else {
                (palette.sets_background, palette.sets_text)
            };
            let sets_cell = cell(SETS_COLUMN);
            fill_rect(&mut image, sets_cell, sets_bg);
            let sets_text = sets.to_string();
            draw_text_centered(&mut image, &sets_text, sets_cell, layout.fit_cell_scale(&sets_text), sets_fg);

            let points_cell = cell(POINTS_COLUMN);
            fill_rect(&mut image, points_cell, palette.points_background);
            let points_text = points.to_string();
            draw_text_centered(
                &mut image,
                &points_text,
                points_cell,
                layout.fit_cell_scale(&points_text),
                palette.points_text,
            );
        }

        fill_rect(
            &mut image,
            Rect {
                x: 0,
                y: layout.cell_height.saturating_sub(1),
                width: bitmap_w,
                height: 1,
            },
            palette.divider,
        );

        image
    }
}

#[derive(Debug, Clone, Copy)]
struct Rect {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
}

fn fill_rect(image: &mut RgbaImage, rect: Rect, color: Rgba<u8>) {
    let x_end = (rect.x + rect.width).min(image.width());
    let y_end = (rect.y + rect.height).min(image.height());
    for y in rect.y..y_end {
        for x in rect.x..x_end {
            image.put_pixel(x, y, color);
        }
    }
}

fn draw_text_left(image: &mut RgbaImage, text: &str, cell: Rect, padding: u32, scale: u32, color: Rgba<u8>) {
    let y = cell.y + cell.height.saturating_sub(glyphs::text_height(scale)) / 2;
    draw_text(image, text, cell.x + padding, y, scale, color, cell);
}

fn draw_text_centered(image: &mut RgbaImage, text: &str, cell: Rect, scale: u32, color: Rgba<u8>) {
    let x = cell.x + cell.width.saturating_sub(glyphs::text_width(text, scale)) / 2;
    let y = cell.y + cell.height.saturating_sub(glyphs::text_height(scale)) / 2;
    draw_text(image, text, x, y, scale, color, cell);
}

/// Draws `text` with its top-left corner at (`x`, `y`), clipped to `clip`.
fn draw_text(image: &mut RgbaImage, text: &str, x: u32, y: u32, scale: u32, color: Rgba<u8>, clip: Rect) {
    let clip_x_end = (clip.x + clip.width).min(image.width());
    let clip_y_end = (clip.y + clip.height).min(image.height());
    let advance = (GLYPH_WIDTH + glyphs::GLYPH_SPACING) * scale;

    for (index, c) in text.chars().enumerate() {
        let origin_x = x + index as u32 * advance;
        if origin_x >= clip_x_end {
            break;
        }
        for (row, bits) in glyphs::glyph(c).iter().enumerate() {
            for column in 0..GLYPH_WIDTH {
                if bits & (1 << (GLYPH_WIDTH - 1 - column)) == 0 {
                    continue;
                }
                let px = origin_x + column * scale;
                let py = y + row as u32 * scale;
                for dy in 0..scale {
                    for dx in 0..scale {
                        let (tx, ty) = (px + dx, py + dy);
                        if tx >= clip.x && tx < clip_x_end && ty >= clip.y && ty < clip_y_end {
                            image.put_pixel(tx, ty, color);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score(a_pts: u32, b_pts: u32, a_sets: u32, b_sets: u32) -> ScoreState {
        ScoreState::new(a_pts, b_pts, a_sets, b_sets)
    }

    fn sets_cell_corner(layout: &OverlayLayout, row: u32) -> (u32, u32) {
        // Corner pixel of the sets cell: background only, never glyph ink.
        (SETS_COLUMN * layout.cell_width + 1, row * layout.cell_height + 1)
    }

    #[test]
    fn bitmap_scales_with_frame() {
        let mut renderer = ScoreOverlayRenderer::new("Lupi", "Falchi");
        let hd = renderer.render(1280, 720, &score(0, 0, 0, 0));
        assert_eq!(hd.dimensions(), (350, 88));

        let sd = renderer.render(854, 480, &score(0, 0, 0, 0));
        assert!(sd.width() < hd.width());
        assert!(sd.height() < hd.height());
    }

    #[test]
    fn layout_rebuilt_only_on_dimension_change() {
        let mut renderer = ScoreOverlayRenderer::new("Lupi", "Falchi");
        renderer.render(1280, 720, &score(0, 0, 0, 0));
        renderer.render(1280, 720, &score(1, 0, 0, 0));
        renderer.render(1280, 720, &score(1, 1, 0, 0));
        assert_eq!(renderer.layout_builds(), 1);

        renderer.render(854, 480, &score(1, 1, 0, 0));
        assert_eq!(renderer.layout_builds(), 2);
        renderer.render(854, 480, &score(2, 1, 0, 0));
        assert_eq!(renderer.layout_builds(), 2);
    }

    #[test]
    fn long_names_shrink_to_fit() {
        let mut renderer = ScoreOverlayRenderer::new("Lupi", "Polisportiva Pallavolo Grande");
        renderer.render(1280, 720, &score(0, 0, 0, 0));
        let layout = renderer.current_layout().unwrap();
        let [short, long] = renderer.name_scales().unwrap();

        assert_eq!(short, layout.max_glyph_scale);
        assert!(long < short);
        assert!(long >= MIN_NAME_SCALE);
    }

    #[test]
    fn shrink_stops_at_floor() {
        let layout = OverlayLayout::for_frame(1280, 720);
        let absurd = "X".repeat(200);
        assert_eq!(layout.fit_name_scale(&absurd), MIN_NAME_SCALE);
        assert!(glyphs::text_width("TEAM A", layout.fit_name_scale("TEAM A")) <= layout.name_span_width());
    }

    #[test]
    fn set_leader_cell_is_highlighted() {
        let palette = Palette::default();
        let mut renderer = ScoreOverlayRenderer::new("A", "B");
        let image = renderer.render(1280, 720, &score(3, 5, 2, 1));
        let layout = renderer.current_layout().unwrap();

        let (ax, ay) = sets_cell_corner(&layout, 0);
        let (bx, by) = sets_cell_corner(&layout, 1);
        assert_eq!(*image.get_pixel(ax, ay), palette.leader_background);
        assert_eq!(*image.get_pixel(bx, by), palette.sets_background);
    }

    #[test]
    fn tie_highlights_neither_side() {
        let palette = Palette::default();
        let mut renderer = ScoreOverlayRenderer::new("A", "B");
        let image = renderer.render(1280, 720, &score(3, 5, 1, 1));
        let layout = renderer.current_layout().unwrap();

        for row in 0..2 {
            let (x, y) = sets_cell_corner(&layout, row);
            assert_eq!(*image.get_pixel(x, y), palette.sets_background);
        }
    }

    #[test]
    fn zero_sized_frame_falls_back_to_reference() {
        let mut renderer = ScoreOverlayRenderer::new("A", "B");
        let image = renderer.render(0, 0, &score(0, 0, 0, 0));
        assert_eq!(image.dimensions(), OverlayLayout::for_frame(1280, 720).bitmap_size());
    }

    #[test]
    fn points_are_drawn() {
        let palette = Palette::default();
        let mut renderer = ScoreOverlayRenderer::new("A", "B");
        let image = renderer.render(1280, 720, &score(8, 0, 0, 0));
        let layout = renderer.current_layout().unwrap();

        let x0 = POINTS_COLUMN * layout.cell_width;
        let ink = (x0..x0 + layout.cell_width)
            .flat_map(|x| (0..layout.cell_height).map(move |y| (x, y)))
            .filter(|(x, y)| *image.get_pixel(*x, *y) == palette.points_text)
            .count();
        assert!(ink > 0);
    }
}
