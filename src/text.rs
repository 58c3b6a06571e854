use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use anyhow::{anyhow, Context, Result};
use fontdue::{Font, FontSettings};
use image::RgbaImage;

use crate::builtin_font;
use crate::color::Color;
use crate::raster;
use crate::schema::{TextAlignment, TextPlate, TextStyle};

/// Tried in order when the requested family is not in the fonts directory.
pub const DEFAULT_SYSTEM_FONTS: [&str; 4] = [
    "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Bold.ttf",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FontSource {
    File(PathBuf),
    Builtin,
}

#[derive(Debug)]
struct RasterGlyph {
    width: usize,
    height: usize,
    left: f32,
    top: f32,
    advance: f32,
    coverage: Vec<u8>,
}

enum Face {
    Outline {
        font: Arc<Font>,
        ascent: f32,
        line_size: f32,
        glyphs: RwLock<HashMap<char, Arc<RasterGlyph>>>,
    },
    Builtin {
        scale: u32,
    },
}

/// A font face bound to one pixel size. Never fails to draw: characters the
/// face lacks simply advance.
pub struct SizedFont {
    face: Face,
    size: f32,
    source: FontSource,
}

impl fmt::Debug for SizedFont {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SizedFont")
            .field("size", &self.size)
            .field("source", &self.source)
            .finish()
    }
}

impl SizedFont {
    pub fn builtin(size: f32) -> Self {
        Self {
            face: Face::Builtin {
                scale: builtin_font::scale_for_size(size),
            },
            size,
            source: FontSource::Builtin,
        }
    }

    fn outline(font: Arc<Font>, size: f32, path: PathBuf) -> Self {
        let (ascent, line_size) = match font.horizontal_line_metrics(size) {
            Some(metrics) => (metrics.ascent, metrics.new_line_size),
            None => (size, size),
        };
        Self {
            face: Face::Outline {
                font,
                ascent,
                line_size,
                glyphs: RwLock::new(HashMap::new()),
            },
            size,
            source: FontSource::File(path),
        }
    }

    pub fn size(&self) -> f32 {
        self.size
    }

    pub fn source(&self) -> &FontSource {
        &self.source
    }

    /// Height of one line box in pixels.
    pub fn line_box_height(&self) -> u32 {
        match &self.face {
            Face::Outline { line_size, .. } => line_size.ceil().max(1.0) as u32,
            Face::Builtin { scale } => builtin_font::GLYPH_SIZE * scale,
        }
    }

    /// Rendered width of `text` on one line; `letter_spacing` is added
    /// between consecutive glyphs. This is the advance width, not the ink
    /// extent, so it includes the last glyph's right side bearing.
    pub fn measure(&self, text: &str, letter_spacing: f32) -> u32 {
        let count = text.chars().count();
        if count == 0 {
            return 0;
        }
        let spacing = letter_spacing * (count - 1) as f32;
        let width = match &self.face {
            Face::Outline { font, .. } => {
                let mut total = 0.0f32;
                let mut previous: Option<char> = None;
                for ch in text.chars() {
                    if let Some(left) = previous {
                        total += font.horizontal_kern(left, ch, self.size).unwrap_or(0.0);
                    }
                    total += font.metrics(ch, self.size).advance_width;
                    previous = Some(ch);
                }
                total
            }
            Face::Builtin { scale } => (builtin_font::GLYPH_SIZE * scale) as f32 * count as f32,
        };
        (width + spacing).ceil().max(0.0) as u32
    }

    fn glyph(
        &self,
        font: &Font,
        cache: &RwLock<HashMap<char, Arc<RasterGlyph>>>,
        ch: char,
    ) -> Arc<RasterGlyph> {
        if let Some(glyph) = cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&ch)
        {
            return Arc::clone(glyph);
        }
        let (metrics, coverage) = font.rasterize(ch, self.size);
        let glyph = Arc::new(RasterGlyph {
            width: metrics.width,
            height: metrics.height,
            left: metrics.xmin as f32,
            top: -(metrics.ymin as f32 + metrics.height as f32),
            advance: metrics.advance_width,
            coverage,
        });
        cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(ch, Arc::clone(&glyph));
        glyph
    }

    /// Draws one line with its top-left corner at `(x, y)`.
    pub fn draw_line(
        &self,
        canvas: &mut RgbaImage,
        x: i64,
        y: i64,
        text: &str,
        color: Color,
        letter_spacing: f32,
    ) {
        match &self.face {
            Face::Outline {
                font,
                ascent,
                glyphs,
                ..
            } => {
                let baseline = y as f32 + ascent;
                let mut pen = x as f32;
                let mut previous: Option<char> = None;
                for ch in text.chars() {
                    if let Some(left) = previous {
                        pen += font.horizontal_kern(left, ch, self.size).unwrap_or(0.0);
                        pen += letter_spacing;
                    }
                    let glyph = self.glyph(font, glyphs, ch);
                    if glyph.width > 0 && glyph.height > 0 {
                        raster::blend_coverage(
                            canvas,
                            (pen + glyph.left).round() as i32,
                            (baseline + glyph.top).round() as i32,
                            glyph.width,
                            glyph.height,
                            &glyph.coverage,
                            color,
                        );
                    }
                    pen += glyph.advance;
                    previous = Some(ch);
                }
            }
            Face::Builtin { scale } => {
                let side = (builtin_font::GLYPH_SIZE * scale) as usize;
                let mut pen = x as f32;
                for (index, ch) in text.chars().enumerate() {
                    if index > 0 {
                        pen += letter_spacing;
                    }
                    if !ch.is_whitespace() {
                        let mask = builtin_font::coverage(ch, *scale);
                        raster::blend_coverage(
                            canvas,
                            pen.round() as i32,
                            y as i32,
                            side,
                            side,
                            &mask,
                            color,
                        );
                    }
                    pen += side as f32;
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FontKey {
    family: String,
    size: u32,
    weight: u32,
}

/// Resolved fonts keyed by `(family, size, weight)`. Lookups that lose a race
/// may load the same face twice; the last insert wins.
pub struct FontCache {
    fonts_dir: PathBuf,
    system_fonts: Vec<PathBuf>,
    faces: RwLock<HashMap<PathBuf, Arc<Font>>>,
    sized: RwLock<HashMap<FontKey, Arc<SizedFont>>>,
}

impl fmt::Debug for FontCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FontCache")
            .field("fonts_dir", &self.fonts_dir)
            .field("system_fonts", &self.system_fonts)
            .field("cached", &self.len())
            .finish()
    }
}

impl FontCache {
    pub fn new(fonts_dir: impl Into<PathBuf>, system_fonts: Vec<PathBuf>) -> Self {
        Self {
            fonts_dir: fonts_dir.into(),
            system_fonts,
            faces: RwLock::new(HashMap::new()),
            sized: RwLock::new(HashMap::new()),
        }
    }

    /// Resolves every family to the builtin bitmap font.
    pub fn builtin_only() -> Self {
        Self::new(PathBuf::new(), Vec::new())
    }

    pub fn len(&self) -> usize {
        self.sized
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Family file, then system fonts, then the builtin bitmap font.
    pub fn resolve(&self, family: &str, size: u32, weight: u32) -> Arc<SizedFont> {
        let key = FontKey {
            family: family.to_owned(),
            size,
            weight,
        };
        if let Some(font) = self
            .sized
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Arc::clone(font);
        }

        let sized = Arc::new(self.load(family, size as f32, weight));
        self.sized
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, Arc::clone(&sized));
        sized
    }

    fn family_candidates(&self, family: &str, weight: u32) -> Vec<PathBuf> {
        if family.trim().is_empty() || self.fonts_dir.as_os_str().is_empty() {
            return Vec::new();
        }
        vec![
            self.fonts_dir.join(format!("{family}-{weight}.ttf")),
            self.fonts_dir.join(format!("{family}.ttf")),
            self.fonts_dir.join(format!("{family}.otf")),
        ]
    }

    fn load(&self, family: &str, size: f32, weight: u32) -> SizedFont {
        let candidates = self
            .family_candidates(family, weight)
            .into_iter()
            .chain(self.system_fonts.iter().cloned());
        for path in candidates {
            if !path.is_file() {
                continue;
            }
            match self.face(&path) {
                Ok(font) => {
                    log::debug!("font '{}' {}px -> {}", family, size, path.display());
                    return SizedFont::outline(font, size, path);
                }
                Err(error) => log::warn!("skipping font {}: {error:#}", path.display()),
            }
        }
        log::warn!("no usable font for '{family}', using builtin bitmap font");
        SizedFont::builtin(size)
    }

    fn face(&self, path: &Path) -> Result<Arc<Font>> {
        if let Some(font) = self
            .faces
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
        {
            return Ok(Arc::clone(font));
        }
        let font = Arc::new(load_font_file(path)?);
        self.faces
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_path_buf(), Arc::clone(&font));
        Ok(font)
    }
}

pub fn load_font_file(path: &Path) -> Result<Font> {
    let bytes =
        fs::read(path).with_context(|| format!("failed to read font {}", path.display()))?;
    Font::from_bytes(bytes, FontSettings::default())
        .map_err(|error| anyhow!("failed to parse font {}: {error}", path.display()))
}

/// Greedy whitespace word wrap. A word wider than `max_width` keeps a line to
/// itself rather than being split.
pub fn wrap(text: &str, font: &SizedFont, max_width: u32, letter_spacing: f32) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if current.is_empty() {
            current.push_str(word);
            continue;
        }
        let candidate = format!("{current} {word}");
        if font.measure(&candidate, letter_spacing) <= max_width {
            current = candidate;
        } else {
            lines.push(std::mem::replace(&mut current, word.to_owned()));
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

fn aligned_x(anchor_x: i64, width: u32, alignment: TextAlignment) -> i64 {
    match alignment {
        TextAlignment::Left => anchor_x,
        TextAlignment::Center => anchor_x - i64::from(width) / 2,
        TextAlignment::Right => anchor_x - i64::from(width),
    }
}

/// Draws `text` with its first line's top edge at `anchor_y`. Horizontal
/// placement follows `style.alignment` relative to `anchor_x`. Without
/// `max_width` the text is one unwrapped line.
pub fn draw_text(
    canvas: &mut RgbaImage,
    text: &str,
    anchor: (i64, i64),
    style: &TextStyle,
    font: &SizedFont,
    max_width: Option<u32>,
) -> Result<()> {
    let (anchor_x, anchor_y) = anchor;
    let spacing = style.letter_spacing;

    if let Some(plate) = style.background.as_ref().filter(|plate| plate.enabled) {
        let width = font.measure(text, spacing);
        draw_plate(
            canvas,
            plate,
            aligned_x(anchor_x, width, style.alignment),
            anchor_y,
            width,
            font.line_box_height(),
        )?;
    }

    let lines = match max_width {
        Some(max_width) => wrap(text, font, max_width, spacing),
        None => vec![text.to_owned()],
    };
    let advance = (style.font_size as f32 * style.line_height).floor().max(1.0) as i64;
    let color = style.color.with_alpha(255);
    for (index, line) in lines.iter().enumerate() {
        let width = font.measure(line, spacing);
        let x = aligned_x(anchor_x, width, style.alignment);
        let y = anchor_y + advance * index as i64;
        font.draw_line(canvas, x, y, line, color, spacing);
    }
    Ok(())
}

fn draw_plate(
    canvas: &mut RgbaImage,
    plate: &TextPlate,
    x: i64,
    y: i64,
    width: u32,
    height: u32,
) -> Result<()> {
    let padding = plate.padding;
    let plate_width = width + padding * 2;
    let plate_height = height + padding * 2;
    if plate_width == 0 || plate_height == 0 {
        return Ok(());
    }
    let opacity = plate.opacity.clamp(0.0, 1.0);
    let alpha = (f32::from(plate.color.a) * opacity).round() as u8;
    let layer = raster::rounded_rect_layer(
        plate_width,
        plate_height,
        plate.border_radius as f32,
        plate.color.with_alpha(alpha),
    )?;
    raster::overlay_at(
        canvas,
        &layer,
        x - i64::from(padding),
        y - i64::from(padding),
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn style(size: u32, alignment: TextAlignment) -> TextStyle {
        TextStyle {
            font_size: size,
            alignment,
            color: Color::rgb(200, 0, 0),
            ..TextStyle::default()
        }
    }

    fn red_columns(canvas: &RgbaImage) -> (u32, u32) {
        let xs = canvas
            .enumerate_pixels()
            .filter(|(_, _, pixel)| pixel.0[0] == 200 && pixel.0[1] == 0)
            .map(|(x, _, _)| x)
            .collect::<Vec<_>>();
        (
            xs.iter().copied().min().unwrap_or(0),
            xs.iter().copied().max().unwrap_or(0),
        )
    }

    #[test]
    fn builtin_measure_includes_letter_spacing() {
        let font = SizedFont::builtin(16.0);
        assert_eq!(font.measure("ab", 0.0), 32);
        assert_eq!(font.measure("ab", 4.0), 36);
        assert_eq!(font.measure("", 4.0), 0);
        assert_eq!(font.line_box_height(), 16);
    }

    #[test]
    fn wrap_is_greedy_and_keeps_long_words() {
        let font = SizedFont::builtin(16.0);
        assert_eq!(wrap("aa bb cc", &font, 80, 0.0), vec!["aa bb", "cc"]);
        assert_eq!(
            wrap("a extraordinarily b", &font, 48, 0.0),
            vec!["a", "extraordinarily", "b"]
        );
        assert!(wrap("   ", &font, 100, 0.0).is_empty());
    }

    #[test]
    fn wrap_invariant_and_idempotence() {
        let font = SizedFont::builtin(8.0);
        let text = "Track every habit with calm streaks and gentle reminders supercalifragilistic";
        for max_width in [40, 96, 160, 400] {
            let lines = wrap(text, &font, max_width, 1.0);
            for line in &lines {
                let single_word = !line.contains(' ');
                assert!(single_word || font.measure(line, 1.0) <= max_width, "{line}");
            }
            let rewrapped = wrap(&lines.join(" "), &font, max_width, 1.0);
            assert_eq!(rewrapped, lines);
        }
    }

    #[test]
    fn alignment_moves_lines_around_anchor() {
        let font = SizedFont::builtin(8.0);
        for (alignment, expected_left) in [
            (TextAlignment::Left, 50),
            (TextAlignment::Center, 46),
            (TextAlignment::Right, 42),
        ] {
            let mut canvas = raster::solid(100, 20, Color::WHITE);
            draw_text(&mut canvas, "H", (50, 4), &style(8, alignment), &font, None).unwrap();
            // 'H' rows are 0x33: columns 0, 1, 4, 5
            let (left, right) = red_columns(&canvas);
            assert_eq!(left, expected_left);
            assert_eq!(right, expected_left + 5);
        }
    }

    #[test]
    fn wrapped_lines_advance_by_line_height() {
        let font = SizedFont::builtin(8.0);
        let mut canvas = raster::solid(40, 60, Color::WHITE);
        let mut text_style = style(8, TextAlignment::Left);
        text_style.line_height = 2.0;
        draw_text(&mut canvas, "H H", (0, 0), &text_style, &font, Some(10)).unwrap();
        assert_eq!(canvas.get_pixel(0, 0).0, [200, 0, 0, 255]);
        assert_eq!(canvas.get_pixel(0, 16).0, [200, 0, 0, 255]);
        assert_eq!(canvas.get_pixel(0, 8).0, [255, 255, 255, 255]);
    }

    #[test]
    fn text_color_is_drawn_opaque() {
        let font = SizedFont::builtin(8.0);
        let mut canvas = raster::solid(20, 10, Color::WHITE);
        let mut text_style = style(8, TextAlignment::Left);
        text_style.color = Color::rgba(200, 0, 0, 10);
        draw_text(&mut canvas, "H", (0, 0), &text_style, &font, None).unwrap();
        assert_eq!(canvas.get_pixel(0, 0).0, [200, 0, 0, 255]);
    }

    #[test]
    fn plate_is_drawn_beneath_text() {
        let font = SizedFont::builtin(8.0);
        let mut canvas = raster::solid(60, 30, Color::WHITE);
        let mut text_style = style(8, TextAlignment::Left);
        text_style.background = Some(TextPlate {
            enabled: true,
            color: Color::rgb(0, 0, 255),
            padding: 4,
            border_radius: 0,
            opacity: 1.0,
        });
        draw_text(&mut canvas, "H", (10, 10), &text_style, &font, None).unwrap();
        assert_eq!(canvas.get_pixel(7, 7).0, [0, 0, 255, 255]);
        assert_eq!(canvas.get_pixel(10, 10).0, [200, 0, 0, 255]);
        assert_eq!(canvas.get_pixel(12, 10).0, [0, 0, 255, 255]);
        assert_eq!(canvas.get_pixel(3, 3).0, [255, 255, 255, 255]);

        let mut disabled = raster::solid(60, 30, Color::WHITE);
        if let Some(plate) = text_style.background.as_mut() {
            plate.enabled = false;
        }
        draw_text(&mut disabled, "H", (10, 10), &text_style, &font, None).unwrap();
        assert_eq!(disabled.get_pixel(7, 7).0, [255, 255, 255, 255]);
    }

    #[test]
    fn unusable_fonts_fall_back_to_builtin_and_are_cached() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Broken.ttf"), b"not a font").unwrap();
        let cache = FontCache::new(dir.path(), vec![dir.path().join("missing.ttf")]);

        let font = cache.resolve("Broken", 40, 700);
        assert_eq!(font.source(), &FontSource::Builtin);
        assert_eq!(font.size(), 40.0);
        let again = cache.resolve("Broken", 40, 700);
        assert!(Arc::ptr_eq(&font, &again));
        assert_eq!(cache.len(), 1);

        cache.resolve("Broken", 41, 700);
        assert_eq!(cache.len(), 2);
    }
}
