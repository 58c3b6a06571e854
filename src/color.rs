use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Straight (non-premultiplied) RGBA color, one byte per channel.
///
/// Parsing never fails: anything that is not `#RRGGBB` or `#RRGGBBAA`
/// becomes [`Color::WHITE`] so a single bad template value cannot abort a
/// batch export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const WHITE: Self = Self::rgb(255, 255, 255);
    pub const BLACK: Self = Self::rgb(0, 0, 0);
    pub const TRANSPARENT: Self = Self::rgba(0, 0, 0, 0);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Parses `#RRGGBB` / `#RRGGBBAA`, falling back to opaque white.
    pub fn parse(value: &str) -> Self {
        Self::try_parse(value).unwrap_or(Self::WHITE)
    }

    /// Strict variant of [`Color::parse`]; `None` on malformed input.
    pub fn try_parse(value: &str) -> Option<Self> {
        let hex = value.strip_prefix('#')?;
        if !hex.is_ascii() {
            return None;
        }
        let channel = |index: usize| u8::from_str_radix(&hex[index..index + 2], 16).ok();
        match hex.len() {
            6 => Some(Self::rgb(channel(0)?, channel(2)?, channel(4)?)),
            8 => Some(Self::rgba(channel(0)?, channel(2)?, channel(4)?, channel(6)?)),
            _ => None,
        }
    }

    /// Uppercase hex; the alpha byte is only emitted when not fully opaque.
    pub fn to_hex(self) -> String {
        if self.a == 255 {
            format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
        } else {
            format!("#{:02X}{:02X}{:02X}{:02X}", self.r, self.g, self.b, self.a)
        }
    }

    pub fn to_array(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }

    pub fn to_normalized(self) -> [f32; 4] {
        [
            f32::from(self.r) / 255.0,
            f32::from(self.g) / 255.0,
            f32::from(self.b) / 255.0,
            f32::from(self.a) / 255.0,
        ]
    }

    pub fn with_alpha(self, a: u8) -> Self {
        Self { a, ..self }
    }

    /// Adds `amount` to each color channel (saturating) and forces full opacity.
    pub fn lightened(self, amount: u8) -> Self {
        Self::rgb(
            self.r.saturating_add(amount),
            self.g.saturating_add(amount),
            self.b.saturating_add(amount),
        )
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::WHITE
    }
}

impl From<Color> for image::Rgba<u8> {
    fn from(color: Color) -> Self {
        image::Rgba(color.to_array())
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Color {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Color {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GradientStop {
    pub color: Color,
    pub position: f32,
}

impl GradientStop {
    pub fn new(color: Color, position: f32) -> Self {
        Self { color, position }
    }
}

/// Samples a gradient at `t`.
///
/// Stops may arrive in any order. The bracketing pair is chosen by position
/// value: the greatest position `<= t` on the left, the smallest `>= t` on the
/// right. Ties keep the earliest stop on the left and the latest stop at the
/// maximum end.
pub fn interpolate(stops: &[GradientStop], t: f32) -> Color {
    let Some(first) = stops.first() else {
        return Color::WHITE;
    };
    let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };

    let mut min_stop = first;
    let mut max_stop = first;
    for stop in stops {
        if stop.position < min_stop.position {
            min_stop = stop;
        }
        if stop.position >= max_stop.position {
            max_stop = stop;
        }
    }

    if t <= min_stop.position {
        return min_stop.color;
    }
    if t >= max_stop.position {
        return max_stop.color;
    }

    let mut left: Option<&GradientStop> = None;
    let mut right: Option<&GradientStop> = None;
    for stop in stops {
        if stop.position <= t && left.map_or(true, |l| stop.position > l.position) {
            left = Some(stop);
        }
        if stop.position >= t && right.map_or(true, |r| stop.position < r.position) {
            right = Some(stop);
        }
    }

    let (Some(left), Some(right)) = (left, right) else {
        return max_stop.color;
    };

    let span = right.position - left.position;
    if span <= 0.0 {
        return left.color;
    }
    let local_t = (t - left.position) / span;
    let mix = |a: u8, b: u8| -> u8 {
        let a = f32::from(a);
        let b = f32::from(b);
        (a + (b - a) * local_t).clamp(0.0, 255.0) as u8
    };

    Color::rgba(
        mix(left.color.r, right.color.r),
        mix(left.color.g, right.color.g),
        mix(left.color.b, right.color.b),
        mix(left.color.a, right.color.a),
    )
}
