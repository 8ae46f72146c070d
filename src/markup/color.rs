//! Foreground colour → palette mapping.
//!
//! The target format has a fixed ten-colour palette ([`Color::PALETTE`]).
//! Mapping rule:
//!
//! 1. a palette name (`red`, `Blue`, …) matches case-insensitively;
//! 2. otherwise the value is parsed to RGB (`#rgb`, `#rrggbb`, `rgb(r, g, b)`
//!    or a CSS colour name) and the palette entry with the smallest squared
//!    Euclidean distance to its reference RGB wins;
//! 3. ties go to the entry declared first.

use crate::block::Color;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

static RGB_FUNC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^rgba?\(\s*(\d{1,3})\s*,\s*(\d{1,3})\s*,\s*(\d{1,3})\s*(?:,\s*[\d.]+\s*)?\)$")
        .unwrap()
});

static CSS_NAMES: Lazy<HashMap<&'static str, (u8, u8, u8)>> = Lazy::new(|| {
    [
        ("black", (0, 0, 0)),
        ("white", (255, 255, 255)),
        ("silver", (192, 192, 192)),
        ("grey", (128, 128, 128)),
        ("darkgray", (169, 169, 169)),
        ("darkgrey", (169, 169, 169)),
        ("lightgray", (211, 211, 211)),
        ("lightgrey", (211, 211, 211)),
        ("maroon", (128, 0, 0)),
        ("darkred", (139, 0, 0)),
        ("crimson", (220, 20, 60)),
        ("tomato", (255, 99, 71)),
        ("coral", (255, 127, 80)),
        ("darkorange", (255, 140, 0)),
        ("gold", (255, 215, 0)),
        ("khaki", (240, 230, 140)),
        ("olive", (128, 128, 0)),
        ("lime", (0, 255, 0)),
        ("darkgreen", (0, 100, 0)),
        ("teal", (0, 128, 128)),
        ("aqua", (0, 255, 255)),
        ("cyan", (0, 255, 255)),
        ("navy", (0, 0, 128)),
        ("darkblue", (0, 0, 139)),
        ("royalblue", (65, 105, 225)),
        ("steelblue", (70, 130, 180)),
        ("skyblue", (135, 206, 235)),
        ("indigo", (75, 0, 130)),
        ("violet", (238, 130, 238)),
        ("fuchsia", (255, 0, 255)),
        ("magenta", (255, 0, 255)),
        ("hotpink", (255, 105, 180)),
        ("chocolate", (210, 105, 30)),
        ("sienna", (160, 82, 45)),
        ("tan", (210, 180, 140)),
    ]
    .into_iter()
    .collect()
});

/// Map a CSS colour value onto the palette. `None` when the value cannot be
/// interpreted at all.
pub fn map_color(value: &str) -> Option<Color> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Some(named) = palette_by_name(value) {
        return Some(named);
    }
    parse_rgb(value).map(nearest_color)
}

fn palette_by_name(value: &str) -> Option<Color> {
    Color::PALETTE
        .into_iter()
        .find(|c| c.as_str().eq_ignore_ascii_case(value))
}

/// Parse `#rgb`, `#rrggbb`, `rgb()`/`rgba()` or a CSS colour name.
pub fn parse_rgb(value: &str) -> Option<(u8, u8, u8)> {
    if let Some(hex) = value.strip_prefix('#') {
        return parse_hex(hex);
    }
    if let Some(caps) = RGB_FUNC.captures(value) {
        let channel = |i: usize| -> Option<u8> {
            let n: u16 = caps.get(i)?.as_str().parse().ok()?;
            u8::try_from(n.min(255)).ok()
        };
        return Some((channel(1)?, channel(2)?, channel(3)?));
    }
    CSS_NAMES.get(value.to_ascii_lowercase().as_str()).copied()
}

fn parse_hex(hex: &str) -> Option<(u8, u8, u8)> {
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    match hex.len() {
        3 => {
            let d = |i: usize| u8::from_str_radix(&hex[i..=i], 16).ok().map(|v| v * 17);
            Some((d(0)?, d(1)?, d(2)?))
        }
        6 => {
            let d = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
            Some((d(0)?, d(2)?, d(4)?))
        }
        _ => None,
    }
}

/// Palette entry closest to `rgb`; the first declared wins ties.
pub fn nearest_color(rgb: (u8, u8, u8)) -> Color {
    let distance = |c: Color| {
        let (r, g, b) = c.rgb();
        let dr = i32::from(r) - i32::from(rgb.0);
        let dg = i32::from(g) - i32::from(rgb.1);
        let db = i32::from(b) - i32::from(rgb.2);
        dr * dr + dg * dg + db * db
    };
    let mut best = Color::PALETTE[0];
    let mut best_distance = distance(best);
    for candidate in Color::PALETTE.into_iter().skip(1) {
        let d = distance(candidate);
        if d < best_distance {
            best = candidate;
            best_distance = d;
        }
    }
    best
}
