//! Deterministic peer colors.

use palette::{FromColor, Hsl, Srgb};

const SATURATION_MIN: i32 = 65;
const SATURATION_SPAN: i32 = 20;
const LIGHTNESS_MIN: i32 = 45;
const LIGHTNESS_SPAN: i32 = 15;

/// Hex color (`#rrggbb`) for an identity string.
///
/// Hue covers the full circle, saturation stays in 65–84% and lightness in
/// 45–59% so every color reads against a white grid. Same input, same color;
/// collisions are possible and harmless.
pub fn generate_color(identity: &str) -> String {
    let hash = string_hash(identity);
    let hue = hash.rem_euclid(360);
    let saturation = SATURATION_MIN + (hash >> 8).rem_euclid(SATURATION_SPAN);
    let lightness = LIGHTNESS_MIN + (hash >> 16).rem_euclid(LIGHTNESS_SPAN);

    let hsl = Hsl::new_srgb(
        hue as f32,
        saturation as f32 / 100.0,
        lightness as f32 / 100.0,
    );
    let rgb: Srgb<u8> = Srgb::<f32>::from_color(hsl).into_format();
    format!("#{:02x}{:02x}{:02x}", rgb.red, rgb.green, rgb.blue)
}

/// 32-bit multiplicative string hash over UTF-16 code units, so browser
/// peers hashing the same id land on the same color.
fn string_hash(s: &str) -> i32 {
    s.encode_utf16()
        .fold(0i32, |hash, unit| (unit as i32).wrapping_add(hash.wrapping_shl(5).wrapping_sub(hash)))
}
