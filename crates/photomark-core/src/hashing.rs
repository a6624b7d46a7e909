//! Perceptual hashes of preview images.
//!
//! Two fingerprints describe what a photo looks like: an average hash over
//! an 8×8 luminance thumbnail, and a color hash over HSV distribution bins.
//! Both render as lowercase hex strings and become the leading segments of a
//! renamed file's stem.

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, Luma};

const AVERAGE_HASH_SIZE: u32 = 8;
const COLOR_HASH_BINBITS: u32 = 3;
const HUE_BINS: usize = 6;

// Thresholds on 0..=255 channel values.
const BLACK_INTENSITY: u8 = (256 / 8) as u8; // 32
const GRAY_SATURATION: u8 = (256 / 3) as u8; // 85
const BRIGHT_SATURATION: u8 = (256 * 2 / 3) as u8; // 170

/// Capability to fingerprint a decoded image.
pub trait ImageHasher {
    /// Hex rendering of the color-distribution hash.
    fn color_hash(&self, image: &DynamicImage) -> String;
    /// Hex rendering of the average (mean luminance) hash.
    fn average_hash(&self, image: &DynamicImage) -> String;
}

/// Pixel-based implementation of [`ImageHasher`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PerceptualHasher;

impl ImageHasher for PerceptualHasher {
    fn color_hash(&self, image: &DynamicImage) -> String {
        bits_to_hex(&color_hash_bits(image))
    }

    fn average_hash(&self, image: &DynamicImage) -> String {
        bits_to_hex(&average_hash_bits(image))
    }
}

/// ITU-R 601-2 luma in fixed point, the same integer transform used by
/// common "L" mode conversions.
fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((r as u32 * 19595 + g as u32 * 38470 + b as u32 * 7471 + 0x8000) >> 16) as u8
}

/// RGB to (hue, saturation, value), each scaled to 0..=255.
fn rgb_to_hsv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let maxc = r.max(g).max(b);
    let minc = r.min(g).min(b);
    if maxc == minc {
        return (0, 0, maxc);
    }

    let cr = (maxc - minc) as f32;
    let s = cr / maxc as f32;
    let rc = (maxc - r) as f32 / cr;
    let gc = (maxc - g) as f32 / cr;
    let bc = (maxc - b) as f32 / cr;

    let h = if r == maxc {
        bc - gc
    } else if g == maxc {
        2.0 + rc - bc
    } else {
        4.0 + gc - rc
    };
    // Wrap in double precision, then store back as f32 before scaling.
    let h = ((h as f64 / 6.0 + 1.0) % 1.0) as f32;

    let to_u8 = |v: f32| ((v as f64 * 255.0) as i32).clamp(0, 255) as u8;
    (to_u8(h), to_u8(s), maxc)
}

fn luminance_image(image: &DynamicImage) -> GrayImage {
    let rgb = image.to_rgb8();
    let mut gray = GrayImage::new(rgb.width(), rgb.height());
    for (dst, src) in gray.pixels_mut().zip(rgb.pixels()) {
        *dst = Luma([luma(src[0], src[1], src[2])]);
    }
    gray
}

fn average_hash_bits(image: &DynamicImage) -> Vec<bool> {
    let gray = luminance_image(image);
    let small = imageops::resize(&gray, AVERAGE_HASH_SIZE, AVERAGE_HASH_SIZE, FilterType::Lanczos3);

    let pixels: Vec<f64> = small.pixels().map(|p| p[0] as f64).collect();
    let mean = pixels.iter().sum::<f64>() / pixels.len() as f64;
    pixels.iter().map(|&p| p > mean).collect()
}

/// Index of the hue bin for `h`, with bins spaced evenly over [0, 255] and
/// the last bin closed on the right.
fn hue_bin(h: u8) -> usize {
    ((h as usize * HUE_BINS) / 255).min(HUE_BINS - 1)
}

fn color_hash_bits(image: &DynamicImage) -> Vec<bool> {
    let rgb = image.to_rgb8();
    let total = (rgb.width() as usize * rgb.height() as usize).max(1);

    let mut black = 0usize;
    let mut gray = 0usize;
    let mut colors = 0usize;
    let mut faint = [0usize; HUE_BINS];
    let mut bright = [0usize; HUE_BINS];

    for px in rgb.pixels() {
        let [r, g, b] = px.0;
        if luma(r, g, b) < BLACK_INTENSITY {
            black += 1;
            continue;
        }
        let (h, s, _) = rgb_to_hsv(r, g, b);
        if s < GRAY_SATURATION {
            gray += 1;
            continue;
        }
        colors += 1;
        // s == BRIGHT_SATURATION lands in neither color bin.
        if s < BRIGHT_SATURATION {
            faint[hue_bin(h)] += 1;
        } else if s > BRIGHT_SATURATION {
            bright[hue_bin(h)] += 1;
        }
    }

    let max_value = 1u32 << COLOR_HASH_BINBITS;
    let quantize = |fraction: f64| ((fraction * max_value as f64) as u32).min(max_value - 1);
    let color_total = colors.max(1) as f64;

    let mut values = vec![
        quantize(black as f64 / total as f64),
        quantize(gray as f64 / total as f64),
    ];
    values.extend(faint.iter().chain(bright.iter()).map(|&c| quantize(c as f64 / color_total)));

    let mut bits = Vec::with_capacity(values.len() * COLOR_HASH_BINBITS as usize);
    for v in values {
        for i in 0..COLOR_HASH_BINBITS {
            let shift = COLOR_HASH_BINBITS - i - 1;
            bits.push((v >> shift) % (1 << (COLOR_HASH_BINBITS - i)) > 0);
        }
    }
    bits
}

/// Render a bit string as zero-padded lowercase hex, most significant bit
/// first, one digit per started nibble.
fn bits_to_hex(bits: &[bool]) -> String {
    let width = bits.len().div_ceil(4);
    let pad = width * 4 - bits.len();
    let padded: Vec<bool> = std::iter::repeat(false).take(pad).chain(bits.iter().copied()).collect();

    padded
        .chunks(4)
        .map(|nibble| {
            let v = nibble.iter().fold(0u32, |acc, &b| (acc << 1) | b as u32);
            char::from_digit(v, 16).unwrap_or('0')
        })
        .collect()
}
