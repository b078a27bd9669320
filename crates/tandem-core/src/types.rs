//! # Types Module
//!
//! Shared value types used by both the producer scene and the render world.
//!
//! ## Key Types
//! - `Color`: Float-based RGBA color.
//! - `ColorMatrix`: 4x4 color transform plus offset, applied to straight RGBA.
//! - `BlendMode`: How a node composites onto what is below it.
//! - `PixelFormat`: Component count and bit depth of CPU pixel data.

use crate::errors::RenderError;
use glam::{Affine2, Mat4, Vec4};
use serde::{Deserialize, Serialize};

/// Represents a color in RGBA format (0.0 - 1.0).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const BLACK: Color = Color::new(0.0, 0.0, 0.0, 1.0);
    pub const WHITE: Color = Color::new(1.0, 1.0, 1.0, 1.0);
    pub const TRANSPARENT: Color = Color::new(0.0, 0.0, 0.0, 0.0);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub fn from_rgba8(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self::new(
            r as f32 / 255.0,
            g as f32 / 255.0,
            b as f32 / 255.0,
            a as f32 / 255.0,
        )
    }

    pub fn to_rgba8(self) -> [u8; 4] {
        let q = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        [q(self.r), q(self.g), q(self.b), q(self.a)]
    }

    pub fn with_alpha(self, a: f32) -> Self {
        Self { a, ..self }
    }

    pub(crate) fn to_tiny(self) -> tiny_skia::Color {
        tiny_skia::Color::from_rgba(
            self.r.clamp(0.0, 1.0),
            self.g.clamp(0.0, 1.0),
            self.b.clamp(0.0, 1.0),
            self.a.clamp(0.0, 1.0),
        )
        .unwrap_or(tiny_skia::Color::TRANSPARENT)
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::WHITE
    }
}

/// Affine color transform: `out = matrix * rgba + offset`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorMatrix {
    pub matrix: Mat4,
    pub offset: Vec4,
}

impl ColorMatrix {
    pub const IDENTITY: ColorMatrix = ColorMatrix {
        matrix: Mat4::IDENTITY,
        offset: Vec4::ZERO,
    };

    /// Per-channel multiply, the common tint case.
    pub fn scale(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self {
            matrix: Mat4::from_diagonal(Vec4::new(r, g, b, a)),
            offset: Vec4::ZERO,
        }
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    /// Composes `self` (applied first) with `outer` (applied second).
    pub fn then(&self, outer: &ColorMatrix) -> ColorMatrix {
        ColorMatrix {
            matrix: outer.matrix * self.matrix,
            offset: outer.matrix * self.offset + outer.offset,
        }
    }

    pub fn apply(&self, color: Color) -> Color {
        let v = self.matrix * Vec4::new(color.r, color.g, color.b, color.a) + self.offset;
        Color::new(
            v.x.clamp(0.0, 1.0),
            v.y.clamp(0.0, 1.0),
            v.z.clamp(0.0, 1.0),
            v.w.clamp(0.0, 1.0),
        )
    }
}

impl Default for ColorMatrix {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BlendMode {
    #[default]
    Normal,
    Add,
    Multiply,
    Screen,
}

impl BlendMode {
    pub(crate) fn to_tiny(self) -> tiny_skia::BlendMode {
        match self {
            BlendMode::Normal => tiny_skia::BlendMode::SourceOver,
            BlendMode::Add => tiny_skia::BlendMode::Plus,
            BlendMode::Multiply => tiny_skia::BlendMode::Multiply,
            BlendMode::Screen => tiny_skia::BlendMode::Screen,
        }
    }
}

/// Layout of CPU-side pixel data: `components` channels of `bit_count` bits.
///
/// One channel is gray, two red/green, three RGB, four RGBA. 8 and 16 bit
/// channels are unsigned normalized integers, 32 bit channels are `f32`.
/// Multi-byte channels are little endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelFormat {
    components: u8,
    bit_count: u8,
}

impl PixelFormat {
    pub const RGBA8: PixelFormat = PixelFormat {
        components: 4,
        bit_count: 8,
    };
    pub const RGB8: PixelFormat = PixelFormat {
        components: 3,
        bit_count: 8,
    };

    pub fn new(components: u8, bit_count: u8) -> Result<Self, RenderError> {
        if !(1..=4).contains(&components) {
            return Err(RenderError::invalid(format!(
                "pixel format needs 1 to 4 components, got {components}"
            )));
        }
        if !matches!(bit_count, 8 | 16 | 32) {
            return Err(RenderError::invalid(format!(
                "pixel format bit count must be 8, 16 or 32, got {bit_count}"
            )));
        }
        Ok(Self {
            components,
            bit_count,
        })
    }

    pub fn components(&self) -> u8 {
        self.components
    }

    pub fn bit_count(&self) -> u8 {
        self.bit_count
    }

    pub fn bytes_per_pixel(&self) -> usize {
        self.components as usize * (self.bit_count as usize / 8)
    }

    /// Appends one straight-alpha RGBA8 pixel in this format.
    pub fn encode_pixel(&self, rgba: [u8; 4], out: &mut Vec<u8>) {
        for &c in &rgba[..self.components as usize] {
            match self.bit_count {
                8 => out.push(c),
                16 => out.extend_from_slice(&(c as u16 * 257).to_le_bytes()),
                _ => out.extend_from_slice(&(c as f32 / 255.0).to_le_bytes()),
            }
        }
    }

    /// Reads one pixel in this format back to straight-alpha RGBA8. Missing
    /// channels read as zero color and opaque alpha; one channel is gray.
    pub fn decode_pixel(&self, bytes: &[u8]) -> [u8; 4] {
        let width = self.bit_count as usize / 8;
        let channel = |i: usize| -> u8 {
            let b = &bytes[i * width..(i + 1) * width];
            match self.bit_count {
                8 => b[0],
                16 => (u16::from_le_bytes([b[0], b[1]]) / 257) as u8,
                _ => {
                    let v = f32::from_le_bytes([b[0], b[1], b[2], b[3]]);
                    (v.clamp(0.0, 1.0) * 255.0).round() as u8
                }
            }
        };
        match self.components {
            1 => {
                let v = channel(0);
                [v, v, v, 255]
            }
            2 => [channel(0), channel(1), 0, 255],
            3 => [channel(0), channel(1), channel(2), 255],
            _ => [channel(0), channel(1), channel(2), channel(3)],
        }
    }
}

/// Converts a glam affine into tiny-skia's row-major transform.
pub(crate) fn to_tiny_transform(a: &Affine2) -> tiny_skia::Transform {
    tiny_skia::Transform::from_row(
        a.matrix2.x_axis.x,
        a.matrix2.x_axis.y,
        a.matrix2.y_axis.x,
        a.matrix2.y_axis.y,
        a.translation.x,
        a.translation.y,
    )
}
