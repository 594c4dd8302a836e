//! 2D affine geometry for track orientation.
//!
//! Transforms follow the row-vector convention of QuickTime display
//! matrices: a point `(x, y)` maps to `(a·x + c·y + tx, b·x + d·y + ty)`,
//! and `t1.concatenating(t2)` applies `t1` first.

use lp_media::Matrix;
use serde::Serialize;

/// Width and height in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AffineTransform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub tx: f64,
    pub ty: f64,
}

impl Default for AffineTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

const FIXED_16_16: f64 = 65536.0;

impl AffineTransform {
    pub const IDENTITY: AffineTransform = AffineTransform {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        tx: 0.0,
        ty: 0.0,
    };

    pub const fn new(a: f64, b: f64, c: f64, d: f64, tx: f64, ty: f64) -> Self {
        Self { a, b, c, d, tx, ty }
    }

    pub const fn scale(sx: f64, sy: f64) -> Self {
        Self::new(sx, 0.0, 0.0, sy, 0.0, 0.0)
    }

    pub const fn translation(tx: f64, ty: f64) -> Self {
        Self::new(1.0, 0.0, 0.0, 1.0, tx, ty)
    }

    /// Rotation by `quarter_turns × 90°` counter-clockwise, with exact
    /// coefficients.
    pub const fn rotation(quarter_turns: i32) -> Self {
        match quarter_turns.rem_euclid(4) {
            0 => Self::IDENTITY,
            1 => Self::new(0.0, 1.0, -1.0, 0.0, 0.0, 0.0),
            2 => Self::new(-1.0, 0.0, 0.0, -1.0, 0.0, 0.0),
            _ => Self::new(0.0, -1.0, 1.0, 0.0, 0.0, 0.0),
        }
    }

    /// `self` followed by `other`.
    pub fn concatenating(&self, other: &AffineTransform) -> AffineTransform {
        AffineTransform {
            a: self.a * other.a + self.b * other.c,
            b: self.a * other.b + self.b * other.d,
            c: self.c * other.a + self.d * other.c,
            d: self.c * other.b + self.d * other.d,
            tx: self.tx * other.a + self.ty * other.c + other.tx,
            ty: self.tx * other.b + self.ty * other.d + other.ty,
        }
    }

    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (
            self.a * x + self.c * y + self.tx,
            self.b * x + self.d * y + self.ty,
        )
    }

    pub fn home_button(&self) -> HomeButton {
        HomeButton::classify(self)
    }

    /// Read a `tkhd` display matrix.
    pub fn from_matrix(matrix: &Matrix) -> Self {
        let m = &matrix.0;
        let fixed = |v: i32| f64::from(v) / FIXED_16_16;
        Self::new(
            fixed(m[0]),
            fixed(m[1]),
            fixed(m[3]),
            fixed(m[4]),
            fixed(m[6]),
            fixed(m[7]),
        )
    }

    /// Encode as a `tkhd` display matrix; coefficients saturate at the
    /// 16.16 range.
    pub fn to_matrix(&self) -> Matrix {
        let fixed = |v: f64| {
            let scaled = (v * FIXED_16_16).round();
            if scaled.is_nan() {
                0
            } else {
                scaled.clamp(f64::from(i32::MIN), f64::from(i32::MAX)) as i32
            }
        };
        Matrix([
            fixed(self.a),
            fixed(self.b),
            0,
            fixed(self.c),
            fixed(self.d),
            0,
            fixed(self.tx),
            fixed(self.ty),
            0x4000_0000,
        ])
    }
}

/// Where the home button was when a clip was recorded, derived from the
/// rotation part of its preferred transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HomeButton {
    Up,
    Down,
    Left,
    Right,
    Unknown,
}

impl HomeButton {
    pub fn classify(t: &AffineTransform) -> Self {
        match (t.a, t.b, t.c, t.d) {
            (a, b, c, d) if a == 0.0 && b == -1.0 && c == 1.0 && d == 0.0 => HomeButton::Up,
            (a, b, c, d) if a == -1.0 && b == 0.0 && c == 0.0 && d == -1.0 => HomeButton::Left,
            (a, b, c, d) if a == 0.0 && b == 1.0 && c == -1.0 && d == 0.0 => HomeButton::Down,
            (a, b, c, d) if a == 1.0 && b == 0.0 && c == 0.0 && d == 1.0 => HomeButton::Right,
            _ => HomeButton::Unknown,
        }
    }
}

impl std::fmt::Display for HomeButton {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            HomeButton::Up => "up",
            HomeButton::Down => "down",
            HomeButton::Left => "left",
            HomeButton::Right => "right",
            HomeButton::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Half of the container a side-by-side source occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Left,
    Right,
}

/// Transform that fits a source track, upright, into the full container
/// frame.
pub fn full_frame_merge(
    source: Size,
    preferred: &AffineTransform,
    container: Size,
) -> AffineTransform {
    match preferred.home_button() {
        HomeButton::Down => {
            let ratio = container.height / source.width;
            let x = (container.width + source.height * ratio) / 2.0;
            AffineTransform::scale(ratio, ratio)
                .concatenating(&AffineTransform::rotation(1))
                .concatenating(&AffineTransform::translation(x, 0.0))
        }
        HomeButton::Left => {
            let ratio = container.width / source.width;
            AffineTransform::scale(ratio, ratio)
                .concatenating(&AffineTransform::rotation(2))
                .concatenating(&AffineTransform::translation(
                    container.width,
                    container.height,
                ))
        }
        HomeButton::Up => {
            let ratio = container.height / source.width;
            let x = (container.width - source.height * ratio) / 2.0;
            AffineTransform::scale(ratio, ratio)
                .concatenating(&AffineTransform::rotation(-1))
                .concatenating(&AffineTransform::translation(x, container.height))
        }
        HomeButton::Right | HomeButton::Unknown => {
            let ratio = container.width / source.width;
            AffineTransform::IDENTITY.concatenating(&AffineTransform::scale(ratio, ratio))
        }
    }
}

/// Transform that fits a source track into the left or right half of the
/// container.
pub fn side_by_side_merge(
    source: Size,
    preferred: &AffineTransform,
    placement: Placement,
    container: Size,
) -> AffineTransform {
    let left = placement == Placement::Left;
    match preferred.home_button() {
        HomeButton::Down => {
            let ratio = container.width / (source.height * 2.0);
            let empty = container.width - source.height * ratio;
            let x = if left {
                source.height * ratio
            } else {
                source.height * ratio + empty
            };
            let y = (container.height - source.width * ratio) / 2.0;
            AffineTransform::scale(ratio, ratio)
                .concatenating(&AffineTransform::rotation(1))
                .concatenating(&AffineTransform::translation(x, y))
        }
        HomeButton::Left => {
            let ratio = container.width / source.width * 0.5;
            let half_empty = (container.height - source.height * ratio) / 2.0;
            let x = if left {
                source.width * ratio
            } else {
                source.width * ratio + container.width / 2.0
            };
            AffineTransform::scale(ratio, ratio)
                .concatenating(&AffineTransform::rotation(2))
                .concatenating(&AffineTransform::translation(
                    x,
                    half_empty + source.height * ratio,
                ))
        }
        HomeButton::Up => {
            let ratio = container.width / (source.height * 2.0);
            let x = if left { 0.0 } else { container.width / 2.0 };
            let y = (container.height + source.width * ratio) / 2.0;
            AffineTransform::scale(ratio, ratio)
                .concatenating(&AffineTransform::rotation(-1))
                .concatenating(&AffineTransform::translation(x, y))
        }
        HomeButton::Right | HomeButton::Unknown => {
            let ratio = container.width / source.width * 0.5;
            let x = if left { 0.0 } else { container.width / 2.0 };
            AffineTransform::IDENTITY
                .concatenating(&AffineTransform::scale(ratio, ratio))
                .concatenating(&AffineTransform::translation(x, container.height * 0.25))
        }
    }
}
