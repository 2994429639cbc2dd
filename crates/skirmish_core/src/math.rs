//! Fixed-point math utilities for deterministic simulation.
//!
//! All simulation quantities use fixed-point arithmetic so that every peer
//! in a lockstep match computes bit-identical results. Floating-point values
//! only appear at the JSON boundary, where [`Vec3Fixed::from_wire`] and
//! [`Vec3Fixed::to_wire`] convert them.
//!
//! Angles follow the battlefield convention: degrees, `0` pointing up the
//! screen (negative y), increasing clockwise, so `90` points along positive x.

use fixed::types::I32F32;
use serde::{Deserialize, Serialize};

/// Fixed-point number type for all simulation math.
///
/// Uses 32 bits for integer part and 32 bits for fractional part.
/// Range: approximately -2,147,483,648 to 2,147,483,647
/// Precision: approximately 0.00000000023
pub type Fixed = I32F32;

/// Fixed-point 3D vector used for positions and velocities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Vec3Fixed {
    /// X coordinate.
    #[serde(with = "fixed_serde")]
    pub x: Fixed,
    /// Y coordinate.
    #[serde(with = "fixed_serde")]
    pub y: Fixed,
    /// Z coordinate (height).
    #[serde(with = "fixed_serde")]
    pub z: Fixed,
}

/// Serde support for fixed-point numbers.
///
/// Serializes fixed-point numbers as their raw bit representation (i64)
/// to preserve exact precision across serialization boundaries.
pub mod fixed_serde {
    use super::Fixed;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a fixed-point number as its raw bit representation.
    pub fn serialize<S>(value: &Fixed, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        value.to_bits().serialize(serializer)
    }

    /// Deserialize a fixed-point number from its raw bit representation.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Fixed, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bits = i64::deserialize(deserializer)?;
        Ok(Fixed::from_bits(bits))
    }
}

/// Serde support for fixed-point numbers written as plain JSON numbers.
///
/// Used by data files and snapshots, where humans and AI agents read and write
/// ordinary decimal values.
pub mod fixed_num_serde {
    use super::Fixed;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    /// Serialize a fixed-point number as an `f64`.
    pub fn serialize<S>(value: &Fixed, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(value.to_num::<f64>())
    }

    /// Deserialize a fixed-point number from any JSON number.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Fixed, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = f64::deserialize(deserializer)?;
        Fixed::checked_from_num(value)
            .ok_or_else(|| D::Error::custom(format!("{value} is out of fixed-point range")))
    }
}

impl Vec3Fixed {
    /// Zero vector.
    pub const ZERO: Self = Self {
        x: Fixed::ZERO,
        y: Fixed::ZERO,
        z: Fixed::ZERO,
    };

    /// Create a new fixed-point vector.
    #[must_use]
    pub const fn new(x: Fixed, y: Fixed, z: Fixed) -> Self {
        Self { x, y, z }
    }

    /// Create a vector on the ground plane from integers.
    #[must_use]
    pub fn from_ints(x: i32, y: i32) -> Self {
        Self::new(Fixed::from_num(x), Fixed::from_num(y), Fixed::ZERO)
    }

    /// Convert a wire position (`[x, y]` or `[x, y, z]`) to fixed point.
    ///
    /// Returns `None` for sequences of the wrong length or values that are
    /// not finite or out of range.
    #[must_use]
    pub fn from_wire(values: &[f64]) -> Option<Self> {
        if values.len() < 2 || values.len() > 3 {
            return None;
        }
        let z = values.get(2).copied().unwrap_or(0.0);
        Some(Self::new(
            Fixed::checked_from_num(values[0])?,
            Fixed::checked_from_num(values[1])?,
            Fixed::checked_from_num(z)?,
        ))
    }

    /// Convert to the wire representation `[x, y, z]`.
    #[must_use]
    pub fn to_wire(self) -> Vec<f64> {
        vec![
            self.x.to_num::<f64>(),
            self.y.to_num::<f64>(),
            self.z.to_num::<f64>(),
        ]
    }

    /// Round-trip through the wire representation.
    ///
    /// Orders quantize their positions once at the scheduling boundary, so a
    /// locally scheduled order and its copy received by a peer hold the same
    /// bits.
    #[must_use]
    pub fn quantized(self) -> Self {
        Self::from_wire(&self.to_wire()).unwrap_or(self)
    }

    /// Component-wise product.
    #[must_use]
    pub fn mul_elem(self, other: Self) -> Self {
        Self::new(
            self.x.saturating_mul(other.x),
            self.y.saturating_mul(other.y),
            self.z.saturating_mul(other.z),
        )
    }

    /// Component-wise quotient. Components divided by zero become zero.
    #[must_use]
    pub fn div_elem(self, other: Self) -> Self {
        let div = |a: Fixed, b: Fixed| a.checked_div(b).unwrap_or(Fixed::ZERO);
        Self::new(div(self.x, other.x), div(self.y, other.y), div(self.z, other.z))
    }

    /// Multiply every component by a scalar.
    #[must_use]
    pub fn scale(self, factor: Fixed) -> Self {
        Self::new(
            self.x.saturating_mul(factor),
            self.y.saturating_mul(factor),
            self.z.saturating_mul(factor),
        )
    }

    /// Component-wise absolute value.
    #[must_use]
    pub fn abs(self) -> Self {
        Self::new(self.x.abs(), self.y.abs(), self.z.abs())
    }

    /// Dot product of two vectors, saturating at the fixed-point range.
    #[must_use]
    pub fn dot(self, other: Self) -> Fixed {
        self.x
            .saturating_mul(other.x)
            .saturating_add(self.y.saturating_mul(other.y))
            .saturating_add(self.z.saturating_mul(other.z))
    }

    /// Squared distance (avoids sqrt for comparisons).
    ///
    /// Saturates at [`Fixed::MAX`] for points further apart than about
    /// 46,000 units.
    #[must_use]
    pub fn distance_squared(self, other: Self) -> Fixed {
        let bits = (self - other).squared_bits() >> Fixed::FRAC_NBITS;
        Fixed::from_bits(i64::try_from(bits).unwrap_or(i64::MAX))
    }

    /// Length of the vector.
    ///
    /// Exact to the last fractional bit for every representable vector.
    #[must_use]
    pub fn magnitude(self) -> Fixed {
        let root = isqrt_u128(self.squared_bits());
        Fixed::from_bits(i64::try_from(root).unwrap_or(i64::MAX))
    }

    /// Euclidean distance to another point.
    #[must_use]
    pub fn distance(self, other: Self) -> Fixed {
        (self - other).magnitude()
    }

    /// Sum of squared components in raw bits, scaled by `2^64`.
    fn squared_bits(self) -> u128 {
        [self.x, self.y, self.z]
            .iter()
            .map(|c| {
                let bits = u128::from(c.to_bits().unsigned_abs());
                bits * bits
            })
            .fold(0u128, u128::saturating_add)
    }

    /// Normalize vector using fixed-point math.
    #[must_use]
    pub fn normalize(self) -> Self {
        let len = self.magnitude();
        if len == Fixed::ZERO {
            return Self::ZERO;
        }
        Self::new(self.x / len, self.y / len, self.z / len)
    }

    /// Heading from this point to `to` as `[xy, z]` degrees.
    ///
    /// The `z` component is the elevation angle and is always non-negative.
    #[must_use]
    pub fn angle_to(self, to: Self) -> [Fixed; 2] {
        let d = to - self;
        let xy = heading_deg(d.x, d.y);
        let hyp = Self::new(d.x, d.y, Fixed::ZERO).magnitude();
        let za = if hyp > Fixed::ZERO {
            atan_deg(d.z.abs(), hyp)
        } else {
            Fixed::ZERO
        };
        [xy, za]
    }

    /// Heading of this vector when read as a velocity.
    #[must_use]
    pub fn angle(self) -> [Fixed; 2] {
        Self::ZERO.angle_to(self)
    }

    /// The point `distance` along the straight line from `self` to `target`.
    #[must_use]
    pub fn move_towards(self, target: Self, distance: Fixed) -> Self {
        self + (target - self).normalize().scale(distance)
    }
}

impl std::ops::Add for Vec3Fixed {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self::new(
            self.x.saturating_add(rhs.x),
            self.y.saturating_add(rhs.y),
            self.z.saturating_add(rhs.z),
        )
    }
}

impl std::ops::AddAssign for Vec3Fixed {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl std::ops::Sub for Vec3Fixed {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self::new(
            self.x.saturating_sub(rhs.x),
            self.y.saturating_sub(rhs.y),
            self.z.saturating_sub(rhs.z),
        )
    }
}

impl std::ops::Neg for Vec3Fixed {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Self::new(
            self.x.saturating_neg(),
            self.y.saturating_neg(),
            self.z.saturating_neg(),
        )
    }
}

/// Axis-aligned rectangle on the ground plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rect {
    /// Left edge.
    #[serde(with = "fixed_serde")]
    pub left: Fixed,
    /// Top edge.
    #[serde(with = "fixed_serde")]
    pub top: Fixed,
    /// Width.
    #[serde(with = "fixed_serde")]
    pub width: Fixed,
    /// Height.
    #[serde(with = "fixed_serde")]
    pub height: Fixed,
}

impl Rect {
    /// Create a rectangle from its top-left corner and size.
    #[must_use]
    pub const fn new(left: Fixed, top: Fixed, width: Fixed, height: Fixed) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    /// A rectangle of `size` centred on `center`.
    #[must_use]
    pub fn centered(center: Vec3Fixed, size: [Fixed; 2]) -> Self {
        Self::new(
            center.x - size[0] / 2,
            center.y - size[1] / 2,
            size[0],
            size[1],
        )
    }

    /// Right edge.
    #[must_use]
    pub fn right(&self) -> Fixed {
        self.left + self.width
    }

    /// Bottom edge.
    #[must_use]
    pub fn bottom(&self) -> Fixed {
        self.top + self.height
    }

    /// Centre point on the ground plane.
    #[must_use]
    pub fn center(&self) -> Vec3Fixed {
        Vec3Fixed::new(
            self.left + self.width / 2,
            self.top + self.height / 2,
            Fixed::ZERO,
        )
    }

    /// Strict overlap test: rectangles sharing only an edge do not overlap.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.left < other.right()
            && other.left < self.right()
            && self.top < other.bottom()
            && other.top < self.bottom()
    }

    /// Whether `other` lies entirely inside this rectangle.
    #[must_use]
    pub fn contains_rect(&self, other: &Self) -> bool {
        other.left >= self.left
            && other.top >= self.top
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    /// Whether the point lies inside or on the edge of this rectangle.
    #[must_use]
    pub fn contains_point(&self, point: Vec3Fixed) -> bool {
        self.left <= point.x
            && point.x <= self.right()
            && self.top <= point.y
            && point.y <= self.bottom()
    }

    /// The same rectangle moved by `offset`.
    #[must_use]
    pub fn translated(&self, offset: Vec3Fixed) -> Self {
        Self::new(self.left + offset.x, self.top + offset.y, self.width, self.height)
    }
}

/// Wrap an angle into `[0, 360)`.
#[must_use]
pub fn bound_angle(angle: Fixed) -> Fixed {
    let full = Fixed::from_num(360);
    let wrapped = angle % full;
    if wrapped < Fixed::ZERO {
        wrapped + full
    } else {
        wrapped
    }
}

/// Signed turn needed to get from `from` to `to`.
///
/// Positive values turn clockwise, negative counter-clockwise, and the
/// magnitude never exceeds 180.
#[must_use]
pub fn angle_diff(from: Fixed, to: Fixed) -> Fixed {
    let right = bound_angle(to - from);
    let left = bound_angle(from - to);
    if right < left {
        right
    } else {
        -left
    }
}

/// Sine of an angle in degrees.
///
/// Bhaskara I's rational approximation; exact at multiples of 90 degrees and
/// within 0.002 elsewhere, using only fixed-point operations.
#[must_use]
pub fn sin_deg(angle: Fixed) -> Fixed {
    let half = Fixed::from_num(180);
    let a = bound_angle(angle);
    let (x, sign) = if a <= half { (a, 1) } else { (a - half, -1) };
    let p = x * (half - x);
    let value = (p * 4) / (Fixed::from_num(40500) - p);
    if sign < 0 {
        -value
    } else {
        value
    }
}

/// Cosine of an angle in degrees.
#[must_use]
pub fn cos_deg(angle: Fixed) -> Fixed {
    sin_deg(angle + Fixed::from_num(90))
}

/// Velocity of length `distance` pointing along `[xy, z]` degrees.
#[must_use]
pub fn move_to_vector(angle: [Fixed; 2], distance: Fixed) -> Vec3Fixed {
    let z = sin_deg(angle[1]).saturating_mul(distance);
    let ground = cos_deg(angle[1]).saturating_mul(distance).abs();
    Vec3Fixed::new(
        sin_deg(angle[0]).saturating_mul(ground),
        -cos_deg(angle[0]).saturating_mul(ground),
        z,
    )
}

/// Arctangent of `opposite / adjacent` in degrees, both non-negative.
fn atan_deg(opposite: Fixed, adjacent: Fixed) -> Fixed {
    if adjacent == Fixed::ZERO {
        return Fixed::from_num(90);
    }
    if opposite > adjacent {
        return Fixed::from_num(90) - atan_deg(adjacent, opposite);
    }
    // atan(z) ~ (pi/4)z - z(z - 1)(0.2447 + 0.0663z) on [0, 1]
    let z = opposite / adjacent;
    let quarter_pi = Fixed::FRAC_PI_4;
    let radians = quarter_pi * z
        - z * (z - Fixed::ONE) * (Fixed::from_num(0.2447) + Fixed::from_num(0.0663) * z);
    radians * Fixed::from_num(180) / Fixed::PI
}

/// Battlefield heading of the direction `(dx, dy)`.
fn heading_deg(dx: Fixed, dy: Fixed) -> Fixed {
    if dx == Fixed::ZERO && dy == Fixed::ZERO {
        return Fixed::ZERO;
    }
    // Angle away from the "up" axis, in the first quadrant.
    let a = atan_deg(dx.abs(), dy.abs());
    let half = Fixed::from_num(180);
    let heading = match (dx >= Fixed::ZERO, dy <= Fixed::ZERO) {
        (true, true) => a,
        (true, false) => half - a,
        (false, false) => half + a,
        (false, true) => Fixed::from_num(360) - a,
    };
    bound_angle(heading)
}

/// Square root of a fixed-point number, rounded down. Negative inputs give
/// zero.
#[must_use]
pub fn fixed_sqrt(value: Fixed) -> Fixed {
    if value <= Fixed::ZERO {
        return Fixed::ZERO;
    }
    let root = isqrt_u128(u128::from(value.to_bits().unsigned_abs()) << Fixed::FRAC_NBITS);
    Fixed::from_bits(i64::try_from(root).unwrap_or(i64::MAX))
}

/// Integer square root, digit by digit.
fn isqrt_u128(n: u128) -> u128 {
    let mut rem = n;
    let mut root = 0u128;
    let mut bit = 1u128 << 126;
    while bit > rem {
        bit >>= 2;
    }
    while bit != 0 {
        if rem >= root + bit {
            rem -= root + bit;
            root = (root >> 1) + bit;
        } else {
            root >>= 1;
        }
        bit >>= 2;
    }
    root
}
