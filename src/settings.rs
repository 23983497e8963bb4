//! Drawing settings attached to a container.
//!
//! Persisted as the container's metadata bag (serde_json).  Every field
//! defaults, and defaults are skipped on output, so a bag only carries what
//! differs from a freshly created container.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// 2-D affine transform `[a b; c d] + (tx, ty)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub a:  f64,
    pub b:  f64,
    pub c:  f64,
    pub d:  f64,
    pub tx: f64,
    pub ty: f64,
}

impl Default for Transform {
    fn default() -> Self { Self::IDENTITY }
}

impl Transform {
    pub const IDENTITY: Transform = Transform { a: 1.0, b: 0.0, c: 0.0, d: 1.0, tx: 0.0, ty: 0.0 };

    pub fn translate(tx: f64, ty: f64) -> Self {
        Self { tx, ty, ..Self::IDENTITY }
    }

    pub fn scale(sx: f64, sy: f64) -> Self {
        Self { a: sx, d: sy, ..Self::IDENTITY }
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    /// `self` followed by `then`.
    pub fn then(&self, then: &Transform) -> Transform {
        Transform {
            a:  self.a * then.a + self.b * then.c,
            b:  self.a * then.b + self.b * then.d,
            c:  self.c * then.a + self.d * then.c,
            d:  self.c * then.b + self.d * then.d,
            tx: self.tx * then.a + self.ty * then.c + then.tx,
            ty: self.tx * then.b + self.ty * then.d + then.ty,
        }
    }

    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (self.a * x + self.c * y + self.tx, self.b * x + self.d * y + self.ty)
    }

    pub fn is_finite(&self) -> bool {
        [self.a, self.b, self.c, self.d, self.tx, self.ty].iter().all(|v| v.is_finite())
    }
}

/// Legacy QuickDraw-style transfer modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferMode {
    #[default]
    Replace,
    Superimpose,
    Transparent,
    Xor,
    Erase,
    Blend,
}

/// How a picture is split into tiles (e.g. a sprite sheet).
///
/// A bag entry is validated through [`Tiling::new`] on the way in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTiling")]
pub struct Tiling {
    pub columns: u32,
    pub rows:    u32,
}

#[derive(Deserialize)]
struct RawTiling {
    columns: u32,
    rows:    u32,
}

impl TryFrom<RawTiling> for Tiling {
    type Error = Error;

    fn try_from(raw: RawTiling) -> Result<Self> {
        Tiling::new(raw.columns, raw.rows)
    }
}

impl Tiling {
    pub fn new(columns: u32, rows: u32) -> Result<Self> {
        if columns == 0 || rows == 0 {
            return Err(Error::InvalidParameter(format!("tiling {columns}x{rows} has an empty axis")));
        }
        if columns.checked_mul(rows).is_none() {
            return Err(Error::InvalidParameter(format!("tiling {columns}x{rows} has too many tiles")));
        }
        Ok(Self { columns, rows })
    }

    /// `None` when the fields were set directly to an out-of-range grid.
    pub fn tile_count(&self) -> Option<u32> {
        self.columns.checked_mul(self.rows)
    }
}

fn is_default<T: Default + PartialEq>(v: &T) -> bool {
    *v == T::default()
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DrawingSettings {
    #[serde(skip_serializing_if = "Transform::is_identity")]
    pub transform:     Transform,
    /// Legacy drawing origin, in pixels.
    #[serde(skip_serializing_if = "is_default")]
    pub origin:        (i32, i32),
    #[serde(skip_serializing_if = "is_default")]
    pub transfer_mode: TransferMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tiling:        Option<Tiling>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_file:   Option<String>,
}

impl DrawingSettings {
    pub fn is_default(&self) -> bool {
        is_default(self)
    }

    pub fn to_bag(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bag(bytes: &[u8]) -> Result<Self> {
        let settings: Self = serde_json::from_slice(bytes)?;
        if !settings.transform.is_finite() {
            return Err(Error::InvalidParameter("non-finite transform in metadata bag".into()));
        }
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_produce_an_empty_object() {
        assert_eq!(DrawingSettings::default().to_bag().unwrap(), b"{}");
        assert!(DrawingSettings::from_bag(b"{}").unwrap().is_default());
    }

    #[test]
    fn bag_round_trip() {
        let s = DrawingSettings {
            transform:     Transform::scale(0.5, 2.0).then(&Transform::translate(3.0, -4.25)),
            origin:        (12, -7),
            transfer_mode: TransferMode::Transparent,
            tiling:        Some(Tiling::new(4, 2).unwrap()),
            source_file:   Some("logo.pict".into()),
        };
        let back = DrawingSettings::from_bag(&s.to_bag().unwrap()).unwrap();
        assert_eq!(back, s);
    }

    #[test]
    fn unknown_bag_keys_are_ignored() {
        let s = DrawingSettings::from_bag(br#"{"origin":[1,2],"future_key":true}"#).unwrap();
        assert_eq!(s.origin, (1, 2));
    }

    #[test]
    fn transform_composition() {
        let t = Transform::scale(2.0, 3.0).then(&Transform::translate(10.0, 20.0));
        assert_eq!(t.apply(1.0, 1.0), (12.0, 23.0));
        assert!(Transform::IDENTITY.then(&Transform::IDENTITY).is_identity());
    }

    #[test]
    fn tiling_rejects_empty_axis() {
        assert!(Tiling::new(0, 3).is_err());
        assert!(Tiling::new(u32::MAX, 2).is_err());
        assert_eq!(Tiling::new(3, 3).unwrap().tile_count(), Some(9));
        assert_eq!(Tiling { columns: u32::MAX, rows: 2 }.tile_count(), None);
    }

    #[test]
    fn bag_tiling_is_validated() {
        assert!(DrawingSettings::from_bag(br#"{"tiling":{"columns":0,"rows":4}}"#).is_err());
        assert!(DrawingSettings::from_bag(br#"{"tiling":{"columns":4294967295,"rows":4294967295}}"#).is_err());
        let s = DrawingSettings::from_bag(br#"{"tiling":{"columns":4,"rows":2}}"#).unwrap();
        assert_eq!(s.tiling.and_then(|t| t.tile_count()), Some(8));
    }
}
