//! Typed parameters for raster engine operations.
//!
//! Every enum parses the upper-case spellings used by GIS toolboxes
//! (`16_BIT_SIGNED`, `MAXIMUM`, `NEAREST`, `VALUE > 32700`) so job files
//! written for those tools keep working, and is validated once at the
//! configuration boundary.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error returned when a parameter string cannot be parsed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid {kind} '{value}': expected one of {expected}")]
pub struct ParseError {
    pub kind: &'static str,
    pub value: String,
    pub expected: &'static str,
}

impl ParseError {
    fn new(kind: &'static str, value: &str, expected: &'static str) -> Self {
        Self {
            kind,
            value: value.to_string(),
            expected,
        }
    }
}

/// Upper-case, and fold `-` and spaces to `_`.
fn normalize(s: &str) -> String {
    s.trim().to_uppercase().replace(['-', ' '], "_")
}

/// Serde goes through the string form so configs use the toolbox spelling.
macro_rules! string_serde {
    ($ty:ty) => {
        impl TryFrom<String> for $ty {
            type Error = ParseError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$ty> for String {
            fn from(value: $ty) -> Self {
                value.to_string()
            }
        }
    };
}

/// Output pixel depth of a mosaicked raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PixelType {
    Bit1,
    Bit2,
    Bit4,
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    F32,
    F64,
}

impl PixelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bit1 => "1_BIT",
            Self::Bit2 => "2_BIT",
            Self::Bit4 => "4_BIT",
            Self::U8 => "8_BIT_UNSIGNED",
            Self::I8 => "8_BIT_SIGNED",
            Self::U16 => "16_BIT_UNSIGNED",
            Self::I16 => "16_BIT_SIGNED",
            Self::U32 => "32_BIT_UNSIGNED",
            Self::I32 => "32_BIT_SIGNED",
            Self::F32 => "32_BIT_FLOAT",
            Self::F64 => "64_BIT",
        }
    }

    /// GDAL data type name used for `-ot` / `--type`.
    pub fn gdal_type(&self) -> &'static str {
        match self {
            Self::Bit1 | Self::Bit2 | Self::Bit4 | Self::U8 => "Byte",
            Self::I8 => "Int8",
            Self::U16 => "UInt16",
            Self::I16 => "Int16",
            Self::U32 => "UInt32",
            Self::I32 => "Int32",
            Self::F32 => "Float32",
            Self::F64 => "Float64",
        }
    }

    /// Sub-byte depths are stored as Byte with an NBITS creation option.
    pub fn nbits(&self) -> Option<u8> {
        match self {
            Self::Bit1 => Some(1),
            Self::Bit2 => Some(2),
            Self::Bit4 => Some(4),
            _ => None,
        }
    }
}

impl FromStr for PixelType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "1_BIT" => Ok(Self::Bit1),
            "2_BIT" => Ok(Self::Bit2),
            "4_BIT" => Ok(Self::Bit4),
            "8_BIT_UNSIGNED" | "BYTE" | "UINT8" => Ok(Self::U8),
            "8_BIT_SIGNED" | "INT8" => Ok(Self::I8),
            "16_BIT_UNSIGNED" | "UINT16" => Ok(Self::U16),
            "16_BIT_SIGNED" | "INT16" => Ok(Self::I16),
            "32_BIT_UNSIGNED" | "UINT32" => Ok(Self::U32),
            "32_BIT_SIGNED" | "INT32" => Ok(Self::I32),
            "32_BIT_FLOAT" | "FLOAT32" => Ok(Self::F32),
            "64_BIT" | "FLOAT64" => Ok(Self::F64),
            _ => Err(ParseError::new(
                "pixel type",
                s,
                "1_BIT, 2_BIT, 4_BIT, 8_BIT_UNSIGNED, 8_BIT_SIGNED, 16_BIT_UNSIGNED, \
                 16_BIT_SIGNED, 32_BIT_UNSIGNED, 32_BIT_SIGNED, 32_BIT_FLOAT, 64_BIT",
            )),
        }
    }
}

impl fmt::Display for PixelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

string_serde!(PixelType);

/// Per-pixel conflict rule where mosaic members overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MosaicMethod {
    First,
    Last,
    Blend,
    Mean,
    Minimum,
    #[default]
    Maximum,
    Sum,
}

impl MosaicMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::First => "FIRST",
            Self::Last => "LAST",
            Self::Blend => "BLEND",
            Self::Mean => "MEAN",
            Self::Minimum => "MINIMUM",
            Self::Maximum => "MAXIMUM",
            Self::Sum => "SUM",
        }
    }
}

impl FromStr for MosaicMethod {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "FIRST" => Ok(Self::First),
            "LAST" => Ok(Self::Last),
            "BLEND" => Ok(Self::Blend),
            "MEAN" => Ok(Self::Mean),
            "MINIMUM" | "MIN" => Ok(Self::Minimum),
            "MAXIMUM" | "MAX" => Ok(Self::Maximum),
            "SUM" => Ok(Self::Sum),
            _ => Err(ParseError::new(
                "mosaic method",
                s,
                "FIRST, LAST, BLEND, MEAN, MINIMUM, MAXIMUM, SUM",
            )),
        }
    }
}

impl fmt::Display for MosaicMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

string_serde!(MosaicMethod);

/// How colormaps of mosaic members are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ColormapMode {
    #[default]
    First,
    Last,
    Match,
    Reject,
}

impl ColormapMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::First => "FIRST",
            Self::Last => "LAST",
            Self::Match => "MATCH",
            Self::Reject => "REJECT",
        }
    }
}

impl FromStr for ColormapMode {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "FIRST" => Ok(Self::First),
            "LAST" => Ok(Self::Last),
            "MATCH" => Ok(Self::Match),
            "REJECT" => Ok(Self::Reject),
            _ => Err(ParseError::new(
                "colormap mode",
                s,
                "FIRST, LAST, MATCH, REJECT",
            )),
        }
    }
}

impl fmt::Display for ColormapMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

string_serde!(ColormapMode);

/// Resampling applied while reprojecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ResamplingMethod {
    #[default]
    Nearest,
    Bilinear,
    Cubic,
    Majority,
}

impl ResamplingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nearest => "NEAREST",
            Self::Bilinear => "BILINEAR",
            Self::Cubic => "CUBIC",
            Self::Majority => "MAJORITY",
        }
    }

    /// GDAL `-r` argument.
    pub fn gdal_name(&self) -> &'static str {
        match self {
            Self::Nearest => "near",
            Self::Bilinear => "bilinear",
            Self::Cubic => "cubic",
            Self::Majority => "mode",
        }
    }
}

impl FromStr for ResamplingMethod {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "NEAREST" | "NEAR" => Ok(Self::Nearest),
            "BILINEAR" => Ok(Self::Bilinear),
            "CUBIC" | "BICUBIC" => Ok(Self::Cubic),
            "MAJORITY" | "MODE" => Ok(Self::Majority),
            _ => Err(ParseError::new(
                "resampling method",
                s,
                "NEAREST, BILINEAR, CUBIC, MAJORITY",
            )),
        }
    }
}

impl fmt::Display for ResamplingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

string_serde!(ResamplingMethod);

/// Output cell size in target units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CellSize {
    pub x: f64,
    pub y: f64,
}

impl CellSize {
    pub fn square(size: f64) -> Self {
        Self { x: size, y: size }
    }

    /// Parse a cell size where `#` (or an empty string) means "engine default".
    pub fn parse_optional(s: &str) -> Result<Option<Self>, ParseError> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed == "#" {
            return Ok(None);
        }
        trimmed.parse().map(Some)
    }
}

impl FromStr for CellSize {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseError::new("cell size", s, "'<size>' or '<x> <y>' with positive numbers");
        let parts: Vec<f64> = s
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|p| !p.is_empty())
            .map(|p| p.parse::<f64>().map_err(|_| err()))
            .collect::<Result<_, _>>()?;

        let size = match parts.as_slice() {
            [s] => Self::square(*s),
            [x, y] => Self { x: *x, y: *y },
            _ => return Err(err()),
        };

        if size.x > 0.0 && size.y > 0.0 && size.x.is_finite() && size.y.is_finite() {
            Ok(size)
        } else {
            Err(err())
        }
    }
}

impl fmt::Display for CellSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.x, self.y)
    }
}

string_serde!(CellSize);

/// Comparison operator of a nodata predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Comparison {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
}

impl Comparison {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Eq => "=",
            Self::Ne => "<>",
        }
    }

    /// Operator spelling for numpy expressions.
    pub fn numpy_symbol(&self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            other => other.symbol(),
        }
    }

    pub fn evaluate(&self, lhs: f64, rhs: f64) -> bool {
        match self {
            Self::Gt => lhs > rhs,
            Self::Ge => lhs >= rhs,
            Self::Lt => lhs < rhs,
            Self::Le => lhs <= rhs,
            Self::Eq => lhs == rhs,
            Self::Ne => lhs != rhs,
        }
    }
}

/// Cells for which the predicate holds are set to nodata.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodataPredicate {
    pub op: Comparison,
    pub threshold: f64,
}

impl NodataPredicate {
    pub fn new(op: Comparison, threshold: f64) -> Self {
        Self { op, threshold }
    }

    pub fn greater_than(threshold: f64) -> Self {
        Self::new(Comparison::Gt, threshold)
    }

    pub fn less_than(threshold: f64) -> Self {
        Self::new(Comparison::Lt, threshold)
    }

    pub fn matches(&self, value: f64) -> bool {
        self.op.evaluate(value, self.threshold)
    }
}

impl FromStr for NodataPredicate {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || {
            ParseError::new(
                "nodata predicate",
                s,
                "'VALUE <op> <number>' with op in > >= < <= = <>",
            )
        };

        let mut rest = s.trim();
        if rest.get(..5).is_some_and(|head| head.eq_ignore_ascii_case("value")) {
            rest = rest[5..].trim_start();
        }

        // Two-character operators first so ">=" is not read as ">".
        let (op, tail) = [
            (">=", Comparison::Ge),
            ("<=", Comparison::Le),
            ("<>", Comparison::Ne),
            ("!=", Comparison::Ne),
            ("==", Comparison::Eq),
            (">", Comparison::Gt),
            ("<", Comparison::Lt),
            ("=", Comparison::Eq),
        ]
        .iter()
        .find_map(|(symbol, op)| rest.strip_prefix(symbol).map(|tail| (*op, tail)))
        .ok_or_else(err)?;

        let threshold: f64 = tail.trim().parse().map_err(|_| err())?;
        if !threshold.is_finite() {
            return Err(err());
        }

        Ok(Self { op, threshold })
    }
}

impl fmt::Display for NodataPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VALUE {} {}", self.op.symbol(), self.threshold)
    }
}

string_serde!(NodataPredicate);

/// Spatial metadata read from a representative raster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterDescription {
    /// Spatial reference as WKT
    pub spatial_reference: String,
    /// Mean cell width in source units
    pub cell_width: f64,
    pub band_count: u32,
}
