//! Cell element types and the name registry used to resolve them.
//!
//! Names are matched leniently: a registered name resolves when it occurs
//! anywhere inside the lower-cased input, so namespaced spellings such as
//! `numpy.float32` or `GDT_UInt16` work. The registry is ordered from the
//! most specific name to the least specific, which keeps `uint16` from being
//! captured by `int16` or `int`. Inputs that contain several registered names
//! (e.g. `int64`, which contains `int`) still resolve to the first hit.

use crate::error::{MovingWindowError, Result};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    UInt8,
    Int8,
    UInt16,
    Int16,
    UInt32,
    Int32,
    Float32,
    Float64,
    Complex64,
    Complex128,
}

/// Registered names, longest and most specific first.
const REGISTRY: &[(&str, DataType)] = &[
    ("complex128", DataType::Complex128),
    ("complex64", DataType::Complex64),
    ("float32", DataType::Float32),
    ("float64", DataType::Float64),
    ("uint16", DataType::UInt16),
    ("uint32", DataType::UInt32),
    ("double", DataType::Float64),
    ("uint8", DataType::UInt8),
    ("int16", DataType::Int16),
    ("int32", DataType::Int32),
    ("float", DataType::Float32),
    ("int8", DataType::Int8),
    ("byte", DataType::UInt8),
    ("u16", DataType::UInt16),
    ("u32", DataType::UInt32),
    ("i16", DataType::Int16),
    ("i32", DataType::Int32),
    ("f32", DataType::Float32),
    ("f64", DataType::Float64),
    ("int", DataType::Int32),
    ("u8", DataType::UInt8),
    ("i8", DataType::Int8),
];

impl DataType {
    /// Resolve a user-supplied type name. `None` means no registered name
    /// occurs in the input.
    pub fn lookup(name: &str) -> Option<Self> {
        let name = name.trim().to_lowercase();
        REGISTRY
            .iter()
            .find(|(registered, _)| name.contains(registered))
            .map(|&(_, data_type)| data_type)
    }

    /// Width of one element in bytes.
    pub fn size_of(self) -> usize {
        match self {
            DataType::UInt8 | DataType::Int8 => 1,
            DataType::UInt16 | DataType::Int16 => 2,
            DataType::UInt32 | DataType::Int32 | DataType::Float32 => 4,
            DataType::Float64 | DataType::Complex64 => 8,
            DataType::Complex128 => 16,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DataType::UInt8 => "uint8",
            DataType::Int8 => "int8",
            DataType::UInt16 => "uint16",
            DataType::Int16 => "int16",
            DataType::UInt32 => "uint32",
            DataType::Int32 => "int32",
            DataType::Float32 => "float32",
            DataType::Float64 => "float64",
            DataType::Complex64 => "complex64",
            DataType::Complex128 => "complex128",
        }
    }

    pub fn is_unsigned(self) -> bool {
        matches!(self, DataType::UInt8 | DataType::UInt16 | DataType::UInt32)
    }

    pub fn is_float(self) -> bool {
        matches!(self, DataType::Float32 | DataType::Float64)
    }

    pub fn is_complex(self) -> bool {
        matches!(self, DataType::Complex64 | DataType::Complex128)
    }

    /// Round-trip `value` through this type, so the result is exactly what a
    /// cell of this type would hold. Integers round to nearest and saturate;
    /// NaN becomes 0 for integer types. Complex types keep the value as-is.
    pub fn cast(self, value: f64) -> f64 {
        match self {
            DataType::UInt8 => u8::from_f64(value).to_f64(),
            DataType::Int8 => i8::from_f64(value).to_f64(),
            DataType::UInt16 => u16::from_f64(value).to_f64(),
            DataType::Int16 => i16::from_f64(value).to_f64(),
            DataType::UInt32 => u32::from_f64(value).to_f64(),
            DataType::Int32 => i32::from_f64(value).to_f64(),
            DataType::Float32 => f32::from_f64(value).to_f64(),
            DataType::Float64 | DataType::Complex64 | DataType::Complex128 => value,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DataType {
    type Err = MovingWindowError;

    fn from_str(s: &str) -> Result<Self> {
        Self::lookup(s).ok_or_else(|| MovingWindowError::UnknownDataType(s.to_string()))
    }
}

/// A concrete Rust type that can back raster cells in memory or on disc.
pub trait Element: bytemuck::Pod + Send + Sync + 'static {
    const DATA_TYPE: DataType;

    fn from_f64(value: f64) -> Self;

    fn to_f64(self) -> f64;
}

macro_rules! impl_integer_element {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl Element for $t {
                const DATA_TYPE: DataType = DataType::$variant;

                #[inline]
                fn from_f64(value: f64) -> Self {
                    value.round() as $t
                }

                #[inline]
                fn to_f64(self) -> f64 {
                    f64::from(self)
                }
            }
        )*
    };
}

impl_integer_element!(
    u8 => UInt8,
    i8 => Int8,
    u16 => UInt16,
    i16 => Int16,
    u32 => UInt32,
    i32 => Int32,
);

impl Element for f32 {
    const DATA_TYPE: DataType = DataType::Float32;

    #[inline]
    fn from_f64(value: f64) -> Self {
        value as f32
    }

    #[inline]
    fn to_f64(self) -> f64 {
        f64::from(self)
    }
}

impl Element for f64 {
    const DATA_TYPE: DataType = DataType::Float64;

    #[inline]
    fn from_f64(value: f64) -> Self {
        value
    }

    #[inline]
    fn to_f64(self) -> f64 {
        self
    }
}

/// Run `$body` with `$t` aliased to the [`Element`] type behind `$data_type`.
/// Complex types have no element type and produce `UnsupportedDataType`.
macro_rules! dispatch_element {
    ($data_type:expr, $t:ident => $body:expr) => {
        match $data_type {
            $crate::dtype::DataType::UInt8 => {
                type $t = u8;
                $body
            }
            $crate::dtype::DataType::Int8 => {
                type $t = i8;
                $body
            }
            $crate::dtype::DataType::UInt16 => {
                type $t = u16;
                $body
            }
            $crate::dtype::DataType::Int16 => {
                type $t = i16;
                $body
            }
            $crate::dtype::DataType::UInt32 => {
                type $t = u32;
                $body
            }
            $crate::dtype::DataType::Int32 => {
                type $t = i32;
                $body
            }
            $crate::dtype::DataType::Float32 => {
                type $t = f32;
                $body
            }
            $crate::dtype::DataType::Float64 => {
                type $t = f64;
                $body
            }
            other @ ($crate::dtype::DataType::Complex64
            | $crate::dtype::DataType::Complex128) => {
                Err($crate::error::MovingWindowError::UnsupportedDataType(other))
            }
        }
    };
}

pub(crate) use dispatch_element;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_plain_names() {
        assert_eq!(DataType::lookup("uint8"), Some(DataType::UInt8));
        assert_eq!(DataType::lookup("int16"), Some(DataType::Int16));
        assert_eq!(DataType::lookup("float"), Some(DataType::Float32));
        assert_eq!(DataType::lookup("int"), Some(DataType::Int32));
        assert_eq!(DataType::lookup("byte"), Some(DataType::UInt8));
        assert_eq!(DataType::lookup("complex128"), Some(DataType::Complex128));
    }

    #[test]
    fn test_lookup_namespaced_and_case_insensitive() {
        assert_eq!(DataType::lookup("numpy.float32"), Some(DataType::Float32));
        assert_eq!(DataType::lookup("np.UInt16"), Some(DataType::UInt16));
        assert_eq!(DataType::lookup("GDT_Float64"), Some(DataType::Float64));
    }

    #[test]
    fn test_specific_names_win_over_general_ones() {
        // "int16" and "int" both occur inside "uint16"
        assert_eq!(DataType::lookup("uint16"), Some(DataType::UInt16));
        assert_eq!(DataType::lookup("uint8"), Some(DataType::UInt8));
        assert_eq!(DataType::lookup("float64"), Some(DataType::Float64));
    }

    #[test]
    fn test_every_registered_name_resolves_to_itself() {
        for &(name, data_type) in REGISTRY {
            assert_eq!(DataType::lookup(name), Some(data_type), "{name}");
        }
    }

    #[test]
    fn test_lookup_unknown() {
        assert_eq!(DataType::lookup("string"), None);
        assert!("bool".parse::<DataType>().is_err());
    }

    #[test]
    fn test_size_of() {
        assert_eq!(DataType::UInt8.size_of(), 1);
        assert_eq!(DataType::Int16.size_of(), 2);
        assert_eq!(DataType::Float32.size_of(), 4);
        assert_eq!(DataType::Float64.size_of(), 8);
        assert_eq!(DataType::Complex128.size_of(), 16);
    }

    #[test]
    fn test_cast_rounds_and_saturates() {
        assert_eq!(DataType::UInt8.cast(2.6), 3.0);
        assert_eq!(DataType::UInt8.cast(300.0), 255.0);
        assert_eq!(DataType::UInt8.cast(-4.0), 0.0);
        assert_eq!(DataType::Int16.cast(-2.5), -3.0);
        assert_eq!(DataType::Int32.cast(f64::NAN), 0.0);
        assert_eq!(DataType::Float64.cast(0.1), 0.1);
        assert_eq!(DataType::Float32.cast(0.1), f64::from(0.1f32));
    }
}
