//! Runtime type tags and the typed payload values they describe.
//!
//! Every read, write, and remote-call argument is dispatched through [`TypeTag`],
//! a closed enumeration of the payload shapes the toolkit understands. The
//! matching [`Value`] variant owns the encode/decode logic for its shape, so no
//! string-keyed dispatch survives past the request gateway.

use crate::error::{Error, Result};

/// Largest value a 64-bit float can hold while still representing every
/// integer below it exactly (2^53).
const MAX_EXACT_F64: f64 = 9_007_199_254_740_992.0;

/// The closed set of payload shapes recognized by the typed I/O surface.
///
/// Tag names are a wire contract: they parse from exactly
/// `i8,u8,i16,u16,i32,u32,i64,u64,f32,f64,bool,ptr,uptr,char,string,vec3,vec4`.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum TypeTag {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    Bool,
    Ptr,
    UPtr,
    Char,
    String,
    Vec3,
    Vec4,
}

impl TypeTag {
    /// Parses a tag from its canonical name.
    pub fn parse(name: &str) -> Result<Self> {
        Ok(match name {
            "i8" => Self::I8,
            "u8" => Self::U8,
            "i16" => Self::I16,
            "u16" => Self::U16,
            "i32" => Self::I32,
            "u32" => Self::U32,
            "i64" => Self::I64,
            "u64" => Self::U64,
            "f32" => Self::F32,
            "f64" => Self::F64,
            "bool" => Self::Bool,
            "ptr" => Self::Ptr,
            "uptr" => Self::UPtr,
            "char" => Self::Char,
            "string" => Self::String,
            "vec3" => Self::Vec3,
            "vec4" => Self::Vec4,
            _ => return Err(Error::UnknownType(name.to_string())),
        })
    }

    /// Byte width of the tag's in-memory representation, or `None` for the
    /// unsized `string` tag. Pointer tags follow the native pointer width.
    pub fn size(self) -> Option<usize> {
        Some(match self {
            Self::I8 | Self::U8 | Self::Bool | Self::Char => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::I64 | Self::U64 | Self::F64 => 8,
            Self::Ptr | Self::UPtr => size_of::<usize>(),
            Self::Vec3 => 12,
            Self::Vec4 => 16,
            Self::String => return None,
        })
    }
}

/// Three packed single-precision floats in `xyz` order.
#[derive(Clone, Copy, PartialEq, Debug, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Four packed single-precision floats in `wxyz` order.
///
/// The w-first layout is a wire contract shared with the scan and remote-call
/// surfaces; do not reorder.
#[derive(Clone, Copy, PartialEq, Debug, Default)]
pub struct Vec4 {
    pub w: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// A typed payload, one constructor per supported [`TypeTag`].
#[derive(Clone, PartialEq, Debug)]
pub enum Value {
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Bool(bool),
    Ptr(isize),
    UPtr(usize),
    Char(u8),
    String(String),
    Vec3(Vec3),
    Vec4(Vec4),
}

impl Value {
    /// The tag describing this value's shape.
    pub fn tag(&self) -> TypeTag {
        match self {
            Value::I8(_) => TypeTag::I8,
            Value::U8(_) => TypeTag::U8,
            Value::I16(_) => TypeTag::I16,
            Value::U16(_) => TypeTag::U16,
            Value::I32(_) => TypeTag::I32,
            Value::U32(_) => TypeTag::U32,
            Value::I64(_) => TypeTag::I64,
            Value::U64(_) => TypeTag::U64,
            Value::F32(_) => TypeTag::F32,
            Value::F64(_) => TypeTag::F64,
            Value::Bool(_) => TypeTag::Bool,
            Value::Ptr(_) => TypeTag::Ptr,
            Value::UPtr(_) => TypeTag::UPtr,
            Value::Char(_) => TypeTag::Char,
            Value::String(_) => TypeTag::String,
            Value::Vec3(_) => TypeTag::Vec3,
            Value::Vec4(_) => TypeTag::Vec4,
        }
    }

    /// Serializes the value to the byte image written into a target process.
    ///
    /// Scalars are little-endian. Strings carry a trailing NUL byte, matching
    /// the write contract of the typed I/O surface.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Value::I8(v) => v.to_le_bytes().to_vec(),
            Value::U8(v) => v.to_le_bytes().to_vec(),
            Value::I16(v) => v.to_le_bytes().to_vec(),
            Value::U16(v) => v.to_le_bytes().to_vec(),
            Value::I32(v) => v.to_le_bytes().to_vec(),
            Value::U32(v) => v.to_le_bytes().to_vec(),
            Value::I64(v) => v.to_le_bytes().to_vec(),
            Value::U64(v) => v.to_le_bytes().to_vec(),
            Value::F32(v) => v.to_le_bytes().to_vec(),
            Value::F64(v) => v.to_le_bytes().to_vec(),
            Value::Bool(v) => vec![*v as u8],
            Value::Ptr(v) => v.to_le_bytes().to_vec(),
            Value::UPtr(v) => v.to_le_bytes().to_vec(),
            Value::Char(v) => vec![*v],
            Value::String(v) => {
                let mut bytes = v.as_bytes().to_vec();
                bytes.push(0);
                bytes
            }
            Value::Vec3(v) => {
                let mut bytes = Vec::with_capacity(12);
                for f in [v.x, v.y, v.z] {
                    bytes.extend_from_slice(&f.to_le_bytes());
                }
                bytes
            }
            Value::Vec4(v) => {
                let mut bytes = Vec::with_capacity(16);
                for f in [v.w, v.x, v.y, v.z] {
                    bytes.extend_from_slice(&f.to_le_bytes());
                }
                bytes
            }
        }
    }

    /// Deserializes a value of the given fixed-size tag from raw target bytes.
    ///
    /// `string` decodes up to the first NUL byte (or the whole slice if none);
    /// every other tag requires exactly `tag.size()` bytes.
    pub fn decode(tag: TypeTag, bytes: &[u8]) -> Result<Self> {
        if tag == TypeTag::String {
            let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
            return Ok(Value::String(
                String::from_utf8_lossy(&bytes[..end]).into_owned(),
            ));
        }

        let expected = tag.size().expect("fixed-size tag");
        if bytes.len() != expected {
            return Err(Error::PartialTransfer {
                expected,
                actual: bytes.len(),
            });
        }

        Ok(match tag {
            TypeTag::I8 => Value::I8(i8::from_le_bytes([bytes[0]])),
            TypeTag::U8 => Value::U8(bytes[0]),
            TypeTag::I16 => Value::I16(i16::from_le_bytes(bytes.try_into().unwrap())),
            TypeTag::U16 => Value::U16(u16::from_le_bytes(bytes.try_into().unwrap())),
            TypeTag::I32 => Value::I32(i32::from_le_bytes(bytes.try_into().unwrap())),
            TypeTag::U32 => Value::U32(u32::from_le_bytes(bytes.try_into().unwrap())),
            TypeTag::I64 => Value::I64(i64::from_le_bytes(bytes.try_into().unwrap())),
            TypeTag::U64 => Value::U64(u64::from_le_bytes(bytes.try_into().unwrap())),
            TypeTag::F32 => Value::F32(f32::from_le_bytes(bytes.try_into().unwrap())),
            TypeTag::F64 => Value::F64(f64::from_le_bytes(bytes.try_into().unwrap())),
            TypeTag::Bool => Value::Bool(bytes[0] != 0),
            TypeTag::Ptr => Value::Ptr(isize::from_le_bytes(bytes.try_into().unwrap())),
            TypeTag::UPtr => Value::UPtr(usize::from_le_bytes(bytes.try_into().unwrap())),
            TypeTag::Char => Value::Char(bytes[0]),
            TypeTag::Vec3 => Value::Vec3(Vec3 {
                x: f32::from_le_bytes(bytes[0..4].try_into().unwrap()),
                y: f32::from_le_bytes(bytes[4..8].try_into().unwrap()),
                z: f32::from_le_bytes(bytes[8..12].try_into().unwrap()),
            }),
            TypeTag::Vec4 => Value::Vec4(Vec4 {
                w: f32::from_le_bytes(bytes[0..4].try_into().unwrap()),
                x: f32::from_le_bytes(bytes[4..8].try_into().unwrap()),
                y: f32::from_le_bytes(bytes[8..12].try_into().unwrap()),
                z: f32::from_le_bytes(bytes[12..16].try_into().unwrap()),
            }),
            TypeTag::String => unreachable!(),
        })
    }
}

/// Return shape of a remote function invocation.
///
/// `void-return` and `string-return` are the two tags with no direct
/// [`TypeTag`] counterpart: the first discards the captured word, the second
/// treats it as a pointer to a NUL-terminated sequence in the target.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ReturnTag {
    Void,
    String,
    Scalar(TypeTag),
}

impl ReturnTag {
    /// Parses a return tag: `void-return`, `string-return`, or any fixed-size
    /// [`TypeTag`] name.
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "void-return" => Ok(Self::Void),
            "string-return" => Ok(Self::String),
            _ => match TypeTag::parse(name)? {
                TypeTag::String => Err(Error::InvalidArgument(
                    "use 'string-return' for string-returning functions".to_string(),
                )),
                tag => Ok(Self::Scalar(tag)),
            },
        }
    }
}

/// Widening of caller-supplied numbers into pointer-sized integers.
///
/// Addresses and 64-bit payloads may arrive as native integers or as
/// double-precision floats; the float path makes precision loss explicit.
pub trait IntoAddress {
    fn into_address(self) -> Result<u64>;
}

impl IntoAddress for u64 {
    fn into_address(self) -> Result<u64> {
        Ok(self)
    }
}

impl IntoAddress for u32 {
    fn into_address(self) -> Result<u64> {
        Ok(self as u64)
    }
}

impl IntoAddress for usize {
    fn into_address(self) -> Result<u64> {
        Ok(self as u64)
    }
}

impl IntoAddress for i64 {
    fn into_address(self) -> Result<u64> {
        if self < 0 {
            return Err(Error::InvalidArgument(format!(
                "address must be non-negative, got {self}"
            )));
        }
        Ok(self as u64)
    }
}

impl IntoAddress for f64 {
    fn into_address(self) -> Result<u64> {
        if !self.is_finite() || self < 0.0 {
            return Err(Error::InvalidArgument(format!(
                "address must be a finite non-negative number, got {self}"
            )));
        }
        if self.fract() != 0.0 || self > MAX_EXACT_F64 {
            return Err(Error::PrecisionLoss(self));
        }
        Ok(self as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_canonical_tag_name() {
        let names = [
            "i8", "u8", "i16", "u16", "i32", "u32", "i64", "u64", "f32", "f64", "bool", "ptr",
            "uptr", "char", "string", "vec3", "vec4",
        ];
        for name in names {
            assert!(TypeTag::parse(name).is_ok(), "failed to parse '{name}'");
        }
        assert!(matches!(
            TypeTag::parse("dword"),
            Err(Error::UnknownType(_))
        ));
        assert!(matches!(TypeTag::parse(""), Err(Error::UnknownType(_))));
    }

    #[test]
    fn fixed_tags_report_their_width() {
        assert_eq!(TypeTag::U8.size(), Some(1));
        assert_eq!(TypeTag::I16.size(), Some(2));
        assert_eq!(TypeTag::F32.size(), Some(4));
        assert_eq!(TypeTag::U64.size(), Some(8));
        assert_eq!(TypeTag::Ptr.size(), Some(size_of::<usize>()));
        assert_eq!(TypeTag::Vec3.size(), Some(12));
        assert_eq!(TypeTag::Vec4.size(), Some(16));
        assert_eq!(TypeTag::String.size(), None);
    }

    #[test]
    fn scalar_encode_decode_round_trips() {
        let samples = [
            Value::I8(-5),
            Value::U8(0xFF),
            Value::I16(-1234),
            Value::U16(54_321),
            Value::I32(-559038737),
            Value::U32(0xDEADBEEF),
            Value::I64(i64::MIN),
            Value::U64(u64::MAX),
            Value::F32(3.25),
            Value::F64(-2.5e18),
            Value::Bool(true),
            Value::Ptr(-1),
            Value::UPtr(0x7FFE_0000),
            Value::Char(b'A'),
        ];
        for value in samples {
            let bytes = value.encode();
            assert_eq!(bytes.len(), value.tag().size().unwrap());
            assert_eq!(Value::decode(value.tag(), &bytes).unwrap(), value);
        }
    }

    #[test]
    fn same_bytes_reinterpret_between_signed_and_unsigned() {
        let bytes = Value::U32(0xDEADBEEF).encode();
        assert_eq!(
            Value::decode(TypeTag::I32, &bytes).unwrap(),
            Value::I32(-559038737)
        );
    }

    #[test]
    fn vec4_packs_w_first() {
        let v = Value::Vec4(Vec4 {
            w: 1.0,
            x: 2.0,
            y: 3.0,
            z: 4.0,
        });
        let bytes = v.encode();
        assert_eq!(&bytes[0..4], &1.0f32.to_le_bytes());
        assert_eq!(&bytes[12..16], &4.0f32.to_le_bytes());
        assert_eq!(Value::decode(TypeTag::Vec4, &bytes).unwrap(), v);
    }

    #[test]
    fn vec3_round_trips() {
        let v = Value::Vec3(Vec3 {
            x: -1.5,
            y: 0.0,
            z: 9.75,
        });
        let bytes = v.encode();
        assert_eq!(bytes.len(), 12);
        assert_eq!(Value::decode(TypeTag::Vec3, &bytes).unwrap(), v);
    }

    #[test]
    fn string_encode_appends_nul_and_decode_stops_at_it() {
        let value = Value::String("hello".to_string());
        let bytes = value.encode();
        assert_eq!(bytes, b"hello\0");

        let decoded = Value::decode(TypeTag::String, b"hello\0world").unwrap();
        assert_eq!(decoded, Value::String("hello".to_string()));
    }

    #[test]
    fn decode_rejects_short_buffers() {
        assert!(matches!(
            Value::decode(TypeTag::U32, &[1, 2]),
            Err(Error::PartialTransfer {
                expected: 4,
                actual: 2
            })
        ));
    }

    #[test]
    fn return_tag_parses_special_names() {
        assert_eq!(ReturnTag::parse("void-return").unwrap(), ReturnTag::Void);
        assert_eq!(ReturnTag::parse("string-return").unwrap(), ReturnTag::String);
        assert_eq!(
            ReturnTag::parse("u32").unwrap(),
            ReturnTag::Scalar(TypeTag::U32)
        );
        assert!(ReturnTag::parse("string").is_err());
    }

    #[test]
    fn float_widening_flags_precision_loss() {
        assert_eq!(4096.0f64.into_address().unwrap(), 4096);
        assert!(matches!(0.5f64.into_address(), Err(Error::PrecisionLoss(_))));
        assert!(matches!(
            (MAX_EXACT_F64 * 2.0).into_address(),
            Err(Error::PrecisionLoss(_))
        ));
        assert!((-1.0f64).into_address().is_err());
        assert!(f64::NAN.into_address().is_err());
    }

    #[test]
    fn negative_integer_addresses_are_rejected() {
        assert!((-1i64).into_address().is_err());
        assert_eq!(42i64.into_address().unwrap(), 42);
    }
}
