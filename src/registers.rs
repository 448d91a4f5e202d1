pub mod enums;

use jiff::civil::Time;

pub use enums::{EnumTable, RegisterEnum};

/// A decoded register value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Bool(bool),
    Byte(u8),
    U16(u16),
    I16(i16),
    F32(f32),
    Str(String),
    /// Name of a member of a closed enumeration table.
    Enum(&'static str),
    Time(Time),
}

impl Value {
    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        Some(match *self {
            Value::Bool(b) => f64::from(u8::from(b)),
            Value::Byte(n) => f64::from(n),
            Value::U16(n) => f64::from(n),
            Value::I16(n) => f64::from(n),
            Value::F32(n) => f64::from(n),
            Value::Str(_) | Value::Enum(_) | Value::Time(_) => return None,
        })
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Value::Bool(b) => Some(b),
            Value::Byte(_) | Value::U16(_) | Value::I16(_) => self.as_f64().map(|v| v != 0.0),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            Value::Enum(s) => Some(*s),
            _ => None,
        }
    }

    /// Interpret an enum value as a member of the typed enumeration `E`.
    pub fn as_enum<E: RegisterEnum>(&self) -> Option<E> {
        match self {
            Value::Enum(name) => E::from_name(name),
            _ => None,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Byte(_) => "byte",
            Value::U16(_) => "u16",
            Value::I16(_) => "i16",
            Value::F32(_) => "f32",
            Value::Str(_) => "string",
            Value::Enum(_) => "enum",
            Value::Time(_) => "time",
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Byte(n) => write!(f, "{n}"),
            Value::U16(n) => write!(f, "{n}"),
            Value::I16(n) => write!(f, "{n}"),
            Value::F32(n) => write!(f, "{n}"),
            Value::Str(s) => f.write_str(s),
            Value::Enum(s) => f.write_str(s),
            Value::Time(t) => write!(f, "{:02}:{:02}", t.hour(), t.minute()),
        }
    }
}

impl serde::Serialize for Value {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Byte(n) => serializer.serialize_u8(*n),
            Value::U16(n) => serializer.serialize_u16(*n),
            Value::I16(n) => serializer.serialize_i16(*n),
            Value::F32(n) => serializer.serialize_f32(*n),
            Value::Str(s) => serializer.serialize_str(s),
            Value::Enum(s) => serializer.serialize_str(s),
            Value::Time(_) => serializer.collect_str(self),
        }
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum DecodeError {
    #[error("truncated register block (need {needed} registers, have {available})")]
    Truncated { needed: usize, available: usize },
    #[error("unrecognized enum value {0:?}")]
    UnrecognizedEnumValue(String),
    #[error("malformed time {hour:02}:{minute:02}")]
    MalformedTime { hour: u16, minute: u16 },
    #[error("string registers do not contain valid UTF-8")]
    InvalidString(#[source] std::string::FromUtf8Error),
    #[error("bit {0} is outside of a 16 bit register")]
    InvalidBit(u8),
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum EncodeError {
    #[error("a {descriptor} register cannot hold a {value} value")]
    TypeMismatch { descriptor: &'static str, value: &'static str },
    #[error("{value} does not fit into a {descriptor} register")]
    OutOfRange { descriptor: &'static str, value: f64 },
    #[error("string of {len} bytes does not fit into {words} registers")]
    StringTooLong { len: usize, words: u16 },
    #[error("string must not end with padding characters")]
    TrailingPadding,
    #[error("`{0}` is not a member of the enumeration")]
    UnknownEnumMember(String),
    #[error("register window of {got} words is too small, need {needed}")]
    WindowTooSmall { needed: usize, got: usize },
    #[error("bit {0} is outside of a 16 bit register")]
    InvalidBit(u8),
}

#[derive(thiserror::Error, Debug)]
pub enum ParseValueError {
    #[error("`{0}` is not a boolean")]
    Bool(String),
    #[error("`{1}` is not a valid {0}")]
    Number(&'static str, String),
    #[error("`{0}` is not a time of the form HH:MM")]
    Time(String),
    #[error("`{0}` is not a member of the enumeration")]
    Enum(String),
}

/// Where and how one value is stored inside a register block.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RegisterInputDescriptor {
    /// A single bit of a 16-bit register.
    Flag { starting_register: u16, bit: u8 },
    /// Low byte of a register.
    Byte { starting_register: u16 },
    /// IEEE-754 single precision float spanning two registers.
    Float32 { starting_register: u16 },
    SignedInt { starting_register: u16 },
    UnsignedInt { starting_register: u16 },
    /// Fixed-length text, two characters per register, padded with NUL or space.
    String { starting_register: u16, number_of_words: u16 },
    /// A string register whose content is one of a closed set of values.
    StrEnum { starting_register: u16, number_of_words: u16, values: EnumTable<&'static str> },
    /// A byte register whose content is one of a closed set of values.
    IntEnum { starting_register: u16, values: EnumTable<u8> },
    /// Hour in the first register, minute in the second.
    Time { starting_register: u16 },
}

impl RegisterInputDescriptor {
    pub const fn flag(starting_register: u16, bit: u8) -> Self {
        Self::Flag { starting_register, bit }
    }
    pub const fn byte(starting_register: u16) -> Self {
        Self::Byte { starting_register }
    }
    pub const fn float32(starting_register: u16) -> Self {
        Self::Float32 { starting_register }
    }
    pub const fn signed(starting_register: u16) -> Self {
        Self::SignedInt { starting_register }
    }
    pub const fn unsigned(starting_register: u16) -> Self {
        Self::UnsignedInt { starting_register }
    }
    pub const fn string(starting_register: u16, number_of_words: u16) -> Self {
        Self::String { starting_register, number_of_words }
    }
    pub const fn str_enum<E: RegisterEnum<Raw = &'static str>>(
        starting_register: u16,
        number_of_words: u16,
    ) -> Self {
        Self::StrEnum { starting_register, number_of_words, values: E::TABLE }
    }
    pub const fn int_enum<E: RegisterEnum<Raw = u8>>(starting_register: u16) -> Self {
        Self::IntEnum { starting_register, values: E::TABLE }
    }
    pub const fn time(starting_register: u16) -> Self {
        Self::Time { starting_register }
    }

    /// Offset of the first register, relative to the owning block.
    pub const fn starting_register(&self) -> u16 {
        match *self {
            Self::Flag { starting_register, .. }
            | Self::Byte { starting_register }
            | Self::Float32 { starting_register }
            | Self::SignedInt { starting_register }
            | Self::UnsignedInt { starting_register }
            | Self::String { starting_register, .. }
            | Self::StrEnum { starting_register, .. }
            | Self::IntEnum { starting_register, .. }
            | Self::Time { starting_register } => starting_register,
        }
    }

    /// Number of consecutive registers the value occupies.
    pub const fn word_span(&self) -> u16 {
        match *self {
            Self::Flag { .. }
            | Self::Byte { .. }
            | Self::SignedInt { .. }
            | Self::UnsignedInt { .. }
            | Self::IntEnum { .. } => 1,
            Self::Float32 { .. } | Self::Time { .. } => 2,
            Self::String { number_of_words, .. } | Self::StrEnum { number_of_words, .. } => {
                number_of_words
            }
        }
    }

    /// Whether encoding needs the current register content (to preserve sibling bits).
    pub const fn needs_current_value(&self) -> bool {
        matches!(self, Self::Flag { .. })
    }

    /// Short name of the wire encoding.
    pub const fn encoding(&self) -> &'static str {
        match self {
            Self::Flag { .. } => "flag",
            Self::Byte { .. } => "byte",
            Self::Float32 { .. } => "f32",
            Self::SignedInt { .. } => "i16",
            Self::UnsignedInt { .. } => "u16",
            Self::String { .. } => "string",
            Self::StrEnum { .. } => "string enum",
            Self::IntEnum { .. } => "byte enum",
            Self::Time { .. } => "time",
        }
    }

    /// The registers this value occupies in `block`, a buffer starting at the block start.
    fn window<'a>(&self, block: &'a [u16]) -> Result<&'a [u16], DecodeError> {
        let start = usize::from(self.starting_register());
        let end = start + usize::from(self.word_span());
        block.get(start..end).ok_or(DecodeError::Truncated { needed: end, available: block.len() })
    }

    /// Decode this value out of a buffer holding the registers of the owning block.
    pub fn decode(&self, block: &[u16]) -> Result<Value, DecodeError> {
        let words = self.window(block)?;
        Ok(match *self {
            Self::Flag { bit, .. } => {
                let shifted = words[0].checked_shr(u32::from(bit));
                Value::Bool(shifted.ok_or(DecodeError::InvalidBit(bit))? & 1 != 0)
            }
            Self::Byte { .. } => Value::Byte(low_byte(words[0])),
            Self::Float32 { .. } => Value::F32(f32::from_bits(join_words(words[0], words[1]))),
            Self::SignedInt { .. } => Value::I16(words[0] as i16),
            Self::UnsignedInt { .. } => Value::U16(words[0]),
            Self::String { .. } => Value::Str(decode_string(words)?),
            Self::StrEnum { values, .. } => {
                let raw = decode_string(words)?;
                match values.name_of(raw.as_str()) {
                    Some(name) => Value::Enum(name),
                    None => return Err(DecodeError::UnrecognizedEnumValue(raw)),
                }
            }
            Self::IntEnum { values, .. } => {
                let raw = low_byte(words[0]);
                Value::Enum(
                    values
                        .name_of(&raw)
                        .ok_or_else(|| DecodeError::UnrecognizedEnumValue(raw.to_string()))?,
                )
            }
            Self::Time { .. } => {
                let (hour, minute) = (words[0], words[1]);
                let malformed = DecodeError::MalformedTime { hour, minute };
                if hour > 23 || minute > 59 {
                    return Err(malformed);
                }
                Value::Time(Time::new(hour as i8, minute as i8, 0, 0).map_err(|_| malformed)?)
            }
        })
    }

    /// Encode `value` into `window`, the registers starting at this descriptor's offset.
    ///
    /// Only the registers (and for flags, the bit) belonging to this value are modified, so for
    /// flags `window` must hold the current register content.
    pub fn encode_into(&self, value: &Value, window: &mut [u16]) -> Result<(), EncodeError> {
        let needed = usize::from(self.word_span());
        if window.len() < needed {
            return Err(EncodeError::WindowTooSmall { needed, got: window.len() });
        }
        let window = &mut window[..needed];
        let mismatch = || EncodeError::TypeMismatch {
            descriptor: self.encoding(),
            value: value.type_name(),
        };
        match *self {
            Self::Flag { bit, .. } => {
                let set = value.as_bool().ok_or_else(mismatch)?;
                let mask = 1u16.checked_shl(u32::from(bit)).ok_or(EncodeError::InvalidBit(bit))?;
                window[0] = if set { window[0] | mask } else { window[0] & !mask };
            }
            Self::Byte { .. } => {
                window[0] = u16::from(self.integral::<u8>(value)?);
            }
            Self::SignedInt { .. } => {
                window[0] = self.integral::<i16>(value)? as u16;
            }
            Self::UnsignedInt { .. } => {
                window[0] = self.integral::<u16>(value)?;
            }
            Self::Float32 { .. } => {
                let n = match *value {
                    Value::F32(n) => n,
                    _ => value.as_f64().ok_or_else(mismatch)? as f32,
                };
                let bits = n.to_bits();
                window[0] = (bits >> 16) as u16;
                window[1] = bits as u16;
            }
            Self::String { number_of_words, .. } => {
                let s = value.as_str().ok_or_else(mismatch)?;
                encode_string(s, number_of_words, window)?;
            }
            Self::StrEnum { number_of_words, values, .. } => {
                let name = value.as_str().ok_or_else(mismatch)?;
                let raw = values
                    .raw_of(name)
                    .ok_or_else(|| EncodeError::UnknownEnumMember(name.to_string()))?;
                encode_string(raw, number_of_words, window)?;
            }
            Self::IntEnum { values, .. } => {
                let name = value.as_str().ok_or_else(mismatch)?;
                let raw = values
                    .raw_of(name)
                    .ok_or_else(|| EncodeError::UnknownEnumMember(name.to_string()))?;
                window[0] = u16::from(raw);
            }
            Self::Time { .. } => {
                let Value::Time(t) = value else { return Err(mismatch()) };
                window[0] = t.hour() as u16;
                window[1] = t.minute() as u16;
            }
        }
        Ok(())
    }

    /// Encode `value` into a fresh set of registers.
    ///
    /// Flags are encoded on top of an all-zero register, use [`Self::encode_into`] to preserve
    /// the other bits of the register.
    pub fn encode(&self, value: &Value) -> Result<Vec<u16>, EncodeError> {
        let mut words = vec![0; usize::from(self.word_span())];
        self.encode_into(value, &mut words)?;
        Ok(words)
    }

    fn integral<T>(&self, value: &Value) -> Result<T, EncodeError>
    where
        T: TryFrom<i64>,
    {
        let n = value.as_f64().ok_or(EncodeError::TypeMismatch {
            descriptor: self.encoding(),
            value: value.type_name(),
        })?;
        let out_of_range = EncodeError::OutOfRange { descriptor: self.encoding(), value: n };
        let rounded = n.round();
        if !rounded.is_finite() || rounded < i64::MIN as f64 || rounded > i64::MAX as f64 {
            return Err(out_of_range);
        }
        T::try_from(rounded as i64).map_err(|_| out_of_range)
    }

    /// Parse a textual representation of a value this descriptor can hold.
    pub fn parse_value(&self, s: &str) -> Result<Value, ParseValueError> {
        let number = |kind: &'static str| ParseValueError::Number(kind, s.to_string());
        Ok(match *self {
            Self::Flag { .. } => Value::Bool(match s.to_ascii_lowercase().as_str() {
                "1" | "true" | "on" | "yes" => true,
                "0" | "false" | "off" | "no" => false,
                _ => return Err(ParseValueError::Bool(s.to_string())),
            }),
            Self::Byte { .. } => Value::Byte(s.parse().map_err(|_| number("byte"))?),
            Self::Float32 { .. } => Value::F32(s.parse().map_err(|_| number("float"))?),
            Self::SignedInt { .. } => Value::I16(s.parse().map_err(|_| number("i16"))?),
            Self::UnsignedInt { .. } => Value::U16(s.parse().map_err(|_| number("u16"))?),
            Self::String { .. } => Value::Str(s.to_string()),
            Self::StrEnum { values, .. } => {
                Value::Enum(values.member(s).ok_or_else(|| ParseValueError::Enum(s.to_string()))?)
            }
            Self::IntEnum { values, .. } => {
                Value::Enum(values.member(s).ok_or_else(|| ParseValueError::Enum(s.to_string()))?)
            }
            Self::Time { .. } => Value::Time(parse_time(s)?),
        })
    }
}

fn low_byte(word: u16) -> u8 {
    word.to_be_bytes()[1]
}

fn join_words(high: u16, low: u16) -> u32 {
    (u32::from(high) << 16) | u32::from(low)
}

fn is_padding(b: u8) -> bool {
    b == 0 || b == b' '
}

fn decode_string(words: &[u16]) -> Result<String, DecodeError> {
    let mut bytes = words.iter().flat_map(|w| w.to_be_bytes()).collect::<Vec<u8>>();
    while bytes.last().copied().is_some_and(is_padding) {
        bytes.pop();
    }
    String::from_utf8(bytes).map_err(DecodeError::InvalidString)
}

fn encode_string(s: &str, number_of_words: u16, window: &mut [u16]) -> Result<(), EncodeError> {
    let bytes = s.as_bytes();
    if bytes.len() > 2 * usize::from(number_of_words) {
        return Err(EncodeError::StringTooLong { len: bytes.len(), words: number_of_words });
    }
    if bytes.last().copied().is_some_and(is_padding) {
        return Err(EncodeError::TrailingPadding);
    }
    for (idx, word) in window.iter_mut().enumerate() {
        let hi = bytes.get(2 * idx).copied().unwrap_or(0);
        let lo = bytes.get(2 * idx + 1).copied().unwrap_or(0);
        *word = u16::from_be_bytes([hi, lo]);
    }
    Ok(())
}

fn parse_time(s: &str) -> Result<Time, ParseValueError> {
    let err = || ParseValueError::Time(s.to_string());
    let (hour, minute) = s.split_once(':').ok_or_else(err)?;
    let hour = hour.parse::<i8>().map_err(|_| err())?;
    let minute = minute.parse::<i8>().map_err(|_| err())?;
    Time::new(hour, minute, 0, 0).map_err(|_| err())
}

#[cfg(test)]
mod tests {
    use super::enums::{EnergyMeterType, LegionellaInterval};
    use super::*;

    type D = RegisterInputDescriptor;

    #[test]
    fn every_word_round_trips() {
        let (unsigned, signed) = (D::unsigned(0), D::signed(0));
        for word in 0..=u16::MAX {
            let value = unsigned.decode(&[word]).unwrap();
            assert_eq!(unsigned.encode(&value).unwrap(), [word]);
            let value = signed.decode(&[word]).unwrap();
            assert_eq!(signed.encode(&value).unwrap(), [word]);
        }
    }

    #[test]
    fn every_byte_and_time_round_trips() {
        let byte = D::byte(0);
        for b in 0..=u8::MAX {
            let value = byte.decode(&[u16::from(b)]).unwrap();
            assert_eq!(value, Value::Byte(b));
            assert_eq!(byte.encode(&value).unwrap(), [u16::from(b)]);
        }
        let time = D::time(0);
        for hour in 0..24 {
            for minute in 0..60 {
                let value = time.decode(&[hour, minute]).unwrap();
                assert_eq!(time.encode(&value).unwrap(), [hour, minute]);
            }
        }
    }

    #[test]
    fn every_flag_bit_is_isolated() {
        for bit in 0..16 {
            let flag = D::flag(0, bit);
            let mut word = [0xAAAA];
            flag.encode_into(&Value::Bool(true), &mut word).unwrap();
            assert_eq!(word[0], 0xAAAA | 1 << bit);
            assert_eq!(flag.decode(&word), Ok(Value::Bool(true)));
            flag.encode_into(&Value::Bool(false), &mut word).unwrap();
            assert_eq!(word[0], 0xAAAA & !(1 << bit));
            assert_eq!(flag.decode(&word), Ok(Value::Bool(false)));
        }
    }

    #[test]
    fn out_of_word_bits_are_errors() {
        let flag = D::flag(0, 16);
        assert_eq!(flag.decode(&[0xFFFF]), Err(DecodeError::InvalidBit(16)));
        let mut word = [0];
        let result = flag.encode_into(&Value::Bool(true), &mut word);
        assert_eq!(result, Err(EncodeError::InvalidBit(16)));
        assert_eq!(word, [0]);
    }

    #[test]
    fn float32_uses_big_endian_word_order() {
        let d = D::float32(17);
        let mut block = vec![0; 19];
        block[17] = 0x4120;
        block[18] = 0x0000;
        assert_eq!(d.decode(&block), Ok(Value::F32(10.0)));
        assert_eq!(d.encode(&Value::F32(10.0)), Ok(vec![0x4120, 0x0000]));
    }

    #[test]
    fn float32_round_trips_bit_exactly() {
        let d = D::float32(0);
        for n in [0.0f32, -0.0, 1.5, -273.15, f32::MAX, f32::MIN_POSITIVE, f32::INFINITY] {
            let words = d.encode(&Value::F32(n)).unwrap();
            let Value::F32(back) = d.decode(&words).unwrap() else { panic!() };
            assert_eq!(back.to_bits(), n.to_bits());
        }
    }

    #[test]
    fn string_strips_only_padding() {
        let d = D::string(0, 16);
        let mut block = vec![0u16; 16];
        block[0] = u16::from_be_bytes(*b"AS");
        block[1] = u16::from_be_bytes(*b"K1");
        block[2] = u16::from_be_bytes(*b"23");
        assert_eq!(d.decode(&block), Ok(Value::Str("ASK123".into())));

        block[3] = u16::from_be_bytes(*b"  ");
        assert_eq!(d.decode(&block), Ok(Value::Str("ASK123".into())));

        block[1] = u16::from_be_bytes(*b" 1");
        assert_eq!(d.decode(&block), Ok(Value::Str("AS 123".into())));
    }

    #[test]
    fn string_encoding_pads_and_rejects_overflow() {
        let d = D::string(0, 3);
        assert_eq!(
            d.encode(&Value::Str("ABC".into())),
            Ok(vec![u16::from_be_bytes(*b"AB"), u16::from_be_bytes([b'C', 0]), 0])
        );
        assert_eq!(
            d.encode(&Value::Str("ABCDEFG".into())),
            Err(EncodeError::StringTooLong { len: 7, words: 3 })
        );
        assert_eq!(d.encode(&Value::Str("ABCDEF".into())).map(|w| w.len()), Ok(3));
        assert_eq!(d.encode(&Value::Str("AB ".into())), Err(EncodeError::TrailingPadding));
        let value = Value::Str("1.2".into());
        assert_eq!(d.decode(&d.encode(&value).unwrap()), Ok(value));
    }

    #[test]
    fn flag_touches_only_its_bit() {
        for bit in 0..16u8 {
            let d = D::flag(0, bit);
            assert_eq!(d.decode(&[1 << bit]), Ok(Value::Bool(true)));
            assert_eq!(d.decode(&[!(1 << bit)]), Ok(Value::Bool(false)));

            let mut word = [0xA5A5u16];
            d.encode_into(&Value::Bool(true), &mut word).unwrap();
            assert_eq!(word[0], 0xA5A5 | (1 << bit));
            d.encode_into(&Value::Bool(false), &mut word).unwrap();
            assert_eq!(word[0], 0xA5A5 & !(1 << bit));
        }
    }

    #[test]
    fn byte_reads_low_byte() {
        let d = D::byte(1);
        assert_eq!(d.decode(&[0, 0xAB12]), Ok(Value::Byte(0x12)));
        assert_eq!(d.encode(&Value::Byte(0x12)), Ok(vec![0x0012]));
        assert!(matches!(d.encode(&Value::U16(256)), Err(EncodeError::OutOfRange { .. })));
    }

    #[test]
    fn integers_reinterpret_words() {
        assert_eq!(D::signed(0).decode(&[0xFFA1]), Ok(Value::I16(-95)));
        assert_eq!(D::unsigned(0).decode(&[0xFFA1]), Ok(Value::U16(0xFFA1)));
        assert_eq!(D::signed(0).encode(&Value::I16(i16::MIN)), Ok(vec![0x8000]));
        assert_eq!(D::signed(0).encode(&Value::F32(-94.6)), Ok(vec![0xFFA1]));
        assert!(matches!(
            D::unsigned(0).encode(&Value::I16(-1)),
            Err(EncodeError::OutOfRange { .. })
        ));
        assert!(matches!(
            D::unsigned(0).encode(&Value::Str("1".into())),
            Err(EncodeError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn int_enum_decodes_closed_set() {
        let d = D::int_enum::<LegionellaInterval>(0);
        for &(raw, name) in LegionellaInterval::TABLE.iter() {
            assert_eq!(d.decode(&[u16::from(raw)]), Ok(Value::Enum(name)));
            assert_eq!(d.encode(&Value::Enum(name)), Ok(vec![u16::from(raw)]));
        }
        assert_eq!(d.decode(&[0x00FE]), Err(DecodeError::UnrecognizedEnumValue("254".into())));
        assert_eq!(
            d.decode(&[u16::from(LegionellaInterval::Weekly as u8)])
                .unwrap()
                .as_enum::<LegionellaInterval>(),
            Some(LegionellaInterval::Weekly)
        );
    }

    #[test]
    fn str_enum_decodes_closed_set() {
        let d = D::str_enum::<EnergyMeterType>(0, 8);
        for &(_, name) in EnergyMeterType::TABLE.iter() {
            let words = d.encode(&Value::Enum(name)).unwrap();
            assert_eq!(d.decode(&words), Ok(Value::Enum(name)));
        }
        let words = D::string(0, 8).encode(&Value::Str("ACME".into())).unwrap();
        assert_eq!(d.decode(&words), Err(DecodeError::UnrecognizedEnumValue("ACME".into())));
        assert!(matches!(
            d.encode(&Value::Enum("ACME")),
            Err(EncodeError::UnknownEnumMember(_))
        ));
    }

    #[test]
    fn time_is_hour_then_minute() {
        let d = D::time(2);
        let t = Time::new(6, 45, 0, 0).unwrap();
        assert_eq!(d.decode(&[0, 0, 6, 45]), Ok(Value::Time(t)));
        assert_eq!(d.encode(&Value::Time(t)), Ok(vec![6, 45]));
        assert_eq!(Value::Time(t).to_string(), "06:45");
        assert_eq!(
            d.decode(&[0, 0, 24, 0]),
            Err(DecodeError::MalformedTime { hour: 24, minute: 0 })
        );
        assert_eq!(
            d.decode(&[0, 0, 12, 60]),
            Err(DecodeError::MalformedTime { hour: 12, minute: 60 })
        );
    }

    #[test]
    fn short_buffers_are_truncated() {
        assert_eq!(
            D::float32(17).decode(&[0; 18]),
            Err(DecodeError::Truncated { needed: 19, available: 18 })
        );
        assert_eq!(
            D::string(0, 16).decode(&[]),
            Err(DecodeError::Truncated { needed: 16, available: 0 })
        );
        assert!(matches!(
            D::float32(0).encode_into(&Value::F32(1.0), &mut [0]),
            Err(EncodeError::WindowTooSmall { needed: 2, got: 1 })
        ));
    }

    #[test]
    fn parses_text_per_encoding() {
        assert_eq!(D::flag(0, 3).parse_value("on").unwrap(), Value::Bool(true));
        assert_eq!(D::signed(0).parse_value("-95").unwrap(), Value::I16(-95));
        assert_eq!(
            D::time(0).parse_value("07:30").unwrap(),
            Value::Time(Time::new(7, 30, 0, 0).unwrap())
        );
        assert!(D::time(0).parse_value("25:00").is_err());
        assert_eq!(
            D::int_enum::<LegionellaInterval>(0).parse_value("weekly").unwrap(),
            Value::Enum("weekly")
        );
        assert!(D::int_enum::<LegionellaInterval>(0).parse_value("hourly").is_err());
    }
}
