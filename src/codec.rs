//! Conversions between raw register words and engineering values.

/// Words above this value hold negative numbers when read as two's complement.
pub const MAX_INT_16BIT: u16 = 32767;

pub fn to_signed16(word: u16) -> i32 {
    if word > MAX_INT_16BIT { i32::from(word) - 65536 } else { i32::from(word) }
}

/// Signed tenths of a degree Celsius.
pub fn decode_temperature(word: u16) -> f64 {
    f64::from(to_signed16(word)) / 10.0
}

/// Unsigned tenths, as used by the CO2 and VOC sensors.
pub fn decode_percent_tenths(word: u16) -> f64 {
    f64::from(word) / 10.0
}

pub fn combine32(hi: u16, lo: u16) -> u32 {
    u32::from(hi) << 16 | u32::from(lo)
}

/// Encode a decimal as signed tenths, rounding to the nearest tenth.
///
/// Returns `None` when the value is not finite or does not fit into a signed 16-bit word.
pub fn encode_tenths(value: f64) -> Option<u16> {
    let tenths = (value * 10.0).round();
    if !tenths.is_finite() || tenths < f64::from(i16::MIN) || tenths > f64::from(i16::MAX) {
        return None;
    }
    Some(tenths as i16 as u16)
}

/// A fixed table mapping register codes to stable names.
pub trait CodeTable: Sized + Copy + Into<&'static str> + num_traits::FromPrimitive {
    /// Used to build the `unknown_<label>_<code>` fallback.
    const LABEL: &'static str;
    fn from_code(code: u16) -> Option<Self>;
    fn code(self) -> u16;
}

/// Look `word` up in the code table `T`.
///
/// Firmware revisions may report codes the table does not know about yet, so instead of failing
/// this produces `unknown_{label}_{word}`.
pub fn decode_enum<T: CodeTable>(word: u16, label: &str) -> String {
    match T::from_code(word) {
        Some(value) => Into::<&'static str>::into(value).to_string(),
        None => format!("unknown_{label}_{word}"),
    }
}

macro_rules! code_table {
    (
        #[label = $label:literal]
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $($variant:ident = $value:literal),* $(,)?
        }
    ) => {
        #[derive(
            Clone,
            Copy,
            Debug,
            PartialEq,
            Eq,
            strum::VariantNames,
            strum::IntoStaticStr,
            strum::EnumString,
            num_derive::FromPrimitive,
        )]
        #[strum(serialize_all = "snake_case")]
        #[repr(u16)]
        $(#[$meta])*
        $vis enum $name {
            $($variant = $value),*
        }

        impl $crate::codec::CodeTable for $name {
            const LABEL: &'static str = $label;
            fn from_code(code: u16) -> Option<Self> {
                <Self as num_traits::FromPrimitive>::from_u16(code)
            }
            fn code(self) -> u16 {
                self as u16
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(<&'static str>::from(*self))
            }
        }
    };
}

code_table! {
    #[label = "operation_mode"]
    pub enum OperationMode {
        Off = 0,
        Manual = 1,
        AutoTime = 2,
        AutoSensor = 3,
        EcoSupply = 4,
        EcoExtract = 5,
    }
}

code_table! {
    #[label = "season"]
    pub enum Season {
        Winter = 0,
        Summer = 1,
    }
}

code_table! {
    #[label = "room_temp_selection"]
    pub enum RoomTempSelection {
        ComfortBde = 0,
        External = 1,
        Internal = 2,
        Bus = 3,
    }
}

code_table! {
    #[label = "ventilation_level"]
    pub enum VentilationLevel {
        Off = 0,
        HumidityProtection = 1,
        Reduced = 2,
        Nominal = 3,
        Intensive = 4,
    }
}
