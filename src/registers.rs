#[derive(Clone, Copy, Debug, serde::Serialize, PartialEq, Eq)]
pub struct DataType {
    scale: u8,
    signed: bool,
}

impl DataType {
    // Convenience aliases for nicely tabulated `for_each_register` macro definition below.
    pub const U16: Self = Self { scale: 1, signed: false };
    pub const CEL: Self = Self { scale: 10, signed: true };
    /// Unsigned tenths, used by the CO2 and VOC sensors.
    pub const TNT: Self = Self { scale: 10, signed: false };

    pub fn from_word(self, word: u16) -> Value {
        match self {
            Self::CEL => Value::Celsius(word as i16),
            Self::TNT => Value::Tenths(word),
            _ => Value::U16(word),
        }
    }

    pub const fn is_signed(&self) -> bool {
        self.signed
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(if self.signed { "S/" } else { "U/" })?;
        f.write_fmt(format_args!("{}", self.scale))?;
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Value {
    U16(u16),
    /// This data type contains a value multiplied by 10.
    Celsius(i16),
    /// This data type contains a value multiplied by 10.
    Tenths(u16),
}

impl Value {
    #[allow(non_snake_case)]
    const fn CEL(val: i16) -> Self {
        Self::Celsius(val)
    }

    /// The raw register word this value is stored as.
    pub const fn into_inner(self) -> u16 {
        match self {
            Value::U16(v) | Value::Tenths(v) => v,
            Value::Celsius(v) => v as u16,
        }
    }

    /// The engineering value, with scaling applied.
    pub fn as_f64(self) -> f64 {
        match self {
            Value::U16(v) => f64::from(v),
            Value::Celsius(v) => f64::from(v) / 10.0,
            Value::Tenths(v) => f64::from(v) / 10.0,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Value::U16(n) => f.write_fmt(format_args!("{}", n)),
            Value::Celsius(n) => f.write_fmt(format_args!("{}", n as f32 / 10.0)),
            Value::Tenths(n) => f.write_fmt(format_args!("{}", n as f32 / 10.0)),
        }
    }
}

impl serde::Serialize for Value {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match *self {
            Value::U16(n) => serializer.serialize_u16(n),
            Value::Celsius(n) => serializer.serialize_f32(n as f32 / 10.0),
            Value::Tenths(n) => serializer.serialize_f32(n as f32 / 10.0),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct Mode(u8);

impl serde::Serialize for Mode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(if self.0 & Self::R.0 == 0 { "-" } else { "R" })?;
        f.write_str(if self.0 & Self::W.0 == 0 { "-" } else { "W" })?;
        Ok(())
    }
}

impl Mode {
    pub const R: Self = Self(1 << 0);
    pub const W: Self = Self(1 << 1);
    pub const RW: Self = Self(Self::R.0 | Self::W.0);
    const R_: Self = Self::R;

    pub const fn is_writable(&self) -> bool {
        self.0 & Self::W.0 != 0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct RegisterIndex(usize);

impl RegisterIndex {
    pub const fn from_address(address: u16) -> Option<RegisterIndex> {
        let (mut low, mut high) = (0, ADDRESSES.len());
        while low < high {
            let mid = low + (high - low) / 2;
            if ADDRESSES[mid] < address {
                low = mid + 1;
            } else {
                high = mid;
            }
        }
        if low < ADDRESSES.len() && ADDRESSES[low] == address {
            Some(Self(low))
        } else {
            None
        }
    }

    pub fn from_name(name: &str) -> Option<RegisterIndex> {
        let index = NAMES.iter().position(|v| v.eq_ignore_ascii_case(name));
        index.map(Self)
    }

    /// Look a register up by its address (`553`) or its name (`TARGET_ROOM_TEMP`).
    pub fn lookup(needle: &str) -> Option<RegisterIndex> {
        match needle.parse::<u16>() {
            Ok(address) => Self::from_address(address),
            Err(_) => Self::from_name(needle),
        }
    }

    pub const fn address(&self) -> u16 {
        ADDRESSES[self.0]
    }

    pub fn name(&self) -> &'static str {
        NAMES[self.0]
    }

    pub fn data_type(&self) -> DataType {
        DATA_TYPES[self.0]
    }

    pub fn mode(&self) -> Mode {
        MODES[self.0]
    }

    pub fn minimum_value(&self) -> Option<Value> {
        MINIMUM_VALUES[self.0]
    }

    pub fn maximum_value(&self) -> Option<Value> {
        MAXIMUM_VALUES[self.0]
    }

    pub fn description(&self) -> &'static str {
        DESCRIPTIONS[self.0]
    }
}

macro_rules! for_each_register {
    ($m:ident) => {
        $m! {
            100: U16, RW, "DATE_YEAR";
            101: U16, RW, "DATE_MONTH", min = 1, max = 12;
            102: U16, RW, "DATE_DAY", min = 1, max = 31;
            103: U16, RW, "TIME_HOUR", min = 0, max = 23;
            104: U16, RW, "TIME_MINUTE", min = 0, max = 59;
            105: U16, RW, "TIME_SECOND", min = 0, max = 59;
            106: U16, RW, "LOCK_FAN_OFF", min = 0, max = 1;
            107: U16, RW, "BDE_LOCK", min = 0, max = 1;
            108: U16, RW, "LANGUAGE", min = 0, max = 3;
            109: U16, RW, "ROOM_TEMP_SELECTION", min = 0, max = 3;
            150: U16, RW, "FILTER_DEVICE_MONTHS", min = 3, max = 12;
            151: U16, RW, "FILTER_OUTDOOR_MONTHS", min = 3, max = 18;
            152: U16, RW, "FILTER_ROOM_MONTHS", min = 1, max = 6;
            153: U16, RW, "FILTER_DURATION";
            154: U16, RW, "VOLUME_FLOW_REDUCED";
            155: U16, RW, "VOLUME_FLOW_NORMAL";
            156: U16, RW, "VOLUME_FLOW_INTENSIVE";
            157: U16, RW, "FILTER_CHANGE_DEVICE", min = 0, max = 1;
            158: U16, RW, "FILTER_CHANGE_OUTDOOR", min = 0, max = 1;
            159: U16, RW, "FILTER_CHANGE_ROOM", min = 0, max = 1;
            300: CEL, RW, "ROOM_TEMP_ADJUST", min = -30, max = 30;
            301: U16, RW, "SUPPLY_TEMP_MIN_COOL", min = 8, max = 29;
            302: CEL, RW, "ROOM_TEMP_MAX";
            401: U16, R_, "CURRENT_ERROR_HI";
            402: U16, R_, "CURRENT_ERROR_LO";
            403: U16, R_, "CURRENT_INFO_HI";
            404: U16, R_, "CURRENT_INFO_LO";
            405: U16, RW, "ERROR_RESET", min = 0, max = 1;
            550: U16, RW, "OPERATION_MODE", min = 0, max = 5;
            551: U16, RW, "BOOST_VENTILATION", min = 0, max = 1;
            552: U16, RW, "SEASON", min = 0, max = 1;
            553: CEL, RW, "TARGET_ROOM_TEMP", min = 180, max = 255;
            554: U16, RW, "VENTILATION_LEVEL", min = 0, max = 4;
            650: U16, R_, "CURRENT_VENTILATION_LEVEL", min = 0, max = 4;
            651: U16, R_, "SUPPLY_FAN_SPEED";
            652: U16, R_, "EXTRACT_FAN_SPEED";
            653: U16, R_, "SUPPLY_VOLUME_FLOW";
            654: U16, R_, "EXTRACT_VOLUME_FLOW";
            655: U16, R_, "FILTER_REMAIN_DEVICE";
            656: U16, R_, "FILTER_REMAIN_OUTDOOR";
            657: U16, R_, "FILTER_REMAIN_ROOM";
            700: CEL, R_, "ROOM_TEMP";
            701: CEL, RW, "ROOM_TEMP_EXT";
            702: CEL, R_, "TEMP_BEFORE_EWT";
            703: CEL, R_, "INLET_AIR_TEMP";
            704: CEL, R_, "SUPPLY_AIR_TEMP";
            705: CEL, R_, "EXTRACT_AIR_TEMP";
            706: CEL, R_, "EXHAUST_AIR_TEMP";
            707: CEL, RW, "ROOM_TEMP_BUS";
            750: U16, R_, "EXTRACT_AIR_HUMIDITY", min = 0, max = 100;
            751: U16, R_, "HUMIDITY_SENSOR_1", min = 0, max = 100;
            752: U16, R_, "HUMIDITY_SENSOR_2", min = 0, max = 100;
            753: U16, R_, "HUMIDITY_SENSOR_3", min = 0, max = 100;
            754: U16, R_, "HUMIDITY_SENSOR_4", min = 0, max = 100;
            755: TNT, R_, "CO2_SENSOR_1";
            756: TNT, R_, "CO2_SENSOR_2";
            757: TNT, R_, "CO2_SENSOR_3";
            758: TNT, R_, "CO2_SENSOR_4";
            759: TNT, R_, "VOC_SENSOR_1";
            760: TNT, R_, "VOC_SENSOR_2";
            761: TNT, R_, "VOC_SENSOR_3";
            762: TNT, R_, "VOC_SENSOR_4";
            763: U16, RW, "HUMIDITY_BUS", min = 0, max = 100;
            764: U16, RW, "AIR_QUALITY_BUS", min = 0, max = 5000;
            800: U16, R_, "SUPPLY_FAN_STATE", min = 0, max = 1;
            801: U16, R_, "EXTRACT_FAN_STATE", min = 0, max = 1;
            802: U16, R_, "BYPASS_ACTUATOR", min = 0, max = 1;
            803: U16, R_, "PTC_HEATER", min = 0, max = 1;
            804: U16, R_, "SWITCH_CONTACT", min = 0, max = 1;
            805: U16, R_, "POST_HEATER_RELAY", min = 0, max = 1;
            806: U16, R_, "BRINE_PUMP", min = 0, max = 2;
            807: U16, R_, "THREE_WAY_DAMPER", min = 0, max = 2;
            808: U16, R_, "ZONE_DAMPER", min = 0, max = 3;
            850: U16, R_, "HOURS_HUMIDITY_HI";
            851: U16, R_, "HOURS_HUMIDITY_LO";
            852: U16, R_, "HOURS_REDUCED_HI";
            853: U16, R_, "HOURS_REDUCED_LO";
            854: U16, R_, "HOURS_NOMINAL_HI";
            855: U16, R_, "HOURS_NOMINAL_LO";
            856: U16, R_, "HOURS_INTENSIVE_HI";
            857: U16, R_, "HOURS_INTENSIVE_LO";
            858: U16, R_, "HOURS_TOTAL_HI";
            859: U16, R_, "HOURS_TOTAL_LO";
            900: U16, RW, "FILTER_DELTA_P_LIMIT", min = 10, max = 200;
        }
    };
}

macro_rules! optional {
    () => {
        None
    };
    ($($lit: tt)+) => {
        Some($($lit)*)
    };
}

macro_rules! make_lists {
    ($($regnum: literal: $dt: ident, $mode: ident, $name: literal $(, min = $min: literal)? $(, max = $max: literal)?;)+) => {
        pub const ADDRESSES: &[u16] = &[$($regnum),*];
        pub static NAMES: &[&str] = &[$($name),*];
        pub static MODES: &[Mode] = &[$(Mode::$mode),*];
        pub static DATA_TYPES: &[DataType] = &[$(DataType::$dt),*];
        pub static MINIMUM_VALUES: &[Option<Value>] = &[$(optional!($(Value::$dt($min))?)),*];
        pub static MAXIMUM_VALUES: &[Option<Value>] = &[$(optional!($(Value::$dt($max))?)),*];
    };
}

for_each_register!(make_lists);

pub static DESCRIPTIONS: &[&str] = &const {
    let mut result = [""; ADDRESSES.len()];
    let mut index = 0;
    let mut previous_address = 0;
    while index < result.len() {
        let address = ADDRESSES[index];
        if address <= previous_address {
            panic!("ADDRESSES is not sorted (or has duplicate values)!");
        }
        previous_address = address;
        result[index] = match address {
            100 => "Year",
            101 => "Month",
            102 => "Day",
            103 => "Hour",
            104 => "Minute",
            105 => "Second",
            106 => "Lock fan level off. 0=Off possible, 1=Off locked",
            107 => "Lock of the operating unit (BDE). 0=Not locked, 1=Locked",
            108 => "Display language. 0=German, 1=English, 2=French, 3=Italian",
            109 => "Room temperature sensor selection. 0=Comfort-BDE, 1=External, 2=Internal, 3=Bus",
            150 => "Filter lifespan of the device filter in months",
            151 => "Filter lifespan of the outdoor filter in months",
            152 => "Filter lifespan of the room filter in months",
            153 => "Ventilation level duration in minutes",
            154 => "Volume flow for reduced ventilation (m³/h)",
            155 => "Volume flow for nominal ventilation (m³/h)",
            156 => "Volume flow for intensive ventilation (m³/h)",
            157 => "Device filter changed. Write 1 to acknowledge a filter change",
            158 => "Outdoor filter changed. Write 1 to acknowledge a filter change",
            159 => "Room filter changed. Write 1 to acknowledge a filter change",
            300 => "Room temperature adjustment (-3 °C to +3 °C)",
            301 => {
                "Minimum supply air temperature for cooling. Stored as whole degrees Celsius, \
                 unlike its neighbours"
            }
            302 => "Maximum room temperature",
            401 | 402 => "Current error code (high word, low word)",
            403 | 404 => "Current info code (high word, low word)",
            405 => "Error reset. 0=Normal, 1=Reset",
            550 => {
                "Operation mode. 0=Off, 1=Manual, 2=Auto-Time, 3=Auto-Sensor, 4=Eco-Supply air, \
                 5=Eco-Extract air"
            }
            551 => "Boost ventilation. 0=Inactive, 1=Active",
            552 => "Season. 0=Winter, 1=Summer",
            553 => "Target room temperature (18 °C to 25.5 °C in 0.5 °C steps)",
            554 => {
                "Ventilation level. 0=Off, 1=Humidity protection, 2=Reduced, 3=Nominal, \
                 4=Intensive"
            }
            650 => "Current ventilation level",
            651 => "Current supply fan speed (RPM)",
            652 => "Current extract fan speed (RPM)",
            653 => "Current supply volume flow (m³/h)",
            654 => "Current extract volume flow (m³/h)",
            655 => "Device filter remaining time in days",
            656 => "Outdoor filter remaining time in days",
            657 => "Room filter remaining time in days",
            700 => "Room temperature",
            701 => "External room temperature sensor",
            702 => "Temperature before the earth tube heat exchanger",
            703 => "Inlet air temperature",
            704 => "Supply air temperature",
            705 => "Extract air temperature",
            706 => "Exhaust air temperature",
            707 => "Bus room temperature. Must be written at least every 10 minutes",
            750 => {
                "Extract air relative humidity. Reported in whole percent even though the \
                 documentation claims tenths"
            }
            751..=754 => "Humidity sensor (whole percent)",
            755..=758 => "CO2 sensor (ppm)",
            759..=762 => "VOC sensor (ppm)",
            763 => "Bus relative humidity. Must be written at least every 10 minutes",
            764 => "Bus air quality/CO2 (ppm). Must be written at least every 10 minutes",
            800 => "Supply fan state. 0=Off, 1=On",
            801 => "Extract fan state. 0=Off, 1=On",
            802 => "Summer bypass actuator. 0=Closed, 1=Open",
            803 => "PTC heater. 0=Off, 1=On",
            804 => "Switch contact on the base board. 0=Off, 1=On",
            805 => "Post-heater relay ZP1. 0=Off, 1=On",
            806 => "Brine circulation pump ZP1. 0=Off, 1=Heating, 2=Cooling",
            807 => "3-way air damper ZP1. 0=Off, 1=Heating, 2=Cooling",
            808 => "Zone damper ZP1. 0=Off, 1=Zone 1, 2=Zone 2, 3=Zone sensor",
            850 | 851 => "Operating hours in humidity protection (high word, low word)",
            852 | 853 => "Operating hours in reduced ventilation (high word, low word)",
            854 | 855 => "Operating hours in nominal ventilation (high word, low word)",
            856 | 857 => "Operating hours in intensive ventilation (high word, low word)",
            858 | 859 => "Total operating hours (high word, low word)",
            900 => "Allowed filter pressure difference for filter monitoring (%)",
            _ => "",
        };
        index += 1;
    }
    result
};
