//! Validated writes of device parameters.
//!
//! Every operation checks its input against the parameter's domain first and only then issues
//! exactly one register write. Out-of-range values never reach the device.

use crate::codec;
use crate::connection::{self, RegisterAccess};
use crate::registers::{RegisterIndex, Value};
use tracing::{debug, info};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("{value} is not a valid {parameter} (expected {expected})")]
    InvalidParameter { parameter: &'static str, value: String, expected: String },
    #[error("could not write the parameter to the device")]
    Write(#[source] connection::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scaling {
    /// Written as is.
    Identity,
    /// Degrees Celsius stored as signed tenths.
    Tenths,
    /// Like `Tenths`, but snapped to the nearest half degree first.
    HalfDegrees,
}

/// A writable device parameter.
///
/// The accepted range comes from the register map.
#[derive(Clone, Copy, Debug)]
pub struct Parameter {
    pub name: &'static str,
    pub register: RegisterIndex,
    pub scaling: Scaling,
}

impl Parameter {
    const fn new(name: &'static str, address: u16, scaling: Scaling) -> Self {
        let Some(register) = RegisterIndex::from_address(address) else {
            panic!("parameters must refer to known registers");
        };
        Self { name, register, scaling }
    }

    /// Raw register bounds, with signed registers reinterpreted.
    fn raw_bounds(&self) -> (i64, i64) {
        let signed = self.register.data_type().is_signed();
        let raw = |v: Value| match v {
            Value::Celsius(v) => i64::from(v),
            Value::U16(v) | Value::Tenths(v) => i64::from(v),
        };
        let min = self.register.minimum_value().map(raw);
        let max = self.register.maximum_value().map(raw);
        if signed {
            (min.unwrap_or(i16::MIN.into()), max.unwrap_or(i16::MAX.into()))
        } else {
            (min.unwrap_or(0), max.unwrap_or(u16::MAX.into()))
        }
    }

    fn invalid(&self, value: impl std::fmt::Display) -> Error {
        let (min, max) = self.raw_bounds();
        let expected = match self.scaling {
            Scaling::Identity => format!("{min}..={max}"),
            Scaling::Tenths => format!("{:.1}..={:.1}", min as f64 / 10.0, max as f64 / 10.0),
            Scaling::HalfDegrees => {
                format!("{:.1}..={:.1} in 0.5 steps", min as f64 / 10.0, max as f64 / 10.0)
            }
        };
        Error::InvalidParameter { parameter: self.name, value: value.to_string(), expected }
    }

    pub fn encode_integer(&self, value: u16) -> Result<u16, Error> {
        let (min, max) = self.raw_bounds();
        if self.scaling != Scaling::Identity || !(min..=max).contains(&i64::from(value)) {
            return Err(self.invalid(value));
        }
        Ok(value)
    }

    pub fn encode_decimal(&self, value: f64) -> Result<u16, Error> {
        let (min, max) = self.raw_bounds();
        let in_range = value >= min as f64 / 10.0 && value <= max as f64 / 10.0;
        let value_to_encode = match self.scaling {
            Scaling::Identity => return Err(self.invalid(value)),
            _ if !in_range => return Err(self.invalid(value)),
            Scaling::Tenths => value,
            Scaling::HalfDegrees => (value * 2.0).round() / 2.0,
        };
        codec::encode_tenths(value_to_encode).ok_or_else(|| self.invalid(value))
    }
}

pub const OPERATION_MODE: Parameter = Parameter::new("operation_mode", 550, Scaling::Identity);
pub const BOOST_VENTILATION: Parameter =
    Parameter::new("boost_ventilation", 551, Scaling::Identity);
pub const SEASON: Parameter = Parameter::new("season", 552, Scaling::Identity);
pub const TARGET_ROOM_TEMPERATURE: Parameter =
    Parameter::new("target_room_temperature", 553, Scaling::HalfDegrees);
pub const VENTILATION_LEVEL: Parameter =
    Parameter::new("ventilation_level", 554, Scaling::Identity);
pub const ROOM_TEMP_ADJUST: Parameter = Parameter::new("room_temp_adjust", 300, Scaling::Tenths);
pub const SUPPLY_TEMP_MIN_COOL: Parameter =
    Parameter::new("supply_temp_min_cool", 301, Scaling::Identity);
pub const ROOM_TEMP_MAX: Parameter = Parameter::new("room_temp_max", 302, Scaling::Tenths);
pub const ERROR_RESET: Parameter = Parameter::new("error_reset", 405, Scaling::Identity);
pub const ROOM_TEMP_SELECTION: Parameter =
    Parameter::new("room_temp_selection", 109, Scaling::Identity);
pub const FILTER_DEVICE_MONTHS: Parameter =
    Parameter::new("filter_device_months", 150, Scaling::Identity);
pub const FILTER_OUTDOOR_MONTHS: Parameter =
    Parameter::new("filter_outdoor_months", 151, Scaling::Identity);
pub const FILTER_ROOM_MONTHS: Parameter =
    Parameter::new("filter_room_months", 152, Scaling::Identity);
pub const FILTER_CHANGE_DEVICE: Parameter =
    Parameter::new("filter_change_device", 157, Scaling::Identity);
pub const FILTER_CHANGE_OUTDOOR: Parameter =
    Parameter::new("filter_change_outdoor", 158, Scaling::Identity);
pub const FILTER_CHANGE_ROOM: Parameter =
    Parameter::new("filter_change_room", 159, Scaling::Identity);
pub const EXTERNAL_ROOM_TEMP: Parameter =
    Parameter::new("external_room_temp", 701, Scaling::Tenths);
pub const BUS_ROOM_TEMP: Parameter = Parameter::new("bus_room_temp", 707, Scaling::Tenths);
pub const BUS_HUMIDITY: Parameter = Parameter::new("bus_humidity", 763, Scaling::Identity);
pub const BUS_AIR_QUALITY: Parameter = Parameter::new("bus_air_quality", 764, Scaling::Identity);

async fn write<C: RegisterAccess>(
    device: &mut C,
    parameter: &Parameter,
    raw: u16,
) -> Result<(), Error> {
    let address = parameter.register.address();
    debug!(message = "writing parameter", parameter = parameter.name, address, raw);
    device.write_register(address, raw).await.map_err(Error::Write)?;
    let value = parameter.register.data_type().from_word(raw);
    info!(message = "parameter written", parameter = parameter.name, %value);
    Ok(())
}

async fn write_integer<C: RegisterAccess>(
    device: &mut C,
    parameter: &Parameter,
    value: u16,
) -> Result<(), Error> {
    let raw = parameter.encode_integer(value)?;
    write(device, parameter, raw).await
}

async fn write_decimal<C: RegisterAccess>(
    device: &mut C,
    parameter: &Parameter,
    value: f64,
) -> Result<(), Error> {
    let raw = parameter.encode_decimal(value)?;
    write(device, parameter, raw).await
}

/// Operation mode code, see [`codec::OperationMode`].
pub async fn set_operation_mode<C: RegisterAccess>(device: &mut C, mode: u16) -> Result<(), Error> {
    write_integer(device, &OPERATION_MODE, mode).await
}

/// Ventilation level code, see [`codec::VentilationLevel`].
pub async fn set_ventilation_level<C: RegisterAccess>(
    device: &mut C,
    level: u16,
) -> Result<(), Error> {
    write_integer(device, &VENTILATION_LEVEL, level).await
}

/// Set the target room temperature in °C. The value is rounded to the nearest half degree.
pub async fn set_target_room_temperature<C: RegisterAccess>(
    device: &mut C,
    celsius: f64,
) -> Result<(), Error> {
    write_decimal(device, &TARGET_ROOM_TEMPERATURE, celsius).await
}

pub async fn set_season<C: RegisterAccess>(device: &mut C, season: u16) -> Result<(), Error> {
    write_integer(device, &SEASON, season).await
}

pub async fn set_boost_ventilation<C: RegisterAccess>(
    device: &mut C,
    active: bool,
) -> Result<(), Error> {
    write_integer(device, &BOOST_VENTILATION, u16::from(active)).await
}

/// Minimum supply air temperature for cooling, in whole degrees.
pub async fn write_supply_temp_min_cool<C: RegisterAccess>(
    device: &mut C,
    celsius: u16,
) -> Result<(), Error> {
    write_integer(device, &SUPPLY_TEMP_MIN_COOL, celsius).await
}

pub async fn write_room_temp_max<C: RegisterAccess>(
    device: &mut C,
    celsius: f64,
) -> Result<(), Error> {
    write_decimal(device, &ROOM_TEMP_MAX, celsius).await
}

pub async fn set_room_temp_adjust<C: RegisterAccess>(
    device: &mut C,
    celsius: f64,
) -> Result<(), Error> {
    write_decimal(device, &ROOM_TEMP_ADJUST, celsius).await
}

pub async fn reset_filter_device<C: RegisterAccess>(device: &mut C) -> Result<(), Error> {
    write_integer(device, &FILTER_CHANGE_DEVICE, 1).await
}

pub async fn reset_filter_outdoor<C: RegisterAccess>(device: &mut C) -> Result<(), Error> {
    write_integer(device, &FILTER_CHANGE_OUTDOOR, 1).await
}

pub async fn reset_filter_room<C: RegisterAccess>(device: &mut C) -> Result<(), Error> {
    write_integer(device, &FILTER_CHANGE_ROOM, 1).await
}

pub async fn reset_error<C: RegisterAccess>(device: &mut C) -> Result<(), Error> {
    write_integer(device, &ERROR_RESET, 1).await
}

/// Room temperature sensor selection code, see [`codec::RoomTempSelection`].
pub async fn set_room_temp_selection<C: RegisterAccess>(
    device: &mut C,
    selection: u16,
) -> Result<(), Error> {
    write_integer(device, &ROOM_TEMP_SELECTION, selection).await
}

pub async fn set_filter_device_months<C: RegisterAccess>(
    device: &mut C,
    months: u16,
) -> Result<(), Error> {
    write_integer(device, &FILTER_DEVICE_MONTHS, months).await
}

pub async fn set_filter_outdoor_months<C: RegisterAccess>(
    device: &mut C,
    months: u16,
) -> Result<(), Error> {
    write_integer(device, &FILTER_OUTDOOR_MONTHS, months).await
}

pub async fn set_filter_room_months<C: RegisterAccess>(
    device: &mut C,
    months: u16,
) -> Result<(), Error> {
    write_integer(device, &FILTER_ROOM_MONTHS, months).await
}

/// Relative humidity (%) measured by an external bus sensor.
///
/// The unit falls back to its own sensors if this is not refreshed at least every 10 minutes.
pub async fn write_bus_humidity<C: RegisterAccess>(
    device: &mut C,
    percent: u16,
) -> Result<(), Error> {
    write_integer(device, &BUS_HUMIDITY, percent).await
}

/// Air quality or CO2 (ppm) measured by an external bus sensor.
pub async fn write_bus_air_quality<C: RegisterAccess>(
    device: &mut C,
    ppm: u16,
) -> Result<(), Error> {
    write_integer(device, &BUS_AIR_QUALITY, ppm).await
}

pub async fn write_external_room_temp<C: RegisterAccess>(
    device: &mut C,
    celsius: f64,
) -> Result<(), Error> {
    write_decimal(device, &EXTERNAL_ROOM_TEMP, celsius).await
}

pub async fn write_bus_room_temp<C: RegisterAccess>(
    device: &mut C,
    celsius: f64,
) -> Result<(), Error> {
    write_decimal(device, &BUS_ROOM_TEMP, celsius).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeDevice;

    fn assert_invalid(result: Result<(), Error>, expected_parameter: &str) {
        match result {
            Err(Error::InvalidParameter { parameter, .. }) => {
                assert_eq!(parameter, expected_parameter)
            }
            other => panic!("expected an invalid parameter error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn ventilation_level_domain() {
        let mut device = FakeDevice::new();
        assert_invalid(set_ventilation_level(&mut device, 5).await, "ventilation_level");
        assert!(device.writes.is_empty());
        set_ventilation_level(&mut device, 4).await.unwrap();
        assert_eq!(device.writes, [(554, 4)]);
    }

    #[tokio::test]
    async fn target_temperature() {
        let mut device = FakeDevice::new();
        set_target_room_temperature(&mut device, 18.0).await.unwrap();
        set_target_room_temperature(&mut device, 25.5).await.unwrap();
        set_target_room_temperature(&mut device, 21.3).await.unwrap();
        assert_eq!(device.writes, [(553, 180), (553, 255), (553, 215)]);
        device.writes.clear();
        for rejected in [17.9, 25.6, f64::NAN] {
            let result = set_target_room_temperature(&mut device, rejected).await;
            assert_invalid(result, "target_room_temperature");
        }
        assert!(device.writes.is_empty());
    }

    #[tokio::test]
    async fn whole_degrees_next_to_tenths() {
        let mut device = FakeDevice::new();
        write_supply_temp_min_cool(&mut device, 15).await.unwrap();
        write_room_temp_max(&mut device, 15.0).await.unwrap();
        assert_eq!(device.writes, [(301, 15), (302, 150)]);
        assert_invalid(write_supply_temp_min_cool(&mut device, 30).await, "supply_temp_min_cool");
        assert_invalid(write_supply_temp_min_cool(&mut device, 7).await, "supply_temp_min_cool");
        assert_eq!(device.writes.len(), 2);
    }

    #[tokio::test]
    async fn signed_temperatures() {
        let mut device = FakeDevice::new();
        set_room_temp_adjust(&mut device, -3.0).await.unwrap();
        set_room_temp_adjust(&mut device, 2.5).await.unwrap();
        write_external_room_temp(&mut device, -1.5).await.unwrap();
        write_bus_room_temp(&mut device, 22.4).await.unwrap();
        assert_eq!(device.writes, [(300, 0xFFE2), (300, 25), (701, 0xFFF1), (707, 224)]);
        assert_invalid(set_room_temp_adjust(&mut device, 3.1).await, "room_temp_adjust");
        assert_invalid(set_room_temp_adjust(&mut device, -3.5).await, "room_temp_adjust");
        assert_eq!(device.writes.len(), 4);
    }

    #[tokio::test]
    async fn enumerations_and_flags() {
        let mut device = FakeDevice::new();
        set_operation_mode(&mut device, codec::OperationMode::EcoExtract as u16).await.unwrap();
        set_season(&mut device, 1).await.unwrap();
        set_boost_ventilation(&mut device, true).await.unwrap();
        set_boost_ventilation(&mut device, false).await.unwrap();
        set_room_temp_selection(&mut device, 3).await.unwrap();
        assert_eq!(device.writes, [(550, 5), (552, 1), (551, 1), (551, 0), (109, 3)]);
        assert_invalid(set_operation_mode(&mut device, 6).await, "operation_mode");
        assert_invalid(set_season(&mut device, 2).await, "season");
        assert_invalid(set_room_temp_selection(&mut device, 4).await, "room_temp_selection");
        assert_eq!(device.writes.len(), 5);
    }

    #[tokio::test]
    async fn triggers_write_one() {
        let mut device = FakeDevice::new();
        reset_filter_device(&mut device).await.unwrap();
        reset_filter_outdoor(&mut device).await.unwrap();
        reset_filter_room(&mut device).await.unwrap();
        reset_error(&mut device).await.unwrap();
        assert_eq!(device.writes, [(157, 1), (158, 1), (159, 1), (405, 1)]);
    }

    #[tokio::test]
    async fn filter_lifespans() {
        let mut device = FakeDevice::new();
        set_filter_device_months(&mut device, 12).await.unwrap();
        set_filter_outdoor_months(&mut device, 18).await.unwrap();
        set_filter_room_months(&mut device, 1).await.unwrap();
        assert_eq!(device.writes, [(150, 12), (151, 18), (152, 1)]);
        assert_invalid(set_filter_device_months(&mut device, 2).await, "filter_device_months");
        assert_invalid(set_filter_outdoor_months(&mut device, 19).await, "filter_outdoor_months");
        assert_invalid(set_filter_room_months(&mut device, 7).await, "filter_room_months");
        assert_eq!(device.writes.len(), 3);
    }

    #[tokio::test]
    async fn bus_overrides() {
        let mut device = FakeDevice::new();
        write_bus_humidity(&mut device, 100).await.unwrap();
        write_bus_air_quality(&mut device, 5000).await.unwrap();
        assert_eq!(device.writes, [(763, 100), (764, 5000)]);
        assert_invalid(write_bus_humidity(&mut device, 101).await, "bus_humidity");
        assert_invalid(write_bus_air_quality(&mut device, 5001).await, "bus_air_quality");
        assert_eq!(device.writes.len(), 2);
    }

    #[tokio::test]
    async fn transport_failures_propagate() {
        let mut device = FakeDevice::new().failing(554..=554);
        let result = set_ventilation_level(&mut device, 2).await;
        assert!(matches!(result, Err(Error::Write(connection::Error::Timeout(_)))));
        device.connected = false;
        let result = set_season(&mut device, 0).await;
        assert!(matches!(result, Err(Error::Write(connection::Error::NotConnected))));
        assert!(device.writes.is_empty());
    }

    #[test]
    fn invalid_parameter_message() {
        let Err(e) = TARGET_ROOM_TEMPERATURE.encode_decimal(30.0) else { panic!() };
        assert_eq!(
            e.to_string(),
            "30 is not a valid target_room_temperature (expected 18.0..=25.5 in 0.5 steps)"
        );
        let Err(e) = VENTILATION_LEVEL.encode_integer(9) else { panic!() };
        assert_eq!(e.to_string(), "9 is not a valid ventilation_level (expected 0..=4)");
    }
}
