//! Aggregation of the device's register blocks into one named status snapshot.

use crate::codec::{self, CodeTable, OperationMode, RoomTempSelection, Season};
use crate::connection::{self, RegisterAccess};
use crate::registers::{RegisterIndex, Value};
use std::collections::BTreeMap;
use tracing::{debug, trace, warn};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("no status block could be read")]
    AggregationFailed(#[source] connection::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub struct FilterStatus {
    pub filter_device_days: u16,
    pub filter_outdoor_days: u16,
    pub filter_room_days: u16,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize)]
#[serde(untagged)]
pub enum StatusValue {
    Flag(bool),
    Integer(i64),
    Decimal(f64),
    Text(String),
    Filter(FilterStatus),
}

impl std::fmt::Display for StatusValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusValue::Flag(v) => write!(f, "{v}"),
            StatusValue::Integer(v) => write!(f, "{v}"),
            StatusValue::Decimal(v) => write!(f, "{v}"),
            StatusValue::Text(v) => f.write_str(v),
            StatusValue::Filter(s) => write!(
                f,
                "device {}d, outdoor {}d, room {}d",
                s.filter_device_days, s.filter_outdoor_days, s.filter_room_days
            ),
        }
    }
}

impl From<bool> for StatusValue {
    fn from(value: bool) -> Self {
        Self::Flag(value)
    }
}

impl From<u16> for StatusValue {
    fn from(value: u16) -> Self {
        Self::Integer(value.into())
    }
}

impl From<u32> for StatusValue {
    fn from(value: u32) -> Self {
        Self::Integer(value.into())
    }
}

impl From<f64> for StatusValue {
    fn from(value: f64) -> Self {
        Self::Decimal(value)
    }
}

impl From<String> for StatusValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<FilterStatus> for StatusValue {
    fn from(value: FilterStatus) -> Self {
        Self::Filter(value)
    }
}

/// The named fields decoded during one poll.
///
/// Fields of blocks that could not be read are absent rather than defaulted.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize)]
#[serde(transparent)]
pub struct StatusSnapshot {
    fields: BTreeMap<&'static str, StatusValue>,
}

impl StatusSnapshot {
    fn insert(&mut self, key: &'static str, value: impl Into<StatusValue>) {
        self.fields.insert(key, value.into());
    }

    pub fn get(&self, key: &str) -> Option<&StatusValue> {
        self.fields.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &StatusValue)> + '_ {
        self.fields.iter().map(|(k, v)| (*k, v))
    }

    pub fn flag(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            StatusValue::Flag(v) => Some(*v),
            _ => None,
        }
    }

    pub fn integer(&self, key: &str) -> Option<i64> {
        match self.get(key)? {
            StatusValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn decimal(&self, key: &str) -> Option<f64> {
        match self.get(key)? {
            StatusValue::Decimal(v) => Some(*v),
            _ => None,
        }
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        match self.get(key)? {
            StatusValue::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn filter_status(&self) -> Option<FilterStatus> {
        match self.get("filter_status")? {
            StatusValue::Filter(v) => Some(*v),
            _ => None,
        }
    }
}

type Decoder = fn(&[u16], &mut StatusSnapshot) -> Option<()>;

struct Block {
    name: &'static str,
    start: RegisterIndex,
    count: u16,
    decode: Decoder,
}

const fn block(name: &'static str, first: u16, last: u16, decode: Decoder) -> Block {
    let (Some(start), Some(_)) =
        (RegisterIndex::from_address(first), RegisterIndex::from_address(last))
    else {
        panic!("status blocks must start and end at known registers");
    };
    if last < first || last - first >= 123 {
        panic!("status block does not fit into a single read");
    }
    Block { name, start, count: last - first + 1, decode }
}

/// The poll plan. Blocks are read one after another in this order.
const BLOCKS: [Block; 10] = [
    block("settings", 300, 302, decode_settings),
    block("ventilation", 650, 657, decode_ventilation),
    block("temperatures", 700, 707, decode_temperatures),
    block("air quality", 750, 764, decode_air_quality),
    block("operation", 550, 554, decode_operation),
    block("switches", 800, 808, decode_switches),
    block("faults", 401, 404, decode_faults),
    block("filter settings", 150, 159, decode_filter_settings),
    block("operating hours", 850, 859, decode_operating_hours),
    block("room temperature selection", 109, 109, decode_room_temp_selection),
];

const HUMIDITY_SENSORS: [&str; 4] =
    ["humidity_sensor_1", "humidity_sensor_2", "humidity_sensor_3", "humidity_sensor_4"];
const CO2_SENSORS: [&str; 4] = ["co2_sensor_1", "co2_sensor_2", "co2_sensor_3", "co2_sensor_4"];
const VOC_SENSORS: [&str; 4] = ["voc_sensor_1", "voc_sensor_2", "voc_sensor_3", "voc_sensor_4"];

fn decode_settings(words: &[u16], status: &mut StatusSnapshot) -> Option<()> {
    let [adjust, min_cool, room_max, ..] = *words else { return None };
    status.insert("room_temp_adjust", codec::decode_temperature(adjust));
    // Whole degrees, unlike its neighbours.
    status.insert("supply_temp_min_cool", min_cool);
    status.insert("room_temp_max", codec::decode_temperature(room_max));
    Some(())
}

fn decode_ventilation(words: &[u16], status: &mut StatusSnapshot) -> Option<()> {
    let [level, supply_rpm, extract_rpm, supply_flow, extract_flow, device, outdoor, room, ..] =
        *words
    else {
        return None;
    };
    status.insert("current_ventilation_level", level);
    status.insert("supply_fan_speed", supply_rpm);
    status.insert("extract_fan_speed", extract_rpm);
    status.insert("current_supply_volume_flow", supply_flow);
    status.insert("current_extract_volume_flow", extract_flow);
    status.insert(
        "filter_status",
        FilterStatus {
            filter_device_days: device,
            filter_outdoor_days: outdoor,
            filter_room_days: room,
        },
    );
    Some(())
}

fn decode_temperatures(words: &[u16], status: &mut StatusSnapshot) -> Option<()> {
    let [room, room_ext, _before_ewt, inlet, supply, extract, exhaust, room_bus, ..] = *words else {
        return None;
    };
    for (key, word) in [
        ("room_temperature", room),
        ("room_temperature_ext", room_ext),
        ("inlet_air_temperature", inlet),
        ("supply_air_temperature", supply),
        ("extract_air_temperature", extract),
        ("exhaust_air_temperature", exhaust),
        ("room_temperature_bus", room_bus),
    ] {
        status.insert(key, codec::decode_temperature(word));
    }
    Some(())
}

/// Decodes as much of the block as the device returned.
fn decode_air_quality(words: &[u16], status: &mut StatusSnapshot) -> Option<()> {
    // Whole percent, even though the vendor documentation says tenths.
    status.insert("extract_air_humidity", *words.first()?);
    if let Some(sensors) = words.get(1..5) {
        for (key, word) in HUMIDITY_SENSORS.into_iter().zip(sensors) {
            status.insert(key, *word);
        }
    }
    if let Some(sensors) = words.get(5..9) {
        for (key, word) in CO2_SENSORS.into_iter().zip(sensors) {
            status.insert(key, codec::decode_percent_tenths(*word));
        }
    }
    if let Some(sensors) = words.get(9..13) {
        for (key, word) in VOC_SENSORS.into_iter().zip(sensors) {
            status.insert(key, codec::decode_percent_tenths(*word));
        }
    }
    if let Some(&[humidity, air_quality]) = words.get(13..15) {
        status.insert("humidity_bus", humidity);
        status.insert("air_quality_bus", air_quality);
    }
    Some(())
}

fn decode_operation(words: &[u16], status: &mut StatusSnapshot) -> Option<()> {
    let [mode, boost, season, target, level, ..] = *words else { return None };
    let operation_mode = codec::decode_enum::<OperationMode>(mode, OperationMode::LABEL);
    status.insert("operation_mode", operation_mode);
    status.insert("boost_ventilation", boost != 0);
    status.insert("season", codec::decode_enum::<Season>(season, Season::LABEL));
    status.insert("target_temperature", codec::decode_temperature(target));
    status.insert("ventilation_level", level);
    Some(())
}

fn decode_switches(words: &[u16], status: &mut StatusSnapshot) -> Option<()> {
    let [supply_fan, extract_fan, bypass, ptc, extended @ ..] = words else { return None };
    status.insert("supply_fan_state", *supply_fan != 0);
    status.insert("extract_fan_state", *extract_fan != 0);
    status.insert("bypass_status", *bypass != 0);
    status.insert("ptc_heater", *ptc != 0);
    if let Some(&contact) = extended.first() {
        status.insert("switch_contact", contact != 0);
    }
    if let Some(&relay) = extended.get(1) {
        status.insert("post_heater_relay", relay != 0);
    }
    let dampers = ["brine_pump", "three_way_damper", "zone_damper"];
    for (key, word) in dampers.into_iter().zip(extended.iter().skip(2)) {
        status.insert(key, *word);
    }
    Some(())
}

fn decode_faults(words: &[u16], status: &mut StatusSnapshot) -> Option<()> {
    let [error_hi, error_lo, info_hi, info_lo, ..] = *words else { return None };
    let error_code = codec::combine32(error_hi, error_lo);
    let info_code = codec::combine32(info_hi, info_lo);
    status.insert("error_code", error_code);
    status.insert("info_code", info_code);
    status.insert(
        "fault_status",
        match error_code {
            0 => "no_fault".to_string(),
            _ => format!("error_hi_{error_hi}_lo_{error_lo}"),
        },
    );
    status.insert(
        "info_messages",
        match info_code {
            0 => "no_info".to_string(),
            _ => format!("info_hi_{info_hi}_lo_{info_lo}"),
        },
    );
    Some(())
}

fn decode_filter_settings(words: &[u16], status: &mut StatusSnapshot) -> Option<()> {
    let [device, outdoor, room, duration, reduced, normal, intensive, ..] = *words else {
        return None;
    };
    status.insert("filter_device_months", device);
    status.insert("filter_outdoor_months", outdoor);
    status.insert("filter_room_months", room);
    status.insert("filter_duration", duration);
    status.insert("volume_flow_reduced", reduced);
    status.insert("volume_flow_normal", normal);
    status.insert("volume_flow_intensive", intensive);
    Some(())
}

fn decode_operating_hours(words: &[u16], status: &mut StatusSnapshot) -> Option<()> {
    let counters = words.get(..10)?;
    let keys =
        ["hours_humidity", "hours_reduced", "hours_nominal", "hours_intensive", "hours_total"];
    for (key, pair) in keys.into_iter().zip(counters.chunks_exact(2)) {
        status.insert(key, codec::combine32(pair[0], pair[1]));
    }
    Some(())
}

fn decode_room_temp_selection(words: &[u16], status: &mut StatusSnapshot) -> Option<()> {
    let selection = *words.first()?;
    status.insert(
        "room_temp_selection",
        codec::decode_enum::<RoomTempSelection>(selection, RoomTempSelection::LABEL),
    );
    Some(())
}

/// Poll every status block and decode the results into a snapshot.
///
/// A block that fails to read only drops its own fields. The poll fails as a whole only when no
/// block could be read at all, or when there is no session to begin with.
pub async fn read_status<C: RegisterAccess>(device: &mut C) -> Result<StatusSnapshot, Error> {
    let mut snapshot = StatusSnapshot::default();
    let mut last_error = None;
    let mut blocks_read = 0;
    for block in &BLOCKS {
        let address = block.start.address();
        let words = match device.read_registers(address, block.count).await {
            Ok(words) => words,
            Err(connection::Error::NotConnected) => {
                return Err(Error::AggregationFailed(connection::Error::NotConnected));
            }
            Err(e) => {
                warn!(
                    message = "could not read status block, its fields will be missing",
                    block = block.name,
                    address,
                    error = (&e as &dyn std::error::Error)
                );
                last_error = Some(e);
                continue;
            }
        };
        trace!(message = "decoding status block", block = block.name, ?words);
        if (block.decode)(&words, &mut snapshot).is_none() {
            warn!(
                message = "status block was shorter than expected, its fields will be missing",
                block = block.name,
                address,
                expected = block.count,
                received = words.len(),
            );
            last_error = Some(connection::Error::ShortResponse {
                address,
                expected: block.count,
                received: words.len(),
            });
            continue;
        }
        blocks_read += 1;
    }
    if blocks_read == 0 {
        if let Some(e) = last_error {
            return Err(Error::AggregationFailed(e));
        }
    }
    if let Some(mode) = snapshot.text("operation_mode") {
        let power = mode != <&str>::from(OperationMode::Off);
        snapshot.insert("power_state", power);
    }
    debug!(message = "status poll complete", fields = snapshot.len(), blocks_read);
    Ok(snapshot)
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct DeviceInfo {
    pub manufacturer: &'static str,
    pub model: &'static str,
    pub serial_number: &'static str,
    pub operation_mode: String,
}

async fn read_word<C: RegisterAccess>(
    device: &mut C,
    address: u16,
) -> Result<u16, connection::Error> {
    let words = device.read_registers(address, 1).await?;
    words.first().copied().ok_or_else(|| connection::Error::ShortResponse {
        address,
        expected: 1,
        received: words.len(),
    })
}

/// Check that the device answers, by reading its operation mode.
pub async fn probe<C: RegisterAccess>(device: &mut C) -> Result<DeviceInfo, connection::Error> {
    let address = const { RegisterIndex::from_address(550).unwrap() }.address();
    let mode = read_word(device, address).await?;
    Ok(DeviceInfo {
        manufacturer: "Maico",
        model: "WS320B",
        // The unit does not expose its serial number over Modbus.
        serial_number: "maico_ws320b_device",
        operation_mode: codec::decode_enum::<OperationMode>(mode, OperationMode::LABEL),
    })
}

/// Read a single register and decode it according to the register map.
pub async fn read_register<C: RegisterAccess>(
    device: &mut C,
    register: RegisterIndex,
) -> Result<Value, connection::Error> {
    let word = read_word(device, register.address()).await?;
    Ok(register.data_type().from_word(word))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeDevice;

    #[tokio::test]
    async fn all_zero_device() {
        let mut device = FakeDevice::new();
        let status = read_status(&mut device).await.unwrap();
        assert_eq!(status.text("fault_status"), Some("no_fault"));
        assert_eq!(status.text("info_messages"), Some("no_info"));
        assert_eq!(status.text("operation_mode"), Some("off"));
        assert_eq!(status.flag("power_state"), Some(false));
        assert_eq!(status.text("season"), Some("winter"));
        assert_eq!(status.text("room_temp_selection"), Some("comfort_bde"));
        assert_eq!(status.integer("hours_total"), Some(0));
        assert_eq!(status.flag("zone_damper"), None);
        assert_eq!(status.integer("zone_damper"), Some(0));
    }

    #[tokio::test]
    async fn blocks_are_read_in_order_one_at_a_time() {
        let mut device = FakeDevice::new();
        read_status(&mut device).await.unwrap();
        assert_eq!(
            device.reads,
            [
                (300, 3),
                (650, 8),
                (700, 8),
                (750, 15),
                (550, 5),
                (800, 9),
                (401, 4),
                (150, 10),
                (850, 10),
                (109, 1)
            ]
        );
    }

    #[tokio::test]
    async fn failed_block_only_drops_its_fields() {
        let mut device = FakeDevice::new().with(700, &[215]).failing(650..=657);
        let status = read_status(&mut device).await.unwrap();
        assert_eq!(status.decimal("room_temperature"), Some(21.5));
        assert_eq!(status.text("operation_mode"), Some("off"));
        assert!(!status.contains("current_ventilation_level"));
        assert!(!status.contains("supply_fan_speed"));
        assert!(status.filter_status().is_none());
    }

    #[tokio::test]
    async fn all_blocks_failing_yields_no_snapshot() {
        let mut device = FakeDevice::new().failing(0..=999);
        match read_status(&mut device).await {
            Err(Error::AggregationFailed(source)) => assert!(source.is_transport()),
            other => panic!("expected aggregation failure, got {other:?}"),
        }
        assert_eq!(device.reads.len(), BLOCKS.len());
    }

    #[tokio::test]
    async fn disconnected_device_is_not_polled() {
        let mut device = FakeDevice::new();
        device.connected = false;
        let result = read_status(&mut device).await;
        assert!(matches!(result, Err(Error::AggregationFailed(connection::Error::NotConnected))));
        assert!(device.reads.is_empty());
    }

    #[tokio::test]
    async fn decodes_populated_device() {
        let mut device = FakeDevice::new()
            .with(109, &[1])
            .with(150, &[12, 18, 6, 60, 100, 150, 200])
            .with(300, &[0xFFE2, 15, 260])
            .with(401, &[0, 3, 0, 0])
            .with(550, &[3, 1, 1, 215, 2])
            .with(650, &[2, 1200, 1180, 100, 98, 90, 120, 30])
            .with(700, &[210, 0, 0, 0xFFCE, 180, 220, 20, 0])
            .with(750, &[45, 40, 0, 0, 0, 4215, 0, 0, 0, 120, 0, 0, 0, 50, 800])
            .with(800, &[1, 1, 0, 1, 0, 1, 2, 1, 3])
            .with(850, &[0, 10, 0, 20, 0, 30, 0, 40, 1, 2]);
        let status = read_status(&mut device).await.unwrap();
        assert_eq!(status.decimal("room_temp_adjust"), Some(-3.0));
        assert_eq!(status.integer("supply_temp_min_cool"), Some(15));
        assert_eq!(status.decimal("room_temp_max"), Some(26.0));
        assert_eq!(status.integer("current_ventilation_level"), Some(2));
        assert_eq!(
            status.filter_status(),
            Some(FilterStatus {
                filter_device_days: 90,
                filter_outdoor_days: 120,
                filter_room_days: 30
            })
        );
        assert_eq!(status.decimal("inlet_air_temperature"), Some(-5.0));
        assert!(!status.contains("temp_before_ewt"));
        assert_eq!(status.integer("extract_air_humidity"), Some(45));
        assert_eq!(status.integer("humidity_sensor_1"), Some(40));
        assert_eq!(status.decimal("co2_sensor_1"), Some(421.5));
        assert_eq!(status.decimal("voc_sensor_1"), Some(12.0));
        assert_eq!(status.integer("air_quality_bus"), Some(800));
        assert_eq!(status.text("operation_mode"), Some("auto_sensor"));
        assert_eq!(status.flag("boost_ventilation"), Some(true));
        assert_eq!(status.text("season"), Some("summer"));
        assert_eq!(status.decimal("target_temperature"), Some(21.5));
        assert_eq!(status.flag("power_state"), Some(true));
        assert_eq!(status.flag("bypass_status"), Some(false));
        assert_eq!(status.flag("post_heater_relay"), Some(true));
        assert_eq!(status.integer("brine_pump"), Some(2));
        assert_eq!(status.integer("zone_damper"), Some(3));
        assert_eq!(status.text("fault_status"), Some("error_hi_0_lo_3"));
        assert_eq!(status.integer("error_code"), Some(3));
        assert_eq!(status.integer("volume_flow_intensive"), Some(200));
        assert_eq!(status.integer("hours_intensive"), Some(40));
        assert_eq!(status.integer("hours_total"), Some(65538));
        assert_eq!(status.text("room_temp_selection"), Some("external"));
    }

    #[tokio::test]
    async fn short_blocks_degrade() {
        let mut device = FakeDevice::new()
            .with(750, &[50, 51, 52, 53, 54, 999])
            .truncated(750, 6)
            .truncated(800, 4)
            .truncated(650, 3);
        let status = read_status(&mut device).await.unwrap();
        assert_eq!(status.integer("humidity_sensor_4"), Some(54));
        assert!(!status.contains("co2_sensor_1"));
        assert!(!status.contains("humidity_bus"));
        assert_eq!(status.flag("ptc_heater"), Some(false));
        assert!(!status.contains("switch_contact"));
        assert!(!status.contains("current_ventilation_level"));
        assert!(status.contains("room_temperature"));
    }

    #[tokio::test]
    async fn empty_blocks_yield_no_snapshot() {
        let mut device = BLOCKS
            .iter()
            .fold(FakeDevice::new(), |device, block| device.truncated(block.start.address(), 0));
        match read_status(&mut device).await {
            Err(Error::AggregationFailed(connection::Error::ShortResponse {
                address: 109,
                expected: 1,
                received: 0,
            })) => {}
            other => panic!("expected aggregation failure, got {other:?}"),
        }
        assert_eq!(device.reads.len(), BLOCKS.len());

        let mut device = FakeDevice::new().truncated(109, 0).truncated(650, 2);
        let status = read_status(&mut device).await.unwrap();
        assert!(!status.contains("room_temp_selection"));
        assert!(status.contains("room_temperature"));
    }

    #[tokio::test]
    async fn unknown_codes_do_not_fail_the_poll() {
        let mut device = FakeDevice::new().with(550, &[7, 0, 9]).with(109, &[4]);
        let status = read_status(&mut device).await.unwrap();
        assert_eq!(status.text("operation_mode"), Some("unknown_operation_mode_7"));
        assert_eq!(status.flag("power_state"), Some(true));
        assert_eq!(status.text("season"), Some("unknown_season_9"));
        assert_eq!(status.text("room_temp_selection"), Some("unknown_room_temp_selection_4"));
    }

    #[tokio::test]
    async fn power_state_needs_operation_mode() {
        let mut device = FakeDevice::new().failing(550..=554);
        let status = read_status(&mut device).await.unwrap();
        assert!(!status.contains("operation_mode"));
        assert!(!status.contains("power_state"));
    }

    #[tokio::test]
    async fn snapshot_serializes_flat() {
        let mut device = FakeDevice::new().with(650, &[1, 0, 0, 0, 0, 5, 6, 7]);
        let status = read_status(&mut device).await.unwrap();
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["current_ventilation_level"], 1);
        assert_eq!(json["filter_status"]["filter_room_days"], 7);
        assert_eq!(json["fault_status"], "no_fault");
        assert_eq!(json["power_state"], false);
    }

    #[tokio::test]
    async fn probe_and_single_reads() {
        let mut device = FakeDevice::new().with(550, &[1]).with(553, &[225]);
        let info = probe(&mut device).await.unwrap();
        assert_eq!(info.operation_mode, "manual");
        assert_eq!(device.reads, [(550, 1)]);
        let register = RegisterIndex::from_address(553).unwrap();
        let value = read_register(&mut device, register).await.unwrap();
        assert_eq!(value, Value::Celsius(225));
        assert_eq!(value.as_f64(), 22.5);
    }

    #[tokio::test]
    async fn empty_responses_are_errors() {
        let mut device = FakeDevice::new().with(550, &[1]).truncated(550, 0).truncated(553, 0);
        let info = probe(&mut device).await;
        assert!(matches!(
            info,
            Err(connection::Error::ShortResponse { address: 550, expected: 1, received: 0 })
        ));
        let register = RegisterIndex::from_address(553).unwrap();
        let value = read_register(&mut device, register).await;
        assert!(matches!(value, Err(connection::Error::ShortResponse { address: 553, .. })));
    }
}
