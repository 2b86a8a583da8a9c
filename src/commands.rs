use crate::connection::{self, Connection, Session as _};
use crate::output;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not start the async runtime")]
    Runtime(#[source] std::io::Error),
    #[error("the connection parameters are not valid")]
    Configuration(#[source] connection::Error),
    #[error("could not connect to the device")]
    Connect(#[source] connection::Error),
    #[error("`{0}` is not a known register name or address")]
    UnknownRegister(String),
    #[error("could not read register {1}")]
    Read(#[source] connection::Error, &'static str),
    #[error("could not poll the device status")]
    Status(#[source] crate::status::Error),
    #[error("could not change the device setting")]
    Control(#[source] crate::controls::Error),
    #[error("could not produce the output")]
    Output(#[source] output::Error),
}

impl From<output::Error> for Error {
    fn from(e: output::Error) -> Self {
        Error::Output(e)
    }
}

fn runtime() -> Result<tokio::runtime::Runtime, Error> {
    tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(Error::Runtime)
}

async fn connect(args: &connection::Args) -> Result<Connection, Error> {
    let config = args.to_config().map_err(Error::Configuration)?;
    let mut connection = Connection::new(config);
    connection.connect().await.map_err(Error::Connect)?;
    Ok(connection)
}

fn write_status(
    output: &mut output::Output,
    snapshot: &crate::status::StatusSnapshot,
) -> Result<(), Error> {
    output.table_headers(vec!["Field", "Value"])?;
    for (field, value) in snapshot.iter() {
        output.result(
            || vec![field.to_string(), value.to_string()],
            || serde_json::json!({ "field": field, "value": value }),
        )?;
    }
    Ok(())
}

pub mod registers {
    use crate::output;
    use crate::registers::{DataType, Mode, Value};

    /// Search and output known modbus registers.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        output: output::Args,
        /// Only list registers whose address, name or description contains this text.
        filter: Option<String>,
    }

    #[derive(serde::Serialize)]
    pub struct RegisterSchema {
        pub address: u16,
        pub name: &'static str,
        pub mode: Mode,
        pub data_type: DataType,
        pub minimum: Option<Value>,
        pub maximum: Option<Value>,
        pub description: &'static str,
    }

    impl RegisterSchema {
        pub fn all_registers() -> impl Iterator<Item = Self> {
            use crate::registers::*;
            use std::iter::zip;
            zip(
                zip(
                    zip(zip(zip(zip(ADDRESSES, NAMES), MODES), DATA_TYPES), MINIMUM_VALUES),
                    MAXIMUM_VALUES,
                ),
                DESCRIPTIONS,
            )
            .map(
                |(
                    (((((&address, &name), &mode), &data_type), &minimum), &maximum),
                    &description,
                )| {
                    RegisterSchema {
                        address,
                        name,
                        mode,
                        data_type,
                        minimum,
                        maximum,
                        description,
                    }
                },
            )
        }

        pub fn is_match(&self, pattern: &str) -> bool {
            let pattern = pattern.to_uppercase();
            self.name.contains(&pattern)
                || self.description.to_uppercase().contains(&pattern)
                || self.address.to_string().contains(&pattern)
        }
    }

    pub fn run(args: Args) -> Result<(), super::Error> {
        let mut output = args.output.to_output()?;
        output.table_headers(vec![
            "Address",
            "Name",
            "Mode",
            "Type",
            "Min",
            "Max",
            "Description",
        ])?;
        for register in RegisterSchema::all_registers() {
            if let Some(pattern) = &args.filter {
                if !register.is_match(pattern) {
                    continue;
                }
            }
            output.result(
                || {
                    vec![
                        register.address.to_string(),
                        register.name.to_string(),
                        register.mode.to_string(),
                        register.data_type.to_string(),
                        register.minimum.map(|v| v.to_string()).unwrap_or_default(),
                        register.maximum.map(|v| v.to_string()).unwrap_or_default(),
                        register.description.to_string(),
                    ]
                },
                || &register,
            )?;
        }
        Ok(output.commit()?)
    }

}

pub mod read {
    use crate::connection::{self, Session as _};
    use crate::output;
    use crate::registers::RegisterIndex;
    use crate::status;

    /// Read individual registers from the device.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        connection: connection::Args,
        #[clap(flatten)]
        output: output::Args,
        /// Registers to read, by address (`553`) or by name (`TARGET_ROOM_TEMP`).
        #[arg(required = true)]
        registers: Vec<String>,
    }

    #[derive(serde::Serialize)]
    struct Record {
        address: u16,
        name: &'static str,
        value: crate::registers::Value,
    }

    pub fn run(args: Args) -> Result<(), super::Error> {
        let registers = args
            .registers
            .iter()
            .map(|r| {
                RegisterIndex::lookup(r).ok_or_else(|| super::Error::UnknownRegister(r.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let mut output = args.output.to_output()?;
        output.table_headers(vec!["Address", "Name", "Value", "Description"])?;
        super::runtime()?.block_on(async {
            let mut connection = super::connect(&args.connection).await?;
            let mut result: Result<(), super::Error> = Ok(());
            for register in registers {
                let value = match status::read_register(&mut connection, register).await {
                    Ok(value) => value,
                    Err(e) => {
                        result = Err(super::Error::Read(e, register.name()));
                        break;
                    }
                };
                let record = Record { address: register.address(), name: register.name(), value };
                let written = output.result(
                    || {
                        vec![
                            record.address.to_string(),
                            record.name.to_string(),
                            record.value.to_string(),
                            register.description().to_string(),
                        ]
                    },
                    || &record,
                );
                if let Err(e) = written {
                    result = Err(e.into());
                    break;
                }
            }
            connection.disconnect().await;
            result
        })?;
        Ok(output.commit()?)
    }
}

pub mod status {
    use crate::connection::{self, Session as _};
    use crate::output;

    /// Poll the full device status once.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        connection: connection::Args,
        #[clap(flatten)]
        output: output::Args,
    }

    pub fn run(args: Args) -> Result<(), super::Error> {
        let mut output = args.output.to_output()?;
        let snapshot = super::runtime()?.block_on(async {
            let mut connection = super::connect(&args.connection).await?;
            let snapshot = crate::status::read_status(&mut connection).await;
            connection.disconnect().await;
            snapshot.map_err(super::Error::Status)
        })?;
        super::write_status(&mut output, &snapshot)?;
        Ok(output.commit()?)
    }
}

pub mod watch {
    use crate::connection::{self, Connection};
    use crate::coordinator::{self, Coordinator};
    use crate::output;
    use tokio_util::sync::CancellationToken;
    use tracing::info;

    /// Poll the device status periodically until interrupted.
    ///
    /// Connection failures are retried, so this can be started before the unit is reachable.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        connection: connection::Args,
        #[clap(flatten)]
        coordinator: coordinator::Args,
        #[clap(flatten)]
        output: output::Args,
    }

    #[derive(serde::Serialize)]
    struct Record<'a> {
        time: &'a str,
        field: &'static str,
        value: &'a crate::status::StatusValue,
    }

    pub fn run(args: Args) -> Result<(), super::Error> {
        let config = args.connection.to_config().map_err(super::Error::Configuration)?;
        let mut output = args.output.to_output()?;
        output.table_headers(vec!["Time", "Field", "Value"])?;
        let settings = args.coordinator.to_settings();
        super::runtime()?.block_on(async {
            let cancel = CancellationToken::new();
            let interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!(message = "interrupted, stopping");
                    interrupt.cancel();
                }
            });
            let mut coordinator = Coordinator::new(Connection::new(config), settings);
            let result = coordinator
                .run(&cancel, |snapshot| {
                    let time = humantime::format_rfc3339_seconds(std::time::SystemTime::now());
                    let time = time.to_string();
                    for (field, value) in snapshot.iter() {
                        output.result(
                            || vec![time.clone(), field.to_string(), value.to_string()],
                            || Record { time: &time, field, value },
                        )?;
                    }
                    output.flush()
                })
                .await;
            coordinator.shutdown().await;
            result
        })?;
        Ok(output.commit()?)
    }
}

pub mod set {
    use crate::codec::{CodeTable, OperationMode, RoomTempSelection, Season, VentilationLevel};
    use crate::connection::{self, RegisterAccess, Session as _};
    use crate::controls;
    use crate::output;

    /// Change a device setting, then print the refreshed status.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        connection: connection::Args,
        #[clap(flatten)]
        output: output::Args,
        /// Do not poll the status after the write.
        #[arg(long)]
        no_refresh: bool,
        #[command(subcommand)]
        parameter: Parameter,
    }

    #[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
    pub enum Filter {
        Device,
        Outdoor,
        Room,
    }

    #[derive(clap::Subcommand, Clone, Debug, PartialEq)]
    pub enum Parameter {
        /// Operation mode: a name (`off`, `manual`, `auto_time`, ...) or its code.
        OperationMode {
            #[arg(value_parser = parse_code::<OperationMode>)]
            mode: u16,
        },
        /// Ventilation level: a name (`reduced`, `nominal`, ...) or its code.
        VentilationLevel {
            #[arg(value_parser = parse_code::<VentilationLevel>)]
            level: u16,
        },
        /// Target room temperature in °C, 18 to 25.5 in 0.5 steps.
        TargetTemperature { celsius: f64 },
        /// Season: `winter`, `summer` or its code.
        Season {
            #[arg(value_parser = parse_code::<Season>)]
            season: u16,
        },
        /// Turn boost ventilation on or off.
        Boost {
            #[arg(
                value_parser = clap::builder::BoolishValueParser::new(),
                action = clap::ArgAction::Set
            )]
            active: bool,
        },
        /// Minimum supply air temperature for cooling, in whole °C.
        SupplyTempMinCool { celsius: u16 },
        /// Maximum room temperature in °C.
        RoomTempMax {
            #[arg(allow_negative_numbers = true)]
            celsius: f64,
        },
        /// Room temperature adjustment in °C, -3 to 3.
        RoomTempAdjust {
            #[arg(allow_negative_numbers = true)]
            celsius: f64,
        },
        /// Which sensor provides the room temperature.
        RoomTempSelection {
            #[arg(value_parser = parse_code::<RoomTempSelection>)]
            selection: u16,
        },
        /// Filter lifespan in months.
        FilterMonths {
            #[arg(value_enum)]
            filter: Filter,
            months: u16,
        },
        /// Acknowledge a filter change.
        ResetFilter {
            #[arg(value_enum)]
            filter: Filter,
        },
        /// Reset the current error.
        ResetError,
        /// Relative humidity (%) from a bus sensor. Must be refreshed at least every 10 minutes.
        BusHumidity { percent: u16 },
        /// Air quality (ppm) from a bus sensor. Must be refreshed at least every 10 minutes.
        BusAirQuality { ppm: u16 },
        /// Room temperature in °C from an external sensor.
        ExternalRoomTemp {
            #[arg(allow_negative_numbers = true)]
            celsius: f64,
        },
        /// Room temperature in °C from a bus sensor. Must be refreshed at least every 10 minutes.
        BusRoomTemp {
            #[arg(allow_negative_numbers = true)]
            celsius: f64,
        },
    }

    /// Accept either a numeric code or one of the code table's names.
    ///
    /// Numbers are passed through unchecked so that the range check happens in one place.
    fn parse_code<T>(s: &str) -> Result<u16, String>
    where
        T: CodeTable + std::str::FromStr + strum::VariantNames,
    {
        if let Ok(code) = s.parse::<u16>() {
            return Ok(code);
        }
        s.parse::<T>()
            .map(CodeTable::code)
            .map_err(|_| format!("expected a number or one of: {}", T::VARIANTS.join(", ")))
    }

    pub(crate) async fn apply<C: RegisterAccess>(
        device: &mut C,
        parameter: &Parameter,
    ) -> Result<(), controls::Error> {
        match *parameter {
            Parameter::OperationMode { mode } => controls::set_operation_mode(device, mode).await,
            Parameter::VentilationLevel { level } => {
                controls::set_ventilation_level(device, level).await
            }
            Parameter::TargetTemperature { celsius } => {
                controls::set_target_room_temperature(device, celsius).await
            }
            Parameter::Season { season } => controls::set_season(device, season).await,
            Parameter::Boost { active } => controls::set_boost_ventilation(device, active).await,
            Parameter::SupplyTempMinCool { celsius } => {
                controls::write_supply_temp_min_cool(device, celsius).await
            }
            Parameter::RoomTempMax { celsius } => {
                controls::write_room_temp_max(device, celsius).await
            }
            Parameter::RoomTempAdjust { celsius } => {
                controls::set_room_temp_adjust(device, celsius).await
            }
            Parameter::RoomTempSelection { selection } => {
                controls::set_room_temp_selection(device, selection).await
            }
            Parameter::FilterMonths { filter: Filter::Device, months } => {
                controls::set_filter_device_months(device, months).await
            }
            Parameter::FilterMonths { filter: Filter::Outdoor, months } => {
                controls::set_filter_outdoor_months(device, months).await
            }
            Parameter::FilterMonths { filter: Filter::Room, months } => {
                controls::set_filter_room_months(device, months).await
            }
            Parameter::ResetFilter { filter: Filter::Device } => {
                controls::reset_filter_device(device).await
            }
            Parameter::ResetFilter { filter: Filter::Outdoor } => {
                controls::reset_filter_outdoor(device).await
            }
            Parameter::ResetFilter { filter: Filter::Room } => {
                controls::reset_filter_room(device).await
            }
            Parameter::ResetError => controls::reset_error(device).await,
            Parameter::BusHumidity { percent } => {
                controls::write_bus_humidity(device, percent).await
            }
            Parameter::BusAirQuality { ppm } => controls::write_bus_air_quality(device, ppm).await,
            Parameter::ExternalRoomTemp { celsius } => {
                controls::write_external_room_temp(device, celsius).await
            }
            Parameter::BusRoomTemp { celsius } => {
                controls::write_bus_room_temp(device, celsius).await
            }
        }
    }

    pub fn run(args: Args) -> Result<(), super::Error> {
        let mut output = args.output.to_output()?;
        let snapshot = super::runtime()?.block_on(async {
            let mut connection = super::connect(&args.connection).await?;
            let result = match apply(&mut connection, &args.parameter).await {
                Err(e) => Err(super::Error::Control(e)),
                Ok(()) if args.no_refresh => Ok(None),
                Ok(()) => crate::status::read_status(&mut connection)
                    .await
                    .map(Some)
                    .map_err(super::Error::Status),
            };
            connection.disconnect().await;
            result
        })?;
        if let Some(snapshot) = snapshot {
            super::write_status(&mut output, &snapshot)?;
        }
        Ok(output.commit()?)
    }

}

pub mod probe {
    use crate::connection::{self, Session as _};
    use crate::output;

    /// Check that the device can be reached with the given connection parameters.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        connection: connection::Args,
        #[clap(flatten)]
        output: output::Args,
    }

    pub fn run(args: Args) -> Result<(), super::Error> {
        let mut output = args.output.to_output()?;
        let info = super::runtime()?.block_on(async {
            let mut connection = super::connect(&args.connection).await?;
            let info = crate::status::probe(&mut connection).await;
            connection.disconnect().await;
            info.map_err(|e| super::Error::Read(e, "OPERATION_MODE"))
        })?;
        output.table_headers(vec!["Manufacturer", "Model", "Serial number", "Operation mode"])?;
        output.result(
            || {
                vec![
                    info.manufacturer.to_string(),
                    info.model.to_string(),
                    info.serial_number.to_string(),
                    info.operation_mode.clone(),
                ]
            },
            || &info,
        )?;
        Ok(output.commit()?)
    }
}
