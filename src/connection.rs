use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_modbus::client::{Client as _, Context, Reader as _, Writer as _};
use tokio_modbus::prelude::ExceptionCode;
use tokio_modbus::slave::Slave;
use tokio_serial::SerialPortBuilderExt as _;
use tracing::{debug, info, trace};

pub const DEFAULT_PORT: u16 = 502;
pub const DEFAULT_BAUDRATE: u32 = 9600;
pub const DEFAULT_SLAVE_ID: u8 = 1;
pub const DEFAULT_RTU_TIMEOUT: Duration = Duration::from_secs(3);
pub const SUPPORTED_BAUDRATES: [u32; 8] = [1200, 2400, 4800, 9600, 19200, 38400, 57600, 115200];

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("neither a TCP host nor a serial port has been configured")]
    NoTransport,
    #[error("both a TCP host and a serial port have been configured")]
    ConflictingTransports,
    #[error("baudrate {0} is not supported (expected one of {SUPPORTED_BAUDRATES:?})")]
    UnsupportedBaudrate(u32),
    #[error("lookup of `{1}` failed")]
    LookupHost(#[source] std::io::Error, String),
    #[error("`{0}` did not resolve to any address")]
    NoAddresses(String),
    #[error("could not connect to `{1}` over TCP")]
    Connect(#[source] std::io::Error, String),
    #[error("could not open {1:?} for reading and writing")]
    OpenSerial(#[source] tokio_serial::Error, PathBuf),
    #[error("not connected to the device")]
    NotConnected,
    #[error("modbus exchange at register {0} failed")]
    Modbus(u16, #[source] tokio_modbus::Error),
    #[error("device responded to the request at register {0} with exception {1:?}")]
    Exception(u16, ExceptionCode),
    #[error("device did not respond within {0:?}")]
    Timeout(Duration),
    #[error("device returned {received} of {expected} registers starting at {address}")]
    ShortResponse { address: u16, expected: u16, received: usize },
}

impl Error {
    /// Whether this is a failure of an exchange with the device, as opposed to misconfiguration
    /// or a missing session.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Modbus(..)
                | Error::Exception(..)
                | Error::Timeout(_)
                | Error::ShortResponse { .. }
        )
    }
}

#[derive(clap::Parser, Clone, Debug)]
#[group(id = "connection::Args")]
pub struct Args {
    #[clap(flatten)]
    how: ConnectionGroup,

    /// The Modbus TCP port, used together with `--tcp`.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// The serial line speed, used together with `--rtu`.
    ///
    /// The line is always configured for 8 data bits, even parity and 1 stop bit.
    #[arg(long, default_value_t = DEFAULT_BAUDRATE)]
    baudrate: u32,

    /// The Modbus unit (slave) address of the ventilation unit.
    #[arg(long, short = 'i', default_value_t = DEFAULT_SLAVE_ID)]
    slave_id: u8,

    /// Consider a request failed if the response isn't received in this amount of time.
    ///
    /// Defaults to 3s over RTU. Over TCP the operating system's socket behaviour applies unless
    /// this is set.
    #[arg(long)]
    timeout: Option<humantime::Duration>,
}

#[derive(clap::Parser, Clone, Debug)]
#[group(required = true, multiple = false)]
pub struct ConnectionGroup {
    /// Connect to the ventilation unit over Modbus TCP (e.g. via a Modbus gateway).
    #[arg(long, value_name = "HOST")]
    tcp: Option<String>,
    /// Connect to the ventilation unit over serial Modbus RTU.
    ///
    /// Specify the path to the serial device.
    #[arg(long, value_name = "PATH")]
    rtu: Option<PathBuf>,
}

impl Args {
    pub fn to_config(&self) -> Result<ConnectionConfig, Error> {
        let config = ConnectionConfig::new(
            self.how.tcp.clone(),
            self.port,
            self.how.rtu.clone(),
            self.baudrate,
            self.slave_id,
        )?;
        Ok(match self.timeout {
            Some(timeout) => config.with_timeout(*timeout),
            None => config,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transport {
    Tcp { host: String, port: u16 },
    Rtu { serial_port: PathBuf, baudrate: u32 },
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Tcp { host, port } => write!(f, "{host}:{port}"),
            Transport::Rtu { serial_port, baudrate } => {
                write!(f, "serial {} ({baudrate} baud)", serial_port.display())
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub transport: Transport,
    pub slave_id: u8,
    timeout: Option<Duration>,
}

impl ConnectionConfig {
    /// TCP is used when `host` is given, RTU when `serial_port` is given. Exactly one of the two
    /// must be present.
    pub fn new(
        host: Option<String>,
        port: u16,
        serial_port: Option<PathBuf>,
        baudrate: u32,
        slave_id: u8,
    ) -> Result<Self, Error> {
        let transport = match (host, serial_port) {
            (Some(_), Some(_)) => return Err(Error::ConflictingTransports),
            (None, None) => return Err(Error::NoTransport),
            (Some(host), None) => Transport::Tcp { host, port },
            (None, Some(serial_port)) => {
                if !SUPPORTED_BAUDRATES.contains(&baudrate) {
                    return Err(Error::UnsupportedBaudrate(baudrate));
                }
                Transport::Rtu { serial_port, baudrate }
            }
        };
        Ok(Self { transport, slave_id, timeout: None })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn is_rtu(&self) -> bool {
        matches!(self.transport, Transport::Rtu { .. })
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        match self.transport {
            Transport::Rtu { .. } => Some(self.timeout.unwrap_or(DEFAULT_RTU_TIMEOUT)),
            Transport::Tcp { .. } => self.timeout,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

/// Primitive access to the holding registers of one device.
///
/// Implementations must not reorder or overlap requests: the device firmware does not reliably
/// handle more than one in-flight request per session, which `&mut self` enforces here.
pub trait RegisterAccess {
    /// Read `count` consecutive holding registers starting at `address`.
    fn read_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> impl Future<Output = Result<Vec<u16>, Error>> + Send;

    /// Write a single holding register.
    fn write_register(
        &mut self,
        address: u16,
        value: u16,
    ) -> impl Future<Output = Result<(), Error>> + Send;
}

/// A [`RegisterAccess`] whose session can be established and torn down.
pub trait Session: RegisterAccess {
    fn connect(&mut self) -> impl Future<Output = Result<(), Error>> + Send;
    /// Always leaves the session disconnected. Calling this when already disconnected is fine.
    fn disconnect(&mut self) -> impl Future<Output = ()> + Send;
    fn state(&self) -> ConnectionState;

    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }
}

/// One Modbus session with one ventilation unit.
pub struct Connection {
    config: ConnectionConfig,
    context: Option<Context>,
}

impl Connection {
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config, context: None }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    async fn connect_tcp(
        host: &str,
        port: u16,
        slave: Slave,
        timeout: Option<Duration>,
    ) -> Result<Context, Error> {
        let address = format!("{host}:{port}");
        info!(message = "connecting...", address);
        let addresses = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| Error::LookupHost(e, address.clone()))?
            .collect::<Vec<SocketAddr>>();
        debug!(message = "resolved", ?addresses);
        let mut last_error = None;
        for socket_address in addresses {
            let connect = tokio_modbus::client::tcp::connect_slave(socket_address, slave);
            match with_timeout(timeout, connect).await {
                Ok(Ok(context)) => return Ok(context),
                Ok(Err(e)) => {
                    debug!(
                        message = "could not connect",
                        %socket_address,
                        error = (&e as &dyn std::error::Error)
                    );
                    last_error = Some(e);
                }
                Err(_) => {
                    debug!(message = "connect timed out", %socket_address);
                    last_error = Some(std::io::Error::from(std::io::ErrorKind::TimedOut));
                }
            }
        }
        Err(match last_error {
            Some(e) => Error::Connect(e, address),
            None => Error::NoAddresses(address),
        })
    }

    fn open_rtu(
        serial_port: &Path,
        baudrate: u32,
        slave: Slave,
        timeout: Duration,
    ) -> Result<Context, Error> {
        info!(message = "opening serial line...", serial_port = %serial_port.display(), baudrate);
        let stream = tokio_serial::new(serial_port.to_string_lossy(), baudrate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::Even)
            .stop_bits(tokio_serial::StopBits::One)
            .timeout(timeout)
            .open_native_async()
            .map_err(|e| Error::OpenSerial(e, serial_port.to_path_buf()))?;
        Ok(tokio_modbus::client::rtu::attach_slave(stream, slave))
    }
}

impl Session for Connection {
    async fn connect(&mut self) -> Result<(), Error> {
        if self.context.is_some() {
            self.disconnect().await;
        }
        let slave = Slave(self.config.slave_id);
        let timeout = self.config.request_timeout();
        let context = match &self.config.transport {
            Transport::Tcp { host, port } => Self::connect_tcp(host, *port, slave, timeout).await?,
            Transport::Rtu { serial_port, baudrate } => Self::open_rtu(
                serial_port,
                *baudrate,
                slave,
                timeout.unwrap_or(DEFAULT_RTU_TIMEOUT),
            )?,
        };
        self.context = Some(context);
        info!(message = "connected", transport = %self.config.transport);
        Ok(())
    }

    async fn disconnect(&mut self) {
        let Some(mut context) = self.context.take() else {
            return;
        };
        if let Err(e) = context.disconnect().await {
            debug!(message = "error while shutting down the session", error = ?e);
        }
        info!(message = "disconnected", transport = %self.config.transport);
    }

    fn state(&self) -> ConnectionState {
        match self.context {
            Some(_) => ConnectionState::Connected,
            None => ConnectionState::Disconnected,
        }
    }
}

impl RegisterAccess for Connection {
    async fn read_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>, Error> {
        let timeout = self.config.request_timeout();
        let context = self.context.as_mut().ok_or(Error::NotConnected)?;
        trace!(message = "reading holding registers", address, count);
        let response = with_timeout(timeout, context.read_holding_registers(address, count)).await?;
        let words = response
            .map_err(|e| Error::Modbus(address, e))?
            .map_err(|code| Error::Exception(address, code))?;
        trace!(message = "read holding registers", address, ?words);
        Ok(words)
    }

    async fn write_register(&mut self, address: u16, value: u16) -> Result<(), Error> {
        let timeout = self.config.request_timeout();
        let context = self.context.as_mut().ok_or(Error::NotConnected)?;
        trace!(message = "writing holding register", address, value);
        let response = with_timeout(timeout, context.write_single_register(address, value)).await?;
        response
            .map_err(|e| Error::Modbus(address, e))?
            .map_err(|code| Error::Exception(address, code))?;
        debug!(message = "wrote holding register", address, value);
        Ok(())
    }
}

async fn with_timeout<F: Future>(timeout: Option<Duration>, future: F) -> Result<F::Output, Error> {
    match timeout {
        None => Ok(future.await),
        Some(duration) => {
            tokio::time::timeout(duration, future).await.map_err(|_| Error::Timeout(duration))
        }
    }
}
