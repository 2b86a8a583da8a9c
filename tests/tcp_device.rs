//! End-to-end tests against a simulated ventilation unit served over Modbus TCP on loopback.

use std::collections::HashMap;
use std::future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use maico_ws_tools::connection::{
    Connection, ConnectionConfig, ConnectionState, Error, RegisterAccess as _, Session as _,
};
use maico_ws_tools::{controls, status};
use tokio::net::TcpListener;
use tokio_modbus::prelude::*;
use tokio_modbus::server::tcp::{Server, accept_tcp_connection};

type Registers = Arc<Mutex<HashMap<u16, u16>>>;

struct SimulatedUnit {
    registers: Registers,
}

impl tokio_modbus::server::Service for SimulatedUnit {
    type Request = Request<'static>;
    type Response = Response;
    type Exception = ExceptionCode;
    type Future = future::Ready<Result<Self::Response, Self::Exception>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        let mut registers = self.registers.lock().unwrap();
        let response = match req {
            Request::ReadHoldingRegisters(address, count) => (address..address + count)
                .map(|a| registers.get(&a).copied().ok_or(ExceptionCode::IllegalDataAddress))
                .collect::<Result<Vec<u16>, _>>()
                .map(Response::ReadHoldingRegisters),
            Request::WriteSingleRegister(address, value) => match registers.get_mut(&address) {
                Some(slot) => {
                    *slot = value;
                    Ok(Response::WriteSingleRegister(address, value))
                }
                None => Err(ExceptionCode::IllegalDataAddress),
            },
            _ => Err(ExceptionCode::IllegalFunction),
        };
        future::ready(response)
    }
}

/// A unit with every status register present except the operating hour counters.
fn unit_registers() -> Registers {
    let mut registers = HashMap::new();
    let mut set = |address: u16, words: &[u16]| {
        for (address, word) in (address..).zip(words) {
            registers.insert(address, *word);
        }
    };
    set(109, &[2]);
    set(150, &[6, 12, 3, 30, 90, 130, 180, 0, 0, 0]);
    set(300, &[5, 18, 260]);
    set(401, &[0, 0, 0, 7]);
    set(405, &[0]);
    set(550, &[1, 0, 0, 210, 3]);
    set(650, &[3, 1400, 1390, 130, 128, 100, 200, 50]);
    set(700, &[221, 0, 85, 80, 190, 222, 95, 0]);
    set(750, &[48, 0, 0, 0, 0, 6500, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
    set(800, &[1, 1, 0, 0, 0, 0, 0, 0, 0]);
    Arc::new(Mutex::new(registers))
}

async fn start_unit(registers: Registers) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let socket_addr = listener.local_addr().unwrap();
    let server = Server::new(listener);
    let on_connected = move |stream, socket_addr| {
        let registers = Arc::clone(&registers);
        async move {
            accept_tcp_connection(stream, socket_addr, move |_socket_addr| {
                Ok(Some(SimulatedUnit { registers: Arc::clone(&registers) }))
            })
        }
    };
    let on_process_error = |err| eprintln!("simulated unit: {err}");
    tokio::spawn(async move {
        if let Err(e) = server.serve(&on_connected, on_process_error).await {
            eprintln!("simulated unit stopped: {e}");
        }
    });
    socket_addr
}

fn connection_to(socket_addr: SocketAddr) -> Connection {
    let config = ConnectionConfig::new(
        Some(socket_addr.ip().to_string()),
        socket_addr.port(),
        None,
        9600,
        1,
    )
    .unwrap()
    .with_timeout(Duration::from_secs(2));
    Connection::new(config)
}

#[tokio::test]
async fn polls_status_over_tcp() {
    let socket_addr = start_unit(unit_registers()).await;
    let mut connection = connection_to(socket_addr);
    connection.connect().await.unwrap();
    assert_eq!(connection.state(), ConnectionState::Connected);

    let snapshot = status::read_status(&mut connection).await.unwrap();
    assert_eq!(snapshot.decimal("room_temperature"), Some(22.1));
    assert_eq!(snapshot.decimal("room_temp_adjust"), Some(0.5));
    assert_eq!(snapshot.integer("supply_temp_min_cool"), Some(18));
    assert_eq!(snapshot.text("operation_mode"), Some("manual"));
    assert_eq!(snapshot.flag("power_state"), Some(true));
    assert_eq!(snapshot.integer("extract_air_humidity"), Some(48));
    assert_eq!(snapshot.decimal("co2_sensor_1"), Some(650.0));
    assert_eq!(snapshot.text("fault_status"), Some("no_fault"));
    assert_eq!(snapshot.text("info_messages"), Some("info_hi_0_lo_7"));
    assert_eq!(snapshot.text("room_temp_selection"), Some("internal"));
    assert_eq!(snapshot.filter_status().map(|f| f.filter_room_days), Some(50));
    // The unit rejects the operating hours block; only those fields go missing.
    assert!(!snapshot.contains("hours_total"));

    connection.disconnect().await;
}

#[tokio::test]
async fn writes_reach_the_unit() {
    let registers = unit_registers();
    let socket_addr = start_unit(Arc::clone(&registers)).await;
    let mut connection = connection_to(socket_addr);
    connection.connect().await.unwrap();

    controls::set_ventilation_level(&mut connection, 4).await.unwrap();
    controls::set_target_room_temperature(&mut connection, 22.5).await.unwrap();
    controls::reset_error(&mut connection).await.unwrap();
    assert_eq!(connection.read_registers(553, 2).await.unwrap(), [225, 4]);
    {
        let registers = registers.lock().unwrap();
        assert_eq!(registers[&405], 1);
    }

    let rejected = controls::set_ventilation_level(&mut connection, 5).await;
    assert!(matches!(rejected, Err(controls::Error::InvalidParameter { .. })));
    assert_eq!(connection.read_registers(554, 1).await.unwrap(), [4]);

    connection.disconnect().await;
}

#[tokio::test]
async fn exceptions_and_disconnects_are_reported() {
    let socket_addr = start_unit(unit_registers()).await;
    let mut connection = connection_to(socket_addr);
    connection.connect().await.unwrap();

    let missing = connection.read_registers(850, 10).await;
    assert!(matches!(missing, Err(Error::Exception(850, ExceptionCode::IllegalDataAddress))));
    assert!(missing.unwrap_err().is_transport());

    let probed = status::probe(&mut connection).await.unwrap();
    assert_eq!(probed.operation_mode, "manual");

    connection.disconnect().await;
    connection.disconnect().await;
    assert_eq!(connection.state(), ConnectionState::Disconnected);
    assert!(matches!(connection.read_registers(550, 1).await, Err(Error::NotConnected)));
    let poll = status::read_status(&mut connection).await;
    assert!(matches!(poll, Err(status::Error::AggregationFailed(Error::NotConnected))));

    connection.connect().await.unwrap();
    assert!(connection.read_registers(550, 5).await.is_ok());
    connection.disconnect().await;
}

#[tokio::test]
async fn unreachable_unit_fails_to_connect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let socket_addr = listener.local_addr().unwrap();
    drop(listener);
    let mut connection = connection_to(socket_addr);
    let result = connection.connect().await;
    assert!(matches!(result, Err(Error::Connect(..))), "{result:?}");
    assert_eq!(connection.state(), ConnectionState::Disconnected);
}
