//! Modbus TCP/RTU client for Maico WS ventilation units (WS320B and relatives).
//!
//! [`connection::Connection`] holds the session, [`status::read_status`] turns the register
//! blocks into a [`status::StatusSnapshot`] and [`controls`] writes validated settings.

pub mod codec;
pub mod commands;
pub mod connection;
pub mod controls;
pub mod coordinator;
pub mod output;
pub mod registers;
pub mod status;

#[cfg(test)]
mod testing;
