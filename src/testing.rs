//! An in-memory ventilation unit for unit tests.

use crate::connection::{ConnectionState, Error, RegisterAccess, Session};
use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::time::Duration;

pub(crate) struct FakeDevice {
    pub registers: BTreeMap<u16, u16>,
    /// Requests touching any of these addresses time out.
    pub failing: Vec<RangeInclusive<u16>>,
    /// Reads starting at the key return at most this many words.
    pub truncated: BTreeMap<u16, u16>,
    pub reads: Vec<(u16, u16)>,
    pub writes: Vec<(u16, u16)>,
    /// Number of upcoming `connect` calls that fail.
    pub refuse_connects: usize,
    pub connects: usize,
    pub connected: bool,
}

impl FakeDevice {
    /// A connected device with every register reading zero.
    pub fn new() -> Self {
        Self {
            registers: BTreeMap::new(),
            failing: Vec::new(),
            truncated: BTreeMap::new(),
            reads: Vec::new(),
            writes: Vec::new(),
            refuse_connects: 0,
            connects: 0,
            connected: true,
        }
    }

    pub fn with(mut self, address: u16, words: &[u16]) -> Self {
        for (address, word) in (address..).zip(words) {
            self.registers.insert(address, *word);
        }
        self
    }

    pub fn failing(mut self, range: RangeInclusive<u16>) -> Self {
        self.failing.push(range);
        self
    }

    pub fn truncated(mut self, address: u16, count: u16) -> Self {
        self.truncated.insert(address, count);
        self
    }

    fn fails(&self, address: u16, count: u16) -> bool {
        let last = address.saturating_add(count.saturating_sub(1));
        self.failing.iter().any(|r| *r.start() <= last && address <= *r.end())
    }
}

impl RegisterAccess for FakeDevice {
    async fn read_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>, Error> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        self.reads.push((address, count));
        if self.fails(address, count) {
            return Err(Error::Timeout(Duration::from_secs(3)));
        }
        let count = self.truncated.get(&address).map_or(count, |&limit| count.min(limit));
        Ok((address..address + count)
            .map(|a| self.registers.get(&a).copied().unwrap_or(0))
            .collect())
    }

    async fn write_register(&mut self, address: u16, value: u16) -> Result<(), Error> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        if self.fails(address, 1) {
            return Err(Error::Timeout(Duration::from_secs(3)));
        }
        self.writes.push((address, value));
        self.registers.insert(address, value);
        Ok(())
    }
}

impl Session for FakeDevice {
    async fn connect(&mut self) -> Result<(), Error> {
        self.connects += 1;
        if self.refuse_connects > 0 {
            self.refuse_connects -= 1;
            self.connected = false;
            return Err(Error::NoAddresses("fake:502".into()));
        }
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.connected = false;
    }

    fn state(&self) -> ConnectionState {
        if self.connected { ConnectionState::Connected } else { ConnectionState::Disconnected }
    }
}
