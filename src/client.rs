use std::ops::ControlFlow;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Local;
use serde::{Deserialize, Serialize};

use super::*;
use crate::core::{DecodedBlock, RegisterBlock};
use crate::models::{BatteryStatus, DcDcStatus, DeviceInfo, InverterStatus, Reading};
use crate::registers::{
    self, BATTERY_READ_STATUS, CONTROLLER_READ_00_22, DCDC_READ_STATUS, DEVICE_MODEL, DEVICE_SERIAL, DEVICE_VERSION,
    INVERTER_READ_STATUS, LOAD_STATE, LOAD_SWITCH_REGISTER,
};
use crate::transport::{DEFAULT_BAUD_RATE, DEFAULT_TIMEOUT, SerialSettings, SerialTransport, Transport};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(100);
/// Pause between sending a request and reading the answer.
pub const DEFAULT_TURNAROUND: Duration = Duration::from_millis(50);

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub port: String,
    pub device_address: u8,
    pub baud_rate: u32,
    #[serde(rename = "timeout_ms", with = "millis")]
    pub timeout: Duration,
    pub max_attempts: u32,
    /// Multiplied by the attempt number before each retry.
    #[serde(rename = "retry_delay_ms", with = "millis")]
    pub retry_delay: Duration,
    #[serde(rename = "turnaround_ms", with = "millis")]
    pub turnaround: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            port: String::new(),
            device_address: BROADCAST_ADDRESS,
            baud_rate: DEFAULT_BAUD_RATE,
            timeout: DEFAULT_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
            turnaround: DEFAULT_TURNAROUND,
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port.is_empty() {
            return Err(ConfigError::PortMissing);
        }
        if self.baud_rate == 0 {
            return Err(ConfigError::InvalidBaudRate(self.baud_rate));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidAttempts(self.max_attempts));
        }
        Ok(())
    }

    pub fn serial_settings(&self) -> SerialSettings {
        SerialSettings {
            port: self.port.clone(),
            baud_rate: self.baud_rate,
            timeout: self.timeout,
        }
    }
}

pub struct ClientBuilder {
    config: ClientConfig,
}

impl ClientBuilder {
    pub fn port(mut self, port: impl Into<String>) -> Self {
        self.config.port = port.into();
        self
    }

    pub fn device_address(mut self, address: u8) -> Self {
        self.config.device_address = address;
        self
    }

    pub fn baud_rate(mut self, baud_rate: u32) -> Self {
        self.config.baud_rate = baud_rate;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.config.retry_delay = delay;
        self
    }

    pub fn turnaround(mut self, turnaround: Duration) -> Self {
        self.config.turnaround = turnaround;
        self
    }

    /// Replaces everything set so far.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<RenogyClient<SerialTransport>> {
        RenogyClient::with_transport(self.config, SerialTransport::new())
    }

    pub fn build_with<T: Transport>(self, transport: T) -> Result<RenogyClient<T>> {
        RenogyClient::with_transport(self.config, transport)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

/// Modbus RTU client for a single Renogy device.
///
/// One request is in flight at a time: every call finishes (success,
/// exhausted retries or fatal error) before the next one starts. The port
/// is closed on [`disconnect`](Self::disconnect), on fatal errors and on
/// drop.
pub struct RenogyClient<T: Transport = SerialTransport> {
    config: ClientConfig,
    transport: T,
    state: ConnectionState,
}

impl RenogyClient<SerialTransport> {
    pub fn builder() -> ClientBuilder {
        ClientBuilder {
            config: ClientConfig::default(),
        }
    }

    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::with_transport(config, SerialTransport::new())
    }
}

impl<T: Transport> RenogyClient<T> {
    pub fn with_transport(config: ClientConfig, transport: T) -> Result<Self> {
        config.validate()?;
        Ok(RenogyClient {
            config,
            transport,
            state: ConnectionState::Disconnected,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        if let Err(e) = self.transport.open(&self.config.serial_settings()) {
            log::error!("Connect to {} failed: {}", self.config.port, e);
            return Err(e);
        }
        log::info!("Connected to {} at {} baud", self.config.port, self.config.baud_rate);
        self.state = ConnectionState::Connected;
        Ok(())
    }

    pub fn disconnect(&mut self) {
        if self.transport.is_open() {
            self.transport.close();
            log::info!("Disconnected from {}", self.config.port);
        }
        self.state = ConnectionState::Disconnected;
    }

    /// Connects, runs `f` and disconnects on every exit path.
    pub fn session<R>(&mut self, f: impl FnOnce(&mut Self) -> Result<R>) -> Result<R> {
        self.connect()?;
        let result = f(self);
        self.disconnect();
        result
    }

    /// Raw 0x03 read returning register values.
    pub fn read_registers(&mut self, start: u16, count: u16) -> Result<Vec<u16>> {
        self.read_words(READ_HOLDING_REGISTERS, start, count)
    }

    /// Raw 0x04 read returning register values.
    pub fn read_input_registers(&mut self, start: u16, count: u16) -> Result<Vec<u16>> {
        self.read_words(READ_INPUT_REGISTERS, start, count)
    }

    pub fn read_block(&mut self, block: &RegisterBlock) -> Result<DecodedBlock> {
        let payload = self.read_payload(block.function_code, block.start, block.count)?;
        Ok(block.decode(&payload)?)
    }

    pub fn read_device_info(&mut self) -> Result<DeviceInfo> {
        let model = self.read_block(&DEVICE_MODEL)?;
        let version = self.read_block(&DEVICE_VERSION)?;
        let serial = self.read_block(&DEVICE_SERIAL)?;
        Ok(DeviceInfo::from_blocks(&model, &version, &serial)?)
    }

    /// Operating data without device identity.
    pub fn read_realtime_data(&mut self) -> Result<Reading> {
        let block = self.read_block(&CONTROLLER_READ_00_22)?;
        Ok(Reading::from_realtime(&block, Local::now())?)
    }

    /// Device identity plus operating data, stamped with one capture time.
    /// Any failure aborts the whole reading.
    pub fn read_all(&mut self) -> Result<Reading> {
        let device_info = self.read_device_info()?;
        let block = self.read_block(&CONTROLLER_READ_00_22)?;

        let mut reading = Reading::from_realtime(&block, Local::now())?;
        reading.device_info = device_info;
        Ok(reading)
    }

    pub fn set_load(&mut self, on: bool) -> Result<()> {
        self.write_register(LOAD_SWITCH_REGISTER, on as u16)?;
        log::info!("Load switched {}", if on { "ON" } else { "OFF" });
        Ok(())
    }

    pub fn get_load_state(&mut self) -> Result<bool> {
        let block = self.read_block(&LOAD_STATE)?;
        Ok(block.int("load_switch")? == 1)
    }

    pub fn write_register(&mut self, register: u16, value: u16) -> Result<()> {
        let address = self.config.device_address;
        let request = build_write_single_register(address, register, value);
        self.transact(&request, |frame| {
            expect_echo(parse_write_response(frame, address, WRITE_SINGLE_REGISTER)?, (register, value))
        })?;
        log::info!("Wrote {} to register {:#06x}", value, register);
        Ok(())
    }

    pub fn write_registers(&mut self, start: u16, values: &[u16]) -> Result<()> {
        let address = self.config.device_address;
        let request = build_write_multiple_registers(address, start, values)?;
        let count = values.len() as u16;
        self.transact(&request, |frame| {
            expect_echo(parse_write_response(frame, address, WRITE_MULTIPLE_REGISTERS)?, (start, count))
        })?;
        log::info!("Wrote {} registers from {:#06x}", count, start);
        Ok(())
    }

    /// Clears the controller's daily and historical counters.
    pub fn clear_history(&mut self) -> Result<()> {
        let address = self.config.device_address;
        let request = build_clear_history(address);
        self.transact(&request, |frame| parse_write_response(frame, address, CLEAR_HISTORY).map(|_| ()))?;
        log::info!("History cleared");
        Ok(())
    }

    pub fn read_battery_status(&mut self) -> Result<BatteryStatus> {
        let block = self.read_block(&BATTERY_READ_STATUS)?;
        Ok(BatteryStatus::from_block(&block)?)
    }

    pub fn read_inverter_status(&mut self) -> Result<InverterStatus> {
        let block = self.read_block(&INVERTER_READ_STATUS)?;
        Ok(InverterStatus::from_block(&block)?)
    }

    pub fn read_dcdc_status(&mut self) -> Result<DcDcStatus> {
        let block = self.read_block(&DCDC_READ_STATUS)?;
        Ok(DcDcStatus::from_block(&block)?)
    }

    /// Calls [`read_all`](Self::read_all) every `interval` until `count`
    /// readings succeeded or `on_reading` breaks. Failed readings are
    /// handed to the callback too; a fatal error ends the loop.
    ///
    /// Returns the number of successful readings.
    pub fn monitor(
        &mut self,
        interval: Duration,
        count: Option<usize>,
        mut on_reading: impl FnMut(Result<Reading>) -> ControlFlow<()>,
    ) -> Result<usize> {
        let mut taken = 0;
        loop {
            let flow = match self.read_all() {
                Ok(reading) => {
                    taken += 1;
                    on_reading(Ok(reading))
                }
                Err(e) if e.is_fatal() || !self.is_connected() => return Err(e),
                Err(e) => {
                    log::warn!("Reading failed: {}", e);
                    on_reading(Err(e))
                }
            };

            if flow.is_break() || count.is_some_and(|c| taken >= c) {
                return Ok(taken);
            }
            thread::sleep(interval);
        }
    }

    fn read_words(&mut self, function_code: u8, start: u16, count: u16) -> Result<Vec<u16>> {
        let data = self.read_payload(function_code, start, count)?;
        if data.len() != count as usize * 2 {
            return Err(DecodeError::PayloadLength {
                block: "registers",
                expected: count as usize * 2,
                actual: data.len(),
            }
            .into());
        }
        Ok(data.chunks_exact(2).map(|w| u16::from_be_bytes([w[0], w[1]])).collect())
    }

    fn read_payload(&mut self, function_code: u8, start: u16, count: u16) -> Result<Vec<u8>> {
        let address = self.config.device_address;
        let request = build_read_request(address, function_code, start, count);
        self.transact(&request, |frame| parse_response(frame, address, function_code))
    }

    // Retry loop: recoverable errors resend the same request, anything
    // else ends the call. Fatal errors also drop the connection.
    fn transact<R>(
        &mut self,
        request: &[u8],
        parse: impl Fn(&[u8]) -> Result<R, FrameError>,
    ) -> Result<R> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }

        let max_attempts = self.config.max_attempts;
        let mut attempt = 1;
        loop {
            let outcome = self.exchange(request).and_then(|frame| Ok(parse(&frame)?));
            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if e.is_recoverable() && attempt < max_attempts => {
                    log::warn!("Attempt {}/{} failed: {}", attempt, max_attempts, e);
                    thread::sleep(self.config.retry_delay * attempt);
                    attempt += 1;
                }
                Err(e) => {
                    match e.exception_code() {
                        Some(code) => log::error!("Device rejected request: {}", registers::exception_message(code)),
                        None => log::error!("Request failed after {} attempt(s): {}", attempt, e),
                    }
                    if e.is_fatal() {
                        self.disconnect();
                    }
                    return Err(e);
                }
            }
        }
    }

    // One send/receive cycle, returning the complete response frame.
    // Header and body share one deadline.
    fn exchange(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        self.transport.discard_input()?;
        self.transport.write(request)?;
        log::debug!("TX: {}", hex::encode(request));

        if !self.config.turnaround.is_zero() {
            thread::sleep(self.config.turnaround);
        }

        let deadline = Instant::now() + self.config.timeout;
        let head = self.transport.read_exact_or_timeout(3, self.config.timeout)?;
        let header = [head[0], head[1], head[2]];
        let remaining = deadline.saturating_duration_since(Instant::now());
        let rest = self.transport.read_exact_or_timeout(expected_response_len(&header) - 3, remaining)?;

        let mut frame = head;
        frame.extend_from_slice(&rest);
        log::debug!("RX: {}", hex::encode(&frame));
        Ok(frame)
    }
}

impl<T: Transport> Drop for RenogyClient<T> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn expect_echo(echoed: (u16, u16), sent: (u16, u16)) -> Result<(), FrameError> {
    if echoed != sent {
        return Err(FrameError::EchoMismatch { sent, echoed });
    }
    Ok(())
}

/// Outcome of probing one candidate port.
#[derive(Debug)]
pub struct ScanResult {
    pub port: String,
    /// Model string reported by the device, or why the probe failed.
    pub model: Result<String>,
}

impl ScanResult {
    pub fn responded(&self) -> bool {
        self.model.is_ok()
    }
}

/// Best-effort probe: reads the model block once on every candidate and
/// reports which ones answer. `base` supplies address, baud rate and
/// timeout; its port is replaced per candidate.
pub fn scan<T, F>(base: &ClientConfig, candidates: &[&str], mut make_transport: F) -> Vec<ScanResult>
where
    T: Transport,
    F: FnMut(&str) -> T,
{
    candidates
        .iter()
        .map(|&port| {
            let config = ClientConfig {
                port: port.to_string(),
                max_attempts: 1,
                ..base.clone()
            };
            let model = RenogyClient::with_transport(config, make_transport(port)).and_then(|mut client| {
                client.session(|c| Ok(c.read_block(&DEVICE_MODEL)?.text("model")?.to_string()))
            });
            match &model {
                Ok(name) => log::info!("Found {} on {}", name, port),
                Err(e) => log::debug!("No device on {}: {}", port, e),
            }
            ScanResult {
                port: port.to_string(),
                model,
            }
        })
        .collect()
}

/// [`scan`] over real serial ports with default settings.
pub fn scan_serial(candidates: &[&str]) -> Vec<ScanResult> {
    scan(&ClientConfig::default(), candidates, |_| SerialTransport::new())
}
