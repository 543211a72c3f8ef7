use crate::prelude::*;
use crate::lxp::inputs::{Bank, ReadInput, ReadInputs};
use crate::lxp::inverter::{ChannelData, Measurement};
use crate::lxp::packet::{DeviceFunction, Heartbeat, Packet, TcpFrameFactory, TranslatedData};
use crate::lxp::packet_decoder::PacketDecoder;
use crate::lxp::status::{BatteryStatusString, FaultCodeString, StatusString, WarningCodeString};
use crate::lxp::transport::{Transport, MAX_BUFFER_SIZE};

use {
    bytes::BytesMut,
    std::collections::VecDeque,
    std::time::{Duration, Instant},
    tokio_util::codec::Decoder,
};

/// Models whose current limits are reported in tenths of an amp; all others use hundredths.
pub const TENTHS_MODELS: [&str; 5] = ["FAAB", "EAAB", "ACAB", "CFAA", "CCAA"];

pub const DEFAULT_SCALING_FACTOR: f64 = 10.0;

/// Holding registers 7-10: model code in 7-8, firmware revision in 9-10.
const MODEL_REGISTER: u16 = 7;
const MODEL_REGISTER_COUNT: u16 = 4;

/// Sends of one queued write before it is dropped unacknowledged.
pub const MAX_WRITE_ATTEMPTS: u32 = 3;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum State {
    Disconnected,
    Connecting,
    Connected,
    RequestingBank,
    AwaitingResponse,
    ProcessingResponse,
    Error,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Request {
    Bank(Bank),
    Model,
    Write { register: u16, value: u16 },
}

impl std::fmt::Display for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Request::Bank(bank) => write!(f, "input bank {}", bank.register()),
            Request::Model => write!(f, "model probe"),
            Request::Write { register, value } => write!(f, "write {}={}", register, value),
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct PendingWrite {
    register: u16,
    value: u16,
    attempts: u32,
}

#[derive(Clone, Copy, Debug)]
struct InFlight {
    request: Request,
    sent_at: Instant,
}

// {{{ SystemState
/// What the session has learned about the inverter so far.
#[derive(Clone, Debug)]
pub struct SystemState {
    pub model: Option<String>,
    pub firmware: Option<String>,
    pub scaling_factor: f64,
    pub last_data: Option<Instant>,
    pub last_heartbeat: Option<Instant>,
    pub status: String,
    pub battery_status: String,
    pub fault: String,
    pub warning: String,
    pub inputs: ReadInputs,
}

impl Default for SystemState {
    fn default() -> Self {
        Self {
            model: None,
            firmware: None,
            scaling_factor: DEFAULT_SCALING_FACTOR,
            last_data: None,
            last_heartbeat: None,
            status: String::new(),
            battery_status: String::new(),
            fault: String::new(),
            warning: String::new(),
            inputs: ReadInputs::default(),
        }
    }
}

impl SystemState {
    pub fn scaling_factor_for(model: &str) -> f64 {
        if TENTHS_MODELS.contains(&model) {
            10.0
        } else {
            100.0
        }
    }

    /// Decodes `values` as `bank` and, on success, stores the record and refreshes the
    /// status text it carries. Every bank's loaded flag is cleared first.
    pub fn decode(&mut self, bank: Bank, values: &[u8]) -> Result<ReadInput, LxpError> {
        self.inputs.reset_loaded();

        let input = ReadInput::decode(bank, values, self.scaling_factor)?;

        match &input {
            ReadInput::ReadInput1(r) => self.status = StatusString::from_value(r.status),
            ReadInput::ReadInput2(r) => {
                self.fault = FaultCodeString::from_value(r.fault_code);
                self.warning = WarningCodeString::from_value(r.warning_code);
            }
            ReadInput::ReadInput3(r) => {
                self.battery_status = BatteryStatusString::from_value(r.bat_status_inv)
            }
            ReadInput::ReadInput4(_) | ReadInput::ReadInput5(_) => {}
        }

        self.inputs.store(input.clone());
        Ok(input)
    }

    /// Model code from registers 7-8, high byte first; cached for the life of the session.
    pub fn set_model(&mut self, registers: &[(u16, u16)]) -> bool {
        if self.model.is_some() {
            return false;
        }

        let word = |register: u16| {
            registers
                .iter()
                .find(|(r, _)| *r == register)
                .map(|(_, v)| *v)
        };
        let (Some(reg7), Some(reg8)) = (word(MODEL_REGISTER), word(MODEL_REGISTER + 1)) else {
            return false;
        };

        let model: String = [reg7 >> 8, reg7 & 0xFF, reg8 >> 8, reg8 & 0xFF]
            .iter()
            .map(|b| *b as u8 as char)
            .collect();

        if let (Some(reg9), Some(reg10)) = (word(MODEL_REGISTER + 2), word(MODEL_REGISTER + 3)) {
            self.firmware = Some(format!("{}-{:02X}{:02X}", model, reg9 & 0xFF, reg10 & 0xFF));
        }

        self.scaling_factor = Self::scaling_factor_for(&model);
        self.model = Some(model);
        true
    }

    pub fn is_online(&self, now: Instant, threshold: Duration) -> bool {
        [self.last_heartbeat, self.last_data]
            .iter()
            .flatten()
            .any(|seen| now.saturating_duration_since(*seen) < threshold)
    }
} // }}}

// {{{ PacketStats
#[derive(Clone, Debug, Default)]
pub struct PacketStats {
    pub packets_received: u64,
    pub packets_sent: u64,
    pub heartbeat_packets_received: u64,
    pub heartbeat_packets_sent: u64,
    pub translated_data_packets_received: u64,
    pub translated_data_packets_sent: u64,
    pub banks_decoded: u64,
    pub checksum_errors: u64,
    pub frame_errors: u64,
    pub decode_errors: u64,
    pub timeouts: u64,
    pub disconnections: u64,
}

impl PacketStats {
    pub fn print_summary(&self, datalog: Serial) {
        info!("Packet statistics for {}:", datalog);
        info!("  Total packets received: {}", self.packets_received);
        info!("  Total packets sent: {}", self.packets_sent);
        info!("  Received Packet Types:");
        info!("    Heartbeat packets: {}", self.heartbeat_packets_received);
        info!("    TranslatedData packets: {}", self.translated_data_packets_received);
        info!("  Sent Packet Types:");
        info!("    Heartbeat packets: {}", self.heartbeat_packets_sent);
        info!("    TranslatedData packets: {}", self.translated_data_packets_sent);
        info!("  Banks decoded: {}", self.banks_decoded);
        info!("  Errors:");
        info!("    Checksum: {}", self.checksum_errors);
        info!("    Framing: {}", self.frame_errors);
        info!("    Decode: {}", self.decode_errors);
        info!("    Timeouts: {}", self.timeouts);
        info!("  Disconnections: {}", self.disconnections);
    }
} // }}}

/// Tick-driven polling of one inverter through one datalog.
///
/// Call [`update`](Self::update) periodically. Each call drains received bytes, handles
/// timeouts and reconnection, and sends at most one request. Only one request is ever
/// outstanding; bank polling advances through [`Bank::CYCLE`] on successful decodes only.
pub struct PollSession<T: Transport> {
    config: config::Inverter,
    datalog: Serial,
    serial: Serial,
    transport: T,
    channels: Channels,

    state: State,
    bank_index: usize,
    in_flight: Option<InFlight>,
    probe_model: bool,
    pending_writes: VecDeque<PendingWrite>,
    last_request: Option<Instant>,
    last_connect_attempt: Option<Instant>,

    buf: BytesMut,
    decoder: PacketDecoder,
    system: SystemState,
    stats: PacketStats,
}

impl<T: Transport> PollSession<T> {
    pub fn new(config: config::Inverter, transport: T, channels: Channels) -> Result<Self> {
        let datalog = config
            .datalog()
            .ok_or_else(|| anyhow!("inverter {}: datalog serial must be set", config.host()))?;
        let serial = config
            .serial()
            .ok_or_else(|| anyhow!("inverter {}: inverter serial must be set", config.host()))?;

        Ok(Self {
            config,
            datalog,
            serial,
            transport,
            channels,
            state: State::Disconnected,
            bank_index: 0,
            in_flight: None,
            probe_model: false,
            pending_writes: VecDeque::new(),
            last_request: None,
            last_connect_attempt: None,
            buf: BytesMut::with_capacity(MAX_BUFFER_SIZE),
            decoder: PacketDecoder::new(),
            system: SystemState::default(),
            stats: PacketStats::default(),
        })
    }

    pub fn datalog(&self) -> Serial {
        self.datalog
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn system(&self) -> &SystemState {
        &self.system
    }

    pub fn stats(&self) -> &PacketStats {
        &self.stats
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The bank the next bank request will ask for.
    pub fn current_bank(&self) -> Bank {
        Bank::CYCLE[self.bank_index]
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn is_online(&self, now: Instant) -> bool {
        self.system.is_online(now, self.config.online_threshold())
    }

    /// Queues a single holding-register write, sent ahead of the next bank request.
    pub fn queue_write(&mut self, register: u16, value: u16) {
        info!("inverter {}: queued write {}={}", self.datalog, register, value);
        self.pending_writes.push_back(PendingWrite {
            register,
            value,
            attempts: 0,
        });
    }

    /// Forgets everything learned about the inverter, including the cached model.
    pub fn reset(&mut self) {
        self.system = SystemState::default();
        self.bank_index = 0;
        self.probe_model = false;
    }

    pub fn stop(&mut self) {
        if self.transport.connected() {
            self.transport.disconnect();
            let _ = self.channels.from_inverter.send(ChannelData::Disconnect(self.datalog));
        }
        self.clear_in_flight();
        self.state = State::Disconnected;
    }

    pub async fn update(&mut self, now: Instant) {
        if self.state == State::Disconnected {
            self.try_connect(now).await;
            if self.state == State::Disconnected {
                return;
            }
        }

        // whatever arrived before the peer closed is still processed
        self.receive(now).await;
        if self.state == State::Disconnected {
            return;
        }

        if !self.transport.connected() {
            self.connection_lost("transport closed");
            return;
        }

        if let Some(in_flight) = self.in_flight {
            let elapsed = now.saturating_duration_since(in_flight.sent_at);
            if elapsed >= self.config.response_timeout() {
                self.response_timeout(in_flight.request);
            }
            return;
        }

        if let Some(last) = self.last_request {
            if now.saturating_duration_since(last) < self.config.delay() {
                return;
            }
        }

        self.send_next_request(now).await;
    }

    async fn try_connect(&mut self, now: Instant) {
        if let Some(last) = self.last_connect_attempt {
            if now.saturating_duration_since(last) < self.config.reconnect_delay() {
                return;
            }
        }
        self.last_connect_attempt = Some(now);

        self.state = State::Connecting;
        info!(
            "inverter {}: connecting to {}:{}",
            self.datalog,
            self.config.host(),
            self.config.port()
        );

        if self.transport.connect(self.config.host(), self.config.port()).await {
            info!("inverter {}: connected", self.datalog);
            self.state = State::Connected;
            self.buf.clear();
            self.clear_in_flight();
            self.last_request = None;
            let _ = self.channels.from_inverter.send(ChannelData::Connected(self.datalog));
        } else {
            self.state = State::Disconnected;
            warn!(
                "inverter {}: {}, retrying in {}ms",
                self.datalog,
                LxpError::ConnectionFailed(format!("{}:{}", self.config.host(), self.config.port())),
                self.config.reconnect_delay().as_millis()
            );
        }
    }

    fn connection_lost(&mut self, reason: &str) {
        warn!("inverter {}: connection lost: {}", self.datalog, reason);
        self.transport.disconnect();
        self.clear_in_flight();
        self.buf.clear();
        self.state = State::Disconnected;
        self.stats.disconnections += 1;
        let _ = self.channels.from_inverter.send(ChannelData::Disconnect(self.datalog));
    }

    fn clear_in_flight(&mut self) {
        self.in_flight = None;
    }

    fn response_timeout(&mut self, request: Request) {
        warn!(
            "inverter {}: {}",
            self.datalog,
            LxpError::ResponseTimeout {
                request: request.to_string(),
                timeout_ms: self.config.response_timeout().as_millis(),
            }
        );
        self.stats.timeouts += 1;
        self.connection_lost("no response");
        // reconnect on the very next update
        self.last_connect_attempt = None;
    }

    fn next_request(&mut self) -> Request {
        while let Some(write) = self.pending_writes.front() {
            if write.attempts < MAX_WRITE_ATTEMPTS {
                return Request::Write {
                    register: write.register,
                    value: write.value,
                };
            }
            warn!(
                "inverter {}: giving up on write {}={} after {} attempts",
                self.datalog, write.register, write.value, write.attempts
            );
            self.pending_writes.pop_front();
        }

        if self.probe_model {
            Request::Model
        } else {
            Request::Bank(self.current_bank())
        }
    }

    async fn send_next_request(&mut self, now: Instant) {
        let request = self.next_request();
        self.state = State::RequestingBank;

        let frame = match request {
            Request::Bank(bank) => TcpFrameFactory::read_request(
                self.serial,
                self.datalog,
                bank.register(),
                Bank::REGISTER_COUNT,
                DeviceFunction::ReadInput,
            ),
            Request::Model => TcpFrameFactory::read_request(
                self.serial,
                self.datalog,
                MODEL_REGISTER,
                MODEL_REGISTER_COUNT,
                DeviceFunction::ReadHold,
            ),
            Request::Write { register, value } => {
                TcpFrameFactory::write_request(self.serial, self.datalog, register, value)
            }
        };

        debug!("inverter {}: TX {}", self.datalog, request);

        if let Err(e) = self.transport.send(&frame).await {
            self.connection_lost(&e.to_string());
            return;
        }

        match request {
            Request::Write { .. } => {
                if let Some(write) = self.pending_writes.front_mut() {
                    write.attempts += 1;
                }
            }
            // one attempt per battery-bank decode, answered or not
            Request::Model => self.probe_model = false,
            Request::Bank(_) => {}
        }

        self.stats.packets_sent += 1;
        self.stats.translated_data_packets_sent += 1;
        self.last_request = Some(now);
        self.in_flight = Some(InFlight {
            request,
            sent_at: now,
        });
        self.state = State::AwaitingResponse;
    }

    async fn receive(&mut self, now: Instant) {
        let available = self.transport.bytes_available();
        if available > 0 {
            let bytes = self.transport.read(available);
            self.buf.extend_from_slice(&bytes);
        }

        if self.buf.len() > MAX_BUFFER_SIZE {
            warn!(
                "inverter {}: receive buffer overflow ({} bytes), clearing",
                self.datalog,
                self.buf.len()
            );
            self.buf.clear();
        }

        loop {
            match self.decoder.decode(&mut self.buf) {
                Ok(Some(packet)) => {
                    self.stats.packets_received += 1;
                    self.handle_packet(packet, now).await;
                    if self.state == State::Disconnected {
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => self.handle_frame_error(e),
            }
        }
    }

    fn handle_frame_error(&mut self, e: LxpError) {
        warn!("inverter {}: dropped frame: {}", self.datalog, e);

        if let LxpError::ChecksumError { .. } = e {
            self.stats.checksum_errors += 1;
            // almost certainly our response; ask again
            if self.in_flight.take().is_some() {
                self.state = State::Error;
            }
        } else {
            self.stats.frame_errors += 1;
        }
    }

    async fn handle_packet(&mut self, packet: Packet, now: Instant) {
        match packet {
            Packet::Heartbeat(heartbeat) => self.handle_heartbeat(heartbeat, now).await,
            Packet::TranslatedData(td) => {
                self.stats.translated_data_packets_received += 1;
                self.handle_translated_data(td, now);
            }
        }
    }

    async fn handle_heartbeat(&mut self, heartbeat: Heartbeat, now: Instant) {
        self.stats.heartbeat_packets_received += 1;
        self.system.last_heartbeat = Some(now);
        debug!("inverter {}: heartbeat", self.datalog);

        if self.config.respond_to_heartbeat() {
            let reply = TcpFrameFactory::heartbeat_echo(&heartbeat);
            if let Err(e) = self.transport.send(&reply).await {
                self.connection_lost(&e.to_string());
                return;
            }
            self.stats.packets_sent += 1;
            self.stats.heartbeat_packets_sent += 1;
        }

        let _ = self.channels.from_inverter.send(ChannelData::Heartbeat(self.datalog));
    }

    fn handle_translated_data(&mut self, td: TranslatedData, now: Instant) {
        let Some(in_flight) = self.in_flight else {
            debug!(
                "inverter {}: ignoring unsolicited {:?} for register {}",
                self.datalog,
                td.device_function(),
                td.register()
            );
            return;
        };

        if td.inverter() != self.serial {
            warn!(
                "inverter {}: response from serial {}, configured {}",
                self.datalog,
                td.inverter(),
                self.serial
            );
        }

        self.state = State::ProcessingResponse;
        self.in_flight = None;

        match self.process_response(in_flight.request, &td, now) {
            Ok(()) => self.state = State::Connected,
            Err(e) => {
                self.stats.decode_errors += 1;
                warn!("inverter {}: {} failed: {}", self.datalog, in_flight.request, e);
                // still connected; the same request goes out again after the usual spacing
                self.state = State::Error;
            }
        }
    }

    fn expect_response(
        td: &TranslatedData,
        device_function: DeviceFunction,
        register: u16,
    ) -> Result<(), LxpError> {
        if td.device_function() != device_function {
            return Err(LxpError::UnexpectedDeviceFunction {
                expected: device_function,
                got: td.device_function(),
            });
        }
        if td.register() != register {
            return Err(LxpError::UnexpectedRegisterStart {
                expected: register,
                got: td.register(),
            });
        }
        Ok(())
    }

    fn process_response(
        &mut self,
        request: Request,
        td: &TranslatedData,
        now: Instant,
    ) -> Result<(), LxpError> {
        match request {
            Request::Bank(bank) => {
                Self::expect_response(td, DeviceFunction::ReadInput, bank.register())?;

                let input = self.system.decode(bank, &td.values)?;
                self.system.last_data = Some(now);
                self.stats.banks_decoded += 1;
                self.bank_index = (self.bank_index + 1) % Bank::CYCLE.len();

                if bank == Bank::Battery && self.system.model.is_none() {
                    self.probe_model = true;
                }

                debug!("inverter {}: decoded bank {}", self.datalog, bank.register());
                self.publish(bank, input, now);
            }
            Request::Model => {
                Self::expect_response(td, DeviceFunction::ReadHold, MODEL_REGISTER)?;

                if td.values.len() < 2 * MODEL_REGISTER_COUNT as usize {
                    return Err(LxpError::PayloadTooShort {
                        register: MODEL_REGISTER,
                        required: 2 * MODEL_REGISTER_COUNT as usize,
                        actual: td.values.len(),
                    });
                }

                if self.system.set_model(&td.pairs()) {
                    info!(
                        "inverter {}: model {}, firmware {}, current scaling 1/{}",
                        self.datalog,
                        self.system.model.as_deref().unwrap_or_default(),
                        self.system.firmware.as_deref().unwrap_or_default(),
                        self.system.scaling_factor
                    );
                }
            }
            Request::Write { register, value } => {
                Self::expect_response(td, DeviceFunction::WriteSingle, register)?;

                // acknowledged, even if the inverter kept a different value
                self.pending_writes.pop_front();

                let written = Utils::u16ify(&td.values, 0);
                if written == value {
                    info!("inverter {}: wrote {}={}", self.datalog, register, value);
                } else {
                    warn!(
                        "inverter {}: wrote {}={} but inverter reports {}",
                        self.datalog, register, value, written
                    );
                }
            }
        }

        Ok(())
    }

    fn publish(&self, bank: Bank, input: ReadInput, now: Instant) {
        let measurement = Measurement {
            time: chrono::Utc::now(),
            datalog: self.datalog,
            serial: self.serial,
            bank,
            input,
            status: self.system.status.clone(),
            battery_status: self.system.battery_status.clone(),
            online: self.is_online(now),
        };

        let _ = self
            .channels
            .from_inverter
            .send(ChannelData::Measurement(Box::new(measurement)));
    }
}
