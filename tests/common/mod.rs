#![allow(dead_code)]

use lxp_poller::lxp::checksum::checksum;
use lxp_poller::lxp::packet::{DeviceFunction, Packet, Parser, TcpFrameFactory, TranslatedData};
use lxp_poller::lxp::transport::Transport;
use lxp_poller::prelude::*;

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};

pub fn common_setup() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub struct Factory;

impl Factory {
    pub fn serial() -> Serial {
        Serial::from_str("BA12345678").unwrap()
    }

    pub fn datalog() -> Serial {
        Serial::from_str("DG87654321").unwrap()
    }

    pub fn inverter() -> config::Inverter {
        config::Inverter {
            enabled: true,
            host: "localhost".to_string(),
            port: 8000,
            serial: Some(Self::serial()),
            datalog: Some(Self::datalog()),
            ..Default::default()
        }
    }

    /// A frame as the datalog forwards it from the inverter.
    pub fn response(device_function: DeviceFunction, register: u16, values: &[u8]) -> Vec<u8> {
        Self::response_raw(device_function.into(), register, values)
    }

    pub fn response_raw(device_function: u8, register: u16, values: &[u8]) -> Vec<u8> {
        let mut data = vec![1, device_function];
        data.extend_from_slice(Self::serial().as_bytes());
        data.extend_from_slice(&register.to_le_bytes());
        if device_function != u8::from(DeviceFunction::WriteSingle) {
            data.push(values.len() as u8);
        }
        data.extend_from_slice(values);

        let mut frame = vec![0xA1, 0x1A, 2, 0, 0, 0, 1, 194];
        frame.extend_from_slice(Self::datalog().as_bytes());
        frame.extend_from_slice(&((data.len() + 2) as u16).to_le_bytes());
        frame.extend_from_slice(&data);
        frame.extend_from_slice(&checksum(&data).to_le_bytes());

        let frame_length = (frame.len() - 6) as u16;
        frame[4..6].copy_from_slice(&frame_length.to_le_bytes());
        frame
    }

    pub fn heartbeat() -> Vec<u8> {
        TcpFrameFactory::heartbeat(Self::datalog())
    }

    /// `len` bytes of zeros with little-endian words placed at register offsets.
    pub fn payload(len: usize, words: &[(usize, u16)]) -> Vec<u8> {
        let mut values = vec![0; len];
        for (register, word) in words {
            values[register * 2..register * 2 + 2].copy_from_slice(&word.to_le_bytes());
        }
        values
    }

    /// Holding registers 7-10 for a model code such as "FAAB".
    pub fn model_registers(model: &str) -> Vec<u8> {
        let b = model.as_bytes();
        Self::payload(
            8,
            &[
                (0, u16::from_be_bytes([b[0], b[1]])),
                (1, u16::from_be_bytes([b[2], b[3]])),
                (2, 0x0021),
                (3, 0x0017),
            ],
        )
    }
}

pub fn translated_data(frame: &[u8]) -> TranslatedData {
    match Parser::parse(frame) {
        Ok(Packet::TranslatedData(td)) => td,
        other => panic!("expected translated data, got {:?}", other),
    }
}

// MockTransport {{{
#[derive(Debug, Default)]
pub struct MockState {
    pub connected: bool,
    pub refuse_connect: bool,
    pub fail_send: bool,
    pub connects: usize,
    pub sent: Vec<Vec<u8>>,
    pub incoming: Vec<u8>,
}

/// In-memory transport; clones share state so tests can inspect what the session did.
#[derive(Clone, Debug, Default)]
pub struct MockTransport(Arc<Mutex<MockState>>);

impl MockTransport {
    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.0.lock().unwrap()
    }

    pub fn push(&self, bytes: &[u8]) {
        self.state().incoming.extend_from_slice(bytes);
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.state().sent.clone()
    }

    pub fn last_request(&self) -> TranslatedData {
        let sent = self.sent();
        translated_data(sent.last().expect("nothing sent"))
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&mut self, _host: &str, _port: u16) -> bool {
        let mut state = self.state();
        state.connects += 1;
        state.connected = !state.refuse_connect;
        state.connected
    }

    fn connected(&self) -> bool {
        self.state().connected
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        let mut state = self.state();
        if !state.connected || state.fail_send {
            state.connected = false;
            bail!("send failed");
        }
        state.sent.push(bytes.to_vec());
        Ok(())
    }

    fn bytes_available(&mut self) -> usize {
        self.state().incoming.len()
    }

    fn read(&mut self, max: usize) -> Vec<u8> {
        let mut state = self.state();
        let n = max.min(state.incoming.len());
        state.incoming.drain(..n).collect()
    }

    fn disconnect(&mut self) {
        let mut state = self.state();
        state.connected = false;
        state.incoming.clear();
    }
} // }}}
