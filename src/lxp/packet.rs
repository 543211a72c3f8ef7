use crate::prelude::*;
use crate::lxp::checksum::checksum;

use enum_dispatch::*;
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// First two bytes of every frame (`0x1AA1` little-endian).
pub const PREFIX: [u8; 2] = [0xA1, 0x1A];

/// Bytes before the transaction data: prefix, protocol, frame length, address,
/// function, datalog serial and data length.
pub const HEADER_LEN: usize = 20;

/// Address, device function, inverter serial, register start and value length.
pub const DESCRIPTOR_LEN: usize = 15;

/// Offset of the first payload byte in a register response.
pub const RESPONSE_MIN_LEN: usize = HEADER_LEN + DESCRIPTOR_LEN;

pub const HEARTBEAT_LEN: usize = 19;

// protocol versions seen on the wire
const PROTOCOL_REQUEST: u16 = 1;
const PROTOCOL_HEARTBEAT: u16 = 2;

// {{{ TcpFunction
#[derive(Clone, Copy, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum TcpFunction {
    Heartbeat = 193,
    TranslatedData = 194,
}
// }}}

// {{{ DeviceFunction
#[derive(Clone, Copy, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum DeviceFunction {
    ReadHold = 3,
    ReadInput = 4,
    WriteSingle = 6,
}
// }}}

// {{{ Header
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Header {
    pub protocol: u16,
    pub frame_length: u16,
    pub address: u8,
    pub tcp_function: u8,
    pub datalog: Serial,
}

impl Header {
    /// Header bytes common to heartbeats and translated data (no data length).
    pub const LEN: usize = 18;

    fn parse(input: &[u8]) -> Result<Self, LxpError> {
        if input.len() < Self::LEN {
            return Err(LxpError::Incomplete);
        }
        if input[0..2] != PREFIX {
            return Err(LxpError::BadPrefix);
        }

        Ok(Self {
            protocol: Utils::u16ify(input, 2),
            frame_length: Utils::u16ify(input, 4),
            address: input[6],
            tcp_function: input[7],
            datalog: serial_at(input, 8),
        })
    }

    /// Total bytes on the wire, as declared by the length field.
    pub fn declared_len(&self) -> usize {
        self.frame_length as usize + 6
    }
} // }}}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TransactionDescriptor {
    pub address: u8,
    pub device_function: DeviceFunction,
    pub inverter: Serial,
    pub register: u16,
    pub value_length: usize,
}

#[enum_dispatch]
pub trait PacketCommon {
    fn datalog(&self) -> Serial;
    fn protocol(&self) -> u16;
    fn tcp_function(&self) -> TcpFunction;
}

#[enum_dispatch(PacketCommon)]
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum Packet {
    Heartbeat(Heartbeat),
    TranslatedData(TranslatedData),
}

/////////////
//
// HEARTBEATS
//
/////////////

#[derive(Eq, PartialEq, Clone, Debug)]
pub struct Heartbeat {
    pub header: Header,
    /// The frame exactly as received; echoed back unchanged.
    pub bytes: Vec<u8>,
}

impl Heartbeat {
    fn recognise(input: &[u8]) -> bool {
        input.len() >= 8 && input[0..2] == PREFIX && input[7] == u8::from(TcpFunction::Heartbeat)
    }

    fn decode(input: &[u8]) -> Result<Self, LxpError> {
        if input.len() < Header::LEN {
            return Err(LxpError::Incomplete);
        }
        let header = Header::parse(input)?;
        let declared = header.declared_len();
        if declared < Header::LEN {
            return Err(LxpError::LengthMismatch {
                declared,
                actual: input.len(),
            });
        }
        if input.len() < declared {
            return Err(LxpError::Incomplete);
        }
        if input.len() > declared {
            return Err(LxpError::LengthMismatch {
                declared,
                actual: input.len(),
            });
        }

        Ok(Self {
            header,
            bytes: input.to_vec(),
        })
    }
}

impl PacketCommon for Heartbeat {
    fn datalog(&self) -> Serial {
        self.header.datalog
    }
    fn protocol(&self) -> u16 {
        self.header.protocol
    }
    fn tcp_function(&self) -> TcpFunction {
        TcpFunction::Heartbeat
    }
}

/////////////
//
// TRANSLATED DATA
//
/////////////

#[derive(Eq, PartialEq, Clone, Debug)]
pub struct TranslatedData {
    pub header: Header,
    pub descriptor: TransactionDescriptor,
    /// Raw register payload, two bytes per register.
    pub values: Vec<u8>,
}

impl TranslatedData {
    pub fn register(&self) -> u16 {
        self.descriptor.register
    }

    pub fn device_function(&self) -> DeviceFunction {
        self.descriptor.device_function
    }

    pub fn inverter(&self) -> Serial {
        self.descriptor.inverter
    }

    pub fn pairs(&self) -> Vec<(u16, u16)> {
        self.values
            .chunks(2)
            .enumerate()
            .map(|(pos, value)| (self.register() + pos as u16, Utils::u16ify(value, 0)))
            .collect()
    }

    // Read responses from the inverter carry a one-byte value length unless the
    // frame uses protocol 1. Write-single echoes never do.
    fn has_value_length_byte(protocol: u16, device_function: DeviceFunction) -> bool {
        match device_function {
            DeviceFunction::ReadHold | DeviceFunction::ReadInput => protocol != PROTOCOL_REQUEST,
            DeviceFunction::WriteSingle => false,
        }
    }

    /// `data` is the transaction data: everything between the header and the checksum.
    fn decode(header: Header, data: &[u8]) -> Result<Self, LxpError> {
        if data.len() < DESCRIPTOR_LEN - 1 {
            return Err(LxpError::LengthMismatch {
                declared: DESCRIPTOR_LEN - 1,
                actual: data.len(),
            });
        }

        let device_function =
            DeviceFunction::try_from(data[1]).map_err(|_| LxpError::UnexpectedFunction(data[1]))?;

        let values = if Self::has_value_length_byte(header.protocol, device_function) {
            if data.len() < DESCRIPTOR_LEN {
                return Err(LxpError::LengthMismatch {
                    declared: DESCRIPTOR_LEN,
                    actual: data.len(),
                });
            }
            let value_length = data[14] as usize;
            let values = &data[DESCRIPTOR_LEN..];
            if values.len() != value_length {
                return Err(LxpError::LengthMismatch {
                    declared: value_length,
                    actual: values.len(),
                });
            }
            values
        } else {
            let values = &data[DESCRIPTOR_LEN - 1..];
            if values.len() != 2 {
                return Err(LxpError::LengthMismatch {
                    declared: 2,
                    actual: values.len(),
                });
            }
            values
        };

        Ok(Self {
            header,
            descriptor: TransactionDescriptor {
                address: data[0],
                device_function,
                inverter: serial_at(data, 2),
                register: Utils::u16ify(data, 12),
                value_length: values.len(),
            },
            values: values.to_vec(),
        })
    }
}

impl PacketCommon for TranslatedData {
    fn datalog(&self) -> Serial {
        self.header.datalog
    }
    fn protocol(&self) -> u16 {
        self.header.protocol
    }
    fn tcp_function(&self) -> TcpFunction {
        TcpFunction::TranslatedData
    }
}

// {{{ TcpFrameFactory
pub struct TcpFrameFactory;

impl TcpFrameFactory {
    /// Read `count` registers starting at `register` from `inverter` through `datalog`.
    pub fn read_request(
        inverter: Serial,
        datalog: Serial,
        register: u16,
        count: u16,
        device_function: DeviceFunction,
    ) -> Vec<u8> {
        let body = Self::transaction_body(inverter, device_function, register, count);
        Self::build(datalog, PROTOCOL_REQUEST, TcpFunction::TranslatedData, &body)
    }

    pub fn write_request(inverter: Serial, datalog: Serial, register: u16, value: u16) -> Vec<u8> {
        let body =
            Self::transaction_body(inverter, DeviceFunction::WriteSingle, register, value);
        Self::build(datalog, PROTOCOL_REQUEST, TcpFunction::TranslatedData, &body)
    }

    pub fn heartbeat_echo(heartbeat: &Heartbeat) -> Vec<u8> {
        heartbeat.bytes.clone()
    }

    /// An empty heartbeat as the datalog itself sends it.
    pub fn heartbeat(datalog: Serial) -> Vec<u8> {
        Self::build(datalog, PROTOCOL_HEARTBEAT, TcpFunction::Heartbeat, &[])
    }

    fn transaction_body(
        inverter: Serial,
        device_function: DeviceFunction,
        register: u16,
        word: u16,
    ) -> Vec<u8> {
        let mut body = vec![0; DESCRIPTOR_LEN + 1];
        // body[0] (address) is 0 for requests, the inverter answers with 1
        body[1] = device_function.into();
        body[2..12].copy_from_slice(inverter.as_bytes());
        body[12..14].copy_from_slice(&register.to_le_bytes());
        body[14..16].copy_from_slice(&word.to_le_bytes());
        body
    }

    fn build(datalog: Serial, protocol: u16, tcp_function: TcpFunction, body: &[u8]) -> Vec<u8> {
        let mut r = Vec::with_capacity(HEADER_LEN + body.len() + 2);

        r.extend_from_slice(&PREFIX);
        r.extend_from_slice(&protocol.to_le_bytes());
        r.extend_from_slice(&[0, 0]); // frame length
        r.push(1);
        r.push(tcp_function.into());
        r.extend_from_slice(datalog.as_bytes());

        if tcp_function == TcpFunction::Heartbeat {
            r.push(0);
        } else {
            r.extend_from_slice(&[0, 0]); // data length
            r.extend_from_slice(body);
            r.extend_from_slice(&checksum(body).to_le_bytes());

            let data_length = (body.len() + 2) as u16;
            r[18..20].copy_from_slice(&data_length.to_le_bytes());
        }

        let frame_length = (r.len() - 6) as u16;
        r[4..6].copy_from_slice(&frame_length.to_le_bytes());

        r
    }
} // }}}

// {{{ Parser
pub struct Parser;

impl Parser {
    /// Validates one complete frame and splits it into header, descriptor and payload.
    pub fn parse(input: &[u8]) -> Result<Packet, LxpError> {
        // a complete heartbeat is shorter than the minimum response
        if Heartbeat::recognise(input) {
            match Heartbeat::decode(input) {
                Ok(heartbeat) => return Ok(Packet::Heartbeat(heartbeat)),
                Err(_) if input.len() < RESPONSE_MIN_LEN => return Err(LxpError::Incomplete),
                Err(e) => return Err(e),
            }
        }

        if input.len() < RESPONSE_MIN_LEN {
            return Err(LxpError::Incomplete);
        }

        let header = Header::parse(input)?;

        let declared = header.declared_len();
        if input.len() < declared {
            return Err(LxpError::Incomplete);
        }
        if input.len() > declared {
            return Err(LxpError::LengthMismatch {
                declared,
                actual: input.len(),
            });
        }

        let data = &input[HEADER_LEN..input.len() - 2];
        let expected = Utils::u16ify(input, input.len() - 2);
        let computed = checksum(data);
        if expected != computed {
            return Err(LxpError::ChecksumError { expected, computed });
        }

        if header.tcp_function != u8::from(TcpFunction::TranslatedData) {
            return Err(LxpError::UnexpectedFunction(header.tcp_function));
        }

        TranslatedData::decode(header, data).map(Packet::TranslatedData)
    }
} // }}}

// callers guarantee `offset + 10 <= bytes.len()`
fn serial_at(bytes: &[u8], offset: usize) -> Serial {
    let mut r = [0u8; 10];
    r.copy_from_slice(&bytes[offset..offset + 10]);
    Serial::from(r)
}
