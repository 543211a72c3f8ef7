pub mod checksum;
pub mod inputs;
pub mod inverter;
pub mod packet;
pub mod packet_decoder;
pub mod session;
pub mod status;
pub mod transport;
