use crate::prelude::*;
use crate::lxp::inputs::ReadInput;
use crate::lxp::session::PollSession;
use crate::lxp::transport::TcpTransport;

use {
    serde::{Serialize, Serializer},
    std::time::Instant,
    tokio::time::MissedTickBehavior,
};

#[derive(Debug, Clone)]
pub enum ChannelData {
    Connected(Serial),
    Disconnect(Serial),
    Heartbeat(Serial),
    Measurement(Box<Measurement>),
    /// datalog, register, value
    WriteRegister(Serial, u16, u16),
    Shutdown,
}
pub type Sender = broadcast::Sender<ChannelData>;
pub type Receiver = broadcast::Receiver<ChannelData>;

/// One decoded bank plus the session's view of the inverter at that moment.
#[derive(Debug, Clone, Serialize)]
pub struct Measurement {
    pub time: chrono::DateTime<chrono::Utc>,
    pub datalog: Serial,
    pub serial: Serial,
    pub bank: lxp::inputs::Bank,
    pub input: ReadInput,
    pub status: String,
    pub battery_status: String,
    pub online: bool,
}

// Serial {{{
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Serial([u8; 10]);

impl Serial {
    pub fn new(input: &[u8]) -> Result<Self> {
        Ok(Self(input.try_into()?))
    }

    pub fn as_bytes(&self) -> &[u8; 10] {
        &self.0
    }
}

impl From<[u8; 10]> for Serial {
    fn from(bytes: [u8; 10]) -> Self {
        Self(bytes)
    }
}

impl Serialize for Serial {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl std::str::FromStr for Serial {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 10 {
            bail!("serial {:?} must be exactly 10 characters", s);
        }

        Self::new(s.as_bytes())
    }
}

impl std::fmt::Display for Serial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl std::fmt::Debug for Serial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
} // }}}

/// Drives one [`PollSession`] over TCP until shutdown.
pub struct Inverter {
    config: config::Inverter,
    channels: Channels,
    to_inverter: Receiver,
}

impl Inverter {
    /// Subscribes to `to_inverter` immediately so nothing sent after this is missed.
    pub fn new(config: &config::Inverter, channels: Channels) -> Self {
        Self {
            config: config.clone(),
            to_inverter: channels.to_inverter.subscribe(),
            channels,
        }
    }

    pub async fn start(mut self) -> Result<()> {
        let transport =
            TcpTransport::new(self.config.connect_timeout(), self.config.use_tcp_nodelay());
        let mut session = PollSession::new(self.config.clone(), transport, self.channels.clone())?;
        let datalog = session.datalog();

        let mut interval = tokio::time::interval(self.config.poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "inverter {}: polling {}:{} every {}ms",
            datalog,
            self.config.host(),
            self.config.port(),
            self.config.poll_interval().as_millis()
        );

        loop {
            tokio::select! {
                _ = interval.tick() => session.update(Instant::now()).await,
                msg = self.to_inverter.recv() => match msg {
                    Ok(ChannelData::WriteRegister(target, register, value)) if target == datalog => {
                        session.queue_write(register, value);
                    }
                    Ok(ChannelData::Shutdown) => break,
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("inverter {}: missed {} control messages", datalog, n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        info!("inverter {}: stopping", datalog);
        session.stop();
        session.stats().print_summary(datalog);

        Ok(())
    }
}
