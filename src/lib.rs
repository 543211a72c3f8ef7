pub mod channels;
pub mod config;
pub mod datalog_writer;
pub mod error;
pub mod lxp;
pub mod options;
pub mod prelude;
pub mod utils;

const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

use crate::datalog_writer::DatalogWriter;
use crate::lxp::inverter::{ChannelData, Inverter};
use crate::prelude::*;

use std::time::Duration;

fn init_logging(level: &str) -> std::result::Result<(), log::SetLoggerError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.module_path().unwrap_or(""),
                record.args()
            )
        })
        .write_style(env_logger::WriteStyle::Never)
        .try_init()
}

/// Consumes everything the inverters publish: logs it and, if configured, writes
/// measurements to the datalog file.
async fn publisher(
    mut receiver: lxp::inverter::Receiver,
    datalog_writer: Option<DatalogWriter>,
) -> Result<()> {
    loop {
        match receiver.recv().await {
            Ok(ChannelData::Measurement(measurement)) => {
                info!(
                    "inverter {}: bank {} decoded, status {:?}, online {}",
                    measurement.datalog,
                    measurement.bank.register(),
                    measurement.status,
                    measurement.online
                );
                if let Some(writer) = &datalog_writer {
                    if let Err(e) = writer.write_measurement(&measurement) {
                        error!("datalog write failed: {}", e);
                    }
                }
            }
            Ok(ChannelData::Connected(datalog)) => info!("inverter {}: online", datalog),
            Ok(ChannelData::Disconnect(datalog)) => info!("inverter {}: offline", datalog),
            Ok(ChannelData::Heartbeat(datalog)) => debug!("inverter {}: heartbeat", datalog),
            Ok(ChannelData::Shutdown) => break,
            Ok(ChannelData::WriteRegister(..)) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("publisher missed {} messages", n);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }

    Ok(())
}

pub async fn app() -> Result<()> {
    let options = Options::new();

    let config = Config::new(options.config_file.clone());
    let _ = init_logging(config.as_ref().map_or("info", |c| c.loglevel.as_str()));

    info!("lxp-poller {} starting", CARGO_PKG_VERSION);

    let config = config.map_err(|e| {
        error!("failed to load config: {:?}", e);
        e
    })?;
    config.log_summary();

    if config.enabled_inverters().count() == 0 {
        bail!("no enabled inverters in {}", options.config_file);
    }

    let channels = Channels::new();

    let datalog_writer = match &config.datalog_file {
        Some(path) => Some(DatalogWriter::new(path)?),
        None => None,
    };
    let publisher_handle = tokio::spawn(publisher(channels.from_inverter.subscribe(), datalog_writer));

    let mut inverter_handles = Vec::new();
    let mut datalogs = Vec::new();
    for inverter_config in config.enabled_inverters() {
        let inverter = Inverter::new(inverter_config, channels.clone());
        if let Some(datalog) = inverter_config.datalog() {
            datalogs.push(datalog);
        }
        inverter_handles.push(tokio::spawn(async move {
            if let Err(e) = inverter.start().await {
                error!("inverter task failed: {}", e);
            }
        }));
    }

    for datalog in &datalogs {
        for (register, value) in &options.writes {
            let _ = channels
                .to_inverter
                .send(ChannelData::WriteRegister(*datalog, *register, *value));
        }
    }

    match options.runtime {
        Some(secs) => {
            info!("running for {}s", secs);
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        }
        None => {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("failed to listen for ctrl+c: {}", e);
            }
        }
    }

    info!("shutting down");
    let _ = channels.to_inverter.send(ChannelData::Shutdown);
    for result in futures::future::join_all(inverter_handles).await {
        if let Err(e) = result {
            error!("error waiting for inverter task: {}", e);
        }
    }

    let _ = channels.from_inverter.send(ChannelData::Shutdown);
    publisher_handle.await??;

    info!("shutdown complete");
    Ok(())
}
