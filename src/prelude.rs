pub use anyhow::{anyhow, bail, Result};
pub use log::{debug, error, info, trace, warn};
pub use std::io::Write;
pub use std::str::FromStr;
pub use tokio::sync::broadcast;

pub use crate::channels::Channels;
pub use crate::config::{self, Config};
pub use crate::error::LxpError;
pub use crate::lxp;
pub use crate::lxp::inverter::Serial;
pub use crate::options::Options;
pub use crate::utils::Utils;
pub use crate::{file_error, file_error_with_source};
