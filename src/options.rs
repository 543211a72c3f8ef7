use clap::Parser;

/// Polls Luxpower / EG4 inverters through their WiFi datalog
#[derive(Debug, Parser)]
#[clap(author, version)]
pub struct Options {
    /// Config file to read
    #[clap(short = 'c', long = "config", default_value = "config.yaml")]
    pub config_file: String,

    /// Optional runtime limit in seconds
    #[clap(short = 't', long = "time")]
    pub runtime: Option<u64>,

    /// Holding register write to send on startup, as REGISTER=VALUE (repeatable)
    #[clap(long = "write", value_parser = parse_write)]
    pub writes: Vec<(u16, u16)>,
}

impl Options {
    pub fn new() -> Self {
        Self::parse()
    }
}

fn parse_write(s: &str) -> Result<(u16, u16), String> {
    let (register, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected REGISTER=VALUE, got {:?}", s))?;

    let register = register
        .trim()
        .parse()
        .map_err(|e| format!("bad register {:?}: {}", register, e))?;
    let value = value
        .trim()
        .parse()
        .map_err(|e| format!("bad value {:?}: {}", value, e))?;

    Ok((register, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_writes() {
        let options =
            Options::parse_from(["lxp-poller", "-c", "test.yaml", "--write", "21=1", "--write", "64 = 100"]);

        assert_eq!(options.config_file, "test.yaml");
        assert_eq!(options.writes, vec![(21, 1), (64, 100)]);
        assert_eq!(options.runtime, None);
    }

    #[test]
    fn rejects_malformed_write() {
        assert!(parse_write("21").is_err());
        assert!(parse_write("21=x").is_err());
        assert!(parse_write("70000=1").is_err());
    }
}
