use crate::prelude::*;
use crate::lxp::inverter::Measurement;

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Appends every decoded bank to a file as one JSON object per line.
#[derive(Debug, Clone)]
pub struct DatalogWriter {
    file: Arc<Mutex<std::fs::File>>,
    path: String,
    records_written: Arc<Mutex<u64>>,
}

impl DatalogWriter {
    pub fn new(path: &str) -> Result<Self> {
        info!("Opening datalog file at {}", path);

        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| file_error_with_source!(e, "failed to open datalog file {}", path))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644))
                .map_err(|e| file_error_with_source!(e, "failed to set permissions on {}", path))?;
        }

        Ok(Self {
            file: Arc::new(Mutex::new(file)),
            path: path.to_string(),
            records_written: Arc::new(Mutex::new(0)),
        })
    }

    pub fn write_measurement(&self, measurement: &Measurement) -> Result<()> {
        let mut json = serde_json::to_value(measurement)?;
        if let serde_json::Value::Object(map) = &mut json {
            map.insert(
                "utc_timestamp".to_string(),
                serde_json::Value::Number(measurement.time.timestamp().into()),
            );
        }
        let line = serde_json::to_string(&json)?;

        let mut file = self
            .file
            .lock()
            .map_err(|_| anyhow!("failed to lock datalog file"))?;
        writeln!(file, "{}", line)
            .and_then(|_| file.flush())
            .map_err(|e| file_error_with_source!(e, "failed to write to {}", self.path))?;

        let mut records_written = self
            .records_written
            .lock()
            .map_err(|_| anyhow!("failed to lock record counter"))?;
        *records_written += 1;
        debug!("{} records written to {}", *records_written, self.path);

        Ok(())
    }

    pub fn records_written(&self) -> u64 {
        self.records_written.lock().map(|n| *n).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lxp::inputs::{Bank, ReadInput, ReadInput4};
    use tempfile::NamedTempFile;

    fn measurement() -> Result<Measurement> {
        let mut values = vec![0u8; 72];
        values[6..8].copy_from_slice(&300u16.to_le_bytes());

        Ok(Measurement {
            time: chrono::Utc::now(),
            datalog: Serial::from_str("DG87654321")?,
            serial: Serial::from_str("BA12345678")?,
            bank: Bank::Generator,
            input: ReadInput::ReadInput4(ReadInput4::decode(&values)?),
            status: "Selling".to_string(),
            battery_status: String::new(),
            online: true,
        })
    }

    #[test]
    fn writes_one_line_per_measurement() -> Result<()> {
        let temp_file = NamedTempFile::new()?;
        let path = temp_file.path().to_str().ok_or_else(|| anyhow!("bad path"))?;
        let writer = DatalogWriter::new(path)?;

        writer.write_measurement(&measurement()?)?;
        writer.write_measurement(&measurement()?)?;

        let contents = std::fs::read_to_string(temp_file.path())?;
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(writer.records_written(), 2);

        let json: serde_json::Value = serde_json::from_str(lines[0])?;
        assert_eq!(json["serial"], "BA12345678");
        assert_eq!(json["datalog"], "DG87654321");
        assert_eq!(json["bank"], "Generator");
        assert_eq!(json["status"], "Selling");
        assert_eq!(json["input"]["p_gen"], 300);
        assert!(json["utc_timestamp"].is_number());

        Ok(())
    }
}
