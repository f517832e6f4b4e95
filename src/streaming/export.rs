//! Data export functionality

use anyhow::{anyhow, Result};
use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::info;

use crate::detection::{MatchResult, PowerEvent};
use crate::meter::Sample;

use super::ExportFormat;

/// Appends samples and events to timestamped export files.
pub struct DataExporter {
    path: PathBuf,
    format: ExportFormat,
    samples_file: Mutex<Option<BufWriter<File>>>,
    events_file: Mutex<Option<BufWriter<File>>>,
    samples_count: Mutex<usize>,
}

impl DataExporter {
    pub fn new(path: &str, format: ExportFormat) -> Result<Self> {
        let path = PathBuf::from(path);
        std::fs::create_dir_all(&path)?;

        Ok(Self {
            path,
            format,
            samples_file: Mutex::new(None),
            events_file: Mutex::new(None),
            samples_count: Mutex::new(0),
        })
    }

    /// Append one raw reading.
    pub fn export_sample(&self, sample: &Sample) -> Result<()> {
        let mut file_lock = self.samples_file.lock().unwrap();

        if file_lock.is_none() {
            let file = self.open_export_file(&self.timestamped("samples"))?;
            let mut writer = BufWriter::new(file);
            if self.format == ExportFormat::Csv {
                writeln!(writer, "timestamp,power,voltage,current,energy,frequency,power_factor")?;
            }
            *file_lock = Some(writer);
        }

        if let Some(ref mut writer) = *file_lock {
            match self.format {
                ExportFormat::Json => {
                    writeln!(writer, "{}", serde_json::to_string(sample)?)?;
                }
                ExportFormat::Csv => {
                    writeln!(
                        writer,
                        "{},{:.2},{},{},{},{},{}",
                        sample.timestamp.to_rfc3339(),
                        sample.power,
                        csv_opt(sample.voltage),
                        csv_opt(sample.current),
                        csv_opt(sample.energy),
                        csv_opt(sample.frequency),
                        csv_opt(sample.power_factor),
                    )?;
                }
            }
            writer.flush()?;
        }

        let mut count = self.samples_count.lock().unwrap();
        *count += 1;

        // Rotate to a fresh file every 100000 readings
        if *count % 100_000 == 0 {
            drop(file_lock);
            self.rotate_samples_file()?;
        }

        Ok(())
    }

    /// Append one detected event, with its identification when accepted.
    pub fn export_event(&self, event_id: i64, event: &PowerEvent, matched: Option<&MatchResult>) -> Result<()> {
        let mut file_lock = self.events_file.lock().unwrap();

        if file_lock.is_none() {
            let file = self.open_export_file(&self.timestamped("events"))?;
            let mut writer = BufWriter::new(file);
            if self.format == ExportFormat::Csv {
                writeln!(writer, "timestamp,id,kind,power_change,confidence,appliance")?;
            }
            *file_lock = Some(writer);
        }

        if let Some(ref mut writer) = *file_lock {
            match self.format {
                ExportFormat::Json => {
                    let record = serde_json::json!({
                        "id": event_id,
                        "event": event,
                        "appliance": matched.map(|m| m.appliance_name.clone()),
                        "match_confidence": matched.map(|m| m.confidence),
                    });
                    writeln!(writer, "{}", record)?;
                }
                ExportFormat::Csv => {
                    writeln!(
                        writer,
                        "{},{},{:?},{:.1},{:.4},{}",
                        event.detected_at.to_rfc3339(),
                        event_id,
                        event.kind,
                        event.power_change,
                        event.confidence,
                        matched.map(|m| m.appliance_name.as_str()).unwrap_or(""),
                    )?;
                }
            }
            writer.flush()?;
        }

        Ok(())
    }

    fn timestamped(&self, prefix: &str) -> PathBuf {
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        let ext = match self.format {
            ExportFormat::Json => "jsonl",
            ExportFormat::Csv => "csv",
        };
        self.path.join(format!("{}_{}.{}", prefix, timestamp, ext))
    }

    fn open_export_file(&self, path: &Path) -> Result<File> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| anyhow!("Failed to open export file: {}", e))
    }

    fn rotate_samples_file(&self) -> Result<()> {
        let mut file_lock = self.samples_file.lock().unwrap();
        if let Some(mut writer) = file_lock.take() {
            writer.flush()?;
        }

        let filename = self.timestamped("samples");
        let file = self.open_export_file(&filename)?;
        let mut writer = BufWriter::new(file);
        if self.format == ExportFormat::Csv {
            writeln!(writer, "timestamp,power,voltage,current,energy,frequency,power_factor")?;
        }
        *file_lock = Some(writer);

        info!("Rotated samples export file to {:?}", filename);
        Ok(())
    }

    /// Flush and close all files.
    pub fn close(&self) -> Result<()> {
        if let Some(mut writer) = self.samples_file.lock().unwrap().take() {
            writer.flush()?;
        }
        if let Some(mut writer) = self.events_file.lock().unwrap().take() {
            writer.flush()?;
        }
        Ok(())
    }
}

fn csv_opt(value: Option<f64>) -> String {
    value.map(|v| format!("{:.3}", v)).unwrap_or_default()
}
