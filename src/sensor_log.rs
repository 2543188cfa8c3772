//! Sensor polling task: read, show, log.

use core::fmt::Write;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;

use crate::config::DeviceKind;
use crate::hal::{Display, LogSink, Measurement, Sensor};
use crate::scheduler::{TaskAction, TaskFault};
use crate::state::TaskContext;

/// Rows between sink flushes.
pub const FLUSH_EVERY: u32 = 5;

const GPS_COLUMNS: &str = "GPS_BOOT_TIME,LAT,LON,ALT,REL_ALT";

type Row = heapless::String<256>;
type Line = heapless::String<32>;

/// The display is shared by every device task, hence the mutex.
pub type SharedDisplay<D> = Mutex<CriticalSectionRawMutex, D>;

pub struct SensorLogTask<'a, S, D, L> {
    kind: DeviceKind,
    display_line: u8,
    sensor: S,
    display: Option<&'a SharedDisplay<D>>,
    sink: L,
    header_written: bool,
    rows: u32,
}

impl<'a, S: Sensor, D: Display, L: LogSink> SensorLogTask<'a, S, D, L> {
    pub fn new(
        kind: DeviceKind,
        display_line: u8,
        sensor: S,
        display: Option<&'a SharedDisplay<D>>,
        sink: L,
    ) -> Self {
        Self {
            kind,
            display_line,
            sensor,
            display,
            sink,
            header_written: false,
            rows: 0,
        }
    }

    pub fn rows_written(&self) -> u32 {
        self.rows
    }

    async fn show(&self, reading: Option<&Measurement>) {
        let Some(display) = self.display else {
            return;
        };
        let name = self.kind.display_name();
        let mut display = display.lock().await;

        let result = match reading {
            Some(values) if values.len() > 1 => {
                let mut res = Ok(());
                for (i, v) in values.iter().enumerate() {
                    let mut line = Line::new();
                    let _ = write!(line, "{}{}:{}", name, i, v);
                    res = res.and(display.show_line(&line, self.display_line + i as u8).await);
                }
                res
            }
            Some(values) => {
                let mut line = Line::new();
                match values.first() {
                    Some(v) => {
                        let _ = write!(line, "{}:{}", name, v);
                    }
                    None => {
                        let _ = write!(line, "{}:-", name);
                    }
                }
                display.show_line(&line, self.display_line).await
            }
            None => {
                let mut line = Line::new();
                let _ = write!(line, "{}:-", name);
                display.show_line(&line, self.display_line).await
            }
        };

        if result.is_err() {
            log_warn!("{}: display error", self.kind.as_str());
        }
    }

    async fn append(&mut self, ctx: &TaskContext, values: &Measurement) -> Result<(), TaskFault> {
        if !self.header_written {
            let mut header = Row::new();
            write!(header, "{},{}", GPS_COLUMNS, self.kind.csv_header())
                .map_err(|_| TaskFault::Storage)?;
            self.sink
                .write_row(&header)
                .await
                .map_err(|_| TaskFault::Storage)?;
            self.header_written = true;
        }

        let row = format_row(ctx, values).ok_or(TaskFault::Storage)?;
        self.sink
            .write_row(&row)
            .await
            .map_err(|_| TaskFault::Storage)?;
        self.rows = self.rows.wrapping_add(1);

        if ctx.iteration % FLUSH_EVERY == 0 {
            log_debug!("{}: flushing", self.kind.as_str());
            self.sink.flush().await.map_err(|_| TaskFault::Storage)?;
        }
        Ok(())
    }
}

/// `time,lat,lon,alt,rel_alt,v0,v1,...`; GPS columns stay empty until a
/// position has arrived.
fn format_row(ctx: &TaskContext, values: &Measurement) -> Option<Row> {
    let mut row = Row::new();
    match &ctx.gps {
        Some(p) => write!(
            row,
            "{},{},{},{},{}",
            p.time_boot_ms, p.lat, p.lon, p.alt, p.relative_alt
        )
        .ok()?,
        None => row.push_str(",,,,").ok()?,
    }
    for v in values {
        write!(row, ",{}", v).ok()?;
    }
    Some(row)
}

impl<'a, S: Sensor, D: Display, L: LogSink> TaskAction for SensorLogTask<'a, S, D, L> {
    async fn fire(&mut self, ctx: &mut TaskContext) -> Result<(), TaskFault> {
        let reading = self.sensor.get_measurement().await;

        if ctx.display_enabled {
            self.show(reading.as_ref()).await;
        }

        match reading {
            Some(values) => self.append(ctx, &values).await,
            None => Ok(()),
        }
    }

    async fn close(&mut self) {
        if self.header_written {
            let _ = self.sink.flush().await;
        }
        self.sink.close().await;
    }

    fn name(&self) -> &'static str {
        self.kind.as_str()
    }
}
