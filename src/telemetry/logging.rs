use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Mutex, OnceLock};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
enum LogFile {
    Error,
    Login,
    Net,
    Patch,
}

struct Logger {
    files: Mutex<BTreeMap<LogFile, File>>,
}

static LOGGER: OnceLock<Logger> = OnceLock::new();

const HEADER_LINE: &str = "-------------------------------------------------------------------------------";
const HEADER_TITLE: &str = "bluegate - Blue Burst Lobby Server";

const DUMP_WIDTH: usize = 16;

pub fn init(root: &Path) -> Result<(), String> {
    if LOGGER.get().is_some() {
        return Ok(());
    }
    let log_dir = root.join("log");
    std::fs::create_dir_all(&log_dir)
        .map_err(|err| format!("log directory create failed: {}", err))?;

    let mut files = BTreeMap::new();
    for (log_file, name) in [
        (LogFile::Error, "error.log"),
        (LogFile::Login, "login.log"),
        (LogFile::Net, "net.log"),
        (LogFile::Patch, "patch.log"),
    ] {
        let path = log_dir.join(name);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|err| format!("open log {} failed: {}", name, err))?;
        if file.metadata().map(|m| m.len()).unwrap_or(0) == 0 {
            write_header(&mut file, name)?;
        }
        files.insert(log_file, file);
    }

    LOGGER
        .set(Logger {
            files: Mutex::new(files),
        })
        .map_err(|_| "log system already initialized".to_string())?;
    Ok(())
}

pub fn log_error(message: &str) {
    log_timestamped(LogFile::Error, message);
}

pub fn log_login(message: &str) {
    log_timestamped(LogFile::Login, message);
}

pub fn log_net(message: &str) {
    log_timestamped(LogFile::Net, message);
}

pub fn log_patch(message: &str) {
    log_timestamped(LogFile::Patch, message);
}

fn log_timestamped(log_file: LogFile, message: &str) {
    if let Some(logger) = LOGGER.get() {
        let clock = wall_clock_now();
        let line = format!(
            "{:02}.{:02}.{} {:02}:{:02}:{:02}: {}\n",
            clock.day, clock.month, clock.year, clock.hour, clock.minute, clock.second, message
        );
        let _ = write_line(logger, log_file, &line);
    }
}

fn write_line(logger: &Logger, log_file: LogFile, line: &str) -> std::io::Result<()> {
    let mut files = logger
        .files
        .lock()
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::Other, "log lock poisoned"))?;
    if let Some(file) = files.get_mut(&log_file) {
        file.write_all(line.as_bytes())?;
        file.flush()?;
    }
    Ok(())
}

fn write_header(file: &mut File, name: &str) -> Result<(), String> {
    let clock = wall_clock_now();
    writeln!(file, "{HEADER_LINE}")
        .map_err(|err| format!("header write failed: {}", err))?;
    writeln!(file, "{HEADER_TITLE}")
        .map_err(|err| format!("header write failed: {}", err))?;
    writeln!(
        file,
        "{name} - started {:02}.{:02}.{} {:02}:{:02}:{:02}",
        clock.day, clock.month, clock.year, clock.hour, clock.minute, clock.second
    )
    .map_err(|err| format!("header write failed: {}", err))?;
    Ok(())
}

/// Hex/ASCII dump of a packet payload in two columns, used in debug mode.
pub fn dump_payload(data: &[u8]) {
    for (offset, row) in data.chunks(DUMP_WIDTH).enumerate() {
        let mut line = format!("({:04X}) ", offset * DUMP_WIDTH);
        for (idx, byte) in row.iter().enumerate() {
            if idx == 8 {
                line.push_str("  ");
            }
            line.push_str(&format!("{:02x} ", byte));
        }
        for idx in row.len()..DUMP_WIDTH {
            if idx == 8 {
                line.push_str("  ");
            }
            line.push_str("   ");
        }
        line.push_str("    ");
        for byte in row {
            if byte.is_ascii_graphic() || *byte == b' ' {
                line.push(*byte as char);
            } else {
                line.push('.');
            }
        }
        println!("{}", line);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WallClock {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
    pub millis: u32,
}

pub fn wall_clock_now() -> WallClock {
    wall_clock_from_millis(unix_millis())
}

pub fn wall_clock_from_millis(millis: u128) -> WallClock {
    let secs = (millis / 1000) as i64;
    let days = secs / 86_400;
    let seconds_of_day = (secs % 86_400) as u32;
    let (year, month, day) = civil_from_days(days);
    WallClock {
        year,
        month,
        day,
        hour: seconds_of_day / 3_600,
        minute: (seconds_of_day % 3_600) / 60,
        second: seconds_of_day % 60,
        millis: (millis % 1000) as u32,
    }
}

fn unix_millis() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

fn civil_from_days(days: i64) -> (i32, u32, u32) {
    let z = days + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = mp + if mp < 10 { 3 } else { -9 };
    let year = (y + if m <= 2 { 1 } else { 0 }) as i32;
    (year, m as u32, d as u32)
}
