use chrono::{SecondsFormat, Utc};
use env_logger::{Builder, Target, WriteStyle};
use log::LevelFilter;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

/// Console plus append-only file sink
///
/// Write errors are swallowed on both sides; logging never fails the caller.
pub struct Tee {
    file: Option<File>,
}

impl Tee {
    pub fn new(file: Option<File>) -> Self {
        Self { file }
    }

    pub fn open(path: &Path) -> Self {
        Self::new(open_log_file(path).ok())
    }
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _ = io::stdout().write_all(buf);
        if let Some(file) = self.file.as_mut() {
            let _ = file.write_all(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = io::stdout().flush();
        if let Some(file) = self.file.as_mut() {
            let _ = file.flush();
        }
        Ok(())
    }
}

pub fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// `[2024-05-01T12:00:00.000Z] message`, UTC with millisecond precision
pub fn format_line(message: &str) -> String {
    format!(
        "[{}] {message}",
        Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
    )
}

/// Install the global logger; a second call is a no-op
pub fn init(level: LevelFilter, log_path: Option<&Path>) {
    let tee = match log_path {
        Some(path) => Tee::open(path),
        None => Tee::new(None),
    };

    let _ = Builder::new()
        .filter_level(level)
        .write_style(WriteStyle::Never)
        .format(|buf, record| {
            let line = format_line(&format!("{:<5} {}", record.level(), record.args()));
            writeln!(buf, "{line}")
        })
        .target(Target::Pipe(Box::new(tee)))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    #[test]
    fn test_tee_appends_to_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("agent.log");

        let mut tee = Tee::open(&path);
        tee.write_all(b"first\n").unwrap();
        drop(tee);

        let mut tee = Tee::open(&path);
        tee.write_all(b"second\n").unwrap();
        tee.flush().unwrap();

        let mut contents = String::new();
        File::open(&path).unwrap().read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "first\nsecond\n");
    }

    #[test]
    fn test_tee_without_file_never_fails() {
        let mut tee = Tee::new(None);
        assert_eq!(tee.write(b"x").unwrap(), 1);
    }

    #[test]
    fn test_format_line_has_utc_timestamp_prefix() {
        let line = format_line("Connected");
        assert!(line.ends_with("] Connected"));

        let stamp = &line[1..line.find(']').unwrap()];
        assert!(stamp.ends_with('Z'));
        assert_eq!(stamp.len(), "2024-05-01T12:00:00.000Z".len());
        assert!(chrono::DateTime::parse_from_rfc3339(stamp).is_ok());
    }
}
