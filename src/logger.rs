use anyhow::Result;
use chrono::Utc;
use hyper::StatusCode;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::net::Request;

/// Hooks fired while a site operation runs
pub trait Logger: Send + Sync {
    fn listing(&self, _line: &str) {}
    fn round(&self, _round: u32, _request: &Request, _embedding: usize) {}
    fn response(&self, _status: StatusCode, _content_type: Option<&str>, _server: Option<&str>) {}
    fn need_blobs(&self, _count: usize) {}
    fn error(&self, _context: &str, _msg: &str) {}
    fn done(&self, _rounds: u32, _seconds: f64) {}
}

pub struct NoopLogger;
impl Logger for NoopLogger {}

/// Verbose diagnostics on stderr
#[derive(Default)]
pub struct ConsoleLogger {
    server_shown: AtomicBool,
}

impl ConsoleLogger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Logger for ConsoleLogger {
    fn listing(&self, line: &str) {
        eprintln!("{}", line);
    }
    fn response(&self, status: StatusCode, content_type: Option<&str>, server: Option<&str>) {
        // Server identity only once per invocation
        if !self.server_shown.swap(true, Ordering::Relaxed) {
            eprintln!("server: {}", server.unwrap_or_default());
        }
        eprintln!("response: {} {}", status.as_u16(), content_type.unwrap_or_default());
    }
    fn need_blobs(&self, count: usize) {
        eprintln!("incremental: need {} blobs", count);
    }
}

/// Spinner shown while requests are in flight
pub struct ProgressLogger {
    spinner: ProgressBar,
}

impl ProgressLogger {
    pub fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.enable_steady_tick(Duration::from_millis(100));
        Self { spinner }
    }
}

impl Default for ProgressLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl Logger for ProgressLogger {
    fn round(&self, round: u32, request: &Request, embedding: usize) {
        if round == 1 {
            self.spinner.set_message(format!("{} {}", request.method, request.url));
        } else {
            self.spinner.set_message(format!(
                "{} {} (round {}, sending {} blobs)",
                request.method, request.url, round, embedding
            ));
        }
    }
    fn done(&self, _rounds: u32, _seconds: f64) {
        self.spinner.finish_and_clear();
    }
    fn error(&self, _context: &str, _msg: &str) {
        self.spinner.finish_and_clear();
    }
}

/// Timestamped lines appended to a log file
pub struct TextLogger {
    file: Mutex<File>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(f),
        })
    }

    fn line(&self, s: &str) {
        if let Ok(mut f) = self.file.lock() {
            let _ = writeln!(f, "[{}] {}", Utc::now().to_rfc3339(), s);
        }
    }
}

impl Logger for TextLogger {
    fn listing(&self, line: &str) {
        self.line(&format!("ENTRY {}", line));
    }
    fn round(&self, round: u32, request: &Request, embedding: usize) {
        self.line(&format!(
            "SEND round={} method={} url={} embed={}",
            round, request.method, request.url, embedding
        ));
    }
    fn response(&self, status: StatusCode, content_type: Option<&str>, server: Option<&str>) {
        self.line(&format!(
            "RESPONSE status={} type={} server={}",
            status.as_u16(),
            content_type.unwrap_or("-"),
            server.unwrap_or("-")
        ));
    }
    fn need_blobs(&self, count: usize) {
        self.line(&format!("NEED blobs={}", count));
    }
    fn error(&self, context: &str, msg: &str) {
        self.line(&format!("ERROR ctx={} msg={}", context, msg));
    }
    fn done(&self, rounds: u32, seconds: f64) {
        self.line(&format!("DONE rounds={rounds} seconds={seconds:.3}"));
    }
}

/// Forwards every event to each inner logger in order
pub struct TeeLogger(pub Vec<Box<dyn Logger>>);

impl Logger for TeeLogger {
    fn listing(&self, line: &str) {
        self.0.iter().for_each(|l| l.listing(line));
    }
    fn round(&self, round: u32, request: &Request, embedding: usize) {
        self.0.iter().for_each(|l| l.round(round, request, embedding));
    }
    fn response(&self, status: StatusCode, content_type: Option<&str>, server: Option<&str>) {
        self.0.iter().for_each(|l| l.response(status, content_type, server));
    }
    fn need_blobs(&self, count: usize) {
        self.0.iter().for_each(|l| l.need_blobs(count));
    }
    fn error(&self, context: &str, msg: &str) {
        self.0.iter().for_each(|l| l.error(context, msg));
    }
    fn done(&self, rounds: u32, seconds: f64) {
        self.0.iter().for_each(|l| l.done(rounds, seconds));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::SiteTarget;
    use hyper::Method;
    use tempfile::TempDir;

    #[test]
    fn test_text_logger_writes_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs/upload.log");
        let logger = TextLogger::new(&path).unwrap();
        let request = SiteTarget::parse("http://example.org/")
            .unwrap()
            .request(Method::PUT)
            .unwrap();

        let tee = TeeLogger(vec![Box::new(NoopLogger), Box::new(logger)]);
        tee.round(1, &request, 0);
        tee.need_blobs(3);
        tee.done(2, 0.5);

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("SEND round=1 method=PUT url=http://example.org/"));
        assert!(lines[1].ends_with("NEED blobs=3"));
        assert!(lines[2].ends_with("DONE rounds=2 seconds=0.500"));
    }
}
