use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, bounded};
use tracing::warn;

use crate::hardware::monitor::LoggedEvent;
use crate::task::scheduler::TrialRecord;

/// Opens for append so a relaunch on the same day keeps earlier rows.
/// The flag is true when the file was empty.
fn open_append(path: &Path) -> io::Result<(BufWriter<File>, bool)> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let fresh = file.metadata()?.len() == 0;
    Ok((BufWriter::new(file), fresh))
}

/// One JSON object per trial, written on its own thread.
pub struct TrialLogger {
    tx: Option<Sender<String>>,
    handle: Option<JoinHandle<()>>,
}

impl TrialLogger {
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let (writer, _) = open_append(path)?;
        let (tx, rx) = bounded::<String>(64);
        let shown = path.display().to_string();
        let handle = thread::Builder::new()
            .name("trial-log".into())
            .spawn(move || write_lines(rx, writer, &shown))?;
        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
        })
    }

    pub fn log(&self, record: &TrialRecord) -> io::Result<()> {
        let line = serde_json::to_string(record).map_err(io::Error::other)?;
        match &self.tx {
            Some(tx) => tx
                .send(line)
                .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "trial log closed")),
            None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "trial log closed")),
        }
    }

    /// Flush everything queued and close the file.
    pub fn close(&mut self) {
        self.tx.take();
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for TrialLogger {
    fn drop(&mut self) {
        self.close();
    }
}

fn write_lines(rx: Receiver<String>, mut writer: BufWriter<File>, path: &str) {
    while let Ok(line) = rx.recv() {
        let written = writeln!(writer, "{line}").and_then(|()| writer.flush());
        if let Err(e) = written {
            warn!("trial log {path}: {e}");
        }
    }
}

/// CSV of every sensor event the monitor drained: `time_s,side`.
pub struct ResponseLog {
    tx: Option<Sender<LoggedEvent>>,
    handle: Option<JoinHandle<()>>,
}

impl ResponseLog {
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let (mut writer, fresh) = open_append(path)?;
        if fresh {
            writeln!(writer, "time_s,side")?;
        }
        let (tx, rx) = bounded::<LoggedEvent>(1024);
        let shown = path.display().to_string();
        let handle = thread::Builder::new()
            .name("response-log".into())
            .spawn(move || {
                while let Ok(ev) = rx.recv() {
                    if let Err(e) = writeln!(writer, "{:.6},{}", ev.time, ev.side) {
                        warn!("response log {shown}: {e}");
                    }
                }
                if let Err(e) = writer.flush() {
                    warn!("response log {shown}: {e}");
                }
            })?;
        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
        })
    }

    /// Sender handed to the response monitor.
    pub fn sender(&self) -> Option<Sender<LoggedEvent>> {
        self.tx.clone()
    }

    /// Closes once every sender clone (including the monitor's) is gone.
    pub fn close(&mut self) {
        self.tx.take();
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for ResponseLog {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sign::Sign;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_path(name: &str) -> std::path::PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("trialrig_{name}_{nanos}"))
    }

    #[test]
    fn response_log_writes_csv_rows() {
        let path = temp_path("licks.csv");
        let mut log = ResponseLog::create(&path).unwrap();
        let tx = log.sender().unwrap();
        tx.send(LoggedEvent {
            side: Sign::Left,
            time: 1.5,
        })
        .unwrap();
        drop(tx);
        log.close();
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, "time_s,side\n1.500000,left\n");
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn reopening_appends_without_second_header() {
        let path = temp_path("licks_reopen.csv");
        for (side, time) in [(Sign::Left, 1.0), (Sign::Right, 2.0)] {
            let mut log = ResponseLog::create(&path).unwrap();
            let tx = log.sender().unwrap();
            tx.send(LoggedEvent { side, time }).unwrap();
            drop(tx);
            log.close();
        }
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, "time_s,side\n1.000000,left\n2.000000,right\n");
        let _ = fs::remove_file(&path);
    }
}
