//! One-byte command link to the indicator microcontroller.
//!
//! The microcontroller understands two bytes: `L` switches the indicator on
//! and `D` switches it off. Nothing is ever read back. When the serial
//! device cannot be opened the link runs in simulation mode and commands
//! are only logged.

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::sys::termios::{self, BaudRate, ControlFlags, SetArg};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Activate,
    Deactivate,
}

impl Command {
    pub fn byte(self) -> u8 {
        match self {
            Command::Activate => b'L',
            Command::Deactivate => b'D',
        }
    }
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("hardware link unavailable: {0}")]
    Unavailable(String),
    #[error("unsupported bit rate {0}")]
    UnsupportedBaud(u32),
    #[error("hardware write failed: {0}")]
    WriteFailed(std::io::Error),
}

/// How a command was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    Simulated,
}

#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Serial device, e.g. `/dev/ttyACM0`.
    pub device: PathBuf,
    pub baud: u32,
    /// Pause after opening; boards that reset on open ignore early bytes.
    pub settle: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from("/dev/ttyACM0"),
            baud: 9600,
            settle: Duration::from_secs(2),
        }
    }
}

type Port = Box<dyn Write + Send>;

/// Shared handle to the microcontroller.
///
/// Writes from the recognition loop and from the deactivation timer are
/// serialised by the internal mutex.
pub struct HardwareLink {
    port: Mutex<Option<Port>>,
    name: String,
}

impl HardwareLink {
    /// Open the serial device, falling back to simulation on any failure.
    pub fn open(config: &LinkConfig) -> Self {
        match Self::try_open(config) {
            Ok(link) => link,
            Err(e) => {
                tracing::warn!(
                    device = %config.device.display(),
                    error = %e,
                    "running in simulation mode"
                );
                Self::simulated()
            }
        }
    }

    /// Open the serial device and report why it failed.
    pub fn try_open(config: &LinkConfig) -> Result<Self, LinkError> {
        let file = open_serial(config)?;
        tracing::info!(device = %config.device.display(), baud = config.baud, "hardware link open");
        if !config.settle.is_zero() {
            std::thread::sleep(config.settle);
        }
        Ok(Self {
            port: Mutex::new(Some(Box::new(file))),
            name: config.device.display().to_string(),
        })
    }

    pub fn simulated() -> Self {
        Self {
            port: Mutex::new(None),
            name: "simulation".into(),
        }
    }

    /// Wrap an arbitrary writer.
    pub fn from_writer(writer: Port, name: impl Into<String>) -> Self {
        Self {
            port: Mutex::new(Some(writer)),
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_simulated(&self) -> bool {
        self.lock().is_none()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Port>> {
        self.port.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Write one command byte.
    pub fn send(&self, command: Command) -> Result<Delivery, LinkError> {
        let mut port = self.lock();
        let Some(port) = port.as_mut() else {
            tracing::info!(?command, "simulation: command not transmitted");
            return Ok(Delivery::Simulated);
        };
        port.write_all(&[command.byte()])
            .and_then(|_| port.flush())
            .map_err(LinkError::WriteFailed)?;
        tracing::debug!(?command, link = %self.name, "command sent");
        Ok(Delivery::Sent)
    }

    /// Drop the underlying handle. Later commands are simulated.
    pub fn close(&self) {
        if self.lock().take().is_some() {
            tracing::info!(link = %self.name, "hardware link closed");
        }
    }

    /// Switch the indicator on for `hold`, then off again.
    pub fn self_test(&self, hold: Duration) -> Result<Delivery, LinkError> {
        let delivery = self.send(Command::Activate)?;
        std::thread::sleep(hold);
        self.send(Command::Deactivate)?;
        Ok(delivery)
    }
}

fn baud_rate(baud: u32) -> Result<BaudRate, LinkError> {
    Ok(match baud {
        1200 => BaudRate::B1200,
        2400 => BaudRate::B2400,
        4800 => BaudRate::B4800,
        9600 => BaudRate::B9600,
        19200 => BaudRate::B19200,
        38400 => BaudRate::B38400,
        57600 => BaudRate::B57600,
        115200 => BaudRate::B115200,
        230400 => BaudRate::B230400,
        other => return Err(LinkError::UnsupportedBaud(other)),
    })
}

/// Check a bit rate without touching a device.
pub fn is_supported_baud(baud: u32) -> bool {
    baud_rate(baud).is_ok()
}

fn open_serial(config: &LinkConfig) -> Result<File, LinkError> {
    let speed = baud_rate(config.baud)?;
    let unavailable = |what: &str, e: &dyn std::fmt::Display| {
        LinkError::Unavailable(format!("{}: {what}: {e}", config.device.display()))
    };

    // Non-blocking open so a missing carrier line cannot hang us.
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags((OFlag::O_NOCTTY | OFlag::O_NONBLOCK).bits())
        .open(&config.device)
        .map_err(|e| unavailable("open", &e))?;

    let mut tio = termios::tcgetattr(&file).map_err(|e| unavailable("tcgetattr", &e))?;
    termios::cfmakeraw(&mut tio);
    termios::cfsetspeed(&mut tio, speed).map_err(|e| unavailable("cfsetspeed", &e))?;
    tio.control_flags |= ControlFlags::CLOCAL | ControlFlags::CREAD;
    termios::tcsetattr(&file, SetArg::TCSANOW, &tio).map_err(|e| unavailable("tcsetattr", &e))?;

    fcntl(&file, FcntlArg::F_SETFL(OFlag::empty())).map_err(|e| unavailable("fcntl", &e))?;
    Ok(file)
}
