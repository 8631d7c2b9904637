//! Structured logging with box-drawing output.
//!
//! Every line geoalarm prints goes through [`Log::emit`], which renders one of
//! the [`Line`] shapes below and routes it either to stdout or, when file
//! logging is active, to a background writer thread.
//!
//! ## Conventions
//!
//! - **`log_block_start!`** opens a new conceptual block (alarm registered,
//!   configuration loaded). Prints an empty `┃` spacer, then `┣ message`.
//! - **`log_decorated!`** continues a block: `┣ message`.
//! - **`log_indented!`** lists details under the previous line: `┃   message`.
//! - **`log_pipe!`** inserts a bare `┃` spacer before a standalone level line.
//! - **`log_version!`** / **`log_end!`** frame the whole run.
//! - **`log_info!`**, **`log_warning!`**, **`log_error!`**, **`log_debug!`**,
//!   **`log_critical!`** carry a colored `[LEVEL]` tag. Debug lines are only
//!   printed once [`Log::set_debug`] has been switched on.
//!
//! Duplicate deliveries are logged with `log_debug!`, unknown alarms and failed
//! effects with `log_warning!`, an abandoned UI bridge delivery with `log_error!`.

use std::io::Write;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Sender, channel};

static LOGGING_ENABLED: AtomicBool = AtomicBool::new(true);
static DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);

// Set once when --log is given
static LOG_CHANNEL: OnceLock<Sender<LogMessage>> = OnceLock::new();

enum LogMessage {
    Formatted(String),
    Shutdown,
}

/// Shape of a single rendered log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Line {
    Decorated,
    Indented,
    Pipe,
    BlockStart,
    Version,
    End,
    Info,
    Warning,
    Error,
    Debug,
    Critical,
}

/// Main logging interface.
pub struct Log;

impl Log {
    /// Enable or disable all output.
    pub fn set_enabled(enabled: bool) {
        LOGGING_ENABLED.store(enabled, Ordering::SeqCst);
    }

    pub fn is_enabled() -> bool {
        LOGGING_ENABLED.load(Ordering::SeqCst)
    }

    /// Enable or disable `log_debug!` lines.
    pub fn set_debug(enabled: bool) {
        DEBUG_ENABLED.store(enabled, Ordering::SeqCst);
    }

    pub fn is_debug() -> bool {
        DEBUG_ENABLED.load(Ordering::SeqCst)
    }

    /// Route all further output to `file_path`.
    ///
    /// ANSI color codes are stripped before the text reaches the file. The
    /// returned guard flushes and joins the writer thread when dropped.
    pub fn start_file_logging(file_path: String) -> anyhow::Result<LoggerGuard> {
        let (tx, rx) = channel();

        LOG_CHANNEL
            .set(tx.clone())
            .map_err(|_| anyhow::anyhow!("Logger channel already initialized"))?;

        let handle = std::thread::spawn(move || {
            let mut file = std::fs::File::create(&file_path)?;

            loop {
                match rx.recv() {
                    Ok(LogMessage::Formatted(text)) => {
                        file.write_all(text.as_bytes())?;
                    }
                    Ok(LogMessage::Shutdown) | Err(_) => {
                        file.flush()?;
                        break;
                    }
                }
            }

            Ok::<(), anyhow::Error>(())
        });

        Ok(LoggerGuard {
            tx,
            handle: Some(handle),
        })
    }

    /// Timestamp prefix shown while running on a simulated clock.
    pub fn get_timestamp_prefix() -> String {
        if crate::time_source::is_initialized() && crate::time_source::is_simulated() {
            format!("[{}] ", crate::time_source::now_local().format("%H:%M:%S"))
        } else {
            String::new()
        }
    }

    /// Render `message` in the given shape and write it out.
    pub fn emit(line: Line, message: &str) {
        if !Self::is_enabled() {
            return;
        }
        if line == Line::Debug && !Self::is_debug() {
            return;
        }
        let prefix = Self::get_timestamp_prefix();
        write_output(&render(&prefix, line, message));
    }
}

fn render(prefix: &str, line: Line, message: &str) -> String {
    match line {
        Line::Decorated => format!("{prefix}┣ {message}\n"),
        Line::Indented => format!("{prefix}┃   {message}\n"),
        Line::Pipe => format!("{prefix}┃\n"),
        Line::BlockStart => format!("{prefix}┃\n{prefix}┣ {message}\n"),
        Line::Version => format!("{prefix}┏ geoalarm v{message} ━━╸\n"),
        Line::End => format!("{prefix}╹\n"),
        Line::Info => format!("{prefix}┣[\x1b[32mINFO\x1b[0m] {message}\n"),
        Line::Warning => format!("{prefix}┣[\x1b[33mWARNING\x1b[0m] {message}\n"),
        Line::Error => format!("{prefix}┣[\x1b[31mERROR\x1b[0m] {message}\n"),
        Line::Debug => format!("{prefix}┣[\x1b[36mDEBUG\x1b[0m] {message}\n"),
        Line::Critical => format!("{prefix}┣[\x1b[31mCRITICAL\x1b[0m] {message}\n"),
    }
}

/// Guard for file logging that ensures clean shutdown.
pub struct LoggerGuard {
    tx: Sender<LogMessage>,
    handle: Option<std::thread::JoinHandle<anyhow::Result<()>>>,
}

impl Drop for LoggerGuard {
    fn drop(&mut self) {
        let _ = self.tx.send(LogMessage::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn strip_ansi_codes(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '\x1b' && chars.peek() == Some(&'[') {
            chars.next();
            for ch in chars.by_ref() {
                if ch == 'm' {
                    break;
                }
            }
        } else {
            result.push(ch);
        }
    }

    result
}

// Public because the exported macros expand to it
pub fn write_output(text: &str) {
    if let Some(tx) = LOG_CHANNEL.get() {
        let _ = tx.send(LogMessage::Formatted(strip_ansi_codes(text)));
    } else {
        print!("{text}");
        let _ = std::io::stdout().flush();
    }
}

// # Logging Macros

#[doc(hidden)]
#[macro_export]
macro_rules! __log_line {
    ($line:ident, $fmt:literal $($arg:tt)*) => {{
        $crate::logger::Log::emit($crate::logger::Line::$line, &format!($fmt $($arg)*));
    }};
    ($line:ident, $expr:expr) => {{
        $crate::logger::Log::emit($crate::logger::Line::$line, &format!("{}", $expr));
    }};
}

/// Log a message that continues the current block.
#[macro_export]
macro_rules! log_decorated {
    ($($tokens:tt)+) => { $crate::__log_line!(Decorated, $($tokens)+) };
}

/// Log a detail line under the previous message.
#[macro_export]
macro_rules! log_indented {
    ($($tokens:tt)+) => { $crate::__log_line!(Indented, $($tokens)+) };
}

/// Log a bare spacer line.
#[macro_export]
macro_rules! log_pipe {
    () => {{
        $crate::logger::Log::emit($crate::logger::Line::Pipe, "");
    }};
}

/// Start a new block of related lines.
#[macro_export]
macro_rules! log_block_start {
    ($($tokens:tt)+) => { $crate::__log_line!(BlockStart, $($tokens)+) };
}

/// Print the startup header.
#[macro_export]
macro_rules! log_version {
    () => {{
        $crate::logger::Log::emit($crate::logger::Line::Version, env!("CARGO_PKG_VERSION"));
    }};
}

/// Print the final termination marker.
#[macro_export]
macro_rules! log_end {
    () => {{
        $crate::logger::Log::emit($crate::logger::Line::End, "");
    }};
}

#[macro_export]
macro_rules! log_info {
    ($($tokens:tt)+) => { $crate::__log_line!(Info, $($tokens)+) };
}

#[macro_export]
macro_rules! log_warning {
    ($($tokens:tt)+) => { $crate::__log_line!(Warning, $($tokens)+) };
}

#[macro_export]
macro_rules! log_error {
    ($($tokens:tt)+) => { $crate::__log_line!(Error, $($tokens)+) };
}

/// Debug line, printed only when debug output is on.
#[macro_export]
macro_rules! log_debug {
    ($($tokens:tt)+) => { $crate::__log_line!(Debug, $($tokens)+) };
}

#[macro_export]
macro_rules! log_critical {
    ($($tokens:tt)+) => { $crate::__log_line!(Critical, $($tokens)+) };
}
