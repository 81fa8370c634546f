//! Command-line configuration (spec §6). Two transports, each its own
//! subcommand, sharing a flattened set of common flags — mirroring the
//! teacher's `clap::Parser` derive style in `conmon-rs/server/src/config.rs`,
//! updated to current `clap` attribute syntax.

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use getset::{CopyGetters, Getters};
use std::net::IpAddr;
use std::path::PathBuf;

/// Default load address (spec §6).
pub const DEFAULT_ADDRESS: u32 = 0x8c01_0000;

#[derive(Debug, Parser)]
#[command(
    name = "hostlink",
    about = "Host-side loader and remote filesystem/debug server for the target"
)]
pub struct Cli {
    #[command(subcommand)]
    pub transport: TransportArgs,
}

#[derive(Debug, Subcommand)]
pub enum TransportArgs {
    /// UDP-based ethernet link.
    Ip(IpArgs),
    /// Direct serial line.
    Serial(SerialArgs),
}

#[derive(Debug, Args, Getters, CopyGetters)]
pub struct IpArgs {
    #[command(flatten)]
    #[getset(get = "pub")]
    pub common: CommonArgs,

    /// Target IP address.
    #[arg(short = 't', long, value_name = "IP")]
    #[getset(get_copy = "pub")]
    pub ip: Option<IpAddr>,

    /// Send a reboot command instead of uploading.
    #[arg(short = 'r', long, group = "action")]
    #[getset(get_copy = "pub")]
    pub reset: bool,
}

#[derive(Debug, Args, Getters, CopyGetters)]
pub struct SerialArgs {
    #[command(flatten)]
    #[getset(get = "pub")]
    pub common: CommonArgs,

    /// Serial device path.
    #[arg(short = 't', long, value_name = "DEVICE")]
    #[getset(get = "pub")]
    pub device: PathBuf,

    /// Baud rate.
    #[arg(short = 'b', long, default_value_t = hostlink_common::wire::serial::DEFAULT_BAUD)]
    #[getset(get_copy = "pub")]
    pub baud: u32,

    /// Apply the 115200 -> 111600 UART-divisor speed hack.
    #[arg(short = 'e', long)]
    #[getset(get_copy = "pub")]
    pub speed_hack: bool,

    /// Use an externally clocked UART (baud value sent as 0).
    #[arg(short = 'E', long)]
    #[getset(get_copy = "pub")]
    pub external_clock: bool,

    /// Enter dumb-terminal mode instead of the console/fileserver loop.
    #[arg(short = 'p', long)]
    #[getset(get_copy = "pub")]
    pub dumb_terminal: bool,
}

#[derive(Debug, Args, Getters, CopyGetters)]
#[getset(get_copy = "pub")]
pub struct CommonArgs {
    /// Upload and execute.
    #[arg(short = 'x', long, value_name = "FILE", group = "action")]
    #[getset(skip)]
    pub upload_execute: Option<PathBuf>,

    /// Upload only.
    #[arg(short = 'u', long, value_name = "FILE", group = "action")]
    #[getset(skip)]
    pub upload: Option<PathBuf>,

    /// Download only.
    #[arg(short = 'd', long, value_name = "FILE", group = "action")]
    #[getset(skip)]
    pub download: Option<PathBuf>,

    /// Load address.
    #[arg(short = 'a', long, value_parser = parse_u32, default_value_t = DEFAULT_ADDRESS)]
    pub address: u32,

    /// Transfer size, required when downloading.
    #[arg(short = 's', long)]
    pub size: Option<u32>,

    /// Chroot into this path before serving (POSIX only).
    #[arg(short = 'c', long, value_name = "PATH")]
    #[getset(skip)]
    pub chroot: Option<PathBuf>,

    /// Enable CDFS redirection from this ISO image.
    #[arg(short = 'i', long, value_name = "ISO")]
    #[getset(skip)]
    pub iso: Option<PathBuf>,

    /// Start the GDB relay listener on 127.0.0.1:2159.
    #[arg(short = 'g', long)]
    pub gdb: bool,

    /// Disable the console/fileserver loop after execute.
    #[arg(short = 'n', long)]
    pub no_console: bool,

    /// Suppress the target's screen clear on download.
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Logging verbosity.
    #[arg(long, env = "HOSTLINK_LOG_LEVEL", default_value = "info")]
    #[getset(skip)]
    pub log_level: String,
}

impl CommonArgs {
    pub fn upload_execute(&self) -> Option<&PathBuf> {
        self.upload_execute.as_ref()
    }

    pub fn upload(&self) -> Option<&PathBuf> {
        self.upload.as_ref()
    }

    pub fn download(&self) -> Option<&PathBuf> {
        self.download.as_ref()
    }

    pub fn chroot(&self) -> Option<&PathBuf> {
        self.chroot.as_ref()
    }

    pub fn iso(&self) -> Option<&PathBuf> {
        self.iso.as_ref()
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    /// The file path that goes with whichever of `-x`/`-u`/`-d` is set;
    /// `None` for `-r` (reset takes no file).
    pub fn action_path(&self) -> Option<&PathBuf> {
        self.upload_execute()
            .or_else(|| self.upload())
            .or_else(|| self.download())
    }

    /// The session command this invocation maps to, per spec §4.6: `x`/`u`/
    /// `d`/`r` are mutually exclusive (enforced by `clap`'s "action" group);
    /// `r` lives on `IpArgs` and is folded in by the caller.
    pub fn validate(&self) -> Result<()> {
        if self.download.is_some() && self.size.is_none() {
            bail!("usage error: -d requires -s");
        }
        Ok(())
    }
}

fn parse_u32(s: &str) -> Result<u32, std::num::ParseIntError> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16)
    } else {
        s.parse()
    }
}

/// The four mutually exclusive top-level actions from spec §4.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Upload,
    UploadExecute,
    Download,
    Reset,
}

impl IpArgs {
    pub fn action(&self) -> Result<Action> {
        action_from(
            self.common.upload_execute(),
            self.common.upload(),
            self.common.download(),
            self.reset(),
        )
    }
}

impl SerialArgs {
    pub fn action(&self) -> Result<Action> {
        action_from(
            self.common.upload_execute(),
            self.common.upload(),
            self.common.download(),
            false,
        )
    }
}

fn action_from(
    x: Option<&PathBuf>,
    u: Option<&PathBuf>,
    d: Option<&PathBuf>,
    reset: bool,
) -> Result<Action> {
    match (x, u, d, reset) {
        (Some(_), None, None, false) => Ok(Action::UploadExecute),
        (None, Some(_), None, false) => Ok(Action::Upload),
        (None, None, Some(_), false) => Ok(Action::Download),
        (None, None, None, true) => Ok(Action::Reset),
        _ => bail!("usage error: specify exactly one of -x, -u, -d, -r"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_and_decimal_addresses() {
        assert_eq!(parse_u32("0x8c010000").unwrap(), 0x8c01_0000);
        assert_eq!(parse_u32("1024").unwrap(), 1024);
    }

    #[test]
    fn download_without_size_is_usage_error() {
        let args = CommonArgs {
            upload_execute: None,
            upload: None,
            download: Some(PathBuf::from("out.bin")),
            address: DEFAULT_ADDRESS,
            size: None,
            chroot: None,
            iso: None,
            gdb: false,
            no_console: false,
            quiet: false,
            log_level: "info".into(),
        };
        assert!(args.validate().is_err());
    }

    #[test]
    fn action_requires_exactly_one_flag() {
        assert!(action_from(None, None, None, false).is_err());
        assert!(action_from(Some(&PathBuf::from("a")), Some(&PathBuf::from("b")), None, false)
            .is_err());
        assert_eq!(
            action_from(Some(&PathBuf::from("a")), None, None, false).unwrap(),
            Action::UploadExecute
        );
        assert_eq!(
            action_from(None, None, None, true).unwrap(),
            Action::Reset
        );
    }
}
