use anyhow::{bail, Context, Result};
use clap::Parser;
use hostlink::config::{Cli, IpArgs, SerialArgs, TransportArgs};
use hostlink::dispatch::handlers::SyscallContext;
use hostlink::gdb::GdbRelay;
use hostlink::session::Session;
use hostlink::transport::serial::SerialTransport;
use hostlink::transport::udp::{self, UdpTransport};
use hostlink::transport::Transport;
use hostlink::{iso, logging};
use std::net::SocketAddr;
use tokio::runtime::Builder;
use tokio_serial::SerialPortBuilderExt;

fn main() -> Result<()> {
    let cli = Cli::parse();

    {
        let common = match &cli.transport {
            TransportArgs::Ip(a) => a.common(),
            TransportArgs::Serial(a) => a.common(),
        };
        common.validate().context("validate arguments")?;
        logging::init(common.log_level()).context("init logging")?;
    }

    let rt = Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("build tokio runtime")?;
    rt.block_on(run(cli))
}

async fn run(cli: Cli) -> Result<()> {
    match cli.transport {
        TransportArgs::Ip(args) => run_ip(args).await,
        TransportArgs::Serial(args) => run_serial(args).await,
    }
}

async fn run_ip(args: IpArgs) -> Result<()> {
    let action = args.action().context("determine action")?;
    let common = args.common();

    let ip = args.ip().context("usage error: -t <ip> is required")?;
    let target = SocketAddr::new(ip, udp::TARGET_PORT);
    let transport = UdpTransport::connect(target).await.context("connect udp transport")?;

    let ctx = build_context(common).await?;
    let console = !common.no_console();
    let cdfs_redir = common.iso().is_some();
    let session = Session::new(
        Transport::Udp(transport),
        ctx,
        console,
        cdfs_redir,
        common.quiet(),
        common.chroot().cloned(),
    );

    session
        .run(action, common.action_path().map(|p| p.as_path()), common.address(), common.size())
        .await
        .context("run session")
}

async fn run_serial(args: SerialArgs) -> Result<()> {
    let action = args.action().context("determine action")?;
    let common = args.common();

    if args.dumb_terminal() {
        tracing::warn!("dumb-terminal mode (-p) is not implemented; exiting after execute");
    }

    let device = args.device().clone();
    let requested_baud = args.baud();
    let default_baud = hostlink_common::wire::serial::DEFAULT_BAUD;

    let negotiated_baud = if requested_baud != default_baud {
        let port = tokio_serial::new(device.to_string_lossy(), default_baud)
            .open_native_async()
            .with_context(|| format!("open serial port {}", device.display()))?;
        let mut handshake = SerialTransport::new(port);
        let baud = handshake
            .negotiate_speed(requested_baud, args.speed_hack(), args.external_clock())
            .await
            .context("negotiate baud rate")?;
        Some(baud)
    } else {
        None
    };

    let open_baud = negotiated_baud.unwrap_or(requested_baud);
    let port = tokio_serial::new(device.to_string_lossy(), open_baud)
        .open_native_async()
        .with_context(|| format!("reopen serial port {} at {open_baud} baud", device.display()))?;
    let mut transport = SerialTransport::new(port);

    if negotiated_baud.is_some() && !transport.confirm_speed().await.context("confirm new baud rate")? {
        bail!("target did not confirm the new baud rate");
    }

    let ctx = build_context(common).await?;
    let console = !common.no_console() && !args.dumb_terminal();
    let cdfs_redir = common.iso().is_some();
    let session = Session::new(
        Transport::Serial(transport),
        ctx,
        console,
        cdfs_redir,
        common.quiet(),
        common.chroot().cloned(),
    );

    session
        .run(action, common.action_path().map(|p| p.as_path()), common.address(), common.size())
        .await
        .context("run session")
}

async fn build_context(common: &hostlink::config::CommonArgs) -> Result<SyscallContext> {
    let iso_file = common
        .iso()
        .map(|path| iso::open(path))
        .transpose()
        .context("open iso image")?;

    let gdb = if common.gdb() {
        Some(GdbRelay::bind().await.context("bind gdb relay listener")?)
    } else {
        None
    };

    Ok(SyscallContext::new(iso_file, gdb))
}
