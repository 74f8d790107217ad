//! TCP echo endpoint: accepts one passive-open connection at a time
//! and echoes its bytes until SIGINT.

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use argh::FromArgs;
use log::{info, warn, LevelFilter};

use ustack::drivers;
use ustack::types::{Endpoint, Ipv4Addr, NetError};
use ustack::{ipv4, logging, netstack, route, tcp};

#[derive(FromArgs)]
/// TCP echo server over a TAP link.
struct Args {
    /// TAP interface name (default: tap0)
    #[argh(option, default = "String::from(\"tap0\")")]
    ifname: String,
    /// interface address (default: 192.0.2.2)
    #[argh(option, default = "String::from(\"192.0.2.2\")")]
    addr: String,
    /// interface netmask (default: 255.255.255.0)
    #[argh(option, default = "String::from(\"255.255.255.0\")")]
    netmask: String,
    /// default gateway
    #[argh(option)]
    gateway: Option<String>,
    /// port to listen on (default: 7)
    #[argh(option, default = "7")]
    port: u16,
    /// verbose logging
    #[argh(switch, short = 'v')]
    verbose: bool,
}

static TERMINATE: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigint(_sig: libc::c_int) {
    TERMINATE.store(true, Ordering::Relaxed);
    netstack::interrupt();
}

fn setup(args: &Args) -> Result<()> {
    netstack::init()?;

    let lo = drivers::loopback::create()?;
    let lo_iface = ipv4::IpIface::new("127.0.0.1".parse()?, "255.0.0.0".parse()?);
    ipv4::iface_register(&lo, &lo_iface)?;
    route::add(
        "127.0.0.0".parse()?,
        "255.0.0.0".parse()?,
        Ipv4Addr::ANY,
        &lo_iface,
    );

    let tap = drivers::tap::create(&args.ifname, None)?;
    let addr: Ipv4Addr = args.addr.parse()?;
    let netmask: Ipv4Addr = args.netmask.parse()?;
    let iface = ipv4::IpIface::new(addr, netmask);
    ipv4::iface_register(&tap, &iface)?;
    route::add(
        Ipv4Addr::from_u32(addr.to_u32() & netmask.to_u32()),
        netmask,
        Ipv4Addr::ANY,
        &iface,
    );
    if let Some(gateway) = &args.gateway {
        route::set_default_gateway(&iface, gateway)?;
    }

    netstack::run()?;
    // SAFETY: the handler only raises the cancellation event.
    unsafe { libc::signal(libc::SIGINT, on_sigint as libc::sighandler_t) };
    Ok(())
}

/// Echo one established connection until it goes away.
fn echo(sock: usize) {
    let mut buf = vec![0u8; 4096];
    loop {
        match tcp::receive(sock, &mut buf) {
            Ok(len) => {
                if let Err(err) = tcp::send(sock, &buf[..len]) {
                    warn!("send failed: {}", err);
                    break;
                }
            }
            Err(NetError::Interrupted) => break,
            Err(err) => {
                info!("connection done: {}", err);
                break;
            }
        }
    }
}

fn main() -> Result<()> {
    let args: Args = argh::from_env();
    logging::init(if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    })?;
    setup(&args)?;

    let local = Endpoint::new(Ipv4Addr::ANY, args.port);
    loop {
        info!("waiting for a connection on port {} ...", args.port);
        let sock = match tcp::open_rfc793(local, None, false) {
            Ok(sock) => sock,
            Err(NetError::Interrupted) => break,
            Err(err) => {
                warn!("open failed: {}", err);
                break;
            }
        };
        info!("connection established");
        echo(sock);
        let _ = tcp::close(sock);
        if TERMINATE.load(Ordering::Relaxed) {
            break;
        }
    }

    netstack::shutdown();
    Ok(())
}
