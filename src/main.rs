/*!
 * Oarlock - Main Entry Point
 *
 * Datagram echo utility that exercises the whole runtime stack:
 * selector thread, owner loop, handle registry, and completion dispatch.
 */

use log::{info, warn};
use oarlock::{RuntimeContext, RuntimeError};
use std::sync::Arc;

struct Options {
    addr: String,
    port: u16,
}

fn print_usage() {
    eprintln!("Usage: oarlock [options]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --addr ADDRESS   Local address to bind (default 127.0.0.1)");
    eprintln!("  --port PORT      Local port to bind (default 0 = ephemeral)");
    eprintln!("  -h, --help       Show this message");
}

fn parse_args(args: &[String]) -> Result<Option<Options>, String> {
    let mut options = Options {
        addr: "127.0.0.1".to_string(),
        port: 0,
    };
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => return Ok(None),
            "--addr" => {
                i += 1;
                options.addr = args
                    .get(i)
                    .ok_or_else(|| "--addr requires a value".to_string())?
                    .clone();
            }
            "--port" => {
                i += 1;
                options.port = args
                    .get(i)
                    .ok_or_else(|| "--port requires a value".to_string())?
                    .parse()
                    .map_err(|_| format!("Invalid port: {}", args[i]))?;
            }
            other => return Err(format!("Unknown option: {}", other)),
        }
        i += 1;
    }
    Ok(Some(options))
}

fn run(options: Options) -> Result<(), RuntimeError> {
    info!("Oarlock runtime starting...");
    let (context, owner) = RuntimeContext::build()?;

    let handle = context.new_datagram_handle();
    handle.bind(Some(&options.addr), options.port)?;
    if let Some(local) = handle.local_addr() {
        info!("Echoing datagrams on {}", local);
    }

    let echo = Arc::clone(&handle);
    handle.start_reading_datagrams(Box::new(move |result| match result {
        Ok(datagram) => {
            let peer = datagram.address();
            let queued = echo.send(
                peer,
                datagram.into_buffer(),
                Box::new(move |done| {
                    if let Err(e) = done {
                        warn!("Echo to {} failed: {}", peer, e);
                    }
                }),
            );
            if let Err(e) = queued {
                warn!("Echo to {} not queued: {}", peer, e);
            }
        }
        Err(e) => warn!("Receive failed: {}", e),
    }))?;

    // The owner loop plays the interpreter thread; it runs until the
    // context shuts down.
    owner.run();
    Ok(())
}

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let options = match parse_args(&args) {
        Ok(Some(options)) => options,
        Ok(None) => {
            print_usage();
            return;
        }
        Err(msg) => {
            eprintln!("{}", msg);
            print_usage();
            std::process::exit(1);
        }
    };

    if let Err(e) = run(options) {
        eprintln!("{}", e);
        std::process::exit(99);
    }
}
