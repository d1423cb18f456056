// sph-worker <coordinator-addr>: serves stage requests for a DistributedBackend::accept coordinator
use std::process::ExitCode;

use bevy::log::{LogPlugin, error, info};
use bevy::prelude::App;

use sph_fluid2d::cluster::transport::TcpTransport;
use sph_fluid2d::cluster::worker;

fn main() -> ExitCode {
    // only the global subscriber is needed, the app is never run
    App::new().add_plugins(LogPlugin::default());

    let Some(addr) = std::env::args().nth(1) else {
        eprintln!("usage: sph-worker <coordinator-addr>");
        return ExitCode::from(2);
    };

    let mut transport = match TcpTransport::connect(addr.as_str()) {
        Ok(t) => t,
        Err(e) => {
            error!("could not reach coordinator at {addr}: {e}");
            return ExitCode::FAILURE;
        }
    };
    info!("connected to {}", transport.peer());

    match worker::serve(&mut transport) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("worker stopped: {e}");
            ExitCode::FAILURE
        }
    }
}
