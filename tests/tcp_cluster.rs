use std::net::TcpListener;
use std::thread;

use glam::Vec2;
use sph_fluid2d::cluster::transport::TcpTransport;
use sph_fluid2d::cluster::worker;
use sph_fluid2d::cpu::sph2d::ParticleState;
use sph_fluid2d::spawn::grid_layout;
use sph_fluid2d::{DistributedBackend, InteractionInput, SimulationBackend, SimulationSettings};

#[test]
fn workers_over_loopback_match_serial() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let workers: Vec<_> = (0..2)
        .map(|_| {
            thread::spawn(move || {
                let mut transport = TcpTransport::connect(addr).unwrap();
                worker::serve(&mut transport)
            })
        })
        .collect();

    let mut backend = DistributedBackend::accept(&listener, 2).unwrap();
    assert_eq!(backend.workers(), 2);

    let params = SimulationSettings::default().step_params(1.0 / 180.0, &InteractionInput::default());
    let mut serial = ParticleState::from_positions(grid_layout(250, 0.12, Vec2::new(4.0, 3.0)));
    let mut distributed = serial.clone();
    for _ in 0..2 {
        serial.step(&params);
    }
    backend.run_steps(&mut distributed, &params, 2).unwrap();

    assert_eq!(distributed.positions, serial.positions);
    assert_eq!(distributed.velocities, serial.velocities);

    backend.shutdown().unwrap();
    for handle in workers {
        handle.join().unwrap().unwrap();
    }
}

#[test]
fn worker_exits_when_coordinator_goes_away() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = thread::spawn(move || {
        let mut transport = TcpTransport::connect(addr).unwrap();
        worker::serve(&mut transport)
    });
    let (stream, _) = listener.accept().unwrap();
    drop(stream);

    assert!(handle.join().unwrap().is_err());
}
