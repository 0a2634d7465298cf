//! Process entry point: parse the simulator's invocation contract, bind a
//! socket, and run one [`Replica`] until it hits a fatal error.

mod codec;
mod replica;
mod store;
mod term_state;
mod timers;

use std::collections::HashSet;
use std::net::{Ipv4Addr, UdpSocket};
use std::process;

use clap::Parser;
use log::error;

use replica::Replica;

/// `program <port> <id> <other_id_1> <other_id_2> ...`, matching the
/// simulator's launch contract (`networks/launch.py` in the source this
/// replicates).
#[derive(Parser, Debug)]
#[command(name = "kvraft", about = "Single-threaded Raft replica for a replicated key-value store")]
struct Config {
    /// UDP port the simulator listens on for this replica's datagrams.
    simulator_port: u16,
    /// This replica's id.
    this_id: String,
    /// Every other replica's id, in any order.
    #[arg(required = true)]
    other_ids: Vec<String>,
}

fn main() {
    env_logger::init();
    let config = Config::parse();

    let socket = match UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)) {
        Ok(socket) => socket,
        Err(e) => {
            error!("{}: failed to bind UDP socket: {}", config.this_id, e);
            process::exit(1);
        }
    };

    let other_ids: HashSet<String> = config.other_ids.into_iter().collect();
    let mut replica = Replica::new(config.this_id, other_ids, config.simulator_port, socket);

    if let Err(e) = replica.initialize_simulator() {
        error!("{}: failed to send initial hello: {}", replica.ctx.this_id, e);
        process::exit(1);
    }

    if let Err(e) = replica.run() {
        error!("{}: exiting after fatal error: {}", replica.ctx.this_id, e);
        process::exit(1);
    }
}
