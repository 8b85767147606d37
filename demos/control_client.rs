//! Minimal control client for shell-init.
//!
//! Run with: cargo run --example control_client -- <socket> <command> [service]
//!
//! Examples:
//!   control_client $XDG_RUNTIME_DIR/shell-init.sock service.list
//!   control_client $XDG_RUNTIME_DIR/shell-init.sock service.restart panel
//!   control_client $XDG_RUNTIME_DIR/shell-init.sock bus.subscribe stdout.panel
//!
//! `bus.subscribe` prints forwarded output until interrupted.

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;

use shell_init::protocol::{BusEvent, Request};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!("usage: {} <socket> <command> [service|prefix]", args[0]);
        std::process::exit(2);
    }

    let mut stream = UnixStream::connect(&args[1])?;
    let command = args[2].as_str();

    let mut request = Request::new(command);
    if let Some(arg) = args.get(3) {
        let key = if command == "bus.subscribe" { "prefix" } else { "service" };
        request = request.with_param(key, arg.as_str());
    }

    send(&mut stream, &serde_json::to_vec(&request)?)?;
    let response: serde_json::Value = serde_json::from_slice(&receive(&mut stream)?)?;
    println!("{}", serde_json::to_string_pretty(&response)?);

    if command == "bus.subscribe" && response["success"] == true {
        loop {
            let event: BusEvent = serde_json::from_slice(&receive(&mut stream)?)?;
            print!("[{}] {}", event.topic, event.data);
        }
    }

    Ok(())
}

fn send(stream: &mut UnixStream, payload: &[u8]) -> std::io::Result<()> {
    stream.write_all(&(payload.len() as u32).to_be_bytes())?;
    stream.write_all(payload)?;
    stream.flush()
}

fn receive(stream: &mut UnixStream) -> std::io::Result<Vec<u8>> {
    let mut len = [0u8; 4];
    stream.read_exact(&mut len)?;
    let mut payload = vec![0u8; u32::from_be_bytes(len) as usize];
    stream.read_exact(&mut payload)?;
    Ok(payload)
}
