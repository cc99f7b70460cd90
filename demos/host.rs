//! Example Host
//!
//! Launches a copy of itself as the target process. The child finds the
//! session in its environment, sends a ping and a few telemetry blocks,
//! then exits; the host prints what arrived.
//!
//! Run with `cargo run --example host`; set `RUST_LOG=debug` for the
//! session lifecycle.

use std::process::Command;
use venom_probe::{
    AgentSession, Exchange, MessageHandler, Persistence, Result, SessionConfig, SessionManager,
    CHANNEL_CAPACITY,
};

const AGENT_FLAG: &str = "--agent";
const PING: u32 = 1;

struct PingHandler {
    messages: u64,
}

impl MessageHandler for PingHandler {
    fn read_size(&self) -> usize {
        8
    }

    fn standard_message(&mut self, kind: u32, exchange: &mut Exchange<'_>) -> Result<usize> {
        self.messages += 1;
        println!(
            "[Host] Message kind {}: {}",
            kind,
            String::from_utf8_lossy(exchange.body())
        );
        let reply: &[u8] = if kind == PING { b"pong" } else { b"????" };
        exchange.buffer_mut()[..reply.len()].copy_from_slice(reply);
        Ok(reply.len())
    }

    fn complete(&mut self) {
        println!("[Host] Telemetry complete after {} messages", self.messages);
    }
}

#[derive(Default)]
struct CountingSink {
    blocks: u64,
    bytes: u64,
}

impl Persistence for CountingSink {
    fn save_block(&mut self, block: &[u8]) {
        self.blocks += 1;
        self.bytes += block.len() as u64;
    }

    fn finish(&mut self) {
        println!("[Host] Persisted {} blocks ({} bytes)", self.blocks, self.bytes);
    }
}

fn run_agent() -> venom_probe::Result<()> {
    let mut agent = AgentSession::from_env(&SessionConfig::default())?;
    println!("[Agent] Attached to session {}", agent.key());

    let mut reply = [0u8; 4];
    agent.send_message(PING, b"ping", &mut reply)?;
    println!("[Agent] Reply: {}", String::from_utf8_lossy(&reply));

    for i in 0..3u8 {
        agent.send_telemetry(&vec![i; CHANNEL_CAPACITY])?;
    }
    println!("[Agent] Sent 3 telemetry blocks, exiting");
    Ok(())
}

fn main() {
    venom_probe::init_tracing();

    if std::env::args().any(|a| a == AGENT_FLAG) {
        if let Err(e) = run_agent() {
            eprintln!("[Agent] Failed: {}", e);
            std::process::exit(1);
        }
        return;
    }

    let exe = match std::env::current_exe() {
        Ok(exe) => exe,
        Err(e) => {
            eprintln!("[Host] Cannot locate own executable: {}", e);
            std::process::exit(1);
        }
    };

    let mut manager = SessionManager::new(
        SessionConfig::default(),
        PingHandler { messages: 0 },
        CountingSink::default(),
    );

    let result = manager.establish_session(move |inject| {
        let mut cmd = Command::new(exe);
        cmd.arg(AGENT_FLAG);
        inject.inject_command(&mut cmd);
        match cmd.status() {
            Ok(status) => println!("[Host] Target exited: {}", status),
            Err(e) => eprintln!("[Host] Failed to start target: {}", e),
        }
    });

    match result {
        Ok(report) => println!(
            "[Host] Session {} done: {} messages, {} telemetry blocks",
            report.key, report.stats.control_messages, report.stats.telemetry_blocks
        ),
        Err(e) => {
            eprintln!("[Host] Session failed: {}", e);
            std::process::exit(1);
        }
    }
}
