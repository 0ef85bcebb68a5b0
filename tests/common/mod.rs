//! In-process stand-in for the natasha control channel.

#![allow(dead_code)]

use natasha_exporter::config::TargetConfig;
use natasha_exporter::protocol::codec::{encode_records, ReplyHeader, WireRecord};
use natasha_exporter::protocol::Command;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub const TEST_TIMEOUT: Duration = Duration::from_millis(500);

/// A complete reply (header and payload) for a payload.
pub fn reply(payload: &[u8]) -> Vec<u8> {
    let mut bytes = ReplyHeader::new(0, payload.len() as u32).encode().to_vec();
    bytes.extend_from_slice(payload);
    bytes
}

pub fn records<R: WireRecord>(records: &[R]) -> Vec<u8> {
    reply(&encode_records(records))
}

/// Raw bytes the peer answers each command with.
#[derive(Debug, Clone)]
pub struct Replies {
    pub version: Vec<u8>,
    pub dpdk: Vec<u8>,
    pub app: Vec<u8>,
    pub cpu: Vec<u8>,
    /// Hang up right after answering this command.
    pub close_on: Option<Command>,
    /// Drop every odd-numbered session without answering.
    pub hang_up_odd_sessions: bool,
    /// Send replies one byte at a time with this pause before each byte.
    pub trickle: Option<Duration>,
}

impl Default for Replies {
    fn default() -> Self {
        Self {
            version: reply(b"natasha 1.0.0"),
            dpdk: reply(&[]),
            app: reply(&[]),
            cpu: reply(&[]),
            close_on: None,
            hang_up_odd_sessions: false,
            trickle: None,
        }
    }
}

pub struct SimulatedPeer {
    pub address: String,
    /// Sessions seen so far.
    pub sessions: Arc<AtomicUsize>,
    /// Highest number of scrape cycles in flight at once.
    pub max_active: Arc<AtomicUsize>,
}

impl SimulatedPeer {
    pub fn start(replies: Replies) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let sessions = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));
        let active = Arc::new(AtomicUsize::new(0));

        let peer = Self {
            address,
            sessions: sessions.clone(),
            max_active: max_active.clone(),
        };

        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { continue };
                let session = sessions.fetch_add(1, Ordering::SeqCst);
                if replies.hang_up_odd_sessions && session % 2 == 1 {
                    drop(stream);
                    continue;
                }
                let replies = replies.clone();
                let active = active.clone();
                let max_active = max_active.clone();
                thread::spawn(move || serve(stream, &replies, &active, &max_active));
            }
        });

        peer
    }

    /// Accepts connections and never answers.
    pub fn stalled() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let sessions = Arc::new(AtomicUsize::new(0));

        let counter = sessions.clone();
        thread::spawn(move || {
            let mut held = Vec::new();
            for stream in listener.incoming() {
                counter.fetch_add(1, Ordering::SeqCst);
                held.push(stream);
            }
        });

        Self {
            address,
            sessions,
            max_active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn target(&self) -> TargetConfig {
        TargetConfig {
            address: self.address.clone(),
            timeout: TEST_TIMEOUT,
        }
    }
}

/// Address nothing listens on.
pub fn unreachable_target() -> TargetConfig {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);

    TargetConfig {
        address,
        timeout: TEST_TIMEOUT,
    }
}

fn serve(mut stream: TcpStream, replies: &Replies, active: &AtomicUsize, max_active: &AtomicUsize) {
    let mut code = [0u8; 1];
    while stream.read_exact(&mut code).is_ok() {
        let Some(cmd) = Command::from_code(code[0]) else {
            return;
        };

        let bytes = match cmd {
            Command::Version => {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_active.fetch_max(now, Ordering::SeqCst);
                &replies.version
            }
            Command::DpdkStats => &replies.dpdk,
            Command::AppStats => &replies.app,
            Command::CpuUsage => {
                // the cycle is over once the exporter reads this reply
                active.fetch_sub(1, Ordering::SeqCst);
                &replies.cpu
            }
        };

        let sent = match replies.trickle {
            Some(pause) => bytes.iter().try_for_each(|byte| {
                thread::sleep(pause);
                stream.write_all(std::slice::from_ref(byte))
            }),
            None => stream.write_all(bytes),
        };
        if sent.is_err() {
            return;
        }
        if replies.close_on == Some(cmd) {
            return;
        }
    }
}
