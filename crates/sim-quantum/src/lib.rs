//! Quantum-state manager hook.
//!
//! The kernel treats quantum state as opaque: all it ever asks of a manager
//! is to flush batched remote operations at every synchronization barrier
//! and to disconnect at teardown. Sequential runs and runs with no endpoint
//! configured use the in-process [`LocalQuantumManager`]; parallel runs that
//! share state through a quantum-manager server use the
//! [`RemoteQuantumManager`] client, which batches writes between barriers.

use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::net::{Shutdown, TcpStream};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum QuantumError {
    #[error("cannot reach quantum manager at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("quantum manager i/o failed: {0}")]
    Io(#[from] io::Error),
    #[error("quantum manager used after disconnect")]
    Disconnected,
}

/// Representation used for shared quantum states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Formalism {
    #[default]
    Ket,
    Density,
}

impl Formalism {
    /// Parse the configuration tag. Unknown tags are a configuration error
    /// surfaced by the caller.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "KET" => Some(Formalism::Ket),
            "DENSITY" => Some(Formalism::Density),
            _ => None,
        }
    }

    pub fn as_tag(self) -> &'static str {
        match self {
            Formalism::Ket => "KET",
            Formalism::Density => "DENSITY",
        }
    }
}

/// A batched remote state operation. The kernel never looks inside; domain
/// code fills these in and the client ships them at the next barrier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateOp {
    pub op: String,
    pub keys: Vec<u64>,
    pub params: Vec<serde_json::Value>,
}

/// Contract the kernel holds a manager to.
///
/// `flush_message_buffer` is invoked at every synchronization barrier and is
/// a mandatory sync point: the timeline makes no further progress until it
/// returns. `disconnect_from_server` runs once at teardown.
pub trait QuantumManager: Send {
    fn formalism(&self) -> Formalism;

    fn flush_message_buffer(&mut self) -> Result<(), QuantumError>;

    fn disconnect_from_server(&mut self) -> Result<(), QuantumError>;

    /// Queue a state operation for the next flush.
    fn enqueue(&mut self, op: StateOp);

    /// Wall time spent on manager i/o, for the performance report.
    fn io_time(&self) -> Duration {
        Duration::ZERO
    }
}

/// In-process manager. Operations apply locally, so flushing has nothing to
/// ship; the call count is still tracked for diagnostics.
#[derive(Debug, Default)]
pub struct LocalQuantumManager {
    formalism: Formalism,
    pending: Vec<StateOp>,
    flushes: u64,
}

impl LocalQuantumManager {
    pub fn new(formalism: Formalism) -> Self {
        Self {
            formalism,
            pending: Vec::new(),
            flushes: 0,
        }
    }

    pub fn flushes(&self) -> u64 {
        self.flushes
    }
}

impl QuantumManager for LocalQuantumManager {
    fn formalism(&self) -> Formalism {
        self.formalism
    }

    fn flush_message_buffer(&mut self) -> Result<(), QuantumError> {
        self.flushes += 1;
        self.pending.clear();
        Ok(())
    }

    fn disconnect_from_server(&mut self) -> Result<(), QuantumError> {
        Ok(())
    }

    fn enqueue(&mut self, op: StateOp) {
        self.pending.push(op);
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientRecord<'a> {
    Hello { formalism: &'a str },
    Batch { ops: &'a [StateOp] },
    Close,
}

/// TCP client for a quantum-manager server.
///
/// Connects in the constructor, so an unreachable endpoint fails before any
/// timeline is built. Writes are batched between barriers and shipped as
/// JSON lines on flush. Retry and backoff belong to the server protocol
/// layer, not here; an i/o failure during a run is fatal to the worker.
pub struct RemoteQuantumManager {
    formalism: Formalism,
    stream: Option<TcpStream>,
    addr: String,
    pending: Vec<StateOp>,
    io_time: Duration,
}

impl RemoteQuantumManager {
    pub fn connect(formalism: Formalism, ip: &str, port: u16) -> Result<Self, QuantumError> {
        let addr = format!("{ip}:{port}");
        let tick = Instant::now();
        let mut stream = TcpStream::connect(&addr).map_err(|source| QuantumError::Connect {
            addr: addr.clone(),
            source,
        })?;
        stream.set_nodelay(true)?;
        Self::write_record(
            &mut stream,
            &ClientRecord::Hello {
                formalism: formalism.as_tag(),
            },
        )?;
        info!(target: "quantum", %addr, formalism = formalism.as_tag(), "connected to quantum manager");
        Ok(Self {
            formalism,
            stream: Some(stream),
            addr,
            pending: Vec::new(),
            io_time: tick.elapsed(),
        })
    }

    fn write_record(stream: &mut TcpStream, record: &ClientRecord<'_>) -> Result<(), QuantumError> {
        let mut line = serde_json::to_vec(record).expect("client records serialize");
        line.push(b'\n');
        stream.write_all(&line)?;
        Ok(())
    }
}

impl QuantumManager for RemoteQuantumManager {
    fn formalism(&self) -> Formalism {
        self.formalism
    }

    fn flush_message_buffer(&mut self) -> Result<(), QuantumError> {
        let stream = self.stream.as_mut().ok_or(QuantumError::Disconnected)?;
        if self.pending.is_empty() {
            return Ok(());
        }
        let tick = Instant::now();
        Self::write_record(stream, &ClientRecord::Batch { ops: &self.pending })?;
        stream.flush()?;
        debug!(target: "quantum", ops = self.pending.len(), "flushed state operations");
        self.pending.clear();
        self.io_time += tick.elapsed();
        Ok(())
    }

    fn disconnect_from_server(&mut self) -> Result<(), QuantumError> {
        let Some(mut stream) = self.stream.take() else {
            return Ok(());
        };
        let tick = Instant::now();
        Self::write_record(&mut stream, &ClientRecord::Close)?;
        stream.flush()?;
        stream.shutdown(Shutdown::Both)?;
        self.io_time += tick.elapsed();
        info!(target: "quantum", addr = %self.addr, "disconnected from quantum manager");
        Ok(())
    }

    fn enqueue(&mut self, op: StateOp) {
        self.pending.push(op);
    }

    fn io_time(&self) -> Duration {
        self.io_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};
    use std::net::TcpListener;

    #[test]
    fn formalism_tags_round_trip() {
        assert_eq!(Formalism::from_tag("KET"), Some(Formalism::Ket));
        assert_eq!(Formalism::from_tag("DENSITY"), Some(Formalism::Density));
        assert_eq!(Formalism::from_tag("STABILIZER"), None);
        assert_eq!(Formalism::default().as_tag(), "KET");
    }

    #[test]
    fn local_manager_counts_flushes() {
        let mut manager = LocalQuantumManager::new(Formalism::Ket);
        manager.enqueue(StateOp {
            op: "set".into(),
            keys: vec![1],
            params: vec![],
        });
        manager.flush_message_buffer().unwrap();
        manager.flush_message_buffer().unwrap();
        assert_eq!(manager.flushes(), 2);
    }

    #[test]
    fn unreachable_endpoint_fails_at_construction() {
        // Port 1 on localhost is essentially never listening.
        let result = RemoteQuantumManager::connect(Formalism::Ket, "127.0.0.1", 1);
        assert!(matches!(result, Err(QuantumError::Connect { .. })));
    }

    #[test]
    fn remote_client_ships_hello_batch_close() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            let (socket, _) = listener.accept().unwrap();
            let mut lines = BufReader::new(socket).lines();
            let mut records = Vec::new();
            while let Some(Ok(line)) = lines.next() {
                records.push(serde_json::from_str::<serde_json::Value>(&line).unwrap());
            }
            records
        });

        let mut client =
            RemoteQuantumManager::connect(Formalism::Density, "127.0.0.1", addr.port()).unwrap();
        client.enqueue(StateOp {
            op: "entangle".into(),
            keys: vec![3, 4],
            params: vec![],
        });
        client.flush_message_buffer().unwrap();
        client.flush_message_buffer().unwrap(); // empty: nothing shipped
        client.disconnect_from_server().unwrap();

        let records = server.join().unwrap();
        let kinds: Vec<_> = records.iter().map(|r| r["type"].as_str().unwrap().to_owned()).collect();
        assert_eq!(kinds, vec!["hello", "batch", "close"]);
        assert_eq!(records[0]["formalism"], "DENSITY");
        assert_eq!(records[1]["ops"][0]["keys"][1], 4);
    }
}
