//! Cross-process message layer for the master-slave task farm.
//!
//! A launcher starts the same binary once per participant and describes
//! the communication group through environment variables: the number of
//! participants, the rank of each process, and the address where the
//! master listens. The wire format per message is a tag (`i32`, big
//! endian), a payload length (`u32`, big endian) and the payload bytes;
//! a tag at or beyond the number of registered tasks is the shutdown
//! sentinel. Master and slaves run the same binary, so no version
//! negotiation is required.

use crate::error::{Error, Result};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Environment variable holding the number of participants.
pub const ENV_SIZE: &str = "DUSTRT_FARM_SIZE";
/// Environment variable holding the rank of this process.
pub const ENV_RANK: &str = "DUSTRT_FARM_RANK";
/// Environment variable holding the `host:port` the master listens on.
pub const ENV_ADDRESS: &str = "DUSTRT_FARM_ADDRESS";

/// A message received from another participant.
pub struct Message {
    /// Rank of the sending participant.
    pub source: usize,
    /// Task tag carried by the message.
    pub tag: i32,
    /// Serialized payload.
    pub payload: Vec<u8>,
}

fn io_err(err: &std::io::Error) -> Error {
    Error::Farm(format!("message layer I/O failure: {err}"))
}

fn write_message(stream: &mut TcpStream, tag: i32, payload: &[u8]) -> Result<()> {
    let len = u32::try_from(payload.len())
        .map_err(|_| Error::Farm("message payload too long for the wire format".to_owned()))?;
    stream.write_all(&tag.to_be_bytes()).map_err(|e| io_err(&e))?;
    stream.write_all(&len.to_be_bytes()).map_err(|e| io_err(&e))?;
    stream.write_all(payload).map_err(|e| io_err(&e))?;
    stream.flush().map_err(|e| io_err(&e))?;
    Ok(())
}

fn read_message(stream: &mut TcpStream) -> Result<(i32, Vec<u8>)> {
    let mut header = [0u8; 8];
    stream.read_exact(&mut header).map_err(|e| io_err(&e))?;
    let tag = i32::from_be_bytes(header[..4].try_into().expect("4 bytes"));
    let len = u32::from_be_bytes(header[4..].try_into().expect("4 bytes")) as usize;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).map_err(|e| io_err(&e))?;
    Ok((tag, payload))
}

/// The process-wide communication group. On the master, a reader thread
/// per slave forwards incoming messages into a single queue so that
/// receives from any source are a simple blocking pop.
pub struct MessageLayer {
    rank: usize,
    size: usize,
    /// Outgoing streams: on the master one per slave rank (entry 0
    /// unused), on a slave a single stream to the master at entry 0.
    streams: Vec<Option<Mutex<TcpStream>>>,
    /// Incoming message queue fed by the reader threads (master only).
    inbox: Option<Mutex<Receiver<Message>>>,
}

impl MessageLayer {
    /// Establishes the communication group: the master listens for
    /// `size − 1` slave connections, each slave connects and identifies
    /// itself with its rank.
    ///
    /// # Errors
    ///
    /// Returns a farm error when the group cannot be established.
    pub fn connect(rank: usize, size: usize, address: &str) -> Result<Arc<Self>> {
        if size < 2 || rank >= size {
            return Err(Error::Farm(format!(
                "invalid communication group: rank {rank} of {size}"
            )));
        }
        if rank == 0 {
            let listener = TcpListener::bind(address).map_err(|e| io_err(&e))?;
            let mut streams: Vec<Option<Mutex<TcpStream>>> =
                (0..size).map(|_| None).collect();
            let (sender, receiver) = channel();
            for _ in 1..size {
                let (mut stream, _) = listener.accept().map_err(|e| io_err(&e))?;
                let mut handshake = [0u8; 4];
                stream.read_exact(&mut handshake).map_err(|e| io_err(&e))?;
                let peer = u32::from_be_bytes(handshake) as usize;
                if peer == 0 || peer >= size || streams[peer].is_some() {
                    return Err(Error::Farm(format!(
                        "unexpected handshake from rank {peer}"
                    )));
                }
                let reader = stream.try_clone().map_err(|e| io_err(&e))?;
                spawn_reader(peer, reader, sender.clone());
                streams[peer] = Some(Mutex::new(stream));
            }
            Ok(Arc::new(Self {
                rank,
                size,
                streams,
                inbox: Some(Mutex::new(receiver)),
            }))
        } else {
            // the master may come up after the slaves; retry for a while
            let mut stream = None;
            for _ in 0..100 {
                match TcpStream::connect(address) {
                    Ok(connected) => {
                        stream = Some(connected);
                        break;
                    }
                    Err(_) => std::thread::sleep(Duration::from_millis(100)),
                }
            }
            let mut stream = stream.ok_or_else(|| {
                Error::Farm(format!("could not reach the master at {address}"))
            })?;
            stream
                .write_all(&u32::try_from(rank).expect("small rank").to_be_bytes())
                .map_err(|e| io_err(&e))?;
            let mut streams: Vec<Option<Mutex<TcpStream>>> =
                (0..size).map(|_| None).collect();
            streams[0] = Some(Mutex::new(stream));
            Ok(Arc::new(Self {
                rank,
                size,
                streams,
                inbox: None,
            }))
        }
    }

    /// Returns the rank of this process within the group.
    #[must_use]
    pub const fn rank(&self) -> usize {
        self.rank
    }

    /// Returns the number of participants in the group.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Sends a tagged payload to the participant with the given rank.
    ///
    /// # Errors
    ///
    /// Returns a farm error on a wire failure or an unknown destination.
    pub fn send(&self, destination: usize, tag: i32, payload: &[u8]) -> Result<()> {
        let stream = self
            .streams
            .get(destination)
            .and_then(Option::as_ref)
            .ok_or_else(|| Error::Farm(format!("no connection to rank {destination}")))?;
        write_message(&mut stream.lock().expect("stream mutex"), tag, payload)
    }

    /// Receives the next message from any slave. Only valid on the
    /// master.
    ///
    /// # Errors
    ///
    /// Returns a farm error when the queue is closed or this process is
    /// not the master.
    pub fn receive_any(&self) -> Result<Message> {
        let inbox = self
            .inbox
            .as_ref()
            .ok_or_else(|| Error::Farm("only the master receives from any source".to_owned()))?;
        inbox
            .lock()
            .expect("inbox mutex")
            .recv()
            .map_err(|_| Error::Farm("all slave connections closed".to_owned()))
    }

    /// Receives the next message from the master. Only valid on a slave.
    ///
    /// # Errors
    ///
    /// Returns a farm error on a wire failure or when called on the
    /// master.
    pub fn receive_from_master(&self) -> Result<(i32, Vec<u8>)> {
        if self.rank == 0 {
            return Err(Error::Farm(
                "the master does not receive from itself".to_owned(),
            ));
        }
        let stream = self.streams[0]
            .as_ref()
            .expect("slave holds a master connection");
        read_message(&mut stream.lock().expect("stream mutex"))
    }
}

fn spawn_reader(source: usize, mut stream: TcpStream, sender: Sender<Message>) {
    std::thread::spawn(move || {
        while let Ok((tag, payload)) = read_message(&mut stream) {
            if sender
                .send(Message {
                    source,
                    tag,
                    payload,
                })
                .is_err()
            {
                break;
            }
        }
    });
}

/// Scoped acquisition of the process-wide message context. Constructed
/// once at program start; when the environment does not describe a
/// multi-process group, the context is empty and the farm operates in
/// local mode.
pub struct MessageContext {
    layer: Option<Arc<MessageLayer>>,
}

impl MessageContext {
    /// Initializes the message layer from the environment.
    ///
    /// # Errors
    ///
    /// Returns a farm error when the environment describes a group that
    /// cannot be joined.
    pub fn initialize() -> Result<Self> {
        let size: usize = match std::env::var(ENV_SIZE).ok().and_then(|v| v.parse().ok()) {
            Some(size) if size > 1 => size,
            _ => return Ok(Self { layer: None }),
        };
        let rank: usize = std::env::var(ENV_RANK)
            .ok()
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| Error::Farm(format!("{ENV_RANK} is not set to a valid rank")))?;
        let address = std::env::var(ENV_ADDRESS)
            .map_err(|_| Error::Farm(format!("{ENV_ADDRESS} is not set")))?;
        Ok(Self {
            layer: Some(MessageLayer::connect(rank, size, &address)?),
        })
    }

    /// Constructs an empty context for single-process operation.
    #[must_use]
    pub const fn local() -> Self {
        Self { layer: None }
    }

    /// Returns the message layer, if the process participates in a
    /// multi-process group.
    #[must_use]
    pub fn layer(&self) -> Option<&Arc<MessageLayer>> {
        self.layer.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_to_point_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let slave_address = address.clone();
        let slave = std::thread::spawn(move || {
            let layer = MessageLayer::connect(1, 2, &slave_address).unwrap();
            let (tag, payload) = layer.receive_from_master().unwrap();
            assert_eq!(tag, 3);
            layer.send(0, tag, &payload).unwrap();
        });

        let master = MessageLayer::connect(0, 2, &address).unwrap();
        master.send(1, 3, b"hello").unwrap();
        let message = master.receive_any().unwrap();
        assert_eq!(message.source, 1);
        assert_eq!(message.tag, 3);
        assert_eq!(message.payload, b"hello");
        slave.join().unwrap();
    }

    #[test]
    fn empty_environment_yields_local_context() {
        let context = MessageContext::local();
        assert!(context.layer().is_none());
    }
}
