//! Wire protocol and connection plumbing.
//!
//! This crate carries Medley messages between two connected peers:
//!
//! - [`MedleyMessage`]: the wire protocol (postcard-serialized), covering
//!   both replication rounds and the pairing handshake.
//! - [`Channel`]: a length-prefixed message channel over any ordered byte
//!   stream, split into independently owned read and write halves.
//! - [`Discovery`]: how two peers sharing a topic find each other. The
//!   in-memory implementation backs tests; the TCP one backs the daemon.
//!
//! Encryption and peer authentication are the stream's job; the channel
//! assumes the bytes it reads were written by the connected peer.

mod channel;
mod discovery;
mod error;
mod message;

pub use channel::{Channel, FrameReader, FrameWriter, MAX_MESSAGE_SIZE, PeerStream};
pub use discovery::{Discovery, MemoryDiscovery, TcpDiscovery, connect_tcp};
pub use error::NetError;
pub use message::{MedleyMessage, RejectReason};
