//! A UDP-based reliable messaging transport: bit-level wire codec, a per-connection handshake and
//! RTT/MTU state machine, five message-delivery channels (spec §4.D), fragmentation of oversize
//! messages, an optional encryption hook, and a single-threaded peer scheduler that drives it all
//! over one listening socket.

pub mod bits;
pub mod channel;
pub mod config;
pub mod connection;
pub mod crypto;
pub mod discovery;
pub mod fragment;
pub mod frame;
pub mod message;
pub mod peer;

pub use config::{Config, ConfigBuilder, ConfigError, UnreliableSizeBehaviour};
pub use connection::{Connection, ConnectionError, Status};
pub use crypto::{Cipher, NullCipher};
pub use message::{DeliveryMethod, IncomingKind, IncomingMessage, MessageType, OutgoingMessage};
pub use peer::{command_channel, inbound_channel, Command, Peer, PeerHandle};
