//! Background automation
//!
//! Each channel runs up to four kinds of tasks on the shared runtime:
//! - `handshake`: publishes and republishes the channel-opening RTS
//! - `cts`: publishes the handshake-accepted reply until confirmed
//! - `fetch`: polls the receive slot sequence and dispatches payloads
//! - `ack`: publishes delayed acknowledgements from the durable ledger
//!
//! Tasks classify and handle failures locally; a failing channel retries
//! or goes dormant, it never propagates a hard failure outward. Only
//! shutdown interrupts tasks.

pub(crate) mod ack;
pub(crate) mod cts;
pub(crate) mod fetch;
pub(crate) mod handshake;
