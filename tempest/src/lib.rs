//! Host-side streaming I/O engine for networked software-defined radio
//! motherboards.
//!
//! A motherboard exposes several UDP endpoints on a fixed-rate clock: a
//! control channel, one or more DSP data channels (interleaved RX sample
//! packets and TX async status reports), and an error channel. This crate
//! implements the host half of that contract: the receive alignment buffer,
//! the per-transport scavenger workers that demultiplex data packets from
//! async status reports, the transmit packetizer, flow-control update
//! scheduling, and the VRT-style wire framing that binds it all together.
//!
//! # Architecture
//!
//! ```text
//! rx:  wire → transport → scavenger ─┬→ async fifo ──────→ recv_async_msg()
//!                                    └→ alignment buffer → recv()
//! tx:  send() → packetizer → transport → wire
//! ```
//!
//! One scavenger thread runs per data transport; foreground `recv`/`send`
//! calls never touch the wire directly on the receive side. See
//! [`stream::StreamIo`] for the pipeline and [`device::Device`] for
//! motherboard bring-up.

pub mod config;
pub mod convert;
pub mod device;
pub mod net;
pub mod stream;
pub mod sync;
pub mod time;
pub mod transport;
pub mod vrt;

mod trace;

pub use config::{DeviceOptions, MimoMode};
pub use time::TimeSpec;
pub use trace::init_tracing;
