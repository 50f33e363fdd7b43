//! # nioloop-core: Trait definitions for nioloop
//!
//! This crate defines the trait boundaries for every axis of variability
//! in the reactor. Each trait models one capability dimension:
//!
//! | Trait              | Default impl (nioloop-module) |
//! |--------------------|-------------------------------|
//! | `Selector`         | `EpollSelector`               |
//! | `Notifier`         | `EventFdNotifier`             |
//! | `BufferProvider`   | `SizeClassPool`               |
//! | `WorkerPool`       | `FixedPool`                   |
//! | `ProtocolDecoder`  | `LengthFieldCodec`            |
//! | `ProtocolEncoder`  | `LengthFieldCodec`            |
//!
//! ## Design principle
//!
//! > "Program to the interface. Start safe. Optimize with a new impl,
//! >  not by modifying the existing one."
//!
//! The event loop in `nioloop-executor` depends on these traits only, so a
//! test can drive it with a scripted selector or an inline worker pool.

pub mod buffer;
pub mod config;
pub mod env;
pub mod error;
pub mod notifier;
pub mod protocol;
pub mod selector;
pub mod worker;

pub use buffer::{BufferProvider, PooledBuf, Recycle};
pub use config::ReactorConfig;
pub use env::{env_get, env_get_bool, env_get_opt};
pub use error::{NioError, Rejection, Result};
pub use notifier::Notifier;
pub use protocol::{Frame, FrameAccumulator, FrameHeader, ProtocolDecoder, ProtocolEncoder};
pub use selector::{Interest, Readiness, SelectOutcome, Selector, Token, WAKE_TOKEN};
pub use worker::{Task, WorkerPool};
