//! # nioloop-balance: Front facade / reverse forwarder
//!
//! Two reactor groups glued together: the public group accepts client
//! connections, the backend group owns one outbound connection per client.
//! Bytes read on either side are queued as flush events on the other, so
//! each direction keeps its order without any copying between threads
//! beyond the single `Bytes` handed across.
//!
//! ```text
//!   client ──► public core ──Flush──► backend core ──► backend
//!   client ◄── public core ◄──Flush── backend core ◄── backend
//! ```
//!
//! Closing either side closes its peer once pending bytes are written.

pub mod config;
pub mod facade;
pub mod forward;

pub use config::FacadeConfig;
pub use facade::FrontFacade;
pub use forward::ForwardInbound;
