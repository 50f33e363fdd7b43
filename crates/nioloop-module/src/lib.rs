//! # nioloop-module: Default (safe) implementations
//!
//! This crate provides the default implementation for every nioloop trait.
//! Each impl prioritizes correctness and simplicity over performance.
//!
//! ## Default stack
//!
//! | Trait            | Default Impl       | Alternative               |
//! |------------------|--------------------|---------------------------|
//! | Selector         | EpollSelector      | scripted selectors (tests)|
//! | Notifier         | EventFdNotifier    | -                         |
//! | BufferProvider   | SizeClassPool      | -                         |
//! | WorkerPool       | FixedPool          | InlinePool (tests)        |
//! | ProtocolDecoder  | LengthFieldCodec   | any fixed-header codec    |
//! | ProtocolEncoder  | LengthFieldCodec   | any fixed-header codec    |

pub mod connect;
pub mod epoll_selector;
pub mod eventfd_notifier;
pub mod fixed_pool;
pub mod length_codec;
pub mod size_class_pool;

pub use connect::connect_nonblocking;
pub use epoll_selector::EpollSelector;
pub use eventfd_notifier::EventFdNotifier;
pub use fixed_pool::{FixedPool, InlinePool};
pub use length_codec::LengthFieldCodec;
pub use size_class_pool::SizeClassPool;
