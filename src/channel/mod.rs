//! Channels connecting pipeline components.
//!
//! - [`mpmc`]: bounded multi-producer, multi-consumer channel with
//!   cancel-aware send and receive

pub mod mpmc;

pub use mpmc::{
    Receiver, RecvError, RecvFuture, SendError, SendFuture, Sender, TryRecvError, TrySendError,
    channel,
};
