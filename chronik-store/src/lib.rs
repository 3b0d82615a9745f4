#![forbid(unsafe_code)]

mod codec;
mod engine;
mod error;
mod event;
mod iterator;
mod lock;
mod matcher;
mod quote;
mod store;
mod strategy;
mod stream;

pub use codec::*;
pub use engine::*;
pub use error::*;
pub use event::*;
pub use iterator::*;
pub use lock::*;
pub use matcher::*;
pub use quote::*;
pub use store::*;
pub use strategy::*;
pub use stream::*;
