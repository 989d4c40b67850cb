//! The memory interface: request/response routing, controller timing
//! models, and per-op traffic statistics.

/// `MemoryController` trait plus the `Simple`/`Dram` backends, and the
/// byte-addressable `Backing` storage they front.
pub mod controller;
/// Routes requests to backings, applies them, and classifies traffic.
pub mod interface;
/// Request/response shapes and traffic classification.
pub mod request;

pub use controller::{Backing, DramController, MemoryController, SimpleController};
pub use interface::MemoryInterface;
pub use request::{classify, is_noncacheable, Locality, OpKind, Request, Response};
