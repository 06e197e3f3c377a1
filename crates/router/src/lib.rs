pub mod handler;
pub mod router;

pub use handler::{handler_fn, sync_handler, CapabilityHandler, FnHandler, HandlerContext, SyncFnHandler};
pub use router::{panic_message, CapabilityCallResult, CapabilityRouter, RoutingEntry, RoutingTable};
