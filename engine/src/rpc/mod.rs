//! JSON-RPC 2.0 plumbing shared by client and server.

mod message;
mod method;
mod peer;
mod registry;

pub use message::{
    next_call_id, Message, Request, RequestId, Response, RpcError, CALL_TIMEOUT, HANDLER_ERROR,
    JSONRPC_VERSION, METHOD_NOT_FOUND, PARSE_ERROR,
};
pub use method::Method;
pub use peer::{FrameSink, PendingCall, RpcConfig, RpcPeer, DEFAULT_CALL_TIMEOUT};
pub use registry::{BoxError, Handlers, HandlerFn, Inbound, ListenerFn, ListenerId, Listeners};
