// relay-rpc: schema-free bidirectional RPC over hibernating connections.
//
// Facade crate: re-exports the protocol, server and client halves under
// one roof for applications that embed both.

pub use relay_client as client;
pub use relay_protocol as protocol;
pub use relay_server as server;
