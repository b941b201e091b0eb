// relay-test-utils: shared test harness pieces.
//
// Provides a recording mock of the host socket seam and an in-process
// server harness for integration tests.

pub mod harness;
pub mod mock_socket;

pub use harness::TestServer;
pub use mock_socket::MockSocket;
