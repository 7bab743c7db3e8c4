/// Agent side of the control-server link
///
/// The agent keeps one WebSocket session to the control server, announces
/// itself, reports status on a fixed period and answers server requests.
///
/// # Architecture
///
/// - **Connection**: `AgentConnection` owns the lifecycle
///   (`Disconnected -> Connecting -> Connected`), the heartbeat timer and the
///   single-slot reconnect timer. It is an event loop; nothing else mutates it.
/// - **Transport**: `Transport` opens sessions and reports `Opened`, `Message`,
///   `Closed` and `Error` events. `WsTransport` is the tokio-tungstenite one.
/// - **Dispatcher**: turns one inbound envelope into zero or one response.
/// - **Messages**: JSON envelope types defined in `messages.rs`.
///
/// # Wire protocol
///
/// The agent sends:
/// - `{"action":"auth", "cliente_id", "info"}` as soon as the session opens
/// - `{"action":"status_update", "cliente_id", "info"}` every heartbeat
/// - `{"request_id", "cliente_id", ...}` in answer to a server request
///
/// The server sends `auth_success`, `get_info`, `get_cameras`, `exec` and
/// `ping`; anything else is logged and ignored.
pub mod connection;
pub mod dispatcher;
pub mod messages;
pub mod transport;
pub mod types;

pub use connection::{AgentConnection, AgentError, AgentHandle, Event};
pub use types::{AgentSettings, ConnectionState};
