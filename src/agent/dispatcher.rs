use futures_util::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use super::messages::{Envelope, Response, ResponsePayload, ResultAction};
use crate::runner::{arp_command, CommandRunner};
use crate::telemetry::Telemetry;

/// Outcome of handling one inbound message
pub enum Dispatch {
    /// Nothing to send back
    Ignore,
    /// Send right away
    Reply(Response),
    /// Resolves once the command finishes; the caller decides whether it can still be sent
    Deferred(BoxFuture<'static, Response>),
}

impl std::fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dispatch::Ignore => f.write_str("Ignore"),
            Dispatch::Reply(response) => f.debug_tuple("Reply").field(response).finish(),
            Dispatch::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

/// Routes server requests to handlers and shapes the responses
#[derive(Clone)]
pub struct Dispatcher {
    client_id: String,
    telemetry: Arc<dyn Telemetry>,
    runner: Arc<dyn CommandRunner>,
    exec_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        client_id: String,
        telemetry: Arc<dyn Telemetry>,
        runner: Arc<dyn CommandRunner>,
        exec_timeout: Duration,
    ) -> Self {
        Self {
            client_id,
            telemetry,
            runner,
            exec_timeout,
        }
    }

    /// Parse and route one raw text frame. Malformed input is logged and ignored.
    pub fn dispatch(&self, text: &str) -> Dispatch {
        let envelope: Envelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                log::error!("[Agent] Failed to process message: {}", e);
                return Dispatch::Ignore;
            }
        };

        log::info!("[Agent] Message received: {}", envelope.label());
        self.route(envelope)
    }

    pub fn route(&self, envelope: Envelope) -> Dispatch {
        let request_id = envelope.request_id;

        match envelope.action.as_deref() {
            Some("auth_success") => {
                log::info!("[Agent] Authentication succeeded");
                Dispatch::Ignore
            }
            Some("get_info") => Dispatch::Reply(self.respond(
                request_id,
                ResponsePayload::Info {
                    info: self.telemetry.snapshot(),
                },
            )),
            Some("get_cameras") => self.cameras(request_id),
            Some("exec") => self.exec(request_id, envelope.command),
            Some("ping") => Dispatch::Reply(self.respond(
                request_id,
                ResponsePayload::Pong {
                    pong: true,
                    timestamp: chrono::Utc::now().timestamp_millis(),
                },
            )),
            other => {
                log::warn!("[Agent] Unknown action: {}", other.unwrap_or("<none>"));
                Dispatch::Ignore
            }
        }
    }

    fn respond(&self, request_id: Option<Value>, payload: ResponsePayload) -> Response {
        Response::new(request_id, &self.client_id, payload)
    }

    fn cameras(&self, request_id: Option<Value>) -> Dispatch {
        let runner = Arc::clone(&self.runner);
        let client_id = self.client_id.clone();

        Dispatch::Deferred(Box::pin(async move {
            let output = runner.run(arp_command().to_string(), None).await;
            let error = output.error_message();
            Response::new(
                request_id,
                &client_id,
                ResponsePayload::Cameras {
                    action: ResultAction::CamerasResult,
                    arp_table: output.stdout,
                    error,
                },
            )
        }))
    }

    fn exec(&self, request_id: Option<Value>, command: Option<Value>) -> Dispatch {
        let command = match command {
            Some(Value::String(command)) => command,
            _ => {
                log::warn!("[Agent] exec request without a command string");
                return Dispatch::Reply(self.respond(
                    request_id,
                    ResponsePayload::Exec {
                        action: ResultAction::ExecResult,
                        success: false,
                        stdout: String::new(),
                        stderr: String::new(),
                        error: Some("missing command".to_string()),
                    },
                ));
            }
        };

        log::info!("[Agent] Executing command: {}", command);

        let runner = Arc::clone(&self.runner);
        let client_id = self.client_id.clone();
        let timeout = self.exec_timeout;

        Dispatch::Deferred(Box::pin(async move {
            let output = runner.run(command, Some(timeout)).await;
            let error = output.error_message();
            Response::new(
                request_id,
                &client_id,
                ResponsePayload::Exec {
                    action: ResultAction::ExecResult,
                    success: error.is_none(),
                    stdout: output.stdout,
                    stderr: output.stderr,
                    error,
                },
            )
        }))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::agent::types::SystemInfo;
    use crate::runner::{CommandOutput, ShellRunner};
    use serde_json::json;
    use std::sync::Mutex;

    pub(crate) struct FixedTelemetry;

    impl Telemetry for FixedTelemetry {
        fn snapshot(&self) -> SystemInfo {
            SystemInfo {
                hostname: "edge-01".to_string(),
                platform: "linux".to_string(),
                arch: "x86_64".to_string(),
                cpus: 2,
                memory_total: "4 GB".to_string(),
                memory_free: "1.5 GB".to_string(),
                uptime: "3 hours".to_string(),
                network: vec![],
                timestamp: 42,
            }
        }
    }

    /// Records invocations and answers with a canned output
    #[derive(Default)]
    pub(crate) struct RecordingRunner {
        pub calls: Mutex<Vec<(String, Option<Duration>)>>,
        pub output: CommandOutput,
    }

    impl CommandRunner for RecordingRunner {
        fn run(&self, command: String, timeout: Option<Duration>) -> BoxFuture<'static, CommandOutput> {
            self.calls.lock().unwrap().push((command, timeout));
            let output = self.output.clone();
            Box::pin(async move { output })
        }
    }

    fn dispatcher_with(runner: Arc<dyn CommandRunner>, exec_timeout: Duration) -> Dispatcher {
        Dispatcher::new("acme".to_string(), Arc::new(FixedTelemetry), runner, exec_timeout)
    }

    async fn resolve(dispatch: Dispatch) -> Option<Response> {
        match dispatch {
            Dispatch::Ignore => None,
            Dispatch::Reply(response) => Some(response),
            Dispatch::Deferred(future) => Some(future.await),
        }
    }

    fn to_json(response: &Response) -> Value {
        serde_json::to_value(response).unwrap()
    }

    #[tokio::test]
    async fn test_ping_echoes_request_id_and_timestamp() {
        let dispatcher = dispatcher_with(Arc::new(RecordingRunner::default()), Duration::from_secs(30));
        let before = chrono::Utc::now().timestamp_millis();

        let response = resolve(dispatcher.dispatch(r#"{"action":"ping","request_id":"r-1"}"#))
            .await
            .unwrap();
        let value = to_json(&response);

        assert_eq!(value["request_id"], "r-1");
        assert_eq!(value["cliente_id"], "acme");
        assert_eq!(value["pong"], true);
        assert!(value["timestamp"].as_i64().unwrap() >= before);
    }

    #[tokio::test]
    async fn test_request_id_echoed_verbatim_for_any_json_type() {
        let dispatcher = dispatcher_with(Arc::new(RecordingRunner::default()), Duration::from_secs(30));

        for id in [json!(17), json!("abc"), json!({"n": 1})] {
            let text = json!({"action": "get_info", "request_id": id.clone()}).to_string();
            let response = resolve(dispatcher.dispatch(&text)).await.unwrap();
            assert_eq!(response.request_id, Some(id));
        }
    }

    #[tokio::test]
    async fn test_null_request_id_is_echoed_as_null() {
        let dispatcher = dispatcher_with(Arc::new(RecordingRunner::default()), Duration::from_secs(30));

        let response = resolve(dispatcher.dispatch(r#"{"action":"ping","request_id":null}"#))
            .await
            .unwrap();
        let value = to_json(&response);

        assert_eq!(value.get("request_id"), Some(&Value::Null));
        assert_eq!(value["pong"], true);
    }

    #[tokio::test]
    async fn test_get_info_returns_snapshot() {
        let dispatcher = dispatcher_with(Arc::new(RecordingRunner::default()), Duration::from_secs(30));

        let response = resolve(dispatcher.dispatch(r#"{"action":"get_info","request_id":"x"}"#))
            .await
            .unwrap();
        let value = to_json(&response);

        assert_eq!(value["info"]["hostname"], "edge-01");
        assert!(value.get("action").is_none());
    }

    #[tokio::test]
    async fn test_auth_success_and_unknown_produce_nothing() {
        let dispatcher = dispatcher_with(Arc::new(RecordingRunner::default()), Duration::from_secs(30));

        assert!(matches!(dispatcher.dispatch(r#"{"action":"auth_success"}"#), Dispatch::Ignore));
        assert!(matches!(
            dispatcher.dispatch(r#"{"action":"reboot","request_id":"r"}"#),
            Dispatch::Ignore
        ));
        assert!(matches!(dispatcher.dispatch(r#"{"request_id":"r"}"#), Dispatch::Ignore));
    }

    #[tokio::test]
    async fn test_malformed_json_is_ignored() {
        let dispatcher = dispatcher_with(Arc::new(RecordingRunner::default()), Duration::from_secs(30));

        assert!(matches!(dispatcher.dispatch("not json {"), Dispatch::Ignore));
        assert!(matches!(dispatcher.dispatch("[1,2,3]"), Dispatch::Ignore));
        assert!(matches!(dispatcher.dispatch(""), Dispatch::Ignore));
    }

    #[tokio::test]
    async fn test_get_cameras_runs_arp_without_timeout() {
        let runner = Arc::new(RecordingRunner {
            output: CommandOutput {
                stdout: "? (192.168.0.10) at 00:11:22:33:44:55".to_string(),
                ..Default::default()
            },
            ..Default::default()
        });
        let dispatcher = dispatcher_with(runner.clone(), Duration::from_secs(30));

        let response = resolve(dispatcher.dispatch(r#"{"action":"get_cameras","request_id":9}"#))
            .await
            .unwrap();
        let value = to_json(&response);

        assert_eq!(value["action"], "cameras_result");
        assert_eq!(value["request_id"], 9);
        assert!(value["arp_table"].as_str().unwrap().contains("192.168.0.10"));
        assert!(value["error"].is_null());

        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls.as_slice(), &[(arp_command().to_string(), None)]);
    }

    #[tokio::test]
    async fn test_exec_passes_configured_timeout() {
        let runner = Arc::new(RecordingRunner::default());
        let dispatcher = dispatcher_with(runner.clone(), Duration::from_secs(30));

        let response = resolve(dispatcher.dispatch(r#"{"action":"exec","command":"uptime","request_id":"e"}"#))
            .await
            .unwrap();

        assert_eq!(to_json(&response)["success"], true);
        let calls = runner.calls.lock().unwrap();
        assert_eq!(
            calls.as_slice(),
            &[("uptime".to_string(), Some(Duration::from_secs(30)))]
        );
    }

    #[tokio::test]
    async fn test_exec_without_command_reports_failure() {
        let runner = Arc::new(RecordingRunner::default());
        let dispatcher = dispatcher_with(runner.clone(), Duration::from_secs(30));

        let response = resolve(dispatcher.dispatch(r#"{"action":"exec","request_id":"e"}"#))
            .await
            .unwrap();
        let value = to_json(&response);

        assert_eq!(value["success"], false);
        assert_eq!(value["error"], "missing command");
        assert!(runner.calls.lock().unwrap().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exec_success_with_shell() {
        let dispatcher = dispatcher_with(Arc::new(ShellRunner::new()), Duration::from_secs(30));

        let response = resolve(dispatcher.dispatch(
            r#"{"action":"exec","command":"echo field-ok","request_id":"e1"}"#,
        ))
        .await
        .unwrap();
        let value = to_json(&response);

        assert_eq!(value["action"], "exec_result");
        assert_eq!(value["request_id"], "e1");
        assert_eq!(value["success"], true);
        assert!(value["error"].is_null());
        assert!(value["stdout"].as_str().unwrap().contains("field-ok"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exec_timeout_with_shell() {
        let dispatcher = dispatcher_with(Arc::new(ShellRunner::new()), Duration::from_millis(200));

        let response = resolve(dispatcher.dispatch(
            r#"{"action":"exec","command":"sleep 5","request_id":"slow"}"#,
        ))
        .await
        .unwrap();
        let value = to_json(&response);

        assert_eq!(value["success"], false);
        assert!(value["error"].as_str().unwrap().contains("timed out"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exec_nonzero_exit_is_data() {
        let dispatcher = dispatcher_with(Arc::new(ShellRunner::new()), Duration::from_secs(30));

        let response = resolve(dispatcher.dispatch(
            r#"{"action":"exec","command":"echo bad >&2; exit 1","request_id":"f"}"#,
        ))
        .await
        .unwrap();
        let value = to_json(&response);

        assert_eq!(value["success"], false);
        assert_eq!(value["stderr"].as_str().unwrap().trim(), "bad");
        assert!(value["error"].as_str().unwrap().contains("exit code 1"));
    }
}
