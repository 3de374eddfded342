//! Python subprocess runtime.
//!
//! Each run starts a fresh isolated interpreter (`-I`, empty environment,
//! throwaway working directory) running a small harness. The harness and the
//! host exchange newline-delimited JSON: the host sends the code, the harness
//! sends `tool_call` requests and finally a `result` or `error`. The plan's
//! `print` output goes to stderr so it cannot corrupt the protocol.

use super::{SandboxFault, SandboxRuntime, ToolBridge};
use async_trait::async_trait;
use cortex_config::SandboxConfig;
use serde::Deserialize;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tracing::debug;

const HARNESS: &str = r#"
import asyncio, builtins, json, sys, types

_out = sys.stdout
_in = sys.stdin
sys.stdout = sys.stderr


def _send(msg):
    _out.write(json.dumps(msg) + "\n")
    _out.flush()


class ToolError(Exception):
    pass


def _wrap(value):
    if isinstance(value, dict):
        return types.SimpleNamespace(**{k: _wrap(v) for k, v in value.items()})
    if isinstance(value, list):
        return [_wrap(v) for v in value]
    return value


class _Mcp:
    async def call_tool(self, name, arguments=None):
        _send({"type": "tool_call", "name": name, "input": {} if arguments is None else arguments})
        line = _in.readline()
        if not line:
            raise ConnectionError("host closed the tool channel")
        reply = json.loads(line)
        if not reply.get("ok"):
            raise ToolError(reply.get("error", "tool call failed"))
        return _wrap(reply.get("payload"))


def _main():
    boot = json.loads(_in.readline())
    allowed = set(boot.get("allowed_modules", []))
    real_import = builtins.__import__

    def guarded_import(name, globals=None, locals=None, fromlist=(), level=0):
        if level != 0 or name.split(".")[0] not in allowed:
            raise ImportError("import of '%s' is not allowed" % name)
        return real_import(name, globals, locals, fromlist, level)

    safe = dict(vars(builtins))
    for banned in ("open", "input", "breakpoint", "exit", "quit", "help", "compile", "eval", "exec"):
        safe.pop(banned, None)
    safe["__import__"] = guarded_import

    namespace = {"__builtins__": safe, "__name__": "solution", "mcp": _Mcp(), "ToolError": ToolError}
    try:
        exec(boot["code"], namespace)
        solve = namespace.get("solve")
        if not callable(solve):
            raise NameError("solve() is not defined")
        result = solve()
        if asyncio.iscoroutine(result):
            result = asyncio.run(result)
    except BaseException as exc:
        _send({"type": "error", "message": "%s: %s" % (type(exc).__name__, exc)})
        return
    _send({"type": "result", "value": "None" if result is None else str(result)})


_main()
"#;

/// How much of the interpreter's stderr is kept for error reports.
const STDERR_TAIL: usize = 2000;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum HarnessMessage {
    ToolCall {
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    Result {
        value: String,
    },
    Error {
        message: String,
    },
}

pub struct PythonRuntime {
    interpreter: String,
    allowed_modules: Vec<String>,
}

impl PythonRuntime {
    pub fn new(interpreter: impl Into<String>, allowed_modules: Vec<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
            allowed_modules,
        }
    }

    pub fn from_config(config: &SandboxConfig) -> Self {
        Self::new(config.interpreter.clone(), config.allowed_modules.clone())
    }
}

async fn send_line(stdin: &mut ChildStdin, value: &serde_json::Value) -> Result<(), SandboxFault> {
    let mut line = value.to_string();
    line.push('\n');
    stdin
        .write_all(line.as_bytes())
        .await
        .map_err(|e| SandboxFault::Protocol(format!("write to sandbox failed: {e}")))?;
    stdin
        .flush()
        .await
        .map_err(|e| SandboxFault::Protocol(format!("write to sandbox failed: {e}")))
}

fn tail(text: &str) -> String {
    let total = text.chars().count();
    text.chars().skip(total.saturating_sub(STDERR_TAIL)).collect::<String>().trim().to_string()
}

#[async_trait]
impl SandboxRuntime for PythonRuntime {
    fn name(&self) -> &str {
        "python"
    }

    async fn run(&self, code: &str, bridge: &mut dyn ToolBridge) -> Result<String, SandboxFault> {
        let workdir = tempfile::tempdir().map_err(|e| SandboxFault::Spawn(e.to_string()))?;

        let mut child = Command::new(&self.interpreter)
            .arg("-I")
            .arg("-c")
            .arg(HARNESS)
            .env_clear()
            .env("PATH", std::env::var("PATH").unwrap_or_default())
            .env("PYTHONIOENCODING", "utf-8")
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .current_dir(workdir.path())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SandboxFault::Spawn(format!("{}: {e}", self.interpreter)))?;

        let (Some(mut stdin), Some(stdout), Some(mut stderr)) = (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(SandboxFault::Spawn("sandbox pipes unavailable".into()));
        };

        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf).await;
            String::from_utf8_lossy(&buf).into_owned()
        });

        send_line(
            &mut stdin,
            &serde_json::json!({ "code": code, "allowed_modules": self.allowed_modules }),
        )
        .await?;

        let mut lines = BufReader::new(stdout).lines();
        let result = loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    let stderr = tokio::time::timeout(Duration::from_secs(1), stderr_task)
                        .await
                        .ok()
                        .and_then(|r| r.ok())
                        .unwrap_or_default();
                    let _ = child.wait().await;
                    return Err(SandboxFault::Raised(format!(
                        "sandbox exited without a result: {}",
                        tail(&stderr)
                    )));
                }
                Err(e) => break Err(SandboxFault::Protocol(e.to_string())),
            };
            if line.trim().is_empty() {
                continue;
            }

            let message: HarnessMessage = match serde_json::from_str(&line) {
                Ok(m) => m,
                Err(e) => break Err(SandboxFault::Protocol(format!("unreadable message: {e}"))),
            };

            match message {
                HarnessMessage::ToolCall { name, input } => {
                    debug!(tool = %name, "Sandbox requested a tool call");
                    let reply = match bridge.call_tool(&name, input).await {
                        Ok(payload) => serde_json::json!({ "ok": true, "payload": payload }),
                        Err(failure) if failure.is_fatal() => break Err(SandboxFault::Aborted(failure)),
                        Err(failure) => serde_json::json!({ "ok": false, "error": failure.to_string() }),
                    };
                    if let Err(e) = send_line(&mut stdin, &reply).await {
                        break Err(e);
                    }
                }
                HarnessMessage::Result { value } => break Ok(value),
                HarnessMessage::Error { message } => break Err(SandboxFault::Raised(message)),
            }
        };

        let _ = child.start_kill();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_core::outcome::{ToolFailure, ToolFailureKind};
    use cortex_core::tool::text_payload;

    fn python_available() -> bool {
        std::process::Command::new("python3")
            .arg("--version")
            .output()
            .is_ok_and(|o| o.status.success())
    }

    fn runtime() -> PythonRuntime {
        PythonRuntime::from_config(&SandboxConfig::default())
    }

    /// Answers `search` with a fixed text; `limit` refuses like a spent budget.
    #[derive(Default)]
    struct TestBridge {
        calls: Vec<String>,
    }

    #[async_trait]
    impl ToolBridge for TestBridge {
        async fn call_tool(&mut self, name: &str, input: serde_json::Value) -> Result<serde_json::Value, ToolFailure> {
            self.calls.push(name.to_string());
            match name {
                "search" => Ok(text_payload(format!("found {}", input["q"].as_str().unwrap_or("")))),
                "limit" => Err(ToolFailure::new(ToolFailureKind::BudgetExceeded, name, "spent")),
                _ => Err(ToolFailure::new(ToolFailureKind::NotFound, name, "unknown")),
            }
        }
    }

    #[tokio::test]
    async fn returns_solve_value() {
        if !python_available() {
            return;
        }
        let mut bridge = TestBridge::default();
        let value = runtime()
            .run("async def solve():\n    return 'FINAL_ANSWER: 7'", &mut bridge)
            .await
            .unwrap();
        assert_eq!(value, "FINAL_ANSWER: 7");
    }

    #[tokio::test]
    async fn tool_results_are_attribute_accessible() {
        if !python_available() {
            return;
        }
        let code = "import json\n\nasync def solve():\n    r = await mcp.call_tool('search', {'q': 'X'})\n    print('debug output')\n    return 'FURTHER_PROCESSING_REQUIRED: ' + r.content[0].text";
        let mut bridge = TestBridge::default();
        let value = runtime().run(code, &mut bridge).await.unwrap();
        assert_eq!(value, "FURTHER_PROCESSING_REQUIRED: found X");
        assert_eq!(bridge.calls, vec!["search"]);
    }

    #[tokio::test]
    async fn tool_failure_raises_in_python() {
        if !python_available() {
            return;
        }
        let code = "async def solve():\n    try:\n        await mcp.call_tool('nope', {})\n    except ToolError as e:\n        return 'FINAL_ANSWER: caught ' + str(e)";
        let mut bridge = TestBridge::default();
        let value = runtime().run(code, &mut bridge).await.unwrap();
        assert!(value.starts_with("FINAL_ANSWER: caught tool 'nope'"));
    }

    #[tokio::test]
    async fn fatal_failure_aborts_run() {
        if !python_available() {
            return;
        }
        let code = "async def solve():\n    try:\n        await mcp.call_tool('limit', {})\n    except Exception:\n        pass\n    return 'FINAL_ANSWER: ignored'";
        let mut bridge = TestBridge::default();
        let fault = runtime().run(code, &mut bridge).await.unwrap_err();
        assert!(matches!(fault, SandboxFault::Aborted(f) if f.kind == ToolFailureKind::BudgetExceeded));
    }

    #[tokio::test]
    async fn disallowed_import_is_raised() {
        if !python_available() {
            return;
        }
        let mut bridge = TestBridge::default();
        let fault = runtime()
            .run("import os\n\ndef solve():\n    return 'FINAL_ANSWER: x'", &mut bridge)
            .await
            .unwrap_err();
        match fault {
            SandboxFault::Raised(message) => assert!(message.contains("ImportError")),
            other => panic!("expected raised import error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn open_is_unavailable() {
        if !python_available() {
            return;
        }
        let mut bridge = TestBridge::default();
        let fault = runtime()
            .run("def solve():\n    return open('/etc/passwd').read()", &mut bridge)
            .await
            .unwrap_err();
        assert!(matches!(fault, SandboxFault::Raised(m) if m.contains("NameError")));
    }

    #[tokio::test]
    async fn missing_interpreter_is_spawn_error() {
        let runtime = PythonRuntime::new("definitely-not-a-python-binary", vec![]);
        let mut bridge = TestBridge::default();
        let fault = runtime.run("def solve():\n    pass", &mut bridge).await.unwrap_err();
        assert!(matches!(fault, SandboxFault::Spawn(_)));
    }
}
