//! Local-eval sandbox: a persistent interpreter subprocess driven over
//! JSON lines on stdio.
//!
//! Variables persist in the driver's namespace across executions within
//! one sandbox incarnation; replacing the sandbox (manager reconfigure)
//! starts a fresh namespace. The subprocess inherits the host process
//! environment, so env-var injection is a no-op for this variant.

use std::{
    process::Stdio,
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
    time::Duration,
};

use {
    async_trait::async_trait,
    tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines},
        process::{Child, ChildStdin, ChildStdout, Command},
        sync::Mutex,
    },
    tracing::{debug, info, warn},
};

use crate::types::{ExecutionResult, Sandbox, SandboxVariant, ToolCaller};

/// Driver program run inside `python3 -u -c`. Reads one JSON request per
/// line, executes in a shared namespace, answers one JSON line.
const DRIVER: &str = r#"
import sys, json, io, contextlib
ns = {}
for line in sys.stdin:
    line = line.strip()
    if not line:
        continue
    try:
        req = json.loads(line)
    except Exception:
        continue
    out = {"id": req.get("id"), "ok": True, "output": "", "error": None}
    op = req.get("op", "exec")
    if op == "set":
        try:
            ns[req["name"]] = json.loads(req["value"])
        except Exception as e:
            out["ok"] = False
            out["error"] = "%s: %s" % (type(e).__name__, e)
    elif op == "exec":
        buf = io.StringIO()
        try:
            with contextlib.redirect_stdout(buf), contextlib.redirect_stderr(buf):
                exec(req.get("code", ""), ns)
        except Exception as e:
            out["ok"] = False
            out["error"] = "%s: %s" % (type(e).__name__, e)
        out["output"] = buf.getvalue()
    print(json.dumps(out), flush=True)
"#;

const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(120);

struct Driver {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

/// Sandbox executing code in a persistent local interpreter subprocess.
pub struct LocalEvalSandbox {
    sandbox_id: String,
    interpreter: String,
    driver: Mutex<Option<Driver>>,
    tool_caller: Mutex<Option<ToolCaller>>,
    executing: AtomicBool,
    next_id: AtomicU64,
}

impl Default for LocalEvalSandbox {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalEvalSandbox {
    pub fn new() -> Self {
        Self::with_interpreter("python3")
    }

    /// Use a different interpreter binary (tests).
    pub fn with_interpreter(interpreter: &str) -> Self {
        Self {
            sandbox_id: format!("local-eval-{}", uuid::Uuid::new_v4()),
            interpreter: interpreter.into(),
            driver: Mutex::new(None),
            tool_caller: Mutex::new(None),
            executing: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        }
    }

    async fn ensure_driver(&self) -> anyhow::Result<()> {
        let mut guard = self.driver.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        info!(interpreter = %self.interpreter, "starting local-eval driver");
        let mut child = Command::new(&self.interpreter)
            .arg("-u")
            .arg("-c")
            .arg(DRIVER)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow::anyhow!("failed to capture driver stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow::anyhow!("failed to capture driver stdout"))?;

        *guard = Some(Driver {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        });
        Ok(())
    }

    /// Send one request to the driver and wait for its answer.
    async fn round_trip(
        &self,
        request: serde_json::Value,
        timeout: Duration,
    ) -> ExecutionResult {
        if let Err(e) = self.ensure_driver().await {
            return ExecutionResult::infra_error(format!("failed to start sandbox: {e}"));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut request = request;
        request["id"] = serde_json::json!(id);
        let mut payload = request.to_string();
        payload.push('\n');

        self.executing.store(true, Ordering::SeqCst);
        let result = self.round_trip_inner(&payload, id, timeout).await;
        self.executing.store(false, Ordering::SeqCst);
        result
    }

    async fn round_trip_inner(
        &self,
        payload: &str,
        id: u64,
        timeout: Duration,
    ) -> ExecutionResult {
        let mut guard = self.driver.lock().await;
        let Some(driver) = guard.as_mut() else {
            return ExecutionResult::infra_error("sandbox driver not running");
        };

        if let Err(e) = driver.stdin.write_all(payload.as_bytes()).await {
            *guard = None;
            return ExecutionResult::infra_error(format!("sandbox driver write failed: {e}"));
        }
        if let Err(e) = driver.stdin.flush().await {
            *guard = None;
            return ExecutionResult::infra_error(format!("sandbox driver flush failed: {e}"));
        }

        let read = async {
            loop {
                match driver.stdout.next_line().await {
                    Ok(Some(line)) => {
                        let Ok(resp) = serde_json::from_str::<serde_json::Value>(&line) else {
                            debug!(line = %line, "driver emitted non-JSON line");
                            continue;
                        };
                        if resp["id"] == serde_json::json!(id) {
                            return Ok(resp);
                        }
                        debug!(line = %line, "driver answered a stale request id");
                    },
                    Ok(None) => return Err("sandbox driver exited".to_string()),
                    Err(e) => return Err(format!("sandbox driver read failed: {e}")),
                }
            }
        };

        match tokio::time::timeout(timeout, read).await {
            Ok(Ok(resp)) => {
                let ok = resp["ok"].as_bool().unwrap_or(false);
                let output = resp["output"].as_str().unwrap_or_default().to_string();
                let error = resp["error"].as_str().map(str::to_string);
                if ok {
                    ExecutionResult::success(output)
                } else {
                    ExecutionResult::code_error(output, error.unwrap_or_else(|| "error".into()))
                }
            },
            Ok(Err(infra)) => {
                *guard = None;
                ExecutionResult::infra_error(infra)
            },
            Err(_) => ExecutionResult::code_error(
                String::new(),
                format!("execution timed out after {}s", timeout.as_secs()),
            ),
        }
    }
}

#[async_trait]
impl Sandbox for LocalEvalSandbox {
    fn variant(&self) -> SandboxVariant {
        SandboxVariant::LocalEval
    }

    fn sandbox_id(&self) -> String {
        self.sandbox_id.clone()
    }

    async fn start(&self) -> anyhow::Result<()> {
        self.ensure_driver().await
    }

    async fn stop(&self) {
        let mut guard = self.driver.lock().await;
        if let Some(mut driver) = guard.take() {
            let _ = driver.child.kill().await;
            info!(sandbox = %self.sandbox_id, "stopped local-eval sandbox");
        }
    }

    async fn run_code(&self, code: &str, timeout: Option<Duration>) -> ExecutionResult {
        self.round_trip(
            serde_json::json!({"op": "exec", "code": code}),
            timeout.unwrap_or(DEFAULT_EXEC_TIMEOUT),
        )
        .await
    }

    async fn set_variable(&self, name: &str, value: &serde_json::Value) -> ExecutionResult {
        self.round_trip(
            serde_json::json!({"op": "set", "name": name, "value": value.to_string()}),
            DEFAULT_EXEC_TIMEOUT,
        )
        .await
    }

    async fn install_packages(
        &self,
        packages: &[String],
        timeout: Option<Duration>,
    ) -> ExecutionResult {
        if packages.is_empty() {
            return ExecutionResult::success("");
        }
        // pip runs as its own subprocess so a long install never wedges
        // the driver loop.
        let mut cmd = Command::new(&self.interpreter);
        cmd.arg("-m").arg("pip").arg("install").args(packages);
        let run = async {
            match cmd.output().await {
                Ok(output) if output.status.success() => {
                    ExecutionResult::success(String::from_utf8_lossy(&output.stdout).to_string())
                },
                Ok(output) => ExecutionResult::code_error(
                    String::from_utf8_lossy(&output.stdout).to_string(),
                    String::from_utf8_lossy(&output.stderr).to_string(),
                ),
                Err(e) => ExecutionResult::infra_error(format!("pip failed to run: {e}")),
            }
        };
        match tokio::time::timeout(timeout.unwrap_or(Duration::from_secs(600)), run).await {
            Ok(result) => result,
            Err(_) => ExecutionResult::code_error(String::new(), "package install timed out"),
        }
    }

    async fn register_tool_caller(&self, caller: ToolCaller) {
        *self.tool_caller.lock().await = Some(caller);
    }

    fn is_executing(&self) -> bool {
        self.executing.load(Ordering::SeqCst)
    }

    async fn interrupt(&self) -> bool {
        // The driver executes synchronously; there is nothing to signal
        // without killing the namespace.
        warn!(sandbox = %self.sandbox_id, "interrupt not supported for local-eval");
        false
    }

    fn has_capability(&self, name: &str) -> bool {
        matches!(name, "process_env")
    }
}
