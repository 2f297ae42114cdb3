//! The `Sandbox` seam behind `run_command`/`run_javascript` (§4.7) — a narrow,
//! swappable trait in the same spirit as the rest of this crate's external
//! capabilities (storage, artifacts), rather than this module mandating a
//! specific subprocess or scripting engine.

use std::time::Duration;

use async_trait::async_trait;
use rquickjs::{Context, Runtime};
use tokio::process::Command;

use super::ToolError;

const MAX_CODE_LEN: usize = 20_000;
const MAX_RESULT_LEN: usize = 20_000;

#[async_trait]
pub trait Sandbox: Send + Sync {
    async fn run_command(&self, command: &str, timeout_ms: u64) -> Result<String, ToolError>;
    async fn run_javascript(&self, code: &str, input: Option<&str>) -> Result<String, ToolError>;
}

/// `tokio::process::Command`-backed command execution, and a QuickJS-backed
/// JS sandbox. Shipped as the crate's only reference `Sandbox`.
pub struct ProcessSandbox;

impl ProcessSandbox {
    pub fn new() -> Self {
        ProcessSandbox
    }
}

impl Default for ProcessSandbox {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sandbox for ProcessSandbox {
    async fn run_command(&self, command: &str, timeout_ms: u64) -> Result<String, ToolError> {
        let timeout = Duration::from_millis(if timeout_ms == 0 { 60_000 } else { timeout_ms });
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| ToolError::ToolExecutionFailed(e.to_string()))?;

        let output = tokio::time::timeout(timeout, child.wait_with_output()).await;
        match output {
            Ok(Ok(output)) => {
                let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
                if !output.stderr.is_empty() {
                    combined.push_str("\n--- stderr ---\n");
                    combined.push_str(&String::from_utf8_lossy(&output.stderr));
                }
                if combined.len() > MAX_RESULT_LEN {
                    combined.truncate(MAX_RESULT_LEN);
                }
                Ok(combined)
            }
            Ok(Err(e)) => Err(ToolError::ToolExecutionFailed(e.to_string())),
            Err(_) => Err(ToolError::ToolExecutionFailed(format!(
                "command timed out after {}ms",
                timeout.as_millis()
            ))),
        }
    }

    /// Evaluates `code` inside a fresh QuickJS runtime and context discarded
    /// after the call; nothing is carried over between invocations and no
    /// host bindings are exposed beyond `input` and the JS standard library.
    /// The body runs on a blocking thread since `rquickjs`'s `Runtime`/`Context`
    /// are not `Send` across an `.await` point.
    async fn run_javascript(&self, code: &str, input: Option<&str>) -> Result<String, ToolError> {
        if code.len() > MAX_CODE_LEN {
            return Err(ToolError::CodeTooLarge(code.len()));
        }
        let code = code.to_string();
        let input = input.map(|s| s.to_string());
        let mut result = tokio::task::spawn_blocking(move || eval_js(&code, input.as_deref()))
            .await
            .map_err(|e| ToolError::ToolExecutionFailed(e.to_string()))??;
        if result.len() > MAX_RESULT_LEN {
            result.truncate(MAX_RESULT_LEN);
        }
        Ok(result)
    }
}

/// Wraps `code` as a function body taking `input`, JSON-encodes its return
/// value inside the script itself, and evaluates the whole thing as a single
/// expression — sidesteps needing a Rust-side JSON bridge for arbitrary
/// return shapes.
fn eval_js(code: &str, input: Option<&str>) -> Result<String, ToolError> {
    let runtime = Runtime::new().map_err(|e| ToolError::JsExecutionFailed(e.to_string()))?;
    let context = Context::full(&runtime).map_err(|e| ToolError::JsExecutionFailed(e.to_string()))?;
    let input_literal = serde_json::to_string(&input).unwrap_or_else(|_| "null".to_string());
    let wrapped = format!(
        "(function(input) {{ const __result = (function() {{\n{}\n}})(); return JSON.stringify(__result === undefined ? null : __result); }})({})",
        code, input_literal
    );
    context.with(|ctx| {
        ctx.eval::<String, _>(wrapped.into_bytes())
            .map_err(|e| ToolError::JsExecutionFailed(e.to_string()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_javascript_evaluates_and_returns_json() {
        let sandbox = ProcessSandbox::new();
        let result = sandbox.run_javascript("return 1 + 2;", None).await.unwrap();
        assert_eq!(result, "3");
    }

    #[tokio::test]
    async fn run_javascript_sees_the_input_argument() {
        let sandbox = ProcessSandbox::new();
        let result = sandbox
            .run_javascript("return input.toUpperCase();", Some("hi"))
            .await
            .unwrap();
        assert_eq!(result, "\"HI\"");
    }

    #[tokio::test]
    async fn run_javascript_has_no_process_or_filesystem_access() {
        let sandbox = ProcessSandbox::new();
        let err = sandbox
            .run_javascript("return typeof process;", None)
            .await
            .unwrap();
        assert_eq!(err, "\"undefined\"");
    }

    #[tokio::test]
    async fn run_javascript_reports_syntax_errors() {
        let sandbox = ProcessSandbox::new();
        let err = sandbox.run_javascript("return (", None).await.unwrap_err();
        assert!(matches!(err, ToolError::JsExecutionFailed(_)));
    }

    #[tokio::test]
    async fn run_javascript_rejects_oversized_code() {
        let sandbox = ProcessSandbox::new();
        let code = "x".repeat(MAX_CODE_LEN + 1);
        let err = sandbox.run_javascript(&code, None).await.unwrap_err();
        assert!(matches!(err, ToolError::CodeTooLarge(_)));
    }
}
