//! Sandboxed script execution
//!
//! `javascript` tools run in a child interpreter process, never in the
//! gateway's address space. The child gets:
//!
//! - an empty environment apart from `PATH`
//! - a fresh temporary working directory, removed afterwards
//! - the payload (`code`, `args`, `credentials`) on stdin
//!
//! A small harness evaluates the source inside an isolated `vm` context with
//! string code generation disabled. The user code sees `args`,
//! `credentials` and the template helpers. Host bindings such as `require`
//! and `process` are shadowed as `undefined`. The harness reports one JSON
//! line, `{"ok":true,"value":...}` or `{"ok":false,"error":"..."}`.
//!
//! Two clocks bound a call. `call_timeout` is what the caller waits for.
//! `hard_limit` is when the child is killed, even if nobody is waiting.

use super::{HandlerError, ToolHandler, output_text};
use crate::config::ScriptSettings;
use crate::model::{CredentialSet, ToolDefinition, ToolHandlerSpec};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Value, json};
use std::process::Stdio;
use std::sync::LazyLock;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

const HARNESS_FILE: &str = "harness.js";

const HARNESS: &str = r#"'use strict';
const vm = require('vm');

function emit(result) {
  process.stdout.write('\n' + JSON.stringify(result) + '\n');
}

function describe(err) {
  if (err && typeof err.message === 'string') return err.message;
  return String(err);
}

const PRELUDE = `
(function () {
  const __p = JSON.parse(__payload);
  const uuid = () => 'xxxxxxxx-xxxx-4xxx-yxxx-xxxxxxxxxxxx'.replace(/[xy]/g, (c) => {
    const r = (Math.random() * 16) | 0;
    return (c === 'x' ? r : (r & 0x3) | 0x8).toString(16);
  });
  const now = () => new Date().toISOString();
  const timestamp = () => Date.now();
  const random_int = (min, max) => {
    min = Math.ceil(min); max = Math.floor(max);
    if (min > max) throw new RangeError('random_int requires min <= max');
    return Math.floor(Math.random() * (max - min + 1)) + min;
  };
  const random_float = (min, max) => {
    if (min > max) throw new RangeError('random_float requires min <= max');
    return min === max ? min : Math.random() * (max - min) + min;
  };
  return (async function (args, credentials, uuid, now, timestamp, random_int, random_float,
                          require, process, globalThis, global, module, Buffer, fetch) {
`;

const EPILOGUE = `
  })(__p.args, __p.credentials, uuid, now, timestamp, random_int, random_float);
})()`;

let input = '';
process.stdin.setEncoding('utf8');
process.stdin.on('data', (chunk) => { input += chunk; });
process.stdin.on('end', async () => {
  let payload;
  try {
    payload = JSON.parse(input);
  } catch (err) {
    emit({ ok: false, error: 'invalid payload: ' + describe(err) });
    return;
  }

  const sandbox = Object.create(null);
  sandbox.__payload = JSON.stringify({ args: payload.args, credentials: payload.credentials });
  const context = vm.createContext(sandbox, {
    codeGeneration: { strings: false, wasm: false },
  });

  try {
    const script = new vm.Script(PRELUDE + payload.code + EPILOGUE, { filename: 'tool.js' });
    const value = await script.runInContext(context, { timeout: payload.timeout_ms });
    emit({ ok: true, value: value === undefined ? null : value });
  } catch (err) {
    emit({ ok: false, error: describe(err) });
  }
});
"#;

static DENYLIST: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\b(require|process|child_process|eval|globalThis|Deno|Bun)\b",
        r"\bFunction\s*\(",
        r"\bimport\s*\(",
        r"\bspawn\w*\s*\(",
        r"\bexec(Sync|File|FileSync)\b",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("valid regex"))
    .collect()
});

/// First denylisted token in `code`, if any.
///
/// This is a compatibility check for sources written against older
/// gateways. Isolation comes from the child process and the `vm` context.
pub fn find_forbidden_token(code: &str) -> Option<String> {
    DENYLIST
        .iter()
        .find_map(|re| re.find(code))
        .map(|m| m.as_str().to_string())
}

/// Line reported by the harness
#[derive(Debug, Deserialize)]
struct HarnessReport {
    ok: bool,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ScriptHandler {
    settings: ScriptSettings,
}

impl ScriptHandler {
    pub fn new(settings: ScriptSettings) -> Self {
        Self { settings }
    }
}

impl Default for ScriptHandler {
    fn default() -> Self {
        Self::new(ScriptSettings::default())
    }
}

async fn run_script(settings: ScriptSettings, payload: Value) -> Result<Value, HandlerError> {
    let workdir = tempfile::tempdir()
        .map_err(|e| HandlerError::Internal(format!("script workdir: {}", e)))?;
    let harness = workdir.path().join(HARNESS_FILE);
    tokio::fs::write(&harness, HARNESS)
        .await
        .map_err(|e| HandlerError::Internal(format!("script harness: {}", e)))?;

    let mut command = Command::new(&settings.runtime);
    command
        .args(&settings.runtime_args)
        .arg(&harness)
        .current_dir(workdir.path())
        .env_clear()
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(path) = std::env::var_os("PATH") {
        command.env("PATH", path);
    }

    let mut child = command.spawn().map_err(|e| {
        HandlerError::Script(format!(
            "failed to start {}: {}",
            settings.runtime.display(),
            e
        ))
    })?;

    if let Some(mut stdin) = child.stdin.take() {
        let bytes = serde_json::to_vec(&payload)
            .map_err(|e| HandlerError::Internal(e.to_string()))?;
        stdin
            .write_all(&bytes)
            .await
            .map_err(|e| HandlerError::Script(format!("failed to send payload: {}", e)))?;
    }

    // Dropping the child on timeout kills it.
    let output = match tokio::time::timeout(settings.hard_limit, child.wait_with_output()).await {
        Ok(result) => result.map_err(|e| HandlerError::Script(e.to_string()))?,
        Err(_) => {
            warn!(limit = ?settings.hard_limit, "script process killed at hard limit");
            return Err(HandlerError::Script(format!(
                "killed after {:?}",
                settings.hard_limit
            )));
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let report = stdout
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .and_then(|line| serde_json::from_str::<HarnessReport>(line).ok());

    match report {
        Some(HarnessReport { ok: true, value, .. }) => Ok(value),
        Some(HarnessReport { error, .. }) => Err(HandlerError::Script(
            error.unwrap_or_else(|| "unknown failure".to_string()),
        )),
        None => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(HandlerError::Script(format!(
                "runtime exited with {}: {}",
                output.status,
                stderr.trim()
            )))
        }
    }
}

#[async_trait]
impl ToolHandler for ScriptHandler {
    fn kind(&self) -> &'static str {
        "javascript"
    }

    async fn execute(
        &self,
        tool: &ToolDefinition,
        arguments: &Value,
        credentials: &CredentialSet,
    ) -> Result<String, HandlerError> {
        let ToolHandlerSpec::Javascript { code } = &tool.handler else {
            return Err(HandlerError::Mismatch {
                handler: self.kind(),
                kind: tool.handler.kind(),
            });
        };

        if self.settings.enforce_denylist {
            if let Some(token) = find_forbidden_token(code) {
                debug!(tool = %tool.name, token = %token, "script rejected");
                return Err(HandlerError::ScriptRejected(token));
            }
        }

        let payload = json!({
            "code": code,
            "args": arguments,
            "credentials": credentials,
            "timeout_ms": self.settings.hard_limit.as_millis() as u64,
        });

        let task = tokio::spawn(run_script(self.settings.clone(), payload));
        match tokio::time::timeout(self.settings.call_timeout, task).await {
            Ok(Ok(result)) => result.map(|value| output_text(&value)),
            Ok(Err(join_err)) => Err(HandlerError::Internal(join_err.to_string())),
            Err(_) => Err(HandlerError::Timeout {
                tool: tool.name.clone(),
                after: self.settings.call_timeout,
            }),
        }
    }
}
