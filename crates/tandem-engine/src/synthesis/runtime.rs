use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use tandem_core::tools::ToolError;

use super::loader::ToolArtifact;

const RESULT_SENTINEL: &str = "__TANDEM_RESULT__";
const SCRIPT_NAME: &str = "tool.py";
const MAX_STDERR_CHARS: usize = 2000;

/// Where synthesized code actually runs.
///
/// `allowed_modules` is the import allow-list the runtime must enforce on
/// the code it executes.
#[async_trait]
pub trait ToolRuntime: Send + Sync {
    async fn invoke(
        &self,
        artifact: &ToolArtifact,
        allowed_modules: &[String],
        args: Value,
        timeout: Duration,
    ) -> Result<Value, ToolError>;
}

/// Runs each call in a fresh isolated interpreter process.
///
/// The child gets a scratch directory, an empty environment apart from
/// `PATH`, and is killed on timeout. The fixed harness script reads the
/// code, entry point, allow-list and arguments as one JSON document on
/// stdin, vets the syntax tree, then executes the code against a reduced
/// set of builtins and an import hook that only hands out allowed modules.
#[derive(Clone, Debug)]
pub struct PythonRuntime {
    interpreter: String,
}

impl Default for PythonRuntime {
    fn default() -> Self {
        Self::new("python3")
    }
}

impl PythonRuntime {
    pub fn new(interpreter: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
        }
    }

    fn command(&self, workdir: &std::path::Path) -> Command {
        let mut cmd = Command::new(&self.interpreter);
        cmd.arg("-I")
            .arg(SCRIPT_NAME)
            .current_dir(workdir)
            .env_clear()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(path) = std::env::var_os("PATH") {
            cmd.env("PATH", path);
        }
        cmd
    }
}

#[async_trait]
impl ToolRuntime for PythonRuntime {
    #[instrument(skip_all, fields(function = %artifact.function_name))]
    async fn invoke(
        &self,
        artifact: &ToolArtifact,
        allowed_modules: &[String],
        args: Value,
        timeout: Duration,
    ) -> Result<Value, ToolError> {
        let workdir = tempfile::tempdir().map_err(|e| ToolError::ExecutionFailed(format!("scratch dir: {e}")))?;
        tokio::fs::write(workdir.path().join(SCRIPT_NAME), HARNESS)
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("write script: {e}")))?;

        let mut child = self
            .command(workdir.path())
            .spawn()
            .map_err(|e| ToolError::ExecutionFailed(format!("spawn {}: {e}", self.interpreter)))?;

        if let Some(mut stdin) = child.stdin.take() {
            let request = harness_input(artifact, allowed_modules, args);
            stdin
                .write_all(request.to_string().as_bytes())
                .await
                .map_err(|e| ToolError::ExecutionFailed(format!("write request: {e}")))?;
        }

        // Dropping the pending future on timeout kills the child.
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| ToolError::ExecutionFailed(format!("wait: {e}")))?,
            Err(_) => {
                warn!(timeout_secs = timeout.as_secs(), "synthesized tool timed out");
                return Err(ToolError::Timeout(timeout));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!(status = ?output.status.code(), stdout_len = stdout.len(), "tool process exited");
        parse_output(&stdout, &stderr)
    }
}

fn harness_input(artifact: &ToolArtifact, allowed_modules: &[String], args: Value) -> Value {
    json!({
        "code": artifact.code,
        "function": artifact.function_name,
        "allowed_modules": allowed_modules,
        "args": args,
    })
}

/// Fixed child script. Prints one sentinel-prefixed JSON result line.
pub(crate) const HARNESS: &str = r#"import ast
import builtins
import json
import sys
import types

SENTINEL = "__TANDEM_RESULT__"

FRAME_ATTRS = frozenset({
    "gi_frame", "gi_code", "gi_yieldfrom", "cr_frame", "cr_code", "cr_await",
    "ag_frame", "ag_code", "ag_await", "f_back", "f_globals", "f_locals",
    "f_builtins", "f_code", "tb_frame", "tb_next",
})

SAFE_BUILTINS = (
    "abs", "all", "any", "ascii", "bin", "bool", "bytearray", "bytes", "callable",
    "chr", "classmethod", "complex", "dict", "divmod", "enumerate", "filter",
    "float", "format", "frozenset", "hash", "hasattr", "hex", "int", "isinstance",
    "issubclass", "iter", "len", "list", "map", "max", "min", "next", "object",
    "oct", "ord", "pow", "print", "property", "range", "repr", "reversed", "round",
    "set", "slice", "sorted", "staticmethod", "str", "sum", "super", "tuple", "zip",
    "None", "True", "False", "NotImplemented", "Ellipsis",
    "Exception", "ArithmeticError", "AssertionError", "AttributeError",
    "IndexError", "KeyError", "LookupError", "NotImplementedError",
    "OverflowError", "RuntimeError", "StopIteration", "TypeError",
    "UnicodeError", "ValueError", "ZeroDivisionError",
)


class CapabilityDenied(Exception):
    pass


class BaseTool:
    def __init__(self, name=None, description=None, parameters=None, required=None, **kwargs):
        self.name = name
        self.description = description
        self.parameters = parameters or {}
        self.required = required or []


def module_allowed(name, allowed):
    return name.split(".")[0] in allowed


class Guard(ast.NodeVisitor):
    def __init__(self, allowed):
        self.allowed = allowed

    def visit_Attribute(self, node):
        if node.attr.startswith("_") or node.attr in FRAME_ATTRS:
            raise CapabilityDenied("attribute `%s` is not allowed" % node.attr)
        self.generic_visit(node)

    def visit_Name(self, node):
        if node.id.startswith("__"):
            raise CapabilityDenied("name `%s` is not allowed" % node.id)
        self.generic_visit(node)

    def visit_MatchClass(self, node):
        for attr in node.kwd_attrs:
            if attr.startswith("_"):
                raise CapabilityDenied("attribute `%s` is not allowed" % attr)
        self.generic_visit(node)

    def visit_Import(self, node):
        for alias in node.names:
            self.check_module(alias.name)
        self.generic_visit(node)

    def visit_ImportFrom(self, node):
        if node.level or not node.module:
            raise CapabilityDenied("relative imports are not allowed")
        self.check_module(node.module)
        for alias in node.names:
            if alias.name == "*" or alias.name.startswith("_"):
                raise CapabilityDenied("import of `%s` from `%s` is not allowed" % (alias.name, node.module))
        self.generic_visit(node)

    def check_module(self, name):
        if not module_allowed(name, self.allowed):
            raise CapabilityDenied("import of `%s` is not allowed" % name)


class ModuleView:
    __slots__ = ("_target", "_allowed")

    def __init__(self, target, allowed):
        object.__setattr__(self, "_target", target)
        object.__setattr__(self, "_allowed", allowed)

    def __getattr__(self, name):
        if name.startswith("_"):
            raise AttributeError(name)
        target = object.__getattribute__(self, "_target")
        allowed = object.__getattribute__(self, "_allowed")
        value = getattr(target, name)
        if isinstance(value, types.ModuleType):
            if not module_allowed(value.__name__, allowed):
                raise AttributeError("module `%s` is not available" % value.__name__)
            return ModuleView(value, allowed)
        return value

    def __setattr__(self, name, value):
        raise AttributeError("modules are read-only")

    def __repr__(self):
        return "<module %s>" % object.__getattribute__(self, "_target").__name__


def sandbox(allowed):
    def guarded_import(name, globals=None, locals=None, fromlist=(), level=0):
        if level or not module_allowed(name, allowed):
            raise ImportError("import of `%s` is not allowed" % name)
        return ModuleView(builtins.__import__(name, globals, locals, fromlist, level), allowed)

    safe = {name: getattr(builtins, name) for name in SAFE_BUILTINS}
    safe["__build_class__"] = builtins.__build_class__
    safe["__import__"] = guarded_import
    return {"__builtins__": safe, "__name__": "tool", "BaseTool": BaseTool}


def run(request):
    allowed = frozenset(request.get("allowed_modules") or ())
    tree = ast.parse(request["code"], "tool", "exec")
    Guard(allowed).visit(tree)
    namespace = sandbox(allowed)
    exec(compile(tree, "tool", "exec"), namespace)
    function = namespace.get(request["function"])
    if not callable(function):
        raise NameError("function `%s` is not defined" % request["function"])
    return function(**(request.get("args") or {}))


def main():
    raw = sys.stdin.read()
    try:
        payload = {"ok": True, "result": run(json.loads(raw))}
    except Exception as exc:
        payload = {"ok": False, "error": type(exc).__name__ + ": " + str(exc)}
    print(SENTINEL + json.dumps(payload, default=str), flush=True)


if __name__ == "__main__":
    main()
"#;

fn parse_output(stdout: &str, stderr: &str) -> Result<Value, ToolError> {
    let Some(line) = stdout.lines().rev().find_map(|l| l.strip_prefix(RESULT_SENTINEL)) else {
        let stderr = stderr.trim();
        if stderr.is_empty() {
            return Err(ToolError::ExecutionFailed("no result produced".into()));
        }
        let start = stderr
            .char_indices()
            .rev()
            .nth(MAX_STDERR_CHARS - 1)
            .map_or(0, |(i, _)| i);
        return Err(ToolError::ExecutionFailed(stderr[start..].to_string()));
    };

    let payload: Value = serde_json::from_str(line)
        .map_err(|e| ToolError::ExecutionFailed(format!("unreadable result: {e}")))?;
    if payload["ok"].as_bool() == Some(true) {
        Ok(payload["result"].clone())
    } else {
        let error = payload["error"].as_str().unwrap_or("tool failed");
        Err(ToolError::ExecutionFailed(error.to_string()))
    }
}
