use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use tandem_core::ids::SynthesisSessionId;
use tandem_core::tools::{ParameterSpec, Tool, ToolContext, ToolDescriptor, ToolError, ToolResult};

use super::literal::{code_chars, literal_to_json, matching_close, read_string, split_top_level};
use super::runtime::ToolRuntime;
use super::SynthesisError;

pub const DEFAULT_ALLOWED_MODULES: &[&str] = &[
    "json",
    "math",
    "re",
    "datetime",
    "statistics",
    "collections",
    "itertools",
    "functools",
    "string",
    "decimal",
    "random",
    "typing",
];

static FORBIDDEN: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        ("exec(", r"(?:^|[^\w.])exec\s*\("),
        ("eval(", r"(?:^|[^\w.])eval\s*\("),
        ("compile(", r"(?:^|[^\w.])compile\s*\("),
        ("open(", r"(?:^|[^\w])open\s*\("),
        ("globals(", r"(?:^|[^\w.])globals\s*\("),
        ("__import__", r"__import__"),
        ("__builtins__", r"__builtins__"),
        ("os.system", r"\bos\s*\.\s*system\b"),
        ("subprocess", r"\bsubprocess\b"),
        ("private attribute", r"\.\s*_"),
        (
            "system module attribute",
            r"\.\s*(?:os|sys|codecs|io|subprocess|shutil|socket|builtins|importlib|ctypes|pathlib|posix|tempfile|pickle|marshal|signal|multiprocessing|threading)\b",
        ),
    ]
    .into_iter()
    .map(|(label, pattern)| (label, Regex::new(pattern).unwrap()))
    .collect()
});

static IMPORT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^\s*import\s+(.+)$").unwrap());
static FROM_IMPORT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^\s*from\s+(\S+)\s+import\s+(.+)$").unwrap());

/// Imports and calls a generated tool may use.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CapabilityPolicy {
    allowed_modules: Vec<String>,
}

impl Default for CapabilityPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_ALLOWED_MODULES.iter().copied())
    }
}

impl CapabilityPolicy {
    pub fn new<I, S>(allowed_modules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed_modules: allowed_modules.into_iter().map(Into::into).collect(),
        }
    }

    pub fn allowed_modules(&self) -> &[String] {
        &self.allowed_modules
    }

    /// Reject code that imports outside the allow-list or uses a forbidden
    /// construct. The runtime enforces the same allow-list again when the
    /// code executes.
    pub fn check(&self, code: &str) -> Result<(), SynthesisError> {
        // Scan only code, so forbidden words inside strings or comments pass.
        let stripped: String = code_chars(code).into_iter().map(|(_, c)| c).collect();
        for (label, pattern) in FORBIDDEN.iter() {
            if pattern.is_match(&stripped) {
                return Err(SynthesisError::CapabilityDenied(format!("forbidden `{label}`")));
            }
        }

        for caps in IMPORT.captures_iter(&stripped) {
            for item in caps[1].split(',') {
                let module = item.split_whitespace().next().unwrap_or_default();
                self.check_module(module)?;
            }
        }
        for caps in FROM_IMPORT.captures_iter(&stripped) {
            self.check_module(&caps[1])?;
        }
        Ok(())
    }

    fn check_module(&self, module: &str) -> Result<(), SynthesisError> {
        let root = module.split('.').next().unwrap_or_default();
        if root.is_empty() || !self.allowed_modules.iter().any(|m| m == root) {
            return Err(SynthesisError::CapabilityDenied(format!("import of `{module}` is not allowed")));
        }
        Ok(())
    }
}

/// Generated code plus the function it exposes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolArtifact {
    pub code: String,
    pub function_name: String,
}

/// Turns approved artifacts into tools that run in a [`ToolRuntime`].
pub struct ArtifactLoader {
    policy: CapabilityPolicy,
    runtime: Arc<dyn ToolRuntime>,
    timeout: Duration,
}

impl ArtifactLoader {
    pub fn new(policy: CapabilityPolicy, runtime: Arc<dyn ToolRuntime>, timeout: Duration) -> Self {
        Self {
            policy,
            runtime,
            timeout,
        }
    }

    pub fn policy(&self) -> &CapabilityPolicy {
        &self.policy
    }

    /// Validate an artifact and read its descriptor. Nothing is executed.
    pub fn load(&self, artifact: &ToolArtifact, session_id: &SynthesisSessionId) -> Result<SynthesizedTool, SynthesisError> {
        let function_name = artifact.function_name.trim();
        if !is_identifier(function_name) {
            return Err(SynthesisError::InvalidArtifact(format!(
                "`{function_name}` is not a valid function name"
            )));
        }

        let code = strip_base_tool_imports(&artifact.code);
        self.policy.check(&code)?;
        let signature = parse_signature(&code, function_name).ok_or_else(|| {
            SynthesisError::InvalidArtifact(format!("no function `{function_name}` defined"))
        })?;

        let descriptor = match parse_constructor(&code, function_name) {
            Some(Ok(from_ctor)) => merge(from_ctor, &signature),
            Some(Err(reason)) => {
                warn!(function = function_name, reason = %reason, "descriptor block unreadable, using signature");
                signature.descriptor
            }
            None => signature.descriptor,
        };
        info!(tool = %descriptor.name, session_id = %session_id, params = descriptor.parameters.len(), "artifact loaded");

        Ok(SynthesizedTool {
            descriptor,
            artifact: ToolArtifact {
                code,
                function_name: function_name.to_string(),
            },
            session_id: session_id.clone(),
            allowed_modules: self.policy.allowed_modules().to_vec(),
            runtime: Arc::clone(&self.runtime),
            timeout: self.timeout,
        })
    }
}

/// A generated tool. Every call runs out of process.
pub struct SynthesizedTool {
    descriptor: ToolDescriptor,
    artifact: ToolArtifact,
    session_id: SynthesisSessionId,
    allowed_modules: Vec<String>,
    runtime: Arc<dyn ToolRuntime>,
    timeout: Duration,
}

impl std::fmt::Debug for SynthesizedTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynthesizedTool")
            .field("descriptor", &self.descriptor)
            .field("artifact", &self.artifact)
            .field("session_id", &self.session_id)
            .field("allowed_modules", &self.allowed_modules)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl SynthesizedTool {
    pub fn artifact(&self) -> &ToolArtifact {
        &self.artifact
    }

    pub fn session_id(&self) -> &SynthesisSessionId {
        &self.session_id
    }
}

#[async_trait]
impl Tool for SynthesizedTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let args = match args {
            Value::Null => Value::Object(Default::default()),
            Value::Object(_) => args,
            other => return Err(ToolError::InvalidArguments(format!("expected an object, got {other}"))),
        };
        for name in &self.descriptor.required {
            if args.get(name).map_or(true, Value::is_null) {
                return Err(ToolError::InvalidArguments(format!("missing required argument `{name}`")));
            }
        }

        debug!(tool = %self.descriptor.name, agent = %ctx.agent_name, "invoking synthesized tool");
        let start = Instant::now();
        let value = self
            .runtime
            .invoke(&self.artifact, &self.allowed_modules, args, self.timeout)
            .await?;
        let content = match value {
            Value::String(s) => s,
            other => other.to_string(),
        };
        Ok(ToolResult::text(content).with_duration(start.elapsed()))
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn strip_base_tool_imports(code: &str) -> String {
    code.lines()
        .filter(|line| {
            FROM_IMPORT
                .captures(line)
                .map_or(true, |caps| caps[2].trim() != "BaseTool")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

struct Signature {
    descriptor: ToolDescriptor,
}

/// Descriptor from `def name(...)`: annotations, defaults and docstring.
fn parse_signature(code: &str, function_name: &str) -> Option<Signature> {
    let def = Regex::new(&format!(r"\bdef\s+{}\s*\(", regex::escape(function_name))).ok()?;
    let found = def.find(code)?;
    let open = found.end() - 1;
    let close = matching_close(code, open)?;

    let mut descriptor = ToolDescriptor::new(function_name, format!("Synthesized tool {function_name}"));
    for param in split_top_level(&code[open + 1..close]) {
        let (head, has_default) = match param.split_once('=') {
            Some((head, _)) => (head.trim(), true),
            None => (param, false),
        };
        let (name, annotation) = match head.split_once(':') {
            Some((name, annotation)) => (name.trim(), annotation.trim()),
            None => (head.trim(), ""),
        };
        if name == "self" || name.starts_with('*') || name == "/" || !is_identifier(name) {
            continue;
        }
        descriptor = descriptor.with_parameter(name, ParameterSpec::new(json_type(annotation), ""), !has_default);
    }

    if let Some(doc) = docstring(&code[close + 1..]) {
        descriptor.description = doc;
    }
    Some(Signature { descriptor })
}

/// First line of the docstring that opens a function body.
fn docstring(after_params: &str) -> Option<String> {
    let colon = code_chars(after_params).into_iter().find(|(_, c)| *c == ':')?.0;
    let body = after_params[colon + 1..].trim_start();
    let quote = body.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let chars: Vec<char> = body.chars().collect();
    let triple = chars.get(1) == Some(&quote) && chars.get(2) == Some(&quote);
    let (content, _) = read_string(&chars, 0, quote, triple).ok()?;
    content
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}

/// Descriptor from `<name>_tool = Ctor(name=..., description=..., parameters=..., required=...)`.
fn parse_constructor(code: &str, function_name: &str) -> Option<Result<ToolDescriptor, String>> {
    let pattern = format!(r"\b{}_tool\s*=\s*[A-Za-z_][\w.]*\s*\(", regex::escape(function_name));
    let ctor = Regex::new(&pattern).ok()?;
    let found = ctor.find(code)?;
    let open = found.end() - 1;
    let Some(close) = matching_close(code, open) else {
        return Some(Err("unbalanced descriptor call".into()));
    };
    Some(descriptor_from_kwargs(&code[open + 1..close], function_name))
}

fn descriptor_from_kwargs(args: &str, function_name: &str) -> Result<ToolDescriptor, String> {
    let mut descriptor = ToolDescriptor::new(function_name, "");
    let mut required: Option<Vec<String>> = None;

    for kwarg in split_top_level(args) {
        let Some((key, value)) = kwarg.split_once('=') else {
            return Err(format!("positional argument `{kwarg}`"));
        };
        let value = literal_to_json(value.trim())?;
        match key.trim() {
            "name" => descriptor.name = as_string(&value, "name")?,
            "description" => descriptor.description = as_string(&value, "description")?,
            "parameters" => {
                let Value::Object(params) = value else {
                    return Err("parameters must be a dict".into());
                };
                for (name, spec) in params {
                    let kind = spec.get("type").and_then(Value::as_str).unwrap_or("string");
                    let description = spec.get("description").and_then(Value::as_str).unwrap_or_default();
                    descriptor
                        .parameters
                        .insert(name, ParameterSpec::new(json_type(kind), description));
                }
            }
            "required" => {
                let Value::Array(items) = value else {
                    return Err("required must be a list".into());
                };
                required = Some(items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect());
            }
            other => debug!(key = other, "ignoring descriptor argument"),
        }
    }

    if descriptor.name.is_empty() || !descriptor.name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(format!("invalid tool name `{}`", descriptor.name));
    }
    if let Some(required) = required {
        descriptor.required = required
            .into_iter()
            .filter(|r| descriptor.parameters.contains_key(r))
            .collect();
    }
    Ok(descriptor)
}

/// Fill gaps in a constructor descriptor from the function signature.
fn merge(mut from_ctor: ToolDescriptor, signature: &Signature) -> ToolDescriptor {
    let from_sig = &signature.descriptor;
    if from_ctor.description.trim().is_empty() {
        from_ctor.description = from_sig.description.clone();
    }
    if from_ctor.parameters.is_empty() {
        from_ctor.parameters = from_sig.parameters.clone();
        if from_ctor.required.is_empty() {
            from_ctor.required = from_sig.required.clone();
        }
    }
    from_ctor
}

fn as_string(value: &Value, key: &str) -> Result<String, String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| format!("{key} must be a string"))
}

/// Map a Python annotation or type name to a JSON-schema type.
fn json_type(annotation: &str) -> &'static str {
    let inner = annotation
        .strip_prefix("Optional[")
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(annotation);
    let root = inner.split('[').next().unwrap_or_default().trim();
    match root {
        "str" | "string" => "string",
        "int" | "integer" => "integer",
        "float" | "number" => "number",
        "bool" | "boolean" => "boolean",
        "list" | "List" | "tuple" | "Tuple" | "array" => "array",
        "dict" | "Dict" | "object" => "object",
        _ => "string",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_core::ids::ThreadId;

    struct Echo;

    #[async_trait]
    impl ToolRuntime for Echo {
        async fn invoke(
            &self,
            artifact: &ToolArtifact,
            allowed_modules: &[String],
            args: Value,
            _timeout: Duration,
        ) -> Result<Value, ToolError> {
            Ok(serde_json::json!({"called": artifact.function_name, "allowed": allowed_modules, "args": args}))
        }
    }

    fn loader() -> ArtifactLoader {
        ArtifactLoader::new(CapabilityPolicy::default(), Arc::new(Echo), Duration::from_secs(5))
    }

    fn artifact(code: &str, name: &str) -> ToolArtifact {
        ToolArtifact {
            code: code.to_string(),
            function_name: name.to_string(),
        }
    }

    const WORD_COUNT: &str = r#"from tools.base import BaseTool
import re

def word_count(text: str, min_len: int = 1) -> int:
    """Count words in text.

    Longer explanation.
    """
    return len([w for w in re.findall(r"\w+", text) if len(w) >= min_len])

word_count_tool = BaseTool(
    name="word_count",
    description="Count the words in a piece of text",
    parameters={
        "text": {"type": "string", "description": "Input text"},
        "min_len": {"type": "int", "description": "Shortest word counted"},
    },
    required=["text"],
)
"#;

    #[test]
    fn loads_descriptor_from_constructor() {
        let tool = loader()
            .load(&artifact(WORD_COUNT, "word_count"), &SynthesisSessionId::from_raw("s"))
            .unwrap();
        let d = tool.descriptor();
        assert_eq!(d.name, "word_count");
        assert_eq!(d.description, "Count the words in a piece of text");
        assert_eq!(d.parameters["min_len"].kind, "integer");
        assert_eq!(d.required, vec!["text"]);
        assert!(!tool.artifact().code.contains("import BaseTool"));
    }

    #[test]
    fn falls_back_to_signature() {
        let code = "def add(a: int, b: float, scale: float = 1.0):\n    '''Add two numbers.'''\n    return (a + b) * scale\n";
        let tool = loader().load(&artifact(code, "add"), &SynthesisSessionId::from_raw("s")).unwrap();
        let d = tool.descriptor();
        assert_eq!(d.description, "Add two numbers.");
        assert_eq!(d.parameters["a"].kind, "integer");
        assert_eq!(d.parameters["b"].kind, "number");
        assert_eq!(d.required, vec!["a", "b"]);
    }

    #[test]
    fn denies_unlisted_imports_and_forbidden_calls() {
        let policy = CapabilityPolicy::default();
        for code in [
            "import os\ndef f():\n    pass",
            "import json, socket\ndef f():\n    pass",
            "from urllib.request import urlopen",
            "def f():\n    return eval('1')",
            "def f():\n    return open('/etc/passwd').read()",
            "def f():\n    __import__('os')",
            "def f():\n    return subprocess.run(['ls'])",
            "import json\ndef f():\n    return json.codecs.open('/etc/passwd').read()",
            "import typing\ndef f():\n    return typing.sys.argv",
            "def f(x):\n    return x.__class__.__mro__",
        ] {
            assert!(
                matches!(policy.check(code), Err(SynthesisError::CapabilityDenied(_))),
                "should deny: {code}"
            );
        }
    }

    #[test]
    fn private_module_attributes_are_denied() {
        let code = "import random\n\ndef pwn(cmd: str) -> str:\n    return random._os.popen(cmd).read()";
        let err = loader()
            .load(&artifact(code, "pwn"), &SynthesisSessionId::from_raw("s"))
            .err()
            .unwrap();
        assert!(matches!(err, SynthesisError::CapabilityDenied(ref m) if m.contains("private attribute")));

        let spaced = "import random\n\ndef pwn(cmd):\n    return random . _os . popen(cmd)";
        assert!(CapabilityPolicy::default().check(spaced).is_err());
    }

    #[test]
    fn file_access_through_allowed_modules_is_denied() {
        let code = "import json\n\ndef leak() -> str:\n    return json.codecs.open('/etc/passwd').read()";
        let err = loader()
            .load(&artifact(code, "leak"), &SynthesisSessionId::from_raw("s"))
            .err()
            .unwrap();
        assert!(matches!(err, SynthesisError::CapabilityDenied(_)));
        let attribute_only = "import json\n\ndef codec():\n    return json.codecs";
        assert!(matches!(
            CapabilityPolicy::default().check(attribute_only),
            Err(SynthesisError::CapabilityDenied(ref m)) if m.contains("system module attribute")
        ));

        let opener = "import json\n\ndef leak(f):\n    return f.open('/etc/passwd')";
        assert!(matches!(
            CapabilityPolicy::default().check(opener),
            Err(SynthesisError::CapabilityDenied(ref m)) if m.contains("open(")
        ));
    }

    #[test]
    fn allows_listed_imports_and_quoted_lookalikes() {
        let policy = CapabilityPolicy::default();
        assert!(policy.check("import json\nimport os.path as p").is_err());
        let code = "import json\nfrom collections import Counter\nimport re\n\
                    def f(s: str):\n    # eval( is fine in a comment\n    return re.compile(s).pattern + 'open(x)'";
        assert!(policy.check(code).is_ok());
    }

    #[test]
    fn rejects_missing_function() {
        let err = loader()
            .load(&artifact("x = 1", "ghost"), &SynthesisSessionId::from_raw("s"))
            .unwrap_err();
        assert!(matches!(err, SynthesisError::InvalidArtifact(_)));
        let err = loader()
            .load(&artifact("def f(): pass", "bad name"), &SynthesisSessionId::from_raw("s"))
            .unwrap_err();
        assert!(matches!(err, SynthesisError::InvalidArtifact(_)));
    }

    #[tokio::test]
    async fn execute_checks_required_then_invokes_runtime() {
        let tool = loader()
            .load(&artifact(WORD_COUNT, "word_count"), &SynthesisSessionId::from_raw("s"))
            .unwrap();
        let ctx = ToolContext {
            thread_id: ThreadId::from_raw("t"),
            agent_name: "text".into(),
            iteration: 1,
        };

        let err = tool.execute(serde_json::json!({"min_len": 2}), &ctx).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));

        let result = tool.execute(serde_json::json!({"text": "a b"}), &ctx).await.unwrap();
        let echoed: Value = serde_json::from_str(&result.content).unwrap();
        assert_eq!(echoed["called"], "word_count");
        assert_eq!(echoed["args"]["text"], "a b");
        assert_eq!(echoed["allowed"][0], "json");
    }
}
