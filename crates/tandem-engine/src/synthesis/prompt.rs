use std::fmt::Write as _;

use tandem_core::provider::{CompletionOptions, CompletionRequest};
use tandem_core::tools::ToolDefinition;
use tandem_store::{SynthesisTurn, TurnKind};

const GENERATOR_INSTRUCTIONS: &str = "\
You write small, self-contained Python tools for an agent.

Reply with exactly one fenced python code block containing:
1. One function `def <name>(...)` with type-annotated parameters and a docstring.
2. A descriptor assignment right after it:
   <name>_tool = BaseTool(
       name=\"<name>\",
       description=\"<one sentence>\",
       parameters={\"<param>\": {\"type\": \"string\", \"description\": \"...\"}},
       required=[\"<param>\"],
   )

Rules:
- Do not import BaseTool; it is provided.
- Only import from these modules: {modules}.
- No file, network, process or environment access.
- Return JSON-serializable values.";

pub(crate) struct PromptContext<'a> {
    pub agent_name: &'a str,
    pub agent_description: &'a str,
    pub existing_tools: &'a [ToolDefinition],
    pub history: &'a [SynthesisTurn],
    pub allowed_modules: &'a [String],
}

pub(crate) fn requirement_request(ctx: &PromptContext<'_>, requirement: &str) -> CompletionRequest {
    let mut body = context_block(ctx);
    let _ = write!(body, "Requirement:\n{requirement}\n");
    request(ctx, body)
}

pub(crate) fn feedback_request(ctx: &PromptContext<'_>, feedback: &str, original: Option<&str>) -> CompletionRequest {
    let mut body = context_block(ctx);
    if let Some(original) = original {
        let _ = write!(body, "Original requirement:\n{original}\n\n");
    }
    let _ = write!(
        body,
        "Feedback on the latest version:\n{feedback}\n\nRevise the tool to address the feedback.\n"
    );
    request(ctx, body)
}

fn request(ctx: &PromptContext<'_>, body: String) -> CompletionRequest {
    let system = GENERATOR_INSTRUCTIONS.replace("{modules}", &ctx.allowed_modules.join(", "));
    CompletionRequest::prompt(Some(system), body).with_options(CompletionOptions {
        temperature: Some(0.0),
        max_tokens: None,
    })
}

fn context_block(ctx: &PromptContext<'_>) -> String {
    let mut out = format!("Agent: {} - {}\n\nExisting tools:\n", ctx.agent_name, ctx.agent_description);
    if ctx.existing_tools.is_empty() {
        out.push_str("none\n");
    }
    for tool in ctx.existing_tools {
        let _ = writeln!(out, "- {}: {}", tool.name, tool.description);
    }

    if !ctx.history.is_empty() {
        out.push_str("\nPrevious iterations:\n");
        for turn in ctx.history {
            let label = match turn.kind {
                TurnKind::Requirement => "User request",
                TurnKind::Feedback => "User feedback",
            };
            let _ = write!(out, "{label}:\n{}\n\nGenerated tool:\n{}\n\n", turn.input, turn.code);
        }
    }
    out.push('\n');
    out
}
