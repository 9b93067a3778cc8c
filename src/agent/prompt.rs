//! Prompt templates for the search agent.

use crate::tools::ToolRegistry;

/// The per-tick instruction sent as the user message.
pub fn build_task(term: &str) -> String {
    format!(
        "Search freelancer for jobs fitting the following description. {}",
        term
    )
}

/// Build the system prompt with tool definitions.
pub fn build_system_prompt(tools: &ToolRegistry) -> String {
    let tool_descriptions = tools
        .list_tools()
        .iter()
        .map(|t| format!("- **{}**: {}", t.name, t.description))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"You are a job scouting agent working on behalf of a freelancer. You look for projects on the freelancer.com marketplace that fit their description.

## Your Capabilities

You have access to the following tools:
{tool_descriptions}

## Rules and Guidelines

1. **Always search** - Use the search tool before answering. Never invent projects.

2. **Refine when empty** - If a search returns no projects, try one shorter or broader query before giving up.

3. **Upstream errors** - If the marketplace returns a 5XX error, say the search should be retried later.

4. **Be concise** - Your final answer is emailed to the freelancer. Summarise the best matches with title, budget and why each fits, then sketch a short proposal for the strongest one.

If you need to use a tool, respond with a tool call. The system will execute it and return the result."#,
        tool_descriptions = tool_descriptions
    )
}
