//! Prompt templates for the enrichment handlers. Inputs are truncated by
//! the callers before they land here.

pub fn snippet_summary(extension: &str, content: &str) -> String {
    format!(
        "You are documenting a codebase. Summarise what the following code \
         fragment does in two or three sentences. Mention the key names so the \
         summary is searchable. Do not restate the code.\n\n\
         Language hint: {extension}\n\n```\n{content}\n```"
    )
}

pub fn example_summary(content: &str) -> String {
    format!(
        "The following is a usage example taken from a repository. Describe \
         in a couple of sentences what it demonstrates and when a developer \
         would reach for it.\n\n```\n{content}\n```"
    )
}

pub fn commit_description(message: &str, diff: &str) -> String {
    format!(
        "Describe what this commit changes and why it matters, in one short \
         paragraph. Base the description on the diff, not just the message.\n\n\
         Commit message:\n{message}\n\nDiff:\n{diff}"
    )
}

pub fn architecture(inputs: &str) -> String {
    format!(
        "Based on the following deployment and container files, describe the \
         physical architecture of this system: processes, services, storage \
         and how they connect.\n\n{inputs}"
    )
}

pub fn api_docs(signatures: &str) -> String {
    format!(
        "Write concise API documentation for the following public interface \
         signatures. Group related items and describe parameters only where \
         their purpose is not obvious.\n\n{signatures}"
    )
}

pub fn database_schema(schema_sources: &str) -> String {
    format!(
        "Summarise the database schema defined by the following files: the \
         tables, their keys and the relationships between them.\n\n{schema_sources}"
    )
}

pub fn cookbook(inputs: &str) -> String {
    format!(
        "Using the README and manifest files below, write a short cookbook \
         for this repository: how to install it, the two or three most common \
         tasks, and one complete usage example.\n\n{inputs}"
    )
}
