//! MCP tool definitions and handlers

use super::types::{ToolDefinition, ToolResult};
use crate::commands::{cmd_list, cmd_query, CommandContext};
use crate::manifest::{knowledge_base_name, validate_repository_name};
use crate::remote::FileFilter;
use serde_json::{json, Map, Value};
use tracing::error;

const DEFAULT_MAX_CONCURRENT: usize = 10;

const USAGE_GUIDE: &str = r#"docs-kb MCP server

Knowledge base tools (repositories ingested with `docs-kb ingest`):
1. list_available_repositories() - every tracked repository and branch
2. query_repository_docs(repo_name, branch, query, limit) - natural language search

GitHub tools (any repository, no ingestion needed):
3. get_repository_tree(repo_name, branch, file_extensions, path_filter) - list matching file paths
4. get_single_file(repo_name, file_path, branch) - one file's content and metadata
5. load_multiple_files(repo_name, file_paths, branch, max_concurrent) - several files at once

Examples:
- query_repository_docs("facebook/react", "main", "How do hooks work?")
- get_repository_tree("microsoft/vscode", "main", [".md"], "docs/")
- get_single_file("nodejs/node", "README.md", "main")

Private repositories and higher rate limits need GITHUB_TOKEN in the server environment."#;

fn repo_name_property() -> Value {
    json!({
        "type": "string",
        "description": "Repository in 'owner/repo' form"
    })
}

fn branch_property(default_branch: &str) -> Value {
    json!({
        "type": "string",
        "description": format!("Branch name (default: {})", default_branch),
        "default": default_branch
    })
}

/// Get all available tool definitions, advertising `default_branch` for omitted branches
pub fn get_tool_definitions(default_branch: &str) -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "how_to_use_docs_kb_mcp".to_string(),
            description: "Explain the tools this server offers and how to call them.".to_string(),
            input_schema: json!({ "type": "object", "properties": {} }),
        },
        ToolDefinition {
            name: "list_available_repositories".to_string(),
            description: "List the repositories whose documentation has been ingested into the knowledge base.".to_string(),
            input_schema: json!({ "type": "object", "properties": {} }),
        },
        ToolDefinition {
            name: "query_repository_docs".to_string(),
            description: "Search an ingested repository's documentation with a natural language query. Returns the most relevant passages.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "repo_name": repo_name_property(),
                    "branch": branch_property(default_branch),
                    "query": {
                        "type": "string",
                        "description": "Natural language question or keywords"
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum number of results (default: 10)",
                        "default": 10,
                        "minimum": 1
                    }
                },
                "required": ["repo_name", "query"]
            }),
        },
        ToolDefinition {
            name: "get_repository_tree".to_string(),
            description: "List files of any GitHub repository branch, filtered by extension and path prefix.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "repo_name": repo_name_property(),
                    "branch": branch_property(default_branch),
                    "file_extensions": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Extensions with leading dot (default: the configured extensions)"
                    },
                    "path_filter": {
                        "type": "string",
                        "description": "Only paths starting with this prefix, e.g. 'docs/'"
                    }
                },
                "required": ["repo_name"]
            }),
        },
        ToolDefinition {
            name: "get_single_file".to_string(),
            description: "Fetch one file's content from a GitHub repository.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "repo_name": repo_name_property(),
                    "file_path": {
                        "type": "string",
                        "description": "Repository-relative path"
                    },
                    "branch": branch_property(default_branch)
                },
                "required": ["repo_name", "file_path"]
            }),
        },
        ToolDefinition {
            name: "load_multiple_files".to_string(),
            description: "Fetch several files from a GitHub repository concurrently. Failed paths are listed separately.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "repo_name": repo_name_property(),
                    "file_paths": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Repository-relative paths"
                    },
                    "branch": branch_property(default_branch),
                    "max_concurrent": {
                        "type": "integer",
                        "description": "Maximum simultaneous requests (default: 10)",
                        "default": DEFAULT_MAX_CONCURRENT,
                        "minimum": 1
                    }
                },
                "required": ["repo_name", "file_paths"]
            }),
        },
    ]
}

/// Handle a tool call
pub async fn handle_tool_call(
    name: &str,
    arguments: &Map<String, Value>,
    ctx: &CommandContext<'_>,
) -> ToolResult {
    match name {
        "how_to_use_docs_kb_mcp" => ToolResult::text(USAGE_GUIDE),
        "list_available_repositories" => handle_list(ctx).await,
        "query_repository_docs" => handle_query(arguments, ctx).await,
        "get_repository_tree" => handle_tree(arguments, ctx).await,
        "get_single_file" => handle_single_file(arguments, ctx).await,
        "load_multiple_files" => handle_multiple_files(arguments, ctx).await,
        _ => ToolResult::error(format!("Unknown tool: {}", name)),
    }
}

fn str_arg<'a>(arguments: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    arguments
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
}

fn string_array_arg(arguments: &Map<String, Value>, key: &str) -> Option<Vec<String>> {
    arguments.get(key).and_then(|v| v.as_array()).map(|items| {
        items
            .iter()
            .filter_map(|item| item.as_str().map(String::from))
            .collect()
    })
}

/// Required, valid `repo_name` argument
fn repo_arg<'a>(arguments: &'a Map<String, Value>) -> Result<&'a str, ToolResult> {
    let name = str_arg(arguments, "repo_name")
        .ok_or_else(|| ToolResult::error("Missing required parameter: repo_name"))?;
    validate_repository_name(name).map_err(|e| ToolResult::error(e.to_string()))?;
    Ok(name)
}

async fn handle_list(ctx: &CommandContext<'_>) -> ToolResult {
    match cmd_list(ctx.store).await {
        Ok(repositories) => ToolResult::json(&repositories),
        Err(e) => {
            error!("Failed to list repositories: {}", e);
            ToolResult::error(format!("Failed to list repositories: {}", e))
        }
    }
}

async fn handle_query(arguments: &Map<String, Value>, ctx: &CommandContext<'_>) -> ToolResult {
    let repo_name = match repo_arg(arguments) {
        Ok(name) => name,
        Err(result) => return result,
    };
    let query = match str_arg(arguments, "query") {
        Some(q) => q,
        None => return ToolResult::error("Missing required parameter: query"),
    };
    let branch = ctx.branch_or_default(str_arg(arguments, "branch"));
    let limit = arguments
        .get("limit")
        .and_then(|v| v.as_u64())
        .map(|v| v as usize);

    let kb_name = knowledge_base_name(repo_name, branch);
    match ctx.store.get(repo_name).await {
        Ok(Some(record)) if record.branch == branch => {}
        Ok(_) => {
            return ToolResult::error(format!(
                "{}@{} has not been ingested (knowledge base {}). Call list_available_repositories to see what is available.",
                repo_name, branch, kb_name
            ))
        }
        Err(e) => return ToolResult::error(format!("Failed to look up {}: {}", repo_name, e)),
    }

    match cmd_query(ctx.config, ctx.store, ctx.kb, repo_name, query, limit).await {
        Ok(result) => {
            if result.hits.is_empty() {
                return ToolResult::text(format!("No results found in {}.", kb_name));
            }

            let mut output = format!("Found {} results in {}:\n\n", result.hits.len(), kb_name);
            for (i, hit) in result.hits.iter().enumerate() {
                output.push_str(&format!("## Result {} (score: {:.2})\n", i + 1, hit.score));
                output.push_str(&format!("**Path:** {}\n", hit.id));
                if let Some(sha) = hit.metadata.get("sha").and_then(|v| v.as_str()) {
                    output.push_str(&format!("**SHA:** {}\n", sha));
                }
                if let Some(headings) = hit
                    .metadata
                    .get(crate::kb::HEADINGS_FIELD)
                    .and_then(|v| v.as_array())
                {
                    let path: Vec<&str> = headings.iter().filter_map(|h| h.as_str()).collect();
                    if !path.is_empty() {
                        output.push_str(&format!("**Section:** {}\n", path.join(" > ")));
                    }
                }
                output.push_str("\n```\n");
                output.push_str(&hit.content);
                output.push_str("\n```\n\n");
            }
            ToolResult::text(output)
        }
        Err(e) => ToolResult::error(format!("Search failed: {}", e)),
    }
}

async fn handle_tree(arguments: &Map<String, Value>, ctx: &CommandContext<'_>) -> ToolResult {
    let repo_name = match repo_arg(arguments) {
        Ok(name) => name,
        Err(result) => return result,
    };
    let branch = ctx.branch_or_default(str_arg(arguments, "branch"));
    let extensions = string_array_arg(arguments, "file_extensions")
        .filter(|exts| !exts.is_empty())
        .unwrap_or_else(|| ctx.config.github.extensions.clone());
    let path_filter = str_arg(arguments, "path_filter").map(String::from);

    let filter = FileFilter::new(extensions, path_filter);
    match ctx.lister.list_files(repo_name, branch, &filter).await {
        Ok(files) => {
            let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
            ToolResult::json(&json!({
                "repository": repo_name,
                "branch": branch,
                "files": paths,
                "total_files": paths.len(),
                "filters_applied": {
                    "file_extensions": filter.extensions,
                    "path_filter": filter.path_prefix,
                }
            }))
        }
        Err(e) => ToolResult::error(format!("Failed to fetch repository tree: {}", e)),
    }
}

async fn handle_single_file(
    arguments: &Map<String, Value>,
    ctx: &CommandContext<'_>,
) -> ToolResult {
    let repo_name = match repo_arg(arguments) {
        Ok(name) => name,
        Err(result) => return result,
    };
    let file_path = match str_arg(arguments, "file_path") {
        Some(p) => p,
        None => return ToolResult::error("Missing required parameter: file_path"),
    };
    let branch = ctx.branch_or_default(str_arg(arguments, "branch"));

    match ctx.fetcher.fetch_file(repo_name, branch, file_path).await {
        Ok(file) => ToolResult::json(&json!({
            "repository": repo_name,
            "branch": branch,
            "file": file,
        })),
        Err(e) => ToolResult::error(format!("Failed to load {}: {}", file_path, e)),
    }
}

async fn handle_multiple_files(
    arguments: &Map<String, Value>,
    ctx: &CommandContext<'_>,
) -> ToolResult {
    let repo_name = match repo_arg(arguments) {
        Ok(name) => name,
        Err(result) => return result,
    };
    let file_paths = match string_array_arg(arguments, "file_paths") {
        Some(paths) if !paths.is_empty() => paths,
        _ => return ToolResult::error("Missing required parameter: file_paths"),
    };
    let branch = ctx.branch_or_default(str_arg(arguments, "branch"));
    let max_concurrent = arguments
        .get("max_concurrent")
        .and_then(|v| v.as_u64())
        .map(|v| v as usize)
        .unwrap_or(DEFAULT_MAX_CONCURRENT)
        .clamp(1, ctx.config.github.max_concurrent.max(1));

    let outcome = ctx
        .fetcher
        .fetch_files(repo_name, branch, &file_paths, max_concurrent)
        .await;

    ToolResult::json(&json!({
        "repository": repo_name,
        "branch": branch,
        "loaded_files": outcome.loaded,
        "failed_files": outcome.failed,
        "total_requested": file_paths.len(),
        "total_loaded": outcome.loaded.len(),
        "total_failed": outcome.failed.len(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::store_and_config;
    use crate::config::Config;
    use crate::manifest::{FileEntry, ManifestStore};
    use crate::mcp::types::ToolContent;
    use crate::testing::{RecordingFetcher, RecordingKb, StaticLister};

    fn text_of(result: &ToolResult) -> &str {
        match &result.content[0] {
            ToolContent::Text { text } => text,
        }
    }

    fn json_of(result: &ToolResult) -> Value {
        serde_json::from_str(text_of(result)).unwrap()
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn files() -> Vec<FileEntry> {
        vec![
            FileEntry::new("README.md", 5, "r"),
            FileEntry::new("docs/setup.md", 9, "s"),
            FileEntry::new("docs/notes.txt", 2, "n"),
        ]
    }

    struct Fixture {
        store: ManifestStore,
        config: Config,
        lister: StaticLister,
        fetcher: RecordingFetcher,
        kb: RecordingKb,
        _tmp: tempfile::TempDir,
    }

    impl Fixture {
        async fn new() -> Self {
            let (store, config, tmp) = store_and_config().await;
            Self {
                store,
                config,
                lister: StaticLister::new(&files()),
                fetcher: RecordingFetcher::with_files(&files()),
                kb: RecordingKb::default(),
                _tmp: tmp,
            }
        }

        fn ctx(&self) -> CommandContext<'_> {
            CommandContext {
                config: &self.config,
                store: &self.store,
                lister: &self.lister,
                fetcher: &self.fetcher,
                kb: &self.kb,
            }
        }
    }

    #[test]
    fn test_definitions_cover_every_handler() {
        let names: Vec<String> = get_tool_definitions("main").into_iter().map(|t| t.name).collect();
        assert_eq!(
            names,
            vec![
                "how_to_use_docs_kb_mcp",
                "list_available_repositories",
                "query_repository_docs",
                "get_repository_tree",
                "get_single_file",
                "load_multiple_files",
            ]
        );
    }

    #[tokio::test]
    async fn test_omitted_branch_uses_configured_default() {
        let mut fx = Fixture::new().await;
        fx.config.sync.default_branch = "trunk".to_string();

        let result = handle_tool_call(
            "get_repository_tree",
            &args(json!({"repo_name": "octo/docs"})),
            &fx.ctx(),
        )
        .await;
        assert_eq!(json_of(&result)["branch"], json!("trunk"));

        let definitions = get_tool_definitions(&fx.config.sync.default_branch);
        let tree = definitions
            .iter()
            .find(|t| t.name == "get_repository_tree")
            .unwrap();
        assert_eq!(tree.input_schema["properties"]["branch"]["default"], json!("trunk"));
    }

    #[tokio::test]
    async fn test_list_tool_returns_records() {
        let fx = Fixture::new().await;
        fx.store
            .create("octo/docs", "main", "kb_octo_docs_main", &files()[..1])
            .await
            .unwrap();

        let result = handle_tool_call("list_available_repositories", &Map::new(), &fx.ctx()).await;
        assert!(!result.is_error());
        let listed = json_of(&result);
        assert_eq!(listed[0]["name"], json!("octo/docs"));
        assert_eq!(listed[0]["file_count"], json!(1));
    }

    #[tokio::test]
    async fn test_tree_tool_applies_filters() {
        let fx = Fixture::new().await;

        let result = handle_tool_call(
            "get_repository_tree",
            &args(json!({"repo_name": "octo/docs", "path_filter": "docs/"})),
            &fx.ctx(),
        )
        .await;
        let tree = json_of(&result);
        assert_eq!(tree["files"], json!(["docs/setup.md"]));
        assert_eq!(tree["total_files"], json!(1));

        let result = handle_tool_call(
            "get_repository_tree",
            &args(json!({"repo_name": "octo/docs", "file_extensions": [".TXT"]})),
            &fx.ctx(),
        )
        .await;
        assert_eq!(json_of(&result)["files"], json!(["docs/notes.txt"]));
    }

    #[tokio::test]
    async fn test_single_file_tool() {
        let fx = Fixture::new().await;

        let ok = handle_tool_call(
            "get_single_file",
            &args(json!({"repo_name": "octo/docs", "file_path": "README.md"})),
            &fx.ctx(),
        )
        .await;
        let body = json_of(&ok);
        assert_eq!(body["file"]["path"], json!("README.md"));
        assert_eq!(body["file"]["sha"], json!("r"));
        assert!(body["file"]["content"].as_str().unwrap().contains("README.md"));

        let missing = handle_tool_call(
            "get_single_file",
            &args(json!({"repo_name": "octo/docs", "file_path": "nope.md"})),
            &fx.ctx(),
        )
        .await;
        assert!(missing.is_error());
    }

    #[tokio::test]
    async fn test_multiple_files_tool_reports_failures() {
        let fx = Fixture::new().await;

        let result = handle_tool_call(
            "load_multiple_files",
            &args(json!({
                "repo_name": "octo/docs",
                "file_paths": ["README.md", "gone.md", "docs/setup.md"],
                "max_concurrent": 500
            })),
            &fx.ctx(),
        )
        .await;
        let body = json_of(&result);
        assert_eq!(body["total_requested"], json!(3));
        assert_eq!(body["total_loaded"], json!(2));
        assert_eq!(body["failed_files"][0]["path"], json!("gone.md"));
    }

    #[tokio::test]
    async fn test_query_tool_requires_ingested_branch() {
        let fx = Fixture::new().await;
        fx.store
            .create("octo/docs", "main", "kb_octo_docs_main", &[])
            .await
            .unwrap();

        let wrong_branch = handle_tool_call(
            "query_repository_docs",
            &args(json!({"repo_name": "octo/docs", "branch": "dev", "query": "setup"})),
            &fx.ctx(),
        )
        .await;
        assert!(wrong_branch.is_error());
        assert!(text_of(&wrong_branch).contains("kb_octo_docs_dev"));

        let empty = handle_tool_call(
            "query_repository_docs",
            &args(json!({"repo_name": "octo/docs", "query": "setup"})),
            &fx.ctx(),
        )
        .await;
        assert!(!empty.is_error());
        assert!(text_of(&empty).starts_with("No results"));
    }

    #[tokio::test]
    async fn test_invalid_arguments_are_tool_errors() {
        let fx = Fixture::new().await;

        let bad_name = handle_tool_call(
            "get_repository_tree",
            &args(json!({"repo_name": "not-a-repo"})),
            &fx.ctx(),
        )
        .await;
        assert!(bad_name.is_error());

        let no_query = handle_tool_call(
            "query_repository_docs",
            &args(json!({"repo_name": "octo/docs"})),
            &fx.ctx(),
        )
        .await;
        assert!(no_query.is_error());

        let unknown = handle_tool_call("rag_search", &Map::new(), &fx.ctx()).await;
        assert!(unknown.is_error());
    }
}
