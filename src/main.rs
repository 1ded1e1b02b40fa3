//! # Headwater CLI (`hw`)
//!
//! Runs the Headwater server and talks to a running one.
//!
//! ## Usage
//!
//! ```bash
//! hw --config ./config/headwater.toml serve
//! hw --url http://gpu-box:8080 <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `hw serve` | Start the HTTP server |
//! | `hw ping` / `status` / `routes` | Server health and route listing |
//! | `hw generate "<prompt>" --model M` | One generation |
//! | `hw batch --model M "<p1>" "<p2>"` | Prompt-list batch |
//! | `hw batch --model M --template T --vars vars.json` | Template batch |
//! | `hw tokenize "<text>" --model M` | Token count |
//! | `hw embed quick "<text>"` / `embed models` | Embeddings |
//! | `hw collections list\|get\|create\|delete\|query` | Vector collections |
//! | `hw siphon <file-or-url>` | Ingest a document |
//!
//! Client commands print JSON to stdout. The server URL comes from `--url`,
//! then `HEADWATER_URL`, then `http://localhost:8080`.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use base64::Engine;
use clap::{Parser, Subcommand};
use headwater::client::{default_base_url, HeadwaterClient};
use headwater::config::{load_or_default, Config};
use headwater::logging::init_logging;
use headwater::server::run_server;
use headwater_api::conduit::{
    BatchRequest, ConduitOptions, GenerationParams, GenerationRequest, TokenizationRequest,
};
use headwater_api::embeddings::{
    CreateCollectionRequest, QueryCollectionRequest, QuickEmbeddingRequest,
};
use headwater_api::siphon::{ActionType, SiphonRequest};
use serde::Serialize;

/// Headwater: LLM generation, embeddings, and ingestion behind one HTTP API.
#[derive(Parser)]
#[command(name = "hw", version, about)]
struct Cli {
    /// Path to configuration file (TOML). Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Server URL for client commands.
    #[arg(long, global = true)]
    url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Check the server is up.
    Ping,

    /// Backend health, available models, and uptime.
    Status,

    /// List the server's routes.
    Routes,

    /// Run a single generation.
    Generate {
        prompt: String,
        #[command(flatten)]
        params: ParamArgs,
        /// Serve repeated requests from the server's response cache.
        #[arg(long)]
        use_cache: bool,
    },

    /// Run a batch: either a list of prompts, or a template plus a JSON file
    /// holding an array of variable maps.
    Batch {
        prompts: Vec<String>,
        #[command(flatten)]
        params: ParamArgs,
        /// Template rendered once per variable map (`{{ name }}` syntax).
        #[arg(long)]
        template: Option<String>,
        /// JSON file with an array of objects, one per item.
        #[arg(long)]
        vars: Option<PathBuf>,
        #[arg(long)]
        use_cache: bool,
        /// Cache scope.
        #[arg(long)]
        project: Option<String>,
    },

    /// Count tokens with a model's tokenizer.
    Tokenize {
        text: String,
        #[arg(long)]
        model: String,
    },

    /// Embedding utilities.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Manage vector collections.
    Collections {
        #[command(subcommand)]
        action: CollectionAction,
    },

    /// Ingest a local file (uploaded) or a URL (fetched by the server).
    Siphon {
        source: String,
        /// `parse`, `extract`, or `enrich`.
        #[arg(long, default_value = "extract", value_parser = parse_action)]
        action: ActionType,
        /// Override content type detection.
        #[arg(long)]
        content_type: Option<String>,
        #[arg(long)]
        use_cache: bool,
    },
}

#[derive(clap::Args)]
struct ParamArgs {
    #[arg(long)]
    model: String,
    #[arg(long)]
    system: Option<String>,
    #[arg(long)]
    max_tokens: Option<u32>,
    #[arg(long)]
    temperature: Option<f32>,
}

impl ParamArgs {
    fn into_params(self) -> GenerationParams {
        let mut params = GenerationParams::new(self.model);
        params.system = self.system;
        params.max_tokens = self.max_tokens;
        params.temperature = self.temperature;
        params
    }
}

#[derive(Subcommand)]
enum EmbedAction {
    /// Embed one string.
    Quick {
        text: String,
        #[arg(long)]
        model: Option<String>,
    },
    /// List configured embedding models.
    Models,
}

#[derive(Subcommand)]
enum CollectionAction {
    List,
    Get {
        name: String,
    },
    Create {
        name: String,
        /// Embedding model recorded on the collection.
        #[arg(long)]
        model: String,
    },
    Delete {
        name: String,
    },
    /// Similarity search by text.
    Query {
        name: String,
        query: String,
        #[arg(short = 'n', long, default_value_t = 10)]
        n_results: usize,
    },
}

fn parse_action(s: &str) -> Result<ActionType, String> {
    match s {
        "parse" => Ok(ActionType::Parse),
        "extract" => Ok(ActionType::Extract),
        "enrich" => Ok(ActionType::Enrich),
        other => Err(format!("unknown action '{}': expected parse, extract, or enrich", other)),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_vars(path: &PathBuf) -> Result<Vec<BTreeMap<String, String>>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read vars file: {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("{} must hold a JSON array of string maps", path.display()))
}

fn siphon_request(
    source: String,
    action: ActionType,
    content_type: Option<String>,
    use_cache: bool,
) -> Result<SiphonRequest> {
    let mut request = if source.starts_with("http://") || source.starts_with("https://") {
        SiphonRequest::url(source, action)
    } else {
        let bytes = std::fs::read(&source).with_context(|| format!("Failed to read {}", source))?;
        let data = base64::engine::general_purpose::STANDARD.encode(bytes);
        SiphonRequest::upload(source, data, action)
    };
    request.content_type = content_type;
    request.params.use_cache = use_cache;
    Ok(request)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg: Config = load_or_default(cli.config.as_deref())?;
    init_logging(&cfg.logging)?;

    if let Commands::Serve = cli.command {
        return run_server(&cfg).await;
    }

    let client = HeadwaterClient::new(&cli.url.unwrap_or_else(default_base_url))?;

    match cli.command {
        Commands::Serve => unreachable!("handled above"),
        Commands::Ping => print_json(&client.ping().await?)?,
        Commands::Status => print_json(&client.status().await?)?,
        Commands::Routes => print_json(&client.list_routes().await?)?,
        Commands::Generate {
            prompt,
            params,
            use_cache,
        } => {
            let options = ConduitOptions {
                use_cache,
                ..ConduitOptions::default()
            };
            let request = GenerationRequest::from_prompt(&prompt, &params.into_params(), &options);
            let response = client.conduit().generate(&request).await?;
            println!("{}", response.content());
        }
        Commands::Batch {
            prompts,
            params,
            template,
            vars,
            use_cache,
            project,
        } => {
            let params = params.into_params();
            let mut request = match (template, vars) {
                (Some(template), Some(vars)) => {
                    BatchRequest::from_template(template, read_vars(&vars)?, params)
                }
                (None, None) => BatchRequest::from_prompts(prompts, params),
                _ => bail!("--template and --vars must be given together"),
            };
            request.options.use_cache = use_cache;
            if let Some(project) = project {
                request.options.project_name = project;
            }
            print_json(&client.conduit().batch(&request).await?)?;
        }
        Commands::Tokenize { text, model } => {
            let request = TokenizationRequest { model, text };
            print_json(&client.conduit().tokenize(&request).await?)?;
        }
        Commands::Embed { action } => match action {
            EmbedAction::Quick { text, model } => {
                let request = QuickEmbeddingRequest { query: text, model };
                print_json(&client.embeddings().quick(&request).await?)?;
            }
            EmbedAction::Models => print_json(&client.embeddings().list_models().await?)?,
        },
        Commands::Collections { action } => {
            let embeddings = client.embeddings();
            match action {
                CollectionAction::List => print_json(&embeddings.list_collections().await?)?,
                CollectionAction::Get { name } => {
                    print_json(&embeddings.get_collection(&name).await?)?
                }
                CollectionAction::Create { name, model } => {
                    let request = CreateCollectionRequest {
                        collection_name: name,
                        embedding_model: model,
                        metadata: BTreeMap::new(),
                    };
                    print_json(&embeddings.create_collection(&request).await?)?
                }
                CollectionAction::Delete { name } => {
                    print_json(&embeddings.delete_collection(&name).await?)?
                }
                CollectionAction::Query {
                    name,
                    query,
                    n_results,
                } => {
                    let request = QueryCollectionRequest {
                        name,
                        query,
                        query_embeddings: None,
                        n_results,
                    };
                    print_json(&embeddings.query_collection(&request).await?)?
                }
            }
        }
        Commands::Siphon {
            source,
            action,
            content_type,
            use_cache,
        } => {
            let request = siphon_request(source, action, content_type, use_cache)?;
            print_json(&client.siphon().process(&request).await?)?;
        }
    }

    Ok(())
}
