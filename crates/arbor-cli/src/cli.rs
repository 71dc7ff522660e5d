use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use arbor_repo::lexicon::SYSTEM_USER;
use arbor_repo::{KeywordCriteria, ValueType};

#[derive(Parser)]
#[command(
    name = "arbor",
    about = "Arbor: a hierarchical typed node repository",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Repository directory
    #[arg(long, global = true, default_value = "./.arbor")]
    pub repo: PathBuf,

    /// User the transaction runs as
    #[arg(short, long, global = true, default_value = SYSTEM_USER)]
    pub user: String,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create a durable repository and its reserved folders
    Init(InitArgs),
    /// Add a child node
    Add(AddArgs),
    /// Remove nodes and their descendants
    Rm(RmArgs),
    /// Show a node and its properties
    Get(GetArgs),
    /// List the children of a node
    Ls(LsArgs),
    /// Set a single-valued property
    Set(SetArgs),
    /// Search committed nodes
    Search(SearchArgs),
    /// Show the user's workspace home, creating it on first use
    Home,
    /// Compact the write-ahead log into a snapshot
    Checkpoint,
}

#[derive(Args)]
pub struct InitArgs {
    /// Overwrite an existing `arbor.toml`
    #[arg(long)]
    pub force: bool,
}

#[derive(Args)]
pub struct AddArgs {
    /// Parent path; relative paths resolve in the user's home
    pub parent: String,
    pub name: String,
    /// Primary type of the new node
    #[arg(short = 't', long = "type")]
    pub node_type: Option<String>,
}

#[derive(Args)]
pub struct RmArgs {
    #[arg(required = true)]
    pub paths: Vec<String>,
}

#[derive(Args)]
pub struct GetArgs {
    pub path: String,
}

#[derive(Args)]
pub struct LsArgs {
    #[arg(default_value = "/")]
    pub path: String,
    /// Only children whose name matches one of these `*` patterns
    #[arg(short, long = "name")]
    pub names: Vec<String>,
}

#[derive(Args)]
pub struct SetArgs {
    pub path: String,
    pub property: String,
    pub value: String,
    /// Value type used to parse `value`
    #[arg(short = 't', long = "type", default_value = "string")]
    pub value_type: ValueType,
}

#[derive(Args)]
pub struct SearchArgs {
    #[command(subcommand)]
    pub by: SearchBy,
}

#[derive(Subcommand)]
pub enum SearchBy {
    /// Nodes of a primary type
    Type { type_name: String },
    /// A path, or a pattern using `*` and `**`
    Path { pattern: String },
    /// Nodes of a type whose property text contains the keywords
    Keyword {
        type_name: String,
        property: String,
        #[arg(required = true)]
        keywords: Vec<String>,
        /// ANY, ALL or NONE
        #[arg(short, long, default_value = "ANY")]
        criteria: KeywordCriteria,
    },
}
