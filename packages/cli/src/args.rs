use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};

use blockframe_protocol::{BlockIdentity, BlockKind, ContentContext};

/// Blockframe - inspect Block bundles, stores and diffs
#[derive(Parser, Debug)]
#[command(name = "blockframe")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Config file. Defaults to <config dir>/blockframe/config.toml
    #[arg(long, global = true, env = "BLOCKFRAME_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Resolve a Block bundle and list or extract its files
    Bundle(BundleArgs),

    /// Read and write a Block's stored values
    Store {
        #[command(flatten)]
        scope: ScopeArgs,

        #[command(subcommand)]
        action: StoreAction,
    },

    /// Show a unified diff between two files
    Diff {
        old: PathBuf,
        new: PathBuf,

        /// Context lines around each change
        #[arg(short = 'U', long, default_value_t = 3)]
        context: usize,

        /// Colorize the output
        #[arg(long)]
        color: bool,
    },

    /// Print the effective configuration
    Config,
}

#[derive(ClapArgs, Debug)]
pub struct BundleArgs {
    /// Block as owner/repo/id
    #[arg(value_parser = block_ref)]
    pub block: BlockRef,

    #[arg(long, value_enum, default_value_t = KindArg::File)]
    pub kind: KindArg,

    /// Write the bundle files into this directory
    #[arg(long)]
    pub out: Option<PathBuf>,

    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub token: Option<String>,
}

#[derive(ClapArgs, Debug)]
pub struct ScopeArgs {
    /// Block as owner/repo/id
    #[arg(long, value_parser = block_ref)]
    pub block: BlockRef,

    #[arg(long, value_enum, default_value_t = KindArg::File)]
    pub kind: KindArg,

    /// Repository the Block is viewing, as owner/repo
    #[arg(long, value_parser = repo_ref)]
    pub repo: RepoRef,

    /// Store directory. Overrides store.dir from the config
    #[arg(long)]
    pub dir: Option<PathBuf>,
}

impl ScopeArgs {
    pub fn identity(&self) -> BlockIdentity {
        self.block.identity(self.kind)
    }

    pub fn context(&self) -> ContentContext {
        ContentContext::new(&self.repo.owner, &self.repo.repo, "", "HEAD")
    }
}

#[derive(Subcommand, Debug)]
pub enum StoreAction {
    Get { key: String },
    /// Store a value. Input that is not JSON is stored as a string
    Set { key: String, value: String },
    Delete { key: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    File,
    Folder,
}

impl From<KindArg> for BlockKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::File => BlockKind::File,
            KindArg::Folder => BlockKind::Folder,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRef {
    pub owner: String,
    pub repo: String,
    pub id: String,
}

impl BlockRef {
    pub fn identity(&self, kind: KindArg) -> BlockIdentity {
        BlockIdentity::new(&self.owner, &self.repo, &self.id, kind.into())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub owner: String,
    pub repo: String,
}

fn slug<const N: usize>(raw: &str, shape: &str) -> Result<[String; N], String> {
    let parts: Vec<&str> = raw.split('/').collect();
    if parts.len() != N || parts.iter().any(|part| part.is_empty()) {
        return Err(format!("expected {shape}, got {raw:?}"));
    }
    let parts: Vec<String> = parts.into_iter().map(str::to_string).collect();
    parts
        .try_into()
        .map_err(|_| format!("expected {shape}, got {raw:?}"))
}

fn block_ref(raw: &str) -> Result<BlockRef, String> {
    let [owner, repo, id] = slug::<3>(raw, "owner/repo/id")?;
    Ok(BlockRef { owner, repo, id })
}

fn repo_ref(raw: &str) -> Result<RepoRef, String> {
    let [owner, repo] = slug::<2>(raw, "owner/repo")?;
    Ok(RepoRef { owner, repo })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn parses_block_refs() {
        assert_eq!(
            block_ref("acme/blocks/notes").unwrap(),
            BlockRef {
                owner: "acme".into(),
                repo: "blocks".into(),
                id: "notes".into(),
            }
        );
        assert!(block_ref("acme/blocks").is_err());
        assert!(block_ref("acme//notes").is_err());
        assert!(repo_ref("octo/hello/extra").is_err());
    }

    #[test]
    fn store_scope_from_flags() {
        let args = Args::try_parse_from([
            "blockframe",
            "store",
            "--block",
            "acme/blocks/tree",
            "--kind",
            "folder",
            "--repo",
            "octo/hello",
            "get",
            "theme",
        ])
        .unwrap();
        let Command::Store { scope, action } = args.command else {
            panic!("expected store");
        };
        assert_eq!(scope.identity().kind, BlockKind::Folder);
        assert_eq!(scope.context().repo, "hello");
        assert!(matches!(action, StoreAction::Get { key } if key == "theme"));
    }
}
