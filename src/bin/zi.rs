use std::fs;
use std::path::{Path, PathBuf};

use clap::AppSettings::UseLongFormatForHelpSubcommand;
use clap::{Args, Parser, Subcommand};
use log::LevelFilter;

use zi_core::arch::parse_architecture;
use zi_core::config::Config;
use zi_core::digest::ManifestDigest;
use zi_core::error::{Error, Result};
use zi_core::feed::{
    Dependency, Feed, Group, GroupChild, Importance, InheritedAttributes, RawImplementation,
    Stability,
};
use zi_core::interfaces::{DefaultPreferencesStore, FeedProvider, Handler, NullHandler};
use zi_core::requirements::Requirements;
use zi_core::solver::Solver;
use zi_core::store::{ArchiveFormat, ArchiveSource, DirStore, ImplementationStore};
use zi_core::version::Version;

/// A CLI for solving and fetching Zero Install-style implementations
#[derive(Debug, Parser)]
#[clap(name = "zi", author = "Zero Install Core Contributors", version)]
#[clap(setting(UseLongFormatForHelpSubcommand))]
pub struct ZiArgs {
    /// Root of the content-addressed implementation store
    ///
    /// Defaults to `$ZI_STORE_ROOT`, or the platform data directory.
    #[clap(long, value_name = "STORE_ROOT")]
    pub store_root: Option<PathBuf>,

    /// Suppress error messages and other command specific logging
    #[clap(short, long)]
    pub quiet: bool,

    /// Increase log level
    #[clap(short = 'V', long)]
    pub verbose: bool,

    /// Disable all output styling
    #[clap(short = 'S', long)]
    pub no_styles: bool,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Operate on the content-addressed implementation store
    Store(StoreCmd),
    /// Solve a set of requirements against a local feed cache
    Solve(SolveCmd),
}

#[derive(Args, Debug)]
pub struct StoreCmd {
    #[clap(subcommand)]
    pub action: StoreAction,
}

#[derive(Subcommand, Debug)]
pub enum StoreAction {
    /// Add a directory's contents to the store under its manifest digest
    Add {
        /// Directory to adopt into the store
        source: PathBuf,
        /// The digest the adopted content must match, `algo=value`
        digest: String,
    },
    /// Extract archives into the store under a declared digest
    AddArchives {
        /// Expected digest, `algo=value`
        digest: String,
        /// Archive paths; format is inferred from the file extension
        archives: Vec<PathBuf>,
    },
    /// Re-manifest an entry and compare it against its digest
    Verify {
        digest: String,
    },
    /// List every digest currently in the store
    List,
    /// Remove an entry from the store
    Remove {
        digest: String,
    },
    /// Hardlink-dedup identical file content across entries
    Optimise,
}

#[derive(Args, Debug)]
pub struct SolveCmd {
    /// Root interface id to solve for
    pub interface: String,

    /// Directory of cached feed documents (see `LocalFeedCache`'s format)
    #[clap(long, value_name = "DIR")]
    pub feed_cache: PathBuf,

    /// Command to select within the resolved root implementation
    #[clap(long)]
    pub command: Option<String>,

    /// Network use policy for this solve: `full`, `minimal`, or `offline`.
    /// Overrides `--network`'s historical on/off shorthand when given.
    #[clap(long, value_name = "POLICY")]
    pub network_use: Option<String>,

    /// Shorthand for `--network-use=full` (kept for compatibility)
    #[clap(long)]
    pub network: bool,

    /// Lower the effective stability floor to `testing` for every interface
    #[clap(long)]
    pub help_with_testing: bool,
}

fn main() {
    let args = ZiArgs::parse();

    let log_level = if args.quiet {
        LevelFilter::Off
    } else if args.verbose {
        LevelFilter::Info
    } else {
        LevelFilter::Warn
    };

    env_logger::builder()
        .filter_level(log_level)
        .format_timestamp(None)
        .format_module_path(false)
        .format_target(false)
        .init();

    let mut no_styles = args.no_styles;
    if atty::isnt(atty::Stream::Stdout) {
        no_styles = true;
    }

    let config = Config {
        store_root: args.store_root.clone().unwrap_or_else(zi_core::config::default_store_root),
        ..Config::default()
    };

    let result = match args.command {
        Command::Store(cmd) => run_store(&config, cmd),
        Command::Solve(cmd) => run_solve(&config, cmd),
    };

    if let Err(err) = result {
        print_error(&err, no_styles);
        std::process::exit(1);
    }
}

fn print_error(err: &Error, no_styles: bool) {
    if no_styles {
        eprintln!("error: {err}");
    } else {
        eprintln!("{} {err}", ansi_term::Colour::Red.bold().paint("error:"));
    }
}

fn parse_digest(raw: &str) -> Result<ManifestDigest> {
    zi_core::digest::parse_store_name(raw)
        .map(|(algo, value)| ManifestDigest::single(algo, value))
        .ok_or_else(|| Error::InvalidDigestName {
            value: raw.to_string(),
        })
}

fn run_store(config: &Config, cmd: StoreCmd) -> Result<()> {
    let store = DirStore::new(config.store_root.clone());
    let handler = NullHandler;

    match cmd.action {
        StoreAction::Add { source, digest } => {
            let digest = parse_digest(&digest)?;
            let path = store.add_directory(&source, &digest, &handler)?;
            println!("{}", path.display());
        }
        StoreAction::AddArchives { digest, archives } => {
            let digest = parse_digest(&digest)?;
            let sources: Vec<ArchiveSource> = archives
                .iter()
                .map(|path| ArchiveSource::new(path.clone(), format_for(path)))
                .collect();
            let path = store.add_archives(&sources, &digest, &handler)?;
            println!("{}", path.display());
        }
        StoreAction::Verify { digest } => {
            let digest = parse_digest(&digest)?;
            store.verify(&digest, &handler)?;
            println!("ok");
        }
        StoreAction::List => {
            for digest in store.list_all()? {
                if let Some(name) = digest.preferred_store_name() {
                    println!("{name}");
                }
            }
        }
        StoreAction::Remove { digest } => {
            let digest = parse_digest(&digest)?;
            store.remove(&digest)?;
        }
        StoreAction::Optimise => {
            let saved = store.optimise()?;
            println!("{saved} bytes saved");
        }
    }
    Ok(())
}

fn format_for(path: &Path) -> ArchiveFormat {
    let name = path.to_string_lossy();
    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        ArchiveFormat::TarGz
    } else if name.ends_with(".tar.bz2") {
        ArchiveFormat::TarBz2
    } else if name.ends_with(".tar") {
        ArchiveFormat::Tar
    } else {
        ArchiveFormat::Zip
    }
}

fn run_solve(config: &Config, cmd: SolveCmd) -> Result<()> {
    let feed_provider = LocalFeedCache::new(cmd.feed_cache);
    let preferences = DefaultPreferencesStore;
    let handler = CliHandler;

    let network_use = match &cmd.network_use {
        Some(raw) => parse_network_use(raw)?,
        None if cmd.network => zi_core::config::NetworkUse::Full,
        None => config.network_use,
    };
    let help_with_testing = cmd.help_with_testing || config.help_with_testing;

    let solver = Solver::new(&feed_provider, &preferences, &handler, network_use.allows_network(), |_| false)
        .with_help_with_testing(help_with_testing);
    let requirements = Requirements::new(cmd.interface);
    let selections = solver.solve(&requirements, cmd.command.as_deref())?;

    print!("{selections}");
    Ok(())
}

fn parse_network_use(raw: &str) -> Result<zi_core::config::NetworkUse> {
    use zi_core::config::NetworkUse;
    match raw {
        "full" => Ok(NetworkUse::Full),
        "minimal" => Ok(NetworkUse::Minimal),
        "offline" => Ok(NetworkUse::Offline),
        other => Err(Error::InvalidArgument {
            flag: "network-use".to_string(),
            value: other.to_string(),
            details: "expected one of 'full', 'minimal', 'offline'".to_string(),
        }),
    }
}

struct CliHandler;

impl Handler for CliHandler {
    fn is_cancelled(&self) -> bool {
        false
    }

    fn run_task(&self, description: &str) {
        log::info!("{description}");
    }
}

/// A `FeedProvider` reading interface feeds from a local directory of
/// `label: value` documents, one file per interface.
///
/// This is a CLI convenience, not a Zero Install feed reader: real feed
/// retrieval (XML parsing, GPG signature verification, network fetch) is
/// explicitly out of scope for `zi_core` (see `zi_core::interfaces`) and
/// is left to a caller's own `FeedProvider`. The format here exists only
/// so this binary has something concrete to solve against:
///
/// ```text
/// interface: https://example.org/app.xml
/// impl: app-1
/// version: 1.2.3
/// arch: Linux-x86_64
/// stability: stable
/// digest: sha256=...
/// main: bin/app
/// depends: https://example.org/lib.xml
/// ```
///
/// `impl:` starts a new implementation block; every following line until
/// the next `impl:` (or end of file) applies to it. `interface:` applies
/// to the whole file and may appear anywhere.
struct LocalFeedCache {
    dir: PathBuf,
}

impl LocalFeedCache {
    fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn feed_path(&self, feed_id: &str) -> PathBuf {
        self.dir.join(cache_file_name(feed_id))
    }
}

fn cache_file_name(feed_id: &str) -> String {
    feed_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect()
}

impl FeedProvider for LocalFeedCache {
    fn get(&self, feed_id: &str) -> Result<Feed> {
        let path = self.feed_path(feed_id);
        let text = fs::read_to_string(&path).map_err(|_| Error::FeedUnavailable {
            feed_id: feed_id.to_string(),
        })?;
        parse_local_feed(feed_id, &text)
    }
}

fn parse_local_feed(feed_id: &str, text: &str) -> Result<Feed> {
    let mut implementations = Vec::new();
    let mut current: Option<RawImplementation> = None;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((label, value)) = line.split_once(':') else {
            continue;
        };
        let label = label.trim();
        let value = value.trim();

        match label {
            "interface" => continue,
            "impl" => {
                if let Some(finished) = current.take() {
                    implementations.push(finished);
                }
                current = Some(RawImplementation {
                    id: value.to_string(),
                    attributes: InheritedAttributes::default(),
                    digest: ManifestDigest::default(),
                    dependencies: Vec::new(),
                    main: None,
                });
            }
            "version" | "arch" | "stability" | "digest" | "main" | "depends" => {
                let Some(raw) = current.as_mut() else { continue };
                apply_field(raw, label, value)?;
            }
            _ => {}
        }
    }
    if let Some(finished) = current.take() {
        implementations.push(finished);
    }

    Ok(Feed {
        interface: feed_id.to_string(),
        root: Group {
            attributes: InheritedAttributes::default(),
            children: implementations.into_iter().map(GroupChild::Implementation).collect(),
        },
    })
}

fn apply_field(raw: &mut RawImplementation, label: &str, value: &str) -> Result<()> {
    match label {
        "version" => raw.attributes.version = Some(Version::parse(value)?),
        "arch" => raw.attributes.arch = parse_architecture(value),
        "stability" => raw.attributes.stability = parse_stability(value),
        "digest" => {
            if let Some((algo, hex)) = zi_core::digest::parse_store_name(value) {
                raw.digest = ManifestDigest::single(algo, hex);
            }
        }
        "main" => raw.main = Some(value.to_string()),
        "depends" => raw.dependencies.push(Dependency {
            interface: value.to_string(),
            restrictions: Vec::new(),
            importance: Importance::Essential,
        }),
        _ => {}
    }
    Ok(())
}

fn parse_stability(value: &str) -> Option<Stability> {
    match value {
        "insecure" => Some(Stability::Insecure),
        "buggy" => Some(Stability::Buggy),
        "developer" => Some(Stability::Developer),
        "testing" => Some(Stability::Testing),
        "stable" => Some(Stability::Stable),
        "packaged" => Some(Stability::Packaged),
        "preferred" => Some(Stability::Preferred),
        _ => None,
    }
}
