use clap::Parser;

pub const LOGO: &str = r#"
   ___              _   _
  / __| ___  _  _ __| |_ | |_  _ __   __ ___ __ __
  \__ \/ _ \| || |/ _|  _|| ' \| '_ \ / _` \ V  V /
  |___/\___/ \_,_|\__|\__||_||_| .__/ \__,_|\_/\_/
                                |_|
"#;

/// CLI surface from spec §6: config/relations are required, every action
/// selector is optional and actions may combine. Side effects run in the
/// fixed order restore -> delete-backup/state -> build -> run, matching the
/// spec's "order of side-effects" note.
#[derive(Parser, Debug)]
#[command(author, version, name = "southpaw")]
#[command(about = LOGO, long_about = None)]
pub struct Cli {
    /// Path to the YAML engine configuration file (spec §6 config table).
    #[arg(short = 'c', long)]
    pub config: String,

    /// Path to a JSON relations file; may be repeated to load multiple
    /// root trees into one engine.
    #[arg(short = 'r', long = "relations", required = true)]
    pub relations: Vec<String>,

    /// Directory the embedded state store opens its `state/`/`backup/`
    /// subdirectories under.
    #[arg(long, default_value = "./southpaw-data")]
    pub state_dir: String,

    /// Opens the state store and indices, validates every relation tree,
    /// and exits without consuming any stream. Does not require a live
    /// Kafka cluster.
    #[arg(long)]
    pub build: bool,

    /// Restores the state store from its most recent backup before any
    /// other action.
    #[arg(long)]
    pub restore: bool,

    /// Deletes the on-disk live state before building/running.
    #[arg(long)]
    pub delete_state: bool,

    /// Deletes all on-disk backups before building/running.
    #[arg(long)]
    pub delete_backup: bool,

    /// Runs `ReversibleIndex::verify` over every configured index and
    /// reports invariant-1 violations instead of running the engine.
    #[arg(long)]
    pub verify_state: bool,

    /// Kafka bootstrap servers, required unless `--build` is passed.
    #[cfg(feature = "kafka")]
    #[arg(long, default_value = "localhost:9092")]
    pub bootstrap_servers: String,

    /// Kafka consumer group id shared by every input stream this process
    /// owns.
    #[cfg(feature = "kafka")]
    #[arg(long, default_value = "southpaw")]
    pub group_id: String,
}
