use clap::{Args, Subcommand};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Create a feed
    Create(CreateCommand),
    /// Post one sample, or a JSON batch with --data
    Post(PostCommand),
    /// Read a time range through the query pipeline
    Data(DataCommand),
    /// Show a feed's record and storage statistics
    Meta(FeedArg),
    /// List the feeds of a user
    List(ListCommand),
    /// Apply a checksummed binary sync file
    Sync(SyncCommand),
    /// Export stored samples as JSON or an Arrow IPC stream
    Export(ExportCommand),
    /// Delete a feed and its data
    Delete(FeedArg),
    /// Print the effective configuration
    Config,
}

#[derive(Args)]
pub struct FeedArg {
    /// Feed id
    #[arg(short, long)]
    pub feed: u32,
}

#[derive(Args)]
pub struct CreateCommand {
    /// Owner user id
    #[arg(short, long)]
    pub user: u32,

    #[arg(long, default_value = "")]
    pub tag: String,

    #[arg(long)]
    pub name: String,

    /// Engine id or name, e.g. 5 or fixed_interval
    #[arg(short, long, default_value = "fixed_interval")]
    pub engine: String,

    /// Slot width in seconds for fixed-interval feeds
    #[arg(short, long)]
    pub interval: Option<i64>,

    #[arg(long, default_value = "")]
    pub unit: String,
}

#[derive(Args)]
pub struct PostCommand {
    #[arg(short, long)]
    pub feed: u32,

    #[arg(long, required_unless_present = "data")]
    pub value: Option<f64>,

    /// Sample time; defaults to now
    #[arg(short, long)]
    pub time: Option<i64>,

    /// JSON array of [time, value] pairs
    #[arg(long, conflicts_with = "value")]
    pub data: Option<String>,

    /// Gap padding for fixed-interval feeds (`join`)
    #[arg(long)]
    pub padding: Option<String>,
}

#[derive(Args)]
pub struct DataCommand {
    #[arg(short, long)]
    pub feed: u32,

    /// Epoch seconds, epoch milliseconds or a date expression
    #[arg(long)]
    pub start: String,

    #[arg(long, default_value = "now")]
    pub end: String,

    /// Seconds (0 auto-sizes) or daily, weekly, monthly, annual
    #[arg(short, long, default_value = "0")]
    pub interval: String,

    #[arg(long)]
    pub average: bool,

    #[arg(long, default_value = "UTC")]
    pub timezone: String,

    #[arg(long, default_value = "unixms")]
    pub timeformat: String,

    #[arg(long)]
    pub skip_missing: bool,

    #[arg(long)]
    pub limit_interval: bool,

    #[arg(long)]
    pub delta: bool,

    /// Decimal places, -1 for no rounding
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    pub dp: i32,

    /// Stream CSV to stdout instead of printing JSON
    #[arg(long)]
    pub csv: bool,
}

#[derive(Args)]
pub struct ListCommand {
    #[arg(short, long)]
    pub user: u32,

    /// Include engine storage statistics
    #[arg(long)]
    pub meta: bool,

    /// Only public feeds
    #[arg(long)]
    pub public: bool,
}

#[derive(Args)]
pub struct SyncCommand {
    /// User the frames are applied for
    #[arg(short, long)]
    pub user: u32,

    pub file: PathBuf,
}

#[derive(Args)]
pub struct ExportCommand {
    #[arg(short, long)]
    pub feed: u32,

    #[arg(long, default_value_t = 0)]
    pub start: i64,

    /// Write an Arrow IPC stream to this file
    #[arg(long, value_name = "FILE")]
    pub arrow: Option<PathBuf>,
}
