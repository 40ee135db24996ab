use crate::demo::{run_calculate, run_demo, run_query, run_resolve};
use crate::infra::{parse_component, parse_date, parse_decimal};
use crate::server;
use cashback::error::AppError;
use cashback::rewards::RewardComponent;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use rust_decimal::Decimal;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "Cashback Engine",
    about = "Resolve merchants, rank card rewards and track quotas from the command line",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Resolve a merchant keyword to ranked channels
    Resolve(ResolveArgs),
    /// List applicable and excluded rewards for one or more channels
    Query(QueryArgs),
    /// Calculate a reward from explicit components or a scheme/payment method
    Calculate(CalculateArgs),
    /// Walk through resolution, ranking and quota accounting on the built-in catalog
    Demo(DemoArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    #[command(flatten)]
    pub(crate) catalog: CatalogArgs,
}

#[derive(Args, Debug, Default, Clone)]
pub(crate) struct CatalogArgs {
    /// Catalog snapshot (JSON). Defaults to CASHBACK_CATALOG_PATH, then the built-in demo catalog.
    #[arg(long = "catalog")]
    pub(crate) path: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub(crate) struct ResolveArgs {
    /// Free-text merchant name, e.g. "全聯" or "uber"
    pub(crate) keyword: String,
    #[command(flatten)]
    pub(crate) catalog: CatalogArgs,
}

#[derive(Args, Debug)]
pub(crate) struct QueryArgs {
    /// Channel ids or keywords
    #[arg(required = true)]
    pub(crate) channels: Vec<String>,
    /// Transaction amount used to estimate rewards
    #[arg(long, value_parser = parse_decimal)]
    pub(crate) amount: Option<Decimal>,
    /// Evaluation date (YYYY-MM-DD). Defaults to today in the configured offset.
    #[arg(long, value_parser = parse_date)]
    pub(crate) as_of: Option<NaiveDate>,
    /// Print the raw JSON result instead of a summary
    #[arg(long)]
    pub(crate) json: bool,
    #[command(flatten)]
    pub(crate) catalog: CatalogArgs,
}

#[derive(Args, Debug)]
pub(crate) struct CalculateArgs {
    /// Transaction amount
    #[arg(long, value_parser = parse_decimal)]
    pub(crate) amount: Decimal,
    /// Reward component as PERCENT[:round|floor|ceil]; repeatable
    #[arg(long = "component", value_parser = parse_component)]
    pub(crate) components: Vec<RewardComponent>,
    /// Scheme to preview against, including its shared-group source
    #[arg(long)]
    pub(crate) scheme: Option<i64>,
    /// Payment method to preview against
    #[arg(long)]
    pub(crate) payment_method: Option<i64>,
    /// Evaluation date (YYYY-MM-DD). Defaults to today in the configured offset.
    #[arg(long, value_parser = parse_date)]
    pub(crate) as_of: Option<NaiveDate>,
    #[command(flatten)]
    pub(crate) catalog: CatalogArgs,
}

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Evaluation date for the walkthrough (defaults to 2025-03-10)
    #[arg(long, value_parser = parse_date)]
    pub(crate) as_of: Option<NaiveDate>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Resolve(args) => run_resolve(args),
        Command::Query(args) => run_query(args),
        Command::Calculate(args) => run_calculate(args),
        Command::Demo(args) => run_demo(args),
    }
}
