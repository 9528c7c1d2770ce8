use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use beacon_lake::config::ConfigLoader;
use beacon_lake::domain::{EntityQuery, EntityType, Filter, Granularity, IncludeResultsetResponses, Pagination};
use beacon_lake::error::BeaconError;
use beacon_lake::output::JsonOutput;
use beacon_lake::service::{LakeBeacon, VariantQuery};
use beacon_lake::variants::SearchCriteria;

#[derive(Parser)]
#[command(name = "beacon-lake")]
#[command(about = "Beacon v2 queries over a relational genomics metadata lake")]
#[command(version, author)]
struct Cli {
    /// Config file (default: ./beacon-lake.json)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Search one entity collection")]
    Query(QueryArgs),
    #[command(about = "Search entities owned by one parent record")]
    Related(RelatedArgs),
    #[command(about = "List filtering terms of an entity collection")]
    Terms(TermsArgs),
    #[command(about = "Run (or fetch the cached result of) a variant search")]
    Variants(VariantArgs),
    #[command(about = "Show the job record of a variant search")]
    Job(JobArgs),
}

#[derive(Args, Clone)]
struct EnvelopeArgs {
    /// Ontology filter, `ID` or `ID@scope`; repeatable
    #[arg(long = "filter")]
    filters: Vec<Filter>,

    #[arg(long, value_enum, default_value_t = Granularity::Boolean)]
    granularity: Granularity,

    #[arg(long, default_value_t = 0)]
    skip: u64,

    #[arg(long, default_value_t = 100)]
    limit: u64,

    #[arg(long, value_enum, default_value_t = IncludeResultsetResponses::None)]
    include_resultset_responses: IncludeResultsetResponses,
}

impl EnvelopeArgs {
    fn into_query(self) -> EntityQuery {
        EntityQuery {
            filters: self.filters,
            granularity: self.granularity,
            pagination: Pagination {
                skip: self.skip,
                limit: self.limit,
            },
            include_resultset_responses: self.include_resultset_responses,
        }
    }
}

#[derive(Args)]
struct QueryArgs {
    #[arg(value_enum)]
    entity: EntityType,

    #[command(flatten)]
    envelope: EnvelopeArgs,
}

#[derive(Args)]
struct RelatedArgs {
    #[arg(value_enum)]
    parent: EntityType,

    id: String,

    #[arg(value_enum)]
    target: EntityType,

    #[command(flatten)]
    envelope: EnvelopeArgs,
}

#[derive(Args)]
struct TermsArgs {
    #[arg(value_enum)]
    entity: EntityType,

    #[arg(long, default_value_t = 0)]
    skip: u64,

    #[arg(long, default_value_t = 100)]
    limit: u64,
}

#[derive(Args)]
struct VariantArgs {
    #[arg(long)]
    query_id: String,

    #[arg(long)]
    assembly_id: String,

    #[arg(long)]
    reference_name: String,

    #[arg(long)]
    reference_bases: Option<String>,

    #[arg(long)]
    alternate_bases: Option<String>,

    #[arg(long, num_args = 1..=2, required = true)]
    start: Vec<u64>,

    #[arg(long, num_args = 1..=2)]
    end: Vec<u64>,

    #[arg(long)]
    variant_type: Option<String>,

    #[arg(long, default_value_t = 0)]
    variant_min_length: u64,

    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    variant_max_length: i64,

    #[command(flatten)]
    envelope: EnvelopeArgs,
}

#[derive(Args)]
struct JobArgs {
    query_id: String,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<BeaconError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &BeaconError) -> u8 {
    match error {
        BeaconError::InvalidFilterScope(_)
        | BeaconError::InvalidTermId(_)
        | BeaconError::InvalidIdentifier(_)
        | BeaconError::MissingConfig
        | BeaconError::ConfigRead(_)
        | BeaconError::ConfigParse(_) => 2,
        BeaconError::ExecutionFailed { .. }
        | BeaconError::EngineHttp(_)
        | BeaconError::EngineStatus { .. }
        | BeaconError::ResultRead(_)
        | BeaconError::JobOrchestration { .. }
        | BeaconError::VariantSearchHttp(_)
        | BeaconError::VariantSearchStatus { .. }
        | BeaconError::VariantSearch(_) => 3,
        BeaconError::ExecutionTimeout { .. } => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let beacon = LakeBeacon::from_config(&config)?;

    match cli.command {
        Command::Query(args) => {
            let response = beacon.search_entities(args.entity, &args.envelope.into_query())?;
            JsonOutput::print_response(&response).into_diagnostic()
        }
        Command::Related(args) => {
            let response = beacon.search_related(
                args.parent,
                &args.id,
                args.target,
                &args.envelope.into_query(),
            )?;
            JsonOutput::print_response(&response).into_diagnostic()
        }
        Command::Terms(args) => {
            let pagination = Pagination {
                skip: args.skip,
                limit: args.limit,
            };
            let response = beacon.filtering_terms(args.entity, pagination)?;
            JsonOutput::print_filtering_terms(&response).into_diagnostic()
        }
        Command::Variants(args) => run_variants(&beacon, args),
        Command::Job(args) => {
            let record = beacon.job_status(&args.query_id)?;
            JsonOutput::print_job(record.as_ref()).into_diagnostic()
        }
    }
}

fn run_variants(beacon: &LakeBeacon, args: VariantArgs) -> miette::Result<()> {
    let VariantArgs {
        query_id,
        assembly_id,
        reference_name,
        reference_bases,
        alternate_bases,
        start,
        end,
        variant_type,
        variant_min_length,
        variant_max_length,
        envelope,
    } = args;

    let request = VariantQuery {
        assembly_id,
        criteria: SearchCriteria {
            reference_name,
            reference_bases,
            alternate_bases,
            start,
            end,
            variant_type,
            variant_min_length,
            variant_max_length,
        },
        query: envelope.into_query(),
    };
    let response = beacon.search_variants(&query_id, &request)?;
    if response.cached {
        tracing::info!(query_id = %query_id, "answered from job cache");
    }
    JsonOutput::print_variants(&response).into_diagnostic()
}
