use bson::{Bson, Document};
use clap::{Parser, Subcommand};
use snacktrack::query::translate::{self, TranslateOptions};
use snacktrack::query::{AggregateKeys, Filters, GroupKeys, OperatorPolicy, Updates};
use snacktrack::{Config, DbError};
use std::io::Read;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "snacktrack", version, about = "Translate Query Model JSON into MongoDB syntax", long_about = None)]
struct Cli {
    #[arg(long, help = "Path to a config file (TOML). If omitted, the usual locations are searched.")]
    config: Option<PathBuf>,
    #[arg(long, help = "Fail on unknown or disallowed operators instead of dropping them")]
    strict: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(name = "translate-filter", about = "Print the native filter for a Filters JSON array")]
    TranslateFilter {
        #[arg(help = "Filters JSON, or - to read stdin")]
        filters: String,
        #[arg(long, value_enum, default_value_t = FilterMode::Find)]
        mode: FilterMode,
    },
    #[command(name = "translate-update", about = "Print the native update for an Updates JSON array")]
    TranslateUpdate {
        #[arg(help = "Updates JSON, or - to read stdin")]
        updates: String,
        #[arg(long, help = "Translate as an upsert ($set of every entry)")]
        upsert: bool,
    },
    #[command(about = "Print the $match/$group pipeline")]
    Pipeline {
        #[arg(long, default_value = "[]")]
        filters: String,
        #[arg(long, default_value = "[]")]
        group: String,
        #[arg(long, default_value = "[]")]
        aggregate: String,
    },
    #[command(about = "Print the resolved configuration (connection string redacted)")]
    Config,
    #[cfg(feature = "mongodb")]
    #[command(about = "Connect to the configured MongoDB deployment and ping it")]
    Ping,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum FilterMode {
    Find,
    Upsert,
    Replace,
}

fn read_arg(arg: &str) -> Result<String, DbError> {
    if arg == "-" {
        let mut s = String::new();
        std::io::stdin().read_to_string(&mut s)?;
        Ok(s)
    } else {
        Ok(arg.to_string())
    }
}

fn print_doc(doc: Document) -> Result<(), DbError> {
    println!("{}", serde_json::to_string_pretty(&Bson::Document(doc).into_relaxed_extjson())?);
    Ok(())
}

fn run(cli: Cli) -> Result<(), DbError> {
    let cfg = Config::load(cli.config.as_deref())?;
    init_logging(&cfg);
    let mut opts: TranslateOptions = cfg.translate_options();
    if cli.strict {
        opts.operators = OperatorPolicy::Strict;
    }

    match cli.command {
        Commands::TranslateFilter { filters, mode } => {
            let filters: Filters = serde_json::from_str(&read_arg(&filters)?)?;
            let doc = match mode {
                FilterMode::Find => translate::filters_to_document(&filters, &opts)?,
                FilterMode::Upsert => translate::upsert_filter(&filters, &opts)?,
                FilterMode::Replace => translate::replace_filter(&filters, &opts)?,
            };
            print_doc(doc)
        }
        Commands::TranslateUpdate { updates, upsert } => {
            let updates: Updates = serde_json::from_str(&read_arg(&updates)?)?;
            let doc = if upsert {
                translate::upsert_update(&updates, &opts)?
            } else {
                translate::updates_to_document(&updates, &opts)?
            };
            print_doc(doc)
        }
        Commands::Pipeline { filters, group, aggregate } => {
            let filters: Filters = serde_json::from_str(&read_arg(&filters)?)?;
            let group: GroupKeys = serde_json::from_str(&group)?;
            let aggregate: AggregateKeys = serde_json::from_str(&aggregate)?;
            let stages = translate::aggregate_pipeline(&filters, &group, &aggregate, &opts)?;
            let out: Vec<serde_json::Value> =
                stages.into_iter().map(|d| Bson::Document(d).into_relaxed_extjson()).collect();
            println!("{}", serde_json::to_string_pretty(&out)?);
            Ok(())
        }
        Commands::Config => {
            println!("database: {}", cfg.database);
            println!("users_collection: {}", cfg.users_collection);
            println!("mongo_uri: {}", if cfg.mongo_uri.is_some() { "<set>" } else { "<unset>" });
            println!("operators: {:?}", opts.operators);
            println!("duplicate_filter_keys: {:?}", opts.duplicate_keys);
            println!("timeout_ms: {}", cfg.timeout_ms.map_or_else(|| "none".to_string(), |t| t.to_string()));
            Ok(())
        }
        #[cfg(feature = "mongodb")]
        Commands::Ping => {
            let uri = cfg.require_mongo_uri()?.to_string();
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(snacktrack::store::MongoStore::connect(&uri, &cfg.database))?;
            println!("ok: {}", cfg.database);
            Ok(())
        }
    }
}

fn init_logging(cfg: &Config) {
    let res = if std::env::var_os("SNACKTRACK_LOG_DIR").is_some() {
        snacktrack::logger::configure_from_env()
    } else if let Some(dir) = cfg.log_dir.as_deref() {
        snacktrack::logger::configure_logging(Some(dir), cfg.log_level.as_deref(), None)
    } else {
        return;
    };
    if let Err(e) = res {
        eprintln!("warning: logging disabled: {e}");
    }
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
