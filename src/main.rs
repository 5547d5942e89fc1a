use std::sync::{Arc, RwLock};

use clap::Parser;

mod cli;
mod config;
mod normalize;
mod records;
mod scrape;
mod storage;
#[cfg(test)]
mod tests;
mod web;
mod worker;

use config::Config;
use records::{BackendCsv, RecordCreate, RecordKind, RecordStore};
use scrape::HttpFetcher;
use worker::{handle_job, Job, Worker};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = cli::Args::parse();

    let base_path = config::default_base_path();
    let config = Arc::new(RwLock::new(Config::load_with(&base_path)?));

    let records_path = format!("{base_path}/records.csv");
    let store: Arc<dyn RecordStore> = Arc::new(BackendCsv::load(&records_path)?);

    match args.command {
        cli::Command::Daemon {} => {
            log::info!("starting the og worker, supporting podcasts, episodes and articles");

            let scrape_config = config.read().unwrap().scrape.clone();
            let fetcher = Arc::new(HttpFetcher::new(scrape_config));
            let dump_store = Arc::new(storage::BackendLocal::new(&base_path)?);

            let mut worker = Worker::new(config, store, fetcher, dump_store);
            worker.run_queue();
            web::start_daemon(worker);
            Ok(())
        }

        cli::Command::Scrape { url, kind, update } => {
            let job = Job {
                url,
                kind: RecordKind::parse(&kind),
                update,
            };

            let scrape_config = config.read().unwrap().scrape.clone();
            let fetcher = HttpFetcher::new(scrape_config);

            let outcome = handle_job(&job, store.as_ref(), &fetcher)?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(())
        }

        cli::Command::Record { action } => match action {
            cli::RecordArgs::Add {
                kind,
                url,
                link,
                title,
            } => {
                let record = store.create(RecordCreate {
                    kind: RecordKind::parse(&kind),
                    url,
                    link,
                    title,
                })?;
                println!("{}", serde_json::to_string_pretty(&record)?);
                Ok(())
            }

            cli::RecordArgs::List {} => {
                let records = store.all()?;
                println!("{}", serde_json::to_string_pretty(&records)?);
                Ok(())
            }
        },
    }
}
