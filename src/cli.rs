use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start previewd as a service: job intake API plus the scrape worker pool.
    Daemon {},

    /// Run a single scrape job in the foreground and print the outcome.
    Scrape {
        /// page url carried by the job
        url: String,

        /// record kind: article, podcast or episode (unknown kinds fall back
        /// to article)
        #[clap(short, long, default_value = "article")]
        kind: String,

        /// refresh the image even if the record already has one
        #[clap(short, long, default_value = "false")]
        update: bool,
    },

    /// Manage content records
    Record {
        #[clap(subcommand)]
        action: RecordArgs,
    },
}

#[derive(Subcommand, Debug)]
pub enum RecordArgs {
    /// Seed a record into the local store
    Add {
        /// record kind: article, podcast or episode
        kind: String,

        /// natural-key url of the record
        url: String,

        /// page link (episodes are looked up by link)
        #[clap(short, long)]
        link: Option<String>,

        /// record title
        #[clap(short, long)]
        title: Option<String>,
    },

    /// List all records
    List {},
}
