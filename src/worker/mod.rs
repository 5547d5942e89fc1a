pub mod handler;
pub mod queue;

pub use handler::{check_eligibility, handle_job, Job, Outcome, SkipReason};
pub use queue::{Status, Task};

use std::sync::{mpsc, Arc, RwLock};

use crate::{
    config::Config, records::RecordStore, scrape::ImageFetcher, storage::StorageManager,
};

/// Owns the scrape worker pool and its collaborators. The store, fetcher and
/// dump storage are injected; their lifecycle is managed by the caller.
pub struct Worker {
    pub store: Arc<dyn RecordStore>,
    fetcher: Arc<dyn ImageFetcher>,
    dump_store: Arc<dyn StorageManager>,

    task_tx: Option<Arc<mpsc::Sender<Task>>>,
    task_queue_handle: Option<std::thread::JoinHandle<()>>,

    config: Arc<RwLock<Config>>,
}

impl Worker {
    pub fn new(
        config: Arc<RwLock<Config>>,
        store: Arc<dyn RecordStore>,
        fetcher: Arc<dyn ImageFetcher>,
        dump_store: Arc<dyn StorageManager>,
    ) -> Self {
        Self {
            store,
            fetcher,
            dump_store,
            task_tx: None,
            task_queue_handle: None,
            config,
        }
    }

    pub fn run_queue(&mut self) {
        let (task_tx, task_rx) = mpsc::channel::<Task>();

        let handle = std::thread::spawn({
            let store = self.store.clone();
            let fetcher = self.fetcher.clone();
            let dump_store = self.dump_store.clone();
            let config = self.config.clone();

            // replay tasks a previous run left unfinished
            let mut queue_dump = queue::read_queue_dump(dump_store.as_ref());
            let task_list = queue_dump.queue.clone();

            queue_dump.queue = Vec::new();
            queue::write_queue_dump(dump_store.as_ref(), &queue_dump);

            std::thread::spawn({
                let task_tx = task_tx.clone();

                move || {
                    for task in task_list {
                        if let Status::Done = task.status {
                            continue;
                        }

                        log::info!("restarting interrupted task {:?}", task.task);
                        if let Err(err) = task_tx.send(task.task) {
                            log::error!("failed to restart interrupted task: {err:?}");
                        }
                    }
                }
            });

            move || {
                queue::start_queue(task_rx, store, fetcher, dump_store, config);
            }
        });

        self.task_queue_handle = Some(handle);
        self.task_tx = Some(Arc::new(task_tx));
    }

    pub fn enqueue(&self, job: Job) -> anyhow::Result<()> {
        let task_tx = self
            .task_tx
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("task queue is not running"))?;

        task_tx
            .send(Task::ScrapePreview { job })
            .map_err(|err| anyhow::anyhow!("failed to enqueue job: {err}"))
    }

    pub fn shutdown(&self) {
        if let Some(task_tx) = self.task_tx.as_ref() {
            if let Err(err) = task_tx.send(Task::Shutdown) {
                log::error!("{err}");
            }
        }
    }

    pub fn wait_task_queue_finish(&mut self) {
        if let Some(handle) = self.task_queue_handle.take() {
            if handle.join().is_err() {
                log::error!("task queue thread panicked");
            }
        }
    }

    pub fn dump_store(&self) -> Arc<dyn StorageManager> {
        self.dump_store.clone()
    }
}
