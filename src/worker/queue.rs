use std::{
    sync::{
        atomic::{AtomicU16, Ordering},
        mpsc, Arc, RwLock,
    },
    thread::sleep,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use rand::random;
use serde::{Deserialize, Serialize};

use crate::{
    config::Config,
    records::RecordStore,
    scrape::ImageFetcher,
    storage::StorageManager,
    worker::handler::{self, Job, Outcome},
};

const QUEUE_DUMP_FILE: &str = "task-queue.json";

pub fn now() -> u128 {
    let start = SystemTime::now();
    let since_the_epoch = start
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards");
    since_the_epoch.as_millis()
}

pub fn throttle(counter: &Arc<AtomicU16>, config: &Arc<RwLock<Config>>) {
    while counter.load(Ordering::Relaxed) >= config.read().unwrap().task_queue_max_threads {
        sleep(Duration::from_millis(100));
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Status {
    Interrupted,
    Pending,
    InProgress,
    Done,
    Error(String),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Task {
    /// request to scrape a preview image for a record
    ScrapePreview { job: Job },

    /// request to gracefully shutdown the task queue
    Shutdown,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskDump {
    pub id: String,
    pub task: Task,
    pub status: Status,
    #[serde(default)]
    pub attempt: u8,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueDump {
    pub queue: Vec<TaskDump>,
    pub now: u128,
}

impl Task {
    pub fn run(&self, store: Arc<dyn RecordStore>, fetcher: Arc<dyn ImageFetcher>) -> Status {
        match self {
            Task::ScrapePreview { job } => {
                log::debug!("picked up a job...");
                match handler::handle_job(job, store.as_ref(), fetcher.as_ref()) {
                    // a failed persist is the one outcome worth handing to
                    // the retry path; scrape failures wont change on retry
                    Ok(Outcome::PersistFailed { reason }) => Status::Error(reason),
                    Ok(_) => Status::Done,
                    Err(err) => {
                        // a single bad job must never wedge the queue
                        log::warn!("og job {job:?} broke with err {err}");
                        Status::Done
                    }
                }
            }
            Task::Shutdown => unreachable!(),
        }
    }
}

pub fn start_queue(
    task_rx: mpsc::Receiver<Task>,
    store: Arc<dyn RecordStore>,
    fetcher: Arc<dyn ImageFetcher>,
    dump_store: Arc<dyn StorageManager>,
    config: Arc<RwLock<Config>>,
) {
    let thread_ctr = Arc::new(AtomicU16::new(0));

    log::debug!("waiting for job");
    while let Ok(task) = task_rx.recv() {
        log::debug!("got the job");
        let store = store.clone();
        let fetcher = fetcher.clone();
        let thread_counter = thread_ctr.clone();

        let config = config.clone();

        // graceful shutdown
        if let Task::Shutdown = &task {
            log::info!(
                "draining queue, {} tasks in flight",
                thread_counter.load(Ordering::Relaxed)
            );
            while thread_counter.load(Ordering::Relaxed) > 0 {
                sleep(Duration::from_millis(100));
            }
            return;
        };

        let id = save_task(dump_store.as_ref(), task.clone(), Status::Pending);
        let task_handle = std::thread::spawn({
            let thread_counter = thread_counter.clone();
            let id = id.clone();
            let dump_store = dump_store.clone();
            move || {
                throttle(&thread_counter, &config);

                thread_counter.fetch_add(1, Ordering::Relaxed);
                set_status(dump_store.as_ref(), &id, Status::InProgress);

                let max_retries = config.read().unwrap().task_queue_max_retries;
                let mut attempt = 0u8;

                loop {
                    let status = task.run(store.clone(), fetcher.clone());

                    match status {
                        Status::Error(ref msg) if attempt < max_retries => {
                            attempt += 1;
                            let delay_ms = 5000 * 2u64.pow(attempt as u32 - 1) + rand_jitter();
                            log::info!(
                                "task {}: retrying persist (attempt {}/{}) after error: {}, backoff {}ms",
                                id,
                                attempt,
                                max_retries,
                                msg,
                                delay_ms
                            );
                            set_attempt(dump_store.as_ref(), &id, attempt);
                            set_status(dump_store.as_ref(), &id, Status::Pending);
                            sleep(Duration::from_millis(delay_ms));
                        }
                        status => {
                            set_status(dump_store.as_ref(), &id, status);
                            break;
                        }
                    }
                }

                // remove the task a bit later to give clients an opportunity
                // to observe the result
                std::thread::spawn(move || {
                    sleep(Duration::from_secs(10));
                    remove_task(dump_store.as_ref(), &id);
                });
            }
        });

        // handle thread panics
        let dump_store = dump_store.clone();
        std::thread::spawn(move || {
            if let Err(err) = task_handle.join() {
                log::error!("task_handle panicked: {err:?}");
                remove_task(dump_store.as_ref(), &id);
            }

            thread_counter.fetch_sub(1, Ordering::Relaxed);
        });
    }
}

pub fn read_queue_dump(store: &dyn StorageManager) -> QueueDump {
    if !store.exists(QUEUE_DUMP_FILE) {
        return empty_dump();
    }

    match store.read(QUEUE_DUMP_FILE) {
        Ok(data) => match serde_json::from_slice(&data) {
            Ok(dump) => dump,
            Err(e) => {
                log::error!("failed to parse queue dump: {e}");
                empty_dump()
            }
        },
        Err(e) => {
            log::error!("failed to read queue dump: {e}");
            empty_dump()
        }
    }
}

pub fn write_queue_dump(store: &dyn StorageManager, queue_dump: &QueueDump) {
    let queue_dump_str = match serde_json::to_string_pretty(queue_dump) {
        Ok(s) => s,
        Err(e) => {
            log::error!("failed to serialize queue dump: {e}");
            return;
        }
    };

    if let Err(e) = store.write(QUEUE_DUMP_FILE, queue_dump_str.as_bytes()) {
        log::error!("failed to write queue dump: {e}");
    }
}

fn empty_dump() -> QueueDump {
    QueueDump {
        queue: vec![],
        now: now(),
    }
}

pub fn save_task(store: &dyn StorageManager, task: Task, status: Status) -> String {
    let id = rusty_ulid::generate_ulid_string();

    let task_dump = TaskDump {
        id: id.clone(),
        task,
        status,
        attempt: 0,
    };

    let mut queue_dump = read_queue_dump(store);

    queue_dump.queue.push(task_dump);
    queue_dump.now = now();
    write_queue_dump(store, &queue_dump);

    id
}

pub fn set_status(store: &dyn StorageManager, id: &str, status: Status) {
    let mut queue_dump = read_queue_dump(store);
    if let Some(task_dump) = queue_dump.queue.iter_mut().find(|td| td.id == id) {
        task_dump.status = status;
    }

    queue_dump.now = now();
    write_queue_dump(store, &queue_dump);
}

fn set_attempt(store: &dyn StorageManager, id: &str, attempt: u8) {
    let mut queue_dump = read_queue_dump(store);
    if let Some(task_dump) = queue_dump.queue.iter_mut().find(|td| td.id == id) {
        task_dump.attempt = attempt;
    }
    queue_dump.now = now();
    write_queue_dump(store, &queue_dump);
}

pub fn remove_task(store: &dyn StorageManager, id: &str) {
    let mut queue_dump = read_queue_dump(store);
    queue_dump.queue.retain(|td| td.id != id);
    queue_dump.now = now();
    write_queue_dump(store, &queue_dump);
}

fn rand_jitter() -> u64 {
    random::<u64>() % 2000
}
