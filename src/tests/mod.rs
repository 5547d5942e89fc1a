mod handler;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crate::scrape::{FetchError, ImageFetcher};

pub enum FakeResult {
    Image(String),
    NoImage,
    Fail,
}

/// Scripted fetcher standing in for the network; counts invocations so tests
/// can assert the fetch collaborator was (not) called.
pub struct FakeFetcher {
    result: FakeResult,
    calls: AtomicUsize,
}

impl FakeFetcher {
    pub fn image(url: &str) -> Self {
        Self {
            result: FakeResult::Image(url.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn no_image() -> Self {
        Self {
            result: FakeResult::NoImage,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            result: FakeResult::Fail,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ImageFetcher for FakeFetcher {
    fn fetch_preview_image(&self, url: &str) -> Result<Option<String>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.result {
            FakeResult::Image(img) => Ok(Some(img.clone())),
            FakeResult::NoImage => Ok(None),
            FakeResult::Fail => Err(FetchError::Http {
                url: url.to_string(),
                reason: "connection reset by peer".to_string(),
            }),
        }
    }
}

/// Poll until `cond` holds or the timeout elapses.
pub fn wait_until<F: Fn() -> bool>(cond: F, timeout: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    cond()
}
