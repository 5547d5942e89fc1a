use serde::{Deserialize, Serialize};

use crate::{
    normalize::normalize_url,
    records::{Record, RecordKind, RecordStore, OG_IMAGE},
    scrape::ImageFetcher,
};

/// A scrape request as delivered by the job source.
///
/// `type` on the wire is an open string; unknown kinds collapse to
/// `article` during deserialization.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Job {
    pub url: String,

    #[serde(rename = "type", default)]
    pub kind: RecordKind,

    /// refresh the image even if the record already has one
    #[serde(default)]
    pub update: bool,
}

/// Why an otherwise-present record was skipped without fetching.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "skip", rename_all = "snake_case")]
pub enum SkipReason {
    /// the record already carries an og image and the job did not ask for
    /// a refresh
    AlreadyHasImage { existing: String },

    /// direct audio file, never yields a page preview image
    AudioUrl,
}

/// Terminal state of one job. Every variant except `PersistFailed` resolves
/// the job as completed; none of them carry an error across the queue
/// boundary.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Stored { image: String },
    NotFound,
    Skipped { reason: SkipReason },
    FetchFailed { url: String, reason: String },
    NoImage,
    PersistFailed { reason: String },
}

/// Skip decision, evaluated in priority order: the existing-image check
/// outranks the audio-file check so the two produce distinguishable log
/// messages.
pub fn check_eligibility(record: &Record, job: &Job) -> Option<SkipReason> {
    if let Some(existing) = record.images.get(OG_IMAGE) {
        if !job.update {
            return Some(SkipReason::AlreadyHasImage {
                existing: existing.clone(),
            });
        }
    }

    if job.url.ends_with(".mp3") {
        return Some(SkipReason::AudioUrl);
    }

    None
}

/// Run one scrape job through the pipeline: lookup, eligibility, fetch,
/// normalize, persist. Fetch-class failures are contained here and reported
/// as outcomes; only store errors during lookup bubble up, to be caught at
/// the queue boundary.
pub fn handle_job(
    job: &Job,
    store: &dyn RecordStore,
    fetcher: &dyn ImageFetcher,
) -> anyhow::Result<Outcome> {
    log::info!("og image scraping: {}", job.url);

    // dont normalize the job url here; stored keys were normalized when the
    // record was created
    let field = job.kind.lookup_field();

    let record = match store.find_by_key(job.kind, &job.url)? {
        Some(record) => record,
        None => {
            log::warn!(
                "record not found for kind {} with lookup {field}: {}",
                job.kind,
                job.url
            );
            return Ok(Outcome::NotFound);
        }
    };

    if let Some(reason) = check_eligibility(&record, job) {
        match &reason {
            SkipReason::AlreadyHasImage { existing } => {
                log::info!(
                    "record already has an image {existing}: kind {} with lookup {field}: {}",
                    job.kind,
                    job.url
                );
            }
            SkipReason::AudioUrl => {
                log::warn!("skipping mp3 url {}, kind {}", job.url, job.kind);
            }
        }
        return Ok(Outcome::Skipped { reason });
    }

    let raw_image = match fetcher.fetch_preview_image(&job.url) {
        Ok(Some(raw)) => raw,
        Ok(None) => {
            log::info!("didnt find an image for {}", job.url);
            return Ok(Outcome::NoImage);
        }
        Err(err) => {
            log::info!("og scraping broke for url {}: {err}", job.url);
            return Ok(Outcome::FetchFailed {
                url: job.url.clone(),
                reason: err.to_string(),
            });
        }
    };

    // a garbled image url in page metadata counts as a fetch failure
    let image = match normalize_url(&raw_image) {
        Ok(image) => image,
        Err(err) => {
            log::info!("og scraping broke for url {}: {err}", job.url);
            return Ok(Outcome::FetchFailed {
                url: job.url.clone(),
                reason: err.to_string(),
            });
        }
    };

    let mut images = record.images.clone();
    images.insert(OG_IMAGE.to_string(), image.clone());

    if let Err(err) = store.update_images(record.id, images) {
        log::error!("failed to store image {image} for {}: {err}", job.url);
        return Ok(Outcome::PersistFailed {
            reason: err.to_string(),
        });
    }

    log::info!("stored {image} image for {}", job.url);

    Ok(Outcome::Stored { image })
}
