use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    io::ErrorKind,
    sync::{Arc, RwLock},
};

/// Image-kind label written by the scrape pipeline.
pub const OG_IMAGE: &str = "og";

/// The closed set of content kinds the worker knows how to enrich.
///
/// The job source is open-ended; anything it sends outside this set falls
/// back to `Article`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum RecordKind {
    Article,
    Podcast,
    Episode,
}

impl Default for RecordKind {
    fn default() -> Self {
        RecordKind::Article
    }
}

impl From<String> for RecordKind {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl RecordKind {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "podcast" => RecordKind::Podcast,
            "episode" => RecordKind::Episode,
            _ => RecordKind::Article,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::Article => "article",
            RecordKind::Podcast => "podcast",
            RecordKind::Episode => "episode",
        }
    }

    /// Name of the natural-key field this kind is looked up by. Episodes are
    /// keyed by their page link; articles and podcasts by their url.
    pub fn lookup_field(self) -> &'static str {
        match self {
            RecordKind::Episode => "link",
            RecordKind::Article | RecordKind::Podcast => "url",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Record {
    pub id: u64,
    pub kind: RecordKind,

    pub url: String,
    pub link: String,
    pub title: String,

    /// image-kind label -> normalized image URL
    #[serde(default)]
    pub images: HashMap<String, String>,
}

impl Record {
    pub fn lookup_key(&self) -> &str {
        match self.kind {
            RecordKind::Episode => &self.link,
            RecordKind::Article | RecordKind::Podcast => &self.url,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RecordCreate {
    pub kind: RecordKind,
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Store seam the pipeline runs against. Records are created and owned by an
/// external ingestion domain; the scrape pipeline only reads one record per
/// job and conditionally rewrites its images map.
pub trait RecordStore: Send + Sync {
    /// Lookup by the kind's natural key, never by row id: jobs only carry
    /// the URL.
    fn find_by_key(&self, kind: RecordKind, key: &str) -> anyhow::Result<Option<Record>>;

    /// Partial update: replaces only the images map of the addressed record.
    fn update_images(&self, id: u64, images: HashMap<String, String>) -> anyhow::Result<()>;

    fn create(&self, create: RecordCreate) -> anyhow::Result<Record>;
    fn all(&self) -> anyhow::Result<Vec<Record>>;
}

#[derive(Debug, Clone, Default)]
pub struct BackendCsv {
    list: Arc<RwLock<Vec<Record>>>,
    path: String,
}

const CSV_HEADERS: [&str; 6] = ["id", "kind", "url", "link", "title", "images"];

impl BackendCsv {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        if let Err(err) = std::fs::metadata(path) {
            match err.kind() {
                ErrorKind::NotFound => {
                    log::info!("Creating new record database at {path}");
                    let mut csv_wrt = csv::Writer::from_path(path)?;
                    csv_wrt.write_record(CSV_HEADERS)?;
                    csv_wrt.flush()?;
                }
                _ => Err(err)?,
            }
        }

        let mut csv_reader = csv::Reader::from_path(path)?;

        let mut records = vec![];
        for row in csv_reader.records() {
            let row = row?;
            let id = row
                .get(0)
                .ok_or(anyhow!("couldnt get record id"))?
                .parse::<u64>()?;
            let kind = RecordKind::parse(row.get(1).ok_or(anyhow!("couldnt get record kind"))?);
            let url = row
                .get(2)
                .ok_or(anyhow!("couldnt get record url"))?
                .to_string();
            let link = row
                .get(3)
                .ok_or(anyhow!("couldnt get record link"))?
                .to_string();
            let title = row
                .get(4)
                .ok_or(anyhow!("couldnt get record title"))?
                .to_string();
            let images_raw = row.get(5).ok_or(anyhow!("couldnt get record images"))?;
            let images = if images_raw.is_empty() {
                HashMap::new()
            } else {
                serde_json::from_str(images_raw)?
            };

            records.push(Record {
                id,
                kind,
                url,
                link,
                title,
                images,
            });
        }

        Ok(BackendCsv {
            list: Arc::new(RwLock::new(records)),
            path: path.to_string(),
        })
    }

    fn save(&self) -> anyhow::Result<()> {
        let records = self.list.read().unwrap();

        let temp_path = format!("{}-tmp", &self.path);
        let mut csv_wrt = csv::Writer::from_path(&temp_path)?;
        csv_wrt.write_record(CSV_HEADERS)?;
        for record in records.iter() {
            let images = if record.images.is_empty() {
                String::new()
            } else {
                serde_json::to_string(&record.images)?
            };

            csv_wrt.write_record([
                &record.id.to_string(),
                &record.kind.as_str().to_string(),
                &record.url,
                &record.link,
                &record.title,
                &images,
            ])?;
        }
        csv_wrt.flush()?;
        std::fs::rename(&temp_path, &self.path)?;

        Ok(())
    }
}

impl RecordStore for BackendCsv {
    fn find_by_key(&self, kind: RecordKind, key: &str) -> anyhow::Result<Option<Record>> {
        let records = self.list.read().unwrap();

        Ok(records
            .iter()
            .find(|record| record.kind == kind && record.lookup_key() == key)
            .cloned())
    }

    fn update_images(&self, id: u64, images: HashMap<String, String>) -> anyhow::Result<()> {
        let mut records = self.list.write().unwrap();

        let record = records
            .iter_mut()
            .find(|record| record.id == id)
            .ok_or_else(|| anyhow!("record with id {id} not found"))?;

        record.images = images;

        drop(records);

        self.save()
    }

    fn create(&self, create: RecordCreate) -> anyhow::Result<Record> {
        let id = if let Some(last) = self.list.write().unwrap().last() {
            last.id + 1
        } else {
            0
        };

        let record = Record {
            id,
            kind: create.kind,
            url: create.url,
            link: create.link.unwrap_or_default(),
            title: create.title.unwrap_or_default(),
            images: HashMap::new(),
        };

        self.list.write().unwrap().push(record.clone());

        self.save()?;

        Ok(record)
    }

    fn all(&self) -> anyhow::Result<Vec<Record>> {
        Ok(self.list.read().unwrap().clone())
    }
}

#[cfg(test)]
impl BackendCsv {
    pub fn list(&self) -> Arc<RwLock<Vec<Record>>> {
        self.list.clone()
    }
}
