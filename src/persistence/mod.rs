//! Persistence Module
//!
//! Repository traits the engine is constructed with, plus file-backed
//! (CSV recommendations, JSON calibration history) and in-memory adapters.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use csv::ReaderBuilder;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::calibration::CalibrationData;
use crate::types::Recommendation;

/// Source of stored recommendations
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecommendationStore: Send + Sync {
    /// Recommendations for `market` at or after `since`, ordered by timestamp
    async fn recommendations(
        &self,
        market: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Recommendation>>;
}

/// Storage for computed calibrations
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CalibrationStore: Send + Sync {
    async fn save(&self, data: &CalibrationData) -> Result<()>;

    /// Most recent calibration for `market` by `computed_at`
    async fn latest(&self, market: &str) -> Result<Option<CalibrationData>>;
}

/// Recommendation row as stored in CSV
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationRecord {
    pub timestamp: DateTime<Utc>,
    pub market: String,
    pub action: String,
    pub price: f64,
    pub confidence: f64,
    #[serde(default)]
    pub raw_confidence: Option<f64>,
    #[serde(default)]
    pub size_usd: Option<f64>,
}

impl TryFrom<RecommendationRecord> for Recommendation {
    type Error = crate::error::EngineError;

    fn try_from(record: RecommendationRecord) -> Result<Self, Self::Error> {
        let rec = Recommendation {
            timestamp: record.timestamp,
            market: record.market,
            action: record.action.parse()?,
            price: record.price,
            confidence: record.confidence,
            raw_confidence: record.raw_confidence,
            size_usd: record.size_usd,
        };
        rec.validate()?;
        Ok(rec)
    }
}

impl From<&Recommendation> for RecommendationRecord {
    fn from(rec: &Recommendation) -> Self {
        Self {
            timestamp: rec.timestamp,
            market: rec.market.clone(),
            action: rec.action.to_string(),
            price: rec.price,
            confidence: rec.confidence,
            raw_confidence: rec.raw_confidence,
            size_usd: rec.size_usd,
        }
    }
}

fn window(mut records: Vec<Recommendation>, since: Option<DateTime<Utc>>) -> Vec<Recommendation> {
    if let Some(since) = since {
        records.retain(|r| r.timestamp >= since);
    }
    records.sort_by_key(|r| r.timestamp);
    records
}

/// Reads `<data_dir>/recommendations/<market>.csv`
pub struct CsvRecommendationStore {
    dir: PathBuf,
}

impl CsvRecommendationStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Result<Self> {
        let dir = data_dir.as_ref().join("recommendations");
        std::fs::create_dir_all(&dir).context("Failed to create recommendations directory")?;
        Ok(Self { dir })
    }

    fn path_for(&self, market: &str) -> PathBuf {
        self.dir.join(format!("{}.csv", market))
    }

    /// Append recommendations to the market's CSV file
    pub async fn append(&self, market: &str, records: &[Recommendation]) -> Result<()> {
        let path = self.path_for(market);
        let file_has_data = tokio::fs::metadata(&path)
            .await
            .map(|m| m.len() > 0)
            .unwrap_or(false);

        let mut writer = csv::WriterBuilder::new()
            .has_headers(!file_has_data)
            .from_writer(Vec::new());
        for rec in records {
            writer
                .serialize(RecommendationRecord::from(rec))
                .context("Failed to write recommendation record")?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| anyhow::anyhow!("Failed to flush recommendation writer: {}", e))?;

        let mut existing = if file_has_data {
            tokio::fs::read(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?
        } else {
            Vec::new()
        };
        existing.extend_from_slice(&bytes);
        tokio::fs::write(&path, existing)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }
}

#[async_trait]
impl RecommendationStore for CsvRecommendationStore {
    async fn recommendations(
        &self,
        market: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Recommendation>> {
        let path = self.path_for(market);
        if !path.exists() {
            warn!(market = %market, path = %path.display(), "No recommendation file");
            return Ok(Vec::new());
        }

        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .from_reader(bytes.as_slice());

        let mut records = Vec::new();
        for (line, result) in reader.deserialize::<RecommendationRecord>().enumerate() {
            let record = result.context("Failed to deserialize recommendation record")?;
            let rec = Recommendation::try_from(record)
                .with_context(|| format!("{}: invalid recommendation at row {}", market, line + 1))?;
            if rec.market == market {
                records.push(rec);
            }
        }

        let records = window(records, since);
        debug!(market = %market, count = records.len(), "Loaded recommendations");
        Ok(records)
    }
}

/// JSON calibration history at `<data_dir>/calibration/<market>.json`
pub struct JsonCalibrationStore {
    dir: PathBuf,
    /// Serializes read-append-write cycles in `save`
    write_lock: Mutex<()>,
}

impl JsonCalibrationStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Result<Self> {
        let dir = data_dir.as_ref().join("calibration");
        std::fs::create_dir_all(&dir).context("Failed to create calibration directory")?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    fn path_for(&self, market: &str) -> PathBuf {
        self.dir.join(format!("{}.json", market))
    }

    /// Every stored calibration for `market`, oldest first
    pub async fn history(&self, market: &str) -> Result<Vec<CalibrationData>> {
        let path = self.path_for(market);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let json = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut history: Vec<CalibrationData> = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse calibration history {}", path.display()))?;
        history.sort_by_key(|d| d.computed_at);
        Ok(history)
    }
}

#[async_trait]
impl CalibrationStore for JsonCalibrationStore {
    async fn save(&self, data: &CalibrationData) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut history = self.history(&data.market).await?;
        history.push(data.clone());

        let path = self.path_for(&data.market);
        let json = serde_json::to_string_pretty(&history)?;
        tokio::fs::write(&path, json)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("💾 Calibration for {} saved to {}", data.market, path.display());
        Ok(())
    }

    async fn latest(&self, market: &str) -> Result<Option<CalibrationData>> {
        Ok(self.history(market).await?.pop())
    }
}

/// In-memory recommendation store
#[derive(Default)]
pub struct InMemoryRecommendationStore {
    records: RwLock<HashMap<String, Vec<Recommendation>>>,
}

impl InMemoryRecommendationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<Recommendation>) -> Self {
        let mut by_market: HashMap<String, Vec<Recommendation>> = HashMap::new();
        for rec in records {
            by_market.entry(rec.market.clone()).or_default().push(rec);
        }
        Self {
            records: RwLock::new(by_market),
        }
    }

    pub async fn insert(&self, rec: Recommendation) {
        self.records
            .write()
            .await
            .entry(rec.market.clone())
            .or_default()
            .push(rec);
    }
}

#[async_trait]
impl RecommendationStore for InMemoryRecommendationStore {
    async fn recommendations(
        &self,
        market: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Recommendation>> {
        let records = self
            .records
            .read()
            .await
            .get(market)
            .cloned()
            .unwrap_or_default();
        Ok(window(records, since))
    }
}

/// In-memory calibration store
#[derive(Default)]
pub struct InMemoryCalibrationStore {
    history: RwLock<HashMap<String, Vec<CalibrationData>>>,
}

impl InMemoryCalibrationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CalibrationStore for InMemoryCalibrationStore {
    async fn save(&self, data: &CalibrationData) -> Result<()> {
        self.history
            .write()
            .await
            .entry(data.market.clone())
            .or_default()
            .push(data.clone());
        Ok(())
    }

    async fn latest(&self, market: &str) -> Result<Option<CalibrationData>> {
        Ok(self
            .history
            .read()
            .await
            .get(market)
            .and_then(|h| h.iter().max_by_key(|d| d.computed_at).cloned()))
    }
}
