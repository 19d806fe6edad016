// src/linkage/source.rs - Deal rows and already-loaded acquisitions
use anyhow::{Context, Result};
use log::{debug, info};
use std::collections::HashSet;

use crate::models::FacilityRecord;
use crate::utils::db_connect::PgPool;

/// Rows fetched per query when paging through the deal table.
pub const DEAL_FETCH_CHUNK_SIZE: i64 = 10_000;

#[allow(async_fn_in_trait)]
pub trait DealSource {
    async fn fetch_deals(&self) -> Result<Vec<FacilityRecord>>;

    /// Deal ids that already have a proforma loaded.
    async fn fetch_loaded_acquisition_ids(&self) -> Result<HashSet<String>>;
}

/// Reads deals from PostgreSQL through the shared pool. Each call checks a
/// connection out and returns it when the call ends, on success or failure.
pub struct PgDealSource<'p> {
    pool: &'p PgPool,
    deal_table: String,
    proforma_table: String,
}

impl<'p> PgDealSource<'p> {
    pub fn new(pool: &'p PgPool, deal_table: &str, proforma_table: &str) -> Self {
        Self {
            pool,
            deal_table: deal_table.to_string(),
            proforma_table: proforma_table.to_string(),
        }
    }
}

impl DealSource for PgDealSource<'_> {
    async fn fetch_deals(&self) -> Result<Vec<FacilityRecord>> {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for deal fetch")?;
        let query = format!(
            "SELECT id::text, COALESCE(facility_name, ''), licensed_op_beds::float8, file_path \
             FROM {} ORDER BY id LIMIT $1 OFFSET $2",
            self.deal_table
        );

        let mut deals = Vec::new();
        let mut offset: i64 = 0;
        let mut chunk = 0;
        loop {
            let rows = conn
                .query(query.as_str(), &[&DEAL_FETCH_CHUNK_SIZE, &offset])
                .await
                .with_context(|| format!("Failed to fetch deals from {} at offset {}", self.deal_table, offset))?;
            if rows.is_empty() {
                break;
            }
            chunk += 1;
            let fetched = rows.len();
            for row in rows {
                deals.push(FacilityRecord {
                    id: row.try_get(0).context("deal id")?,
                    name: row.try_get(1).context("facility_name")?,
                    bed_count: row.try_get(2).context("licensed_op_beds")?,
                    file_path: row.try_get(3).context("file_path")?,
                });
            }
            info!("Fetched chunk {} ({} deals)", chunk, fetched);
            if (fetched as i64) < DEAL_FETCH_CHUNK_SIZE {
                break;
            }
            offset += DEAL_FETCH_CHUNK_SIZE;
        }
        info!("Fetched {} deals from {}", deals.len(), self.deal_table);
        Ok(deals)
    }

    async fn fetch_loaded_acquisition_ids(&self) -> Result<HashSet<String>> {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for loaded acquisitions")?;
        let query = format!(
            "SELECT DISTINCT acquisition_id::text FROM {} WHERE acquisition_id IS NOT NULL",
            self.proforma_table
        );
        let rows = conn
            .query(query.as_str(), &[])
            .await
            .with_context(|| format!("Failed to fetch loaded acquisitions from {}", self.proforma_table))?;

        let mut loaded = HashSet::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get(0).context("acquisition_id")?;
            loaded.insert(id.trim().to_string());
        }
        debug!("{} acquisitions already loaded", loaded.len());
        Ok(loaded)
    }
}

/// Fixed deal list, for tests and replaying exported runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDealSource {
    pub deals: Vec<FacilityRecord>,
    pub loaded: HashSet<String>,
}

impl DealSource for InMemoryDealSource {
    async fn fetch_deals(&self) -> Result<Vec<FacilityRecord>> {
        Ok(self.deals.clone())
    }

    async fn fetch_loaded_acquisition_ids(&self) -> Result<HashSet<String>> {
        Ok(self.loaded.clone())
    }
}

/// Keeps only the requested deal ids; an empty request keeps everything.
pub fn restrict_to_ids(deals: Vec<FacilityRecord>, ids: &[String]) -> Vec<FacilityRecord> {
    if ids.is_empty() {
        return deals;
    }
    let wanted: HashSet<&str> = ids.iter().map(|id| id.trim()).collect();
    deals
        .into_iter()
        .filter(|deal| wanted.contains(deal.id.trim()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deal(id: &str) -> FacilityRecord {
        FacilityRecord {
            id: id.to_string(),
            name: format!("Facility {}", id),
            bed_count: Some(100.0),
            file_path: Some("/deals".to_string()),
        }
    }

    #[tokio::test]
    async fn test_in_memory_source() {
        let source = InMemoryDealSource {
            deals: vec![deal("1"), deal("2")],
            loaded: ["2".to_string()].into_iter().collect(),
        };
        assert_eq!(source.fetch_deals().await.unwrap().len(), 2);
        assert!(source.fetch_loaded_acquisition_ids().await.unwrap().contains("2"));
    }

    #[test]
    fn test_restrict_to_ids() {
        let deals = vec![deal("1"), deal("2"), deal("3")];
        assert_eq!(restrict_to_ids(deals.clone(), &[]).len(), 3);
        let kept = restrict_to_ids(deals, &["3".to_string(), " 1 ".to_string()]);
        let ids: Vec<&str> = kept.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "3"]);
    }
}
