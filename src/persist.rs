// used for persistence
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::sync::Mutex;
use tracing::debug;

use crate::cache::{DatasetCacheKey, DatasetStore};
use crate::construct::{CachedDataset, PlanState};
use crate::error::{PlacequeryError, Result};
use crate::walker::ProgressStore;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PersistenceMode {
    InMemory,
    File(String),
}

/// SQLite backing for the dataset cache and plan progress. Every write is an
/// upsert, so repeating one is harmless and the last write wins.
pub struct Persistor {
    connection: Mutex<Connection>,
}
impl Persistor {
    pub fn new(mode: &PersistenceMode) -> Result<Self> {
        let connection = match mode {
            PersistenceMode::InMemory => Connection::open_in_memory()?,
            PersistenceMode::File(path) => Connection::open(path)?,
        };
        connection.execute_batch(
            "
            create table if not exists Dataset (
                Dataset_Key text not null,
                Canonical text not null,
                Content text not null,
                Stored_At text not null,
                constraint referenceable_Dataset_Key primary key (
                    Dataset_Key
                )
            );
            create table if not exists PlanProgress (
                Plan_Name text not null,
                Current_Index integer not null,
                Progress integer not null,
                Next_Page_Token text null,
                Last_Updated text null,
                Completed_At text null,
                Api_Call_Count integer not null,
                constraint referenceable_Plan_Name primary key (
                    Plan_Name
                )
            );
            ",
        )?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }
    pub fn persist_dataset(&self, key: &DatasetCacheKey, dataset: &CachedDataset) -> Result<()> {
        let content = serde_json::to_string(dataset)?;
        let connection = self.connection.lock()?;
        let mut statement = connection.prepare_cached(
            "
            insert into Dataset (
                Dataset_Key,
                Canonical,
                Content,
                Stored_At
            ) values (?, ?, ?, ?)
            on conflict (Dataset_Key) do update set
                Content = excluded.Content,
                Stored_At = excluded.Stored_At
            ",
        )?;
        statement.execute(params![key.digest(), key.canonical(), content, Utc::now()])?;
        debug!(key = %key, features = dataset.len(), "dataset persisted");
        Ok(())
    }
    pub fn restore_dataset(&self, key: &DatasetCacheKey) -> Result<Option<CachedDataset>> {
        let connection = self.connection.lock()?;
        let mut statement = connection.prepare_cached(
            "
            select Content from Dataset where Dataset_Key = ?
            ",
        )?;
        let content: Option<String> = statement
            .query_row(params![key.digest()], |row| row.get(0))
            .optional()?;
        match content {
            Some(content) => Ok(Some(serde_json::from_str(&content)?)),
            None => Ok(None),
        }
    }
    pub fn dataset_count(&self) -> Result<usize> {
        let connection = self.connection.lock()?;
        let count: i64 = connection.query_row("select count(*) from Dataset", [], |row| row.get(0))?;
        Ok(count as usize)
    }
    pub fn persist_progress(&self, state: &PlanState) -> Result<()> {
        let connection = self.connection.lock()?;
        let mut statement = connection.prepare_cached(
            "
            insert into PlanProgress (
                Plan_Name,
                Current_Index,
                Progress,
                Next_Page_Token,
                Last_Updated,
                Completed_At,
                Api_Call_Count
            ) values (?, ?, ?, ?, ?, ?, ?)
            on conflict (Plan_Name) do update set
                Current_Index = excluded.Current_Index,
                Progress = excluded.Progress,
                Next_Page_Token = excluded.Next_Page_Token,
                Last_Updated = excluded.Last_Updated,
                Completed_At = excluded.Completed_At,
                Api_Call_Count = excluded.Api_Call_Count
            ",
        )?;
        statement.execute(params![
            &state.plan_name,
            state.current_index as i64,
            state.progress as i64,
            &state.next_page_token,
            &state.last_updated,
            &state.completed_at,
            state.api_call_count as i64
        ])?;
        Ok(())
    }
    pub fn restore_progress(&self, plan_name: &str) -> Result<Option<PlanState>> {
        let connection = self.connection.lock()?;
        let mut statement = connection.prepare_cached(
            "
            select
                Plan_Name,
                Current_Index,
                Progress,
                Next_Page_Token,
                Last_Updated,
                Completed_At,
                Api_Call_Count
            from
                PlanProgress
            where
                Plan_Name = ?
            ",
        )?;
        let state = statement
            .query_row(params![plan_name], |row| {
                let current_index: i64 = row.get(1)?;
                let progress: i64 = row.get(2)?;
                let api_call_count: i64 = row.get(6)?;
                Ok(PlanState {
                    plan_name: row.get(0)?,
                    current_index: current_index.max(0) as usize,
                    progress: progress.clamp(0, 100) as u8,
                    next_page_token: row.get(3)?,
                    last_updated: row.get::<_, Option<DateTime<Utc>>>(4)?,
                    completed_at: row.get::<_, Option<DateTime<Utc>>>(5)?,
                    api_call_count: api_call_count.max(0) as u64,
                })
            })
            .optional()?;
        Ok(state)
    }
}

#[async_trait]
impl DatasetStore for Persistor {
    async fn get(&self, key: &DatasetCacheKey) -> Result<Option<CachedDataset>> {
        self.restore_dataset(key)
            .map_err(|e| PlacequeryError::CacheUnavailable(e.to_string()))
    }
    async fn put(&self, key: &DatasetCacheKey, dataset: &CachedDataset) -> Result<()> {
        self.persist_dataset(key, dataset)
            .map_err(|e| PlacequeryError::CacheUnavailable(e.to_string()))
    }
}

#[async_trait]
impl ProgressStore for Persistor {
    async fn get(&self, plan_name: &str) -> Result<Option<PlanState>> {
        self.restore_progress(plan_name)
    }
    async fn set(&self, state: &PlanState) -> Result<()> {
        self.persist_progress(state)
    }
}
