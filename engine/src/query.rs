//! Collection queries carried by `RTSDB_SELECT`, `RTSDB_GET` and
//! `RTSDB_NOTIFY`.

use crate::dialect::{to_document_query, to_document_sort};
use crate::error::{Error, Result};
use crate::filter::Filter;
use crate::sort::SortExpression;
use crate::{CollectionName, DbName};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A filtered, ordered, paged read of one collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    pub db: DbName,
    pub collection: CollectionName,
    #[serde(rename = "where", default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,
    #[serde(rename = "orderBy", default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<SortExpression>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

/// A query compiled for a document store.
#[derive(Debug, Clone, PartialEq)]
pub struct FindOptions {
    pub query: Value,
    pub sort: Option<Value>,
    pub skip: usize,
    pub limit: Option<usize>,
}

impl Default for FindOptions {
    fn default() -> Self {
        Self {
            query: json!({}),
            sort: None,
            skip: 0,
            limit: None,
        }
    }
}

impl Query {
    pub fn new(db: impl Into<DbName>, collection: impl Into<CollectionName>) -> Self {
        Self {
            db: db.into(),
            collection: collection.into(),
            filter: None,
            sort: None,
            offset: None,
            limit: None,
        }
    }

    pub fn with_filter(mut self, filter: impl Into<Filter>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_sort(mut self, sort: impl Into<SortExpression>) -> Self {
        self.sort = Some(sort.into());
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Decode the query from call params (`[query]`).
    pub fn from_params(params: &[Value]) -> Result<Self> {
        let query = params
            .first()
            .ok_or_else(|| Error::InvalidParams("missing query".into()))?;
        serde_json::from_value(query.clone()).map_err(|e| Error::InvalidParams(e.to_string()))
    }

    pub fn to_params(&self) -> Result<Vec<Value>> {
        Ok(vec![serde_json::to_value(self)?])
    }

    /// Run the query over enumerated records in process.
    pub fn apply(&self, records: Vec<Value>) -> Result<Vec<Value>> {
        let mut selected = match &self.filter {
            Some(filter) => {
                let predicate = filter.compile()?;
                records.into_iter().filter(|r| predicate(r)).collect()
            }
            None => records,
        };
        if let Some(sort) = &self.sort {
            sort.sort(&mut selected);
        }
        let skip = self.offset.unwrap_or(0);
        let limit = self.limit.unwrap_or(usize::MAX);
        Ok(selected.into_iter().skip(skip).take(limit).collect())
    }

    /// Compile the query for a document store.
    pub fn to_find_options(&self) -> Result<FindOptions> {
        Ok(FindOptions {
            query: self.filter.as_ref().map_or_else(|| json!({}), to_document_query),
            sort: self.sort.as_ref().map(to_document_sort).transpose()?,
            skip: self.offset.unwrap_or(0),
            limit: self.limit,
        })
    }
}
