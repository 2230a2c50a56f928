//! Metadata-driven entity repository.
//!
//! Each entity kind describes itself through [`Entity`] (table, identity
//! key, columns, value tuple) and [`Repository`] turns that metadata into
//! SQL: batch inserts, latest-wins resolution, filtered counts and
//! per-chunk retrieval. One query builder serves all nine kinds.
//!
//! Latest-wins: for every identity key, pick the row attached to the chunk
//! with the highest id among chunks matching the type filter and the extra
//! predicate. Chunk ids strictly increase, so ties are impossible.

use std::marker::PhantomData;

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, Row};
use tracing::debug;

use crate::chunk::ChunkType;

use super::{Error, Result};

/// Per-kind storage metadata. The value tuple must match `columns()` in
/// both order and length; inserts assert that invariant.
pub(crate) trait Entity: Sized {
    const TABLE: &'static str;

    /// Columns that identify the logical entity across revisions.
    fn key_columns() -> &'static [&'static str];
    /// Full column list, a superset of the identity key, in insert order.
    fn columns() -> &'static [&'static str];
    /// Value tuple in `columns()` order.
    fn values(&self) -> Vec<Value>;
    /// Maps a row selected in `columns()` order back into the entity.
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
}

/// Extra predicate and ordering applied to a latest-wins query. The where
/// clause may reference `T` (the entity table) and `CH` (the chunk ledger);
/// placeholders bind from `binds`, in order.
#[derive(Default)]
pub(crate) struct Filter {
    pub where_clause: String,
    pub binds: Vec<Value>,
    pub order: Order,
}

impl Filter {
    pub fn new(where_clause: impl Into<String>, binds: Vec<Value>) -> Self {
        Filter {
            where_clause: where_clause.into(),
            binds,
            order: Order::None,
        }
    }

    pub fn ordered(mut self, order: Order) -> Self {
        self.order = order;
        self
    }
}

#[derive(Default)]
pub(crate) enum Order {
    #[default]
    None,
    /// Ascending by identity key.
    Key,
    /// Explicit order list, verbatim SQL fragments.
    By(Vec<String>),
}

pub(crate) struct Repository<T> {
    _marker: PhantomData<T>,
}

impl<T: Entity> Repository<T> {
    pub fn new() -> Self {
        Repository {
            _marker: PhantomData,
        }
    }

    fn insert_sql() -> String {
        let cols = T::columns();
        let placeholders = vec!["?"; cols.len()].join(",");
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            T::TABLE,
            cols.join(","),
            placeholders
        )
    }

    /// Grouped MAX(chunk_id) per identity key, restricted by the chunk-type
    /// filter and the extra predicate. An empty type list means any type.
    fn latest_sql(types: &[ChunkType], filter: &Filter) -> (String, Vec<Value>) {
        let keys = T::key_columns()
            .iter()
            .map(|c| format!("T.{c}"))
            .collect::<Vec<_>>()
            .join(",");
        let mut sql = format!(
            "SELECT {keys}, MAX(T.chunk_id) AS chunk_id FROM {} AS T \
             JOIN chunk AS CH ON CH.id = T.chunk_id WHERE 1=1",
            T::TABLE
        );
        let mut binds = Vec::new();
        if !types.is_empty() {
            let ph = vec!["?"; types.len()].join(",");
            sql.push_str(&format!(" AND CH.type_id IN ({ph})"));
            binds.extend(types.iter().map(|t| Value::from(*t as i64)));
        }
        if !filter.where_clause.is_empty() {
            sql.push_str(" AND (");
            sql.push_str(&filter.where_clause);
            sql.push(')');
            binds.extend(filter.binds.iter().cloned());
        }
        sql.push_str(&format!(" GROUP BY {keys}"));
        (sql, binds)
    }

    /// Full winning rows: the latest relation joined back to the entity
    /// table on identity key and chunk id.
    fn latest_rows_sql(types: &[ChunkType], filter: &Filter) -> (String, Vec<Value>) {
        let (latest, mut binds) = Self::latest_sql(types, filter);
        let cols = T::columns()
            .iter()
            .map(|c| format!("T.{c}"))
            .collect::<Vec<_>>()
            .join(",");
        let key_join = T::key_columns()
            .iter()
            .map(|c| format!("T.{c} = L.{c}"))
            .collect::<Vec<_>>()
            .join(" AND ");
        let mut sql = format!(
            "WITH latest AS ({latest}) \
             SELECT {cols} FROM latest L \
             JOIN {} AS T ON {key_join} AND T.chunk_id = L.chunk_id \
             JOIN chunk AS CH ON CH.id = T.chunk_id WHERE 1=1",
            T::TABLE
        );
        // the predicate applies to the winning rows as well
        if !filter.where_clause.is_empty() {
            sql.push_str(" AND (");
            sql.push_str(&filter.where_clause);
            sql.push(')');
            binds.extend(filter.binds.iter().cloned());
        }
        (sql, binds)
    }

    fn key_order() -> String {
        T::key_columns()
            .iter()
            .map(|c| format!("T.{c}"))
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn insert(&self, conn: &Connection, entity: &T) -> Result<()> {
        let values = entity.values();
        debug_assert_eq!(values.len(), T::columns().len());
        conn.execute(&Self::insert_sql(), params_from_iter(values))
            .map_err(Error::db(format!("insert {}", T::TABLE)))?;
        Ok(())
    }

    /// Batch insert through a single prepared statement. The statement
    /// lives for the whole batch; a failing row aborts with its offset and
    /// identity. The caller owns transaction rollback.
    pub fn insert_batch<I>(&self, conn: &Connection, items: I) -> Result<usize>
    where
        I: IntoIterator<Item = Result<T>>,
    {
        let mut stmt = conn
            .prepare(&Self::insert_sql())
            .map_err(Error::db(format!("insert {}: prepare", T::TABLE)))?;
        let mut total = 0usize;
        for (i, item) in items.into_iter().enumerate() {
            let entity = item?;
            let values = entity.values();
            debug_assert_eq!(values.len(), T::columns().len());
            let identity = Self::identity_of(&values);
            stmt.execute(params_from_iter(values)).map_err(Error::db(
                format!("insert {} row {i} ({identity})", T::TABLE),
            ))?;
            total += 1;
        }
        Ok(total)
    }

    fn identity_of(values: &[Value]) -> String {
        T::key_columns()
            .iter()
            .filter_map(|k| T::columns().iter().position(|c| c == k))
            .map(|pos| format!("{:?}", values[pos]))
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn count(&self, conn: &Connection) -> Result<i64> {
        self.count_of_type(conn, &[])
    }

    pub fn count_of_type(&self, conn: &Connection, types: &[ChunkType]) -> Result<i64> {
        self.count_where(conn, types, &Filter::default())
    }

    /// Identity-key count under latest-wins resolution.
    pub fn count_where(
        &self,
        conn: &Connection,
        types: &[ChunkType],
        filter: &Filter,
    ) -> Result<i64> {
        let (latest, binds) = Self::latest_sql(types, filter);
        let sql = format!("SELECT COUNT(1) FROM ({latest})");
        debug!(table = T::TABLE, %sql, "count");
        conn.query_row(&sql, params_from_iter(binds), |row| row.get(0))
            .map_err(Error::db(format!("count {}", T::TABLE)))
    }

    pub fn all(&self, conn: &Connection) -> Result<Vec<T>> {
        self.all_of_type(conn, &[])
    }

    pub fn all_of_type(&self, conn: &Connection, types: &[ChunkType]) -> Result<Vec<T>> {
        self.all_where(conn, types, &Filter::default().ordered(Order::Key))
    }

    /// Winning rows matching the filter, materialized in the requested
    /// order. The prepared statement and its cursor are dropped before
    /// return, on success and on error alike.
    pub fn all_where(
        &self,
        conn: &Connection,
        types: &[ChunkType],
        filter: &Filter,
    ) -> Result<Vec<T>> {
        let (mut sql, binds) = Self::latest_rows_sql(types, filter);
        match &filter.order {
            Order::None => {}
            Order::Key => {
                sql.push_str(" ORDER BY ");
                sql.push_str(&Self::key_order());
            }
            Order::By(cols) => {
                sql.push_str(" ORDER BY ");
                sql.push_str(&cols.join(","));
            }
        }
        debug!(table = T::TABLE, %sql, "all");
        let mut stmt = conn
            .prepare(&sql)
            .map_err(Error::db(format!("all {}: prepare", T::TABLE)))?;
        let rows = stmt
            .query_map(params_from_iter(binds), |row| T::from_row(row))
            .map_err(Error::db(format!("all {}", T::TABLE)))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(Error::db(format!("all {}: scan", T::TABLE)))?);
        }
        Ok(out)
    }

    pub fn get(&self, conn: &Connection, id: impl Into<Value>) -> Result<T> {
        self.get_of_type(conn, &[], id)
    }

    /// Single latest-wins row by identity key.
    pub fn get_of_type(
        &self,
        conn: &Connection,
        types: &[ChunkType],
        id: impl Into<Value>,
    ) -> Result<T> {
        let key = T::key_columns()[0];
        let filter = Filter::new(format!("T.{key} = ?"), vec![id.into()]);
        let (sql, binds) = Self::latest_rows_sql(types, &filter);
        debug!(table = T::TABLE, %sql, "get");
        conn.query_row(&sql, params_from_iter(binds), |row| T::from_row(row))
            .map_err(Error::db(format!("get {}", T::TABLE)))
    }

    /// Rows physically stored under one chunk, bypassing latest-wins.
    /// Used when reassembling a chunk for replay.
    pub fn all_for_chunk(&self, conn: &Connection, chunk_id: i64) -> Result<Vec<T>> {
        let cols = T::columns()
            .iter()
            .map(|c| format!("T.{c}"))
            .collect::<Vec<_>>()
            .join(",");
        let sql = format!(
            "SELECT {cols} FROM {} AS T WHERE T.chunk_id = ? ORDER BY {}",
            T::TABLE,
            Self::key_order()
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(Error::db(format!("all_for_chunk {}: prepare", T::TABLE)))?;
        let rows = stmt
            .query_map([chunk_id], |row| T::from_row(row))
            .map_err(Error::db(format!("all_for_chunk {}", T::TABLE)))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(Error::db(format!("all_for_chunk {}: scan", T::TABLE)))?);
        }
        Ok(out)
    }

    pub fn one_for_chunk(&self, conn: &Connection, chunk_id: i64) -> Result<T> {
        let cols = T::columns()
            .iter()
            .map(|c| format!("T.{c}"))
            .collect::<Vec<_>>()
            .join(",");
        let sql = format!(
            "SELECT {cols} FROM {} AS T WHERE T.chunk_id = ? LIMIT 1",
            T::TABLE
        );
        conn.query_row(&sql, [chunk_id], |row| T::from_row(row))
            .map_err(Error::db(format!("one_for_chunk {}", T::TABLE)))
    }
}

/// `NULL` unless the condition holds. Mirrors how optional denormalized
/// columns are populated from payload fields.
pub(crate) fn or_null<T: Into<Value>>(cond: bool, v: T) -> Value {
    if cond {
        v.into()
    } else {
        Value::Null
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::channel::DbChannel;

    #[test]
    fn insert_sql_lists_every_column() {
        let sql = Repository::<DbChannel>::insert_sql();
        assert_eq!(
            sql,
            "INSERT INTO channel (id,chunk_id,name,idx,data) VALUES (?,?,?,?,?)"
        );
    }

    #[test]
    fn latest_sql_filters_by_type() {
        let (sql, binds) = Repository::<DbChannel>::latest_sql(
            &[ChunkType::ChannelInfo],
            &Filter::default(),
        );
        assert!(sql.contains("MAX(T.chunk_id)"));
        assert!(sql.contains("CH.type_id IN (?)"));
        assert!(sql.ends_with("GROUP BY T.id"));
        assert_eq!(binds, vec![Value::Integer(5)]);
    }

    #[test]
    fn latest_rows_sql_binds_predicate_twice() {
        let filter = Filter::new("T.id = ?", vec![Value::from("C1".to_string())]);
        let (sql, binds) = Repository::<DbChannel>::latest_rows_sql(&[], &filter);
        assert!(sql.starts_with("WITH latest AS ("));
        assert_eq!(binds.len(), 2);
    }
}
