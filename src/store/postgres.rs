//! PostgreSQL 存储实现
//!
//! 与具体表结构无关：列名来自记录本身，值通过
//! `jsonb_populate_record(NULL::<table>, $n)` 按表的行类型转换，
//! 结果行以 `to_jsonb(row)` 返回。

use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use tracing::debug;

use super::Datastore;
use crate::error::{ReplicaError, Result};
use crate::model::{validate_identifier, MatchCriteria, QueryOptions, Record};

/// 目标表别名
const ROW_ALIAS: &str = "\"_row\"";

/// PostgreSQL 存储 (sqlx 实现)
#[derive(Clone)]
pub struct PgDatastore {
    name: String,
    pool: PgPool,
}

impl PgDatastore {
    /// 创建新的 PostgreSQL 存储
    pub fn new(name: &str, pool: PgPool) -> Self {
        Self {
            name: name.to_string(),
            pool,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_rows(&self, statement: &Statement) -> Result<Vec<Record>> {
        debug!("[{}] SQL: {}", self.name, statement.sql);

        let mut query = sqlx::query_scalar::<_, Value>(&statement.sql);
        for param in &statement.params {
            query = query.bind(param.clone());
        }

        let rows = query.fetch_all(&self.pool).await.map_err(|e| {
            ReplicaError::Database(format!("[{}] {}", self.name, e))
        })?;

        rows.into_iter().map(into_record).collect()
    }

    async fn fetch_first(&self, statement: &Statement, entity: &str) -> Result<Record> {
        self.fetch_rows(statement)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                ReplicaError::NotFound(format!("[{}] no matching {} record", self.name, entity))
            })
    }
}

#[async_trait]
impl Datastore for PgDatastore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create(&self, entity: &str, data: &Record) -> Result<Record> {
        let statement = build_insert(entity, data)?;
        self.fetch_first(&statement, entity).await
    }

    async fn update(&self, entity: &str, criteria: &MatchCriteria, data: &Record) -> Result<Record> {
        let statement = build_update(entity, criteria, data)?;
        self.fetch_first(&statement, entity).await
    }

    async fn delete(&self, entity: &str, criteria: &MatchCriteria) -> Result<Record> {
        let statement = build_delete(entity, criteria)?;
        self.fetch_first(&statement, entity).await
    }

    async fn list(&self, entity: &str, options: &QueryOptions) -> Result<Vec<Record>> {
        let statement = build_select(entity, options)?;
        self.fetch_rows(&statement).await
    }

    async fn upsert(
        &self,
        entity: &str,
        criteria: &MatchCriteria,
        update: &Record,
        create: &Record,
    ) -> Result<Record> {
        let statement = build_upsert(entity, criteria, update, create)?;
        self.fetch_first(&statement, entity).await
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// ============================================================================
// SQL 构造
// ============================================================================

/// 待执行语句
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Statement {
    fn new() -> Self {
        Self {
            sql: String::new(),
            params: Vec::new(),
        }
    }

    /// 绑定一个 JSON 对象参数，返回其占位符
    fn bind_record(&mut self, record: &Record) -> String {
        self.params.push(Value::Object(record.clone()));
        format!("${}", self.params.len())
    }
}

fn quote_ident(ident: &str) -> Result<String> {
    validate_identifier(ident)?;
    Ok(format!("\"{}\"", ident))
}

fn quoted_columns(record: &Record) -> Result<Vec<String>> {
    record.keys().map(|k| quote_ident(k)).collect()
}

fn populate(table: &str, placeholder: &str) -> String {
    format!("jsonb_populate_record(NULL::{}, {})", table, placeholder)
}

/// WHERE 子句；空条件返回空串
fn where_clause(stmt: &mut Statement, table: &str, criteria: &MatchCriteria) -> Result<String> {
    if criteria.is_empty() {
        return Ok(String::new());
    }

    let placeholder = stmt.bind_record(criteria);
    let mut predicates = Vec::with_capacity(criteria.len());
    for (field, value) in criteria {
        let column = quote_ident(field)?;
        if value.is_null() {
            predicates.push(format!("{}.{} IS NULL", ROW_ALIAS, column));
        } else {
            predicates.push(format!(
                "{}.{} = (SELECT {} FROM {})",
                ROW_ALIAS,
                column,
                column,
                populate(table, &placeholder)
            ));
        }
    }
    Ok(format!(" WHERE {}", predicates.join(" AND ")))
}

fn require_criteria(criteria: &MatchCriteria, op: &str) -> Result<()> {
    if criteria.is_empty() {
        return Err(ReplicaError::Validation(format!(
            "{} requires at least one match criterion",
            op
        )));
    }
    Ok(())
}

fn insert_body(stmt: &mut Statement, table: &str, data: &Record) -> Result<String> {
    if data.is_empty() {
        return Ok(format!("INSERT INTO {} AS {} DEFAULT VALUES", table, ROW_ALIAS));
    }
    let columns = quoted_columns(data)?.join(", ");
    let placeholder = stmt.bind_record(data);
    Ok(format!(
        "INSERT INTO {} AS {} ({}) SELECT {} FROM {}",
        table,
        ROW_ALIAS,
        columns,
        columns,
        populate(table, &placeholder)
    ))
}

fn returning() -> String {
    format!(" RETURNING to_jsonb({}.*)", ROW_ALIAS)
}

pub(crate) fn build_insert(entity: &str, data: &Record) -> Result<Statement> {
    let table = quote_ident(entity)?;
    let mut stmt = Statement::new();
    stmt.sql = insert_body(&mut stmt, &table, data)?;
    stmt.sql.push_str(&returning());
    Ok(stmt)
}

pub(crate) fn build_update(
    entity: &str,
    criteria: &MatchCriteria,
    data: &Record,
) -> Result<Statement> {
    require_criteria(criteria, "update")?;
    if data.is_empty() {
        return Err(ReplicaError::Validation("update requires data".to_string()));
    }

    let table = quote_ident(entity)?;
    let mut stmt = Statement::new();
    let placeholder = stmt.bind_record(data);
    let assignments = quoted_columns(data)?
        .into_iter()
        .map(|column| {
            format!(
                "{} = (SELECT {} FROM {})",
                column,
                column,
                populate(&table, &placeholder)
            )
        })
        .collect::<Vec<_>>()
        .join(", ");
    let filter = where_clause(&mut stmt, &table, criteria)?;

    stmt.sql = format!(
        "UPDATE {} AS {} SET {}{}{}",
        table,
        ROW_ALIAS,
        assignments,
        filter,
        returning()
    );
    Ok(stmt)
}

pub(crate) fn build_delete(entity: &str, criteria: &MatchCriteria) -> Result<Statement> {
    require_criteria(criteria, "delete")?;

    let table = quote_ident(entity)?;
    let mut stmt = Statement::new();
    let filter = where_clause(&mut stmt, &table, criteria)?;
    stmt.sql = format!("DELETE FROM {} AS {}{}{}", table, ROW_ALIAS, filter, returning());
    Ok(stmt)
}

pub(crate) fn build_select(entity: &str, options: &QueryOptions) -> Result<Statement> {
    let table = quote_ident(entity)?;
    let mut stmt = Statement::new();
    let filter = where_clause(&mut stmt, &table, &options.filter)?;

    let mut sql = format!(
        "SELECT to_jsonb({}.*) FROM {} AS {}{}",
        ROW_ALIAS, table, ROW_ALIAS, filter
    );

    if !options.order_by.is_empty() {
        let orders = options
            .order_by
            .iter()
            .map(|o| -> Result<String> {
                Ok(format!("{}.{} {}", ROW_ALIAS, quote_ident(&o.field)?, o.order.as_sql()))
            })
            .collect::<Result<Vec<_>>>()?;
        sql.push_str(" ORDER BY ");
        sql.push_str(&orders.join(", "));
    }
    if let Some(take) = options.take {
        sql.push_str(&format!(" LIMIT {}", take));
    }
    if let Some(skip) = options.skip {
        sql.push_str(&format!(" OFFSET {}", skip));
    }

    stmt.sql = sql;
    Ok(stmt)
}

pub(crate) fn build_upsert(
    entity: &str,
    criteria: &MatchCriteria,
    update: &Record,
    create: &Record,
) -> Result<Statement> {
    require_criteria(criteria, "upsert")?;

    let table = quote_ident(entity)?;
    let mut stmt = Statement::new();
    let insert = insert_body(&mut stmt, &table, create)?;
    let conflict = quoted_columns(criteria)?;

    let assignments = if update.is_empty() {
        // 保持 RETURNING 有结果：无更新字段时原样写回冲突键
        conflict
            .iter()
            .map(|c| format!("{} = EXCLUDED.{}", c, c))
            .collect::<Vec<_>>()
    } else {
        let placeholder = stmt.bind_record(update);
        quoted_columns(update)?
            .into_iter()
            .map(|column| {
                format!(
                    "{} = (SELECT {} FROM {})",
                    column,
                    column,
                    populate(&table, &placeholder)
                )
            })
            .collect::<Vec<_>>()
    };

    stmt.sql = format!(
        "{} ON CONFLICT ({}) DO UPDATE SET {}{}",
        insert,
        conflict.join(", "),
        assignments.join(", "),
        returning()
    );
    Ok(stmt)
}

fn into_record(value: Value) -> Result<Record> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(ReplicaError::Serialization(format!(
            "expected a JSON object row, got {}",
            other
        ))),
    }
}
