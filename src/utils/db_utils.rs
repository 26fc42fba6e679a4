use crate::error::{ApiError, ApiResult};
use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value;
use sqlx::mysql::MySqlArguments;
use sqlx::query::{Query, QueryAs, QueryScalar};
use sqlx::{MySql, MySqlPool};

/// ===============================
/// SQL bindable value enum
/// ===============================
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    String(String),
    U64(u64),
    I64(i64),
    F64(f64),
    Bool(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Null,
}

impl From<u64> for SqlValue {
    fn from(v: u64) -> Self {
        SqlValue::U64(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::String(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::String(v)
    }
}

impl From<NaiveDate> for SqlValue {
    fn from(v: NaiveDate) -> Self {
        SqlValue::Date(v)
    }
}

macro_rules! bind_all {
    ($query:expr, $values:expr) => {{
        let mut q = $query;
        for value in $values {
            q = match value.clone() {
                SqlValue::String(v) => q.bind(v),
                SqlValue::U64(v) => q.bind(v),
                SqlValue::I64(v) => q.bind(v),
                SqlValue::F64(v) => q.bind(v),
                SqlValue::Bool(v) => q.bind(v),
                SqlValue::Date(v) => q.bind(v),
                SqlValue::DateTime(v) => q.bind(v),
                SqlValue::Null => q.bind(None::<String>),
            };
        }
        q
    }};
}

pub fn bind_query<'q>(
    query: Query<'q, MySql, MySqlArguments>,
    values: &[SqlValue],
) -> Query<'q, MySql, MySqlArguments> {
    bind_all!(query, values)
}

pub fn bind_query_as<'q, O>(
    query: QueryAs<'q, MySql, O, MySqlArguments>,
    values: &[SqlValue],
) -> QueryAs<'q, MySql, O, MySqlArguments> {
    bind_all!(query, values)
}

pub fn bind_query_scalar<'q, O>(
    query: QueryScalar<'q, MySql, O, MySqlArguments>,
    values: &[SqlValue],
) -> QueryScalar<'q, MySql, O, MySqlArguments> {
    bind_all!(query, values)
}

/// ===============================
/// WHERE clause builder for list endpoints
/// ===============================
#[derive(Debug, Default)]
pub struct Filters {
    conditions: Vec<String>,
    values: Vec<SqlValue>,
}

impl Filters {
    /// Every tenant list starts scoped to its organization.
    pub fn for_org(org_id: u64) -> Self {
        let mut filters = Self::default();
        filters.eq("org_id", org_id);
        filters
    }

    pub fn eq(&mut self, column: &str, value: impl Into<SqlValue>) -> &mut Self {
        self.conditions.push(format!("{column} = ?"));
        self.values.push(value.into());
        self
    }

    pub fn eq_opt<V: Into<SqlValue>>(&mut self, column: &str, value: Option<V>) -> &mut Self {
        if let Some(v) = value {
            self.eq(column, v);
        }
        self
    }

    /// Raw condition with its own placeholders, e.g. `work_date >= ?`.
    pub fn push(&mut self, condition: &str, values: impl IntoIterator<Item = SqlValue>) -> &mut Self {
        self.conditions.push(condition.to_string());
        self.values.extend(values);
        self
    }

    /// `LIKE %term%` across several columns, OR-ed together.
    pub fn search(&mut self, columns: &[&str], term: Option<&str>) -> &mut Self {
        let Some(term) = term.map(str::trim).filter(|t| !t.is_empty()) else {
            return self;
        };
        let like = format!("%{}%", escape_like(term));
        let condition = columns
            .iter()
            .map(|c| format!("{c} LIKE ?"))
            .collect::<Vec<_>>()
            .join(" OR ");
        self.conditions.push(format!("({condition})"));
        self.values
            .extend(columns.iter().map(|_| SqlValue::String(like.clone())));
        self
    }

    pub fn where_clause(&self) -> String {
        if self.conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.conditions.join(" AND "))
        }
    }

    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }
}

fn escape_like(term: &str) -> String {
    term.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// ===============================
/// SQL update container
/// ===============================
#[derive(Debug)]
pub struct SqlUpdate {
    pub sql: String,
    pub values: Vec<SqlValue>,
}

/// ===============================
/// Build dynamic UPDATE SQL
/// ===============================
/// Only keys listed in `allowed` may be set; the row is matched on every
/// `(column, value)` pair in `scope` (id and org_id for tenant tables).
pub fn build_update_sql(
    table: &str,
    payload: &Value,
    allowed: &[&str],
    scope: &[(&str, SqlValue)],
) -> ApiResult<SqlUpdate> {
    let obj = payload
        .as_object()
        .ok_or_else(|| ApiError::bad_request("Payload must be a JSON object"))?;

    if obj.is_empty() {
        return Err(ApiError::bad_request("No fields provided for update"));
    }

    if let Some(unknown) = obj.keys().find(|k| !allowed.contains(&k.as_str())) {
        return Err(ApiError::bad_request(format!("Field '{unknown}' cannot be updated")));
    }

    // Build SET clause
    let set_clause = obj
        .keys()
        .map(|k| format!("{k} = ?"))
        .collect::<Vec<_>>()
        .join(", ");

    let where_clause = scope
        .iter()
        .map(|(column, _)| format!("{column} = ?"))
        .collect::<Vec<_>>()
        .join(" AND ");

    let sql = format!("UPDATE {table} SET {set_clause} WHERE {where_clause}");

    let mut values = Vec::with_capacity(obj.len() + scope.len());

    // Convert JSON values → SqlValue
    for (key, value) in obj {
        let converted = match value {
            Value::String(s) => {
                if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                    SqlValue::Date(d)
                } else if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
                    SqlValue::DateTime(dt)
                } else {
                    SqlValue::String(s.clone())
                }
            }
            Value::Number(n) => {
                if let Some(u) = n.as_u64() {
                    SqlValue::U64(u)
                } else if let Some(i) = n.as_i64() {
                    SqlValue::I64(i)
                } else if let Some(f) = n.as_f64() {
                    SqlValue::F64(f)
                } else {
                    return Err(ApiError::bad_request(format!("Field '{key}' has an invalid number")));
                }
            }
            Value::Bool(b) => SqlValue::Bool(*b),
            Value::Null => SqlValue::Null,
            _ => {
                return Err(ApiError::bad_request(format!(
                    "Field '{key}' has an unsupported value type"
                )));
            }
        };
        values.push(converted);
    }

    values.extend(scope.iter().map(|(_, v)| v.clone()));

    Ok(SqlUpdate { sql, values })
}

/// ===============================
/// Execute the update
/// ===============================
pub async fn execute_update(pool: &MySqlPool, update: SqlUpdate) -> Result<u64, sqlx::Error> {
    let query = bind_query(sqlx::query(&update.sql), &update.values);
    let result = query.execute(pool).await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ALLOWED: &[&str] = &["first_name", "hire_date", "department_id", "phone"];

    #[test]
    fn update_is_scoped_by_every_key() {
        let update = build_update_sql(
            "employees",
            &json!({"first_name": "Ana"}),
            ALLOWED,
            &[("id", SqlValue::U64(4)), ("org_id", SqlValue::U64(9))],
        )
        .unwrap();

        assert_eq!(update.sql, "UPDATE employees SET first_name = ? WHERE id = ? AND org_id = ?");
        assert_eq!(
            update.values,
            vec![SqlValue::String("Ana".into()), SqlValue::U64(4), SqlValue::U64(9)]
        );
    }

    #[test]
    fn columns_outside_the_whitelist_are_rejected() {
        let err = build_update_sql(
            "employees",
            &json!({"org_id": 2}),
            ALLOWED,
            &[("id", SqlValue::U64(1))],
        )
        .unwrap_err();
        assert!(err.to_string().contains("org_id"));
    }

    #[test]
    fn dates_and_nulls_are_typed() {
        let update = build_update_sql(
            "employees",
            &json!({"hire_date": "2025-02-03", "phone": null}),
            ALLOWED,
            &[("id", SqlValue::U64(1))],
        )
        .unwrap();
        assert!(update.values.contains(&SqlValue::Date(NaiveDate::from_ymd_opt(2025, 2, 3).unwrap())));
        assert!(update.values.contains(&SqlValue::Null));
    }

    #[test]
    fn empty_or_non_object_payload_is_rejected() {
        assert!(build_update_sql("t", &json!({}), ALLOWED, &[]).is_err());
        assert!(build_update_sql("t", &json!([1, 2]), ALLOWED, &[]).is_err());
        assert!(build_update_sql("t", &json!({"phone": [1]}), ALLOWED, &[]).is_err());
    }

    #[test]
    fn filters_compose_where_clause_in_order() {
        let mut filters = Filters::for_org(3);
        filters
            .eq_opt("status", Some("active"))
            .eq_opt::<u64>("department_id", None)
            .search(&["first_name", "email"], Some("ana"));

        assert_eq!(
            filters.where_clause(),
            " WHERE org_id = ? AND status = ? AND (first_name LIKE ? OR email LIKE ?)"
        );
        assert_eq!(filters.values().len(), 4);
        assert_eq!(filters.values()[2], SqlValue::String("%ana%".into()));
    }

    #[test]
    fn like_wildcards_in_search_are_escaped() {
        let mut filters = Filters::default();
        filters.search(&["name"], Some("50%_off"));
        assert_eq!(filters.values()[0], SqlValue::String("%50\\%\\_off%".into()));
    }

    #[test]
    fn empty_filters_have_no_where() {
        assert_eq!(Filters::default().where_clause(), "");
    }
}
