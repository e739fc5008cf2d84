use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::error::{CoreError, CoreResult};
use crate::filter::ast::{Expr, FilterValue, LogicOp, Operator};

/// Hard-coded table of field path -> materialised column, checked before
/// falling back to a map lookup.
const MATERIALIZED_COLUMNS: &[(&str, &str)] = &[
    ("service.name", "service_name"),
    ("gen_ai.request.model", "model_name"),
    ("gen_ai.system", "provider_name"),
    ("gen_ai.provider.name", "provider_name"),
    ("brokle.span.type", "span_type"),
    ("user.id", "user_id"),
    ("session.id", "session_id"),
    ("span.name", "span_name"),
    ("trace.id", "trace_id"),
    ("span.id", "span_id"),
    ("status.code", "status_code"),
];

fn field_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_.]*$").unwrap())
}

fn validate_field_name(field: &str) -> CoreResult<()> {
    if field.len() > 200 || !field_name_regex().is_match(field) {
        return Err(CoreError::InvalidFieldName(field.to_string()));
    }
    Ok(())
}

fn escape_quote(s: &str) -> String {
    s.replace('\'', "''")
}

enum ResolvedColumn {
    Materialized(&'static str),
    ResourceMap(String),
    SpanMap(String),
}

impl ResolvedColumn {
    fn column_expr(&self) -> String {
        match self {
            ResolvedColumn::Materialized(c) => (*c).to_string(),
            ResolvedColumn::ResourceMap(f) => format!("resource_attributes['{}']", escape_quote(f)),
            ResolvedColumn::SpanMap(f) => format!("span_attributes['{}']", escape_quote(f)),
        }
    }

    fn map_name(&self) -> Option<&'static str> {
        match self {
            ResolvedColumn::Materialized(_) => None,
            ResolvedColumn::ResourceMap(_) => Some("resource_attributes"),
            ResolvedColumn::SpanMap(_) => Some("span_attributes"),
        }
    }

    fn field_literal(&self) -> Option<&str> {
        match self {
            ResolvedColumn::Materialized(_) => None,
            ResolvedColumn::ResourceMap(f) | ResolvedColumn::SpanMap(f) => Some(f),
        }
    }
}

fn resolve_field(field: &str) -> ResolvedColumn {
    if let Some((_, col)) = MATERIALIZED_COLUMNS.iter().find(|(k, _)| *k == field) {
        return ResolvedColumn::Materialized(col);
    }
    if field.starts_with("resource.") || field.starts_with("deployment.") {
        return ResolvedColumn::ResourceMap(field.to_string());
    }
    ResolvedColumn::SpanMap(field.to_string())
}

/// A single bound SQL parameter value, positionally matched to a `?` in
/// the emitted statement.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlArg {
    Str(String),
    Num(f64),
}

impl From<&FilterValue> for SqlArg {
    fn from(v: &FilterValue) -> Self {
        match v {
            FilterValue::String(s) => SqlArg::Str(s.clone()),
            FilterValue::Number(n) => SqlArg::Num(*n),
            FilterValue::List(_) => unreachable!("lists are expanded by the caller, not converted directly"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchKind {
    Id,
    Content,
    All,
}

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub kind: SearchKind,
}

#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub project_id: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub filter: Option<Expr>,
    pub search: Option<SearchRequest>,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuiltQuery {
    pub sql: String,
    pub args: Vec<SqlArg>,
}

/// Lowers an AST plus surrounding predicates into parameterised SQL. Holds
/// no state beyond what a single build call produces, but is still
/// instantiated fresh per request per the non-shared-builder design note.
#[derive(Default)]
pub struct SpanQueryBuilder;

impl SpanQueryBuilder {
    pub fn new() -> Self {
        SpanQueryBuilder
    }

    pub fn build_data_query(&self, request: &QueryRequest) -> CoreResult<BuiltQuery> {
        let mut args = Vec::new();
        let prewhere = self.build_prewhere(request, &mut args);
        let where_clause = self.build_where(request, &mut args)?;

        let mut sql = format!(
            "SELECT * FROM otel_traces PREWHERE {prewhere}"
        );
        if let Some(w) = where_clause {
            sql.push_str(&format!(" WHERE {w}"));
        }
        sql.push_str(" ORDER BY start_time DESC LIMIT ? OFFSET ?");
        args.push(SqlArg::Num(request.limit as f64));
        args.push(SqlArg::Num(request.offset as f64));

        Ok(BuiltQuery { sql, args })
    }

    pub fn build_count_query(&self, request: &QueryRequest) -> CoreResult<BuiltQuery> {
        let mut args = Vec::new();
        let prewhere = self.build_prewhere(request, &mut args);
        let where_clause = self.build_where(request, &mut args)?;

        let mut sql = format!("SELECT count(*) FROM otel_traces PREWHERE {prewhere}");
        if let Some(w) = where_clause {
            sql.push_str(&format!(" WHERE {w}"));
        }

        Ok(BuiltQuery { sql, args })
    }

    fn build_prewhere(&self, request: &QueryRequest, args: &mut Vec<SqlArg>) -> String {
        let mut clauses = vec!["project_id = ?".to_string(), "deleted_at IS NULL".to_string()];
        args.push(SqlArg::Str(request.project_id.clone()));

        if let Some(start) = request.start_time {
            clauses.push("start_time >= ?".to_string());
            args.push(SqlArg::Str(start.to_rfc3339()));
        }
        if let Some(end) = request.end_time {
            clauses.push("start_time <= ?".to_string());
            args.push(SqlArg::Str(end.to_rfc3339()));
        }
        clauses.join(" AND ")
    }

    fn build_where(&self, request: &QueryRequest, args: &mut Vec<SqlArg>) -> CoreResult<Option<String>> {
        let mut parts = Vec::new();
        if let Some(expr) = &request.filter {
            parts.push(compile_expr(expr, args)?);
        }
        if let Some(search) = &request.search {
            if let Some(clause) = compile_search(search, args) {
                parts.push(clause);
            }
        }
        if parts.is_empty() {
            Ok(None)
        } else {
            Ok(Some(parts.join(" AND ")))
        }
    }
}

fn compile_expr(expr: &Expr, args: &mut Vec<SqlArg>) -> CoreResult<String> {
    match expr {
        Expr::Condition { field, operator, value, negated } => {
            compile_condition(field, *operator, value.as_ref(), *negated, args)
        }
        Expr::Binary { left, operator, right } => {
            // The logic-operator enumeration is re-validated here even
            // though `LogicOp` is a closed Rust enum, so a programmatic
            // caller assembling an `Expr` directly cannot smuggle in
            // anything but AND/OR.
            let op_sql = match operator {
                LogicOp::And => "AND",
                LogicOp::Or => "OR",
            };
            let left_sql = compile_expr(left, args)?;
            let right_sql = compile_expr(right, args)?;
            Ok(format!("({left_sql} {op_sql} {right_sql})"))
        }
    }
}

fn compile_condition(
    field: &str,
    operator: Operator,
    value: Option<&FilterValue>,
    negated: bool,
    args: &mut Vec<SqlArg>,
) -> CoreResult<String> {
    validate_field_name(field)?;
    let resolved = resolve_field(field);
    let col = resolved.column_expr();

    match operator {
        Operator::Eq | Operator::Ne => {
            let value = value.ok_or_else(|| CoreError::MissingValue(0))?;
            args.push(value.into());
            let op_sql = if operator == Operator::Eq { "=" } else { "!=" };
            Ok(format!("{col} {op_sql} ?"))
        }
        Operator::Gt | Operator::Lt | Operator::Ge | Operator::Le => {
            let value = value.ok_or_else(|| CoreError::MissingValue(0))?;
            args.push(value.into());
            let op_sql = match operator {
                Operator::Gt => ">",
                Operator::Lt => "<",
                Operator::Ge => ">=",
                Operator::Le => "<=",
                _ => unreachable!(),
            };
            let target = match resolved {
                ResolvedColumn::Materialized(_) => col,
                _ => format!("toFloat64OrNull({col})"),
            };
            Ok(format!("{target} {op_sql} ?"))
        }
        Operator::Contains => {
            let value = value.ok_or_else(|| CoreError::MissingValue(0))?;
            args.push(value.into());
            if negated {
                Ok(format!("positionCaseInsensitive({col}, ?) = 0"))
            } else {
                Ok(format!("positionCaseInsensitive({col}, ?) > 0"))
            }
        }
        Operator::In => {
            let value = value.ok_or_else(|| CoreError::MissingValue(0))?;
            let list = match value {
                FilterValue::List(items) => items,
                other => return Err(CoreError::InvalidInClause(format!("{other:?} is not a list"))),
            };
            if list.is_empty() {
                return Ok(if negated { "1=1".to_string() } else { "1=0".to_string() });
            }
            let placeholders = vec!["?"; list.len()].join(", ");
            for item in list {
                args.push(item.into());
            }
            let not_sql = if negated { "NOT " } else { "" };
            Ok(format!("{col} {not_sql}IN ({placeholders})"))
        }
        Operator::Exists => match resolved.map_name() {
            None => {
                if negated {
                    Ok(format!("({col} IS NULL OR {col} = '')"))
                } else {
                    Ok(format!("({col} IS NOT NULL AND {col} != '')"))
                }
            }
            Some(map_name) => {
                let field_literal = escape_quote(resolved.field_literal().unwrap_or(field));
                if negated {
                    Ok(format!("NOT mapContains({map_name}, '{field_literal}')"))
                } else {
                    Ok(format!("mapContains({map_name}, '{field_literal}')"))
                }
            }
        },
    }
}

fn compile_search(search: &SearchRequest, args: &mut Vec<SqlArg>) -> Option<String> {
    if search.query.is_empty() {
        return None;
    }
    let columns: &[&str] = match search.kind {
        SearchKind::Id => &["trace_id", "span_id", "span_name"],
        SearchKind::Content => &["input_preview", "output_preview"],
        SearchKind::All => &["trace_id", "span_id", "span_name", "input_preview", "output_preview"],
    };

    let mut clauses = Vec::new();
    for col in columns {
        if *col == "input_preview" || *col == "output_preview" {
            clauses.push(format!("hasToken({col}, ?)"));
            args.push(SqlArg::Str(search.query.to_lowercase()));
        } else {
            clauses.push(format!("positionCaseInsensitive({col}, ?) > 0"));
            args.push(SqlArg::Str(search.query.clone()));
        }
    }
    Some(format!("({})", clauses.join(" OR ")))
}
