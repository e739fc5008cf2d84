use clickhouse::Client;

use crate::config::WideConfig;

/// Ordered list of DDL statements standing up the widened `otel_traces`
/// table. Every statement is idempotent (`IF NOT EXISTS`) so safe to run on
/// every startup, mirroring the teacher's own migration runner.
///
/// Materialised columns mirror the query builder's `MATERIALIZED_COLUMNS`
/// table exactly — adding a field there without a matching `MATERIALIZED`
/// column here would silently fall through to the slower map-lookup path.
const MIGRATIONS: &[&str] = &[
    "CREATE DATABASE IF NOT EXISTS observability",
    r"CREATE TABLE IF NOT EXISTS observability.otel_traces
(
    trace_id             String CODEC(ZSTD(1)),
    span_id              String CODEC(ZSTD(1)),
    parent_span_id       Nullable(String) CODEC(ZSTD(1)),
    project_id           LowCardinality(String) CODEC(ZSTD(1)),

    span_name            String CODEC(ZSTD(1)),
    span_kind            LowCardinality(String) CODEC(ZSTD(1)),
    status_code          LowCardinality(String) CODEC(ZSTD(1)),
    status_message       Nullable(String) CODEC(ZSTD(1)),

    start_time           DateTime64(9) CODEC(Delta(8), ZSTD(1)),
    end_time             Nullable(DateTime64(9)) CODEC(ZSTD(1)),
    duration_ns          Nullable(Int64) CODEC(ZSTD(1)),

    span_attributes      Map(String, String) CODEC(ZSTD(1)),
    resource_attributes  Map(String, String) CODEC(ZSTD(1)),
    scope_attributes     Map(String, String) CODEC(ZSTD(1)),

    input                Nullable(String) CODEC(ZSTD(1)),
    input_mime_type      Nullable(String) CODEC(ZSTD(1)),
    input_truncated      Bool,
    output               Nullable(String) CODEC(ZSTD(1)),
    output_mime_type     Nullable(String) CODEC(ZSTD(1)),
    output_truncated     Bool,

    usage_details        Map(String, UInt64) CODEC(ZSTD(1)),
    cost_details         Map(String, Decimal(38, 9)) CODEC(ZSTD(1)),
    pricing_snapshot     Map(String, Decimal(38, 9)) CODEC(ZSTD(1)),
    total_cost           Decimal(38, 9) CODEC(ZSTD(1)),

    `events.name`        Array(String) CODEC(ZSTD(1)),
    `events.timestamp`   Array(DateTime64(9)) CODEC(ZSTD(1)),
    `events.attributes`  Array(Map(String, String)) CODEC(ZSTD(1)),
    `links.trace_id`     Array(String) CODEC(ZSTD(1)),
    `links.span_id`      Array(String) CODEC(ZSTD(1)),
    `links.attributes`   Array(Map(String, String)) CODEC(ZSTD(1)),

    deleted_at           Nullable(DateTime64(9)) CODEC(ZSTD(1)),
    tags                 Array(String) CODEC(ZSTD(1)),
    bookmarked           Bool DEFAULT false,

    service_name         String MATERIALIZED resource_attributes['service.name'],
    model_name           String MATERIALIZED span_attributes['gen_ai.request.model'],
    provider_name        String MATERIALIZED coalesce(
                             nullIf(span_attributes['gen_ai.system'], ''),
                             span_attributes['gen_ai.provider.name']
                         ),
    span_type            String MATERIALIZED span_attributes['brokle.span.type'],
    user_id              String MATERIALIZED span_attributes['user.id'],
    session_id           String MATERIALIZED span_attributes['session.id'],
    input_preview        String MATERIALIZED substring(coalesce(input, ''), 1, 500),
    output_preview       String MATERIALIZED substring(coalesce(output, ''), 1, 500),

    INDEX idx_trace_id trace_id TYPE bloom_filter(0.001) GRANULARITY 1,
    INDEX idx_span_id span_id TYPE bloom_filter(0.001) GRANULARITY 1,
    INDEX idx_span_attr_key mapKeys(span_attributes) TYPE bloom_filter(0.01) GRANULARITY 1,
    INDEX idx_span_attr_value mapValues(span_attributes) TYPE bloom_filter(0.01) GRANULARITY 1,
    INDEX idx_resource_attr_key mapKeys(resource_attributes) TYPE bloom_filter(0.01) GRANULARITY 1,
    INDEX idx_input_preview input_preview TYPE tokenbf_v1(32768, 3, 0) GRANULARITY 8,
    INDEX idx_output_preview output_preview TYPE tokenbf_v1(32768, 3, 0) GRANULARITY 8
)
ENGINE = MergeTree
PARTITION BY toDate(start_time)
ORDER BY (project_id, start_time, trace_id, span_id)
SETTINGS index_granularity = 8192, ttl_only_drop_parts = 1",
];

/// Run all migrations against ClickHouse, then apply retention/tiering.
/// Connects without a default database so `CREATE DATABASE` succeeds on a
/// fresh instance.
pub async fn run(url: &str, user: &str, password: &str, config: &WideConfig) -> anyhow::Result<()> {
    let client = Client::default()
        .with_url(url)
        .with_user(user)
        .with_password(password);

    tracing::info!("running clickhouse migrations ({} statements)", MIGRATIONS.len());
    for (i, sql) in MIGRATIONS.iter().enumerate() {
        let preview: String = sql.chars().take(80).collect();
        tracing::debug!("migration {}/{}: {}...", i + 1, MIGRATIONS.len(), preview);
        client.query(sql).execute().await.map_err(|e| {
            tracing::error!("migration {}/{} failed: {e}", i + 1, MIGRATIONS.len());
            e
        })?;
    }
    tracing::info!("clickhouse migrations complete");

    apply_retention_ttl(&client, config).await?;
    apply_storage_policy(&client, config).await;

    Ok(())
}

/// Table-level TTL uses the effective (max) retention across per-rule
/// overrides, so part-level drops never remove rows a rule still wants kept.
async fn apply_retention_ttl(client: &Client, config: &WideConfig) -> anyhow::Result<()> {
    let traces_days = config.effective_traces_ttl_days();
    tracing::info!("applying retention TTL: traces={traces_days}d");

    let sql = format!(
        "ALTER TABLE observability.otel_traces MODIFY TTL toDateTime64(start_time, 9) + INTERVAL {traces_days} DAY DELETE"
    );
    if let Err(e) = client.query(&sql).execute().await {
        tracing::warn!("failed to set TTL on otel_traces: {e}");
    }
    Ok(())
}

/// Non-fatal: if the S3 disk isn't registered yet (e.g. first boot before
/// the object store is ready), log and continue rather than fail startup.
async fn apply_storage_policy(client: &Client, config: &WideConfig) {
    if config.storage.s3.is_none() {
        tracing::debug!("no S3 config, skipping storage policy");
        return;
    }

    let move_days = config.storage.tiering.traces_move_after_days;
    let policy_sql = "ALTER TABLE observability.otel_traces MODIFY SETTING storage_policy = 'tiered'";
    if let Err(e) = client.query(policy_sql).execute().await {
        tracing::warn!("could not set tiered storage on otel_traces (non-fatal): {e}");
        return;
    }

    if move_days == 0 {
        tracing::info!("tiering disabled for otel_traces (move_after_days=0)");
        return;
    }

    let delete_days = config.effective_traces_ttl_days();
    let sql = format!(
        "ALTER TABLE observability.otel_traces MODIFY TTL \
         toDateTime64(start_time, 9) + INTERVAL {move_days} DAY TO VOLUME 'cold', \
         toDateTime64(start_time, 9) + INTERVAL {delete_days} DAY DELETE"
    );
    if let Err(e) = client.query(&sql).execute().await {
        tracing::warn!("could not set TTL MOVE on otel_traces (non-fatal): {e}");
    }
    tracing::info!("tiered storage policy applied (traces={move_days}d)");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migration_ddl_mentions_every_materialized_column() {
        let ddl = MIGRATIONS[1];
        for column in [
            "service_name",
            "model_name",
            "provider_name",
            "span_type",
            "user_id",
            "session_id",
            "span_name",
            "trace_id",
            "span_id",
            "status_code",
        ] {
            assert!(ddl.contains(column), "DDL missing materialized column {column}");
        }
    }

    #[test]
    fn migration_ddl_carries_deleted_at_tombstone_column() {
        assert!(MIGRATIONS[1].contains("deleted_at"));
    }
}
