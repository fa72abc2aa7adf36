//! Storage access helpers: which pool serves a request, and the host
//! queries built from operator filters

use multidb::DomainPools;
use querybuilder::FilterError;
use sqlx::PgPool;
use types::{ClusterId, DataDomain};

const HOSTS_BY_CLUSTER: &str = "SELECT * FROM hosts WHERE cluster_id=$1";
const COUNT_HOSTS_BY_CLUSTER: &str = "SELECT count(*) FROM hosts WHERE cluster_id=$1";

/// Reads go to one random member of the cluster's pool
pub fn read_target<C>(pools: &DomainPools<C>, domain: DataDomain, cluster_id: ClusterId) -> &C {
    pools.get(domain, cluster_id).pick_random()
}

/// Writes go to the replication subset of the cluster's pool
pub fn write_targets<C>(
    pools: &DomainPools<C>,
    domain: DataDomain,
    cluster_id: ClusterId,
) -> Vec<&C> {
    pools.get(domain, cluster_id).pick_for_writes()
}

/// Host listing for a cluster, narrowed by `filter`. `$1` is the cluster id.
pub fn hosts_query(filter: &str) -> Result<String, FilterError> {
    with_filter(HOSTS_BY_CLUSTER, filter)
}

pub fn count_hosts_query(filter: &str) -> Result<String, FilterError> {
    with_filter(COUNT_HOSTS_BY_CLUSTER, filter)
}

fn with_filter(base: &str, filter: &str) -> Result<String, FilterError> {
    let predicate = querybuilder::compile(filter)?;
    if predicate.is_empty() {
        Ok(base.to_string())
    } else {
        Ok(format!("{} AND {}", base, predicate))
    }
}

/// Number of a cluster's hosts matching `filter`
pub async fn count_hosts(
    pools: &DomainPools<PgPool>,
    cluster_id: ClusterId,
    filter: &str,
) -> anyhow::Result<i64> {
    let sql = count_hosts_query(filter)?;
    let pool = read_target(pools, DataDomain::Hosts, cluster_id);

    let count = sqlx::query_scalar::<_, i64>(&sql)
        .bind(cluster_id.inner())
        .fetch_one(pool)
        .await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use master_config::MasterConfig;
    use multidb::test_utils::MemoryConnector;

    const CONFIG: &str = r#"
addr = ":55655"

[postgresql]
dsn = "mem://core"

[hosts]
dsns = ["mem://hosts-1", "mem://hosts-2"]

[hosts.dsn_by_cluster_id]
"9" = "mem://hosts-cluster-9"

[metrics]
dsns = ["mem://metrics-1", "mem://metrics-2", "mem://metrics-3", "mem://metrics-4"]
replication_percentage = 50

[metrics_aggr_15m]
dsn = "mem://aggr"

[events]
dsn = "mem://events"

[logs]
dsn = "mem://logs"

[checks]
dsn = "mem://checks"

[executor_logs]
dsn = "mem://executor-logs"

[message_bus]
url = "tcp://127.0.0.1:0"
"#;

    #[test]
    fn test_hosts_query_without_filter() {
        assert_eq!(hosts_query("").unwrap(), "SELECT * FROM hosts WHERE cluster_id=$1");
    }

    #[test]
    fn test_hosts_query_with_filter() {
        assert_eq!(
            hosts_query(r#"Tags.role = "web""#).unwrap(),
            "SELECT * FROM hosts WHERE cluster_id=$1 AND tags #>> '{role}' = 'web'"
        );
        assert_eq!(
            count_hosts_query("/free.Memory.Free > 1024").unwrap(),
            "SELECT count(*) FROM hosts WHERE cluster_id=$1 AND (data #>> '{/free,Memory,Free}')::float8 > 1024"
        );
    }

    #[test]
    fn test_bad_filter_is_rejected() {
        assert!(matches!(
            hosts_query("bogus clause"),
            Err(FilterError::UnrecognizedClause { .. })
        ));
    }

    #[tokio::test]
    async fn test_targets_follow_cluster_routing() {
        let config = MasterConfig::from_toml_str(CONFIG).unwrap();
        let pools = DomainPools::connect(&MemoryConnector::new(), &config)
            .await
            .unwrap();

        let read = read_target(&pools, DataDomain::Hosts, ClusterId::new(9));
        assert_eq!(read.dsn, "mem://hosts-cluster-9");

        let read = read_target(&pools, DataDomain::Hosts, ClusterId::new(1));
        assert!(read.dsn.starts_with("mem://hosts-"));

        let writes = write_targets(&pools, DataDomain::Metrics, ClusterId::new(1));
        assert_eq!(writes.len(), 2);
        assert_ne!(writes[0].dsn, writes[1].dsn);
    }
}
