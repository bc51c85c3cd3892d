//! Test fixtures and data for optimizer tests

use optimizer::cluster::{ClusterDefinition, ClusterSubgraph};
use optimizer::config::{BudgetConfig, OptimizerConfig};
use optimizer::core::TreeDefinition;
use optimizer::GraphModel;
use shared::{NodeId, OptionId};
use std::collections::BTreeMap;

/// Standard test data and fixtures
pub struct TestFixtures;

impl TestFixtures {
    pub const ROOT: NodeId = 1;
    pub const SOCKET: NodeId = 8;
    pub const CHOICE: NodeId = 6;
    pub const KEYSTONE: NodeId = 7;
    pub const DEFAULT_WORKERS: usize = 2;

    /// ```text
    /// 1 ─ 2 ─ 3 ─ 4(notable)
    /// │   │   └── 9
    /// │   └── 8(socket)
    /// └── 5 ─ 6(choice 201|202) ─ 7(keystone)
    /// ```
    pub const TREE_JSON: &'static str = r#"{
        "root": 1,
        "nodes": [
            { "id": 1, "name": "start" },
            { "id": 2, "links": [1, 3, 8] },
            { "id": 3, "links": [4, 9] },
            { "id": 4, "kind": "notable", "name": "Heavy Hitter" },
            { "id": 5, "links": [1, 6] },
            { "id": 6, "kind": "choice", "options": [201, 202] },
            { "id": 7, "kind": "keystone", "name": "Overload", "links": [6] },
            { "id": 8, "kind": "socket" },
            { "id": 9 }
        ]
    }"#;

    pub fn tree() -> GraphModel {
        let definition: TreeDefinition = serde_json::from_str(Self::TREE_JSON).unwrap();
        GraphModel::from_definition(definition).unwrap()
    }

    /// Throughput each tree node and cluster node adds
    pub fn node_values() -> BTreeMap<NodeId, f64> {
        BTreeMap::from([
            (2, 1.0),
            (3, 1.0),
            (4, 10.0),
            (5, 2.0),
            (6, 3.0),
            (7, 20.0),
            (9, 2.0),
            (1003, 5.0),
            (1006, 3.0),
            (1007, 2.0),
        ])
    }

    pub fn option_values() -> BTreeMap<OptionId, f64> {
        BTreeMap::from([(201, 1.0), (202, 5.0)])
    }

    pub fn budget(max_points: usize) -> BudgetConfig {
        BudgetConfig {
            max_points,
            min_points: 0,
        }
    }

    /// Configuration tuned for fast, reproducible test runs
    pub fn config(max_points: usize) -> OptimizerConfig {
        let mut config = OptimizerConfig::default();
        config.budget = Self::budget(max_points);
        config.pool.size = Self::DEFAULT_WORKERS;
        config.pool.call_timeout_ms = 1_000;
        config.pool.startup_timeout_ms = 500;
        config.pool.shutdown_grace_ms = 10;
        config.genetic.population_size = 12;
        config.genetic.max_generations = 30;
        config.genetic.seed = Some(42);
        config
    }

    /// Cluster plugged into socket 8
    pub fn cluster() -> ClusterSubgraph {
        let definition: ClusterDefinition = serde_json::from_str(
            r#"{
                "socket": 8,
                "root": 1000,
                "nodes": [
                    { "id": 1000, "links": [1001, 1004] },
                    { "id": 1001, "links": [1002] },
                    { "id": 1002, "links": [1003, 1006] },
                    { "id": 1003, "kind": "notable", "value": 5.0 },
                    { "id": 1004, "links": [1005] },
                    { "id": 1005, "links": [1006] },
                    { "id": 1006, "kind": "notable", "value": 3.0, "links": [1007] },
                    { "id": 1007, "kind": "notable", "value": 2.0 }
                ]
            }"#,
        )
        .unwrap();
        ClusterSubgraph::from_definition(definition).unwrap()
    }
}
