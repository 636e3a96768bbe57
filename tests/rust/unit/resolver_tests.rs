use std::sync::Arc;
use std::time::Duration;

use querygraph::graph_catalog::{GraphSchemaError, KeyType, PathNode, SchemaGraph};
use querygraph::resolver::{CandidateTable, RelevanceResolver, ResolveError, ResolverSettings};

use super::fixtures::{
    chain_graph, shop_graph, store_with, FaultyPaths, FixedPath, KeywordEmbedder, PathFault,
    CHAIN_VOCABULARY, SHOP_VOCABULARY,
};

fn hints(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn names(tables: &[CandidateTable]) -> Vec<&str> {
    tables.iter().map(|t| t.name.as_str()).collect()
}

fn settings(top_k: usize, path_max_depth: usize) -> ResolverSettings {
    ResolverSettings {
        top_k,
        path_max_depth,
        ..ResolverSettings::default()
    }
}

async fn shop_resolver(settings: ResolverSettings) -> RelevanceResolver {
    let store = store_with("shop", Arc::new(shop_graph())).await;
    RelevanceResolver::new(
        store,
        Arc::new(KeywordEmbedder::new(SHOP_VOCABULARY)),
        settings,
    )
}

async fn chain_resolver(graph: Arc<dyn SchemaGraph>, settings: ResolverSettings) -> RelevanceResolver {
    let store = store_with("chain", graph).await;
    RelevanceResolver::new(
        store,
        Arc::new(KeywordEmbedder::new(CHAIN_VOCABULARY)),
        settings,
    )
}

#[tokio::test]
async fn test_table_hints_pull_in_foreign_key_neighbours() {
    let resolver = shop_resolver(settings(1, 9)).await;

    let tables = resolver
        .resolve("shop", &hints(&["customer names", "their orders"]), &[])
        .await
        .unwrap();

    // matched tables first, then the one-hop sphere around them
    assert_eq!(
        names(&tables),
        vec!["customers", "orders", "order_items", "payments"]
    );
    assert!(!names(&tables).contains(&"logs"));
    assert!(!names(&tables).contains(&"products"));
}

#[tokio::test]
async fn test_candidates_carry_only_their_own_columns() {
    let resolver = shop_resolver(settings(1, 9)).await;

    let tables = resolver
        .resolve("shop", &hints(&["customer", "order"]), &[])
        .await
        .unwrap();

    for table in &tables {
        assert!(!table.columns.is_empty(), "{} has no columns", table.name);
        for column in &table.columns {
            assert_eq!(column.table, table.name);
        }
    }

    let orders = tables.iter().find(|t| t.name == "orders").unwrap();
    assert_eq!(
        orders.foreign_key_summary,
        "Foreign keys: fk_orders_customer_id: customer_id references customers.id"
    );
}

#[tokio::test]
async fn test_column_hints_surface_owning_table() {
    let resolver = shop_resolver(settings(1, 9)).await;

    let tables = resolver
        .resolve("shop", &[], &hints(&["email address"]))
        .await
        .unwrap();

    assert_eq!(names(&tables), vec!["customers"]);
    let columns: Vec<&str> = tables[0].columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(columns, vec!["id", "email"]);
}

#[tokio::test]
async fn test_blank_hints_resolve_to_nothing() {
    let resolver = shop_resolver(ResolverSettings::default()).await;

    let tables = resolver
        .resolve("shop", &hints(&["", "   "]), &hints(&["\t"]))
        .await
        .unwrap();

    assert!(tables.is_empty());
}

#[tokio::test]
async fn test_unknown_graph_is_an_error() {
    let resolver = shop_resolver(ResolverSettings::default()).await;

    let err = resolver
        .resolve("warehouse", &hints(&["customer"]), &[])
        .await
        .unwrap_err();

    assert_eq!(
        err,
        ResolveError::Graph(GraphSchemaError::GraphNotFound {
            graph_id: "warehouse".to_string()
        })
    );
}

#[tokio::test]
async fn test_connecting_tables_fill_the_gap_between_matches() {
    let resolver = chain_resolver(Arc::new(chain_graph()), settings(1, 12)).await;

    let tables = resolver
        .resolve("chain", &hints(&["alpha", "echo"]), &[])
        .await
        .unwrap();

    assert_eq!(
        names(&tables),
        vec!["alpha", "echo", "bravo", "charlie", "delta"]
    );
}

#[tokio::test]
async fn test_paths_longer_than_max_depth_are_ignored() {
    let resolver = chain_resolver(Arc::new(chain_graph()), settings(1, 9)).await;

    let tables = resolver
        .resolve("chain", &hints(&["alpha", "echo"]), &[])
        .await
        .unwrap();

    // only the sphere reaches past the matched tables
    assert_eq!(names(&tables), vec!["alpha", "echo", "bravo", "delta"]);
}

#[tokio::test]
async fn test_failing_path_search_is_skipped() {
    let graph = Arc::new(FaultyPaths {
        inner: Arc::new(chain_graph()),
        fault: PathFault::Fail,
    });
    let resolver = chain_resolver(graph, settings(1, 12)).await;

    let tables = resolver
        .resolve("chain", &hints(&["alpha", "echo"]), &[])
        .await
        .unwrap();

    assert_eq!(names(&tables), vec!["alpha", "echo", "bravo", "delta"]);
}

#[tokio::test]
async fn test_slow_path_search_is_abandoned_after_pair_timeout() {
    let graph = Arc::new(FaultyPaths {
        inner: Arc::new(chain_graph()),
        fault: PathFault::Stall,
    });
    let resolver = chain_resolver(
        graph,
        ResolverSettings {
            top_k: 1,
            path_max_depth: 12,
            pair_timeout: Duration::from_millis(20),
        },
    )
    .await;

    let started = std::time::Instant::now();
    let tables = resolver
        .resolve("chain", &hints(&["alpha", "echo"]), &[])
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(names(&tables), vec!["alpha", "echo", "bravo", "delta"]);
}

#[tokio::test]
async fn test_repeated_hits_appear_once() {
    let resolver = shop_resolver(settings(2, 9)).await;

    let tables = resolver
        .resolve(
            "shop",
            &hints(&["customer", "customer accounts"]),
            &hints(&["customer email"]),
        )
        .await
        .unwrap();

    let mut seen = names(&tables);
    let total = seen.len();
    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), total);
    assert_eq!(tables[0].name, "customers");
}

#[tokio::test]
async fn test_sphere_reaches_table_the_embedding_missed() {
    let resolver = shop_resolver(settings(1, 9)).await;

    // only `customers` is returned by the nearest-table search
    let tables = resolver
        .resolve("shop", &hints(&["customers who placed orders"]), &[])
        .await
        .unwrap();

    assert_eq!(names(&tables), vec!["customers", "orders"]);
}

#[tokio::test]
async fn test_path_keeps_primary_key_owners_and_skips_other_columns() {
    let graph = Arc::new(FixedPath {
        inner: Arc::new(shop_graph()),
        nodes: vec![
            PathNode::Column {
                table: "payments".to_string(),
                name: "id".to_string(),
                key_type: KeyType::Primary,
            },
            PathNode::Column {
                table: "logs".to_string(),
                name: "id".to_string(),
                key_type: KeyType::Foreign,
            },
        ],
    });
    let store = store_with("shop", graph).await;
    let resolver = RelevanceResolver::new(
        store,
        Arc::new(KeywordEmbedder::new(SHOP_VOCABULARY)),
        settings(1, 9),
    );

    let tables = resolver
        .resolve("shop", &hints(&["customer", "product"]), &[])
        .await
        .unwrap();

    let payments = tables
        .iter()
        .find(|t| t.name == "payments")
        .expect("primary key column pulls in its table");
    let columns: Vec<&str> = payments.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(columns, vec!["id", "order_id", "amount"]);
    assert!(!names(&tables).contains(&"logs"));
}
