//! Integration tests for pipeline compilation.
//!
//! Tests cover filter translation, relative dates, element filters, template
//! and declarative assembly, and the error contract at the executor boundary.

use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{TimeZone, Utc};
use pipewright_core::{AggregationConfig, FilterParameters, FixedClock, PipelineStage, ResultRow};
use pipewright_query::{
    Aggregation, AggregationError, Compiler, ConfigurationError, Executor, StoreError,
};
use serde_json::{json, Value};

// ============================================================================
// Helper Functions
// ============================================================================

fn compiler() -> Compiler<FixedClock> {
    Compiler::with_clock(FixedClock::new(Utc.with_ymd_and_hms(2024, 6, 15, 0, 0, 0).unwrap()))
}

fn filters(value: Value) -> FilterParameters {
    value.as_object().cloned().unwrap()
}

fn summary(stages: &[PipelineStage]) -> String {
    stages
        .iter()
        .map(PipelineStage::operator)
        .collect::<Vec<_>>()
        .join(" -> ")
}

fn work_orders() -> AggregationConfig {
    AggregationConfig::from_value(json!({
        "name": "paint-usage",
        "collection": "documents",
        "baseFilter": { "documentType": "workOrder" },
        "fieldMappings": {
            "status": "data.status",
            "paintSpec": "lineItems.paintSpecId",
            "date_range": "data.completedAt"
        },
        "arrayFields": ["lineItems"],
        "pipeline": [
            { "$unwind": "$lineItems" },
            { "$addFields": { "coatCount": { "$size": "$lineItems.coats" } } },
            { "$unwind": "$lineItems.coats" },
            { "$group": { "_id": "$lineItems.paintSpecId", "litres": { "$sum": "$lineItems.coats.litres" } } },
            { "$sort": { "litres": -1 } }
        ]
    }))
    .unwrap()
}

fn invoices() -> AggregationConfig {
    AggregationConfig::from_value(json!({
        "name": "invoice-summary",
        "collection": "documents",
        "baseFilter": { "documentType": "invoice", "issuedAt": { "$lte": "now" } },
        "fieldMappings": { "customer": "data.customerId", "sku": "lineItems.sku" },
        "unwind": { "path": "lineItems", "preserveNullAndEmptyArrays": false },
        "lookups": [
            { "from": "customers", "localField": "data.customerId", "foreignField": "_id", "as": "customer", "unwind": true },
            { "from": "x", "as": "y" },
            {
                "from": "payments",
                "let": { "invoiceId": "$_id" },
                "pipeline": [{ "$match": { "$expr": { "$eq": ["$invoiceId", "$$invoiceId"] } } }],
                "as": "payments"
            }
        ],
        "postLookupFilter": { "customer.active": true },
        "groupBy": {
            "id": "$customer.region",
            "fields": {
                "invoices": "count",
                "revenue": { "operator": "sum", "field": "$lineItems.amount" },
                "largest": { "$max": "$lineItems.amount" }
            }
        },
        "sort": { "revenue": -1 },
        "limit": 20
    }))
    .unwrap()
}

/// Executor that counts calls and returns nothing.
#[derive(Default)]
struct CountingExecutor {
    calls: AtomicUsize,
}

impl Executor for CountingExecutor {
    fn execute(&self, _collection: &str, _stages: &[PipelineStage]) -> Result<Vec<ResultRow>, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Vec::new())
    }
}

// ============================================================================
// Filter Translation
// ============================================================================

#[test]
fn test_in_filter_is_exact() {
    let config = invoices();
    let values = json!(["C-1", "C-2", "C-3"]);
    let stages = compiler()
        .compile(&config, &filters(json!({ "customer__in": values.clone() })))
        .unwrap();

    let base = stages[0].as_match().unwrap();
    assert_eq!(base["data.customerId"], json!({ "$in": values }));
}

#[test]
fn test_malformed_filter_values_dropped() {
    let config = invoices();
    let stages = compiler()
        .compile(&config, &filters(json!({ "customer": "", "region": null })))
        .unwrap();
    let base = stages[0].as_match().unwrap();
    assert!(!base.contains_key("data.customerId"));
    assert!(!base.contains_key("region"));
}

#[test]
fn test_mtd_preset() {
    let config = work_orders();
    let stages = compiler()
        .compile(&config, &filters(json!({ "date_range": "MTD" })))
        .unwrap();
    assert_eq!(
        stages[0].as_match().unwrap()["data.completedAt"],
        json!({ "$gte": "2024-06-01T00:00:00.000Z", "$lte": "2024-06-15T23:59:59.999Z" })
    );
}

#[test]
fn test_placeholder_rounding_by_operator() {
    let config = work_orders();
    let stages = compiler()
        .compile(
            &config,
            &filters(json!({ "date_range__gte": "now", "date_range__lte": "now" })),
        )
        .unwrap();
    assert_eq!(
        stages[0].as_match().unwrap()["data.completedAt"],
        json!({ "$gte": "2024-06-15T00:00:00.000Z", "$lte": "2024-06-15T23:59:59.999Z" })
    );
}

// ============================================================================
// Element Filters
// ============================================================================

#[test]
fn test_element_filter_after_first_unwind_only() {
    let config = work_orders();
    let stages = compiler()
        .compile(&config, &filters(json!({ "paintSpec": "PS-7", "status": "done" })))
        .unwrap();

    let base = stages[0].as_match().unwrap();
    assert!(base.keys().all(|k| !k.contains("paintSpecId")));
    assert_eq!(base["data.status"], "done");

    let injected: Vec<usize> = stages
        .iter()
        .enumerate()
        .filter(|(_, s)| s.as_match().is_some_and(|m| m.contains_key("paintSpecId")))
        .map(|(i, _)| i)
        .collect();
    let first_unwind = stages.iter().position(PipelineStage::is_unwind).unwrap();

    assert_eq!(injected, vec![first_unwind + 1]);
    assert_eq!(stages.iter().filter(|s| s.is_unwind()).count(), 2);
}

#[test]
fn test_line_item_filter_routed_without_declared_array() {
    let config = AggregationConfig::from_value(json!({
        "name": "wo-lookup",
        "collection": "documents",
        "baseFilter": { "documentType": "wo" },
        "fieldMappings": { "paintSpec": "lineItems.paintSpecId" },
        "lookups": [
            { "from": "specs", "as": "spec", "localField": "lineItems.paintSpecId", "foreignField": "_id" }
        ]
    }))
    .unwrap();

    let stages = compiler()
        .compile(&config, &filters(json!({ "paintSpec": "PS-7" })))
        .unwrap();

    assert_eq!(stages[0].body(), json!({ "documentType": "wo" }));
    assert_eq!(summary(&stages), "$match -> $lookup");
    assert!(stages
        .iter()
        .filter_map(PipelineStage::as_match)
        .all(|m| !m.contains_key("paintSpecId") && !m.contains_key("lineItems.paintSpecId")));
}

#[test]
fn test_template_stage_order() {
    let config = work_orders();
    let stages = compiler()
        .compile(&config, &filters(json!({ "paintSpec": "PS-7" })))
        .unwrap();
    insta::assert_snapshot!(
        summary(&stages),
        @"$match -> $unwind -> $match -> $addFields -> $unwind -> $group -> $sort"
    );
}

#[test]
fn test_declarative_stage_order() {
    let config = invoices();
    let stages = compiler()
        .compile(&config, &filters(json!({ "sku": "BOLT-10" })))
        .unwrap();
    insta::assert_snapshot!(
        summary(&stages),
        @"$match -> $unwind -> $match -> $lookup -> $unwind -> $lookup -> $match -> $group -> $sort -> $limit"
    );
    assert_eq!(stages[2].body(), json!({ "sku": "BOLT-10" }));
    assert_eq!(
        stages[7].body(),
        json!({
            "_id": "$customer.region",
            "invoices": { "$sum": 1 },
            "revenue": { "$sum": "$lineItems.amount" },
            "largest": { "$max": "$lineItems.amount" }
        })
    );
}

// ============================================================================
// Lookups
// ============================================================================

#[test]
fn test_incomplete_lookup_omitted() {
    let config = invoices();
    let stages = compiler().compile(&config, &FilterParameters::new()).unwrap();

    let lookups: Vec<Value> = stages
        .iter()
        .filter(|s| matches!(s, PipelineStage::Lookup(_)))
        .map(PipelineStage::body)
        .collect();
    assert_eq!(lookups.len(), 2);
    assert!(lookups.iter().all(|l| l["from"] != "x"));
    assert_eq!(lookups[1]["let"], json!({ "invoiceId": "$_id" }));
    assert_eq!(stages.last().unwrap().body(), json!(20));
}

// ============================================================================
// Determinism
// ============================================================================

#[test]
fn test_compile_idempotent_and_pure() {
    let config = invoices();
    let snapshot = serde_json::to_value(&config).unwrap();
    let params = filters(json!({ "customer__in": ["C-1"], "date_range": "YTD", "sku": "A" }));

    let first = compiler().compile(&config, &params).unwrap();
    let second = compiler().compile(&config, &params).unwrap();

    assert_eq!(first, second);
    assert_eq!(serde_json::to_value(&config).unwrap(), snapshot);
    assert_eq!(config.base_filter["issuedAt"]["$lte"], "now");
}

// ============================================================================
// Errors
// ============================================================================

#[test]
fn test_missing_discriminator_never_reaches_store() {
    let config = AggregationConfig::from_value(json!({ "baseFilter": {} })).unwrap();
    let err = compiler().compile(&config, &FilterParameters::new()).unwrap_err();
    assert!(
        matches!(&err, ConfigurationError::MissingDiscriminator { expected, .. } if expected.contains(&"documentType".to_string()))
    );
    assert!(err.to_string().contains("documentType"));

    let executor = CountingExecutor::default();
    let err = Aggregation::with_compiler(compiler())
        .run(&config, &FilterParameters::new(), &executor)
        .unwrap_err();
    assert!(matches!(err, AggregationError::Configuration(_)));
    assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_invalid_template_stage() {
    let config = AggregationConfig::from_value(json!({
        "baseFilter": { "entityId": "E-1" },
        "pipeline": [{ "$limit": 5, "$skip": 1 }]
    }))
    .unwrap();
    let err = compiler().compile(&config, &FilterParameters::new()).unwrap_err();
    assert!(matches!(err, ConfigurationError::InvalidStage { index: 0, .. }));
}
