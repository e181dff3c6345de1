//! Tests for the MongoDB Atlas Data API connector.

use super::*;
use crate::connectors::SourceConnector;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_config(url: &str) -> DataApiConfig {
    DataApiConfig {
        data_api_url: url.to_string(),
        api_key: "key".to_string(),
        data_source: "Cluster0".to_string(),
        database: "library".to_string(),
        collection: "books".to_string(),
        id_field: "_id".to_string(),
    }
}

#[test]
fn test_data_api_config_defaults() {
    let json = r#"{"data_api_url":"https://test.com","database":"d","collection":"c"}"#;
    let config: DataApiConfig = serde_json::from_str(json).unwrap();
    assert_eq!(config.id_field, "_id");
    assert_eq!(config.data_source, "mongodb-atlas");
    assert!(config.api_key.is_empty());
}

#[test]
fn test_data_api_build_url() {
    let connector = DataApiConnector::new(test_config(
        "https://data.mongodb-api.com/app/test/endpoint/data/v1/",
    ));
    assert_eq!(
        connector.build_url("find"),
        "https://data.mongodb-api.com/app/test/endpoint/data/v1/action/find"
    );
}

#[test]
fn test_find_request_is_sorted_by_id() {
    let connector = DataApiConnector::new(test_config("https://example.com"));
    let json = serde_json::to_value(connector.find_request(Some(20), 10)).unwrap();
    assert_eq!(json["dataSource"], "Cluster0");
    assert_eq!(json["sort"], json!({"_id": 1}));
    assert_eq!(json["skip"], 20);
    assert_eq!(json["limit"], 10);
}

#[tokio::test]
async fn test_connect_checks_collection() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/action/find"))
        .and(header("api-key", "key"))
        .and(body_partial_json(json!({"collection": "books", "limit": 1})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"documents": []})))
        .expect(1)
        .mount(&server)
        .await;

    let mut connector = DataApiConnector::new(test_config(&server.uri()));
    connector.connect().await.unwrap();
}

#[tokio::test]
async fn test_connect_rejects_bad_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .mount(&server)
        .await;

    let mut connector = DataApiConnector::new(test_config(&server.uri()));
    let err = connector.connect().await.unwrap_err();
    assert!(matches!(err, Error::Authentication(_)));
}

#[tokio::test]
async fn test_count_reads_aggregate_total() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/action/aggregate"))
        .and(body_partial_json(json!({"pipeline": [{"$count": "total"}]})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"documents": [{"total": 42}]})),
        )
        .mount(&server)
        .await;

    let connector = DataApiConnector::new(test_config(&server.uri()));
    assert_eq!(connector.count().await.unwrap(), 42);
}

#[tokio::test]
async fn test_count_empty_collection() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/action/aggregate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"documents": []})))
        .mount(&server)
        .await;

    let connector = DataApiConnector::new(test_config(&server.uri()));
    assert_eq!(connector.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_fetch_page_decodes_documents() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/action/find"))
        .and(body_partial_json(json!({"skip": 2, "limit": 2, "sort": {"_id": 1}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "documents": [
                {"_id": {"$oid": "64b000000000000000000003"}, "title": "Dune", "authors": ["Frank Herbert"]},
                {"_id": {"$oid": "64b000000000000000000004"}, "title": "Emma", "year": {"$numberInt": "1815"}}
            ]
        })))
        .mount(&server)
        .await;

    let connector = DataApiConnector::new(test_config(&server.uri()));
    let page = connector.fetch_page(2, 2).await.unwrap().records;

    assert_eq!(page.len(), 2);
    assert_eq!(page[0].id.as_deref(), Some("64b000000000000000000003"));
    assert_eq!(page[1].get("year"), Some(&SourceValue::Integer(1815)));
}

#[tokio::test]
async fn test_fetch_page_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("Service Unavailable"))
        .mount(&server)
        .await;

    let connector = DataApiConnector::new(test_config(&server.uri()));
    let err = connector.fetch_page(0, 10).await.unwrap_err();
    assert!(matches!(err, Error::SourceConnection(_)));
    assert!(crate::retry::is_retryable_error(&err));
}
