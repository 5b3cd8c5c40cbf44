use grocery_classifier::audit::AuditLog;
use grocery_classifier::oracle::{BackoffPolicy, GeminiTransport, OracleClient};
use grocery_classifier_common::{Product, Taxonomy};
use std::sync::Arc;
use std::time::Duration;

const GEMINI_ENDPOINT: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/{model}:generateContent";

#[tokio::test]
async fn gemini_classification_integration() {
    let api_key = match std::env::var("GEMINI_API_KEY") {
        Ok(key) if !key.trim().is_empty() => key,
        _ => {
            eprintln!("GEMINI_API_KEY not set; skipping integration test");
            return;
        }
    };

    let taxonomy = Taxonomy::from_json_str(
        r#"[
          {"name": "Produce", "subcategories": [{"name": "Fresh Fruit", "productTypes": ["Apples", "Bananas"]}]},
          {"name": "Dairy & Eggs", "subcategories": [{"name": "Cheese", "productTypes": ["Cheddar", "Swiss Cheese"]}]}
        ]"#,
    )
    .expect("invalid taxonomy");

    let transport = GeminiTransport::new(
        GEMINI_ENDPOINT,
        "gemini-2.0-flash",
        &api_key,
        Duration::from_secs(60),
    )
    .expect("failed to build transport");

    let client = OracleClient::new(Arc::new(transport), Arc::new(AuditLog::in_memory()))
        .with_policies(
            BackoffPolicy::new(3, Duration::from_secs(2), Duration::ZERO),
            BackoffPolicy::new(3, Duration::from_secs(1), Duration::ZERO),
        );

    let batch = vec![
        Product::new(None, "Gala Apples 3lb Bag"),
        Product::new(None, "Tillamook Sharp Cheddar Cheese Block"),
    ];
    let results = client.submit(&batch, &taxonomy).await.expect("gemini call failed");

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].category, "Produce");
    assert_eq!(results[1].category, "Dairy & Eggs");
}
