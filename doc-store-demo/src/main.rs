use std::env;
use std::sync::Arc;
use std::time::Duration;

use doc_store::{
    Document, DocumentStore, HashDocumentStore, KvStore, Location, MemoryStore, RedisStore,
    StoreConfig, Value,
};
use rand::Rng;
use rand::distributions::Alphanumeric;
use tracing::info;

const SCHEMA: &str = "demo";

fn sample_document() -> Document {
    let mut doc = Document::new();
    doc.set("name", "Bob");
    doc.set("age", 42);
    doc.add_all(
        "items",
        [
            Value::from(1),
            Value::from(2),
            Value::from(3),
            Value::from("fast"),
            Value::from("slow"),
            Value::from(90.3),
            Value::from(true),
            Value::from(false),
        ],
    );
    doc
}

fn random_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let mode = env::args().nth(1).unwrap_or_else(|| "memory".to_string());
    let (store, config): (Arc<dyn KvStore>, StoreConfig) = match mode.as_str() {
        "memory" => {
            let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
            (store, StoreConfig::default())
        }
        "redis" => {
            let config = StoreConfig::from_env()?;
            let store: Arc<dyn KvStore> = Arc::new(RedisStore::connect(&config).await?);
            (store, config)
        }
        other => {
            eprintln!("Unknown mode: {}", other);
            eprintln!("Usage: doc-store-demo [memory|redis]");
            std::process::exit(2);
        }
    };
    info!(%mode, "store ready");

    let retry = config.retry_policy()?;
    let docs = DocumentStore::new(store.clone()).with_retry_policy(retry.clone());
    let hashes = HashDocumentStore::new(store).with_retry_policy(retry);

    let doc = sample_document();
    let at = Location::from_segments(["United States", "NY", "Rochester"])?;

    docs.put(SCHEMA, &at, &doc, Some(Duration::from_secs(600)))
        .await?;
    println!("string mode, whole document: {}", docs.get(SCHEMA, &at).await?);

    let hash_at = Location::from_indices([0, 1])?;
    hashes.put(SCHEMA, &hash_at, &doc, None).await?;
    println!(
        "hash mode, whole document: {}",
        hashes.get(SCHEMA, &hash_at).await?
    );
    println!(
        "hash mode, name and items: {}",
        hashes.get_fields(SCHEMA, &hash_at, &["name", "items"]).await?
    );
    println!(
        "hash mode, age: {}",
        hashes
            .get_field(SCHEMA, &hash_at, "age")
            .await?
            .unwrap_or_default()
    );

    let lock = format!("{SCHEMA}-lock");
    let token = random_token();
    let ttl = Duration::from_secs(30);
    println!("acquire {lock}: {}", docs.acquire_lock(&lock, &token, ttl).await?);
    println!("extend {lock}: {}", docs.extend_lock(&lock, &token, ttl).await?);
    println!("release {lock}: {}", docs.release_lock(&lock, &token).await?);

    docs.delete(SCHEMA, &at).await?;
    hashes.delete(SCHEMA, &hash_at).await?;
    Ok(())
}
