//! Publish and fetch a package against on-disk backends.
//!
//! ```sh
//! cargo run --example local_store -- /tmp/package-store
//! ```

use camino::Utf8PathBuf;
use package_store::{PackageStoreConfig, RegistryIndex, UploadEvent};
use serde_json::json;
use tokio::io::AsyncWriteExt as _;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let root: Utf8PathBuf = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "package-store-data".into())
        .into();

    let config: PackageStoreConfig = serde_json::from_value(json!({
        "bucket": "packages",
        "projectId": "local",
        "storage": {"driver": "local", "path": root.join("blobs")},
        "datastore": {"driver": "local", "path": root.join("index.json")},
    }))?;
    let index = RegistryIndex::from_config(config.resolve()?)?;

    let package = index.get_package_storage("left-pad");
    match package
        .create_package(&json!({"name": "left-pad", "versions": {}}))
        .await
    {
        Ok(()) => index.add("left-pad").await?,
        Err(error) => tracing::info!("{error}"),
    }

    let mut upload = package.write_tarball("left-pad-1.0.0.tgz");
    upload.write_all(b"BINARYDATA").await?;
    upload.shutdown().await?;
    while let Some(event) = upload.next_event().await {
        if let UploadEvent::Error(error) = event {
            tracing::info!("{error}");
        }
    }

    let body = package.read_tarball("left-pad-1.0.0.tgz").into_bytes().await?;
    tracing::info!(bytes = body.len(), "Fetched tarball");
    tracing::info!(packages = ?index.list().await?, "Index");
    Ok(())
}
