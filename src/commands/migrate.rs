use tracing::info;

use crate::storage::persist::Persister;
use crate::storage::types::MigrationReport;

/// Push locally held captures to the remote store.
pub async fn migrate_local_captures(persister: &Persister) -> Result<MigrationReport, String> {
    if !persister.has_remote() {
        return Err(
            "No remote storage configured. Set storage.url and run `ppe-monitor key set storage`."
                .to_string(),
        );
    }
    info!("Starting migration of local captures");
    persister
        .migrate()
        .await
        .map_err(|e| format!("Migration failed: {}", e))
}
