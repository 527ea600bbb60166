use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::errors::StoreError;
use crate::sink::{Destination, ManagementApi};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// The table already existed and was left untouched.
    Reused,
    /// The table and mapping were created or updated.
    Applied,
}

/// Makes sure the destination table and its ingestion mapping exist before
/// any data is sent.
pub struct Provisioner {
    management: Arc<dyn ManagementApi>,
    settle_delay: Duration,
}

impl Provisioner {
    pub fn new(management: Arc<dyn ManagementApi>, settle_delay: Duration) -> Self {
        Self {
            management,
            settle_delay,
        }
    }

    /// Creates or updates the table and mapping when the table is missing or
    /// `force` is set; otherwise reuses it as is.
    ///
    /// Each mutating command is followed by the settle delay, since the store
    /// applies schema changes asynchronously.
    pub async fn ensure(
        &self,
        destination: &Destination,
        force: bool,
    ) -> Result<ProvisionOutcome, StoreError> {
        let exists = self.management.table_exists(&destination.table).await?;

        if exists && !force {
            info!("Using table: {}", destination.table);
            self.report_drift(destination).await;
            return Ok(ProvisionOutcome::Reused);
        }

        info!("Creating or updating table {}", destination.table);
        self.management
            .create_or_alter_table(&destination.table, &destination.schema)
            .await?;
        self.settle().await;

        info!(
            "Creating or updating ingestion mapping '{}' on {}",
            destination.mapping_name, destination.table
        );
        self.management
            .create_or_alter_mapping(
                &destination.table,
                &destination.mapping_name,
                &destination.mapping_document,
            )
            .await?;
        self.settle().await;

        info!("Table update done.");
        Ok(ProvisionOutcome::Applied)
    }

    async fn settle(&self) {
        if !self.settle_delay.is_zero() {
            info!(
                "Waiting {:?} for the store to apply the change",
                self.settle_delay
            );
            tokio::time::sleep(self.settle_delay).await;
        }
    }

    /// Warns about configured columns the existing table lacks. Never fails:
    /// the table is reused either way.
    async fn report_drift(&self, destination: &Destination) {
        match self.management.table_schema(&destination.table).await {
            Ok(Some(remote)) => {
                let missing = destination.schema.missing_from(&remote);
                if !missing.is_empty() {
                    let names: Vec<&str> = missing.iter().map(|c| c.name.as_str()).collect();
                    warn!(
                        "Table {} is missing {} configured column(s): {}. Run with --force to update it.",
                        destination.table,
                        names.len(),
                        names.join(", ")
                    );
                }
            }
            Ok(None) => {}
            Err(e) => warn!(
                "Could not read the schema of {}: {}",
                destination.table, e
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldMapping, TableSchema};
    use crate::sink::MockManagementApi;
    use reqwest::StatusCode;
    use tokio::time::Instant;

    fn destination() -> Destination {
        let schema: TableSchema = "TIMESTAMP:datetime,msg:string,DevInstanceId:string"
            .parse()
            .unwrap();
        Destination {
            table: "aliceEvents".to_string(),
            mapping_name: "jsonmapping1".to_string(),
            mapping_document: FieldMapping::compile(&schema).to_json().unwrap(),
            schema,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_table_is_created_then_mapped() {
        let mut management = MockManagementApi::new();
        let mut seq = mockall::Sequence::new();
        management
            .expect_table_exists()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(false));
        management
            .expect_create_or_alter_table()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|table, schema| {
                assert_eq!(table, "aliceEvents");
                assert_eq!(schema.len(), 3);
                Ok(())
            });
        management
            .expect_create_or_alter_mapping()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, name, document| {
                assert_eq!(name, "jsonmapping1");
                assert!(document.contains(r#""path":"$.msg""#));
                Ok(())
            });
        management.expect_table_schema().never();

        let provisioner = Provisioner::new(Arc::new(management), Duration::from_secs(30));
        let started = Instant::now();
        let outcome = provisioner.ensure(&destination(), false).await.unwrap();

        assert_eq!(outcome, ProvisionOutcome::Applied);
        assert!(started.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_existing_table_is_reused_without_mutation() {
        let mut management = MockManagementApi::new();
        management
            .expect_table_exists()
            .times(2)
            .returning(|_| Ok(true));
        management
            .expect_table_schema()
            .times(2)
            .returning(|_| Ok(Some("TIMESTAMP:datetime,msg:string".parse().unwrap())));
        management.expect_create_or_alter_table().never();
        management.expect_create_or_alter_mapping().never();

        let provisioner = Provisioner::new(Arc::new(management), Duration::from_secs(30));
        let destination = destination();

        assert_eq!(
            provisioner.ensure(&destination, false).await.unwrap(),
            ProvisionOutcome::Reused
        );
        assert_eq!(
            provisioner.ensure(&destination, false).await.unwrap(),
            ProvisionOutcome::Reused
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_updates_existing_table() {
        let mut management = MockManagementApi::new();
        management
            .expect_table_exists()
            .times(1)
            .returning(|_| Ok(true));
        management
            .expect_create_or_alter_table()
            .times(1)
            .returning(|_, _| Ok(()));
        management
            .expect_create_or_alter_mapping()
            .times(1)
            .returning(|_, _, _| Ok(()));

        let provisioner = Provisioner::new(Arc::new(management), Duration::ZERO);
        assert_eq!(
            provisioner.ensure(&destination(), true).await.unwrap(),
            ProvisionOutcome::Applied
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_create_stops_before_mapping() {
        let mut management = MockManagementApi::new();
        management
            .expect_table_exists()
            .returning(|_| Ok(false));
        management
            .expect_create_or_alter_table()
            .times(1)
            .returning(|_, _| {
                Err(StoreError::Service {
                    status: StatusCode::FORBIDDEN,
                    message: "Principal is not authorized".to_string(),
                })
            });
        management.expect_create_or_alter_mapping().never();

        let provisioner = Provisioner::new(Arc::new(management), Duration::ZERO);
        let err = provisioner.ensure(&destination(), false).await.unwrap_err();
        assert!(matches!(err, StoreError::Service { status, .. } if status == StatusCode::FORBIDDEN));
    }

    #[tokio::test(start_paused = true)]
    async fn test_schema_read_failure_does_not_block_reuse() {
        let mut management = MockManagementApi::new();
        management
            .expect_table_exists()
            .returning(|_| Ok(true));
        management.expect_table_schema().returning(|_| {
            Err(StoreError::Decode {
                reason: "garbled".to_string(),
            })
        });

        let provisioner = Provisioner::new(Arc::new(management), Duration::ZERO);
        assert_eq!(
            provisioner.ensure(&destination(), false).await.unwrap(),
            ProvisionOutcome::Reused
        );
    }
}
