// `create_cluster` — installs the metadata schema (if absent), configures
// Group Replication on the seed instance, and registers it as a
// single-member cluster. Ported from
// `modules/adminapi/cluster/create_cluster.cc`.

use crate::command::Command;
use crate::error::AdminError;
use crate::instance::Instance;
use crate::metadata::{
    ClusterMetadata, ClusterTopologyType, ClusterType, InstanceMetadata, MetadataStorage,
};
use async_trait::async_trait;
use uuid::Uuid;

pub struct CreateClusterOptions {
    pub cluster_name: String,
    pub multi_primary: bool,
    pub replication_allowed_host: String,
}

pub struct CreateCluster<'a> {
    seed: &'a Instance,
    storage: &'a MetadataStorage,
    options: CreateClusterOptions,
    cluster_id: Option<String>,
}

impl<'a> CreateCluster<'a> {
    pub fn new(seed: &'a Instance, storage: &'a MetadataStorage, options: CreateClusterOptions) -> Self {
        Self { seed, storage, options, cluster_id: None }
    }
}

#[async_trait]
impl<'a> Command for CreateCluster<'a> {
    async fn prepare(&mut self) -> crate::Result<()> {
        if self.options.cluster_name.trim().is_empty() {
            return Err(AdminError::BadArgument("cluster_name must not be empty".into()));
        }

        if self.storage.check_version().await?.is_none() {
            for stmt in crate::metadata::schema_ddl::install_statements() {
                self.seed.execute(&stmt).await?;
            }
        }
        Ok(())
    }

    async fn execute(&mut self) -> crate::Result<()> {
        let cluster_id = Uuid::new_v4().to_string();
        let group_name = Uuid::new_v4().to_string();
        let topology = if self.options.multi_primary {
            ClusterTopologyType::MultiPrimary
        } else {
            ClusterTopologyType::SinglePrimary
        };

        let cluster = ClusterMetadata {
            cluster_id: cluster_id.clone(),
            cluster_set_id: None,
            cluster_name: self.options.cluster_name.clone(),
            cluster_type: Some(ClusterType::GroupReplication),
            topology_type: topology,
            group_name: group_name.clone(),
            attributes: Default::default(),
            tags: Default::default(),
        };
        self.storage.insert_cluster(&cluster).await?;
        self.cluster_id = Some(cluster_id.clone());

        self.seed.set_sysvar("group_replication_group_name", &format!("'{group_name}'"), true).await?;
        self.seed
            .set_sysvar(
                "group_replication_single_primary_mode",
                if self.options.multi_primary { "OFF" } else { "ON" },
                true,
            )
            .await?;
        self.seed.execute("START GROUP_REPLICATION").await?;

        let instance = InstanceMetadata {
            cluster_id,
            uuid: self.seed.uuid().to_string(),
            endpoint: self.seed.get_canonical_address(),
            xendpoint: String::new(),
            grendpoint: String::new(),
            server_id: self.seed.server_id(),
            label: self.seed.get_canonical_address(),
            hidden_from_router: false,
            tags: Default::default(),
            instance_type: Some(crate::metadata::InstanceType::GroupMember),
            group_name,
            master_id: None,
            master_uuid: None,
            primary_master: !self.options.multi_primary,
            invalidated: false,
        };
        self.storage.insert_instance(&instance).await
    }

    async fn rollback(&mut self) {
        if let Some(cluster_id) = &self.cluster_id {
            if let Err(e) = self.storage.remove_cluster(cluster_id).await {
                tracing::warn!(target: "ops::create_cluster", error = %e, "failed to roll back cluster metadata insert");
            }
        }
        if let Err(e) = self.seed.execute("STOP GROUP_REPLICATION").await {
            tracing::warn!(target: "ops::create_cluster", error = %e, "failed to stop group replication during rollback");
        }
    }

    async fn finish(&mut self) {}
}
