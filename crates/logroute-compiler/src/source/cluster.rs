//! kube-rs backed source

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Node, Secret};
use kube::api::{Api, ListParams};
use kube::{Client, ResourceExt};
use tracing::debug;

use logroute_common::crd::{ClusterFlow, ClusterSink, Flow, LogPipeline, LogRoute, Sink};
use logroute_common::Error;

use super::{NamespaceInfo, ResourceSource};

/// Reads logroute objects from the API server
#[derive(Clone)]
pub struct KubeResourceSource {
    client: Client,
}

impl KubeResourceSource {
    /// Create a new source using the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ResourceSource for KubeResourceSource {
    async fn get_pipeline(&self, name: &str) -> Result<Option<LogPipeline>, Error> {
        let api: Api<LogPipeline> = Api::all(self.client.clone());
        match api.get(name).await {
            Ok(pipeline) => Ok(Some(pipeline)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_namespaces(&self) -> Result<Vec<NamespaceInfo>, Error> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).await?;
        Ok(list
            .items
            .into_iter()
            .map(|ns| NamespaceInfo::new(ns.name_any(), ns.labels().clone()))
            .collect())
    }

    async fn list_flows(&self) -> Result<Vec<Flow>, Error> {
        let api: Api<Flow> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn list_cluster_flows(&self, namespace: &str) -> Result<Vec<ClusterFlow>, Error> {
        let api: Api<ClusterFlow> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn list_sinks(&self) -> Result<Vec<Sink>, Error> {
        let api: Api<Sink> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn list_cluster_sinks(&self, namespace: &str) -> Result<Vec<ClusterSink>, Error> {
        let api: Api<ClusterSink> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn list_routes(&self) -> Result<Vec<LogRoute>, Error> {
        let api: Api<LogRoute> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = match api.get(name).await {
            Ok(secret) => secret,
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!(namespace, secret = name, "secret not found");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let mut data: BTreeMap<String, String> = secret
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (k, String::from_utf8_lossy(&v.0).into_owned()))
            .collect();
        data.extend(secret.string_data.unwrap_or_default());
        Ok(Some(data))
    }

    async fn count_nodes(&self) -> Result<usize, Error> {
        let api: Api<Node> = Api::all(self.client.clone());
        Ok(api.list_metadata(&ListParams::default()).await?.items.len())
    }
}
