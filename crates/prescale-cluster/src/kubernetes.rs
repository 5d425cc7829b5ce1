//! Kubernetes API client for a single Deployment.
//!
//! Instances are the deployment's pods in phase `Running`, found through the
//! deployment's own label selector. The replica count is read and written
//! through the `scale` subresource.

use std::time::Duration;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::{Client, ResourceExt};
use thiserror::Error;
use tracing::{debug, info};

use prescale_core::config::{AutoscalerConfig, KubernetesConfig};
use prescale_core::{BoxFuture, CollaboratorError, CollaboratorResult, Instance};

use crate::controller::ClusterController;

/// Failures while building the Kubernetes client at startup.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("invalid kubernetes api_url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("failed to infer kubernetes configuration: {0}")]
    Infer(#[from] kube::config::InferConfigError),

    #[error("failed to build kubernetes client: {0}")]
    Client(#[from] kube::Error),
}

/// Resolve client settings: an explicit `api_url` wins, otherwise the
/// in-cluster service account or the local kubeconfig.
pub async fn client_config(
    config: &KubernetesConfig,
    timeout: Duration,
) -> Result<kube::Config, ConnectError> {
    let mut client_config = match &config.api_url {
        Some(url) => {
            let uri = url.parse::<http::Uri>().map_err(|e| ConnectError::InvalidUrl {
                url: url.clone(),
                reason: e.to_string(),
            })?;
            kube::Config::new(uri)
        }
        None => kube::Config::infer().await?,
    };
    if let Some(path) = &config.token_file {
        client_config.auth_info.token_file = Some(path.display().to_string());
    }
    client_config.connect_timeout = Some(timeout);
    client_config.read_timeout = Some(timeout);
    Ok(client_config)
}

pub struct KubernetesController {
    deployments: Api<Deployment>,
    pods: Api<Pod>,
    namespace: String,
    deployment: String,
    container: String,
}

impl KubernetesController {
    pub fn new(client: Client, namespace: &str, deployment: &str, container: &str) -> Self {
        Self {
            deployments: Api::namespaced(client.clone(), namespace),
            pods: Api::namespaced(client, namespace),
            namespace: namespace.to_string(),
            deployment: deployment.to_string(),
            container: container.to_string(),
        }
    }

    /// Build the client from configuration and bind it to the workload.
    pub async fn connect(config: &AutoscalerConfig) -> Result<Self, ConnectError> {
        let client_config =
            client_config(&config.kubernetes, config.collaborator_timeout()).await?;
        info!(
            api = %client_config.cluster_url,
            namespace = %config.workload.namespace,
            deployment = %config.workload.deployment,
            "kubernetes controller configured"
        );
        let client = Client::try_from(client_config)?;
        Ok(Self::new(
            client,
            &config.workload.namespace,
            &config.workload.deployment,
            &config.workload.container,
        ))
    }

    async fn label_selector(&self) -> CollaboratorResult<String> {
        let deployment = self
            .deployments
            .get(&self.deployment)
            .await
            .map_err(unavailable)?;
        let labels = deployment
            .spec
            .and_then(|spec| spec.selector.match_labels)
            .unwrap_or_default();
        if labels.is_empty() {
            return Err(CollaboratorError::BackendUnavailable(format!(
                "deployment {}/{} has no matchLabels selector",
                self.namespace, self.deployment
            )));
        }
        Ok(labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(","))
    }

    fn to_instance(&self, pod: Pod) -> Instance {
        let containers = pod.spec.as_ref().map(|spec| spec.containers.as_slice());
        let container = containers
            .and_then(|cs| {
                cs.iter()
                    .find(|c| c.name == self.container)
                    .or_else(|| cs.first())
            })
            .map(|c| c.name.clone())
            .unwrap_or_else(|| self.container.clone());
        Instance {
            name: pod.name_any(),
            uid: pod.uid().unwrap_or_default(),
            ip: pod.status.and_then(|status| status.pod_ip),
            container,
        }
    }
}

fn unavailable(err: kube::Error) -> CollaboratorError {
    CollaboratorError::BackendUnavailable(format!("kubernetes api: {err}"))
}

impl ClusterController for KubernetesController {
    fn list_instances<'a>(&'a self) -> BoxFuture<'a, CollaboratorResult<Vec<Instance>>> {
        Box::pin(async move {
            let selector = self.label_selector().await?;
            let params = ListParams::default()
                .labels(&selector)
                .fields("status.phase=Running");
            let pods = self.pods.list(&params).await.map_err(unavailable)?;

            let instances: Vec<Instance> = pods
                .items
                .into_iter()
                .filter(|pod| pod.metadata.deletion_timestamp.is_none())
                .map(|pod| self.to_instance(pod))
                .collect();
            debug!(
                deployment = %self.deployment,
                %selector,
                count = instances.len(),
                "listed running instances"
            );
            Ok(instances)
        })
    }

    fn replica_count<'a>(&'a self) -> BoxFuture<'a, CollaboratorResult<u32>> {
        Box::pin(async move {
            let scale = self
                .deployments
                .get_scale(&self.deployment)
                .await
                .map_err(unavailable)?;
            let replicas = scale.spec.and_then(|spec| spec.replicas).unwrap_or(0);
            u32::try_from(replicas).map_err(|_| {
                CollaboratorError::BackendUnavailable(format!(
                    "scale subresource reported {replicas} replicas"
                ))
            })
        })
    }

    fn set_replica_count<'a>(&'a self, replicas: u32) -> BoxFuture<'a, CollaboratorResult<()>> {
        Box::pin(async move {
            if i32::try_from(replicas).is_err() {
                return Err(CollaboratorError::InvalidTarget {
                    target: replicas,
                    reason: "exceeds the Kubernetes replica limit".to_string(),
                });
            }
            let patch = serde_json::json!({ "spec": { "replicas": replicas } });
            let result = self
                .deployments
                .patch_scale(&self.deployment, &PatchParams::default(), &Patch::Merge(&patch))
                .await;
            match result {
                Ok(_) => {
                    info!(deployment = %self.deployment, replicas, "replica count set");
                    Ok(())
                }
                Err(kube::Error::Api(response)) if response.code == 422 => {
                    Err(CollaboratorError::InvalidTarget {
                        target: replicas,
                        reason: response.message,
                    })
                }
                Err(e) => Err(unavailable(e)),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prescale_core::testing::{StubResponse, StubServer};

    const DEPLOYMENT: &str = r#"{
        "apiVersion": "apps/v1", "kind": "Deployment",
        "metadata": {"name": "webapp", "namespace": "prod"},
        "spec": {"selector": {"matchLabels": {"tier": "web", "app": "webapp"}}, "template": {}}
    }"#;

    fn scale(replicas: i32) -> String {
        format!(
            r#"{{"apiVersion":"autoscaling/v1","kind":"Scale","metadata":{{"name":"webapp"}},"spec":{{"replicas":{replicas}}}}}"#
        )
    }

    fn path(target: &str) -> &str {
        target.split('?').next().unwrap_or(target)
    }

    async fn controller(server: &StubServer) -> KubernetesController {
        let config = KubernetesConfig {
            api_url: Some(server.base_url()),
            token_file: None,
        };
        let client_config = client_config(&config, Duration::from_secs(5)).await.unwrap();
        KubernetesController::new(Client::try_from(client_config).unwrap(), "prod", "webapp", "app")
    }

    #[tokio::test]
    async fn lists_running_pods_by_selector() {
        let server = StubServer::start(vec![
            StubResponse::json(200, DEPLOYMENT),
            StubResponse::json(
                200,
                r#"{"apiVersion":"v1","kind":"PodList","metadata":{},"items":[
                    {"metadata":{"name":"webapp-1","uid":"u1"},
                     "spec":{"containers":[{"name":"sidecar"},{"name":"app"}]},
                     "status":{"podIP":"10.0.0.1"}},
                    {"metadata":{"name":"webapp-2","uid":"u2","deletionTimestamp":"2024-05-01T12:00:00Z"},
                     "spec":{"containers":[{"name":"app"}]},
                     "status":{}},
                    {"metadata":{"name":"webapp-3","uid":"u3"},
                     "spec":{"containers":[{"name":"other"}]},
                     "status":{}}
                ]}"#,
            ),
        ])
        .await;

        let instances = controller(&server).await.list_instances().await.unwrap();
        assert_eq!(instances.len(), 2);
        assert_eq!(instances[0].name, "webapp-1");
        assert_eq!(instances[0].uid, "u1");
        assert_eq!(instances[0].container, "app");
        assert_eq!(instances[0].ip.as_deref(), Some("10.0.0.1"));
        assert_eq!(instances[1].container, "other");
        assert_eq!(instances[1].ip, None);

        let requests = server.requests();
        assert_eq!(
            path(&requests[0].target),
            "/apis/apps/v1/namespaces/prod/deployments/webapp"
        );
        assert_eq!(path(&requests[1].target), "/api/v1/namespaces/prod/pods");
        assert!(requests[1].target.contains("labelSelector=app%3Dwebapp%2Ctier%3Dweb"));
        assert!(requests[1].target.contains("fieldSelector=status.phase%3DRunning"));
    }

    #[tokio::test]
    async fn missing_selector_is_an_error() {
        let server = StubServer::start(vec![StubResponse::json(
            200,
            r#"{"apiVersion":"apps/v1","kind":"Deployment","metadata":{"name":"webapp"},
                "spec":{"selector":{},"template":{}}}"#,
        )])
        .await;
        let err = controller(&server).await.list_instances().await.unwrap_err();
        assert!(matches!(err, CollaboratorError::BackendUnavailable(_)));
    }

    #[tokio::test]
    async fn reads_replicas_from_scale() {
        let server = StubServer::start(vec![StubResponse::json(200, scale(4))]).await;
        assert_eq!(controller(&server).await.replica_count().await.unwrap(), 4);
        assert_eq!(
            path(&server.requests()[0].target),
            "/apis/apps/v1/namespaces/prod/deployments/webapp/scale"
        );
    }

    #[tokio::test]
    async fn patches_scale_subresource() {
        let server = StubServer::start(vec![StubResponse::json(200, scale(7))]).await;
        controller(&server).await.set_replica_count(7).await.unwrap();

        let request = &server.requests()[0];
        assert_eq!(request.method, "PATCH");
        assert_eq!(
            path(&request.target),
            "/apis/apps/v1/namespaces/prod/deployments/webapp/scale"
        );
        assert_eq!(
            request.header("content-type"),
            Some("application/merge-patch+json")
        );
        assert_eq!(request.body, r#"{"spec":{"replicas":7}}"#);
    }

    #[tokio::test]
    async fn rejected_target_maps_to_invalid_target() {
        let server = StubServer::start(vec![StubResponse::json(
            422,
            r#"{"apiVersion":"v1","kind":"Status","status":"Failure",
                "message":"replicas must be non-negative","reason":"Invalid","code":422}"#,
        )])
        .await;
        let err = controller(&server)
            .await
            .set_replica_count(3)
            .await
            .unwrap_err();
        assert!(matches!(err, CollaboratorError::InvalidTarget { target: 3, .. }));
    }

    #[tokio::test]
    async fn server_error_is_backend_unavailable() {
        let server = StubServer::start(vec![StubResponse::json(
            503,
            r#"{"apiVersion":"v1","kind":"Status","status":"Failure",
                "message":"etcd unavailable","reason":"ServiceUnavailable","code":503}"#,
        )])
        .await;
        let err = controller(&server).await.replica_count().await.unwrap_err();
        assert!(matches!(err, CollaboratorError::BackendUnavailable(_)));
    }

    #[tokio::test]
    async fn oversized_target_is_rejected_locally() {
        let server = StubServer::start(vec![StubResponse::json(200, scale(1))]).await;
        let err = controller(&server)
            .await
            .set_replica_count(u32::MAX)
            .await
            .unwrap_err();
        assert!(matches!(err, CollaboratorError::InvalidTarget { .. }));
        assert!(server.requests().is_empty());
    }

    #[tokio::test]
    async fn https_api_url_is_accepted() {
        let config = KubernetesConfig {
            api_url: Some("https://kubernetes.default.svc".to_string()),
            token_file: None,
        };
        let client_config = client_config(&config, Duration::from_secs(3)).await.unwrap();
        assert_eq!(client_config.cluster_url.scheme_str(), Some("https"));
        assert_eq!(client_config.read_timeout, Some(Duration::from_secs(3)));
        assert!(Client::try_from(client_config).is_ok());
    }

    #[tokio::test]
    async fn token_file_adds_bearer_header() {
        let server = StubServer::start(vec![StubResponse::json(200, scale(1))]).await;
        let dir = tempfile::tempdir().unwrap();
        let token = dir.path().join("token");
        std::fs::write(&token, "s3cret").unwrap();

        let config = KubernetesConfig {
            api_url: Some(server.base_url()),
            token_file: Some(token),
        };
        let client_config = client_config(&config, Duration::from_secs(5)).await.unwrap();
        let controller = KubernetesController::new(
            Client::try_from(client_config).unwrap(),
            "prod",
            "webapp",
            "app",
        );
        controller.replica_count().await.unwrap();

        assert_eq!(
            server.requests()[0].header("authorization"),
            Some("Bearer s3cret")
        );
    }

    #[tokio::test]
    async fn missing_token_file_fails_to_connect() {
        let config = KubernetesConfig {
            api_url: Some("https://kubernetes.default.svc".to_string()),
            token_file: Some("/nonexistent/prescale/token".into()),
        };
        let client_config = client_config(&config, Duration::from_secs(5)).await.unwrap();
        assert!(Client::try_from(client_config).is_err());
    }
}
