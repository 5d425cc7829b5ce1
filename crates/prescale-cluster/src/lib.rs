//! prescale-cluster: the control-plane side of the autoscaler.
//!
//! [`ClusterController`] lists the running instances of the workload and
//! reads or sets its replica count. [`KubernetesController`] talks to the
//! Kubernetes API through a `kube` client, configured from the in-cluster
//! service account, the local kubeconfig, or an explicit API URL.

pub mod controller;
pub mod kubernetes;

pub use controller::ClusterController;
pub use kubernetes::{ConnectError, KubernetesController};
