use prescale_core::{BoxFuture, CollaboratorResult, Instance};

/// Control-plane operations on one workload.
pub trait ClusterController: Send + Sync {
    /// Running (not terminating) instances of the workload.
    fn list_instances<'a>(&'a self) -> BoxFuture<'a, CollaboratorResult<Vec<Instance>>>;

    /// Desired replica count currently recorded by the control plane.
    fn replica_count<'a>(&'a self) -> BoxFuture<'a, CollaboratorResult<u32>>;

    fn set_replica_count<'a>(&'a self, replicas: u32) -> BoxFuture<'a, CollaboratorResult<()>>;
}
