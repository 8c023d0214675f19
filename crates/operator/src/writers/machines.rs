use super::{Reconciled, Section, Writers, entries::set_count};
use crate::{
    Error, Result,
    cluster::AggregateApi,
    events::{ChangeType, ResourceEvent},
};

const ACTIVE_MACHINES: &str = "activeMachines";

impl<A: AggregateApi> Writers<A> {
    /// Machines are counted from a cluster-wide listing rather than tracked per event.
    ///
    /// The listing is taken again under the write lock, so a slow listing can
    /// never overwrite a count observed after it.
    pub(super) async fn reconcile_machines(&self, event: &ResourceEvent) -> Result<Reconciled> {
        if event.change == ChangeType::Updated {
            return Ok(Reconciled::Unchanged);
        }

        let api = &*self.api;
        self.aggregate
            .reconcile_with(
                Section::Status,
                move || async move {
                    let count = api.count_machines().await?;
                    tracing::debug!(count, "Counted machines");
                    Ok::<_, Error>(count)
                },
                |status, count| set_count(status, ACTIVE_MACHINES, *count),
            )
            .await
    }
}
