use super::{
    Reconciled, Section, Writers,
    entries::{insert_name, remove_name},
};
use crate::{
    Result,
    cluster::AggregateApi,
    events::{ChangeType, ResourceEvent},
};

const MACHINE_CLASSES: &str = "machineClasses";

impl<A: AggregateApi> Writers<A> {
    pub(super) async fn reconcile_machine_class(&self, event: &ResourceEvent) -> Result<Reconciled> {
        let name = event.name();
        match event.change {
            ChangeType::Added | ChangeType::Updated => {
                self.aggregate
                    .reconcile(Section::Status, |status| {
                        insert_name(status, MACHINE_CLASSES, &name)
                    })
                    .await
            }
            ChangeType::Deleted => {
                self.aggregate
                    .reconcile(Section::Status, |status| {
                        remove_name(status, MACHINE_CLASSES, &name)
                    })
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{api::MACHINE_CLASS, testing::object, writers::tests::harness};

    #[tokio::test]
    async fn class_names_are_unique() {
        let h = harness();
        let small = object(MACHINE_CLASS, "small");

        h.send(ChangeType::Added, &small).await;
        h.send(ChangeType::Updated, &small).await;
        h.send(ChangeType::Added, &object(MACHINE_CLASS, "large")).await;
        assert_eq!(h.status()["machineClasses"], json!(["small", "large"]));

        h.send(ChangeType::Deleted, &small).await;
        assert_eq!(h.status()["machineClasses"], json!(["large"]));
    }
}
