//! Mapping owned objects back to the Pulp that controls them

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::runtime::reflector::ObjectRef;
use kube::Resource;

use pulp_common::crd::Pulp;

/// Kinds whose changes re-trigger reconciliation of their owning Pulp
pub const OWNED_KINDS: [&str; 5] = ["StatefulSet", "Deployment", "Service", "Secret", "ConfigMap"];

/// Resolve the Pulp controlling `meta`, if any.
///
/// Only the controller owner reference counts, and only when it points at
/// a Pulp of this API group. The owner lives in the same namespace.
pub fn owner_request(meta: &ObjectMeta) -> Option<ObjectRef<Pulp>> {
    let kind = Pulp::kind(&());
    let api_version = Pulp::api_version(&());
    let owner = meta.owner_references.as_ref()?.iter().find(|o| {
        o.controller == Some(true) && o.kind == kind && o.api_version == api_version
    })?;

    let object_ref = ObjectRef::new(&owner.name);
    Some(match meta.namespace.as_deref() {
        Some(ns) => object_ref.within(ns),
        None => object_ref,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

    fn owned_by(kind: &str, api_version: &str, controller: bool) -> ObjectMeta {
        ObjectMeta {
            name: Some("galaxy-api".to_string()),
            namespace: Some("ns1".to_string()),
            owner_references: Some(vec![OwnerReference {
                api_version: api_version.to_string(),
                kind: kind.to_string(),
                name: "galaxy".to_string(),
                uid: "uid-1".to_string(),
                controller: Some(controller),
                ..Default::default()
            }]),
            ..Default::default()
        }
    }

    #[test]
    fn controller_reference_to_pulp_resolves() {
        let meta = owned_by("Pulp", "repo-manager.pulpproject.org/v1alpha1", true);
        let request = owner_request(&meta).unwrap();
        assert_eq!(request.name, "galaxy");
        assert_eq!(request.namespace.as_deref(), Some("ns1"));
    }

    #[test]
    fn non_controller_reference_is_ignored() {
        let meta = owned_by("Pulp", "repo-manager.pulpproject.org/v1alpha1", false);
        assert!(owner_request(&meta).is_none());
    }

    #[test]
    fn other_kinds_are_ignored() {
        let meta = owned_by("ReplicaSet", "apps/v1", true);
        assert!(owner_request(&meta).is_none());

        let foreign = owned_by("Pulp", "example.com/v1", true);
        assert!(owner_request(&foreign).is_none());
    }

    #[test]
    fn unowned_objects_are_ignored() {
        assert!(owner_request(&ObjectMeta::default()).is_none());
    }
}
