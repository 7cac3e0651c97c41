//! Capability matching between what a request asks for and what a candidate offers.
//!
//! Compute matching is strict in both directions: everything requested must be offered, and
//! anything offered but not requested rejects the candidate. Network matching only checks the
//! fields the request names.

use std::fmt::Debug;

use models::{
    epa::{GuestEpa, HostEpa, HypervisorEpa, NumaNodePolicy, VmFlavor, VswitchEpa},
    EpaAttributes, VirtualLinkInfo, VirtualLinkRequest,
};
use tracing::debug;

fn scalar<T: PartialEq + Debug>(attr: &str, requested: &Option<T>, offered: &Option<T>) -> bool {
    let ok = match (requested, offered) {
        (None, None) => true,
        (Some(r), Some(o)) => r == o,
        _ => false,
    };
    if !ok {
        debug!("rejecting candidate on {attr}: requested {requested:?}, offered {offered:?}");
    }
    ok
}

/// Requested entries must all be offered. An empty request only accepts an empty offer.
fn subset<T: PartialEq + Debug>(attr: &str, requested: &[T], offered: &[T]) -> bool {
    let ok = if requested.is_empty() {
        offered.is_empty()
    } else {
        requested.iter().all(|r| offered.contains(r))
    };
    if !ok {
        debug!("rejecting candidate on {attr}: requested {requested:?}, offered {offered:?}");
    }
    ok
}

fn group<T>(
    attr: &str,
    requested: &Option<T>,
    offered: &Option<T>,
    matches: impl FnOnce(&T, &T) -> bool,
) -> bool {
    match (requested, offered) {
        (None, None) => true,
        (Some(r), Some(o)) => matches(r, o),
        (Some(_), None) => {
            debug!("rejecting candidate: {attr} requested but not offered");
            false
        }
        (None, Some(_)) => {
            debug!("rejecting candidate: {attr} offered but not requested");
            false
        }
    }
}

fn match_vm_flavor(r: &VmFlavor, o: &VmFlavor) -> bool {
    scalar("vm_flavor.vcpu_count", &r.vcpu_count, &o.vcpu_count)
        && scalar("vm_flavor.memory_mb", &r.memory_mb, &o.memory_mb)
        && scalar("vm_flavor.storage_gb", &r.storage_gb, &o.storage_gb)
}

fn match_numa(r: &NumaNodePolicy, o: &NumaNodePolicy) -> bool {
    scalar("numa_node_policy.node_cnt", &r.node_cnt, &o.node_cnt)
        && scalar("numa_node_policy.mem_policy", &r.mem_policy, &o.mem_policy)
        && subset("numa_node_policy.node", &r.node, &o.node)
}

fn match_guest_epa(r: &GuestEpa, o: &GuestEpa) -> bool {
    scalar(
        "guest_epa.trusted_execution",
        &r.trusted_execution,
        &o.trusted_execution,
    ) && scalar("guest_epa.mempage_size", &r.mempage_size, &o.mempage_size)
        && scalar(
            "guest_epa.cpu_pinning_policy",
            &r.cpu_pinning_policy,
            &o.cpu_pinning_policy,
        )
        && scalar(
            "guest_epa.cpu_thread_pinning_policy",
            &r.cpu_thread_pinning_policy,
            &o.cpu_thread_pinning_policy,
        )
        && group(
            "guest_epa.numa_node_policy",
            &r.numa_node_policy,
            &o.numa_node_policy,
            match_numa,
        )
        && subset("guest_epa.pcie_device", &r.pcie_device, &o.pcie_device)
}

fn match_host_epa(r: &HostEpa, o: &HostEpa) -> bool {
    scalar("host_epa.cpu_model", &r.cpu_model, &o.cpu_model)
        && scalar("host_epa.cpu_arch", &r.cpu_arch, &o.cpu_arch)
        && scalar("host_epa.cpu_vendor", &r.cpu_vendor, &o.cpu_vendor)
        && scalar(
            "host_epa.cpu_socket_count",
            &r.cpu_socket_count,
            &o.cpu_socket_count,
        )
        && scalar(
            "host_epa.cpu_core_count",
            &r.cpu_core_count,
            &o.cpu_core_count,
        )
        && scalar(
            "host_epa.cpu_core_thread_count",
            &r.cpu_core_thread_count,
            &o.cpu_core_thread_count,
        )
        && subset("host_epa.cpu_feature", &r.cpu_feature, &o.cpu_feature)
        && scalar(
            "host_epa.om_cpu_model_string",
            &r.om_cpu_model_string,
            &o.om_cpu_model_string,
        )
        && subset("host_epa.om_cpu_feature", &r.om_cpu_feature, &o.om_cpu_feature)
}

fn match_vswitch_epa(r: &VswitchEpa, o: &VswitchEpa) -> bool {
    scalar(
        "vswitch_epa.ovs_acceleration",
        &r.ovs_acceleration,
        &o.ovs_acceleration,
    ) && scalar("vswitch_epa.ovs_offload", &r.ovs_offload, &o.ovs_offload)
}

fn match_hypervisor_epa(r: &HypervisorEpa, o: &HypervisorEpa) -> bool {
    scalar(
        "hypervisor_epa.type",
        &r.hypervisor_type,
        &o.hypervisor_type,
    ) && scalar("hypervisor_epa.version", &r.version, &o.version)
}

/// Whether a candidate advertising `offered` satisfies a compute request for `requested`.
///
/// Both sides are normalized first, so `PREFER_X` and `REQUIRE_X` compare equal.
pub fn match_epa(requested: &EpaAttributes, offered: &EpaAttributes) -> bool {
    let r = requested.normalized();
    let o = offered.normalized();

    group("vm_flavor", &r.vm_flavor, &o.vm_flavor, match_vm_flavor)
        && group("guest_epa", &r.guest_epa, &o.guest_epa, match_guest_epa)
        && group("host_epa", &r.host_epa, &o.host_epa, match_host_epa)
        && group(
            "vswitch_epa",
            &r.vswitch_epa,
            &o.vswitch_epa,
            match_vswitch_epa,
        )
        && group(
            "hypervisor_epa",
            &r.hypervisor_epa,
            &o.hypervisor_epa,
            match_hypervisor_epa,
        )
        && subset("host_aggregate", &r.host_aggregate, &o.host_aggregate)
}

/// Fields left out of the request act as wildcards. Extra attributes on the link never
/// disqualify it.
pub fn match_virtual_link(requested: &VirtualLinkRequest, link: &VirtualLinkInfo) -> bool {
    fn wildcard<T: PartialEq + Debug>(attr: &str, requested: &Option<T>, offered: Option<&T>) -> bool {
        match requested {
            None => true,
            Some(r) if offered == Some(r) => true,
            Some(r) => {
                debug!("rejecting virtual link on {attr}: requested {r:?}, offered {offered:?}");
                false
            }
        }
    }

    if !wildcard("name", &requested.name, Some(&link.name)) {
        return false;
    }

    let Some(wanted) = &requested.provider_network else {
        return true;
    };
    let offered = link.provider_network.as_ref();

    wildcard(
        "physical_network",
        &wanted.physical_network,
        offered.and_then(|p| p.physical_network.as_ref()),
    ) && wildcard(
        "overlay_type",
        &wanted.overlay_type,
        offered.and_then(|p| p.overlay_type.as_ref()),
    ) && wildcard(
        "segmentation_id",
        &wanted.segmentation_id,
        offered.and_then(|p| p.segmentation_id.as_ref()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use models::{
        epa::{CpuModel, MempageSize, PcieDevice},
        OverlayType, ProviderNetwork, VirtualLinkState,
    };
    use proptest::prelude::*;
    use testing_utils::{epa_attributes_strategy, virtual_link_info_strategy};

    fn with_features(features: &[&str]) -> EpaAttributes {
        EpaAttributes {
            host_epa: Some(HostEpa {
                cpu_feature: features.iter().map(|f| f.to_string()).collect(),
                ..Default::default()
            }),
            ..EpaAttributes::with_vm_flavor(2, 2048)
        }
    }

    #[test]
    fn test_cpu_features_are_a_subset() {
        assert!(match_epa(&with_features(&["avx"]), &with_features(&["avx", "avx2"])));
        assert!(!match_epa(&with_features(&["avx", "avx512"]), &with_features(&["avx", "avx2"])));
    }

    #[test]
    fn test_subset_still_needs_other_groups() {
        let mut offered = with_features(&["avx", "avx2"]);
        offered.vm_flavor = Some(VmFlavor {
            vcpu_count: Some(4),
            memory_mb: Some(2048),
            storage_gb: None,
        });
        assert!(!match_epa(&with_features(&["avx"]), &offered));
    }

    #[test]
    fn test_absent_on_both_sides_passes() {
        assert!(match_epa(&EpaAttributes::default(), &EpaAttributes::default()));
        assert!(match_epa(
            &EpaAttributes::with_vm_flavor(1, 512),
            &EpaAttributes::with_vm_flavor(1, 512)
        ));
    }

    #[test]
    fn test_unrequested_group_rejects() {
        let requested = EpaAttributes::with_vm_flavor(2, 2048);
        let offered = EpaAttributes {
            guest_epa: Some(GuestEpa {
                pcie_device: vec![PcieDevice {
                    device_id: "8086".to_owned(),
                    count: 1,
                }],
                ..Default::default()
            }),
            ..requested.clone()
        };
        assert!(!match_epa(&requested, &offered));
        // and the other way around
        assert!(!match_epa(&offered, &requested));
    }

    #[test]
    fn test_unrequested_list_entries_reject() {
        assert!(!match_epa(&with_features(&[]), &with_features(&["avx"])));
    }

    #[test]
    fn test_preference_is_normalized() {
        let requested = EpaAttributes {
            guest_epa: Some(GuestEpa {
                mempage_size: Some(MempageSize::PreferLarge),
                ..Default::default()
            }),
            host_epa: Some(HostEpa {
                cpu_model: Some(CpuModel::PreferHaswell),
                cpu_feature: vec!["PREFER_AES".to_owned()],
                ..Default::default()
            }),
            ..Default::default()
        };
        let offered = EpaAttributes {
            guest_epa: Some(GuestEpa {
                mempage_size: Some(MempageSize::Large),
                ..Default::default()
            }),
            host_epa: Some(HostEpa {
                cpu_model: Some(CpuModel::RequireHaswell),
                cpu_feature: vec!["REQUIRE_AES".to_owned(), "REQUIRE_AVX".to_owned()],
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(match_epa(&requested, &offered));
    }

    fn link(provider_network: Option<ProviderNetwork>) -> VirtualLinkInfo {
        VirtualLinkInfo {
            virtual_link_id: "vl-1".to_owned(),
            name: "mgmt".to_owned(),
            subnet: None,
            state: VirtualLinkState::Active,
            provider_network,
        }
    }

    #[test]
    fn test_link_fields_are_wildcards() {
        let candidate = link(Some(ProviderNetwork {
            physical_network: Some("physnet1".to_owned()),
            overlay_type: Some(OverlayType::Vlan),
            segmentation_id: Some(100),
        }));

        assert!(match_virtual_link(&VirtualLinkRequest::default(), &candidate));

        let request = VirtualLinkRequest {
            provider_network: Some(ProviderNetwork {
                overlay_type: Some(OverlayType::Vlan),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(match_virtual_link(&request, &candidate));

        let request = VirtualLinkRequest {
            provider_network: Some(ProviderNetwork {
                segmentation_id: Some(200),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(!match_virtual_link(&request, &candidate));
    }

    #[test]
    fn test_link_without_provider_tags() {
        let request = VirtualLinkRequest {
            name: Some("mgmt".to_owned()),
            provider_network: Some(ProviderNetwork {
                physical_network: Some("physnet1".to_owned()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(!match_virtual_link(&request, &link(None)));

        let by_name = VirtualLinkRequest {
            name: Some("mgmt".to_owned()),
            ..Default::default()
        };
        assert!(match_virtual_link(&by_name, &link(None)));
    }

    proptest! {
        #[test]
        fn prop_epa_match_is_reflexive(epa in epa_attributes_strategy()) {
            prop_assert!(match_epa(&epa, &epa));
        }

        #[test]
        fn prop_extra_offered_group_rejects(epa in epa_attributes_strategy()) {
            let requested = EpaAttributes { vswitch_epa: None, ..epa.clone() };
            let offered = EpaAttributes {
                vswitch_epa: Some(VswitchEpa::default()),
                ..epa
            };
            prop_assert!(!match_epa(&requested, &offered));
        }

        #[test]
        fn prop_link_matches_its_own_tags(info in virtual_link_info_strategy()) {
            let request = VirtualLinkRequest {
                name: Some(info.name.clone()),
                subnet: None,
                provider_network: info.provider_network.clone(),
            };
            prop_assert!(match_virtual_link(&request, &info));
        }

        #[test]
        fn prop_extra_link_tags_never_reject(info in virtual_link_info_strategy()) {
            let request = VirtualLinkRequest {
                name: Some(info.name.clone()),
                ..Default::default()
            };
            prop_assert!(match_virtual_link(&request, &info));
        }
    }
}
